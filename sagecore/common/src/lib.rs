#[derive(Debug)]
pub struct SageError(pub String);
impl std::fmt::Display for SageError { fn fmt(&self, f:&mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) } }
impl std::error::Error for SageError {}

pub type Result<T> = std::result::Result<T, SageError>;
