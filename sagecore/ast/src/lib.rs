/*

 ▄▄▄▄    ██▓    ▄▄▄       ▄████▄   ██ ▄█▀ ██▀███   █    ██   ██████  ██░ ██
▓█████▄ ▓██▒   ▒████▄    ▒██▀ ▀█   ██▄█▒ ▓██ ▒ ██▒ ██  ▓██▒▒██    ▒ ▓██░ ██▒
▒██▒ ▄██▒██░   ▒██  ▀█▄  ▒▓█    ▄ ▓███▄░ ▓██ ░▄█ ▒▓██  ▒██░░ ▓██▄   ▒██▀▀██░
▒██░█▀  ▒██░   ░██▄▄▄▄██ ▒▓▓▄ ▄██▒▓██ █▄ ▒██▀▀█▄  ▓▓█  ░██░  ▒   ██▒░▓█ ░██
░▓█  ▀█▓░██████▒▓█   ▓██▒▒ ▓███▀ ░▒██▒ █▄░██▓ ▒██▒▒▒█████▓ ▒██████▒▒░▓█▒░██▓
░▒▓███▀▒░ ▒░▓  ░▒▒   ▓▒█░░ ░▒ ▒  ░▒ ▒▒ ▓▒░ ▒▓ ░▒▓░░▒▓▒ ▒ ▒ ▒ ▒▓▒ ▒ ░ ▒ ░░▒░▒
▒░▒   ░ ░ ░ ▒  ░ ▒   ▒▒ ░  ░  ▒   ░ ░▒ ▒░  ░▒ ░ ▒░░░▒░ ░ ░ ░ ░▒  ░ ░ ▒ ░▒░ ░
 ░    ░   ░ ░    ░   ▒   ░        ░ ░░ ░   ░░   ░  ░░░ ░ ░ ░  ░  ░   ░  ░░ ░
 ░          ░  ░     ░  ░░ ░      ░  ░      ░        ░           ░   ░  ░  ░
      ░                  ░
Copyright (C) 2026, Blackrush LLC, All Rights Reserved
Created by Erik Olson, Tarpon Springs, Florida
For more information, visit BlackrushDrive.com

MIT License

Copyright (c) 2026 Erik Lee Olson for Blackrush, LLC

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.

*/

//! Statement model for Sage event scripts — expressions, calls, conditionals,
//! switches, labelled loops, jumps, return, exit — plus the host-facing
//! runtime seams (values, scopes, expression callables, built-in functions).
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Serialize, Deserialize};

use sage_common::Result;

/// A literal runtime value. Equality is strict: no cross-variant numeric
/// coercion, so a switch pattern of `Int(2)` does not match `Num(2.0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Num(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Num(n) => *n != 0.0,
        Value::Str(s) => !s.is_empty(),
    }
}

/// Ambient mapping shared by every frame of one call tree. Supplied by the
/// host at top-level exec and handed to built-ins unchanged.
pub type Env = Rc<RefCell<HashMap<String, Value>>>;

pub fn new_env(map: HashMap<String, Value>) -> Env {
    Rc::new(RefCell::new(map))
}

/// The runtime environment of a single invocation: `args` is fixed at frame
/// entry, `local` is per-frame scratch mutated by expression side effects,
/// `env` is shared across the whole call tree.
#[derive(Debug, Clone)]
pub struct Scope {
    pub args: HashMap<String, Value>,
    pub local: HashMap<String, Value>,
    pub env: Env,
}

impl Scope {
    pub fn new(args: HashMap<String, Value>, env: Env) -> Self {
        Self { args, local: HashMap::new(), env }
    }
}

/// A host-supplied expression. Evaluation is synchronous; the async flags on
/// statements are host metadata and do not change how the engine advances.
pub trait Eval {
    fn eval(&self, scope: &mut Scope) -> Result<Value>;
}

impl<F> Eval for F
where
    F: Fn(&mut Scope) -> Result<Value>,
{
    fn eval(&self, scope: &mut Scope) -> Result<Value> { self(scope) }
}

#[derive(Clone)]
pub struct Expr(Rc<dyn Eval>);

impl Expr {
    pub fn new<E: Eval + 'static>(e: E) -> Self { Expr(Rc::new(e)) }
    pub fn eval(&self, scope: &mut Scope) -> Result<Value> { self.0.eval(scope) }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "<expr>") }
}

/// One entry of a call's parameter map: either a literal or an expression
/// evaluated against the caller's scope at call time.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Expr(Expr),
}

/// A host operation registered by name at interpreter construction. The
/// `save_relevant` flag marks built-ins whose effects the host's persistence
/// layer must account for when it snapshots an execution.
#[derive(Clone)]
pub struct Builtin {
    pub func: Rc<dyn Fn(&HashMap<String, Value>, &Env) -> Result<Value>>,
    pub save_relevant: bool,
}

impl Builtin {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&HashMap<String, Value>, &Env) -> Result<Value> + 'static,
    {
        Self { func: Rc::new(f), save_relevant: false }
    }

    pub fn save_relevant<F>(f: F) -> Self
    where
        F: Fn(&HashMap<String, Value>, &Env) -> Result<Value> + 'static,
    {
        Self { func: Rc::new(f), save_relevant: true }
    }

    pub fn call(&self, params: &HashMap<String, Value>, env: &Env) -> Result<Value> {
        (self.func)(params, env)
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin save_relevant={}>", self.save_relevant)
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    // Expression evaluated for its side effect. `await_result` mirrors the
    // host's async marking; evaluation completes before the step advances.
    Expr { expr: Expr, await_result: bool },
    // Call to a built-in (host operation) or a named global function.
    // Parameters keep declaration order so expression side effects stay
    // deterministic.
    Call { name: String, params: Vec<(String, Arg)>, built_in: bool, is_async: bool },
    Return { value: Option<Arg> },
    If { arms: Vec<IfArm>, otherwise: Option<Block> },
    // Pattern evaluated once, then compared for strict equality against each
    // arm's value in order. No fallthrough.
    Switch { pattern: Expr, arms: Vec<SwitchArm>, otherwise: Option<Block> },
    // All pieces optional except the body; a missing condition means "always
    // true", `skip_initial_check` turns the loop into do-while.
    Loop {
        init: Option<Expr>,
        cond: Option<Expr>,
        iter: Option<Expr>,
        label: Option<String>,
        body: Block,
        skip_initial_check: bool,
    },
    Break { label: Option<String> },
    Continue,
    // Terminates the entire execution, including every parent call frame.
    Exit,
}

#[derive(Debug, Clone)]
pub struct IfArm {
    pub cond: Expr,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct SwitchArm {
    pub value: Expr,
    pub body: Block,
}

pub type Block = Vec<Statement>;
