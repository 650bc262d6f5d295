//! Flow analysis: lowers a statement block into an arena-allocated
//! control-flow graph and labels every node with a dense integer ID.
//!
//! Blocks lower right to left so every node receives its true structural
//! successor up front. The root block gets an implicit return appended so a
//! program that falls off the end returns null.
use std::collections::HashMap;

use sage_common::{Result, SageError};
use sage_ast::{Arg, Block, Expr, Statement};

pub type NodeRef = usize;

#[derive(Debug, Clone)]
pub struct FlowNode {
    /// Assigned by the labelling walk; doubles as the program counter.
    pub id: Option<usize>,
    /// Whether this node may be fused with its neighbours into one step.
    /// False for external calls and anything transitively containing one.
    pub mergeable: bool,
    pub kind: FlowKind,
}

#[derive(Debug, Clone)]
pub enum FlowKind {
    Normal { expr: Expr, next: NodeRef },
    BuiltinCall { name: String, params: Vec<(String, Arg)>, next: NodeRef },
    /// Call to a named global function; always a standalone step boundary.
    ExternCall { name: String, params: Vec<(String, Arg)>, next: NodeRef },
    If { arms: Vec<(Expr, NodeRef)>, otherwise: Option<NodeRef>, next: NodeRef },
    Switch { pattern: Expr, arms: Vec<(Expr, NodeRef)>, otherwise: Option<NodeRef>, next: NodeRef },
    /// Loop head: checks the condition only. The iterator, when present,
    /// lives on a separate back-edge node so first entry does not run it.
    Loop {
        label: Option<String>,
        cond: Option<Expr>,
        iter: Option<NodeRef>,
        skip_initial: bool,
        body: NodeRef,
        next: NodeRef,
    },
    /// Back edge of a loop: evaluates the iterator, then re-enters the head.
    Iterate { iter: Expr, head: NodeRef },
    /// Entry wrapper emitted when a loop has an initialiser or is do-while:
    /// runs the initialiser once, then enters at the head or the body.
    LoopEntry { init: Option<Expr>, main: NodeRef },
    /// Break or continue. `target` is the loop it resolves to, `next` the
    /// node control actually moves to.
    Jump { jump: JumpKind, target: NodeRef, next: NodeRef },
    Return { value: Option<Arg> },
    Exit,
    /// Ordered node sequence. Has no ID of its own: it is addressed by its
    /// first child, or by its successor when empty.
    Block { children: Vec<NodeRef>, next: NodeRef },
}

#[derive(Debug, Clone)]
pub enum JumpKind {
    Break(Option<String>),
    Continue,
}

#[derive(Debug)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub root: NodeRef,
    /// Number of IDs assigned; the compiled program is exactly this long.
    pub id_count: usize,
}

impl FlowGraph {
    pub fn node(&self, r: NodeRef) -> &FlowNode { &self.nodes[r] }

    pub fn id_of(&self, r: NodeRef) -> usize {
        match &self.nodes[r].kind {
            FlowKind::Block { children, next } => match children.first() {
                Some(&first) => self.id_of(first),
                None => self.id_of(*next),
            },
            _ => self.nodes[r].id.expect("flow node not labelled"),
        }
    }
}

/// Lower a statement block to a labelled flow graph rooted in a block node
/// whose successor (and last child) is the implicit return.
pub fn analyze(block: &Block) -> Result<FlowGraph> {
    let mut pass = FlowPass { nodes: Vec::new(), labels: HashMap::new(), loops: Vec::new() };
    let implicit = pass.alloc(true, FlowKind::Return { value: None });
    let root = pass.lower_block(block, implicit)?;
    if let FlowKind::Block { children, .. } = &mut pass.nodes[root].kind {
        children.push(implicit);
    }
    let mut counter = 0usize;
    pass.assign_ids(root, &mut counter);
    Ok(FlowGraph { nodes: pass.nodes, root, id_count: counter })
}

struct FlowPass {
    nodes: Vec<FlowNode>,
    // label -> loop head, live only while the labelled loop's body lowers
    labels: HashMap<String, NodeRef>,
    // innermost-open loops, for unlabelled break and continue
    loops: Vec<NodeRef>,
}

impl FlowPass {
    fn alloc(&mut self, mergeable: bool, kind: FlowKind) -> NodeRef {
        self.nodes.push(FlowNode { id: None, mergeable, kind });
        self.nodes.len() - 1
    }

    fn lower_block(&mut self, stmts: &[Statement], next: NodeRef) -> Result<NodeRef> {
        let mut children = Vec::with_capacity(stmts.len());
        let mut succ = next;
        for s in stmts.iter().rev() {
            let n = self.lower_stmt(s, succ)?;
            children.push(n);
            succ = n;
        }
        children.reverse();
        let mergeable = children.iter().all(|&c| self.nodes[c].mergeable);
        Ok(self.alloc(mergeable, FlowKind::Block { children, next }))
    }

    fn lower_stmt(&mut self, s: &Statement, next: NodeRef) -> Result<NodeRef> {
        match s {
            Statement::Expr { expr, .. } => {
                Ok(self.alloc(true, FlowKind::Normal { expr: expr.clone(), next }))
            }
            Statement::Call { name, params, built_in, .. } => {
                if *built_in {
                    Ok(self.alloc(true, FlowKind::BuiltinCall {
                        name: name.clone(),
                        params: params.clone(),
                        next,
                    }))
                } else {
                    Ok(self.alloc(false, FlowKind::ExternCall {
                        name: name.clone(),
                        params: params.clone(),
                        next,
                    }))
                }
            }
            Statement::Return { value } => {
                Ok(self.alloc(true, FlowKind::Return { value: value.clone() }))
            }
            Statement::If { arms, otherwise } => {
                let mut mergeable = true;
                let mut flow_arms = Vec::with_capacity(arms.len());
                for arm in arms {
                    let body = self.lower_block(&arm.body, next)?;
                    mergeable &= self.nodes[body].mergeable;
                    flow_arms.push((arm.cond.clone(), body));
                }
                let otherwise = match otherwise {
                    Some(block) => {
                        let body = self.lower_block(block, next)?;
                        mergeable &= self.nodes[body].mergeable;
                        Some(body)
                    }
                    None => None,
                };
                Ok(self.alloc(mergeable, FlowKind::If { arms: flow_arms, otherwise, next }))
            }
            Statement::Switch { pattern, arms, otherwise } => {
                // every arm falls out to the switch's own successor
                let mut mergeable = true;
                let mut flow_arms = Vec::with_capacity(arms.len());
                for arm in arms {
                    let body = self.lower_block(&arm.body, next)?;
                    mergeable &= self.nodes[body].mergeable;
                    flow_arms.push((arm.value.clone(), body));
                }
                let otherwise = match otherwise {
                    Some(block) => {
                        let body = self.lower_block(block, next)?;
                        mergeable &= self.nodes[body].mergeable;
                        Some(body)
                    }
                    None => None,
                };
                Ok(self.alloc(mergeable, FlowKind::Switch {
                    pattern: pattern.clone(),
                    arms: flow_arms,
                    otherwise,
                    next,
                }))
            }
            Statement::Loop { init, cond, iter, label, body, skip_initial_check } => {
                let head = self.alloc(true, FlowKind::Loop {
                    label: label.clone(),
                    cond: cond.clone(),
                    iter: None,
                    skip_initial: *skip_initial_check,
                    body: usize::MAX,
                    next,
                });
                if let Some(l) = label {
                    if self.labels.contains_key(l) {
                        return Err(SageError(format!("duplicate label '{}'", l)));
                    }
                    self.labels.insert(l.clone(), head);
                }
                self.loops.push(head);
                let iterate = iter.as_ref().map(|e| {
                    self.alloc(true, FlowKind::Iterate { iter: e.clone(), head })
                });
                // the back edge must be on the head before the body lowers:
                // continue statements resolve against it
                if let FlowKind::Loop { iter: it, .. } = &mut self.nodes[head].kind {
                    *it = iterate;
                }
                let back = iterate.unwrap_or(head);
                let lowered = self.lower_block(body, back);
                self.loops.pop();
                if let Some(l) = label {
                    self.labels.remove(l);
                }
                let body_ref = lowered?;
                let body_mergeable = self.nodes[body_ref].mergeable;
                if let FlowKind::Loop { body: b, .. } = &mut self.nodes[head].kind {
                    *b = body_ref;
                }
                self.nodes[head].mergeable = body_mergeable;
                if init.is_some() || *skip_initial_check {
                    Ok(self.alloc(body_mergeable, FlowKind::LoopEntry { init: init.clone(), main: head }))
                } else {
                    Ok(head)
                }
            }
            Statement::Break { label } => {
                let target = match label {
                    Some(l) => *self.labels.get(l).ok_or_else(|| {
                        SageError(format!("unknown label '{}'", l))
                    })?,
                    None => *self.loops.last().ok_or_else(|| {
                        SageError("break outside of a loop".into())
                    })?,
                };
                let after = match &self.nodes[target].kind {
                    FlowKind::Loop { next, .. } => *next,
                    _ => return Err(SageError("break target is not a loop".into())),
                };
                Ok(self.alloc(true, FlowKind::Jump {
                    jump: JumpKind::Break(label.clone()),
                    target,
                    next: after,
                }))
            }
            Statement::Continue => {
                let target = *self.loops.last().ok_or_else(|| {
                    SageError("continue outside of a loop".into())
                })?;
                let back = match &self.nodes[target].kind {
                    FlowKind::Loop { iter, .. } => iter.unwrap_or(target),
                    _ => return Err(SageError("continue target is not a loop".into())),
                };
                Ok(self.alloc(true, FlowKind::Jump {
                    jump: JumpKind::Continue,
                    target,
                    next: back,
                }))
            }
            Statement::Exit => Ok(self.alloc(true, FlowKind::Exit)),
        }
    }

    // IDs follow first-visit order: composites take their own ID, then
    // their branches; a loop takes its head, then its back edge, then its
    // body; blocks pass through to their children.
    fn assign_ids(&mut self, r: NodeRef, counter: &mut usize) {
        match &self.nodes[r].kind {
            FlowKind::Block { children, .. } => {
                let kids = children.clone();
                for k in kids {
                    self.assign_ids(k, counter);
                }
            }
            FlowKind::If { arms, otherwise, .. } | FlowKind::Switch { arms, otherwise, .. } => {
                let mut kids: Vec<NodeRef> = arms.iter().map(|(_, b)| *b).collect();
                kids.extend(otherwise.iter().copied());
                self.set_id(r, counter);
                for k in kids {
                    self.assign_ids(k, counter);
                }
            }
            FlowKind::Loop { iter, body, .. } => {
                let it = *iter;
                let b = *body;
                self.set_id(r, counter);
                if let Some(it) = it {
                    self.assign_ids(it, counter);
                }
                self.assign_ids(b, counter);
            }
            FlowKind::LoopEntry { main, .. } => {
                let m = *main;
                self.set_id(r, counter);
                self.assign_ids(m, counter);
            }
            _ => self.set_id(r, counter),
        }
    }

    fn set_id(&mut self, r: NodeRef, counter: &mut usize) {
        self.nodes[r].id = Some(*counter);
        *counter += 1;
    }
}
