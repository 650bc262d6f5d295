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

//! Statement tree → step program compiler. Pass one (flow analysis) lowers
//! the tree to a labelled control-flow graph; pass two emits one executable
//! step per node ID, fusing runs of mergeable nodes into single steps so
//! only genuine boundaries (external calls, escaping jumps) cost a dispatch.
use std::collections::HashMap;

use sage_common::{Result, SageError};
use sage_ast::{Block, Builtin, Expr};
use sage_program::{Fused, Plan, PlanLoop, Program, Step};

pub mod flow;
use flow::{FlowGraph, FlowKind, JumpKind, NodeRef};

/// Run both passes. Built-in callees are resolved here, eagerly: an unknown
/// built-in fails the compile even if the call is unreachable.
pub fn compile(block: &Block, builtins: &HashMap<String, Builtin>) -> Result<Program> {
    let graph = flow::analyze(block)?;
    generate(&graph, builtins)
}

/// Pass two: a dense step array indexed by node ID. IDs swallowed by a
/// fused run come out as `Step::Dead`.
pub fn generate(graph: &FlowGraph, builtins: &HashMap<String, Builtin>) -> Result<Program> {
    let mut pass = Gen { graph, builtins, steps: vec![None; graph.id_count] };
    pass.gen_block(graph.root)?;
    let steps = pass.steps.into_iter().map(|s| s.unwrap_or(Step::Dead)).collect();
    Ok(Program { steps })
}

struct Gen<'a> {
    graph: &'a FlowGraph,
    builtins: &'a HashMap<String, Builtin>,
    steps: Vec<Option<Step>>,
}

impl<'a> Gen<'a> {
    fn put(&mut self, id: usize, step: Step) {
        self.steps[id] = Some(step);
    }

    fn resolve(&self, name: &str) -> Result<Builtin> {
        self.builtins.get(name).cloned().ok_or_else(|| {
            SageError(format!("unknown builtin function '{}'", name))
        })
    }

    /// Split a block's children into runs separated at non-mergeable nodes
    /// and emit steps for each.
    fn gen_block(&mut self, block: NodeRef) -> Result<()> {
        let children = match &self.graph.node(block).kind {
            FlowKind::Block { children, .. } => children.clone(),
            _ => return Err(SageError("expected a block flow node".into())),
        };
        let mut run: Vec<NodeRef> = Vec::new();
        for &child in &children {
            if self.graph.node(child).mergeable {
                run.push(child);
            } else {
                self.flush_run(&run)?;
                run.clear();
                self.gen_standalone(child)?;
            }
        }
        self.flush_run(&run)?;
        Ok(())
    }

    /// A run of two or more nodes, or any run containing a composite,
    /// collapses to one fused step at the entry ID; a lone simple node
    /// keeps its plain step.
    fn flush_run(&mut self, run: &[NodeRef]) -> Result<()> {
        if run.is_empty() {
            return Ok(());
        }
        let composite = run.iter().any(|&r| matches!(
            self.graph.node(r).kind,
            FlowKind::If { .. } | FlowKind::Switch { .. } | FlowKind::Loop { .. } | FlowKind::LoopEntry { .. }
        ));
        if run.len() < 2 && !composite {
            return self.gen_standalone(run[0]);
        }
        let mut open = Vec::new();
        let plan = self.plan_items(run, &mut open)?;
        let next = self.node_next(*run.last().expect("empty run")).map(|n| self.graph.id_of(n));
        let entry = self.graph.id_of(run[0]);
        self.put(entry, Step::Fused(Fused { plan, next }));
        Ok(())
    }

    /// Where control goes after a node completes normally.
    fn node_next(&self, r: NodeRef) -> Option<NodeRef> {
        match &self.graph.node(r).kind {
            FlowKind::Normal { next, .. }
            | FlowKind::BuiltinCall { next, .. }
            | FlowKind::ExternCall { next, .. }
            | FlowKind::If { next, .. }
            | FlowKind::Switch { next, .. }
            | FlowKind::Loop { next, .. }
            | FlowKind::Jump { next, .. }
            | FlowKind::Block { next, .. } => Some(*next),
            FlowKind::Iterate { head, .. } => Some(*head),
            FlowKind::LoopEntry { main, .. } => self.node_next(*main),
            FlowKind::Return { .. } | FlowKind::Exit => None,
        }
    }

    fn gen_standalone(&mut self, r: NodeRef) -> Result<()> {
        let id = self.graph.id_of(r);
        match &self.graph.node(r).kind {
            FlowKind::Normal { expr, next } => {
                let next = self.graph.id_of(*next);
                self.put(id, Step::Expr { expr: expr.clone(), next });
            }
            FlowKind::BuiltinCall { name, params, next } => {
                let builtin = self.resolve(name)?;
                let next = self.graph.id_of(*next);
                self.put(id, Step::Builtin { name: name.clone(), builtin, params: params.clone(), next });
            }
            FlowKind::ExternCall { name, params, next } => {
                let next = self.graph.id_of(*next);
                self.put(id, Step::ExternCall { name: name.clone(), params: params.clone(), next });
            }
            FlowKind::If { arms, otherwise, next } => {
                let step_arms: Vec<(Expr, usize)> = arms
                    .iter()
                    .map(|(cond, body)| (cond.clone(), self.graph.id_of(*body)))
                    .collect();
                let step_otherwise = otherwise.map(|o| self.graph.id_of(o));
                let step_next = self.graph.id_of(*next);
                let branches: Vec<NodeRef> = arms.iter().map(|(_, b)| *b).chain(*otherwise).collect();
                self.put(id, Step::If { arms: step_arms, otherwise: step_otherwise, next: step_next });
                for b in branches {
                    self.gen_block(b)?;
                }
            }
            FlowKind::Switch { pattern, arms, otherwise, next } => {
                let step_arms: Vec<(Expr, usize)> = arms
                    .iter()
                    .map(|(value, body)| (value.clone(), self.graph.id_of(*body)))
                    .collect();
                let step_otherwise = otherwise.map(|o| self.graph.id_of(o));
                let step_next = self.graph.id_of(*next);
                let branches: Vec<NodeRef> = arms.iter().map(|(_, b)| *b).chain(*otherwise).collect();
                self.put(id, Step::Switch {
                    pattern: pattern.clone(),
                    arms: step_arms,
                    otherwise: step_otherwise,
                    next: step_next,
                });
                for b in branches {
                    self.gen_block(b)?;
                }
            }
            FlowKind::Loop { cond, iter, body, next, .. } => {
                let step = Step::LoopHead {
                    cond: cond.clone(),
                    body: self.graph.id_of(*body),
                    next: self.graph.id_of(*next),
                };
                let iter = *iter;
                let body = *body;
                self.put(id, step);
                if let Some(it) = iter {
                    self.gen_standalone(it)?;
                }
                self.gen_block(body)?;
            }
            FlowKind::Iterate { iter, head } => {
                let head = self.graph.id_of(*head);
                self.put(id, Step::Iterate { iter: iter.clone(), head });
            }
            FlowKind::LoopEntry { init, main } => {
                let target = match &self.graph.node(*main).kind {
                    FlowKind::Loop { skip_initial, body, .. } => {
                        if *skip_initial { self.graph.id_of(*body) } else { self.graph.id_of(*main) }
                    }
                    _ => return Err(SageError("loop entry does not wrap a loop".into())),
                };
                let main = *main;
                self.put(id, Step::LoopEntry { init: init.clone(), target });
                self.gen_standalone(main)?;
            }
            FlowKind::Jump { next, .. } => {
                let next = self.graph.id_of(*next);
                self.put(id, Step::Jump { next });
            }
            FlowKind::Return { value } => {
                self.put(id, Step::Return { value: value.clone() });
            }
            FlowKind::Exit => {
                self.put(id, Step::Exit);
            }
            FlowKind::Block { .. } => {
                return Err(SageError("block flow node has no step of its own".into()));
            }
        }
        Ok(())
    }

    // --- fused-run plan compilation ---
    //
    // `open` tracks the loops opened within the plan under construction; a
    // break or continue whose target loop is open stays structural, every
    // other jump escapes the fused step as a Move opcode.

    fn plan_items(&self, children: &[NodeRef], open: &mut Vec<NodeRef>) -> Result<Vec<Plan>> {
        children.iter().map(|&c| self.plan_node(c, open)).collect()
    }

    fn plan_block(&self, block: NodeRef, open: &mut Vec<NodeRef>) -> Result<Vec<Plan>> {
        match &self.graph.node(block).kind {
            FlowKind::Block { children, .. } => self.plan_items(children, open),
            _ => Err(SageError("expected a block flow node".into())),
        }
    }

    fn plan_node(&self, r: NodeRef, open: &mut Vec<NodeRef>) -> Result<Plan> {
        match &self.graph.node(r).kind {
            FlowKind::Normal { expr, .. } => Ok(Plan::Eval(expr.clone())),
            FlowKind::BuiltinCall { name, params, .. } => Ok(Plan::Builtin {
                name: name.clone(),
                builtin: self.resolve(name)?,
                params: params.clone(),
            }),
            FlowKind::If { arms, otherwise, .. } => {
                let mut plan_arms = Vec::with_capacity(arms.len());
                for (cond, body) in arms {
                    plan_arms.push((cond.clone(), self.plan_block(*body, open)?));
                }
                let otherwise = match otherwise {
                    Some(o) => Some(self.plan_block(*o, open)?),
                    None => None,
                };
                Ok(Plan::If { arms: plan_arms, otherwise })
            }
            FlowKind::Switch { pattern, arms, otherwise, .. } => {
                let mut plan_arms = Vec::with_capacity(arms.len());
                for (value, body) in arms {
                    plan_arms.push((value.clone(), self.plan_block(*body, open)?));
                }
                let otherwise = match otherwise {
                    Some(o) => Some(self.plan_block(*o, open)?),
                    None => None,
                };
                Ok(Plan::Switch { pattern: pattern.clone(), arms: plan_arms, otherwise })
            }
            FlowKind::Loop { .. } => self.plan_loop(r, None, open),
            FlowKind::LoopEntry { init, main } => self.plan_loop(*main, init.clone(), open),
            FlowKind::Jump { jump, target, next } => {
                if open.contains(target) {
                    match jump {
                        JumpKind::Break(label) => Ok(Plan::Break(label.clone())),
                        JumpKind::Continue => Ok(Plan::Continue),
                    }
                } else {
                    Ok(Plan::Move(self.graph.id_of(*next)))
                }
            }
            FlowKind::Return { value } => Ok(Plan::Return(value.clone())),
            FlowKind::Exit => Ok(Plan::Exit),
            FlowKind::ExternCall { .. } | FlowKind::Iterate { .. } | FlowKind::Block { .. } => {
                Err(SageError("non-mergeable node in a fused run".into()))
            }
        }
    }

    fn plan_loop(&self, head: NodeRef, init: Option<Expr>, open: &mut Vec<NodeRef>) -> Result<Plan> {
        let (label, cond, iter, skip_initial, body) = match &self.graph.node(head).kind {
            FlowKind::Loop { label, cond, iter, skip_initial, body, .. } => {
                let iter = match iter {
                    Some(it) => match &self.graph.node(*it).kind {
                        FlowKind::Iterate { iter, .. } => Some(iter.clone()),
                        _ => return Err(SageError("loop back edge is not an iterate node".into())),
                    },
                    None => None,
                };
                (label.clone(), cond.clone(), iter, *skip_initial, *body)
            }
            _ => return Err(SageError("loop entry does not wrap a loop".into())),
        };
        open.push(head);
        let body = self.plan_block(body, open);
        open.pop();
        Ok(Plan::Loop(PlanLoop { label, init, cond, iter, skip_initial, body: body? }))
    }
}
