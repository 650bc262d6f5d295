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

//! Compiled program model: steps, opcodes, fused-run plans, snapshots.
use std::collections::HashMap;
use std::fmt::Write as _;

use sage_ast::{Arg, Builtin, Expr, Value};

pub mod snapshot;
pub use snapshot::{Snapshot, FrameState, serialize_snapshot, deserialize_snapshot};

#[derive(Debug, Clone)]
pub enum Opcode {
    Move(usize),
    Call { name: String, params: HashMap<String, Value>, next: usize },
    Return(Value),
    Exit,
}

#[derive(Debug, Clone)]
pub enum Step {
    Expr { expr: Expr, next: usize },
    Builtin { name: String, builtin: Builtin, params: Vec<(String, Arg)>, next: usize },
    /// Hand a call to a named global function back to the stepper. Always a
    /// standalone step: this is the serialisation point.
    ExternCall { name: String, params: Vec<(String, Arg)>, next: usize },
    If { arms: Vec<(Expr, usize)>, otherwise: Option<usize>, next: usize },
    Switch { pattern: Expr, arms: Vec<(Expr, usize)>, otherwise: Option<usize>, next: usize },
    /// Condition check only; the iterator lives on the back edge.
    LoopHead { cond: Option<Expr>, body: usize, next: usize },
    LoopEntry { init: Option<Expr>, target: usize },
    Iterate { iter: Expr, head: usize },
    Jump { next: usize },
    Return { value: Option<Arg> },
    Exit,
    Fused(Fused),
    /// Interior of a fused run. Stepping here means a corrupted program or
    /// snapshot.
    Dead,
}

/// A fused run: the plan executes the run's nodes in their structural order;
/// `next` is where control goes when the plan completes without diverging.
/// `None` only when the run ends in a terminal node, which never falls
/// through.
#[derive(Debug, Clone)]
pub struct Fused {
    pub plan: Vec<Plan>,
    pub next: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum Plan {
    Eval(Expr),
    Builtin { name: String, builtin: Builtin, params: Vec<(String, Arg)> },
    If { arms: Vec<(Expr, Vec<Plan>)>, otherwise: Option<Vec<Plan>> },
    Switch { pattern: Expr, arms: Vec<(Expr, Vec<Plan>)>, otherwise: Option<Vec<Plan>> },
    Loop(PlanLoop),
    Break(Option<String>),
    Continue,
    Move(usize),
    Return(Option<Arg>),
    Exit,
}

#[derive(Debug, Clone)]
pub struct PlanLoop {
    pub label: Option<String>,
    pub init: Option<Expr>,
    pub cond: Option<Expr>,
    pub iter: Option<Expr>,
    pub skip_initial: bool,
    pub body: Vec<Plan>,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub steps: Vec<Step>,
}

impl Program {
    pub fn len(&self) -> usize { self.steps.len() }
    pub fn is_empty(&self) -> bool { self.steps.is_empty() }

    pub fn step(&self, id: usize) -> Option<&Step> { self.steps.get(id) }

    pub fn is_boundary(&self, id: usize) -> bool {
        matches!(self.steps.get(id), Some(s) if !matches!(s, Step::Dead))
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (id, step) in self.steps.iter().enumerate() {
            let line = match step {
                Step::Expr { next, .. } => format!("expr -> {}", next),
                Step::Builtin { name, next, .. } => format!("builtin {} -> {}", name, next),
                Step::ExternCall { name, next, .. } => format!("call {} -> {}", name, next),
                Step::If { arms, otherwise, next } => {
                    let targets: Vec<String> = arms.iter().map(|(_, t)| t.to_string()).collect();
                    format!("if [{}] else {:?} -> {}", targets.join(" "), otherwise, next)
                }
                Step::Switch { arms, otherwise, next, .. } => {
                    let targets: Vec<String> = arms.iter().map(|(_, t)| t.to_string()).collect();
                    format!("switch [{}] else {:?} -> {}", targets.join(" "), otherwise, next)
                }
                Step::LoopHead { body, next, .. } => format!("loop body {} -> {}", body, next),
                Step::LoopEntry { target, .. } => format!("loop-entry -> {}", target),
                Step::Iterate { head, .. } => format!("iterate -> {}", head),
                Step::Jump { next } => format!("jump -> {}", next),
                Step::Return { .. } => "return".to_string(),
                Step::Exit => "exit".to_string(),
                Step::Fused(f) => format!("fused ({} items) -> {:?}", f.plan.len(), f.next),
                Step::Dead => "dead".to_string(),
            };
            let _ = writeln!(out, "{:04} {}", id, line);
        }
        out
    }
}
