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

//! Frame-based stepping engine with calls between global functions, exit
//! unwinding, and snapshot capture/restore at step boundaries.
use std::collections::HashMap;
use std::rc::Rc;

use sage_common::{Result, SageError};
use sage_ast::{Block, Builtin, Env, Scope, Value};
use sage_program::{FrameState, Opcode, Program, Snapshot};

pub mod stepper;
use stepper::run_step;

pub const PC_RETURN: i64 = -1;
pub const PC_EXIT: i64 = -2;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Value),
    Exited,
}

#[derive(Debug)]
pub struct Executable {
    pub name: Option<String>,
    pub program: Program,
}

impl Executable {
    pub fn step_node(&self, id: usize, scope: &mut Scope) -> Result<Opcode> {
        let step = self
            .program
            .step(id)
            .ok_or_else(|| SageError(format!("step id {} out of range", id)))?;
        run_step(step, scope)
    }

    pub fn exec(
        self: Rc<Self>,
        interp: &Interpreter,
        params: HashMap<String, Value>,
        env: Env,
    ) -> Result<Outcome> {
        ExecContext::new(interp, self, params, env).run()
    }
}

/// One in-flight call: a program, the id of its next step, and the frame's
/// scope. Between steps this is a complete description of the invocation.
#[derive(Debug)]
pub struct Frame {
    pub exe: Rc<Executable>,
    pub pc: i64,
    pub scope: Scope,
}

#[derive(Debug)]
pub struct ExecContext<'a> {
    interp: &'a Interpreter,
    env: Env,
    stack: Vec<Frame>,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        interp: &'a Interpreter,
        exe: Rc<Executable>,
        params: HashMap<String, Value>,
        env: Env,
    ) -> Self {
        let scope = Scope::new(params, env.clone());
        Self { interp, env, stack: vec![Frame { exe, pc: 0, scope }] }
    }

    fn top(&mut self) -> &mut Frame {
        self.stack.last_mut().expect("no frame")
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.stack
    }

    pub fn run(&mut self) -> Result<Outcome> {
        loop {
            if let Some(outcome) = self.step_once()? {
                return Ok(outcome);
            }
        }
    }

    /// Execute one step of the innermost frame and dispatch its opcode.
    /// Sentinel transitions settle before this returns, so between calls
    /// every live frame sits at a step boundary (`pc >= 0`).
    pub fn step_once(&mut self) -> Result<Option<Outcome>> {
        if self.stack.is_empty() {
            return Err(SageError("execution already finished".into()));
        }
        let op = {
            let frame = self.top();
            let exe = frame.exe.clone();
            exe.step_node(frame.pc as usize, &mut frame.scope)?
        };
        match op {
            Opcode::Move(next) => {
                self.top().pc = next as i64;
            }
            Opcode::Call { name, params, next } => {
                // advance past the call site first, so the state visible
                // while the callee runs resumes after the call
                self.top().pc = next as i64;
                let callee = self.interp.global(&name)?;
                let scope = Scope::new(params, self.env.clone());
                self.stack.push(Frame { exe: callee, pc: 0, scope });
            }
            Opcode::Return(value) => {
                self.top().pc = PC_RETURN;
                self.stack.pop();
                // callee return values are not observable at the call site
                if self.stack.is_empty() {
                    return Ok(Some(Outcome::Completed(value)));
                }
            }
            Opcode::Exit => {
                // exit unwinds every ancestor frame
                self.top().pc = PC_EXIT;
                self.stack.clear();
                return Ok(Some(Outcome::Exited));
            }
        }
        Ok(None)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            frames: self
                .stack
                .iter()
                .map(|f| FrameState {
                    function: f.exe.name.clone(),
                    pc: f.pc,
                    args: f.scope.args.clone(),
                    local: f.scope.local.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a context from a snapshot. `entry` is the recompiled
    /// executable for frames with no function name. Refuses frames whose
    /// program counter is not a step boundary.
    pub fn restore(
        interp: &'a Interpreter,
        entry: Rc<Executable>,
        env: Env,
        snapshot: &Snapshot,
    ) -> Result<Self> {
        if snapshot.frames.is_empty() {
            return Err(SageError("snapshot has no frames".into()));
        }
        let mut stack = Vec::with_capacity(snapshot.frames.len());
        for fs in &snapshot.frames {
            let exe = match &fs.function {
                Some(name) => interp.global(name)?,
                None => entry.clone(),
            };
            if fs.pc < 0 || !exe.program.is_boundary(fs.pc as usize) {
                return Err(SageError(format!("snapshot pc {} is not a step boundary", fs.pc)));
            }
            let mut scope = Scope::new(fs.args.clone(), env.clone());
            scope.local = fs.local.clone();
            stack.push(Frame { exe, pc: fs.pc, scope });
        }
        Ok(Self { interp, env, stack })
    }
}

#[derive(Debug)]
pub struct Interpreter {
    builtins: HashMap<String, Builtin>,
    globals: HashMap<String, Rc<Executable>>,
}

impl Interpreter {
    pub fn new(builtins: HashMap<String, Builtin>, globals: Vec<(String, Block)>) -> Result<Self> {
        let mut interp = Self { builtins, globals: HashMap::new() };
        for (name, block) in globals {
            let program = sage_compiler::compile(&block, &interp.builtins)?;
            let exe = Rc::new(Executable { name: Some(name.clone()), program });
            interp.globals.insert(name, exe);
        }
        Ok(interp)
    }

    pub fn builtin(&self, name: &str) -> Result<&Builtin> {
        self.builtins
            .get(name)
            .ok_or_else(|| SageError(format!("unknown builtin function '{}'", name)))
    }

    pub fn global(&self, name: &str) -> Result<Rc<Executable>> {
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| SageError(format!("unknown function '{}'", name)))
    }

    pub fn compile(&self, block: &Block) -> Result<Executable> {
        let program = sage_compiler::compile(block, &self.builtins)?;
        Ok(Executable { name: None, program })
    }

    pub fn exec(
        &self,
        block: &Block,
        params: HashMap<String, Value>,
        env: Env,
    ) -> Result<Outcome> {
        let exe = Rc::new(self.compile(block)?);
        exe.exec(self, params, env)
    }
}
