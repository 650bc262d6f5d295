//! Step and fused-plan execution: one step in, one opcode out.
use std::collections::HashMap;

use sage_common::{Result, SageError};
use sage_ast::{is_truthy, Arg, Scope, Value};
use sage_program::{Fused, Opcode, Plan, PlanLoop, Step};

/// Evaluate a call's parameter list against the caller's scope: literals
/// pass through, callables are invoked, in declaration order.
pub fn eval_params(params: &[(String, Arg)], scope: &mut Scope) -> Result<HashMap<String, Value>> {
    let mut out = HashMap::with_capacity(params.len());
    for (name, arg) in params {
        let v = eval_arg(arg, scope)?;
        out.insert(name.clone(), v);
    }
    Ok(out)
}

fn eval_arg(arg: &Arg, scope: &mut Scope) -> Result<Value> {
    match arg {
        Arg::Value(v) => Ok(v.clone()),
        Arg::Expr(e) => e.eval(scope),
    }
}

fn eval_return(value: &Option<Arg>, scope: &mut Scope) -> Result<Value> {
    match value {
        Some(arg) => eval_arg(arg, scope),
        None => Ok(Value::Null),
    }
}

/// Execute a single step against a scope.
pub fn run_step(step: &Step, scope: &mut Scope) -> Result<Opcode> {
    match step {
        Step::Expr { expr, next } => {
            expr.eval(scope)?;
            Ok(Opcode::Move(*next))
        }
        Step::Builtin { builtin, params, next, .. } => {
            let params = eval_params(params, scope)?;
            builtin.call(&params, &scope.env)?;
            Ok(Opcode::Move(*next))
        }
        Step::ExternCall { name, params, next } => {
            let params = eval_params(params, scope)?;
            Ok(Opcode::Call { name: name.clone(), params, next: *next })
        }
        Step::If { arms, otherwise, next } => {
            for (cond, target) in arms {
                if is_truthy(&cond.eval(scope)?) {
                    return Ok(Opcode::Move(*target));
                }
            }
            Ok(Opcode::Move(otherwise.unwrap_or(*next)))
        }
        Step::Switch { pattern, arms, otherwise, next } => {
            let pattern = pattern.eval(scope)?;
            for (value, target) in arms {
                if value.eval(scope)? == pattern {
                    return Ok(Opcode::Move(*target));
                }
            }
            Ok(Opcode::Move(otherwise.unwrap_or(*next)))
        }
        Step::LoopHead { cond, body, next } => {
            let enter = match cond {
                Some(c) => is_truthy(&c.eval(scope)?),
                None => true,
            };
            Ok(Opcode::Move(if enter { *body } else { *next }))
        }
        Step::LoopEntry { init, target } => {
            if let Some(init) = init {
                init.eval(scope)?;
            }
            Ok(Opcode::Move(*target))
        }
        Step::Iterate { iter, head } => {
            iter.eval(scope)?;
            Ok(Opcode::Move(*head))
        }
        Step::Jump { next } => Ok(Opcode::Move(*next)),
        Step::Return { value } => Ok(Opcode::Return(eval_return(value, scope)?)),
        Step::Exit => Ok(Opcode::Exit),
        Step::Fused(fused) => run_fused(fused, scope),
        Step::Dead => Err(SageError("program counter inside a fused run".into())),
    }
}

// Control flowing through a fused plan. Break and continue are consumed by
// the enclosing plan loop; an opcode ends the fused step.
enum Flow {
    Next,
    Break(Option<String>),
    Continue,
    Op(Opcode),
}

fn run_fused(fused: &Fused, scope: &mut Scope) -> Result<Opcode> {
    match run_seq(&fused.plan, scope)? {
        Flow::Next => match fused.next {
            Some(next) => Ok(Opcode::Move(next)),
            None => Err(SageError("fused step fell through".into())),
        },
        Flow::Op(op) => Ok(op),
        Flow::Break(_) | Flow::Continue => Err(SageError("jump escaped fused step".into())),
    }
}

fn run_seq(items: &[Plan], scope: &mut Scope) -> Result<Flow> {
    for item in items {
        match run_plan(item, scope)? {
            Flow::Next => {}
            diverted => return Ok(diverted),
        }
    }
    Ok(Flow::Next)
}

fn run_plan(item: &Plan, scope: &mut Scope) -> Result<Flow> {
    match item {
        Plan::Eval(expr) => {
            expr.eval(scope)?;
            Ok(Flow::Next)
        }
        Plan::Builtin { builtin, params, .. } => {
            let params = eval_params(params, scope)?;
            builtin.call(&params, &scope.env)?;
            Ok(Flow::Next)
        }
        Plan::If { arms, otherwise } => {
            for (cond, body) in arms {
                if is_truthy(&cond.eval(scope)?) {
                    return run_seq(body, scope);
                }
            }
            match otherwise {
                Some(body) => run_seq(body, scope),
                None => Ok(Flow::Next),
            }
        }
        Plan::Switch { pattern, arms, otherwise } => {
            let pattern = pattern.eval(scope)?;
            for (value, body) in arms {
                if value.eval(scope)? == pattern {
                    return run_seq(body, scope);
                }
            }
            match otherwise {
                Some(body) => run_seq(body, scope),
                None => Ok(Flow::Next),
            }
        }
        Plan::Loop(l) => run_loop(l, scope),
        Plan::Break(label) => Ok(Flow::Break(label.clone())),
        Plan::Continue => Ok(Flow::Continue),
        Plan::Move(id) => Ok(Flow::Op(Opcode::Move(*id))),
        Plan::Return(value) => Ok(Flow::Op(Opcode::Return(eval_return(value, scope)?))),
        Plan::Exit => Ok(Flow::Op(Opcode::Exit)),
    }
}

fn run_loop(l: &PlanLoop, scope: &mut Scope) -> Result<Flow> {
    if let Some(init) = &l.init {
        init.eval(scope)?;
    }
    let mut first = true;
    loop {
        if !(first && l.skip_initial) {
            if let Some(cond) = &l.cond {
                if !is_truthy(&cond.eval(scope)?) {
                    return Ok(Flow::Next);
                }
            }
        }
        first = false;
        match run_seq(&l.body, scope)? {
            // continue falls through to the iterator, like a completed body
            Flow::Next | Flow::Continue => {}
            Flow::Break(None) => return Ok(Flow::Next),
            Flow::Break(Some(label)) => {
                if l.label.as_deref() == Some(label.as_str()) {
                    return Ok(Flow::Next);
                }
                return Ok(Flow::Break(Some(label)));
            }
            op @ Flow::Op(_) => return Ok(op),
        }
        if let Some(iter) = &l.iter {
            iter.eval(scope)?;
        }
    }
}
