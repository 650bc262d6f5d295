use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use sage_common::Result;
use sage_ast::{new_env, Arg, Block, Builtin, Env, Expr, IfArm, Scope, Statement, SwitchArm, Value};
use sage_vm::{Interpreter, Outcome};

fn expr<F>(f: F) -> Expr
where
    F: Fn(&mut Scope) -> Result<Value> + 'static,
{
    Expr::new(f)
}

fn local_int(scope: &Scope, name: &str) -> i64 {
    match scope.local.get(name) {
        Some(Value::Int(i)) => *i,
        _ => 0,
    }
}

fn set_local(name: &'static str, value: i64) -> Statement {
    Statement::Expr {
        expr: expr(move |s| {
            s.local.insert(name.to_string(), Value::Int(value));
            Ok(Value::Null)
        }),
        await_result: false,
    }
}

fn return_local(name: &'static str) -> Statement {
    Statement::Return {
        value: Some(Arg::Expr(expr(move |s| Ok(Value::Int(local_int(s, name)))))),
    }
}

fn empty_env() -> Env {
    new_env(HashMap::new())
}

/// Records every invocation of a built-in: (parameters, env contents).
type CallLog = Rc<RefCell<Vec<(HashMap<String, Value>, HashMap<String, Value>)>>>;

fn recording_builtin() -> (Builtin, CallLog) {
    let log: CallLog = Rc::new(RefCell::new(Vec::new()));
    let inner = log.clone();
    let builtin = Builtin::new(move |params, env| {
        inner.borrow_mut().push((params.clone(), env.borrow().clone()));
        Ok(Value::Null)
    });
    (builtin, log)
}

fn interp_with_echo(globals: Vec<(String, Block)>) -> (Interpreter, CallLog) {
    let (echo, log) = recording_builtin();
    let mut builtins = HashMap::new();
    builtins.insert("echo".to_string(), echo);
    let interp = Interpreter::new(builtins, globals).expect("interpreter");
    (interp, log)
}

#[test]
fn empty_program_returns_null_without_exiting() {
    let (interp, _) = interp_with_echo(vec![]);
    let out = interp.exec(&vec![], HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Null));
}

#[test]
fn builtin_call_sees_parameters_and_env() {
    let (interp, log) = interp_with_echo(vec![]);
    let program: Block = vec![Statement::Call {
        name: "echo".into(),
        params: vec![(
            "text".into(),
            Arg::Expr(expr(|s| Ok(s.args.get("test").cloned().unwrap_or(Value::Null)))),
        )],
        built_in: true,
        is_async: false,
    }];
    let env = new_env(HashMap::from([("prefix".to_string(), Value::Str("test".into()))]));
    let mut params = HashMap::new();
    params.insert("test".to_string(), Value::Str("hello".into()));

    let out = interp.exec(&program, params, env).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Null));

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0.get("text"), Some(&Value::Str("hello".into())));
    assert_eq!(log[0].1.get("prefix"), Some(&Value::Str("test".into())));
}

fn counting_loop(noop_call: Option<Statement>, iterations: Rc<RefCell<i64>>) -> Block {
    let tally = iterations;
    let mut body: Block = Vec::new();
    if let Some(call) = noop_call {
        body.push(call);
    }
    body.push(Statement::Expr {
        expr: expr(move |s| {
            let k = local_int(s, "k") + local_int(s, "i");
            s.local.insert("k".to_string(), Value::Int(k));
            *tally.borrow_mut() += 1;
            Ok(Value::Null)
        }),
        await_result: false,
    });
    vec![
        set_local("k", 0),
        Statement::Loop {
            init: Some(expr(|s| {
                s.local.insert("i".to_string(), Value::Int(0));
                Ok(Value::Null)
            })),
            cond: Some(expr(|s| Ok(Value::Bool(local_int(s, "i") < 10)))),
            iter: Some(expr(|s| {
                let i = local_int(s, "i") + 1;
                s.local.insert("i".to_string(), Value::Int(i));
                Ok(Value::Null)
            })),
            label: None,
            body,
            skip_initial_check: false,
        },
        return_local("k"),
    ]
}

#[test]
fn counting_loop_runs_the_body_exactly_n_times() {
    let (interp, _) = interp_with_echo(vec![]);
    let iterations = Rc::new(RefCell::new(0));
    let program = counting_loop(None, iterations.clone());
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Int(45)));
    assert_eq!(*iterations.borrow(), 10);
}

#[test]
fn counting_loop_with_a_call_boundary_matches_the_fused_form() {
    // a global-function call in the body keeps every loop piece a separate
    // step; semantics must not change
    let (interp, log) = interp_with_echo(vec![("noop".to_string(), vec![])]);
    let iterations = Rc::new(RefCell::new(0));
    let call = Statement::Call { name: "noop".into(), params: vec![], built_in: false, is_async: false };
    let program = counting_loop(Some(call), iterations.clone());
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Int(45)));
    assert_eq!(*iterations.borrow(), 10);
    assert!(log.borrow().is_empty());
}

#[test]
fn do_while_runs_once_when_the_condition_starts_false() {
    let (interp, _) = interp_with_echo(vec![]);
    let iterations = Rc::new(RefCell::new(0));
    let tally = iterations.clone();
    let program: Block = vec![Statement::Loop {
        init: None,
        cond: Some(expr(|_| Ok(Value::Bool(false)))),
        iter: None,
        label: None,
        body: vec![Statement::Expr {
            expr: expr(move |_| {
                *tally.borrow_mut() += 1;
                Ok(Value::Null)
            }),
            await_result: false,
        }],
        skip_initial_check: true,
    }];
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Null));
    assert_eq!(*iterations.borrow(), 1);
}

#[test]
fn do_while_runs_once_across_step_boundaries_too() {
    let (interp, _) = interp_with_echo(vec![("noop".to_string(), vec![])]);
    let iterations = Rc::new(RefCell::new(0));
    let tally = iterations.clone();
    let program: Block = vec![Statement::Loop {
        init: None,
        cond: Some(expr(|_| Ok(Value::Bool(false)))),
        iter: None,
        label: None,
        body: vec![
            Statement::Call { name: "noop".into(), params: vec![], built_in: false, is_async: false },
            Statement::Expr {
                expr: expr(move |_| {
                    *tally.borrow_mut() += 1;
                    Ok(Value::Null)
                }),
                await_result: false,
            },
        ],
        skip_initial_check: true,
    }];
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Null));
    assert_eq!(*iterations.borrow(), 1);
}

fn nested_break_program(inner_extra: Option<Statement>, hits: Rc<RefCell<Vec<(i64, i64)>>>) -> Block {
    let record = hits;
    let mut inner_body: Block = Vec::new();
    if let Some(call) = inner_extra {
        inner_body.push(call);
    }
    inner_body.push(Statement::If {
        arms: vec![IfArm {
            cond: expr(|s| Ok(Value::Bool(local_int(s, "i") * local_int(s, "j") == 6))),
            body: vec![
                Statement::Expr {
                    expr: expr(move |s| {
                        record.borrow_mut().push((local_int(s, "i"), local_int(s, "j")));
                        Ok(Value::Null)
                    }),
                    await_result: false,
                },
                Statement::Break { label: Some("L".into()) },
            ],
        }],
        otherwise: None,
    });
    vec![
        Statement::Loop {
            init: Some(expr(|s| {
                s.local.insert("i".to_string(), Value::Int(1));
                Ok(Value::Null)
            })),
            cond: Some(expr(|s| Ok(Value::Bool(local_int(s, "i") <= 3)))),
            iter: Some(expr(|s| {
                let i = local_int(s, "i") + 1;
                s.local.insert("i".to_string(), Value::Int(i));
                Ok(Value::Null)
            })),
            label: Some("L".into()),
            body: vec![Statement::Loop {
                init: Some(expr(|s| {
                    s.local.insert("j".to_string(), Value::Int(1));
                    Ok(Value::Null)
                })),
                cond: Some(expr(|s| Ok(Value::Bool(local_int(s, "j") <= 3)))),
                iter: Some(expr(|s| {
                    let j = local_int(s, "j") + 1;
                    s.local.insert("j".to_string(), Value::Int(j));
                    Ok(Value::Null)
                })),
                label: None,
                body: inner_body,
                skip_initial_check: false,
            }],
            skip_initial_check: false,
        },
        set_local("after", 1),
        return_local("after"),
    ]
}

#[test]
fn labelled_break_leaves_both_loops() {
    let (interp, _) = interp_with_echo(vec![]);
    let hits = Rc::new(RefCell::new(Vec::new()));
    let program = nested_break_program(None, hits.clone());
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    // control reached the statement after the outer loop
    assert_eq!(out, Outcome::Completed(Value::Int(1)));
    assert_eq!(*hits.borrow(), vec![(2, 3)]);
}

#[test]
fn labelled_break_escapes_a_fused_region() {
    // the call boundary in the inner body forces the break to leave its
    // fused step with a move opcode instead of unwinding structurally
    let (interp, _) = interp_with_echo(vec![("noop".to_string(), vec![])]);
    let hits = Rc::new(RefCell::new(Vec::new()));
    let call = Statement::Call { name: "noop".into(), params: vec![], built_in: false, is_async: false };
    let program = nested_break_program(Some(call), hits.clone());
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Int(1)));
    assert_eq!(*hits.borrow(), vec![(2, 3)]);
}

fn continue_program(noop_call: Option<Statement>, evens: Rc<RefCell<i64>>) -> Block {
    let tally = evens;
    let mut body: Block = Vec::new();
    if let Some(call) = noop_call {
        body.push(call);
    }
    body.push(Statement::If {
        arms: vec![IfArm {
            cond: expr(|s| Ok(Value::Bool(local_int(s, "i") % 2 == 1))),
            body: vec![Statement::Continue],
        }],
        otherwise: None,
    });
    body.push(Statement::Expr {
        expr: expr(move |_| {
            *tally.borrow_mut() += 1;
            Ok(Value::Null)
        }),
        await_result: false,
    });
    vec![
        Statement::Loop {
            init: Some(expr(|s| {
                s.local.insert("i".to_string(), Value::Int(0));
                Ok(Value::Null)
            })),
            cond: Some(expr(|s| Ok(Value::Bool(local_int(s, "i") < 5)))),
            iter: Some(expr(|s| {
                let i = local_int(s, "i") + 1;
                s.local.insert("i".to_string(), Value::Int(i));
                Ok(Value::Null)
            })),
            label: None,
            body,
            skip_initial_check: false,
        },
        Statement::Return { value: None },
    ]
}

#[test]
fn continue_skips_to_the_next_iteration() {
    let (interp, _) = interp_with_echo(vec![]);
    let evens = Rc::new(RefCell::new(0));
    let program = continue_program(None, evens.clone());
    interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(*evens.borrow(), 3);
}

#[test]
fn continue_still_runs_the_iterator_across_step_boundaries() {
    let (interp, _) = interp_with_echo(vec![("noop".to_string(), vec![])]);
    let evens = Rc::new(RefCell::new(0));
    let call = Statement::Call { name: "noop".into(), params: vec![], built_in: false, is_async: false };
    let program = continue_program(Some(call), evens.clone());
    interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(*evens.borrow(), 3);
}

fn switch_program(x: i64) -> Block {
    vec![
        set_local("k", 0),
        Statement::Expr {
            expr: expr(move |s| {
                s.local.insert("x".to_string(), Value::Int(x));
                Ok(Value::Null)
            }),
            await_result: false,
        },
        Statement::Switch {
            pattern: expr(|s| Ok(Value::Int(local_int(s, "x") % 3))),
            arms: vec![
                SwitchArm {
                    value: expr(|_| Ok(Value::Int(0))),
                    body: vec![Statement::Expr {
                        expr: expr(|s| {
                            let k = local_int(s, "k") + 1;
                            s.local.insert("k".to_string(), Value::Int(k));
                            Ok(Value::Null)
                        }),
                        await_result: false,
                    }],
                },
                SwitchArm {
                    value: expr(|_| Ok(Value::Int(1))),
                    body: vec![Statement::Expr {
                        expr: expr(|s| {
                            let k = local_int(s, "k") + 2;
                            s.local.insert("k".to_string(), Value::Int(k));
                            Ok(Value::Null)
                        }),
                        await_result: false,
                    }],
                },
            ],
            otherwise: None,
        },
        return_local("k"),
    ]
}

#[test]
fn switch_takes_the_first_match_without_fallthrough() {
    let (interp, _) = interp_with_echo(vec![]);
    let out = interp.exec(&switch_program(4), HashMap::new(), empty_env()).unwrap();
    // 4 % 3 == 1: only the second arm runs
    assert_eq!(out, Outcome::Completed(Value::Int(2)));
}

#[test]
fn switch_without_a_match_falls_out_unchanged() {
    let (interp, _) = interp_with_echo(vec![]);
    let out = interp.exec(&switch_program(8), HashMap::new(), empty_env()).unwrap();
    // 8 % 3 == 2: no arm, no otherwise
    assert_eq!(out, Outcome::Completed(Value::Int(0)));
}

#[test]
fn switch_equality_is_strict() {
    let (interp, _) = interp_with_echo(vec![]);
    let program: Block = vec![
        set_local("k", 0),
        Statement::Switch {
            pattern: expr(|_| Ok(Value::Num(2.0))),
            arms: vec![SwitchArm {
                value: expr(|_| Ok(Value::Int(2))),
                body: vec![set_local("k", 1)],
            }],
            otherwise: None,
        },
        return_local("k"),
    ];
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Int(0)));
}

#[test]
fn if_takes_the_first_truthy_arm() {
    let (interp, _) = interp_with_echo(vec![]);
    let program: Block = vec![
        Statement::If {
            arms: vec![
                IfArm { cond: expr(|_| Ok(Value::Bool(false))), body: vec![set_local("k", 1)] },
                IfArm { cond: expr(|_| Ok(Value::Int(7))), body: vec![set_local("k", 2)] },
                IfArm { cond: expr(|_| Ok(Value::Bool(true))), body: vec![set_local("k", 3)] },
            ],
            otherwise: Some(vec![set_local("k", 4)]),
        },
        return_local("k"),
    ];
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Int(2)));
}

#[test]
fn if_falls_back_to_otherwise() {
    let (interp, _) = interp_with_echo(vec![]);
    let program: Block = vec![
        Statement::If {
            arms: vec![IfArm { cond: expr(|_| Ok(Value::Str(String::new()))), body: vec![set_local("k", 1)] }],
            otherwise: Some(vec![set_local("k", 9)]),
        },
        return_local("k"),
    ];
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Int(9)));
}

#[test]
fn global_call_discards_the_callee_return_value() {
    let double: Block = vec![Statement::Return { value: Some(Arg::Value(Value::Int(99))) }];
    let (interp, _) = interp_with_echo(vec![("double".to_string(), double)]);
    let program: Block = vec![
        Statement::Call { name: "double".into(), params: vec![], built_in: false, is_async: false },
        Statement::Return { value: Some(Arg::Value(Value::Int(1))) },
    ];
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Int(1)));
}

#[test]
fn global_call_evaluates_parameters_in_the_caller_scope() {
    // double(x) echoes x * 2
    let double: Block = vec![Statement::Call {
        name: "echo".into(),
        params: vec![(
            "text".into(),
            Arg::Expr(expr(|s| match s.args.get("x") {
                Some(Value::Int(x)) => Ok(Value::Int(x * 2)),
                other => panic!("missing x argument: {:?}", other),
            })),
        )],
        built_in: true,
        is_async: false,
    }];
    let (interp, log) = interp_with_echo(vec![("double".to_string(), double)]);
    let program: Block = vec![Statement::Call {
        name: "double".into(),
        params: vec![("x".into(), Arg::Value(Value::Int(3)))],
        built_in: false,
        is_async: false,
    }];
    let out = interp.exec(&program, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Completed(Value::Null));
    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0.get("text"), Some(&Value::Int(6)));
}

#[test]
fn exit_unwinds_every_call_frame() {
    let ran: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let mark = |tag: &'static str, ran: &Rc<RefCell<Vec<&'static str>>>| {
        let ran = ran.clone();
        Statement::Expr {
            expr: expr(move |_| {
                ran.borrow_mut().push(tag);
                Ok(Value::Null)
            }),
            await_result: false,
        }
    };
    let h: Block = vec![Statement::Exit];
    let g: Block = vec![
        Statement::Call { name: "h".into(), params: vec![], built_in: false, is_async: false },
        mark("g-after", &ran),
    ];
    let main: Block = vec![
        Statement::Call { name: "g".into(), params: vec![], built_in: false, is_async: false },
        mark("main-after", &ran),
        Statement::Return { value: Some(Arg::Value(Value::Int(1))) },
    ];
    let (interp, _) = interp_with_echo(vec![("h".to_string(), h), ("g".to_string(), g)]);
    let out = interp.exec(&main, HashMap::new(), empty_env()).unwrap();
    assert_eq!(out, Outcome::Exited);
    assert!(ran.borrow().is_empty(), "statements after the call ran: {:?}", ran.borrow());
}

#[test]
fn unknown_global_function_is_fatal_at_dispatch() {
    let (interp, _) = interp_with_echo(vec![]);
    let program: Block = vec![Statement::Call {
        name: "missing".into(),
        params: vec![],
        built_in: false,
        is_async: false,
    }];
    let err = interp.exec(&program, HashMap::new(), empty_env()).unwrap_err();
    assert!(err.0.contains("unknown function 'missing'"), "unexpected error: {}", err);
}

#[test]
fn expression_errors_propagate_out_of_exec() {
    let (interp, _) = interp_with_echo(vec![]);
    let program: Block = vec![Statement::Expr {
        expr: expr(|_| Err(sage_common::SageError("boom".into()))),
        await_result: false,
    }];
    let err = interp.exec(&program, HashMap::new(), empty_env()).unwrap_err();
    assert!(err.0.contains("boom"));
}

#[test]
fn builtin_lookup_reports_the_save_relevant_flag() {
    let mut builtins = HashMap::new();
    builtins.insert("persist".to_string(), Builtin::save_relevant(|_, _| Ok(Value::Null)));
    builtins.insert("echo".to_string(), Builtin::new(|_, _| Ok(Value::Null)));
    let interp = Interpreter::new(builtins, vec![]).unwrap();
    assert!(interp.builtin("persist").unwrap().save_relevant);
    assert!(!interp.builtin("echo").unwrap().save_relevant);
    assert!(interp.builtin("ghost").is_err());
}
