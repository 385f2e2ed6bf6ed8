use super::*;
use crate::language::{
    compiler::Compiler,
    desugar::desugar_program,
    ir::{Builder, IrType, Module},
    parser::parse_program,
};
use indoc::indoc;

fn compile(source: &str) -> Module {
    let program = parse_program(source).expect("parse");
    let checked = desugar_program(&program).expect("desugar");
    Compiler::default()
        .compile_program(&checked)
        .expect("lower")
}

fn interpreter(source: &str, options: RunOptions) -> Interpreter {
    Interpreter::new(compile(source), options)
}

fn count(events: &[Event], wanted: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|event| wanted(event)).count()
}

const RANGE_SUM: &str = indoc! {"
    coro range(from, n) -> generator {
        let i = from;
        while i < n {
            co_yield i;
            i = i + 1;
        }
    }

    fn main() {
        let g = range(1, 20);
        let sum = 0;
        while resume(g) {
            sum = sum + promise(g);
        }
        destroy(g);
        return sum;
    }
"};

#[test]
fn generator_yields_every_value() {
    let mut machine = interpreter(RANGE_SUM, RunOptions::default());
    assert_eq!(machine.run_main(), Ok(190));

    let events = machine.events();
    let suspends = count(events, |event| {
        matches!(event, Event::Suspend { is_final: false, .. })
    });
    // Initial suspend plus one per yield.
    assert_eq!(suspends, 20);
    assert_eq!(
        count(events, |event| matches!(event, Event::Suspend { is_final: true, .. })),
        1
    );
    assert_eq!(count(events, |event| matches!(event, Event::Alloc { .. })), 1);
    assert_eq!(
        count(events, |event| matches!(event, Event::Free { object: Some(_) })),
        1
    );
    assert_eq!(count(events, |event| matches!(event, Event::Teardown { .. })), 1);
}

#[test]
fn elided_frames_are_never_freed() {
    let options = RunOptions {
        storage: FrameStorage::Elided,
        ..RunOptions::default()
    };
    let mut machine = interpreter(RANGE_SUM, options);
    assert_eq!(machine.run_main(), Ok(190));

    let events = machine.events();
    assert_eq!(count(events, |event| matches!(event, Event::Alloc { .. })), 0);
    assert_eq!(count(events, |event| matches!(event, Event::Free { .. })), 0);
    assert_eq!(
        count(events, |event| matches!(event, Event::FrameBegin { heap: false, .. })),
        1
    );
    assert_eq!(count(events, |event| matches!(event, Event::Teardown { .. })), 1);
}

#[test]
fn empty_lazy_coroutine_suspends_twice() {
    let mut machine = interpreter(
        indoc! {"
            coro idle() -> lazy { }

            fn main() {
                let t = idle();
                resume(t);
                let finished = done(t);
                destroy(t);
                return finished;
            }
        "},
        RunOptions::default(),
    );
    assert_eq!(machine.run_main(), Ok(1));
    let events = machine.events();
    let suspends: Vec<bool> = events
        .iter()
        .filter_map(|event| match event {
            Event::Suspend { is_final, .. } => Some(*is_final),
            _ => None,
        })
        .collect();
    assert_eq!(suspends, vec![false, true]);
    assert_eq!(count(events, |event| matches!(event, Event::Teardown { .. })), 1);
}

#[test]
fn task_runs_eagerly_to_its_final_suspend() {
    let mut machine = interpreter(
        indoc! {"
            coro double(x) -> task {
                co_return x * 2;
            }
        "},
        RunOptions::default(),
    );
    let handle = machine.start("double", &[RtValue::Int(21)]).expect("start");
    assert_eq!(machine.done(handle), Ok(true));
    assert_eq!(machine.promise_result(handle), Ok(42));
    assert_eq!(
        machine.resume(handle),
        Err(RuntimeError::ResumeAfterFinal {
            frame: handle.frame().0
        })
    );
    machine.destroy(handle).expect("destroy");
    assert!(machine.is_torn_down(handle));
}

#[test]
fn awaited_operand_is_evaluated_once() {
    let mut machine = interpreter(
        indoc! {"
            coro t() -> lazy {
                let a = co_await trace(0);
                let b = co_await trace(5);
                co_return a + b + 1;
            }
        "},
        RunOptions::default(),
    );
    let handle = machine.start("t", &[]).expect("start");
    assert!(machine.resume(handle).expect("runs to first await"));
    assert!(!machine.resume(handle).expect("runs to final"));
    assert_eq!(machine.promise_result(handle), Ok(6));

    let events = machine.events();
    assert_eq!(count(events, |event| *event == Event::Trace { value: 0 }), 1);
    assert_eq!(count(events, |event| *event == Event::Trace { value: 5 }), 1);
    // init, the unready await, final
    assert_eq!(count(events, |event| matches!(event, Event::Suspend { .. })), 3);
}

#[test]
fn exception_in_body_runs_cleanups_and_tears_down() {
    let mut machine = interpreter(
        indoc! {"
            coro t() -> lazy {
                defer trace(1);
                throw(9);
                co_return 0;
            }
        "},
        RunOptions::default(),
    );
    let handle = machine.start("t", &[]).expect("start");
    machine.take_events();

    let err = machine.resume(handle).expect_err("body throws");
    assert_eq!(err, RuntimeError::UncaughtException { value: 9 });
    let frame = handle.frame();
    assert_eq!(
        machine.take_events(),
        vec![
            Event::Resume { frame },
            Event::Throw { value: 9 },
            Event::Trace { value: 1 },
            Event::Free {
                object: Some(frame)
            },
            Event::Teardown { frame },
        ]
    );
    assert!(machine.is_torn_down(handle));
    assert_eq!(
        machine.destroy(handle),
        Err(RuntimeError::FrameDestroyed { frame: frame.0 })
    );
}

#[test]
fn throwing_host_functions_unwind_the_ramp() {
    let options = RunOptions {
        throwing: ["malloc".to_string()].into_iter().collect(),
        ..RunOptions::default()
    };
    let mut machine = interpreter("coro idle() -> lazy { }", options);
    assert_eq!(
        machine.call("idle", &[]),
        Err(RuntimeError::UncaughtException { value: -1 })
    );
    assert_eq!(
        count(machine.events(), |event| matches!(event, Event::FrameBegin { .. })),
        0
    );
}

#[test]
fn eager_body_throwing_in_the_ramp_releases_the_frame() {
    let mut machine = interpreter(
        indoc! {"
            coro t(x) -> task {
                defer trace(x);
                throw(4);
                co_return x;
            }
        "},
        RunOptions::default(),
    );
    assert_eq!(
        machine.call("t", &[RtValue::Int(8)]),
        Err(RuntimeError::UncaughtException { value: 4 })
    );

    let events = machine.events();
    assert_eq!(count(events, |event| matches!(event, Event::FrameBegin { .. })), 1);
    assert_eq!(count(events, |event| *event == Event::Trace { value: 8 }), 1);
    assert_eq!(count(events, |event| matches!(event, Event::Free { object: Some(_) })), 1);
    assert_eq!(count(events, |event| matches!(event, Event::Teardown { .. })), 1);
    assert_eq!(count(events, |event| matches!(event, Event::Resume { .. })), 0);
    assert_eq!(count(events, |event| matches!(event, Event::Suspend { .. })), 0);
}

#[test]
fn destroyed_frames_cannot_be_resumed() {
    let mut machine = interpreter(RANGE_SUM, RunOptions::default());
    let handle = machine.start("range", &[RtValue::Int(0), RtValue::Int(3)]).expect("start");
    assert!(machine.resume(handle).expect("resume"));
    machine.destroy(handle).expect("destroy");
    assert_eq!(
        machine.resume(handle),
        Err(RuntimeError::FrameDestroyed {
            frame: handle.frame().0
        })
    );
    assert_eq!(machine.done(handle), Ok(true));
    assert!(matches!(
        machine.promise_value(handle),
        Err(RuntimeError::UseAfterTeardown { .. })
    ));
}

#[test]
fn plain_values_are_not_handles() {
    let mut machine = interpreter(
        indoc! {"
            fn main() {
                return resume(3);
            }
        "},
        RunOptions::default(),
    );
    assert_eq!(machine.run_main(), Err(RuntimeError::InvalidHandle));
}

#[test]
fn step_limit_stops_runaway_loops() {
    let options = RunOptions {
        step_limit: 100,
        ..RunOptions::default()
    };
    let mut machine = interpreter("fn main() { while 1 { } return 0; }", options);
    assert_eq!(machine.run_main(), Err(RuntimeError::StepLimit { limit: 100 }));
}

#[test]
fn double_free_is_detected() {
    let mut builder = Builder::new("main", &[], IrType::I64);
    let size = builder.build_const(8, IrType::I64);
    let memory = builder
        .build_call("malloc", vec![size], IrType::Ptr)
        .expect("pointer");
    builder.build_call("free", vec![memory], IrType::Void);
    builder.build_call("free", vec![memory], IrType::Void);
    let zero = builder.build_const(0, IrType::I64);
    builder.build_ret(Some(zero));
    let module = Module {
        functions: vec![builder.finish().expect("finish")],
    };

    let mut machine = Interpreter::new(module, RunOptions::default());
    assert!(matches!(
        machine.run_main(),
        Err(RuntimeError::DoubleFree { .. })
    ));
}

#[test]
fn freeing_null_is_recorded() {
    let mut builder = Builder::new("main", &[], IrType::I64);
    let null = builder.build_null();
    builder.build_call("free", vec![null], IrType::Void);
    let zero = builder.build_const(0, IrType::I64);
    builder.build_ret(Some(zero));
    let module = Module {
        functions: vec![builder.finish().expect("finish")],
    };

    let mut machine = Interpreter::new(module, RunOptions::default());
    assert_eq!(machine.run_main(), Ok(0));
    assert_eq!(machine.events(), &[Event::Call { function: "main".into() }, Event::Free { object: None }]);
}
