use super::*;
use crate::language::{desugar::desugar_program, parser::parse_program, span::Span};
use crate::runtime::{Event, Interpreter, RtValue, RunOptions, RuntimeError};
use indoc::indoc;

const RANGE: &str = indoc! {"
    coro range(from, n) -> generator {
        let i = from;
        while i < n {
            co_yield i;
            i = i + 1;
        }
    }
"};

fn lower(source: &str) -> Result<Module, LoweringErrors> {
    let program = parse_program(source).expect("parse");
    let checked = desugar_program(&program).expect("desugar");
    Compiler::default().compile_program(&checked)
}

fn coroutine(source: &str) -> CoroutineDef {
    let program = parse_program(source).expect("parse");
    let checked = desugar_program(&program).expect("desugar");
    checked
        .definitions
        .into_iter()
        .find_map(|definition| match definition {
            Definition::Coroutine(def) => Some(def),
            Definition::Function(_) => None,
        })
        .expect("coroutine definition")
}

fn lower_def(def: &CoroutineDef) -> Result<ir::Function, LoweringError> {
    let mut compiler = Compiler::default();
    compiler.declare(&Definition::Coroutine(def.clone()));
    compiler.lower_coroutine(def)
}

fn machine(function: ir::Function) -> Interpreter {
    Interpreter::new(
        Module {
            functions: vec![function],
        },
        RunOptions::default(),
    )
}

fn first_point(def: &mut CoroutineDef) -> &mut SuspendPoint {
    match def.body.body.statements.first_mut() {
        Some(Stmt::Expr(Expr::Suspend(point))) => &mut **point,
        other => panic!("expected a suspend point, found {other:?}"),
    }
}

fn kinds(events: &[Event]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            Event::Call { .. } => "call",
            Event::Alloc { .. } => "alloc",
            Event::Free { .. } => "free",
            Event::FrameBegin { .. } => "begin",
            Event::Suspend { .. } => "suspend",
            Event::Resume { .. } => "resume",
            Event::Destroy { .. } => "destroy",
            Event::Teardown { .. } => "teardown",
            Event::Trace { .. } => "trace",
            Event::Throw { .. } => "throw",
        })
        .collect()
}

#[test]
fn coroutine_is_marked_and_verified() {
    let module = lower(RANGE).expect("lower");
    let range = module.function("range").expect("range");
    assert!(range.attrs.coroutine);
    assert_eq!(range.ret, IrType::Ptr);
    ir::verify_module(&module).expect("verify");
    for name in [
        "entry",
        "coro.alloc",
        "coro.init",
        "init.ready",
        "init.suspend",
        "init.cleanup",
        "yield2.ready",
        "yield2.suspend",
        "yield2.cleanup",
        "final.suspend",
        "coro.destroy",
        "coro.free",
        "coro.teardown",
        "coro.ret",
    ] {
        assert!(range.block_by_name(name).is_some(), "missing block `{name}`");
    }
    assert_eq!(range.intrinsic_calls(CoroIntrinsic::Begin).count(), 1);
    assert_eq!(range.intrinsic_calls(CoroIntrinsic::Alloc).count(), 1);
}

#[test]
fn every_suspend_point_has_a_destroy_edge() {
    let module = lower(RANGE).expect("lower");
    let range = module.function("range").expect("range");
    let suspends = range.intrinsic_calls(CoroIntrinsic::Suspend).count();
    assert_eq!(suspends, 3);
    assert_eq!(range.intrinsic_calls(CoroIntrinsic::Save).count(), suspends);

    let destroy = range.block_by_name("coro.destroy").expect("destroy label");
    let preds = range.predecessors(destroy.id);
    let (cleanups, normal): (Vec<_>, Vec<_>) = preds
        .into_iter()
        .partition(|pred| range.block(*pred).name.ends_with(".cleanup"));
    assert_eq!(cleanups.len(), suspends);
    // Completion falls through from the final ready block.
    assert_eq!(normal.len(), 1);
    assert_eq!(range.block(normal[0]).name, "final.ready");
}

#[test]
fn only_the_final_save_is_marked_final() {
    let module = lower(RANGE).expect("lower");
    let range = module.function("range").expect("range");
    for (name, flag) in [("init.suspend", 0), ("yield2.suspend", 0), ("final.suspend", 1)] {
        let block = range.block_by_name(name).expect("suspend block");
        let first = &block.insts[0];
        assert_eq!(first.ty, IrType::I1, "{name}");
        assert_eq!(first.kind, InstKind::Const { value: flag }, "{name}");
    }
}

#[test]
fn suspend_points_are_numbered_in_order() {
    let module = lower(indoc! {"
        coro t() -> lazy {
            co_await always;
            co_await never;
            co_return 1;
        }
    "})
    .expect("lower");
    let t = module.function("t").expect("t");
    let suspends: Vec<&str> = t
        .blocks
        .iter()
        .map(|block| block.name.as_str())
        .filter(|name| name.ends_with(".suspend"))
        .collect();
    assert_eq!(suspends, vec!["init.suspend", "await2.suspend", "await3.suspend", "final.suspend"]);
}

#[test]
fn lowering_is_deterministic() {
    let first = lower(RANGE).expect("lower").to_string();
    let second = lower(RANGE).expect("lower").to_string();
    assert_eq!(first, second);
}

#[test]
fn calls_under_frame_cleanups_become_invokes() {
    let module = lower("coro t() -> lazy { trace(1); co_return 0; }").expect("lower");
    let t = module.function("t").expect("t");
    let invokes = t
        .blocks
        .iter()
        .filter(|block| matches!(block.term, Some(ir::Terminator::Invoke { .. })))
        .count();
    assert!(invokes >= 1);
    assert!(t.blocks.iter().any(|block| block.landing_pad));
    assert!(t.blocks.iter().any(|block| matches!(block.term, Some(ir::Terminator::Resume))));
}

#[test]
fn plain_function_defers_run_on_return_and_unwind() {
    let module = lower(indoc! {"
        fn f(x) {
            defer trace(7);
            if x { throw(3); }
            return 0;
        }
    "})
    .expect("lower");
    let f = module.function("f").expect("f");
    assert!(f.blocks.iter().any(|block| block.landing_pad));

    let mut machine = machine(f.clone());
    assert_eq!(machine.call("f", &[RtValue::Int(0)]), Ok(RtValue::Int(0)));
    assert_eq!(
        machine.call("f", &[RtValue::Int(1)]),
        Err(RuntimeError::UncaughtException { value: 3 })
    );
    let traces = machine
        .events()
        .iter()
        .filter(|event| **event == Event::Trace { value: 7 })
        .count();
    assert_eq!(traces, 2);
}

#[test]
fn plain_functions_stay_plain() {
    let module = lower("fn add(a, b) { return a + b; }").expect("lower");
    let add = module.function("add").expect("add");
    assert!(!add.attrs.coroutine);
    assert!(add.instructions().all(|(_, inst)| inst.intrinsic().is_none()));

    let mut machine = machine(add.clone());
    let sum = machine
        .call("add", &[RtValue::Int(2), RtValue::Int(3)])
        .expect("call");
    assert_eq!(sum, RtValue::Int(5));
}

#[test]
fn reports_errors_per_function() {
    let errors = lower(indoc! {"
        fn ok() { return 1; }
        fn bad() { return missing; }
    "})
    .expect_err("should fail");
    assert_eq!(errors.errors.len(), 1);
    assert_eq!(errors.errors[0].function, "bad");
    assert!(matches!(
        &errors.errors[0].error,
        LoweringError::UnknownVariable { name, .. } if name == "missing"
    ));
}

#[test]
fn destroy_at_yield_skips_the_resume_expression() {
    let mut def = coroutine("coro g() -> generator { co_yield 1; co_yield 2; }");
    let point = first_point(&mut def);
    let temp = point.temp;
    point.resume = Expr::Seq(vec![
        Expr::call("trace", vec![Expr::Int(99)]),
        Expr::Temporary(temp),
    ]);

    let mut machine = machine(lower_def(&def).expect("lower"));
    let handle = machine.start("g", &[]).expect("start");
    assert!(machine.resume(handle).expect("resume"));
    assert_eq!(machine.promise_value(handle), Ok(1));
    machine.take_events();

    machine.destroy(handle).expect("destroy");
    let frame = handle.frame();
    assert_eq!(
        machine.take_events(),
        vec![
            Event::Destroy { frame },
            Event::Free {
                object: Some(frame)
            },
            Event::Teardown { frame },
        ]
    );
    assert!(machine.is_torn_down(handle));
}

#[test]
fn resume_expression_runs_once_per_resumption() {
    let mut def = coroutine("coro g() -> generator { co_yield 1; co_yield 2; }");
    let point = first_point(&mut def);
    let temp = point.temp;
    point.resume = Expr::Seq(vec![
        Expr::call("trace", vec![Expr::Int(99)]),
        Expr::Temporary(temp),
    ]);

    let mut machine = machine(lower_def(&def).expect("lower"));
    let handle = machine.start("g", &[]).expect("start");
    assert!(machine.resume(handle).expect("first yield"));
    assert!(machine.resume(handle).expect("second yield"));
    assert_eq!(machine.promise_value(handle), Ok(2));
    let traces = machine
        .events()
        .iter()
        .filter(|event| **event == Event::Trace { value: 99 })
        .count();
    assert_eq!(traces, 1);
}

#[test]
fn exception_during_setup_releases_the_frame() {
    let mut def = coroutine("coro g(p) -> generator { co_yield p; }");
    def.body.param_moves[0].init = Expr::Seq(vec![
        Expr::call("trace", vec![Expr::var("p")]),
        Expr::call("throw", vec![Expr::Int(7)]),
    ]);

    let mut machine = machine(lower_def(&def).expect("lower"));
    let err = machine
        .call("g", &[RtValue::Int(3)])
        .expect_err("setup throws");
    assert_eq!(err, RuntimeError::UncaughtException { value: 7 });

    let events = machine.take_events();
    assert_eq!(
        kinds(&events),
        vec!["call", "alloc", "begin", "trace", "throw", "free", "teardown"]
    );
    assert!(events.contains(&Event::Trace { value: 3 }));
}

fn with_param_drop(source: &str) -> CoroutineDef {
    let mut def = coroutine(source);
    def.body.param_moves[0].drop = Some(Expr::call("trace", vec![Expr::Int(42)]));
    def
}

fn drops(machine: &Interpreter) -> usize {
    machine
        .events()
        .iter()
        .filter(|event| **event == Event::Trace { value: 42 })
        .count()
}

#[test]
fn param_drop_runs_once_after_completion() {
    let def = with_param_drop(RANGE);
    let mut machine = machine(lower_def(&def).expect("lower"));
    let handle = machine
        .start("range", &[RtValue::Int(0), RtValue::Int(2)])
        .expect("start");
    assert!(machine.resume(handle).expect("yield 0"));
    assert!(machine.resume(handle).expect("yield 1"));
    assert!(!machine.resume(handle).expect("final"));
    assert_eq!(drops(&machine), 0);

    machine.destroy(handle).expect("destroy");
    assert_eq!(drops(&machine), 1);
    assert!(machine.is_torn_down(handle));
}

#[test]
fn param_drop_runs_once_when_destroyed_at_a_yield() {
    let def = with_param_drop(RANGE);
    let mut machine = machine(lower_def(&def).expect("lower"));
    let handle = machine
        .start("range", &[RtValue::Int(0), RtValue::Int(5)])
        .expect("start");
    assert!(machine.resume(handle).expect("yield 0"));
    machine.destroy(handle).expect("destroy");
    assert_eq!(drops(&machine), 1);
    assert!(machine.is_torn_down(handle));
}

#[test]
fn param_drop_runs_once_when_the_body_throws() {
    let def = with_param_drop("coro g(p) -> generator { co_yield p; throw(5); }");
    let mut machine = machine(lower_def(&def).expect("lower"));
    let handle = machine.start("g", &[RtValue::Int(1)]).expect("start");
    assert!(machine.resume(handle).expect("yield"));
    let err = machine.resume(handle).expect_err("body throws");
    assert_eq!(err, RuntimeError::UncaughtException { value: 5 });
    assert_eq!(drops(&machine), 1);
    assert!(machine.is_torn_down(handle));

    let events = machine.events();
    let frees = events
        .iter()
        .filter(|event| matches!(event, Event::Free { object: Some(_) }))
        .count();
    assert_eq!(frees, 1);
}

#[test]
fn parameters_are_read_from_their_frame_copies() {
    let def = coroutine("coro g(n) -> generator { co_yield n; co_yield n + 1; }");
    let mut machine = machine(lower_def(&def).expect("lower"));
    let handle = machine.start("g", &[RtValue::Int(5)]).expect("start");
    assert!(machine.resume(handle).expect("resume"));
    assert_eq!(machine.promise_value(handle), Ok(5));
    assert!(machine.resume(handle).expect("resume"));
    assert_eq!(machine.promise_value(handle), Ok(6));
}

#[test]
fn parameters_without_copies_dangle_after_the_ramp() {
    let mut def = coroutine("coro g(n) -> generator { co_yield n; }");
    def.body.param_moves.clear();
    let mut machine = machine(lower_def(&def).expect("lower"));
    let handle = machine.start("g", &[RtValue::Int(5)]).expect("start");
    let err = machine.resume(handle).expect_err("stale parameter");
    assert!(matches!(err, RuntimeError::DanglingStack { .. }));
}

#[test]
fn rejects_unlabeled_deallocate() {
    let mut def = coroutine("coro g() -> generator { co_yield 1; }");
    let Stmt::Labeled { body, .. } = def.body.deallocate.clone() else {
        panic!("desugared deallocate is labeled");
    };
    def.body.deallocate = *body;
    assert!(matches!(
        lower_def(&def),
        Err(LoweringError::UnlabeledDeallocate)
    ));
}

#[test]
fn rejects_deallocate_without_frame_free() {
    let mut def = coroutine("coro g() -> generator { co_yield 1; }");
    def.body.deallocate = Stmt::Labeled {
        label: "coro.destroy".to_string(),
        body: Box::new(Stmt::Expr(Expr::Int(0))),
    };
    assert!(matches!(
        lower_def(&def),
        Err(LoweringError::MissingFrameFree)
    ));
}

#[test]
fn rejects_param_copy_without_single_reference() {
    let mut def = coroutine("coro g(p) -> generator { co_yield p; }");
    def.body.param_moves[0].init = Expr::binary(BinaryOp::Add, Expr::var("p"), Expr::var("p"));
    assert!(matches!(
        lower_def(&def),
        Err(LoweringError::ParamMoveReference { found: 2, .. })
    ));

    def.body.param_moves[0].init = Expr::Int(0);
    assert!(matches!(
        lower_def(&def),
        Err(LoweringError::ParamMoveReference { found: 0, .. })
    ));
}

#[test]
fn rejects_suspend_parts_without_single_temporary() {
    let mut def = coroutine("coro g() -> generator { co_yield 1; }");
    def.body.initial_suspend.ready = Expr::Int(1);
    assert!(matches!(
        lower_def(&def),
        Err(LoweringError::TemporaryReference {
            part: "ready",
            found: 0
        })
    ));

    let mut def = coroutine("coro g() -> generator { co_yield 1; }");
    let point = first_point(&mut def);
    let temp = point.temp;
    point.resume = Expr::binary(BinaryOp::Add, Expr::Temporary(temp), Expr::Temporary(temp));
    assert!(matches!(
        lower_def(&def),
        Err(LoweringError::TemporaryReference {
            part: "resume",
            found: 2
        })
    ));
}

#[test]
fn rejects_return_without_value() {
    let mut def = coroutine("coro t() -> task { co_return 1; }");
    def.body.return_stmt = Stmt::Return(ReturnStmt {
        value: None,
        span: Span::default(),
    });
    assert!(matches!(
        lower_def(&def),
        Err(LoweringError::MalformedReturn)
    ));
}
