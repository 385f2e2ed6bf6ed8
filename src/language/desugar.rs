//! Promise resolution.
//!
//! Turns surface coroutines (`coro f() -> kind { .. }`) into a
//! [`CoroutineBody`]: the promise object, the initial and final suspend
//! points, frame allocation and deallocation, the result object and the
//! parameter copies. Every `co_await`/`co_yield` becomes a [`SuspendPoint`]
//! whose ready/suspend/resume expressions share one materialized temporary.

use crate::language::{
    ast::*,
    errors::{SyntaxError, SyntaxErrors},
    span::Span,
};
use std::collections::HashMap;
use thiserror::Error;

pub const PROMISE_VAR: &str = "__promise";
pub const RESULT_VAR: &str = "__result";
pub const DESTROY_LABEL: &str = "coro.destroy";

/// Promise field receiving `co_yield` operands.
pub const PROMISE_VALUE_FIELD: u32 = 0;
/// Promise field receiving the `co_return` operand.
pub const PROMISE_RESULT_FIELD: u32 = 1;
const PROMISE_FIELDS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromiseKind {
    /// Lazily started, yields values, hands its frame back as result object.
    Generator,
    /// Eagerly started, produces one value through `co_return`.
    Task,
    /// Lazily started task.
    Lazy,
}

impl PromiseKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "generator" => Some(PromiseKind::Generator),
            "task" => Some(PromiseKind::Task),
            "lazy" => Some(PromiseKind::Lazy),
            _ => None,
        }
    }

    fn starts_suspended(self) -> bool {
        !matches!(self, PromiseKind::Task)
    }

    fn has_result_object(self) -> bool {
        !matches!(self, PromiseKind::Task)
    }

    fn yields(self) -> bool {
        matches!(self, PromiseKind::Generator)
    }

    fn returns_value(self) -> bool {
        !matches!(self, PromiseKind::Generator)
    }
}

#[derive(Debug, Error, Clone)]
pub enum DesugarError {
    #[error("unknown promise kind `{name}`")]
    UnknownPromise { name: String, span: Span },
    #[error("`{keyword}` is only allowed inside a coroutine")]
    OutsideCoroutine { keyword: &'static str, span: Span },
    #[error("`return` is not allowed inside a coroutine")]
    ReturnInCoroutine { span: Span },
    #[error("`co_yield` requires a generator promise")]
    YieldWithoutGenerator { span: Span },
    #[error("a generator cannot `co_return` a value")]
    GeneratorReturnValue { span: Span },
    #[error("`{keyword}` is not allowed inside `defer`")]
    SuspendInDefer { keyword: &'static str, span: Span },
    #[error("`{name}` is defined more than once")]
    DuplicateFunction { name: String, span: Span },
    #[error("`{name}` expects {expected} arguments but received {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
        span: Span,
    },
}

impl DesugarError {
    pub fn span(&self) -> Span {
        match self {
            DesugarError::UnknownPromise { span, .. }
            | DesugarError::OutsideCoroutine { span, .. }
            | DesugarError::ReturnInCoroutine { span }
            | DesugarError::YieldWithoutGenerator { span }
            | DesugarError::GeneratorReturnValue { span }
            | DesugarError::SuspendInDefer { span, .. }
            | DesugarError::DuplicateFunction { span, .. }
            | DesugarError::ArityMismatch { span, .. } => *span,
        }
    }

    pub fn to_syntax_error(&self) -> SyntaxError {
        let error = SyntaxError::new(self.to_string(), self.span());
        match self {
            DesugarError::UnknownPromise { .. } => {
                error.with_help("available promise kinds: generator, task, lazy")
            }
            DesugarError::ReturnInCoroutine { .. } => {
                error.with_help("use `co_return` to finish a coroutine")
            }
            DesugarError::SuspendInDefer { .. } => {
                error.with_help("deferred expressions also run when the coroutine is destroyed")
            }
            _ => error,
        }
    }
}

pub fn desugar_program(program: &Program) -> Result<CheckedProgram, SyntaxErrors> {
    let mut errors = Vec::new();
    let mut arities = HashMap::new();
    for function in &program.functions {
        if arities
            .insert(function.name.name.clone(), function.params.len())
            .is_some()
        {
            errors.push(DesugarError::DuplicateFunction {
                name: function.name.name.clone(),
                span: function.name.span,
            });
        }
    }

    let mut definitions = Vec::new();
    for function in &program.functions {
        let mut desugarer = Desugarer::new(&arities);
        let result = match &function.kind {
            FunctionKind::Plain => desugarer.plain(function).map(Definition::Function),
            FunctionKind::Coroutine { promise } => match PromiseKind::from_name(&promise.name) {
                Some(kind) => desugarer
                    .coroutine(function, kind)
                    .map(Definition::Coroutine),
                None => Err(DesugarError::UnknownPromise {
                    name: promise.name.clone(),
                    span: promise.span,
                }),
            },
        };
        match result {
            Ok(definition) => definitions.push(definition),
            Err(err) => errors.push(err),
        }
        errors.append(&mut desugarer.errors);
    }

    SyntaxErrors::check(errors.iter().map(DesugarError::to_syntax_error).collect())?;
    Ok(CheckedProgram { definitions })
}

struct Desugarer<'a> {
    arities: &'a HashMap<String, usize>,
    promise: Option<PromiseKind>,
    next_temp: u32,
    in_defer: bool,
    errors: Vec<DesugarError>,
}

impl<'a> Desugarer<'a> {
    fn new(arities: &'a HashMap<String, usize>) -> Self {
        Self {
            arities,
            promise: None,
            next_temp: 0,
            in_defer: false,
            errors: Vec::new(),
        }
    }

    fn plain(&mut self, function: &FunctionDef) -> Result<FunctionDef, DesugarError> {
        let body = self.block(&function.body)?;
        Ok(FunctionDef {
            body,
            ..function.clone()
        })
    }

    fn coroutine(
        &mut self,
        function: &FunctionDef,
        kind: PromiseKind,
    ) -> Result<CoroutineDef, DesugarError> {
        self.promise = Some(kind);
        let span = function.span;
        let initial_awaiter = if kind.starts_suspended() {
            Awaiter::Always
        } else {
            Awaiter::Never
        };
        let initial_suspend = self.await_point(initial_awaiter, span)?;
        let body = self.block(&function.body)?;
        let final_suspend = self.await_point(Awaiter::Always, span)?;

        let promise_decl = LetStmt {
            name: Ident::synthetic(PROMISE_VAR),
            init: Initializer::Aggregate(vec![Expr::Int(0); PROMISE_FIELDS]),
            caller_owned: false,
        };
        let frame_handle = Expr::Coro(CoroBuiltin::Frame);
        let (result_decl, return_stmt) = if kind.has_result_object() {
            let decl = LetStmt {
                name: Ident::synthetic(RESULT_VAR),
                init: Initializer::Expr(frame_handle),
                caller_owned: true,
            };
            (Some(decl), return_of(Expr::var(RESULT_VAR)))
        } else {
            (None, return_of(frame_handle))
        };
        let deallocate = Stmt::Labeled {
            label: DESTROY_LABEL.to_string(),
            body: Box::new(Stmt::Expr(Expr::call(
                "free",
                vec![Expr::Coro(CoroBuiltin::Free(Box::new(Expr::Coro(
                    CoroBuiltin::Frame,
                ))))],
            ))),
        };
        let param_moves = function
            .params
            .iter()
            .map(|param| ParamMove {
                param: param.clone(),
                init: Expr::Var(param.clone()),
                drop: None,
            })
            .collect();

        Ok(CoroutineDef {
            name: function.name.clone(),
            params: function.params.clone(),
            body: CoroutineBody {
                promise_decl,
                initial_suspend,
                final_suspend,
                body,
                allocate: Some(Expr::call("malloc", vec![Expr::Coro(CoroBuiltin::Size)])),
                deallocate,
                result_decl,
                return_stmt,
                param_moves,
            },
        })
    }

    fn block(&mut self, block: &Block) -> Result<Block, DesugarError> {
        let statements = block
            .statements
            .iter()
            .map(|stmt| self.stmt(stmt))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block {
            statements,
            span: block.span,
        })
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<Stmt, DesugarError> {
        Ok(match stmt {
            Stmt::Let(decl) => Stmt::Let(LetStmt {
                name: decl.name.clone(),
                init: match &decl.init {
                    Initializer::Expr(expr) => Initializer::Expr(self.expr(expr)?),
                    Initializer::Aggregate(items) => Initializer::Aggregate(
                        items
                            .iter()
                            .map(|item| self.expr(item))
                            .collect::<Result<_, _>>()?,
                    ),
                },
                caller_owned: decl.caller_owned,
            }),
            Stmt::Expr(expr) => Stmt::Expr(self.expr(expr)?),
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => Stmt::If {
                cond: self.expr(cond)?,
                then_block: self.block(then_block)?,
                else_block: else_block
                    .as_ref()
                    .map(|block| self.block(block))
                    .transpose()?,
            },
            Stmt::While { cond, body } => Stmt::While {
                cond: self.expr(cond)?,
                body: self.block(body)?,
            },
            Stmt::Block(block) => Stmt::Block(self.block(block)?),
            Stmt::Return(ret) => {
                if self.promise.is_some() {
                    return Err(DesugarError::ReturnInCoroutine { span: ret.span });
                }
                Stmt::Return(ReturnStmt {
                    value: ret.value.as_ref().map(|value| self.expr(value)).transpose()?,
                    span: ret.span,
                })
            }
            Stmt::CoReturn(ret) => {
                let Some(kind) = self.promise else {
                    return Err(DesugarError::OutsideCoroutine {
                        keyword: "co_return",
                        span: ret.span,
                    });
                };
                let promise_call = match &ret.value {
                    Some(_) if !kind.returns_value() => {
                        return Err(DesugarError::GeneratorReturnValue { span: ret.span });
                    }
                    Some(value) => Some(Expr::Assign {
                        target: promise_field(PROMISE_RESULT_FIELD),
                        value: Box::new(self.expr(value)?),
                    }),
                    None => None,
                };
                Stmt::CoReturn(CoReturnStmt {
                    value: None,
                    promise_call,
                    span: ret.span,
                })
            }
            Stmt::Defer(expr) => {
                self.in_defer = true;
                let expr = self.expr(expr);
                self.in_defer = false;
                Stmt::Defer(expr?)
            }
            Stmt::Labeled { label, body } => Stmt::Labeled {
                label: label.clone(),
                body: Box::new(self.stmt(body)?),
            },
        })
    }

    fn expr(&mut self, expr: &Expr) -> Result<Expr, DesugarError> {
        Ok(match expr {
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(self.expr(operand)?),
            },
            Expr::Binary { op, lhs, rhs } => Expr::binary(*op, self.expr(lhs)?, self.expr(rhs)?),
            Expr::Assign { target, value } => Expr::Assign {
                target: target.clone(),
                value: Box::new(self.expr(value)?),
            },
            Expr::Call { callee, args } => {
                if let Some(expected) = self.arities.get(&callee.name) {
                    if *expected != args.len() {
                        self.errors.push(DesugarError::ArityMismatch {
                            name: callee.name.clone(),
                            expected: *expected,
                            received: args.len(),
                            span: callee.span,
                        });
                    }
                }
                Expr::Call {
                    callee: callee.clone(),
                    args: args
                        .iter()
                        .map(|arg| self.expr(arg))
                        .collect::<Result<_, _>>()?,
                }
            }
            Expr::Seq(items) => Expr::Seq(
                items
                    .iter()
                    .map(|item| self.expr(item))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Coro(CoroBuiltin::Free(inner)) => {
                Expr::Coro(CoroBuiltin::Free(Box::new(self.expr(inner)?)))
            }
            Expr::Await { awaiter, span } => {
                if self.promise.is_none() {
                    return Err(DesugarError::OutsideCoroutine {
                        keyword: "co_await",
                        span: *span,
                    });
                }
                if self.in_defer {
                    return Err(DesugarError::SuspendInDefer {
                        keyword: "co_await",
                        span: *span,
                    });
                }
                let awaiter = match awaiter {
                    Awaiter::Value(inner) => Awaiter::Value(Box::new(self.expr(inner)?)),
                    other => other.clone(),
                };
                Expr::Suspend(Box::new(self.await_point(awaiter, *span)?))
            }
            Expr::Yield { value, span } => {
                match self.promise {
                    None => {
                        return Err(DesugarError::OutsideCoroutine {
                            keyword: "co_yield",
                            span: *span,
                        });
                    }
                    Some(kind) if !kind.yields() => {
                        return Err(DesugarError::YieldWithoutGenerator { span: *span });
                    }
                    Some(_) => {}
                }
                if self.in_defer {
                    return Err(DesugarError::SuspendInDefer {
                        keyword: "co_yield",
                        span: *span,
                    });
                }
                let store = Expr::Assign {
                    target: promise_field(PROMISE_VALUE_FIELD),
                    value: Box::new(self.expr(value)?),
                };
                let common = Expr::Seq(vec![store, Expr::Int(0)]);
                Expr::Suspend(Box::new(self.suspend_point(
                    SuspendSyntax::Yield,
                    common,
                    *span,
                )))
            }
            other => other.clone(),
        })
    }

    fn await_point(&mut self, awaiter: Awaiter, span: Span) -> Result<SuspendPoint, DesugarError> {
        let common = match awaiter {
            Awaiter::Always => Expr::Int(0),
            Awaiter::Never => Expr::Int(1),
            Awaiter::Value(inner) => *inner,
        };
        Ok(self.suspend_point(SuspendSyntax::Await, common, span))
    }

    /// Awaiter protocol shared by every built-in awaitable: the awaited value
    /// is materialized once, a non-zero value means "ready", and the value is
    /// also what the suspend point resumes with.
    fn suspend_point(&mut self, syntax: SuspendSyntax, common: Expr, span: Span) -> SuspendPoint {
        let temp = TempId(self.next_temp);
        self.next_temp += 1;
        SuspendPoint {
            syntax,
            temp,
            common,
            ready: Expr::binary(BinaryOp::NotEq, Expr::Temporary(temp), Expr::Int(0)),
            suspend: Expr::Temporary(temp),
            resume: Expr::Temporary(temp),
            span,
        }
    }
}

fn promise_field(index: u32) -> Place {
    Place::Field {
        base: Ident::synthetic(PROMISE_VAR),
        index,
    }
}

fn return_of(value: Expr) -> Stmt {
    Stmt::Return(ReturnStmt {
        value: Some(value),
        span: Span::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::parser::parse_program;
    use indoc::indoc;

    fn checked(source: &str) -> CheckedProgram {
        let program = parse_program(source).expect("parse");
        desugar_program(&program).expect("desugar")
    }

    fn messages(source: &str) -> Vec<String> {
        let program = parse_program(source).expect("parse");
        desugar_program(&program)
            .expect_err("should fail")
            .errors
            .into_iter()
            .map(|err| err.message)
            .collect()
    }

    #[test]
    fn generator_gets_result_object_and_lazy_start() {
        let program = checked(indoc! {"
            coro g(n) -> generator {
                co_yield n;
            }
        "});
        let Definition::Coroutine(def) = &program.definitions[0] else {
            panic!("expected coroutine");
        };
        let body = &def.body;
        assert!(body.result_decl.as_ref().is_some_and(|decl| decl.caller_owned));
        assert!(matches!(body.initial_suspend.common, Expr::Int(0)));
        assert!(matches!(body.final_suspend.common, Expr::Int(0)));
        assert_eq!(body.param_moves.len(), 1);
        assert_eq!(body.param_moves[0].init.count_var_refs("n"), 1);
        assert!(matches!(&body.deallocate, Stmt::Labeled { label, .. } if label == DESTROY_LABEL));
        let Stmt::Expr(Expr::Suspend(point)) = &body.body.statements[0] else {
            panic!("expected lowered yield");
        };
        assert_eq!(point.syntax, SuspendSyntax::Yield);
        for sub in [&point.ready, &point.suspend, &point.resume] {
            assert_eq!(sub.count_temp_refs(point.temp), 1);
        }
    }

    #[test]
    fn task_starts_eagerly_and_returns_directly() {
        let program = checked("coro t() -> task { co_return 4; }");
        let Definition::Coroutine(def) = &program.definitions[0] else {
            panic!("expected coroutine");
        };
        assert!(def.body.result_decl.is_none());
        assert!(matches!(def.body.initial_suspend.common, Expr::Int(1)));
        let Stmt::CoReturn(ret) = &def.body.body.statements[0] else {
            panic!("expected co_return");
        };
        assert!(ret.value.is_none());
        assert!(ret.promise_call.is_some());
    }

    #[test]
    fn temporaries_are_unique_per_suspend_point() {
        let program = checked("coro t() -> lazy { co_await always; co_await never; }");
        let Definition::Coroutine(def) = &program.definitions[0] else {
            panic!("expected coroutine");
        };
        let mut temps = vec![def.body.initial_suspend.temp, def.body.final_suspend.temp];
        for stmt in &def.body.body.statements {
            if let Stmt::Expr(Expr::Suspend(point)) = stmt {
                temps.push(point.temp);
            }
        }
        temps.sort();
        temps.dedup();
        assert_eq!(temps.len(), 4);
    }

    #[test]
    fn rejects_misplaced_coroutine_syntax() {
        assert_eq!(
            messages("fn f() { co_yield 1; }"),
            vec!["`co_yield` is only allowed inside a coroutine".to_string()]
        );
        assert_eq!(
            messages("coro g() -> generator { return 1; }"),
            vec!["`return` is not allowed inside a coroutine".to_string()]
        );
        assert_eq!(
            messages("coro t() -> task { co_yield 1; }"),
            vec!["`co_yield` requires a generator promise".to_string()]
        );
        assert_eq!(
            messages("coro g() -> generator { co_return 1; }"),
            vec!["a generator cannot `co_return` a value".to_string()]
        );
        assert_eq!(
            messages("coro g() -> stream { }"),
            vec!["unknown promise kind `stream`".to_string()]
        );
    }

    #[test]
    fn rejects_suspension_inside_defer() {
        assert_eq!(
            messages("coro g() -> generator { defer co_yield 3; co_yield 1; }"),
            vec!["`co_yield` is not allowed inside `defer`".to_string()]
        );
        assert_eq!(
            messages("coro t() -> lazy { defer trace(co_await never); co_return 0; }"),
            vec!["`co_await` is not allowed inside `defer`".to_string()]
        );

        let program = parse_program("coro g() -> generator { defer co_yield 3; }").expect("parse");
        let errors = desugar_program(&program).expect_err("should fail");
        let error = &errors.errors[0];
        assert_eq!(error.span.start, 30);
        assert!(error.help.is_some());

        // Suspension after the deferred expression is still fine.
        checked("coro g() -> generator { defer trace(1); co_yield 1; }");
    }

    #[test]
    fn checks_call_arity_against_definitions() {
        let errors = messages(indoc! {"
            coro g(a, b) -> generator { }
            fn main() { let x = g(1); return 0; }
        "});
        assert_eq!(errors, vec!["`g` expects 2 arguments but received 1".to_string()]);
    }
}
