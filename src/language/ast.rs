use crate::language::span::Span;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }

    /// Identifier produced by desugaring rather than written in source.
    pub fn synthetic(name: impl Into<String>) -> Self {
        Self::new(name, Span::default())
    }
}

#[derive(Clone, Debug)]
pub struct Program {
    pub functions: Vec<FunctionDef>,
}

#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub kind: FunctionKind,
    pub body: Block,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    Plain,
    Coroutine { promise: Ident },
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self {
            statements,
            span: Span::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Let(LetStmt),
    Expr(Expr),
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    Block(Block),
    Return(ReturnStmt),
    CoReturn(CoReturnStmt),
    Defer(Expr),
    Labeled {
        label: String,
        body: Box<Stmt>,
    },
}

#[derive(Clone, Debug)]
pub struct LetStmt {
    pub name: Ident,
    pub init: Initializer,
    /// Storage outlives the coroutine frame (the ramp's result object).
    pub caller_owned: bool,
}

impl LetStmt {
    pub fn new(name: Ident, init: Expr) -> Self {
        Self {
            name,
            init: Initializer::Expr(init),
            caller_owned: false,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Initializer {
    Expr(Expr),
    Aggregate(Vec<Expr>),
}

#[derive(Clone, Debug)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct CoReturnStmt {
    /// Operand as written in source; cleared once desugared.
    pub value: Option<Expr>,
    /// Promise hook receiving the operand, set by desugaring.
    pub promise_call: Option<Expr>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Place {
    Var(Ident),
    Field { base: Ident, index: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u32);

#[derive(Clone, Debug)]
pub enum CoroBuiltin {
    /// Handle of the frame the current activation runs in.
    Frame,
    /// Bytes the frame needs when it is heap allocated.
    Size,
    /// Releases the frame and yields the memory to free, or null when the
    /// frame was never heap allocated.
    Free(Box<Expr>),
}

#[derive(Clone, Debug)]
pub enum Awaiter {
    Always,
    Never,
    Value(Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuspendSyntax {
    Await,
    Yield,
}

#[derive(Clone, Debug)]
pub struct SuspendPoint {
    pub syntax: SuspendSyntax,
    pub temp: TempId,
    pub common: Expr,
    pub ready: Expr,
    pub suspend: Expr,
    pub resume: Expr,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum Expr {
    Int(i64),
    Bool(bool),
    Var(Ident),
    Field {
        base: Ident,
        index: u32,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Place,
        value: Box<Expr>,
    },
    Call {
        callee: Ident,
        args: Vec<Expr>,
    },
    Seq(Vec<Expr>),
    Coro(CoroBuiltin),
    Await {
        awaiter: Awaiter,
        span: Span,
    },
    Yield {
        value: Box<Expr>,
        span: Span,
    },
    Suspend(Box<SuspendPoint>),
    Temporary(TempId),
}

impl Expr {
    pub fn var(name: &str) -> Expr {
        Expr::Var(Ident::synthetic(name))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            callee: Ident::synthetic(name),
            args,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Visits this expression and every nested sub-expression, pre-order.
    /// Suspend points are visited through their four sub-expressions.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Expr::Assign { value, .. } => value.walk(visit),
            Expr::Call { args, .. } | Expr::Seq(args) => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Coro(CoroBuiltin::Free(inner)) => inner.walk(visit),
            Expr::Await {
                awaiter: Awaiter::Value(inner),
                ..
            } => inner.walk(visit),
            Expr::Yield { value, .. } => value.walk(visit),
            Expr::Suspend(point) => {
                point.common.walk(visit);
                point.ready.walk(visit);
                point.suspend.walk(visit);
                point.resume.walk(visit);
            }
            _ => {}
        }
    }

    /// Number of reads of `name`, as a plain variable, inside this expression.
    pub fn count_var_refs(&self, name: &str) -> usize {
        let mut count = 0;
        self.walk(&mut |expr| {
            if let Expr::Var(ident) = expr {
                if ident.name == name {
                    count += 1;
                }
            }
        });
        count
    }

    pub fn count_temp_refs(&self, temp: TempId) -> usize {
        let mut count = 0;
        self.walk(&mut |expr| {
            if matches!(expr, Expr::Temporary(id) if *id == temp) {
                count += 1;
            }
        });
        count
    }
}

#[derive(Clone, Debug)]
pub struct ParamMove {
    pub param: Ident,
    /// Copy initializer; reads the original parameter exactly once.
    pub init: Expr,
    /// Destructor run when the coroutine's local scope closes.
    pub drop: Option<Expr>,
}

/// Everything the coroutine lowering needs to know about one coroutine,
/// with the promise operations already resolved.
#[derive(Clone, Debug)]
pub struct CoroutineBody {
    pub promise_decl: LetStmt,
    pub initial_suspend: SuspendPoint,
    pub final_suspend: SuspendPoint,
    pub body: Block,
    pub allocate: Option<Expr>,
    pub deallocate: Stmt,
    pub result_decl: Option<LetStmt>,
    pub return_stmt: Stmt,
    pub param_moves: Vec<ParamMove>,
}

#[derive(Clone, Debug)]
pub struct CoroutineDef {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: CoroutineBody,
}

#[derive(Clone, Debug)]
pub enum Definition {
    Function(FunctionDef),
    Coroutine(CoroutineDef),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::Function(def) => &def.name.name,
            Definition::Coroutine(def) => &def.name.name,
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            Definition::Function(def) => def.params.len(),
            Definition::Coroutine(def) => def.params.len(),
        }
    }
}

/// Program after promise resolution, ready for lowering.
#[derive(Clone, Debug)]
pub struct CheckedProgram {
    pub definitions: Vec<Definition>,
}
