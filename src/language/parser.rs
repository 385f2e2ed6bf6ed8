use crate::language::{
    ast::*,
    errors::{SyntaxError, SyntaxErrors},
    lexer::lex,
    span::Span,
    token::{Token, TokenKind},
};

pub fn parse_program(source: &str) -> Result<Program, SyntaxErrors> {
    let tokens = match lex(source) {
        Ok(tokens) => tokens,
        Err(errors) => {
            return Err(errors
                .into_iter()
                .map(|err| SyntaxError::new(err.message, err.span))
                .collect());
        }
    };
    Parser::new(tokens).parse()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<SyntaxError>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<Program, SyntaxErrors> {
        let mut functions = Vec::new();
        while !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            match self.parse_function() {
                Ok(function) => functions.push(function),
                Err(err) => {
                    self.report(err);
                    self.synchronize_item();
                }
            }
        }

        SyntaxErrors::check(self.errors)?;
        Ok(Program { functions })
    }

    fn parse_function(&mut self) -> Result<FunctionDef, SyntaxError> {
        let start = self.current_span_start();
        let coroutine = if self.matches(TokenKind::Fn) {
            false
        } else if self.matches(TokenKind::Coro) {
            true
        } else {
            return Err(self
                .error_here("Expected `fn` or `coro`")
                .with_help("top-level items are functions or coroutines"));
        };
        let name = self.expect_identifier("Expected function name")?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                params.push(self.expect_identifier("Expected parameter name")?);
                if self.matches(TokenKind::Comma) {
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let kind = if coroutine {
            self.expect(TokenKind::Arrow).map_err(|err| {
                err.with_help("coroutines name their promise kind: `coro f() -> generator { .. }`")
            })?;
            let promise = self.expect_identifier("Expected promise kind")?;
            FunctionKind::Coroutine { promise }
        } else {
            FunctionKind::Plain
        };
        let body = self.parse_block()?;
        let span = Span::new(start, body.span.end);
        Ok(FunctionDef {
            name,
            params,
            kind,
            body,
            span,
        })
    }

    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let start = self.expect(TokenKind::LBrace)?.span.start;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(Block {
            statements,
            span: Span::new(start, end),
        })
    }

    fn parse_statement(&mut self) -> Result<Stmt, SyntaxError> {
        match self.peek_kind() {
            Some(TokenKind::Let) => {
                self.advance();
                let name = self.expect_identifier("Expected binding name after `let`")?;
                self.expect(TokenKind::Eq)?;
                let init = self.parse_expression(0)?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Let(LetStmt::new(name, init)))
            }
            Some(TokenKind::If) => self.parse_if(),
            Some(TokenKind::While) => {
                self.advance();
                let cond = self.parse_expression(0)?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body })
            }
            Some(TokenKind::Return) => {
                let start = self.advance().span.start;
                let value = self.parse_optional_operand()?;
                let end = self.expect(TokenKind::Semi)?.span.end;
                Ok(Stmt::Return(ReturnStmt {
                    value,
                    span: Span::new(start, end),
                }))
            }
            Some(TokenKind::CoReturn) => {
                let start = self.advance().span.start;
                let value = self.parse_optional_operand()?;
                let end = self.expect(TokenKind::Semi)?.span.end;
                Ok(Stmt::CoReturn(CoReturnStmt {
                    value,
                    promise_call: None,
                    span: Span::new(start, end),
                }))
            }
            Some(TokenKind::Defer) => {
                self.advance();
                let expr = self.parse_expression(0)?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Defer(expr))
            }
            Some(TokenKind::LBrace) => Ok(Stmt::Block(self.parse_block()?)),
            Some(TokenKind::Identifier(_)) if self.peek_kind_n(1) == Some(TokenKind::Eq) => {
                let name = self.expect_identifier("Expected assignment target")?;
                self.expect(TokenKind::Eq)?;
                let value = self.parse_expression(0)?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Expr(Expr::Assign {
                    target: Place::Var(name),
                    value: Box::new(value),
                }))
            }
            _ => {
                let expr = self.parse_expression(0)?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, SyntaxError> {
        self.expect(TokenKind::If)?;
        let cond = self.parse_expression(0)?;
        let then_block = self.parse_block()?;
        let else_block = if self.matches(TokenKind::Else) {
            if self.check(TokenKind::If) {
                let start = self.current_span_start();
                let nested = self.parse_if()?;
                let end = self.previous_span().map(|span| span.end).unwrap_or(start);
                Some(Block {
                    statements: vec![nested],
                    span: Span::new(start, end),
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
        })
    }

    fn parse_optional_operand(&mut self) -> Result<Option<Expr>, SyntaxError> {
        if self.check(TokenKind::Semi) {
            Ok(None)
        } else {
            self.parse_expression(0).map(Some)
        }
    }

    fn parse_expression(&mut self, min_prec: u8) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = self.current_binary_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_expression(prec + 1)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                })
            }
            Some(TokenKind::Bang) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                })
            }
            Some(TokenKind::CoAwait) => {
                let start = self.advance().span.start;
                let awaiter = match self.peek_kind() {
                    Some(TokenKind::Identifier(name)) if name == "always" => {
                        self.advance();
                        Awaiter::Always
                    }
                    Some(TokenKind::Identifier(name)) if name == "never" => {
                        self.advance();
                        Awaiter::Never
                    }
                    _ => Awaiter::Value(Box::new(self.parse_unary()?)),
                };
                let end = self.previous_span().map(|span| span.end).unwrap_or(start);
                Ok(Expr::Await {
                    awaiter,
                    span: Span::new(start, end),
                })
            }
            Some(TokenKind::CoYield) => {
                let start = self.advance().span.start;
                let value = self.parse_expression(0)?;
                let end = self.previous_span().map(|span| span.end).unwrap_or(start);
                Ok(Expr::Yield {
                    value: Box::new(value),
                    span: Span::new(start, end),
                })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek_kind() {
            Some(TokenKind::Integer(value)) => {
                self.advance();
                Ok(Expr::Int(value))
            }
            Some(TokenKind::True) => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Some(TokenKind::False) => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Some(TokenKind::Identifier(_)) => {
                let ident = self.expect_identifier("Expected identifier")?;
                if !self.matches(TokenKind::LParen) {
                    return Ok(Expr::Var(ident));
                }
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expression(0)?);
                        if self.matches(TokenKind::Comma) {
                            continue;
                        }
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Call {
                    callee: ident,
                    args,
                })
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let expr = self.parse_expression(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(self.error_here("Expected expression")),
        }
    }

    fn current_binary_op(&self) -> Option<(BinaryOp, u8)> {
        match self.peek_kind() {
            Some(TokenKind::Plus) => Some((BinaryOp::Add, 10)),
            Some(TokenKind::Minus) => Some((BinaryOp::Sub, 10)),
            Some(TokenKind::Star) => Some((BinaryOp::Mul, 20)),
            Some(TokenKind::Slash) => Some((BinaryOp::Div, 20)),
            Some(TokenKind::Percent) => Some((BinaryOp::Rem, 20)),
            Some(TokenKind::AndAnd) => Some((BinaryOp::And, 4)),
            Some(TokenKind::OrOr) => Some((BinaryOp::Or, 3)),
            Some(TokenKind::EqEq) => Some((BinaryOp::Eq, 5)),
            Some(TokenKind::NotEq) => Some((BinaryOp::NotEq, 5)),
            Some(TokenKind::Lt) => Some((BinaryOp::Lt, 9)),
            Some(TokenKind::LtEq) => Some((BinaryOp::LtEq, 9)),
            Some(TokenKind::Gt) => Some((BinaryOp::Gt, 9)),
            Some(TokenKind::GtEq) => Some((BinaryOp::GtEq, 9)),
            _ => None,
        }
    }

    fn expect_identifier(&mut self, msg: &str) -> Result<Ident, SyntaxError> {
        match self.peek_kind() {
            Some(TokenKind::Identifier(name)) => {
                let span = self.advance().span;
                Ok(Ident { name, span })
            }
            _ => Err(self.error_here(msg)),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token, SyntaxError> {
        if self.check(kind.clone()) {
            Ok(self.advance())
        } else {
            let found = self
                .peek_kind()
                .map(|found| found.describe())
                .unwrap_or_else(|| "end of input".into());
            Err(self.error_here(&format!("Expected {}, found {found}", kind.describe())))
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        matches!(self.peek_kind(), Some(tk) if tk == kind)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind.clone())
    }

    fn peek_kind_n(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + n).map(|t| t.kind.clone())
    }

    fn advance(&mut self) -> &Token {
        let index = self.pos.min(self.tokens.len().saturating_sub(1));
        self.pos = (self.pos + 1).min(self.tokens.len());
        &self.tokens[index]
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Eof) | None)
    }

    fn current_span_start(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.span.start)
            .unwrap_or_else(|| self.tokens.last().map(|t| t.span.end).unwrap_or(0))
    }

    fn previous_span(&self) -> Option<Span> {
        if self.pos == 0 {
            None
        } else {
            Some(self.tokens[self.pos - 1].span)
        }
    }

    fn error_here(&self, message: &str) -> SyntaxError {
        let span = self
            .tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or_else(|| {
                self.tokens
                    .last()
                    .map(|t| t.span)
                    .unwrap_or_else(|| Span::new(0, 0))
            });
        SyntaxError::new(message.to_string(), span)
    }

    fn report(&mut self, err: SyntaxError) {
        self.errors.push(err);
    }

    fn synchronize_item(&mut self) {
        while !self.is_eof() {
            match self.peek_kind() {
                Some(TokenKind::Fn | TokenKind::Coro) => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn parses_generator_and_driver() {
        let program = parse_program(indoc! {"
            coro range(from, n) -> generator {
                let i = from;
                while i < n {
                    co_yield i;
                    i = i + 1;
                }
            }

            fn main() {
                let g = range(1, 20);
                return 0;
            }
        "})
        .expect("parse");
        assert_eq!(program.functions.len(), 2);
        let range = &program.functions[0];
        assert_eq!(range.name.name, "range");
        assert_eq!(range.params.len(), 2);
        match &range.kind {
            FunctionKind::Coroutine { promise } => assert_eq!(promise.name, "generator"),
            other => panic!("unexpected kind {:?}", other),
        }
        let Stmt::While { body, .. } = &range.body.statements[1] else {
            panic!("expected while loop");
        };
        assert!(matches!(
            &body.statements[0],
            Stmt::Expr(Expr::Yield { .. })
        ));
        assert!(matches!(
            &body.statements[1],
            Stmt::Expr(Expr::Assign { .. })
        ));
        assert_eq!(program.functions[1].kind, FunctionKind::Plain);
    }

    #[test]
    fn await_operands() {
        let program = parse_program(indoc! {"
            coro t() -> task {
                co_await always;
                let x = co_await never;
                let y = co_await (x + 1);
                co_return y;
            }
        "})
        .expect("parse");
        let statements = &program.functions[0].body.statements;
        assert!(matches!(
            &statements[0],
            Stmt::Expr(Expr::Await {
                awaiter: Awaiter::Always,
                ..
            })
        ));
        let Stmt::Let(LetStmt {
            init: Initializer::Expr(Expr::Await { awaiter, .. }),
            ..
        }) = &statements[2]
        else {
            panic!("expected await in let");
        };
        assert!(matches!(awaiter, Awaiter::Value(_)));
        assert!(matches!(&statements[3], Stmt::CoReturn(ret) if ret.value.is_some()));
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let program = parse_program("fn f() { return 1 + 2 * 3 < 10; }").expect("parse");
        let Stmt::Return(ReturnStmt {
            value: Some(Expr::Binary { op, lhs, .. }),
            ..
        }) = &program.functions[0].body.statements[0]
        else {
            panic!("expected return");
        };
        assert_eq!(*op, BinaryOp::Lt);
        assert!(matches!(
            lhs.as_ref(),
            Expr::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn coroutine_requires_promise_kind() {
        let errors = parse_program("coro g() { }").expect_err("should fail");
        assert_eq!(errors.errors.len(), 1);
        assert!(errors.errors[0].help.is_some());
    }

    #[test]
    fn recovers_to_report_later_items() {
        let errors = parse_program("fn a( { } fn b() { let = 1; }").expect_err("should fail");
        assert_eq!(errors.errors.len(), 2);
    }
}
