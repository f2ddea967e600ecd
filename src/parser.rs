use std::{mem, rc::Rc};

use crate::{
    ast::{BinaryOp, Expr, ExprKind, FunctionDef, IfArm, Module, Stmt, StmtKind, UnaryOp},
    diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, SourceSpan},
    lexer::{Keyword, Lexer, Token, TokenKind},
    stack,
};

/// Upper bound on call arguments, list items, parameters and if-arms.
pub const MAX_ITEMS: usize = 16;

/// Upper bound on syntactic nesting: parenthesized and unary operands,
/// operator chains and compound-statement bodies each add a level.
pub const MAX_NESTING: usize = 200;

/// Binary operator priority, lowest first. Every expression starts
/// climbing at `Comparison`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Comparison,
    Additive,
    Multiplicative,
    Power,
    Bitwise,
    Logical,
}

fn binary_op(kind: TokenKind) -> Option<(BinaryOp, Precedence)> {
    use Precedence::*;
    let entry = match kind {
        TokenKind::EqEq => (BinaryOp::Equal, Comparison),
        TokenKind::Ne => (BinaryOp::NotEqual, Comparison),
        TokenKind::Lt => (BinaryOp::Less, Comparison),
        TokenKind::Le => (BinaryOp::LessEqual, Comparison),
        TokenKind::Gt => (BinaryOp::Greater, Comparison),
        TokenKind::Ge => (BinaryOp::GreaterEqual, Comparison),
        TokenKind::Plus => (BinaryOp::Add, Additive),
        TokenKind::Minus => (BinaryOp::Sub, Additive),
        TokenKind::Star => (BinaryOp::Mul, Multiplicative),
        TokenKind::Slash => (BinaryOp::Div, Multiplicative),
        TokenKind::FloorDiv => (BinaryOp::FloorDiv, Multiplicative),
        TokenKind::Modulo => (BinaryOp::Mod, Multiplicative),
        TokenKind::Pow => (BinaryOp::Pow, Power),
        TokenKind::BitAnd => (BinaryOp::BitAnd, Bitwise),
        TokenKind::BitOr => (BinaryOp::BitOr, Bitwise),
        TokenKind::BitXor => (BinaryOp::BitXor, Bitwise),
        TokenKind::And | TokenKind::Keyword(Keyword::And) => (BinaryOp::And, Logical),
        TokenKind::Or | TokenKind::Keyword(Keyword::Or) => (BinaryOp::Or, Logical),
        _ => return None,
    };
    Some(entry)
}

/// Parses a whole module. Every statement-level error is collected
/// before giving up, together with any lexer anomalies.
pub fn parse_module(source: &[u8]) -> Result<Module, Diagnostics> {
    Parser::new(Lexer::new(source)).parse_module()
}

/// Parses a single expression that must span the entire input.
pub fn parse_expression(source: &[u8]) -> Result<Expr, Diagnostics> {
    let mut parser = Parser::new(Lexer::new(source));
    let expr = parser.parse_expression().and_then(|expr| {
        parser.skip_newlines();
        if parser.check(TokenKind::Eof) {
            Ok(expr)
        } else {
            Err(parser.error("end of input"))
        }
    });
    let mut diagnostics = parser.lexer.take_diagnostics();
    match expr {
        Ok(expr) if diagnostics.is_empty() => Ok(expr),
        Ok(_) => Err(Diagnostics::from(diagnostics)),
        Err(diagnostic) => {
            diagnostics.push(diagnostic);
            Err(Diagnostics::from(diagnostics))
        }
    }
}

type ParseResult<T> = Result<T, Diagnostic>;

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    lookahead: Token,
    previous_span: SourceSpan,
    diagnostics: Vec<Diagnostic>,
    function_depth: usize,
    loop_depth: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(mut lexer: Lexer<'a>) -> Self {
        let current = lexer.next_token();
        let lookahead = lexer.next_token();
        Self {
            lexer,
            current,
            lookahead,
            previous_span: SourceSpan::default(),
            diagnostics: Vec::new(),
            function_depth: 0,
            loop_depth: 0,
            depth: 0,
        }
    }

    fn parse_module(mut self) -> Result<Module, Diagnostics> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(TokenKind::Eof) {
                break;
            }
            match self.parse_statement() {
                Ok(stmt) => items.push(stmt),
                Err(diagnostic) => {
                    self.diagnostics.push(diagnostic);
                    self.synchronize();
                }
            }
        }

        let mut diagnostics = self.lexer.take_diagnostics();
        diagnostics.append(&mut self.diagnostics);
        if diagnostics.is_empty() {
            Ok(Module { items })
        } else {
            Err(Diagnostics::from(diagnostics))
        }
    }

    fn synchronize(&mut self) {
        while !self.check(TokenKind::Newline) && !self.check(TokenKind::Eof) {
            self.advance();
        }
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        let stmt = match self.current.kind {
            TokenKind::Keyword(Keyword::Def) => return self.parse_def(),
            TokenKind::Keyword(Keyword::If) => return self.parse_if(),
            TokenKind::Keyword(Keyword::For) => return self.parse_for(),
            TokenKind::Keyword(Keyword::While) => return self.parse_while(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return()?,
            TokenKind::Keyword(Keyword::Pass) => {
                let span = self.advance().span;
                Stmt {
                    kind: StmtKind::Pass,
                    span,
                }
            }
            TokenKind::Keyword(Keyword::Break) => self.parse_loop_jump(StmtKind::Break)?,
            TokenKind::Keyword(Keyword::Continue) => self.parse_loop_jump(StmtKind::Continue)?,
            TokenKind::Keyword(Keyword::Import) => self.parse_import()?,
            TokenKind::Ident if self.lookahead.kind == TokenKind::Eq => self.parse_assignment()?,
            _ => {
                let expr = self.parse_expression()?;
                Stmt {
                    span: expr.span,
                    kind: StmtKind::Expr(expr),
                }
            }
        };
        self.matches(TokenKind::Newline);
        Ok(stmt)
    }

    /// Body of a compound statement: exactly one statement, either on the
    /// same line as the colon or on the next non-blank line.
    fn parse_body(&mut self) -> ParseResult<Stmt> {
        self.skip_newlines();
        if self.check(TokenKind::Eof) {
            return Err(self.error("statement"));
        }
        self.nested(Self::parse_statement)
    }

    fn parse_def(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let name = self.consume_identifier("function name")?;
        self.consume(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) {
            if params.len() == MAX_ITEMS {
                return Err(self.error(&format!("at most {MAX_ITEMS} parameters")));
            }
            params.push(self.consume_identifier("parameter name")?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RParen, "')'")?;
        self.consume(TokenKind::Colon, "':'")?;

        let saved_loops = mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.parse_body();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        let body = body?;

        let span = start.to(body.span);
        Ok(Stmt {
            kind: StmtKind::FuncDef(Rc::new(FunctionDef {
                name,
                params,
                body,
                span,
            })),
            span,
        })
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let mut arms = vec![self.parse_if_arm()?];
        loop {
            self.skip_newlines();
            if !self.check(TokenKind::Keyword(Keyword::Elif)) {
                break;
            }
            if arms.len() == MAX_ITEMS {
                return Err(self.error(&format!("at most {MAX_ITEMS} if/elif arms")));
            }
            self.advance();
            arms.push(self.parse_if_arm()?);
        }
        let else_body = if self.matches_keyword(Keyword::Else) {
            self.consume(TokenKind::Colon, "':'")?;
            Some(Box::new(self.parse_body()?))
        } else {
            None
        };
        let end = match (&else_body, arms.last()) {
            (Some(body), _) => body.span,
            (None, Some(arm)) => arm.body.span,
            (None, None) => start,
        };
        Ok(Stmt {
            kind: StmtKind::If { arms, else_body },
            span: start.to(end),
        })
    }

    fn parse_if_arm(&mut self) -> ParseResult<IfArm> {
        let condition = self.parse_expression()?;
        self.consume(TokenKind::Colon, "':'")?;
        let body = self.parse_body()?;
        Ok(IfArm { condition, body })
    }

    fn parse_for(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let var = self.consume_identifier("loop variable")?;
        self.consume(TokenKind::Keyword(Keyword::In), "'in'")?;
        let iterable = self.parse_expression()?;
        self.consume(TokenKind::Colon, "':'")?;
        let body = self.parse_loop_body()?;
        Ok(Stmt {
            span: start.to(body.span),
            kind: StmtKind::For {
                var,
                iterable,
                body: Box::new(body),
            },
        })
    }

    fn parse_while(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let condition = self.parse_expression()?;
        self.consume(TokenKind::Colon, "':'")?;
        let body = self.parse_loop_body()?;
        Ok(Stmt {
            span: start.to(body.span),
            kind: StmtKind::While {
                condition,
                body: Box::new(body),
            },
        })
    }

    fn parse_loop_body(&mut self) -> ParseResult<Stmt> {
        self.loop_depth += 1;
        let body = self.parse_body();
        self.loop_depth -= 1;
        body
    }

    fn parse_return(&mut self) -> ParseResult<Stmt> {
        if self.function_depth == 0 {
            return Err(self
                .error("statement")
                .with_note("'return' is only valid inside a function body"));
        }
        let start = self.advance().span;
        if self.check(TokenKind::Newline) || self.check(TokenKind::Eof) {
            return Ok(Stmt {
                kind: StmtKind::Return(None),
                span: start,
            });
        }
        let value = self.parse_expression()?;
        Ok(Stmt {
            span: start.to(value.span),
            kind: StmtKind::Return(Some(value)),
        })
    }

    fn parse_loop_jump(&mut self, kind: StmtKind) -> ParseResult<Stmt> {
        if self.loop_depth == 0 {
            let keyword = self.current.text_lossy().into_owned();
            return Err(self
                .error("statement")
                .with_note(format!("'{keyword}' is only valid inside a loop body")));
        }
        let span = self.advance().span;
        Ok(Stmt { kind, span })
    }

    fn parse_import(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let name = self.consume_identifier("module name")?;
        Ok(Stmt {
            kind: StmtKind::Import(name),
            span: start.to(self.previous_span),
        })
    }

    fn parse_assignment(&mut self) -> ParseResult<Stmt> {
        let target = self.advance();
        self.advance();
        let value = self.parse_expression()?;
        Ok(Stmt {
            span: target.span.to(value.span),
            kind: StmtKind::Assign {
                name: target.text_lossy().into_owned(),
                value,
            },
        })
    }

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.nested(|parser| {
            let left = parser.parse_unary()?;
            parser.parse_binary_rhs(Precedence::Comparison, left)
        })
    }

    fn parse_binary_rhs(&mut self, min: Precedence, left: Expr) -> ParseResult<Expr> {
        self.nested(|parser| parser.fold_binary(min, left))
    }

    /// Every folded operator deepens the tree by one, so each counts as a
    /// nesting level until the chain ends.
    fn fold_binary(&mut self, min: Precedence, mut left: Expr) -> ParseResult<Expr> {
        while let Some((op, precedence)) = binary_op(self.current.kind) {
            if precedence < min {
                break;
            }
            self.descend()?;
            self.advance();
            let mut right = self.parse_unary()?;
            while let Some((next_op, next_precedence)) = binary_op(self.current.kind) {
                let climbs = if next_op.is_right_assoc() {
                    next_precedence >= precedence
                } else {
                    next_precedence > precedence
                };
                if !climbs {
                    break;
                }
                right = self.parse_binary_rhs(next_precedence, right)?;
            }
            left = Expr {
                span: left.span.to(right.span),
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = match self.current.kind {
            TokenKind::Not | TokenKind::Keyword(Keyword::Not) => UnaryOp::Not,
            TokenKind::BitNot => UnaryOp::BitNot,
            TokenKind::Minus => UnaryOp::Negate,
            _ => return self.parse_primary(),
        };
        let start = self.advance().span;
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr {
            span: start.to(operand.span),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(operand),
            },
        })
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        match self.current.kind {
            TokenKind::Number => {
                let token = self.advance();
                Ok(Expr {
                    kind: ExprKind::Number(token.value),
                    span: token.span,
                })
            }
            TokenKind::String => {
                let token = self.advance();
                Ok(Expr {
                    kind: ExprKind::String(Rc::from(token.text)),
                    span: token.span,
                })
            }
            TokenKind::Ident => self.parse_identifier(),
            TokenKind::LParen => {
                let start = self.advance().span;
                let inner = self.parse_expression()?;
                let end = self.consume(TokenKind::RParen, "')'")?.span;
                let group = Expr {
                    kind: ExprKind::Paren(Box::new(inner)),
                    span: start.to(end),
                };
                self.parse_subscript(group)
            }
            TokenKind::LBracket => {
                let start = self.advance().span;
                let items = self.parse_items(TokenKind::RBracket, "list items")?;
                let end = self.consume(TokenKind::RBracket, "']'")?.span;
                Ok(Expr {
                    kind: ExprKind::List(items),
                    span: start.to(end),
                })
            }
            _ => Err(self.error("expression")),
        }
    }

    /// A name, optionally called once, optionally subscripted once.
    fn parse_identifier(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let name = token.text_lossy().into_owned();
        let expr = if self.matches(TokenKind::LParen) {
            let args = self.parse_items(TokenKind::RParen, "arguments")?;
            let end = self.consume(TokenKind::RParen, "')'")?.span;
            Expr {
                kind: ExprKind::Call { callee: name, args },
                span: token.span.to(end),
            }
        } else {
            Expr {
                kind: ExprKind::Ident(name),
                span: token.span,
            }
        };
        self.parse_subscript(expr)
    }

    fn parse_subscript(&mut self, target: Expr) -> ParseResult<Expr> {
        if !self.matches(TokenKind::LBracket) {
            return Ok(target);
        }
        let index = self.parse_expression()?;
        let end = self.consume(TokenKind::RBracket, "']'")?.span;
        Ok(Expr {
            span: target.span.to(end),
            kind: ExprKind::Subscript {
                target: Box::new(target),
                index: Box::new(index),
            },
        })
    }

    /// Comma-separated expressions up to `close`; a trailing comma is fine.
    fn parse_items(&mut self, close: TokenKind, what: &str) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.check(close) {
            if items.len() == MAX_ITEMS {
                return Err(self.error(&format!("at most {MAX_ITEMS} {what}")));
            }
            items.push(self.parse_expression()?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn descend(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(&format!("at most {MAX_NESTING} levels of nesting")));
        }
        self.depth += 1;
        Ok(())
    }

    /// Runs `parse` one nesting level deeper. The level is released on
    /// both success and failure.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        let base = self.depth;
        let result = self
            .descend()
            .and_then(|()| stack::guarded(|| parse(self)));
        self.depth = base;
        result
    }

    fn skip_newlines(&mut self) {
        while self.matches(TokenKind::Newline) {}
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        self.matches(TokenKind::Keyword(keyword))
    }

    fn consume(&mut self, kind: TokenKind, expected: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(expected))
        }
    }

    fn consume_identifier(&mut self, expected: &str) -> ParseResult<String> {
        let token = self.consume(TokenKind::Ident, expected)?;
        Ok(token.text_lossy().into_owned())
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn advance(&mut self) -> Token {
        let next = self.lexer.next_token();
        let lookahead = mem::replace(&mut self.lookahead, next);
        let token = mem::replace(&mut self.current, lookahead);
        self.previous_span = token.span;
        token
    }

    /// `expected <what> at line <N>, got <KIND> '<text>'` for the current token.
    fn error(&self, expected: &str) -> Diagnostic {
        let token = &self.current;
        Diagnostic::new(
            DiagnosticKind::Parser,
            format!(
                "expected {expected} at line {}, got {} '{}'",
                token.line(),
                token.kind.name(),
                token.text_lossy()
            ),
        )
        .with_span(token.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        parse_expression(source.as_bytes()).expect("expression should parse")
    }

    fn shape(expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Number(n) => n.to_string(),
            ExprKind::String(s) => format!("{:?}", String::from_utf8_lossy(s)),
            ExprKind::Ident(name) => name.clone(),
            ExprKind::Binary { op, left, right } => {
                format!("({} {} {})", shape(left), op.symbol(), shape(right))
            }
            ExprKind::Unary { op, expr } => format!("({op:?} {})", shape(expr)),
            ExprKind::Call { callee, args } => {
                let args: Vec<_> = args.iter().map(shape).collect();
                format!("{callee}({})", args.join(", "))
            }
            ExprKind::Paren(inner) => shape(inner),
            ExprKind::List(items) => {
                let items: Vec<_> = items.iter().map(shape).collect();
                format!("[{}]", items.join(", "))
            }
            ExprKind::Subscript { target, index } => {
                format!("{}[{}]", shape(target), shape(index))
            }
        }
    }

    fn errors(source: &str) -> Vec<String> {
        parse_module(source.as_bytes())
            .expect_err("module should fail to parse")
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn climbs_precedence_levels() {
        assert_eq!(shape(&expr("2 + 3 * 4")), "(2 + (3 * 4))");
        assert_eq!(shape(&expr("1 - 2 - 3")), "((1 - 2) - 3)");
        assert_eq!(shape(&expr("a == b + 1")), "(a == (b + 1))");
        assert_eq!(shape(&expr("1 + 2 & 3")), "(1 + (2 & 3))");
        assert_eq!(shape(&expr("a && b == c")), "((a && b) == c)");
        assert_eq!(shape(&expr("x or y and z")), "((x || y) && z)");
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(shape(&expr("2 ** 3 ** 2")), "(2 ** (3 ** 2))");
        assert_eq!(shape(&expr("2 * 3 ** 2")), "(2 * (3 ** 2))");
    }

    #[test]
    fn unary_operators_bind_tightest() {
        assert_eq!(shape(&expr("!a + b")), "((Not a) + b)");
        assert_eq!(shape(&expr("~x & -y")), "((BitNot x) & (Negate y))");
        assert_eq!(shape(&expr("not not a")), "(Not (Not a))");
    }

    #[test]
    fn postfix_forms() {
        assert_eq!(shape(&expr("f(1, g(2))[0]")), "f(1, g(2))[0]");
        assert_eq!(shape(&expr("(xs)[1 + 1]")), "xs[(1 + 1)]");
        assert_eq!(shape(&expr("[1, 'a', [],]")), "[1, \"a\", []]");
    }

    #[test]
    fn distinguishes_assignment_from_comparison() {
        let module = parse_module(b"x = 1\nx == 2\n").expect("parses");
        assert!(matches!(module.items[0].kind, StmtKind::Assign { .. }));
        assert!(matches!(module.items[1].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn compound_bodies_may_start_on_the_next_line() {
        let source = b"def f(n):\n\n    return n\nif 1: pass\nelif 2:\n  pass\nelse: x = 3\n";
        let module = parse_module(source).expect("parses");
        assert_eq!(module.items.len(), 2);
        match &module.items[1].kind {
            StmtKind::If { arms, else_body } => {
                assert_eq!(arms.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("expected if statement, found {other:?}"),
        }
        let def = module.functions().next().expect("hoistable def");
        assert_eq!(def.name, "f");
        assert_eq!(def.params, vec!["n".to_string()]);
    }

    #[test]
    fn reports_expected_token_with_position() {
        assert_eq!(
            errors("def f(a b): return a"),
            vec!["Parse error: expected ')' at line 1, got IDENT 'b'"]
        );
    }

    #[test]
    fn collects_one_error_per_bad_statement() {
        let errors = errors("x = (1\ny = 2\nz = ]\n");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("at line 1, got NEWLINE ''"));
        assert!(
            errors[1].starts_with("Parse error: expected expression at line 3, got RBRACKET ']'")
        );
    }

    #[test]
    fn nesting_is_bounded_per_statement() {
        let parens = MAX_NESTING + 5;
        let source = format!("x = {}1{}\ny = ((1))\n", "(".repeat(parens), ")".repeat(parens));
        let errors = errors(&source);
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].contains("expected at most 200 levels of nesting at line 1, got LPAREN '('")
        );

        let chain = vec!["2"; MAX_NESTING].join(" ** ");
        assert!(parse_expression(chain.as_bytes()).is_err());
        assert!(parse_expression(b"2 ** 3 ** 2").is_ok());
    }

    #[test]
    fn rejects_return_outside_functions() {
        let errors = errors("return 1");
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].starts_with("Parse error: expected statement at line 1, got KEYWORD 'return'")
        );
    }

    #[test]
    fn rejects_loop_jumps_outside_loops() {
        assert_eq!(errors("break").len(), 1);
        assert_eq!(errors("while 1:\n  def f(): continue").len(), 1);
        assert!(parse_module(b"for x in xs: break").is_ok());
    }

    #[test]
    fn bounds_argument_lists() {
        let args = vec!["1"; MAX_ITEMS + 1].join(", ");
        let errors = errors(&format!("f({args})"));
        assert!(errors[0].starts_with("Parse error: expected at most 16 arguments at line 1"));
        let args = vec!["1"; MAX_ITEMS].join(", ");
        assert!(parse_module(format!("f({args})").as_bytes()).is_ok());
    }

    #[test]
    fn lexer_anomalies_fail_the_parse() {
        assert_eq!(
            errors("s = 'unclosed"),
            vec!["Lex error: unterminated string literal at line 1"]
        );
    }

    #[test]
    fn missing_body_at_end_of_input() {
        assert_eq!(
            errors("while 1:\n"),
            vec!["Parse error: expected statement at line 2, got EOF ''"]
        );
    }
}
