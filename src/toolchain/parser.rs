use super::ast::*;
use super::error::CompileError;
use super::lexer::{SpannedToken, Token};
use crate::shape::ParamMode;

pub fn parse(tokens: Vec<SpannedToken>) -> Result<CompilationUnit, Vec<CompileError>> {
    let mut parser = Parser::new(tokens);
    parser.parse_unit().map_err(|e| vec![e])
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

type PResult<T> = Result<T, CompileError>;

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self { tokens, pos: 0 }
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).map_or(&Token::Eof, |t| &t.token)
    }

    fn span(&self) -> Span {
        self.tokens.get(self.pos).map_or(Span::new(0, 0), |t| t.span)
    }

    /// Span of the last consumed token.
    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(Span::new(0, 0), |t| t.span)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) -> Span {
        let span = self.span();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        span
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> PResult<Span> {
        if self.peek() == expected {
            return Ok(self.advance());
        }
        // Missing terminators are reported right after the previous token.
        let at = match expected {
            Token::Semicolon | Token::RParen | Token::RBrace => {
                let prev = self.prev_span();
                Span::new(prev.end, prev.end)
            }
            _ => self.span(),
        };
        let (code, message) = match expected {
            Token::Semicolon => ("CS1002", "; expected".to_string()),
            Token::RParen => ("CS1026", ") expected".to_string()),
            Token::RBrace => ("CS1513", "} expected".to_string()),
            Token::LBrace => ("CS1514", "{ expected".to_string()),
            other => ("CS1003", format!("Syntax error, '{}' expected", other.text())),
        };
        Err(CompileError::error(code, message, at))
    }

    fn expect_ident(&mut self) -> PResult<(String, Span)> {
        if let Token::Ident(name) = self.peek().clone() {
            let span = self.advance();
            Ok((name, span))
        } else {
            Err(self.identifier_expected())
        }
    }

    fn identifier_expected(&self) -> CompileError {
        if is_keyword(self.peek()) {
            CompileError::error(
                "CS1041",
                format!("Identifier expected; '{}' is a keyword", self.peek().text()),
                self.span(),
            )
        } else {
            CompileError::error("CS1001", "Identifier expected", self.span())
        }
    }

    fn qualified_name(&mut self) -> PResult<(String, Span)> {
        let (mut name, start) = self.expect_ident()?;
        let mut span = start;
        while self.eat(&Token::Dot) {
            let (part, part_span) = self.expect_ident()?;
            name.push('.');
            name.push_str(&part);
            span = span.merge(part_span);
        }
        Ok((name, span))
    }

    // ── Declarations ───────────────────────────────────────────────

    fn parse_unit(&mut self) -> PResult<CompilationUnit> {
        let usings = self.parse_usings()?;
        let members = self.parse_namespace_members()?;
        if !self.at_eof() {
            return Err(CompileError::error(
                "CS1022",
                "Type or namespace definition, or end-of-file expected",
                self.span(),
            ));
        }
        Ok(CompilationUnit { usings, members })
    }

    fn parse_usings(&mut self) -> PResult<Vec<UsingDirective>> {
        let mut usings = Vec::new();
        while matches!(self.peek(), Token::Using) {
            let start = self.advance();
            if matches!(self.peek(), Token::Static) || matches!(self.peek_at(1), Token::Eq) {
                return Err(CompileError::unsupported("using alias or using static", start));
            }
            let (name, _) = self.qualified_name()?;
            let end = self.expect(&Token::Semicolon)?;
            usings.push(UsingDirective {
                name,
                span: start.merge(end),
            });
        }
        Ok(usings)
    }

    /// Members until `}` or end of input.
    fn parse_namespace_members(&mut self) -> PResult<Vec<Member>> {
        let mut members = Vec::new();
        loop {
            match self.peek() {
                Token::Namespace => members.push(Member::Namespace(self.parse_namespace()?)),
                Token::Using => {
                    return Err(CompileError::error(
                        "CS1529",
                        "A using clause must precede all other elements defined in the namespace except extern alias declarations",
                        self.span(),
                    ));
                }
                Token::Class
                | Token::Public
                | Token::Private
                | Token::Internal
                | Token::Protected
                | Token::Static => {
                    let start = self.span();
                    let modifiers = self.parse_modifiers()?;
                    if !matches!(self.peek(), Token::Class) {
                        return Err(CompileError::error(
                            "CS0116",
                            "A namespace cannot directly contain members such as fields, methods or statements",
                            self.span(),
                        ));
                    }
                    members.push(Member::Class(self.parse_class(modifiers, start)?));
                }
                _ => return Ok(members),
            }
        }
    }

    fn parse_namespace(&mut self) -> PResult<NamespaceDecl> {
        let start = self.advance();
        let (name, _) = self.qualified_name()?;
        if matches!(self.peek(), Token::Semicolon) {
            return Err(CompileError::unsupported("file-scoped namespace", self.span()));
        }
        self.expect(&Token::LBrace)?;
        let usings = self.parse_usings()?;
        let members = self.parse_namespace_members()?;
        if !matches!(self.peek(), Token::RBrace | Token::Eof) {
            return Err(CompileError::error(
                "CS1022",
                "Type or namespace definition, or end-of-file expected",
                self.span(),
            ));
        }
        let end = self.expect(&Token::RBrace)?;
        Ok(NamespaceDecl {
            name,
            usings,
            members,
            span: start.merge(end),
        })
    }

    fn parse_modifiers(&mut self) -> PResult<Modifiers> {
        let mut modifiers = Modifiers::default();
        loop {
            let flag = match self.peek() {
                Token::Public => &mut modifiers.public,
                Token::Private => &mut modifiers.private,
                Token::Internal => &mut modifiers.internal,
                Token::Protected => &mut modifiers.protected,
                Token::Static => &mut modifiers.is_static,
                _ => return Ok(modifiers),
            };
            if *flag {
                return Err(CompileError::error(
                    "CS1004",
                    format!("Duplicate '{}' modifier", self.peek().text()),
                    self.span(),
                ));
            }
            *flag = true;
            self.advance();
        }
    }

    fn parse_class(&mut self, modifiers: Modifiers, start: Span) -> PResult<ClassDecl> {
        self.expect(&Token::Class)?;
        let (name, _) = self.expect_ident()?;
        if matches!(self.peek(), Token::Lt | Token::Colon) {
            return Err(CompileError::unsupported("generic or derived class", self.span()));
        }
        self.expect(&Token::LBrace)?;

        let mut methods = Vec::new();
        let mut classes = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            let member_start = self.span();
            let member_modifiers = self.parse_modifiers()?;
            if matches!(self.peek(), Token::Class) {
                classes.push(self.parse_class(member_modifiers, member_start)?);
            } else {
                methods.push(self.parse_method(member_modifiers, member_start, &name)?);
            }
        }
        let end = self.expect(&Token::RBrace)?;
        Ok(ClassDecl {
            name,
            modifiers,
            methods,
            classes,
            span: start.merge(end),
        })
    }

    fn parse_method(&mut self, modifiers: Modifiers, start: Span, class_name: &str) -> PResult<MethodDecl> {
        if matches!(self.peek(), Token::Ident(n) if n == class_name) && matches!(self.peek_at(1), Token::LParen) {
            return Err(CompileError::unsupported("constructor", self.span()));
        }
        let return_type = if self.eat(&Token::Void) {
            None
        } else if starts_type(self.peek()) {
            Some(self.parse_type()?)
        } else {
            return Err(CompileError::error(
                "CS1519",
                format!(
                    "Invalid token '{}' in class, record, struct, or interface member declaration",
                    self.peek().text()
                ),
                self.span(),
            ));
        };
        let (name, _) = self.expect_ident()?;
        match self.peek() {
            Token::LParen => {}
            Token::Semicolon | Token::Eq | Token::LBrace => {
                return Err(CompileError::unsupported("fields and properties", self.span()));
            }
            Token::Lt => return Err(CompileError::unsupported("generic method", self.span())),
            _ => {
                self.expect(&Token::LParen)?;
            }
        }
        let params = self.parse_params()?;
        self.expect(&Token::LBrace)?;
        let body = self.parse_block_body()?;
        let end = self.expect(&Token::RBrace)?;
        Ok(MethodDecl {
            name,
            modifiers,
            return_type,
            params,
            body,
            span: start.merge(end),
        })
    }

    fn parse_params(&mut self) -> PResult<Vec<ParamDecl>> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(params);
        }
        loop {
            let start = self.span();
            let mode = self.parse_mode();
            if matches!(self.peek(), Token::Ident(n) if n == "params" || n == "this") {
                return Err(CompileError::unsupported("params array or extension method", self.span()));
            }
            let ty = self.parse_type()?;
            let (name, end) = self.expect_ident()?;
            if matches!(self.peek(), Token::Eq) {
                return Err(CompileError::unsupported("optional parameter", self.span()));
            }
            params.push(ParamDecl {
                mode,
                ty,
                name,
                span: start.merge(end),
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(params)
    }

    fn parse_mode(&mut self) -> ParamMode {
        let mode = match self.peek() {
            Token::Ref => ParamMode::Ref,
            Token::Out => ParamMode::Out,
            Token::In => ParamMode::In,
            _ => return ParamMode::Value,
        };
        self.advance();
        mode
    }

    // ── Types ──────────────────────────────────────────────────────

    fn parse_type(&mut self) -> PResult<TypeSyntax> {
        let start = self.span();
        let predefined = match self.peek() {
            Token::BoolKw => Some(Predefined::Bool),
            Token::IntKw => Some(Predefined::Int),
            Token::LongKw => Some(Predefined::Long),
            Token::DoubleKw => Some(Predefined::Double),
            Token::StringKw => Some(Predefined::String),
            Token::ObjectKw => Some(Predefined::Object),
            _ => None,
        };
        let ty = if let Some(p) = predefined {
            self.advance();
            TypeSyntax {
                kind: TypeSyntaxKind::Predefined(p),
                span: start,
            }
        } else {
            let mut segments = Vec::new();
            loop {
                let (name, _) = self.expect_ident()?;
                let args = if matches!(self.peek(), Token::Lt) {
                    self.parse_type_args()?
                } else {
                    Vec::new()
                };
                segments.push(TypeSegment { name, args });
                if matches!(self.peek(), Token::Dot) && matches!(self.peek_at(1), Token::Ident(_)) {
                    self.advance();
                } else {
                    break;
                }
            }
            TypeSyntax {
                kind: TypeSyntaxKind::Named(segments),
                span: start.merge(self.prev_span()),
            }
        };
        if matches!(self.peek(), Token::Question) && !matches!(self.peek_at(1), Token::Ident(_) | Token::LParen) {
            return Err(CompileError::unsupported("nullable type", self.span()));
        }
        Ok(ty)
    }

    fn parse_type_args(&mut self) -> PResult<Vec<TypeSyntax>> {
        self.expect(&Token::Lt)?;
        let mut args = vec![self.parse_type()?];
        while self.eat(&Token::Comma) {
            args.push(self.parse_type()?);
        }
        self.expect(&Token::Gt)?;
        Ok(args)
    }

    /// Speculatively read `Type name` followed by `=`, `;` or `,`.
    /// Restores the position and returns `None` when the tokens are not a
    /// local declaration.
    fn try_local_type(&mut self) -> Option<TypeSyntax> {
        if !starts_type(self.peek()) {
            return None;
        }
        // `int.MaxValue` and friends are expressions.
        if !matches!(self.peek(), Token::Ident(_)) && matches!(self.peek_at(1), Token::Dot) {
            return None;
        }
        let save = self.pos;
        let ty = self.parse_type().ok();
        let declares = matches!(self.peek(), Token::Ident(_))
            && matches!(self.peek_at(1), Token::Eq | Token::Semicolon | Token::Comma);
        match ty {
            Some(ty) if declares => Some(ty),
            _ => {
                self.pos = save;
                None
            }
        }
    }

    // ── Statements ─────────────────────────────────────────────────

    /// Statements up to (not including) the closing brace.
    fn parse_block_body(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span();
        let kind = match self.peek() {
            Token::LBrace => {
                self.advance();
                let body = self.parse_block_body()?;
                self.expect(&Token::RBrace)?;
                StmtKind::Block(body)
            }
            Token::Semicolon => {
                self.advance();
                StmtKind::Empty
            }
            Token::Return => {
                self.advance();
                let value = if matches!(self.peek(), Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&Token::Semicolon)?;
                StmtKind::Return(value)
            }
            Token::If => {
                self.advance();
                let cond = self.parse_condition()?;
                let then_branch = Box::new(self.parse_embedded_stmt()?);
                let else_branch = if self.eat(&Token::Else) {
                    Some(Box::new(self.parse_embedded_stmt()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            Token::While => {
                self.advance();
                let cond = self.parse_condition()?;
                let body = Box::new(self.parse_embedded_stmt()?);
                StmtKind::While { cond, body }
            }
            Token::For => self.parse_for()?,
            Token::Break => {
                self.advance();
                self.expect(&Token::Semicolon)?;
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                self.expect(&Token::Semicolon)?;
                StmtKind::Continue
            }
            Token::Ident(word) if is_unsupported_statement(word) => {
                return Err(CompileError::unsupported(&format!("{word} statement"), start));
            }
            _ => {
                let kind = self.parse_simple_stmt()?;
                self.expect(&Token::Semicolon)?;
                kind
            }
        };
        Ok(Stmt {
            kind,
            span: start.merge(self.prev_span()),
        })
    }

    /// Body of `if`/`while`/`for`, where declarations are not allowed.
    fn parse_embedded_stmt(&mut self) -> PResult<Stmt> {
        let stmt = self.parse_stmt()?;
        if matches!(stmt.kind, StmtKind::Local { .. }) {
            return Err(CompileError::error(
                "CS1023",
                "Embedded statement cannot be a declaration or labeled statement",
                stmt.span,
            ));
        }
        Ok(stmt)
    }

    fn parse_condition(&mut self) -> PResult<Expr> {
        self.expect(&Token::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        Ok(cond)
    }

    /// Local declaration or expression, without the terminator.
    fn parse_simple_stmt(&mut self) -> PResult<StmtKind> {
        if let Some(ty) = self.try_local_type() {
            let mut declarators = Vec::new();
            loop {
                let (name, name_span) = self.expect_ident()?;
                let init = if self.eat(&Token::Eq) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                declarators.push(Declarator {
                    name,
                    init,
                    span: name_span.merge(self.prev_span()),
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            return Ok(StmtKind::Local { ty, declarators });
        }
        Ok(StmtKind::Expr(self.parse_expr()?))
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        self.advance();
        self.expect(&Token::LParen)?;

        let mut init = Vec::new();
        if !matches!(self.peek(), Token::Semicolon) {
            loop {
                let start = self.span();
                let kind = self.parse_simple_stmt()?;
                let is_local = matches!(kind, StmtKind::Local { .. });
                init.push(Stmt {
                    kind,
                    span: start.merge(self.prev_span()),
                });
                if is_local || !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::Semicolon)?;

        let cond = if matches!(self.peek(), Token::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::Semicolon)?;

        let mut step = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            step.push(self.parse_expr()?);
            while self.eat(&Token::Comma) {
                step.push(self.parse_expr()?);
            }
        }
        self.expect(&Token::RParen)?;
        let body = Box::new(self.parse_embedded_stmt()?);
        Ok(StmtKind::For {
            init,
            cond,
            step,
            body,
        })
    }

    // ── Expressions ────────────────────────────────────────────────

    fn parse_expr(&mut self) -> PResult<Expr> {
        let target = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Eq => None,
            Token::PlusEq => Some(BinOp::Add),
            Token::MinusEq => Some(BinOp::Sub),
            Token::StarEq => Some(BinOp::Mul),
            Token::SlashEq => Some(BinOp::Div),
            Token::PercentEq => Some(BinOp::Rem),
            _ => return Ok(target),
        };
        self.advance();
        let value = self.parse_expr()?;
        let span = target.span.merge(value.span);
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        })
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let cond = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expr()?;
        self.expect(&Token::Colon)?;
        let else_expr = self.parse_expr()?;
        let span = cond.span.merge(else_expr.span);
        Ok(Expr {
            kind: ExprKind::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        })
    }

    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        let span = left.span.merge(right.span);
        Expr {
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        }
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Self::binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::And) {
            let right = self.parse_equality()?;
            left = Self::binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_add()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Gt => BinOp::Gt,
                Token::Le => BinOp::Le,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_add()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> PResult<Expr> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_mul()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let start = self.span();
        let unary = match self.peek() {
            Token::Minus => Some(UnaryOp::Neg),
            Token::Plus => Some(UnaryOp::Plus),
            Token::Bang => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = unary {
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span);
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            });
        }
        if matches!(self.peek(), Token::PlusPlus | Token::MinusMinus) {
            let increment = matches!(self.peek(), Token::PlusPlus);
            self.advance();
            let target = self.parse_unary()?;
            let span = start.merge(target.span);
            return Ok(Expr {
                kind: ExprKind::IncDec {
                    increment,
                    prefix: true,
                    target: Box::new(target),
                },
                span,
            });
        }
        if let Some(cast) = self.try_cast()? {
            return Ok(cast);
        }
        self.parse_postfix()
    }

    /// `(int)x`: only predefined types are recognized as cast targets.
    fn try_cast(&mut self) -> PResult<Option<Expr>> {
        let is_cast = matches!(self.peek(), Token::LParen)
            && is_predefined_type(self.peek_at(1))
            && matches!(self.peek_at(2), Token::RParen);
        if !is_cast {
            return Ok(None);
        }
        let start = self.advance();
        let ty = self.parse_type()?;
        self.expect(&Token::RParen)?;
        let expr = self.parse_unary()?;
        let span = start.merge(expr.span);
        Ok(Some(Expr {
            kind: ExprKind::Cast {
                ty,
                expr: Box::new(expr),
            },
            span,
        }))
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let (name, name_span) = self.expect_ident()?;
                    if matches!(self.peek(), Token::Lt) && self.looks_like_type_args() {
                        return Err(CompileError::unsupported("generic method call", self.span()));
                    }
                    let span = expr.span.merge(name_span);
                    expr = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            name,
                        },
                        span,
                    };
                }
                Token::LParen => {
                    let args = self.parse_args()?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                }
                Token::PlusPlus | Token::MinusMinus => {
                    let increment = matches!(self.peek(), Token::PlusPlus);
                    let end = self.advance();
                    let span = expr.span.merge(end);
                    expr = Expr {
                        kind: ExprKind::IncDec {
                            increment,
                            prefix: false,
                            target: Box::new(expr),
                        },
                        span,
                    };
                }
                Token::Ident(_) | Token::Str(_) | Token::Int(_) | Token::Long(_) | Token::Double(_) => {
                    // Two operands in a row: the previous expression was
                    // missing its terminator.
                    let prev = self.prev_span();
                    return Err(CompileError::error("CS1002", "; expected", Span::new(prev.end, prev.end)));
                }
                _ => return Ok(expr),
            }
        }
    }

    /// After `name`, whether `<` opens a closed type argument list like
    /// `<int>` rather than a comparison.
    fn looks_like_type_args(&self) -> bool {
        is_predefined_type(self.peek_at(1)) && matches!(self.peek_at(2), Token::Gt)
    }

    fn parse_args(&mut self) -> PResult<Vec<Argument>> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            let start = self.span();
            let mode = self.parse_mode();
            if mode == ParamMode::Out && (starts_type(self.peek()) && matches!(self.peek_at(1), Token::Ident(_))) {
                return Err(CompileError::unsupported("out variable declaration", start));
            }
            let expr = self.parse_expr()?;
            args.push(Argument {
                mode,
                span: start.merge(expr.span),
                expr,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let span = self.span();
        let literal = |kind| Expr { kind, span };
        let expr = match self.peek().clone() {
            Token::Int(v) => literal(ExprKind::Int(v)),
            Token::Long(v) => literal(ExprKind::Long(v)),
            Token::Double(v) => literal(ExprKind::Double(v)),
            Token::Str(s) => literal(ExprKind::Str(s)),
            Token::True => literal(ExprKind::Bool(true)),
            Token::False => literal(ExprKind::Bool(false)),
            Token::Null => literal(ExprKind::Null),
            Token::Ident(name) => literal(ExprKind::Name(name)),
            Token::BoolKw | Token::IntKw | Token::LongKw | Token::DoubleKw | Token::StringKw | Token::ObjectKw => {
                let ty = self.parse_type()?;
                let TypeSyntaxKind::Predefined(p) = ty.kind else {
                    return Err(self.invalid_term());
                };
                return Ok(Expr {
                    kind: ExprKind::PredefinedType(p),
                    span,
                });
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                return Ok(Expr {
                    kind: ExprKind::Paren(Box::new(inner)),
                    span: span.merge(self.prev_span()),
                });
            }
            Token::New => {
                self.advance();
                if !starts_type(self.peek()) {
                    return Err(CompileError::unsupported("anonymous object or implicitly typed new", self.span()));
                }
                let ty = self.parse_type()?;
                if matches!(self.peek(), Token::LBrace) {
                    return Err(CompileError::unsupported("object or collection initializer", self.span()));
                }
                if !matches!(self.peek(), Token::LParen) {
                    return Err(CompileError::error(
                        "CS1526",
                        "A new expression requires an argument list or (), [], or {} after type",
                        self.span(),
                    ));
                }
                let args = self.parse_args()?;
                return Ok(Expr {
                    kind: ExprKind::New { ty, args },
                    span: span.merge(self.prev_span()),
                });
            }
            _ => return Err(self.invalid_term()),
        };
        self.advance();
        Ok(expr)
    }

    fn invalid_term(&self) -> CompileError {
        CompileError::error(
            "CS1525",
            format!("Invalid expression term '{}'", self.peek().text()),
            self.span(),
        )
    }
}

fn is_predefined_type(token: &Token) -> bool {
    matches!(
        token,
        Token::BoolKw | Token::IntKw | Token::LongKw | Token::DoubleKw | Token::StringKw | Token::ObjectKw
    )
}

fn starts_type(token: &Token) -> bool {
    is_predefined_type(token) || matches!(token, Token::Ident(_))
}

fn is_keyword(token: &Token) -> bool {
    !matches!(
        token,
        Token::Ident(_)
            | Token::Int(_)
            | Token::Long(_)
            | Token::Double(_)
            | Token::Str(_)
            | Token::Eof
    ) && token.text().chars().all(|c| c.is_ascii_alphabetic())
}

/// Statement keywords outside the supported subset. The lexer does not
/// reserve them, so they arrive as identifiers.
fn is_unsupported_statement(word: &str) -> bool {
    matches!(
        word,
        "switch" | "do" | "foreach" | "try" | "throw" | "goto" | "lock" | "checked" | "unchecked" | "yield"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::toolchain::lexer::lex;

    fn parse_src(src: &str) -> CompilationUnit {
        parse(lex(src).unwrap()).unwrap()
    }

    fn parse_err(src: &str) -> CompileError {
        parse(lex(src).unwrap()).unwrap_err().remove(0)
    }

    fn body(stmts: &str) -> Vec<Stmt> {
        let unit = parse_src(&format!("static class C {{ static void M() {{ {stmts} }} }}"));
        let Member::Class(class) = &unit.members[0] else { panic!("expected class") };
        class.methods[0].body.clone()
    }

    fn expr(src: &str) -> Expr {
        match body(&format!("{src};")).remove(0).kind {
            StmtKind::Expr(e) => e,
            other => panic!("expected expression, got {other:?}"),
        }
    }

    #[test]
    fn generated_skeleton_shape() {
        let unit = parse_src(
            "using System;\nusing System.Collections.Generic;\n\nnamespace A.B\n{\n    public static class Executer\n    {\n        public static int Execute(ref int it, out string s)\n        {\n            s = null; return it;\n        }\n    }\n}",
        );
        assert_eq!(unit.usings.len(), 2);
        assert_eq!(unit.usings[1].name, "System.Collections.Generic");
        let Member::Namespace(ns) = &unit.members[0] else { panic!("expected namespace") };
        assert_eq!(ns.name, "A.B");
        let Member::Class(class) = &ns.members[0] else { panic!("expected class") };
        assert!(class.modifiers.public && class.modifiers.is_static);
        let method = &class.methods[0];
        assert_eq!(method.name, "Execute");
        assert_eq!(method.params[0].mode, ParamMode::Ref);
        assert_eq!(method.params[1].mode, ParamMode::Out);
        assert_eq!(method.body.len(), 2);
    }

    #[test]
    fn nested_classes_and_namespaces() {
        let unit = parse_src("namespace A { namespace B { class Outer { class Inner { } static void M() { } } } }");
        let Member::Namespace(a) = &unit.members[0] else { panic!() };
        let Member::Namespace(b) = &a.members[0] else { panic!() };
        let Member::Class(outer) = &b.members[0] else { panic!() };
        assert_eq!(outer.classes[0].name, "Inner");
        assert_eq!(outer.methods[0].name, "M");
    }

    #[test]
    fn precedence() {
        let e = expr("a + b * c");
        let ExprKind::Binary { op: BinOp::Add, right, .. } = e.kind else { panic!() };
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));

        let e = expr("x = a < b && c == d ? 1 : 2");
        let ExprKind::Assign { op: None, value, .. } = e.kind else { panic!() };
        let ExprKind::Conditional { cond, .. } = value.kind else { panic!() };
        assert!(matches!(cond.kind, ExprKind::Binary { op: BinOp::And, .. }));
    }

    #[test]
    fn assignment_is_right_associative() {
        let e = expr("a = b += 1");
        let ExprKind::Assign { op: None, value, .. } = e.kind else { panic!() };
        assert!(matches!(value.kind, ExprKind::Assign { op: Some(BinOp::Add), .. }));
    }

    #[test]
    fn local_declarations_with_generic_types() {
        let stmts = body("List<string> xs = new List<string>(); var n = 1, m; int.Parse(\"1\"); a < b;");
        let StmtKind::Local { ty, declarators } = &stmts[0].kind else { panic!() };
        assert_eq!(ty.display(), "List<string>");
        assert_eq!(declarators.len(), 1);
        let StmtKind::Local { ty, declarators } = &stmts[1].kind else { panic!() };
        assert!(ty.is_var());
        assert_eq!(declarators.len(), 2);
        assert!(matches!(stmts[2].kind, StmtKind::Expr(_)));
        assert!(matches!(stmts[3].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn casts_and_postfix() {
        let e = expr("(int)x.Length");
        let ExprKind::Cast { ty, expr: inner } = e.kind else { panic!() };
        assert_eq!(ty.display(), "int");
        assert!(matches!(inner.kind, ExprKind::Member { .. }));

        let e = expr("(x) - 1");
        assert!(matches!(e.kind, ExprKind::Binary { op: BinOp::Sub, .. }));

        let e = expr("value++");
        assert!(matches!(e.kind, ExprKind::IncDec { increment: true, prefix: false, .. }));
    }

    #[test]
    fn call_argument_modes() {
        let e = expr("F(1, ref a, out b, in c)");
        let ExprKind::Call { args, .. } = e.kind else { panic!() };
        let modes: Vec<ParamMode> = args.iter().map(|a| a.mode).collect();
        assert_eq!(modes, [ParamMode::Value, ParamMode::Ref, ParamMode::Out, ParamMode::In]);
    }

    #[test]
    fn control_flow() {
        let stmts = body("if (a) b(); else { c(); } while (true) break; for (int i = 0; i < 3; i++) continue; for (;;) { }");
        assert!(matches!(stmts[0].kind, StmtKind::If { else_branch: Some(_), .. }));
        assert!(matches!(stmts[1].kind, StmtKind::While { .. }));
        let StmtKind::For { init, cond, step, .. } = &stmts[2].kind else { panic!() };
        assert_eq!((init.len(), cond.is_some(), step.len()), (1, true, 1));
        assert!(matches!(&stmts[3].kind, StmtKind::For { cond: None, .. }));
    }

    #[test]
    fn missing_semicolon() {
        let err = parse_err("class C { static int M() { return 1 } }");
        assert_eq!(err.code, "CS1002");
        let err = parse_err("class C { static void M() { var x = 1 var y = 2; } }");
        assert_eq!(err.code, "CS1002");
    }

    #[test]
    fn syntax_error_codes() {
        assert_eq!(parse_err("class C { static void M() { x = ; } }").code, "CS1525");
        assert_eq!(parse_err("class C { static void M() { ").code, "CS1513");
        assert_eq!(parse_err("class C { static void M( { } }").code, "CS1001");
        assert_eq!(parse_err("class C { } }").code, "CS1022");
        assert_eq!(parse_err("static void M() { }").code, "CS0116");
        assert_eq!(parse_err("class C { static void M() { if (a) int x = 1; } }").code, "CS1023");
        assert_eq!(parse_err("class C { static void M() { F(a; } }").code, "CS1026");
    }

    #[test]
    fn unsupported_constructs() {
        assert_eq!(parse_err("class C { int x; }").code, "DC0001");
        assert_eq!(parse_err("class C { C() { } }").code, "DC0001");
        assert_eq!(parse_err("class C { static void M() { foreach (var x in xs) { } } }").code, "DC0001");
        assert_eq!(parse_err("class C { static void M() { F(out var x); } }").code, "DC0001");
    }
}
