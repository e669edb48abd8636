use crate::script::ScriptError;
use crate::script::ast::*;
use crate::script::lexer::{Keyword, Lexer, Punct, Token, TokenKind};
use std::rc::Rc;

type ParseResult<T> = Result<T, ScriptError>;

/// 语句与表达式的嵌套层数上限
pub const MAX_NESTING_DEPTH: usize = 100;

/// 解析一个源码单元
pub fn parse_program(source: &str, unit: &str) -> ParseResult<Program> {
    let tokens = Lexer::new(source, unit).tokenize()?;
    let mut parser = Parser {
        tokens,
        current: 0,
        unit: Rc::from(unit),
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.is_at_end() {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

/// 二元运算符优先级，数字越大结合越紧
fn binary_precedence(kind: &TokenKind) -> Option<(u8, BinaryOp)> {
    let entry = match kind {
        TokenKind::Punct(Punct::Eq) => (3, BinaryOp::Eq),
        TokenKind::Punct(Punct::NotEq) => (3, BinaryOp::NotEq),
        TokenKind::Punct(Punct::StrictEq) => (3, BinaryOp::StrictEq),
        TokenKind::Punct(Punct::StrictNotEq) => (3, BinaryOp::StrictNotEq),
        TokenKind::Punct(Punct::Less) => (4, BinaryOp::Less),
        TokenKind::Punct(Punct::LessEq) => (4, BinaryOp::LessEq),
        TokenKind::Punct(Punct::Greater) => (4, BinaryOp::Greater),
        TokenKind::Punct(Punct::GreaterEq) => (4, BinaryOp::GreaterEq),
        TokenKind::Keyword(Keyword::Instanceof) => (4, BinaryOp::Instanceof),
        TokenKind::Keyword(Keyword::In) => (4, BinaryOp::In),
        TokenKind::Punct(Punct::Plus) => (5, BinaryOp::Add),
        TokenKind::Punct(Punct::Minus) => (5, BinaryOp::Sub),
        TokenKind::Punct(Punct::Star) => (6, BinaryOp::Mul),
        TokenKind::Punct(Punct::Slash) => (6, BinaryOp::Div),
        TokenKind::Punct(Punct::Percent) => (6, BinaryOp::Rem),
        _ => return None,
    };
    Some(entry)
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
    unit: Rc<str>,
    depth: usize,
}

impl Parser {
    // === token 工具 ===

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn check_punct(&self, punct: Punct) -> bool {
        *self.peek_kind() == TokenKind::Punct(punct)
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        *self.peek_kind() == TokenKind::Keyword(keyword)
    }

    fn match_punct(&mut self, punct: Punct) -> bool {
        if self.check_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, keyword: Keyword) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            unit: self.unit.to_string(),
            line: token.line,
            column: token.column,
            message: message.into(),
        }
    }

    fn expect_punct(&mut self, punct: Punct, what: &str) -> ParseResult<Token> {
        if self.check_punct(punct) {
            Ok(self.advance())
        } else {
            Err(self.error_at(self.peek(), format!("expected {}", what)))
        }
    }

    fn identifier(&mut self, what: &str) -> ParseResult<Rc<str>> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_at(self.peek(), format!("expected {}", what))),
        }
    }

    /// 可选分号：显式分号、`}`、EOF 或换行都可以结束语句
    fn end_statement(&mut self) -> ParseResult<()> {
        if self.match_punct(Punct::Semicolon)
            || self.check_punct(Punct::RightBrace)
            || self.is_at_end()
            || self.peek().newline_before
        {
            Ok(())
        } else {
            Err(self.error_at(self.peek(), "expected ';'"))
        }
    }

    /// 递归进入一层嵌套结构
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error_at(self.peek(), "nesting too deep"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // === 语句 ===

    fn statement(&mut self) -> ParseResult<Stmt> {
        self.nested(Self::statement_body)
    }

    fn statement_body(&mut self) -> ParseResult<Stmt> {
        let line = self.peek().line;
        let kind = match self.peek_kind().clone() {
            TokenKind::Punct(Punct::LeftBrace) => StmtKind::Block(self.block()?),
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                StmtKind::Empty
            }
            TokenKind::Keyword(Keyword::Var) => self.declaration(DeclKind::Var)?,
            TokenKind::Keyword(Keyword::Let) => self.declaration(DeclKind::Let)?,
            TokenKind::Keyword(Keyword::Const) => self.declaration(DeclKind::Const)?,
            TokenKind::Keyword(Keyword::Function)
                if matches!(
                    self.tokens.get(self.current + 1).map(|t| &t.kind),
                    Some(TokenKind::Identifier(_))
                ) =>
            {
                self.advance();
                StmtKind::Function(self.function_rest(line)?)
            }
            TokenKind::Keyword(Keyword::If) => self.if_statement()?,
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LeftParen, "'(' after while")?;
                let test = self.expression()?;
                self.expect_punct(Punct::RightParen, "')' after condition")?;
                let body = Box::new(self.statement()?);
                StmtKind::While { test, body }
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.advance();
                let body = Box::new(self.statement()?);
                if !self.match_keyword(Keyword::While) {
                    return Err(self.error_at(self.peek(), "expected 'while' after do body"));
                }
                self.expect_punct(Punct::LeftParen, "'(' after while")?;
                let test = self.expression()?;
                self.expect_punct(Punct::RightParen, "')' after condition")?;
                self.match_punct(Punct::Semicolon);
                StmtKind::DoWhile { body, test }
            }
            TokenKind::Keyword(Keyword::For) => self.for_statement()?,
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.check_punct(Punct::Semicolon)
                    || self.check_punct(Punct::RightBrace)
                    || self.is_at_end()
                    || self.peek().newline_before
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement()?;
                StmtKind::Return(value)
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.end_statement()?;
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.end_statement()?;
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Throw) => {
                let token = self.advance();
                if self.peek().newline_before {
                    return Err(self.error_at(&token, "illegal newline after throw"));
                }
                let value = self.expression()?;
                self.end_statement()?;
                StmtKind::Throw(value)
            }
            TokenKind::Keyword(Keyword::Try) => self.try_statement()?,
            _ => {
                let expr = self.expression()?;
                self.end_statement()?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { kind, line })
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect_punct(Punct::LeftBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check_punct(Punct::RightBrace) {
            if self.is_at_end() {
                return Err(self.error_at(self.peek(), "expected '}' before end of input"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn declaration(&mut self, kind: DeclKind) -> ParseResult<StmtKind> {
        self.advance();
        let decls = self.declarators(kind)?;
        self.end_statement()?;
        Ok(StmtKind::Declare { kind, decls })
    }

    fn declarators(&mut self, kind: DeclKind) -> ParseResult<Vec<(Rc<str>, Option<Expr>)>> {
        let mut decls = Vec::new();
        loop {
            let name_token = self.peek().clone();
            let name = self.identifier("a variable name")?;
            let init = if self.match_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(self.error_at(&name_token, "missing initializer in const declaration"));
            }
            decls.push((name, init));
            if !self.match_punct(Punct::Comma) {
                return Ok(decls);
            }
        }
    }

    fn if_statement(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        self.expect_punct(Punct::LeftParen, "'(' after if")?;
        let test = self.expression()?;
        self.expect_punct(Punct::RightParen, "')' after condition")?;
        let then = Box::new(self.statement()?);
        let otherwise = if self.match_keyword(Keyword::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            test,
            then,
            otherwise,
        })
    }

    fn for_statement(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        self.expect_punct(Punct::LeftParen, "'(' after for")?;

        // for (name in object) / for (var name in object)
        let decl_kind = match self.peek_kind() {
            TokenKind::Keyword(Keyword::Var) => Some(DeclKind::Var),
            TokenKind::Keyword(Keyword::Let) => Some(DeclKind::Let),
            TokenKind::Keyword(Keyword::Const) => Some(DeclKind::Const),
            _ => None,
        };
        let offset = usize::from(decl_kind.is_some());
        let is_for_in = matches!(
            self.tokens.get(self.current + offset).map(|t| &t.kind),
            Some(TokenKind::Identifier(_))
        ) && matches!(
            self.tokens.get(self.current + offset + 1).map(|t| &t.kind),
            Some(TokenKind::Keyword(Keyword::In))
        );
        if is_for_in {
            if decl_kind.is_some() {
                self.advance();
            }
            let name = self.identifier("a loop variable")?;
            self.advance();
            let object = self.expression()?;
            self.expect_punct(Punct::RightParen, "')' after for-in")?;
            let body = Box::new(self.statement()?);
            return Ok(StmtKind::ForIn {
                kind: decl_kind,
                name,
                object,
                body,
            });
        }

        let init = if self.check_punct(Punct::Semicolon) {
            None
        } else {
            let line = self.peek().line;
            let kind = match decl_kind {
                Some(kind) => {
                    self.advance();
                    StmtKind::Declare {
                        kind,
                        decls: self.declarators(kind)?,
                    }
                }
                None => StmtKind::Expr(self.expression()?),
            };
            Some(Box::new(Stmt { kind, line }))
        };
        self.expect_punct(Punct::Semicolon, "';' after for initializer")?;
        let test = if self.check_punct(Punct::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::Semicolon, "';' after for condition")?;
        let update = if self.check_punct(Punct::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::RightParen, "')' after for clauses")?;
        let body = Box::new(self.statement()?);
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> ParseResult<StmtKind> {
        let try_token = self.advance();
        let block = self.block()?;
        let handler = if self.match_keyword(Keyword::Catch) {
            self.expect_punct(Punct::LeftParen, "'(' after catch")?;
            let name = self.identifier("a catch parameter")?;
            self.expect_punct(Punct::RightParen, "')' after catch parameter")?;
            Some((name, self.block()?))
        } else {
            None
        };
        let finalizer = if self.match_keyword(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error_at(&try_token, "missing catch or finally after try"));
        }
        Ok(StmtKind::Try {
            block,
            handler,
            finalizer,
        })
    }

    /// 解析 `function` 关键字之后的部分（可选名称、参数、函数体）
    fn function_rest(&mut self, line: u32) -> ParseResult<Rc<FunctionDecl>> {
        let name = match self.peek_kind() {
            TokenKind::Identifier(_) => Some(self.identifier("a function name")?),
            _ => None,
        };
        self.expect_punct(Punct::LeftParen, "'(' before parameters")?;
        let mut params = Vec::new();
        if !self.check_punct(Punct::RightParen) {
            loop {
                params.push(self.identifier("a parameter name")?);
                if !self.match_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RightParen, "')' after parameters")?;
        let body = self.block()?;
        Ok(Rc::new(FunctionDecl {
            name,
            params,
            body,
            unit: self.unit.clone(),
            line,
        }))
    }

    // === 表达式 ===

    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        self.nested(Self::assignment_body)
    }

    fn assignment_body(&mut self) -> ParseResult<Expr> {
        let target_token = self.peek().clone();
        let target = self.conditional()?;
        let op = match self.peek_kind() {
            TokenKind::Punct(Punct::Assign) => None,
            TokenKind::Punct(Punct::PlusAssign) => Some(BinaryOp::Add),
            TokenKind::Punct(Punct::MinusAssign) => Some(BinaryOp::Sub),
            TokenKind::Punct(Punct::StarAssign) => Some(BinaryOp::Mul),
            TokenKind::Punct(Punct::SlashAssign) => Some(BinaryOp::Div),
            TokenKind::Punct(Punct::PercentAssign) => Some(BinaryOp::Rem),
            _ => return Ok(target),
        };
        if !target.is_assignable() {
            return Err(self.error_at(&target_token, "invalid assignment target"));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let test = self.logical_or()?;
        if !self.match_punct(Punct::Question) {
            return Ok(test);
        }
        let then = self.assignment()?;
        self.expect_punct(Punct::Colon, "':' in conditional expression")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logical_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.logical_and()?;
        while self.match_punct(Punct::Or) {
            let right = self.logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.binary(0)?;
        while self.match_punct(Punct::And) {
            let right = self.binary(0)?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// 优先级爬升
    fn binary(&mut self, min_precedence: u8) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        while let Some((precedence, op)) = binary_precedence(self.peek_kind()) {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.binary(precedence + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        let op = match token.kind {
            TokenKind::Punct(Punct::Not) => UnaryOp::Not,
            TokenKind::Punct(Punct::Minus) => UnaryOp::Negate,
            TokenKind::Punct(Punct::Plus) => UnaryOp::Plus,
            TokenKind::Keyword(Keyword::Typeof) => UnaryOp::Typeof,
            TokenKind::Keyword(Keyword::Delete) => {
                self.advance();
                let target = self.nested(Self::unary)?;
                return Ok(Expr::Delete(Box::new(target)));
            }
            TokenKind::Punct(Punct::PlusPlus) | TokenKind::Punct(Punct::MinusMinus) => {
                self.advance();
                let target = self.nested(Self::unary)?;
                if !target.is_assignable() {
                    return Err(self.error_at(&token, "invalid increment/decrement operand"));
                }
                return Ok(Expr::Update {
                    increment: token.kind == TokenKind::Punct(Punct::PlusPlus),
                    prefix: true,
                    target: Box::new(target),
                });
            }
            _ => return self.postfix(),
        };
        self.advance();
        let expr = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        let expr = self.call()?;
        let increment = match self.peek_kind() {
            TokenKind::Punct(Punct::PlusPlus) => true,
            TokenKind::Punct(Punct::MinusMinus) => false,
            _ => return Ok(expr),
        };
        if self.peek().newline_before {
            return Ok(expr);
        }
        if !expr.is_assignable() {
            return Err(self.error_at(&token, "invalid increment/decrement operand"));
        }
        self.advance();
        Ok(Expr::Update {
            increment,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call(&mut self) -> ParseResult<Expr> {
        let mut expr = if self.check_keyword(Keyword::New) {
            self.new_expression()?
        } else {
            self.primary()?
        };
        loop {
            if self.match_punct(Punct::LeftParen) {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if !self.member_suffix(&mut expr)? {
                return Ok(expr);
            }
        }
    }

    /// 解析 `.name` 或 `[index]`，返回是否消费了后缀
    fn member_suffix(&mut self, expr: &mut Expr) -> ParseResult<bool> {
        if self.match_punct(Punct::Dot) {
            let property = match self.peek_kind().clone() {
                TokenKind::Identifier(name) => name,
                // 关键字可以作为属性名（如 obj.new、e.catch）
                TokenKind::Keyword(keyword) => Rc::from(format!("{:?}", keyword).to_lowercase()),
                _ => return Err(self.error_at(self.peek(), "expected property name after '.'")),
            };
            self.advance();
            let object = std::mem::replace(expr, Expr::Null);
            *expr = Expr::Member {
                object: Box::new(object),
                property,
            };
            Ok(true)
        } else if self.match_punct(Punct::LeftBracket) {
            let index = self.expression()?;
            self.expect_punct(Punct::RightBracket, "']' after index")?;
            let object = std::mem::replace(expr, Expr::Null);
            *expr = Expr::Index {
                object: Box::new(object),
                index: Box::new(index),
            };
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn new_expression(&mut self) -> ParseResult<Expr> {
        self.advance();
        let mut callee = if self.check_keyword(Keyword::New) {
            self.nested(Self::new_expression)?
        } else {
            self.primary()?
        };
        while self.member_suffix(&mut callee)? {}
        let args = if self.match_punct(Punct::LeftParen) {
            self.arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    fn arguments(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check_punct(Punct::RightParen) {
            loop {
                args.push(self.assignment()?);
                if !self.match_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RightParen, "')' after arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let expr = match token.kind.clone() {
            TokenKind::Number(n) => Expr::Number(n),
            TokenKind::String(s) => Expr::String(s),
            TokenKind::Identifier(name) => Expr::Ident(name),
            TokenKind::Keyword(Keyword::True) => Expr::Bool(true),
            TokenKind::Keyword(Keyword::False) => Expr::Bool(false),
            TokenKind::Keyword(Keyword::Null) => Expr::Null,
            TokenKind::Keyword(Keyword::This) => Expr::This,
            TokenKind::Keyword(Keyword::Function) => Expr::Function(self.function_rest(token.line)?),
            TokenKind::Punct(Punct::LeftParen) => {
                let expr = self.expression()?;
                self.expect_punct(Punct::RightParen, "')' after expression")?;
                expr
            }
            TokenKind::Punct(Punct::LeftBracket) => {
                let mut items = Vec::new();
                while !self.check_punct(Punct::RightBracket) {
                    items.push(self.assignment()?);
                    if !self.match_punct(Punct::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punct::RightBracket, "']' after array elements")?;
                Expr::Array(items)
            }
            TokenKind::Punct(Punct::LeftBrace) => {
                let mut props = Vec::new();
                while !self.check_punct(Punct::RightBrace) {
                    let key_token = self.advance();
                    let key: Rc<str> = match key_token.kind.clone() {
                        TokenKind::Identifier(name) | TokenKind::String(name) => name,
                        TokenKind::Number(n) => Rc::from(crate::script::value::number_to_string(n)),
                        TokenKind::Keyword(keyword) => {
                            Rc::from(format!("{:?}", keyword).to_lowercase())
                        }
                        _ => return Err(self.error_at(&key_token, "expected property key")),
                    };
                    self.expect_punct(Punct::Colon, "':' after property key")?;
                    props.push((key, self.assignment()?));
                    if !self.match_punct(Punct::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punct::RightBrace, "'}' after object literal")?;
                Expr::Object(props)
            }
            TokenKind::Eof => return Err(self.error_at(&token, "unexpected end of input")),
            _ => return Err(self.error_at(&token, "unexpected token")),
        };
        Ok(expr)
    }
}
