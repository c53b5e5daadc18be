use crate::ast::{Accessor, BinOp, Expr, Lambda, Stmt, UnaryOp};
use crate::lexer::{Token, Tokenizer};
use crate::value::format_number;
use std::sync::Arc;

const MAX_NESTING: usize = 128;

/// Parse a complete expression.
#[cfg(test)]
pub fn parse_expression(input: &str) -> Result<Expr, String> {
    let mut parser = Parser::new(Tokenizer::tokenize(input)?);
    let expr = parser.parse_expr()?;
    parser.finish()?;
    Ok(expr)
}

/// Parse the tail of a tag reference, e.g. `.bar(1, 'x').baz` in
/// `foo.bar(1, 'x').baz`. A failure becomes a single [`Accessor::Invalid`]
/// so the tag reports it when rendered.
pub fn parse_chain(input: &str) -> Vec<Accessor> {
    let result = Tokenizer::tokenize(input).and_then(|tokens| {
        let mut parser = Parser::new(tokens);
        let chain = parser.parse_accessors()?;
        parser.finish()?;
        Ok(chain)
    });
    result.unwrap_or_else(|message| vec![Accessor::Invalid(message)])
}

/// Recursive-descent parser, loosest binding first:
///
/// ```text
/// expr    := or
/// or      := and ( "||" and )*
/// and     := eq ( "&&" eq )*
/// eq      := add ( ( "==" | "!=" ) add )*
/// add     := unary ( "+" unary )*
/// unary   := ( "!" | "-" ) unary | postfix
/// postfix := primary ( "." name | "[" expr "]" | "(" args ")" )*
/// primary := literal | ident | "(" expr ")" | array | object | function
/// ```
///
/// `depth` counts every level of the tree being built, including the
/// left-leaning nodes the loops produce, and stops at `MAX_NESTING`.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek(0) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.consume() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(format!("expected {}, found {}", describe(&token), describe(&t))),
            None => Err(format!("expected {}, found end of input", describe(&token))),
        }
    }

    fn finish(&self) -> Result<(), String> {
        match self.peek(0) {
            None => Ok(()),
            Some(t) => Err(unexpected(t)),
        }
    }

    fn parse_accessors(&mut self) -> Result<Vec<Accessor>, String> {
        let mut chain = Vec::new();
        while let Some(token) = self.peek(0).cloned() {
            match token {
                Token::Dot => {
                    self.consume();
                    chain.push(Accessor::Member(self.member_name()?));
                }
                Token::LBracket => {
                    self.consume();
                    let key = match self.consume() {
                        Some(Token::StringLit(s)) => s,
                        Some(Token::Number(n)) => format_number(n),
                        Some(t) => return Err(format!("expected a literal key, found {}", describe(&t))),
                        None => return Err("expected a literal key, found end of input".into()),
                    };
                    self.expect(Token::RBracket)?;
                    chain.push(Accessor::Member(key));
                }
                Token::LParen => {
                    self.consume();
                    chain.push(Accessor::Call(self.parse_args()?));
                }
                t => return Err(unexpected(&t)),
            }
        }
        Ok(chain)
    }

    fn member_name(&mut self) -> Result<String, String> {
        match self.consume() {
            Some(Token::Ident(name)) => Ok(name),
            Some(t) => Err(format!("expected a property name after `.`, found {}", describe(&t))),
            None => Err("expected a property name after `.`, found end of input".into()),
        }
    }

    /// One level deeper. A failed parse is abandoned, so the counter is
    /// only restored on success.
    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err("expression nests too deeply".to_string());
        }
        Ok(())
    }

    pub fn parse_expr(&mut self) -> Result<Expr, String> {
        self.descend()?;
        let expr = self.parse_or()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mark = self.depth;
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            self.descend()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mark = self.depth;
        let mut lhs = self.parse_eq()?;
        while self.eat(&Token::AndAnd) {
            self.descend()?;
            let rhs = self.parse_eq()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_eq(&mut self) -> Result<Expr, String> {
        let mark = self.depth;
        let mut lhs = self.parse_add()?;
        loop {
            let op = match self.peek(0) {
                Some(Token::EqEq) => BinOp::Eq,
                Some(Token::NotEq) => BinOp::NotEq,
                _ => break,
            };
            self.consume();
            self.descend()?;
            let rhs = self.parse_add()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_add(&mut self) -> Result<Expr, String> {
        let mark = self.depth;
        let mut lhs = self.parse_unary()?;
        while self.eat(&Token::Plus) {
            self.descend()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::Add, Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        let op = match self.peek(0) {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.consume();
        self.descend()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mark = self.depth;
        let mut expr = self.parse_primary()?;

        // Handle suffixes: .attr, ['key'], (args)
        loop {
            match self.peek(0) {
                Some(Token::Dot) => {
                    self.consume();
                    self.descend()?;
                    expr = Expr::Member(Box::new(expr), self.member_name()?);
                }
                Some(Token::LBracket) => {
                    self.consume();
                    self.descend()?;
                    let idx = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                Some(Token::LParen) => {
                    self.consume();
                    self.descend()?;
                    let args = self.parse_args()?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => break,
            }
        }
        self.depth = mark;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::StringLit(s)) => Ok(Expr::String(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Null) => Ok(Expr::Null),
            Some(Token::Undefined) => Ok(Expr::Undefined),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::LParen) => {
                let e = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(e)
            }
            Some(Token::LBracket) => {
                let items = self.parse_list(Token::RBracket, Self::parse_expr)?;
                Ok(Expr::Array(items))
            }
            Some(Token::LBrace) => {
                let entries = self.parse_list(Token::RBrace, Self::parse_entry)?;
                Ok(Expr::Object(entries))
            }
            Some(Token::Function) => self.parse_function(),
            Some(t) => Err(unexpected(&t)),
            None => Err("expected an expression, found end of input".to_string()),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, String> {
        self.parse_list(Token::RParen, Self::parse_expr)
    }

    /// Comma separated items up to `close`; a trailing comma is allowed.
    fn parse_list<T>(
        &mut self,
        close: Token,
        mut item: impl FnMut(&mut Self) -> Result<T, String>,
    ) -> Result<Vec<T>, String> {
        let mut items = Vec::new();
        loop {
            if self.eat(&close) {
                return Ok(items);
            }
            items.push(item(self)?);
            if !self.eat(&Token::Comma) {
                self.expect(close.clone())?;
                return Ok(items);
            }
        }
    }

    fn parse_entry(&mut self) -> Result<(String, Expr), String> {
        let key = match self.consume() {
            Some(Token::Ident(k)) | Some(Token::StringLit(k)) => k,
            Some(Token::Number(n)) => format_number(n),
            Some(t) => return Err(format!("expected an object key, found {}", describe(&t))),
            None => return Err("expected an object key, found end of input".to_string()),
        };
        self.expect(Token::Colon)?;
        Ok((key, self.parse_expr()?))
    }

    fn parse_function(&mut self) -> Result<Expr, String> {
        // An optional name is accepted and ignored.
        if let Some(Token::Ident(_)) = self.peek(0) {
            self.consume();
        }
        self.expect(Token::LParen)?;
        let params = self.parse_list(Token::RParen, |p| match p.consume() {
            Some(Token::Ident(name)) => Ok(name),
            Some(t) => Err(format!("expected a parameter name, found {}", describe(&t))),
            None => Err("expected a parameter name, found end of input".to_string()),
        })?;
        self.expect(Token::LBrace)?;

        let mut body = Vec::new();
        loop {
            match self.peek(0) {
                Some(Token::RBrace) => {
                    self.consume();
                    break;
                }
                Some(Token::Semicolon) => {
                    self.consume();
                }
                Some(Token::Return) => {
                    self.consume();
                    let value = match self.peek(0) {
                        Some(Token::Semicolon | Token::RBrace) => None,
                        _ => Some(self.parse_expr()?),
                    };
                    body.push(Stmt::Return(value));
                    self.end_statement()?;
                }
                Some(_) => {
                    let expr = self.parse_expr()?;
                    body.push(Stmt::Expr(expr));
                    self.end_statement()?;
                }
                None => return Err("unterminated function body".to_string()),
            }
        }

        Ok(Expr::Function(Arc::new(Lambda { params, body })))
    }

    fn end_statement(&mut self) -> Result<(), String> {
        match self.peek(0) {
            Some(Token::Semicolon) => {
                self.consume();
                Ok(())
            }
            Some(Token::RBrace) => Ok(()),
            Some(t) => Err(unexpected(t)),
            None => Err("unterminated function body".to_string()),
        }
    }
}

fn unexpected(token: &Token) -> String {
    match token {
        Token::Assign => "assignment is not supported".to_string(),
        t => format!("unexpected {}", describe(t)),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::True => "`true`".into(),
        Token::False => "`false`".into(),
        Token::Null => "`null`".into(),
        Token::Undefined => "`undefined`".into(),
        Token::Function => "`function`".into(),
        Token::Return => "`return`".into(),
        Token::EqEq => "`==`".into(),
        Token::NotEq => "`!=`".into(),
        Token::AndAnd => "`&&`".into(),
        Token::OrOr => "`||`".into(),
        Token::Assign => "`=`".into(),
        Token::Bang => "`!`".into(),
        Token::Plus => "`+`".into(),
        Token::Minus => "`-`".into(),
        Token::Dot => "`.`".into(),
        Token::Comma => "`,`".into(),
        Token::Colon => "`:`".into(),
        Token::Semicolon => "`;`".into(),
        Token::LParen => "`(`".into(),
        Token::RParen => "`)`".into(),
        Token::LBracket => "`[`".into(),
        Token::RBracket => "`]`".into(),
        Token::LBrace => "`{`".into(),
        Token::RBrace => "`}`".into(),
        Token::Ident(name) => format!("`{name}`"),
        Token::Number(n) => format!("`{}`", format_number(*n)),
        Token::StringLit(s) => format!("string {s:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    #[test]
    fn literals_and_collections() {
        assert_eq!(
            parse_expression("[1, 'two', true, null, { a : 1, 'b c': [] },]").unwrap(),
            Expr::Array(vec![
                Expr::Number(1.0),
                Expr::String("two".into()),
                Expr::Bool(true),
                Expr::Null,
                Expr::Object(vec![
                    ("a".into(), Expr::Number(1.0)),
                    ("b c".into(), Expr::Array(vec![])),
                ]),
            ])
        );
    }

    #[test]
    fn member_and_call_chains() {
        assert_eq!(
            parse_expression("data.foo(1)['x']").unwrap(),
            Expr::Index(
                Box::new(Expr::Call(
                    Box::new(Expr::Member(ident("data"), "foo".into())),
                    vec![Expr::Number(1.0)]
                )),
                Box::new(Expr::String("x".into()))
            )
        );
    }

    #[test]
    fn operator_precedence() {
        // a || b && c == d + e
        let expr = parse_expression("a || b && c === d + e").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                ident("a"),
                BinOp::Or,
                Box::new(Expr::Binary(
                    ident("b"),
                    BinOp::And,
                    Box::new(Expr::Binary(
                        ident("c"),
                        BinOp::Eq,
                        Box::new(Expr::Binary(ident("d"), BinOp::Add, ident("e")))
                    ))
                ))
            )
        );
    }

    #[test]
    fn function_literal_with_statements() {
        let expr = parse_expression("function (a, b) { a; return b }").unwrap();
        let Expr::Function(lambda) = expr else {
            panic!("expected a function literal");
        };
        assert_eq!(lambda.params, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            lambda.body,
            vec![
                Stmt::Expr(Expr::Ident("a".into())),
                Stmt::Return(Some(Expr::Ident("b".into())))
            ]
        );
    }

    #[test]
    fn immediately_invoked_function() {
        let expr = parse_expression("(function() { return 1; })()").unwrap();
        assert!(matches!(expr, Expr::Call(callee, args)
            if args.is_empty() && matches!(*callee, Expr::Function(_))));
    }

    #[test]
    fn assignment_is_rejected() {
        assert_eq!(
            parse_expression("function() { fake.is.real = foo; return 'no' }").unwrap_err(),
            "assignment is not supported"
        );
    }

    #[test]
    fn chain_parses_members_and_calls() {
        assert_eq!(
            parse_chain(".bar({ \"foo\" : \"bar()\" }).baz(1,2,3)"),
            vec![
                Accessor::Member("bar".into()),
                Accessor::Call(vec![Expr::Object(vec![(
                    "foo".into(),
                    Expr::String("bar()".into())
                )])]),
                Accessor::Member("baz".into()),
                Accessor::Call(vec![
                    Expr::Number(1.0),
                    Expr::Number(2.0),
                    Expr::Number(3.0)
                ]),
            ]
        );
        assert_eq!(
            parse_chain(".1.foo"),
            vec![Accessor::Member("1".into()), Accessor::Member("foo".into())]
        );
    }

    #[test]
    fn chain_failure_is_reported_as_invalid() {
        assert_eq!(
            parse_chain("(1, 2"),
            vec![Accessor::Invalid("expected `)`, found end of input".into())]
        );
        assert!(matches!(parse_chain(" bar").as_slice(), [Accessor::Invalid(_)]));
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let source = format!("{}1{}", "[".repeat(500), "]".repeat(500));
        assert_eq!(
            parse_expression(&source).unwrap_err(),
            "expression nests too deeply"
        );
    }

    #[test]
    fn long_operator_and_postfix_chains_are_bounded() {
        let sources = [
            format!("1{}", "+1".repeat(20_000)),
            format!("a{}", " || a".repeat(5_000)),
            format!("a{}", ".b".repeat(5_000)),
            format!("f{}", "()".repeat(5_000)),
        ];
        for source in &sources {
            assert_eq!(
                parse_expression(source).unwrap_err(),
                "expression nests too deeply"
            );
        }
        // Short chains stay well inside the limit.
        assert!(parse_expression(&format!("1{}", "+1".repeat(50))).is_ok());
    }

    #[test]
    fn numeric_members_are_applied_one_at_a_time() {
        assert_eq!(
            parse_expression("grid.0.1").unwrap(),
            Expr::Member(
                Box::new(Expr::Member(ident("grid"), "0".into())),
                "1".into()
            )
        );
        assert_eq!(
            parse_chain(".1.0.11"),
            vec![
                Accessor::Member("1".into()),
                Accessor::Member("0".into()),
                Accessor::Member("11".into()),
            ]
        );
    }
}
