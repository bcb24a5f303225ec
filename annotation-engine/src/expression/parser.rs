//! Tokenizer and operator-precedence parser
//!
//! Grammar (whitespace ignored):
//!
//! ```text
//! expression := unary (infix unary)*
//! unary      := prefix* atom postfix*
//! atom       := number | identifier | '(' expression ')' | infix '(' expression (',' expression)+ ')'
//! ```
//!
//! The last atom form writes a binary operator as a call, `&&(A,B)`, folded left over its
//! arguments.

use super::operators::{Associativity, Operator, OperatorTable};
use super::value::Value;
use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

/// Parsed expression, borrowing its operators from the table
#[derive(Debug, Clone)]
pub enum Expr<'t> {
    Literal(Value),
    Identifier(String),
    Prefix(&'t Operator, Box<Expr<'t>>),
    Postfix(&'t Operator, Box<Expr<'t>>),
    Infix(&'t Operator, Box<Expr<'t>>, Box<Expr<'t>>),
}

impl Expr<'_> {
    /// Identifiers referenced by the expression, in order of appearance
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_identifiers(&mut names);
        names
    }

    fn collect_identifiers<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Identifier(name) => names.push(name),
            Expr::Prefix(_, operand) | Expr::Postfix(_, operand) => {
                operand.collect_identifiers(names)
            }
            Expr::Infix(_, lhs, rhs) => {
                lhs.collect_identifiers(names);
                rhs.collect_identifiers(names);
            }
        }
    }
}

fn tokenize(source: &str, table: &OperatorTable) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < source.len() {
        let rest = &source[pos..];
        let Some(c) = rest.chars().next() else { break };

        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }

        let start = pos;
        match c {
            '(' => {
                tokens.push((start, Token::LParen));
                pos += 1;
            }
            ')' => {
                tokens.push((start, Token::RParen));
                pos += 1;
            }
            ',' => {
                tokens.push((start, Token::Comma));
                pos += 1;
            }
            '0'..='9' => {
                let len = rest
                    .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
                    .unwrap_or(rest.len());
                let text = &rest[..len];
                let number = text.parse::<f64>().map_err(|_| {
                    ExpressionError::syntax(source, start, format!("invalid number '{}'", text))
                })?;
                tokens.push((start, Token::Number(number)));
                pos += len;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let len = rest
                    .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                    .unwrap_or(rest.len());
                tokens.push((start, Token::Ident(rest[..len].to_string())));
                pos += len;
            }
            _ => match table.longest_match(rest) {
                Some(symbol) => {
                    tokens.push((start, Token::Op(symbol)));
                    pos += symbol.len();
                }
                None => {
                    return Err(ExpressionError::syntax(
                        source,
                        start,
                        format!("unknown operator starting with '{}'", c),
                    ))
                }
            },
        }
    }

    Ok(tokens)
}

/// Parses `source` into an expression tree using the operators in `table`
pub fn parse<'t>(source: &str, table: &'t OperatorTable) -> Result<Expr<'t>, ExpressionError> {
    let tokens = tokenize(source, table)?;
    let mut parser = Parser {
        source,
        table,
        tokens,
        pos: 0,
    };

    let expr = parser.expression(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some((at, token)) => Err(ExpressionError::syntax(
            source,
            at,
            format!("unexpected {:?}", token),
        )),
    }
}

struct Parser<'s, 't> {
    source: &'s str,
    table: &'t OperatorTable,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl<'t> Parser<'_, 't> {
    fn peek(&self) -> Option<(usize, &Token)> {
        self.tokens.get(self.pos).map(|(at, token)| (*at, token))
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(_, token)| token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(at, _)| *at)
            .unwrap_or(self.source.len())
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::syntax(self.source, self.offset(), message)
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExpressionError> {
        match self.peek() {
            Some((_, token)) if *token == expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    /// Precedence climbing over infix operators whose binding power is at least `min_power`
    fn expression(&mut self, min_power: u16) -> Result<Expr<'t>, ExpressionError> {
        let mut lhs = self.unary()?;

        loop {
            let op = match self.peek() {
                Some((_, Token::Op(symbol))) => match self.table.infix(symbol) {
                    Some(op) => op,
                    None => return Err(self.error(format!("'{}' is not an infix operator", symbol))),
                },
                _ => break,
            };

            let power = op.binding_power();
            if power < min_power {
                break;
            }
            self.pos += 1;

            let next_min = match op.associativity {
                Associativity::Left => power + 1,
                Associativity::Right => power,
            };
            let rhs = self.expression(next_min)?;
            lhs = Expr::Infix(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr<'t>, ExpressionError> {
        let mut prefixes = Vec::new();
        while let Some((_, Token::Op(symbol))) = self.peek() {
            // An infix symbol followed by '(' is the call form, handled by `atom`
            if self.table.infix(symbol).is_some() && self.peek_nth(1) == Some(&Token::LParen) {
                break;
            }
            match self.table.prefix(symbol) {
                Some(op) => {
                    prefixes.push(op);
                    self.pos += 1;
                }
                None => break,
            }
        }

        let mut operand = self.atom()?;

        while let Some((_, Token::Op(symbol))) = self.peek() {
            match self.table.postfix(symbol) {
                Some(op) => {
                    operand = Expr::Postfix(op, Box::new(operand));
                    self.pos += 1;
                }
                None => break,
            }
        }

        for op in prefixes.into_iter().rev() {
            operand = Expr::Prefix(op, Box::new(operand));
        }
        Ok(operand)
    }

    fn atom(&mut self) -> Result<Expr<'t>, ExpressionError> {
        let Some((_, token)) = self.peek() else {
            return Err(self.error("unexpected end of expression"));
        };

        match token.clone() {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::Ident(name) => {
                self.pos += 1;
                Ok(match Value::keyword(&name) {
                    Some(value) => Expr::Literal(value),
                    None => Expr::Identifier(name),
                })
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.expression(0)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Op(symbol) => {
                let op = match self.table.infix(symbol) {
                    Some(op) if self.peek_nth(1) == Some(&Token::LParen) => op,
                    _ => return Err(self.error(format!("expected operand, found '{}'", symbol))),
                };
                self.pos += 2;

                let mut args = vec![self.expression(0)?];
                while let Some((_, Token::Comma)) = self.peek() {
                    self.pos += 1;
                    args.push(self.expression(0)?);
                }
                self.expect(Token::RParen, "')' closing operator call")?;

                if args.len() < 2 {
                    return Err(self.error(format!(
                        "operator call '{}' needs at least two arguments",
                        symbol
                    )));
                }
                let mut args = args.into_iter();
                let mut folded = match args.next() {
                    Some(first) => first,
                    None => return Err(self.error("empty operator call")),
                };
                for arg in args {
                    folded = Expr::Infix(op, Box::new(folded), Box::new(arg));
                }
                Ok(folded)
            }
            Token::RParen | Token::Comma => Err(self.error("expected operand")),
        }
    }
}
