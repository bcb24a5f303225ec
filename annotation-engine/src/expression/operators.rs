//! Operator table
//!
//! Each operator carries a precedence order (lower binds tighter), an associativity, an
//! arity and an evaluation function over tagged values. The standard table is built once
//! and shared.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::value::{Coercion, Value};

/// Evaluation function of an operator: operands in source order
pub type OperatorFn = fn(&[Value], &Coercion) -> Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    UnaryPrefix,
    UnaryPostfix,
    Binary,
}

/// One entry of the operator table
#[derive(Debug, Clone)]
pub struct Operator {
    pub symbol: &'static str,
    pub precedence: u8,
    pub associativity: Associativity,
    pub arity: Arity,
    pub apply: OperatorFn,
}

impl Operator {
    /// Binding power used by the parser; higher binds tighter
    pub(crate) fn binding_power(&self) -> u16 {
        u16::from(u8::MAX - self.precedence)
    }
}

/// Prefix, infix and postfix operators keyed by symbol
#[derive(Debug, Clone, Default)]
pub struct OperatorTable {
    prefix: BTreeMap<&'static str, Operator>,
    infix: BTreeMap<&'static str, Operator>,
    postfix: BTreeMap<&'static str, Operator>,
}

fn not(args: &[Value], c: &Coercion) -> Value {
    Value::Bool(!args.first().is_some_and(|v| c.truthy(v)))
}

fn and(args: &[Value], c: &Coercion) -> Value {
    Value::Bool(args.iter().all(|v| c.truthy(v)))
}

fn or(args: &[Value], c: &Coercion) -> Value {
    Value::Bool(args.iter().any(|v| c.truthy(v)))
}

impl OperatorTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in operators: `!`, `!=` (prefix alias of `!`), `&`, `&&`, `||`
    pub fn standard() -> &'static OperatorTable {
        static TABLE: OnceLock<OperatorTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            let mut table = OperatorTable::new();
            table.add_prefix("!", 3, not);
            table.add_prefix("!=", 3, not);
            table.add_infix("&", 13, Associativity::Left, and);
            table.add_infix("&&", 13, Associativity::Left, and);
            table.add_infix("||", 14, Associativity::Left, or);
            table
        })
    }

    pub fn add_prefix(&mut self, symbol: &'static str, precedence: u8, apply: OperatorFn) {
        self.prefix.insert(
            symbol,
            Operator {
                symbol,
                precedence,
                associativity: Associativity::Right,
                arity: Arity::UnaryPrefix,
                apply,
            },
        );
    }

    pub fn add_infix(
        &mut self,
        symbol: &'static str,
        precedence: u8,
        associativity: Associativity,
        apply: OperatorFn,
    ) {
        self.infix.insert(
            symbol,
            Operator {
                symbol,
                precedence,
                associativity,
                arity: Arity::Binary,
                apply,
            },
        );
    }

    pub fn add_postfix(&mut self, symbol: &'static str, precedence: u8, apply: OperatorFn) {
        self.postfix.insert(
            symbol,
            Operator {
                symbol,
                precedence,
                associativity: Associativity::Left,
                arity: Arity::UnaryPostfix,
                apply,
            },
        );
    }

    pub fn prefix(&self, symbol: &str) -> Option<&Operator> {
        self.prefix.get(symbol)
    }

    pub fn infix(&self, symbol: &str) -> Option<&Operator> {
        self.infix.get(symbol)
    }

    pub fn postfix(&self, symbol: &str) -> Option<&Operator> {
        self.postfix.get(symbol)
    }

    /// Longest operator symbol that starts `input`, across all three positions
    pub fn longest_match(&self, input: &str) -> Option<&'static str> {
        self.prefix
            .keys()
            .chain(self.infix.keys())
            .chain(self.postfix.keys())
            .filter(|symbol| input.starts_with(**symbol))
            .max_by_key(|symbol| symbol.len())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let table = OperatorTable::standard();
        assert_eq!(table.infix("&&").unwrap().precedence, 13);
        assert_eq!(table.infix("||").unwrap().precedence, 14);
        assert!(table.prefix("!=").is_some());
        assert!(table.infix("!=").is_none());

        // && binds tighter than ||
        assert!(table.infix("&&").unwrap().binding_power() > table.infix("||").unwrap().binding_power());
    }

    #[test]
    fn test_longest_match() {
        let table = OperatorTable::standard();
        assert_eq!(table.longest_match("&&B"), Some("&&"));
        assert_eq!(table.longest_match("&B"), Some("&"));
        assert_eq!(table.longest_match("!=A"), Some("!="));
        assert_eq!(table.longest_match("!A"), Some("!"));
        assert_eq!(table.longest_match("+A"), None);
    }

    #[test]
    fn test_operator_functions() {
        let c = Coercion::new(0.5);
        assert_eq!(not(&[Value::Number(0.9)], &c), Value::Bool(false));
        assert_eq!(
            and(&[Value::Bool(true), Value::Text("x".into())], &c),
            Value::Bool(true)
        );
        assert_eq!(
            or(&[Value::Bool(false), Value::Text(" ".into())], &c),
            Value::Bool(false)
        );
    }
}
