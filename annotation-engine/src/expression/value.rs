//! Tagged operand values and their boolean coercions

use std::fmt;

use crate::types::is_blank;

/// Operand carried through expression evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Literal keywords accepted in place of an identifier
    pub fn keyword(word: &str) -> Option<Value> {
        match word {
            "True" => Some(Value::Bool(true)),
            "False" => Some(Value::Bool(false)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Conversion rules from any [`Value`] to a boolean
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coercion {
    pub threshold: f32,
}

impl Coercion {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Numbers are true above the threshold, text when not blank
    pub fn truthy(&self, value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Number(n) => *n > self.threshold as f64,
            Value::Text(s) => !is_blank(s),
        }
    }
}
