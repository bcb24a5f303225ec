//! Boolean expressions over named annotations
//!
//! An expression such as `!(&&(logo, title)) || menu` is parsed with the operator table
//! and evaluated at one frame: every identifier is resolved through a [`Resolver`]
//! (normally the annotation store) and coerced to a boolean only where an operator needs
//! one. Evaluation keeps no state between calls.

mod operators;
mod parser;
mod value;

pub use operators::{Arity, Associativity, Operator, OperatorFn, OperatorTable};
pub use parser::{parse, Expr};
pub use value::{Coercion, Value};

/// Errors raised while parsing or evaluating an expression
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Syntax error in '{expression}' at offset {position}: {message}")]
    Syntax {
        expression: String,
        position: usize,
        message: String,
    },

    #[error("Unresolved identifier: {0}")]
    UnresolvedIdentifier(String),
}

impl ExpressionError {
    pub(crate) fn syntax(expression: &str, position: usize, message: impl Into<String>) -> Self {
        ExpressionError::Syntax {
            expression: expression.to_string(),
            position,
            message: message.into(),
        }
    }
}

/// Looks up the value of a named annotation at a frame
pub trait Resolver {
    /// Returns `None` when no series with that name exists
    fn resolve(&self, name: &str, frame: usize) -> Option<Value>;
}

/// Parses and evaluates expressions against a resolver
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'t> {
    table: &'t OperatorTable,
    coercion: Coercion,
}

impl Evaluator<'static> {
    /// Evaluator over the standard operator table
    pub fn new(threshold: f32) -> Self {
        Self::with_table(OperatorTable::standard(), threshold)
    }
}

impl<'t> Evaluator<'t> {
    pub fn with_table(table: &'t OperatorTable, threshold: f32) -> Self {
        Self {
            table,
            coercion: Coercion::new(threshold),
        }
    }

    pub fn coercion(&self) -> Coercion {
        self.coercion
    }

    /// Parses `source` without evaluating it
    pub fn parse(&self, source: &str) -> Result<Expr<'t>, ExpressionError> {
        parse(source, self.table)
    }

    /// Parses and evaluates `source` at `frame`, returning the boolean result
    ///
    /// # Example
    /// ```
    /// use annotation_engine::expression::{Evaluator, Resolver, Value};
    ///
    /// struct Fixed;
    /// impl Resolver for Fixed {
    ///     fn resolve(&self, name: &str, _frame: usize) -> Option<Value> {
    ///         match name {
    ///             "A" => Some(Value::Number(1.0)),
    ///             "B" => Some(Value::Text(" ".into())),
    ///             _ => None,
    ///         }
    ///     }
    /// }
    ///
    /// let evaluator = Evaluator::new(0.99);
    /// assert!(evaluator.evaluate("!(&&(A,B))", &Fixed, 0).unwrap());
    /// ```
    pub fn evaluate(
        &self,
        source: &str,
        resolver: &dyn Resolver,
        frame: usize,
    ) -> Result<bool, ExpressionError> {
        let expr = self.parse(source)?;
        let value = self.evaluate_expr(&expr, resolver, frame)?;
        Ok(self.coercion.truthy(&value))
    }

    /// Evaluates an already parsed expression at `frame`
    pub fn evaluate_expr(
        &self,
        expr: &Expr<'_>,
        resolver: &dyn Resolver,
        frame: usize,
    ) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Identifier(name) => resolver
                .resolve(name, frame)
                .ok_or_else(|| ExpressionError::UnresolvedIdentifier(name.clone())),
            Expr::Prefix(op, operand) | Expr::Postfix(op, operand) => {
                let value = self.evaluate_expr(operand, resolver, frame)?;
                Ok((op.apply)(&[value], &self.coercion))
            }
            Expr::Infix(op, lhs, rhs) => {
                let lhs = self.evaluate_expr(lhs, resolver, frame)?;
                let rhs = self.evaluate_expr(rhs, resolver, frame)?;
                Ok((op.apply)(&[lhs, rhs], &self.coercion))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Values(HashMap<&'static str, Value>);

    impl Resolver for Values {
        fn resolve(&self, name: &str, _frame: usize) -> Option<Value> {
            self.0.get(name).cloned()
        }
    }

    fn candidates() -> Vec<(Value, bool)> {
        vec![
            (Value::Number(1.0), true),
            (Value::Number(0.2), false),
            (Value::Text("menu".into()), true),
            (Value::Text(" ".into()), false),
            (Value::Bool(true), true),
            (Value::Bool(false), false),
        ]
    }

    #[test]
    fn test_negated_conjunction_matches_truth_table() {
        let evaluator = Evaluator::new(0.99);
        for (a, a_true) in candidates() {
            for (b, b_true) in candidates() {
                let resolver = Values(HashMap::from([("A", a.clone()), ("B", b)]));
                let result = evaluator.evaluate("!(&&(A,B))", &resolver, 0).unwrap();
                assert_eq!(result, !(a_true && b_true));
            }
        }
    }

    #[test]
    fn test_disjunction_and_alias() {
        let evaluator = Evaluator::new(0.5);
        let resolver = Values(HashMap::from([
            ("A", Value::Number(0.7)),
            ("B", Value::Number(0.1)),
        ]));
        assert!(evaluator.evaluate("A || B", &resolver, 0).unwrap());
        assert!(!evaluator.evaluate("A & B", &resolver, 0).unwrap());
        assert!(evaluator.evaluate("!=B", &resolver, 0).unwrap());
        assert!(evaluator.evaluate("True", &resolver, 0).unwrap());
        assert!(!evaluator.evaluate("False || B", &resolver, 0).unwrap());
    }

    #[test]
    fn test_unresolved_identifier() {
        let evaluator = Evaluator::new(0.99);
        let resolver = Values(HashMap::new());
        assert_eq!(
            evaluator.evaluate("ghost && True", &resolver, 3),
            Err(ExpressionError::UnresolvedIdentifier("ghost".into()))
        );
    }

    #[test]
    fn test_custom_table() {
        fn xor(args: &[Value], c: &Coercion) -> Value {
            Value::Bool(c.truthy(&args[0]) != c.truthy(&args[1]))
        }
        let mut table = OperatorTable::new();
        table.add_infix("^", 10, Associativity::Left, xor);
        let evaluator = Evaluator::with_table(&table, 0.5);
        let resolver = Values(HashMap::from([("A", Value::Bool(true))]));
        assert!(evaluator.evaluate("A ^ False", &resolver, 0).unwrap());
        assert!(!evaluator.evaluate("A ^ A", &resolver, 0).unwrap());
    }
}
