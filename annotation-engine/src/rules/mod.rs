//! Rule language: parsing, classification and dependency bookkeeping

mod compiler;
mod graph;
mod rule;

pub use compiler::{parse_rule, split_rule_text, CompiledRules, RuleCompiler};
pub use graph::{DependencyGraph, Predecessors};
pub use rule::{Action, Rule, RuleKind, Test, Vocabulary, VOCABULARIES};

/// Errors raised while compiling rule text; all of them abort the run before any frame is read
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Malformed rule '{rule}': {reason} (at '{fragment}')")]
    MalformedRule {
        rule: String,
        fragment: String,
        reason: String,
    },

    #[error("Unsupported statement '{statement}' in rule '{rule}'")]
    UnsupportedStatement { rule: String, statement: String },

    #[error("Arity mismatch in rule '{rule}': {what} expects {expected}, found {found}")]
    ArityMismatch {
        rule: String,
        what: String,
        expected: String,
        found: usize,
    },

    #[error("Invalid dependency '{name}' in rule '{rule}': {reason}")]
    InvalidDependency {
        rule: String,
        name: String,
        reason: String,
    },

    #[error("'{name}' is produced by more than one rule (again in '{rule}')")]
    DuplicateTarget { rule: String, name: String },
}

impl CompileError {
    pub(crate) fn malformed(rule: &str, fragment: &str, reason: impl Into<String>) -> Self {
        CompileError::MalformedRule {
            rule: rule.to_string(),
            fragment: fragment.to_string(),
            reason: reason.into(),
        }
    }
}
