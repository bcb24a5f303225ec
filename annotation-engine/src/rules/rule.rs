//! Compiled rules and the closed vocabularies of tests and actions

use std::fmt;
use std::str::FromStr;

use crate::types::SeriesKind;

/// The four rule families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKind {
    /// Computes per-frame annotations from decoded frames
    Extraction,
    /// Derives series and segments from completed series
    Conversion,
    /// Reads per-frame accessibility snapshots
    Accessibility,
    /// Turns recorded keyboard and mouse events into annotations
    InputHook,
}

/// Test clause of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Test {
    If,
    Between,
    Below,
    RightOf,
    InRect,
    During,
}

impl Test {
    pub fn as_str(&self) -> &'static str {
        match self {
            Test::If => "if",
            Test::Between => "between",
            Test::Below => "below",
            Test::RightOf => "rightof",
            Test::InRect => "inrect",
            Test::During => "during",
        }
    }
}

impl FromStr for Test {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "if" => Ok(Test::If),
            "between" => Ok(Test::Between),
            "below" => Ok(Test::Below),
            "rightof" => Ok(Test::RightOf),
            "inrect" => Ok(Test::InRect),
            "during" => Ok(Test::During),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action clause of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    MatchTemplate,
    DetectText,
    DetectNumber,
    DetectTime,
    Template,
    Eval,
    MatchFirstValueOf,
    TriggerBySegmentsOf,
    NestByLastVariable,
    AccessibilityHover,
    AccessibilityFocus,
    TypedWords,
    MouseClicks,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::MatchTemplate => "matchTemplate",
            Action::DetectText => "detectText",
            Action::DetectNumber => "detectNumber",
            Action::DetectTime => "detectTime",
            Action::Template => "template",
            Action::Eval => "eval",
            Action::MatchFirstValueOf => "matchFirstValueOf",
            Action::TriggerBySegmentsOf => "triggerBySegmentsOf",
            Action::NestByLastVariable => "nestByLastVariable",
            Action::AccessibilityHover => "accessibilityHover",
            Action::AccessibilityFocus => "accessibilityFocus",
            Action::TypedWords => "typedWords",
            Action::MouseClicks => "mouseClicks",
        }
    }

    /// Kind of series the action writes for each of its variables
    pub fn series_kind(&self) -> SeriesKind {
        match self {
            Action::MatchTemplate
            | Action::Template
            | Action::Eval
            | Action::TriggerBySegmentsOf
            | Action::NestByLastVariable
            | Action::MouseClicks => SeriesKind::Numeric,
            Action::DetectText
            | Action::DetectNumber
            | Action::DetectTime
            | Action::MatchFirstValueOf
            | Action::AccessibilityHover
            | Action::AccessibilityFocus
            | Action::TypedWords => SeriesKind::Text,
        }
    }

    /// Column suffix used for the value column in per-frame tables
    pub fn value_suffix(&self) -> &'static str {
        match self {
            Action::DetectNumber => "num",
            Action::DetectTime => "time",
            Action::DetectText
            | Action::AccessibilityHover
            | Action::AccessibilityFocus
            | Action::TypedWords
            | Action::MatchFirstValueOf => "txt",
            Action::MatchTemplate
            | Action::Template
            | Action::Eval
            | Action::TriggerBySegmentsOf
            | Action::NestByLastVariable
            | Action::MouseClicks => "val",
        }
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let action = match s {
            "matchTemplate" => Action::MatchTemplate,
            "detectText" => Action::DetectText,
            "detectNumber" => Action::DetectNumber,
            "detectTime" => Action::DetectTime,
            "template" => Action::Template,
            "eval" => Action::Eval,
            "matchFirstValueOf" => Action::MatchFirstValueOf,
            "triggerBySegmentsOf" => Action::TriggerBySegmentsOf,
            "nestByLastVariable" => Action::NestByLastVariable,
            "accessibilityHover" => Action::AccessibilityHover,
            "accessibilityFocus" => Action::AccessibilityFocus,
            "typedWords" => Action::TypedWords,
            "mouseClicks" => Action::MouseClicks,
            _ => return Err(()),
        };
        Ok(action)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of tests and actions belonging to one rule kind
#[derive(Debug)]
pub struct Vocabulary {
    pub kind: RuleKind,
    pub tests: &'static [Test],
    pub actions: &'static [Action],
}

impl Vocabulary {
    pub fn accepts(&self, test: Option<Test>, action: Action) -> bool {
        self.actions.contains(&action) && test.map_or(true, |t| self.tests.contains(&t))
    }
}

/// The four vocabularies; an action belongs to exactly one of them
pub const VOCABULARIES: [Vocabulary; 4] = [
    Vocabulary {
        kind: RuleKind::Extraction,
        tests: &[Test::If, Test::Between, Test::Below, Test::RightOf, Test::InRect],
        actions: &[
            Action::MatchTemplate,
            Action::DetectText,
            Action::DetectNumber,
            Action::DetectTime,
            Action::Template,
        ],
    },
    Vocabulary {
        kind: RuleKind::Conversion,
        tests: &[Test::During],
        actions: &[
            Action::Eval,
            Action::MatchFirstValueOf,
            Action::TriggerBySegmentsOf,
            Action::NestByLastVariable,
        ],
    },
    Vocabulary {
        kind: RuleKind::Accessibility,
        tests: &[Test::If, Test::InRect],
        actions: &[Action::AccessibilityHover, Action::AccessibilityFocus],
    },
    Vocabulary {
        kind: RuleKind::InputHook,
        tests: &[Test::During],
        actions: &[Action::TypedWords, Action::MouseClicks],
    },
];

/// One compiled constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Source text, used in diagnostics
    pub source: String,
    pub kind: RuleKind,
    pub name: Option<String>,
    pub test: Option<Test>,
    pub dependencies: Vec<String>,
    pub action: Action,
    pub variables: Vec<String>,
}

impl Rule {
    /// Names this rule writes to the annotation store
    pub fn outputs(&self) -> Vec<&str> {
        match self.action {
            Action::Template => Vec::new(),
            Action::Eval
            | Action::MatchFirstValueOf
            | Action::TriggerBySegmentsOf
            | Action::NestByLastVariable => self.name.as_deref().into_iter().collect(),
            Action::MatchTemplate
            | Action::DetectText
            | Action::DetectNumber
            | Action::DetectTime
            | Action::AccessibilityHover
            | Action::AccessibilityFocus
            | Action::TypedWords
            | Action::MouseClicks => self.variables.iter().map(String::as_str).collect(),
        }
    }

    /// Dependencies that name annotations (the `inrect` coordinates do not)
    pub fn named_dependencies(&self) -> &[String] {
        if self.test == Some(Test::InRect) {
            &[]
        } else {
            &self.dependencies
        }
    }

    /// Literal rectangle of an `inrect` test
    pub fn rect(&self) -> Option<crate::types::Rect> {
        if self.test != Some(Test::InRect) || self.dependencies.len() != 4 {
            return None;
        }
        let mut values = self.dependencies.iter().map(|d| d.parse::<i64>().ok());
        Some(crate::types::Rect::new(
            values.next()??,
            values.next()??,
            values.next()??,
            values.next()??,
        ))
    }

    /// Label used in logs and provenance
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.variables.join("+"),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(test) = self.test {
            write!(f, "{}({}){{", test, self.dependencies.join(","))?;
        }
        if let Some(name) = &self.name {
            write!(f, "{}=", name)?;
        }
        write!(f, "{}({})", self.action, self.variables.join(","))?;
        if self.test.is_some() {
            f.write_str("}")?;
        }
        Ok(())
    }
}
