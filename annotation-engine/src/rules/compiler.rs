//! Rule compiler
//!
//! Turns rule strings of the form `test(dep1,dep2){name=action(var1,var2)}` into
//! classified [`Rule`]s and a [`DependencyGraph`]. Compilation runs in two passes: the
//! first parses every rule and collects the names produced anywhere in the rule set, the
//! second resolves dependencies against that complete set, so the result does not depend
//! on where in the list a producer appears.

use std::collections::BTreeSet;

use super::graph::DependencyGraph;
use super::rule::{Action, Rule, RuleKind, Test, VOCABULARIES};
use super::CompileError;

/// Output of a successful compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledRules {
    pub rules: Vec<Rule>,
    pub graph: DependencyGraph,
    /// Template-match targets in registration order, declared and auto-registered
    pub templates: Vec<String>,
    /// Subset of `templates` registered only because a rule depended on them
    pub auto_registered: BTreeSet<String>,
}

impl CompiledRules {
    pub fn of_kind(&self, kind: RuleKind) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |rule| rule.kind == kind)
    }

    /// Rule producing `name`, if any
    pub fn producer(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.outputs().contains(&name))
    }

    pub fn is_auto_registered(&self, name: &str) -> bool {
        self.auto_registered.contains(name)
    }
}

/// Splits a multi-line rule definition into individual rule strings
///
/// Quotes are removed, blank lines and `#` comment lines are skipped.
pub fn split_rule_text(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.replace(['"', '\''], ""))
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// Compiles rule definitions against the set of already logged annotation names
pub struct RuleCompiler;

impl RuleCompiler {
    /// Compiles `sources` in order
    ///
    /// # Arguments
    /// * `sources` - Rule strings, one rule each
    /// * `logged` - Names of series ingested before the run
    ///
    /// # Returns
    /// * `Result<CompiledRules, CompileError>` - Classified rules and their dependency graph
    ///
    /// # Example
    /// ```
    /// use annotation_engine::rules::{RuleCompiler, RuleKind};
    /// use std::collections::BTreeSet;
    ///
    /// let compiled = RuleCompiler::compile(
    ///     &["inrect(10,20,30,40){matchTemplate(logo)}", "if(logo){detectText(title)}"],
    ///     &BTreeSet::new(),
    /// )
    /// .unwrap();
    /// assert_eq!(compiled.rules[1].kind, RuleKind::Extraction);
    /// assert_eq!(compiled.graph.predecessors("title").unwrap().new, vec!["logo"]);
    /// ```
    pub fn compile<S: AsRef<str>>(
        sources: &[S],
        logged: &BTreeSet<String>,
    ) -> Result<CompiledRules, CompileError> {
        // Pass 1: parse, classify and collect every produced name
        let mut rules = Vec::with_capacity(sources.len());
        for source in sources {
            let rule = parse_rule(source.as_ref())?;
            log::debug!("Parsed {:?} rule: {}", rule.kind, rule);
            rules.push(rule);
        }

        let mut produced: BTreeSet<&str> = BTreeSet::new();
        for rule in &rules {
            for output in rule.outputs() {
                if !produced.insert(output) {
                    return Err(CompileError::DuplicateTarget {
                        rule: rule.source.clone(),
                        name: output.to_string(),
                    });
                }
            }
        }

        // Pass 2: resolve dependencies against the complete name set
        let mut compiled = CompiledRules::default();
        for rule in &rules {
            let outputs = rule.outputs();
            for output in &outputs {
                compiled.graph.add_node(output);
            }

            for dependency in rule.named_dependencies() {
                if outputs.contains(&dependency.as_str()) {
                    return Err(CompileError::InvalidDependency {
                        rule: rule.source.clone(),
                        name: dependency.clone(),
                        reason: "a rule cannot depend on its own output".to_string(),
                    });
                }

                if logged.contains(dependency) {
                    for output in &outputs {
                        compiled.graph.add_logged(output, dependency);
                    }
                    continue;
                }

                let runs_per_frame = matches!(rule.kind, RuleKind::Extraction | RuleKind::Accessibility);
                match rules.iter().find(|r| r.outputs().contains(&dependency.as_str())) {
                    Some(producer) if runs_per_frame && !is_per_frame(producer.kind) => {
                        return Err(CompileError::InvalidDependency {
                            rule: rule.source.clone(),
                            name: dependency.clone(),
                            reason: format!(
                                "produced by a {:?} rule, which only runs after frame processing",
                                producer.kind
                            ),
                        });
                    }
                    Some(_) => {}
                    None if runs_per_frame => {
                        if !compiled.templates.contains(dependency) {
                            log::info!(
                                "Auto-registering '{}' as template target (required by '{}')",
                                dependency,
                                rule.source
                            );
                            compiled.templates.push(dependency.clone());
                            compiled.auto_registered.insert(dependency.clone());
                            compiled.graph.add_node(dependency);
                        }
                    }
                    None => {}
                }

                for output in &outputs {
                    compiled.graph.add_new(output, dependency);
                }
            }

            if rule.action == Action::MatchTemplate {
                for variable in &rule.variables {
                    if !compiled.templates.contains(variable) {
                        compiled.templates.push(variable.clone());
                    }
                }
            }
        }

        if let Some(cycle) = compiled.graph.find_cycle() {
            let rule = rules
                .iter()
                .find(|r| r.outputs().contains(&cycle[0].as_str()))
                .map(|r| r.source.clone())
                .unwrap_or_default();
            return Err(CompileError::InvalidDependency {
                rule,
                name: cycle.get(1).cloned().unwrap_or_default(),
                reason: format!("dependency cycle {}", cycle.join(" -> ")),
            });
        }

        // A name first auto-registered and then explicitly matched is a declared target
        for rule in rules.iter().filter(|r| r.action == Action::MatchTemplate) {
            for variable in &rule.variables {
                compiled.auto_registered.remove(variable);
            }
        }

        log::info!(
            "Compiled {} rules: {} template targets ({} auto-registered), {} graph nodes",
            rules.len(),
            compiled.templates.len(),
            compiled.auto_registered.len(),
            compiled.graph.len()
        );

        compiled.rules = rules;
        Ok(compiled)
    }
}

fn is_per_frame(kind: RuleKind) -> bool {
    matches!(kind, RuleKind::Extraction | RuleKind::Accessibility)
}

/// Strips all whitespace from a clause fragment
fn compact(fragment: &str) -> String {
    fragment.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Index of the parenthesis closing the one opened at `open`
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits an argument list on top-level commas, dropping whitespace
fn split_arguments(list: &str) -> Vec<String> {
    let list = compact(list);
    if list.is_empty() {
        return Vec::new();
    }

    let mut arguments = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                arguments.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    arguments.push(current);
    arguments
}

/// Splits `head(args)trailer` and checks nothing but whitespace follows the `)`
fn split_call<'a>(
    source: &str,
    clause: &'a str,
    what: &str,
) -> Result<(&'a str, Vec<String>), CompileError> {
    let open = clause.find('(').ok_or_else(|| CompileError::malformed(
        source,
        clause,
        format!("malformed {} statement: missing '('", what),
    ))?;
    let close = matching_paren(clause, open).ok_or_else(|| CompileError::malformed(
        source,
        &clause[open..],
        format!("malformed {} variables: missing ')'", what),
    ))?;
    let trailer = &clause[close + 1..];
    if !trailer.trim().is_empty() {
        return Err(CompileError::malformed(
            source,
            trailer,
            format!("unexpected text after {} clause", what),
        ));
    }
    Ok((&clause[..open], split_arguments(&clause[open + 1..close])))
}

fn arity_error(rule: &str, what: impl Into<String>, expected: &str, found: usize) -> CompileError {
    CompileError::ArityMismatch {
        rule: rule.to_string(),
        what: what.into(),
        expected: expected.to_string(),
        found,
    }
}

/// Parses and classifies a single rule string
pub fn parse_rule(source: &str) -> Result<Rule, CompileError> {
    let text = source.trim();

    let (test_clause, action_clause) = match text.find('{') {
        Some(open) => {
            let Some(body) = text[open + 1..].strip_suffix('}') else {
                return Err(CompileError::malformed(
                    source,
                    &text[open..],
                    "missing closing '}'",
                ));
            };
            (Some(&text[..open]), body)
        }
        None => (None, text),
    };

    let (test, dependencies) = match test_clause {
        Some(clause) => {
            let (head, dependencies) = split_call(source, clause, "test")?;
            let name = compact(head);
            if name.is_empty() {
                return Err(CompileError::malformed(source, clause, "empty test statement"));
            }
            let test = name.parse::<Test>().map_err(|_| CompileError::UnsupportedStatement {
                rule: source.to_string(),
                statement: name.clone(),
            })?;
            (Some(test), dependencies)
        }
        None => (None, Vec::new()),
    };

    if compact(action_clause).is_empty() {
        return Err(CompileError::malformed(source, action_clause, "missing action clause"));
    }
    let (head, variables) = split_call(source, action_clause, "action")?;
    let (name, action_name) = match head.find('=') {
        Some(eq) => (Some(compact(&head[..eq])), compact(&head[eq + 1..])),
        None => (None, compact(head)),
    };
    if action_name.is_empty() {
        return Err(CompileError::malformed(source, action_clause, "missing action clause"));
    }
    let name = name.filter(|n| !n.is_empty());

    let action = action_name
        .parse::<Action>()
        .map_err(|_| CompileError::UnsupportedStatement {
            rule: source.to_string(),
            statement: action_name.clone(),
        })?;

    let mut kinds = VOCABULARIES
        .iter()
        .filter(|v| v.accepts(test, action))
        .map(|v| v.kind);
    let kind = match (kinds.next(), kinds.next()) {
        (Some(kind), None) => kind,
        (None, _) => {
            return Err(CompileError::UnsupportedStatement {
                rule: source.to_string(),
                statement: match test {
                    Some(test) => format!("{}(...){{{}(...)}}", test, action),
                    None => action.to_string(),
                },
            })
        }
        (Some(_), Some(_)) => {
            return Err(CompileError::UnsupportedStatement {
                rule: source.to_string(),
                statement: format!("ambiguous action '{}'", action),
            })
        }
    };

    let rule = Rule {
        source: source.to_string(),
        kind,
        name,
        test,
        dependencies,
        action,
        variables,
    };
    check_arity(&rule)?;
    Ok(rule)
}

fn check_arity(rule: &Rule) -> Result<(), CompileError> {
    let source = rule.source.as_str();
    let deps = rule.dependencies.len();
    let vars = rule.variables.len();

    if let Some(test) = rule.test {
        let expected = match test {
            Test::InRect => Some(("4", deps == 4)),
            Test::Below | Test::RightOf | Test::During => Some(("1", deps == 1)),
            Test::Between => Some(("2", deps == 2)),
            Test::If => Some(("at least 1", deps >= 1)),
        };
        if let Some((expected, false)) = expected {
            return Err(arity_error(source, format!("test '{}'", test), expected, deps));
        }
        if test == Test::InRect && rule.rect().is_none() {
            return Err(CompileError::malformed(
                source,
                &rule.dependencies.join(","),
                "inrect coordinates must be integers",
            ));
        }
    }

    match rule.action {
        Action::Template => {
            if vars != 6 {
                return Err(arity_error(source, "action 'template'", "6", vars));
            }
            if rule.name.is_none() {
                return Err(CompileError::malformed(
                    source,
                    &rule.source,
                    "template definitions must be assigned to a name",
                ));
            }
        }
        Action::Eval
        | Action::MatchFirstValueOf
        | Action::TriggerBySegmentsOf
        | Action::TypedWords
        | Action::MouseClicks => {
            if vars != 1 {
                return Err(arity_error(source, format!("action '{}'", rule.action), "1", vars));
            }
        }
        Action::MatchTemplate
        | Action::DetectText
        | Action::DetectNumber
        | Action::DetectTime
        | Action::NestByLastVariable
        | Action::AccessibilityHover
        | Action::AccessibilityFocus => {
            if vars == 0 {
                return Err(arity_error(
                    source,
                    format!("action '{}'", rule.action),
                    "at least 1",
                    vars,
                ));
            }
        }
    }

    if matches!(
        rule.action,
        Action::MatchFirstValueOf | Action::TriggerBySegmentsOf
    ) && rule.test != Some(Test::During)
    {
        return Err(arity_error(
            source,
            format!("guard of '{}'", rule.action),
            "1",
            0,
        ));
    }

    if rule.kind == RuleKind::Conversion && rule.name.is_none() {
        return Err(CompileError::malformed(
            source,
            &rule.source,
            "conversion rules must be assigned to a name",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn logged(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_inrect_rule() {
        let compiled =
            RuleCompiler::compile(&["inrect(10,20,30,40){matchTemplate(logo)}"], &logged(&[]))
                .unwrap();

        let rule = &compiled.rules[0];
        assert_eq!(rule.kind, RuleKind::Extraction);
        assert_eq!(rule.test, Some(Test::InRect));
        assert_eq!(rule.dependencies, vec!["10", "20", "30", "40"]);
        assert_eq!(rule.action, Action::MatchTemplate);
        assert_eq!(rule.variables, vec!["logo"]);
        assert_eq!(compiled.templates, vec!["logo"]);
        assert!(compiled.graph.predecessors("logo").unwrap().is_empty());
        assert!(compiled.graph.is_unconstrained("logo"));
    }

    #[test]
    fn test_named_action_and_spacing() {
        let rule = parse_rule("  during( menu ) { open = eval( &&(menu, !title) ) }").unwrap();
        assert_eq!(rule.kind, RuleKind::Conversion);
        assert_eq!(rule.name.as_deref(), Some("open"));
        assert_eq!(rule.dependencies, vec!["menu"]);
        assert_eq!(rule.variables, vec!["&&(menu,!title)"]);
    }

    #[test]
    fn test_unconditional_rule() {
        let rule = parse_rule("detectTime(clock)").unwrap();
        assert_eq!(rule.kind, RuleKind::Extraction);
        assert_eq!(rule.test, None);
        assert!(rule.dependencies.is_empty());
    }

    #[test]
    fn test_logged_and_new_partition() {
        let compiled = RuleCompiler::compile(
            &[
                "matchTemplate(logo)",
                "if(menu,logo){detectText(title)}",
            ],
            &logged(&["menu"]),
        )
        .unwrap();

        let preds = compiled.graph.predecessors("title").unwrap();
        assert_eq!(preds.logged, vec!["menu"]);
        assert_eq!(preds.new, vec!["logo"]);
        assert!(compiled.auto_registered.is_empty());
    }

    #[test]
    fn test_auto_registration() {
        let compiled =
            RuleCompiler::compile(&["below(header){detectNumber(count)}"], &logged(&[])).unwrap();
        assert_eq!(compiled.templates, vec!["header"]);
        assert!(compiled.is_auto_registered("header"));
        assert!(compiled.graph.is_unconstrained("header"));
        assert_eq!(compiled.graph.predecessors("count").unwrap().new, vec!["header"]);
    }

    #[test]
    fn test_order_does_not_change_resolution() {
        let forward = [
            "matchTemplate(logo)",
            "if(logo){matchTemplate(close)}",
            "during(close){closing=eval(close)}",
        ];
        let mut backward = forward;
        backward.reverse();

        let a = RuleCompiler::compile(&forward, &logged(&[])).unwrap();
        let b = RuleCompiler::compile(&backward, &logged(&[])).unwrap();
        assert_eq!(a.graph, b.graph);
        assert!(a.auto_registered.is_empty());
        assert!(b.auto_registered.is_empty());

        let mut a_templates = a.templates.clone();
        let mut b_templates = b.templates.clone();
        a_templates.sort();
        b_templates.sort();
        assert_eq!(a_templates, b_templates);
    }

    #[test]
    fn test_dependency_cycle_rejected() {
        let rules = [
            "if(count){matchTemplate(logo)}",
            "if(logo){detectNumber(count)}",
        ];
        let result = RuleCompiler::compile(&rules, &logged(&[]));
        assert_matches!(
            result,
            Err(CompileError::InvalidDependency { reason, .. }) if reason.contains("cycle")
        );
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let rules = [
            "template_a=template(0.1,0.2,0.3,0.4,session.mp4,12)",
            "if(template_a){matchTemplate(icon)}",
            "between(left,right){detectText(label)}",
            "during(icon){shown=eval(icon && !label)}",
            "during(icon){typed=typedWords(keys)}",
        ];
        let first = RuleCompiler::compile(&rules, &logged(&["left"])).unwrap();
        let second = RuleCompiler::compile(&rules, &logged(&["left"])).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_rules() {
        for source in [
            "if(logo{matchTemplate(x)}",
            "if(logo){matchTemplate(x)",
            "if(logo){}",
            "if(logo){matchTemplate}",
            "if(logo){matchTemplate(x}",
            "(logo){matchTemplate(x)}",
            "matchTemplate(x) trailing",
            "inrect(1,2,three,4){matchTemplate(x)}",
        ] {
            assert_matches!(
                parse_rule(source),
                Err(CompileError::MalformedRule { .. }),
                "{}",
                source
            );
        }
    }

    #[test]
    fn test_unsupported_statements() {
        assert_matches!(
            parse_rule("whenever(logo){matchTemplate(x)}"),
            Err(CompileError::UnsupportedStatement { .. })
        );
        assert_matches!(
            parse_rule("if(logo){explode(x)}"),
            Err(CompileError::UnsupportedStatement { .. })
        );
        // Valid test and action from different vocabularies
        assert_matches!(
            parse_rule("during(logo){matchTemplate(x)}"),
            Err(CompileError::UnsupportedStatement { .. })
        );
    }

    #[test]
    fn test_arity_mismatches() {
        for source in [
            "below(a,b){detectText(x)}",
            "rightof(){detectText(x)}",
            "between(a){detectText(x)}",
            "inrect(1,2,3){matchTemplate(x)}",
            "t=template(0.1,0.2,0.3,0.4,video.mp4)",
            "during(g){x=eval(a,b)}",
            "x=matchFirstValueOf(a)",
            "if(a){matchTemplate()}",
        ] {
            assert_matches!(
                parse_rule(source),
                Err(CompileError::ArityMismatch { .. }),
                "{}",
                source
            );
        }
    }

    #[test]
    fn test_missing_names() {
        assert_matches!(
            parse_rule("template(0.1,0.2,0.3,0.4,video.mp4,3)"),
            Err(CompileError::MalformedRule { .. })
        );
        assert_matches!(
            parse_rule("during(g){eval(a)}"),
            Err(CompileError::MalformedRule { .. })
        );
    }

    #[test]
    fn test_invalid_dependencies() {
        assert_matches!(
            RuleCompiler::compile(&["if(logo){matchTemplate(logo)}"], &logged(&[])),
            Err(CompileError::InvalidDependency { .. })
        );
        assert_matches!(
            RuleCompiler::compile(
                &["if(shown){matchTemplate(logo)}", "during(logo){shown=eval(logo)}"],
                &logged(&[])
            ),
            Err(CompileError::InvalidDependency { .. })
        );
        assert_matches!(
            RuleCompiler::compile(
                &["matchTemplate(logo)", "if(a){matchTemplate(logo)}"],
                &logged(&[])
            ),
            Err(CompileError::DuplicateTarget { .. })
        );
    }

    #[test]
    fn test_split_rule_text() {
        let text = "\"inrect(1,2,3,4){matchTemplate(logo)}\"\n\n# comment\n 'detectText(title)' \n";
        assert_eq!(
            split_rule_text(text),
            vec!["inrect(1,2,3,4){matchTemplate(logo)}", "detectText(title)"]
        );
    }

    #[test]
    fn test_other_vocabularies() {
        let ax = parse_rule("inrect(0,0,100,50){accessibilityHover(toolbar)}").unwrap();
        assert_eq!(ax.kind, RuleKind::Accessibility);
        let hook = parse_rule("mouseClicks(clicks)").unwrap();
        assert_eq!(hook.kind, RuleKind::InputHook);
    }
}
