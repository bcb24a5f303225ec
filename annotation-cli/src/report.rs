//! Text reports
//!
//! Prints the compiled rule set (dry run) and the per-recording run summaries.

use annotation_engine::{CompiledRules, RunSummary};
use std::path::PathBuf;

const RULE: &str = "═══════════════════════════════════════════════";
const THIN: &str = "───────────────────────────────────────────────";

fn banner(title: &str) {
    println!("{}", RULE);
    println!("  {}", title);
    println!("{}\n", RULE);
}

/// Prints classified rules, template targets and the dependency graph
pub fn print_compiled(compiled: &CompiledRules) {
    banner("Annotation Engine - Dry Run");

    println!("Rules ({}):", compiled.rules.len());
    for (i, rule) in compiled.rules.iter().enumerate() {
        println!("  {:>3}. {:<14} {}", i + 1, format!("{:?}", rule.kind), rule);
    }

    println!("\nTemplate targets ({}):", compiled.templates.len());
    for name in &compiled.templates {
        let note = if compiled.is_auto_registered(name) {
            " (auto-registered)"
        } else {
            ""
        };
        println!("  {}{}", name, note);
    }

    println!("\nDependency graph:");
    println!("{}", THIN);
    for (name, predecessors) in compiled.graph.iter() {
        if predecessors.is_empty() {
            println!("  {:<20} unconstrained", name);
            continue;
        }
        println!(
            "  {:<20} logged: [{}]  new: [{}]",
            name,
            predecessors.logged.join(", "),
            predecessors.new.join(", ")
        );
    }
}

/// Prints one block per recording and a closing tally
///
/// # Returns
/// * `usize` - Number of failed recordings
pub fn print_summary(results: &[(PathBuf, Result<RunSummary, String>)]) -> usize {
    banner("Annotation Engine - Run Summary");

    let mut failed = 0;
    for (video, result) in results {
        match result {
            Ok(summary) => {
                let state = if summary.aborted { "⚠ aborted" } else { "✓" };
                println!("{} {} ({:?})", state, summary.stem, video);
                println!(
                    "    Frames:   {} at {} fps ({} decoded, {} seeks, {} decode failures)",
                    summary.frames,
                    summary.fps,
                    summary.scan.decoded,
                    summary.scan.seeks,
                    summary.scan.decode_failures
                );
                println!(
                    "    Series:   {} logged, {} extracted, {} derived",
                    summary.stats.logged, summary.stats.extracted, summary.stats.derived
                );
                println!(
                    "    Segments: {} derived, {} from input hooks",
                    summary.derivation.segments, summary.hook_segments
                );
                if summary.derivation.expression_failures > 0 {
                    println!(
                        "    Expression failures: {}",
                        summary.derivation.expression_failures
                    );
                }
                println!("    Files:    {}", summary.files.len());
            }
            Err(message) => {
                failed += 1;
                println!("✗ {:?}", video);
                println!("    {}", message);
            }
        }
    }

    println!("\n{}", THIN);
    println!(
        "{} recordings, {} succeeded, {} failed",
        results.len(),
        results.len() - failed,
        failed
    );
    failed
}
