//! `run` command handler.

use std::fmt::Write as _;

use crate::cli::args::{OutputFormat, RunArgs};
use crate::config::ConfigLoader;
use crate::error::GoalTrackError;
use crate::observability::{EventEmitter, init_metrics, render_metrics};
use crate::persistence::SaveNode;
use crate::scenario::{ScenarioReport, ScenarioRunner};

/// Replays a scenario and prints the final report.
///
/// # Errors
///
/// Returns an error if the scenario cannot be loaded, a step fails, or a
/// save document cannot be read or written.
pub fn run(args: &RunArgs, quiet: bool) -> Result<(), GoalTrackError> {
    if args.metrics {
        init_metrics()?;
    }

    tracing::info!(scenario = %args.scenario.display(), "loading scenario");
    let loaded = ConfigLoader::with_defaults().load(&args.scenario)?;
    for warning in &loaded.warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }

    let mut runner = ScenarioRunner::new(loaded.config)?;
    if let Some(path) = &args.resume {
        let doc = SaveNode::read(path)?;
        let warnings = runner.resume(&doc)?;
        tracing::info!(
            save = %path.display(),
            step = runner.next_step(),
            dropped = warnings.len(),
            "resumed from save"
        );
    }

    let emitter = match &args.events_file {
        Some(path) if path.as_os_str() == "-" => EventEmitter::stderr(),
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    };
    let report = runner.run(&emitter)?;

    if let Some(path) = &args.save {
        runner.save().write(path)?;
        tracing::info!(save = %path.display(), "save written");
    }

    if !quiet {
        match args.format {
            OutputFormat::Human => print!("{}", render_report(&report)),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }
        if args.metrics
            && let Some(text) = render_metrics()
        {
            print!("{text}");
        }
    }
    Ok(())
}

/// Human-readable report: one line per contract, then its visible nodes
/// indented by depth.
#[must_use]
pub fn render_report(report: &ScenarioReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "scenario {}: {}", report.scenario, report.summary);
    for contract in &report.contracts {
        let _ = write!(out, "[{}] {}", contract.status.as_str(), contract.id);
        if let Some(title) = &contract.title {
            let _ = write!(out, " - {title}");
        }
        out.push('\n');
        for node in contract.nodes.iter().filter(|n| n.depth > 0 && n.visible) {
            let indent = "  ".repeat(node.depth);
            let _ = write!(out, "{indent}{:<10} {}", node.state.as_str(), node.key);
            if let Some(title) = &node.title {
                let _ = write!(out, " ({title})");
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ContractStatus;
    use crate::observability::RunSummary;
    use crate::scenario::{ContractReport, NodeReport};
    use crate::state::ParameterState;

    fn node(key: &str, depth: usize, state: ParameterState, visible: bool) -> NodeReport {
        NodeReport {
            key: key.into(),
            title: None,
            depth,
            state,
            visible,
        }
    }

    #[test]
    fn test_render_report_skips_hidden_nodes() {
        let report = ScenarioReport {
            scenario: "demo".into(),
            summary: RunSummary::default(),
            contracts: vec![ContractReport {
                id: "rescue".into(),
                title: Some("Rescue Bill".into()),
                status: ContractStatus::Completed,
                nodes: vec![
                    node("rescue", 0, ParameterState::Complete, true),
                    node("aboard", 1, ParameterState::Complete, true),
                    node("secret", 1, ParameterState::Incomplete, false),
                ],
            }],
        };
        let text = render_report(&report);
        assert!(text.contains("[completed] rescue - Rescue Bill"));
        assert!(text.contains("  complete   aboard"));
        assert!(!text.contains("secret"));
    }
}
