//! Shared integration-test harness: fixture loading, in-process scenario
//! runners and a wrapper for spawning the `goaltrack` binary.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use goaltrack::config::{ConfigLoader, ScenarioConfig};
use goaltrack::engine::ContractStatus;
use goaltrack::scenario::{ScenarioRunner, StepOutcome};

/// Absolute path of a file under `tests/fixtures`.
#[must_use]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Loads and validates a fixture.
#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn load_fixture(name: &str) -> Arc<ScenarioConfig> {
    ConfigLoader::with_defaults()
        .load(&fixture_path(name))
        .unwrap_or_else(|e| panic!("fixture {name} failed to load: {e}"))
        .config
}

/// Loads and validates inline YAML.
#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn load_yaml(yaml: &str) -> Arc<ScenarioConfig> {
    ConfigLoader::with_defaults()
        .load_str(yaml, Path::new("inline.yaml"))
        .unwrap_or_else(|e| panic!("inline scenario failed to load: {e}"))
        .config
}

/// Builds a runner for a fixture.
#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn runner_for(name: &str) -> ScenarioRunner {
    ScenarioRunner::new(load_fixture(name)).expect("runner should build")
}

/// Applies the next step, panicking if the script is exhausted or fails.
#[allow(clippy::missing_panics_doc)]
pub fn step(runner: &mut ScenarioRunner) -> StepOutcome {
    runner
        .step()
        .expect("step should apply")
        .expect("script should have another step")
}

/// Status of a contract by id.
#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn status(runner: &ScenarioRunner, contract: &str) -> ContractStatus {
    runner
        .tracker()
        .get(contract)
        .unwrap_or_else(|| panic!("no contract {contract}"))
        .status()
}

/// The `goaltrack` binary run as a child process.
pub struct GoalTrackProcess;

impl GoalTrackProcess {
    /// Runs the binary with `args` and waits for it to exit.
    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn spawn_command(args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_goaltrack"))
            .args(args)
            .env_remove("GOALTRACK_SCENARIO")
            .env("NO_COLOR", "1")
            .output()
            .expect("failed to spawn goaltrack")
    }
}
