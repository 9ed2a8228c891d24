//! `validate` command handler.

use crate::cli::args::ValidateArgs;
use crate::config::{ConfigLoader, ConfigWarning};
use crate::error::{ConfigError, GoalTrackError, Severity, ValidationIssue};

/// Validates every file, reporting each issue on stderr.
///
/// # Errors
///
/// Returns the first file's error once all files have been checked. With
/// `--strict`, warnings count as errors.
pub fn run(args: &ValidateArgs, quiet: bool) -> Result<(), GoalTrackError> {
    let loader = ConfigLoader::with_defaults();
    let mut first_error = None;

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating scenario");
        let outcome = loader.load(path).and_then(|loaded| {
            if args.strict && !loaded.warnings.is_empty() {
                return Err(ConfigError::ValidationError {
                    path: path.display().to_string(),
                    errors: loaded.warnings.iter().map(as_error).collect(),
                });
            }
            Ok(loaded)
        });

        match outcome {
            Ok(loaded) => {
                for warning in &loaded.warnings {
                    tracing::warn!(
                        location = warning.location.as_deref().unwrap_or("<unknown>"),
                        "{}",
                        warning.message
                    );
                }
                if !quiet {
                    println!(
                        "{}: ok ({} contracts, {} warnings)",
                        path.display(),
                        loaded.config.contracts.len(),
                        loaded.warnings.len()
                    );
                }
            }
            Err(error) => {
                eprintln!("{}: {error}", path.display());
                if let ConfigError::ValidationError { errors, .. } = &error {
                    for issue in errors {
                        eprintln!("  {issue}");
                    }
                }
                first_error.get_or_insert(error);
            }
        }
    }

    first_error.map_or(Ok(()), |e| Err(e.into()))
}

fn as_error(warning: &ConfigWarning) -> ValidationIssue {
    ValidationIssue {
        path: warning.location.clone().unwrap_or_default(),
        message: warning.message.clone(),
        severity: Severity::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scenario_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    const WARNS: &str = r"
scenario: { name: w }
contracts:
  - id: c
    root:
      - { type: any, key: empty }
";

    #[test]
    fn test_warnings_pass_unless_strict() {
        let file = scenario_file(WARNS);
        let lenient = ValidateArgs {
            files: vec![file.path().to_path_buf()],
            strict: false,
        };
        assert!(run(&lenient, true).is_ok());

        let strict = ValidateArgs {
            strict: true,
            ..lenient
        };
        let err = run(&strict, true).unwrap_err();
        assert!(matches!(
            err,
            GoalTrackError::Config(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_checks_every_file() {
        let good = scenario_file(WARNS);
        let args = ValidateArgs {
            files: vec!["/nonexistent/a.yaml".into(), good.path().to_path_buf()],
            strict: false,
        };
        let err = run(&args, true).unwrap_err();
        assert!(matches!(
            err,
            GoalTrackError::Config(ConfigError::MissingFile { .. })
        ));
    }
}
