//! Reading [`PipelineOptions`] from TOML.
//!
//! Options are checked as a whole after deserialization, so a file with
//! several bad values reports all of them at once.

use crate::config::schema::{PipelineOptions, ValidationIssue};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where a set of options came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    Inline,
    File(PathBuf),
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOrigin::Inline => f.write_str("<inline options>"),
            ConfigOrigin::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read pipeline options from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{origin}: malformed pipeline options: {source}")]
    Syntax {
        origin: ConfigOrigin,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("{origin}: {} invalid pipeline option(s){}", .issues.len(), bullet_list(.issues))]
    Invalid {
        origin: ConfigOrigin,
        issues: Vec<ValidationIssue>,
    },
}

impl ConfigError {
    pub fn origin(&self) -> ConfigOrigin {
        match self {
            ConfigError::Read { path, .. } => ConfigOrigin::File(path.clone()),
            ConfigError::Syntax { origin, .. } | ConfigError::Invalid { origin, .. } => {
                origin.clone()
            }
        }
    }
}

fn bullet_list(issues: &[ValidationIssue]) -> String {
    issues.iter().map(|issue| format!("\n  - {issue}")).collect()
}

fn parse(input: &str, origin: ConfigOrigin) -> Result<PipelineOptions, ConfigError> {
    let mut options: PipelineOptions = match toml_edit::de::from_str(input) {
        Ok(options) => options,
        Err(source) => return Err(ConfigError::Syntax { origin, source }),
    };

    // `" no-dbg-macro"` names the same rule as `"no-dbg-macro"`
    options.skip_rule_ids = options
        .skip_rule_ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .collect();

    match options.validate() {
        Ok(()) => Ok(options),
        Err(error) => Err(ConfigError::Invalid {
            origin,
            issues: error.issues,
        }),
    }
}

/// Options from a TOML document held in memory.
pub fn load_from_str(input: &str) -> Result<PipelineOptions, ConfigError> {
    parse(input, ConfigOrigin::Inline)
}

/// Options from a TOML file.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<PipelineOptions, ConfigError> {
    let path = path.as_ref();
    let input = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&input, ConfigOrigin::File(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Category;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(load_from_str("").unwrap(), PipelineOptions::default());
    }

    #[test]
    fn parses_every_field() {
        let options = load_from_str(
            r#"
dry_run = true
enabled_categories = ["security", "style"]
skip_rule_ids = ["trailing-whitespace"]
max_iterations = 4
confidence_threshold = 0.75
workers = 2
backup_root = "/tmp/backups"
context_lines = 5
"#,
        )
        .unwrap();

        assert!(options.dry_run);
        assert!(options.enabled_categories.contains(&Category::Security));
        assert!(!options.enabled_categories.contains(&Category::Correctness));
        assert!(options.skip_rule_ids.contains("trailing-whitespace"));
        assert_eq!(options.max_iterations, 4);
        assert_eq!(options.confidence_threshold, 0.75);
        assert_eq!(options.workers, 2);
        assert_eq!(options.backup_root, PathBuf::from("/tmp/backups"));
        assert_eq!(options.context_lines, 5);
    }

    #[test]
    fn unknown_category_is_a_syntax_error() {
        let err = load_from_str(r#"enabled_categories = ["perf"]"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Syntax {
                origin: ConfigOrigin::Inline,
                ..
            }
        ));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = load_from_str("max_iteration = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { .. }));
    }

    #[test]
    fn skip_rule_ids_are_trimmed() {
        let options = load_from_str(r#"skip_rule_ids = [" no-dbg-macro "]"#).unwrap();
        assert!(options.skip_rule_ids.contains("no-dbg-macro"));
    }

    #[test]
    fn every_invalid_value_is_listed_with_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remediate.toml");
        fs::write(&path, "max_iterations = 0\nconfidence_threshold = 2.0\n").unwrap();

        let err = load_from_path(&path).unwrap_err();
        assert_eq!(err.origin(), ConfigOrigin::File(path.clone()));
        let ConfigError::Invalid { issues, .. } = &err else {
            panic!("expected invalid options, got {err:?}");
        };
        assert_eq!(issues.len(), 2);

        let message = err.to_string();
        assert!(message.contains("remediate.toml: 2 invalid pipeline option(s)"));
        assert!(message.contains("\n  - max_iterations: must be at least 1"));
        assert!(message.contains("\n  - confidence_threshold:"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_from_path("/nonexistent/remediate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
