//! Well-formedness checks run before a document is rewritten.

use crate::config::{ValidatorKind, ValidatorSettings};
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};

/// Outcome of validating one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(String),
    /// The validator cannot run in this environment.
    Unavailable,
}

/// Checks whether a document is safe to canonicalize.
pub trait Validator: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// `text` is the file content already read from `path`.
    fn check(&self, path: &Path, text: &str) -> Validation;
}

/// In-process well-formedness and namespace check.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinValidator;

impl Validator for BuiltinValidator {
    fn name(&self) -> &str {
        "builtin"
    }

    fn check(&self, _path: &Path, text: &str) -> Validation {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        match roxmltree::Document::parse_with_options(text, options) {
            Ok(_) => Validation::Valid,
            Err(e) => Validation::Invalid(e.to_string()),
        }
    }
}

/// Runs an external checker such as `xmllint --noout <file>`.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    program: String,
    args: Vec<String>,
}

impl CommandValidator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Validator for CommandValidator {
    fn name(&self) -> &str {
        &self.program
    }

    fn check(&self, path: &Path, _text: &str) -> Validation {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(out) if out.status.success() => Validation::Valid,
            Ok(out) => Validation::Invalid(String::from_utf8_lossy(&out.stderr).trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => Validation::Unavailable,
            Err(e) => {
                tracing::debug!(program = %self.program, error = %e, "Validator failed to start");
                Validation::Unavailable
            }
        }
    }
}

/// Build the validator selected in settings.
pub fn from_settings(settings: &ValidatorSettings) -> Box<dyn Validator> {
    match settings.kind {
        ValidatorKind::Builtin => Box::new(BuiltinValidator),
        ValidatorKind::Command => Box::new(CommandValidator::new(
            settings.command.clone(),
            settings.args.clone(),
        )),
    }
}
