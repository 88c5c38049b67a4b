//! Suite definition file.
//!
//! The file lists the remote suites to run and, for each, the companion
//! program that exercises the device side:
//!
//! ```json
//! {
//!   "test_suites": [
//!     {
//!       "test_name": "mqtt-connect",
//!       "test_suite_id": "abc123",
//!       "companion": { "program": "./device-sim", "args": ["--connect"] }
//!     }
//!   ]
//! }
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

use crate::files::{FileError, read_file};

/// Errors raised while loading or narrowing the suite list.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SuiteFileError {
    /// Raised when the file cannot be read.
    #[error("failed to read suite file: {0}")]
    Read(#[source] FileError),
    /// Raised when the file is not valid suite JSON.
    #[error("failed to parse suite file {path}: {message}")]
    Parse {
        /// File that failed to parse.
        path: Utf8PathBuf,
        /// Parser message.
        message: String,
    },
    /// Raised when a suite entry has a blank required field.
    #[error("suite {index} in {path} has an empty {field}")]
    BlankField {
        /// File containing the entry.
        path: Utf8PathBuf,
        /// Zero-based entry position.
        index: usize,
        /// Offending field.
        field: &'static str,
    },
    /// Raised when a requested suite name is not in the file.
    #[error("no suite named {name}")]
    UnknownSuite {
        /// Requested name.
        name: String,
    },
}

/// Companion program for one suite.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CompanionSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory, relative to the current directory.
    #[serde(default)]
    pub working_dir: Option<Utf8PathBuf>,
}

/// One remote suite.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct SuiteDefinition {
    /// Display name, also used for selection on the command line.
    pub test_name: String,
    /// Remote suite definition identifier.
    pub test_suite_id: String,
    /// Disabled suites are reported as skipped.
    #[serde(default)]
    pub disabled: bool,
    /// Device-side program run while the suite executes.
    pub companion: CompanionSpec,
}

/// Parsed suite file.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct SuiteFile {
    /// Suites in file order.
    pub test_suites: Vec<SuiteDefinition>,
}

impl SuiteFile {
    /// Reads and validates the suite file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteFileError`] when the file is unreadable, malformed, or
    /// has an entry with a blank name, id, or program.
    pub fn load(path: &Utf8Path) -> Result<Self, SuiteFileError> {
        let contents = read_file(path).map_err(SuiteFileError::Read)?;
        Self::parse(path, &contents)
    }

    /// Parses suite JSON; `origin` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteFileError`] when the JSON is malformed or an entry has
    /// a blank required field.
    pub fn parse(origin: &Utf8Path, contents: &str) -> Result<Self, SuiteFileError> {
        let parsed: Self = serde_json::from_str(contents).map_err(|err| SuiteFileError::Parse {
            path: origin.to_path_buf(),
            message: err.to_string(),
        })?;
        for (index, suite) in parsed.test_suites.iter().enumerate() {
            let blank = [
                ("test_name", suite.test_name.as_str()),
                ("test_suite_id", suite.test_suite_id.as_str()),
                ("companion.program", suite.companion.program.as_str()),
            ]
            .into_iter()
            .find(|(_, value)| value.trim().is_empty());
            if let Some((field, _)) = blank {
                return Err(SuiteFileError::BlankField {
                    path: origin.to_path_buf(),
                    index,
                    field,
                });
            }
        }
        Ok(parsed)
    }

    /// Suites that are not disabled.
    pub fn enabled(&self) -> impl Iterator<Item = &SuiteDefinition> {
        self.test_suites.iter().filter(|suite| !suite.disabled)
    }

    /// Narrows the file to the named suites, keeping file order. An empty
    /// selection keeps every suite.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteFileError::UnknownSuite`] for the first name that does
    /// not match any suite.
    pub fn select(self, names: &[String]) -> Result<Self, SuiteFileError> {
        if names.is_empty() {
            return Ok(self);
        }
        if let Some(missing) = names
            .iter()
            .find(|name| !self.test_suites.iter().any(|suite| &suite.test_name == *name))
        {
            return Err(SuiteFileError::UnknownSuite {
                name: missing.clone(),
            });
        }
        Ok(Self {
            test_suites: self
                .test_suites
                .into_iter()
                .filter(|suite| names.contains(&suite.test_name))
                .collect(),
        })
    }
}
