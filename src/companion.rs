//! Companion test process launched while a suite run is executing.
//!
//! The remote suite only observes traffic; the companion is the local device
//! program that produces it. It runs once per suite run with a hard timeout,
//! and receives the endpoint and credential locations through environment
//! variables.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;
use tokio::process::Command;
use tokio::time::timeout;

use crate::command::CommandError;

/// Environment variable carrying the endpoint the companion must connect to.
pub const ENDPOINT_ENV: &str = "DA_ENDPOINT";
/// Environment variable carrying the provisioned thing name.
pub const THING_NAME_ENV: &str = "DA_THING_NAME";
/// Environment variable carrying the certificate file path.
pub const CERTIFICATE_ENV: &str = "DA_CERTI";
/// Environment variable carrying the private key file path.
pub const PRIVATE_KEY_ENV: &str = "DA_KEY";
/// Environment variable carrying the seeded shadow property name.
pub const SHADOW_PROPERTY_ENV: &str = "DA_SHADOW_PROPERTY";
/// Environment variable carrying the seeded shadow property value.
pub const SHADOW_VALUE_ENV: &str = "DA_SHADOW_VALUE_DEFAULT";

/// Default ceiling on companion runtime.
pub const DEFAULT_COMPANION_TIMEOUT: Duration = Duration::from_secs(120);

/// Fully resolved companion process launch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompanionInvocation {
    /// Program to execute.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Working directory, when different from the current one.
    pub working_dir: Option<Utf8PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Hard runtime ceiling; the process is killed once exceeded.
    pub timeout: Duration,
}

impl CompanionInvocation {
    /// Renders the command line for diagnostics, shell-escaping each part.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = String::from(escape(self.program.as_str().into()));
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(escape(arg.as_str().into()).as_ref());
        }
        rendered
    }

    /// Looks up an injected environment value by name.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// How a companion launch ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompanionOutcome {
    /// Exited with status zero.
    Succeeded,
    /// Exited with a non-zero status, or was terminated by a signal.
    Failed {
        /// Exit code, when the platform reports one.
        code: Option<i32>,
    },
    /// Exceeded its timeout and was killed.
    TimedOut,
}

impl CompanionOutcome {
    /// Returns `true` when the companion exited cleanly.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Future returned by [`CompanionLauncher::launch`].
pub type CompanionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CompanionOutcome, CommandError>> + Send + 'a>>;

/// Launches companion processes; replaced by scripted fakes in tests.
pub trait CompanionLauncher: Send + Sync {
    /// Runs the companion to completion or until its timeout elapses.
    fn launch<'a>(&'a self, invocation: &'a CompanionInvocation) -> CompanionFuture<'a>;
}

/// Launcher that spawns real processes with inherited stdio.
#[derive(Clone, Debug, Default)]
pub struct ProcessCompanionLauncher;

impl CompanionLauncher for ProcessCompanionLauncher {
    fn launch<'a>(&'a self, invocation: &'a CompanionInvocation) -> CompanionFuture<'a> {
        Box::pin(async move {
            let spawn_error = |err: std::io::Error| CommandError::Spawn {
                program: invocation.program.clone(),
                message: err.to_string(),
            };

            let mut command = Command::new(&invocation.program);
            command
                .args(&invocation.args)
                .envs(invocation.env.iter().map(|(key, value)| (key, value)))
                .kill_on_drop(true);
            if let Some(dir) = &invocation.working_dir {
                command.current_dir(dir);
            }

            let mut child = command.spawn().map_err(spawn_error)?;
            match timeout(invocation.timeout, child.wait()).await {
                Ok(Ok(status)) if status.success() => Ok(CompanionOutcome::Succeeded),
                Ok(Ok(status)) => Ok(CompanionOutcome::Failed {
                    code: status.code(),
                }),
                Ok(Err(err)) => Err(spawn_error(err)),
                Err(_) => {
                    child.kill().await.ok();
                    Ok(CompanionOutcome::TimedOut)
                }
            }
        })
    }
}
