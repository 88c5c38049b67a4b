//! Binary entry point for the Tether CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use tether::provision::DeprovisionSummary;
use tether::{
    AwsCli, ConfigError, HarnessConfig, ProcessCommandRunner, ProcessCompanionLauncher,
    ProvisionError, ProvisionRequest, Provisioner, ResourceHandle, RunError, RunSettings,
    RunSummary, SuiteFile, SuiteFileError, SuiteOrchestrator,
};

mod cli;
#[cfg(test)]
mod test_helpers;

use cli::{Cli, DeprovisionCommand, ProvisionCommand, RunCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("suite file error: {0}")]
    Suites(#[from] SuiteFileError),
    #[error("provisioning failed: {0}")]
    Provision(#[from] Box<ProvisionError>),
    #[error(transparent)]
    Run(#[from] RunError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config = HarnessConfig::load_without_cli_args()?;
    let cloud = AwsCli::with_process_runner(config.aws_bin.clone(), config.region.clone());
    tracing::debug!(aws = %config.aws_bin, region = cloud.region(), "using AWS CLI");
    let resolved = config.resolve_secrets(&cloud).await?;
    match cli {
        Cli::Run(command) => run_suites(&command, &resolved, cloud).await,
        Cli::Provision(command) => provision(command, &resolved, &cloud).await,
        Cli::Deprovision(command) => deprovision(&command, &cloud).await,
    }
}

async fn run_suites(
    command: &RunCommand,
    config: &HarnessConfig,
    cloud: AwsCli<ProcessCommandRunner>,
) -> Result<i32, CliError> {
    let settings = RunSettings::from_config(config)?;
    let suites = SuiteFile::load(&config.suites_path())?.select(&command.suites)?;
    let orchestrator = SuiteOrchestrator::new(cloud, ProcessCompanionLauncher, settings);
    let summary = orchestrator
        .run(&suites)
        .await
        .inspect_err(|err| write_summary(io::stdout(), err.completed()))?;
    write_summary(io::stdout(), &summary);
    Ok(summary.exit_code())
}

async fn provision(
    command: ProvisionCommand,
    config: &HarnessConfig,
    cloud: &AwsCli<ProcessCommandRunner>,
) -> Result<i32, CliError> {
    config.validate()?;
    let request = provision_request(command, config);
    let handle = Provisioner::new(cloud)
        .provision(&request)
        .await
        .map_err(Box::new)?;
    write_handle(io::stdout(), &handle);
    Ok(0)
}

async fn deprovision(
    command: &DeprovisionCommand,
    cloud: &AwsCli<ProcessCommandRunner>,
) -> Result<i32, CliError> {
    let summary = Provisioner::new(cloud)
        .deprovision(&command.thing_name)
        .await
        .map_err(Box::new)?;
    write_deprovision(io::stdout(), &command.thing_name, summary);
    Ok(0)
}

fn provision_request(command: ProvisionCommand, config: &HarnessConfig) -> ProvisionRequest {
    ProvisionRequest {
        thing_name: command.thing_name,
        policy_name: config.policy_name().to_owned(),
        thing_group: command.thing_group.or_else(|| config.thing_group.clone()),
        certificate_path: command
            .certificate
            .map_or_else(|| config.certificate_path(), Utf8PathBuf::from),
        key_path: command
            .key
            .map_or_else(|| config.key_path(), Utf8PathBuf::from),
    }
}

fn write_summary(mut target: impl Write, summary: &RunSummary) {
    for report in &summary.suites {
        writeln!(target, "{report}").ok();
    }
}

fn write_handle(mut target: impl Write, handle: &ResourceHandle) {
    writeln!(target, "thing: {}", handle.thing_arn).ok();
    writeln!(target, "certificate: {}", handle.certificate_arn).ok();
    writeln!(target, "certificate file: {}", handle.certificate_path).ok();
    writeln!(target, "key file: {}", handle.key_path).ok();
}

fn write_deprovision(mut target: impl Write, thing: &str, summary: DeprovisionSummary) {
    if summary.thing_deleted {
        writeln!(
            target,
            "deleted {thing} and {} certificate(s)",
            summary.certificates_deleted
        )
        .ok();
    } else {
        writeln!(target, "{thing} was already absent").ok();
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
