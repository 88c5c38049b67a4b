//! Command-line interface definitions for the `tether` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `tether` binary.
#[derive(Debug, Parser)]
#[command(
    name = "tether",
    version,
    about = "Provision disposable IoT identities and run remote qualification suites against them",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run the configured qualification suites.
    #[command(name = "run", about = "Run the configured qualification suites")]
    Run(RunCommand),
    /// Provision a thing and write its credentials.
    #[command(name = "provision", about = "Provision a thing and write its credentials")]
    Provision(ProvisionCommand),
    /// Remove a thing and every certificate attached to it.
    #[command(
        name = "deprovision",
        about = "Remove a thing and every certificate attached to it"
    )]
    Deprovision(DeprovisionCommand),
}

/// Arguments for the `tether run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Only run the named suite; repeat to select several. Defaults to all.
    #[arg(long = "suite", value_name = "NAME")]
    pub(crate) suites: Vec<String>,
}

/// Arguments for the `tether provision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Name of the thing to create.
    #[arg(long, value_name = "NAME")]
    pub(crate) thing_name: String,
    /// Add the thing to this group, overriding configuration.
    #[arg(long, value_name = "GROUP")]
    pub(crate) thing_group: Option<String>,
    /// Write the certificate PEM here, overriding configuration.
    #[arg(long, value_name = "PATH")]
    pub(crate) certificate: Option<String>,
    /// Write the private key PEM here, overriding configuration.
    #[arg(long, value_name = "PATH")]
    pub(crate) key: Option<String>,
}

/// Arguments for the `tether deprovision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeprovisionCommand {
    /// Name of the thing to remove.
    #[arg(long, value_name = "NAME")]
    pub(crate) thing_name: String,
}
