//! pgbind CLI - provision PostgreSQL binding users from the command line
//!
//! Every command loads one provider configuration, opens a single admin
//! session, runs one lifecycle operation and prints the outcome as JSON.
//! Transient failures (network, timeout) exit with `EX_TEMPFAIL` so callers
//! can retry.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pgbind_core::prelude::*;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `EX_TEMPFAIL` from sysexits.h
const EXIT_RETRIABLE: u8 = 75;

#[derive(Parser)]
#[command(name = "pgbind")]
#[command(version, about = "Provision PostgreSQL binding users under a shared data owner role")]
struct Cli {
    /// Path to provider configuration file
    #[arg(short, long, env = "PGBIND_CONFIG", default_value = "provider.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or reconcile a binding user
    Provision {
        /// Login role name
        #[arg(short, long)]
        username: String,

        /// Password for the login role
        #[arg(short, long, env = "PGBIND_BINDING_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Drop a binding user, handing its objects to the owner role
    Deprovision {
        /// Login role name
        #[arg(short, long)]
        username: String,
    },
    /// Show the observed state of a binding user
    Inspect {
        /// Login role name
        #[arg(short, long)]
        username: String,
    },
    /// Create the data owner role if it does not exist
    EnsureOwner,
    /// Drop the data owner role once no binding users remain
    DropOwner,
    /// Connect and report the admin principal
    Check,
    /// Validate the configuration file without connecting
    Validate,
}

/// JSON document printed on success
#[derive(Serialize)]
struct Report<'a, T: Serialize> {
    operation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    owner_role: &'a str,
    outcome: T,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let retriable = e
                .downcast_ref::<Error>()
                .is_some_and(Error::is_retriable);
            if retriable {
                ExitCode::from(EXIT_RETRIABLE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = ProviderConfig::from_file(&cli.config)
        .map_err(Error::from)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    if let Commands::Validate = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let service = BindingService::from_config(&config).map_err(Error::from)?;
    let owner = service.owner_role().name().to_string();
    info!(
        host = %config.host,
        database = %config.database,
        owner = %owner,
        "Using provider configuration"
    );

    match cli.command {
        Commands::Provision { username, password } => {
            let user = BindingUser::new(username.as_str(), password).map_err(Error::from)?;
            let outcome = service.provision(&user).await.map_err(Error::from)?;
            print_report("provision", Some(&username), &owner, outcome)
        }
        Commands::Deprovision { username } => {
            let outcome = service.deprovision(&username).await.map_err(Error::from)?;
            print_report("deprovision", Some(&username), &owner, outcome)
        }
        Commands::Inspect { username } => {
            let state = service.inspect(&username).await.map_err(Error::from)?;
            print_report("inspect", Some(&username), &owner, state)
        }
        Commands::EnsureOwner => {
            let outcome = service.ensure_owner_role().await.map_err(Error::from)?;
            print_report("ensure_owner", None, &owner, outcome)
        }
        Commands::DropOwner => {
            let outcome = service.remove_owner_role().await.map_err(Error::from)?;
            print_report("drop_owner", None, &owner, outcome)
        }
        Commands::Check => {
            let principal = service.check().await?;
            print_report("check", None, &owner, principal)
        }
        Commands::Validate => Ok(()),
    }
}

fn print_report<T: Serialize>(
    operation: &str,
    username: Option<&str>,
    owner_role: &str,
    outcome: T,
) -> Result<()> {
    let report = Report {
        operation,
        username,
        owner_role,
        outcome,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_provision() {
        let cli = Cli::try_parse_from([
            "pgbind",
            "--config",
            "/etc/pgbind/provider.yaml",
            "provision",
            "--username",
            "u1",
            "--password",
            "pw",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/pgbind/provider.yaml"));
        match cli.command {
            Commands::Provision { username, password } => {
                assert_eq!(username, "u1");
                assert_eq!(password, "pw");
            }
            _ => panic!("expected provision"),
        }
    }

    #[test]
    fn test_parse_owner_commands() {
        let cli = Cli::try_parse_from(["pgbind", "ensure-owner"]).unwrap();
        assert!(matches!(cli.command, Commands::EnsureOwner));
        let cli = Cli::try_parse_from(["pgbind", "drop-owner"]).unwrap();
        assert!(matches!(cli.command, Commands::DropOwner));
    }

    #[test]
    fn test_report_omits_missing_username() {
        let report = Report {
            operation: "ensure_owner",
            username: None,
            owner_role: "app_owner",
            outcome: OwnerRoleOutcome::Created,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "created");
        assert!(json.get("username").is_none());
    }
}
