//! keediff - reconcile diverged KeePass databases
//!
//! Compare, deduplicate, merge and search KDBX files from the command line.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::{Command, Session};

const PASSWORD_A_VAR: &str = "KEEDIFF_PASSWORD_A";
const PASSWORD_B_VAR: &str = "KEEDIFF_PASSWORD_B";

/// keediff - reconcile diverged KeePass databases
#[derive(Parser, Debug)]
#[command(name = "keediff", author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print only the summary of a report
    #[arg(long, global = true)]
    summary: bool,

    #[command(flatten)]
    credentials: Credentials,

    #[command(subcommand)]
    command: Command,
}

/// How to unlock the first (A) and second (B) database of a command.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct Credentials {
    /// Password for database A (or KEEDIFF_PASSWORD_A)
    #[arg(long, value_name = "PASSWORD", global = true)]
    pub password_a: Option<String>,

    /// Password for database B (or KEEDIFF_PASSWORD_B)
    #[arg(long, value_name = "PASSWORD", global = true)]
    pub password_b: Option<String>,

    /// Key file for database A
    #[arg(long, value_name = "FILE", global = true)]
    pub keyfile_a: Option<PathBuf>,

    /// Key file for database B
    #[arg(long, value_name = "FILE", global = true)]
    pub keyfile_b: Option<PathBuf>,
}

impl Credentials {
    pub fn password_a(&self) -> Option<String> {
        self.password_a
            .clone()
            .or_else(|| std::env::var(PASSWORD_A_VAR).ok())
    }

    /// Falls back to A's password, the common case of one password for both.
    pub fn password_b(&self) -> Option<String> {
        self.password_b
            .clone()
            .or_else(|| std::env::var(PASSWORD_B_VAR).ok())
            .or_else(|| self.password_a())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "keediff=debug"
    } else {
        "keediff=info"
    };
    // Logs go to stderr so stdout carries only JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let config = config::Config::load(cli.config)?;
    let session = Session {
        config,
        credentials: cli.credentials,
        summary_only: cli.summary,
    };

    commands::run(cli.command, &session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "keediff",
            "compare",
            "a.kdbx",
            "b.kdbx",
            "--password-a",
            "one",
            "--summary",
        ])
        .unwrap();
        assert!(cli.summary);
        assert_eq!(cli.credentials.password_a.as_deref(), Some("one"));
        assert!(matches!(cli.command, Command::Compare { .. }));
    }

    #[test]
    fn rejects_malformed_arguments_before_opening_anything() {
        let bad_uuid = Cli::try_parse_from([
            "keediff", "import", "s.kdbx", "t.kdbx", "--mode", "selected", "--select", "zzz",
        ]);
        assert!(bad_uuid.is_err());

        let bad_mode =
            Cli::try_parse_from(["keediff", "import", "s.kdbx", "t.kdbx", "--mode", "everything"]);
        assert!(bad_mode.is_err());

        let bad_criteria =
            Cli::try_parse_from(["keediff", "duplicates", "a.kdbx", "--criteria", "url"]);
        assert!(bad_criteria.is_err());
    }

    #[test]
    fn accepts_base64_uuids() {
        let cli = Cli::try_parse_from([
            "keediff",
            "show",
            "a.kdbx",
            "b.kdbx",
            "AAAAAAAAAAAAAAAAAAAAAA==",
        ])
        .unwrap();
        match cli.command {
            Command::Show { uuid, .. } => assert!(uuid.is_nil()),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn explicit_password_b_wins() {
        let credentials = Credentials {
            password_a: Some("a".into()),
            password_b: Some("b".into()),
            ..Credentials::default()
        };
        assert_eq!(credentials.password_b().as_deref(), Some("b"));
    }
}
