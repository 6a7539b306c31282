use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use caseline_shared::{EntityKind, Role};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected section.key=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Participant,
    Volunteer,
}

impl From<KindArg> for EntityKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Participant => EntityKind::Participant,
            KindArg::Volunteer => EntityKind::Volunteer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Volunteer,
    Coordinator,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Volunteer => Role::Volunteer,
            RoleArg::Coordinator => Role::Coordinator,
            RoleArg::Admin => Role::Admin,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "caseline",
    version,
    about = "Caseline: case-management sync engine CLI",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "set",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    /// Signed-in user id.
    #[arg(long = "user", env = "CASELINE_USER", global = true)]
    pub user: Option<Uuid>,

    #[arg(long = "role", value_enum, default_value = "volunteer", global = true)]
    pub role: RoleArg,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Warm the session cache and report the gate phase.
    Bootstrap,
    /// Search entities by display name.
    Search {
        #[arg(default_value = "")]
        term: String,
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        #[arg(long)]
        archived: bool,
    },
    Attend {
        entity: Uuid,
    },
    Unattend {
        entity: Uuid,
    },
    /// Phone-call contact log.
    Call {
        #[command(subcommand)]
        action: CallCommand,
    },
    /// Own activity with cancelled visits folded away.
    History,
    /// Append a status update to an entity.
    Status {
        entity: Uuid,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    CountToday,
    Tasks,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CallCommand {
    Done { task: Uuid },
    Reopen { task: Uuid },
    Log { entity: Uuid, note: Option<String> },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
