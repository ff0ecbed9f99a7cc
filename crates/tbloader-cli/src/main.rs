//! `tbloader`: stage content onto Talking Books, package it, inspect
//! connected devices and hand out serial numbers.
//!
//! ```bash
//! tbloader copy ./content /media/TB --sync
//! tbloader zip ./content content.zip --subdir system --subdir messages
//! tbloader unzip content.zip ./restored
//! tbloader probe /media/TB --label "TB (E:)"
//! tbloader srn allocate --identity amy@example.org --count 3
//! ```

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "tbloader")]
#[command(about = "Talking Book provisioning tools")]
struct Args {
    /// Config file (default: <config dir>/tbloader/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy a directory tree
    Copy {
        src: PathBuf,
        dst: PathBuf,
        /// Skip files that look unchanged and remove stale destination files
        #[arg(long)]
        sync: bool,
        /// With --sync, leave destination files that have no source
        #[arg(long)]
        keep_extra: bool,
    },
    /// Pack a directory into a zip archive
    Zip {
        dir: PathBuf,
        out: PathBuf,
        /// Prefix entries with the directory's own name
        #[arg(long)]
        include_base: bool,
        /// Only pack these top-level subdirectories (repeatable)
        #[arg(long = "subdir", value_name = "NAME")]
        subdirs: Vec<String>,
    },
    /// Extract a zip archive
    Unzip { archive: PathBuf, out: PathBuf },
    /// Describe the device mounted at a path
    Probe {
        root: PathBuf,
        /// Volume label, e.g. "TB (E:)"
        #[arg(long, default_value = "")]
        label: String,
        /// Project to report when the device does not record one
        #[arg(long)]
        fallback_project: Option<String>,
        /// Print JSON instead of a summary line
        #[arg(long)]
        json: bool,
    },
    /// Serial number allocation
    Srn {
        #[command(subcommand)]
        command: SrnCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SrnCommand {
    /// Allocate serial numbers
    Allocate {
        #[arg(long)]
        identity: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Bearer token for the reservation service
        #[arg(long, env = "TBLOADER_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Show the locally held blocks for an identity
    Status {
        #[arg(long)]
        identity: String,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .log_filter
            .as_deref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tbloader: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);

    let result = match args.command {
        Command::Copy {
            src,
            dst,
            sync,
            keep_extra,
        } => commands::copy(&src, &dst, sync, keep_extra).await,
        Command::Zip {
            dir,
            out,
            include_base,
            subdirs,
        } => commands::zip(dir, out, include_base, subdirs).await,
        Command::Unzip { archive, out } => commands::unzip(archive, out).await,
        Command::Probe {
            root,
            label,
            fallback_project,
            json,
        } => commands::probe(&config, &root, label, fallback_project.as_deref(), json).await,
        Command::Srn { command } => match command {
            SrnCommand::Allocate {
                identity,
                count,
                token,
            } => commands::srn_allocate(&config, &identity, count, token).await,
            SrnCommand::Status { identity } => commands::srn_status(&config, &identity).await,
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
