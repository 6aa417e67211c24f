#![allow(clippy::multiple_crate_versions)]
#![doc = include_str!("../../README.md")]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand, ValueEnum};
use jiff::Timestamp;
use log::{info, LevelFilter};
use nix::unistd::Uid;

mod bootloader;
mod bootscript;
mod build;
mod cleanup;
mod compress;
mod config;
mod content;
mod format;
mod host;
mod loopback;
mod parted;
mod spec;
mod utils;

use crate::{
    build::ImageBuilder,
    cleanup::FailureHandler,
    config::BuildConfig,
    content::MountTable,
    host::System,
    loopback::LoopbackManager,
};

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::Debug,
            LogLevel::Info => Self::Info,
            LogLevel::Warning => Self::Warn,
            LogLevel::Error | LogLevel::Critical => Self::Error,
        }
    }
}

#[derive(Debug, Subcommand)]
enum CliSubcommand {
    BuildImage {
        #[arg(help = "Project File")]
        project: PathBuf,
    },
    BuildPartitions {
        #[arg(help = "Project File")]
        project: PathBuf,
    },
    Cleanup {
        #[arg(help = "Project File")]
        project: PathBuf,
    },
}

#[derive(Parser)]
#[command(version, about = "Firmware and Root Filesystem Image Builder")]
struct Cli {
    #[arg(short, long, help = "Tool Configuration File")]
    config_file: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t, help = "Log Level")]
    log_level: LogLevel,

    #[clap(subcommand)]
    command: CliSubcommand,
}

fn build_image(project: &Path, config_file: Option<&Path>) -> Result<(), anyhow::Error> {
    if !Uid::effective().is_root() {
        bail!("Building an image requires root privileges");
    }

    let config = BuildConfig::load(project, config_file)
        .with_context(|| format!("Couldn't load project {}", project.display()))?;

    let mut builder = ImageBuilder::new(System, &config, Timestamp::now())?;
    let image = builder.run()?;

    info!("Image {} is ready", image.display());
    Ok(())
}

fn cleanup(project: &Path, config_file: Option<&Path>) -> Result<(), anyhow::Error> {
    let config = BuildConfig::load(project, config_file)
        .with_context(|| format!("Couldn't load project {}", project.display()))?;

    FailureHandler::with_chroot(&config.paths.rootfs_mountpoint).handle(
        &mut System,
        &mut LoopbackManager::default(),
        &mut MountTable::default(),
    );

    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(cli.log_level.into())
        .init();

    info!(
        "Running {} {}",
        env!("CARGO_CRATE_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config_file = cli.config_file.as_deref();

    match cli.command {
        CliSubcommand::BuildImage { project } => build_image(&project, config_file),
        CliSubcommand::BuildPartitions { project } => {
            info!(
                "Building partitions of {} not yet implemented",
                project.display()
            );
            Ok(())
        }
        CliSubcommand::Cleanup { project } => cleanup(&project, config_file),
    }
}
