use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use config::{Config, OutputFormat};
use flexi_logger::{
    Age, Cleanup, Criterion, Duplicate, FileSpec, LogSpecBuilder, LogSpecification, Logger,
    LoggerHandle, Naming,
};
use log::LevelFilter;
use printer::WatchPrinter;
use services::toplevel::{Request, ToplevelId, ToplevelService};
use std::{io, path::PathBuf};

mod config;
mod printer;
mod services;

/// List, watch and control the windows of a wlroots-style compositor.
#[derive(Parser, Debug)]
#[command(name = "toplevels", version, about)]
struct Cli {
    /// Config file, defaults to ~/.config/toplevels.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    /// Only report a sync when the window actually changed
    #[arg(long)]
    dedup_synced: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Print every open window once
    List,
    /// Print window events until the compositor goes away
    Watch,
    Activate {
        id: u32,
    },
    Maximize {
        id: u32,
        #[arg(long)]
        unset: bool,
    },
    Minimize {
        id: u32,
        #[arg(long)]
        unset: bool,
    },
    Fullscreen {
        id: u32,
        #[arg(long)]
        unset: bool,
    },
    Close {
        id: u32,
    },
}

impl Command {
    fn request(self) -> Option<(ToplevelId, Request)> {
        let (id, request) = match self {
            Command::List | Command::Watch => return None,
            Command::Activate { id } => (id, Request::Activate),
            Command::Maximize { id, unset } => (id, Request::SetMaximized(!unset)),
            Command::Minimize { id, unset } => (id, Request::SetMinimized(!unset)),
            Command::Fullscreen { id, unset } => (id, Request::SetFullscreen(!unset)),
            Command::Close { id } => (id, Request::Close),
        };
        Some((ToplevelId(id), request))
    }
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if self.dedup_synced {
            config.dedup_synced = true;
        }
    }
}

// Module paths plus the `target:` prefixes used by the toplevel service.
const LOG_TARGETS: [&str; 3] = ["toplevels", "Toplevel", "WatchPrinter"];

fn log_spec(level: LevelFilter) -> LogSpecification {
    let mut builder = LogSpecBuilder::new();
    for target in LOG_TARGETS {
        builder.module(target, level);
    }
    builder.build()
}

fn start_logger(level: LevelFilter) -> anyhow::Result<LoggerHandle> {
    let level = if cfg!(debug_assertions) {
        level.max(LevelFilter::Info)
    } else {
        level
    };

    let handle = Logger::with(log_spec(level))
        .log_to_file(FileSpec::default().directory("/tmp/toplevels"))
        .duplicate_to_stderr(Duplicate::Warn)
        .rotate(
            Criterion::Age(Age::Day),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(7),
        )
        .start()
        .context("failed to start the logger")?;

    Ok(handle)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut config = config::read_config(&config_path)?;
    cli.apply(&mut config);

    let _logger = start_logger(config.log_level()?)?;
    log::debug!("Using config {config:?}");

    let mut service = ToplevelService::connect(config.max_manager_version, config.dedup_synced)
        .context("failed to start the toplevel service")?;

    match cli.command {
        Command::List => {
            service.roundtrip()?;
            log::debug!(
                "{} live toplevels on manager version {}",
                service.registry().len(),
                service.registry().manager_version()
            );
            for toplevel in service.registry().synced() {
                let row = toplevel.committed().and_then(|snapshot| {
                    printer::render_listing(config.format, toplevel.id(), snapshot)
                });
                if let Some(row) = row {
                    println!("{row}");
                }
            }
            service.stop()?;
        }
        Command::Watch => {
            service.subscribe(Box::new(WatchPrinter::new(config.format, io::stdout())));
            service.run()?;
        }
        command => {
            let Some((id, request)) = command.request() else {
                return Ok(());
            };

            service.roundtrip()?;
            if service.registry().get(id).is_none() {
                bail!("no open window with id {id}");
            }

            log::info!("Sending {request:?} to toplevel {id}");
            service.request(id, request)?;
            service.roundtrip()?;
        }
    }

    Ok(())
}
