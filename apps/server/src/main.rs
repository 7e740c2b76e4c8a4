//! slimcast - headless LMS to DLNA/UPnP renderer bridge.
//!
//! Loads the XML configuration, applies command-line overrides, wires the
//! core services and runs until a signal or the interactive `exit`
//! command. `-i` runs a single discovery scan, saves the configuration
//! and exits.

mod prompt;
mod slim;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use slimcast_core::config::{LogConfig, LogLevel};
use slimcast_core::{bootstrap_services, ConfigStore};
use tokio::signal;

use crate::prompt::PromptCommand;
use crate::slim::SlimAdapter;

const LICENSE: &str = "\
This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
";

/// slimcast - bridge LMS players onto DLNA/UPnP renderers.
#[derive(Parser, Debug)]
#[command(name = "slimcast", version, about, long_about = None)]
struct Args {
    /// Connect to the specified LMS server, otherwise autodiscover.
    #[arg(short = 's', value_name = "SERVER[:PORT]")]
    server: Option<String>,

    /// Read configuration from this file.
    #[arg(short = 'x', value_name = "FILE", default_value = "./config.xml")]
    config: PathBuf,

    /// Discover players, save the configuration file, and exit.
    #[arg(short = 'i', value_name = "FILE")]
    save_and_exit: Option<PathBuf>,

    /// Auto-save the configuration at every network scan.
    #[arg(short = 'I')]
    autosave: bool,

    /// Write debug output to a log file.
    #[arg(short = 'f', value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Write the PID to a file.
    #[arg(short = 'p', value_name = "FILE")]
    pid_file: Option<PathBuf>,

    /// Set a log level: <facility>=<level>, facility one of
    /// all|slimproto|stream|decode|output|main|upnp|util|slimmain,
    /// level one of error|warn|info|debug|sdebug.
    #[arg(short = 'd', value_name = "FACILITY=LEVEL")]
    debug: Vec<String>,

    /// Not interactive (no command prompt).
    #[arg(short = 'Z')]
    non_interactive: bool,

    /// Immediate exit on SIGQUIT and SIGTERM.
    #[arg(short = 'k')]
    ungraceful: bool,

    /// Daemonize.
    #[cfg(unix)]
    #[arg(short = 'z')]
    daemonize: bool,

    /// Print license terms and exit.
    #[arg(short = 't')]
    license: bool,
}

/// Applies one `-d facility=level` override.
fn apply_debug_override(log: &mut LogConfig, spec: &str) -> Result<()> {
    let (facility, level) = spec
        .split_once('=')
        .with_context(|| format!("bad -d argument '{}'", spec))?;
    let level = LogLevel::parse(level);
    match facility {
        "all" => {
            *log = LogConfig {
                slimproto: level,
                stream: level,
                decode: level,
                output: level,
                main: level,
                upnp: level,
                util: level,
                slimmain: level,
            }
        }
        "slimproto" => log.slimproto = level,
        "stream" => log.stream = level,
        "decode" => log.decode = level,
        "output" => log.output = level,
        "main" => log.main = level,
        "upnp" => log.upnp = level,
        "util" => log.util = level,
        "slimmain" => log.slimmain = level,
        _ => anyhow::bail!("unknown log facility '{}'", facility),
    }
    Ok(())
}

/// The most verbose configured facility sets the process-wide filter.
fn max_filter(log: &LogConfig) -> log::LevelFilter {
    [
        log.slimproto,
        log.stream,
        log.decode,
        log.output,
        log.main,
        log.upnp,
        log.util,
        log.slimmain,
    ]
    .into_iter()
    .map(LogLevel::to_filter)
    .max()
    .unwrap_or(log::LevelFilter::Info)
}

fn init_logging(log: &LogConfig, log_file: Option<&PathBuf>) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(max_filter(log)).format_timestamp_millis();
    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("error opening logfile {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

#[cfg(unix)]
fn daemonize() -> Result<()> {
    // double-fork is unnecessary here; one fork plus setsid detaches
    unsafe {
        match libc::fork() {
            -1 => anyhow::bail!("fork failed: {}", std::io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }
        if libc::setsid() == -1 {
            anyhow::bail!("setsid failed: {}", std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn main() {
    // argument errors exit 1, per the documented CLI contract
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    if args.license {
        print!("{}", LICENSE);
        return;
    }

    #[cfg(unix)]
    if args.daemonize && args.save_and_exit.is_none() {
        if let Err(e) = daemonize() {
            eprintln!("error daemonizing: {e:#}");
            std::process::exit(1);
        }
    }

    if let Err(e) = run_with_runtime(args) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

/// Builds the runtime after the daemonize fork; forking a live runtime
/// breaks its worker threads.
fn run_with_runtime(args: Args) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot build runtime")?
        .block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    // config first, then command-line overrides
    let (store, mut global, mut common) = ConfigStore::load(&args.config);
    if let Some(server) = &args.server {
        common.server = server.clone();
    }
    for spec in &args.debug {
        apply_debug_override(&mut global.log, spec)?;
    }

    init_logging(&global.log, args.log_file.as_ref())?;
    log::info!("Starting slimcast version {}", env!("CARGO_PKG_VERSION"));

    if let Some(path) = &args.pid_file {
        std::fs::write(path, std::process::id().to_string())
            .with_context(|| format!("cannot open PID file {}", path.display()))?;
    }

    let adapter = Arc::new(SlimAdapter::default());
    let mut services = bootstrap_services(
        global,
        common,
        store,
        adapter.clone(),
        adapter,
        args.autosave,
    )
    .context("cannot start the bridge")?;

    // discover, save, exit
    if let Some(path) = &args.save_and_exit {
        log::info!("[Main] discovering players for {}", path.display());
        services.registry.scan_once().await;
        services.registry.save_config_to(path, true)?;
        return Ok(());
    }

    if let Some(path) = args.log_file.clone() {
        services.set_log_file(path);
    }
    services.start_background_tasks();

    let interactive = {
        #[cfg(unix)]
        let daemonized = args.daemonize;
        #[cfg(not(unix))]
        let daemonized = false;
        !args.non_interactive && !daemonized
    };
    let mut prompt_rx = if interactive { Some(prompt::spawn()) } else { None };

    loop {
        let command = tokio::select! {
            _ = shutdown_signal() => {
                if args.ungraceful {
                    log::info!("forced exit");
                    std::process::exit(0);
                }
                break;
            }
            command = recv_prompt(&mut prompt_rx) => command,
        };

        match command {
            Some(PromptCommand::Exit) => break,
            Some(PromptCommand::Save(path)) => {
                if let Err(e) = services.registry.save_config_to(&path, true) {
                    log::error!("[Main] save failed: {}", e);
                }
            }
            Some(PromptCommand::Debug(facility, level)) => {
                // facility granularity is a start-time concern; at runtime
                // the process-wide filter follows the most verbose request
                log::info!("[Main] {:?} log level -> {}", facility, level);
                let filter = level.to_filter().max(log::max_level());
                log::set_max_level(filter);
            }
            None => break, // stdin closed
        }
    }

    services.shutdown().await;
    Ok(())
}

async fn recv_prompt(
    rx: &mut Option<tokio::sync::mpsc::UnboundedReceiver<PromptCommand>>,
) -> Option<PromptCommand> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Resolves on Ctrl+C, SIGTERM or SIGQUIT.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        let mut quit = signal::unix::signal(signal::unix::SignalKind::quit())
            .expect("failed to install SIGQUIT handler");
        tokio::select! {
            _ = term.recv() => {}
            _ = quit.recv() => {}
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
