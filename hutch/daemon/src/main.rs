//! Hutch Daemon - Control Service for a Small Interactive Appliance
//!
//! This is the main entry point for `hutchd`, the daemon that owns the
//! appliance's ears, LEDs, and speaker. Companion services connect over TCP
//! and speak line-delimited JSON.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:10543, simulated device)
//! hutchd
//!
//! # Custom bind address and port
//! hutchd --bind 0.0.0.0 --port 10544
//!
//! # With config file
//! hutchd --config /etc/hutch/hutch.toml
//!
//! # Daemonize (run in background)
//! hutchd --daemonize
//!
//! # Verbose logging
//! RUST_LOG=debug hutchd
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown
//! - `SIGHUP`: Logged and ignored (restart to pick up new configuration)

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use hutch_core::{
    load_config_from_path, ConfigOverrides, DeviceDriver, HutchConfig, Server, SimDriver,
};

/// Hutch Daemon - Control service for the hutch companion robot
#[derive(Parser, Debug)]
#[command(name = "hutchd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to bind the TCP listener on
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Maximum number of concurrent client connections
    #[arg(long, value_name = "N")]
    max_connections: Option<usize>,

    /// Device driver to load (sim)
    #[arg(long, value_name = "NAME")]
    driver: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "HUTCH_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run as daemon (fork to background)
    #[arg(short = 'd', long)]
    daemonize: bool,

    /// PID file path (for daemon mode)
    #[arg(long, env = "HUTCH_PID_FILE", value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "HUTCH_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Get the default PID file path
///
/// Uses XDG_RUNTIME_DIR if available, otherwise /tmp/hutch-$UID/
fn default_pid_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("hutch").join("hutchd.pid")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/hutch-{uid}/hutchd.pid"))
    }
}

/// Write PID file
fn write_pid_file(path: &PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create PID directory: {parent:?}"))?;
    }

    let pid = std::process::id();
    let mut file =
        fs::File::create(path).with_context(|| format!("Failed to create PID file: {path:?}"))?;
    writeln!(file, "{pid}")?;

    info!(pid = pid, path = ?path, "PID file created");
    Ok(())
}

/// Remove PID file
fn remove_pid_file(path: &PathBuf) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, path = ?path, "Failed to remove PID file");
        } else {
            info!(path = ?path, "PID file removed");
        }
    }
}

/// Check if another daemon is running by checking PID file
fn check_existing_daemon(pid_path: &PathBuf) -> Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if !pid_path.exists() {
        return Ok(());
    }

    let pid_str = fs::read_to_string(pid_path)
        .with_context(|| format!("Failed to read PID file: {pid_path:?}"))?;

    let pid: i32 = pid_str
        .trim()
        .parse()
        .with_context(|| "Invalid PID in file")?;

    // Probe with the null signal; delivery is never attempted.
    if kill(Pid::from_raw(pid), None).is_ok() {
        anyhow::bail!(
            "Another hutchd is already running (PID: {pid}). \
             Stop it first or remove {pid_path:?} if it's stale."
        );
    }

    warn!(pid = pid, "Removing stale PID file");
    fs::remove_file(pid_path)?;
    Ok(())
}

/// Initialize logging with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("hutchd={level},hutch_core={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Daemonize the process (fork to background)
fn daemonize() -> Result<()> {
    use nix::unistd::{fork, setsid, ForkResult};

    // First fork
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {
            // Parent exits
            std::process::exit(0);
        }
        Ok(ForkResult::Child) => {
            // Child continues
        }
        Err(e) => {
            anyhow::bail!("First fork failed: {e}");
        }
    }

    // Create new session
    setsid().context("setsid failed")?;

    // Second fork (prevent acquiring controlling terminal)
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {
            std::process::exit(0);
        }
        Ok(ForkResult::Child) => {
            // Grandchild continues as daemon
        }
        Err(e) => {
            anyhow::bail!("Second fork failed: {e}");
        }
    }

    Ok(())
}

/// Layer the configuration: defaults, file, environment, then CLI flags.
fn resolve_config(args: &Args) -> Result<HutchConfig> {
    let mut config = load_config_from_path(args.config.clone())
        .context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(bind) = &args.bind {
        overrides = overrides.with_bind_address(bind.clone());
    }
    if let Some(port) = args.port {
        overrides = overrides.with_port(port);
    }
    if let Some(max) = args.max_connections {
        overrides = overrides.with_max_connections(max);
    }
    if let Some(driver) = &args.driver {
        overrides = overrides.with_driver(driver.clone());
    }
    overrides.apply(&mut config);

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Instantiate the device driver named by the configuration.
fn build_driver(config: &HutchConfig) -> Result<Arc<dyn DeviceDriver>> {
    match config.device.driver.as_str() {
        "sim" => Ok(Arc::new(SimDriver::new(config.device.sim_step))),
        other => anyhow::bail!("Unknown device driver: {other:?}"),
    }
}

/// Run the server until a shutdown signal lands.
async fn serve(config: HutchConfig) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    let shutdown_clone = Arc::clone(&shutdown);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating shutdown");
                    shutdown_clone.store(true, Ordering::SeqCst);
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating shutdown");
                    shutdown_clone.store(true, Ordering::SeqCst);
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP; live reload is not supported, ignoring");
                }
            }
        }
    });

    let driver = build_driver(&config)?;
    let driver_name = driver.name().to_string();

    let mut server = Server::bind(config.server.clone(), config.animator.clone(), driver)
        .await
        .context("Failed to start the TCP server")?;

    info!(
        addr = %server.local_addr(),
        driver = %driver_name,
        "hutchd listening"
    );

    server.run(shutdown).await
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level)?;

    info!("Hutch Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config = resolve_config(&args)?;
    info!(
        bind = %config.server.bind_address,
        port = config.server.port,
        driver = %config.device.driver,
        source = %config.source(),
        "Configuration resolved"
    );
    if let Some(path) = &config.config_file_path {
        info!(config_path = ?path, "Config file");
    }

    let pid_path = args.pid_file.clone().unwrap_or_else(default_pid_path);
    info!(pid_path = ?pid_path, "PID file path");

    // Check for existing daemon
    check_existing_daemon(&pid_path)?;

    // Daemonize if requested. This happens before the runtime exists:
    // worker threads do not survive a fork.
    if args.daemonize {
        info!("Daemonizing...");
        daemonize()?;
        info!("Daemonized, new PID: {}", std::process::id());
    }

    // Write PID file
    write_pid_file(&pid_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let result = runtime.block_on(serve(config));

    // Cleanup
    info!("Shutting down...");
    remove_pid_file(&pid_path);

    match result {
        Ok(()) => {
            info!("Hutch daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn pid_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("hutchd.pid");

        write_pid_file(&path).expect("write pid file");
        let mut contents = String::new();
        fs::File::open(&path)
            .expect("open pid file")
            .read_to_string(&mut contents)
            .expect("read pid file");
        assert_eq!(contents.trim(), std::process::id().to_string());

        remove_pid_file(&path);
        assert!(!path.exists(), "pid file should be gone");
    }

    #[test]
    fn a_live_pid_blocks_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hutchd.pid");

        // Our own PID is definitely alive.
        write_pid_file(&path).expect("write pid file");
        let err = check_existing_daemon(&path).expect_err("should refuse to start");
        assert!(err.to_string().contains("already running"), "{err}");
    }

    #[test]
    fn a_stale_pid_file_is_cleared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hutchd.pid");

        // Far above any real pid_max, so the probe sees no such process.
        fs::write(&path, "999999999\n").expect("write stale pid");
        check_existing_daemon(&path).expect("stale file should be cleared");
        assert!(!path.exists(), "stale pid file should be removed");
    }

    #[test]
    fn garbage_in_the_pid_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hutchd.pid");

        fs::write(&path, "not a pid\n").expect("write garbage");
        assert!(check_existing_daemon(&path).is_err());
    }

    #[test]
    fn missing_pid_file_is_fine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("does-not-exist.pid");
        check_existing_daemon(&path).expect("missing file is not an error");
    }
}
