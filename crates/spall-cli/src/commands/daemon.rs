//! `spall serve` and `spall daemon ...`.

use anyhow::Result;

use spall_core::Settings;
use spall_daemon::{AppHandle, LockFile};

use crate::cli::DaemonCommands;
use crate::client::Client;
use crate::output;

/// Runs the server in the foreground.
pub async fn serve(force: bool, persist: bool) -> Result<()> {
    let mut settings = Settings::from_env();
    settings.force = settings.force || force;
    settings.persist = settings.persist || persist;

    let app = AppHandle::new(settings).await?;
    spall_daemon::run(app).await?;
    Ok(())
}

pub async fn handle(cmd: DaemonCommands) -> Result<()> {
    match cmd {
        DaemonCommands::Start => start().await,
        DaemonCommands::Stop => stop().await,
        DaemonCommands::Status => status().await,
    }
}

async fn start() -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    output::success(&format!("daemon running at {}", client.base_url()));
    Ok(())
}

async fn stop() -> Result<()> {
    match Client::connect_existing().await? {
        Some(client) => {
            client.post("/shutdown", serde_json::json!({})).await?;
            output::success("daemon stopped");
        }
        None => output::info("daemon is not running"),
    }
    Ok(())
}

async fn status() -> Result<()> {
    let settings = Settings::from_env();
    let lock = LockFile::new(settings.lock_path());
    match lock.read()? {
        None => output::info("daemon is not running"),
        Some(info) => match info.port {
            Some(port) if spall_daemon::lock::health_ok(port).await => {
                output::success(&format!(
                    "daemon running (pid {}, port {port})",
                    info.pid
                ));
            }
            Some(port) => {
                output::info(&format!(
                    "stale lock: pid {} on port {port} is not answering",
                    info.pid
                ));
            }
            None => {
                output::info(&format!("daemon starting (claimant pid {})", info.pid));
            }
        },
    }
    Ok(())
}
