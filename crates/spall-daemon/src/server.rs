//! Server lifecycle: startup guard, port binding and publication,
//! signals, and graceful shutdown with lock release.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

use spall_core::{Error, Result};

use crate::lock::{health_ok, pid_alive, terminate_pid, LockFile, LockInfo, LOCK_POLL_ATTEMPTS, LOCK_POLL_INTERVAL};
use crate::{routes, AppHandle};

/// Runs the daemon to completion: bind `127.0.0.1` on an ephemeral
/// port, publish it through the lock, serve until idle timeout, signal,
/// or `/shutdown`, then release the lock if still owned.
pub async fn run(app: AppHandle) -> Result<()> {
    let settings = app.settings.clone();
    let lock = LockFile::new(settings.lock_path());
    let pid = std::process::id();

    startup_guard(&lock, pid, settings.force).await?;

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    lock.write(&LockInfo {
        pid,
        port: Some(port),
    })?;
    info!(pid, port, data_dir = %settings.data_dir.display(), "daemon listening");

    if !settings.persist {
        tokio::spawn(app.idle.clone().watch(
            Duration::from_millis(settings.idle_timeout_ms),
            app.shutdown.clone(),
        ));
    }

    let router = routes::router(app.clone());
    let shutdown = app.shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    app.models.dispose();
    lock.remove_if_owned(pid)?;
    info!("daemon stopped");
    Ok(())
}

/// Before binding: refuse to start over a healthy peer unless forced;
/// clean up stale locks; let a live claimant's entry stand (it is the
/// process that spawned us, waiting for our port).
async fn startup_guard(lock: &LockFile, pid: u32, force: bool) -> Result<()> {
    match lock.read()? {
        None => {
            // Direct start with no election: claim for ourselves.
            lock.try_claim(pid)?;
            Ok(())
        }
        Some(info) if info.pid == pid => Ok(()),
        Some(info) => match info.port {
            Some(port) if health_ok(port).await => {
                if !force {
                    return Err(Error::config(format!(
                        "another daemon (pid {}) is already serving on port {port}",
                        info.pid
                    )));
                }
                info!(prior = info.pid, "force takeover");
                lock.write(&LockInfo { pid, port: None })?;
                terminate_pid(info.pid);
                for _ in 0..LOCK_POLL_ATTEMPTS {
                    if !pid_alive(info.pid) {
                        break;
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Ok(())
            }
            Some(_) => {
                // Dead peer left its lock behind.
                lock.remove()?;
                lock.try_claim(pid)?;
                Ok(())
            }
            None => {
                if pid_alive(info.pid) {
                    // A claimant (normally our spawner) is waiting for
                    // the port publish; binding will overwrite.
                    Ok(())
                } else {
                    lock.remove()?;
                    lock.try_claim(pid)?;
                    Ok(())
                }
            }
        },
    }
}

/// One-shot handlers for SIGINT/SIGTERM plus the internal shutdown
/// notify used by the idle watcher and `/shutdown`.
async fn shutdown_signal(shutdown: Arc<Notify>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
        _ = shutdown.notified() => info!("shutdown requested"),
    }
}
