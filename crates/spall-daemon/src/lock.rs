//! Lock-file leader election.
//!
//! At most one daemon runs per data directory. The lock file carries
//! JSON `{pid, port}`: a claimant writes `port: null`, and the server
//! publishes the real port once it is listening. Clients follow the
//! claim / write-port / publish handshake to either become the leader
//! (spawning the server) or a follower of a healthy peer.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use spall_core::{Error, Result};

/// Poll interval while a claimant is still starting.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How many polls before giving up on a claimant (~2 s).
pub const LOCK_POLL_ATTEMPTS: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub port: Option<u16>,
}

/// The daemon's mutual-exclusion primitive.
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempts the exclusive create. `Ok(true)` means this process is
    /// now the claimant.
    pub fn try_claim(&self, pid: u32) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                let info = LockInfo { pid, port: None };
                file.write_all(encode(&info)?.as_bytes())?;
                debug!(pid, path = %self.path.display(), "claimed lock");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the current lock, `None` if the file is gone (a claimant
    /// raced and released).
    pub fn read(&self) -> Result<Option<LockInfo>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let info = serde_json::from_str(&raw)
                    .map_err(|e| Error::other(format!("corrupt lock file: {e}")))?;
                Ok(Some(info))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrites the lock; the server's publish step.
    pub fn write(&self, info: &LockInfo) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, encode(info)?)?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the lock only when it still names `pid`. Guards against
    /// deleting a lock a `--force` replacement has already taken over.
    pub fn remove_if_owned(&self, pid: u32) -> Result<()> {
        match self.read()? {
            Some(info) if info.pid == pid => self.remove(),
            Some(info) => {
                warn!(
                    lock_pid = info.pid,
                    self_pid = pid,
                    "lock taken over; leaving it in place"
                );
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn encode(info: &LockInfo) -> Result<String> {
    serde_json::to_string(info).map_err(|e| Error::other(format!("encode lock: {e}")))
}

/// Whether a pid is alive (signal 0 probe).
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    // Without a cheap liveness probe, assume the claimant is alive and
    // let the poll timeout decide.
    true
}

/// Sends SIGTERM to a pid (used by `--force` takeover and `/shutdown`).
#[cfg(unix)]
pub fn terminate_pid(pid: u32) {
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGTERM,
    );
}

#[cfg(not(unix))]
pub fn terminate_pid(_pid: u32) {}

/// GET `/health` against a published port.
pub async fn health_ok(port: u16) -> bool {
    let url = format!("http://127.0.0.1:{port}/health");
    match reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_millis(500))
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Polls the lock until the claimant publishes its port (~2 s).
pub async fn wait_for_port(lock: &LockFile) -> Result<Option<u16>> {
    for _ in 0..LOCK_POLL_ATTEMPTS {
        match lock.read()? {
            Some(LockInfo {
                port: Some(port), ..
            }) => return Ok(Some(port)),
            Some(LockInfo { pid, port: None }) => {
                if !pid_alive(pid) {
                    return Ok(None);
                }
                tokio::time::sleep(LOCK_POLL_INTERVAL).await;
            }
            None => return Ok(None),
        }
    }
    Ok(None)
}

/// Outcome of [`acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonEndpoint {
    pub url: String,
    pub port: u16,
    /// Whether this client claimed the lock (and spawned the server).
    pub leader: bool,
}

/// Runs the leader-election protocol: claim the lock and spawn a server,
/// or follow a healthy peer. `spawn_server` is invoked at most once per
/// successful claim.
pub async fn acquire<F>(lock: &LockFile, spawn_server: F) -> Result<DaemonEndpoint>
where
    F: Fn() -> Result<()>,
{
    let pid = std::process::id();
    let mut waited = 0u32;
    loop {
        if lock.try_claim(pid)? {
            spawn_server()?;
            match wait_for_port(lock).await? {
                Some(port) if health_ok(port).await => {
                    return Ok(DaemonEndpoint {
                        url: format!("http://127.0.0.1:{port}"),
                        port,
                        leader: true,
                    });
                }
                _ => {
                    lock.remove()?;
                    return Err(Error::other("spawned server failed to become healthy"));
                }
            }
        }
        match lock.read()? {
            // Raced with a release; retry the claim.
            None => continue,
            Some(LockInfo {
                port: Some(port), ..
            }) => {
                if health_ok(port).await {
                    return Ok(DaemonEndpoint {
                        url: format!("http://127.0.0.1:{port}"),
                        port,
                        leader: false,
                    });
                }
                lock.remove()?;
            }
            Some(LockInfo { pid: owner, port: None }) => {
                if !pid_alive(owner) {
                    lock.remove()?;
                } else {
                    waited += 1;
                    if waited > LOCK_POLL_ATTEMPTS {
                        return Err(Error::other(
                            "timed out waiting for the daemon to publish its port",
                        ));
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_in(dir: &Path) -> LockFile {
        LockFile::new(dir.join("server.lock"))
    }

    #[test]
    fn claim_is_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = lock_in(tmp.path());
        assert!(lock.try_claim(100).unwrap());
        assert!(!lock.try_claim(200).unwrap());

        let info = lock.read().unwrap().unwrap();
        assert_eq!(info.pid, 100);
        assert_eq!(info.port, None);
    }

    #[test]
    fn publish_and_read_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = lock_in(tmp.path());
        lock.write(&LockInfo {
            pid: 7,
            port: Some(4242),
        })
        .unwrap();
        let info = lock.read().unwrap().unwrap();
        assert_eq!(info.port, Some(4242));

        // Wire shape is stable JSON.
        let raw = std::fs::read_to_string(lock.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["pid"], 7);
        assert_eq!(value["port"], 4242);
    }

    #[test]
    fn remove_if_owned_respects_takeover() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = lock_in(tmp.path());
        lock.write(&LockInfo { pid: 1, port: None }).unwrap();

        // Different pid: the lock stays.
        lock.remove_if_owned(2).unwrap();
        assert!(lock.read().unwrap().is_some());

        lock.remove_if_owned(1).unwrap();
        assert!(lock.read().unwrap().is_none());
    }

    #[test]
    fn missing_lock_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = lock_in(tmp.path());
        assert_eq!(lock.read().unwrap(), None);
        lock.remove().unwrap(); // idempotent
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[tokio::test]
    async fn wait_for_port_times_out_on_dead_claimant() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = lock_in(tmp.path());
        // A pid that is practically never alive.
        lock.write(&LockInfo {
            pid: u32::MAX - 1,
            port: None,
        })
        .unwrap();
        assert_eq!(wait_for_port(&lock).await.unwrap(), None);
    }
}
