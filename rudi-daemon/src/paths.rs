use std::path::{Path, PathBuf};
use std::time::Duration;

use rudi_core::store::file::{metadata_dir, rudi_root};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
pub const DAEMON_SOCKET: &str = "daemon.sock";

/// Directory whose `<global_id>.json` documents the daemon watches.
pub fn watched_dir(home: &Path) -> PathBuf {
    metadata_dir(home)
}

pub fn run_dir(home: &Path) -> PathBuf {
    rudi_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}
