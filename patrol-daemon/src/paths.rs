use std::path::{Path, PathBuf};

use patrol_core::paths::patrol_root;

pub const DAEMON_LABEL: &str = "dev.patrol.daemon";

pub const DAEMON_STDOUT_LOG: &str = "patrol.log";
pub const DAEMON_STDERR_LOG: &str = "patrol-err.log";
pub const DAEMON_SOCKET: &str = "patrol.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    patrol_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    patrol_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    patrol_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}
