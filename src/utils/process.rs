//! Process supervision plumbing: spawning a helper, reading/writing/removing
//! its PID file, and killing a PID reused across a daemon restart. Grounded
//! in the original's
//! `nm_dhcp_client_stop_existing` / `dhcpcd_child_setup` behavior.

use std::os::unix::process::CommandExt;
use std::path::Path;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use crate::errors::{DhcpError, DhcpResult};

/// Reads the decimal PID stored in `path`, if any.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
}

pub fn write_pid_file(path: &Path, pid: u32) -> DhcpResult<()> {
    std::fs::write(path, pid.to_string()).map_err(|source| DhcpError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Idempotent: a missing file is not an error.
pub fn remove_pid_file(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// True iff a process with this PID is currently alive (`kill(pid, 0)`).
pub fn process_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None::<Signal>).is_ok()
}

/// Sends SIGTERM. Missing process (already reaped) is not an error: callers
/// rely on `stop()` being idempotent.
pub fn send_sigterm(pid: u32) {
    let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

/// On daemon start (or before every fresh spawn), kill whatever process a
/// stale PID file points to and remove the file. This is the only
/// cross-restart coordination the manager performs — adoption is never
/// attempted (see DESIGN.md).
pub fn stop_existing(pid_file: &Path) {
    if let Some(pid) = read_pid_file(pid_file) {
        if process_is_alive(pid) {
            send_sigterm(pid);
        }
    }
    remove_pid_file(pid_file);
}

/// Spawns `argv[0]` with the remaining elements as arguments. When
/// `own_process_group` is set the child is placed in its own process group
/// before exec, matching dhcpcd's `setpgid(0, 0)` pre-exec hook; dhclient
/// does not request this.
pub fn spawn_helper(argv: &[String], own_process_group: bool) -> std::io::Result<tokio::process::Child> {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd.env_clear();
    if own_process_group {
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
            });
        }
    }
    cmd.spawn()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn pid_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("nm-dhcp-core-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.pid");

        write_pid_file(&path, 4242).unwrap();
        assert_eq!(read_pid_file(&path), Some(4242));

        remove_pid_file(&path);
        assert_eq!(read_pid_file(&path), None);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stop_existing_is_idempotent_on_missing_file() {
        let path = std::env::temp_dir().join("nm-dhcp-core-does-not-exist.pid");
        remove_pid_file(&path);
        stop_existing(&path); // must not panic
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(process_is_alive(std::process::id()));
    }
}
