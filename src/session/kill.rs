use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// What a stop request kills.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StopScope {
    /// Only the process group of the session's own encoder.
    #[default]
    Session,
    /// The session's encoder plus every other process with the same
    /// encoder name (`pkill -x`), even when a wrapper launched it.
    #[value(name = "all")]
    #[serde(rename = "all")]
    AllInstances,
}

#[cfg(unix)]
fn signal_group(pgid: u32) -> io::Result<()> {
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Hard-kill the encoder. `pgid` is the pid captured at spawn, which is also
/// its process group id.
pub(super) fn kill_child(child: &mut Child, pgid: Option<u32>) {
    if let Some(pgid) = pgid {
        match signal_group(pgid) {
            Ok(()) => return,
            Err(error) => debug!(pgid, ?error, "Could not signal encoder process group"),
        }
    }

    if let Err(error) = child.start_kill() {
        debug!(?error, "Could not kill encoder, it has probably exited");
    }
}

/// Fire-and-forget `pkill` for every process named like `encoder`.
pub(super) fn kill_all_instances(encoder: &str) {
    let name = Path::new(encoder)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| encoder.to_string());

    tokio::spawn(async move {
        let pkill = Command::new("pkill")
            .args(["-KILL", "-x", name.as_str()])
            .status()
            .await;
        match pkill {
            // exit code 1 only means nothing matched
            Ok(status) => debug!(%name, %status, "pkill finished"),
            Err(error) => warn!(%name, ?error, "Failed to run pkill"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_scope_names() {
        use clap::ValueEnum;

        assert_eq!(StopScope::default(), StopScope::Session);
        assert_eq!(StopScope::from_str("all", false), Ok(StopScope::AllInstances));
        assert_eq!(StopScope::from_str("session", false), Ok(StopScope::Session));

        let parsed: StopScope = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(parsed, StopScope::AllInstances);
    }
}
