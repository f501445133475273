//! Launching and watching the engine subprocess a server spawns.

use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};

/// Placeholder replaced by the listening TCP port.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Placeholder replaced by the Unix socket path.
pub const UNIXSOCKET_PLACEHOLDER: &str = "{unixsocket}";

/// Fill in `{port}` and `{unixsocket}` in a launch command template.
///
/// A placeholder whose value does not apply to the endpoint is replaced by
/// an empty string.
pub fn substitute(template: &str, port: Option<u16>, path: Option<&Path>) -> String {
    let port = port.map(|p| p.to_string()).unwrap_or_default();
    let path = path
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    template
        .replace(PORT_PLACEHOLDER, &port)
        .replace(UNIXSOCKET_PLACEHOLDER, &path)
}

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A shell command run as a child process for the lifetime of a server.
#[derive(Debug)]
pub struct Supervisor {
    command: String,
    child: Child,
    status: Option<ExitStatus>,
}

impl Supervisor {
    /// Run `command` through the platform shell.
    pub fn launch(command: &str) -> Result<Self> {
        info!(command, "launching subprocess");
        let child = shell(command).spawn().map_err(|source| PeerError::Launch {
            command: command.to_string(),
            source,
        })?;
        debug!(pid = child.id(), "subprocess started");
        Ok(Self {
            command: command.to_string(),
            child,
            status: None,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Exit status if the child has already terminated. Never blocks.
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait().map_err(|e| self.launch_error(e))?;
        }
        Ok(self.status)
    }

    /// Block until the child terminates.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().map_err(|e| self.launch_error(e))?;
        debug!(%status, "subprocess exited");
        self.status = Some(status);
        Ok(status)
    }

    /// Wait at most `limit` for the child to terminate.
    pub fn wait_timeout(&mut self, limit: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = self.try_status()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Kill the child if it is still running, then reap it.
    pub fn kill(&mut self) -> Result<ExitStatus> {
        if self.try_status()?.is_none() {
            warn!(pid = self.child.id(), "killing subprocess that is still running");
            match self.child.kill() {
                Ok(()) => {}
                // Exited between the status check and the kill.
                Err(err) if err.kind() == io::ErrorKind::InvalidInput => {}
                Err(err) => return Err(self.launch_error(err)),
            }
        }
        self.wait()
    }

    fn launch_error(&self, source: io::Error) -> PeerError {
        PeerError::Launch {
            command: self.command.clone(),
            source,
        }
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn substitutes_port() {
        assert_eq!(
            substitute("engine --port {port}", Some(31415), None),
            "engine --port 31415"
        );
    }

    #[test]
    fn substitutes_socket_path() {
        let path = PathBuf::from("/tmp/ipi_h2o");
        assert_eq!(
            substitute("engine {unixsocket} {port}", None, Some(&path)),
            "engine /tmp/ipi_h2o "
        );
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        assert_eq!(substitute("true", Some(1), None), "true");
    }

    #[test]
    #[cfg(unix)]
    fn records_exit_status() {
        let mut sup = Supervisor::launch("exit 3").unwrap();
        let status = sup.wait().unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(sup.try_status().unwrap().and_then(|s| s.code()), Some(3));
    }

    #[test]
    #[cfg(unix)]
    fn try_status_does_not_block() {
        let mut sup = Supervisor::launch("sleep 5").unwrap();
        let start = Instant::now();
        assert!(sup.try_status().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
        let status = sup.kill().unwrap();
        assert!(!status.success());
    }

    #[test]
    #[cfg(unix)]
    fn kill_after_exit_returns_status() {
        let mut sup = Supervisor::launch("exit 0").unwrap();
        sup.wait().unwrap();
        assert!(sup.kill().unwrap().success());
    }

    #[test]
    #[cfg(unix)]
    fn wait_timeout_gives_up_on_running_child() {
        let mut sup = Supervisor::launch("sleep 5").unwrap();
        let start = Instant::now();
        assert!(sup.wait_timeout(Duration::from_millis(200)).unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
        sup.kill().unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn wait_timeout_returns_status_of_quick_child() {
        let mut sup = Supervisor::launch("exit 4").unwrap();
        let status = sup.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(status.and_then(|s| s.code()), Some(4));
    }
}
