use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use bytes::Bytes;
use ipisock_frame::{InitData, Token};
use ipisock_transport::{Endpoint, IpiListener, IpiStream, TransportError};
use tracing::{debug, info, warn};

use crate::connection::{validate_timeout, Connection};
use crate::error::{PeerError, Result};
use crate::geometry::{ForceResult, Geometry};
use crate::supervisor::{substitute, Supervisor};

/// How long one accept slice lasts while a launched subprocess is watched.
pub const CRASH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long `close` waits for a subprocess that never connected before
/// killing it.
pub const UNCONNECTED_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Driver-side settings. Exactly one of `port` and `unix_socket` may be
/// set; with neither, the server listens on TCP port 31415.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub unix_socket: Option<PathBuf>,
    /// Timeout for the accept (without subprocess) and every socket
    /// operation afterwards. `None` blocks indefinitely.
    pub timeout: Option<Duration>,
    /// Shell command started right after binding. `{port}` and
    /// `{unixsocket}` are substituted.
    pub launch_command: Option<String>,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on a TCP port; 0 picks an ephemeral port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.unix_socket = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_launch_command(mut self, command: impl Into<String>) -> Self {
        self.launch_command = Some(command.into());
        self
    }

    /// The endpoint these settings select.
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::resolve(self.port, self.unix_socket.clone()).map_err(PeerError::from_endpoint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closed,
}

/// The driver role: owns the listening socket, the single accepted
/// connection and, optionally, the engine subprocess.
///
/// The connection is accepted lazily by the first operation that needs it.
/// Any error after a connection exists drops that connection.
pub struct Server {
    lifecycle: Lifecycle,
    endpoint: Endpoint,
    timeout: Option<Duration>,
    listener: Option<IpiListener>,
    supervisor: Option<Supervisor>,
    connection: Option<Connection>,
    /// Whether the subprocess ever connected.
    accepted: bool,
    atom_count: Option<usize>,
    exit_status: Option<ExitStatus>,
}

impl Server {
    /// Bind the endpoint and start the launch command, if any.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let endpoint = config.endpoint()?;
        validate_timeout(config.timeout)?;

        let listener = IpiListener::bind(&endpoint)?;
        let endpoint = listener.endpoint();
        info!(%endpoint, "accepting clients");

        let supervisor = match &config.launch_command {
            Some(template) => {
                let command = substitute(template, endpoint.port(), endpoint.path());
                Some(Supervisor::launch(&command)?)
            }
            None => None,
        };

        Ok(Self {
            lifecycle: Lifecycle::Open,
            endpoint,
            timeout: config.timeout,
            listener: Some(listener),
            supervisor,
            connection: None,
            accepted: false,
            atom_count: None,
            exit_status: None,
        })
    }

    /// The bound endpoint, with an ephemeral port resolved.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The real listening port, for TCP servers.
    pub fn port(&self) -> Option<u16> {
        self.endpoint.port()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle == Lifecycle::Closed
    }

    /// Process id of the launched subprocess.
    pub fn subprocess_id(&self) -> Option<u32> {
        self.supervisor.as_ref().map(Supervisor::id)
    }

    /// Exit status of the launched subprocess, known once `close` waited
    /// for it.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Block until a client connects. A no-op when already connected.
    ///
    /// With a launched subprocess the wait is sliced so that a subprocess
    /// dying before it connects surfaces as [`PeerError::SubprocessCrashed`].
    pub fn accept(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.connection.is_some() {
            return Ok(());
        }
        let listener = self.listener.as_ref().ok_or(PeerError::Closed)?;

        info!(endpoint = %self.endpoint, "awaiting client");
        let stream = match self.supervisor.as_mut() {
            Some(supervisor) => accept_supervised(listener, supervisor)?,
            None => match self.timeout {
                Some(timeout) => listener
                    .accept_timeout(timeout)?
                    .ok_or(TransportError::TimedOut(timeout))?,
                None => listener.accept()?,
            },
        };

        let connection = Connection::establish(stream, self.timeout)?;
        info!(peer = connection.peer(), "accepted connection");
        self.connection = Some(connection);
        self.accepted = true;
        Ok(())
    }

    /// Send one geometry to the client and wait for its forces.
    ///
    /// Accepts a client first if none is connected yet. Every geometry of a
    /// session must have the atom count of the first one.
    pub fn calculate(&mut self, geometry: &Geometry) -> Result<ForceResult> {
        self.ensure_open()?;
        let natoms = geometry.atom_count();
        if let Some(expected) = self.atom_count {
            if expected != natoms {
                return Err(PeerError::GeometryChanged {
                    expected,
                    found: natoms,
                });
            }
        }

        self.accept()?;
        let result = self.with_connection(|conn| exchange(conn, geometry))?;
        self.atom_count.get_or_insert(natoms);
        Ok(result)
    }

    /// Ask the client for its status without sending anything else.
    pub fn status(&mut self) -> Result<Token> {
        self.ensure_open()?;
        self.accept()?;
        self.with_connection(|conn| match conn.request(&Token::Status)? {
            reply @ (Token::Ready | Token::HaveData | Token::NeedInit) => Ok(reply),
            other => Err(PeerError::violation("READY, HAVEDATA or NEEDINIT", other)),
        })
    }

    /// Send `INIT` with bead index 0 and the given payload.
    pub fn send_init(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.accept()?;
        let data = InitData {
            bead: 0,
            payload: Bytes::copy_from_slice(payload),
        };
        self.with_connection(|conn| {
            conn.writer.send_init(&data)?;
            debug!(len = data.payload.len(), "sent init");
            Ok(())
        })
    }

    /// Tell the client to terminate.
    pub fn send_exit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.accept()?;
        self.with_connection(|conn| {
            conn.writer.send_token(&Token::Exit)?;
            debug!("sent exit");
            Ok(())
        })
    }

    /// Release the connection, wait for the subprocess, then release the
    /// listening socket. Idempotent.
    ///
    /// A nonzero subprocess exit status is only logged; it is available
    /// from [`Server::exit_status`] afterwards.
    pub fn close(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Closed {
            return Ok(());
        }
        self.lifecycle = Lifecycle::Closed;
        debug!(endpoint = %self.endpoint, "closing server");

        if let Some(connection) = self.connection.take() {
            connection.close();
        }

        let waited = match self.supervisor.as_mut() {
            Some(supervisor) => reap(supervisor, self.accepted).map(|status| {
                if !status.success() {
                    warn!(%status, command = supervisor.command(), "subprocess exited with nonzero status");
                }
                Some(status)
            }),
            None => Ok(None),
        };

        self.listener = None;
        self.exit_status = waited?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Open => Ok(()),
            Lifecycle::Closed => Err(PeerError::Closed),
        }
    }

    /// Run `op` on the live connection, dropping the connection if it fails.
    fn with_connection<T>(
        &mut self,
        op: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let connection = self.connection.as_mut().ok_or(PeerError::Closed)?;
        let result = op(connection);
        if let Err(err) = &result {
            warn!(error = %err, "dropping connection after error");
            if let Some(connection) = self.connection.take() {
                connection.close();
            }
        }
        result
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "server close failed during drop");
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("endpoint", &self.endpoint)
            .field("lifecycle", &self.lifecycle)
            .field("connected", &self.connection.is_some())
            .field("subprocess", &self.subprocess_id())
            .finish()
    }
}

fn accept_supervised(listener: &IpiListener, supervisor: &mut Supervisor) -> Result<IpiStream> {
    loop {
        if let Some(stream) = listener.accept_timeout(CRASH_POLL_INTERVAL)? {
            return Ok(stream);
        }
        if let Some(status) = supervisor.try_status()? {
            warn!(%status, command = supervisor.command(), "subprocess exited before connecting");
            return Err(PeerError::SubprocessCrashed(status));
        }
        debug!(pid = supervisor.id(), "subprocess alive; still waiting for it to connect");
    }
}

/// Wait for the subprocess. One that never connected may be waiting on us,
/// so it gets `UNCONNECTED_EXIT_GRACE` before it is killed.
fn reap(supervisor: &mut Supervisor, accepted: bool) -> Result<ExitStatus> {
    if accepted {
        return supervisor.wait();
    }
    match supervisor.wait_timeout(UNCONNECTED_EXIT_GRACE)? {
        Some(status) => Ok(status),
        None => supervisor.kill(),
    }
}

/// One full STATUS / POSDATA / STATUS / GETFORCE cycle.
fn exchange(conn: &mut Connection, geometry: &Geometry) -> Result<ForceResult> {
    match conn.request(&Token::Status)? {
        Token::Ready => {}
        // Tolerated: this driver never needs to initialise the client.
        Token::NeedInit => debug!("client reports NEEDINIT; sending geometry anyway"),
        other => return Err(PeerError::violation("READY or NEEDINIT", other)),
    }

    let natoms = geometry.atom_count();
    conn.writer.send_posdata(&geometry.to_posdata())?;

    match conn.request(&Token::Status)? {
        Token::HaveData => {}
        other => return Err(PeerError::violation("HAVEDATA", other)),
    }
    match conn.request(&Token::GetForce)? {
        Token::ForceReady => {}
        other => return Err(PeerError::violation("FORCEREADY", other)),
    }

    let data = conn.reader.recv_force()?;
    if data.atom_count() != natoms {
        return Err(PeerError::violation(
            format!("forces for {natoms} atoms"),
            format!("forces for {} atoms", data.atom_count()),
        ));
    }

    let result = ForceResult::from_force_data(data);
    debug!(natoms, energy = result.energy, "calculation complete");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use ipisock_frame::{ForceData, WireReader, WireWriter};

    use super::*;
    use crate::client::{Client, ClientConfig};
    use crate::engine::{HarmonicEngine, ZeroEngine};
    use crate::geometry::ZERO3;

    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    fn two_atoms_at_origin() -> Geometry {
        Geometry::new(IDENTITY, vec![[0.0; 3]; 2]).unwrap()
    }

    fn ephemeral() -> Server {
        Server::bind(ServerConfig::new().with_port(0)).unwrap()
    }

    fn spawn_zero_client(port: u16) -> thread::JoinHandle<Result<u64>> {
        thread::spawn(move || {
            let mut client = Client::connect(ClientConfig::new().with_port(port), ZeroEngine)?;
            client.run()
        })
    }

    /// A hand-driven client for checking the driver against misbehaving
    /// peers.
    fn raw_client(port: u16) -> (WireReader<IpiStream>, WireWriter<IpiStream>) {
        let stream = IpiStream::connect(&Endpoint::Tcp(port), "localhost").unwrap();
        ipisock_frame::split(stream).unwrap()
    }

    #[test]
    fn zero_engine_over_default_port() {
        let mut server = Server::bind(ServerConfig::default()).unwrap();
        assert_eq!(server.port(), Some(31415));
        let client = spawn_zero_client(31415);

        let result = server.calculate(&two_atoms_at_origin()).unwrap();
        assert_eq!(result.energy, 0.0);
        assert_eq!(result.forces, vec![[0.0; 3]; 2]);
        assert_eq!(result.virial, ZERO3);

        server.close().unwrap();
        assert_eq!(client.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn harmonic_results_are_in_working_units() {
        let mut server = ephemeral();
        let port = server.port().unwrap();
        let client = thread::spawn(move || {
            let mut client =
                Client::connect(ClientConfig::new().with_port(port), HarmonicEngine::new(2.0))?;
            client.run()
        });

        let geometry = Geometry::new(IDENTITY, vec![[0.5, 0.0, 0.0], [0.0, 0.0, -1.0]]).unwrap();
        let result = server.calculate(&geometry).unwrap();
        assert!((result.energy - 1.25).abs() < 1e-9);
        assert!((result.forces[0][0] + 1.0).abs() < 1e-9);
        assert!((result.forces[1][2] - 2.0).abs() < 1e-9);

        let second = server.calculate(&geometry).unwrap();
        assert!((second.energy - result.energy).abs() < 1e-12);

        server.close().unwrap();
        assert_eq!(client.join().unwrap().unwrap(), 2);
    }

    #[test]
    fn ephemeral_port_is_reported() {
        let server = ephemeral();
        assert_ne!(server.port(), Some(0));
        assert!(server.port().is_some());
    }

    #[test]
    fn both_endpoints_is_config_error() {
        let config = ServerConfig::new()
            .with_port(31415)
            .with_unix_socket("/tmp/ipi-both");
        assert!(matches!(Server::bind(config), Err(PeerError::Config(_))));
    }

    #[test]
    fn zero_timeout_is_config_error() {
        let config = ServerConfig::new()
            .with_port(0)
            .with_timeout(Duration::ZERO);
        assert!(matches!(Server::bind(config), Err(PeerError::Config(_))));
    }

    #[test]
    fn accept_times_out_without_client() {
        let mut server =
            Server::bind(ServerConfig::new().with_port(0).with_timeout(Duration::from_millis(100)))
                .unwrap();
        let err = server.accept().unwrap_err();
        assert!(matches!(err, PeerError::Transport(TransportError::TimedOut(_))));
        assert!(!server.is_connected());
    }

    #[test]
    fn geometry_change_is_rejected_before_sending() {
        let mut server = ephemeral();
        let client = spawn_zero_client(server.port().unwrap());

        server.calculate(&two_atoms_at_origin()).unwrap();
        let three = Geometry::new(IDENTITY, vec![[0.0; 3]; 3]).unwrap();
        let err = server.calculate(&three).unwrap_err();
        assert!(matches!(
            err,
            PeerError::GeometryChanged {
                expected: 2,
                found: 3
            }
        ));

        // The session survives the rejected geometry.
        assert!(server.is_connected());
        server.calculate(&two_atoms_at_origin()).unwrap();

        server.close().unwrap();
        assert_eq!(client.join().unwrap().unwrap(), 2);
    }

    #[test]
    fn exit_ends_client_session() {
        let mut server = ephemeral();
        let client = spawn_zero_client(server.port().unwrap());

        server.send_exit().unwrap();
        assert_eq!(client.join().unwrap().unwrap(), 0);
        server.close().unwrap();
    }

    #[test]
    fn init_is_consumed_by_client() {
        let mut server = ephemeral();
        let client = spawn_zero_client(server.port().unwrap());

        server.send_init(b"bead settings").unwrap();
        let result = server.calculate(&two_atoms_at_origin()).unwrap();
        assert_eq!(result.atom_count(), 2);

        server.close().unwrap();
        assert_eq!(client.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn status_probe_reports_ready() {
        let mut server = ephemeral();
        let client = spawn_zero_client(server.port().unwrap());

        assert_eq!(server.status().unwrap(), Token::Ready);
        server.close().unwrap();
        assert_eq!(client.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn needinit_reply_is_tolerated() {
        let mut server = ephemeral();
        let port = server.port().unwrap();
        let fake = thread::spawn(move || {
            let (mut reader, mut writer) = raw_client(port);
            assert_eq!(reader.recv_token().unwrap(), Token::Status);
            writer.send_token(&Token::NeedInit).unwrap();
            assert_eq!(reader.recv_token().unwrap(), Token::Posdata);
            let data = reader.recv_posdata().unwrap();
            assert_eq!(reader.recv_token().unwrap(), Token::Status);
            writer.send_token(&Token::HaveData).unwrap();
            assert_eq!(reader.recv_token().unwrap(), Token::GetForce);
            writer
                .send_force(&ForceData {
                    energy: 1.0,
                    forces: vec![0.0; data.positions.len()],
                    virial: [0.0; 9],
                    extra: Bytes::from_static(b"meta"),
                })
                .unwrap();
        });

        let result = server.calculate(&two_atoms_at_origin()).unwrap();
        assert!((result.energy - crate::units::HARTREE).abs() < 1e-9);
        assert_eq!(result.extra, b"meta");
        fake.join().unwrap();
    }

    #[test]
    fn unexpected_reply_drops_connection() {
        let mut server = ephemeral();
        let port = server.port().unwrap();
        let fake = thread::spawn(move || {
            let (mut reader, mut writer) = raw_client(port);
            assert_eq!(reader.recv_token().unwrap(), Token::Status);
            writer.send_token(&Token::HaveData).unwrap();
            // Wait for the driver to hang up.
            reader.recv_token().unwrap_err()
        });

        let err = server.calculate(&two_atoms_at_origin()).unwrap_err();
        assert!(matches!(
            err,
            PeerError::ProtocolViolation { ref received, .. } if received == "HAVEDATA"
        ));
        assert!(!server.is_connected());
        assert!(fake.join().unwrap().is_peer_closed());
    }

    #[test]
    fn mismatched_force_count_is_violation() {
        let mut server = ephemeral();
        let port = server.port().unwrap();
        let fake = thread::spawn(move || {
            let (mut reader, mut writer) = raw_client(port);
            assert_eq!(reader.recv_token().unwrap(), Token::Status);
            writer.send_token(&Token::Ready).unwrap();
            assert_eq!(reader.recv_token().unwrap(), Token::Posdata);
            reader.recv_posdata().unwrap();
            assert_eq!(reader.recv_token().unwrap(), Token::Status);
            writer.send_token(&Token::HaveData).unwrap();
            assert_eq!(reader.recv_token().unwrap(), Token::GetForce);
            writer
                .send_force(&ForceData {
                    energy: 0.0,
                    forces: vec![0.0; 3],
                    virial: [0.0; 9],
                    extra: Bytes::new(),
                })
                .unwrap();
        });

        let err = server.calculate(&two_atoms_at_origin()).unwrap_err();
        assert!(matches!(err, PeerError::ProtocolViolation { .. }));
        fake.join().unwrap();
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let mut server = ephemeral();
        server.close().unwrap();
        server.close().unwrap();
        assert!(server.is_closed());
        assert!(matches!(
            server.calculate(&two_atoms_at_origin()),
            Err(PeerError::Closed)
        ));
        assert!(server.exit_status().is_none());
    }

    #[test]
    #[cfg(unix)]
    fn unix_socket_session_and_cleanup() {
        let dir = std::env::temp_dir().join(format!(
            "ipisock-server-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("driver.sock");

        let mut server = Server::bind(ServerConfig::new().with_unix_socket(&path)).unwrap();
        assert_eq!(server.port(), None);
        let client_path = path.clone();
        let client = thread::spawn(move || {
            let mut client =
                Client::connect(ClientConfig::new().with_unix_socket(client_path), ZeroEngine)?;
            client.run()
        });

        let result = server.calculate(&two_atoms_at_origin()).unwrap();
        assert_eq!(result.atom_count(), 2);
        server.close().unwrap();
        assert_eq!(client.join().unwrap().unwrap(), 1);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    #[cfg(unix)]
    fn subprocess_exiting_before_connect_is_crash() {
        let mut server =
            Server::bind(ServerConfig::new().with_port(0).with_launch_command("exit 1")).unwrap();
        let err = server.calculate(&two_atoms_at_origin()).unwrap_err();
        match err {
            PeerError::SubprocessCrashed(status) => assert_eq!(status.code(), Some(1)),
            other => panic!("expected SubprocessCrashed, got {other:?}"),
        }
        server.close().unwrap();
        assert_eq!(server.exit_status().and_then(|s| s.code()), Some(1));
    }

    #[test]
    #[cfg(unix)]
    fn nonzero_exit_after_session_is_recorded() {
        let mut server = Server::bind(
            ServerConfig::new()
                .with_port(0)
                .with_launch_command("sleep 1; exit 128"),
        )
        .unwrap();
        let client = spawn_zero_client(server.port().unwrap());

        server.calculate(&two_atoms_at_origin()).unwrap();
        server.close().unwrap();
        assert_eq!(server.exit_status().and_then(|s| s.code()), Some(128));
        assert_eq!(client.join().unwrap().unwrap(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn close_kills_subprocess_that_never_connected() {
        let mut server =
            Server::bind(ServerConfig::new().with_port(0).with_launch_command("exec sleep 30"))
                .unwrap();
        let start = std::time::Instant::now();
        server.close().unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= UNCONNECTED_EXIT_GRACE, "closed after {elapsed:?}");
        assert!(elapsed < UNCONNECTED_EXIT_GRACE + Duration::from_secs(5));
        let status = server.exit_status().unwrap();
        assert!(!status.success());
        assert_eq!(status.code(), None);
    }

    #[test]
    #[cfg(unix)]
    fn launch_command_receives_real_port() {
        let dir = std::env::temp_dir().join(format!("ipisock-launch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("port.txt");
        let command = format!("echo {{port}} > {}", out.display());

        let mut server =
            Server::bind(ServerConfig::new().with_port(0).with_launch_command(command)).unwrap();
        let port = server.port().unwrap();
        server.close().unwrap();
        assert!(server.exit_status().unwrap().success());
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), port.to_string());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
