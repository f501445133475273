use std::path::PathBuf;
use std::time::Duration;

use ipisock_frame::Token;
use ipisock_transport::{Endpoint, IpiStream, DEFAULT_HOST};
use tracing::{debug, info, trace};

use crate::connection::{validate_timeout, Connection};
use crate::engine::{Engine, EngineError};
use crate::error::{PeerError, Result};
use crate::geometry::{ForceResult, Geometry, Mat3, ZERO3};

/// Engine-side settings. Exactly one of `port` and `unix_socket` may be
/// set; with neither, the client connects to TCP port 31415.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub port: Option<u16>,
    pub unix_socket: Option<PathBuf>,
    /// Host for TCP connections.
    pub host: String,
    /// Timeout for every socket operation. `None` blocks indefinitely.
    pub timeout: Option<Duration>,
    /// Report the engine's stress as a virial. When disabled the virial is
    /// always zero.
    pub use_stress: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: None,
            unix_socket: None,
            host: DEFAULT_HOST.to_string(),
            timeout: None,
            use_stress: true,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.unix_socket = Some(path.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stress(mut self, use_stress: bool) -> Self {
        self.use_stress = use_stress;
        self
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::resolve(self.port, self.unix_socket.clone()).map_err(PeerError::from_endpoint)
    }
}

/// Where the client is in the `Ready → HaveData → Ready` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for a geometry.
    Ready,
    /// Holding forces for the last geometry, waiting for `GETFORCE`.
    HaveData,
}

impl ConnectionState {
    /// The reply to `STATUS` in this state.
    pub fn token(self) -> Token {
        match self {
            ConnectionState::Ready => Token::Ready,
            ConnectionState::HaveData => Token::HaveData,
        }
    }

    fn expected(self) -> &'static str {
        match self {
            ConnectionState::Ready => "STATUS, POSDATA, INIT or EXIT",
            ConnectionState::HaveData => "STATUS, GETFORCE, INIT or EXIT",
        }
    }
}

/// One evaluated geometry, reported by [`Client::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub geometry: Geometry,
    pub result: ForceResult,
}

/// The engine role: connects to a driver and answers its requests with the
/// injected [`Engine`].
///
/// The connection is closed on every way out of the message loop: `EXIT`,
/// the driver hanging up, or an error. After that, [`Client::step`]
/// returns `None`.
pub struct Client<E> {
    engine: E,
    connection: Option<Connection>,
    state: ConnectionState,
    cached: Option<ForceResult>,
    use_stress: bool,
    steps: u64,
}

impl<E: Engine> Client<E> {
    /// Connect to the driver described by `config`.
    pub fn connect(config: ClientConfig, engine: E) -> Result<Self> {
        let endpoint = config.endpoint()?;
        validate_timeout(config.timeout)?;
        let stream = IpiStream::connect(&endpoint, &config.host)?;
        info!(%endpoint, host = %config.host, "connected to driver");
        Self::from_stream(stream, &config, engine)
    }

    /// Serve a driver over an already connected stream. Only `timeout` and
    /// `use_stress` of `config` apply.
    pub fn from_stream(stream: IpiStream, config: &ClientConfig, engine: E) -> Result<Self> {
        validate_timeout(config.timeout)?;
        let connection = Connection::establish(stream, config.timeout)?;
        Ok(Self {
            engine,
            connection: Some(connection),
            state: ConnectionState::Ready,
            cached: None,
            use_stress: config.use_stress,
            steps: 0,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_none()
    }

    /// Number of geometries evaluated so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Answer requests until the driver ends the session. Returns the
    /// number of geometries evaluated.
    pub fn run(&mut self) -> Result<u64> {
        while self.step()?.is_some() {}
        info!(steps = self.steps, "session finished");
        Ok(self.steps)
    }

    /// Answer requests until one geometry has been evaluated, or the
    /// session ended (`None`).
    pub fn step(&mut self) -> Result<Option<StepReport>> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(None);
        };

        let outcome = serve_one(
            connection,
            &mut self.engine,
            &mut self.state,
            &mut self.cached,
            self.use_stress,
        );
        match outcome {
            Ok(Some(report)) => {
                self.steps += 1;
                Ok(Some(report))
            }
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(err) => {
                debug!(error = %err, "closing connection after error");
                self.close();
                Err(err)
            }
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.cached = None;
    }
}

impl<E> Drop for Client<E> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

impl<E> std::fmt::Debug for Client<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .field("state", &self.state)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

/// Message loop body: returns after one evaluation, or `None` when the
/// driver ends the session.
fn serve_one<E: Engine>(
    conn: &mut Connection,
    engine: &mut E,
    state: &mut ConnectionState,
    cached: &mut Option<ForceResult>,
    use_stress: bool,
) -> Result<Option<StepReport>> {
    loop {
        let token = match conn.reader.recv_token() {
            Ok(token) => token,
            Err(err) if err.is_peer_closed() => {
                info!("driver closed the connection");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        trace!(%token, state = ?state, "request");

        match (token, *state) {
            (Token::Status, current) => conn.writer.send_token(&current.token())?,
            (Token::Posdata, ConnectionState::Ready) => {
                let data = conn.reader.recv_posdata()?;
                let geometry = Geometry::from_posdata(&data)?;
                let result = evaluate(engine, &geometry, use_stress)?;
                *cached = Some(result.clone());
                *state = ConnectionState::HaveData;
                return Ok(Some(StepReport { geometry, result }));
            }
            (Token::GetForce, ConnectionState::HaveData) => {
                let result = cached
                    .take()
                    .ok_or_else(|| PeerError::violation("POSDATA before GETFORCE", "GETFORCE"))?;
                conn.writer.send_force(&result.to_force_data())?;
                *state = ConnectionState::Ready;
            }
            (Token::Init, _) => {
                let init = conn.reader.recv_init()?;
                debug!(bead = init.bead, len = init.payload.len(), "ignoring init payload");
            }
            (Token::Exit, _) => {
                info!("driver sent exit");
                return Ok(None);
            }
            (token, current) => return Err(PeerError::violation(current.expected(), token)),
        }
    }
}

fn evaluate<E: Engine>(engine: &mut E, geometry: &Geometry, use_stress: bool) -> Result<ForceResult> {
    let evaluation = engine.evaluate(geometry).map_err(PeerError::Engine)?;
    if evaluation.forces.len() != geometry.atom_count() {
        let err: EngineError = format!(
            "engine returned {} force rows for {} atoms",
            evaluation.forces.len(),
            geometry.atom_count()
        )
        .into();
        return Err(PeerError::Engine(err));
    }

    let virial = if use_stress {
        evaluation.virial(geometry.volume())
    } else {
        ZERO3
    };
    check_finite(evaluation.energy, &evaluation.forces, &virial)?;
    debug!(natoms = geometry.atom_count(), energy = evaluation.energy, "evaluated geometry");

    Ok(ForceResult {
        energy: evaluation.energy,
        forces: evaluation.forces,
        virial,
        extra: evaluation.extra,
    })
}

/// Reject non-finite engine output here rather than on the driver's side.
fn check_finite(energy: f64, forces: &[[f64; 3]], virial: &Mat3) -> Result<()> {
    let bad = if !energy.is_finite() {
        Some("energy")
    } else if forces.iter().flatten().any(|v| !v.is_finite()) {
        Some("forces")
    } else if virial.iter().flatten().any(|v| !v.is_finite()) {
        Some("virial")
    } else {
        None
    };
    match bad {
        Some(what) => Err(PeerError::Engine(
            format!("engine returned non-finite {what}").into(),
        )),
        None => Ok(()),
    }
}
