use clap::ValueEnum;
use ipisock_peer::{
    Client, ClientConfig, Engine, EngineError, Evaluation, Geometry, HarmonicEngine, ZeroEngine,
};
use tracing::debug;

use crate::cmd::{parse_optional_duration, ClientArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_session, OutputFormat, SessionSummary};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum EngineKind {
    /// Zero energy, forces and stress.
    Zero,
    /// Harmonic springs tethering every atom to the origin.
    Harmonic,
}

/// The engines the CLI can serve, behind one concrete type.
enum BuiltinEngine {
    Zero(ZeroEngine),
    Harmonic(HarmonicEngine),
}

impl BuiltinEngine {
    fn new(kind: EngineKind, spring: f64) -> CliResult<Self> {
        match kind {
            EngineKind::Zero => Ok(Self::Zero(ZeroEngine)),
            EngineKind::Harmonic => {
                if !spring.is_finite() || spring < 0.0 {
                    return Err(CliError::new(
                        USAGE,
                        format!("--spring must be a finite non-negative number, got {spring}"),
                    ));
                }
                Ok(Self::Harmonic(HarmonicEngine::new(spring)))
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Zero(_) => "zero",
            Self::Harmonic(_) => "harmonic",
        }
    }
}

impl Engine for BuiltinEngine {
    fn evaluate(&mut self, geometry: &Geometry) -> Result<Evaluation, EngineError> {
        match self {
            Self::Zero(engine) => engine.evaluate(geometry),
            Self::Harmonic(engine) => engine.evaluate(geometry),
        }
    }
}

pub fn run(args: ClientArgs, format: OutputFormat) -> CliResult<i32> {
    let engine = BuiltinEngine::new(args.engine, args.spring)?;
    let engine_name = engine.name();

    let config = ClientConfig {
        port: args.endpoint.port,
        unix_socket: args.endpoint.unix.clone(),
        host: args.host.clone(),
        timeout: parse_optional_duration(args.timeout.as_deref())?,
        use_stress: !args.no_stress,
    };
    let endpoint = config
        .endpoint()
        .map_err(|err| peer_error("invalid endpoint", err))?;

    let mut client =
        Client::connect(config, engine).map_err(|err| peer_error("connect failed", err))?;
    while let Some(report) = client
        .step()
        .map_err(|err| peer_error("session failed", err))?
    {
        debug!(
            step = client.steps(),
            natoms = report.geometry.atom_count(),
            energy = report.result.energy,
            "answered geometry"
        );
    }

    print_session(
        &SessionSummary {
            endpoint: endpoint.to_string(),
            steps: client.steps(),
            engine: engine_name,
        },
        format,
    );
    Ok(SUCCESS)
}
