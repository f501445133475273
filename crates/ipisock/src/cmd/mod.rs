use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::logging::Role;
use crate::output::OutputFormat;

pub mod client;
pub mod probe;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Act as the driver: send a geometry to an engine and print its forces.
    Serve(ServeArgs),
    /// Act as the engine: connect to a driver and answer with a built-in engine.
    Client(ClientArgs),
    /// Wait for one engine to connect and print its status.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

impl Command {
    pub fn role(&self) -> Role {
        match self {
            Command::Serve(_) | Command::Probe(_) => Role::Driver,
            Command::Client(_) => Role::Engine,
            Command::Version(_) => Role::Tool,
        }
    }
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Client(args) => client::run(args, format),
        Command::Probe(args) => probe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// TCP port or Unix socket path; at most one.
#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// TCP port (default 31415 when no socket path is given).
    #[arg(long, conflicts_with = "unix")]
    pub port: Option<u16>,
    /// Unix domain socket path.
    #[arg(long, value_name = "PATH")]
    pub unix: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// Timeout for accept and socket I/O (e.g. 5s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Shell command starting the engine; {port} and {unixsocket} are substituted.
    #[arg(long, value_name = "CMD")]
    pub launch: Option<String>,
    /// JSON geometry file: {"cell": [[..], [..], [..]], "positions": [[x, y, z], ...]}.
    #[arg(long, value_name = "FILE")]
    pub geometry: PathBuf,
    /// Number of times to evaluate the geometry.
    #[arg(long, default_value = "1")]
    pub steps: usize,
    /// Send EXIT to the engine before closing.
    #[arg(long)]
    pub exit: bool,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// Driver host for TCP connections.
    #[arg(long, default_value = "localhost")]
    pub host: String,
    /// Timeout for socket I/O (e.g. 5s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Built-in engine to serve.
    #[arg(long, value_enum, default_value = "zero")]
    pub engine: client::EngineKind,
    /// Spring constant for the harmonic engine (eV/Å²).
    #[arg(long, default_value = "1.0")]
    pub spring: f64,
    /// Always report a zero virial.
    #[arg(long)]
    pub no_stress: bool,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// How long to wait for an engine to connect (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Send EXIT after reading the status.
    #[arg(long)]
    pub exit: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

pub fn parse_optional_duration(input: Option<&str>) -> CliResult<Option<Duration>> {
    input.map(parse_duration).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn optional_duration() {
        assert_eq!(parse_optional_duration(None).unwrap(), None);
        assert_eq!(
            parse_optional_duration(Some("500ms")).unwrap(),
            Some(Duration::from_millis(500))
        );
    }
}
