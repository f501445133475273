//! Driver and engine roles of the i-PI socket protocol.
//!
//! A [`Server`] (driver) owns the listening socket, accepts one engine
//! connection and asks it for energy and forces geometry by geometry. A
//! [`Client`] (engine) connects to a driver and answers with an injected
//! [`Engine`]. Values cross this crate's API in Å and eV; conversion to the
//! protocol's Bohr and Hartree happens at the wire boundary ([`units`]).
//!
//! Nothing here installs a `tracing` subscriber. Without one, logging is a
//! no-op.

mod connection;

pub mod client;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod server;
pub mod supervisor;
pub mod units;

pub use client::{Client, ClientConfig, ConnectionState, StepReport};
pub use engine::{CellResponse, Engine, EngineError, Evaluation, HarmonicEngine, ZeroEngine};
pub use error::{PeerError, Result};
pub use geometry::{ForceResult, Geometry, Mat3};
pub use server::{Server, ServerConfig, CRASH_POLL_INTERVAL, UNCONNECTED_EXIT_GRACE};
pub use supervisor::{substitute, Supervisor};
