//! The i-PI socket protocol: a driver sends atomic geometries, an engine
//! answers with energy, forces and virial.
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoints, listening with backlog 1, bounded accept, streams
//! - [`frame`]: 12-byte tokens and native-order array codec
//! - [`peer`]: `Server` (driver) and `Client` (engine) roles, units, engines (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use ipisock_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ipisock_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use ipisock_peer::*;
}
