//! The computation a client serves: geometry in, energy and forces out.

use crate::geometry::{Geometry, Mat3, ZERO3};

/// Error type engines report failures with.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// How the engine reports the response of the energy to cell strain.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CellResponse {
    /// No cell response; the virial is reported as zero.
    #[default]
    None,
    /// Stress in eV/Å³. Converted to a virial as `-volume × stress`.
    Stress(Mat3),
    /// Virial in eV, sent as-is.
    Virial(Mat3),
}

/// Result of a single engine evaluation, in working units.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub energy: f64,
    pub forces: Vec<[f64; 3]>,
    pub response: CellResponse,
    pub extra: Vec<u8>,
}

impl Evaluation {
    pub fn new(energy: f64, forces: Vec<[f64; 3]>) -> Self {
        Self {
            energy,
            forces,
            response: CellResponse::None,
            extra: Vec::new(),
        }
    }

    pub fn with_stress(mut self, stress: Mat3) -> Self {
        self.response = CellResponse::Stress(stress);
        self
    }

    pub fn with_virial(mut self, virial: Mat3) -> Self {
        self.response = CellResponse::Virial(virial);
        self
    }

    pub fn with_extra(mut self, extra: impl Into<Vec<u8>>) -> Self {
        self.extra = extra.into();
        self
    }

    /// Virial for a cell of the given volume.
    pub fn virial(&self, volume: f64) -> Mat3 {
        match self.response {
            CellResponse::None => ZERO3,
            CellResponse::Virial(virial) => virial,
            CellResponse::Stress(stress) => stress.map(|row| row.map(|s| -volume * s)),
        }
    }
}

/// Anything that can compute energy and forces for a geometry.
///
/// Closures taking `&Geometry` implement this trait directly.
pub trait Engine {
    fn evaluate(&mut self, geometry: &Geometry) -> Result<Evaluation, EngineError>;
}

impl<F> Engine for F
where
    F: FnMut(&Geometry) -> Result<Evaluation, EngineError>,
{
    fn evaluate(&mut self, geometry: &Geometry) -> Result<Evaluation, EngineError> {
        self(geometry)
    }
}

/// Zero energy, forces and stress for every geometry. Useful for testing
/// the plumbing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroEngine;

impl Engine for ZeroEngine {
    fn evaluate(&mut self, geometry: &Geometry) -> Result<Evaluation, EngineError> {
        Ok(Evaluation::new(0.0, vec![[0.0; 3]; geometry.atom_count()]).with_stress(ZERO3))
    }
}

/// Independent harmonic wells centred at the origin:
/// `E = ½ k Σ |r|²`, `F = -k r`.
#[derive(Debug, Clone, Copy)]
pub struct HarmonicEngine {
    /// Spring constant in eV/Å².
    pub spring: f64,
}

impl HarmonicEngine {
    pub fn new(spring: f64) -> Self {
        Self { spring }
    }
}

impl Default for HarmonicEngine {
    fn default() -> Self {
        Self { spring: 1.0 }
    }
}

impl Engine for HarmonicEngine {
    fn evaluate(&mut self, geometry: &Geometry) -> Result<Evaluation, EngineError> {
        let k = self.spring;
        let mut energy = 0.0;
        let forces = geometry
            .positions()
            .iter()
            .map(|r| {
                energy += 0.5 * k * (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]);
                r.map(|x| -k * x)
            })
            .collect();
        Ok(Evaluation::new(energy, forces))
    }
}
