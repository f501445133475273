//! Geometry sent by the driver and the force result sent back by the engine.
//!
//! Both types live in working units (Å, eV). Conversion to and from the
//! protocol's atomic units happens only when they are turned into or built
//! from wire payloads.

use bytes::Bytes;
use ipisock_frame::{ForceData, PosData};
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};
use crate::units;

/// Row-major 3×3 matrix. For a cell, each row is one lattice vector.
pub type Mat3 = [[f64; 3]; 3];

pub const ZERO3: Mat3 = [[0.0; 3]; 3];

/// A periodic cell plus atomic positions for one evaluation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeometry")]
pub struct Geometry {
    cell: Mat3,
    inverse_cell: Mat3,
    positions: Vec<[f64; 3]>,
}

/// Unvalidated serialized form of [`Geometry`]; the inverse cell is
/// optional and derived when absent.
#[derive(Deserialize)]
struct RawGeometry {
    cell: Mat3,
    #[serde(default)]
    inverse_cell: Option<Mat3>,
    positions: Vec<[f64; 3]>,
}

impl TryFrom<RawGeometry> for Geometry {
    type Error = PeerError;

    fn try_from(raw: RawGeometry) -> Result<Self> {
        match raw.inverse_cell {
            Some(inverse) => Self::with_inverse(raw.cell, inverse, raw.positions),
            None => Self::new(raw.cell, raw.positions),
        }
    }
}

impl Geometry {
    /// Build a geometry, deriving the inverse cell.
    ///
    /// The inverse cell is the transposed (pseudo-)inverse of `cell`: its
    /// rows are the reciprocal vectors without the 2π factor. Zero rows
    /// (non-periodic directions) map to zero rows; a cell whose non-zero
    /// rows are linearly dependent is rejected.
    pub fn new(cell: Mat3, positions: Vec<[f64; 3]>) -> Result<Self> {
        let inverse_cell = inverse_transpose(&cell)
            .ok_or_else(|| PeerError::InvalidGeometry("cell vectors are degenerate".into()))?;
        Self::with_inverse(cell, inverse_cell, positions)
    }

    /// Build a geometry with an explicitly supplied inverse cell.
    pub fn with_inverse(cell: Mat3, inverse_cell: Mat3, positions: Vec<[f64; 3]>) -> Result<Self> {
        check_finite("cell", cell.iter().flatten())?;
        check_finite("inverse cell", inverse_cell.iter().flatten())?;
        check_finite("positions", positions.iter().flatten())?;
        Ok(Self {
            cell,
            inverse_cell,
            positions,
        })
    }

    /// Build a geometry from flat arrays: 9 cell values and xyz triples.
    pub fn from_flat(cell: &[f64], positions: &[f64]) -> Result<Self> {
        if cell.len() != 9 {
            return Err(PeerError::InvalidGeometry(format!(
                "cell needs 9 values, got {}",
                cell.len()
            )));
        }
        if positions.len() % 3 != 0 {
            return Err(PeerError::InvalidGeometry(format!(
                "position count {} is not a multiple of 3",
                positions.len()
            )));
        }
        Self::new(mat3_from_flat(cell), triples(positions))
    }

    pub fn cell(&self) -> &Mat3 {
        &self.cell
    }

    pub fn inverse_cell(&self) -> &Mat3 {
        &self.inverse_cell
    }

    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    pub fn atom_count(&self) -> usize {
        self.positions.len()
    }

    /// Cell volume, |det(cell)|. Zero for non-periodic cells.
    pub fn volume(&self) -> f64 {
        determinant(&self.cell).abs()
    }

    /// Replace the positions, keeping the cell.
    pub fn set_positions(&mut self, positions: Vec<[f64; 3]>) -> Result<()> {
        check_finite("positions", positions.iter().flatten())?;
        self.positions = positions;
        Ok(())
    }

    /// Wire payload in protocol units.
    pub(crate) fn to_posdata(&self) -> PosData {
        PosData {
            cell: flatten_with(&self.cell, units::length_to_protocol),
            inverse_cell: flatten_with(&self.inverse_cell, units::inverse_length_to_protocol),
            positions: self
                .positions
                .iter()
                .flatten()
                .map(|x| units::length_to_protocol(*x))
                .collect(),
        }
    }

    /// Rebuild a geometry from a received payload, keeping the peer's
    /// inverse cell.
    pub(crate) fn from_posdata(data: &PosData) -> Result<Self> {
        let cell = mat3_from_flat(&data.cell.map(units::length_from_protocol));
        let inverse_cell =
            mat3_from_flat(&data.inverse_cell.map(units::inverse_length_from_protocol));
        let positions = data
            .positions
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2]].map(units::length_from_protocol))
            .collect();
        Self::with_inverse(cell, inverse_cell, positions)
    }
}

/// Energy, forces and virial for one geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceResult {
    /// Energy in eV.
    pub energy: f64,
    /// Forces in eV/Å, one row per atom.
    pub forces: Vec<[f64; 3]>,
    /// Virial in eV.
    pub virial: Mat3,
    /// Opaque engine-specific bytes; usually empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<u8>,
}

impl ForceResult {
    pub fn atom_count(&self) -> usize {
        self.forces.len()
    }

    /// Stress (eV/Å³) for a cell of the given volume: `-virial / volume`.
    pub fn stress(&self, volume: f64) -> Mat3 {
        let mut stress = ZERO3;
        for (row, virial_row) in stress.iter_mut().zip(self.virial.iter()) {
            for (s, v) in row.iter_mut().zip(virial_row.iter()) {
                *s = -v / volume;
            }
        }
        stress
    }

    pub(crate) fn to_force_data(&self) -> ForceData {
        ForceData {
            energy: units::energy_to_protocol(self.energy),
            forces: self
                .forces
                .iter()
                .flatten()
                .map(|f| units::force_to_protocol(*f))
                .collect(),
            virial: flatten_with(&self.virial, units::virial_to_protocol),
            extra: Bytes::copy_from_slice(&self.extra),
        }
    }

    pub(crate) fn from_force_data(data: ForceData) -> Self {
        Self {
            energy: units::energy_from_protocol(data.energy),
            forces: data
                .forces
                .chunks_exact(3)
                .map(|f| [f[0], f[1], f[2]].map(units::force_from_protocol))
                .collect(),
            virial: mat3_from_flat(&data.virial.map(units::virial_from_protocol)),
            extra: data.extra.to_vec(),
        }
    }
}

fn check_finite<'a>(what: &str, values: impl IntoIterator<Item = &'a f64>) -> Result<()> {
    if values.into_iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(PeerError::InvalidGeometry(format!(
            "{what} contains non-finite values"
        )))
    }
}

fn triples(values: &[f64]) -> Vec<[f64; 3]> {
    values
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect()
}

fn mat3_from_flat(values: &[f64]) -> Mat3 {
    let mut m = ZERO3;
    for (i, v) in values.iter().take(9).enumerate() {
        m[i / 3][i % 3] = *v;
    }
    m
}

fn flatten_with(m: &Mat3, f: impl Fn(f64) -> f64) -> [f64; 9] {
    let mut out = [0.0; 9];
    for (i, v) in m.iter().flatten().enumerate() {
        out[i] = f(*v);
    }
    out
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn determinant(m: &Mat3) -> f64 {
    dot(&m[0], &cross(&m[1], &m[2]))
}

/// Transposed pseudo-inverse of a cell whose non-zero rows are independent.
///
/// With `S` the non-zero rows and `G = C_S C_Sᵀ` their Gram matrix, row `i`
/// of the result is `Σ_j G⁻¹[i][j] c_j`; for a full cell this is `C⁻ᵀ`.
fn inverse_transpose(cell: &Mat3) -> Option<Mat3> {
    let rows: Vec<usize> = (0..3).filter(|&i| dot(&cell[i], &cell[i]) > 0.0).collect();
    let k = rows.len();

    let mut gram = ZERO3;
    for a in 0..k {
        for b in 0..k {
            gram[a][b] = dot(&cell[rows[a]], &cell[rows[b]]);
        }
    }
    let gram_inv = invert_leading(&gram, k)?;

    let mut out = ZERO3;
    for a in 0..k {
        for b in 0..k {
            for x in 0..3 {
                out[rows[a]][x] += gram_inv[a][b] * cell[rows[b]][x];
            }
        }
    }
    Some(out)
}

/// Invert the leading `k`×`k` block of a symmetric positive semi-definite
/// matrix, or `None` if it is (numerically) singular.
fn invert_leading(g: &Mat3, k: usize) -> Option<Mat3> {
    const RELATIVE_TOLERANCE: f64 = 1e-12;

    let scale: f64 = (0..k).map(|i| g[i][i]).product();
    let mut inv = ZERO3;
    match k {
        0 => {}
        1 => inv[0][0] = 1.0 / g[0][0],
        2 => {
            let det = g[0][0] * g[1][1] - g[0][1] * g[1][0];
            if det.abs() <= RELATIVE_TOLERANCE * scale {
                return None;
            }
            inv[0][0] = g[1][1] / det;
            inv[0][1] = -g[0][1] / det;
            inv[1][0] = -g[1][0] / det;
            inv[1][1] = g[0][0] / det;
        }
        _ => {
            let det = determinant(g);
            if det.abs() <= RELATIVE_TOLERANCE * scale {
                return None;
            }
            // Adjugate: columns of the inverse are cross products of rows.
            let c0 = cross(&g[1], &g[2]);
            let c1 = cross(&g[2], &g[0]);
            let c2 = cross(&g[0], &g[1]);
            for i in 0..3 {
                inv[i][0] = c0[i] / det;
                inv[i][1] = c1[i] / det;
                inv[i][2] = c2[i] / det;
            }
        }
    }
    Some(inv)
}
