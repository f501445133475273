//! Conversion between working units (Å, eV) and the protocol's fixed
//! atomic units (Bohr, Hartree).
//!
//! Values follow CODATA 2014.

/// One Bohr radius in Å.
pub const BOHR: f64 = 0.529_177_210_67;

/// One Hartree in eV.
pub const HARTREE: f64 = 27.211_386_02;

pub fn length_to_protocol(angstrom: f64) -> f64 {
    angstrom / BOHR
}

pub fn length_from_protocol(bohr: f64) -> f64 {
    bohr * BOHR
}

/// Reciprocal lengths (inverse cell entries), 1/Å → 1/Bohr.
pub fn inverse_length_to_protocol(per_angstrom: f64) -> f64 {
    per_angstrom * BOHR
}

pub fn inverse_length_from_protocol(per_bohr: f64) -> f64 {
    per_bohr / BOHR
}

pub fn energy_to_protocol(ev: f64) -> f64 {
    ev / HARTREE
}

pub fn energy_from_protocol(hartree: f64) -> f64 {
    hartree * HARTREE
}

/// eV/Å → Hartree/Bohr.
pub fn force_to_protocol(ev_per_angstrom: f64) -> f64 {
    ev_per_angstrom * BOHR / HARTREE
}

pub fn force_from_protocol(hartree_per_bohr: f64) -> f64 {
    hartree_per_bohr * HARTREE / BOHR
}

/// The virial carries energy units.
pub fn virial_to_protocol(ev: f64) -> f64 {
    energy_to_protocol(ev)
}

pub fn virial_from_protocol(hartree: f64) -> f64 {
    energy_from_protocol(hartree)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rel(a: f64, b: f64) {
        let scale = a.abs().max(b.abs()).max(f64::MIN_POSITIVE);
        assert!((a - b).abs() / scale <= 1e-12, "{a} vs {b}");
    }

    #[test]
    fn roundtrips_stay_within_tolerance() {
        for value in [1e-8, 0.5, 1.0, 2.75, -42.0, 1e6] {
            assert_rel(length_from_protocol(length_to_protocol(value)), value);
            assert_rel(
                inverse_length_from_protocol(inverse_length_to_protocol(value)),
                value,
            );
            assert_rel(energy_from_protocol(energy_to_protocol(value)), value);
            assert_rel(force_from_protocol(force_to_protocol(value)), value);
            assert_rel(virial_from_protocol(virial_to_protocol(value)), value);
        }
    }

    #[test]
    fn reference_values() {
        assert_rel(length_from_protocol(1.0), 0.52917721067);
        assert_rel(energy_from_protocol(1.0), 27.21138602);
        assert_rel(force_from_protocol(1.0), 27.21138602 / 0.52917721067);
    }

    #[test]
    fn zero_maps_to_zero() {
        assert_eq!(length_to_protocol(0.0), 0.0);
        assert_eq!(energy_to_protocol(0.0), 0.0);
        assert_eq!(force_to_protocol(0.0), 0.0);
    }
}
