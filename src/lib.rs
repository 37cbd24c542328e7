//! Algebra of tight-binding Hamiltonians built from localized (Wannier) orbitals.
//!
//! The crate currently supports:
//!
//! 1: Building a Hamiltonian from hopping records or from raw blocks
//!
//! 2: Supercells with arbitrary integer bases, orbital subsets, Peierls phases of a
//!    perpendicular magnetic field, onsite potentials and mixing of two Hamiltonians
//!
//! 3: Bloch eigenvalues, dense or near an energy with shift-invert Lanczos
//!
//! 4: Band structures along k-paths, distributed over worker threads
//!
//! 5: Reading and writing hopping lists as plain text
//!
//! A [`Hamiltonian`] is immutable. Every transformation returns a new one.
#![allow(non_snake_case)]
pub mod distribute;
pub mod error;
pub mod generics;
pub mod hermitian;
pub mod hopping;
pub mod io;
pub mod kpoints;
pub mod lanczos;
pub mod lattice;
pub mod math;
pub mod model_struct;
pub mod phy_const;
pub mod solver;
pub mod supercell;

pub use crate::distribute::{BandPathDistributor, BandStructure, CancellationToken, Gathered};
pub use crate::error::{ErrorKind, Result, TbError};
pub use crate::generics::hop_use;
pub use crate::hermitian::{HermiticityDefect, hermitian_filter};
pub use crate::hopping::{CellOffset, HoppingBlock, HoppingTable};
pub use crate::kpoints::{StandardPath, point_path, standard_path};
pub use crate::lattice::{ExplicitCells, LatticeBasis, LatticeMetric};
pub use crate::model_struct::{CoordinateBasis, Zone, integer_grid_3d};
pub use crate::solver::{
    BlochSolver, BlochSpectrum, HermiticityPolicy, SolveOptions, SolverMode,
};
pub use crate::supercell::{Gauge, MagneticField, MixinSpec, SupercellSpec};

use log::debug;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// A localized orbital: cartesian centre (Å) and spread (Å²).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orbital {
    pub position: [f64; 3],
    pub spread: f64,
}

impl Orbital {
    pub fn new(position: [f64; 3], spread: f64) -> Self {
        Orbital { position, spread }
    }
}

/// One matrix element $\bra{i\bm 0}\hat H\ket{j\bm R}$ as delivered by a hopping file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoppingRecord {
    pub cell: CellOffset,
    pub from: usize,
    pub to: usize,
    pub value: Complex64,
}

impl HoppingRecord {
    pub fn new<T: hop_use>(cell: CellOffset, from: usize, to: usize, value: T) -> Self {
        HoppingRecord {
            cell,
            from,
            to,
            value: value.to_complex(),
        }
    }
}

/// Tight-binding Hamiltonian of a periodic crystal.
///
/// `hoppings` stores $\bra{m\bm 0}\hat H\ket{n\bm R}$ per lattice offset $\bm R$,
/// `orbitals` the orbital centres in cartesian coordinates, `lattice` the lattice
/// vectors as rows. The Fermi energy is optional, it only follows the energy
/// shifts of derived Hamiltonians.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "HamiltonianData", into = "HamiltonianData")]
pub struct Hamiltonian {
    hoppings: HoppingTable,
    orbitals: Vec<Orbital>,
    lattice: LatticeBasis,
    fermi_energy: Option<f64>,
}

/// Serialised form of a [`Hamiltonian`]; deserialising goes through
/// [`Hamiltonian::from_raw_data`].
#[derive(Serialize, Deserialize)]
struct HamiltonianData {
    hoppings: HoppingTable,
    orbitals: Vec<Orbital>,
    lattice: LatticeBasis,
    #[serde(default)]
    fermi_energy: Option<f64>,
}

impl TryFrom<HamiltonianData> for Hamiltonian {
    type Error = TbError;

    fn try_from(data: HamiltonianData) -> Result<Self> {
        Hamiltonian::from_raw_data(data.hoppings, data.orbitals, data.lattice, data.fermi_energy)
    }
}

impl From<Hamiltonian> for HamiltonianData {
    fn from(ham: Hamiltonian) -> Self {
        HamiltonianData {
            hoppings: ham.hoppings,
            orbitals: ham.orbitals,
            lattice: ham.lattice,
            fermi_energy: ham.fermi_energy,
        }
    }
}

impl Hamiltonian {
    /// Builds a Hamiltonian from an already assembled hopping table.
    ///
    /// # Arguments
    ///
    /// * `hoppings` - one block per lattice offset, each `norb`$\times$`norb`
    /// * `orbitals` - orbital centres and spreads
    /// * `lattice` - lattice vectors as rows
    /// * `fermi_energy` - optional Fermi energy
    ///
    /// # Returns
    ///
    /// `DimensionMismatch` if a block does not match the number of orbitals.
    pub fn from_raw_data(
        hoppings: HoppingTable,
        orbitals: Vec<Orbital>,
        lattice: LatticeBasis,
        fermi_energy: Option<f64>,
    ) -> Result<Self> {
        let norb = orbitals.len();
        for (cell, block) in hoppings.iter() {
            if block.dim() != norb {
                return Err(TbError::DimensionMismatch {
                    context: format!("hopping block of cell {}", cell),
                    expected: norb,
                    found: block.dim(),
                });
            }
        }
        Ok(Hamiltonian {
            hoppings,
            orbitals,
            lattice,
            fermi_energy,
        })
    }

    /// Builds a Hamiltonian from a stream of hopping records.
    ///
    /// Records are expected grouped by cell. A run of records with the same cell
    /// forms one block; a cell showing up again later is merged into its block.
    pub fn from_hopping_records<I>(
        records: I,
        lattice: LatticeBasis,
        orbitals: Vec<Orbital>,
        fermi_energy: Option<f64>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = HoppingRecord>,
    {
        let norb = orbitals.len();
        let mut hoppings = HoppingTable::new();
        let mut nrecord = 0usize;
        for record in records {
            nrecord += 1;
            if !hoppings.contains(&record.cell) {
                hoppings.insert(record.cell, HoppingBlock::empty(norb));
            }
            if let Some(block) = hoppings.get_mut(&record.cell) {
                if record.from >= norb || record.to >= norb {
                    return Err(TbError::OrbitalOutOfRange {
                        context: "hopping record",
                        index: record.from.max(record.to),
                        norb,
                    });
                }
                block.set(record.from, record.to, record.value)?;
            }
        }
        debug!(
            "assembled {} hopping cells from {} records ({} orbitals)",
            hoppings.len(),
            nrecord,
            norb
        );
        Hamiltonian::from_raw_data(hoppings, orbitals, lattice, fermi_energy)
    }
}
