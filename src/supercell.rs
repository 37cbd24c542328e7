//! Supercells and modified Hamiltonians.
//!
//! A supercell is defined by an integer basis `B` (rows are the new lattice
//! vectors in units of the old ones) and the explicit list of old cells it is made
//! of. Every stored hop of every explicit cell is folded with [`LatticeMetric`];
//! hops landing on a cell outside the explicit list are dropped without error.
//!
//! On top of the geometry the builder can restrict orbitals and hopping cells, mix
//! in matrix elements of a second Hamiltonian, add an onsite potential, shift the
//! energy and attach Peierls phases of a magnetic field along $z$. They are applied
//! in exactly that order: mixin, potential, shift, field.
use log::{debug, warn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{Result, TbError};
use crate::hopping::{CellOffset, HoppingBlock, HoppingTable};
use crate::lattice::{ExplicitCells, LatticeBasis, LatticeMetric};
use crate::math::IMat3;
use crate::phy_const::TESLA_CONVERSION;
use crate::{Hamiltonian, Orbital};

pub const IDENTITY_BASIS: IMat3 = [[1, 0, 0], [0, 1, 0], [0, 0, 1]];

/// Gauge of the vector potential of a field $\bm B=B\hat z$.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gauge {
    /// $\bm A=(-By,0,0)$, for systems periodic along $x$.
    #[default]
    LandauX,
    /// $\bm A=(0,Bx,0)$, for systems periodic along $y$.
    LandauY,
    /// $\bm A=\frac12(-By,Bx,0)$.
    Symmetric,
}

impl Gauge {
    /// Line integral of $\bm A/B$ from `p` to `q` along a straight path.
    #[inline(always)]
    pub fn flux(&self, p: &[f64; 3], q: &[f64; 3]) -> f64 {
        let landau_x = -0.5 * (q[0] - p[0]) * (q[1] + p[1]);
        let landau_y = 0.5 * (q[1] - p[1]) * (q[0] + p[0]);
        match self {
            Gauge::LandauX => landau_x,
            Gauge::LandauY => landau_y,
            Gauge::Symmetric => landau_y + landau_x,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagneticField {
    /// Field strength in Tesla; lengths are taken in Å.
    pub tesla: f64,
    #[serde(default)]
    pub gauge: Gauge,
}

/// Matrix elements taken over from another Hamiltonian.
///
/// For each pair `(i, j)` of `hoppings` (and its mirror `(j, i)`) the element of
/// every new cell also stored in `hamiltonian` is replaced by the element
/// `(assoc(i), assoc(j))` of `hamiltonian` at the same offset. An element absent
/// in `hamiltonian` removes the target element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixinSpec {
    pub hamiltonian: Hamiltonian,
    pub hoppings: Vec<(usize, usize)>,
    /// Only substitute in these new-lattice offsets.
    #[serde(default)]
    pub cells: Option<Vec<CellOffset>>,
    /// Orbital index in the new Hamiltonian -> orbital index in `hamiltonian`.
    #[serde(default)]
    pub association: Option<BTreeMap<usize, usize>>,
}

/// Everything [`Hamiltonian::create_supercell_hamiltonian`] needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupercellSpec {
    /// Old cells forming the supercell, in block order.
    pub cells: Vec<CellOffset>,
    /// New lattice vectors as integer combinations of the old ones (rows).
    pub basis: IMat3,
    /// Only fold these stored offsets.
    #[serde(default)]
    pub hopping_cells: Option<Vec<CellOffset>>,
    /// Only keep these orbitals of every cell, in the given order.
    #[serde(default)]
    pub orbitals: Option<Vec<usize>>,
    #[serde(default)]
    pub energy_shift: Option<f64>,
    #[serde(default)]
    pub magnetic_field: Option<MagneticField>,
    #[serde(default)]
    pub mixin: Option<MixinSpec>,
    /// One value per orbital of the new Hamiltonian, added to the main cell diagonal.
    #[serde(default)]
    pub onsite_potential: Option<Vec<f64>>,
    /// Drop every block except the main cell.
    #[serde(default)]
    pub maincell_only: bool,
}

impl Default for SupercellSpec {
    fn default() -> Self {
        SupercellSpec {
            cells: vec![CellOffset::ORIGIN],
            basis: IDENTITY_BASIS,
            hopping_cells: None,
            orbitals: None,
            energy_shift: None,
            magnetic_field: None,
            mixin: None,
            onsite_potential: None,
            maincell_only: false,
        }
    }
}

impl SupercellSpec {
    pub fn new(cells: Vec<CellOffset>, basis: IMat3) -> Self {
        SupercellSpec {
            cells,
            basis,
            ..Default::default()
        }
    }

    pub fn with_hopping_cells(mut self, cells: Vec<CellOffset>) -> Self {
        self.hopping_cells = Some(cells);
        self
    }

    pub fn with_orbitals(mut self, orbitals: Vec<usize>) -> Self {
        self.orbitals = Some(orbitals);
        self
    }

    pub fn with_energy_shift(mut self, shift: f64) -> Self {
        self.energy_shift = Some(shift);
        self
    }

    pub fn with_magnetic_field(mut self, tesla: f64, gauge: Gauge) -> Self {
        self.magnetic_field = Some(MagneticField { tesla, gauge });
        self
    }

    pub fn with_mixin(mut self, mixin: MixinSpec) -> Self {
        self.mixin = Some(mixin);
        self
    }

    pub fn with_onsite_potential(mut self, potential: Vec<f64>) -> Self {
        self.onsite_potential = Some(potential);
        self
    }

    pub fn maincell_only(mut self) -> Self {
        self.maincell_only = true;
        self
    }
}

/// Where the blocks of one new-lattice offset come from: `(stored block position,
/// row cell, column cell)`.
type Placements = Vec<(usize, usize, usize)>;

impl Hamiltonian {
    /// Builds a supercell Hamiltonian.
    ///
    /// The new orbitals are ordered cell by cell: for every explicit cell (outer)
    /// every selected orbital (inner), at position `orbital + cell`$\cdot A$. The new
    /// lattice is $B\cdot A$.
    ///
    /// # Arguments
    ///
    /// * `spec` - geometry and modifications, see [`SupercellSpec`]
    ///
    /// # Returns
    ///
    /// A new Hamiltonian, or a configuration error for a singular basis, repeated
    /// explicit cells, unknown hopping cells or orbital indices out of range.
    pub fn create_supercell_hamiltonian(&self, spec: &SupercellSpec) -> Result<Hamiltonian> {
        let explicit = ExplicitCells::new(&spec.cells)?;
        let metric = LatticeMetric::new(&spec.basis)?;
        let table = self.hoppings();

        let used: HashSet<usize> = match &spec.hopping_cells {
            None => (0..table.len()).collect(),
            Some(cells) => table.positions_of(cells)?.into_iter().collect(),
        };
        let orbital_nrs: Vec<usize> = match &spec.orbitals {
            None => (0..self.norb()).collect(),
            Some(orbs) => {
                if let Some(&bad) = orbs.iter().find(|&&o| o >= self.norb()) {
                    return Err(TbError::OrbitalOutOfRange {
                        context: "orbital subset",
                        index: bad,
                        norb: self.norb(),
                    });
                }
                orbs.clone()
            }
        };
        let sub_dim = orbital_nrs.len();

        //开始构建新的轨道
        let mut orbitals = Vec::with_capacity(explicit.len() * sub_dim);
        for cell in explicit.cells() {
            let shift = self.lattice().cell_to_cartesian(cell);
            for &o in orbital_nrs.iter() {
                let old = &self.orbitals()[o];
                let position = [
                    old.position[0] + shift[0],
                    old.position[1] + shift[1],
                    old.position[2] + shift[2],
                ];
                orbitals.push(Orbital::new(position, old.spread));
            }
        }

        //每个新的 R 对应哪些旧的 block
        let mut new_cells: Vec<CellOffset> = Vec::new();
        let mut placements: Vec<Placements> = Vec::new();
        let mut new_index: HashMap<CellOffset, usize> = HashMap::new();
        let mut n_dropped = 0usize;
        for (row, cell) in explicit.cells().iter().enumerate() {
            for (pos, offset) in table.cells().iter().enumerate() {
                if !used.contains(&pos) {
                    continue;
                }
                let (new_cell, target) = metric.fold_offset(&explicit, cell, offset)?;
                let Some(col) = target else {
                    n_dropped += 1;
                    continue;
                };
                if spec.maincell_only && !new_cell.is_origin() {
                    continue;
                }
                let slot = *new_index.entry(new_cell).or_insert_with(|| {
                    new_cells.push(new_cell);
                    placements.push(Vec::new());
                    new_cells.len() - 1
                });
                placements[slot].push((pos, row, col));
            }
        }
        if n_dropped > 0 {
            debug!(
                "{} folded hops point outside of the {} explicit cells and were dropped",
                n_dropped,
                explicit.len()
            );
        }

        let selected: HashMap<usize, HoppingBlock> = used
            .iter()
            .map(|&pos| Ok((pos, table.blocks()[pos].select(&orbital_nrs)?)))
            .collect::<Result<_>>()?;
        let mut hoppings = HoppingTable::new();
        for (cell, place) in new_cells.iter().zip(placements.iter()) {
            let refs: Vec<(&HoppingBlock, usize, usize)> = place
                .iter()
                .map(|(pos, row, col)| (&selected[pos], *row, *col))
                .collect();
            hoppings.insert(*cell, HoppingBlock::compose(sub_dim, explicit.len(), &refs)?);
        }
        let lattice = self.lattice().supercell(&spec.basis);
        let norb = orbitals.len();

        if let Some(mixin) = &spec.mixin {
            apply_mixin(&mut hoppings, norb, mixin)?;
        }
        if let Some(potential) = &spec.onsite_potential {
            if potential.len() != norb {
                return Err(TbError::DimensionMismatch {
                    context: "onsite potential".to_string(),
                    expected: norb,
                    found: potential.len(),
                });
            }
            hoppings
                .get_or_insert_empty(CellOffset::ORIGIN, norb)
                .add_diagonal(potential)?;
        }
        if let Some(shift) = spec.energy_shift {
            hoppings
                .get_or_insert_empty(CellOffset::ORIGIN, norb)
                .add_diagonal(&vec![shift; norb])?;
        }
        if let Some(field) = &spec.magnetic_field {
            apply_peierls_phase(&mut hoppings, &orbitals, &lattice, field);
        }

        let fermi_energy = match (self.fermi_energy(), spec.energy_shift) {
            (Some(ef), Some(shift)) => Some(ef + shift),
            (ef, _) => ef,
        };
        debug!(
            "supercell: {} explicit cells, {} orbitals, {} hopping cells",
            explicit.len(),
            norb,
            hoppings.len()
        );
        Hamiltonian::from_raw_data(hoppings, orbitals, lattice, fermi_energy)
    }

    /// Same orbitals and lattice with modifications only, i.e. a supercell made of
    /// the single cell `[0, 0, 0]` with the identity basis. The geometry fields of
    /// `spec` are ignored.
    pub fn create_modified_hamiltonian(&self, spec: &SupercellSpec) -> Result<Hamiltonian> {
        let spec = SupercellSpec {
            cells: vec![CellOffset::ORIGIN],
            basis: IDENTITY_BASIS,
            ..spec.clone()
        };
        self.create_supercell_hamiltonian(&spec)
    }

    /// Shifts all energies so that the Fermi energy is zero.
    pub fn shift_fermi_energy_to_zero(&self) -> Result<Hamiltonian> {
        let ef = self.fermi_energy().ok_or(TbError::MissingFermiEnergy)?;
        self.create_modified_hamiltonian(&SupercellSpec::default().with_energy_shift(-ef))
    }

    /// Adds the electrostatic energy `potential(r)` of every orbital centre to the
    /// main cell diagonal. Units of length and energy must match the Hamiltonian.
    pub fn apply_electrostatic_potential<F>(&self, potential: F) -> Result<Hamiltonian>
    where
        F: Fn(&[f64; 3]) -> f64,
    {
        let values: Vec<f64> = self.orbitals().iter().map(|o| potential(&o.position)).collect();
        self.create_modified_hamiltonian(&SupercellSpec::default().with_onsite_potential(values))
    }
}

fn apply_mixin(hoppings: &mut HoppingTable, norb: usize, mixin: &MixinSpec) -> Result<()> {
    if let Some(&(i, j)) = mixin.hoppings.iter().find(|(i, j)| *i >= norb || *j >= norb) {
        return Err(TbError::OrbitalOutOfRange {
            context: "mixin target",
            index: i.max(j),
            norb,
        });
    }
    let pairs: Vec<(usize, usize)> = mixin
        .hoppings
        .iter()
        .flat_map(|&(i, j)| [(i, j), (j, i)])
        .collect();
    let assoc = |i: usize| -> Result<usize> {
        match &mixin.association {
            None => Ok(i),
            Some(map) => map.get(&i).copied().ok_or(TbError::MissingMixinAssociation(i)),
        }
    };
    let source_pairs: Vec<(usize, usize)> = pairs
        .iter()
        .map(|&(i, j)| Ok((assoc(i)?, assoc(j)?)))
        .collect::<Result<_>>()?;
    let other = mixin.hamiltonian.hoppings();
    let other_norb = mixin.hamiltonian.norb();
    if let Some(&(k, l)) = source_pairs.iter().find(|(k, l)| *k >= other_norb || *l >= other_norb) {
        return Err(TbError::OrbitalOutOfRange {
            context: "mixin source",
            index: k.max(l),
            norb: other_norb,
        });
    }

    let mut n_cells = 0usize;
    for (cell, block) in hoppings.iter_mut() {
        if let Some(whitelist) = &mixin.cells {
            if !whitelist.contains(cell) {
                continue;
            }
        }
        let Some(source) = other.get(cell) else {
            continue;
        };
        for (&(i, j), &(k, l)) in pairs.iter().zip(source_pairs.iter()) {
            match source.get(k, l) {
                Some(v) => block.set(i, j, v)?,
                None => {
                    block.remove(i, j);
                }
            }
        }
        n_cells += 1;
    }
    if n_cells == 0 {
        warn!("mixin Hamiltonian shares no hopping cell with the target, nothing substituted");
    }
    Ok(())
}

/// Multiplies every stored element by $\exp(i B c\,\Phi(\bm p,\bm q))$.
fn apply_peierls_phase(
    hoppings: &mut HoppingTable,
    orbitals: &[Orbital],
    lattice: &LatticeBasis,
    field: &MagneticField,
) {
    let prefactor = field.tesla * TESLA_CONVERSION;
    for (cell, block) in hoppings.iter_mut() {
        let shift = lattice.cell_to_cartesian(cell);
        block.scale_entries(|p, q| {
            let main = &orbitals[p].position;
            let other = &orbitals[q].position;
            let other = [other[0] + shift[0], other[1] + shift[1], other[2] + shift[2]];
            Complex64::new(0.0, prefactor * field.gauge.flux(main, &other)).exp()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_models::{chain, square};
    use crate::{ErrorKind, HoppingRecord};
    use approx::assert_relative_eq;

    fn c(re: f64) -> Complex64 {
        Complex64::new(re, 0.0)
    }

    #[test]
    fn test_identity_supercell() {
        let ham = square(0.2);
        let same = ham.create_supercell_hamiltonian(&SupercellSpec::default()).unwrap();
        assert!(same.hoppings().same_hoppings(ham.hoppings(), 0.0));
        assert_eq!(same.orbitals(), ham.orbitals());
        assert_eq!(same.lattice(), ham.lattice());
        assert_eq!(same.fermi_energy(), ham.fermi_energy());
    }

    #[test]
    fn test_doubled_chain_blocks() {
        let ham = chain(-1.0);
        let spec = SupercellSpec::new(
            vec![CellOffset::ORIGIN, CellOffset::new(1, 0, 0)],
            [[2, 0, 0], [0, 1, 0], [0, 0, 1]],
        );
        let sc = ham.create_supercell_hamiltonian(&spec).unwrap();
        assert_eq!(sc.norb(), 2);
        assert_eq!(
            sc.cells(),
            &[CellOffset::new(-1, 0, 0), CellOffset::ORIGIN, CellOffset::new(1, 0, 0)]
        );
        let origin = sc.hoppings().get(&CellOffset::ORIGIN).unwrap();
        assert_eq!(origin.get(0, 1), Some(c(-1.0)));
        assert_eq!(origin.get(1, 0), Some(c(-1.0)));
        let right = sc.hoppings().get(&CellOffset::new(1, 0, 0)).unwrap();
        assert_eq!(right.get(1, 0), Some(c(-1.0)));
        assert_eq!(right.get(0, 1), None);
        assert_eq!(sc.orbitals()[1].position, [1.0, 0.0, 0.0]);
        assert_relative_eq!(sc.lattice().vectors()[[0, 0]], 2.0);
        assert!(sc.hermiticity_defect().is_hermitian(0.0));
    }

    #[test]
    fn test_truncation_is_silent() {
        let ham = chain(-1.0);
        let spec = SupercellSpec::new(vec![CellOffset::ORIGIN], [[2, 0, 0], [0, 1, 0], [0, 0, 1]]);
        let sc = ham.create_supercell_hamiltonian(&spec).unwrap();
        assert_eq!(sc.cells(), &[CellOffset::ORIGIN]);
        assert_eq!(sc.hoppings().get(&CellOffset::ORIGIN).unwrap().nnz(), 1);
    }

    #[test]
    fn test_large_basis_folds_without_overflow() {
        let ham = chain(-1.0);
        let cells: Vec<CellOffset> = (0..4).map(|i| CellOffset::new(i, 0, 0)).collect();
        let spec = SupercellSpec::new(cells, [[1_000_000, 0, 0], [0, 1_000_000, 0], [0, 0, 1_000_000]]);
        let sc = ham.create_supercell_hamiltonian(&spec).unwrap();
        assert_eq!(sc.cells(), &[CellOffset::ORIGIN]);
        assert_eq!(sc.norb(), 4);
        let origin = sc.hoppings().get(&CellOffset::ORIGIN).unwrap();
        assert_eq!(origin.get(2, 3), Some(c(-1.0)));
        assert_eq!(origin.get(3, 0), None);

        let huge = SupercellSpec::new(
            vec![CellOffset::ORIGIN],
            [[i64::MAX, 0, 0], [0, i64::MAX, 0], [0, 0, i64::MAX]],
        );
        let err = ham.create_supercell_hamiltonian(&huge).unwrap_err();
        assert!(matches!(err, TbError::InvalidSupercellMatrix(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_maincell_only() {
        let ham = chain(-1.0);
        let spec = SupercellSpec::new(
            (0..4).map(|i| CellOffset::new(i, 0, 0)).collect(),
            [[4, 0, 0], [0, 1, 0], [0, 0, 1]],
        )
        .maincell_only();
        let sc = ham.create_supercell_hamiltonian(&spec).unwrap();
        assert_eq!(sc.cells(), &[CellOffset::ORIGIN]);
        let m = sc.maincell_matrix().unwrap();
        assert_eq!(m[[0, 1]], c(-1.0));
        assert_eq!(m[[0, 3]], c(0.0));
    }

    #[test]
    fn test_configuration_errors() {
        let ham = square(0.0);
        let singular = SupercellSpec::new(vec![CellOffset::ORIGIN], [[1, 1, 0], [2, 2, 0], [0, 0, 1]]);
        assert!(matches!(
            ham.create_supercell_hamiltonian(&singular),
            Err(TbError::InvalidSupercellMatrix(_))
        ));
        let dup = SupercellSpec::new(vec![CellOffset::ORIGIN, CellOffset::ORIGIN], IDENTITY_BASIS);
        assert!(matches!(
            ham.create_supercell_hamiltonian(&dup),
            Err(TbError::DuplicateCell(_))
        ));
        let missing = SupercellSpec::default().with_hopping_cells(vec![CellOffset::new(5, 0, 0)]);
        assert!(matches!(
            ham.create_supercell_hamiltonian(&missing),
            Err(TbError::MissingHoppingCell(_))
        ));
        let orb = SupercellSpec::default().with_orbitals(vec![2]);
        let err = ham.create_supercell_hamiltonian(&orb).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_orbital_and_cell_subset() {
        let ham = square(0.2);
        let spec = SupercellSpec::default()
            .with_orbitals(vec![1])
            .with_hopping_cells(vec![CellOffset::ORIGIN, CellOffset::new(1, 0, 0), CellOffset::new(-1, 0, 0)]);
        let sub = ham.create_modified_hamiltonian(&spec).unwrap();
        assert_eq!(sub.norb(), 1);
        assert_eq!(sub.nR(), 3);
        assert_eq!(sub.maincell_matrix().unwrap()[[0, 0]], c(-0.2));
        assert_eq!(sub.orbitals()[0].position, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_onsite_potential_and_shift() {
        let ham = square(0.2);
        let spec = SupercellSpec::default()
            .with_onsite_potential(vec![0.1, 0.2])
            .with_energy_shift(1.0);
        let new = ham.create_modified_hamiltonian(&spec).unwrap();
        let m = new.maincell_matrix().unwrap();
        assert_relative_eq!(m[[0, 0]].re, 1.3, epsilon = 1e-14);
        assert_relative_eq!(m[[1, 1]].re, 1.0, epsilon = 1e-14);
        assert_eq!(m[[0, 1]], c(-0.5));
        assert_relative_eq!(new.fermi_energy().unwrap(), 1.3, epsilon = 1e-14);
        // neighbour blocks are untouched
        let right = new.hoppings().get(&CellOffset::new(1, 0, 0)).unwrap();
        assert_eq!(right.get(0, 0), Some(c(-1.0)));

        let bad = SupercellSpec::default().with_onsite_potential(vec![0.1]);
        assert!(matches!(
            ham.create_modified_hamiltonian(&bad),
            Err(TbError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_fermi_energy_to_zero() {
        let ham = square(0.2);
        let zero = ham.shift_fermi_energy_to_zero().unwrap();
        assert_relative_eq!(zero.fermi_energy().unwrap(), 0.0, epsilon = 1e-15);
        assert_relative_eq!(zero.maincell_matrix().unwrap()[[0, 0]].re, -0.1, epsilon = 1e-14);

        let no_ef = Hamiltonian::from_raw_data(
            ham.hoppings().clone(),
            ham.orbitals().to_vec(),
            ham.lattice().clone(),
            None,
        )
        .unwrap();
        let err = no_ef.shift_fermi_energy_to_zero().unwrap_err();
        assert!(matches!(err, TbError::MissingFermiEnergy));
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn test_electrostatic_potential() {
        let ham = square(0.0);
        let new = ham.apply_electrostatic_potential(|r| 0.5 * r[0]).unwrap();
        let m = new.maincell_matrix().unwrap();
        assert_relative_eq!(m[[0, 0]].re, 0.0);
        assert_relative_eq!(m[[1, 1]].re, 0.5);
    }

    #[test]
    fn test_zero_field_is_identity() {
        let ham = square(0.2);
        for gauge in [Gauge::LandauX, Gauge::LandauY, Gauge::Symmetric] {
            let spec = SupercellSpec::default().with_magnetic_field(0.0, gauge);
            let new = ham.create_modified_hamiltonian(&spec).unwrap();
            assert!(new.hoppings().same_hoppings(ham.hoppings(), 0.0));
        }
    }

    #[test]
    fn test_peierls_phase() {
        let orbitals = vec![Orbital::new([0.0, 1.0, 0.0], 1.0)];
        let records = vec![
            HoppingRecord::new(CellOffset::new(1, 0, 0), 0, 0, -1.0),
            HoppingRecord::new(CellOffset::new(-1, 0, 0), 0, 0, -1.0),
        ];
        let ham = Hamiltonian::from_hopping_records(
            records,
            crate::test_models::chain_lattice(),
            orbitals,
            None,
        )
        .unwrap();
        let b = 10.0;
        let phase = b * TESLA_CONVERSION;
        for (gauge, flux) in [(Gauge::LandauX, -1.0), (Gauge::LandauY, 0.0), (Gauge::Symmetric, -1.0)] {
            let new = ham
                .create_modified_hamiltonian(&SupercellSpec::default().with_magnetic_field(b, gauge))
                .unwrap();
            let v = new.hoppings().get(&CellOffset::new(1, 0, 0)).unwrap().value(0, 0);
            let expect = -Complex64::new(0.0, phase * flux).exp();
            assert_relative_eq!(v.re, expect.re, epsilon = 1e-14);
            assert_relative_eq!(v.im, expect.im, epsilon = 1e-14);
            // the partner carries the conjugate phase
            let w = new.hoppings().get(&CellOffset::new(-1, 0, 0)).unwrap().value(0, 0);
            assert_relative_eq!(w.im, -v.im, epsilon = 1e-14);
            assert!(new.hoppings().get(&CellOffset::ORIGIN).is_none());
        }
    }

    #[test]
    fn test_mixin_substitution() {
        let target = square(0.2);
        let source = square(0.7);
        let mixin = MixinSpec {
            hamiltonian: source.clone(),
            hoppings: vec![(0, 0)],
            cells: Some(vec![CellOffset::ORIGIN]),
            association: None,
        };
        let mixed = target
            .create_modified_hamiltonian(&SupercellSpec::default().with_mixin(mixin))
            .unwrap();
        let m = mixed.maincell_matrix().unwrap();
        assert_eq!(m[[0, 0]], c(0.7));
        assert_eq!(m[[1, 1]], c(-0.2));

        // association map: target orbital 0 takes the elements of source orbital 1
        let mixin = MixinSpec {
            hamiltonian: source.clone(),
            hoppings: vec![(0, 0)],
            cells: None,
            association: Some(BTreeMap::from([(0, 1)])),
        };
        let mixed = target
            .create_modified_hamiltonian(&SupercellSpec::default().with_mixin(mixin))
            .unwrap();
        assert_eq!(mixed.maincell_matrix().unwrap()[[0, 0]], c(-0.7));

        let mixin = MixinSpec {
            hamiltonian: source,
            hoppings: vec![(0, 1)],
            cells: None,
            association: Some(BTreeMap::from([(0, 1)])),
        };
        let err = target
            .create_modified_hamiltonian(&SupercellSpec::default().with_mixin(mixin))
            .unwrap_err();
        assert!(matches!(err, TbError::MissingMixinAssociation(1)));
    }

    #[test]
    fn test_mixin_absent_entry_removes_target() {
        let target = square(0.2);
        let records = vec![
            HoppingRecord::new(CellOffset::ORIGIN, 0, 0, 5.0),
            HoppingRecord::new(CellOffset::ORIGIN, 1, 1, 5.0),
        ];
        let source = Hamiltonian::from_hopping_records(
            records,
            target.lattice().clone(),
            target.orbitals().to_vec(),
            None,
        )
        .unwrap();
        let mixin = MixinSpec {
            hamiltonian: source,
            hoppings: vec![(0, 1)],
            cells: None,
            association: None,
        };
        let mixed = target
            .create_modified_hamiltonian(&SupercellSpec::default().with_mixin(mixin))
            .unwrap();
        let origin = mixed.hoppings().get(&CellOffset::ORIGIN).unwrap();
        assert_eq!(origin.get(0, 1), None);
        assert_eq!(origin.get(1, 0), None);
        assert_eq!(origin.get(0, 0), Some(c(0.2)));
    }

    #[test]
    fn test_mixin_target_out_of_range() {
        let target = chain(-1.0);
        let mixin = MixinSpec {
            hamiltonian: square(0.2),
            hoppings: vec![(0, 5)],
            cells: Some(vec![CellOffset::new(9, 9, 9)]),
            association: Some(BTreeMap::from([(0, 0), (5, 1)])),
        };
        let err = target
            .create_modified_hamiltonian(&SupercellSpec::default().with_mixin(mixin))
            .unwrap_err();
        assert!(matches!(
            err,
            TbError::OrbitalOutOfRange { context: "mixin target", index: 5, norb: 1 }
        ));
    }
}
