//! Bloch Hamiltonians and their eigenvalues.
use log::warn;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use ndarray_linalg::{Eig, EigVals};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::Hamiltonian;
use crate::distribute::{BandStructure, CancellationToken, check_kpoints};
use crate::error::{Result, TbError};
use crate::hopping::CellOffset;
use crate::lanczos::{LanczosParams, shift_invert_eigenvalues};
use crate::model_struct::CoordinateBasis;

/// Which eigenvalues to compute.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum SolverMode {
    /// Every eigenvalue, with the general dense eigensolver.
    #[default]
    Dense,
    /// `count` eigenvalues closest to `shift`, with shift-invert Lanczos.
    Partial { count: usize, shift: f64 },
}

/// What to do with Bloch matrices that are not Hermitian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HermiticityPolicy {
    /// Relative tolerance, scaled by `max(1, max|Re λ|)`.
    pub tolerance: f64,
    /// Return [`TbError::HermiticityViolation`] instead of only flagging the result.
    pub strict: bool,
}

impl Default for HermiticityPolicy {
    fn default() -> Self {
        HermiticityPolicy {
            tolerance: 1e-8,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SolveOptions {
    #[serde(default)]
    pub mode: SolverMode,
    /// Coordinates of the k-points handed to the solver.
    #[serde(default)]
    pub basis: CoordinateBasis,
    /// Also return eigenvectors (dense mode only).
    #[serde(default)]
    pub eigenvectors: bool,
    /// Only sum over these stored offsets.
    #[serde(default)]
    pub hopping_cells: Option<Vec<CellOffset>>,
    #[serde(default)]
    pub hermiticity: HermiticityPolicy,
    #[serde(default)]
    pub lanczos: LanczosParams,
}

/// Eigenvalues at one k-point, ascending by real part.
#[derive(Debug, Clone, PartialEq)]
pub struct BlochSpectrum {
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns, in the order of `eigenvalues`.
    pub eigenvectors: Option<Array2<Complex64>>,
    /// Dense: $\max|\mathrm{Im}\,\lambda|$. Partial: $\max|M-M^\dagger|$.
    pub hermiticity_residue: f64,
    pub hermiticity_violation: bool,
}

/// Evaluates $H(\bm k)=\sum_{\bm R}e^{i\bm k\cdot\bm R}H_{\bm R}$ and its spectrum.
///
/// The dense blocks are built once on construction and shared by every call, so
/// one solver can serve a whole k-path, also from several threads.
pub struct BlochSolver<'a> {
    ham: &'a Hamiltonian,
    cells: Vec<CellOffset>,
    /// Cartesian lattice vectors $\bm R$ of `cells`, one per row.
    translations: Array2<f64>,
    blocks: Vec<Array2<Complex64>>,
    reciprocal: Option<Array2<f64>>,
    options: SolveOptions,
}

impl<'a> BlochSolver<'a> {
    /// Checks `options` against the Hamiltonian and prepares the dense blocks.
    ///
    /// Partial mode together with eigenvectors is rejected here with a
    /// capability error, before any k-point is solved.
    pub fn new(ham: &'a Hamiltonian, options: SolveOptions) -> Result<Self> {
        if let SolverMode::Partial { count, .. } = options.mode {
            if options.eigenvectors {
                return Err(TbError::PartialSolveWithEigenvectors);
            }
            if count > ham.norb() {
                return Err(TbError::TooManyEigenvalues {
                    requested: count,
                    dim: ham.norb(),
                });
            }
        }
        let table = ham.hoppings();
        let positions: Vec<usize> = match &options.hopping_cells {
            None => (0..table.len()).collect(),
            Some(cells) => table.positions_of(cells)?,
        };
        let cells: Vec<CellOffset> = positions.iter().map(|&i| table.cells()[i]).collect();
        let blocks = positions.iter().map(|&i| table.blocks()[i].to_dense()).collect();
        let translations = ham.unit_cell_coordinates(Some(&cells));
        let reciprocal = match options.basis {
            CoordinateBasis::Direct => Some(ham.reciprocal_lattice()?),
            CoordinateBasis::Cartesian => None,
        };
        Ok(BlochSolver {
            ham,
            cells,
            translations,
            blocks,
            reciprocal,
            options,
        })
    }

    pub fn cells(&self) -> &[CellOffset] {
        &self.cells
    }

    pub fn options(&self) -> &SolveOptions {
        &self.options
    }

    /// Number of eigenvalues per k-point.
    pub fn nband(&self) -> usize {
        match self.options.mode {
            SolverMode::Dense => self.ham.norb(),
            SolverMode::Partial { count, .. } => count,
        }
    }

    fn cartesian_k<S>(&self, k: &ArrayBase<S, Ix1>) -> Result<Array1<f64>>
    where
        S: Data<Elem = f64>,
    {
        if k.len() != 3 {
            return Err(TbError::DimensionMismatch {
                context: "k-point coordinates".to_string(),
                expected: 3,
                found: k.len(),
            });
        }
        Ok(match &self.reciprocal {
            Some(rec) => k.dot(rec),
            None => k.to_owned(),
        })
    }

    /// Dense Bloch matrix at `k`.
    pub fn bloch_matrix<S>(&self, k: &ArrayBase<S, Ix1>) -> Result<Array2<Complex64>>
    where
        S: Data<Elem = f64>,
    {
        let kc = self.cartesian_k(k)?;
        let norb = self.ham.norb();
        let mut hamk = Array2::<Complex64>::zeros((norb, norb));
        for (block, r) in self.blocks.iter().zip(self.translations.outer_iter()) {
            let phase = Complex64::new(0.0, r.dot(&kc)).exp();
            hamk.scaled_add(phase, block);
        }
        Ok(hamk)
    }

    pub fn solve<S>(&self, k: &ArrayBase<S, Ix1>) -> Result<BlochSpectrum>
    where
        S: Data<Elem = f64>,
    {
        self.solve_cancellable(k, &CancellationToken::new())
    }

    /// Like [`BlochSolver::solve`], returning `Cancelled` as soon as `token` fires.
    pub fn solve_cancellable<S>(
        &self,
        k: &ArrayBase<S, Ix1>,
        token: &CancellationToken,
    ) -> Result<BlochSpectrum>
    where
        S: Data<Elem = f64>,
    {
        token.check()?;
        let hamk = self.bloch_matrix(k)?;
        let (eigenvalues, eigenvectors, residue) = match self.options.mode {
            SolverMode::Dense => {
                let (evals, evecs) = if self.options.eigenvectors {
                    let (evals, evecs) = hamk.eig()?;
                    (evals, Some(evecs))
                } else {
                    (hamk.eigvals()?, None)
                };
                let mut order: Vec<usize> = (0..evals.len()).collect();
                order.sort_by(|&a, &b| evals[a].re.total_cmp(&evals[b].re));
                let residue = evals.iter().fold(0.0f64, |m, x| m.max(x.im.abs()));
                let sorted = order.iter().map(|&i| evals[i].re).collect::<Array1<f64>>();
                let evecs = evecs.map(|v| v.select(Axis(1), &order));
                (sorted, evecs, residue)
            }
            SolverMode::Partial { count, shift } => {
                let residue = hermiticity_residue(&hamk);
                let evals =
                    shift_invert_eigenvalues(&hamk, count, shift, &self.options.lanczos, token)?;
                (evals, None, residue)
            }
        };
        let scale = eigenvalues.iter().fold(1.0f64, |m, x| m.max(x.abs()));
        let tolerance = self.options.hermiticity.tolerance * scale;
        let hermiticity_violation = residue > tolerance;
        if hermiticity_violation {
            if self.options.hermiticity.strict {
                return Err(TbError::HermiticityViolation { residue, tolerance });
            }
            warn!(
                "Bloch matrix at k = {} is not Hermitian (residue {:e} > {:e})",
                k, residue, tolerance
            );
        }
        Ok(BlochSpectrum {
            eigenvalues,
            eigenvectors,
            hermiticity_residue: residue,
            hermiticity_violation,
        })
    }
}

/// $\max_{ij}|M_{ij}-\overline{M_{ji}}|$
pub fn hermiticity_residue<S>(m: &ArrayBase<S, Ix2>) -> f64
where
    S: Data<Elem = Complex64>,
{
    let mut residue: f64 = 0.0;
    for ((i, j), v) in m.indexed_iter() {
        residue = residue.max((v - m[[j, i]].conj()).norm());
    }
    residue
}

impl Hamiltonian {
    /// Spectrum at a single k-point.
    pub fn bloch_eigenvalues<S>(&self, k: &ArrayBase<S, Ix1>, options: &SolveOptions) -> Result<BlochSpectrum>
    where
        S: Data<Elem = f64>,
    {
        BlochSolver::new(self, options.clone())?.solve(k)
    }

    /// Spectrum of the main-cell block alone, without any hopping to other cells.
    pub fn maincell_eigenvalues(&self, options: &SolveOptions) -> Result<BlochSpectrum> {
        let options = SolveOptions {
            basis: CoordinateBasis::Cartesian,
            hopping_cells: Some(vec![CellOffset::ORIGIN]),
            ..options.clone()
        };
        BlochSolver::new(self, options)?.solve(&Array1::<f64>::zeros(3))
    }

    /// Eigenvalues along `kpoints` (rows) on the calling thread. See
    /// [`crate::BandPathDistributor`] for the parallel version.
    pub fn bandstructure_data<S>(&self, kpoints: &ArrayBase<S, Ix2>, options: &SolveOptions) -> Result<BandStructure>
    where
        S: Data<Elem = f64>,
    {
        check_kpoints(kpoints)?;
        let solver = BlochSolver::new(self, options.clone())?;
        let mut rows = Vec::with_capacity(kpoints.nrows());
        let mut flagged = Vec::new();
        for (ik, k) in kpoints.outer_iter().enumerate() {
            let spectrum = solver.solve(&k)?;
            if spectrum.hermiticity_violation {
                flagged.push(ik);
            }
            rows.push(spectrum.eigenvalues.to_vec());
        }
        BandStructure::from_rows(rows, solver.nband(), flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supercell::SupercellSpec;
    use crate::test_models::{antihermitian, chain, square};
    use crate::ErrorKind;
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::f64::consts::PI;

    #[test]
    fn test_chain_band_edges() {
        let ham = chain(-1.0);
        let solver = BlochSolver::new(&ham, SolveOptions::default()).unwrap();
        let e0 = solver.solve(&array![0.0, 0.0, 0.0]).unwrap();
        assert_relative_eq!(e0.eigenvalues[0], -2.0, epsilon = 1e-12);
        let epi = solver.solve(&array![PI, 0.0, 0.0]).unwrap();
        assert_relative_eq!(epi.eigenvalues[0], 2.0, epsilon = 1e-12);
        assert!(!epi.hermiticity_violation);

        let direct = SolveOptions {
            basis: CoordinateBasis::Direct,
            ..Default::default()
        };
        let e = ham.bloch_eigenvalues(&array![0.5, 0.0, 0.0], &direct).unwrap();
        assert_relative_eq!(e.eigenvalues[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_band_folding_of_doubled_chain() {
        let ham = chain(-1.0);
        let spec = SupercellSpec::new(
            vec![CellOffset::ORIGIN, CellOffset::new(1, 0, 0)],
            [[2, 0, 0], [0, 1, 0], [0, 0, 1]],
        );
        let sc = ham.create_supercell_hamiltonian(&spec).unwrap();
        let solver = BlochSolver::new(&sc, SolveOptions::default()).unwrap();
        for kx in [0.0, 0.3, 0.9, PI / 2.0] {
            let e = solver.solve(&array![kx, 0.0, 0.0]).unwrap();
            let mut expect = [-2.0 * kx.cos(), -2.0 * (kx + PI).cos()];
            expect.sort_by(f64::total_cmp);
            assert_relative_eq!(e.eigenvalues[0], expect[0], epsilon = 1e-12);
            assert_relative_eq!(e.eigenvalues[1], expect[1], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_eigenvectors_are_columns() {
        let ham = square(0.3);
        let options = SolveOptions {
            eigenvectors: true,
            ..Default::default()
        };
        let solver = BlochSolver::new(&ham, options).unwrap();
        let k = array![0.4, -1.1, 0.0];
        let spectrum = solver.solve(&k).unwrap();
        let hamk = solver.bloch_matrix(&k).unwrap();
        let vecs = spectrum.eigenvectors.unwrap();
        for (n, e) in spectrum.eigenvalues.iter().enumerate() {
            let v = vecs.column(n);
            let hv = hamk.dot(&v);
            for (a, b) in hv.iter().zip(v.iter()) {
                assert_relative_eq!(a.re, e * b.re, epsilon = 1e-10);
                assert_relative_eq!(a.im, e * b.im, epsilon = 1e-10);
            }
        }
        assert!(spectrum.eigenvalues[0] <= spectrum.eigenvalues[1]);
    }

    #[test]
    fn test_partial_agrees_with_dense() {
        let ham = square(0.3);
        let cells: Vec<CellOffset> = crate::integer_grid_3d(3, 3, 1);
        let sc = ham
            .create_supercell_hamiltonian(&SupercellSpec::new(cells, [[3, 0, 0], [0, 3, 0], [0, 0, 1]]))
            .unwrap();
        assert_eq!(sc.norb(), 18);
        let k = array![0.21, 0.13, 0.0];
        let dense = sc.bloch_eigenvalues(&k, &SolveOptions::default()).unwrap();
        let shift = 0.05;
        let count = 4;
        let partial = SolveOptions {
            mode: SolverMode::Partial { count, shift },
            ..Default::default()
        };
        let got = sc.bloch_eigenvalues(&k, &partial).unwrap();
        let mut nearest = dense.eigenvalues.to_vec();
        nearest.sort_by(|a, b| (a - shift).abs().total_cmp(&(b - shift).abs()));
        let mut nearest: Vec<f64> = nearest.into_iter().take(count).collect();
        nearest.sort_by(f64::total_cmp);
        assert_eq!(got.eigenvalues.len(), count);
        for (a, b) in got.eigenvalues.iter().zip(nearest.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-8);
        }
        assert!(!got.hermiticity_violation);
    }

    #[test]
    fn test_partial_on_degenerate_ring() {
        // 200-site ring at k = 0: every level except the band edges is doubly degenerate
        let ring = chain(-1.0)
            .create_supercell_hamiltonian(&SupercellSpec::new(
                crate::integer_grid_3d(200, 1, 1),
                [[200, 0, 0], [0, 1, 0], [0, 0, 1]],
            ))
            .unwrap();
        let k = array![0.0, 0.0, 0.0];
        let dense = ring.bloch_eigenvalues(&k, &SolveOptions::default()).unwrap();
        let shift = 0.01;
        for count in [2, 3] {
            let partial = SolveOptions {
                mode: SolverMode::Partial { count, shift },
                ..Default::default()
            };
            let got = ring.bloch_eigenvalues(&k, &partial).unwrap();
            let mut nearest = dense.eigenvalues.to_vec();
            nearest.sort_by(|a, b| (a - shift).abs().total_cmp(&(b - shift).abs()));
            let mut nearest: Vec<f64> = nearest.into_iter().take(count).collect();
            nearest.sort_by(f64::total_cmp);
            assert_eq!(got.eigenvalues.len(), count);
            for (a, b) in got.eigenvalues.iter().zip(nearest.iter()) {
                assert_relative_eq!(a, b, epsilon = 1e-8);
            }
        }
        let pair = ring
            .bloch_eigenvalues(
                &k,
                &SolveOptions {
                    mode: SolverMode::Partial { count: 2, shift },
                    ..Default::default()
                },
            )
            .unwrap();
        assert_relative_eq!(pair.eigenvalues[0], 0.0, epsilon = 1e-8);
        assert_relative_eq!(pair.eigenvalues[1], 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_capability_and_configuration_errors() {
        let ham = square(0.0);
        let options = SolveOptions {
            mode: SolverMode::Partial { count: 1, shift: 0.0 },
            eigenvectors: true,
            ..Default::default()
        };
        let err = BlochSolver::new(&ham, options).err().unwrap();
        assert!(matches!(err, TbError::PartialSolveWithEigenvectors));
        assert_eq!(err.kind(), ErrorKind::Capability);

        let options = SolveOptions {
            mode: SolverMode::Partial { count: 3, shift: 0.0 },
            ..Default::default()
        };
        let err = BlochSolver::new(&ham, options).err().unwrap();
        assert!(matches!(err, TbError::TooManyEigenvalues { requested: 3, dim: 2 }));

        let options = SolveOptions {
            hopping_cells: Some(vec![CellOffset::new(2, 0, 0)]),
            ..Default::default()
        };
        assert!(matches!(
            BlochSolver::new(&ham, options).err().unwrap(),
            TbError::MissingHoppingCell(_)
        ));
    }

    #[test]
    fn test_restricted_hopping_cells() {
        let ham = chain(-1.0);
        let options = SolveOptions {
            hopping_cells: Some(vec![CellOffset::ORIGIN]),
            ..Default::default()
        };
        let e = ham.bloch_eigenvalues(&array![1.0, 0.0, 0.0], &options).unwrap();
        assert_relative_eq!(e.eigenvalues[0], 0.0);
    }

    #[test]
    fn test_maincell_eigenvalues() {
        let ham = square(0.2);
        let e = ham.maincell_eigenvalues(&SolveOptions::default()).unwrap();
        let r = (0.04f64 + 0.25).sqrt();
        assert_relative_eq!(e.eigenvalues[0], -r, epsilon = 1e-12);
        assert_relative_eq!(e.eigenvalues[1], r, epsilon = 1e-12);
    }

    #[test]
    fn test_hermiticity_flag() {
        let ham = antihermitian();
        let k = array![0.0, 0.0, 0.0];
        let e = ham.bloch_eigenvalues(&k, &SolveOptions::default()).unwrap();
        assert!(e.hermiticity_violation);
        assert_relative_eq!(e.hermiticity_residue, 1.0, epsilon = 1e-12);

        let strict = SolveOptions {
            hermiticity: HermiticityPolicy {
                strict: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = ham.bloch_eigenvalues(&k, &strict).unwrap_err();
        assert!(matches!(err, TbError::HermiticityViolation { .. }));
        assert_eq!(err.kind(), ErrorKind::Numerical);
    }

    #[test]
    fn test_bandstructure_rows_and_bands() {
        let ham = square(0.1);
        let kpoints = array![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [0.5, 0.5, 0.0]];
        let options = SolveOptions {
            basis: CoordinateBasis::Direct,
            ..Default::default()
        };
        let bands = ham.bandstructure_data(&kpoints, &options).unwrap();
        assert_eq!(bands.eigenvalues.shape(), &[3, 2]);
        assert_eq!(bands.by_band().shape(), &[2, 3]);
        for row in bands.eigenvalues.outer_iter() {
            assert!(row[0] <= row[1]);
        }
        assert!(ham.bandstructure_data(&array![[0.0, 0.0]], &options).is_err());
    }
}
