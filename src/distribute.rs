//! Band structures along long k-paths, split over a pool of workers.
//!
//! The k-list is cut into contiguous chunks, one per worker. Every worker solves
//! its chunk with its own view of the same [`BlochSolver`]; a single aggregator
//! glues the chunks back together in the original k order, whatever order they
//! finish in.
use log::{debug, info};
use ndarray::{Array2, ArrayBase, Axis, Data, Ix2};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::Hamiltonian;
use crate::error::{Result, TbError};
use crate::solver::{BlochSolver, SolveOptions};

/// Cooperative stop signal shared between the caller and the workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`CancellationToken::cancel`] has been called.
    #[inline(always)]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TbError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Outcome of a gather: only the aggregator holds the assembled data.
#[derive(Debug, Clone, PartialEq)]
pub enum Gathered<T> {
    Aggregator(T),
    NonAggregator,
}

impl<T> Gathered<T> {
    pub fn is_aggregator(&self) -> bool {
        matches!(self, Gathered::Aggregator(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Gathered::Aggregator(v) => Some(v),
            Gathered::NonAggregator => None,
        }
    }
}

/// Splits `0..n` into `parts` contiguous ranges whose lengths differ by at most
/// one, the longer ranges first. Some ranges are empty if `parts > n`.
pub fn partition(n: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    let base = n / parts;
    let extra = n % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let r = start..start + len;
            start += len;
            r
        })
        .collect()
}

/// Concatenates chunk results in chunk order; `parts` may arrive in any order.
pub fn assemble<T>(mut parts: Vec<(usize, Vec<T>)>) -> Vec<T> {
    parts.sort_by_key(|(i, _)| *i);
    parts.into_iter().flat_map(|(_, v)| v).collect()
}

/// Gather step of one participant. The participant with `rank == 0` is the
/// aggregator and receives the assembled data, every other rank gets
/// [`Gathered::NonAggregator`].
pub fn gather<T>(rank: usize, parts: Vec<(usize, Vec<T>)>) -> Gathered<Vec<T>> {
    if rank == 0 {
        Gathered::Aggregator(assemble(parts))
    } else {
        Gathered::NonAggregator
    }
}

/// Eigenvalues along a list of k-points.
#[derive(Debug, Clone, PartialEq)]
pub struct BandStructure {
    /// `nk`$\times$`nband`, one row per k-point, ascending within a row.
    pub eigenvalues: Array2<f64>,
    /// Indices of k-points whose Bloch matrix failed the Hermiticity check.
    pub flagged: Vec<usize>,
}

impl BandStructure {
    pub fn nk(&self) -> usize {
        self.eigenvalues.nrows()
    }

    pub fn nband(&self) -> usize {
        self.eigenvalues.ncols()
    }

    /// Band-major copy, `nband`$\times$`nk`.
    pub fn by_band(&self) -> Array2<f64> {
        self.eigenvalues.t().to_owned()
    }

    pub(crate) fn from_rows(rows: Vec<Vec<f64>>, nband: usize, flagged: Vec<usize>) -> Result<Self> {
        let nk = rows.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != nband) {
            return Err(TbError::DimensionMismatch {
                context: "eigenvalues per k-point".to_string(),
                expected: nband,
                found: bad.len(),
            });
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let eigenvalues = Array2::from_shape_vec((nk, nband), flat).map_err(|_| {
            TbError::DimensionMismatch {
                context: "band structure".to_string(),
                expected: nk * nband,
                found: 0,
            }
        })?;
        Ok(BandStructure {
            eigenvalues,
            flagged,
        })
    }
}

/// Result of one chunk: `(chunk index, eigenvalue rows, flagged k indices)`.
type ChunkResult = (usize, Vec<Vec<f64>>, Vec<usize>);

/// Runs Bloch solves of a k-path on a dedicated thread pool.
pub struct BandPathDistributor {
    workers: usize,
    pool: rayon::ThreadPool,
}

impl BandPathDistributor {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(TbError::InvalidWorkerCount);
        }
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        Ok(BandPathDistributor { workers, pool })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Solves every k-point (rows of `kpoints`, 3 columns) and returns the
    /// eigenvalues in k order.
    ///
    /// The first chunk that fails makes the whole run fail; a cancelled token
    /// stops all workers before their next k-point.
    pub fn run<S>(
        &self,
        ham: &Hamiltonian,
        kpoints: &ArrayBase<S, Ix2>,
        options: &SolveOptions,
        token: &CancellationToken,
    ) -> Result<BandStructure>
    where
        S: Data<Elem = f64> + Sync,
    {
        self.run_with_progress(ham, kpoints, options, token, |_| {})
    }

    /// [`BandPathDistributor::run`], calling `on_point` with the index of every
    /// k-point as soon as its worker has solved it. Calls come from the worker
    /// threads in no particular order.
    pub fn run_with_progress<S, F>(
        &self,
        ham: &Hamiltonian,
        kpoints: &ArrayBase<S, Ix2>,
        options: &SolveOptions,
        token: &CancellationToken,
        on_point: F,
    ) -> Result<BandStructure>
    where
        S: Data<Elem = f64> + Sync,
        F: Fn(usize) + Sync,
    {
        check_kpoints(kpoints)?;
        let solver = BlochSolver::new(ham, options.clone())?;
        let nk = kpoints.nrows();
        let chunks = partition(nk, self.workers);
        info!(
            "solving {} k-points in {} chunks ({} orbitals, {} hopping cells)",
            nk,
            chunks.len(),
            ham.norb(),
            solver.cells().len()
        );
        let results: Vec<Result<ChunkResult>> = self.pool.install(|| {
            chunks
                .par_iter()
                .enumerate()
                .map(|(ichunk, range)| -> Result<ChunkResult> {
                    let mut rows = Vec::with_capacity(range.len());
                    let mut flagged = Vec::new();
                    for ik in range.clone() {
                        token.check()?;
                        let spectrum = solver.solve_cancellable(&kpoints.row(ik), token)?;
                        if spectrum.hermiticity_violation {
                            flagged.push(ik);
                        }
                        rows.push(spectrum.eigenvalues.to_vec());
                        on_point(ik);
                    }
                    debug!("chunk {} ({} k-points) done", ichunk, range.len());
                    Ok((ichunk, rows, flagged))
                })
                .collect()
        });
        let mut parts = Vec::with_capacity(results.len());
        let mut flagged = Vec::new();
        for r in results {
            let (ichunk, rows, f) = r?;
            parts.push((ichunk, rows));
            flagged.extend(f);
        }
        flagged.sort_unstable();
        let rows = assemble(parts);
        BandStructure::from_rows(rows, solver.nband(), flagged)
    }
}

/// k-points are rows of three coordinates.
pub(crate) fn check_kpoints<S: Data<Elem = f64>>(kpoints: &ArrayBase<S, Ix2>) -> Result<()> {
    if kpoints.len_of(Axis(1)) != 3 {
        return Err(TbError::DimensionMismatch {
            context: "k-point coordinates".to_string(),
            expected: 3,
            found: kpoints.len_of(Axis(1)),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpoints::{point_path, standard_path};
    use crate::model_struct::CoordinateBasis;
    use crate::solver::HermiticityPolicy;
    use crate::test_models::{antihermitian, chain, square};
    use std::sync::atomic::AtomicUsize;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_partition_like_array_split() {
        let p = partition(10, 3);
        assert_eq!(p, vec![0..4, 4..7, 7..10]);
        let p = partition(2, 4);
        assert_eq!(p, vec![0..1, 1..2, 2..2, 2..2]);
        assert!(partition(5, 0).is_empty());
    }

    #[test]
    fn test_assemble_any_arrival_order() {
        let parts = vec![(2, vec![5, 6]), (0, vec![1, 2]), (1, vec![3, 4])];
        assert_eq!(assemble(parts.clone()), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(gather(0, parts.clone()), Gathered::Aggregator(vec![1, 2, 3, 4, 5, 6]));
        assert_eq!(gather(3, parts), Gathered::NonAggregator);
    }

    #[test]
    fn test_distributor_matches_sequential() {
        let ham = square(0.3);
        let path = standard_path("hexagonal", 7).unwrap().path;
        let options = SolveOptions {
            basis: CoordinateBasis::Direct,
            ..Default::default()
        };
        let reference = ham.bandstructure_data(&path, &options).unwrap();
        for workers in [1, 2, 3, 5, 40] {
            let dist = BandPathDistributor::new(workers).unwrap();
            let bands = dist.run(&ham, &path, &options, &CancellationToken::new()).unwrap();
            assert_eq!(bands.nk(), path.nrows());
            assert_eq!(bands.nband(), 2);
            for (a, b) in bands.eigenvalues.iter().zip(reference.eigenvalues.iter()) {
                assert_relative_eq!(a, b, epsilon = 1e-12);
            }
            assert!(bands.flagged.is_empty());
        }
    }

    #[test]
    fn test_distributor_chain_band() {
        let ham = chain(-1.0);
        let path = point_path(&[array![0.0, 0.0, 0.0], array![0.5, 0.0, 0.0]], &[4]).unwrap();
        let options = SolveOptions {
            basis: CoordinateBasis::Direct,
            ..Default::default()
        };
        let bands = BandPathDistributor::new(2)
            .unwrap()
            .run(&ham, &path, &options, &CancellationToken::new())
            .unwrap();
        let by_band = bands.by_band();
        assert_eq!(by_band.shape(), &[1, 5]);
        for (i, e) in by_band.row(0).iter().enumerate() {
            let k = 2.0 * std::f64::consts::PI * 0.125 * i as f64;
            assert_relative_eq!(*e, -2.0 * k.cos(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_cancelled_run() {
        let ham = chain(-1.0);
        let token = CancellationToken::new();
        token.cancel();
        let r = BandPathDistributor::new(2).unwrap().run(
            &ham,
            &Array2::<f64>::zeros((4, 3)),
            &SolveOptions::default(),
            &token,
        );
        assert!(matches!(r, Err(TbError::Cancelled)));
        assert!(matches!(BandPathDistributor::new(0), Err(TbError::InvalidWorkerCount)));
    }

    #[test]
    fn test_failing_chunk_fails_run() {
        let ham = antihermitian();
        let strict = SolveOptions {
            hermiticity: HermiticityPolicy {
                strict: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let r = BandPathDistributor::new(3).unwrap().run(
            &ham,
            &Array2::<f64>::zeros((6, 3)),
            &strict,
            &CancellationToken::new(),
        );
        assert!(matches!(r, Err(TbError::HermiticityViolation { .. })));

        // lenient policy flags every point instead
        let bands = BandPathDistributor::new(3)
            .unwrap()
            .run(
                &ham,
                &Array2::<f64>::zeros((6, 3)),
                &SolveOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(bands.flagged, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_cancel_during_run() {
        let ham = chain(-1.0);
        let token = CancellationToken::new();
        let solved = AtomicUsize::new(0);
        let r = BandPathDistributor::new(2).unwrap().run_with_progress(
            &ham,
            &Array2::<f64>::zeros((8, 3)),
            &SolveOptions::default(),
            &token,
            |_| {
                solved.fetch_add(1, Ordering::SeqCst);
                token.cancel();
            },
        );
        assert!(matches!(r, Err(TbError::Cancelled)));
        // each worker finishes at most the point it was on
        let n = solved.load(Ordering::SeqCst);
        assert!(n >= 1 && n <= 2, "{} points solved after cancel", n);
    }

    #[test]
    fn test_progress_reports_every_point() {
        let ham = square(0.3);
        let seen = std::sync::Mutex::new(Vec::new());
        let bands = BandPathDistributor::new(3)
            .unwrap()
            .run_with_progress(
                &ham,
                &Array2::<f64>::zeros((7, 3)),
                &SolveOptions::default(),
                &CancellationToken::new(),
                |ik| seen.lock().unwrap().push(ik),
            )
            .unwrap();
        assert_eq!(bands.nk(), 7);
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }
}
