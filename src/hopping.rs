//! Sparse hopping blocks keyed by integer lattice offsets.
//!
//! A [`HoppingBlock`] stores $\bra{i\bm 0}\hat H\ket{j\bm R}$ for one lattice offset
//! $\bm R$. Entries that were never set are structurally absent, which is not the
//! same as a stored zero: the supercell assembly and the Peierls phases only ever
//! touch stored entries.
use ndarray::Array2;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Add, Neg};

use crate::error::{Result, TbError};
use crate::generics::hop_use;

/// Integer lattice offset $\bm R=(R_1,R_2,R_3)$ in units of the lattice vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellOffset(pub [i64; 3]);

impl CellOffset {
    pub const ORIGIN: CellOffset = CellOffset([0, 0, 0]);

    pub fn new(a: i64, b: i64, c: i64) -> Self {
        CellOffset([a, b, c])
    }

    #[inline(always)]
    pub fn is_origin(&self) -> bool {
        self.0 == [0, 0, 0]
    }

    /// Offset as floating point numbers, e.g. for cartesian conversion.
    pub fn to_f64(&self) -> [f64; 3] {
        [self.0[0] as f64, self.0[1] as f64, self.0[2] as f64]
    }
}

impl From<[i64; 3]> for CellOffset {
    fn from(value: [i64; 3]) -> Self {
        CellOffset(value)
    }
}

impl Neg for CellOffset {
    type Output = CellOffset;
    fn neg(self) -> CellOffset {
        CellOffset([-self.0[0], -self.0[1], -self.0[2]])
    }
}

impl Add for CellOffset {
    type Output = CellOffset;
    fn add(self, rhs: CellOffset) -> CellOffset {
        CellOffset([self.0[0] + rhs.0[0], self.0[1] + rhs.0[1], self.0[2] + rhs.0[2]])
    }
}

impl fmt::Display for CellOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.0[0], self.0[1], self.0[2])
    }
}

/// Square sparse complex matrix holding the hoppings of one lattice offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BlockTriplets", into = "BlockTriplets")]
pub struct HoppingBlock {
    dim: usize,
    entries: BTreeMap<(usize, usize), Complex64>,
}

/// Serialised form of a block, `(row, column, value)` triplets.
#[derive(Serialize, Deserialize)]
struct BlockTriplets {
    dim: usize,
    entries: Vec<(usize, usize, Complex64)>,
}

impl TryFrom<BlockTriplets> for HoppingBlock {
    type Error = TbError;

    fn try_from(t: BlockTriplets) -> Result<Self> {
        let mut block = HoppingBlock::empty(t.dim);
        for (i, j, v) in t.entries {
            block.set(i, j, v)?;
        }
        Ok(block)
    }
}

impl From<HoppingBlock> for BlockTriplets {
    fn from(b: HoppingBlock) -> Self {
        BlockTriplets {
            dim: b.dim,
            entries: b.iter().collect(),
        }
    }
}

impl HoppingBlock {
    /// An empty `dim`$\times$`dim` block without any stored entry.
    pub fn empty(dim: usize) -> Self {
        HoppingBlock {
            dim,
            entries: BTreeMap::new(),
        }
    }

    /// Builds a block from a dense matrix, storing every nonzero element.
    pub fn from_dense(matrix: &Array2<Complex64>) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() {
            return Err(TbError::DimensionMismatch {
                context: "square hopping block".to_string(),
                expected: matrix.nrows(),
                found: matrix.ncols(),
            });
        }
        let mut block = HoppingBlock::empty(matrix.nrows());
        for ((i, j), v) in matrix.indexed_iter() {
            if *v != Complex64::new(0.0, 0.0) {
                block.entries.insert((i, j), *v);
            }
        }
        Ok(block)
    }

    #[inline(always)]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Value of a stored entry, `None` if the entry is structurally absent.
    pub fn get(&self, i: usize, j: usize) -> Option<Complex64> {
        self.entries.get(&(i, j)).copied()
    }

    /// Value of an entry, treating absent entries as zero.
    pub fn value(&self, i: usize, j: usize) -> Complex64 {
        self.get(i, j).unwrap_or_default()
    }

    /// Stores `value` at `(i, j)`. Zeros are stored as given.
    pub fn set(&mut self, i: usize, j: usize, value: Complex64) -> Result<()> {
        self.check_index(i)?;
        self.check_index(j)?;
        self.entries.insert((i, j), value);
        Ok(())
    }

    /// Same as [`HoppingBlock::set`] for real or complex amplitudes.
    pub fn set_hop<T: hop_use>(&mut self, i: usize, j: usize, value: T) -> Result<()> {
        self.set(i, j, value.to_complex())
    }

    /// Adds `value` to `(i, j)`, creating the entry if needed.
    pub fn add(&mut self, i: usize, j: usize, value: Complex64) -> Result<()> {
        self.check_index(i)?;
        self.check_index(j)?;
        *self.entries.entry((i, j)).or_default() += value;
        Ok(())
    }

    /// Makes `(i, j)` structurally absent again.
    pub fn remove(&mut self, i: usize, j: usize) -> Option<Complex64> {
        self.entries.remove(&(i, j))
    }

    /// Iterates over stored entries in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, Complex64)> + '_ {
        self.entries.iter().map(|(&(i, j), &v)| (i, j, v))
    }

    fn check_index(&self, i: usize) -> Result<()> {
        if i >= self.dim {
            return Err(TbError::OrbitalOutOfRange {
                context: "hopping block",
                index: i,
                norb: self.dim,
            });
        }
        Ok(())
    }

    pub fn to_dense(&self) -> Array2<Complex64> {
        let mut dense = Array2::<Complex64>::zeros((self.dim, self.dim));
        for (&(i, j), v) in self.entries.iter() {
            dense[[i, j]] = *v;
        }
        dense
    }

    /// Hermitian conjugate $B^\dagger$.
    pub fn adjoint(&self) -> HoppingBlock {
        HoppingBlock {
            dim: self.dim,
            entries: self.entries.iter().map(|(&(i, j), v)| ((j, i), v.conj())).collect(),
        }
    }

    /// Submatrix on the given orbitals, `B[orbitals, orbitals]`.
    pub fn select(&self, orbitals: &[usize]) -> Result<HoppingBlock> {
        let mut new_index: HashMap<usize, Vec<usize>> = HashMap::new();
        for (new, &old) in orbitals.iter().enumerate() {
            self.check_index(old)?;
            new_index.entry(old).or_default().push(new);
        }
        let mut out = HoppingBlock::empty(orbitals.len());
        for (&(i, j), v) in self.entries.iter() {
            if let (Some(rows), Some(cols)) = (new_index.get(&i), new_index.get(&j)) {
                for &r in rows {
                    for &c in cols {
                        out.entries.insert((r, c), *v);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Adds `diag(values)`.
    pub fn add_diagonal(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.dim {
            return Err(TbError::DimensionMismatch {
                context: "diagonal of hopping block".to_string(),
                expected: self.dim,
                found: values.len(),
            });
        }
        for (i, v) in values.iter().enumerate() {
            *self.entries.entry((i, i)).or_default() += Complex64::new(*v, 0.0);
        }
        Ok(())
    }

    /// Multiplies every stored entry by `factor(i, j)`; absent entries stay absent
    /// and no entry is ever dropped, even if the product rounds to zero.
    pub fn scale_entries<F>(&mut self, mut factor: F)
    where
        F: FnMut(usize, usize) -> Complex64,
    {
        for (&(i, j), v) in self.entries.iter_mut() {
            *v *= factor(i, j);
        }
    }

    /// Composes a `n_cells`$\times$`n_cells` grid of equally sized blocks into one
    /// block. `placements` lists `(block, row cell, column cell)`; a later placement
    /// in the same slot overwrites an earlier one. Empty slots stay absent.
    pub fn compose(
        sub_dim: usize,
        n_cells: usize,
        placements: &[(&HoppingBlock, usize, usize)],
    ) -> Result<HoppingBlock> {
        let mut out = HoppingBlock::empty(sub_dim * n_cells);
        for (block, row, col) in placements.iter() {
            if block.dim != sub_dim {
                return Err(TbError::DimensionMismatch {
                    context: "block composition".to_string(),
                    expected: sub_dim,
                    found: block.dim,
                });
            }
            if *row >= n_cells || *col >= n_cells {
                return Err(TbError::DimensionMismatch {
                    context: "block composition cell index".to_string(),
                    expected: n_cells,
                    found: (*row).max(*col),
                });
            }
            let (r0, c0) = (row * sub_dim, col * sub_dim);
            for (&(i, j), v) in block.entries.iter() {
                out.entries.insert((r0 + i, c0 + j), *v);
            }
        }
        Ok(out)
    }

    /// Largest elementwise distance to another block, absent entries counting as zero.
    pub fn max_abs_diff(&self, other: &HoppingBlock) -> f64 {
        let mut diff: f64 = 0.0;
        for (&(i, j), v) in self.entries.iter() {
            diff = diff.max((v - other.value(i, j)).norm());
        }
        for (&(i, j), v) in other.entries.iter() {
            if !self.entries.contains_key(&(i, j)) {
                diff = diff.max(v.norm());
            }
        }
        diff
    }
}

/// Mapping from lattice offsets to hopping blocks. Insertion order is kept so that
/// iteration and export are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "Vec<(CellOffset, HoppingBlock)>",
    into = "Vec<(CellOffset, HoppingBlock)>"
)]
pub struct HoppingTable {
    cells: Vec<CellOffset>,
    blocks: Vec<HoppingBlock>,
    index: HashMap<CellOffset, usize>,
}

impl TryFrom<Vec<(CellOffset, HoppingBlock)>> for HoppingTable {
    type Error = TbError;

    fn try_from(pairs: Vec<(CellOffset, HoppingBlock)>) -> Result<Self> {
        HoppingTable::from_blocks(pairs)
    }
}

impl From<HoppingTable> for Vec<(CellOffset, HoppingBlock)> {
    fn from(table: HoppingTable) -> Self {
        table.cells.into_iter().zip(table.blocks).collect()
    }
}

impl HoppingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(offset, block)` pairs, rejecting repeated offsets.
    pub fn from_blocks<I>(blocks: I) -> Result<Self>
    where
        I: IntoIterator<Item = (CellOffset, HoppingBlock)>,
    {
        let mut table = HoppingTable::new();
        for (cell, block) in blocks {
            if table.contains(&cell) {
                return Err(TbError::DuplicateCell(cell));
            }
            table.insert(cell, block);
        }
        Ok(table)
    }

    /// Inserts or replaces the block at `cell`.
    pub fn insert(&mut self, cell: CellOffset, block: HoppingBlock) {
        if let Some(&i) = self.index.get(&cell) {
            self.blocks[i] = block;
        } else {
            self.index.insert(cell, self.cells.len());
            self.cells.push(cell);
            self.blocks.push(block);
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, cell: &CellOffset) -> bool {
        self.position(cell).is_some()
    }

    /// Position of `cell` in insertion order.
    pub fn position(&self, cell: &CellOffset) -> Option<usize> {
        self.index.get(cell).copied()
    }

    pub fn get(&self, cell: &CellOffset) -> Option<&HoppingBlock> {
        self.position(cell).map(|i| &self.blocks[i])
    }

    pub fn get_mut(&mut self, cell: &CellOffset) -> Option<&mut HoppingBlock> {
        self.position(cell).map(move |i| &mut self.blocks[i])
    }

    pub fn cells(&self) -> &[CellOffset] {
        &self.cells
    }

    pub fn blocks(&self) -> &[HoppingBlock] {
        &self.blocks
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CellOffset, &HoppingBlock)> + '_ {
        self.cells.iter().zip(self.blocks.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&CellOffset, &mut HoppingBlock)> + '_ {
        self.cells.iter().zip(self.blocks.iter_mut())
    }

    /// Block at `cell`, inserting an empty `dim`$\times$`dim` block if there is none.
    pub fn get_or_insert_empty(&mut self, cell: CellOffset, dim: usize) -> &mut HoppingBlock {
        let i = match self.position(&cell) {
            Some(i) => i,
            None => {
                self.insert(cell, HoppingBlock::empty(dim));
                self.cells.len() - 1
            }
        };
        &mut self.blocks[i]
    }

    /// Maps a list of offsets to table positions, failing on the first unknown one.
    pub fn positions_of(&self, cells: &[CellOffset]) -> Result<Vec<usize>> {
        cells
            .iter()
            .map(|c| self.position(c).ok_or(TbError::MissingHoppingCell(*c)))
            .collect()
    }

    /// Same set of offsets with identical blocks, ignoring insertion order.
    pub fn same_hoppings(&self, other: &HoppingTable, tol: f64) -> bool {
        self.len() == other.len()
            && self.iter().all(|(cell, block)| {
                other
                    .get(cell)
                    .is_some_and(|b| b.dim() == block.dim() && b.max_abs_diff(block) <= tol)
            })
    }
}
