//! Real space lattices and the exact folding of lattice offsets into supercells.
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, arr2};
use ndarray_linalg::Inverse;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;

use crate::error::{Result, TbError};
use crate::hopping::CellOffset;
use crate::math::{
    IMat3, WideMat3, adjugate3, det3_from_adjugate, matvec3, transpose3, widen, widen_vec,
};

/// Three lattice vectors stored as the rows of a 3$\times$3 matrix (Å).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Array2<f64>", into = "Array2<f64>")]
pub struct LatticeBasis {
    lat: Array2<f64>,
}

impl TryFrom<Array2<f64>> for LatticeBasis {
    type Error = TbError;

    fn try_from(lat: Array2<f64>) -> Result<Self> {
        LatticeBasis::new(lat)
    }
}

impl From<LatticeBasis> for Array2<f64> {
    fn from(basis: LatticeBasis) -> Self {
        basis.lat
    }
}

impl LatticeBasis {
    pub fn new(lat: Array2<f64>) -> Result<Self> {
        if lat.shape() != [3, 3] {
            return Err(TbError::DimensionMismatch {
                context: "lattice vectors".to_string(),
                expected: 3,
                found: if lat.nrows() != 3 { lat.nrows() } else { lat.ncols() },
            });
        }
        Ok(LatticeBasis { lat })
    }

    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        LatticeBasis { lat: arr2(&rows) }
    }

    #[inline(always)]
    pub fn vectors(&self) -> &Array2<f64> {
        &self.lat
    }

    /// Reciprocal vectors as rows, $\bm b_i\cdot\bm a_j=2\pi\delta_{ij}$, i.e. $2\pi (A^{-1})^T$.
    pub fn reciprocal(&self) -> Result<Array2<f64>> {
        let inv = self.lat.inv()?;
        Ok(inv.reversed_axes() * (2.0 * PI))
    }

    /// Converts a wavevector given in units of the reciprocal vectors to cartesian.
    pub fn direct_to_cartesian_reciprocal<S>(&self, k: &ArrayBase<S, Ix1>) -> Result<Array1<f64>>
    where
        S: Data<Elem = f64>,
    {
        Ok(k.dot(&self.reciprocal()?))
    }

    /// Cartesian position of the lattice point `cell`, $\bm R\cdot A$.
    pub fn cell_to_cartesian(&self, cell: &CellOffset) -> Array1<f64> {
        Array1::from(cell.to_f64().to_vec()).dot(&self.lat)
    }

    /// Lattice spanned by the integer combinations `basis`, $B\cdot A$.
    pub fn supercell(&self, basis: &IMat3) -> LatticeBasis {
        let b = Array2::from_shape_fn((3, 3), |(i, j)| basis[i][j] as f64);
        LatticeBasis {
            lat: b.dot(&self.lat),
        }
    }
}

/// Ordered list of old-lattice cells making up one supercell. The position of a
/// cell in the list is its block index inside the supercell matrices.
#[derive(Debug, Clone)]
pub struct ExplicitCells {
    cells: Vec<CellOffset>,
    index: HashMap<CellOffset, usize>,
}

impl ExplicitCells {
    pub fn new(cells: &[CellOffset]) -> Result<Self> {
        let mut index = HashMap::with_capacity(cells.len());
        for (i, c) in cells.iter().enumerate() {
            if index.insert(*c, i).is_some() {
                return Err(TbError::DuplicateCell(*c));
            }
        }
        Ok(ExplicitCells {
            cells: cells.to_vec(),
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[CellOffset] {
        &self.cells
    }

    pub fn position(&self, cell: &CellOffset) -> Option<usize> {
        self.index.get(cell).copied()
    }
}

/// Result of folding one old-lattice offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldedOffset {
    /// Offset of the target in units of the new lattice vectors.
    pub new_cell: CellOffset,
    /// Old-lattice cell of the target inside the new cell.
    pub sublattice: CellOffset,
}

/// Exact inverse transpose $B^{-T}=N/d$ of an integer basis change.
///
/// `B` holds the new lattice vectors as rows in units of the old ones. With
/// $N=\mathrm{sgn}(\det B)\,\mathrm{adj}(B)^T$ and $d=|\det B|$ the new
/// coordinates of an old offset $\bm h$ are $\bm c=N\bm h/d$, so the floor division
/// and remainder are exact. Everything is evaluated in checked `i128`; a basis
/// whose products do not fit is rejected as [`TbError::InvalidSupercellMatrix`].
#[derive(Debug, Clone)]
pub struct LatticeMetric {
    basis: IMat3,
    numerator: WideMat3,
    denominator: i128,
    basis_t: WideMat3,
}

impl LatticeMetric {
    pub fn new(basis: &IMat3) -> Result<Self> {
        let invalid = || TbError::InvalidSupercellMatrix(*basis);
        let wide = widen(basis);
        let adj = adjugate3(&wide).ok_or_else(invalid)?;
        let det = det3_from_adjugate(&wide, &adj).ok_or_else(invalid)?;
        if det == 0 {
            return Err(invalid());
        }
        let mut numerator = transpose3(&adj);
        if det < 0 {
            for x in numerator.iter_mut().flatten() {
                *x = x.checked_neg().ok_or_else(invalid)?;
            }
        }
        Ok(LatticeMetric {
            basis: *basis,
            numerator,
            denominator: det.checked_abs().ok_or_else(invalid)?,
            basis_t: transpose3(&wide),
        })
    }

    pub fn basis(&self) -> &IMat3 {
        &self.basis
    }

    pub fn numerator(&self) -> &WideMat3 {
        &self.numerator
    }

    pub fn denominator(&self) -> i128 {
        self.denominator
    }

    /// Splits an old offset into a new-lattice offset and the old cell it lands on
    /// inside that new cell. The sublattice lies in the half-open parallelepiped
    /// spanned by the new vectors.
    pub fn fold(&self, hopto: &CellOffset) -> Result<FoldedOffset> {
        self.fold_wide(&widen_vec(&hopto.0))
    }

    fn fold_wide(&self, hopto: &[i128; 3]) -> Result<FoldedOffset> {
        let invalid = || TbError::InvalidSupercellMatrix(self.basis);
        let d = self.denominator;
        let scaled = matvec3(&self.numerator, hopto).ok_or_else(invalid)?;
        let mut new_cell = [0i64; 3];
        let mut rest = [0i128; 3];
        for i in 0..3 {
            new_cell[i] = i64::try_from(scaled[i].div_euclid(d)).map_err(|_| invalid())?;
            rest[i] = scaled[i].rem_euclid(d);
        }
        let wide_sub = matvec3(&self.basis_t, &rest).ok_or_else(invalid)?;
        let mut sublattice = [0i64; 3];
        for i in 0..3 {
            // exact: B^T rest = d (h - B^T new_cell)
            sublattice[i] = i64::try_from(wide_sub[i] / d).map_err(|_| invalid())?;
        }
        Ok(FoldedOffset {
            new_cell: CellOffset(new_cell),
            sublattice: CellOffset(sublattice),
        })
    }

    /// Folds the hop from `explicit_cell` along `offset`. The second element is the
    /// block index of the target cell, `None` when the target cell is not one of
    /// the explicit cells.
    pub fn fold_offset(
        &self,
        cells: &ExplicitCells,
        explicit_cell: &CellOffset,
        offset: &CellOffset,
    ) -> Result<(CellOffset, Option<usize>)> {
        let a = widen_vec(&explicit_cell.0);
        let b = widen_vec(&offset.0);
        let folded = self.fold_wide(&[a[0] + b[0], a[1] + b[1], a[2] + b[2]])?;
        Ok((folded.new_cell, cells.position(&folded.sublattice)))
    }
}
