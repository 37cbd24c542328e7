use crate::error::{Result, TbError};
use crate::hopping::{CellOffset, HoppingTable};
use crate::lattice::LatticeBasis;
use crate::{Hamiltonian, Orbital};
use ndarray::*;
use ndarray_linalg::Inverse;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Coordinates of an input vector: cartesian, or in units of the (reciprocal)
/// lattice vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoordinateBasis {
    #[default]
    Cartesian,
    Direct,
}

/// Region used by [`Hamiltonian::cells_within_zone`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Zone {
    /// Cells whose distance from the origin is at most `radius`. In direct
    /// coordinates the distance is the `norm_order` norm of the integer offset
    /// (`f64::INFINITY` gives a box), in cartesian ones the euclidean norm.
    Radius { radius: f64, norm_order: f64 },
    /// Cells with $|R_i|\le$ `half_width[i]` in every direction.
    Box { half_width: [f64; 3] },
}

impl Hamiltonian {
    #[inline(always)]
    pub fn hoppings(&self) -> &HoppingTable {
        &self.hoppings
    }
    #[inline(always)]
    pub fn orbitals(&self) -> &[Orbital] {
        &self.orbitals
    }
    #[inline(always)]
    pub fn lattice(&self) -> &LatticeBasis {
        &self.lattice
    }
    #[inline(always)]
    pub fn fermi_energy(&self) -> Option<f64> {
        self.fermi_energy
    }
    #[inline(always)]
    pub fn norb(&self) -> usize {
        self.orbitals.len()
    }
    #[inline(always)]
    pub fn nR(&self) -> usize {
        self.hoppings.len()
    }
    /// Lattice offsets with stored hoppings, in insertion order.
    #[inline(always)]
    pub fn cells(&self) -> &[CellOffset] {
        self.hoppings.cells()
    }

    pub fn reciprocal_lattice(&self) -> Result<Array2<f64>> {
        self.lattice.reciprocal()
    }

    /// Orbital centres as an `norb`$\times 3$ array.
    pub fn orbital_positions(&self) -> Array2<f64> {
        let mut pos = Array2::zeros((self.norb(), 3));
        pos.outer_iter_mut()
            .zip(self.orbitals.iter())
            .for_each(|(mut p, orb)| p.assign(&aview1(&orb.position)));
        pos
    }

    pub fn orbital_spreads(&self) -> Vec<f64> {
        self.orbitals.iter().map(|o| o.spread).collect()
    }

    /// Main-cell block $\bra{m\bm 0}\hat H\ket{n\bm 0}$ as a dense matrix.
    pub fn maincell_matrix(&self) -> Result<Array2<Complex64>> {
        self.hoppings
            .get(&CellOffset::ORIGIN)
            .map(|b| b.to_dense())
            .ok_or(TbError::MissingHoppingCell(CellOffset::ORIGIN))
    }

    /// Cartesian origins of `cells` (all stored cells if `None`), one per row.
    pub fn unit_cell_coordinates(&self, cells: Option<&[CellOffset]>) -> Array2<f64> {
        let cells = cells.unwrap_or(self.cells());
        let mut coords = Array2::zeros((cells.len(), 3));
        for (mut row, c) in coords.outer_iter_mut().zip(cells.iter()) {
            row.assign(&self.lattice.cell_to_cartesian(c));
        }
        coords
    }

    /// Positions of every orbital in every stored cell, shape `(nR, norb, 3)`,
    /// cells ordered as in [`Hamiltonian::cells`].
    pub fn hopping_cell_coordinates(&self) -> Array3<f64> {
        let cells = self.unit_cell_coordinates(None);
        let pos = self.orbital_positions();
        let mut out = Array3::zeros((cells.nrows(), self.norb(), 3));
        for (mut slab, cell) in out.outer_iter_mut().zip(cells.outer_iter()) {
            for (mut row, orb) in slab.outer_iter_mut().zip(pos.outer_iter()) {
                row.assign(&(&orb + &cell));
            }
        }
        out
    }

    /// Stored cells lying inside `zone`.
    pub fn cells_within_zone(&self, zone: Zone, basis: CoordinateBasis) -> Result<Vec<CellOffset>> {
        let cells = self.cells();
        let selected = match (zone, basis) {
            (Zone::Box { half_width }, CoordinateBasis::Direct) => {
                let w = half_width.map(f64::abs);
                cells
                    .iter()
                    .filter(|c| (0..3).all(|i| (c.0[i].abs() as f64) <= w[i]))
                    .copied()
                    .collect()
            }
            (Zone::Box { half_width }, CoordinateBasis::Cartesian) => {
                // cartesian extent -> extent along the lattice vectors, c = A^{-T} x
                let inv_t = self.lattice.vectors().inv()?.reversed_axes();
                let w = inv_t.dot(&aview1(&half_width)).mapv(f64::abs);
                cells
                    .iter()
                    .filter(|c| (0..3).all(|i| (c.0[i].abs() as f64) <= w[i]))
                    .copied()
                    .collect()
            }
            (Zone::Radius { radius, .. }, CoordinateBasis::Cartesian) => {
                let coords = self.unit_cell_coordinates(None);
                cells
                    .iter()
                    .zip(coords.outer_iter())
                    .filter(|(_, x)| x.dot(x).sqrt() <= radius)
                    .map(|(c, _)| *c)
                    .collect()
            }
            (Zone::Radius { radius, norm_order }, CoordinateBasis::Direct) => cells
                .iter()
                .filter(|c| pnorm(&c.to_f64(), norm_order) <= radius)
                .copied()
                .collect(),
        };
        Ok(selected)
    }

    /// Removes every cell with a nonzero component along one of `dims`, e.g. to
    /// turn a bulk Hamiltonian into a slab. `None` means all stored cells.
    pub fn drop_dimension_from_cell_list(
        &self,
        dims: &[usize],
        cells: Option<&[CellOffset]>,
    ) -> Result<Vec<CellOffset>> {
        if let Some(&d) = dims.iter().find(|&&d| d > 2) {
            return Err(TbError::DimensionMismatch {
                context: "dropped dimension".to_string(),
                expected: 3,
                found: d,
            });
        }
        let cells = cells.unwrap_or(self.cells());
        Ok(cells
            .iter()
            .filter(|c| dims.iter().all(|&d| c.0[d] == 0))
            .copied()
            .collect())
    }

    /// Attaches the real part of `vector` to the orbital positions.
    ///
    /// Columns are `x y (z) (spread) value`.
    pub fn orbital_vector_list<S>(
        &self,
        vector: &ArrayBase<S, Ix1>,
        include_z: bool,
        include_spread: bool,
    ) -> Result<Array2<f64>>
    where
        S: Data<Elem = Complex64>,
    {
        if vector.len() != self.norb() {
            return Err(TbError::DimensionMismatch {
                context: "orbital vector".to_string(),
                expected: self.norb(),
                found: vector.len(),
            });
        }
        let ncol = 2 + include_z as usize + include_spread as usize + 1;
        let mut out = Array2::zeros((self.norb(), ncol));
        for (i, (orb, v)) in self.orbitals.iter().zip(vector.iter()).enumerate() {
            let mut col = 0;
            let ndim = if include_z { 3 } else { 2 };
            for x in orb.position.iter().take(ndim) {
                out[[i, col]] = *x;
                col += 1;
            }
            if include_spread {
                out[[i, col]] = orb.spread;
                col += 1;
            }
            out[[i, col]] = v.re;
        }
        Ok(out)
    }
}

fn pnorm(v: &[f64; 3], p: f64) -> f64 {
    if p.is_infinite() {
        v.iter().fold(0.0, |m, x| m.max(x.abs()))
    } else {
        v.iter().map(|x| x.abs().powf(p)).sum::<f64>().powf(1.0 / p)
    }
}

/// All offsets `[a, b, c]` with `0 <= a < i`, `0 <= b < j`, `0 <= c < k`, last index fastest.
pub fn integer_grid_3d(i: usize, j: usize, k: usize) -> Vec<CellOffset> {
    let mut cells = Vec::with_capacity(i * j * k);
    for a in 0..i as i64 {
        for b in 0..j as i64 {
            for c in 0..k as i64 {
                cells.push(CellOffset::new(a, b, c));
            }
        }
    }
    cells
}
