//! Pairing of lattice offsets so that Bloch sums stay Hermitian.
//!
//! $H(\bm k)=\sum_{\bm R}e^{i\bm k\cdot\bm R}H_{\bm R}$ is Hermitian only if every
//! term $H_{\bm R}$ comes with its partner $H_{-\bm R}=H_{\bm R}^\dagger$. Dropping
//! one of them (for instance when restricting the hopping range) has to drop the
//! other as well.
use log::warn;

use crate::Hamiltonian;
use crate::hopping::CellOffset;

/// Splits `cells` into offsets whose partner $-\bm R$ is also present and offsets
/// without partner.
///
/// # Returns
///
/// `(kept, removed)`. The origin is its own partner and always kept.
pub fn hermitian_filter(cells: &[CellOffset]) -> (Vec<CellOffset>, Vec<CellOffset>) {
    let mut stack: Vec<CellOffset> = cells.to_vec();
    let mut kept = Vec::with_capacity(stack.len());
    let mut removed = Vec::new();
    while let Some(cell) = stack.pop() {
        if cell.is_origin() {
            kept.push(cell);
            continue;
        }
        if let Some(p) = stack.iter().position(|c| *c == -cell) {
            let partner = stack.remove(p);
            kept.push(cell);
            kept.push(partner);
        } else {
            removed.push(cell);
        }
    }
    if !removed.is_empty() {
        warn!("dropping {} hopping cells without inversion partner", removed.len());
    }
    (kept, removed)
}

/// How far a Hamiltonian is from satisfying $H_{-\bm R}=H_{\bm R}^\dagger$.
#[derive(Debug, Clone, PartialEq)]
pub struct HermiticityDefect {
    /// Largest $|H_{-\bm R}-H_{\bm R}^\dagger|$ over paired offsets, the origin included.
    pub max_deviation: f64,
    /// Stored offsets whose partner is missing.
    pub unpaired: Vec<CellOffset>,
}

impl HermiticityDefect {
    pub fn is_hermitian(&self, tol: f64) -> bool {
        self.unpaired.is_empty() && self.max_deviation <= tol
    }
}

impl Hamiltonian {
    /// Compares every stored block with the adjoint of its partner.
    pub fn hermiticity_defect(&self) -> HermiticityDefect {
        let table = self.hoppings();
        let mut max_deviation: f64 = 0.0;
        let mut unpaired = Vec::new();
        for (cell, block) in table.iter() {
            match table.get(&-*cell) {
                Some(partner) => {
                    max_deviation = max_deviation.max(partner.max_abs_diff(&block.adjoint()));
                }
                None => unpaired.push(*cell),
            }
        }
        HermiticityDefect {
            max_deviation,
            unpaired,
        }
    }

    /// Stored offsets passed through [`hermitian_filter`].
    pub fn hermitian_cells(&self) -> Vec<CellOffset> {
        hermitian_filter(self.cells()).0
    }
}
