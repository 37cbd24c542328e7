#![allow(non_upper_case_globals)]
pub const Element_charge: f64 = 1.602176487e-19;
pub const hbar: f64 = 1.054571628e-34;
/// $e/\hbar$ expressed in $\mathrm{\AA}^{-2}\,\mathrm{T}^{-1}$, the prefactor of the Peierls phase.
pub const TESLA_CONVERSION: f64 = Element_charge / hbar * 1e-20;
