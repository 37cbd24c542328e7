//! k-point paths through the Brillouin zone.
use ndarray::{Array1, Array2, Axis};

use crate::error::{Result, TbError};

/// Straight path through `corners`.
///
/// Each segment contributes its points without its endpoint, and the last corner
/// closes the path, so the result has `sum(points_per_segment) + 1` rows.
///
/// # Arguments
///
/// * `corners` - corner points, all of the same dimension
/// * `points_per_segment` - one count per segment, or a single count used for
///   every segment
///
/// # Examples
/// ```
/// use ndarray::array;
/// use wanntb::point_path;
/// let path = point_path(&[array![0.0, 0.0], array![1.0, 1.0], array![2.0, 2.0]], &[2]).unwrap();
/// assert_eq!(path, array![[0.0, 0.0], [0.5, 0.5], [1.0, 1.0], [1.5, 1.5], [2.0, 2.0]]);
/// ```
pub fn point_path(corners: &[Array1<f64>], points_per_segment: &[usize]) -> Result<Array2<f64>> {
    let nseg = corners.len().saturating_sub(1);
    let counts: Vec<usize> = match points_per_segment {
        [n] => vec![*n; nseg],
        list if list.len() == nseg => list.to_vec(),
        list => {
            return Err(TbError::DimensionMismatch {
                context: "points per path segment".to_string(),
                expected: nseg,
                found: list.len(),
            });
        }
    };
    let Some(last) = corners.last() else {
        return Err(TbError::DimensionMismatch {
            context: "path corners".to_string(),
            expected: 1,
            found: 0,
        });
    };
    let dim = last.len();
    if let Some(bad) = corners.iter().find(|c| c.len() != dim) {
        return Err(TbError::DimensionMismatch {
            context: "path corner coordinates".to_string(),
            expected: dim,
            found: bad.len(),
        });
    }
    let npoints = counts.iter().sum::<usize>() + 1;
    let mut path = Array2::<f64>::zeros((npoints, dim));
    let mut row = 0;
    for (i, &n) in counts.iter().enumerate() {
        let (start, end) = (&corners[i], &corners[i + 1]);
        for step in 0..n {
            let t = step as f64 / n as f64;
            path.row_mut(row).assign(&(start + &((end - start) * t)));
            row += 1;
        }
    }
    path.row_mut(row).assign(last);
    Ok(path)
}

/// A named high-symmetry path in direct reciprocal coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardPath {
    /// High-symmetry points, one per row.
    pub points: Array2<f64>,
    pub names: Vec<&'static str>,
    /// `points` joined by [`point_path`].
    pub path: Array2<f64>,
}

/// Standard path of a Bravais lattice: `hexagonal`, `fcc`, `1D` or
/// `1D-symmetric`, with `points_per_segment` points on every segment.
///
/// A count of zero or one gives a path through the corners only.
pub fn standard_path(name: &str, points_per_segment: usize) -> Result<StandardPath> {
    let corners: &[(&'static str, [f64; 3])] = match name {
        "hexagonal" => &[
            ("Γ", [0.0, 0.0, 0.0]),
            ("K", [1.0 / 3.0, -1.0 / 3.0, 0.0]),
            ("M", [0.5, 0.0, 0.0]),
            ("Γ", [0.0, 0.0, 0.0]),
        ],
        "fcc" => &[
            ("Γ", [0.0, 0.0, 0.0]),
            ("X", [0.5, 0.5, 0.0]),
            ("W", [0.75, 0.5, 0.25]),
            ("L", [0.5, 0.5, 0.5]),
            ("Γ", [0.0, 0.0, 0.0]),
            ("K", [0.75, 0.375, 0.375]),
        ],
        "1D" => &[("Γ", [0.0, 0.0, 0.0]), ("M", [0.5, 0.0, 0.0])],
        "1D-symmetric" => &[
            ("M", [-0.5, 0.0, 0.0]),
            ("Γ", [0.0, 0.0, 0.0]),
            ("M", [0.5, 0.0, 0.0]),
        ],
        _ => return Err(TbError::UnknownKPath(name.to_string())),
    };
    let rows: Vec<Array1<f64>> = corners.iter().map(|(_, k)| Array1::from_vec(k.to_vec())).collect();
    let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
    let points = ndarray::stack(Axis(0), &views).map_err(|_| TbError::DimensionMismatch {
        context: "standard path corners".to_string(),
        expected: 3,
        found: 0,
    })?;
    let path = point_path(&rows, &[points_per_segment.max(1)])?;
    Ok(StandardPath {
        points,
        names: corners.iter().map(|(n, _)| *n).collect(),
        path,
    })
}
