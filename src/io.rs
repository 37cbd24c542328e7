//! Plain-text input and output: hopping lists (`*.wetb`) and band tables.
//!
//! A hopping list has three sections separated by blank lines. Lines starting
//! with `#` are comments, anything after the data on a line is ignored.
//!
//! 1. lattice vectors, one per row
//! 2. per orbital: spread, then the three cartesian coordinates of its centre
//! 3. per stored element: cell offset (3 integers), main orbital, other orbital,
//!    real and imaginary part
use log::debug;
use ndarray::{Array2, Axis};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::distribute::BandStructure;
use crate::error::{Result, TbError};
use crate::hopping::CellOffset;
use crate::lattice::LatticeBasis;
use crate::{Hamiltonian, HoppingRecord, Orbital};

/// Writes `ham` as a hopping list.
///
/// # Arguments
///
/// * `cells` - offsets to write, all stored offsets if `None`
/// * `orbitals` - orbitals to keep, renumbered from zero in the given order.
///   Only meaningful if the dropped orbitals do not couple to the kept ones.
///
/// Cells are written in lexicographic order, elements of a cell in row-major
/// order, floats in their shortest round-trip form.
pub fn write_hopping_list<W: Write>(
    ham: &Hamiltonian,
    out: &mut W,
    cells: Option<&[CellOffset]>,
    orbitals: Option<&[usize]>,
) -> Result<()> {
    let table = ham.hoppings();
    let mut positions = match cells {
        Some(cells) => table.positions_of(cells)?,
        None => (0..table.len()).collect(),
    };
    positions.sort_by_key(|&i| table.cells()[i]);
    let orbitals: Vec<usize> = match orbitals {
        Some(o) => o.to_vec(),
        None => (0..ham.norb()).collect(),
    };
    if let Some(&bad) = orbitals.iter().find(|&&i| i >= ham.norb()) {
        return Err(TbError::OrbitalOutOfRange {
            context: "hopping list export",
            index: bad,
            norb: ham.norb(),
        });
    }

    writeln!(out, "#WETB File")?;
    writeln!(out)?;
    writeln!(out, "#Lattice vectors:")?;
    for row in ham.lattice().vectors().outer_iter() {
        writeln!(out, "{:e} {:e} {:e}", row[0], row[1], row[2])?;
    }
    writeln!(out)?;
    writeln!(out, "#Spreads and positions of the orbitals:")?;
    for &i in orbitals.iter() {
        let orb = &ham.orbitals()[i];
        let [x, y, z] = orb.position;
        writeln!(out, "{:e} {:e} {:e} {:e}", orb.spread, x, y, z)?;
    }
    writeln!(out)?;
    writeln!(out, "#Unit cell number, main orbital, other orbital, hopping element:")?;
    let mut nelement = 0usize;
    for &ir in positions.iter() {
        let [a, b, c] = table.cells()[ir].0;
        let block = table.blocks()[ir].select(&orbitals)?;
        for (i, j, v) in block.iter() {
            writeln!(out, "{:5} {:5} {:5} {:5} {:5} {:e} {:e}", a, b, c, i, j, v.re, v.im)?;
            nelement += 1;
        }
    }
    debug!(
        "wrote {} hopping elements in {} cells ({} orbitals)",
        nelement,
        positions.len(),
        orbitals.len()
    );
    Ok(())
}

fn parse_error(source: &str, line: usize, message: impl Into<String>) -> TbError {
    TbError::FileParse {
        file: source.to_string(),
        line,
        message: message.into(),
    }
}

fn parse_fields<T: FromStr>(
    fields: &[&str],
    count: usize,
    source: &str,
    line: usize,
) -> Result<Vec<T>> {
    if fields.len() < count {
        return Err(parse_error(
            source,
            line,
            format!("expected {} values, found {}", count, fields.len()),
        ));
    }
    fields[..count]
        .iter()
        .map(|f| {
            f.parse::<T>()
                .map_err(|_| parse_error(source, line, format!("cannot parse '{}'", f)))
        })
        .collect()
}

/// Reads a hopping list written by [`write_hopping_list`] (or by hand).
///
/// `source` names the input in error messages. Records of a cell that appears
/// in several runs are merged, a repeated element keeps the last value.
pub fn read_hopping_list<R: BufRead>(
    reader: R,
    source: &str,
    fermi_energy: Option<f64>,
) -> Result<Hamiltonian> {
    let mut section = 0usize;
    let mut section_has_data = false;
    let mut lattice_rows: Vec<[f64; 3]> = Vec::with_capacity(3);
    let mut orbitals: Vec<Orbital> = Vec::new();
    let mut records: Vec<HoppingRecord> = Vec::new();
    let mut nline = 0usize;

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        nline = n + 1;
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        if trimmed.is_empty() {
            if section_has_data {
                section += 1;
                section_has_data = false;
            }
            continue;
        }
        section_has_data = true;
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        match section {
            0 => {
                if lattice_rows.len() == 3 {
                    return Err(parse_error(source, nline, "more than three lattice vectors"));
                }
                let v = parse_fields::<f64>(&fields, 3, source, nline)?;
                lattice_rows.push([v[0], v[1], v[2]]);
            }
            1 => {
                // an empty orbital section would otherwise read hops as orbitals
                if fields.iter().take_while(|f| f.parse::<f64>().is_ok()).count() >= 7 {
                    return Err(parse_error(
                        source,
                        nline,
                        "hopping record where an orbital was expected",
                    ));
                }
                let v = parse_fields::<f64>(&fields, 4, source, nline)?;
                orbitals.push(Orbital::new([v[1], v[2], v[3]], v[0]));
            }
            2 => {
                let cell = parse_fields::<i64>(&fields, 3, source, nline)?;
                let orb = parse_fields::<usize>(&fields[3..], 2, source, nline)?;
                let value = parse_fields::<f64>(&fields[5.min(fields.len())..], 2, source, nline)?;
                records.push(HoppingRecord::new(
                    CellOffset::new(cell[0], cell[1], cell[2]),
                    orb[0],
                    orb[1],
                    num_complex::Complex64::new(value[0], value[1]),
                ));
            }
            _ => return Err(parse_error(source, nline, "data after the hopping section")),
        }
    }
    if lattice_rows.len() != 3 {
        return Err(parse_error(
            source,
            nline,
            format!("expected 3 lattice vectors, found {}", lattice_rows.len()),
        ));
    }
    let lattice = LatticeBasis::from_rows([lattice_rows[0], lattice_rows[1], lattice_rows[2]]);
    debug!(
        "read {} orbitals and {} hopping elements from {}",
        orbitals.len(),
        records.len(),
        source
    );
    Hamiltonian::from_hopping_records(records, lattice, orbitals, fermi_energy)
}

impl Hamiltonian {
    /// [`write_hopping_list`] into the file `path`.
    pub fn write_hopping_file<P: AsRef<Path>>(
        &self,
        path: P,
        cells: Option<&[CellOffset]>,
        orbitals: Option<&[usize]>,
    ) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        write_hopping_list(self, &mut out, cells, orbitals)?;
        out.flush()?;
        Ok(())
    }

    /// [`read_hopping_list`] from the file `path`.
    pub fn from_hopping_file<P: AsRef<Path>>(path: P, fermi_energy: Option<f64>) -> Result<Self> {
        let source = path.as_ref().display().to_string();
        let reader = BufReader::new(File::open(path)?);
        read_hopping_list(reader, &source, fermi_energy)
    }
}

/// 把数据写成对齐的文本表, 每行一个 k 点.
pub fn write_txt<P: AsRef<Path>>(data: &Array2<f64>, output: P) -> Result<()> {
    let mut file = BufWriter::new(File::create(output)?);
    let s = data.len_of(Axis(1));
    let mut s0 = String::new();
    for row in data.outer_iter() {
        for j in 0..s {
            if row[j] >= 0.0 {
                s0.push_str("     ");
            } else {
                s0.push_str("    ");
            }
            s0.push_str(&format!("{:.6}", row[j]));
        }
        s0.push('\n');
    }
    write!(file, "{}", s0)?;
    file.flush()?;
    Ok(())
}

impl BandStructure {
    /// Writes one row of eigenvalues per k-point.
    pub fn write_txt<P: AsRef<Path>>(&self, output: P) -> Result<()> {
        write_txt(&self.eigenvalues, output)
    }
}
