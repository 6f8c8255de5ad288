//! Writers for the finished arrays.

use std::{fmt::Write as _, fs::write, path::Path};

use nalgebra::DMatrix;

use crate::{Error, Run, ledger::Array};


/// Cartesian force constants in hartree/bohrⁿ.
#[derive(Clone, Debug, PartialEq)]
pub struct ForceConstants {
    pub fc2: DMatrix<f64>,
    pub fc3: Vec<f64>,
    pub fc4: Vec<f64>,
}

impl ForceConstants {
    pub fn new(run: &Run) -> Self {
        let n = run.ncoords();
        let fc2 = run.values(Array::Fc2);
        Self {
            fc2: DMatrix::from_row_slice(n, n, &fc2),
            fc3: run.values(Array::Fc3),
            fc4: run.values(Array::Fc4),
        }
    }

    /// Write `fort.15`, `fort.30`, and `fort.40` to `dir`. Higher orders that
    /// were not computed are skipped.
    pub fn write(
        &self,
        dir: impl AsRef<Path>,
        natoms: usize,
    ) -> Result<(), Error> {
        let dir = dir.as_ref();
        let fc2: Vec<f64> = self.fc2.transpose().as_slice().to_vec();
        let files = [
            ("fort.15", fc2.as_slice(), 6 * natoms),
            ("fort.30", self.fc3.as_slice(), self.fc3.len()),
            ("fort.40", self.fc4.as_slice(), self.fc4.len()),
        ];
        for (file, fcs, m) in files {
            if fcs.is_empty() {
                continue;
            }
            let path = dir.join(file);
            write(&path, format_fcs(natoms, m, fcs)).map_err(|err| {
                Error::Output {
                    file: path.display().to_string(),
                    err,
                }
            })?;
            log::info!("wrote {}", path.display());
        }
        Ok(())
    }
}

/// the header line followed by `fcs` three to a line
pub fn format_fcs(natoms: usize, m: usize, fcs: &[f64]) -> String {
    let mut ret = format!("{natoms:5}{m:5}\n");
    for chunk in fcs.chunks(3) {
        for c in chunk {
            let _ = write!(ret, "{c:20.10}");
        }
        ret.push('\n');
    }
    ret
}

/// Write the point energies to `energies.dat` in `dir`, one per line and
/// relative to the lowest.
pub fn write_energies(
    dir: impl AsRef<Path>,
    energies: &[f64],
) -> Result<(), Error> {
    let path = dir.as_ref().join("energies.dat");
    write(&path, format_energies(energies)).map_err(|err| Error::Output {
        file: path.display().to_string(),
        err,
    })?;
    log::info!("wrote {}", path.display());
    Ok(())
}

pub fn format_energies(energies: &[f64]) -> String {
    let min = energies.iter().copied().fold(f64::INFINITY, f64::min);
    let mut ret = String::new();
    for e in energies {
        let _ = writeln!(ret, "{:20.12}", e - min);
    }
    ret
}
