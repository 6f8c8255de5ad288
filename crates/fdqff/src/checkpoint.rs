//! Checkpoints are plain JSON arrays of [CountFloat]s, one file per array.
//! Finished cells are written with `Loaded` set and everything else as a
//! zeroed placeholder, so a checkpoint only ever records final values.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use crate::{
    cache::BigHash,
    index::{IndexError, e2d_index},
    ledger::{Array, CountFloat, Ledger},
};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("failed to write {file}: {err}")]
    Write { file: String, err: std::io::Error },

    #[error("failed to read {file}: {err}")]
    Read { file: String, err: std::io::Error },

    #[error("failed to parse {file}: {err}")]
    Parse { file: String, err: serde_json::Error },

    #[error("{file} holds {got} cells, expected {want}")]
    Length {
        file: String,
        want: usize,
        got: usize,
    },

    #[error(transparent)]
    Index(#[from] IndexError),
}

const FILES: [(&str, Array); 3] = [
    ("fc2.json", Array::Fc2),
    ("fc3.json", Array::Fc3),
    ("fc4.json", Array::Fc4),
];

fn snapshot(cells: &[CountFloat]) -> Vec<CountFloat> {
    cells
        .iter()
        .map(|c| {
            if c.is_done() {
                CountFloat::done(c.val)
            } else {
                CountFloat::default()
            }
        })
        .collect()
}

/// write `cells` next to `path` and move them into place
fn write(path: &Path, cells: &[CountFloat]) -> Result<(), CheckpointError> {
    let file = path.display().to_string();
    let tmp = path.with_extension("json.tmp");
    let err = |err| CheckpointError::Write {
        file: file.clone(),
        err,
    };
    let f = File::create(&tmp).map_err(err)?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer(&mut w, cells).map_err(|e| err(e.into()))?;
    w.flush().map_err(err)?;
    std::fs::rename(&tmp, path).map_err(err)
}

fn read(path: &Path, want: usize) -> Result<Vec<CountFloat>, CheckpointError> {
    let file = path.display().to_string();
    let f = File::open(path).map_err(|err| CheckpointError::Read {
        file: file.clone(),
        err,
    })?;
    let cells: Vec<CountFloat> = serde_json::from_reader(BufReader::new(f))
        .map_err(|err| CheckpointError::Parse {
            file: file.clone(),
            err,
        })?;
    if cells.len() != want {
        return Err(CheckpointError::Length {
            file,
            want,
            got: cells.len(),
        });
    }
    Ok(cells
        .into_iter()
        .map(|c| {
            if c.loaded {
                CountFloat::done(c.val)
            } else {
                CountFloat::default()
            }
        })
        .collect())
}

/// Save the force-constant arrays of `ledger` and the paired energies in
/// `cache` to `dir`. `n` is the number of coordinates.
pub fn save(
    dir: &Path,
    ledger: &Ledger,
    cache: &BigHash,
    n: usize,
) -> Result<(), CheckpointError> {
    for (name, array) in FILES {
        write(&dir.join(name), &snapshot(ledger.array(array)))?;
    }
    let mut e2d = vec![CountFloat::default(); 4 * n * n];
    for ((a, b), v) in cache.pairs() {
        for off in e2d_index(n, a, b)? {
            e2d[off] = CountFloat::done(v);
        }
    }
    write(&dir.join("e2d.json"), &e2d)
}

/// Load the force-constant arrays saved by [save] into `ledger`, returning
/// the paired energies for reseeding the cache.
pub fn load(
    dir: &Path,
    ledger: &mut Ledger,
) -> Result<Vec<CountFloat>, CheckpointError> {
    for (name, array) in FILES {
        let cells = read(&dir.join(name), ledger.array(array).len())?;
        *ledger.array_mut(array) = cells;
    }
    let n2 = ledger.array(Array::Fc2).len();
    read(&dir.join("e2d.json"), 4 * n2)
}

/// Save the reference energy to `dir/e0.json`.
pub fn save_e0(dir: &Path, e0: f64) -> Result<(), CheckpointError> {
    write(&dir.join("e0.json"), &[CountFloat::done(e0)])
}

/// The reference energy saved by [save_e0], if there is one.
pub fn load_e0(dir: &Path) -> Result<Option<f64>, CheckpointError> {
    let path = dir.join("e0.json");
    if !path.exists() {
        return Ok(None);
    }
    Ok(read(&path, 1)?.first().filter(|c| c.is_done()).map(|c| c.val))
}

pub fn save_points(dir: &Path, ledger: &Ledger) -> Result<(), CheckpointError> {
    write(&dir.join("chk.json"), &snapshot(ledger.array(Array::Energies)))
}

pub fn load_points(
    dir: &Path,
    ledger: &mut Ledger,
) -> Result<(), CheckpointError> {
    let want = ledger.array(Array::Energies).len();
    *ledger.array_mut(Array::Energies) = read(&dir.join("chk.json"), want)?;
    Ok(())
}
