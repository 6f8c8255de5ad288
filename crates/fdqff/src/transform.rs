//! Generation of displaced geometries by an external coordinate program, for
//! force fields in symmetry-internal coordinates.

use std::{fs::read_to_string, path::Path, process::Command};

use jobq::geom::{Geom, GeomError};


#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("failed to read {file}: {err}")]
    Read { file: String, err: std::io::Error },

    #[error("`{cmd}` failed: {msg}")]
    Command { cmd: String, msg: String },

    #[error("bad coordinate line {line} in {file}: `{text}`")]
    Format {
        file: String,
        line: usize,
        text: String,
    },

    #[error(transparent)]
    Geom(#[from] GeomError),
}

pub trait Transform {
    /// build the list of geometries to compute in `dir`, labeling the atoms
    /// of each with `names`
    fn points(
        &self,
        dir: &Path,
        names: &[String],
    ) -> Result<Vec<Geom>, TransformError>;
}

/// Runs an intder-style program on `intder.in` and reads the points it
/// writes to `file07`.
pub struct Intder {
    pub cmd: String,
}

impl Intder {
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_owned(),
        }
    }
}

impl Transform for Intder {
    fn points(
        &self,
        dir: &Path,
        names: &[String],
    ) -> Result<Vec<Geom>, TransformError> {
        let cmd = format!("{} < intder.in > intder.out", self.cmd);
        log::info!("running `{cmd}` in {}", dir.display());
        let out = Command::new("bash")
            .arg("-c")
            .arg(&cmd)
            .current_dir(dir)
            .output()
            .map_err(|e| TransformError::Command {
                cmd: cmd.clone(),
                msg: e.to_string(),
            })?;
        if !out.status.success() {
            return Err(TransformError::Command {
                cmd,
                msg: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }
        let ret = parse_file07(dir.join("file07"), names)?;
        log::info!("{} points in file07", ret.len());
        Ok(ret)
    }
}

/// Read the geometries in `path`. Lines containing `#` start a new
/// geometry, and every other line holds the x, y, and z of one atom.
pub fn parse_file07(
    path: impl AsRef<Path>,
    names: &[String],
) -> Result<Vec<Geom>, TransformError> {
    let path = path.as_ref();
    let file = path.display().to_string();
    let contents = read_to_string(path).map_err(|err| TransformError::Read {
        file: file.clone(),
        err,
    })?;
    let mut ret = Vec::new();
    let mut coords = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        if line.contains('#') {
            if !coords.is_empty() {
                ret.push(Geom::from_parts(names, &coords)?);
                coords.clear();
            }
            continue;
        }
        let fields: Result<Vec<f64>, _> =
            line.split_whitespace().map(str::parse).collect();
        match fields {
            Ok(v) if v.len() == 3 => coords.extend(v),
            Ok(v) if v.is_empty() => {}
            _ => {
                return Err(TransformError::Format {
                    file,
                    line: i + 1,
                    text: line.to_owned(),
                });
            }
        }
    }
    if !coords.is_empty() {
        ret.push(Geom::from_parts(names, &coords)?);
    }
    Ok(ret)
}
