use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::geom::Geom;

pub mod molpro;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramResult {
    pub energy: f64,

    /// Cartesian gradient, `3·natoms` long, when the output carried one
    pub gradient: Option<Vec<f64>>,

    /// wall time reported by the program in seconds
    pub time: f64,
}

/// The ways reading an output file can fail. [ProgramError::NotFound] and
/// [ProgramError::BlankOutput] are usually transient, while the kinds
/// selected by [ProgramError::is_structured] mean the calculation itself
/// failed.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum ProgramError {
    #[error("output file {0} not found")]
    NotFound(String),

    #[error("output file {0} is blank")]
    BlankOutput(String),

    #[error("error in {file}: `{line}`")]
    ContainsError { file: String, line: String },

    #[error("panic requested in {file}: `{line}`")]
    Sentinel { file: String, line: String },

    #[error("energy not found in {0}")]
    EnergyNotFound(String),

    #[error("failed to parse energy in {0}")]
    EnergyParse(String),

    #[error("malformed gradient in {0}")]
    GradientParse(String),

    #[error("failed to read {0}: {1:?}")]
    ReadFile(String, std::io::ErrorKind),
}

impl ProgramError {
    /// Returns `true` if the output reports a failed calculation rather than
    /// one that has not finished yet
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::ContainsError { .. } | Self::Sentinel { .. })
    }

    /// Returns `true` if the output file was missing or unreadable
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(..) | Self::ReadFile(..))
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Procedure {
    SinglePt,
    Gradient,
}

impl Display for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Procedure::SinglePt => write!(f, "single point"),
            Procedure::Gradient => write!(f, "gradient"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub header: String,
}

impl Template {
    pub fn from(s: &str) -> Self {
        Self {
            header: s.to_string(),
        }
    }
}

impl From<String> for Template {
    fn from(header: String) -> Self {
        Self { header }
    }
}

impl FromStr for Template {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// The input-shaping half of a chemistry program. `filename` never includes
/// an extension
pub trait Encoder {
    /// the file extension for the input file
    fn extension(&self) -> &'static str;

    /// write `geom` to `filename.extension()` for `proc`
    fn write_input(
        &self,
        filename: &str,
        geom: &Geom,
        proc: Procedure,
    ) -> std::io::Result<()>;

    /// the line in a submission script that runs the input for `filename`
    fn command(&self, filename: &str) -> String;

    /// all of the files associated with `filename` for deletion when it
    /// finishes
    fn associated_files(&self, filename: &str) -> Vec<String> {
        vec![
            format!("{filename}.{}", self.extension()),
            format!("{filename}.out"),
        ]
    }
}

/// The output-parsing half of a chemistry program
pub trait Decoder {
    /// read the output file for `filename`
    fn read_output(&self, filename: &str)
    -> Result<ProgramResult, ProgramError>;
}

/// Anything that can both write inputs and read outputs
pub trait Program: Encoder + Decoder {}

impl<T: Encoder + Decoder> Program for T {}

/// parses the `nth` field of `line` into a float and returns
/// [ProgramError::EnergyParse] containing `outname` if it fails
#[inline]
fn parse_energy(
    line: &str,
    nth: usize,
    outname: &str,
) -> Result<Option<f64>, ProgramError> {
    line.split_whitespace()
        .nth(nth)
        .map(str::parse::<f64>)
        .transpose()
        .map_err(|_| ProgramError::EnergyParse(outname.to_owned()))
}
