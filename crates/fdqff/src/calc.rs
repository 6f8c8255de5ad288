use jobq::geom::Geom;

use crate::{cache::Slot, ledger::CellRef};

/// where one weighted single-point value lands in the ledger
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub cell: CellRef,
    pub coeff: f64,
    /// position of the term in its cell's stencil
    pub slot: usize,
    /// gradient component feeding this cell, `None` for energies
    pub component: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Energy(f64),
    Gradient(Vec<f64>),
}

/// A single point and everything waiting on it. Only records with a geometry
/// are written and submitted. The rest already have a `result` or wait on a
/// cache `source`.
#[derive(Clone, Debug, Default)]
pub struct Calc {
    /// path of the input file without its extension
    pub name: String,
    pub geom: Option<Geom>,
    pub chunk: Option<usize>,
    pub job_id: String,
    pub pbs_file: String,
    pub targets: Vec<Target>,
    pub scale: f64,
    pub result: Option<Value>,
    /// cache slot this record reads its energy from
    pub source: Option<Slot>,
    /// cache slot this record's energy is published to
    pub publish: Option<Slot>,
    pub redone: bool,
    /// polls with no output while the job was no longer queued
    pub retries: usize,
}

impl Calc {
    pub fn needs_run(&self) -> bool {
        self.geom.is_some()
    }
}
