//! Accumulators for the derivative arrays. Each cell knows how many stencil
//! terms it is waiting for and finalizes once the last one arrives, summing
//! the terms in stencil order so the result is the same whatever order the
//! single points finish in.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::index::{nfc2, nfc3, nfc4};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Array {
    Fc2,
    Fc3,
    Fc4,
    Energies,
}

impl Display for Array {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Array::Fc2 => "fc2",
            Array::Fc3 => "fc3",
            Array::Fc4 => "fc4",
            Array::Energies => "energies",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub array: Array,
    pub offset: usize,
}

impl CellRef {
    pub const fn new(array: Array, offset: usize) -> Self {
        Self { array, offset }
    }
}

impl Display for CellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.array, self.offset)
    }
}

/// One accumulating cell. Only the value, the remaining count, and whether it
/// came from a checkpoint are persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CountFloat {
    #[serde(rename = "Val")]
    pub val: f64,

    #[serde(rename = "Count")]
    pub count: usize,

    #[serde(rename = "Loaded")]
    pub loaded: bool,

    #[serde(skip)]
    scale: f64,

    #[serde(skip)]
    terms: Vec<Option<f64>>,

    #[serde(skip)]
    touched: bool,
}

impl CountFloat {
    /// an already-final cell
    pub fn done(val: f64) -> Self {
        Self {
            val,
            loaded: true,
            ..Self::default()
        }
    }

    pub fn is_done(&self) -> bool {
        self.loaded || (self.touched && self.count == 0)
    }

    pub fn is_open(&self) -> bool {
        self.touched && self.count > 0
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("{0} is out of bounds")]
    OutOfBounds(CellRef),

    #[error("{0} initialized twice")]
    Reinit(CellRef),

    #[error("{0} posted before it was initialized")]
    Untouched(CellRef),

    #[error("{0} posted after it was finalized")]
    Finalized(CellRef),

    #[error("{cell} received term {slot} twice")]
    Duplicate { cell: CellRef, slot: usize },

    #[error("{cell} has no term {slot}")]
    BadSlot { cell: CellRef, slot: usize },

    #[error("expected {want} gradient components, got {got}")]
    Dimension { want: usize, got: usize },

    #[error("{remaining} cells unfinished with no single points outstanding")]
    Unfinished { remaining: usize },
}

/// whether [Ledger::touch] opened the cell or found it already final
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Touch {
    Open,
    Loaded,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ledger {
    pub(crate) fc2: Vec<CountFloat>,
    pub(crate) fc3: Vec<CountFloat>,
    pub(crate) fc4: Vec<CountFloat>,
    pub(crate) energies: Vec<CountFloat>,
}

impl Ledger {
    /// force-constant arrays for `n` coordinates up to order `deriv`
    pub fn force_constants(n: usize, deriv: usize) -> Self {
        let sized = |len| vec![CountFloat::default(); len];
        Self {
            fc2: sized(nfc2(n)),
            fc3: sized(if deriv >= 3 { nfc3(n) } else { 0 }),
            fc4: sized(if deriv >= 4 { nfc4(n) } else { 0 }),
            energies: Vec::new(),
        }
    }

    /// a flat list of `n` point energies
    pub fn points(n: usize) -> Self {
        Self {
            energies: vec![CountFloat::default(); n],
            ..Self::default()
        }
    }

    pub fn array(&self, array: Array) -> &[CountFloat] {
        match array {
            Array::Fc2 => &self.fc2,
            Array::Fc3 => &self.fc3,
            Array::Fc4 => &self.fc4,
            Array::Energies => &self.energies,
        }
    }

    pub(crate) fn array_mut(&mut self, array: Array) -> &mut Vec<CountFloat> {
        match array {
            Array::Fc2 => &mut self.fc2,
            Array::Fc3 => &mut self.fc3,
            Array::Fc4 => &mut self.fc4,
            Array::Energies => &mut self.energies,
        }
    }

    fn cell_mut(
        &mut self,
        cell: CellRef,
    ) -> Result<&mut CountFloat, LedgerError> {
        self.array_mut(cell.array)
            .get_mut(cell.offset)
            .ok_or(LedgerError::OutOfBounds(cell))
    }

    pub fn get(&self, cell: CellRef) -> Option<&CountFloat> {
        self.array(cell.array).get(cell.offset)
    }

    /// Open `cell` for `terms` contributions finalized with `scale`. Cells
    /// restored from a checkpoint are left alone.
    pub fn touch(
        &mut self,
        cell: CellRef,
        terms: usize,
        scale: f64,
    ) -> Result<Touch, LedgerError> {
        let c = self.cell_mut(cell)?;
        if c.loaded {
            return Ok(Touch::Loaded);
        }
        if c.touched {
            return Err(LedgerError::Reinit(cell));
        }
        c.touched = true;
        c.count = terms;
        c.scale = scale;
        c.terms = vec![None; terms];
        Ok(Touch::Open)
    }

    /// Record the contribution for stencil term `slot` of `cell`, returning
    /// whether this finalized it.
    pub fn post(
        &mut self,
        cell: CellRef,
        slot: usize,
        value: f64,
    ) -> Result<bool, LedgerError> {
        let c = self.cell_mut(cell)?;
        if !c.touched && !c.loaded {
            return Err(LedgerError::Untouched(cell));
        }
        if c.is_done() {
            return Err(LedgerError::Finalized(cell));
        }
        let term = c
            .terms
            .get_mut(slot)
            .ok_or(LedgerError::BadSlot { cell, slot })?;
        if term.is_some() {
            return Err(LedgerError::Duplicate { cell, slot });
        }
        *term = Some(value);
        c.count -= 1;
        if c.count == 0 {
            let mut sum = 0.0;
            for t in c.terms.drain(..) {
                sum += t.unwrap_or_default();
            }
            c.val = sum * c.scale;
            return Ok(true);
        }
        Ok(false)
    }

    fn cells(&self) -> impl Iterator<Item = &CountFloat> {
        self.fc2
            .iter()
            .chain(&self.fc3)
            .chain(&self.fc4)
            .chain(&self.energies)
    }

    pub fn all_done(&self) -> bool {
        self.cells().all(CountFloat::is_done)
    }

    pub fn remaining(&self) -> usize {
        self.cells().filter(|c| !c.is_done()).count()
    }

    pub fn values(&self, array: Array) -> Vec<f64> {
        self.array(array).iter().map(|c| c.val).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: CellRef = CellRef::new(Array::Fc2, 1);

    #[test]
    fn finalize_in_any_order() {
        let terms = [0.1, -0.7, 1e-9, 0.6];
        let mut want = None;
        for order in [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]] {
            let mut l = Ledger::force_constants(2, 2);
            assert_eq!(l.touch(C, 4, 2.0), Ok(Touch::Open));
            for (n, &slot) in order.iter().enumerate() {
                assert_eq!(l.post(C, slot, terms[slot]), Ok(n == 3));
            }
            let got = l.get(C).unwrap().val;
            assert_eq!(*want.get_or_insert(got), got);
        }
        assert!(!Ledger::force_constants(2, 2).all_done());
    }

    #[test]
    fn bookkeeping_errors() {
        let mut l = Ledger::force_constants(2, 2);
        assert_eq!(l.post(C, 0, 1.0), Err(LedgerError::Untouched(C)));
        l.touch(C, 2, 1.0).unwrap();
        assert_eq!(l.touch(C, 2, 1.0), Err(LedgerError::Reinit(C)));
        l.post(C, 0, 1.0).unwrap();
        assert_eq!(
            l.post(C, 0, 1.0),
            Err(LedgerError::Duplicate { cell: C, slot: 0 })
        );
        assert_eq!(
            l.post(C, 5, 1.0),
            Err(LedgerError::BadSlot { cell: C, slot: 5 })
        );
        l.post(C, 1, 1.0).unwrap();
        assert_eq!(l.post(C, 1, 1.0), Err(LedgerError::Finalized(C)));
        let far = CellRef::new(Array::Fc3, 0);
        assert_eq!(l.touch(far, 1, 1.0), Err(LedgerError::OutOfBounds(far)));
    }

    #[test]
    fn loaded_cells_stay_put() {
        let mut l = Ledger::points(3);
        let cell = CellRef::new(Array::Energies, 2);
        l.energies[2] = CountFloat::done(-1.5);
        assert_eq!(l.touch(cell, 1, 1.0), Ok(Touch::Loaded));
        assert_eq!(l.post(cell, 0, 0.0), Err(LedgerError::Finalized(cell)));
        assert_eq!(l.remaining(), 2);
        assert_eq!(l.values(Array::Energies), vec![0.0, 0.0, -1.5]);
    }

    #[test]
    fn sizes() {
        let l = Ledger::force_constants(9, 4);
        assert_eq!(l.array(Array::Fc2).len(), 81);
        assert_eq!(l.array(Array::Fc3).len(), 165);
        assert_eq!(l.array(Array::Fc4).len(), 495);
        let l = Ledger::force_constants(9, 3);
        assert!(l.array(Array::Fc4).is_empty());
    }

    #[test]
    fn serialized_names() {
        let got = serde_json::to_string(&CountFloat::done(1.25)).unwrap();
        assert_eq!(got, r#"{"Val":1.25,"Count":0,"Loaded":true}"#);
    }
}
