//! Deduplication of single points. Geometries are reduced to a [KeyChain] of
//! rounded integer coordinates, and each distinct chain owns one slot in the
//! cache that is either still running or holds its energy.

use std::fmt::Display;

use jobq::geom::Geom;
use rustc_hash::FxHashMap;

/// coordinates are rounded to this many units per Å before hashing
const PRECISION: f64 = 1e8;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    pub(crate) label: String,
    pub(crate) x: i64,
    pub(crate) y: i64,
    pub(crate) z: i64,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self { label, x, y, z } = self;
        write!(f, "{label} {x} {y} {z}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyChain(Vec<Key>);

impl KeyChain {
    pub fn new(geom: &Geom) -> Self {
        let round = |v: f64| (v * PRECISION).round() as i64;
        Self(
            geom.atoms
                .iter()
                .map(|a| Key {
                    label: a.label.clone(),
                    x: round(a.x),
                    y: round(a.y),
                    z: round(a.z),
                })
                .collect(),
        )
    }
}

impl Display for KeyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for key in &self.0 {
            writeln!(f, "{key}")?
        }
        Ok(())
    }
}

/// Maps a geometry to the representative it is fingerprinted as. Orientation
/// or symmetry canonicalization plugs in here.
pub trait Normalize: Send + Sync {
    fn normalize(&self, geom: Geom) -> Geom;
}

/// no normalization at all
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Normalize for Identity {
    fn normalize(&self, geom: Geom) -> Geom {
        geom
    }
}

/// the canonical string of `geom` after normalization
pub fn fingerprint(norm: &dyn Normalize, geom: &Geom) -> String {
    KeyChain::new(&norm.normalize(geom.clone())).to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot(pub(crate) usize);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Status {
    Pending,
    Done(f64),
}

impl Status {
    pub fn done(&self) -> Option<f64> {
        match self {
            Status::Pending => None,
            Status::Done(v) => Some(*v),
        }
    }
}

/// the outcome of [BigHash::lookup]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Lookup {
    /// first sighting, the caller owns the computation
    Reserved(Slot),
    /// someone else is computing it
    Pending(Slot),
    Done(f64),
}

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    status: Status,
    name: String,
    /// the step pair this geometry was built from, if it was a pair
    pair: Option<(isize, isize)>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("slot {0} published twice with different values: {1} and {2}")]
    Conflict(usize, f64, f64),

    #[error("no cache slot {0}")]
    NoSlot(usize),
}

#[derive(Clone, Debug, Default)]
pub struct BigHash {
    map: FxHashMap<String, Slot>,
    entries: Vec<Entry>,
}

impl BigHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, reserving a new pending slot under `name` if it has
    /// never been seen.
    pub fn lookup(
        &mut self,
        key: String,
        name: &str,
        pair: Option<(isize, isize)>,
    ) -> Lookup {
        if let Some(&slot) = self.map.get(&key) {
            return match self.entries[slot.0].status {
                Status::Pending => Lookup::Pending(slot),
                Status::Done(v) => Lookup::Done(v),
            };
        }
        let slot = Slot(self.entries.len());
        self.entries.push(Entry {
            status: Status::Pending,
            name: name.to_owned(),
            pair,
        });
        self.map.insert(key, slot);
        Lookup::Reserved(slot)
    }

    /// Insert a finished value directly, as when resuming from a checkpoint.
    pub fn seed(&mut self, key: String, pair: Option<(isize, isize)>, v: f64) {
        match self.map.get(&key) {
            Some(&slot) => self.entries[slot.0].status = Status::Done(v),
            None => {
                self.map.insert(key, Slot(self.entries.len()));
                self.entries.push(Entry {
                    status: Status::Done(v),
                    name: String::from("checkpoint"),
                    pair,
                });
            }
        }
    }

    /// Republishing the same value is harmless. A different value means two
    /// computations disagreed about one geometry.
    pub fn publish(&mut self, slot: Slot, v: f64) -> Result<(), CacheError> {
        let entry = self
            .entries
            .get_mut(slot.0)
            .ok_or(CacheError::NoSlot(slot.0))?;
        match entry.status {
            Status::Done(old) if old.to_bits() != v.to_bits() => {
                Err(CacheError::Conflict(slot.0, old, v))
            }
            _ => {
                entry.status = Status::Done(v);
                Ok(())
            }
        }
    }

    pub fn status(&self, slot: Slot) -> Result<Status, CacheError> {
        self.entries
            .get(slot.0)
            .map(|e| e.status)
            .ok_or(CacheError::NoSlot(slot.0))
    }

    pub fn name(&self, slot: Slot) -> Option<&str> {
        self.entries.get(slot.0).map(|e| e.name.as_str())
    }

    /// finished values that came from step pairs
    pub fn pairs(&self) -> impl Iterator<Item = ((isize, isize), f64)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| Some((e.pair?, e.status.done()?)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
