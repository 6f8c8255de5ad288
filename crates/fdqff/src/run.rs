use std::{
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use jobq::{geom::Geom, program::Procedure};

use crate::{
    Error, Reuse,
    cache::{BigHash, Identity, Normalize, fingerprint},
    checkpoint,
    dispatch::Gauge,
    index::e2d_steps,
    ledger::{Array, Ledger},
    stencil::{Stencil, displace},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// force constants from energies up to order `deriv`
    Energies { deriv: usize },
    /// force constants from Cartesian gradients up to order `deriv`
    Gradients { deriv: usize },
    /// energies at a fixed list of geometries
    Points,
}

/// Everything shared between the thread building and submitting jobs and the
/// thread collecting their results.
pub struct Run {
    pub(crate) mode: Mode,
    pub(crate) geom: Geom,
    pub(crate) stencil: Stencil,
    pub(crate) e0: f64,
    pub(crate) reuse: Reuse,
    pub(crate) points: Vec<Geom>,
    norm: Box<dyn Normalize>,
    ledger: Mutex<Ledger>,
    cache: Mutex<BigHash>,
    /// single points submitted and not yet collected
    pub(crate) submitted: Gauge,
}

fn check_deriv(deriv: usize) -> Result<(), Error> {
    if (2..=4).contains(&deriv) {
        Ok(())
    } else {
        Err(Error::Deriv(deriv))
    }
}

impl Run {
    fn new(
        mode: Mode,
        geom: Geom,
        stencil: Stencil,
        e0: f64,
        reuse: Reuse,
        ledger: Ledger,
    ) -> Self {
        Self {
            mode,
            geom,
            stencil,
            e0,
            reuse,
            points: Vec::new(),
            norm: Box::new(Identity),
            ledger: Mutex::new(ledger),
            cache: Mutex::new(BigHash::new()),
            submitted: Gauge::default(),
        }
    }

    /// Force constants from energies around `geom`, whose own energy is `e0`.
    /// `stencil` needs one step size per Cartesian coordinate.
    pub fn energies(
        geom: Geom,
        deriv: usize,
        stencil: Stencil,
        e0: f64,
        reuse: Reuse,
    ) -> Result<Self, Error> {
        check_deriv(deriv)?;
        let n = 3 * geom.len();
        if stencil.deltas().len() != n {
            return Err(Error::Deltas {
                want: n,
                got: stencil.deltas().len(),
            });
        }
        let ledger = Ledger::force_constants(n, deriv);
        let mode = Mode::Energies { deriv };
        Ok(Self::new(mode, geom, stencil, e0, reuse, ledger))
    }

    /// Force constants from Cartesian gradients around `geom`. Each stencil
    /// is one order below the force constants it fills, and nothing is
    /// deduplicated.
    pub fn gradients(
        geom: Geom,
        deriv: usize,
        stencil: Stencil,
    ) -> Result<Self, Error> {
        check_deriv(deriv)?;
        let n = 3 * geom.len();
        if stencil.deltas().len() != n {
            return Err(Error::Deltas {
                want: n,
                got: stencil.deltas().len(),
            });
        }
        let ledger = Ledger::force_constants(n, deriv);
        Ok(Self::new(
            Mode::Gradients { deriv },
            geom,
            stencil,
            0.0,
            Reuse::None,
            ledger,
        ))
    }

    /// Energies at each of `points`, sharing duplicates.
    pub fn points(points: Vec<Geom>) -> Self {
        let ledger = Ledger::points(points.len());
        let geom = points.first().cloned().unwrap_or_default();
        let mut ret = Self::new(
            Mode::Points,
            geom,
            Stencil::default(),
            0.0,
            Reuse::Full,
            ledger,
        );
        ret.points = points;
        ret
    }

    pub fn with_normalize(mut self, norm: Box<dyn Normalize>) -> Self {
        self.norm = norm;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// the number of Cartesian coordinates
    pub fn ncoords(&self) -> usize {
        3 * self.geom.len()
    }

    pub fn procedure(&self) -> Procedure {
        match self.mode {
            Mode::Gradients { .. } => Procedure::Gradient,
            _ => Procedure::SinglePt,
        }
    }

    pub fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// the number of single points currently in flight
    pub fn submitted(&self) -> usize {
        self.submitted.get()
    }

    pub fn cache(&self) -> MutexGuard<'_, BigHash> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// the reference geometry moved by `steps`
    pub fn displaced(&self, steps: &[isize]) -> Result<Geom, Error> {
        let coords =
            displace(&self.geom.coords(), steps, self.stencil.deltas());
        Ok(Geom::from_parts(&self.geom.names(), &coords)?)
    }

    pub fn key(&self, geom: &Geom) -> String {
        fingerprint(self.norm.as_ref(), geom)
    }

    /// write the finished cells to `dir`
    pub fn checkpoint(&self, dir: impl AsRef<Path>) -> Result<(), Error> {
        let dir = dir.as_ref();
        log::info!("writing checkpoint to {}", dir.display());
        let ledger = self.ledger();
        match self.mode {
            Mode::Points => checkpoint::save_points(dir, &ledger)?,
            _ => {
                let cache = self.cache();
                checkpoint::save(dir, &ledger, &cache, self.ncoords())?
            }
        }
        Ok(())
    }

    /// Restore the cells finished in a previous run from `dir`. Paired
    /// energies are seeded back into the cache under their fingerprints.
    pub fn resume(&self, dir: impl AsRef<Path>) -> Result<(), Error> {
        let dir = dir.as_ref();
        log::info!("resuming from checkpoint in {}", dir.display());
        let mut ledger = self.ledger();
        if self.mode == Mode::Points {
            checkpoint::load_points(dir, &mut ledger)?;
            return Ok(());
        }
        let e2d = checkpoint::load(dir, &mut ledger)?;
        let n = self.ncoords();
        let mut cache = self.cache();
        for (off, cell) in e2d.iter().enumerate() {
            if !cell.loaded {
                continue;
            }
            let (a, b) = e2d_steps(n, off)?;
            let geom = self.displaced(&[a, b])?;
            cache.seed(self.key(&geom), Some((a, b)), cell.val);
        }
        log::info!(
            "{} cells left after restoring {} paired energies",
            ledger.remaining(),
            cache.len()
        );
        Ok(())
    }

    /// the finished values of `array`
    pub fn values(&self, array: Array) -> Vec<f64> {
        self.ledger().values(array)
    }
}
