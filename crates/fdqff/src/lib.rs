//! Orchestration of finite-difference quartic force fields: enumerate the
//! displaced single points a force field needs, farm them out through a
//! batch [Queue](jobq::queue::Queue), and fold the energies or gradients back
//! into force-constant arrays as they come in.

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod calc;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod drain;
pub mod index;
pub mod ledger;
pub mod output;
pub mod plan;
pub mod run;
pub mod stencil;
pub mod transform;

pub use drain::{Check, Opts, drive, reference};
pub use plan::{Generator, Plan};
pub use run::{Mode, Run};

/// time the duration of `$body` and store the resulting Duration in `$elapsed`
macro_rules! time {
    ($elapsed:ident, $body:block) => {
        let now = std::time::Instant::now();
        $body;
        let $elapsed = now.elapsed();
    };
}

pub(crate) use time;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Index(#[from] index::IndexError),

    #[error(transparent)]
    Stencil(#[from] stencil::StencilError),

    #[error(transparent)]
    Ledger(#[from] ledger::LedgerError),

    #[error(transparent)]
    Cache(#[from] cache::CacheError),

    #[error(transparent)]
    Checkpoint(#[from] checkpoint::CheckpointError),

    #[error(transparent)]
    Queue(#[from] jobq::queue::QueueError),

    #[error(transparent)]
    Geom(#[from] jobq::geom::GeomError),

    #[error(transparent)]
    Transform(#[from] transform::TransformError),

    #[error("failed to write input {file}: {err}")]
    Input { file: String, err: std::io::Error },

    #[error("failed to write {file}: {err}")]
    Output { file: String, err: std::io::Error },

    #[error("job {job_id} failed in {file}: `{line}`")]
    Computation {
        job_id: String,
        file: String,
        line: String,
    },

    #[error("{got} step sizes for {want} coordinates")]
    Deltas { want: usize, got: usize },

    #[error("unsupported derivative level {0}")]
    Deriv(usize),

    #[error("interrupted by signal")]
    Interrupted,

    #[error("submission thread panicked")]
    Producer,
}

/// Which single points are fingerprinted and shared through the cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reuse {
    /// every displaced geometry
    Full,
    /// only two-step displacements, which the quartic stencils revisit
    #[default]
    Pairs,
    /// nothing, every stencil term runs its own job
    None,
}

impl Reuse {
    pub fn fingerprints(&self, nsteps: usize) -> bool {
        match self {
            Reuse::Full => true,
            Reuse::Pairs => nsteps == 2,
            Reuse::None => false,
        }
    }
}

/// the number of single points a Cartesian quartic force field dispatches
/// for `n` coordinates when pairs are reused
pub const fn cart_points(n: usize) -> usize {
    2 * n * (n * n * n + 2 * n * n + 8 * n + 1) / 3
}

/// the number of gradients a quartic force field from Cartesian gradients
/// dispatches for `n` coordinates
pub const fn grad_points(n: usize) -> usize {
    n * (4 * n * n + 12 * n + 8) / 3
}
