//! Configuration settings for running a force field

use std::{
    fmt::{Debug, Display},
    fs::read_to_string,
    path::Path,
};

use jobq::geom::{Geom, GeomError};
use serde::Deserialize;

use crate::Reuse;

#[cfg(test)]
mod tests;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {file}: {err}")]
    Read { file: String, err: std::io::Error },

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to load template file {file}: {err}")]
    Template { file: String, err: std::io::Error },

    #[error(transparent)]
    Geom(#[from] GeomError),

    #[error(
        "job_limit ({job_limit}) must be at least chunk_size ({chunk_size})"
    )]
    JobLimit { job_limit: usize, chunk_size: usize },

    #[error("chunk_size must be at least 1")]
    ChunkSize,

    #[error("deriv must be 2, 3, or 4, got {0}")]
    Deriv(usize),

    #[error("step_size must be positive, got {0}")]
    StepSize(f64),

    #[error("malformed delta `{0}`, expected `k:δ`")]
    BadDelta(String),

    #[error("delta index {k} outside 1..={n}")]
    DeltaIndex { k: usize, n: usize },

    #[error("delta {1} for coordinate {0} must be positive")]
    NonPositiveDelta(usize, f64),
}

/// Templates can either be literal strings in the config file, or the name of a
/// file to be loaded
#[derive(Clone, Deserialize, PartialEq, Debug)]
#[serde(untagged)]
enum TemplateSrc {
    Literal(String),
    File { file: String },
}

impl TryFrom<TemplateSrc> for String {
    type Error = ConfigError;

    fn try_from(value: TemplateSrc) -> Result<Self, Self::Error> {
        match value {
            TemplateSrc::Literal(s) => Ok(s),
            TemplateSrc::File { file } => read_to_string(&file)
                .map_err(|err| ConfigError::Template { file, err }),
        }
    }
}

fn default_deriv() -> usize {
    4
}

fn default_step_size() -> f64 {
    0.005
}

fn default_chunk_size() -> usize {
    64
}

fn default_job_limit() -> usize {
    1024
}

fn default_sleep_int() -> usize {
    1
}

fn default_check_int() -> usize {
    100
}

fn default_submit_retries() -> usize {
    15
}

fn default_ncpus() -> usize {
    1
}

fn default_mem() -> String {
    String::from("8gb")
}

fn default_intder_cmd() -> String {
    String::from("intder")
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    /// The reference geometry in XYZ format, in Å. The atom count and comment
    /// lines may be omitted.
    geometry: String,

    /// The template input file for the quantum chemistry program. Molpro
    /// supports {{.geom}} for the geometry and {{.charge}} for the molecular
    /// charge.
    template: TemplateSrc,

    /// The template for the submission scripts. Supported directives are
    /// {{.basename}}, {{.filename}}, {{.queue}}, {{.node}}, {{.ncpus}}, and
    /// {{.mem}}.
    queue_template: Option<TemplateSrc>,

    program: Program,

    queue: Queue,

    /// "cart" for Cartesian energies, "grad" for Cartesian gradients, and
    /// "sic" for symmetry-internal points generated by intder
    coord_type: CoordType,

    /// The highest derivative order to compute
    #[serde(default = "default_deriv")]
    deriv: usize,

    #[serde(default)]
    charge: isize,

    /// The default displacement in Å
    #[serde(default = "default_step_size")]
    step_size: f64,

    /// Per-coordinate overrides of `step_size` as comma-separated `k:δ`
    /// pairs with 1-based `k`
    deltas: Option<String>,

    /// The number of single points bundled into one submission script
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,

    /// The maximum number of single points submitted but not yet finished
    #[serde(default = "default_job_limit")]
    job_limit: usize,

    /// The interval in seconds between passes over the running jobs
    #[serde(default = "default_sleep_int")]
    sleep_int: usize,

    /// The number of finished single points between checkpoints. A value of 0
    /// disables checkpoints.
    #[serde(default = "default_check_int")]
    check_int: usize,

    #[serde(default)]
    reuse: Reuse,

    /// The number of attempts at submitting a script before giving up
    #[serde(default = "default_submit_retries")]
    submit_retries: usize,

    queue_name: Option<String>,

    node: Option<String>,

    #[serde(default = "default_ncpus")]
    ncpus: usize,

    #[serde(default = "default_mem")]
    mem: String,

    /// The command run to generate symmetry-internal points
    #[serde(default = "default_intder_cmd")]
    intder_cmd: String,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Program {
    #[serde(alias = "molpro")]
    Molpro,
}

impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Program::Molpro => write!(f, "molpro"),
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Queue {
    #[serde(alias = "pbs")]
    Pbs,
    #[serde(alias = "slurm")]
    Slurm,
    #[serde(alias = "local")]
    Local,
}

impl Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Queue::Pbs => "pbs",
                Queue::Slurm => "slurm",
                Queue::Local => "local",
            }
        )
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum CoordType {
    #[serde(alias = "cart")]
    Cart,
    #[serde(alias = "grad")]
    Grad,
    #[serde(alias = "sic")]
    Sic,
}

impl Display for CoordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                CoordType::Cart => "cart",
                CoordType::Grad => "grad",
                CoordType::Sic => "sic",
            }
        )
    }
}

/// Construct a full `Config` using [Config::load] on a TOML file or use
/// [Config::new] and the builder methods
#[derive(Clone, Deserialize, PartialEq, Debug)]
#[serde(try_from = "RawConfig")]
pub struct Config {
    pub geometry: Geom,

    /// the template for the quantum chemistry program
    pub template: String,

    /// the optional template for the queuing system. If this is not provided,
    /// the queue's [jobq::queue::Queue::default_submit_script] is used
    pub queue_template: Option<String>,

    pub program: Program,

    pub queue: Queue,

    pub coord_type: CoordType,

    pub deriv: usize,

    pub charge: isize,

    /// distance in Å to displace the atoms
    pub step_size: f64,

    pub deltas: Option<String>,

    pub chunk_size: usize,

    pub job_limit: usize,

    pub sleep_int: usize,

    /// interval for writing checkpoints. 0 means no checkpoints
    pub check_int: usize,

    pub reuse: Reuse,

    pub submit_retries: usize,

    pub queue_name: Option<String>,

    pub node: Option<String>,

    pub ncpus: usize,

    pub mem: String,

    pub intder_cmd: String,
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(rc: RawConfig) -> Result<Self, Self::Error> {
        let ret = Self {
            geometry: rc.geometry.parse()?,
            template: rc.template.try_into()?,
            queue_template: rc
                .queue_template
                .map(String::try_from)
                .transpose()?,
            program: rc.program,
            queue: rc.queue,
            coord_type: rc.coord_type,
            deriv: rc.deriv,
            charge: rc.charge,
            step_size: rc.step_size,
            deltas: rc.deltas,
            chunk_size: rc.chunk_size,
            job_limit: rc.job_limit,
            sleep_int: rc.sleep_int,
            check_int: rc.check_int,
            reuse: rc.reuse,
            submit_retries: rc.submit_retries,
            queue_name: rc.queue_name,
            node: rc.node,
            ncpus: rc.ncpus,
            mem: rc.mem,
            intder_cmd: rc.intder_cmd,
        };
        ret.validate()?;
        Ok(ret)
    }
}

macro_rules! int_builders {
    ($($name: ident$(,)*)*) => {
        $(pub fn $name(mut self, i: usize) -> Self {
            self.$name = i;
            self
        })*
    }
}

impl Config {
    /// Construct a [Config] with the default values for everything but the
    /// required fields
    pub fn new(
        geometry: Geom,
        template: String,
        program: Program,
        queue: Queue,
        coord_type: CoordType,
    ) -> Self {
        Self {
            geometry,
            template,
            queue_template: None,
            program,
            queue,
            coord_type,
            deriv: default_deriv(),
            charge: 0,
            step_size: default_step_size(),
            deltas: None,
            chunk_size: default_chunk_size(),
            job_limit: default_job_limit(),
            sleep_int: default_sleep_int(),
            check_int: default_check_int(),
            reuse: Reuse::default(),
            submit_retries: default_submit_retries(),
            queue_name: None,
            node: None,
            ncpus: default_ncpus(),
            mem: default_mem(),
            intder_cmd: default_intder_cmd(),
        }
    }

    pub fn step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn deltas(mut self, deltas: &str) -> Self {
        self.deltas = Some(deltas.to_owned());
        self
    }

    pub fn reuse(mut self, reuse: Reuse) -> Self {
        self.reuse = reuse;
        self
    }

    int_builders!(deriv, sleep_int, job_limit, chunk_size, check_int);

    /// load a [Config] from the TOML file specified by `filename`
    pub fn load<P>(filename: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path> + Debug,
    {
        let contents =
            read_to_string(&filename).map_err(|err| ConfigError::Read {
                file: format!("{filename:?}"),
                err,
            })?;
        Ok(toml::from_str(&contents)?)
    }

    /// check that the settings in `self` make sense together
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size < 1 {
            return Err(ConfigError::ChunkSize);
        }
        if self.job_limit < self.chunk_size {
            return Err(ConfigError::JobLimit {
                job_limit: self.job_limit,
                chunk_size: self.chunk_size,
            });
        }
        if !(2..=4).contains(&self.deriv) {
            return Err(ConfigError::Deriv(self.deriv));
        }
        if self.step_size <= 0.0 || !self.step_size.is_finite() {
            return Err(ConfigError::StepSize(self.step_size));
        }
        if self.coord_type != CoordType::Sic {
            self.step_sizes()?;
        }
        Ok(())
    }

    /// one step size per Cartesian coordinate of `geometry`
    pub fn step_sizes(&self) -> Result<Vec<f64>, ConfigError> {
        parse_deltas(
            self.deltas.as_deref().unwrap_or(""),
            3 * self.geometry.len(),
            self.step_size,
        )
    }
}

/// Parse comma-separated `k:δ` overrides of `default` for `n` coordinates.
pub fn parse_deltas(
    input: &str,
    n: usize,
    default: f64,
) -> Result<Vec<f64>, ConfigError> {
    let mut ret = vec![default; n];
    for pair in input.split(',') {
        let pair: String = pair.split_whitespace().collect();
        if pair.is_empty() {
            continue;
        }
        let bad = || ConfigError::BadDelta(pair.clone());
        let (k, d) = pair.split_once(':').ok_or_else(bad)?;
        let k: usize = k.parse().map_err(|_| bad())?;
        let d: f64 = d.parse().map_err(|_| bad())?;
        if k < 1 || k > n {
            return Err(ConfigError::DeltaIndex { k, n });
        }
        if d <= 0.0 || !d.is_finite() {
            return Err(ConfigError::NonPositiveDelta(k, d));
        }
        ret[k - 1] = d;
    }
    Ok(ret)
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Config {
            geometry,
            template,
            queue_template,
            program,
            queue,
            coord_type,
            deriv,
            charge,
            step_size,
            deltas,
            chunk_size,
            job_limit,
            sleep_int,
            check_int,
            reuse,
            submit_retries,
            queue_name,
            node,
            ncpus,
            mem,
            intder_cmd,
        } = self;
        write!(
            f,
            "
Configuration Options:
geometry = {{
{geometry}
}}
template = {template}
queue_template = {}
program = {program}
queue = {queue}
coord_type = {coord_type}
deriv = {deriv}
charge = {charge}
step_size = {step_size}
deltas = {}
chunk_size = {chunk_size}
job_limit = {job_limit}
sleep_int = {sleep_int}
check_int = {check_int}
reuse = {reuse:?}
submit_retries = {submit_retries}
queue_name = {}
node = {}
ncpus = {ncpus}
mem = {mem}
intder_cmd = {intder_cmd}
",
            queue_template.as_deref().unwrap_or(""),
            deltas.as_deref().unwrap_or(""),
            queue_name.as_deref().unwrap_or(""),
            node.as_deref().unwrap_or(""),
        )
    }
}
