use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use super::{Backoff, Meta, Queue, QueueError, SubQueue, Submit, run_command};
use crate::program::Encoder;

/// Pbs is a type for holding the information for submitting a pbs job.
/// `filename` is the name of the Pbs submission script
#[derive(Debug)]
pub struct Pbs {
    pub chunk_size: usize,
    pub job_limit: usize,
    pub sleep_int: usize,
    pub dir: String,
    pub no_del: bool,
    pub backoff: Backoff,
    pub meta: Meta,
    pub template: Option<String>,
}

impl Pbs {
    pub fn new(
        chunk_size: usize,
        job_limit: usize,
        sleep_int: usize,
        dir: &str,
        no_del: bool,
        template: Option<String>,
    ) -> Self {
        Self {
            chunk_size,
            job_limit,
            sleep_int,
            dir: dir.to_owned(),
            no_del,
            backoff: Backoff::default(),
            meta: Meta {
                queue: Some("workq".to_owned()),
                ..Meta::default()
            },
            template,
        }
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// `qsub` reports ids like `819446.maple`, but only the leading number is
    /// stable across `qstat` versions
    fn short_id(id: &str) -> String {
        id.split('.').next().unwrap_or(id).trim_end_matches('*').to_owned()
    }

    /// parse the output of `qstat -u $USER`. form of the output is:
    ///
    /// maple:
    ///                                                     Req'd  Req'd   Elap
    /// Job ID  Username Queue    Jobname    SessID NDS TSK Memory Time  S Time
    /// ------- -------- -------- ---------- ------ --- --- ------ ----- - -----
    /// 819446  user     queue    C6HNpts      5085   1   1    8gb 26784 R 00:00
    pub(crate) fn parse_status(lines: &str) -> HashSet<String> {
        lines
            .lines()
            .skip_while(|l| !l.contains("-----------"))
            .skip(1)
            .filter_map(|line| line.split_whitespace().next())
            .map(Self::short_id)
            .collect()
    }
}

// Molpro 2022 submit script requires submission from the current directory
impl Submit for Pbs {
    fn submit_once(&self, filename: &str) -> Result<String, QueueError> {
        let path = Path::new(filename);
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        let base = path.file_name().unwrap_or(path.as_os_str());
        let out = run_command(
            Command::new(self.submit_command()).arg(base).current_dir(dir),
        )?;
        Ok(Self::short_id(out.split_whitespace().last().unwrap_or("")))
    }
}

impl Queue for Pbs {
    fn template(&self) -> &Option<String> {
        &self.template
    }

    fn default_submit_script(&self) -> String {
        include_str!("../../templates/pbs/molpro").to_owned()
    }

    /// jobs start in the script's own directory, so inputs are named
    /// relative to it
    fn program_cmd<E: Encoder + ?Sized>(
        &self,
        program: &E,
        filename: &str,
    ) -> String {
        let base = Path::new(filename)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(filename);
        program.command(base)
    }
}

impl SubQueue for Pbs {
    const SCRIPT_EXT: &'static str = "pbs";

    fn submit_command(&self) -> &str {
        "qsub"
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn job_limit(&self) -> usize {
        self.job_limit
    }

    fn sleep_int(&self) -> usize {
        self.sleep_int
    }

    fn dir(&self) -> &str {
        &self.dir
    }

    fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn status(&self) -> Result<HashSet<String>, QueueError> {
        let user = std::env::var("USER").unwrap_or_default();
        let out = run_command(Command::new("qstat").args(["-u", &user]))?;
        Ok(Self::parse_status(&out))
    }

    fn no_del(&self) -> bool {
        self.no_del
    }
}
