use std::{
    collections::{HashMap, HashSet},
    path::Path,
    process::Command,
    time::Duration,
};

use crate::program::Encoder;

pub mod local;
pub mod pbs;
pub mod slurm;

#[cfg(test)]
mod tests;

#[derive(PartialEq, Eq, Debug)]
pub struct Resubmit {
    pub inp_file: String,
    pub pbs_file: String,
    pub job_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to write {file}: {err}")]
    Write { file: String, err: std::io::Error },

    #[error("failed to copy {from} to {to}: {err}")]
    Copy {
        from: String,
        to: String,
        err: std::io::Error,
    },

    #[error("`{cmd}` failed: {msg}")]
    Command { cmd: String, msg: String },

    #[error("failed to submit {file} after {attempts} attempts: {last}")]
    Exhausted {
        file: String,
        attempts: usize,
        last: String,
    },
}

/// Exponential backoff for submissions. Attempt `i` (from 0) that fails
/// sleeps `base · 2^i` before the next one.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    pub retries: usize,
    pub base: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            retries: 15,
            base: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }
}

/// Queue metadata spliced into submission scripts
#[derive(Clone, Debug, PartialEq)]
pub struct Meta {
    pub queue: Option<String>,
    pub node: Option<String>,
    pub ncpus: usize,
    pub mem: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            queue: None,
            node: None,
            ncpus: 1,
            mem: "8gb".to_owned(),
        }
    }
}

/// run `cmd` and return its stdout, or a [QueueError::Command] describing the
/// failure
pub(crate) fn run_command(cmd: &mut Command) -> Result<String, QueueError> {
    let desc = format!("{cmd:?}");
    match cmd.output() {
        Ok(s) if s.status.success() => {
            Ok(String::from_utf8_lossy(&s.stdout).into_owned())
        }
        Ok(s) => Err(QueueError::Command {
            cmd: desc,
            msg: String::from_utf8_lossy(&s.stderr).trim().to_owned(),
        }),
        Err(e) => Err(QueueError::Command {
            cmd: desc,
            msg: e.to_string(),
        }),
    }
}

pub trait Submit: SubQueue {
    /// make a single attempt to submit `filename`, returning the job id
    fn submit_once(&self, filename: &str) -> Result<String, QueueError> {
        let out =
            run_command(Command::new(self.submit_command()).arg(filename))?;
        Ok(out.split_whitespace().last().unwrap_or("").to_string())
    }

    /// submit `filename` to the queue and return the job id, retrying with
    /// exponential backoff on failure
    fn submit(&self, filename: &str) -> Result<String, QueueError> {
        let backoff = self.backoff();
        let retries = backoff.retries.max(1);
        let mut last = String::new();
        for attempt in 0..retries {
            match self.submit_once(filename) {
                Ok(id) => return Ok(id),
                Err(e) if attempt + 1 == retries => last = e.to_string(),
                Err(e) => {
                    let delay = backoff.delay(attempt);
                    log::warn!(
                        "failed to submit {filename} with `{e}`, \
                         retrying in {:.1} s",
                        delay.as_secs_f64()
                    );
                    last = e.to_string();
                    std::thread::sleep(delay);
                }
            }
        }
        Err(QueueError::Exhausted {
            file: filename.to_owned(),
            attempts: retries,
            last,
        })
    }
}

/// a trait for all of the program-independent parts of a [Queue]
pub trait SubQueue {
    /// the extension to append to submit scripts for this type of Queue
    const SCRIPT_EXT: &'static str;

    fn dir(&self) -> &str;

    fn submit_command(&self) -> &str;

    fn chunk_size(&self) -> usize;

    fn job_limit(&self) -> usize;

    fn sleep_int(&self) -> usize;

    fn backoff(&self) -> &Backoff;

    fn meta(&self) -> &Meta;

    /// return a HashSet of jobs found in the queue
    fn status(&self) -> Result<HashSet<String>, QueueError>;

    /// return `true` if all output files should be preserved
    fn no_del(&self) -> bool;
}

pub trait Queue: SubQueue + Submit {
    fn default_submit_script(&self) -> String;

    fn template(&self) -> &Option<String>;

    /// mark each job id in `jobs` as `true` if it is still queued or running
    /// and `false` otherwise
    fn stat(&self, jobs: &mut HashMap<String, bool>) -> Result<(), QueueError> {
        let status = self.status()?;
        for (id, running) in jobs.iter_mut() {
            *running = status.contains(id);
        }
        Ok(())
    }

    /// the line in a submission script that runs `program` on the input
    /// `filename`. scripts run from the directory `submit` is called from, so
    /// the path is kept as-is
    fn program_cmd<E: Encoder + ?Sized>(
        &self,
        program: &E,
        filename: &str,
    ) -> String {
        program.command(filename)
    }

    /// write a submission script to `filename` that runs each of `commands`
    fn write_submit_script(
        &self,
        commands: impl IntoIterator<Item = String>,
        filename: &str,
    ) -> Result<(), QueueError> {
        use std::fmt::Write;
        let basename = Path::new(filename)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(filename);
        let meta = self.meta();
        let mut body = self
            .template()
            .clone()
            .unwrap_or_else(|| self.default_submit_script())
            .replace("{{.basename}}", basename)
            .replace("{{.filename}}", filename)
            .replace("{{.queue}}", meta.queue.as_deref().unwrap_or(""))
            .replace("{{.node}}", meta.node.as_deref().unwrap_or(""))
            .replace("{{.ncpus}}", &meta.ncpus.to_string())
            .replace("{{.mem}}", &meta.mem);
        for cmd in commands {
            let _ = writeln!(body, "{cmd}");
        }
        std::fs::write(filename, body).map_err(|err| QueueError::Write {
            file: filename.to_owned(),
            err,
        })
    }

    /// take the name of a program input file without its extension, copy
    /// `name.ext` to `name_redo.ext`, write `name_redo.SCRIPT_EXT`, and then
    /// submit the redo script
    fn resubmit<E: Encoder + ?Sized>(
        &self,
        program: &E,
        name: &str,
    ) -> Result<Resubmit, QueueError> {
        let ext = program.extension();
        let inp_file = format!("{name}_redo");
        let from = format!("{name}.{ext}");
        let to = format!("{inp_file}.{ext}");
        if let Err(err) = std::fs::copy(&from, &to) {
            return Err(QueueError::Copy { from, to, err });
        }
        let pbs_file = format!("{inp_file}.{}", Self::SCRIPT_EXT);
        let cmd = self.program_cmd(program, &inp_file);
        self.write_submit_script([cmd], &pbs_file)?;
        let job_id = self.submit(&pbs_file)?;
        Ok(Resubmit {
            inp_file,
            pbs_file,
            job_id,
        })
    }
}
