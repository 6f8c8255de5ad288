#![allow(dead_code)]

use std::{
    collections::HashSet,
    fs::{read_to_string, write},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use fdqff::stencil::ANGBOHR;
use jobq::{
    geom::{Atom, Geom},
    program::{
        Decoder, Encoder, Procedure, ProgramError, ProgramResult,
    },
    queue::{Backoff, Meta, Queue, QueueError, SubQueue, Submit},
};

pub const K: [f64; 3] = [0.5, 0.75, 0.625];
pub const B: f64 = 0.125;
pub const C: f64 = 0.0625;
pub const D: f64 = 0.001;

/// The reference geometry, a single atom.
pub fn atom() -> Geom {
    Geom::new(vec![Atom::new("He", 0.1, -0.2, 0.3)])
}

/// Energy and gradient in hartree/bohr at `x`, in Å. The energy is a
/// polynomial in the displacement from [atom] with known derivatives.
pub fn surface(x: &[f64]) -> (f64, Vec<f64>) {
    let x0 = atom().coords();
    let u: Vec<f64> = x.iter().zip(&x0).map(|(a, b)| a - b).collect();
    let e = 0.5 * (K[0] * u[0] * u[0] + K[1] * u[1] * u[1] + K[2] * u[2] * u[2])
        + B * u[0] * u[1]
        + C * u[0] * u[0] * u[2]
        + D * u[0].powi(4);
    let g = vec![
        K[0] * u[0] + B * u[1] + 2.0 * C * u[0] * u[2] + 4.0 * D * u[0].powi(3),
        K[1] * u[1] + B * u[0],
        K[2] * u[2] + C * u[0] * u[0],
    ];
    (e, g.into_iter().map(|g| ANGBOHR * g).collect())
}

/// Writes the geometry to `name.inp` and reads `energy` and `gradient` lines
/// back from `name.out`.
pub struct Fake;

impl Encoder for Fake {
    fn extension(&self) -> &'static str {
        "inp"
    }

    fn write_input(
        &self,
        filename: &str,
        geom: &Geom,
        _proc: Procedure,
    ) -> std::io::Result<()> {
        let mut body = String::new();
        for a in &geom.atoms {
            body.push_str(&format!("{} {} {} {}\n", a.label, a.x, a.y, a.z));
        }
        write(format!("{filename}.inp"), body)
    }

    fn command(&self, filename: &str) -> String {
        format!("run {filename}")
    }
}

impl Decoder for Fake {
    fn read_output(
        &self,
        filename: &str,
    ) -> Result<ProgramResult, ProgramError> {
        let file = format!("{filename}.out");
        let Ok(contents) = read_to_string(&file) else {
            return Err(ProgramError::NotFound(file));
        };
        if contents.trim().is_empty() {
            return Err(ProgramError::BlankOutput(file));
        }
        let mut ret = ProgramResult::default();
        for line in contents.lines() {
            if line.contains("error") {
                return Err(ProgramError::ContainsError {
                    file,
                    line: line.to_owned(),
                });
            }
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("energy") => {
                    ret.energy = fields
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| ProgramError::EnergyParse(file.clone()))?
                }
                Some("gradient") => {
                    ret.gradient = Some(
                        fields
                            .map(str::parse)
                            .collect::<Result<_, _>>()
                            .map_err(|_| {
                                ProgramError::GradientParse(file.clone())
                            })?,
                    )
                }
                _ => {}
            }
        }
        Ok(ret)
    }
}

/// How a matching input misbehaves on its first run. Redos always succeed
/// unless the failure is persistent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fault {
    /// an output with an error line
    Error { persistent: bool },
    /// an empty output
    Blank,
    /// no output at all
    Lost,
}

/// A queue that evaluates [surface] for each input. By default every script
/// runs as soon as it is submitted. With a `delay`, a job stays in the queue
/// for that many status checks and only writes its outputs on leaving it.
pub struct Scripted {
    pub dir: String,
    pub chunk_size: usize,
    pub job_limit: usize,
    /// inputs whose name contains this misbehave
    pub fault: Option<(String, Fault)>,
    pub delay: usize,
    pub no_del: bool,
    runs: AtomicUsize,
    ids: AtomicUsize,
    polls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    /// job id, status checks left, and inputs of each queued job
    queued: Mutex<Vec<(String, usize, Vec<String>)>>,
    backoff: Backoff,
    meta: Meta,
    template: Option<String>,
}

impl Scripted {
    pub fn new(dir: &str, chunk_size: usize) -> Self {
        Self {
            dir: dir.to_owned(),
            chunk_size,
            job_limit: chunk_size.max(16),
            fault: None,
            delay: 0,
            no_del: true,
            runs: AtomicUsize::new(0),
            ids: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
            backoff: Backoff {
                retries: 1,
                base: Duration::ZERO,
            },
            meta: Meta::default(),
            template: Some(String::from("# {{.basename}}\n")),
        }
    }

    pub fn failing(self, name: &str, persistent: bool) -> Self {
        self.with_fault(name, Fault::Error { persistent })
    }

    pub fn with_fault(mut self, name: &str, fault: Fault) -> Self {
        self.fault = Some((name.to_owned(), fault));
        self
    }

    pub fn delayed(mut self, polls: usize) -> Self {
        self.delay = polls;
        self
    }

    /// remove finished inputs and outputs
    pub fn deleting(mut self) -> Self {
        self.no_del = false;
        self
    }

    /// the number of inputs run so far
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// the number of times the queue status was checked
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// every input name run so far, in order
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    /// the number of redo inputs run so far
    pub fn redos(&self) -> usize {
        self.seen().iter().filter(|s| s.ends_with("_redo")).count()
    }

    fn execute(&self, name: &str) -> Result<(), QueueError> {
        let cmd = |msg: String| QueueError::Command {
            cmd: format!("run {name}"),
            msg,
        };
        let inp = read_to_string(format!("{name}.inp"))
            .map_err(|e| cmd(e.to_string()))?;
        let geom: Geom = inp.parse().map_err(|e| cmd(format!("{e}")))?;
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(name.to_owned());
        let redo = name.ends_with("_redo");
        let fault = match &self.fault {
            Some((frag, fault)) if name.contains(frag.as_str()) => Some(*fault),
            _ => None,
        };
        let out = match fault {
            Some(Fault::Error { persistent }) if persistent || !redo => {
                String::from(" ? error: forced failure\n")
            }
            Some(Fault::Blank) if !redo => String::new(),
            Some(Fault::Lost) if !redo => return Ok(()),
            _ => {
                let (e, g) = surface(&geom.coords());
                let g: Vec<_> = g.iter().map(|g| g.to_string()).collect();
                format!("energy {e}\ngradient {}\n", g.join(" "))
            }
        };
        write(format!("{name}.out"), out).map_err(|e| cmd(e.to_string()))
    }
}

impl Submit for Scripted {
    fn submit_once(&self, filename: &str) -> Result<String, QueueError> {
        let script =
            read_to_string(filename).map_err(|e| QueueError::Command {
                cmd: format!("submit {filename}"),
                msg: e.to_string(),
            })?;
        let names: Vec<String> = script
            .lines()
            .filter_map(|line| line.strip_prefix("run "))
            .map(str::to_owned)
            .collect();
        let id = self.ids.fetch_add(1, Ordering::SeqCst).to_string();
        if self.delay > 0 {
            let mut queued = self.queued.lock().unwrap();
            queued.push((id.clone(), self.delay, names));
            return Ok(id);
        }
        for name in names {
            self.execute(&name)?;
        }
        Ok(id)
    }
}

impl Queue for Scripted {
    fn default_submit_script(&self) -> String {
        String::new()
    }

    fn template(&self) -> &Option<String> {
        &self.template
    }
}

impl SubQueue for Scripted {
    const SCRIPT_EXT: &'static str = "sh";

    fn dir(&self) -> &str {
        &self.dir
    }

    fn submit_command(&self) -> &str {
        "true"
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn job_limit(&self) -> usize {
        self.job_limit
    }

    fn sleep_int(&self) -> usize {
        0
    }

    fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    /// count down every queued job, running the ones that leave the queue
    fn status(&self) -> Result<HashSet<String>, QueueError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut queued = self.queued.lock().unwrap();
        let mut done = Vec::new();
        queued.retain_mut(|(_, left, names)| {
            *left -= 1;
            if *left == 0 {
                done.append(names);
            }
            *left > 0
        });
        let ret = queued.iter().map(|(id, ..)| id.clone()).collect();
        drop(queued);
        for name in done {
            self.execute(&name)?;
        }
        Ok(ret)
    }

    fn no_del(&self) -> bool {
        self.no_del
    }
}
