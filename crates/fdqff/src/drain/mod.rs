//! Collection of results. Records stream in from the submitting thread, and
//! each pass over the outstanding ones reads whatever outputs have appeared,
//! posts the values into the ledger, and resubmits jobs that failed or went
//! missing.

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, SyncSender, TryRecvError},
    },
    thread,
    time::{Duration, Instant},
};

use jobq::{
    geom::Geom,
    program::{Program, ProgramError, ProgramResult},
    queue::{Queue, Resubmit},
};
use libc::{RUSAGE_SELF, timeval};
use rayon::prelude::*;

use crate::{
    Error, checkpoint,
    calc::{Calc, Value},
    dispatch::{Dispatcher, Gauge},
    ledger::{Array, LedgerError},
    plan::{Generator, Plan},
    run::{Mode, Run},
    time,
};

mod dump;
pub(crate) mod timer;

use dump::Dump;
use timer::Timer;

/// passes with no output, once the job has left the queue, before a job is
/// resubmitted. file systems can lag well behind the queue
const MAX_RETRIES: usize = 5;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Set a flag on SIGINT and SIGTERM instead of exiting, returning the flag
/// for [Opts::interrupt].
pub fn install_handlers() -> &'static AtomicBool {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
    &INTERRUPTED
}

pub enum Check {
    Some { check_int: usize, check_dir: String },
    None,
}

pub struct Opts<'a> {
    pub check: Check,
    /// checked once per pass. when raised, the run checkpoints and stops
    pub interrupt: &'a AtomicBool,
}

fn to_secs(time: timeval) -> f64 {
    time.tv_sec as f64 + time.tv_usec as f64 / 1e6
}

/// return the CPU time used by the current process in seconds
fn get_cpu_time() -> f64 {
    unsafe {
        let mut rusage = std::mem::MaybeUninit::uninit();
        let res = libc::getrusage(RUSAGE_SELF, rusage.as_mut_ptr());
        if res != 0 {
            return 0.0;
        }
        let rusage = rusage.assume_init();
        to_secs(rusage.ru_stime) + to_secs(rusage.ru_utime)
    }
}

/// Generate, submit, and collect every single point of `plan`, filling the
/// ledger of `run`. Submission runs on its own thread and stalls while
/// `queue.job_limit()` jobs are outstanding.
pub fn drive<Q, P, G>(
    run: &Run,
    plan: G,
    queue: &Q,
    program: &P,
    opts: &Opts,
) -> Result<(), Error>
where
    Q: Queue + Sync,
    P: Program + Sync,
    G: Generator,
{
    let gauge = &run.submitted;
    let stop = AtomicBool::new(false);
    let limit = queue.job_limit();
    let (tx, rx) = mpsc::sync_channel(limit);
    thread::scope(|s| {
        let (g, st) = (gauge, &stop);
        let producer = s.spawn(move || {
            let mut dispatcher =
                Dispatcher::new(queue, program, run.procedure(), g);
            let ret =
                produce(run, plan, &mut dispatcher, g, &tx, st, limit);
            if let Err(e) = ret {
                // the drain may already be gone
                let _ = tx.send(Err(e));
            }
            dispatcher.time
        });
        let mut drainer = Drainer::new(run, queue, program, gauge, opts, rx);
        let ret = drainer.drain();
        stop.store(true, Ordering::Relaxed);
        let mut time = drainer.finish();
        match producer.join() {
            Ok(t) => time += t,
            Err(_) => return Err(Error::Producer),
        }
        log::info!("{time}");
        ret
    })
}

/// Compute the energy at `geom` as a one-point run named `ref` in `dir`. The
/// energy is saved alongside any checkpoint in `opts`, and with `resume` a
/// saved energy, or an output left in `dir`, is used instead of submitting.
pub fn reference<Q, P>(
    geom: &Geom,
    dir: &str,
    queue: &Q,
    program: &P,
    opts: &Opts,
    resume: bool,
) -> Result<f64, Error>
where
    Q: Queue + Sync,
    P: Program + Sync,
{
    let check_dir = match &opts.check {
        Check::Some { check_dir, .. } => Some(Path::new(check_dir)),
        Check::None => None,
    };
    let name = format!("{dir}/ref.{:010}", 0);
    if resume {
        let saved = match check_dir {
            Some(d) => checkpoint::load_e0(d)?,
            None => None,
        };
        if let Some(e0) = saved {
            log::info!("reusing checkpointed reference energy");
            return Ok(e0);
        }
        if let Ok(res) = program.read_output(&name) {
            log::info!("reusing reference energy from {name}");
            return Ok(res.energy);
        }
    }
    let run = Run::points(vec![geom.clone()]);
    let plan = Plan::new(&run, dir, 1).with_prefix("ref");
    let ref_opts = Opts {
        check: Check::None,
        interrupt: opts.interrupt,
    };
    drive(&run, plan, queue, program, &ref_opts)?;
    let e0 = run.values(Array::Energies)[0];
    if let Some(check_dir) = check_dir {
        checkpoint::save_e0(check_dir, e0)?;
    }
    Ok(e0)
}

fn produce<Q, P, G>(
    run: &Run,
    mut plan: G,
    dispatcher: &mut Dispatcher<Q, P>,
    gauge: &Gauge,
    tx: &SyncSender<Result<Calc, Error>>,
    stop: &AtomicBool,
    limit: usize,
) -> Result<(), Error>
where
    Q: Queue,
    P: Program,
    G: Generator,
{
    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        let (mut batch, more) = plan.next(run)?;
        let n = batch.iter().filter(|c| c.needs_run()).count();
        if n > 0 {
            if !gauge.wait_for(n, limit, stop) {
                return Ok(());
            }
            dispatcher.push(&mut batch)?;
        }
        for calc in batch {
            if tx.send(Ok(calc)).is_err() {
                return Ok(());
            }
        }
        if !more {
            return Ok(());
        }
    }
}

struct Drainer<'a, Q, P> {
    run: &'a Run,
    queue: &'a Q,
    program: &'a P,
    gauge: &'a Gauge,
    check: &'a Check,
    interrupt: &'a AtomicBool,
    rx: Receiver<Result<Calc, Error>>,

    cur: Vec<Calc>,
    /// outstanding records per submission script
    scripts: HashMap<String, usize>,
    out_of_jobs: bool,
    dump: Dump,
    time: Timer,
    iter: usize,
    since_check: usize,
    /// total time reported by the program
    job_time: f64,
}

impl<'a, Q, P> Drainer<'a, Q, P>
where
    Q: Queue,
    P: Program + Sync,
{
    fn new(
        run: &'a Run,
        queue: &'a Q,
        program: &'a P,
        gauge: &'a Gauge,
        opts: &'a Opts,
        rx: Receiver<Result<Calc, Error>>,
    ) -> Self {
        Self {
            run,
            queue,
            program,
            gauge,
            check: &opts.check,
            interrupt: opts.interrupt,
            rx,
            cur: Vec::new(),
            scripts: HashMap::new(),
            out_of_jobs: false,
            dump: Dump::new(queue.no_del()),
            time: Timer::default(),
            iter: 0,
            since_check: 0,
            job_time: 0.0,
        }
    }

    fn drain(&mut self) -> Result<(), Error> {
        loop {
            match self.pass() {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    if let Check::Some { check_dir, .. } = self.check {
                        if let Err(c) = self.run.checkpoint(check_dir) {
                            log::error!("failed to write checkpoint: {c}");
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    fn finish(self) -> Timer {
        self.dump.shutdown();
        log::info!("total job time: {:.1} s", self.job_time);
        self.time
    }

    /// one sweep over the outstanding records, returning true once everything
    /// is done
    fn pass(&mut self) -> Result<bool, Error> {
        if self.interrupt.load(Ordering::Relaxed) {
            log::warn!("caught signal, stopping");
            return Err(Error::Interrupted);
        }
        let loop_time = Instant::now();
        self.receive()?;

        let mut cur = std::mem::take(&mut self.cur);
        let finished = self.collect(&mut cur);
        self.cur = cur;
        let finished = finished?;

        log::debug!(
            "finished {finished} jobs in {:.1} s",
            loop_time.elapsed().as_secs_f64()
        );
        if self.out_of_jobs && self.cur.is_empty() {
            let remaining = self.run.ledger().remaining();
            if remaining > 0 {
                return Err(LedgerError::Unfinished { remaining }.into());
            }
            return Ok(true);
        }
        self.since_check += finished;
        if let Check::Some {
            check_int,
            check_dir,
        } = self.check
        {
            if *check_int > 0 && self.since_check >= *check_int {
                self.run.checkpoint(check_dir)?;
                self.since_check = 0;
            }
        }
        if finished == 0 {
            self.wait();
        }
        self.iter += 1;
        Ok(false)
    }

    fn receive(&mut self) -> Result<(), Error> {
        while !self.out_of_jobs {
            match self.rx.try_recv() {
                Ok(Ok(calc)) => {
                    if calc.needs_run() {
                        let script = calc.pbs_file.clone();
                        *self.scripts.entry(script).or_default() += 1;
                    }
                    self.cur.push(calc);
                }
                Ok(Err(e)) => return Err(e),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.out_of_jobs = true,
            }
        }
        Ok(())
    }

    /// post every record in `cur` whose value is available and return how
    /// many finished
    fn collect(&mut self, cur: &mut Vec<Calc>) -> Result<usize, Error> {
        let program = self.program;
        let reads: Vec<Option<Result<ProgramResult, ProgramError>>>;
        time!(e, {
            reads = cur
                .par_iter()
                .map(|c| {
                    (c.needs_run() && c.result.is_none())
                        .then(|| program.read_output(&c.name))
                })
                .collect();
        });
        self.time.reading += e;

        let qstat = self.stat(cur, &reads);
        let mut to_remove = Vec::new();
        for (i, (calc, read)) in cur.iter_mut().zip(reads).enumerate() {
            let value = if let Some(v) = calc.result.take() {
                Some(v)
            } else if let Some(slot) = calc.source {
                self.run.cache().status(slot)?.done().map(Value::Energy)
            } else {
                match read {
                    Some(Ok(res)) => {
                        self.job_time += res.time;
                        Some(self.value(res)?)
                    }
                    Some(Err(e)) => {
                        self.failed(calc, e, &qstat)?;
                        None
                    }
                    None => None,
                }
            };
            let Some(value) = value else {
                continue;
            };
            if let (Some(slot), Value::Energy(e)) = (calc.publish, &value) {
                self.run.cache().publish(slot, *e)?;
            }
            self.post(calc, &value)?;
            to_remove.push(i);
        }

        time!(e, {
            // highest index first
            for &i in to_remove.iter().rev() {
                let calc = cur.swap_remove(i);
                if calc.needs_run() {
                    self.gauge.release(1);
                    for f in self.program.associated_files(&calc.name) {
                        self.dump.send(f);
                    }
                    self.release_script(&calc.pbs_file);
                }
            }
        });
        self.time.removing += e;
        Ok(to_remove.len())
    }

    /// Ask the queue which jobs are still around, but only if some output in
    /// `reads` went missing. Jobs are assumed queued if the queue can't say.
    fn stat(
        &self,
        cur: &[Calc],
        reads: &[Option<Result<ProgramResult, ProgramError>>],
    ) -> HashMap<String, bool> {
        let missing = reads
            .iter()
            .any(|r| matches!(r, Some(Err(e)) if !e.is_structured()));
        if !missing {
            return HashMap::new();
        }
        let mut jobs: HashMap<String, bool> = cur
            .iter()
            .filter(|c| c.needs_run())
            .map(|c| (c.job_id.clone(), true))
            .collect();
        if let Err(e) = self.queue.stat(&mut jobs) {
            log::warn!("failed to check queue: {e}");
            jobs.values_mut().for_each(|v| *v = true);
        }
        jobs
    }

    fn value(&self, res: ProgramResult) -> Result<Value, LedgerError> {
        match self.run.mode {
            Mode::Gradients { .. } => {
                let want = self.run.ncoords();
                let g = res.gradient.unwrap_or_default();
                if g.len() != want {
                    return Err(LedgerError::Dimension { want, got: g.len() });
                }
                Ok(Value::Gradient(g))
            }
            _ => Ok(Value::Energy(res.energy)),
        }
    }

    fn post(&self, calc: &Calc, value: &Value) -> Result<(), LedgerError> {
        let mut ledger = self.run.ledger();
        for t in &calc.targets {
            let v = match (value, t.component) {
                (Value::Energy(e), None) => *e,
                (Value::Gradient(g), Some(c)) => {
                    *g.get(c).ok_or(LedgerError::Dimension {
                        want: c + 1,
                        got: g.len(),
                    })?
                }
                (Value::Gradient(g), None) => {
                    return Err(LedgerError::Dimension {
                        want: 1,
                        got: g.len(),
                    });
                }
                (Value::Energy(_), Some(c)) => {
                    return Err(LedgerError::Dimension { want: c + 1, got: 1 });
                }
            };
            ledger.post(t.cell, t.slot, t.coeff * v)?;
        }
        Ok(())
    }

    /// Handle an unreadable output. A failed calculation gets one
    /// resubmission. A missing or blank output only counts once the job has
    /// left the queue.
    fn failed(
        &mut self,
        calc: &mut Calc,
        e: ProgramError,
        qstat: &HashMap<String, bool>,
    ) -> Result<(), Error> {
        if e.is_structured() {
            if calc.redone {
                let (file, line) = match e {
                    ProgramError::ContainsError { file, line }
                    | ProgramError::Sentinel { file, line } => (file, line),
                    e => (calc.name.clone(), e.to_string()),
                };
                return Err(Error::Computation {
                    job_id: calc.job_id.clone(),
                    file,
                    line,
                });
            }
            log::warn!(
                "{} (id={}) failed with `{e}`, resubmitting",
                calc.name,
                calc.job_id
            );
            self.resubmit(calc)?;
            calc.redone = true;
            return Ok(());
        }
        // an unknown status counts as still queued
        if qstat.get(&calc.job_id).copied().unwrap_or(true) {
            return Ok(());
        }
        calc.retries += 1;
        let blank = matches!(e, ProgramError::BlankOutput(_));
        if blank || calc.retries > MAX_RETRIES {
            log::warn!(
                "resubmitting {} (id={}) for `{e}`",
                calc.name,
                calc.job_id
            );
            self.resubmit(calc)?;
        }
        Ok(())
    }

    fn resubmit(&mut self, calc: &mut Calc) -> Result<(), Error> {
        let Resubmit {
            inp_file,
            pbs_file,
            job_id,
        } = self.queue.resubmit(self.program, &calc.name)?;
        for f in self.program.associated_files(&calc.name) {
            self.dump.send(f);
        }
        self.release_script(&calc.pbs_file);
        *self.scripts.entry(pbs_file.clone()).or_default() += 1;
        calc.name = inp_file;
        calc.pbs_file = pbs_file;
        calc.job_id = job_id;
        calc.retries = 0;
        Ok(())
    }

    /// drop one record from `pbs_file`, deleting the script and its output
    /// once nothing is left in it
    fn release_script(&mut self, pbs_file: &str) {
        let Some(count) = self.scripts.get_mut(pbs_file) else {
            log::warn!("failed to find {pbs_file} in submitted scripts");
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.scripts.remove(pbs_file);
            self.dump.send(pbs_file.to_owned());
            self.dump.send(format!("{pbs_file}.out"));
        }
    }

    fn wait(&mut self) {
        let date = jiff::Zoned::now().strftime("%Y-%m-%d %H:%M:%S");
        log::info!(
            "[iter {} {date} {:.1} CPU s] {} jobs remaining",
            self.iter,
            get_cpu_time(),
            self.cur.len()
        );
        let d = Duration::from_secs(self.queue.sleep_int() as u64);
        self.time.sleeping += d;
        if d.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(d);
        }
    }
}
