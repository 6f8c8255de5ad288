use std::{
    sync::{
        Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use jobq::{
    program::{Procedure, Program},
    queue::Queue,
};

use crate::{Error, calc::Calc, drain::timer::Timer, time};

/// The number of submitted jobs whose results have not come back yet.
#[derive(Debug, Default)]
pub struct Gauge {
    count: Mutex<usize>,
    freed: Condvar,
}

impl Gauge {
    pub fn get(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, n: usize) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += n;
    }

    pub fn release(&self, n: usize) {
        let mut count =
            self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(n);
        self.freed.notify_all();
    }

    /// Block until `n` more jobs fit under `limit`. Returns false if `stop`
    /// was raised while waiting.
    pub fn wait_for(&self, n: usize, limit: usize, stop: &AtomicBool) -> bool {
        let mut count =
            self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count + n > limit {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            count = self
                .freed
                .wait_timeout(count, Duration::from_millis(100))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        !stop.load(Ordering::Relaxed)
    }
}

/// Writes the inputs for a batch, wraps them in one submission script, and
/// submits it.
pub struct Dispatcher<'a, Q, P> {
    queue: &'a Q,
    program: &'a P,
    procedure: Procedure,
    gauge: &'a Gauge,
    chunk: usize,
    pub(crate) time: Timer,
}

impl<'a, Q, P> Dispatcher<'a, Q, P>
where
    Q: Queue,
    P: Program,
{
    pub fn new(
        queue: &'a Q,
        program: &'a P,
        procedure: Procedure,
        gauge: &'a Gauge,
    ) -> Self {
        Self {
            queue,
            program,
            procedure,
            gauge,
            chunk: 0,
            time: Timer::default(),
        }
    }

    /// Submit the records in `batch` that need running, stamping each with
    /// its script and job id. Returns how many were submitted.
    pub fn push(&mut self, batch: &mut [Calc]) -> Result<usize, Error> {
        let mut runs: Vec<&mut Calc> =
            batch.iter_mut().filter(|c| c.needs_run()).collect();
        if runs.is_empty() {
            return Ok(0);
        }
        let dir = self.queue.dir();
        let pbs_file = format!("{dir}/main{}.{}", self.chunk, Q::SCRIPT_EXT);
        let mut commands = Vec::with_capacity(runs.len());
        time!(e, {
            for calc in runs.iter_mut() {
                let Some(geom) = &calc.geom else { continue };
                self.program
                    .write_input(&calc.name, geom, self.procedure)
                    .map_err(|err| Error::Input {
                        file: calc.name.clone(),
                        err,
                    })?;
                let cmd = self.queue.program_cmd(self.program, &calc.name);
                commands.push(cmd);
            }
        });
        self.time.writing_input += e;

        time!(e, {
            self.queue.write_submit_script(commands, &pbs_file)?;
        });
        self.time.writing_script += e;

        let job_id;
        time!(e, {
            job_id = self.queue.submit(&pbs_file)?;
        });
        self.time.submitting += e;

        let n = runs.len();
        log::debug!("submitted {pbs_file} as {job_id} with {n} jobs");
        for calc in runs.iter_mut() {
            calc.chunk = Some(self.chunk);
            calc.pbs_file.clone_from(&pbs_file);
            calc.job_id.clone_from(&job_id);
        }
        self.chunk += 1;
        self.gauge.add(runs.len());
        Ok(runs.len())
    }
}
