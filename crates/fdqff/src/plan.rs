//! Lazy enumeration of single points. The [Plan] walks derivative tuples in a
//! fixed order, opens their ledger cells, and hands out records a batch at a
//! time so that memory stays bounded by the batch size rather than the size
//! of the force field.

use std::collections::VecDeque;

use jobq::geom::Geom;

use crate::{
    Error, Reuse,
    cache::Lookup,
    calc::{Calc, Target, Value},
    index::index,
    ledger::{Array, CellRef, Touch},
    run::{Mode, Run},
    stencil::{Derivative, Proto, canonical},
};

/// A source of single-point records.
pub trait Generator: Send {
    /// The next batch and whether more follow. Each batch holds at most one
    /// chunk of records that need running, along with any records that can be
    /// completed without running anything.
    fn next(&mut self, run: &Run) -> Result<(Vec<Calc>, bool), Error>;
}

/// Nested loop counters `n ≥ i ≥ j ≥ k ≥ l`. A zero in `j`, `k`, or `l` drops
/// that index from the tuple.
#[derive(Clone, Copy, Debug)]
struct Cursor {
    i: usize,
    j: usize,
    k: usize,
    l: usize,
    n: usize,
    jmin: usize,
    jmax: usize,
    kmax: usize,
    lmax: usize,
}

impl Cursor {
    fn new(
        n: usize,
        jmin: usize,
        jmax: usize,
        kmax: usize,
        lmax: usize,
    ) -> Self {
        Self {
            i: 1,
            j: jmin,
            k: 0,
            l: 0,
            n,
            jmin,
            jmax,
            kmax,
            lmax,
        }
    }

    /// pairs, triples, and quadruples of coordinates
    fn energies(n: usize, deriv: usize) -> Self {
        let kmax = if deriv >= 3 { n } else { 0 };
        let lmax = if deriv >= 4 { n } else { 0 };
        Self::new(n, 1, n, kmax, lmax)
    }

    /// singles, pairs, and triples, one order below the force constants
    fn gradients(n: usize, deriv: usize) -> Self {
        let jmax = if deriv >= 3 { n } else { 0 };
        let kmax = if deriv >= 4 { n } else { 0 };
        Self::new(n, 0, jmax, kmax, 0)
    }

    fn points(n: usize) -> Self {
        Self::new(n, 0, 0, 0, 0)
    }
}

impl Iterator for Cursor {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.i > self.n {
            return None;
        }
        let ret = [self.i, self.j, self.k, self.l]
            .into_iter()
            .take_while(|&x| x > 0)
            .collect();
        self.l += 1;
        if self.l > self.k.min(self.lmax) {
            self.l = 0;
            self.k += 1;
            if self.k > self.j.min(self.kmax) {
                self.k = 0;
                self.j += 1;
                if self.j > self.i.min(self.jmax) {
                    self.j = self.jmin;
                    self.i += 1;
                }
            }
        }
        Some(ret)
    }
}

pub struct Plan {
    cursor: Cursor,
    pending: VecDeque<Calc>,
    /// records in `pending` that need running
    queued: usize,
    chunk_size: usize,
    dir: String,
    prefix: String,
    counter: usize,
    exhausted: bool,
}

impl Plan {
    /// Walk every tuple `run` needs, naming inputs `dir/job.NNNNNNNNNN`.
    pub fn new(run: &Run, dir: &str, chunk_size: usize) -> Self {
        let n = run.ncoords();
        let cursor = match run.mode {
            Mode::Energies { deriv } => Cursor::energies(n, deriv),
            Mode::Gradients { deriv } => Cursor::gradients(n, deriv),
            Mode::Points => Cursor::points(run.points.len()),
        };
        Self {
            cursor,
            pending: VecDeque::new(),
            queued: 0,
            chunk_size: chunk_size.max(1),
            dir: dir.to_owned(),
            prefix: String::from("job"),
            counter: 0,
            exhausted: false,
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_owned();
        self
    }

    fn name(&self) -> String {
        format!("{}/{}.{:010}", self.dir, self.prefix, self.counter)
    }

    fn push(&mut self, calc: Calc) {
        if calc.needs_run() {
            self.queued += 1;
        }
        self.pending.push_back(calc);
    }

    /// a record to run `geom` for `targets`
    fn run(&mut self, geom: Geom, targets: Vec<Target>, scale: f64) -> Calc {
        let name = self.name();
        self.counter += 1;
        Calc {
            name,
            geom: Some(geom),
            targets,
            scale,
            ..Calc::default()
        }
    }

    /// Queue `geom`, sharing it through the cache when `key` is set.
    fn place(
        &mut self,
        run: &Run,
        geom: Geom,
        key: Option<(String, Option<(isize, isize)>)>,
        targets: Vec<Target>,
        scale: f64,
    ) {
        let Some((key, pair)) = key else {
            let calc = self.run(geom, targets, scale);
            self.push(calc);
            return;
        };
        let name = self.name();
        let lookup = run.cache().lookup(key, &name, pair);
        let calc = match lookup {
            Lookup::Reserved(slot) => Calc {
                publish: Some(slot),
                ..self.run(geom, targets, scale)
            },
            Lookup::Pending(slot) => Calc {
                name: run.cache().name(slot).unwrap_or_default().to_owned(),
                source: Some(slot),
                targets,
                scale,
                ..Calc::default()
            },
            Lookup::Done(v) => Calc {
                name: String::from("cached"),
                result: Some(Value::Energy(v)),
                targets,
                scale,
                ..Calc::default()
            },
        };
        self.push(calc);
    }

    /// Queue one record per stencil term. `targets` builds the targets for a
    /// given term and slot, and `e0` stands in for the undisplaced point.
    fn terms(
        &mut self,
        run: &Run,
        protos: Vec<Proto>,
        e0: Value,
        targets: impl Fn(&Proto, usize) -> Vec<Target>,
    ) -> Result<(), Error> {
        for (slot, p) in protos.iter().enumerate() {
            let targets = targets(p, slot);
            if p.is_e0() {
                self.push(Calc {
                    name: String::from("E0"),
                    targets,
                    scale: p.scale,
                    result: Some(e0.clone()),
                    ..Calc::default()
                });
                continue;
            }
            let geom = run.displaced(&p.steps)?;
            let key = run.reuse.fingerprints(p.steps.len()).then(|| {
                let pair = match canonical(&p.steps)[..] {
                    [a, b] => Some((a, b)),
                    _ => None,
                };
                (run.key(&geom), pair)
            });
            self.place(run, geom, key, targets, p.scale);
        }
        Ok(())
    }

    fn energies(&mut self, run: &Run, tuple: &[usize]) -> Result<(), Error> {
        let protos = run.stencil.emit(tuple)?;
        let array = match tuple.len() {
            2 => Array::Fc2,
            3 => Array::Fc3,
            _ => Array::Fc4,
        };
        let mut cells = Vec::new();
        {
            let mut ledger = run.ledger();
            for off in index(run.ncoords(), false, tuple)? {
                let cell = CellRef::new(array, off);
                if ledger.touch(cell, protos.len(), protos[0].scale)?
                    == Touch::Open
                {
                    cells.push(cell);
                }
            }
        }
        if cells.is_empty() {
            return Ok(());
        }
        self.terms(run, protos, Value::Energy(run.e0), |p, slot| {
            cells
                .iter()
                .map(|&cell| Target {
                    cell,
                    coeff: p.coeff,
                    slot,
                    component: None,
                })
                .collect()
        })
    }

    /// Each tuple differentiates every gradient component `g` no larger than
    /// its smallest index, or all of them for single coordinates.
    fn gradients(&mut self, run: &Run, tuple: &[usize]) -> Result<(), Error> {
        let n = run.ncoords();
        let protos = run.stencil.emit(tuple)?;
        let (array, gmax) = match tuple {
            [_] => (Array::Fc2, n),
            [_, j] => (Array::Fc3, *j),
            [.., k] => (Array::Fc4, *k),
            [] => return Ok(()),
        };
        let mut cells = Vec::new();
        {
            let mut ledger = run.ledger();
            for g in 1..=gmax {
                let mut id = tuple.to_vec();
                id.push(g);
                for off in index(n, tuple.len() == 1, &id)? {
                    let cell = CellRef::new(array, off);
                    if ledger.touch(cell, protos.len(), protos[0].scale)?
                        == Touch::Open
                    {
                        cells.push((cell, g - 1));
                    }
                }
            }
        }
        if cells.is_empty() {
            return Ok(());
        }
        self.terms(run, protos, Value::Gradient(vec![0.0; n]), |p, slot| {
            cells
                .iter()
                .map(|&(cell, g)| Target {
                    cell,
                    coeff: p.coeff,
                    slot,
                    component: Some(g),
                })
                .collect()
        })
    }

    fn point(&mut self, run: &Run, i: usize) -> Result<(), Error> {
        let cell = CellRef::new(Array::Energies, i);
        if run.ledger().touch(cell, 1, 1.0)? == Touch::Loaded {
            return Ok(());
        }
        let geom = run.points[i].clone();
        let key = (run.reuse == Reuse::Full).then(|| (run.key(&geom), None));
        let target = Target {
            cell,
            coeff: 1.0,
            slot: 0,
            component: None,
        };
        self.place(run, geom, key, vec![target], 1.0);
        Ok(())
    }
}

impl Generator for Plan {
    fn next(&mut self, run: &Run) -> Result<(Vec<Calc>, bool), Error> {
        while self.queued < self.chunk_size && !self.exhausted {
            let Some(tuple) = self.cursor.next() else {
                self.exhausted = true;
                break;
            };
            match run.mode {
                Mode::Energies { .. } => self.energies(run, &tuple)?,
                Mode::Gradients { .. } => self.gradients(run, &tuple)?,
                Mode::Points => self.point(run, tuple[0] - 1)?,
            }
        }
        let mut batch = Vec::new();
        let mut taken = 0;
        while let Some(calc) = self.pending.pop_front() {
            if calc.needs_run() {
                if taken == self.chunk_size {
                    self.pending.push_front(calc);
                    break;
                }
                taken += 1;
            }
            batch.push(calc);
        }
        self.queued -= taken;
        Ok((batch, !(self.exhausted && self.pending.is_empty())))
    }
}

/// Run `plan` to completion without submitting anything, returning the
/// number of records that would need running.
pub fn count<G: Generator>(run: &Run, mut plan: G) -> Result<usize, Error> {
    let mut ret = 0;
    loop {
        let (batch, more) = plan.next(run)?;
        ret += batch.iter().filter(|c| c.needs_run()).count();
        if !more {
            return Ok(ret);
        }
    }
}
