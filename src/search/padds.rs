use super::Context;
use super::Engine;
use super::Strategy;
use super::Summary;
use super::Termination;
use crate::Result;
use crate::archive::Archive;
use crate::archive::Dedup;
use crate::archive::Entry;
use crate::archive::Fate;
use crate::archive::Metric;
use crate::config::Config;
use crate::config::PaddsConfig;
use crate::config::Perturbation;
use crate::params::Group;
use crate::record;
use crate::record::Record;
use crate::schedule::Packet;
use std::cell::RefCell;

/// pareto-archived dynamically dimensioned search. single-trajectory
/// dds moves around a member of the non-dominated front chosen by
/// the selection metric; the archive absorbs every evaluation.
pub struct ParetoDimensioned {
    cfg: PaddsConfig,
    engine: Engine,
    ctx: Context,
    archive: Archive,
    selected: Option<Entry>,
    fronts_written: usize,
}

impl ParetoDimensioned {
    pub fn new(config: &Config, engine: Engine) -> Self {
        let cfg = config.padds.clone();
        let ctx = Context::new(config.seed, cfg.budget).with_telescope(config.telescope);
        Self {
            cfg,
            engine,
            ctx,
            archive: Archive::new(Dedup::Reject),
            selected: None,
            fronts_written: 0,
        }
    }

    fn init_count(&self) -> usize {
        let serial = crate::DDS_MIN_INIT
            .max((crate::DDS_INIT_FRACTION * self.cfg.budget as f64).ceil() as usize);
        serial.max(self.engine.workers()).min(self.cfg.budget)
    }

    fn pn(k: usize, left: usize) -> f64 {
        let left = left.max(2) as f64;
        (1.0 - (k as f64).ln() / left.ln()).clamp(0.0, 1.0)
    }

    /// dds move around the selected front member, telescoping toward it
    fn trial(ctx: &mut Context, group: &Group, around: &[f64], r: f64, pn: f64) -> Vec<f64> {
        let n = group.len();
        let mut x = around.to_vec();
        let mut perturbed = 0;
        for j in 0..n {
            if ctx.rand.uniform() < pn {
                x[j] = super::dds::neighbor(
                    &mut ctx.rand,
                    around[j],
                    group.param(j),
                    r,
                    Perturbation::Standard,
                    1.0,
                    &mut ctx.viols,
                );
                perturbed += 1;
            }
        }
        if perturbed == 0 {
            let j = ctx.rand.index(n);
            x[j] = super::dds::neighbor(
                &mut ctx.rand,
                around[j],
                group.param(j),
                r,
                Perturbation::Standard,
                1.0,
                &mut ctx.viols,
            );
        }
        let a = ctx.fraction();
        for j in 0..n {
            let p = group.param(j);
            x[j] = ctx
                .telescope
                .correct(a, p.lwr(), p.upr(), around[j], x[j], &mut ctx.viols);
        }
        x
    }

    /// absorb one evaluated candidate, steering the next selection by
    /// the dominance relation against the member it was bred from
    fn assimilate(
        archive: &mut Archive,
        selected: &mut Option<Entry>,
        metric: Metric,
        ctx: &mut Context,
        x: Vec<f64>,
        f: Vec<f64>,
        out: &mut Record,
        written: &mut usize,
    ) -> Result<()> {
        if f.iter().any(|v| !v.is_finite()) {
            return Ok(());
        }
        match archive.insert(x.clone(), f.clone()) {
            Fate::Duplicate => {} // keep breeding from the current member
            Fate::NonDominated => {
                archive.weigh(metric, &mut ctx.rand);
                *selected = Some(Entry::new(x, f));
                out.front(ctx.evals, archive.front())?;
                *written += 1;
            }
            Fate::Dominated => {
                // bred candidate lost; breed from a fresh selection
                archive.weigh(metric, &mut ctx.rand);
                let pick = archive.select(&mut ctx.rand);
                *selected = pick.map(|i| archive.front()[i].clone());
            }
        }
        Ok(())
    }

    fn optimize_serial(&mut self, out: &mut Record) -> Result<Termination> {
        let group = self.engine.model().group().clone();
        let bounds = group.bounds();
        let init = self.init_count();
        for _ in 0..init {
            if record::quit_requested() {
                return Ok(Termination::Quit);
            }
            let x = self.ctx.rand.point(&bounds);
            let outcome = match self.engine.evaluate(Packet::bare(x.clone()))? {
                Some(outcome) => outcome,
                None => return Ok(Termination::Quit),
            };
            self.ctx.count(1);
            Self::assimilate(
                &mut self.archive,
                &mut self.selected,
                self.cfg.metric,
                &mut self.ctx,
                x,
                outcome.f,
                out,
                &mut self.fronts_written,
            )?;
        }
        // breed from a metric-weighted selection once the front exists
        self.archive.weigh(self.cfg.metric, &mut self.ctx.rand);
        if self.selected.is_none() {
            let pick = self.archive.select(&mut self.ctx.rand);
            self.selected = pick.map(|i| self.archive.front()[i].clone());
        }
        let main = self.cfg.budget.saturating_sub(self.ctx.evals);
        for k in 1..=main {
            if record::quit_requested() {
                return Ok(Termination::Quit);
            }
            let Some(seed) = self.selected.clone() else {
                return Ok(Termination::Budget);
            };
            let pn = Self::pn(k, main);
            let x = Self::trial(&mut self.ctx, &group, &seed.x, self.cfg.r, pn);
            let outcome = match self.engine.evaluate(Packet::bare(x.clone()))? {
                Some(outcome) => outcome,
                None => return Ok(Termination::Quit),
            };
            self.ctx.count(1);
            Self::assimilate(
                &mut self.archive,
                &mut self.selected,
                self.cfg.metric,
                &mut self.ctx,
                x,
                outcome.f,
                out,
                &mut self.fronts_written,
            )?;
        }
        Ok(Termination::Budget)
    }

    /// fleet-dispatched variant: candidates bred from the selection
    /// current at send time, archive updated in assimilation order
    fn optimize_parallel(&mut self, out: &mut Record) -> Result<Termination> {
        let group = self.engine.model().group().clone();
        let bounds = group.bounds();
        let init = self.init_count();
        let main = self.cfg.budget.saturating_sub(init);
        let metric = self.cfg.metric;
        let r = self.cfg.r;

        struct Shared<'a> {
            ctx: Context,
            archive: Archive,
            selected: Option<Entry>,
            sent: Vec<Option<Vec<f64>>>,
            out: &'a mut Record,
            written: usize,
        }
        let shared = RefCell::new(Shared {
            ctx: std::mem::replace(&mut self.ctx, Context::new(0, 0)),
            archive: std::mem::replace(&mut self.archive, Archive::new(Dedup::Reject)),
            selected: self.selected.take(),
            sent: vec![None; init],
            out,
            written: self.fronts_written,
        });
        let result: Result<Termination> = (|| {
            let fleet = self.engine.fleet_mut().unwrap();
            let taken = fleet.dispatch(
                init,
                |i| {
                    let mut s = shared.borrow_mut();
                    let x = s.ctx.rand.point(&bounds);
                    s.sent[i] = Some(x.clone());
                    Packet::bare(x)
                },
                |i, outcome| {
                    let s = &mut *shared.borrow_mut();
                    s.ctx.count(1);
                    if let Some(x) = s.sent[i].take() {
                        Self::assimilate(
                            &mut s.archive,
                            &mut s.selected,
                            metric,
                            &mut s.ctx,
                            x,
                            outcome.f,
                            s.out,
                            &mut s.written,
                        )?;
                    }
                    Ok(())
                },
            )?;
            if taken < init {
                return Ok(Termination::Quit);
            }
            {
                let s = &mut *shared.borrow_mut();
                s.archive.weigh(metric, &mut s.ctx.rand);
                if s.selected.is_none() {
                    let pick = s.archive.select(&mut s.ctx.rand);
                    s.selected = pick.map(|i| s.archive.front()[i].clone());
                }
                s.sent = vec![None; main];
            }
            let fleet = self.engine.fleet_mut().unwrap();
            let taken = fleet.dispatch(
                main,
                |i| {
                    let s = &mut *shared.borrow_mut();
                    let seed = match &s.selected {
                        Some(seed) => seed.x.clone(),
                        None => s.ctx.rand.point(&bounds),
                    };
                    let pn = Self::pn(i + 1, main);
                    let x = Self::trial(&mut s.ctx, &group, &seed, r, pn);
                    s.sent[i] = Some(x.clone());
                    Packet::bare(x)
                },
                |i, outcome| {
                    let s = &mut *shared.borrow_mut();
                    s.ctx.count(1);
                    if let Some(x) = s.sent[i].take() {
                        Self::assimilate(
                            &mut s.archive,
                            &mut s.selected,
                            metric,
                            &mut s.ctx,
                            x,
                            outcome.f,
                            s.out,
                            &mut s.written,
                        )?;
                    }
                    Ok(())
                },
            )?;
            if taken < main {
                return Ok(Termination::Quit);
            }
            Ok(Termination::Budget)
        })();
        let inner = shared.into_inner();
        self.ctx = inner.ctx;
        self.archive = inner.archive;
        self.selected = inner.selected;
        self.fronts_written = inner.written;
        result
    }
}

impl Strategy for ParetoDimensioned {
    fn name(&self) -> &'static str {
        "pareto archived dds"
    }

    fn initialize(&mut self) -> Result<()> {
        if self.engine.model().objectives() < 2 {
            return Err(crate::Error::Config(
                "pareto search needs at least two objectives".to_string(),
            ));
        }
        Ok(())
    }

    fn warm_start(&mut self) -> Result<bool> {
        // multi-objective records carry the whole front; a fresh run
        // re-discovers it quickly, so resume is not supported here
        Ok(false)
    }

    fn optimize(&mut self) -> Result<Summary> {
        let mut out = Record::create(0)?;
        let termination = if self.engine.is_parallel() {
            self.optimize_parallel(&mut out)?
        } else {
            self.optimize_serial(&mut out)?
        };
        self.engine.model_mut().set_counter(self.ctx.evals);
        let front = self.archive.front().to_vec();
        let best = front
            .iter()
            .min_by(|a, b| a.f[0].total_cmp(&b.f[0]))
            .map(|e| (e.x.clone(), e.f[0]))
            .unwrap_or((Vec::new(), f64::INFINITY));
        Ok(Summary {
            best_x: best.0,
            best_f: best.1,
            front,
            evals: self.ctx.evals,
            termination,
        })
    }

    fn write_metrics(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        writeln!(out, "Algorithm               : {}", self.name())?;
        writeln!(out, "Perturbation Value      : {}", self.cfg.r)?;
        writeln!(out, "Max Iterations          : {}", self.cfg.budget)?;
        writeln!(out, "Evaluations             : {}", self.ctx.evals)?;
        writeln!(out, "Archive Inserts         : {}", self.archive.inserts())?;
        writeln!(out, "Non-Dominated Size      : {}", self.archive.front().len())?;
        writeln!(out, "Dominated Size          : {}", self.archive.dominated().len())?;
        writeln!(out, "Front Revisions         : {}", self.fronts_written)?;
        writeln!(out, "Bound Violations        : {}", self.ctx.viols.total())?;
        Ok(())
    }
}
