use super::Context;
use super::Engine;
use super::Strategy;
use super::Summary;
use super::Termination;
use super::dds::Dimensioned;
use crate::Objective;
use crate::Result;
use crate::archive::Entry;
use crate::config::Config;
use crate::config::DdsAuConfig;
use crate::config::DdsConfig;
use crate::record;
use crate::record::Record;
use crate::schedule::Packet;
use std::cell::RefCell;
use std::path::PathBuf;

/// one evaluated candidate of an ensemble search
#[derive(Clone)]
struct Sample {
    x: Vec<f64>,
    f: Objective,
}

/// dds for approximation of uncertainty: an ensemble of independent
/// dds searches with randomized budgets. each search contributes one
/// representative solution, either its best or a uniformly chosen
/// behavioral sample (objective under the threshold).
pub struct Ensemble {
    cfg: DdsAuConfig,
    engine: Engine,
    ctx: Context,
    /// separate stream so representative draws never perturb the
    /// search sequence; randomize on/off leaves the traces identical
    selector: crate::random::Rand,
    chosen: Vec<Sample>,
    behavioral_total: usize,
    reused: usize,
}

impl Ensemble {
    pub fn new(config: &Config, engine: Engine) -> Self {
        let cfg = config.ddsau.clone();
        let budget = cfg.searches * cfg.max_iters;
        let ctx = Context::new(config.seed, budget).with_telescope(config.telescope);
        Self {
            cfg,
            engine,
            ctx,
            selector: crate::random::Rand::new(config.seed.rotate_left(17) ^ 0xA5A5),
            chosen: Vec::new(),
            behavioral_total: 0,
            reused: 0,
        }
    }

    fn n(&self) -> usize {
        self.engine.model().group().len()
    }

    pub(crate) fn behavioral(&self) -> usize {
        self.behavioral_total
    }

    fn search_path(index: usize) -> PathBuf {
        PathBuf::from(format!("search{}.record", index))
    }

    fn dds_cfg(&self, budget: usize) -> DdsConfig {
        DdsConfig {
            r: self.cfg.r,
            budget,
            ..DdsConfig::default()
        }
    }

    /// one internal dds search, returning its full trace. candidates
    /// stream through the fleet when one is attached.
    fn search(&mut self, budget: usize, out: &mut Record) -> Result<Option<Vec<Sample>>> {
        let group = self.engine.model().group().clone();
        let bounds = group.bounds();
        let cfg = self.dds_cfg(budget);
        let init = crate::DDS_MIN_INIT
            .max((crate::DDS_INIT_FRACTION * budget as f64).ceil() as usize)
            .max(self.engine.workers())
            .min(budget);
        let mut trace: Vec<Sample> = Vec::with_capacity(budget);
        // search-local incumbent; the run context keeps the global one
        let mut best: Option<Sample> = None;

        if self.engine.is_parallel() && self.cfg.parallel {
            struct Shared {
                ctx: Context,
                trace: Vec<Sample>,
                best: Option<Sample>,
                sent: Vec<Option<Vec<f64>>>,
            }
            let shared = RefCell::new(Shared {
                ctx: std::mem::replace(&mut self.ctx, Context::new(0, 0)),
                trace,
                best,
                sent: vec![None; init],
            });
            let quit = (|| -> Result<bool> {
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
                        let f = outcome.objective();
                        if let Some(x) = s.sent[i].take() {
                            if f.is_finite() {
                                if s.best.as_ref().map(|b| f <= b.f).unwrap_or(true) {
                                    s.best = Some(Sample { x: x.clone(), f });
                                }
                                s.trace.push(Sample { x, f });
                            }
                        }
                        Ok(())
                    },
                )?;
                if taken < init {
                    return Ok(true);
                }
                let main = budget.saturating_sub(init);
                {
                    let mut s = shared.borrow_mut();
                    s.sent = vec![None; main];
                }
                let fleet = self.engine.fleet_mut().unwrap();
                let taken = fleet.dispatch(
                    main,
                    |i| {
                        let s = &mut *shared.borrow_mut();
                        let pn = {
                            let left = main.max(2) as f64;
                            (1.0 - ((i + 1) as f64).ln() / left.ln()).clamp(0.0, 1.0)
                        };
                        let seed = s
                            .best
                            .as_ref()
                            .map(|b| b.x.clone())
                            .unwrap_or_else(|| s.ctx.rand.point(&bounds));
                        let x = Dimensioned::trial(
                            &mut s.ctx.rand,
                            &mut s.ctx.viols,
                            &group,
                            &seed,
                            pn,
                            &cfg,
                        );
                        s.sent[i] = Some(x.clone());
                        Packet::bare(x)
                    },
                    |i, outcome| {
                        let s = &mut *shared.borrow_mut();
                        s.ctx.count(1);
                        let f = outcome.objective();
                        if let Some(x) = s.sent[i].take() {
                            if f.is_finite() {
                                if s.best.as_ref().map(|b| f <= b.f).unwrap_or(true) {
                                    s.best = Some(Sample { x: x.clone(), f });
                                }
                                s.trace.push(Sample { x, f });
                            }
                        }
                        Ok(())
                    },
                )?;
                Ok(taken < main)
            })();
            let inner = shared.into_inner();
            self.ctx = inner.ctx;
            trace = inner.trace;
            best = inner.best;
            if quit? {
                return Ok(None);
            }
        } else {
            for k in 0..budget {
                if record::quit_requested() {
                    return Ok(None);
                }
                let x = if k < init {
                    self.ctx.rand.point(&bounds)
                } else {
                    let pn = {
                        let left = (budget - init).max(2) as f64;
                        (1.0 - ((k - init + 1) as f64).ln() / left.ln()).clamp(0.0, 1.0)
                    };
                    let seed = best
                        .as_ref()
                        .map(|b| b.x.clone())
                        .unwrap_or_else(|| self.ctx.rand.point(&bounds));
                    let dds_cfg = self.dds_cfg(budget);
                    Dimensioned::trial(
                        &mut self.ctx.rand,
                        &mut self.ctx.viols,
                        &group,
                        &seed,
                        pn,
                        &dds_cfg,
                    )
                };
                let outcome = match self.engine.evaluate(Packet::bare(x.clone()))? {
                    Some(outcome) => outcome,
                    None => return Ok(None),
                };
                self.ctx.count(1);
                let f = outcome.objective();
                if f.is_finite() {
                    if best.as_ref().map(|b| f <= b.f).unwrap_or(true) {
                        best = Some(Sample { x: x.clone(), f });
                    }
                    trace.push(Sample { x, f });
                }
            }
        }
        for (k, sample) in trace.iter().enumerate() {
            out.iteration(k + 1, sample.f, 0.0, &sample.x)?;
        }
        if let Some(b) = &best {
            let (x, f) = (b.x.clone(), b.f);
            self.ctx.improve(&x, f);
        }
        Ok(Some(trace))
    }

    /// pick the representative of one search: its best solution, or
    /// a uniformly drawn behavioral one when randomization is on
    fn represent(&mut self, trace: &[Sample]) -> Option<Sample> {
        let behavioral = trace
            .iter()
            .filter(|s| s.f <= self.cfg.threshold)
            .cloned()
            .collect::<Vec<_>>();
        self.behavioral_total += behavioral.len();
        if self.cfg.randomize && !behavioral.is_empty() {
            let pick = self.selector.index(behavioral.len());
            return Some(behavioral[pick].clone());
        }
        trace
            .iter()
            .min_by(|a, b| a.f.total_cmp(&b.f))
            .cloned()
    }
}

impl Strategy for Ensemble {
    fn name(&self) -> &'static str {
        "dds uncertainty approximation"
    }

    fn initialize(&mut self) -> Result<()> {
        if self.cfg.searches == 0 {
            return Err(crate::Error::Config(
                "ensemble needs at least one search".to_string(),
            ));
        }
        if self.cfg.parallel && !self.engine.is_parallel() {
            return Err(crate::Error::Scheduler(
                "parallel ensemble searches need a worker fleet".to_string(),
            ));
        }
        Ok(())
    }

    fn warm_start(&mut self) -> Result<bool> {
        // per-search reuse below covers resumption
        Ok(false)
    }

    fn optimize(&mut self) -> Result<Summary> {
        let n = self.n();
        let mut termination = Termination::Budget;
        let progress = crate::progress(self.cfg.searches);
        for index in 0..self.cfg.searches {
            progress.inc(1);
            if record::quit_requested() {
                termination = Termination::Quit;
                break;
            }
            let path = Self::search_path(index);
            if path.exists() {
                if self.cfg.revise {
                    // prior trace is reused in place of re-evaluation
                    if let Some(rows) = record::read_trace(&path, n) {
                        let trace = rows
                            .into_iter()
                            .map(|r| Sample { x: r.x, f: r.best })
                            .collect::<Vec<_>>();
                        for sample in &trace {
                            let (x, f) = (sample.x.clone(), sample.f);
                            self.ctx.improve(&x, f);
                        }
                        if let Some(pick) = self.represent(&trace) {
                            self.chosen.push(pick);
                        }
                        self.reused += 1;
                        continue;
                    }
                }
                std::fs::remove_file(&path)?;
            }
            let budget = self.cfg.min_iters
                + (self.ctx.rand.uniform()
                    * (self.cfg.max_iters - self.cfg.min_iters + 1) as f64)
                    as usize;
            let budget = budget.min(self.cfg.max_iters);
            let mut out = Record::at(&path)?;
            match self.search(budget, &mut out)? {
                Some(trace) => {
                    if let Some(pick) = self.represent(&trace) {
                        self.chosen.push(pick);
                    }
                }
                None => {
                    termination = Termination::Quit;
                    break;
                }
            }
        }
        progress.finish_and_clear();
        self.engine.model_mut().set_counter(self.ctx.evals);
        self.engine.model_mut().save_best(0);
        let front = self
            .chosen
            .iter()
            .map(|s| Entry::new(s.x.clone(), vec![s.f]))
            .collect::<Vec<_>>();
        Ok(Summary {
            best_x: self.ctx.best_x.clone(),
            best_f: self.ctx.best_f,
            front,
            evals: self.ctx.evals,
            termination,
        })
    }

    fn write_metrics(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        writeln!(out, "Algorithm               : {}", self.name())?;
        writeln!(out, "Searches                : {}", self.cfg.searches)?;
        writeln!(out, "Reused Searches         : {}", self.reused)?;
        writeln!(out, "Behavioral Threshold    : {:.6E}", self.cfg.threshold)?;
        writeln!(out, "Behavioral Samples      : {}", self.behavioral_total)?;
        writeln!(out, "Representatives         : {}", self.chosen.len())?;
        writeln!(out, "Evaluations             : {}", self.ctx.evals)?;
        writeln!(out, "Best Objective          : {:.6E}", self.ctx.best_f)?;
        Ok(())
    }
}
