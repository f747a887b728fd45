use super::Context;
use super::Engine;
use super::Strategy;
use super::Summary;
use super::Termination;
use crate::Result;
use crate::config::Config;
use crate::config::DdsConfig;
use crate::config::Perturbation;
use crate::params::Descriptor;
use crate::params::Violations;
use crate::params::bounds;
use crate::random::Rand;
use crate::record;
use crate::record::PnTrace;
use crate::record::Record;
use crate::schedule::Packet;
use std::cell::RefCell;

/// one-dimensional neighborhood move of the dimensioned searches.
/// the standard variant is the gaussian neighborhood; the other two
/// are the deterministic scaling and integer-truncation alternates.
pub(crate) fn neighbor(
    rand: &mut Rand,
    cur: f64,
    d: &Descriptor,
    r: f64,
    variant: Perturbation,
    beta: f64,
    viols: &mut Violations,
) -> f64 {
    match variant {
        Perturbation::NoRand => bounds::reflect(cur * beta, d.lwr(), d.upr(), viols),
        Perturbation::TryInt => bounds::reflect(cur.trunc(), d.lwr(), d.upr(), viols),
        Perturbation::Standard => bounds::perturb(rand, cur, d, r, viols),
    }
}

/// dynamically dimensioned search. greedy single-trajectory search
/// whose perturbation dimensionality decays with the budget; the
/// parallel variant streams candidates through the fleet, generating
/// each one from the incumbent at send time.
pub struct Dimensioned {
    cfg: DdsConfig,
    engine: Engine,
    ctx: Context,
    seeds: Vec<Vec<f64>>,
    resumed: bool,
    iterations: usize,
}

impl Dimensioned {
    pub fn new(config: &Config, engine: Engine) -> Self {
        let cfg = config.dds.clone();
        let ctx = Context::new(config.seed, cfg.budget).with_telescope(config.telescope);
        Self {
            cfg,
            engine,
            ctx,
            seeds: config.init_params.clone(),
            resumed: false,
            iterations: 0,
        }
    }

    fn n(&self) -> usize {
        self.engine.model().group().len()
    }

    /// initialization size: a sliver of the budget in serial, at
    /// least one per worker in parallel
    fn init_count(&self) -> usize {
        let serial = crate::DDS_MIN_INIT
            .max((crate::DDS_INIT_FRACTION * self.cfg.budget as f64).ceil() as usize);
        serial.max(self.engine.workers())
    }

    /// the candidate evaluated first: warm-start record, then a user
    /// seed row, then the group's current estimates, then random
    fn first_candidate(&mut self, bounds: &[(f64, f64)]) -> Vec<f64> {
        if self.resumed {
            return self.ctx.best_x.clone();
        }
        if let Some(row) = self.seeds.first() {
            return row.clone();
        }
        if self.cfg.use_initial {
            return self.engine.model().group().values();
        }
        self.ctx.rand.point(bounds)
    }

    /// perturbation-dimension probability at main-phase iteration k
    /// of `left` total; the parallel clamp forces full-dimensional
    /// moves for the first 2W dispatches
    fn pn(&self, k: usize, left: usize) -> f64 {
        if self.cfg.variant == Perturbation::NoRand {
            return self.cfg.alpha;
        }
        let warmup = 2 * self.engine.workers();
        if warmup > 0 && k <= warmup {
            return 1.0;
        }
        let k = (k - warmup) as f64;
        let left = (left.saturating_sub(warmup)).max(2) as f64;
        (1.0 - k.ln() / left.ln()).clamp(0.0, 1.0)
    }

    /// build a trial by perturbing the incumbent in a random subset
    /// of dimensions, at least one
    pub(crate) fn trial(
        rand: &mut Rand,
        viols: &mut Violations,
        group: &crate::params::Group,
        best: &[f64],
        pn: f64,
        cfg: &DdsConfig,
    ) -> Vec<f64> {
        let n = group.len();
        let mut candidate = best.to_vec();
        let mut perturbed = 0;
        for j in 0..n {
            if rand.uniform() < pn {
                candidate[j] = neighbor(
                    rand,
                    best[j],
                    group.param(j),
                    cfg.r,
                    cfg.variant,
                    cfg.beta,
                    viols,
                );
                perturbed += 1;
            }
        }
        if perturbed == 0 {
            let j = rand.index(n);
            candidate[j] = neighbor(
                rand,
                best[j],
                group.param(j),
                cfg.r,
                cfg.variant,
                cfg.beta,
                viols,
            );
        }
        candidate
    }

    /// uniform-random initialization, keeping the best
    fn initialize_serial(&mut self, out: &mut Record) -> Result<Option<Termination>> {
        let bounds = self.engine.model().group().bounds();
        let count = self
            .init_count()
            .min(self.cfg.budget.saturating_sub(self.ctx.evals));
        for i in 0..count {
            if record::quit_requested() {
                return Ok(Some(Termination::Quit));
            }
            let mut x = if i == 0 {
                self.first_candidate(&bounds)
            } else {
                self.ctx.rand.point(&bounds)
            };
            // overflowed objectives are re-sampled in place during
            // initialization
            let mut f = f64::INFINITY;
            for _ in 0..100 {
                let packet = self.packet(x.clone());
                let outcome = match self.engine.evaluate(packet)? {
                    Some(outcome) => outcome,
                    None => return Ok(Some(Termination::Quit)),
                };
                self.ctx.count(1);
                f = outcome.objective();
                if f.is_finite() {
                    break;
                }
                x = self.ctx.rand.point(&bounds);
            }
            self.accept(&x, f);
            out.iteration(self.ctx.evals, self.ctx.best_f, 1.0, &self.ctx.best_x.clone())?;
        }
        Ok(None)
    }

    fn packet(&self, x: Vec<f64>) -> Packet {
        if self.ctx.best_x.is_empty() {
            Packet::bare(x)
        } else {
            Packet::advised(x, self.ctx.best_f, Vec::new())
        }
    }

    /// greedy acceptance: ties move the incumbent point but the best
    /// objective never rises
    fn accept(&mut self, x: &[f64], f: f64) -> bool {
        if f.is_finite() && f <= self.ctx.best_f {
            self.ctx.record(x, f);
            true
        } else {
            false
        }
    }

    fn optimize_serial(&mut self, out: &mut Record) -> Result<Termination> {
        if let Some(quit) = self.initialize_serial(out)? {
            return Ok(quit);
        }
        let mut trace = PnTrace::create()?;
        let group = self.engine.model().group().clone();
        let left = self.cfg.budget.saturating_sub(self.ctx.evals);
        for k in 1..=left {
            if record::quit_requested() {
                return Ok(Termination::Quit);
            }
            let pn = self.pn(k, left);
            let mut candidate = Self::trial(
                &mut self.ctx.rand,
                &mut self.ctx.viols,
                &group,
                &self.ctx.best_x.clone(),
                pn,
                &self.cfg,
            );
            self.ctx.telescope(&group, &mut candidate);
            let packet = self.packet(candidate.clone());
            let outcome = match self.engine.evaluate(packet)? {
                Some(outcome) => outcome,
                None => return Ok(Termination::Quit),
            };
            self.ctx.count(1);
            self.iterations += 1;
            trace.append(self.ctx.evals, pn)?;
            self.accept(&candidate, outcome.objective());
            out.iteration(self.ctx.evals, self.ctx.best_f, pn, &self.ctx.best_x.clone())?;
            if self.cfg.debug {
                log::debug!("iter {:>6}  pn {:.4}  best {:.6E}", k, pn, self.ctx.best_f);
            }
        }
        Ok(Termination::Budget)
    }

    /// fleet-dispatched variant: candidates are generated from the
    /// incumbent at send time, results assimilated by assignment.
    /// every random draw happens on the master, inside the dispatch
    /// callbacks, so synchronous receive reproduces the sequence.
    fn optimize_parallel(&mut self, out: &mut Record) -> Result<Termination> {
        let group = self.engine.model().group().clone();
        let bounds = group.bounds();
        let total = self.cfg.budget.saturating_sub(self.ctx.evals);
        let init = self.init_count().min(total);
        let first = self.first_candidate(&bounds);
        let cfg = self.cfg.clone();
        let warmup = 2 * self.engine.workers();

        let shared = RefCell::new(Shared {
            ctx: std::mem::replace(&mut self.ctx, Context::new(0, 0)),
            sent: Vec::new(),
            out,
        });
        let result: Result<Termination> = (|| {
            // initialization sweep, topped up while overflow persists
            let mut pending = init;
            let mut fresh = true;
            for _ in 0..100 {
                shared.borrow_mut().sent = vec![None; pending];
                let fleet = self.engine.fleet_mut().unwrap();
                let taken = fleet.dispatch(
                    pending,
                    |i| {
                        let mut s = shared.borrow_mut();
                        let x = if fresh && i == 0 {
                            first.clone()
                        } else {
                            s.ctx.rand.point(&bounds)
                        };
                        s.sent[i] = Some((x.clone(), 1.0));
                        Packet::bare(x)
                    },
                    |i, outcome| {
                        let mut s = shared.borrow_mut();
                        s.ctx.count(1);
                        let f = outcome.objective();
                        let x = s.sent[i].take().map(|(x, _)| x);
                        if let Some(x) = x {
                            if f.is_finite() && f <= s.ctx.best_f {
                                s.ctx.record(&x, f);
                            }
                            if !f.is_finite() {
                                return Ok(());
                            }
                        }
                        let (evals, best_f) = (s.ctx.evals, s.ctx.best_f);
                        let best_x = s.ctx.best_x.clone();
                        s.out.iteration(evals, best_f, 1.0, &best_x)?;
                        Ok(())
                    },
                )?;
                if taken < pending {
                    return Ok(Termination::Quit);
                }
                if shared.borrow().ctx.best_f.is_finite() {
                    break;
                }
                // every initialization result overflowed; sample anew
                pending = pending.min(self.engine.workers().max(1));
                fresh = false;
            }

            // search phase: one candidate per remaining evaluation
            let spent = init;
            let main = total.saturating_sub(spent);
            if main == 0 {
                return Ok(Termination::Budget);
            }
            {
                let mut s = shared.borrow_mut();
                s.sent = vec![None; main];
            }
            let mut trace = PnTrace::create()?;
            let mut iterations = 0usize;
            let fleet = self.engine.fleet_mut().unwrap();
            let taken = fleet.dispatch(
                main,
                |i| {
                    let mut s = shared.borrow_mut();
                    let k = i + 1;
                    let pn = if cfg.variant == Perturbation::NoRand {
                        cfg.alpha
                    } else if k <= warmup {
                        1.0
                    } else {
                        let num = ((k - warmup) as f64).ln();
                        let den = ((main.saturating_sub(warmup)).max(2) as f64).ln();
                        (1.0 - num / den).clamp(0.0, 1.0)
                    };
                    let _ = trace.append(k, pn);
                    let best = s.ctx.best_x.clone();
                    let s = &mut *s;
                    let mut x =
                        Self::trial(&mut s.ctx.rand, &mut s.ctx.viols, &group, &best, pn, &cfg);
                    s.ctx.telescope(&group, &mut x);
                    s.sent[i] = Some((x.clone(), pn));
                    Packet::advised(x, s.ctx.best_f, Vec::new())
                },
                |i, outcome| {
                    let mut s = shared.borrow_mut();
                    s.ctx.count(1);
                    iterations += 1;
                    let f = outcome.objective();
                    if let Some((x, pn)) = s.sent[i].take() {
                        if f.is_finite() && f <= s.ctx.best_f {
                            s.ctx.record(&x, f);
                        }
                        let (evals, best_f) = (s.ctx.evals, s.ctx.best_f);
                        let best_x = s.ctx.best_x.clone();
                        s.out.iteration(evals, best_f, pn, &best_x)?;
                    }
                    Ok(())
                },
            )?;
            self.iterations = iterations;
            if taken < main {
                return Ok(Termination::Quit);
            }
            Ok(Termination::Budget)
        })();
        self.ctx = shared.into_inner().ctx;
        result
    }
}

/// master-side state threaded through the dispatch callbacks
struct Shared<'a> {
    ctx: Context,
    sent: Vec<Option<(Vec<f64>, f64)>>,
    out: &'a mut Record,
}

impl Strategy for Dimensioned {
    fn name(&self) -> &'static str {
        "dynamically dimensioned search"
    }

    fn initialize(&mut self) -> Result<()> {
        if self.n() == 0 {
            return Err(crate::Error::Config("empty parameter group".to_string()));
        }
        Ok(())
    }

    fn warm_start(&mut self) -> Result<bool> {
        if !self.engine.model().check_warm_start() {
            return Ok(false);
        }
        match record::resume(&record::record_path(0), self.n()) {
            Some(prior) => {
                self.ctx.evals = prior.counter;
                self.ctx.record(&prior.x, prior.best);
                self.engine.model_mut().set_counter(prior.counter);
                self.resumed = true;
                Ok(true)
            }
            None => {
                log::warn!("warm start requested but no usable record found");
                Ok(false)
            }
        }
    }

    fn optimize(&mut self) -> Result<Summary> {
        let names = self
            .engine
            .model()
            .group()
            .params()
            .iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>();
        let mut out = Record::create(0)?;
        out.header(&names.iter().map(String::as_str).collect::<Vec<_>>())?;
        let termination = if self.engine.is_parallel() {
            self.optimize_parallel(&mut out)?
        } else {
            self.optimize_serial(&mut out)?
        };
        self.engine.model_mut().set_counter(self.ctx.evals);
        self.engine.model_mut().save_best(0);
        Ok(Summary::single(
            self.ctx.best_x.clone(),
            self.ctx.best_f,
            self.ctx.evals,
            termination,
        ))
    }

    fn write_metrics(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        writeln!(out, "Algorithm               : {}", self.name())?;
        writeln!(out, "Perturbation Value      : {}", self.cfg.r)?;
        writeln!(out, "Max Iterations          : {}", self.cfg.budget)?;
        writeln!(out, "Search Iterations       : {}", self.iterations)?;
        writeln!(out, "Evaluations             : {}", self.ctx.evals)?;
        writeln!(out, "Best Objective          : {:.6E}", self.ctx.best_f)?;
        writeln!(out, "Upper Violations        : {}", self.ctx.viols.upper)?;
        writeln!(out, "Lower Violations        : {}", self.ctx.viols.lower)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Surface;

    fn strategy(budget: usize) -> Dimensioned {
        let config = Config {
            dds: DdsConfig {
                budget,
                ..DdsConfig::default()
            },
            ..Config::default()
        };
        Dimensioned::new(&config, Engine::serial(Box::new(Surface::sphere(4, -5.0, 5.0))))
    }

    #[test]
    fn pn_spans_one_to_zero() {
        let dds = strategy(1000);
        let left = 900;
        assert_eq!(dds.pn(1, left), 1.0);
        assert!(dds.pn(left, left) < 1e-12);
        assert!(dds.pn(2, left) > dds.pn(left / 2, left));
    }

    #[test]
    fn trial_always_perturbs_something() {
        let mut dds = strategy(1000);
        let group = Surface::cube(4, -5.0, 5.0);
        let best = vec![0.0; 4];
        for _ in 0..100 {
            let x = Dimensioned::trial(
                &mut dds.ctx.rand,
                &mut dds.ctx.viols,
                &group,
                &best,
                0.0,
                &dds.cfg,
            );
            assert_ne!(x, best);
            assert!(group.feasible(&x));
        }
    }

    #[test]
    fn init_count_covers_the_fleet() {
        let dds = strategy(1000);
        assert_eq!(dds.init_count(), 5);
        let big = strategy(10_000);
        assert_eq!(big.init_count(), 50);
    }
}
