use super::Context;
use super::Engine;
use super::Strategy;
use super::Summary;
use super::Termination;
use crate::Objective;
use crate::Result;
use crate::config::Config;
use crate::config::SceConfig;
use crate::params::Group;
use crate::record;
use crate::record::Record;
use crate::schedule::Packet;
use std::cell::RefCell;

#[derive(Clone)]
struct Ind {
    x: Vec<f64>,
    f: Objective,
}

/// shuffled complex evolution. the population is partitioned into
/// complexes by stride, each complex evolves through reflected and
/// contracted simplex steps on trapezoidally-selected sub-complexes,
/// and the complexes are shuffled back together every pass.
pub struct Shuffled {
    cfg: SceConfig,
    engine: Engine,
    ctx: Context,
    population: Vec<Ind>,
    shuffles: usize,
    restarts: usize,
    resumed: Option<record::Resume>,
}

impl Shuffled {
    pub fn new(config: &Config, engine: Engine) -> Self {
        let cfg = config.sce.clone();
        let ctx = Context::new(config.seed, cfg.budget).with_telescope(config.telescope);
        Self {
            cfg,
            engine,
            ctx,
            population: Vec::new(),
            shuffles: 0,
            restarts: 0,
            resumed: None,
        }
    }

    fn n(&self) -> usize {
        self.engine.model().group().len()
    }

    fn per_complex(&self) -> usize {
        if self.cfg.per_complex > 0 {
            self.cfg.per_complex
        } else {
            2 * self.n() + 1
        }
    }

    fn per_sub(&self) -> usize {
        let p = self.per_complex();
        let q = if self.cfg.per_sub > 0 {
            self.cfg.per_sub
        } else {
            self.n() + 1
        };
        q.clamp(2, p)
    }

    fn evolutions(&self) -> usize {
        if self.cfg.evolutions > 0 {
            self.cfg.evolutions
        } else {
            self.per_complex()
        }
    }

    /// evaluate one candidate, telescoping first. `None` is a quit.
    fn eval(&mut self, x: &mut Vec<f64>) -> Result<Option<Objective>> {
        let group = self.engine.model().group().clone();
        self.ctx.telescope(&group, x);
        let packet = if self.ctx.best_x.is_empty() {
            Packet::bare(x.clone())
        } else {
            Packet::advised(x.clone(), self.ctx.best_f, Vec::new())
        };
        match self.engine.evaluate(packet)? {
            Some(outcome) => {
                self.ctx.count(1);
                let f = outcome.objective();
                self.ctx.improve(x, f);
                Ok(Some(f))
            }
            None => Ok(None),
        }
    }

    /// uniform population, evaluated through the fleet when one is
    /// attached; overflowed members are re-sampled in place
    fn populate(&mut self, size: usize, keep_best: bool) -> Result<bool> {
        let group = self.engine.model().group().clone();
        let bounds = group.bounds();
        let mut population = Vec::with_capacity(size);
        for i in 0..size {
            let x = if i == 0 && keep_best && !self.ctx.best_x.is_empty() {
                self.ctx.best_x.clone()
            } else if i == 0 && self.cfg.use_initial {
                group.values()
            } else {
                self.ctx.rand.point(&bounds)
            };
            population.push(Ind {
                x,
                f: f64::INFINITY,
            });
        }
        if self.engine.is_parallel() {
            let shared = RefCell::new((std::mem::replace(&mut self.ctx, Context::new(0, 0)), population));
            let fleet = self.engine.fleet_mut().unwrap();
            let taken = fleet.dispatch(
                size,
                |i| Packet::bare(shared.borrow().1[i].x.clone()),
                |i, outcome| {
                    let mut s = shared.borrow_mut();
                    s.0.count(1);
                    s.1[i].f = outcome.objective();
                    Ok(())
                },
            )?;
            let (ctx, population) = shared.into_inner();
            self.ctx = ctx;
            self.population = population;
            if taken < size {
                return Ok(false);
            }
        } else {
            for member in population.iter_mut() {
                if record::quit_requested() {
                    self.population = Vec::new();
                    return Ok(false);
                }
                let outcome = Engine::inline(
                    self.engine.model_mut(),
                    &Packet::bare(member.x.clone()),
                );
                self.ctx.count(1);
                member.f = outcome.objective();
            }
            self.population = population;
        }
        // overflowed members are re-drawn during initialization
        for _ in 0..100 {
            let bad = (0..self.population.len())
                .filter(|&i| !self.population[i].f.is_finite())
                .collect::<Vec<_>>();
            if bad.is_empty() {
                break;
            }
            for &i in &bad {
                let mut x = self.ctx.rand.point(&bounds);
                match self.eval(&mut x)? {
                    Some(f) => {
                        self.population[i] = Ind { x, f };
                    }
                    None => return Ok(false),
                }
            }
        }
        for member in &self.population {
            let (x, f) = (member.x.clone(), member.f);
            self.ctx.improve(&x, f);
        }
        self.sort_population();
        Ok(true)
    }

    fn sort_population(&mut self) {
        self.population.sort_by(|a, b| a.f.total_cmp(&b.f));
    }

    /// trapezoidal parent selection: denser toward the head of the
    /// sorted complex
    fn pick_parents(&mut self, p: usize, q: usize) -> Vec<usize> {
        let mut chosen = Vec::with_capacity(q);
        while chosen.len() < q {
            let u = self.ctx.rand.uniform();
            let pf = p as f64;
            let i = (pf + 0.5 - ((pf + 0.5).powi(2) - pf * (pf + 1.0) * u).max(0.0).sqrt()).ceil()
                as usize;
            let i = i.saturating_sub(1).min(p - 1);
            if !chosen.contains(&i) {
                chosen.push(i);
            }
        }
        chosen.sort_unstable();
        chosen
    }

    /// per-dimension standard deviation of the population
    fn spread(&self) -> Vec<f64> {
        let n = self.n();
        let count = self.population.len().max(1) as f64;
        let mut mean = vec![0.0; n];
        for member in &self.population {
            for (m, v) in mean.iter_mut().zip(&member.x) {
                *m += v / count;
            }
        }
        let mut sd = vec![0.0; n];
        for member in &self.population {
            for j in 0..n {
                sd[j] += (member.x[j] - mean[j]).powi(2) / count;
            }
        }
        sd.into_iter().map(f64::sqrt).collect()
    }

    /// geometric-mean normalized population range
    fn gnrng(&self, group: &Group) -> f64 {
        let n = self.n();
        let mut log_sum = 0.0;
        for j in 0..n {
            let lo = self
                .population
                .iter()
                .map(|m| m.x[j])
                .fold(f64::INFINITY, f64::min);
            let hi = self
                .population
                .iter()
                .map(|m| m.x[j])
                .fold(f64::NEG_INFINITY, f64::max);
            let denom = group.param(j).range().max(1e-300);
            log_sum += (((hi - lo) / denom).max(1e-300)).ln();
        }
        (log_sum / n as f64).exp()
    }

    /// competitive complex evolution: one shuffle's worth of simplex
    /// steps inside one complex. the complex stays sorted ascending.
    fn evolve_complex(&mut self, complex: &mut Vec<Ind>, sd: &[f64]) -> Result<bool> {
        let group = self.engine.model().group().clone();
        let p = complex.len();
        let q = self.per_sub().min(p);
        let n = self.n();
        for _ in 0..self.evolutions() {
            if self.ctx.exhausted() {
                return Ok(true);
            }
            let parents = self.pick_parents(p, q);
            let worst_rank = *parents.last().unwrap();
            // centroid of the sub-complex head
            let mut centroid = vec![0.0; n];
            for &rank in &parents[..q - 1] {
                for (c, v) in centroid.iter_mut().zip(&complex[rank].x) {
                    *c += v / (q - 1) as f64;
                }
            }
            let sub_best = complex[parents[0]].x.clone();
            let worst = complex[worst_rank].clone();
            // reflection about the centroid
            let mut snew = centroid
                .iter()
                .zip(&worst.x)
                .map(|(c, w)| c + (c - w))
                .collect::<Vec<_>>();
            if !group.feasible(&snew) {
                self.ctx.viols.moves += 1;
                snew = (0..n)
                    .map(|j| {
                        let p = group.param(j);
                        self.ctx.rand.gauss_in(sub_best[j], sd[j], p.lwr(), p.upr())
                    })
                    .collect();
            }
            let f = match self.eval(&mut snew)? {
                Some(f) => f,
                None => return Ok(false),
            };
            let (snew, f) = if f.is_finite() && f < worst.f {
                (snew, f)
            } else {
                // contraction toward the centroid
                let mut scon = centroid
                    .iter()
                    .zip(&worst.x)
                    .map(|(c, w)| c - 0.5 * (c - w))
                    .collect::<Vec<_>>();
                let fc = match self.eval(&mut scon)? {
                    Some(f) => f,
                    None => return Ok(false),
                };
                if fc.is_finite() && fc < worst.f {
                    (scon, fc)
                } else {
                    // mutation: accepted unconditionally
                    let mut smut = (0..n)
                        .map(|j| {
                            let p = group.param(j);
                            self.ctx.rand.gauss_in(sub_best[j], sd[j], p.lwr(), p.upr())
                        })
                        .collect::<Vec<_>>();
                    let fm = match self.eval(&mut smut)? {
                        Some(f) => f,
                        None => return Ok(false),
                    };
                    (smut, fm)
                }
            };
            complex[worst_rank] = Ind { x: snew, f };
            complex.sort_by(|a, b| a.f.total_cmp(&b.f));
        }
        Ok(true)
    }
}

impl Strategy for Shuffled {
    fn name(&self) -> &'static str {
        "shuffled complex evolution"
    }

    fn initialize(&mut self) -> Result<()> {
        if self.cfg.complexes < self.cfg.min_complexes.max(1) {
            return Err(crate::Error::Config(
                "fewer complexes than the configured minimum".to_string(),
            ));
        }
        if self.cfg.per_complex == 1 {
            return Err(crate::Error::Config(
                "complexes need at least two points".to_string(),
            ));
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
                self.resumed = Some(prior.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn optimize(&mut self) -> Result<Summary> {
        let group = self.engine.model().group().clone();
        let names = group.params().iter().map(|p| p.name().to_string()).collect::<Vec<_>>();
        let mut out = Record::create(0)?;
        out.header(&names.iter().map(String::as_str).collect::<Vec<_>>())?;

        let ngs = self.cfg.complexes;
        let p = self.per_complex();
        let size = ngs * p;
        let keep_best = self.resumed.is_some();
        let mut termination = Termination::Budget;
        if !self.populate(size, keep_best)? {
            termination = Termination::Quit;
        } else {
            let mut history: Vec<Objective> = vec![self.ctx.best_f];
            let mut collapsed_once = false;
            loop {
                if self.ctx.exhausted() {
                    termination = Termination::Budget;
                    break;
                }
                if record::quit_requested() {
                    termination = Termination::Quit;
                    break;
                }
                self.shuffles += 1;
                self.sort_population();
                let sd = self.spread();
                // stride partition: complex g takes every ngs-th member
                let mut complexes: Vec<Vec<Ind>> = (0..ngs)
                    .map(|g| {
                        (0..p)
                            .map(|k| self.population[k * ngs + g].clone())
                            .collect()
                    })
                    .collect();
                let mut quit = false;
                for complex in complexes.iter_mut() {
                    if !self.evolve_complex(complex, &sd)? {
                        quit = true;
                        break;
                    }
                }
                self.population = complexes.into_iter().flatten().collect();
                self.sort_population();
                if quit {
                    termination = Termination::Quit;
                    break;
                }
                let gnrng = self.gnrng(&group);
                out.iteration(self.ctx.evals, self.ctx.best_f, gnrng, &self.ctx.best_x.clone())?;
                history.push(self.ctx.best_f);
                if gnrng <= self.cfg.pop_conv {
                    if collapsed_once {
                        termination = Termination::PopulationCollapse;
                        break;
                    }
                    // restart from fresh sampling, keeping the incumbent
                    collapsed_once = true;
                    self.restarts += 1;
                    log::info!("population range collapsed, restarting from fresh samples");
                    if !self.populate(size, true)? {
                        termination = Termination::Quit;
                        break;
                    }
                    continue;
                }
                if history.len() > self.cfg.stagnation {
                    let then = history[history.len() - 1 - self.cfg.stagnation];
                    let now = self.ctx.best_f;
                    let change = if then.abs() > 0.0 {
                        ((then - now) / then.abs()).abs()
                    } else {
                        0.0
                    };
                    if change < self.cfg.pct_change {
                        termination = Termination::Stagnation;
                        break;
                    }
                }
            }
        }
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
        writeln!(out, "Complexes               : {}", self.cfg.complexes)?;
        writeln!(out, "Points Per Complex      : {}", self.per_complex())?;
        writeln!(out, "Points Per Sub-Complex  : {}", self.per_sub())?;
        writeln!(out, "Shuffles                : {}", self.shuffles)?;
        writeln!(out, "Restarts                : {}", self.restarts)?;
        writeln!(out, "Evaluations             : {}", self.ctx.evals)?;
        writeln!(out, "Best Objective          : {:.6E}", self.ctx.best_f)?;
        writeln!(out, "Bound Violations        : {}", self.ctx.viols.total())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trapezoidal_selection_prefers_the_head() {
        let config = Config::default();
        let engine = Engine::serial(Box::new(crate::model::Surface::sphere(2, -1.0, 1.0)));
        let mut sce = Shuffled::new(&config, engine);
        let mut head = 0usize;
        let mut tail = 0usize;
        for _ in 0..2000 {
            let parents = sce.pick_parents(10, 3);
            head += parents.iter().filter(|&&i| i < 5).count();
            tail += parents.iter().filter(|&&i| i >= 5).count();
            assert_eq!(parents.len(), 3);
            assert!(parents.windows(2).all(|w| w[0] < w[1]));
        }
        assert!(head > tail);
    }
}
