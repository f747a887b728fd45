use super::Context;
use super::Engine;
use super::Strategy;
use super::Summary;
use super::Termination;
use crate::Objective;
use crate::Result;
use crate::config::Config;
use crate::config::PsoConfig;
use crate::config::Reduction;
use crate::params::Kind;
use crate::record;
use crate::record::Record;
use crate::schedule::Packet;

/// one member of the swarm. the swarm owns the storage; everything
/// else refers to particles by index.
struct Particle {
    x: Vec<f64>,
    v: Vec<f64>,
    b: Vec<f64>,
    fx: Objective,
    fb: Objective,
    cx: Vec<f64>,
    cb: Vec<f64>,
}

/// particle swarm optimization. the serial and fleet-dispatched
/// variants share this state machine; only the evaluation path
/// differs.
pub struct ParticleSwarm {
    cfg: PsoConfig,
    seeds: Vec<Vec<f64>>,
    engine: Engine,
    ctx: Context,
    swarm: Vec<Particle>,
    best: usize,
    inertia: f64,
    generation: usize,
    resumed: Option<record::Resume>,
}

impl ParticleSwarm {
    pub fn new(config: &Config, engine: Engine) -> Self {
        let cfg = config.pso.clone();
        let budget = cfg.swarm * (cfg.generations + 1);
        let ctx = Context::new(config.seed, budget).with_telescope(config.telescope);
        Self {
            inertia: cfg.inertia,
            seeds: config.init_params.clone(),
            cfg,
            engine,
            ctx,
            swarm: Vec::new(),
            best: 0,
            generation: 0,
            resumed: None,
        }
    }

    fn n(&self) -> usize {
        self.engine.model().group().len()
    }

    fn median(&self) -> f64 {
        let mut fs = self
            .swarm
            .iter()
            .map(|p| p.fx)
            .filter(|f| f.is_finite())
            .collect::<Vec<_>>();
        if fs.is_empty() {
            return f64::INFINITY;
        }
        fs.sort_by(|a, b| a.total_cmp(b));
        fs[fs.len() / 2]
    }

    fn packet(&self, i: usize) -> Packet {
        let p = &self.swarm[i];
        if self.ctx.best_x.is_empty() {
            Packet::bare(p.x.clone())
        } else {
            Packet::advised(p.x.clone(), p.fb, p.cb.clone())
        }
    }

    /// evaluate the whole swarm, serial or through the fleet.
    /// returns false when the quit sentinel drained the batch.
    fn evaluate_swarm(&mut self) -> Result<bool> {
        let size = self.swarm.len();
        if !self.engine.is_parallel() {
            for i in 0..size {
                if record::quit_requested() {
                    return Ok(false);
                }
                let packet = self.packet(i);
                let outcome = Engine::inline(self.engine.model_mut(), &packet);
                self.swarm[i].fx = outcome.objective();
                self.swarm[i].cx = outcome.constraints;
                self.ctx.count(1);
            }
            Ok(true)
        } else {
            let packets = (0..size).map(|i| self.packet(i)).collect::<Vec<_>>();
            let swarm = &mut self.swarm;
            let ctx = &mut self.ctx;
            let fleet = self.engine.fleet_mut().unwrap();
            let taken = fleet.dispatch(
                size,
                |i| packets[i].clone(),
                |i, outcome| {
                    swarm[i].fx = outcome.objective();
                    swarm[i].cx = outcome.constraints;
                    ctx.count(1);
                    Ok(())
                },
            )?;
            Ok(taken == size)
        }
    }

    /// initialization re-samples particles whose objective came back
    /// non-finite; during the search such candidates are simply never
    /// allowed to become a personal best
    fn resample_overflowed(&mut self) -> Result<()> {
        let bounds = self.engine.model().group().bounds();
        for _ in 0..100 {
            let bad = (0..self.swarm.len())
                .filter(|&i| !self.swarm[i].fx.is_finite())
                .collect::<Vec<_>>();
            if bad.is_empty() {
                return Ok(());
            }
            for &i in &bad {
                self.swarm[i].x = self.ctx.rand.point(&bounds);
            }
            for &i in &bad {
                let packet = self.packet(i);
                let outcome = match self.engine.evaluate(packet)? {
                    Some(outcome) => outcome,
                    None => return Ok(()),
                };
                self.swarm[i].fx = outcome.objective();
                self.swarm[i].cx = outcome.constraints;
                self.ctx.count(1);
            }
        }
        Ok(())
    }

    /// velocity and position update for one generation, with the
    /// minimum-perturbation floor and the angle-preserving clamp
    fn advance(&mut self) {
        let n = self.n();
        let group = self.engine.model().group().clone();
        let g_cur = self.generation;
        for i in 0..self.swarm.len() {
            for j in 0..n {
                let x = self.swarm[i].x[j];
                let pl = self.swarm[i].b[j];
                let pg = self.swarm[self.best].b[j];
                let r1 = self.ctx.rand.uniform();
                let r2 = self.ctx.rand.uniform();
                let mut v = self.swarm[i].v[j];
                v = self.cfg.constriction
                    * (self.inertia * v + self.cfg.cognitive * r1 * (pl - x)
                        + self.cfg.social * r2 * (pg - x));
                // minimum perturbation floor against stagnation
                let vmin = match group.param(j).kind() {
                    Kind::Real => (0.01 * x.abs()) / (g_cur + 1) as f64,
                    Kind::Integer => 0.50,
                };
                if v.abs() < vmin {
                    let sign = self.ctx.rand.uniform();
                    v = if sign >= 0.5 {
                        (1.0 + r1) * vmin
                    } else {
                        -((1.0 + r2) * vmin)
                    };
                }
                self.swarm[i].v[j] = v;
                self.swarm[i].x[j] = x + v;
            }
            // clamp to bounds while preserving the direction of motion:
            // the most restrictive violating dimension scales the whole
            // velocity by its half-distance fraction
            let mut dx_min = 1.0f64;
            for j in 0..n {
                let p = group.param(j);
                let v = self.swarm[i].v[j];
                let x_old = self.swarm[i].x[j] - v;
                if self.swarm[i].x[j] > p.upr() {
                    let frac = (0.5 * (p.upr() - x_old) / v).abs();
                    dx_min = dx_min.min(frac);
                    self.ctx.viols.upper += 1;
                }
                if self.swarm[i].x[j] < p.lwr() {
                    let frac = (0.5 * (p.lwr() - x_old) / v).abs();
                    dx_min = dx_min.min(frac);
                    self.ctx.viols.lower += 1;
                }
            }
            if dx_min < 1.0 {
                for j in 0..n {
                    let v = self.swarm[i].v[j];
                    let x_old = self.swarm[i].x[j] - v;
                    self.swarm[i].v[j] = v * dx_min;
                    self.swarm[i].x[j] = x_old + v * dx_min;
                }
            }
            let mut x = std::mem::take(&mut self.swarm[i].x);
            self.ctx.telescope(&group, &mut x);
            self.swarm[i].x = x;
        }
    }

    /// personal bests and the global best after a generation
    fn assimilate(&mut self) {
        for p in self.swarm.iter_mut() {
            if p.fx.is_finite() && p.fx < p.fb {
                p.fb = p.fx;
                p.b = p.x.clone();
                p.cb = p.cx.clone();
            }
        }
        self.best = (0..self.swarm.len())
            .min_by(|&a, &b| self.swarm[a].fb.total_cmp(&self.swarm[b].fb))
            .unwrap_or(0);
        let (b, fb) = (
            self.swarm[self.best].b.clone(),
            self.swarm[self.best].fb,
        );
        self.ctx.improve(&b, fb);
    }

    fn reduce_inertia(&mut self) {
        match self.cfg.reduction {
            Reduction::Linear => {
                let rate = self.generation as f64 / self.cfg.generations as f64;
                self.inertia = self.cfg.inertia * (1.0 - rate);
            }
            Reduction::Rate(rate) => {
                self.inertia *= 1.0 - rate;
            }
        }
    }
}

impl Strategy for ParticleSwarm {
    fn name(&self) -> &'static str {
        "particle swarm"
    }

    fn initialize(&mut self) -> Result<()> {
        if self.cfg.swarm == 0 || self.cfg.generations == 0 {
            return Err(crate::Error::Config(
                "swarm size and generations must be positive".to_string(),
            ));
        }
        if self.seeds.len() > self.cfg.swarm {
            return Err(crate::Error::Config(format!(
                "{} initial rows exceed swarm size {}",
                self.seeds.len(),
                self.cfg.swarm
            )));
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
                self.engine.model_mut().set_counter(prior.counter);
                self.resumed = Some(prior);
                Ok(true)
            }
            None => {
                log::warn!("warm start requested but no usable record found");
                Ok(false)
            }
        }
    }

    fn optimize(&mut self) -> Result<Summary> {
        let n = self.n();
        let bounds = self.engine.model().group().bounds();
        let names = self.engine.model().group().params().iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>();
        let mut positions = self
            .cfg
            .init
            .sample(&mut self.ctx.rand, &bounds, self.cfg.swarm);
        for (slot, row) in positions.iter_mut().zip(&self.seeds) {
            *slot = row.clone();
        }
        if let Some(prior) = &self.resumed {
            positions[0] = prior.x.clone();
        }
        self.swarm = positions
            .into_iter()
            .map(|x| Particle {
                v: vec![0.0; n],
                b: x.clone(),
                fx: f64::INFINITY,
                fb: f64::INFINITY,
                cx: Vec::new(),
                cb: Vec::new(),
                x,
            })
            .collect();

        let mut out = Record::create(0)?;
        out.header(&names.iter().map(String::as_str).collect::<Vec<_>>())?;

        let mut termination = Termination::Budget;
        if !self.evaluate_swarm()? {
            termination = Termination::Quit;
        } else {
            self.resample_overflowed()?;
            for p in self.swarm.iter_mut() {
                p.fb = p.fx;
                p.b = p.x.clone();
                p.cb = p.cx.clone();
            }
            self.assimilate();
            out.iteration(0, self.ctx.best_f, 1.0, &self.ctx.best_x.clone())?;

            for g in 1..=self.cfg.generations {
                self.generation = g;
                if record::quit_requested() {
                    termination = Termination::Quit;
                    break;
                }
                self.advance();
                if !self.evaluate_swarm()? {
                    termination = Termination::Quit;
                    break;
                }
                self.assimilate();
                self.reduce_inertia();
                let median = self.median();
                let spread = if median.is_finite() && median != 0.0 {
                    ((median - self.ctx.best_f) / median).abs()
                } else {
                    1.0
                };
                out.iteration(g, self.ctx.best_f, spread, &self.ctx.best_x.clone())?;
                if self.cfg.convergence > 0.0 && spread < self.cfg.convergence {
                    termination = Termination::Converged;
                    break;
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
        writeln!(out, "Swarm Size              : {}", self.cfg.swarm)?;
        writeln!(out, "Generations             : {}", self.generation)?;
        writeln!(out, "Constriction Factor     : {}", self.cfg.constriction)?;
        writeln!(out, "Cognitive / Social      : {} / {}", self.cfg.cognitive, self.cfg.social)?;
        writeln!(out, "Final Inertia           : {:.6}", self.inertia)?;
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
    use crate::model::Model;
    use crate::model::Surface;

    fn run_sphere(seed: u64) -> Summary {
        let config = Config {
            seed,
            pso: PsoConfig {
                swarm: 20,
                generations: 50,
                inertia: 1.2,
                constriction: 1.0,
                cognitive: 2.0,
                social: 2.0,
                ..PsoConfig::default()
            },
            ..Config::default()
        };
        let engine = Engine::serial(Box::new(Surface::sphere(2, -5.0, 5.0)));
        let mut swarm = ParticleSwarm::new(&config, engine);
        swarm.initialize().unwrap();
        swarm.optimize().unwrap()
    }

    #[test]
    fn sphere_collapses_to_origin() {
        let _guard = record::test_guard();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_current_dir(&dir).unwrap();
        let summary = run_sphere(13);
        assert!(summary.best_f < 1e-4, "best {}", summary.best_f);
        assert!(summary.best_x.iter().all(|v| v.abs() < 0.01));
    }

    #[test]
    fn personal_bests_track_their_positions() {
        let _guard = record::test_guard();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_current_dir(&dir).unwrap();
        let config = Config::default();
        let engine = Engine::serial(Box::new(Surface::sphere(3, -5.0, 5.0)));
        let mut swarm = ParticleSwarm::new(&config, engine);
        swarm.initialize().unwrap();
        swarm.optimize().unwrap();
        let mut check = Surface::sphere(3, -5.0, 5.0);
        for p in &swarm.swarm {
            check.write_params(&p.b);
            assert!((check.evaluate() - p.fb).abs() < 1e-9);
            assert!(p.fb <= p.fx || !p.fx.is_finite());
            assert!(check.group().feasible(&p.b));
        }
    }
}
