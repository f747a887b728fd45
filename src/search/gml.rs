use super::Context;
use super::Engine;
use super::Strategy;
use super::Summary;
use super::Termination;
use crate::Objective;
use crate::Result;
use crate::config::Config;
use crate::config::GmlConfig;
use crate::params::Group;
use crate::record;
use crate::record::Record;
use crate::schedule::Packet;
use std::cell::RefCell;

/// levenberg refinement with global multi-start. each start runs a
/// damped local descent on the objective surface (marquardt lambda
/// trials on the scaled normal step); subsequent starting points are
/// chosen max-min distant from everything tried before, so the
/// restarts spread over the feasible box.
pub struct MultiStart {
    cfg: GmlConfig,
    engine: Engine,
    ctx: Context,
    starts: Vec<Vec<f64>>,
    refinements: usize,
    resumed: bool,
}

impl MultiStart {
    pub fn new(config: &Config, engine: Engine) -> Self {
        let cfg = config.gml.clone();
        // descent cost per iteration: gradient + curvature stencil
        // plus the three lambda trials
        let n = engine.model().group().len().max(1);
        let budget = cfg.starts * cfg.max_iters * (2 * n + 4);
        let ctx = Context::new(config.seed, budget).with_telescope(config.telescope);
        Self {
            cfg,
            engine,
            ctx,
            starts: Vec::new(),
            refinements: 0,
            resumed: false,
        }
    }

    fn n(&self) -> usize {
        self.engine.model().group().len()
    }

    fn eval(&mut self, x: &[f64]) -> Result<Option<Objective>> {
        let packet = if self.ctx.best_x.is_empty() {
            Packet::bare(x.to_vec())
        } else {
            Packet::advised(x.to_vec(), self.ctx.best_f, Vec::new())
        };
        match self.engine.evaluate(packet)? {
            Some(outcome) => {
                self.ctx.count(1);
                Ok(Some(outcome.objective()))
            }
            None => Ok(None),
        }
    }

    /// central-difference gradient and curvature stencil, one column
    /// per parameter. the columns go through the fleet when one is
    /// attached.
    fn stencil(
        &mut self,
        group: &Group,
        x: &[f64],
        fx: Objective,
    ) -> Result<Option<(Vec<f64>, Vec<f64>)>> {
        let n = self.n();
        let mut probes = Vec::with_capacity(2 * n);
        let mut steps = Vec::with_capacity(n);
        for j in 0..n {
            let p = group.param(j);
            let h = (self.cfg.step * p.range()).max(1e-12);
            let hi = (x[j] + h).min(p.upr());
            let lo = (x[j] - h).max(p.lwr());
            let mut forward = x.to_vec();
            forward[j] = hi;
            let mut backward = x.to_vec();
            backward[j] = lo;
            probes.push(forward);
            probes.push(backward);
            steps.push((hi - lo).max(1e-12));
        }
        let mut values = vec![0.0; probes.len()];
        if self.engine.is_parallel() {
            let shared = RefCell::new((std::mem::replace(&mut self.ctx, Context::new(0, 0)), values));
            let fleet = self.engine.fleet_mut().unwrap();
            let taken = fleet.dispatch(
                probes.len(),
                |i| Packet::bare(probes[i].clone()),
                |i, outcome| {
                    let mut s = shared.borrow_mut();
                    s.0.count(1);
                    s.1[i] = outcome.objective();
                    Ok(())
                },
            )?;
            let (ctx, filled) = shared.into_inner();
            self.ctx = ctx;
            values = filled;
            if taken < probes.len() {
                return Ok(None);
            }
        } else {
            for (i, probe) in probes.iter().enumerate() {
                if record::quit_requested() {
                    return Ok(None);
                }
                match self.eval(probe)? {
                    Some(f) => values[i] = f,
                    None => return Ok(None),
                }
            }
        }
        let mut gradient = Vec::with_capacity(n);
        let mut curvature = Vec::with_capacity(n);
        for j in 0..n {
            let fp = values[2 * j];
            let fm = values[2 * j + 1];
            let h = steps[j] / 2.0;
            gradient.push((fp - fm) / (2.0 * h));
            let c = (fp - 2.0 * fx + fm) / (h * h);
            curvature.push(if c.is_finite() && c > 0.0 { c } else { 1.0 });
        }
        Ok(Some((gradient, curvature)))
    }

    /// one damped descent from `start`. lambda is retuned every
    /// iteration by trying the incumbent damping, one notch lighter,
    /// and one notch heavier, and moving to whichever is best.
    fn refine(&mut self, start: Vec<f64>) -> Result<Option<(Vec<f64>, Objective)>> {
        let group = self.engine.model().group().clone();
        let mut x = start;
        let mut fx = match self.eval(&x)? {
            Some(f) => f,
            None => return Ok(None),
        };
        self.ctx.improve(&x, fx);
        let mut lambda = self.cfg.lambda;
        for _ in 0..self.cfg.max_iters {
            if record::quit_requested() {
                return Ok(None);
            }
            let Some((gradient, curvature)) = self.stencil(&group, &x, fx)? else {
                return Ok(None);
            };
            let mut best_trial: Option<(Vec<f64>, Objective, f64)> = None;
            for factor in [1.0, 1.0 / self.cfg.scale, self.cfg.scale] {
                let damping = lambda * factor;
                // scaled diagonal newton step under marquardt damping
                let trial = x
                    .iter()
                    .enumerate()
                    .map(|(j, &v)| {
                        let p = group.param(j);
                        let dx = -gradient[j] / (curvature[j] * (1.0 + damping));
                        crate::params::bounds::reflect(v + dx, p.lwr(), p.upr(), &mut self.ctx.viols)
                    })
                    .collect::<Vec<_>>();
                let f = match self.eval(&trial)? {
                    Some(f) => f,
                    None => return Ok(None),
                };
                if f.is_finite()
                    && best_trial.as_ref().map(|(_, bf, _)| f < *bf).unwrap_or(true)
                {
                    best_trial = Some((trial, f, damping));
                }
            }
            let Some((trial, f, damping)) = best_trial else {
                break;
            };
            self.refinements += 1;
            if f < fx {
                let reduction = ((fx - f) / fx.abs().max(1e-300)).abs();
                x = trial;
                fx = f;
                lambda = damping;
                self.ctx.improve(&x, fx);
                if reduction < self.cfg.convergence {
                    break;
                }
            } else {
                // no trial improved: stiffen the damping and give up
                // when it saturates
                lambda *= self.cfg.scale * self.cfg.scale;
                if lambda > 1e12 {
                    break;
                }
            }
        }
        Ok(Some((x, fx)))
    }

    /// the next starting point: the draw whose minimum distance to
    /// every prior start is largest
    fn next_start(&mut self, group: &Group) -> Vec<f64> {
        let bounds = group.bounds();
        let draws = crate::MS_CANDIDATE_DRAWS * self.n();
        let mut best: Option<(Vec<f64>, f64)> = None;
        for _ in 0..draws {
            let candidate = self.ctx.rand.point(&bounds);
            let nearest = self
                .starts
                .iter()
                .map(|s| {
                    s.iter()
                        .zip(&candidate)
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum::<f64>()
                })
                .fold(f64::INFINITY, f64::min);
            if best.as_ref().map(|(_, d)| nearest > *d).unwrap_or(true) {
                best = Some((candidate, nearest));
            }
        }
        best.map(|(x, _)| x).unwrap_or_else(|| group.values())
    }
}

impl Strategy for MultiStart {
    fn name(&self) -> &'static str {
        "levenberg multi-start"
    }

    fn initialize(&mut self) -> Result<()> {
        if self.cfg.starts == 0 {
            return Err(crate::Error::Config(
                "multi-start needs at least one start".to_string(),
            ));
        }
        if self.cfg.scale <= 1.0 {
            return Err(crate::Error::Config(
                "lambda scale factor must exceed one".to_string(),
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
                self.resumed = true;
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

        let mut termination = Termination::Converged;
        for ms in 0..self.cfg.starts {
            if record::quit_requested() {
                termination = Termination::Quit;
                break;
            }
            let start = if ms == 0 {
                if self.resumed {
                    self.ctx.best_x.clone()
                } else {
                    group.values()
                }
            } else {
                self.next_start(&group)
            };
            self.starts.push(start.clone());
            match self.refine(start)? {
                Some((x, f)) => {
                    out.iteration(self.ctx.evals, self.ctx.best_f, f, &x)?;
                }
                None => {
                    termination = Termination::Quit;
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
        writeln!(out, "Multi-Starts            : {}", self.starts.len())?;
        writeln!(out, "Descent Iterations      : {}", self.refinements)?;
        writeln!(out, "Evaluations             : {}", self.ctx.evals)?;
        writeln!(out, "Best Objective          : {:.6E}", self.ctx.best_f)?;
        writeln!(out, "Bound Violations        : {}", self.ctx.viols.total())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Surface;

    #[test]
    fn max_min_starts_spread_out() {
        let config = Config::default();
        let engine = Engine::serial(Box::new(Surface::sphere(2, 0.0, 1.0)));
        let mut ms = MultiStart::new(&config, engine);
        ms.starts.push(vec![0.5, 0.5]);
        let group = Surface::cube(2, 0.0, 1.0);
        let next = ms.next_start(&group);
        // the farthest point from the center is a corner
        let center_dist: f64 = next.iter().map(|v| (v - 0.5) * (v - 0.5)).sum();
        assert!(center_dist > 0.3, "next start {:?} too central", next);
    }
}
