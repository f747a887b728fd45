use super::Algorithm;
use super::Context;
use super::Engine;
use super::Strategy;
use super::Summary;
use super::Termination;
use crate::Objective;
use crate::Result;
use crate::Temperature;
use crate::config::Config;
use crate::config::FinalTemp;
use crate::config::SaConfig;
use crate::config::Transition;
use crate::linalg;
use crate::linalg::Matrix;
use crate::params::Group;
use crate::params::Kind;
use crate::params::bounds;
use crate::record;
use crate::record::Record;
use crate::schedule::Packet;
use std::cell::RefCell;

/// transition kernel state. the vanderbilt step matrix degrades to
/// the gaussian kernel for an outer iteration when its covariance
/// estimate loses positive definiteness.
enum Kernel {
    Uniform,
    Gauss,
    Vanderbilt(Option<Matrix>),
    Discrete,
}

impl Kernel {
    /// propose a move from `cur`. draws come only from the master's
    /// random source.
    fn propose(&self, ctx: &mut Context, group: &Group, cur: &[f64], f_cur: Objective) -> Vec<f64> {
        let n = group.len();
        match self {
            Kernel::Uniform => {
                // one-dimensional local move from a fifth-of-range window
                let mut x = cur.to_vec();
                let j = ctx.rand.index(n);
                let p = group.param(j);
                x[j] = bounds::window(&mut ctx.rand, cur[j], p.lwr(), p.upr());
                x
            }
            Kernel::Gauss => Self::gauss(ctx, group, cur, f_cur),
            Kernel::Vanderbilt(None) => Self::gauss(ctx, group, cur, f_cur),
            Kernel::Vanderbilt(Some(q)) => {
                let u = (0..n)
                    .map(|_| ctx.rand.uniform_in(-crate::VSA_STEP_SPAN, crate::VSA_STEP_SPAN))
                    .collect::<Vec<_>>();
                let dx = linalg::mat_vec(q, &u);
                cur.iter()
                    .enumerate()
                    .map(|(j, &v)| {
                        let p = group.param(j);
                        bounds::reflect(v + dx[j], p.lwr(), p.upr(), &mut ctx.viols)
                    })
                    .collect()
            }
            Kernel::Discrete => {
                // single +/-1 step wrapping around the range
                let mut x = cur.iter().map(|v| v.round()).collect::<Vec<_>>();
                let j = ctx.rand.index(n);
                let p = group.param(j);
                let step = if ctx.rand.uniform() < 0.5 { 1.0 } else { -1.0 };
                let moved = x[j] + step;
                x[j] = if moved > p.upr() {
                    p.lwr()
                } else if moved < p.lwr() {
                    p.upr()
                } else {
                    moved
                };
                x
            }
        }
    }

    /// per-dimension normal step sized by the current energy
    fn gauss(ctx: &mut Context, group: &Group, cur: &[f64], f_cur: Objective) -> Vec<f64> {
        let n = group.len();
        let energy = f_cur.abs().max(crate::SA_MELT_FLOOR);
        cur.iter()
            .enumerate()
            .map(|(j, &v)| {
                let p = group.param(j);
                let sigma = (energy.sqrt() / (n as f64).sqrt())
                    .min(crate::SA_SIGMA_CAP * p.range());
                let moved = v + sigma * ctx.rand.gauss();
                bounds::reflect(moved, p.lwr(), p.upr(), &mut ctx.viols)
            })
            .collect()
    }
}

/// simulated annealing: continuous, vanderbilt step-matrix, and
/// combinatorial variants share this machine. an initial melting
/// phase sizes the temperature range from the energy landscape, the
/// main phase runs metropolis inner loops under geometric cooling.
pub struct Anneal {
    algorithm: Algorithm,
    cfg: SaConfig,
    engine: Engine,
    ctx: Context,
    kernel: Kernel,
    cur_x: Vec<f64>,
    cur_f: Objective,
    temp: Temperature,
    temp_init: Temperature,
    temp_final: Temperature,
    factor: f64,
    de_avg: f64,
    melt_evals: usize,
    melt_trace: Vec<Objective>,
    accept_sum: f64,
    accept_count: usize,
    rejects: usize,
    outer_done: usize,
}

impl Anneal {
    pub fn new(algorithm: Algorithm, config: &Config, engine: Engine) -> Self {
        let cfg = config.sa.clone();
        let budget = cfg.melts + cfg.outer * cfg.inner + 1;
        let ctx = Context::new(config.seed, budget).with_telescope(config.telescope);
        let kernel = match (algorithm, cfg.transition) {
            (Algorithm::Csa, _) => Kernel::Discrete,
            (Algorithm::Vsa, _) | (_, Transition::Vanderbilt) => Kernel::Vanderbilt(None),
            (_, Transition::Gauss) => Kernel::Gauss,
            (_, Transition::Uniform) => Kernel::Uniform,
        };
        Self {
            algorithm,
            cfg,
            engine,
            ctx,
            kernel,
            cur_x: Vec::new(),
            cur_f: f64::INFINITY,
            temp: 0.0,
            temp_init: 0.0,
            temp_final: 0.0,
            factor: 1.0,
            de_avg: 0.0,
            melt_evals: 0,
            melt_trace: Vec::new(),
            accept_sum: 0.0,
            accept_count: 0,
            rejects: 0,
            outer_done: 0,
        }
    }

    fn n(&self) -> usize {
        self.engine.model().group().len()
    }

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
                Ok(Some(outcome.objective()))
            }
            None => Ok(None),
        }
    }

    fn median(values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::INFINITY;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted[sorted.len() / 2]
    }

    /// random-walk sampling of the energy landscape. picks the
    /// initial and final temperatures so the first inner loops accept
    /// almost everything and the last accept almost nothing.
    fn melt(&mut self) -> Result<bool> {
        let group = self.engine.model().group().clone();
        self.cur_x = group.values();
        // the walk needs a finite starting energy
        let bounds = group.bounds();
        for _ in 0..100 {
            let mut x = self.cur_x.clone();
            let f = match self.eval(&mut x)? {
                Some(f) => f,
                None => return Ok(false),
            };
            self.melt_evals += 1;
            if f.is_finite() {
                self.cur_x = x;
                self.cur_f = f;
                break;
            }
            self.cur_x = self.ctx.rand.point(&bounds);
        }
        self.ctx.improve(&self.cur_x.clone(), self.cur_f);

        let mut deltas = Vec::with_capacity(self.cfg.melts);
        for _ in 0..self.cfg.melts {
            let prev = self.cur_f;
            let mut accepted = None;
            for _ in 0..100 {
                let mut x = self
                    .kernel
                    .propose(&mut self.ctx, &group, &self.cur_x, self.cur_f);
                let f = match self.eval(&mut x)? {
                    Some(f) => f,
                    None => return Ok(false),
                };
                self.melt_evals += 1;
                if f.is_finite() {
                    accepted = Some((x, f));
                    break;
                }
                // overflow melts are re-sampled in place
            }
            let Some((x, f)) = accepted else {
                return Err(crate::Error::Numeric(
                    "melting could not find finite objectives".to_string(),
                ));
            };
            self.cur_x = x;
            self.cur_f = f;
            deltas.push((f - prev).abs());
            self.melt_trace.push(f);
            self.ctx.improve(&self.cur_x.clone(), self.cur_f);
        }

        // average or median |dE|, whichever is smaller, floored away
        // from zero so a flat melt cannot divide by zero
        let mean = deltas.iter().sum::<f64>() / deltas.len().max(1) as f64;
        let median = Self::median(&deltas);
        self.de_avg = mean.min(median).max(crate::SA_MELT_FLOOR);

        self.temp_init = -self.de_avg / crate::SA_ACCEPT_INIT.ln();
        self.temp_final = match self.cfg.final_temp {
            FinalTemp::Vanderbilt => -self.de_avg / crate::SA_ACCEPT_FINAL.ln(),
            FinalTemp::BenAmeur => {
                self.temp_init = self.ben_ameur(crate::SA_ACCEPT_INIT, self.temp_init);
                self.ben_ameur(crate::SA_ACCEPT_FINAL, self.temp_init)
            }
            FinalTemp::User(t) => t.max(crate::SA_MELT_FLOOR),
        };
        self.factor = if self.temp_final < self.temp_init {
            (self.temp_final / self.temp_init).powf(1.0 / self.cfg.outer as f64)
        } else {
            self.cfg.reduction
        };
        self.temp = self.temp_init;
        // the best melt point seeds the chain
        self.cur_x = self.ctx.best_x.clone();
        self.cur_f = self.ctx.best_f;
        Ok(true)
    }

    /// fixed-point iteration on the empirical acceptance probability
    /// of the melt transitions, doubling the damping exponent when an
    /// update fails to close the gap
    fn ben_ameur(&self, target: f64, start: Temperature) -> Temperature {
        let samples = &self.melt_trace;
        if samples.len() < 2 {
            return start;
        }
        let mut t = start;
        let mut p = 1.0f64;
        let mut gap_last = 2.0f64;
        for _ in 0..10_000 {
            let mut numer = 0.0;
            let mut denom = 0.0;
            for pair in samples.windows(2) {
                let (hi, lo) = if pair[0] > pair[1] {
                    (pair[0], pair[1])
                } else {
                    (pair[1], pair[0])
                };
                numer += (-hi / t).exp();
                denom += (-lo / t).exp();
            }
            if denom == 0.0 {
                break;
            }
            let pn = numer / denom;
            let gap = (pn - target).abs();
            if gap <= 0.001 {
                break;
            }
            if gap >= gap_last {
                p *= 2.0;
            } else {
                t *= (pn.ln() / target.ln()).powf(1.0 / p);
                gap_last = gap;
            }
        }
        t.max(crate::SA_MELT_FLOOR)
    }

    /// metropolis decision for one proposal; updates the running
    /// acceptance estimate
    fn metropolis(
        ctx: &mut Context,
        cur_x: &mut Vec<f64>,
        cur_f: &mut Objective,
        temp: Temperature,
        accept_sum: &mut f64,
        accept_count: &mut usize,
        rejects: &mut usize,
        x: Vec<f64>,
        f: Objective,
    ) {
        if !f.is_finite() {
            *rejects += 1;
            return;
        }
        let de = f - *cur_f;
        let p = if de <= 0.0 { 1.0 } else { (-de / temp).exp() };
        *accept_sum += p.min(1.0);
        *accept_count += 1;
        let accepted = de <= 0.0 || ctx.rand.uniform() < p;
        if accepted {
            *cur_x = x;
            *cur_f = f;
            ctx.improve(&cur_x.clone(), *cur_f);
        } else {
            *rejects += 1;
        }
    }

    /// one inner loop: serial chain or a fleet batch assimilated in
    /// the scheduler's receive order. returns the inner objective
    /// trace and the visited chain positions, or none on quit.
    fn equilibrate(&mut self, group: &Group) -> Result<Option<(Vec<Objective>, Vec<Vec<f64>>)>> {
        let inner = self.cfg.inner;
        let mut trace = Vec::with_capacity(inner);
        let mut chain = Vec::with_capacity(inner);
        if !self.engine.is_parallel() {
            for _ in 0..inner {
                if record::quit_requested() {
                    return Ok(None);
                }
                let mut x = self
                    .kernel
                    .propose(&mut self.ctx, group, &self.cur_x, self.cur_f);
                let f = match self.eval(&mut x)? {
                    Some(f) => f,
                    None => return Ok(None),
                };
                Self::metropolis(
                    &mut self.ctx,
                    &mut self.cur_x,
                    &mut self.cur_f,
                    self.temp,
                    &mut self.accept_sum,
                    &mut self.accept_count,
                    &mut self.rejects,
                    x,
                    f,
                );
                trace.push(self.cur_f);
                chain.push(self.cur_x.clone());
            }
            return Ok(Some((trace, chain)));
        }
        // parallel: proposals are generated from the chain state
        // current at send time; the metropolis decisions happen in
        // the receive order the scheduler dictates
        struct Shared {
            ctx: Context,
            cur_x: Vec<f64>,
            cur_f: Objective,
            sent: Vec<Option<Vec<f64>>>,
            accept_sum: f64,
            accept_count: usize,
            rejects: usize,
            trace: Vec<Objective>,
            chain: Vec<Vec<f64>>,
        }
        let shared = RefCell::new(Shared {
            ctx: std::mem::replace(&mut self.ctx, Context::new(0, 0)),
            cur_x: std::mem::take(&mut self.cur_x),
            cur_f: self.cur_f,
            sent: vec![None; inner],
            accept_sum: self.accept_sum,
            accept_count: self.accept_count,
            rejects: self.rejects,
            trace: Vec::with_capacity(inner),
            chain: Vec::with_capacity(inner),
        });
        let temp = self.temp;
        let kernel = &self.kernel;
        let fleet = self.engine.fleet_mut().unwrap();
        let taken = fleet.dispatch(
            inner,
            |i| {
                let s = &mut *shared.borrow_mut();
                let mut x = kernel.propose(&mut s.ctx, group, &s.cur_x, s.cur_f);
                let a = s.ctx.fraction();
                for (j, v) in x.iter_mut().enumerate() {
                    let p = group.param(j);
                    let best = if s.ctx.best_x.is_empty() { *v } else { s.ctx.best_x[j] };
                    *v = s.ctx.telescope.correct(a, p.lwr(), p.upr(), best, *v, &mut s.ctx.viols);
                }
                s.sent[i] = Some(x.clone());
                if s.ctx.best_x.is_empty() {
                    Packet::bare(x)
                } else {
                    Packet::advised(x, s.ctx.best_f, Vec::new())
                }
            },
            |i, outcome| {
                let s = &mut *shared.borrow_mut();
                s.ctx.count(1);
                if let Some(x) = s.sent[i].take() {
                    let (mut cur_x, mut cur_f) = (std::mem::take(&mut s.cur_x), s.cur_f);
                    Self::metropolis(
                        &mut s.ctx,
                        &mut cur_x,
                        &mut cur_f,
                        temp,
                        &mut s.accept_sum,
                        &mut s.accept_count,
                        &mut s.rejects,
                        x,
                        outcome.objective(),
                    );
                    s.cur_x = cur_x;
                    s.cur_f = cur_f;
                    s.trace.push(s.cur_f);
                    let snapshot = s.cur_x.clone();
                    s.chain.push(snapshot);
                }
                Ok(())
            },
        )?;
        let inner_state = shared.into_inner();
        self.ctx = inner_state.ctx;
        self.cur_x = inner_state.cur_x;
        self.cur_f = inner_state.cur_f;
        self.accept_sum = inner_state.accept_sum;
        self.accept_count = inner_state.accept_count;
        self.rejects = inner_state.rejects;
        if taken < inner {
            return Ok(None);
        }
        Ok(Some((inner_state.trace, inner_state.chain)))
    }

    /// rebuild the vanderbilt step matrix from the inner-loop chain;
    /// a failed factorization falls back to the gaussian kernel for
    /// the next outer iteration
    fn reshape(&mut self, samples: &[Vec<f64>]) {
        if !matches!(self.kernel, Kernel::Vanderbilt(_)) {
            return;
        }
        let n = self.n();
        let m = samples.len();
        if m < 2 {
            return;
        }
        let mut mean = vec![0.0; n];
        for x in samples {
            for (a, v) in mean.iter_mut().zip(x) {
                *a += v / m as f64;
            }
        }
        let growth = crate::VSA_STEP_GROWTH / (crate::VSA_STEP_CHI * m as f64);
        let mut s = linalg::zeros(n, n);
        for x in samples {
            for i in 0..n {
                for j in 0..n {
                    s[i][j] += growth * (x[i] - mean[i]) * (x[j] - mean[j]) / m as f64;
                }
            }
        }
        match linalg::cholesky(&s) {
            Ok(q) => self.kernel = Kernel::Vanderbilt(Some(q)),
            Err(e) => {
                log::warn!("step matrix rebuild failed ({}), gaussian fallback", e);
                self.kernel = Kernel::Vanderbilt(None);
            }
        }
    }
}

impl Strategy for Anneal {
    fn name(&self) -> &'static str {
        match self.algorithm {
            Algorithm::Vsa => "vanderbilt annealing",
            Algorithm::Csa => "combinatorial annealing",
            _ => "simulated annealing",
        }
    }

    fn initialize(&mut self) -> Result<()> {
        if self.cfg.outer == 0 || self.cfg.inner == 0 {
            return Err(crate::Error::Config(
                "annealing needs positive inner and outer loop counts".to_string(),
            ));
        }
        if self.algorithm == Algorithm::Csa {
            let group = self.engine.model().group();
            if group.params().iter().any(|p| p.kind() != Kind::Integer) {
                return Err(crate::Error::Config(
                    "combinatorial annealing requires integer parameters".to_string(),
                ));
            }
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
                self.engine.model_mut().write_params(&prior.x);
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

        let mut termination = Termination::Budget;
        if !self.melt()? {
            termination = Termination::Quit;
        } else {
            out.iteration(self.ctx.evals, self.ctx.best_f, 1.0, &self.ctx.best_x.clone())?;
            for outer in 1..=self.cfg.outer {
                if record::quit_requested() {
                    termination = Termination::Quit;
                    break;
                }
                let (trace, chain) = match self.equilibrate(&group)? {
                    Some(pair) => pair,
                    None => {
                        termination = Termination::Quit;
                        break;
                    }
                };
                self.outer_done = outer;
                self.reshape(&chain);
                self.temp *= self.factor;
                let median = Self::median(&trace);
                let spread = if median.is_finite() && median != 0.0 {
                    ((median - self.ctx.best_f) / median).abs()
                } else {
                    1.0
                };
                out.iteration(self.ctx.evals, self.ctx.best_f, spread, &self.ctx.best_x.clone())?;
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
        let p_acc = if self.accept_count > 0 {
            self.accept_sum / self.accept_count as f64
        } else {
            0.0
        };
        writeln!(out, "Algorithm               : {}", self.name())?;
        writeln!(out, "Melting Evals           : {}", self.melt_evals)?;
        writeln!(out, "Avg. Energy Change      : {:.6E}", self.de_avg)?;
        writeln!(out, "Initial Temperature     : {:.6E}", self.temp_init)?;
        writeln!(out, "Final Temperature       : {:.6E}", self.temp_final)?;
        writeln!(out, "Reduction Factor        : {:.6}", self.factor)?;
        writeln!(out, "Outer Iterations        : {}", self.outer_done)?;
        writeln!(out, "Acceptance Estimate     : {:.4}", p_acc)?;
        writeln!(out, "Rejected Moves          : {}", self.rejects)?;
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
    use crate::params::Descriptor;

    fn anneal(algorithm: Algorithm, model: Surface) -> Anneal {
        let config = Config {
            seed: 2,
            sa: SaConfig {
                melts: 30,
                outer: 5,
                inner: 5,
                ..SaConfig::default()
            },
            ..Config::default()
        };
        Anneal::new(algorithm, &config, Engine::serial(Box::new(model)))
    }

    #[test]
    fn flat_melt_keeps_temperatures_finite() {
        let group = Surface::cube(2, 0.0, 1.0);
        let mut sa = anneal(Algorithm::Sa, Surface::single(group, |_| 3.5));
        assert!(sa.melt().unwrap());
        assert!(sa.temp_init.is_finite() && sa.temp_init > 0.0);
        assert!(sa.temp_final.is_finite() && sa.temp_final > 0.0);
        assert!(sa.factor.is_finite() && sa.factor > 0.0);
    }

    #[test]
    fn melt_orders_the_temperature_range() {
        let mut sa = anneal(Algorithm::Sa, Surface::sphere(3, -5.0, 5.0));
        assert!(sa.melt().unwrap());
        assert!(sa.temp_final < sa.temp_init);
        assert!(sa.factor < 1.0);
    }

    #[test]
    fn discrete_kernel_always_changes_one_coordinate() {
        let group = crate::params::Group::new(vec![
            Descriptor::integer("a", 0.0, 4.0, 2.0),
            Descriptor::integer("b", -3.0, 3.0, 0.0),
        ]);
        let mut ctx = Context::new(9, 100);
        let kernel = Kernel::Discrete;
        let cur = vec![2.0, 0.0];
        for _ in 0..200 {
            let x = kernel.propose(&mut ctx, &group, &cur, 1.0);
            let changed = x.iter().zip(&cur).filter(|(a, b)| a != b).count();
            assert_eq!(changed, 1);
            assert!(group.feasible(&x));
        }
    }

    #[test]
    fn discrete_kernel_wraps_at_the_range_edge() {
        let group = crate::params::Group::new(vec![Descriptor::integer("a", 0.0, 3.0, 0.0)]);
        let mut ctx = Context::new(4, 100);
        let kernel = Kernel::Discrete;
        for _ in 0..100 {
            let x = kernel.propose(&mut ctx, &group, &[0.0], 1.0);
            assert!(x[0] == 1.0 || x[0] == 3.0);
        }
    }

    #[test]
    fn csa_rejects_real_parameters() {
        let mut csa = anneal(Algorithm::Csa, Surface::sphere(2, 0.0, 1.0));
        assert!(csa.initialize().is_err());
    }
}
