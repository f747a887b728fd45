use crate::Objective;
use crate::params::Group;
use crate::params::Telescope;
use crate::params::Violations;
use crate::random::Rand;

/// per-run mutable state shared by every strategy: the canonical
/// random source, the evaluation budget and counter, the incumbent
/// best, and the bounds-correction diagnostics. the master owns the
/// only instance that exists after initialization.
pub struct Context {
    pub rand: Rand,
    pub budget: usize,
    pub evals: usize,
    pub best_x: Vec<f64>,
    pub best_f: Objective,
    pub viols: Violations,
    pub telescope: Telescope,
}

impl Context {
    pub fn new(seed: u64, budget: usize) -> Self {
        Self {
            rand: Rand::new(seed),
            budget,
            evals: 0,
            best_x: Vec::new(),
            best_f: f64::INFINITY,
            viols: Violations::default(),
            telescope: Telescope::default(),
        }
    }

    pub fn with_telescope(mut self, telescope: Telescope) -> Self {
        self.telescope = telescope;
        self
    }

    /// fraction of the budget consumed, in [0, 1]
    pub fn fraction(&self) -> f64 {
        if self.budget == 0 {
            return 0.0;
        }
        (self.evals as f64 / self.budget as f64).min(1.0)
    }

    pub fn count(&mut self, evals: usize) {
        self.evals += evals;
    }

    pub fn exhausted(&self) -> bool {
        self.evals >= self.budget
    }

    /// unconditional overwrite of the incumbent
    pub fn record(&mut self, x: &[f64], f: Objective) {
        self.best_x = x.to_vec();
        self.best_f = f;
    }

    /// keep the incumbent monotone: non-finite candidates never win,
    /// ties do not displace
    pub fn improve(&mut self, x: &[f64], f: Objective) -> bool {
        if f.is_finite() && f < self.best_f {
            self.record(x, f);
            true
        } else {
            false
        }
    }

    /// telescoping correction of a candidate toward the incumbent,
    /// applied before every evaluation once an incumbent exists
    pub fn telescope(&mut self, group: &Group, x: &mut [f64]) {
        if self.best_x.is_empty() {
            return;
        }
        let a = self.fraction();
        for (j, v) in x.iter_mut().enumerate() {
            let p = group.param(j);
            *v = self
                .telescope
                .correct(a, p.lwr(), p.upr(), self.best_x[j], *v, &mut self.viols);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Surface;

    #[test]
    fn incumbent_is_monotone_and_ignores_non_finite() {
        let mut ctx = Context::new(1, 100);
        assert!(ctx.improve(&[1.0], 5.0));
        assert!(!ctx.improve(&[2.0], 5.0));
        assert!(!ctx.improve(&[3.0], f64::NAN));
        assert!(!ctx.improve(&[4.0], f64::INFINITY));
        assert!(ctx.improve(&[5.0], 4.0));
        assert_eq!(ctx.best_x, vec![5.0]);
    }

    #[test]
    fn fraction_saturates_at_one() {
        let mut ctx = Context::new(1, 10);
        ctx.count(25);
        assert_eq!(ctx.fraction(), 1.0);
        assert!(ctx.exhausted());
    }

    #[test]
    fn telescoping_is_inert_without_an_incumbent() {
        let group = Surface::cube(2, 0.0, 1.0);
        let mut ctx = Context::new(1, 10);
        let mut x = vec![0.9, 0.1];
        ctx.telescope(&group, &mut x);
        assert_eq!(x, vec![0.9, 0.1]);
    }
}
