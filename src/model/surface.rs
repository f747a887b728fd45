use super::Model;
use crate::Objective;
use crate::params::Descriptor;
use crate::params::Group;
use std::sync::Arc;

type Eval = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// in-process analytic model. used by the test suite and by demo
/// configurations; a calibration deployment swaps in an adapter that
/// shells out to the real simulator instead.
#[derive(Clone)]
pub struct Surface {
    group: Group,
    objectives: Vec<Eval>,
    counter: usize,
    warm: bool,
}

impl Surface {
    pub fn single(group: Group, f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            group,
            objectives: vec![Arc::new(f)],
            counter: 0,
            warm: false,
        }
    }

    pub fn multi(group: Group, objectives: Vec<Eval>) -> Self {
        Self {
            group,
            objectives,
            counter: 0,
            warm: false,
        }
    }

    pub fn with_warm_start(mut self) -> Self {
        self.warm = true;
        self
    }

    /// n-dimensional box with identical bounds per dimension
    pub fn cube(n: usize, lwr: f64, upr: f64) -> Group {
        Group::new(
            (0..n)
                .map(|j| Descriptor::real(&format!("x{}", j), lwr, upr, (lwr + upr) / 2.0))
                .collect(),
        )
    }

    pub fn sphere(n: usize, lwr: f64, upr: f64) -> Self {
        Self::single(Self::cube(n, lwr, upr), |x| {
            x.iter().map(|v| v * v).sum::<f64>()
        })
    }

    pub fn rosenbrock(n: usize, lwr: f64, upr: f64) -> Self {
        Self::single(Self::cube(n, lwr, upr), |x| {
            x.windows(2)
                .map(|w| 100.0 * (w[1] - w[0] * w[0]).powi(2) + (1.0 - w[0]).powi(2))
                .sum::<f64>()
        })
    }

    pub fn rastrigin(n: usize, lwr: f64, upr: f64) -> Self {
        Self::single(Self::cube(n, lwr, upr), |x| {
            10.0 * x.len() as f64
                + x.iter()
                    .map(|v| v * v - 10.0 * (2.0 * std::f64::consts::PI * v).cos())
                    .sum::<f64>()
        })
    }

    pub fn griewank(n: usize, lwr: f64, upr: f64) -> Self {
        Self::single(Self::cube(n, lwr, upr), |x| {
            let sum = x.iter().map(|v| v * v).sum::<f64>() / 4000.0;
            let prod = x
                .iter()
                .enumerate()
                .map(|(j, v)| (v / ((j + 1) as f64).sqrt()).cos())
                .product::<f64>();
            sum - prod + 1.0
        })
    }
}

impl Model for Surface {
    fn objectives(&self) -> usize {
        self.objectives.len()
    }

    fn evaluate(&mut self) -> Objective {
        self.counter += 1;
        let x = self.group.values();
        (self.objectives[0])(&x)
    }

    fn evaluate_multi(&mut self, f: &mut [Objective]) {
        self.counter += 1;
        let x = self.group.values();
        for (slot, eval) in f.iter_mut().zip(&self.objectives) {
            *slot = eval(&x);
        }
    }

    fn group(&self) -> &Group {
        &self.group
    }

    fn group_mut(&mut self) -> &mut Group {
        &mut self.group
    }

    fn check_warm_start(&self) -> bool {
        self.warm
    }

    fn counter(&self) -> usize {
        self.counter
    }

    fn set_counter(&mut self, n: usize) {
        self.counter = n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_has_origin_minimum() {
        let mut m = Surface::sphere(3, -5.0, 5.0);
        m.write_params(&[0.0, 0.0, 0.0]);
        assert_eq!(m.evaluate(), 0.0);
        m.write_params(&[1.0, 2.0, 2.0]);
        assert_eq!(m.evaluate(), 9.0);
        assert_eq!(m.counter(), 2);
    }

    #[test]
    fn write_read_round_trip() {
        let mut m = Surface::sphere(2, -1.0, 1.0);
        m.write_params(&[0.5, -0.25]);
        let mut out = [0.0; 2];
        m.read_params(&mut out);
        assert_eq!(out, [0.5, -0.25]);
    }

    #[test]
    fn multi_objective_reports_width() {
        let g = Surface::cube(2, 0.0, 1.0);
        let m = Surface::multi(
            g,
            vec![
                Arc::new(|x: &[f64]| x.iter().map(|v| v * v).sum()),
                Arc::new(|x: &[f64]| x.iter().map(|v| (v - 1.0) * (v - 1.0)).sum()),
            ],
        );
        assert_eq!(m.objectives(), 2);
    }
}
