use super::descriptor::Descriptor;

/// a pre-emption constraint emitted by the model alongside the
/// objective. strategies forward the incumbent constraint values to
/// workers so the model can short-circuit hopeless evaluations.
#[derive(Debug, Clone)]
pub struct Special {
    name: String,
    value: f64,
}

impl Special {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: 0.0,
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn value(&self) -> f64 {
        self.value
    }
    pub fn set_value(&mut self, v: f64) {
        self.value = v;
    }
}

/// ordered collection of decision variables plus the parallel list of
/// special (pre-emption) parameters. indices are stable for the life
/// of a run; only values change.
#[derive(Debug, Clone, Default)]
pub struct Group {
    params: Vec<Descriptor>,
    specials: Vec<Special>,
}

impl Group {
    pub fn new(params: Vec<Descriptor>) -> Self {
        Self {
            params,
            specials: Vec::new(),
        }
    }

    pub fn with_specials(mut self, specials: Vec<Special>) -> Self {
        self.specials = specials;
        self
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn specials(&self) -> &[Special] {
        &self.specials
    }

    pub fn specials_mut(&mut self) -> &mut [Special] {
        &mut self.specials
    }

    pub fn param(&self, j: usize) -> &Descriptor {
        &self.params[j]
    }

    pub fn param_mut(&mut self, j: usize) -> &mut Descriptor {
        &mut self.params[j]
    }

    pub fn params(&self) -> &[Descriptor] {
        &self.params
    }

    /// dense read of the current estimates
    pub fn read(&self, x: &mut [f64]) {
        for (v, p) in x.iter_mut().zip(&self.params) {
            *v = p.est();
        }
    }

    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.est()).collect()
    }

    /// dense write of a candidate. each descriptor applies its own
    /// grid snap and clamp, so the group invariant holds afterwards.
    pub fn write(&mut self, x: &[f64]) {
        for (p, &v) in self.params.iter_mut().zip(x) {
            p.set_est(v);
        }
    }

    /// feasible box as (lwr, upr) pairs
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.params.iter().map(|p| (p.lwr(), p.upr())).collect()
    }

    /// true iff every entry of x lies within its descriptor bounds
    pub fn feasible(&self, x: &[f64]) -> bool {
        x.iter()
            .zip(&self.params)
            .all(|(&v, p)| v >= p.lwr() && v <= p.upr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Group {
        Group::new(vec![
            Descriptor::real("a", -1.0, 1.0, 0.0),
            Descriptor::integer("b", 0.0, 5.0, 2.0),
        ])
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut g = group();
        g.write(&[0.25, 4.0]);
        let mut out = vec![0.0; 2];
        g.read(&mut out);
        assert_eq!(out, vec![0.25, 4.0]);
    }

    #[test]
    fn write_enforces_bounds_and_grid() {
        let mut g = group();
        g.write(&[3.0, 3.4]);
        assert_eq!(g.values(), vec![1.0, 3.0]);
        assert!(g.feasible(&g.values()));
    }
}
