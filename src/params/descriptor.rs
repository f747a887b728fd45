/// type tag of a decision variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Real,
    Integer,
}

/// input-value conversion applied only at i/o boundaries
/// (config rows, warm-start records). internal storage is
/// always in model units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Convert {
    None,
    Log10,
    Ln,
    Scale(f64),
}

impl Convert {
    pub fn apply(&self, v: f64) -> f64 {
        match self {
            Convert::None => v,
            Convert::Log10 => 10f64.powf(v),
            Convert::Ln => v.exp(),
            Convert::Scale(s) => v * s,
        }
    }
}

/// a single decision variable: name, feasible range, type tag,
/// current estimate. the estimate always satisfies lwr <= est <= upr
/// after every correction step.
#[derive(Debug, Clone)]
pub struct Descriptor {
    name: String,
    lwr: f64,
    upr: f64,
    est: f64,
    kind: Kind,
    convert: Convert,
}

impl Descriptor {
    pub fn real(name: &str, lwr: f64, upr: f64, est: f64) -> Self {
        Self {
            name: name.to_string(),
            lwr,
            upr,
            est,
            kind: Kind::Real,
            convert: Convert::None,
        }
    }

    pub fn integer(name: &str, lwr: f64, upr: f64, est: f64) -> Self {
        Self {
            name: name.to_string(),
            lwr,
            upr,
            est: est.round(),
            kind: Kind::Integer,
            convert: Convert::None,
        }
    }

    pub fn with_convert(mut self, convert: Convert) -> Self {
        self.convert = convert;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn lwr(&self) -> f64 {
        self.lwr
    }
    pub fn upr(&self) -> f64 {
        self.upr
    }
    pub fn kind(&self) -> Kind {
        self.kind
    }
    pub fn est(&self) -> f64 {
        self.est
    }

    /// write a new estimate, snapping integer variables to the grid
    /// and clamping into the feasible range
    pub fn set_est(&mut self, v: f64) {
        let v = match self.kind {
            Kind::Real => v,
            Kind::Integer => v.round(),
        };
        self.est = v.clamp(self.lwr, self.upr);
    }

    /// convert an input-unit value to model units
    pub fn convert_in(&self, v: f64) -> f64 {
        self.convert.apply(v)
    }

    pub fn range(&self) -> f64 {
        self.upr - self.lwr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_estimates_snap_to_grid() {
        let mut d = Descriptor::integer("k", 0.0, 10.0, 3.2);
        assert_eq!(d.est(), 3.0);
        d.set_est(7.8);
        assert_eq!(d.est(), 8.0);
        d.set_est(99.0);
        assert_eq!(d.est(), 10.0);
    }

    #[test]
    fn conversion_applies_only_on_request() {
        let d = Descriptor::real("logk", -3.0, 3.0, 0.0).with_convert(Convert::Log10);
        assert_eq!(d.convert_in(2.0), 100.0);
        assert_eq!(d.est(), 0.0);
    }
}
