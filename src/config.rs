//! the single input file read by every strategy. each algorithm owns
//! a `Begin<Alg>`/`End<Alg>` block; unknown keys inside a recognized
//! block are logged and ignored, malformed values are configuration
//! errors. an optional `BeginInitParams` block seeds the initial
//! population with candidate rows in input units.

use crate::Error;
use crate::Result;
use crate::archive::Metric;
use crate::params::Group;
use crate::params::Telescope;
use crate::params::sampling::Sampler;
use crate::search::Algorithm;
use std::path::Path;

/// inertia reduction schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reduction {
    /// w falls linearly to zero over the generations
    Linear,
    /// w shrinks geometrically by the given rate per generation
    Rate(f64),
}

#[derive(Debug, Clone)]
pub struct PsoConfig {
    pub swarm: usize,
    pub generations: usize,
    pub constriction: f64,
    pub cognitive: f64,
    pub social: f64,
    pub inertia: f64,
    pub reduction: Reduction,
    pub init: Sampler,
    pub convergence: f64,
}

impl Default for PsoConfig {
    fn default() -> Self {
        Self {
            swarm: crate::PSO_SWARM_SIZE,
            generations: crate::PSO_GENERATIONS,
            constriction: crate::PSO_CONSTRICTION,
            cognitive: crate::PSO_COGNITIVE,
            social: crate::PSO_SOCIAL,
            inertia: crate::PSO_INERTIA,
            reduction: Reduction::Rate(0.10),
            init: Sampler::Random,
            convergence: 0.0,
        }
    }
}

/// neighborhood perturbation variant of the dimensioned searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Perturbation {
    /// gaussian neighborhood move
    #[default]
    Standard,
    /// deterministic x*beta scaling
    NoRand,
    /// truncate to the integer grid before perturbing
    TryInt,
}

#[derive(Debug, Clone)]
pub struct DdsConfig {
    pub r: f64,
    pub budget: usize,
    pub use_initial: bool,
    pub variant: Perturbation,
    pub alpha: f64,
    pub beta: f64,
    pub debug: bool,
}

impl Default for DdsConfig {
    fn default() -> Self {
        Self {
            r: crate::DDS_PERTURBATION,
            budget: 1000,
            use_initial: false,
            variant: Perturbation::Standard,
            alpha: 1.0,
            beta: 1.0,
            debug: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaddsConfig {
    pub r: f64,
    pub budget: usize,
    pub metric: Metric,
}

impl Default for PaddsConfig {
    fn default() -> Self {
        Self {
            r: crate::DDS_PERTURBATION,
            budget: 1000,
            metric: Metric::Random,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SceConfig {
    pub budget: usize,
    pub stagnation: usize,
    pub pct_change: f64,
    pub pop_conv: f64,
    pub complexes: usize,
    pub min_complexes: usize,
    /// zero means the 2n+1 default
    pub per_complex: usize,
    /// zero means the n+1 default
    pub per_sub: usize,
    /// zero means one pass per complex member
    pub evolutions: usize,
    pub use_initial: bool,
}

impl Default for SceConfig {
    fn default() -> Self {
        Self {
            budget: 10_000,
            stagnation: 5,
            pct_change: 0.01,
            pop_conv: 0.001,
            complexes: 3,
            min_complexes: 1,
            per_complex: 0,
            per_sub: 0,
            evolutions: 0,
            use_initial: false,
        }
    }
}

/// final-temperature policy of the annealing family
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FinalTemp {
    Vanderbilt,
    BenAmeur,
    User(f64),
}

/// transition kernel of the annealing family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Uniform,
    Gauss,
    Vanderbilt,
}

#[derive(Debug, Clone)]
pub struct SaConfig {
    pub melts: usize,
    pub reduction: f64,
    pub final_temp: FinalTemp,
    pub transition: Transition,
    pub outer: usize,
    pub inner: usize,
    pub convergence: f64,
}

impl Default for SaConfig {
    fn default() -> Self {
        Self {
            melts: crate::SA_MELTS,
            reduction: crate::SA_TEMP_FACTOR,
            final_temp: FinalTemp::Vanderbilt,
            transition: Transition::Uniform,
            outer: 20,
            inner: 10,
            convergence: 0.001,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DdsAuConfig {
    pub r: f64,
    pub searches: usize,
    pub threshold: f64,
    pub min_iters: usize,
    pub max_iters: usize,
    pub parallel: bool,
    pub randomize: bool,
    pub revise: bool,
}

impl Default for DdsAuConfig {
    fn default() -> Self {
        Self {
            r: crate::DDS_PERTURBATION,
            searches: 25,
            threshold: 1.0,
            min_iters: 100,
            max_iters: 200,
            parallel: false,
            randomize: false,
            revise: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GmlConfig {
    pub starts: usize,
    pub max_iters: usize,
    pub lambda: f64,
    pub scale: f64,
    pub convergence: f64,
    pub step: f64,
}

impl Default for GmlConfig {
    fn default() -> Self {
        Self {
            starts: 1,
            max_iters: 30,
            lambda: crate::LM_LAMBDA0,
            scale: crate::LM_LAMBDA_SCALE,
            convergence: 1e-4,
            step: crate::LM_STEP_REL,
        }
    }
}

/// everything the dispatcher needs to run one calibration
#[derive(Debug, Clone)]
pub struct Config {
    pub algorithm: Algorithm,
    pub seed: u64,
    pub workers: usize,
    pub synchronous: bool,
    pub telescope: Telescope,
    pub init_params: Vec<Vec<f64>>,
    pub pso: PsoConfig,
    pub dds: DdsConfig,
    pub padds: PaddsConfig,
    pub sce: SceConfig,
    pub sa: SaConfig,
    pub ddsau: DdsAuConfig,
    pub gml: GmlConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Dds,
            seed: 1,
            workers: 0,
            synchronous: false,
            telescope: Telescope::default(),
            init_params: Vec::new(),
            pso: PsoConfig::default(),
            dds: DdsConfig::default(),
            padds: PaddsConfig::default(),
            sce: SceConfig::default(),
            sa: SaConfig::default(),
            ddsau: DdsAuConfig::default(),
            gml: GmlConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path, group: &Group) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&text, group)
    }

    pub fn parse(text: &str, group: &Group) -> Result<Self> {
        let mut config = Self::default();
        let mut block: Option<String> = None;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let lower = line.to_ascii_lowercase();
            if let Some(name) = lower.strip_prefix("begin") {
                if block.is_some() {
                    return Err(Error::Config(format!("nested block at line {}", lineno + 1)));
                }
                block = Some(name.trim().to_string());
                continue;
            }
            if lower.starts_with("end") {
                block = None;
                continue;
            }
            match block.as_deref() {
                None => config.top_level(line)?,
                Some("initparams") => config.init_row(line, group)?,
                Some(name) => config.keyed(name, line)?,
            }
        }
        config.validate()
    }

    fn top_level(&mut self, line: &str) -> Result<()> {
        let (key, value) = split(line)?;
        match key.as_str() {
            "programtype" => self.algorithm = Algorithm::parse(&value)?,
            "randomseed" => self.seed = parse(&value)?,
            "telescopingbounds" => {
                self.telescope = match value.as_str() {
                    "none" | "off" => Telescope::Off,
                    "linear" => Telescope::Linear,
                    other => {
                        return Err(Error::Config(format!("unknown telescoping '{}'", other)));
                    }
                }
            }
            "synchreceives" => self.synchronous = yes(&value)?,
            other => log::warn!("ignoring unknown top-level key '{}'", other),
        }
        Ok(())
    }

    fn init_row(&mut self, line: &str, group: &Group) -> Result<()> {
        let row = line
            .split_whitespace()
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| Error::Config(format!("bad initial value '{}'", s)))
            })
            .collect::<Result<Vec<_>>>()?;
        if row.len() != group.len() {
            return Err(Error::Config(format!(
                "initial row has {} values, expected {}",
                row.len(),
                group.len()
            )));
        }
        let converted = row
            .iter()
            .enumerate()
            .map(|(j, &v)| group.param(j).convert_in(v))
            .collect();
        self.init_params.push(converted);
        Ok(())
    }

    fn keyed(&mut self, block: &str, line: &str) -> Result<()> {
        let (key, value) = split(line)?;
        match block {
            "particleswarm" | "appso" => self.pso_key(&key, &value),
            "dds" | "paralleldds" => self.dds_key(&key, &value),
            "padds" | "parapadds" => self.padds_key(&key, &value),
            "sceua" => self.sce_key(&key, &value),
            "simulatedalg" | "annealing" | "vanderbiltannealing" | "combinatorialannealing" => {
                self.sa_key(&key, &value)
            }
            "ddsau" => self.ddsau_key(&key, &value),
            "levenberg" | "gmlms" => self.gml_key(&key, &value),
            other => {
                log::warn!("ignoring unrecognized block '{}'", other);
                Ok(())
            }
        }
    }

    fn pso_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "swarmsize" => self.pso.swarm = parse(value)?,
            "numgenerations" => self.pso.generations = parse(value)?,
            "constrictionfactor" => self.pso.constriction = parse(value)?,
            "cognitiveparam" => self.pso.cognitive = parse(value)?,
            "socialparam" => self.pso.social = parse(value)?,
            "inertiaweight" => self.pso.inertia = parse(value)?,
            "inertiareductionrate" => {
                self.pso.reduction = if value == "linear" {
                    Reduction::Linear
                } else {
                    Reduction::Rate(parse(value)?)
                }
            }
            "initpopulationmethod" => {
                self.pso.init = match value {
                    "random" => Sampler::Random,
                    "quadtree" => Sampler::Quadtree,
                    "lhs" => Sampler::Lhs,
                    other => {
                        return Err(Error::Config(format!("unknown population method '{}'", other)));
                    }
                }
            }
            "convergenceval" => self.pso.convergence = parse(value)?,
            other => log::warn!("ignoring unknown swarm key '{}'", other),
        }
        Ok(())
    }

    fn dds_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "perturbationvalue" => self.dds.r = parse(value)?,
            "maxiterations" => self.dds.budget = parse(value)?,
            "useinitialparamvalues" => self.dds.use_initial = true,
            "userandomparamvalues" => self.dds.use_initial = false,
            "enabledebugging" => self.dds.debug = true,
            "useopt" => {
                self.dds.variant = match value {
                    "standard" => Perturbation::Standard,
                    "no-rand-num" => Perturbation::NoRand,
                    "try-int-solution" => Perturbation::TryInt,
                    other => return Err(Error::Config(format!("unknown UseOpt '{}'", other))),
                }
            }
            "alphavalue" => self.dds.alpha = parse(value)?,
            "betavalue" => self.dds.beta = parse(value)?,
            other => log::warn!("ignoring unknown dds key '{}'", other),
        }
        Ok(())
    }

    fn padds_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "perturbationvalue" => self.padds.r = parse(value)?,
            "maxiterations" => self.padds.budget = parse(value)?,
            "selectionmetric" => {
                self.padds.metric = match value {
                    "random" => Metric::Random,
                    "crowdingdistance" => Metric::Crowding,
                    "estimatedhypervolumecontribution" => Metric::HvEstimate,
                    "exacthypervolumecontribution" => Metric::HvExact,
                    other => {
                        return Err(Error::Config(format!("unknown selection metric '{}'", other)));
                    }
                }
            }
            other => log::warn!("ignoring unknown padds key '{}'", other),
        }
        Ok(())
    }

    fn sce_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "budget" => self.sce.budget = parse(value)?,
            "loopstagnationcriteria" => self.sce.stagnation = parse(value)?,
            "pctchangecriteria" => self.sce.pct_change = parse(value)?,
            "popconvcriteria" => self.sce.pop_conv = parse(value)?,
            "numcomplexes" => self.sce.complexes = parse(value)?,
            "numpointspercomplex" => self.sce.per_complex = parse(value)?,
            "numpointspersubcomplex" => self.sce.per_sub = parse(value)?,
            "numevolutionsteps" => self.sce.evolutions = parse(value)?,
            "minnumofcomplexes" => self.sce.min_complexes = parse(value)?,
            "useinitialpoint" => self.sce.use_initial = yes(value)?,
            other => log::warn!("ignoring unknown sce key '{}'", other),
        }
        Ok(())
    }

    fn sa_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "numinitialtrials" => self.sa.melts = parse(value)?,
            "temperaturescalefactor" => self.sa.reduction = parse(value)?,
            "finaltemperature" => {
                self.sa.final_temp = match value {
                    "computed-vanderbilt" => FinalTemp::Vanderbilt,
                    "computed-ben-ameur" => FinalTemp::BenAmeur,
                    number => FinalTemp::User(parse(number)?),
                }
            }
            "transitionmethod" => {
                self.sa.transition = match value {
                    "uniform" => Transition::Uniform,
                    "gauss" => Transition::Gauss,
                    "vanderbilt" => Transition::Vanderbilt,
                    other => {
                        return Err(Error::Config(format!("unknown transition '{}'", other)));
                    }
                }
            }
            "outeriterations" => self.sa.outer = parse(value)?,
            "inneriterations" => self.sa.inner = parse(value)?,
            "convergenceval" => self.sa.convergence = parse(value)?,
            other => log::warn!("ignoring unknown annealing key '{}'", other),
        }
        Ok(())
    }

    fn ddsau_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "perturbationvalue" => self.ddsau.r = parse(value)?,
            "numsearches" => self.ddsau.searches = parse(value)?,
            "threshold" => self.ddsau.threshold = parse(value)?,
            "miniterspersearch" => self.ddsau.min_iters = parse(value)?,
            "maxiterspersearch" => self.ddsau.max_iters = parse(value)?,
            "parallelsearches" => self.ddsau.parallel = yes(value)?,
            "randomize" => self.ddsau.randomize = yes(value)?,
            "reviseau" => self.ddsau.revise = yes(value)?,
            other => log::warn!("ignoring unknown ddsau key '{}'", other),
        }
        Ok(())
    }

    fn gml_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "nummultistarts" => self.gml.starts = parse(value)?,
            "maxiterations" => self.gml.max_iters = parse(value)?,
            "initiallambda" => self.gml.lambda = parse(value)?,
            "lambdascalefactor" => self.gml.scale = parse(value)?,
            "convergenceval" => self.gml.convergence = parse(value)?,
            "relativestepsize" => self.gml.step = parse(value)?,
            other => log::warn!("ignoring unknown levenberg key '{}'", other),
        }
        Ok(())
    }

    fn validate(self) -> Result<Self> {
        for (label, r) in [("dds", self.dds.r), ("padds", self.padds.r), ("ddsau", self.ddsau.r)] {
            if !(0.0 < r && r <= 1.0) {
                return Err(Error::Config(format!(
                    "{} perturbation must lie in (0, 1], got {}",
                    label, r
                )));
            }
        }
        if self.dds.budget < crate::MIN_BUDGET {
            return Err(Error::Config(format!(
                "dds budget {} below minimum {}",
                self.dds.budget,
                crate::MIN_BUDGET
            )));
        }
        if self.sce.complexes < 1 {
            return Err(Error::Config("sce needs at least one complex".to_string()));
        }
        if self.ddsau.min_iters > self.ddsau.max_iters {
            return Err(Error::Config(
                "ddsau MinItersPerSearch exceeds MaxItersPerSearch".to_string(),
            ));
        }
        Ok(self)
    }
}

fn split(line: &str) -> Result<(String, String)> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let key = parts
        .next()
        .ok_or_else(|| Error::Config(format!("malformed line '{}'", line)))?
        .to_ascii_lowercase();
    let value = parts.next().unwrap_or("").trim().to_ascii_lowercase();
    Ok((key, value))
}

fn parse<T: std::str::FromStr>(value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::Config(format!("cannot parse value '{}'", value)))
}

fn yes(value: &str) -> Result<bool> {
    match value {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        other => Err(Error::Config(format!("expected yes/no, got '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Surface;

    #[test]
    fn parses_blocks_and_ignores_unknown_keys() {
        let group = Surface::cube(2, 0.0, 1.0);
        let text = "
            ProgramType  DDS
            RandomSeed   77
            BeginDDS
            PerturbationValue 0.3
            MaxIterations 500
            SomeFutureKey 42
            EndDDS
        ";
        let config = Config::parse(text, &group).unwrap();
        assert_eq!(config.algorithm, Algorithm::Dds);
        assert_eq!(config.seed, 77);
        assert_eq!(config.dds.r, 0.3);
        assert_eq!(config.dds.budget, 500);
    }

    #[test]
    fn rejects_out_of_range_perturbation() {
        let group = Surface::cube(1, 0.0, 1.0);
        let text = "BeginDDS\nPerturbationValue 1.5\nEndDDS";
        assert!(matches!(
            Config::parse(text, &group),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_tiny_budget() {
        let group = Surface::cube(1, 0.0, 1.0);
        let text = "BeginDDS\nMaxIterations 50\nEndDDS";
        assert!(Config::parse(text, &group).is_err());
    }

    #[test]
    fn init_params_rows_convert_and_check_width() {
        let group = Surface::cube(2, 0.0, 1.0);
        let text = "BeginInitParams\n0.1 0.9\n0.5 0.5\nEndInitParams";
        let config = Config::parse(text, &group).unwrap();
        assert_eq!(config.init_params.len(), 2);
        assert_eq!(config.init_params[0], vec![0.1, 0.9]);

        let bad = "BeginInitParams\n0.1\nEndInitParams";
        assert!(Config::parse(bad, &group).is_err());
    }

    #[test]
    fn annealing_temperatures_parse_all_three_ways() {
        let group = Surface::cube(1, 0.0, 1.0);
        for (value, want) in [
            ("computed-vanderbilt", FinalTemp::Vanderbilt),
            ("computed-ben-ameur", FinalTemp::BenAmeur),
            ("0.05", FinalTemp::User(0.05)),
        ] {
            let text = format!("BeginAnnealing\nFinalTemperature {}\nEndAnnealing", value);
            let config = Config::parse(&text, &group).unwrap();
            assert_eq!(config.sa.final_temp, want);
        }
    }
}
