pub mod anneal;
pub mod context;
pub mod dds;
pub mod ddsau;
pub mod engine;
pub mod gml;
pub mod padds;
pub mod pso;
pub mod sce;
#[cfg(test)]
mod tests;

pub use context::Context;
pub use engine::Engine;

use crate::Error;
use crate::Objective;
use crate::Result;
use crate::archive::Entry;

/// the closed set of search strategies. serial and fleet-dispatched
/// variants share a tag pair; the dispatch table takes no plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Pso,
    Appso,
    Dds,
    Pdds,
    Padds,
    ParaPadds,
    SceUa,
    Sa,
    Vsa,
    Csa,
    DdsAu,
    GmlMs,
}

impl Algorithm {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pso" | "particleswarm" => Ok(Algorithm::Pso),
            "appso" => Ok(Algorithm::Appso),
            "dds" => Ok(Algorithm::Dds),
            "pdds" | "paralleldds" => Ok(Algorithm::Pdds),
            "padds" => Ok(Algorithm::Padds),
            "parapadds" => Ok(Algorithm::ParaPadds),
            "sceua" | "sce-ua" => Ok(Algorithm::SceUa),
            "sa" | "annealing" => Ok(Algorithm::Sa),
            "vsa" | "vanderbiltannealing" => Ok(Algorithm::Vsa),
            "csa" | "combinatorialannealing" => Ok(Algorithm::Csa),
            "ddsau" => Ok(Algorithm::DdsAu),
            "gmlms" | "gml-ms" | "levenberg-ms" => Ok(Algorithm::GmlMs),
            other => Err(Error::Config(format!("unknown algorithm '{}'", other))),
        }
    }

    /// true when the variant evaluates through the worker fleet
    pub fn parallel(&self) -> bool {
        matches!(
            self,
            Algorithm::Appso | Algorithm::Pdds | Algorithm::ParaPadds
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Pso => "particle swarm",
            Algorithm::Appso => "async parallel particle swarm",
            Algorithm::Dds => "dynamically dimensioned search",
            Algorithm::Pdds => "parallel dynamically dimensioned search",
            Algorithm::Padds => "pareto archived dds",
            Algorithm::ParaPadds => "parallel pareto archived dds",
            Algorithm::SceUa => "shuffled complex evolution",
            Algorithm::Sa => "simulated annealing",
            Algorithm::Vsa => "vanderbilt annealing",
            Algorithm::Csa => "combinatorial annealing",
            Algorithm::DdsAu => "dds uncertainty approximation",
            Algorithm::GmlMs => "levenberg multi-start",
        }
    }
}

/// why the search stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Budget,
    Converged,
    Stagnation,
    PopulationCollapse,
    Quit,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Termination::Budget => "budget exhausted",
            Termination::Converged => "convergence criterion met",
            Termination::Stagnation => "loop stagnation",
            Termination::PopulationCollapse => "population range collapsed",
            Termination::Quit => "user quit",
        };
        write!(f, "{}", reason)
    }
}

/// the result of one optimization run
#[derive(Debug, Clone)]
pub struct Summary {
    pub best_x: Vec<f64>,
    pub best_f: Objective,
    pub front: Vec<Entry>,
    pub evals: usize,
    pub termination: Termination,
}

impl Summary {
    pub fn single(best_x: Vec<f64>, best_f: Objective, evals: usize, termination: Termination) -> Self {
        Self {
            best_x,
            best_f,
            front: Vec::new(),
            evals,
            termination,
        }
    }
}

/// the capability interface every strategy exposes to the dispatcher
pub trait Strategy {
    fn name(&self) -> &'static str;
    /// allocate populations and validate the setup; no evaluations
    fn initialize(&mut self) -> Result<()>;
    /// seed from a prior run record; false on a warm-start miss
    fn warm_start(&mut self) -> Result<bool>;
    /// run the search to termination
    fn optimize(&mut self) -> Result<Summary>;
    /// append the metrics block of the finished run
    fn write_metrics(&self, out: &mut dyn std::io::Write) -> std::io::Result<()>;
}

/// build, warm-start, run, and record one strategy. the closed
/// dispatch table of the framework.
pub fn run(
    algorithm: Algorithm,
    config: &crate::config::Config,
    engine: Engine,
) -> Result<Summary> {
    if algorithm.parallel() && engine.workers() == 0 {
        return Err(Error::Scheduler(format!(
            "{} needs a worker fleet",
            algorithm.name()
        )));
    }
    let mut strategy: Box<dyn Strategy> = match algorithm {
        Algorithm::Pso | Algorithm::Appso => {
            Box::new(pso::ParticleSwarm::new(config, engine))
        }
        Algorithm::Dds | Algorithm::Pdds => Box::new(dds::Dimensioned::new(config, engine)),
        Algorithm::Padds | Algorithm::ParaPadds => {
            Box::new(padds::ParetoDimensioned::new(config, engine))
        }
        Algorithm::SceUa => Box::new(sce::Shuffled::new(config, engine)),
        Algorithm::Sa | Algorithm::Vsa | Algorithm::Csa => {
            Box::new(anneal::Anneal::new(algorithm, config, engine))
        }
        Algorithm::DdsAu => Box::new(ddsau::Ensemble::new(config, engine)),
        Algorithm::GmlMs => Box::new(gml::MultiStart::new(config, engine)),
    };
    strategy.initialize()?;
    match strategy.warm_start() {
        Ok(true) => log::info!("{} resumed from prior record", strategy.name()),
        Ok(false) => {}
        Err(e) => log::warn!("warm start failed ({}), starting fresh", e),
    }
    let summary = strategy.optimize()?;
    let mut block = Vec::new();
    strategy.write_metrics(&mut block)?;
    crate::record::append_metrics(
        &crate::record::record_path(0),
        &String::from_utf8_lossy(&block),
    )?;
    log::info!(
        "{} finished: best {:.6E} after {} evaluations ({})",
        strategy.name(),
        summary.best_f,
        summary.evals,
        summary.termination
    );
    Ok(summary)
}
