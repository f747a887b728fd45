use anyhow::bail;
use calibrant::config::Config;
use calibrant::model::Model;
use calibrant::model::Surface;
use calibrant::search;
use calibrant::search::Engine;
use clap::Parser;
use std::path::PathBuf;

/// drive a calibration run against one of the built-in benchmark
/// surfaces. a real deployment swaps the surface for its own model
/// adapter and links the library directly.
#[derive(Parser)]
#[command(name = "calibrant")]
struct Args {
    /// configuration file with Begin<Alg>/End<Alg> blocks
    config: PathBuf,
    /// benchmark surface: sphere, rosenbrock, rastrigin, griewank
    #[arg(long, default_value = "sphere")]
    surface: String,
    /// decision-space dimensionality
    #[arg(long, default_value_t = 2)]
    dimensions: usize,
    /// lower bound of every dimension
    #[arg(long, default_value_t = -5.0, allow_hyphen_values = true)]
    lower: f64,
    /// upper bound of every dimension
    #[arg(long, default_value_t = 5.0)]
    upper: f64,
    /// worker fleet size; zero means in-process for serial
    /// strategies and one-per-core for parallel ones
    #[arg(long, default_value_t = 0)]
    workers: usize,
    /// override the configured algorithm
    #[arg(long)]
    algorithm: Option<String>,
    /// override the configured random seed
    #[arg(long)]
    seed: Option<u64>,
}

fn surface(name: &str, n: usize, lwr: f64, upr: f64) -> anyhow::Result<Surface> {
    Ok(match name {
        "sphere" => Surface::sphere(n, lwr, upr),
        "rosenbrock" => Surface::rosenbrock(n, lwr, upr),
        "rastrigin" => Surface::rastrigin(n, lwr, upr),
        "griewank" => Surface::griewank(n, lwr, upr),
        other => bail!("unknown surface '{}'", other),
    })
}

fn main() -> anyhow::Result<()> {
    calibrant::init();
    let args = Args::parse();
    let model = surface(&args.surface, args.dimensions, args.lower, args.upper)?;
    let mut config = Config::load(&args.config, model.group())?;
    if let Some(name) = &args.algorithm {
        config.algorithm = search::Algorithm::parse(name)?;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    let workers = if args.workers == 0 && config.algorithm.parallel() {
        num_cpus::get().saturating_sub(1).max(1)
    } else {
        args.workers
    };
    config.workers = workers;
    log::info!(
        "running {} (seed {}, {} workers)",
        config.algorithm.name(),
        config.seed,
        workers
    );
    let engine = if workers > 0 {
        let template = model.clone();
        Engine::parallel(workers, config.synchronous, &move |_| {
            Box::new(template.clone()) as Box<dyn Model>
        })?
    } else {
        Engine::serial(Box::new(model))
    };
    let summary = search::run(config.algorithm, &config, engine)?;
    log::info!(
        "best objective {:.6E} at {:?} ({})",
        summary.best_f,
        summary.best_x,
        summary.termination
    );
    if !summary.front.is_empty() {
        log::info!("non-dominated front holds {} members", summary.front.len());
    }
    Ok(())
}
