pub mod archive;
pub mod config;
pub mod error;
pub mod linalg;
pub mod model;
pub mod params;
pub mod random;
pub mod record;
pub mod schedule;
pub mod search;

pub use error::Error;
pub use error::Result;

/// dimensional analysis types
pub type Objective = f64;
pub type Decision = f64;
pub type Temperature = f64;
pub type Probability = f64;

// evaluation budget guard
const MIN_BUDGET: usize = 100;

// particle swarm defaults
const PSO_SWARM_SIZE: usize = 20;
const PSO_GENERATIONS: usize = 50;
const PSO_INERTIA: f64 = 1.2;
const PSO_CONSTRICTION: f64 = 1.0;
const PSO_COGNITIVE: f64 = 2.0;
const PSO_SOCIAL: f64 = 2.0;

// dimensioned search defaults
const DDS_PERTURBATION: f64 = 0.2;
const DDS_INIT_FRACTION: f64 = 0.005;
const DDS_MIN_INIT: usize = 5;

// archive selection parameters
const HV_SAMPLES: usize = 100;
const HV_REF_MARGIN: f64 = 1.00001;

// annealing defaults
const SA_MELTS: usize = 100;
const SA_TEMP_FACTOR: f64 = 0.9;
const SA_MELT_FLOOR: f64 = 1e-12;
const SA_ACCEPT_INIT: f64 = 0.99;
const SA_ACCEPT_FINAL: f64 = 0.01;
const SA_SIGMA_CAP: f64 = 0.68;
const VSA_STEP_GROWTH: f64 = 3.0;
const VSA_STEP_CHI: f64 = 0.11;
const VSA_STEP_SPAN: f64 = 1.732_050_807_568_877_2; // sqrt(3)

// levenberg multi-start defaults
const LM_LAMBDA0: f64 = 10.0;
const LM_LAMBDA_SCALE: f64 = 1.1;
const LM_STEP_REL: f64 = 0.01;
const MS_CANDIDATE_DRAWS: usize = 1000;

// run record files
const QUIT_FILE: &str = "quit.signal";
const RECORD_PREFIX: &str = "run";
const PN_TRACE_FILE: &str = "dds_pn.txt";

/// progress bar
pub fn progress(n: usize) -> indicatif::ProgressBar {
    let tick = std::time::Duration::from_secs(60);
    let style = "{spinner:.cyan} {elapsed} ~ {percent:>3}% {wide_bar:.cyan}";
    let style = indicatif::ProgressStyle::with_template(style).unwrap();
    let progress = indicatif::ProgressBar::new(n as u64);
    progress.set_style(style);
    progress.enable_steady_tick(tick);
    progress
}

/// initialize logging
pub fn init() {
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
}
