/// error taxonomy for a calibration run.
///
/// configuration and scheduler errors abort the run before or during
/// dispatch; numeric errors are recovered locally by the strategies and
/// should never cross the public api; io errors abort only when the run
/// record itself cannot be written.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(String),
    #[error("scheduler: {0}")]
    Scheduler(String),
    #[error("numeric: {0}")]
    Numeric(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// true for the error kinds that must abort the whole run
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Config(_) | Error::Scheduler(_) | Error::Io(_) => true,
            Error::Numeric(_) => false,
        }
    }
}
