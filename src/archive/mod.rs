pub mod entry;
pub mod hypervolume;
pub mod metric;
pub mod pareto;

pub use entry::Entry;
pub use entry::dominates;
pub use hypervolume::hypervolume;
pub use metric::Metric;
pub use pareto::Archive;
pub use pareto::Dedup;
pub use pareto::Fate;
