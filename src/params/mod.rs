pub mod bounds;
pub mod descriptor;
pub mod group;
pub mod sampling;

pub use bounds::Telescope;
pub use bounds::Violations;
pub use descriptor::Convert;
pub use descriptor::Descriptor;
pub use descriptor::Kind;
pub use group::Group;
pub use group::Special;
