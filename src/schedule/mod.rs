pub mod fleet;
pub mod message;
pub mod worker;

pub use fleet::Fleet;
pub use message::Outcome;
pub use message::Packet;
pub use message::Request;
