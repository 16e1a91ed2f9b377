pub mod alarm;
pub mod engine;
pub mod plan;
pub mod types;

pub use engine::{Broker, RoundConfig};
pub use plan::RoundPolicy;
pub use types::{Bid, BidStatus, RoundOutcome, RoundReply, RoundStats};
