pub mod hand;
pub mod hold;
pub mod smooth;

pub use hand::{HandScores, HandSelection, HandTracker, HandTrackerConfig};
pub use hold::{Hold, HoldRule};
pub use smooth::Ema;
