//! The conversation driver.
//!
//! One driver run handles one inbound message: it loops the model, executes
//! requested tool calls through the tool session, and narrates progress to
//! the reply surface. The loop is bounded by a round budget; the history is
//! the sole state carried across rounds.

pub mod driver;

pub use driver::{Driver, DriverOutcome, DriverState};
