mod clock;
mod sequence;
mod transport;

pub use clock::{Clock, LogicalClock, ManualClock, SystemClock};
pub use sequence::EventSequence;
pub use transport::{PauseReason, Transport, TransportOptions, TransportState, TransportStatus};
