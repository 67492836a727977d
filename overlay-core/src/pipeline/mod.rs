//! The two symmetric worker loops: device-to-socket and socket-to-device.

mod incoming;
mod outgoing;

pub use incoming::run_incoming_worker;
pub use outgoing::run_outgoing_worker;
