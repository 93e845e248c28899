//! Amptek DPP binary protocol stack.
//!
//! Packet framing and checksum, ASCII configuration command handling,
//! status and diagnostic decoding, NetFinder discovery, and the
//! blocking request/response session over UDP or USB.

pub mod commands;
pub mod diagnostics;
pub mod netfinder;
pub mod protocol;
pub mod session;
pub mod status;
pub mod transport;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export the surface most callers need
pub use diagnostics::DiagnosticSnapshot;
pub use session::{DppSession, ReadbackFormat};
pub use status::StatusSnapshot;
pub use transport::Transport;
pub use types::{AckCode, DeviceVariant, PacketKind, RequestKind};
