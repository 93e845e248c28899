//! DPP MCA console library: Amptek digital pulse processor protocol
//! stack and device session management.

pub mod config;
pub mod dpp;
pub mod error;

pub use dpp::{DppSession, ReadbackFormat};
pub use error::{DppError, Result};
