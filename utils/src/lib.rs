// A set of helper structs for common operations
//
// These are shared by the presentation target and the streaming
// device.
pub mod timing;
#[macro_use]
pub mod logging;
pub mod log;
pub mod ring;

extern crate anyhow;
pub use anyhow::{anyhow, Context, Error, Result};

pub use ring::CorrelationQueue;
