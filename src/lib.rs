//! # Stratus
//!
//! Stratus is a head mounted device that lives on the other end of a
//! network connection. Tracking updates arrive from a streaming server
//! on its own thread, the compositor renders from them, and finished
//! frames are handed back to the server for encoding.
//!
//! The interesting part is keeping those two sides in step. Every pose
//! the compositor consumes records which tracking frame it came from
//! and when it is expected on screen. When a rendered frame comes back
//! for delivery that record is looked up again, so the client is only
//! ever sent a frame tagged with the tracking id it was rendered from.
//!
//! ## Layout
//!
//! * `config` - the session document and its validation
//! * `tracking` - poses, the pose queue and matrix conversion
//! * `correlation` - frame id bookkeeping and the delivery decision
//! * `hmd` - the device context, the server seam and its callbacks
//!
//! `StreamingHmd` implements `squall::StreamSink`, so it can be handed
//! straight to `squall::create_target`.
#![allow(non_camel_case_types)]

pub mod config;
pub mod correlation;
pub mod hmd;
pub mod tracking;

#[cfg(test)]
mod tests;

pub use config::SessionConfig;
pub use correlation::{
    match_frame, DeliveryDecision, DeliveryPolicy, FrameCorrelation, FrameIdQueue, HoldReason,
};
pub use hmd::{
    ConnectionState, DisplayInfo, InputEvent, ServerDesc, StreamCallbacks, StreamServer,
    StreamingHmd, SyncEvent,
};
pub use tracking::{Pose, PoseQueue, PoseSample, SpaceRelation, SpaceRelationFlags, TrackingState};

extern crate squall;
extern crate utils;

use squall::SquallError;
use thiserror::Error;

/// Errors reported by the streaming device
#[derive(Error, Debug)]
pub enum StratusError {
    #[error("Could not read the session config: {0}")]
    CONFIG_UNREADABLE(#[from] std::io::Error),
    #[error("Session config is malformed: {0}")]
    CONFIG_MALFORMED(#[from] serde_json::Error),
    #[error("Session config is invalid: {0}")]
    CONFIG_INVALID(String),
    #[error("Streaming server failed: {0}")]
    SERVER(String),
    #[error("Presentation target failed: {0}")]
    TARGET(#[from] SquallError),
}

pub type Result<T> = std::result::Result<T, StratusError>;
