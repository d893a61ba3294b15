//! Frame correlation
//!
//! Every pose the compositor consumes leaves a `FrameCorrelation`
//! behind: the tracking frame it came from and the time the frame
//! rendered from it is expected on screen. When a rendered frame is
//! ready to go out, `match_frame` walks those records oldest first to
//! find the one that belongs to it.
//!
//! Records older than the frame being delivered belong to frames that
//! were dropped and are thrown away. Records for later frames are left
//! alone for their own delivery.
use utils::log;
use utils::timing::NS_PER_MS;
use utils::CorrelationQueue;

/// Which tracking frame a render used, and when it should be shown
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameCorrelation {
    /// None if no new tracking data was available for the render
    pub frame_id: Option<u32>,
    pub desired_timestamp_ns: u64,
}

/// Correlation records, oldest first
pub type FrameIdQueue = CorrelationQueue<FrameCorrelation>;

/// Tuning for `match_frame`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Subtracted from a record's timestamp before comparing it with
    /// the delivery time. Covers the gap between the display time a
    /// pose is requested for and the present time of its frame.
    pub latency_compensation_ns: u64,
    /// Most records inspected for one delivery
    pub max_skip: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            latency_compensation_ns: 4 * NS_PER_MS,
            max_skip: 100,
        }
    }
}

/// Why a frame was not sent
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HoldReason {
    /// No records left to check
    Exhausted,
    /// The oldest record is for a later frame
    Pending,
    /// `max_skip` records were discarded without a match
    RetryLimit,
    /// The matching render had no tracking frame to tag it with
    NoTrackingFrame,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeliveryDecision {
    /// Send the frame tagged with this tracking frame id
    Deliver { frame_id: u32 },
    /// Don't send, let the encoder know a new frame is ready instead
    Hold(HoldReason),
}

/// Find the record for the frame to be shown at `at_timestamp_ns`
///
/// Stale records are consumed on the way. This inspects at most
/// `policy.max_skip` records and never waits for new ones.
pub fn match_frame(
    queue: &FrameIdQueue,
    at_timestamp_ns: u64,
    policy: &DeliveryPolicy,
) -> DeliveryDecision {
    let adjust = |entry: &FrameCorrelation| {
        entry
            .desired_timestamp_ns
            .saturating_sub(policy.latency_compensation_ns)
    };

    for _ in 0..policy.max_skip {
        let entry = match queue.pop_if(|e| adjust(e) <= at_timestamp_ns) {
            Some(entry) => entry,
            None if queue.is_empty() => {
                log::profiling!("No correlation left for {}ns", at_timestamp_ns);
                return DeliveryDecision::Hold(HoldReason::Exhausted);
            }
            None => {
                log::profiling!("Oldest correlation is after {}ns", at_timestamp_ns);
                return DeliveryDecision::Hold(HoldReason::Pending);
            }
        };

        if adjust(&entry) < at_timestamp_ns {
            log::profiling!(
                "Discarding stale correlation {:?} while delivering {}ns",
                entry,
                at_timestamp_ns
            );
            continue;
        }

        return match entry.frame_id {
            Some(id) => DeliveryDecision::Deliver { frame_id: id },
            None => {
                log::debug!("Frame for {}ns has no tracking frame id", at_timestamp_ns);
                DeliveryDecision::Hold(HoldReason::NoTrackingFrame)
            }
        };
    }

    log::error!(
        "Gave up matching a frame for {}ns after {} stale correlations",
        at_timestamp_ns,
        policy.max_skip
    );
    DeliveryDecision::Hold(HoldReason::RetryLimit)
}
