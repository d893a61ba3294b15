// Frame pacing
//
// The target asks a pacer when to wake up and when the frame it is about
// to render should be presented. A streaming target has no display to
// take timings from, so the only pacer here is the fake one, which
// ticks at a fixed period.
use utils::log;
use utils::timing::NS_PER_MS;

/// Points in a frame's life that are reported back to the pacer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimingPoint {
    /// The render thread woke up to start the frame
    WakeUp,
    /// Rendering began
    Begin,
    /// Work for the frame was submitted
    Submit,
}

/// When the pacer wants the next frame
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FramePrediction {
    pub frame_id: i64,
    pub wake_up_time_ns: u64,
    pub desired_present_time_ns: u64,
    pub present_slop_ns: u64,
    pub predicted_display_time_ns: u64,
    pub predicted_display_period_ns: u64,
    pub min_display_period_ns: u64,
}

/// A frame timing predictor
pub trait FramePacer: Send {
    /// Predict the timings of the next frame
    ///
    /// Every call starts a new frame with a new id.
    fn predict(&mut self, now_ns: u64) -> FramePrediction;

    /// Record that `frame_id` reached `point` at `when_ns`
    fn mark_point(&mut self, point: TimingPoint, frame_id: i64, when_ns: u64);

    /// Record how long the GPU spent on `frame_id`
    fn info_gpu(&mut self, frame_id: i64, gpu_start_ns: u64, gpu_end_ns: u64, when_ns: u64);
}

/// Time between the desired present and the display time
const PRESENT_OFFSET_NS: u64 = 4 * NS_PER_MS;
/// Present slop reported with every prediction
const PRESENT_SLOP_NS: u64 = NS_PER_MS / 2;
/// The first display is predicted this far after creation
const FIRST_DISPLAY_DELAY_NS: u64 = 50 * NS_PER_MS;

/// A pacer that assumes a display refreshing at a fixed period
///
/// Used whenever there is no real display timing information.
pub struct FakePacer {
    fp_frame_period_ns: u64,
    fp_present_offset_ns: u64,
    /// Time the app is assumed to spend on a frame
    fp_app_time_ns: u64,
    fp_last_display_time_ns: u64,
    fp_next_frame_id: i64,
    /// Last reported point, mostly for debugging
    fp_last_point: Option<(TimingPoint, i64)>,
}

impl FakePacer {
    pub fn new(frame_period_ns: u64, now_ns: u64) -> Self {
        let period = frame_period_ns.max(1);
        log::info!("Creating fake frame pacer with a period of {}ns", period);

        Self {
            fp_frame_period_ns: period,
            fp_present_offset_ns: PRESENT_OFFSET_NS,
            fp_app_time_ns: period / 10,
            fp_last_display_time_ns: now_ns + FIRST_DISPLAY_DELAY_NS,
            fp_next_frame_id: 0,
            fp_last_point: None,
        }
    }

    pub fn frame_period_ns(&self) -> u64 {
        self.fp_frame_period_ns
    }

    pub fn present_offset_ns(&self) -> u64 {
        self.fp_present_offset_ns
    }

    pub fn last_point(&self) -> Option<(TimingPoint, i64)> {
        self.fp_last_point
    }
}

impl FramePacer for FakePacer {
    fn predict(&mut self, now_ns: u64) -> FramePrediction {
        let earliest = now_ns + self.fp_present_offset_ns + self.fp_app_time_ns;

        // skip whole periods until the display can still be made
        let period = self.fp_frame_period_ns;
        let mut display = self.fp_last_display_time_ns + period;
        if display < earliest {
            let behind = earliest - display;
            display += (behind + period - 1) / period * period;
        }
        self.fp_last_display_time_ns = display;

        let frame_id = self.fp_next_frame_id;
        self.fp_next_frame_id += 1;

        let desired_present = display - self.fp_present_offset_ns;
        let prediction = FramePrediction {
            frame_id: frame_id,
            wake_up_time_ns: desired_present.saturating_sub(self.fp_app_time_ns),
            desired_present_time_ns: desired_present,
            present_slop_ns: PRESENT_SLOP_NS,
            predicted_display_time_ns: display,
            predicted_display_period_ns: self.fp_frame_period_ns,
            min_display_period_ns: self.fp_frame_period_ns,
        };

        log::profiling!("Predicted frame {:?}", prediction);
        prediction
    }

    fn mark_point(&mut self, point: TimingPoint, frame_id: i64, when_ns: u64) {
        log::profiling!("Frame {} reached {:?} at {}", frame_id, point, when_ns);
        self.fp_last_point = Some((point, frame_id));
    }

    fn info_gpu(&mut self, frame_id: i64, gpu_start_ns: u64, gpu_end_ns: u64, _when_ns: u64) {
        log::profiling!(
            "Frame {} spent {}ns on the GPU",
            frame_id,
            gpu_end_ns.saturating_sub(gpu_start_ns)
        );
    }
}
