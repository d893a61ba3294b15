// Tracking ingestion
//
// Converts the server's tracking updates into poses and queues them
// until the compositor asks for one.
use bitflags::bitflags;
use cgmath::{InnerSpace, Quaternion, Vector3};
use utils::CorrelationQueue;

/// Row major 3x4 device to tracking space transform
pub type Matrix34 = [[f32; 4]; 3];

/// One tracking update for the headset, as delivered by the server
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TrackingState {
    pub device_to_absolute_tracking: Matrix34,
    /// Tracking frame this sample belongs to
    pub pose_id: u32,
}

/// A rigid transform
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Pose {
    pub orientation: Quaternion<f32>,
    pub position: Vector3<f32>,
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            orientation: Quaternion::new(1.0, 0.0, 0.0, 0.0),
            position: Vector3::new(0.0, 0.0, 0.0),
        }
    }

    pub fn new(orientation: Quaternion<f32>, position: Vector3<f32>) -> Self {
        Self {
            orientation: orientation,
            position: position,
        }
    }

    /// Apply this transform on top of `other`
    ///
    /// `other` is expressed in the space of `self`, the result is in
    /// the space `self` is expressed in.
    pub fn transform(&self, other: &Pose) -> Pose {
        Pose {
            orientation: normalize(self.orientation * other.orientation),
            position: self.orientation * other.position + self.position,
        }
    }
}

/// Normalize `q`, falling back to identity for a zero quaternion
pub fn normalize(q: Quaternion<f32>) -> Quaternion<f32> {
    if q.magnitude2() <= std::f32::EPSILON {
        return Pose::identity().orientation;
    }
    q.normalize()
}

fn sign(x: f32) -> f32 {
    if x >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Extract the rotation of a 3x4 transform as a unit quaternion
///
/// The component with the largest magnitude is taken as positive and
/// the signs of the other three are recovered from the off diagonal
/// terms, which keeps this stable for every rotation.
pub fn mat_to_quat(m: &Matrix34) -> Quaternion<f32> {
    let (r11, r12, r13) = (m[0][0], m[0][1], m[0][2]);
    let (r21, r22, r23) = (m[1][0], m[1][1], m[1][2]);
    let (r31, r32, r33) = (m[2][0], m[2][1], m[2][2]);

    let mut q0 = ((r11 + r22 + r33 + 1.0) / 4.0).max(0.0).sqrt();
    let mut q1 = ((r11 - r22 - r33 + 1.0) / 4.0).max(0.0).sqrt();
    let mut q2 = ((-r11 + r22 - r33 + 1.0) / 4.0).max(0.0).sqrt();
    let mut q3 = ((-r11 - r22 + r33 + 1.0) / 4.0).max(0.0).sqrt();

    if q0 >= q1 && q0 >= q2 && q0 >= q3 {
        q1 *= sign(r32 - r23);
        q2 *= sign(r13 - r31);
        q3 *= sign(r21 - r12);
    } else if q1 >= q0 && q1 >= q2 && q1 >= q3 {
        q0 *= sign(r32 - r23);
        q2 *= sign(r21 + r12);
        q3 *= sign(r13 + r31);
    } else if q2 >= q0 && q2 >= q1 && q2 >= q3 {
        q0 *= sign(r13 - r31);
        q1 *= sign(r21 + r12);
        q3 *= sign(r32 + r23);
    } else {
        q0 *= sign(r21 - r12);
        q1 *= sign(r31 + r13);
        q2 *= sign(r32 + r23);
    }

    normalize(Quaternion::new(q0, q1, q2, q3))
}

/// A pose waiting to be rendered from
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PoseSample {
    pub pose: Pose,
    pub frame_id: u32,
}

impl PoseSample {
    pub fn from_tracking(state: &TrackingState) -> Self {
        let m = &state.device_to_absolute_tracking;
        Self {
            pose: Pose::new(mat_to_quat(m), Vector3::new(m[0][3], m[1][3], m[2][3])),
            frame_id: state.pose_id,
        }
    }
}

/// Poses delivered by the tracking thread, oldest first
pub type PoseQueue = CorrelationQueue<PoseSample>;

bitflags! {
    /// Which parts of a `SpaceRelation` can be trusted
    pub struct SpaceRelationFlags: u32 {
        const ORIENTATION_VALID = 1 << 0;
        const POSITION_VALID = 1 << 1;
        const LINEAR_VELOCITY_VALID = 1 << 2;
        const ANGULAR_VELOCITY_VALID = 1 << 3;
        const ORIENTATION_TRACKED = 1 << 4;
        const POSITION_TRACKED = 1 << 5;
    }
}

/// Where the headset is, as reported to the compositor
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SpaceRelation {
    pub pose: Pose,
    pub flags: SpaceRelationFlags,
}
