// Fixed foveation planning
//
// The resample pass keeps the center of each eye at full resolution and
// squeezes the edges by `edge_ratio`. Everything here is plain numeric
// work, the GPU side lives in pipelines::resample.
use ash::vk;
use serde::{Deserialize, Serialize};

use crate::{Result, SquallError};
use utils::log;

use std::path::PathBuf;

/// Optimized dimensions are padded to this many pixels
const GPU_BLOCK_ALIGNMENT: f64 = 32.0;

/// Float noise below this does not count as a partial edge block
const BLOCK_EPSILON: f64 = 1e-4;

/// Foveation tuning ratios
///
/// `center_size` is the fraction of each eye kept at full resolution,
/// `center_shift` offsets that region, and `edge_ratio` is how many
/// source pixels are packed into one output pixel at the edges.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoveationParams {
    pub center_size_x: f32,
    pub center_size_y: f32,
    pub center_shift_x: f32,
    pub center_shift_y: f32,
    pub edge_ratio_x: f32,
    pub edge_ratio_y: f32,
}

impl FoveationParams {
    /// Reject tuning that the planner can't divide by
    pub fn validate(&self) -> Result<()> {
        let all = [
            self.center_size_x,
            self.center_size_y,
            self.center_shift_x,
            self.center_shift_y,
            self.edge_ratio_x,
            self.edge_ratio_y,
        ];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(SquallError::INVALID_FOVEATION("parameters must be finite"));
        }
        if self.edge_ratio_x <= 0.0 || self.edge_ratio_y <= 0.0 {
            return Err(SquallError::INVALID_FOVEATION("edge ratio must be positive"));
        }
        if !(0.0..=1.0).contains(&self.center_size_x) || !(0.0..=1.0).contains(&self.center_size_y)
        {
            return Err(SquallError::INVALID_FOVEATION(
                "center size must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.center_shift_x)
            || !(0.0..=1.0).contains(&self.center_shift_y)
        {
            return Err(SquallError::INVALID_FOVEATION(
                "center shift must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Foveation settings handed to the target by its streaming sink
#[derive(Debug, Clone, PartialEq)]
pub struct FoveationConfig {
    pub params: FoveationParams,
    /// SPIR-V for the resample vertex stage
    pub vert_shader_path: PathBuf,
    /// SPIR-V for the resample fragment stage
    pub frag_shader_path: PathBuf,
}

/// The parameter block read by the resample shader
///
/// The field order and types are the std140 layout of the shader's
/// uniform block, so this is serialized as is into the uniform buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct FoveationPlan {
    pub target_eye_width: u32,
    pub target_eye_height: u32,
    /// Always a multiple of 32
    pub optimized_eye_width: u32,
    /// Always a multiple of 32
    pub optimized_eye_height: u32,
    /// Unpadded optimized size over padded optimized size
    pub eye_width_ratio: f32,
    pub eye_height_ratio: f32,
    pub center_size_x: f32,
    pub center_size_y: f32,
    pub center_shift_x: f32,
    pub center_shift_y: f32,
    pub edge_ratio_x: f32,
    pub edge_ratio_y: f32,
}

impl FoveationPlan {
    /// Size of the resampled stereo image, both eyes side by side
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.optimized_eye_width * 2,
            height: self.optimized_eye_height,
        }
    }

    /// The uniform buffer contents for this plan
    pub fn to_ubo_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| {
            log::error!("Could not encode foveation block: {}", e);
            SquallError::INVALID_FOVEATION("parameter block could not be encoded")
        })
    }
}

/// Per axis results of the alignment math
struct AxisPlan {
    center_size: f64,
    center_shift: f64,
    optimized: u32,
    ratio: f64,
}

/// Derives foveated resolutions from a stereo target size
pub struct FoveationPlanner {
    fp_params: FoveationParams,
}

impl FoveationPlanner {
    /// Fails with INVALID_FOVEATION if `params` are degenerate
    pub fn new(params: FoveationParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { fp_params: params })
    }

    pub fn params(&self) -> &FoveationParams {
        &self.fp_params
    }

    /// Align one axis
    ///
    /// The edge is carved into blocks of `2 * edge_ratio` source pixels,
    /// and the center grows or shrinks so the edge is a whole number of
    /// blocks. The shift is snapped to the same block grid.
    fn plan_axis(target: f64, center_size: f64, center_shift: f64, edge_ratio: f64) -> AxisPlan {
        let block = edge_ratio * 2.0;

        let edge_size = target - center_size * target;
        // the edge can never hold more blocks than fit in the eye
        let edge_blocks = (edge_size / block - BLOCK_EPSILON)
            .ceil()
            .min((target / block).floor())
            .max(0.0);
        let center_size_aligned = 1.0 - edge_blocks * block / target;

        let edge_size_aligned = target - center_size_aligned * target;
        let center_shift_aligned = match edge_size_aligned > 0.0 {
            true => {
                let shift_blocks =
                    (center_shift * edge_size_aligned / block - BLOCK_EPSILON).ceil();
                shift_blocks * block / edge_size_aligned
            }
            // The whole eye is center, there is no edge to shift into
            false => 0.0,
        };

        let scale = center_size_aligned + (1.0 - center_size_aligned) / edge_ratio;
        let optimized = scale * target;
        let optimized_aligned = (optimized / GPU_BLOCK_ALIGNMENT).ceil() * GPU_BLOCK_ALIGNMENT;

        AxisPlan {
            center_size: center_size_aligned,
            center_shift: center_shift_aligned,
            optimized: optimized_aligned as u32,
            ratio: optimized / optimized_aligned,
        }
    }

    /// Plan the resample for a `width` x `height` stereo image
    ///
    /// Each eye is `width / 2` pixels wide. The same inputs always
    /// give the same plan.
    pub fn plan(&self, width: u32, height: u32) -> Result<FoveationPlan> {
        let eye_width = width / 2;
        let eye_height = height;
        if eye_width == 0 || eye_height == 0 {
            return Err(SquallError::INVALID_FOVEATION("target resolution is empty"));
        }

        let p = &self.fp_params;
        let x = Self::plan_axis(
            eye_width as f64,
            p.center_size_x as f64,
            p.center_shift_x as f64,
            p.edge_ratio_x as f64,
        );
        let y = Self::plan_axis(
            eye_height as f64,
            p.center_size_y as f64,
            p.center_shift_y as f64,
            p.edge_ratio_y as f64,
        );

        let plan = FoveationPlan {
            target_eye_width: eye_width,
            target_eye_height: eye_height,
            optimized_eye_width: x.optimized,
            optimized_eye_height: y.optimized,
            eye_width_ratio: x.ratio as f32,
            eye_height_ratio: y.ratio as f32,
            center_size_x: x.center_size as f32,
            center_size_y: y.center_size as f32,
            center_shift_x: x.center_shift as f32,
            center_shift_y: y.center_shift as f32,
            edge_ratio_x: p.edge_ratio_x,
            edge_ratio_y: p.edge_ratio_y,
        };

        log::info!("original width = {}, height = {}", width, height);
        log::info!(
            "foveated width = {}, height = {}",
            plan.extent().width,
            plan.extent().height
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(center: f32, shift: f32, edge: f32) -> FoveationParams {
        FoveationParams {
            center_size_x: center,
            center_size_y: center,
            center_shift_x: shift,
            center_shift_y: shift,
            edge_ratio_x: edge,
            edge_ratio_y: edge,
        }
    }

    #[test]
    fn aligned_center_is_a_fixed_point() {
        let planner = FoveationPlanner::new(params(0.6, 0.0, 2.0)).unwrap();
        let plan = planner.plan(1920, 1080).unwrap();

        assert_eq!(plan.target_eye_width, 960);
        assert!((plan.center_size_x - 0.6).abs() < 1e-5);
        // 960 * (0.6 + 0.4 / 2) = 768, already a multiple of 32
        assert_eq!(plan.optimized_eye_width, 768);
        assert!((plan.eye_width_ratio - 1.0).abs() < 1e-6);
    }

    #[test]
    fn optimized_sizes_are_block_aligned() {
        for &(w, h) in [(1920u32, 1080u32), (2880, 1600), (1000, 777), (64, 2)].iter() {
            for &center in [0.0f32, 0.3, 0.55, 0.8, 1.0].iter() {
                for &edge in [1.0f32, 1.5, 2.0, 3.0, 4.0].iter() {
                    let planner = FoveationPlanner::new(params(center, 0.1, edge)).unwrap();
                    let plan = planner.plan(w, h).unwrap();
                    assert_eq!(plan.optimized_eye_width % 32, 0);
                    assert_eq!(plan.optimized_eye_height % 32, 0);
                    assert!(plan.eye_width_ratio > 0.0 && plan.eye_width_ratio <= 1.0);
                    assert!(plan.eye_height_ratio > 0.0 && plan.eye_height_ratio <= 1.0);
                    assert_eq!(plan.extent().width, plan.optimized_eye_width * 2);
                }
            }
        }
    }

    #[test]
    fn planning_is_idempotent() {
        let planner = FoveationPlanner::new(FoveationParams {
            center_size_x: 0.4,
            center_size_y: 0.45,
            center_shift_x: 0.4,
            center_shift_y: 0.1,
            edge_ratio_x: 4.0,
            edge_ratio_y: 5.0,
        })
        .unwrap();

        let a = planner.plan(2880, 1600).unwrap();
        let b = planner.plan(2880, 1600).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_ubo_bytes().unwrap(), b.to_ubo_bytes().unwrap());
    }

    #[test]
    fn center_is_grown_to_whole_edge_blocks() {
        // edge = 100 * 0.5 = 50 pixels, blocks of 4 -> 13 blocks = 52 pixels
        let planner = FoveationPlanner::new(params(0.5, 0.0, 2.0)).unwrap();
        let plan = planner.plan(200, 100).unwrap();
        assert!((plan.center_size_x - 0.48).abs() < 1e-5);
        assert!((plan.center_size_y - 0.48).abs() < 1e-5);
    }

    #[test]
    fn full_center_has_no_shift() {
        let planner = FoveationPlanner::new(params(1.0, 0.5, 2.0)).unwrap();
        let plan = planner.plan(1920, 1080).unwrap();
        assert_eq!(plan.center_shift_x, 0.0);
        assert_eq!(plan.optimized_eye_width, 960);
    }

    #[test]
    fn degenerate_tuning_is_rejected() {
        assert_eq!(
            FoveationPlanner::new(params(0.5, 0.0, 0.0)).err(),
            Some(SquallError::INVALID_FOVEATION("edge ratio must be positive"))
        );
        assert!(FoveationPlanner::new(params(0.5, 0.0, -1.0)).is_err());
        assert!(FoveationPlanner::new(params(1.5, 0.0, 2.0)).is_err());
        assert!(FoveationPlanner::new(params(f32::NAN, 0.0, 2.0)).is_err());
        assert!(FoveationPlanner::new(params(0.5, f32::INFINITY, 2.0)).is_err());

        let planner = FoveationPlanner::new(params(0.5, 0.0, 2.0)).unwrap();
        assert!(planner.plan(1, 1080).is_err());
        assert!(planner.plan(1920, 0).is_err());
    }

    #[test]
    fn center_shift_outside_unit_range_is_rejected() {
        let mut p = params(0.5, 0.0, 2.0);
        p.center_shift_x = 5.0;
        assert_eq!(
            FoveationPlanner::new(p).err(),
            Some(SquallError::INVALID_FOVEATION(
                "center shift must be within [0, 1]"
            ))
        );

        let mut p = params(0.5, 0.0, 2.0);
        p.center_shift_y = -3.0;
        assert!(p.validate().is_err());

        // both ends of the range are usable
        assert!(FoveationPlanner::new(params(0.5, 1.0, 2.0)).is_ok());
        assert!(FoveationPlanner::new(params(0.5, 0.0, 2.0)).is_ok());
    }

    #[test]
    fn ubo_block_layout() {
        let planner = FoveationPlanner::new(params(0.6, 0.0, 2.0)).unwrap();
        let plan = planner.plan(1920, 1080).unwrap();
        let bytes = plan.to_ubo_bytes().unwrap();

        assert_eq!(bytes.len(), std::mem::size_of::<FoveationPlan>());
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[0..4], &960u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &768u32.to_le_bytes());
        assert_eq!(&bytes[40..44], &2.0f32.to_le_bytes());
    }
}
