//!# Squall Render Pipelines
//!
//!Squall does not composite anything itself, the host renders into the
//!target's images. The only drawing we do is post processing of the
//!finished frame before it is handed to the streaming sink.
//!
//!* `FoveatedResamplePass` - packs a full resolution stereo image into
//!  the smaller foveated layout with a single textured quad.
//!
//!Pipelines own every Vulkan object they create and destroy them
//!through the same `GpuDevice` they were created from.
pub mod resample;

pub use resample::FoveatedResamplePass;
