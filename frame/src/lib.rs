//! # RedLilium Frame
//!
//! Frame execution core for RedLilium: device negotiation, GPU resources,
//! pipeline state objects, command encoding, streaming uploads and frame
//! pacing, executed by a deterministic software backend.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsInstance`] / [`Adapter`] - Device Resolver, gated once per
//!   process by the [`SupportGate`]
//! - [`GraphicsDevice`] - Factory for buffers, textures, samplers, bind groups,
//!   shader modules and [`RenderPipeline`]s
//! - [`CommandEncoder`] / [`RenderPassEncoder`] - Typestate command recording
//! - [`Queue`] - Ordered submission with [`Fence`]-based completion
//! - [`update_buffer_data`] - Streaming uploads through staging buffers
//! - [`FrameScheduler`] - Acquire, record, submit and present in strict order
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_frame::{FrameScheduler, GraphicsInstance, OffscreenSurface, SurfaceConfiguration, SwapChain};
//!
//! let instance = GraphicsInstance::new()?;
//! let device = pollster::block_on(instance.request_default_device())?;
//! let surface = Arc::new(OffscreenSurface::new("main"));
//! let swapchain = SwapChain::configure(&device, surface, &SurfaceConfiguration::new(800, 600))?;
//! let mut scheduler = FrameScheduler::new(device, swapchain, Default::default())?;
//!
//! let mut frame = scheduler.begin_frame()?;
//! // Upload, record passes...
//! frame.submit()?;
//! ```

pub(crate) mod backend;
pub mod command;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod queue;
pub mod resources;
pub mod scheduler;
pub mod shader;
pub mod swapchain;
pub mod types;
pub mod upload;

// Re-export main types for convenience
pub use command::{
    ColorAttachment, CommandBuffer, CommandEncoder, DepthStencilAttachment, ImageCopyBuffer, ImageCopyTexture,
    ImageDataLayout, LoadOp, Operations, RenderPassDescriptor, RenderPassEncoder, StoreOp,
};
pub use device::GraphicsDevice;
pub use error::{CompileError, GraphicsError};
pub use instance::{
    resolve_device, Adapter, AdapterInfo, AdapterOptions, AdapterType, BackendType, DefaultHost, DeviceConstraints,
    Features, GraphicsInstance, HostEnvironment, InstanceParameters, Limits, PowerPreference, QueueMode, SupportGate,
    QUEUE_MODE_ENV, UNSUPPORTED_NOTICE,
};
pub use pipeline::{
    BindGroupLayout, BindGroupLayoutDescriptor, BindingLayoutEntry, BindingType, BlendComponent, BlendFactor,
    BlendOperation, BlendState, ColorTargetState, ColorWrites, CullMode, DepthStencilState, FragmentState, FrontFace,
    MultisampleState, PipelineLayout, PipelineLayoutDescriptor, PrimitiveState, PrimitiveTopology, RenderPipeline,
    RenderPipelineDescriptor, ShaderStageFlags, StencilFaceState, StencilOperation, StencilState, VertexAttribute,
    VertexBufferLayout, VertexFormat, VertexState, VertexStepMode, SUPPORTED_SAMPLE_COUNTS,
};
pub use queue::{Queue, SubmissionIndex};
pub use resources::{
    AllocatedBuffer, BindGroup, BindGroupDescriptor, BindGroupEntry, BindingResource, Buffer, MappedBuffer, Sampler,
    TexelStorage, Texture, TextureView,
};
pub use scheduler::{Fence, FenceStatus, Frame, FramePhase, FrameScheduler, FrameSchedulerConfig};
#[cfg(feature = "glsl")]
pub use shader::GlslCompiler;
pub use shader::{
    fragment_fn, vertex_fn, CompiledShader, FragmentInput, FragmentKernel, FragmentOutput, InvocationContext,
    ShaderCompiler, ShaderInterface, ShaderModule, ShaderModuleDescriptor, ShaderProgram, ShaderResources,
    ShaderStage, VertexInput, VertexKernel, VertexOutput,
};
pub use swapchain::{
    OffscreenSurface, PresentMode, PresentationSurface, PresentedFrame, SurfaceConfiguration, SurfaceTexture,
    SwapChain,
};
pub use types::{
    padded_bytes_per_row, AddressMode, BufferDescriptor, BufferUsage, Color, CompareFunction, Extent3d, FilterMode,
    IndexFormat, Origin3d, SamplerDescriptor, ScissorRect, TextureDescriptor, TextureFormat, TextureUsage,
    TextureViewDescriptor, Viewport, COPY_BUFFER_ALIGNMENT, COPY_BYTES_PER_ROW_ALIGNMENT,
};
pub use upload::{create_texture_from_pixels, read_texture, update_buffer_data, PixelData, StagingBuffer};

/// Frame library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the frame subsystem.
///
/// This should be called before using any graphics functionality.
pub fn init() {
    log::info!("RedLilium Frame v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_software_instance() {
        let instance =
            GraphicsInstance::with_parameters(InstanceParameters::new().with_backend(BackendType::Software)).unwrap();
        let adapters = instance.enumerate_adapters();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].device_type, AdapterType::Software);
    }
}
