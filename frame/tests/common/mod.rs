//! Common utilities for frame integration tests.
//!
//! This module provides the shared device setup, solid-color pipelines and
//! readback helpers used by the integration tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use redlilium_frame::{
    fragment_fn, read_texture, vertex_fn, BackendType, Buffer, BufferDescriptor, BufferUsage, DepthStencilState,
    FragmentOutput, FragmentState, GraphicsDevice, GraphicsInstance, InstanceParameters, MultisampleState,
    PipelineLayoutDescriptor, PrimitiveState, QueueMode, RenderPipeline, RenderPipelineDescriptor, ShaderInterface,
    ShaderModuleDescriptor, ShaderProgram, Texture, TextureDescriptor, TextureFormat, TextureUsage,
    VertexBufferLayout, VertexFormat, VertexOutput, VertexState,
};

/// Compute the aligned bytes per row for a texture (256-byte alignment).
pub fn aligned_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let unpadded = width * bytes_per_pixel;
    (unpadded + 255) & !255
}

/// The triangle `(0, 0.5), (-0.5, -0.5), (0.5, -0.5)` in NDC.
pub const TRIANGLE_VERTICES: [[f32; 2]; 3] = [[0.0, 0.5], [-0.5, -0.5], [0.5, -0.5]];

/// A triangle covering the whole viewport.
pub const FULLSCREEN_TRIANGLE: [[f32; 2]; 3] = [[-1.0, -1.0], [3.0, -1.0], [-1.0, 3.0]];

/// [`FULLSCREEN_TRIANGLE`] in clip space at depth `z`.
#[allow(dead_code)]
pub fn fullscreen_at(z: f32) -> [[f32; 4]; 3] {
    FULLSCREEN_TRIANGLE.map(|[x, y]| [x, y, z, 1.0])
}

// ============================================================================
// Test Context
// ============================================================================

/// Test context providing access to a software device.
pub struct TestContext {
    #[allow(dead_code)]
    pub instance: Arc<GraphicsInstance>,
    pub device: Arc<GraphicsDevice>,
}

impl TestContext {
    pub fn new(queue_mode: QueueMode) -> Self {
        Self::with_parameters(InstanceParameters::new().with_queue_mode(queue_mode))
    }

    pub fn with_parameters(parameters: InstanceParameters) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let instance = GraphicsInstance::with_parameters(parameters.with_backend(BackendType::Software))
            .expect("Failed to create instance");
        let device = pollster::block_on(instance.request_default_device()).expect("Failed to create device");
        Self { instance, device }
    }

    /// Create a buffer initialized with `contents`.
    pub fn create_buffer_init(&self, contents: &[u8], usage: BufferUsage) -> Buffer {
        self.device
            .create_buffer_init(&BufferDescriptor::new(0, usage), contents)
            .expect("Failed to create buffer")
    }

    pub fn create_vertex_buffer(&self, vertices: &[[f32; 2]]) -> Buffer {
        self.create_buffer_init(bytemuck::cast_slice(vertices), BufferUsage::VERTEX)
    }

    /// Create a readback buffer (CPU readable, can copy to).
    #[allow(dead_code)]
    pub fn create_readback_buffer(&self, size: u64) -> Buffer {
        self.device
            .create_buffer(&BufferDescriptor::new(size, BufferUsage::COPY_DST | BufferUsage::MAP_READ))
            .expect("Failed to create buffer")
            .into_buffer()
    }

    /// Copy a `COPY_SRC` buffer into a readback buffer and return its bytes.
    #[allow(dead_code)]
    pub fn read_buffer(&self, buffer: &Buffer) -> Vec<u8> {
        let readback = self.create_readback_buffer(buffer.size());
        let mut encoder = self.device.create_command_encoder(Some("buffer readback"));
        encoder
            .copy_buffer_to_buffer(buffer, 0, &readback, 0, buffer.size())
            .expect("Failed to record readback");
        self.device
            .queue()
            .submit([encoder.finish()])
            .expect("Failed to submit readback");
        self.device
            .queue()
            .read_buffer(&readback, 0, buffer.size())
            .expect("Failed to read buffer")
    }

    /// Create a render target texture that can be read back.
    pub fn create_render_target(&self, width: u32, height: u32) -> Texture {
        self.device
            .create_texture(&TextureDescriptor::new_2d(
                width,
                height,
                TextureFormat::Rgba8Unorm,
                TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
            ))
            .expect("Failed to create texture")
    }

    #[allow(dead_code)]
    pub fn create_msaa_target(&self, width: u32, height: u32, samples: u32) -> Texture {
        self.device
            .create_texture(
                &TextureDescriptor::new_2d(width, height, TextureFormat::Rgba8Unorm, TextureUsage::RENDER_ATTACHMENT)
                    .with_sample_count(samples),
            )
            .expect("Failed to create texture")
    }

    /// A pipeline drawing `Float32x2` positions from vertex buffer 0 in one
    /// flat color.
    pub fn solid_color_pipeline(&self, format: TextureFormat, samples: u32, color: [f32; 4]) -> Arc<RenderPipeline> {
        let vertex = self
            .device
            .create_shader_module(ShaderModuleDescriptor::native(
                ShaderInterface::vertex().with_input(0, 2),
                ShaderProgram::vertex(vertex_fn(|_, input, _| {
                    let position = input.location(0);
                    VertexOutput::new([position[0], position[1], 0.0, 1.0])
                })),
            ))
            .expect("Failed to create vertex module");
        let fragment = self
            .device
            .create_shader_module(ShaderModuleDescriptor::native(
                ShaderInterface::fragment().with_output(0),
                ShaderProgram::fragment(fragment_fn(move |_, _| FragmentOutput::color(color))),
            ))
            .expect("Failed to create fragment module");
        let layout = self
            .device
            .create_pipeline_layout(&PipelineLayoutDescriptor::new(Vec::new()))
            .expect("Failed to create pipeline layout");

        let descriptor = RenderPipelineDescriptor::new(
            &layout,
            VertexState::new(&vertex).with_buffer(VertexBufferLayout::new(8).with_attribute(VertexFormat::Float32x2, 0, 0)),
        )
        .with_label("solid color")
        .with_fragment(FragmentState::new(&fragment).with_target(format))
        .with_multisample(MultisampleState::with_count(samples));
        self.device
            .create_render_pipeline(&descriptor)
            .expect("Failed to create pipeline")
    }

    #[allow(dead_code)]
    pub fn create_depth_target(&self, width: u32, height: u32, format: TextureFormat) -> Texture {
        self.device
            .create_texture(&TextureDescriptor::new_2d(width, height, format, TextureUsage::RENDER_ATTACHMENT))
            .expect("Failed to create texture")
    }

    /// A pipeline drawing clip-space `Float32x4` positions from vertex
    /// buffer 0 into an `Rgba8Unorm` target in one flat color.
    #[allow(dead_code)]
    pub fn clip_space_pipeline(
        &self,
        color: [f32; 4],
        primitive: PrimitiveState,
        depth_stencil: Option<DepthStencilState>,
    ) -> Arc<RenderPipeline> {
        let vertex = self
            .device
            .create_shader_module(ShaderModuleDescriptor::native(
                ShaderInterface::vertex().with_input(0, 4),
                ShaderProgram::vertex(vertex_fn(|_, input, _| VertexOutput::new(input.location(0)))),
            ))
            .expect("Failed to create vertex module");
        let fragment = self
            .device
            .create_shader_module(ShaderModuleDescriptor::native(
                ShaderInterface::fragment().with_output(0),
                ShaderProgram::fragment(fragment_fn(move |_, _| FragmentOutput::color(color))),
            ))
            .expect("Failed to create fragment module");
        let layout = self
            .device
            .create_pipeline_layout(&PipelineLayoutDescriptor::new(Vec::new()))
            .expect("Failed to create pipeline layout");

        let mut descriptor = RenderPipelineDescriptor::new(
            &layout,
            VertexState::new(&vertex).with_buffer(VertexBufferLayout::new(16).with_attribute(VertexFormat::Float32x4, 0, 0)),
        )
        .with_label("clip space")
        .with_fragment(FragmentState::new(&fragment).with_target(TextureFormat::Rgba8Unorm))
        .with_primitive(primitive);
        if let Some(depth_stencil) = depth_stencil {
            descriptor = descriptor.with_depth_stencil(depth_stencil);
        }
        self.device
            .create_render_pipeline(&descriptor)
            .expect("Failed to create pipeline")
    }

    /// Read layer 0 of a texture back as tightly packed rows.
    pub fn read_pixels(&self, texture: &Texture) -> Vec<u8> {
        read_texture(&self.device, texture, 0).expect("Failed to read texture")
    }
}

// ============================================================================
// Pixel Helpers
// ============================================================================

/// Get the RGBA8 pixel at `(x, y)` of tightly packed rows.
pub fn get_pixel(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let at = ((y * width + x) * 4) as usize;
    [pixels[at], pixels[at + 1], pixels[at + 2], pixels[at + 3]]
}

/// Every distinct RGBA8 value in `pixels`.
#[allow(dead_code)]
pub fn distinct_colors(pixels: &[u8]) -> BTreeSet<[u8; 4]> {
    pixels
        .chunks_exact(4)
        .map(|texel| [texel[0], texel[1], texel[2], texel[3]])
        .collect()
}

/// Inclusive bounding box `(min_x, min_y, max_x, max_y)` of the pixels equal
/// to `color`.
#[allow(dead_code)]
pub fn extent_of(pixels: &[u8], width: u32, color: [u8; 4]) -> Option<(u32, u32, u32, u32)> {
    pixels
        .chunks_exact(4)
        .enumerate()
        .filter(|(_, texel)| *texel == color)
        .map(|(i, _)| (i as u32 % width, i as u32 / width))
        .fold(None, |extent, (x, y)| match extent {
            None => Some((x, y, x, y)),
            Some((x0, y0, x1, y1)) => Some((x0.min(x), y0.min(y), x1.max(x), y1.max(y))),
        })
}
