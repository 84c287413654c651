//! # RedLilium Frame Demos
//!
//! Sample programs driving the frame execution core.
//!
//! ## Available Examples
//!
//! - `hello_triangle` - A single red triangle
//! - `hello_triangle_msaa` - The same triangle rendered with 4x multisampling
//! - `rotating_cube` - Vertex input, depth testing and a per-frame uniform upload
//! - `instanced_cube` - A 100x100 grid of cubes drawn with one instanced draw call
//!
//! Every example exposes `init(&ExampleContext) -> Result<FrameCallback>`.
//! The returned callback renders and presents one frame each time it is
//! invoked with the time elapsed since start.

use std::sync::Arc;
use std::time::Duration;

use redlilium_frame::{
    resolve_device, DefaultHost, DeviceConstraints, FrameScheduler, FrameSchedulerConfig, GlslCompiler,
    GraphicsDevice, GraphicsError, InstanceParameters, OffscreenSurface, PresentationSurface, ShaderCompiler,
    ShaderModule, ShaderModuleDescriptor, ShaderProgram, SurfaceConfiguration, SwapChain, TextureFormat,
};

pub mod cube;
pub mod hello_triangle;
pub mod hello_triangle_msaa;
pub mod instanced_cube;
pub mod rotating_cube;

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format of the presentable images all examples render into.
pub const SURFACE_FORMAT: TextureFormat = TextureFormat::Bgra8Unorm;

/// Renders and presents one frame, given the time elapsed since start.
pub type FrameCallback = Box<dyn FnMut(Duration) -> Result<(), GraphicsError>>;

/// Everything an example needs to set itself up.
pub struct ExampleContext {
    device: Arc<GraphicsDevice>,
    surface: Arc<dyn PresentationSurface>,
    width: u32,
    height: u32,
    compiler: GlslCompiler,
}

impl ExampleContext {
    pub fn new(device: Arc<GraphicsDevice>, surface: Arc<dyn PresentationSurface>, width: u32, height: u32) -> Self {
        Self {
            device,
            surface,
            width,
            height,
            compiler: GlslCompiler::new(),
        }
    }

    /// Resolves a device and pairs it with an [`OffscreenSurface`], which is
    /// returned alongside so the caller can inspect presented frames.
    pub fn headless(
        parameters: &InstanceParameters,
        width: u32,
        height: u32,
    ) -> Result<(Self, Arc<OffscreenSurface>), GraphicsError> {
        let constraints = DeviceConstraints::default().with_label("demo device");
        let device = pollster::block_on(resolve_device(&DefaultHost, parameters, &constraints))?;
        let surface = Arc::new(OffscreenSurface::new("demo"));
        Ok((Self::new(device, surface.clone(), width, height), surface))
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn aspect(&self) -> f32 {
        (self.width as f32 / self.height as f32).abs()
    }

    /// Configures a swapchain over the surface and wraps it in a scheduler.
    pub fn create_scheduler(&self) -> Result<FrameScheduler, GraphicsError> {
        let swapchain = SwapChain::configure(
            &self.device,
            self.surface.clone(),
            &SurfaceConfiguration::new(self.width, self.height).with_format(SURFACE_FORMAT),
        )?;
        FrameScheduler::new(self.device.clone(), swapchain, FrameSchedulerConfig::default())
    }

    /// Compiles GLSL `source` for the stage of `program` and binds the kernel
    /// that executes it.
    pub fn compile_module(
        &self,
        label: &str,
        source: &str,
        program: ShaderProgram,
    ) -> Result<Arc<ShaderModule>, GraphicsError> {
        let compiled = self.compiler.compile(source, program.stage())?;
        self.device
            .create_shader_module(ShaderModuleDescriptor::compiled(compiled, program).with_label(label))
    }
}

/// A registered example.
pub struct Example {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub init: fn(&ExampleContext) -> Result<FrameCallback, GraphicsError>,
}

impl std::fmt::Debug for Example {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Example").field("name", &self.name).finish()
    }
}

pub static EXAMPLES: [Example; 4] = [
    Example {
        name: "hello_triangle",
        title: hello_triangle::TITLE,
        description: hello_triangle::DESCRIPTION,
        init: hello_triangle::init,
    },
    Example {
        name: "hello_triangle_msaa",
        title: hello_triangle_msaa::TITLE,
        description: hello_triangle_msaa::DESCRIPTION,
        init: hello_triangle_msaa::init,
    },
    Example {
        name: "rotating_cube",
        title: rotating_cube::TITLE,
        description: rotating_cube::DESCRIPTION,
        init: rotating_cube::init,
    },
    Example {
        name: "instanced_cube",
        title: instanced_cube::TITLE,
        description: instanced_cube::DESCRIPTION,
        init: instanced_cube::init,
    },
];

pub fn find_example(name: &str) -> Option<&'static Example> {
    EXAMPLES.iter().find(|example| example.name == name)
}

/// Drives `callback` for `frames` refreshes spaced `interval` apart, then
/// waits for the queue to drain.
pub fn run_frames(
    device: &GraphicsDevice,
    callback: &mut FrameCallback,
    frames: u64,
    interval: Duration,
) -> Result<(), GraphicsError> {
    for i in 0..frames {
        let elapsed = interval.saturating_mul(i.min(u32::MAX as u64) as u32);
        callback(elapsed)?;
    }
    device.queue().wait_idle();
    log::info!("Rendered {frames} frames");
    Ok(())
}
