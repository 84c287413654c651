//! Software reference backend.
//!
//! Executes every command on the CPU against the texel and byte storage of
//! the resources. Results are deterministic: the same commands on the same
//! inputs produce bit-identical attachments.

mod copy;
mod raster;

use crate::command::Command;
use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, AdapterType, Features, Limits};
use crate::resources::Texture;
use crate::swapchain::{PresentationSurface, PresentedFrame};

use super::{AdapterDescription, GpuBackend};

/// CPU rasterizer backend.
#[derive(Debug)]
pub struct SoftwareBackend {
    adapter: AdapterDescription,
}

impl SoftwareBackend {
    /// Create a new software backend.
    pub fn new() -> Self {
        Self {
            adapter: AdapterDescription {
                info: AdapterInfo {
                    name: "RedLilium Software Rasterizer".to_string(),
                    vendor: "RedLilium".to_string(),
                    device_type: AdapterType::Software,
                    backend: "software",
                },
                limits: Limits {
                    max_texture_dimension_2d: 16384,
                    max_buffer_size: 1 << 30,
                    ..Limits::default()
                },
                features: Features::all(),
            },
        }
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "Software Backend"
    }

    fn enumerate_adapters(&self) -> Vec<AdapterDescription> {
        vec![self.adapter.clone()]
    }

    fn execute(&self, command: &Command) -> Result<(), GraphicsError> {
        log::trace!("SoftwareBackend: executing {}", command.name());
        match command {
            Command::CopyBufferToBuffer {
                source,
                source_offset,
                destination,
                destination_offset,
                size,
            } => copy::copy_buffer_to_buffer(source, *source_offset, destination, *destination_offset, *size),
            Command::CopyBufferToTexture {
                source,
                destination,
                size,
            } => copy::copy_buffer_to_texture(source, destination, *size),
            Command::CopyTextureToBuffer {
                source,
                destination,
                size,
            } => copy::copy_texture_to_buffer(source, destination, *size),
            Command::ClearBuffer { buffer, offset, size } => copy::clear_buffer(buffer, *offset, *size),
            Command::WriteBuffer { buffer, offset, data } => copy::write_buffer(buffer, *offset, data),
            Command::RenderPass(pass) => raster::execute_pass(pass),
        }
    }

    fn present(&self, texture: &Texture, surface: &dyn PresentationSurface) -> Result<(), GraphicsError> {
        let (width, height, pixels) = copy::texture_to_rgba8(texture)?;
        log::trace!(
            "SoftwareBackend: presenting {:?} ({width}x{height}) to {:?}",
            texture.label(),
            surface.label()
        );
        surface.present(PresentedFrame { width, height, pixels })
    }
}
