//! Command encoding.
//!
//! A [`CommandEncoder`] records commands in linear order. Render passes are
//! recorded through a [`RenderPassEncoder`] that takes the encoder by value
//! and hands it back from [`RenderPassEncoder::end`]; [`CommandEncoder::finish`]
//! consumes the encoder into a [`CommandBuffer`] ready for
//! [`Queue::submit`](crate::Queue::submit).
//!
//! Reusing a finished encoder does not compile:
//!
//! ```compile_fail
//! # use redlilium_frame::GraphicsInstance;
//! # let device = pollster::block_on(GraphicsInstance::new().unwrap().request_default_device()).unwrap();
//! let encoder = device.create_command_encoder(None);
//! let first = encoder.finish();
//! let second = encoder.finish(); // use of moved value
//! ```
//!
//! Neither does recording into a pass after it ended:
//!
//! ```compile_fail
//! # use redlilium_frame::{CommandEncoder, RenderPassDescriptor};
//! fn record(encoder: CommandEncoder, descriptor: &RenderPassDescriptor) {
//!     let mut pass = encoder.begin_render_pass(descriptor).unwrap();
//!     let _encoder = pass.end();
//!     pass.draw(3, 1, 0, 0).unwrap(); // use of moved value
//! }
//! ```

mod render_pass;

pub use render_pass::{
    ColorAttachment, DepthStencilAttachment, LoadOp, Operations, RenderPassDescriptor, RenderPassEncoder, StoreOp,
};
pub(crate) use render_pass::{DrawCall, DrawKind, RecordedPass};

use crate::error::GraphicsError;
use crate::resources::{Buffer, Texture};
use crate::types::{BufferUsage, Extent3d, Origin3d, TextureUsage, COPY_BUFFER_ALIGNMENT, COPY_BYTES_PER_ROW_ALIGNMENT};

/// Placement of texel rows inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDataLayout {
    /// Byte offset of the first texel.
    pub offset: u64,
    /// Bytes between the starts of consecutive rows. Must be a multiple of
    /// [`COPY_BYTES_PER_ROW_ALIGNMENT`] when the copy spans several rows.
    pub bytes_per_row: u32,
    /// Rows between the starts of consecutive layers; the copy height when `None`.
    pub rows_per_image: Option<u32>,
}

impl ImageDataLayout {
    pub fn new(offset: u64, bytes_per_row: u32) -> Self {
        Self {
            offset,
            bytes_per_row,
            rows_per_image: None,
        }
    }

    pub fn with_rows_per_image(mut self, rows_per_image: u32) -> Self {
        self.rows_per_image = Some(rows_per_image);
        self
    }
}

/// The buffer side of a texel copy.
#[derive(Debug, Clone)]
pub struct ImageCopyBuffer {
    pub buffer: Buffer,
    pub layout: ImageDataLayout,
}

impl ImageCopyBuffer {
    pub fn new(buffer: &Buffer, layout: ImageDataLayout) -> Self {
        Self {
            buffer: buffer.clone(),
            layout,
        }
    }
}

/// The texture side of a texel copy; `origin.z` is the first array layer.
#[derive(Debug, Clone)]
pub struct ImageCopyTexture {
    pub texture: Texture,
    pub origin: Origin3d,
}

impl ImageCopyTexture {
    pub fn new(texture: &Texture) -> Self {
        Self {
            texture: texture.clone(),
            origin: Origin3d::ZERO,
        }
    }

    pub fn with_origin(mut self, origin: Origin3d) -> Self {
        self.origin = origin;
        self
    }
}

/// A recorded command.
#[derive(Debug)]
pub(crate) enum Command {
    CopyBufferToBuffer {
        source: Buffer,
        source_offset: u64,
        destination: Buffer,
        destination_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        source: ImageCopyBuffer,
        destination: ImageCopyTexture,
        size: Extent3d,
    },
    CopyTextureToBuffer {
        source: ImageCopyTexture,
        destination: ImageCopyBuffer,
        size: Extent3d,
    },
    ClearBuffer {
        buffer: Buffer,
        offset: u64,
        size: u64,
    },
    WriteBuffer {
        buffer: Buffer,
        offset: u64,
        data: Vec<u8>,
    },
    RenderPass(RecordedPass),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::CopyBufferToBuffer { .. } => "copy_buffer_to_buffer",
            Self::CopyBufferToTexture { .. } => "copy_buffer_to_texture",
            Self::CopyTextureToBuffer { .. } => "copy_texture_to_buffer",
            Self::ClearBuffer { .. } => "clear_buffer",
            Self::WriteBuffer { .. } => "write_buffer",
            Self::RenderPass(_) => "render_pass",
        }
    }

    /// Fails with `UsageSequence` if any resource the command touches has
    /// been destroyed.
    pub(crate) fn ensure_live(&self) -> Result<(), GraphicsError> {
        match self {
            Self::CopyBufferToBuffer {
                source, destination, ..
            } => {
                source.ensure_live()?;
                destination.ensure_live()
            }
            Self::CopyBufferToTexture {
                source, destination, ..
            } => {
                source.buffer.ensure_live()?;
                destination.texture.ensure_live()
            }
            Self::CopyTextureToBuffer {
                source, destination, ..
            } => {
                source.texture.ensure_live()?;
                destination.buffer.ensure_live()
            }
            Self::ClearBuffer { buffer, .. } | Self::WriteBuffer { buffer, .. } => buffer.ensure_live(),
            Self::RenderPass(pass) => pass.ensure_live(),
        }
    }
}

/// A finished, immutable sequence of commands.
#[derive(Debug)]
pub struct CommandBuffer {
    label: Option<String>,
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub(crate) fn from_commands(label: Option<String>, commands: Vec<Command>) -> Self {
        Self { label, commands }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn commands(&self) -> &[Command] {
        &self.commands
    }
}

/// Records commands for one submission.
#[derive(Debug)]
pub struct CommandEncoder {
    label: Option<String>,
    commands: Vec<Command>,
    max_color_attachments: u32,
}

impl CommandEncoder {
    pub(crate) fn new(label: Option<String>, max_color_attachments: u32) -> Self {
        Self {
            label,
            commands: Vec::new(),
            max_color_attachments,
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Number of commands recorded so far; a render pass counts as one.
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn push(&mut self, command: Command) {
        log::trace!("CommandEncoder {:?}: recorded {}", self.label, command.name());
        self.commands.push(command);
    }

    /// Copies `size` bytes between two distinct buffers.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Validation`] if the usages lack `COPY_SRC` /
    /// `COPY_DST`, offsets or size are not multiples of
    /// [`COPY_BUFFER_ALIGNMENT`], either range is out of bounds, or both
    /// sides are the same buffer.
    pub fn copy_buffer_to_buffer(
        &mut self,
        source: &Buffer,
        source_offset: u64,
        destination: &Buffer,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), GraphicsError> {
        source.ensure_live()?;
        destination.ensure_live()?;
        if source.same_as(destination) {
            return Err(GraphicsError::validation(format!(
                "copy from buffer {:?} to itself",
                source.label()
            )));
        }
        check_usage(source, BufferUsage::COPY_SRC)?;
        check_usage(destination, BufferUsage::COPY_DST)?;
        check_alignment("source offset", source_offset)?;
        check_alignment("destination offset", destination_offset)?;
        check_alignment("copy size", size)?;
        check_range(source, source_offset, size)?;
        check_range(destination, destination_offset, size)?;

        self.push(Command::CopyBufferToBuffer {
            source: source.clone(),
            source_offset,
            destination: destination.clone(),
            destination_offset,
            size,
        });
        Ok(())
    }

    /// Zeroes `offset..offset + size` of `buffer`; `size: None` clears to the end.
    pub fn clear_buffer(&mut self, buffer: &Buffer, offset: u64, size: Option<u64>) -> Result<(), GraphicsError> {
        buffer.ensure_live()?;
        check_usage(buffer, BufferUsage::COPY_DST)?;
        let size = size.unwrap_or_else(|| buffer.size().saturating_sub(offset));
        check_alignment("clear offset", offset)?;
        check_alignment("clear size", size)?;
        check_range(buffer, offset, size)?;
        self.push(Command::ClearBuffer {
            buffer: buffer.clone(),
            offset,
            size,
        });
        Ok(())
    }

    /// Copies texel rows from a buffer into a texture region.
    pub fn copy_buffer_to_texture(
        &mut self,
        source: ImageCopyBuffer,
        destination: ImageCopyTexture,
        size: Extent3d,
    ) -> Result<(), GraphicsError> {
        validate_texel_copy(&source, &destination, size, BufferUsage::COPY_SRC, TextureUsage::COPY_DST)?;
        self.push(Command::CopyBufferToTexture {
            source,
            destination,
            size,
        });
        Ok(())
    }

    /// Copies a texture region into texel rows of a buffer.
    pub fn copy_texture_to_buffer(
        &mut self,
        source: ImageCopyTexture,
        destination: ImageCopyBuffer,
        size: Extent3d,
    ) -> Result<(), GraphicsError> {
        validate_texel_copy(&destination, &source, size, BufferUsage::COPY_DST, TextureUsage::COPY_SRC)?;
        self.push(Command::CopyTextureToBuffer {
            source,
            destination,
            size,
        });
        Ok(())
    }

    /// Begins a render pass, moving the encoder into the pass.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Validation`] if the attachments are
    /// inconsistent, see [`RenderPassDescriptor`]. The encoder is dropped
    /// with the error.
    pub fn begin_render_pass(self, descriptor: &RenderPassDescriptor) -> Result<RenderPassEncoder, GraphicsError> {
        let max_color_attachments = self.max_color_attachments;
        RenderPassEncoder::begin(self, descriptor, max_color_attachments)
    }

    /// Finishes recording.
    pub fn finish(self) -> CommandBuffer {
        log::trace!(
            "CommandEncoder {:?}: finished with {} commands",
            self.label,
            self.commands.len()
        );
        CommandBuffer::from_commands(self.label, self.commands)
    }
}

fn check_usage(buffer: &Buffer, usage: BufferUsage) -> Result<(), GraphicsError> {
    if !buffer.usage().contains(usage) {
        return Err(GraphicsError::validation(format!(
            "buffer {:?} lacks {usage:?} usage",
            buffer.label()
        )));
    }
    Ok(())
}

fn check_alignment(what: &str, value: u64) -> Result<(), GraphicsError> {
    if value % COPY_BUFFER_ALIGNMENT != 0 {
        return Err(GraphicsError::validation(format!(
            "{what} {value} is not a multiple of {COPY_BUFFER_ALIGNMENT}"
        )));
    }
    Ok(())
}

fn check_range(buffer: &Buffer, offset: u64, size: u64) -> Result<(), GraphicsError> {
    if offset.checked_add(size).map_or(true, |end| end > buffer.size()) {
        return Err(GraphicsError::validation(format!(
            "range {offset}+{size} is outside buffer {:?} of {} bytes",
            buffer.label(),
            buffer.size()
        )));
    }
    Ok(())
}

/// Bytes a texel copy reads from or writes to its buffer, starting at the
/// layout offset.
pub(crate) fn texel_copy_span(layout: &ImageDataLayout, size: Extent3d, block_size: u32) -> u64 {
    if size.width == 0 || size.height == 0 || size.depth == 0 {
        return 0;
    }
    let row = layout.bytes_per_row as u64;
    let rows_per_image = layout.rows_per_image.unwrap_or(size.height) as u64;
    row * rows_per_image * (size.depth as u64 - 1) + row * (size.height as u64 - 1) + size.width as u64 * block_size as u64
}

fn validate_texel_copy(
    buffer: &ImageCopyBuffer,
    texture: &ImageCopyTexture,
    size: Extent3d,
    buffer_usage: BufferUsage,
    texture_usage: TextureUsage,
) -> Result<(), GraphicsError> {
    let fail = |message: String| Err(GraphicsError::validation(message));
    buffer.buffer.ensure_live()?;
    texture.texture.ensure_live()?;
    check_usage(&buffer.buffer, buffer_usage)?;

    let target = &texture.texture;
    let format = target.format();
    if !target.usage().contains(texture_usage) {
        return fail(format!("texture {:?} lacks {texture_usage:?} usage", target.label()));
    }
    if !format.is_copyable() {
        return fail(format!("format {format:?} of texture {:?} cannot be copied", target.label()));
    }
    if target.sample_count() != 1 {
        return fail(format!("multisampled texture {:?} cannot be copied", target.label()));
    }

    let origin = texture.origin;
    let fits = |origin: u32, extent: u32, limit: u32| origin.checked_add(extent).is_some_and(|end| end <= limit);
    if !fits(origin.x, size.width, target.width())
        || !fits(origin.y, size.height, target.height())
        || !fits(origin.z, size.depth, target.depth())
    {
        return fail(format!(
            "copy region {origin:?}+{size:?} is outside texture {:?} of {:?}",
            target.label(),
            target.size()
        ));
    }

    let layout = &buffer.layout;
    let block = format.block_size();
    let row_bytes = size.width * block;
    if (size.height > 1 || size.depth > 1) && layout.bytes_per_row % COPY_BYTES_PER_ROW_ALIGNMENT != 0 {
        return fail(format!(
            "bytes_per_row {} is not a multiple of {COPY_BYTES_PER_ROW_ALIGNMENT}",
            layout.bytes_per_row
        ));
    }
    if layout.bytes_per_row < row_bytes {
        return fail(format!(
            "bytes_per_row {} is smaller than a row of {row_bytes} bytes",
            layout.bytes_per_row
        ));
    }
    if layout.rows_per_image.is_some_and(|rows| rows < size.height) {
        return fail(format!("rows_per_image {:?} is smaller than the copy height", layout.rows_per_image));
    }
    if layout.offset % block as u64 != 0 {
        return fail(format!("buffer offset {} is not a multiple of the texel size {block}", layout.offset));
    }
    let span = texel_copy_span(layout, size, block);
    check_range(&buffer.buffer, layout.offset, span)
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;
    use crate::resources::AllocatedBuffer;
    use crate::types::{BufferDescriptor, TextureDescriptor, TextureFormat};

    fn buffer(size: u64, usage: BufferUsage) -> Buffer {
        AllocatedBuffer::new(1, Weak::new(), BufferDescriptor::new(size, usage)).into_buffer()
    }

    fn texture(width: u32, height: u32, usage: TextureUsage) -> Texture {
        Texture::new(2, Weak::new(), TextureDescriptor::new_2d(width, height, TextureFormat::Rgba8Unorm, usage))
    }

    fn encoder() -> CommandEncoder {
        CommandEncoder::new(Some("test".into()), 4)
    }

    #[test]
    fn test_copy_buffer_validation() {
        let src = buffer(64, BufferUsage::COPY_SRC);
        let dst = buffer(64, BufferUsage::COPY_DST);
        let mut encoder = encoder();
        assert!(encoder.copy_buffer_to_buffer(&src, 0, &dst, 16, 48).is_ok());
        assert!(encoder.copy_buffer_to_buffer(&src, 0, &dst, 32, 48).is_err());
        assert!(encoder.copy_buffer_to_buffer(&src, 2, &dst, 0, 8).is_err());
        assert!(encoder.copy_buffer_to_buffer(&dst, 0, &src, 0, 8).is_err());
        assert!(encoder.copy_buffer_to_buffer(&src, 0, &src, 0, 8).is_err());
        assert_eq!(encoder.command_count(), 1);
        let commands = encoder.finish();
        assert_eq!(commands.label(), Some("test"));
        assert_eq!(commands.command_count(), 1);
    }

    #[test]
    fn test_destroyed_buffer_rejected() {
        let src = buffer(16, BufferUsage::COPY_SRC);
        let dst = buffer(16, BufferUsage::COPY_DST);
        src.destroy();
        let err = encoder().copy_buffer_to_buffer(&src, 0, &dst, 0, 16).unwrap_err();
        assert!(err.is_usage_sequence());
    }

    #[test]
    fn test_texel_copy_row_alignment() {
        let staging = buffer(256 * 4, BufferUsage::COPY_SRC);
        let target = texture(4, 4, TextureUsage::COPY_DST);
        let mut encoder = encoder();

        let padded = ImageCopyBuffer::new(&staging, ImageDataLayout::new(0, 256));
        assert!(encoder
            .copy_buffer_to_texture(padded, ImageCopyTexture::new(&target), Extent3d::new_2d(4, 4))
            .is_ok());

        let tight = ImageCopyBuffer::new(&staging, ImageDataLayout::new(0, 16));
        let err = encoder
            .copy_buffer_to_texture(tight, ImageCopyTexture::new(&target), Extent3d::new_2d(4, 4))
            .unwrap_err();
        assert!(err.to_string().contains("256"));

        // A single row needs no padding
        let single = ImageCopyBuffer::new(&staging, ImageDataLayout::new(0, 16));
        assert!(encoder
            .copy_buffer_to_texture(single, ImageCopyTexture::new(&target), Extent3d::new_2d(4, 1))
            .is_ok());
    }

    #[test]
    fn test_texel_copy_bounds() {
        let staging = buffer(256 * 3 + 16, BufferUsage::COPY_SRC);
        let target = texture(4, 4, TextureUsage::COPY_DST);
        let mut encoder = encoder();
        let layout = ImageDataLayout::new(0, 256);

        assert!(encoder
            .copy_buffer_to_texture(
                ImageCopyBuffer::new(&staging, layout),
                ImageCopyTexture::new(&target),
                Extent3d::new_2d(4, 4)
            )
            .is_ok());
        assert!(encoder
            .copy_buffer_to_texture(
                ImageCopyBuffer::new(&staging, ImageDataLayout::new(16, 256)),
                ImageCopyTexture::new(&target),
                Extent3d::new_2d(4, 4)
            )
            .is_err());
        assert!(encoder
            .copy_buffer_to_texture(
                ImageCopyBuffer::new(&staging, layout),
                ImageCopyTexture::new(&target).with_origin(Origin3d::new(1, 0, 0)),
                Extent3d::new_2d(4, 4)
            )
            .is_err());
    }

    #[test]
    fn test_texel_copy_span() {
        let layout = ImageDataLayout::new(0, 256);
        assert_eq!(texel_copy_span(&layout, Extent3d::new_2d(4, 4), 4), 256 * 3 + 16);
        assert_eq!(texel_copy_span(&layout, Extent3d::new_3d(4, 2, 2), 4), 256 * 2 + 256 + 16);
        assert_eq!(texel_copy_span(&layout, Extent3d::new_2d(0, 4), 4), 0);
    }

    #[test]
    fn test_clear_buffer() {
        let target = buffer(32, BufferUsage::COPY_DST);
        let mut encoder = encoder();
        assert!(encoder.clear_buffer(&target, 8, None).is_ok());
        assert!(encoder.clear_buffer(&target, 8, Some(32)).is_err());
        assert!(encoder.clear_buffer(&buffer(8, BufferUsage::VERTEX), 0, None).is_err());
    }
}
