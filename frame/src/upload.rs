//! Streaming uploads and readbacks.
//!
//! Host data reaches device-local resources through short-lived staging
//! buffers: the bytes are written into a mapped `MAP_WRITE | COPY_SRC`
//! buffer, committed, and copied on the queue timeline. The staging buffer
//! must outlive the submission carrying its copy, so [`StagingBuffer`]
//! offers three ways to release it:
//!
//! - [`StagingBuffer::retire_after`] lets the queue destroy it once the
//!   submission completed
//! - [`StagingBuffer::destroy_after`] awaits a [`Fence`] first
//! - [`StagingBuffer::destroy_unchecked`] destroys it immediately
//!
//! # Example
//!
//! ```ignore
//! let (encoder, staging) = update_buffer_data(&device, &uniforms, 0, bytemuck::bytes_of(&camera), None)?;
//! let index = device.queue().submit([encoder.finish()])?;
//! staging.retire_after(device.queue(), index);
//! ```

use std::sync::Arc;

use crate::command::{CommandEncoder, ImageCopyBuffer, ImageCopyTexture, ImageDataLayout};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::queue::{Queue, SubmissionIndex};
use crate::resources::{Buffer, Texture};
use crate::scheduler::Fence;
use crate::types::{
    padded_bytes_per_row, BufferDescriptor, BufferUsage, Extent3d, Origin3d, TextureDescriptor, TextureFormat,
    TextureUsage, COPY_BUFFER_ALIGNMENT,
};

/// A committed staging buffer whose copy may still be pending.
pub struct StagingBuffer {
    buffer: Buffer,
    released: bool,
}

impl StagingBuffer {
    fn new(buffer: Buffer) -> Self {
        Self {
            buffer,
            released: false,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    /// Hands the buffer to `queue`, destroying it once submission `index`
    /// completed.
    pub fn retire_after(mut self, queue: &Queue, index: SubmissionIndex) {
        self.released = true;
        queue.destroy_after(&self.buffer, index);
    }

    /// Waits for `fence`, then destroys the buffer.
    pub async fn destroy_after(mut self, fence: Fence) {
        fence.await;
        self.released = true;
        self.buffer.destroy();
    }

    /// Destroys the buffer now.
    ///
    /// If the copy did not run yet, the queue skips it and records a
    /// [`GraphicsError::UsageSequence`] in its error log.
    pub fn destroy_unchecked(mut self) {
        self.released = true;
        self.buffer.destroy();
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        if !self.released {
            log::warn!(
                "Staging buffer {:?} ({} bytes) dropped without being retired",
                self.buffer.label(),
                self.buffer.size()
            );
        }
    }
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer").field("buffer", &self.buffer).finish()
    }
}

/// Allocates a mapped staging buffer holding `bytes`.
fn stage(device: &Arc<GraphicsDevice>, label: &str, bytes: &[u8]) -> Result<StagingBuffer, GraphicsError> {
    let descriptor = BufferDescriptor::new(bytes.len() as u64, BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC)
        .with_label(label)
        .mapped();
    let mut mapped = device.create_buffer(&descriptor)?.into_mapped()?;
    mapped.write(0, bytes)?;
    Ok(StagingBuffer::new(mapped.commit()))
}

/// Records an upload of `bytes` into `destination` at `offset`.
///
/// The copy goes into `encoder`, or a new encoder when `None`. The returned
/// staging buffer must stay alive until the submission carrying the encoder
/// completed.
///
/// # Errors
///
/// Returns [`GraphicsError::Validation`] if `bytes` is empty, the
/// destination lacks `COPY_DST`, offset or length are not multiples of
/// [`COPY_BUFFER_ALIGNMENT`], or the range exceeds the destination.
pub fn update_buffer_data(
    device: &Arc<GraphicsDevice>,
    destination: &Buffer,
    offset: u64,
    bytes: &[u8],
    encoder: Option<CommandEncoder>,
) -> Result<(CommandEncoder, StagingBuffer), GraphicsError> {
    let size = bytes.len() as u64;
    if bytes.is_empty() {
        return Err(GraphicsError::validation(format!(
            "upload into buffer {:?} has no data",
            destination.label()
        )));
    }
    if size % COPY_BUFFER_ALIGNMENT != 0 || offset % COPY_BUFFER_ALIGNMENT != 0 {
        return Err(GraphicsError::validation(format!(
            "upload of {size} bytes at {offset} is not {COPY_BUFFER_ALIGNMENT}-byte aligned"
        )));
    }

    let staging = stage(device, "staging", bytes)?;
    let mut encoder = encoder.unwrap_or_else(|| device.create_command_encoder(Some("upload")));
    if let Err(e) = encoder.copy_buffer_to_buffer(staging.buffer(), 0, destination, offset, size) {
        staging.destroy_unchecked();
        return Err(e);
    }
    log::debug!(
        "Recorded upload of {size} bytes into buffer {:?} at {offset}",
        destination.label()
    );
    Ok((encoder, staging))
}

/// Tightly packed texel rows of one image layer.
#[derive(Debug, Clone)]
pub struct PixelData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Rows top to bottom, `width * block_size` bytes each.
    pub bytes: Vec<u8>,
    /// Store the rows bottom to top.
    pub flip_y: bool,
}

impl PixelData {
    pub fn new(width: u32, height: u32, format: TextureFormat, bytes: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            bytes,
            flip_y: false,
        }
    }

    pub fn flipped(mut self) -> Self {
        self.flip_y = true;
        self
    }

    fn row_bytes(&self) -> usize {
        self.width as usize * self.format.block_size() as usize
    }
}

/// Creates a texture and uploads `pixels` into it.
///
/// Rows are padded to [`COPY_BYTES_PER_ROW_ALIGNMENT`](crate::COPY_BYTES_PER_ROW_ALIGNMENT)
/// in the staging buffer, which is retired after the returned submission.
pub fn create_texture_from_pixels(
    device: &Arc<GraphicsDevice>,
    pixels: &PixelData,
    usage: TextureUsage,
) -> Result<(Texture, SubmissionIndex), GraphicsError> {
    if !pixels.format.is_copyable() {
        return Err(GraphicsError::validation(format!(
            "{:?} textures cannot be uploaded",
            pixels.format
        )));
    }
    let row_bytes = pixels.row_bytes();
    let expected = row_bytes * pixels.height as usize;
    if pixels.bytes.len() != expected {
        return Err(GraphicsError::validation(format!(
            "{}x{} {:?} pixels need {expected} bytes, got {}",
            pixels.width,
            pixels.height,
            pixels.format,
            pixels.bytes.len()
        )));
    }

    let texture = device.create_texture(
        &TextureDescriptor::new_2d(pixels.width, pixels.height, pixels.format, usage | TextureUsage::COPY_DST)
            .with_label("uploaded texture"),
    )?;

    let padded = padded_bytes_per_row(pixels.width, pixels.format) as usize;
    let mut staged = vec![0u8; padded * pixels.height as usize];
    for (y, row) in pixels.bytes.chunks_exact(row_bytes).enumerate() {
        let target = if pixels.flip_y {
            pixels.height as usize - 1 - y
        } else {
            y
        };
        staged[target * padded..target * padded + row_bytes].copy_from_slice(row);
    }
    let staging = stage(device, "texture staging", &staged)?;

    let mut encoder = device.create_command_encoder(Some("texture upload"));
    encoder.copy_buffer_to_texture(
        ImageCopyBuffer::new(staging.buffer(), ImageDataLayout::new(0, padded as u32)),
        ImageCopyTexture::new(&texture),
        Extent3d::new_2d(pixels.width, pixels.height),
    )?;
    let index = device.queue().submit([encoder.finish()])?;
    staging.retire_after(device.queue(), index);

    log::debug!(
        "Uploaded {}x{} {:?} texture ({padded} bytes per row)",
        pixels.width,
        pixels.height,
        pixels.format
    );
    Ok((texture, index))
}

/// Reads `layer` of a `COPY_SRC` texture back as tightly packed rows.
///
/// Blocks until every earlier submission completed.
pub fn read_texture(device: &Arc<GraphicsDevice>, texture: &Texture, layer: u32) -> Result<Vec<u8>, GraphicsError> {
    let (width, height, format) = (texture.width(), texture.height(), texture.format());
    let padded = padded_bytes_per_row(width, format);
    let size = padded as u64 * height as u64;
    let readback = device
        .create_buffer(
            &BufferDescriptor::new(size, BufferUsage::MAP_READ | BufferUsage::COPY_DST).with_label("texture readback"),
        )?
        .into_buffer();

    let mut encoder = device.create_command_encoder(Some("texture readback"));
    encoder.copy_texture_to_buffer(
        ImageCopyTexture::new(texture).with_origin(Origin3d::new(0, 0, layer)),
        ImageCopyBuffer::new(&readback, ImageDataLayout::new(0, padded)),
        Extent3d::new_2d(width, height),
    )?;
    device.queue().submit([encoder.finish()])?;
    let bytes = device.queue().read_buffer(&readback, 0, size)?;
    readback.destroy();

    let row_bytes = (width * format.block_size()) as usize;
    Ok(bytes
        .chunks_exact(padded as usize)
        .flat_map(|row| &row[..row_bytes])
        .copied()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{BackendType, GraphicsInstance, InstanceParameters, QueueMode};
    use rstest::rstest;

    fn device(queue_mode: QueueMode) -> Arc<GraphicsDevice> {
        let parameters = InstanceParameters::new()
            .with_backend(BackendType::Software)
            .with_queue_mode(queue_mode);
        let instance = GraphicsInstance::with_parameters(parameters).unwrap();
        pollster::block_on(instance.request_default_device()).unwrap()
    }

    fn destination(device: &Arc<GraphicsDevice>, size: u64) -> Buffer {
        device
            .create_buffer_init(
                &BufferDescriptor::new(size, BufferUsage::STORAGE | BufferUsage::COPY_DST),
                &vec![0xAA; size as usize],
            )
            .unwrap()
    }

    #[rstest]
    #[case::threaded(QueueMode::Threaded)]
    #[case::inline(QueueMode::Inline)]
    fn test_update_writes_only_the_range(#[case] queue_mode: QueueMode) {
        let device = device(queue_mode);
        let buffer = destination(&device, 32);
        let (encoder, staging) = update_buffer_data(&device, &buffer, 8, &[1, 2, 3, 4, 5, 6, 7, 8], None).unwrap();
        let index = device.queue().submit([encoder.finish()]).unwrap();
        staging.retire_after(device.queue(), index);
        device.queue().wait_idle();

        let memory = buffer.read();
        assert_eq!(&memory[..8], &[0xAA; 8]);
        assert_eq!(&memory[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&memory[16..], &[0xAA; 16]);
    }

    #[test]
    fn test_update_reuses_encoder() {
        let device = device(QueueMode::Inline);
        let buffer = destination(&device, 16);
        let encoder = device.create_command_encoder(Some("frame"));
        let (encoder, first) = update_buffer_data(&device, &buffer, 0, &[1; 4], Some(encoder)).unwrap();
        let (encoder, second) = update_buffer_data(&device, &buffer, 4, &[2; 4], Some(encoder)).unwrap();
        assert_eq!(encoder.label(), Some("frame"));
        assert_eq!(encoder.command_count(), 2);

        let index = device.queue().submit([encoder.finish()]).unwrap();
        first.retire_after(device.queue(), index);
        second.retire_after(device.queue(), index);
        assert_eq!(&buffer.read()[..8], &[1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_update_validation() {
        let device = device(QueueMode::Inline);
        let buffer = destination(&device, 16);
        let vertex_only = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::VERTEX))
            .unwrap()
            .into_buffer();

        let failures = [
            update_buffer_data(&device, &buffer, 0, &[], None),
            update_buffer_data(&device, &buffer, 0, &[1, 2, 3], None),
            update_buffer_data(&device, &buffer, 2, &[1; 4], None),
            update_buffer_data(&device, &buffer, 16, &[1; 4], None),
            update_buffer_data(&device, &vertex_only, 0, &[1; 4], None),
        ];
        for result in failures {
            assert!(result.unwrap_err().is_validation());
        }
    }

    #[test]
    fn test_staging_destroyed_after_fence() {
        let device = device(QueueMode::Threaded);
        let buffer = destination(&device, 8);
        let (encoder, staging) = update_buffer_data(&device, &buffer, 0, &[3; 8], None).unwrap();
        let handle = staging.buffer().clone();
        let index = device.queue().submit([encoder.finish()]).unwrap();

        pollster::block_on(staging.destroy_after(device.queue().fence(index)));
        assert!(handle.is_destroyed());
        assert_eq!(&buffer.read()[..], &[3; 8]);
        assert!(device.queue().take_errors().is_empty());
    }

    #[rstest]
    #[case::straight(false)]
    #[case::flipped(true)]
    fn test_texture_upload_round_trip(#[case] flip_y: bool) {
        let device = device(QueueMode::Threaded);
        // 3 texels per row: 12 bytes, padded to 256 in the staging buffer
        let bytes: Vec<u8> = (0..24).collect();
        let mut pixels = PixelData::new(3, 2, TextureFormat::Rgba8Unorm, bytes.clone());
        pixels.flip_y = flip_y;
        let (texture, _) = create_texture_from_pixels(&device, &pixels, TextureUsage::COPY_SRC).unwrap();

        let readback = read_texture(&device, &texture, 0).unwrap();
        if flip_y {
            assert_eq!(&readback[..12], &bytes[12..]);
            assert_eq!(&readback[12..], &bytes[..12]);
        } else {
            assert_eq!(readback, bytes);
        }
        assert_eq!(device.queue().timeline().pending_retirements(), 0);
    }

    #[test]
    fn test_texture_upload_size_mismatch() {
        let device = device(QueueMode::Inline);
        let pixels = PixelData::new(2, 2, TextureFormat::Rgba8Unorm, vec![0; 15]);
        let err = create_texture_from_pixels(&device, &pixels, TextureUsage::TEXTURE_BINDING).unwrap_err();
        assert!(err.is_validation());
    }
}
