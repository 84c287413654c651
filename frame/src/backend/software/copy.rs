//! Buffer and texel copies.
//!
//! Every function takes the locks of the resources it touches, then checks
//! that none was destroyed before reading or writing a byte.

use crate::command::{texel_copy_span, ImageCopyBuffer, ImageCopyTexture};
use crate::error::GraphicsError;
use crate::resources::{Buffer, Texture};
use crate::types::Extent3d;

fn range(offset: u64, size: u64, len: usize) -> Result<std::ops::Range<usize>, GraphicsError> {
    let start = offset as usize;
    let end = start.checked_add(size as usize).filter(|end| *end <= len);
    end.map(|end| start..end).ok_or_else(|| {
        GraphicsError::validation(format!("range {offset}+{size} is outside a buffer of {len} bytes"))
    })
}

pub(super) fn copy_buffer_to_buffer(
    source: &Buffer,
    source_offset: u64,
    destination: &Buffer,
    destination_offset: u64,
    size: u64,
) -> Result<(), GraphicsError> {
    let src = source.read();
    let mut dst = destination.write();
    source.ensure_live()?;
    destination.ensure_live()?;
    let from = range(source_offset, size, src.len())?;
    let to = range(destination_offset, size, dst.len())?;
    dst[to].copy_from_slice(&src[from]);
    Ok(())
}

pub(super) fn clear_buffer(buffer: &Buffer, offset: u64, size: u64) -> Result<(), GraphicsError> {
    let mut memory = buffer.write();
    buffer.ensure_live()?;
    let span = range(offset, size, memory.len())?;
    memory[span].fill(0);
    Ok(())
}

pub(super) fn write_buffer(buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
    let mut memory = buffer.write();
    buffer.ensure_live()?;
    let span = range(offset, data.len() as u64, memory.len())?;
    memory[span].copy_from_slice(data);
    Ok(())
}

/// Byte offset of texel `(x, y, z)` of the copy region inside the buffer.
fn texel_offset(buffer: &ImageCopyBuffer, size: Extent3d, x: u32, y: u32, z: u32, block: u32) -> usize {
    let layout = &buffer.layout;
    let rows_per_image = layout.rows_per_image.unwrap_or(size.height) as u64;
    let row = layout.bytes_per_row as u64;
    (layout.offset + (z as u64 * rows_per_image + y as u64) * row + x as u64 * block as u64) as usize
}

fn check_span(buffer: &ImageCopyBuffer, size: Extent3d, block: u32, len: usize) -> Result<(), GraphicsError> {
    range(buffer.layout.offset, texel_copy_span(&buffer.layout, size, block), len).map(|_| ())
}

pub(super) fn copy_buffer_to_texture(
    source: &ImageCopyBuffer,
    destination: &ImageCopyTexture,
    size: Extent3d,
) -> Result<(), GraphicsError> {
    let bytes = source.buffer.read();
    let mut storage = destination.texture.storage_mut();
    source.buffer.ensure_live()?;
    destination.texture.ensure_live()?;

    let format = storage.format();
    let block = format.block_size();
    check_span(source, size, block, bytes.len())?;
    let origin = destination.origin;
    for z in 0..size.depth {
        for y in 0..size.height {
            for x in 0..size.width {
                let at = texel_offset(source, size, x, y, z, block);
                let texel = format.decode_texel(&bytes[at..at + block as usize]);
                storage.set(origin.x + x, origin.y + y, origin.z + z, 0, texel);
            }
        }
    }
    Ok(())
}

pub(super) fn copy_texture_to_buffer(
    source: &ImageCopyTexture,
    destination: &ImageCopyBuffer,
    size: Extent3d,
) -> Result<(), GraphicsError> {
    let storage = source.texture.storage();
    let mut bytes = destination.buffer.write();
    source.texture.ensure_live()?;
    destination.buffer.ensure_live()?;

    let format = storage.format();
    let block = format.block_size();
    check_span(destination, size, block, bytes.len())?;
    let origin = source.origin;
    for z in 0..size.depth {
        for y in 0..size.height {
            for x in 0..size.width {
                let at = texel_offset(destination, size, x, y, z, block);
                let texel = storage.get(origin.x + x, origin.y + y, origin.z + z, 0);
                format.encode_texel(texel, &mut bytes[at..at + block as usize]);
            }
        }
    }
    Ok(())
}

/// Layer 0, sample 0 of `texture` as tightly packed RGBA8 rows, sRGB encoded
/// when the texture format is.
pub(super) fn texture_to_rgba8(texture: &Texture) -> Result<(u32, u32, Vec<u8>), GraphicsError> {
    let storage = texture.storage();
    texture.ensure_live()?;
    let encoding = if storage.format().is_srgb() {
        crate::types::TextureFormat::Rgba8UnormSrgb
    } else {
        crate::types::TextureFormat::Rgba8Unorm
    };
    let (width, height) = (storage.width(), storage.height());
    let mut pixels = vec![0u8; width as usize * height as usize * 4];
    for (i, pixel) in pixels.chunks_exact_mut(4).enumerate() {
        let (x, y) = (i as u32 % width, i as u32 / width);
        encoding.encode_texel(storage.get(x, y, 0, 0), pixel);
    }
    Ok((width, height, pixels))
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;
    use crate::command::ImageDataLayout;
    use crate::resources::AllocatedBuffer;
    use crate::types::{BufferDescriptor, BufferUsage, Origin3d, TextureDescriptor, TextureFormat, TextureUsage};

    fn buffer(size: u64) -> Buffer {
        AllocatedBuffer::new(1, Weak::new(), BufferDescriptor::new(size, BufferUsage::COPY_SRC | BufferUsage::COPY_DST))
            .into_buffer()
    }

    fn texture(width: u32, height: u32, format: TextureFormat) -> Texture {
        Texture::new(
            2,
            Weak::new(),
            TextureDescriptor::new_2d(width, height, format, TextureUsage::COPY_SRC | TextureUsage::COPY_DST),
        )
    }

    #[test]
    fn test_buffer_copy_and_clear() {
        let a = buffer(16);
        let b = buffer(16);
        write_buffer(&a, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        copy_buffer_to_buffer(&a, 4, &b, 8, 4).unwrap();
        assert_eq!(&b.read()[8..12], &[5, 6, 7, 8]);

        clear_buffer(&a, 0, 4).unwrap();
        assert_eq!(&a.read()[..8], &[0, 0, 0, 0, 5, 6, 7, 8]);
    }

    #[test]
    fn test_destroyed_destination_untouched() {
        let a = buffer(8);
        let b = buffer(8);
        write_buffer(&a, 0, &[9; 8]).unwrap();
        b.destroy();
        let err = copy_buffer_to_buffer(&a, 0, &b, 0, 8).unwrap_err();
        assert!(err.is_usage_sequence());
        assert!(b.read().is_empty());
    }

    #[test]
    fn test_texel_copy_with_row_padding() {
        let tex = texture(2, 2, TextureFormat::Rgba8Unorm);
        let staging = buffer(512);
        {
            let mut bytes = staging.write();
            bytes[0..8].copy_from_slice(&[255, 0, 0, 255, 0, 255, 0, 255]);
            bytes[256..264].copy_from_slice(&[0, 0, 255, 255, 255, 255, 255, 255]);
        }
        let layout = ImageDataLayout::new(0, 256);
        copy_buffer_to_texture(
            &ImageCopyBuffer::new(&staging, layout),
            &ImageCopyTexture::new(&tex),
            Extent3d::new_2d(2, 2),
        )
        .unwrap();
        assert_eq!(tex.storage().get(0, 1, 0, 0), [0.0, 0.0, 1.0, 1.0]);

        let readback = buffer(512);
        copy_texture_to_buffer(
            &ImageCopyTexture::new(&tex).with_origin(Origin3d::new(1, 0, 0)),
            &ImageCopyBuffer::new(&readback, layout),
            Extent3d::new_2d(1, 2),
        )
        .unwrap();
        assert_eq!(&readback.read()[0..4], &[0, 255, 0, 255]);
        assert_eq!(&readback.read()[256..260], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_rgba8_conversion_of_bgra() {
        let tex = texture(1, 1, TextureFormat::Bgra8Unorm);
        tex.storage_mut().set(0, 0, 0, 0, [1.0, 0.0, 0.0, 1.0]);
        let (width, height, pixels) = texture_to_rgba8(&tex).unwrap();
        assert_eq!((width, height), (1, 1));
        assert_eq!(pixels, vec![255, 0, 0, 255]);
    }
}
