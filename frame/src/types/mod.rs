//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage flags, and descriptor structs
//! used throughout the frame execution core.

mod buffer;
mod common;
mod sampler;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage, IndexFormat, COPY_BUFFER_ALIGNMENT};
pub use common::{Color, CompareFunction, Extent3d, Origin3d, ScissorRect, Viewport};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
pub use texture::{
    padded_bytes_per_row, TextureDescriptor, TextureFormat, TextureUsage, TextureViewDescriptor,
    COPY_BYTES_PER_ROW_ALIGNMENT,
};
