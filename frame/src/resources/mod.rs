//! GPU resources.
//!
//! This module contains the GPU resource types that are created by [`GraphicsDevice`]:
//! - [`Buffer`] / [`MappedBuffer`] - GPU memory buffer in its resident and mapped states
//! - [`Texture`] / [`TextureView`] - GPU texture and layer-range accessors
//! - [`Sampler`] - Texture sampler
//! - [`BindGroup`] - Resources bound to the slots of a layout
//!
//! Resources are reference-counted and can be shared across threads. Each
//! resource holds a weak reference back to its parent device.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice

mod bind_group;
mod buffer;
mod sampler;
mod texture;

pub use bind_group::{BindGroup, BindGroupDescriptor, BindGroupEntry, BindingResource};
pub(crate) use bind_group::BoundEntry;
pub use buffer::{AllocatedBuffer, Buffer, MappedBuffer};
pub(crate) use buffer::BufferShared;
pub use sampler::Sampler;
pub use texture::{TexelStorage, Texture, TextureView};
pub(crate) use texture::TextureShared;
