//! GPU buffer resource and its mapped/resident lifecycle.
//!
//! A buffer created with `mapped_at_creation` starts as a [`MappedBuffer`]
//! exposing a CPU-writable region. [`MappedBuffer::commit`] consumes it and
//! yields the resident [`Buffer`]; the region cannot be touched afterwards:
//!
//! ```compile_fail
//! # use redlilium_frame::{BufferDescriptor, BufferUsage, GraphicsInstance};
//! # let device = pollster::block_on(GraphicsInstance::new().unwrap().request_default_device()).unwrap();
//! let mut mapped = device
//!     .create_buffer(&BufferDescriptor::new(16, BufferUsage::VERTEX).mapped())
//!     .unwrap()
//!     .into_mapped()
//!     .unwrap();
//! let buffer = mapped.commit();
//! mapped.mapped_range_mut()[0] = 1; // use of moved value
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytemuck::Pod;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferUsage};

pub(crate) struct BufferShared {
    id: u64,
    device: Weak<GraphicsDevice>,
    descriptor: BufferDescriptor,
    memory: RwLock<Vec<u8>>,
    destroyed: AtomicBool,
}

impl BufferShared {
    pub(crate) fn is_live(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
    }
}

/// A resident GPU buffer.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`] and are
/// reference-counted; clones refer to the same memory. They hold a weak
/// reference back to their parent device.
///
/// # Example
///
/// ```ignore
/// let buffer = device
///     .create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX | BufferUsage::COPY_DST))?
///     .into_buffer();
/// println!("Buffer size: {}", buffer.size());
/// ```
#[derive(Clone)]
pub struct Buffer {
    shared: Arc<BufferShared>,
}

impl Buffer {
    fn from_shared(shared: Arc<BufferShared>) -> Self {
        Self { shared }
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.shared.device.upgrade()
    }

    /// Device-unique identifier.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.shared.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.shared.descriptor.size
    }

    /// Get the usage flags.
    pub fn usage(&self) -> BufferUsage {
        self.shared.descriptor.usage
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.shared.descriptor.label.as_deref()
    }

    /// Releases the buffer memory.
    ///
    /// Must only be called once no submitted command buffer still uses the
    /// buffer; work executed after this point that touches it fails with a
    /// usage-sequence error. See [`Queue::destroy_after`](crate::Queue::destroy_after)
    /// for deferred destruction.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("Destroying buffer {:?} ({} bytes)", self.label(), self.size());
        *self.shared.memory.write() = Vec::new();
    }

    pub fn is_destroyed(&self) -> bool {
        !self.shared.is_live()
    }

    /// Returns true if both handles refer to the same buffer.
    pub fn same_as(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.shared.memory.read_recursive()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.shared.memory.write()
    }

    pub(crate) fn downgrade(&self) -> Weak<BufferShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), GraphicsError> {
        if self.is_destroyed() {
            return Err(GraphicsError::usage(format!(
                "buffer {:?} used after destroy",
                self.label()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.shared.id)
            .field("size", &self.shared.descriptor.size)
            .field("usage", &self.shared.descriptor.usage)
            .field("label", &self.shared.descriptor.label)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// A buffer in the mapped state, exposing its CPU-writable region.
pub struct MappedBuffer {
    shared: Arc<BufferShared>,
    region: Vec<u8>,
}

impl MappedBuffer {
    pub fn size(&self) -> u64 {
        self.shared.descriptor.size
    }

    pub fn label(&self) -> Option<&str> {
        self.shared.descriptor.label.as_deref()
    }

    pub fn mapped_range(&self) -> &[u8] {
        &self.region
    }

    pub fn mapped_range_mut(&mut self) -> &mut [u8] {
        &mut self.region
    }

    /// Copies `bytes` into the region at `offset`.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), GraphicsError> {
        let end = offset
            .checked_add(bytes.len() as u64)
            .filter(|end| *end <= self.size())
            .ok_or_else(|| {
                GraphicsError::validation(format!(
                    "write of {} bytes at offset {offset} overflows mapped buffer {:?} of {} bytes",
                    bytes.len(),
                    self.label(),
                    self.size()
                ))
            })?;
        self.region[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies a slice of plain-old-data values into the region at `offset`.
    pub fn write_pod<T: Pod>(&mut self, offset: u64, data: &[T]) -> Result<(), GraphicsError> {
        self.write(offset, bytemuck::cast_slice(data))
    }

    /// Unmaps the buffer, making its contents visible to the GPU.
    pub fn commit(self) -> Buffer {
        *self.shared.memory.write() = self.region;
        Buffer::from_shared(self.shared)
    }
}

impl std::fmt::Debug for MappedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedBuffer")
            .field("id", &self.shared.id)
            .field("size", &self.shared.descriptor.size)
            .field("label", &self.shared.descriptor.label)
            .finish()
    }
}

/// A freshly created buffer: mapped when requested with
/// `mapped_at_creation`, resident otherwise.
#[derive(Debug)]
pub enum AllocatedBuffer {
    Mapped(MappedBuffer),
    Resident(Buffer),
}

impl AllocatedBuffer {
    pub(crate) fn new(id: u64, device: Weak<GraphicsDevice>, descriptor: BufferDescriptor) -> Self {
        let size = descriptor.size as usize;
        let mapped = descriptor.mapped_at_creation;
        let shared = Arc::new(BufferShared {
            id,
            device,
            descriptor,
            memory: RwLock::new(if mapped { Vec::new() } else { vec![0; size] }),
            destroyed: AtomicBool::new(false),
        });
        if mapped {
            Self::Mapped(MappedBuffer {
                shared,
                region: vec![0; size],
            })
        } else {
            Self::Resident(Buffer::from_shared(shared))
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Self::Mapped(_))
    }

    /// The mapped buffer, or a usage error when it was created resident.
    pub fn into_mapped(self) -> Result<MappedBuffer, GraphicsError> {
        match self {
            Self::Mapped(mapped) => Ok(mapped),
            Self::Resident(buffer) => Err(GraphicsError::usage(format!(
                "buffer {:?} was not created mapped",
                buffer.label()
            ))),
        }
    }

    /// The resident buffer, committing a mapped one as is.
    pub fn into_buffer(self) -> Buffer {
        match self {
            Self::Mapped(mapped) => mapped.commit(),
            Self::Resident(buffer) => buffer,
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<BufferShared> {
        match self {
            Self::Mapped(mapped) => Arc::downgrade(&mapped.shared),
            Self::Resident(buffer) => buffer.downgrade(),
        }
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);
static_assertions::assert_impl_all!(MappedBuffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped(size: u64) -> MappedBuffer {
        let desc = BufferDescriptor::new(size, BufferUsage::VERTEX).mapped();
        AllocatedBuffer::new(1, Weak::new(), desc).into_mapped().unwrap()
    }

    #[test]
    fn test_buffer_debug() {
        let desc = BufferDescriptor::new(1024, BufferUsage::VERTEX);
        let buffer = AllocatedBuffer::new(1, Weak::new(), desc).into_buffer();
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
    }

    #[test]
    fn test_commit_publishes_region() {
        let mut buffer = mapped(8);
        buffer.write(2, &[1, 2, 3]).unwrap();
        buffer.mapped_range_mut()[7] = 9;
        let resident = buffer.commit();
        assert_eq!(*resident.read(), vec![0, 0, 1, 2, 3, 0, 0, 9]);
    }

    #[test]
    fn test_write_out_of_bounds() {
        let mut buffer = mapped(4);
        assert!(buffer.write(2, &[0; 3]).unwrap_err().is_validation());
        assert!(buffer.write(u64::MAX, &[0]).is_err());
        assert!(buffer.write_pod(0, &[1.0f32]).is_ok());
    }

    #[test]
    fn test_resident_is_not_mapped() {
        let desc = BufferDescriptor::new(4, BufferUsage::UNIFORM);
        let allocated = AllocatedBuffer::new(1, Weak::new(), desc);
        assert!(!allocated.is_mapped());
        assert!(allocated.into_mapped().unwrap_err().is_usage_sequence());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let buffer = mapped(4).commit();
        let alias = buffer.clone();
        buffer.destroy();
        buffer.destroy();
        assert!(alias.is_destroyed());
        assert!(alias.ensure_live().is_err());
        assert!(alias.read().is_empty());
    }
}
