//! Buffer types and descriptors.

use bitflags::bitflags;

/// Buffer copy offsets and sizes must be multiples of this value.
pub const COPY_BUFFER_ALIGNMENT: u64 = 4;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be used as a storage buffer.
        const STORAGE = 1 << 3;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 5;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 6;
        /// Buffer can be read back on the host.
        const MAP_READ = 1 << 7;
        /// Buffer can be written from the host while mapped.
        const MAP_WRITE = 1 << 8;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Create the buffer in the mapped state with a writable region.
    pub mapped_at_creation: bool,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            mapped_at_creation: false,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Request the buffer in the mapped state.
    pub fn mapped(mut self) -> Self {
        self.mapped_at_creation = true;
        self
    }
}

/// Element type of an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    Uint16,
    #[default]
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(self) -> u64 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }

    pub(crate) fn read(self, bytes: &[u8], index: usize) -> Option<u32> {
        match self {
            Self::Uint16 => {
                let at = index * 2;
                let raw = bytes.get(at..at + 2)?;
                Some(u16::from_le_bytes([raw[0], raw[1]]) as u32)
            }
            Self::Uint32 => {
                let at = index * 4;
                let raw = bytes.get(at..at + 4)?;
                Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
        }
    }
}
