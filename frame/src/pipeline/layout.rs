//! Bind group layouts and pipeline layouts.
//!
//! A layout describes which resources a pipeline expects at draw time. Layouts
//! are shared via `Arc`; pointer equality is the fast path of the
//! compatibility check performed when a bind group is set for a draw.

use std::sync::Arc;

use crate::error::GraphicsError;
use crate::shader::ShaderStage;

/// Type of resource that can be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// Uniform buffer (read-only, small, frequently updated).
    UniformBuffer,
    /// Storage buffer (larger data, e.g. per-instance arrays).
    StorageBuffer { read_only: bool },
    /// Sampled texture.
    Texture,
    /// Texture sampler.
    Sampler,
}

impl BindingType {
    pub(crate) fn is_buffer(self) -> bool {
        matches!(self, Self::UniformBuffer | Self::StorageBuffer { .. })
    }
}

bitflags::bitflags! {
    /// Shader stages that can access a binding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        /// Vertex shader stage.
        const VERTEX = 1 << 0;
        /// Fragment shader stage.
        const FRAGMENT = 1 << 1;
        /// Compute shader stage.
        const COMPUTE = 1 << 2;
    }
}

impl From<ShaderStage> for ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::VERTEX,
            ShaderStage::Fragment => Self::FRAGMENT,
            ShaderStage::Compute => Self::COMPUTE,
        }
    }
}

/// Describes a single binding slot in a layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingLayoutEntry {
    /// Binding index within the group.
    pub binding: u32,
    /// Type of resource expected at this binding.
    pub binding_type: BindingType,
    /// Shader stages that can access this binding.
    pub visibility: ShaderStageFlags,
}

impl BindingLayoutEntry {
    /// Create a new binding layout entry visible to vertex and fragment stages.
    pub fn new(binding: u32, binding_type: BindingType) -> Self {
        Self {
            binding,
            binding_type,
            visibility: ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT,
        }
    }

    /// Set the shader stage visibility.
    pub fn with_visibility(mut self, visibility: ShaderStageFlags) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Descriptor for [`GraphicsDevice::create_bind_group_layout`](crate::GraphicsDevice::create_bind_group_layout).
#[derive(Debug, Clone, Default)]
pub struct BindGroupLayoutDescriptor {
    pub label: Option<String>,
    pub entries: Vec<BindingLayoutEntry>,
}

impl BindGroupLayoutDescriptor {
    /// Create a new empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding entry to the layout.
    pub fn with_entry(mut self, entry: BindingLayoutEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Add a uniform buffer binding.
    pub fn with_uniform_buffer(self, binding: u32, visibility: ShaderStageFlags) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::UniformBuffer).with_visibility(visibility))
    }

    /// Add a read-only storage buffer binding.
    pub fn with_storage_buffer(self, binding: u32, visibility: ShaderStageFlags) -> Self {
        self.with_entry(
            BindingLayoutEntry::new(binding, BindingType::StorageBuffer { read_only: true })
                .with_visibility(visibility),
        )
    }

    /// Add a texture binding.
    pub fn with_texture(self, binding: u32, visibility: ShaderStageFlags) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::Texture).with_visibility(visibility))
    }

    /// Add a sampler binding.
    pub fn with_sampler(self, binding: u32, visibility: ShaderStageFlags) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::Sampler).with_visibility(visibility))
    }

    /// Set a debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// The layout of one bind group slot.
#[derive(Debug)]
pub struct BindGroupLayout {
    id: u64,
    label: Option<String>,
    entries: Vec<BindingLayoutEntry>,
}

impl BindGroupLayout {
    pub(crate) fn new(id: u64, descriptor: &BindGroupLayoutDescriptor) -> Result<Self, GraphicsError> {
        let mut entries = descriptor.entries.clone();
        entries.sort_by_key(|entry| entry.binding);
        for pair in entries.windows(2) {
            if pair[0].binding == pair[1].binding {
                return Err(GraphicsError::validation(format!(
                    "bind group layout {:?} declares binding {} twice",
                    descriptor.label, pair[0].binding
                )));
            }
        }
        if let Some(entry) = entries.iter().find(|entry| entry.visibility.is_empty()) {
            return Err(GraphicsError::validation(format!(
                "binding {} of layout {:?} is visible to no shader stage",
                entry.binding, descriptor.label
            )));
        }
        Ok(Self {
            id,
            label: descriptor.label.clone(),
            entries,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Entries sorted by binding index.
    pub fn entries(&self) -> &[BindingLayoutEntry] {
        &self.entries
    }

    /// Finds the entry for a binding index.
    pub fn entry(&self, binding: u32) -> Option<&BindingLayoutEntry> {
        self.entries
            .binary_search_by_key(&binding, |entry| entry.binding)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Two layouts are compatible when they are the same object or declare
    /// identical entries.
    pub fn is_compatible(self: &Arc<Self>, other: &Arc<Self>) -> bool {
        Arc::ptr_eq(self, other) || self.entries == other.entries
    }
}

/// Descriptor for [`GraphicsDevice::create_pipeline_layout`](crate::GraphicsDevice::create_pipeline_layout).
#[derive(Debug, Clone, Default)]
pub struct PipelineLayoutDescriptor {
    pub label: Option<String>,
    pub bind_group_layouts: Vec<Arc<BindGroupLayout>>,
}

impl PipelineLayoutDescriptor {
    pub fn new(bind_group_layouts: Vec<Arc<BindGroupLayout>>) -> Self {
        Self {
            label: None,
            bind_group_layouts,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Ordered list of bind group layouts a pipeline expects at draw time.
#[derive(Debug)]
pub struct PipelineLayout {
    label: Option<String>,
    bind_group_layouts: Vec<Arc<BindGroupLayout>>,
}

impl PipelineLayout {
    pub(crate) fn new(descriptor: &PipelineLayoutDescriptor, max_bind_groups: u32) -> Result<Self, GraphicsError> {
        if descriptor.bind_group_layouts.len() > max_bind_groups as usize {
            return Err(GraphicsError::validation(format!(
                "pipeline layout {:?} uses {} bind groups, the device allows {max_bind_groups}",
                descriptor.label,
                descriptor.bind_group_layouts.len()
            )));
        }
        Ok(Self {
            label: descriptor.label.clone(),
            bind_group_layouts: descriptor.bind_group_layouts.clone(),
        })
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn bind_group_layouts(&self) -> &[Arc<BindGroupLayout>] {
        &self.bind_group_layouts
    }
}
