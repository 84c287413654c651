//! Bind groups: concrete resources bound to the slots of a layout.

use std::sync::Arc;

use super::{Buffer, Sampler, TextureView};
use crate::error::GraphicsError;
use crate::instance::Limits;
use crate::pipeline::{BindGroupLayout, BindingType};
use crate::types::{BufferUsage, TextureUsage};

/// A resource bound to one slot.
#[derive(Debug, Clone)]
pub enum BindingResource {
    /// A byte range of a buffer; `size: None` extends to the end.
    Buffer {
        buffer: Buffer,
        offset: u64,
        size: Option<u64>,
    },
    TextureView(TextureView),
    Sampler(Arc<Sampler>),
}

impl BindingResource {
    /// The whole buffer.
    pub fn buffer(buffer: &Buffer) -> Self {
        Self::Buffer {
            buffer: buffer.clone(),
            offset: 0,
            size: None,
        }
    }

    pub fn buffer_range(buffer: &Buffer, offset: u64, size: u64) -> Self {
        Self::Buffer {
            buffer: buffer.clone(),
            offset,
            size: Some(size),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Buffer { .. } => "buffer",
            Self::TextureView(_) => "texture view",
            Self::Sampler(_) => "sampler",
        }
    }
}

/// One entry of a [`BindGroupDescriptor`].
#[derive(Debug, Clone)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

/// Descriptor for [`GraphicsDevice::create_bind_group`](crate::GraphicsDevice::create_bind_group).
#[derive(Debug, Clone)]
pub struct BindGroupDescriptor {
    pub label: Option<String>,
    pub layout: Arc<BindGroupLayout>,
    pub entries: Vec<BindGroupEntry>,
}

impl BindGroupDescriptor {
    pub fn new(layout: &Arc<BindGroupLayout>) -> Self {
        Self {
            label: None,
            layout: layout.clone(),
            entries: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_entry(mut self, binding: u32, resource: BindingResource) -> Self {
        self.entries.push(BindGroupEntry { binding, resource });
        self
    }

    pub fn with_buffer(self, binding: u32, buffer: &Buffer) -> Self {
        self.with_entry(binding, BindingResource::buffer(buffer))
    }

    pub fn with_texture(self, binding: u32, view: &TextureView) -> Self {
        self.with_entry(binding, BindingResource::TextureView(view.clone()))
    }

    pub fn with_sampler(self, binding: u32, sampler: &Arc<Sampler>) -> Self {
        self.with_entry(binding, BindingResource::Sampler(sampler.clone()))
    }
}

/// A resolved buffer binding: `offset..offset + size` of `buffer`.
#[derive(Debug, Clone)]
pub(crate) struct BufferBinding {
    pub buffer: Buffer,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub(crate) enum BoundEntry {
    Buffer(BufferBinding),
    Texture(TextureView),
    Sampler(Arc<Sampler>),
}

/// A concrete binding of resources to the slots declared by a layout.
#[derive(Debug)]
pub struct BindGroup {
    id: u64,
    label: Option<String>,
    layout: Arc<BindGroupLayout>,
    entries: Vec<(u32, BoundEntry)>,
}

impl BindGroup {
    pub(crate) fn new(id: u64, descriptor: &BindGroupDescriptor, limits: &Limits) -> Result<Self, GraphicsError> {
        let fail = |message: String| {
            Err(GraphicsError::validation(format!(
                "bind group {:?}: {message}",
                descriptor.label
            )))
        };

        let layout = &descriptor.layout;
        let mut entries = Vec::with_capacity(layout.entries().len());
        for slot in layout.entries() {
            let mut matching = descriptor.entries.iter().filter(|entry| entry.binding == slot.binding);
            let Some(entry) = matching.next() else {
                return fail(format!("binding {} of the layout is not bound", slot.binding));
            };
            if matching.next().is_some() {
                return fail(format!("binding {} is bound more than once", slot.binding));
            }

            let bound = match (&entry.resource, slot.binding_type) {
                (BindingResource::Buffer { buffer, offset, size }, binding_type) if binding_type.is_buffer() => {
                    buffer.ensure_live()?;
                    let (usage, alignment, max_size) = match binding_type {
                        BindingType::UniformBuffer => (
                            BufferUsage::UNIFORM,
                            limits.min_uniform_buffer_offset_alignment,
                            limits.max_uniform_buffer_binding_size,
                        ),
                        _ => (
                            BufferUsage::STORAGE,
                            limits.min_storage_buffer_offset_alignment,
                            limits.max_storage_buffer_binding_size,
                        ),
                    };
                    if !buffer.usage().contains(usage) {
                        return fail(format!(
                            "buffer {:?} at binding {} lacks {usage:?} usage",
                            buffer.label(),
                            slot.binding
                        ));
                    }
                    if offset % alignment as u64 != 0 {
                        return fail(format!(
                            "offset {offset} at binding {} is not a multiple of {alignment}",
                            slot.binding
                        ));
                    }
                    let size = size.unwrap_or_else(|| buffer.size().saturating_sub(*offset));
                    if size == 0 || offset.checked_add(size).map_or(true, |end| end > buffer.size()) {
                        return fail(format!(
                            "range {offset}+{size} at binding {} is outside buffer {:?} of {} bytes",
                            slot.binding,
                            buffer.label(),
                            buffer.size()
                        ));
                    }
                    if size > max_size {
                        return fail(format!(
                            "binding {} spans {size} bytes, the device allows {max_size}",
                            slot.binding
                        ));
                    }
                    BoundEntry::Buffer(BufferBinding {
                        buffer: buffer.clone(),
                        offset: *offset,
                        size,
                    })
                }
                (BindingResource::TextureView(view), BindingType::Texture) => {
                    view.texture().ensure_live()?;
                    if !view.texture().usage().contains(TextureUsage::TEXTURE_BINDING) {
                        return fail(format!(
                            "texture {:?} at binding {} lacks TEXTURE_BINDING usage",
                            view.label(),
                            slot.binding
                        ));
                    }
                    BoundEntry::Texture(view.clone())
                }
                (BindingResource::Sampler(sampler), BindingType::Sampler) => BoundEntry::Sampler(sampler.clone()),
                (resource, binding_type) => {
                    return fail(format!(
                        "binding {} expects {binding_type:?} but got a {}",
                        slot.binding,
                        resource.kind()
                    ));
                }
            };
            entries.push((slot.binding, bound));
        }

        if let Some(extra) = descriptor
            .entries
            .iter()
            .find(|entry| layout.entry(entry.binding).is_none())
        {
            return fail(format!("binding {} does not exist in the layout", extra.binding));
        }

        Ok(Self {
            id,
            label: descriptor.label.clone(),
            layout: layout.clone(),
            entries,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn layout(&self) -> &Arc<BindGroupLayout> {
        &self.layout
    }

    pub(crate) fn entries(&self) -> &[(u32, BoundEntry)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;
    use crate::pipeline::{BindGroupLayoutDescriptor, ShaderStageFlags};
    use crate::resources::{AllocatedBuffer, Texture};
    use crate::types::{BufferDescriptor, SamplerDescriptor, TextureDescriptor, TextureFormat};

    fn buffer(size: u64, usage: BufferUsage) -> Buffer {
        AllocatedBuffer::new(1, Weak::new(), BufferDescriptor::new(size, usage)).into_buffer()
    }

    fn uniform_layout() -> Arc<BindGroupLayout> {
        let desc = BindGroupLayoutDescriptor::new().with_uniform_buffer(0, ShaderStageFlags::VERTEX);
        Arc::new(BindGroupLayout::new(1, &desc).unwrap())
    }

    #[test]
    fn test_valid_uniform_group() {
        let layout = uniform_layout();
        let uniforms = buffer(64, BufferUsage::UNIFORM);
        let desc = BindGroupDescriptor::new(&layout).with_buffer(0, &uniforms);
        let group = BindGroup::new(1, &desc, &Limits::default()).unwrap();
        assert_eq!(group.entries().len(), 1);
        assert!(Arc::ptr_eq(group.layout(), &layout));
    }

    #[test]
    fn test_missing_and_extra_entries() {
        let layout = uniform_layout();
        let uniforms = buffer(64, BufferUsage::UNIFORM);
        assert!(BindGroup::new(1, &BindGroupDescriptor::new(&layout), &Limits::default()).is_err());

        let desc = BindGroupDescriptor::new(&layout)
            .with_buffer(0, &uniforms)
            .with_buffer(3, &uniforms);
        assert!(BindGroup::new(1, &desc, &Limits::default()).unwrap_err().is_validation());
    }

    #[test]
    fn test_type_mismatch() {
        let layout = uniform_layout();
        let sampler = Arc::new(Sampler::new(2, SamplerDescriptor::linear()));
        let desc = BindGroupDescriptor::new(&layout).with_sampler(0, &sampler);
        let err = BindGroup::new(1, &desc, &Limits::default()).unwrap_err();
        assert!(err.to_string().contains("expects UniformBuffer"));
    }

    #[test]
    fn test_buffer_usage_and_range() {
        let layout = uniform_layout();
        let vertices = buffer(64, BufferUsage::VERTEX);
        let desc = BindGroupDescriptor::new(&layout).with_buffer(0, &vertices);
        assert!(BindGroup::new(1, &desc, &Limits::default()).is_err());

        let uniforms = buffer(512, BufferUsage::UNIFORM);
        let misaligned = BindGroupDescriptor::new(&layout).with_entry(0, BindingResource::buffer_range(&uniforms, 16, 64));
        assert!(BindGroup::new(1, &misaligned, &Limits::default()).is_err());
        let overflow = BindGroupDescriptor::new(&layout).with_entry(0, BindingResource::buffer_range(&uniforms, 256, 512));
        assert!(BindGroup::new(1, &overflow, &Limits::default()).is_err());
        let aligned = BindGroupDescriptor::new(&layout).with_entry(0, BindingResource::buffer_range(&uniforms, 256, 256));
        assert!(BindGroup::new(1, &aligned, &Limits::default()).is_ok());
    }

    #[test]
    fn test_texture_needs_binding_usage() {
        let desc = BindGroupLayoutDescriptor::new().with_texture(0, ShaderStageFlags::FRAGMENT);
        let layout = Arc::new(BindGroupLayout::new(1, &desc).unwrap());
        let target = Texture::new(
            3,
            Weak::new(),
            TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::RENDER_ATTACHMENT),
        );
        let view = target.create_view(&Default::default()).unwrap();
        let desc = BindGroupDescriptor::new(&layout).with_texture(0, &view);
        assert!(BindGroup::new(1, &desc, &Limits::default()).is_err());
    }
}
