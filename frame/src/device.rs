//! Graphics device.
//!
//! The [`GraphicsDevice`] is the factory for every GPU object and owns the
//! execution [`Queue`]. It is created by [`Adapter::request_device`](crate::Adapter::request_device).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::command::CommandEncoder;
use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, DeviceConstraints, Features, GraphicsInstance, Limits};
use crate::pipeline::{
    BindGroupLayout, BindGroupLayoutDescriptor, PipelineLayout, PipelineLayoutDescriptor, RenderPipeline,
    RenderPipelineDescriptor, SUPPORTED_SAMPLE_COUNTS,
};
use crate::queue::Queue;
use crate::resources::{
    AllocatedBuffer, BindGroup, BindGroupDescriptor, Buffer, BufferShared, Sampler, Texture, TextureShared,
};
use crate::shader::{ShaderModule, ShaderModuleDescriptor};
use crate::types::{
    BufferDescriptor, BufferUsage, SamplerDescriptor, TextureDescriptor, TextureUsage, COPY_BUFFER_ALIGNMENT,
};

/// A graphics device for creating GPU resources.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync` and can be safely shared across threads.
/// All resource creation methods use interior mutability where needed.
///
/// # Example
///
/// ```ignore
/// let device = pollster::block_on(GraphicsInstance::new()?.request_default_device())?;
///
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))?;
/// let texture = device.create_texture(&TextureDescriptor::new_2d(
///     1920, 1080,
///     TextureFormat::Rgba8Unorm,
///     TextureUsage::RENDER_ATTACHMENT,
/// ))?;
/// ```
pub struct GraphicsDevice {
    instance: Arc<GraphicsInstance>,
    label: Option<String>,
    adapter_info: AdapterInfo,
    limits: Limits,
    features: Features,
    queue: Queue,
    next_id: AtomicU64,
    // Weak references for leak tracking and debugging
    buffers: RwLock<Vec<Weak<BufferShared>>>,
    textures: RwLock<Vec<Weak<TextureShared>>>,
}

impl GraphicsDevice {
    pub(crate) fn new(
        instance: Arc<GraphicsInstance>,
        adapter_info: AdapterInfo,
        constraints: &DeviceConstraints,
    ) -> Arc<Self> {
        let parameters = *instance.parameters();
        let queue = Queue::new(instance.backend().clone(), parameters.queue_mode, parameters.validation);
        Arc::new(Self {
            instance,
            label: constraints.label.clone(),
            adapter_info,
            limits: constraints.required_limits,
            features: constraints.required_features,
            queue,
            next_id: AtomicU64::new(1),
            buffers: RwLock::new(Vec::new()),
            textures: RwLock::new(Vec::new()),
        })
    }

    /// Get the parent instance.
    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter_info
    }

    /// The limits granted at creation; every validation uses these.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn features(&self) -> Features {
        self.features
    }

    /// The device's execution queue.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a GPU buffer, mapped if `mapped_at_creation` is set.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Validation`] if the size is zero or exceeds
    /// `max_buffer_size`, the usage is empty, `MAP_READ` is combined with
    /// anything but `COPY_DST`, or a mapped buffer's size is not a multiple
    /// of [`COPY_BUFFER_ALIGNMENT`].
    pub fn create_buffer(self: &Arc<Self>, descriptor: &BufferDescriptor) -> Result<AllocatedBuffer, GraphicsError> {
        let fail = |message: String| Err(GraphicsError::validation(format!("buffer {:?}: {message}", descriptor.label)));
        if descriptor.size == 0 {
            return fail("size cannot be zero".to_string());
        }
        if descriptor.size > self.limits.max_buffer_size {
            return fail(format!(
                "size {} exceeds maximum {}",
                descriptor.size, self.limits.max_buffer_size
            ));
        }
        if descriptor.usage.is_empty() {
            return fail("usage cannot be empty".to_string());
        }
        if descriptor.usage.contains(BufferUsage::MAP_READ)
            && !(BufferUsage::MAP_READ | BufferUsage::COPY_DST).contains(descriptor.usage)
        {
            return fail(format!("MAP_READ may only be combined with COPY_DST, got {:?}", descriptor.usage));
        }
        if descriptor.mapped_at_creation && descriptor.size % COPY_BUFFER_ALIGNMENT != 0 {
            return fail(format!(
                "mapped size {} is not a multiple of {COPY_BUFFER_ALIGNMENT}",
                descriptor.size
            ));
        }

        let buffer = AllocatedBuffer::new(self.next_id(), Arc::downgrade(self), descriptor.clone());
        self.buffers.write().push(buffer.downgrade());

        log::debug!(
            "GraphicsDevice: created buffer {:?}, size={}, usage={:?}",
            descriptor.label,
            descriptor.size,
            descriptor.usage
        );
        Ok(buffer)
    }

    /// Creates a resident buffer initialized with `contents`.
    ///
    /// The size is the larger of `descriptor.size` and `contents.len()`,
    /// rounded up to [`COPY_BUFFER_ALIGNMENT`].
    pub fn create_buffer_init(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
        contents: &[u8],
    ) -> Result<Buffer, GraphicsError> {
        let size = descriptor.size.max(contents.len() as u64).next_multiple_of(COPY_BUFFER_ALIGNMENT);
        let descriptor = BufferDescriptor {
            size,
            mapped_at_creation: true,
            ..descriptor.clone()
        };
        let mut mapped = self.create_buffer(&descriptor)?.into_mapped()?;
        mapped.write(0, contents)?;
        Ok(mapped.commit())
    }

    /// Create a GPU texture.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Validation`] if the extent is zero or exceeds
    /// the device limits, the sample count is unsupported, or a multisampled
    /// texture is not a single-layer render attachment.
    pub fn create_texture(self: &Arc<Self>, descriptor: &TextureDescriptor) -> Result<Texture, GraphicsError> {
        let fail = |message: String| Err(GraphicsError::validation(format!("texture {:?}: {message}", descriptor.label)));
        let size = descriptor.size;
        if size.width == 0 || size.height == 0 || size.depth == 0 {
            return fail("texture dimensions cannot be zero".to_string());
        }
        let max_dim = self.limits.max_texture_dimension_2d;
        if size.width > max_dim || size.height > max_dim {
            return fail(format!("texture dimension exceeds maximum {max_dim}"));
        }
        if size.depth > self.limits.max_texture_array_layers {
            return fail(format!(
                "{} layers exceed maximum {}",
                size.depth, self.limits.max_texture_array_layers
            ));
        }
        if descriptor.usage.is_empty() {
            return fail("usage cannot be empty".to_string());
        }
        if !SUPPORTED_SAMPLE_COUNTS.contains(&descriptor.sample_count) {
            return fail(format!("sample count {} is not supported", descriptor.sample_count));
        }
        if descriptor.sample_count > 1 {
            let allowed = TextureUsage::RENDER_ATTACHMENT;
            if !allowed.contains(descriptor.usage) || size.depth != 1 {
                return fail(format!(
                    "multisampled textures must be single-layer render attachments, got {:?} with {} layers",
                    descriptor.usage, size.depth
                ));
            }
        }

        let texture = Texture::new(self.next_id(), Arc::downgrade(self), descriptor.clone());
        self.textures.write().push(texture.downgrade());

        log::debug!(
            "GraphicsDevice: created texture {:?}, size={}x{}x{}, format={:?}, samples={}",
            descriptor.label,
            size.width,
            size.height,
            size.depth,
            descriptor.format,
            descriptor.sample_count
        );
        Ok(texture)
    }

    /// Create a texture sampler.
    pub fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<Arc<Sampler>, GraphicsError> {
        log::debug!("GraphicsDevice: created sampler {:?}", descriptor.label);
        Ok(Arc::new(Sampler::new(self.next_id(), descriptor.clone())))
    }

    pub fn create_bind_group_layout(
        &self,
        descriptor: &BindGroupLayoutDescriptor,
    ) -> Result<Arc<BindGroupLayout>, GraphicsError> {
        let layout = BindGroupLayout::new(self.next_id(), descriptor)?;
        log::debug!(
            "GraphicsDevice: created bind group layout {:?} with {} entries",
            descriptor.label,
            layout.entries().len()
        );
        Ok(Arc::new(layout))
    }

    pub fn create_pipeline_layout(
        &self,
        descriptor: &PipelineLayoutDescriptor,
    ) -> Result<Arc<PipelineLayout>, GraphicsError> {
        let layout = PipelineLayout::new(descriptor, self.limits.max_bind_groups)?;
        log::debug!("GraphicsDevice: created pipeline layout {:?}", descriptor.label);
        Ok(Arc::new(layout))
    }

    /// Binds concrete resources to the slots of a layout.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Validation`] if the entries do not match the
    /// layout, see [`BindGroupDescriptor`].
    pub fn create_bind_group(&self, descriptor: &BindGroupDescriptor) -> Result<Arc<BindGroup>, GraphicsError> {
        let group = BindGroup::new(self.next_id(), descriptor, &self.limits)?;
        log::debug!("GraphicsDevice: created bind group {:?}", descriptor.label);
        Ok(Arc::new(group))
    }

    pub fn create_shader_module(&self, descriptor: ShaderModuleDescriptor) -> Result<Arc<ShaderModule>, GraphicsError> {
        let label = descriptor.label.clone();
        let module = ShaderModule::new(self.next_id(), descriptor)?;
        log::debug!(
            "GraphicsDevice: created {:?} shader module {label:?} (entry point '{}')",
            module.stage(),
            module.entry_point()
        );
        Ok(Arc::new(module))
    }

    /// Builds an immutable pipeline state object.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Validation`] for any inconsistency between
    /// stages, vertex layouts, fixed-function state and the pipeline layout.
    pub fn create_render_pipeline(
        &self,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<Arc<RenderPipeline>, GraphicsError> {
        let pipeline = RenderPipeline::build(self.next_id(), descriptor, &self.limits, self.features)?;
        log::debug!(
            "GraphicsDevice: created render pipeline {:?} (samples={}, targets={})",
            descriptor.label,
            pipeline.sample_count(),
            pipeline.color_targets().len()
        );
        Ok(Arc::new(pipeline))
    }

    pub fn create_command_encoder(&self, label: Option<&str>) -> CommandEncoder {
        CommandEncoder::new(label.map(str::to_string), self.limits.max_color_attachments)
    }

    /// Get the number of live buffers created by this device.
    pub fn buffer_count(&self) -> usize {
        self.buffers
            .read()
            .iter()
            .filter(|w| w.upgrade().is_some_and(|b| b.is_live()))
            .count()
    }

    /// Get the number of live textures created by this device.
    pub fn texture_count(&self) -> usize {
        self.textures
            .read()
            .iter()
            .filter(|w| w.upgrade().is_some_and(|t| t.is_live()))
            .count()
    }

    /// Clean up tracking entries of dropped or destroyed resources.
    pub fn cleanup_dead_resources(&self) {
        self.buffers
            .write()
            .retain(|w| w.upgrade().is_some_and(|b| b.is_live()));
        self.textures
            .write()
            .retain(|w| w.upgrade().is_some_and(|t| t.is_live()));
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("label", &self.label)
            .field("adapter", &self.adapter_info.name)
            .field("limits", &self.limits)
            .field("features", &self.features)
            .finish()
    }
}

// Ensure GraphicsDevice is Send + Sync
static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);
