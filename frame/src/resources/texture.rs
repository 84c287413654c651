//! GPU texture resource, its views and texel storage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{
    Extent3d, FilterMode, SamplerDescriptor, TextureDescriptor, TextureFormat, TextureUsage, TextureViewDescriptor,
};

/// Texel memory of a texture.
///
/// Every sample is stored as four `f32` components already rounded to the
/// precision of the format. Depth formats keep depth in component 0 and
/// stencil in component 1.
pub struct TexelStorage {
    format: TextureFormat,
    size: Extent3d,
    samples: u32,
    texels: Vec<[f32; 4]>,
}

impl TexelStorage {
    pub(crate) fn new(descriptor: &TextureDescriptor) -> Self {
        let count = descriptor.size.texel_count() * descriptor.sample_count as usize;
        let initial = if descriptor.format.is_depth_stencil() {
            [0.0; 4]
        } else {
            descriptor.format.quantize([0.0, 0.0, 0.0, 0.0])
        };
        Self {
            format: descriptor.format,
            size: descriptor.size,
            samples: descriptor.sample_count,
            texels: vec![initial; count],
        }
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn sample_count(&self) -> u32 {
        self.samples
    }

    fn index(&self, x: u32, y: u32, layer: u32, sample: u32) -> usize {
        let row = (layer as usize * self.size.height as usize + y as usize) * self.size.width as usize;
        (row + x as usize) * self.samples as usize + sample as usize
    }

    pub(crate) fn get(&self, x: u32, y: u32, layer: u32, sample: u32) -> [f32; 4] {
        self.texels[self.index(x, y, layer, sample)]
    }

    /// Stores a texel, rounding it to the format's precision.
    pub(crate) fn set(&mut self, x: u32, y: u32, layer: u32, sample: u32, value: [f32; 4]) {
        let index = self.index(x, y, layer, sample);
        self.texels[index] = self.format.quantize(value);
    }

    /// Fills every sample of one layer.
    pub(crate) fn fill_layer(&mut self, layer: u32, value: [f32; 4]) {
        let value = self.format.quantize(value);
        let per_layer = self.size.width as usize * self.size.height as usize * self.samples as usize;
        let start = layer as usize * per_layer;
        self.texels[start..start + per_layer].fill(value);
    }

    /// Reads one texel of sample 0, `None` out of bounds.
    pub fn load(&self, x: u32, y: u32, layer: u32) -> Option<[f32; 4]> {
        if x >= self.size.width || y >= self.size.height || layer >= self.size.depth {
            return None;
        }
        Some(self.get(x, y, layer, 0))
    }

    /// Filters layer `layer` at normalized coordinates `uv`.
    pub fn sample(&self, layer: u32, sampler: &SamplerDescriptor, uv: [f32; 2]) -> [f32; 4] {
        let (width, height) = (self.size.width, self.size.height);
        let fetch = |x: i64, y: i64| {
            let x = sampler.address_mode_u.resolve(x, width);
            let y = sampler.address_mode_v.resolve(y, height);
            self.get(x, y, layer, 0)
        };
        let u = uv[0] * width as f32;
        let v = uv[1] * height as f32;
        match sampler.mag_filter {
            FilterMode::Nearest => fetch(u.floor() as i64, v.floor() as i64),
            FilterMode::Linear => {
                let (u, v) = (u - 0.5, v - 0.5);
                let (x0, y0) = (u.floor() as i64, v.floor() as i64);
                let (fx, fy) = (u - u.floor(), v - v.floor());
                let lerp = |a: [f32; 4], b: [f32; 4], t: f32| std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t);
                let top = lerp(fetch(x0, y0), fetch(x0 + 1, y0), fx);
                let bottom = lerp(fetch(x0, y0 + 1), fetch(x0 + 1, y0 + 1), fx);
                lerp(top, bottom, fy)
            }
        }
    }
}

pub(crate) struct TextureShared {
    id: u64,
    device: Weak<GraphicsDevice>,
    descriptor: TextureDescriptor,
    storage: RwLock<TexelStorage>,
    destroyed: AtomicBool,
}

impl TextureShared {
    pub(crate) fn is_live(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
    }
}

/// A GPU texture resource.
///
/// Textures are created by [`GraphicsDevice::create_texture`] and are
/// reference-counted; clones refer to the same texels.
///
/// # Example
///
/// ```ignore
/// let texture = device.create_texture(&TextureDescriptor::new_2d(
///     1920, 1080,
///     TextureFormat::Rgba8Unorm,
///     TextureUsage::RENDER_ATTACHMENT,
/// ))?;
/// let view = texture.create_view(&TextureViewDescriptor::default())?;
/// ```
#[derive(Clone)]
pub struct Texture {
    shared: Arc<TextureShared>,
}

impl Texture {
    pub(crate) fn new(id: u64, device: Weak<GraphicsDevice>, descriptor: TextureDescriptor) -> Self {
        let storage = TexelStorage::new(&descriptor);
        Self {
            shared: Arc::new(TextureShared {
                id,
                device,
                descriptor,
                storage: RwLock::new(storage),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.shared.device.upgrade()
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.shared.descriptor
    }

    /// Get the texture size.
    pub fn size(&self) -> Extent3d {
        self.shared.descriptor.size
    }

    /// Get the texture width.
    pub fn width(&self) -> u32 {
        self.shared.descriptor.size.width
    }

    /// Get the texture height.
    pub fn height(&self) -> u32 {
        self.shared.descriptor.size.height
    }

    /// Get the depth or array layer count.
    pub fn depth(&self) -> u32 {
        self.shared.descriptor.size.depth
    }

    /// Get the texture format.
    pub fn format(&self) -> TextureFormat {
        self.shared.descriptor.format
    }

    /// Get the sample count.
    pub fn sample_count(&self) -> u32 {
        self.shared.descriptor.sample_count
    }

    /// Get the usage flags.
    pub fn usage(&self) -> TextureUsage {
        self.shared.descriptor.usage
    }

    /// Get the texture label, if set.
    pub fn label(&self) -> Option<&str> {
        self.shared.descriptor.label.as_deref()
    }

    /// Creates a view over a layer range. The view does not control the
    /// texture's lifetime: destroying the texture invalidates its views.
    pub fn create_view(&self, descriptor: &TextureViewDescriptor) -> Result<TextureView, GraphicsError> {
        self.ensure_live()?;
        let layers = self.depth();
        let layer_count = descriptor
            .layer_count
            .unwrap_or(layers.saturating_sub(descriptor.base_layer));
        let end = descriptor.base_layer.checked_add(layer_count);
        if layer_count == 0 || end.map_or(true, |end| end > layers) {
            return Err(GraphicsError::validation(format!(
                "view layers {}..{} outside texture {:?} with {layers} layers",
                descriptor.base_layer,
                descriptor.base_layer as u64 + layer_count as u64,
                self.label()
            )));
        }
        Ok(TextureView {
            texture: self.clone(),
            label: descriptor.label.clone(),
            base_layer: descriptor.base_layer,
            layer_count,
        })
    }

    /// Releases the texels. The same discipline as [`Buffer::destroy`](crate::Buffer::destroy)
    /// applies.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("Destroying texture {:?}", self.label());
        self.shared.storage.write().texels = Vec::new();
    }

    pub fn is_destroyed(&self) -> bool {
        !self.shared.is_live()
    }

    pub fn same_as(&self, other: &Texture) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn storage(&self) -> RwLockReadGuard<'_, TexelStorage> {
        self.shared.storage.read_recursive()
    }

    pub(crate) fn storage_mut(&self) -> RwLockWriteGuard<'_, TexelStorage> {
        self.shared.storage.write()
    }

    pub(crate) fn downgrade(&self) -> Weak<TextureShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), GraphicsError> {
        if self.is_destroyed() {
            return Err(GraphicsError::usage(format!(
                "texture {:?} used after destroy",
                self.label()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.shared.id)
            .field("size", &self.shared.descriptor.size)
            .field("format", &self.shared.descriptor.format)
            .field("sample_count", &self.shared.descriptor.sample_count)
            .field("label", &self.shared.descriptor.label)
            .finish()
    }
}

/// A typed accessor over a layer range of a texture.
#[derive(Clone, Debug)]
pub struct TextureView {
    texture: Texture,
    label: Option<String>,
    base_layer: u32,
    layer_count: u32,
}

impl TextureView {
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref().or(self.texture.label())
    }

    pub fn format(&self) -> TextureFormat {
        self.texture.format()
    }

    pub fn sample_count(&self) -> u32 {
        self.texture.sample_count()
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    pub fn base_layer(&self) -> u32 {
        self.base_layer
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
static_assertions::assert_impl_all!(TextureView: Send, Sync);
