//! Swapchain and surface management.
//!
//! # Overview
//!
//! - [`PresentationSurface`] - Where presented frames go: a window, or an
//!   [`OffscreenSurface`] keeping the last frame for inspection
//! - [`SurfaceConfiguration`] - Format, size and image count of the swapchain
//! - [`SwapChain`] - Presentable textures cycled frame after frame
//! - [`SurfaceTexture`] - The image acquired for the current frame
//!
//! # Example
//!
//! ```ignore
//! use redlilium_frame::{OffscreenSurface, SurfaceConfiguration, SwapChain};
//!
//! let surface = Arc::new(OffscreenSurface::new("preview"));
//! let mut swapchain = SwapChain::configure(&device, surface.clone(), &SurfaceConfiguration::new(800, 600))?;
//!
//! // In render loop:
//! let frame = swapchain.acquire()?;
//! // ... render to frame.view() ...
//! device.queue().present(frame)?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::{Texture, TextureView};
use crate::types::{TextureDescriptor, TextureFormat, TextureUsage, TextureViewDescriptor};

/// Presentation mode for the swapchain.
///
/// Controls how frames are synchronized with the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// No synchronization. May cause tearing but has lowest latency.
    Immediate,
    /// Triple buffering. Low latency without tearing.
    Mailbox,
    /// VSync enabled. No tearing, but may have higher latency.
    #[default]
    Fifo,
}

/// Configuration for a swapchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceConfiguration {
    /// The texture format of the swapchain images.
    pub format: TextureFormat,
    /// Width of the surface in pixels.
    pub width: u32,
    /// Height of the surface in pixels.
    pub height: u32,
    /// Number of images cycled through.
    pub image_count: u32,
    /// Presentation mode (vsync behavior).
    pub present_mode: PresentMode,
}

impl SurfaceConfiguration {
    /// Create a new surface configuration.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            format: TextureFormat::Bgra8Unorm,
            width,
            height,
            image_count: 3,
            present_mode: PresentMode::default(),
        }
    }

    /// Set the texture format.
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.image_count = image_count;
        self
    }

    /// Set the present mode.
    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }
}

/// One presented image, tightly packed RGBA8 rows, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl PresentedFrame {
    /// The RGBA8 value at `(x, y)`, `None` out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * 4;
        let texel = self.pixels.get(at..at + 4)?;
        Some([texel[0], texel[1], texel[2], texel[3]])
    }
}

/// A display target accepting presented frames.
pub trait PresentationSurface: Send + Sync {
    fn label(&self) -> &str;

    /// Whether swapchain images of `format` can be presented.
    fn supports_format(&self, format: TextureFormat) -> bool {
        !format.is_depth_stencil()
    }

    /// Called on the queue timeline once everything submitted before the
    /// present finished.
    fn present(&self, frame: PresentedFrame) -> Result<(), GraphicsError>;
}

/// A surface without a window, keeping the most recent frame.
#[derive(Debug)]
pub struct OffscreenSurface {
    label: String,
    latest: Mutex<Option<PresentedFrame>>,
    presented: AtomicU64,
}

impl OffscreenSurface {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            latest: Mutex::new(None),
            presented: AtomicU64::new(0),
        }
    }

    /// The last presented frame, if any.
    pub fn latest_frame(&self) -> Option<PresentedFrame> {
        self.latest.lock().clone()
    }

    pub fn presented_count(&self) -> u64 {
        self.presented.load(Ordering::Acquire)
    }
}

impl PresentationSurface for OffscreenSurface {
    fn label(&self) -> &str {
        &self.label
    }

    fn present(&self, frame: PresentedFrame) -> Result<(), GraphicsError> {
        *self.latest.lock() = Some(frame);
        self.presented.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Presentable images of one surface.
///
/// At most one [`SurfaceTexture`] is held at a time: [`acquire`](Self::acquire)
/// fails with [`GraphicsError::UsageSequence`] until the previous one was
/// presented or dropped.
pub struct SwapChain {
    device: Arc<GraphicsDevice>,
    surface: Arc<dyn PresentationSurface>,
    config: SurfaceConfiguration,
    images: Vec<Texture>,
    next_image: usize,
    frame_index: u64,
    held: Arc<AtomicBool>,
}

impl SwapChain {
    /// Creates the swapchain images for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Validation`] for a zero size or image count,
    /// or a format the surface cannot present.
    pub fn configure(
        device: &Arc<GraphicsDevice>,
        surface: Arc<dyn PresentationSurface>,
        config: &SurfaceConfiguration,
    ) -> Result<Self, GraphicsError> {
        if config.image_count == 0 {
            return Err(GraphicsError::validation("swapchain needs at least one image"));
        }
        if !surface.supports_format(config.format) {
            return Err(GraphicsError::validation(format!(
                "surface {:?} cannot present {:?}",
                surface.label(),
                config.format
            )));
        }
        let images = Self::create_images(device, surface.label(), config)?;
        log::info!(
            "Configured swapchain for {:?}: {}x{} {:?}, {} images, {:?}",
            surface.label(),
            config.width,
            config.height,
            config.format,
            config.image_count,
            config.present_mode
        );
        Ok(Self {
            device: device.clone(),
            surface,
            config: config.clone(),
            images,
            next_image: 0,
            frame_index: 0,
            held: Arc::new(AtomicBool::new(false)),
        })
    }

    fn create_images(
        device: &Arc<GraphicsDevice>,
        label: &str,
        config: &SurfaceConfiguration,
    ) -> Result<Vec<Texture>, GraphicsError> {
        (0..config.image_count)
            .map(|i| {
                device.create_texture(
                    &TextureDescriptor::new_2d(
                        config.width,
                        config.height,
                        config.format,
                        TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
                    )
                    .with_label(format!("{label} swapchain image {i}")),
                )
            })
            .collect()
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn surface(&self) -> &Arc<dyn PresentationSurface> {
        &self.surface
    }

    pub fn config(&self) -> &SurfaceConfiguration {
        &self.config
    }

    pub fn format(&self) -> TextureFormat {
        self.config.format
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Returns true while an acquired surface texture is outstanding.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Acquires the next image for rendering.
    pub fn acquire(&mut self) -> Result<SurfaceTexture, GraphicsError> {
        if self.held.swap(true, Ordering::AcqRel) {
            return Err(GraphicsError::usage(
                "surface texture acquired while the previous one is still held",
            ));
        }
        let texture = self.images[self.next_image].clone();
        let view = match texture.create_view(&TextureViewDescriptor::default()) {
            Ok(view) => view,
            Err(e) => {
                self.held.store(false, Ordering::Release);
                return Err(e);
            }
        };
        self.next_image = (self.next_image + 1) % self.images.len();
        self.frame_index += 1;
        log::trace!("Acquired swapchain image for frame {}", self.frame_index);
        Ok(SurfaceTexture {
            texture,
            view,
            frame_index: self.frame_index,
            surface: self.surface.clone(),
            held: self.held.clone(),
        })
    }

    /// Recreates the images at a new size.
    ///
    /// Images still queued for presentation stay alive until the queue
    /// drops them.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        if self.is_held() {
            return Err(GraphicsError::usage("swapchain resized while a surface texture is held"));
        }
        let config = SurfaceConfiguration {
            width,
            height,
            ..self.config.clone()
        };
        self.images = Self::create_images(&self.device, self.surface.label(), &config)?;
        self.config = config;
        self.next_image = 0;
        log::debug!("Resized swapchain for {:?} to {width}x{height}", self.surface.label());
        Ok(())
    }
}

impl std::fmt::Debug for SwapChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapChain")
            .field("surface", &self.surface.label())
            .field("config", &self.config)
            .field("frame_index", &self.frame_index)
            .field("held", &self.is_held())
            .finish()
    }
}

/// A swapchain image acquired for the current frame.
///
/// Present it with [`Queue::present`](crate::Queue::present); dropping it
/// discards the frame. Either way the swapchain can acquire again.
pub struct SurfaceTexture {
    texture: Texture,
    view: TextureView,
    frame_index: u64,
    surface: Arc<dyn PresentationSurface>,
    held: Arc<AtomicBool>,
}

impl SurfaceTexture {
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// A view of the image, for use as a color attachment.
    pub fn view(&self) -> &TextureView {
        &self.view
    }

    pub fn format(&self) -> TextureFormat {
        self.texture.format()
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    /// Get the frame index (for debugging/profiling).
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub(crate) fn surface(&self) -> &Arc<dyn PresentationSurface> {
        &self.surface
    }
}

impl Drop for SurfaceTexture {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for SurfaceTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceTexture")
            .field("texture", &self.texture)
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

static_assertions::assert_impl_all!(SwapChain: Send, Sync);
static_assertions::assert_impl_all!(SurfaceTexture: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{BackendType, GraphicsInstance, InstanceParameters, QueueMode};

    fn device() -> Arc<GraphicsDevice> {
        let instance = GraphicsInstance::with_parameters(
            InstanceParameters::new()
                .with_backend(BackendType::Software)
                .with_queue_mode(QueueMode::Inline),
        )
        .unwrap();
        pollster::block_on(instance.request_default_device()).unwrap()
    }

    #[test]
    fn test_acquire_while_held() {
        let device = device();
        let surface = Arc::new(OffscreenSurface::new("test"));
        let mut swapchain = SwapChain::configure(&device, surface, &SurfaceConfiguration::new(8, 8)).unwrap();

        let frame = swapchain.acquire().unwrap();
        assert_eq!(frame.frame_index(), 1);
        assert!(swapchain.acquire().unwrap_err().is_usage_sequence());
        assert!(swapchain.resize(16, 16).unwrap_err().is_usage_sequence());

        drop(frame);
        let frame = swapchain.acquire().unwrap();
        assert_eq!(frame.frame_index(), 2);
    }

    #[test]
    fn test_images_cycle() {
        let device = device();
        let surface = Arc::new(OffscreenSurface::new("test"));
        let config = SurfaceConfiguration::new(4, 4).with_image_count(2);
        let mut swapchain = SwapChain::configure(&device, surface, &config).unwrap();

        let first = swapchain.acquire().unwrap().texture().clone();
        let second = swapchain.acquire().unwrap().texture().clone();
        let third = swapchain.acquire().unwrap().texture().clone();
        assert!(!first.same_as(&second));
        assert!(first.same_as(&third));
    }

    #[test]
    fn test_rejects_depth_format() {
        let device = device();
        let surface = Arc::new(OffscreenSurface::new("test"));
        let config = SurfaceConfiguration::new(4, 4).with_format(TextureFormat::Depth32Float);
        assert!(SwapChain::configure(&device, surface, &config).unwrap_err().is_validation());
    }

    #[test]
    fn test_presented_frame_pixel() {
        let frame = PresentedFrame {
            width: 2,
            height: 1,
            pixels: vec![1, 2, 3, 4, 5, 6, 7, 8],
        };
        assert_eq!(frame.pixel(1, 0), Some([5, 6, 7, 8]));
        assert_eq!(frame.pixel(2, 0), None);
    }
}
