//! Frame scheduling and synchronization.
//!
//! A [`FrameScheduler`] drives one frame at a time through a fixed order:
//!
//! 1. [`begin_frame`](FrameScheduler::begin_frame) acquires the swapchain
//!    image and opens a command encoder
//! 2. [`Frame::upload`] streams buffer data, only before the first pass
//! 3. [`Frame::render_pass`] records passes
//! 4. [`Frame::submit`] finishes the encoder, submits it, presents the image
//!    and retires the frame's staging buffers after the submission
//!
//! Any failing operation poisons the frame: every later call on it returns
//! [`GraphicsError::UsageSequence`].
//!
//! # Example
//!
//! ```ignore
//! let mut scheduler = FrameScheduler::new(device.clone(), swapchain, FrameSchedulerConfig::default())?;
//!
//! loop {
//!     let mut frame = scheduler.begin_frame()?;
//!     frame.upload(&uniforms, 0, bytemuck::bytes_of(&camera))?;
//!     let view = frame.surface_view().clone();
//!     frame.render_pass(
//!         &RenderPassDescriptor::new().with_color_attachment(ColorAttachment::new(&view).with_clear(Color::BLACK)),
//!         |pass| {
//!             pass.set_pipeline(&pipeline)?;
//!             pass.draw(3, 1, 0, 0)
//!         },
//!     )?;
//!     frame.submit()?;
//! }
//! ```

mod sync;

pub use sync::{Fence, FenceStatus};
pub(crate) use sync::Timeline;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::{CommandEncoder, RenderPassDescriptor, RenderPassEncoder};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::{Buffer, TextureView};
use crate::swapchain::{SurfaceTexture, SwapChain};
use crate::upload::{update_buffer_data, StagingBuffer};

/// Default number of frames that can be in flight simultaneously.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Configuration of a [`FrameScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerConfig {
    /// Frames recorded ahead of the queue before `begin_frame` blocks.
    pub frames_in_flight: usize,
}

impl Default for FrameSchedulerConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
        }
    }
}

impl FrameSchedulerConfig {
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }
}

/// Where a [`Frame`] is in its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Acquired; uploads and passes may be recorded.
    Recording,
    /// At least one pass was recorded; uploads are rejected.
    Drawing,
    /// An operation failed; the frame can only be dropped.
    Poisoned,
}

/// Paces frames over a swapchain.
pub struct FrameScheduler {
    device: Arc<GraphicsDevice>,
    swapchain: SwapChain,
    config: FrameSchedulerConfig,
    in_flight: Arc<Mutex<VecDeque<Fence>>>,
    frame_count: u64,
}

impl FrameScheduler {
    /// # Errors
    ///
    /// Returns [`GraphicsError::Validation`] if `frames_in_flight` is zero.
    pub fn new(
        device: Arc<GraphicsDevice>,
        swapchain: SwapChain,
        config: FrameSchedulerConfig,
    ) -> Result<Self, GraphicsError> {
        if config.frames_in_flight == 0 {
            return Err(GraphicsError::validation("frames_in_flight must be at least 1"));
        }
        log::info!(
            "Created frame scheduler with {} frames in flight",
            config.frames_in_flight
        );
        Ok(Self {
            device,
            swapchain,
            config,
            in_flight: Arc::new(Mutex::new(VecDeque::with_capacity(config.frames_in_flight))),
            frame_count: 0,
        })
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn swapchain(&self) -> &SwapChain {
        &self.swapchain
    }

    /// Mutable access, e.g. to [`SwapChain::resize`].
    pub fn swapchain_mut(&mut self) -> &mut SwapChain {
        &mut self.swapchain
    }

    pub fn config(&self) -> &FrameSchedulerConfig {
        &self.config
    }

    /// Number of frames begun so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Number of submitted frames whose presentation may still be pending.
    pub fn frames_in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Begins the next frame.
    ///
    /// Blocks while `frames_in_flight` submitted frames are still pending.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::UsageSequence`] while the previous frame's
    /// surface texture is held, i.e. that frame was neither submitted nor
    /// dropped.
    pub fn begin_frame(&mut self) -> Result<Frame, GraphicsError> {
        let oldest = {
            let mut in_flight = self.in_flight.lock();
            let mut oldest = None;
            while in_flight.len() >= self.config.frames_in_flight {
                oldest = in_flight.pop_front();
            }
            oldest
        };
        if let Some(fence) = oldest {
            log::trace!("Waiting for submission {} before the next frame", fence.index());
            fence.wait();
        }

        let surface = self.swapchain.acquire()?;
        self.frame_count += 1;
        let index = self.frame_count;
        log::debug!("Frame {index}: begun");
        Ok(Frame {
            index,
            device: self.device.clone(),
            encoder: Some(
                self.device
                    .create_command_encoder(Some(&format!("frame {index}"))),
            ),
            surface,
            staging: Vec::new(),
            phase: FramePhase::Recording,
            in_flight: self.in_flight.clone(),
            submitted: false,
        })
    }

    /// Blocks until every submitted frame completed.
    pub fn wait_idle(&self) {
        self.device.queue().wait_idle();
        self.in_flight.lock().clear();
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("swapchain", &self.swapchain)
            .field("config", &self.config)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

/// One frame between [`FrameScheduler::begin_frame`] and [`Frame::submit`].
///
/// Dropping a frame without submitting it discards its recorded work and
/// releases the surface texture.
pub struct Frame {
    index: u64,
    device: Arc<GraphicsDevice>,
    encoder: Option<CommandEncoder>,
    surface: SurfaceTexture,
    staging: Vec<StagingBuffer>,
    phase: FramePhase,
    in_flight: Arc<Mutex<VecDeque<Fence>>>,
    submitted: bool,
}

impl Frame {
    /// The 1-based frame number.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// The acquired swapchain image.
    pub fn surface_texture(&self) -> &SurfaceTexture {
        &self.surface
    }

    pub fn surface_view(&self) -> &TextureView {
        self.surface_texture().view()
    }

    fn ensure_usable(&self) -> Result<(), GraphicsError> {
        if self.phase == FramePhase::Poisoned {
            return Err(GraphicsError::usage(format!(
                "frame {} is unusable after an earlier error",
                self.index
            )));
        }
        Ok(())
    }

    fn poison<T>(&mut self, result: Result<T, GraphicsError>) -> Result<T, GraphicsError> {
        if let Err(e) = &result {
            log::debug!("Frame {}: poisoned by {e}", self.index);
            self.phase = FramePhase::Poisoned;
        }
        result
    }

    fn take_encoder(&mut self) -> Result<CommandEncoder, GraphicsError> {
        self.encoder
            .take()
            .ok_or_else(|| GraphicsError::usage(format!("frame {} has no open encoder", self.index)))
    }

    /// Streams `bytes` into `destination` at `offset` through the frame's
    /// encoder.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::UsageSequence`] after the first render pass,
    /// and the validation errors of [`update_buffer_data`].
    pub fn upload(&mut self, destination: &Buffer, offset: u64, bytes: &[u8]) -> Result<(), GraphicsError> {
        self.ensure_usable()?;
        if self.phase == FramePhase::Drawing {
            let err = GraphicsError::usage(format!(
                "frame {}: upload into buffer {:?} after the first render pass",
                self.index,
                destination.label()
            ));
            return self.poison(Err(err));
        }
        let result = self
            .take_encoder()
            .and_then(|encoder| update_buffer_data(&self.device, destination, offset, bytes, Some(encoder)));
        let (encoder, staging) = self.poison(result)?;
        self.encoder = Some(encoder);
        self.staging.push(staging);
        Ok(())
    }

    /// Records one render pass; `record` binds state and issues draws.
    ///
    /// The pass ends when `record` returns, whether it succeeded or not.
    pub fn render_pass<F>(&mut self, descriptor: &RenderPassDescriptor, record: F) -> Result<(), GraphicsError>
    where
        F: FnOnce(&mut RenderPassEncoder) -> Result<(), GraphicsError>,
    {
        self.ensure_usable()?;
        let result = self
            .take_encoder()
            .and_then(|encoder| encoder.begin_render_pass(descriptor));
        let mut pass = self.poison(result)?;
        let recorded = record(&mut pass);
        self.encoder = Some(pass.end());
        self.poison(recorded)?;
        self.phase = FramePhase::Drawing;
        Ok(())
    }

    /// Submits the frame's commands and presents its surface texture.
    ///
    /// Returns the fence of the presentation; the staging buffers are
    /// destroyed once the command submission completed.
    pub fn submit(mut self) -> Result<Fence, GraphicsError> {
        self.ensure_usable()?;
        let encoder = self.take_encoder()?;
        let device = self.device.clone();
        let queue = device.queue();
        let commands = encoder.finish();
        let index = match queue.submit([commands]) {
            Ok(index) => index,
            Err(e) => return self.poison(Err(e)),
        };
        self.submitted = true;
        for staging in self.staging.drain(..) {
            staging.retire_after(queue, index);
        }

        let presented = queue.present_surface(&self.surface);
        let presented = self.poison(presented)?;
        let fence = queue.fence(presented);
        self.in_flight.lock().push_back(fence.clone());
        log::debug!(
            "Frame {}: submitted as {index:?}, presented as {presented:?}",
            self.index
        );
        Ok(fence)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if !self.submitted {
            log::warn!("Frame {} dropped without being submitted", self.index);
        }
        // Nothing submitted references these any more.
        for staging in self.staging.drain(..) {
            staging.destroy_unchecked();
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("phase", &self.phase)
            .field("staging_buffers", &self.staging.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ColorAttachment;
    use crate::instance::{BackendType, GraphicsInstance, InstanceParameters, QueueMode};
    use crate::swapchain::{OffscreenSurface, SurfaceConfiguration};
    use crate::types::{BufferDescriptor, BufferUsage, Color};
    use rstest::rstest;

    fn scheduler(queue_mode: QueueMode) -> (FrameScheduler, Arc<OffscreenSurface>) {
        let parameters = InstanceParameters::new()
            .with_backend(BackendType::Software)
            .with_queue_mode(queue_mode);
        let instance = GraphicsInstance::with_parameters(parameters).unwrap();
        let device = pollster::block_on(instance.request_default_device()).unwrap();
        let surface = Arc::new(OffscreenSurface::new("scheduler test"));
        let swapchain = SwapChain::configure(&device, surface.clone(), &SurfaceConfiguration::new(4, 4)).unwrap();
        let scheduler = FrameScheduler::new(device, swapchain, FrameSchedulerConfig::default()).unwrap();
        (scheduler, surface)
    }

    fn clear(view: &TextureView) -> RenderPassDescriptor {
        RenderPassDescriptor::new().with_color_attachment(ColorAttachment::new(view).with_clear(Color::WHITE))
    }

    #[rstest]
    #[case::threaded(QueueMode::Threaded)]
    #[case::inline(QueueMode::Inline)]
    fn test_frame_presents_cleared_image(#[case] queue_mode: QueueMode) {
        let (mut scheduler, surface) = scheduler(queue_mode);
        let mut frame = scheduler.begin_frame().unwrap();
        let view = frame.surface_view().clone();
        frame.render_pass(&clear(&view), |_| Ok(())).unwrap();
        frame.submit().unwrap().wait();

        let presented = surface.latest_frame().unwrap();
        assert_eq!(presented.pixel(3, 3), Some([255, 255, 255, 255]));
        assert_eq!(surface.presented_count(), 1);
    }

    #[test]
    fn test_begin_while_frame_outstanding() {
        let (mut scheduler, _) = scheduler(QueueMode::Inline);
        let frame = scheduler.begin_frame().unwrap();
        assert!(scheduler.begin_frame().unwrap_err().is_usage_sequence());
        drop(frame);
        assert!(scheduler.begin_frame().is_ok());
    }

    #[test]
    fn test_upload_after_pass_poisons_frame() {
        let (mut scheduler, _) = scheduler(QueueMode::Inline);
        let buffer = scheduler
            .device()
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM | BufferUsage::COPY_DST))
            .unwrap()
            .into_buffer();

        let mut frame = scheduler.begin_frame().unwrap();
        frame.upload(&buffer, 0, &[1; 16]).unwrap();
        let view = frame.surface_view().clone();
        frame.render_pass(&clear(&view), |_| Ok(())).unwrap();
        assert_eq!(frame.phase(), FramePhase::Drawing);

        assert!(frame.upload(&buffer, 0, &[2; 16]).unwrap_err().is_usage_sequence());
        assert_eq!(frame.phase(), FramePhase::Poisoned);
        assert!(frame.render_pass(&clear(&view), |_| Ok(())).unwrap_err().is_usage_sequence());
        assert!(frame.submit().unwrap_err().is_usage_sequence());
    }

    #[test]
    fn test_staging_retired_with_frame() {
        let (mut scheduler, _) = scheduler(QueueMode::Threaded);
        let buffer = scheduler
            .device()
            .create_buffer(&BufferDescriptor::new(8, BufferUsage::UNIFORM | BufferUsage::COPY_DST))
            .unwrap()
            .into_buffer();

        let mut frame = scheduler.begin_frame().unwrap();
        frame.upload(&buffer, 0, &[7; 8]).unwrap();
        let staging = frame.staging[0].buffer().clone();
        frame.submit().unwrap().wait();

        assert!(staging.is_destroyed());
        assert_eq!(&buffer.read()[..], &[7; 8]);
        assert!(scheduler.device().queue().take_errors().is_empty());
    }

    #[test]
    fn test_frames_in_flight_throttle() {
        let (mut scheduler, surface) = scheduler(QueueMode::Threaded);
        for _ in 0..5 {
            let frame = scheduler.begin_frame().unwrap();
            frame.submit().unwrap();
            assert!(scheduler.frames_in_flight() <= DEFAULT_FRAMES_IN_FLIGHT);
        }
        scheduler.wait_idle();
        assert_eq!(scheduler.frame_count(), 5);
        assert_eq!(surface.presented_count(), 5);
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let (scheduler, surface) = scheduler(QueueMode::Inline);
        let device = scheduler.device().clone();
        drop(scheduler);
        let swapchain = SwapChain::configure(&device, surface, &SurfaceConfiguration::new(4, 4)).unwrap();
        let config = FrameSchedulerConfig::default().with_frames_in_flight(0);
        assert!(FrameScheduler::new(device, swapchain, config).unwrap_err().is_validation());
    }
}
