//! The execution queue and its GPU timeline.
//!
//! Every submission gets the next [`SubmissionIndex`]. In
//! [`QueueMode::Threaded`] a worker thread executes submissions strictly in
//! index order and advances the timeline after each; in
//! [`QueueMode::Inline`] the submitting thread executes them before
//! [`Queue::submit`] returns. Either way, a [`Fence`] for an index is
//! signaled only after that submission and all earlier ones completed.
//!
//! Errors raised while executing a command are logged, the command's effects
//! are skipped, and the error is kept for [`Queue::take_errors`]; the
//! timeline still advances.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::backend::GpuBackend;
use crate::command::{Command, CommandBuffer};
use crate::error::GraphicsError;
use crate::instance::QueueMode;
use crate::resources::{Buffer, Texture};
use crate::scheduler::{Fence, Timeline};
use crate::swapchain::{PresentationSurface, SurfaceTexture};
use crate::types::{BufferUsage, COPY_BUFFER_ALIGNMENT};

/// Position of a submission on the queue timeline. Indices start at 1 and
/// increase by one per submission; index 0 is complete from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubmissionIndex(pub(crate) u64);

impl SubmissionIndex {
    pub fn value(self) -> u64 {
        self.0
    }
}

enum Job {
    Execute {
        index: u64,
        buffers: Vec<CommandBuffer>,
    },
    Present {
        index: u64,
        texture: Texture,
        surface: Arc<dyn PresentationSurface>,
    },
}

impl Job {
    fn index(&self) -> u64 {
        match self {
            Self::Execute { index, .. } | Self::Present { index, .. } => *index,
        }
    }
}

/// State shared between the queue handle and its worker.
struct QueueWorker {
    backend: Arc<dyn GpuBackend>,
    timeline: Arc<Timeline>,
    errors: Mutex<Vec<GraphicsError>>,
    lost: AtomicBool,
}

impl QueueWorker {
    fn record(&self, what: &str, error: GraphicsError) {
        log::error!("Queue: {what} failed: {error}");
        self.errors.lock().push(error);
    }

    fn run(&self, job: Job) {
        let index = job.index();
        if self.lost.load(Ordering::Acquire) {
            log::warn!("Queue: skipping submission {index} on a lost device");
        } else if catch_unwind(AssertUnwindSafe(|| self.execute(&job))).is_err() {
            log::error!("Queue: submission {index} panicked, the device is lost");
            self.lost.store(true, Ordering::Release);
            self.errors.lock().push(GraphicsError::DeviceLost);
        }
        self.timeline.signal(index);
    }

    fn execute(&self, job: &Job) {
        match job {
            Job::Execute { index, buffers } => {
                log::trace!("Queue: executing submission {index} ({} command buffers)", buffers.len());
                for buffer in buffers {
                    for command in buffer.commands() {
                        if let Err(error) = self.backend.execute(command) {
                            self.record(command.name(), error);
                        }
                    }
                }
            }
            Job::Present { texture, surface, .. } => {
                if let Err(error) = self.backend.present(texture, surface.as_ref()) {
                    self.record("present", error);
                }
            }
        }
    }
}

struct Submitter {
    sender: Option<mpsc::Sender<Job>>,
    last_index: u64,
}

/// The device's single execution queue.
///
/// # Example
///
/// ```ignore
/// let index = device.queue().submit([encoder.finish()])?;
/// device.queue().fence(index).wait();
/// ```
pub struct Queue {
    mode: QueueMode,
    validation: bool,
    worker: Arc<QueueWorker>,
    submitter: Mutex<Submitter>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Queue {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, mode: QueueMode, validation: bool) -> Self {
        let worker = Arc::new(QueueWorker {
            backend,
            timeline: Timeline::new(),
            errors: Mutex::new(Vec::new()),
            lost: AtomicBool::new(false),
        });

        let (mut mode, mut sender, mut thread) = (mode, None, None);
        if mode == QueueMode::Threaded {
            let (tx, rx) = mpsc::channel::<Job>();
            let shared = worker.clone();
            let spawned = std::thread::Builder::new()
                .name("redlilium-queue".to_string())
                .spawn(move || {
                    for job in rx {
                        shared.run(job);
                    }
                    log::debug!("Queue worker exiting");
                });
            match spawned {
                Ok(handle) => {
                    sender = Some(tx);
                    thread = Some(handle);
                }
                Err(e) => {
                    log::warn!("Failed to spawn the queue worker ({e}), executing inline");
                    mode = QueueMode::Inline;
                }
            }
        }
        log::debug!("Created queue ({mode:?}, validation={validation})");

        Self {
            mode,
            validation,
            worker,
            submitter: Mutex::new(Submitter {
                sender,
                last_index: 0,
            }),
            thread: Mutex::new(thread),
        }
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    #[cfg(test)]
    pub(crate) fn timeline(&self) -> &Arc<Timeline> {
        &self.worker.timeline
    }

    /// Returns true once a submission panicked inside the backend.
    pub fn is_lost(&self) -> bool {
        self.worker.lost.load(Ordering::Acquire)
    }

    fn enqueue(&self, job: impl FnOnce(u64) -> Job) -> Result<SubmissionIndex, GraphicsError> {
        if self.is_lost() {
            return Err(GraphicsError::DeviceLost);
        }
        let mut submitter = self.submitter.lock();
        let index = submitter.last_index + 1;
        match &submitter.sender {
            Some(sender) => sender.send(job(index)).map_err(|_| GraphicsError::DeviceLost)?,
            None => self.worker.run(job(index)),
        }
        submitter.last_index = index;
        Ok(SubmissionIndex(index))
    }

    /// Submits command buffers for execution, in order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::DeviceLost`] if the timeline stopped
    /// accepting work. With validation enabled, returns
    /// [`GraphicsError::UsageSequence`] without submitting anything if a
    /// command references a destroyed resource.
    pub fn submit(&self, buffers: impl IntoIterator<Item = CommandBuffer>) -> Result<SubmissionIndex, GraphicsError> {
        let buffers: Vec<CommandBuffer> = buffers.into_iter().collect();
        if self.validation {
            for buffer in &buffers {
                buffer.commands().iter().try_for_each(Command::ensure_live)?;
            }
        }
        let index = self.enqueue(|index| Job::Execute { index, buffers })?;
        log::trace!("Queue: submitted {index:?}");
        Ok(index)
    }

    /// Writes `data` at `offset` of `buffer`, ordered after every earlier
    /// submission.
    pub fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<SubmissionIndex, GraphicsError> {
        buffer.ensure_live()?;
        if !buffer.usage().contains(BufferUsage::COPY_DST) {
            return Err(GraphicsError::validation(format!(
                "buffer {:?} lacks COPY_DST usage",
                buffer.label()
            )));
        }
        let size = data.len() as u64;
        if offset % COPY_BUFFER_ALIGNMENT != 0 || size % COPY_BUFFER_ALIGNMENT != 0 {
            return Err(GraphicsError::validation(format!(
                "write of {size} bytes at {offset} is not {COPY_BUFFER_ALIGNMENT}-byte aligned"
            )));
        }
        if offset.checked_add(size).map_or(true, |end| end > buffer.size()) {
            return Err(GraphicsError::validation(format!(
                "write of {size} bytes at {offset} is outside buffer {:?} of {} bytes",
                buffer.label(),
                buffer.size()
            )));
        }
        let command = Command::WriteBuffer {
            buffer: buffer.clone(),
            offset,
            data: data.to_vec(),
        };
        self.submit([CommandBuffer::from_commands(Some("write_buffer".to_string()), vec![command])])
    }

    /// Waits for all submitted work, then copies `offset..offset + size` of
    /// a `MAP_READ` buffer to the host.
    pub fn read_buffer(&self, buffer: &Buffer, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        if !buffer.usage().contains(BufferUsage::MAP_READ) {
            return Err(GraphicsError::validation(format!(
                "buffer {:?} lacks MAP_READ usage",
                buffer.label()
            )));
        }
        if offset.checked_add(size).map_or(true, |end| end > buffer.size()) {
            return Err(GraphicsError::validation(format!(
                "read of {size} bytes at {offset} is outside buffer {:?} of {} bytes",
                buffer.label(),
                buffer.size()
            )));
        }
        self.wait_idle();
        let memory = buffer.read();
        buffer.ensure_live()?;
        Ok(memory[offset as usize..(offset + size) as usize].to_vec())
    }

    /// Queues the frame for display after every earlier submission.
    pub fn present(&self, frame: SurfaceTexture) -> Result<SubmissionIndex, GraphicsError> {
        self.present_surface(&frame)
    }

    /// Queues a present of `frame`; the acquisition ends when it drops.
    pub(crate) fn present_surface(&self, frame: &SurfaceTexture) -> Result<SubmissionIndex, GraphicsError> {
        let texture = frame.texture().clone();
        let surface = frame.surface().clone();
        texture.ensure_live()?;
        log::trace!("Queue: presenting frame {}", frame.frame_index());
        self.enqueue(|index| Job::Present {
            index,
            texture,
            surface,
        })
    }

    /// Destroys `buffer` once submission `index` completed.
    pub fn destroy_after(&self, buffer: &Buffer, index: SubmissionIndex) {
        self.worker.timeline.retire_after(buffer.clone(), index.0);
    }

    /// A fence signaled when submission `index` completed.
    pub fn fence(&self, index: SubmissionIndex) -> Fence {
        Fence::new(self.worker.timeline.clone(), index.0)
    }

    /// A fence for the most recent submission.
    pub fn on_submitted_work_done(&self) -> Fence {
        self.fence(self.last_submission_index())
    }

    pub fn last_submission_index(&self) -> SubmissionIndex {
        SubmissionIndex(self.submitter.lock().last_index)
    }

    /// Index of the latest completed submission.
    pub fn completed_submission_index(&self) -> SubmissionIndex {
        SubmissionIndex(self.worker.timeline.completed())
    }

    /// Blocks until every submitted job completed.
    pub fn wait_idle(&self) {
        self.on_submitted_work_done().wait();
    }

    /// Drains the errors raised while executing submitted commands.
    pub fn take_errors(&self) -> Vec<GraphicsError> {
        std::mem::take(&mut *self.worker.errors.lock())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.submitter.get_mut().sender = None;
        if let Some(handle) = self.thread.get_mut().take() {
            if handle.join().is_err() {
                log::error!("Queue worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("mode", &self.mode)
            .field("validation", &self.validation)
            .field("last_submission", &self.last_submission_index())
            .field("completed", &self.completed_submission_index())
            .finish()
    }
}

static_assertions::assert_impl_all!(Queue: Send, Sync);
