//! CPU-GPU synchronization primitives.
//!
//! The queue's worker advances a [`Timeline`] to the index of every
//! submission it completes. A [`Fence`] observes one index of a timeline:
//! it can be polled, waited on with or without a timeout, or awaited as a
//! [`Future`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::resources::Buffer;

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

#[derive(Default)]
struct TimelineState {
    completed: u64,
    wakers: Vec<(u64, Waker)>,
    // Buffers destroyed once `completed` reaches their index
    retiring: Vec<(u64, Buffer)>,
}

/// Monotonic counter of completed submission indices.
#[derive(Default)]
pub(crate) struct Timeline {
    state: Mutex<TimelineState>,
    signaled: Condvar,
}

impl Timeline {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    /// Advances the timeline to `index`, destroying the buffers retired up to
    /// it and waking every waiter it satisfies.
    pub(crate) fn signal(&self, index: u64) {
        let (retired, wakers) = {
            let mut state = self.state.lock();
            state.completed = state.completed.max(index);
            let completed = state.completed;
            let (retired, pending): (Vec<_>, Vec<_>) =
                state.retiring.drain(..).partition(|(at, _)| *at <= completed);
            state.retiring = pending;
            let (ready, waiting): (Vec<_>, Vec<_>) = state.wakers.drain(..).partition(|(at, _)| *at <= completed);
            state.wakers = waiting;
            (retired, ready)
        };
        self.signaled.notify_all();
        for (at, buffer) in retired {
            log::trace!("Retiring buffer {:?} after submission {at}", buffer.label());
            buffer.destroy();
        }
        for (_, waker) in wakers {
            waker.wake();
        }
    }

    /// Destroys `buffer` once the timeline reaches `index`, immediately if it
    /// already has.
    pub(crate) fn retire_after(&self, buffer: Buffer, index: u64) {
        let mut state = self.state.lock();
        if state.completed >= index {
            drop(state);
            buffer.destroy();
        } else {
            state.retiring.push((index, buffer));
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_retirements(&self) -> usize {
        self.state.lock().retiring.len()
    }

    fn wait(&self, index: u64, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock();
        while state.completed < index {
            match deadline {
                Some(deadline) => {
                    if self.signaled.wait_until(&mut state, deadline).timed_out() {
                        return state.completed >= index;
                    }
                }
                None => self.signaled.wait(&mut state),
            }
        }
        true
    }
}

/// CPU-GPU synchronization primitive for one submission index.
///
/// Fences are cheap to clone; clones observe the same submission.
///
/// # Example
///
/// ```ignore
/// let index = device.queue().submit([encoder.finish()])?;
/// let fence = device.queue().fence(index);
///
/// // Later, before reusing frame resources:
/// fence.wait();
/// assert_eq!(fence.status(), FenceStatus::Signaled);
/// ```
#[derive(Clone)]
pub struct Fence {
    timeline: Arc<Timeline>,
    index: u64,
}

impl Fence {
    pub(crate) fn new(timeline: Arc<Timeline>, index: u64) -> Self {
        Self { timeline, index }
    }

    /// The submission index this fence waits for.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Check the current status of the fence.
    pub fn status(&self) -> FenceStatus {
        if self.timeline.completed() >= self.index {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Check if the fence is signaled (non-blocking).
    pub fn is_signaled(&self) -> bool {
        self.status() == FenceStatus::Signaled
    }

    /// Blocks until the submission completed. Returns immediately if already
    /// signaled.
    pub fn wait(&self) {
        self.timeline.wait(self.index, None);
    }

    /// Wait for the fence with a timeout.
    ///
    /// Returns `true` if the fence was signaled, `false` if timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.timeline.wait(self.index, Some(Instant::now() + timeout))
    }
}

impl Future for Fence {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.timeline.state.lock();
        if state.completed >= self.index {
            return Poll::Ready(());
        }
        state.wakers.retain(|(_, waker)| !waker.will_wake(cx.waker()));
        state.wakers.push((self.index, cx.waker().clone()));
        Poll::Pending
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("index", &self.index)
            .field("status", &self.status())
            .finish()
    }
}
