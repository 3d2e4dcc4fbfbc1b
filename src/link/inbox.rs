//! # Frame Inbox
//!
//! Bounded hand-off between the link receiver task and the command engine.
//! When full, a new frame overwrites the oldest unread one.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::pwrcmd::protocol::Frame;

/// Number of completed frames retained
pub const INBOX_CAPACITY: usize = 4;

/// Why a wait on the inbox ended without a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// Deadline passed
    Elapsed,
    /// Receiver has stopped and the inbox is empty
    Closed,
}

#[derive(Debug)]
struct InboxState {
    frames: VecDeque<Frame>,
    closed: bool,
    overwritten: u64,
}

/// Ring of the most recently decoded frames
///
/// The lock is held only to move frames in or out, never across an await,
/// so the receiver is not slowed down by a waiting caller.
#[derive(Debug)]
pub struct Inbox {
    state: Mutex<InboxState>,
    capacity: usize,
    notify: Notify,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    pub fn new() -> Self {
        Self::with_capacity(INBOX_CAPACITY)
    }

    /// Create an inbox holding at most `capacity` frames (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(InboxState {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
                overwritten: 0,
            }),
            capacity,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InboxState> {
        // A panic while holding this lock cannot leave the queue inconsistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a frame, overwriting the oldest if the ring is full
    pub fn push(&self, frame: Frame) {
        {
            let mut state = self.lock();
            if state.frames.len() == self.capacity {
                if let Some(dropped) = state.frames.pop_front() {
                    state.overwritten += 1;
                    debug!("Inbox full, overwrote unread frame 0x{:02X}", dropped.command);
                }
            }
            state.frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Take the oldest frame without waiting
    pub fn try_pop(&self) -> Option<Frame> {
        self.lock().frames.pop_front()
    }

    /// Discard every queued frame, returning how many were dropped
    pub fn drain(&self) -> usize {
        let mut state = self.lock();
        let n = state.frames.len();
        state.frames.clear();
        n
    }

    /// Mark the inbox closed; waiters wake up once it is empty
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames lost to overwrite since creation
    pub fn overwritten(&self) -> u64 {
        self.lock().overwritten
    }

    /// Wait for the next frame until `deadline`
    ///
    /// # Errors
    ///
    /// * `RecvError::Elapsed` - nothing arrived before the deadline
    /// * `RecvError::Closed` - the receiver stopped and nothing is queued
    pub async fn recv_until(&self, deadline: Instant) -> Result<Frame, RecvError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Ok(frame);
                }
                if state.closed {
                    return Err(RecvError::Closed);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(RecvError::Elapsed);
            }
        }
    }
}
