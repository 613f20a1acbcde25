use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{error::WaitError, loader::LoadState};

/// Frame and byte progress of one stream, shared between the loader thread
/// and any number of waiting consumers.
///
/// `frames_loaded` is mirrored into an atomic so the already-loaded path of
/// [`ProgressTracker::wait_for_frame`] never touches the lock. The loader
/// stores it with release ordering after every frame's dictionary and
/// timeline writes, consumers read it with acquire ordering.
pub struct ProgressTracker {
    total_frames: usize,
    bytes_total: usize,
    frames_loaded: AtomicUsize,
    state: Mutex<ProgressState>,
    frame_reached: Condvar,
}

#[derive(Debug, Default)]
struct ProgressState {
    frames_loaded: usize,
    bytes_loaded: usize,
    /// Last frame a consumer blocked on.
    wait_target: usize,
    waiters: usize,
    finished: Option<LoadState>,
}

/// A point-in-time copy of the tracker, handed to tag interpreters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub frames_loaded: usize,
    pub total_frames: usize,
    pub bytes_loaded: usize,
    pub bytes_total: usize,
}

impl ProgressTracker {
    pub fn new(total_frames: usize, bytes_total: usize) -> Self {
        Self {
            total_frames,
            bytes_total,
            frames_loaded: AtomicUsize::new(0),
            state: Mutex::new(ProgressState::default()),
            frame_reached: Condvar::new(),
        }
    }

    /// Frame count advertised by the header.
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn frames_loaded(&self) -> usize {
        self.frames_loaded.load(Ordering::Acquire)
    }

    pub fn bytes_total(&self) -> usize {
        self.bytes_total
    }

    pub fn bytes_loaded(&self) -> usize {
        self.state.lock().bytes_loaded
    }

    pub fn wait_target(&self) -> usize {
        self.state.lock().wait_target
    }

    /// How loading ended, or `None` while it may still produce frames.
    pub fn finished(&self) -> Option<LoadState> {
        self.state.lock().finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished().is_some()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock();
        ProgressSnapshot {
            frames_loaded: state.frames_loaded,
            total_frames: self.total_frames,
            bytes_loaded: state.bytes_loaded,
            bytes_total: self.bytes_total,
        }
    }

    /// Blocks until frame `frame` (1-based) is loaded.
    ///
    /// Returns immediately when the frame is already there. Otherwise waits
    /// until the loader reaches it, loading ends without reaching it, or the
    /// optional timeout expires.
    pub fn wait_for_frame(&self, frame: usize, timeout: Option<Duration>) -> Result<(), WaitError> {
        if frame <= self.frames_loaded() {
            return Ok(());
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();
        state.wait_target = frame;
        state.waiters += 1;

        let result = loop {
            if frame <= state.frames_loaded {
                break Ok(());
            }
            if let Some(finished) = state.finished {
                break Err(WaitError::Unavailable {
                    frame,
                    frames_loaded: state.frames_loaded,
                    state: finished,
                });
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .frame_reached
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && frame > state.frames_loaded
                        && state.finished.is_none()
                    {
                        break Err(WaitError::TimedOut {
                            frame,
                            frames_loaded: state.frames_loaded,
                        });
                    }
                }
                None => self.frame_reached.wait(&mut state),
            }
        };

        state.waiters -= 1;
        result
    }

    /// Records one more fully parsed frame and wakes every waiter.
    ///
    /// Only the loader thread calls this, after the frame's timeline entry
    /// has been published.
    pub(crate) fn increment_frames_loaded(&self) -> usize {
        let mut state = self.state.lock();
        state.frames_loaded += 1;
        let frames_loaded = state.frames_loaded;
        self.frames_loaded.store(frames_loaded, Ordering::Release);

        if frames_loaded > self.total_frames {
            warn!(
                "number of SHOWFRAME tags in SWF stream ({}) exceeds the advertised number in header ({})",
                frames_loaded, self.total_frames
            );
        }

        // 多个等待者可能在等不同的帧，必须全部唤醒
        if state.waiters > 0 {
            self.frame_reached.notify_all();
        }
        frames_loaded
    }

    pub(crate) fn set_bytes_loaded(&self, bytes: usize) {
        self.state.lock().bytes_loaded = bytes;
    }

    /// Marks loading as over and releases every waiter whose frame was not
    /// reached. The first outcome sticks.
    pub(crate) fn finish(&self, outcome: LoadState) {
        let mut state = self.state.lock();
        if state.finished.is_some() {
            return;
        }
        debug!(
            "loading finished as {:?} with {}/{} frames",
            outcome, state.frames_loaded, self.total_frames
        );
        state.finished = Some(outcome);
        self.frame_reached.notify_all();
    }
}
