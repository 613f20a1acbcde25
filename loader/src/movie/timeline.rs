use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use parking_lot::RwLock;
use swf::Depth;
use tracing::trace;

/// Closed frames of a timeline, one depth set per frame.
///
/// Frames are numbered from 1. A frame becomes visible only once the loader
/// closes it and never changes afterwards.
#[derive(Debug, Default)]
pub struct Timeline {
    frames: RwLock<Vec<Arc<BTreeSet<Depth>>>>,
    labels: RwLock<HashMap<String, usize>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of closed frames.
    pub fn frame_count(&self) -> usize {
        self.frames.read().len()
    }

    /// Depths occupied in `frame`, or `None` if that frame is not closed yet.
    ///
    /// Returns a copy so callers never observe later frames being built.
    pub fn depths_at(&self, frame: usize) -> Option<BTreeSet<Depth>> {
        let index = frame.checked_sub(1)?;
        self.frames
            .read()
            .get(index)
            .map(|depths| depths.as_ref().clone())
    }

    /// Frame number of a label, compared case-insensitively.
    pub fn labeled_frame(&self, label: &str) -> Option<usize> {
        self.labels.read().get(&label.to_lowercase()).copied()
    }

    pub fn labels(&self) -> Vec<(String, usize)> {
        let mut labels: Vec<_> = self
            .labels
            .read()
            .iter()
            .map(|(label, frame)| (label.clone(), *frame))
            .collect();
        labels.sort_by_key(|(_, frame)| *frame);
        labels
    }

    fn publish(&self, depths: Arc<BTreeSet<Depth>>) -> usize {
        let mut frames = self.frames.write();
        frames.push(depths);
        frames.len()
    }
}

/// Writer side of a [`Timeline`], owned by whoever is parsing the frames.
///
/// Holds the frame in progress; nothing else can see or touch it until
/// [`TimelineBuilder::close_frame`].
#[derive(Debug)]
pub struct TimelineBuilder {
    timeline: Arc<Timeline>,
    in_progress: BTreeSet<Depth>,
    /// Whether anything was recorded since the last close.
    dirty: bool,
}

impl TimelineBuilder {
    pub fn new(timeline: Arc<Timeline>) -> Self {
        Self {
            timeline,
            in_progress: BTreeSet::new(),
            dirty: false,
        }
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// 1-based number of the frame being assembled.
    pub fn frame_in_progress(&self) -> usize {
        self.timeline.frame_count() + 1
    }

    pub fn add_slot(&mut self, depth: Depth) {
        self.in_progress.insert(depth);
        self.dirty = true;
    }

    pub fn remove_slot(&mut self, depth: Depth) {
        if !self.in_progress.remove(&depth) {
            trace!("removing empty depth {}", depth);
        }
        self.dirty = true;
    }

    /// Names the frame in progress. A label seen twice keeps its first frame.
    pub fn add_frame_label(&mut self, label: &str) {
        let frame = self.frame_in_progress();
        self.timeline
            .labels
            .write()
            .entry(label.to_lowercase())
            .or_insert(frame);
        self.dirty = true;
    }

    /// True if tags were recorded for a frame that was never closed.
    pub fn has_pending_changes(&self) -> bool {
        self.dirty
    }

    /// Publishes the frame in progress and starts the next one from the same
    /// depths. Returns the number of the frame just closed.
    pub fn close_frame(&mut self) -> usize {
        self.dirty = false;
        self.timeline.publish(Arc::new(self.in_progress.clone()))
    }
}
