use std::{
    io,
    sync::{
        Arc, Barrier, OnceLock,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
};

use enum_map::Enum;
use num_derive::FromPrimitive;
use parking_lot::Mutex;
use serde::Serialize;
use swf::TagCode;
use tracing::{debug, trace, warn};

use crate::{
    error::LoadError,
    interpreter::{TagContext, TagInterpreter},
    movie::{MovieContents, TimelineBuilder},
    tag_utils::TagStream,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize)]
#[repr(u8)]
pub enum LoadState {
    NotStarted = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl LoadState {
    pub fn from_u8(n: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(n)
    }

    /// Whether loading has ended and no more frames will arrive.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            LoadState::Completed | LoadState::Cancelled | LoadState::Failed
        )
    }
}

/// Kinds of tags counted while loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum TagCategory {
    Definition,
    Placement,
    Label,
    Export,
    Import,
    Frame,
    Other,
    Unknown,
    /// Tags the interpreter failed on and that were skipped.
    Malformed,
}

impl TagCategory {
    pub fn of(code: TagCode) -> Self {
        match code {
            TagCode::ShowFrame => TagCategory::Frame,
            TagCode::PlaceObject
            | TagCode::PlaceObject2
            | TagCode::PlaceObject3
            | TagCode::RemoveObject
            | TagCode::RemoveObject2 => TagCategory::Placement,
            TagCode::FrameLabel => TagCategory::Label,
            TagCode::ExportAssets => TagCategory::Export,
            TagCode::ImportAssets | TagCode::ImportAssets2 => TagCategory::Import,
            TagCode::DefineShape
            | TagCode::DefineShape2
            | TagCode::DefineShape3
            | TagCode::DefineShape4
            | TagCode::DefineMorphShape
            | TagCode::DefineMorphShape2
            | TagCode::DefineSprite
            | TagCode::DefineFont
            | TagCode::DefineFont2
            | TagCode::DefineFont3
            | TagCode::DefineSound
            | TagCode::DefineBits
            | TagCode::DefineBitsJpeg2
            | TagCode::DefineBitsJpeg3
            | TagCode::DefineBitsJpeg4
            | TagCode::DefineBitsLossless
            | TagCode::DefineBitsLossless2
            | TagCode::DefineBinaryData
            | TagCode::DefineButton
            | TagCode::DefineButton2
            | TagCode::DefineText
            | TagCode::DefineText2
            | TagCode::DefineEditText
            | TagCode::DefineVideoStream
            | TagCode::DefineFont4 => TagCategory::Definition,
            _ => TagCategory::Other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TagCategory::Definition => "definition",
            TagCategory::Placement => "placement",
            TagCategory::Label => "label",
            TagCategory::Export => "export",
            TagCategory::Import => "import",
            TagCategory::Frame => "frame",
            TagCategory::Other => "other",
            TagCategory::Unknown => "unknown",
            TagCategory::Malformed => "malformed",
        }
    }
}

/// State shared between a [`StreamLoader`] and its thread.
pub struct LoaderControl {
    state: AtomicU8,
    cancelled: AtomicBool,
    thread_id: OnceLock<ThreadId>,
}

impl LoaderControl {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(LoadState::NotStarted as u8),
            cancelled: AtomicBool::new(false),
            thread_id: OnceLock::new(),
        }
    }

    pub fn state(&self) -> LoadState {
        LoadState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(LoadState::Failed)
    }

    /// Moves a running loader to its final state.
    pub fn set_state(&self, state: LoadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: LoadState, to: LoadState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Checked by the loader between tags, never in the middle of one.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Marks the loader failed if its job unwinds before reporting a state.
struct StateGuard<'a>(&'a LoaderControl);

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.0.transition(LoadState::Running, LoadState::Failed) {
            warn!("loader thread exited without finishing");
        }
    }
}

/// Owner of the single background thread that loads one stream.
pub struct StreamLoader {
    control: Arc<LoaderControl>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Default for StreamLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamLoader {
    pub fn new() -> Self {
        Self {
            control: Arc::new(LoaderControl::new()),
            thread: Mutex::new(None),
        }
    }

    /// Spawns the loader thread running `job`.
    ///
    /// Returns once the thread's id is recorded and the thread is released,
    /// not once loading is done. `job` reports the final state through
    /// [`LoaderControl::set_state`].
    ///
    /// A loader cancelled before starting stays cancelled and spawns nothing.
    ///
    /// # Panics
    ///
    /// If the loader was already started.
    pub fn start<F>(&self, name: String, job: F) -> io::Result<()>
    where
        F: FnOnce(&LoaderControl) + Send + 'static,
    {
        if !self
            .control
            .transition(LoadState::NotStarted, LoadState::Running)
        {
            // 启动前已被取消则什么都不做
            assert!(
                self.control.state() == LoadState::Cancelled,
                "stream loader started twice"
            );
            debug!("not starting {}, loading was cancelled", name);
            return Ok(());
        }

        // 确保线程开始工作前其 id 已被记录，`is_self_task` 从第一条指令起就正确
        let rendezvous = Arc::new(Barrier::new(2));
        let thread_rendezvous = rendezvous.clone();
        let control = self.control.clone();

        let spawned = thread::Builder::new().name(name).spawn(move || {
            thread_rendezvous.wait();
            let _guard = StateGuard(&control);
            job(&control);
        });

        match spawned {
            Ok(handle) => {
                let _ = self.control.thread_id.set(handle.thread().id());
                *self.thread.lock() = Some(handle);
                rendezvous.wait();
                Ok(())
            }
            Err(err) => {
                self.control.set_state(LoadState::Failed);
                Err(err)
            }
        }
    }

    pub fn started(&self) -> bool {
        self.control.thread_id.get().is_some()
    }

    /// True iff called from this loader's own thread.
    pub fn is_self_task(&self) -> bool {
        self.control
            .thread_id
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    pub fn state(&self) -> LoadState {
        self.control.state()
    }

    /// Asks the thread to stop at the next tag boundary. A loader that never
    /// started is cancelled outright.
    pub fn cancel(&self) {
        self.control.cancelled.store(true, Ordering::Release);
        self.control
            .transition(LoadState::NotStarted, LoadState::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Waits for the thread to exit. Does nothing on the loader thread itself.
    pub fn join(&self) {
        if self.is_self_task() {
            return;
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("loader thread panicked");
            }
        }
    }
}

/// Parses every tag of the movie in order, publishing frames as they close.
///
/// Malformed single tags are logged and skipped. Returns the final state, or
/// the error that made the rest of the stream unreadable.
pub(crate) fn read_all_tags(
    contents: &MovieContents,
    interpreter: &mut dyn TagInterpreter,
    control: &LoaderControl,
) -> Result<LoadState, LoadError> {
    let movie = contents.movie();
    let progress = contents.progress();
    let mut tags = TagStream::new(movie.data(), movie.version());
    let mut timeline = TimelineBuilder::new(contents.timeline().clone());
    let mut end_seen = false;

    loop {
        if control.is_cancelled() {
            debug!(
                "Loading thread cancellation requested, stopping {} at frame {}",
                movie.url(),
                progress.frames_loaded()
            );
            return Ok(LoadState::Cancelled);
        }

        let Some(record) = tags.next_tag()? else {
            break;
        };

        match TagCode::from_u16(record.code) {
            Some(TagCode::End) => {
                end_seen = true;
                break;
            }
            Some(TagCode::ShowFrame) => {
                // 先发布时间轴，再推进帧计数
                let frame = timeline.close_frame();
                progress.increment_frames_loaded();
                contents.count_tag(TagCategory::Frame);
                trace!("Loaded frame {}/{}", frame, progress.total_frames());
            }
            Some(code) => {
                let mut context = TagContext::new(contents, &mut timeline);
                match interpreter.interpret(code, &record, &mut context) {
                    Ok(()) => contents.count_tag(TagCategory::of(code)),
                    Err(err) => {
                        warn!(
                            "Error running tag {:?} at byte {} of {}, skipping: {}",
                            code,
                            record.offset,
                            movie.url(),
                            err
                        );
                        contents.count_tag(TagCategory::Malformed);
                    }
                }
            }
            None => {
                warn!(
                    "Unknown tag code {} at byte {} of {}",
                    record.code,
                    record.offset,
                    movie.url()
                );
                contents.count_tag(TagCategory::Unknown);
            }
        }

        progress.set_bytes_loaded(tags.position());
    }
    progress.set_bytes_loaded(tags.position());

    if !end_seen {
        warn!("{} ended without an End tag", movie.url());
    } else if tags.remaining() > 0 {
        warn!(
            "{} has {} bytes after its End tag",
            movie.url(),
            tags.remaining()
        );
    }
    if timeline.has_pending_changes() {
        warn!("control tags at the end of {} are NOT followed by a SHOWFRAME tag", movie.url());
    }
    let frames_loaded = progress.frames_loaded();
    if progress.total_frames() > frames_loaded {
        warn!(
            "{} frames advertised in header, but only {} SHOWFRAME tags found in {}",
            progress.total_frames(),
            frames_loaded,
            movie.url()
        );
    }

    Ok(LoadState::Completed)
}

#[cfg(test)]
mod test {
    use std::{
        sync::{Arc, mpsc},
        time::Duration,
    };

    use super::*;

    #[test]
    fn load_state_round_trips_through_u8() {
        for state in [
            LoadState::NotStarted,
            LoadState::Running,
            LoadState::Completed,
            LoadState::Cancelled,
            LoadState::Failed,
        ] {
            assert_eq!(LoadState::from_u8(state as u8), Some(state));
        }
        assert_eq!(LoadState::from_u8(200), None);
    }

    #[test]
    fn spawned_thread_knows_itself() {
        let loader = Arc::new(StreamLoader::new());
        let (tx, rx) = mpsc::channel();
        let thread_loader = loader.clone();

        loader
            .start(String::from("self-test"), move |control| {
                // 第一条指令就能识别自身线程
                tx.send(thread_loader.is_self_task()).ok();
                control.set_state(LoadState::Completed);
            })
            .expect("spawn loader");

        assert!(rx.recv_timeout(Duration::from_secs(5)).expect("loader reply"));
        assert!(!loader.is_self_task());
        loader.join();
        assert_eq!(loader.state(), LoadState::Completed);
    }

    #[test]
    #[should_panic(expected = "started twice")]
    fn starting_twice_panics() {
        let loader = StreamLoader::new();
        loader
            .start(String::from("first"), |control| {
                control.set_state(LoadState::Completed)
            })
            .expect("spawn loader");
        let _ = loader.start(String::from("second"), |_| {});
    }

    #[test]
    fn cancel_before_start() {
        let loader = StreamLoader::new();
        loader.cancel();
        assert!(loader.is_cancelled());
        assert_eq!(loader.state(), LoadState::Cancelled);

        loader
            .start(String::from("late"), |control| {
                control.set_state(LoadState::Completed)
            })
            .expect("nothing to spawn");
        assert!(!loader.started());
        assert_eq!(loader.state(), LoadState::Cancelled);
    }

    #[test]
    fn job_without_state_is_failed() {
        let loader = StreamLoader::new();
        loader
            .start(String::from("silent"), |_| {})
            .expect("spawn loader");
        loader.join();
        assert_eq!(loader.state(), LoadState::Failed);
    }

    #[test]
    fn categories() {
        assert_eq!(TagCategory::of(TagCode::DefineSprite), TagCategory::Definition);
        assert_eq!(TagCategory::of(TagCode::PlaceObject2), TagCategory::Placement);
        assert_eq!(TagCategory::of(TagCode::ExportAssets), TagCategory::Export);
        assert_eq!(TagCategory::of(TagCode::DefineEditText), TagCategory::Definition);
        assert_eq!(TagCategory::of(TagCode::DefineVideoStream), TagCategory::Definition);
        assert_eq!(TagCategory::of(TagCode::SetBackgroundColor), TagCategory::Other);
    }
}
