mod dictionary;
mod exports;
mod progress;
mod timeline;

use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
    time::Duration,
};

use enum_map::EnumMap;
use parking_lot::Mutex;
use serde::Serialize;
use swf::CharacterId;
use tracing::{error, info, warn};

pub use dictionary::ResourceDictionary;
pub use exports::{ExportEntry, ExportTable};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use timeline::{Timeline, TimelineBuilder};

use crate::{
    character::Resource,
    config::LoaderConfig,
    error::{LoadError, WaitError},
    interpreter::{SwfTagInterpreter, TagInterpreter},
    loader::{LoadState, StreamLoader, TagCategory, read_all_tags},
    tag_utils::SwfMovie,
};

/// Everything the loader thread writes and consumers read.
pub struct MovieContents {
    movie: SwfMovie,
    dictionary: ResourceDictionary,
    exports: ExportTable,
    timeline: Arc<Timeline>,
    progress: ProgressTracker,
    import_sources: Mutex<Vec<Weak<MovieDefinition>>>,
    tag_counts: Mutex<EnumMap<TagCategory, u32>>,
    last_error: Mutex<Option<LoadError>>,
}

impl MovieContents {
    fn new(movie: SwfMovie, config: &LoaderConfig) -> Self {
        let progress = ProgressTracker::new(movie.num_frames() as usize, movie.data().len());
        Self {
            movie,
            dictionary: ResourceDictionary::new(),
            exports: ExportTable::new(config.export_names),
            timeline: Arc::new(Timeline::new()),
            progress,
            import_sources: Mutex::new(Vec::new()),
            tag_counts: Mutex::new(EnumMap::default()),
            last_error: Mutex::new(None),
        }
    }

    pub fn movie(&self) -> &SwfMovie {
        &self.movie
    }
    pub fn dictionary(&self) -> &ResourceDictionary {
        &self.dictionary
    }
    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub(crate) fn count_tag(&self, category: TagCategory) {
        self.tag_counts.lock()[category] += 1;
    }

    /// Records `source` once. Only a weak handle is kept: movies importing
    /// from each other must not keep each other alive, the owning library
    /// does that.
    pub(crate) fn add_import_source(&self, source: &Arc<MovieDefinition>) {
        let source = Arc::downgrade(source);
        let mut sources = self.import_sources.lock();
        if !sources.iter().any(|known| Weak::ptr_eq(known, &source)) {
            sources.push(source);
        }
    }

    fn set_last_error(&self, err: LoadError) {
        *self.last_error.lock() = Some(err);
    }
}

/// Receives every resource a movie keeps reachable.
pub trait Collector {
    fn mark_reachable(&mut self, resource: &Resource);
}

impl<F: FnMut(&Resource)> Collector for F {
    fn mark_reachable(&mut self, resource: &Resource) {
        self(resource)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CharacterSummary {
    pub id: CharacterId,
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub name: String,
    pub id: CharacterId,
    pub kind: &'static str,
}

/// Serializable picture of a movie's load, complete or not.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub url: String,
    pub version: u8,
    pub frame_rate: f32,
    pub stage_width: f64,
    pub stage_height: f64,
    pub state: LoadState,
    pub error: Option<String>,
    pub progress: ProgressSnapshot,
    pub characters: Vec<CharacterSummary>,
    pub exports: Vec<ExportSummary>,
    pub labels: Vec<(String, usize)>,
    pub imports: Vec<String>,
    pub tags: BTreeMap<&'static str, u32>,
}

/// A movie being (or done being) loaded progressively by its own thread.
///
/// Every accessor is safe to call from any thread while loading runs. Frames
/// are readable once [`MovieDefinition::ensure_frame_loaded`] said so.
pub struct MovieDefinition {
    contents: Arc<MovieContents>,
    loader: StreamLoader,
    config: LoaderConfig,
}

impl MovieDefinition {
    /// Reads the header of `data`. Loading does not begin until [`Self::start`].
    pub fn from_data(url: &str, data: &[u8], config: LoaderConfig) -> Result<Self, LoadError> {
        Ok(Self::from_movie(SwfMovie::from_data(url, data)?, config))
    }

    pub fn from_movie(movie: SwfMovie, config: LoaderConfig) -> Self {
        Self {
            contents: Arc::new(MovieContents::new(movie, &config)),
            loader: StreamLoader::new(),
            config,
        }
    }

    /// Starts loading with the standard interpreter, without import support.
    pub fn start(&self) -> bool {
        self.start_with(SwfTagInterpreter::new(self.config.resolve))
    }

    /// Starts the loader thread feeding every tag to `interpreter`.
    ///
    /// Returns false if the thread could not be spawned; the movie is then
    /// failed and [`Self::last_error`] says why.
    ///
    /// # Panics
    ///
    /// If loading was already started.
    pub fn start_with(&self, interpreter: impl TagInterpreter + 'static) -> bool {
        let contents = self.contents.clone();
        let name = self.config.thread_name(contents.movie.url());
        let mut interpreter = interpreter;

        let spawned = self.loader.start(name, move |control| {
            let _finish = FinishGuard(&contents);
            let state = match read_all_tags(&contents, &mut interpreter, control) {
                Ok(state) => state,
                Err(err) => {
                    error!("Error while parsing SWF stream {}: {}", contents.movie.url(), err);
                    contents.set_last_error(err);
                    LoadState::Failed
                }
            };
            control.set_state(state);
            contents.progress.finish(state);
            if state == LoadState::Completed {
                info!(
                    "Loaded {} ({} frames, {} characters)",
                    contents.movie.url(),
                    contents.progress.frames_loaded(),
                    contents.dictionary.len()
                );
            }
        });

        match spawned {
            Ok(()) => true,
            Err(err) => {
                error!("Could not start loading thread for {}: {}", self.url(), err);
                self.contents.set_last_error(LoadError::Spawn(Arc::new(err)));
                self.contents.progress.finish(LoadState::Failed);
                false
            }
        }
    }

    pub fn url(&self) -> &str {
        self.contents.movie.url()
    }
    pub fn version(&self) -> u8 {
        self.contents.movie.version()
    }
    pub fn frame_rate(&self) -> f32 {
        self.contents.movie.frame_rate().to_f32()
    }
    pub fn movie(&self) -> &SwfMovie {
        &self.contents.movie
    }
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Frame count from the header, never less than one.
    pub fn total_frames(&self) -> usize {
        self.contents.progress.total_frames()
    }
    pub fn frames_loaded(&self) -> usize {
        self.contents.progress.frames_loaded()
    }
    pub fn bytes_loaded(&self) -> usize {
        self.contents.progress.bytes_loaded()
    }
    pub fn bytes_total(&self) -> usize {
        self.contents.progress.bytes_total()
    }

    pub fn dictionary(&self) -> &ResourceDictionary {
        &self.contents.dictionary
    }
    pub fn exports(&self) -> &ExportTable {
        &self.contents.exports
    }
    pub fn timeline(&self) -> &Timeline {
        &self.contents.timeline
    }
    pub fn progress(&self) -> &ProgressTracker {
        &self.contents.progress
    }

    /// Looks up a character. `None` both for unknown ids and ids the loader
    /// has not reached yet.
    pub fn lookup(&self, id: CharacterId) -> Option<Resource> {
        self.contents.dictionary.lookup(id)
    }

    pub fn labeled_frame(&self, label: &str) -> Option<usize> {
        self.contents.timeline.labeled_frame(label)
    }

    /// Blocks until `frame` (1-based) has been loaded.
    ///
    /// False if loading ended first, or if called from this movie's own
    /// loader thread, which can never make progress while it waits.
    pub fn ensure_frame_loaded(&self, frame: usize) -> bool {
        self.wait_for_frame(frame, None).is_ok()
    }

    pub fn ensure_frame_loaded_timeout(&self, frame: usize, timeout: Duration) -> bool {
        self.wait_for_frame(frame, Some(timeout)).is_ok()
    }

    pub fn wait_for_frame(&self, frame: usize, timeout: Option<Duration>) -> Result<(), WaitError> {
        if frame <= self.frames_loaded() {
            return Ok(());
        }
        if self.loader.is_self_task() {
            error!(
                "Frame {} of {} requested from its own loader thread at frame {}",
                frame,
                self.url(),
                self.frames_loaded()
            );
            return Err(WaitError::SelfWait { frame });
        }
        if !self.loader.started() && !self.contents.progress.is_finished() {
            warn!("Waiting for frame {} of {} which was never started", frame, self.url());
        }
        self.contents.progress.wait_for_frame(frame, timeout)
    }

    /// Stops loading at the next tag boundary and releases every waiter.
    /// Frames already loaded stay readable.
    pub fn cancel(&self) {
        self.loader.cancel();
        self.contents.progress.finish(LoadState::Cancelled);
    }

    /// Blocks until the loader thread has exited and returns how loading
    /// ended. Returns at once on the loader thread itself or if loading never
    /// started.
    pub fn wait_until_finished(&self) -> LoadState {
        self.loader.join();
        self.load_state()
    }

    /// True once every tag was loaded.
    pub fn is_complete(&self) -> bool {
        self.load_state() == LoadState::Completed
    }

    pub fn load_state(&self) -> LoadState {
        self.loader.state()
    }

    pub fn last_error(&self) -> Option<LoadError> {
        self.contents.last_error.lock().clone()
    }

    /// Whether the caller is running on this movie's loader thread.
    pub fn is_self_task(&self) -> bool {
        self.loader.is_self_task()
    }

    /// Movies this one imported from that are still alive.
    pub fn import_sources(&self) -> Vec<Arc<MovieDefinition>> {
        self.contents
            .import_sources
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn tag_counts(&self) -> EnumMap<TagCategory, u32> {
        self.contents.tag_counts.lock().clone()
    }

    /// Hands `collector` every resource held by the dictionary and the
    /// export table. Import sources are left to the caller, see
    /// [`Self::import_sources`].
    pub fn mark_reachable_resources(&self, collector: &mut dyn Collector) {
        self.contents
            .dictionary
            .for_each_resource(|_, resource| collector.mark_reachable(resource));
        self.contents
            .exports
            .for_each_export(|entry| collector.mark_reachable(&entry.resource));
    }

    pub fn report(&self) -> LoadReport {
        let mut characters = Vec::new();
        self.contents.dictionary.for_each_resource(|id, resource| {
            characters.push(CharacterSummary {
                id,
                kind: resource.kind(),
            })
        });
        let mut exports = Vec::new();
        self.contents.exports.for_each_export(|entry| {
            exports.push(ExportSummary {
                name: entry.name.clone(),
                id: entry.id,
                kind: entry.resource.kind(),
            })
        });
        let stage = self.contents.movie.stage_size();

        LoadReport {
            url: self.url().to_owned(),
            version: self.version(),
            frame_rate: self.frame_rate(),
            stage_width: (stage.x_max - stage.x_min).to_pixels(),
            stage_height: (stage.y_max - stage.y_min).to_pixels(),
            state: self.load_state(),
            error: self.last_error().map(|err| err.to_string()),
            progress: self.contents.progress.snapshot(),
            characters,
            exports,
            labels: self.contents.timeline.labels(),
            imports: self
                .import_sources()
                .iter()
                .map(|source| source.url().to_owned())
                .collect(),
            tags: self
                .tag_counts()
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(category, count)| (category.name(), *count))
                .collect(),
        }
    }
}

impl Drop for MovieDefinition {
    fn drop(&mut self) {
        self.cancel();
        // 从加载线程自身释放时不能 join 自己
        self.loader.join();
    }
}

/// Releases waiters even if the loader thread unwinds.
struct FinishGuard<'a>(&'a MovieContents);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.progress.finish(LoadState::Failed);
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{Arc, Barrier, mpsc},
        thread,
        time::Duration,
    };

    use anyhow::Result;
    use swf::TagCode;

    use super::*;
    use crate::{
        character::{BinaryDataDefinition, Character},
        error::InterpretError,
        interpreter::TagContext,
        tag_utils::TagRecord,
        test_utils::SwfBuilder,
    };

    fn load(bytes: &[u8]) -> Result<MovieDefinition> {
        let movie = MovieDefinition::from_data("test.swf", bytes, LoaderConfig::default())?;
        assert!(movie.start());
        Ok(movie)
    }

    #[test]
    fn loads_every_frame() -> Result<()> {
        let bytes = SwfBuilder::new(10, 3)
            .define_binary_data(1, b"hello")
            .place_object(1, 1)
            .show_frame()
            .remove_object(1)
            .show_frame()
            .show_frame()
            .end()
            .build();
        let movie = load(&bytes)?;

        assert!(movie.ensure_frame_loaded(3));
        movie.wait_until_finished();
        assert!(movie.is_complete());
        assert_eq!(movie.frames_loaded(), 3);
        assert_eq!(movie.bytes_loaded(), movie.bytes_total());
        assert_eq!(movie.timeline().depths_at(1), Some([1].into()));
        assert_eq!(movie.timeline().depths_at(2), Some([].into()));
        assert!(matches!(
            movie.lookup(1).as_deref(),
            Some(Character::BinaryData(BinaryDataDefinition { data, .. })) if data == b"hello"
        ));
        assert_eq!(movie.tag_counts()[TagCategory::Frame], 3);
        assert_eq!(movie.tag_counts()[TagCategory::Placement], 2);
        Ok(())
    }

    #[test]
    fn missing_frames_are_never_loaded() -> Result<()> {
        let mut builder = SwfBuilder::new(10, 10);
        for _ in 0..3 {
            builder = builder.show_frame();
        }
        let movie = load(&builder.end().build())?;

        assert!(!movie.ensure_frame_loaded(10));
        assert!(movie.ensure_frame_loaded(3));
        assert_eq!(movie.frames_loaded(), 3);
        assert!(matches!(
            movie.wait_for_frame(4, None),
            Err(WaitError::Unavailable { frames_loaded: 3, state: LoadState::Completed, .. })
        ));
        Ok(())
    }

    #[test]
    fn extra_frames_are_loaded() -> Result<()> {
        let bytes = SwfBuilder::new(10, 1).show_frame().show_frame().end().build();
        let movie = load(&bytes)?;

        assert!(movie.ensure_frame_loaded(2));
        assert_eq!(movie.total_frames(), 1);
        Ok(())
    }

    #[test]
    fn labels_and_exports() -> Result<()> {
        let bytes = SwfBuilder::new(10, 2)
            .define_binary_data(7, b"hero")
            .export_assets(&[(7, "Hero")])
            .show_frame()
            .frame_label("Walk")
            .show_frame()
            .end()
            .build();
        let movie = load(&bytes)?;

        assert!(movie.ensure_frame_loaded(2));
        assert_eq!(movie.labeled_frame("walk"), Some(2));
        assert_eq!(movie.labeled_frame("run"), None);
        assert!(movie.exports().lookup("hero").is_some());
        assert_eq!(movie.exports().export_id("HERO"), Some(7));
        Ok(())
    }

    #[test]
    fn bad_tags_are_skipped() -> Result<()> {
        let bytes = SwfBuilder::new(10, 2)
            // 未知标签码
            .tag(1000, &[1, 2, 3])
            // 截断的 DefineBinaryData
            .tag(87, &[9])
            .show_frame()
            .define_binary_data(2, b"ok")
            .show_frame()
            .end()
            .build();
        let movie = load(&bytes)?;

        assert!(movie.ensure_frame_loaded(2));
        movie.wait_until_finished();
        assert!(movie.is_complete());
        assert!(movie.lookup(2).is_some());
        assert_eq!(movie.tag_counts()[TagCategory::Unknown], 1);
        assert_eq!(movie.tag_counts()[TagCategory::Malformed], 1);
        Ok(())
    }

    #[test]
    fn out_of_bounds_tag_fails_the_stream() -> Result<()> {
        // 声称 0x3e 字节但只剩 2 字节
        let bytes = SwfBuilder::new(10, 3)
            .show_frame()
            .raw(&((87u16 << 6) | 0x3e).to_le_bytes())
            .raw(&[0, 0])
            .build();
        let movie = load(&bytes)?;

        assert!(!movie.ensure_frame_loaded(2));
        movie.wait_until_finished();
        assert_eq!(movie.frames_loaded(), 1);
        assert_eq!(movie.load_state(), LoadState::Failed);
        assert!(matches!(
            movie.last_error(),
            Some(LoadError::TagOutOfBounds { code: 87, .. })
        ));
        Ok(())
    }

    #[test]
    fn nested_sprite_timeline() -> Result<()> {
        let sprite = SwfBuilder::new(10, 2)
            .place_object(1, 1)
            .frame_label("Spin")
            .show_frame()
            .place_object(2, 1)
            .show_frame()
            .end();
        let bytes = SwfBuilder::new(10, 1)
            .define_binary_data(1, b"x")
            .define_sprite(5, sprite)
            .place_object(1, 5)
            .show_frame()
            .end()
            .build();
        let movie = load(&bytes)?;

        assert!(movie.ensure_frame_loaded(1));
        let resource = movie.lookup(5).expect("sprite defined");
        let sprite = resource.as_sprite().expect("a sprite");
        assert_eq!(sprite.num_frames, 2);
        assert_eq!(sprite.timeline.frame_count(), 2);
        assert_eq!(sprite.timeline.depths_at(2), Some([1, 2].into()));
        assert_eq!(sprite.timeline.labeled_frame("spin"), Some(1));
        // 子时间轴不影响主时间轴
        assert_eq!(movie.timeline().depths_at(1), Some([1].into()));
        assert_eq!(movie.labeled_frame("spin"), None);
        Ok(())
    }

    /// Lets the test hold the loader inside a chosen frame.
    struct Gate {
        rx: mpsc::Receiver<()>,
    }

    impl TagInterpreter for Gate {
        fn interpret(
            &mut self,
            code: TagCode,
            record: &TagRecord<'_>,
            context: &mut TagContext<'_>,
        ) -> Result<(), InterpretError> {
            if code == TagCode::DefineBinaryData {
                self.rx
                    .recv()
                    .map_err(|_| InterpretError::Unsupported(String::from("gate closed")))?;
                let id = u16::from_le_bytes([record.body[0], record.body[1]]);
                let data = record.body[6..].to_vec();
                context.define(id, Arc::new(Character::BinaryData(BinaryDataDefinition { id, data })));
            }
            Ok(())
        }
    }

    #[test]
    fn waiters_on_different_frames_all_wake() -> Result<()> {
        let mut builder = SwfBuilder::new(10, 3);
        for id in 1..=3 {
            builder = builder.define_binary_data(id, b"").show_frame();
        }
        let movie = Arc::new(MovieDefinition::from_data(
            "gated.swf",
            &builder.end().build(),
            LoaderConfig::default(),
        )?);
        let (tx, rx) = mpsc::channel();
        assert!(movie.start_with(Gate { rx }));

        let ready = Arc::new(Barrier::new(4));
        let waiters: Vec<_> = (1..=3)
            .map(|frame| {
                let movie = movie.clone();
                let ready = ready.clone();
                thread::spawn(move || {
                    ready.wait();
                    let loaded = movie.ensure_frame_loaded(frame);
                    // 帧加载后其定义必须可见
                    loaded && movie.lookup(frame as u16).is_some()
                })
            })
            .collect();

        ready.wait();
        assert_eq!(movie.frames_loaded(), 0);
        for _ in 0..3 {
            tx.send(())?;
        }
        for waiter in waiters {
            assert!(waiter.join().expect("waiter thread"));
        }
        Ok(())
    }

    #[test]
    fn cancel_releases_waiters() -> Result<()> {
        let bytes = SwfBuilder::new(10, 2)
            .show_frame()
            .define_binary_data(1, b"")
            .show_frame()
            .end()
            .build();
        let movie = Arc::new(MovieDefinition::from_data("cancel.swf", &bytes, LoaderConfig::default())?);
        let (tx, rx) = mpsc::channel();
        assert!(movie.start_with(Gate { rx }));

        assert!(movie.ensure_frame_loaded(1));
        let waiter = {
            let movie = movie.clone();
            thread::spawn(move || movie.ensure_frame_loaded(2))
        };
        thread::sleep(Duration::from_millis(50));
        movie.cancel();
        assert!(!waiter.join().expect("waiter thread"));

        // 放行被阻塞的标签，线程在下一个标签边界退出
        tx.send(()).ok();
        movie.wait_until_finished();
        assert_eq!(movie.load_state(), LoadState::Cancelled);
        assert_eq!(movie.frames_loaded(), 1);
        assert!(movie.timeline().depths_at(1).is_some());
        Ok(())
    }

    #[test]
    fn drop_stops_the_loader() -> Result<()> {
        let bytes = SwfBuilder::new(10, 1)
            .define_binary_data(1, b"")
            .show_frame()
            .end()
            .build();
        let movie = MovieDefinition::from_data("drop.swf", &bytes, LoaderConfig::default())?;
        let (tx, rx) = mpsc::channel();
        assert!(movie.start_with(Gate { rx }));
        // 发送端关闭后解释器返回错误，随后线程看到取消标志
        drop(tx);
        drop(movie);
        Ok(())
    }

    struct SelfWaiter {
        movie: mpsc::Receiver<Arc<MovieDefinition>>,
        result: mpsc::Sender<Result<(), WaitError>>,
    }

    impl TagInterpreter for SelfWaiter {
        fn interpret(
            &mut self,
            code: TagCode,
            _record: &TagRecord<'_>,
            _context: &mut TagContext<'_>,
        ) -> Result<(), InterpretError> {
            if code == TagCode::DefineBinaryData {
                if let Ok(movie) = self.movie.recv() {
                    self.result.send(movie.wait_for_frame(2, None)).ok();
                }
            }
            Ok(())
        }
    }

    #[test]
    fn loader_cannot_wait_on_itself() -> Result<()> {
        let bytes = SwfBuilder::new(10, 2)
            .define_binary_data(1, b"")
            .show_frame()
            .show_frame()
            .end()
            .build();
        let movie = Arc::new(MovieDefinition::from_data("self.swf", &bytes, LoaderConfig::default())?);
        let (movie_tx, movie_rx) = mpsc::channel();
        let (result_tx, result_rx) = mpsc::channel();
        assert!(movie.start_with(SelfWaiter {
            movie: movie_rx,
            result: result_tx,
        }));
        movie_tx.send(movie.clone())?;

        let result = result_rx.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(result, Err(WaitError::SelfWait { frame: 2 }));
        assert!(movie.ensure_frame_loaded(2));
        Ok(())
    }

    #[test]
    fn collector_sees_every_resource() -> Result<()> {
        let bytes = SwfBuilder::new(10, 1)
            .define_binary_data(1, b"a")
            .define_binary_data(2, b"b")
            .export_assets(&[(2, "b")])
            .show_frame()
            .end()
            .build();
        let movie = load(&bytes)?;
        assert!(movie.ensure_frame_loaded(1));

        let mut seen = Vec::new();
        movie.mark_reachable_resources(&mut |resource: &Resource| seen.push(resource.id()));
        seen.sort();
        assert_eq!(seen, vec![1, 2, 2]);
        Ok(())
    }

    #[test]
    fn report_is_json() -> Result<()> {
        let bytes = SwfBuilder::new(10, 1)
            .define_binary_data(3, b"abc")
            .export_assets(&[(3, "Data")])
            .frame_label("start")
            .show_frame()
            .end()
            .build();
        let movie = load(&bytes)?;
        assert!(movie.ensure_frame_loaded(1));
        movie.wait_until_finished();

        let report = serde_json::to_value(movie.report())?;
        assert_eq!(report["state"], "Completed");
        assert_eq!(report["progress"]["frames_loaded"], 1);
        assert_eq!(report["characters"][0]["kind"], "binary_data");
        assert_eq!(report["exports"][0]["name"], "Data");
        assert_eq!(report["labels"][0][0], "start");
        assert_eq!(report["tags"]["definition"], 1);
        Ok(())
    }
}
