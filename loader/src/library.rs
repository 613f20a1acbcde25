use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Weak},
};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::{
    config::LoaderConfig, error::LoadError, interpreter::SwfTagInterpreter,
    movie::MovieDefinition,
};

/// Where the bytes of a movie come from, by url.
pub trait StreamSource: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError>;
}

/// Reads movies from disk, relative urls resolved against `base`.
#[derive(Debug, Clone)]
pub struct FileSource {
    base: PathBuf,
}

impl FileSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl StreamSource for FileSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let path = self.base.join(url.strip_prefix("file://").unwrap_or(url));
        debug!("reading {}", path.display());
        Ok(std::fs::read(path)?)
    }
}

/// Movies held in memory, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySource {
    streams: Mutex<HashMap<String, Arc<[u8]>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, data: impl Into<Arc<[u8]>>) {
        self.streams.lock().insert(url.to_owned(), data.into());
    }
}

impl StreamSource for MemorySource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        self.streams
            .lock()
            .get(url)
            .map(|data| data.to_vec())
            .ok_or_else(|| LoadError::NotFound(url.to_owned()))
    }
}

/// Every movie loaded so far, keyed by url, so that imports of the same url
/// share one loader.
///
/// Loader threads reach the library through a weak handle; dropping the last
/// [`Arc<Library>`] cancels every movie still loading.
pub struct Library {
    source: Box<dyn StreamSource>,
    config: LoaderConfig,
    movies: Mutex<IndexMap<String, Arc<MovieDefinition>>>,
    this: Weak<Library>,
}

impl Library {
    pub fn new(source: impl StreamSource + 'static, config: LoaderConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            source: Box::new(source),
            config,
            movies: Mutex::new(IndexMap::new()),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn get(&self, url: &str) -> Option<Arc<MovieDefinition>> {
        self.movies.lock().get(url).cloned()
    }

    /// Movies in the order they were first requested.
    pub fn movies(&self) -> Vec<Arc<MovieDefinition>> {
        self.movies.lock().values().cloned().collect()
    }

    /// Returns the movie for `url`, fetching it and starting its loader on
    /// first request.
    ///
    /// Only the header is read before returning; use
    /// [`MovieDefinition::ensure_frame_loaded`] to wait for content.
    pub fn load(&self, url: &str) -> Result<Arc<MovieDefinition>, LoadError> {
        if let Some(movie) = self.get(url) {
            return Ok(movie);
        }

        let data = self.source.fetch(url)?;
        let movie = Arc::new(MovieDefinition::from_data(url, &data, self.config.clone())?);

        // 获取数据期间其他线程可能已加载同一个 url
        let (movie, fresh) = {
            let mut movies = self.movies.lock();
            match movies.get(url) {
                Some(existing) => (existing.clone(), false),
                None => {
                    movies.insert(url.to_owned(), movie.clone());
                    (movie, true)
                }
            }
        };

        if fresh {
            let interpreter = SwfTagInterpreter::with_library(self.this.clone(), self.config.resolve);
            if !movie.start_with(interpreter) {
                error!("{} will never load", url);
            }
        }
        Ok(movie)
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        // 先全部取消，互相导入的影片不必等待对方超时
        for movie in self.movies.get_mut().values() {
            movie.cancel();
        }
    }
}
