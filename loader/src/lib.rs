//! Progressive loading of SWF movies.
//!
//! A [`MovieDefinition`] reads its stream on a dedicated thread, publishing
//! characters, exports and timeline frames as each frame closes. Consumers on
//! other threads block on [`MovieDefinition::ensure_frame_loaded`] and read
//! whatever is already there without waiting for the rest.

pub mod character;
pub mod config;
pub mod error;
pub mod import;
pub mod interpreter;
pub mod library;
pub mod loader;
pub mod movie;
pub mod tag_utils;

#[cfg(test)]
mod test_utils;

pub use character::{Character, Definition, Resource};
pub use config::{LoaderConfig, NameMatching, ResolvePolicy};
pub use error::{InterpretError, LoadError, ResolveError, WaitError};
pub use import::{import_resources, resolve_export};
pub use interpreter::{SwfTagInterpreter, TagContext, TagInterpreter};
pub use library::{FileSource, Library, MemorySource, StreamSource};
pub use loader::{LoadState, StreamLoader, TagCategory};
pub use movie::{
    Collector, ExportTable, LoadReport, MovieDefinition, ProgressTracker, ResourceDictionary,
    Timeline,
};
pub use tag_utils::SwfMovie;
