use std::{io, sync::Arc};

use swf::CharacterId;
use thiserror::Error;

use crate::loader::LoadState;

/// Errors that stop a stream from loading.
///
/// Cloneable so the same error can be handed to every consumer that asks for
/// `last_error()` after the loader thread is gone.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("Couldn't read SWF header: {0}")]
    InvalidHeader(#[source] Arc<swf::error::Error>),

    #[error("IO Error: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("Couldn't spawn loader thread: {0}")]
    Spawn(#[source] Arc<io::Error>),

    #[error("Truncated tag header at byte {offset}")]
    TruncatedTag { offset: usize },

    #[error("Tag {code} at byte {offset} claims {length} bytes but only {available} remain")]
    TagOutOfBounds {
        code: u16,
        offset: usize,
        length: usize,
        available: usize,
    },

    #[error("Movie `{0}` not found")]
    NotFound(String),
}

impl From<swf::error::Error> for LoadError {
    fn from(err: swf::error::Error) -> Self {
        LoadError::InvalidHeader(Arc::new(err))
    }
}

impl From<io::Error> for LoadError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            LoadError::NotFound(err.to_string())
        } else {
            LoadError::Io(Arc::new(err))
        }
    }
}

/// Why a wait for a frame did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("Frame {frame} requested from the loader thread that has to produce it")]
    SelfWait { frame: usize },

    #[error("Timed out waiting for frame {frame} ({frames_loaded} loaded)")]
    TimedOut { frame: usize, frames_loaded: usize },

    #[error("Frame {frame} will never load: loading is {state:?} after {frames_loaded} frames")]
    Unavailable {
        frame: usize,
        frames_loaded: usize,
        state: LoadState,
    },
}

/// Why an export could not be resolved from another stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Export `{name}` requested from the loader thread of `{url}`")]
    SelfWait { name: String, url: String },

    #[error("No export symbol `{name}` found in movie `{url}`. Frames loaded {frames_loaded}/{total_frames}")]
    NotExported {
        name: String,
        url: String,
        frames_loaded: usize,
        total_frames: usize,
    },

    #[error("Timeout ({waited_ms} milliseconds) seeking export symbol `{name}` in movie `{url}`. Frames loaded {frames_loaded}/{total_frames}")]
    TimedOut {
        name: String,
        url: String,
        waited_ms: u128,
        frames_loaded: usize,
        total_frames: usize,
    },
}

/// Errors raised by a tag interpreter for a single tag. These are never
/// fatal for the stream: the loader logs them and moves to the next tag.
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("Couldn't decode tag: {0}")]
    Swf(#[from] swf::error::Error),

    #[error("Couldn't read bitmap {id}: {source}")]
    Bitmap {
        id: CharacterId,
        #[source]
        source: crate::interpreter::decode::Error,
    },

    #[error("Unsupported tag: {0}")]
    Unsupported(String),

    #[error("Tag {0} is too short to hold a character id")]
    MissingId(u16),
}
