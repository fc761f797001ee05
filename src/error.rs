// src/error.rs
//! Error handling for the state cache crate.
//!
//! Nothing here ever reaches a render thread: the cache is an optimization, so
//! every failure is logged and degraded into "behave as if the cache were empty".
//! The variants exist so the load path, the writer and the backend boundary can
//! report *why* they fell back.

use thiserror::Error;

/// Main error type. Send + Sync + 'static so it can cross worker threads.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O errors (cache file missing, unwritable temp dir, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The cache file was written by a build with a different key layout.
    #[error(
        "state cache layout mismatch: found version {found_version} key size {found_key_size}, \
         expected version {expected_version} key size {expected_key_size}"
    )]
    LayoutMismatch {
        found_version: u32,
        found_key_size: u32,
        expected_version: u32,
        expected_key_size: u32,
    },

    /// The backend refused to compile a pipeline.
    #[error("pipeline compilation failed: {0}")]
    Compile(String),

    /// The requested state vector cannot be used with the pipeline's shaders.
    #[error("invalid pipeline state: {0}")]
    InvalidState(String),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    #[inline]
    pub fn compile<S: Into<String>>(msg: S) -> Self {
        Self::Compile(msg.into())
    }

    /// Add context to any error, like `.context()` in anyhow.
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    #[inline]
    pub fn is_io(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::WithContext { source, .. } => source.is_io(),
            _ => false,
        }
    }

    /// True for a missing cache file, which is a normal first run and not a failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Error::WithContext { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    #[inline]
    pub fn is_layout_mismatch(&self) -> bool {
        match self {
            Error::LayoutMismatch { .. } => true,
            Error::WithContext { source, .. } => source.is_layout_mismatch(),
            _ => false,
        }
    }
}

/// Convenient `Result` alias, use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;
