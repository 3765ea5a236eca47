//! Error taxonomy for the pipeline core.
//!
//! The PSI/MJD codecs never propagate these — malformed input there becomes
//! an invalid result (`_is_valid = false`), not an `Err`. `CoreError` covers
//! everything downstream: the registry, the ring, the stage runtime, and the
//! controller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed binary input: bad CRC, short section, bad MJD, bad BCD.
    #[error("format error: {0}")]
    Format(String),

    /// A single-section table's serialized payload would overflow the
    /// section it is constrained to.
    #[error("invariant error: {0}")]
    Invariant(String),

    /// A plugin name has no registered allocator, and dynamic loading
    /// either is disallowed or also failed.
    #[error("registry error: {0}")]
    Registry(String),

    /// A plugin's `start()` returned false.
    #[error("plugin '{name}' rejected start")]
    PluginStart { name: String },

    /// A plugin failed to read or write during `receive`/`process`/`send`.
    #[error("io error in plugin '{plugin}': {source}")]
    Io {
        plugin: String,
        #[source]
        source: std::io::Error,
    },

    /// Uncaught failure of a stage worker; aborts the whole pipeline.
    #[error("fatal error in stage '{stage}': {reason}")]
    Fatal { stage: String, reason: String },
}

impl CoreError {
    /// True if an `Io` error should be demoted to a quiet shutdown rather
    /// than a hard abort, per spec: EPIPE/ERROR_BROKEN_PIPE when the plugin
    /// opted to ignore aborts.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, CoreError::Io { source, .. } if source.kind() == std::io::ErrorKind::BrokenPipe)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
