//! An MPEG-2 Transport Stream pipeline core: PSI/PMT codec, MJD time, and
//! the plugin-driven packet pipeline runtime that moves packets from an
//! Input stage through zero or more Processors to an Output stage.

pub mod constants;
pub mod error;
pub mod mjd;
pub mod packet;
pub mod pipeline;
pub mod psi;
pub mod registry;
pub mod report;
pub mod ring;

pub use error::{CoreError, Result};
pub use pipeline::{ExitStatus, Pipeline, Role, StageSpec};
pub use registry::PluginRegistry;
pub use ring::PacketRing;
