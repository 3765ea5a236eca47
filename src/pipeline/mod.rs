//! The pipeline runtime: stages, their termination rendezvous, and the
//! controller that wires them to a ring (spec §4.6–§4.8).

pub mod controller;
pub mod coordinator;
pub mod stage;

pub use controller::{ExitStatus, Pipeline, StageSpec};
pub use coordinator::{StageState, TerminationCoordinator};
pub use stage::{InputPlugin, OutputPlugin, ProcessorPlugin, Role, StageHandle, StageOutcome, Verdict};
