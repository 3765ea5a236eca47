//! The Pipeline Controller (spec §4.8 "Pipeline Controller", §6 "Controller
//! surface").
//!
//! Grounded on the shape of the teacher's `core::run`/`core::run_broadcast`
//! (own the shared state, spawn the worker, wait, report a result) scaled
//! up from one worker to N stages, and on rust-srec's `run_completion`
//! first-error-wins aggregation for turning N stage outcomes into one exit
//! status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::{CoreError, Result};
use crate::pipeline::coordinator::TerminationCoordinator;
use crate::pipeline::stage::{self, InputPlugin, OutputPlugin, ProcessorPlugin, Role, StageHandle, StageOutcome};
use crate::registry::PluginRegistry;
use crate::report::ReportSink;
use crate::ring::PacketRing;

/// One entry of a pipeline build request (spec §3 "Plugin Entry", §6
/// `build(stages: list<{name, role, args}>)`).
///
/// `args` are plugin-specific configuration; the core looks a plugin up by
/// `name` and `role` only and passes `args` through unused — configuring
/// the concrete plugin instance is the plugin's own concern, out of scope
/// here (spec §1 Non-goals: "the concrete I/O plugins").
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: String,
    pub role: Role,
    pub args: Vec<String>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self { name: name.into(), role, args: Vec::new() }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// Aggregate result of one pipeline run (spec §6 "Exit status distinguishes
/// clean EOF, aborted, joint-terminated, and fatal error").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    CleanEof,
    Aborted,
    JointTerminated,
    Fatal,
}

enum BoundPlugin {
    Input(Box<dyn InputPlugin>),
    Processor(Box<dyn ProcessorPlugin>),
    Output(Box<dyn OutputPlugin>),
}

struct BoundStage {
    plugin: BoundPlugin,
    handle: Arc<StageHandle>,
}

/// Owns the Ring, Coordinator, and every stage worker for one pipeline run.
pub struct Pipeline {
    ring: Arc<PacketRing>,
    coordinator: Arc<TerminationCoordinator>,
    report: Arc<dyn ReportSink>,
    stages: Mutex<Vec<Option<BoundStage>>>,
    aborted: Arc<AtomicBool>,
}

impl Pipeline {
    /// Builds every stage from the registry by name. Index 0 must be
    /// `Role::Input`, the last must be `Role::Output`, everything between
    /// `Role::Processor` — the binding order spec §4.8 calls "stages 0..n
    /// in order".
    pub fn build(
        specs: &[StageSpec],
        buffer_capacity: usize,
        registry: &PluginRegistry,
        report: Arc<dyn ReportSink>,
    ) -> Result<Pipeline> {
        if specs.len() < 2 {
            return Err(CoreError::Registry(
                "a pipeline needs at least an Input stage and an Output stage".into(),
            ));
        }
        if specs[0].role != Role::Input {
            return Err(CoreError::Registry("the first stage must have Role::Input".into()));
        }
        if specs.last().unwrap().role != Role::Output {
            return Err(CoreError::Registry("the last stage must have Role::Output".into()));
        }
        for spec in &specs[1..specs.len() - 1] {
            if spec.role != Role::Processor {
                return Err(CoreError::Registry(format!(
                    "stage '{}' between Input and Output must have Role::Processor",
                    spec.name
                )));
            }
        }

        let coordinator = Arc::new(TerminationCoordinator::new());
        let mut stages = Vec::with_capacity(specs.len());
        for spec in specs {
            let handle = Arc::new(StageHandle::new(spec.name.clone(), Arc::clone(&coordinator)));
            let plugin = match spec.role {
                Role::Input => BoundPlugin::Input(registry.get_input(&spec.name)?),
                Role::Processor => BoundPlugin::Processor(registry.get_processor(&spec.name)?),
                Role::Output => BoundPlugin::Output(registry.get_output(&spec.name)?),
            };
            report.info(format!("bound stage '{}' ({:?})", spec.name, spec.role));
            stages.push(Some(BoundStage { plugin, handle }));
        }

        Ok(Pipeline {
            ring: Arc::new(PacketRing::new(buffer_capacity, specs.len())),
            coordinator,
            report,
            stages: Mutex::new(stages),
            aborted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Turns joint termination into individual termination process-wide
    /// (spec §4.7 mode 3). Must be called before `run`.
    pub fn set_ignore_joint_termination(&self, ignore: bool) {
        self.coordinator.set_ignore_joint_termination(ignore);
    }

    /// Opts the Output stage out of fatal treatment for a broken-pipe
    /// `send` failure (spec §7 "the plugin opted to ignore aborts"). Must
    /// be called before `run`.
    pub fn set_ignore_output_aborts(&self, ignore: bool) {
        if let Some(Some(last)) = self.stages.lock().unwrap().last() {
            last.handle.set_ignore_aborts(ignore);
        }
    }

    /// Starts every stage worker on its own thread, joins them in order,
    /// and returns the aggregate exit status: success iff the Input stage
    /// reached EOF cleanly and no stage reported `Fatal` (spec §4.8).
    pub fn run(&self) -> ExitStatus {
        let bound: Vec<BoundStage> =
            self.stages.lock().unwrap().iter_mut().map(|slot| slot.take().expect("run() called once")).collect();

        let mut threads = Vec::with_capacity(bound.len());
        for (index, stage) in bound.into_iter().enumerate() {
            let ring = Arc::clone(&self.ring);
            let report = Arc::clone(&self.report);
            let handle = stage.handle;
            let mut plugin = stage.plugin;
            threads.push(thread::spawn(move || match &mut plugin {
                BoundPlugin::Input(p) => stage::run_input(p.as_mut(), &ring, &handle, report.as_ref()),
                BoundPlugin::Processor(p) => {
                    stage::run_processor(index, p.as_mut(), &ring, &handle, report.as_ref())
                }
                BoundPlugin::Output(p) => stage::run_output(index, p.as_mut(), &ring, &handle, report.as_ref()),
            }));
        }

        let mut outcomes = Vec::with_capacity(threads.len());
        for (index, thread) in threads.into_iter().enumerate() {
            match thread.join() {
                Ok(outcome) => outcomes.push(outcome),
                Err(_) => {
                    self.report.error(format!("stage at index {index} panicked"));
                    outcomes.push(StageOutcome::Fatal(CoreError::Fatal {
                        stage: index.to_string(),
                        reason: "panicked".into(),
                    }));
                }
            }
        }

        self.settle(outcomes)
    }

    fn settle(&self, outcomes: Vec<StageOutcome>) -> ExitStatus {
        if let Some(reason) = outcomes.iter().find_map(|o| match o {
            StageOutcome::Fatal(e) => Some(e.to_string()),
            _ => None,
        }) {
            self.report.error(format!("pipeline stopped on fatal error: {reason}"));
            return ExitStatus::Fatal;
        }
        if self.aborted.load(Ordering::SeqCst) {
            return ExitStatus::Aborted;
        }
        if outcomes.iter().any(|o| matches!(o, StageOutcome::JointEnd)) {
            return ExitStatus::JointTerminated;
        }
        match outcomes.first() {
            Some(StageOutcome::Eof) => ExitStatus::CleanEof,
            _ => ExitStatus::Aborted,
        }
    }

    /// Signals every stage to stop at its next Ring wait point (spec §5
    /// "Cancellation"). Safe to call from another thread while `run` is in
    /// progress.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.ring.shutdown();
    }

    pub fn ring_capacity(&self) -> usize {
        self.ring.capacity()
    }
}
