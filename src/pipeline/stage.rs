//! The Stage Runtime (spec §4.6 "Stage Runtime") and the plugin contract it
//! drives.
//!
//! Grounded on the teacher's `core::run`/`core::run_broadcast` read loops —
//! same shape (loop, pull a window, act on each packet, detect EOF) — but
//! generalized from "decode and tally TR 101 290 counters" to "call an
//! arbitrary plugin's verdict and advance the shared ring".

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::packet::Packet;
use crate::pipeline::coordinator::{StageState, TerminationCoordinator};
use crate::ring::PacketRing;
use crate::report::ReportSink;

/// How many packets a stage tries to move through the ring per
/// acquire/release cycle.
pub const WINDOW: usize = 64;

/// A plugin's role in the pipeline (spec §3 "Plugin Entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Input,
    Processor,
    Output,
}

/// Per-packet disposition a `ProcessorPlugin` returns (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the packet as-is.
    Ok,
    /// Mark the slot filler; not counted as a drop.
    Null,
    /// Mark the slot filler; counted as a drop.
    Drop,
    /// Stop this stage after releasing the current window.
    End,
}

/// How a stage's run loop concluded.
#[derive(Debug)]
pub enum StageOutcome {
    /// Input plugin signalled end of stream; the whole pipeline shuts down.
    Eof,
    /// This stage alone ended; the rest of the pipeline continues.
    IndividualEnd,
    /// This stage ended as part of a joint rendezvous.
    JointEnd,
    /// The plugin's `start()` returned false, or a `Fatal` condition was
    /// hit mid-run.
    Fatal(crate::error::CoreError),
}

/// What a plugin sees of its own stage: packet accounting, drop tally, and
/// the joint termination rendezvous (spec §4.6, §4.7).
pub struct StageHandle {
    name: String,
    coordinator: Arc<TerminationCoordinator>,
    joint_enabled: AtomicBool,
    ignore_aborts: AtomicBool,
    total_packets: AtomicU64,
    dropped_packets: AtomicU64,
    state: Mutex<StageState>,
}

impl StageHandle {
    pub fn new(name: impl Into<String>, coordinator: Arc<TerminationCoordinator>) -> Self {
        Self {
            name: name.into(),
            coordinator,
            joint_enabled: AtomicBool::new(false),
            ignore_aborts: AtomicBool::new(false),
            total_packets: AtomicU64::new(0),
            dropped_packets: AtomicU64::new(0),
            state: Mutex::new(StageState::Idle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opts this stage in or out of the joint termination rendezvous.
    pub fn use_joint_termination(&self, on: bool) {
        let was = self.joint_enabled.swap(on, Ordering::SeqCst);
        if on && !was {
            self.coordinator.opt_in();
        } else if !on && was {
            self.coordinator.opt_out();
        }
    }

    pub fn joint_termination_enabled(&self) -> bool {
        self.joint_enabled.load(Ordering::SeqCst)
    }

    /// Opts this stage out of fatal treatment for a broken-pipe `send`
    /// failure (spec §7 "demoted to broken-pipe ... if the plugin opted to
    /// ignore aborts"). Only consulted by `run_output`.
    pub fn set_ignore_aborts(&self, ignore: bool) {
        self.ignore_aborts.store(ignore, Ordering::SeqCst);
    }

    pub fn ignore_aborts(&self) -> bool {
        self.ignore_aborts.load(Ordering::SeqCst)
    }

    /// Reports this stage's current packet count to the rendezvous. Per
    /// spec §4.7 mode 3, a global "ignore joint termination" flag demotes
    /// this to a no-op on the coordinator — the caller (the stage run loop)
    /// treats the subsequent `Verdict::End` as an individual end instead.
    pub fn joint_terminate(&self) {
        if self.coordinator.ignore_joint_termination() {
            return;
        }
        self.coordinator.joint_terminate(self.total_packets.load(Ordering::SeqCst));
    }

    fn record_packets(&self, n: u64) {
        self.total_packets.fetch_add(n, Ordering::SeqCst);
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets.load(Ordering::SeqCst)
    }

    fn record_drop(&self) {
        self.dropped_packets.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> StageState {
        *self.state.lock().unwrap()
    }

    /// `Idle -> Running`. Called once, right after a plugin's `start()`
    /// succeeds.
    fn enter_running(&self) {
        let mut state = self.state.lock().unwrap();
        assert_eq!(*state, StageState::Idle, "stage '{}' must start Idle", self.name);
        *state = StageState::Running;
    }

    /// `Running -> IndividualEnd`.
    fn enter_individual_end(&self) {
        let mut state = self.state.lock().unwrap();
        assert_eq!(*state, StageState::Running, "stage '{}' individual end must come from Running", self.name);
        *state = StageState::IndividualEnd;
    }

    /// `Running -> JointRequested`. Enforces the spec's guard: a stage may
    /// only request the joint rendezvous while it is currently opted into
    /// joint termination.
    fn enter_joint_requested(&self) {
        let mut state = self.state.lock().unwrap();
        assert_eq!(*state, StageState::Running, "stage '{}' joint request must come from Running", self.name);
        assert!(
            self.joint_termination_enabled(),
            "stage '{}' entered JointRequested without opting into joint termination",
            self.name
        );
        *state = StageState::JointRequested;
    }

    /// `JointRequested -> JointEnd`.
    fn enter_joint_end(&self) {
        let mut state = self.state.lock().unwrap();
        assert_eq!(*state, StageState::JointRequested, "stage '{}' joint end must come from JointRequested", self.name);
        *state = StageState::JointEnd;
    }

    /// `IndividualEnd | JointEnd -> Exited`.
    fn enter_exited(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(
            matches!(*state, StageState::IndividualEnd | StageState::JointEnd),
            "stage '{}' exit must come from a terminal end state, was {:?}",
            self.name,
            *state
        );
        *state = StageState::Exited;
    }
}

/// `start()`/`stop()`/`receive()` for the one Input stage of a pipeline.
pub trait InputPlugin: Send {
    fn start(&mut self) -> bool {
        true
    }
    fn stop(&mut self) -> bool {
        true
    }
    /// Fills as many leading elements of `buf` as are available, returning
    /// that count. `0` signals end of stream.
    fn receive(&mut self, buf: &mut [Packet]) -> usize;
}

/// `start()`/`stop()`/`process()` for a Processor stage.
pub trait ProcessorPlugin: Send {
    fn start(&mut self) -> bool {
        true
    }
    fn stop(&mut self) -> bool {
        true
    }
    fn process(&mut self, handle: &StageHandle, packet: &mut Packet) -> Verdict;
}

/// `start()`/`stop()`/`send()` for the one Output stage of a pipeline.
pub trait OutputPlugin: Send {
    fn start(&mut self) -> bool {
        true
    }
    fn stop(&mut self) -> bool {
        true
    }
    /// Returns `false` on an unrecoverable write failure.
    fn send(&mut self, buf: &[Packet]) -> bool;
    /// The OS error behind the most recent failed `send`, if the plugin
    /// tracks one. Lets the run loop tell a broken pipe apart from any other
    /// write failure (spec §7); a plugin that doesn't implement this always
    /// looks like a generic, non-demotable failure.
    fn last_error(&self) -> Option<std::io::Error> {
        None
    }
}

/// Runs the Input stage (ring index 0) until EOF or shutdown.
pub fn run_input(
    plugin: &mut dyn InputPlugin,
    ring: &PacketRing,
    handle: &StageHandle,
    report: &dyn ReportSink,
) -> StageOutcome {
    if !plugin.start() {
        return StageOutcome::Fatal(crate::error::CoreError::PluginStart { name: handle.name().into() });
    }
    handle.enter_running();

    let mut buf = vec![[0u8; crate::constants::TS_PACKET_SIZE]; WINDOW];
    let outcome = loop {
        let (base, k) = ring.input_reserve(WINDOW);
        if k == 0 {
            break StageOutcome::Eof;
        }
        let n = plugin.receive(&mut buf[..k]);
        if n == 0 {
            report.info(format!("stage '{}' reached end of input", handle.name()));
            ring.shutdown();
            break StageOutcome::Eof;
        }
        for (i, packet) in buf[..n].iter().enumerate() {
            ring.write(0, base + i as u64, *packet);
        }
        ring.stage_release(0, n);
        handle.record_packets(n as u64);
    };
    handle.enter_individual_end();
    handle.enter_exited();

    if !plugin.stop() {
        report.warning(format!("stage '{}' rejected stop", handle.name()));
    }
    outcome
}

/// Runs a Processor stage at ring index `stage` (`0 < stage < last`) until
/// an `End` verdict, shutdown, or fatal condition.
pub fn run_processor(
    stage: usize,
    plugin: &mut dyn ProcessorPlugin,
    ring: &PacketRing,
    handle: &StageHandle,
    report: &dyn ReportSink,
) -> StageOutcome {
    if !plugin.start() {
        return StageOutcome::Fatal(crate::error::CoreError::PluginStart { name: handle.name().into() });
    }
    handle.enter_running();

    let outcome = 'outer: loop {
        let (base, k) = ring.stage_acquire(stage, WINDOW);
        if k == 0 {
            break StageOutcome::Eof;
        }

        let mut processed = 0usize;
        let mut ended = false;
        for i in 0..k {
            let pos = base + i as u64;
            let mut slot = ring.read(pos);
            let verdict = plugin.process(handle, &mut slot.packet);
            handle.record_packets(1);
            match verdict {
                Verdict::Ok => ring.write(stage, pos, slot.packet),
                Verdict::Null => ring.mark_filler(stage, pos),
                Verdict::Drop => {
                    ring.mark_filler(stage, pos);
                    handle.record_drop();
                }
                Verdict::End => {
                    processed = i + 1;
                    ended = true;
                    break;
                }
            }
            processed = i + 1;
        }
        ring.stage_release(stage, processed);

        if ended {
            if handle.joint_termination_enabled() && !handle.coordinator.ignore_joint_termination() {
                handle.enter_joint_requested();
                handle.joint_terminate();
                handle.coordinator.wait_for_joint_cutoff();
                handle.enter_joint_end();
                break 'outer StageOutcome::JointEnd;
            }
            handle.enter_individual_end();
            break 'outer StageOutcome::IndividualEnd;
        }
    };
    if matches!(outcome, StageOutcome::Eof) {
        handle.enter_individual_end();
    }
    handle.enter_exited();

    if !plugin.stop() {
        report.warning(format!("stage '{}' rejected stop", handle.name()));
    }
    outcome
}

/// Runs the Output stage (the last ring index) until shutdown.
pub fn run_output(
    stage: usize,
    plugin: &mut dyn OutputPlugin,
    ring: &PacketRing,
    handle: &StageHandle,
    report: &dyn ReportSink,
) -> StageOutcome {
    if !plugin.start() {
        return StageOutcome::Fatal(crate::error::CoreError::PluginStart { name: handle.name().into() });
    }
    handle.enter_running();

    let mut buf = Vec::with_capacity(WINDOW);
    let outcome = loop {
        let (base, k) = ring.stage_acquire(stage, WINDOW);
        if k == 0 {
            break StageOutcome::Eof;
        }

        buf.clear();
        for i in 0..k {
            buf.push(ring.read(base + i as u64).packet);
        }
        let ok = plugin.send(&buf);
        ring.stage_release(stage, k);
        handle.record_packets(k as u64);
        if !ok {
            let source = plugin.last_error().unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::Other));
            let err = crate::error::CoreError::Io { plugin: handle.name().into(), source };
            if err.is_broken_pipe() && handle.ignore_aborts() {
                report.warning(format!("stage '{}' saw a broken pipe and is ignoring it", handle.name()));
                handle.enter_individual_end();
                break StageOutcome::IndividualEnd;
            }
            report.error(format!("stage '{}' failed to send, stopping", handle.name()));
            break StageOutcome::Fatal(err);
        }
    };
    if matches!(outcome, StageOutcome::Eof) {
        handle.enter_individual_end();
    }
    if !matches!(outcome, StageOutcome::Fatal(_)) {
        handle.enter_exited();
    }

    if !plugin.stop() {
        report.warning(format!("stage '{}' rejected stop", handle.name()));
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::NullReport;
    use std::sync::Arc;

    struct CountingInput {
        remaining: usize,
    }
    impl InputPlugin for CountingInput {
        fn receive(&mut self, buf: &mut [Packet]) -> usize {
            let n = self.remaining.min(buf.len());
            for (i, p) in buf[..n].iter_mut().enumerate() {
                p[0] = i as u8;
            }
            self.remaining -= n;
            n
        }
    }

    struct PassThrough;
    impl ProcessorPlugin for PassThrough {
        fn process(&mut self, _handle: &StageHandle, _packet: &mut Packet) -> Verdict {
            Verdict::Ok
        }
    }

    struct EndAfter {
        remaining: usize,
    }
    impl ProcessorPlugin for EndAfter {
        fn process(&mut self, _handle: &StageHandle, _packet: &mut Packet) -> Verdict {
            if self.remaining == 0 {
                return Verdict::End;
            }
            self.remaining -= 1;
            Verdict::Ok
        }
    }

    struct Sink {
        received: usize,
    }
    impl OutputPlugin for Sink {
        fn send(&mut self, buf: &[Packet]) -> bool {
            self.received += buf.len();
            true
        }
    }

    struct DropOdd {
        index: usize,
    }
    impl ProcessorPlugin for DropOdd {
        fn process(&mut self, _handle: &StageHandle, _packet: &mut Packet) -> Verdict {
            let verdict = if self.index % 2 == 0 { Verdict::Null } else { Verdict::Drop };
            self.index += 1;
            verdict
        }
    }

    struct BrokenPipeSink;
    impl OutputPlugin for BrokenPipeSink {
        fn send(&mut self, _buf: &[Packet]) -> bool {
            false
        }
        fn last_error(&self) -> Option<std::io::Error> {
            Some(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn input_stage_reaches_eof_and_shuts_down_ring() {
        let ring = PacketRing::new(8, 2);
        let coordinator = Arc::new(TerminationCoordinator::new());
        let handle = StageHandle::new("input", coordinator);
        let mut plugin = CountingInput { remaining: 5 };

        let outcome = run_input(&mut plugin, &ring, &handle, &NullReport);
        assert!(matches!(outcome, StageOutcome::Eof));
        assert!(ring.is_shutdown());
        assert_eq!(handle.total_packets(), 5);
    }

    #[test]
    fn processor_stage_ends_individually_without_joint_opt_in() {
        let ring = PacketRing::new(8, 3);
        ring.write(0, 0, [1u8; crate::constants::TS_PACKET_SIZE]);
        ring.stage_release(0, 1);
        ring.shutdown();

        let coordinator = Arc::new(TerminationCoordinator::new());
        let handle = StageHandle::new("proc", coordinator);
        let mut plugin = EndAfter { remaining: 0 };

        let outcome = run_processor(1, &mut plugin, &ring, &handle, &NullReport);
        assert!(matches!(outcome, StageOutcome::IndividualEnd));
    }

    #[test]
    fn output_stage_drains_released_window() {
        let ring = PacketRing::new(8, 2);
        for i in 0..3u64 {
            ring.write(0, i, [i as u8; crate::constants::TS_PACKET_SIZE]);
        }
        ring.stage_release(0, 3);
        ring.shutdown();

        let coordinator = Arc::new(TerminationCoordinator::new());
        let handle = StageHandle::new("output", coordinator);
        let mut plugin = Sink { received: 0 };

        let outcome = run_output(1, &mut plugin, &ring, &handle, &NullReport);
        assert!(matches!(outcome, StageOutcome::Eof));
        assert_eq!(plugin.received, 3);
    }

    #[test]
    fn pass_through_forwards_packets_unchanged() {
        let ring = PacketRing::new(8, 2);
        ring.write(0, 0, [9u8; crate::constants::TS_PACKET_SIZE]);
        ring.stage_release(0, 1);
        ring.shutdown();

        let coordinator = Arc::new(TerminationCoordinator::new());
        let handle = StageHandle::new("proc", coordinator);
        let mut plugin = PassThrough;
        let outcome = run_processor(1, &mut plugin, &ring, &handle, &NullReport);
        assert!(matches!(outcome, StageOutcome::Eof));
        assert_eq!(ring.read(0).packet[0], 9);
        assert!(!ring.read(0).is_filler);
    }

    #[test]
    fn drop_verdicts_are_counted_separately_from_null() {
        let ring = PacketRing::new(8, 3);
        for i in 0..4u64 {
            ring.write(0, i, [i as u8; crate::constants::TS_PACKET_SIZE]);
        }
        ring.stage_release(0, 4);
        ring.shutdown();

        let coordinator = Arc::new(TerminationCoordinator::new());
        let handle = StageHandle::new("proc", coordinator);
        let mut plugin = DropOdd { index: 0 };

        let outcome = run_processor(1, &mut plugin, &ring, &handle, &NullReport);
        assert!(matches!(outcome, StageOutcome::Eof));
        assert_eq!(handle.dropped_packets(), 2);
        assert_eq!(handle.total_packets(), 4);
    }

    #[test]
    fn output_stage_fatal_on_broken_pipe_without_ignore_aborts() {
        let ring = PacketRing::new(8, 2);
        ring.write(0, 0, [1u8; crate::constants::TS_PACKET_SIZE]);
        ring.stage_release(0, 1);

        let coordinator = Arc::new(TerminationCoordinator::new());
        let handle = StageHandle::new("output", coordinator);
        let mut plugin = BrokenPipeSink;

        let outcome = run_output(1, &mut plugin, &ring, &handle, &NullReport);
        assert!(matches!(outcome, StageOutcome::Fatal(_)));
    }

    #[test]
    fn output_stage_demotes_broken_pipe_when_ignoring_aborts() {
        let ring = PacketRing::new(8, 2);
        ring.write(0, 0, [1u8; crate::constants::TS_PACKET_SIZE]);
        ring.stage_release(0, 1);

        let coordinator = Arc::new(TerminationCoordinator::new());
        let handle = StageHandle::new("output", coordinator);
        handle.set_ignore_aborts(true);
        let mut plugin = BrokenPipeSink;

        let outcome = run_output(1, &mut plugin, &ring, &handle, &NullReport);
        assert!(matches!(outcome, StageOutcome::IndividualEnd));
        assert_eq!(handle.state(), StageState::Exited);
    }

    #[test]
    fn joint_requested_without_opt_in_panics() {
        let coordinator = Arc::new(TerminationCoordinator::new());
        let handle = StageHandle::new("proc", coordinator);
        handle.enter_running();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle.enter_joint_requested()));
        assert!(result.is_err());
    }

    #[test]
    fn state_machine_reaches_exited_on_clean_eof() {
        let ring = PacketRing::new(8, 2);
        let coordinator = Arc::new(TerminationCoordinator::new());
        let handle = StageHandle::new("input", coordinator);
        let mut plugin = CountingInput { remaining: 2 };

        run_input(&mut plugin, &ring, &handle, &NullReport);
        assert_eq!(handle.state(), StageState::Exited);
    }
}
