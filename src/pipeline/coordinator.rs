//! The Termination Coordinator (spec §4.7 "Termination Coordinator").
//!
//! Grounded on rust-srec's `run_completion::settle_run`, which aggregates
//! many concurrent task outcomes into one decision under a single
//! synchronization point; here the rendezvous is a shared mutex rather than
//! a join over futures, since stages run on native threads and must be able
//! to poll "has everyone agreed to stop yet" without blocking on a future.

use std::sync::{Condvar, Mutex};

struct Inner {
    users: u32,
    remaining: u32,
    highest_pkt: u64,
    ignore_joint: bool,
}

/// Per-stage lifecycle, mirroring the state machine in spec §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Running,
    IndividualEnd,
    JointRequested,
    JointEnd,
    Exited,
}

/// Process-wide (per pipeline run) rendezvous point for joint termination,
/// shared by every stage through a handle.
pub struct TerminationCoordinator {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl Default for TerminationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { users: 0, remaining: 0, highest_pkt: 0, ignore_joint: false }),
            cv: Condvar::new(),
        }
    }

    /// Global flag: when set, `joint_terminate` behaves as an individual
    /// end instead of joining the rendezvous (spec §4.7 mode 3).
    pub fn set_ignore_joint_termination(&self, ignore: bool) {
        self.inner.lock().unwrap().ignore_joint = ignore;
    }

    pub fn ignore_joint_termination(&self) -> bool {
        self.inner.lock().unwrap().ignore_joint
    }

    /// A stage opts into the joint rendezvous: `users++`, `remaining++`.
    pub fn opt_in(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.users += 1;
        inner.remaining += 1;
    }

    /// A stage leaves the rendezvous before ever calling `joint_terminate`
    /// (e.g. it toggled `useJointTermination(false)` mid-run).
    pub fn opt_out(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.users > 0 {
            inner.users -= 1;
            inner.remaining = inner.remaining.saturating_sub(1);
            self.cv.notify_all();
        }
    }

    /// A stage reports its intent to end jointly, having processed
    /// `total_packets` so far. Decrements `remaining` and raises
    /// `highest_pkt` to the max seen.
    pub fn joint_terminate(&self, total_packets: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.remaining > 0 {
            inner.remaining -= 1;
        }
        inner.highest_pkt = inner.highest_pkt.max(total_packets);
        self.cv.notify_all();
    }

    /// `highest_pkt` once every opted-in stage has called `joint_terminate`
    /// (`remaining == 0`), else `u64::MAX` (spec §4.7, property 3).
    pub fn total_packets_before_joint_termination(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        if inner.remaining == 0 {
            inner.highest_pkt
        } else {
            u64::MAX
        }
    }

    /// Blocks the calling stage until `remaining == 0`, i.e. every joint
    /// user has reported in. Used by a joint-opted-in stage waiting to
    /// learn the cutoff index before it stops forwarding packets.
    pub fn wait_for_joint_cutoff(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        while inner.remaining > 0 {
            inner = self.cv.wait(inner).unwrap();
        }
        inner.highest_pkt
    }

    pub fn users(&self) -> u32 {
        self.inner.lock().unwrap().users
    }

    pub fn remaining(&self) -> u32 {
        self.inner.lock().unwrap().remaining
    }
}
