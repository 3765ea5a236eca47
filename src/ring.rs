//! The shared packet ring (spec §4.5 "Packet Ring").
//!
//! Grounded on the mutex+condvar monitor shape of rust-srec's
//! `pipeline-common::channel_pipeline`, reworked from an mpsc channel into a
//! fixed-capacity ring with one cursor per stage, since the spec's no-copy,
//! no-overwrite ordering invariants (§8 properties 1–2) need cursor
//! arithmetic a channel can't express. One stage (Input) publishes by
//! advancing `pos_0`; every other stage both consumes its upstream neighbor
//! and publishes its own cursor, so `stage_release` is the single operation
//! every stage uses to make progress visible.

use std::sync::{Condvar, Mutex};

use crate::packet::{Packet, Slot};

struct Inner {
    slots: Vec<Slot>,
    /// `cursors[i]` is `pos_i`: how many packets stage `i` has published.
    cursors: Vec<u64>,
    shutdown: bool,
}

/// Fixed-capacity ring of packet slots shared by every stage in a pipeline
/// run. `stage_count` includes the Input stage at index 0 and the Output
/// stage at index `stage_count - 1`.
pub struct PacketRing {
    capacity: usize,
    stage_count: usize,
    inner: Mutex<Inner>,
    /// `stage_cv[i]` wakes a stage blocked in `stage_acquire(i, ..)`; unused
    /// at index 0 (Input never acquires).
    stage_cv: Vec<Condvar>,
    /// Wakes a stage blocked in `input_reserve` once the last stage frees
    /// capacity.
    producer_cv: Condvar,
}

impl PacketRing {
    /// Builds a ring with room for `capacity` packets serving `stage_count`
    /// stages (Input + Processors + Output). `capacity` should be a power
    /// of two; this is advisory, not enforced, since the modulo arithmetic
    /// below is correct for any positive capacity.
    pub fn new(capacity: usize, stage_count: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        assert!(stage_count >= 2, "a pipeline needs at least an Input and an Output stage");
        Self {
            capacity,
            stage_count,
            inner: Mutex::new(Inner {
                slots: vec![Slot::empty(); capacity],
                cursors: vec![0u64; stage_count],
                shutdown: false,
            }),
            stage_cv: (0..stage_count).map(|_| Condvar::new()).collect(),
            producer_cv: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stage_count(&self) -> usize {
        self.stage_count
    }

    /// Reserves up to `n` consecutive slots for the Input stage. Blocks
    /// until at least one slot is free (i.e. `pos_0 - pos_{n-1} < C`) or
    /// shutdown is signalled, in which case it returns `(pos_0, 0)`.
    pub fn input_reserve(&self, n: usize) -> (u64, usize) {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.shutdown {
                return (inner.cursors[0], 0);
            }
            let last = inner.cursors[self.stage_count - 1];
            let used = inner.cursors[0] - last;
            let free = self.capacity as u64 - used;
            if free > 0 {
                let k = n.min(free as usize);
                return (inner.cursors[0], k);
            }
            inner = self.producer_cv.wait(inner).unwrap();
        }
    }

    /// Writes `packet` into the slot at absolute position `pos`, reserved
    /// by an earlier `input_reserve` or produced by stage `stage`. Marks it
    /// non-filler.
    pub fn write(&self, stage: usize, pos: u64, packet: Packet) {
        let mut inner = self.inner.lock().unwrap();
        let idx = (pos % self.capacity as u64) as usize;
        inner.slots[idx] = Slot { packet, is_filler: false, owner_stage: stage, sequence: pos };
    }

    /// Reads a copy of the slot at absolute position `pos`.
    pub fn read(&self, pos: u64) -> Slot {
        let inner = self.inner.lock().unwrap();
        let idx = (pos % self.capacity as u64) as usize;
        inner.slots[idx]
    }

    /// Marks the slot at `pos` as filler (the `Null`/`Drop` verdicts),
    /// recording which stage did it.
    pub fn mark_filler(&self, stage: usize, pos: u64) {
        let mut inner = self.inner.lock().unwrap();
        let idx = (pos % self.capacity as u64) as usize;
        inner.slots[idx].is_filler = true;
        inner.slots[idx].owner_stage = stage;
    }

    /// For stage `i > 0`: waits until stage `i-1` has published at least
    /// one slot past `pos_i`, returning up to `n` contiguous slots. Returns
    /// `(pos_i, 0)` on shutdown once upstream has nothing more queued.
    pub fn stage_acquire(&self, stage: usize, n: usize) -> (u64, usize) {
        assert!(stage > 0, "only non-Input stages acquire");
        let mut inner = self.inner.lock().unwrap();
        loop {
            let avail = inner.cursors[stage - 1] - inner.cursors[stage];
            if avail > 0 {
                let k = n.min(avail as usize);
                return (inner.cursors[stage], k);
            }
            if inner.shutdown {
                return (inner.cursors[stage], 0);
            }
            inner = self.stage_cv[stage].wait(inner).unwrap();
        }
    }

    /// Advances `pos_i` by `k`, publishing those slots to stage `i+1` and,
    /// if `i` is the last stage, freeing capacity for the Input stage.
    pub fn stage_release(&self, stage: usize, k: usize) {
        if k == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.cursors[stage] += k as u64;
        if stage + 1 < self.stage_count {
            self.stage_cv[stage + 1].notify_all();
        }
        if stage == self.stage_count - 1 {
            self.producer_cv.notify_all();
        }
    }

    /// The current `pos_i` for stage `i`, for diagnostics and tests.
    pub fn cursor(&self, stage: usize) -> u64 {
        self.inner.lock().unwrap().cursors[stage]
    }

    /// Sets the shutdown flag and wakes every waiter. Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shutdown = true;
        drop(inner);
        self.producer_cv.notify_all();
        for cv in &self.stage_cv {
            cv.notify_all();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().unwrap().shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn packet(byte: u8) -> Packet {
        let mut p = [0u8; crate::constants::TS_PACKET_SIZE];
        p[0] = byte;
        p
    }

    #[test]
    fn two_stage_pipeline_sees_packets_in_order() {
        let ring = Arc::new(PacketRing::new(4, 2));

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..10u8 {
                    let (base, k) = ring.input_reserve(1);
                    assert_eq!(k, 1);
                    ring.write(0, base, packet(i));
                    ring.stage_release(0, 1);
                }
                ring.shutdown();
            })
        };

        let mut seen = Vec::new();
        loop {
            let (base, k) = ring.stage_acquire(1, 4);
            if k == 0 {
                break;
            }
            for i in 0..k as u64 {
                seen.push(ring.read(base + i).packet[0]);
            }
            ring.stage_release(1, k);
        }
        producer.join().unwrap();

        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn input_never_outpaces_capacity() {
        let ring = PacketRing::new(2, 2);
        let (base0, k0) = ring.input_reserve(5);
        assert_eq!((base0, k0), (0, 2));
        ring.write(0, 0, packet(1));
        ring.write(0, 1, packet(2));
        ring.stage_release(0, 2);

        // Capacity is full until stage 1 consumes something.
        assert_eq!(ring.cursor(0) - ring.cursor(1), 2);

        let (base1, k1) = ring.stage_acquire(1, 1);
        assert_eq!((base1, k1), (0, 1));
        ring.stage_release(1, 1);

        let (base2, k2) = ring.input_reserve(5);
        assert_eq!(base2, 2);
        assert_eq!(k2, 1);
    }

    #[test]
    fn acquire_returns_zero_after_shutdown_drains() {
        let ring = PacketRing::new(4, 2);
        ring.write(0, 0, packet(7));
        ring.stage_release(0, 1);
        ring.shutdown();

        let (base, k) = ring.stage_acquire(1, 4);
        assert_eq!((base, k), (0, 1));
        ring.stage_release(1, 1);

        let (_, k2) = ring.stage_acquire(1, 4);
        assert_eq!(k2, 0);
    }
}
