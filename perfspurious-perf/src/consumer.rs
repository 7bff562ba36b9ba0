/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Drains the ring, or, if it is empty, blocks on the notification endpoint
//! once and checks whether the wakeup was backed by data.

use std::time::Duration;
use std::time::Instant;

use perfspurious_process::Error;
use serde::Serialize;

use crate::notify::Readiness;
use crate::notify::Waiter;
use crate::ring::RingCursor;
use crate::ring::SampleRecord;
use crate::ring::SAMPLE_RECORD_SIZE;

/// One read of the two ring cursors.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// `data_head` as loaded (acquire).
    pub head: u64,
    /// `data_tail` as loaded.
    pub tail: u64,
}

impl Snapshot {
    /// Reads `head` before `tail`; the acquire load of `head` orders every
    /// later read of the data region after it.
    pub fn read<R: RingCursor + ?Sized>(ring: &R) -> Self {
        let head = ring.head();
        let tail = ring.tail();
        Self { head, tail }
    }

    /// Unread bytes.
    pub fn pending(&self) -> u64 {
        self.head.wrapping_sub(self.tail)
    }

    /// No data is visible.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }
}

/// One iteration of the drain path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Drained {
    /// The cursors as read before consuming.
    pub at: Snapshot,
    /// The record found at `at.tail`.
    pub record: SampleRecord,
    /// The tail published afterwards. Never beyond `at.head`.
    pub new_tail: u64,
}

/// The single wait cycle taken when the ring was found empty.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WaitCycle {
    /// The (empty) cursors that sent us into the wait.
    pub before: Snapshot,
    /// What the waiter reported.
    pub readiness: Readiness,
    /// Time spent blocked.
    pub elapsed: Duration,
    /// The cursors re-read right after waking up.
    pub after: Snapshot,
}

impl WaitCycle {
    /// A wakeup is spurious when it claims the descriptor is readable yet the
    /// ring is still empty when checked again.
    pub fn is_spurious(&self) -> bool {
        self.readiness.contains(Readiness::READABLE) && self.after.is_empty()
    }
}

/// Progress notifications, delivered while the consumer runs so a hang in the
/// wait is still preceded by everything observed so far.
#[derive(Copy, Clone, Debug)]
pub enum Step<'a> {
    /// The cursors were read.
    Read(Snapshot),
    /// One record was consumed.
    Advanced(&'a Drained),
    /// The ring is empty and the consumer is about to block.
    Polling(Snapshot),
    /// The consumer woke up.
    Woke(&'a WaitCycle),
}

/// Everything one consumer run observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConsumeReport {
    /// The first cursor read.
    pub first: Snapshot,
    /// Drain iterations, in order.
    pub drained: Vec<Drained>,
    /// The wait cycle, if one was taken.
    pub wait: Option<WaitCycle>,
}

impl ConsumeReport {
    /// Number of spurious wakeups observed: zero or one.
    pub fn anomalies(&self) -> usize {
        self.wait.iter().filter(|cycle| cycle.is_spurious()).count()
    }
}

/// The consumer loop.
#[derive(Copy, Clone, Debug)]
pub struct RingConsumer {
    record_size: u64,
    poll_after_drain: bool,
}

impl Default for RingConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl RingConsumer {
    /// A consumer for `PERF_SAMPLE_TID` records that stops once the ring is
    /// drained.
    pub fn new() -> Self {
        Self {
            record_size: SAMPLE_RECORD_SIZE,
            poll_after_drain: false,
        }
    }

    /// Enter one wait cycle even after draining, instead of stopping at the
    /// first empty check.
    pub fn poll_after_drain(mut self, enable: bool) -> Self {
        self.poll_after_drain = enable;
        self
    }

    /// Drains `ring` one record at a time while `head != tail`. If the ring
    /// was empty at the first check (or `poll_after_drain` is set), blocks on
    /// `waiter` exactly once and re-checks the cursors.
    pub fn run<R, W, F>(
        &self,
        ring: &R,
        waiter: &mut W,
        mut on_step: F,
    ) -> Result<ConsumeReport, Error>
    where
        R: RingCursor + ?Sized,
        W: Waiter + ?Sized,
        F: FnMut(Step<'_>),
    {
        let first = Snapshot::read(ring);
        on_step(Step::Read(first));

        let mut drained = Vec::new();
        let mut at = first;
        while !at.is_empty() {
            let record = ring.record_at(at.tail);
            let new_tail = at.tail.wrapping_add(self.record_size.min(at.pending()));
            ring.set_tail(new_tail);
            let step = Drained {
                at,
                record,
                new_tail,
            };
            on_step(Step::Advanced(&step));
            drained.push(step);

            at = Snapshot::read(ring);
            on_step(Step::Read(at));
        }

        let wait = if drained.is_empty() || self.poll_after_drain {
            on_step(Step::Polling(at));
            let start = Instant::now();
            let readiness = waiter.wait_one()?;
            let elapsed = start.elapsed();
            let cycle = WaitCycle {
                before: at,
                readiness,
                elapsed,
                after: Snapshot::read(ring),
            };
            on_step(Step::Woke(&cycle));
            Some(cycle)
        } else {
            None
        };

        Ok(ConsumeReport {
            first,
            drained,
            wait,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::atomic::AtomicU64;
    use std::sync::atomic::Ordering;

    use test_case::test_case;

    use super::*;

    struct FakeRing {
        head: AtomicU64,
        tail: AtomicU64,
    }

    impl FakeRing {
        fn new(head: u64, tail: u64) -> Self {
            Self {
                head: AtomicU64::new(head),
                tail: AtomicU64::new(tail),
            }
        }
    }

    impl RingCursor for FakeRing {
        fn head(&self) -> u64 {
            self.head.load(Ordering::Acquire)
        }
        fn tail(&self) -> u64 {
            self.tail.load(Ordering::Relaxed)
        }
        fn set_tail(&self, tail: u64) {
            self.tail.store(tail, Ordering::Release)
        }
        fn record_at(&self, offset: u64) -> SampleRecord {
            SampleRecord {
                kind: 9,
                size: SAMPLE_RECORD_SIZE as u16,
                pid: offset as u32,
                tid: offset as u32,
                ..Default::default()
            }
        }
    }

    // Reports `readiness` and, before returning, lets the "kernel" publish
    // `publish` more bytes.
    struct FakeWaiter<'a> {
        ring: &'a FakeRing,
        readiness: Readiness,
        publish: u64,
        calls: usize,
    }

    impl Waiter for FakeWaiter<'_> {
        fn wait_one(&mut self) -> Result<Readiness, Error> {
            self.calls += 1;
            self.ring.head.fetch_add(self.publish, Ordering::Release);
            Ok(self.readiness)
        }
    }

    fn waiter(ring: &FakeRing, readiness: Readiness, publish: u64) -> FakeWaiter<'_> {
        FakeWaiter {
            ring,
            readiness,
            publish,
            calls: 0,
        }
    }

    #[test_case(0, 1)]
    #[test_case(0, 3)]
    #[test_case(160, 5)]
    #[test_case(u64::MAX - 31, 2)]
    fn drain_consumes_every_pending_record(tail: u64, records: u64) {
        let ring = FakeRing::new(tail.wrapping_add(records * SAMPLE_RECORD_SIZE), tail);
        let mut waiter = waiter(&ring, Readiness::READABLE, 0);
        let report = RingConsumer::new().run(&ring, &mut waiter, |_| {}).unwrap();

        assert_eq!(report.first.pending(), records * SAMPLE_RECORD_SIZE);
        assert_eq!(report.drained.len() as u64, records);
        assert_eq!(report.wait, None);
        assert_eq!(waiter.calls, 0);
        assert_eq!(ring.head(), ring.tail());
        assert_eq!(report.anomalies(), 0);
    }

    #[test]
    fn tail_never_passes_head() {
        // A partial record: the consumer must stop at head.
        let ring = FakeRing::new(SAMPLE_RECORD_SIZE + 8, 0);
        let mut waiter = waiter(&ring, Readiness::empty(), 0);
        let report = RingConsumer::new().run(&ring, &mut waiter, |_| {}).unwrap();
        for step in &report.drained {
            assert!(step.new_tail <= step.at.head);
        }
        assert_eq!(report.drained.len(), 2);
        assert_eq!(ring.tail(), SAMPLE_RECORD_SIZE + 8);
    }

    #[test]
    fn one_pending_record_takes_drain_path() {
        let ring = FakeRing::new(SAMPLE_RECORD_SIZE, 0);
        let mut waiter = waiter(&ring, Readiness::READABLE, 0);
        let report = RingConsumer::new().run(&ring, &mut waiter, |_| {}).unwrap();
        assert_eq!(report.first, Snapshot { head: 16, tail: 0 });
        assert_eq!(report.drained.len(), 1);
        assert_eq!(report.drained[0].record.pid, 0);
        assert_eq!(report.drained[0].new_tail, 16);
        assert_eq!(report.anomalies(), 0);
    }

    #[test]
    fn readable_wakeup_on_empty_ring_is_spurious() {
        let ring = FakeRing::new(0, 0);
        let mut waiter = waiter(&ring, Readiness::READABLE, 0);
        let report = RingConsumer::new().run(&ring, &mut waiter, |_| {}).unwrap();
        let cycle = report.wait.unwrap();
        assert!(cycle.before.is_empty());
        assert!(cycle.after.is_empty());
        assert!(cycle.is_spurious());
        assert!(cycle.elapsed >= Duration::ZERO);
        assert_eq!(report.anomalies(), 1);
        assert_eq!(waiter.calls, 1);
    }

    #[test]
    fn readable_wakeup_with_data_is_not_spurious() {
        let ring = FakeRing::new(0, 0);
        let mut waiter = waiter(&ring, Readiness::READABLE, SAMPLE_RECORD_SIZE);
        let report = RingConsumer::new().run(&ring, &mut waiter, |_| {}).unwrap();
        let cycle = report.wait.unwrap();
        assert_eq!(cycle.after.pending(), SAMPLE_RECORD_SIZE);
        assert!(!cycle.is_spurious());
        assert_eq!(report.anomalies(), 0);
    }

    #[test]
    fn hangup_alone_is_not_spurious() {
        let ring = FakeRing::new(0, 0);
        let mut waiter = waiter(&ring, Readiness::HANGUP, 0);
        let report = RingConsumer::new().run(&ring, &mut waiter, |_| {}).unwrap();
        assert_eq!(report.anomalies(), 0);
    }

    #[test]
    fn poll_after_drain_waits_once() {
        let ring = FakeRing::new(2 * SAMPLE_RECORD_SIZE, 0);
        let mut waiter = waiter(&ring, Readiness::READABLE, 0);
        let report = RingConsumer::new()
            .poll_after_drain(true)
            .run(&ring, &mut waiter, |_| {})
            .unwrap();
        assert_eq!(report.drained.len(), 2);
        assert_eq!(waiter.calls, 1);
        assert_eq!(report.wait.unwrap().before, Snapshot { head: 32, tail: 32 });
        assert_eq!(report.anomalies(), 1);
    }

    #[test]
    fn steps_are_reported_in_order() {
        let ring = FakeRing::new(SAMPLE_RECORD_SIZE, 0);
        let mut waiter = waiter(&ring, Readiness::READABLE, 0);
        let log = RefCell::new(Vec::new());
        RingConsumer::new()
            .poll_after_drain(true)
            .run(&ring, &mut waiter, |step| {
                log.borrow_mut().push(match step {
                    Step::Read(s) => format!("read {} {}", s.head, s.tail),
                    Step::Advanced(d) => format!("advance {}", d.new_tail),
                    Step::Polling(_) => "poll".to_owned(),
                    Step::Woke(c) => format!("woke {}", c.is_spurious()),
                })
            })
            .unwrap();
        assert_eq!(
            log.into_inner(),
            ["read 16 0", "advance 16", "read 16 16", "poll", "woke true"]
        );
    }
}
