/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use core::fmt;
use std::io;
use std::io::Write;

use perfspurious_perf::ConsumeReport;
use perfspurious_perf::Step;
use perfspurious_process::ExitStatus;
use serde::Serialize;

/// Which process a diagnostic line comes from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    /// The parent, which owns the counter.
    Monitor,
    /// The child, which performs the counted syscall.
    Workload,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Monitor => f.write_str("monitor"),
            Role::Workload => f.write_str("workload"),
        }
    }
}

/// Writes diagnostic lines. Every line is flushed immediately since both
/// processes share the output and either may block forever afterwards.
pub struct Reporter<W: Write> {
    out: W,
}

impl Reporter<io::Stdout> {
    /// A reporter writing to stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Reporter<W> {
    /// A reporter writing to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Writes `<role>: <msg>`.
    pub fn say<D: fmt::Display>(&mut self, role: Role, msg: D) -> io::Result<()> {
        writeln!(self.out, "{}: {}", role, msg)?;
        self.out.flush()
    }

    /// Describes one consumer step.
    pub fn step(&mut self, step: Step<'_>) -> io::Result<()> {
        match step {
            Step::Read(at) => self.say(
                Role::Monitor,
                format_args!("ring head = {}, tail = {}", at.head, at.tail),
            ),
            Step::Advanced(drained) if drained.record.is_sample() => self.say(
                Role::Monitor,
                format_args!(
                    "advancing tail {} -> {} (sample, size {}, pid {}, tid {})",
                    drained.at.tail,
                    drained.new_tail,
                    drained.record.size,
                    drained.record.pid,
                    drained.record.tid
                ),
            ),
            // Anything else (a lost-samples record, say) has no pid/tid body.
            Step::Advanced(drained) => self.say(
                Role::Monitor,
                format_args!(
                    "advancing tail {} -> {} (non-sample record type {}, size {})",
                    drained.at.tail, drained.new_tail, drained.record.kind, drained.record.size
                ),
            ),
            Step::Polling(_) => self.say(Role::Monitor, "ring empty, polling..."),
            Step::Woke(cycle) => {
                self.say(
                    Role::Monitor,
                    format_args!(
                        "poll returned in {}ns (events {:?}), ring head = {}, tail = {}",
                        cycle.elapsed.as_nanos(),
                        cycle.readiness,
                        cycle.after.head,
                        cycle.after.tail
                    ),
                )?;
                if cycle.is_spurious() {
                    self.say(
                        Role::Monitor,
                        "spurious: saw EPOLLIN on perf fd with an empty ring",
                    )?;
                }
                Ok(())
            }
        }
    }

    /// Writes `report` as one JSON line.
    pub fn json<T: Serialize>(&mut self, report: &T) -> Result<(), crate::Error> {
        serde_json::to_writer(&mut self.out, report)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    /// Consumes the reporter, returning the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// The outcome of one harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Zero-based run number.
    pub run: u32,
    /// PID of the workload.
    pub workload: i32,
    /// What the consumer observed.
    pub consume: ConsumeReport,
    /// Spurious wakeups observed: zero or one.
    pub anomalies: usize,
    /// Time spent blocked in the wait cycle, if one was taken.
    pub latency_ns: Option<u128>,
    /// How the workload exited.
    pub workload_status: ExitStatus,
}

impl RunReport {
    /// Builds the report for a finished consumer run.
    pub fn new(
        run: u32,
        workload: i32,
        consume: ConsumeReport,
        workload_status: ExitStatus,
    ) -> Self {
        Self {
            run,
            workload,
            anomalies: consume.anomalies(),
            latency_ns: consume.wait.map(|cycle| cycle.elapsed.as_nanos()),
            consume,
            workload_status,
        }
    }

    /// The one-line verdict for this run.
    pub fn verdict(&self) -> String {
        match (&self.consume.wait, self.anomalies) {
            (None, _) => format!(
                "drained {} record(s), no wait needed",
                self.consume.drained.len()
            ),
            (Some(cycle), 0) => format!(
                "wakeup after {}ns was backed by data, no anomaly",
                cycle.elapsed.as_nanos()
            ),
            (Some(cycle), _) => format!(
                "ANOMALY: spurious wakeup, unblocked after {}ns with an empty ring",
                cycle.elapsed.as_nanos()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use perfspurious_perf::Drained;
    use perfspurious_perf::Readiness;
    use perfspurious_perf::SampleRecord;
    use perfspurious_perf::Snapshot;
    use perfspurious_perf::WaitCycle;

    use super::*;

    fn output(f: impl FnOnce(&mut Reporter<Vec<u8>>) -> io::Result<()>) -> String {
        let mut reporter = Reporter::new(Vec::new());
        f(&mut reporter).unwrap();
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    fn spurious_cycle() -> WaitCycle {
        WaitCycle {
            before: Snapshot::default(),
            readiness: Readiness::READABLE,
            elapsed: Duration::from_nanos(1500),
            after: Snapshot::default(),
        }
    }

    #[test]
    fn lines_are_prefixed_by_role() {
        let text = output(|r| {
            r.say(Role::Monitor, "signaling start")?;
            r.say(Role::Workload, "calling getpid")
        });
        assert_eq!(text, "monitor: signaling start\nworkload: calling getpid\n");
    }

    #[test]
    fn head_and_tail_are_printed() {
        let text = output(|r| r.step(Step::Read(Snapshot { head: 16, tail: 0 })));
        assert_eq!(text, "monitor: ring head = 16, tail = 0\n");
    }

    #[test]
    fn drained_records_are_labeled() {
        let sample = Drained {
            at: Snapshot { head: 32, tail: 0 },
            record: SampleRecord {
                kind: 9, // PERF_RECORD_SAMPLE
                misc: 2,
                size: 16,
                pid: 77,
                tid: 78,
            },
            new_tail: 16,
        };
        let text = output(|r| r.step(Step::Advanced(&sample)));
        assert_eq!(
            text,
            "monitor: advancing tail 0 -> 16 (sample, size 16, pid 77, tid 78)\n"
        );

        let lost = Drained {
            at: Snapshot { head: 32, tail: 16 },
            record: SampleRecord {
                kind: 2, // PERF_RECORD_LOST
                size: 16,
                ..SampleRecord::default()
            },
            new_tail: 32,
        };
        let text = output(|r| r.step(Step::Advanced(&lost)));
        assert_eq!(
            text,
            "monitor: advancing tail 16 -> 32 (non-sample record type 2, size 16)\n"
        );
    }

    #[test]
    fn spurious_wakeup_is_called_out() {
        let cycle = spurious_cycle();
        let text = output(|r| r.step(Step::Woke(&cycle)));
        assert!(text.contains("poll returned in 1500ns"), "{}", text);
        assert!(text.contains("spurious"), "{}", text);
    }

    #[test]
    fn verdicts() {
        let drained = ConsumeReport {
            first: Snapshot { head: 16, tail: 0 },
            drained: vec![Drained {
                at: Snapshot { head: 16, tail: 0 },
                record: SampleRecord::default(),
                new_tail: 16,
            }],
            wait: None,
        };
        let report = RunReport::new(0, 42, drained, ExitStatus::SUCCESS);
        assert_eq!(report.anomalies, 0);
        assert_eq!(report.latency_ns, None);
        assert!(report.verdict().starts_with("drained 1 record"));

        let waited = ConsumeReport {
            first: Snapshot::default(),
            drained: Vec::new(),
            wait: Some(spurious_cycle()),
        };
        let report = RunReport::new(1, 42, waited, ExitStatus::SUCCESS);
        assert_eq!(report.anomalies, 1);
        assert_eq!(report.latency_ns, Some(1500));
        assert!(report.verdict().starts_with("ANOMALY"));
    }

    #[test]
    fn json_line() {
        let report = RunReport::new(
            0,
            42,
            ConsumeReport {
                first: Snapshot::default(),
                drained: Vec::new(),
                wait: None,
            },
            ExitStatus::SUCCESS,
        );
        let mut reporter = Reporter::new(Vec::new());
        reporter.json(&report).unwrap();
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(text.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["workload"], 42);
        assert_eq!(value["anomalies"], 0);
        assert_eq!(value["workload_status"], 0);
    }
}
