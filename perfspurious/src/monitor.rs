/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The parent process: sets up the rendezvous, forks the workload, arms the
//! counter on it and runs the consumer once.

use core::fmt;
use std::io;
use std::io::Write;

use nix::sys::signal::kill;
use nix::sys::signal::Signal;
use perfspurious_perf::CounterSession;
use perfspurious_perf::NotificationEndpoint;
use perfspurious_perf::RingConsumer;
use perfspurious_process::fork;
use perfspurious_process::reap;
use perfspurious_process::Channel;
use perfspurious_process::Fork;
use perfspurious_process::Pid;
use perfspurious_process::Rendezvous;
use tracing::debug;
use tracing::warn;

use crate::config::Config;
use crate::config::ACTION;
use crate::error::Error;
use crate::report::Reporter;
use crate::report::Role;
use crate::report::RunReport;
use crate::workload;

/// Where the monitor is in a run. Transitions are strictly sequential.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum MonitorState {
    Created,
    SessionArmed,
    AwaitingWorkload,
    DrainingOrWaiting,
    Reporting,
    Terminating,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            MonitorState::Created => "created",
            MonitorState::SessionArmed => "session-armed",
            MonitorState::AwaitingWorkload => "awaiting-workload",
            MonitorState::DrainingOrWaiting => "draining-or-waiting",
            MonitorState::Reporting => "reporting",
            MonitorState::Terminating => "terminating",
        })
    }
}

fn enter<W: Write>(out: &mut Reporter<W>, state: MonitorState) -> io::Result<()> {
    debug!("monitor -> {}", state);
    out.say(Role::Monitor, format_args!("-> {}", state))
}

fn signal<W: Write>(out: &mut Reporter<W>, channel: &Channel) -> Result<(), Error> {
    out.say(Role::Monitor, format_args!("signaling {}", channel.name()))?;
    channel.signal()?;
    Ok(())
}

fn wait<W: Write>(out: &mut Reporter<W>, channel: &Channel) -> Result<(), Error> {
    out.say(Role::Monitor, format_args!("waiting for {}", channel.name()))?;
    channel.wait()?;
    Ok(())
}

// Kills and reaps the workload if the monitor bails out before signaling
// `quit`. Otherwise the child would block on its channels forever.
struct WorkloadGuard(Option<Pid>);

impl WorkloadGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for WorkloadGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.0.take() {
            warn!("monitor failed, killing workload {}", pid);
            let _ = kill(pid, Signal::SIGKILL);
            let _ = reap(pid);
        }
    }
}

/// Runs the harness once: fresh channels, a fresh workload and a fresh
/// counter session. Returns once the workload has been reaped.
pub fn run_once<W: Write>(
    config: &Config,
    run: u32,
    out: &mut Reporter<W>,
) -> Result<RunReport, Error> {
    enter(out, MonitorState::Created)?;
    let rv = Rendezvous::new()?;

    out.say(Role::Monitor, "forking")?;
    // Flush before forking so the child does not inherit buffered output.
    io::stdout().flush()?;
    // SAFETY: the harness is single-threaded at this point.
    let pid = match unsafe { fork() }? {
        Fork::Child => workload::main(&rv),
        Fork::Parent(pid) => pid,
    };
    let mut guard = WorkloadGuard(Some(pid));

    // The session can only be scoped to the workload once its pid is known.
    let session = CounterSession::open(config.event, pid)?;
    session.set_nonblocking()?;
    let mut endpoint = NotificationEndpoint::new()?;
    endpoint.register_readable_edge(&session)?;
    let ring = session.map_ring_buffer(config.pages)?;
    session.reset()?;
    session.enable()?;
    enter(out, MonitorState::SessionArmed)?;
    out.say(
        Role::Monitor,
        format_args!(
            "counting {:?} ({}) in workload {}, {} data pages ({} bytes)",
            config.event,
            ACTION.name(),
            pid,
            config.pages,
            ring.data_size()
        ),
    )?;

    signal(out, &rv.start)?;

    enter(out, MonitorState::AwaitingWorkload)?;
    wait(out, &rv.workload_done)?;

    enter(out, MonitorState::DrainingOrWaiting)?;
    out.say(Role::Monitor, "reading ring")?;
    let mut output_err = None;
    let consume = RingConsumer::new()
        .poll_after_drain(config.poll_after_drain)
        .run(&ring, &mut endpoint, |step| {
            if let Err(err) = out.step(step) {
                output_err.get_or_insert(err);
            }
        })?;
    if let Some(err) = output_err {
        return Err(err.into());
    }

    enter(out, MonitorState::Reporting)?;
    signal(out, &rv.quit)?;

    enter(out, MonitorState::Terminating)?;
    guard.disarm();
    let status = reap(pid)?;
    if !status.success() {
        warn!("workload {} did not exit cleanly: {}", pid, status);
    }
    out.say(Role::Monitor, format_args!("workload {} {}", pid, status))?;

    let report = RunReport::new(run, pid.as_raw(), consume, status);
    out.say(Role::Monitor, format_args!("verdict: {}", report.verdict()))?;
    Ok(report)
}
