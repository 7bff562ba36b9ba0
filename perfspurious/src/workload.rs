/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The forked child. It performs the counted syscall exactly once, between
//! the `start` and `workload-done` rendezvous.

use core::fmt;
use std::io::Write;

use nix::sys::prctl;
use nix::sys::signal::Signal;
use perfspurious_process::Context;
use perfspurious_process::Errno;
use perfspurious_process::Error;
use perfspurious_process::Rendezvous;
use syscalls::syscall;

use crate::config::ACTION;
use crate::report::Reporter;
use crate::report::Role;

/// Where the workload is in its (strictly sequential) life.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkloadState {
    /// Blocked until the monitor has armed the counter.
    AwaitingStart,
    /// Issuing the counted syscall.
    PerformingAction,
    /// Told the monitor the syscall has happened.
    SignaledDone,
    /// Blocked until the monitor is done observing.
    AwaitingQuit,
    /// About to exit.
    Terminated,
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            WorkloadState::AwaitingStart => "awaiting-start",
            WorkloadState::PerformingAction => "performing-action",
            WorkloadState::SignaledDone => "signaled-done",
            WorkloadState::AwaitingQuit => "awaiting-quit",
            WorkloadState::Terminated => "terminated",
        })
    }
}

fn enter<W: Write>(out: &mut Reporter<W>, state: WorkloadState) -> Result<(), crate::Error> {
    tracing::debug!("workload -> {}", state);
    out.say(Role::Workload, format_args!("-> {}", state))?;
    Ok(())
}

// The counted action. A raw syscall so that no libc caching can elide it.
fn perform_action() -> Result<(), Error> {
    unsafe { syscall!(ACTION) }
        .map(drop)
        .map_err(|errno| Error::new(Errno::from_raw(errno.into_raw()), Context::Action))
}

/// Runs the workload side of the rendezvous.
pub(crate) fn run<W: Write>(rv: &Rendezvous, out: &mut Reporter<W>) -> Result<(), crate::Error> {
    enter(out, WorkloadState::AwaitingStart)?;
    out.say(Role::Workload, format_args!("waiting for {}", rv.start.name()))?;
    rv.start.wait()?;

    enter(out, WorkloadState::PerformingAction)?;
    out.say(Role::Workload, format_args!("calling {}", ACTION.name()))?;
    perform_action()?;

    out.say(Role::Workload, format_args!("signaling {}", rv.workload_done.name()))?;
    rv.workload_done.signal()?;
    enter(out, WorkloadState::SignaledDone)?;

    enter(out, WorkloadState::AwaitingQuit)?;
    out.say(Role::Workload, format_args!("waiting for {}", rv.quit.name()))?;
    rv.quit.wait()?;

    enter(out, WorkloadState::Terminated)?;
    out.say(Role::Workload, "exiting")?;
    Ok(())
}

/// Entry point of the forked child: runs the workload and exits the process.
pub(crate) fn main(rv: &Rendezvous) -> ! {
    // Nobody else signals our channels, so do not outlive the monitor.
    if let Err(errno) = prctl::set_pdeathsig(Signal::SIGKILL) {
        tracing::warn!("could not set parent death signal: {}", errno);
    }
    let mut out = Reporter::stdout();
    let code = match run(rv, &mut out) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("perfspurious: workload: {}", err);
            1
        }
    };
    std::process::exit(code)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn action_is_a_plain_syscall() {
        perform_action().unwrap();
    }

    #[test]
    fn states_are_ordered() {
        assert!(WorkloadState::AwaitingStart < WorkloadState::PerformingAction);
        assert!(WorkloadState::AwaitingQuit < WorkloadState::Terminated);
        assert_eq!(WorkloadState::SignaledDone.to_string(), "signaled-done");
    }

    #[test]
    fn rendezvous_sequence() {
        let rv = Arc::new(Rendezvous::new().unwrap());
        let child = {
            let rv = rv.clone();
            std::thread::spawn(move || {
                let mut out = Reporter::new(Vec::new());
                run(&rv, &mut out).unwrap();
                String::from_utf8(out.into_inner()).unwrap()
            })
        };
        rv.start.signal().unwrap();
        rv.workload_done.wait().unwrap();
        rv.quit.signal().unwrap();
        let text = child.join().unwrap();

        let lines: Vec<&str> = text.lines().filter(|l| !l.contains("->")).collect();
        assert_eq!(
            lines,
            [
                "workload: waiting for start",
                "workload: calling getpid",
                "workload: signaling workload-done",
                "workload: waiting for quit",
                "workload: exiting",
            ]
        );
    }
}
