/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A harness that reproduces spurious `EPOLLIN` wakeups on a perf tracepoint
//! descriptor.
//!
//! The monitor forks a workload, arms a `syscalls:sys_enter_getpid` sampling
//! counter on it and lets it call `getpid` once. It then either drains the
//! counter's ring buffer or, if the ring looks empty, blocks in `epoll_wait`
//! and checks whether the wakeup it got was backed by a sample.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod config;
mod error;
mod monitor;
mod report;
mod workload;

pub use config::Args;
pub use config::Config;
pub use config::DEFAULT_PAGES;
pub use error::Error;
pub use monitor::run_once;
pub use report::Reporter;
pub use report::Role;
pub use report::RunReport;
pub use workload::WorkloadState;

/// Runs the harness `config.runs` times, each with fresh channels and a fresh
/// counter session, printing to stdout.
pub fn run(config: &Config) -> Result<Vec<RunReport>, Error> {
    let mut out = Reporter::stdout();
    let mut reports = Vec::with_capacity(config.runs as usize);
    for run in 0..config.runs {
        let report = run_once(config, run, &mut out)?;
        if config.json {
            out.json(&report)?;
        }
        reports.push(report);
    }
    if config.runs > 1 {
        let anomalies: usize = reports.iter().map(|r| r.anomalies).sum();
        out.say(
            Role::Monitor,
            format_args!("{} runs, {} spurious wakeups", config.runs, anomalies),
        )?;
    }
    Ok(reports)
}
