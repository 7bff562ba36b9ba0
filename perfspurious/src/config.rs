/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use clap::Parser;
use perfspurious_perf::tracepoint_id;
use perfspurious_perf::Event;
use perfspurious_util::CommonToolArguments;
use syscalls::Sysno;

use crate::error::Error;

/// Data pages mapped behind the metadata page when `--pages` is not given.
pub const DEFAULT_PAGES: usize = 128;

/// The syscall the workload performs and the counter watches.
pub const ACTION: Sysno = Sysno::getpid;

/// Reproduce spurious EPOLLIN wakeups on a perf tracepoint descriptor.
///
/// With no flags this forks once, counts the child's single getpid and
/// reports whether epoll woke the monitor without a sample in the ring.
#[derive(Debug, Clone, Parser)]
#[clap(name = "perfspurious")]
pub struct Args {
    /// Data pages to map behind the metadata page. Must be a power of two.
    #[clap(long, value_name = "N", default_value_t = DEFAULT_PAGES)]
    pub pages: usize,

    /// Use this tracepoint id instead of looking up
    /// syscalls:sys_enter_getpid in tracefs.
    #[clap(long, value_name = "ID")]
    pub tracepoint_id: Option<u64>,

    /// After draining the ring, still block in epoll_wait once.
    #[clap(long)]
    pub poll_after_drain: bool,

    /// Repeat the whole harness this many times.
    #[clap(
        long,
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub runs: u32,

    /// Also print each run's report as a JSON line.
    #[clap(long)]
    pub json: bool,

    #[clap(flatten)]
    #[allow(missing_docs)]
    pub common: CommonToolArguments,
}

/// Everything one harness invocation needs, resolved from [`Args`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Data pages in the ring buffer.
    pub pages: usize,
    /// The counted event.
    pub event: Event,
    /// Block in epoll_wait once even after draining.
    pub poll_after_drain: bool,
    /// Number of independent runs.
    pub runs: u32,
    /// Emit JSON reports.
    pub json: bool,
}

impl Config {
    /// The fixed configuration: default page count, one run, text output.
    pub fn new(event: Event) -> Self {
        Self {
            pages: DEFAULT_PAGES,
            event,
            poll_after_drain: false,
            runs: 1,
            json: false,
        }
    }
}

/// Name of the tracepoint fired on entry to [`ACTION`].
pub fn action_tracepoint() -> String {
    format!("sys_enter_{}", ACTION.name())
}

impl Args {
    /// Resolves the arguments, looking up the tracepoint id if needed.
    pub fn config(&self) -> Result<Config, Error> {
        let id = match self.tracepoint_id {
            Some(id) => id,
            None => tracepoint_id("syscalls", &action_tracepoint())?,
        };
        Ok(Config {
            pages: self.pages,
            poll_after_drain: self.poll_after_drain,
            runs: self.runs,
            json: self.json,
            ..Config::new(Event::Tracepoint(id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_is_the_fixed_run() {
        let args = Args::try_parse_from(["perfspurious", "--tracepoint-id", "235"]).unwrap();
        assert_eq!(args.config().unwrap(), Config::new(Event::Tracepoint(235)));
    }

    #[test]
    fn flags() {
        let args = Args::try_parse_from([
            "perfspurious",
            "--pages",
            "8",
            "--tracepoint-id",
            "17",
            "--poll-after-drain",
            "--runs",
            "3",
            "--json",
        ])
        .unwrap();
        let config = args.config().unwrap();
        assert_eq!(config.pages, 8);
        assert_eq!(config.event, Event::Tracepoint(17));
        assert!(config.poll_after_drain);
        assert_eq!(config.runs, 3);
        assert!(config.json);
    }

    #[test]
    fn zero_runs_rejected() {
        assert!(Args::try_parse_from(["perfspurious", "--runs", "0"]).is_err());
    }

    #[test]
    fn tracepoint_name() {
        assert_eq!(action_tracepoint(), "sys_enter_getpid");
    }
}
