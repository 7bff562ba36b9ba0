/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */
use core::fmt;

use nix::sys::signal::Signal;

/// Describes how the workload finished, as reported by `waitpid`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum ExitStatus {
    /// Program exited with an exit code.
    Exited(i32),
    /// Program killed by signal, with or without a coredump.
    Signaled(Signal, bool),
}

impl ExitStatus {
    /// A successful exit status.
    pub const SUCCESS: Self = ExitStatus::Exited(0);

    /// Construct an `ExitStatus` from a raw wait status.
    pub fn from_raw(code: i32) -> Self {
        if libc::WIFEXITED(code) {
            ExitStatus::Exited(libc::WEXITSTATUS(code))
        } else {
            // Unknown signal numbers (realtime signals) are folded into
            // SIGKILL; they cannot come out of this harness' workload.
            ExitStatus::Signaled(
                Signal::try_from(libc::WTERMSIG(code)).unwrap_or(Signal::SIGKILL),
                libc::WCOREDUMP(code),
            )
        }
    }

    /// Converts the exit status into a raw wait status.
    pub fn into_raw(self) -> i32 {
        match self {
            ExitStatus::Exited(code) => code << 8,
            ExitStatus::Signaled(sig, coredump) => {
                if coredump {
                    (sig as i32 | 0x80) & 0xff
                } else {
                    sig as i32 & 0x7f
                }
            }
        }
    }

    /// Was termination successful? Signal termination is not considered a
    /// success, and success is defined as a zero exit status.
    pub fn success(&self) -> bool {
        self == &ExitStatus::SUCCESS
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with code {}", code),
            ExitStatus::Signaled(sig, true) => write!(f, "killed by {} (core dumped)", sig),
            ExitStatus::Signaled(sig, false) => write!(f, "killed by {}", sig),
        }
    }
}

impl serde::Serialize for ExitStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_i32(self.into_raw())
    }
}
