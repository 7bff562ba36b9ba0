/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use nix::errno::Errno;
use nix::unistd::ForkResult;
use nix::unistd::Pid;
use tracing::debug;

use crate::error::AddContext;
use crate::error::Context;
use crate::error::Error;
use crate::exit_status::ExitStatus;

/// Which side of a [`fork`] the caller is on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Fork {
    /// The calling process, holding the child's PID for later reaping.
    Parent(Pid),
    /// The new process.
    Child,
}

/// Duplicates the calling process. Descriptors, including rendezvous
/// channels, are inherited by the child.
///
/// # Safety
///
/// Same as [`nix::unistd::fork`]: if the caller is multi-threaded, the child
/// may only call async-signal-safe functions.
pub unsafe fn fork() -> Result<Fork, Error> {
    match unsafe { nix::unistd::fork() }.context(Context::Fork)? {
        ForkResult::Parent { child } => {
            debug!("forked child {}", child);
            Ok(Fork::Parent(child))
        }
        ForkResult::Child => Ok(Fork::Child),
    }
}

/// Blocks until `pid` exits and returns how it exited.
pub fn reap(pid: Pid) -> Result<ExitStatus, Error> {
    let mut status: libc::c_int = 0;
    loop {
        match Errno::result(unsafe { libc::waitpid(pid.as_raw(), &mut status, 0) }) {
            Ok(_) => break,
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(Error::new(errno, Context::Waitpid)),
        }
    }
    let status = ExitStatus::from_raw(status);
    debug!("reaped child {}: {}", pid, status);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::Signal;

    use super::*;

    #[test]
    fn reap_normal_exit() {
        match unsafe { fork() }.unwrap() {
            Fork::Child => unsafe { libc::_exit(42) },
            Fork::Parent(child) => {
                assert_eq!(reap(child).unwrap(), ExitStatus::Exited(42));
            }
        }
    }

    #[test]
    fn reap_signaled_exit() {
        match unsafe { fork() }.unwrap() {
            Fork::Child => unsafe {
                libc::signal(libc::SIGALRM, libc::SIG_DFL);
                libc::raise(libc::SIGALRM);
                libc::_exit(0)
            },
            Fork::Parent(child) => {
                assert_eq!(
                    reap(child).unwrap(),
                    ExitStatus::Signaled(Signal::SIGALRM, false)
                );
            }
        }
    }

    #[test]
    fn reap_unknown_child() {
        let err = reap(Pid::from_raw(i32::MAX)).unwrap_err();
        assert_eq!(err.errno(), Errno::ECHILD);
        assert_eq!(err.context(), Context::Waitpid);
    }
}
