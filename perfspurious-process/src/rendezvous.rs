/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Counting semaphores built on `eventfd(EFD_SEMAPHORE)`. The descriptors are
//! inherited across `fork`, which is how the monitor and the workload end up
//! sharing them.

use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;

use nix::errno::Errno;
use tracing::trace;

use crate::error::Context;
use crate::error::Error;

/// One rendezvous point. `signal` adds one to the count and never blocks;
/// `wait` blocks until the count is positive and then takes one from it.
#[derive(Debug)]
pub struct Channel {
    name: &'static str,
    fd: OwnedFd,
}

impl Channel {
    /// Creates a channel with a count of zero. `name` identifies the channel in
    /// logs and in the harness output.
    pub fn new(name: &'static str) -> Result<Self, Error> {
        let fd = Error::result(
            unsafe { libc::eventfd(0, libc::EFD_SEMAPHORE) },
            Context::EventFd,
        )?;
        // SAFETY: eventfd just handed us this descriptor and nobody else owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        trace!(channel = name, fd = fd.as_raw_fd(), "created rendezvous channel");
        Ok(Self { name, fd })
    }

    /// The name given at creation.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Increments the count by one. The increment is retained if nobody is
    /// waiting yet.
    pub fn signal(&self) -> Result<(), Error> {
        let value = 1u64;
        loop {
            let res = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    &value as *const u64 as *const libc::c_void,
                    core::mem::size_of::<u64>(),
                )
            };
            match Errno::result(res) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(Error::new(errno, Context::Signal)),
            }
        }
        trace!(channel = self.name, "signaled");
        Ok(())
    }

    /// Blocks until the count is positive, then decrements it by one. Exactly
    /// one `wait` is satisfied per `signal`.
    pub fn wait(&self) -> Result<(), Error> {
        // With EFD_SEMAPHORE each successful read returns 1 and takes exactly
        // one from the count.
        let mut value = 0u64;
        loop {
            let res = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    &mut value as *mut u64 as *mut libc::c_void,
                    core::mem::size_of::<u64>(),
                )
            };
            match Errno::result(res) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(Error::new(errno, Context::Wait)),
            }
        }
        debug_assert_eq!(value, 1);
        trace!(channel = self.name, "wait satisfied");
        Ok(())
    }
}

impl AsFd for Channel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// The three channels that order one harness run:
/// `start` (monitor to workload), `workload_done` (workload to monitor) and
/// `quit` (monitor to workload).
#[derive(Debug)]
pub struct Rendezvous {
    /// The workload may perform its action.
    pub start: Channel,
    /// The workload has performed its action.
    pub workload_done: Channel,
    /// The workload may exit.
    pub quit: Channel,
}

impl Rendezvous {
    /// Creates a fresh set of channels, all with a count of zero. Must be
    /// called before forking so that both processes inherit them.
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            start: Channel::new("start")?,
            workload_done: Channel::new("workload-done")?,
            quit: Channel::new("quit")?,
        })
    }
}
