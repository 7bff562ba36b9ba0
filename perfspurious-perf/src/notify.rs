/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The multiplexer side of the harness: an epoll instance watching the
//! counter descriptor, and the [`Waiter`] seam the consumer blocks through.

use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;

use bitflags::bitflags;
use perfspurious_process::Context;
use perfspurious_process::Errno;
use perfspurious_process::Error;
use tracing::debug;

bitflags! {
    /// Readiness reported by the multiplexer for the watched descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
    #[serde(transparent)]
    pub struct Readiness: u32 {
        /// Data may be read (`EPOLLIN`).
        const READABLE = libc::EPOLLIN as u32;
        /// Urgent data (`EPOLLPRI`).
        const PRIORITY = libc::EPOLLPRI as u32;
        /// Writes would not block (`EPOLLOUT`).
        const WRITABLE = libc::EPOLLOUT as u32;
        /// Error condition (`EPOLLERR`).
        const ERROR = libc::EPOLLERR as u32;
        /// Hang up (`EPOLLHUP`). perf reports this once the target exits.
        const HANGUP = libc::EPOLLHUP as u32;
    }
}

/// Something that blocks until one readiness event is available.
pub trait Waiter {
    /// Blocks, without a timeout, until one event is reported.
    fn wait_one(&mut self) -> Result<Readiness, Error>;
}

/// An epoll instance with at most one registered descriptor.
#[derive(Debug)]
pub struct NotificationEndpoint {
    epoll: OwnedFd,
}

impl NotificationEndpoint {
    /// Creates an empty epoll instance.
    pub fn new() -> Result<Self, Error> {
        let fd = Error::result(
            unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) },
            Context::EpollCreate,
        )?;
        // SAFETY: epoll_create1 just handed us this descriptor.
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { epoll })
    }

    /// Registers read interest in `fd`, edge-triggered: one notification per
    /// transition to readable.
    pub fn register_readable_edge<F: AsFd>(&self, fd: F) -> Result<(), Error> {
        let fd = fd.as_fd().as_raw_fd();
        let mut event = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLET) as u32,
            u64: fd as u64,
        };
        Error::result(
            unsafe {
                libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
            },
            Context::EpollCtl,
        )?;
        debug!(
            "registered fd {} with epoll {} for EPOLLIN | EPOLLET",
            fd,
            self.epoll.as_raw_fd()
        );
        Ok(())
    }
}

impl Waiter for NotificationEndpoint {
    fn wait_one(&mut self) -> Result<Readiness, Error> {
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        loop {
            let res = unsafe { libc::epoll_wait(self.epoll.as_raw_fd(), &mut event, 1, -1) };
            match Errno::result(res) {
                Ok(0) => return Ok(Readiness::empty()),
                Ok(_) => return Ok(Readiness::from_bits_retain(event.events)),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(Error::new(errno, Context::EpollWait)),
            }
        }
    }
}
