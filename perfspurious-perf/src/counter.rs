/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A minimal wrapper around `perf_event_open(2)` for a single sampling
//! counter scoped to one process.
//!
//! Explicitly missing (because they are unnecessary) perf features include:
//! * Grouping
//! * Sample types other than `PERF_SAMPLE_TID`
//! * Reading counter values
//! * Signal delivery on overflow
//!
//! The arguments and behaviors in this module correspond exactly to those of
//! `perf_event_open(2)`. No attempt is made to paper over perf's behavior;
//! observing it is the whole point.

use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;

use lazy_static::lazy_static;
use perf_event_open_sys::bindings as perf;
use perf_event_open_sys::ioctls;
use perfspurious_process::Context;
use perfspurious_process::Errno;
use perfspurious_process::Error;
use perfspurious_process::Pid;
use tracing::debug;
use tracing::info;

use crate::ring::RingBuffer;

/// An incomplete enumeration of events perf can monitor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A kernel tracepoint, identified by the id tracefs assigns it.
    Tracepoint(u64),
    /// A perf-supported software event.
    Software(SoftwareEvent),
}

/// An incomplete enumeration of software events perf can monitor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SoftwareEvent {
    /// A placeholder event that counts nothing.
    Dummy,
}

impl Event {
    /// The event class, `perf_event_attr.type`.
    pub fn attr_type(self) -> u32 {
        match self {
            Event::Tracepoint(_) => perf::PERF_TYPE_TRACEPOINT,
            Event::Software(_) => perf::PERF_TYPE_SOFTWARE,
        }
    }

    /// The event selector within the class, `perf_event_attr.config`.
    pub fn attr_config(self) -> u64 {
        match self {
            Event::Tracepoint(id) => id,
            Event::Software(SoftwareEvent::Dummy) => perf::PERF_COUNT_SW_DUMMY.into(),
        }
    }
}

/// Builder for a [`CounterSession`]. Contains only the subset of the
/// attributes this harness manipulates.
#[derive(Debug, Clone)]
pub struct Builder {
    pid: Pid,
    cpu: libc::c_int,
    evt: Event,
    sample_period: u64,
    wakeup_events: u32,
    sample_tid: bool,
    exclude_kernel: bool,
}

impl Builder {
    /// Initialize the builder. The initial configuration is a software
    /// counting event that never increments.
    ///
    /// `cpu` should almost always be `-1`, which tracks `pid` across all
    /// CPUs.
    pub fn new(pid: Pid, cpu: libc::c_int) -> Self {
        Self {
            pid,
            cpu,
            evt: Event::Software(SoftwareEvent::Dummy),
            sample_period: 0,
            wakeup_events: 1,
            sample_tid: false,
            exclude_kernel: false,
        }
    }

    /// Select the event to monitor.
    pub fn event(&mut self, evt: Event) -> &mut Self {
        self.evt = evt;
        self
    }

    /// Set the period for sample collection. Default is 0, which creates a
    /// counting event. A period of 1 writes a sample for every occurrence.
    pub fn sample_period(&mut self, period: u64) -> &mut Self {
        self.sample_period = period;
        self
    }

    /// Number of samples after which the descriptor becomes readable.
    pub fn wakeup_events(&mut self, events: u32) -> &mut Self {
        self.wakeup_events = events;
        self
    }

    /// Record the pid/tid of the task that triggered each sample.
    pub fn sample_tid(&mut self, enable: bool) -> &mut Self {
        self.sample_tid = enable;
        self
    }

    /// Only count user-space occurrences. Lowers the permission requirements
    /// but hides kernel events such as tracepoints.
    pub fn exclude_kernel(&mut self, enable: bool) -> &mut Self {
        self.exclude_kernel = enable;
        self
    }

    fn attr(&self) -> perf::perf_event_attr {
        let mut attr = perf::perf_event_attr::default();
        attr.size = core::mem::size_of_val(&attr) as u32;
        attr.type_ = self.evt.attr_type();
        attr.config = self.evt.attr_config();
        attr.__bindgen_anon_1.sample_period = self.sample_period;
        attr.__bindgen_anon_2.wakeup_events = self.wakeup_events;
        if self.sample_tid {
            attr.sample_type |= perf::PERF_SAMPLE_TID as u64;
        }
        attr.set_disabled(1); // armed later through `enable`
        attr.set_exclude_kernel(self.exclude_kernel.into());
        attr
    }

    /// Render the builder into a `CounterSession`. Created sessions begin in
    /// a disabled state. Additional initialization steps should be performed,
    /// followed by [`CounterSession::reset`] and [`CounterSession::enable`].
    pub fn create(&self) -> Result<CounterSession, Error> {
        let attr = self.attr();
        let group_fd: libc::c_int = -1; // always create a new group
        let flags = perf::PERF_FLAG_FD_CLOEXEC;

        let fd = Error::result(
            unsafe {
                libc::syscall(
                    libc::SYS_perf_event_open,
                    &attr,
                    self.pid.as_raw(),
                    self.cpu,
                    group_fd,
                    flags,
                )
            },
            Context::PerfEventOpen,
        )?;
        // SAFETY: perf_event_open just handed us this descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd as RawFd) };

        debug!(
            "perf_event_open(type={}, config={}, period={}, wakeup_events={}, \
             sample_type={:#x}, pid={}) = {}",
            attr.type_,
            attr.config,
            self.sample_period,
            self.wakeup_events,
            attr.sample_type,
            self.pid,
            fd.as_raw_fd()
        );

        Ok(CounterSession { fd })
    }
}

/// One configured perf counter bound to {event, target process}. The
/// descriptor is released when the session is dropped.
#[derive(Debug)]
pub struct CounterSession {
    fd: OwnedFd,
}

impl CounterSession {
    /// Opens a sampling session for `event` in process `pid`: disabled at
    /// creation, a sample on every occurrence, readable after one sample and
    /// with the triggering pid/tid captured in each sample.
    pub fn open(event: Event, pid: Pid) -> Result<Self, Error> {
        Builder::new(pid, -1)
            .event(event)
            .sample_period(1)
            .wakeup_events(1)
            .sample_tid(true)
            .create()
    }

    /// Marks the descriptor non-blocking. Samples are only ever read through
    /// the ring buffer, so this just guarantees a stray `read` cannot block.
    pub fn set_nonblocking(&self) -> Result<(), Error> {
        let fd = self.fd.as_raw_fd();
        let flags = Error::result(
            unsafe { libc::fcntl(fd, libc::F_GETFL) },
            Context::SetNonBlocking,
        )?;
        Error::result(
            unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) },
            Context::SetNonBlocking,
        )?;
        Ok(())
    }

    /// Maps the session's ring buffer: one metadata page followed by `pages`
    /// data pages. `pages` must be a power of two.
    pub fn map_ring_buffer(&self, pages: usize) -> Result<RingBuffer, Error> {
        RingBuffer::map(self.fd.as_fd(), pages)
    }

    /// Call the `PERF_EVENT_IOC_RESET` ioctl. Resets the counter value to 0.
    pub fn reset(&self) -> Result<(), Error> {
        Error::result(unsafe { ioctls::RESET(self.fd.as_raw_fd(), 0) }, Context::Reset)?;
        Ok(())
    }

    /// Call the `PERF_EVENT_IOC_ENABLE` ioctl. Arms the counter; there is no
    /// way back to the disabled state short of dropping the session.
    pub fn enable(&self) -> Result<(), Error> {
        Error::result(unsafe { ioctls::ENABLE(self.fd.as_raw_fd(), 0) }, Context::Enable)?;
        Ok(())
    }
}

impl AsFd for CounterSession {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

// Test if we may open perf events at all, using the least demanding event
// there is.
fn test_perf_support() -> bool {
    let res = Builder::new(Pid::from_raw(0), -1)
        .event(Event::Software(SoftwareEvent::Dummy))
        .exclude_kernel(true)
        .create();
    match res {
        Ok(_) => true,
        Err(err) => {
            match err.errno() {
                Errno::ENOENT | Errno::EPERM | Errno::EACCES | Errno::ENOSYS => {
                    info!("Perf feature check failed due to {}", err.errno())
                }
                errno => info!("Unexpected error during perf feature check: {}", errno),
            }
            false
        }
    }
}

lazy_static! {
    static ref IS_PERF_SUPPORTED: bool = test_perf_support();
}

/// Returns true if the current system configuration allows `perf_event_open`.
pub fn is_perf_supported() -> bool {
    *IS_PERF_SUPPORTED
}

/// Concisely return if `is_perf_supported` is `false`. Useful for guarding
/// tests.
#[macro_export]
macro_rules! ret_without_perf {
    () => {
        if !$crate::is_perf_supported() {
            return;
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn event_encoding() {
        assert_eq!(Event::Tracepoint(235).attr_type(), perf::PERF_TYPE_TRACEPOINT);
        assert_eq!(Event::Tracepoint(235).attr_config(), 235);
        assert_eq!(
            Event::Software(SoftwareEvent::Dummy).attr_type(),
            perf::PERF_TYPE_SOFTWARE
        );
        assert_eq!(
            Event::Software(SoftwareEvent::Dummy).attr_config(),
            u64::from(perf::PERF_COUNT_SW_DUMMY)
        );
    }

    #[test]
    fn open_sets_sampling_attributes() {
        let mut builder = Builder::new(Pid::from_raw(1234), -1);
        builder
            .event(Event::Tracepoint(42))
            .sample_period(1)
            .wakeup_events(1)
            .sample_tid(true);
        let attr = builder.attr();
        assert_eq!(attr.type_, perf::PERF_TYPE_TRACEPOINT);
        assert_eq!(attr.config, 42);
        assert_eq!(unsafe { attr.__bindgen_anon_1.sample_period }, 1);
        assert_eq!(unsafe { attr.__bindgen_anon_2.wakeup_events }, 1);
        assert_eq!(attr.sample_type, perf::PERF_SAMPLE_TID as u64);
        assert_eq!(attr.disabled(), 1);
        assert_eq!(attr.exclude_kernel(), 0);
    }

    #[test]
    fn open_and_arm_self() {
        ret_without_perf!();
        let session = Builder::new(Pid::this(), -1)
            .event(Event::Software(SoftwareEvent::Dummy))
            .sample_period(1)
            .sample_tid(true)
            .exclude_kernel(true)
            .create()
            .unwrap();
        session.set_nonblocking().unwrap();
        let flags = unsafe { libc::fcntl(session.as_fd().as_raw_fd(), libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);
        session.reset().unwrap();
        session.enable().unwrap();
    }

    #[test]
    fn open_missing_process() {
        ret_without_perf!();
        // Pid i32::MAX never exists (pid_max is far smaller).
        let err = Builder::new(Pid::from_raw(i32::MAX), -1)
            .event(Event::Software(SoftwareEvent::Dummy))
            .exclude_kernel(true)
            .create()
            .unwrap_err();
        assert_eq!(err.errno(), Errno::ESRCH);
        assert_eq!(err.context(), Context::PerfEventOpen);
    }
}
