/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */
use core::fmt;

use nix::errno::Errno;

/// The broad class of a failure. Every class is fatal for the harness; the
/// class only decides how the failure is described.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// A counter, descriptor or rendezvous channel could not be created.
    ResourceUnavailable,
    /// The kernel refused a flag, registration or ioctl on an existing
    /// descriptor.
    ConfigurationRejected,
    /// The counter's ring buffer could not be mapped.
    MapFailure,
    /// The workload process could not be created.
    ProcessCreationFailure,
    /// A blocking signal/wait primitive failed.
    WaitFailure,
    /// The workload could not be reaped.
    ReapFailure,
    /// The workload's observed action failed.
    WorkloadFailure,
}

impl ErrorKind {
    /// Returns a string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceUnavailable => "resource unavailable",
            Self::ConfigurationRejected => "configuration rejected",
            Self::MapFailure => "map failure",
            Self::ProcessCreationFailure => "process creation failure",
            Self::WaitFailure => "wait failure",
            Self::ReapFailure => "reap failure",
            Self::WorkloadFailure => "workload failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Write::write_str(f, self.as_str())
    }
}

/// The step that failed. Useful for knowing exactly which primitive refused
/// to cooperate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Context {
    /// Creating a rendezvous eventfd failed.
    EventFd,
    /// Signaling a rendezvous channel failed.
    Signal,
    /// Waiting on a rendezvous channel failed.
    Wait,
    /// The fork syscall failed.
    Fork,
    /// Reaping the workload failed.
    Waitpid,
    /// Looking up the tracepoint id failed.
    Tracepoint,
    /// The perf_event_open syscall failed.
    PerfEventOpen,
    /// Marking the counter descriptor non-blocking failed.
    SetNonBlocking,
    /// Mapping the counter's ring buffer failed.
    Mmap,
    /// The `PERF_EVENT_IOC_RESET` ioctl failed.
    Reset,
    /// The `PERF_EVENT_IOC_ENABLE` ioctl failed.
    Enable,
    /// Creating the epoll instance failed.
    EpollCreate,
    /// Registering the counter descriptor with epoll failed.
    EpollCtl,
    /// Waiting on the epoll instance failed.
    EpollWait,
    /// The workload's syscall failed.
    Action,
}

impl Context {
    /// Returns a string representation of the context. This is the name of
    /// the failing primitive.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventFd => "eventfd",
            Self::Signal => "eventfd write",
            Self::Wait => "eventfd read",
            Self::Fork => "fork",
            Self::Waitpid => "waitpid",
            Self::Tracepoint => "tracepoint lookup",
            Self::PerfEventOpen => "perf_event_open",
            Self::SetNonBlocking => "F_SETFL",
            Self::Mmap => "mmap",
            Self::Reset => "PERF_EVENT_IOC_RESET",
            Self::Enable => "PERF_EVENT_IOC_ENABLE",
            Self::EpollCreate => "epoll_create1",
            Self::EpollCtl => "epoll_ctl",
            Self::EpollWait => "epoll_wait",
            Self::Action => "getpid",
        }
    }

    /// The class of failure this step belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EventFd | Self::Tracepoint | Self::PerfEventOpen | Self::EpollCreate => {
                ErrorKind::ResourceUnavailable
            }
            Self::SetNonBlocking | Self::Reset | Self::Enable | Self::EpollCtl => {
                ErrorKind::ConfigurationRejected
            }
            Self::Mmap => ErrorKind::MapFailure,
            Self::Fork => ErrorKind::ProcessCreationFailure,
            Self::Signal | Self::Wait | Self::EpollWait => ErrorKind::WaitFailure,
            Self::Waitpid => ErrorKind::ReapFailure,
            Self::Action => ErrorKind::WorkloadFailure,
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Write::write_str(f, self.as_str())
    }
}

/// An error from one of the harness primitives. This is a thin wrapper around
/// [`Errno`], but with the step that went wrong.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Error {
    errno: Errno,
    context: Context,
}

impl Error {
    /// Creates a new `Error`.
    pub fn new(errno: Errno, context: Context) -> Self {
        Self { errno, context }
    }

    /// Converts a value `S` into an `Error`. Useful for turning `libc` function
    /// return types into a `Result`.
    pub fn result<S>(value: S, context: Context) -> Result<S, Self>
    where
        S: nix::errno::ErrnoSentinel + PartialEq<S>,
    {
        Errno::result(value).map_err(|err| Self::new(err, context))
    }

    /// Gets the errno.
    pub fn errno(&self) -> Errno {
        self.errno
    }

    /// Gets the error context.
    pub fn context(&self) -> Context {
        self.context
    }

    /// Gets the class of failure.
    pub fn kind(&self) -> ErrorKind {
        self.context.kind()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} failed: {}", self.context, self.errno)
    }
}

impl std::error::Error for Error {}

/// Attaches a [`Context`] to a bare errno result.
pub trait AddContext<T> {
    /// Wraps the error, if any, with `context`.
    fn context(self, context: Context) -> Result<T, Error>;
}

impl<T> AddContext<T> for Result<T, Errno> {
    fn context(self, context: Context) -> Result<T, Error> {
        self.map_err(move |errno| Error::new(errno, context))
    }
}

impl<T> AddContext<T> for Result<T, std::io::Error> {
    fn context(self, context: Context) -> Result<T, Error> {
        self.map_err(move |err| {
            let errno = err
                .raw_os_error()
                .map(Errno::from_raw)
                .unwrap_or(Errno::EIO);
            Error::new(errno, context)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_step() {
        let err = Error::new(Errno::EACCES, Context::PerfEventOpen);
        let msg = err.to_string();
        assert!(msg.starts_with("perf_event_open failed: "), "{}", msg);
        assert!(msg.contains("EACCES"), "{}", msg);
    }

    #[test]
    fn steps_map_onto_the_taxonomy() {
        assert_eq!(Context::PerfEventOpen.kind(), ErrorKind::ResourceUnavailable);
        assert_eq!(Context::EventFd.kind(), ErrorKind::ResourceUnavailable);
        assert_eq!(Context::SetNonBlocking.kind(), ErrorKind::ConfigurationRejected);
        assert_eq!(Context::EpollCtl.kind(), ErrorKind::ConfigurationRejected);
        assert_eq!(Context::Mmap.kind(), ErrorKind::MapFailure);
        assert_eq!(Context::Fork.kind(), ErrorKind::ProcessCreationFailure);
    }

    #[test]
    fn io_errors_keep_their_errno() {
        let res: Result<(), std::io::Error> =
            Err(std::io::Error::from_raw_os_error(libc::ENOENT));
        let err = res.context(Context::Tracepoint).unwrap_err();
        assert_eq!(err.errno(), Errno::ENOENT);
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);

        let res: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad id"));
        assert_eq!(res.context(Context::Tracepoint).unwrap_err().errno(), Errno::EIO);
    }
}
