/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Process plumbing for the spurious-wakeup harness: the eventfd rendezvous
//! channels that sequence the monitor and the workload, `fork`/`waitpid`
//! wrappers, and the error type shared by every fallible primitive.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod error;
mod exit_status;
mod fork;
mod rendezvous;

pub use error::AddContext;
pub use error::Context;
pub use error::Error;
pub use error::ErrorKind;
pub use exit_status::ExitStatus;
pub use fork::fork;
pub use fork::reap;
pub use fork::Fork;
// Re-export these since they show up in the public API.
pub use nix::errno::Errno;
pub use nix::unistd::Pid;
pub use rendezvous::Channel;
pub use rendezvous::Rendezvous;
