/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The monitoring half of the harness: a single perf counter scoped to one
//! process, its kernel-shared ring buffer, an edge-triggered epoll endpoint
//! watching the counter, and the consumer that decides whether a wakeup was
//! backed by data.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod consumer;
mod counter;
mod notify;
mod ring;
mod tracepoint;

pub use consumer::ConsumeReport;
pub use consumer::Drained;
pub use consumer::RingConsumer;
pub use consumer::Snapshot;
pub use consumer::Step;
pub use consumer::WaitCycle;
pub use counter::is_perf_supported;
pub use counter::Builder;
pub use counter::CounterSession;
pub use counter::Event;
pub use counter::SoftwareEvent;
pub use notify::NotificationEndpoint;
pub use notify::Readiness;
pub use notify::Waiter;
pub use ring::RingBuffer;
pub use ring::RingCursor;
pub use ring::SampleRecord;
pub use ring::SAMPLE_RECORD_SIZE;
pub use tracepoint::tracepoint_id;
pub use tracepoint::tracepoint_id_in;
pub use tracepoint::TRACEFS_ROOTS;
