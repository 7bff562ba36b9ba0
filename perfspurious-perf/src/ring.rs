/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The perf ring buffer shared with the kernel.
//!
//! The first page holds `perf_event_mmap_page`. The kernel is the only writer
//! of `data_head` and we are the only writer of `data_tail`. There is no lock:
//! `data_head` is read with acquire ordering before any record is looked at,
//! and `data_tail` is published with release ordering once we are done with
//! the bytes behind it. This mirrors `perf_mmap__read_head` and
//! `perf_mmap__write_tail` in the kernel's tools/perf.

use core::ptr::NonNull;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::ptr::addr_of_mut;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use lazy_static::lazy_static;
use nix::unistd::sysconf;
use nix::unistd::SysconfVar;
use perf_event_open_sys::bindings as perf;
use perfspurious_process::Context;
use perfspurious_process::Errno;
use perfspurious_process::Error;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

/// Size of one sample record for `sample_type = PERF_SAMPLE_TID`: the
/// `perf_event_header` followed by `u32 pid, u32 tid`.
pub const SAMPLE_RECORD_SIZE: u64 =
    (core::mem::size_of::<perf::perf_event_header>() + 8) as u64;

lazy_static! {
    static ref PAGE_SIZE: usize = sysconf(SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .and_then(|size| usize::try_from(size).ok())
        .unwrap_or(4096);
}

/// One decoded record from the data region.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SampleRecord {
    /// `perf_event_header.type`, e.g. `PERF_RECORD_SAMPLE`.
    pub kind: u32,
    /// `perf_event_header.misc`.
    pub misc: u16,
    /// `perf_event_header.size`, including the header.
    pub size: u16,
    /// Process that triggered the sample.
    pub pid: u32,
    /// Thread that triggered the sample.
    pub tid: u32,
}

impl SampleRecord {
    /// Decodes a record from its raw bytes, in native byte order.
    pub fn from_bytes(bytes: &[u8; SAMPLE_RECORD_SIZE as usize]) -> Self {
        let u32_at = |at: usize| {
            u32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u16_at = |at: usize| u16::from_ne_bytes([bytes[at], bytes[at + 1]]);
        Self {
            kind: u32_at(0),
            misc: u16_at(4),
            size: u16_at(6),
            pid: u32_at(8),
            tid: u32_at(12),
        }
    }

    /// Returns true for `PERF_RECORD_SAMPLE` records.
    pub fn is_sample(&self) -> bool {
        self.kind == perf::PERF_RECORD_SAMPLE
    }
}

/// The consumer's view of a perf-style ring: a producer cursor it may only
/// read and a consumer cursor it owns.
pub trait RingCursor {
    /// Loads `data_head` with acquire ordering. Nothing read from the data
    /// region after this call can be older than the returned head.
    fn head(&self) -> u64;

    /// Loads `data_tail`. Only the consumer writes it, so no ordering is
    /// required.
    fn tail(&self) -> u64;

    /// Publishes a new `data_tail` with release ordering, handing the bytes
    /// before it back to the producer.
    fn set_tail(&self, tail: u64);

    /// Decodes the record starting at cursor `offset`, which may wrap.
    fn record_at(&self, offset: u64) -> SampleRecord;
}

/// A mapped perf ring buffer. Unmapped on drop.
#[derive(Debug)]
pub struct RingBuffer {
    base: NonNull<u8>,
    page_size: usize,
    data_size: usize,
}

impl RingBuffer {
    /// Maps `1 + pages` pages of the perf descriptor `fd`.
    pub(crate) fn map(fd: BorrowedFd<'_>, pages: usize) -> Result<Self, Error> {
        if !pages.is_power_of_two() {
            return Err(Error::new(Errno::EINVAL, Context::Mmap));
        }
        let page_size = *PAGE_SIZE;
        let data_size = pages
            .checked_mul(page_size)
            .ok_or(Error::new(Errno::EINVAL, Context::Mmap))?;
        let len = data_size + page_size;

        let ptr = Error::result(
            unsafe {
                libc::mmap(
                    core::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE, // writable so we can move data_tail
                    libc::MAP_SHARED,
                    fd.as_raw_fd(),
                    0,
                )
            },
            Context::Mmap,
        )?;
        let base =
            NonNull::new(ptr as *mut u8).ok_or(Error::new(Errno::EFAULT, Context::Mmap))?;
        debug!(
            "mapped perf ring at {:p}: {} data pages of {} bytes",
            base, pages, page_size
        );

        Ok(Self {
            base,
            page_size,
            data_size,
        })
    }

    /// Size of the wrap-around data region in bytes.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    fn meta(&self) -> *mut perf::perf_event_mmap_page {
        self.base.as_ptr() as *mut perf::perf_event_mmap_page
    }

    fn cursor(&self, field: *mut u64) -> &AtomicU64 {
        // SAFETY: the field lives in the metadata page for as long as the
        // mapping does, it is 8-byte aligned, and AtomicU64 has the same
        // in-memory representation as u64.
        unsafe { &*(field as *const AtomicU64) }
    }
}

impl RingCursor for RingBuffer {
    fn head(&self) -> u64 {
        // SAFETY: only computes the field address, no reference is formed.
        let field = unsafe { addr_of_mut!((*self.meta()).data_head) };
        self.cursor(field).load(Ordering::Acquire)
    }

    fn tail(&self) -> u64 {
        // SAFETY: as above.
        let field = unsafe { addr_of_mut!((*self.meta()).data_tail) };
        self.cursor(field).load(Ordering::Relaxed)
    }

    fn set_tail(&self, tail: u64) {
        // SAFETY: as above.
        let field = unsafe { addr_of_mut!((*self.meta()).data_tail) };
        self.cursor(field).store(tail, Ordering::Release)
    }

    fn record_at(&self, offset: u64) -> SampleRecord {
        let mut bytes = [0u8; SAMPLE_RECORD_SIZE as usize];
        // SAFETY: the data region starts one page into the mapping and is
        // `data_size` bytes long; every index is reduced modulo its size.
        let data = unsafe { self.base.as_ptr().add(self.page_size) };
        for (i, byte) in bytes.iter_mut().enumerate() {
            let at = (offset as usize).wrapping_add(i) & (self.data_size - 1);
            *byte = unsafe { data.add(at).read_volatile() };
        }
        SampleRecord::from_bytes(&bytes)
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        let len = self.data_size + self.page_size;
        let res = unsafe { libc::munmap(self.base.as_ptr() as *mut _, len) };
        if let Err(errno) = Errno::result(res) {
            warn!("Could not munmap ring buffer: {}", errno);
        }
    }
}
