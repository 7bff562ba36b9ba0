/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Tracepoint ids are assigned at boot, so they are looked up in tracefs
//! rather than hard-coded.

use std::path::Path;

use perfspurious_process::AddContext;
use perfspurious_process::Context;
use perfspurious_process::Errno;
use perfspurious_process::Error;
use tracing::debug;

/// Where tracefs is usually mounted, in order of preference.
pub const TRACEFS_ROOTS: &[&str] = &["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

/// Returns the id of tracepoint `category:name`, e.g.
/// `syscalls:sys_enter_getpid`.
pub fn tracepoint_id(category: &str, name: &str) -> Result<u64, Error> {
    tracepoint_id_in(TRACEFS_ROOTS.iter().map(Path::new), category, name)
}

/// Like [`tracepoint_id`], searching the given tracefs mount points. The error
/// from the last root is returned if none has the tracepoint.
pub fn tracepoint_id_in<I, P>(roots: I, category: &str, name: &str) -> Result<u64, Error>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut last = Error::new(Errno::ENOENT, Context::Tracepoint);
    for root in roots {
        let path = root.as_ref().join("events").join(category).join(name).join("id");
        match std::fs::read_to_string(&path).context(Context::Tracepoint) {
            Ok(contents) => {
                let id = contents
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::new(Errno::EINVAL, Context::Tracepoint))?;
                debug!("tracepoint {}:{} has id {} ({})", category, name, id, path.display());
                return Ok(id);
            }
            Err(err) => {
                debug!("no tracepoint id at {}: {}", path.display(), err);
                last = err;
            }
        }
    }
    Err(last)
}
