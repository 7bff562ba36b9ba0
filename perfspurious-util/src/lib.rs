/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Utilities shared by the harness binaries.

#![deny(missing_docs)]

mod commandline;

pub use commandline::log_file_candidate;
pub use commandline::CommonToolArguments;
