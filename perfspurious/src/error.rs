/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use thiserror::Error;

/// Everything that ends a harness run early. All of these are fatal.
#[derive(Error, Debug)]
pub enum Error {
    /// A platform primitive refused to cooperate.
    #[error("{0} ({kind})", kind = .0.kind())]
    Primitive(#[from] perfspurious_process::Error),

    /// Writing the diagnostic output failed.
    #[error("writing output failed: {0}")]
    Output(#[from] std::io::Error),

    /// Encoding a JSON report failed.
    #[error("encoding report failed: {0}")]
    Report(#[from] serde_json::Error),
}
