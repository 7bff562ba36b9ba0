/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use clap::Parser;
use perfspurious::Args;

fn main() {
    let args = Args::parse();
    args.common.init_tracing();

    let res = args.config().and_then(|config| perfspurious::run(&config));
    if let Err(err) = res {
        eprintln!("perfspurious: {}", err);
        std::process::exit(1);
    }
}
