/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Common support for the command-line interface and logging setup of the
//! harness.

use std::io;
use std::path::Path;
use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

// Arguments every harness binary accepts. Using Clap, this is designed to be
// flattened into the binary's own arguments.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Parser)]
pub struct CommonToolArguments {
    /// Direct logging to a file.  This can also be set with the RUST_LOG_FILE environment
    /// variable, but the CLI flag takes precedence.
    #[clap(long = "log-file", value_name = "PATH", env = "RUST_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Picks a file name next to `log_file` that does not exist yet, appending a
/// timestamp when `log_file` is taken. Returns `None` if no free name was
/// found or `log_file` has no file name.
pub fn log_file_candidate(log_file: &Path) -> Option<(PathBuf, PathBuf)> {
    let parent = log_file.parent()?;
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let orig_filename = log_file.file_name()?.to_os_string();
    let mut filename = orig_filename.clone();

    for _ in 0..100 {
        if parent.join(&filename).exists() {
            filename = orig_filename.clone();
            filename.push(format!("{}", Local::now().format(".%Y%m%d.%H%M%S.%f")));
        } else {
            return Some((parent.to_path_buf(), PathBuf::from(filename)));
        }
    }
    None
}

impl CommonToolArguments {
    /// Installs the global `tracing` subscriber, filtered by `RUST_LOG`.
    ///
    /// Log lines are written synchronously: the harness forks after this is
    /// called, and a background writer thread would not exist in the child.
    pub fn init_tracing(&self) {
        fn set_subscriber_with_writer<
            T: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
        >(
            writer: T,
        ) {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_writer(writer)
                .finish();
            if tracing::subscriber::set_global_default(subscriber).is_err() {
                eprintln!(" [perfspurious] WARNING: a tracing subscriber is already installed");
            }
        }

        match self.log_file.as_deref() {
            Some(log_file) => match log_file_candidate(log_file) {
                Some((parent, filename)) => {
                    eprintln!(" [perfspurious] Logging to file at {:?}", parent.join(&filename));
                    set_subscriber_with_writer(tracing_appender::rolling::never(parent, filename));
                }
                None => {
                    eprintln!(
                        " [perfspurious] WARNING: could not open log file, falling back to stderr"
                    );
                    set_subscriber_with_writer(io::stderr);
                }
            },
            None => set_subscriber_with_writer(io::stderr),
        }
    }
}
