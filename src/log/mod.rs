// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::Targets, fmt as tracing_fmt, prelude::*};

/// Inits node logging to stdout, or to a rolling file below `log_dir`
/// when one is given. The returned guard must be held for the life of
/// the program; logging should be instantiated only once.
///
/// Only this crate's events pass the filter, so overlay noise from
/// dependencies stays out of the node log.
pub fn init_node_logging(log_dir: &Option<PathBuf>) -> Result<Option<WorkerGuard>, std::io::Error> {
    let target_filters = Targets::new().with_target(env!("CARGO_PKG_NAME"), tracing::Level::TRACE);
    let fmt_layer = tracing_fmt::layer().with_ansi(false);

    let guard = if let Some(log_dir) = log_dir {
        println!("Starting logging to directory: {log_dir:?}");
        std::fs::create_dir_all(log_dir)?;
        let appender = tracing_appender::rolling::daily(log_dir, "meshnode.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt_layer
            .with_writer(non_blocking)
            .with_filter(target_filters);
        tracing_subscriber::registry().with(layer).init();
        Some(guard)
    } else {
        println!("Starting logging to stdout");
        let layer = fmt_layer.with_target(false).with_filter(target_filters);
        tracing_subscriber::registry().with(layer).init();
        None
    };

    Ok(guard)
}
