// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Minimal debug logging support.
//!
//! A full `log`/`tracing` subscriber stack would be overkill for a library
//! whose only logging need is "explain why a compilation unit was skipped".
//! Messages go to stderr and are off unless the embedder opts in, either via
//! [`ENABLED`] directly or by exporting `DWARFLIB_DEBUG` in the environment.

use std::sync::atomic::{AtomicBool, Ordering};

// Re-export to make the macro show up in this module in rustdoc.
pub use crate::debug;

/// Determines whether [`debug`] messages are actually printed or not.
pub static ENABLED: AtomicBool = AtomicBool::new(false);

/// Turns debug printing on when `DWARFLIB_DEBUG` is set in the environment.
pub fn init_from_env() {
    if std::env::var_os("DWARFLIB_DEBUG").is_some() {
        ENABLED.store(true, Ordering::Relaxed);
    }
}

/// Print to stderr if debug printing is enabled.
///
/// See [`eprintln`] documentation for usage.
#[macro_export]
macro_rules! debug {
    ( $($args:tt)* ) => {
        if $crate::dbglog::ENABLED.load(::std::sync::atomic::Ordering::Relaxed) {
            ::std::eprintln!( $($args)* );
        }
    }
}
