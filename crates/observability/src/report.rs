//! Error reporting.
//!
//! Failures that an operator should look at go through `report`, which emits a
//! single `error` event tagged with the module and function that hit it, plus
//! the full `source()` chain.

use std::error::Error;

/// Render `err` and its sources as `outer: inner: root`.
pub fn error_chain(err: &dyn Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Report an error raised in `module::func`.
pub fn report(err: &dyn Error, module: &str, func: &str) {
    ::tracing::error!(module, func, error = %error_chain(err), "error reported");
}
