//! The system log sink used by the layers above storage.
//!
//! Records go through the [`log`] facade, so the binary embedding the engine decides where they
//! end up. Nothing is printed when no logger is installed.

/// Record `message` as an info event of `module`, which becomes the record's target.
pub fn log_event(module: &str, message: &str) {
    log::info!(target: module, "{message}");
}
