//! Shared error plumbing.
//!
//! Every service error implements [`ErrorCode`] so route handlers can report
//! a stable machine-readable code alongside the human message.

pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
