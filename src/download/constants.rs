//! Constants for the download module (timeouts, chunking).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP per-read idle timeout (5 minutes). There is no whole-request
/// deadline since cache archives can be very large.
pub const READ_TIMEOUT_SECS: u64 = 300;
