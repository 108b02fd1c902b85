//! Anvil Core - shared primitives for the asset generation pipeline
//!
//! - `ClassifiedError` / `ErrorKind` - the error taxonomy every stage reports in
//! - `classify` - total mapping from arbitrary failures into the taxonomy
//! - `RetryPolicy` / `with_retry` - bounded exponential backoff
//! - `ErrorHistory` - bounded ring buffer of recent errors
//! - `Clock` - time source for polling and backoff waits
//! - `ContentHash` - SHA-256 artifact digests

pub mod classify;
pub mod clock;
mod error;
mod hash;
pub mod history;
pub mod retry;

pub use classify::{classify, classify_boxed, classify_message, classify_owned, classify_panic};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ClassifiedError, ErrorKind, Result, AUTH_ERROR, GENERATION_CANCELED, GENERATION_ERROR,
    GENERATION_TIMEOUT, NETWORK_ERROR, RATE_LIMITED, STORAGE_ERROR, UNKNOWN_ERROR,
    VALIDATION_ERROR,
};
pub use hash::ContentHash;
pub use history::{ErrorHistory, ErrorRecord};
pub use retry::{with_retry, RetryNotice, RetryPolicy};
