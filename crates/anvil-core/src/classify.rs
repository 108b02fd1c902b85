//! Failure classification
//!
//! `classify` is total: any error value maps to exactly one [`ErrorKind`].
//! Known error types are matched structurally first; message sniffing is
//! only the fallback for errors nothing else recognizes.

use crate::error::ClassifiedError;
use std::any::Any;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

const NETWORK_HINTS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "econnrefused",
    "econnreset",
    "fetch failed",
    "dns",
];
const VALIDATION_HINTS: &[&str] = &["invalid", "required", "validation", "must be", "missing field"];
const GENERATION_HINTS: &[&str] = &["generat", "provider", "meshy", "openai", "rigging", "task failed"];
const STORAGE_HINTS: &[&str] = &["storage", "file", "database", "disk", "bucket"];
const AUTH_HINTS: &[&str] = &["unauthorized", "forbidden", "api key", "permission denied", "401", "403"];

/// Classify a borrowed error.
///
/// The source chain is searched for a typed match before falling back to
/// heuristics on the outermost message.
pub fn classify(err: &(dyn StdError + 'static)) -> ClassifiedError {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(classified) = classify_typed(e) {
            return classified;
        }
        current = e.source();
    }
    classify_message(&err.to_string())
}

/// Classify an owned error and keep it as the originating cause
pub fn classify_owned<E>(err: E) -> ClassifiedError
where
    E: StdError + Send + Sync + 'static,
{
    let classified = classify(&err);
    if (&err as &dyn Any).is::<ClassifiedError>() {
        return classified;
    }
    classified.with_source(err)
}

/// Classify a boxed error
pub fn classify_boxed(err: Box<dyn StdError + Send + Sync>) -> ClassifiedError {
    if let Some(classified) = err.downcast_ref::<ClassifiedError>() {
        return classified.clone();
    }
    let classified = classify(err.as_ref());
    classified.with_shared_source(Arc::from(err))
}

/// Classify a panic payload or any other non-error value
pub fn classify_panic(payload: Box<dyn Any + Send>) -> ClassifiedError {
    if let Some(classified) = payload.downcast_ref::<ClassifiedError>() {
        return classified.clone();
    }
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return classify_message(msg);
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return classify_message(msg);
    }
    ClassifiedError::unknown("operation failed with a non-error value")
}

/// Heuristic classification from a free-form message
pub fn classify_message(message: &str) -> ClassifiedError {
    let lower = message.to_lowercase();
    let matches = |hints: &[&str]| hints.iter().any(|h| lower.contains(h));

    if matches(NETWORK_HINTS) {
        ClassifiedError::network(message, None, None)
    } else if matches(VALIDATION_HINTS) {
        ClassifiedError::validation(None, message)
    } else if matches(GENERATION_HINTS) {
        ClassifiedError::generation(None, message)
    } else if matches(STORAGE_HINTS) {
        ClassifiedError::storage(None, message)
    } else if matches(AUTH_HINTS) {
        ClassifiedError::auth(message)
    } else {
        ClassifiedError::unknown(message)
    }
}

fn classify_typed(err: &(dyn StdError + 'static)) -> Option<ClassifiedError> {
    if let Some(classified) = err.downcast_ref::<ClassifiedError>() {
        return Some(classified.clone());
    }
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        return Some(classify_io(io_err));
    }
    if err.downcast_ref::<serde_json::Error>().is_some()
        || err.downcast_ref::<toml::de::Error>().is_some()
    {
        return Some(ClassifiedError::validation(None, err.to_string()));
    }
    if err.downcast_ref::<toml::ser::Error>().is_some() {
        return Some(ClassifiedError::storage(Some("serialize"), err.to_string()));
    }
    None
}

fn classify_io(err: &io::Error) -> ClassifiedError {
    use io::ErrorKind as K;
    match err.kind() {
        K::TimedOut
        | K::ConnectionRefused
        | K::ConnectionReset
        | K::ConnectionAborted
        | K::NotConnected
        | K::BrokenPipe
        | K::AddrNotAvailable => ClassifiedError::network(err.to_string(), None, None),
        K::InvalidInput | K::InvalidData => ClassifiedError::validation(None, err.to_string()),
        _ => ClassifiedError::storage(None, err.to_string()),
    }
}
