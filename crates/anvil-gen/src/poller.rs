//! Bounded polling of remote jobs
//!
//! The poller owns a [`JobHandle`] for the duration of one loop and returns
//! it with the successful result. Each wait goes through the injected
//! [`Clock`], so a flow only ever blocks itself.

use crate::job::{JobHandle, JobStatus, TerminalJob};
use crate::provider::JobStatusSource;
use anvil_core::{ClassifiedError, Clock, Result, GENERATION_CANCELED, GENERATION_TIMEOUT};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MESH_TIMEOUT: Duration = Duration::from_millis(300_000);
pub const DEFAULT_SLOW_TIMEOUT: Duration = Duration::from_millis(600_000);

/// Interval and deadline for one polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_MESH_TIMEOUT,
        }
    }
}

impl PollOptions {
    /// Options for slower stages such as retexturing
    pub fn slow() -> Self {
        Self {
            timeout: DEFAULT_SLOW_TIMEOUT,
            ..Self::default()
        }
    }
}

/// Repeatedly queries a status source until a terminal status or timeout
pub struct TaskPoller<'a> {
    source: &'a dyn JobStatusSource,
    clock: &'a dyn Clock,
    options: PollOptions,
}

impl<'a> TaskPoller<'a> {
    pub fn new(source: &'a dyn JobStatusSource, clock: &'a dyn Clock, options: PollOptions) -> Self {
        Self {
            source,
            clock,
            options,
        }
    }

    /// Poll `handle` until it succeeds.
    ///
    /// `on_progress(progress, queue_depth)` fires for every non-terminal
    /// status carrying progress. Failure, cancellation and timeout become
    /// `generation` errors naming `stage`; status-query errors are returned
    /// as classified by the source.
    pub fn poll_until_terminal(
        &self,
        handle: JobHandle,
        stage: &str,
        on_progress: &mut dyn FnMut(u8, Option<u32>),
    ) -> Result<TerminalJob> {
        let started = self.clock.now();
        loop {
            let remote = self
                .source
                .get_status(&handle)
                .map_err(|e| e.in_stage(stage))?;
            let elapsed = self.clock.now().saturating_sub(started);

            match JobStatus::from(remote) {
                JobStatus::Succeeded { outputs } => {
                    debug!(stage, job = handle.id(), ?elapsed, "job succeeded");
                    return Ok(TerminalJob {
                        handle,
                        outputs,
                        elapsed,
                    });
                }
                JobStatus::Failed { message } => {
                    return Err(ClassifiedError::generation(
                        Some(stage),
                        format!("{} job {} failed: {}", stage, handle.id(), message),
                    ));
                }
                JobStatus::Canceled => {
                    return Err(ClassifiedError::generation(
                        Some(stage),
                        format!("{} job {} was canceled", stage, handle.id()),
                    )
                    .with_code(GENERATION_CANCELED)
                    .with_retryable(false));
                }
                JobStatus::Running {
                    progress,
                    queue_depth,
                } => {
                    debug!(stage, job = handle.id(), progress, "polling");
                    on_progress(progress, queue_depth);
                }
                JobStatus::Queued => {
                    debug!(stage, job = handle.id(), "queued");
                }
            }

            if elapsed >= self.options.timeout {
                return Err(ClassifiedError::generation(
                    Some(stage),
                    format!(
                        "{} job {} timed out after {}ms",
                        stage,
                        handle.id(),
                        elapsed.as_millis()
                    ),
                )
                .with_code(GENERATION_TIMEOUT));
            }

            // Never sleep past the deadline; the last poll lands on it.
            let remaining = self.options.timeout - elapsed;
            self.clock.sleep(self.options.interval.min(remaining));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, RemoteStatus, GLB_URL};
    use anvil_core::ManualClock;
    use std::sync::Mutex;

    /// Replays a fixed script of statuses, repeating the last one forever
    struct Scripted {
        script: Vec<RemoteStatus>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(script: Vec<RemoteStatus>) -> Self {
            Self {
                script,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl JobStatusSource for Scripted {
        fn get_status(&self, _handle: &JobHandle) -> Result<RemoteStatus> {
            let mut calls = self.calls.lock().unwrap();
            let idx = (*calls).min(self.script.len() - 1);
            *calls += 1;
            Ok(self.script[idx].clone())
        }
    }

    fn status(s: &str, progress: Option<u8>) -> RemoteStatus {
        RemoteStatus {
            status: s.to_string(),
            progress,
            ..Default::default()
        }
    }

    fn succeeded() -> RemoteStatus {
        let mut s = status("SUCCEEDED", Some(100));
        s.result_urls
            .insert(GLB_URL.to_string(), "https://cdn/m.glb".to_string());
        s
    }

    fn options() -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(5_000),
            timeout: Duration::from_millis(30_000),
        }
    }

    #[test]
    fn test_polls_until_success_and_reports_progress() {
        let source = Scripted::new(vec![
            status("PENDING", None),
            status("IN_PROGRESS", Some(30)),
            status("IN_PROGRESS", Some(70)),
            succeeded(),
        ]);
        let clock = ManualClock::new();
        let poller = TaskPoller::new(&source, &clock, options());

        let mut seen = Vec::new();
        let job = poller
            .poll_until_terminal(
                JobHandle::new("job-1", JobKind::Preview),
                "mesh-preview",
                &mut |p, _| seen.push(p),
            )
            .unwrap();

        assert_eq!(seen, vec![30, 70]);
        assert_eq!(job.handle.id(), "job-1");
        assert_eq!(job.output(GLB_URL), Some("https://cdn/m.glb"));
        assert_eq!(source.calls(), 4);
        assert_eq!(clock.now(), Duration::from_millis(15_000));
    }

    #[test]
    fn test_timeout_bounds() {
        let source = Scripted::new(vec![status("IN_PROGRESS", Some(10))]);
        let clock = ManualClock::new();
        let opts = options();
        let poller = TaskPoller::new(&source, &clock, opts);

        let err = poller
            .poll_until_terminal(
                JobHandle::new("job-2", JobKind::Refine),
                "mesh-refine",
                &mut |_, _| {},
            )
            .unwrap_err();

        assert_eq!(err.code(), GENERATION_TIMEOUT);
        assert_eq!(err.stage(), Some("mesh-refine"));
        assert!(clock.now() >= opts.timeout);
        assert!(clock.now() <= opts.timeout + opts.interval);
    }

    #[test]
    fn test_timeout_not_multiple_of_interval() {
        let source = Scripted::new(vec![status("QUEUED", None)]);
        let clock = ManualClock::new();
        let opts = PollOptions {
            interval: Duration::from_millis(4_000),
            timeout: Duration::from_millis(10_000),
        };
        let poller = TaskPoller::new(&source, &clock, opts);

        let err = poller
            .poll_until_terminal(JobHandle::new("j", JobKind::Rig), "rig", &mut |_, _| {})
            .unwrap_err();
        assert_eq!(err.code(), GENERATION_TIMEOUT);
        assert_eq!(clock.now(), Duration::from_millis(10_000));
    }

    #[test]
    fn test_failed_status_carries_provider_message() {
        let mut failed = status("FAILED", Some(50));
        failed.error_message = Some("content policy".to_string());
        let source = Scripted::new(vec![failed]);
        let clock = ManualClock::new();
        let poller = TaskPoller::new(&source, &clock, options());

        let err = poller
            .poll_until_terminal(JobHandle::new("j", JobKind::Refine), "mesh-refine", &mut |_, _| {})
            .unwrap_err();
        assert_eq!(err.kind().label(), "generation");
        assert!(err.message().contains("content policy"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_canceled_is_not_retryable() {
        let source = Scripted::new(vec![status("CANCELED", None)]);
        let clock = ManualClock::new();
        let poller = TaskPoller::new(&source, &clock, options());

        let err = poller
            .poll_until_terminal(JobHandle::new("j", JobKind::Preview), "mesh-preview", &mut |_, _| {})
            .unwrap_err();
        assert_eq!(err.code(), GENERATION_CANCELED);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_status_errors_propagate_with_stage() {
        struct Broken;
        impl JobStatusSource for Broken {
            fn get_status(&self, _handle: &JobHandle) -> Result<RemoteStatus> {
                Err(ClassifiedError::generation(None, "bad payload"))
            }
        }
        let clock = ManualClock::new();
        let poller = TaskPoller::new(&Broken, &clock, options());
        let err = poller
            .poll_until_terminal(JobHandle::new("j", JobKind::Preview), "mesh-preview", &mut |_, _| {})
            .unwrap_err();
        assert_eq!(err.stage(), Some("mesh-preview"));
    }
}
