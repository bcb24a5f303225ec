//! Status surface and cooperative abort
//!
//! A [`StatusHandle`] is shared between a running session and whoever observes it. It
//! always reflects the most recent phase, error and success strings and the progress
//! ratio. An [`AbortToken`] is polled by the scheduler once per frame boundary.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Coarse phase of a session run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Ingesting,
    Compiling,
    Preparing,
    Scanning,
    Computing,
    Defaulting,
    Advancing,
    InputHooks,
    Deriving,
    Done,
    Aborted,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Ingesting => "ingesting",
            Phase::Compiling => "compiling",
            Phase::Preparing => "preparing",
            Phase::Scanning => "scanning",
            Phase::Computing => "computing",
            Phase::Defaulting => "defaulting",
            Phase::Advancing => "advancing",
            Phase::InputHooks => "input hooks",
            Phase::Deriving => "deriving",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the status surface
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub phase: Phase,
    pub last_error: Option<String>,
    pub last_success: Option<String>,
    /// Ratio in `[0, 1]`, or `-1.0` after a fatal error
    pub progress: f32,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            last_error: None,
            last_success: None,
            progress: 0.0,
        }
    }
}

/// Cloneable handle onto a session's status
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<Status>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current status
    pub fn snapshot(&self) -> Status {
        match self.inner.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_phase(&self, phase: Phase) {
        self.update(|status| status.phase = phase);
    }

    pub fn set_progress(&self, progress: f32) {
        self.update(|status| status.progress = progress.clamp(0.0, 1.0));
    }

    /// Records a recoverable error without changing phase or progress
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|status| status.last_error = Some(message));
    }

    /// Records a success message for the given phase
    pub fn succeed(&self, phase: Phase, message: impl Into<String>) {
        let message = message.into();
        self.update(|status| {
            status.phase = phase;
            status.last_success = Some(message);
        });
    }

    /// Records a fatal error: the phase becomes `Failed` and progress `-1`
    pub fn fail(&self, during: Phase, message: impl Into<String>) {
        let message = format!("{}: {}", during, message.into());
        self.update(|status| {
            status.phase = Phase::Failed;
            status.last_error = Some(message);
            status.progress = -1.0;
        });
    }

    fn update(&self, apply: impl FnOnce(&mut Status)) {
        match self.inner.lock() {
            Ok(mut status) => apply(&mut *status),
            Err(poisoned) => apply(&mut *poisoned.into_inner()),
        }
    }
}

/// Cooperative cancellation flag checked once per processed frame
#[derive(Debug, Clone, Default)]
pub struct AbortToken {
    flag: Arc<AtomicBool>,
}

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the running session to stop after the in-flight frame
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Bounded per-rule warning log
///
/// The first `max` warnings are logged with a counter, then one suppression notice.
/// When attached to a [`StatusHandle`], every warning (suppressed or not) also becomes
/// its last error.
#[derive(Debug, Clone)]
pub struct WarningCounter {
    subject: String,
    count: usize,
    max: usize,
    status: Option<StatusHandle>,
}

impl WarningCounter {
    pub fn new(subject: impl Into<String>, max: usize) -> Self {
        Self {
            subject: subject.into(),
            count: 0,
            max,
            status: None,
        }
    }

    /// Mirrors warnings into `status` as recoverable errors
    pub fn with_status(mut self, status: &StatusHandle) -> Self {
        self.status = Some(status.clone());
        self
    }

    pub fn warn(&mut self, message: impl fmt::Display) {
        self.count += 1;
        if let Some(status) = &self.status {
            status.record_error(format!("{}: {}", self.subject, message));
        }
        if self.count <= self.max {
            log::warn!("{}: {} (warning {}/{})", self.subject, message, self.count, self.max);
        } else if self.count == self.max + 1 {
            log::warn!("... suppressing further warnings for {}", self.subject);
        }
    }

    /// Warnings raised so far, including suppressed ones
    pub fn count(&self) -> usize {
        self.count
    }
}
