use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

/// Length of the fixed rate-limit window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window request budget for one running endpoint.
///
/// There is exactly one window per endpoint instance, not one per caller:
/// the only caller identity is possession of the bearer token.
#[derive(Debug)]
pub struct RequestThrottle {
    max_requests: u64,
    window: Duration,
    state: Mutex<Option<WindowState>>,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl RequestThrottle {
    #[must_use]
    pub fn per_minute(max_requests: u64) -> Self {
        Self::with_window(max_requests, WINDOW)
    }

    fn with_window(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(None),
        }
    }

    pub fn check(&self) -> ThrottleDecision {
        self.check_at(Instant::now())
    }

    pub fn check_at(&self, now: Instant) -> ThrottleDecision {
        if self.max_requests == 0 {
            return ThrottleDecision::Denied {
                retry_after: self.window,
            };
        }

        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(state) => {
                let elapsed = now.saturating_duration_since(state.started_at);
                if elapsed >= self.window {
                    state.started_at = now;
                    state.count = 1;
                    ThrottleDecision::Allowed
                } else if state.count < self.max_requests {
                    state.count += 1;
                    ThrottleDecision::Allowed
                } else {
                    ThrottleDecision::Denied {
                        retry_after: self.window.saturating_sub(elapsed),
                    }
                }
            },
            None => {
                *guard = Some(WindowState {
                    started_at: now,
                    count: 1,
                });
                ThrottleDecision::Allowed
            },
        }
    }

    /// Forget the current window.
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
