use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between the caller and an in-flight
/// request.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Source of back-off delays. Sleeping returns early once `cancel` fires.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration, cancel: &CancelHandle);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    poll: Duration,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(50),
        }
    }
}

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration, cancel: &CancelHandle) {
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(self.poll.min(deadline - now));
        }
    }
}

type SleepHook = Box<dyn Fn(usize) + Send + Sync>;

/// Test clock: records every requested delay and returns immediately. The
/// optional hook runs with the zero-based index of each sleep.
#[derive(Default)]
pub struct VirtualClock {
    sleeps: Mutex<Vec<Duration>>,
    hook: Mutex<Option<SleepHook>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hook(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().into_iter().sum()
    }
}

impl Clock for VirtualClock {
    fn sleep(&self, duration: Duration, _cancel: &CancelHandle) {
        let index = {
            let mut sleeps = self.sleeps.lock().unwrap_or_else(PoisonError::into_inner);
            sleeps.push(duration);
            sleeps.len() - 1
        };
        if let Some(hook) = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            hook(index);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `step * n` before retry `n`.
    Linear(Duration),
}

impl Backoff {
    pub fn delay(&self, retry: usize) -> Duration {
        match self {
            Backoff::Fixed(step) => *step,
            Backoff::Linear(step) => step.saturating_mul(retry.max(1) as u32),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Cancellation was observed before an attempt started.
    Cancelled { attempts: usize },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: usize, last: E },
    /// An attempt failed with an error the policy does not retry.
    Fatal { attempts: usize, error: E },
}

/// Bounded retry loop: total attempts, delay between them, and which errors
/// are worth another try.
#[derive(Debug)]
pub struct RetryPolicy<E> {
    pub max_attempts: usize,
    pub backoff: Backoff,
    retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryPolicy<E> {}

impl<E> RetryPolicy<E> {
    pub fn new(max_attempts: usize, backoff: Backoff, retryable: fn(&E) -> bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retryable,
        }
    }

    pub fn is_retryable(&self, err: &E) -> bool {
        (self.retryable)(err)
    }

    /// Runs `attempt` (called with the one-based attempt number) until it
    /// succeeds or the budget is spent. `on_retry` sees each retryable
    /// failure together with the delay about to be slept.
    pub fn run<T>(
        &self,
        clock: &dyn Clock,
        cancel: &CancelHandle,
        mut attempt: impl FnMut(usize) -> Result<T, E>,
        mut on_retry: impl FnMut(usize, &E, Duration),
    ) -> Result<T, RetryError<E>> {
        let mut number = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: number });
            }
            number += 1;
            let err = match attempt(number) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !self.is_retryable(&err) {
                return Err(RetryError::Fatal {
                    attempts: number,
                    error: err,
                });
            }
            if number >= self.max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: number,
                    last: err,
                });
            }
            let delay = self.backoff.delay(number);
            on_retry(number, &err, delay);
            clock.sleep(delay, cancel);
        }
    }
}
