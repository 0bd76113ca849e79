//! Retry controller with exponential backoff and latest-wins supersession.
//!
//! A [`RetryController`] runs one logical cycle at a time. Starting a new cycle
//! while one is still running bumps the controller's generation: the old
//! cycle's pending backoff wakes immediately, and anything it later settles is
//! discarded without firing callbacks or touching state.

use crate::config::RetryDefaults;
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt; an always-failing operation runs
    /// `max_retries + 1` times.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per retry.
    pub backoff_factor: f64,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: RetryDefaults::MAX_RETRIES,
            initial_delay: RetryDefaults::INITIAL_DELAY,
            backoff_factor: RetryDefaults::BACKOFF_FACTOR,
            max_delay: RetryDefaults::MAX_DELAY,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retrying after the failure of `attempt` (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        // initial_delay * backoff_factor ^ attempt
        let multiplier = self.backoff_factor.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64()).max(0.0);

        let final_secs = if self.jitter {
            // Scale by 0.5..1.5 so the mean stays put without allowing near-zero delays.
            let jitter_factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * jitter_factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// Observable state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryState {
    /// Attempt index of the current (or last) cycle; equals its retry count.
    pub attempt: u32,
    /// A retry is scheduled or running.
    pub is_retrying: bool,
    /// A cycle is in progress.
    pub is_loading: bool,
    /// Incremented on every execution.
    pub generation: u64,
}

/// Passed to the error callback for every failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorContext {
    pub attempt: u32,
    pub will_retry: bool,
}

/// Statistics about a finished cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryStats {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Total backoff slept.
    pub total_delay: Duration,
    pub success: bool,
}

impl RetryStats {
    /// Retries made after the first attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Why a cycle produced no value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; this is the last attempt's error.
    #[error("{0}")]
    Exhausted(E),

    /// A newer execution started before this one settled.
    #[error("Retry cycle {generation} was superseded")]
    Superseded { generation: u64 },

    #[error("No previous operation to retry")]
    NothingToRetry,
}

impl<E> RetryError<E> {
    /// The operation's own error, if every attempt failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted(err) => Some(err),
            _ => None,
        }
    }
}

type Operation<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type SuccessCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ErrorCallback<E> = Arc<dyn Fn(&E, ErrorContext) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once the published generation moves past `generation`.
async fn superseded_by_newer(rx: &mut watch::Receiver<u64>, generation: u64) {
    loop {
        let current = *rx.borrow_and_update();
        if current != generation {
            return;
        }
        if rx.changed().await.is_err() {
            // Controller dropped; nothing can supersede this cycle any more.
            std::future::pending::<()>().await;
        }
    }
}

/// Runs fallible async operations through bounded retry cycles.
pub struct RetryController<T, E> {
    config: RetryConfig,
    state: Mutex<RetryState>,
    generation_tx: watch::Sender<u64>,
    last_operation: Mutex<Option<Operation<T, E>>>,
    on_success: Option<SuccessCallback<T>>,
    on_error: Option<ErrorCallback<E>>,
}

impl<T, E> RetryController<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new(config: RetryConfig) -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            config,
            state: Mutex::new(RetryState::default()),
            generation_tx,
            last_operation: Mutex::new(None),
            on_success: None,
            on_error: None,
        }
    }

    /// Called once per successful cycle.
    pub fn with_on_success(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Called for every failed attempt of a current cycle.
    pub fn with_on_error(
        mut self,
        callback: impl Fn(&E, ErrorContext) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn state(&self) -> RetryState {
        *lock(&self.state)
    }

    pub fn retry_count(&self) -> u32 {
        lock(&self.state).attempt
    }

    pub fn is_retrying(&self) -> bool {
        lock(&self.state).is_retrying
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.state).is_loading
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    /// Whether [`retry`](Self::retry) has an operation to re-run.
    pub fn has_operation(&self) -> bool {
        lock(&self.last_operation).is_some()
    }

    /// Run `operation` through a fresh retry cycle, superseding any running one.
    pub async fn execute<F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.execute_with_stats(operation).await.0
    }

    /// Like [`execute`](Self::execute), also reporting cycle statistics.
    pub async fn execute_with_stats<F, Fut>(
        &self,
        operation: F,
    ) -> (Result<T, RetryError<E>>, RetryStats)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let operation: Operation<T, E> = Arc::new(move || operation().boxed());
        self.run(operation).await
    }

    /// Re-run the most recently executed operation in a fresh cycle.
    pub async fn retry(&self) -> Result<T, RetryError<E>> {
        self.retry_with_stats().await.0
    }

    pub async fn retry_with_stats(&self) -> (Result<T, RetryError<E>>, RetryStats) {
        let operation = lock(&self.last_operation).clone();
        match operation {
            Some(operation) => self.run(operation).await,
            None => (Err(RetryError::NothingToRetry), RetryStats::default()),
        }
    }

    fn begin(&self, operation: Operation<T, E>) -> u64 {
        *lock(&self.last_operation) = Some(operation);

        let generation = {
            let mut state = lock(&self.state);
            if state.is_loading {
                debug!("Superseding retry cycle {}", state.generation);
            }
            let generation = state.generation + 1;
            *state = RetryState {
                attempt: 0,
                is_retrying: false,
                is_loading: true,
                generation,
            };
            generation
        };

        self.generation_tx.send_replace(generation);
        generation
    }

    /// Apply `update` only if `generation` is still current.
    fn update_if_current(&self, generation: u64, update: impl FnOnce(&mut RetryState)) -> bool {
        let mut state = lock(&self.state);
        if state.generation != generation {
            return false;
        }
        update(&mut state);
        true
    }

    async fn run(&self, operation: Operation<T, E>) -> (Result<T, RetryError<E>>, RetryStats) {
        let generation = self.begin(operation.clone());
        let mut generation_rx = self.generation_tx.subscribe();
        let mut stats = RetryStats::default();
        let superseded = |stats: RetryStats| {
            debug!("Discarding result of superseded retry cycle {}", generation);
            (Err(RetryError::Superseded { generation }), stats)
        };

        let mut attempt = 0;
        loop {
            stats.attempts = attempt + 1;
            let result = operation().await;

            match result {
                Ok(value) => {
                    let current = self.update_if_current(generation, |state| {
                        state.is_loading = false;
                        state.is_retrying = false;
                    });
                    if !current {
                        return superseded(stats);
                    }
                    stats.success = true;
                    if attempt > 0 {
                        debug!("Operation succeeded after {} attempts", attempt + 1);
                    }
                    if let Some(callback) = &self.on_success {
                        callback(&value);
                    }
                    return (Ok(value), stats);
                }
                Err(err) => {
                    let will_retry = attempt < self.config.max_retries;
                    let current = self.update_if_current(generation, |state| {
                        state.is_retrying = will_retry;
                        state.is_loading = will_retry;
                    });
                    if !current {
                        return superseded(stats);
                    }
                    if let Some(callback) = &self.on_error {
                        callback(&err, ErrorContext { attempt, will_retry });
                    }
                    if !will_retry {
                        warn!(
                            "All {} attempts exhausted for retry cycle {}",
                            attempt + 1,
                            generation
                        );
                        return (Err(RetryError::Exhausted(err)), stats);
                    }
                }
            }

            let delay = self.config.calculate_delay(attempt);
            warn!(
                "Attempt {}/{} failed. Retrying in {:?}",
                attempt + 1,
                self.config.max_retries + 1,
                delay
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = superseded_by_newer(&mut generation_rx, generation) => {
                    return superseded(stats);
                }
            }
            stats.total_delay += delay;

            attempt += 1;
            if !self.update_if_current(generation, |state| state.attempt = attempt) {
                return superseded(stats);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::{sleep, Instant};

    fn fast_config() -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(3)
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_factor(2.0)
    }

    #[test]
    fn test_delay_calculation_no_jitter() {
        let config = RetryConfig::new().with_initial_delay(Duration::from_secs(1));

        assert_eq!(config.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(30));

        // 10 * 2^3 = 80s, capped at 30s
        assert_eq!(config.calculate_delay(3), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_with_jitter() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(2))
            .with_jitter(true);

        for _ in 0..20 {
            let delay = config.calculate_delay(0);
            assert!(
                delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3),
                "Delay {:?} should be between 1s and 3s",
                delay
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_runs_max_retries_plus_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let contexts = Arc::new(Mutex::new(Vec::new()));
        let recorded = contexts.clone();

        let controller = RetryController::<(), String>::new(fast_config())
            .with_on_error(move |_, ctx| recorded.lock().unwrap().push(ctx));

        let counter = calls.clone();
        let start = Instant::now();
        let (result, stats) = controller
            .execute_with_stats(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("always fails".to_string())
                }
            })
            .await;

        assert_eq!(result, Err(RetryError::Exhausted("always fails".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(stats.attempts, 4);
        assert_eq!(stats.retries(), 3);
        // 1s + 2s + 4s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert_eq!(stats.total_delay, Duration::from_secs(7));

        let will_retry: Vec<bool> = contexts.lock().unwrap().iter().map(|c| c.will_retry).collect();
        assert_eq!(will_retry, vec![true, true, true, false]);

        let state = controller.state();
        assert!(!state.is_loading);
        assert!(!state.is_retrying);
        assert_eq!(state.attempt, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let successes = Arc::new(AtomicU32::new(0));
        let seen = successes.clone();
        let controller = RetryController::<u32, String>::new(fast_config())
            .with_on_success(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });

        let counter = Arc::new(AtomicU32::new(0));
        let (result, stats) = controller
            .execute_with_stats(move || {
                let counter = counter.clone();
                async move {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err("temporary failure".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(stats.attempts, 3);
        assert!(stats.success);
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(controller.retry_count(), 2);
        assert!(!controller.is_loading());
        assert!(!controller.is_retrying());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_while_backing_off() {
        let controller = Arc::new(RetryController::<(), String>::new(fast_config()));
        let running = controller.clone();
        let task = tokio::spawn(async move {
            running
                .execute(|| async { Err::<(), _>("nope".to_string()) })
                .await
        });

        sleep(Duration::from_millis(500)).await;
        let state = controller.state();
        assert!(state.is_loading);
        assert!(state.is_retrying);
        assert_eq!(state.attempt, 0);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(controller.retry_count(), 1);

        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_completion_does_not_overwrite_newer_cycle() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let recorded = results.clone();
        let controller = RetryController::<String, String>::new(fast_config())
            .with_on_success(move |value| recorded.lock().unwrap().push(value.clone()));

        let (first, second) = tokio::join!(
            controller.execute(|| async {
                sleep(Duration::from_secs(5)).await;
                Ok("first".to_string())
            }),
            async {
                sleep(Duration::from_secs(1)).await;
                controller
                    .execute(|| async { Ok("second".to_string()) })
                    .await
            }
        );

        assert_eq!(first, Err(RetryError::Superseded { generation: 1 }));
        assert_eq!(second, Ok("second".to_string()));
        assert_eq!(*results.lock().unwrap(), vec!["second".to_string()]);

        let state = controller.state();
        assert_eq!(state.generation, 2);
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supersession_cancels_pending_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let errors = Arc::new(AtomicU32::new(0));
        let error_count = errors.clone();
        let controller = RetryController::<(), String>::new(
            fast_config().with_initial_delay(Duration::from_secs(60)),
        )
        .with_on_error(move |_, _| {
            error_count.fetch_add(1, Ordering::SeqCst);
        });

        let counter = calls.clone();
        let start = Instant::now();
        let (first, _) = tokio::join!(
            async {
                let result = controller
                    .execute(move || {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Err("down".to_string())
                        }
                    })
                    .await;
                (result, start.elapsed())
            },
            async {
                sleep(Duration::from_secs(1)).await;
                controller.execute(|| async { Ok(()) }).await
            }
        );

        let (result, elapsed) = first;
        assert_eq!(result, Err(RetryError::Superseded { generation: 1 }));
        assert_eq!(elapsed, Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reuses_last_operation() {
        let controller = RetryController::<u32, String>::new(fast_config().with_max_retries(0));
        assert!(!controller.has_operation());
        assert_eq!(controller.retry().await, Err(RetryError::NothingToRetry));
        assert!(!controller.is_loading());

        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();
        let first = controller
            .execute(move || {
                let counter = counter.clone();
                async move {
                    match counter.fetch_add(1, Ordering::SeqCst) {
                        0 => Err("cold start".to_string()),
                        n => Ok(n),
                    }
                }
            })
            .await;
        assert_eq!(first, Err(RetryError::Exhausted("cold start".to_string())));

        assert!(controller.has_operation());
        assert_eq!(controller.retry().await, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(controller.generation(), 2);
    }
}
