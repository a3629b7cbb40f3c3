//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;
use userdata_core::ResetMode;

/// Scope used when none is configured.
pub const DEFAULT_SCOPE: &str = "userdata";

/// What happens to local data when the user logs out or switches account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogoutPolicy {
    /// Keep local entities and upload them to the next account.
    #[default]
    KeepLocalData,
    /// Erase everything stored for the previous account.
    EraseLocalData,
}

impl LogoutPolicy {
    /// The store reset implementing this policy.
    pub fn reset_mode(self) -> ResetMode {
        match self {
            LogoutPolicy::KeepLocalData => ResetMode::Dissociate,
            LogoutPolicy::EraseLocalData => ResetMode::Erase,
        }
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device identifier sent with every request.
    pub device_id: String,
    /// Cursor scope inside the local store.
    pub scope: String,
    /// Maximum number of entities per pulled page.
    pub pull_batch_size: u32,
    /// Maximum number of changes per push request.
    pub push_batch_size: usize,
    /// Retry configuration for remote calls and failed cycles.
    pub retry: RetryConfig,
    /// Interval of the periodic trigger, if any.
    pub sync_interval: Option<Duration>,
    /// Quiet period after a local mutation before its push cycle starts.
    pub debounce: Duration,
    /// Per-request timeout of adapters built from this configuration, see
    /// [`HttpRemote::from_config`](crate::HttpRemote::from_config).
    pub request_timeout: Duration,
    /// Local data handling on identity change.
    pub logout_policy: LogoutPolicy,
}

impl SyncConfig {
    /// Creates a configuration for `device_id`.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            scope: DEFAULT_SCOPE.to_string(),
            pull_batch_size: 100,
            push_batch_size: 50,
            retry: RetryConfig::default(),
            sync_interval: None,
            debounce: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            logout_policy: LogoutPolicy::default(),
        }
    }

    /// Sets the cursor scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Sets the pull page size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size.max(1);
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables the periodic trigger.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the mutation debounce.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the logout policy.
    pub fn with_logout_policy(mut self, policy: LogoutPolicy) -> Self {
        self.logout_policy = policy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("unknown-device")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per remote call, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
    /// Consecutive failed cycles after which a transient failure is
    /// reported as user-facing.
    pub failure_ceiling: u32,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
            failure_ceiling: 5,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
            failure_ceiling: 1,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    ///
    /// Values below 1.0, infinities and NaN are clamped to 1.0.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = clamp_multiplier(multiplier);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Sets the failure ceiling.
    pub fn with_failure_ceiling(mut self, ceiling: u32) -> Self {
        self.failure_ceiling = ceiling.max(1);
        self
    }

    /// Calculates the delay before attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let multiplier = clamp_multiplier(self.backoff_multiplier);
        let base_delay = self.initial_delay.as_secs_f64() * multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64((delay_secs + jitter).min(self.max_delay.as_secs_f64()))
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

fn clamp_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() {
        multiplier.max(1.0)
    } else {
        1.0
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
