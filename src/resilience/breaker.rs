//! Per-provider circuit breaker.
//!
//! # States
//!
//! - **Closed**: calls pass through. Failures count up, a success resets
//!   the count, and the count also resets once `reset_interval` passes.
//! - **Open**: entered when the count exceeds `failure_threshold`. Calls
//!   are rejected without touching the provider until `cooldown` elapses.
//! - **HalfOpen**: up to `half_open_max_trials` calls try the provider.
//!   One success closes the circuit, one failure reopens it.
//!
//! Every state change starts a new generation. Outcomes are tagged with the
//! generation their call was admitted under, and outcomes from an earlier
//! generation are ignored.
//!
//! The state lives behind a plain mutex that is only held for bookkeeping,
//! never across the provider call itself.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ProviderError;

/// Health of a provider as seen by its breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitHealth {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Trip once consecutive failures exceed this.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting trial calls.
    pub cooldown: Duration,
    /// Trial calls admitted while half-open.
    pub half_open_max_trials: u32,
    /// While closed, forget failures after this long. `None` never forgets.
    pub reset_interval: Option<Duration>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            half_open_max_trials: 2,
            reset_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// Read-only view of a breaker at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub health: CircuitHealth,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

/// Admission for one call, tied to the generation it was granted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    generation: u64,
}

#[derive(Debug)]
struct CircuitState {
    health: CircuitHealth,
    generation: u64,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_since: Option<Instant>,
    window_start: Instant,
    trials: u32,
}

impl CircuitState {
    fn permit(&self) -> Permit {
        Permit {
            generation: self.generation,
        }
    }

    fn new() -> Self {
        Self {
            health: CircuitHealth::Closed,
            generation: 0,
            consecutive_failures: 0,
            opened_at: None,
            half_open_since: None,
            window_start: Instant::now(),
            trials: 0,
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.lock();
        CircuitSnapshot {
            health: state.health,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at,
        }
    }

    /// Run `f` under the breaker. Rejected calls never invoke `f`.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let permit = self.try_acquire()?;
        match f().await {
            Ok(value) => {
                self.on_success(permit);
                Ok(value)
            }
            Err(err) => {
                self.on_failure(permit);
                Err(err)
            }
        }
    }

    /// Ask permission for one call. Callers that get a permit must report the
    /// outcome with it through [`on_success`](Self::on_success) or
    /// [`on_failure`](Self::on_failure).
    pub fn try_acquire(&self) -> Result<Permit, ProviderError> {
        let now = Instant::now();
        let mut state = self.lock();

        match state.health {
            CircuitHealth::Closed => {
                if let Some(interval) = self.config.reset_interval
                    && now.duration_since(state.window_start) >= interval
                {
                    state.consecutive_failures = 0;
                    state.window_start = now;
                    state.generation += 1;
                }
                Ok(state.permit())
            }
            CircuitHealth::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                if now.duration_since(opened_at) < self.config.cooldown {
                    return Err(self.rejected());
                }
                info!(provider = %self.name, "circuit half-open, admitting trial calls");
                state.health = CircuitHealth::HalfOpen;
                state.half_open_since = Some(now);
                state.trials = 1;
                state.generation += 1;
                Ok(state.permit())
            }
            CircuitHealth::HalfOpen => {
                // Trials abandoned mid-flight never report back; free their
                // slots after another cooldown.
                let since = state.half_open_since.unwrap_or(now);
                if state.trials >= self.config.half_open_max_trials
                    && now.duration_since(since) >= self.config.cooldown
                {
                    state.trials = 0;
                    state.half_open_since = Some(now);
                    state.generation += 1;
                }
                if state.trials < self.config.half_open_max_trials {
                    state.trials += 1;
                    Ok(state.permit())
                } else {
                    Err(self.rejected())
                }
            }
        }
    }

    pub fn on_success(&self, permit: Permit) {
        let mut state = self.lock();
        if !self.current(&state, permit) {
            return;
        }
        match state.health {
            CircuitHealth::Closed => state.consecutive_failures = 0,
            CircuitHealth::HalfOpen => {
                info!(provider = %self.name, "circuit closed after successful trial");
                state.health = CircuitHealth::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.half_open_since = None;
                state.trials = 0;
                state.window_start = Instant::now();
                state.generation += 1;
            }
            CircuitHealth::Open => {}
        }
    }

    pub fn on_failure(&self, permit: Permit) {
        let mut state = self.lock();
        if !self.current(&state, permit) {
            return;
        }
        match state.health {
            CircuitHealth::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures > self.config.failure_threshold {
                    warn!(
                        provider = %self.name,
                        failures = state.consecutive_failures,
                        "circuit opened"
                    );
                    Self::trip(&mut state);
                }
            }
            CircuitHealth::HalfOpen => {
                warn!(provider = %self.name, "trial failed, circuit re-opened");
                Self::trip(&mut state);
            }
            CircuitHealth::Open => {}
        }
    }

    fn current(&self, state: &CircuitState, permit: Permit) -> bool {
        if permit.generation == state.generation {
            return true;
        }
        debug!(
            provider = %self.name,
            admitted = permit.generation,
            current = state.generation,
            "ignoring outcome from an earlier generation"
        );
        false
    }

    fn trip(state: &mut CircuitState) {
        state.generation += 1;
        state.health = CircuitHealth::Open;
        state.consecutive_failures = 0;
        state.opened_at = Some(Instant::now());
        state.half_open_since = None;
        state.trials = 0;
    }

    fn rejected(&self) -> ProviderError {
        ProviderError::CircuitOpen(self.name.clone())
    }

    fn lock(&self) -> MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
