//! Client-driven "run to completion" over the single-step primitive.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::Instrument;

use crate::config::{
    env_parse,
    limits::{DEFAULT_MAX_STEPS, DEFAULT_STEP_DELAY_MS},
};
use crate::store::{Outcome, SessionStore, StepResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLoopConfig {
    /// Step budget; reaching it ends the run without an error.
    pub max_steps: u32,
    /// Pause between steps so observers can animate. Zero for headless runs.
    pub step_delay: Duration,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            step_delay: Duration::from_millis(DEFAULT_STEP_DELAY_MS),
        }
    }
}

impl RunLoopConfig {
    /// Environment variables:
    /// - EMUCTL_MAX_STEPS (default: 1000)
    /// - EMUCTL_STEP_DELAY_MS (default: 50)
    pub fn from_env() -> Self {
        Self {
            max_steps: env_parse("EMUCTL_MAX_STEPS", DEFAULT_MAX_STEPS),
            step_delay: Duration::from_millis(env_parse(
                "EMUCTL_STEP_DELAY_MS",
                DEFAULT_STEP_DELAY_MS,
            )),
        }
    }
}

/// How a run ended. `steps` counts successfully reconciled steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Task data was loaded instead of running; invoke again to run.
    Primed,
    Halted { steps: u32 },
    /// The service reported no further instructions.
    Exhausted { steps: u32 },
    BudgetReached { steps: u32 },
    /// A step failed; the error is in the session status.
    Failed { steps: u32 },
    Cancelled { steps: u32 },
    /// Another step request overtook the run.
    Superseded { steps: u32 },
}

impl RunOutcome {
    pub fn steps(&self) -> u32 {
        match *self {
            RunOutcome::Primed => 0,
            RunOutcome::Halted { steps }
            | RunOutcome::Exhausted { steps }
            | RunOutcome::BudgetReached { steps }
            | RunOutcome::Failed { steps }
            | RunOutcome::Cancelled { steps }
            | RunOutcome::Superseded { steps } => steps,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunLoopController {
    config: RunLoopConfig,
}

impl RunLoopController {
    pub fn new(config: RunLoopConfig) -> Self {
        Self { config }
    }

    /// Step `store` until halt, exhaustion, budget, failure or cancellation.
    ///
    /// Steps are strictly sequential and each is reconciled before the next is
    /// issued. `cancel` is checked at the top of every iteration.
    pub async fn run(
        &self,
        store: &SessionStore,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> RunOutcome {
        if let Some(task) = store.needs_priming() {
            return match store.prime(task).await {
                Outcome::Primed | Outcome::Applied => RunOutcome::Primed,
                Outcome::Discarded => RunOutcome::Superseded { steps: 0 },
                Outcome::Failed => RunOutcome::Failed { steps: 0 },
            };
        }

        let span = tracing::info_span!(
            "run_remaining",
            session = %store.id(),
            max_steps = self.config.max_steps
        );
        async {
            let t0 = Instant::now();
            store.hold_loading();
            let mut steps: u32 = 0;
            let outcome = loop {
                if is_cancelled(&cancel) {
                    break RunOutcome::Cancelled { steps };
                }
                if steps >= self.config.max_steps {
                    break RunOutcome::BudgetReached { steps };
                }
                match store.step_once().await {
                    StepResult::Failed => break RunOutcome::Failed { steps },
                    StepResult::Discarded => break RunOutcome::Superseded { steps },
                    StepResult::Applied { halted, continues } => {
                        steps += 1;
                        if halted {
                            break RunOutcome::Halted { steps };
                        }
                        if !continues {
                            break RunOutcome::Exhausted { steps };
                        }
                        if steps >= self.config.max_steps {
                            break RunOutcome::BudgetReached { steps };
                        }
                    }
                }
                self.pace(&mut cancel).await;
            };
            store.release_loading();

            let ms = t0.elapsed().as_millis() as u64;
            match outcome {
                RunOutcome::BudgetReached { .. } => tracing::info!(
                    target = "emuctl",
                    steps = outcome.steps(),
                    duration_ms = ms,
                    "step budget reached"
                ),
                _ => tracing::info!(
                    target = "emuctl",
                    steps = outcome.steps(),
                    duration_ms = ms,
                    outcome = ?outcome,
                    "run finished"
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Wait out the pacing delay; a cancellation request cuts it short.
    async fn pace(&self, cancel: &mut Option<watch::Receiver<bool>>) {
        let delay = self.config.step_delay;
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        match cancel {
            Some(rx) => {
                let sender_gone = tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    changed = rx.changed() => changed.is_err(),
                };
                if sender_gone {
                    // Nobody can cancel any more.
                    *cancel = None;
                    tokio::time::sleep(delay).await;
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}
