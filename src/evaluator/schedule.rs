//! Periodic driver for the evaluator.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::{Evaluator, EvaluatorError, TickReport};
use crate::store::PresenceStore;

/// Runs an evaluator on a fixed period until told to stop.
///
/// Ticks run on the blocking pool because store calls block. A tick that
/// overruns the period delays the next one instead of bursting. Shutdown is
/// only observed between ticks, so an in-flight tick always completes.
pub struct Scheduler<S> {
    evaluator: Arc<Evaluator<S>>,
    period: Duration,
}

impl<S: PresenceStore + 'static> Scheduler<S> {
    pub fn new(evaluator: Evaluator<S>, period: Duration) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
            period,
        }
    }

    /// Run one tick now on the blocking pool.
    pub async fn tick(&self) -> Result<TickReport, EvaluatorError> {
        let evaluator = Arc::clone(&self.evaluator);
        tokio::task::spawn_blocking(move || evaluator.run_evaluation_tick(Utc::now()))
            .await
            .map_err(|err| EvaluatorError::Aborted(err.to_string()))?
    }

    /// Tick every period until `shutdown` turns true or its sender is
    /// dropped. Returns the number of ticks started.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_secs = self.period.as_secs_f64(), "evaluator started");
        let mut ticks = 0;
        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    ticks += 1;
                    match self.tick().await {
                        Ok(_) => {}
                        Err(err @ EvaluatorError::Aborted(_)) => {
                            error!(error = %err, "evaluation tick aborted");
                        }
                        Err(err) => {
                            warn!(error = %err, "evaluation tick failed, retrying next interval");
                        }
                    }
                }
            }
        }
        info!(ticks, "evaluator stopped");
        ticks
    }
}
