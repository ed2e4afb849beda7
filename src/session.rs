use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

use crate::error::{TransitionError, UploadError};
use crate::model::{SessionId, UnixTimeMs};
use crate::progress::{
    EstimatorSettings, FinishPlan, ProgressEstimator, ProgressSample, RampStep,
};

// ============================================================================
// State machine
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    #[default]
    Idle,
    Selecting,
    Uploading,
    Finishing,
    Complete,
    Error,
    Cancelled,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::{Cancelled, Complete, Error, Finishing, Idle, Selecting, Uploading};
        matches!(
            (self, next),
            (Idle, Selecting)
                | (Selecting, Uploading)
                | (Uploading, Finishing)
                | (Uploading, Error)
                | (Finishing, Complete)
                | (Selecting | Uploading | Finishing, Cancelled)
        )
    }

    pub fn validate_transition(self, next: UploadState) -> Result<(), TransitionError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Selecting => "SELECTING",
            Self::Uploading => "UPLOADING",
            Self::Finishing => "FINISHING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// How a session ended. Cancellation is an outcome, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed,
    Failed(UploadError),
    Cancelled,
}

// ============================================================================
// Session
// ============================================================================

/// One upload attempt. Owns the in-flight transfer task and the progress
/// estimator; timers live in the scheduler under this session's id.
#[derive(Debug)]
pub struct UploadSession {
    id: SessionId,
    started_at: Instant,
    captured_at: UnixTimeMs,
    state: UploadState,
    last_error: Option<UploadError>,
    estimator: ProgressEstimator,
    transfer: Option<JoinHandle<()>>,
}

impl UploadSession {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self {
            id: SessionId::generate(),
            started_at: Instant::now(),
            captured_at: UnixTimeMs::now(),
            state: UploadState::Idle,
            last_error: None,
            estimator: ProgressEstimator::new(settings),
            transfer: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn last_error(&self) -> Option<&UploadError> {
        self.last_error.as_ref()
    }

    pub fn progress(&self) -> u8 {
        self.estimator.value()
    }

    pub fn captured_at(&self) -> UnixTimeMs {
        self.captured_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn outcome(&self) -> Option<UploadOutcome> {
        match self.state {
            UploadState::Complete => Some(UploadOutcome::Completed),
            UploadState::Cancelled => Some(UploadOutcome::Cancelled),
            UploadState::Error => Some(UploadOutcome::Failed(self.last_error.clone().unwrap_or(
                UploadError::Transport {
                    message: "unknown".to_string(),
                },
            ))),
            _ => None,
        }
    }

    fn transition(&mut self, next: UploadState) -> Result<(), TransitionError> {
        self.state.validate_transition(next)?;
        info!(session = %self.id, from = %self.state, to = %next, "upload state changed");
        self.state = next;
        Ok(())
    }

    pub fn select(&mut self) -> Result<(), TransitionError> {
        self.transition(UploadState::Selecting)
    }

    /// Starts the clock the minimum visible duration is measured against and
    /// stamps the capture time.
    pub fn start_upload(&mut self) -> Result<(), TransitionError> {
        self.transition(UploadState::Uploading)?;
        self.started_at = Instant::now();
        self.captured_at = UnixTimeMs::now();
        Ok(())
    }

    pub fn attach_transfer(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.transfer.replace(handle) {
            previous.abort();
        }
    }

    pub fn has_live_transfer(&self) -> bool {
        self.transfer.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn on_sim_tick(&mut self) -> Option<ProgressSample> {
        if self.state != UploadState::Uploading {
            return None;
        }
        self.estimator.simulate_tick()
    }

    pub fn on_progress(&mut self, loaded: u64, total: Option<u64>) -> Option<ProgressSample> {
        if self.state != UploadState::Uploading {
            return None;
        }
        let elapsed = self.elapsed();
        self.estimator.observe(loaded, total, elapsed)
    }

    pub fn on_transfer_succeeded(&mut self) -> Result<FinishPlan, TransitionError> {
        self.transition(UploadState::Finishing)?;
        Ok(self.estimator.begin_finish(self.elapsed()))
    }

    pub fn on_transfer_failed(&mut self, error: UploadError) -> Result<(), TransitionError> {
        self.transition(UploadState::Error)?;
        self.last_error = Some(error);
        Ok(())
    }

    pub fn on_ramp_tick(&mut self) -> Option<RampStep> {
        if self.state != UploadState::Finishing {
            return None;
        }
        self.estimator.ramp_tick()
    }

    pub fn finalize(&mut self) -> Result<ProgressSample, TransitionError> {
        self.transition(UploadState::Complete)?;
        Ok(self.estimator.complete())
    }

    /// Aborts the transfer and moves to `Cancelled`. Returns false when there
    /// was nothing to cancel (idle or already terminal).
    pub fn cancel(&mut self) -> bool {
        if !self.state.can_transition_to(UploadState::Cancelled) {
            return false;
        }
        self.abort_transfer();
        self.state = UploadState::Cancelled;
        info!(session = %self.id, "upload cancelled");
        true
    }

    pub fn abort_transfer(&mut self) {
        if let Some(handle) = self.transfer.take() {
            handle.abort();
        }
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        self.abort_transfer();
    }
}
