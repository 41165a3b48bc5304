//! UI action facade.
//!
//! Thin async wrappers a frontend can call directly. Every function returns
//! `Result<T, String>`; progress is forwarded as [`ProgressEvent`]s over a
//! `tokio::sync::mpsc` channel.

pub mod device;
pub mod firmware;
pub mod modes;
pub mod settings;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::esp::FlashStage;
use crate::protocol::{TransferPhase, TransferProgress};

/// Channel the facade reports progress on.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Progress event sent to the frontend during long operations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Current stage name.
    pub stage: String,
    /// Items (modes, blocks or bytes) done so far.
    pub done: Option<usize>,
    pub total: Option<usize>,
    /// Progress percentage (0-100), negative for log lines.
    pub percent: f32,
    /// Human-readable message.
    pub message: String,
}

impl From<FlashStage> for ProgressEvent {
    fn from(stage: FlashStage) -> Self {
        let (stage_name, done, total) = match &stage {
            FlashStage::ReadingPackage => ("reading", None, None),
            FlashStage::EnteringBootloader => ("bootloader", None, None),
            FlashStage::Syncing => ("syncing", None, None),
            FlashStage::Attaching => ("attaching", None, None),
            FlashStage::Erasing { .. } => ("erasing", None, None),
            FlashStage::Writing { written, total } => ("writing", Some(*written), Some(*total)),
            FlashStage::Finalizing => ("finalizing", None, None),
            FlashStage::Restarting => ("restarting", None, None),
            FlashStage::Complete => ("complete", None, None),
            FlashStage::Log { .. } => ("log", None, None),
        };

        Self {
            stage: stage_name.to_string(),
            done,
            total,
            percent: stage.percent(),
            message: stage.message(),
        }
    }
}

impl From<TransferProgress> for ProgressEvent {
    fn from(progress: TransferProgress) -> Self {
        let stage = match progress.phase {
            TransferPhase::Start => "start",
            TransferPhase::Count => "count",
            TransferPhase::Pulling => "pulling",
            TransferPhase::Pushing => "pushing",
            TransferPhase::Finalizing => "finalizing",
            TransferPhase::Done => "done",
        };
        let percent = match progress.phase {
            TransferPhase::Done => 100.0,
            _ if progress.total == 0 => 0.0,
            _ => progress.index as f32 * 100.0 / progress.total as f32,
        };
        let message = match progress.phase {
            TransferPhase::Start => "Starting transfer...".to_string(),
            TransferPhase::Count => format!("{} to transfer", progress.total),
            TransferPhase::Pulling => format!("Received {} of {}", progress.index, progress.total),
            TransferPhase::Pushing => format!("Sent {} of {}", progress.index, progress.total),
            TransferPhase::Finalizing => "Finishing up...".to_string(),
            TransferPhase::Done => "Transfer complete".to_string(),
        };

        Self {
            stage: stage.to_string(),
            done: Some(progress.index),
            total: Some(progress.total),
            percent,
            message,
        }
    }
}

/// Render an error for the UI: support code, message and any recovery hint.
pub fn describe_error(error: &LinkError) -> String {
    match error.remediation() {
        Some(hint) => format!("[{}] {}. {}", error.error_code(), error, hint),
        None => format!("[{}] {}", error.error_code(), error),
    }
}

fn report<E: Into<ProgressEvent>>(progress: &ProgressSender, event: E) {
    // the receiver going away only means nobody is watching
    let _ = progress.send(event.into());
}
