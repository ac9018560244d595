//! Recovery tracking for injury records.
//!
//! Appends dated progress updates and derives the healing stage:
//! - Updates must arrive in timestamp order (equal timestamps are accepted)
//! - Progress may only fall when the update is flagged as a regression, and
//!   the next update is then compared against the lowered value
//! - Reaching 100% moves the record to HEALED; any positive stage moves an
//!   ACTIVE record to HEALING. Status is never moved backwards here.

use crate::{Error, HealingStage, InjuryRecord, RecordStatus, RecoveryUpdate, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const MAX_PAIN_LEVEL: u8 = 10;
pub const MAX_PROGRESS_PERCENT: u8 = 100;

/// A progress update as submitted by the user
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateRequest {
    pub timestamp: DateTime<Utc>,
    pub pain_level: u8,
    pub progress_percent: u8,
    pub notes: String,
    pub photo_ref: Option<Uuid>,
    pub regression: bool,
}

impl UpdateRequest {
    pub fn new(timestamp: DateTime<Utc>, pain_level: u8, progress_percent: u8) -> Self {
        Self {
            timestamp,
            pain_level,
            progress_percent,
            notes: String::new(),
            photo_ref: None,
            regression: false,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_photo(mut self, photo_id: Uuid) -> Self {
        self.photo_ref = Some(photo_id);
        self
    }

    /// Mark this update as a documented setback
    pub fn regression(mut self) -> Self {
        self.regression = true;
        self
    }
}

/// Check the numeric ranges of an update
pub fn validate_ranges(pain_level: u8, progress_percent: u8) -> Result<()> {
    if pain_level > MAX_PAIN_LEVEL {
        return Err(Error::Validation(format!(
            "pain level {} is outside 0-{}",
            pain_level, MAX_PAIN_LEVEL
        )));
    }
    if progress_percent > MAX_PROGRESS_PERCENT {
        return Err(Error::Validation(format!(
            "progress {}% is outside 0-{}",
            progress_percent, MAX_PROGRESS_PERCENT
        )));
    }
    Ok(())
}

/// Validate `request` against the record's history and append it.
///
/// Nothing is modified when an error is returned.
pub fn apply_update(record: &mut InjuryRecord, request: UpdateRequest) -> Result<HealingStage> {
    validate_ranges(request.pain_level, request.progress_percent)?;

    if request.timestamp < record.created_at {
        return Err(Error::Validation(format!(
            "update at {} precedes the record's creation at {}",
            request.timestamp, record.created_at
        )));
    }
    if let Some(last) = record.recovery_updates.last() {
        if request.timestamp < last.timestamp {
            return Err(Error::Validation(format!(
                "update at {} precedes the latest update at {}",
                request.timestamp, last.timestamp
            )));
        }
        if request.progress_percent < last.progress_percent && !request.regression {
            return Err(Error::InvariantViolation(format!(
                "progress cannot fall from {}% to {}% without a regression flag",
                last.progress_percent, request.progress_percent
            )));
        }
    }

    if let Some(photo_id) = request.photo_ref {
        if record.photos.find(photo_id).is_none() {
            return Err(Error::Validation(format!(
                "photo {} is not attached to record {}",
                photo_id, record.id
            )));
        }
    }

    let stage = HealingStage::from_progress(request.progress_percent);
    let timestamp = request.timestamp;

    record.recovery_updates.append(RecoveryUpdate {
        timestamp,
        pain_level: request.pain_level,
        progress_percent: request.progress_percent,
        notes: request.notes,
        photo_ref: request.photo_ref,
        regression: request.regression,
    });

    match stage {
        HealingStage::Healed if record.status != RecordStatus::Healed => {
            record.status = RecordStatus::Healed;
            record.healed_at = Some(timestamp);
            tracing::info!("Record {} reached HEALED", record.id);
        }
        HealingStage::Healing | HealingStage::Recovering
            if record.status == RecordStatus::Active =>
        {
            record.status = RecordStatus::Healing;
            tracing::debug!("Record {} moved to HEALING", record.id);
        }
        _ => {}
    }

    Ok(stage)
}
