//! Core domain types for the Mend health-records engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Classification enums (severity, emergency level, status, healing stage)
//! - The `InjuryRecord` aggregate and everything it owns
//! - Inbound payloads from the analysis and upload collaborators
//! - Record summaries handed to the timeline index and the UI

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Deref;
use uuid::Uuid;

/// Gives a unit enum a stable label, `Display`, and a case-insensitive
/// `FromStr` that rejects unknown labels with `Error::Validation`.
macro_rules! labelled_enum {
    ($name:ident, $what:literal { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::Error;

            fn from_str(s: &str) -> $crate::Result<Self> {
                let wanted = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        $crate::Error::Validation(format!("unknown {} '{}'", $what, s))
                    })
            }
        }
    };
}

pub(crate) use labelled_enum;

// ============================================================================
// Classification Types
// ============================================================================

/// How bad the injury is. Ordered from least to most severe.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Minor,
    Moderate,
    Severe,
}

labelled_enum!(Severity, "severity" {
    Minor => "MINOR",
    Moderate => "MODERATE",
    Severe => "SEVERE",
});

/// How quickly care is needed. Ordered from least to most urgent.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmergencyLevel {
    Routine,
    Urgent,
    Emergency,
}

labelled_enum!(EmergencyLevel, "emergency level" {
    Routine => "ROUTINE",
    Urgent => "URGENT",
    Emergency => "EMERGENCY",
});

/// Lifecycle status of a record.
///
/// ACTIVE -> HEALING -> HEALED only ever moves forward. ARCHIVED can be
/// reached from anywhere and is terminal.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Active,
    Healing,
    Healed,
    Archived,
}

labelled_enum!(RecordStatus, "status" {
    Active => "ACTIVE",
    Healing => "HEALING",
    Healed => "HEALED",
    Archived => "ARCHIVED",
});

impl RecordStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    /// Staying in the same non-terminal status is allowed (a no-op).
    pub fn can_transition_to(self, next: RecordStatus) -> bool {
        match (self, next) {
            (RecordStatus::Archived, _) => false,
            (_, RecordStatus::Archived) => true,
            (current, next) => next >= current,
        }
    }
}

/// Qualitative healing bucket derived from progress percentage.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealingStage {
    Initial,
    Healing,
    Recovering,
    Healed,
}

labelled_enum!(HealingStage, "healing stage" {
    Initial => "INITIAL",
    Healing => "HEALING",
    Recovering => "RECOVERING",
    Healed => "HEALED",
});

impl HealingStage {
    /// 0-24 initial, 25-59 healing, 60-99 recovering, 100 healed.
    pub fn from_progress(progress_percent: u8) -> Self {
        match progress_percent {
            0..=24 => HealingStage::Initial,
            25..=59 => HealingStage::Healing,
            60..=99 => HealingStage::Recovering,
            _ => HealingStage::Healed,
        }
    }
}

/// When a photo was taken relative to treatment.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PhotoPhase {
    Before,
    During,
    After,
}

labelled_enum!(PhotoPhase, "photo phase" {
    Before => "before",
    During => "during",
    After => "after",
});

/// What a reminder is prompting for.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    Medication,
    CheckIn,
    FollowUp,
    Custom,
}

labelled_enum!(ReminderKind, "reminder kind" {
    Medication => "medication",
    CheckIn => "check_in",
    FollowUp => "follow_up",
    Custom => "custom",
});

// ============================================================================
// Append-only History
// ============================================================================

/// An ordered sequence that can only grow.
///
/// Entries are never mutated, removed or reordered once appended; read access
/// goes through `Deref<Target = [T]>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppendLog<T>(Vec<T>);

impl<T> AppendLog<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn append(&mut self, entry: T) {
        self.0.push(entry);
    }
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for AppendLog<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

// ============================================================================
// Inbound Collaborator Payloads
// ============================================================================

/// Output of the analysis collaborator, already structurally validated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub analysis_text: String,
    pub severity: Severity,
    pub emergency_level: EmergencyLevel,
    pub recommendation: String,
    pub steps: Vec<String>,
}

/// Untyped analysis payload as it arrives over the wire
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    analysis_text: Option<String>,
    severity: Option<String>,
    emergency_level: Option<String>,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default)]
    steps: Option<Vec<String>>,
}

impl TryFrom<RawAnalysis> for AnalysisResult {
    type Error = Error;

    fn try_from(raw: RawAnalysis) -> Result<Self> {
        let missing = |field: &str| Error::Validation(format!("analysis is missing '{}'", field));

        let analysis_text = raw.analysis_text.ok_or_else(|| missing("analysis_text"))?;
        let severity = raw.severity.ok_or_else(|| missing("severity"))?.parse()?;
        let emergency_level = raw
            .emergency_level
            .ok_or_else(|| missing("emergency_level"))?
            .parse()?;

        Ok(AnalysisResult {
            analysis_text,
            severity,
            emergency_level,
            recommendation: raw.recommendation.unwrap_or_default(),
            steps: raw.steps.unwrap_or_default(),
        })
    }
}

impl AnalysisResult {
    /// Parse a JSON analysis payload, checking only its structural shape.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawAnalysis = serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("malformed analysis payload: {}", e)))?;
        AnalysisResult::try_from(raw)
    }
}

/// A photo handed over by the upload collaborator.
#[derive(Clone, Debug)]
pub struct PhotoBlob {
    pub bytes: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    pub phase: PhotoPhase,
}

/// Fields the UI collaborator submits to create a record.
#[derive(Clone, Debug)]
pub struct InjuryDraft {
    pub injury_type: String,
    pub description: String,
    pub severity: Severity,
    pub emergency_level: EmergencyLevel,
    pub body_part: Option<String>,
    pub location_context: Option<String>,
    pub tags: Vec<String>,
    pub analysis: Option<AnalysisResult>,
}

impl InjuryDraft {
    /// Draft without an analysis snapshot.
    pub fn new(
        injury_type: impl Into<String>,
        severity: Severity,
        emergency_level: EmergencyLevel,
    ) -> Self {
        let injury_type = injury_type.into();
        Self {
            description: injury_type.clone(),
            injury_type,
            severity,
            emergency_level,
            body_part: None,
            location_context: None,
            tags: Vec::new(),
            analysis: None,
        }
    }

    /// Draft whose classification comes from the analysis collaborator.
    pub fn from_analysis(injury_type: impl Into<String>, analysis: AnalysisResult) -> Self {
        let mut draft = Self::new(injury_type, analysis.severity, analysis.emergency_level);
        draft.analysis = Some(analysis);
        draft
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_body_part(mut self, body_part: impl Into<String>) -> Self {
        self.body_part = Some(body_part.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location_context = Some(location.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Record Aggregate
// ============================================================================

/// Snapshot of the analysis at creation time. Never changes afterwards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InitialAnalysis {
    pub analysis_text: String,
    pub severity: Severity,
    pub emergency_level: EmergencyLevel,
    pub recommendation: String,
    pub captured_at: DateTime<Utc>,
}

impl InitialAnalysis {
    pub fn is_empty(&self) -> bool {
        self.analysis_text.trim().is_empty() && self.recommendation.trim().is_empty()
    }
}

/// Recommended first-aid steps and which of them the user has done.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct FirstAidSteps {
    pub recommended: Vec<String>,
    pub completed: BTreeSet<usize>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FirstAidSteps {
    pub fn is_complete(&self) -> bool {
        !self.recommended.is_empty() && self.completed.len() == self.recommended.len()
    }
}

/// Reference to a stored photo blob.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PhotoRef {
    pub id: Uuid,
    pub phase: PhotoPhase,
    /// Store-relative path of the blob
    pub path: String,
    pub captured_at: DateTime<Utc>,
    pub caption: Option<String>,
    pub size_bytes: u64,
}

/// Photos grouped by treatment phase, each in insertion order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Photos {
    #[serde(default)]
    pub before: Vec<PhotoRef>,
    #[serde(default)]
    pub during: Vec<PhotoRef>,
    #[serde(default)]
    pub after: Vec<PhotoRef>,
}

impl Photos {
    pub fn phase(&self, phase: PhotoPhase) -> &[PhotoRef] {
        match phase {
            PhotoPhase::Before => &self.before,
            PhotoPhase::During => &self.during,
            PhotoPhase::After => &self.after,
        }
    }

    pub(crate) fn push(&mut self, photo: PhotoRef) {
        match photo.phase {
            PhotoPhase::Before => self.before.push(photo),
            PhotoPhase::During => self.during.push(photo),
            PhotoPhase::After => self.after.push(photo),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhotoRef> {
        self.before.iter().chain(&self.during).chain(&self.after)
    }

    pub fn find(&self, id: Uuid) -> Option<&PhotoRef> {
        self.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.before.len() + self.during.len() + self.after.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One dated entry in a record's recovery history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecoveryUpdate {
    pub timestamp: DateTime<Utc>,
    pub pain_level: u8,
    pub progress_percent: u8,
    pub notes: String,
    pub photo_ref: Option<Uuid>,
    /// Set when this entry documents a setback
    #[serde(default)]
    pub regression: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    pub taken_at: DateTime<Utc>,
    #[serde(default)]
    pub frequency_hours: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

/// A scheduled prompt attached to a record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    pub kind: ReminderKind,
    pub label: String,
    pub due_at: DateTime<Utc>,
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Reminder {
    pub fn new(kind: ReminderKind, label: impl Into<String>, due_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            label: label.into(),
            due_at,
            completed: false,
            completed_at: None,
        }
    }
}

/// Professional follow-up care for a record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct FollowUpCare {
    pub doctor_visit: bool,
    pub visit_date: Option<NaiveDate>,
    pub notes: String,
}

/// One tracked injury episode, from creation to archival.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InjuryRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub injury_type: String,
    pub description: String,
    pub severity: Severity,
    pub emergency_level: EmergencyLevel,
    pub body_part: Option<String>,
    pub location_context: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub status: RecordStatus,
    /// When the record reached HEALED, if it has
    #[serde(default)]
    pub healed_at: Option<DateTime<Utc>>,
    pub initial_analysis: Option<InitialAnalysis>,
    #[serde(default)]
    pub first_aid_steps: FirstAidSteps,
    #[serde(default)]
    pub photos: Photos,
    #[serde(default)]
    pub recovery_updates: AppendLog<RecoveryUpdate>,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub notes: AppendLog<Note>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    #[serde(default)]
    pub follow_up: FollowUpCare,
}

impl InjuryRecord {
    /// Progress of the latest recovery update, 0 when there is none.
    pub fn progress_percent(&self) -> u8 {
        self.recovery_updates
            .last()
            .map(|u| u.progress_percent)
            .unwrap_or(0)
    }

    /// Pain level of the latest recovery update.
    pub fn pain_level(&self) -> Option<u8> {
        self.recovery_updates.last().map(|u| u.pain_level)
    }

    pub fn healing_stage(&self) -> HealingStage {
        HealingStage::from_progress(self.progress_percent())
    }

    pub fn is_archived(&self) -> bool {
        self.status == RecordStatus::Archived
    }

    /// Whole days since the record was created.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }

    /// Time from creation to healing, for records that healed. Never negative.
    pub fn recovery_duration(&self) -> Option<chrono::Duration> {
        self.healed_at
            .map(|healed| (healed - self.created_at).max(chrono::Duration::zero()))
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id,
            created_at: self.created_at,
            injury_type: self.injury_type.clone(),
            description: self.description.clone(),
            severity: self.severity,
            emergency_level: self.emergency_level,
            body_part: self.body_part.clone(),
            status: self.status,
            tags: self.tags.clone(),
            progress_percent: self.progress_percent(),
            healing_stage: self.healing_stage(),
        }
    }
}

/// The listing view of a record, as held by the timeline index.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecordSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub injury_type: String,
    pub description: String,
    pub severity: Severity,
    pub emergency_level: EmergencyLevel,
    pub body_part: Option<String>,
    pub status: RecordStatus,
    pub tags: BTreeSet<String>,
    pub progress_percent: u8,
    pub healing_stage: HealingStage,
}
