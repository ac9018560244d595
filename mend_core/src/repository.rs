//! Record repository: the in-process API over a [`RecordStore`].
//!
//! The repository owns id issuance, timestamps and invariant checking. It
//! keeps every record in memory next to a [`TimelineIndex`] and writes
//! through to the store.
//!
//! ## Mutation protocol
//!
//! Every change to an existing record runs under that record's mutation lock:
//! 1. Clone the current record and apply the change to the copy
//! 2. Re-check the record invariants against the original
//! 3. Write the copy to the store
//! 4. Swap the copy into the catalog and refresh its index entry together
//!
//! A failure at any step leaves both the store and the catalog untouched.
//! Readers only ever look at the catalog, so they see a record either before
//! or after a mutation, never in between.

use crate::config::ReminderConfig;
use crate::export::{self, ExportFormat, ExportOptions};
use crate::index::{Filter, Page, SortOrder, TimelineIndex};
use crate::scheduler::{self, DueReminder, MAX_FREQUENCY_HOURS};
use crate::stats::{self, Granularity, Statistics};
use crate::store::RecordStore;
use crate::tracker::{self, UpdateRequest};
use crate::{
    EmergencyLevel, Error, FirstAidSteps, FollowUpCare, HealingStage, InitialAnalysis, InjuryDraft,
    InjuryRecord, Medication, Note, PhotoBlob, PhotoRef, Photos, RecordStatus, RecordSummary,
    Reminder, Result,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Attempts at drawing a fresh random id before giving up
const MAX_ID_ATTEMPTS: usize = 8;

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Assemble a new ACTIVE record from a draft
pub(crate) fn build_record(id: Uuid, created_at: DateTime<Utc>, draft: InjuryDraft) -> InjuryRecord {
    let tags: BTreeSet<String> = draft
        .tags
        .iter()
        .map(|t| normalize_tag(t))
        .filter(|t| !t.is_empty())
        .collect();

    let (initial_analysis, recommended) = match draft.analysis {
        Some(analysis) => (
            Some(InitialAnalysis {
                analysis_text: analysis.analysis_text,
                severity: analysis.severity,
                emergency_level: analysis.emergency_level,
                recommendation: analysis.recommendation,
                captured_at: created_at,
            }),
            analysis.steps,
        ),
        None => (None, Vec::new()),
    };

    InjuryRecord {
        id,
        created_at,
        injury_type: draft.injury_type.trim().to_string(),
        description: draft.description,
        severity: draft.severity,
        emergency_level: draft.emergency_level,
        body_part: draft.body_part,
        location_context: draft.location_context,
        tags,
        status: RecordStatus::Active,
        healed_at: None,
        initial_analysis,
        first_aid_steps: FirstAidSteps {
            recommended,
            ..FirstAidSteps::default()
        },
        photos: Photos::default(),
        recovery_updates: Default::default(),
        medications: Vec::new(),
        notes: Default::default(),
        reminders: Vec::new(),
        follow_up: FollowUpCare::default(),
    }
}

fn has_analysis(analysis: Option<&InitialAnalysis>) -> bool {
    analysis.is_some_and(|a| !a.is_empty())
}

fn validate_draft(draft: &InjuryDraft) -> Result<()> {
    if draft.injury_type.trim().is_empty() {
        return Err(Error::Validation("injury type must not be empty".into()));
    }
    if draft.tags.iter().any(|t| t.trim().is_empty()) {
        return Err(Error::Validation("tags must not be empty".into()));
    }
    if draft.emergency_level == EmergencyLevel::Emergency {
        let documented = draft.analysis.as_ref().is_some_and(|a| {
            !a.analysis_text.trim().is_empty() || !a.recommendation.trim().is_empty()
        });
        if !documented {
            return Err(Error::InvariantViolation(
                "an EMERGENCY record requires an initial analysis".into(),
            ));
        }
    }
    Ok(())
}

/// A named change to an existing record
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    AppendRecoveryUpdate(UpdateRequest),
    /// Flip completion of the first-aid step at this index
    ToggleStep(usize),
    AppendNote(String),
    AppendMedication {
        name: String,
        dosage: String,
        taken_at: DateTime<Utc>,
        frequency_hours: Option<u32>,
    },
    ChangeStatus(RecordStatus),
    ChangeTags {
        add: Vec<String>,
        remove: Vec<String>,
    },
    SetFollowUp(FollowUpCare),
    AddReminder(Reminder),
    CompleteReminder(usize),
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::AppendRecoveryUpdate(_) => "append-recovery-update",
            Mutation::ToggleStep(_) => "toggle-step",
            Mutation::AppendNote(_) => "append-note",
            Mutation::AppendMedication { .. } => "append-medication",
            Mutation::ChangeStatus(_) => "change-status",
            Mutation::ChangeTags { .. } => "change-tags",
            Mutation::SetFollowUp(_) => "set-follow-up",
            Mutation::AddReminder(_) => "add-reminder",
            Mutation::CompleteReminder(_) => "complete-reminder",
        }
    }

    fn apply(self, record: &mut InjuryRecord, now: DateTime<Utc>) -> Result<()> {
        match self {
            Mutation::AppendRecoveryUpdate(request) => {
                tracker::apply_update(record, request)?;
            }
            Mutation::ToggleStep(index) => toggle_step(&mut record.first_aid_steps, index, now)?,
            Mutation::AppendNote(content) => {
                if content.trim().is_empty() {
                    return Err(Error::Validation("note must not be empty".into()));
                }
                record.notes.append(Note {
                    timestamp: now,
                    content,
                });
            }
            Mutation::AppendMedication {
                name,
                dosage,
                taken_at,
                frequency_hours,
            } => {
                if name.trim().is_empty() {
                    return Err(Error::Validation("medication name must not be empty".into()));
                }
                if let Some(hours) = frequency_hours {
                    if !(1..=MAX_FREQUENCY_HOURS).contains(&hours) {
                        return Err(Error::Validation(format!(
                            "medication frequency must be between 1 and {} hours",
                            MAX_FREQUENCY_HOURS
                        )));
                    }
                }
                record.medications.push(Medication {
                    name,
                    dosage,
                    taken_at,
                    frequency_hours,
                });
            }
            Mutation::ChangeStatus(next) => {
                if !record.status.can_transition_to(next) {
                    return Err(Error::InvariantViolation(format!(
                        "status cannot move from {} to {}",
                        record.status, next
                    )));
                }
                if next != record.status {
                    tracing::info!("Record {} status {} -> {}", record.id, record.status, next);
                    if next == RecordStatus::Healed && record.healed_at.is_none() {
                        record.healed_at = Some(now);
                    }
                    record.status = next;
                }
            }
            Mutation::ChangeTags { add, remove } => {
                for tag in &remove {
                    record.tags.remove(&normalize_tag(tag));
                }
                for tag in &add {
                    let tag = normalize_tag(tag);
                    if tag.is_empty() {
                        return Err(Error::Validation("tags must not be empty".into()));
                    }
                    record.tags.insert(tag);
                }
            }
            Mutation::SetFollowUp(follow_up) => record.follow_up = follow_up,
            Mutation::AddReminder(reminder) => {
                if reminder.label.trim().is_empty() {
                    return Err(Error::Validation("reminder label must not be empty".into()));
                }
                record.reminders.push(reminder);
            }
            Mutation::CompleteReminder(index) => scheduler::complete_reminder(record, index, now)?,
        }
        Ok(())
    }
}

fn toggle_step(steps: &mut FirstAidSteps, index: usize, now: DateTime<Utc>) -> Result<()> {
    if index >= steps.recommended.len() {
        return Err(Error::Validation(format!(
            "step {} does not exist ({} recommended)",
            index,
            steps.recommended.len()
        )));
    }
    if !steps.completed.remove(&index) {
        steps.completed.insert(index);
        if steps.completed_at.is_none() {
            steps.completed_at = Some(now);
        }
    }
    Ok(())
}

/// True when `after` starts with every entry of `before`, unchanged
fn extends<T: PartialEq>(before: &[T], after: &[T]) -> bool {
    after.len() >= before.len() && after[..before.len()] == *before
}

/// Record invariants that must hold across any mutation
fn check_invariants(before: &InjuryRecord, after: &InjuryRecord) -> Result<()> {
    let violation = |what: &str| Err(Error::InvariantViolation(what.to_string()));

    if after.id != before.id || after.created_at != before.created_at {
        return violation("record identity is immutable");
    }
    if after.initial_analysis != before.initial_analysis {
        return violation("the initial analysis is immutable");
    }
    if after.first_aid_steps.recommended != before.first_aid_steps.recommended {
        return violation("recommended first-aid steps are immutable");
    }
    if !extends(&before.recovery_updates, &after.recovery_updates) {
        return violation("recovery updates are append-only");
    }
    if !extends(&before.notes, &after.notes) {
        return violation("notes are append-only");
    }
    if after.status != before.status && !before.status.can_transition_to(after.status) {
        return violation("illegal status transition");
    }
    for update in after.recovery_updates.iter().skip(before.recovery_updates.len()) {
        tracker::validate_ranges(update.pain_level, update.progress_percent)?;
    }
    let steps = &after.first_aid_steps;
    if steps.completed.iter().any(|&i| i >= steps.recommended.len()) {
        return violation("completed step outside the recommended steps");
    }
    if after.emergency_level == EmergencyLevel::Emergency
        && !has_analysis(after.initial_analysis.as_ref())
    {
        return violation("an EMERGENCY record requires an initial analysis");
    }
    Ok(())
}

/// In-memory view of the store: full records plus their index
#[derive(Default)]
struct Catalog {
    records: HashMap<Uuid, InjuryRecord>,
    index: TimelineIndex,
}

/// Record CRUD, queries and derived views over a store
pub struct Repository<S: RecordStore> {
    store: S,
    clock: Box<dyn Clock>,
    state: RwLock<Catalog>,
    /// Per-record mutation locks
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl<S: RecordStore> Repository<S> {
    /// Open a repository over `store` using the system clock
    pub fn open(store: S) -> Result<Self> {
        Self::with_clock(store, SystemClock)
    }

    /// Open a repository, loading every stored record into the catalog
    pub fn with_clock(store: S, clock: impl Clock + 'static) -> Result<Self> {
        let records = store.load_all()?;
        let index = TimelineIndex::build(&records);
        let records: HashMap<Uuid, InjuryRecord> =
            records.into_iter().map(|r| (r.id, r)).collect();
        tracing::debug!("Repository opened with {} records", records.len());

        Ok(Self {
            store,
            clock: Box::new(clock),
            state: RwLock::new(Catalog { records, index }),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.read_state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Catalog> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    fn publish(&self, record: InjuryRecord) {
        let mut state = self.write_state();
        state.index.upsert(record.summary());
        state.records.insert(record.id, record);
    }

    fn issue_id(&self) -> Result<Uuid> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = Uuid::new_v4();
            if self.store.reserve_id(id)? {
                return Ok(id);
            }
            tracing::warn!("Id {} was already issued, drawing another", id);
        }
        Err(Error::Storage("unable to issue a fresh record id".into()))
    }

    /// Create a new ACTIVE record from `draft`
    pub fn create(&self, draft: InjuryDraft) -> Result<InjuryRecord> {
        validate_draft(&draft)?;

        let id = self.issue_id()?;
        let record = build_record(id, self.clock.now(), draft);
        self.store.put(&record)?;
        self.publish(record.clone());

        tracing::info!(
            "Created record {} ({}, {})",
            record.id,
            record.injury_type,
            record.severity
        );
        Ok(record)
    }

    pub fn get(&self, id: Uuid) -> Result<InjuryRecord> {
        self.read_state()
            .records
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    /// Run `change` against a copy of the record and commit it if the
    /// invariants still hold. Unchanged records are not rewritten.
    fn modify<T>(
        &self,
        id: Uuid,
        change: impl FnOnce(&mut InjuryRecord, DateTime<Utc>) -> Result<T>,
    ) -> Result<(InjuryRecord, T)> {
        let lock = self.record_lock(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let before = self.get(id)?;
        if before.is_archived() {
            return Err(Error::InvariantViolation(format!(
                "record {} is archived and can no longer change",
                id
            )));
        }

        let mut after = before.clone();
        let output = change(&mut after, self.clock.now())?;
        if after == before {
            return Ok((after, output));
        }

        check_invariants(&before, &after)?;
        self.store.put(&after)?;
        self.publish(after.clone());
        Ok((after, output))
    }

    /// Apply a named mutation atomically
    pub fn update(&self, id: Uuid, mutation: Mutation) -> Result<InjuryRecord> {
        let name = mutation.name();
        let (record, ()) = self.modify(id, |record, now| mutation.apply(record, now))?;
        tracing::debug!("Applied {} to record {}", name, id);
        Ok(record)
    }

    /// Append a recovery update, returning the record and its new healing stage
    pub fn add_update(
        &self,
        id: Uuid,
        request: UpdateRequest,
    ) -> Result<(InjuryRecord, HealingStage)> {
        self.modify(id, |record, _| tracker::apply_update(record, request))
    }

    /// Mark a reminder completed. Repeating the call is a no-op.
    pub fn mark_reminder_completed(&self, id: Uuid, index: usize) -> Result<InjuryRecord> {
        self.update(id, Mutation::CompleteReminder(index))
    }

    /// Store a photo blob and attach it to the record.
    ///
    /// If the record cannot take the photo the blob is removed again.
    pub fn attach_photo(
        &self,
        id: Uuid,
        blob: PhotoBlob,
        caption: Option<String>,
    ) -> Result<PhotoRef> {
        if blob.bytes.is_empty() {
            return Err(Error::Validation("photo is empty".into()));
        }
        if !self.read_state().records.contains_key(&id) {
            return Err(Error::NotFound(id));
        }

        let photo_id = Uuid::new_v4();
        let path = self.store.write_blob(id, photo_id, &blob.bytes)?;
        let photo = PhotoRef {
            id: photo_id,
            phase: blob.phase,
            path,
            captured_at: blob.captured_at,
            caption: caption.filter(|c| !c.trim().is_empty()),
            size_bytes: blob.bytes.len() as u64,
        };

        let attached = self.modify(id, |record, _| {
            record.photos.push(photo.clone());
            Ok(())
        });
        match attached {
            Ok(_) => {
                tracing::debug!("Attached photo {} to record {}", photo.id, id);
                Ok(photo)
            }
            Err(e) => {
                if let Err(cleanup) = self.store.remove_blob(&photo.path) {
                    tracing::warn!("Failed to remove orphaned blob {}: {}", photo.path, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Append the reminders the record should have but does not yet
    pub fn schedule_reminders(&self, id: Uuid, config: &ReminderConfig) -> Result<Vec<Reminder>> {
        let (_, planned) = self.modify(id, |record, now| {
            let planned = scheduler::plan_reminders(record, config, now);
            record.reminders.extend(planned.iter().cloned());
            Ok(planned)
        })?;
        if !planned.is_empty() {
            tracing::info!("Scheduled {} reminders for record {}", planned.len(), id);
        }
        Ok(planned)
    }

    /// Purge a record and its photos. The id is never issued again.
    ///
    /// If the photos cannot be removed the record stays deleted and the
    /// failure is reported as a storage error.
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let lock = self.record_lock(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.read_state().records.contains_key(&id) {
            return Err(Error::NotFound(id));
        }

        if !self.store.remove(id)? {
            tracing::warn!("Record {} had no stored document", id);
        }
        {
            let mut state = self.write_state();
            state.records.remove(&id);
            state.index.remove(id);
        }
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        tracing::info!("Deleted record {}", id);

        self.store.remove_blobs(id).map_err(|e| {
            tracing::warn!("Record {} deleted but its photos remain: {}", id, e);
            Error::Storage(format!("photos of deleted record {} could not be removed: {}", id, e))
        })
    }

    /// Summaries matching `filter`, newest first
    pub fn list(&self, filter: &Filter) -> Vec<RecordSummary> {
        self.query(filter, SortOrder::default(), Page::all())
    }

    pub fn query(&self, filter: &Filter, sort: SortOrder, page: Page) -> Vec<RecordSummary> {
        self.read_state().index.query(filter, sort, page)
    }

    /// Full records matching `filter`, newest first
    pub fn records(&self, filter: &Filter) -> Vec<InjuryRecord> {
        let state = self.read_state();
        state
            .index
            .ids(filter)
            .into_iter()
            .filter_map(|id| state.records.get(&id).cloned())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<InjuryRecord> {
        self.records(&Filter::default())
    }

    /// Due reminders across all non-archived records
    pub fn due_reminders(&self, as_of: DateTime<Utc>) -> Vec<DueReminder> {
        scheduler::due_across(self.read_state().records.values(), as_of)
    }

    pub fn statistics(&self, filter: &Filter, granularity: Granularity) -> Statistics {
        stats::compute(&self.records(filter), granularity)
    }

    /// Export the given records. Every id must exist.
    pub fn export(
        &self,
        ids: &[Uuid],
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<Vec<u8>> {
        let records = {
            let state = self.read_state();
            ids.iter()
                .map(|id| state.records.get(id).cloned().ok_or(Error::NotFound(*id)))
                .collect::<Result<Vec<_>>>()?
        };
        export::export_records(&records, format, options, &|path: &str| {
            self.store.read_blob(path)
        })
    }
}
