//! Reminder scheduling.
//!
//! Everything here is a pure function of record state and an `as_of` time.
//! There is no timer: whoever renders reminders polls `due_reminders` (or
//! `due_across`) at whatever cadence suits it.

use crate::config::ReminderConfig;
use crate::{
    EmergencyLevel, Error, InjuryRecord, RecordStatus, Reminder, ReminderKind, Result, Severity,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Longest dose frequency or check-in interval, in hours (one year)
pub const MAX_FREQUENCY_HOURS: u32 = 24 * 365;
pub const MAX_CHECK_IN_COUNT: u32 = 100;
pub const MAX_FOLLOW_UP_DAYS: u32 = 10 * 365;

/// A reminder that is due, with the position needed to complete it
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DueReminder {
    pub record_id: Uuid,
    pub index: usize,
    pub reminder: Reminder,
}

/// Open reminders with `due_at <= as_of`, earliest first
pub fn due_reminders(record: &InjuryRecord, as_of: DateTime<Utc>) -> Vec<DueReminder> {
    let mut due: Vec<DueReminder> = record
        .reminders
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.completed && r.due_at <= as_of)
        .map(|(index, r)| DueReminder {
            record_id: record.id,
            index,
            reminder: r.clone(),
        })
        .collect();
    due.sort_by_key(|d| d.reminder.due_at);
    due
}

/// Due reminders over many records, earliest first.
///
/// Archived records are skipped: they can no longer be completed.
pub fn due_across<'a>(
    records: impl IntoIterator<Item = &'a InjuryRecord>,
    as_of: DateTime<Utc>,
) -> Vec<DueReminder> {
    let mut due: Vec<DueReminder> = records
        .into_iter()
        .filter(|r| !r.is_archived())
        .flat_map(|r| due_reminders(r, as_of))
        .collect();
    due.sort_by(|a, b| {
        a.reminder
            .due_at
            .cmp(&b.reminder.due_at)
            .then_with(|| a.record_id.cmp(&b.record_id))
            .then_with(|| a.index.cmp(&b.index))
    });
    due
}

/// Mark a reminder completed. Completing it again is a no-op.
pub fn complete_reminder(
    record: &mut InjuryRecord,
    index: usize,
    now: DateTime<Utc>,
) -> Result<()> {
    let count = record.reminders.len();
    let reminder = record.reminders.get_mut(index).ok_or_else(|| {
        Error::Validation(format!(
            "reminder {} does not exist (record has {})",
            index, count
        ))
    })?;

    if !reminder.completed {
        reminder.completed = true;
        reminder.completed_at = Some(now);
    }
    Ok(())
}

/// Propose reminders the record should have but does not yet.
///
/// - check-ins on the configured cadence after the latest update (or creation),
///   only those still in the future and only while the injury is not healed
/// - the next dose of every medication taken on a fixed frequency
/// - one follow-up for severe or urgent injuries without a doctor visit
pub fn plan_reminders(
    record: &InjuryRecord,
    config: &ReminderConfig,
    now: DateTime<Utc>,
) -> Vec<Reminder> {
    if record.is_archived() {
        return Vec::new();
    }

    let mut planned = Vec::new();

    if matches!(record.status, RecordStatus::Active | RecordStatus::Healing) {
        let anchor = record
            .recovery_updates
            .last()
            .map(|u| u.timestamp)
            .unwrap_or(record.created_at);
        let interval = i64::from(config.check_in_interval_hours.max(1));

        for step in 1..=i64::from(config.check_in_count) {
            let Some(due_at) = interval
                .checked_mul(step)
                .and_then(|hours| after(anchor, Duration::try_hours(hours)))
            else {
                break;
            };
            if due_at > now {
                planned.push(Reminder::new(
                    ReminderKind::CheckIn,
                    format!("Recovery check-in: {}", record.injury_type),
                    due_at,
                ));
            }
        }
    }

    // Latest dose per medication name
    let mut latest: HashMap<&str, &crate::Medication> = HashMap::new();
    for med in &record.medications {
        let entry = latest.entry(med.name.as_str()).or_insert(med);
        if med.taken_at >= entry.taken_at {
            *entry = med;
        }
    }
    let mut doses: Vec<_> = latest.into_values().collect();
    doses.sort_by(|a, b| a.name.cmp(&b.name));
    for med in doses {
        let next_dose = med
            .frequency_hours
            .and_then(|hours| after(med.taken_at, Duration::try_hours(i64::from(hours))));
        match next_dose {
            Some(due_at) => planned.push(Reminder::new(
                ReminderKind::Medication,
                format!("Next dose: {} {}", med.name, med.dosage),
                due_at,
            )),
            None if med.frequency_hours.is_some() => {
                tracing::warn!("Skipping dose reminder for {}: due time out of range", med.name);
            }
            None => {}
        }
    }

    let needs_follow_up = record.severity == Severity::Severe
        || record.emergency_level >= EmergencyLevel::Urgent;
    let has_follow_up = record
        .reminders
        .iter()
        .any(|r| r.kind == ReminderKind::FollowUp);
    if needs_follow_up && !has_follow_up && !record.follow_up.doctor_visit {
        let days = Duration::try_days(i64::from(config.follow_up_after_days));
        if let Some(due_at) = after(record.created_at, days) {
            planned.push(Reminder::new(
                ReminderKind::FollowUp,
                "Follow up with a doctor",
                due_at,
            ));
        }
    }

    planned.retain(|candidate| {
        !record.reminders.iter().any(|existing| {
            existing.kind == candidate.kind
                && existing.due_at == candidate.due_at
                && existing.label == candidate.label
        })
    });
    planned
}

/// `start + delta`, or `None` when either is outside chrono's range
fn after(start: DateTime<Utc>, delta: Option<Duration>) -> Option<DateTime<Utc>> {
    delta.and_then(|delta| start.checked_add_signed(delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::build_record;
    use crate::{InjuryDraft, Medication};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn record(severity: Severity) -> InjuryRecord {
        let draft = InjuryDraft::new("Burn", severity, EmergencyLevel::Routine);
        build_record(Uuid::new_v4(), now() - Duration::hours(2), draft)
    }

    #[test]
    fn test_due_then_completed_then_noop() {
        let mut r = record(Severity::Minor);
        r.reminders
            .push(Reminder::new(ReminderKind::Custom, "Change dressing", now() - Duration::hours(1)));

        let due = due_reminders(&r, now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].index, 0);

        complete_reminder(&mut r, 0, now()).unwrap();
        assert!(due_reminders(&r, now()).is_empty());

        let snapshot = r.clone();
        complete_reminder(&mut r, 0, now() + Duration::hours(1)).unwrap();
        assert_eq!(r, snapshot);
    }

    #[test]
    fn test_due_is_monotonic_in_time() {
        let mut r = record(Severity::Minor);
        for h in [3, -2, 1, -5] {
            r.reminders
                .push(Reminder::new(ReminderKind::CheckIn, "check", now() + Duration::hours(h)));
        }

        let mut previous: Vec<usize> = Vec::new();
        for h in -6..=4 {
            let due: Vec<usize> = due_reminders(&r, now() + Duration::hours(h))
                .into_iter()
                .map(|d| d.index)
                .collect();
            assert!(previous.iter().all(|i| due.contains(i)));
            previous = due;
        }
        assert_eq!(previous.len(), 4);
    }

    #[test]
    fn test_due_sorted_by_due_at() {
        let mut r = record(Severity::Minor);
        r.reminders
            .push(Reminder::new(ReminderKind::CheckIn, "later", now() - Duration::hours(1)));
        r.reminders
            .push(Reminder::new(ReminderKind::CheckIn, "earlier", now() - Duration::hours(3)));

        let labels: Vec<_> = due_reminders(&r, now())
            .into_iter()
            .map(|d| d.reminder.label)
            .collect();
        assert_eq!(labels, vec!["earlier", "later"]);
    }

    #[test]
    fn test_complete_out_of_range() {
        let mut r = record(Severity::Minor);
        assert!(matches!(
            complete_reminder(&mut r, 3, now()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_due_across_skips_archived() {
        let mut open = record(Severity::Minor);
        open.reminders
            .push(Reminder::new(ReminderKind::Custom, "a", now() - Duration::hours(1)));
        let mut archived = open.clone();
        archived.id = Uuid::new_v4();
        archived.status = RecordStatus::Archived;

        let due = due_across([&open, &archived], now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].record_id, open.id);
    }

    #[test]
    fn test_plan_check_ins_and_doses() {
        let mut r = record(Severity::Minor);
        r.medications.push(Medication {
            name: "Ibuprofen".into(),
            dosage: "200mg".into(),
            taken_at: now() - Duration::hours(1),
            frequency_hours: Some(6),
        });
        r.medications.push(Medication {
            name: "Antiseptic".into(),
            dosage: "thin layer".into(),
            taken_at: now(),
            frequency_hours: None,
        });

        let config = ReminderConfig::default();
        let planned = plan_reminders(&r, &config, now());

        let check_ins = planned.iter().filter(|p| p.kind == ReminderKind::CheckIn).count();
        assert_eq!(check_ins, 3);
        let doses: Vec<_> = planned
            .iter()
            .filter(|p| p.kind == ReminderKind::Medication)
            .collect();
        assert_eq!(doses.len(), 1);
        assert_eq!(doses[0].due_at, now() + Duration::hours(5));
        assert!(planned.iter().all(|p| p.kind != ReminderKind::FollowUp));

        // Planning again after adding them proposes nothing new
        r.reminders.extend(planned);
        assert!(plan_reminders(&r, &config, now()).is_empty());
    }

    #[test]
    fn test_plan_follow_up_for_severe() {
        let r = record(Severity::Severe);
        let planned = plan_reminders(&r, &ReminderConfig::default(), now());
        let follow_up = planned
            .iter()
            .find(|p| p.kind == ReminderKind::FollowUp)
            .unwrap();
        assert_eq!(follow_up.due_at, r.created_at + Duration::days(7));
    }

    #[test]
    fn test_plan_skips_out_of_range_due_times() {
        let mut r = record(Severity::Severe);
        r.medications.push(Medication {
            name: "Mystery".into(),
            dosage: "1 tab".into(),
            taken_at: now(),
            frequency_hours: Some(u32::MAX),
        });
        let config = ReminderConfig {
            check_in_interval_hours: u32::MAX,
            check_in_count: u32::MAX,
            follow_up_after_days: u32::MAX,
        };

        // Every candidate lands past the last representable date
        assert!(plan_reminders(&r, &config, now()).is_empty());

        // A sane cadence still plans around the unplannable dose
        let planned = plan_reminders(&r, &ReminderConfig::default(), now());
        assert!(planned.iter().all(|p| p.kind != ReminderKind::Medication));
        assert!(planned.iter().any(|p| p.kind == ReminderKind::FollowUp));
    }

    #[test]
    fn test_plan_nothing_for_healed_minor() {
        let mut r = record(Severity::Minor);
        r.status = RecordStatus::Healed;
        assert!(plan_reminders(&r, &ReminderConfig::default(), now()).is_empty());
    }
}
