//! Export of records to portable documents.
//!
//! Three read-only formats:
//! - `csv`: one row per record, for spreadsheet import
//! - `json`: one structured document per record, derived state included
//! - `markdown`: a printable per-record report
//!
//! Photos are referenced by their stored path unless embedding is requested,
//! in which case blob bytes are inlined as base64.

use crate::scheduler::due_reminders;
use crate::types::labelled_enum;
use crate::{Error, HealingStage, InjuryRecord, PhotoRef, Result};
use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
    Markdown,
}

labelled_enum!(ExportFormat, "export format" {
    Csv => "csv",
    Json => "json",
    Markdown => "markdown",
});

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub embed_photos: bool,
    /// Reference time for the due state of reminders
    pub as_of: DateTime<Utc>,
}

impl ExportOptions {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            embed_photos: false,
            as_of,
        }
    }

    pub fn embed_photos(mut self, embed: bool) -> Self {
        self.embed_photos = embed;
        self
    }
}

/// Reads a stored blob by its store-relative path
pub type BlobReader<'a> = &'a dyn Fn(&str) -> Result<Vec<u8>>;

/// A row in the CSV output
#[derive(Debug, Serialize)]
struct CsvRow {
    id: String,
    created_at: String,
    injury_type: String,
    severity: String,
    status: String,
    progress_percent: u8,
    healing_stage: String,
    emergency_level: String,
    body_part: Option<String>,
    open_reminders: usize,
    due_reminders: usize,
    photo_count: usize,
}

impl CsvRow {
    fn new(record: &InjuryRecord, as_of: DateTime<Utc>) -> Self {
        CsvRow {
            id: record.id.to_string(),
            created_at: record.created_at.to_rfc3339(),
            injury_type: record.injury_type.clone(),
            severity: record.severity.to_string(),
            status: record.status.to_string(),
            progress_percent: record.progress_percent(),
            healing_stage: record.healing_stage().to_string(),
            emergency_level: record.emergency_level.to_string(),
            body_part: record.body_part.clone(),
            open_reminders: record.reminders.iter().filter(|r| !r.completed).count(),
            due_reminders: due_reminders(record, as_of).len(),
            photo_count: record.photos.len(),
        }
    }
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    exported_at: DateTime<Utc>,
    record_count: usize,
    records: Vec<RecordDocument<'a>>,
}

#[derive(Serialize)]
struct RecordDocument<'a> {
    #[serde(flatten)]
    record: &'a InjuryRecord,
    healing_stage: HealingStage,
    progress_percent: u8,
    /// Indexes of reminders due at export time
    due_reminders: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedded_photos: Option<BTreeMap<Uuid, String>>,
}

/// Serialize records in the requested format. Records are never modified.
pub fn export_records(
    records: &[InjuryRecord],
    format: ExportFormat,
    options: &ExportOptions,
    read_blob: BlobReader<'_>,
) -> Result<Vec<u8>> {
    let bytes = match format {
        ExportFormat::Csv => to_csv(records, options)?,
        ExportFormat::Json => to_json(records, options, read_blob)?,
        ExportFormat::Markdown => to_markdown(records, options, read_blob)?.into_bytes(),
    };
    tracing::info!(
        "Exported {} records as {} ({} bytes)",
        records.len(),
        format,
        bytes.len()
    );
    Ok(bytes)
}

fn to_csv(records: &[InjuryRecord], options: &ExportOptions) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::new());
    for record in records {
        writer.serialize(CsvRow::new(record, options.as_of))?;
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

fn embedded(photos: &[&PhotoRef], read_blob: BlobReader<'_>) -> Result<BTreeMap<Uuid, String>> {
    photos
        .iter()
        .map(|photo| Ok((photo.id, BASE64_STANDARD.encode(read_blob(&photo.path)?))))
        .collect()
}

fn to_json(
    records: &[InjuryRecord],
    options: &ExportOptions,
    read_blob: BlobReader<'_>,
) -> Result<Vec<u8>> {
    let mut documents = Vec::with_capacity(records.len());
    for record in records {
        let embedded_photos = if options.embed_photos {
            let photos: Vec<&PhotoRef> = record.photos.iter().collect();
            Some(embedded(&photos, read_blob)?)
        } else {
            None
        };
        documents.push(RecordDocument {
            record,
            healing_stage: record.healing_stage(),
            progress_percent: record.progress_percent(),
            due_reminders: due_reminders(record, options.as_of)
                .into_iter()
                .map(|d| d.index)
                .collect(),
            embedded_photos,
        });
    }

    let document = ExportDocument {
        exported_at: options.as_of,
        record_count: documents.len(),
        records: documents,
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

fn to_markdown(
    records: &[InjuryRecord],
    options: &ExportOptions,
    read_blob: BlobReader<'_>,
) -> Result<String> {
    let mut out = String::new();
    for record in records {
        let photos = if options.embed_photos {
            let photos: Vec<&PhotoRef> = record.photos.iter().collect();
            embedded(&photos, read_blob)?
        } else {
            BTreeMap::new()
        };
        render_record(&mut out, record, options, &photos)?;
    }
    Ok(out)
}

/// `photos` holds base64 data for each embedded photo; others are linked by path
fn render_record(
    out: &mut String,
    record: &InjuryRecord,
    options: &ExportOptions,
    photos: &BTreeMap<Uuid, String>,
) -> std::fmt::Result {
    writeln!(out, "# {}\n", record.injury_type)?;
    writeln!(out, "- **Record:** {}", record.id)?;
    writeln!(out, "- **Created:** {}", record.created_at.format("%Y-%m-%d %H:%M UTC"))?;
    writeln!(
        out,
        "- **Severity:** {} ({})",
        record.severity, record.emergency_level
    )?;
    if let Some(part) = &record.body_part {
        writeln!(out, "- **Body part:** {}", part)?;
    }
    if let Some(location) = &record.location_context {
        writeln!(out, "- **Location:** {}", location)?;
    }
    writeln!(
        out,
        "- **Status:** {} / {} ({}%)",
        record.status,
        record.healing_stage(),
        record.progress_percent()
    )?;
    if !record.tags.is_empty() {
        let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
        writeln!(out, "- **Tags:** {}", tags.join(", "))?;
    }
    writeln!(out, "\n{}\n", record.description)?;

    if let Some(analysis) = &record.initial_analysis {
        writeln!(out, "## Initial assessment\n\n{}\n", analysis.analysis_text)?;
        if !analysis.recommendation.is_empty() {
            writeln!(out, "{}\n", analysis.recommendation)?;
        }
    }

    if !record.first_aid_steps.recommended.is_empty() {
        writeln!(out, "## First aid\n")?;
        for (i, step) in record.first_aid_steps.recommended.iter().enumerate() {
            let mark = if record.first_aid_steps.completed.contains(&i) {
                "x"
            } else {
                " "
            };
            writeln!(out, "- [{}] {}", mark, step)?;
        }
        writeln!(out)?;
    }

    if !record.recovery_updates.is_empty() {
        writeln!(out, "## Recovery\n")?;
        writeln!(out, "| When | Progress | Pain | Notes |")?;
        writeln!(out, "|---|---|---|---|")?;
        for update in record.recovery_updates.iter() {
            let flag = if update.regression { " (setback)" } else { "" };
            writeln!(
                out,
                "| {} | {}%{} | {}/10 | {} |",
                update.timestamp.format("%Y-%m-%d %H:%M"),
                update.progress_percent,
                flag,
                update.pain_level,
                update.notes.replace('|', "\\|")
            )?;
        }
        writeln!(out)?;
    }

    if !record.medications.is_empty() {
        writeln!(out, "## Medications\n")?;
        for med in &record.medications {
            writeln!(
                out,
                "- {} {} at {}",
                med.name,
                med.dosage,
                med.taken_at.format("%Y-%m-%d %H:%M")
            )?;
        }
        writeln!(out)?;
    }

    if !record.reminders.is_empty() {
        let due: Vec<usize> = due_reminders(record, options.as_of)
            .into_iter()
            .map(|d| d.index)
            .collect();
        writeln!(out, "## Reminders\n")?;
        for (i, reminder) in record.reminders.iter().enumerate() {
            let state = if reminder.completed {
                "done"
            } else if due.contains(&i) {
                "due"
            } else {
                "scheduled"
            };
            writeln!(
                out,
                "- {} ({}, {}): {}",
                reminder.due_at.format("%Y-%m-%d %H:%M"),
                reminder.kind,
                state,
                reminder.label
            )?;
        }
        writeln!(out)?;
    }

    if !record.notes.is_empty() {
        writeln!(out, "## Notes\n")?;
        for note in record.notes.iter() {
            writeln!(out, "- {}: {}", note.timestamp.format("%Y-%m-%d %H:%M"), note.content)?;
        }
        writeln!(out)?;
    }

    if !record.photos.is_empty() {
        writeln!(out, "## Photos\n")?;
        for photo in record.photos.iter() {
            let caption = photo.caption.as_deref().unwrap_or("photo");
            if let Some(data) = photos.get(&photo.id) {
                writeln!(
                    out,
                    "- {} ({}): [{}](data:application/octet-stream;base64,{})",
                    photo.phase, caption, photo.id, data
                )?;
            } else {
                writeln!(out, "- {} ({}): `{}`", photo.phase, caption, photo.path)?;
            }
        }
        writeln!(out)?;
    }

    writeln!(out, "---\n")
}

/// Write an export to disk atomically
pub fn export_to_file(bytes: &[u8], path: &Path) -> Result<()> {
    crate::store::write_atomic(path, bytes)?;
    tracing::info!("Wrote export to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::build_record;
    use crate::{
        AnalysisResult, EmergencyLevel, InjuryDraft, PhotoPhase, Reminder, ReminderKind, Severity,
    };
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 4, 18, 0, 0).unwrap()
    }

    fn no_blobs(path: &str) -> Result<Vec<u8>> {
        Err(Error::Storage(format!("unexpected blob read of {}", path)))
    }

    fn sample() -> InjuryRecord {
        let analysis = AnalysisResult {
            analysis_text: "Superficial burn".into(),
            severity: Severity::Minor,
            emergency_level: EmergencyLevel::Routine,
            recommendation: "Cool under running water".into(),
            steps: vec!["Cool the burn".into(), "Cover loosely".into()],
        };
        let draft = InjuryDraft::from_analysis("Burn", analysis).with_body_part("Hand");
        let mut record = build_record(Uuid::new_v4(), now() - Duration::days(1), draft);
        record
            .reminders
            .push(Reminder::new(ReminderKind::CheckIn, "check", now() - Duration::hours(1)));
        record.photos.push(PhotoRef {
            id: Uuid::new_v4(),
            phase: PhotoPhase::Before,
            path: format!("photos/{}/p.bin", record.id),
            captured_at: now(),
            caption: Some("first look".into()),
            size_bytes: 3,
        });
        record
    }

    #[test]
    fn test_csv_has_expected_columns() {
        let records = vec![sample(), sample()];
        let bytes =
            export_records(&records, ExportFormat::Csv, &ExportOptions::new(now()), &no_blobs)
                .unwrap();

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let headers = reader.headers().unwrap().clone();
        let expected = [
            "id",
            "created_at",
            "injury_type",
            "severity",
            "status",
            "progress_percent",
            "healing_stage",
        ];
        for (i, name) in expected.iter().enumerate() {
            assert_eq!(&headers[i], *name);
        }
        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][3], "MINOR");
        assert_eq!(&rows[0][6], "INITIAL");
    }

    #[test]
    fn test_json_references_photos_by_path() {
        let record = sample();
        let bytes = export_records(
            std::slice::from_ref(&record),
            ExportFormat::Json,
            &ExportOptions::new(now()),
            &no_blobs,
        )
        .unwrap();

        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let exported = &doc["records"][0];
        assert_eq!(exported["id"], record.id.to_string());
        assert_eq!(exported["healing_stage"], "INITIAL");
        assert_eq!(exported["due_reminders"], serde_json::json!([0]));
        assert!(exported.get("embedded_photos").is_none());
        assert_eq!(
            exported["photos"]["before"][0]["path"],
            record.photos.before[0].path
        );
    }

    #[test]
    fn test_json_embeds_when_asked() {
        let record = sample();
        let photo_id = record.photos.before[0].id;
        let read = |_: &str| -> Result<Vec<u8>> { Ok(b"abc".to_vec()) };
        let options = ExportOptions::new(now()).embed_photos(true);
        let bytes =
            export_records(std::slice::from_ref(&record), ExportFormat::Json, &options, &read)
                .unwrap();

        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            doc["records"][0]["embedded_photos"][photo_id.to_string()],
            "YWJj"
        );
    }

    #[test]
    fn test_markdown_report() {
        let record = sample();
        let bytes = export_records(
            std::slice::from_ref(&record),
            ExportFormat::Markdown,
            &ExportOptions::new(now()),
            &no_blobs,
        )
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("# Burn"));
        assert!(text.contains("- [ ] Cool the burn"));
        assert!(text.contains("(check_in, due): check"));
        assert!(text.contains(&record.photos.before[0].path));
    }

    #[test]
    fn test_markdown_embeds_or_reports_unreadable_blob() {
        let record = sample();
        let options = ExportOptions::new(now()).embed_photos(true);

        let read = |_: &str| -> Result<Vec<u8>> { Ok(b"abc".to_vec()) };
        let bytes =
            export_records(std::slice::from_ref(&record), ExportFormat::Markdown, &options, &read)
                .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("base64,YWJj)"));
        assert!(!text.contains(&record.photos.before[0].path));

        let err = export_records(
            std::slice::from_ref(&record),
            ExportFormat::Markdown,
            &options,
            &no_blobs,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_export_to_file_is_atomic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("out").join("records.csv");
        export_to_file(b"id\n", &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"id\n");
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
