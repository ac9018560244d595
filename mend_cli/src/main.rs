use chrono::{Duration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use mend_core::export::export_to_file;
use mend_core::*;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "mend")]
#[command(about = "Injury health records and recovery tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new injury
    Log {
        /// Kind of injury (cut, burn, sprain, ...)
        #[arg(long = "type")]
        injury_type: String,

        #[arg(long)]
        description: Option<String>,

        /// MINOR, MODERATE or SEVERE (taken from --analysis if omitted)
        #[arg(long)]
        severity: Option<Severity>,

        /// ROUTINE, URGENT or EMERGENCY (taken from --analysis if omitted)
        #[arg(long)]
        emergency: Option<EmergencyLevel>,

        #[arg(long)]
        body_part: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long = "tag")]
        tags: Vec<String>,

        /// JSON file holding the analysis result
        #[arg(long)]
        analysis: Option<PathBuf>,
    },

    /// Show one record
    Show {
        id: Uuid,

        #[arg(long)]
        json: bool,
    },

    /// List records, newest first
    List {
        #[command(flatten)]
        filter: FilterArgs,

        /// newest, oldest, severity or status
        #[arg(long, default_value = "newest")]
        sort: SortOrder,

        /// Zero-based page number
        #[arg(long, default_value_t = 0)]
        page: usize,

        #[arg(long)]
        page_size: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Add a recovery update
    Progress {
        id: Uuid,

        /// Pain level, 0-10
        #[arg(long)]
        pain: u8,

        /// Progress, 0-100
        #[arg(long)]
        progress: u8,

        #[arg(long, default_value = "")]
        notes: String,

        /// Attached photo this update refers to
        #[arg(long)]
        photo: Option<Uuid>,

        /// Document a setback (progress may drop)
        #[arg(long)]
        regression: bool,
    },

    /// Toggle a first-aid step
    Step { id: Uuid, index: usize },

    /// Append a note
    Note { id: Uuid, text: String },

    /// Log a medication dose
    Med {
        id: Uuid,

        #[arg(long)]
        name: String,

        #[arg(long)]
        dosage: String,

        /// Hours between doses
        #[arg(long)]
        every: Option<u32>,
    },

    /// Change status (ACTIVE, HEALING, HEALED, ARCHIVED)
    Status { id: Uuid, status: RecordStatus },

    /// Add or remove tags
    Tag {
        id: Uuid,

        #[arg(long)]
        add: Vec<String>,

        #[arg(long)]
        remove: Vec<String>,
    },

    /// Record professional follow-up care
    FollowUp {
        id: Uuid,

        #[arg(long)]
        visited: bool,

        /// Visit date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Attach a photo file
    Photo {
        id: Uuid,

        file: PathBuf,

        /// before, during or after
        #[arg(long, default_value = "before")]
        phase: PhotoPhase,

        #[arg(long)]
        caption: Option<String>,
    },

    /// Add a reminder, or plan the usual ones with --plan
    Remind {
        id: Uuid,

        /// Schedule check-ins, next doses and follow-ups
        #[arg(long, conflicts_with_all = ["label", "in_hours"])]
        plan: bool,

        #[arg(long, default_value = "custom")]
        kind: ReminderKind,

        #[arg(long, required_unless_present = "plan")]
        label: Option<String>,

        /// Hours from now; negative for already due
        #[arg(long, allow_hyphen_values = true, required_unless_present = "plan")]
        in_hours: Option<i64>,
    },

    /// Show reminders that are due
    Due {
        #[arg(long)]
        json: bool,
    },

    /// Mark a reminder completed
    Done { id: Uuid, index: usize },

    /// Show statistics
    Stats {
        #[command(flatten)]
        filter: FilterArgs,

        /// day, week or month
        #[arg(long, default_value = "week")]
        granularity: Granularity,

        #[arg(long)]
        json: bool,
    },

    /// Export records (all of them when no ids are given)
    Export {
        ids: Vec<Uuid>,

        /// csv, json or markdown (defaults to the configured format)
        #[arg(long)]
        format: Option<ExportFormat>,

        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Inline photo bytes as base64
        #[arg(long)]
        embed_photos: bool,
    },

    /// Permanently delete a record and its photos
    Delete { id: Uuid },
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    severity: Option<Severity>,

    #[arg(long)]
    status: Option<RecordStatus>,

    #[arg(long)]
    body_part: Option<String>,

    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Created on or after (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Created on or before (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    #[arg(long)]
    search: Option<String>,
}

impl From<FilterArgs> for Filter {
    fn from(args: FilterArgs) -> Self {
        Filter {
            severity: args.severity,
            status: args.status,
            body_part: args.body_part,
            tags: args.tags,
            date_from: args.from,
            date_to: args.to,
            search: args.search,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    mend_core::logging::init_with_level(mend_core::logging::verbosity_level(cli.verbose));

    // Determine data directory
    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let repo = Repository::open(FileStore::open(data_dir)?)?;

    match cli.command {
        Commands::Log {
            injury_type,
            description,
            severity,
            emergency,
            body_part,
            location,
            tags,
            analysis,
        } => {
            let mut draft = match analysis {
                Some(path) => {
                    let json = std::fs::read_to_string(path)?;
                    InjuryDraft::from_analysis(injury_type, AnalysisResult::from_json(&json)?)
                }
                None => {
                    let severity = severity.ok_or_else(|| {
                        Error::Validation("--severity is required without --analysis".into())
                    })?;
                    InjuryDraft::new(
                        injury_type,
                        severity,
                        emergency.unwrap_or(EmergencyLevel::Routine),
                    )
                }
            };
            if let Some(severity) = severity {
                draft.severity = severity;
            }
            if let Some(emergency) = emergency {
                draft.emergency_level = emergency;
            }
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            if let Some(part) = body_part {
                draft = draft.with_body_part(part);
            }
            if let Some(location) = location {
                draft = draft.with_location(location);
            }
            let record = repo.create(draft.with_tags(tags))?;
            println!("✓ Recorded {}", record.id);
            print_steps(&record);
            Ok(())
        }
        Commands::Show { id, json } => {
            let record = repo.get(id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                display_record(&record);
            }
            Ok(())
        }
        Commands::List {
            filter,
            sort,
            page,
            page_size,
            json,
        } => {
            let page = match page_size {
                Some(size) => Page::number(page, size),
                None => Page::all(),
            };
            let summaries = repo.query(&filter.into(), sort, page);
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("No records.");
            } else {
                for s in &summaries {
                    println!(
                        "{}  {}  {:<12} {:<9} {:<8} {:>3}%  {}",
                        s.id,
                        s.created_at.format("%Y-%m-%d"),
                        s.injury_type,
                        s.severity,
                        s.status,
                        s.progress_percent,
                        s.body_part.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }
        Commands::Progress {
            id,
            pain,
            progress,
            notes,
            photo,
            regression,
        } => {
            let mut request = UpdateRequest::new(Utc::now(), pain, progress).with_notes(notes);
            if let Some(photo) = photo {
                request = request.with_photo(photo);
            }
            if regression {
                request = request.regression();
            }
            let (record, stage) = repo.add_update(id, request)?;
            println!("✓ Progress {}% ({})", record.progress_percent(), stage);
            if let Some(took) = record.recovery_duration() {
                println!("  Healed after {} days", took.num_days());
            }
            Ok(())
        }
        Commands::Step { id, index } => {
            let record = repo.update(id, Mutation::ToggleStep(index))?;
            print_steps(&record);
            Ok(())
        }
        Commands::Note { id, text } => {
            repo.update(id, Mutation::AppendNote(text))?;
            println!("✓ Note added");
            Ok(())
        }
        Commands::Med {
            id,
            name,
            dosage,
            every,
        } => {
            repo.update(
                id,
                Mutation::AppendMedication {
                    name,
                    dosage,
                    taken_at: Utc::now(),
                    frequency_hours: every,
                },
            )?;
            println!("✓ Medication logged");
            Ok(())
        }
        Commands::Status { id, status } => {
            let record = repo.update(id, Mutation::ChangeStatus(status))?;
            println!("✓ Status {}", record.status);
            Ok(())
        }
        Commands::Tag { id, add, remove } => {
            let record = repo.update(id, Mutation::ChangeTags { add, remove })?;
            let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
            println!("✓ Tags: {}", tags.join(", "));
            Ok(())
        }
        Commands::FollowUp {
            id,
            visited,
            date,
            notes,
        } => {
            let follow_up = FollowUpCare {
                doctor_visit: visited,
                visit_date: date,
                notes,
            };
            repo.update(id, Mutation::SetFollowUp(follow_up))?;
            println!("✓ Follow-up saved");
            Ok(())
        }
        Commands::Photo {
            id,
            file,
            phase,
            caption,
        } => {
            let blob = PhotoBlob {
                bytes: std::fs::read(&file)?,
                captured_at: Utc::now(),
                phase,
            };
            let photo = repo.attach_photo(id, blob, caption)?;
            println!("✓ Photo {} stored at {}", photo.id, photo.path);
            Ok(())
        }
        Commands::Remind {
            id,
            plan,
            kind,
            label,
            in_hours,
        } => {
            if plan {
                let planned = repo.schedule_reminders(id, &config.reminders)?;
                println!("✓ Scheduled {} reminders", planned.len());
                for reminder in &planned {
                    println!(
                        "  {}  {:<10} {}",
                        reminder.due_at.format("%Y-%m-%d %H:%M"),
                        reminder.kind,
                        reminder.label
                    );
                }
            } else {
                let hours = in_hours.unwrap_or(0);
                let due_at = Duration::try_hours(hours)
                    .and_then(|offset| Utc::now().checked_add_signed(offset))
                    .ok_or_else(|| {
                        Error::Validation(format!("--in-hours {} is out of range", hours))
                    })?;
                let label = label.unwrap_or_default();
                repo.update(id, Mutation::AddReminder(Reminder::new(kind, label, due_at)))?;
                println!("✓ Reminder set for {}", due_at.format("%Y-%m-%d %H:%M"));
            }
            Ok(())
        }
        Commands::Due { json } => {
            let due = repo.due_reminders(Utc::now());
            if json {
                println!("{}", serde_json::to_string_pretty(&due)?);
            } else if due.is_empty() {
                println!("Nothing due.");
            } else {
                for d in &due {
                    println!(
                        "{} #{}  {}  {:<10} {}",
                        d.record_id,
                        d.index,
                        d.reminder.due_at.format("%Y-%m-%d %H:%M"),
                        d.reminder.kind,
                        d.reminder.label
                    );
                }
            }
            Ok(())
        }
        Commands::Done { id, index } => {
            repo.mark_reminder_completed(id, index)?;
            println!("✓ Reminder completed");
            Ok(())
        }
        Commands::Stats {
            filter,
            granularity,
            json,
        } => {
            let stats = repo.statistics(&filter.into(), granularity);
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                display_stats(&stats);
            }
            Ok(())
        }
        Commands::Export {
            ids,
            format,
            output,
            embed_photos,
        } => {
            let ids = if ids.is_empty() {
                repo.list(&Filter::new()).into_iter().map(|s| s.id).collect()
            } else {
                ids
            };
            let format = format.unwrap_or(config.export.default_format);
            let options =
                ExportOptions::new(Utc::now()).embed_photos(embed_photos || config.export.embed_photos);
            let bytes = repo.export(&ids, format, &options)?;

            match output {
                Some(path) => {
                    export_to_file(&bytes, &path)?;
                    println!("✓ Exported {} records to {}", ids.len(), path.display());
                }
                None => print!("{}", String::from_utf8_lossy(&bytes)),
            }
            Ok(())
        }
        Commands::Delete { id } => {
            repo.delete(id)?;
            println!("✓ Deleted {}", id);
            Ok(())
        }
    }
}

fn print_steps(record: &InjuryRecord) {
    let steps = &record.first_aid_steps;
    for (i, step) in steps.recommended.iter().enumerate() {
        let mark = if steps.completed.contains(&i) { "x" } else { " " };
        println!("  [{}] {}. {}", mark, i, step);
    }
    if let Some(done) = steps.completed_at.filter(|_| steps.is_complete()) {
        println!("  All steps done (first ticked {})", done.format("%Y-%m-%d %H:%M"));
    }
}

fn display_record(record: &InjuryRecord) {
    println!("\n{} ({})", record.injury_type, record.id);
    println!(
        "  Created:   {} ({} days ago)",
        record.created_at.format("%Y-%m-%d %H:%M"),
        record.age_days(Utc::now())
    );
    println!("  Severity:  {} / {}", record.severity, record.emergency_level);
    if let Some(part) = &record.body_part {
        println!("  Body part: {}", part);
    }
    println!(
        "  Status:    {} ({}, {}%)",
        record.status,
        record.healing_stage(),
        record.progress_percent()
    );
    if let Some(pain) = record.pain_level() {
        println!("  Pain:      {}/10", pain);
    }
    println!("  {}", record.description);

    if let Some(analysis) = &record.initial_analysis {
        println!("\n  {}", analysis.analysis_text);
    }
    print_steps(record);

    for update in record.recovery_updates.iter() {
        println!(
            "  {}  {:>3}%  pain {}/10  {}",
            update.timestamp.format("%Y-%m-%d"),
            update.progress_percent,
            update.pain_level,
            update.notes
        );
    }
    for (i, reminder) in record.reminders.iter().enumerate() {
        let state = if reminder.completed { "done" } else { "open" };
        println!(
            "  #{} {} {} ({})",
            i,
            reminder.due_at.format("%Y-%m-%d %H:%M"),
            reminder.label,
            state
        );
    }
    println!();
}

fn display_stats(stats: &Statistics) {
    println!("Records: {}", stats.total_records);
    println!("  Active: {}", stats.active_injuries);
    println!("  Healed: {}", stats.healed_injuries);
    if let Some(part) = &stats.most_common_body_part {
        println!("  Most common body part: {}", part);
    }
    if let (Some(avg), Some(median)) = (stats.average_recovery(), stats.median_recovery()) {
        println!(
            "  Recovery: {:.1} days average, {:.1} days median",
            avg.num_hours() as f64 / 24.0,
            median.num_hours() as f64 / 24.0
        );
    }
    for (severity, count) in &stats.by_severity {
        println!("  {:<9} {}", severity, count);
    }
    for bucket in &stats.frequency {
        println!("  {}  {}", bucket.start, bucket.count);
    }
}
