//! Ticket ingestion.
//!
//! Reads exported tickets and free-form documents, splits every ticket
//! into typed fragments and upserts them into the fragment store.
//!
//! # Inputs
//!
//! | Extension | Parsed as |
//! |-----------|-----------|
//! | `.json` | array of ticket objects, `{"issues": [...]}`, or one object |
//! | `.xlsx` | first worksheet; first row holds the column headers |
//! | `.csv` | comma-separated export; first record holds the column headers |
//! | `.docx`, `.txt`, `.md` | one document ticket keyed `DOC_<STEM>` |
//!
//! Column headers from Jira CSV, Excel and JSON exports (`Issue key`,
//! `Custom field (Root causes)`, ...) and snake_case field names are both
//! accepted; matching ignores case and surrounding whitespace.
//!
//! # Fragments
//!
//! | Kind | Built from |
//! |------|------------|
//! | `summary` | title |
//! | `description` | description, type of problems |
//! | `steps` | immediate fix remark |
//! | `resolution` | resolution, type of resolution |
//! | `root_cause` | root causes |
//! | `dependency_reason` | permanent fix required/remark/target date, immediate fix target date |
//!
//! Empty values and the literal `nan` left behind by spreadsheet tools are
//! dropped; a fragment with no remaining text is not stored.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use ticket_harness_core::embedding::Embedder;
use ticket_harness_core::models::{Fragment, FragmentKind};

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, ConfiguredEmbedder};
use crate::extract;
use crate::sqlite_store::{DocumentRecord, FragmentEmbedding, SqliteFragmentStore};

/// Status given to tickets built from free-form documents.
pub const DOCUMENT_STATUS: &str = "DOCUMENT";

/// One ticket, as exported from the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TicketRecord {
    pub issue_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_of_problems: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_causes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immediate_fix_remark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immediate_fix_target_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immediate_fix_closure_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanent_fix_required: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanent_fix_remark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanent_fix_target_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_occurrence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_nature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_classification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_of_resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_source: Option<String>,
}

/// Map an export column header or field name to a [`TicketRecord`] field.
pub fn canonical_field(header: &str) -> Option<&'static str> {
    let h = header.trim().to_ascii_lowercase();
    let field = match h.as_str() {
        "issue key" | "key" | "issue_key" => "issue_key",
        "issue type" | "issuetype" | "issue_type" => "issue_type",
        "summary" | "title" => "title",
        "description" => "description",
        "status" => "status",
        "assignee" => "assignee",
        "reporter" => "reporter",
        "resolution" => "resolution",
        "created" | "created_date" => "created_date",
        "updated" | "updated_date" => "updated_date",
        "due date" | "duedate" | "resolved_date" => "resolved_date",
        "custom field (component)" | "affected_component" => "affected_component",
        "custom field (type of problems)" | "type_of_problems" => "type_of_problems",
        "root_causes" => "root_causes",
        "custom field (root causes)" | "root_cause" => "root_cause",
        "custom field (immediate fix remark)" | "immediate_fix_remark" => "immediate_fix_remark",
        "custom field (immediate fix target date)" | "immediate_fix_target_date" => {
            "immediate_fix_target_date"
        }
        "custom field (immediate fix closure date)" | "immediate_fix_closure_date" => {
            "immediate_fix_closure_date"
        }
        "custom field (permanent fix required)" | "permanent_fix_required" => {
            "permanent_fix_required"
        }
        "custom field (permanent fix remark)" | "permanent_fix_remark" => "permanent_fix_remark",
        "custom field (permanent fix target date)" | "permanent_fix_target_date" => {
            "permanent_fix_target_date"
        }
        "custom field (issue occurrence)" | "issue_occurrence" => "issue_occurrence",
        "custom field (issue nature)" | "issue_nature" => "issue_nature",
        "custom field (issue origin)" | "issue_origin" => "issue_origin",
        "custom field (issue classification)" | "issue_classification" => "issue_classification",
        "custom field (type of resolution)" | "type_of_resolution" => "type_of_resolution",
        "custom field (request source)" | "request_source" => "request_source",
        _ => return None,
    };
    Some(field)
}

/// Join the usable parts of a fragment, one per line.
fn safe_text(parts: &[Option<&String>]) -> String {
    parts
        .iter()
        .flatten()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl TicketRecord {
    /// Set a field by canonical name. Blank values are ignored; unknown
    /// names return `false`.
    pub fn set(&mut self, field: &str, value: String) -> bool {
        let value = value.trim().to_string();
        if field == "issue_key" {
            if !value.is_empty() {
                self.issue_key = value;
            }
            return true;
        }
        let slot = match field {
            "issue_type" => &mut self.issue_type,
            "title" => &mut self.title,
            "description" => &mut self.description,
            "status" => &mut self.status,
            "assignee" => &mut self.assignee,
            "reporter" => &mut self.reporter,
            "resolution" => &mut self.resolution,
            "created_date" => &mut self.created_date,
            "updated_date" => &mut self.updated_date,
            "resolved_date" => &mut self.resolved_date,
            "affected_component" => &mut self.affected_component,
            "type_of_problems" => &mut self.type_of_problems,
            "root_causes" => &mut self.root_causes,
            "root_cause" => &mut self.root_cause,
            "immediate_fix_remark" => &mut self.immediate_fix_remark,
            "immediate_fix_target_date" => &mut self.immediate_fix_target_date,
            "immediate_fix_closure_date" => &mut self.immediate_fix_closure_date,
            "permanent_fix_required" => &mut self.permanent_fix_required,
            "permanent_fix_remark" => &mut self.permanent_fix_remark,
            "permanent_fix_target_date" => &mut self.permanent_fix_target_date,
            "issue_occurrence" => &mut self.issue_occurrence,
            "issue_nature" => &mut self.issue_nature,
            "issue_origin" => &mut self.issue_origin,
            "issue_classification" => &mut self.issue_classification,
            "type_of_resolution" => &mut self.type_of_resolution,
            "request_source" => &mut self.request_source,
            _ => return false,
        };
        if !value.is_empty() {
            *slot = Some(value);
        }
        true
    }

    /// A free-form document as a single ticket.
    pub fn document(file_name: &str, text: String) -> Self {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        TicketRecord {
            issue_key: format!("DOC_{}", stem.replace(' ', "_").to_uppercase()),
            title: Some(file_name.to_string()),
            description: Some(text),
            status: Some(DOCUMENT_STATUS.to_string()),
            ..TicketRecord::default()
        }
    }

    /// Typed fragments of this ticket, skipping empty ones.
    pub fn fragments(&self) -> Vec<Fragment> {
        let parts: [(FragmentKind, String); 6] = [
            (FragmentKind::Summary, safe_text(&[self.title.as_ref()])),
            (
                FragmentKind::Description,
                safe_text(&[self.description.as_ref(), self.type_of_problems.as_ref()]),
            ),
            (
                FragmentKind::Steps,
                safe_text(&[self.immediate_fix_remark.as_ref()]),
            ),
            (
                FragmentKind::Resolution,
                safe_text(&[self.resolution.as_ref(), self.type_of_resolution.as_ref()]),
            ),
            (
                FragmentKind::RootCause,
                safe_text(&[self.root_causes.as_ref(), self.root_cause.as_ref()]),
            ),
            (
                FragmentKind::DependencyReason,
                safe_text(&[
                    self.permanent_fix_required.as_ref(),
                    self.permanent_fix_remark.as_ref(),
                    self.permanent_fix_target_date.as_ref(),
                    self.immediate_fix_target_date.as_ref(),
                ]),
            ),
        ];

        parts
            .into_iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(kind, text)| Fragment::new(self.issue_key.as_str(), kind, text))
            .collect()
    }
}

/// Text form of a JSON export value. Tracker objects such as
/// `{"name": "Done"}` collapse to their display name.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => ["name", "value", "displayName"]
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_str()).map(str::to_string))
            .or_else(|| serde_json::to_string(value).ok()),
        Value::Array(_) => serde_json::to_string(value).ok(),
    }
}

fn record_from_object(object: &serde_json::Map<String, Value>) -> TicketRecord {
    let mut record = TicketRecord::default();
    apply_object(&mut record, object);
    record
}

fn apply_object(record: &mut TicketRecord, object: &serde_json::Map<String, Value>) {
    for (key, value) in object {
        if key == "fields" {
            if let Value::Object(fields) = value {
                apply_object(record, fields);
                continue;
            }
        }
        if let (Some(field), Some(text)) = (canonical_field(key), value_text(value)) {
            record.set(field, text);
        }
    }
}

/// Tickets from a JSON export.
pub fn parse_json_tickets(bytes: &[u8]) -> Result<Vec<TicketRecord>> {
    let root: Value = serde_json::from_slice(bytes).context("Invalid JSON ticket export")?;
    let items: Vec<&Value> = match &root {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("issues") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![&root],
        },
        _ => bail!("JSON ticket export must be an array or an object"),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| item.as_object().map(record_from_object))
        .collect())
}

/// Tickets from spreadsheet rows whose first row is the header.
pub fn tickets_from_rows(rows: &[Vec<String>]) -> Vec<TicketRecord> {
    let Some((header, body)) = rows.split_first() else {
        return Vec::new();
    };
    let columns: Vec<Option<&'static str>> = header.iter().map(|h| canonical_field(h)).collect();

    body.iter()
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| {
            let mut record = TicketRecord::default();
            for (field, cell) in columns.iter().zip(row.iter()) {
                if let Some(field) = field {
                    record.set(field, cell.clone());
                }
            }
            record
        })
        .collect()
}

/// Parse a CSV export. Quoted fields may span lines; ragged rows are
/// accepted and missing trailing cells read as empty.
pub fn parse_csv_tickets(bytes: &[u8]) -> Result<Vec<TicketRecord>> {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed CSV record {}", i + 1))?;
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }
    Ok(tickets_from_rows(&rows))
}

/// Parse one input file into tickets, dispatching on its extension.
pub fn load_tickets(path: &Path) -> Result<Vec<TicketRecord>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "json" => parse_json_tickets(&bytes),
        "csv" => parse_csv_tickets(&bytes)
            .with_context(|| format!("Failed to read CSV export {}", path.display())),
        "xlsx" => {
            let rows = extract::xlsx_rows(&bytes)
                .with_context(|| format!("Failed to read spreadsheet {}", path.display()))?;
            Ok(tickets_from_rows(&rows))
        }
        "docx" => {
            let text = extract::docx_text(&bytes)
                .with_context(|| format!("Failed to read document {}", path.display()))?;
            Ok(vec![TicketRecord::document(&file_name, text)])
        }
        "txt" | "md" => {
            let text = String::from_utf8(bytes)
                .with_context(|| format!("{} is not valid UTF-8", path.display()))?;
            Ok(vec![TicketRecord::document(&file_name, text)])
        }
        other => bail!(
            "Unsupported file type '.{}' for {}. Use .json, .csv, .xlsx, .docx, .txt or .md.",
            other,
            path.display()
        ),
    }
}

/// Stable hash of a fragment's identity and text.
pub fn content_hash(fragment: &Fragment) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fragment.document_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(fragment.kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(fragment.text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Counters reported after an ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub files: usize,
    pub tickets: usize,
    pub skipped_tickets: usize,
    pub fragments_written: usize,
    pub embedded: usize,
    pub unchanged: usize,
    pub removed: u64,
}

impl IngestSummary {
    fn absorb(&mut self, other: IngestSummary) {
        self.files += other.files;
        self.tickets += other.tickets;
        self.skipped_tickets += other.skipped_tickets;
        self.fragments_written += other.fragments_written;
        self.embedded += other.embedded;
        self.unchanged += other.unchanged;
        self.removed += other.removed;
    }
}

struct Pending {
    fragment: Fragment,
    hash: String,
}

/// Writes tickets into a [`SqliteFragmentStore`], embedding new or changed
/// fragments when an embedder is available.
pub struct Ingestor<'a> {
    store: &'a SqliteFragmentStore,
    embedder: Option<&'a ConfiguredEmbedder>,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a SqliteFragmentStore, embedder: Option<&'a ConfiguredEmbedder>) -> Self {
        Self { store, embedder }
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestSummary> {
        let tickets = load_tickets(path)?;
        let source_name = path.display().to_string();
        let mut summary = self.ingest_tickets(&tickets, &source_name).await?;
        summary.files = 1;
        info!(
            file = %source_name,
            tickets = summary.tickets,
            written = summary.fragments_written,
            "ingested file"
        );
        Ok(summary)
    }

    pub async fn ingest_tickets(
        &self,
        tickets: &[TicketRecord],
        source_name: &str,
    ) -> Result<IngestSummary> {
        let now = chrono::Utc::now().timestamp();
        let mut summary = IngestSummary::default();
        let mut pending: Vec<Pending> = Vec::new();

        for ticket in tickets {
            if ticket.issue_key.trim().is_empty() {
                summary.skipped_tickets += 1;
                warn!(source = source_name, "skipping ticket without an issue key");
                continue;
            }

            self.store
                .upsert_document(&DocumentRecord {
                    document_key: ticket.issue_key.clone(),
                    title: ticket.title.clone(),
                    status: ticket.status.clone(),
                    source_name: source_name.to_string(),
                    metadata_json: serde_json::to_string(ticket)?,
                    updated_at: now,
                })
                .await?;
            summary.tickets += 1;

            let fragments = ticket.fragments();
            let kinds: Vec<FragmentKind> = fragments.iter().map(|f| f.kind.clone()).collect();
            summary.removed += self
                .store
                .remove_stale_kinds(&ticket.issue_key, &kinds)
                .await?;

            for fragment in fragments {
                let hash = content_hash(&fragment);
                let existing = self
                    .store
                    .content_hash(&fragment.document_key, &fragment.kind)
                    .await?;
                let up_to_date = match existing {
                    Some((stored, has_vector)) => {
                        stored == hash && (has_vector || self.embedder.is_none())
                    }
                    None => false,
                };
                if up_to_date {
                    summary.unchanged += 1;
                    continue;
                }
                pending.push(Pending { fragment, hash });
            }
        }

        let vectors = self.embed_pending(&pending).await;
        let model = self.embedder.map(|e| e.model_name());

        for (i, item) in pending.iter().enumerate() {
            let embedding = match (&vectors, model) {
                (Some(vectors), Some(model)) => Some(FragmentEmbedding {
                    vector: &vectors[i],
                    model,
                }),
                _ => None,
            };
            if embedding.is_some() {
                summary.embedded += 1;
            }
            self.store
                .upsert_fragment(&item.fragment, &item.hash, embedding, now)
                .await?;
            summary.fragments_written += 1;
        }

        Ok(summary)
    }

    /// Embed pending fragment texts. Failure is logged and yields `None`;
    /// fragments are then stored without vectors.
    async fn embed_pending(&self, pending: &[Pending]) -> Option<Vec<Vec<f32>>> {
        let embedder = self.embedder?;
        if pending.is_empty() {
            return None;
        }
        let texts: Vec<String> = pending.iter().map(|p| p.fragment.text.clone()).collect();
        match embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                debug!(count = vectors.len(), "embedded fragments");
                Some(vectors)
            }
            Err(e) => {
                warn!(error = %e, count = texts.len(), "embedding failed, storing fragments without vectors");
                None
            }
        }
    }
}

/// `tkt ingest`: ingest each path and print a summary.
pub async fn run_ingest(config: &Config, paths: &[PathBuf]) -> Result<IngestSummary> {
    let pool = db::connect(config).await?;
    let store = SqliteFragmentStore::new(pool);
    let embedder = create_embedder(&config.embedding)?;
    let ingestor = Ingestor::new(&store, embedder.as_ref());

    let mut total = IngestSummary::default();
    for path in paths {
        let summary = ingestor.ingest_file(path).await?;
        total.absorb(summary);
    }

    println!("Ingest complete");
    println!("  files:              {}", total.files);
    println!("  tickets:            {}", total.tickets);
    if total.skipped_tickets > 0 {
        println!("  skipped (no key):   {}", total.skipped_tickets);
    }
    println!("  fragments written:  {}", total.fragments_written);
    println!("  embedded:           {}", total.embedded);
    println!("  unchanged:          {}", total.unchanged);
    if total.removed > 0 {
        println!("  removed (stale):    {}", total.removed);
    }

    store.pool().close().await;
    Ok(total)
}
