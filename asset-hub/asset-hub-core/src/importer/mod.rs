//! Bulk identity import.
//!
//! A fixed pool of workers drains a shared job queue; each row is created
//! independently and reports exactly one outcome, so a bad row never aborts
//! its siblings. The coordinator waits for every worker before it
//! aggregates.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::CredentialHasher;
use crate::error::{HubError, Result};
use crate::identity::{create_user, NewUser};
use crate::model::Actor;
use crate::storage::Store;


pub const DEFAULT_WORKERS: usize = 5;

/// Number of columns an import row must carry.
const FIELDS: usize = 4;

/// One candidate user and the 1-based line it came from, header included.
#[derive(Clone, Debug)]
pub struct ImportRecord {
    pub row: usize,
    pub user: NewUser,
}

/// A failed row and the reason reported for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowError {
    pub row: usize,
    pub reason: String,
}

impl RowError {
    fn message(&self) -> String {
        format!("Row {}: {}", self.row, self.reason)
    }
}

#[derive(Debug, Default)]
pub struct ParsedCsv {
    pub records: Vec<ImportRecord>,
    pub malformed: Vec<RowError>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub total_users: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<String>,
}

/// Split a CSV document into candidate records.
///
/// The first line is a header and is skipped. Data row `i` (0-based) is
/// reported as row `i + 2`. Rows with fewer than four fields are kept as
/// failures rather than dropped. Username, email and role are trimmed; the
/// password is taken byte for byte.
pub fn parse_csv(data: &[u8]) -> Result<ParsedCsv> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(HubError::validation("CSV file is empty"));
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let mut parsed = ParsedCsv::default();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| HubError::validation(format!("invalid CSV file: {e}")))?;
        let row = i + 2;
        if record.len() < FIELDS {
            parsed.malformed.push(RowError {
                row,
                reason: format!("expected {FIELDS} fields, found {}", record.len()),
            });
            continue;
        }
        parsed.records.push(ImportRecord {
            row,
            user: NewUser {
                username: record[0].trim().to_string(),
                email: record[1].trim().to_string(),
                password: record[2].to_string(),
                role: record[3].trim().to_string(),
            },
        });
    }
    Ok(parsed)
}

#[derive(Debug)]
struct Outcome {
    row: usize,
    failure: Option<String>,
}

/// Map a creation failure to the reason reported for its row.
fn failure_reason(err: &HubError) -> String {
    match err {
        HubError::Validation(msg) | HubError::Precondition(msg) => msg.clone(),
        HubError::Credential(_) => "failed to hash password".to_string(),
        _ => "failed to create user in database".to_string(),
    }
}

pub struct BulkImporter {
    store: Arc<dyn Store>,
    hasher: Arc<CredentialHasher>,
    workers: usize,
}

impl BulkImporter {
    pub fn new(store: Arc<dyn Store>, hasher: Arc<CredentialHasher>) -> Self {
        Self {
            store,
            hasher,
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Parse and import a CSV upload on behalf of `actor`.
    pub async fn import_csv(
        &self,
        actor: &Actor,
        data: &[u8],
        deadline: Option<Instant>,
    ) -> Result<ImportResult> {
        if !actor.is_manager() {
            return Err(HubError::denied("manager role required"));
        }
        let result = self.import_document(data, deadline).await?;
        info!(
            by = %actor.id,
            total = result.total_users,
            succeeded = result.success_count,
            failed = result.failure_count,
            "import finished"
        );
        Ok(result)
    }

    /// Parse and import a CSV document without an acting user, as the
    /// command line does.
    pub async fn import_document(&self, data: &[u8], deadline: Option<Instant>) -> Result<ImportResult> {
        let ParsedCsv { records, malformed } = parse_csv(data)?;
        let total = records.len() + malformed.len();
        let (success_count, mut failures) = self.run(records, deadline).await;
        failures.extend(malformed);
        Ok(summarize(total, success_count, failures))
    }

    /// Create every record through the worker pool.
    ///
    /// Rows that have not started when `deadline` passes fail with a
    /// deadline reason; rows already done keep their outcome.
    pub async fn import(&self, records: Vec<ImportRecord>, deadline: Option<Instant>) -> ImportResult {
        let total = records.len();
        let (success_count, failures) = self.run(records, deadline).await;
        summarize(total, success_count, failures)
    }

    async fn run(&self, records: Vec<ImportRecord>, deadline: Option<Instant>) -> (usize, Vec<RowError>) {
        let total = records.len();
        let rows: Vec<usize> = records.iter().map(|r| r.row).collect();

        let (jobs, queue) = async_channel::bounded(total.max(1));
        for record in records {
            // The queue holds every job and no receiver has closed yet.
            if jobs.send(record).await.is_err() {
                break;
            }
        }
        jobs.close();

        let (results, mut outcomes) = mpsc::unbounded_channel();
        let mut pool = JoinSet::new();
        for worker in 0..self.workers.min(total.max(1)) {
            let queue = queue.clone();
            let results = results.clone();
            let store = self.store.clone();
            let hasher = self.hasher.clone();
            pool.spawn(async move {
                while let Ok(record) = queue.recv().await {
                    let outcome = process(store.as_ref(), &hasher, record, deadline).await;
                    if results.send(outcome).is_err() {
                        break;
                    }
                }
                debug!(worker, "import worker drained");
            });
        }
        drop(results);

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!("import worker failed: {e}");
            }
        }

        let mut reported = HashSet::with_capacity(total);
        let mut failures = Vec::new();
        let mut success_count = 0;
        while let Some(outcome) = outcomes.recv().await {
            reported.insert(outcome.row);
            match outcome.failure {
                None => success_count += 1,
                Some(reason) => failures.push(RowError {
                    row: outcome.row,
                    reason,
                }),
            }
        }
        failures.extend(
            rows.into_iter()
                .filter(|row| !reported.contains(row))
                .map(|row| RowError {
                    row,
                    reason: "row was not processed".to_string(),
                }),
        );
        (success_count, failures)
    }
}

fn summarize(total: usize, success_count: usize, mut failures: Vec<RowError>) -> ImportResult {
    failures.sort_by_key(|e| e.row);
    ImportResult {
        total_users: total,
        success_count,
        failure_count: failures.len(),
        errors: failures.iter().map(RowError::message).collect(),
    }
}

async fn process(
    store: &dyn Store,
    hasher: &Arc<CredentialHasher>,
    record: ImportRecord,
    deadline: Option<Instant>,
) -> Outcome {
    let row = record.row;
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return Outcome {
            row,
            failure: Some("import deadline exceeded".to_string()),
        };
    }
    match create_user(store, hasher, record.user).await {
        Ok(user) => {
            debug!(row, user = %user.id, "imported user");
            Outcome { row, failure: None }
        }
        Err(e) => {
            if e.is_infrastructure() {
                warn!(row, "import row failed: {e}");
            }
            Outcome {
                row,
                failure: Some(failure_reason(&e)),
            }
        }
    }
}
