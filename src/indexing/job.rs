//! Resumable bulk reindex job
//!
//! The job walks a snapshot of record groups (one per content class, split
//! per locale when localized) one bounded batch per `process` call. All
//! progress lives in [`ReindexJobState`], which the host persists between
//! calls.

use crate::indexing::error::{IndexingError, IndexingResult};
use crate::indexing::source::RecordSource;
use crate::metrics::{
    record_reindex_progress, REINDEX_BULK_FAILURES_TOTAL, REINDEX_DOCUMENTS_INDEXED_TOTAL,
    REINDEX_RECORDS_SKIPPED_TOTAL,
};
use crate::search::{DocumentBatcher, SearchBackend};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Title shown to operators
pub const JOB_TITLE: &str = "Bulk Search Index";

/// Message appended when the last group is exhausted
pub const DONE_MESSAGE: &str = "Done.";

/// Records of one content class, optionally in one locale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordGroup {
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Record count captured when the job was created
    pub count: u64,
}

impl RecordGroup {
    pub fn new(class: impl Into<String>, locale: Option<String>, count: u64) -> Self {
        Self {
            class: class.into(),
            locale,
            count,
        }
    }
}

impl fmt::Display for RecordGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locale {
            Some(locale) => write!(f, "{} ({})", self.class, locale),
            None => write!(f, "{}", self.class),
        }
    }
}

/// Lifecycle of a reindex job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initialized,
    Running,
    Completed,
}

/// Persisted progress of a reindex job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexJobState {
    pub id: Uuid,
    pub record_groups: Vec<RecordGroup>,
    /// Index into `record_groups` of the group being consumed
    pub current_group_index: usize,
    /// Records considered so far, indexed or skipped
    pub current_step: u64,
    pub total_steps: u64,
    pub is_complete: bool,
    pub messages: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReindexJobState {
    pub fn new(record_groups: Vec<RecordGroup>) -> Self {
        let total: u64 = record_groups.iter().map(|g| g.count).sum();
        Self {
            id: Uuid::new_v4(),
            record_groups,
            current_group_index: 0,
            current_step: 0,
            total_steps: total.max(1),
            is_complete: false,
            messages: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        if self.is_complete {
            JobStatus::Completed
        } else if self.current_step == 0 {
            JobStatus::Initialized
        } else {
            JobStatus::Running
        }
    }

    pub fn current_group(&self) -> Option<&RecordGroup> {
        self.record_groups.get(self.current_group_index)
    }

    /// Steps taken by groups before the current one
    fn steps_before_current(&self) -> u64 {
        self.record_groups
            .iter()
            .take(self.current_group_index)
            .map(|g| g.count)
            .sum()
    }
}

/// Counts for one processed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub indexed: usize,
    pub skipped: usize,
}

/// Walks record groups and bulk-upserts one batch per call
#[derive(Clone)]
pub struct ReindexJob {
    source: Arc<dyn RecordSource>,
    backend: Arc<dyn SearchBackend>,
    batcher: DocumentBatcher,
}

impl ReindexJob {
    pub fn new(
        source: Arc<dyn RecordSource>,
        backend: Arc<dyn SearchBackend>,
        batcher: DocumentBatcher,
    ) -> Self {
        Self {
            source,
            backend,
            batcher,
        }
    }

    pub fn title(&self) -> &'static str {
        JOB_TITLE
    }

    /// Capture record groups and their counts.
    ///
    /// With `locales` empty every class is one group; otherwise each class is
    /// split into one group per locale, in the order given.
    pub async fn snapshot(&self, locales: &[String]) -> IndexingResult<ReindexJobState> {
        let mut groups = Vec::new();

        for class in self.source.content_classes().await? {
            if locales.is_empty() {
                let count = self.source.count(&class, None).await?;
                groups.push(RecordGroup::new(class.clone(), None, count as u64));
                continue;
            }
            for locale in locales {
                let count = self.source.count(&class, Some(locale)).await?;
                groups.push(RecordGroup::new(
                    class.clone(),
                    Some(locale.clone()),
                    count as u64,
                ));
            }
        }

        let state = ReindexJobState::new(groups);
        info!(
            job_id = %state.id,
            groups = state.record_groups.len(),
            total_steps = state.total_steps,
            "Captured reindex snapshot"
        );
        Ok(state)
    }

    /// Process one batch and advance `state`.
    ///
    /// Step counters advance before the bulk upsert, so a failed upsert is not
    /// retried by the next call. A record source failure leaves the counters
    /// untouched.
    pub async fn process(&self, state: &mut ReindexJobState) -> IndexingResult<()> {
        if state.is_complete {
            return Ok(());
        }

        let result = self.update(state).await;
        record_reindex_progress(state.current_step, state.total_steps);

        if let Err(e) = result {
            error!(job_id = %state.id, error = %e, "Reindex batch failed");
            state.messages.push(format!("Exception: {}", exception_detail(&e)));
            return Err(e);
        }

        if state.current_step >= state.total_steps {
            state.messages.push(DONE_MESSAGE.to_string());
            state.is_complete = true;
            state.completed_at = Some(Utc::now());
            info!(job_id = %state.id, total_steps = state.total_steps, "Reindex complete");
        }

        Ok(())
    }

    async fn update(&self, state: &mut ReindexJobState) -> IndexingResult<BatchReport> {
        let group = match state.current_group().cloned() {
            Some(group) => group,
            None => {
                // Nothing left to consume
                state.current_step = state.total_steps;
                return Ok(BatchReport::default());
            }
        };

        let before = state.steps_before_current();
        let offset = state.current_step.saturating_sub(before);
        let remaining = group.count.saturating_sub(offset);
        let limit = remaining.min(self.batcher.limit() as u64);

        let mut records = if limit > 0 {
            self.source
                .fetch(
                    &group.class,
                    group.locale.as_deref(),
                    offset as usize,
                    limit as usize,
                )
                .await?
        } else {
            Vec::new()
        };

        debug!(
            group = %group,
            offset = offset,
            fetched = records.len(),
            "Fetched reindex batch"
        );

        // GUIDs are written back before any step is consumed
        records.truncate(limit as usize);
        for record in records.iter_mut() {
            if self.batcher.is_indexable(record)
                && record.guid.as_deref().map_or(true, str::is_empty)
            {
                self.source.assign_guid(record).await?;
            }
        }

        let now = Utc::now();
        let mut documents = Vec::with_capacity(records.len());
        let mut skipped = 0usize;

        for record in records {
            state.current_step += 1;

            if !self.batcher.is_indexable(&record) {
                skipped += 1;
                continue;
            }

            match self.batcher.document(&record, now) {
                Some(document) => documents.push(document),
                None => skipped += 1,
            }
        }

        // The group shrank since the snapshot; count the missing records as skipped
        let consumed = state.current_step - before;
        if consumed == offset && remaining > 0 {
            warn!(group = %group, missing = remaining, "Record group shorter than snapshot");
            state.current_step += remaining;
            skipped += remaining as usize;
        }

        if state.current_step - before >= group.count {
            state.current_group_index += 1;
        }

        REINDEX_RECORDS_SKIPPED_TOTAL.inc_by(skipped as f64);

        if !documents.is_empty() {
            let response = match self.backend.bulk_upsert(&documents).await {
                Ok(response) => response,
                Err(e) => {
                    REINDEX_BULK_FAILURES_TOTAL.inc();
                    return Err(e.into());
                }
            };
            if let Some(detail) = response.failure_detail() {
                REINDEX_BULK_FAILURES_TOTAL.inc();
                return Err(IndexingError::BulkUpsert { detail });
            }
            REINDEX_DOCUMENTS_INDEXED_TOTAL.inc_by(documents.len() as f64);
        }

        let report = BatchReport {
            indexed: documents.len(),
            skipped,
        };
        let message = format!(
            "Indexed {} records of {}, {} records were skipped",
            report.indexed, group, report.skipped
        );
        info!(
            job_id = %state.id,
            current_step = state.current_step,
            total_steps = state.total_steps,
            "{}",
            message
        );
        state.messages.push(message);

        Ok(report)
    }
}

fn exception_detail(err: &IndexingError) -> String {
    match err {
        IndexingError::BulkUpsert { detail } => detail.clone(),
        other => other.to_string(),
    }
}
