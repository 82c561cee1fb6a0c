// 📋 Processing Report - one entry per record, nothing silently dropped
//
// Every record of a structurally accepted submission ends in exactly one
// terminal status: Committed, Quarantined or Failed.

use crate::db::{SubmissionLogEntry, UpsertOutcome};
use crate::record::SubmissionFormat;
use crate::resolver::ResolutionAmbiguity;
use crate::rules::FieldViolation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

// ============================================================================
// RECORD LIFECYCLE
// ============================================================================

/// Per-record state machine
///
///   Parsed → StructurallyAccepted → Clean → Resolved → Committed
///                                 ↘ Quarantined       ↘ Failed
///                                   Clean → Failed (transaction never got going)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Parsed,
    StructurallyAccepted,
    Clean,
    Quarantined,
    Resolved,
    Committed,
    Failed,
}

impl RecordState {
    pub fn can_advance_to(&self, next: RecordState) -> bool {
        use RecordState::*;
        matches!(
            (self, next),
            (Parsed, StructurallyAccepted)
                | (StructurallyAccepted, Clean)
                | (StructurallyAccepted, Quarantined)
                | (Clean, Resolved)
                | (Clean, Failed)
                | (Resolved, Committed)
                | (Resolved, Failed)
        )
    }

    /// Move to `next`, or stay put (and say so) on an illegal transition
    pub fn advance(self, next: RecordState) -> Result<RecordState, String> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(format!("illegal record transition {:?} → {:?}", self, next))
        }
    }

    pub fn terminal_status(&self) -> Option<RecordStatus> {
        match self {
            RecordState::Committed => Some(RecordStatus::Committed),
            RecordState::Quarantined => Some(RecordStatus::Quarantined),
            RecordState::Failed => Some(RecordStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Committed,
    Quarantined,
    Failed,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Committed => write!(f, "committed"),
            RecordStatus::Quarantined => write!(f, "quarantined"),
            RecordStatus::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// RECORD OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub index: usize,
    pub efin: String,
    pub status: RecordStatus,

    /// Set when Quarantined
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<FieldViolation>,

    /// Non-blocking resolution ties, kept even when Committed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ambiguities: Vec<ResolutionAmbiguity>,

    /// Set when Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Transaction attempts made (0 for quarantined records)
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub office_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrollment: Option<UpsertOutcome>,
}

impl RecordOutcome {
    /// Bare outcome for a record whose state machine reached a terminal state
    pub fn settled(index: usize, efin: &str, state: RecordState) -> Result<Self, String> {
        let status = state.terminal_status().ok_or_else(|| {
            format!("record {} stopped in non-terminal state {:?}", index, state)
        })?;

        Ok(RecordOutcome {
            index,
            efin: efin.to_string(),
            status,
            violations: Vec::new(),
            ambiguities: Vec::new(),
            error: None,
            attempts: 0,
            office_id: None,
            enrollment: None,
        })
    }

    pub fn quarantined(index: usize, efin: &str, violations: Vec<FieldViolation>) -> Self {
        RecordOutcome {
            index,
            efin: efin.to_string(),
            status: RecordStatus::Quarantined,
            violations,
            ambiguities: Vec::new(),
            error: None,
            attempts: 0,
            office_id: None,
            enrollment: None,
        }
    }

    pub fn failed(index: usize, efin: &str, error: impl Into<String>, attempts: u32) -> Self {
        RecordOutcome {
            index,
            efin: efin.to_string(),
            status: RecordStatus::Failed,
            violations: Vec::new(),
            ambiguities: Vec::new(),
            error: Some(error.into()),
            attempts,
            office_id: None,
            enrollment: None,
        }
    }
}

// ============================================================================
// PROCESSING REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub run_id: String,
    pub digest: String,
    pub format: SubmissionFormat,
    pub transmitter_id: Option<String>,
    pub processing_year: Option<String>,
    /// Ordered by record index
    pub records: Vec<RecordOutcome>,
    /// Run-level problems that did not change any record's status
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProcessingReport {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn count(&self, status: RecordStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    pub fn committed(&self) -> usize {
        self.count(RecordStatus::Committed)
    }

    pub fn quarantined(&self) -> usize {
        self.count(RecordStatus::Quarantined)
    }

    pub fn failed(&self) -> usize {
        self.count(RecordStatus::Failed)
    }

    pub fn ambiguities(&self) -> usize {
        self.records.iter().map(|r| r.ambiguities.len()).sum()
    }

    pub fn outcome(&self, index: usize) -> Option<&RecordOutcome> {
        self.records.iter().find(|r| r.index == index)
    }

    pub fn is_clean(&self) -> bool {
        self.committed() == self.record_count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Submission {} ({}): {} records, {} committed, {} quarantined, {} failed, {} ambiguities",
            self.run_id,
            self.format,
            self.record_count(),
            self.committed(),
            self.quarantined(),
            self.failed(),
            self.ambiguities()
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Row for the submission log
    pub fn log_entry(&self) -> SubmissionLogEntry {
        SubmissionLogEntry {
            run_id: self.run_id.clone(),
            digest: self.digest.clone(),
            format: self.format.code().to_string(),
            transmitter_id: self.transmitter_id.clone(),
            processing_year: self.processing_year.clone(),
            record_count: self.record_count(),
            committed: self.committed(),
            quarantined: self.quarantined(),
            failed: self.failed(),
            processed_at: self.finished_at,
        }
    }
}
