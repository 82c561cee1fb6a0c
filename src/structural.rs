// 📐 Structural Validation - submission-level gate
// Header vs body cross-checks. Any discrepancy rejects the whole file
// before a single persistence call is made.

use crate::error::StructuralError;
use crate::record::EnrollmentSubmission;
use serde::Serialize;
use std::fmt;

// ============================================================================
// DISCREPANCY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Discrepancy {
    /// Header is missing a mandatory field
    MissingHeaderField(&'static str),

    /// RecordCount is not a non-negative integer
    InvalidRecordCount(String),

    /// Declared count differs from what was parsed
    RecordCountMismatch { declared: usize, parsed: usize },

    /// A record claims a different ProcessingYear than the header
    ProcessingYearMismatch {
        index: usize,
        header: String,
        record: String,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::MissingHeaderField(field) => {
                write!(f, "header is missing mandatory field {}", field)
            }
            Discrepancy::InvalidRecordCount(raw) => {
                write!(f, "header RecordCount '{}' is not a record count", raw)
            }
            Discrepancy::RecordCountMismatch { declared, parsed } => write!(
                f,
                "header declares {} records but {} were parsed",
                declared, parsed
            ),
            Discrepancy::ProcessingYearMismatch {
                index,
                header,
                record,
            } => write!(
                f,
                "record {} has ProcessingYear '{}' but header declares '{}'",
                index, record, header
            ),
        }
    }
}

// ============================================================================
// STRUCTURAL VALIDATOR
// ============================================================================

pub struct StructuralValidator;

impl StructuralValidator {
    pub fn new() -> Self {
        StructuralValidator
    }

    /// Every discrepancy in the submission, in header-then-body order
    pub fn discrepancies(&self, submission: &EnrollmentSubmission) -> Vec<Discrepancy> {
        let mut found = Vec::new();
        let header = &submission.header;

        match header.record_count.as_deref() {
            None => found.push(Discrepancy::MissingHeaderField("RecordCount")),
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(declared) if declared != submission.records.len() => {
                    found.push(Discrepancy::RecordCountMismatch {
                        declared,
                        parsed: submission.records.len(),
                    });
                }
                Ok(_) => {}
                Err(_) => found.push(Discrepancy::InvalidRecordCount(raw.to_string())),
            },
        }

        if header.transmitter_id.is_none() {
            found.push(Discrepancy::MissingHeaderField("TransmitterId"));
        }

        match header.processing_year.as_deref() {
            None => found.push(Discrepancy::MissingHeaderField("ProcessingYear")),
            Some(year) => {
                for record in &submission.records {
                    if record.processing_year.trim() != year.trim() {
                        found.push(Discrepancy::ProcessingYearMismatch {
                            index: record.index,
                            header: year.to_string(),
                            record: record.processing_year.clone(),
                        });
                    }
                }
            }
        }

        found
    }

    /// Gate: Ok only when the submission is structurally sound
    pub fn validate(&self, submission: &EnrollmentSubmission) -> Result<(), StructuralError> {
        let discrepancies = self.discrepancies(submission);
        if discrepancies.is_empty() {
            Ok(())
        } else {
            Err(StructuralError { discrepancies })
        }
    }
}

impl Default for StructuralValidator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
