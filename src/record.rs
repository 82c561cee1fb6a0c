// 📄 Enrollment submission model
// Transient values owned by one processing run, discarded after commit/failure

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SUBMISSION FORMAT
// ============================================================================

/// Declared format of a submission. Never sniffed from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionFormat {
    Flat,
    Xml,
}

impl SubmissionFormat {
    pub fn code(&self) -> &'static str {
        match self {
            SubmissionFormat::Flat => "flat",
            SubmissionFormat::Xml => "xml",
        }
    }
}

impl fmt::Display for SubmissionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SubmissionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(SubmissionFormat::Flat),
            "xml" => Ok(SubmissionFormat::Xml),
            other => Err(format!("unknown submission format '{}'", other)),
        }
    }
}

// ============================================================================
// HEADER + SUBMISSION
// ============================================================================

/// Header metadata as found in the file. Fields stay raw so the structural
/// validator can report exactly what was (or was not) declared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionHeader {
    pub record_count: Option<String>,
    pub transmitter_id: Option<String>,
    pub processing_year: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentSubmission {
    pub format: SubmissionFormat,
    pub header: SubmissionHeader,
    pub records: Vec<EnrollmentRecord>,
}

impl EnrollmentSubmission {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

// ============================================================================
// RECORD
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfficeInfo {
    pub office_name: String,
    pub primary_contact_first: String,
    pub primary_contact_last: String,
    pub phone_number: String,
    pub fax_number: String,
    pub email: String,
    pub address1: String,
    pub address2: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl OfficeInfo {
    /// Street + locality, the address half of the office identity
    pub fn address_line(&self) -> String {
        join_non_empty(&[&self.address1, &self.city, &self.state, &self.zip])
    }
}

/// Used for both OwnerInformation and EFINOwnerInfo - same shape, different role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerInfo {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub email: String,
    pub address1: String,
    pub address2: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub ssn: String,
    pub date_of_birth: String,
}

impl OwnerInfo {
    pub fn full_name(&self) -> String {
        join_non_empty(&[&self.first_name, &self.last_name])
    }

    /// No name at all - nothing to resolve
    pub fn is_blank(&self) -> bool {
        self.first_name.trim().is_empty() && self.last_name.trim().is_empty()
    }

    /// SSN with formatting stripped, None when absent
    pub fn ssn_digits(&self) -> Option<String> {
        let digits: String = self.ssn.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            None
        } else {
            Some(digits)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorYearInfo {
    pub bank: String,
    pub client_of_yours_last_year: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    /// Position in the submission (0-based)
    pub index: usize,
    /// Line (flat) or byte offset (xml) where the record starts
    pub source_line: usize,

    pub master_efin: String,
    pub efin: String,
    pub transmitter_id: String,
    pub processing_year: String,
    pub office: OfficeInfo,
    pub owner: OwnerInfo,
    pub efin_owner: OwnerInfo,
    pub prior_year: PriorYearInfo,
    pub transaction_date: String,
}

impl EnrollmentRecord {
    /// TransactionDate as an absolute timestamp
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        parse_transaction_date(&self.transaction_date)
    }

    /// Tax year as a number (validated as numeric before persistence)
    pub fn tax_year(&self) -> Option<i32> {
        self.processing_year.trim().parse().ok()
    }
}

/// Convert a submission date string to UTC.
///
/// Source timestamps carry no zone ("2016-01-15T10:30:00"); a `Z` is
/// appended before RFC 3339 parsing. Date-only values mean midnight UTC.
pub fn parse_transaction_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{}Z", raw)) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }

    // Date-only: YYYY-MM-DD or MM/DD/YYYY
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    None
}

fn join_non_empty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
