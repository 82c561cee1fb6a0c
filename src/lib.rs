// ERO Enrollment - Core Library
// Ingests enrollment submissions, validates them and reconciles them
// against the office / owner registry. Used by the CLI and the tests.

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod parser;
pub mod reconciliation;
pub mod record;
pub mod report;
pub mod resolver;
pub mod rules;
pub mod similarity;
pub mod structural;

// Re-export commonly used types
pub use config::{IngestConfig, MatchingConfig, RetryPolicy, WorkerConfig};
pub use db::{
    Event, PersistenceGateway, SqliteGateway, StoreCounts, StoreTx,
    SubmissionLogEntry, UpsertOutcome, setup_database, insert_event,
};
pub use entities::{EfinEnrollment, OfficeEntity, OwnerEfinAssociation, OwnerEntity, OwnerRole};
pub use error::{ConfigError, IngestError, ParseError, PersistenceError, StructuralError};
pub use parser::{FlatParser, SubmissionParser, XmlParser, get_parser, parse_submission};
pub use reconciliation::{
    ReconciliationEngine, Reconciled, RegistrySnapshot, conflict_groups, submission_digest,
};
pub use record::{
    EnrollmentRecord, EnrollmentSubmission, OfficeInfo, OwnerInfo, PriorYearInfo,
    SubmissionFormat, SubmissionHeader,
};
pub use report::{ProcessingReport, RecordOutcome, RecordState, RecordStatus};
pub use resolver::{IdentityResolver, MatchStrategy, Resolution, ResolutionAmbiguity};
pub use rules::{FieldRule, FieldValidator, FieldViolation, RuleKind, Section};
pub use structural::{Discrepancy, StructuralValidator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
