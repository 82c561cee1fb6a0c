// 🗄️ Persistence Gateway - transactional relational storage
//
// The engine talks to a `PersistenceGateway`; everything it does for one
// record happens inside a single `transaction(...)` call and is committed
// or rolled back as a unit.
//
// `SqliteGateway` is the production implementation: one connection behind a
// mutex, IMMEDIATE transactions, and ON CONFLICT upserts against UNIQUE keys.

use crate::entities::{EfinEnrollment, OfficeEntity, OwnerEfinAssociation, OwnerEntity, OwnerRole};
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Actor recorded on every audit event written by this crate
pub const EVENT_ACTOR: &str = "ero-ingest";

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SUBMISSION LOG
// ============================================================================

/// One row per structurally accepted submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionLogEntry {
    pub run_id: String,
    /// SHA-256 of the raw submission bytes
    pub digest: String,
    pub format: String,
    pub transmitter_id: Option<String>,
    pub processing_year: Option<String>,
    pub record_count: usize,
    pub committed: usize,
    pub quarantined: usize,
    pub failed: usize,
    pub processed_at: DateTime<Utc>,
}

// ============================================================================
// GATEWAY TRAITS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Operations available inside one record transaction
pub trait StoreTx {
    /// Office the EFIN is bound to, if any
    fn office_for_efin(&self, efin: &str) -> Result<Option<i64>, PersistenceError>;
    fn offices(&self) -> Result<Vec<OfficeEntity>, PersistenceError>;
    fn office(&self, id: i64) -> Result<Option<OfficeEntity>, PersistenceError>;
    fn insert_office(&self, office: &OfficeEntity) -> Result<i64, PersistenceError>;
    fn update_office(&self, office: &OfficeEntity) -> Result<(), PersistenceError>;

    /// Bind (or re-bind) an EFIN to an office. True when the binding changed.
    fn bind_efin(&self, efin: &str, office_id: i64) -> Result<bool, PersistenceError>;

    fn upsert_enrollment(&self, fact: &EfinEnrollment) -> Result<UpsertOutcome, PersistenceError>;

    fn owners(&self) -> Result<Vec<OwnerEntity>, PersistenceError>;
    fn owner(&self, id: i64) -> Result<Option<OwnerEntity>, PersistenceError>;
    fn insert_owner(&self, owner: &OwnerEntity) -> Result<i64, PersistenceError>;
    /// Overwrites descriptive fields; a `None` SSN keeps the stored one
    fn update_owner(&self, owner: &OwnerEntity) -> Result<(), PersistenceError>;

    /// True when the association did not exist yet
    fn upsert_association(&self, association: &OwnerEfinAssociation) -> Result<bool, PersistenceError>;

    fn record_event(&self, event: &Event) -> Result<(), PersistenceError>;
}

/// Transactional storage used by the reconciliation engine
pub trait PersistenceGateway: Send + Sync {
    /// Run `work` in one atomic transaction: commit on Ok, roll back on Err
    fn transaction(
        &self,
        work: &mut dyn FnMut(&dyn StoreTx) -> Result<(), PersistenceError>,
    ) -> Result<(), PersistenceError>;

    fn record_submission(&self, entry: &SubmissionLogEntry) -> Result<(), PersistenceError>;
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<(), PersistenceError> {
    // WAL for crash recovery (in-memory databases silently keep "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Offices + EFIN authority
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS office (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            efin TEXT,
            name TEXT NOT NULL,
            primary_contact_first TEXT NOT NULL,
            primary_contact_last TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            fax_number TEXT NOT NULL,
            email TEXT NOT NULL,
            address1 TEXT NOT NULL,
            address2 TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            zip TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS office_efin (
            efin TEXT PRIMARY KEY,
            office_id INTEGER NOT NULL REFERENCES office(id),
            bound_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Enrollment facts: one per (efin, tax_year)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS efin_enrollment (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            efin TEXT NOT NULL,
            tax_year INTEGER NOT NULL,
            received_date TEXT NOT NULL,
            master_efin TEXT NOT NULL,
            transmitter_id TEXT NOT NULL,
            prior_bank TEXT NOT NULL,
            prior_client INTEGER NOT NULL,
            UNIQUE(efin, tax_year)
        )",
        [],
    )?;

    // ==========================================================================
    // Owners + associations
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS owner (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            ssn TEXT,
            date_of_birth TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            email TEXT NOT NULL,
            address1 TEXT NOT NULL,
            address2 TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            zip TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS owner_efin_association (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL REFERENCES owner(id),
            efin TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('owner', 'efin-owner')),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(owner_id, efin, role)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Submission log (written after each accepted run)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS submission_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            digest TEXT NOT NULL,
            format TEXT NOT NULL,
            transmitter_id TEXT,
            processing_year TEXT,
            record_count INTEGER NOT NULL,
            committed INTEGER NOT NULL,
            quarantined INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            processed_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_office_efin_office ON office_efin(office_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_owner_ssn ON owner(ssn)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submission_digest ON submission_log(digest)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const OFFICE_COLUMNS: &str = "id, efin, name, primary_contact_first, primary_contact_last,
    phone_number, fax_number, email, address1, address2, city, state, zip,
    created_at, updated_at";

fn office_from_row(row: &Row) -> rusqlite::Result<OfficeEntity> {
    Ok(OfficeEntity {
        id: row.get(0)?,
        efin: row.get(1)?,
        name: row.get(2)?,
        primary_contact_first: row.get(3)?,
        primary_contact_last: row.get(4)?,
        phone_number: row.get(5)?,
        fax_number: row.get(6)?,
        email: row.get(7)?,
        address1: row.get(8)?,
        address2: row.get(9)?,
        city: row.get(10)?,
        state: row.get(11)?,
        zip: row.get(12)?,
        created_at: parse_timestamp(row, 13)?,
        updated_at: parse_timestamp(row, 14)?,
    })
}

const OWNER_COLUMNS: &str = "id, first_name, last_name, ssn, date_of_birth, phone_number,
    email, address1, address2, city, state, zip, created_at, updated_at";

fn owner_from_row(row: &Row) -> rusqlite::Result<OwnerEntity> {
    Ok(OwnerEntity {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        ssn: row.get(3)?,
        date_of_birth: row.get(4)?,
        phone_number: row.get(5)?,
        email: row.get(6)?,
        address1: row.get(7)?,
        address2: row.get(8)?,
        city: row.get(9)?,
        state: row.get(10)?,
        zip: row.get(11)?,
        created_at: parse_timestamp(row, 12)?,
        updated_at: parse_timestamp(row, 13)?,
    })
}

fn load_offices(conn: &Connection) -> rusqlite::Result<Vec<OfficeEntity>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM office ORDER BY id", OFFICE_COLUMNS))?;
    let offices = stmt
        .query_map([], office_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(offices)
}

fn load_owners(conn: &Connection) -> rusqlite::Result<Vec<OwnerEntity>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM owner ORDER BY id", OWNER_COLUMNS))?;
    let owners = stmt
        .query_map([], owner_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(owners)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<(), PersistenceError> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

fn event_from_row(row: &Row) -> rusqlite::Result<Event> {
    let data_json: String = row.get(5)?;
    Ok(Event {
        event_id: row.get(0)?,
        timestamp: parse_timestamp(row, 1)?,
        event_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        data: serde_json::from_str(&data_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        actor: row.get(6)?,
    })
}

// ============================================================================
// SQLITE TRANSACTION
// ============================================================================

/// `StoreTx` over an open rusqlite transaction
pub struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl StoreTx for SqliteTx<'_> {
    fn office_for_efin(&self, efin: &str) -> Result<Option<i64>, PersistenceError> {
        let office_id = self
            .conn
            .query_row(
                "SELECT office_id FROM office_efin WHERE efin = ?1",
                params![efin],
                |row| row.get(0),
            )
            .optional()?;
        Ok(office_id)
    }

    fn offices(&self) -> Result<Vec<OfficeEntity>, PersistenceError> {
        Ok(load_offices(self.conn)?)
    }

    fn office(&self, id: i64) -> Result<Option<OfficeEntity>, PersistenceError> {
        let office = self
            .conn
            .query_row(
                &format!("SELECT {} FROM office WHERE id = ?1", OFFICE_COLUMNS),
                params![id],
                office_from_row,
            )
            .optional()?;
        Ok(office)
    }

    fn insert_office(&self, office: &OfficeEntity) -> Result<i64, PersistenceError> {
        self.conn.execute(
            "INSERT INTO office (
                efin, name, primary_contact_first, primary_contact_last,
                phone_number, fax_number, email, address1, address2,
                city, state, zip, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                office.efin,
                office.name,
                office.primary_contact_first,
                office.primary_contact_last,
                office.phone_number,
                office.fax_number,
                office.email,
                office.address1,
                office.address2,
                office.city,
                office.state,
                office.zip,
                office.created_at.to_rfc3339(),
                office.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_office(&self, office: &OfficeEntity) -> Result<(), PersistenceError> {
        let changed = self.conn.execute(
            "UPDATE office SET
                name = ?2, primary_contact_first = ?3, primary_contact_last = ?4,
                phone_number = ?5, fax_number = ?6, email = ?7,
                address1 = ?8, address2 = ?9, city = ?10, state = ?11, zip = ?12,
                updated_at = ?13
             WHERE id = ?1",
            params![
                office.id,
                office.name,
                office.primary_contact_first,
                office.primary_contact_last,
                office.phone_number,
                office.fax_number,
                office.email,
                office.address1,
                office.address2,
                office.city,
                office.state,
                office.zip,
                office.updated_at.to_rfc3339(),
            ],
        )?;

        if changed == 0 {
            return Err(PersistenceError::Permanent(format!(
                "office {} does not exist",
                office.id
            )));
        }
        Ok(())
    }

    fn bind_efin(&self, efin: &str, office_id: i64) -> Result<bool, PersistenceError> {
        let current = self.office_for_efin(efin)?;
        if current == Some(office_id) {
            return Ok(false);
        }

        self.conn.execute(
            "INSERT INTO office_efin (efin, office_id, bound_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(efin) DO UPDATE SET
                office_id = excluded.office_id,
                bound_at = excluded.bound_at",
            params![efin, office_id, Utc::now().to_rfc3339()],
        )?;
        Ok(true)
    }

    fn upsert_enrollment(&self, fact: &EfinEnrollment) -> Result<UpsertOutcome, PersistenceError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM efin_enrollment WHERE efin = ?1 AND tax_year = ?2)",
            params![fact.efin, fact.tax_year],
            |row| row.get(0),
        )?;

        self.conn.execute(
            "INSERT INTO efin_enrollment (
                efin, tax_year, received_date, master_efin, transmitter_id,
                prior_bank, prior_client
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(efin, tax_year) DO UPDATE SET
                received_date = excluded.received_date,
                master_efin = excluded.master_efin,
                transmitter_id = excluded.transmitter_id,
                prior_bank = excluded.prior_bank,
                prior_client = excluded.prior_client",
            params![
                fact.efin,
                fact.tax_year,
                fact.received_at.to_rfc3339(),
                fact.master_efin,
                fact.transmitter_id,
                fact.prior_bank,
                fact.prior_client,
            ],
        )?;

        Ok(if exists {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    fn owners(&self) -> Result<Vec<OwnerEntity>, PersistenceError> {
        Ok(load_owners(self.conn)?)
    }

    fn owner(&self, id: i64) -> Result<Option<OwnerEntity>, PersistenceError> {
        let owner = self
            .conn
            .query_row(
                &format!("SELECT {} FROM owner WHERE id = ?1", OWNER_COLUMNS),
                params![id],
                owner_from_row,
            )
            .optional()?;
        Ok(owner)
    }

    fn insert_owner(&self, owner: &OwnerEntity) -> Result<i64, PersistenceError> {
        self.conn.execute(
            "INSERT INTO owner (
                first_name, last_name, ssn, date_of_birth, phone_number, email,
                address1, address2, city, state, zip, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                owner.first_name,
                owner.last_name,
                owner.ssn,
                owner.date_of_birth,
                owner.phone_number,
                owner.email,
                owner.address1,
                owner.address2,
                owner.city,
                owner.state,
                owner.zip,
                owner.created_at.to_rfc3339(),
                owner.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_owner(&self, owner: &OwnerEntity) -> Result<(), PersistenceError> {
        let changed = self.conn.execute(
            "UPDATE owner SET
                first_name = ?2, last_name = ?3, ssn = COALESCE(?4, ssn),
                date_of_birth = ?5, phone_number = ?6, email = ?7,
                address1 = ?8, address2 = ?9, city = ?10, state = ?11, zip = ?12,
                updated_at = ?13
             WHERE id = ?1",
            params![
                owner.id,
                owner.first_name,
                owner.last_name,
                owner.ssn,
                owner.date_of_birth,
                owner.phone_number,
                owner.email,
                owner.address1,
                owner.address2,
                owner.city,
                owner.state,
                owner.zip,
                owner.updated_at.to_rfc3339(),
            ],
        )?;

        if changed == 0 {
            return Err(PersistenceError::Permanent(format!(
                "owner {} does not exist",
                owner.id
            )));
        }
        Ok(())
    }

    fn upsert_association(&self, association: &OwnerEfinAssociation) -> Result<bool, PersistenceError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO owner_efin_association (owner_id, efin, role)
             VALUES (?1, ?2, ?3)",
            params![association.owner_id, association.efin, association.role.as_str()],
        )?;
        Ok(inserted == 1)
    }

    fn record_event(&self, event: &Event) -> Result<(), PersistenceError> {
        insert_event(self.conn, event)
    }
}

// ============================================================================
// SQLITE GATEWAY
// ============================================================================

/// Row counts per table, mostly for reports and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub offices: usize,
    pub efin_bindings: usize,
    pub enrollments: usize,
    pub owners: usize,
    pub associations: usize,
    pub events: usize,
    pub submissions: usize,
}

impl StoreCounts {
    /// True when no reconciliation data has been written
    pub fn is_empty(&self) -> bool {
        self.offices == 0
            && self.efin_bindings == 0
            && self.enrollments == 0
            && self.owners == 0
            && self.associations == 0
            && self.events == 0
            && self.submissions == 0
    }
}

pub struct SqliteGateway {
    conn: Mutex<Connection>,
}

impl SqliteGateway {
    /// Open (or create) a database file and make sure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(250))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        setup_database(&conn)?;
        Ok(SqliteGateway {
            conn: Mutex::new(conn),
        })
    }

    pub fn counts(&self) -> Result<StoreCounts, PersistenceError> {
        let conn = self.conn.lock();
        let count = |table: &str| -> Result<usize, PersistenceError> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        };

        Ok(StoreCounts {
            offices: count("office")?,
            efin_bindings: count("office_efin")?,
            enrollments: count("efin_enrollment")?,
            owners: count("owner")?,
            associations: count("owner_efin_association")?,
            events: count("events")?,
            submissions: count("submission_log")?,
        })
    }

    pub fn offices(&self) -> Result<Vec<OfficeEntity>, PersistenceError> {
        Ok(load_offices(&self.conn.lock())?)
    }

    pub fn owners(&self) -> Result<Vec<OwnerEntity>, PersistenceError> {
        Ok(load_owners(&self.conn.lock())?)
    }

    /// Office currently bound to an EFIN
    pub fn office_for_efin(&self, efin: &str) -> Result<Option<OfficeEntity>, PersistenceError> {
        let conn = self.conn.lock();
        let office = conn
            .query_row(
                &format!(
                    "SELECT {} FROM office WHERE id = (SELECT office_id FROM office_efin WHERE efin = ?1)",
                    OFFICE_COLUMNS
                ),
                params![efin],
                office_from_row,
            )
            .optional()?;
        Ok(office)
    }

    pub fn enrollments(&self) -> Result<Vec<EfinEnrollment>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT efin, tax_year, received_date, master_efin, transmitter_id,
                    prior_bank, prior_client
             FROM efin_enrollment
             ORDER BY efin, tax_year",
        )?;

        let facts = stmt
            .query_map([], |row| {
                Ok(EfinEnrollment {
                    efin: row.get(0)?,
                    tax_year: row.get(1)?,
                    received_at: parse_timestamp(row, 2)?,
                    master_efin: row.get(3)?,
                    transmitter_id: row.get(4)?,
                    prior_bank: row.get(5)?,
                    prior_client: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(facts)
    }

    pub fn associations(&self) -> Result<Vec<OwnerEfinAssociation>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT owner_id, efin, role FROM owner_efin_association
             ORDER BY owner_id, efin, role",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let role: String = row.get(2)?;
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, role))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(owner_id, efin, role)| {
                let role = OwnerRole::from_code(&role).ok_or_else(|| {
                    PersistenceError::Permanent(format!("unknown owner role '{}'", role))
                })?;
                Ok(OwnerEfinAssociation {
                    owner_id,
                    efin,
                    role,
                })
            })
            .collect()
    }

    /// Audit events of one type, oldest first
    pub fn events_of_type(&self, event_type: &str) -> Result<Vec<Event>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE event_type = ?1
             ORDER BY id",
        )?;

        let events = stmt
            .query_map(params![event_type], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    pub fn submission_log(&self) -> Result<Vec<SubmissionLogEntry>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT run_id, digest, format, transmitter_id, processing_year,
                    record_count, committed, quarantined, failed, processed_at
             FROM submission_log
             ORDER BY id",
        )?;

        let entries = stmt
            .query_map([], |row| {
                Ok(SubmissionLogEntry {
                    run_id: row.get(0)?,
                    digest: row.get(1)?,
                    format: row.get(2)?,
                    transmitter_id: row.get(3)?,
                    processing_year: row.get(4)?,
                    record_count: row.get::<_, i64>(5)? as usize,
                    committed: row.get::<_, i64>(6)? as usize,
                    quarantined: row.get::<_, i64>(7)? as usize,
                    failed: row.get::<_, i64>(8)? as usize,
                    processed_at: parse_timestamp(row, 9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

impl PersistenceGateway for SqliteGateway {
    fn transaction(
        &self,
        work: &mut dyn FnMut(&dyn StoreTx) -> Result<(), PersistenceError>,
    ) -> Result<(), PersistenceError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = work(&SqliteTx { conn: &tx });
        match outcome {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(err) => {
                debug!(error = %err, "rolling back record transaction");
                tx.rollback()?;
                Err(err)
            }
        }
    }

    fn record_submission(&self, entry: &SubmissionLogEntry) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO submission_log (
                run_id, digest, format, transmitter_id, processing_year,
                record_count, committed, quarantined, failed, processed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.run_id,
                entry.digest,
                entry.format,
                entry.transmitter_id,
                entry.processing_year,
                entry.record_count as i64,
                entry.committed as i64,
                entry.quarantined as i64,
                entry.failed as i64,
                entry.processed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
