// End-to-end ingestion: bytes in, registry rows out

use ero_enrollment::{
    EfinEnrollment, EnrollmentRecord, Event, IngestConfig, IngestError, OfficeEntity,
    OfficeInfo, OwnerEfinAssociation, OwnerEntity, OwnerInfo, OwnerRole, PersistenceError,
    PersistenceGateway, ProcessingReport, ReconciliationEngine, RecordStatus, SqliteGateway,
    StoreTx, SubmissionFormat, SubmissionLogEntry, UpsertOutcome,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const XML_FIXTURE: &str = include_str!("fixtures/enrollments.xml");
const FLAT_FIXTURE: &str = include_str!("fixtures/enrollments.txt");

// ============================================================================
// HELPERS
// ============================================================================

fn fast_config() -> IngestConfig {
    let mut config = IngestConfig::default();
    config.retry.base_backoff_ms = 1;
    config
}

fn engine_with(gateway: Arc<SqliteGateway>) -> ReconciliationEngine {
    ReconciliationEngine::new(fast_config(), gateway)
}

fn new_engine() -> (ReconciliationEngine, Arc<SqliteGateway>) {
    let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
    (engine_with(gateway.clone()), gateway)
}

/// A record that passes every field rule
fn record(efin: &str, office_name: &str, address1: &str) -> EnrollmentRecord {
    EnrollmentRecord {
        master_efin: "100001".to_string(),
        efin: efin.to_string(),
        transmitter_id: "55555".to_string(),
        processing_year: "2016".to_string(),
        transaction_date: "2016-01-15T10:30:00".to_string(),
        office: OfficeInfo {
            office_name: office_name.to_string(),
            primary_contact_first: "Pat".to_string(),
            primary_contact_last: "Lee".to_string(),
            email: "office@example.com".to_string(),
            address1: address1.to_string(),
            city: "Dallas".to_string(),
            state: "TX".to_string(),
            zip: "75201".to_string(),
            ..Default::default()
        },
        owner: owner("Pat", "Lee", ""),
        ..Default::default()
    }
}

fn owner(first: &str, last: &str, ssn: &str) -> OwnerInfo {
    OwnerInfo {
        first_name: first.to_string(),
        last_name: last.to_string(),
        phone_number: "2145550100".to_string(),
        address1: "12 Elm St".to_string(),
        city: "Dallas".to_string(),
        zip: "75202".to_string(),
        ssn: ssn.to_string(),
        ..Default::default()
    }
}

fn element(name: &str, value: &str) -> String {
    let escaped = value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!("<{0}>{1}</{0}>", name, escaped)
}

fn owner_xml(group: &str, info: &OwnerInfo) -> String {
    format!(
        "<{0}>{1}{2}{3}{4}{5}{6}{7}</{0}>",
        group,
        element("FirstName", &info.first_name),
        element("LastName", &info.last_name),
        element("PhoneNumber", &info.phone_number),
        element("Address1", &info.address1),
        element("City", &info.city),
        element("Zip", &info.zip),
        element("SSN", &info.ssn),
    )
}

/// Serialize records as an XML submission declaring `declared` records
fn to_xml(records: &[EnrollmentRecord], declared: usize) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<EnrollmentCollection>");
    xml.push_str(&format!(
        "<Header>{}{}{}</Header>",
        element("RecordCount", &declared.to_string()),
        element("TransmitterId", "55555"),
        element("ProcessingYear", "2016"),
    ));

    for r in records {
        xml.push_str("<Enrollment>");
        xml.push_str(&element("MasterEfin", &r.master_efin));
        xml.push_str(&element("EFIN", &r.efin));
        xml.push_str(&element("TransmitterId", &r.transmitter_id));
        xml.push_str(&element("ProcessingYear", &r.processing_year));
        xml.push_str(&format!(
            "<OfficeInfo>{}{}{}{}{}{}{}{}</OfficeInfo>",
            element("OfficeName", &r.office.office_name),
            element("PrimaryContactFirst", &r.office.primary_contact_first),
            element("PrimaryContactLast", &r.office.primary_contact_last),
            element("Email", &r.office.email),
            element("Address1", &r.office.address1),
            element("City", &r.office.city),
            element("State", &r.office.state),
            element("Zip", &r.office.zip),
        ));
        xml.push_str(&owner_xml("OwnerInformation", &r.owner));
        if !r.efin_owner.is_blank() {
            xml.push_str(&owner_xml("EFINOwnerInfo", &r.efin_owner));
        }
        xml.push_str(&element("TransactionDate", &r.transaction_date));
        xml.push_str("</Enrollment>");
    }

    xml.push_str("</EnrollmentCollection>");
    xml
}

fn ingest_xml(engine: &ReconciliationEngine, records: &[EnrollmentRecord]) -> ProcessingReport {
    engine
        .ingest(to_xml(records, records.len()).as_bytes(), SubmissionFormat::Xml)
        .unwrap()
}

// ============================================================================
// STRUCTURAL GATE
// ============================================================================

#[test]
fn test_declared_three_parsed_two_rejects_without_writes() {
    let (engine, gateway) = new_engine();
    let records = vec![
        record("111111111", "Smith Tax Service", "100 Main St"),
        record("222222222", "Jones Accounting", "5 Oak Ave"),
    ];

    let err = engine
        .ingest(to_xml(&records, 3).as_bytes(), SubmissionFormat::Xml)
        .unwrap_err();

    match err {
        IngestError::Structural(structural) => {
            assert_eq!(structural.discrepancies.len(), 1);
            assert!(structural.to_string().contains("declares 3 records but 2"));
        }
        other => panic!("expected structural rejection, got {:?}", other),
    }
    assert!(gateway.counts().unwrap().is_empty());
}

#[test]
fn test_matching_count_passes_gate() {
    let (engine, gateway) = new_engine();
    let records = vec![
        record("111111111", "Smith Tax Service", "100 Main St"),
        record("222222222", "Jones Accounting", "5 Oak Ave"),
    ];

    let report = ingest_xml(&engine, &records);
    assert_eq!(report.committed(), 2);
    assert_eq!(gateway.counts().unwrap().enrollments, 2);
}

#[test]
fn test_processing_year_mismatch_rejects() {
    let (engine, gateway) = new_engine();
    let mut stale = record("111111111", "Smith Tax Service", "100 Main St");
    stale.processing_year = "2015".to_string();

    let err = engine
        .ingest(to_xml(&[stale], 1).as_bytes(), SubmissionFormat::Xml)
        .unwrap_err();
    assert!(err.is_submission_fatal());
    assert!(gateway.counts().unwrap().is_empty());
}

#[test]
fn test_parse_errors_write_nothing() {
    let (engine, gateway) = new_engine();

    let err = engine
        .ingest(&[0xff, 0xfe, 0x00], SubmissionFormat::Xml)
        .unwrap_err();
    assert!(matches!(err, IngestError::Parse(_)));

    // Declared format is trusted: XML bytes handed to the flat parser fail
    let err = engine
        .ingest(XML_FIXTURE.as_bytes(), SubmissionFormat::Flat)
        .unwrap_err();
    assert!(matches!(err, IngestError::Parse(_)));

    assert!(gateway.counts().unwrap().is_empty());
}

// ============================================================================
// FIELD VALIDATION
// ============================================================================

#[test]
fn test_missing_office_email_quarantines_only_that_record() {
    let (engine, gateway) = new_engine();
    let mut missing_email = record("222222222", "Jones Accounting", "5 Oak Ave");
    missing_email.office.email = String::new();

    let report = ingest_xml(
        &engine,
        &[
            record("111111111", "Smith Tax Service", "100 Main St"),
            missing_email,
            record("333333333", "Rivera Tax Pros", "9 Pine Rd"),
        ],
    );

    assert_eq!(report.committed(), 2);
    let quarantined = report.outcome(1).unwrap();
    assert_eq!(quarantined.status, RecordStatus::Quarantined);
    assert_eq!(quarantined.violations.len(), 1);
    assert_eq!(quarantined.violations[0].field, "Email");
    assert_eq!(quarantined.violations[0].rule, "required");

    let counts = gateway.counts().unwrap();
    assert_eq!(counts.offices, 2);
    assert!(gateway.office_for_efin("222222222").unwrap().is_none());
}

// ============================================================================
// IDENTITY RESOLUTION
// ============================================================================

#[test]
fn test_reprocessing_identical_submission_creates_no_duplicates() {
    let (engine, gateway) = new_engine();

    let first = engine.ingest(XML_FIXTURE.as_bytes(), SubmissionFormat::Xml).unwrap();
    let after_first = gateway.counts().unwrap();
    let second = engine.ingest(XML_FIXTURE.as_bytes(), SubmissionFormat::Xml).unwrap();
    let after_second = gateway.counts().unwrap();

    assert_eq!(first.committed(), 3);
    assert_eq!(second.committed(), 3);
    assert_eq!(after_first.offices, after_second.offices);
    assert_eq!(after_first.owners, after_second.owners);
    assert_eq!(after_first.enrollments, after_second.enrollments);
    assert_eq!(after_first.associations, after_second.associations);
    assert_eq!(after_second.submissions, 2);

    // Same bytes → same digest in the submission log
    let log = gateway.submission_log().unwrap();
    assert_eq!(log[0].digest, log[1].digest);
    assert_ne!(log[0].run_id, log[1].run_id);

    assert!(second
        .records
        .iter()
        .all(|r| r.enrollment == Some(UpsertOutcome::Updated)));
}

#[test]
fn test_known_efin_with_new_spelling_updates_bound_office() {
    let (engine, gateway) = new_engine();
    ingest_xml(&engine, &[record("111111111", "Smith Tax Service", "100 Main St")]);

    let renamed = record("111111111", "Totally Renamed Preparers", "42 Other Blvd");
    let report = ingest_xml(&engine, &[renamed]);
    assert_eq!(report.committed(), 1);

    let offices = gateway.offices().unwrap();
    assert_eq!(offices.len(), 1);
    assert_eq!(offices[0].name, "Totally Renamed Preparers");
    assert_eq!(offices[0].address1, "42 Other Blvd");
}

#[test]
fn test_fuzzy_office_threshold() {
    // Above threshold: same office under a second EFIN
    let (engine, gateway) = new_engine();
    ingest_xml(
        &engine,
        &[
            record("111111111", "Smith Tax Service LLC", "100 Main Street"),
            record("222222222", "SMITH TAX SERVICE", "100 Main St"),
        ],
    );
    assert_eq!(gateway.offices().unwrap().len(), 1);
    assert_eq!(
        gateway.office_for_efin("111111111").unwrap().unwrap().id,
        gateway.office_for_efin("222222222").unwrap().unwrap().id
    );

    // Below threshold: two offices
    let (engine, gateway) = new_engine();
    ingest_xml(
        &engine,
        &[
            record("111111111", "Smith Tax Service", "100 Main St"),
            record("222222222", "Jones Accounting Group", "5 Oak Ave"),
        ],
    );
    assert_eq!(gateway.offices().unwrap().len(), 2);
}

#[test]
fn test_tied_candidates_are_flagged_not_blocking() {
    let (engine, gateway) = new_engine();

    // Two indistinguishable offices with no EFIN binding
    gateway
        .transaction(&mut |tx| {
            let twin = OfficeEntity::from_info(
                "",
                &record("", "Smith Tax Service", "100 Main St").office,
            );
            tx.insert_office(&twin)?;
            tx.insert_office(&twin)?;
            Ok(())
        })
        .unwrap();

    let report = ingest_xml(&engine, &[record("111111111", "Smith Tax Service", "100 Main St")]);

    let outcome = report.outcome(0).unwrap();
    assert_eq!(outcome.status, RecordStatus::Committed);
    assert_eq!(outcome.ambiguities.len(), 1);
    assert_eq!(outcome.ambiguities[0].tied_ids, vec![1, 2]);
    assert_eq!(outcome.office_id, Some(1));

    let events = gateway.events_of_type("resolution_ambiguity").unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity_id, "1");
}

#[test]
fn test_owner_ssn_decides_identity() {
    let (engine, gateway) = new_engine();

    let mut first = record("111111111", "Smith Tax Service", "100 Main St");
    first.owner = owner("John", "Smith", "123-45-6789");
    let mut namesake = record("222222222", "Jones Accounting Group", "5 Oak Ave");
    namesake.owner = owner("John", "Smith", "987-65-4321");
    let mut nickname = record("333333333", "Rivera Tax Pros", "9 Pine Rd");
    nickname.owner = owner("Johnny", "Smith", "123456789");

    let report = ingest_xml(&engine, &[first, namesake, nickname]);
    assert_eq!(report.committed(), 3);

    let owners = gateway.owners().unwrap();
    assert_eq!(owners.len(), 2);

    let associations = gateway.associations().unwrap();
    let first_owner = associations
        .iter()
        .find(|a| a.efin == "111111111")
        .unwrap()
        .owner_id;
    let nickname_owner = associations
        .iter()
        .find(|a| a.efin == "333333333")
        .unwrap()
        .owner_id;
    assert_eq!(first_owner, nickname_owner);
}

// ============================================================================
// RECONCILIATION
// ============================================================================

#[test]
fn test_same_efin_twice_keeps_one_fact_and_later_address() {
    let (engine, gateway) = new_engine();
    let report = engine.ingest(XML_FIXTURE.as_bytes(), SubmissionFormat::Xml).unwrap();
    assert_eq!(report.committed(), 3);

    let facts: Vec<EfinEnrollment> = gateway
        .enrollments()
        .unwrap()
        .into_iter()
        .filter(|f| f.efin == "123456789")
        .collect();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].tax_year, 2016);
    assert_eq!(facts[0].received_at.to_rfc3339(), "2016-02-01T09:00:00+00:00");

    let office = gateway.office_for_efin("123456789").unwrap().unwrap();
    assert_eq!(office.address1, "200 Commerce St");
    assert_eq!(office.zip, "75202");
}

#[test]
fn test_xml_fixture_builds_registry() {
    let (engine, gateway) = new_engine();
    engine.ingest(XML_FIXTURE.as_bytes(), SubmissionFormat::Xml).unwrap();

    let counts = gateway.counts().unwrap();
    assert_eq!(counts.offices, 2);
    assert_eq!(counts.enrollments, 2);
    assert_eq!(counts.owners, 3);
    assert_eq!(counts.associations, 3);

    let associations = gateway.associations().unwrap();
    assert!(associations
        .iter()
        .any(|a| a.efin == "123456789" && a.role == OwnerRole::EfinOwner));

    let facts = gateway.enrollments().unwrap();
    let smith = facts.iter().find(|f| f.efin == "123456789").unwrap();
    assert_eq!(smith.prior_bank, "First Bank");
    assert!(smith.prior_client);

    assert_eq!(gateway.events_of_type("office_created").unwrap().len(), 2);
    assert_eq!(gateway.events_of_type("owner_created").unwrap().len(), 3);
}

#[test]
fn test_many_records_across_workers_converge() {
    let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
    let engine = ReconciliationEngine::new(fast_config().with_workers(4), gateway.clone());

    // 10 EFINs, each submitted 4 times with a moving address
    let names = [
        "Alpha", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel", "India",
        "Juliett",
    ];
    let mut records = Vec::new();
    for round in 0..4 {
        for (i, name) in names.iter().enumerate() {
            let mut r = record(
                &format!("90000000{}", i),
                name,
                &format!("{} {} Street", 100 + round, name),
            );
            r.owner = owner(name, "Owner", &format!("40000000{}", i));
            records.push(r);
        }
    }

    let report = ingest_xml(&engine, &records);
    assert_eq!(report.committed(), 40);
    assert_eq!(report.failed(), 0);

    let counts = gateway.counts().unwrap();
    assert_eq!(counts.enrollments, 10);
    assert_eq!(counts.efin_bindings, 10);
    assert_eq!(counts.owners, 10);
    assert_eq!(counts.associations, 10);

    for (i, name) in names.iter().enumerate() {
        let office = gateway
            .office_for_efin(&format!("90000000{}", i))
            .unwrap()
            .unwrap();
        assert_eq!(office.address1, format!("103 {} Street", name));
    }
}

/// Everything a run decided, minus run ids and timestamps
fn decisions(
    report: &ProcessingReport,
    gateway: &SqliteGateway,
) -> (Vec<(usize, RecordStatus, usize, Option<i64>)>, Vec<(i64, String, Option<String>)>, Vec<OwnerEfinAssociation>) {
    let records = report
        .records
        .iter()
        .map(|r| (r.index, r.status, r.ambiguities.len(), r.office_id))
        .collect();
    let owners = gateway
        .owners()
        .unwrap()
        .into_iter()
        .map(|o| (o.id, o.full_name(), o.ssn))
        .collect();
    (records, owners, gateway.associations().unwrap())
}

#[test]
fn test_same_submission_same_decisions_on_every_run() {
    // Jon Smith carries no SSN and can resolve to either John Smith
    let mut a = record("111111111", "Smith Tax Service", "100 Main St");
    a.owner = owner("John", "Smith", "111111111");
    let mut b = record("222222222", "Jones Accounting Group", "5 Oak Ave");
    b.owner = owner("Jon", "Smith", "");
    let mut c = record("333333333", "Rivera Tax Pros", "9 Pine Rd");
    c.owner = owner("John", "Smith", "222222222");
    let xml = to_xml(&[a, b, c], 3);

    let mut seen = None;
    for _ in 0..25 {
        let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
        let engine = ReconciliationEngine::new(fast_config().with_workers(4), gateway.clone());
        let report = engine.ingest(xml.as_bytes(), SubmissionFormat::Xml).unwrap();

        let run = decisions(&report, &gateway);
        match &seen {
            None => seen = Some(run),
            Some(first) => assert_eq!(&run, first),
        }
    }

    // Submission order decides: Jon Smith joins the first John Smith
    let (records, owners, associations) = seen.unwrap();
    assert!(records.iter().all(|r| r.1 == RecordStatus::Committed && r.2 == 0));
    assert_eq!(owners.len(), 2);
    let owner_of = |efin: &str| {
        associations
            .iter()
            .find(|assoc| assoc.efin == efin)
            .unwrap()
            .owner_id
    };
    assert_eq!(owner_of("111111111"), owner_of("222222222"));
    assert_ne!(owner_of("111111111"), owner_of("333333333"));
}

#[test]
fn test_flat_fixture_into_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("enrollment.db");

    {
        let gateway = Arc::new(SqliteGateway::open(&path).unwrap());
        let engine = engine_with(gateway);
        let report = engine
            .ingest(FLAT_FIXTURE.as_bytes(), SubmissionFormat::Flat)
            .unwrap();

        assert_eq!(report.record_count(), 3);
        assert_eq!(report.committed(), 2);
        assert_eq!(report.quarantined(), 1);
        assert_eq!(report.outcome(1).unwrap().violations[0].field, "Email");
    }

    // Reopen: everything committed survived
    let reopened = SqliteGateway::open(&path).unwrap();
    let counts = reopened.counts().unwrap();
    assert_eq!(counts.offices, 2);
    assert_eq!(counts.enrollments, 2);
    assert_eq!(counts.submissions, 1);

    let log = reopened.submission_log().unwrap();
    assert_eq!(log[0].format, "flat");
    assert_eq!(log[0].committed, 2);
    assert_eq!(log[0].quarantined, 1);
    assert_eq!(log[0].digest, ero_enrollment::submission_digest(FLAT_FIXTURE.as_bytes()));

    let rivera = reopened.office_for_efin("777777").unwrap().unwrap();
    assert_eq!(rivera.name, "Rivera Tax Pros");
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum Fault {
    Permanent,
    /// Fail this many times, then succeed
    Transient(u32),
}

/// Wraps the SQLite gateway and fails the association write for one EFIN,
/// after the office and enrollment writes already happened in the same
/// transaction.
struct FaultyGateway {
    inner: SqliteGateway,
    efin: String,
    fault: Fault,
    failures: AtomicU32,
}

impl FaultyGateway {
    fn new(efin: &str, fault: Fault) -> Self {
        FaultyGateway {
            inner: SqliteGateway::open_in_memory().unwrap(),
            efin: efin.to_string(),
            fault,
            failures: AtomicU32::new(0),
        }
    }

    fn inject(&self, efin: &str) -> Result<(), PersistenceError> {
        if efin != self.efin {
            return Ok(());
        }
        match self.fault {
            Fault::Permanent => Err(PersistenceError::Permanent("disk full".to_string())),
            Fault::Transient(times) => {
                if self.failures.fetch_add(1, Ordering::SeqCst) < times {
                    Err(PersistenceError::Transient("database is locked".to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

struct FaultyTx<'a> {
    inner: &'a dyn StoreTx,
    gateway: &'a FaultyGateway,
}

impl StoreTx for FaultyTx<'_> {
    fn office_for_efin(&self, efin: &str) -> Result<Option<i64>, PersistenceError> {
        self.inner.office_for_efin(efin)
    }
    fn offices(&self) -> Result<Vec<OfficeEntity>, PersistenceError> {
        self.inner.offices()
    }
    fn office(&self, id: i64) -> Result<Option<OfficeEntity>, PersistenceError> {
        self.inner.office(id)
    }
    fn insert_office(&self, office: &OfficeEntity) -> Result<i64, PersistenceError> {
        self.inner.insert_office(office)
    }
    fn update_office(&self, office: &OfficeEntity) -> Result<(), PersistenceError> {
        self.inner.update_office(office)
    }
    fn bind_efin(&self, efin: &str, office_id: i64) -> Result<bool, PersistenceError> {
        self.inner.bind_efin(efin, office_id)
    }
    fn upsert_enrollment(&self, fact: &EfinEnrollment) -> Result<UpsertOutcome, PersistenceError> {
        self.inner.upsert_enrollment(fact)
    }
    fn owners(&self) -> Result<Vec<OwnerEntity>, PersistenceError> {
        self.inner.owners()
    }
    fn owner(&self, id: i64) -> Result<Option<OwnerEntity>, PersistenceError> {
        self.inner.owner(id)
    }
    fn insert_owner(&self, owner: &OwnerEntity) -> Result<i64, PersistenceError> {
        self.inner.insert_owner(owner)
    }
    fn update_owner(&self, owner: &OwnerEntity) -> Result<(), PersistenceError> {
        self.inner.update_owner(owner)
    }
    fn upsert_association(&self, association: &OwnerEfinAssociation) -> Result<bool, PersistenceError> {
        self.gateway.inject(&association.efin)?;
        self.inner.upsert_association(association)
    }
    fn record_event(&self, event: &Event) -> Result<(), PersistenceError> {
        self.inner.record_event(event)
    }
}

impl PersistenceGateway for FaultyGateway {
    fn transaction(
        &self,
        work: &mut dyn FnMut(&dyn StoreTx) -> Result<(), PersistenceError>,
    ) -> Result<(), PersistenceError> {
        self.inner.transaction(&mut |tx| {
            work(&FaultyTx {
                inner: tx,
                gateway: self,
            })
        })
    }

    fn record_submission(&self, entry: &SubmissionLogEntry) -> Result<(), PersistenceError> {
        self.inner.record_submission(entry)
    }
}

fn three_records() -> Vec<EnrollmentRecord> {
    vec![
        record("111111111", "Smith Tax Service", "100 Main St"),
        record("222222222", "Jones Accounting Group", "5 Oak Ave"),
        record("333333333", "Rivera Tax Pros", "9 Pine Rd"),
    ]
}

#[test]
fn test_permanent_failure_rolls_back_only_that_record() {
    let gateway = Arc::new(FaultyGateway::new("222222222", Fault::Permanent));
    let engine = ReconciliationEngine::new(fast_config(), gateway.clone());

    let records = three_records();
    let report = engine
        .ingest(to_xml(&records, 3).as_bytes(), SubmissionFormat::Xml)
        .unwrap();

    assert_eq!(report.committed(), 2);
    let failed = report.outcome(1).unwrap();
    assert_eq!(failed.status, RecordStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(failed.error.as_deref().unwrap().contains("disk full"));

    // Office, binding and enrollment for the failed record were rolled back
    assert!(gateway.inner.office_for_efin("222222222").unwrap().is_none());
    let counts = gateway.inner.counts().unwrap();
    assert_eq!(counts.offices, 2);
    assert_eq!(counts.enrollments, 2);
    assert_eq!(counts.submissions, 1);
}

#[test]
fn test_transient_failure_is_retried() {
    let gateway = Arc::new(FaultyGateway::new("222222222", Fault::Transient(2)));
    let engine = ReconciliationEngine::new(fast_config(), gateway.clone());

    let records = three_records();
    let report = engine
        .ingest(to_xml(&records, 3).as_bytes(), SubmissionFormat::Xml)
        .unwrap();

    assert_eq!(report.committed(), 3);
    assert_eq!(report.outcome(1).unwrap().attempts, 3);
    // Rolled-back attempts left nothing behind
    assert_eq!(gateway.inner.counts().unwrap().offices, 3);
}

#[test]
fn test_transient_failure_exhausts_attempts() {
    let gateway = Arc::new(FaultyGateway::new("222222222", Fault::Transient(10)));
    let engine = ReconciliationEngine::new(fast_config(), gateway.clone());

    let records = three_records();
    let report = engine
        .ingest(to_xml(&records, 3).as_bytes(), SubmissionFormat::Xml)
        .unwrap();

    let failed = report.outcome(1).unwrap();
    assert_eq!(failed.status, RecordStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert_eq!(report.committed(), 2);
}
