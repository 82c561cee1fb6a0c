// ⚖️ Reconciliation Engine - submission in, processing report out
//
//   raw bytes → parse → structural gate → field rules → conflict groups
//             → workers: resolve + upsert per record, one transaction each
//
// Parse and structural failures reject the submission before any write.
// After the gate, a record can only affect itself: quarantined and failed
// records never block their siblings.

use crate::config::IngestConfig;
use crate::db::{Event, PersistenceGateway, StoreTx, UpsertOutcome, EVENT_ACTOR};
use crate::entities::{EfinEnrollment, OfficeEntity, OwnerEfinAssociation, OwnerEntity, OwnerRole};
use crate::error::{IngestError, PersistenceError};
use crate::parser::parse_submission;
use crate::record::{EnrollmentRecord, EnrollmentSubmission, OwnerInfo, SubmissionFormat};
use crate::report::{ProcessingReport, RecordOutcome, RecordState};
use crate::resolver::{IdentityResolver, MatchStrategy, ResolutionAmbiguity};
use crate::rules::FieldValidator;
use crate::structural::StructuralValidator;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// ============================================================================
// RECONCILED RECORD
// ============================================================================

/// What one committed record transaction did
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub office_id: i64,
    pub office_strategy: MatchStrategy,
    pub enrollment: UpsertOutcome,
    pub owner_id: i64,
    /// None when EFINOwnerInfo carried no name
    pub efin_owner_id: Option<i64>,
    pub ambiguities: Vec<ResolutionAmbiguity>,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    config: IngestConfig,
    gateway: Arc<dyn PersistenceGateway>,
    structural: StructuralValidator,
    validator: FieldValidator,
    resolver: IdentityResolver,
}

impl ReconciliationEngine {
    pub fn new(config: IngestConfig, gateway: Arc<dyn PersistenceGateway>) -> Self {
        let resolver = IdentityResolver::new(&config.matching);
        ReconciliationEngine {
            config,
            gateway,
            structural: StructuralValidator::new(),
            validator: FieldValidator::new(),
            resolver,
        }
    }

    /// Swap the field rule table (tests, alternative feeds)
    pub fn with_validator(mut self, validator: FieldValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Parse and process raw submission bytes
    pub fn ingest(
        &self,
        bytes: &[u8],
        format: SubmissionFormat,
    ) -> Result<ProcessingReport, IngestError> {
        let digest = submission_digest(bytes);
        let submission = parse_submission(bytes, format).map_err(|err| {
            warn!(%format, %digest, error = %err, "submission rejected by parser");
            err
        })?;
        self.process_submission(submission, digest)
    }

    /// Gate, validate and reconcile an already parsed submission
    pub fn process_submission(
        &self,
        submission: EnrollmentSubmission,
        digest: String,
    ) -> Result<ProcessingReport, IngestError> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(
            run_id = %run_id,
            format = %submission.format,
            records = submission.record_count(),
            "processing submission"
        );

        // ====================================================================
        // STRUCTURAL GATE (single-threaded, nothing written on failure)
        // ====================================================================
        if let Err(err) = self.structural.validate(&submission) {
            warn!(run_id = %run_id, discrepancies = err.discrepancies.len(), "submission rejected: {}", err);
            return Err(err.into());
        }

        // ====================================================================
        // FIELD VALIDATION
        // ====================================================================
        let records = &submission.records;
        let mut outcomes: Vec<Option<RecordOutcome>> = vec![None; records.len()];
        let mut clean: Vec<(usize, &EnrollmentRecord)> = Vec::new();

        for (slot, record) in records.iter().enumerate() {
            let violations = self.validator.validate(record);
            let next = if violations.is_empty() {
                RecordState::Clean
            } else {
                RecordState::Quarantined
            };
            let state = RecordState::Parsed
                .advance(RecordState::StructurallyAccepted)
                .and_then(|accepted| accepted.advance(next));

            match state {
                Ok(RecordState::Quarantined) => {
                    warn!(
                        index = record.index,
                        efin = %record.efin,
                        violations = violations.len(),
                        "record quarantined: {}",
                        violations
                            .iter()
                            .map(|v| v.to_string())
                            .collect::<Vec<_>>()
                            .join("; ")
                    );
                    outcomes[slot] = Some(RecordOutcome::quarantined(
                        record.index,
                        &record.efin,
                        violations,
                    ));
                }
                Ok(_) => clean.push((slot, record)),
                Err(message) => {
                    error!(index = record.index, "{}", message);
                    outcomes[slot] = Some(RecordOutcome::failed(record.index, &record.efin, message, 0));
                }
            }
        }

        // ====================================================================
        // RECONCILIATION (conflict groups across workers)
        // ====================================================================
        for (slot, outcome) in self.run_workers(&clean) {
            outcomes[slot] = Some(outcome);
        }

        let records_out: Vec<RecordOutcome> = outcomes
            .into_iter()
            .zip(records.iter())
            .map(|(outcome, record)| {
                outcome.unwrap_or_else(|| {
                    error!(index = record.index, "record finished without an outcome");
                    RecordOutcome::failed(
                        record.index,
                        &record.efin,
                        "worker stopped before the record finished",
                        0,
                    )
                })
            })
            .collect();

        let mut report = ProcessingReport {
            run_id,
            digest,
            format: submission.format,
            transmitter_id: submission.header.transmitter_id.clone(),
            processing_year: submission.header.processing_year.clone(),
            records: records_out,
            warnings: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        };

        if let Err(err) = self.gateway.record_submission(&report.log_entry()) {
            warn!(run_id = %report.run_id, error = %err, "could not write submission log");
            report
                .warnings
                .push(format!("submission log not written: {}", err));
        }

        info!(run_id = %report.run_id, "{}", report.summary());
        Ok(report)
    }

    /// Commit clean records; returns (slot, outcome) pairs in completion order
    fn run_workers(&self, clean: &[(usize, &EnrollmentRecord)]) -> Vec<(usize, RecordOutcome)> {
        if clean.is_empty() {
            return Vec::new();
        }

        let members: Vec<&EnrollmentRecord> = clean.iter().map(|(_, r)| *r).collect();
        let groups = match self.registry_snapshot(&members) {
            Ok(snapshot) => conflict_groups(&members, &self.resolver, &snapshot),
            Err(err) => {
                warn!(error = %err, "could not read registry for grouping, committing in submission order");
                vec![(0..members.len()).collect()]
            }
        };
        let worker_count = self.config.workers.worker_count.clamp(1, groups.len());

        debug!(groups = groups.len(), workers = worker_count, "dispatching conflict groups");

        let (job_tx, job_rx) = crossbeam_channel::bounded::<Vec<(usize, &EnrollmentRecord)>>(worker_count * 2);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, RecordOutcome)>();

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(worker_count);
            for worker_id in 0..worker_count {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                handles.push(scope.spawn(move || {
                    for group in job_rx.iter() {
                        // Sequential inside a group: later records win
                        for (slot, record) in group {
                            let outcome = self.commit_record(record);
                            if result_tx.send((slot, outcome)).is_err() {
                                return;
                            }
                        }
                    }
                    debug!(worker_id, "worker drained");
                }));
            }
            drop(job_rx);
            drop(result_tx);

            for group in groups {
                let job: Vec<(usize, &EnrollmentRecord)> =
                    group.into_iter().map(|member| clean[member]).collect();
                if job_tx.send(job).is_err() {
                    error!("every worker exited before all groups were dispatched");
                    break;
                }
            }
            drop(job_tx);

            let results: Vec<(usize, RecordOutcome)> = result_rx.iter().collect();

            for handle in handles {
                if handle.join().is_err() {
                    error!("reconciliation worker panicked");
                }
            }

            results
        })
    }

    /// Offices, owners and EFIN bindings as they stand before any worker runs
    fn registry_snapshot(
        &self,
        records: &[&EnrollmentRecord],
    ) -> Result<RegistrySnapshot, PersistenceError> {
        let mut snapshot = RegistrySnapshot::default();

        self.gateway.transaction(&mut |tx: &dyn StoreTx| {
            snapshot.offices = tx.offices()?;
            snapshot.owners = tx.owners()?;
            snapshot.bindings.clear();
            for record in records {
                let efin = record.efin.trim();
                if let Some(office_id) = tx.office_for_efin(efin)? {
                    snapshot.bindings.insert(efin.to_string(), office_id);
                }
            }
            Ok(())
        })?;

        Ok(snapshot)
    }

    /// One record, with retry on transient storage errors
    fn commit_record(&self, record: &EnrollmentRecord) -> RecordOutcome {
        let policy = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            // Every attempt starts from a rolled back, clean record
            let mut state = RecordState::Clean;

            match self.try_commit(record, &mut state) {
                Ok(reconciled) => {
                    debug!(
                        index = record.index,
                        efin = %record.efin,
                        office_id = reconciled.office_id,
                        strategy = reconciled.office_strategy.as_str(),
                        "record committed"
                    );
                    return match RecordOutcome::settled(record.index, &record.efin, state) {
                        Ok(outcome) => RecordOutcome {
                            ambiguities: reconciled.ambiguities,
                            attempts: attempt,
                            office_id: Some(reconciled.office_id),
                            enrollment: Some(reconciled.enrollment),
                            ..outcome
                        },
                        Err(message) => RecordOutcome::failed(record.index, &record.efin, message, attempt),
                    };
                }
                Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        index = record.index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient storage error, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    let state = state.advance(RecordState::Failed).unwrap_or_else(|message| {
                        error!(index = record.index, "{}", message);
                        RecordState::Failed
                    });
                    error!(
                        index = record.index,
                        efin = %record.efin,
                        attempt,
                        state = ?state,
                        error = %err,
                        "record failed"
                    );
                    return RecordOutcome::settled(record.index, &record.efin, state)
                        .map(|outcome| RecordOutcome {
                            error: Some(err.to_string()),
                            attempts: attempt,
                            ..outcome
                        })
                        .unwrap_or_else(|message| {
                            RecordOutcome::failed(record.index, &record.efin, message, attempt)
                        });
                }
            }
        }
    }

    fn try_commit(
        &self,
        record: &EnrollmentRecord,
        state: &mut RecordState,
    ) -> Result<Reconciled, PersistenceError> {
        let mut reconciled = None;

        // Resolved once every step ran; a failing COMMIT then goes Resolved → Failed
        self.gateway.transaction(&mut |tx: &dyn StoreTx| {
            let done = self.reconcile_in(tx, record)?;
            *state = state
                .advance(RecordState::Resolved)
                .map_err(PersistenceError::Permanent)?;
            reconciled = Some(done);
            Ok(())
        })?;

        let reconciled = reconciled.ok_or_else(|| {
            PersistenceError::Permanent("transaction committed without a result".to_string())
        })?;
        *state = state
            .advance(RecordState::Committed)
            .map_err(PersistenceError::Permanent)?;
        Ok(reconciled)
    }

    /// The four reconciliation steps, inside one open transaction
    pub fn reconcile_in(
        &self,
        tx: &dyn StoreTx,
        record: &EnrollmentRecord,
    ) -> Result<Reconciled, PersistenceError> {
        let efin = record.efin.trim();
        let tax_year = record.tax_year().ok_or_else(|| {
            PersistenceError::Permanent(format!(
                "ProcessingYear '{}' is not a year",
                record.processing_year
            ))
        })?;
        let received_at = record.received_at().ok_or_else(|| {
            PersistenceError::Permanent(format!(
                "TransactionDate '{}' is not a date",
                record.transaction_date
            ))
        })?;

        let mut ambiguities = Vec::new();

        // 1. Office: resolve or create, overwrite, bind the EFIN
        let bound = tx.office_for_efin(efin)?;
        let candidates = if bound.is_some() {
            Vec::new()
        } else {
            tx.offices()?
        };
        let resolution = self.resolver.resolve_office(bound, &record.office, &candidates);

        let office_id = match resolution.entity_id {
            Some(id) => {
                let mut office = tx.office(id)?.ok_or_else(|| {
                    PersistenceError::Permanent(format!("office {} no longer exists", id))
                })?;
                office.apply(&record.office);
                tx.update_office(&office)?;
                id
            }
            None => {
                let office = OfficeEntity::from_info(efin, &record.office);
                let id = tx.insert_office(&office)?;
                tx.record_event(&Event::new(
                    "office_created",
                    "office",
                    &id.to_string(),
                    serde_json::json!({
                        "efin": efin,
                        "name": office.name,
                        "record_index": record.index,
                    }),
                    EVENT_ACTOR,
                ))?;
                id
            }
        };

        if let Some(ambiguity) = resolution.ambiguity {
            record_ambiguity(tx, record, ambiguity, &mut ambiguities)?;
        }

        if tx.bind_efin(efin, office_id)? {
            tx.record_event(&Event::new(
                "efin_bound",
                "office",
                &office_id.to_string(),
                serde_json::json!({ "efin": efin }),
                EVENT_ACTOR,
            ))?;
        }

        // 2. Enrollment fact for (EFIN, tax year)
        let enrollment = tx.upsert_enrollment(&EfinEnrollment {
            efin: efin.to_string(),
            tax_year,
            received_at,
            master_efin: record.master_efin.trim().to_string(),
            transmitter_id: record.transmitter_id.trim().to_string(),
            prior_bank: record.prior_year.bank.trim().to_string(),
            prior_client: record.prior_year.client_of_yours_last_year,
        })?;

        // 3. General owner
        let owner_id = self.reconcile_owner(
            tx,
            record,
            &record.owner,
            OwnerRole::Owner,
            &mut ambiguities,
        )?;

        // 4. EFIN owner (optional block)
        let efin_owner_id = if record.efin_owner.is_blank() {
            None
        } else {
            Some(self.reconcile_owner(
                tx,
                record,
                &record.efin_owner,
                OwnerRole::EfinOwner,
                &mut ambiguities,
            )?)
        };

        Ok(Reconciled {
            office_id,
            office_strategy: resolution.strategy,
            enrollment,
            owner_id,
            efin_owner_id,
            ambiguities,
        })
    }

    fn reconcile_owner(
        &self,
        tx: &dyn StoreTx,
        record: &EnrollmentRecord,
        info: &OwnerInfo,
        role: OwnerRole,
        ambiguities: &mut Vec<ResolutionAmbiguity>,
    ) -> Result<i64, PersistenceError> {
        let candidates = tx.owners()?;
        let resolution = self.resolver.resolve_owner(info, &candidates);

        let owner_id = match resolution.entity_id {
            Some(id) => {
                let mut owner = tx.owner(id)?.ok_or_else(|| {
                    PersistenceError::Permanent(format!("owner {} no longer exists", id))
                })?;
                owner.apply(info);
                tx.update_owner(&owner)?;
                id
            }
            None => {
                let owner = OwnerEntity::from_info(info);
                let id = tx.insert_owner(&owner)?;
                tx.record_event(&Event::new(
                    "owner_created",
                    "owner",
                    &id.to_string(),
                    serde_json::json!({
                        "efin": record.efin.trim(),
                        "role": role.as_str(),
                        "record_index": record.index,
                    }),
                    EVENT_ACTOR,
                ))?;
                id
            }
        };

        if let Some(ambiguity) = resolution.ambiguity {
            record_ambiguity(tx, record, ambiguity, ambiguities)?;
        }

        tx.upsert_association(&OwnerEfinAssociation {
            owner_id,
            efin: record.efin.trim().to_string(),
            role,
        })?;

        Ok(owner_id)
    }
}

/// Log + audit a tie; the record still proceeds
fn record_ambiguity(
    tx: &dyn StoreTx,
    record: &EnrollmentRecord,
    ambiguity: ResolutionAmbiguity,
    ambiguities: &mut Vec<ResolutionAmbiguity>,
) -> Result<(), PersistenceError> {
    warn!(index = record.index, efin = %record.efin, "resolution ambiguity: {}", ambiguity);

    tx.record_event(&Event::new(
        "resolution_ambiguity",
        &ambiguity.kind.to_string(),
        &ambiguity.chosen_id.to_string(),
        serde_json::json!({
            "efin": record.efin.trim(),
            "record_index": record.index,
            "tied_ids": ambiguity.tied_ids,
            "score": ambiguity.score,
        }),
        EVENT_ACTOR,
    ))?;

    ambiguities.push(ambiguity);
    Ok(())
}

// ============================================================================
// HELPERS
// ============================================================================

/// SHA-256 of the raw submission, hex encoded
pub fn submission_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Registry state read once before dispatch, used only to group records
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub offices: Vec<OfficeEntity>,
    pub owners: Vec<OwnerEntity>,
    /// EFIN → bound office id, for the EFINs of this submission
    pub bindings: HashMap<String, i64>,
}

fn named_owners(record: &EnrollmentRecord) -> impl Iterator<Item = &OwnerInfo> {
    [&record.owner, &record.efin_owner]
        .into_iter()
        .filter(|owner| !owner.is_blank())
}

/// Keys for every stored entity a record could read or rewrite
fn conflict_keys(
    record: &EnrollmentRecord,
    resolver: &IdentityResolver,
    snapshot: &RegistrySnapshot,
) -> Vec<String> {
    let efin = record.efin.trim();
    let mut keys = vec![format!("efin:{}", efin)];

    match snapshot.bindings.get(efin) {
        Some(office_id) => keys.push(format!("office:{}", office_id)),
        None => keys.extend(
            snapshot
                .offices
                .iter()
                .filter(|office| resolver.office_may_match(&record.office, office))
                .map(|office| format!("office:{}", office.id)),
        ),
    }

    for owner in named_owners(record) {
        if let Some(ssn) = owner.ssn_digits() {
            keys.push(format!("ssn:{}", ssn));
        }
        keys.extend(
            snapshot
                .owners
                .iter()
                .filter(|stored| resolver.owner_may_match(owner, stored))
                .map(|stored| format!("owner:{}", stored.id)),
        );
    }
    keys
}

/// Could two records of one submission create or rewrite the same entity?
fn records_may_merge(resolver: &IdentityResolver, a: &EnrollmentRecord, b: &EnrollmentRecord) -> bool {
    resolver.offices_may_merge(&a.office, &b.office)
        || named_owners(a).any(|x| named_owners(b).any(|y| resolver.owners_may_merge(x, y)))
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Smallest index stays the root
fn union(parent: &mut [usize], i: usize, j: usize) {
    let (a, b) = (find(parent, i), find(parent, j));
    if a != b {
        let (root, child) = if a < b { (a, b) } else { (b, a) };
        parent[child] = root;
    }
}

/// Partition records into groups that must commit sequentially.
///
/// Two records share a group when they share an EFIN or SSN, when either
/// could resolve to a stored entity the other could also touch, or when
/// they could resolve to each other. Records in different groups never
/// observe each other's writes, so the outcome does not depend on which
/// worker runs first. Groups are ordered by their first member; members
/// keep submission order.
pub fn conflict_groups(
    records: &[&EnrollmentRecord],
    resolver: &IdentityResolver,
    snapshot: &RegistrySnapshot,
) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..records.len()).collect();
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for (i, record) in records.iter().enumerate() {
        for key in conflict_keys(record, resolver, snapshot) {
            match first_seen.get(&key) {
                Some(&j) => union(&mut parent, i, j),
                None => {
                    first_seen.insert(key, i);
                }
            }
        }
    }

    // Fuzzy links inside the submission (quadratic, records are batch sized)
    for i in 0..records.len() {
        for j in (i + 1)..records.len() {
            if find(&mut parent, i) != find(&mut parent, j)
                && records_may_merge(resolver, records[i], records[j])
            {
                union(&mut parent, i, j);
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..records.len() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }
    groups.into_values().collect()
}

// ============================================================================
// TESTS
// ============================================================================
