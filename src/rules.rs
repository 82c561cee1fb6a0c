// 🏷️ Field Rules - Rules as Data
// Declarative per-field rule table plus a small interpreter.
// A record with any violation is quarantined; siblings keep going.

use crate::record::{parse_transaction_date, EnrollmentRecord};
use serde::Serialize;
use std::fmt;

// ============================================================================
// RULE KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Must be non-blank
    Required,
    /// ASCII letters, digits and interior spaces
    Alphanumeric,
    /// ASCII digits only
    Numeric,
    /// Character count within [min, max]
    Length { min: usize, max: usize },
    Email,
    /// 9 digits, optionally formatted ddd-dd-dddd
    Ssn,
    /// 10 digits once ( ) - . + and spaces are stripped
    Phone,
    /// Parseable date or date-time
    Date,
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Required => "required",
            RuleKind::Alphanumeric => "alphanumeric",
            RuleKind::Numeric => "numeric",
            RuleKind::Length { .. } => "length",
            RuleKind::Email => "email",
            RuleKind::Ssn => "ssn",
            RuleKind::Phone => "phone",
            RuleKind::Date => "date",
        }
    }

    /// Does `value` satisfy this rule? Blank values only fail `Required`.
    pub fn check(&self, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return !matches!(self, RuleKind::Required);
        }

        match self {
            RuleKind::Required => true,
            RuleKind::Alphanumeric => value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == ' '),
            RuleKind::Numeric => value.chars().all(|c| c.is_ascii_digit()),
            RuleKind::Length { min, max } => {
                let len = value.chars().count();
                len >= *min && len <= *max
            }
            RuleKind::Email => is_email(value),
            RuleKind::Ssn => is_ssn(value),
            RuleKind::Phone => is_phone(value),
            RuleKind::Date => parse_transaction_date(value).is_some(),
        }
    }
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty()
        || local.starts_with('.')
        || local.ends_with('.')
        || local.contains("..")
        || domain.contains('@')
        || value.contains(char::is_whitespace)
    {
        return false;
    }

    let local_ok = local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+/=?^_`{|}~.-".contains(c));
    let labels: Vec<&str> = domain.split('.').collect();
    let domain_ok = labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });

    local_ok && domain_ok && !local.starts_with('.') && !local.ends_with('.')
}

fn is_ssn(value: &str) -> bool {
    let bytes = value.as_bytes();
    let formatted = bytes.len() == 11
        && bytes[3] == b'-'
        && bytes[6] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 3 || i == 6 || b.is_ascii_digit());
    let plain = bytes.len() == 9 && bytes.iter().all(u8::is_ascii_digit);
    formatted || plain
}

fn is_phone(value: &str) -> bool {
    if !value
        .chars()
        .all(|c| c.is_ascii_digit() || "()-.+ ".contains(c))
    {
        return false;
    }
    let digits: Vec<char> = value.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => true,
        // Leading country code 1
        11 => digits[0] == '1',
        _ => false,
    }
}

// ============================================================================
// RULE TABLE
// ============================================================================

/// Which part of the record a field lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Section {
    Enrollment,
    OfficeInfo,
    OwnerInformation,
    EFINOwnerInfo,
}

impl Section {
    pub fn name(&self) -> &'static str {
        match self {
            Section::Enrollment => "Enrollment",
            Section::OfficeInfo => "OfficeInfo",
            Section::OwnerInformation => "OwnerInformation",
            Section::EFINOwnerInfo => "EFINOwnerInfo",
        }
    }
}

/// One row of the rule table: a field, how to read it, what it must satisfy
#[derive(Clone)]
pub struct FieldRule {
    pub section: Section,
    pub field: &'static str,
    pub kinds: Vec<RuleKind>,
    read: fn(&EnrollmentRecord) -> &str,
}

impl FieldRule {
    pub fn new(
        section: Section,
        field: &'static str,
        read: fn(&EnrollmentRecord) -> &str,
        kinds: &[RuleKind],
    ) -> Self {
        FieldRule {
            section,
            field,
            kinds: kinds.to_vec(),
            read,
        }
    }
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRule")
            .field("section", &self.section)
            .field("field", &self.field)
            .field("kinds", &self.kinds)
            .finish()
    }
}

// ============================================================================
// VIOLATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldViolation {
    pub section: Section,
    pub field: String,
    pub rule: String,
    pub value: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} failed '{}' (value: '{}')",
            self.section.name(),
            self.field,
            self.rule,
            self.value
        )
    }
}

// ============================================================================
// FIELD VALIDATOR
// ============================================================================

pub struct FieldValidator {
    rules: Vec<FieldRule>,
}

impl FieldValidator {
    /// Validator loaded with the enrollment rule table
    pub fn new() -> Self {
        let mut validator = FieldValidator { rules: Vec::new() };
        validator.register_enrollment_rules();
        validator
    }

    /// Validator with a custom table
    pub fn with_rules(rules: Vec<FieldRule>) -> Self {
        FieldValidator { rules }
    }

    fn register_enrollment_rules(&mut self) {
        use RuleKind::*;
        use Section::*;

        const REQ_ALNUM: &[RuleKind] = &[Required, Alphanumeric];
        const REQ_NUM: &[RuleKind] = &[Required, Numeric];
        const STATE: &[RuleKind] = &[Length { min: 2, max: 2 }];

        // ====================================================================
        // ENROLLMENT
        // ====================================================================
        self.register(FieldRule::new(Enrollment, "MasterEfin", |r| &r.master_efin, REQ_NUM));
        self.register(FieldRule::new(Enrollment, "EFIN", |r| &r.efin, REQ_NUM));
        self.register(FieldRule::new(Enrollment, "TransmitterID", |r| &r.transmitter_id, REQ_NUM));
        self.register(FieldRule::new(
            Enrollment,
            "ProcessingYear",
            |r| &r.processing_year,
            &[Required, Numeric, Length { min: 4, max: 4 }],
        ));
        self.register(FieldRule::new(
            Enrollment,
            "TransactionDate",
            |r| &r.transaction_date,
            &[Required, Date],
        ));

        // ====================================================================
        // OFFICE
        // ====================================================================
        self.register(FieldRule::new(OfficeInfo, "OfficeName", |r| &r.office.office_name, REQ_ALNUM));
        self.register(FieldRule::new(
            OfficeInfo,
            "PrimaryContactFirst",
            |r| &r.office.primary_contact_first,
            REQ_ALNUM,
        ));
        self.register(FieldRule::new(
            OfficeInfo,
            "PrimaryContactLast",
            |r| &r.office.primary_contact_last,
            REQ_ALNUM,
        ));
        // Not checked by the enrollment schema; a malformed number is still caught here
        self.register(FieldRule::new(OfficeInfo, "PhoneNumber", |r| &r.office.phone_number, &[Phone]));
        self.register(FieldRule::new(OfficeInfo, "FaxNumber", |r| &r.office.fax_number, &[Phone]));
        self.register(FieldRule::new(OfficeInfo, "Email", |r| &r.office.email, &[Required, Email]));
        self.register(FieldRule::new(OfficeInfo, "Address1", |r| &r.office.address1, REQ_ALNUM));
        self.register(FieldRule::new(OfficeInfo, "City", |r| &r.office.city, REQ_ALNUM));
        self.register(FieldRule::new(OfficeInfo, "State", |r| &r.office.state, STATE));
        self.register(FieldRule::new(OfficeInfo, "Zip", |r| &r.office.zip, REQ_ALNUM));

        // ====================================================================
        // GENERAL OWNER
        // ====================================================================
        self.register(FieldRule::new(OwnerInformation, "FirstName", |r| &r.owner.first_name, REQ_ALNUM));
        self.register(FieldRule::new(OwnerInformation, "LastName", |r| &r.owner.last_name, REQ_ALNUM));
        self.register(FieldRule::new(
            OwnerInformation,
            "PhoneNumber",
            |r| &r.owner.phone_number,
            &[Required, Phone],
        ));
        self.register(FieldRule::new(OwnerInformation, "Email", |r| &r.owner.email, &[Email]));
        self.register(FieldRule::new(OwnerInformation, "Address1", |r| &r.owner.address1, REQ_ALNUM));
        self.register(FieldRule::new(OwnerInformation, "City", |r| &r.owner.city, REQ_ALNUM));
        self.register(FieldRule::new(OwnerInformation, "State", |r| &r.owner.state, STATE));
        self.register(FieldRule::new(OwnerInformation, "Zip", |r| &r.owner.zip, REQ_ALNUM));
        self.register(FieldRule::new(OwnerInformation, "SSN", |r| &r.owner.ssn, &[Ssn]));
        // DateOfBirth is free-form and stored as given

        // ====================================================================
        // EFIN OWNER (optional block)
        // ====================================================================
        self.register(FieldRule::new(EFINOwnerInfo, "SSN", |r| &r.efin_owner.ssn, &[Ssn]));
    }

    pub fn register(&mut self, rule: FieldRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// Every violation in table order. Empty → the record is clean.
    ///
    /// A failed `required` hides the remaining rules of that field, the
    /// value is blank so they have nothing to say.
    pub fn validate(&self, record: &EnrollmentRecord) -> Vec<FieldViolation> {
        let mut violations = Vec::new();

        for rule in &self.rules {
            let value = (rule.read)(record);
            for kind in &rule.kinds {
                if !kind.check(value) {
                    violations.push(FieldViolation {
                        section: rule.section,
                        field: rule.field.to_string(),
                        rule: kind.name().to_string(),
                        value: value.to_string(),
                    });
                    if *kind == RuleKind::Required {
                        break;
                    }
                }
            }
        }

        violations
    }

    pub fn is_clean(&self, record: &EnrollmentRecord) -> bool {
        self.validate(record).is_empty()
    }
}

impl Default for FieldValidator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
