// 🏢 Office Entity - persisted ERO office
//
// "Office name is a VALUE (can change), office id is IDENTITY (never changes)"
//
// Problem solved:
// - "Smith Tax Service LLC" one year, "SMITH TAX SERVICE" the next → same office
// - An office may enroll several EFINs; each EFIN binds to exactly one office
// - Descriptive fields are last-write-wins

use crate::record::OfficeInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// OFFICE ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficeEntity {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    /// Surrogate key assigned by the store
    pub id: i64,

    /// EFIN the office was first created for
    pub efin: Option<String>,

    // ========================================================================
    // VALUES (overwritten on every reconciled submission)
    // ========================================================================
    pub name: String,
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

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OfficeEntity {
    /// New, not yet persisted office (id 0 until the store assigns one)
    pub fn from_info(efin: &str, info: &OfficeInfo) -> Self {
        let now = Utc::now();
        let efin = efin.trim();

        let mut office = OfficeEntity {
            id: 0,
            efin: if efin.is_empty() {
                None
            } else {
                Some(efin.to_string())
            },
            name: String::new(),
            primary_contact_first: String::new(),
            primary_contact_last: String::new(),
            phone_number: String::new(),
            fax_number: String::new(),
            email: String::new(),
            address1: String::new(),
            address2: String::new(),
            city: String::new(),
            state: String::new(),
            zip: String::new(),
            created_at: now,
            updated_at: now,
        };
        office.apply(info);
        office
    }

    /// Overwrite descriptive fields with the incoming description
    pub fn apply(&mut self, info: &OfficeInfo) {
        self.name = info.office_name.trim().to_string();
        self.primary_contact_first = info.primary_contact_first.trim().to_string();
        self.primary_contact_last = info.primary_contact_last.trim().to_string();
        self.phone_number = info.phone_number.trim().to_string();
        self.fax_number = info.fax_number.trim().to_string();
        self.email = info.email.trim().to_string();
        self.address1 = info.address1.trim().to_string();
        self.address2 = info.address2.trim().to_string();
        self.city = info.city.trim().to_string();
        self.state = info.state.trim().to_string();
        self.zip = info.zip.trim().to_string();
        self.updated_at = Utc::now();
    }

    /// Same shape as `OfficeInfo::address_line`, so both sides score alike
    pub fn address_line(&self) -> String {
        [&self.address1, &self.city, &self.state, &self.zip]
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// ENROLLMENT FACT
// ============================================================================

/// One row per (EFIN, tax year). Re-submission moves `received_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfinEnrollment {
    pub efin: String,
    pub tax_year: i32,
    pub received_at: DateTime<Utc>,
    pub master_efin: String,
    pub transmitter_id: String,
    pub prior_bank: String,
    pub prior_client: bool,
}
