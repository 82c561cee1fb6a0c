// 👤 Owner Entity - persisted person behind an office
//
// Problem solved:
// - "Jon Smith" and "John Smith" with the same SSN → same owner
// - Same name, different SSN → different people
// - An owner links to EFINs through (owner, efin, role) associations

use crate::record::OwnerInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// OWNER ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerRole {
    /// General owner of the office (OwnerInformation)
    #[serde(rename = "owner")]
    Owner,

    /// Responsible official for the EFIN (EFINOwnerInfo)
    #[serde(rename = "efin-owner")]
    EfinOwner,
}

impl OwnerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerRole::Owner => "owner",
            OwnerRole::EfinOwner => "efin-owner",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(OwnerRole::Owner),
            "efin-owner" => Some(OwnerRole::EfinOwner),
            _ => None,
        }
    }
}

impl fmt::Display for OwnerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// OWNER ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerEntity {
    pub id: i64,

    pub first_name: String,
    pub last_name: String,
    /// Digits only. Never cleared once known.
    pub ssn: Option<String>,
    pub date_of_birth: String,
    pub phone_number: String,
    pub email: String,
    pub address1: String,
    pub address2: String,
    pub city: String,
    pub state: String,
    pub zip: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OwnerEntity {
    /// New, not yet persisted owner (id 0 until the store assigns one)
    pub fn from_info(info: &OwnerInfo) -> Self {
        let now = Utc::now();
        let mut owner = OwnerEntity {
            id: 0,
            first_name: String::new(),
            last_name: String::new(),
            ssn: None,
            date_of_birth: String::new(),
            phone_number: String::new(),
            email: String::new(),
            address1: String::new(),
            address2: String::new(),
            city: String::new(),
            state: String::new(),
            zip: String::new(),
            created_at: now,
            updated_at: now,
        };
        owner.apply(info);
        owner
    }

    /// Last write wins, except a blank SSN never erases a known one
    pub fn apply(&mut self, info: &OwnerInfo) {
        self.first_name = info.first_name.trim().to_string();
        self.last_name = info.last_name.trim().to_string();
        if let Some(ssn) = info.ssn_digits() {
            self.ssn = Some(ssn);
        }
        self.date_of_birth = info.date_of_birth.trim().to_string();
        self.phone_number = info.phone_number.trim().to_string();
        self.email = info.email.trim().to_string();
        self.address1 = info.address1.trim().to_string();
        self.address2 = info.address2.trim().to_string();
        self.city = info.city.trim().to_string();
        self.state = info.state.trim().to_string();
        self.zip = info.zip.trim().to_string();
        self.updated_at = Utc::now();
    }

    pub fn full_name(&self) -> String {
        [&self.first_name, &self.last_name]
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// ASSOCIATION
// ============================================================================

/// At most one row per (owner_id, efin, role)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerEfinAssociation {
    pub owner_id: i64,
    pub efin: String,
    pub role: OwnerRole,
}
