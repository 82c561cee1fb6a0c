// 🔍 Identity Resolver - Match incoming descriptions against persisted entities
// Strategies: Exact EFIN authority, Fuzzy text match, New entity
//
// Read-only: the resolver never writes. The caller hands it the candidates
// it read inside the record's transaction and acts on the Resolution.

use crate::config::MatchingConfig;
use crate::entities::{OfficeEntity, OwnerEntity};
use crate::record::{OfficeInfo, OwnerInfo};
use crate::similarity::{address_similarity, business_name_similarity, text_similarity};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Office score weights: name dominates, address breaks near-ties
const OFFICE_NAME_WEIGHT: f64 = 0.6;
const OFFICE_ADDRESS_WEIGHT: f64 = 0.4;

/// Scores closer than this are the same score
const TIE_EPSILON: f64 = 1e-9;

// ============================================================================
// MATCH STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// EFIN already bound to an office - text is not consulted
    ExactEfin,

    /// Best similarity score at or above the threshold
    Fuzzy,

    /// Nothing scored high enough - create a new entity
    New,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::ExactEfin => "exact_efin",
            MatchStrategy::Fuzzy => "fuzzy",
            MatchStrategy::New => "new",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Office,
    Owner,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Office => write!(f, "office"),
            EntityKind::Owner => write!(f, "owner"),
        }
    }
}

// ============================================================================
// RESOLUTION RESULT
// ============================================================================

/// Two or more candidates tied for the best score at or above the threshold.
/// Non-blocking: the lowest id is chosen and this is logged for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionAmbiguity {
    pub kind: EntityKind,
    pub chosen_id: i64,
    /// Every tied id, ascending (includes `chosen_id`)
    pub tied_ids: Vec<i64>,
    pub score: f64,
}

impl fmt::Display for ResolutionAmbiguity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidates {:?} tied at {:.3}, chose {}",
            self.kind, self.tied_ids, self.score, self.chosen_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// None → create a new entity
    pub entity_id: Option<i64>,

    /// Score of the chosen candidate (best score seen when none qualified)
    pub score: f64,

    pub strategy: MatchStrategy,

    pub ambiguity: Option<ResolutionAmbiguity>,
}

impl Resolution {
    fn new_entity(best_score: f64) -> Self {
        Resolution {
            entity_id: None,
            score: best_score,
            strategy: MatchStrategy::New,
            ambiguity: None,
        }
    }

    pub fn is_new(&self) -> bool {
        self.entity_id.is_none()
    }
}

// ============================================================================
// IDENTITY RESOLVER
// ============================================================================

pub struct IdentityResolver {
    /// Office acceptance threshold (default: 0.85)
    pub office_match_threshold: f64,

    /// Owner acceptance threshold (default: 0.85)
    pub owner_match_threshold: f64,
}

impl IdentityResolver {
    pub fn new(config: &MatchingConfig) -> Self {
        IdentityResolver {
            office_match_threshold: config.office_match_threshold,
            owner_match_threshold: config.owner_match_threshold,
        }
    }

    /// Resolve an office.
    ///
    /// `bound_office` is the office the record's EFIN is already bound to,
    /// if any. It wins regardless of text.
    pub fn resolve_office(
        &self,
        bound_office: Option<i64>,
        info: &OfficeInfo,
        candidates: &[OfficeEntity],
    ) -> Resolution {
        if let Some(id) = bound_office {
            debug!(office_id = id, "office resolved by EFIN binding");
            return Resolution {
                entity_id: Some(id),
                score: 1.0,
                strategy: MatchStrategy::ExactEfin,
                ambiguity: None,
            };
        }

        let scored = candidates
            .iter()
            .map(|office| (office.id, self.office_score(info, office)));
        let resolution = pick_best(
            EntityKind::Office,
            scored,
            self.office_match_threshold,
        );

        debug!(
            office = %info.office_name,
            strategy = resolution.strategy.as_str(),
            score = resolution.score,
            "office resolved"
        );
        resolution
    }

    /// Resolve an owner by name, with SSN as a hard signal when both sides have one
    pub fn resolve_owner(&self, info: &OwnerInfo, candidates: &[OwnerEntity]) -> Resolution {
        let scored = candidates
            .iter()
            .filter_map(|owner| self.owner_score(info, owner).map(|score| (owner.id, score)));
        let resolution = pick_best(EntityKind::Owner, scored, self.owner_match_threshold);

        debug!(
            owner = %info.full_name(),
            strategy = resolution.strategy.as_str(),
            score = resolution.score,
            "owner resolved"
        );
        resolution
    }

    /// 0.6 × name similarity + 0.4 × address similarity
    pub fn office_score(&self, info: &OfficeInfo, office: &OfficeEntity) -> f64 {
        weighted_office_score(
            &info.office_name,
            &info.address_line(),
            &office.name,
            &office.address_line(),
        )
    }

    /// Name similarity, or:
    /// - Some(1.0) when both SSNs are known and equal
    /// - None (not a candidate) when both are known and differ
    pub fn owner_score(&self, info: &OwnerInfo, owner: &OwnerEntity) -> Option<f64> {
        match (info.ssn_digits(), owner.ssn.as_deref()) {
            (Some(incoming), Some(stored)) if incoming == stored => Some(1.0),
            (Some(_), Some(_)) => None,
            _ => Some(text_similarity(&info.full_name(), &owner.full_name())),
        }
    }

    // ========================================================================
    // LINKAGE (used to keep dependent records on one worker)
    // ========================================================================

    /// Could `info` resolve to this stored office?
    pub fn office_may_match(&self, info: &OfficeInfo, office: &OfficeEntity) -> bool {
        self.office_score(info, office) >= self.office_match_threshold
    }

    /// Could two incoming offices end up as the same entity?
    pub fn offices_may_merge(&self, a: &OfficeInfo, b: &OfficeInfo) -> bool {
        weighted_office_score(&a.office_name, &a.address_line(), &b.office_name, &b.address_line())
            >= self.office_match_threshold
    }

    /// Could `info` resolve to this stored owner?
    ///
    /// Looser than `owner_score`: the SSN exclusion is ignored because an
    /// update without SSN keeps the stored one while replacing the name.
    pub fn owner_may_match(&self, info: &OwnerInfo, owner: &OwnerEntity) -> bool {
        let same_ssn = matches!(
            (info.ssn_digits(), owner.ssn.as_deref()),
            (Some(incoming), Some(stored)) if incoming == stored
        );
        same_ssn || text_similarity(&info.full_name(), &owner.full_name()) >= self.owner_match_threshold
    }

    /// Could two incoming owners end up as the same entity?
    pub fn owners_may_merge(&self, a: &OwnerInfo, b: &OwnerInfo) -> bool {
        let same_ssn = matches!(
            (a.ssn_digits(), b.ssn_digits()),
            (Some(x), Some(y)) if x == y
        );
        same_ssn || text_similarity(&a.full_name(), &b.full_name()) >= self.owner_match_threshold
    }
}

fn weighted_office_score(name_a: &str, address_a: &str, name_b: &str, address_b: &str) -> f64 {
    let name = business_name_similarity(name_a, name_b);
    let address = address_similarity(address_a, address_b);
    OFFICE_NAME_WEIGHT * name + OFFICE_ADDRESS_WEIGHT * address
}

/// Highest score ≥ threshold wins; ties go to the lowest id
fn pick_best(
    kind: EntityKind,
    scored: impl Iterator<Item = (i64, f64)>,
    threshold: f64,
) -> Resolution {
    let scored: Vec<(i64, f64)> = scored.collect();

    let best = scored
        .iter()
        .map(|(_, score)| *score)
        .fold(0.0_f64, f64::max);

    if scored.is_empty() || best < threshold {
        return Resolution::new_entity(best);
    }

    let mut tied: Vec<i64> = scored
        .iter()
        .filter(|(_, score)| (best - score).abs() < TIE_EPSILON)
        .map(|(id, _)| *id)
        .collect();
    tied.sort_unstable();
    tied.dedup();

    let chosen_id = tied[0];
    let ambiguity = if tied.len() > 1 {
        Some(ResolutionAmbiguity {
            kind,
            chosen_id,
            tied_ids: tied,
            score: best,
        })
    } else {
        None
    };

    Resolution {
        entity_id: Some(chosen_id),
        score: best,
        strategy: MatchStrategy::Fuzzy,
        ambiguity,
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(&MatchingConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn office_info(name: &str, address1: &str) -> OfficeInfo {
        OfficeInfo {
            office_name: name.to_string(),
            address1: address1.to_string(),
            city: "Dallas".to_string(),
            state: "TX".to_string(),
            zip: "75201".to_string(),
            ..Default::default()
        }
    }

    fn office(id: i64, name: &str, address1: &str) -> OfficeEntity {
        let mut entity = OfficeEntity::from_info("", &office_info(name, address1));
        entity.id = id;
        entity
    }

    fn owner_info(first: &str, last: &str, ssn: &str) -> OwnerInfo {
        OwnerInfo {
            first_name: first.to_string(),
            last_name: last.to_string(),
            ssn: ssn.to_string(),
            ..Default::default()
        }
    }

    fn owner(id: i64, first: &str, last: &str, ssn: &str) -> OwnerEntity {
        let mut entity = OwnerEntity::from_info(&owner_info(first, last, ssn));
        entity.id = id;
        entity
    }

    #[test]
    fn test_efin_binding_beats_text() {
        let resolver = IdentityResolver::default();
        let candidates = vec![office(1, "Smith Tax Service", "100 Main St")];

        let resolution = resolver.resolve_office(
            Some(7),
            &office_info("Totally Different Name", "9 Elsewhere Rd"),
            &candidates,
        );
        assert_eq!(resolution.entity_id, Some(7));
        assert_eq!(resolution.strategy, MatchStrategy::ExactEfin);
    }

    #[test]
    fn test_fuzzy_office_match_above_threshold() {
        let resolver = IdentityResolver::default();
        let candidates = vec![
            office(1, "Jones Accounting", "5 Oak Ave"),
            office(2, "Smith Tax Service LLC", "100 Main Street"),
        ];

        let resolution =
            resolver.resolve_office(None, &office_info("SMITH TAX SERVICE", "100 Main St"), &candidates);
        assert_eq!(resolution.entity_id, Some(2));
        assert_eq!(resolution.strategy, MatchStrategy::Fuzzy);
        assert!(resolution.score > 0.99);
        assert!(resolution.ambiguity.is_none());
    }

    #[test]
    fn test_below_threshold_is_new_office() {
        let resolver = IdentityResolver::default();
        let candidates = vec![office(1, "Smith Tax Service", "100 Main St")];

        let resolution =
            resolver.resolve_office(None, &office_info("Jones Accounting Group", "5 Oak Ave"), &candidates);
        assert!(resolution.is_new());
        assert_eq!(resolution.strategy, MatchStrategy::New);
        assert!(resolution.score < 0.85);
    }

    #[test]
    fn test_no_candidates_is_new() {
        let resolver = IdentityResolver::default();
        let resolution = resolver.resolve_office(None, &office_info("Smith Tax", "100 Main St"), &[]);
        assert!(resolution.is_new());
        assert_eq!(resolution.score, 0.0);
    }

    #[test]
    fn test_tie_goes_to_lowest_id_and_is_flagged() {
        let resolver = IdentityResolver::default();
        let candidates = vec![
            office(9, "Smith Tax Service", "100 Main St"),
            office(4, "Smith Tax Service", "100 Main St"),
        ];

        let resolution =
            resolver.resolve_office(None, &office_info("Smith Tax Service", "100 Main St"), &candidates);
        assert_eq!(resolution.entity_id, Some(4));
        let ambiguity = resolution.ambiguity.unwrap();
        assert_eq!(ambiguity.kind, EntityKind::Office);
        assert_eq!(ambiguity.chosen_id, 4);
        assert_eq!(ambiguity.tied_ids, vec![4, 9]);
    }

    #[test]
    fn test_threshold_comes_from_config() {
        let strict = IdentityResolver::new(&MatchingConfig {
            office_match_threshold: 1.0,
            owner_match_threshold: 1.0,
        });
        let candidates = vec![office(1, "Smith Tax Service", "100 Main St")];

        let resolution =
            strict.resolve_office(None, &office_info("Smith Tax Servce", "100 Main St"), &candidates);
        assert!(resolution.is_new());
    }

    #[test]
    fn test_owner_same_ssn_is_exact() {
        let resolver = IdentityResolver::default();
        let candidates = vec![owner(3, "Jonathan", "Smithers", "123456789")];

        let resolution = resolver.resolve_owner(&owner_info("Jon", "Smith", "123-45-6789"), &candidates);
        assert_eq!(resolution.entity_id, Some(3));
        assert_eq!(resolution.score, 1.0);
    }

    #[test]
    fn test_owner_different_ssn_is_excluded() {
        let resolver = IdentityResolver::default();
        let candidates = vec![owner(3, "John", "Smith", "123456789")];

        let resolution = resolver.resolve_owner(&owner_info("John", "Smith", "987654321"), &candidates);
        assert!(resolution.is_new());
    }

    #[test]
    fn test_owner_name_match_without_ssn() {
        let resolver = IdentityResolver::default();
        let candidates = vec![owner(3, "John", "Smith", "123456789"), owner(5, "Mary", "Jones", "")];

        let resolution = resolver.resolve_owner(&owner_info("JOHN", "SMITH", ""), &candidates);
        assert_eq!(resolution.entity_id, Some(3));
        assert_eq!(resolution.strategy, MatchStrategy::Fuzzy);
    }

    #[test]
    fn test_linkage_is_looser_than_resolution() {
        let resolver = IdentityResolver::default();

        // Different SSNs never resolve together but may still share a worker
        let stored = owner(3, "John", "Smith", "111111111");
        let other_ssn = owner_info("John", "Smith", "222222222");
        assert!(resolver.resolve_owner(&other_ssn, &[stored.clone()]).is_new());
        assert!(resolver.owner_may_match(&other_ssn, &stored));

        assert!(resolver.owners_may_merge(&owner_info("Jon", "Smith", ""), &owner_info("John", "Smith", "111111111")));
        assert!(resolver.owners_may_merge(&owner_info("Ann", "Able", "123456789"), &owner_info("Zed", "Zulu", "123-45-6789")));
        assert!(!resolver.owners_may_merge(&owner_info("Ann", "Able", ""), &owner_info("Bob", "Baker", "")));

        assert!(resolver.offices_may_merge(
            &office_info("Smith Tax Service LLC", "100 Main Street"),
            &office_info("SMITH TAX SERVICE", "100 Main St"),
        ));
        assert!(!resolver.offices_may_merge(
            &office_info("Smith Tax Service", "100 Main St"),
            &office_info("Jones Accounting Group", "5 Oak Ave"),
        ));
        assert!(resolver.office_may_match(
            &office_info("SMITH TAX SERVICE", "100 Main St"),
            &office(2, "Smith Tax Service LLC", "100 Main Street"),
        ));
    }
}
