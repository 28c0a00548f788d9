//! Per-record routing: skip, update, create, delete or reject.
//!
//! The optimization check compares a record with the link it would refresh.
//! A missing display name on the record means "unknown", not "changed".

use std::collections::BTreeSet;

use iga_core::{values_as_strings, Link};
use serde_json::Value;

use crate::record::ResourceObject;

/// What to do with one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The record reports the account as gone; the link is removed.
    Delete,
    /// The record cannot be placed. Carries the message for the task result.
    CorrelationError(String),
    /// Nothing changed; only the link's refresh date is touched.
    Optimized,
    /// Refresh the existing link and its identity.
    Update,
    /// No link yet; correlate or create an identity and attach a new link.
    Create,
}

/// Routes a record given its current link, if any.
///
/// `multiplexed` is set when the record joins an identity already open for
/// an earlier record with the same multiplex key. Partial records may attach
/// to such an identity; otherwise they must resolve to an existing link.
#[must_use]
pub fn decide(
    record: &ResourceObject,
    existing: Option<&Link>,
    multiplexed: bool,
    optimize: bool,
    exclusions: &BTreeSet<String>,
) -> GateDecision {
    if record.is_delete() {
        return GateDecision::Delete;
    }
    match existing {
        None if record.is_partial() && !multiplexed => GateDecision::CorrelationError(format!(
            "{} record {} matches no existing account",
            if record.sparse { "sparse" } else { "incremental" },
            record.native().unwrap_or_default()
        )),
        None => GateDecision::Create,
        Some(link) if optimize && is_optimizeable(record, link, exclusions) => {
            GateDecision::Optimized
        }
        Some(_) => GateDecision::Update,
    }
}

/// Whether applying the record to `link` would change nothing.
#[must_use]
pub fn is_optimizeable(record: &ResourceObject, link: &Link, exclusions: &BTreeSet<String>) -> bool {
    if record.is_delete() || record.remove {
        return false;
    }
    if let Some(display_name) = &record.display_name {
        if link.display_name.as_ref() != Some(display_name) {
            return false;
        }
    }
    if let Some(uuid) = &record.uuid {
        if link.uuid.as_ref() != Some(uuid) {
            return false;
        }
    }

    let changed = record
        .attributes
        .iter()
        .filter(|(name, _)| !exclusions.contains(*name))
        .any(|(name, value)| normalized(Some(value)) != normalized(link.attributes.get(name)));
    if changed {
        return false;
    }

    if !record.is_partial() {
        let removed = link
            .attributes
            .iter()
            .filter(|(name, _)| !exclusions.contains(*name))
            .filter(|(name, _)| !record.attributes.contains_key(*name))
            .any(|(_, value)| normalized(Some(value)).is_some());
        if removed {
            return false;
        }
    }
    true
}

/// Order-insensitive string form of a value. Empty collapses to `None`.
fn normalized(value: Option<&Value>) -> Option<Vec<String>> {
    let mut values = value.map(values_as_strings).unwrap_or_default();
    if values.is_empty() {
        return None;
    }
    values.sort();
    Some(values)
}

/// The key grouping contiguous records of one identity.
#[must_use]
pub fn multiplex_key(record: &ResourceObject, multiplex_attribute: Option<&str>) -> Option<String> {
    multiplex_attribute
        .and_then(|attribute| record.string_attribute(attribute))
        .or_else(|| record.native().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use iga_core::{ApplicationId, IdentityId};
    use serde_json::json;

    fn link() -> Link {
        let mut link = Link::new(IdentityId::new(), ApplicationId::new(), "u1");
        link.display_name = Some("User One".to_string());
        link.attributes.insert("groups".to_string(), json!(["b", "a"]));
        link.attributes.insert("mail".to_string(), json!("u1@example.com"));
        link
    }

    fn record() -> ResourceObject {
        ResourceObject::account("u1")
            .with_display_name("User One")
            .with_attribute("groups", json!(["a", "b"]))
            .with_attribute("mail", "u1@example.com")
    }

    #[test]
    fn test_unchanged_record_is_optimized() {
        let decision = decide(&record(), Some(&link()), false, true, &BTreeSet::new());
        assert_eq!(decision, GateDecision::Optimized);
    }

    #[test]
    fn test_optimization_can_be_disabled() {
        let decision = decide(&record(), Some(&link()), false, false, &BTreeSet::new());
        assert_eq!(decision, GateDecision::Update);
    }

    #[test]
    fn test_missing_display_name_is_unknown() {
        let mut record = record();
        record.display_name = None;
        assert!(is_optimizeable(&record, &link(), &BTreeSet::new()));
    }

    #[test]
    fn test_new_uuid_is_a_change() {
        let record = record().with_uuid("guid-1");
        assert!(!is_optimizeable(&record, &link(), &BTreeSet::new()));
    }

    #[test]
    fn test_removed_attribute_detected_for_full_records_only() {
        let mut record = record();
        record.attributes.remove("mail");
        assert!(!is_optimizeable(&record, &link(), &BTreeSet::new()));

        record.sparse = true;
        assert!(is_optimizeable(&record, &link(), &BTreeSet::new()));
    }

    #[test]
    fn test_excluded_attributes_are_ignored() {
        let record = record().with_attribute("mux", "X");
        let exclusions: BTreeSet<String> = ["mux".to_string()].into();
        assert!(is_optimizeable(&record, &link(), &exclusions));
        assert!(!is_optimizeable(&record, &link(), &BTreeSet::new()));
    }

    #[test]
    fn test_partial_record_without_account_is_a_correlation_error() {
        let record = ResourceObject::account("u9").sparse();
        assert!(matches!(
            decide(&record, None, false, true, &BTreeSet::new()),
            GateDecision::CorrelationError(_)
        ));
        assert_eq!(decide(&record, None, true, true, &BTreeSet::new()), GateDecision::Create);
    }

    #[test]
    fn test_delete_wins() {
        let record = record().deleted();
        assert_eq!(decide(&record, Some(&link()), false, true, &BTreeSet::new()), GateDecision::Delete);
    }

    #[test]
    fn test_multiplex_key_falls_back_to_native_identity() {
        let record = ResourceObject::account("u1").with_attribute("mux", "X");
        assert_eq!(multiplex_key(&record, Some("mux")).as_deref(), Some("X"));
        assert_eq!(multiplex_key(&record, None).as_deref(), Some("u1"));
        assert_eq!(multiplex_key(&record, Some("other")).as_deref(), Some("u1"));
    }
}
