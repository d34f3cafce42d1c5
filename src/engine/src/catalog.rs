use common::model::{ANONYMIZED_DISPLAY_NAME, ANONYMIZED_ID, ErasurePolicy, SubjectRole};

/// Error types for relation catalog construction
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate order {0} in relation catalog")]
    DuplicateOrder(u32),

    #[error("entity type '{0}' registered twice for overlapping roles")]
    OverlappingEntityType(String),
}

/// Static descriptor of one entity type that may reference a subject
///
/// `order` is a total order establishing the only valid execution
/// sequence; entries that write into other entries' owning collections
/// must carry a strictly earlier order.
#[derive(Debug, Clone)]
pub struct RelationEntry {
    /// Collection name in the document store
    pub entity_type: &'static str,
    /// Field holding the subject reference, queried by equality
    pub query_field: &'static str,
    pub policy: ErasurePolicy,
    pub order: u32,
    /// Roles this entry applies to; empty means every role
    pub roles: &'static [SubjectRole],
    /// Blob path prefix (joined with the subject id) for entity types
    /// that own binary assets; only meaningful for hard deletes
    pub blob_prefix: Option<&'static str>,
    /// (field, sentinel) pairs rewritten by the anonymize policy
    pub anonymize_fields: &'static [(&'static str, &'static str)],
    /// Foreign-key fields nulled by the detach policy
    pub detach_fields: &'static [&'static str],
}

impl RelationEntry {
    pub fn applies_to(&self, role: SubjectRole) -> bool {
        self.roles.is_empty() || self.roles.contains(&role)
    }

    /// Blob prefix for one subject, e.g. `avatars/s1`
    pub fn blob_prefix_for(&self, subject_id: &str) -> Option<String> {
        self.blob_prefix
            .map(|prefix| format!("{prefix}/{subject_id}"))
    }
}

/// Ordered registry of every entity type that may reference a subject
///
/// Adding a new entity type to the system requires adding exactly one
/// entry here; the cascade and the export both walk this registry, so a
/// missing entry is a silent gap in the erasure surface. The same entity
/// type may appear in more than one entry only when the entries' role
/// sets are explicitly listed and disjoint (a collection referencing
/// subjects through a different field per role), keeping one ledger key
/// per (subject, entity type).
#[derive(Debug, Clone)]
pub struct RelationCatalog {
    entries: Vec<RelationEntry>,
}

impl RelationCatalog {
    pub fn new(mut entries: Vec<RelationEntry>) -> Result<Self, CatalogError> {
        entries.sort_by_key(|entry| entry.order);

        for window in entries.windows(2) {
            if window[0].order == window[1].order {
                return Err(CatalogError::DuplicateOrder(window[0].order));
            }
        }

        for (i, a) in entries.iter().enumerate() {
            for b in entries.iter().skip(i + 1) {
                if a.entity_type != b.entity_type {
                    continue;
                }
                let disjoint = !a.roles.is_empty()
                    && !b.roles.is_empty()
                    && a.roles.iter().all(|role| !b.roles.contains(role));
                if !disjoint {
                    return Err(CatalogError::OverlappingEntityType(
                        a.entity_type.to_string(),
                    ));
                }
            }
        }

        Ok(Self { entries })
    }

    /// The full execution order
    pub fn entries(&self) -> &[RelationEntry] {
        &self.entries
    }

    /// Entries applicable to one subject role, in execution order
    pub fn entries_applicable_to(&self, role: SubjectRole) -> Vec<&RelationEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.applies_to(role))
            .collect()
    }

    pub fn entry_for(&self, entity_type: &str) -> Option<&RelationEntry> {
        self.entries
            .iter()
            .find(|entry| entry.entity_type == entity_type)
    }

    /// The catalog covering the production collection surface
    pub fn production() -> Result<Self, CatalogError> {
        use ErasurePolicy::{Anonymize, Detach, HardDelete};
        use SubjectRole::{Guardian, Scout};

        const AUTHOR_FIELDS: &[(&str, &str)] = &[
            ("authorId", ANONYMIZED_ID),
            ("authorName", ANONYMIZED_DISPLAY_NAME),
        ];

        Self::new(vec![
            RelationEntry {
                entity_type: "guardianLinks",
                query_field: "scoutId",
                policy: HardDelete,
                order: 10,
                roles: &[Scout],
                blob_prefix: None,
                anonymize_fields: &[],
                detach_fields: &[],
            },
            RelationEntry {
                entity_type: "guardianLinks",
                query_field: "guardianId",
                policy: HardDelete,
                order: 11,
                roles: &[Guardian],
                blob_prefix: None,
                anonymize_fields: &[],
                detach_fields: &[],
            },
            RelationEntry {
                entity_type: "leaderboardEntries",
                query_field: "subjectId",
                policy: Detach,
                order: 20,
                roles: &[],
                blob_prefix: None,
                anonymize_fields: &[],
                detach_fields: &["subjectId", "displayName"],
            },
            RelationEntry {
                entity_type: "channelMessages",
                query_field: "authorId",
                policy: Anonymize,
                order: 30,
                roles: &[],
                blob_prefix: None,
                anonymize_fields: AUTHOR_FIELDS,
                detach_fields: &[],
            },
            RelationEntry {
                entity_type: "channelPosts",
                query_field: "authorId",
                policy: Anonymize,
                order: 40,
                roles: &[],
                blob_prefix: None,
                anonymize_fields: AUTHOR_FIELDS,
                detach_fields: &[],
            },
            RelationEntry {
                entity_type: "comments",
                query_field: "authorId",
                policy: Anonymize,
                order: 50,
                roles: &[],
                blob_prefix: None,
                anonymize_fields: AUTHOR_FIELDS,
                detach_fields: &[],
            },
            RelationEntry {
                entity_type: "challengeSubmissions",
                query_field: "subjectId",
                policy: HardDelete,
                order: 60,
                roles: &[Scout],
                blob_prefix: Some("submissions"),
                anonymize_fields: &[],
                detach_fields: &[],
            },
            RelationEntry {
                entity_type: "healthRecords",
                query_field: "subjectId",
                policy: HardDelete,
                order: 70,
                roles: &[Scout],
                blob_prefix: None,
                anonymize_fields: &[],
                detach_fields: &[],
            },
            RelationEntry {
                entity_type: "profiles",
                query_field: "subjectId",
                policy: HardDelete,
                order: 80,
                roles: &[],
                blob_prefix: Some("avatars"),
                anonymize_fields: &[],
                detach_fields: &[],
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(entity_type: &'static str, order: u32, roles: &'static [SubjectRole]) -> RelationEntry {
        RelationEntry {
            entity_type,
            query_field: "subjectId",
            policy: ErasurePolicy::HardDelete,
            order,
            roles,
            blob_prefix: None,
            anonymize_fields: &[],
            detach_fields: &[],
        }
    }

    #[test]
    fn test_production_catalog_is_valid_and_ordered() {
        let catalog = RelationCatalog::production().unwrap();
        let orders: Vec<u32> = catalog.entries().iter().map(|e| e.order).collect();
        let mut sorted = orders.clone();
        sorted.sort_unstable();
        assert_eq!(orders, sorted);

        // Relation detachment precedes identity deletion
        let links = catalog.entry_for("guardianLinks").unwrap();
        let profiles = catalog.entry_for("profiles").unwrap();
        assert!(links.order < profiles.order);
    }

    #[test]
    fn test_role_filtering() {
        let catalog = RelationCatalog::production().unwrap();

        let scout: Vec<&str> = catalog
            .entries_applicable_to(SubjectRole::Scout)
            .iter()
            .map(|e| e.entity_type)
            .collect();
        assert!(scout.contains(&"healthRecords"));
        assert!(scout.contains(&"profiles"));

        let leader: Vec<&str> = catalog
            .entries_applicable_to(SubjectRole::Leader)
            .iter()
            .map(|e| e.entity_type)
            .collect();
        assert!(!leader.contains(&"healthRecords"));
        assert!(!leader.contains(&"guardianLinks"));
        assert!(leader.contains(&"channelMessages"));
    }

    #[test]
    fn test_entries_sorted_regardless_of_input_order() {
        let catalog = RelationCatalog::new(vec![
            entry("b", 20, &[]),
            entry("a", 10, &[]),
        ])
        .unwrap();
        assert_eq!(catalog.entries()[0].entity_type, "a");
    }

    #[test]
    fn test_duplicate_order_rejected() {
        let result = RelationCatalog::new(vec![
            entry("a", 10, &[]),
            entry("b", 10, &[]),
        ]);
        assert!(matches!(result, Err(CatalogError::DuplicateOrder(10))));
    }

    #[test]
    fn test_same_entity_type_needs_disjoint_roles() {
        // Disjoint explicit role sets are allowed
        let ok = RelationCatalog::new(vec![
            entry("links", 10, &[SubjectRole::Scout]),
            entry("links", 11, &[SubjectRole::Guardian]),
        ]);
        assert!(ok.is_ok());

        // Overlapping roles collide on the ledger key
        let overlapping = RelationCatalog::new(vec![
            entry("links", 10, &[SubjectRole::Scout]),
            entry("links", 11, &[SubjectRole::Scout, SubjectRole::Guardian]),
        ]);
        assert!(matches!(
            overlapping,
            Err(CatalogError::OverlappingEntityType(_))
        ));

        // An empty role set applies to everyone, so it always overlaps
        let with_wildcard = RelationCatalog::new(vec![
            entry("links", 10, &[]),
            entry("links", 11, &[SubjectRole::Guardian]),
        ]);
        assert!(with_wildcard.is_err());
    }

    #[test]
    fn test_blob_prefix_for_subject() {
        let catalog = RelationCatalog::production().unwrap();
        let profiles = catalog.entry_for("profiles").unwrap();
        assert_eq!(profiles.blob_prefix_for("s1").unwrap(), "avatars/s1");

        let health = catalog.entry_for("healthRecords").unwrap();
        assert!(health.blob_prefix_for("s1").is_none());
    }
}
