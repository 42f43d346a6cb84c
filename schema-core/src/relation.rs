//! Relation kinds, relation descriptors and the cross-database classifier.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::table::{DatabaseRef, TableRef};

/// How two tables are related.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelKind {
    #[default]
    None,
    OneToOne,
    OneToMany,
    Polymorphic,
    Recursive,
    Embedded,
    Remote,
    Skip,
    /// The two sides live in different databases and are joined by the gateway.
    DatabaseJoin,
}

impl RelKind {
    pub const ALL: [RelKind; 9] = [
        RelKind::None,
        RelKind::OneToOne,
        RelKind::OneToMany,
        RelKind::Polymorphic,
        RelKind::Recursive,
        RelKind::Embedded,
        RelKind::Remote,
        RelKind::Skip,
        RelKind::DatabaseJoin,
    ];

    /// Canonical diagnostic name.
    pub fn name(self) -> &'static str {
        match self {
            RelKind::None => "RelNone",
            RelKind::OneToOne => "RelOneToOne",
            RelKind::OneToMany => "RelOneToMany",
            RelKind::Polymorphic => "RelPolymorphic",
            RelKind::Recursive => "RelRecursive",
            RelKind::Embedded => "RelEmbedded",
            RelKind::Remote => "RelRemote",
            RelKind::Skip => "RelSkip",
            RelKind::DatabaseJoin => "RelDatabaseJoin",
        }
    }
}

impl fmt::Display for RelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One end of a relation: a table and the columns taking part in the join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelSide {
    pub table: TableRef,
    #[serde(default)]
    pub columns: Vec<String>,
}

impl RelSide {
    pub fn new<I, S>(table: TableRef, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// A directed edge from `left` to `right`.
///
/// Inverse edges are never implied; callers that need to walk both ways
/// insert both relations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    #[serde(default)]
    pub kind: RelKind,
    pub left: RelSide,
    pub right: RelSide,
}

impl Relation {
    pub fn new(kind: RelKind, left: RelSide, right: RelSide) -> Self {
        Self { kind, left, right }
    }

    /// The same relation walked from the other side.
    pub fn inverse(&self) -> Self {
        Self {
            kind: self.kind,
            left: self.right.clone(),
            right: self.left.clone(),
        }
    }

    pub fn is_self_reference(&self) -> bool {
        self.left.table == self.right.table
    }

    pub fn touches(&self, table: &TableRef) -> bool {
        self.left.table == *table || self.right.table == *table
    }

    pub fn is_cross_database(&self) -> bool {
        is_cross_database(self)
    }
}

/// True when both sides name a database and the names differ.
///
/// The default database (empty name) never counts as a cross. `kind` is not
/// consulted.
pub fn is_cross_database(rel: &Relation) -> bool {
    match (
        rel.left.table.database_ref(),
        rel.right.table.database_ref(),
    ) {
        (DatabaseRef::Named(l), DatabaseRef::Named(r)) => l != r,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(kind: RelKind, left_db: &str, right_db: &str) -> Relation {
        Relation::new(
            kind,
            RelSide::new(TableRef::new(left_db, "public", "users"), ["id"]),
            RelSide::new(TableRef::new(right_db, "public", "events"), ["user_id"]),
        )
    }

    #[test]
    fn test_default_kind_is_none() {
        assert_eq!(RelKind::default(), RelKind::None);
        assert_ne!(RelKind::DatabaseJoin, RelKind::None);
    }

    #[test]
    fn test_kinds_are_distinct() {
        for (i, a) in RelKind::ALL.iter().enumerate() {
            for b in &RelKind::ALL[i + 1..] {
                assert_ne!(a, b);
                assert_ne!(a.name(), b.name());
            }
        }
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(RelKind::DatabaseJoin.to_string(), "RelDatabaseJoin");
        assert_eq!(RelKind::None.to_string(), "RelNone");
        assert_eq!(RelKind::OneToMany.to_string(), "RelOneToMany");
    }

    #[test]
    fn test_cross_database_classification() {
        assert!(rel(RelKind::None, "main", "analytics").is_cross_database());
        assert!(!rel(RelKind::None, "main", "").is_cross_database());
        assert!(!rel(RelKind::None, "", "analytics").is_cross_database());
        assert!(!rel(RelKind::None, "", "").is_cross_database());
        assert!(rel(RelKind::None, "Main", "main").is_cross_database());
    }

    #[test]
    fn test_classifier_ignores_kind() {
        assert!(!rel(RelKind::DatabaseJoin, "main", "main").is_cross_database());
        assert!(rel(RelKind::OneToMany, "main", "analytics").is_cross_database());
    }

    #[test]
    fn test_inverse_and_self_reference() {
        let r = rel(RelKind::OneToMany, "main", "analytics");
        let inv = r.inverse();
        assert_eq!(inv.left, r.right);
        assert_eq!(inv.right, r.left);
        assert_eq!(inv.kind, r.kind);
        assert!(!r.is_self_reference());

        let users = TableRef::new("main", "public", "users");
        let recursive = Relation::new(
            RelKind::Recursive,
            RelSide::new(users.clone(), ["id"]),
            RelSide::new(users, ["manager_id"]),
        );
        assert!(recursive.is_self_reference());
        assert!(!recursive.is_cross_database());
    }

    #[test]
    fn test_kind_serde_names() {
        let json = serde_json::to_string(&RelKind::DatabaseJoin).unwrap();
        assert_eq!(json, "\"database_join\"");
        let back: RelKind = serde_json::from_str("\"one_to_one\"").unwrap();
        assert_eq!(back, RelKind::OneToOne);
    }
}
