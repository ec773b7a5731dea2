//! Identifier newtypes shared across the crate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl $name {
            /// Returns the raw SQLite rowid.
            #[must_use]
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Id of a row in the `resource` table.
    ResourceId
);
row_id!(
    /// Id of a row in the `root_resource` table.
    RootResourceId
);
row_id!(
    /// Id of a row in the `resource_group` table.
    ResourceGroupId
);
row_id!(
    /// Id of a row in the `resource_revision` table. Also names the body file.
    RevisionId
);

static NEXT_PROJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique token for an opened project.
///
/// Two `Project` handles opened from the same directory still get different ids;
/// entities are only valid inside the project instance that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectId(u64);

impl ProjectId {
    pub(crate) fn next() -> Self {
        Self(NEXT_PROJECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_ids_are_unique() {
        assert_ne!(ProjectId::next(), ProjectId::next());
    }

    #[test]
    fn test_row_id_display_is_raw_number() {
        assert_eq!(RevisionId(42).to_string(), "42");
        assert_eq!(ResourceId::from(7).get(), 7);
    }
}
