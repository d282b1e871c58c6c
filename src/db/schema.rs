//! Remote schema for the `memories` and `recent_messages` tables.
//!
//! Every statement uses `IF NOT EXISTS` so initialization is idempotent and
//! safe to run on every startup.

pub const MEMORIES_TABLE: &str = "memories";
pub const RECENT_TABLE: &str = "recent_messages";

/// Name of the unique (owner, text) index; violations surface as duplicates.
pub const MEMORIES_UNIQUE_INDEX: &str = "memories_owner_text";

/// DDL for both tables with the vector field pinned to `dimension`.
pub fn schema_sql(dimension: usize) -> String {
    format!(
        r#"
DEFINE TABLE IF NOT EXISTS {MEMORIES_TABLE} SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS user_id ON {MEMORIES_TABLE} TYPE string;
DEFINE FIELD IF NOT EXISTS text ON {MEMORIES_TABLE} TYPE string;
DEFINE FIELD IF NOT EXISTS timestamp ON {MEMORIES_TABLE} TYPE int;
DEFINE FIELD IF NOT EXISTS vector ON {MEMORIES_TABLE} TYPE array<float> ASSERT array::len($value) == {dimension};
DEFINE INDEX IF NOT EXISTS memories_owner ON {MEMORIES_TABLE} FIELDS user_id;
DEFINE INDEX IF NOT EXISTS {MEMORIES_UNIQUE_INDEX} ON {MEMORIES_TABLE} FIELDS user_id, text UNIQUE;
DEFINE INDEX IF NOT EXISTS memories_vector ON {MEMORIES_TABLE} FIELDS vector MTREE DIMENSION {dimension} DIST COSINE;

DEFINE TABLE IF NOT EXISTS {RECENT_TABLE} SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS user_id ON {RECENT_TABLE} TYPE string;
DEFINE FIELD IF NOT EXISTS text ON {RECENT_TABLE} TYPE string;
DEFINE FIELD IF NOT EXISTS timestamp ON {RECENT_TABLE} TYPE int;
DEFINE INDEX IF NOT EXISTS recent_owner ON {RECENT_TABLE} FIELDS user_id;
"#
    )
}
