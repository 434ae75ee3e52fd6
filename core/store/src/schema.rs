//! Table layout of the cache file.

use offcache_common::BucketName;

/// Bumped when the layout below changes incompatibly.
pub const FORMAT_VERSION: &str = "2";

/// Prefix of per-bucket object tables.
pub const OBJECT_TABLE_PREFIX: &str = "obj_";

pub const META_TABLE: &str = "cache_meta";
pub const LOGIN_TABLE: &str = "login_cache";
pub const BUCKET_TABLE: &str = "bucket_cache";

pub(crate) mod meta {
    pub const FORMAT_VERSION: &str = "format_version";
    pub const TENANT_ID: &str = "tenant_id";
    pub const APP_ID: &str = "app_id";
    pub const KDF_SALT: &str = "kdf_salt";
    pub const KDF_PARAMS: &str = "kdf_params";
    pub const KEY_CHECK: &str = "key_check";
}

pub(crate) const META_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
"#;

pub(crate) const CACHE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS login_cache (
    username TEXT PRIMARY KEY,
    email BLOB,
    token BLOB NOT NULL,
    expires_at INTEGER NOT NULL,
    credential BLOB NOT NULL,
    cached_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS bucket_cache (
    bucket TEXT PRIMARY KEY,
    scope TEXT NOT NULL DEFAULT '',
    last_pull INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Unquoted name of the object table backing `bucket`.
pub fn object_table(bucket: &BucketName) -> String {
    format!("{}{}", OBJECT_TABLE_PREFIX, bucket.as_str())
}

/// Inverse of [`object_table`]. `None` for tables that are not object tables.
pub fn bucket_of_table(table: &str) -> Option<BucketName> {
    table
        .strip_prefix(OBJECT_TABLE_PREFIX)
        .and_then(|name| BucketName::new(name).ok())
}

pub(crate) fn object_table_ddl(bucket: &BucketName) -> String {
    let table = object_table(bucket);
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {t} (
    id TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    etag TEXT,
    sync_state INTEGER NOT NULL DEFAULT 1,
    deleted INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS {idx} ON {t}(sync_state);
"#,
        t = quote_ident(&table),
        idx = quote_ident(&format!("{}_sync_state", table)),
    )
}

/// Associated data binding a sealed payload to its row.
pub(crate) fn object_context(table: &str, id: &str) -> String {
    format!("{}/{}", table, id)
}

pub(crate) fn login_context(username: &str, column: &str) -> String {
    format!("{}/{}/{}", LOGIN_TABLE, username, column)
}

pub(crate) const KEY_CHECK_CONTEXT: &[u8] = b"cache_meta/key_check";
pub(crate) const KEY_CHECK_PLAINTEXT: &[u8] = b"offcache key check v1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("obj_a-b"), "\"obj_a-b\"");
        assert_eq!(quote_ident("x\"y"), "\"x\"\"y\"");
    }

    #[test]
    fn test_table_names() {
        let bucket = BucketName::new("my-notes").unwrap();
        assert_eq!(object_table(&bucket), "obj_my-notes");
        assert_eq!(bucket_of_table("obj_my-notes"), Some(bucket));
        assert_eq!(bucket_of_table("login_cache"), None);
    }
}
