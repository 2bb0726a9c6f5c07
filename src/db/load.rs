use serde::Serialize;
use sqlx::PgPool;

use crate::error::StoreError;

/// Bulk-insert documents with COPY FROM STDIN (text format).
///
/// Intended for seeding an empty store; a key that already exists fails the
/// whole load.
pub async fn load_documents<K, T>(
    pool: &PgPool,
    docs: impl IntoIterator<Item = (K, T)>,
) -> Result<u64, StoreError>
where
    K: AsRef<str>,
    T: Serialize,
{
    let mut buf = String::new();
    let mut count = 0;
    for (key, doc) in docs {
        let json = serde_json::to_string(&doc).map_err(|source| StoreError::Malformed {
            key: key.as_ref().to_string(),
            source,
        })?;
        buf.push_str(&escape(key.as_ref()));
        buf.push('\t');
        buf.push_str(&escape(&json));
        buf.push('\n');
        count += 1;
    }

    let mut conn = pool.acquire().await?;
    let mut copy = conn
        .copy_in_raw("COPY documents (key, doc) FROM STDIN")
        .await?;
    copy.send(buf.as_bytes()).await?;
    copy.finish().await?;
    Ok(count)
}

/// Escape a string for Postgres COPY text format.
/// Backslash must be escaped first, then the special whitespace characters.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}
