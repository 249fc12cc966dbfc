//! Short links for sharing archive paths.
//!
//! Recordings get their video id as short path; anything else gets a random
//! token that is reused for repeated requests of the same long path.

use std::{path::Path, sync::LazyLock};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use libsql::{Builder, Connection, params};
use rand_core::{OsRng, RngCore};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

pub const LINKS_DB_FILE: &str = "links.db";
const TOKEN_LENGTH: usize = 28;
const TOKEN_ALPHABET: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890-_";

static VIDEO_PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".+ \[.+\] \((?<id>[A-Za-z0-9_-]{11})\)$").expect("video path pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortLink {
    pub short_path: String,
    pub long_path: String,
    pub created_at: String,
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS short_links (
            short_path TEXT PRIMARY KEY,
            long_path TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_short_links_long_path ON short_links(long_path);
        "#,
    )
    .await?;
    Ok(())
}

pub struct LinkStore {
    conn: Connection,
}

impl LinkStore {
    /// Opens (and if necessary creates) the links DB.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating links directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening links DB {}", path.display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Returns the short path for `long_path`, creating it when needed.
    pub async fn shorten(&self, long_path: &str) -> Result<String> {
        let decoded = urlencoding::decode(long_path)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| long_path.to_string());

        if let Some(captures) = VIDEO_PATH_PATTERN.captures(&decoded) {
            let video_id = captures["id"].to_string();
            self.upsert(&video_id, &decoded).await?;
            return Ok(video_id);
        }

        if let Some(existing) = self.find_by_long_path(&decoded).await? {
            return Ok(existing);
        }

        let mut short_path = random_token();
        while self.get(&short_path).await?.is_some() {
            short_path = random_token();
        }
        self.upsert(&short_path, &decoded).await?;
        Ok(short_path)
    }

    pub async fn get(&self, short_path: &str) -> Result<Option<ShortLink>> {
        let stmt = self
            .conn
            .prepare(
                r#"
                SELECT short_path, long_path, created_at
                FROM short_links
                WHERE short_path = ?1
                "#,
            )
            .await?;
        let mut rows = stmt.query([short_path]).await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(ShortLink {
            short_path: row.get(0)?,
            long_path: row.get(1)?,
            created_at: row.get(2)?,
        }))
    }

    pub async fn resolve(&self, short_path: &str) -> Result<Option<String>> {
        Ok(self.get(short_path).await?.map(|link| link.long_path))
    }

    async fn find_by_long_path(&self, long_path: &str) -> Result<Option<String>> {
        let stmt = self
            .conn
            .prepare("SELECT short_path FROM short_links WHERE long_path = ?1 LIMIT 1")
            .await?;
        let mut rows = stmt.query([long_path]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, short_path: &str, long_path: &str) -> Result<()> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.conn
            .execute(
                r#"
                INSERT INTO short_links (short_path, long_path, created_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(short_path) DO UPDATE SET
                    long_path = excluded.long_path,
                    created_at = excluded.created_at
                "#,
                params![short_path, long_path, created_at],
            )
            .await
            .with_context(|| format!("storing short link {short_path}"))?;
        debug!(short_path, long_path, "stored short link");
        Ok(())
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|byte| TOKEN_ALPHABET[usize::from(byte & 63)] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn create_store() -> Result<(tempfile::TempDir, LinkStore)> {
        let dir = tempdir()?;
        let store = LinkStore::open(&dir.path().join("data").join(LINKS_DB_FILE)).await?;
        Ok((dir, store))
    }

    #[tokio::test]
    async fn opens_store_in_wal_mode() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/links.db");
        let _store = LinkStore::open(&path).await?;
        assert!(path.exists());

        let db = Builder::new_local(&path).build().await?;
        let conn = db.connect()?;
        let mut rows = conn.query("PRAGMA journal_mode", params![]).await?;
        let row = rows.next().await?.context("missing journal_mode row")?;
        let journal: String = row.get(0)?;
        assert_eq!(journal.to_lowercase(), "wal");
        Ok(())
    }

    #[tokio::test]
    async fn video_paths_use_their_id() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let long = "/Ch/%5B20230115%5D%20Title%20%5BCh%5D%20(dQw4w9WgXcQ)";
        let short = store.shorten(long).await?;
        assert_eq!(short, "dQw4w9WgXcQ");
        assert_eq!(
            store.resolve("dQw4w9WgXcQ").await?.as_deref(),
            Some("/Ch/[20230115] Title [Ch] (dQw4w9WgXcQ)")
        );
        Ok(())
    }

    #[tokio::test]
    async fn video_id_links_are_overwritten() -> Result<()> {
        let (_dir, store) = create_store().await?;
        store.shorten("/old/T [C] (dQw4w9WgXcQ)").await?;
        store.shorten("/new/T [C] (dQw4w9WgXcQ)").await?;
        assert_eq!(
            store.resolve("dQw4w9WgXcQ").await?.as_deref(),
            Some("/new/T [C] (dQw4w9WgXcQ)")
        );
        Ok(())
    }

    #[tokio::test]
    async fn other_paths_get_a_stable_random_token() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let first = store.shorten("/Streams/2023").await?;
        assert_eq!(first.len(), TOKEN_LENGTH);
        assert!(first.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));

        let again = store.shorten("/Streams/2023").await?;
        assert_eq!(first, again);

        let other = store.shorten("/Streams/2024").await?;
        assert_ne!(first, other);

        let link = store.get(&first).await?.context("link should exist")?;
        assert_eq!(link.long_path, "/Streams/2023");
        assert!(chrono::DateTime::parse_from_rfc3339(&link.created_at).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_short_paths_resolve_to_none() -> Result<()> {
        let (_dir, store) = create_store().await?;
        assert!(store.resolve("missing").await?.is_none());
        Ok(())
    }
}
