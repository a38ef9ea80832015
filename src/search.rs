//! Full-text filter over already loaded packages using SQLite FTS5

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rusqlite::{Connection, params};

use crate::error::Result;
use crate::types::Package;

/// SQLite FTS5 search index for packages
pub struct SearchIndex {
    conn: Connection,
    indexed: usize,
}

impl SearchIndex {
    pub fn new() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS packages USING fts5(key UNINDEXED, name, summary)",
            [],
        )?;
        Ok(Self { conn, indexed: 0 })
    }

    /// Number of packages in the index
    pub fn len(&self) -> usize {
        self.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }

    /// Rebuild the index from `packages`
    pub fn build<'a>(&mut self, packages: impl Iterator<Item = &'a Package>) -> Result<(usize, Duration)> {
        let start = Instant::now();
        let mut count = 0;

        // One transaction for the bulk insert
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM packages", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO packages (key, name, summary) VALUES (?, ?, ?)")?;
            for pkg in packages {
                stmt.execute(params![pkg.key, pkg.id.name, pkg.summary])?;
                count += 1;
            }
        }
        tx.commit()?;

        self.indexed = count;
        log::debug!("indexed {count} packages in {:?}", start.elapsed());
        Ok((count, start.elapsed()))
    }

    /// Keys of packages matching every word of `query` as a prefix
    pub fn search(&self, query: &str) -> Result<HashSet<String>> {
        let mut results = HashSet::new();

        let Some(fts_query) = fts_query(query) else {
            return Ok(results);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT key FROM packages WHERE packages MATCH ?")?;
        let rows = stmt.query_map([&fts_query], |row| row.get::<_, String>(0))?;
        for key in rows {
            results.insert(key?);
        }

        Ok(results)
    }
}

/// Quote each word so `-`, `+` and `.` in package names are not FTS syntax
fn fts_query(query: &str) -> Option<String> {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|word| word.replace('"', ""))
        .filter(|word| !word.is_empty())
        .map(|word| format!("\"{word}\"*"))
        .collect();
    (!words.is_empty()).then(|| words.join(" "))
}
