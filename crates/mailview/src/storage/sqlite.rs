//! SQLite-backed preference store
//!
//! Persists saved searches and per-folder view preferences so they survive a
//! restart. Predicates and backing lists are stored as JSON text.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::PrefStore;
use crate::models::{
    AccountId, CombineMode, FolderId, SortSpec, ViewPrefs, VirtualFolder, VirtualFolderId,
};
use crate::predicate::PredicateNode;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Saved searches, listed in creation order (rowid)
            CREATE TABLE virtual_folders (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                parent TEXT,
                predicate TEXT NOT NULL,  -- JSON PredicateNode
                combine TEXT NOT NULL DEFAULT 'and',
                backing TEXT NOT NULL,    -- JSON array of folder ids
                sort TEXT,                -- JSON SortSpec
                threaded INTEGER
            );

            -- View preferences for real folders
            CREATE TABLE folder_view_prefs (
                folder_id TEXT PRIMARY KEY,
                sort TEXT,
                threaded INTEGER
            );
            "#,
        ),
        // Migration 2: Lookup by name within a parent
        M::up(
            r#"
            CREATE INDEX idx_virtual_folders_parent_name
                ON virtual_folders(parent, name COLLATE NOCASE);
            "#,
        ),
    ])
}

/// SQLite implementation of PrefStore
pub struct SqlitePrefStore {
    conn: Mutex<Connection>,
}

impl SqlitePrefStore {
    /// Open (or create) the preference database at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Preference database lock poisoned"))
    }
}

/// Raw `virtual_folders` row before JSON decoding
struct VirtualFolderRow {
    id: String,
    name: String,
    parent: Option<String>,
    predicate: String,
    combine: String,
    backing: String,
    sort: Option<String>,
    threaded: Option<bool>,
}

impl VirtualFolderRow {
    fn decode(self) -> Result<VirtualFolder> {
        let predicate: PredicateNode = serde_json::from_str(&self.predicate)
            .with_context(|| format!("Invalid predicate for virtual folder {}", self.id))?;
        let backing: Vec<FolderId> = serde_json::from_str(&self.backing)
            .with_context(|| format!("Invalid backing list for virtual folder {}", self.id))?;
        let combine = match self.combine.as_str() {
            "or" => CombineMode::Or,
            _ => CombineMode::And,
        };

        Ok(VirtualFolder {
            id: VirtualFolderId::new(self.id),
            name: self.name,
            parent: self.parent.map(AccountId::new),
            predicate,
            combine,
            backing,
            view: ViewPrefs {
                sort: decode_sort(self.sort.as_deref())?,
                threaded: self.threaded,
            },
        })
    }
}

fn decode_sort(sort: Option<&str>) -> Result<Option<SortSpec>> {
    sort.map(|s| serde_json::from_str(s).context("Invalid sort preference"))
        .transpose()
}

fn encode_sort(sort: Option<SortSpec>) -> Result<Option<String>> {
    Ok(sort.map(|s| serde_json::to_string(&s)).transpose()?)
}

impl PrefStore for SqlitePrefStore {
    fn load_virtual_folders(&self) -> Result<Vec<VirtualFolder>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, parent, predicate, combine, backing, sort, threaded
             FROM virtual_folders ORDER BY rowid",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(VirtualFolderRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    parent: row.get(2)?,
                    predicate: row.get(3)?,
                    combine: row.get(4)?,
                    backing: row.get(5)?,
                    sort: row.get(6)?,
                    threaded: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut folders = Vec::with_capacity(rows.len());
        for row in rows {
            match row.decode() {
                Ok(folder) => folders.push(folder),
                // A damaged record should not hide every other saved search
                Err(e) => warn!("[PREFS] Skipping virtual folder: {:#}", e),
            }
        }
        debug!("[PREFS] Loaded {} virtual folders", folders.len());
        Ok(folders)
    }

    fn save_virtual_folder(&self, folder: &VirtualFolder) -> Result<()> {
        let predicate = serde_json::to_string(&folder.predicate)?;
        let backing = serde_json::to_string(&folder.backing)?;
        let combine = match folder.combine {
            CombineMode::And => "and",
            CombineMode::Or => "or",
        };
        let sort = encode_sort(folder.view.sort)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO virtual_folders
             (id, name, parent, predicate, combine, backing, sort, threaded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                parent = excluded.parent,
                predicate = excluded.predicate,
                combine = excluded.combine,
                backing = excluded.backing,
                sort = excluded.sort,
                threaded = excluded.threaded",
            params![
                folder.id.as_str(),
                folder.name,
                folder.parent.as_ref().map(|p| p.as_str()),
                predicate,
                combine,
                backing,
                sort,
                folder.view.threaded,
            ],
        )
        .with_context(|| format!("Failed to save virtual folder {}", folder.id))?;

        Ok(())
    }

    fn delete_virtual_folder(&self, id: &VirtualFolderId) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM virtual_folders WHERE id = ?", [id.as_str()])?;
        Ok(())
    }

    fn load_view_prefs(&self, folder: &FolderId) -> Result<Option<ViewPrefs>> {
        let conn = self.conn()?;
        let row: Option<(Option<String>, Option<bool>)> = conn
            .query_row(
                "SELECT sort, threaded FROM folder_view_prefs WHERE folder_id = ?",
                [folder.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((sort, threaded)) = row else {
            return Ok(None);
        };

        Ok(Some(ViewPrefs {
            sort: decode_sort(sort.as_deref())?,
            threaded,
        }))
    }

    fn save_view_prefs(&self, folder: &FolderId, prefs: &ViewPrefs) -> Result<()> {
        let sort = encode_sort(prefs.sort)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO folder_view_prefs (folder_id, sort, threaded)
             VALUES (?, ?, ?)",
            params![folder.as_str(), sort, prefs.threaded],
        )?;
        Ok(())
    }

    fn delete_view_prefs(&self, folder: &FolderId) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM folder_view_prefs WHERE folder_id = ?",
            [folder.as_str()],
        )?;
        Ok(())
    }
}
