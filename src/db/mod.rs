//! SQLite persistence for mods, revisions and install state
//!
//! [`Database`] serves committed state to readers. Install and uninstall runs
//! write through a [`Session`], a dedicated connection whose writes are staged
//! in a transaction until the run reaches a checkpoint and commits.

mod schema;

pub use schema::*;

use crate::catalogue::RevisionInfo;
use crate::status::StatusSnapshot;
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Raised when a different revision of the mod is already installed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Another revision ({installed_revision_id}) of mod {mod_id} is already installed")]
pub struct ConflictError {
    pub mod_id: String,
    pub installed_revision_id: String,
}

/// Database wrapper with thread-safe access to committed state
pub struct Database {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = open_connection(path)?;

        let db = Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        };

        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS mods (
                id TEXT PRIMARY KEY,
                name TEXT
            );

            CREATE TABLE IF NOT EXISTS revisions (
                id TEXT PRIMARY KEY,
                mod_id TEXT NOT NULL,
                name TEXT NOT NULL,
                date TEXT NOT NULL,
                download_url TEXT NOT NULL,
                filename TEXT NOT NULL,
                FOREIGN KEY (mod_id) REFERENCES mods(id)
            );

            -- One row per mod: a mod has at most one installed revision
            CREATE TABLE IF NOT EXISTS installed_revisions (
                mod_id TEXT PRIMARY KEY,
                revision_id TEXT NOT NULL,
                status TEXT NOT NULL,
                path TEXT,
                FOREIGN KEY (mod_id) REFERENCES mods(id),
                FOREIGN KEY (revision_id) REFERENCES revisions(id)
            );

            CREATE TABLE IF NOT EXISTS downloaded_revisions (
                mod_id TEXT NOT NULL,
                revision_id TEXT NOT NULL,
                path TEXT NOT NULL,
                PRIMARY KEY (mod_id, revision_id),
                FOREIGN KEY (mod_id) REFERENCES mods(id),
                FOREIGN KEY (revision_id) REFERENCES revisions(id)
            );

            CREATE TABLE IF NOT EXISTS mod_dependencies (
                mod_id TEXT NOT NULL,
                dependency_id TEXT NOT NULL,
                PRIMARY KEY (mod_id, dependency_id),
                FOREIGN KEY (mod_id) REFERENCES mods(id),
                FOREIGN KEY (dependency_id) REFERENCES mods(id)
            );

            CREATE TABLE IF NOT EXISTS playlists (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mods_playlists (
                mod_id TEXT NOT NULL,
                playlist_id INTEGER NOT NULL,
                date_added TEXT NOT NULL,
                PRIMARY KEY (mod_id, playlist_id),
                FOREIGN KEY (mod_id) REFERENCES mods(id),
                FOREIGN KEY (playlist_id) REFERENCES playlists(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_revisions_mod ON revisions(mod_id);
            CREATE INDEX IF NOT EXISTS idx_downloaded_mod ON downloaded_revisions(mod_id);
            "#,
        )
        .context("Failed to initialize database schema")?;

        conn.execute(
            "INSERT OR IGNORE INTO playlists (id, name) VALUES (?1, 'Starred')",
            params![STARRED_PLAYLIST_ID],
        )?;

        Ok(())
    }

    /// Open a unit of work on its own connection
    pub fn session(&self) -> Result<Session> {
        let conn = open_connection(&self.path)?;
        Ok(Session {
            conn,
            in_transaction: false,
        })
    }

    // ========== Committed-state reads ==========

    /// Get a mod by catalogue id
    pub fn get_mod(&self, mod_id: &str) -> Result<Option<ModRecord>> {
        let conn = self.conn.lock().unwrap();
        query_mod(&conn, mod_id)
    }

    /// Installed revision of a mod, with its revision record
    pub fn installed_revision(
        &self,
        mod_id: &str,
    ) -> Result<Option<(InstalledRevisionRecord, RevisionRecord)>> {
        let conn = self.conn.lock().unwrap();
        let Some(installed) = query_installed(&conn, mod_id)? else {
            return Ok(None);
        };
        let revision = query_revision(&conn, &installed.revision_id)?
            .with_context(|| format!("Installed revision {} has no record", installed.revision_id))?;
        Ok(Some((installed, revision)))
    }

    /// All mods with an installed (or installing) revision
    pub fn installed_mods(&self) -> Result<Vec<ModRecord>> {
        let conn = self.conn.lock().unwrap();
        query_installed_mods(&conn)
    }

    /// Build a status snapshot from committed state
    pub fn status_snapshot(&self, mod_id: &str) -> Result<StatusSnapshot> {
        let conn = self.conn.lock().unwrap();
        let mut snapshot = StatusSnapshot::default();

        if query_mod(&conn, mod_id)?.is_none() {
            return Ok(snapshot);
        }

        if let Some(installed) = query_installed(&conn, mod_id)? {
            snapshot.installing = installed.status == InstallStatus::Installing;
            snapshot.installed = query_revision(&conn, &installed.revision_id)?
                .map(|r| r.to_info());
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT r.id, r.mod_id, r.name, r.date, r.download_url, r.filename
            FROM downloaded_revisions d
            JOIN revisions r ON r.id = d.revision_id
            WHERE d.mod_id = ?1
            ORDER BY r.date DESC
            "#,
        )?;
        snapshot.downloaded = stmt
            .query_map(params![mod_id], RevisionRecord::from_row)?
            .map(|r| r.map(|r| r.to_info()))
            .collect::<Result<Vec<_>, _>>()?;

        for playlist in query_mod_playlists(&conn, mod_id)? {
            if playlist.is_starred() {
                snapshot.starred = true;
            } else {
                snapshot.playlists.push(playlist.into());
            }
        }

        Ok(snapshot)
    }

    // ========== Playlists ==========

    /// Create a playlist, returning its id
    pub fn create_playlist(&self, name: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute("INSERT INTO playlists (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    /// List user playlists (the starred playlist is excluded)
    pub fn list_playlists(&self) -> Result<Vec<PlaylistRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, name FROM playlists WHERE id != ?1 ORDER BY name ASC")?;
        let playlists = stmt
            .query_map(params![STARRED_PLAYLIST_ID], PlaylistRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(playlists)
    }

    /// Add a known mod to a playlist
    pub fn add_to_playlist(&self, mod_id: &str, playlist_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        if query_mod(&conn, mod_id)?.is_none() {
            bail!("Mod '{}' not found", mod_id);
        }
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) FROM playlists WHERE id = ?1",
            params![playlist_id],
            |row| row.get::<_, i64>(0).map(|c| c > 0),
        )?;
        if !exists {
            bail!("Playlist {} not found", playlist_id);
        }

        conn.execute(
            "INSERT OR IGNORE INTO mods_playlists (mod_id, playlist_id, date_added) VALUES (?1, ?2, ?3)",
            params![mod_id, playlist_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove a mod from a playlist. Returns whether it was a member.
    pub fn remove_from_playlist(&self, mod_id: &str, playlist_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM mods_playlists WHERE mod_id = ?1 AND playlist_id = ?2",
            params![mod_id, playlist_id],
        )?;
        Ok(removed > 0)
    }

    /// Star or unstar a known mod
    pub fn set_starred(&self, mod_id: &str, starred: bool) -> Result<()> {
        if starred {
            self.add_to_playlist(mod_id, STARRED_PLAYLIST_ID)
        } else {
            self.remove_from_playlist(mod_id, STARRED_PLAYLIST_ID)
                .map(|_| ())
        }
    }
}

/// A run-scoped unit of work.
///
/// Writes are staged in a transaction opened on first write and made durable
/// only by [`Session::commit`]. Reads through the session see staged writes.
/// Only one orchestration run may hold a session at a time.
///
/// The transaction is deferred: the write lock is taken by the first staged
/// write and held until commit or rollback, so callers stage writes only
/// between checkpoints that do no long I/O.
pub struct Session {
    conn: Connection,
    in_transaction: bool,
}

impl Session {
    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn
                .execute_batch("BEGIN")
                .context("Failed to begin transaction")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// Whether staged, uncommitted writes may exist
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Make all staged writes durable
    pub fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn
                .execute_batch("COMMIT")
                .context("Failed to commit transaction")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    /// Discard all staged writes
    pub fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.conn
                .execute_batch("ROLLBACK")
                .context("Failed to roll back transaction")?;
        }
        Ok(())
    }

    // ========== Mods and revisions ==========

    pub fn get_mod(&self, mod_id: &str) -> Result<Option<ModRecord>> {
        query_mod(&self.conn, mod_id)
    }

    /// Fetch a mod, staging a new row if it does not exist yet
    pub fn get_or_create_mod(&mut self, mod_id: &str, name: &str) -> Result<(ModRecord, bool)> {
        if let Some(existing) = query_mod(&self.conn, mod_id)? {
            return Ok((existing, false));
        }

        self.begin()?;
        self.conn.execute(
            "INSERT INTO mods (id, name) VALUES (?1, ?2)",
            params![mod_id, name],
        )?;

        Ok((
            ModRecord {
                id: mod_id.to_string(),
                name: Some(name.to_string()),
            },
            true,
        ))
    }

    /// Fetch a revision, staging a new row owned by `owner` if it does not exist yet.
    ///
    /// The lookup runs inside the session transaction, so it finds revisions
    /// staged earlier in the run as well as committed ones.
    pub fn get_or_create_revision(
        &mut self,
        info: &RevisionInfo,
        owner: &ModRecord,
    ) -> Result<(RevisionRecord, bool)> {
        if let Some(existing) = query_revision(&self.conn, &info.id)? {
            if existing.mod_id != owner.id {
                tracing::warn!(
                    "Revision {} belongs to mod {}, not {}",
                    existing.id,
                    existing.mod_id,
                    owner.id
                );
            }
            return Ok((existing, false));
        }

        self.begin()?;
        let record = RevisionRecord::from_info(info, &owner.id);
        self.conn.execute(
            r#"
            INSERT INTO revisions (id, mod_id, name, date, download_url, filename)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.id,
                record.mod_id,
                record.name,
                record.date,
                record.download_url,
                record.filename,
            ],
        )?;

        Ok((record, true))
    }

    pub fn revision(&self, revision_id: &str) -> Result<Option<RevisionRecord>> {
        query_revision(&self.conn, revision_id)
    }

    // ========== Installed revisions ==========

    pub fn installed_revision(&self, mod_id: &str) -> Result<Option<InstalledRevisionRecord>> {
        query_installed(&self.conn, mod_id)
    }

    pub fn find_installed_mods(&self) -> Result<Vec<ModRecord>> {
        query_installed_mods(&self.conn)
    }

    /// Record `revision` as the installed revision of `owner`.
    ///
    /// Re-installing the same revision updates status and path in place. Any
    /// other installed revision is a [`ConflictError`].
    pub fn set_installed(
        &mut self,
        owner: &ModRecord,
        revision: &RevisionRecord,
        status: InstallStatus,
        path: Option<&str>,
    ) -> Result<()> {
        if let Some(current) = query_installed(&self.conn, &owner.id)? {
            if current.revision_id != revision.id {
                return Err(ConflictError {
                    mod_id: owner.id.clone(),
                    installed_revision_id: current.revision_id,
                }
                .into());
            }

            self.begin()?;
            self.conn.execute(
                "UPDATE installed_revisions SET status = ?1, path = ?2 WHERE mod_id = ?3",
                params![status.as_str(), path, owner.id],
            )?;
            return Ok(());
        }

        self.begin()?;
        self.conn.execute(
            "INSERT INTO installed_revisions (mod_id, revision_id, status, path) VALUES (?1, ?2, ?3, ?4)",
            params![owner.id, revision.id, status.as_str(), path],
        )?;
        Ok(())
    }

    /// Delete the installed revision row. Returns whether one existed.
    pub fn delete_installed(&mut self, mod_id: &str) -> Result<bool> {
        self.begin()?;
        let deleted = self.conn.execute(
            "DELETE FROM installed_revisions WHERE mod_id = ?1",
            params![mod_id],
        )?;
        Ok(deleted > 0)
    }

    // ========== Downloaded revisions ==========

    pub fn downloaded_revision(
        &self,
        mod_id: &str,
        revision_id: &str,
    ) -> Result<Option<DownloadedRevisionRecord>> {
        self.conn
            .query_row(
                "SELECT mod_id, revision_id, path FROM downloaded_revisions WHERE mod_id = ?1 AND revision_id = ?2",
                params![mod_id, revision_id],
                DownloadedRevisionRecord::from_row,
            )
            .optional()
            .context("Failed to query downloaded revision")
    }

    /// Record a fetched archive, replacing the path of an earlier download
    pub fn add_downloaded(
        &mut self,
        owner: &ModRecord,
        revision: &RevisionRecord,
        path: &str,
    ) -> Result<()> {
        self.begin()?;
        self.conn.execute(
            r#"
            INSERT INTO downloaded_revisions (mod_id, revision_id, path) VALUES (?1, ?2, ?3)
            ON CONFLICT(mod_id, revision_id) DO UPDATE SET path = excluded.path
            "#,
            params![owner.id, revision.id, path],
        )?;
        Ok(())
    }

    pub fn delete_downloaded(&mut self, mod_id: &str, revision_id: &str) -> Result<()> {
        self.begin()?;
        self.conn.execute(
            "DELETE FROM downloaded_revisions WHERE mod_id = ?1 AND revision_id = ?2",
            params![mod_id, revision_id],
        )?;
        Ok(())
    }

    // ========== Dependencies ==========

    pub fn add_dependency(&mut self, mod_id: &str, dependency_id: &str) -> Result<()> {
        self.begin()?;
        self.conn.execute(
            "INSERT OR IGNORE INTO mod_dependencies (mod_id, dependency_id) VALUES (?1, ?2)",
            params![mod_id, dependency_id],
        )?;
        Ok(())
    }

    pub fn dependencies_of(&self, mod_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT dependency_id FROM mod_dependencies WHERE mod_id = ?1 ORDER BY dependency_id",
        )?;
        let ids = stmt
            .query_map(params![mod_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!("Failed to roll back abandoned session: {}", e);
            }
        }
    }
}

// ========== Shared queries ==========

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).context("Failed to open database")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        .context("Failed to configure database connection")?;
    Ok(conn)
}

fn query_mod(conn: &Connection, mod_id: &str) -> Result<Option<ModRecord>> {
    conn.query_row(
        "SELECT id, name FROM mods WHERE id = ?1",
        params![mod_id],
        ModRecord::from_row,
    )
    .optional()
    .context("Failed to query mod")
}

fn query_revision(conn: &Connection, revision_id: &str) -> Result<Option<RevisionRecord>> {
    conn.query_row(
        "SELECT id, mod_id, name, date, download_url, filename FROM revisions WHERE id = ?1",
        params![revision_id],
        RevisionRecord::from_row,
    )
    .optional()
    .context("Failed to query revision")
}

fn query_installed(conn: &Connection, mod_id: &str) -> Result<Option<InstalledRevisionRecord>> {
    conn.query_row(
        "SELECT mod_id, revision_id, status, path FROM installed_revisions WHERE mod_id = ?1",
        params![mod_id],
        InstalledRevisionRecord::from_row,
    )
    .optional()
    .context("Failed to query installed revision")
}

fn query_installed_mods(conn: &Connection) -> Result<Vec<ModRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT m.id, m.name FROM mods m
        JOIN installed_revisions i ON i.mod_id = m.id
        ORDER BY m.name ASC
        "#,
    )?;
    let mods = stmt
        .query_map([], ModRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(mods)
}

fn query_mod_playlists(conn: &Connection, mod_id: &str) -> Result<Vec<PlaylistRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT p.id, p.name FROM playlists p
        JOIN mods_playlists mp ON mp.playlist_id = p.id
        WHERE mp.mod_id = ?1
        ORDER BY p.id ASC
        "#,
    )?;
    let playlists = stmt
        .query_map(params![mod_id], PlaylistRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(playlists)
}
