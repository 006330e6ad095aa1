// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent, versioned page store backed by SQLite.
//
// Every page version is one immutable `page` row holding the full image and a
// thumbnail. The document order lives in `page_order`, where each action id
// carries a complete numbering 1..N. Edits allocate a new action id and copy
// the numbering forward, so undo and redo only move the cursor between action
// ids and never touch page bytes.
//
// Rows stored with `insert_image` but not yet placed in any numbering are
// listed in `loose_page` so garbage collection leaves them alone.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use scanpaper_core::config::EngineConfig;
use scanpaper_core::error::{Result, ScanpaperError};
use scanpaper_core::types::{
    OcrState, PageAnalysis, PageFormat, PageId, Resolution, ResolutionUnit, RowId,
};
use scanpaper_document::{BboxTree, ImageFile, Page};

/// `PRAGMA application_id` of a scanpaper session ("SCNP").
pub const APPLICATION_ID: i32 = 0x5343_4E50;

/// `PRAGMA user_version` written by this release.
pub const SCHEMA_VERSION: i32 = 3;

const CREATE_SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS page (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        page_uuid TEXT NOT NULL,
        image BLOB NOT NULL,
        image_hash TEXT NOT NULL,
        thumb BLOB NOT NULL,
        format TEXT NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        x_res REAL NOT NULL,
        y_res REAL NOT NULL,
        unit TEXT NOT NULL,
        text_layer TEXT,
        annotations TEXT,
        dirty_time TEXT,
        saved INTEGER NOT NULL DEFAULT 0,
        analysis TEXT,
        ocr_flag INTEGER NOT NULL DEFAULT 0,
        ocr_time TEXT
    );
    CREATE TABLE IF NOT EXISTS action (
        action_id INTEGER PRIMARY KEY,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS page_order (
        action_id INTEGER NOT NULL,
        page_number INTEGER NOT NULL,
        page_id INTEGER NOT NULL REFERENCES page(id),
        PRIMARY KEY (action_id, page_number)
    );
    CREATE TABLE IF NOT EXISTS undo_cursor (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        action_id INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS loose_page (
        page_id INTEGER PRIMARY KEY REFERENCES page(id)
    );
"#;

/// Columns added in schema version 2.
const MIGRATE_V2_SQL: &str = r#"
    ALTER TABLE page ADD COLUMN analysis TEXT;
    ALTER TABLE page ADD COLUMN ocr_flag INTEGER NOT NULL DEFAULT 0;
    ALTER TABLE page ADD COLUMN ocr_time TEXT;
"#;

/// Table added in schema version 3.
const MIGRATE_V3_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS loose_page (
        page_id INTEGER PRIMARY KEY REFERENCES page(id)
    );
"#;

const SELECT_PAGE_SQL: &str = "SELECT page_uuid, image, width, height, x_res, y_res, unit,
        format, text_layer, annotations, dirty_time, saved, analysis, ocr_flag, ocr_time
     FROM page WHERE id = ?1";

/// One position in the current document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    pub number: u32,
    pub row_id: RowId,
    pub page_id: PageId,
}

/// Which pages `delete_pages` removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteSelector {
    RowIds(Vec<RowId>),
    PageIds(Vec<PageId>),
    Numbers(Vec<u32>),
}

impl DeleteSelector {
    fn is_empty(&self) -> bool {
        match self {
            Self::RowIds(v) => v.is_empty(),
            Self::PageIds(v) => v.is_empty(),
            Self::Numbers(v) => v.is_empty(),
        }
    }
}

/// How `get_page` finds its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageQuery {
    Number(u32),
    Id(PageId),
}

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> ScanpaperError {
    move |e| ScanpaperError::Database(format!("{context}: {e}"))
}

/// Errors reading the header of something that is not SQLite at all are
/// format errors, not database failures.
fn header_err(e: rusqlite::Error) -> ScanpaperError {
    if e.sqlite_error_code() == Some(rusqlite::ErrorCode::NotADatabase) {
        ScanpaperError::Format("file is not a database".into())
    } else {
        ScanpaperError::Database(format!("read header: {e}"))
    }
}

/// Persistent page store.
///
/// Owned by exactly one thread (the worker); all methods are synchronous.
pub struct PageStore {
    conn: Connection,
    temp_dir: PathBuf,
    thumbnail_size: u32,
    undo_steps: u32,
    /// Cursor before the snapshot of the edit in progress, if any.
    edit_base: Option<i64>,
    /// Schema version of a file written by a newer release.
    read_only: Option<i32>,
}

impl PageStore {
    /// Open (or create) the session file at `path`.
    ///
    /// Fails with [`ScanpaperError::Format`] when the file belongs to another
    /// application. Older schemas are upgraded in place. Files from a newer
    /// release open read-only: reads work, every write fails with
    /// [`ScanpaperError::ReadOnly`].
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;
        let store = Self::init(conn, config)?;
        if store.read_only.is_none() {
            store
                .conn
                .pragma_update(None, "journal_mode", "WAL")
                .map_err(db_err("WAL pragma"))?;
        }
        info!(read_only = store.read_only.is_some(), "page store opened");
        Ok(store)
    }

    /// Open a throwaway in-memory store (useful for tests).
    pub fn open_in_memory(config: &EngineConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        let store = Self::init(conn, config)?;
        debug!("in-memory page store opened");
        Ok(store)
    }

    fn init(mut conn: Connection, config: &EngineConfig) -> Result<Self> {
        let application_id: i32 = conn
            .pragma_query_value(None, "application_id", |r| r.get(0))
            .map_err(header_err)?;
        let user_version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .map_err(header_err)?;
        let tables: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'", [], |r| r.get(0))
            .map_err(header_err)?;

        if application_id == 0 && tables == 0 {
            Self::create_schema(&mut conn)?;
        } else if application_id != APPLICATION_ID {
            return Err(ScanpaperError::Format(format!(
                "application id {application_id:#x} is not a scanpaper session"
            )));
        } else if user_version < SCHEMA_VERSION {
            Self::upgrade(&mut conn, user_version)?;
        }

        let read_only = (user_version > SCHEMA_VERSION).then_some(user_version);
        if read_only.is_some() {
            warn!(
                file_version = user_version,
                supported = SCHEMA_VERSION,
                "session was written by a newer scanpaper; opening read-only"
            );
            conn.pragma_update(None, "query_only", true)
                .map_err(db_err("query_only pragma"))?;
        }

        Ok(Self {
            conn,
            temp_dir: config.temp_dir(),
            thumbnail_size: config.thumbnail_size,
            undo_steps: config.undo_steps,
            edit_base: None,
            read_only,
        })
    }

    fn create_schema(conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction().map_err(db_err("begin"))?;
        tx.execute_batch(CREATE_SCHEMA_SQL)
            .map_err(db_err("create schema"))?;
        tx.pragma_update(None, "application_id", APPLICATION_ID)
            .map_err(db_err("set application id"))?;
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(db_err("set user version"))?;
        tx.execute(
            "INSERT INTO action (action_id, created_at) VALUES (0, ?1)",
            params![Utc::now().to_rfc3339()],
        )
        .map_err(db_err("insert first action"))?;
        tx.execute("INSERT INTO undo_cursor (id, action_id) VALUES (0, 0)", [])
            .map_err(db_err("insert cursor"))?;
        tx.commit().map_err(db_err("commit schema"))?;
        info!(version = SCHEMA_VERSION, "created new session schema");
        Ok(())
    }

    fn upgrade(conn: &mut Connection, from: i32) -> Result<()> {
        info!(from, to = SCHEMA_VERSION, "upgrading session schema");
        let tx = conn.transaction().map_err(db_err("begin"))?;
        if from < 2 {
            // A column that already exists fails harmlessly.
            for stmt in MIGRATE_V2_SQL.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                if let Err(e) = tx.execute_batch(stmt) {
                    debug!(error = %e, "migration step skipped");
                }
            }
        }
        if from < 3 {
            tx.execute_batch(MIGRATE_V3_SQL)
                .map_err(db_err("create loose page table"))?;
        }
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(db_err("set user version"))?;
        tx.commit().map_err(db_err("commit upgrade"))
    }

    /// Close the store, reporting any error SQLite raises on close.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| ScanpaperError::Database(format!("close: {e}")))
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Whether the file came from a newer release and refuses writes.
    pub fn is_read_only(&self) -> bool {
        self.read_only.is_some()
    }

    fn writable(&self) -> Result<()> {
        match self.read_only {
            Some(version) => Err(ScanpaperError::ReadOnly(format!(
                "schema {version}, newer than {SCHEMA_VERSION}"
            ))),
            None => Ok(()),
        }
    }

    // -- Edits and history ----------------------------------------------------

    /// Start a user-visible edit: allocate a new action id holding a copy of
    /// the current numbering. Write methods called before
    /// [`finish_edit`](Self::finish_edit) all land in this one undo step.
    ///
    /// Does nothing if an edit is already open.
    #[instrument(skip(self))]
    pub fn take_snapshot(&mut self) -> Result<()> {
        if self.edit_base.is_some() {
            return Ok(());
        }
        self.writable()?;
        let undo_steps = self.undo_steps;
        let tx = self.conn.transaction().map_err(db_err("begin"))?;
        let base = snapshot(&tx, undo_steps)?;
        tx.commit().map_err(db_err("commit snapshot"))?;
        self.edit_base = Some(base);
        Ok(())
    }

    /// Close the open edit and drop page rows no action refers to any more.
    pub fn finish_edit(&mut self) -> Result<()> {
        if self.edit_base.take().is_some() {
            let undo_steps = self.undo_steps;
            let tx = self.conn.transaction().map_err(db_err("begin"))?;
            let removed = settle(&tx, undo_steps)?;
            tx.commit().map_err(db_err("commit edit"))?;
            debug!(removed, "edit finished");
        }
        Ok(())
    }

    /// Throw away the open edit, returning to the numbering it started from.
    pub fn abort_edit(&mut self) -> Result<()> {
        let Some(base) = self.edit_base.take() else {
            return Ok(());
        };
        let tx = self.conn.transaction().map_err(db_err("begin"))?;
        tx.execute("DELETE FROM page_order WHERE action_id > ?1", params![base])
            .map_err(db_err("abort edit"))?;
        tx.execute("DELETE FROM action WHERE action_id > ?1", params![base])
            .map_err(db_err("abort edit"))?;
        set_cursor(&tx, base)?;
        collect_garbage(&tx)?;
        tx.commit().map_err(db_err("commit abort"))?;
        info!(action = base, "edit aborted");
        Ok(())
    }

    /// Step back one action. At the oldest action this is a no-op.
    #[instrument(skip(self))]
    pub fn undo(&mut self) -> Result<Vec<PageEntry>> {
        self.step_history("SELECT MAX(action_id) FROM action WHERE action_id < ?1", "undo")
    }

    /// Step forward one action. At the newest action this is a no-op.
    #[instrument(skip(self))]
    pub fn redo(&mut self) -> Result<Vec<PageEntry>> {
        self.step_history("SELECT MIN(action_id) FROM action WHERE action_id > ?1", "redo")
    }

    fn step_history(&mut self, sql: &str, what: &'static str) -> Result<Vec<PageEntry>> {
        self.writable()?;
        self.finish_edit()?;
        let cursor = current_action(&self.conn)?;
        let target: Option<i64> = self
            .conn
            .query_row(sql, params![cursor], |r| r.get(0))
            .map_err(db_err("find action"))?;
        match target {
            Some(action) => {
                set_cursor(&self.conn, action)?;
                info!(from = cursor, to = action, "{what}");
            }
            None => debug!(action = cursor, "nothing to {what}"),
        }
        self.pages()
    }

    pub fn can_undo(&self) -> Result<bool> {
        self.has_action("SELECT EXISTS(SELECT 1 FROM action WHERE action_id < ?1)")
    }

    pub fn can_redo(&self) -> Result<bool> {
        self.has_action("SELECT EXISTS(SELECT 1 FROM action WHERE action_id > ?1)")
    }

    fn has_action(&self, sql: &str) -> Result<bool> {
        let cursor = current_action(&self.conn)?;
        self.conn
            .query_row(sql, params![cursor], |r| r.get(0))
            .map_err(db_err("query history"))
    }

    // -- Writes ---------------------------------------------------------------

    /// Store a new page version and return its row id.
    ///
    /// With `dedupe_against`, the named row is reused when it already holds
    /// identical content (image bytes, layers and resolution). A new row is
    /// kept until a numbering refers to it, so later edits cannot collect it
    /// before it is placed.
    #[instrument(skip(self, page), fields(id = %page.id))]
    pub fn insert_image(&mut self, page: &Page, dedupe_against: Option<RowId>) -> Result<RowId> {
        self.writable()?;
        let thumbnail_size = self.thumbnail_size;
        let tx = self.conn.transaction().map_err(db_err("begin"))?;
        let row = match dedupe_against {
            Some(existing) if same_content(&tx, existing, page)? => {
                debug!(row = %existing, "identical content, reusing row");
                existing
            }
            _ => {
                let row = insert_row(&tx, page, thumbnail_size)?;
                tx.execute("INSERT INTO loose_page (page_id) VALUES (?1)", params![row.0])
                    .map_err(db_err("mark loose row"))?;
                row
            }
        };
        tx.commit().map_err(db_err("commit insert"))?;
        Ok(row)
    }

    /// Insert `page` at `number` (1..=N+1), shifting later pages up.
    ///
    /// The page is stored first if it has no row yet. Fails with
    /// [`ScanpaperError::AlreadyExists`] if the page is already part of the
    /// document.
    #[instrument(skip(self, page), fields(id = %page.id))]
    pub fn add_page(&mut self, page: &Page, number: u32) -> Result<RowId> {
        self.writable()?;
        let (auto, undo_steps, thumbnail_size) =
            (self.edit_base.is_none(), self.undo_steps, self.thumbnail_size);
        let tx = self.conn.transaction().map_err(db_err("begin"))?;
        if auto {
            snapshot(&tx, undo_steps)?;
        }
        let action = current_action(&tx)?;
        let entries = entries_at(&tx, action)?;

        if number == 0 || number as usize > entries.len() + 1 {
            return Err(ScanpaperError::InvalidArgument(format!(
                "cannot add page {number} to a document of {} pages",
                entries.len()
            )));
        }
        if let Some(existing) = entries.iter().find(|e| e.page_id == page.id) {
            return Err(ScanpaperError::AlreadyExists(format!(
                "page {} is already number {}",
                page.id, existing.number
            )));
        }

        let row = ensure_row(&tx, page, thumbnail_size)?;
        let mut rows: Vec<RowId> = entries.iter().map(|e| e.row_id).collect();
        rows.insert(number as usize - 1, row);
        write_ordering(&tx, action, &rows)?;
        if auto {
            settle(&tx, undo_steps)?;
        }
        tx.commit().map_err(db_err("commit add"))?;

        info!(number, row = %row, "page added");
        Ok(row)
    }

    /// Put `page` at `number` in place of whatever is there.
    #[instrument(skip(self, page), fields(id = %page.id))]
    pub fn replace_page(&mut self, page: &Page, number: u32) -> Result<RowId> {
        self.writable()?;
        let (auto, undo_steps, thumbnail_size) =
            (self.edit_base.is_none(), self.undo_steps, self.thumbnail_size);
        let tx = self.conn.transaction().map_err(db_err("begin"))?;
        if auto {
            snapshot(&tx, undo_steps)?;
        }
        let action = current_action(&tx)?;
        let entries = entries_at(&tx, action)?;

        if number == 0 || number as usize > entries.len() {
            return Err(ScanpaperError::NotFound(format!("page number {number}")));
        }
        if let Some(other) = entries
            .iter()
            .find(|e| e.page_id == page.id && e.number != number)
        {
            return Err(ScanpaperError::AlreadyExists(format!(
                "page {} is already number {}",
                page.id, other.number
            )));
        }

        let row = ensure_row(&tx, page, thumbnail_size)?;
        let mut rows: Vec<RowId> = entries.iter().map(|e| e.row_id).collect();
        rows[number as usize - 1] = row;
        write_ordering(&tx, action, &rows)?;
        if auto {
            settle(&tx, undo_steps)?;
        }
        tx.commit().map_err(db_err("commit replace"))?;

        info!(number, row = %row, "page replaced");
        Ok(row)
    }

    /// Remove pages from the document; the rest are renumbered 1..N.
    /// Returns how many were removed.
    #[instrument(skip(self))]
    pub fn delete_pages(&mut self, selector: &DeleteSelector) -> Result<usize> {
        if selector.is_empty() {
            return Err(ScanpaperError::InvalidArgument(
                "no pages selected for deletion".into(),
            ));
        }
        self.writable()?;
        let (auto, undo_steps) = (self.edit_base.is_none(), self.undo_steps);
        let tx = self.conn.transaction().map_err(db_err("begin"))?;
        if auto {
            snapshot(&tx, undo_steps)?;
        }
        let action = current_action(&tx)?;
        let entries = entries_at(&tx, action)?;

        let doomed: Vec<u32> = match selector {
            DeleteSelector::Numbers(numbers) => numbers
                .iter()
                .map(|&n| {
                    entries
                        .iter()
                        .find(|e| e.number == n)
                        .map(|e| e.number)
                        .ok_or_else(|| ScanpaperError::NotFound(format!("page number {n}")))
                })
                .collect::<Result<_>>()?,
            DeleteSelector::RowIds(rows) => rows
                .iter()
                .map(|&r| {
                    entries
                        .iter()
                        .find(|e| e.row_id == r)
                        .map(|e| e.number)
                        .ok_or_else(|| ScanpaperError::NotFound(format!("page row {r}")))
                })
                .collect::<Result<_>>()?,
            DeleteSelector::PageIds(ids) => ids
                .iter()
                .map(|&id| {
                    entries
                        .iter()
                        .find(|e| e.page_id == id)
                        .map(|e| e.number)
                        .ok_or_else(|| ScanpaperError::NotFound(format!("page {id}")))
                })
                .collect::<Result<_>>()?,
        };

        let rows: Vec<RowId> = entries
            .iter()
            .filter(|e| !doomed.contains(&e.number))
            .map(|e| e.row_id)
            .collect();
        let removed = entries.len() - rows.len();
        write_ordering(&tx, action, &rows)?;
        if auto {
            settle(&tx, undo_steps)?;
        }
        tx.commit().map_err(db_err("commit delete"))?;

        info!(removed, remaining = rows.len(), "pages deleted");
        Ok(removed)
    }

    /// Rewrite the current numbering with `rows` in order.
    pub(crate) fn reorder(&mut self, rows: &[RowId]) -> Result<()> {
        self.writable()?;
        let (auto, undo_steps) = (self.edit_base.is_none(), self.undo_steps);
        let tx = self.conn.transaction().map_err(db_err("begin"))?;
        if auto {
            snapshot(&tx, undo_steps)?;
        }
        let action = current_action(&tx)?;
        write_ordering(&tx, action, rows)?;
        if auto {
            settle(&tx, undo_steps)?;
        }
        tx.commit().map_err(db_err("commit reorder"))
    }

    /// Cache analysis results on a stored page version.
    ///
    /// Only the analysis columns change; image bytes stay untouched.
    pub fn update_page_metadata(&mut self, page: &Page) -> Result<()> {
        self.writable()?;
        let row = page.row_id.ok_or_else(|| {
            ScanpaperError::InvalidArgument(format!("page {} has not been stored", page.id))
        })?;
        let analysis = page.analysis.as_ref().map(serde_json::to_string).transpose()?;
        let updated = self
            .conn
            .execute(
                "UPDATE page SET analysis = ?1 WHERE id = ?2",
                params![analysis, row.0],
            )
            .map_err(db_err("update metadata"))?;
        if updated == 0 {
            return Err(ScanpaperError::NotFound(format!("page row {row}")));
        }
        Ok(())
    }

    // -- Reads ----------------------------------------------------------------

    /// The document at the cursor, in page order.
    pub fn pages(&self) -> Result<Vec<PageEntry>> {
        let action = current_action(&self.conn)?;
        entries_at(&self.conn, action)
    }

    pub fn page_count(&self) -> Result<usize> {
        let action = current_action(&self.conn)?;
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM page_order WHERE action_id = ?1",
                params![action],
                |r| r.get(0),
            )
            .map_err(db_err("count pages"))?;
        Ok(count as usize)
    }

    pub fn find_number_by_id(&self, page_id: PageId) -> Result<Option<u32>> {
        Ok(self
            .pages()?
            .into_iter()
            .find(|e| e.page_id == page_id)
            .map(|e| e.number))
    }

    /// Materialise a page, its image written to a fresh temp file.
    #[instrument(skip(self))]
    pub fn get_page(&self, query: PageQuery) -> Result<Page> {
        let entries = self.pages()?;
        let entry = match query {
            PageQuery::Number(n) => entries.iter().find(|e| e.number == n),
            PageQuery::Id(id) => entries.iter().find(|e| e.page_id == id),
        }
        .ok_or_else(|| match query {
            PageQuery::Number(n) => ScanpaperError::NotFound(format!("page number {n}")),
            PageQuery::Id(id) => ScanpaperError::NotFound(format!("page {id}")),
        })?;
        self.load_page(entry.row_id)
    }

    /// Materialise a specific page version.
    pub fn load_page(&self, row: RowId) -> Result<Page> {
        let stored = self
            .conn
            .query_row(SELECT_PAGE_SQL, params![row.0], row_to_stored)
            .optional()
            .map_err(db_err("load page"))?
            .ok_or_else(|| ScanpaperError::NotFound(format!("page row {row}")))?;

        let image = ImageFile::write(&self.temp_dir, &stored.image, stored.format)?;
        let mut page = Page::from_parts(
            image,
            stored.width,
            stored.height,
            stored.format,
            stored.resolution,
        );
        page.id = stored.page_id;
        page.row_id = Some(row);
        page.text_layer = stored.text_layer;
        page.annotations = stored.annotations;
        page.dirty_time = stored.dirty_time;
        page.saved = stored.saved;
        page.analysis = stored.analysis;
        page.ocr = stored.ocr;
        Ok(page)
    }

    /// PNG thumbnail bytes of a page version, without touching the image.
    pub fn get_thumb(&self, row: RowId) -> Result<Vec<u8>> {
        self.conn
            .query_row("SELECT thumb FROM page WHERE id = ?1", params![row.0], |r| r.get(0))
            .optional()
            .map_err(db_err("load thumbnail"))?
            .ok_or_else(|| ScanpaperError::NotFound(format!("page row {row}")))
    }
}

// ---------------------------------------------------------------------------
// Numbering helpers (shared by the store methods, always inside a transaction)
// ---------------------------------------------------------------------------

fn current_action(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT action_id FROM undo_cursor WHERE id = 0", [], |r| r.get(0))
        .map_err(db_err("read cursor"))
}

fn set_cursor(conn: &Connection, action: i64) -> Result<()> {
    conn.execute("UPDATE undo_cursor SET action_id = ?1 WHERE id = 0", params![action])
        .map_err(db_err("move cursor"))?;
    Ok(())
}

/// Allocate the next action id with a copy of the current numbering, drop
/// the redo branch and prune history beyond `undo_steps`. Returns the
/// previous cursor.
fn snapshot(conn: &Connection, undo_steps: u32) -> Result<i64> {
    let base = current_action(conn)?;
    conn.execute("DELETE FROM page_order WHERE action_id > ?1", params![base])
        .map_err(db_err("drop redo branch"))?;
    conn.execute("DELETE FROM action WHERE action_id > ?1", params![base])
        .map_err(db_err("drop redo branch"))?;

    let next = base + 1;
    conn.execute(
        "INSERT INTO action (action_id, created_at) VALUES (?1, ?2)",
        params![next, Utc::now().to_rfc3339()],
    )
    .map_err(db_err("allocate action"))?;
    conn.execute(
        "INSERT INTO page_order (action_id, page_number, page_id)
         SELECT ?1, page_number, page_id FROM page_order WHERE action_id = ?2",
        params![next, base],
    )
    .map_err(db_err("copy numbering"))?;
    set_cursor(conn, next)?;

    // The base action stays while the edit is open so it can be aborted.
    prune_before(conn, next - i64::from(undo_steps.max(1)))?;

    debug!(action = next, "snapshot taken");
    Ok(base)
}

fn prune_before(conn: &Connection, oldest: i64) -> Result<()> {
    conn.execute("DELETE FROM page_order WHERE action_id < ?1", params![oldest])
        .map_err(db_err("prune history"))?;
    conn.execute("DELETE FROM action WHERE action_id < ?1", params![oldest])
        .map_err(db_err("prune history"))?;
    Ok(())
}

/// Commit-time cleanup of an edit: with no undo history the base action
/// goes, loose rows that are now placed stop being loose, and rows nothing
/// refers to are deleted. Returns how many rows were deleted.
fn settle(conn: &Connection, undo_steps: u32) -> Result<usize> {
    if undo_steps == 0 {
        prune_before(conn, current_action(conn)?)?;
    }
    conn.execute(
        "DELETE FROM loose_page WHERE page_id IN (SELECT page_id FROM page_order)",
        [],
    )
    .map_err(db_err("settle loose rows"))?;
    collect_garbage(conn)
}

fn entries_at(conn: &Connection, action: i64) -> Result<Vec<PageEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT o.page_number, o.page_id, p.page_uuid
             FROM page_order o JOIN page p ON p.id = o.page_id
             WHERE o.action_id = ?1 ORDER BY o.page_number",
        )
        .map_err(db_err("prepare ordering"))?;
    stmt.query_map(params![action], |row| {
        let uuid: String = row.get(2)?;
        Ok(PageEntry {
            number: row.get(0)?,
            row_id: RowId(row.get(1)?),
            page_id: parse_page_id(2, &uuid)?,
        })
    })
    .map_err(db_err("query ordering"))?
    .collect::<std::result::Result<Vec<_>, _>>()
    .map_err(db_err("collect ordering"))
}

fn write_ordering(conn: &Connection, action: i64, rows: &[RowId]) -> Result<()> {
    conn.execute("DELETE FROM page_order WHERE action_id = ?1", params![action])
        .map_err(db_err("clear ordering"))?;
    let mut stmt = conn
        .prepare("INSERT INTO page_order (action_id, page_number, page_id) VALUES (?1, ?2, ?3)")
        .map_err(db_err("prepare ordering insert"))?;
    for (i, row) in rows.iter().enumerate() {
        stmt.execute(params![action, i as i64 + 1, row.0])
            .map_err(db_err("write ordering"))?;
    }
    Ok(())
}

fn collect_garbage(conn: &Connection) -> Result<usize> {
    conn.execute(
        "DELETE FROM page WHERE id NOT IN (SELECT page_id FROM page_order)
             AND id NOT IN (SELECT page_id FROM loose_page)",
        [],
    )
    .map_err(db_err("collect garbage"))
}

// ---------------------------------------------------------------------------
// Page rows
// ---------------------------------------------------------------------------

fn image_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn layer_json(layer: Option<&BboxTree>) -> Result<Option<String>> {
    Ok(layer.map(BboxTree::to_json).transpose()?)
}

fn ensure_row(conn: &Connection, page: &Page, thumbnail_size: u32) -> Result<RowId> {
    match page.row_id {
        Some(row) => {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM page WHERE id = ?1)",
                    params![row.0],
                    |r| r.get(0),
                )
                .map_err(db_err("check row"))?;
            if exists {
                Ok(row)
            } else {
                Err(ScanpaperError::NotFound(format!("page row {row}")))
            }
        }
        None => insert_row(conn, page, thumbnail_size),
    }
}

fn insert_row(conn: &Connection, page: &Page, thumbnail_size: u32) -> Result<RowId> {
    let image = page.image_bytes()?;
    let thumb = page.thumbnail(thumbnail_size)?;
    let format = serde_json::to_string(&page.format)?;
    let analysis = page.analysis.as_ref().map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO page (page_uuid, image, image_hash, thumb, format, width, height,
             x_res, y_res, unit, text_layer, annotations, dirty_time, saved,
             analysis, ocr_flag, ocr_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            page.id.to_string(),
            &image,
            image_hash(&image),
            thumb,
            format,
            page.width,
            page.height,
            page.resolution.x,
            page.resolution.y,
            page.resolution.unit.as_str(),
            layer_json(page.text_layer.as_ref())?,
            layer_json(page.annotations.as_ref())?,
            page.dirty_time.map(|t| t.to_rfc3339()),
            page.saved,
            analysis,
            page.ocr.performed,
            page.ocr.time.map(|t| t.to_rfc3339()),
        ],
    )
    .map_err(db_err("insert page"))?;

    let row = RowId(conn.last_insert_rowid());
    debug!(row = %row, bytes = image.len(), "page row written");
    Ok(row)
}

/// Whether row `existing` already holds exactly `page`'s content.
fn same_content(conn: &Connection, existing: RowId, page: &Page) -> Result<bool> {
    let stored: Option<(String, Option<String>, Option<String>, f64, f64, String)> = conn
        .query_row(
            "SELECT image_hash, text_layer, annotations, x_res, y_res, unit
             FROM page WHERE id = ?1",
            params![existing.0],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )
        .optional()
        .map_err(db_err("load row for dedupe"))?;
    let (hash, text_layer, annotations, x_res, y_res, unit) =
        stored.ok_or_else(|| ScanpaperError::NotFound(format!("page row {existing}")))?;

    Ok(hash == image_hash(&page.image_bytes()?)
        && text_layer == layer_json(page.text_layer.as_ref())?
        && annotations == layer_json(page.annotations.as_ref())?
        && x_res == page.resolution.x
        && y_res == page.resolution.y
        && unit == page.resolution.unit.as_str())
}

struct StoredPage {
    page_id: PageId,
    image: Vec<u8>,
    width: u32,
    height: u32,
    resolution: Resolution,
    format: PageFormat,
    text_layer: Option<BboxTree>,
    annotations: Option<BboxTree>,
    dirty_time: Option<DateTime<Utc>>,
    saved: bool,
    analysis: Option<PageAnalysis>,
    ocr: OcrState,
}

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_page_id(idx: usize, s: &str) -> rusqlite::Result<PageId> {
    uuid::Uuid::parse_str(s)
        .map(PageId)
        .map_err(|e| conversion_err(idx, e))
}

fn parse_json<T: DeserializeOwned>(idx: usize, s: Option<String>) -> rusqlite::Result<Option<T>> {
    s.map(|s| serde_json::from_str(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn parse_time(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

/// Column indices follow `SELECT_PAGE_SQL`.
fn row_to_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredPage> {
    let uuid: String = row.get(0)?;
    let unit: String = row.get(6)?;
    let format: String = row.get(7)?;

    Ok(StoredPage {
        page_id: parse_page_id(0, &uuid)?,
        image: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
        resolution: Resolution::new(
            row.get(4)?,
            row.get(5)?,
            ResolutionUnit::parse(&unit).unwrap_or(ResolutionUnit::PixelsPerInch),
        ),
        format: serde_json::from_str(&format).map_err(|e| conversion_err(7, e))?,
        text_layer: parse_json(8, row.get(8)?)?,
        annotations: parse_json(9, row.get(9)?)?,
        dirty_time: parse_time(10, row.get(10)?)?,
        saved: row.get(11)?,
        analysis: parse_json(12, row.get(12)?)?,
        ocr: OcrState {
            performed: row.get(13)?,
            time: parse_time(14, row.get(14)?)?,
        },
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};
    use scanpaper_document::ImageProcessor;

    pub(crate) fn config(dir: &Path) -> EngineConfig {
        EngineConfig {
            temp_dir: Some(dir.to_path_buf()),
            ..EngineConfig::default()
        }
    }

    pub(crate) fn page(dir: &Path, w: u32, h: u32, shade: u8) -> Page {
        let img = ImageProcessor::from_dynamic(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            w,
            h,
            Luma([shade]),
        )));
        Page::from_image(&img, PageFormat::Png, Resolution::default(), dir).expect("page")
    }

    fn ids(store: &PageStore) -> Vec<PageId> {
        store.pages().expect("pages").iter().map(|e| e.page_id).collect()
    }

    fn store_with(dir: &Path, n: usize) -> (PageStore, Vec<PageId>) {
        let mut store = PageStore::open_in_memory(&config(dir)).expect("open");
        let mut added = Vec::new();
        for i in 0..n {
            let p = page(dir, 10, 10, i as u8);
            store.add_page(&p, i as u32 + 1).expect("add");
            added.push(p.id);
        }
        (store, added)
    }

    #[test]
    fn fresh_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PageStore::open(dir.path().join("session.db"), &config(dir.path())).expect("open");
        assert!(store.pages().expect("pages").is_empty());
        assert_eq!(store.page_count().expect("count"), 0);
        assert!(!store.can_undo().expect("can_undo"));
        assert!(!store.can_redo().expect("can_redo"));
    }

    #[test]
    fn foreign_application_id_is_format_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("other.db");
        {
            let conn = Connection::open(&path).expect("open");
            conn.pragma_update(None, "application_id", 42).expect("pragma");
            conn.execute_batch("CREATE TABLE t (x INTEGER)").expect("create");
        }
        let err = PageStore::open(&path, &config(dir.path())).err().expect("rejected");
        assert!(matches!(err, ScanpaperError::Format(_)));
    }

    #[test]
    fn foreign_sqlite_file_without_id_is_format_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plain.db");
        Connection::open(&path)
            .expect("open")
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .expect("create");
        let err = PageStore::open(&path, &config(dir.path())).err().expect("rejected");
        assert!(matches!(err, ScanpaperError::Format(_)));
    }

    #[test]
    fn garbage_file_is_format_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "this is certainly not an SQLite database, just some text ".repeat(20))
            .expect("write");
        let err = PageStore::open(&path, &config(dir.path())).err().expect("rejected");
        assert!(matches!(err, ScanpaperError::Format(_)));
    }

    #[test]
    fn newer_schema_opens_read_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.db");
        let mut store = PageStore::open(&path, &config(dir.path())).expect("create");
        let first = page(dir.path(), 6, 6, 1);
        store.add_page(&first, 1).expect("add");
        store.close().expect("close");
        Connection::open(&path)
            .expect("open")
            .pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .expect("bump");

        let mut store = PageStore::open(&path, &config(dir.path())).expect("open newer");
        assert!(store.is_read_only());
        assert_eq!(ids(&store), [first.id]);
        store.get_page(PageQuery::Number(1)).expect("read");

        let err = store.add_page(&page(dir.path(), 4, 4, 2), 2).expect_err("write");
        assert!(matches!(err, ScanpaperError::ReadOnly(_)));
        let err = store.take_snapshot().expect_err("snapshot");
        assert!(matches!(err, ScanpaperError::ReadOnly(_)));
        assert!(store.undo().is_err());
        assert!(store.delete_pages(&DeleteSelector::Numbers(vec![1])).is_err());
        // SQLite itself refuses writes on this connection too
        assert!(store.conn.execute("DELETE FROM page_order", []).is_err());
        store.close().expect("close");

        let version: i32 = Connection::open(&path)
            .expect("open")
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .expect("version");
        assert_eq!(version, SCHEMA_VERSION + 1);
    }

    #[test]
    fn version_one_schema_is_upgraded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).expect("open");
            conn.execute_batch(
                "CREATE TABLE page (id INTEGER PRIMARY KEY AUTOINCREMENT, page_uuid TEXT NOT NULL,
                     image BLOB NOT NULL, image_hash TEXT NOT NULL, thumb BLOB NOT NULL,
                     format TEXT NOT NULL, width INTEGER NOT NULL, height INTEGER NOT NULL,
                     x_res REAL NOT NULL, y_res REAL NOT NULL, unit TEXT NOT NULL,
                     text_layer TEXT, annotations TEXT, dirty_time TEXT,
                     saved INTEGER NOT NULL DEFAULT 0);
                 CREATE TABLE action (action_id INTEGER PRIMARY KEY, created_at TEXT NOT NULL);
                 CREATE TABLE page_order (action_id INTEGER NOT NULL, page_number INTEGER NOT NULL,
                     page_id INTEGER NOT NULL, PRIMARY KEY (action_id, page_number));
                 CREATE TABLE undo_cursor (id INTEGER PRIMARY KEY, action_id INTEGER NOT NULL);
                 INSERT INTO action VALUES (0, '2026-01-01T00:00:00+00:00');
                 INSERT INTO undo_cursor VALUES (0, 0);",
            )
            .expect("v1 schema");
            conn.pragma_update(None, "application_id", APPLICATION_ID).expect("id");
            conn.pragma_update(None, "user_version", 1).expect("version");
        }

        let mut store = PageStore::open(&path, &config(dir.path())).expect("upgrade");
        store.add_page(&page(dir.path(), 5, 5, 0), 1).expect("add after upgrade");
        let version: i32 = store
            .conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .expect("version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn reopen_keeps_pages_and_cursor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.db");
        let first = page(dir.path(), 12, 8, 10);
        {
            let mut store = PageStore::open(&path, &config(dir.path())).expect("open");
            store.add_page(&first, 1).expect("add");
            store.add_page(&page(dir.path(), 12, 8, 20), 2).expect("add");
            store.undo().expect("undo");
            store.close().expect("close");
        }
        let store = PageStore::open(&path, &config(dir.path())).expect("reopen");
        assert_eq!(ids(&store), [first.id]);
        assert!(store.can_redo().expect("can_redo"));
        let loaded = store.get_page(PageQuery::Number(1)).expect("get");
        assert_eq!((loaded.width, loaded.height), (12, 8));
    }

    #[test]
    fn add_shifts_later_pages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, added) = store_with(dir.path(), 2);
        let middle = page(dir.path(), 10, 10, 99);
        store.add_page(&middle, 2).expect("insert");
        assert_eq!(ids(&store), [added[0], middle.id, added[1]]);
        let numbers: Vec<u32> = store.pages().expect("pages").iter().map(|e| e.number).collect();
        assert_eq!(numbers, [1, 2, 3]);
    }

    #[test]
    fn add_rejects_gaps_and_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, _) = store_with(dir.path(), 1);
        let err = store.add_page(&page(dir.path(), 4, 4, 0), 3).expect_err("gap");
        assert!(matches!(err, ScanpaperError::InvalidArgument(_)));

        let p = store.get_page(PageQuery::Number(1)).expect("get");
        let err = store.add_page(&p, 2).expect_err("duplicate");
        assert!(matches!(err, ScanpaperError::AlreadyExists(_)));
        assert_eq!(store.page_count().expect("count"), 1);
    }

    #[test]
    fn replace_keeps_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, added) = store_with(dir.path(), 3);
        let old = store.get_page(PageQuery::Number(2)).expect("get");
        let mut new = page(dir.path(), 20, 30, 5);
        new.id = old.id;
        let row = store.replace_page(&new, 2).expect("replace");
        assert_ne!(Some(row), old.row_id);
        assert_eq!(ids(&store), added);
        let loaded = store.get_page(PageQuery::Id(old.id)).expect("get");
        assert_eq!((loaded.width, loaded.height), (20, 30));

        let err = store.replace_page(&page(dir.path(), 2, 2, 0), 9).expect_err("missing");
        assert!(matches!(err, ScanpaperError::NotFound(_)));
    }

    #[test]
    fn delete_renumbers_contiguously() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, added) = store_with(dir.path(), 4);
        let removed = store.delete_pages(&DeleteSelector::Numbers(vec![2, 3])).expect("delete");
        assert_eq!(removed, 2);
        let pages = store.pages().expect("pages");
        assert_eq!(pages.iter().map(|e| e.number).collect::<Vec<_>>(), [1, 2]);
        assert_eq!(pages.iter().map(|e| e.page_id).collect::<Vec<_>>(), [added[0], added[3]]);

        store.delete_pages(&DeleteSelector::PageIds(vec![added[3]])).expect("delete by id");
        assert_eq!(ids(&store), [added[0]]);
    }

    #[test]
    fn delete_validates_selector() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, _) = store_with(dir.path(), 2);
        let err = store.delete_pages(&DeleteSelector::Numbers(vec![])).expect_err("empty");
        assert!(matches!(err, ScanpaperError::InvalidArgument(_)));
        let err = store.delete_pages(&DeleteSelector::Numbers(vec![1, 5])).expect_err("missing");
        assert!(matches!(err, ScanpaperError::NotFound(_)));
        // nothing was removed by the failed call
        assert_eq!(store.page_count().expect("count"), 2);
        let err = store
            .delete_pages(&DeleteSelector::RowIds(vec![RowId(999)]))
            .expect_err("missing row");
        assert!(matches!(err, ScanpaperError::NotFound(_)));
    }

    #[test]
    fn undo_then_redo_is_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = PageStore::open_in_memory(&config(dir.path())).expect("open");
        let mut history = vec![ids(&store)];
        for i in 0..4u8 {
            store.add_page(&page(dir.path(), 6, 6, i), 1).expect("add");
            history.push(ids(&store));
        }
        store.delete_pages(&DeleteSelector::Numbers(vec![2])).expect("delete");
        history.push(ids(&store));

        let n = history.len() - 1;
        for k in 1..=n {
            for _ in 0..k {
                store.undo().expect("undo");
            }
            assert_eq!(ids(&store), history[n - k]);
            for _ in 0..k {
                store.redo().expect("redo");
            }
            assert_eq!(ids(&store), history[n]);
        }
    }

    #[test]
    fn undo_and_redo_stop_at_the_ends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, added) = store_with(dir.path(), 1);
        assert_eq!(store.redo().expect("redo").len(), 1);
        store.undo().expect("undo");
        assert!(store.undo().expect("undo at oldest").is_empty());
        assert!(!store.can_undo().expect("can_undo"));
        store.redo().expect("redo");
        assert_eq!(ids(&store), added);
    }

    #[test]
    fn snapshot_coalesces_an_edit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, added) = store_with(dir.path(), 1);
        store.take_snapshot().expect("snapshot");
        store.add_page(&page(dir.path(), 3, 3, 1), 2).expect("add");
        store.add_page(&page(dir.path(), 3, 3, 2), 3).expect("add");
        store.finish_edit().expect("finish");
        assert_eq!(store.page_count().expect("count"), 3);
        store.undo().expect("undo");
        assert_eq!(ids(&store), added);
    }

    #[test]
    fn new_edit_drops_redo_branch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, _) = store_with(dir.path(), 2);
        store.undo().expect("undo");
        store.add_page(&page(dir.path(), 3, 3, 7), 1).expect("add");
        assert!(!store.can_redo().expect("can_redo"));
    }

    #[test]
    fn abort_returns_to_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, added) = store_with(dir.path(), 2);
        store.take_snapshot().expect("snapshot");
        store.delete_pages(&DeleteSelector::Numbers(vec![1])).expect("delete");
        store.abort_edit().expect("abort");
        assert_eq!(ids(&store), added);
        assert!(!store.can_redo().expect("can_redo"));
    }

    #[test]
    fn abort_without_undo_history_keeps_pages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = PageStore::open_in_memory(&EngineConfig {
            undo_steps: 0,
            ..config(dir.path())
        })
        .expect("open");
        let a = page(dir.path(), 5, 5, 1);
        let b = page(dir.path(), 5, 5, 2);
        store.add_page(&a, 1).expect("add");
        store.add_page(&b, 2).expect("add");
        assert!(!store.can_undo().expect("can_undo"));

        store.take_snapshot().expect("snapshot");
        store.delete_pages(&DeleteSelector::Numbers(vec![1])).expect("delete");
        store.abort_edit().expect("abort");
        assert_eq!(ids(&store), [a.id, b.id]);
        store.get_page(PageQuery::Number(2)).expect("still loadable");

        store.take_snapshot().expect("snapshot");
        store.delete_pages(&DeleteSelector::Numbers(vec![1])).expect("delete");
        store.finish_edit().expect("finish");
        assert_eq!(ids(&store), [b.id]);
        assert!(!store.can_undo().expect("can_undo"));
    }

    #[test]
    fn history_is_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = PageStore::open_in_memory(&EngineConfig {
            undo_steps: 2,
            ..config(dir.path())
        })
        .expect("open");
        for i in 0..5u8 {
            store.add_page(&page(dir.path(), 3, 3, i), 1).expect("add");
        }
        store.undo().expect("undo");
        store.undo().expect("undo");
        assert!(!store.can_undo().expect("can_undo"));
        assert_eq!(store.page_count().expect("count"), 3);
    }

    #[test]
    fn dedupe_reuses_identical_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = PageStore::open_in_memory(&config(dir.path())).expect("open");
        let p = page(dir.path(), 8, 8, 50);
        let row = store.insert_image(&p, None).expect("insert");
        assert_eq!(store.insert_image(&p, Some(row)).expect("dedupe"), row);

        let other = page(dir.path(), 8, 8, 51);
        assert_ne!(store.insert_image(&other, Some(row)).expect("insert"), row);

        let err = store.insert_image(&p, Some(RowId(4242))).expect_err("missing");
        assert!(matches!(err, ScanpaperError::NotFound(_)));
    }

    #[test]
    fn inserted_row_survives_other_edits_until_placed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = PageStore::open_in_memory(&config(dir.path())).expect("open");
        let mut extra = page(dir.path(), 7, 7, 30);
        let row = store.insert_image(&extra, None).expect("insert");

        store.add_page(&page(dir.path(), 7, 7, 31), 1).expect("add other");
        store.take_snapshot().expect("snapshot");
        store.add_page(&page(dir.path(), 7, 7, 32), 1).expect("add in edit");
        store.abort_edit().expect("abort");
        store.take_snapshot().expect("snapshot");
        store.finish_edit().expect("finish");
        assert_eq!(store.load_page(row).expect("loose row").id, extra.id);

        extra.row_id = Some(row);
        assert_eq!(store.add_page(&extra, 2).expect("place"), row);
        store.delete_pages(&DeleteSelector::RowIds(vec![row])).expect("delete");
        // placed once, the row is collected like any other when history lets go
        for _ in 0..EngineConfig::default().undo_steps {
            store.delete_pages(&DeleteSelector::Numbers(vec![1])).expect("delete");
            store.add_page(&page(dir.path(), 2, 2, 0), 1).expect("churn");
        }
        assert!(matches!(store.load_page(row), Err(ScanpaperError::NotFound(_))));
    }

    #[test]
    fn get_page_round_trips_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = PageStore::open_in_memory(&config(dir.path())).expect("open");
        let mut p = page(dir.path(), 30, 20, 128);
        p.resolution = Resolution::new(300.0, 150.0, ResolutionUnit::PixelsPerInch);
        p.import_text("hello world");
        p.mark_dirty();
        p.ocr = OcrState {
            performed: true,
            time: Some(Utc::now()),
        };
        let row = store.add_page(&p, 1).expect("add");

        let loaded = store.get_page(PageQuery::Id(p.id)).expect("get");
        assert_eq!(loaded.row_id, Some(row));
        assert_eq!(loaded.resolution, p.resolution);
        assert_eq!(loaded.text_layer, p.text_layer);
        assert_eq!(loaded.ocr.performed, true);
        assert!(!loaded.saved);
        assert_eq!(loaded.image_bytes().expect("bytes"), p.image_bytes().expect("bytes"));

        let err = store.get_page(PageQuery::Number(2)).expect_err("missing");
        assert!(matches!(err, ScanpaperError::NotFound(_)));
        let err = store.get_page(PageQuery::Id(PageId::new())).expect_err("missing");
        assert!(matches!(err, ScanpaperError::NotFound(_)));
    }

    #[test]
    fn thumbnail_is_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = PageStore::open_in_memory(&config(dir.path())).expect("open");
        let row = store.add_page(&page(dir.path(), 400, 100, 0), 1).expect("add");
        let thumb = ImageProcessor::from_bytes(&store.get_thumb(row).expect("thumb")).expect("png");
        assert_eq!((thumb.width(), thumb.height()), (100, 25));
        assert!(store.get_thumb(RowId(77)).is_err());
    }

    #[test]
    fn metadata_update_keeps_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, _) = store_with(dir.path(), 1);
        let mut p = store.get_page(PageQuery::Number(1)).expect("get");
        p.analysis = Some(PageAnalysis {
            mean: vec![12.5],
            std_dev: vec![0.0],
            analysed_at: Utc::now(),
        });
        store.update_page_metadata(&p).expect("update");
        let loaded = store.get_page(PageQuery::Number(1)).expect("get");
        assert_eq!(loaded.row_id, p.row_id);
        assert_eq!(loaded.analysis.expect("analysis").mean, [12.5]);
    }
}
