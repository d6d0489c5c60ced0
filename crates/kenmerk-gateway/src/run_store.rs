//! Run Store / Status Tracker — thread-safe in-memory `RunRecord` map,
//! durably mirrored to SQLite. Grounded on `ChronosSqlite`: a fresh
//! `Connection` per call, `PRAGMA foreign_keys=ON`, `CREATE TABLE IF NOT
//! EXISTS` + `execute_batch` at construction, `ON CONFLICT ... DO UPDATE`
//! upserts. Unlike `ChronosSqlite`'s long-lived chat history, a RunRecord
//! is write-heavy and short-lived, so the in-memory `DashMap` is the
//! primary read path; SQLite exists purely as the durable mirror §6
//! requires ("on VALIDATED=true the store must durably record the run's
//! final payload").
//!
//! Fail-closed persistence (spec §7): a run that ends `validation_failed`
//! in production has its `chapters` column left empty — only the status,
//! `core_summary`, and diagnostics survive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use kenmerk_core::four_plane::ChapterPlaneComposition;
use kenmerk_core::{CoreSummary, PipelinePhase};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Done,
    Error,
    ValidationFailed,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Error => "error",
            RunStatus::ValidationFailed => "validation_failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "running" => RunStatus::Running,
            "done" => RunStatus::Done,
            "error" => RunStatus::Error,
            "validation_failed" => RunStatus::ValidationFailed,
            _ => RunStatus::Queued,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Error | RunStatus::ValidationFailed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEntry {
    pub status: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterPlaneStatus {
    pub chapter_id: u32,
    pub status: String,
    pub word_count: Option<usize>,
}

/// One job's state (spec §3 `RunRecord`). Cloned out of the `DashMap` for
/// every status/report read so handlers never hold the map lock across an
/// await point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub input_url_or_marker: String,
    pub status: RunStatus,
    pub phase: Option<PipelinePhase>,
    pub steps: BTreeMap<String, StepEntry>,
    pub chapter_statuses: BTreeMap<u32, ChapterPlaneStatus>,
    pub core_summary: Option<CoreSummary>,
    pub chapters: BTreeMap<u32, ChapterPlaneComposition>,
    pub unknowns: Vec<String>,
    pub errors: Vec<String>,
    pub test_mode: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    /// Raw HTML accepted by `POST /runs` or `POST /runs/{id}/paste`,
    /// consumed by `POST /runs/{id}/start`. Not mirrored to SQLite: it is
    /// working state for a still-queued run, not part of the durable
    /// payload the Run Store contract (spec §4.10) covers.
    #[serde(skip)]
    pub pending_html: Option<String>,
    #[serde(skip)]
    pub pending_media_urls: Vec<String>,
}

impl RunRecord {
    fn new(run_id: String, input_url_or_marker: String, test_mode: bool) -> Self {
        let now = now_ms();
        Self {
            run_id,
            input_url_or_marker,
            status: RunStatus::Queued,
            phase: None,
            steps: BTreeMap::new(),
            chapter_statuses: BTreeMap::new(),
            core_summary: None,
            chapters: BTreeMap::new(),
            unknowns: Vec::new(),
            errors: Vec::new(),
            test_mode,
            created_at_ms: now,
            updated_at_ms: now,
            pending_html: None,
            pending_media_urls: Vec::new(),
        }
    }

    pub fn progress(&self) -> (usize, usize, u32) {
        let total = kenmerk_core::chapters::CHAPTER_COUNT as usize + 2;
        let chapters_done = self.chapter_statuses.values().filter(|c| c.status == "done").count();
        let phase_credit = self.phase.map(|p| p as usize + 1).unwrap_or(0).min(2);
        let done = (chapters_done + phase_credit).min(total);
        let percent = if total == 0 { 0 } else { ((done * 100) / total) as u32 };
        (done, total, percent)
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// SQLite mirror. Opens a fresh connection per call rather than holding
/// one across awaits, matching the teacher's `ChronosSqlite` shape.
#[derive(Clone)]
pub struct RunStoreDb {
    db_path: PathBuf,
}

impl RunStoreDb {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        let this = Self { db_path: db_path.as_ref().to_path_buf() };
        this.init()?;
        Ok(this)
    }

    fn open(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        let _ = conn.pragma_update(None, "foreign_keys", "ON");
        Ok(conn)
    }

    fn init(&self) -> Result<(), rusqlite::Error> {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = self.open()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                input_url_or_marker TEXT NOT NULL,
                status TEXT NOT NULL,
                phase TEXT,
                steps_json TEXT NOT NULL DEFAULT '{}',
                unknowns_json TEXT NOT NULL DEFAULT '[]',
                errors_json TEXT NOT NULL DEFAULT '[]',
                test_mode INTEGER NOT NULL DEFAULT 0,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS run_payloads (
                run_id TEXT PRIMARY KEY REFERENCES runs(run_id) ON DELETE CASCADE,
                core_summary_json TEXT,
                chapters_json TEXT NOT NULL DEFAULT '{}',
                updated_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
            CREATE INDEX IF NOT EXISTS idx_runs_updated_at ON runs(updated_at_ms);
            "#,
        )?;
        Ok(())
    }

    /// Upserts the row-level fields. Called after every progress event.
    pub fn upsert_record(&self, r: &RunRecord) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        let phase = r.phase.map(|p| format!("{p:?}"));
        let steps_json = serde_json::to_string(&r.steps).unwrap_or_else(|_| "{}".to_string());
        let unknowns_json = serde_json::to_string(&r.unknowns).unwrap_or_else(|_| "[]".to_string());
        let errors_json = serde_json::to_string(&r.errors).unwrap_or_else(|_| "[]".to_string());
        conn.execute(
            r#"
            INSERT INTO runs (run_id, input_url_or_marker, status, phase, steps_json, unknowns_json, errors_json, test_mode, created_at_ms, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                phase = excluded.phase,
                steps_json = excluded.steps_json,
                unknowns_json = excluded.unknowns_json,
                errors_json = excluded.errors_json,
                updated_at_ms = excluded.updated_at_ms
            "#,
            rusqlite::params![r.run_id, r.input_url_or_marker, r.status.as_str(), phase, steps_json, unknowns_json, errors_json, r.test_mode as i64, r.updated_at_ms],
        )?;
        Ok(())
    }

    /// Persists the final payload. Fail-closed: callers must pass an
    /// empty `chapters` map when the run ended `validation_failed` in
    /// production (spec §7) — this function does not itself enforce
    /// that, the caller in `job_queue` does.
    pub fn upsert_payload(&self, run_id: &str, core_summary: Option<&CoreSummary>, chapters: &BTreeMap<u32, ChapterPlaneComposition>) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        let core_summary_json = core_summary.map(|c| serde_json::to_string(c).unwrap_or_default());
        let chapters_json = serde_json::to_string(chapters).unwrap_or_else(|_| "{}".to_string());
        conn.execute(
            r#"
            INSERT INTO run_payloads (run_id, core_summary_json, chapters_json, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(run_id) DO UPDATE SET
                core_summary_json = excluded.core_summary_json,
                chapters_json = excluded.chapters_json,
                updated_at_ms = excluded.updated_at_ms
            "#,
            rusqlite::params![run_id, core_summary_json, chapters_json, now_ms()],
        )?;
        Ok(())
    }

    /// Sweeps `runs` rows older than `max_age_ms` with a terminal status.
    pub fn cleanup_old(&self, max_age_ms: i64) -> Result<usize, rusqlite::Error> {
        let conn = self.open()?;
        let cutoff = now_ms() - max_age_ms;
        let n = conn.execute(
            "DELETE FROM runs WHERE updated_at_ms < ?1 AND status IN ('done', 'error', 'validation_failed')",
            rusqlite::params![cutoff],
        )?;
        Ok(n)
    }
}

/// In-memory view plus durable mirror. Construction, `create`, and every
/// mutator match the names spec §4.10 gives them.
pub struct RunStore {
    records: DashMap<String, RunRecord>,
    db: RunStoreDb,
}

impl RunStore {
    pub fn new(db: RunStoreDb) -> Arc<Self> {
        Arc::new(Self { records: DashMap::new(), db })
    }

    pub fn create(&self, run_id: String, input_url_or_marker: String, test_mode: bool) -> RunRecord {
        let record = RunRecord::new(run_id.clone(), input_url_or_marker, test_mode);
        let _ = self.db.upsert_record(&record);
        self.records.insert(run_id, record.clone());
        record
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.records.get(run_id).map(|r| r.clone())
    }

    fn touch_and_persist(&self, run_id: &str, f: impl FnOnce(&mut RunRecord)) {
        if let Some(mut entry) = self.records.get_mut(run_id) {
            f(&mut entry);
            entry.updated_at_ms = now_ms();
            let _ = self.db.upsert_record(&entry);
        }
    }

    pub fn mark_running(&self, run_id: &str) {
        self.touch_and_persist(run_id, |r| r.status = RunStatus::Running);
    }

    /// Stores or replaces the raw HTML awaiting `POST /runs/{id}/start`.
    /// Used by both `POST /runs` (when `funda_html` is supplied inline)
    /// and `POST /runs/{id}/paste` (when the caller pastes it afterward
    /// because the initial fetch hit a paywall).
    pub fn set_pending_html(&self, run_id: &str, html: String, media_urls: Vec<String>) {
        self.touch_and_persist(run_id, |r| {
            r.pending_html = Some(html);
            r.pending_media_urls = media_urls;
        });
    }

    /// Removes and returns the pending HTML/media so `POST
    /// /runs/{id}/start` can hand it to the scraper exactly once.
    pub fn take_pending(&self, run_id: &str) -> Option<(String, Vec<String>)> {
        let mut entry = self.records.get_mut(run_id)?;
        let html = entry.pending_html.take()?;
        let media = std::mem::take(&mut entry.pending_media_urls);
        Some((html, media))
    }

    pub fn update_step(&self, run_id: &str, step: &str, status: &str, message: Option<String>) {
        self.touch_and_persist(run_id, |r| {
            r.steps.insert(step.to_string(), StepEntry { status: status.to_string(), message });
        });
    }

    pub fn update_phase(&self, run_id: &str, phase: PipelinePhase) {
        self.touch_and_persist(run_id, |r| r.phase = Some(phase));
    }

    pub fn update_chapter_status(&self, run_id: &str, chapter_id: u32, status: &str, word_count: Option<usize>) {
        self.touch_and_persist(run_id, |r| {
            r.chapter_statuses.insert(chapter_id, ChapterPlaneStatus { chapter_id, status: status.to_string(), word_count });
        });
    }

    pub fn add_warning(&self, run_id: &str, message: String) {
        self.touch_and_persist(run_id, |r| r.unknowns.push(message));
    }

    pub fn add_error(&self, run_id: &str, message: String) {
        self.touch_and_persist(run_id, |r| r.errors.push(message));
    }

    /// Terminal transition. `chapters` is only durably mirrored when
    /// `status == Done`; a `ValidationFailed` or `Error` outcome mirrors
    /// an empty chapter map regardless of what was built in memory, per
    /// the fail-closed persistence rule. `core_summary` is kept across
    /// every terminal status: spec §7 requires "only CoreSummary and
    /// diagnostics survive" a validation failure, not that it too is
    /// discarded.
    pub fn complete(&self, run_id: &str, status: RunStatus, core_summary: Option<CoreSummary>, chapters: BTreeMap<u32, ChapterPlaneComposition>) {
        let keep_chapters = status == RunStatus::Done;
        let persisted_chapters = if keep_chapters { chapters } else { BTreeMap::new() };
        self.touch_and_persist(run_id, |r| {
            r.status = status;
            r.core_summary = core_summary.clone();
            r.chapters = persisted_chapters.clone();
        });
        if let Some(record) = self.records.get(run_id) {
            let _ = self.db.upsert_payload(run_id, record.core_summary.as_ref(), &record.chapters);
        }
    }

    /// Zombie sweep: any `running` record untouched for `zombie_timeout_ms`
    /// is transitioned to `error` with an explicit reason (spec §3/§4.12).
    pub fn sweep_zombies(&self, zombie_timeout_ms: i64) -> Vec<String> {
        let cutoff = now_ms() - zombie_timeout_ms;
        let mut swept = Vec::new();
        for mut entry in self.records.iter_mut() {
            if entry.status == RunStatus::Running && entry.updated_at_ms < cutoff {
                entry.status = RunStatus::Error;
                entry.errors.push("cancelled: no progress within zombie timeout".to_string());
                entry.updated_at_ms = now_ms();
                let _ = self.db.upsert_record(&entry);
                swept.push(entry.run_id.clone());
            }
        }
        swept
    }

    pub fn cleanup_old(&self, max_age_ms: i64) {
        let cutoff = now_ms() - max_age_ms;
        self.records.retain(|_, r| !(r.status.is_terminal() && r.updated_at_ms < cutoff));
        let _ = self.db.cleanup_old(max_age_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> RunStoreDb {
        let path = std::env::temp_dir().join(format!("kenmerk_run_store_test_{}.sqlite3", uuid::Uuid::new_v4()));
        RunStoreDb::new(path).unwrap()
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = RunStore::new(temp_db());
        let record = store.create("r1".to_string(), "https://example.com/listing".to_string(), false);
        assert_eq!(record.status, RunStatus::Queued);
        let fetched = store.get("r1").unwrap();
        assert_eq!(fetched.run_id, "r1");
    }

    #[test]
    fn complete_with_validation_failed_discards_chapters() {
        let store = RunStore::new(temp_db());
        store.create("r2".to_string(), "marker".to_string(), false);
        let mut chapters = BTreeMap::new();
        chapters.insert(0, sample_composition());
        store.complete("r2", RunStatus::ValidationFailed, None, chapters);
        let record = store.get("r2").unwrap();
        assert_eq!(record.status, RunStatus::ValidationFailed);
        assert!(record.chapters.is_empty());
    }

    #[test]
    fn zombie_sweep_marks_stale_running_record_as_error() {
        let store = RunStore::new(temp_db());
        store.create("r3".to_string(), "marker".to_string(), false);
        store.mark_running("r3");
        if let Some(mut entry) = store.records.get_mut("r3") {
            entry.updated_at_ms = now_ms() - 10_000;
        }
        let swept = store.sweep_zombies(1_000);
        assert_eq!(swept, vec!["r3".to_string()]);
        assert_eq!(store.get("r3").unwrap().status, RunStatus::Error);
    }

    fn sample_composition() -> ChapterPlaneComposition {
        use kenmerk_core::four_plane::{Diagnostics, PlaneA, PlaneB, PlaneC, PlaneD};
        ChapterPlaneComposition {
            chapter_id: 0,
            chapter_title: "Executive Summary".to_string(),
            plane_structure: true,
            plane_a: PlaneA::not_applicable("test"),
            plane_a2: None,
            plane_b: PlaneB::from_narrative("word ".repeat(520), "openai", "gpt-4o"),
            plane_c: PlaneC::not_applicable("test"),
            plane_d: PlaneD::new(BTreeMap::new()),
            diagnostics: Diagnostics::new(0),
        }
    }
}
