//! End-to-end tests: locate → fetch → parse → derive → write against an
//! in-memory upstream and a temporary SQLite database.
//!
//! Run with:
//! ```sh
//! cargo test --test integration_test
//! ```

use once_cell::sync::Lazy;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use smogon_usage_to_sqlite::config::PipelineConfig;
use smogon_usage_to_sqlite::download::{
    CacheManager, HttpResponse, SnapshotFetcher, Transport, TransportError,
};
use smogon_usage_to_sqlite::error::{FetchError, PipelineError};
use smogon_usage_to_sqlite::month::SnapshotMonth;
use smogon_usage_to_sqlite::pipeline::{
    classify, convert_files, MonthOutcome, Pipeline, RunReport, Stage,
};
use smogon_usage_to_sqlite::writer::SqliteWriter;

// =============================================================================
// Fixtures
// =============================================================================

const BASE_URL: &str = "http://stats.test";
const RATING: u32 = 1760;
const FORMAT: &str = "gen9vgc2025reggbo3";

/// Detailed listing in the percentage convention
static DETAIL: Lazy<Value> = Lazy::new(|| {
    json!({
        "info": {"metagame": FORMAT, "cutoff": 1760, "number of battles": 1000},
        "data": {
            "Incineroar": {
                "usage": 48.5,
                "Abilities": {"Intimidate": 99.0, "Blaze": 1.0},
                "Items": {"Safety Goggles": 40.0, "Assault Vest": 35.0},
                "Tera Types": {"Ghost": 55.0, "Grass": 20.0},
                "Spreads": {"Careful:252/4/0/0/252/0": 30.0, "Adamant:252/252/0/0/4/0": 25.0},
                "Moves": {
                    "Fake Out": 90.0,
                    "Parting Shot": 70.0,
                    "Flare Blitz": 60.0,
                    "U-turn": 30.0,
                    "Knock Off": 10.0
                }
            },
            "Amoonguss": {
                "usage": 22.0,
                "Abilities": {"Regenerator": 100.0},
                "Items": {"Sitrus Berry": 20.0, "Rocky Helmet": 20.0},
                "Moves": {"Spore": 100.0, "Rage Powder": 95.0}
            },
            "Urshifu-Rapid-Strike": {
                "usage": 30.0,
                "Items": {"Choice Scarf": 60.0},
                "Moves": {"Surging Strikes": 100.0, "Close Combat": 98.0}
            }
        }
    })
});

/// Same entities, one of them with an unreadable usage value
static DETAIL_ONE_MALFORMED: Lazy<Value> = Lazy::new(|| {
    let mut detail: Value = DETAIL.clone();
    detail["data"]["Amoonguss"]["usage"] = json!("lots");
    detail
});

const RANKING: &str = " Total battles: 1000
 + ---- + -------------------- + --------- +
 | Rank | Pokemon              | Usage %   |
 + ---- + -------------------- + --------- +
 | 1    | Incineroar           | 48.50000% |
 | 2    | Urshifu-Rapid-Strike | 30.00000% |
 | 3    | Amoonguss            | 22.00000% |
 | 4    | Rillaboom            | 18.25000% |
 + ---- + -------------------- + --------- +
";

fn month(s: &str) -> SnapshotMonth {
    s.parse().unwrap()
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        rating: RATING,
        max_retries: 1,
        backoff_base: Duration::ZERO,
        backoff_max: Duration::ZERO,
        ..PipelineConfig::default()
    }
    .with_base_url(BASE_URL)
}

// =============================================================================
// In-memory upstream
// =============================================================================

/// Serves fixed pages; everything else is a 404. Records every request.
#[derive(Default)]
struct MemoryUpstream {
    pages: HashMap<String, (u16, String)>,
    requests: RefCell<Vec<String>>,
}

impl MemoryUpstream {
    /// Publish a month: directory index, detailed listing and optional ranking
    fn publish(&mut self, month: &str, format: &str, detail: &str, ranking: Option<&str>) {
        let detail_file = format!("{}-{}.json", format, RATING);
        self.pages.insert(
            format!("{}/{}/chaos/", BASE_URL, month),
            (
                200,
                format!(
                    "<html><body><a href=\"../\">../</a>\n<a href=\"{0}\">{0}</a></body></html>",
                    detail_file
                ),
            ),
        );
        self.pages.insert(
            format!("{}/{}/chaos/{}", BASE_URL, month, detail_file),
            (200, detail.to_string()),
        );
        if let Some(ranking) = ranking {
            self.pages.insert(
                format!("{}/{}/{}-{}.txt", BASE_URL, month, format, RATING),
                (200, ranking.to_string()),
            );
        }
    }

    fn set(&mut self, url: String, status: u16, body: &str) {
        self.pages.insert(url, (status, body.to_string()));
    }

    fn requests_to(&self, url: &str) -> usize {
        self.requests.borrow().iter().filter(|u| *u == url).count()
    }
}

impl Transport for MemoryUpstream {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.requests.borrow_mut().push(url.to_string());
        Ok(match self.pages.get(url) {
            Some((status, body)) => HttpResponse {
                status: *status,
                body: body.clone(),
            },
            None => HttpResponse {
                status: 404,
                body: String::new(),
            },
        })
    }

    fn head(&self, url: &str) -> Result<u16, TransportError> {
        self.requests.borrow_mut().push(url.to_string());
        Ok(self.pages.get(url).map(|(status, _)| *status).unwrap_or(404))
    }
}

/// Every request fails as if the network were down
#[derive(Default)]
struct Outage {
    requests: RefCell<usize>,
}

impl Transport for Outage {
    fn get(&self, _url: &str) -> Result<HttpResponse, TransportError> {
        *self.requests.borrow_mut() += 1;
        Err(TransportError::transient("connection refused"))
    }

    fn head(&self, _url: &str) -> Result<u16, TransportError> {
        *self.requests.borrow_mut() += 1;
        Err(TransportError::transient("connection refused"))
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct TestDb {
    _dir: TempDir,
    writer: SqliteWriter,
}

impl TestDb {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let writer = SqliteWriter::open(&dir.path().join("usage.db")).unwrap();
        Self { _dir: dir, writer }
    }

    /// Every row, every column, in key order
    fn dump(&self) -> Vec<Vec<SqlValue>> {
        let conn = self.writer.connection();
        let mut stmt = conn
            .prepare("SELECT * FROM smogon_usage ORDER BY snapshot_month, format, name")
            .unwrap();
        let width = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows
    }

    fn names(&self, snapshot_month: &str) -> Vec<String> {
        let conn = self.writer.connection();
        let mut stmt = conn
            .prepare("SELECT name FROM smogon_usage WHERE snapshot_month = ?1 ORDER BY usage DESC, name")
            .unwrap();
        let names = stmt
            .query_map([snapshot_month], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        names
    }

    fn text(&self, name: &str, column: &str) -> Option<String> {
        self.writer
            .connection()
            .query_row(
                &format!("SELECT {} FROM smogon_usage WHERE name = ?1", column),
                [name],
                |row| row.get(0),
            )
            .unwrap()
    }

    fn real(&self, name: &str, column: &str) -> f64 {
        self.writer
            .connection()
            .query_row(
                &format!("SELECT {} FROM smogon_usage WHERE name = ?1", column),
                [name],
                |row| row.get(0),
            )
            .unwrap()
    }
}

fn run(upstream: &MemoryUpstream, db: &mut TestDb, months: &[&str], hint: Option<&str>) -> RunReport {
    let pipeline = Pipeline::new(SnapshotFetcher::new(upstream, fast_config()));
    let months: Vec<SnapshotMonth> = months.iter().map(|m| month(m)).collect();
    pipeline.run(&mut db.writer, &months, hint)
}

fn outcome<'a>(report: &'a RunReport, m: &str) -> &'a MonthOutcome {
    &report
        .months
        .iter()
        .find(|r| r.month == month(m))
        .unwrap()
        .outcome
}

fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_scenario_single_entity_from_local_file() {
    let mut db = TestDb::new();
    let dir = tempfile::tempdir().unwrap();
    let detail = write_file(
        dir.path(),
        "chaos.json",
        r#"{"Incineroar": {"usage": 100, "items": {"Safety Goggles": 40, "Assault Vest": 35},
            "moves": {"Fake Out": 90, "Parting Shot": 70, "Flare Blitz": 60, "U-turn": 30, "Knock Off": 10}}}"#,
    );

    let report = convert_files(&mut db.writer, &detail, None, month("2025-08"), "gen9vgc2025regi-bo3");
    assert_eq!(report.exit_code(), 0);

    let rows = db.dump();
    assert_eq!(rows.len(), 1);
    assert_eq!(db.text("Incineroar", "snapshot_month").as_deref(), Some("2025-08"));
    assert_eq!(db.text("Incineroar", "format").as_deref(), Some("gen9vgc2025regi-bo3"));
    assert_eq!(db.real("Incineroar", "usage"), 100.0);
    assert_eq!(db.text("Incineroar", "top_item").as_deref(), Some("Safety Goggles"));
    assert_eq!(db.real("Incineroar", "top_item_pct"), 40.0);
    assert_eq!(db.text("Incineroar", "move1").as_deref(), Some("Fake Out"));
    assert_eq!(db.real("Incineroar", "move1_pct"), 90.0);
    assert_eq!(db.text("Incineroar", "move2").as_deref(), Some("Parting Shot"));
    assert_eq!(db.real("Incineroar", "move2_pct"), 70.0);
    assert_eq!(db.text("Incineroar", "move3").as_deref(), Some("Flare Blitz"));
    assert_eq!(db.real("Incineroar", "move3_pct"), 60.0);
    assert_eq!(db.text("Incineroar", "move4").as_deref(), Some("U-turn"));
    assert_eq!(db.real("Incineroar", "move4_pct"), 30.0);
    assert_eq!(db.text("Incineroar", "top_tera_type"), None);
}

#[test]
fn test_sync_month_end_to_end() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-02", FORMAT, &DETAIL.to_string(), Some(RANKING));
    let mut db = TestDb::new();

    let report = run(&upstream, &mut db, &["2025-02"], None);

    assert_eq!(
        outcome(&report, "2025-02"),
        &MonthOutcome::Succeeded {
            format: FORMAT.to_string(),
            rows: 4,
            replaced: 0,
            skipped_records: 0,
        }
    );
    assert_eq!(
        db.names("2025-02"),
        vec!["Incineroar", "Urshifu-Rapid-Strike", "Amoonguss", "Rillaboom"]
    );
    assert_eq!(db.text("Incineroar", "top_ability").as_deref(), Some("Intimidate"));
    assert_eq!(db.text("Incineroar", "top_tera_type").as_deref(), Some("Ghost"));
    assert_eq!(db.real("Incineroar", "top_tera_pct"), 55.0);
    assert_eq!(
        db.text("Incineroar", "top_spread").as_deref(),
        Some("Careful:252/4/0/0/252/0")
    );
    assert_eq!(
        db.text("Incineroar", "top_spread_no_nature").as_deref(),
        Some("252/4/0/0/252/0")
    );
    assert_eq!(db.text("Incineroar", "top_nature").as_deref(), Some("Careful"));
}

#[test]
fn test_rerun_is_idempotent() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-02", FORMAT, &DETAIL.to_string(), Some(RANKING));
    let mut db = TestDb::new();

    run(&upstream, &mut db, &["2025-02"], None);
    let first = db.dump();

    let report = run(&upstream, &mut db, &["2025-02"], None);
    assert!(matches!(
        outcome(&report, "2025-02"),
        MonthOutcome::Succeeded { rows: 4, replaced: 4, .. }
    ));
    assert_eq!(db.dump(), first);
}

#[test]
fn test_tie_break_is_independent_of_key_order() {
    let forward = r#"{"Amoonguss": {"usage": 22, "items": {"Sitrus Berry": 20, "Rocky Helmet": 20}}}"#;
    let backward = r#"{"Amoonguss": {"usage": 22, "items": {"Rocky Helmet": 20, "Sitrus Berry": 20}}}"#;

    for detail in [forward, backward, forward] {
        let mut upstream = MemoryUpstream::default();
        upstream.publish("2025-02", FORMAT, detail, None);
        let mut db = TestDb::new();

        run(&upstream, &mut db, &["2025-02"], None);
        assert_eq!(db.text("Amoonguss", "top_item").as_deref(), Some("Rocky Helmet"));
        assert_eq!(db.real("Amoonguss", "top_item_pct"), 20.0);
    }
}

#[test]
fn test_ranking_only_entity_gets_row_with_empty_details() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-02", FORMAT, &DETAIL.to_string(), Some(RANKING));
    let mut db = TestDb::new();

    run(&upstream, &mut db, &["2025-02"], None);

    assert_eq!(db.real("Rillaboom", "usage"), 18.25);
    assert_eq!(db.text("Rillaboom", "top_item"), None);
    assert_eq!(db.real("Rillaboom", "top_item_pct"), 0.0);
    assert_eq!(db.text("Rillaboom", "move1"), None);
    assert_eq!(db.real("Rillaboom", "move1_pct"), 0.0);
}

#[test]
fn test_malformed_entity_is_skipped_not_fatal() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-02", FORMAT, &DETAIL_ONE_MALFORMED.to_string(), None);
    let mut db = TestDb::new();

    let report = run(&upstream, &mut db, &["2025-02"], None);

    assert_eq!(
        outcome(&report, "2025-02"),
        &MonthOutcome::Succeeded {
            format: FORMAT.to_string(),
            rows: 2,
            replaced: 0,
            skipped_records: 1,
        }
    );
    assert_eq!(db.names("2025-02"), vec!["Incineroar", "Urshifu-Rapid-Strike"]);
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn test_unpublished_month_is_skipped() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-01", FORMAT, &DETAIL.to_string(), Some(RANKING));
    upstream.publish("2025-02", FORMAT, &DETAIL.to_string(), None);
    let mut db = TestDb::new();

    let report = run(&upstream, &mut db, &["2025-01", "2025-02", "2025-03"], None);

    assert_eq!((report.succeeded(), report.skipped(), report.failed()), (2, 1, 0));
    assert_eq!(report.exit_code(), 0);
    assert!(matches!(outcome(&report, "2025-03"), MonthOutcome::Skipped { .. }));
    assert_eq!(db.names("2025-01").len(), 4);
    assert_eq!(db.names("2025-02").len(), 3);
    assert!(db.names("2025-03").is_empty());
}

#[test]
fn test_failed_month_does_not_stop_the_batch() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-01", FORMAT, &DETAIL.to_string(), None);
    upstream.publish("2025-02", FORMAT, "{ not json", None);
    upstream.publish("2025-03", FORMAT, &DETAIL.to_string(), None);
    let mut db = TestDb::new();

    // Unsorted with a duplicate; processed once each, ascending
    let report = run(&upstream, &mut db, &["2025-03", "2025-01", "2025-02", "2025-03"], None);

    let months: Vec<String> = report.months.iter().map(|r| r.month.to_string()).collect();
    assert_eq!(months, vec!["2025-01", "2025-02", "2025-03"]);
    assert!(matches!(
        outcome(&report, "2025-02"),
        MonthOutcome::Failed { stage: Stage::Parse, .. }
    ));
    assert_eq!((report.succeeded(), report.failed()), (2, 1));
    assert_eq!(report.exit_code(), 1);
    assert!(db.names("2025-02").is_empty());
    assert_eq!(db.names("2025-03").len(), 3);
}

#[test]
fn test_server_error_fails_month_after_retries() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-01", FORMAT, &DETAIL.to_string(), None);
    let detail_url = format!("{}/2025-01/chaos/{}-{}.json", BASE_URL, FORMAT, RATING);
    upstream.set(detail_url.clone(), 503, "");
    let mut db = TestDb::new();

    let report = run(&upstream, &mut db, &["2025-01"], None);

    assert!(matches!(
        outcome(&report, "2025-01"),
        MonthOutcome::Failed { stage: Stage::Fetch, .. }
    ));
    // One try plus one retry
    assert_eq!(upstream.requests_to(&detail_url), 2);
}

#[test]
fn test_format_hint_selects_among_published_formats() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-08", "gen9vgc2025regibo3", &DETAIL.to_string(), None);
    // A second format in the same directory
    let index_url = format!("{}/2025-08/chaos/", BASE_URL);
    upstream.set(
        index_url,
        200,
        "<a href=\"gen9vgc2025regibo3-1760.json\">x</a>\n<a href=\"gen9vgc2025regi-1760.json\">y</a>",
    );
    upstream.set(
        format!("{}/2025-08/chaos/gen9vgc2025regi-1760.json", BASE_URL),
        200,
        r#"{"Incineroar": {"usage": 50}}"#,
    );
    let mut db = TestDb::new();

    // Without a hint the newest convention wins
    let report = run(&upstream, &mut db, &["2025-08"], None);
    assert!(matches!(
        outcome(&report, "2025-08"),
        MonthOutcome::Succeeded { format, .. } if format == "gen9vgc2025regibo3"
    ));

    // An exact tag beats the bo3 tag that contains it
    let report = run(&upstream, &mut db, &["2025-08"], Some("gen9vgc2025regi"));
    assert!(matches!(
        outcome(&report, "2025-08"),
        MonthOutcome::Succeeded { format, rows: 1, .. } if format == "gen9vgc2025regi"
    ));

    let report = run(&upstream, &mut db, &["2025-08"], Some("bo3"));
    assert!(matches!(
        outcome(&report, "2025-08"),
        MonthOutcome::Succeeded { format, .. } if format == "gen9vgc2025regibo3"
    ));

    // Hint excludes every published format
    let report = run(&upstream, &mut db, &["2025-08"], Some("regh"));
    assert!(matches!(outcome(&report, "2025-08"), MonthOutcome::Skipped { .. }));
}

#[test]
fn test_probes_files_when_index_is_unavailable() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-02", FORMAT, &DETAIL.to_string(), None);
    let index_url = format!("{}/2025-02/chaos/", BASE_URL);
    upstream.set(index_url.clone(), 403, "forbidden");
    let mut db = TestDb::new();

    let report = run(&upstream, &mut db, &["2025-02"], Some("bo3"));

    assert!(matches!(
        outcome(&report, "2025-02"),
        MonthOutcome::Succeeded { format, .. } if format == FORMAT
    ));
    assert_eq!(upstream.requests_to(&index_url), 1);
}

#[test]
fn test_latest_resolvable_walks_back() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-07", FORMAT, &DETAIL.to_string(), None);
    let pipeline = Pipeline::new(SnapshotFetcher::new(&upstream, fast_config()));

    assert_eq!(
        pipeline.latest_resolvable(month("2025-09"), 3, None).unwrap(),
        Some(month("2025-07"))
    );
    assert_eq!(pipeline.latest_resolvable(month("2025-09"), 1, None).unwrap(), None);
}

#[test]
fn test_outage_fails_months_at_resolve() {
    let outage = Outage::default();
    let pipeline = Pipeline::new(SnapshotFetcher::new(&outage, fast_config()));
    let mut db = TestDb::new();

    let report = pipeline.run(&mut db.writer, &[month("2025-09"), month("2025-10")], None);

    for m in ["2025-09", "2025-10"] {
        assert!(matches!(
            outcome(&report, m),
            MonthOutcome::Failed { stage: Stage::Resolve, .. }
        ));
    }
    assert_eq!((report.skipped(), report.failed()), (0, 2));
    assert_eq!(report.exit_code(), 1);
    // Per month: the index request and its single retry, no candidate probes
    assert_eq!(*outage.requests.borrow(), 4);
    assert!(db.dump().is_empty());
}

#[test]
fn test_outage_is_not_reported_as_unpublished() {
    let outage = Outage::default();
    let pipeline = Pipeline::new(SnapshotFetcher::new(&outage, fast_config()));

    let err = pipeline
        .latest_resolvable(month("2025-09"), 3, None)
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Fetch(FetchError::Transport { attempts: 2, .. })
    ));
    // The walk-back stops at the first month instead of trying older ones
    assert_eq!(*outage.requests.borrow(), 2);

    let mut report = RunReport::default();
    report.push(month("2025-09"), classify(Stage::Resolve, err));
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_download_stores_raw_files() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-01", FORMAT, &DETAIL.to_string(), Some(RANKING));
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::new(Some(cache_dir.path().to_path_buf())).unwrap();
    let pipeline = Pipeline::new(SnapshotFetcher::new(&upstream, fast_config()));

    let report = pipeline.download(&cache, &[month("2025-01"), month("2025-02")], None, false);

    assert_eq!((report.succeeded(), report.skipped()), (1, 1));
    let detail_file = format!("{}-{}.json", FORMAT, RATING);
    let ranking_file = format!("{}-{}.txt", FORMAT, RATING);
    assert!(cache.is_cached(month("2025-01"), &detail_file));
    assert!(cache.is_cached(month("2025-01"), &ranking_file));

    // Cached files ingest like the remote ones
    let mut db = TestDb::new();
    let month_dir = cache.month_dir(month("2025-01"));
    let report = convert_files(
        &mut db.writer,
        &month_dir.join(&detail_file),
        Some(&month_dir.join(&ranking_file)),
        month("2025-01"),
        FORMAT,
    );
    assert_eq!(report.exit_code(), 0);
    assert_eq!(db.names("2025-01").len(), 4);
}

#[test]
fn test_download_reuses_cache_unless_forced() {
    let mut upstream = MemoryUpstream::default();
    upstream.publish("2025-01", FORMAT, &DETAIL.to_string(), Some(RANKING));
    let detail_url = format!("{}/2025-01/chaos/{}-{}.json", BASE_URL, FORMAT, RATING);
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::new(Some(cache_dir.path().to_path_buf())).unwrap();
    let pipeline = Pipeline::new(SnapshotFetcher::new(&upstream, fast_config()));

    pipeline.download(&cache, &[month("2025-01")], None, false);
    assert_eq!(upstream.requests_to(&detail_url), 1);

    let report = pipeline.download(&cache, &[month("2025-01")], None, false);
    assert!(matches!(
        outcome(&report, "2025-01"),
        MonthOutcome::Downloaded { files, .. } if files.len() == 2
    ));
    assert_eq!(upstream.requests_to(&detail_url), 1);

    pipeline.download(&cache, &[month("2025-01")], None, true);
    assert_eq!(upstream.requests_to(&detail_url), 2);
}
