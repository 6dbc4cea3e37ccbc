//! Sequences locate → fetch → parse → derive → write for each month.
//!
//! Every month is independent: its errors become a [`MonthOutcome`] in the
//! [`RunReport`] and never stop the next month.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::download::{CacheManager, SnapshotFetcher, SourceLocator, Transport};
use crate::error::{FetchError, PipelineError, WriteError};
use crate::features::{derive_row, AnalyticsRow};
use crate::month::SnapshotMonth;
use crate::parser::{parse_files, parse_snapshot, ParsedSnapshot};
use crate::writer::SqliteWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Fetch,
    Parse,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Resolve => write!(f, "resolve"),
            Stage::Fetch => write!(f, "fetch"),
            Stage::Parse => write!(f, "parse"),
            Stage::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MonthOutcome {
    Succeeded {
        format: String,
        rows: usize,
        /// Rows of a previous ingestion that were replaced
        replaced: usize,
        skipped_records: usize,
    },
    Downloaded {
        format: String,
        files: Vec<String>,
    },
    /// Not published yet, or nothing to ingest
    Skipped { reason: String },
    Failed { stage: Stage, cause: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthReport {
    pub month: SnapshotMonth,
    #[serde(flatten)]
    pub outcome: MonthOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub months: Vec<MonthReport>,
}

impl RunReport {
    pub fn push(&mut self, month: SnapshotMonth, outcome: MonthOutcome) {
        self.months.push(MonthReport { month, outcome });
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                MonthOutcome::Succeeded { .. } | MonthOutcome::Downloaded { .. }
            )
        })
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, MonthOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, MonthOutcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// 0 unless a month hard-failed; skips alone are not failures
    pub fn exit_code(&self) -> u8 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    fn count(&self, pred: impl Fn(&MonthOutcome) -> bool) -> usize {
        self.months.iter().filter(|m| pred(&m.outcome)).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.months {
            match &report.outcome {
                MonthOutcome::Succeeded {
                    format,
                    rows,
                    replaced,
                    skipped_records,
                } => writeln!(
                    f,
                    "  {}  ok       {}  rows={} replaced={} skipped_records={}",
                    report.month, format, rows, replaced, skipped_records
                )?,
                MonthOutcome::Downloaded { format, files } => writeln!(
                    f,
                    "  {}  ok       {}  files={}",
                    report.month,
                    format,
                    files.join(", ")
                )?,
                MonthOutcome::Skipped { reason } => {
                    writeln!(f, "  {}  skipped  {}", report.month, reason)?
                }
                MonthOutcome::Failed { stage, cause } => {
                    writeln!(f, "  {}  FAILED   [{}] {}", report.month, stage, cause)?
                }
            }
        }
        write!(
            f,
            "Done. ok={} skipped={} failed={}",
            self.succeeded(),
            self.skipped(),
            self.failed()
        )
    }
}

type StageResult<T> = Result<T, (Stage, PipelineError)>;

fn at<T, E: Into<PipelineError>>(stage: Stage, result: Result<T, E>) -> StageResult<T> {
    result.map_err(|e| (stage, e.into()))
}

/// Unpublished data is a skip; everything else is a failure
pub fn classify(stage: Stage, err: PipelineError) -> MonthOutcome {
    match err {
        PipelineError::SourceNotFound { .. } | PipelineError::Fetch(FetchError::NotFound(_)) => {
            MonthOutcome::Skipped {
                reason: err.to_string(),
            }
        }
        other => MonthOutcome::Failed {
            stage,
            cause: other.to_string(),
        },
    }
}

fn log_outcome(month: SnapshotMonth, outcome: &MonthOutcome) {
    match outcome {
        MonthOutcome::Succeeded {
            format,
            rows,
            skipped_records,
            ..
        } => info!(%month, format = %format, rows, skipped_records, "month ingested"),
        MonthOutcome::Downloaded { format, files } => {
            info!(%month, format = %format, files = files.len(), "month downloaded")
        }
        MonthOutcome::Skipped { reason } => warn!(%month, %reason, "month skipped"),
        MonthOutcome::Failed { stage, cause } => error!(%month, %stage, %cause, "month failed"),
    }
}

/// Derive rows and replace the (month, format) slice of the table
fn store(
    writer: &mut SqliteWriter,
    parsed: &ParsedSnapshot,
    month: SnapshotMonth,
    format: &str,
) -> Result<MonthOutcome, WriteError> {
    if parsed.records.is_empty() {
        return Ok(MonthOutcome::Skipped {
            reason: format!("snapshot {} contains no usable entities", format),
        });
    }

    let rows: Vec<AnalyticsRow> = parsed
        .records
        .iter()
        .map(|record| derive_row(record, month, format))
        .collect();

    let report = writer.upsert(&rows, month, format)?;

    Ok(MonthOutcome::Succeeded {
        format: format.to_string(),
        rows: report.inserted,
        replaced: report.deleted,
        skipped_records: parsed.skipped.len(),
    })
}

pub struct Pipeline<T> {
    fetcher: SnapshotFetcher<T>,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(fetcher: SnapshotFetcher<T>) -> Self {
        Self { fetcher }
    }

    /// Ingest each month (deduplicated, ascending) into `writer`
    pub fn run(
        &self,
        writer: &mut SqliteWriter,
        months: &[SnapshotMonth],
        format_hint: Option<&str>,
    ) -> RunReport {
        let locator = SourceLocator::new(&self.fetcher);
        let mut report = RunReport::default();

        for month in sorted(months) {
            let outcome = match self.ingest_month(&locator, writer, month, format_hint) {
                Ok(outcome) => outcome,
                Err((stage, err)) => classify(stage, err),
            };
            log_outcome(month, &outcome);
            report.push(month, outcome);
        }

        report
    }

    fn ingest_month(
        &self,
        locator: &SourceLocator<'_, T>,
        writer: &mut SqliteWriter,
        month: SnapshotMonth,
        format_hint: Option<&str>,
    ) -> StageResult<MonthOutcome> {
        let source = locator
            .resolve(month, format_hint)
            .map_err(|e| (Stage::Resolve, e))?;

        let detail = at(Stage::Fetch, self.fetcher.fetch_detail(&source))?;
        let ranking = at(Stage::Fetch, self.fetcher.fetch_ranking(&source))?;
        let parsed = at(Stage::Parse, parse_snapshot(&detail, ranking.as_ref()))?;

        at(Stage::Write, store(writer, &parsed, month, &source.format))
    }

    /// Download raw snapshots into the cache without touching a database.
    ///
    /// Months whose detailed listing is already cached are not fetched again
    /// unless `force` is set.
    pub fn download(
        &self,
        cache: &CacheManager,
        months: &[SnapshotMonth],
        format_hint: Option<&str>,
        force: bool,
    ) -> RunReport {
        let locator = SourceLocator::new(&self.fetcher);
        let mut report = RunReport::default();

        for month in sorted(months) {
            let outcome = match self.download_month(&locator, cache, month, format_hint, force)
            {
                Ok(outcome) => outcome,
                Err((stage, err)) => classify(stage, err),
            };
            log_outcome(month, &outcome);
            report.push(month, outcome);
        }

        report
    }

    fn download_month(
        &self,
        locator: &SourceLocator<'_, T>,
        cache: &CacheManager,
        month: SnapshotMonth,
        format_hint: Option<&str>,
        force: bool,
    ) -> StageResult<MonthOutcome> {
        let source = locator
            .resolve(month, format_hint)
            .map_err(|e| (Stage::Resolve, e))?;

        if !force && cache.is_cached(month, &source.detail_file()) {
            debug!(%month, format = %source.format, "already cached");
            let files = [source.detail_file(), source.ranking_file()]
                .into_iter()
                .filter(|file| cache.is_cached(month, file))
                .map(|file| cache.month_dir(month).join(file).display().to_string())
                .collect();
            return Ok(MonthOutcome::Downloaded {
                format: source.format,
                files,
            });
        }

        let mut snapshots = vec![(
            at(Stage::Fetch, self.fetcher.fetch_detail(&source))?,
            source.detail_file(),
        )];
        if let Some(ranking) = at(Stage::Fetch, self.fetcher.fetch_ranking(&source))? {
            snapshots.push((ranking, source.ranking_file()));
        }

        let mut files = Vec::new();
        for (snapshot, file_name) in &snapshots {
            match cache.store(snapshot, file_name) {
                Ok(path) => files.push(path.display().to_string()),
                Err(e) => {
                    return Ok(MonthOutcome::Failed {
                        stage: Stage::Write,
                        cause: format!("{:#}", e),
                    })
                }
            }
        }

        Ok(MonthOutcome::Downloaded {
            format: source.format,
            files,
        })
    }

    /// Walk back from `from` at most `lookback` months to the newest month
    /// with a published snapshot.
    ///
    /// `Ok(None)` only when every month was definitively unpublished; the
    /// first other error ends the walk.
    pub fn latest_resolvable(
        &self,
        from: SnapshotMonth,
        lookback: u32,
        format_hint: Option<&str>,
    ) -> Result<Option<SnapshotMonth>, PipelineError> {
        let locator = SourceLocator::new(&self.fetcher);
        let mut month = from;

        for _ in 0..=lookback {
            match locator.resolve(month, format_hint) {
                Ok(_) => return Ok(Some(month)),
                Err(PipelineError::SourceNotFound { .. }) => {
                    debug!(%month, "not published, trying previous month")
                }
                Err(e) => {
                    error!(%month, error = %e, "could not check month");
                    return Err(e);
                }
            }
            month = month.prev();
        }

        Ok(None)
    }
}

/// Ingest local snapshot files for an explicit month and format
pub fn convert_files(
    writer: &mut SqliteWriter,
    detail: &Path,
    ranking: Option<&Path>,
    month: SnapshotMonth,
    format: &str,
) -> RunReport {
    let outcome = at(Stage::Parse, parse_files(detail, ranking))
        .and_then(|parsed| at(Stage::Write, store(writer, &parsed, month, format)))
        .unwrap_or_else(|(stage, err)| classify(stage, err));

    log_outcome(month, &outcome);
    let mut report = RunReport::default();
    report.push(month, outcome);
    report
}

fn sorted(months: &[SnapshotMonth]) -> Vec<SnapshotMonth> {
    let mut months = months.to_vec();
    months.sort();
    months.dedup();
    months
}
