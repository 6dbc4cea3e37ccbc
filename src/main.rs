use anyhow::{Context, Result};
use smogon_usage_to_sqlite::{
    cli::{Cli, Commands, SourceArgs, DEFAULT_AUTO_START},
    convert_files,
    download::{CacheManager, HttpTransport, SnapshotFetcher},
    month::SnapshotMonth,
    pipeline::{classify, Stage},
    writer::SqliteWriter,
    Pipeline, RunReport,
};
use std::collections::HashSet;
use std::process::ExitCode;
use std::time::Instant;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn pipeline(source: &SourceArgs) -> Result<Pipeline<HttpTransport>> {
    let config = source.config();
    let transport = HttpTransport::from_config(&config)?;
    Ok(Pipeline::new(SnapshotFetcher::new(transport, config)))
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Sync {
            db,
            months,
            auto,
            start,
            end,
            force,
            lookback,
            source,
            read_copy,
            json,
        } => {
            let started = Instant::now();
            let pipeline = pipeline(&source)?;
            let mut writer = SqliteWriter::open(&db)
                .with_context(|| format!("Failed to open database {:?}", db))?;
            let hint = source.format.as_deref();

            let targets = if auto {
                let start = match start {
                    Some(start) => start,
                    None => DEFAULT_AUTO_START.parse()?,
                };
                let end = end.unwrap_or_else(SnapshotMonth::current_last_full);
                let mut targets = SnapshotMonth::range(start, end);
                if !force {
                    let present: HashSet<String> =
                        writer.existing_months(None)?.into_iter().collect();
                    targets.retain(|m| !present.contains(&m.to_string()));
                }
                targets
            } else if let Some(explicit) = months.months() {
                explicit
            } else {
                let from = SnapshotMonth::current_last_full();
                match pipeline.latest_resolvable(from, lookback, hint) {
                    Ok(Some(month)) => vec![month],
                    Ok(None) => {
                        println!(
                            "No snapshot published in the {} month(s) up to {}",
                            lookback + 1,
                            from
                        );
                        return Ok(ExitCode::SUCCESS);
                    }
                    Err(e) => {
                        // Unreachable upstream fails the run
                        let mut report = RunReport::default();
                        report.push(from, classify(Stage::Resolve, e));
                        print_report(&report, json)?;
                        return Ok(ExitCode::from(report.exit_code()));
                    }
                }
            };

            if targets.is_empty() {
                println!("Nothing to ingest, {:?} is up to date", db);
                return Ok(ExitCode::SUCCESS);
            }

            println!("Ingesting {} month(s) into {:?}...", targets.len(), db);
            let report = pipeline.run(&mut writer, &targets, hint);

            if let Some(copy) = read_copy {
                writer
                    .sync_read_copy(&copy)
                    .with_context(|| format!("Failed to refresh read-only copy {:?}", copy))?;
            }
            writer.finalize()?;

            print_report(&report, json)?;
            if !json {
                println!("Finished in {:.1}s", started.elapsed().as_secs_f64());
            }
            Ok(ExitCode::from(report.exit_code()))
        }

        Commands::Download {
            months,
            source,
            output,
            force,
        } => {
            let pipeline = pipeline(&source)?;
            let cache = CacheManager::new(output)?;
            let hint = source.format.as_deref();

            let targets = match months.months() {
                Some(explicit) => explicit,
                None => vec![SnapshotMonth::current_last_full()],
            };

            println!("Downloading into {:?}...", cache.cache_dir());
            let report = pipeline.download(&cache, &targets, hint, force);
            print_report(&report, false)?;
            Ok(ExitCode::from(report.exit_code()))
        }

        Commands::Convert {
            detail,
            db,
            month,
            format,
            ranking,
        } => {
            let started = Instant::now();
            let mut writer = SqliteWriter::open(&db)
                .with_context(|| format!("Failed to open database {:?}", db))?;

            println!("Converting {:?}...", detail);
            let report = convert_files(&mut writer, &detail, ranking.as_deref(), month, &format);
            writer.finalize()?;

            print_report(&report, false)?;
            println!("Finished in {:.1}s", started.elapsed().as_secs_f64());
            Ok(ExitCode::from(report.exit_code()))
        }

        Commands::ListMonths { db } => {
            let writer = SqliteWriter::open(&db)
                .with_context(|| format!("Failed to open database {:?}", db))?;
            let summaries = writer.month_summaries()?;

            if summaries.is_empty() {
                println!("{:?} contains no snapshots", db);
            } else {
                println!("Snapshots in {:?}:\n", db);
                for summary in summaries {
                    println!(
                        "  {}  {:<28} {:>5} rows",
                        summary.snapshot_month, summary.format, summary.rows
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
