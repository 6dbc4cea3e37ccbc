pub mod chaos;
pub mod name;
pub mod ranking;
pub mod record;

pub use chaos::{parse_chaos, ChaosInfo, ChaosListing, DetailEntry};
pub use name::canonical_name;
pub use ranking::{parse_ranking, RankingEntry, RankingListing};
pub use record::{Distribution, Distributions, EntityUsageRecord};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::warn;

use crate::download::RawSnapshot;
use crate::error::{ParseError, RecordSkipped};

/// Records ready for feature derivation, plus every entity that was dropped
#[derive(Debug, Clone, Default)]
pub struct ParsedSnapshot {
    pub records: Vec<EntityUsageRecord>,
    pub skipped: Vec<RecordSkipped>,
}

/// Parse the detailed listing and, when published, the ranking listing
pub fn parse_snapshot(
    detail: &RawSnapshot,
    ranking: Option<&RawSnapshot>,
) -> Result<ParsedSnapshot, ParseError> {
    let detail = parse_chaos(&detail.body)?;
    let ranking = ranking.map(|r| parse_ranking(&r.body)).transpose()?;
    Ok(merge(detail, ranking))
}

/// Same as [`parse_snapshot`] for files on disk
pub fn parse_files(detail: &Path, ranking: Option<&Path>) -> Result<ParsedSnapshot, ParseError> {
    let detail = parse_chaos(&std::fs::read_to_string(detail)?)?;
    let ranking = match ranking {
        Some(path) => Some(parse_ranking(&std::fs::read_to_string(path)?)?),
        None => None,
    };
    Ok(merge(detail, ranking))
}

/// Join both listings on the canonical name.
///
/// The ranking listing is authoritative for usage; the detailed listing for
/// distributions. Ranking-only entities keep empty distributions.
pub fn merge(detail: ChaosListing, ranking: Option<RankingListing>) -> ParsedSnapshot {
    let mut skipped = detail.skipped;
    let mut ranked: Vec<RankingEntry> = Vec::new();
    let mut usage_by_key: HashMap<String, f64> = HashMap::new();

    if let Some(ranking) = ranking {
        skipped.extend(ranking.skipped);
        for entry in ranking.entries {
            let key = canonical_name(&entry.name);
            let reason = if key.is_empty() {
                Some("name has no alphanumeric characters")
            } else if usage_by_key.contains_key(&key) {
                Some("duplicate name")
            } else {
                None
            };
            if let Some(reason) = reason {
                warn!(entity = %entry.name, %reason, "skipping ranking row");
                skipped.push(RecordSkipped::new(entry.name, reason));
                continue;
            }
            usage_by_key.insert(key, entry.usage_percent);
            ranked.push(entry);
        }
    }

    let mut records: Vec<(String, EntityUsageRecord)> = Vec::new();
    let mut detailed: HashSet<String> = HashSet::new();

    for entry in detail.entries {
        let key = canonical_name(&entry.name);
        let usage = usage_by_key.get(&key).copied().or(entry.usage_percent);

        let Some(usage_percent) = usage else {
            warn!(entity = %entry.name, "skipping entity without usage");
            skipped.push(RecordSkipped::new(entry.name, "no usage in either listing"));
            continue;
        };

        detailed.insert(key.clone());
        records.push((
            key,
            EntityUsageRecord {
                name: entry.name,
                usage_percent,
                raw_count: entry.raw_count,
                distributions: entry.distributions,
            },
        ));
    }

    for entry in ranked {
        let key = canonical_name(&entry.name);
        if !detailed.contains(&key) {
            records.push((key, EntityUsageRecord::usage_only(entry.name, entry.usage_percent)));
        }
    }

    records.sort_by(|(ka, a), (kb, b)| {
        b.usage_percent
            .total_cmp(&a.usage_percent)
            .then_with(|| ka.cmp(kb))
    });

    ParsedSnapshot {
        records: records.into_iter().map(|(_, r)| r).collect(),
        skipped,
    }
}
