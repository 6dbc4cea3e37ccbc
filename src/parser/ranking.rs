//! Ranking ("usage") listing parser
//!
//! The listing is a plain-text table:
//!
//! ```text
//!  Total battles: 48213
//!  + ---- + ------------------ + --------- + ------ + ------- +
//!  | Rank | Pokemon            | Usage %   | Raw    | %       |
//!  + ---- + ------------------ + --------- + ------ + ------- +
//!  | 1    | Incineroar         | 48.12345% | 23201  | 48.120% |
//! ```

use tracing::warn;

use crate::error::{ParseError, RecordSkipped};

#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub rank: u32,
    pub name: String,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RankingListing {
    pub total_battles: Option<u64>,
    pub entries: Vec<RankingEntry>,
    pub skipped: Vec<RecordSkipped>,
}

pub fn parse_ranking(text: &str) -> Result<RankingListing, ParseError> {
    let mut listing = RankingListing::default();

    for line in text.lines() {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("Total battles:") {
            listing.total_battles = rest.trim().parse().ok();
            continue;
        }

        if !line.starts_with('|') {
            continue;
        }

        let cells: Vec<&str> = line
            .trim_matches('|')
            .split('|')
            .map(|c| c.trim())
            .collect();

        // Header rows have a non-numeric rank cell
        let Some(rank) = cells.first().and_then(|c| c.parse::<u32>().ok()) else {
            continue;
        };

        let name = cells.get(1).copied().unwrap_or_default();
        match parse_usage(cells.get(2).copied()) {
            Ok(usage_percent) if !name.is_empty() => listing.entries.push(RankingEntry {
                rank,
                name: name.to_string(),
                usage_percent,
            }),
            Ok(_) => {
                warn!(rank, "skipping ranking row without a name");
                listing
                    .skipped
                    .push(RecordSkipped::new(format!("rank {}", rank), "missing name"));
            }
            Err(reason) => {
                warn!(entity = %name, %reason, "skipping malformed ranking row");
                listing.skipped.push(RecordSkipped::new(name, reason));
            }
        }
    }

    if listing.entries.is_empty() && listing.skipped.is_empty() {
        return Err(ParseError::NoRankingRows);
    }

    Ok(listing)
}

fn parse_usage(cell: Option<&str>) -> Result<f64, String> {
    let cell = cell.ok_or("missing usage column")?;
    let value: f64 = cell
        .trim_end_matches('%')
        .trim()
        .parse()
        .map_err(|_| format!("non-numeric usage: {:?}", cell))?;

    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("usage {} outside [0, 100]", value))
    }
}
