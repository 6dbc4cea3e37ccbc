//! Detailed ("chaos") listing parser
//!
//! Entities live under `"data"` (or at the top level). Two value conventions
//! are accepted per entity:
//! - counts: the entity carries a `Raw count`; distributions are weighted
//!   counts and `usage` is a fraction in [0, 1]
//! - shares: no count field; every value is already a percentage

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

use crate::error::{ParseError, RecordSkipped};

use super::name::canonical_name;
use super::record::{Distribution, Distributions};

/// Metadata block of a detailed listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChaosInfo {
    pub metagame: Option<String>,
    pub cutoff: Option<f64>,
    #[serde(rename = "number of battles")]
    pub number_of_battles: Option<f64>,
}

/// One entity from the detailed listing, before the ranking join
#[derive(Debug, Clone, PartialEq)]
pub struct DetailEntry {
    pub name: String,
    pub usage_percent: Option<f64>,
    pub raw_count: Option<f64>,
    pub distributions: Distributions,
}

#[derive(Debug, Clone, Default)]
pub struct ChaosListing {
    pub info: ChaosInfo,
    pub entries: Vec<DetailEntry>,
    pub skipped: Vec<RecordSkipped>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Convention {
    Counts,
    Shares,
}

pub fn parse_chaos(text: &str) -> Result<ChaosListing, ParseError> {
    let json: Value = serde_json::from_str(text)?;
    let root = json.as_object().ok_or(ParseError::NotAnObject)?;

    let info = match root.get("info") {
        Some(v) => serde_json::from_value::<ChaosInfo>(v.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable info block");
            ChaosInfo::default()
        }),
        None => ChaosInfo::default(),
    };

    let (container, top_level): (&Map<String, Value>, bool) = match root.get("data") {
        Some(Value::Object(data)) => (data, false),
        Some(_) => return Err(ParseError::NotAnObject),
        None => (root, true),
    };

    let mut listing = ChaosListing {
        info,
        ..Default::default()
    };
    let mut seen: HashSet<String> = HashSet::new();

    for (name, value) in container {
        if top_level && name == "info" {
            continue;
        }

        let key = canonical_name(name);
        let outcome = if key.is_empty() {
            Err("name has no alphanumeric characters".to_string())
        } else if !seen.insert(key) {
            Err("duplicate name".to_string())
        } else {
            parse_entry(name, value, listing.info.number_of_battles)
        };

        match outcome {
            Ok(entry) => listing.entries.push(entry),
            Err(reason) => {
                warn!(entity = %name, %reason, "skipping malformed entity");
                listing.skipped.push(RecordSkipped::new(name.as_str(), reason));
            }
        }
    }

    Ok(listing)
}

fn parse_entry(name: &str, value: &Value, battles: Option<f64>) -> Result<DetailEntry, String> {
    let obj = value.as_object().ok_or("entry is not an object")?;

    // "Raw count", "raw_count" and "rawCount" all map to "rawcount"
    let fields: HashMap<String, &Value> = obj
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (field_key(k), v))
        .collect();

    let raw_count = fields
        .get("rawcount")
        .map(|v| number(v, "raw count"))
        .transpose()?;
    if let Some(count) = raw_count {
        if count < 0.0 {
            return Err(format!("negative raw count {}", count));
        }
    }

    let convention = if raw_count.is_some() {
        Convention::Counts
    } else {
        Convention::Shares
    };

    let usage_percent = match fields.get("usage") {
        Some(v) => {
            let usage = number(v, "usage")?;
            Some(match convention {
                Convention::Counts => usage * 100.0,
                Convention::Shares => usage,
            })
        }
        None => match (raw_count, battles) {
            (Some(count), Some(battles)) if battles > 0.0 => Some(count / (2.0 * battles) * 100.0),
            _ => None,
        },
    };
    if let Some(usage) = usage_percent {
        check_share(usage, "usage")?;
    }

    let abilities = read_map(fields.get("abilities"), "abilities")?;
    let items = read_map(fields.get("items"), "items")?;
    let tera = read_map(
        fields
            .get("teratypes")
            .or_else(|| fields.get("teratype"))
            .or_else(|| fields.get("tera")),
        "tera types",
    )?;
    let spreads = read_map(fields.get("spreads"), "spreads")?;
    let natures = read_map(fields.get("natures"), "natures")?;
    let moves = read_map(fields.get("moves"), "moves")?;

    let mut distributions = Distributions::default();

    match convention {
        Convention::Counts => {
            // Every set has exactly one ability, so its total is the set count
            let ability_total: f64 = abilities.iter().map(|(_, v)| v).sum();
            let set_count = if ability_total > 0.0 {
                ability_total
            } else {
                moves.iter().map(|(_, v)| v).sum::<f64>() / 4.0
            };

            distributions.abilities = normalize(abilities);
            distributions.items = normalize(items);
            distributions.tera_types = normalize(tera);
            distributions.spreads = normalize(spreads);
            distributions.natures = normalize(natures);
            distributions.moves = if set_count > 0.0 {
                Distribution::new(
                    moves
                        .into_iter()
                        .map(|(k, v)| (k, (v / set_count * 100.0).min(100.0))),
                )
            } else {
                Distribution::default()
            };
        }
        Convention::Shares => {
            for (label, map) in [
                ("abilities", &abilities),
                ("items", &items),
                ("tera types", &tera),
                ("spreads", &spreads),
                ("natures", &natures),
                ("moves", &moves),
            ] {
                for (key, share) in map {
                    check_share(*share, &format!("{} {:?}", label, key))?;
                }
            }

            distributions.abilities = Distribution::new(abilities);
            distributions.items = Distribution::new(items);
            distributions.tera_types = Distribution::new(tera);
            distributions.spreads = Distribution::new(spreads);
            distributions.natures = Distribution::new(natures);
            distributions.moves = Distribution::new(moves);
        }
    }

    if distributions.natures.is_empty() {
        distributions.natures = natures_from_spreads(&distributions.spreads);
    }

    Ok(DetailEntry {
        name: name.to_string(),
        usage_percent,
        raw_count,
        distributions,
    })
}

fn field_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Numbers, or strings holding a number with an optional trailing `%`
fn number(value: &Value, label: &str) -> Result<f64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(format!("non-numeric {}: {}", label, value)),
    }
}

fn check_share(value: f64, label: &str) -> Result<(), String> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} {} outside [0, 100]", label, value))
    }
}

fn read_map(value: Option<&&Value>, label: &str) -> Result<Vec<(String, f64)>, String> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let obj = value
        .as_object()
        .ok_or_else(|| format!("{} is not an object", label))?;

    obj.iter()
        .map(|(key, v)| {
            let n = number(v, &format!("{} {:?}", label, key))?;
            if n < 0.0 {
                return Err(format!("negative {} {:?}: {}", label, key, n));
            }
            Ok((key.clone(), n))
        })
        .collect()
}

/// Weighted counts to percent of their own total
fn normalize(counts: Vec<(String, f64)>) -> Distribution {
    let total: f64 = counts.iter().map(|(_, v)| v).sum();
    if total <= 0.0 {
        return Distribution::default();
    }
    Distribution::new(counts.into_iter().map(|(k, v)| (k, v / total * 100.0)))
}

/// Sum spread shares by their leading `Nature:` token
fn natures_from_spreads(spreads: &Distribution) -> Distribution {
    let mut natures: BTreeMap<&str, f64> = BTreeMap::new();
    for (spread, share) in spreads.entries() {
        if let Some((nature, _)) = spread.split_once(':') {
            *natures.entry(nature.trim()).or_insert(0.0) += share;
        }
    }
    Distribution::new(natures)
}
