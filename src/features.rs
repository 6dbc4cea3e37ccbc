//! Reduces per-entity distributions to the denormalized row the dashboard reads

use crate::month::SnapshotMonth;
use crate::parser::{Distribution, EntityUsageRecord};

pub const TOP_MOVES: usize = 4;

/// One persisted row, keyed by (name, snapshot_month, format)
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsRow {
    pub name: String,
    pub snapshot_month: String,
    pub format: String,
    pub usage: f64,
    pub raw_count: Option<f64>,
    pub top_ability: Option<String>,
    pub top_item: Option<String>,
    pub top_item_pct: f64,
    pub top_tera_type: Option<String>,
    pub top_tera_pct: f64,
    pub top_spread: Option<String>,
    pub top_spread_no_nature: Option<String>,
    pub top_nature: Option<String>,
    /// Always `TOP_MOVES` long; missing slots are `(None, 0.0)`
    pub moves: [(Option<String>, f64); TOP_MOVES],
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn bind_to(&self, idx: usize, stmt: &mut rusqlite::Statement) -> rusqlite::Result<()> {
        match self {
            SqlValue::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null)?,
            SqlValue::Real(f) => stmt.raw_bind_parameter(idx, f)?,
            SqlValue::Text(s) => stmt.raw_bind_parameter(idx, s.as_str())?,
        }
        Ok(())
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map(SqlValue::Text).unwrap_or(SqlValue::Null)
    }
}

impl From<Option<f64>> for SqlValue {
    fn from(value: Option<f64>) -> Self {
        value.map(SqlValue::Real).unwrap_or(SqlValue::Null)
    }
}

impl AnalyticsRow {
    /// Values in the column order of [`crate::schema::USAGE_TABLE`]
    pub fn values(&self) -> Vec<SqlValue> {
        let mut values = vec![
            SqlValue::Text(self.name.clone()),
            SqlValue::Text(self.snapshot_month.clone()),
            SqlValue::Text(self.format.clone()),
            SqlValue::Real(self.usage),
            self.raw_count.into(),
            self.top_ability.clone().into(),
            self.top_item.clone().into(),
            SqlValue::Real(self.top_item_pct),
            self.top_tera_type.clone().into(),
            SqlValue::Real(self.top_tera_pct),
            self.top_spread.clone().into(),
            self.top_spread_no_nature.clone().into(),
            self.top_nature.clone().into(),
        ];
        for (name, pct) in &self.moves {
            values.push(name.clone().into());
            values.push(SqlValue::Real(*pct));
        }
        values
    }
}

/// Highest-share entry; the distribution's order already breaks ties by key
pub fn top_entry(dist: &Distribution) -> Option<(&str, f64)> {
    dist.entries().first().map(|(k, v)| (k.as_str(), *v))
}

/// The `k` highest-share entries, same tie-break as [`top_entry`]
pub fn top_k(dist: &Distribution, k: usize) -> Vec<(&str, f64)> {
    dist.entries()
        .iter()
        .take(k)
        .map(|(key, v)| (key.as_str(), *v))
        .collect()
}

/// `Careful:252/4/0/0/252/0` → `252/4/0/0/252/0`; spreads without a nature pass through
pub fn strip_nature(spread: &str) -> &str {
    spread.split_once(':').map(|(_, evs)| evs).unwrap_or(spread)
}

fn split_top(dist: &Distribution) -> (Option<String>, f64) {
    match top_entry(dist) {
        Some((key, share)) => (Some(key.to_string()), share),
        None => (None, 0.0),
    }
}

pub fn derive_row(record: &EntityUsageRecord, month: SnapshotMonth, format: &str) -> AnalyticsRow {
    let d = &record.distributions;

    let (top_item, top_item_pct) = split_top(&d.items);
    let (top_tera_type, top_tera_pct) = split_top(&d.tera_types);
    let top_spread = top_entry(&d.spreads).map(|(s, _)| s.to_string());

    let mut moves: [(Option<String>, f64); TOP_MOVES] = Default::default();
    for (slot, (name, pct)) in moves.iter_mut().zip(top_k(&d.moves, TOP_MOVES)) {
        *slot = (Some(name.to_string()), pct);
    }

    AnalyticsRow {
        name: record.name.clone(),
        snapshot_month: month.to_string(),
        format: format.to_string(),
        usage: record.usage_percent,
        raw_count: record.raw_count,
        top_ability: top_entry(&d.abilities).map(|(a, _)| a.to_string()),
        top_item,
        top_item_pct,
        top_tera_type,
        top_tera_pct,
        top_spread_no_nature: top_spread.as_deref().map(|s| strip_nature(s).to_string()),
        top_spread,
        top_nature: top_entry(&d.natures).map(|(n, _)| n.to_string()),
        moves,
    }
}
