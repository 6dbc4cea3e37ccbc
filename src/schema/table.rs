//! The analytics table read by the dashboard

use super::types::*;

pub const USAGE_TABLE_NAME: &str = "smogon_usage";

/// Column order here is the bind order of `AnalyticsRow::values`
pub static USAGE_TABLE: TableSchema = TableSchema {
    name: USAGE_TABLE_NAME,
    columns: &[
        Column::key("name", ColumnType::Text),
        Column::key("snapshot_month", ColumnType::Text),
        Column::key("format", ColumnType::Text),
        Column::required("usage", ColumnType::Real),
        Column::new("raw_count", ColumnType::Real),
        Column::new("top_ability", ColumnType::Text),
        Column::new("top_item", ColumnType::Text),
        Column::required("top_item_pct", ColumnType::Real),
        Column::new("top_tera_type", ColumnType::Text),
        Column::required("top_tera_pct", ColumnType::Real),
        Column::new("top_spread", ColumnType::Text),
        Column::new("top_spread_no_nature", ColumnType::Text),
        Column::new("top_nature", ColumnType::Text),
        Column::new("move1", ColumnType::Text),
        Column::required("move1_pct", ColumnType::Real),
        Column::new("move2", ColumnType::Text),
        Column::required("move2_pct", ColumnType::Real),
        Column::new("move3", ColumnType::Text),
        Column::required("move3_pct", ColumnType::Real),
        Column::new("move4", ColumnType::Text),
        Column::required("move4_pct", ColumnType::Real),
    ],
    indexes: &[
        Index::on(&["snapshot_month", "format"]),
        Index::on(&["snapshot_month", "usage"]),
    ],
};
