//! Entity catalogue: one descriptor per synced GraphQL entity.
//!
//! Each descriptor carries the GraphQL selection, the table DDL, the INSERT
//! column list, the sync mode, and the JSON-to-SQL values conversion. The
//! catalogue is immutable and referenced by `&'static` borrow everywhere.

use serde_json::Value;

/// How an entity's cursor paginates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// `orderBy: id`, `where: {id_gt}`; no skip.
    ById,
    /// `orderBy: timestamp`, `where: {timestamp_gte}`, plus skip.
    ByTimestamp,
    /// `orderBy: resolutionTimestamp`, `where: {resolutionTimestamp_gte}`, plus skip.
    ByResolutionTimestamp,
}

/// Tag selecting the JSON-to-SQL conversion for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Condition,
    OrderFilled,
    Split,
    Merge,
    Redemption,
    PnlCondition,
}

pub struct EntityDescriptor {
    pub kind: EntityKind,
    /// GraphQL singular name.
    pub name: &'static str,
    /// GraphQL plural (query root field).
    pub plural: &'static str,
    pub table: &'static str,
    /// GraphQL field selection.
    pub fields: &'static str,
    pub ddl: &'static str,
    /// INSERT column list.
    pub columns: &'static str,
    pub sync_mode: SyncMode,
    pub order_field: &'static str,
    pub where_field: &'static str,
}

impl EntityDescriptor {
    /// Convert one GraphQL item into a comma-separated SQL values tuple.
    pub fn to_values_sql(&self, item: &Value) -> String {
        match self.kind {
            EntityKind::Condition => [
                json_str(item, "id"),
                json_str(item, "questionId"),
                json_str(item, "oracle"),
                json_int(item, "outcomeSlotCount"),
                json_int(item, "resolutionTimestamp"),
                json_array(item, "payoutNumerators"),
                json_int(item, "payoutDenominator"),
            ]
            .join(","),
            EntityKind::OrderFilled => [
                json_str(item, "id"),
                json_int(item, "timestamp"),
                json_ref(item, "maker"),
                json_ref(item, "taker"),
                json_ref(item, "market"),
                json_str(item, "side"),
                json_int(item, "size"),
                json_decimal(item, "price"),
            ]
            .join(","),
            // Split and Merge carry identical fields.
            EntityKind::Split | EntityKind::Merge => [
                json_str(item, "id"),
                json_int(item, "timestamp"),
                json_str(item, "stakeholder"),
                json_str(item, "condition"),
                json_int(item, "amount"),
            ]
            .join(","),
            EntityKind::Redemption => [
                json_str(item, "id"),
                json_int(item, "timestamp"),
                json_str(item, "redeemer"),
                json_str(item, "condition"),
                json_array(item, "indexSets"),
                json_int(item, "payout"),
            ]
            .join(","),
            EntityKind::PnlCondition => {
                [json_str(item, "id"), json_array(item, "positionIds")].join(",")
            }
        }
    }

    /// Stable per-row size estimate in bytes, derived from the DDL column
    /// list. Used for UI-facing database-size figures; never zero.
    pub fn row_size_estimate(&self) -> i64 {
        let lp = match self.ddl.find('(') {
            Some(p) => p,
            None => return 16,
        };
        let rp = match self.ddl[lp + 1..].find(')') {
            Some(p) => lp + 1 + p,
            None => return 16,
        };

        let mut total: i64 = 8;
        for line in self.ddl[lp + 1..rp].lines() {
            let line = line.trim().trim_end_matches(',');
            if line.is_empty() {
                continue;
            }
            let upper = line.to_uppercase();
            if upper.starts_with("PRIMARY KEY")
                || upper.starts_with("UNIQUE")
                || upper.starts_with("CONSTRAINT")
            {
                continue;
            }
            let mut parts = line.split_whitespace();
            let col = match parts.next() {
                Some(c) => c.to_uppercase(),
                None => continue,
            };
            let ty = match parts.next() {
                Some(t) => {
                    let t = t.to_uppercase();
                    match t.find('(') {
                        Some(p) => t[..p].to_string(),
                        None => t,
                    }
                }
                None => continue,
            };
            total += column_size(&ty, &col);
        }
        total.max(16)
    }
}

fn column_size(type_upper: &str, col_upper: &str) -> i64 {
    match type_upper {
        "INT" | "INTEGER" => 4,
        "BIGINT" | "DOUBLE" | "FLOAT" | "TIMESTAMP" => 8,
        "BOOLEAN" | "BOOL" => 1,
        "VARCHAR" | "TEXT" | "STRING" => varchar_guess(col_upper),
        _ => 16,
    }
}

fn varchar_guess(col_upper: &str) -> i64 {
    if col_upper == "ID" || col_upper.ends_with("_ID") || col_upper.contains("HASH") {
        66
    } else if col_upper.contains("ADDR") {
        42
    } else {
        32
    }
}

// ============================================================================
// SQL literal helpers
// ============================================================================

pub fn escape_sql_raw(s: &str) -> String {
    s.replace('\'', "''")
}

pub fn escape_sql(s: &str) -> String {
    format!("'{}'", escape_sql_raw(s))
}

/// String field, NULL-preserving. Non-string JSON is stored serialised.
pub fn json_str(item: &Value, key: &str) -> String {
    match item.get(key) {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::String(s)) => escape_sql(s),
        Some(other) => escape_sql(&other.to_string()),
    }
}

/// Integer field accepting a JSON number or a numeric string (emitted bare).
pub fn json_int(item: &Value, key: &str) -> String {
    match item.get(key) {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) => v.to_string(),
            None => n
                .as_f64()
                .map(|f| (f as i64).to_string())
                .unwrap_or_else(|| "NULL".to_string()),
        },
        Some(Value::String(s)) => s.clone(),
        Some(_) => "NULL".to_string(),
    }
}

/// Decimal field accepting a JSON number or a numeric string (emitted bare).
pub fn json_decimal(item: &Value, key: &str) -> String {
    match item.get(key) {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "NULL".to_string()),
        Some(Value::String(s)) => s.clone(),
        Some(_) => "NULL".to_string(),
    }
}

/// Relation field: `{id: ...}` object or a bare id string.
pub fn json_ref(item: &Value, key: &str) -> String {
    match item.get(key) {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::Object(obj)) => match obj.get("id").and_then(Value::as_str) {
            Some(id) => escape_sql(id),
            None => "NULL".to_string(),
        },
        Some(Value::String(s)) => escape_sql(s),
        Some(_) => "NULL".to_string(),
    }
}

/// JSON array field, stored as its serialised text.
pub fn json_array(item: &Value, key: &str) -> String {
    match item.get(key) {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(v) => escape_sql(&v.to_string()),
    }
}

// ============================================================================
// Infrastructure tables
// ============================================================================

pub const SYNC_STATE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS sync_state (
    source VARCHAR NOT NULL,
    entity VARCHAR NOT NULL,
    cursor_value VARCHAR,
    cursor_skip INT DEFAULT 0,
    last_sync_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (source, entity)
)";

pub const ENTITY_STATS_META_DDL: &str = "\
CREATE TABLE IF NOT EXISTS entity_stats_meta (
    source VARCHAR NOT NULL,
    entity VARCHAR NOT NULL,
    total_requests BIGINT DEFAULT 0,
    success_requests BIGINT DEFAULT 0,
    fail_network BIGINT DEFAULT 0,
    fail_json BIGINT DEFAULT 0,
    fail_graphql BIGINT DEFAULT 0,
    fail_format BIGINT DEFAULT 0,
    total_rows_synced BIGINT DEFAULT 0,
    total_api_time_ms BIGINT DEFAULT 0,
    success_rate DOUBLE DEFAULT 100.0,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (source, entity)
)";

pub const INDEXER_FAIL_META_DDL: &str = "\
CREATE TABLE IF NOT EXISTS indexer_fail_meta (
    source VARCHAR NOT NULL,
    entity VARCHAR NOT NULL,
    indexer VARCHAR NOT NULL,
    fail_requests BIGINT DEFAULT 0,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (source, entity, indexer)
)";

// ============================================================================
// Catalogue
// ============================================================================

// positionIds is not pulled from the main subgraph; it is filled from the
// PnL mapping table afterwards, hence the extra column outside `columns`.
pub static CONDITION: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Condition,
    name: "Condition",
    plural: "conditions",
    table: "condition",
    fields: "id questionId oracle outcomeSlotCount resolutionTimestamp payoutNumerators payoutDenominator",
    ddl: "CREATE TABLE IF NOT EXISTS condition (
        id VARCHAR PRIMARY KEY,
        questionId VARCHAR NOT NULL,
        oracle VARCHAR NOT NULL,
        outcomeSlotCount INT NOT NULL,
        resolutionTimestamp BIGINT,
        payoutNumerators VARCHAR,
        payoutDenominator BIGINT,
        positionIds VARCHAR
    )",
    columns: "id, questionId, oracle, outcomeSlotCount, resolutionTimestamp, payoutNumerators, payoutDenominator",
    sync_mode: SyncMode::ByResolutionTimestamp,
    order_field: "resolutionTimestamp",
    where_field: "resolutionTimestamp_gte",
};

pub static ENRICHED_ORDER_FILLED: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::OrderFilled,
    name: "EnrichedOrderFilled",
    plural: "enrichedOrderFilleds",
    table: "enriched_order_filled",
    fields: "id timestamp maker { id } taker { id } market { id } side size price",
    ddl: "CREATE TABLE IF NOT EXISTS enriched_order_filled (
        id VARCHAR PRIMARY KEY,
        timestamp BIGINT NOT NULL,
        maker VARCHAR NOT NULL,
        taker VARCHAR NOT NULL,
        market VARCHAR NOT NULL,
        side VARCHAR NOT NULL,
        size VARCHAR NOT NULL,
        price DOUBLE NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_eof_ts ON enriched_order_filled(timestamp)",
    columns: "id, timestamp, maker, taker, market, side, size, price",
    sync_mode: SyncMode::ByTimestamp,
    order_field: "timestamp",
    where_field: "timestamp_gte",
};

pub static SPLIT: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Split,
    name: "Split",
    plural: "splits",
    table: "split",
    fields: "id timestamp stakeholder condition amount",
    ddl: "CREATE TABLE IF NOT EXISTS split (
        id VARCHAR PRIMARY KEY,
        timestamp BIGINT NOT NULL,
        stakeholder VARCHAR NOT NULL,
        condition VARCHAR NOT NULL,
        amount VARCHAR NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_split_ts ON split(timestamp)",
    columns: "id, timestamp, stakeholder, condition, amount",
    sync_mode: SyncMode::ByTimestamp,
    order_field: "timestamp",
    where_field: "timestamp_gte",
};

pub static MERGE: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Merge,
    name: "Merge",
    plural: "merges",
    table: "merge",
    fields: "id timestamp stakeholder condition amount",
    ddl: "CREATE TABLE IF NOT EXISTS merge (
        id VARCHAR PRIMARY KEY,
        timestamp BIGINT NOT NULL,
        stakeholder VARCHAR NOT NULL,
        condition VARCHAR NOT NULL,
        amount VARCHAR NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_merge_ts ON merge(timestamp)",
    columns: "id, timestamp, stakeholder, condition, amount",
    sync_mode: SyncMode::ByTimestamp,
    order_field: "timestamp",
    where_field: "timestamp_gte",
};

pub static REDEMPTION: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Redemption,
    name: "Redemption",
    plural: "redemptions",
    table: "redemption",
    fields: "id timestamp redeemer condition indexSets payout",
    ddl: "CREATE TABLE IF NOT EXISTS redemption (
        id VARCHAR PRIMARY KEY,
        timestamp BIGINT NOT NULL,
        redeemer VARCHAR NOT NULL,
        condition VARCHAR NOT NULL,
        indexSets VARCHAR NOT NULL,
        payout VARCHAR NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_redemption_ts ON redemption(timestamp)",
    columns: "id, timestamp, redeemer, condition, indexSets, payout",
    sync_mode: SyncMode::ByTimestamp,
    order_field: "timestamp",
    where_field: "timestamp_gte",
};

/// The PnL subgraph's token-id mapping, keyed by condition id.
pub static PNL_CONDITION: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::PnlCondition,
    name: "Condition",
    plural: "conditions",
    table: "pnl_condition",
    fields: "id positionIds",
    ddl: "CREATE TABLE IF NOT EXISTS pnl_condition (
        id VARCHAR PRIMARY KEY,
        positionIds VARCHAR
    )",
    columns: "id, positionIds",
    sync_mode: SyncMode::ById,
    order_field: "id",
    where_field: "id_gt",
};

pub static CATALOGUE: &[&EntityDescriptor] = &[
    &CONDITION,
    &ENRICHED_ORDER_FILLED,
    &SPLIT,
    &MERGE,
    &REDEMPTION,
    &PNL_CONDITION,
];

pub fn find_by_name(name: &str) -> Option<&'static EntityDescriptor> {
    CATALOGUE.iter().copied().find(|e| e.name == name)
}

pub fn find_by_table(table: &str) -> Option<&'static EntityDescriptor> {
    CATALOGUE.iter().copied().find(|e| e.table == table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escape_doubles_single_quotes() {
        assert_eq!(escape_sql("it's"), "'it''s'");
        assert_eq!(escape_sql_raw("a''b"), "a''''b");
    }

    #[test]
    fn condition_to_values() {
        let item = json!({
            "id": "0xc1",
            "questionId": "0xq1",
            "oracle": "0xoracle",
            "outcomeSlotCount": 2,
            "resolutionTimestamp": "1700000000",
            "payoutNumerators": ["1", "0"],
            "payoutDenominator": "1"
        });
        assert_eq!(
            CONDITION.to_values_sql(&item),
            r#"'0xc1','0xq1','0xoracle',2,1700000000,'["1","0"]',1"#
        );
    }

    #[test]
    fn order_filled_to_values_unwraps_relations() {
        let item = json!({
            "id": "0xf1",
            "timestamp": 1700000001i64,
            "maker": {"id": "0xmaker"},
            "taker": {"id": "0xtaker"},
            "market": {"id": "0xtoken"},
            "side": "Buy",
            "size": "1000000",
            "price": 0.42
        });
        assert_eq!(
            ENRICHED_ORDER_FILLED.to_values_sql(&item),
            "'0xf1',1700000001,'0xmaker','0xtaker','0xtoken','Buy',1000000,0.42"
        );
    }

    #[test]
    fn missing_fields_become_null() {
        let item = json!({"id": "0xc2", "questionId": "q", "oracle": "o", "outcomeSlotCount": 2});
        assert_eq!(
            CONDITION.to_values_sql(&item),
            "'0xc2','q','o',2,NULL,NULL,NULL"
        );
    }

    #[test]
    fn ref_accepts_bare_strings() {
        let item = json!({"maker": "0xdirect"});
        assert_eq!(json_ref(&item, "maker"), "'0xdirect'");
    }

    #[test]
    fn row_size_estimate_is_stable_and_nonzero() {
        for entity in CATALOGUE {
            let size = entity.row_size_estimate();
            assert!(size >= 16, "{} estimate too small", entity.table);
            assert_eq!(size, entity.row_size_estimate());
        }
        // condition: 8 base + id 66 + 32 + 32 + INT 4 + BIGINT 8
        //            + VARCHAR 32 + BIGINT 8 + VARCHAR 32
        assert_eq!(CONDITION.row_size_estimate(), 222);
    }

    #[test]
    fn lookups_resolve_tables_and_names() {
        assert_eq!(find_by_table("split").unwrap().name, "Split");
        assert_eq!(find_by_table("pnl_condition").unwrap().plural, "conditions");
        assert!(find_by_table("nope").is_none());
        // Both condition entities share the GraphQL name; by-name returns the first.
        assert_eq!(find_by_name("Condition").unwrap().table, "condition");
    }
}
