use crate::entities::{self, escape_sql, EntityDescriptor};
use duckdb::arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, LargeStringArray, StringArray,
};
use duckdb::arrow::datatypes::DataType;
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::{params, Connection};
use serde_json::{Map, Number, Value};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] duckdb::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persisted pagination cursor for one (source, entity).
///
/// For id-mode entities `value` is the last seen id and `skip` is unused;
/// for timestamp modes `value` is the largest seen timestamp and `skip`
/// counts rows already consumed at that exact timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCursor {
    pub value: String,
    pub skip: i64,
}

/// Store with one writer connection and one reader connection, each behind
/// its own mutex so writes and reads proceed concurrently.
pub struct Store {
    write: Mutex<Connection>,
    read: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> StoreResult<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let write = Connection::open(path)?;
        let read = write.try_clone()?;
        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let write = Connection::open_in_memory()?;
        let read = write.try_clone()?;
        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
        })
    }

    /// Create the sync/stats infrastructure tables.
    pub fn init_infra(&self) -> StoreResult<()> {
        self.execute(entities::SYNC_STATE_DDL)?;
        self.execute(entities::ENTITY_STATS_META_DDL)?;
        self.execute(entities::INDEXER_FAIL_META_DDL)?;
        Ok(())
    }

    pub fn init_entity(&self, entity: &EntityDescriptor) -> StoreResult<()> {
        self.execute(entity.ddl)
    }

    pub fn execute(&self, sql: &str) -> StoreResult<()> {
        let conn = self.write.lock().unwrap();
        conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn get_cursor(&self, source: &str, entity: &str) -> StoreResult<SyncCursor> {
        let conn = self.read.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT cursor_value, cursor_skip FROM sync_state WHERE source = ? AND entity = ?")?;
        let mut rows = stmt.query(params![source, entity])?;
        match rows.next()? {
            Some(row) => Ok(SyncCursor {
                value: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                skip: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
            }),
            None => Ok(SyncCursor::default()),
        }
    }

    /// Insert rows and persist the cursor in one transaction: both become
    /// visible together or not at all.
    pub fn atomic_insert_with_cursor(
        &self,
        table: &str,
        columns: &str,
        values_rows: &[String],
        source: &str,
        entity: &str,
        cursor: &SyncCursor,
    ) -> StoreResult<()> {
        assert!(!values_rows.is_empty(), "empty insert batch");

        let mut insert = format!("INSERT INTO {} ({}) VALUES ", table, columns);
        for (i, values) in values_rows.iter().enumerate() {
            if i > 0 {
                insert.push_str(", ");
            }
            insert.push('(');
            insert.push_str(values);
            insert.push(')');
        }
        insert.push_str(&on_conflict_clause(columns));

        let cursor_sql = format!(
            "INSERT OR REPLACE INTO sync_state (source, entity, cursor_value, cursor_skip, last_sync_at) \
             VALUES ({}, {}, {}, {}, CURRENT_TIMESTAMP)",
            escape_sql(source),
            escape_sql(entity),
            escape_sql(&cursor.value),
            cursor.skip,
        );

        let mut conn = self.write.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute_batch(&insert)?;
        tx.execute_batch(&cursor_sql)?;
        tx.commit()?;
        Ok(())
    }

    /// Read path: rows as JSON objects with native typing for booleans,
    /// integers and doubles; everything else stringified.
    pub fn query_rows(&self, sql: &str) -> StoreResult<Vec<Map<String, Value>>> {
        let conn = self.read.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();

        let mut rows = Vec::new();
        for batch in &batches {
            let names: Vec<String> = batch
                .schema()
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect();
            for row in 0..batch.num_rows() {
                let mut obj = Map::new();
                for (col, name) in names.iter().enumerate() {
                    obj.insert(name.clone(), cell_to_json(batch.column(col), row));
                }
                rows.push(obj);
            }
        }
        Ok(rows)
    }

    /// First column of the first row as i64; 0 on error, no rows, or NULL.
    pub fn query_single_int(&self, sql: &str) -> i64 {
        let conn = self.read.lock().unwrap();
        conn.query_row(sql, [], |row| row.get::<_, Option<i64>>(0))
            .map(|v| v.unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn get_table_count(&self, table: &str) -> i64 {
        self.query_single_int(&format!("SELECT COUNT(*) FROM {}", table))
    }

    /// Independent connection for bulk column-chunk scans.
    pub fn reader(&self) -> StoreResult<StoreReader> {
        let conn = self.read.lock().unwrap().try_clone()?;
        Ok(StoreReader { conn })
    }

    // ------------------------------------------------------------------
    // Token-id filler helpers
    // ------------------------------------------------------------------

    pub fn merge_pnl_into_condition(&self) -> StoreResult<()> {
        self.execute(
            "UPDATE condition SET positionIds = pnl.positionIds \
             FROM pnl_condition pnl WHERE condition.id = pnl.id \
             AND condition.positionIds IS NULL",
        )
    }

    pub fn null_position_id_conditions(&self, limit: usize) -> StoreResult<Vec<String>> {
        let conn = self.read.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM condition WHERE positionIds IS NULL \
             ORDER BY resolutionTimestamp LIMIT {}",
            limit
        ))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn update_condition_position_ids(&self, id: &str, position_ids: &str) -> StoreResult<()> {
        self.execute(&format!(
            "UPDATE condition SET positionIds = {} WHERE id = {}",
            escape_sql(position_ids),
            escape_sql(id)
        ))
    }
}

/// `ON CONFLICT(id) DO UPDATE SET <col>=excluded.<col>` for every non-id
/// column of the INSERT list.
fn on_conflict_clause(columns: &str) -> String {
    let mut clause = String::from(" ON CONFLICT(id) DO UPDATE SET ");
    let mut first = true;
    for col in columns.split(',') {
        let col = col.trim();
        if col.is_empty() || col == "id" {
            continue;
        }
        if !first {
            clause.push_str(", ");
        }
        clause.push_str(col);
        clause.push_str("=excluded.");
        clause.push_str(col);
        first = false;
    }
    clause
}

fn cell_to_json(array: &ArrayRef, row: usize) -> Value {
    if array.is_null(row) {
        return Value::Null;
    }
    match array.data_type() {
        DataType::Boolean => downcast::<BooleanArray>(array)
            .map(|a| Value::Bool(a.value(row)))
            .unwrap_or(Value::Null),
        DataType::Int8 => int_value(downcast::<Int8Array>(array).map(|a| a.value(row) as i64)),
        DataType::Int16 => int_value(downcast::<Int16Array>(array).map(|a| a.value(row) as i64)),
        DataType::Int32 => int_value(downcast::<Int32Array>(array).map(|a| a.value(row) as i64)),
        DataType::Int64 => int_value(downcast::<Int64Array>(array).map(|a| a.value(row))),
        DataType::Float32 => {
            float_value(downcast::<Float32Array>(array).map(|a| a.value(row) as f64))
        }
        DataType::Float64 => float_value(downcast::<Float64Array>(array).map(|a| a.value(row))),
        DataType::Utf8 => downcast::<StringArray>(array)
            .map(|a| Value::String(a.value(row).to_string()))
            .unwrap_or(Value::Null),
        DataType::LargeUtf8 => downcast::<LargeStringArray>(array)
            .map(|a| Value::String(a.value(row).to_string()))
            .unwrap_or(Value::Null),
        _ => duckdb::arrow::util::display::array_value_to_string(array, row)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn downcast<T: 'static>(array: &ArrayRef) -> Option<&T> {
    array.as_any().downcast_ref::<T>()
}

fn int_value(v: Option<i64>) -> Value {
    v.map(|n| Value::Number(Number::from(n))).unwrap_or(Value::Null)
}

fn float_value(v: Option<f64>) -> Value {
    v.and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// A dedicated scan connection. Each rebuild scan owns one, so the four
/// event scans run concurrently with each other and with the main reader.
pub struct StoreReader {
    conn: Connection,
}

impl StoreReader {
    /// Stream the query result as column chunks.
    pub fn scan<F>(&self, sql: &str, mut on_chunk: F) -> StoreResult<()>
    where
        F: FnMut(&Chunk),
    {
        let mut stmt = self.conn.prepare(sql)?;
        for batch in stmt.query_arrow([])? {
            if batch.num_rows() == 0 {
                continue;
            }
            on_chunk(&Chunk { batch });
        }
        Ok(())
    }
}

/// One column chunk: a set of column vectors sharing a row count.
pub struct Chunk {
    batch: RecordBatch,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn str_at(&self, col: usize, row: usize) -> Option<&str> {
        let array = self.batch.column(col);
        if array.is_null(row) {
            return None;
        }
        if let Some(a) = array.as_any().downcast_ref::<StringArray>() {
            return Some(a.value(row));
        }
        array
            .as_any()
            .downcast_ref::<LargeStringArray>()
            .map(|a| a.value(row))
    }

    pub fn i64_at(&self, col: usize, row: usize) -> Option<i64> {
        let array = self.batch.column(col);
        if array.is_null(row) {
            return None;
        }
        if let Some(a) = array.as_any().downcast_ref::<Int64Array>() {
            return Some(a.value(row));
        }
        array
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| a.value(row) as i64)
    }

    pub fn i32_at(&self, col: usize, row: usize) -> Option<i32> {
        let array = self.batch.column(col);
        if array.is_null(row) {
            return None;
        }
        array
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| a.value(row))
    }

    pub fn f64_at(&self, col: usize, row: usize) -> Option<f64> {
        let array = self.batch.column(col);
        if array.is_null(row) {
            return None;
        }
        if let Some(a) = array.as_any().downcast_ref::<Float64Array>() {
            return Some(a.value(row));
        }
        array
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|a| a.value(row) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::SPLIT;

    fn test_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.init_infra().unwrap();
        store
    }

    #[test]
    fn missing_cursor_is_empty() {
        let store = test_store();
        let cursor = store.get_cursor("src", "Split").unwrap();
        assert_eq!(cursor, SyncCursor::default());
    }

    #[test]
    fn atomic_insert_persists_rows_and_cursor_together() {
        let store = test_store();
        store.init_entity(&SPLIT).unwrap();

        let rows = vec![
            "'s1',100,'0xu1','0xc1',1000000".to_string(),
            "'s2',200,'0xu2','0xc1',2000000".to_string(),
        ];
        let cursor = SyncCursor {
            value: "200".to_string(),
            skip: 1,
        };
        store
            .atomic_insert_with_cursor("split", SPLIT.columns, &rows, "src", "Split", &cursor)
            .unwrap();

        assert_eq!(store.get_table_count("split"), 2);
        assert_eq!(store.get_cursor("src", "Split").unwrap(), cursor);
    }

    #[test]
    fn conflicting_id_updates_every_non_id_column() {
        let store = test_store();
        store.init_entity(&SPLIT).unwrap();

        let cursor = SyncCursor {
            value: "100".to_string(),
            skip: 0,
        };
        store
            .atomic_insert_with_cursor(
                "split",
                SPLIT.columns,
                &["'s1',100,'0xu1','0xc1',1000000".to_string()],
                "src",
                "Split",
                &cursor,
            )
            .unwrap();
        store
            .atomic_insert_with_cursor(
                "split",
                SPLIT.columns,
                &["'s1',150,'0xu9','0xc9',5000000".to_string()],
                "src",
                "Split",
                &SyncCursor {
                    value: "150".to_string(),
                    skip: 0,
                },
            )
            .unwrap();

        assert_eq!(store.get_table_count("split"), 1);
        let rows = store
            .query_rows("SELECT timestamp, stakeholder, amount FROM split WHERE id = 's1'")
            .unwrap();
        assert_eq!(rows[0]["timestamp"], serde_json::json!(150));
        assert_eq!(rows[0]["stakeholder"], serde_json::json!("0xu9"));
        assert_eq!(rows[0]["amount"], serde_json::json!("5000000"));
    }

    #[test]
    fn query_rows_types_values_natively() {
        let store = test_store();
        store
            .execute("CREATE TABLE t (b BOOLEAN, i INT, big BIGINT, d DOUBLE, s VARCHAR)")
            .unwrap();
        store
            .execute("INSERT INTO t VALUES (true, 7, 9000000000, 0.5, 'x'), (NULL, NULL, NULL, NULL, NULL)")
            .unwrap();

        let rows = store.query_rows("SELECT * FROM t").unwrap();
        assert_eq!(rows[0]["b"], serde_json::json!(true));
        assert_eq!(rows[0]["i"], serde_json::json!(7));
        assert_eq!(rows[0]["big"], serde_json::json!(9000000000i64));
        assert_eq!(rows[0]["d"], serde_json::json!(0.5));
        assert_eq!(rows[0]["s"], serde_json::json!("x"));
        assert_eq!(rows[1]["b"], Value::Null);
        assert_eq!(rows[1]["s"], Value::Null);
    }

    #[test]
    fn query_single_int_swallows_errors() {
        let store = test_store();
        assert_eq!(store.query_single_int("SELECT 42"), 42);
        assert_eq!(store.query_single_int("SELECT NULL"), 0);
        assert_eq!(store.query_single_int("SELECT * FROM missing"), 0);
    }

    #[test]
    fn reader_scans_chunks() {
        let store = test_store();
        store.init_entity(&SPLIT).unwrap();
        store
            .execute("INSERT INTO split VALUES ('s1',100,'0xu1','0xc1','1000000')")
            .unwrap();

        let reader = store.reader().unwrap();
        let mut seen = 0usize;
        reader
            .scan(
                "SELECT timestamp, stakeholder, amount FROM split",
                |chunk| {
                    for row in 0..chunk.len() {
                        assert_eq!(chunk.i64_at(0, row), Some(100));
                        assert_eq!(chunk.str_at(1, row), Some("0xu1"));
                        assert_eq!(chunk.str_at(2, row), Some("1000000"));
                        seen += 1;
                    }
                },
            )
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn on_conflict_clause_skips_id() {
        assert_eq!(
            on_conflict_clause("id, a, b"),
            " ON CONFLICT(id) DO UPDATE SET a=excluded.a, b=excluded.b"
        );
    }
}
