//! Cross-feed merge engine.
//!
//! `merge_snapshots` is a pure function: successive strict inner joins of
//! the input snapshots on `(Id, Symbol)`, ranked in the first (main)
//! snapshot's row order. The result is the feeds' common universe; records
//! missing from any snapshot are dropped on purpose.

use crate::{Record, Snapshot};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// Join key within one snapshot.
type Key = (i64, String);

/// Merge N snapshots (first = main) into one ranked record sequence.
///
/// Fewer than two snapshots is a caller contract violation; empty input
/// returns an empty result.
pub fn merge_snapshots(snapshots: &[Snapshot]) -> Vec<Record> {
    if snapshots.is_empty() {
        info!("No data to merge");
        return Vec::new();
    }
    debug_assert!(snapshots.len() >= 2, "merge requires at least two snapshots");

    info!("Merging data from {} sources", snapshots.len());

    // Field names that carry floats anywhere in the input; these must come
    // out of the join still numeric, bit-for-bit.
    let float_columns = collect_float_columns(snapshots);

    // Main snapshot drives membership and order.
    let main = keyed_rows(&snapshots[0]);

    // Remaining snapshots are lookup tables.
    let lookups: Vec<HashMap<Key, Record>> = snapshots[1..]
        .iter()
        .map(|snapshot| keyed_rows(snapshot).into_iter().collect())
        .collect();

    let mut merged = Vec::new();
    let mut rank = 0u64;
    'rows: for (key, main_fields) in main {
        // Strict inner join: the key must exist in every snapshot.
        let mut joined = main_fields;
        for (step, lookup) in lookups.iter().enumerate() {
            let Some(other) = lookup.get(&key) else {
                continue 'rows;
            };
            join_fields(&mut joined, other, step + 1);
        }

        rank += 1;
        let mut record = Record::new();
        record.insert("Rank".to_string(), Value::from(rank));
        record.insert("Symbol".to_string(), Value::String(key.1.clone()));
        for (name, value) in joined {
            record.insert(name, value);
        }
        restore_floats(&mut record, &float_columns);
        merged.push(record);
    }

    merged
}

/// Extract `(Id, Symbol)`-keyed rows in snapshot order.
///
/// `Id` is coerced to an integer; records with a non-numeric or missing
/// `Id` are excluded from the join. The key fields are stripped from the
/// row (`Id` is join-only, `Symbol` is re-emitted once by the caller).
fn keyed_rows(snapshot: &Snapshot) -> Vec<(Key, Record)> {
    snapshot
        .iter()
        .filter_map(|record| {
            let id = coerce_id(record.get("Id")?)?;
            let symbol = record.get("Symbol")?.as_str()?.to_string();
            let fields: Record = record
                .iter()
                .filter(|(name, _)| name.as_str() != "Id" && name.as_str() != "Symbol")
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            Some(((id, symbol), fields))
        })
        .collect()
}

fn coerce_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    }
}

/// Fold `right` into `left`, disambiguating colliding column names with
/// positional suffixes (`_df<step>` / `_df<step+1>`).
fn join_fields(left: &mut Record, right: &Record, step: usize) {
    for (name, value) in right {
        if let Some(existing) = left.remove(name) {
            left.insert(format!("{name}_df{step}"), existing);
            left.insert(format!("{name}_df{}", step + 1), value.clone());
        } else {
            left.insert(name.clone(), value.clone());
        }
    }
}

fn collect_float_columns(snapshots: &[Snapshot]) -> BTreeSet<String> {
    let mut columns = BTreeSet::new();
    for snapshot in snapshots {
        for record in snapshot {
            for (name, value) in record {
                if value.as_f64().is_some() && value.as_i64().is_none() {
                    columns.insert(name.clone());
                }
            }
        }
    }
    columns
}

/// Guarantee float-typed columns leave the join numeric: a value that was
/// carried as a decimal string is parsed back to its exact double.
fn restore_floats(record: &mut Record, float_columns: &BTreeSet<String>) {
    for name in float_columns {
        if let Some(Value::String(s)) = record.get(name) {
            if let Some(n) = s.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                record.insert(name.clone(), Value::Number(n));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(records: Value) -> Snapshot {
        serde_json::from_value(records).unwrap()
    }

    fn rank_snapshot() -> Snapshot {
        snapshot(json!([
            {"Id": 1, "Symbol": "BTC"},
            {"Id": 1027, "Symbol": "ETH"},
            {"Id": 5426, "Symbol": "SOL"}
        ]))
    }

    fn price_snapshot() -> Snapshot {
        snapshot(json!([
            {"Id": 5426, "Symbol": "SOL", "Price": 91.67929509303363},
            {"Id": 1, "Symbol": "BTC", "Price": 42863.717593629444},
            {"Id": 1027, "Symbol": "ETH", "Price": 2540.618971408493}
        ]))
    }

    #[test]
    fn test_end_to_end_rank_price_merge() {
        let merged = merge_snapshots(&[rank_snapshot(), price_snapshot()]);

        let expected = snapshot(json!([
            {"Rank": 1, "Symbol": "BTC", "Price": 42863.717593629444},
            {"Rank": 2, "Symbol": "ETH", "Price": 2540.618971408493},
            {"Rank": 3, "Symbol": "SOL", "Price": 91.67929509303363}
        ]));
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_float_precision_survives_serialization_round_trip() {
        let merged = merge_snapshots(&[rank_snapshot(), price_snapshot()]);
        let payload = serde_json::to_string(&merged).unwrap();
        assert!(payload.contains("42863.717593629444"));

        let reparsed: Vec<Record> = serde_json::from_str(&payload).unwrap();
        assert_eq!(reparsed[0]["Price"].as_f64(), Some(42863.717593629444));
    }

    #[test]
    fn test_output_is_key_intersection_in_main_order() {
        // Price feed lacks SOL; DOGE exists only in the price feed.
        let main = snapshot(json!([
            {"Id": 1, "Symbol": "BTC"},
            {"Id": 1027, "Symbol": "ETH"},
            {"Id": 5426, "Symbol": "SOL"}
        ]));
        let other = snapshot(json!([
            {"Id": 74, "Symbol": "DOGE", "Price": 0.08},
            {"Id": 1027, "Symbol": "ETH", "Price": 2540.618971408493},
            {"Id": 1, "Symbol": "BTC", "Price": 42863.717593629444}
        ]));

        let merged = merge_snapshots(&[main, other]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0]["Symbol"], json!("BTC"));
        assert_eq!(merged[0]["Rank"], json!(1));
        assert_eq!(merged[1]["Symbol"], json!("ETH"));
        assert_eq!(merged[1]["Rank"], json!(2));
    }

    #[test]
    fn test_non_numeric_id_excluded_from_join() {
        let main = snapshot(json!([
            {"Id": "n/a", "Symbol": "BTC"},
            {"Id": 1027, "Symbol": "ETH"}
        ]));
        let other = snapshot(json!([
            {"Id": 1, "Symbol": "BTC", "Price": 42863.7},
            {"Id": 1027, "Symbol": "ETH", "Price": 2540.6}
        ]));

        let merged = merge_snapshots(&[main, other]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["Symbol"], json!("ETH"));
    }

    #[test]
    fn test_id_dropped_from_output() {
        let merged = merge_snapshots(&[rank_snapshot(), price_snapshot()]);
        assert!(merged.iter().all(|r| !r.contains_key("Id")));
    }

    #[test]
    fn test_colliding_columns_get_positional_suffixes() {
        let main = snapshot(json!([
            {"Id": 1, "Symbol": "BTC", "Volume": 100.5}
        ]));
        let other = snapshot(json!([
            {"Id": 1, "Symbol": "BTC", "Volume": 200.5}
        ]));

        let merged = merge_snapshots(&[main, other]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["Volume_df1"], json!(100.5));
        assert_eq!(merged[0]["Volume_df2"], json!(200.5));
        assert!(!merged[0].contains_key("Volume"));
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        assert!(merge_snapshots(&[]).is_empty());
    }

    #[test]
    fn test_three_way_join() {
        let volume = snapshot(json!([
            {"Id": 1, "Symbol": "BTC", "Volume": 1.25},
            {"Id": 1027, "Symbol": "ETH", "Volume": 2.5},
            {"Id": 5426, "Symbol": "SOL", "Volume": 3.75}
        ]));
        let merged = merge_snapshots(&[rank_snapshot(), price_snapshot(), volume]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0]["Price"].as_f64(), Some(42863.717593629444));
        assert_eq!(merged[0]["Volume"].as_f64(), Some(1.25));
    }
}
