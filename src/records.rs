use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::gateway::Row;

pub const MONTH_KEY: &str = "MonthYear";
pub const OPERATOR_LENGTH_KEY: &str = "Length Surveyed";
pub const DISTANCE_KEY: &str = "Distance";
pub const ROW_ID_KEY: &str = "id";

pub type BulkRecord = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub title: String,
}

impl LayerDescriptor {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

fn missing_last<T>(left: Option<T>, right: Option<T>, order: impl FnOnce(T, T) -> Ordering) -> Ordering {
    match (left, right) {
        (Some(a), Some(b)) => order(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// Sorting reads numeric text too; the row itself is left as the backend returned it.
fn measure(row: &Row, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn text<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

fn sort_by_measure(rows: &mut [Row], key: &str) {
    rows.sort_by(|a, b| missing_last(measure(a, key), measure(b, key), |x, y| x.total_cmp(&y)));
}

pub fn sort_by_month(rows: &mut [Row]) {
    rows.sort_by(|a, b| missing_last(text(a, MONTH_KEY), text(b, MONTH_KEY), |x, y| x.cmp(y)));
}

pub fn sort_by_length(rows: &mut [Row]) {
    sort_by_measure(rows, OPERATOR_LENGTH_KEY);
}

pub fn sort_by_distance(rows: &mut [Row]) {
    sort_by_measure(rows, DISTANCE_KEY);
}

pub fn assign_row_ids(rows: &mut [Row]) {
    for row in rows {
        row.insert(ROW_ID_KEY.to_string(), Value::String(Uuid::new_v4().to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    fn fault(session: i64, distance: Value) -> Row {
        row(json!({
            "SessionID": session,
            "AssetID": 1042,
            "FaultCodeID": 3,
            "Distance": distance,
            "FaultName": "Crack"
        }))
    }

    #[test]
    fn faults_sort_ascending_by_distance() {
        let mut rows = vec![
            fault(1, json!(5.0)),
            fault(2, json!(2.0)),
            fault(3, Value::Null),
            fault(4, json!(8)),
        ];
        sort_by_distance(&mut rows);
        let sessions = rows
            .iter()
            .map(|row| row["SessionID"].as_i64().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(sessions, [2, 1, 4, 3]);
    }

    #[test]
    fn operators_sort_ascending_for_every_permutation() {
        let base = [("Ann", 30.0), ("Bo", 10.0), ("Cy", 20.0)];
        let permutations = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in permutations {
            let mut rows = order
                .iter()
                .map(|&i| row(json!({ "OperatorName": base[i].0, "Length Surveyed": base[i].1 })))
                .collect::<Vec<_>>();
            sort_by_length(&mut rows);
            let names = rows
                .iter()
                .map(|row| row["OperatorName"].as_str().unwrap())
                .collect::<Vec<_>>();
            assert_eq!(names, ["Bo", "Cy", "Ann"], "{order:?}");
        }
    }

    #[test]
    fn months_sort_as_text_with_gaps_last() {
        let mut rows = vec![
            row(json!({ "MonthYear": "2024-03", "LengthSurveyedSum": 1 })),
            row(json!({ "MonthYear": null, "LengthSurveyedSum": 2 })),
            row(json!({ "MonthYear": "2023-11", "LengthSurveyedSum": 3 })),
        ];
        sort_by_month(&mut rows);
        let sums = rows
            .iter()
            .map(|row| row["LengthSurveyedSum"].as_i64().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(sums, [3, 1, 2]);
    }

    #[test]
    fn ordering_and_ids_keep_backend_types() {
        let mut rows = vec![fault(7, json!("12.5")), fault(8, json!(3))];
        sort_by_distance(&mut rows);
        assign_row_ids(&mut rows);

        assert_eq!(rows[0]["SessionID"], 8);
        assert_eq!(rows[1]["Distance"], "12.5");
        assert_eq!(rows[1]["AssetID"], 1042);
        assert_eq!(rows[1]["FaultCodeID"], 3);
        assert_eq!(rows[1].len(), 6);
    }

    #[test]
    fn row_ids_are_fresh_and_unique() {
        let mut rows = vec![fault(1, json!(1.0)), fault(2, json!(2.0))];
        assign_row_ids(&mut rows);
        let first = rows
            .iter()
            .map(|row| row[ROW_ID_KEY].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert!(first.iter().all(|id| Uuid::parse_str(id).is_ok()));
        assert_ne!(first[0], first[1]);

        assign_row_ids(&mut rows);
        assert_ne!(rows[0][ROW_ID_KEY], first[0].as_str());
    }
}
