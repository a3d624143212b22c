use serde::Serialize;
use serde_json::Value;

use crate::gateway::{quote_identifier, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{position}"),
            Dialect::Postgres => format!("${position}"),
        }
    }

    fn month_label(&self, column: &str) -> String {
        match self {
            Dialect::Sqlite => format!("strftime('%Y-%m', {column})"),
            Dialect::Postgres => format!("to_char({column}, 'YYYY-MM')"),
        }
    }

    fn first_char(&self, column: &str) -> String {
        match self {
            Dialect::Sqlite => format!("substr(CAST({column} AS TEXT), 1, 1)"),
            Dialect::Postgres => format!("LEFT(CAST({column} AS TEXT), 1)"),
        }
    }

    fn real_sum(&self, column: &str) -> String {
        match self {
            Dialect::Sqlite => format!("TOTAL({column})"),
            Dialect::Postgres => format!("CAST(COALESCE(SUM({column}), 0) AS DOUBLE PRECISION)"),
        }
    }
}

pub fn monthly_lengths(dialect: Dialect) -> Statement {
    let month = dialect.month_label("\"Date\"");
    Statement::literal(format!(
        "SELECT {month} AS \"MonthYear\", {sum} AS \"LengthSurveyedSum\", \"TemplateName\" \
         FROM \"SpecialFields\" \
         GROUP BY {month}, \"TemplateName\" \
         ORDER BY {month}",
        sum = dialect.real_sum("\"LengthSurveryed\""),
    ))
}

pub fn operator_lengths(dialect: Dialect) -> Statement {
    let sum = dialect.real_sum("\"LengthSurveryed\"");
    Statement::literal(format!(
        "SELECT \"OperatorName\", {sum} AS \"Length Surveyed\" \
         FROM \"SpecialFields\" \
         GROUP BY \"OperatorName\" \
         ORDER BY {sum} ASC"
    ))
}

pub fn inspection_map(dialect: Dialect) -> Statement {
    Statement::literal(format!(
        "SELECT \"AssetID\", \"Date\", \"TemplateName\", \"OperatorName\", \"StartID\", \
         \"EndID\", \"AssetLocation\", \"City\", {structural} AS \"structRating\", \
         {maintenance} AS \"maintRating\" \
         FROM \"SpecialFields\"",
        structural = dialect.first_char("\"PacpQuickStructRatingNum\""),
        maintenance = dialect.first_char("\"PacpQuickMaintRatingNum\""),
    ))
}

pub fn fault_details(_dialect: Dialect) -> Statement {
    Statement::literal(
        "SELECT \"SpecialFields\".\"SessionID\", \"SpecialFields\".\"StartID\", \
         \"SpecialFields\".\"EndID\", \"SpecialFields\".\"AssetID\", \"SpecialFields\".\"Date\", \
         \"SpecialFields\".\"AssetLocation\", \"SpecialFields\".\"City\", \
         \"FaultCodes\".\"FaultName\", \"Data\".\"FaultCodeID\", \"Data\".\"StructWeight\", \
         \"Data\".\"MaintWeight\", \"SpecialFields\".\"TemplateName\", \"Data\".\"Distance\", \
         \"Session\".\"MediaFolder\", \"Data\".\"PictureLocation\", \"Data\".\"MpegLocation\" \
         FROM \"Session\" \
         INNER JOIN \"Data\" ON \"Session\".\"SessionID\" = \"Data\".\"SessionID\" \
         INNER JOIN \"FaultCodes\" ON \"FaultCodes\".\"FaultCodeID\" = \"Data\".\"FaultCodeID\" \
         INNER JOIN \"SpecialFields\" ON \"Session\".\"SessionID\" = \"SpecialFields\".\"SessionID\" \
         ORDER BY \"Data\".\"Distance\" ASC",
    )
}

pub fn inspections_by_template(_dialect: Dialect) -> Statement {
    Statement::literal(
        "SELECT \"TemplateName\", COUNT(\"TemplateName\") AS \"InspectionCount\" \
         FROM \"SpecialFields\" \
         GROUP BY \"TemplateName\"",
    )
}

pub fn delete_all(table: &str) -> Statement {
    Statement::literal(format!("DELETE FROM {}", quote_identifier(table)))
}

/// Parameter-bound insert of one record. `columns` must already be allow-listed.
pub fn insert_row(dialect: Dialect, table: &str, columns: &[&str], values: Vec<Value>) -> Statement {
    let table = quote_identifier(table);
    if columns.is_empty() {
        return Statement::literal(format!("INSERT INTO {table} DEFAULT VALUES"));
    }
    let names = columns
        .iter()
        .map(|column| quote_identifier(column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|position| dialect.placeholder(position))
        .collect::<Vec<_>>()
        .join(", ");
    Statement::bound(
        format!("INSERT INTO {table} ({names}) VALUES ({placeholders})"),
        values,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn month_grouping_follows_dialect() {
        assert!(monthly_lengths(Dialect::Sqlite)
            .sql
            .contains("strftime('%Y-%m', \"Date\") AS \"MonthYear\""));
        assert!(monthly_lengths(Dialect::Postgres)
            .sql
            .contains("to_char(\"Date\", 'YYYY-MM') AS \"MonthYear\""));
    }

    #[test]
    fn read_statements_take_no_parameters() {
        for dialect in [Dialect::Sqlite, Dialect::Postgres] {
            for statement in [
                monthly_lengths(dialect),
                operator_lengths(dialect),
                inspection_map(dialect),
                fault_details(dialect),
                inspections_by_template(dialect),
            ] {
                assert!(statement.params.is_empty());
            }
        }
    }

    #[test]
    fn insert_binds_values_with_dialect_placeholders() {
        let statement = insert_row(
            Dialect::Postgres,
            "PosmGIS",
            &["AssetID", "Length"],
            vec![json!("MH-1"), json!(3)],
        );
        assert_eq!(
            statement.sql,
            "INSERT INTO \"PosmGIS\" (\"AssetID\", \"Length\") VALUES ($1, $2)"
        );
        assert_eq!(statement.params, vec![json!("MH-1"), json!(3)]);

        let sqlite = insert_row(Dialect::Sqlite, "PosmGIS", &["AssetID"], vec![json!("A")]);
        assert!(sqlite.sql.ends_with("VALUES (?1)"));
    }

    #[test]
    fn empty_record_inserts_defaults() {
        let statement = insert_row(Dialect::Sqlite, "PosmGIS", &[], Vec::new());
        assert_eq!(statement.sql, "INSERT INTO \"PosmGIS\" DEFAULT VALUES");
    }
}
