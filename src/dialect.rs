//! Remote SQL dialects and the statements the sync engine and the
//! diagnostics issue against the remote source.
//!
//! Everything above this module stays dialect-agnostic: a [`Dialect`] only
//! knows how to quote, how to wrap a column in a best-effort conversion and
//! how to cap a select.

use chrono::NaiveDate;

use crate::{
    catalog::{Column, ColumnClass, TRIP_DATE, TRIP_NUMBER},
    data::Value,
    sync::Cursor,
};

/// Target of a non-throwing conversion: failure yields NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Wide exact decimal.
    Decimal,
    DateTime,
    Date,
    Time,
    /// Wide integer.
    BigInt,
    Float,
}

impl Coercion {
    pub fn for_class(class: ColumnClass) -> Option<Self> {
        match class {
            ColumnClass::Text => None,
            ColumnClass::Numeric | ColumnClass::Decimal => Some(Coercion::Decimal),
            ColumnClass::DateTime => Some(Coercion::DateTime),
            ColumnClass::Time => Some(Coercion::Time),
            ColumnClass::TripNumber => Some(Coercion::BigInt),
        }
    }
}

pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote(&self, ident: &str) -> String;

    /// Expression converting `column` to `target`, NULL when it cannot.
    fn coerce(&self, column: &str, target: Coercion) -> String;

    /// `SELECT` with an optional row cap placed where the dialect wants it.
    fn select(&self, projection: &str, rest: &str, limit: Option<usize>) -> String;

    /// Column wrapped for its declared class; text columns pass through.
    fn wrap_coerce(&self, column: &str, class: ColumnClass) -> String {
        match Coercion::for_class(class) {
            Some(target) => self.coerce(column, target),
            None => self.quote(column),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServer;

impl Dialect for SqlServer {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn coerce(&self, column: &str, target: Coercion) -> String {
        let sql_type = match target {
            Coercion::Decimal => "decimal(38, 10)",
            Coercion::DateTime => "datetime",
            Coercion::Date => "date",
            Coercion::Time => "time",
            Coercion::BigInt => "bigint",
            Coercion::Float => "float",
        };
        format!("TRY_CONVERT({sql_type}, {})", self.quote(column))
    }

    fn select(&self, projection: &str, rest: &str, limit: Option<usize>) -> String {
        match limit {
            Some(limit) => format!("SELECT TOP ({limit}) {projection} {rest}"),
            None => format!("SELECT {projection} {rest}"),
        }
    }
}

/// SQLite rendering; the `try_*` conversion functions are registered on
/// every connection by [`crate::remote::register_coercions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote(&self, ident: &str) -> String {
        crate::query::quote_ident(ident)
    }

    fn coerce(&self, column: &str, target: Coercion) -> String {
        let function = match target {
            Coercion::Decimal => "try_decimal",
            Coercion::DateTime => "try_datetime",
            Coercion::Date => "try_date",
            Coercion::Time => "try_time",
            Coercion::BigInt => "try_bigint",
            Coercion::Float => "try_float",
        };
        format!("{function}({})", self.quote(column))
    }

    fn select(&self, projection: &str, rest: &str, limit: Option<usize>) -> String {
        match limit {
            Some(limit) => format!("SELECT {projection} {rest} LIMIT {limit}"),
            None => format!("SELECT {projection} {rest}"),
        }
    }
}

/// Remote statement with positional `?` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteQuery {
    pub sql: String,
    pub params: Vec<Value>,
    /// Output column names in select order.
    pub columns: Vec<&'static str>,
}

/// Options for the replication select.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncSelect<'a> {
    pub min_date: Option<NaiveDate>,
    pub cursor: Option<&'a Cursor>,
    pub limit: Option<usize>,
}

/// Select of `columns`, each wrapped for its class, restricted to rows whose
/// trip number and trip date coerce, ordered by `(date, trip number)`.
///
/// With a cursor the compound predicate `date > d OR (date = d AND trip > n)`
/// is added.
///
/// Undated rows are excluded on purpose: they have no place in the cursor
/// order and would be fetched again by every run.
pub fn sync_select(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[&'static Column],
    options: SyncSelect<'_>,
) -> RemoteQuery {
    let trip = dialect.coerce(TRIP_NUMBER, Coercion::BigInt);
    let date = dialect.coerce(TRIP_DATE, Coercion::Date);

    let projection = columns
        .iter()
        .map(|column| {
            let wrapped = dialect.wrap_coerce(column.name, column.class);
            format!("{wrapped} AS {}", dialect.quote(column.name))
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut params = Vec::new();
    let mut conditions = vec![format!("{trip} IS NOT NULL"), format!("{date} IS NOT NULL")];
    if let Some(min_date) = options.min_date {
        conditions.push(format!("{date} >= ?"));
        params.push(Value::Date(min_date));
    }
    if let Some(cursor) = options.cursor {
        conditions.push(format!(
            "(({date} > ?) OR ({date} = ? AND {trip} > ?))"
        ));
        params.push(Value::Date(cursor.date));
        params.push(Value::Date(cursor.date));
        params.push(Value::Integer(cursor.trip_number));
    }

    let rest = format!(
        "FROM {table} WHERE {} ORDER BY {date}, {trip}",
        conditions.join(" AND ")
    );
    RemoteQuery {
        sql: dialect.select(&projection, &rest, options.limit),
        params,
        columns: columns.iter().map(|column| column.name).collect(),
    }
}

/// Minimal one-row select used to test whether `columns` can be selected.
pub fn probe_select(dialect: &dyn Dialect, table: &str, columns: &[&'static Column]) -> RemoteQuery {
    sync_select(
        dialect,
        table,
        columns,
        SyncSelect {
            limit: Some(1),
            ..SyncSelect::default()
        },
    )
}

/// Rows past `after_trip_number` whose `column` holds a value that does not
/// convert to a float. Returns the converted trip number and the raw value.
pub fn issue_probe(
    dialect: &dyn Dialect,
    table: &str,
    column: &'static str,
    after_trip_number: i64,
    min_date: Option<NaiveDate>,
    sample: usize,
) -> RemoteQuery {
    let trip = dialect.coerce(TRIP_NUMBER, Coercion::BigInt);
    let quoted = dialect.quote(column);

    let mut params = vec![Value::Integer(after_trip_number)];
    let mut conditions = vec![format!("{trip} IS NOT NULL"), format!("{trip} > ?")];
    if let Some(min_date) = min_date {
        conditions.push(format!("{} >= ?", dialect.coerce(TRIP_DATE, Coercion::Date)));
        params.push(Value::Date(min_date));
    }
    conditions.push(format!("{quoted} IS NOT NULL"));
    conditions.push(format!("{} IS NULL", dialect.coerce(column, Coercion::Float)));

    let projection = format!("{trip} AS {}, {quoted}", dialect.quote(TRIP_NUMBER));
    let rest = format!(
        "FROM {table} WHERE {} ORDER BY {trip}",
        conditions.join(" AND ")
    );
    RemoteQuery {
        sql: dialect.select(&projection, &rest, Some(sample)),
        params,
        columns: vec![TRIP_NUMBER, column],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::column_by_name;

    fn columns(names: &[&str]) -> Vec<&'static Column> {
        names.iter().filter_map(|name| column_by_name(name)).collect()
    }

    #[test]
    fn sql_server_wraps_each_class() {
        let dialect = SqlServer;
        assert_eq!(
            dialect.wrap_coerce("afstand", ColumnClass::Decimal),
            "TRY_CONVERT(decimal(38, 10), [afstand])"
        );
        assert_eq!(dialect.wrap_coerce("ritdatum", ColumnClass::DateTime), "TRY_CONVERT(datetime, [ritdatum])");
        assert_eq!(dialect.wrap_coerce("instap", ColumnClass::Time), "TRY_CONVERT(time, [instap])");
        assert_eq!(dialect.wrap_coerce("ritnummer", ColumnClass::TripNumber), "TRY_CONVERT(bigint, [ritnummer])");
        assert_eq!(dialect.wrap_coerce("status", ColumnClass::Text), "[status]");
    }

    #[test]
    fn sync_select_carries_compound_cursor() {
        let cursor = Cursor {
            date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            trip_number: 9,
        };
        let query = sync_select(
            &SqlServer,
            "rpt.RGRitten",
            &columns(&["ritnummer", "ritdatum", "status"]),
            SyncSelect {
                min_date: NaiveDate::from_ymd_opt(2024, 1, 1),
                cursor: Some(&cursor),
                limit: None,
            },
        );
        assert_eq!(
            query.sql,
            "SELECT TRY_CONVERT(bigint, [ritnummer]) AS [ritnummer], \
             TRY_CONVERT(datetime, [ritdatum]) AS [ritdatum], [status] AS [status] \
             FROM rpt.RGRitten WHERE TRY_CONVERT(bigint, [ritnummer]) IS NOT NULL \
             AND TRY_CONVERT(date, [ritdatum]) IS NOT NULL \
             AND TRY_CONVERT(date, [ritdatum]) >= ? \
             AND ((TRY_CONVERT(date, [ritdatum]) > ?) OR (TRY_CONVERT(date, [ritdatum]) = ? \
             AND TRY_CONVERT(bigint, [ritnummer]) > ?)) \
             ORDER BY TRY_CONVERT(date, [ritdatum]), TRY_CONVERT(bigint, [ritnummer])"
        );
        assert_eq!(query.params.len(), 4);
        assert_eq!(query.params[3], Value::Integer(9));
        assert_eq!(query.columns, vec!["ritnummer", "ritdatum", "status"]);
    }

    #[test]
    fn probes_cap_rows_per_dialect() {
        let probe = probe_select(&SqlServer, "rpt.RGRitten", &columns(&["afstand"]));
        assert!(probe.sql.starts_with("SELECT TOP (1) TRY_CONVERT(decimal(38, 10), [afstand])"));
        assert!(probe.params.is_empty());

        let probe = probe_select(&Sqlite, "RGRitten", &columns(&["afstand"]));
        assert!(probe.sql.starts_with("SELECT try_decimal(\"afstand\") AS \"afstand\""));
        assert!(probe.sql.ends_with(" LIMIT 1"));
    }

    #[test]
    fn issue_probe_looks_for_float_failures_past_cursor() {
        let query = issue_probe(&SqlServer, "rpt.RGRitten", "afstand", 120, None, 5);
        assert_eq!(
            query.sql,
            "SELECT TOP (5) TRY_CONVERT(bigint, [ritnummer]) AS [ritnummer], [afstand] \
             FROM rpt.RGRitten \
             WHERE TRY_CONVERT(bigint, [ritnummer]) IS NOT NULL \
             AND TRY_CONVERT(bigint, [ritnummer]) > ? \
             AND [afstand] IS NOT NULL AND TRY_CONVERT(float, [afstand]) IS NULL \
             ORDER BY TRY_CONVERT(bigint, [ritnummer])"
        );
        assert_eq!(query.params, vec![Value::Integer(120)]);
    }
}
