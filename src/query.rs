//! Local select builder rendering compiled filters and ordering to SQLite.

use std::fmt::Write as _;

use crate::{
    catalog::{self, Column, FieldRef, TRIP_COLUMNS, TRIP_NUMBER},
    data::Value,
    filter::Predicate,
    order::OrderKey,
};

/// Local table holding the replicated trip rows.
pub const LOCAL_TABLE: &str = "rgritten";

#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub columns: Vec<&'static Column>,
    pub predicates: Vec<Predicate>,
    pub order: Vec<OrderKey>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn new(columns: Vec<&'static Column>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    pub fn filter(mut self, predicates: Vec<Predicate>) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn order_by(mut self, order: Vec<OrderKey>) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Position of `name` among the selected columns.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// SQL text with positional `?` placeholders and its bound values.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let projection = if self.columns.is_empty() {
            quote_ident(TRIP_NUMBER)
        } else {
            self.columns
                .iter()
                .map(|column| quote_ident(column.name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!("SELECT {projection} FROM {}", quote_ident(LOCAL_TABLE));

        if !self.predicates.is_empty() {
            let conditions = self
                .predicates
                .iter()
                .map(|predicate| render_predicate(predicate, &mut params))
                .collect::<Vec<_>>();
            let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
        }
        if !self.order.is_empty() {
            let keys = self
                .order
                .iter()
                .map(|key| format!("{} {}", quote_ident(key.column), key.direction.sql()))
                .collect::<Vec<_>>();
            let _ = write!(sql, " ORDER BY {}", keys.join(", "));
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        (sql, params)
    }
}

fn render_predicate(predicate: &Predicate, params: &mut Vec<Value>) -> String {
    match predicate {
        Predicate::IsNull(column) => format!("{} IS NULL", quote_ident(column)),
        Predicate::NotNull(column) => format!("{} IS NOT NULL", quote_ident(column)),
        Predicate::Compare {
            column,
            op,
            value,
            on_date,
        } => {
            params.push(value.clone());
            let target = if *on_date {
                format!("date({})", quote_ident(column))
            } else {
                quote_ident(column)
            };
            format!("{target} {} ?", op.sql())
        }
        Predicate::Like {
            column,
            pattern,
            negated,
        } => {
            params.push(Value::String(pattern.clone()));
            let keyword = if *negated { "NOT LIKE" } else { "LIKE" };
            format!("{} {keyword} ?", quote_ident(column))
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Stored columns needed to render `fields`, including the inputs of any
/// derived field, in first-use order without repeats.
pub fn projection(fields: impl IntoIterator<Item = FieldRef>) -> Vec<&'static Column> {
    let mut columns: Vec<&'static Column> = Vec::new();
    let mut push = |column: &'static Column| {
        if !columns.iter().any(|existing| existing.name == column.name) {
            columns.push(column);
        }
    };
    for field in fields {
        match field {
            FieldRef::Stored(index) => push(&TRIP_COLUMNS[index]),
            FieldRef::Derived(derived) => derived
                .inputs()
                .iter()
                .filter_map(|name| catalog::column_by_name(name))
                .for_each(&mut push),
        }
    }
    columns
}
