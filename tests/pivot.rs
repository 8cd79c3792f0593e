mod common;

use std::collections::HashMap;

use chrono::NaiveDate;
use proptest::prelude::*;
use trip_reports::{
    data::Value,
    filter::{FilterOperator, FilterSpec, RuntimeFilters, SavedFilter},
    pivot::{PivotCell, PivotPlan, build_pivot},
    report::{Aggregate, PivotValueSpec, ReportSettings},
    runner::{OutputFormat, RenderOutcome, run_report},
    store::LocalStore,
};

use common::{local_trip, store_with};

fn sales(region: &str, quarter: &str, amount: i64) -> HashMap<&'static str, Value> {
    HashMap::from([
        ("region", Value::String(region.to_string())),
        ("quarter", Value::String(quarter.to_string())),
        ("amount", Value::Integer(amount)),
    ])
}

#[test]
fn row_keys_without_source_rows_produce_no_output_row() {
    let plan = PivotPlan::new(
        vec!["region".into()],
        Some("quarter".into()),
        vec![PivotValueSpec::new("amount", Aggregate::Sum)],
    )
    .expect("complete plan");
    let table = build_pivot(&plan, vec![sales("North", "Q1", 10), sales("North", "Q1", 5)]);

    assert_eq!(table.headers, vec!["region", "Q1 sum(amount)"]);
    assert_eq!(
        table.rows,
        vec![vec![
            PivotCell::Value(Some(Value::String("North".into()))),
            PivotCell::Value(Some(Value::Integer(15))),
        ]]
    );
    assert!(
        table
            .rows
            .iter()
            .all(|row| row[0].value() != Some(&Value::String("South".into())))
    );
}

#[test]
fn missing_column_group_differs_from_null_aggregate() {
    let plan = PivotPlan::new(
        vec!["region".into()],
        Some("quarter".into()),
        vec![PivotValueSpec::new("amount", Aggregate::Max)],
    )
    .expect("complete plan");
    let mut blank = sales("South", "Q2", 0);
    blank.remove("amount");
    let table = build_pivot(&plan, vec![sales("North", "Q1", 3), blank]);

    assert_eq!(table.headers, vec!["region", "Q1 max(amount)", "Q2 max(amount)"]);
    assert_eq!(table.rows[0][2], PivotCell::NoGroup);
    assert_eq!(table.rows[1][1], PivotCell::NoGroup);
    assert_eq!(table.rows[1][2], PivotCell::Value(None));
}

fn tagged(quarter: Value) -> HashMap<&'static str, Value> {
    HashMap::from([("region", Value::String("N".into())), ("quarter", quarter)])
}

#[test]
fn mixed_type_column_values_form_one_group_each() {
    let plan = PivotPlan::new(
        vec!["region".into()],
        Some("quarter".into()),
        vec![PivotValueSpec::new("x", Aggregate::Count)],
    )
    .expect("complete plan");
    let quarters = [
        Value::Integer(3),
        Value::Integer(10),
        Value::String("2".into()),
    ];
    let rows = quarters
        .iter()
        .chain(quarters.iter())
        .cloned()
        .map(tagged)
        .collect::<Vec<_>>();
    let table = build_pivot(&plan, rows);

    assert_eq!(
        table.headers,
        vec!["region", "3 count(x)", "10 count(x)", "2 count(x)"]
    );
    assert_eq!(
        table.rows,
        vec![vec![
            PivotCell::Value(Some(Value::String("N".into()))),
            PivotCell::Value(Some(Value::Integer(2))),
            PivotCell::Value(Some(Value::Integer(2))),
            PivotCell::Value(Some(Value::Integer(2))),
        ]]
    );
}

fn quarter_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..20).prop_map(Value::Integer),
        (0i64..20).prop_map(|n| Value::String(n.to_string())),
        prop::sample::select(vec!["a", "b", "10", ""]).prop_map(|s| Value::String(s.to_string())),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_distinct_column_value_gets_exactly_one_group(
        quarters in proptest::collection::vec(quarter_value(), 1..30),
    ) {
        let plan = PivotPlan::new(
            vec!["region".into()],
            Some("quarter".into()),
            vec![PivotValueSpec::new("x", Aggregate::Count)],
        )
        .expect("complete plan");
        let mut distinct: Vec<Value> = Vec::new();
        for quarter in &quarters {
            if !distinct.contains(quarter) {
                distinct.push(quarter.clone());
            }
        }
        let table = build_pivot(&plan, quarters.iter().cloned().map(tagged).collect::<Vec<_>>());

        prop_assert_eq!(table.headers.len(), 1 + distinct.len());
        prop_assert_eq!(table.rows.len(), 1);
        let mut total = 0;
        for cell in &table.rows[0][1..] {
            match cell.value() {
                Some(Value::Integer(count)) => total += count,
                other => prop_assert!(false, "unexpected cell {:?}", other),
            }
        }
        prop_assert_eq!(total, quarters.len() as i64);
    }
}

fn trip_store() -> LocalStore {
    let day = |d| NaiveDate::from_ymd_opt(2024, 7, d).expect("valid day");
    let cells = |status: &str, weekday: &str, distance: f64| {
        vec![
            ("status", Value::String(status.into())),
            ("weekdag", Value::String(weekday.into())),
            ("afstand", Value::Float(distance)),
        ]
    };
    store_with(&[
        local_trip(day(1), 1, &cells("done", "ma", 4.5)),
        local_trip(day(2), 2, &cells("done", "di", 2.5)),
        local_trip(day(1), 3, &cells("cancelled", "ma", 1.0)),
        local_trip(day(3), 4, &cells("planned", "wo", 6.0)),
    ])
}

fn pivot_settings() -> ReportSettings {
    let mut settings = ReportSettings::named("Distance by weekday");
    settings.pivot_enabled = true;
    settings.pivot_row_fields = vec!["status".into()];
    settings.pivot_col_field = Some("weekdag".into());
    settings.pivot_values = vec![
        PivotValueSpec::new("afstand", Aggregate::Sum),
        PivotValueSpec::new("ritnummer", Aggregate::Count).labelled("trips"),
    ];
    settings.filter_fields = vec![SavedFilter::Spec(FilterSpec::scalar(
        "status",
        FilterOperator::NotEq,
        "planned",
    ))];
    settings
}

#[test]
fn saved_pivot_report_exports_empty_cells_for_missing_groups() {
    let store = trip_store();
    let id = store.create_report(pivot_settings()).expect("create").id;

    let RenderOutcome::Csv { filename, bytes } =
        run_report(&store, id, OutputFormat::Csv, None, &RuntimeFilters::new()).expect("render")
    else {
        panic!("expected csv");
    };
    assert_eq!(filename, "Distance by weekday.csv");
    assert_eq!(
        String::from_utf8(bytes).expect("utf8"),
        "status,di sum(afstand),di trips,ma sum(afstand),ma trips\n\
         cancelled,,,1,1\n\
         done,2.5,1,4.5,1\n"
    );
}

#[test]
fn pivot_table_view_reports_pivot_rows() {
    let store = trip_store();
    let id = store.create_report(pivot_settings()).expect("create").id;

    let RenderOutcome::Table(view) =
        run_report(&store, id, OutputFormat::Html, None, &RuntimeFilters::new()).expect("render")
    else {
        panic!("expected table view");
    };
    assert!(view.pivot.is_some());
    assert_eq!(view.rows.len(), 2);
    assert_eq!(view.rows[0][1], None);
    assert_eq!(view.rows[1][0].as_deref(), Some("done"));
}

#[test]
fn pivot_over_limited_source_rows() {
    let store = trip_store();
    let id = store.create_report(pivot_settings()).expect("create").id;

    let RenderOutcome::Table(view) =
        run_report(&store, id, OutputFormat::Html, Some(1), &RuntimeFilters::new()).expect("render")
    else {
        panic!("expected table view");
    };
    assert_eq!(view.rows.len(), 1);
}
