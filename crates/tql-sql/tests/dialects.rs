use anyhow::Result;
use std::sync::Arc;
use tql_ast::parse;
use tql_ir::Node;
use tql_registry::{FuncKind, RegistryError};
use tql_sql::funcs::WINDOW_NAMES;
use tql_sql::{sql_funcs, Dialect, LazyTbl, MockSource, SqlError};

fn table(dialect: Dialect) -> LazyTbl {
    let source = Arc::new(MockSource::new(dialect).with_table("t", &["g", "x", "Amount"]));
    LazyTbl::new(source, "t").unwrap()
}

fn kw(name: &str, source: &str) -> Result<(String, Node)> {
    Ok((name.to_string(), parse(source)?))
}

#[test]
fn test_aggregate_names_have_window_entries() -> Result<()> {
    for dialect in Dialect::ALL {
        let tables = sql_funcs(dialect)?;
        let windows = tables.table(FuncKind::Window).names();
        for name in tables.table(FuncKind::Aggregate).names() {
            assert!(windows.contains(name), "{}: aggregate {} has no window entry", dialect, name);
        }
        for name in WINDOW_NAMES {
            assert!(windows.contains(name), "{}: missing window {}", dialect, name);
        }
    }
    Ok(())
}

#[test]
fn test_identifier_quoting() -> Result<()> {
    let pg = table(Dialect::Postgresql).select(&[parse("_.Amount")?])?;
    assert_eq!(pg.show_query(), "SELECT t.\"Amount\"\nFROM t");

    let my = table(Dialect::Mysql).select(&[parse("_.Amount")?])?;
    assert_eq!(my.show_query(), "SELECT t.`Amount`\nFROM t");
    Ok(())
}

#[test]
fn test_floor_division_per_dialect() -> Result<()> {
    let expected = [
        (Dialect::Postgresql, "CAST(t.x / 2 AS INTEGER)"),
        (Dialect::Duckdb, "CAST(floor(t.x / 2) AS INTEGER)"),
        (Dialect::Mysql, "t.x DIV 2"),
        (Dialect::Bigquery, "floor(t.x / 2)"),
        (Dialect::Spark, "CAST(t.x / 2 AS INT)"),
    ];
    for (dialect, sql) in expected {
        let out = table(dialect).transmute(&[kw("h", "_.x // 2")?])?;
        assert_eq!(out.show_query(), format!("SELECT {} AS h\nFROM t", sql), "{}", dialect);
    }
    Ok(())
}

#[test]
fn test_sqlite_has_no_windows() -> Result<()> {
    let err = table(Dialect::Sqlite).mutate(&[kw("c", "_.x.cumsum()")?]).unwrap_err();
    assert!(matches!(err, SqlError::Registry(RegistryError::LookupBound(_))), "{:?}", err);

    // plain aggregates still work
    let out = table(Dialect::Sqlite).summarize(&[kw("m", "_.x.mean()")?])?;
    assert_eq!(out.show_query(), "SELECT avg(t.x) AS m\nFROM t");
    Ok(())
}

#[test]
fn test_unknown_method_names_dialect() -> Result<()> {
    let err = table(Dialect::Redshift)
        .mutate(&[kw("y", "_.x.frobnicate()")?])
        .unwrap_err();
    match err {
        SqlError::Registry(RegistryError::FunctionLookup { name, context }) => {
            assert_eq!(name, "frobnicate");
            assert_eq!(context, "redshift");
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn test_aggregate_overrides() -> Result<()> {
    let pg = table(Dialect::Postgresql).summarize(&[kw("s", "_.x.std()")?, kw("a", "_.x.any()")?])?;
    assert_eq!(pg.show_query(), "SELECT stddev_samp(t.x) AS s, bool_or(t.x) AS a\nFROM t");

    let bq = table(Dialect::Bigquery).summarize(&[kw("a", "_.x.any()")?])?;
    assert_eq!(bq.show_query(), "SELECT sum(CAST(t.x AS INT64)) != 0 AS a\nFROM t");

    let err = table(Dialect::Bigquery).summarize(&[kw("m", "_.x.median()")?]).unwrap_err();
    assert!(matches!(err, SqlError::Registry(RegistryError::LookupBound(_))));

    let duck = table(Dialect::Duckdb).summarize(&[kw("m", "_.x.median()")?])?;
    assert_eq!(duck.show_query(), "SELECT median(t.x) AS m\nFROM t");
    Ok(())
}

#[test]
fn test_datetime_properties() -> Result<()> {
    let pg = table(Dialect::Postgresql).transmute(&[kw("y", "_.x.dt.year")?, kw("e", "_.x.dt.is_month_end")?])?;
    assert_eq!(
        pg.show_query(),
        "SELECT EXTRACT(year FROM t.x) AS y, date_trunc('day', t.x) = date_trunc('month', t.x) + INTERVAL '1 month' - INTERVAL '1 day' AS e\nFROM t"
    );

    let my = table(Dialect::Mysql).transmute(&[kw("d", "_.x.dt.is_year_start")?])?;
    assert_eq!(
        my.show_query(),
        "SELECT year(t.x) != year(date_sub(t.x, INTERVAL 1 DAY)) AS d\nFROM t"
    );
    Ok(())
}

#[test]
fn test_string_methods() -> Result<()> {
    let my = table(Dialect::Mysql).transmute(&[kw("s", "_.g.str.strip()")?])?;
    assert_eq!(
        my.show_query(),
        "SELECT regexp_replace(t.g, '(^[[:space:]]+|[[:space:]]+$)', '') AS s\nFROM t"
    );

    let err = table(Dialect::Duckdb).transmute(&[kw("s", "_.g.str.title()")?]).unwrap_err();
    assert!(matches!(err, SqlError::Registry(RegistryError::LookupBound(_))));

    let pg = table(Dialect::Postgresql).filter(&[parse("_.g.str.startswith('10%')")?])?;
    assert_eq!(pg.show_query(), "SELECT t.g, t.x, t.\"Amount\"\nFROM t\nWHERE t.g LIKE '10\\%%' ESCAPE '\\'");
    Ok(())
}
