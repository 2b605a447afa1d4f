use anyhow::Result;
use std::sync::Arc;
use tql_ast::parse;
use tql_ir::{Node, Value};
use tql_sql::{Dialect, LazyTbl, MockSource, QueryResult, SqlError};

fn kw(name: &str, source: &str) -> Result<(String, Node)> {
    Ok((name.to_string(), parse(source)?))
}

fn source(dialect: Dialect) -> Arc<MockSource> {
    Arc::new(
        MockSource::new(dialect)
            .with_table("t", &["x"])
            .with_table("sales", &["g", "x", "y"]),
    )
}

#[test]
fn test_rank_filter_computes_windows_in_subquery() -> Result<()> {
    let tbl = LazyTbl::new(source(Dialect::Duckdb), "t")?;
    let out = tbl.filter(&[parse("_.x.rank() <= 1")?])?;
    assert_eq!(
        out.show_query(),
        "SELECT anon_1.x\nFROM (SELECT t.x, rank() OVER (ORDER BY t.x) AS win1, count(*) OVER (PARTITION BY t.x) AS win2\nFROM t) AS anon_1\nWHERE anon_1.win1 + (anon_1.win2 - 1) / 2.0 <= 1"
    );
    Ok(())
}

#[test]
fn test_grouped_filter_partitions_windows() -> Result<()> {
    let tbl = LazyTbl::new(source(Dialect::Postgresql), "sales")?
        .group_by(&[parse("_.g")?], &[], false)?
        .filter(&[parse("_.x > _.x.mean()")?])?;
    assert_eq!(
        tbl.show_query(),
        "SELECT anon_1.g, anon_1.x, anon_1.y\nFROM (SELECT sales.g, sales.x, sales.y, avg(sales.x) OVER (PARTITION BY sales.g) AS win1\nFROM sales) AS anon_1\nWHERE anon_1.x > anon_1.win1"
    );
    assert_eq!(tbl.group_names(), ["g".to_string()]);
    Ok(())
}

#[test]
fn test_cumulative_window_uses_arrange_order() -> Result<()> {
    let out = LazyTbl::new(source(Dialect::Duckdb), "sales")?
        .group_by(&[parse("_.g")?], &[], false)?
        .arrange(&[parse("_.x")?])?
        .mutate(&[kw("c", "_.y.cumsum()")?])?;
    assert_eq!(
        out.show_query(),
        "SELECT sales.g, sales.x, sales.y, sum(sales.y) OVER (PARTITION BY sales.g ORDER BY sales.x ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW) AS c\nFROM sales\nORDER BY sales.x"
    );
    Ok(())
}

#[test]
fn test_verbs_leave_input_untouched() -> Result<()> {
    let base = LazyTbl::new(source(Dialect::Duckdb), "sales")?;
    let before = base.show_query();
    let _ = base.mutate(&[kw("z", "_.x + _.y")?])?.head(3)?;
    let _ = base.filter(&[parse("_.x > 0")?])?;
    assert_eq!(base.show_query(), before);
    assert_eq!(base.n_ops(), 1);
    Ok(())
}

#[test]
fn test_summarize_then_filter_nests() -> Result<()> {
    let out = LazyTbl::new(source(Dialect::Duckdb), "sales")?
        .group_by(&[parse("_.g")?], &[], false)?
        .summarize(&[kw("total", "_.x.sum()")?])?
        .filter(&[parse("_.total > 10")?])?;
    assert_eq!(
        out.show_query(),
        "SELECT anon_1.g, anon_1.total\nFROM (SELECT sales.g, sum(sales.x) AS total\nFROM sales\nGROUP BY sales.g) AS anon_1\nWHERE anon_1.total > 10"
    );
    assert!(out.group_names().is_empty());
    Ok(())
}

#[test]
fn test_collect_materialises_rows() -> Result<()> {
    let src = source(Dialect::Duckdb);
    src.push_result(QueryResult::new(
        vec!["g".into(), "total".into()],
        vec![
            vec![Value::from("a"), Value::Int(3)],
            vec![Value::from("b"), Value::Int(3)],
        ],
    ));
    let tbl = LazyTbl::new(src.clone(), "sales")?
        .group_by(&[parse("_.g")?], &[], false)?
        .summarize(&[kw("total", "_.x.sum()")?])?;
    let frame = tbl.collect()?;
    assert_eq!(frame.nrows(), 2);
    assert_eq!(frame.column_names(), ["g".to_string(), "total".to_string()]);
    assert_eq!(src.queries(), vec![tbl.show_query()]);
    Ok(())
}

#[test]
fn test_join_across_dialects_is_rejected() -> Result<()> {
    let duck = LazyTbl::new(source(Dialect::Duckdb), "sales")?;
    let pg = LazyTbl::new(source(Dialect::Postgresql), "sales")?;
    match duck.inner_join(&pg, None).unwrap_err() {
        SqlError::Shape { verb, arg, .. } => {
            assert_eq!(verb, "inner_join");
            assert_eq!(arg, "right");
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn test_display_shows_groups_and_query() -> Result<()> {
    let tbl = LazyTbl::new(source(Dialect::Sqlite), "t")?.group_by(&[parse("_.x")?], &[], false)?;
    let shown = tbl.to_string();
    assert!(shown.starts_with("# Source: lazy query [sqlite]\n# Groups: x\n"));
    assert!(shown.ends_with("SELECT t.x\nFROM t"));
    Ok(())
}
