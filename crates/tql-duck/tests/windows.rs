use anyhow::Result;
use std::sync::Arc;
use tql_ast::parse;
use tql_duck::DuckSource;
use tql_frame::{values, Frame};
use tql_sql::LazyTbl;

fn lazy(frame: &Frame) -> Result<LazyTbl> {
    let source = DuckSource::open_in_memory()?;
    source.load_frame("t", frame)?;
    Ok(LazyTbl::new(Arc::new(source), "t")?)
}

fn data() -> Result<Frame> {
    Ok(Frame::new([
        ("g", values(["a", "b", "a", "b", "a"])),
        ("x", values([1, 2, 3, 5, 8])),
    ])?)
}

#[test]
fn test_window_filter_matches_memory() -> Result<()> {
    let frame = data()?;
    let cond = parse("_.x > _.x.mean()")?;

    let expected = frame.filter(&[cond.clone()])?;
    let tbl = lazy(&frame)?.filter(&[cond])?;
    assert!(tbl.show_query().contains("FROM (SELECT"));
    let got = tbl.arrange(&[parse("_.x")?])?.collect()?;

    assert_eq!(got, expected);
    assert_eq!(got.column("x").unwrap(), values([5, 8]).as_slice());
    Ok(())
}

#[test]
fn test_grouped_window_filter_matches_memory() -> Result<()> {
    let frame = data()?;
    let cond = parse("_.x > _.x.mean()")?;
    let by = parse("_.g")?;

    let expected = frame.group_by(&[by.clone()], &[])?.filter(&[cond.clone()])?.ungroup();
    let got = lazy(&frame)?
        .group_by(&[by], &[], false)?
        .filter(&[cond])?
        .arrange(&[parse("_.x")?])?
        .collect()?;

    assert_eq!(got, expected);
    assert_eq!(got.column("g").unwrap(), values(["b", "a"]).as_slice());
    Ok(())
}

#[test]
fn test_grouped_summarize() -> Result<()> {
    let frame = Frame::new([("g", values(["a", "a", "b"])), ("x", values([1, 2, 3]))])?;
    let total = (String::from("total"), parse("_.x.sum()")?);
    let by = parse("_.g")?;

    let expected = Frame::new([("g", values(["a", "b"])), ("total", values([3, 3]))])?;
    let in_memory = frame.group_by(&[by.clone()], &[])?.summarize(&[total.clone()])?;
    assert_eq!(in_memory, expected);

    let got = lazy(&frame)?
        .group_by(&[by], &[], false)?
        .summarize(&[total])?
        .arrange(&[parse("_.g")?])?
        .collect()?;
    assert_eq!(got, expected);
    Ok(())
}

#[test]
fn test_rank_filter() -> Result<()> {
    let frame = Frame::new([("x", values([3, 1, 2]))])?;
    let cond = parse("_.x.rank() <= 1")?;

    let tbl = lazy(&frame)?.filter(&[cond.clone()])?;
    assert!(tbl.show_query().contains(") AS anon_1\nWHERE"));
    let expected = Frame::new([("x", values([1]))])?;
    assert_eq!(tbl.collect()?, expected);
    assert_eq!(frame.filter(&[cond])?, expected);
    Ok(())
}
