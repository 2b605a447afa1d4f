use anyhow::Result;
use std::sync::Arc;
use tql_ast::parse;
use tql_duck::DuckSource;
use tql_frame::{values, Frame};
use tql_ir::Node;
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
        ("y", values([4, 1, 6, 2, 0])),
    ])?)
}

fn kw(name: &str, source: &str) -> Result<(String, Node)> {
    Ok((name.to_string(), parse(source)?))
}

fn by_x() -> Result<Vec<Node>> {
    Ok(vec![parse("_.x")?])
}

#[test]
fn test_across_matches_memory() -> Result<()> {
    let frame = data()?;
    let by = parse("_.g")?;
    let span = kw("", "across(['x', 'y'], {'lo': Fx.min(), 'hi': Fx.max()})")?;

    let expected = frame.group_by(&[by.clone()], &[])?.summarize(&[span.clone()])?;
    assert_eq!(expected.column_names(), ["g", "x_lo", "x_hi", "y_lo", "y_hi"].map(String::from));
    assert_eq!(expected.column("y_lo").unwrap(), values([0, 1]).as_slice());

    let got = lazy(&frame)?
        .group_by(&[by], &[], false)?
        .summarize(&[span])?
        .arrange(&[parse("_.g")?])?
        .collect()?;
    assert_eq!(got, expected);

    let scaled = kw("", "across(_.startswith('x'), Fx * 10, names = '{col}_big')")?;
    let expected = frame.mutate(&[scaled.clone()])?;
    assert_eq!(expected.column("x_big").unwrap(), values([10, 20, 30, 50, 80]).as_slice());
    let got = lazy(&frame)?.mutate(&[scaled])?.arrange(&by_x()?)?.collect()?;
    assert_eq!(got, expected);
    Ok(())
}

#[test]
fn test_if_any_and_if_all_match_memory() -> Result<()> {
    let frame = data()?;
    for source in ["if_any(['x', 'y'], Fx > 4)", "if_all(['x', 'y'], Fx > 1)", "across(['x', 'y'], Fx < 7)"] {
        let cond = parse(source)?;
        let expected = frame.filter(&[cond.clone()])?;
        let got = lazy(&frame)?.filter(&[cond])?.arrange(&by_x()?)?.collect()?;
        assert_eq!(got, expected, "{}", source);
    }
    let any = frame.filter(&[parse("if_any(['x', 'y'], Fx > 4)")?])?;
    assert_eq!(any.column("x").unwrap(), values([3, 5, 8]).as_slice());
    Ok(())
}

#[test]
fn test_weighted_counts_match_memory() -> Result<()> {
    let frame = data()?;
    let g = [parse("_.g")?];
    let wt = parse("_.x * 2")?;

    let expected = frame.count(&g, &[], Some(&wt), false, None)?;
    assert_eq!(expected.column("n").unwrap(), values([24, 14]).as_slice());
    let got = lazy(&frame)?
        .count(&g, &[], Some(&wt), false, None)?
        .arrange(&[parse("_.g")?])?
        .collect()?;
    assert_eq!(got, expected);

    let expected = frame.add_count(&g, &[], None, false, Some("tally"))?;
    assert_eq!(expected.column("tally").unwrap(), values([3, 2, 3, 2, 3]).as_slice());
    let tbl = lazy(&frame)?.add_count(&g, &[], None, false, Some("tally"))?;
    assert!(tbl.show_query().contains("OVER (PARTITION BY t.g) AS tally"));
    assert_eq!(tbl.arrange(&by_x()?)?.collect()?, expected);
    Ok(())
}

#[test]
fn test_top_n_matches_memory() -> Result<()> {
    let frame = data()?;
    let y = parse("_.y")?;
    let by = parse("_.g")?;

    let expected = frame.top_n(2, Some(&y))?;
    assert_eq!(expected.column("y").unwrap(), values([4, 6]).as_slice());
    let got = lazy(&frame)?.top_n(2, Some(&y))?.arrange(&by_x()?)?.collect()?;
    assert_eq!(got, expected);

    let expected = frame.group_by(&[by.clone()], &[])?.top_n(-1, None)?.ungroup();
    let got = lazy(&frame)?
        .group_by(&[by], &[], false)?
        .top_n(-1, None)?
        .ungroup()
        .arrange(&by_x()?)?
        .collect()?;
    assert_eq!(got, expected);
    assert_eq!(got.column("y").unwrap(), values([1, 0]).as_slice());
    Ok(())
}

#[test]
fn test_sql_raw_is_placed_as_written() -> Result<()> {
    let frame = data()?;
    let raw = kw("z", "sql_raw('x + y')")?;

    let tbl = lazy(&frame)?.mutate(&[raw.clone()])?;
    assert!(tbl.show_query().contains("x + y AS z"));
    let got = tbl.arrange(&by_x()?)?.collect()?;
    assert_eq!(got.column("z").unwrap(), values([5, 3, 9, 7, 8]).as_slice());

    assert!(frame.mutate(&[raw]).is_err());
    Ok(())
}

#[test]
fn test_conditionals_match_memory() -> Result<()> {
    let frame = data()?;
    let exprs = [
        kw("size", "case_when(_, {_.x > 4: 'big', _.x > 1: 'mid', True: 'small'})")?,
        kw("odd", "if_else(_.x % 2 == 1, 'yes', 'no')")?,
    ];

    let expected = frame.mutate(&exprs)?;
    assert_eq!(
        expected.column("size").unwrap(),
        values(["small", "mid", "mid", "big", "big"]).as_slice()
    );
    let tbl = lazy(&frame)?.mutate(&exprs)?;
    assert!(tbl.show_query().contains("CASE WHEN"));
    assert_eq!(tbl.arrange(&by_x()?)?.collect()?, expected);
    Ok(())
}
