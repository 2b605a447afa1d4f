//! Grouped verbs act on each group separately: `group_by(g) >> verb >>
//! ungroup()` matches the verb run on every group's rows, up to row order.

use anyhow::Result;
use std::cmp::Ordering;
use std::sync::Arc;
use tql_ast::parse;
use tql_duck::DuckSource;
use tql_frame::{values, Frame, GroupedFrame};
use tql_ir::{Node, Value};
use tql_sql::{LazyTbl, SqlSource};

enum Call {
    Mutate(Vec<(String, Node)>),
    Transmute(Vec<(String, Node)>),
    Filter(Vec<Node>),
    Summarize(Vec<(String, Node)>),
    Arrange(Vec<Node>),
    Select(Vec<Node>),
    Rename(Vec<(String, Node)>),
    Distinct(Vec<Node>),
    Count(Vec<Node>),
    AddCount(Vec<Node>),
    TopN(i64),
}

impl Call {
    fn frame(&self, f: &Frame) -> Result<Frame> {
        Ok(match self {
            Call::Mutate(e) => f.mutate(e)?,
            Call::Transmute(e) => f.transmute(e)?,
            Call::Filter(c) => f.filter(c)?,
            Call::Summarize(e) => f.summarize(e)?,
            Call::Arrange(e) => f.arrange(e)?,
            Call::Select(s) => f.select(s)?,
            Call::Rename(p) => f.rename(p)?,
            Call::Distinct(a) => f.distinct(a, &[], false)?,
            Call::Count(a) => f.count(a, &[], None, false, None)?,
            Call::AddCount(a) => f.add_count(a, &[], None, false, None)?,
            Call::TopN(n) => f.top_n(*n, None)?,
        })
    }

    fn grouped(&self, g: &GroupedFrame) -> Result<Frame> {
        Ok(match self {
            Call::Mutate(e) => g.mutate(e)?.ungroup(),
            Call::Transmute(e) => g.transmute(e)?.ungroup(),
            Call::Filter(c) => g.filter(c)?.ungroup(),
            Call::Summarize(e) => g.summarize(e)?,
            Call::Arrange(e) => g.arrange(e)?.ungroup(),
            Call::Select(s) => g.select(s)?.ungroup(),
            Call::Rename(p) => g.rename(p)?.ungroup(),
            Call::Distinct(a) => g.distinct(a, &[], false)?.ungroup(),
            Call::Count(a) => g.count(a, &[], None, false, None)?.ungroup(),
            Call::AddCount(a) => g.add_count(a, &[], None, false, None)?.ungroup(),
            Call::TopN(n) => g.top_n(*n, None)?.ungroup(),
        })
    }

    fn lazy(&self, t: &LazyTbl) -> Result<LazyTbl> {
        Ok(match self {
            Call::Mutate(e) => t.mutate(e)?,
            Call::Transmute(e) => t.transmute(e)?,
            Call::Filter(c) => t.filter(c)?,
            Call::Summarize(e) => t.summarize(e)?,
            Call::Arrange(e) => t.arrange(e)?,
            Call::Select(s) => t.select(s)?,
            Call::Rename(p) => t.rename(p)?,
            Call::Distinct(a) => t.distinct(a, &[], false)?,
            Call::Count(a) => t.count(a, &[], None, false, None)?,
            Call::AddCount(a) => t.add_count(a, &[], None, false, None)?,
            Call::TopN(n) => t.top_n(*n, None)?,
        })
    }
}

fn kw(name: &str, source: &str) -> Result<(String, Node)> {
    Ok((name.to_string(), parse(source)?))
}

fn nodes(sources: &[&str]) -> Result<Vec<Node>> {
    sources.iter().map(|s| Ok(parse(s)?)).collect()
}

fn calls() -> Result<Vec<(&'static str, Call)>> {
    Ok(vec![
        ("mutate", Call::Mutate(vec![kw("d", "_.x - _.x.min()")?, kw("s", "_.d + _.y.sum()")?])),
        ("mutate_rank", Call::Mutate(vec![kw("r", "_.x.rank()")?])),
        ("transmute", Call::Transmute(vec![kw("z", "_.x * 2 - _.x.max()")?])),
        ("filter", Call::Filter(nodes(&["_.x > _.x.min()"])?)),
        ("filter_rank", Call::Filter(nodes(&["_.x.rank() <= 1", "_.y > 0"])?)),
        ("summarize", Call::Summarize(vec![kw("total", "_.x.sum()")?, kw("top", "_.y.max()")?])),
        ("arrange", Call::Arrange(nodes(&["-_.x"])?)),
        ("select", Call::Select(nodes(&["_.x"])?)),
        ("rename", Call::Rename(vec![kw("w", "_.x")?])),
        ("distinct", Call::Distinct(nodes(&["_.y"])?)),
        ("count", Call::Count(nodes(&["_.y"])?)),
        ("add_count", Call::AddCount(nodes(&["_.y"])?)),
        ("top_n", Call::TopN(1)),
    ])
}

fn data() -> Result<Frame> {
    Ok(Frame::new([
        ("g", values(["a", "b", "a", "b", "a", "c"])),
        ("x", values([1, 2, 3, 5, 8, 4])),
        ("y", values([1, 1, 2, 1, 2, 3])),
    ])?)
}

fn by() -> Result<Node> {
    Ok(parse("_.g")?)
}

fn sorted(frame: &Frame) -> Result<Frame> {
    let mut rows: Vec<Vec<Value>> = (0..frame.nrows()).map(|i| frame.row(i)).collect();
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.total_cmp(y))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    Ok(Frame::from_rows(frame.column_names().to_vec(), rows)?)
}

/// Per-group results stacked under `names`, with the group key filled in
/// where a result dropped it.
fn stack(parts: &[(Value, Frame)], names: &[String]) -> Result<Frame> {
    let mut rows = Vec::new();
    for (key, part) in parts {
        for i in 0..part.nrows() {
            let row = names
                .iter()
                .map(|n| match part.column(n) {
                    Some(column) => Ok(column[i].clone()),
                    None if n == "g" => Ok(key.clone()),
                    None => Err(anyhow::anyhow!("missing column {}", n)),
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }
    }
    sorted(&Frame::from_rows(names.to_vec(), rows)?)
}

fn groups(frame: &Frame) -> Result<Vec<(Value, Frame)>> {
    let grouped = frame.group_by(&[by()?], &[])?;
    Ok((0..grouped.n_groups())
        .map(|i| {
            let part = grouped.group_frame(i);
            (part.row(0)[0].clone(), part)
        })
        .collect())
}

#[test]
fn test_grouped_frame_verbs_act_per_group() -> Result<()> {
    let frame = data()?;
    let grouped = frame.group_by(&[by()?], &[])?;
    for (name, call) in calls()? {
        let got = sorted(&call.grouped(&grouped)?)?;
        let parts = groups(&frame)?
            .into_iter()
            .map(|(key, part)| Ok((key, call.frame(&part)?)))
            .collect::<Result<Vec<_>>>()?;
        let expected = stack(&parts, got.column_names())?;
        assert_eq!(got, expected, "{}", name);
    }
    Ok(())
}

#[test]
fn test_grouped_lazy_verbs_act_per_group() -> Result<()> {
    let frame = data()?;
    let duck = Arc::new(DuckSource::open_in_memory()?);
    duck.load_frame("t", &frame)?;
    let parts = groups(&frame)?;
    for (i, (_, part)) in parts.iter().enumerate() {
        duck.load_frame(&format!("part_{}", i), part)?;
    }
    let source: Arc<dyn SqlSource> = duck;
    let grouped = LazyTbl::new(source.clone(), "t")?.group_by(&[by()?], &[], false)?;

    for (name, call) in calls()? {
        let got = sorted(&call.lazy(&grouped)?.ungroup().collect()?)?;
        let results = parts
            .iter()
            .enumerate()
            .map(|(i, (key, _))| {
                let tbl = LazyTbl::new(source.clone(), &format!("part_{}", i))?;
                Ok((key.clone(), call.lazy(&tbl)?.collect()?))
            })
            .collect::<Result<Vec<_>>>()?;
        let expected = stack(&results, got.column_names())?;
        assert_eq!(got, expected, "{}", name);
    }
    Ok(())
}

#[test]
fn test_backends_agree_on_grouped_verbs() -> Result<()> {
    let frame = data()?;
    let source = DuckSource::open_in_memory()?;
    source.load_frame("t", &frame)?;
    let lazy = LazyTbl::new(Arc::new(source), "t")?.group_by(&[by()?], &[], false)?;
    let grouped = frame.group_by(&[by()?], &[])?;

    for (name, call) in calls()? {
        if name.ends_with("rank") {
            continue;
        }
        let in_memory = sorted(&call.grouped(&grouped)?)?;
        let in_duck = sorted(&call.lazy(&lazy)?.ungroup().collect()?)?;
        assert_eq!(in_duck, in_memory, "{}", name);
    }
    Ok(())
}
