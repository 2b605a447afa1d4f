//! Table verbs over frames and grouped frames

use crate::datum::Datum;
use crate::eval::FrameEvaluator;
use crate::frame::{Frame, GroupedFrame, Grouping, RowKey};
use crate::functions::frame_funcs;
use crate::{warn_on_fallback, FrameError};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tql_ir::across::{expand_conditions, expand_named};
use tql_ir::{binary_value, sym, var_select, BinaryOperator, Node, Selection, UnaryOperator, Value};
use tql_registry::vector::{min_rank, n};
use tql_registry::{CallTreeLocal, FuncTable, RegistryError};
use tracing::{debug, warn};

/// Sort expression and direction: `-x` and `desc(x)` sort descending.
pub fn sort_key(node: &Node) -> (&Node, bool) {
    match node {
        Node::Unary {
            op: UnaryOperator::Neg,
            operand,
        } => (operand.as_ref(), true),
        Node::Call { func, args, .. } if args.len() == 1 && matches!(func.as_ref(), Node::FuncArg { func } if func.name() == "desc") => {
            (&args[0], true)
        }
        _ => (node, false),
    }
}

pub fn is_desc(node: &Node) -> bool {
    sort_key(node).1
}

fn compile(node: &Node, table: &FuncTable) -> Result<Node, FrameError> {
    Ok(CallTreeLocal::with_accessors(table).rewrite(node)?)
}

#[derive(Clone, Copy)]
enum Input<'a> {
    Plain(&'a Frame),
    Grouped(&'a GroupedFrame),
}

impl<'a> Input<'a> {
    fn frame(&self) -> &'a Frame {
        match self {
            Input::Plain(f) => f,
            Input::Grouped(g) => g.frame(),
        }
    }

    fn group_names(&self) -> &'a [String] {
        match self {
            Input::Plain(_) => &[],
            Input::Grouped(g) => g.group_names(),
        }
    }

    /// Evaluate `node` with functions from `table`. Grouped data takes the
    /// fast path first and splits per group when that is unavailable.
    fn evaluate(&self, node: &Node, table: &FuncTable, verb: &str, arg: &str) -> Result<Datum, FrameError> {
        let compiled = compile(node, table);
        match self {
            Input::Plain(f) => compiled?.eval(&FrameEvaluator, &Datum::Frame(Arc::new((*f).clone()))),
            Input::Grouped(g) => {
                let fast = compiled.and_then(|n| n.eval(&FrameEvaluator, &Datum::Grouped(Arc::new((*g).clone()))));
                match fast {
                    Err(e) if falls_back(&e) => {
                        if warn_on_fallback() {
                            warn!(verb = %verb, arg = %arg, expr = %node, reason = %e, "No grouped fast path; applying per group");
                        }
                        split_apply(g, node, table)
                    }
                    other => other,
                }
            }
        }
    }
}

fn falls_back(e: &FrameError) -> bool {
    matches!(
        e,
        FrameError::NoFastPath(_) | FrameError::Registry(RegistryError::FunctionLookup { .. })
    )
}

/// Evaluate `node` on each group's rows separately.
fn split_apply(g: &GroupedFrame, node: &Node, table: &FuncTable) -> Result<Datum, FrameError> {
    let compiled = compile(node, table)?;
    let grouping = g.grouping().clone();
    let parts = (0..grouping.n_groups())
        .map(|i| compiled.eval(&FrameEvaluator, &Datum::Frame(Arc::new(g.group_frame(i)))))
        .collect::<Result<Vec<_>, FrameError>>()?;

    if parts.iter().all(|d| matches!(d, Datum::Scalar(_))) {
        let values = parts
            .into_iter()
            .filter_map(|d| match d {
                Datum::Scalar(v) => Some(v),
                _ => None,
            })
            .collect();
        return Ok(Datum::GroupAgg { values, grouping });
    }

    let mut values = vec![Value::Null; grouping.nrows()];
    for (i, part) in parts.into_iter().enumerate() {
        let rows = grouping.rows(i);
        for (&r, v) in rows.iter().zip(part.into_column(rows.len())?) {
            values[r] = v;
        }
    }
    Ok(Datum::GroupedSeries { values, grouping })
}

/// Columns `across` ranges over; grouping columns are left out.
fn across_columns(input: Input) -> Vec<String> {
    let groups = input.group_names();
    input
        .frame()
        .column_names()
        .iter()
        .filter(|c| !groups.contains(c))
        .cloned()
        .collect()
}

fn mutate_frame(input: Input, exprs: &[(String, Node)], verb: &str) -> Result<Frame, FrameError> {
    let exprs = &expand_named(exprs, &across_columns(input))?;
    let funcs = frame_funcs()?;
    let groups = input.group_names().to_vec();
    let mut grouped = match input {
        Input::Grouped(g) => Some(g.clone()),
        Input::Plain(_) => None,
    };
    let mut frame = input.frame().clone();

    for (name, node) in exprs {
        let datum = match &grouped {
            Some(g) => Input::Grouped(g).evaluate(node, funcs.window_context(), verb, name)?,
            None => Input::Plain(&frame).evaluate(node, funcs.window_context(), verb, name)?,
        };
        frame = frame.with_column(name, datum.into_column(frame.nrows())?)?;
        grouped = match grouped.take() {
            Some(g) if groups.contains(name) => Some(g.regroup(frame.clone())?),
            Some(g) => Some(g.with_frame(frame.clone())),
            None => None,
        };
    }
    debug!(verb = %verb, columns = exprs.len(), "Mutated frame");
    Ok(frame)
}

fn transmute_frame(input: Input, exprs: &[(String, Node)]) -> Result<Frame, FrameError> {
    let exprs = &expand_named(exprs, &across_columns(input))?;
    let frame = mutate_frame(input, exprs, "transmute")?;
    let mut keep: Vec<String> = input
        .group_names()
        .iter()
        .filter(|g| !exprs.iter().any(|(n, _)| n == *g))
        .cloned()
        .collect();
    for (name, _) in exprs {
        if !keep.contains(name) {
            keep.push(name.clone());
        }
    }
    frame.select_columns(&keep)
}

fn filter_frame(input: Input, conds: &[Node]) -> Result<Frame, FrameError> {
    let conds = &expand_conditions(conds, &across_columns(input))?;
    let funcs = frame_funcs()?;
    let frame = input.frame();
    let mut mask = vec![true; frame.nrows()];
    for (i, cond) in conds.iter().enumerate() {
        let column = input
            .evaluate(cond, funcs.window_context(), "filter", &i.to_string())?
            .into_column(frame.nrows())?;
        for (keep, v) in mask.iter_mut().zip(column) {
            *keep = *keep && !v.is_null() && v.truthy();
        }
    }
    Ok(frame.filter_mask(&mask))
}

/// Results of one summarize call cannot read each other.
fn check_summary_refs(exprs: &[(String, Node)]) -> Result<(), FrameError> {
    for (i, (name, node)) in exprs.iter().enumerate() {
        let vars = node.op_vars(false);
        let earlier: Vec<&str> = exprs[..i]
            .iter()
            .map(|(n, _)| n.as_str())
            .filter(|n| vars.contains(*n))
            .collect();
        if !earlier.is_empty() {
            return Err(FrameError::shape(
                "summarize",
                name.clone(),
                format!("refers to columns created earlier in the same call: {}", earlier.join(", ")),
            ));
        }
    }
    Ok(())
}

fn summarize_frame(input: Input, exprs: &[(String, Node)]) -> Result<Frame, FrameError> {
    let exprs = &expand_named(exprs, &across_columns(input))?;
    check_summary_refs(exprs)?;
    let funcs = frame_funcs()?;
    let shape = |name: &str, d: &Datum| {
        FrameError::shape(
            "summarize",
            name,
            format!("must return a single value per group, got a {}", d.kind()),
        )
    };

    let mut columns: Vec<(String, Vec<Value>)> = Vec::new();
    let n_out = match input {
        Input::Plain(_) => 1,
        Input::Grouped(g) => {
            let grouping = g.grouping();
            for (i, name) in g.group_names().iter().enumerate() {
                let keys = (0..grouping.n_groups()).map(|k| grouping.key(k).0[i].clone()).collect();
                columns.push((name.clone(), keys));
            }
            grouping.n_groups()
        }
    };

    for (name, node) in exprs {
        let datum = input.evaluate(node, funcs.aggregate_context(), "summarize", name)?;
        let values = match datum {
            Datum::Scalar(v) => vec![v; n_out],
            Datum::GroupAgg { values, .. } => values,
            Datum::Series(mut v) if v.len() == 1 && n_out == 1 => vec![v.remove(0)],
            other => return Err(shape(name, &other)),
        };
        match columns.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = values,
            None => columns.push((name.clone(), values)),
        }
    }
    Frame::new(columns)
}

fn compare_rows(keys: &[(Vec<Value>, bool)], a: usize, b: usize) -> Ordering {
    for (column, desc) in keys {
        let (x, y) = (&column[a], &column[b]);
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if *desc => y.total_cmp(x),
            (false, false) => x.total_cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn arrange_frame(input: Input, exprs: &[Node]) -> Result<Frame, FrameError> {
    let funcs = frame_funcs()?;
    let frame = input.frame();
    let keys = exprs
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let (inner, desc) = sort_key(node);
            let column = Input::Plain(frame)
                .evaluate(inner, funcs.window_context(), "arrange", &i.to_string())?
                .into_column(frame.nrows())?;
            Ok((column, desc))
        })
        .collect::<Result<Vec<_>, FrameError>>()?;

    let mut rows: Vec<usize> = (0..frame.nrows()).collect();
    rows.sort_by(|&a, &b| compare_rows(&keys, a, b));
    Ok(frame.take(&rows))
}

/// Selection with any missing group columns added in front.
fn select_with_groups(input: Input, selectors: &[Node]) -> Result<Selection, FrameError> {
    let frame = input.frame();
    let mut selection = var_select(frame.column_names(), selectors)?;
    let missing: Vec<String> = input
        .group_names()
        .iter()
        .filter(|g| !selection.iter().any(|(c, _)| c == *g))
        .cloned()
        .collect();
    if !missing.is_empty() {
        warn!(columns = ?missing, "Adding missing grouping variables");
        let mut with_groups: Selection = missing.into_iter().map(|g| (g, None)).collect();
        with_groups.append(&mut selection);
        selection = with_groups;
    }
    Ok(selection)
}

fn renamed_groups(groups: &[String], selection: &Selection) -> Vec<String> {
    groups
        .iter()
        .map(|g| {
            selection
                .iter()
                .find(|(old, _)| old == g)
                .and_then(|(_, new)| new.clone())
                .unwrap_or_else(|| g.clone())
        })
        .collect()
}

fn rename_selection(frame: &Frame, pairs: &[(String, Node)]) -> Result<Selection, FrameError> {
    let mut selection: Selection = frame.column_names().iter().map(|c| (c.clone(), None)).collect();
    for (new, node) in pairs {
        let old = node.simple_name().ok_or_else(|| {
            FrameError::shape("rename", new.clone(), format!("must name an existing column, got {}", node))
        })?;
        let entry = selection
            .iter_mut()
            .find(|(c, _)| c == old)
            .ok_or_else(|| FrameError::UnknownColumn(old.to_string()))?;
        entry.1 = Some(new.clone());
    }
    Ok(selection)
}

/// Column names for positional arguments, adding computed ones to the
/// frame under their printed form.
fn named_args(input: Input, args: &[Node], kwargs: &[(String, Node)], verb: &str) -> Result<(Frame, Vec<String>), FrameError> {
    let mut exprs: Vec<(String, Node)> = Vec::new();
    let mut names = Vec::new();
    for arg in args {
        match arg.simple_name() {
            Some(name) => names.push(name.to_string()),
            None => {
                let name = arg.to_string();
                exprs.push((name.clone(), arg.clone()));
                names.push(name);
            }
        }
    }
    for (name, node) in kwargs {
        exprs.push((name.clone(), node.clone()));
        names.push(name.clone());
    }
    let frame = if exprs.is_empty() {
        input.frame().clone()
    } else {
        mutate_frame(input, &exprs, verb)?
    };
    Ok((frame, names))
}

fn union_names(first: &[String], rest: &[String]) -> Vec<String> {
    let mut out: Vec<String> = first.to_vec();
    for name in rest {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    out
}

fn distinct_frame(input: Input, args: &[Node], kwargs: &[(String, Node)], keep_all: bool) -> Result<Frame, FrameError> {
    let (frame, names) = named_args(input, args, kwargs, "distinct")?;
    let keys = if names.is_empty() {
        frame.column_names().to_vec()
    } else {
        union_names(input.group_names(), &names)
    };

    let mut seen: BTreeSet<RowKey> = BTreeSet::new();
    let mut rows = Vec::new();
    for row in 0..frame.nrows() {
        if seen.insert(frame.row_key(&keys, row)?) {
            rows.push(row);
        }
    }
    let unique = frame.take(&rows);
    if keep_all {
        Ok(unique)
    } else {
        unique.select_columns(&keys)
    }
}

/// Tally column name: `name`, or `n` lengthened with more `n`s until it
/// clashes with none of `taken`.
pub fn count_name(taken: &[String], name: Option<&str>) -> String {
    if let Some(name) = name {
        return name.to_string();
    }
    let mut out = "n".to_string();
    while taken.contains(&out) {
        out.push('n');
    }
    out
}

/// Sum of the non-null values, null when there are none.
fn weighted_sum<'a>(values: impl Iterator<Item = &'a Value>) -> Result<Value, FrameError> {
    let mut total: Option<Value> = None;
    for v in values.filter(|v| !v.is_null()) {
        total = Some(match total {
            Some(t) => binary_value(BinaryOperator::Add, &t, v)?,
            None => v.clone(),
        });
    }
    Ok(total.unwrap_or(Value::Null))
}

fn count_frame(
    input: Input,
    args: &[Node],
    kwargs: &[(String, Node)],
    wt: Option<&Node>,
    sort: bool,
    name: Option<&str>,
) -> Result<Frame, FrameError> {
    let (frame, names) = named_args(input, args, kwargs, "count")?;
    let keys = union_names(input.group_names(), &names);
    let n_name = count_name(&keys, name);
    let n_name = n_name.as_str();
    let weights = match wt {
        Some(node) => {
            let funcs = frame_funcs()?;
            let column = Input::Plain(&frame)
                .evaluate(node, funcs.window_context(), "count", "wt")?
                .into_column(frame.nrows())?;
            Some(column)
        }
        None => None,
    };
    let tally = |rows: &[usize]| -> Result<Value, FrameError> {
        match &weights {
            Some(w) => weighted_sum(rows.iter().map(|&r| &w[r])),
            None => Ok(Value::Int(rows.len() as i64)),
        }
    };

    let grouping = Grouping::new(&frame, &keys)?;
    let mut columns: Vec<(String, Vec<Value>)> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.clone(), (0..grouping.n_groups()).map(|g| grouping.key(g).0[i].clone()).collect()))
        .collect();
    let counts: Vec<Value> = if keys.is_empty() {
        let all: Vec<usize> = (0..frame.nrows()).collect();
        vec![tally(&all)?]
    } else {
        (0..grouping.n_groups())
            .map(|g| tally(grouping.rows(g)))
            .collect::<Result<_, _>>()?
    };
    columns.push((n_name.to_string(), counts));
    let out = Frame::new(columns)?;

    if sort {
        return sort_desc(&out, n_name);
    }
    Ok(out)
}

fn sort_desc(frame: &Frame, column: &str) -> Result<Frame, FrameError> {
    let keys = vec![(frame.get(column)?.to_vec(), true)];
    let mut rows: Vec<usize> = (0..frame.nrows()).collect();
    rows.sort_by(|&a, &b| compare_rows(&keys, a, b));
    Ok(frame.take(&rows))
}

/// Every row kept, with the size (or `wt` total) of its group added.
fn add_count_frame(
    input: Input,
    args: &[Node],
    kwargs: &[(String, Node)],
    wt: Option<&Node>,
    sort: bool,
    name: Option<&str>,
) -> Result<Frame, FrameError> {
    let (frame, names) = named_args(input, args, kwargs, "add_count")?;
    let keys = union_names(input.group_names(), &names);
    let n_name = count_name(frame.column_names(), name);
    let tally = match wt {
        Some(w) => Node::method(w.clone(), "sum", Vec::new()),
        None => n(sym()).into_node(),
    };
    let exprs = [(n_name.clone(), tally)];
    let counted = if keys.is_empty() {
        mutate_frame(Input::Plain(&frame), &exprs, "add_count")?
    } else {
        let by_keys = GroupedFrame::new(frame, keys)?;
        mutate_frame(Input::Grouped(&by_keys), &exprs, "add_count")?
    };
    if sort {
        return sort_desc(&counted, &n_name);
    }
    Ok(counted)
}

/// Rows ranked within the top `n` by `wt` (bottom `|n|` when negative).
/// Ties are all kept. `wt` defaults to the last column.
fn top_n_frame(input: Input, n: i64, wt: Option<&Node>) -> Result<Frame, FrameError> {
    let wt = match wt {
        Some(w) => w.clone(),
        None => input
            .frame()
            .column_names()
            .last()
            .map(Node::column)
            .ok_or_else(|| FrameError::shape("top_n", "wt", "needs a column to rank by"))?,
    };
    let cond = if n >= 0 {
        min_rank(Node::unary(UnaryOperator::Neg, wt)).le(n)
    } else {
        min_rank(wt).le(-n)
    };
    debug!(n, "Keeping top rows");
    filter_frame(input, &[cond.into_node()])
}

impl Frame {
    /// Add or replace columns; later expressions see earlier results.
    pub fn mutate(&self, exprs: &[(String, Node)]) -> Result<Frame, FrameError> {
        mutate_frame(Input::Plain(self), exprs, "mutate")
    }

    pub fn transmute(&self, exprs: &[(String, Node)]) -> Result<Frame, FrameError> {
        transmute_frame(Input::Plain(self), exprs)
    }

    /// Keep rows where every condition is true; nulls count as false.
    pub fn filter(&self, conds: &[Node]) -> Result<Frame, FrameError> {
        filter_frame(Input::Plain(self), conds)
    }

    pub fn summarize(&self, exprs: &[(String, Node)]) -> Result<Frame, FrameError> {
        summarize_frame(Input::Plain(self), exprs)
    }

    /// Stable sort; nulls last in either direction.
    pub fn arrange(&self, exprs: &[Node]) -> Result<Frame, FrameError> {
        arrange_frame(Input::Plain(self), exprs)
    }

    pub fn select(&self, selectors: &[Node]) -> Result<Frame, FrameError> {
        self.apply_selection(&select_with_groups(Input::Plain(self), selectors)?)
    }

    /// `(new, _.old)` pairs.
    pub fn rename(&self, pairs: &[(String, Node)]) -> Result<Frame, FrameError> {
        self.apply_selection(&rename_selection(self, pairs)?)
    }

    pub fn distinct(&self, args: &[Node], kwargs: &[(String, Node)], keep_all: bool) -> Result<Frame, FrameError> {
        distinct_frame(Input::Plain(self), args, kwargs, keep_all)
    }

    /// Rows (or the sum of `wt`) per combination of `args`.
    pub fn count(
        &self,
        args: &[Node],
        kwargs: &[(String, Node)],
        wt: Option<&Node>,
        sort: bool,
        name: Option<&str>,
    ) -> Result<Frame, FrameError> {
        count_frame(Input::Plain(self), args, kwargs, wt, sort, name)
    }

    pub fn add_count(
        &self,
        args: &[Node],
        kwargs: &[(String, Node)],
        wt: Option<&Node>,
        sort: bool,
        name: Option<&str>,
    ) -> Result<Frame, FrameError> {
        add_count_frame(Input::Plain(self), args, kwargs, wt, sort, name)
    }

    pub fn top_n(&self, n: i64, wt: Option<&Node>) -> Result<Frame, FrameError> {
        top_n_frame(Input::Plain(self), n, wt)
    }

    pub fn group_by(&self, args: &[Node], kwargs: &[(String, Node)]) -> Result<GroupedFrame, FrameError> {
        let (frame, names) = named_args(Input::Plain(self), args, kwargs, "group_by")?;
        for name in &names {
            frame.get(name)?;
        }
        GroupedFrame::new(frame, names)
    }
}

impl GroupedFrame {
    /// Keep the grouping, swap in a frame with the same rows and group columns.
    pub(crate) fn with_frame(&self, frame: Frame) -> GroupedFrame {
        GroupedFrame::from_parts(frame, self.group_names().to_vec(), self.grouping().clone())
    }

    pub fn mutate(&self, exprs: &[(String, Node)]) -> Result<GroupedFrame, FrameError> {
        self.regroup(mutate_frame(Input::Grouped(self), exprs, "mutate")?)
    }

    pub fn transmute(&self, exprs: &[(String, Node)]) -> Result<GroupedFrame, FrameError> {
        self.regroup(transmute_frame(Input::Grouped(self), exprs)?)
    }

    pub fn filter(&self, conds: &[Node]) -> Result<GroupedFrame, FrameError> {
        self.regroup(filter_frame(Input::Grouped(self), conds)?)
    }

    /// One row per group; the result is ungrouped.
    pub fn summarize(&self, exprs: &[(String, Node)]) -> Result<Frame, FrameError> {
        summarize_frame(Input::Grouped(self), exprs)
    }

    pub fn arrange(&self, exprs: &[Node]) -> Result<GroupedFrame, FrameError> {
        self.regroup(arrange_frame(Input::Grouped(self), exprs)?)
    }

    pub fn select(&self, selectors: &[Node]) -> Result<GroupedFrame, FrameError> {
        let selection = select_with_groups(Input::Grouped(self), selectors)?;
        let frame = self.frame().apply_selection(&selection)?;
        GroupedFrame::new(frame, renamed_groups(self.group_names(), &selection))
    }

    pub fn rename(&self, pairs: &[(String, Node)]) -> Result<GroupedFrame, FrameError> {
        let selection = rename_selection(self.frame(), pairs)?;
        let frame = self.frame().apply_selection(&selection)?;
        GroupedFrame::new(frame, renamed_groups(self.group_names(), &selection))
    }

    pub fn distinct(&self, args: &[Node], kwargs: &[(String, Node)], keep_all: bool) -> Result<GroupedFrame, FrameError> {
        self.regroup(distinct_frame(Input::Grouped(self), args, kwargs, keep_all)?)
    }

    pub fn count(
        &self,
        args: &[Node],
        kwargs: &[(String, Node)],
        wt: Option<&Node>,
        sort: bool,
        name: Option<&str>,
    ) -> Result<GroupedFrame, FrameError> {
        self.regroup(count_frame(Input::Grouped(self), args, kwargs, wt, sort, name)?)
    }

    pub fn add_count(
        &self,
        args: &[Node],
        kwargs: &[(String, Node)],
        wt: Option<&Node>,
        sort: bool,
        name: Option<&str>,
    ) -> Result<GroupedFrame, FrameError> {
        self.regroup(add_count_frame(Input::Grouped(self), args, kwargs, wt, sort, name)?)
    }

    /// `n` top rows per group.
    pub fn top_n(&self, n: i64, wt: Option<&Node>) -> Result<GroupedFrame, FrameError> {
        self.regroup(top_n_frame(Input::Grouped(self), n, wt)?)
    }

    /// First `n` rows of the whole frame.
    pub fn head(&self, n: usize) -> Result<GroupedFrame, FrameError> {
        self.regroup(self.frame().head(n))
    }

    /// Regroup, optionally keeping the current group columns in front.
    pub fn group_by(&self, args: &[Node], kwargs: &[(String, Node)], add: bool) -> Result<GroupedFrame, FrameError> {
        let (frame, names) = named_args(Input::Grouped(self), args, kwargs, "group_by")?;
        let names = if add { union_names(self.group_names(), &names) } else { names };
        for name in &names {
            frame.get(name)?;
        }
        GroupedFrame::new(frame, names)
    }
}
