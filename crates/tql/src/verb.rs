//! Verbs as values, and `>>` piping
//!
//! A [`Verb`] holds its arguments and no data. Piping data into it runs it
//! right away; piping the placeholder `_` (or another verb) builds a
//! [`Pipeline`] that runs later on any kind of table.

use crate::table::Table;
use crate::TqlError;
use std::fmt;
use std::ops::Shr;
use tql_frame::{Frame, GroupedFrame, JoinKind};
use tql_ir::{Node, Symbolic};
use tql_sql::LazyTbl;
use tracing::debug;

type Named = Vec<(String, Node)>;

#[derive(Debug, Clone)]
pub enum Verb {
    Select(Vec<Node>),
    Rename(Named),
    Mutate(Named),
    Transmute(Named),
    Filter(Vec<Node>),
    Summarize(Named),
    Arrange(Vec<Node>),
    Distinct {
        args: Vec<Node>,
        kwargs: Named,
        keep_all: bool,
    },
    Count {
        args: Vec<Node>,
        kwargs: Named,
        wt: Option<Node>,
        sort: bool,
        name: Option<String>,
        add: bool,
    },
    TopN {
        n: i64,
        wt: Option<Node>,
    },
    GroupBy {
        args: Vec<Node>,
        kwargs: Named,
        add: bool,
    },
    Ungroup,
    Head(usize),
    Join {
        right: Box<Table>,
        on: Option<Vec<(String, String)>>,
        how: JoinKind,
    },
}

fn nodes<I, N>(items: I) -> Vec<Node>
where
    I: IntoIterator<Item = N>,
    N: Into<Node>,
{
    items.into_iter().map(Into::into).collect()
}

fn named<I, S, N>(items: I) -> Named
where
    I: IntoIterator<Item = (S, N)>,
    S: Into<String>,
    N: Into<Node>,
{
    items.into_iter().map(|(s, n)| (s.into(), n.into())).collect()
}

pub fn select<I: IntoIterator<Item = N>, N: Into<Node>>(selectors: I) -> Verb {
    Verb::Select(nodes(selectors))
}

/// `(new, _.old)` pairs.
pub fn rename<I: IntoIterator<Item = (S, N)>, S: Into<String>, N: Into<Node>>(pairs: I) -> Verb {
    Verb::Rename(named(pairs))
}

pub fn mutate<I: IntoIterator<Item = (S, N)>, S: Into<String>, N: Into<Node>>(exprs: I) -> Verb {
    Verb::Mutate(named(exprs))
}

pub fn transmute<I: IntoIterator<Item = (S, N)>, S: Into<String>, N: Into<Node>>(exprs: I) -> Verb {
    Verb::Transmute(named(exprs))
}

pub fn filter<I: IntoIterator<Item = N>, N: Into<Node>>(conds: I) -> Verb {
    Verb::Filter(nodes(conds))
}

pub fn summarize<I: IntoIterator<Item = (S, N)>, S: Into<String>, N: Into<Node>>(exprs: I) -> Verb {
    Verb::Summarize(named(exprs))
}

pub fn arrange<I: IntoIterator<Item = N>, N: Into<Node>>(exprs: I) -> Verb {
    Verb::Arrange(nodes(exprs))
}

pub fn distinct<I: IntoIterator<Item = N>, N: Into<Node>>(args: I) -> Verb {
    Verb::Distinct {
        args: nodes(args),
        kwargs: Vec::new(),
        keep_all: false,
    }
}

fn count_verb(args: Vec<Node>, add: bool) -> Verb {
    Verb::Count {
        args,
        kwargs: Vec::new(),
        wt: None,
        sort: false,
        name: None,
        add,
    }
}

pub fn count<I: IntoIterator<Item = N>, N: Into<Node>>(args: I) -> Verb {
    count_verb(nodes(args), false)
}

/// Like `count`, but keeps every row and adds the tally as a column.
pub fn add_count<I: IntoIterator<Item = N>, N: Into<Node>>(args: I) -> Verb {
    count_verb(nodes(args), true)
}

/// Rows in the top `n` by the last column; negative `n` takes the bottom.
pub fn top_n(n: i64) -> Verb {
    Verb::TopN { n, wt: None }
}

pub fn group_by<I: IntoIterator<Item = N>, N: Into<Node>>(args: I) -> Verb {
    Verb::GroupBy {
        args: nodes(args),
        kwargs: Vec::new(),
        add: false,
    }
}

pub fn ungroup() -> Verb {
    Verb::Ungroup
}

pub fn head(n: usize) -> Verb {
    Verb::Head(n)
}

fn join_verb(right: impl Into<Table>, how: JoinKind) -> Verb {
    Verb::Join {
        right: Box::new(right.into()),
        on: None,
        how,
    }
}

pub fn inner_join(right: impl Into<Table>) -> Verb {
    join_verb(right, JoinKind::Inner)
}

pub fn left_join(right: impl Into<Table>) -> Verb {
    join_verb(right, JoinKind::Left)
}

pub fn right_join(right: impl Into<Table>) -> Verb {
    join_verb(right, JoinKind::Right)
}

pub fn full_join(right: impl Into<Table>) -> Verb {
    join_verb(right, JoinKind::Full)
}

pub fn semi_join(right: impl Into<Table>) -> Verb {
    join_verb(right, JoinKind::Semi)
}

pub fn anti_join(right: impl Into<Table>) -> Verb {
    join_verb(right, JoinKind::Anti)
}

/// Run `$body` with `$t` bound to whichever kind of data `$table` holds.
macro_rules! each {
    ($table:expr, $t:ident => $body:expr) => {
        match $table {
            Table::Frame($t) => Table::from($body),
            Table::Grouped($t) => Table::from($body),
            Table::Lazy($t) => Table::from($body),
        }
    };
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Select(_) => "select",
            Verb::Rename(_) => "rename",
            Verb::Mutate(_) => "mutate",
            Verb::Transmute(_) => "transmute",
            Verb::Filter(_) => "filter",
            Verb::Summarize(_) => "summarize",
            Verb::Arrange(_) => "arrange",
            Verb::Distinct { .. } => "distinct",
            Verb::Count { add: false, .. } => "count",
            Verb::Count { add: true, .. } => "add_count",
            Verb::TopN { .. } => "top_n",
            Verb::GroupBy { .. } => "group_by",
            Verb::Ungroup => "ungroup",
            Verb::Head(_) => "head",
            Verb::Join { how, .. } => how.verb(),
        }
    }

    /// Join keys as `(left, right)` column pairs. Other verbs are returned as is.
    pub fn on<I, S>(self, keys: I) -> Verb
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        match self {
            Verb::Join { right, how, .. } => Verb::Join {
                right,
                on: Some(keys.into_iter().map(|(l, r)| (l.into(), r.into())).collect()),
                how,
            },
            other => other,
        }
    }

    /// Largest counts first (`count` only).
    pub fn with_sort(mut self) -> Verb {
        if let Verb::Count { sort, .. } = &mut self {
            *sort = true;
        }
        self
    }

    /// Name of the count column (`count` only).
    pub fn with_name(mut self, column: impl Into<String>) -> Verb {
        if let Verb::Count { name, .. } = &mut self {
            *name = Some(column.into());
        }
        self
    }

    /// Weight to sum instead of counting rows (`count`, `add_count`), or to
    /// rank by (`top_n`).
    pub fn with_wt(mut self, weight: impl Into<Node>) -> Verb {
        match &mut self {
            Verb::Count { wt, .. } | Verb::TopN { wt, .. } => *wt = Some(weight.into()),
            _ => {}
        }
        self
    }

    /// Keep every column of the first row of each combination (`distinct` only).
    pub fn with_keep_all(mut self) -> Verb {
        if let Verb::Distinct { keep_all, .. } = &mut self {
            *keep_all = true;
        }
        self
    }

    /// Add to the current groups instead of replacing them (`group_by` only).
    pub fn with_add(mut self) -> Verb {
        if let Verb::GroupBy { add, .. } = &mut self {
            *add = true;
        }
        self
    }

    pub fn apply(&self, table: impl Into<Table>) -> Result<Table, TqlError> {
        let table = table.into();
        debug!(verb = self.name(), table = table.kind(), "Applying verb");
        Ok(match self {
            Verb::Select(selectors) => each!(table, t => t.select(selectors)?),
            Verb::Rename(pairs) => each!(table, t => t.rename(pairs)?),
            Verb::Mutate(exprs) => each!(table, t => t.mutate(exprs)?),
            Verb::Transmute(exprs) => each!(table, t => t.transmute(exprs)?),
            Verb::Filter(conds) => each!(table, t => t.filter(conds)?),
            Verb::Summarize(exprs) => each!(table, t => t.summarize(exprs)?),
            Verb::Arrange(exprs) => each!(table, t => t.arrange(exprs)?),
            Verb::Distinct { args, kwargs, keep_all } => {
                each!(table, t => t.distinct(args, kwargs, *keep_all)?)
            }
            Verb::Count { args, kwargs, wt, sort, name, add: false } => {
                each!(table, t => t.count(args, kwargs, wt.as_ref(), *sort, name.as_deref())?)
            }
            Verb::Count { args, kwargs, wt, sort, name, add: true } => {
                each!(table, t => t.add_count(args, kwargs, wt.as_ref(), *sort, name.as_deref())?)
            }
            Verb::TopN { n, wt } => each!(table, t => t.top_n(*n, wt.as_ref())?),
            Verb::GroupBy { args, kwargs, add } => match table {
                Table::Frame(f) => f.group_by(args, kwargs)?.into(),
                Table::Grouped(g) => g.group_by(args, kwargs, *add)?.into(),
                Table::Lazy(l) => l.group_by(args, kwargs, *add)?.into(),
            },
            Verb::Ungroup => match table {
                Table::Grouped(g) => g.ungroup().into(),
                Table::Lazy(l) => l.ungroup().into(),
                frame => frame,
            },
            Verb::Head(n) => match table {
                Table::Frame(f) => f.head(*n).into(),
                Table::Grouped(g) => g.head(*n)?.into(),
                Table::Lazy(l) => l.head(*n as u64)?.into(),
            },
            Verb::Join { right, on, how } => join(table, right, on.as_deref(), *how)?,
        })
    }
}

/// Rows of an in-memory right-hand side.
fn in_memory(right: &Table, how: JoinKind) -> Result<Frame, TqlError> {
    match right {
        Table::Frame(f) => Ok(f.clone()),
        Table::Grouped(g) => Ok(g.frame().clone()),
        Table::Lazy(_) => Err(TqlError::Unsupported(format!(
            "{}: cannot join a frame with a lazy table; collect it first",
            how.verb()
        ))),
    }
}

fn join(left: Table, right: &Table, on: Option<&[(String, String)]>, how: JoinKind) -> Result<Table, TqlError> {
    match left {
        Table::Frame(l) => Ok(l.join(&in_memory(right, how)?, on, how)?.into()),
        Table::Grouped(g) => {
            let joined = g.frame().join(&in_memory(right, how)?, on, how)?;
            let groups: Vec<String> = g
                .group_names()
                .iter()
                .filter(|n| joined.has_column(n))
                .cloned()
                .collect();
            if groups.is_empty() {
                Ok(joined.into())
            } else {
                Ok(GroupedFrame::new(joined, groups)?.into())
            }
        }
        Table::Lazy(l) => match right {
            Table::Lazy(r) => Ok(l.join(r, on, how)?.into()),
            other => Err(TqlError::Unsupported(format!(
                "{}: cannot join a lazy table with a {}",
                how.verb(),
                other.kind()
            ))),
        },
    }
}

/// Verbs to apply in order.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    verbs: Vec<Verb>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, verb: Verb) -> Self {
        self.verbs.push(verb);
        self
    }

    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    pub fn len(&self) -> usize {
        self.verbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    pub fn apply(&self, table: impl Into<Table>) -> Result<Table, TqlError> {
        let mut table = table.into();
        for verb in &self.verbs {
            table = verb.apply(table)?;
        }
        crate::log_event!(
            level: tracing::Level::DEBUG,
            event: "pipeline_applied",
            verbs: self.verbs.len(),
            result: table.kind()
        );
        Ok(table)
    }
}

impl From<Verb> for Pipeline {
    fn from(verb: Verb) -> Self {
        Pipeline { verbs: vec![verb] }
    }
}

fn join_args(f: &mut fmt::Formatter<'_>, args: &[Node], kwargs: &[(String, Node)]) -> fmt::Result {
    let mut parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    parts.extend(kwargs.iter().map(|(k, v)| match k.as_str() {
        "" => v.to_string(),
        k => format!("{} = {}", k, v),
    }));
    write!(f, "{}", parts.join(", "))
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        match self {
            Verb::Select(args) | Verb::Filter(args) | Verb::Arrange(args) => join_args(f, args, &[])?,
            Verb::Rename(kw) | Verb::Mutate(kw) | Verb::Transmute(kw) | Verb::Summarize(kw) => join_args(f, &[], kw)?,
            Verb::Distinct { args, kwargs, keep_all } => {
                join_args(f, args, kwargs)?;
                if *keep_all {
                    write!(f, ", keep_all = true")?;
                }
            }
            Verb::Count { args, kwargs, wt, sort, name, .. } => {
                join_args(f, args, kwargs)?;
                if let Some(wt) = wt {
                    write!(f, ", wt = {}", wt)?;
                }
                if *sort {
                    write!(f, ", sort = true")?;
                }
                if let Some(name) = name {
                    write!(f, ", name = '{}'", name)?;
                }
            }
            Verb::GroupBy { args, kwargs, add } => {
                join_args(f, args, kwargs)?;
                if *add {
                    write!(f, ", add = true")?;
                }
            }
            Verb::TopN { n, wt } => {
                write!(f, "{}", n)?;
                if let Some(wt) = wt {
                    write!(f, ", wt = {}", wt)?;
                }
            }
            Verb::Ungroup => {}
            Verb::Head(n) => write!(f, "{}", n)?,
            Verb::Join { right, on, .. } => {
                write!(f, "<{}>", right.kind())?;
                if let Some(keys) = on {
                    let keys: Vec<String> = keys.iter().map(|(l, r)| format!("{} = {}", l, r)).collect();
                    write!(f, ", on = [{}]", keys.join(", "))?;
                }
            }
        }
        write!(f, ")")
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_")?;
        for verb in &self.verbs {
            write!(f, " >> {}", verb)?;
        }
        Ok(())
    }
}

impl Shr<Verb> for Verb {
    type Output = Pipeline;

    fn shr(self, rhs: Verb) -> Pipeline {
        Pipeline::from(self).then(rhs)
    }
}

impl Shr<Verb> for Pipeline {
    type Output = Pipeline;

    fn shr(self, rhs: Verb) -> Pipeline {
        self.then(rhs)
    }
}

impl Shr<Pipeline> for Pipeline {
    type Output = Pipeline;

    fn shr(mut self, rhs: Pipeline) -> Pipeline {
        self.verbs.extend(rhs.verbs);
        self
    }
}

/// `_ >> verb` defers the verb.
impl Shr<Verb> for Symbolic {
    type Output = Pipeline;

    fn shr(self, rhs: Verb) -> Pipeline {
        Pipeline::from(rhs)
    }
}

impl Shr<Pipeline> for Symbolic {
    type Output = Pipeline;

    fn shr(self, rhs: Pipeline) -> Pipeline {
        rhs
    }
}

macro_rules! pipe_data {
    ($($ty:ty),*) => {
        $(
            impl Shr<Verb> for $ty {
                type Output = Result<Table, TqlError>;

                fn shr(self, verb: Verb) -> Self::Output {
                    verb.apply(self)
                }
            }

            impl Shr<Pipeline> for $ty {
                type Output = Result<Table, TqlError>;

                fn shr(self, pipeline: Pipeline) -> Self::Output {
                    pipeline.apply(self)
                }
            }
        )*
    };
}

pipe_data!(Table, Frame, GroupedFrame, LazyTbl);

impl Shr<Verb> for Result<Table, TqlError> {
    type Output = Result<Table, TqlError>;

    fn shr(self, verb: Verb) -> Self::Output {
        verb.apply(self?)
    }
}

impl Shr<Pipeline> for Result<Table, TqlError> {
    type Output = Result<Table, TqlError>;

    fn shr(self, pipeline: Pipeline) -> Self::Output {
        pipeline.apply(self?)
    }
}
