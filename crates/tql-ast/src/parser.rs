//! Pest-based parser for printed expressions

use chrono::{NaiveDate, NaiveDateTime};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;
use tql_ir::{BinaryOperator, FuncRef, Node, UnaryOperator, Value};

#[derive(Parser)]
#[grammar = "expr.pest"]
pub struct ExprParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Pest error: {0}")]
    Pest(#[from] pest::error::Error<Rule>),
}

type Pair<'a> = pest::iterators::Pair<'a, Rule>;
type Pairs<'a> = pest::iterators::Pairs<'a, Rule>;

/// Parse printed expression text back into a tree.
///
/// Function names that are not `date`/`timestamp` literals become named
/// function references; a binary operator whose only placeholder is on the
/// right is read as a reflected operation (`1 + _`).
pub fn parse(source: &str) -> Result<Node, ParseError> {
    let mut pairs = ExprParser::parse(Rule::expression, source)?;
    let expression = pairs.next().ok_or_else(|| syntax("Empty input"))?;
    let mut inner = expression.into_inner();
    build(next(&mut inner, "expression")?)
}

fn syntax(msg: impl Into<String>) -> ParseError {
    ParseError::Syntax(msg.into())
}

fn next<'a>(pairs: &mut Pairs<'a>, what: &str) -> Result<Pair<'a>, ParseError> {
    pairs.next().ok_or_else(|| syntax(format!("Missing {}", what)))
}

fn build(pair: Pair) -> Result<Node, ParseError> {
    match pair.as_rule() {
        Rule::expr | Rule::bitwise | Rule::shift | Rule::arith | Rule::term => fold_binary(pair),
        Rule::unary => build_unary(pair),
        Rule::power => build_power(pair),
        Rule::postfix => build_postfix(pair),
        Rule::primary => build_primary(pair),
        Rule::slice_start | Rule::slice_stop | Rule::slice_step => {
            let mut inner = pair.into_inner();
            build(next(&mut inner, "slice bound")?)
        }
        other => Err(syntax(format!("Cannot build expression from {:?}", other))),
    }
}

/// `1 + _` is the reflected form of `_ + 1`.
fn combine(op: BinaryOperator, left: Node, right: Node) -> Node {
    if !left.contains_meta_arg() && right.contains_meta_arg() {
        Node::binary_right(op, right, left)
    } else {
        Node::binary(op, left, right)
    }
}

fn fold_binary(pair: Pair) -> Result<Node, ParseError> {
    let mut inner = pair.into_inner();
    let mut left = build(next(&mut inner, "left operand")?)?;

    while let Some(op_pair) = inner.next() {
        let symbol = op_pair.as_str();
        let op = BinaryOperator::from_symbol(symbol)
            .ok_or_else(|| syntax(format!("Unknown operator: {}", symbol)))?;
        let right = build(next(&mut inner, "right operand")?)?;
        left = combine(op, left, right);
    }

    Ok(left)
}

fn build_unary(pair: Pair) -> Result<Node, ParseError> {
    let mut inner = pair.into_inner();
    let first = next(&mut inner, "operand")?;
    if first.as_rule() != Rule::unary_op {
        return build(first);
    }

    let op = match first.as_str() {
        "~" => UnaryOperator::Invert,
        "-" => UnaryOperator::Neg,
        _ => UnaryOperator::Pos,
    };
    let operand = build(next(&mut inner, "unary operand")?)?;

    // negative numbers are literals
    Ok(match (op, operand) {
        (UnaryOperator::Neg, Node::Literal { value: Value::Int(i) }) => Node::literal(-i),
        (UnaryOperator::Neg, Node::Literal { value: Value::Float(f) }) => Node::literal(-f),
        (op, operand) => Node::unary(op, operand),
    })
}

fn build_power(pair: Pair) -> Result<Node, ParseError> {
    let mut inner = pair.into_inner();
    let base = build(next(&mut inner, "base")?)?;
    match inner.next() {
        Some(exponent) => Ok(combine(BinaryOperator::Pow, base, build(exponent)?)),
        None => Ok(base),
    }
}

fn build_postfix(pair: Pair) -> Result<Node, ParseError> {
    let mut inner = pair.into_inner();
    let mut node = build(next(&mut inner, "primary")?)?;

    for trailer in inner {
        let mut parts = trailer.into_inner();
        let part = next(&mut parts, "trailer")?;
        node = match part.as_rule() {
            Rule::attr_access => {
                let mut name = part.into_inner();
                Node::attr(node, next(&mut name, "attribute name")?.as_str())
            }
            Rule::index => {
                let mut key = part.into_inner();
                let key = next(&mut key, "index")?;
                match key.as_rule() {
                    Rule::slice => Node::item(node, build_slice(key)?),
                    _ => Node::item(node, build(key)?),
                }
            }
            Rule::call_args => {
                let (args, kwargs) = build_args(part)?;
                Node::call(node, args, kwargs)
            }
            other => return Err(syntax(format!("Unexpected trailer: {:?}", other))),
        };
    }

    Ok(node)
}

fn build_slice(pair: Pair) -> Result<Node, ParseError> {
    let (mut start, mut stop, mut step) = (None, None, None);
    for part in pair.into_inner() {
        let slot = match part.as_rule() {
            Rule::slice_start => &mut start,
            Rule::slice_stop => &mut stop,
            _ => &mut step,
        };
        *slot = Some(Box::new(build(part)?));
    }
    Ok(Node::Slice { start, stop, step })
}

fn build_args(pair: Pair) -> Result<(Vec<Node>, Vec<(String, Node)>), ParseError> {
    let mut args = Vec::new();
    let mut kwargs = Vec::new();

    for argument in pair.into_inner() {
        let mut inner = argument.into_inner();
        let arg = next(&mut inner, "argument")?;
        if arg.as_rule() == Rule::kwarg {
            let mut kw = arg.into_inner();
            let name = next(&mut kw, "keyword")?.as_str().to_string();
            let value = build(next(&mut kw, "keyword value")?)?;
            kwargs.push((name, value));
        } else {
            if !kwargs.is_empty() {
                return Err(syntax("Positional argument follows keyword argument"));
            }
            args.push(build(arg)?);
        }
    }

    Ok((args, kwargs))
}

fn build_primary(pair: Pair) -> Result<Node, ParseError> {
    let mut inner = pair.into_inner();
    let first = next(&mut inner, "primary")?;

    match first.as_rule() {
        Rule::literal => Ok(Node::Literal { value: build_literal(first)? }),
        Rule::date_lit => {
            let text = string_content(first)?;
            let date = NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map_err(|e| syntax(format!("Invalid date '{}': {}", text, e)))?;
            Ok(Node::literal(date))
        }
        Rule::timestamp_lit => {
            let text = string_content(first)?;
            let ts = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
                .map_err(|e| syntax(format!("Invalid timestamp '{}': {}", text, e)))?;
            Ok(Node::literal(ts))
        }
        Rule::placeholder => Ok(Node::MetaArg),
        Rule::dict => {
            let entries = first
                .into_inner()
                .map(|entry| {
                    let mut kv = entry.into_inner();
                    let key = build(next(&mut kv, "dict key")?)?;
                    let value = build(next(&mut kv, "dict value")?)?;
                    Ok((key, value))
                })
                .collect::<Result<Vec<_>, ParseError>>()?;
            Ok(Node::DictCall { entries })
        }
        Rule::list => {
            let items = first
                .into_inner()
                .map(|item| match build(item)? {
                    Node::Literal { value } => Ok(value),
                    other => Err(syntax(format!("List items must be literals, got {}", other))),
                })
                .collect::<Result<Vec<_>, ParseError>>()?;
            Ok(Node::Literal { value: Value::List(items) })
        }
        Rule::func_name => Ok(Node::func_arg(FuncRef::named(first.as_str().trim()))),
        Rule::expr => build(first),
        other => Err(syntax(format!("Invalid primary: {:?}", other))),
    }
}

fn build_literal(pair: Pair) -> Result<Value, ParseError> {
    let mut inner = pair.into_inner();
    let lit = next(&mut inner, "literal")?;
    let text = lit.as_str();

    match lit.as_rule() {
        Rule::keyword => Ok(match text {
            "True" => Value::Bool(true),
            "False" => Value::Bool(false),
            _ => Value::Null,
        }),
        Rule::int => text
            .parse()
            .map(Value::Int)
            .map_err(|e| syntax(format!("Invalid integer '{}': {}", text, e))),
        Rule::float => text
            .parse()
            .map(Value::Float)
            .map_err(|e| syntax(format!("Invalid float '{}': {}", text, e))),
        Rule::string => Ok(Value::Str(unescape(lit)?)),
        other => Err(syntax(format!("Invalid literal: {:?}", other))),
    }
}

/// Content of the single string argument of `date(...)` / `timestamp(...)`.
fn string_content(pair: Pair) -> Result<String, ParseError> {
    let mut inner = pair.into_inner();
    unescape(next(&mut inner, "string")?)
}

fn unescape(string: Pair) -> Result<String, ParseError> {
    let mut inner = string.into_inner();
    let raw = next(&mut inner, "string body")?.as_str();

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(escaped) => out.push(escaped),
                None => return Err(syntax("Dangling escape in string")),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_placeholder_and_attr() {
        assert_eq!(parse("_").unwrap(), Node::MetaArg);
        assert_eq!(parse("_.a").unwrap(), Node::column("a"));
        assert_eq!(parse("_['a']").unwrap(), Node::item(Node::MetaArg, Node::literal("a")));
    }

    #[test]
    fn test_parse_precedence() {
        let node = parse("_.a + _.b * 2").unwrap();
        let expected = Node::binary(
            BinaryOperator::Add,
            Node::column("a"),
            Node::binary(BinaryOperator::Mul, Node::column("b"), Node::literal(2)),
        );
        assert_eq!(node, expected);
    }

    #[test]
    fn test_parse_reflected() {
        let node = parse("1 - _.x").unwrap();
        assert_eq!(node.func_name(), "__rsub__");
        assert_eq!(node.to_string(), "1 - _.x");
    }

    #[test]
    fn test_parse_call_with_kwargs() {
        let node = parse("f(_.x, 1, k=2)").unwrap();
        let expected = Node::func_call(
            FuncRef::named("f"),
            vec![Node::column("x"), Node::literal(1)],
            vec![("k".to_string(), Node::literal(2))],
        );
        assert_eq!(node, expected);
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse("None").unwrap(), Node::literal(Value::Null));
        assert_eq!(parse("-1.5").unwrap(), Node::literal(-1.5));
        assert_eq!(parse("'it\\'s'").unwrap(), Node::literal("it's"));
        assert_eq!(
            parse("date('2020-01-02')").unwrap(),
            Node::literal(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap())
        );
    }

    #[test]
    fn test_floor_div_vs_pow_vs_mul() {
        assert_eq!(parse("_ // 2").unwrap().func_name(), "__floordiv__");
        assert_eq!(parse("_ ** 2").unwrap().func_name(), "__pow__");
        assert_eq!(parse("_ * 2").unwrap().func_name(), "__mul__");
    }

    #[test]
    fn test_syntax_error() {
        assert!(parse("_.a +").is_err());
        assert!(parse("f(k=1, _)").is_err());
    }
}
