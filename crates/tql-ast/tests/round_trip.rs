use tql_ast::parse;
use tql_ir::{col, sym, BinaryOperator, FuncRef, Node, Symbolic, UnaryOperator};

fn assert_round_trip(node: Node) {
    let text = node.to_string();
    let parsed = parse(&text).unwrap_or_else(|e| panic!("failed to parse {:?}: {}", text, e));
    assert_eq!(parsed, node, "round trip of {:?}", text);
}

#[test]
fn test_round_trip_operators() {
    assert_eq!((sym() + 1).to_string(), "_ + 1");
    assert_eq!((1i32 + sym()).to_string(), "1 + _");

    let cases: Vec<Symbolic> = vec![
        sym() + 1,
        1 + sym(),
        (col("a") + 1) * 2,
        col("a") - (col("b") - 1),
        col("a") - col("b") - 1,
        col("x").pow(2).pow(3),
        col("x").pow(sym().attr("y").pow(2)),
        (-col("x")).pow(2),
        (col("a").gt(1)).invert(),
        col("a").gt(1) & col("b").le(2) | col("c").eq("x"),
        col("a").floordiv(2) % 3,
        10.0 / col("a"),
        col("a").lshift(1).gt(col("b").rshift(2)),
    ];

    for case in cases {
        assert_round_trip(case.into_node());
    }
}

#[test]
fn test_round_trip_calls_and_access() {
    let cases = vec![
        col("x").method("mean", vec![]).into_node(),
        col("s").attr("str").method("upper", vec![]).into_node(),
        sym().item("a").into_node(),
        (col("a") + 1).method("abs", vec![]).into_node(),
        col("x").method_kw("round", vec![], vec![("decimals".to_string(), Node::literal(2))]).into_node(),
        Node::func_call(
            FuncRef::named("f"),
            vec![Node::column("x"), Node::literal(1)],
            vec![("k".to_string(), Node::literal(2))],
        ),
        Node::unary(UnaryOperator::Neg, Node::column("x")),
    ];

    for case in cases {
        assert_round_trip(case);
    }
}

#[test]
fn test_round_trip_slices_and_dicts() {
    let lit = |v: i64| Some(Node::literal(v));
    let cases = vec![
        sym().slice(lit(1), lit(2), None).into_node(),
        sym().slice(None, None, lit(2)).into_node(),
        sym().slice(Some(Node::column("a")), None, None).into_node(),
        sym().slice(Some(Node::literal("a")), Some(Node::literal("c")), None).into_node(),
        Node::DictCall {
            entries: vec![(
                Node::binary(BinaryOperator::Gt, Node::column("a"), Node::literal(1)),
                Node::literal("x"),
            )],
        },
    ];

    for case in cases {
        assert_round_trip(case);
    }
}

#[test]
fn test_round_trip_literals() {
    let cases = vec![
        Node::literal(tql_ir::Value::Null),
        Node::literal(true),
        Node::literal("it's"),
        Node::literal(1.5),
        Node::literal(vec![1, 2, 3]),
        (col("a") * -1).into_node(),
    ];

    for case in cases {
        assert_round_trip(case);
    }
}

#[test]
fn test_parsed_tree_serializes_like_captured() {
    let captured = (col("a") + col("b")).gt(1).into_node();
    let parsed = parse("_.a + _.b > 1").unwrap();
    assert_eq!(
        serde_json::to_string(&captured).unwrap(),
        serde_json::to_string(&parsed).unwrap()
    );
    assert_eq!(captured.fingerprint(), parsed.fingerprint());
}
