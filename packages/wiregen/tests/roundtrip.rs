//! End-to-end properties: schema and expression text round trips,
//! codec round trips through the heap, converter composition, and the
//! serialized-size law. Everything runs through the in-process IR
//! evaluator.

use proptest::collection::vec;
use proptest::prelude::*;
use wiregen::{
    desser, eval, eval_apply, eval_with, materialize, parse_expr, parse_schema,
    serialize, sersize, BinOp, DataCursor, Des, Expr, FidGen, MaybeNullable, RecField,
    RtVal, Scalar, Ser, SumAlt, Type, UnOp, ValueType,
};
use wiregen::rowbinary::{RowBinaryDes, RowBinarySer};
use wiregen::sexpr::{SExprConfig, SExprDes, SExprSer};

const OUT_BUF: usize = 1 << 16;

/// `RUST_LOG=wiregen=trace cargo test` shows every node the driver
/// weaves.
fn trace_init() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn data_ptr(bytes: &[u8]) -> RtVal {
    RtVal::DataPtr(DataCursor::of_bytes(bytes.to_vec()))
}

/// Read one value of `root` out of `bytes` through `des`, onto the heap.
/// Returns the heap pointer and the bytes left unread.
fn read_to_heap<D: Des>(des: &mut D, root: &MaybeNullable, bytes: &[u8]) -> (RtVal, usize) {
    trace_init();
    let mut g = FidGen::new();
    let reader = materialize(des, &mut g, root).unwrap();
    let RtVal::Pair(vptr, src) = eval_apply(&reader, vec![data_ptr(bytes)]).unwrap()
    else {
        panic!("materialize must yield a pair")
    };
    let RtVal::DataPtr(src) = *src else { panic!() };
    (*vptr, src.rem())
}

/// Write the heap value back out through `ser`.
fn write_from_heap<S: Ser>(ser: &mut S, root: &MaybeNullable, vptr: RtVal) -> Vec<u8> {
    let mut g = FidGen::new();
    let writer = serialize(ser, &mut g, root).unwrap();
    let out = RtVal::DataPtr(DataCursor::of_buffer(OUT_BUF));
    let RtVal::Pair(vptr2, dst) = eval_apply(&writer, vec![vptr, out]).unwrap()
    else {
        panic!("serialize must yield a pair")
    };
    // the driver hands the value pointer back at its root
    let RtVal::ValuePtr(vptr2) = *vptr2 else { panic!() };
    assert!(vptr2.at_root());
    let RtVal::DataPtr(dst) = *dst else { panic!() };
    dst.taken()
}

/// One direct conversion, no heap in between.
fn convert<D: Des, S: Ser>(
    des: &mut D,
    ser: &mut S,
    root: &MaybeNullable,
    bytes: &[u8],
) -> Vec<u8> {
    trace_init();
    let mut g = FidGen::new();
    let woven = desser(
        des,
        ser,
        &mut g,
        root,
        Expr::ident("in"),
        Expr::DataPtrOfBuffer(OUT_BUF),
    ).unwrap();
    let out = eval_with(vec![("in".to_owned(), data_ptr(bytes))], &woven).unwrap();
    let RtVal::Pair(_, dst) = out else { panic!("desser must yield a pair") };
    let RtVal::DataPtr(dst) = *dst else { panic!() };
    dst.taken()
}

fn sexpr_identity(schema_text: &str, input: &str) {
    let root = parse_schema(schema_text).unwrap();
    let (heap, rem) = read_to_heap(&mut SExprDes::default(), &root, input.as_bytes());
    assert_eq!(rem, 0, "input fully consumed for {:?}", input);
    let out = write_from_heap(&mut SExprSer::default(), &root, heap);
    assert_eq!(out, input.as_bytes(), "{:?} through the heap", input);
}

#[test]
fn smallest_schema_roundtrips() {
    sexpr_identity("u8", "0");
}

#[test]
fn empty_prefixed_list_roundtrips() {
    let root = parse_schema("u8[]").unwrap();
    let (heap, rem) = read_to_heap(&mut SExprDes::default(), &root, b"0 ()");
    assert_eq!(rem, 0);
    let RtVal::ValuePtr(ptr) = &heap else { panic!() };
    assert_eq!(ptr.whole(), RtVal::Seq(vec![]));
    let out = write_from_heap(&mut SExprSer::default(), &root, heap);
    assert_eq!(out, b"0 ()");
}

#[test]
fn null_record_field_roundtrips() {
    let root = parse_schema("{a: u8; b: string?}").unwrap();
    let (heap, rem) = read_to_heap(&mut SExprDes::default(), &root, b"(42 null)");
    assert_eq!(rem, 0);
    let RtVal::ValuePtr(ptr) = &heap else { panic!() };
    assert_eq!(
        ptr.whole(),
        RtVal::Tup(vec![
            RtVal::UInt(Scalar::U8, 42),
            RtVal::Nullable(None),
        ]),
    );
    let out = write_from_heap(&mut SExprSer::default(), &root, heap);
    assert_eq!(out, b"(42 null)");
}

#[test]
fn char_vector_roundtrips() {
    let root = parse_schema("char[2]").unwrap();
    let (heap, rem) = read_to_heap(&mut SExprDes::default(), &root, b"(\"a\" \"b\")");
    assert_eq!(rem, 0);
    let RtVal::ValuePtr(ptr) = &heap else { panic!() };
    assert_eq!(
        ptr.whole(),
        RtVal::Seq(vec![RtVal::Char('a'), RtVal::Char('b')]),
    );
    let out = write_from_heap(&mut SExprSer::default(), &root, heap);
    assert_eq!(out, b"(\"a\" \"b\")");
}

#[test]
fn wide_vectors_take_the_loop_path() {
    // past the unroll threshold the driver switches to a counted loop;
    // the bytes must come out the same
    sexpr_identity("u8[12]", "(1 2 3 4 5 6 7 8 9 10 11 12)");
    let root = parse_schema("u8[12]").unwrap();
    let out = convert(
        &mut SExprDes::default(),
        &mut SExprSer::default(),
        &root,
        b"(1 2 3 4 5 6 7 8 9 10 11 12)",
    );
    assert_eq!(out, b"(1 2 3 4 5 6 7 8 9 10 11 12)");
}

#[test]
fn nested_schema_text_roundtrips() {
    let text = "(u8; bool[string])[]?[string?[u8?]]";
    let mn = parse_schema(text).unwrap();
    assert_eq!(parse_schema(&mn.to_string()).unwrap(), mn);
}

#[test]
fn nested_value_survives_rowbinary_and_back() {
    // a value-bearing cousin of the nested schema above (maps carry no
    // runtime values, so they stay out of the value path)
    let root = parse_schema(
        "{xs: u8?[]; t: (char; i48)[2]; s: [a: u64 | b: string?]; big: u128[]}",
    ).unwrap();
    let input: &[u8] =
        b"(3 (7 null 9) ((\"x\" -70000) (\"y\" 70000)) (1 \"maybe\") 1 (85070591730234615865843651857942052864))";
    let binary = convert(
        &mut SExprDes::default(), &mut RowBinarySer, &root, input,
    );
    assert_ne!(binary, input);
    let back = convert(
        &mut RowBinaryDes, &mut SExprSer::default(), &root, &binary,
    );
    assert_eq!(back, input);
}

#[test]
fn i128_at_two_to_the_126() {
    let literal = "85070591730234615865843651857942052864";
    assert_eq!(literal.parse::<i128>().unwrap(), 1i128 << 126);
    sexpr_identity("i128", literal);
    sexpr_identity("i128", "-85070591730234615865843651857942052864");

    // and through the binary side, 16 bytes exactly
    let root = parse_schema("i128").unwrap();
    let binary = convert(
        &mut SExprDes::default(), &mut RowBinarySer, &root, literal.as_bytes(),
    );
    assert_eq!(binary.len(), 16);
    let back = convert(
        &mut RowBinaryDes, &mut SExprSer::default(), &root, &binary,
    );
    assert_eq!(back, literal.as_bytes());
}

#[test]
fn converter_composition_identity() {
    let root = parse_schema("{a: u24; b: (bool; float); c: string[]}").unwrap();
    let input: &[u8] = b"(512 (T 1.5) 2 (\"ab\" \"\"))";
    let binary = convert(
        &mut SExprDes::default(), &mut RowBinarySer, &root, input,
    );
    let back = convert(
        &mut RowBinaryDes, &mut SExprSer::default(), &root, &binary,
    );
    assert_eq!(back, input);
}

#[test]
fn unprefixed_lists_use_the_terminated_discipline() {
    let cfg = SExprConfig { list_prefix_length: false, ..SExprConfig::default() };
    let root = parse_schema("u16[]").unwrap();
    let mut des = SExprDes::new(cfg.clone());
    let mut ser = SExprSer::new(cfg);
    let out = convert(&mut des, &mut ser, &root, b"(10 20 30)");
    assert_eq!(out, b"(10 20 30)");
    let out = convert(
        &mut SExprDes::new(SExprConfig { list_prefix_length: false, ..Default::default() }),
        &mut SExprSer::new(SExprConfig { list_prefix_length: false, ..Default::default() }),
        &root,
        b"()",
    );
    assert_eq!(out, b"()");
}

#[test]
fn count_demanding_serializer_fails_fast_without_one() {
    // a terminated deserializer cannot feed a count-prefixed serializer
    let cfg = SExprConfig { list_prefix_length: false, ..SExprConfig::default() };
    let root = parse_schema("u8[]").unwrap();
    let mut g = FidGen::new();
    let err = desser(
        &mut SExprDes::new(cfg),
        &mut RowBinarySer,
        &mut g,
        &root,
        Expr::ident("in"),
        Expr::DataPtrOfBuffer(OUT_BUF),
    );
    assert!(err.is_err());
}

#[test]
fn sersize_matches_serialized_length() {
    for (schema_text, input) in [
        ("u8", "7".as_bytes()),
        ("{a: u24; b: string?}", b"(512 \"hello\")"),
        ("{a: u24; b: string?}", b"(512 null)"),
        ("(string; u64[]; bool)", b"(\"xyz\" 3 (9 10 11) F)"),
        ("[a: u8 | b: string]", b"(1 \"deep\")"),
    ] {
        let root = parse_schema(schema_text).unwrap();
        let (heap, _) = read_to_heap(&mut SExprDes::default(), &root, input);
        let written = write_from_heap(&mut RowBinarySer, &root, heap.clone());

        let mut g = FidGen::new();
        let (const_size, dyn_size) =
            sersize(&RowBinarySer, &mut g, &root, Expr::ident("v")).unwrap();
        let measured = eval_with(vec![("v".to_owned(), heap)], &dyn_size).unwrap();
        let RtVal::Size(dyn_total) = measured else { panic!() };
        assert_eq!(
            const_size + dyn_total,
            written.len(),
            "sersize law for {} on {:?}", schema_text, input,
        );
    }
}

#[test]
fn user_types_convert_through_their_def() {
    let ip = wiregen::register_user_type(
        "ip4_roundtrip",
        ValueType::Scalar(Scalar::U32),
    ).unwrap();
    let root = ValueType::Rec(vec![
        ("src", ValueType::Usr(ip).not_nullable()).into(),
        ("port", ValueType::Scalar(Scalar::U16).not_nullable()).into(),
    ]).not_nullable();
    sexpr_identity(&root.to_string(), "(3232235777 443)");
}

#[test]
fn type_of_is_deterministic_over_woven_converters() {
    let root = parse_schema("{a: u8?; b: char[2]}").unwrap();
    let mut g = FidGen::new();
    let woven = desser(
        &mut SExprDes::default(),
        &mut RowBinarySer,
        &mut g,
        &root,
        Expr::ident("in"),
        Expr::ident("out"),
    ).unwrap();
    let mut env = wiregen::TypeEnv::new();
    env.bind("in", Type::DataPtr);
    env.bind("out", Type::DataPtr);
    let t1 = wiregen::type_of(&env, &woven).unwrap();
    let t2 = wiregen::type_of(&env, &woven).unwrap();
    assert_eq!(t1, t2);
    assert_eq!(t1, Type::pair(Type::DataPtr, Type::DataPtr));
}

// ---- schema text round trip, property style ----

fn scalar_strategy() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        Just(Scalar::Bool),
        Just(Scalar::Char),
        Just(Scalar::Float),
        Just(Scalar::Str),
        proptest::sample::select(&Scalar::INTS[..]),
    ]
}

fn vtype_strategy() -> impl Strategy<Value = ValueType> {
    let leaf = scalar_strategy().prop_map(ValueType::Scalar);
    leaf.prop_recursive(3, 24, 4, |inner| {
        let mn = (inner, any::<bool>()).prop_map(|(vt, nullable)| {
            if nullable { vt.nullable() } else { vt.not_nullable() }
        });
        prop_oneof![
            (1usize..4, mn.clone()).prop_map(|(dim, elem)| {
                ValueType::Vec(dim, Box::new(elem))
            }),
            mn.clone().prop_map(|elem| ValueType::List(Box::new(elem))),
            vec(mn.clone(), 1..4).prop_map(ValueType::Tup),
            vec(mn.clone(), 1..4).prop_map(|mns| {
                ValueType::Rec(
                    mns.into_iter()
                        .enumerate()
                        .map(|(i, mn)| RecField { name: format!("f{}", i), mn })
                        .collect(),
                )
            }),
            vec(mn.clone(), 1..4).prop_map(|mns| {
                ValueType::Sum(
                    mns.into_iter()
                        .enumerate()
                        .map(|(i, mn)| SumAlt { label: format!("alt{}", i), mn })
                        .collect(),
                )
            }),
            (mn.clone(), mn).prop_map(|(key, value)| {
                ValueType::Map(Box::new(key), Box::new(value))
            }),
        ]
    })
}

fn mn_strategy() -> impl Strategy<Value = MaybeNullable> {
    (vtype_strategy(), any::<bool>()).prop_map(|(vt, nullable)| {
        if nullable { vt.nullable() } else { vt.not_nullable() }
    })
}

proptest! {
    #[test]
    fn schema_print_parse_is_identity(mn in mn_strategy()) {
        let printed = mn.to_string();
        let parsed = parse_schema(&printed);
        prop_assert!(parsed.is_ok(), "{:?} failed on {:?}", printed, parsed.err());
        prop_assert_eq!(parsed.unwrap(), mn, "printed as {}", printed);
    }
}

// ---- expression text round trip, property style ----

fn expr_strategy() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        any::<u8>().prop_map(Expr::U8),
        any::<i128>().prop_map(Expr::I128),
        any::<u64>().prop_map(Expr::QWord),
        any::<usize>().prop_map(Expr::Size),
        any::<bool>().prop_map(Expr::Bool),
        "[a-z]{1,8}".prop_map(Expr::ident),
        ".*".prop_map(Expr::Str),
        any::<char>().prop_map(Expr::Char),
        proptest::num::f64::NORMAL.prop_map(Expr::Float),
        vec(any::<u8>(), 0..8).prop_map(Expr::Bytes),
        (any::<u32>(), 0u32..4).prop_map(|(fid, i)| Expr::Param(fid % 100, i)),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Expr::add(a, b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Expr::pair(a, b)),
            inner.clone().prop_map(|a| Expr::un(UnOp::ToU128, a)),
            inner.clone().prop_map(|a| Expr::un(UnOp::StringOfInt, a)),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| Expr::bin(BinOp::MapPair, a, b)),
            ("[a-z]{1,8}", inner.clone(), inner.clone())
                .prop_map(|(name, value, body)| Expr::let_(name, value, body)),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(c, t, e)| Expr::choose(c, t, e)),
            vec(inner.clone(), 0..4).prop_map(Expr::Seq),
            (any::<u32>(), inner).prop_map(|(fid, body)| {
                Expr::func(fid % 100, vec![Type::u8(), Type::DataPtr], body)
            }),
        ]
    })
}

proptest! {
    #[test]
    fn expr_print_parse_is_identity(e in expr_strategy()) {
        let printed = e.to_string();
        let parsed = parse_expr(&printed);
        prop_assert!(parsed.is_ok(), "{:?} failed on {:?}", printed, parsed.err());
        prop_assert_eq!(parsed.unwrap(), e, "printed as {}", printed);
    }
}

// ---- the evaluator agrees with plain Rust on a couple of spot checks ----

#[test]
fn spot_checks() {
    let e = Expr::bin(
        BinOp::MapPair,
        Expr::pair(Expr::U32(6), Expr::U32(7)),
        Expr::func(
            50,
            vec![Type::u32(), Type::u32()],
            Expr::bin(BinOp::Mul, Expr::Param(50, 0), Expr::Param(50, 1)),
        ),
    );
    assert_eq!(eval(&e).unwrap(), RtVal::UInt(Scalar::U32, 42));
}
