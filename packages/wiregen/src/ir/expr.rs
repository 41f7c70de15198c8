//! The expression tree. One tagged constructor per operation; recursion
//! through owned children, so expressions are plain immutable values.

use crate::ir::typ::Type;
use crate::schema::{MaybeNullable, Path, Scalar, ValueType};
use serde::{Serialize, Deserialize};
use std::collections::HashSet;


/// Byte order of the word-sized stream operations.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn tag(self) -> &'static str {
        match self {
            Endianness::Little => "le",
            Endianness::Big => "be",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "le" => Some(Endianness::Little),
            "be" => Some(Endianness::Big),
            _ => None,
        }
    }
}

macro_rules! op_tags {
    ($enum_:ident, $($v:ident $tag:literal,)*)=>{
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
        pub enum $enum_ {
            $( $v, )*
        }

        impl $enum_ {
            pub fn tag(self) -> &'static str {
                match self {
                    $( $enum_::$v => $tag, )*
                }
            }

            pub fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $( $tag => Some($enum_::$v), )*
                    _ => None,
                }
            }
        }
    };
}

op_tags!(UnOp,
    // word-size casts, both directions
    ByteOfU8 "byte-of-u8", U8OfByte "u8-of-byte",
    WordOfU16 "word-of-u16", U16OfWord "u16-of-word",
    DWordOfU32 "dword-of-u32", U32OfDWord "u32-of-dword",
    QWordOfU64 "qword-of-u64", U64OfQWord "u64-of-qword",
    OWordOfU128 "oword-of-u128", U128OfOWord "u128-of-oword",
    FloatOfQWord "float-of-qword", QWordOfFloat "qword-of-float",
    SizeOfU32 "size-of-u32", U32OfSize "u32-of-size",
    BitOfBool "bit-of-bool", BoolOfBit "bool-of-bit",
    CharOfU8 "char-of-u8", U8OfChar "u8-of-char",
    // widening and narrowing integer conversions
    ToU8 "to-u8", ToU16 "to-u16", ToU24 "to-u24", ToU32 "to-u32",
    ToU40 "to-u40", ToU48 "to-u48", ToU56 "to-u56", ToU64 "to-u64",
    ToU128 "to-u128",
    ToI8 "to-i8", ToI16 "to-i16", ToI24 "to-i24", ToI32 "to-i32",
    ToI40 "to-i40", ToI48 "to-i48", ToI56 "to-i56", ToI64 "to-i64",
    ToI128 "to-i128",
    // string to numeric
    FloatOfString "float-of-string",
    U8OfString "u8-of-string", U16OfString "u16-of-string",
    U24OfString "u24-of-string", U32OfString "u32-of-string",
    U40OfString "u40-of-string", U48OfString "u48-of-string",
    U56OfString "u56-of-string", U64OfString "u64-of-string",
    U128OfString "u128-of-string",
    I8OfString "i8-of-string", I16OfString "i16-of-string",
    I24OfString "i24-of-string", I32OfString "i32-of-string",
    I40OfString "i40-of-string", I48OfString "i48-of-string",
    I56OfString "i56-of-string", I64OfString "i64-of-string",
    I128OfString "i128-of-string",
    // numeric to string
    StringOfFloat "string-of-float", StringOfInt "string-of-int",
    StringOfBytes "string-of-bytes", BytesOfString "bytes-of-string",
    Not "not", LogNot "log-not",
    IsNull "is-null", ToNullable "to-nullable", ToNotNullable "to-not-nullable",
    Fst "fst", Snd "snd",
    StringLength "string-length", ListLength "list-length",
    RemSize "rem-size", ReadByte "read-byte",
    DataPtrPush "data-ptr-push", DataPtrPop "data-ptr-pop",
    DerefValuePtr "deref-value-ptr",
    ValuePtrOpen "value-ptr-open", ValuePtrNext "value-ptr-next",
    ValuePtrClose "value-ptr-close",
    Dump "dump", Ignore "ignore",
);

op_tags!(BinOp,
    Gt "gt", Ge "ge", Eq "eq", Ne "ne",
    Add "add", Sub "sub", Mul "mul", Div "div", Rem "rem",
    LogAnd "log-and", LogOr "log-or", LogXor "log-xor",
    LeftShift "left-shift", RightShift "right-shift",
    And "and", Or "or",
    AppendBytes "append-bytes", AppendByte "append-byte",
    AppendString "append-string",
    TestBit "test-bit",
    ReadBytes "read-bytes", PeekByte "peek-byte",
    WriteByte "write-byte", WriteBytes "write-bytes", PokeByte "poke-byte",
    DataPtrAdd "data-ptr-add", DataPtrSub "data-ptr-sub",
    Coalesce "coalesce", Pair "pair", MapPair "map-pair",
);

impl UnOp {
    /// Target scalar of a `ToX` integer conversion.
    pub fn int_conv_target(self) -> Option<Scalar> {
        use UnOp::*;
        Some(match self {
            ToU8 => Scalar::U8, ToU16 => Scalar::U16, ToU24 => Scalar::U24,
            ToU32 => Scalar::U32, ToU40 => Scalar::U40, ToU48 => Scalar::U48,
            ToU56 => Scalar::U56, ToU64 => Scalar::U64, ToU128 => Scalar::U128,
            ToI8 => Scalar::I8, ToI16 => Scalar::I16, ToI24 => Scalar::I24,
            ToI32 => Scalar::I32, ToI40 => Scalar::I40, ToI48 => Scalar::I48,
            ToI56 => Scalar::I56, ToI64 => Scalar::I64, ToI128 => Scalar::I128,
            _ => return None,
        })
    }

    /// Target scalar of a string-to-numeric parser.
    pub fn parse_target(self) -> Option<Scalar> {
        use UnOp::*;
        Some(match self {
            FloatOfString => Scalar::Float,
            U8OfString => Scalar::U8, U16OfString => Scalar::U16,
            U24OfString => Scalar::U24, U32OfString => Scalar::U32,
            U40OfString => Scalar::U40, U48OfString => Scalar::U48,
            U56OfString => Scalar::U56, U64OfString => Scalar::U64,
            U128OfString => Scalar::U128,
            I8OfString => Scalar::I8, I16OfString => Scalar::I16,
            I24OfString => Scalar::I24, I32OfString => Scalar::I32,
            I40OfString => Scalar::I40, I48OfString => Scalar::I48,
            I56OfString => Scalar::I56, I64OfString => Scalar::I64,
            I128OfString => Scalar::I128,
            _ => return None,
        })
    }

    /// The `X` in an `XOfY` word-size cast and the `Y` it takes, as IR
    /// types.
    pub fn cast_types(self) -> Option<(Type, Type)> {
        use UnOp::*;
        Some(match self {
            ByteOfU8 => (Type::Byte, Type::u8()),
            U8OfByte => (Type::u8(), Type::Byte),
            WordOfU16 => (Type::Word, Type::u16()),
            U16OfWord => (Type::u16(), Type::Word),
            DWordOfU32 => (Type::DWord, Type::u32()),
            U32OfDWord => (Type::u32(), Type::DWord),
            QWordOfU64 => (Type::QWord, Type::u64()),
            U64OfQWord => (Type::u64(), Type::QWord),
            OWordOfU128 => (Type::OWord, Type::u128()),
            U128OfOWord => (Type::u128(), Type::OWord),
            FloatOfQWord => (Type::float(), Type::QWord),
            QWordOfFloat => (Type::QWord, Type::float()),
            SizeOfU32 => (Type::Size, Type::u32()),
            U32OfSize => (Type::u32(), Type::Size),
            BitOfBool => (Type::Bit, Type::bool_()),
            BoolOfBit => (Type::bool_(), Type::Bit),
            CharOfU8 => (Type::char_(), Type::u8()),
            U8OfChar => (Type::u8(), Type::char_()),
            _ => return None,
        })
    }
}

/// Allocator of function identifiers, owned by a backend state (or a
/// test); strictly monotonic so no two live lambdas share an id.
#[derive(Debug, Default)]
pub struct FidGen(u32);

impl FidGen {
    pub fn new() -> Self {
        FidGen(0)
    }

    pub fn fresh(&mut self) -> u32 {
        let fid = self.0;
        self.0 += 1;
        fid
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// The missing value of the named inner type; has type
    /// `Value(Nullable(vt))`.
    Null(ValueType),
    Bool(bool),
    Char(char),
    Float(f64),
    Str(String),
    U8(u8), U16(u16), U24(u32), U32(u32), U40(u64),
    U48(u64), U56(u64), U64(u64), U128(u128),
    I8(i8), I16(i16), I24(i32), I32(i32), I40(i64),
    I48(i64), I56(i64), I64(i64), I128(i128),
    Bit(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    QWord(u64),
    OWord(u128),
    Size(usize),
    Bytes(Vec<u8>),
    /// A readable byte stream over literal contents.
    DataPtrOfString(String),
    /// A writable byte stream over an n-byte buffer.
    DataPtrOfBuffer(usize),
    /// A fresh heap cell for a value of the given schema.
    AllocValue(MaybeNullable),
    Identifier(String),
    /// The i-th parameter of the lambda with the given function id.
    Param(u32, u32),
    /// Ordered evaluation; value of the last.
    Seq(Vec<Expr>),
    Function {
        fid: u32,
        params: Vec<Type>,
        body: Box<Expr>,
    },
    /// Within `body`, `Identifier(name)` resolves to `value`; outer
    /// bindings of the same name are shadowed.
    Let {
        name: String,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Read the heap slot the cursor is at; the path gives its static
    /// type.
    GetField(Path, Box<Expr>),
    FieldIsNull(Path, Box<Expr>),
    SetFieldNull(Path, Box<Expr>),
    /// `SetField(path, vptr, v)` writes `v` into the slot the cursor is
    /// at and returns the pointer.
    SetField(Path, Box<Expr>, Box<Expr>),
    GetSumLabel(Path, Box<Expr>),
    SetSumLabel(Path, Box<Expr>, Box<Expr>),
    Choose {
        cond: Box<Expr>,
        then_: Box<Expr>,
        else_: Box<Expr>,
    },
    /// While `cond(acc)`, `acc = body(acc)`.
    LoopWhile {
        cond: Box<Expr>,
        body: Box<Expr>,
        init: Box<Expr>,
    },
    /// `acc = body(acc)`, repeated while `cond(acc)`.
    LoopUntil {
        body: Box<Expr>,
        cond: Box<Expr>,
        init: Box<Expr>,
    },
    SetBit(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `BlitByte(ptr, byte, count)` writes `byte` `count` times.
    BlitByte(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Reads bytes while `cond(byte)`, folding them with
    /// `reduce(acc, byte)`; yields `Pair(acc, ptr)` with the pointer on
    /// the first byte that did not match.
    ReadWhile {
        cond: Box<Expr>,
        reduce: Box<Expr>,
        init: Box<Expr>,
        pos: Box<Expr>,
    },
    /// `acc = body(i, acc)` for i in from..to.
    Repeat {
        from: Box<Expr>,
        to: Box<Expr>,
        body: Box<Expr>,
        init: Box<Expr>,
    },
    ReadWord(Endianness, Box<Expr>),
    ReadDWord(Endianness, Box<Expr>),
    ReadQWord(Endianness, Box<Expr>),
    ReadOWord(Endianness, Box<Expr>),
    WriteWord(Endianness, Box<Expr>, Box<Expr>),
    WriteDWord(Endianness, Box<Expr>, Box<Expr>),
    WriteQWord(Endianness, Box<Expr>, Box<Expr>),
    WriteOWord(Endianness, Box<Expr>, Box<Expr>),
    PeekWord(Endianness, Box<Expr>, Box<Expr>),
    PeekDWord(Endianness, Box<Expr>, Box<Expr>),
    PeekQWord(Endianness, Box<Expr>, Box<Expr>),
    PeekOWord(Endianness, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Identifier(name.into())
    }

    pub fn let_(name: impl Into<String>, value: Expr, body: Expr) -> Expr {
        Expr::Let {
            name: name.into(),
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    pub fn choose(cond: Expr, then_: Expr, else_: Expr) -> Expr {
        Expr::Choose {
            cond: Box::new(cond),
            then_: Box::new(then_),
            else_: Box::new(else_),
        }
    }

    pub fn un(op: UnOp, e: Expr) -> Expr {
        Expr::Unary(op, Box::new(e))
    }

    pub fn bin(op: BinOp, a: Expr, b: Expr) -> Expr {
        Expr::Binary(op, Box::new(a), Box::new(b))
    }

    pub fn pair(a: Expr, b: Expr) -> Expr {
        Expr::bin(BinOp::Pair, a, b)
    }

    pub fn fst(self) -> Expr {
        Expr::un(UnOp::Fst, self)
    }

    pub fn snd(self) -> Expr {
        Expr::un(UnOp::Snd, self)
    }

    pub fn eq(a: Expr, b: Expr) -> Expr {
        Expr::bin(BinOp::Eq, a, b)
    }

    pub fn add(a: Expr, b: Expr) -> Expr {
        Expr::bin(BinOp::Add, a, b)
    }

    pub fn ptr_add(ptr: Expr, n: usize) -> Expr {
        Expr::bin(BinOp::DataPtrAdd, ptr, Expr::Size(n))
    }

    pub fn func(fid: u32, params: Vec<Type>, body: Expr) -> Expr {
        Expr::Function { fid, params, body: Box::new(body) }
    }

    /// Immediate children, binders included.
    pub fn children(&self) -> Vec<&Expr> {
        use Expr::*;
        match self {
            Null(_) | Bool(_) | Char(_) | Float(_) | Str(_)
            | U8(_) | U16(_) | U24(_) | U32(_) | U40(_)
            | U48(_) | U56(_) | U64(_) | U128(_)
            | I8(_) | I16(_) | I24(_) | I32(_) | I40(_)
            | I48(_) | I56(_) | I64(_) | I128(_)
            | Bit(_) | Byte(_) | Word(_) | DWord(_) | QWord(_) | OWord(_)
            | Size(_) | Bytes(_)
            | DataPtrOfString(_) | DataPtrOfBuffer(_) | AllocValue(_)
            | Identifier(_) | Param(..) => vec![],
            Seq(es) => es.iter().collect(),
            Function { body, .. } => vec![&**body],
            Let { value, body, .. } => vec![&**value, &**body],
            Unary(_, a)
            | GetField(_, a) | FieldIsNull(_, a) | SetFieldNull(_, a)
            | GetSumLabel(_, a)
            | ReadWord(_, a) | ReadDWord(_, a) | ReadQWord(_, a)
            | ReadOWord(_, a) => vec![&**a],
            Binary(_, a, b)
            | SetField(_, a, b) | SetSumLabel(_, a, b)
            | WriteWord(_, a, b) | WriteDWord(_, a, b)
            | WriteQWord(_, a, b) | WriteOWord(_, a, b)
            | PeekWord(_, a, b) | PeekDWord(_, a, b)
            | PeekQWord(_, a, b) | PeekOWord(_, a, b) => vec![&**a, &**b],
            Choose { cond, then_, else_ } => vec![&**cond, &**then_, &**else_],
            LoopWhile { cond, body, init } => vec![&**cond, &**body, &**init],
            LoopUntil { body, cond, init } => vec![&**body, &**cond, &**init],
            SetBit(a, b, c) | BlitByte(a, b, c) => vec![&**a, &**b, &**c],
            ReadWhile { cond, reduce, init, pos } => {
                vec![&**cond, &**reduce, &**init, &**pos]
            }
            Repeat { from, to, body, init } => {
                vec![&**from, &**to, &**body, &**init]
            }
        }
    }

    /// Identifiers and params not bound within this expression. Backends
    /// only accept expressions where both sets are empty.
    pub fn free_variables(&self) -> (HashSet<String>, HashSet<(u32, u32)>) {
        let mut idents = HashSet::new();
        let mut params = HashSet::new();
        let mut names = Vec::new();
        let mut fids = Vec::new();
        self.collect_free(&mut names, &mut fids, &mut idents, &mut params);
        (idents, params)
    }

    fn collect_free(
        &self,
        names: &mut Vec<String>,
        fids: &mut Vec<u32>,
        idents: &mut HashSet<String>,
        params: &mut HashSet<(u32, u32)>,
    ) {
        match self {
            Expr::Identifier(name) => {
                if !names.iter().any(|n| n == name) {
                    idents.insert(name.clone());
                }
            }
            Expr::Param(fid, i) => {
                if !fids.contains(fid) {
                    params.insert((*fid, *i));
                }
            }
            Expr::Let { name, value, body } => {
                value.collect_free(names, fids, idents, params);
                names.push(name.clone());
                body.collect_free(names, fids, idents, params);
                names.pop();
            }
            Expr::Function { fid, body, .. } => {
                fids.push(*fid);
                body.collect_free(names, fids, idents, params);
                fids.pop();
            }
            _ => {
                for child in self.children() {
                    child.collect_free(names, fids, idents, params);
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_variable_tracking() {
        let closed = Expr::let_(
            "x",
            Expr::U8(1),
            Expr::add(Expr::ident("x"), Expr::ident("x")),
        );
        let (idents, params) = closed.free_variables();
        assert!(idents.is_empty() && params.is_empty());

        let open = Expr::add(Expr::ident("x"), Expr::Param(4, 0));
        let (idents, params) = open.free_variables();
        assert!(idents.contains("x"));
        assert!(params.contains(&(4, 0)));

        let lambda = Expr::func(4, vec![Type::u8()], open);
        let (idents, params) = lambda.free_variables();
        assert!(idents.contains("x"));
        assert!(params.is_empty());
    }

    #[test]
    fn fid_gen_is_monotonic() {
        let mut gen = FidGen::new();
        let a = gen.fresh();
        let b = gen.fresh();
        assert!(b > a);
    }
}
