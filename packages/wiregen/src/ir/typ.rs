//! IR types. `Value` wraps a schema term; the rest are the low-level
//! carriers generated code threads around.

use crate::schema::{MaybeNullable, Scalar, ValueType};
use std::fmt::{self, Formatter, Display};


#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Type {
    /// A (possibly nullable) schema-shaped value.
    Value(MaybeNullable),
    Void,
    /// Cursor into a byte stream.
    DataPtr,
    /// Cursor into an in-memory value of the given schema.
    ValuePtr(MaybeNullable),
    /// A byte count.
    Size,
    Bit,
    Byte,
    /// 16 bits.
    Word,
    /// 32 bits.
    DWord,
    /// 64 bits.
    QWord,
    /// 128 bits.
    OWord,
    /// A shared byte range.
    Bytes,
    Pair(Box<Type>, Box<Type>),
    Function(Vec<Type>, Box<Type>),
}

macro_rules! scalar_shorthands {
    ($($m:ident($s:ident),)*)=>{$(
        pub fn $m() -> Type {
            Type::Value(MaybeNullable::NotNullable(ValueType::Scalar(Scalar::$s)))
        }
    )*};
}

impl Type {
    scalar_shorthands!(
        bool_(Bool), char_(Char), float(Float), string(Str),
        u8(U8), u16(U16), u24(U24), u32(U32), u40(U40),
        u48(U48), u56(U56), u64(U64), u128(U128),
        i8(I8), i16(I16), i24(I24), i32(I32), i40(I40),
        i48(I48), i56(I56), i64(I64), i128(I128),
    );

    pub fn value_of(scalar: Scalar) -> Type {
        Type::Value(MaybeNullable::NotNullable(ValueType::Scalar(scalar)))
    }

    pub fn pair(fst: Type, snd: Type) -> Type {
        Type::Pair(Box::new(fst), Box::new(snd))
    }

    pub fn func(params: Vec<Type>, ret: Type) -> Type {
        Type::Function(params, Box::new(ret))
    }

    /// The not-nullable scalar behind a `Value`, if that is what this is.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Type::Value(MaybeNullable::NotNullable(ValueType::Scalar(s))) => Some(*s),
            _ => None,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Type::Value(mn) => write!(f, "(value {:?})", mn.to_string()),
            Type::Void => f.write_str("void"),
            Type::DataPtr => f.write_str("dataptr"),
            Type::ValuePtr(mn) => write!(f, "(valueptr {:?})", mn.to_string()),
            Type::Size => f.write_str("size"),
            Type::Bit => f.write_str("bit"),
            Type::Byte => f.write_str("byte"),
            Type::Word => f.write_str("word"),
            Type::DWord => f.write_str("dword"),
            Type::QWord => f.write_str("qword"),
            Type::OWord => f.write_str("oword"),
            Type::Bytes => f.write_str("bytes"),
            Type::Pair(fst, snd) => write!(f, "(pair {} {})", fst, snd),
            Type::Function(params, ret) => {
                f.write_str("(function (")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    Display::fmt(param, f)?;
                }
                write!(f, ") {})", ret)
            }
        }
    }
}
