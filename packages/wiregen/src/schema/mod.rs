//! The schema algebra: the closed inductive description of serializable
//! types, with nullability, user-defined refinements, and paths for
//! addressing sub-fields.
//!
//! A schema is exchanged as text (see [`parse`]) and printed back through
//! `Display`; `parse(print(mn)) == mn` for every constructible schema.

mod parse;
mod path;
mod user;

pub use parse::parse_schema;
pub use path::Path;
pub use user::{UserType, register_user_type, find_user_type};

use crate::error::{Result, ensure, bail};
use sha2::{Digest, Sha256};
use std::fmt::{self, Formatter, Display};


/// One of the fixed machine scalars. Odd integer widths are first-class
/// and must round-trip through every codec exactly.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Scalar {
    Bool,
    Char,
    /// IEEE-754 double.
    Float,
    Str,
    U8, U16, U24, U32, U40, U48, U56, U64, U128,
    I8, I16, I24, I32, I40, I48, I56, I64, I128,
}

macro_rules! scalar_tables {
    ($($v:ident $text:literal signed $s:literal bits $b:literal,)*)=>{
        impl Scalar {
            pub fn display_str(self) -> &'static str {
                match self {
                    $( Scalar::$v => $text, )*
                }
            }

            /// Bit width of the integer scalars, `None` for the rest.
            pub fn int_bits(self) -> Option<u32> {
                match self {
                    $( Scalar::$v => if $b > 0 { Some($b) } else { None }, )*
                }
            }

            pub fn is_signed_int(self) -> bool {
                match self {
                    $( Scalar::$v => $s && $b > 0, )*
                }
            }
        }
    };
}

scalar_tables!(
    Bool "bool" signed false bits 0u32,
    Char "char" signed false bits 0u32,
    Float "float" signed true bits 0u32,
    Str "string" signed false bits 0u32,
    U8 "u8" signed false bits 8u32,
    U16 "u16" signed false bits 16u32,
    U24 "u24" signed false bits 24u32,
    U32 "u32" signed false bits 32u32,
    U40 "u40" signed false bits 40u32,
    U48 "u48" signed false bits 48u32,
    U56 "u56" signed false bits 56u32,
    U64 "u64" signed false bits 64u32,
    U128 "u128" signed false bits 128u32,
    I8 "i8" signed true bits 8u32,
    I16 "i16" signed true bits 16u32,
    I24 "i24" signed true bits 24u32,
    I32 "i32" signed true bits 32u32,
    I40 "i40" signed true bits 40u32,
    I48 "i48" signed true bits 48u32,
    I56 "i56" signed true bits 56u32,
    I64 "i64" signed true bits 64u32,
    I128 "i128" signed true bits 128u32,
);

impl Scalar {
    pub fn is_int(self) -> bool {
        self.int_bits().is_some()
    }

    /// Every integer scalar, unsigned widths first.
    pub const INTS: [Scalar; 18] = [
        Scalar::U8, Scalar::U16, Scalar::U24, Scalar::U32, Scalar::U40,
        Scalar::U48, Scalar::U56, Scalar::U64, Scalar::U128,
        Scalar::I8, Scalar::I16, Scalar::I24, Scalar::I32, Scalar::I40,
        Scalar::I48, Scalar::I56, Scalar::I64, Scalar::I128,
    ];
}

/// A serializable type, before the nullability bit is attached.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ValueType {
    Scalar(Scalar),
    /// A registered user type. Equality is by name; the catalogue is
    /// write-once so equal names imply equal defs.
    Usr(&'static UserType),
    /// Fixed-dimension array, dimension ≥ 1.
    Vec(usize, Box<MaybeNullable>),
    /// Variable-length sequence.
    List(Box<MaybeNullable>),
    /// Heterogeneous positional product, arity ≥ 1.
    Tup(Vec<MaybeNullable>),
    /// Named product; field names unique.
    Rec(Vec<RecField>),
    /// Tagged union; labels unique, serialized as U16 ordinals.
    Sum(Vec<SumAlt>),
    /// Declared for type expressions only; no runtime values exist.
    Map(Box<MaybeNullable>, Box<MaybeNullable>),
}

/// Item in `ValueType::Rec`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RecField {
    pub name: String,
    pub mn: MaybeNullable,
}

impl<S: Into<String>> From<(S, MaybeNullable)> for RecField {
    fn from((name, mn): (S, MaybeNullable)) -> Self {
        RecField { name: name.into(), mn }
    }
}

/// Item in `ValueType::Sum`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SumAlt {
    pub label: String,
    pub mn: MaybeNullable,
}

impl<S: Into<String>> From<(S, MaybeNullable)> for SumAlt {
    fn from((label, mn): (S, MaybeNullable)) -> Self {
        SumAlt { label: label.into(), mn }
    }
}

/// A value-type plus its nullability bit. Nullability only means
/// something at a codec boundary; arithmetic erases it.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum MaybeNullable {
    Nullable(ValueType),
    NotNullable(ValueType),
}

impl ValueType {
    pub fn nullable(self) -> MaybeNullable {
        MaybeNullable::Nullable(self)
    }

    pub fn not_nullable(self) -> MaybeNullable {
        MaybeNullable::NotNullable(self)
    }

    /// The type navigation sees: user types are entered through their def.
    pub fn resolved(&self) -> &ValueType {
        match self {
            ValueType::Usr(u) => u.def.resolved(),
            vt => vt,
        }
    }

    /// Check the structural invariants, recursively: vector dimensions,
    /// tuple arity, unique record names and sum labels.
    pub fn check(&self) -> Result<()> {
        match self {
            ValueType::Scalar(_) => Ok(()),
            // checked at registration
            ValueType::Usr(_) => Ok(()),
            ValueType::Vec(dim, mn) => {
                ensure!(*dim >= 1, Schema, "vector dimension must be >= 1");
                mn.check()
            }
            ValueType::List(mn) => mn.check(),
            ValueType::Tup(mns) => {
                ensure!(!mns.is_empty(), Schema, "empty tuple");
                mns.iter().try_for_each(|mn| mn.check())
            }
            ValueType::Rec(fields) => {
                ensure!(!fields.is_empty(), Schema, "empty record");
                for (i, field) in fields.iter().enumerate() {
                    if fields[..i].iter().any(|f| f.name == field.name) {
                        bail!(Schema, "duplicate record field {:?}", field.name);
                    }
                    field.mn.check()?;
                }
                Ok(())
            }
            ValueType::Sum(alts) => {
                ensure!(!alts.is_empty(), Schema, "empty sum");
                ensure!(
                    alts.len() <= u16::MAX as usize + 1,
                    Schema, "too many sum alternatives for a u16 label",
                );
                for (i, alt) in alts.iter().enumerate() {
                    if alts[..i].iter().any(|a| a.label == alt.label) {
                        bail!(Schema, "duplicate sum label {:?}", alt.label);
                    }
                    alt.mn.check()?;
                }
                Ok(())
            }
            ValueType::Map(key, value) => {
                key.check()?;
                value.check()
            }
        }
    }
}

impl MaybeNullable {
    pub fn vtype(&self) -> &ValueType {
        match self {
            MaybeNullable::Nullable(vt) => vt,
            MaybeNullable::NotNullable(vt) => vt,
        }
    }

    pub fn into_vtype(self) -> ValueType {
        match self {
            MaybeNullable::Nullable(vt) => vt,
            MaybeNullable::NotNullable(vt) => vt,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, MaybeNullable::Nullable(_))
    }

    /// Same value-type with the nullable bit forced off.
    pub fn to_not_nullable(&self) -> MaybeNullable {
        MaybeNullable::NotNullable(self.vtype().clone())
    }

    pub fn check(&self) -> Result<()> {
        self.vtype().check()
    }

    /// Sha-256 of the canonical printed schema text. Backends salt their
    /// default declaration names with a prefix of this.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        hasher.finalize().into()
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.display_str())
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ValueType::Scalar(s) => Display::fmt(s, f),
            ValueType::Usr(u) => f.write_str(&u.name),
            ValueType::Vec(dim, mn) => write!(f, "{}[{}]", mn, dim),
            ValueType::List(mn) => write!(f, "{}[]", mn),
            ValueType::Tup(mns) => {
                f.write_str("(")?;
                for (i, mn) in mns.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    Display::fmt(mn, f)?;
                }
                f.write_str(")")
            }
            ValueType::Rec(fields) => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}: {}", field.name, field.mn)?;
                }
                f.write_str("}")
            }
            ValueType::Sum(alts) => {
                f.write_str("[")?;
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{}: {}", alt.label, alt.mn)?;
                }
                f.write_str("]")
            }
            ValueType::Map(key, value) => write!(f, "{}[{}]", value, key),
        }
    }
}

impl Display for MaybeNullable {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            MaybeNullable::Nullable(vt) => write!(f, "{}?", vt),
            MaybeNullable::NotNullable(vt) => Display::fmt(vt, f),
        }
    }
}


#[test]
fn scalar_tables_consistent() {
    for s in Scalar::INTS {
        assert!(s.is_int());
        assert!(s.int_bits().unwrap() % 8 == 0);
    }
    assert!(!Scalar::Float.is_int());
    assert!(Scalar::I24.is_signed_int());
    assert!(!Scalar::U24.is_signed_int());
}

#[test]
fn invariants_checked() {
    use Scalar::*;
    let u8_ = ValueType::Scalar(U8).not_nullable();
    assert!(ValueType::Vec(0, Box::new(u8_.clone())).check().is_err());
    assert!(ValueType::Tup(vec![]).check().is_err());
    let dup = ValueType::Rec(vec![
        ("a", u8_.clone()).into(),
        ("a", u8_.clone()).into(),
    ]);
    assert!(dup.check().is_err());
    let ok = ValueType::Rec(vec![
        ("a", u8_.clone()).into(),
        ("b", ValueType::Scalar(U8).nullable()).into(),
    ]);
    assert!(ok.check().is_ok());
}
