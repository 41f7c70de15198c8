//! The S-expression reference codec.
//!
//! Compounds are parenthesised and space-separated. Lists carry a decimal
//! element count and a separator byte when `list_prefix_length` is set
//! (the default); otherwise they are terminated by their closing
//! parenthesis. Booleans are the single bytes `T`/`F`; strings and chars
//! are double-quoted; `null` is the literal four bytes; sums are
//! `(label value)` with a decimal u16 label.

use crate::codec::{Des, ListStart, Ser};
use crate::error::{Result, bail};
use crate::ir::expr::{BinOp, Expr, FidGen, UnOp};
use crate::ir::typ::Type;
use crate::schema::{MaybeNullable, Path, Scalar, ValueType};
use serde::{Serialize, Deserialize};


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SExprConfig {
    /// Prefix every list with its decimal element count and one
    /// separator byte. Off, lists are closed by `)` alone.
    pub list_prefix_length: bool,
    /// The byte between the count prefix and the opening parenthesis.
    pub list_prefix_separator: u8,
}

impl Default for SExprConfig {
    fn default() -> Self {
        SExprConfig {
            list_prefix_length: true,
            list_prefix_separator: b' ',
        }
    }
}

#[derive(Debug, Default)]
pub struct SExprDes {
    cfg: SExprConfig,
}

#[derive(Debug, Default)]
pub struct SExprSer {
    cfg: SExprConfig,
}

impl SExprDes {
    pub fn new(cfg: SExprConfig) -> Self {
        SExprDes { cfg }
    }
}

impl SExprSer {
    pub fn new(cfg: SExprConfig) -> Self {
        SExprSer { cfg }
    }
}

/// The string parser for each numeric scalar.
fn of_string_op(scalar: Scalar) -> UnOp {
    match scalar {
        Scalar::Float => UnOp::FloatOfString,
        Scalar::U8 => UnOp::U8OfString,
        Scalar::U16 => UnOp::U16OfString,
        Scalar::U24 => UnOp::U24OfString,
        Scalar::U32 => UnOp::U32OfString,
        Scalar::U40 => UnOp::U40OfString,
        Scalar::U48 => UnOp::U48OfString,
        Scalar::U56 => UnOp::U56OfString,
        Scalar::U64 => UnOp::U64OfString,
        Scalar::U128 => UnOp::U128OfString,
        Scalar::I8 => UnOp::I8OfString,
        Scalar::I16 => UnOp::I16OfString,
        Scalar::I24 => UnOp::I24OfString,
        Scalar::I32 => UnOp::I32OfString,
        Scalar::I40 => UnOp::I40OfString,
        Scalar::I48 => UnOp::I48OfString,
        Scalar::I56 => UnOp::I56OfString,
        Scalar::I64 => UnOp::I64OfString,
        Scalar::I128 => UnOp::I128OfString,
        s => unreachable!("{} is not numeric", s),
    }
}

/// `Pair(bytes, ptr)` folding every byte that is a digit or one of
/// `extra`.
fn fold_number_bytes(g: &mut FidGen, extra: &[u8], src: Expr) -> Expr {
    let cond_fid = g.fresh();
    let b = Expr::Param(cond_fid, 0);
    let digit = Expr::bin(
        BinOp::And,
        Expr::bin(BinOp::Ge, b.clone(), Expr::Byte(b'0')),
        Expr::bin(BinOp::Ge, Expr::Byte(b'9'), b.clone()),
    );
    let cond_body = extra.iter().fold(digit, |acc, &c| {
        Expr::bin(BinOp::Or, acc, Expr::eq(b.clone(), Expr::Byte(c)))
    });
    let reduce_fid = g.fresh();
    Expr::ReadWhile {
        cond: Box::new(Expr::func(
            cond_fid,
            vec![Type::Byte],
            cond_body,
        )),
        reduce: Box::new(Expr::func(
            reduce_fid,
            vec![Type::Bytes, Type::Byte],
            Expr::bin(
                BinOp::AppendByte,
                Expr::Param(reduce_fid, 0),
                Expr::Param(reduce_fid, 1),
            ),
        )),
        init: Box::new(Expr::Bytes(vec![])),
        pos: Box::new(src),
    }
}

/// `Pair(value, ptr)` for one decimal number.
fn read_number(g: &mut FidGen, scalar: Scalar, src: Expr) -> Expr {
    let extra: &[u8] = match scalar {
        Scalar::Float => b"-+.eEinfaN",
        s if s.is_signed_int() => b"-",
        _ => b"",
    };
    let folded = fold_number_bytes(g, extra, src);
    Expr::let_(
        "num",
        folded,
        Expr::pair(
            Expr::un(
                of_string_op(scalar),
                Expr::un(UnOp::StringOfBytes, Expr::ident("num").fst()),
            ),
            Expr::ident("num").snd(),
        ),
    )
}

fn write_literal(dst: Expr, bytes: &[u8]) -> Expr {
    Expr::bin(BinOp::WriteBytes, dst, Expr::Bytes(bytes.to_vec()))
}

/// The decimal rendering of an integer value.
fn write_number(v: Expr, dst: Expr) -> Expr {
    Expr::bin(
        BinOp::WriteBytes,
        dst,
        Expr::un(UnOp::BytesOfString, Expr::un(UnOp::StringOfInt, v)),
    )
}

fn write_byte(dst: Expr, b: u8) -> Expr {
    Expr::bin(BinOp::WriteByte, dst, Expr::Byte(b))
}

macro_rules! sexpr_des_ints {
    ($($m:ident($s:ident),)*)=>{$(
        fn $m(
            &mut self,
            g: &mut FidGen,
            _root: &MaybeNullable,
            _path: &Path,
            src: Expr,
        ) -> Expr {
            read_number(g, Scalar::$s, src)
        }
    )*};
}

impl Des for SExprDes {
    sexpr_des_ints!(
        du8(U8), du16(U16), du24(U24), du32(U32), du40(U40),
        du48(U48), du56(U56), du64(U64), du128(U128),
        di8(I8), di16(I16), di24(I24), di32(I32), di40(I40),
        di48(I48), di56(I56), di64(I64), di128(I128),
    );

    fn dfloat(&mut self, g: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        read_number(g, Scalar::Float, src)
    }

    fn dbool(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::let_(
            "tf",
            Expr::un(UnOp::ReadByte, src),
            Expr::pair(
                Expr::eq(Expr::ident("tf").fst(), Expr::Byte(b'T')),
                Expr::ident("tf").snd(),
            ),
        )
    }

    fn dchar(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::let_(
            "qc",
            Expr::un(UnOp::ReadByte, Expr::ptr_add(src, 1)),
            Expr::pair(
                Expr::un(UnOp::CharOfU8, Expr::un(UnOp::U8OfByte, Expr::ident("qc").fst())),
                Expr::ptr_add(Expr::ident("qc").snd(), 1),
            ),
        )
    }

    fn dstring(&mut self, g: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        // embedded quotes are not escaped; the reader stops at the first
        // one. TODO: escape embedded double quotes and teach this reader
        // the escape.
        let cond_fid = g.fresh();
        let reduce_fid = g.fresh();
        let folded = Expr::ReadWhile {
            cond: Box::new(Expr::func(
                cond_fid,
                vec![Type::Byte],
                Expr::bin(
                    BinOp::Ne,
                    Expr::Param(cond_fid, 0),
                    Expr::Byte(b'"'),
                ),
            )),
            reduce: Box::new(Expr::func(
                reduce_fid,
                vec![Type::Bytes, Type::Byte],
                Expr::bin(
                    BinOp::AppendByte,
                    Expr::Param(reduce_fid, 0),
                    Expr::Param(reduce_fid, 1),
                ),
            )),
            init: Box::new(Expr::Bytes(vec![])),
            pos: Box::new(Expr::ptr_add(src, 1)),
        };
        Expr::let_(
            "qs",
            folded,
            Expr::pair(
                Expr::un(UnOp::StringOfBytes, Expr::ident("qs").fst()),
                Expr::ptr_add(Expr::ident("qs").snd(), 1),
            ),
        )
    }

    fn tup_opn(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn tup_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn tup_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, _: usize, src: Expr) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn rec_opn(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn rec_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn rec_sep(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: &str,
        _: usize,
        src: Expr,
    ) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn vec_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: usize,
        _: &MaybeNullable,
        src: Expr,
    ) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn vec_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn vec_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, _: usize, src: Expr) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn sum_opn(
        &mut self,
        g: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: usize,
        src: Expr,
    ) -> Expr {
        let labelled = read_number(g, Scalar::U16, Expr::ptr_add(src, 1));
        Expr::let_(
            "lab",
            labelled,
            Expr::pair(
                Expr::ident("lab").fst(),
                Expr::ptr_add(Expr::ident("lab").snd(), 1),
            ),
        )
    }

    fn sum_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn list_opn(
        &mut self,
        g: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: &MaybeNullable,
        src: Expr,
    ) -> ListStart {
        if self.cfg.list_prefix_length {
            let counted = read_number(g, Scalar::U32, src);
            // past the count: the separator byte, then the parenthesis
            ListStart::KnownSize(Expr::let_(
                "cnt",
                counted,
                Expr::pair(
                    Expr::ident("cnt").fst(),
                    Expr::ptr_add(Expr::ident("cnt").snd(), 2),
                ),
            ))
        } else {
            ListStart::UnknownSize(Expr::ptr_add(src, 1))
        }
    }

    fn list_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn list_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::ptr_add(src, 1)
    }

    fn is_end_of_list(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::eq(
            Expr::bin(BinOp::PeekByte, src, Expr::Size(0)),
            Expr::Byte(b')'),
        )
    }

    fn is_null(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        let peek = |off: usize| Expr::bin(
            BinOp::PeekByte, src.clone(), Expr::Size(off),
        );
        let word = Expr::bin(
            BinOp::And,
            Expr::eq(peek(0), Expr::Byte(b'n')),
            Expr::bin(
                BinOp::And,
                Expr::eq(peek(1), Expr::Byte(b'u')),
                Expr::bin(
                    BinOp::And,
                    Expr::eq(peek(2), Expr::Byte(b'l')),
                    Expr::eq(peek(3), Expr::Byte(b'l')),
                ),
            ),
        );
        // the byte at offset 4 must be absent, a space, or a closer
        let boundary = Expr::bin(
            BinOp::Or,
            Expr::eq(Expr::un(UnOp::RemSize, src.clone()), Expr::Size(4)),
            Expr::bin(
                BinOp::Or,
                Expr::eq(peek(4), Expr::Byte(b' ')),
                Expr::eq(peek(4), Expr::Byte(b')')),
            ),
        );
        Expr::bin(
            BinOp::And,
            Expr::bin(
                BinOp::Ge,
                Expr::un(UnOp::RemSize, src),
                Expr::Size(4),
            ),
            Expr::bin(BinOp::And, word, boundary),
        )
    }

    fn dnull(
        &mut self,
        _: &mut FidGen,
        _: &ValueType,
        _: &MaybeNullable,
        _: &Path,
        src: Expr,
    ) -> Expr {
        Expr::ptr_add(src, 4)
    }
}

macro_rules! sexpr_ser_ints {
    ($($m:ident,)*)=>{$(
        fn $m(
            &mut self,
            _g: &mut FidGen,
            _root: &MaybeNullable,
            _path: &Path,
            v: Expr,
            dst: Expr,
        ) -> Expr {
            write_number(v, dst)
        }
    )*};
}

impl Ser for SExprSer {
    sexpr_ser_ints!(
        su8, su16, su24, su32, su40, su48, su56, su64, su128,
        si8, si16, si24, si32, si40, si48, si56, si64, si128,
    );

    fn sfloat(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, v: Expr, dst: Expr) -> Expr {
        Expr::bin(
            BinOp::WriteBytes,
            dst,
            Expr::un(UnOp::BytesOfString, Expr::un(UnOp::StringOfFloat, v)),
        )
    }

    fn sbool(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, v: Expr, dst: Expr) -> Expr {
        Expr::bin(
            BinOp::WriteByte,
            dst,
            Expr::choose(v, Expr::Byte(b'T'), Expr::Byte(b'F')),
        )
    }

    fn schar(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, v: Expr, dst: Expr) -> Expr {
        let quoted = write_byte(dst, b'"');
        let written = Expr::bin(
            BinOp::WriteByte,
            quoted,
            Expr::un(UnOp::ByteOfU8, Expr::un(UnOp::U8OfChar, v)),
        );
        write_byte(written, b'"')
    }

    fn sstring(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, v: Expr, dst: Expr) -> Expr {
        // embedded quotes are written as-is, mirroring the reader
        let quoted = write_byte(dst, b'"');
        let written = Expr::bin(
            BinOp::WriteBytes,
            quoted,
            Expr::un(UnOp::BytesOfString, v),
        );
        write_byte(written, b'"')
    }

    fn tup_opn(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        write_byte(dst, b'(')
    }

    fn tup_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        write_byte(dst, b')')
    }

    fn tup_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, _: usize, dst: Expr) -> Expr {
        write_byte(dst, b' ')
    }

    fn rec_opn(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        write_byte(dst, b'(')
    }

    fn rec_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        write_byte(dst, b')')
    }

    fn rec_sep(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: &str,
        _: usize,
        dst: Expr,
    ) -> Expr {
        write_byte(dst, b' ')
    }

    fn vec_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: usize,
        _: &MaybeNullable,
        dst: Expr,
    ) -> Expr {
        write_byte(dst, b'(')
    }

    fn vec_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        write_byte(dst, b')')
    }

    fn vec_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, _: usize, dst: Expr) -> Expr {
        write_byte(dst, b' ')
    }

    fn sum_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: usize,
        label: Expr,
        dst: Expr,
    ) -> Expr {
        write_byte(write_number(label, write_byte(dst, b'(')), b' ')
    }

    fn sum_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        write_byte(dst, b')')
    }

    fn list_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        path: &Path,
        _: &MaybeNullable,
        count: Option<Expr>,
        dst: Expr,
    ) -> Result<Expr> {
        if self.cfg.list_prefix_length {
            let Some(count) = count else {
                bail!(
                    Codec,
                    "length-prefixed lists need a count up front at {}", path,
                );
            };
            let counted = write_number(count, dst);
            let sep = write_byte(counted, self.cfg.list_prefix_separator);
            Ok(write_byte(sep, b'('))
        } else {
            Ok(write_byte(dst, b'('))
        }
    }

    fn list_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        write_byte(dst, b')')
    }

    fn list_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        write_byte(dst, b' ')
    }

    fn snull(
        &mut self,
        _: &mut FidGen,
        _: &ValueType,
        _: &MaybeNullable,
        _: &Path,
        dst: Expr,
    ) -> Expr {
        write_literal(dst, b"null")
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::eval::{eval, RtVal};
    use crate::schema::parse_schema;

    fn des_scalar(scalar: Scalar, input: &str) -> (RtVal, usize) {
        let mut g = FidGen::new();
        let mut des = SExprDes::default();
        let root = parse_schema(scalar.display_str()).unwrap();
        let e = des.dscalar(
            &mut g, scalar, &root, &Path::root(),
            Expr::DataPtrOfString(input.into()),
        );
        let RtVal::Pair(v, ptr) = eval(&e).unwrap() else { panic!() };
        let RtVal::DataPtr(ptr) = *ptr else { panic!() };
        (*v, ptr.rem())
    }

    fn ser_scalar(scalar: Scalar, v: Expr) -> Vec<u8> {
        let mut g = FidGen::new();
        let mut ser = SExprSer::default();
        let root = parse_schema(scalar.display_str()).unwrap();
        let e = ser.sscalar(
            &mut g, scalar, &root, &Path::root(), v,
            Expr::DataPtrOfBuffer(64),
        );
        let RtVal::DataPtr(ptr) = eval(&e).unwrap() else { panic!() };
        ptr.taken()
    }

    #[test]
    fn smallest_scalar() {
        // a u8 zero is the single byte `0`
        assert_eq!(ser_scalar(Scalar::U8, Expr::U8(0)), b"0");
        let (v, rem) = des_scalar(Scalar::U8, "0");
        assert_eq!(v, RtVal::UInt(Scalar::U8, 0));
        assert_eq!(rem, 0);
    }

    #[test]
    fn numbers() {
        assert_eq!(ser_scalar(Scalar::I16, Expr::I16(-42)), b"-42");
        let (v, _) = des_scalar(Scalar::I16, "-42 rest");
        assert_eq!(v, RtVal::SInt(Scalar::I16, -42));
        let (v, _) = des_scalar(Scalar::Float, "1.5)");
        assert_eq!(v, RtVal::Float(1.5));
        assert_eq!(ser_scalar(Scalar::U128, Expr::U128(1 << 126)).len(), 38);
    }

    #[test]
    fn booleans_are_single_bytes() {
        assert_eq!(ser_scalar(Scalar::Bool, Expr::Bool(true)), b"T");
        assert_eq!(ser_scalar(Scalar::Bool, Expr::Bool(false)), b"F");
        let (v, _) = des_scalar(Scalar::Bool, "T");
        assert_eq!(v, RtVal::Bool(true));
    }

    #[test]
    fn strings_and_chars_quote() {
        assert_eq!(ser_scalar(Scalar::Str, Expr::Str("hey".into())), b"\"hey\"");
        let (v, rem) = des_scalar(Scalar::Str, "\"hey\" 1");
        assert_eq!(v, RtVal::Str("hey".into()));
        assert_eq!(rem, 2);
        assert_eq!(ser_scalar(Scalar::Char, Expr::Char('a')), b"\"a\"");
        let (v, _) = des_scalar(Scalar::Char, "\"a\"");
        assert_eq!(v, RtVal::Char('a'));
    }

    #[test]
    fn null_probe() {
        let mut g = FidGen::new();
        let mut des = SExprDes::default();
        let root = parse_schema("u8?").unwrap();
        for (input, want) in [
            ("null", true),
            ("null)", true),
            ("null 3", true),
            ("nullx", false),
            ("nul", false),
            ("642", false),
        ] {
            let e = des.is_null(
                &mut g, &root, &Path::root(),
                Expr::DataPtrOfString(input.into()),
            );
            assert_eq!(
                eval(&e).unwrap(),
                RtVal::Bool(want),
                "probing {:?}", input,
            );
        }
    }

    #[test]
    fn prefixed_list_needs_count() {
        let mut g = FidGen::new();
        let mut ser = SExprSer::default();
        let root = parse_schema("u8[]").unwrap();
        let elem = parse_schema("u8").unwrap();
        assert!(ser.list_opn(
            &mut g, &root, &Path::root(), &elem, None,
            Expr::DataPtrOfBuffer(8),
        ).is_err());
        let mut free = SExprSer::new(SExprConfig {
            list_prefix_length: false,
            ..SExprConfig::default()
        });
        assert!(free.list_opn(
            &mut g, &root, &Path::root(), &elem, None,
            Expr::DataPtrOfBuffer(8),
        ).is_ok());
    }
}
