//! The RowBinary codec: scalars little-endian at their packed width (odd
//! widths over ceil(bits/8) bytes), LEB128 string and list lengths, one
//! null flag byte ahead of nullable values, u16 sum labels. Lists carry
//! their count, so the serializer refuses to open one without it. Every
//! size is predictable from the heap value, so this codec is `SerSized`.

use crate::codec::{Des, ListStart, Ser, SerSized, SSize};
use crate::error::{Result, bail};
use crate::ir::expr::{BinOp, Endianness, Expr, FidGen, UnOp};
use crate::ir::typ::Type;
use crate::schema::{MaybeNullable, Path, Scalar, ValueType};


#[derive(Debug, Default)]
pub struct RowBinaryDes;

#[derive(Debug, Default)]
pub struct RowBinarySer;

/// Unsigned counterpart used for the byte-level packing of a signed
/// width.
fn unsigned_of(scalar: Scalar) -> Scalar {
    match scalar {
        Scalar::I8 => Scalar::U8,
        Scalar::I16 => Scalar::U16,
        Scalar::I24 => Scalar::U24,
        Scalar::I32 => Scalar::U32,
        Scalar::I40 => Scalar::U40,
        Scalar::I48 => Scalar::U48,
        Scalar::I56 => Scalar::U56,
        Scalar::I64 => Scalar::U64,
        Scalar::I128 => Scalar::U128,
        s => s,
    }
}

fn to_op(scalar: Scalar) -> UnOp {
    match scalar {
        Scalar::U8 => UnOp::ToU8,
        Scalar::U16 => UnOp::ToU16,
        Scalar::U24 => UnOp::ToU24,
        Scalar::U32 => UnOp::ToU32,
        Scalar::U40 => UnOp::ToU40,
        Scalar::U48 => UnOp::ToU48,
        Scalar::U56 => UnOp::ToU56,
        Scalar::U64 => UnOp::ToU64,
        Scalar::U128 => UnOp::ToU128,
        Scalar::I8 => UnOp::ToI8,
        Scalar::I16 => UnOp::ToI16,
        Scalar::I24 => UnOp::ToI24,
        Scalar::I32 => UnOp::ToI32,
        Scalar::I40 => UnOp::ToI40,
        Scalar::I48 => UnOp::ToI48,
        Scalar::I56 => UnOp::ToI56,
        Scalar::I64 => UnOp::ToI64,
        Scalar::I128 => UnOp::ToI128,
        s => unreachable!("{} is not an integer", s),
    }
}

/// `Pair(value, ptr)` reading an unsigned integer over its packed byte
/// count, least significant byte first.
fn read_uint(scalar: Scalar, src: Expr) -> Expr {
    let bits = scalar.int_bits().expect("integer scalar");
    match bits {
        8 => Expr::let_(
            "rb",
            Expr::un(UnOp::ReadByte, src),
            Expr::pair(
                Expr::un(UnOp::U8OfByte, Expr::ident("rb").fst()),
                Expr::ident("rb").snd(),
            ),
        ),
        16 => word_read(src, Expr::ReadWord, UnOp::U16OfWord),
        32 => word_read(src, Expr::ReadDWord, UnOp::U32OfDWord),
        64 => word_read(src, Expr::ReadQWord, UnOp::U64OfQWord),
        128 => word_read(src, Expr::ReadOWord, UnOp::U128OfOWord),
        _ => {
            // the odd widths assemble byte by byte
            let nbytes = (bits / 8) as usize;
            let conv = to_op(scalar);
            let byte = |i: usize| Expr::ident(format!("rb{}", i)).fst();
            let mut value = Expr::un(conv, Expr::un(UnOp::U8OfByte, byte(0)));
            for i in 1..nbytes {
                value = Expr::bin(
                    BinOp::LogOr,
                    value,
                    Expr::bin(
                        BinOp::LeftShift,
                        Expr::un(conv, Expr::un(UnOp::U8OfByte, byte(i))),
                        Expr::U8((8 * i) as u8),
                    ),
                );
            }
            let mut body = Expr::pair(
                value,
                Expr::ident(format!("rb{}", nbytes - 1)).snd(),
            );
            for i in (0..nbytes).rev() {
                let from = if i == 0 {
                    src.clone()
                } else {
                    Expr::ident(format!("rb{}", i - 1)).snd()
                };
                body = Expr::let_(
                    format!("rb{}", i),
                    Expr::un(UnOp::ReadByte, from),
                    body,
                );
            }
            body
        }
    }
}

fn word_read(
    src: Expr,
    read: fn(Endianness, Box<Expr>) -> Expr,
    conv: UnOp,
) -> Expr {
    Expr::let_(
        "rw",
        read(Endianness::Little, Box::new(src)),
        Expr::pair(
            Expr::un(conv, Expr::ident("rw").fst()),
            Expr::ident("rw").snd(),
        ),
    )
}

/// The pointer past an unsigned integer written at its packed width.
fn write_uint(scalar: Scalar, v: Expr, dst: Expr) -> Expr {
    let bits = scalar.int_bits().expect("integer scalar");
    match bits {
        8 => Expr::bin(BinOp::WriteByte, dst, Expr::un(UnOp::ByteOfU8, v)),
        16 => Expr::WriteWord(
            Endianness::Little,
            Box::new(dst),
            Box::new(Expr::un(UnOp::WordOfU16, v)),
        ),
        32 => Expr::WriteDWord(
            Endianness::Little,
            Box::new(dst),
            Box::new(Expr::un(UnOp::DWordOfU32, v)),
        ),
        64 => Expr::WriteQWord(
            Endianness::Little,
            Box::new(dst),
            Box::new(Expr::un(UnOp::QWordOfU64, v)),
        ),
        128 => Expr::WriteOWord(
            Endianness::Little,
            Box::new(dst),
            Box::new(Expr::un(UnOp::OWordOfU128, v)),
        ),
        _ => {
            let nbytes = (bits / 8) as usize;
            let mut dst = dst;
            for i in 0..nbytes {
                let byte = Expr::un(
                    UnOp::ByteOfU8,
                    Expr::un(
                        UnOp::ToU8,
                        Expr::bin(
                            BinOp::RightShift,
                            v.clone(),
                            Expr::U8((8 * i) as u8),
                        ),
                    ),
                );
                dst = Expr::bin(BinOp::WriteByte, dst, byte);
            }
            dst
        }
    }
}

/// `Pair(u32, ptr)` decoding one LEB128 length.
pub(crate) fn leb128_read(g: &mut FidGen, src: Expr) -> Expr {
    // state: Pair(Pair(acc, shift), Pair(last byte, ptr))
    let state_t = Type::pair(
        Type::pair(Type::u32(), Type::u8()),
        Type::pair(Type::Byte, Type::DataPtr),
    );
    let body_fid = g.fresh();
    let st = Expr::Param(body_fid, 0);
    let acc = Expr::bin(
        BinOp::LogOr,
        st.clone().fst().fst(),
        Expr::bin(
            BinOp::LeftShift,
            Expr::un(
                UnOp::ToU32,
                Expr::un(
                    UnOp::U8OfByte,
                    Expr::bin(
                        BinOp::LogAnd,
                        Expr::ident("lb").fst(),
                        Expr::Byte(0x7f),
                    ),
                ),
            ),
            st.clone().fst().snd(),
        ),
    );
    let body = Expr::func(
        body_fid,
        vec![state_t.clone()],
        Expr::let_(
            "lb",
            Expr::un(UnOp::ReadByte, st.clone().snd().snd()),
            Expr::pair(
                Expr::pair(
                    acc,
                    Expr::add(st.fst().snd(), Expr::U8(7)),
                ),
                Expr::ident("lb"),
            ),
        ),
    );
    let cond_fid = g.fresh();
    let cond = Expr::func(
        cond_fid,
        vec![state_t],
        Expr::un(
            UnOp::BoolOfBit,
            Expr::bin(
                BinOp::TestBit,
                Expr::Param(cond_fid, 0).snd().fst(),
                Expr::U32(7),
            ),
        ),
    );
    let looped = Expr::LoopUntil {
        body: Box::new(body),
        cond: Box::new(cond),
        init: Box::new(Expr::pair(
            Expr::pair(Expr::U32(0), Expr::U8(0)),
            Expr::pair(Expr::Byte(0), src),
        )),
    };
    Expr::let_(
        "leb",
        looped,
        Expr::pair(
            Expr::ident("leb").fst().fst(),
            Expr::ident("leb").snd().snd(),
        ),
    )
}

/// The pointer past one LEB128-encoded length.
pub(crate) fn leb128_write(g: &mut FidGen, n: Expr, dst: Expr) -> Expr {
    let state_t = Type::pair(Type::u32(), Type::DataPtr);
    let body_fid = g.fresh();
    let st = Expr::Param(body_fid, 0);
    let rest = Expr::bin(BinOp::RightShift, st.clone().fst(), Expr::U8(7));
    let low = Expr::un(
        UnOp::ByteOfU8,
        Expr::un(
            UnOp::ToU8,
            Expr::bin(BinOp::LogAnd, st.clone().fst(), Expr::U32(0x7f)),
        ),
    );
    let tagged = Expr::choose(
        Expr::bin(BinOp::Gt, Expr::ident("more").clone(), Expr::U32(0)),
        Expr::bin(BinOp::LogOr, low.clone(), Expr::Byte(0x80)),
        low,
    );
    let body = Expr::func(
        body_fid,
        vec![state_t.clone()],
        Expr::let_(
            "more",
            rest,
            Expr::pair(
                Expr::ident("more"),
                Expr::bin(BinOp::WriteByte, st.snd(), tagged),
            ),
        ),
    );
    let cond_fid = g.fresh();
    let cond = Expr::func(
        cond_fid,
        vec![state_t],
        Expr::bin(BinOp::Gt, Expr::Param(cond_fid, 0).fst(), Expr::U32(0)),
    );
    Expr::un(
        UnOp::Snd,
        Expr::LoopUntil {
            body: Box::new(body),
            cond: Box::new(cond),
            init: Box::new(Expr::pair(n, dst)),
        },
    )
}

/// The byte count of one LEB128-encoded length, as a `Size`.
fn leb128_size(g: &mut FidGen, n: Expr) -> Expr {
    let state_t = Type::pair(Type::u32(), Type::Size);
    let body_fid = g.fresh();
    let st = Expr::Param(body_fid, 0);
    let body = Expr::func(
        body_fid,
        vec![state_t.clone()],
        Expr::pair(
            Expr::bin(BinOp::RightShift, st.clone().fst(), Expr::U8(7)),
            Expr::add(st.snd(), Expr::Size(1)),
        ),
    );
    let cond_fid = g.fresh();
    let cond = Expr::func(
        cond_fid,
        vec![state_t],
        Expr::bin(BinOp::Gt, Expr::Param(cond_fid, 0).fst(), Expr::U32(0)),
    );
    Expr::un(
        UnOp::Snd,
        Expr::LoopUntil {
            body: Box::new(body),
            cond: Box::new(cond),
            init: Box::new(Expr::pair(n, Expr::Size(0))),
        },
    )
}

macro_rules! rowbinary_des_uints {
    ($($m:ident($s:ident),)*)=>{$(
        fn $m(
            &mut self,
            _g: &mut FidGen,
            _root: &MaybeNullable,
            _path: &Path,
            src: Expr,
        ) -> Expr {
            read_uint(Scalar::$s, src)
        }
    )*};
}

macro_rules! rowbinary_des_sints {
    ($($m:ident($s:ident),)*)=>{$(
        fn $m(
            &mut self,
            _g: &mut FidGen,
            _root: &MaybeNullable,
            _path: &Path,
            src: Expr,
        ) -> Expr {
            // read the packed unsigned bits, then reinterpret
            Expr::let_(
                "sv",
                read_uint(unsigned_of(Scalar::$s), src),
                Expr::pair(
                    Expr::un(to_op(Scalar::$s), Expr::ident("sv").fst()),
                    Expr::ident("sv").snd(),
                ),
            )
        }
    )*};
}

impl Des for RowBinaryDes {
    rowbinary_des_uints!(
        du8(U8), du16(U16), du24(U24), du32(U32), du40(U40),
        du48(U48), du56(U56), du64(U64), du128(U128),
    );

    rowbinary_des_sints!(
        di8(I8), di16(I16), di24(I24), di32(I32), di40(I40),
        di48(I48), di56(I56), di64(I64), di128(I128),
    );

    fn dfloat(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::let_(
            "fq",
            Expr::ReadQWord(Endianness::Little, Box::new(src)),
            Expr::pair(
                Expr::un(UnOp::FloatOfQWord, Expr::ident("fq").fst()),
                Expr::ident("fq").snd(),
            ),
        )
    }

    fn dbool(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::let_(
            "bb",
            Expr::un(UnOp::ReadByte, src),
            Expr::pair(
                Expr::bin(BinOp::Ne, Expr::ident("bb").fst(), Expr::Byte(0)),
                Expr::ident("bb").snd(),
            ),
        )
    }

    fn dchar(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::let_(
            "cb",
            Expr::un(UnOp::ReadByte, src),
            Expr::pair(
                Expr::un(UnOp::CharOfU8, Expr::un(UnOp::U8OfByte, Expr::ident("cb").fst())),
                Expr::ident("cb").snd(),
            ),
        )
    }

    fn dstring(&mut self, g: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::let_(
            "sl",
            leb128_read(g, src),
            Expr::let_(
                "sb",
                Expr::bin(
                    BinOp::ReadBytes,
                    Expr::ident("sl").snd(),
                    Expr::un(UnOp::SizeOfU32, Expr::ident("sl").fst()),
                ),
                Expr::pair(
                    Expr::un(UnOp::StringOfBytes, Expr::ident("sb").fst()),
                    Expr::ident("sb").snd(),
                ),
            ),
        )
    }

    fn sum_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: usize,
        src: Expr,
    ) -> Expr {
        word_read(src, Expr::ReadWord, UnOp::U16OfWord)
    }

    fn list_opn(
        &mut self,
        g: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: &MaybeNullable,
        src: Expr,
    ) -> ListStart {
        ListStart::KnownSize(leb128_read(g, src))
    }

    fn is_null(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::eq(
            Expr::bin(BinOp::PeekByte, src, Expr::Size(0)),
            Expr::Byte(1),
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
        Expr::ptr_add(src, 1)
    }

    fn dnotnull(
        &mut self,
        _: &mut FidGen,
        _: &ValueType,
        _: &MaybeNullable,
        _: &Path,
        src: Expr,
    ) -> Expr {
        Expr::ptr_add(src, 1)
    }
}

macro_rules! rowbinary_ser_uints {
    ($($m:ident($s:ident),)*)=>{$(
        fn $m(
            &mut self,
            _g: &mut FidGen,
            _root: &MaybeNullable,
            _path: &Path,
            v: Expr,
            dst: Expr,
        ) -> Expr {
            write_uint(Scalar::$s, v, dst)
        }
    )*};
}

macro_rules! rowbinary_ser_sints {
    ($($m:ident($s:ident),)*)=>{$(
        fn $m(
            &mut self,
            _g: &mut FidGen,
            _root: &MaybeNullable,
            _path: &Path,
            v: Expr,
            dst: Expr,
        ) -> Expr {
            write_uint(
                unsigned_of(Scalar::$s),
                Expr::un(to_op(unsigned_of(Scalar::$s)), v),
                dst,
            )
        }
    )*};
}

impl Ser for RowBinarySer {
    rowbinary_ser_uints!(
        su8(U8), su16(U16), su24(U24), su32(U32), su40(U40),
        su48(U48), su56(U56), su64(U64), su128(U128),
    );

    rowbinary_ser_sints!(
        si8(I8), si16(I16), si24(I24), si32(I32), si40(I40),
        si48(I48), si56(I56), si64(I64), si128(I128),
    );

    fn sfloat(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, v: Expr, dst: Expr) -> Expr {
        Expr::WriteQWord(
            Endianness::Little,
            Box::new(dst),
            Box::new(Expr::un(UnOp::QWordOfFloat, v)),
        )
    }

    fn sbool(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, v: Expr, dst: Expr) -> Expr {
        Expr::bin(
            BinOp::WriteByte,
            dst,
            Expr::choose(v, Expr::Byte(1), Expr::Byte(0)),
        )
    }

    fn schar(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, v: Expr, dst: Expr) -> Expr {
        Expr::bin(
            BinOp::WriteByte,
            dst,
            Expr::un(UnOp::ByteOfU8, Expr::un(UnOp::U8OfChar, v)),
        )
    }

    fn sstring(&mut self, g: &mut FidGen, _: &MaybeNullable, _: &Path, v: Expr, dst: Expr) -> Expr {
        Expr::let_(
            "ws",
            v,
            Expr::bin(
                BinOp::WriteBytes,
                leb128_write(
                    g,
                    Expr::un(
                        UnOp::U32OfSize,
                        Expr::un(UnOp::StringLength, Expr::ident("ws")),
                    ),
                    dst,
                ),
                Expr::un(UnOp::BytesOfString, Expr::ident("ws")),
            ),
        )
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
        Expr::WriteWord(
            Endianness::Little,
            Box::new(dst),
            Box::new(Expr::un(UnOp::WordOfU16, label)),
        )
    }

    fn list_opn(
        &mut self,
        g: &mut FidGen,
        _: &MaybeNullable,
        path: &Path,
        _: &MaybeNullable,
        count: Option<Expr>,
        dst: Expr,
    ) -> Result<Expr> {
        let Some(count) = count else {
            bail!(Codec, "rowbinary lists carry their count at {}", path);
        };
        Ok(leb128_write(g, count, dst))
    }

    fn snull(
        &mut self,
        _: &mut FidGen,
        _: &ValueType,
        _: &MaybeNullable,
        _: &Path,
        dst: Expr,
    ) -> Expr {
        Expr::bin(BinOp::WriteByte, dst, Expr::Byte(1))
    }

    fn snotnull(
        &mut self,
        _: &mut FidGen,
        _: &ValueType,
        _: &MaybeNullable,
        _: &Path,
        dst: Expr,
    ) -> Expr {
        Expr::bin(BinOp::WriteByte, dst, Expr::Byte(0))
    }
}

impl SerSized for RowBinarySer {
    fn ssize_of_scalar(
        &self,
        g: &mut FidGen,
        scalar: Scalar,
        _root: &MaybeNullable,
        _path: &Path,
        v: Expr,
    ) -> SSize {
        match scalar {
            Scalar::Bool | Scalar::Char => SSize::Const(1),
            Scalar::Float => SSize::Const(8),
            Scalar::Str => SSize::Dyn(Expr::let_(
                "zs",
                Expr::un(UnOp::StringLength, v),
                Expr::add(
                    leb128_size(
                        g,
                        Expr::un(UnOp::U32OfSize, Expr::ident("zs")),
                    ),
                    Expr::ident("zs"),
                ),
            )),
            s => SSize::Const((s.int_bits().expect("integer scalar") / 8) as usize),
        }
    }

    fn ssize_of_sum_opn(&self, _: &MaybeNullable, _: &Path) -> SSize {
        SSize::Const(2)
    }

    fn ssize_of_list_opn(
        &self,
        g: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        count: Expr,
    ) -> SSize {
        SSize::Dyn(leb128_size(g, count))
    }

    fn ssize_of_null(&self, _: &MaybeNullable, _: &Path) -> SSize {
        SSize::Const(1)
    }

    fn ssize_of_notnull(&self, _: &MaybeNullable, _: &Path) -> SSize {
        SSize::Const(1)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::eval::{eval, eval_with, DataCursor, RtVal};
    use crate::schema::parse_schema;

    fn eval_on_bytes(bytes: Vec<u8>, e: &Expr) -> RtVal {
        eval_with(
            vec![(
                "input".to_owned(),
                RtVal::DataPtr(DataCursor::of_bytes(bytes)),
            )],
            e,
        ).unwrap()
    }

    fn leb_roundtrip(n: u32) {
        let mut g = FidGen::new();
        let written = leb128_write(&mut g, Expr::U32(n), Expr::DataPtrOfBuffer(8));
        let RtVal::DataPtr(out) = eval(&written).unwrap() else { panic!() };
        let bytes = out.taken();
        let read = leb128_read(&mut g, Expr::ident("input"));
        let RtVal::Pair(v, _) = eval_on_bytes(bytes.clone(), &read) else { panic!() };
        assert_eq!(*v, RtVal::UInt(Scalar::U32, n as u128), "leb128 of {}", n);

        let sized = leb128_size(&mut g, Expr::U32(n));
        assert_eq!(eval(&sized).unwrap(), RtVal::Size(bytes.len()));
    }

    #[test]
    fn leb128() {
        for n in [0, 1, 127, 128, 300, 16384, u32::MAX] {
            leb_roundtrip(n);
        }
    }

    #[test]
    fn odd_widths_pack_exactly() {
        let mut g = FidGen::new();
        let mut ser = RowBinarySer;
        let mut des = RowBinaryDes;
        let root = parse_schema("u24").unwrap();
        let written = ser.su24(
            &mut g, &root, &Path::root(),
            Expr::U24(0x00_c0_01), Expr::DataPtrOfBuffer(8),
        );
        let RtVal::DataPtr(out) = eval(&written).unwrap() else { panic!() };
        assert_eq!(out.taken(), vec![0x01, 0xc0, 0x00]);

        let read = des.du24(&mut g, &root, &Path::root(), Expr::ident("input"));
        let RtVal::Pair(v, ptr) = eval_on_bytes(out.taken(), &read) else { panic!() };
        assert_eq!(*v, RtVal::UInt(Scalar::U24, 0x00_c0_01));
        let RtVal::DataPtr(ptr) = *ptr else { panic!() };
        assert_eq!(ptr.rem(), 0);
    }

    #[test]
    fn signed_odd_widths_sign_extend() {
        let mut g = FidGen::new();
        let mut ser = RowBinarySer;
        let mut des = RowBinaryDes;
        let root = parse_schema("i24").unwrap();
        let written = ser.si24(
            &mut g, &root, &Path::root(),
            Expr::I24(-2), Expr::DataPtrOfBuffer(8),
        );
        let RtVal::DataPtr(out) = eval(&written).unwrap() else { panic!() };
        assert_eq!(out.taken(), vec![0xfe, 0xff, 0xff]);

        let read = des.di24(&mut g, &root, &Path::root(), Expr::ident("input"));
        let RtVal::Pair(v, _) = eval_on_bytes(out.taken(), &read) else { panic!() };
        assert_eq!(*v, RtVal::SInt(Scalar::I24, -2));
    }
}
