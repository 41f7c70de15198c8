//! Type inference over expressions. `type_of` either returns the IR type
//! or a `BadType` error naming the offending subterm and the expected vs.
//! found types. Deterministic: equal inputs give equal outputs.

use crate::error::{Error, ErrorKind, Result};
use crate::ir::expr::{BinOp, Expr, UnOp};
use crate::ir::typ::Type;
use crate::schema::{MaybeNullable, ValueType};
use std::collections::HashMap;


/// Maps identifier names and `(fid, param-index)` pairs to IR types.
#[derive(Debug, Clone, Default)]
pub struct TypeEnv {
    idents: HashMap<String, Type>,
    params: HashMap<(u32, u32), Type>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, t: Type) {
        self.idents.insert(name.into(), t);
    }

    pub fn bind_param(&mut self, fid: u32, i: u32, t: Type) {
        self.params.insert((fid, i), t);
    }
}

fn bad(e: &Expr, msg: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::BadType, msg.to_string()).with_subject(e)
}

fn is_numeric(t: &Type) -> bool {
    match t {
        Type::Value(MaybeNullable::NotNullable(ValueType::Scalar(s))) => {
            s.is_int() || *s == crate::schema::Scalar::Float
        }
        Type::Size | Type::Byte | Type::Word | Type::DWord
        | Type::QWord | Type::OWord => true,
        _ => false,
    }
}

fn is_int_like(t: &Type) -> bool {
    match t {
        Type::Value(MaybeNullable::NotNullable(ValueType::Scalar(s))) => s.is_int(),
        Type::Byte | Type::Word | Type::DWord | Type::QWord | Type::OWord => true,
        _ => false,
    }
}

fn is_value_int(t: &Type) -> bool {
    t.as_scalar().map_or(false, |s| s.is_int())
}

/// The IR type of `e` under `env`.
pub fn type_of(env: &TypeEnv, e: &Expr) -> Result<Type> {
    let mut env = env.clone();
    check(&mut env, e)
}

fn check(env: &mut TypeEnv, e: &Expr) -> Result<Type> {
    use Expr::*;
    Ok(match e {
        Null(vt) => Type::Value(MaybeNullable::Nullable(vt.clone())),
        Bool(_) => Type::bool_(),
        Char(_) => Type::char_(),
        Float(_) => Type::float(),
        Str(_) => Type::string(),
        U8(_) => Type::u8(),
        U16(_) => Type::u16(),
        U24(_) => Type::u24(),
        U32(_) => Type::u32(),
        U40(_) => Type::u40(),
        U48(_) => Type::u48(),
        U56(_) => Type::u56(),
        U64(_) => Type::u64(),
        U128(_) => Type::u128(),
        I8(_) => Type::i8(),
        I16(_) => Type::i16(),
        I24(_) => Type::i24(),
        I32(_) => Type::i32(),
        I40(_) => Type::i40(),
        I48(_) => Type::i48(),
        I56(_) => Type::i56(),
        I64(_) => Type::i64(),
        I128(_) => Type::i128(),
        Bit(_) => Type::Bit,
        Byte(_) => Type::Byte,
        Word(_) => Type::Word,
        DWord(_) => Type::DWord,
        QWord(_) => Type::QWord,
        OWord(_) => Type::OWord,
        Size(_) => Type::Size,
        Bytes(_) => Type::Bytes,
        DataPtrOfString(_) | DataPtrOfBuffer(_) => Type::DataPtr,
        AllocValue(mn) => Type::ValuePtr(mn.clone()),
        Identifier(name) => env.idents.get(name).cloned().ok_or_else(|| {
            bad(e, format_args!("undeclared variable {:?}", name))
        })?,
        Param(fid, i) => env.params.get(&(*fid, *i)).cloned().ok_or_else(|| {
            bad(e, format_args!("unbound parameter {} of function {}", i, fid))
        })?,
        Seq(es) => {
            let mut t = Type::Void;
            for sub in es {
                t = check(env, sub)?;
            }
            t
        }
        Function { fid, params, body } => {
            for (i, param) in params.iter().enumerate() {
                env.params.insert((*fid, i as u32), param.clone());
            }
            let ret = check(env, body)?;
            for i in 0..params.len() {
                env.params.remove(&(*fid, i as u32));
            }
            Type::func(params.clone(), ret)
        }
        Let { name, value, body } => {
            let value_t = check(env, value)?;
            let shadowed = env.idents.insert(name.clone(), value_t);
            let t = check(env, body)?;
            match shadowed {
                Some(prev) => { env.idents.insert(name.clone(), prev); }
                None => { env.idents.remove(name); }
            }
            t
        }
        Unary(op, a) => check_unary(env, e, *op, a)?,
        Binary(op, a, b) => check_binary(env, e, *op, a, b)?,
        GetField(path, a) => {
            let root = check_value_ptr(env, e, a)?;
            let mn = path.type_in(&root)?;
            slot_type(mn)
        }
        FieldIsNull(path, a) => {
            let root = check_value_ptr(env, e, a)?;
            let mn = path.type_in(&root)?;
            if !mn.is_nullable() {
                return Err(bad(e, format_args!("{} is not nullable", mn)));
            }
            Type::bool_()
        }
        SetFieldNull(path, a) => {
            let root = check_value_ptr(env, e, a)?;
            let mn = path.type_in(&root)?;
            if !mn.is_nullable() {
                return Err(bad(e, format_args!("{} is not nullable", mn)));
            }
            Type::ValuePtr(root)
        }
        SetField(path, a, v) => {
            let root = check_value_ptr(env, e, a)?;
            let slot = slot_type(path.type_in(&root)?);
            let found = check(env, v)?;
            if found != slot {
                return Err(bad(e, format_args!(
                    "slot wants {}, found {}", slot, found,
                )));
            }
            Type::ValuePtr(root)
        }
        GetSumLabel(path, a) => {
            let root = check_value_ptr(env, e, a)?;
            check_sum_at(e, &root, path)?;
            Type::pair(Type::u16(), Type::ValuePtr(root))
        }
        SetSumLabel(path, a, label) => {
            let root = check_value_ptr(env, e, a)?;
            check_sum_at(e, &root, path)?;
            expect(env, label, &Type::u16())?;
            Type::ValuePtr(root)
        }
        Choose { cond, then_, else_ } => {
            expect(env, cond, &Type::bool_())?;
            let then_t = check(env, then_)?;
            let else_t = check(env, else_)?;
            if then_t != else_t {
                return Err(bad(e, format_args!(
                    "branches disagree: {} vs {}", then_t, else_t,
                )));
            }
            then_t
        }
        LoopWhile { cond, body, init } => {
            let acc = check(env, init)?;
            expect(env, cond, &Type::func(vec![acc.clone()], Type::bool_()))?;
            expect(env, body, &Type::func(vec![acc.clone()], acc.clone()))?;
            acc
        }
        LoopUntil { body, cond, init } => {
            let acc = check(env, init)?;
            expect(env, body, &Type::func(vec![acc.clone()], acc.clone()))?;
            expect(env, cond, &Type::func(vec![acc.clone()], Type::bool_()))?;
            acc
        }
        SetBit(x, i, b) => {
            let t = check(env, x)?;
            if !is_int_like(&t) {
                return Err(bad(e, format_args!("cannot set bits of {}", t)));
            }
            expect(env, i, &Type::u32())?;
            expect(env, b, &Type::Bit)?;
            t
        }
        BlitByte(ptr, byte, count) => {
            expect(env, ptr, &Type::DataPtr)?;
            expect(env, byte, &Type::Byte)?;
            expect(env, count, &Type::Size)?;
            Type::DataPtr
        }
        ReadWhile { cond, reduce, init, pos } => {
            let acc = check(env, init)?;
            expect(env, cond, &Type::func(vec![Type::Byte], Type::bool_()))?;
            expect(env, reduce, &Type::func(
                vec![acc.clone(), Type::Byte],
                acc.clone(),
            ))?;
            expect(env, pos, &Type::DataPtr)?;
            Type::pair(acc, Type::DataPtr)
        }
        Repeat { from, to, body, init } => {
            expect(env, from, &Type::i32())?;
            expect(env, to, &Type::i32())?;
            let acc = check(env, init)?;
            expect(env, body, &Type::func(
                vec![Type::i32(), acc.clone()],
                acc.clone(),
            ))?;
            acc
        }
        ReadWord(_, a) => read_word(env, a, Type::Word)?,
        ReadDWord(_, a) => read_word(env, a, Type::DWord)?,
        ReadQWord(_, a) => read_word(env, a, Type::QWord)?,
        ReadOWord(_, a) => read_word(env, a, Type::OWord)?,
        WriteWord(_, a, w) => write_word(env, a, w, Type::Word)?,
        WriteDWord(_, a, w) => write_word(env, a, w, Type::DWord)?,
        WriteQWord(_, a, w) => write_word(env, a, w, Type::QWord)?,
        WriteOWord(_, a, w) => write_word(env, a, w, Type::OWord)?,
        PeekWord(_, a, off) => peek_word(env, a, off, Type::Word)?,
        PeekDWord(_, a, off) => peek_word(env, a, off, Type::DWord)?,
        PeekQWord(_, a, off) => peek_word(env, a, off, Type::QWord)?,
        PeekOWord(_, a, off) => peek_word(env, a, off, Type::OWord)?,
    })
}

fn expect(env: &mut TypeEnv, e: &Expr, want: &Type) -> Result<Type> {
    let found = check(env, e)?;
    if &found != want {
        return Err(bad(e, format_args!("expected {}, found {}", want, found)));
    }
    Ok(found)
}

/// The type a heap slot reads and writes as: not nullable (nullability
/// is handled by the dedicated probes), and seen through user types the
/// way the rest of the generic machinery sees them.
fn slot_type(mn: &MaybeNullable) -> Type {
    Type::Value(MaybeNullable::NotNullable(mn.vtype().resolved().clone()))
}

fn check_value_ptr(env: &mut TypeEnv, parent: &Expr, e: &Expr) -> Result<MaybeNullable> {
    match check(env, e)? {
        Type::ValuePtr(mn) => Ok(mn),
        t => Err(bad(parent, format_args!("expected a valueptr, found {}", t))),
    }
}

fn check_sum_at(e: &Expr, root: &MaybeNullable, path: &crate::schema::Path) -> Result<()> {
    let mn = path.type_in(root)?;
    match mn.vtype().resolved() {
        ValueType::Sum(_) => Ok(()),
        vt => Err(bad(e, format_args!("{} is not a sum", vt))),
    }
}

fn read_word(env: &mut TypeEnv, a: &Expr, word: Type) -> Result<Type> {
    expect(env, a, &Type::DataPtr)?;
    Ok(Type::pair(word, Type::DataPtr))
}

fn write_word(env: &mut TypeEnv, a: &Expr, w: &Expr, word: Type) -> Result<Type> {
    expect(env, a, &Type::DataPtr)?;
    expect(env, w, &word)?;
    Ok(Type::DataPtr)
}

fn peek_word(env: &mut TypeEnv, a: &Expr, off: &Expr, word: Type) -> Result<Type> {
    expect(env, a, &Type::DataPtr)?;
    expect(env, off, &Type::Size)?;
    Ok(word)
}

fn check_unary(env: &mut TypeEnv, e: &Expr, op: UnOp, a: &Expr) -> Result<Type> {
    use UnOp::*;
    if let Some((target, source)) = op.cast_types() {
        expect(env, a, &source)?;
        return Ok(target);
    }
    if let Some(scalar) = op.int_conv_target() {
        let t = check(env, a)?;
        if !is_value_int(&t) {
            return Err(bad(e, format_args!("cannot convert {} to an integer", t)));
        }
        return Ok(Type::value_of(scalar));
    }
    if let Some(scalar) = op.parse_target() {
        expect(env, a, &Type::string())?;
        return Ok(Type::value_of(scalar));
    }
    let t = check(env, a)?;
    Ok(match op {
        StringOfFloat => {
            if t != Type::float() {
                return Err(bad(e, format_args!("expected float, found {}", t)));
            }
            Type::string()
        }
        StringOfInt => {
            if !is_value_int(&t) {
                return Err(bad(e, format_args!("expected an integer, found {}", t)));
            }
            Type::string()
        }
        StringOfBytes => {
            if t != Type::Bytes {
                return Err(bad(e, format_args!("expected bytes, found {}", t)));
            }
            Type::string()
        }
        BytesOfString => {
            if t != Type::string() {
                return Err(bad(e, format_args!("expected string, found {}", t)));
            }
            Type::Bytes
        }
        Not => {
            if t != Type::bool_() {
                return Err(bad(e, format_args!("expected bool, found {}", t)));
            }
            Type::bool_()
        }
        LogNot => {
            if !is_int_like(&t) {
                return Err(bad(e, format_args!("cannot bitwise-negate {}", t)));
            }
            t
        }
        IsNull => match t {
            Type::Value(MaybeNullable::Nullable(_)) => Type::bool_(),
            t => return Err(bad(e, format_args!("{} is not nullable", t))),
        },
        ToNullable => match t {
            Type::Value(MaybeNullable::NotNullable(vt)) => {
                Type::Value(MaybeNullable::Nullable(vt))
            }
            t => return Err(bad(e, format_args!("{} is not a plain value", t))),
        },
        ToNotNullable => match t {
            Type::Value(MaybeNullable::Nullable(vt)) => {
                Type::Value(MaybeNullable::NotNullable(vt))
            }
            t => return Err(bad(e, format_args!("{} is not nullable", t))),
        },
        Fst => match t {
            Type::Pair(fst, _) => *fst,
            t => return Err(bad(e, format_args!("expected a pair, found {}", t))),
        },
        Snd => match t {
            Type::Pair(_, snd) => *snd,
            t => return Err(bad(e, format_args!("expected a pair, found {}", t))),
        },
        StringLength => {
            if t != Type::string() {
                return Err(bad(e, format_args!("expected string, found {}", t)));
            }
            Type::Size
        }
        ListLength => match &t {
            Type::Value(MaybeNullable::NotNullable(vt)) => match vt.resolved() {
                ValueType::Vec(..) | ValueType::List(_) => Type::u32(),
                vt => return Err(bad(e, format_args!("{} has no length", vt))),
            },
            t => return Err(bad(e, format_args!("{} has no length", t))),
        },
        RemSize => {
            if t != Type::DataPtr {
                return Err(bad(e, format_args!("expected dataptr, found {}", t)));
            }
            Type::Size
        }
        ReadByte => {
            if t != Type::DataPtr {
                return Err(bad(e, format_args!("expected dataptr, found {}", t)));
            }
            Type::pair(Type::Byte, Type::DataPtr)
        }
        DataPtrPush | DataPtrPop => {
            if t != Type::DataPtr {
                return Err(bad(e, format_args!("expected dataptr, found {}", t)));
            }
            Type::DataPtr
        }
        DerefValuePtr => match t {
            Type::ValuePtr(mn) => slot_type(&mn),
            t => return Err(bad(e, format_args!("expected a valueptr, found {}", t))),
        },
        ValuePtrOpen | ValuePtrNext | ValuePtrClose => match t {
            t @ Type::ValuePtr(_) => t,
            t => return Err(bad(e, format_args!("expected a valueptr, found {}", t))),
        },
        Dump | Ignore => Type::Void,
        _ => unreachable!("handled above"),
    })
}

fn check_binary(env: &mut TypeEnv, e: &Expr, op: BinOp, a: &Expr, b: &Expr) -> Result<Type> {
    use BinOp::*;
    Ok(match op {
        Add | Sub | Mul | Div | Rem => {
            let ta = check(env, a)?;
            if !is_numeric(&ta) {
                return Err(bad(e, format_args!("{} is not numeric", ta)));
            }
            expect(env, b, &ta)?;
            ta
        }
        Gt | Ge => {
            let ta = check(env, a)?;
            if !is_numeric(&ta) && ta != Type::char_() && ta != Type::string() {
                return Err(bad(e, format_args!("{} is not ordered", ta)));
            }
            expect(env, b, &ta)?;
            Type::bool_()
        }
        Eq | Ne => {
            let ta = check(env, a)?;
            let comparable = is_numeric(&ta)
                || matches!(ta, Type::Bit | Type::Bytes)
                || ta == Type::bool_()
                || ta == Type::char_()
                || ta == Type::string();
            if !comparable {
                return Err(bad(e, format_args!("{} is not comparable", ta)));
            }
            expect(env, b, &ta)?;
            Type::bool_()
        }
        LogAnd | LogOr | LogXor => {
            let ta = check(env, a)?;
            if !is_int_like(&ta) {
                return Err(bad(e, format_args!("{} has no bits", ta)));
            }
            expect(env, b, &ta)?;
            ta
        }
        LeftShift | RightShift => {
            let ta = check(env, a)?;
            if !is_int_like(&ta) {
                return Err(bad(e, format_args!("{} has no bits", ta)));
            }
            expect(env, b, &Type::u8())?;
            ta
        }
        And | Or => {
            expect(env, a, &Type::bool_())?;
            expect(env, b, &Type::bool_())?;
            Type::bool_()
        }
        AppendBytes => {
            expect(env, a, &Type::Bytes)?;
            expect(env, b, &Type::Bytes)?;
            Type::Bytes
        }
        AppendByte => {
            expect(env, a, &Type::Bytes)?;
            expect(env, b, &Type::Byte)?;
            Type::Bytes
        }
        AppendString => {
            expect(env, a, &Type::string())?;
            expect(env, b, &Type::string())?;
            Type::string()
        }
        TestBit => {
            let ta = check(env, a)?;
            if !is_int_like(&ta) {
                return Err(bad(e, format_args!("{} has no bits", ta)));
            }
            expect(env, b, &Type::u32())?;
            Type::Bit
        }
        ReadBytes => {
            expect(env, a, &Type::DataPtr)?;
            expect(env, b, &Type::Size)?;
            Type::pair(Type::Bytes, Type::DataPtr)
        }
        PeekByte => {
            expect(env, a, &Type::DataPtr)?;
            expect(env, b, &Type::Size)?;
            Type::Byte
        }
        WriteByte | PokeByte => {
            expect(env, a, &Type::DataPtr)?;
            expect(env, b, &Type::Byte)?;
            Type::DataPtr
        }
        WriteBytes => {
            expect(env, a, &Type::DataPtr)?;
            expect(env, b, &Type::Bytes)?;
            Type::DataPtr
        }
        DataPtrAdd => {
            expect(env, a, &Type::DataPtr)?;
            expect(env, b, &Type::Size)?;
            Type::DataPtr
        }
        DataPtrSub => {
            expect(env, a, &Type::DataPtr)?;
            expect(env, b, &Type::DataPtr)?;
            Type::Size
        }
        Coalesce => {
            let ta = check(env, a)?;
            match ta {
                Type::Value(MaybeNullable::Nullable(vt)) => {
                    let want = Type::Value(MaybeNullable::NotNullable(vt));
                    expect(env, b, &want)?;
                    want
                }
                t => return Err(bad(e, format_args!("{} is not nullable", t))),
            }
        }
        Pair => Type::pair(check(env, a)?, check(env, b)?),
        MapPair => {
            let ta = check(env, a)?;
            match ta {
                Type::Pair(fst, snd) => {
                    let tb = check(env, b)?;
                    match tb {
                        Type::Function(params, ret)
                            if params.len() == 2
                                && params[0] == *fst
                                && params[1] == *snd =>
                        {
                            *ret
                        }
                        t => return Err(bad(e, format_args!(
                            "map-pair wants a matching 2-ary function, found {}", t,
                        ))),
                    }
                }
                t => return Err(bad(e, format_args!("expected a pair, found {}", t))),
            }
        }
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::FidGen;

    fn t(e: &Expr) -> Result<Type> {
        type_of(&TypeEnv::new(), e)
    }

    #[test]
    fn constants_and_arithmetic() {
        assert_eq!(t(&Expr::U8(3)).unwrap(), Type::u8());
        assert_eq!(
            t(&Expr::add(Expr::U8(1), Expr::U8(2))).unwrap(),
            Type::u8(),
        );
        // operands must have identical types
        assert!(t(&Expr::add(Expr::U8(1), Expr::U16(2))).is_err());
        assert!(t(&Expr::add(Expr::Bool(true), Expr::Bool(false))).is_err());
        assert_eq!(
            t(&Expr::bin(BinOp::Gt, Expr::I64(1), Expr::I64(2))).unwrap(),
            Type::bool_(),
        );
    }

    #[test]
    fn let_shadows() {
        let e = Expr::let_(
            "x",
            Expr::U8(1),
            Expr::let_("x", Expr::Str("s".into()), Expr::ident("x")),
        );
        assert_eq!(t(&e).unwrap(), Type::string());
        assert!(t(&Expr::ident("nope")).is_err());
    }

    #[test]
    fn functions_and_loops() {
        let mut fids = FidGen::new();
        let fid = fids.fresh();
        let double = Expr::func(
            fid,
            vec![Type::u32()],
            Expr::add(Expr::Param(fid, 0), Expr::Param(fid, 0)),
        );
        assert_eq!(
            t(&double).unwrap(),
            Type::func(vec![Type::u32()], Type::u32()),
        );

        let cond_fid = fids.fresh();
        let body_fid = fids.fresh();
        let loop_ = Expr::LoopWhile {
            cond: Box::new(Expr::func(
                cond_fid,
                vec![Type::u32()],
                Expr::bin(BinOp::Gt, Expr::U32(10), Expr::Param(cond_fid, 0)),
            )),
            body: Box::new(Expr::func(
                body_fid,
                vec![Type::u32()],
                Expr::add(Expr::Param(body_fid, 0), Expr::U32(1)),
            )),
            init: Box::new(Expr::U32(0)),
        };
        assert_eq!(t(&loop_).unwrap(), Type::u32());
    }

    #[test]
    fn nullability() {
        let vt = crate::schema::parse_schema("u8").unwrap().into_vtype();
        let null = Expr::Null(vt);
        assert_eq!(
            t(&null).unwrap(),
            Type::Value(crate::schema::parse_schema("u8?").unwrap()),
        );
        assert_eq!(t(&Expr::un(UnOp::IsNull, null.clone())).unwrap(), Type::bool_());
        assert!(t(&Expr::un(UnOp::IsNull, Expr::U8(1))).is_err());
        assert_eq!(
            t(&Expr::bin(BinOp::Coalesce, null, Expr::U8(7))).unwrap(),
            Type::u8(),
        );
    }

    #[test]
    fn choose_branches_must_agree() {
        assert!(t(&Expr::choose(Expr::Bool(true), Expr::U8(1), Expr::U16(1))).is_err());
        assert_eq!(
            t(&Expr::choose(Expr::Bool(true), Expr::U8(1), Expr::U8(2))).unwrap(),
            Type::u8(),
        );
    }

    #[test]
    fn heap_ops() {
        let mn = crate::schema::parse_schema("{a: u8; b: string?}").unwrap();
        let vptr = Expr::AllocValue(mn);
        let get = Expr::GetField("0".parse().unwrap(), Box::new(vptr.clone()));
        assert_eq!(t(&get).unwrap(), Type::u8());
        let is_null = Expr::FieldIsNull("1".parse().unwrap(), Box::new(vptr.clone()));
        assert_eq!(t(&is_null).unwrap(), Type::bool_());
        // field 0 is not nullable
        assert!(t(&Expr::FieldIsNull("0".parse().unwrap(), Box::new(vptr.clone())))
            .is_err());
        // writing the wrong scalar into a slot
        let set = Expr::SetField(
            "0".parse().unwrap(),
            Box::new(vptr),
            Box::new(Expr::U16(1)),
        );
        assert!(t(&set).is_err());
    }

    #[test]
    fn deterministic() {
        let e = Expr::pair(
            Expr::un(UnOp::StringOfInt, Expr::I128(-5)),
            Expr::bin(BinOp::AppendString, Expr::Str("a".into()), Expr::Str("b".into())),
        );
        assert_eq!(t(&e).unwrap(), t(&e).unwrap());
    }
}
