//! In-process big-step evaluation of closed, well-typed expressions.
//!
//! Backends still emit source compiled separately; the evaluator exists so
//! the round-trip and composition laws can run as ordinary tests, the way
//! a dynamic value tree makes a schema coder testable without codegen.
//! Runtime failures (buffer exhaustion, malformed encodings, out-of-range
//! parses) surface as `Runtime` errors.

use crate::error::{Result, bail, ensure, error};
use crate::ir::expr::{BinOp, Endianness, Expr, UnOp};
use crate::schema::{MaybeNullable, Scalar, ValueType};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;


/// A runtime value. Heap-shaped values (what a `ValuePtr` points into)
/// reuse the same representation: `Seq` for vectors and lists, `Tup` for
/// tuples and records, `Sum` for sums, `Nullable` for nullable slots.
#[derive(Debug, Clone)]
pub enum RtVal {
    Void,
    Bool(bool),
    Char(char),
    Float(f64),
    Str(String),
    UInt(Scalar, u128),
    SInt(Scalar, i128),
    Nullable(Option<Box<RtVal>>),
    Bit(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    QWord(u64),
    OWord(u128),
    Size(usize),
    Bytes(Vec<u8>),
    DataPtr(DataCursor),
    ValuePtr(HeapPtr),
    Pair(Box<RtVal>, Box<RtVal>),
    Seq(Vec<RtVal>),
    Tup(Vec<RtVal>),
    Sum(u16, Box<RtVal>),
    /// A heap slot nothing has written yet.
    Unset,
    Func(Rc<FuncVal>),
}

impl PartialEq for RtVal {
    fn eq(&self, other: &Self) -> bool {
        use RtVal::*;
        match (self, other) {
            (Void, Void) | (Unset, Unset) => true,
            (Bool(a), Bool(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (UInt(s, a), UInt(t, b)) => s == t && a == b,
            (SInt(s, a), SInt(t, b)) => s == t && a == b,
            (Nullable(a), Nullable(b)) => a == b,
            (Bit(a), Bit(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Word(a), Word(b)) => a == b,
            (DWord(a), DWord(b)) => a == b,
            (QWord(a), QWord(b)) => a == b,
            (OWord(a), OWord(b)) => a == b,
            (Size(a), Size(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Pair(a1, a2), Pair(b1, b2)) => a1 == b1 && a2 == b2,
            (Seq(a), Seq(b)) => a == b,
            (Tup(a), Tup(b)) => a == b,
            (Sum(la, a), Sum(lb, b)) => la == lb && a == b,
            (DataPtr(a), DataPtr(b)) => a.pos == b.pos && a.buf == b.buf,
            (ValuePtr(a), ValuePtr(b)) => {
                a.frame == b.frame && *a.root.borrow() == *b.root.borrow()
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct FuncVal {
    fid: u32,
    arity: usize,
    body: Expr,
    env: Env,
}

/// Cursor into a byte stream. Clones share the underlying buffer; the
/// position and the push/pop stack travel by value, so cursors behave as
/// the pure values the IR says they are.
#[derive(Debug, Clone)]
pub struct DataCursor {
    buf: Rc<RefCell<Vec<u8>>>,
    pos: usize,
    stack: Vec<usize>,
}

impl DataCursor {
    pub fn of_bytes(bytes: Vec<u8>) -> Self {
        DataCursor { buf: Rc::new(RefCell::new(bytes)), pos: 0, stack: Vec::new() }
    }

    pub fn of_buffer(len: usize) -> Self {
        Self::of_bytes(vec![0; len])
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn rem(&self) -> usize {
        self.buf.borrow().len().saturating_sub(self.pos)
    }

    /// The bytes behind the cursor, i.e. everything written so far when
    /// this is an output buffer.
    pub fn taken(&self) -> Vec<u8> {
        self.buf.borrow()[..self.pos].to_vec()
    }

    fn peek(&self, off: usize) -> Result<u8> {
        self.buf.borrow().get(self.pos + off).copied().ok_or_else(|| error!(
            Runtime, "pointer exhausted peeking {} past byte {}", off, self.pos,
        ))
    }

    fn read_byte(mut self) -> Result<(u8, Self)> {
        let b = self.peek(0)?;
        self.pos += 1;
        Ok((b, self))
    }

    fn read_bytes(mut self, n: usize) -> Result<(Vec<u8>, Self)> {
        ensure!(self.rem() >= n, Runtime, "pointer exhausted reading {} bytes", n);
        let bytes = self.buf.borrow()[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok((bytes, self))
    }

    fn write_bytes(mut self, bytes: &[u8]) -> Result<Self> {
        {
            let mut buf = self.buf.borrow_mut();
            ensure!(
                self.pos + bytes.len() <= buf.len(),
                Runtime, "output buffer exhausted writing {} bytes", bytes.len(),
            );
            buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        }
        self.pos += bytes.len();
        Ok(self)
    }

    fn poke_byte(self, b: u8) -> Result<Self> {
        {
            let mut buf = self.buf.borrow_mut();
            ensure!(self.pos < buf.len(), Runtime, "output buffer exhausted");
            let pos = self.pos;
            buf[pos] = b;
        }
        Ok(self)
    }

    fn advance(mut self, n: usize) -> Result<Self> {
        ensure!(self.rem() >= n, Runtime, "pointer exhausted skipping {} bytes", n);
        self.pos += n;
        Ok(self)
    }

    fn push(mut self) -> Self {
        self.stack.push(self.pos);
        self
    }

    fn pop(mut self) -> Result<Self> {
        self.pos = self.stack.pop().ok_or_else(|| error!(
            Runtime, "pointer position stack underflow",
        ))?;
        Ok(self)
    }
}

/// Cursor into an in-memory value of a given schema. The frame is the
/// runtime child-index path; compound open/next/close and the sum label
/// ops move it, always within the subtree the pointer was created over.
#[derive(Debug, Clone)]
pub struct HeapPtr {
    root: Rc<RefCell<RtVal>>,
    mn: MaybeNullable,
    frame: Vec<usize>,
}

impl HeapPtr {
    pub fn alloc(mn: MaybeNullable) -> Self {
        HeapPtr {
            root: Rc::new(RefCell::new(RtVal::Unset)),
            mn,
            frame: Vec::new(),
        }
    }

    pub fn schema(&self) -> &MaybeNullable {
        &self.mn
    }

    pub fn at_root(&self) -> bool {
        self.frame.is_empty()
    }

    /// Deep copy of the whole value this pointer was created over.
    pub fn whole(&self) -> RtVal {
        self.root.borrow().clone()
    }

    fn open(mut self) -> Result<Self> {
        // materialize the container first, so empty sequences exist on
        // the heap even when nothing writes an element
        {
            let mut cell = self.root.borrow_mut();
            let mn = self.mn.clone();
            materialize(&mut cell, &mn, &self.frame, Write::Container)?;
        }
        self.frame.push(0);
        Ok(self)
    }

    fn next(mut self) -> Result<Self> {
        match self.frame.last_mut() {
            Some(last) => {
                *last += 1;
                Ok(self)
            }
            None => bail!(Runtime, "value pointer already at the root"),
        }
    }

    fn close(mut self) -> Result<Self> {
        ensure!(self.frame.pop().is_some(), Runtime, "value pointer already at the root");
        Ok(self)
    }

    fn enter_label(mut self, label: usize) -> Self {
        self.frame.push(label);
        self
    }

    fn read(&self) -> Result<RtVal> {
        let cell = self.root.borrow();
        let node = locate(&cell, &self.mn, &self.frame)?;
        match node {
            RtVal::Nullable(Some(inner)) => Ok((**inner).clone()),
            RtVal::Nullable(None) => bail!(Runtime, "read of a null heap slot"),
            RtVal::Unset => bail!(Runtime, "read of an unset heap slot"),
            v => Ok(v.clone()),
        }
    }

    fn is_null(&self) -> Result<bool> {
        let cell = self.root.borrow();
        match locate(&cell, &self.mn, &self.frame)? {
            RtVal::Nullable(opt) => Ok(opt.is_none()),
            RtVal::Unset => bail!(Runtime, "null probe of an unset heap slot"),
            _ => bail!(Runtime, "null probe of a non-nullable heap slot"),
        }
    }

    fn sum_label(&self) -> Result<u16> {
        let cell = self.root.borrow();
        match locate(&cell, &self.mn, &self.frame)? {
            RtVal::Sum(label, _) => Ok(*label),
            RtVal::Nullable(Some(inner)) => match &**inner {
                RtVal::Sum(label, _) => Ok(*label),
                _ => bail!(Runtime, "heap slot is not a sum"),
            },
            _ => bail!(Runtime, "heap slot is not a sum"),
        }
    }

    fn write(&self, v: RtVal) -> Result<()> {
        let mut cell = self.root.borrow_mut();
        let mn = self.mn.clone();
        materialize(&mut cell, &mn, &self.frame, Write::Value(v))
    }

    fn write_null(&self) -> Result<()> {
        let mut cell = self.root.borrow_mut();
        let mn = self.mn.clone();
        materialize(&mut cell, &mn, &self.frame, Write::Null)
    }

    fn write_sum_label(&self, label: u16) -> Result<()> {
        let mut cell = self.root.borrow_mut();
        let mn = self.mn.clone();
        materialize(&mut cell, &mn, &self.frame, Write::SumLabel(label))
    }
}

fn locate<'a>(
    cell: &'a RtVal,
    mn: &MaybeNullable,
    frame: &[usize],
) -> Result<&'a RtVal> {
    let mut cell = cell;
    if mn.is_nullable() && !frame.is_empty() {
        cell = match cell {
            RtVal::Nullable(Some(inner)) => inner,
            _ => bail!(Runtime, "traversal through an absent nullable"),
        };
    }
    let Some((&i, rest)) = frame.split_first() else {
        return Ok(cell);
    };
    match (mn.vtype().resolved(), cell) {
        (ValueType::Vec(_, elem), RtVal::Seq(items))
        | (ValueType::List(elem), RtVal::Seq(items)) => {
            let item = items.get(i).ok_or_else(|| error!(
                Runtime, "sequence index {} out of bounds ({} items)", i, items.len(),
            ))?;
            locate(item, elem, rest)
        }
        (ValueType::Tup(mns), RtVal::Tup(items)) => {
            ensure!(i < mns.len(), Runtime, "tuple index {} out of bounds", i);
            locate(&items[i], &mns[i], rest)
        }
        (ValueType::Rec(fields), RtVal::Tup(items)) => {
            ensure!(i < fields.len(), Runtime, "record index {} out of bounds", i);
            locate(&items[i], &fields[i].mn, rest)
        }
        (ValueType::Sum(alts), RtVal::Sum(label, inner)) => {
            ensure!(
                i == *label as usize,
                Runtime, "cursor enters sum alternative {} but value is {}", i, label,
            );
            let alt = alts.get(i).ok_or_else(|| error!(
                Runtime, "sum label {} out of range", i,
            ))?;
            locate(inner, &alt.mn, rest)
        }
        (vt, RtVal::Unset) => bail!(Runtime, "traversal through an unset {}", vt),
        (vt, _) => bail!(Runtime, "heap value does not match its schema at {}", vt),
    }
}

enum Write {
    Value(RtVal),
    Null,
    SumLabel(u16),
    /// Ensure the compound container exists, without touching contents.
    Container,
}

fn materialize(
    cell: &mut RtVal,
    mn: &MaybeNullable,
    frame: &[usize],
    w: Write,
) -> Result<()> {
    if mn.is_nullable() {
        match w {
            // a null write targets the marker at this very node
            Write::Null if frame.is_empty() => {
                *cell = RtVal::Nullable(None);
                return Ok(());
            }
            _ => {
                if !matches!(cell, RtVal::Nullable(Some(_))) {
                    *cell = RtVal::Nullable(Some(Box::new(RtVal::Unset)));
                }
                let RtVal::Nullable(Some(inner)) = cell else { unreachable!() };
                return materialize_vt(inner, mn.vtype(), frame, w);
            }
        }
    }
    materialize_vt(cell, mn.vtype(), frame, w)
}

fn materialize_vt(
    cell: &mut RtVal,
    vt: &ValueType,
    frame: &[usize],
    w: Write,
) -> Result<()> {
    let vt = vt.resolved();
    let Some((&i, rest)) = frame.split_first() else {
        return match w {
            Write::Value(v) => {
                *cell = v;
                Ok(())
            }
            Write::Null => bail!(Runtime, "null write into a non-nullable slot"),
            Write::SumLabel(label) => match vt {
                ValueType::Sum(alts) => {
                    ensure!(
                        (label as usize) < alts.len(),
                        Runtime, "sum label {} out of range 0..{}", label, alts.len(),
                    );
                    *cell = RtVal::Sum(label, Box::new(RtVal::Unset));
                    Ok(())
                }
                vt => bail!(Runtime, "sum label write into {}", vt),
            },
            Write::Container => match vt {
                ValueType::Vec(..) | ValueType::List(_) => {
                    if matches!(cell, RtVal::Unset) {
                        *cell = RtVal::Seq(Vec::new());
                    }
                    ensure!(
                        matches!(cell, RtVal::Seq(_)),
                        Runtime, "heap value is not a sequence",
                    );
                    Ok(())
                }
                ValueType::Tup(mns) => {
                    tup_child(cell, 0, mns.len()).map(|_| ())
                }
                ValueType::Rec(fields) => {
                    tup_child(cell, 0, fields.len()).map(|_| ())
                }
                ValueType::Sum(_) => {
                    ensure!(
                        matches!(cell, RtVal::Sum(..)),
                        Runtime, "sum opened before its label",
                    );
                    Ok(())
                }
                vt => bail!(Runtime, "cannot open a {}", vt),
            },
        };
    };
    match vt {
        ValueType::Vec(dim, elem) => {
            ensure!(i < *dim, Runtime, "vector index {} out of bounds", i);
            seq_child(cell, i)
                .and_then(|child| materialize(child, elem, rest, w))
        }
        ValueType::List(elem) => {
            seq_child(cell, i)
                .and_then(|child| materialize(child, elem, rest, w))
        }
        ValueType::Tup(mns) => {
            ensure!(i < mns.len(), Runtime, "tuple index {} out of bounds", i);
            tup_child(cell, i, mns.len())
                .and_then(|child| materialize(child, &mns[i], rest, w))
        }
        ValueType::Rec(fields) => {
            ensure!(i < fields.len(), Runtime, "record index {} out of bounds", i);
            tup_child(cell, i, fields.len())
                .and_then(|child| materialize(child, &fields[i].mn, rest, w))
        }
        ValueType::Sum(alts) => match cell {
            RtVal::Sum(label, inner) => {
                ensure!(
                    i == *label as usize,
                    Runtime, "cursor enters sum alternative {} but value is {}", i, label,
                );
                materialize(inner, &alts[i].mn, rest, w)
            }
            _ => bail!(Runtime, "sum alternative written before its label"),
        },
        ValueType::Map(..) => bail!(Runtime, "maps have no runtime values"),
        ValueType::Scalar(s) => bail!(Runtime, "traversal into a {}", s),
        ValueType::Usr(_) => unreachable!("resolved"),
    }
}

fn seq_child(cell: &mut RtVal, i: usize) -> Result<&mut RtVal> {
    if matches!(cell, RtVal::Unset) {
        *cell = RtVal::Seq(Vec::new());
    }
    match cell {
        RtVal::Seq(items) => {
            while items.len() <= i {
                items.push(RtVal::Unset);
            }
            Ok(&mut items[i])
        }
        _ => bail!(Runtime, "heap value is not a sequence"),
    }
}

fn tup_child(cell: &mut RtVal, i: usize, arity: usize) -> Result<&mut RtVal> {
    if matches!(cell, RtVal::Unset) {
        *cell = RtVal::Tup(vec![RtVal::Unset; arity]);
    }
    match cell {
        RtVal::Tup(items) => Ok(&mut items[i]),
        _ => bail!(Runtime, "heap value is not a product"),
    }
}

#[derive(Debug, Clone, Default)]
struct Env {
    idents: HashMap<String, RtVal>,
    params: HashMap<(u32, u32), RtVal>,
}

/// Evaluate a closed expression.
pub fn eval(e: &Expr) -> Result<RtVal> {
    ev(&Env::default(), e)
}

/// Evaluate with some identifiers pre-bound, the way a host would feed
/// input pointers into a generated converter.
pub fn eval_with(bindings: Vec<(String, RtVal)>, e: &Expr) -> Result<RtVal> {
    let mut env = Env::default();
    env.idents.extend(bindings);
    ev(&env, e)
}

/// Evaluate a function-shaped expression and call it, the way the host
/// of a generated converter would.
pub fn eval_apply(f: &Expr, args: Vec<RtVal>) -> Result<RtVal> {
    let f = ev(&Env::default(), f)?;
    apply(&f, args)
}

fn apply(f: &RtVal, args: Vec<RtVal>) -> Result<RtVal> {
    let RtVal::Func(f) = f else {
        bail!(Runtime, "applying a non-function");
    };
    ensure!(
        args.len() == f.arity,
        Runtime, "function {} wants {} arguments, got {}", f.fid, f.arity, args.len(),
    );
    let mut env = f.env.clone();
    for (i, arg) in args.into_iter().enumerate() {
        env.params.insert((f.fid, i as u32), arg);
    }
    ev(&env, &f.body)
}

fn as_bool(v: RtVal) -> Result<bool> {
    match v {
        RtVal::Bool(b) => Ok(b),
        v => bail!(Runtime, "expected a bool, got {:?}", v),
    }
}

fn as_data_ptr(v: RtVal) -> Result<DataCursor> {
    match v {
        RtVal::DataPtr(p) => Ok(p),
        v => bail!(Runtime, "expected a dataptr, got {:?}", v),
    }
}

fn as_heap_ptr(v: RtVal) -> Result<HeapPtr> {
    match v {
        RtVal::ValuePtr(p) => Ok(p),
        v => bail!(Runtime, "expected a valueptr, got {:?}", v),
    }
}

fn as_size(v: RtVal) -> Result<usize> {
    match v {
        RtVal::Size(n) => Ok(n),
        v => bail!(Runtime, "expected a size, got {:?}", v),
    }
}

fn as_byte(v: RtVal) -> Result<u8> {
    match v {
        RtVal::Byte(b) => Ok(b),
        v => bail!(Runtime, "expected a byte, got {:?}", v),
    }
}

/// Raw two's-complement bits of any integer-like runtime value, with its
/// bit width.
fn int_bits(v: &RtVal) -> Result<(u32, u128)> {
    Ok(match v {
        RtVal::UInt(s, n) => (s.int_bits().expect("int scalar"), *n),
        RtVal::SInt(s, n) => (s.int_bits().expect("int scalar"), *n as u128),
        RtVal::Byte(n) => (8, *n as u128),
        RtVal::Word(n) => (16, *n as u128),
        RtVal::DWord(n) => (32, *n as u128),
        RtVal::QWord(n) => (64, *n as u128),
        RtVal::OWord(n) => (128, *n),
        v => bail!(Runtime, "expected an integer, got {:?}", v),
    })
}

fn mask(bits: u32, raw: u128) -> u128 {
    if bits >= 128 {
        raw
    } else {
        raw & ((1u128 << bits) - 1)
    }
}

/// Rebuild a runtime value of `shape`'s variant from raw bits.
fn int_of_bits(shape: &RtVal, raw: u128) -> RtVal {
    match shape {
        RtVal::UInt(s, _) => uint_value(*s, raw),
        RtVal::SInt(s, _) => sint_value(*s, raw),
        RtVal::Byte(_) => RtVal::Byte(raw as u8),
        RtVal::Word(_) => RtVal::Word(raw as u16),
        RtVal::DWord(_) => RtVal::DWord(raw as u32),
        RtVal::QWord(_) => RtVal::QWord(raw as u64),
        RtVal::OWord(_) => RtVal::OWord(raw),
        _ => unreachable!("int_bits accepted it"),
    }
}

pub fn uint_value(s: Scalar, raw: u128) -> RtVal {
    RtVal::UInt(s, mask(s.int_bits().expect("int scalar"), raw))
}

pub fn sint_value(s: Scalar, raw: u128) -> RtVal {
    let bits = s.int_bits().expect("int scalar");
    let masked = mask(bits, raw);
    let signed = if bits < 128 && masked >= 1u128 << (bits - 1) {
        masked as i128 - (1i128 << bits)
    } else {
        masked as i128
    };
    RtVal::SInt(s, signed)
}

fn int_value(s: Scalar, raw: u128) -> RtVal {
    if s.is_signed_int() {
        sint_value(s, raw)
    } else {
        uint_value(s, raw)
    }
}

fn ev(env: &Env, e: &Expr) -> Result<RtVal> {
    use Expr::*;
    Ok(match e {
        Null(_) => RtVal::Nullable(None),
        Bool(b) => RtVal::Bool(*b),
        Char(c) => RtVal::Char(*c),
        Float(x) => RtVal::Float(*x),
        Str(s) => RtVal::Str(s.clone()),
        U8(n) => RtVal::UInt(Scalar::U8, *n as u128),
        U16(n) => RtVal::UInt(Scalar::U16, *n as u128),
        U24(n) => uint_value(Scalar::U24, *n as u128),
        U32(n) => RtVal::UInt(Scalar::U32, *n as u128),
        U40(n) => uint_value(Scalar::U40, *n as u128),
        U48(n) => uint_value(Scalar::U48, *n as u128),
        U56(n) => uint_value(Scalar::U56, *n as u128),
        U64(n) => RtVal::UInt(Scalar::U64, *n as u128),
        U128(n) => RtVal::UInt(Scalar::U128, *n),
        I8(n) => RtVal::SInt(Scalar::I8, *n as i128),
        I16(n) => RtVal::SInt(Scalar::I16, *n as i128),
        I24(n) => sint_value(Scalar::I24, *n as u128),
        I32(n) => RtVal::SInt(Scalar::I32, *n as i128),
        I40(n) => sint_value(Scalar::I40, *n as u128),
        I48(n) => sint_value(Scalar::I48, *n as u128),
        I56(n) => sint_value(Scalar::I56, *n as u128),
        I64(n) => RtVal::SInt(Scalar::I64, *n as i128),
        I128(n) => RtVal::SInt(Scalar::I128, *n),
        Bit(b) => RtVal::Bit(*b),
        Byte(n) => RtVal::Byte(*n),
        Word(n) => RtVal::Word(*n),
        DWord(n) => RtVal::DWord(*n),
        QWord(n) => RtVal::QWord(*n),
        OWord(n) => RtVal::OWord(*n),
        Size(n) => RtVal::Size(*n),
        Bytes(bs) => RtVal::Bytes(bs.clone()),
        DataPtrOfString(s) => RtVal::DataPtr(DataCursor::of_bytes(s.clone().into_bytes())),
        DataPtrOfBuffer(n) => RtVal::DataPtr(DataCursor::of_buffer(*n)),
        AllocValue(mn) => RtVal::ValuePtr(HeapPtr::alloc(mn.clone())),
        Identifier(name) => env.idents.get(name).cloned().ok_or_else(|| error!(
            Runtime, "undeclared variable {:?}", name,
        ))?,
        Param(fid, i) => env.params.get(&(*fid, *i)).cloned().ok_or_else(|| error!(
            Runtime, "unbound parameter {} of function {}", i, fid,
        ))?,
        Seq(es) => {
            let mut last = RtVal::Void;
            for sub in es {
                last = ev(env, sub)?;
            }
            last
        }
        Function { fid, params, body } => RtVal::Func(Rc::new(FuncVal {
            fid: *fid,
            arity: params.len(),
            body: (**body).clone(),
            env: env.clone(),
        })),
        Let { name, value, body } => {
            let value = ev(env, value)?;
            let mut env = env.clone();
            env.idents.insert(name.clone(), value);
            ev(&env, body)?
        }
        Unary(op, a) => ev_unary(env, *op, a)?,
        Binary(op, a, b) => ev_binary(env, *op, a, b)?,
        GetField(_, a) => as_heap_ptr(ev(env, a)?)?.read()?,
        FieldIsNull(_, a) => RtVal::Bool(as_heap_ptr(ev(env, a)?)?.is_null()?),
        SetFieldNull(_, a) => {
            let ptr = as_heap_ptr(ev(env, a)?)?;
            ptr.write_null()?;
            RtVal::ValuePtr(ptr)
        }
        SetField(_, a, v) => {
            let ptr = as_heap_ptr(ev(env, a)?)?;
            let v = ev(env, v)?;
            ptr.write(v)?;
            RtVal::ValuePtr(ptr)
        }
        GetSumLabel(_, a) => {
            let ptr = as_heap_ptr(ev(env, a)?)?;
            let label = ptr.sum_label()?;
            RtVal::Pair(
                Box::new(RtVal::UInt(Scalar::U16, label as u128)),
                Box::new(RtVal::ValuePtr(ptr.enter_label(label as usize))),
            )
        }
        SetSumLabel(_, a, label) => {
            let ptr = as_heap_ptr(ev(env, a)?)?;
            let label = match ev(env, label)? {
                RtVal::UInt(Scalar::U16, n) => n as u16,
                v => bail!(Runtime, "sum label must be a u16, got {:?}", v),
            };
            ptr.write_sum_label(label)?;
            RtVal::ValuePtr(ptr.enter_label(label as usize))
        }
        Choose { cond, then_, else_ } => {
            if as_bool(ev(env, cond)?)? {
                ev(env, then_)?
            } else {
                ev(env, else_)?
            }
        }
        LoopWhile { cond, body, init } => {
            let cond = ev(env, cond)?;
            let body = ev(env, body)?;
            let mut acc = ev(env, init)?;
            while as_bool(apply(&cond, vec![acc.clone()])?)? {
                acc = apply(&body, vec![acc])?;
            }
            acc
        }
        LoopUntil { body, cond, init } => {
            let body = ev(env, body)?;
            let cond = ev(env, cond)?;
            let mut acc = ev(env, init)?;
            loop {
                acc = apply(&body, vec![acc])?;
                if !as_bool(apply(&cond, vec![acc.clone()])?)? {
                    break acc;
                }
            }
        }
        SetBit(x, i, b) => {
            let x = ev(env, x)?;
            let (bits, raw) = int_bits(&x)?;
            let i = match ev(env, i)? {
                RtVal::UInt(Scalar::U32, n) => n as u32,
                v => bail!(Runtime, "bit index must be a u32, got {:?}", v),
            };
            ensure!(i < bits, Runtime, "bit {} out of range for {} bits", i, bits);
            let raw = match ev(env, b)? {
                RtVal::Bit(true) => raw | (1u128 << i),
                RtVal::Bit(false) => raw & !(1u128 << i),
                v => bail!(Runtime, "expected a bit, got {:?}", v),
            };
            int_of_bits(&x, mask(bits, raw))
        }
        BlitByte(ptr, byte, count) => {
            let mut ptr = as_data_ptr(ev(env, ptr)?)?;
            let byte = as_byte(ev(env, byte)?)?;
            let count = as_size(ev(env, count)?)?;
            for _ in 0..count {
                ptr = ptr.write_bytes(&[byte])?;
            }
            RtVal::DataPtr(ptr)
        }
        ReadWhile { cond, reduce, init, pos } => {
            let cond = ev(env, cond)?;
            let reduce = ev(env, reduce)?;
            let mut acc = ev(env, init)?;
            let mut ptr = as_data_ptr(ev(env, pos)?)?;
            while ptr.rem() > 0 {
                let b = ptr.peek(0)?;
                if !as_bool(apply(&cond, vec![RtVal::Byte(b)])?)? {
                    break;
                }
                acc = apply(&reduce, vec![acc, RtVal::Byte(b)])?;
                ptr = ptr.advance(1)?;
            }
            RtVal::Pair(Box::new(acc), Box::new(RtVal::DataPtr(ptr)))
        }
        Repeat { from, to, body, init } => {
            let from = match ev(env, from)? {
                RtVal::SInt(Scalar::I32, n) => n as i32,
                v => bail!(Runtime, "repeat bound must be an i32, got {:?}", v),
            };
            let to = match ev(env, to)? {
                RtVal::SInt(Scalar::I32, n) => n as i32,
                v => bail!(Runtime, "repeat bound must be an i32, got {:?}", v),
            };
            let body = ev(env, body)?;
            let mut acc = ev(env, init)?;
            for i in from..to {
                acc = apply(&body, vec![
                    RtVal::SInt(Scalar::I32, i as i128),
                    acc,
                ])?;
            }
            acc
        }
        ReadWord(en, a) => ev_read_word(env, *en, a, 2)?,
        ReadDWord(en, a) => ev_read_word(env, *en, a, 4)?,
        ReadQWord(en, a) => ev_read_word(env, *en, a, 8)?,
        ReadOWord(en, a) => ev_read_word(env, *en, a, 16)?,
        WriteWord(en, a, w) => ev_write_word(env, *en, a, w, 2)?,
        WriteDWord(en, a, w) => ev_write_word(env, *en, a, w, 4)?,
        WriteQWord(en, a, w) => ev_write_word(env, *en, a, w, 8)?,
        WriteOWord(en, a, w) => ev_write_word(env, *en, a, w, 16)?,
        PeekWord(en, a, off) => ev_peek_word(env, *en, a, off, 2)?,
        PeekDWord(en, a, off) => ev_peek_word(env, *en, a, off, 4)?,
        PeekQWord(en, a, off) => ev_peek_word(env, *en, a, off, 8)?,
        PeekOWord(en, a, off) => ev_peek_word(env, *en, a, off, 16)?,
    })
}

fn word_of_bytes(en: Endianness, bytes: &[u8]) -> u128 {
    let mut raw = 0u128;
    match en {
        Endianness::Little => {
            for (i, b) in bytes.iter().enumerate() {
                raw |= (*b as u128) << (8 * i);
            }
        }
        Endianness::Big => {
            for b in bytes {
                raw = (raw << 8) | *b as u128;
            }
        }
    }
    raw
}

fn bytes_of_word(en: Endianness, raw: u128, len: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..len).map(|i| (raw >> (8 * i)) as u8).collect();
    if en == Endianness::Big {
        bytes.reverse();
    }
    bytes
}

fn word_value(len: usize, raw: u128) -> RtVal {
    match len {
        2 => RtVal::Word(raw as u16),
        4 => RtVal::DWord(raw as u32),
        8 => RtVal::QWord(raw as u64),
        _ => RtVal::OWord(raw),
    }
}

fn ev_read_word(env: &Env, en: Endianness, a: &Expr, len: usize) -> Result<RtVal> {
    let ptr = as_data_ptr(ev(env, a)?)?;
    let (bytes, ptr) = ptr.read_bytes(len)?;
    Ok(RtVal::Pair(
        Box::new(word_value(len, word_of_bytes(en, &bytes))),
        Box::new(RtVal::DataPtr(ptr)),
    ))
}

fn ev_write_word(env: &Env, en: Endianness, a: &Expr, w: &Expr, len: usize) -> Result<RtVal> {
    let ptr = as_data_ptr(ev(env, a)?)?;
    let (_, raw) = int_bits(&ev(env, w)?)?;
    Ok(RtVal::DataPtr(ptr.write_bytes(&bytes_of_word(en, raw, len))?))
}

fn ev_peek_word(env: &Env, en: Endianness, a: &Expr, off: &Expr, len: usize) -> Result<RtVal> {
    let ptr = as_data_ptr(ev(env, a)?)?;
    let off = as_size(ev(env, off)?)?;
    let bytes: Vec<u8> = (0..len)
        .map(|i| ptr.peek(off + i))
        .collect::<Result<_>>()?;
    Ok(word_value(len, word_of_bytes(en, &bytes)))
}

fn ev_unary(env: &Env, op: UnOp, a: &Expr) -> Result<RtVal> {
    use UnOp::*;
    if let Some(target) = op.int_conv_target() {
        let v = ev(env, a)?;
        let raw = match v {
            RtVal::UInt(_, n) => n,
            RtVal::SInt(_, n) => n as u128,
            v => bail!(Runtime, "expected an integer, got {:?}", v),
        };
        return Ok(int_value(target, raw));
    }
    if let Some(target) = op.parse_target() {
        let RtVal::Str(s) = ev(env, a)? else {
            bail!(Runtime, "expected a string");
        };
        return parse_number(target, &s);
    }
    let v = ev(env, a)?;
    Ok(match op {
        ByteOfU8 => RtVal::Byte(uint_of(v)? as u8),
        U8OfByte => RtVal::UInt(Scalar::U8, as_byte(v)? as u128),
        WordOfU16 => RtVal::Word(uint_of(v)? as u16),
        U16OfWord => match v {
            RtVal::Word(n) => RtVal::UInt(Scalar::U16, n as u128),
            v => bail!(Runtime, "expected a word, got {:?}", v),
        },
        DWordOfU32 => RtVal::DWord(uint_of(v)? as u32),
        U32OfDWord => match v {
            RtVal::DWord(n) => RtVal::UInt(Scalar::U32, n as u128),
            v => bail!(Runtime, "expected a dword, got {:?}", v),
        },
        QWordOfU64 => RtVal::QWord(uint_of(v)? as u64),
        U64OfQWord => match v {
            RtVal::QWord(n) => RtVal::UInt(Scalar::U64, n as u128),
            v => bail!(Runtime, "expected a qword, got {:?}", v),
        },
        OWordOfU128 => RtVal::OWord(uint_of(v)?),
        U128OfOWord => match v {
            RtVal::OWord(n) => RtVal::UInt(Scalar::U128, n),
            v => bail!(Runtime, "expected an oword, got {:?}", v),
        },
        FloatOfQWord => match v {
            RtVal::QWord(n) => RtVal::Float(f64::from_bits(n)),
            v => bail!(Runtime, "expected a qword, got {:?}", v),
        },
        QWordOfFloat => match v {
            RtVal::Float(x) => RtVal::QWord(x.to_bits()),
            v => bail!(Runtime, "expected a float, got {:?}", v),
        },
        SizeOfU32 => RtVal::Size(uint_of(v)? as usize),
        U32OfSize => match v {
            RtVal::Size(n) => RtVal::UInt(Scalar::U32, n as u128),
            v => bail!(Runtime, "expected a size, got {:?}", v),
        },
        BitOfBool => RtVal::Bit(as_bool(v)?),
        BoolOfBit => match v {
            RtVal::Bit(b) => RtVal::Bool(b),
            v => bail!(Runtime, "expected a bit, got {:?}", v),
        },
        CharOfU8 => RtVal::Char(uint_of(v)? as u8 as char),
        U8OfChar => match v {
            RtVal::Char(c) => {
                let n = c as u32;
                ensure!(n <= 0xff, Runtime, "char {:?} does not fit a u8", c);
                RtVal::UInt(Scalar::U8, n as u128)
            }
            v => bail!(Runtime, "expected a char, got {:?}", v),
        },
        StringOfFloat => match v {
            RtVal::Float(x) => RtVal::Str(format!("{:?}", x)),
            v => bail!(Runtime, "expected a float, got {:?}", v),
        },
        StringOfInt => match v {
            RtVal::UInt(_, n) => RtVal::Str(n.to_string()),
            RtVal::SInt(_, n) => RtVal::Str(n.to_string()),
            v => bail!(Runtime, "expected an integer, got {:?}", v),
        },
        StringOfBytes => match v {
            RtVal::Bytes(bs) => RtVal::Str(String::from_utf8(bs).map_err(|e| error!(
                Runtime, "non UTF8 bytes: {}", e,
            ))?),
            v => bail!(Runtime, "expected bytes, got {:?}", v),
        },
        BytesOfString => match v {
            RtVal::Str(s) => RtVal::Bytes(s.into_bytes()),
            v => bail!(Runtime, "expected a string, got {:?}", v),
        },
        Not => RtVal::Bool(!as_bool(v)?),
        LogNot => {
            let (bits, raw) = int_bits(&v)?;
            int_of_bits(&v, mask(bits, !raw))
        }
        IsNull => match v {
            RtVal::Nullable(opt) => RtVal::Bool(opt.is_none()),
            v => bail!(Runtime, "expected a nullable, got {:?}", v),
        },
        ToNullable => RtVal::Nullable(Some(Box::new(v))),
        ToNotNullable => match v {
            RtVal::Nullable(Some(inner)) => *inner,
            RtVal::Nullable(None) => bail!(Runtime, "to-not-nullable of a null"),
            v => bail!(Runtime, "expected a nullable, got {:?}", v),
        },
        Fst => match v {
            RtVal::Pair(fst, _) => *fst,
            v => bail!(Runtime, "expected a pair, got {:?}", v),
        },
        Snd => match v {
            RtVal::Pair(_, snd) => *snd,
            v => bail!(Runtime, "expected a pair, got {:?}", v),
        },
        StringLength => match v {
            RtVal::Str(s) => RtVal::Size(s.len()),
            v => bail!(Runtime, "expected a string, got {:?}", v),
        },
        ListLength => match v {
            RtVal::Seq(items) => RtVal::UInt(Scalar::U32, items.len() as u128),
            v => bail!(Runtime, "expected a sequence, got {:?}", v),
        },
        RemSize => RtVal::Size(as_data_ptr(v)?.rem()),
        ReadByte => {
            let (b, ptr) = as_data_ptr(v)?.read_byte()?;
            RtVal::Pair(Box::new(RtVal::Byte(b)), Box::new(RtVal::DataPtr(ptr)))
        }
        DataPtrPush => RtVal::DataPtr(as_data_ptr(v)?.push()),
        DataPtrPop => RtVal::DataPtr(as_data_ptr(v)?.pop()?),
        DerefValuePtr => as_heap_ptr(v)?.read()?,
        ValuePtrOpen => RtVal::ValuePtr(as_heap_ptr(v)?.open()?),
        ValuePtrNext => RtVal::ValuePtr(as_heap_ptr(v)?.next()?),
        ValuePtrClose => RtVal::ValuePtr(as_heap_ptr(v)?.close()?),
        Dump => {
            tracing::debug!(value = ?v, "dump");
            RtVal::Void
        }
        Ignore => RtVal::Void,
        _ => unreachable!("handled above"),
    })
}

fn uint_of(v: RtVal) -> Result<u128> {
    match v {
        RtVal::UInt(_, n) => Ok(n),
        v => bail!(Runtime, "expected an unsigned integer, got {:?}", v),
    }
}

fn parse_number(target: Scalar, s: &str) -> Result<RtVal> {
    if target == Scalar::Float {
        return Ok(RtVal::Float(s.parse().map_err(|e| error!(
            Runtime, "bad float {:?}: {}", s, e,
        ))?));
    }
    let bits = target.int_bits().expect("int scalar");
    if target.is_signed_int() {
        let n: i128 = s.parse().map_err(|e| error!(
            Runtime, "bad integer {:?}: {}", s, e,
        ))?;
        let ok = if bits == 128 {
            true
        } else {
            n >= -(1i128 << (bits - 1)) && n < (1i128 << (bits - 1))
        };
        ensure!(ok, Runtime, "{} out of range for {}", n, target);
        Ok(RtVal::SInt(target, n))
    } else {
        let n: u128 = s.parse().map_err(|e| error!(
            Runtime, "bad integer {:?}: {}", s, e,
        ))?;
        ensure!(
            bits == 128 || n < (1u128 << bits),
            Runtime, "{} out of range for {}", n, target,
        );
        Ok(RtVal::UInt(target, n))
    }
}

fn ev_binary(env: &Env, op: BinOp, a: &Expr, b: &Expr) -> Result<RtVal> {
    use BinOp::*;
    // short-circuit boolean connectives first
    match op {
        And => {
            return Ok(RtVal::Bool(
                as_bool(ev(env, a)?)? && as_bool(ev(env, b)?)?,
            ));
        }
        Or => {
            return Ok(RtVal::Bool(
                as_bool(ev(env, a)?)? || as_bool(ev(env, b)?)?,
            ));
        }
        _ => {}
    }
    let va = ev(env, a)?;
    Ok(match op {
        Add | Sub | Mul | Div | Rem => arith(op, va, ev(env, b)?)?,
        Gt | Ge | Eq | Ne => compare(op, va, ev(env, b)?)?,
        LogAnd | LogOr | LogXor => {
            let vb = ev(env, b)?;
            let (bits, ra) = int_bits(&va)?;
            let (_, rb) = int_bits(&vb)?;
            let raw = match op {
                LogAnd => ra & rb,
                LogOr => ra | rb,
                _ => ra ^ rb,
            };
            int_of_bits(&va, mask(bits, raw))
        }
        LeftShift | RightShift => {
            let amount = uint_of(ev(env, b)?)? as u32;
            let (bits, raw) = int_bits(&va)?;
            let raw = if amount >= bits {
                // signed right shifts saturate to the sign bits
                match (&va, op) {
                    (RtVal::SInt(_, n), RightShift) if *n < 0 => mask(bits, !0),
                    _ => 0,
                }
            } else if op == LeftShift {
                mask(bits, raw << amount)
            } else {
                match &va {
                    RtVal::SInt(s, n) => {
                        let shifted = *n >> amount;
                        return Ok(sint_value(*s, shifted as u128));
                    }
                    _ => raw >> amount,
                }
            };
            int_of_bits(&va, raw)
        }
        AppendBytes => match (va, ev(env, b)?) {
            (RtVal::Bytes(mut a), RtVal::Bytes(b)) => {
                a.extend(b);
                RtVal::Bytes(a)
            }
            (a, b) => bail!(Runtime, "append-bytes of {:?} and {:?}", a, b),
        },
        AppendByte => match (va, ev(env, b)?) {
            (RtVal::Bytes(mut a), RtVal::Byte(b)) => {
                a.push(b);
                RtVal::Bytes(a)
            }
            (a, b) => bail!(Runtime, "append-byte of {:?} and {:?}", a, b),
        },
        AppendString => match (va, ev(env, b)?) {
            (RtVal::Str(mut a), RtVal::Str(b)) => {
                a.push_str(&b);
                RtVal::Str(a)
            }
            (a, b) => bail!(Runtime, "append-string of {:?} and {:?}", a, b),
        },
        TestBit => {
            let i = match ev(env, b)? {
                RtVal::UInt(Scalar::U32, n) => n as u32,
                v => bail!(Runtime, "bit index must be a u32, got {:?}", v),
            };
            let (bits, raw) = int_bits(&va)?;
            ensure!(i < bits, Runtime, "bit {} out of range for {} bits", i, bits);
            RtVal::Bit(raw & (1u128 << i) != 0)
        }
        ReadBytes => {
            let n = as_size(ev(env, b)?)?;
            let (bytes, ptr) = as_data_ptr(va)?.read_bytes(n)?;
            RtVal::Pair(Box::new(RtVal::Bytes(bytes)), Box::new(RtVal::DataPtr(ptr)))
        }
        PeekByte => {
            let off = as_size(ev(env, b)?)?;
            RtVal::Byte(as_data_ptr(va)?.peek(off)?)
        }
        WriteByte => {
            let byte = as_byte(ev(env, b)?)?;
            RtVal::DataPtr(as_data_ptr(va)?.write_bytes(&[byte])?)
        }
        WriteBytes => match ev(env, b)? {
            RtVal::Bytes(bytes) => RtVal::DataPtr(as_data_ptr(va)?.write_bytes(&bytes)?),
            v => bail!(Runtime, "expected bytes, got {:?}", v),
        },
        PokeByte => {
            let byte = as_byte(ev(env, b)?)?;
            RtVal::DataPtr(as_data_ptr(va)?.poke_byte(byte)?)
        }
        DataPtrAdd => {
            let n = as_size(ev(env, b)?)?;
            RtVal::DataPtr(as_data_ptr(va)?.advance(n)?)
        }
        DataPtrSub => {
            let a = as_data_ptr(va)?;
            let b = as_data_ptr(ev(env, b)?)?;
            ensure!(a.pos >= b.pos, Runtime, "negative pointer difference");
            RtVal::Size(a.pos - b.pos)
        }
        Coalesce => match va {
            RtVal::Nullable(Some(inner)) => *inner,
            RtVal::Nullable(None) => ev(env, b)?,
            v => bail!(Runtime, "expected a nullable, got {:?}", v),
        },
        Pair => RtVal::Pair(Box::new(va), Box::new(ev(env, b)?)),
        MapPair => match va {
            RtVal::Pair(fst, snd) => apply(&ev(env, b)?, vec![*fst, *snd])?,
            v => bail!(Runtime, "expected a pair, got {:?}", v),
        },
        And | Or => unreachable!("short-circuited above"),
    })
}

fn arith(op: BinOp, a: RtVal, b: RtVal) -> Result<RtVal> {
    use BinOp::*;
    match (&a, &b) {
        (RtVal::Float(x), RtVal::Float(y)) => Ok(RtVal::Float(match op {
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            Div => x / y,
            _ => x % y,
        })),
        (RtVal::Size(x), RtVal::Size(y)) => {
            if matches!(op, Div | Rem) && *y == 0 {
                bail!(Runtime, "size division by zero");
            }
            Ok(RtVal::Size(match op {
                Add => x.wrapping_add(*y),
                Sub => x.wrapping_sub(*y),
                Mul => x.wrapping_mul(*y),
                Div => x / y,
                _ => x % y,
            }))
        }
        (RtVal::SInt(s, x), RtVal::SInt(t, y)) if s == t => {
            if matches!(op, Div | Rem) && *y == 0 {
                bail!(Runtime, "division by zero");
            }
            let raw = match op {
                Add => x.wrapping_add(*y),
                Sub => x.wrapping_sub(*y),
                Mul => x.wrapping_mul(*y),
                Div => x.wrapping_div(*y),
                _ => x.wrapping_rem(*y),
            };
            Ok(sint_value(*s, raw as u128))
        }
        _ => {
            let (bits, x) = int_bits(&a)?;
            let (bits_b, y) = int_bits(&b)?;
            ensure!(
                bits == bits_b && std::mem::discriminant(&a) == std::mem::discriminant(&b),
                Runtime, "arithmetic on mismatched operands {:?} and {:?}", a, b,
            );
            if matches!(op, Div | Rem) && y == 0 {
                bail!(Runtime, "division by zero");
            }
            let raw = match op {
                Add => x.wrapping_add(y),
                Sub => x.wrapping_sub(y),
                Mul => x.wrapping_mul(y),
                Div => x / y,
                _ => x % y,
            };
            Ok(int_of_bits(&a, mask(bits, raw)))
        }
    }
}

fn compare(op: BinOp, a: RtVal, b: RtVal) -> Result<RtVal> {
    use std::cmp::Ordering;
    let ord = match (&a, &b) {
        (RtVal::Float(x), RtVal::Float(y)) => x.partial_cmp(y),
        (RtVal::Str(x), RtVal::Str(y)) => Some(x.cmp(y)),
        (RtVal::Char(x), RtVal::Char(y)) => Some(x.cmp(y)),
        (RtVal::Bool(x), RtVal::Bool(y)) => Some(x.cmp(y)),
        (RtVal::Bit(x), RtVal::Bit(y)) => Some(x.cmp(y)),
        (RtVal::Bytes(x), RtVal::Bytes(y)) => Some(x.cmp(y)),
        (RtVal::Size(x), RtVal::Size(y)) => Some(x.cmp(y)),
        (RtVal::SInt(s, x), RtVal::SInt(t, y)) if s == t => Some(x.cmp(y)),
        _ => {
            let (bits, x) = int_bits(&a)?;
            let (bits_b, y) = int_bits(&b)?;
            ensure!(
                bits == bits_b,
                Runtime, "comparison of mismatched operands {:?} and {:?}", a, b,
            );
            Some(x.cmp(&y))
        }
    };
    let Some(ord) = ord else {
        // NaN: all order comparisons are false, equality is false
        return Ok(RtVal::Bool(op == BinOp::Ne));
    };
    Ok(RtVal::Bool(match op {
        BinOp::Gt => ord == Ordering::Greater,
        BinOp::Ge => ord != Ordering::Less,
        BinOp::Eq => ord == Ordering::Equal,
        _ => ord != Ordering::Equal,
    }))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::FidGen;
    use crate::ir::typ::Type;

    #[test]
    fn arithmetic_wraps_to_declared_width() {
        let e = Expr::add(Expr::U8(200), Expr::U8(100));
        assert_eq!(eval(&e).unwrap(), RtVal::UInt(Scalar::U8, 44));
        let e = Expr::add(Expr::U24(0xff_ff_ff), Expr::U24(1));
        assert_eq!(eval(&e).unwrap(), RtVal::UInt(Scalar::U24, 0));
        let e = Expr::bin(BinOp::Sub, Expr::I24(-(1 << 23)), Expr::I24(1));
        assert_eq!(eval(&e).unwrap(), RtVal::SInt(Scalar::I24, (1 << 23) - 1));
        assert!(eval(&Expr::bin(BinOp::Div, Expr::U8(1), Expr::U8(0))).is_err());
    }

    #[test]
    fn streams() {
        let e = Expr::un(UnOp::ReadByte, Expr::DataPtrOfString("AB".into()));
        let v = eval(&e).unwrap();
        let RtVal::Pair(b, ptr) = v else { panic!() };
        assert_eq!(*b, RtVal::Byte(b'A'));
        let RtVal::DataPtr(ptr) = *ptr else { panic!() };
        assert_eq!(ptr.rem(), 1);

        // exhaustion aborts
        let e = Expr::bin(
            BinOp::ReadBytes,
            Expr::DataPtrOfString("x".into()),
            Expr::Size(2),
        );
        assert!(eval(&e).is_err());

        // write then inspect the taken prefix
        let e = Expr::bin(
            BinOp::WriteBytes,
            Expr::DataPtrOfBuffer(8),
            Expr::Bytes(b"hey".to_vec()),
        );
        let RtVal::DataPtr(out) = eval(&e).unwrap() else { panic!() };
        assert_eq!(out.taken(), b"hey");
    }

    #[test]
    fn push_pop_rewinds() {
        let e = Expr::un(
            UnOp::DataPtrPop,
            Expr::bin(
                BinOp::DataPtrAdd,
                Expr::un(UnOp::DataPtrPush, Expr::DataPtrOfString("abcd".into())),
                Expr::Size(3),
            ),
        );
        let RtVal::DataPtr(ptr) = eval(&e).unwrap() else { panic!() };
        assert_eq!(ptr.pos(), 0);
    }

    #[test]
    fn endianness() {
        let e = Expr::ReadWord(
            Endianness::Little,
            Box::new(Expr::DataPtrOfString("\u{1}\u{2}".into())),
        );
        let RtVal::Pair(w, _) = eval(&e).unwrap() else { panic!() };
        assert_eq!(*w, RtVal::Word(0x0201));
        let e = Expr::ReadWord(
            Endianness::Big,
            Box::new(Expr::DataPtrOfString("\u{1}\u{2}".into())),
        );
        let RtVal::Pair(w, _) = eval(&e).unwrap() else { panic!() };
        assert_eq!(*w, RtVal::Word(0x0102));
    }

    #[test]
    fn loops() {
        let mut fids = FidGen::new();
        let body = fids.fresh();
        let sum = Expr::Repeat {
            from: Box::new(Expr::I32(0)),
            to: Box::new(Expr::I32(5)),
            body: Box::new(Expr::func(
                body,
                vec![Type::i32(), Type::i32()],
                Expr::add(Expr::Param(body, 0), Expr::Param(body, 1)),
            )),
            init: Box::new(Expr::I32(0)),
        };
        assert_eq!(eval(&sum).unwrap(), RtVal::SInt(Scalar::I32, 10));
    }

    #[test]
    fn read_while_folds_digits() {
        let mut fids = FidGen::new();
        let cond = fids.fresh();
        let reduce = fids.fresh();
        let e = Expr::ReadWhile {
            cond: Box::new(Expr::func(
                cond,
                vec![Type::Byte],
                Expr::bin(
                    BinOp::And,
                    Expr::bin(BinOp::Ge, Expr::Param(cond, 0), Expr::Byte(b'0')),
                    Expr::bin(BinOp::Ge, Expr::Byte(b'9'), Expr::Param(cond, 0)),
                ),
            )),
            reduce: Box::new(Expr::func(
                reduce,
                vec![Type::Bytes, Type::Byte],
                Expr::bin(BinOp::AppendByte, Expr::Param(reduce, 0), Expr::Param(reduce, 1)),
            )),
            init: Box::new(Expr::Bytes(vec![])),
            pos: Box::new(Expr::DataPtrOfString("1234)".into())),
        };
        let RtVal::Pair(digits, ptr) = eval(&e).unwrap() else { panic!() };
        assert_eq!(*digits, RtVal::Bytes(b"1234".to_vec()));
        let RtVal::DataPtr(ptr) = *ptr else { panic!() };
        assert_eq!(ptr.rem(), 1);
    }

    #[test]
    fn out_of_range_parses_abort() {
        let e = Expr::un(UnOp::U8OfString, Expr::Str("256".into()));
        assert!(eval(&e).is_err());
        let e = Expr::un(UnOp::I24OfString, Expr::Str("8388608".into()));
        assert!(eval(&e).is_err());
        let e = Expr::un(UnOp::I24OfString, Expr::Str("-8388608".into()));
        assert_eq!(eval(&e).unwrap(), RtVal::SInt(Scalar::I24, -8388608));
    }

    #[test]
    fn heap_cursor_roundtrip() {
        let mn = crate::schema::parse_schema("{a: u8; b: string?}").unwrap();
        let path = crate::schema::Path::root;
        // build {a: 7, b: null} through the cursor ops
        let e = Expr::un(
            UnOp::ValuePtrClose,
            Expr::SetFieldNull(
                path().child(1),
                Box::new(Expr::un(
                    UnOp::ValuePtrNext,
                    Expr::SetField(
                        path().child(0),
                        Box::new(Expr::un(UnOp::ValuePtrOpen, Expr::AllocValue(mn))),
                        Box::new(Expr::U8(7)),
                    ),
                )),
            ),
        );
        let RtVal::ValuePtr(ptr) = eval(&e).unwrap() else { panic!() };
        assert!(ptr.at_root());
        assert_eq!(
            ptr.whole(),
            RtVal::Tup(vec![
                RtVal::UInt(Scalar::U8, 7),
                RtVal::Nullable(None),
            ]),
        );
    }
}
