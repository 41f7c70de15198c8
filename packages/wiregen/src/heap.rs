//! The heap-value bridge: a canonical codec whose pointer type is
//! `ValuePtr(root)`, and the derived `materialize` / `serialize` /
//! `sersize` entry points.
//!
//! The heap serializer writes scalar slots with `SetField` while the
//! compound open/next/close calls move the value cursor; the heap
//! deserializer is its mirror with `GetField`. Both are woven by the
//! same generic driver as any wire codec.

use crate::codec::{Des, ListStart, Ser, SerSized, SSize};
use crate::desser::desser;
use crate::error::Result;
use crate::ir::expr::{Expr, FidGen, UnOp};
use crate::ir::typ::Type;
use crate::schema::{MaybeNullable, Path, SumAlt, ValueType};


/// Writes into an in-memory value.
#[derive(Debug, Default)]
pub struct HeapSer;

/// Reads back out of an in-memory value.
#[derive(Debug, Default)]
pub struct HeapDes;

macro_rules! heap_ser_scalars {
    ($($m:ident,)*)=>{$(
        fn $m(
            &mut self,
            _g: &mut FidGen,
            _root: &MaybeNullable,
            path: &Path,
            v: Expr,
            dst: Expr,
        ) -> Expr {
            Expr::SetField(path.clone(), Box::new(dst), Box::new(v))
        }
    )*};
}

impl Ser for HeapSer {
    fn ptr_type(&self, root: &MaybeNullable) -> Type {
        Type::ValuePtr(root.clone())
    }

    heap_ser_scalars!(
        sfloat, sstring, sbool, schar,
        su8, su16, su24, su32, su40, su48, su56, su64, su128,
        si8, si16, si24, si32, si40, si48, si56, si64, si128,
    );

    fn tup_opn(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrOpen, dst)
    }

    fn tup_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrClose, dst)
    }

    fn tup_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, _: usize, dst: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrNext, dst)
    }

    fn rec_opn(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrOpen, dst)
    }

    fn rec_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrClose, dst)
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
        Expr::un(UnOp::ValuePtrNext, dst)
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
        Expr::un(UnOp::ValuePtrOpen, dst)
    }

    fn vec_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrClose, dst)
    }

    fn vec_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, _: usize, dst: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrNext, dst)
    }

    fn sum_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        path: &Path,
        _: usize,
        label: Expr,
        dst: Expr,
    ) -> Expr {
        // stores the label and enters the labelled alternative
        Expr::SetSumLabel(path.clone(), Box::new(dst), Box::new(label))
    }

    fn sum_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrClose, dst)
    }

    fn list_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: &MaybeNullable,
        _count: Option<Expr>,
        dst: Expr,
    ) -> Result<Expr> {
        Ok(Expr::un(UnOp::ValuePtrOpen, dst))
    }

    fn list_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrClose, dst)
    }

    fn list_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, dst: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrNext, dst)
    }

    fn snull(
        &mut self,
        _: &mut FidGen,
        _: &ValueType,
        _: &MaybeNullable,
        path: &Path,
        dst: Expr,
    ) -> Expr {
        Expr::SetFieldNull(path.clone(), Box::new(dst))
    }
}

macro_rules! heap_des_scalars {
    ($($m:ident,)*)=>{$(
        fn $m(
            &mut self,
            _g: &mut FidGen,
            _root: &MaybeNullable,
            path: &Path,
            src: Expr,
        ) -> Expr {
            Expr::pair(
                Expr::GetField(path.clone(), Box::new(src.clone())),
                src,
            )
        }
    )*};
}

impl Des for HeapDes {
    fn ptr_type(&self, root: &MaybeNullable) -> Type {
        Type::ValuePtr(root.clone())
    }

    heap_des_scalars!(
        dfloat, dstring, dbool, dchar,
        du8, du16, du24, du32, du40, du48, du56, du64, du128,
        di8, di16, di24, di32, di40, di48, di56, di64, di128,
    );

    fn tup_opn(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrOpen, src)
    }

    fn tup_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrClose, src)
    }

    fn tup_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, _: usize, src: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrNext, src)
    }

    fn rec_opn(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrOpen, src)
    }

    fn rec_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrClose, src)
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
        Expr::un(UnOp::ValuePtrNext, src)
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
        Expr::un(UnOp::ValuePtrOpen, src)
    }

    fn vec_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrClose, src)
    }

    fn vec_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, _: usize, src: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrNext, src)
    }

    fn sum_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        path: &Path,
        _: usize,
        src: Expr,
    ) -> Expr {
        // yields the stored label and the pointer entered into its
        // alternative
        Expr::GetSumLabel(path.clone(), Box::new(src))
    }

    fn sum_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrClose, src)
    }

    fn list_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        path: &Path,
        _: &MaybeNullable,
        src: Expr,
    ) -> ListStart {
        ListStart::KnownSize(Expr::pair(
            Expr::un(
                UnOp::ListLength,
                Expr::GetField(path.clone(), Box::new(src.clone())),
            ),
            Expr::un(UnOp::ValuePtrOpen, src),
        ))
    }

    fn list_cls(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrClose, src)
    }

    fn list_sep(&mut self, _: &mut FidGen, _: &MaybeNullable, _: &Path, src: Expr) -> Expr {
        Expr::un(UnOp::ValuePtrNext, src)
    }

    fn is_null(&mut self, _: &mut FidGen, _: &MaybeNullable, path: &Path, src: Expr) -> Expr {
        Expr::FieldIsNull(path.clone(), Box::new(src))
    }

    fn dnull(
        &mut self,
        _: &mut FidGen,
        _: &ValueType,
        _: &MaybeNullable,
        _: &Path,
        src: Expr,
    ) -> Expr {
        src
    }
}

/// An IR function `DataPtr -> Pair(ValuePtr(root), DataPtr)` that reads
/// one value of `root` through `des` onto the heap.
pub fn materialize<D: Des>(
    des: &mut D,
    g: &mut FidGen,
    root: &MaybeNullable,
) -> Result<Expr> {
    let fid = g.fresh();
    let woven = desser(
        des,
        &mut HeapSer,
        g,
        root,
        Expr::Param(fid, 0),
        Expr::AllocValue(root.clone()),
    )?;
    let body = Expr::let_(
        "mat",
        woven,
        Expr::pair(
            Expr::ident("mat").snd(),
            Expr::ident("mat").fst(),
        ),
    );
    Ok(Expr::func(fid, vec![Type::DataPtr], body))
}

/// The dual: `(ValuePtr(root), DataPtr) -> Pair(ValuePtr(root), DataPtr)`
/// writing a heap value of `root` out through `ser`.
pub fn serialize<S: Ser>(
    ser: &mut S,
    g: &mut FidGen,
    root: &MaybeNullable,
) -> Result<Expr> {
    let fid = g.fresh();
    let body = desser(
        &mut HeapDes,
        ser,
        g,
        root,
        Expr::Param(fid, 0),
        Expr::Param(fid, 1),
    )?;
    Ok(Expr::func(
        fid,
        vec![Type::ValuePtr(root.clone()), Type::DataPtr],
        body,
    ))
}

/// The serialized byte length of a heap value: a compile-time constant
/// plus an expression over the value. The total is their sum.
///
/// `value` must evaluate to a `ValuePtr(root)` at its root.
pub fn sersize<S: SerSized>(
    ser: &S,
    g: &mut FidGen,
    root: &MaybeNullable,
    value: Expr,
) -> Result<(usize, Expr)> {
    let mut sizer = Sizer { ser, g, root: root.clone(), syms: 0 };
    let mut const_acc = 0;
    let state = Expr::pair(Expr::Size(0), value);
    let state = sizer.walk(&Path::root(), root, Some(&mut const_acc), state)?;
    Ok((const_acc, state.fst()))
}

struct Sizer<'a, S> {
    ser: &'a S,
    g: &'a mut FidGen,
    root: MaybeNullable,
    syms: u32,
}

impl<'a, S: SerSized> Sizer<'a, S> {
    fn sym(&mut self, prefix: &str) -> String {
        let name = format!("{}_{}", prefix, self.syms);
        self.syms += 1;
        name
    }

    /// Fold a size hint into the state; constants go to the accumulator
    /// when one is available, otherwise into the expression.
    fn add_hint(
        &mut self,
        hint: SSize,
        const_acc: &mut Option<&mut usize>,
        state: Expr,
    ) -> Expr {
        match hint {
            SSize::Const(0) => state,
            SSize::Const(n) => match const_acc {
                Some(acc) => {
                    **acc += n;
                    state
                }
                None => {
                    let st = self.sym("zst");
                    Expr::let_(
                        st.clone(),
                        state,
                        Expr::pair(
                            Expr::add(Expr::ident(&st).fst(), Expr::Size(n)),
                            Expr::ident(&st).snd(),
                        ),
                    )
                }
            },
            SSize::Dyn(e) => {
                let st = self.sym("zst");
                Expr::let_(
                    st.clone(),
                    state,
                    Expr::pair(
                        Expr::add(Expr::ident(&st).fst(), e),
                        Expr::ident(&st).snd(),
                    ),
                )
            }
        }
    }

    fn cursor(&mut self, op: UnOp, state: Expr) -> Expr {
        let st = self.sym("zst");
        Expr::let_(
            st.clone(),
            state,
            Expr::pair(
                Expr::ident(&st).fst(),
                Expr::un(op, Expr::ident(&st).snd()),
            ),
        )
    }

    /// `state` and the result evaluate to `Pair(Size, ValuePtr)`.
    fn walk(
        &mut self,
        path: &Path,
        mn: &MaybeNullable,
        mut const_acc: Option<&mut usize>,
        state: Expr,
    ) -> Result<Expr> {
        if mn.is_nullable() {
            // the branch sizes differ at runtime, so everything below
            // goes dynamic
            let st = self.sym("zst");
            let probed = Expr::FieldIsNull(
                path.clone(),
                Box::new(Expr::ident(&st).snd()),
            );
            let root = self.root.clone();
            let null_hint = self.ser.ssize_of_null(&root, path);
            let null_arm = self.add_hint(null_hint, &mut None, Expr::ident(&st));
            let notnull_hint = self.ser.ssize_of_notnull(&root, path);
            let entered = self.add_hint(notnull_hint, &mut None, Expr::ident(&st));
            let value_arm = self.walk_vtype(path, mn.vtype(), None, entered)?;
            return Ok(Expr::let_(
                st,
                state,
                Expr::choose(probed, null_arm, value_arm),
            ));
        }
        self.walk_vtype(path, mn.vtype(), const_acc.take(), state)
    }

    fn walk_vtype(
        &mut self,
        path: &Path,
        vt: &ValueType,
        mut const_acc: Option<&mut usize>,
        state: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        match vt.resolved() {
            ValueType::Scalar(scalar) => {
                // bind the state once; the value operand reads through
                // the threaded cursor
                let st = self.sym("zst");
                let v = Expr::GetField(
                    path.clone(),
                    Box::new(Expr::ident(&st).snd()),
                );
                let hint = self.ser.ssize_of_scalar(self.g, *scalar, &root, path, v);
                let inner = self.add_hint(hint, &mut const_acc, Expr::ident(&st));
                Ok(Expr::let_(st, state, inner))
            }
            ValueType::Usr(_) => unreachable!("resolved"),
            ValueType::Tup(mns) => {
                let children: Vec<MaybeNullable> = mns.to_vec();
                self.walk_product(path, &children, const_acc, state)
            }
            ValueType::Rec(fields) => {
                let children: Vec<MaybeNullable> =
                    fields.iter().map(|f| f.mn.clone()).collect();
                self.walk_product(path, &children, const_acc, state)
            }
            ValueType::Vec(dim, elem) => {
                let children = vec![elem.as_ref().clone(); *dim];
                self.walk_vec(path, &children, const_acc, state)
            }
            ValueType::Sum(alts) => {
                let alts = alts.clone();
                self.walk_sum(path, &alts, state)
            }
            ValueType::List(elem) => {
                let elem = elem.as_ref().clone();
                self.walk_list(path, &elem, state)
            }
            ValueType::Map(..) => {
                crate::error::bail!(Schema, "maps have no serialized size at {}", path)
            }
        }
    }

    fn walk_product(
        &mut self,
        path: &Path,
        children: &[MaybeNullable],
        mut const_acc: Option<&mut usize>,
        state: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let hint = self.ser.ssize_of_tup_opn(&root, path);
        let mut state = self.add_hint(hint, &mut const_acc, state);
        state = self.cursor(UnOp::ValuePtrOpen, state);
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                let hint = self.ser.ssize_of_tup_sep(&root, path);
                state = self.add_hint(hint, &mut const_acc, state);
                state = self.cursor(UnOp::ValuePtrNext, state);
            }
            state = self.walk(
                &path.child(i),
                child,
                const_acc.as_deref_mut(),
                state,
            )?;
        }
        let hint = self.ser.ssize_of_tup_cls(&root, path);
        state = self.add_hint(hint, &mut const_acc, state);
        Ok(self.cursor(UnOp::ValuePtrClose, state))
    }

    fn walk_vec(
        &mut self,
        path: &Path,
        children: &[MaybeNullable],
        mut const_acc: Option<&mut usize>,
        state: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let hint = self.ser.ssize_of_vec_opn(&root, path);
        let mut state = self.add_hint(hint, &mut const_acc, state);
        state = self.cursor(UnOp::ValuePtrOpen, state);
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                let hint = self.ser.ssize_of_vec_sep(&root, path);
                state = self.add_hint(hint, &mut const_acc, state);
                state = self.cursor(UnOp::ValuePtrNext, state);
            }
            state = self.walk(
                &path.child(i),
                child,
                const_acc.as_deref_mut(),
                state,
            )?;
        }
        let hint = self.ser.ssize_of_vec_cls(&root, path);
        state = self.add_hint(hint, &mut const_acc, state);
        Ok(self.cursor(UnOp::ValuePtrClose, state))
    }

    fn walk_sum(
        &mut self,
        path: &Path,
        alts: &[SumAlt],
        state: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let hint = self.ser.ssize_of_sum_opn(&root, path);
        let state = self.add_hint(hint, &mut None, state);
        let st = self.sym("zst");
        let lp = self.sym("zlab");
        let mut arms = Vec::with_capacity(alts.len());
        for (i, alt) in alts.iter().enumerate() {
            let entered = Expr::pair(
                Expr::ident(&st).fst(),
                Expr::ident(&lp).snd(),
            );
            let sized = self.walk(&path.child(i), &alt.mn, None, entered)?;
            arms.push(self.cursor(UnOp::ValuePtrClose, sized));
        }
        let mut woven = arms.pop().expect("sums have >= 1 alternative");
        for (i, arm) in arms.into_iter().enumerate().rev() {
            woven = Expr::choose(
                Expr::eq(Expr::ident(&lp).fst(), Expr::U16(i as u16)),
                arm,
                woven,
            );
        }
        let hint = self.ser.ssize_of_sum_cls(&root, path);
        let closed = self.add_hint(hint, &mut None, woven);
        Ok(Expr::let_(
            st.clone(),
            state,
            Expr::let_(
                lp,
                Expr::GetSumLabel(path.clone(), Box::new(Expr::ident(&st).snd())),
                closed,
            ),
        ))
    }

    fn walk_list(
        &mut self,
        path: &Path,
        elem: &MaybeNullable,
        state: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let st = self.sym("zst");
        let n = self.sym("zn");
        let count_hint = self.ser.ssize_of_list_opn(
            self.g, &root, path, Expr::ident(&n),
        );
        let mut opened = self.add_hint(count_hint, &mut None, Expr::ident(&st));
        opened = self.cursor(UnOp::ValuePtrOpen, opened);

        let state_t = Type::pair(Type::Size, Type::ValuePtr(self.root.clone()));
        let fid = self.g.fresh();
        let idx = Expr::Param(fid, 0);
        let loop_st = Expr::Param(fid, 1);
        let sep_hint = self.ser.ssize_of_list_sep(&root, path);
        let after_sep = match sep_hint {
            SSize::Const(0) => {
                let sepped = self.cursor(UnOp::ValuePtrNext, loop_st.clone());
                Expr::choose(
                    Expr::bin(crate::ir::expr::BinOp::Gt, idx, Expr::I32(0)),
                    sepped,
                    loop_st,
                )
            }
            hint => {
                let sepped = self.add_hint(hint, &mut None, loop_st.clone());
                let sepped = self.cursor(UnOp::ValuePtrNext, sepped);
                Expr::choose(
                    Expr::bin(crate::ir::expr::BinOp::Gt, idx, Expr::I32(0)),
                    sepped,
                    loop_st,
                )
            }
        };
        let sd = self.sym("zsd");
        let elem_sized = self.walk(&path.child(0), elem, None, Expr::ident(&sd))?;
        let body = Expr::func(
            fid,
            vec![Type::i32(), state_t],
            Expr::let_(sd, after_sep, elem_sized),
        );
        let looped = Expr::Repeat {
            from: Box::new(Expr::I32(0)),
            to: Box::new(Expr::un(UnOp::ToI32, Expr::ident(&n))),
            body: Box::new(body),
            init: Box::new(opened),
        };
        let cls_hint = self.ser.ssize_of_list_cls(&root, path);
        let closed = self.add_hint(cls_hint, &mut None, looped);
        let closed = self.cursor(UnOp::ValuePtrClose, closed);
        Ok(Expr::let_(
            st.clone(),
            state,
            Expr::let_(
                n,
                Expr::un(
                    UnOp::ListLength,
                    Expr::GetField(path.clone(), Box::new(Expr::ident(&st).snd())),
                ),
                closed,
            ),
        ))
    }
}
