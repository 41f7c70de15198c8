//! The generic driver: weaves any deserializer and any serializer into a
//! single IR expression that reads one format and writes the other,
//! schema-directed, preserving compound structure and the list-size
//! disciplines.
//!
//! Every compound makes the matching `opn`/`sep`/`cls` calls on both
//! codecs, adjacent and in the same tree order, so stateful codecs stay
//! consistent.

use crate::codec::{Des, ListStart, Ser};
use crate::error::{Result, bail};
use crate::ir::expr::{BinOp, Expr, FidGen, UnOp};
use crate::ir::typ::Type;
use crate::schema::{MaybeNullable, Path, Scalar, SumAlt, ValueType};


/// Vectors up to this many elements are woven as straight-line code; past
/// it the driver switches to a `Repeat` loop with identical semantics.
const VEC_UNROLL_MAX: usize = 8;

/// Build the converter body: evaluates to `Pair(src', dst')`, the
/// pointers past the consumed and the emitted value.
pub fn desser<D: Des, S: Ser>(
    des: &mut D,
    ser: &mut S,
    g: &mut FidGen,
    root: &MaybeNullable,
    src: Expr,
    dst: Expr,
) -> Result<Expr> {
    let mut weaver = Weaver { des, ser, g, root: root.clone(), syms: 0 };
    let mut lets = Vec::new();
    let src0 = {
        let e = weaver.des.start(weaver.g, root, src);
        weaver.bind("src", e, &mut lets)
    };
    let dst0 = {
        let e = weaver.ser.start(weaver.g, root, dst);
        weaver.bind("dst", e, &mut lets)
    };
    let woven = weaver.walk(&Path::root(), root, src0, dst0)?;
    let res = weaver.bind("res", woven, &mut lets);
    let src1 = weaver.des.stop(weaver.g, root, res.clone().fst());
    let dst1 = weaver.ser.stop(weaver.g, root, res.snd());
    Ok(with_lets(lets, Expr::pair(src1, dst1)))
}

fn with_lets(lets: Vec<(String, Expr)>, body: Expr) -> Expr {
    lets.into_iter().rev().fold(body, |body, (name, value)| {
        Expr::let_(name, value, body)
    })
}

struct Weaver<'a, D, S> {
    des: &'a mut D,
    ser: &'a mut S,
    g: &'a mut FidGen,
    root: MaybeNullable,
    syms: u32,
}

impl<'a, D: Des, S: Ser> Weaver<'a, D, S> {
    fn bind(&mut self, prefix: &str, e: Expr, lets: &mut Vec<(String, Expr)>) -> Expr {
        let name = format!("{}_{}", prefix, self.syms);
        self.syms += 1;
        lets.push((name.clone(), e));
        Expr::ident(name)
    }

    /// Weave the value at `path`; evaluates to `Pair(src', dst')`.
    fn walk(&mut self, path: &Path, mn: &MaybeNullable, src: Expr, dst: Expr) -> Result<Expr> {
        tracing::trace!(%path, schema = %mn, "weaving");
        if mn.is_nullable() {
            self.walk_nullable(path, mn.vtype(), src, dst)
        } else {
            self.walk_vtype(path, mn.vtype(), src, dst)
        }
    }

    fn walk_nullable(
        &mut self,
        path: &Path,
        vt: &ValueType,
        src: Expr,
        dst: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let mut lets = Vec::new();
        // the framing marker must land before the branch so both arms
        // leave dst identically typed and positioned
        let framed = self.ser.nullable(self.g, &root, path, dst);
        let dst = self.bind("dst", framed, &mut lets);
        let cond = self.des.is_null(self.g, &root, path, src.clone());
        let null_arm = Expr::pair(
            self.des.dnull(self.g, vt, &root, path, src.clone()),
            self.ser.snull(self.g, vt, &root, path, dst.clone()),
        );
        let value_arm = {
            let mut arm_lets = Vec::new();
            let e = self.des.dnotnull(self.g, vt, &root, path, src);
            let src = self.bind("src", e, &mut arm_lets);
            let e = self.ser.snotnull(self.g, vt, &root, path, dst);
            let dst = self.bind("dst", e, &mut arm_lets);
            with_lets(arm_lets, self.walk_vtype(path, vt, src, dst)?)
        };
        Ok(with_lets(lets, Expr::choose(cond, null_arm, value_arm)))
    }

    fn walk_vtype(
        &mut self,
        path: &Path,
        vt: &ValueType,
        src: Expr,
        dst: Expr,
    ) -> Result<Expr> {
        match vt.resolved() {
            ValueType::Scalar(scalar) => self.walk_scalar(path, *scalar, src, dst),
            ValueType::Usr(_) => unreachable!("resolved"),
            ValueType::Tup(mns) => {
                let children: Vec<&MaybeNullable> = mns.iter().collect();
                self.walk_product(path, Product::Tup, &children, src, dst)
            }
            ValueType::Rec(fields) => {
                let children: Vec<&MaybeNullable> =
                    fields.iter().map(|f| &f.mn).collect();
                let names: Vec<&str> =
                    fields.iter().map(|f| f.name.as_str()).collect();
                self.walk_product(path, Product::Rec(names), &children, src, dst)
            }
            ValueType::Sum(alts) => {
                let alts = alts.clone();
                self.walk_sum(path, &alts, src, dst)
            }
            ValueType::Vec(dim, elem) => {
                let (dim, elem) = (*dim, elem.as_ref().clone());
                self.walk_vec(path, dim, &elem, src, dst)
            }
            ValueType::List(elem) => {
                let elem = elem.as_ref().clone();
                self.walk_list(path, &elem, src, dst)
            }
            ValueType::Map(..) => bail!(
                Schema, "maps have no runtime values to convert at {}", path,
            ),
        }
    }

    fn walk_scalar(
        &mut self,
        path: &Path,
        scalar: Scalar,
        src: Expr,
        dst: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let mut lets = Vec::new();
        let read = self.des.dscalar(self.g, scalar, &root, path, src);
        let vp = self.bind("v", read, &mut lets);
        let written = self.ser.sscalar(
            self.g, scalar, &root, path, vp.clone().fst(), dst,
        );
        let dst = self.bind("dst", written, &mut lets);
        Ok(with_lets(lets, Expr::pair(vp.snd(), dst)))
    }

    fn walk_product(
        &mut self,
        path: &Path,
        kind: Product,
        children: &[&MaybeNullable],
        src: Expr,
        dst: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let mut lets = Vec::new();
        let opened = kind.opn(self.des, self.g, &root, path, src);
        let mut src = self.bind("src", opened, &mut lets);
        let opened = kind.opn_ser(self.ser, self.g, &root, path, dst);
        let mut dst = self.bind("dst", opened, &mut lets);
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                let sep = kind.sep(self.des, self.g, &root, path, i, src);
                src = self.bind("src", sep, &mut lets);
                let sep = kind.sep_ser(self.ser, self.g, &root, path, i, dst);
                dst = self.bind("dst", sep, &mut lets);
            }
            let woven = self.walk(&path.child(i), child, src, dst)?;
            let res = self.bind("res", woven, &mut lets);
            src = res.clone().fst();
            dst = res.snd();
        }
        let closed = kind.cls(self.des, self.g, &root, path, src);
        let src = self.bind("src", closed, &mut lets);
        let closed = kind.cls_ser(self.ser, self.g, &root, path, dst);
        let dst = self.bind("dst", closed, &mut lets);
        Ok(with_lets(lets, Expr::pair(src, dst)))
    }

    fn walk_sum(
        &mut self,
        path: &Path,
        alts: &[SumAlt],
        src: Expr,
        dst: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let arity = alts.len();
        let mut lets = Vec::new();
        let opened = self.des.sum_opn(self.g, &root, path, arity, src);
        let lab_sp = self.bind("lab", opened, &mut lets);
        let opened = self.ser.sum_opn(
            self.g, &root, path, arity, lab_sp.clone().fst(), dst,
        );
        let dst = self.bind("dst", opened, &mut lets);
        // dispatch on the label; labels past the last alternative fall
        // through to it, formats with tag checks reject them earlier
        let mut arms = Vec::with_capacity(arity);
        for (i, alt) in alts.iter().enumerate() {
            arms.push(self.walk(
                &path.child(i),
                &alt.mn,
                lab_sp.clone().snd(),
                dst.clone(),
            )?);
        }
        let mut woven = arms.pop().expect("sums have >= 1 alternative");
        for (i, arm) in arms.into_iter().enumerate().rev() {
            woven = Expr::choose(
                Expr::eq(lab_sp.clone().fst(), Expr::U16(i as u16)),
                arm,
                woven,
            );
        }
        let res = self.bind("res", woven, &mut lets);
        let closed = self.des.sum_cls(self.g, &root, path, res.clone().fst());
        let src = self.bind("src", closed, &mut lets);
        let closed = self.ser.sum_cls(self.g, &root, path, res.snd());
        let dst = self.bind("dst", closed, &mut lets);
        Ok(with_lets(lets, Expr::pair(src, dst)))
    }

    fn walk_vec(
        &mut self,
        path: &Path,
        dim: usize,
        elem: &MaybeNullable,
        src: Expr,
        dst: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let mut lets = Vec::new();
        let opened = self.des.vec_opn(self.g, &root, path, dim, elem, src);
        let mut src = self.bind("src", opened, &mut lets);
        let opened = self.ser.vec_opn(self.g, &root, path, dim, elem, dst);
        let mut dst = self.bind("dst", opened, &mut lets);
        if dim <= VEC_UNROLL_MAX {
            for i in 0..dim {
                if i > 0 {
                    let sep = self.des.vec_sep(self.g, &root, path, i, src);
                    src = self.bind("src", sep, &mut lets);
                    let sep = self.ser.vec_sep(self.g, &root, path, i, dst);
                    dst = self.bind("dst", sep, &mut lets);
                }
                let woven = self.walk(&path.child(i), elem, src, dst)?;
                let res = self.bind("res", woven, &mut lets);
                src = res.clone().fst();
                dst = res.snd();
            }
        } else {
            let state = Expr::pair(src, dst);
            let looped = self.elem_loop(
                path, elem, Expr::I32(0), Expr::I32(dim as i32), state, Framing::Vec,
            )?;
            let res = self.bind("res", looped, &mut lets);
            src = res.clone().fst();
            dst = res.snd();
        }
        let closed = self.des.vec_cls(self.g, &root, path, src);
        let src = self.bind("src", closed, &mut lets);
        let closed = self.ser.vec_cls(self.g, &root, path, dst);
        let dst = self.bind("dst", closed, &mut lets);
        Ok(with_lets(lets, Expr::pair(src, dst)))
    }

    fn walk_list(
        &mut self,
        path: &Path,
        elem: &MaybeNullable,
        src: Expr,
        dst: Expr,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let mut lets = Vec::new();
        let (src, dst) = match self.des.list_opn(self.g, &root, path, elem, src) {
            ListStart::KnownSize(counted) => {
                let csp = self.bind("cnt", counted, &mut lets);
                let cnt = self.bind("n", csp.clone().fst(), &mut lets);
                let opened = self.ser.list_opn(
                    self.g, &root, path, elem, Some(cnt.clone()), dst,
                )?;
                let dst = self.bind("dst", opened, &mut lets);
                let state = Expr::pair(csp.snd(), dst);
                let looped = self.elem_loop(
                    path,
                    elem,
                    Expr::I32(0),
                    Expr::un(UnOp::ToI32, cnt),
                    state,
                    Framing::List,
                )?;
                let res = self.bind("res", looped, &mut lets);
                (res.clone().fst(), res.snd())
            }
            ListStart::UnknownSize(opened) => {
                let src = self.bind("src", opened, &mut lets);
                let opened = self.ser.list_opn(self.g, &root, path, elem, None, dst)?;
                let dst = self.bind("dst", opened, &mut lets);
                // the first? flag suppresses the separators exactly once
                let state = Expr::pair(Expr::Bool(true), Expr::pair(src, dst));
                let state_t = Type::pair(
                    Type::bool_(),
                    self.state_type(),
                );
                let cond_fid = self.g.fresh();
                let probe = self.des.is_end_of_list(
                    self.g, &root, path,
                    Expr::Param(cond_fid, 0).snd().fst(),
                );
                let cond = Expr::func(
                    cond_fid,
                    vec![state_t.clone()],
                    Expr::un(UnOp::Not, probe),
                );
                let body_fid = self.g.fresh();
                let st = Expr::Param(body_fid, 0);
                let sep_src = self.des.list_sep(
                    self.g, &root, path, st.clone().snd().fst(),
                );
                let sep_dst = self.ser.list_sep(
                    self.g, &root, path, st.clone().snd().snd(),
                );
                let after_sep = Expr::choose(
                    st.clone().fst(),
                    st.clone().snd(),
                    Expr::pair(sep_src, sep_dst),
                );
                let mut body_lets = Vec::new();
                let sd = self.bind("sd", after_sep, &mut body_lets);
                let woven = self.walk(
                    &path.child(0), elem, sd.clone().fst(), sd.snd(),
                )?;
                let body = Expr::func(
                    body_fid,
                    vec![state_t],
                    with_lets(body_lets, Expr::pair(Expr::Bool(false), woven)),
                );
                let looped = Expr::LoopWhile {
                    cond: Box::new(cond),
                    body: Box::new(body),
                    init: Box::new(state),
                };
                let res = self.bind("res", looped, &mut lets);
                (res.clone().snd().fst(), res.snd().snd())
            }
        };
        let closed = self.des.list_cls(self.g, &root, path, src);
        let src = self.bind("src", closed, &mut lets);
        let closed = self.ser.list_cls(self.g, &root, path, dst);
        let dst = self.bind("dst", closed, &mut lets);
        Ok(with_lets(lets, Expr::pair(src, dst)))
    }

    /// A `Repeat` from `from` to `to` weaving one element per iteration,
    /// separators on both sides except at index 0.
    fn elem_loop(
        &mut self,
        path: &Path,
        elem: &MaybeNullable,
        from: Expr,
        to: Expr,
        init: Expr,
        framing: Framing,
    ) -> Result<Expr> {
        let root = self.root.clone();
        let state_t = self.state_type();
        let fid = self.g.fresh();
        let idx = Expr::Param(fid, 0);
        let st = Expr::Param(fid, 1);
        let sep_src = match framing {
            Framing::Vec => self.des.vec_sep(self.g, &root, path, 1, st.clone().fst()),
            Framing::List => self.des.list_sep(self.g, &root, path, st.clone().fst()),
        };
        let sep_dst = match framing {
            Framing::Vec => self.ser.vec_sep(self.g, &root, path, 1, st.clone().snd()),
            Framing::List => self.ser.list_sep(self.g, &root, path, st.clone().snd()),
        };
        let after_sep = Expr::choose(
            Expr::bin(BinOp::Gt, idx, Expr::I32(0)),
            Expr::pair(sep_src, sep_dst),
            st,
        );
        let mut body_lets = Vec::new();
        let sd = self.bind("sd", after_sep, &mut body_lets);
        let woven = self.walk(&path.child(0), elem, sd.clone().fst(), sd.snd())?;
        let body = Expr::func(
            fid,
            vec![Type::i32(), state_t],
            with_lets(body_lets, woven),
        );
        Ok(Expr::Repeat {
            from: Box::new(from),
            to: Box::new(to),
            body: Box::new(body),
            init: Box::new(init),
        })
    }

    /// `Pair(des ptr, ser ptr)`, the loop-carried state shape.
    fn state_type(&self) -> Type {
        Type::pair(
            self.des.ptr_type(&self.root),
            self.ser.ptr_type(&self.root),
        )
    }
}

enum Framing {
    Vec,
    List,
}

/// Which product discipline to call on the codecs.
enum Product<'a> {
    Tup,
    Rec(Vec<&'a str>),
}

impl<'a> Product<'a> {
    fn opn<D: Des + ?Sized>(
        &self,
        des: &mut D,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        src: Expr,
    ) -> Expr {
        match self {
            Product::Tup => des.tup_opn(g, root, path, src),
            Product::Rec(_) => des.rec_opn(g, root, path, src),
        }
    }

    fn cls<D: Des + ?Sized>(
        &self,
        des: &mut D,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        src: Expr,
    ) -> Expr {
        match self {
            Product::Tup => des.tup_cls(g, root, path, src),
            Product::Rec(_) => des.rec_cls(g, root, path, src),
        }
    }

    fn sep<D: Des + ?Sized>(
        &self,
        des: &mut D,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        idx: usize,
        src: Expr,
    ) -> Expr {
        match self {
            Product::Tup => des.tup_sep(g, root, path, idx, src),
            Product::Rec(names) => des.rec_sep(g, root, path, names[idx], idx, src),
        }
    }

    fn opn_ser<S: Ser + ?Sized>(
        &self,
        ser: &mut S,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        dst: Expr,
    ) -> Expr {
        match self {
            Product::Tup => ser.tup_opn(g, root, path, dst),
            Product::Rec(_) => ser.rec_opn(g, root, path, dst),
        }
    }

    fn cls_ser<S: Ser + ?Sized>(
        &self,
        ser: &mut S,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        dst: Expr,
    ) -> Expr {
        match self {
            Product::Tup => ser.tup_cls(g, root, path, dst),
            Product::Rec(_) => ser.rec_cls(g, root, path, dst),
        }
    }

    fn sep_ser<S: Ser + ?Sized>(
        &self,
        ser: &mut S,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        idx: usize,
        dst: Expr,
    ) -> Expr {
        match self {
            Product::Tup => ser.tup_sep(g, root, path, idx, dst),
            Product::Rec(names) => ser.rec_sep(g, root, path, names[idx], idx, dst),
        }
    }
}
