//! The contract every wire-format codec satisfies.
//!
//! A codec method does not touch bytes itself: it returns an IR expression
//! that will, once woven into a converter. Codec compile-time state (the
//! configuration, anything counted while generating) lives in `&mut self`.
//!
//! The driver guarantees both sides of a conversion observe the same
//! number of `opn`/`sep`/`cls` calls in the same tree order, so a stateful
//! codec can keep its own bookkeeping consistent.

use crate::ir::expr::{Expr, FidGen};
use crate::ir::typ::Type;
use crate::schema::{MaybeNullable, Path, Scalar, ValueType};
use crate::error::Result;


/// How a deserializer opens a list: either its format carried an explicit
/// element count, or the list is terminated and must be polled with
/// [`Des::is_end_of_list`] before every element, including the first.
#[derive(Debug)]
pub enum ListStart {
    /// Evaluates to `Pair(u32 count, ptr)`.
    KnownSize(Expr),
    /// Evaluates to the pointer past the opening framing.
    UnknownSize(Expr),
}

/// A static size hint: a compile-time constant, or an expression over the
/// already-materialized heap value.
#[derive(Debug)]
pub enum SSize {
    Const(usize),
    Dyn(Expr),
}

macro_rules! des_scalars {
    ($($m:ident,)*)=>{$(
        /// Evaluates to `Pair(value, ptr)`.
        fn $m(
            &mut self,
            g: &mut FidGen,
            root: &MaybeNullable,
            path: &Path,
            src: Expr,
        ) -> Expr;
    )*};
}

macro_rules! des_scalar_dispatch {
    ($($s:ident $m:ident,)*)=>{
        /// Dispatch to the width-named reader.
        fn dscalar(
            &mut self,
            g: &mut FidGen,
            scalar: Scalar,
            root: &MaybeNullable,
            path: &Path,
            src: Expr,
        ) -> Expr {
            match scalar {
                $( Scalar::$s => self.$m(g, root, path, src), )*
            }
        }
    };
}

/// A deserializer for one wire format.
#[allow(unused_variables)]
pub trait Des {
    /// The pointer type the codec reads through, `DataPtr` for byte
    /// streams, `ValuePtr(root)` for the heap codec.
    fn ptr_type(&self, root: &MaybeNullable) -> Type {
        Type::DataPtr
    }

    /// May consume leading bookkeeping.
    fn start(&mut self, g: &mut FidGen, root: &MaybeNullable, src: Expr) -> Expr {
        src
    }

    fn stop(&mut self, g: &mut FidGen, root: &MaybeNullable, src: Expr) -> Expr {
        src
    }

    des_scalars!(
        dfloat, dstring, dbool, dchar,
        du8, du16, du24, du32, du40, du48, du56, du64, du128,
        di8, di16, di24, di32, di40, di48, di56, di64, di128,
    );

    des_scalar_dispatch!(
        Float dfloat, Str dstring, Bool dbool, Char dchar,
        U8 du8, U16 du16, U24 du24, U32 du32, U40 du40,
        U48 du48, U56 du56, U64 du64, U128 du128,
        I8 di8, I16 di16, I24 di24, I32 di32, I40 di40,
        I48 di48, I56 di56, I64 di64, I128 di128,
    );

    fn tup_opn(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, src: Expr) -> Expr {
        src
    }

    fn tup_cls(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, src: Expr) -> Expr {
        src
    }

    fn tup_sep(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        idx: usize,
        src: Expr,
    ) -> Expr {
        src
    }

    fn rec_opn(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, src: Expr) -> Expr {
        src
    }

    fn rec_cls(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, src: Expr) -> Expr {
        src
    }

    fn rec_sep(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        name: &str,
        idx: usize,
        src: Expr,
    ) -> Expr {
        src
    }

    fn vec_opn(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        dim: usize,
        elem: &MaybeNullable,
        src: Expr,
    ) -> Expr {
        src
    }

    fn vec_cls(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, src: Expr) -> Expr {
        src
    }

    fn vec_sep(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        idx: usize,
        src: Expr,
    ) -> Expr {
        src
    }

    /// Evaluates to `Pair(u16 label, ptr)`.
    fn sum_opn(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        arity: usize,
        src: Expr,
    ) -> Expr {
        Expr::pair(Expr::U16(0), src)
    }

    fn sum_cls(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, src: Expr) -> Expr {
        src
    }

    fn list_opn(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        elem: &MaybeNullable,
        src: Expr,
    ) -> ListStart;

    fn list_cls(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, src: Expr) -> Expr {
        src
    }

    fn list_sep(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, src: Expr) -> Expr {
        src
    }

    /// Polled before every element of an `UnknownSize` list; never
    /// consulted for `KnownSize` openers.
    fn is_end_of_list(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        src: Expr,
    ) -> Expr {
        Expr::Bool(true)
    }

    /// Evaluates to a bool; must not move the pointer.
    fn is_null(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, src: Expr) -> Expr;

    /// Consume the null marker.
    fn dnull(
        &mut self,
        g: &mut FidGen,
        vt: &ValueType,
        root: &MaybeNullable,
        path: &Path,
        src: Expr,
    ) -> Expr;

    /// Skip whatever marks a present value.
    fn dnotnull(
        &mut self,
        g: &mut FidGen,
        vt: &ValueType,
        root: &MaybeNullable,
        path: &Path,
        src: Expr,
    ) -> Expr {
        src
    }
}

macro_rules! ser_scalars {
    ($($m:ident,)*)=>{$(
        /// Evaluates to the pointer past the written value.
        fn $m(
            &mut self,
            g: &mut FidGen,
            root: &MaybeNullable,
            path: &Path,
            v: Expr,
            dst: Expr,
        ) -> Expr;
    )*};
}

macro_rules! ser_scalar_dispatch {
    ($($s:ident $m:ident,)*)=>{
        /// Dispatch to the width-named writer.
        fn sscalar(
            &mut self,
            g: &mut FidGen,
            scalar: Scalar,
            root: &MaybeNullable,
            path: &Path,
            v: Expr,
            dst: Expr,
        ) -> Expr {
            match scalar {
                $( Scalar::$s => self.$m(g, root, path, v, dst), )*
            }
        }
    };
}

/// A serializer for one wire format.
#[allow(unused_variables)]
pub trait Ser {
    fn ptr_type(&self, root: &MaybeNullable) -> Type {
        Type::DataPtr
    }

    fn start(&mut self, g: &mut FidGen, root: &MaybeNullable, dst: Expr) -> Expr {
        dst
    }

    fn stop(&mut self, g: &mut FidGen, root: &MaybeNullable, dst: Expr) -> Expr {
        dst
    }

    ser_scalars!(
        sfloat, sstring, sbool, schar,
        su8, su16, su24, su32, su40, su48, su56, su64, su128,
        si8, si16, si24, si32, si40, si48, si56, si64, si128,
    );

    ser_scalar_dispatch!(
        Float sfloat, Str sstring, Bool sbool, Char schar,
        U8 su8, U16 su16, U24 su24, U32 su32, U40 su40,
        U48 su48, U56 su56, U64 su64, U128 su128,
        I8 si8, I16 si16, I24 si24, I32 si32, I40 si40,
        I48 si48, I56 si56, I64 si64, I128 si128,
    );

    fn tup_opn(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, dst: Expr) -> Expr {
        dst
    }

    fn tup_cls(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, dst: Expr) -> Expr {
        dst
    }

    fn tup_sep(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        idx: usize,
        dst: Expr,
    ) -> Expr {
        dst
    }

    fn rec_opn(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, dst: Expr) -> Expr {
        dst
    }

    fn rec_cls(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, dst: Expr) -> Expr {
        dst
    }

    fn rec_sep(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        name: &str,
        idx: usize,
        dst: Expr,
    ) -> Expr {
        dst
    }

    fn vec_opn(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        dim: usize,
        elem: &MaybeNullable,
        dst: Expr,
    ) -> Expr {
        dst
    }

    fn vec_cls(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, dst: Expr) -> Expr {
        dst
    }

    fn vec_sep(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        idx: usize,
        dst: Expr,
    ) -> Expr {
        dst
    }

    /// `label` evaluates to the u16 the matching deserializer produced.
    fn sum_opn(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        arity: usize,
        label: Expr,
        dst: Expr,
    ) -> Expr {
        dst
    }

    fn sum_cls(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, dst: Expr) -> Expr {
        dst
    }

    /// Formats that need a count up front fail fast on `None`.
    fn list_opn(
        &mut self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        elem: &MaybeNullable,
        count: Option<Expr>,
        dst: Expr,
    ) -> Result<Expr>;

    fn list_cls(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, dst: Expr) -> Expr {
        dst
    }

    fn list_sep(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, dst: Expr) -> Expr {
        dst
    }

    /// Emitted unconditionally before the null/not-null branch, so a
    /// framing marker lands exactly once whatever the branch taken.
    fn nullable(&mut self, g: &mut FidGen, root: &MaybeNullable, path: &Path, dst: Expr) -> Expr {
        dst
    }

    fn snull(
        &mut self,
        g: &mut FidGen,
        vt: &ValueType,
        root: &MaybeNullable,
        path: &Path,
        dst: Expr,
    ) -> Expr;

    fn snotnull(
        &mut self,
        g: &mut FidGen,
        vt: &ValueType,
        root: &MaybeNullable,
        path: &Path,
        dst: Expr,
    ) -> Expr {
        dst
    }
}

/// Serializers whose output size can be predicted from the heap value
/// alone, enabling buffer pre-sizing through `sersize`.
#[allow(unused_variables)]
pub trait SerSized: Ser {
    /// Size of one scalar; `v` evaluates to the value for the dynamic
    /// cases.
    fn ssize_of_scalar(
        &self,
        g: &mut FidGen,
        scalar: Scalar,
        root: &MaybeNullable,
        path: &Path,
        v: Expr,
    ) -> SSize;

    fn ssize_of_tup_opn(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_tup_sep(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_tup_cls(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_vec_opn(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_vec_sep(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_vec_cls(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_sum_opn(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_sum_cls(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    /// `count` evaluates to the u32 element count.
    fn ssize_of_list_opn(
        &self,
        g: &mut FidGen,
        root: &MaybeNullable,
        path: &Path,
        count: Expr,
    ) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_list_sep(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_list_cls(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_null(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }

    fn ssize_of_notnull(&self, root: &MaybeNullable, path: &Path) -> SSize {
        SSize::Const(0)
    }
}
