//! A serializer that type-checks everything and writes nothing. Useful
//! for skipping over one format's value while consuming it.

use crate::codec::{Ser, SerSized, SSize};
use crate::error::Result;
use crate::ir::expr::{Expr, FidGen, UnOp};
use crate::schema::{MaybeNullable, Path, Scalar, ValueType};


#[derive(Debug, Default)]
pub struct DevNullSer;

fn drop_value(v: Expr, dst: Expr) -> Expr {
    Expr::Seq(vec![Expr::un(UnOp::Ignore, v), dst])
}

macro_rules! devnull_ser_scalars {
    ($($m:ident,)*)=>{$(
        fn $m(
            &mut self,
            _g: &mut FidGen,
            _root: &MaybeNullable,
            _path: &Path,
            v: Expr,
            dst: Expr,
        ) -> Expr {
            drop_value(v, dst)
        }
    )*};
}

impl Ser for DevNullSer {
    devnull_ser_scalars!(
        sfloat, sstring, sbool, schar,
        su8, su16, su24, su32, su40, su48, su56, su64, su128,
        si8, si16, si24, si32, si40, si48, si56, si64, si128,
    );

    fn sum_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: usize,
        label: Expr,
        dst: Expr,
    ) -> Expr {
        drop_value(label, dst)
    }

    fn list_opn(
        &mut self,
        _: &mut FidGen,
        _: &MaybeNullable,
        _: &Path,
        _: &MaybeNullable,
        count: Option<Expr>,
        dst: Expr,
    ) -> Result<Expr> {
        Ok(match count {
            Some(count) => drop_value(count, dst),
            None => dst,
        })
    }

    fn snull(
        &mut self,
        _: &mut FidGen,
        _: &ValueType,
        _: &MaybeNullable,
        _: &Path,
        dst: Expr,
    ) -> Expr {
        dst
    }
}

impl SerSized for DevNullSer {
    fn ssize_of_scalar(
        &self,
        _g: &mut FidGen,
        _scalar: Scalar,
        _root: &MaybeNullable,
        _path: &Path,
        _v: Expr,
    ) -> SSize {
        SSize::Const(0)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::desser::desser;
    use crate::ir::eval::{eval_with, DataCursor, RtVal};
    use crate::schema::parse_schema;
    use crate::sexpr::SExprDes;

    #[test]
    fn consumes_everything_and_writes_nothing() {
        let root = parse_schema("{a: u8; b: string?; c: u16[]}").unwrap();
        let mut g = FidGen::new();
        let woven = desser(
            &mut SExprDes::default(),
            &mut DevNullSer,
            &mut g,
            &root,
            Expr::ident("in"),
            Expr::DataPtrOfBuffer(16),
        ).unwrap();
        let input = b"(7 \"keep\" 2 (10 11))";
        let out = eval_with(
            vec![(
                "in".to_owned(),
                RtVal::DataPtr(DataCursor::of_bytes(input.to_vec())),
            )],
            &woven,
        ).unwrap();
        let RtVal::Pair(src, dst) = out else { panic!() };
        let RtVal::DataPtr(src) = *src else { panic!() };
        assert_eq!(src.rem(), 0, "input fully consumed");
        let RtVal::DataPtr(dst) = *dst else { panic!() };
        assert_eq!(dst.taken(), b"", "nothing written");
    }
}
