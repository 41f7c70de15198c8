//! The staged expression IR: a typed tree of programs producing pointers,
//! bytes, integers, pairs and user values, with a textual form, a type
//! checker, and an in-process evaluator.

pub mod typ;
pub mod expr;
pub mod text;
pub mod typecheck;
pub mod eval;

pub use typ::Type;
pub use expr::{Expr, UnOp, BinOp, Endianness, FidGen};
pub use text::parse_expr;
pub use typecheck::{type_of, TypeEnv};
pub use eval::{eval, eval_apply, eval_with, RtVal};
