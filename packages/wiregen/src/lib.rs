//! Wiregen is a meta-(de)serializer: from a declarative description of a
//! data schema it synthesises, ahead of time, a specialised program that
//! converts between wire formats, or between a wire format and an
//! in-memory value. The synthesised program is an expression of a small
//! typed IR, which a backend prints as source code in its target
//! language; the host's toolchain compiles that separately. Everything is
//! specialised to one schema at generation time, so the generated
//! converter carries no reflection and no interpretation loop.
//!
//! Typical usage pattern:
//!
//! - parse a schema with [`schema::parse_schema`] (or build one from the
//!   [`schema`] constructors)
//! - pick a deserializer and a serializer, e.g. [`sexpr::SExprDes`] and
//!   [`rowbinary::RowBinarySer`]
//! - create a [`backend::State`] for the schema; its fid allocator feeds
//!   every expression built for it
//! - weave the converter with [`desser::desser`] (format to format), or
//!   [`heap::materialize`] / [`heap::serialize`] (through the heap)
//! - hand the expression to
//!   [`backend::State::identifier_of_expression`], then print both files
//!   with a [`backend::Backend`] such as [`backend::Cpp`] and run its
//!   [`backend::Backend::compile_cmd`]
//!
//! The IR can also be evaluated in-process ([`ir::eval`]), which is how
//! this crate tests that a woven converter means what the schema says
//! without involving a target toolchain.

pub mod error;
pub mod schema;
pub mod ir;
pub mod codec;
pub mod desser;
pub mod heap;
pub mod sexpr;
pub mod rowbinary;
pub mod devnull;
pub mod backend;

pub use crate::{
    codec::{Des, ListStart, Ser, SerSized, SSize},
    desser::desser,
    error::{Error, ErrorKind, Result},
    heap::{materialize, serialize, sersize, HeapDes, HeapSer},
    ir::{
        expr::{BinOp, Endianness, Expr, FidGen, UnOp},
        typ::Type,
        text::parse_expr,
        typecheck::{type_of, TypeEnv},
        eval::{eval, eval_apply, eval_with, DataCursor, HeapPtr, RtVal},
    },
    schema::{
        parse_schema, register_user_type, find_user_type,
        MaybeNullable, Path, RecField, Scalar, SumAlt, UserType, ValueType,
    },
};
