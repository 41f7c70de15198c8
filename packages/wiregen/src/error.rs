//! Error types.

use std::fmt::{self, Formatter, Display};


pub type Result<I> = std::result::Result<I, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    error: Box<dyn std::error::Error + Send + Sync>,
    /// Byte offset into the text being parsed, when there is one.
    pos: Option<usize>,
    /// Printed form of the offending schema subtree or IR subterm.
    subject: Option<String>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ErrorKind {
    /// The schema text or schema term is illegal: parse failure, unknown
    /// user type, zero vector dimension, duplicate record field or sum
    /// label. The offending call returns this and the process continues.
    Schema,

    /// An IR expression does not type-check. Fatal for the generator run;
    /// the caller discards its backend state.
    BadType,

    /// A codec was asked for something its wire format cannot do, such as
    /// serializing a list without a count when the format requires one.
    Codec,

    /// The backend refused an expression: nullable at top level, unbound
    /// free variables, or an emission limit.
    Codegen,

    /// A failure while evaluating IR in-process: buffer exhaustion,
    /// malformed encoding, out-of-range numeric parse.
    Runtime,

    /// Underlying IO error while printing generated source.
    Io,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error {
            kind,
            error: error.into(),
            pos: None,
            subject: None,
        }
    }

    pub fn at_pos(mut self, pos: usize) -> Self {
        self.pos = Some(pos);
        self
    }

    pub fn with_subject<S: Display>(mut self, subject: S) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Position in the source text, if this came out of a parser.
    pub fn pos(&self) -> Option<usize> {
        self.pos
    }

    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.error
    }

    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self.error
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, error)
    }
}

impl From<fmt::Error> for Error {
    fn from(error: fmt::Error) -> Self {
        Self::new(ErrorKind::Io, error)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match *self {
            ErrorKind::Schema => "illegal schema",
            ErrorKind::BadType => "expression does not type-check",
            ErrorKind::Codec => "unsupported codec operation",
            ErrorKind::Codegen => "backend refused expression",
            ErrorKind::Runtime => "runtime failure",
            ErrorKind::Io => "IO error",
        })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(&self.kind, f)?;
        f.write_str(", ")?;
        Display::fmt(&self.error, f)?;
        if let Some(pos) = self.pos {
            write!(f, " (at byte {})", pos)?;
        }
        if let Some(ref subject) = self.subject {
            f.write_str("\nin: ")?;
            f.write_str(subject)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner())
    }
}


macro_rules! error {
    ($k:ident, $($e:tt)*)=>{
        $crate::error::Error::new(
            $crate::error::ErrorKind::$k,
            format!($($e)*),
        )
    };
}

macro_rules! bail {
    ($($e:tt)*)=>{ return Err($crate::error::error!($($e)*)) };
}

macro_rules! ensure {
    ($c:expr, $($e:tt)*)=>{
        if !$c {
            $crate::error::bail!($($e)*);
        }
    };
}

pub(crate) use error;
pub(crate) use bail;
pub(crate) use ensure;
