//! Textual form of expressions and IR types: one constructor tag followed
//! by its operands in parentheses. The parser accepts exactly the
//! printer's output; round trip is identity. Used for debugging and
//! property tests; not a wire format.

use crate::error::{Error, ErrorKind, Result, bail, ensure};
use crate::ir::expr::{BinOp, Endianness, Expr, UnOp};
use crate::ir::typ::Type;
use crate::schema::{parse_schema, Path};
use std::fmt::{self, Formatter, Display};


impl Display for Expr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        use Expr::*;
        match self {
            Null(vt) => write!(f, "(null {:?})", vt.to_string()),
            Bool(b) => write!(f, "(bool {})", b),
            Char(c) => write!(f, "(char {:?})", c.to_string()),
            Float(x) => write!(f, "(float {:?})", x),
            Str(s) => write!(f, "(string {:?})", s),
            U8(n) => write!(f, "(u8 {})", n),
            U16(n) => write!(f, "(u16 {})", n),
            U24(n) => write!(f, "(u24 {})", n),
            U32(n) => write!(f, "(u32 {})", n),
            U40(n) => write!(f, "(u40 {})", n),
            U48(n) => write!(f, "(u48 {})", n),
            U56(n) => write!(f, "(u56 {})", n),
            U64(n) => write!(f, "(u64 {})", n),
            U128(n) => write!(f, "(u128 {})", n),
            I8(n) => write!(f, "(i8 {})", n),
            I16(n) => write!(f, "(i16 {})", n),
            I24(n) => write!(f, "(i24 {})", n),
            I32(n) => write!(f, "(i32 {})", n),
            I40(n) => write!(f, "(i40 {})", n),
            I48(n) => write!(f, "(i48 {})", n),
            I56(n) => write!(f, "(i56 {})", n),
            I64(n) => write!(f, "(i64 {})", n),
            I128(n) => write!(f, "(i128 {})", n),
            Bit(b) => write!(f, "(bit {})", b),
            Byte(n) => write!(f, "(byte {})", n),
            Word(n) => write!(f, "(word {})", n),
            DWord(n) => write!(f, "(dword {})", n),
            QWord(n) => write!(f, "(qword {})", n),
            OWord(n) => write!(f, "(oword {})", n),
            Size(n) => write!(f, "(size {})", n),
            Bytes(bs) => {
                f.write_str("(bytes \"")?;
                for b in bs {
                    write!(f, "{:02x}", b)?;
                }
                f.write_str("\")")
            }
            DataPtrOfString(s) => write!(f, "(data-ptr-of-string {:?})", s),
            DataPtrOfBuffer(n) => write!(f, "(data-ptr-of-buffer {})", n),
            AllocValue(mn) => write!(f, "(alloc-value {:?})", mn.to_string()),
            Identifier(name) => write!(f, "(identifier {:?})", name),
            Param(fid, i) => write!(f, "(param {} {})", fid, i),
            Seq(es) => {
                f.write_str("(seq")?;
                for e in es {
                    write!(f, " {}", e)?;
                }
                f.write_str(")")
            }
            Function { fid, params, body } => {
                write!(f, "(function {} (", fid)?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    Display::fmt(param, f)?;
                }
                write!(f, ") {})", body)
            }
            Let { name, value, body } => {
                write!(f, "(let {:?} {} {})", name, value, body)
            }
            Unary(op, a) => write!(f, "({} {})", op.tag(), a),
            Binary(op, a, b) => write!(f, "({} {} {})", op.tag(), a, b),
            GetField(path, a) => write!(f, "(get-field \"{}\" {})", path, a),
            FieldIsNull(path, a) => write!(f, "(field-is-null \"{}\" {})", path, a),
            SetFieldNull(path, a) => write!(f, "(set-field-null \"{}\" {})", path, a),
            SetField(path, a, b) => write!(f, "(set-field \"{}\" {} {})", path, a, b),
            GetSumLabel(path, a) => write!(f, "(get-sum-label \"{}\" {})", path, a),
            SetSumLabel(path, a, b) => {
                write!(f, "(set-sum-label \"{}\" {} {})", path, a, b)
            }
            Choose { cond, then_, else_ } => {
                write!(f, "(choose {} {} {})", cond, then_, else_)
            }
            LoopWhile { cond, body, init } => {
                write!(f, "(loop-while {} {} {})", cond, body, init)
            }
            LoopUntil { body, cond, init } => {
                write!(f, "(loop-until {} {} {})", body, cond, init)
            }
            SetBit(a, b, c) => write!(f, "(set-bit {} {} {})", a, b, c),
            BlitByte(a, b, c) => write!(f, "(blit-byte {} {} {})", a, b, c),
            ReadWhile { cond, reduce, init, pos } => {
                write!(f, "(read-while {} {} {} {})", cond, reduce, init, pos)
            }
            Repeat { from, to, body, init } => {
                write!(f, "(repeat {} {} {} {})", from, to, body, init)
            }
            ReadWord(en, a) => write!(f, "(read-word {} {})", en.tag(), a),
            ReadDWord(en, a) => write!(f, "(read-dword {} {})", en.tag(), a),
            ReadQWord(en, a) => write!(f, "(read-qword {} {})", en.tag(), a),
            ReadOWord(en, a) => write!(f, "(read-oword {} {})", en.tag(), a),
            WriteWord(en, a, b) => write!(f, "(write-word {} {} {})", en.tag(), a, b),
            WriteDWord(en, a, b) => write!(f, "(write-dword {} {} {})", en.tag(), a, b),
            WriteQWord(en, a, b) => write!(f, "(write-qword {} {} {})", en.tag(), a, b),
            WriteOWord(en, a, b) => write!(f, "(write-oword {} {} {})", en.tag(), a, b),
            PeekWord(en, a, b) => write!(f, "(peek-word {} {} {})", en.tag(), a, b),
            PeekDWord(en, a, b) => write!(f, "(peek-dword {} {} {})", en.tag(), a, b),
            PeekQWord(en, a, b) => write!(f, "(peek-qword {} {} {})", en.tag(), a, b),
            PeekOWord(en, a, b) => write!(f, "(peek-oword {} {} {})", en.tag(), a, b),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Open,
    Close,
    Atom(String),
    Quoted(String),
}

fn tokenize(text: &str) -> Result<Vec<Tok>> {
    let mut toks = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(at, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                toks.push(Tok::Open);
            }
            ')' => {
                chars.next();
                toks.push(Tok::Close);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        None => bail!(Schema, "unterminated string at byte {}", at),
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, '"')) => s.push('"'),
                            Some((_, '\\')) => s.push('\\'),
                            Some((_, '\'')) => s.push('\''),
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 'r')) => s.push('\r'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, '0')) => s.push('\0'),
                            Some((_, 'u')) => {
                                ensure!(
                                    matches!(chars.next(), Some((_, '{'))),
                                    Schema, "bad unicode escape",
                                );
                                let mut hex = String::new();
                                loop {
                                    match chars.next() {
                                        Some((_, '}')) => break,
                                        Some((_, h)) => hex.push(h),
                                        None => bail!(Schema, "bad unicode escape"),
                                    }
                                }
                                let n = u32::from_str_radix(&hex, 16).map_err(|e| {
                                    Error::new(ErrorKind::Schema, e.to_string())
                                })?;
                                s.push(char::from_u32(n).ok_or_else(|| Error::new(
                                    ErrorKind::Schema,
                                    format!("{:#x} is not a char", n),
                                ))?);
                            }
                            other => bail!(Schema, "bad escape {:?}", other),
                        },
                        Some((_, c)) => s.push(c),
                    }
                }
                toks.push(Tok::Quoted(s));
            }
            _ => {
                let start = at;
                let mut end = at;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                toks.push(Tok::Atom(text[start..end].to_owned()));
            }
        }
    }
    Ok(toks)
}

/// Parse the textual form of an expression.
pub fn parse_expr(text: &str) -> Result<Expr> {
    let toks = tokenize(text)?;
    let mut parser = Parser { toks, i: 0 };
    let e = parser.expr()?;
    ensure!(parser.i == parser.toks.len(), Schema, "trailing input after expression");
    Ok(e)
}

struct Parser {
    toks: Vec<Tok>,
    i: usize,
}

impl Parser {
    fn next(&mut self) -> Result<Tok> {
        let tok = self.toks.get(self.i).cloned().ok_or_else(|| Error::new(
            ErrorKind::Schema,
            "unexpected end of expression",
        ))?;
        self.i += 1;
        Ok(tok)
    }

    fn open(&mut self) -> Result<()> {
        ensure!(self.next()? == Tok::Open, Schema, "expected '('");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        ensure!(self.next()? == Tok::Close, Schema, "expected ')'");
        Ok(())
    }

    fn atom(&mut self) -> Result<String> {
        match self.next()? {
            Tok::Atom(a) => Ok(a),
            tok => bail!(Schema, "expected an atom, got {:?}", tok),
        }
    }

    fn quoted(&mut self) -> Result<String> {
        match self.next()? {
            Tok::Quoted(s) => Ok(s),
            tok => bail!(Schema, "expected a quoted string, got {:?}", tok),
        }
    }

    fn num<T: std::str::FromStr>(&mut self) -> Result<T>
    where
        T::Err: Display,
    {
        let a = self.atom()?;
        a.parse().map_err(|e| Error::new(
            ErrorKind::Schema,
            format!("bad number {:?}: {}", a, e),
        ))
    }

    fn path(&mut self) -> Result<Path> {
        self.quoted()?.parse()
    }

    fn endianness(&mut self) -> Result<Endianness> {
        let a = self.atom()?;
        Endianness::from_tag(&a).ok_or_else(|| Error::new(
            ErrorKind::Schema,
            format!("bad endianness {:?}", a),
        ))
    }

    fn schema_text(&mut self) -> Result<crate::schema::MaybeNullable> {
        parse_schema(&self.quoted()?)
    }

    fn expr(&mut self) -> Result<Expr> {
        self.open()?;
        let tag = self.atom()?;
        let e = self.tagged(&tag)?;
        self.close()?;
        Ok(e)
    }

    fn tagged(&mut self, tag: &str) -> Result<Expr> {
        Ok(match tag {
            "null" => Expr::Null(self.schema_text()?.into_vtype()),
            "bool" => Expr::Bool(self.num()?),
            "char" => {
                let s = self.quoted()?;
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Expr::Char(c),
                    _ => bail!(Schema, "char wants exactly one character, got {:?}", s),
                }
            }
            "float" => Expr::Float(self.num()?),
            "string" => Expr::Str(self.quoted()?),
            "u8" => Expr::U8(self.num()?),
            "u16" => Expr::U16(self.num()?),
            "u24" => Expr::U24(self.num()?),
            "u32" => Expr::U32(self.num()?),
            "u40" => Expr::U40(self.num()?),
            "u48" => Expr::U48(self.num()?),
            "u56" => Expr::U56(self.num()?),
            "u64" => Expr::U64(self.num()?),
            "u128" => Expr::U128(self.num()?),
            "i8" => Expr::I8(self.num()?),
            "i16" => Expr::I16(self.num()?),
            "i24" => Expr::I24(self.num()?),
            "i32" => Expr::I32(self.num()?),
            "i40" => Expr::I40(self.num()?),
            "i48" => Expr::I48(self.num()?),
            "i56" => Expr::I56(self.num()?),
            "i64" => Expr::I64(self.num()?),
            "i128" => Expr::I128(self.num()?),
            "bit" => Expr::Bit(self.num()?),
            "byte" => Expr::Byte(self.num()?),
            "word" => Expr::Word(self.num()?),
            "dword" => Expr::DWord(self.num()?),
            "qword" => Expr::QWord(self.num()?),
            "oword" => Expr::OWord(self.num()?),
            "size" => Expr::Size(self.num()?),
            "bytes" => {
                let hex = self.quoted()?;
                ensure!(hex.len() % 2 == 0, Schema, "odd hex length in bytes");
                let bs = (0..hex.len()).step_by(2)
                    .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| {
                        Error::new(ErrorKind::Schema, e.to_string())
                    }))
                    .collect::<Result<Vec<u8>>>()?;
                Expr::Bytes(bs)
            }
            "data-ptr-of-string" => Expr::DataPtrOfString(self.quoted()?),
            "data-ptr-of-buffer" => Expr::DataPtrOfBuffer(self.num()?),
            "alloc-value" => Expr::AllocValue(self.schema_text()?),
            "identifier" => Expr::Identifier(self.quoted()?),
            "param" => Expr::Param(self.num()?, self.num()?),
            "seq" => {
                let mut es = Vec::new();
                while self.toks.get(self.i) != Some(&Tok::Close) {
                    es.push(self.expr()?);
                }
                Expr::Seq(es)
            }
            "function" => {
                let fid = self.num()?;
                self.open()?;
                let mut params = Vec::new();
                while self.toks.get(self.i) != Some(&Tok::Close) {
                    params.push(self.typ()?);
                }
                self.close()?;
                Expr::Function { fid, params, body: Box::new(self.expr()?) }
            }
            "let" => {
                let name = self.quoted()?;
                Expr::let_(name, self.expr()?, self.expr()?)
            }
            "get-field" => Expr::GetField(self.path()?, Box::new(self.expr()?)),
            "field-is-null" => Expr::FieldIsNull(self.path()?, Box::new(self.expr()?)),
            "set-field-null" => Expr::SetFieldNull(self.path()?, Box::new(self.expr()?)),
            "set-field" => Expr::SetField(
                self.path()?,
                Box::new(self.expr()?),
                Box::new(self.expr()?),
            ),
            "get-sum-label" => Expr::GetSumLabel(self.path()?, Box::new(self.expr()?)),
            "set-sum-label" => Expr::SetSumLabel(
                self.path()?,
                Box::new(self.expr()?),
                Box::new(self.expr()?),
            ),
            "choose" => Expr::choose(self.expr()?, self.expr()?, self.expr()?),
            "loop-while" => Expr::LoopWhile {
                cond: Box::new(self.expr()?),
                body: Box::new(self.expr()?),
                init: Box::new(self.expr()?),
            },
            "loop-until" => Expr::LoopUntil {
                body: Box::new(self.expr()?),
                cond: Box::new(self.expr()?),
                init: Box::new(self.expr()?),
            },
            "set-bit" => Expr::SetBit(
                Box::new(self.expr()?),
                Box::new(self.expr()?),
                Box::new(self.expr()?),
            ),
            "blit-byte" => Expr::BlitByte(
                Box::new(self.expr()?),
                Box::new(self.expr()?),
                Box::new(self.expr()?),
            ),
            "read-while" => Expr::ReadWhile {
                cond: Box::new(self.expr()?),
                reduce: Box::new(self.expr()?),
                init: Box::new(self.expr()?),
                pos: Box::new(self.expr()?),
            },
            "repeat" => Expr::Repeat {
                from: Box::new(self.expr()?),
                to: Box::new(self.expr()?),
                body: Box::new(self.expr()?),
                init: Box::new(self.expr()?),
            },
            "read-word" => Expr::ReadWord(self.endianness()?, Box::new(self.expr()?)),
            "read-dword" => Expr::ReadDWord(self.endianness()?, Box::new(self.expr()?)),
            "read-qword" => Expr::ReadQWord(self.endianness()?, Box::new(self.expr()?)),
            "read-oword" => Expr::ReadOWord(self.endianness()?, Box::new(self.expr()?)),
            "write-word" => Expr::WriteWord(
                self.endianness()?, Box::new(self.expr()?), Box::new(self.expr()?),
            ),
            "write-dword" => Expr::WriteDWord(
                self.endianness()?, Box::new(self.expr()?), Box::new(self.expr()?),
            ),
            "write-qword" => Expr::WriteQWord(
                self.endianness()?, Box::new(self.expr()?), Box::new(self.expr()?),
            ),
            "write-oword" => Expr::WriteOWord(
                self.endianness()?, Box::new(self.expr()?), Box::new(self.expr()?),
            ),
            "peek-word" => Expr::PeekWord(
                self.endianness()?, Box::new(self.expr()?), Box::new(self.expr()?),
            ),
            "peek-dword" => Expr::PeekDWord(
                self.endianness()?, Box::new(self.expr()?), Box::new(self.expr()?),
            ),
            "peek-qword" => Expr::PeekQWord(
                self.endianness()?, Box::new(self.expr()?), Box::new(self.expr()?),
            ),
            "peek-oword" => Expr::PeekOWord(
                self.endianness()?, Box::new(self.expr()?), Box::new(self.expr()?),
            ),
            _ => {
                if let Some(op) = UnOp::from_tag(tag) {
                    Expr::un(op, self.expr()?)
                } else if let Some(op) = BinOp::from_tag(tag) {
                    Expr::bin(op, self.expr()?, self.expr()?)
                } else {
                    bail!(Schema, "unknown expression tag {:?}", tag);
                }
            }
        })
    }

    fn typ(&mut self) -> Result<Type> {
        match self.next()? {
            Tok::Atom(a) => Ok(match a.as_str() {
                "void" => Type::Void,
                "dataptr" => Type::DataPtr,
                "size" => Type::Size,
                "bit" => Type::Bit,
                "byte" => Type::Byte,
                "word" => Type::Word,
                "dword" => Type::DWord,
                "qword" => Type::QWord,
                "oword" => Type::OWord,
                "bytes" => Type::Bytes,
                _ => bail!(Schema, "unknown type atom {:?}", a),
            }),
            Tok::Open => {
                let tag = self.atom()?;
                let t = match tag.as_str() {
                    "value" => Type::Value(self.schema_text()?),
                    "valueptr" => Type::ValuePtr(self.schema_text()?),
                    "pair" => Type::pair(self.typ()?, self.typ()?),
                    "function" => {
                        self.open()?;
                        let mut params = Vec::new();
                        while self.toks.get(self.i) != Some(&Tok::Close) {
                            params.push(self.typ()?);
                        }
                        self.close()?;
                        Type::func(params, self.typ()?)
                    }
                    _ => bail!(Schema, "unknown type tag {:?}", tag),
                };
                self.close()?;
                Ok(t)
            }
            tok => bail!(Schema, "expected a type, got {:?}", tok),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(e: Expr) {
        let printed = e.to_string();
        let again = parse_expr(&printed)
            .unwrap_or_else(|err| panic!("{:?} did not parse back: {}", printed, err));
        assert_eq!(e, again, "printed as {:?}", printed);
    }

    #[test]
    fn constants() {
        roundtrip(Expr::U8(0));
        roundtrip(Expr::I128(-(1i128 << 126)));
        roundtrip(Expr::U128(u128::MAX));
        roundtrip(Expr::Float(0.1));
        roundtrip(Expr::Float(f64::INFINITY));
        roundtrip(Expr::Str("with \"quotes\" and \\ and \n".into()));
        roundtrip(Expr::Char('λ'));
        roundtrip(Expr::Bytes(vec![0, 255, 16]));
        roundtrip(Expr::Bytes(vec![]));
        roundtrip(Expr::Null(
            parse_schema("u32").unwrap().into_vtype(),
        ));
        roundtrip(Expr::Size(8));
    }

    #[test]
    fn structure() {
        roundtrip(Expr::let_(
            "x",
            Expr::add(Expr::U8(1), Expr::U8(2)),
            Expr::pair(Expr::ident("x"), Expr::ident("x")),
        ));
        roundtrip(Expr::Seq(vec![
            Expr::un(UnOp::Ignore, Expr::Bool(true)),
            Expr::U16(9),
        ]));
        roundtrip(Expr::func(
            7,
            vec![Type::DataPtr, Type::u32()],
            Expr::bin(
                BinOp::DataPtrAdd,
                Expr::Param(7, 0),
                Expr::un(UnOp::SizeOfU32, Expr::Param(7, 1)),
            ),
        ));
        roundtrip(Expr::ReadWhile {
            cond: Box::new(Expr::func(0, vec![Type::Byte], Expr::Bool(true))),
            reduce: Box::new(Expr::func(
                1,
                vec![Type::Bytes, Type::Byte],
                Expr::bin(BinOp::AppendByte, Expr::Param(1, 0), Expr::Param(1, 1)),
            )),
            init: Box::new(Expr::Bytes(vec![])),
            pos: Box::new(Expr::DataPtrOfString("abc".into())),
        });
        roundtrip(Expr::ReadWord(
            Endianness::Little,
            Box::new(Expr::DataPtrOfString("ab".into())),
        ));
        roundtrip(Expr::WriteOWord(
            Endianness::Big,
            Box::new(Expr::DataPtrOfBuffer(16)),
            Box::new(Expr::OWord(1 << 100)),
        ));
        roundtrip(Expr::GetField(
            "0/2".parse().unwrap(),
            Box::new(Expr::AllocValue(parse_schema("{a: u8; b: (u8; u8)}").unwrap())),
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_expr("(u8 300)").is_err());
        assert!(parse_expr("(frobnicate (u8 1))").is_err());
        assert!(parse_expr("(u8 1) trailing").is_err());
        assert!(parse_expr("(add (u8 1)").is_err());
    }
}
