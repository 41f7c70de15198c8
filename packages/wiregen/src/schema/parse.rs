//! Text parser for the schema grammar.
//!
//! ```text
//! mn      := vt '?'?
//! vt      := scalar | '(' mn (';' mn)* ')' | '{' field (';' field)* '}'
//!          | '[' alt ('|' alt)* ']' | user
//!          | mn '[' nat ']'     -- vector
//!          | mn '[' ']'         -- list
//!          | mn '[' mn ']'      -- map, key type inside the brackets
//! ```
//!
//! Keywords match case-insensitively; postfix brackets bind tighter than
//! the trailing `?`; blanks and `--` line comments go anywhere whitespace
//! does. Errors carry the byte position.

use crate::error::{Error, ErrorKind, Result};
use crate::schema::{MaybeNullable, RecField, Scalar, SumAlt, ValueType, find_user_type};


/// Parse a complete schema; trailing input other than blanks is an error.
pub fn parse_schema(text: &str) -> Result<MaybeNullable> {
    let mut parser = Parser { bytes: text.as_bytes(), pos: 0 };
    let mn = parser.parse_mn()?;
    parser.skip_blanks();
    if parser.pos != parser.bytes.len() {
        return Err(parser.err("trailing input after schema"));
    }
    // backstop for invariants the grammar alone cannot express
    mn.check()?;
    Ok(mn)
}

fn wrap(vt: ValueType, nullable: bool) -> MaybeNullable {
    if nullable {
        MaybeNullable::Nullable(vt)
    } else {
        MaybeNullable::NotNullable(vt)
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn err(&self, msg: impl std::fmt::Display) -> Error {
        Error::new(ErrorKind::Schema, msg.to_string()).at_pos(self.pos)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> Result<()> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(format_args!("expected {:?}", b as char)))
        }
    }

    fn skip_blanks(&mut self) {
        loop {
            while self.peek().map_or(false, |b| b.is_ascii_whitespace()) {
                self.pos += 1;
            }
            if self.bytes[self.pos..].starts_with(b"--") {
                while self.peek().map_or(false, |b| b != b'\n') {
                    self.pos += 1;
                }
            } else {
                return;
            }
        }
    }

    fn parse_mn(&mut self) -> Result<MaybeNullable> {
        let mut vt = self.parse_base_vt()?;
        let mut nullable = false;
        loop {
            self.skip_blanks();
            match self.peek() {
                Some(b'?') if !nullable => {
                    nullable = true;
                    self.pos += 1;
                }
                Some(b'?') => return Err(self.err("value type already nullable")),
                Some(b'[') => {
                    self.pos += 1;
                    let inner = wrap(vt, nullable);
                    vt = self.parse_postfix(inner)?;
                    nullable = false;
                }
                _ => break,
            }
        }
        Ok(wrap(vt, nullable))
    }

    /// The part after a consumed `[`: `]` for a list, a dimension for a
    /// vector, a key type for a map.
    fn parse_postfix(&mut self, inner: MaybeNullable) -> Result<ValueType> {
        self.skip_blanks();
        match self.peek() {
            Some(b']') => {
                self.pos += 1;
                Ok(ValueType::List(Box::new(inner)))
            }
            Some(b) if b.is_ascii_digit() => {
                let at = self.pos;
                let dim = self.parse_nat()?;
                if dim == 0 {
                    return Err(Error::new(
                        ErrorKind::Schema,
                        "vector dimension must be > 0",
                    ).at_pos(at));
                }
                self.skip_blanks();
                self.eat(b']')?;
                Ok(ValueType::Vec(dim, Box::new(inner)))
            }
            _ => {
                let key = self.parse_mn()?;
                self.skip_blanks();
                self.eat(b']')?;
                Ok(ValueType::Map(Box::new(key), Box::new(inner)))
            }
        }
    }

    fn parse_base_vt(&mut self) -> Result<ValueType> {
        self.skip_blanks();
        match self.peek() {
            Some(b'(') => self.parse_tup(),
            Some(b'{') => self.parse_rec(),
            Some(b'[') => self.parse_sum(),
            Some(b) if b.is_ascii_alphabetic() => self.parse_named(),
            _ => Err(self.err("expected a value type")),
        }
    }

    fn parse_tup(&mut self) -> Result<ValueType> {
        self.eat(b'(')?;
        let mut mns = vec![self.parse_mn()?];
        loop {
            self.skip_blanks();
            match self.peek() {
                Some(b';') => {
                    self.pos += 1;
                    mns.push(self.parse_mn()?);
                }
                Some(b')') => {
                    self.pos += 1;
                    return Ok(ValueType::Tup(mns));
                }
                _ => return Err(self.err("expected ';' or ')' in tuple")),
            }
        }
    }

    fn parse_rec(&mut self) -> Result<ValueType> {
        self.eat(b'{')?;
        let mut fields: Vec<RecField> = Vec::new();
        loop {
            self.skip_blanks();
            let at = self.pos;
            let name = self.parse_ident()?;
            if fields.iter().any(|f| f.name == name) {
                return Err(Error::new(
                    ErrorKind::Schema,
                    format!("duplicate record field {:?}", name),
                ).at_pos(at));
            }
            self.skip_blanks();
            self.eat(b':')?;
            fields.push(RecField { name, mn: self.parse_mn()? });
            self.skip_blanks();
            match self.peek() {
                Some(b';') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(ValueType::Rec(fields));
                }
                _ => return Err(self.err("expected ';' or '}' in record")),
            }
        }
    }

    fn parse_sum(&mut self) -> Result<ValueType> {
        self.eat(b'[')?;
        let mut alts: Vec<SumAlt> = Vec::new();
        loop {
            self.skip_blanks();
            let at = self.pos;
            let label = self.parse_ident()?;
            if alts.iter().any(|a| a.label == label) {
                return Err(Error::new(
                    ErrorKind::Schema,
                    format!("duplicate sum label {:?}", label),
                ).at_pos(at));
            }
            self.skip_blanks();
            self.eat(b':')?;
            alts.push(SumAlt { label, mn: self.parse_mn()? });
            self.skip_blanks();
            match self.peek() {
                Some(b'|') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(ValueType::Sum(alts));
                }
                _ => return Err(self.err("expected '|' or ']' in sum")),
            }
        }
    }

    fn parse_named(&mut self) -> Result<ValueType> {
        let at = self.pos;
        let name = self.parse_ident()?;
        let lower = name.to_ascii_lowercase();
        if lower == "boolean" {
            return Ok(ValueType::Scalar(Scalar::Bool));
        }
        for scalar in [Scalar::Bool, Scalar::Char, Scalar::Float, Scalar::Str]
            .iter()
            .chain(Scalar::INTS.iter())
        {
            if scalar.display_str() == lower {
                return Ok(ValueType::Scalar(*scalar));
            }
        }
        match find_user_type(&name) {
            Some(u) => Ok(ValueType::Usr(u)),
            None => Err(Error::new(
                ErrorKind::Schema,
                format!("unknown type name {:?}", name),
            ).at_pos(at)),
        }
    }

    fn parse_ident(&mut self) -> Result<String> {
        let start = self.pos;
        if !self.peek().map_or(false, |b| b.is_ascii_alphabetic()) {
            return Err(self.err("expected an identifier"));
        }
        while self.peek().map_or(false, |b| b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        Ok(std::str::from_utf8(&self.bytes[start..self.pos])
            .expect("ascii range")
            .to_owned())
    }

    fn parse_nat(&mut self) -> Result<usize> {
        let start = self.pos;
        while self.peek().map_or(false, |b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .expect("ascii range")
            .parse()
            .map_err(|e| self.err(format_args!("bad number: {}", e)))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(text: &str) -> MaybeNullable {
        let mn = parse_schema(text).unwrap();
        let printed = mn.to_string();
        let again = parse_schema(&printed).unwrap();
        assert_eq!(mn, again, "print/parse changed {:?} -> {:?}", text, printed);
        again
    }

    #[test]
    fn scalars() {
        assert_eq!(
            roundtrip("u8"),
            ValueType::Scalar(Scalar::U8).not_nullable(),
        );
        assert_eq!(
            roundtrip("STRING?"),
            ValueType::Scalar(Scalar::Str).nullable(),
        );
        assert_eq!(
            parse_schema("Boolean").unwrap(),
            ValueType::Scalar(Scalar::Bool).not_nullable(),
        );
        roundtrip("i128");
        roundtrip("u56");
    }

    #[test]
    fn postfix_binds_tighter_than_nullable() {
        let nullable_list = roundtrip("u8[]?");
        assert!(nullable_list.is_nullable());
        let list_of_nullable = roundtrip("u8?[]");
        assert!(!list_of_nullable.is_nullable());
        match list_of_nullable.vtype() {
            ValueType::List(elem) => assert!(elem.is_nullable()),
            vt => panic!("expected list, got {}", vt),
        }
    }

    #[test]
    fn compounds() {
        roundtrip("(u8; bool; string?)");
        roundtrip("(u8)");
        roundtrip("{a: u8; b: string?}");
        roundtrip("[left: u8 | right: string]");
        roundtrip("char[2]");
        roundtrip("bool[string]");
    }

    #[test]
    fn deeply_nested() {
        // vector-of-maps-of-nullable-lists and friends
        roundtrip("(u8; bool[string])[]?[string?[u8?]]");
        roundtrip("{xs: {y: u24?}[4]; m: u8[u48][]}");
    }

    #[test]
    fn blanks_and_comments() {
        let mn = parse_schema(
            "{ a : u8 ;  -- first field\n  b : string? }  -- done\n",
        ).unwrap();
        assert_eq!(mn, parse_schema("{a: u8; b: string?}").unwrap());
    }

    #[test]
    fn rejects() {
        assert!(parse_schema("u8[0]").is_err());
        assert!(parse_schema("{a: u8; a: u16}").is_err());
        assert!(parse_schema("[x: u8 | x: u16]").is_err());
        assert!(parse_schema("u8??").is_err());
        assert!(parse_schema("u8 junk").is_err());
        assert!(parse_schema("no_such_type_zz").is_err());
        assert!(parse_schema("()").is_err());
        let err = parse_schema("{a: u9}").unwrap_err();
        assert!(err.pos().is_some());
    }

    #[test]
    fn user_types_parse_by_name() {
        let u = crate::schema::register_user_type(
            "ip4_parse",
            ValueType::Scalar(Scalar::U32),
        ).unwrap();
        assert_eq!(
            roundtrip("ip4_parse?"),
            ValueType::Usr(u).nullable(),
        );
        // user names are case-sensitive, unlike keywords
        assert!(parse_schema("IP4_PARSE").is_err());
    }
}
