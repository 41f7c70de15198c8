//! Paths: finite sequences of child indices addressing a schema subtree.

use crate::error::{Error, ErrorKind, Result, bail};
use crate::schema::{MaybeNullable, ValueType};
use std::fmt::{self, Formatter, Display};
use std::str::FromStr;


/// `[]` is the root. Crossing a nullable marker or a user type does not
/// consume an index; `Map` and scalars are terminal.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct Path(Vec<usize>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn child(&self, i: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(i);
        Path(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The maybe-nullable this path addresses within `root`.
    pub fn type_in<'a>(&self, root: &'a MaybeNullable) -> Result<&'a MaybeNullable> {
        let mut cur = root;
        for &i in &self.0 {
            cur = match cur.vtype().resolved() {
                ValueType::Vec(dim, elem) => {
                    if i >= *dim {
                        bail!(
                            Schema,
                            "path index {} out of bounds for a vector of {}",
                            i, dim,
                        );
                    }
                    elem
                }
                ValueType::List(elem) => elem,
                ValueType::Tup(mns) => mns.get(i).ok_or_else(|| Error::new(
                    ErrorKind::Schema,
                    format!("path index {} out of bounds for a {}-tuple", i, mns.len()),
                ))?,
                ValueType::Rec(fields) => &fields.get(i).ok_or_else(|| Error::new(
                    ErrorKind::Schema,
                    format!("path index {} out of bounds for a record", i),
                ))?.mn,
                ValueType::Sum(alts) => &alts.get(i).ok_or_else(|| Error::new(
                    ErrorKind::Schema,
                    format!("path index {} out of bounds for a sum", i),
                ))?.mn,
                vt @ (ValueType::Map(..) | ValueType::Scalar(_)) => bail!(
                    Schema, "cannot navigate into {}", vt,
                ),
                ValueType::Usr(_) => unreachable!("resolved"),
            };
        }
        Ok(cur)
    }
}

impl From<&[usize]> for Path {
    fn from(indices: &[usize]) -> Self {
        Path(indices.to_vec())
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", index)?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Path::root());
        }
        s.split('/')
            .map(|part| part.parse().map_err(|e| Error::new(
                ErrorKind::Schema,
                format!("bad path component {:?}: {}", part, e),
            )))
            .collect::<Result<Vec<usize>>>()
            .map(Path)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;

    #[test]
    fn navigation() {
        let mn = parse_schema("{a: u8; b: string?[]}").unwrap();
        assert_eq!(Path::root().type_in(&mn).unwrap(), &mn);
        let b = Path::from(&[1][..]).type_in(&mn).unwrap();
        assert_eq!(b.to_string(), "string?[]");
        // crossing the list, then the elem's nullable marker transparently
        let elem = Path::from(&[1, 0][..]).type_in(&mn).unwrap();
        assert_eq!(elem.to_string(), "string?");
    }

    #[test]
    fn user_types_are_transparent() {
        let u = crate::schema::register_user_type(
            "ip4_path",
            parse_schema("u32").unwrap().into_vtype(),
        ).unwrap();
        let mn = crate::schema::ValueType::Usr(u).not_nullable();
        // a user type over a scalar is terminal like the scalar is
        assert!(Path::from(&[0][..]).type_in(&mn).is_err());
    }

    #[test]
    fn terminals_and_bounds() {
        let mn = parse_schema("(u8; char[2]; bool[string])").unwrap();
        assert!(Path::from(&[3][..]).type_in(&mn).is_err());
        assert!(Path::from(&[1, 2][..]).type_in(&mn).is_err());
        assert!(Path::from(&[1, 1][..]).type_in(&mn).is_ok());
        // maps are terminal
        assert!(Path::from(&[2, 0][..]).type_in(&mn).is_err());
        // scalars are terminal
        assert!(Path::from(&[0, 0][..]).type_in(&mn).is_err());
    }

    #[test]
    fn text_form() {
        let path = Path::from(&[0, 2, 1][..]);
        assert_eq!(path.to_string(), "0/2/1");
        assert_eq!("0/2/1".parse::<Path>().unwrap(), path);
        assert_eq!("".parse::<Path>().unwrap(), Path::root());
    }
}
