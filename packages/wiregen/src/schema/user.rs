//! The process-wide user-type catalogue.
//!
//! Registration is one-shot and happens before any generator run, so
//! readers after start-up never contend on the lock.

use crate::error::{Result, ensure, bail};
use crate::schema::ValueType;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};


/// A named refinement of a value-type. The generic machinery sees through
/// to `def` whenever it needs the underlying shape (paths, codecs).
#[derive(Debug)]
pub struct UserType {
    pub name: String,
    pub def: ValueType,
}

/// Two user types are the same type iff their names match; the catalogue
/// is write-once so defs cannot diverge under one name.
impl PartialEq for UserType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for UserType {}

impl Hash for UserType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

static CATALOGUE: Lazy<RwLock<HashMap<String, &'static UserType>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn is_reserved(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "boolean"
        || crate::schema::Scalar::INTS
            .iter()
            .any(|s| s.display_str() == lower)
        || ["bool", "char", "float", "string"].contains(&lower.as_str())
}

/// Register a user type under a unique name. Fails on duplicate names,
/// reserved keywords, non-identifier names and defs that break the schema
/// invariants. The returned reference is what `ValueType::Usr` carries.
pub fn register_user_type(name: &str, def: ValueType) -> Result<&'static UserType> {
    ensure!(
        name.chars().next().map_or(false, |c| c.is_ascii_alphabetic())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
        Schema, "user-type name {:?} is not an identifier", name,
    );
    ensure!(!is_reserved(name), Schema, "user-type name {:?} is reserved", name);
    def.check()?;

    let mut catalogue = CATALOGUE.write();
    if catalogue.contains_key(name) {
        bail!(Schema, "user type {:?} registered twice", name);
    }
    let entry: &'static UserType = Box::leak(Box::new(UserType {
        name: name.to_owned(),
        def,
    }));
    catalogue.insert(name.to_owned(), entry);
    tracing::debug!(name, "registered user type");
    Ok(entry)
}

pub fn find_user_type(name: &str) -> Option<&'static UserType> {
    CATALOGUE.read().get(name).copied()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Scalar;

    #[test]
    fn registration_is_one_shot() {
        let ip = register_user_type("ip4_oneshot", ValueType::Scalar(Scalar::U32))
            .unwrap();
        assert_eq!(ip.name, "ip4_oneshot");
        assert!(register_user_type("ip4_oneshot", ValueType::Scalar(Scalar::U32))
            .is_err());
        assert_eq!(find_user_type("ip4_oneshot"), Some(ip));
    }

    #[test]
    fn bad_names_rejected() {
        assert!(register_user_type("u8", ValueType::Scalar(Scalar::U8)).is_err());
        assert!(register_user_type("Boolean", ValueType::Scalar(Scalar::Bool)).is_err());
        assert!(register_user_type("9lives", ValueType::Scalar(Scalar::U8)).is_err());
    }
}
