//! Backends turn well-typed expressions into source code for a target
//! language. A backend state is an ordered table of named declarations;
//! insertion order is topological because a declaration may only
//! reference names declared before it.

pub mod cpp;

pub use cpp::Cpp;

use crate::error::{Result, bail, ensure};
use crate::ir::expr::{Expr, FidGen};
use crate::ir::typ::Type;
use crate::ir::typecheck::{type_of, TypeEnv};
use crate::schema::MaybeNullable;
use std::collections::HashSet;
use std::fmt;


#[derive(Debug)]
pub struct Declaration {
    pub name: String,
    pub typ: Type,
    pub expr: Expr,
    /// Named by the caller, hence part of the emitted interface. Gensym
    /// declarations stay internal.
    pub external: bool,
}

#[derive(Debug, Default)]
pub struct State {
    decls: Vec<Declaration>,
    names: HashSet<String>,
    fids: FidGen,
    syms: u32,
    salt: String,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state whose generated names carry a prefix of the schema
    /// fingerprint, keeping converters for different schemas apart in
    /// one translation unit.
    pub fn for_schema(root: &MaybeNullable) -> Self {
        let digest = root.fingerprint();
        let salt = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
        State { salt, ..Self::default() }
    }

    /// The function-id allocator every expression built for this state
    /// must draw from.
    pub fn fid_gen(&mut self) -> &mut FidGen {
        &mut self.fids
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.decls
    }

    /// Type-check `expr`, record it under `name` (or a generated one)
    /// and return the identifier expression standing for it, plus the
    /// printed name.
    ///
    /// Rejected: unbound identifiers or params, a taken name, and
    /// top-level nullable values (they have no printed form).
    pub fn identifier_of_expression(
        &mut self,
        name: Option<&str>,
        expr: Expr,
    ) -> Result<(Expr, String)> {
        let (free_idents, free_params) = expr.free_variables();
        for ident in &free_idents {
            ensure!(
                self.names.contains(ident),
                Codegen, "expression references undeclared {:?}", ident,
            );
        }
        ensure!(
            free_params.is_empty(),
            Codegen, "expression references parameters of no lambda: {:?}", free_params,
        );

        let mut env = TypeEnv::new();
        for decl in &self.decls {
            env.bind(decl.name.clone(), decl.typ.clone());
        }
        let typ = type_of(&env, &expr)?;
        if let Type::Value(mn) = &typ {
            if mn.is_nullable() {
                bail!(Codegen, "a top-level {} has no sensible printed form", typ);
            }
        }

        let (name, external) = match name {
            Some(name) => {
                ensure!(
                    !self.names.contains(name),
                    Codegen, "identifier {:?} already declared", name,
                );
                (name.to_owned(), true)
            }
            None => {
                let name = loop {
                    let candidate = format!("wg{}_{}", self.salt, self.syms);
                    self.syms += 1;
                    if !self.names.contains(&candidate) {
                        break candidate;
                    }
                };
                (name, false)
            }
        };
        tracing::debug!(%name, %typ, "declaring");
        self.names.insert(name.clone());
        self.decls.push(Declaration { name: name.clone(), typ, expr, external });
        Ok((Expr::Identifier(name.clone()), name))
    }
}

/// One target language. The emitted code must preserve IR semantics:
/// scalars numerically identical, compounds structurally identical.
pub trait Backend {
    fn preferred_def_extension(&self) -> &'static str;

    fn preferred_decl_extension(&self) -> &'static str;

    /// The shell command that builds the emitted source.
    fn compile_cmd(&self, optim: u8, link: bool, src: &str, out: &str) -> String;

    /// The header: externally visible identifiers only.
    fn print_declarations(&self, state: &State, out: &mut dyn fmt::Write) -> Result<()>;

    /// The implementation, declarations in insertion order.
    fn print_definitions(&self, state: &State, out: &mut dyn fmt::Write) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_accumulate_and_reference_each_other() {
        let mut state = State::new();
        let (one, name) = state
            .identifier_of_expression(Some("one"), Expr::U32(1))
            .unwrap();
        assert_eq!(name, "one");
        let (_, _) = state
            .identifier_of_expression(None, Expr::add(one.clone(), Expr::U32(2)))
            .unwrap();
        assert_eq!(state.declarations().len(), 2);
        assert!(state.declarations()[0].external);
        assert!(!state.declarations()[1].external);
        // same name twice
        assert!(state.identifier_of_expression(Some("one"), Expr::U32(9)).is_err());
    }

    #[test]
    fn rejections() {
        let mut state = State::new();
        // unbound identifier
        assert!(state
            .identifier_of_expression(None, Expr::ident("nowhere"))
            .is_err());
        // ill-typed
        assert!(state
            .identifier_of_expression(None, Expr::add(Expr::U8(1), Expr::U16(1)))
            .is_err());
        // top-level nullable
        let vt = crate::schema::parse_schema("u8").unwrap().into_vtype();
        assert!(state
            .identifier_of_expression(None, Expr::Null(vt))
            .is_err());
        // nothing was recorded
        assert!(state.declarations().is_empty());
    }

    #[test]
    fn schema_salt_lands_in_generated_names() {
        let root = crate::schema::parse_schema("{a: u8}").unwrap();
        let mut state = State::for_schema(&root);
        let (_, name) = state.identifier_of_expression(None, Expr::U8(0)).unwrap();
        assert!(name.starts_with("wg"));
        assert!(name.len() > "wg_0".len());
    }
}
