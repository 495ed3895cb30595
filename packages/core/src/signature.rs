//! Structural call signatures.
//!
//! A [`Signature`] is an ordered list of [`Param`]s plus an optional return
//! type. Parameter and return types are [`TypeExpr`]s: a closed set of
//! primitive, optional, union, container, and versioned domain types. Domain
//! types refer to the [`TypeRegistry`](crate::migration::TypeRegistry) by
//! canonical name and version.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Control keyword every callable accepts and no signature may declare.
pub const RESERVED_KEYWORD: &str = "blocking";

/// Errors found when checking a [`Signature`] for well-formedness.
#[derive(Debug, Error, PartialEq)]
pub enum SignatureError {
    #[error("signature can't declare {0:?}; the keyword is reserved")]
    ReservedKeyword(String),

    #[error("parameter {0:?} is declared more than once")]
    DuplicateParameter(String),
}

/// Primitive leaf types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    None,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    Uid,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::None => write!(f, "None"),
            Primitive::Bool => write!(f, "bool"),
            Primitive::Int => write!(f, "int"),
            Primitive::Float => write!(f, "float"),
            Primitive::Str => write!(f, "str"),
            Primitive::Bytes => write!(f, "bytes"),
            Primitive::Uid => write!(f, "UID"),
        }
    }
}

/// Reference to a versioned domain type in the type registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainRef {
    pub name: String,
    pub version: u32,
}

/// A declared parameter or return type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum TypeExpr {
    /// No annotation; every value is accepted.
    Any,
    Primitive(Primitive),
    /// `T | None`.
    Optional(Box<TypeExpr>),
    Union(Vec<TypeExpr>),
    List(Box<TypeExpr>),
    /// String-keyed mapping with values of the inner type.
    Map(Box<TypeExpr>),
    Domain(DomainRef),
}

impl TypeExpr {
    pub fn none() -> Self {
        TypeExpr::Primitive(Primitive::None)
    }

    pub fn bool() -> Self {
        TypeExpr::Primitive(Primitive::Bool)
    }

    pub fn int() -> Self {
        TypeExpr::Primitive(Primitive::Int)
    }

    pub fn float() -> Self {
        TypeExpr::Primitive(Primitive::Float)
    }

    pub fn str() -> Self {
        TypeExpr::Primitive(Primitive::Str)
    }

    pub fn bytes() -> Self {
        TypeExpr::Primitive(Primitive::Bytes)
    }

    pub fn uid() -> Self {
        TypeExpr::Primitive(Primitive::Uid)
    }

    pub fn optional(inner: TypeExpr) -> Self {
        TypeExpr::Optional(Box::new(inner))
    }

    pub fn list(inner: TypeExpr) -> Self {
        TypeExpr::List(Box::new(inner))
    }

    pub fn map(inner: TypeExpr) -> Self {
        TypeExpr::Map(Box::new(inner))
    }

    pub fn domain(name: impl Into<String>, version: u32) -> Self {
        TypeExpr::Domain(DomainRef {
            name: name.into(),
            version,
        })
    }

    /// All domain references reachable from this expression, depth first.
    pub fn domain_refs(&self) -> Vec<&DomainRef> {
        let mut out = Vec::new();
        self.collect_domain_refs(&mut out);
        out
    }

    fn collect_domain_refs<'a>(&'a self, out: &mut Vec<&'a DomainRef>) {
        match self {
            TypeExpr::Any | TypeExpr::Primitive(_) => {}
            TypeExpr::Optional(inner) | TypeExpr::List(inner) | TypeExpr::Map(inner) => {
                inner.collect_domain_refs(out)
            }
            TypeExpr::Union(alts) => alts.iter().for_each(|a| a.collect_domain_refs(out)),
            TypeExpr::Domain(d) => out.push(d),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Any => write!(f, "Any"),
            TypeExpr::Primitive(p) => write!(f, "{p}"),
            TypeExpr::Optional(inner) => write!(f, "Optional[{inner}]"),
            TypeExpr::Union(alts) => {
                let parts: Vec<String> = alts.iter().map(ToString::to_string).collect();
                write!(f, "Union[{}]", parts.join(", "))
            }
            TypeExpr::List(inner) => write!(f, "list[{inner}]"),
            TypeExpr::Map(inner) => write!(f, "dict[str, {inner}]"),
            TypeExpr::Domain(d) => write!(f, "{}", d.name),
        }
    }
}

/// How an argument binds to a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamKind {
    /// Bound by position or by keyword.
    Positional,
    /// Bound by keyword only.
    Keyword,
    /// Catch-all for surplus positional arguments (`*args`).
    VarPositional,
    /// Catch-all for undeclared keyword arguments (`**kwargs`).
    VarKeyword,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    #[serde(rename = "type")]
    pub ty: TypeExpr,
    #[serde(default)]
    pub has_default: bool,
}

impl Param {
    pub fn positional(name: impl Into<String>, ty: TypeExpr) -> Self {
        Self::of_kind(name, ParamKind::Positional, ty)
    }

    pub fn keyword(name: impl Into<String>, ty: TypeExpr) -> Self {
        Self::of_kind(name, ParamKind::Keyword, ty)
    }

    pub fn var_positional(name: impl Into<String>, ty: TypeExpr) -> Self {
        Self::of_kind(name, ParamKind::VarPositional, ty)
    }

    pub fn var_keyword(name: impl Into<String>, ty: TypeExpr) -> Self {
        Self::of_kind(name, ParamKind::VarKeyword, ty)
    }

    fn of_kind(name: impl Into<String>, kind: ParamKind, ty: TypeExpr) -> Self {
        Self {
            name: name.into(),
            kind,
            ty,
            has_default: false,
        }
    }

    /// Mark the parameter as optional at the call site.
    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    /// Whether a keyword argument of this name binds to this parameter.
    pub fn accepts_keyword(&self) -> bool {
        matches!(self.kind, ParamKind::Positional | ParamKind::Keyword)
    }
}

/// An endpoint's declared calling convention.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<TypeExpr>,
}

impl Signature {
    pub fn new(params: Vec<Param>) -> Self {
        Self {
            params,
            returns: None,
        }
    }

    /// Builder-style return type setter.
    pub fn returning(mut self, ty: TypeExpr) -> Self {
        self.returns = Some(ty);
        self
    }

    /// Look up a keyword-addressable parameter by name.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.name == name && p.accepts_keyword())
    }

    pub fn param_names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    pub fn var_positional(&self) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.kind == ParamKind::VarPositional)
    }

    pub fn var_keyword(&self) -> Option<&Param> {
        self.params.iter().find(|p| p.kind == ParamKind::VarKeyword)
    }

    /// Parameters that can be bound by position, in declaration order.
    pub fn positional_params(&self) -> impl Iterator<Item = &Param> {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Positional)
    }

    /// Reject signatures that declare [`RESERVED_KEYWORD`] or repeat a name.
    pub fn check(&self) -> Result<(), SignatureError> {
        let mut seen = HashSet::new();
        for p in &self.params {
            if p.name == RESERVED_KEYWORD {
                return Err(SignatureError::ReservedKeyword(p.name.clone()));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(SignatureError::DuplicateParameter(p.name.clone()));
            }
        }
        Ok(())
    }

    /// The signature as seen by a remote caller.
    ///
    /// A leading `self` parameter is dropped unless the endpoint binds a
    /// receiver, and `context` is always dropped: the service injects it.
    pub fn without_receiver(&self, has_self: bool) -> Signature {
        let params = self
            .params
            .iter()
            .enumerate()
            .filter(|(i, p)| !(*i == 0 && !has_self && p.name == "self"))
            .filter(|(_, p)| p.name != "context")
            .map(|(_, p)| p.clone())
            .collect();
        Signature {
            params,
            returns: self.returns.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
