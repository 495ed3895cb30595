use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::signature::{Primitive, Signature, TypeExpr};
use crate::types::Value;

/// Errors returned when call arguments do not fit an endpoint's [`Signature`].
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("invalid parameter `{name}`; valid parameters: [{}]", .valid.join(", "))]
    UnknownParameter { name: String, valid: Vec<String> },

    #[error("`{param}` must be of type `{expected}` not `{actual}`")]
    TypeMismatch {
        param: String,
        expected: String,
        actual: String,
    },

    #[error("{given} positional arguments given but at most {accepted} accepted")]
    TooManyPositional { given: usize, accepted: usize },

    #[error("endpoint path {0:?} is not a dotted identifier path")]
    InvalidPath(String),
}

/// Arguments that passed [`validate_call_args`], in the order they will be sent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidatedArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

/// Check positional and keyword arguments against `signature`.
///
/// Keywords are checked first: each must name a declared parameter unless the
/// signature has a catch-all keyword parameter, and its value must satisfy the
/// parameter's type. Positional arguments are then zip-matched against the
/// positional parameters not already bound by keyword. Surplus positionals go
/// to the catch-all positional parameter when one exists.
///
/// Returns the first [`ValidationError`] found.
pub fn validate_call_args(
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
    signature: &Signature,
) -> Result<ValidatedArgs, ValidationError> {
    let catch_all_keyword = signature.var_keyword().is_some();

    for (key, value) in &kwargs {
        match signature.param(key) {
            Some(param) => check_type(key, value, &param.ty)?,
            None if catch_all_keyword => {}
            None => {
                return Err(ValidationError::UnknownParameter {
                    name: key.clone(),
                    valid: signature.param_names(),
                })
            }
        }
    }

    let open_params: Vec<_> = signature
        .positional_params()
        .filter(|p| !kwargs.contains_key(&p.name))
        .collect();

    for (i, arg) in args.iter().enumerate() {
        match open_params.get(i) {
            Some(param) => check_type(&param.name, arg, &param.ty)?,
            None => match signature.var_positional() {
                Some(rest) => check_type(&rest.name, arg, &rest.ty)?,
                None => {
                    return Err(ValidationError::TooManyPositional {
                        given: args.len(),
                        accepted: open_params.len(),
                    })
                }
            },
        }
    }

    Ok(ValidatedArgs { args, kwargs })
}

/// Whether `value` structurally satisfies `ty`.
///
/// Domain types match objects (or remote references) by canonical name; the
/// version is reconciled later by protocol migration.
pub fn value_matches(value: &Value, ty: &TypeExpr) -> bool {
    match ty {
        TypeExpr::Any => true,
        TypeExpr::Primitive(p) => primitive_matches(value, *p),
        TypeExpr::Optional(inner) => value.is_none() || value_matches(value, inner),
        TypeExpr::Union(alts) => alts.iter().any(|alt| value_matches(value, alt)),
        TypeExpr::List(inner) => match value {
            Value::List(items) => items.iter().all(|v| value_matches(v, inner)),
            _ => false,
        },
        TypeExpr::Map(inner) => match value {
            Value::Map(entries) => entries.values().all(|v| value_matches(v, inner)),
            _ => false,
        },
        TypeExpr::Domain(d) => match value {
            Value::Object(o) => o.canonical_name == d.name,
            Value::Remote(r) => r.type_name == d.name,
            _ => false,
        },
    }
}

/// Check that `path` is a dotted identifier path such as `user.get_all`.
pub fn validate_path(path: &str) -> Result<(), ValidationError> {
    if PATH_RE.is_match(path) {
        Ok(())
    } else {
        Err(ValidationError::InvalidPath(path.to_string()))
    }
}

// --- helpers -----------------------------------------------------------------

fn check_type(param: &str, value: &Value, ty: &TypeExpr) -> Result<(), ValidationError> {
    if value_matches(value, ty) {
        Ok(())
    } else {
        Err(ValidationError::TypeMismatch {
            param: param.to_string(),
            expected: ty.to_string(),
            actual: value.type_name(),
        })
    }
}

fn primitive_matches(value: &Value, p: Primitive) -> bool {
    matches!(
        (p, value),
        (Primitive::None, Value::None)
            | (Primitive::Bool, Value::Bool(_))
            | (Primitive::Int, Value::Int(_))
            | (Primitive::Float, Value::Float(_) | Value::Int(_))
            | (Primitive::Str, Value::Str(_))
            | (Primitive::Bytes, Value::Bytes(_))
            | (Primitive::Uid, Value::Uid(_))
    )
}

/// `^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$`
static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("invalid endpoint path regex")
});

// --- tests -------------------------------------------------------------------
