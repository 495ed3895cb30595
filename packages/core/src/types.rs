//! Core data types for the sigcall RPC layer.
//!
//! Call arguments and results are dynamic: a remote endpoint may accept and
//! return anything its signature declares. This module defines the closed
//! value model every other layer works with: [`Value`], [`ObjectValue`] for
//! versioned domain objects, [`RemoteObject`] for values that already live on
//! the service, and the [`Uid`] identifier.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

/// Field map of an [`ObjectValue`], ordered by field name.
pub type Fields = BTreeMap<String, Value>;

/// A 128-bit identifier for services, endpoints, objects, and jobs.
///
/// Displays as 32 lowercase hex digits without hyphens; serialises in the
/// hyphenated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(uuid::Uuid);

impl Uid {
    /// A fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// The first eight hex digits, for log lines and listings.
    pub fn short(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for Uid {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("invalid uid {s:?}: {e}"))
    }
}

/// A structured domain object whose shape depends on its version.
///
/// `canonical_name` and `version` together select a type descriptor in the
/// [`TypeRegistry`](crate::migration::TypeRegistry). Objects whose name is
/// not registered there are unversioned and pass through migration untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectValue {
    pub canonical_name: String,
    pub version: u32,
    #[serde(default)]
    pub fields: Fields,
}

impl ObjectValue {
    pub fn new(canonical_name: impl Into<String>, version: u32) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            version,
            fields: Fields::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// A value that already exists on the remote service.
///
/// Library-routed calls never ship these by copy; the pipeline replaces them
/// with a [`Value::Pointer`] to `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Identifier of the object on the service.
    pub id: Uid,
    /// The service holding the object.
    pub service_id: Uid,
    /// Canonical name of the object's type, used for signature matching.
    pub type_name: String,
}

/// A dynamically typed call argument or result.
///
/// Serialises as `{ "type": "<variant>", "value": ... }` so that every variant
/// round-trips unambiguously through the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(#[serde(serialize_with = "finite_f64")] f64),
    Str(String),
    Bytes(Vec<u8>),
    Uid(Uid),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(ObjectValue),
    Remote(RemoteObject),
    Pointer(Uid),
}

/// JSON has no NaN or infinity; refuse them instead of writing `null`.
fn finite_f64<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    if v.is_finite() {
        s.serialize_f64(*v)
    } else {
        Err(serde::ser::Error::custom(format!("float {v} has no JSON form")))
    }
}

impl Value {
    /// The name of this value's runtime type, in the same vocabulary used to
    /// render [`TypeExpr`](crate::signature::TypeExpr)s.
    pub fn type_name(&self) -> String {
        match self {
            Value::None => "None".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::Bytes(_) => "bytes".into(),
            Value::Uid(_) => "UID".into(),
            Value::List(_) => "list".into(),
            Value::Map(_) => "dict".into(),
            Value::Object(o) => o.canonical_name.clone(),
            Value::Remote(r) => format!("Remote[{}]", r.type_name),
            Value::Pointer(_) => "Pointer".into(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uid(&self) -> Option<Uid> {
        match self {
            Value::Uid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Uid> for Value {
    fn from(v: Uid) -> Self {
        Value::Uid(v)
    }
}

impl From<ObjectValue> for Value {
    fn from(v: ObjectValue) -> Self {
        Value::Object(v)
    }
}

impl From<RemoteObject> for Value {
    fn from(v: RemoteObject) -> Self {
        Value::Remote(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
