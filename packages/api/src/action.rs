//! Action records, the payload of library-routed calls.
//!
//! A library function is never dispatched to its own path. The client turns
//! the call into an [`Action`] and sends it as the single argument of the
//! generic `action.execute` operation. Arguments that already live on the
//! service travel as pointers, not copies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sigcall::{ObjectValue, Uid, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Function,
    Method,
}

impl ActionType {
    fn as_str(self) -> &'static str {
        match self {
            ActionType::Function => "function",
            ActionType::Method => "method",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(ActionType::Function),
            "method" => Some(ActionType::Method),
            _ => None,
        }
    }
}

/// One requested library operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub id: Uid,
    /// Module part of the library path, e.g. `numpy.linalg`.
    pub path: String,
    /// Operation name, e.g. `inv`.
    pub op: String,
    /// Receiver for method actions.
    pub remote_self: Option<Uid>,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
    pub action_type: ActionType,
    /// Where the service stores the result.
    pub result_id: Uid,
}

impl Action {
    pub const CANONICAL_NAME: &'static str = "Action";
    pub const VERSION: u32 = 1;

    /// A free-function action for the dotted `module_path`.
    pub fn function(
        module_path: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Self {
        let (path, op) = module_path.rsplit_once('.').unwrap_or(("", module_path));
        Self {
            id: Uid::new(),
            path: path.to_string(),
            op: op.to_string(),
            remote_self: None,
            args,
            kwargs,
            action_type: ActionType::Function,
            result_id: Uid::new(),
        }
    }

    /// `path.op`, the library path the action was built from.
    pub fn full_path(&self) -> String {
        if self.path.is_empty() {
            self.op.clone()
        } else {
            format!("{}.{}", self.path, self.op)
        }
    }

    pub fn to_value(&self) -> Value {
        ObjectValue::new(Self::CANONICAL_NAME, Self::VERSION)
            .with_field("id", self.id)
            .with_field("path", self.path.as_str())
            .with_field("op", self.op.as_str())
            .with_field("remote_self", self.remote_self)
            .with_field("args", self.args.clone())
            .with_field("kwargs", self.kwargs.clone())
            .with_field("action_type", self.action_type.as_str())
            .with_field("result_id", self.result_id)
            .into()
    }

    /// Read an action back from its object form. `None` if `value` is not a
    /// well-formed action.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.canonical_name != Self::CANONICAL_NAME {
            return None;
        }
        let remote_self = match obj.get("remote_self")? {
            Value::None => None,
            other => Some(other.as_uid()?),
        };
        let kwargs = match obj.get("kwargs")? {
            Value::Map(m) => m.clone(),
            _ => return None,
        };
        Some(Self {
            id: obj.get("id")?.as_uid()?,
            path: obj.get("path")?.as_str()?.to_string(),
            op: obj.get("op")?.as_str()?.to_string(),
            remote_self,
            args: obj.get("args")?.as_list()?.to_vec(),
            kwargs,
            action_type: ActionType::parse(obj.get("action_type")?.as_str()?)?,
            result_id: obj.get("result_id")?.as_uid()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_action_splits_path() {
        let a = Action::function("numpy.linalg.inv", vec![Value::Pointer(Uid::new())], BTreeMap::new());
        assert_eq!(a.path, "numpy.linalg");
        assert_eq!(a.op, "inv");
        assert_eq!(a.full_path(), "numpy.linalg.inv");
        assert_eq!(a.remote_self, None);
        assert_ne!(a.id, a.result_id);
    }

    #[test]
    fn bare_name_has_empty_path() {
        let a = Action::function("len", vec![], BTreeMap::new());
        assert_eq!(a.path, "");
        assert_eq!(a.full_path(), "len");
    }

    #[test]
    fn object_form_reads_back() {
        let mut kwargs = BTreeMap::new();
        kwargs.insert("axis".to_string(), Value::Int(0));
        let a = Action::function("numpy.sum", vec![Value::Int(1)], kwargs);
        assert_eq!(Action::from_value(&a.to_value()), Some(a));
        assert_eq!(Action::from_value(&Value::Int(1)), None);
    }
}
