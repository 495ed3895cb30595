//! Job handles returned by non-blocking calls.

use sigcall::{ObjectValue, Uid, Value};

/// Dispatch path listing the jobs started from one user-code object.
pub const JOBS_BY_USER_CODE_PATH: &str = "job.get_by_user_code_id";

/// Reference to work the service is still doing.
///
/// Returned instead of the result when a call is made with
/// `blocking = false`; fetching the result later is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: Uid,
    pub service_id: Uid,
    /// Path of the call that started the job.
    pub path: String,
}

impl JobHandle {
    pub const CANONICAL_NAME: &'static str = "Job";
    pub const VERSION: u32 = 1;

    pub fn new(service_id: Uid, path: impl Into<String>) -> Self {
        Self {
            id: Uid::new(),
            service_id,
            path: path.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        ObjectValue::new(Self::CANONICAL_NAME, Self::VERSION)
            .with_field("id", self.id)
            .with_field("service_id", self.service_id)
            .with_field("path", self.path.as_str())
            .into()
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.canonical_name != Self::CANONICAL_NAME {
            return None;
        }
        Some(Self {
            id: obj.get("id")?.as_uid()?,
            service_id: obj.get("service_id")?.as_uid()?,
            path: obj.get("path")?.as_str()?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_form_reads_back() {
        let job = JobHandle::new(Uid::new(), "widget.rebuild");
        assert_eq!(JobHandle::from_value(&job.to_value()), Some(job));
    }

    #[test]
    fn other_objects_are_not_jobs() {
        let v: Value = ObjectValue::new("Widget", 1).into();
        assert_eq!(JobHandle::from_value(&v), None);
    }
}
