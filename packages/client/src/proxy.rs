//! Proxy trees: the in-process namespace mirroring a catalog's paths.
//!
//! A path `a.b.c` becomes namespaces `a` and `a.b` holding a callable `c`.
//! The leaf key is the descriptor's display name, which replaces the last
//! segment of its module path. Lookups of unknown names return
//! [`ApiError::UnknownMember`], so "no such operation, or not permitted"
//! is a value the caller can branch on.
//!
//! Trees are immutable once built and shared behind an `Arc`; a session
//! replaces its tree wholesale on refresh.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use sigcall::Value;
use sigcall_api::EndpointDescriptor;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::pipeline::{CallArgs, Dispatcher, FunctionKind, RemoteFunction};

/// Name of the operation that makes a namespace indexable.
pub const GET_ALL: &str = "get_all";

/// A child of a [`Namespace`].
#[derive(Debug, Clone)]
pub enum ProxyNode {
    Namespace(Namespace),
    Function(Arc<RemoteFunction>),
}

impl ProxyNode {
    pub fn as_namespace(&self) -> Option<&Namespace> {
        match self {
            ProxyNode::Namespace(ns) => Some(ns),
            ProxyNode::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<RemoteFunction>> {
        match self {
            ProxyNode::Function(f) => Some(f),
            ProxyNode::Namespace(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Namespace {
    path: String,
    children: BTreeMap<String, ProxyNode>,
}

impl Namespace {
    fn new(path: String) -> Self {
        Self {
            path,
            children: BTreeMap::new(),
        }
    }

    /// Dotted path of this namespace; empty for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Direct children in name order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &ProxyNode)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&ProxyNode, ApiError> {
        self.children
            .get(name)
            .ok_or_else(|| ApiError::UnknownMember {
                path: self.path.clone(),
                name: name.to_string(),
            })
    }

    pub fn namespace(&self, name: &str) -> Result<&Namespace, ApiError> {
        self.get(name)?
            .as_namespace()
            .ok_or_else(|| ApiError::WrongMemberKind {
                path: self.child_path(name),
                expected: "namespace",
            })
    }

    pub fn function(&self, name: &str) -> Result<Arc<RemoteFunction>, ApiError> {
        self.get(name)?
            .as_function()
            .cloned()
            .ok_or_else(|| ApiError::WrongMemberKind {
                path: self.child_path(name),
                expected: "callable",
            })
    }

    /// Walk a dotted path relative to this namespace.
    pub fn resolve(&self, dotted: &str) -> Result<&ProxyNode, ApiError> {
        let mut segments = dotted.split('.');
        let first = segments.next().unwrap_or_default();
        let mut node = self.get(first)?;
        for segment in segments {
            node = match node {
                ProxyNode::Namespace(ns) => ns.get(segment)?,
                ProxyNode::Function(f) => {
                    return Err(ApiError::UnknownMember {
                        path: f.path().to_string(),
                        name: segment.to_string(),
                    })
                }
            };
        }
        Ok(node)
    }

    /// Call this namespace's `get_all` operation.
    pub fn get_all(&self) -> Result<Vec<Value>, ApiError> {
        let get_all = match self.children.get(GET_ALL) {
            Some(ProxyNode::Function(f)) => f,
            _ => {
                return Err(ApiError::NotIndexable {
                    path: self.path.clone(),
                })
            }
        };
        match get_all.call(CallArgs::new())? {
            Some(Value::List(items)) => Ok(items),
            Some(other) => Err(ApiError::UnexpectedReply(format!(
                "`{}` returned {} instead of a list",
                get_all.path(),
                other.type_name()
            ))),
            None => Ok(Vec::new()),
        }
    }

    /// Item `index` of [`get_all`](Self::get_all).
    pub fn index(&self, index: usize) -> Result<Value, ApiError> {
        let mut items = self.get_all()?;
        let len = items.len();
        if index >= len {
            return Err(ApiError::IndexOutOfRange {
                path: self.path.clone(),
                index,
                len,
            });
        }
        Ok(items.swap_remove(index))
    }

    fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.path)
        }
    }

    fn insert(&mut self, segments: &[&str], leaf: &str, function: RemoteFunction) {
        let Some((head, rest)) = segments.split_first() else {
            self.insert_leaf(leaf, function);
            return;
        };
        let child_path = self.child_path(head);
        let node = self
            .children
            .entry(head.to_string())
            .or_insert_with(|| ProxyNode::Namespace(Namespace::new(child_path.clone())));
        if let ProxyNode::Function(shadowed) = &*node {
            warn!(
                path = %child_path,
                dropped = %shadowed.descriptor().module_path,
                "callable shadowed by namespace"
            );
            *node = ProxyNode::Namespace(Namespace::new(child_path));
        }
        if let ProxyNode::Namespace(ns) = node {
            ns.insert(rest, leaf, function);
        }
    }

    /// Namespaces win over callables, service endpoints win over user code,
    /// and otherwise the smaller module path wins, whatever the order.
    fn insert_leaf(&mut self, leaf: &str, function: RemoteFunction) {
        let path = self.child_path(leaf);
        let keep_existing = match self.children.get(leaf) {
            None => false,
            Some(ProxyNode::Namespace(_)) => true,
            Some(ProxyNode::Function(existing)) => precedence(existing) <= precedence(&function),
        };
        if keep_existing {
            warn!(
                %path,
                dropped = %function.descriptor().module_path,
                "callable name already taken"
            );
            return;
        }
        if let Some(ProxyNode::Function(replaced)) = self
            .children
            .insert(leaf.to_string(), ProxyNode::Function(Arc::new(function)))
        {
            warn!(
                %path,
                dropped = %replaced.descriptor().module_path,
                "callable name already taken"
            );
        }
    }

    fn leaf_paths_into(&self, out: &mut Vec<String>) {
        for node in self.children.values() {
            match node {
                ProxyNode::Namespace(ns) => ns.leaf_paths_into(out),
                ProxyNode::Function(f) => out.push(f.path().to_string()),
            }
        }
    }

    fn describe_into(&self, out: &mut String) {
        if !self.path.is_empty() {
            out.push_str(&self.path);
            out.push('\n');
        }
        for node in self.children.values() {
            if let ProxyNode::Function(f) = node {
                for line in f.describe().lines() {
                    out.push_str("    ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        for node in self.children.values() {
            if let ProxyNode::Namespace(ns) = node {
                out.push('\n');
                ns.describe_into(out);
            }
        }
    }
}

fn precedence(function: &RemoteFunction) -> (bool, &str) {
    (
        function.user_code_id().is_some(),
        function.descriptor().module_path.as_str(),
    )
}

/// Root of a built proxy tree.
#[derive(Debug, Clone, Default)]
pub struct ProxyTree {
    root: Namespace,
}

impl ProxyTree {
    pub fn root(&self) -> &Namespace {
        &self.root
    }

    /// Dotted paths of every callable, sorted.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.root.leaf_paths_into(&mut out);
        out.sort();
        out
    }

    /// Every namespace and callable with its rendered signature.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.root.describe_into(&mut out);
        out.trim_start_matches('\n').to_string()
    }
}

impl Deref for ProxyTree {
    type Target = Namespace;
    fn deref(&self) -> &Namespace {
        &self.root
    }
}

/// Build a tree from descriptors. Calls made through its functions are
/// dispatched by `session`. Colliding names never fail the build; the
/// losing callable is dropped with a warning.
pub fn build_proxy_tree<'a, I>(entries: I, session: &Weak<dyn Dispatcher>) -> ProxyTree
where
    I: IntoIterator<Item = (&'a EndpointDescriptor, FunctionKind)>,
{
    let mut root = Namespace::default();
    let mut count = 0usize;
    for (descriptor, kind) in entries {
        let namespace = descriptor.namespace();
        let segments: Vec<&str> = if namespace.is_empty() {
            Vec::new()
        } else {
            namespace.split('.').collect()
        };
        let leaf = descriptor.name.as_str();
        let path = if namespace.is_empty() {
            leaf.to_string()
        } else {
            format!("{namespace}.{leaf}")
        };
        let function = RemoteFunction::new(path, descriptor.clone(), kind, session.clone());
        root.insert(&segments, leaf, function);
        count += 1;
    }
    debug!(callables = count, "proxy tree built");
    ProxyTree { root }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sigcall::{Param, ProtocolMigrationEngine, ProtocolVersion, Signature, TypeExpr, Uid};
    use sigcall_api::{Action, Call, CallResult};

    use super::*;
    use crate::catalog::{USER_CODE_ID_ARG, USER_CODE_PATH};
    use crate::pipeline::{DeclineAll, Prompter};

    struct ListService {
        engine: ProtocolMigrationEngine,
        items: Vec<Value>,
        calls: Mutex<Vec<String>>,
    }

    impl Dispatcher for ListService {
        fn service_id(&self) -> Uid {
            Uid::default()
        }
        fn protocol(&self) -> ProtocolVersion {
            ProtocolVersion::Dev
        }
        fn engine(&self) -> &ProtocolMigrationEngine {
            &self.engine
        }
        fn prompter(&self) -> &dyn Prompter {
            &DeclineAll
        }
        fn dispatch(&self, call: Call) -> Result<CallResult, ApiError> {
            self.calls.lock().unwrap().push(call.path);
            Ok(CallResult::ok(Value::List(self.items.clone())))
        }
        fn record_action(&self, _: &Action) {}
        fn request_refresh(&self) {}
    }

    fn service() -> Arc<dyn Dispatcher> {
        Arc::new(ListService {
            engine: ProtocolMigrationEngine::default(),
            items: vec![Value::Int(10), Value::Int(20)],
            calls: Mutex::new(Vec::new()),
        })
    }

    fn descriptors() -> Vec<EndpointDescriptor> {
        vec![
            EndpointDescriptor::new("user.get_all", Signature::default()),
            EndpointDescriptor::new(
                "user.get_by_email",
                Signature::new(vec![Param::positional("email", TypeExpr::str())]),
            )
            .with_name("find"),
            EndpointDescriptor::new("settings.admin.reset", Signature::default()),
            EndpointDescriptor::new("ping", Signature::default()),
        ]
    }

    fn tree(session: &Arc<dyn Dispatcher>, ds: &[EndpointDescriptor]) -> ProxyTree {
        build_proxy_tree(
            ds.iter().map(|d| (d, FunctionKind::Service)),
            &Arc::downgrade(session),
        )
    }

    #[test]
    fn nested_paths_and_display_names() {
        let s = service();
        let t = tree(&s, &descriptors());
        assert_eq!(
            t.leaf_paths(),
            vec!["ping", "settings.admin.reset", "user.find", "user.get_all"]
        );
        assert!(t.namespace("settings").unwrap().namespace("admin").is_ok());
        assert_eq!(t.namespace("user").unwrap().path(), "user");
        assert!(t.function("ping").is_ok());
        assert!(matches!(t.resolve("user.find").unwrap(), ProxyNode::Function(_)));
    }

    #[test]
    fn building_twice_gives_the_same_shape() {
        let s = service();
        let a = tree(&s, &descriptors());
        let mut reversed = descriptors();
        reversed.reverse();
        let b = tree(&s, &reversed);
        assert_eq!(a.leaf_paths(), b.leaf_paths());
        assert_eq!(a.describe(), b.describe());
    }

    #[test]
    fn unknown_member_is_a_value() {
        let s = service();
        let t = tree(&s, &descriptors());
        let err = t.namespace("user").unwrap().get("delete").unwrap_err();
        assert!(matches!(
            err,
            ApiError::UnknownMember { ref path, ref name } if path == "user" && name == "delete"
        ));
        assert!(matches!(t.resolve("ping.more"), Err(ApiError::UnknownMember { .. })));
        assert!(matches!(t.function("user"), Err(ApiError::WrongMemberKind { .. })));
    }

    #[test]
    fn namespace_wins_over_callable_of_the_same_name() {
        let s = service();
        let mut ds = vec![
            EndpointDescriptor::new("user", Signature::default()),
            EndpointDescriptor::new("user.get", Signature::default()),
        ];
        let forward = tree(&s, &ds);
        ds.reverse();
        let backward = tree(&s, &ds);
        assert_eq!(forward.leaf_paths(), vec!["user.get"]);
        assert_eq!(backward.leaf_paths(), vec!["user.get"]);
        assert!(forward.namespace("user").is_ok());
    }

    #[test]
    fn service_endpoint_keeps_its_name_over_user_code() {
        let s = service();
        let user_code = EndpointDescriptor::new(USER_CODE_PATH, Signature::default())
            .with_name("submit")
            .with_prebound(USER_CODE_ID_ARG, Uid::new());
        let submit = EndpointDescriptor::new("code.submit", Signature::default());

        for ds in [
            vec![user_code.clone(), submit.clone()],
            vec![submit.clone(), user_code.clone()],
        ] {
            let t = tree(&s, &ds);
            assert_eq!(t.leaf_paths(), vec!["code.submit"]);
            let f = t.resolve("code.submit").unwrap().as_function().unwrap().clone();
            assert_eq!(f.kind(), FunctionKind::Service);
            assert_eq!(f.descriptor().service_path, "code.submit");
        }
    }

    #[test]
    fn get_all_makes_namespace_indexable() {
        let s = service();
        let t = tree(&s, &descriptors());
        let users = t.namespace("user").unwrap();
        assert_eq!(users.get_all().unwrap(), vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(users.index(1).unwrap(), Value::Int(20));
        assert!(matches!(users.index(2), Err(ApiError::IndexOutOfRange { len: 2, .. })));
        assert!(matches!(
            t.namespace("settings").unwrap().get_all(),
            Err(ApiError::NotIndexable { .. })
        ));
    }

    #[test]
    fn describe_lists_namespaces_and_signatures() {
        let s = service();
        let t = tree(&s, &descriptors());
        let text = t.describe();
        assert!(text.starts_with("    ping()\n"), "got:\n{text}");
        assert!(text.contains("user\n    user.find(email: str)\n    user.get_all()\n"));
        assert!(text.contains("settings.admin\n    settings.admin.reset()\n"));
    }
}
