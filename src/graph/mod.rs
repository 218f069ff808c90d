//! Resource graph construction and realization ordering.
//!
//! Resources are declared up front as specs; directed edges (explicit
//! `depends_on` calls or implicit attribute references) constrain the order
//! in which the provider may realize them. The order is computed once, and
//! any cycle or duplicate name is rejected before provisioning starts.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::output::Secret;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while building or ordering the resource graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Duplicate resource name: {0}")]
    DuplicateName(String),

    #[error("Dependency cycle among resources: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Unknown resource handle {0:?}")]
    UnknownHandle(ResourceHandle),

    #[error("Attribute '{attr}' of '{resource}' is not resolvable yet")]
    Unresolved { resource: String, attr: String },
}

/// Stable reference to a declared resource, usable before realization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(usize);

impl ResourceHandle {
    /// Deferred reference to an attribute this resource will expose once
    /// realized. Placing the reference in another spec's properties records
    /// an ordering edge automatically.
    pub fn attr(self, name: impl Into<String>) -> AttrRef {
        AttrRef {
            handle: self,
            attr: name.into(),
        }
    }
}

/// The kinds of resource the provider knows how to realize.
///
/// `Deployment` is special: it is realized by the build/package/deploy
/// pipeline rather than the provider, but participates in ordering like any
/// other node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ResourceGroup,
    StorageAccount,
    StorageTable,
    Insights,
    ServicePlan,
    FunctionHost,
    Deployment,
    Gateway,
    NamedValue,
    BackendBinding,
    Api,
    PolicyAttachment,
}

/// Deferred reference to an attribute of another resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrRef {
    pub handle: ResourceHandle,
    pub attr: String,
}

/// A property value in a resource spec: known now, secret, or deferred.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Literal(String),
    Secret(Secret),
    Attr(AttrRef),
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<AttrRef> for PropertyValue {
    fn from(value: AttrRef) -> Self {
        Self::Attr(value)
    }
}

impl From<Secret> for PropertyValue {
    fn from(value: Secret) -> Self {
        Self::Secret(value)
    }
}

/// A concrete attribute value, either plain or secret.
///
/// Secrets keep their redacting `Debug` through resolution, so resolved
/// specs stay safe to log.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Plain(String),
    Secret(Secret),
}

impl AttrValue {
    pub fn as_plain(&self) -> Option<&str> {
        match self {
            Self::Plain(v) => Some(v),
            Self::Secret(_) => None,
        }
    }

    pub fn as_secret(&self) -> Option<&Secret> {
        match self {
            Self::Plain(_) => None,
            Self::Secret(s) => Some(s),
        }
    }
}

/// Declaration of a provisionable resource.
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub name: String,
    pub kind: ResourceKind,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Resolve deferred properties against already-realized attributes.
    ///
    /// `lookup` maps (handle, attribute name) to the realized value; a miss
    /// means the referenced resource has not been realized yet or never
    /// exposes that attribute, which is an ordering bug.
    pub fn resolve(
        &self,
        lookup: impl Fn(ResourceHandle, &str) -> Option<AttrValue>,
    ) -> Result<ResolvedSpec> {
        let mut properties = BTreeMap::new();
        for (key, value) in &self.properties {
            let resolved = match value {
                PropertyValue::Literal(v) => AttrValue::Plain(v.clone()),
                PropertyValue::Secret(s) => AttrValue::Secret(s.clone()),
                PropertyValue::Attr(attr_ref) => lookup(attr_ref.handle, &attr_ref.attr)
                    .ok_or_else(|| GraphError::Unresolved {
                        resource: self.name.clone(),
                        attr: attr_ref.attr.clone(),
                    })?,
            };
            properties.insert(key.clone(), resolved);
        }
        Ok(ResolvedSpec {
            name: self.name.clone(),
            kind: self.kind,
            properties,
        })
    }
}

/// A spec with every property resolved to a concrete value.
#[derive(Debug, Clone)]
pub struct ResolvedSpec {
    pub name: String,
    pub kind: ResourceKind,
    pub properties: BTreeMap<String, AttrValue>,
}

impl ResolvedSpec {
    pub fn property(&self, key: &str) -> Option<&AttrValue> {
        self.properties.get(key)
    }

    /// Plain-string property, `None` if absent or secret.
    pub fn plain(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(AttrValue::as_plain)
    }
}

/// The dependency graph of declared resources.
#[derive(Default)]
pub struct ResourceGraph {
    specs: Vec<ResourceSpec>,
    names: HashSet<String>,
    /// Edges as (dependency, dependent) index pairs, deduplicated.
    edges: HashSet<(usize, usize)>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource. Attribute references in its properties become
    /// ordering edges. Duplicate names are rejected immediately: provider
    /// idempotence is keyed by name, so two specs sharing one would merge
    /// silently.
    pub fn declare(&mut self, spec: ResourceSpec) -> Result<ResourceHandle> {
        if !self.names.insert(spec.name.clone()) {
            return Err(GraphError::DuplicateName(spec.name));
        }
        let index = self.specs.len();
        for value in spec.properties.values() {
            if let PropertyValue::Attr(attr_ref) = value {
                self.check_handle(attr_ref.handle)?;
                self.edges.insert((attr_ref.handle.0, index));
            }
        }
        self.specs.push(spec);
        Ok(ResourceHandle(index))
    }

    /// Record that `dependent` may not be realized before `dependency`.
    pub fn depends_on(
        &mut self,
        dependent: ResourceHandle,
        dependency: ResourceHandle,
    ) -> Result<()> {
        self.check_handle(dependent)?;
        self.check_handle(dependency)?;
        self.edges.insert((dependency.0, dependent.0));
        Ok(())
    }

    pub fn spec(&self, handle: ResourceHandle) -> Result<&ResourceSpec> {
        self.specs
            .get(handle.0)
            .ok_or(GraphError::UnknownHandle(handle))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Compute the realization order: a topological sort of the declared
    /// resources, ties broken by declaration order. Any cycle (including a
    /// self-dependency) is fatal before provisioning begins.
    pub fn realization_order(&self) -> Result<Vec<ResourceHandle>> {
        let count = self.specs.len();
        let mut indegree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for &(dependency, dependent) in &self.edges {
            indegree[dependent] += 1;
            dependents[dependency].push(dependent);
        }

        // BTreeSet keeps the ready set sorted by declaration index.
        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(&index) = ready.iter().next() {
            ready.remove(&index);
            order.push(ResourceHandle(index));
            for &dependent in &dependents[index] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < count {
            let stuck = (0..count)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.specs[i].name.clone())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }

    fn check_handle(&self, handle: ResourceHandle) -> Result<()> {
        if handle.0 < self.specs.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownHandle(handle))
        }
    }
}
