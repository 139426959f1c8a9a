//! The objects a recipe is made of.
//!
//! The primary resource of a beat recipe is typed ([`Beat`]); everything else
//! is an [`Object`] whose header is typed and whose body is kept as JSON.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const BEAT_API_VERSION: &str = "beat.k8s.elastic.co/v1beta1";
pub const BEAT_KIND: &str = "Beat";

/// Kinds that live outside of any namespace.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PodSecurityPolicy",
    "PriorityClass",
    "SecurityContextConstraints",
    "StorageClass",
];

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Appends `-<suffix>` to `name` unless it already ends with it.
pub fn suffixed(name: &str, suffix: &str) -> String {
    if name.ends_with(&format!("-{suffix}")) {
        name.to_owned()
    } else {
        format!("{name}-{suffix}")
    }
}

/// Identifies an object on the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", namespace, self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A loosely typed Kubernetes object.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Object {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            data: Map::new(),
        }
    }

    /// Converts any serializable Kubernetes type into an [`Object`].
    pub fn from_resource<T: Serialize>(resource: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(resource).and_then(serde_json::from_value)
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.name().to_owned(),
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        is_cluster_scoped(&self.kind)
    }

    /// Looks a field up by a dotted path below the top level, e.g.
    /// `status.health`.
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        segments.try_fold(self.data.get(first)?, |value, segment| value.get(segment))
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// The primary resource of a beat recipe.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Beat {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: BeatSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatSpec {
    #[serde(rename = "type")]
    pub beat_type: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elasticsearch_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kibana_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_set: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Beat {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.name().to_owned(),
        }
    }

    pub fn to_object(&self) -> Result<Object, serde_json::Error> {
        Object::from_resource(self)
    }

    /// The pod template of whichever of `daemonSet` or `deployment` is set.
    pub fn pod_spec_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.spec
            .daemon_set
            .as_mut()
            .or(self.spec.deployment.as_mut())?
            .pointer_mut("/podTemplate/spec")?
            .as_object_mut()
    }

    pub fn service_account_name(&self) -> Option<&str> {
        self.spec
            .daemon_set
            .as_ref()
            .or(self.spec.deployment.as_ref())?
            .pointer("/podTemplate/spec/serviceAccountName")?
            .as_str()
    }
}
