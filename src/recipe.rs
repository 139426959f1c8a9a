//! Loading recipes.
//!
//! A recipe is a multi-document YAML file. The first [`Beat`] document is the
//! primary resource; further beats deploy next to it as companions, and every
//! other document is an auxiliary [`Object`]. Before
//! deserialization the `$(NAMESPACE)` and `$(SUFFIX)` tokens are replaced;
//! after it, every object is moved into the run's namespace and renamed with
//! the run's suffix, and references between recipe objects are rewritten to
//! follow the renames.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    builder::Builder,
    resource::{BEAT_KIND, Beat, Object, suffixed},
};

pub const NAMESPACE_PLACEHOLDER: &str = "$(NAMESPACE)";
pub const SUFFIX_PLACEHOLDER: &str = "$(SUFFIX)";

#[derive(Debug, Snafu)]
pub enum LoadError {
    #[snafu(display("Could not read recipe {:?}: {}", path, source))]
    Read { path: PathBuf, source: io::Error },
    #[snafu(display("Recipe {:?} is not valid YAML: {}", path, source))]
    Syntax {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[snafu(display("Document {} of recipe {:?} is not a {}: {}", index, path, kind, source))]
    Schema {
        path: PathBuf,
        index: usize,
        kind: String,
        source: serde_json::Error,
    },
    #[snafu(display("Recipe {:?} has no {} resource", path, BEAT_KIND))]
    MissingPrimary { path: PathBuf },
}

/// The typed content of a recipe file, isolated for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct Recipe {
    pub beat: Beat,
    /// Every `Beat` after the first, in document order.
    pub companions: Vec<Beat>,
    pub objects: Vec<Object>,
}

/// Reads the recipe at `path` and turns it into a [`Builder`] owned by the run
/// identified by `namespace` and `suffix`.
pub fn load(
    path: impl AsRef<Path>,
    namespace: &str,
    suffix: &str,
) -> Result<Builder, LoadError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).context(ReadSnafu { path })?;
    let recipe = Recipe::parse(&contents, path, namespace, suffix)?;
    Ok(Builder::new(recipe.beat, recipe.objects, suffix).with_companions(recipe.companions))
}

/// Replaces the namespace and suffix tokens. No other templating happens.
pub fn substitute(template: &str, namespace: &str, suffix: &str) -> String {
    template
        .replace(NAMESPACE_PLACEHOLDER, namespace)
        .replace(SUFFIX_PLACEHOLDER, suffix)
}

impl Recipe {
    pub fn parse(
        template: &str,
        path: &Path,
        namespace: &str,
        suffix: &str,
    ) -> Result<Self, LoadError> {
        let contents = substitute(template, namespace, suffix);

        let mut beats = Vec::new();
        let mut objects = Vec::new();
        for (index, document) in serde_yaml::Deserializer::from_str(&contents).enumerate() {
            let yaml = serde_yaml::Value::deserialize(document).context(SyntaxSnafu { path })?;
            if yaml.is_null() {
                continue;
            }
            let json = serde_json::to_value(&yaml).context(SchemaSnafu {
                path,
                index,
                kind: "Kubernetes object",
            })?;

            let kind = json.get("kind").and_then(Value::as_str).unwrap_or_default();
            if kind == BEAT_KIND {
                let parsed: Beat = serde_json::from_value(json).context(SchemaSnafu {
                    path,
                    index,
                    kind: BEAT_KIND,
                })?;
                beats.push(parsed);
            } else {
                let parsed: Object = serde_json::from_value(json).context(SchemaSnafu {
                    path,
                    index,
                    kind: "Kubernetes object",
                })?;
                objects.push(parsed);
            }
        }

        isolate(&mut beats, &mut objects, namespace, suffix);

        let mut beats = beats.into_iter();
        let beat = beats.next().context(MissingPrimarySnafu { path })?;
        Ok(Self {
            beat,
            companions: beats.collect(),
            objects,
        })
    }
}

/// Name infixes the operator uses for secrets it derives from a resource,
/// e.g. `elasticsearch-es-elastic-user` for the Elasticsearch `elasticsearch`.
const DERIVED_SECRET_INFIXES: &[(&str, &str)] = &[("Elasticsearch", "-es-"), ("Kibana", "-kb-")];

/// Original `(kind, name)` to isolated name, for every object of a recipe.
struct Renames(HashMap<(String, String), String>);

impl Renames {
    fn get(&self, kind: &str, name: &str) -> Option<&String> {
        self.0.get(&(kind.to_owned(), name.to_owned()))
    }

    fn rewrite(&self, kind: &str, name: &mut String) {
        if let Some(renamed) = self.get(kind, name) {
            name.clone_from(renamed);
        }
    }

    fn rewrite_value(&self, kind: &str, value: Option<&mut Value>) {
        let Some(value) = value else {
            return;
        };
        if let Some(renamed) = value.as_str().and_then(|name| self.get(kind, name)) {
            *value = Value::String(renamed.clone());
        }
    }

    /// Follows the rename of the resource a derived secret name is built from.
    fn rewrite_derived_secret(&self, value: Option<&mut Value>) {
        let Some(value) = value else {
            return;
        };
        let Some(name) = value.as_str() else {
            return;
        };

        let renamed = self.0.iter().find_map(|((kind, original), renamed)| {
            let (_, infix) = DERIVED_SECRET_INFIXES
                .iter()
                .find(|(derived_from, _)| derived_from == kind)?;
            let rest = name.strip_prefix(original.as_str())?.strip_prefix(infix)?;
            Some(format!("{renamed}{infix}{rest}"))
        });
        if let Some(renamed) = renamed {
            *value = Value::String(renamed);
        }
    }
}

fn isolate(beats: &mut [Beat], objects: &mut [Object], namespace: &str, suffix: &str) {
    let renames = Renames(
        objects
            .iter()
            .map(|object| (object.kind.clone(), object.name().to_owned()))
            .chain(
                beats
                    .iter()
                    .map(|beat| (BEAT_KIND.to_owned(), beat.name().to_owned())),
            )
            .map(|(kind, name)| {
                let renamed = suffixed(&name, suffix);
                ((kind, name), renamed)
            })
            .collect(),
    );

    for beat in beats.iter_mut() {
        isolate_beat(beat, &renames, namespace, suffix);
    }

    for object in objects.iter_mut() {
        let name = suffixed(object.name(), suffix);
        object.metadata.name = Some(name);
        if !object.is_cluster_scoped() {
            object.metadata.namespace = Some(namespace.to_owned());
        }

        match object.kind.as_str() {
            "ClusterRoleBinding" | "RoleBinding" => {
                rewrite_binding(object, &renames, namespace);
            }
            "Kibana" => {
                let reference = object
                    .data
                    .get_mut("spec")
                    .and_then(|spec| spec.get_mut("elasticsearchRef"));
                if let Some(reference) = reference {
                    renames.rewrite_value("Elasticsearch", reference.get_mut("name"));
                }
            }
            _ => {}
        }
    }
}

fn isolate_beat(beat: &mut Beat, renames: &Renames, namespace: &str, suffix: &str) {
    let beat_name = suffixed(beat.name(), suffix);
    beat.metadata.name = Some(beat_name);
    beat.metadata.namespace = Some(namespace.to_owned());
    if let Some(reference) = beat.spec.elasticsearch_ref.as_mut() {
        renames.rewrite("Elasticsearch", &mut reference.name);
    }
    if let Some(reference) = beat.spec.kibana_ref.as_mut() {
        renames.rewrite("Kibana", &mut reference.name);
    }

    let Some(pod_spec) = beat.pod_spec_mut() else {
        return;
    };
    renames.rewrite_value("ServiceAccount", pod_spec.get_mut("serviceAccountName"));

    let env = pod_spec
        .get_mut("containers")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter_map(|container| container.get_mut("env").and_then(Value::as_array_mut))
        .flatten();
    for variable in env {
        renames.rewrite_derived_secret(variable.pointer_mut("/valueFrom/secretKeyRef/name"));
    }
}

fn rewrite_binding(binding: &mut Object, renames: &Renames, namespace: &str) {
    if let Some(role_ref) = binding.data.get_mut("roleRef") {
        let kind = role_ref
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("ClusterRole")
            .to_owned();
        renames.rewrite_value(&kind, role_ref.get_mut("name"));
    }

    let subjects = binding
        .data
        .get_mut("subjects")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten();
    for subject in subjects {
        if subject.get("kind").and_then(Value::as_str) != Some("ServiceAccount") {
            continue;
        }
        renames.rewrite_value("ServiceAccount", subject.get_mut("name"));
        if let Some(subject) = subject.as_object_mut() {
            subject.insert("namespace".to_owned(), Value::String(namespace.to_owned()));
        }
    }
}
