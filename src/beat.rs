//! Helpers for the beat recipes: well-known cluster roles, default skip
//! policies and a test pod that logs a known marker.

use std::{collections::BTreeMap, path::Path};

use k8s_openapi::{
    api::core::v1::{Container, Pod, PodSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

use crate::{
    builder::{Builder, generate_suffix, random_lowercase},
    gate::GatePolicy,
    predicate::has_event_from_beat,
    resource::Object,
    runner::{CaseReport, Runner, TestCase},
};

pub const PSP_CLUSTER_ROLE_NAME: &str = "elastic-beat-restricted";
pub const AUTODISCOVER_CLUSTER_ROLE_NAME: &str = "elastic-beat-autodiscover";
pub const AUDITBEAT_PSP_CLUSTER_ROLE_NAME: &str = "elastic-auditbeat-restricted";
pub const JOURNALBEAT_PSP_CLUSTER_ROLE_NAME: &str = "elastic-journalbeat-restricted";
pub const PACKETBEAT_PSP_CLUSTER_ROLE_NAME: &str = "elastic-packetbeat-restricted";

/// Beat recipes live in this directory below the recipes root.
pub const RECIPES_SUBDIR: &str = "beats";

const LOGGER_IMAGE: &str = "busybox";

/// Default skip policy for a beat type.
pub fn policy_for(beat_type: &str) -> GatePolicy {
    let policy = GatePolicy::new(beat_type).exclude_provider(
        "ocp",
        "the recipes' security context does not satisfy OpenShift defaults",
    );
    match beat_type {
        "auditbeat" => policy.exclude_provider(
            "kind",
            "kind cannot configure the kernel settings auditbeat needs",
        ),
        _ => policy,
    }
}

/// Expects at least one event shipped by every beat type the recipe deploys.
pub fn with_beat_validation(builder: Builder) -> Builder {
    let mut beat_types: Vec<String> = Vec::new();
    for beat in builder.beats() {
        if !beat_types.contains(&beat.spec.beat_type) {
            beat_types.push(beat.spec.beat_type.clone());
        }
    }
    let validations: Vec<_> = beat_types
        .iter()
        .map(|beat_type| has_event_from_beat(beat_type))
        .collect();
    builder.with_validations(validations)
}

/// A test case for the beat recipe `file_name`. `customize` runs first; the
/// check that the beat shipped anything at all is always added last.
pub fn recipe_case<F>(beat_type: &str, file_name: &str, customize: F) -> TestCase
where
    F: FnOnce(Builder) -> Builder + Send + 'static,
{
    let name = file_name.trim_end_matches(".yaml");
    TestCase::new(name, Path::new(RECIPES_SUBDIR).join(file_name))
        .with_policy(policy_for(beat_type))
        .customize(customize)
        .customize(with_beat_validation)
}

/// Runs the beat recipe `file_name` together with `additional_objects`.
pub async fn run_recipe<F>(
    runner: &Runner,
    beat_type: &str,
    file_name: &str,
    customize: F,
    additional_objects: impl IntoIterator<Item = Object>,
) -> CaseReport
where
    F: FnOnce(Builder) -> Builder + Send + 'static,
{
    let case = recipe_case(beat_type, file_name, customize).with_additional_objects(additional_objects);
    runner.run(case).await
}

/// A pod that keeps printing a random marker, so that log shipping can be
/// asserted on by content.
#[derive(Clone, Debug)]
pub struct LoggingTestPod {
    pub pod: Pod,
    pub logged: String,
}

impl LoggingTestPod {
    /// The pod name ends in a fresh run suffix, so concurrent cases never
    /// share a pod.
    pub fn new(name: &str) -> Self {
        let name = format!("test-{}-{}", name, generate_suffix());
        let logged = format!("logged-{}", random_lowercase(16));

        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([("app".to_owned(), name)])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "logger".to_owned(),
                    image: Some(LOGGER_IMAGE.to_owned()),
                    command: Some(vec![
                        "/bin/sh".to_owned(),
                        "-c".to_owned(),
                        format!("while true; do echo {logged}; sleep 10; done"),
                    ]),
                    ..Default::default()
                }],
                termination_grace_period_seconds: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };

        Self { pod, logged }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pod
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        self.pod.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn to_object(&self) -> Result<Object, serde_json::Error> {
        Object::from_resource(&self.pod)
    }
}
