use recipe_harness::{
    Builder,
    beat::{
        self, AUDITBEAT_PSP_CLUSTER_ROLE_NAME, AUTODISCOVER_CLUSTER_ROLE_NAME,
        JOURNALBEAT_PSP_CLUSTER_ROLE_NAME, LoggingTestPod, PACKETBEAT_PSP_CLUSTER_ROLE_NAME,
        PSP_CLUSTER_ROLE_NAME,
    },
    predicate::{
        Query, has_event, has_event_from_pod, has_message_containing, has_monitoring_event,
        no_message_containing,
    },
    resource::Object,
};

use super::{assert_case, runner};

fn events(queries: &[&str]) -> Vec<recipe_harness::Predicate> {
    queries
        .iter()
        .map(|query| has_event(Query::parse(query).expect("invalid query")))
        .collect()
}

fn objects(pods: &[&LoggingTestPod]) -> Vec<Object> {
    pods.iter()
        .map(|pod| pod.to_object().expect("invalid pod"))
        .collect()
}

#[tokio::test]
async fn filebeat_no_autodiscover_recipe() {
    let runner = runner();
    let pod = LoggingTestPod::new("fb-no-autodiscover");
    let logged = pod.logged.clone();

    let report = beat::run_recipe(
        &runner,
        "filebeat",
        "filebeat_no_autodiscover.yaml",
        move |builder| {
            builder
                .with_roles([PSP_CLUSTER_ROLE_NAME])
                .with_validations([has_message_containing(&logged)])
        },
        objects(&[&pod]),
    )
    .await;
    assert_case(&report);
}

#[tokio::test]
async fn filebeat_autodiscover_recipe() {
    let runner = runner();
    let pod = LoggingTestPod::new("fb-autodiscover");
    let (name, logged) = (pod.name().to_owned(), pod.logged.clone());

    let report = beat::run_recipe(
        &runner,
        "filebeat",
        "filebeat_autodiscover.yaml",
        move |builder| {
            builder
                .with_roles([PSP_CLUSTER_ROLE_NAME])
                .with_validations([has_event_from_pod(&name), has_message_containing(&logged)])
        },
        objects(&[&pod]),
    )
    .await;
    assert_case(&report);
}

#[tokio::test]
async fn filebeat_autodiscover_by_metadata_recipe() {
    let runner = runner();
    let bad = LoggingTestPod::new("fb-autodiscover-meta-bad");
    let labeled =
        LoggingTestPod::new("fb-autodiscover-meta-label").with_label("log-label", "true");
    let (name, good_log, bad_log) = (
        labeled.name().to_owned(),
        labeled.logged.clone(),
        bad.logged.clone(),
    );

    let report = beat::run_recipe(
        &runner,
        "filebeat",
        "filebeat_autodiscover_by_metadata.yaml",
        move |builder| {
            builder
                .with_roles([PSP_CLUSTER_ROLE_NAME, AUTODISCOVER_CLUSTER_ROLE_NAME])
                .with_validations([
                    has_event_from_pod(&name),
                    has_message_containing(&good_log),
                    no_message_containing(&bad_log),
                ])
        },
        objects(&[&labeled, &bad]),
    )
    .await;
    assert_case(&report);
}

#[tokio::test]
async fn metricbeat_hosts_recipe() {
    let report = beat::run_recipe(
        &runner(),
        "metricbeat",
        "metricbeat_hosts.yaml",
        |builder| {
            builder
                .with_roles([PSP_CLUSTER_ROLE_NAME])
                .with_validations(events(&[
                    "event.dataset:system.cpu",
                    "event.dataset:system.load",
                    "event.dataset:system.memory",
                    "event.dataset:system.network",
                    "event.dataset:system.process",
                    "event.dataset:system.process.summary",
                    "event.dataset:system.fsstat",
                ]))
        },
        Vec::new(),
    )
    .await;
    assert_case(&report);
}

fn monitoring_events(queries: &[&str]) -> Vec<recipe_harness::Predicate> {
    queries
        .iter()
        .map(|query| has_monitoring_event(Query::parse(query).expect("invalid query")))
        .collect()
}

/// Metricbeat and filebeat ship the monitored cluster's metrics and logs to
/// a separate monitoring cluster.
#[tokio::test]
async fn metricbeat_stack_monitoring_recipe() {
    let runner = runner();
    let pod = LoggingTestPod::new("fb-autodiscover");
    let (name, logged) = (pod.name().to_owned(), pod.logged.clone());

    let report = beat::run_recipe(
        &runner,
        "metricbeat",
        "stack_monitoring.yaml",
        move |builder| {
            let mut validations = monitoring_events(&[
                "type:cluster_stats",
                "type:enrich_coordinator_stats",
                "type:index_stats",
                "type:index_recovery",
                "type:indices_stats",
                "node_stats.node_master:true",
                "kibana_stats.kibana.status:green",
            ]);
            validations.extend([has_event_from_pod(&name), has_message_containing(&logged)]);
            builder
                .with_roles([PSP_CLUSTER_ROLE_NAME])
                .with_validations(validations)
        },
        objects(&[&pod]),
    )
    .await;
    assert_case(&report);
}

/// The recipe monitors the stack through in-cluster service names that
/// assume the `default` namespace and unsuffixed names.
fn point_heartbeat_at_isolated_services(builder: Builder) -> Builder {
    builder.map_beat(|beat| {
        let namespace = beat.namespace().unwrap_or("default").to_owned();
        let elasticsearch = beat.spec.elasticsearch_ref.as_ref().map(|r| r.name.clone());
        let kibana = beat.spec.kibana_ref.as_ref().map(|r| r.name.clone());
        let Some(config) = beat.spec.config.take() else {
            return;
        };

        let mut rendered = config.to_string();
        if let Some(name) = elasticsearch {
            rendered = rendered.replace(
                "elasticsearch-es-http.default.svc",
                &format!("{name}-es-http.{namespace}.svc"),
            );
        }
        if let Some(name) = kibana {
            rendered = rendered.replace(
                "kibana-kb-http.default.svc",
                &format!("{name}-kb-http.{namespace}.svc"),
            );
        }
        beat.spec.config = Some(serde_json::from_str(&rendered).expect("invalid config"));
    })
}

#[tokio::test]
async fn heartbeat_es_kb_health_recipe() {
    let report = beat::run_recipe(
        &runner(),
        "heartbeat",
        "heartbeat_es_kb_health.yaml",
        |builder| {
            point_heartbeat_at_isolated_services(builder)
                .with_roles([PSP_CLUSTER_ROLE_NAME])
                .with_validations(events(&["monitor.status:up"]))
        },
        Vec::new(),
    )
    .await;
    assert_case(&report);
}

#[tokio::test]
async fn auditbeat_hosts_recipe() {
    let report = beat::run_recipe(
        &runner(),
        "auditbeat",
        "auditbeat_hosts.yaml",
        |builder| {
            builder
                .with_roles([AUDITBEAT_PSP_CLUSTER_ROLE_NAME])
                .with_validations(events(&["event.dataset:file", "event.module:file_integrity"]))
        },
        Vec::new(),
    )
    .await;
    assert_case(&report);
}

#[tokio::test]
async fn packetbeat_dns_http_recipe() {
    let runner = runner();
    // HTTP tracking does not work on kind with Kubernetes 1.12.
    let track_http = !(runner.context().provider == "kind"
        && runner.context().kubernetes_version == "1.12");

    let report = beat::run_recipe(
        &runner,
        "packetbeat",
        "packetbeat_dns_http.yaml",
        move |builder| {
            let builder = if track_http {
                builder.with_validations(events(&["event.dataset:http"]))
            } else {
                builder
            };
            builder
                .with_roles([PACKETBEAT_PSP_CLUSTER_ROLE_NAME])
                .with_validations(events(&["event.dataset:flow", "event.dataset:dns"]))
        },
        Vec::new(),
    )
    .await;
    assert_case(&report);
}

#[tokio::test]
async fn journalbeat_hosts_recipe() {
    let report = beat::run_recipe(
        &runner(),
        "journalbeat",
        "journalbeat_hosts.yaml",
        |builder| builder.with_roles([JOURNALBEAT_PSP_CLUSTER_ROLE_NAME]),
        Vec::new(),
    )
    .await;
    assert_case(&report);
}
