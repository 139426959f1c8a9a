//! The read-only description of the environment a test process runs in.
//!
//! A [`Context`] is built once per process and then passed explicitly to
//! every component that needs it. Nothing in the harness reads the process
//! environment after that point.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use url::Url;

/// Path of a JSON file holding the whole context. Takes precedence over the
/// individual variables below.
pub const CONTEXT_FILE_ENV: &str = "E2E_CONTEXT_FILE";
pub const PROVIDER_ENV: &str = "E2E_PROVIDER";
pub const KUBERNETES_VERSION_ENV: &str = "E2E_KUBERNETES_VERSION";
pub const STACK_VERSION_ENV: &str = "E2E_STACK_VERSION";
pub const NAMESPACE_ENV: &str = "E2E_NAMESPACE";
pub const ELASTICSEARCH_URL_ENV: &str = "E2E_ELASTICSEARCH_URL";
pub const ELASTICSEARCH_USERNAME_ENV: &str = "E2E_ELASTICSEARCH_USERNAME";
pub const ELASTICSEARCH_PASSWORD_ENV: &str = "E2E_ELASTICSEARCH_PASSWORD";
pub const KUBECTL_ENV: &str = "E2E_KUBECTL";
pub const RECIPES_DIR_ENV: &str = "E2E_RECIPES_DIR";

#[derive(Debug, Snafu)]
pub enum ContextError {
    #[snafu(display("Missing environment variable {:?}", name))]
    MissingVariable { name: &'static str },
    #[snafu(display("Could not read context file {:?}: {}", path, source))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Could not parse context file {:?}: {}", path, source))]
    ParseFile {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("Invalid Elasticsearch URL {:?}: {}", url, source))]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Context {
    /// Identity of the cluster provider, e.g. `kind`, `gke` or `ocp`.
    pub provider: String,
    /// Version of the orchestration platform, e.g. `1.12` or `1.29.2`.
    pub kubernetes_version: String,
    /// Version of the telemetry stack every recipe is tested against.
    ///
    /// Kept as written; it is parsed by the gate so that a malformed value
    /// fails the cases that depend on it instead of the whole process.
    pub stack_version: String,
    /// Namespace shared by every case of this run.
    pub namespace: String,

    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default = "default_kubectl_command")]
    pub kubectl_command: String,

    /// Directory recipe paths are resolved against.
    #[serde(default = "default_recipes_dir")]
    pub recipes_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticsearchConfig {
    pub endpoint: Option<Url>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Accept self-signed certificates, as the operator issues by default.
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Upper bound for a single `_count` request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            username: None,
            password: None,
            insecure_skip_verify: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ElasticsearchConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// Upper bound for a whole case, teardown excluded.
    #[serde(default = "default_case_secs")]
    pub case_secs: u64,
    /// How long the primary resource gets to report itself ready.
    #[serde(default = "default_readiness_secs")]
    pub readiness_secs: u64,
    /// Window granted to every predicate.
    #[serde(default = "default_validation_secs")]
    pub validation_secs: u64,
    /// Upper bound for tearing a case down.
    #[serde(default = "default_teardown_secs")]
    pub teardown_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_case_secs() -> u64 {
    15 * 60
}

const fn default_readiness_secs() -> u64 {
    5 * 60
}

const fn default_validation_secs() -> u64 {
    5 * 60
}

const fn default_teardown_secs() -> u64 {
    2 * 60
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_kubectl_command() -> String {
    "kubectl".to_owned()
}

fn default_recipes_dir() -> PathBuf {
    PathBuf::from("config/recipes")
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            case_secs: default_case_secs(),
            readiness_secs: default_readiness_secs(),
            validation_secs: default_validation_secs(),
            teardown_secs: default_teardown_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TimeoutsConfig {
    pub const fn case(&self) -> Duration {
        Duration::from_secs(self.case_secs)
    }

    pub const fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    pub const fn validation(&self) -> Duration {
        Duration::from_secs(self.validation_secs)
    }

    pub const fn teardown(&self) -> Duration {
        Duration::from_secs(self.teardown_secs)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Context {
    pub fn new(
        provider: impl Into<String>,
        kubernetes_version: impl Into<String>,
        stack_version: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kubernetes_version: kubernetes_version.into(),
            stack_version: stack_version.into(),
            namespace: namespace.into(),
            elasticsearch: ElasticsearchConfig::default(),
            timeouts: TimeoutsConfig::default(),
            kubectl_command: default_kubectl_command(),
            recipes_dir: default_recipes_dir(),
        }
    }

    /// Builds the context from the process environment: the JSON file named
    /// by `E2E_CONTEXT_FILE` if set, otherwise the individual `E2E_*`
    /// variables.
    pub fn load() -> Result<Self, ContextError> {
        match env::var_os(CONTEXT_FILE_ENV) {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ContextError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).context(ReadFileSnafu { path })?;
        serde_json::from_str(&contents).context(ParseFileSnafu { path })
    }

    pub fn from_env() -> Result<Self, ContextError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ContextError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ContextError::MissingVariable { name })
        };

        let mut context = Self::new(
            required(PROVIDER_ENV)?,
            required(KUBERNETES_VERSION_ENV)?,
            required(STACK_VERSION_ENV)?,
            required(NAMESPACE_ENV)?,
        );

        if let Some(url) = lookup(ELASTICSEARCH_URL_ENV) {
            let endpoint = Url::parse(&url).context(InvalidUrlSnafu { url: url.clone() })?;
            context.elasticsearch.endpoint = Some(endpoint);
        }
        context.elasticsearch.username = lookup(ELASTICSEARCH_USERNAME_ENV);
        context.elasticsearch.password = lookup(ELASTICSEARCH_PASSWORD_ENV);
        if let Some(kubectl) = lookup(KUBECTL_ENV) {
            context.kubectl_command = kubectl;
        }
        if let Some(dir) = lookup(RECIPES_DIR_ENV) {
            context.recipes_dir = PathBuf::from(dir);
        }

        Ok(context)
    }

    /// Resolves a recipe file name against [`Context::recipes_dir`].
    pub fn recipe_path(&self, file_name: impl AsRef<Path>) -> PathBuf {
        self.recipes_dir.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write};

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn reads_required_variables() {
        let context = Context::from_lookup(lookup(&[
            (PROVIDER_ENV, "kind"),
            (KUBERNETES_VERSION_ENV, "1.12"),
            (STACK_VERSION_ENV, "7.10.0"),
            (NAMESPACE_ENV, "e2e-mercury"),
            (ELASTICSEARCH_URL_ENV, "https://localhost:9200"),
            (KUBECTL_ENV, "/usr/local/bin/kubectl"),
        ]))
        .unwrap();

        assert_eq!(context.provider, "kind");
        assert_eq!(context.kubernetes_version, "1.12");
        assert_eq!(context.namespace, "e2e-mercury");
        assert_eq!(
            context.elasticsearch.endpoint.unwrap().as_str(),
            "https://localhost:9200/"
        );
        assert_eq!(context.kubectl_command, "/usr/local/bin/kubectl");
        assert_eq!(context.timeouts.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn missing_variable_is_reported_by_name() {
        let error = Context::from_lookup(lookup(&[
            (PROVIDER_ENV, "kind"),
            (KUBERNETES_VERSION_ENV, "1.12"),
            (NAMESPACE_ENV, "e2e-mercury"),
        ]))
        .unwrap_err();

        assert!(matches!(
            error,
            ContextError::MissingVariable {
                name: STACK_VERSION_ENV
            }
        ));
    }

    #[test]
    fn parses_context_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "provider": "gke",
                "kubernetes_version": "1.29.2",
                "stack_version": "8.12.0",
                "namespace": "e2e-venus",
                "timeouts": {{ "readiness_secs": 30 }}
            }}"#
        )
        .unwrap();

        let context = Context::from_file(file.path()).unwrap();
        assert_eq!(context.provider, "gke");
        assert_eq!(context.timeouts.readiness(), Duration::from_secs(30));
        assert_eq!(context.timeouts.case_secs, 15 * 60);
        assert_eq!(context.kubectl_command, "kubectl");
        assert_eq!(
            context.elasticsearch.request_timeout(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"provider": "gke", "kubernetes_version": "1.29", "stack_version": "8.12.0", "namespace": "ns", "color": "blue"}}"#
        )
        .unwrap();

        assert!(matches!(
            Context::from_file(file.path()),
            Err(ContextError::ParseFile { .. })
        ));
    }
}
