use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use snafu::{OptionExt, ResultExt};
use url::Url;

use super::{
    BackendError, BuildClientSnafu, InvalidPatternSnafu, MissingEndpointSnafu, RequestSnafu,
    TelemetryBackend,
};
use crate::{
    context::ElasticsearchConfig,
    predicate::{Query, Term},
};

/// Answers queries with the `_count` API of an Elasticsearch cluster.
#[derive(Clone, Debug)]
pub struct ElasticsearchBackend {
    client: reqwest::Client,
    endpoint: Url,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

impl ElasticsearchBackend {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self, BackendError> {
        let mut endpoint = config.endpoint.clone().context(MissingEndpointSnafu)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .timeout(config.request_timeout())
            .build()
            .context(BuildClientSnafu)?;

        Ok(Self {
            client,
            endpoint,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn count_url(&self, pattern: &str) -> Result<Url, BackendError> {
        self.endpoint
            .join(&format!("{pattern}/_count"))
            .context(InvalidPatternSnafu { pattern })
    }
}

/// Request body for `query`: every term becomes a non-scoring filter clause.
pub fn query_body(query: &Query) -> Value {
    let filter: Vec<Value> = query
        .terms
        .iter()
        .map(|term| match term {
            Term::Equals { field, value } => json!({ "term": { field: value } }),
            Term::Contains { field, value } => json!({ "match_phrase": { field: value } }),
        })
        .collect();

    json!({ "query": { "bool": { "filter": filter } } })
}

#[async_trait]
impl TelemetryBackend for ElasticsearchBackend {
    async fn has_match(&self, query: &Query) -> Result<bool, BackendError> {
        let url = self.count_url(&query.dataset)?;

        let mut request = self.client.post(url.clone()).json(&query_body(query));
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request.send().await.context(RequestSnafu { url: url.as_str() })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let CountResponse { count } = response
            .json()
            .await
            .context(RequestSnafu { url: url.as_str() })?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(endpoint: &str) -> ElasticsearchBackend {
        ElasticsearchBackend::new(&ElasticsearchConfig {
            endpoint: Some(Url::parse(endpoint).unwrap()),
            username: Some("elastic".into()),
            password: Some("changeme".into()),
            insecure_skip_verify: true,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn maps_terms_to_filters() {
        let query = Query::events()
            .equals("event.dataset", "flow")
            .contains("message", "hello world");

        assert_eq!(
            query_body(&query),
            json!({
                "query": { "bool": { "filter": [
                    { "term": { "event.dataset": "flow" } },
                    { "match_phrase": { "message": "hello world" } },
                ] } }
            })
        );
    }

    #[test]
    fn builds_count_urls_below_the_endpoint_path() {
        assert_eq!(
            backend("https://es.local:9200").count_url("*beat*").unwrap().as_str(),
            "https://es.local:9200/*beat*/_count"
        );
        assert_eq!(
            backend("https://proxy.local/es")
                .count_url(".monitoring-*")
                .unwrap()
                .as_str(),
            "https://proxy.local/es/.monitoring-*/_count"
        );
    }

    #[test]
    fn requires_an_endpoint() {
        assert!(matches!(
            ElasticsearchBackend::new(&ElasticsearchConfig::default()),
            Err(BackendError::MissingEndpoint)
        ));
    }
}
