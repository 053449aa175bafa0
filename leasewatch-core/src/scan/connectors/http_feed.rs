//! Connector for sources exposing a paginated JSON feed over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use leasewatch_model::{
    SourceDescriptor, SourceHealth, TenantId, TenantSelection, UpdateKind,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scan::connector::{
    CollectScope, CollectedItem, ConnectorContext, ConnectorError,
    ItemStream, SourceConnector,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpFeedConfig {
    pub descriptor: SourceDescriptor,
    /// Probed by `connect` and `status`. Falls back to `feed_url`.
    #[serde(default)]
    pub health_url: Option<String>,
    pub feed_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    items: Vec<FeedItem>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    kind: UpdateKind,
    message: String,
    #[serde(default)]
    tenant: Option<TenantId>,
    #[serde(default)]
    score_delta: Option<i32>,
    #[serde(default)]
    observed_at: Option<DateTime<Utc>>,
}

impl From<FeedItem> for CollectedItem {
    fn from(item: FeedItem) -> Self {
        CollectedItem {
            kind: item.kind,
            message: item.message,
            tenant: item.tenant,
            score_delta: item.score_delta,
            observed_at: item.observed_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFeedConnector {
    config: HttpFeedConfig,
    client: reqwest::Client,
}

impl HttpFeedConnector {
    pub fn new(config: HttpFeedConfig) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| {
                ConnectorError::Unavailable(format!(
                    "failed to build HTTP client: {e}"
                ))
            })?;
        Ok(Self { config, client })
    }

    fn health_url(&self) -> &str {
        self.config
            .health_url
            .as_deref()
            .unwrap_or(&self.config.feed_url)
    }

    fn request(&self, url: &str, budget: Duration) -> reqwest::RequestBuilder {
        let builder = self.client.get(url).timeout(budget);
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(
        &self,
        ctx: &ConnectorContext,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ConnectorError> {
        let response = tokio::select! {
            res = request.send() => res.map_err(map_transport)?,
            _ = ctx.cancelled() => return Err(ConnectorError::Cancelled),
        };
        match map_status(response.status()) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    async fn fetch_page(
        &self,
        ctx: &ConnectorContext,
        scope: &CollectScope,
        cursor: Option<&str>,
    ) -> Result<FeedPage, ConnectorError> {
        let mut query: Vec<(&str, String)> = vec![
            ("from", scope.date_range.from.to_rfc3339()),
            ("to", scope.date_range.to.to_rfc3339()),
        ];
        if scope.selection == TenantSelection::Custom
            && !scope.tenant_ids.is_empty()
        {
            let tenants: Vec<&str> =
                scope.tenant_ids.iter().map(|t| t.as_str()).collect();
            query.push(("tenants", tenants.join(",")));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let request = self
            .request(&self.config.feed_url, ctx.remaining())
            .query(&query);
        let response = self.send(ctx, request).await?;
        let body = tokio::select! {
            body = response.bytes() => body.map_err(map_transport)?,
            _ = ctx.cancelled() => return Err(ConnectorError::Cancelled),
        };
        serde_json::from_slice(&body)
            .map_err(|e| ConnectorError::Malformed(e.to_string()))
    }
}

/// Maps a non-success HTTP status to a connector error.
pub fn map_status(status: StatusCode) -> Option<ConnectorError> {
    if status.is_success() {
        return None;
    }
    let reason = format!("HTTP {status}");
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ConnectorError::Unauthorized(reason)
        }
        StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited(reason),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ConnectorError::Timeout(reason)
        }
        s if s.is_server_error() => ConnectorError::Unavailable(reason),
        _ => ConnectorError::Malformed(reason),
    })
}

fn map_transport(err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::Timeout(err.to_string())
    } else if err.is_decode() {
        ConnectorError::Malformed(err.to_string())
    } else {
        ConnectorError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl SourceConnector for HttpFeedConnector {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.config.descriptor
    }

    async fn connect(
        &self,
        ctx: &ConnectorContext,
    ) -> Result<(), ConnectorError> {
        let request = self.request(self.health_url(), ctx.remaining());
        self.send(ctx, request).await.map(|_| ())
    }

    async fn collect<'a>(
        &'a self,
        ctx: &'a ConnectorContext,
        scope: CollectScope,
    ) -> Result<ItemStream<'a>, ConnectorError> {
        let stream = async_stream::stream! {
            let mut cursor: Option<String> = None;
            let mut pages = 0usize;
            loop {
                let page = match self
                    .fetch_page(ctx, &scope, cursor.as_deref())
                    .await
                {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                pages += 1;
                for item in page.items {
                    if let Some(at) = item.observed_at
                        && !scope.date_range.contains(at)
                    {
                        continue;
                    }
                    let item = CollectedItem::from(item);
                    if scope.admits_tenant(item.tenant.as_ref()) {
                        yield Ok(item);
                    }
                }
                match page.next_cursor {
                    Some(next) if cursor.as_deref() != Some(next.as_str()) => {
                        cursor = Some(next);
                    }
                    _ => break,
                }
            }
            debug!(source = %ctx.source, pages, "feed exhausted");
        };
        Ok(stream.boxed())
    }

    async fn status(&self) -> SourceHealth {
        let budget = Duration::from_millis(self.config.request_timeout_ms);
        match self.request(self.health_url(), budget).send().await {
            Ok(response) => match map_status(response.status()) {
                None => SourceHealth::Healthy,
                Some(ConnectorError::RateLimited(reason)) => {
                    SourceHealth::Degraded { reason }
                }
                Some(err) => SourceHealth::Unreachable {
                    reason: err.to_string(),
                },
            },
            Err(err) => SourceHealth::Unreachable {
                reason: map_transport(err).to_string(),
            },
        }
    }
}
