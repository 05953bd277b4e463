//! JSON-over-HTTP backend client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Backend, BackendError, BackendResult, MutationOutcome, RemoteTotals};
use crate::models::{
    minor_from_decimal, DayCloseSnapshot, MoneyTable, OutgoingMutation, VersionedEntity,
    VersionedWrite, VersionedWriteResult,
};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const HEALTH_TIMEOUT_SECS: u64 = 3;

#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    terminal_id: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("terminal_id", &self.terminal_id)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        terminal_id: impl Into<String>,
        api_token: Option<String>,
        request_timeout: Duration,
    ) -> BackendResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            terminal_id: terminal_id.into(),
            api_token: normalize_text_option(api_token),
            client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()?,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("Accept", "application/json");
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn terminal_path(terminal_id: &str, suffix: &str) -> String {
        format!("/v1/terminals/{terminal_id}{suffix}")
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(parse_api_error(status, &body)));
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|error| {
            BackendError::InvalidPayload(format!("{error}: {}", compact_text(&body)))
        })
    }
}

#[derive(Serialize)]
struct PushRequest<'a> {
    mutations: &'a [OutgoingMutation],
}

#[derive(Deserialize)]
struct PushResponse {
    results: Vec<MutationOutcome>,
}

#[derive(Deserialize)]
struct RejectedWriteBody {
    entity: VersionedEntity,
}

#[derive(Deserialize)]
struct TotalsResponse {
    count: u64,
    /// Decimal currency amount
    total: f64,
}

impl TryFrom<TotalsResponse> for RemoteTotals {
    type Error = BackendError;

    fn try_from(value: TotalsResponse) -> Result<Self, Self::Error> {
        let total_minor = minor_from_decimal(value.total).ok_or_else(|| {
            BackendError::InvalidPayload(format!("unusable total amount {}", value.total))
        })?;
        Ok(Self {
            count: value.count,
            total_minor,
        })
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    close_id: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl Backend for HttpBackend {
    async fn is_reachable(&self) -> bool {
        let response = self
            .request(Method::GET, "/v1/health")
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await;
        match response {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!("Backend health probe failed: {error}");
                false
            }
        }
    }

    async fn push_mutations(
        &self,
        mutations: &[OutgoingMutation],
    ) -> BackendResult<Vec<MutationOutcome>> {
        let path = Self::terminal_path(&self.terminal_id, "/mutations");
        let response = self
            .request(Method::POST, &path)
            .json(&PushRequest { mutations })
            .send()
            .await?;
        let payload: PushResponse = Self::read_json(response).await?;
        Ok(payload.results)
    }

    async fn fetch_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> BackendResult<Option<VersionedEntity>> {
        let response = self
            .request(Method::GET, &format!("/v1/entities/{entity_type}/{entity_id}"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json(response).await.map(Some)
    }

    async fn write_versioned(&self, write: &VersionedWrite) -> BackendResult<VersionedWriteResult> {
        let path = format!(
            "/v1/entities/{}/{}/write",
            write.entity_type, write.entity_id
        );
        let response = self.request(Method::POST, &path).json(write).send().await?;
        if response.status() == StatusCode::CONFLICT {
            let body: RejectedWriteBody = serde_json::from_str(&response.text().await?)
                .map_err(|error| BackendError::InvalidPayload(error.to_string()))?;
            return Ok(VersionedWriteResult::Rejected(body.entity));
        }
        Self::read_json(response).await
    }

    async fn remote_totals(
        &self,
        terminal_id: &str,
        table: MoneyTable,
        business_date: NaiveDate,
    ) -> BackendResult<RemoteTotals> {
        let response = self
            .request(Method::GET, &Self::terminal_path(terminal_id, "/totals"))
            .query(&[
                ("table", table.table_name().to_string()),
                ("date", business_date.to_string()),
            ])
            .send()
            .await?;
        let totals: TotalsResponse = Self::read_json(response).await?;
        RemoteTotals::try_from(totals)
    }

    async fn submit_snapshot(&self, snapshot: &DayCloseSnapshot) -> BackendResult<String> {
        let path = Self::terminal_path(&snapshot.terminal_id, "/day-close");
        let response = self
            .request(Method::POST, &path)
            .json(snapshot)
            .send()
            .await?;
        let payload: SubmitResponse = Self::read_json(response).await?;
        payload
            .close_id
            .or(payload.id)
            .and_then(|id| normalize_text_option(Some(id)))
            .ok_or_else(|| {
                BackendError::InvalidPayload("response did not include close_id/id".to_string())
            })
    }

    async fn fetch_terminal_snapshot(
        &self,
        terminal_id: &str,
        business_date: NaiveDate,
    ) -> BackendResult<Option<DayCloseSnapshot>> {
        let path = Self::terminal_path(terminal_id, &format!("/day-close/{business_date}"));
        let response = self.request(Method::GET, &path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json(response).await.map(Some)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> BackendResult<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| BackendError::Unreachable("backend URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(BackendError::Unreachable(
            "backend URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MutationStatus;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("pos.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://pos.example.com/ ".to_string()).unwrap(),
            "https://pos.example.com"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let backend = HttpBackend::new(
            "https://pos.example.com",
            "T1",
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{backend:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::UNPROCESSABLE_ENTITY, r#"{"message":"date already closed"}"#),
            "date already closed (422)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
        assert_eq!(
            parse_api_error(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            "boom (500)"
        );
    }

    #[test]
    fn remote_totals_round_decimal_amounts() {
        let totals = RemoteTotals::try_from(TotalsResponse {
            count: 3,
            total: 30.000_000_1,
        })
        .unwrap();
        assert_eq!(totals.count, 3);
        assert_eq!(totals.total_minor, 3000);
    }

    #[test]
    fn remote_totals_reject_non_finite_amounts() {
        for total in [f64::NAN, f64::INFINITY, 1e300] {
            let result = RemoteTotals::try_from(TotalsResponse { count: 1, total });
            assert!(
                matches!(result, Err(BackendError::InvalidPayload(_))),
                "{total} was accepted"
            );
        }
    }

    #[test]
    fn push_response_reads_tagged_outcomes() {
        let payload: PushResponse = serde_json::from_str(
            r#"{"results":[
                {"queue_id":1,"status":"accepted","remote_id":"r-1"},
                {"queue_id":2,"status":"failed","message":"duplicate"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(payload.results.len(), 2);
        assert_eq!(
            payload.results[1].status,
            MutationStatus::Failed {
                message: "duplicate".to_string()
            }
        );
    }
}
