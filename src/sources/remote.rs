//! Remote reports API client.
//!
//! In remote mode problem reports and bugs come from tabular analytics
//! reports instead of pasted exports. Each report is described once to learn
//! its column labels, then run with details; the `T!T` fact-map rows are
//! mapped through the same field aliases the file readers use.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::format::{canonical_field, unique_rows, FieldAliases, FieldRow};
use super::incidents::{bug_from_row, prb_from_row, BUG_FIELDS, PRB_FIELDS};
use super::{ParseOutcome, ParseWarning};
use crate::model::{BugRecord, ProblemReport};

/// Default analytics API version.
pub const DEFAULT_API_VERSION: &str = "v58.0";

/// Fact-map key of a tabular report's detail rows.
const TABULAR_FACT_KEY: &str = "T!T";

/// Errors from the remote reports API. Fatal in remote mode.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// No session credential was provided.
    #[error("No session credential: ${env_var} is not set")]
    MissingSession { env_var: String },

    /// The API rejected the session.
    #[error("Authentication failed with status {status}")]
    AuthenticationFailed { status: u16 },

    /// The report id does not exist or is not visible to the session.
    #[error("Report {report_id} not found")]
    ReportNotFound { report_id: String },

    /// Any other non-success status.
    #[error("Reports API returned {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The request exceeded the configured timeout.
    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The body could not be understood.
    #[error("Malformed report response: {0}")]
    MalformedResponse(String),
}

impl RemoteError {
    /// Operator-facing fix for the failure.
    #[must_use]
    pub fn remediation(&self) -> String {
        match self {
            Self::MissingSession { env_var } => format!(
                "Export a valid session id in ${env_var} (or use `--source local` with exported files)"
            ),
            Self::AuthenticationFailed { .. } => {
                "The session has expired; log in again and refresh the session id".to_string()
            }
            Self::ReportNotFound { .. } => {
                "Check `remote.prb_report_id` / `remote.bug_report_id` in the configuration".to_string()
            }
            Self::Http { .. } | Self::MalformedResponse(_) => {
                "Retry later or fall back to `--source local` with exported files".to_string()
            }
            Self::Network(_) | Self::Timeout { .. } => {
                "Check connectivity to the reports instance or raise `remote.timeout_secs`".to_string()
            }
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    #[serde(rename = "reportMetadata")]
    report_metadata: ReportMetadata,
    #[serde(rename = "reportExtendedMetadata", default)]
    extended: Option<ExtendedMetadata>,
}

#[derive(Debug, Deserialize)]
struct ReportMetadata {
    #[serde(rename = "detailColumns", default)]
    detail_columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExtendedMetadata {
    #[serde(rename = "detailColumnInfo", default)]
    detail_column_info: HashMap<String, ColumnInfo>,
}

#[derive(Debug, Deserialize)]
struct ColumnInfo {
    #[serde(default)]
    label: String,
}

#[derive(Debug, Deserialize)]
struct ReportResponse {
    #[serde(rename = "factMap", default)]
    fact_map: HashMap<String, FactMapEntry>,
}

#[derive(Debug, Deserialize)]
struct FactMapEntry {
    #[serde(default)]
    rows: Vec<ReportRow>,
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    #[serde(rename = "dataCells", default)]
    data_cells: Vec<DataCell>,
}

#[derive(Debug, Deserialize)]
struct DataCell {
    #[serde(default)]
    label: Value,
    #[serde(default)]
    value: Value,
}

impl DataCell {
    fn text(&self) -> String {
        fn as_text(v: &Value) -> Option<String> {
            match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            }
        }
        as_text(&self.label)
            .or_else(|| as_text(&self.value))
            .unwrap_or_default()
    }
}

// ============================================================================
// Client
// ============================================================================

/// Client for the analytics reports endpoints.
pub struct RemoteReportsClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    session_id: String,
    timeout: Duration,
}

impl RemoteReportsClient {
    /// Build a client for `instance`. A bare host gets `https://`.
    pub fn new(
        instance: &str,
        api_version: &str,
        session_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("qreport/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let trimmed = instance.trim().trim_end_matches('/');
        let base_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        Ok(Self {
            http,
            base_url,
            api_version: api_version.to_string(),
            session_id: session_id.into(),
            timeout,
        })
    }

    fn report_url(&self, report_id: &str) -> String {
        format!(
            "{}/services/data/{}/analytics/reports/{report_id}",
            self.base_url, self.api_version
        )
    }

    fn map_send_error(&self, err: &reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            RemoteError::Network(err.to_string())
        }
    }

    async fn checked_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        report_id: &str,
    ) -> Result<T, RemoteError> {
        let response = request
            .bearer_auth(&self.session_id)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RemoteError::AuthenticationFailed {
                status: status.as_u16(),
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::ReportNotFound {
                report_id: report_id.to_string(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| self.map_send_error(&e))?;
        if !status.is_success() {
            return Err(RemoteError::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        serde_json::from_str(&body).map_err(|e| RemoteError::MalformedResponse(e.to_string()))
    }

    /// Column labels in detail-column order.
    async fn describe(&self, report_id: &str) -> Result<Vec<String>, RemoteError> {
        let url = format!("{}/describe", self.report_url(report_id));
        debug!("Describing report {}", report_id);
        let described: DescribeResponse = self.checked_json(self.http.get(&url), report_id).await?;

        let info = described.extended.map(|e| e.detail_column_info).unwrap_or_default();
        Ok(described
            .report_metadata
            .detail_columns
            .iter()
            .map(|api_name| {
                info.get(api_name)
                    .map(|c| c.label.clone())
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| {
                        api_name.rsplit('.').next().unwrap_or(api_name).to_string()
                    })
            })
            .collect())
    }

    /// Run `report_id` and map its rows through `aliases`.
    pub async fn fetch_rows(
        &self,
        report_id: &str,
        aliases: FieldAliases,
        id_field: &'static str,
    ) -> Result<ParseOutcome<FieldRow>, RemoteError> {
        let columns = self.describe(report_id).await?;
        let mapping: Vec<Option<&'static str>> =
            columns.iter().map(|c| canonical_field(c, aliases)).collect();

        let url = format!("{}?includeDetails=true", self.report_url(report_id));
        let report: ReportResponse = self.checked_json(self.http.post(&url), report_id).await?;
        let Some(entry) = report.fact_map.get(TABULAR_FACT_KEY) else {
            return Err(RemoteError::MalformedResponse(format!(
                "report {report_id} is not tabular (no `{TABULAR_FACT_KEY}` rows)"
            )));
        };

        let source = format!("report {report_id}");
        let mut warnings = Vec::new();
        let mut rows = Vec::new();
        for (index, raw) in entry.rows.iter().enumerate() {
            let mut row = FieldRow::new(index + 1);
            for (field, cell) in mapping.iter().zip(&raw.data_cells) {
                if let Some(field) = field {
                    row.insert(field, cell.text());
                }
            }
            if row.get(id_field).is_none() {
                warnings.push(ParseWarning::new(&source, index + 1, "missing identifier"));
                continue;
            }
            rows.push(row);
        }
        let rows = unique_rows(rows, id_field, &source, &mut warnings);
        info!("Fetched {} rows from report {}", rows.len(), report_id);
        Ok(ParseOutcome::new(rows, warnings))
    }

    /// Problem reports from `report_id`. Rows without a title are skipped.
    pub async fn fetch_problem_reports(
        &self,
        report_id: &str,
    ) -> Result<ParseOutcome<ProblemReport>, RemoteError> {
        let outcome = self.fetch_rows(report_id, PRB_FIELDS, "id").await?;
        Ok(require_title(outcome, report_id, prb_from_row))
    }

    /// Active bugs from `report_id`. Rows without a title are skipped.
    pub async fn fetch_bugs(&self, report_id: &str) -> Result<ParseOutcome<BugRecord>, RemoteError> {
        let outcome = self.fetch_rows(report_id, BUG_FIELDS, "id").await?;
        Ok(require_title(outcome, report_id, bug_from_row))
    }
}

fn require_title<T>(
    outcome: ParseOutcome<FieldRow>,
    report_id: &str,
    convert: fn(&FieldRow) -> T,
) -> ParseOutcome<T> {
    let ParseOutcome { records: rows, mut warnings } = outcome;
    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        if row.get("title").is_none() {
            warnings.push(ParseWarning::new(
                format!("report {report_id}"),
                row.line,
                format!("{} has no title", row.text("id")),
            ));
            continue;
        }
        records.push(convert(row));
    }
    ParseOutcome::new(records, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn describe_body() -> Value {
        json!({
            "reportMetadata": {
                "detailColumns": ["Problem.Name", "Problem.Subject", "Problem.Priority", "Problem.Status"]
            },
            "reportExtendedMetadata": {
                "detailColumnInfo": {
                    "Problem.Name": {"label": "PRB Number"},
                    "Problem.Subject": {"label": "Subject"},
                    "Problem.Priority": {"label": "Priority"}
                }
            }
        })
    }

    fn cell(label: &str) -> Value {
        json!({"label": label, "value": label})
    }

    async fn client_for(server: &MockServer) -> RemoteReportsClient {
        RemoteReportsClient::new(&server.uri(), DEFAULT_API_VERSION, "sess-123", Duration::from_secs(5))
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_problem_reports_maps_columns() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v58.0/analytics/reports/00O1/describe"))
            .and(header("authorization", "Bearer sess-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(describe_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/services/data/v58.0/analytics/reports/00O1"))
            .and(query_param("includeDetails", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "factMap": {
                    "T!T": {
                        "rows": [
                            {"dataCells": [cell("PRB-0000001"), cell("Replication lag"), cell("P1"), cell("Open")]},
                            {"dataCells": [cell("PRB-0000002"), cell(""), cell("P2"), cell("Open")]},
                            {"dataCells": [cell(""), cell("No id"), cell("P2"), cell("Open")]}
                        ]
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let outcome = client.fetch_problem_reports("00O1").await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.skipped(), 2);
        let prb = &outcome.records[0];
        assert_eq!(prb.id, "PRB-0000001");
        assert_eq!(prb.priority, Priority::P1);
        assert_eq!(prb.status, "Open");
    }

    #[tokio::test]
    async fn test_expired_session_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("INVALID_SESSION_ID"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.fetch_bugs("00O2").await.unwrap_err();
        assert!(matches!(err, RemoteError::AuthenticationFailed { status: 401 }));
        assert!(err.remediation().contains("session"));
    }

    #[tokio::test]
    async fn test_non_tabular_report_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(describe_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"factMap": {"0!T": {"rows": []}}})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.fetch_problem_reports("00O3").await.unwrap_err();
        assert!(matches!(err, RemoteError::MalformedResponse(_)));
    }

    #[test]
    fn test_bare_instance_gets_https() {
        let client =
            RemoteReportsClient::new("reports.example.com/", "v58.0", "s", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.report_url("00O9"),
            "https://reports.example.com/services/data/v58.0/analytics/reports/00O9"
        );
    }
}
