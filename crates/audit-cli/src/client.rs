use anyhow::{bail, Context, Result};
use audit_core::{ExportFormat, HistoryFilter};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest<'a> {
    pub operation_type: &'a str,
    pub payload: Value,
    pub actor_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<&'a str>,
}

/// Thin wrapper over the node's HTTP routes.
pub struct NodeClient {
    http: reqwest::Client,
    base: String,
}

pub struct Download {
    pub filename: Option<String>,
    pub body: Vec<u8>,
}

impl NodeClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn log(&self, req: &OperationRequest<'_>) -> Result<Value> {
        let res = self.http.post(self.url("/operations")).json(req).send().await?;
        // Rejections come back as a receipt with success=false.
        if res.status() == StatusCode::BAD_REQUEST {
            return Ok(res.json().await?);
        }
        json_body(res).await
    }

    pub async fn history(&self, filter: &HistoryFilter) -> Result<Value> {
        let res = self.http.get(self.url("/operations")).query(filter).send().await?;
        json_body(res).await
    }

    pub async fn verify(&self, id: &str) -> Result<Value> {
        let res = self.http.get(self.url(&format!("/operations/{id}/verify"))).send().await?;
        json_body(res).await
    }

    pub async fn stats(&self) -> Result<Value> {
        json_body(self.http.get(self.url("/stats")).send().await?).await
    }

    pub async fn validate(&self) -> Result<Value> {
        json_body(self.http.get(self.url("/chain/validate")).send().await?).await
    }

    pub async fn seal(&self, wait: bool) -> Result<Value> {
        let res = self
            .http
            .post(self.url("/seal"))
            .query(&[("wait", wait)])
            .send()
            .await?;
        json_body(res).await
    }

    pub async fn export(&self, format: ExportFormat) -> Result<Download> {
        let res = self
            .http
            .get(self.url("/export"))
            .query(&[("format", format.extension())])
            .send()
            .await?;
        let res = check(res).await?;
        let filename = res
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_filename);
        let body = res.bytes().await?.to_vec();
        Ok(Download { filename, body })
    }
}

async fn check(res: Response) -> Result<Response> {
    let status = res.status();
    debug!(%status, url = %res.url(), "node responded");
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        bail!("node returned {status}: {body}");
    }
    Ok(res)
}

async fn json_body(res: Response) -> Result<Value> {
    check(res)
        .await?
        .json()
        .await
        .context("decoding node response")
}

/// Pull `name` out of `attachment; filename="name"`.
pub fn attachment_filename(disposition: &str) -> Option<String> {
    disposition
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty() && !name.contains(['/', '\\']))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_taken_from_disposition() {
        assert_eq!(
            attachment_filename("attachment; filename=\"audit-ledger-17.csv\"").as_deref(),
            Some("audit-ledger-17.csv")
        );
        assert_eq!(attachment_filename("inline"), None);
        assert_eq!(attachment_filename("attachment; filename=\"../etc/passwd\""), None);
    }

    #[test]
    fn trailing_slash_is_dropped() {
        let client = NodeClient::new("http://127.0.0.1:8080/");
        assert_eq!(client.url("/stats"), "http://127.0.0.1:8080/stats");
    }
}
