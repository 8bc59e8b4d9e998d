//! Online HTML validation against the Nu HTML Checker.

use super::{MarkupMessage, MarkupValidator, MessageKind, ToolError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Posts documents to a Nu checker instance (`?out=json`).
#[derive(Debug, Clone)]
pub struct W3cValidator {
    endpoint: String,
    client: reqwest::Client,
}

impl W3cValidator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    fn address(&self) -> Option<(String, u16)> {
        let url = reqwest::Url::parse(&self.endpoint).ok()?;
        Some((url.host_str()?.to_string(), url.port_or_known_default()?))
    }
}

#[derive(Debug, Deserialize)]
struct NuResponse {
    #[serde(default)]
    messages: Vec<NuMessage>,
}

#[derive(Debug, Deserialize)]
struct NuMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "subType", default)]
    sub_type: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(rename = "lastLine", default)]
    last_line: Option<u64>,
}

impl From<NuMessage> for MarkupMessage {
    fn from(m: NuMessage) -> Self {
        let kind = match (m.kind.as_str(), m.sub_type.as_deref()) {
            ("error", _) | ("non-document-error", _) | (_, Some("fatal")) => MessageKind::Error,
            ("info", Some("warning")) => MessageKind::Warning,
            _ => MessageKind::Info,
        };
        MarkupMessage {
            kind,
            message: m.message,
            line: m.last_line,
        }
    }
}

fn parse_messages(body: &str) -> Result<Vec<MarkupMessage>, serde_json::Error> {
    let response: NuResponse = serde_json::from_str(body)?;
    Ok(response.messages.into_iter().map(Into::into).collect())
}

#[async_trait]
impl MarkupValidator for W3cValidator {
    async fn is_available(&self) -> bool {
        let Some((host, port)) = self.address() else {
            return false;
        };
        matches!(
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port))).await,
            Ok(Ok(_))
        )
    }

    async fn validate(&self, name: &str, html: &str) -> Result<Vec<MarkupMessage>, ToolError> {
        tracing::debug!(file = name, endpoint = %self.endpoint, "validating markup");
        let body = self
            .client
            .post(&self.endpoint)
            .query(&[("out", "json")])
            .header(reqwest::header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header(reqwest::header::USER_AGENT, concat!("drudge/", env!("CARGO_PKG_VERSION")))
            .body(html.to_string())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_messages(&body).map_err(|e| ToolError::Render {
            path: name.to_string(),
            message: format!("unreadable validator response: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nu_messages() {
        let body = r#"{"messages":[
            {"type":"error","message":"Stray end tag","lastLine":4},
            {"type":"info","subType":"warning","message":"Consider lang"},
            {"type":"info","message":"Trailing slash"}
        ]}"#;
        let messages = parse_messages(body).unwrap();
        assert_eq!(
            messages.iter().map(|m| m.kind).collect::<Vec<_>>(),
            vec![MessageKind::Error, MessageKind::Warning, MessageKind::Info]
        );
        assert_eq!(messages[0].line, Some(4));
        assert_eq!(messages[1].message, "Consider lang");
    }

    #[test]
    fn empty_response_has_no_messages() {
        assert!(parse_messages("{}").unwrap().is_empty());
    }

    #[test]
    fn address_from_endpoint() {
        let v = W3cValidator::new("https://validator.w3.org/nu/");
        assert_eq!(v.address(), Some(("validator.w3.org".to_string(), 443)));
        assert_eq!(W3cValidator::new("not a url").address(), None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        // Port 9 on localhost is expected to refuse connections.
        let v = W3cValidator::new("http://127.0.0.1:9/");
        assert!(!v.is_available().await);
    }
}
