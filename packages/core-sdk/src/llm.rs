use std::fmt;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;

use crate::config::{AiConfig, BackendPreference};
use crate::error::AiError;
use crate::models::{ChatMessage, Role};

/// Longest HTTP error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/**
 * \brief The two backend variants the chain can try.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/**
 * \brief Ordering policy: which backends to try, first to last.
 * \details remote → [remote, local]; local or unrecognized → [local] plus remote
 * only when an API key is configured.
 */
pub fn backend_order(config: &AiConfig) -> Vec<BackendKind> {
    match &config.preference {
        BackendPreference::Remote => vec![BackendKind::Remote, BackendKind::Local],
        BackendPreference::Local | BackendPreference::Unrecognized(_) => {
            let mut order = vec![BackendKind::Local];
            if config.has_remote_credential() {
                order.push(BackendKind::Remote);
            }
            order
        }
    }
}

/**
 * \brief Everything needed to call one backend, resolved for a single request.
 */
#[derive(Debug, Clone)]
pub struct Backend {
    pub kind: BackendKind,
    /** \brief chat-completions URL */
    pub endpoint: String,
    /** \brief Reachability probe URL; only the local backend has one. */
    pub probe_url: Option<String>,
    pub auth_token: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl Backend {
    fn resolve(kind: BackendKind, config: &AiConfig, options: &ChatOptions) -> Self {
        let timeout = options.timeout.unwrap_or(config.request_timeout);
        match kind {
            BackendKind::Local => {
                let base = config.local_base_url.trim_end_matches('/');
                Backend {
                    kind,
                    endpoint: format!("{}/v1/chat/completions", base),
                    probe_url: Some(format!("{}/v1/models", base)),
                    auth_token: None,
                    model: options
                        .model
                        .clone()
                        .unwrap_or_else(|| config.local_model.clone()),
                    timeout,
                }
            }
            BackendKind::Remote => Backend {
                kind,
                endpoint: config.remote_endpoint.clone(),
                probe_url: None,
                auth_token: config
                    .remote_api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty()),
                model: options
                    .model
                    .clone()
                    .unwrap_or_else(|| config.remote_model.clone()),
                timeout,
            },
        }
    }
}

/**
 * \brief Per-call options. Unset fields fall back to `AiConfig`.
 */
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /** \brief Prepended as the first system message. */
    pub system: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
}

impl ChatOptions {
    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            ..Default::default()
        }
    }
}

/**
 * \brief Reply text plus the backend that produced it.
 */
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub text: String,
    pub backend: BackendKind,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

/**
 * \brief Chat client over the ordered local/remote backend chain.
 * \details Holds one pooled HTTP client; cheap to share behind an `Arc`.
 */
#[derive(Debug, Clone)]
pub struct AiClient {
    http: reqwest::Client,
    config: AiConfig,
}

impl AiClient {
    pub fn new(config: AiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AiError::Request {
                backend: "client".to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    /**
     * \brief Backend descriptors in the order `chat` will try them.
     */
    pub fn backends(&self, options: &ChatOptions) -> Vec<Backend> {
        backend_order(&self.config)
            .into_iter()
            .map(|kind| Backend::resolve(kind, &self.config, options))
            .collect()
    }

    /**
     * \brief Send a chat request and return the reply text.
     * \param messages non-empty conversation; system messages must lead
     * \param options  system prompt and overrides
     */
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, AiError> {
        self.chat_detailed(messages, options)
            .await
            .map(|reply| reply.text)
    }

    /**
     * \brief Same as `chat`, also reporting which backend answered.
     */
    pub async fn chat_detailed(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatReply, AiError> {
        let payload = build_messages(messages, options.system.as_deref())?;
        let temperature = options.temperature.unwrap_or(self.config.temperature);

        let mut attempted = Vec::new();
        let mut last_error = None;
        for backend in self.backends(options) {
            attempted.push(backend.kind.name().to_string());
            tracing::info!(
                backend = %backend.kind,
                endpoint = %backend.endpoint,
                model = %backend.model,
                messages = payload.len(),
                "sending chat request"
            );
            match self.try_backend(&backend, &payload, temperature).await {
                Ok(text) => {
                    tracing::info!(backend = %backend.kind, chars = text.len(), "chat reply received");
                    return Ok(ChatReply {
                        text,
                        backend: backend.kind,
                    });
                }
                Err(e) => {
                    tracing::warn!(backend = %backend.kind, error = %e, "backend failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| AiError::InvalidRequest("no backend configured".to_string()));
        tracing::error!(attempted = ?attempted, error = %source, "all AI backends failed");
        Err(AiError::AllBackendsFailed {
            attempted,
            source: Box::new(source),
        })
    }

    /**
     * \brief Lightweight reachability check of the local server.
     * \details Uses `probe_timeout` only, never the request timeout.
     */
    pub async fn probe_local(&self) -> Result<(), AiError> {
        let backend = Backend::resolve(BackendKind::Local, &self.config, &ChatOptions::default());
        self.probe(&backend).await
    }

    async fn probe(&self, backend: &Backend) -> Result<(), AiError> {
        let Some(url) = backend.probe_url.as_deref() else {
            return Ok(());
        };
        let resp = self
            .http
            .get(url)
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(|e| AiError::Unreachable {
                backend: backend.kind.name().to_string(),
                endpoint: url.to_string(),
                reason: if e.is_timeout() {
                    format!(
                        "probe timed out after {}ms",
                        self.config.probe_timeout.as_millis()
                    )
                } else {
                    e.to_string()
                },
            })?;
        if !resp.status().is_success() {
            return Err(AiError::Unreachable {
                backend: backend.kind.name().to_string(),
                endpoint: url.to_string(),
                reason: format!("probe returned {}", resp.status()),
            });
        }
        Ok(())
    }

    async fn try_backend(
        &self,
        backend: &Backend,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, AiError> {
        let name = backend.kind.name();
        if backend.kind == BackendKind::Remote && backend.auth_token.is_none() {
            return Err(AiError::MissingCredential {
                backend: name.to_string(),
            });
        }
        self.probe(backend).await?;

        let body = ChatCompletionRequest {
            model: &backend.model,
            messages,
            temperature,
        };
        let mut request = self
            .http
            .post(&backend.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .timeout(backend.timeout)
            .json(&body);
        if let Some(token) = &backend.auth_token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| classify_send_error(backend, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AiError::Http {
                backend: name.to_string(),
                status: status.as_u16(),
                body: truncate(&text, MAX_ERROR_BODY),
            });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| classify_send_error(backend, e))?;
        let v: Value = serde_json::from_str(&text).map_err(|e| AiError::MalformedResponse {
            backend: name.to_string(),
            reason: format!("body is not JSON: {}", e),
        })?;
        extract_openai_content(backend.kind, &v)
    }
}

/**
 * \brief Prepend the system prompt and check ordering.
 */
fn build_messages(messages: &[ChatMessage], system: Option<&str>) -> Result<Vec<ChatMessage>, AiError> {
    if messages.is_empty() {
        return Err(AiError::InvalidRequest(
            "at least one message is required".to_string(),
        ));
    }
    let leading = messages
        .iter()
        .take_while(|m| m.role == Role::System)
        .count();
    if messages[leading..].iter().any(|m| m.role == Role::System) {
        return Err(AiError::InvalidRequest(
            "system messages must come before user and assistant messages".to_string(),
        ));
    }

    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(sys) = system.map(str::trim).filter(|s| !s.is_empty()) {
        out.push(ChatMessage::system(sys));
    }
    out.extend_from_slice(messages);
    Ok(out)
}

fn extract_openai_content(kind: BackendKind, v: &Value) -> Result<String, AiError> {
    let malformed = |reason: &str| AiError::MalformedResponse {
        backend: kind.name().to_string(),
        reason: reason.to_string(),
    };
    let choice = v
        .get("choices")
        .ok_or_else(|| malformed("missing `choices`"))?
        .get(0)
        .ok_or_else(|| malformed("`choices` is empty"))?;
    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| malformed("missing `choices[0].message.content`"))
}

fn classify_send_error(backend: &Backend, e: reqwest::Error) -> AiError {
    let name = backend.kind.name().to_string();
    if e.is_timeout() {
        AiError::Timeout {
            backend: name,
            timeout_ms: backend.timeout.as_millis(),
        }
    } else if e.is_connect() {
        AiError::Unreachable {
            backend: name,
            endpoint: backend.endpoint.clone(),
            reason: e.to_string(),
        }
    } else {
        AiError::Request {
            backend: name,
            reason: e.to_string(),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(preference: BackendPreference, key: Option<&str>) -> AiConfig {
        AiConfig {
            preference,
            remote_api_key: key.map(|k| k.to_string()),
            ..AiConfig::default()
        }
    }

    #[test]
    fn test_order_remote_preference() {
        let order = backend_order(&config(BackendPreference::Remote, None));
        assert_eq!(order, vec![BackendKind::Remote, BackendKind::Local]);
    }

    #[test]
    fn test_order_local_appends_remote_only_with_key() {
        assert_eq!(
            backend_order(&config(BackendPreference::Local, None)),
            vec![BackendKind::Local]
        );
        assert_eq!(
            backend_order(&config(BackendPreference::Local, Some(" "))),
            vec![BackendKind::Local]
        );
        assert_eq!(
            backend_order(&config(BackendPreference::Local, Some("sk-1"))),
            vec![BackendKind::Local, BackendKind::Remote]
        );
    }

    #[test]
    fn test_order_unrecognized_behaves_like_local() {
        let pref = BackendPreference::Unrecognized("gpu".into());
        assert_eq!(
            backend_order(&config(pref.clone(), None)),
            vec![BackendKind::Local]
        );
        assert_eq!(
            backend_order(&config(pref, Some("sk-1"))),
            vec![BackendKind::Local, BackendKind::Remote]
        );
    }

    #[test]
    fn test_backends_apply_overrides() {
        let client = AiClient::new(config(BackendPreference::Remote, Some("sk-1"))).expect("client");
        let opts = ChatOptions {
            model: Some("custom".into()),
            timeout: Some(Duration::from_secs(3)),
            ..Default::default()
        };
        let backends = client.backends(&opts);
        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0].kind, BackendKind::Remote);
        assert_eq!(backends[0].auth_token.as_deref(), Some("sk-1"));
        assert!(backends[0].probe_url.is_none());
        assert_eq!(backends[1].endpoint, "http://127.0.0.1:11434/v1/chat/completions");
        assert_eq!(backends[1].probe_url.as_deref(), Some("http://127.0.0.1:11434/v1/models"));
        assert!(backends.iter().all(|b| b.model == "custom"));
        assert!(backends.iter().all(|b| b.timeout == Duration::from_secs(3)));
    }

    #[test]
    fn test_build_messages_prepends_system() {
        let msgs = build_messages(&[ChatMessage::user("hi")], Some("be brief")).expect("build");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], ChatMessage::system("be brief"));
        assert_eq!(msgs[1], ChatMessage::user("hi"));
    }

    #[test]
    fn test_build_messages_rejects_empty_and_misplaced_system() {
        assert!(matches!(
            build_messages(&[], None),
            Err(AiError::InvalidRequest(_))
        ));
        let bad = [ChatMessage::user("hi"), ChatMessage::system("late")];
        assert!(matches!(
            build_messages(&bad, None),
            Err(AiError::InvalidRequest(_))
        ));
        let ok = [ChatMessage::system("rules"), ChatMessage::user("hi")];
        assert_eq!(build_messages(&ok, None).expect("leading system ok").len(), 2);
    }

    #[test]
    fn test_extract_openai_content() {
        let v = json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]});
        assert_eq!(extract_openai_content(BackendKind::Local, &v).expect("content"), "hello");

        for bad in [
            json!({}),
            json!({"choices": []}),
            json!({"choices": [{"message": {}}]}),
            json!({"choices": [{"message": {"content": null}}]}),
        ] {
            assert!(matches!(
                extract_openai_content(BackendKind::Remote, &bad),
                Err(AiError::MalformedResponse { .. })
            ));
        }
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("short", 10), "short");
        let t = truncate("ééééé", 3);
        assert_eq!(t, "é…");
    }
}
