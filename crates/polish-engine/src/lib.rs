//! Chat-completion backends for the card deck: builds provider requests
//! from composed prompts, streams the responses through the decoders in
//! [`stream`], and reports provider failures with the provider's own
//! error message when it supplies one.

use std::io::Read;

use polish_contracts::cards::Workbench;
use polish_contracts::errors::WorkbenchError;
use polish_contracts::settings::{Settings, SystemMessage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};
use thiserror::Error;

pub mod events;
pub mod stream;

pub use events::{SessionEvent, SessionLog};
pub use stream::{GeminiDecoder, SseDecoder, StreamDecoder};

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Configuration, transport, or non-2xx failure for a provider. The
    /// message comes from the provider's JSON error envelope when present.
    #[error("{provider}: {message}")]
    Provider { provider: String, message: String },
    #[error("unsupported model key '{0}'")]
    UnknownModel(String),
    #[error(transparent)]
    Compose(#[from] WorkbenchError),
}

/// Receives text deltas as they decode, in emission order.
pub trait DeltaSink {
    fn delta(&mut self, text: &str);
}

impl<F: FnMut(&str)> DeltaSink for F {
    fn delta(&mut self, text: &str) {
        self(text)
    }
}

#[derive(Debug, Clone, Copy)]
enum AuthStyle {
    Bearer,
    /// Tongyi sends the key as the raw `Authorization` value.
    RawKey,
}

/// One configured client for all providers. Owns the settings and an
/// HTTP client; decoders are created per request.
pub struct ChatService {
    settings: Settings,
    http: HttpClient,
    log: Option<SessionLog>,
}

impl ChatService {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            http: HttpClient::new(),
            log: None,
        }
    }

    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Sends `message` to the backend selected by `model_key`, pushing
    /// every decoded delta into `sink`. Returns the full accumulated text.
    /// Text already sunk stays with the caller even when the stream fails
    /// partway.
    pub fn call_model(
        &self,
        model_key: &str,
        message: &str,
        sink: &mut dyn DeltaSink,
    ) -> Result<String, SubmitError> {
        self.record(SessionEvent::SubmissionStarted {
            model_key: model_key.to_string(),
        });
        let result = self.dispatch(model_key, message, sink);
        match &result {
            Ok(text) => self.record(SessionEvent::SubmissionCompleted {
                model_key: model_key.to_string(),
                chars: text.chars().count(),
            }),
            Err(err) => self.record(SessionEvent::SubmissionFailed {
                model_key: model_key.to_string(),
                error: err.to_string(),
            }),
        }
        result
    }

    fn dispatch(
        &self,
        model_key: &str,
        message: &str,
        sink: &mut dyn DeltaSink,
    ) -> Result<String, SubmitError> {
        match model_key {
            "tongyi" => {
                let cfg = &self.settings.models.tongyi;
                ensure_ready("tongyi", cfg.enabled, &cfg.api_key)?;
                self.stream_openai_compatible(
                    "tongyi",
                    &cfg.base_url,
                    &cfg.model,
                    &cfg.api_key,
                    AuthStyle::RawKey,
                    message,
                    sink,
                )
            }
            "deepseek-v3" | "deepseek-r1" => {
                let cfg = &self.settings.models.deepseek;
                ensure_ready("deepseek", cfg.enabled, &cfg.api_key)?;
                let model = if model_key == "deepseek-r1" {
                    &cfg.models.r1
                } else {
                    &cfg.models.v3
                };
                let endpoint =
                    format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
                self.stream_openai_compatible(
                    "deepseek",
                    &endpoint,
                    model,
                    &cfg.api_key,
                    AuthStyle::Bearer,
                    message,
                    sink,
                )
            }
            "openai" => {
                let cfg = &self.settings.models.openai;
                ensure_ready("openai", cfg.enabled, &cfg.api_key)?;
                self.stream_openai_compatible(
                    "openai",
                    &cfg.base_url,
                    &cfg.model,
                    &cfg.api_key,
                    AuthStyle::Bearer,
                    message,
                    sink,
                )
            }
            "gemini" => self.stream_gemini(message, sink),
            "custom" => {
                let cfg = &self.settings.models.custom;
                ensure_ready("custom", cfg.enabled, &cfg.api_key)?;
                if cfg.base_url.trim().is_empty() || cfg.model.trim().is_empty() {
                    return Err(SubmitError::Provider {
                        provider: "custom".to_string(),
                        message: "custom model configuration is incomplete".to_string(),
                    });
                }
                self.stream_openai_compatible(
                    "custom",
                    &cfg.base_url,
                    &cfg.model,
                    &cfg.api_key,
                    AuthStyle::Bearer,
                    message,
                    sink,
                )
            }
            other => Err(SubmitError::UnknownModel(other.to_string())),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn stream_openai_compatible(
        &self,
        provider: &str,
        endpoint: &str,
        model: &str,
        api_key: &str,
        auth: AuthStyle,
        message: &str,
        sink: &mut dyn DeltaSink,
    ) -> Result<String, SubmitError> {
        let payload = openai_chat_payload(model, &self.settings.system_message, message);
        let request = self.http.post(endpoint).json(&payload);
        let request = match auth {
            AuthStyle::Bearer => request.bearer_auth(api_key),
            AuthStyle::RawKey => request.header(AUTHORIZATION, api_key),
        };
        let response = request
            .send()
            .map_err(|err| transport_failure(provider, &err))?;
        if !response.status().is_success() {
            return Err(response_failure(provider, response));
        }
        let mut decoder = SseDecoder::new();
        self.pump(provider, response, &mut decoder, sink)
    }

    fn stream_gemini(
        &self,
        message: &str,
        sink: &mut dyn DeltaSink,
    ) -> Result<String, SubmitError> {
        let cfg = &self.settings.models.gemini;
        ensure_ready("gemini", cfg.enabled, &cfg.api_key)?;
        let endpoint = gemini_endpoint(&cfg.base_url, &cfg.model, &cfg.api_key);
        let payload = gemini_generate_payload(&self.settings.system_message.content, message);
        let response = self
            .http
            .post(&endpoint)
            .json(&payload)
            .send()
            .map_err(|err| transport_failure("gemini", &err))?;
        if !response.status().is_success() {
            return Err(response_failure("gemini", response));
        }
        let mut decoder = GeminiDecoder::new();
        self.pump("gemini", response, &mut decoder, sink)
    }

    /// Reads the response body chunkwise, feeding the decoder and sinking
    /// each delta as it arrives.
    fn pump(
        &self,
        provider: &str,
        mut response: HttpResponse,
        decoder: &mut dyn StreamDecoder,
        sink: &mut dyn DeltaSink,
    ) -> Result<String, SubmitError> {
        let mut chunk = [0u8; 8192];
        let mut full = String::new();
        loop {
            let read = response.read(&mut chunk).map_err(|err| SubmitError::Provider {
                provider: provider.to_string(),
                message: format!("stream read failed: {err}"),
            })?;
            if read == 0 {
                break;
            }
            for delta in decoder.feed(&chunk[..read]) {
                sink.delta(&delta);
                full.push_str(&delta);
            }
        }
        for delta in decoder.finish() {
            sink.delta(&delta);
            full.push_str(&delta);
        }
        if decoder.malformed_events() > 0 {
            self.record(SessionEvent::MalformedFragments {
                provider: provider.to_string(),
                count: decoder.malformed_events(),
            });
        }
        Ok(full)
    }

    fn record(&self, event: SessionEvent) {
        if let Some(log) = &self.log {
            let _ = log.record(&event);
        }
    }
}

/// Composes a template's prompt and sends it to the selected backend.
/// Fails with `MissingBinding` before any request leaves when a
/// placeholder is still unwired.
pub fn submit(
    workbench: &Workbench,
    template_id: &str,
    service: &ChatService,
    model_key: &str,
    sink: &mut dyn DeltaSink,
) -> Result<String, SubmitError> {
    let prompt = workbench.render_prompt(template_id)?;
    service.call_model(model_key, &prompt, sink)
}

fn ensure_ready(provider: &str, enabled: bool, api_key: &str) -> Result<(), SubmitError> {
    if !enabled {
        return Err(SubmitError::Provider {
            provider: provider.to_string(),
            message: "provider is disabled; enable it and configure an API key in settings"
                .to_string(),
        });
    }
    if api_key.trim().is_empty() {
        return Err(SubmitError::Provider {
            provider: provider.to_string(),
            message: "API key is not configured".to_string(),
        });
    }
    Ok(())
}

pub fn openai_chat_payload(model: &str, system: &SystemMessage, message: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": system.role, "content": system.content },
            { "role": "user", "content": message },
        ],
        "stream": true,
    })
}

pub fn gemini_generate_payload(system_content: &str, message: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": format!("{system_content}\n\n{message}") }],
        }],
        "generationConfig": {
            "temperature": 0.7,
            "topK": 40,
            "topP": 0.95,
            "maxOutputTokens": 8192,
        },
    })
}

pub fn gemini_endpoint(base_url: &str, model: &str, api_key: &str) -> String {
    format!(
        "{}/{model}:streamGenerateContent?key={api_key}",
        base_url.trim_end_matches('/')
    )
}

fn transport_failure(provider: &str, err: &reqwest::Error) -> SubmitError {
    SubmitError::Provider {
        provider: provider.to_string(),
        message: format!("request failed: {err}"),
    }
}

fn response_failure(provider: &str, response: HttpResponse) -> SubmitError {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .as_ref()
        .and_then(provider_error_message)
        .unwrap_or_else(|| format!("request failed ({status})"));
    SubmitError::Provider {
        provider: provider.to_string(),
        message,
    }
}

/// The provider's error envelope message: `error.message` with a fallback
/// to a top-level `message`.
fn provider_error_message(payload: &Value) -> Option<String> {
    payload
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .or_else(|| payload.get("message").and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use polish_contracts::errors::MissingBinding;

    use super::*;

    #[test]
    fn openai_payload_carries_system_then_user_messages() {
        let system = SystemMessage::default();
        let payload = openai_chat_payload("gpt-3.5-turbo", &system, "Polish this.");

        assert_eq!(payload["model"], json!("gpt-3.5-turbo"));
        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["messages"][0]["role"], json!("system"));
        assert_eq!(payload["messages"][1]["role"], json!("user"));
        assert_eq!(payload["messages"][1]["content"], json!("Polish this."));
    }

    #[test]
    fn gemini_payload_folds_the_system_prompt_into_the_user_text() {
        let payload = gemini_generate_payload("Be terse.", "Polish this.");
        assert_eq!(
            payload["contents"][0]["parts"][0]["text"],
            json!("Be terse.\n\nPolish this.")
        );
        assert_eq!(payload["generationConfig"]["temperature"], json!(0.7));
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], json!(8192));
    }

    #[test]
    fn gemini_endpoint_targets_stream_generate_content() {
        let endpoint = gemini_endpoint(
            "https://generativelanguage.googleapis.com/v1beta/models/",
            "gemini-pro",
            "key-123",
        );
        assert_eq!(
            endpoint,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:streamGenerateContent?key=key-123"
        );
    }

    #[test]
    fn error_envelope_message_prefers_nested_error_message() {
        assert_eq!(
            provider_error_message(&json!({"error": {"message": "quota exceeded"}})),
            Some("quota exceeded".to_string())
        );
        assert_eq!(
            provider_error_message(&json!({"message": "bad key"})),
            Some("bad key".to_string())
        );
        assert_eq!(provider_error_message(&json!({"code": 500})), None);
    }

    #[test]
    fn disabled_providers_fail_before_any_request() {
        let service = ChatService::new(Settings::default());
        let mut collected: Vec<String> = Vec::new();
        let mut sink = |delta: &str| collected.push(delta.to_string());

        let err = service
            .call_model("openai", "hello", &mut sink)
            .unwrap_err();
        match err {
            SubmitError::Provider { provider, message } => {
                assert_eq!(provider, "openai");
                assert!(message.contains("disabled"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(collected.is_empty());
    }

    #[test]
    fn missing_api_key_is_reported_as_a_provider_error() {
        let mut settings = Settings::default();
        settings.models.gemini.enabled = true;
        let service = ChatService::new(settings);
        let mut sink = |_: &str| {};

        let err = service.call_model("gemini", "hello", &mut sink).unwrap_err();
        match err {
            SubmitError::Provider { provider, message } => {
                assert_eq!(provider, "gemini");
                assert!(message.contains("API key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn incomplete_custom_configuration_is_rejected() {
        let mut settings = Settings::default();
        settings.models.custom.enabled = true;
        settings.models.custom.api_key = "key".to_string();
        let service = ChatService::new(settings);
        let mut sink = |_: &str| {};

        let err = service.call_model("custom", "hello", &mut sink).unwrap_err();
        match err {
            SubmitError::Provider { message, .. } => {
                assert!(message.contains("incomplete"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_model_keys_are_rejected() {
        let service = ChatService::new(Settings::default());
        let mut sink = |_: &str| {};
        let err = service.call_model("claude", "hello", &mut sink).unwrap_err();
        assert!(matches!(err, SubmitError::UnknownModel(key) if key == "claude"));
    }

    #[test]
    fn submit_fails_with_missing_binding_before_any_request() {
        let mut bench = Workbench::new();
        let template = bench.add_template("Edit", "Fix {{draft}} for {{reader}}");
        let service = ChatService::new(Settings::default());
        let mut sink = |_: &str| {};

        let err = submit(&bench, &template, &service, "openai", &mut sink).unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Compose(WorkbenchError::MissingBinding(MissingBinding { placeholders }))
                if placeholders == ["draft", "reader"]
        ));
    }

    #[test]
    fn failed_submissions_are_recorded_in_the_session_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.jsonl");
        let log = SessionLog::new(&path, "session-t");
        let service = ChatService::new(Settings::default()).with_log(log);
        let mut sink = |_: &str| {};

        let _ = service.call_model("openai", "hello", &mut sink);

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        let types: Vec<&str> = lines
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(types, ["submission_started", "submission_failed"]);
        assert_eq!(lines[0]["model_key"], json!("openai"));
        assert_eq!(lines[1]["session_id"], json!("session-t"));
        assert!(lines[1]["error"].as_str().is_some());
        Ok(())
    }
}
