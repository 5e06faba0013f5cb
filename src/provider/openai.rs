//! OpenAI-compatible Chat Completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use crate::config::{EndpointConfig, DEFAULT_BASE_URL};
use crate::error::ScriptoriumError;
use crate::types::{ChatMessage, Role};

use super::http::{bearer_headers, build_client, status_to_error};
use super::{ByteStream, EndpointRequest, ModelEndpoint};

pub struct OpenAiEndpoint {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiEndpoint {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
    ) -> Result<Self, ScriptoriumError> {
        Ok(Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: build_client(Duration::from_secs(10))?,
        })
    }

    pub fn from_config(config: &EndpointConfig) -> Result<Self, ScriptoriumError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ScriptoriumError::Authentication(
                    "Missing SCRIPTORIUM_API_KEY or OPENAI_API_KEY".into(),
                )
            })?;
        let mut endpoint = Self::new(config.model.clone(), api_key, Some(config.base_url.clone()))?;
        endpoint.client = build_client(Duration::from_millis(config.connect_timeout_ms))?;
        Ok(endpoint)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request_body(&self, request: &EndpointRequest) -> serde_json::Value {
        let messages = request
            .messages
            .iter()
            .map(message_to_openai)
            .collect::<Vec<_>>();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        let Some(obj) = body.as_object_mut() else {
            return body;
        };

        let settings = &request.settings;
        if let Some(max) = settings.max_tokens {
            obj.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = settings.temperature {
            obj.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = settings.top_p {
            obj.insert("top_p".into(), top_p.into());
        }
        if let Some(ref user) = settings.user {
            obj.insert("user".into(), user.clone().into());
        }

        if !request.tools.is_empty() {
            let tool_defs: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            obj.insert("tools".into(), tool_defs.into());
            obj.insert(
                "tool_choice".into(),
                request.tool_choice.to_string().into(),
            );
            if let Some(parallel) = settings.parallel_tool_calls {
                obj.insert("parallel_tool_calls".into(), parallel.into());
            }
        }

        body
    }
}

#[async_trait]
impl ModelEndpoint for OpenAiEndpoint {
    fn name(&self) -> &str {
        "openai"
    }

    async fn open_stream(&self, request: &EndpointRequest) -> Result<ByteStream, ScriptoriumError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = self.model.as_str(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "OpenAI open_stream"
        );

        let resp = self
            .client
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(ScriptoriumError::Network))
            .boxed())
    }
}

fn message_to_openai(msg: &ChatMessage) -> serde_json::Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<serde_json::Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": if msg.content.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::Value::String(msg.content.clone())
                },
                "tool_calls": tool_calls,
            })
        }
        role => serde_json::json!({ "role": role.as_str(), "content": msg.content }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolDefinition;
    use crate::types::{GenerationSettings, ToolCallRecord, ToolChoice};

    fn endpoint() -> OpenAiEndpoint {
        OpenAiEndpoint::new("gpt-test", "sk-test", Some("http://localhost:9/v1/".into())).unwrap()
    }

    #[test]
    fn body_includes_tools_choice_and_streaming_flag() {
        let request = EndpointRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: vec![ToolDefinition {
                name: "read_content_list".into(),
                description: "List".into(),
                parameters: serde_json::json!({ "type": "object" }),
            }],
            tool_choice: ToolChoice::Auto,
            settings: GenerationSettings::builder()
                .temperature(0.2)
                .parallel_tool_calls(true)
                .build(),
        };
        let body = endpoint().build_request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["parallel_tool_calls"], true);
        assert_eq!(body["tools"][0]["function"]["name"], "read_content_list");
    }

    #[test]
    fn tool_messages_and_tool_calls_use_wire_shape() {
        let assistant = ChatMessage::assistant_with_tool_calls(
            "",
            vec![ToolCallRecord {
                id: "call_1".into(),
                name: "read_content".into(),
                arguments: serde_json::json!({ "content_id": "c1" }),
            }],
        );
        let wire = message_to_openai(&assistant);
        assert_eq!(wire["content"], serde_json::Value::Null);
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            r#"{"content_id":"c1"}"#
        );

        let tool = message_to_openai(&ChatMessage::tool_result("call_1", "{}"));
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        assert_eq!(endpoint().base_url, "http://localhost:9/v1");
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = EndpointConfig::default();
        assert!(matches!(
            OpenAiEndpoint::from_config(&config),
            Err(ScriptoriumError::Authentication(_))
        ));
    }
}
