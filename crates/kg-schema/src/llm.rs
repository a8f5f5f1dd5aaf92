//! LLM backends for the Stage A fallback chain (spec §4.3, §6 "LLM
//! endpoint"). Grounded on `codegraph_ai::openai_compatible_provider`: a
//! `reqwest::Client` built once with a request timeout, POSTing the
//! OpenAI-compatible chat-completions shape and reading
//! `choices[0].message.content` back out.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kg_core::error::{CoreError, Result};
use kg_core::traits::LlmBackend;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// One rung of the fallback chain talking to an OpenAI-compatible
/// chat-completions endpoint (spec §6 request/response shape). Used for
/// both the primary and the secondary tier, configured with different
/// URLs/keys/models/timeouts.
pub struct HttpLlmBackend {
    name: String,
    url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl HttpLlmBackend {
    pub fn new(name: impl Into<String>, url: impl Into<String>, api_key: Option<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::LLMUnavailableError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            api_key,
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            temperature: 0.0,
            max_tokens: 2048,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::LLMUnavailableError(format!("{}: request error: {e}", self.name)))?;

        if !response.status().is_success() {
            return Err(CoreError::LLMUnavailableError(format!(
                "{}: non-2xx response: {}",
                self.name,
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::LLMUnavailableError(format!("{}: response parse failure: {e}", self.name)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CoreError::LLMUnavailableError(format!("{}: empty choices array", self.name)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Tier 3 of the fallback chain: the built-in default ontology (spec
/// §4.3 "Cannot fail; always returns a usable proposal"). Modeled as an
/// `LlmBackend` whose `complete` ignores the prompt and returns a fixed
/// JSON document, so the fallback chain combinator in [`crate::fallback`]
/// can treat all three tiers uniformly.
pub struct DefaultOntologyBackend;

impl DefaultOntologyBackend {
    pub const NAME: &'static str = "default-ontology";
}

#[async_trait]
impl LlmBackend for DefaultOntologyBackend {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        Ok(DEFAULT_ONTOLOGY_JSON.to_string())
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

/// Person, Organization, Location nodes + WORKS_AT edge (spec §4.3 tier 3,
/// §8 scenario 1).
pub const DEFAULT_ONTOLOGY_JSON: &str = r#"{
  "nodes": [
    {
      "schema_name": "Person",
      "entity_type": "NODE",
      "structured_attributes": [
        {"name": "name", "data_type": "string", "required": true}
      ],
      "notes": "built-in default: a named individual"
    },
    {
      "schema_name": "Organization",
      "entity_type": "NODE",
      "structured_attributes": [
        {"name": "name", "data_type": "string", "required": true}
      ],
      "notes": "built-in default: a company, institution, or similar body"
    },
    {
      "schema_name": "Location",
      "entity_type": "NODE",
      "structured_attributes": [
        {"name": "name", "data_type": "string", "required": true}
      ],
      "notes": "built-in default: a place"
    }
  ],
  "edges": [
    {
      "schema_name": "WORKS_AT",
      "entity_type": "EDGE",
      "structured_attributes": [
        {"name": "role", "data_type": "string", "required": false}
      ],
      "notes": "built-in default: employment relation from Person to Organization"
    }
  ],
  "summary": "Built-in default ontology (Person, Organization, Location, WORKS_AT)."
}"#;
