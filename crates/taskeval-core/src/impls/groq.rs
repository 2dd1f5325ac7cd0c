//! GroqEvaluator - `Evaluator` backed by an OpenAI-compatible chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{EvaluationReport, ReportError};
use crate::ports::{EvaluationRequest, Evaluator, EvaluatorError};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

const SYSTEM_PROMPT: &str = "You are an expert code reviewer. Evaluate code quality, best practices, \
     efficiency, and correctness. Provide constructive feedback. \
     You must output your response in valid JSON format ONLY.";
const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 2000;

#[derive(Clone)]
pub struct GroqConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GroqConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for GroqConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub struct GroqEvaluator {
    client: reqwest::Client,
    config: GroqConfig,
}

impl GroqEvaluator {
    pub fn new(config: GroqConfig) -> Result<Self, EvaluatorError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EvaluatorError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// User prompt asking for the fixed JSON shape the report parser expects.
pub fn build_prompt(request: &EvaluationRequest) -> String {
    let language = &request.language;
    let mut prompt = format!(
        "Evaluate the following {language} code and provide a score from 0-10 with detailed feedback.\n\n"
    );
    if !request.title.trim().is_empty() {
        prompt.push_str(&format!("Task Title: {}\n", request.title));
    }
    if !request.description.trim().is_empty() {
        prompt.push_str(&format!("Task Description: {}\n", request.description));
    }
    prompt.push_str(&format!(
        "\nCode:\n```{language}\n{}\n```\n\n",
        request.code_text
    ));
    prompt.push_str(
        "Please respond in this EXACT JSON format:\n\
         {\n  \"score\": number between 0-10,\n  \
         \"strengths\": [\"strength1\", \"strength2\", \"strength3\"],\n  \
         \"improvements\": [\"improvement1\", \"improvement2\", \"improvement3\"],\n  \
         \"summary\": \"brief overall summary\"\n}",
    );
    prompt
}

/// Pull the message content out of a completion body and validate it.
pub fn parse_completion(body: &str) -> Result<EvaluationReport, EvaluatorError> {
    let completion: ChatCompletion = serde_json::from_str(body)
        .map_err(|e| EvaluatorError::Malformed(ReportError::NotJson(e.to_string())))?;
    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            EvaluatorError::Malformed(ReportError::NotJson("completion has no content".into()))
        })?;
    Ok(EvaluationReport::from_model_output(&content)?)
}

#[async_trait]
impl Evaluator for GroqEvaluator {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationReport, EvaluatorError> {
        let prompt = build_prompt(request);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!(model = %self.config.model, language = %request.language, "requesting evaluation");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EvaluatorError::Timeout
                } else {
                    EvaluatorError::Unavailable(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                EvaluatorError::Timeout
            } else {
                EvaluatorError::Unavailable(e.without_url().to_string())
            }
        })?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "evaluator returned an error status");
            let snippet: String = text.chars().take(200).collect();
            return Err(EvaluatorError::Unavailable(format!(
                "status {}: {snippet}",
                status.as_u16()
            )));
        }

        parse_completion(&text)
    }
}
