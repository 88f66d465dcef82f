mod edenai;
mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::types::World;

pub use edenai::EdenAiProvider;
pub use openai::OpenAiProvider;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Request to generate text
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// The prompt text
    pub prompt: String,
    /// Maximum response length in tokens (provider-dependent)
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    /// Timeout for the request
    pub timeout: Duration,
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// The generated text
    pub text: String,
    pub metadata: ResponseMetadata,
}

/// Metadata about a provider response
#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    /// Name of the provider (e.g., "openai", "edenai")
    pub provider: String,
    /// Model name used
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    /// Cost as billed by the provider, when it reports one
    pub reported_cost: Option<f64>,
    /// Latency in milliseconds
    pub latency_ms: u64,
}

/// Trait that all text providers must implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate text for the given prompt
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse>;

    /// Get the name of this provider
    fn name(&self) -> &str;
}

/// Request to draw a character portrait
#[derive(Debug, Clone)]
pub struct PortraitRequest {
    pub name: String,
    pub descriptor: String,
    /// URL (or data URL) of a picture the portrait should resemble
    pub reference_image: Option<String>,
    pub style_hint: Option<String>,
    pub world: World,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PortraitResponse {
    pub image_url: String,
    pub metadata: ResponseMetadata,
}

/// Trait for providers that can draw character portraits
#[async_trait]
pub trait PortraitProvider: Send + Sync {
    async fn generate_portrait(&self, request: PortraitRequest) -> LlmResult<PortraitResponse>;

    fn name(&self) -> &str;
}

/// Which backend narrates the story
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderChoice {
    /// Eden AI if its key is set, otherwise OpenAI
    Auto,
    EdenAi,
    OpenAi,
}

impl std::str::FromStr for ProviderChoice {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(ProviderChoice::Auto),
            "edenai" | "eden" => Ok(ProviderChoice::EdenAi),
            "openai" => Ok(ProviderChoice::OpenAi),
            other => Err(LlmError::ConfigError(format!(
                "Unknown provider '{}', expected auto, edenai or openai",
                other
            ))),
        }
    }
}

/// Configuration for AI providers
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: ProviderChoice,
    /// Eden AI API key
    pub eden_api_key: Option<String>,
    /// Upstream engine Eden AI should route to
    pub eden_provider: String,
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// OpenAI chat model used for narration
    pub openai_model: String,
    /// OpenAI image model used for portraits
    pub openai_image_model: String,
    /// Default timeout for requests
    pub default_timeout: Duration,
    /// Default max tokens for narration
    pub default_max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderChoice::Auto,
            eden_api_key: None,
            eden_provider: "openai".to_string(),
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_image_model: "dall-e-3".to_string(),
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 150,
            temperature: 0.7,
        }
    }
}

/// Read an environment variable, treating blank values as unset
fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let provider = match env_non_empty("NARRATION_PROVIDER") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!("{}; falling back to auto", e);
                ProviderChoice::Auto
            }),
            None => ProviderChoice::Auto,
        };

        Self {
            provider,
            eden_api_key: env_non_empty("EDEN_AI_API_KEY"),
            eden_provider: env_non_empty("EDEN_AI_PROVIDER").unwrap_or(defaults.eden_provider),
            openai_api_key: env_non_empty("OPENAI_API_KEY"),
            openai_model: env_non_empty("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_image_model: env_non_empty("OPENAI_IMAGE_MODEL")
                .unwrap_or(defaults.openai_image_model),
            default_timeout: env_non_empty("LLM_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_timeout),
            default_max_tokens: env_non_empty("LLM_MAX_TOKENS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_max_tokens),
            temperature: env_non_empty("LLM_TEMPERATURE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.temperature),
        }
    }

    fn eden(&self) -> LlmResult<EdenAiProvider> {
        let key = self.eden_api_key.clone().ok_or_else(|| {
            LlmError::MissingCredentials("EDEN_AI_API_KEY is not set".to_string())
        })?;
        EdenAiProvider::new(key, self.eden_provider.clone())
    }

    fn openai(&self) -> LlmResult<OpenAiProvider> {
        let key = self.openai_api_key.clone().ok_or_else(|| {
            LlmError::MissingCredentials("OPENAI_API_KEY is not set".to_string())
        })?;
        Ok(OpenAiProvider::new(
            key,
            self.openai_model.clone(),
            self.openai_image_model.clone(),
        ))
    }

    /// Build the provider used for both narration and portraits
    pub fn build_providers(&self) -> LlmResult<Providers> {
        match self.provider {
            ProviderChoice::EdenAi => Ok(Providers::from_one(Arc::new(self.eden()?))),
            ProviderChoice::OpenAi => Ok(Providers::from_one(Arc::new(self.openai()?))),
            ProviderChoice::Auto => {
                if self.eden_api_key.is_some() {
                    Ok(Providers::from_one(Arc::new(self.eden()?)))
                } else if self.openai_api_key.is_some() {
                    Ok(Providers::from_one(Arc::new(self.openai()?)))
                } else {
                    Err(LlmError::MissingCredentials(
                        "No AI provider configured. Set EDEN_AI_API_KEY or OPENAI_API_KEY"
                            .to_string(),
                    ))
                }
            }
        }
    }

    pub fn narration_request(&self, prompt: String) -> GenerateRequest {
        GenerateRequest {
            prompt,
            max_tokens: Some(self.default_max_tokens),
            temperature: self.temperature,
            timeout: self.default_timeout,
        }
    }
}

/// The collaborators the game talks to
#[derive(Clone, Default)]
pub struct Providers {
    pub narrator: Option<Arc<dyn LlmProvider>>,
    pub portraits: Option<Arc<dyn PortraitProvider>>,
}

impl Providers {
    fn from_one<P>(provider: Arc<P>) -> Self
    where
        P: LlmProvider + PortraitProvider + 'static,
    {
        Self {
            narrator: Some(provider.clone()),
            portraits: Some(provider),
        }
    }
}

/// Build the narration prompt from the world, the story so far and the chosen action
pub fn narration_prompt(world: &World, story: &str, action: &str) -> String {
    let quest = render_world(world);
    let story = if story.trim().is_empty() {
        "The adventure is just beginning."
    } else {
        story
    };
    format!(
        "Quest: {}\n\nStory so far: {}\n\nThe players decided to: \"{}\"\n\nWhat happens next?",
        quest, story, action
    )
}

/// Flatten the world description into prompt text
pub fn render_world(world: &World) -> String {
    if world.is_empty() {
        return "An unnamed adventure.".to_string();
    }
    world
        .iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => format!("{}: {}", key, s),
            other => format!("{}: {}", key, other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the image prompt for a character portrait
pub fn portrait_prompt(request: &PortraitRequest, reference_description: Option<&str>) -> String {
    let mut prompt = format!("Character portrait of {}", request.name);
    if !request.descriptor.trim().is_empty() {
        prompt.push_str(&format!(", {}", request.descriptor.trim()));
    }
    if let Some(description) = reference_description {
        prompt.push_str(&format!(". Likeness: {}", description));
    }
    let style = request
        .style_hint
        .clone()
        .or_else(|| {
            request
                .world
                .get("art_style")
                .or_else(|| request.world.get("artStyle"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "fantasy illustration".to_string());
    prompt.push_str(&format!(". Style: {}. Head and shoulders, no text.", style));
    prompt
}
