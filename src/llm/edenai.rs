use super::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

const EDEN_BASE_URL: &str = "https://api.edenai.run/v2";

/// Eden AI provider implementation
///
/// Eden AI proxies several upstream engines; `engine` picks which one answers.
pub struct EdenAiProvider {
    base_url: String,
    api_key: String,
    engine: String,
    client: reqwest::Client,
}

impl EdenAiProvider {
    pub fn new(api_key: String, engine: String) -> LlmResult<Self> {
        Self::with_base_url(EDEN_BASE_URL.to_string(), api_key, engine)
    }

    /// Point the provider at a different host
    pub fn with_base_url(base_url: String, api_key: String, engine: String) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::ConfigError(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            engine,
            client,
        })
    }

    async fn post(&self, path: &str, body: &impl Serialize, timeout: Duration) -> LlmResult<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send(),
        )
        .await
        .map_err(|_| LlmError::Timeout(timeout))?
        .map_err(|e| LlmError::ApiError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Eden AI request to {} failed with {}: {}", path, status, body);
            return Err(LlmError::ApiError(format!(
                "Eden AI returned status: {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct TextGenerationRequest<'a> {
    response_as_dict: bool,
    attributes_as_list: bool,
    show_original_response: bool,
    temperature: f32,
    max_tokens: u32,
    providers: &'a str,
    text: &'a str,
    fallback_providers: &'a str,
}

#[derive(Debug, Deserialize)]
struct TextGenerationResult {
    #[serde(default)]
    generated_text: Option<String>,
    #[serde(default)]
    cost: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    response_as_dict: bool,
    show_original_response: bool,
    providers: &'a str,
    text: &'a str,
    resolution: &'a str,
    num_images: u32,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResult {
    #[serde(default)]
    items: Vec<ImageItem>,
    #[serde(default)]
    cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    #[serde(default)]
    image_resource_url: Option<String>,
}

/// Pull this engine's entry out of a `response_as_dict` payload
fn engine_result<T: serde::de::DeserializeOwned>(data: Value, engine: &str) -> LlmResult<T> {
    let entry = data.get(engine).cloned().ok_or_else(|| {
        LlmError::InvalidResponse(format!("response has no '{}' entry", engine))
    })?;
    serde_json::from_value(entry).map_err(|e| LlmError::InvalidResponse(e.to_string()))
}

fn parse_text_generation(data: Value, engine: &str) -> LlmResult<(String, Option<f64>)> {
    let result: TextGenerationResult = engine_result(data, engine)?;
    let text = result
        .generated_text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            LlmError::InvalidResponse("response did not contain generated text".to_string())
        })?;
    Ok((text, result.cost))
}

fn parse_image_generation(data: Value, engine: &str) -> LlmResult<(String, Option<f64>)> {
    let result: ImageGenerationResult = engine_result(data, engine)?;
    let url = result
        .items
        .into_iter()
        .find_map(|item| item.image_resource_url)
        .ok_or_else(|| LlmError::InvalidResponse("response did not contain an image".to_string()))?;
    Ok((url, result.cost))
}

#[async_trait]
impl LlmProvider for EdenAiProvider {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let start = Instant::now();

        let body = TextGenerationRequest {
            response_as_dict: true,
            attributes_as_list: false,
            show_original_response: false,
            temperature: request.temperature,
            max_tokens: request.max_tokens.unwrap_or(150),
            providers: &self.engine,
            text: &request.prompt,
            fallback_providers: "",
        };

        let data = self.post("/text/generation", &body, request.timeout).await?;
        let (text, reported_cost) = parse_text_generation(data, &self.engine)?;

        Ok(GenerateResponse {
            text,
            metadata: ResponseMetadata {
                provider: "edenai".to_string(),
                model: self.engine.clone(),
                reported_cost,
                latency_ms: start.elapsed().as_millis() as u64,
                ..ResponseMetadata::default()
            },
        })
    }

    fn name(&self) -> &str {
        "edenai"
    }
}

#[async_trait]
impl PortraitProvider for EdenAiProvider {
    async fn generate_portrait(&self, request: PortraitRequest) -> LlmResult<PortraitResponse> {
        let start = Instant::now();

        if request.reference_image.is_some() {
            tracing::debug!("Eden AI image generation ignores reference images");
        }
        let prompt = portrait_prompt(&request, None);

        let body = ImageGenerationRequest {
            response_as_dict: true,
            show_original_response: false,
            providers: &self.engine,
            text: &prompt,
            resolution: "512x512",
            num_images: 1,
        };

        let data = self.post("/image/generation", &body, request.timeout).await?;
        let (image_url, reported_cost) = parse_image_generation(data, &self.engine)?;

        Ok(PortraitResponse {
            image_url,
            metadata: ResponseMetadata {
                provider: "edenai".to_string(),
                model: self.engine.clone(),
                reported_cost,
                latency_ms: start.elapsed().as_millis() as u64,
                ..ResponseMetadata::default()
            },
        })
    }

    fn name(&self) -> &str {
        "edenai"
    }
}
