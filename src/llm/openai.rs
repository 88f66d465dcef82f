use super::*;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessageContentPartImage, ChatCompletionRequestMessageContentPartText,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, CreateImageRequestArgs,
        Image, ImageDetail, ImageModel, ImageResponseFormat, ImageSize, ImageUrl,
    },
    Client,
};
use std::time::Instant;

const NARRATOR_SYSTEM_PROMPT: &str = "You are the game master of a cooperative text adventure. \
    Continue the story in two to four vivid sentences describing what happens after the players' \
    chosen action. Stay consistent with the quest and the story so far. \
    Do not list options and do not speak for the players.";

const LIKENESS_PROMPT: &str = "Describe the person or creature in this image in one short \
    sentence focused on visible appearance (hair, face, build, clothing). No names.";

/// OpenAI provider implementation
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    image_model: String,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider with the given API key and models
    pub fn new(api_key: String, model: String, image_model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);

        Self {
            client,
            model,
            image_model,
        }
    }

    async fn chat(
        &self,
        system: &str,
        user_message: ChatCompletionRequestUserMessage,
        max_tokens: Option<u32>,
        temperature: f32,
        timeout: Duration,
    ) -> LlmResult<CreateChatCompletionResponse> {
        let mut req_builder = CreateChatCompletionRequestArgs::default();
        req_builder
            .model(&self.model)
            .temperature(temperature)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()
                    .map_err(|e| LlmError::ApiError(e.to_string()))?
                    .into(),
                user_message.into(),
            ]);

        if let Some(max_tokens) = max_tokens {
            req_builder.max_tokens(max_tokens);
        }

        let chat_request = req_builder
            .build()
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        tokio::time::timeout(timeout, self.client.chat().create(chat_request))
            .await
            .map_err(|_| LlmError::Timeout(timeout))?
            .map_err(|e| LlmError::ApiError(e.to_string()))
    }

    /// Ask a vision model what the reference picture looks like
    async fn describe_reference(&self, image_url: &str, timeout: Duration) -> LlmResult<String> {
        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: image_url.to_string(),
                        detail: Some(ImageDetail::Low),
                    },
                },
            ),
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: "Describe this character.".to_string(),
                },
            ),
        ];

        let user_message = ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Array(content_parts),
            name: None,
        };

        let response = self
            .chat(LIKENESS_PROMPT, user_message, Some(80), 0.2, timeout)
            .await?;
        first_content(&response)
    }
}

fn first_content(response: &CreateChatCompletionResponse) -> LlmResult<String> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| LlmError::InvalidResponse("No content in response".to_string()))
}

/// Share of a portrait's time budget the likeness description may use
fn likeness_budget(total: Duration) -> Duration {
    total / 3
}

fn image_model(name: &str) -> ImageModel {
    match name {
        "dall-e-2" => ImageModel::DallE2,
        "dall-e-3" => ImageModel::DallE3,
        other => ImageModel::Other(other.to_string()),
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let start = Instant::now();

        let user_message = ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(request.prompt.clone()),
            name: None,
        };

        let response = self
            .chat(
                NARRATOR_SYSTEM_PROMPT,
                user_message,
                request.max_tokens,
                request.temperature,
                request.timeout,
            )
            .await?;

        let text = first_content(&response)?;
        let latency_ms = start.elapsed().as_millis() as u64;

        Ok(GenerateResponse {
            text,
            metadata: ResponseMetadata {
                provider: "openai".to_string(),
                model: self.model.clone(),
                prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
                completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
                reported_cost: None,
                latency_ms,
            },
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[async_trait]
impl PortraitProvider for OpenAiProvider {
    async fn generate_portrait(&self, request: PortraitRequest) -> LlmResult<PortraitResponse> {
        let start = Instant::now();

        // A failed likeness lookup should not cost the player their portrait
        let likeness = match &request.reference_image {
            Some(url) => match self
                .describe_reference(url, likeness_budget(request.timeout))
                .await
            {
                Ok(description) => Some(description),
                Err(e) => {
                    tracing::warn!("Reference image description failed: {}", e);
                    None
                }
            },
            None => None,
        };

        let prompt = portrait_prompt(&request, likeness.as_deref());

        let image_request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(image_model(&self.image_model))
            .n(1)
            .size(ImageSize::S1024x1024)
            .response_format(ImageResponseFormat::Url)
            .build()
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        // Both steps share one budget
        let remaining = request.timeout.saturating_sub(start.elapsed());
        let response = tokio::time::timeout(remaining, self.client.images().create(image_request))
            .await
            .map_err(|_| LlmError::Timeout(request.timeout))?
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        let image_url = response
            .data
            .first()
            .map(|image| match image.as_ref() {
                Image::Url { url, .. } => url.clone(),
                Image::B64Json { b64_json, .. } => format!("data:image/png;base64,{}", b64_json),
            })
            .ok_or_else(|| LlmError::InvalidResponse("No image in response".to_string()))?;

        Ok(PortraitResponse {
            image_url,
            metadata: ResponseMetadata {
                provider: "openai".to_string(),
                model: self.image_model.clone(),
                latency_ms: start.elapsed().as_millis() as u64,
                ..ResponseMetadata::default()
            },
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_model_mapping() {
        assert!(matches!(image_model("dall-e-3"), ImageModel::DallE3));
        assert!(matches!(image_model("gpt-image-1"), ImageModel::Other(_)));
    }

    #[test]
    fn test_likeness_leaves_time_for_the_image() {
        let total = Duration::from_secs(30);
        let likeness = likeness_budget(total);
        assert_eq!(likeness, Duration::from_secs(10));
        assert!(total.saturating_sub(likeness) >= Duration::from_secs(20));
    }

    #[tokio::test]
    #[ignore] // Only run with actual API key
    async fn test_openai_narrate() {
        let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let provider = OpenAiProvider::new(
            api_key,
            "gpt-4o-mini".to_string(),
            "dall-e-3".to_string(),
        );

        let request = GenerateRequest {
            prompt: narration_prompt(&World::new(), "", "open the door"),
            max_tokens: Some(100),
            temperature: 0.7,
            timeout: Duration::from_secs(30),
        };

        let response = provider.generate(request).await.unwrap();

        assert!(!response.text.is_empty());
        assert_eq!(response.metadata.provider, "openai");
        println!("Generated text: {}", response.text);
    }
}
