//! Rough USD cost estimates for AI usage

use crate::llm::ResponseMetadata;

/// (model prefix, USD per 1K input tokens, USD per 1K output tokens)
const TEXT_PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.000_15, 0.000_6),
    ("gpt-4o", 0.002_5, 0.01),
    ("gpt-4.1-mini", 0.000_4, 0.001_6),
    ("gpt-4.1", 0.002, 0.008),
    ("gpt-3.5-turbo", 0.000_5, 0.001_5),
];

/// Used for models missing from the table
const FALLBACK_TEXT_PRICE: (f64, f64) = (0.001, 0.002);

/// (model, USD per image)
const IMAGE_PRICES: &[(&str, f64)] = &[("dall-e-3", 0.04), ("dall-e-2", 0.02)];

const FALLBACK_IMAGE_PRICE: f64 = 0.04;

/// Approximate token count for text (about four characters per token)
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

fn text_price(model: &str) -> (f64, f64) {
    TEXT_PRICES
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|&(_, input, output)| (input, output))
        .unwrap_or(FALLBACK_TEXT_PRICE)
}

/// Cost of one text generation.
///
/// Uses the provider's own figure when it reports one, otherwise prices the token counts,
/// estimating them from the prompt and output when the provider did not report usage.
pub fn charge_text(metadata: &ResponseMetadata, prompt: &str, output: &str) -> f64 {
    if let Some(cost) = metadata.reported_cost {
        return cost.max(0.0);
    }

    let input_tokens = metadata
        .prompt_tokens
        .unwrap_or_else(|| estimate_tokens(prompt));
    let output_tokens = metadata
        .completion_tokens
        .unwrap_or_else(|| estimate_tokens(output));
    let (input_rate, output_rate) = text_price(&metadata.model);

    (input_tokens as f64 / 1000.0) * input_rate + (output_tokens as f64 / 1000.0) * output_rate
}

/// Cost of one generated image
pub fn charge_image(metadata: &ResponseMetadata) -> f64 {
    if let Some(cost) = metadata.reported_cost {
        return cost.max(0.0);
    }
    IMAGE_PRICES
        .iter()
        .find(|(model, _)| *model == metadata.model)
        .map(|&(_, price)| price)
        .unwrap_or(FALLBACK_IMAGE_PRICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(model: &str) -> ResponseMetadata {
        ResponseMetadata {
            provider: "test".to_string(),
            model: model.to_string(),
            ..ResponseMetadata::default()
        }
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn test_reported_cost_wins() {
        let mut meta = metadata("gpt-4o");
        meta.reported_cost = Some(0.003);
        meta.prompt_tokens = Some(10_000);
        assert_eq!(charge_text(&meta, "ignored", "ignored"), 0.003);
    }

    #[test]
    fn test_usage_is_priced_per_model() {
        let mut meta = metadata("gpt-4o-mini-2024-07-18");
        meta.prompt_tokens = Some(1000);
        meta.completion_tokens = Some(1000);
        let cost = charge_text(&meta, "", "");
        assert!((cost - 0.000_75).abs() < 1e-12);
    }

    #[test]
    fn test_missing_usage_is_estimated() {
        let meta = metadata("unknown-model");
        let prompt = "x".repeat(4000);
        let cost = charge_text(&meta, &prompt, "");
        assert!((cost - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_image_prices() {
        assert_eq!(charge_image(&metadata("dall-e-2")), 0.02);
        assert_eq!(charge_image(&metadata("something-new")), FALLBACK_IMAGE_PRICE);
        let mut meta = metadata("openai");
        meta.reported_cost = Some(-5.0);
        assert_eq!(charge_image(&meta), 0.0);
    }
}
