//! 额度估算
//!
//! 纯函数，不访问存储。按字符数 / 4 向上取整近似 token 数。

use crate::models::model_registry::{ModelDescriptor, Pricing};
use crate::models::openai::{ChatRequest, GatewayRequest, MessageContent};

/// 非文本内容（图片、音频等）的固定估算值
pub const NON_TEXT_PART_COST: u64 = 100;
/// 无内容消息（如纯工具调用）的固定估算值
pub const EMPTY_MESSAGE_COST: u64 = 250;
/// 未配置固定费用的非对话端点默认值
pub const DEFAULT_FLAT_COST: u64 = 100;

/// 文本 token 近似值
pub fn text_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

fn apply_multiplier(tokens: u64, multiplier: f64) -> u64 {
    if multiplier == 1.0 {
        return tokens;
    }
    (tokens as f64 * multiplier).ceil() as u64
}

/// 对话输入的原始 token 数（未乘倍率）
pub fn chat_input_tokens(request: &ChatRequest) -> u64 {
    request
        .messages
        .iter()
        .map(|message| match &message.content {
            None => EMPTY_MESSAGE_COST,
            Some(MessageContent::Text(text)) => text_tokens(text),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .map(|part| match (&part.text, part.is_text()) {
                    (Some(text), true) => text_tokens(text),
                    (None, true) => 0,
                    _ => NON_TEXT_PART_COST,
                })
                .sum(),
        })
        .sum()
}

/// 估算请求所需额度
pub fn estimate(descriptor: &ModelDescriptor, request: &GatewayRequest) -> u64 {
    match (request, descriptor.pricing) {
        (GatewayRequest::Chat(chat), pricing) => {
            apply_multiplier(chat_input_tokens(chat), pricing.multiplier())
        }
        (_, Pricing::Flat { cost }) => cost,
        (_, Pricing::PerToken { .. }) => DEFAULT_FLAT_COST,
    }
}

/// 输出内容的额度，非流式结算使用
pub fn completion_cost(descriptor: &ModelDescriptor, text: &str) -> u64 {
    output_cost(descriptor, text.chars().count() as u64)
}

/// 按累计输出字符数计算额度，流式计费按累计值补差
pub fn output_cost(descriptor: &ModelDescriptor, chars: u64) -> u64 {
    apply_multiplier(chars.div_ceil(4), descriptor.pricing.multiplier())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::model_registry::ModelType;
    use crate::models::openai::{ChatMessage, ContentPart, ImageRequest, SpeechRequest};
    use proptest::prelude::*;

    fn chat_model(multiplier: f64) -> ModelDescriptor {
        ModelDescriptor::new("gpt-4", ModelType::Chat, "openai").multiplier(multiplier)
    }

    #[test]
    fn test_text_tokens_rounds_up() {
        assert_eq!(text_tokens(""), 0);
        assert_eq!(text_tokens("abc"), 1);
        assert_eq!(text_tokens("abcd"), 1);
        assert_eq!(text_tokens("abcde"), 2);
        // 按字符而非字节计数
        assert_eq!(text_tokens("你好世界"), 1);
    }

    #[test]
    fn test_chat_with_image_part() {
        let request = ChatRequest::new(
            "gpt-4o",
            vec![ChatMessage::with_parts(
                "user",
                vec![
                    ContentPart::text("describe this picture"),
                    ContentPart::image_url("https://example.com/a.png"),
                ],
            )],
        );
        assert_eq!(chat_input_tokens(&request), 6 + NON_TEXT_PART_COST);
    }

    #[test]
    fn test_chat_with_empty_message() {
        let mut message = ChatMessage::new("assistant", "");
        message.content = None;
        let request = ChatRequest::new("gpt-4o", vec![ChatMessage::new("user", "hi"), message]);
        assert_eq!(chat_input_tokens(&request), 1 + EMPTY_MESSAGE_COST);
    }

    #[test]
    fn test_multiplier_rounds_up() {
        let request = GatewayRequest::Chat(ChatRequest::new(
            "gpt-4o",
            vec![ChatMessage::new("user", "abcde")],
        ));
        assert_eq!(estimate(&chat_model(1.25), &request), 3);
        assert_eq!(estimate(&chat_model(2.0), &request), 4);
    }

    #[test]
    fn test_flat_and_default_costs() {
        let image = GatewayRequest::Image(ImageRequest {
            model: "dall-e-3".to_string(),
            prompt: "a lighthouse at dusk".to_string(),
            n: 1,
            size: None,
            extra: Default::default(),
        });
        let dalle3 = ModelDescriptor::new("dall-e-3", ModelType::Image, "openai").flat(2500);
        assert_eq!(estimate(&dalle3, &image), 2500);

        let speech = GatewayRequest::Speech(SpeechRequest {
            model: "tts-1".to_string(),
            input: "hello".to_string(),
            voice: "alloy".to_string(),
            extra: Default::default(),
        });
        let tts = ModelDescriptor::new("tts-1", ModelType::Speech, "openai");
        assert_eq!(estimate(&tts, &speech), DEFAULT_FLAT_COST);
    }

    #[test]
    fn test_completion_cost_uses_multiplier() {
        assert_eq!(completion_cost(&chat_model(1.0), "hello"), 2);
        assert_eq!(completion_cost(&chat_model(1.25), "hello"), 3);
        assert_eq!(completion_cost(&chat_model(2.0), ""), 0);
    }

    #[test]
    fn test_output_cost_is_cumulative() {
        let model = chat_model(2.0);
        // 8 个单字符分片累计计费，与一次性结算一致
        let mut charged = 0;
        for chars in 1..=8u64 {
            charged += output_cost(&model, chars) - charged;
        }
        assert_eq!(charged, completion_cost(&model, "abcdefgh"));
        assert_eq!(charged, 4);
    }

    proptest! {
        #[test]
        fn prop_text_only_chat_estimate(
            texts in proptest::collection::vec(".{0,200}", 1..8),
            multiplier in prop_oneof![Just(1.0f64), Just(1.25), Just(1.5), Just(1.75), Just(2.0)],
        ) {
            let messages = texts.iter().map(|t| ChatMessage::new("user", t.clone())).collect();
            let request = GatewayRequest::Chat(ChatRequest::new("gpt-4", messages));
            let expected_tokens: u64 = texts
                .iter()
                .map(|t| (t.chars().count() as u64).div_ceil(4))
                .sum();
            let expected = (expected_tokens as f64 * multiplier).ceil() as u64;
            prop_assert_eq!(estimate(&chat_model(multiplier), &request), expected);
        }
    }
}
