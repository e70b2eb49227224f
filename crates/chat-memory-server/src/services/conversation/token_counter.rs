use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::SizeMetric;
use crate::models::chat::ChatMessage;

/// Measures a message list against the memory budget.
///
/// Implementations must be deterministic, monotonic in content length and
/// return 0 for an empty list.
pub trait SizeEstimator: Send + Sync {
    fn estimate(&self, messages: &[ChatMessage]) -> usize;
}

/// Approximate tokens: 3 graphemes per token, rounded up per message.
pub struct TokenEstimator;

impl TokenEstimator {
    const CHARS_PER_TOKEN: usize = 3;

    pub fn count_text(text: &str) -> usize {
        let char_count = text.graphemes(true).count();
        char_count.div_ceil(Self::CHARS_PER_TOKEN)
    }
}

impl SizeEstimator for TokenEstimator {
    fn estimate(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| Self::count_text(&m.content)).sum()
    }
}

/// One unit per stored message.
pub struct MessageCountEstimator;

impl SizeEstimator for MessageCountEstimator {
    fn estimate(&self, messages: &[ChatMessage]) -> usize {
        messages.len()
    }
}

pub fn estimator_for(metric: SizeMetric) -> Arc<dyn SizeEstimator> {
    match metric {
        SizeMetric::Tokens => Arc::new(TokenEstimator),
        SizeMetric::Messages => Arc::new(MessageCountEstimator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_text() {
        assert_eq!(TokenEstimator::count_text("Hello world"), 4);
        assert_eq!(TokenEstimator::count_text("abc"), 1);
        assert_eq!(TokenEstimator::count_text("abcd"), 2);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(TokenEstimator::count_text(""), 0);
        assert_eq!(TokenEstimator.estimate(&[]), 0);
        assert_eq!(MessageCountEstimator.estimate(&[]), 0);
    }

    #[test]
    fn test_graphemes_not_bytes() {
        // three graphemes, many bytes
        assert_eq!(TokenEstimator::count_text("éàü"), 1);
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let messages = vec![
            ChatMessage::user("What is ownership?", 0),
            ChatMessage::assistant("Each value has a single owner.", 1),
        ];
        let first = TokenEstimator.estimate(&messages);
        assert_eq!(first, TokenEstimator.estimate(&messages));
        assert!(first > 0);
        assert_eq!(MessageCountEstimator.estimate(&messages), 2);
    }
}
