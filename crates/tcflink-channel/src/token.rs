use std::sync::atomic::{AtomicU64, Ordering};

use tcflink_codec::Token;

/// Issues command tokens that are never reused by the same generator.
#[derive(Debug, Default)]
pub struct TokenGenerator {
    prefix: String,
    next: AtomicU64,
}

impl TokenGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens are rendered as `<prefix><counter>`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }

    pub fn next_token(&self) -> Token {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Token::from(format!("{}{}", self.prefix, n))
    }
}
