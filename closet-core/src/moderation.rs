use async_trait::async_trait;

use crate::CoreResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    Pass,
    Reject(String),
}

/// Pass/fail check on customer or provider supplied free text.
#[async_trait]
pub trait ContentModerator: Send + Sync {
    async fn check(&self, field: &str, text: &str) -> CoreResult<ModerationVerdict>;
}

/// Rejects text containing any configured term (case-insensitive).
pub struct BlocklistModerator {
    terms: Vec<String>,
}

impl BlocklistModerator {
    pub fn new(terms: Vec<String>) -> Self {
        Self {
            terms: terms.into_iter().map(|t| t.to_lowercase()).filter(|t| !t.is_empty()).collect(),
        }
    }
}

#[async_trait]
impl ContentModerator for BlocklistModerator {
    async fn check(&self, field: &str, text: &str) -> CoreResult<ModerationVerdict> {
        let lowered = text.to_lowercase();
        match self.terms.iter().find(|term| lowered.contains(term.as_str())) {
            Some(_) => {
                tracing::info!("Moderation rejected field {}", field);
                Ok(ModerationVerdict::Reject(format!("{} contains disallowed content", field)))
            }
            None => Ok(ModerationVerdict::Pass),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocklist() {
        let moderator = BlocklistModerator::new(vec!["Scam".to_string(), String::new()]);
        assert_eq!(moderator.check("description", "Torn sleeve").await.unwrap(), ModerationVerdict::Pass);
        assert!(matches!(
            moderator.check("description", "this is a SCAM").await.unwrap(),
            ModerationVerdict::Reject(_)
        ));
    }
}
