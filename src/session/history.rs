//! History compaction.
//!
//! Sessions never prune on their own. Compaction is an explicit step the
//! caller runs when the conversation grows too long for the model's context
//! window: the leading system messages (seed context) are kept, then only the
//! most recent turns.

use crate::inference::types::{ConversationMessage, Role};

/// Default number of trailing messages kept by [`compact_history`].
pub const DEFAULT_KEEP_RECENT: usize = 20;

/// Keep the leading run of `system` messages plus the last `keep_recent`
/// messages after it. Order is preserved.
pub fn compact_history(messages: &[ConversationMessage], keep_recent: usize) -> Vec<ConversationMessage> {
    let seed_len = messages
        .iter()
        .take_while(|m| m.role == Role::System)
        .count();
    let (seed, rest) = messages.split_at(seed_len);
    let skip = rest.len().saturating_sub(keep_recent);

    seed.iter().chain(rest[skip..].iter()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Vec<ConversationMessage> {
        vec![
            ConversationMessage::system("seed"),
            ConversationMessage::user("q1"),
            ConversationMessage::assistant("a1"),
            ConversationMessage::system("update"),
            ConversationMessage::user("q2"),
            ConversationMessage::assistant("a2"),
        ]
    }

    #[test]
    fn test_keeps_seed_and_recent() {
        let compacted = compact_history(&conversation(), 2);
        assert_eq!(
            compacted,
            vec![
                ConversationMessage::system("seed"),
                ConversationMessage::user("q2"),
                ConversationMessage::assistant("a2"),
            ]
        );
    }

    #[test]
    fn test_mid_conversation_system_message_is_not_seed() {
        let compacted = compact_history(&conversation(), 3);
        assert_eq!(compacted.len(), 4);
        assert_eq!(compacted[1], ConversationMessage::system("update"));
    }

    #[test]
    fn test_short_history_unchanged() {
        let history = conversation();
        assert_eq!(compact_history(&history, DEFAULT_KEEP_RECENT), history);
    }

    #[test]
    fn test_keep_zero_leaves_only_seed() {
        let compacted = compact_history(&conversation(), 0);
        assert_eq!(compacted, vec![ConversationMessage::system("seed")]);
    }

    #[test]
    fn test_empty_history() {
        assert!(compact_history(&[], 5).is_empty());
    }
}
