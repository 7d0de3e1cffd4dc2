use crate::error::ValidationError;
use crate::ChatMessage;
use uuid::Uuid;

/// Trims and checks a chat line, returning the record to append.
pub fn compose_message(
    sender_id: &str,
    sender_name: &str,
    text: &str,
    now_ms: i64,
    max_len: usize,
) -> Result<ChatMessage, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    let len = text.chars().count();
    if len > max_len {
        return Err(ValidationError::MessageTooLong { len, max: max_len });
    }
    Ok(ChatMessage {
        id: Uuid::new_v4(),
        sender_id: sender_id.to_string(),
        sender_name: sender_name.to_string(),
        text: text.to_string(),
        timestamp: now_ms,
    })
}
