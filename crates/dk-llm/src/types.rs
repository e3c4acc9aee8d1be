use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A single chat completion request. The quota layer treats it as opaque.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == MessageRole::System)
    }

    /// Puts `prompt` first unless the conversation already carries a system
    /// message.
    pub fn with_default_system(mut self, prompt: &str) -> Self {
        if !prompt.is_empty() && !self.has_system_message() {
            self.messages.insert(0, ChatMessage::system(prompt));
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    /// Total tokens billed by the provider; 0 when it did not report usage.
    pub usage_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages,
            temperature: 0.2,
            max_tokens: 256,
        }
    }

    #[test]
    fn default_system_is_prepended() {
        let req = request(vec![ChatMessage::user("Can I break my lease?")])
            .with_default_system("You are a legal information assistant.");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, MessageRole::System);
        assert_eq!(req.messages[1].content, "Can I break my lease?");
    }

    #[test]
    fn existing_system_message_wins() {
        let req = request(vec![
            ChatMessage::system("custom"),
            ChatMessage::user("hi"),
        ])
        .with_default_system("default");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].content, "custom");
    }

    #[test]
    fn empty_prompt_is_ignored() {
        let req = request(vec![ChatMessage::user("hi")]).with_default_system("");
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn message_role_wire_names() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"ok"}"#).unwrap();
        assert_eq!(msg, ChatMessage::assistant("ok"));
        assert!(serde_json::from_str::<ChatMessage>(r#"{"role":"tool","content":""}"#).is_err());
    }
}
