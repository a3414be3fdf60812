//! Conversation context and the request shapes derived from it.
//!
//! A context renders into a [`ModelRequest`] under one of two strategies.
//! `Stateless` flattens everything into a single user message and is the most
//! widely accepted shape. `Stateful` keeps structured turns and moves the system
//! prompt into the provider's instruction channel.
//!
//! ```rust
//! use rprovider::{ConversationContext, InvocationStrategy, Message, Role};
//!
//! let context = ConversationContext::new("Be brief.", "Where is my order?")
//!     .with_history(vec![Message::new(Role::User, "Hi"), Message::new(Role::Assistant, "Hello!")]);
//!
//! let prompt = context.flattened_prompt();
//! assert_eq!(
//!     prompt,
//!     "Be brief.\n\nUser: Hi\nAssistant: Hello!\nUser: Where is my order?\nAssistant:"
//! );
//!
//! let request = context.to_request(InvocationStrategy::Stateful, "gemini-1.5-flash", Default::default());
//! assert_eq!(request.system_instruction.as_deref(), Some("Be brief."));
//! assert_eq!(request.messages.len(), 3);
//! ```

use std::fmt::{Display, Formatter};

use rcommon::GenerationOptions;

use crate::{Message, ModelRequest, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationStrategy {
    Stateless,
    Stateful,
}

impl InvocationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stateless => "stateless",
            Self::Stateful => "stateful",
        }
    }
}

impl Display for InvocationStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub system_prompt: String,
    /// Prior turns, oldest first.
    pub history: Vec<Message>,
    pub user_content: String,
}

impl ConversationContext {
    pub fn new(system_prompt: impl Into<String>, user_content: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            user_content: user_content.into(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn flattened_prompt(&self) -> String {
        let mut lines = Vec::with_capacity(self.history.len() + 4);
        lines.push(self.system_prompt.trim().to_string());
        lines.push(String::new());

        for message in &self.history {
            lines.push(format!("{}: {}", message.role.label(), message.content));
        }

        lines.push(format!("{}: {}", Role::User.label(), self.user_content));
        lines.push(format!("{}:", Role::Assistant.label()));
        lines.join("\n")
    }

    pub fn to_request(
        &self,
        strategy: InvocationStrategy,
        model: impl Into<String>,
        options: GenerationOptions,
    ) -> ModelRequest {
        match strategy {
            InvocationStrategy::Stateless => ModelRequest::new(
                model,
                vec![Message::new(Role::User, self.flattened_prompt())],
            )
            .with_options(options),
            InvocationStrategy::Stateful => {
                let mut messages = self.history.clone();
                messages.push(Message::new(Role::User, self.user_content.clone()));
                ModelRequest::new(model, messages)
                    .with_system_instruction(self.system_prompt.trim())
                    .with_options(options)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_prompt_without_history_has_blank_separator() {
        let context = ConversationContext::new("System text", "Hello");
        assert_eq!(context.flattened_prompt(), "System text\n\nUser: Hello\nAssistant:");
    }

    #[test]
    fn stateless_request_has_single_user_message_and_no_instruction() {
        let context = ConversationContext::new("Rules", "Question")
            .with_history(vec![Message::new(Role::Assistant, "Earlier answer")]);

        let request = context.to_request(
            InvocationStrategy::Stateless,
            "gemini-1.5-flash",
            GenerationOptions::default().with_max_tokens(300),
        );

        assert_eq!(request.system_instruction, None);
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::User);
        assert!(request.messages[0].content.contains("Assistant: Earlier answer"));
        assert_eq!(request.options.max_tokens, Some(300));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn stateful_request_keeps_turn_order_and_ends_with_user() {
        let context = ConversationContext::new("Rules", "Second question").with_history(vec![
            Message::new(Role::User, "First question"),
            Message::new(Role::Assistant, "First answer"),
        ]);

        let request = context.to_request(InvocationStrategy::Stateful, "gpt-4o-mini", GenerationOptions::default());

        let roles: Vec<Role> = request.messages.iter().map(|message| message.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(request.messages[2].content, "Second question");
        assert_eq!(request.system_instruction.as_deref(), Some("Rules"));
    }
}
