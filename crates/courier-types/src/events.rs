use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Chat, Message, UserStatus};

/// Events pushed to WebSocket and SSE subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms the socket is authenticated
    Ready { user_id: Uuid, username: String },

    ChatCreate { chat: Chat },
    ChatUpdate { chat: Chat },
    ChatDelete { chat_id: Uuid },
    ChatRestore { chat: Chat },

    MessageCreate { message: Message },
    MessageUpdate { message: Message },
    MessageDelete { chat_id: Uuid, message_id: Uuid },
    MessageRestore { message: Message },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        status: UserStatus,
    },

    /// Reply to `GatewayCommand::GetChats`
    Chats { chats: Vec<Chat> },

    /// Reply to `GatewayCommand::GetMessages`
    Messages { chat_id: Uuid, messages: Vec<Message> },

    /// A command failed
    Exception { message: String },
}

impl GatewayEvent {
    /// Returns the chat this event is scoped to. Events that return `None`
    /// are not tied to a chat (presence, replies, handshakes).
    pub fn chat_id(&self) -> Option<Uuid> {
        match self {
            Self::ChatCreate { chat } | Self::ChatUpdate { chat } | Self::ChatRestore { chat } => {
                Some(chat.chat_id)
            }
            Self::ChatDelete { chat_id } => Some(*chat_id),
            Self::MessageCreate { message }
            | Self::MessageUpdate { message }
            | Self::MessageRestore { message } => Some(message.chat_id),
            Self::MessageDelete { chat_id, .. } => Some(*chat_id),
            Self::Messages { chat_id, .. } => Some(*chat_id),
            _ => None,
        }
    }

    /// Event name used on the SSE `event:` line. Matches the serde tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "Ready",
            Self::ChatCreate { .. } => "ChatCreate",
            Self::ChatUpdate { .. } => "ChatUpdate",
            Self::ChatDelete { .. } => "ChatDelete",
            Self::ChatRestore { .. } => "ChatRestore",
            Self::MessageCreate { .. } => "MessageCreate",
            Self::MessageUpdate { .. } => "MessageUpdate",
            Self::MessageDelete { .. } => "MessageDelete",
            Self::MessageRestore { .. } => "MessageRestore",
            Self::PresenceUpdate { .. } => "PresenceUpdate",
            Self::Chats { .. } => "Chats",
            Self::Messages { .. } => "Messages",
            Self::Exception { .. } => "Exception",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    /// List the caller's chats
    GetChats,

    /// List the messages of one chat
    GetMessages { chat_id: Uuid },

    /// Only forward chat-scoped events for these chats.
    /// An empty list restores the default of every chat the caller belongs to.
    Subscribe { chat_ids: Vec<Uuid> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tag_matches_name() {
        let event = GatewayEvent::MessageDelete {
            chat_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], event.name());
        assert!(json["data"].get("messageId").is_some());
        assert_eq!(event.chat_id(), Some(json["data"]["chatId"].as_str().unwrap().parse().unwrap()));
    }

    #[test]
    fn parses_client_commands() {
        let cmd: GatewayCommand = serde_json::from_str(r#"{"type":"GetChats"}"#).unwrap();
        assert_eq!(cmd, GatewayCommand::GetChats);

        let chat_id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"GetMessages","data":{{"chatId":"{chat_id}"}}}}"#);
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, GatewayCommand::GetMessages { chat_id });
    }

    #[test]
    fn presence_is_not_chat_scoped() {
        let event = GatewayEvent::PresenceUpdate {
            user_id: Uuid::new_v4(),
            username: "alice".into(),
            status: UserStatus::Online,
        };
        assert_eq!(event.chat_id(), None);
    }
}
