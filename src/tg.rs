//! Decoded Telegram update model. Only the fields the gateway consumes are
//! mapped; the raw JSON tree travels alongside the decoded value for the
//! dump command and external handlers.

use serde::Deserialize;

/// Characters with meaning in MarkdownV2 text.
const MARKDOWN_RESERVED: &str = "_*[]()~`>#+-|{}.!";

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
    Unknown,
}

impl<'de> Deserialize<'de> for ChatKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "private" => Self::Private,
            "group" => Self::Group,
            "supergroup" => Self::Supergroup,
            "channel" => Self::Channel,
            _ => Self::Unknown,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub title: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: i64,
    pub length: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    pub file_unique_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sticker {
    pub file_id: String,
    pub file_unique_id: String,
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Command,
    Photo,
    Audio,
    Document,
    Video,
    Sticker,
    NewMember,
    LeftMember,
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(rename = "message_id")]
    pub id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub date: i64,
    /// The platform bounds reply chains to one level.
    pub reply_to_message: Option<Box<Message>>,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    pub photo: Option<Vec<PhotoSize>>,
    pub audio: Option<FileRef>,
    pub document: Option<FileRef>,
    pub video: Option<FileRef>,
    pub sticker: Option<Sticker>,
    #[serde(default)]
    pub new_chat_members: Vec<User>,
    pub left_chat_member: Option<User>,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        if !self.new_chat_members.is_empty() {
            return MessageKind::NewMember;
        }

        if self.left_chat_member.is_some() {
            return MessageKind::LeftMember;
        }

        if let Some(text) = &self.text {
            let is_command = self
                .entities
                .iter()
                .any(|e| e.kind == "bot_command" && e.offset == 0)
                || text.starts_with('/');

            return if is_command { MessageKind::Command } else { MessageKind::Text };
        }

        if self.photo.is_some() {
            return MessageKind::Photo;
        }
        if self.audio.is_some() {
            return MessageKind::Audio;
        }
        if self.document.is_some() {
            return MessageKind::Document;
        }
        if self.video.is_some() {
            return MessageKind::Video;
        }
        if self.sticker.is_some() {
            return MessageKind::Sticker;
        }

        MessageKind::Unknown
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Box<Message>>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

/*
 * Chat administrators
 */

pub mod privilege {
    pub const CREATOR: i64 = 1 << 0;
    pub const CAN_BE_EDITED: i64 = 1 << 1;
    pub const CAN_MANAGE_CHAT: i64 = 1 << 2;
    pub const CAN_DELETE_MESSAGES: i64 = 1 << 3;
    pub const CAN_MANAGE_VIDEO_CHATS: i64 = 1 << 4;
    pub const CAN_RESTRICT_MEMBERS: i64 = 1 << 5;
    pub const CAN_PROMOTE_MEMBERS: i64 = 1 << 6;
    pub const CAN_CHANGE_INFO: i64 = 1 << 7;
    pub const CAN_INVITE_USERS: i64 = 1 << 8;
    pub const CAN_PIN_MESSAGES: i64 = 1 << 9;
}

/// One entry of a `getChatAdministrators` result.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatAdmin {
    pub user: User,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub can_be_edited: bool,
    #[serde(default)]
    pub can_manage_chat: bool,
    #[serde(default)]
    pub can_delete_messages: bool,
    #[serde(default)]
    pub can_manage_video_chats: bool,
    #[serde(default)]
    pub can_restrict_members: bool,
    #[serde(default)]
    pub can_promote_members: bool,
    #[serde(default)]
    pub can_change_info: bool,
    #[serde(default)]
    pub can_invite_users: bool,
    #[serde(default)]
    pub can_pin_messages: bool,
}

impl ChatAdmin {
    /// Collapses the per-capability booleans into one bitmask. The chat
    /// creator implicitly holds every capability.
    pub fn privileges(&self) -> i64 {
        let mut mask = 0;
        if self.status == "creator" {
            mask |= privilege::CREATOR;
        }
        if self.can_be_edited {
            mask |= privilege::CAN_BE_EDITED;
        }
        if self.can_manage_chat {
            mask |= privilege::CAN_MANAGE_CHAT;
        }
        if self.can_delete_messages {
            mask |= privilege::CAN_DELETE_MESSAGES;
        }
        if self.can_manage_video_chats {
            mask |= privilege::CAN_MANAGE_VIDEO_CHATS;
        }
        if self.can_restrict_members {
            mask |= privilege::CAN_RESTRICT_MEMBERS;
        }
        if self.can_promote_members {
            mask |= privilege::CAN_PROMOTE_MEMBERS;
        }
        if self.can_change_info {
            mask |= privilege::CAN_CHANGE_INFO;
        }
        if self.can_invite_users {
            mask |= privilege::CAN_INVITE_USERS;
        }
        if self.can_pin_messages {
            mask |= privilege::CAN_PIN_MESSAGES;
        }

        mask
    }
}

/// Escapes MarkdownV2 reserved characters with a backslash.
pub fn escape_markdown(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for ch in src.chars() {
        if MARKDOWN_RESERVED.contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }

    out
}
