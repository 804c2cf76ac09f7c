//! Command layer: name parsing, the builtin registry, authorization and
//! the three-track dispatch (message command, builtin, external handler).

pub mod admin;
pub mod extra;
pub mod general;

use std::collections::HashMap;

use serde_json::Value;

use crate::models::{self, cmd_flags};
use crate::tg::{self, ChatKind};
use crate::tg_api::TextMode;
use crate::{Bot, Error, Result};

/// Arguments beyond this count are dropped silently.
pub const MAX_ARGS: usize = 16;

/// Everything a handler needs for one invocation.
pub struct CmdParam<'a> {
    pub bot: &'a Bot,
    pub msg: &'a tg::Message,
    /// The user that triggered the command: the message sender, or the
    /// callback originator for callback queries.
    pub from: &'a tg::User,
    /// `Some` when invoked from a callback query.
    pub callback_id: Option<&'a str>,
    /// Raw update JSON.
    pub json: &'a Value,
    /// Message text or callback data, as received.
    pub text: &'a str,
    /// Lowercased command token including the leading slash.
    pub name: String,
    /// Raw remainder after the command token.
    pub args: &'a str,
}

impl CmdParam<'_> {
    pub fn chat_id(&self) -> i64 {
        self.msg.chat.id
    }

    pub fn reply_plain(&self, text: &str) {
        self.reply(TextMode::Plain, text);
    }

    pub fn reply_format(&self, text: &str) {
        self.reply(TextMode::Format, text);
    }

    fn reply(&self, mode: TextMode, text: &str) {
        if let Err(e) = self.bot.api.send_text(mode, self.msg.chat.id, Some(self.msg.id), text) {
            tracing::warn!(chat_id = self.msg.chat.id, error = %e, "send_text failed");
        }
    }

    /// Plain reply, or an answer-callback alert when the invocation came
    /// from a callback query.
    pub fn alert(&self, text: &str) {
        match self.callback_id {
            Some(id) => {
                if let Err(e) = self.bot.api.answer_callback(id, Some(text), None, true) {
                    tracing::warn!(error = %e, "answer_callback failed");
                }
            }
            None => self.reply_plain(text),
        }
    }

    /// Owner is implicitly admin everywhere; everyone else needs a
    /// non-zero privilege bitmask recorded for this chat.
    pub fn is_admin(&self) -> Result<bool> {
        if self.from.id == self.bot.cfg.owner_id {
            return Ok(true);
        }

        let privileges =
            models::admin_get_privileges(&self.bot.db, self.msg.chat.id, self.from.id)?;

        Ok(privileges > 0)
    }

    /// Whitespace-tokenized argument list, capped at [`MAX_ARGS`].
    pub fn arg_list(&self) -> Vec<&str> {
        self.args.split_whitespace().take(MAX_ARGS).collect()
    }
}

/*
 * Parsing
 */

#[derive(Debug, PartialEq)]
pub struct ParsedCmd<'a> {
    /// Lowercased leading token, `@botname` suffix removed.
    pub name: String,
    pub has_username: bool,
    /// Raw remainder.
    pub args: &'a str,
}

/// Splits the leading token off a command text. Returns `None` for empty
/// input and for commands addressed to a different bot via `@othername`.
pub fn parse<'a>(text: &'a str, bot_username: &str) -> Option<ParsedCmd<'a>> {
    let text = text.trim_start();
    let token_end = text.find(char::is_whitespace).unwrap_or(text.len());
    let (token, rest) = text.split_at(token_end);
    if token.is_empty() {
        return None;
    }

    let args = rest.trim_start();
    match token.split_once('@') {
        Some((name, username)) => {
            if !username.eq_ignore_ascii_case(bot_username) {
                return None;
            }

            Some(ParsedCmd { name: name.to_lowercase(), has_username: true, args })
        }
        None => Some(ParsedCmd { name: token.to_lowercase(), has_username: false, args }),
    }
}

/*
 * Builtin registry
 */

pub struct Builtin {
    pub name: &'static str,
    pub description: &'static str,
    pub flags: i64,
    pub handler: fn(&CmdParam),
}

static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "/start",
        description: "Start command",
        flags: 0,
        handler: general::start,
    },
    Builtin {
        name: "/help",
        description: "Show command list",
        flags: cmd_flags::CALLBACK,
        handler: general::help,
    },
    Builtin {
        name: "/dump",
        description: "Dump raw update JSON",
        flags: 0,
        handler: general::dump,
    },
    Builtin {
        name: "/admin_dump",
        description: "Dump admin list in raw JSON",
        flags: cmd_flags::DISALLOW_PRIVATE_CHAT,
        handler: general::dump_admin,
    },
    Builtin {
        name: "/sched",
        description: "Schedule a message",
        flags: 0,
        handler: general::sched_message,
    },
    Builtin {
        name: "/deleter",
        description: "Message deleter",
        flags: cmd_flags::CALLBACK | cmd_flags::HIDDEN,
        handler: general::deleter,
    },
    Builtin {
        name: "/admin_reload",
        description: "Reload admin list",
        flags: cmd_flags::ADMIN | cmd_flags::DISALLOW_PRIVATE_CHAT,
        handler: admin::reload,
    },
    Builtin {
        name: "/msg_set",
        description: "Set/unset command message",
        flags: cmd_flags::ADMIN | cmd_flags::DISALLOW_PRIVATE_CHAT,
        handler: admin::msg_set,
    },
    Builtin {
        name: "/settings",
        description: "Show/set chat settings",
        flags: cmd_flags::ADMIN,
        handler: admin::settings,
    },
    Builtin {
        name: "/anime_sched",
        description: "Get anime schedule list",
        flags: cmd_flags::EXTRA | cmd_flags::CALLBACK,
        handler: extra::anime_sched,
    },
];

/// In-memory string → descriptor map, fixed at startup.
pub struct Registry {
    map: HashMap<&'static str, &'static Builtin>,
}

impl Registry {
    /// Registers the builtin set, rejecting names that collide with each
    /// other or with stored message/external commands.
    pub fn new(db: &crate::db::Db) -> Result<Self> {
        let mut map = HashMap::with_capacity(BUILTINS.len());
        for builtin in BUILTINS {
            if builtin.name.is_empty() || builtin.name.len() >= models::CMD_NAME_SIZE {
                tracing::warn!(name = builtin.name, "skipping builtin with invalid name");
                continue;
            }

            if builtin.description.len() >= models::CMD_DESC_SIZE {
                tracing::warn!(name = builtin.name, "skipping builtin with oversized description");
                continue;
            }

            if map.contains_key(builtin.name) {
                return Err(Error::Invalid(format!("builtin {:?} registered twice", builtin.name)));
            }

            if models::cmd_message_exists(db, builtin.name)? {
                return Err(Error::Invalid(format!(
                    "builtin {:?} already exists as a message command",
                    builtin.name
                )));
            }

            if models::cmd_extern_exists(db, builtin.name)? {
                return Err(Error::Invalid(format!(
                    "builtin {:?} already exists as an external command",
                    builtin.name
                )));
            }

            map.insert(builtin.name, builtin);
            tracing::info!(name = builtin.name, "registered builtin");
        }

        Ok(Self { map })
    }

    pub fn get(&self, name: &str) -> Option<&'static Builtin> {
        self.map.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Builtin> + '_ {
        self.map.values().copied()
    }
}

/*
 * Dispatch
 */

/// Routes one parsed command through the three tracks. `text` is the
/// message text or the callback data.
pub fn exec(
    bot: &Bot,
    msg: &tg::Message,
    from: &tg::User,
    callback_id: Option<&str>,
    json: &Value,
    text: &str,
) {
    let Some(parsed) = parse(text, &bot.cfg.bot_username) else {
        return;
    };

    let param = CmdParam {
        bot,
        msg,
        from,
        callback_id,
        json,
        text,
        name: parsed.name,
        args: parsed.args,
    };

    if exec_cmd_message(&param) {
        return;
    }

    let chat_flags = match models::chat_get_flags(&bot.db, msg.chat.id) {
        Ok(flags) => flags,
        Err(e) => {
            tracing::error!(chat_id = msg.chat.id, error = %e, "chat flags lookup failed");
            param.reply_plain("Failed to get chat flags");
            return;
        }
    };

    if exec_builtin(&param, chat_flags) {
        return;
    }

    if exec_extern(&param, chat_flags) {
        return;
    }

    if msg.chat.kind != ChatKind::Private && !parsed.has_username {
        return;
    }

    param.reply_plain(&format!("{:?}: Invalid command!", param.name));
}

/// Per-chat message commands shadow everything else and are never gated.
fn exec_cmd_message(param: &CmdParam) -> bool {
    match models::cmd_message_get(&param.bot.db, param.msg.chat.id, &param.name) {
        Ok(Some(value)) => {
            tracing::info!(
                chat_id = param.msg.chat.id,
                from_id = param.from.id,
                name = %param.name,
                "message command",
            );
            param.reply_format(&value);
            true
        }
        Ok(None) => false,
        Err(e) => {
            tracing::error!(name = %param.name, error = %e, "message command lookup failed");
            true
        }
    }
}

fn exec_builtin(param: &CmdParam, chat_flags: i64) -> bool {
    let Some(builtin) = param.bot.commands.get(&param.name) else {
        return false;
    };

    if !verify(param, chat_flags, builtin.flags) {
        return true;
    }

    tracing::info!(
        chat_id = param.msg.chat.id,
        from_id = param.from.id,
        message_id = param.msg.id,
        name = builtin.name,
        "builtin command",
    );
    (builtin.handler)(param);
    true
}

fn exec_extern(param: &CmdParam, chat_flags: i64) -> bool {
    use crate::models::chat_flags::ALLOW_EXTERN;

    if (chat_flags & ALLOW_EXTERN) == 0 {
        return false;
    }

    let row = match models::cmd_extern_get(&param.bot.db, param.msg.chat.id, &param.name) {
        Ok(Some(row)) => row,
        Ok(None) => return false,
        Err(e) => {
            tracing::error!(name = %param.name, error = %e, "external command lookup failed");
            return true;
        }
    };

    if !verify(param, chat_flags, row.flags) {
        return true;
    }

    if let Err(e) = spawn_extern(param, &row) {
        tracing::error!(name = %row.name, error = %e, "external spawn failed");
        param.reply_plain("Failed to execute external command");
    }

    true
}

/// Authorization predicate for a chosen handler. Admin and private-chat
/// denials answer the user; the rest fail silently.
fn verify(param: &CmdParam, chat_flags: i64, flags: i64) -> bool {
    use crate::models::chat_flags::ALLOW_NSFW;

    if param.callback_id.is_some() && (flags & cmd_flags::CALLBACK) == 0 {
        return false;
    }

    if (flags & cmd_flags::NSFW) != 0 && (chat_flags & ALLOW_NSFW) == 0 {
        return false;
    }

    if (flags & cmd_flags::DISALLOW_PRIVATE_CHAT) != 0 && param.msg.chat.kind == ChatKind::Private
    {
        param.alert("Not available in private chat");
        return false;
    }

    if (flags & cmd_flags::ADMIN) != 0 {
        match param.is_admin() {
            Ok(true) => {}
            Ok(false) => {
                param.alert("Permission denied!");
                return false;
            }
            Err(e) => {
                tracing::error!(error = %e, "admin lookup failed");
                param.alert("Failed to get admin list");
                return false;
            }
        }
    }

    true
}

/// Child argv layout, after the executable path:
///   cmd:      "cmd" chat_id user_id message_id text [raw_json]
///   callback: "callback" callback_id chat_id user_id message_id data
fn spawn_extern(param: &CmdParam, row: &models::CmdExtern) -> Result<()> {
    let mut args: Vec<String> = Vec::with_capacity(MAX_ARGS);

    match param.callback_id {
        Some(id) => {
            args.push("callback".into());
            args.push(id.into());
        }
        None => args.push("cmd".into()),
    }

    args.push(param.msg.chat.id.to_string());
    args.push(param.from.id.to_string());
    args.push(param.msg.id.to_string());
    args.push(param.text.into());

    if param.callback_id.is_none() && (row.args & models::extern_args::RAW_JSON) != 0 {
        args.push(param.json.to_string());
    }

    param.bot.chld.spawn(&row.file_name, &args)
}
