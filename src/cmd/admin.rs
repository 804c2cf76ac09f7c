use crate::cmd::CmdParam;
use crate::models::{self, AdminRow, CmdMessage, chat_flags};

/// `/admin_reload` — fetch-and-replace of the chat's admin set. The caller
/// must appear in the fetched list with privileges, or be the owner.
pub fn reload(param: &CmdParam) {
    let chat_id = param.chat_id();
    let (admins, _) = match param.bot.api.get_admin_list(chat_id) {
        Ok(res) => res,
        Err(e) => {
            tracing::warn!(chat_id, error = %e, "get_admin_list failed");
            param.reply_plain("Failed to get admin list");
            return;
        }
    };

    let mut rows = Vec::with_capacity(admins.len());
    let mut caller_privileged = false;
    for admin in &admins {
        let privileges = admin.privileges();
        if admin.user.id == param.from.id {
            caller_privileged = privileges != 0;
        }

        rows.push(AdminRow {
            chat_id,
            user_id: admin.user.id,
            privileges,
            is_anonymous: admin.is_anonymous,
        });
    }

    if param.from.id != param.bot.cfg.owner_id && !caller_privileged {
        param.reply_plain("Permission denied!");
        return;
    }

    match models::admin_reload(&param.bot.db, chat_id, &rows) {
        Ok(count) => param.reply_plain(&format!("Done! {count} admin(s) loaded")),
        Err(e) => {
            tracing::error!(chat_id, error = %e, "admin reload failed");
            param.reply_plain("Failed to reload admin list DB");
        }
    }
}

/// `/msg_set <name> [message ...]` — set or unset a per-chat message
/// command. An empty message unsets the entry.
pub fn msg_set(param: &CmdParam) {
    const USAGE: &str =
        "Invalid argument!\nSet: [command_name] message ...\nUnset: [command_name] [EMPTY]";

    let args = param.args.trim_start();
    let name_end = args.find(char::is_whitespace).unwrap_or(args.len());
    let (raw_name, rest) = args.split_at(name_end);
    let raw_name = raw_name.trim_start_matches('/');
    if raw_name.is_empty() {
        param.reply_plain(USAGE);
        return;
    }

    if raw_name.len() > models::CMD_NAME_SIZE {
        param.reply_plain("Command name is too long");
        return;
    }

    if !raw_name.chars().all(|c| c == '_' || c.is_ascii_alphanumeric()) {
        param.reply_plain("Invalid command name");
        return;
    }

    let value = rest.trim();
    if value.len() >= models::CMD_MESSAGE_VALUE_SIZE {
        param.reply_plain("Message is too long");
        return;
    }

    let name = format!("/{}", raw_name.to_lowercase());
    if param.bot.commands.contains(&name) {
        param.reply_plain("Cannot modify builtin command");
        return;
    }

    match models::cmd_extern_exists(&param.bot.db, &name) {
        Ok(false) => {}
        Ok(true) => {
            param.reply_plain("Cannot modify external command");
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "external command lookup failed");
            param.reply_plain("Failed to check external command");
            return;
        }
    }

    let msg = CmdMessage {
        chat_id: param.chat_id(),
        name,
        value: (!value.is_empty()).then(|| value.to_string()),
        created_by: param.from.id,
        updated_by: param.from.id,
    };

    match models::cmd_message_set(&param.bot.db, &msg) {
        Ok(0) => param.reply_plain("No such command message"),
        Ok(_) if msg.value.is_none() => param.reply_plain("removed"),
        Ok(_) => param.reply_plain("ok"),
        Err(e) => {
            tracing::error!(error = %e, "message command set failed");
            param.reply_plain("Failed to set command message");
        }
    }
}

/// `/settings` — show the chat flags; `/settings <flag> on|off` toggles
/// one of nsfw, extern, extra.
pub fn settings(param: &CmdParam) {
    const USAGE: &str = "Usage: /settings [nsfw|extern|extra] [on|off]";

    let chat_id = param.chat_id();
    let flags = match models::chat_get_flags(&param.bot.db, chat_id) {
        Ok(flags) => flags,
        Err(e) => {
            tracing::error!(chat_id, error = %e, "chat flags lookup failed");
            param.reply_plain("Failed to get chat flags");
            return;
        }
    };

    let args = param.arg_list();
    if args.is_empty() {
        let onoff = |bit: i64| if (flags & bit) != 0 { "on" } else { "off" };
        param.reply_plain(&format!(
            "Chat settings:\nnsfw  : {}\nextern: {}\nextra : {}",
            onoff(chat_flags::ALLOW_NSFW),
            onoff(chat_flags::ALLOW_EXTERN),
            onoff(chat_flags::ALLOW_EXTRA),
        ));
        return;
    }

    if args.len() != 2 {
        param.reply_plain(USAGE);
        return;
    }

    let (name, state) = (args[0], args[1]);

    let bit = match name {
        "nsfw" => chat_flags::ALLOW_NSFW,
        "extern" => chat_flags::ALLOW_EXTERN,
        "extra" => chat_flags::ALLOW_EXTRA,
        _ => {
            param.reply_plain(USAGE);
            return;
        }
    };

    let new_flags = match state {
        "on" => flags | bit,
        "off" => flags & !bit,
        _ => {
            param.reply_plain(USAGE);
            return;
        }
    };

    match models::chat_set_flags(&param.bot.db, chat_id, new_flags, param.from.id) {
        Ok(_) => param.reply_plain(&format!("{name}: {state}")),
        Err(e) => {
            tracing::error!(chat_id, error = %e, "chat flags update failed");
            param.reply_plain("Failed to update chat settings");
        }
    }
}
