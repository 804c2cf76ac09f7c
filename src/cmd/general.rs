use crate::cmd::CmdParam;
use crate::models::{self, chat_flags, cmd_flags};
use crate::pager::{self, MessageList, Pagination};
use crate::tg::escape_markdown;

const ICON_ADMIN: &str = "🅰️";
const ICON_NSFW: &str = "🔞";
const ICON_EXTRA: &str = "🎲";
const ICON_EXTERN: &str = "📦";

/// Default lifetime of a scheduled send, seconds.
const SCHED_SEND_EXPIRE_S: i64 = 3600;

pub fn start(param: &CmdParam) {
    param.reply_plain("hello");
}

/// Paginated command list: builtins and enabled externals merged, filtered
/// by chat flags and the caller's privilege.
pub fn help(param: &CmdParam) {
    let page = match param.callback_id {
        Some(_) => {
            let Some(args) = pager::parse_callback_args(param.args) else {
                return;
            };

            if pager::expired(param, args.created_at) {
                return;
            }

            args.page
        }
        None => 1,
    };

    let Ok(cflags) = models::chat_get_flags(&param.bot.db, param.chat_id()) else {
        param.alert("Failed to get chat flags");
        return;
    };

    let entries = match visible_commands(param, cflags) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "command listing failed");
            param.alert("Error!");
            return;
        }
    };

    let pag = Pagination::new(page, entries.len());
    let (start, end) = pag.slice();

    let mut body = String::new();
    for (i, (name, description, flags)) in entries[start..end].iter().enumerate() {
        let admin = if (flags & cmd_flags::ADMIN) != 0 { ICON_ADMIN } else { "" };
        let nsfw = if (flags & cmd_flags::NSFW) != 0 { ICON_NSFW } else { "" };
        let extra = if (flags & cmd_flags::EXTRA) != 0 { ICON_EXTRA } else { "" };
        let ext = if (flags & cmd_flags::EXTERN) != 0 { ICON_EXTERN } else { "" };

        body.push_str(&format!(
            "{}\\. {} \\- {} {}{}{}{}\n",
            start + i + 1,
            escape_markdown(name),
            escape_markdown(description),
            admin,
            nsfw,
            extra,
            ext,
        ));
    }

    body.push_str(&format!(
        "\n```Legend:\n{ICON_ADMIN}: Admin, {ICON_EXTRA}: Extra, {ICON_NSFW}: NSFW, {ICON_EXTERN}: Extern```",
    ));

    let list = MessageList { ctx: "/help", title: "Command list", body, udata: "-" };
    if let Err(e) = list.deliver(param, &pag) {
        tracing::warn!(error = %e, "help list delivery failed");
        param.alert("Error!");
    }
}

/// (name, description, flags) of every command the caller may see, sorted
/// by name for stable pagination.
fn visible_commands(
    param: &CmdParam,
    cflags: i64,
) -> crate::Result<Vec<(String, String, i64)>> {
    let is_admin = param.is_admin().unwrap_or(false);
    let keep = |flags: i64| -> bool {
        if (flags & cmd_flags::HIDDEN) != 0 {
            return false;
        }
        if (flags & cmd_flags::ADMIN) != 0 && !is_admin {
            return false;
        }
        if (flags & cmd_flags::NSFW) != 0 && (cflags & chat_flags::ALLOW_NSFW) == 0 {
            return false;
        }
        if (flags & cmd_flags::EXTRA) != 0 && (cflags & chat_flags::ALLOW_EXTRA) == 0 {
            return false;
        }
        true
    };

    let mut entries: Vec<(String, String, i64)> = param
        .bot
        .commands
        .iter()
        .filter(|b| keep(b.flags))
        .map(|b| (b.name.to_string(), b.description.to_string(), b.flags))
        .collect();

    if (cflags & chat_flags::ALLOW_EXTERN) != 0 {
        for (name, description, flags) in models::cmd_extern_list(&param.bot.db)? {
            let flags = flags | cmd_flags::EXTERN;
            if keep(flags) {
                entries.push((name, description, flags));
            }
        }
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// Replies with the raw update JSON in a code block.
pub fn dump(param: &CmdParam) {
    let pretty = serde_json::to_string_pretty(param.json).unwrap_or_default();
    param.reply_format(&format!("```json\n{pretty}```"));
}

/// Replies with the raw admin-list JSON.
pub fn dump_admin(param: &CmdParam) {
    let (_, raw) = match param.bot.api.get_admin_list(param.chat_id()) {
        Ok(res) => res,
        Err(e) => {
            tracing::warn!(error = %e, "get_admin_list failed");
            param.reply_plain("Failed to get admin list");
            return;
        }
    };

    let pretty = serde_json::to_string_pretty(&raw).unwrap_or_default();
    param.reply_format(&format!("```json\n{pretty}```"));
}

/// `/sched <minutes> <text>` — schedules a formatted reply for later.
pub fn sched_message(param: &CmdParam) {
    const USAGE: &str = "Usage: /sched [minutes: 1-10080] message ...";

    let (minutes, text) = match param.args.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.parse::<i64>().ok(), rest.trim()),
        None => (None, ""),
    };

    let Some(minutes) = minutes.filter(|m| (1..=10080).contains(m)) else {
        param.reply_plain(USAGE);
        return;
    };

    if text.is_empty() {
        param.reply_plain(USAGE);
        return;
    }

    let res = models::sched_add_send(
        &param.bot.db,
        param.chat_id(),
        param.msg.id,
        text,
        minutes * 60,
        SCHED_SEND_EXPIRE_S,
    );

    match res {
        Ok(_) => param.reply_plain(&format!("Scheduled! Will be sent in {minutes} minute(s)")),
        Err(e) => {
            tracing::error!(error = %e, "sched add failed");
            param.reply_plain("Failed to schedule message");
        }
    }
}

/// Hidden callback target: deletes the message its button is attached to.
pub fn deleter(param: &CmdParam) {
    let Some(callback_id) = param.callback_id else {
        return;
    };

    if let Err(e) = param.bot.api.delete_message(param.chat_id(), param.msg.id) {
        tracing::warn!(error = %e, "delete_message failed");
        param.alert("Failed to delete message");
        return;
    }

    if let Err(e) = param.bot.api.answer_callback(callback_id, None, None, false) {
        tracing::warn!(error = %e, "answer_callback failed");
    }
}
