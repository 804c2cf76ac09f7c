//! Update dispatcher: decodes the raw webhook JSON into the domain model
//! and selects a handler path. Runs on worker threads; every failure is
//! contained here and logged.

use serde::Deserialize;
use serde_json::Value;

use crate::models;
use crate::tg::{self, MessageKind, escape_markdown};
use crate::tg_api::TextMode;
use crate::{Bot, cmd};

/// Seconds before a join/leave notice is deleted.
const NOTICE_DELETE_DELAY_S: i64 = 3;
/// Seconds before a welcome message is deleted.
const WELCOME_DELETE_DELAY_S: i64 = 10;
const NOTICE_EXPIRE_S: i64 = 5;

/// Entry point for one webhook delivery. Ownership of the JSON tree was
/// transferred by the ingress at job hand-off.
pub fn handle(bot: &Bot, json: Value) {
    let update = match tg::Update::deserialize(&json) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(error = %e, "unparsable update, dropping");
            return;
        }
    };

    tracing::debug!(update_id = update.update_id, "handling update");

    if let Some(msg) = &update.message {
        handle_message(bot, msg, &json);
    } else if let Some(cb) = &update.callback_query {
        handle_callback(bot, cb, &json);
    }
}

fn handle_message(bot: &Bot, msg: &tg::Message, json: &Value) {
    let Some(from) = &msg.from else {
        tracing::debug!(message_id = msg.id, "message without sender, dropping");
        return;
    };

    match msg.kind() {
        MessageKind::Command => {
            let Some(text) = msg.text.as_deref() else {
                return;
            };

            cmd::exec(bot, msg, from, None, json, text);
        }
        MessageKind::NewMember => handle_member_new(bot, msg),
        MessageKind::LeftMember => handle_member_leave(bot, msg),
        _ => {}
    }
}

fn handle_callback(bot: &Bot, cb: &tg::CallbackQuery, json: &Value) {
    let (Some(msg), Some(data)) = (&cb.message, cb.data.as_deref()) else {
        tracing::debug!(callback_id = %cb.id, "callback without message or data, dropping");
        return;
    };

    cmd::exec(bot, msg, &cb.from, Some(&cb.id), json, data);
}

/// Someone joined. If it was this bot, seed the chat state; otherwise tidy
/// up the join notice and greet human members.
fn handle_member_new(bot: &Bot, msg: &tg::Message) {
    let chat_id = msg.chat.id;

    if msg.new_chat_members.iter().any(|u| u.id == bot.cfg.bot_id) {
        admin_load(bot, chat_id);
        if let Err(e) = models::cmd_extern_disabled_seed(&bot.db, chat_id) {
            tracing::error!(chat_id, error = %e, "externals-disabled seed failed");
        }
        return;
    }

    if bot_is_admin(bot, chat_id) {
        schedule_delete_or_now(bot, chat_id, msg.id, NOTICE_DELETE_DELAY_S);
    }

    for user in msg.new_chat_members.iter().filter(|u| !u.is_bot) {
        welcome(bot, chat_id, user);
    }
}

/// Someone left: the notice gets the same cleanup as a join notice.
fn handle_member_leave(bot: &Bot, msg: &tg::Message) {
    if msg.left_chat_member.as_ref().is_some_and(|u| u.id == bot.cfg.bot_id) {
        return;
    }

    if bot_is_admin(bot, msg.chat.id) {
        schedule_delete_or_now(bot, msg.chat.id, msg.id, NOTICE_DELETE_DELAY_S);
    }
}

/// Sends a mention greeting and schedules it for deletion.
fn welcome(bot: &Bot, chat_id: i64, user: &tg::User) {
    let text = format!(
        "{}\n[{}](tg://user?id={})",
        escape_markdown("hello"),
        escape_markdown(&user.first_name),
        user.id,
    );

    let message_id = match bot.api.send_text(TextMode::Format, chat_id, None, &text) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(chat_id, error = %e, "welcome send failed");
            return;
        }
    };

    if let Err(e) = models::sched_add_delete(
        &bot.db,
        chat_id,
        message_id,
        WELCOME_DELETE_DELAY_S,
        NOTICE_EXPIRE_S,
    ) {
        tracing::warn!(chat_id, error = %e, "welcome delete scheduling failed");
    }
}

/// Schedules a delayed delete, falling back to an immediate delete when
/// the row cannot be written.
fn schedule_delete_or_now(bot: &Bot, chat_id: i64, message_id: i64, delay_s: i64) {
    let scheduled =
        models::sched_add_delete(&bot.db, chat_id, message_id, delay_s, NOTICE_EXPIRE_S);

    match scheduled {
        Ok(n) if n > 0 => {}
        _ => {
            if let Err(e) = bot.api.delete_message(chat_id, message_id) {
                tracing::warn!(chat_id, message_id, error = %e, "delete_message failed");
            }
        }
    }
}

fn bot_is_admin(bot: &Bot, chat_id: i64) -> bool {
    models::admin_get_privileges(&bot.db, chat_id, bot.cfg.bot_id)
        .map(|p| p > 0)
        .unwrap_or(false)
}

/// Refreshes the stored admin set from the platform. Used on self-join;
/// unlike `/admin_reload` there is no caller to authorize.
fn admin_load(bot: &Bot, chat_id: i64) {
    let (admins, _) = match bot.api.get_admin_list(chat_id) {
        Ok(res) => res,
        Err(e) => {
            tracing::warn!(chat_id, error = %e, "get_admin_list failed");
            return;
        }
    };

    let rows: Vec<models::AdminRow> = admins
        .iter()
        .map(|admin| models::AdminRow {
            chat_id,
            user_id: admin.user.id,
            privileges: admin.privileges(),
            is_anonymous: admin.is_anonymous,
        })
        .collect();

    if let Err(e) = models::admin_reload(&bot.db, chat_id, &rows) {
        tracing::error!(chat_id, error = %e, "admin reload failed");
    }
}
