//! Outbound Telegram Bot API client. Calls are blocking by design: they
//! only ever run on worker threads or from the one-shot CLI commands,
//! never on the ingress loop.

use std::time::Duration;

use serde_json::{Value, json};

use crate::tg::ChatAdmin;
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ALLOWED_UPDATES: &str = "[\"message\",\"callback_query\"]";

/// Maximum admins taken from one `getChatAdministrators` response.
pub const ADMIN_LIST_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMode {
    Plain,
    Format,
}

/// One inline keyboard button: either a callback payload or a URL.
#[derive(Debug, Clone)]
pub struct InlineButton {
    pub text: String,
    pub data: Option<String>,
    pub url: Option<String>,
}

impl InlineButton {
    pub fn callback(text: &str, data: String) -> Self {
        Self { text: text.to_string(), data: Some(data), url: None }
    }
}

pub struct TgApi {
    base: String,
    client: reqwest::blocking::Client,
}

impl TgApi {
    /// `base` is the API root with the token appended, e.g.
    /// `https://api.telegram.org/bot12345:abcdef`.
    pub fn new(base: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { base, client })
    }

    /// Sends a text message, optionally as a reply. Returns the new
    /// message id.
    pub fn send_text(
        &self,
        mode: TextMode,
        chat_id: i64,
        reply_to: Option<i64>,
        text: &str,
    ) -> Result<i64> {
        let mut params = vec![
            ("chat_id".to_string(), chat_id.to_string()),
            ("text".to_string(), text.to_string()),
        ];

        if let Some(reply_to) = reply_to {
            params.push(("reply_to_message_id".into(), reply_to.to_string()));
        }

        if mode == TextMode::Format {
            params.push(("parse_mode".into(), "MarkdownV2".into()));
        }

        let result = self.call("sendMessage", &params)?;
        Ok(result["message_id"].as_i64().unwrap_or(0))
    }

    /// Sends a photo by URL with an optional caption.
    pub fn send_photo(
        &self,
        chat_id: i64,
        reply_to: Option<i64>,
        caption: Option<&str>,
        src: &str,
    ) -> Result<()> {
        let mut params = vec![
            ("chat_id".to_string(), chat_id.to_string()),
            ("photo".to_string(), src.to_string()),
        ];

        if let Some(reply_to) = reply_to {
            params.push(("reply_to_message_id".into(), reply_to.to_string()));
        }

        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            params.push(("caption".into(), caption.to_string()));
        }

        self.call("sendPhoto", &params)?;
        Ok(())
    }

    /// Sends a MarkdownV2 message with inline keyboard rows. Returns the
    /// new message id.
    pub fn send_inline_keyboard(
        &self,
        chat_id: i64,
        reply_to: Option<i64>,
        text: &str,
        rows: &[Vec<InlineButton>],
    ) -> Result<i64> {
        let mut params = vec![
            ("chat_id".to_string(), chat_id.to_string()),
            ("parse_mode".to_string(), "MarkdownV2".to_string()),
            ("text".to_string(), text.to_string()),
            ("reply_markup".to_string(), keyboard_markup(rows)),
        ];

        if let Some(reply_to) = reply_to {
            params.push(("reply_to_message_id".into(), reply_to.to_string()));
        }

        let result = self.call("sendMessage", &params)?;
        Ok(result["message_id"].as_i64().unwrap_or(0))
    }

    /// Replaces the text and keyboard of a previously sent message.
    pub fn edit_inline_keyboard(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        rows: &[Vec<InlineButton>],
    ) -> Result<()> {
        let params = [
            ("chat_id".to_string(), chat_id.to_string()),
            ("message_id".to_string(), message_id.to_string()),
            ("parse_mode".to_string(), "MarkdownV2".to_string()),
            ("text".to_string(), text.to_string()),
            ("reply_markup".to_string(), keyboard_markup(rows)),
        ];

        self.call("editMessageText", &params)?;
        Ok(())
    }

    pub fn answer_callback(
        &self,
        id: &str,
        text: Option<&str>,
        url: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        let mut params = vec![
            ("callback_query_id".to_string(), id.to_string()),
            ("show_alert".to_string(), show_alert.to_string()),
        ];

        if let Some(text) = text {
            params.push(("text".into(), text.to_string()));
        }

        if let Some(url) = url {
            params.push(("url".into(), url.to_string()));
        }

        self.call("answerCallbackQuery", &params)?;
        Ok(())
    }

    pub fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let params = [
            ("chat_id".to_string(), chat_id.to_string()),
            ("message_id".to_string(), message_id.to_string()),
        ];

        self.call("deleteMessage", &params)?;
        Ok(())
    }

    /// Current admin set of a chat, capped at [`ADMIN_LIST_SIZE`], plus the
    /// raw response for dump-style consumers.
    pub fn get_admin_list(&self, chat_id: i64) -> Result<(Vec<ChatAdmin>, Value)> {
        let params = [("chat_id".to_string(), chat_id.to_string())];
        let result = self.call("getChatAdministrators", &params)?;

        let mut list = Vec::new();
        if let Some(items) = result.as_array() {
            for item in items.iter().take(ADMIN_LIST_SIZE) {
                match serde_json::from_value::<ChatAdmin>(item.clone()) {
                    Ok(admin) => list.push(admin),
                    Err(e) => tracing::warn!(error = %e, "skipping unparsable admin entry"),
                }
            }
        }

        Ok((list, result))
    }

    pub fn get_me(&self) -> Result<crate::tg::User> {
        let result = self.call("getMe", &[])?;
        serde_json::from_value(result).map_err(|e| Error::Api(format!("getMe: {e}")))
    }

    /*
     * Webhook management (CLI surface)
     */

    pub fn webhook_set(&self, hook_url: &str, hook_path: &str, secret: &str) -> Result<Value> {
        let params = [
            ("url".to_string(), format!("{hook_url}{hook_path}")),
            ("allowed_updates".to_string(), ALLOWED_UPDATES.to_string()),
            ("drop_pending_updates".to_string(), "true".to_string()),
            ("secret_token".to_string(), secret.to_string()),
        ];

        self.call("setWebhook", &params)
    }

    pub fn webhook_del(&self) -> Result<Value> {
        let params = [("drop_pending_updates".to_string(), "true".to_string())];
        self.call("deleteWebhook", &params)
    }

    pub fn webhook_info(&self) -> Result<Value> {
        self.call("getWebhookInfo", &[])
    }

    /// Performs one API call and unwraps the `{"ok": true, "result": ...}`
    /// envelope.
    fn call(&self, method: &str, params: &[(String, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base, method);
        let resp = self.client.get(&url).query(params).send()?;
        let body: Value = resp.json()?;

        if !body["ok"].as_bool().unwrap_or(false) {
            let desc = body["description"].as_str().unwrap_or("request failed");
            return Err(Error::Api(format!("{method}: {desc}")));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

fn keyboard_markup(rows: &[Vec<InlineButton>]) -> String {
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|btn| {
                    let mut item = json!({ "text": btn.text });
                    if let Some(data) = &btn.data {
                        item["callback_data"] = json!(data);
                    } else if let Some(url) = &btn.url {
                        item["url"] = json!(url);
                    }
                    item
                })
                .collect()
        })
        .collect();

    json!({ "inline_keyboard": rows }).to_string()
}
