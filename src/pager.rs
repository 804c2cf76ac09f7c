//! Paginated list messages. A list is a MarkdownV2 text with Prev/Next
//! inline buttons; button callback data is `context page timestamp udata`,
//! which routes back through the command layer into the same handler.

use chrono::Utc;

use crate::Result;
use crate::cmd::CmdParam;
use crate::tg_api::InlineButton;

/// Items shown per page.
pub const PAGE_SIZE: usize = 8;

/// Lists stop responding to their buttons after this long.
pub const LIST_TIMEOUT_S: i64 = 3600;

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u32,
}

impl Pagination {
    pub fn new(page: u32, total_items: usize) -> Self {
        Self {
            page: page.max(1),
            per_page: PAGE_SIZE as u32,
            total_items: total_items as u32,
        }
    }

    pub fn total_pages(&self) -> u32 {
        self.total_items.div_ceil(self.per_page).max(1)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    /// Item index range of the current page, clamped to the item count.
    pub fn slice(&self) -> (usize, usize) {
        let start = ((self.page - 1) * self.per_page) as usize;
        let end = (start + self.per_page as usize).min(self.total_items as usize);
        (start.min(end), end)
    }
}

/// Callback arguments of a pagination button: `page timestamp udata`.
#[derive(Debug, PartialEq)]
pub struct CallbackArgs<'a> {
    pub page: u32,
    pub created_at: i64,
    pub udata: &'a str,
}

pub fn parse_callback_args(args: &str) -> Option<CallbackArgs<'_>> {
    let mut it = args.splitn(3, char::is_whitespace);
    let page = it.next()?.parse().ok()?;
    let created_at = it.next()?.parse().ok()?;
    let udata = it.next().unwrap_or("").trim();

    Some(CallbackArgs { page, created_at, udata })
}

/// Answers "Expired!" when a list callback is older than the timeout.
/// Returns true when the caller should stop.
pub fn expired(param: &CmdParam, created_at: i64) -> bool {
    if Utc::now().timestamp() - created_at < LIST_TIMEOUT_S {
        return false;
    }

    if let Some(id) = param.callback_id
        && let Err(e) = param.bot.api.answer_callback(id, Some("Expired!"), None, true)
    {
        tracing::warn!(error = %e, "answer_callback failed");
    }

    true
}

pub struct MessageList<'a> {
    /// Command name the buttons route back to, e.g. `/help`.
    pub ctx: &'a str,
    pub title: &'a str,
    /// Pre-escaped MarkdownV2 body.
    pub body: String,
    /// Opaque handler state carried through the callback data.
    pub udata: &'a str,
}

impl MessageList<'_> {
    /// Sends a new list message, or edits the existing one when handling a
    /// pagination callback (answering the callback either way).
    pub fn deliver(&self, param: &CmdParam, pag: &Pagination) -> Result<()> {
        let text = self.text(pag);
        let rows = vec![self.buttons(pag)];

        match param.callback_id {
            Some(id) => {
                self.edit(param, &text, &rows)?;
                param.bot.api.answer_callback(id, None, None, false)
            }
            None => {
                param.bot.api.send_inline_keyboard(
                    param.msg.chat.id,
                    Some(param.msg.id),
                    &text,
                    &rows,
                )?;
                Ok(())
            }
        }
    }

    fn edit(&self, param: &CmdParam, text: &str, rows: &[Vec<InlineButton>]) -> Result<()> {
        param
            .bot
            .api
            .edit_inline_keyboard(param.msg.chat.id, param.msg.id, text, rows)
    }

    fn text(&self, pag: &Pagination) -> String {
        format!(
            "*{}*\n{}\n\n\\-\\-\\-\nPage\\: \\[{}\\]\\:\\[{}\\] \\- Total\\: {}",
            self.title,
            self.body,
            pag.page,
            pag.total_pages(),
            pag.total_items,
        )
    }

    fn buttons(&self, pag: &Pagination) -> Vec<InlineButton> {
        let now = Utc::now().timestamp();
        let mut row = Vec::with_capacity(2);

        if pag.page > 1 {
            row.push(InlineButton::callback(
                "Prev",
                format!("{} {} {} {}", self.ctx, pag.page - 1, now, self.udata),
            ));
        }

        if pag.has_next() {
            row.push(InlineButton::callback(
                "Next",
                format!("{} {} {} {}", self.ctx, pag.page + 1, now, self.udata),
            ));
        }

        row
    }
}
