//! Extra builtins: commands backed by third-party APIs, gated behind the
//! chat's ALLOW_EXTRA flag in the help listing.

use std::time::Duration;

use serde::Deserialize;

use crate::cmd::CmdParam;
use crate::models::{self, chat_flags};
use crate::pager::{self, MessageList, Pagination};
use crate::tg::escape_markdown;

const ANIME_SCHED_URL: &str = "https://api.jikan.moe/v4/schedules";
const ANIME_SCHED_LIMIT: u32 = 3;
const ANIME_SCHED_FILTERS: &[&str] = &[
    "sunday", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "unknown",
    "other",
];

#[derive(Debug, Deserialize)]
struct AnimeSchedResponse {
    pagination: AnimeSchedPagination,
    #[serde(default)]
    data: Vec<AnimeSchedItem>,
}

#[derive(Debug, Deserialize)]
struct AnimeSchedPagination {
    #[serde(default)]
    items: AnimeSchedItems,
}

#[derive(Debug, Default, Deserialize)]
struct AnimeSchedItems {
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct AnimeSchedItem {
    title: Option<String>,
    url: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    source: Option<String>,
    episodes: Option<u32>,
    score: Option<f64>,
    duration: Option<String>,
}

/// `/anime_sched <day>` — weekly anime schedule from the Jikan API,
/// paginated through the inline-keyboard callback protocol.
pub fn anime_sched(param: &CmdParam) {
    let (page, filter_arg) = match param.callback_id {
        Some(_) => {
            let Some(args) = pager::parse_callback_args(param.args) else {
                return;
            };

            if pager::expired(param, args.created_at) {
                return;
            }

            (args.page, args.udata.to_string())
        }
        None => (1, param.arg_list().first().map(|s| s.to_lowercase()).unwrap_or_default()),
    };

    let Some(filter) = ANIME_SCHED_FILTERS.iter().copied().find(|f| *f == filter_arg) else {
        param.reply_plain(
            "Invalid argument!\n  Allowed: [sunday, monday, tuesday, wednesday, thursday, \
             friday, saturday, unknown, other]",
        );
        return;
    };

    let show_nsfw = models::chat_get_flags(&param.bot.db, param.chat_id())
        .map(|f| (f & chat_flags::ALLOW_NSFW) != 0)
        .unwrap_or(false);

    let sched = match fetch(filter, page, show_nsfw) {
        Ok(sched) => sched,
        Err(e) => {
            tracing::warn!(error = %e, "anime schedule fetch failed");
            param.alert("Failed to get the anime schedule list");
            return;
        }
    };

    let pag = Pagination {
        page,
        per_page: ANIME_SCHED_LIMIT,
        total_items: sched.pagination.items.total,
    };

    let mut body = String::new();
    let (start, _) = pag.slice();
    for (i, item) in sched.data.iter().enumerate() {
        body.push_str(&item.render(start + i + 1));
    }

    if body.is_empty() {
        body.push_str("\\[empty\\]");
    }

    let list = MessageList { ctx: "/anime_sched", title: "Anime Schedule", body, udata: filter };
    if let Err(e) = list.deliver(param, &pag) {
        tracing::warn!(error = %e, "anime schedule delivery failed");
        param.alert("Error!");
    }
}

fn fetch(filter: &str, page: u32, show_nsfw: bool) -> crate::Result<AnimeSchedResponse> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let resp = client
        .get(ANIME_SCHED_URL)
        .query(&[
            ("filter", filter.to_string()),
            ("page", page.to_string()),
            ("limit", ANIME_SCHED_LIMIT.to_string()),
            ("sfw", (!show_nsfw).to_string()),
        ])
        .send()?;

    Ok(resp.json()?)
}

impl AnimeSchedItem {
    fn render(&self, index: usize) -> String {
        let title = escape_markdown(self.title.as_deref().unwrap_or("-"));
        let line = match &self.url {
            Some(url) => format!("{index}\\. [{title}]({url})\n"),
            None => format!("{index}\\. *{title}*\n"),
        };

        let mut out = line;
        out.push_str(&format!(
            "    {} \\- {} \\- {} eps \\- {}\n    score\\: {}\n",
            escape_markdown(self.kind.as_deref().unwrap_or("-")),
            escape_markdown(self.source.as_deref().unwrap_or("-")),
            self.episodes.map(|e| e.to_string()).unwrap_or_else(|| "?".into()),
            escape_markdown(self.duration.as_deref().unwrap_or("-")),
            self.score.map(|s| escape_markdown(&format!("{s:.2}"))).unwrap_or_else(|| "?".into()),
        ));

        out
    }
}
