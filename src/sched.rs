//! Scheduler: the ingress tick admits at most one in-flight sweep, and the
//! sweep itself runs on the worker pool. Picked rows are deleted in the
//! same sweep, before their jobs complete; an action never executes twice.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;

use crate::models::{self, SchedAction, SchedKind};
use crate::tg_api::TextMode;
use crate::Bot;

/// Rows picked per sweep.
pub const BATCH_SIZE: usize = 32;

/// Called from the 1-second tick. Drops the tick when a sweep is already
/// in flight.
pub fn tick(bot: &Arc<Bot>) {
    let admitted = bot
        .sched_ready
        .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        .is_ok();

    if !admitted {
        return;
    }

    let job_bot = bot.clone();
    let submitted = bot.workers.submit(Box::new(move || {
        run_tick(&job_bot);
        job_bot.sched_ready.store(true, Ordering::Release);
    }));

    if let Err(e) = submitted {
        tracing::warn!(error = %e, "scheduler sweep not enqueued");
        bot.sched_ready.store(true, Ordering::Release);
    }
}

/// One sweep: pick due rows, enqueue one execute-job per row, then delete
/// the picked ids in a single statement.
pub fn run_tick(bot: &Arc<Bot>) {
    let now = Utc::now().timestamp();
    let actions = match models::sched_get_due(&bot.db, now, BATCH_SIZE) {
        Ok(actions) => actions,
        Err(e) => {
            tracing::error!(error = %e, "scheduled action query failed");
            return;
        }
    };

    if actions.is_empty() {
        return;
    }

    let mut picked = Vec::with_capacity(actions.len());
    for action in actions {
        let id = action.id;
        let job_bot = bot.clone();
        if let Err(e) = bot.workers.submit(Box::new(move || execute(&job_bot, action))) {
            tracing::warn!(id, error = %e, "scheduled action not enqueued");
            break;
        }

        picked.push(id);
    }

    if let Err(e) = models::sched_delete(&bot.db, &picked, now) {
        tracing::error!(error = %e, "scheduled action delete failed");
    }
}

/// Executes one action. Failures are logged; they neither abort the sweep
/// nor roll back the deletion.
fn execute(bot: &Bot, action: SchedAction) {
    let reply_to = (action.message_id != 0).then_some(action.message_id);

    let res = match action.kind {
        SchedKind::Send => {
            let Some(value) = action.value.as_deref().filter(|v| !v.is_empty()) else {
                tracing::warn!(id = action.id, "scheduled send without value, dropping");
                return;
            };

            bot.api
                .send_text(TextMode::Format, action.chat_id, reply_to, value)
                .map(|_| ())
        }
        SchedKind::Delete => bot.api.delete_message(action.chat_id, action.message_id),
    };

    if let Err(e) = res {
        tracing::warn!(
            id = action.id,
            chat_id = action.chat_id,
            error = %e,
            "scheduled action failed",
        );
    }
}
