use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use log::{error, info};
use serenity::http::Http;
use serenity::model::id::UserId;

use crate::event_handler::BotState;

/// Counters kept by the background tasks, reported by `/status`
#[derive(Default)]
pub struct AutomationStats {
    tickets_auto_closed: AtomicU64,
    warnings_expired: AtomicU64,
    backups_created: AtomicU64,
    cleanup_actions: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tickets_auto_closed: u64,
    pub warnings_expired: u64,
    pub backups_created: u64,
    pub cleanup_actions: u64,
}

impl AutomationStats {
    pub fn note_auto_closed(&self, count: u64) {
        self.tickets_auto_closed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn note_warnings_expired(&self, count: u64) {
        self.warnings_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn note_backup(&self) {
        self.backups_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_cleanup(&self, count: u64) {
        self.cleanup_actions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tickets_auto_closed: self.tickets_auto_closed.load(Ordering::Relaxed),
            warnings_expired: self.warnings_expired.load(Ordering::Relaxed),
            backups_created: self.backups_created.load(Ordering::Relaxed),
            cleanup_actions: self.cleanup_actions.load(Ordering::Relaxed),
        }
    }
}

/// Spawn every periodic task. Called once from the ready event; `bot_user`
/// is recorded as the closer of auto-closed tickets.
pub fn spawn_tasks(state: Arc<BotState>, http: Arc<Http>, bot_user: UserId) {
    info!("starting automation tasks");
    tokio::spawn(ticket_sweep_loop(
        Arc::clone(&state),
        Arc::clone(&http),
        bot_user,
    ));
    tokio::spawn(warning_expiry_loop(Arc::clone(&state)));
    tokio::spawn(backup_loop(Arc::clone(&state)));
    tokio::spawn(cleanup_loop(state));
}

/// Close tickets whose channel has been quiet for too long
async fn ticket_sweep_loop(state: Arc<BotState>, http: Arc<Http>, bot_user: UserId) {
    let interval = Duration::from_secs(state.config.tickets.sweep_interval_minutes * 60);
    loop {
        tokio::time::sleep(interval).await;
        if let Err(why) = sweep_inactive_tickets(&state, &http, bot_user).await {
            error!("ticket sweep failed: {:?}", why);
        }
    }
}

async fn sweep_inactive_tickets(
    state: &BotState,
    http: &Arc<Http>,
    bot_user: UserId,
) -> Result<()> {
    let now = Utc::now();
    let stale = state.tickets.select_inactive(now).await;
    if stale.is_empty() {
        return Ok(());
    }

    let mut closed_count = 0;
    for ticket_id in stale {
        // the close may lose a race against a manual /ticket_close
        let closed = state
            .tickets
            .close(&ticket_id, bot_user, "Auto-closed due to inactivity", now)
            .await;
        if let Some(ticket) = closed {
            closed_count += 1;
            if let Err(why) = state.archive_ticket(http, &ticket).await {
                error!("failed to archive auto-closed {}: {:?}", ticket.id, why);
            }
        }
    }
    if closed_count > 0 {
        info!("auto-closed {} inactive tickets", closed_count);
        state.stats.note_auto_closed(closed_count);
        state
            .staff_log(
                http,
                &format!("Auto-closed {} inactive ticket(s)", closed_count),
            )
            .await;
    }
    Ok(())
}

/// Deactivate warnings past their expiry
async fn warning_expiry_loop(state: Arc<BotState>) {
    let interval = Duration::from_secs(state.config.automation.expiry_sweep_minutes * 60);
    loop {
        tokio::time::sleep(interval).await;
        match state.db.expire_warnings(Utc::now()).await {
            Ok(0) => {}
            Ok(expired) => {
                info!("expired {} warnings", expired);
                state.stats.note_warnings_expired(expired as u64);
            }
            Err(why) => error!("warning expiry failed: {:?}", why),
        }
    }
}

/// Periodic database backup
async fn backup_loop(state: Arc<BotState>) {
    let interval = Duration::from_secs(state.config.automation.backup_interval_hours * 3600);
    let backup_dir = std::path::Path::new(&state.config.database.dir).join("backups");
    loop {
        tokio::time::sleep(interval).await;
        match state.db.backup(&backup_dir, Utc::now()).await {
            Ok(_) => state.stats.note_backup(),
            Err(why) => error!("database backup failed: {:?}", why),
        }
    }
}

/// Daily removal of records past the retention window
async fn cleanup_loop(state: Arc<BotState>) {
    let interval = Duration::from_secs(24 * 3600);
    loop {
        tokio::time::sleep(interval).await;
        match state
            .db
            .cleanup_old_records(Utc::now(), state.config.automation.log_retention_days)
            .await
        {
            Ok(0) => {}
            Ok(cleaned) => {
                info!("retention cleanup removed {} records", cleaned);
                state.stats.note_cleanup(cleaned as u64);
            }
            Err(why) => error!("retention cleanup failed: {:?}", why),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_into_snapshots() {
        let stats = AutomationStats::default();
        stats.note_auto_closed(2);
        stats.note_auto_closed(1);
        stats.note_warnings_expired(5);
        stats.note_backup();
        stats.note_cleanup(10);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tickets_auto_closed, 3);
        assert_eq!(snapshot.warnings_expired, 5);
        assert_eq!(snapshot.backups_created, 1);
        assert_eq!(snapshot.cleanup_actions, 10);
    }
}
