use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, TimeZone, Utc};
use futures::lock::Mutex;
use log::info;
use rusqlite::{backup::Backup, params, Connection, Rows};
use serenity::model::id::{ChannelId, UserId};

use crate::ticket_system::{Ticket, TicketCategory, TicketStatus, Urgency};

/// One violation of a rule by a user, as recorded in the append-only log
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationRecord {
    pub user_id: UserId,
    pub rule_id: String,
    /// Punishment tag, e.g. "mute"
    pub punishment: String,
    pub duration_minutes: Option<i64>,
    pub fine: i64,
    pub details: String,
    pub issued_by: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// SQLite store for tickets, violations, warnings, announcements and the
/// staff action log
pub struct CommunityDb {
    conn: Arc<Mutex<Connection>>,
}

impl CommunityDb {
    /// Open (or create) the database under `dir`
    pub fn new(dir: &Path) -> Result<CommunityDb> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create database directory {}", dir.display()))?;
        let path = dir.join("community.db");
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::create_tables(&conn)?;
        Ok(CommunityDb {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<CommunityDb> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::create_tables(&conn)?;
        Ok(CommunityDb {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn create_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tickets (
                ticket_id       VARCHAR(20) PRIMARY KEY,
                user_id         VARCHAR(20) NOT NULL,
                username        TEXT        NOT NULL,
                channel_id      VARCHAR(20) NOT NULL,
                category        TEXT        NOT NULL,
                urgency         TEXT        NOT NULL,
                priority        INTEGER     NOT NULL DEFAULT 0,
                description     TEXT        NOT NULL,
                created_at      TIMESTAMP   NOT NULL,
                last_activity   TIMESTAMP   NOT NULL,
                status          TEXT        NOT NULL DEFAULT 'open',
                assigned_staff  VARCHAR(20),
                staff_involved  TEXT        NOT NULL DEFAULT '[]',
                closed_at       TIMESTAMP,
                closed_by       VARCHAR(20),
                close_reason    TEXT
            );
            CREATE TABLE IF NOT EXISTS rule_violations (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id          VARCHAR(20) NOT NULL,
                rule_id          VARCHAR(20) NOT NULL,
                punishment       TEXT        NOT NULL,
                duration_minutes INTEGER,
                fine             INTEGER     NOT NULL DEFAULT 0,
                details          TEXT        NOT NULL,
                issued_by        VARCHAR(20) NOT NULL,
                issued_at        TIMESTAMP   NOT NULL,
                expires_at       TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS user_warnings (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     VARCHAR(20) NOT NULL,
                warned_by   VARCHAR(20) NOT NULL,
                reason      TEXT        NOT NULL,
                rule_id     VARCHAR(20),
                created_at  TIMESTAMP   NOT NULL,
                expires_at  TIMESTAMP   NOT NULL,
                is_active   INTEGER     NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS announcements (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                title         TEXT        NOT NULL,
                content       TEXT        NOT NULL,
                author_id     VARCHAR(20) NOT NULL,
                author_name   TEXT        NOT NULL,
                ping_everyone INTEGER     NOT NULL DEFAULT 0,
                created_at    TIMESTAMP   NOT NULL,
                channel_id    VARCHAR(20),
                message_id    VARCHAR(20)
            );
            CREATE TABLE IF NOT EXISTS action_logs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                action_type TEXT        NOT NULL,
                staff_id    VARCHAR(20) NOT NULL,
                details     TEXT        NOT NULL,
                channel_id  VARCHAR(20),
                timestamp   TIMESTAMP   NOT NULL
            );",
        )
        .context("failed to create database tables")?;
        Ok(())
    }

    /// Insert a freshly opened ticket
    pub async fn insert_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO tickets (
                    ticket_id, user_id, username, channel_id, category, urgency,
                    priority, description, created_at, last_activity, status,
                    staff_involved
                )
                VALUES
                    (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params!(
                    ticket.id,
                    ticket.user_id.to_string(),
                    ticket.username,
                    ticket.channel_id.to_string(),
                    ticket.category.name(),
                    ticket.urgency.name(),
                    ticket.priority,
                    ticket.description,
                    ticket.created_at.timestamp(),
                    ticket.last_activity.timestamp(),
                    "open",
                    staff_involved_json(&ticket.staff_involved),
                ),
            )
            .with_context(|| format!("failed to insert ticket {}", ticket.id))?;
        Ok(())
    }

    /// Persist activity bookkeeping for an open ticket
    pub async fn update_ticket_activity(&self, ticket: &Ticket) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "UPDATE tickets
                SET
                    last_activity = ?2,
                    staff_involved = ?3,
                    assigned_staff = ?4
                WHERE
                    ticket_id = ?1",
                params!(
                    ticket.id,
                    ticket.last_activity.timestamp(),
                    staff_involved_json(&ticket.staff_involved),
                    ticket.assigned_staff.map(|staff| staff.to_string()),
                ),
            )
            .with_context(|| format!("failed to update ticket {}", ticket.id))?;
        Ok(())
    }

    /// Mark a ticket closed
    pub async fn close_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "UPDATE tickets
                SET
                    status = 'closed',
                    closed_at = ?2,
                    closed_by = ?3,
                    close_reason = ?4,
                    staff_involved = ?5
                WHERE
                    ticket_id = ?1",
                params!(
                    ticket.id,
                    ticket.closed_at.map(|at| at.timestamp()),
                    ticket.closed_by.map(|by| by.to_string()),
                    ticket.close_reason,
                    staff_involved_json(&ticket.staff_involved),
                ),
            )
            .with_context(|| format!("failed to close ticket {}", ticket.id))?;
        Ok(())
    }

    // Parse persisted rows back into tickets
    fn rows_to_tickets(rows: Rows<'_>) -> impl Iterator<Item = Ticket> + '_ {
        rows.mapped(|row| {
            let ticket_id: String = row.get(0)?;
            let user_id: String = row.get(1)?;
            let username: String = row.get(2)?;
            let channel_id: String = row.get(3)?;
            let category: String = row.get(4)?;
            let urgency: String = row.get(5)?;
            let priority: i64 = row.get(6)?;
            let description: String = row.get(7)?;
            let created_at: i64 = row.get(8)?;
            let last_activity: i64 = row.get(9)?;
            let assigned_staff: Option<String> = row.get(10)?;
            let staff_involved: String = row.get(11)?;
            Ok((
                ticket_id,
                user_id,
                username,
                channel_id,
                category,
                urgency,
                priority,
                description,
                created_at,
                last_activity,
                assigned_staff,
                staff_involved,
            ))
        })
        .map(|row| -> Result<Ticket> {
            let (
                ticket_id,
                user_id,
                username,
                channel_id,
                category,
                urgency,
                priority,
                description,
                created_at,
                last_activity,
                assigned_staff,
                staff_involved,
            ) = row?;
            let staff_involved: Vec<String> =
                serde_json::from_str(&staff_involved).unwrap_or_default();
            Ok(Ticket {
                id: ticket_id,
                user_id: UserId(user_id.parse()?),
                username,
                channel_id: ChannelId(channel_id.parse()?),
                category: TicketCategory::from_name(&category),
                urgency: Urgency::from_name(&urgency),
                priority,
                description,
                created_at: parse_timestamp(created_at)?,
                last_activity: parse_timestamp(last_activity)?,
                status: TicketStatus::Open,
                assigned_staff: match assigned_staff {
                    Some(staff) => Some(UserId(staff.parse()?)),
                    None => None,
                },
                staff_involved: staff_involved
                    .iter()
                    .filter_map(|staff| staff.parse().ok().map(UserId))
                    .collect(),
                closed_at: None,
                closed_by: None,
                close_reason: None,
            })
        })
        .filter_map(|row| row.ok())
    }

    /// Open tickets, used to rebuild in-memory state at startup
    pub async fn active_tickets(&self) -> Result<Vec<Ticket>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT
                    ticket_id, user_id, username, channel_id, category, urgency,
                    priority, description, created_at, last_activity,
                    assigned_staff, staff_involved
                FROM
                    tickets
                WHERE
                    status = 'open'",
            )
            .context("failed to prepare active ticket query")?;
        let tickets = Self::rows_to_tickets(
            stmt.query(params!())
                .context("failed to read active tickets")?,
        )
        .collect::<Vec<_>>();
        Ok(tickets)
    }

    /// Highest ticket number ever issued, used to seed the id counter
    pub async fn max_ticket_number(&self) -> Result<u32> {
        let max: Option<i64> = self
            .conn
            .lock()
            .await
            .query_row(
                "SELECT MAX(CAST(SUBSTR(ticket_id, 5) AS INTEGER)) FROM tickets",
                params!(),
                |row| row.get(0),
            )
            .context("failed to read ticket counter")?;
        Ok(max.unwrap_or(0) as u32)
    }

    /// Append a violation to the log
    pub async fn log_violation(&self, record: &ViolationRecord) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO rule_violations (
                    user_id, rule_id, punishment, duration_minutes, fine,
                    details, issued_by, issued_at, expires_at
                )
                VALUES
                    (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params!(
                    record.user_id.to_string(),
                    record.rule_id,
                    record.punishment,
                    record.duration_minutes,
                    record.fine,
                    record.details,
                    record.issued_by.to_string(),
                    record.issued_at.timestamp(),
                    record.expires_at.map(|at| at.timestamp()),
                ),
            )
            .with_context(|| format!("failed to log violation of {}", record.rule_id))?;
        Ok(())
    }

    /// Number of times a user violated a rule, counted regardless of expiry
    pub async fn count_violations(&self, user_id: UserId, rule_id: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .await
            .query_row(
                "SELECT COUNT(*) FROM rule_violations WHERE user_id = ?1 AND rule_id = ?2",
                params!(user_id.to_string(), rule_id),
                |row| row.get(0),
            )
            .with_context(|| format!("failed to count violations of {}", rule_id))?;
        Ok(count as usize)
    }

    /// Record a warning that expires after `expires_days`
    pub async fn add_warning(
        &self,
        user_id: UserId,
        warned_by: UserId,
        reason: &str,
        rule_id: Option<&str>,
        now: DateTime<Utc>,
        expires_days: i64,
    ) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO user_warnings (
                    user_id, warned_by, reason, rule_id, created_at, expires_at
                )
                VALUES
                    (?1, ?2, ?3, ?4, ?5, ?6)",
                params!(
                    user_id.to_string(),
                    warned_by.to_string(),
                    reason,
                    rule_id,
                    now.timestamp(),
                    (now + chrono::Duration::days(expires_days)).timestamp(),
                ),
            )
            .context("failed to record warning")?;
        Ok(())
    }

    /// Deactivate warnings whose expiry has passed, returning how many
    pub async fn expire_warnings(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self
            .conn
            .lock()
            .await
            .execute(
                "UPDATE user_warnings
                SET
                    is_active = 0
                WHERE
                    is_active = 1
                    AND expires_at < ?1",
                params!(now.timestamp()),
            )
            .context("failed to expire warnings")?;
        Ok(expired)
    }

    /// Record a posted announcement
    pub async fn insert_announcement(
        &self,
        title: &str,
        content: &str,
        author_id: UserId,
        author_name: &str,
        ping_everyone: bool,
        channel_id: ChannelId,
        message_id: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO announcements (
                    title, content, author_id, author_name, ping_everyone,
                    created_at, channel_id, message_id
                )
                VALUES
                    (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params!(
                    title,
                    content,
                    author_id.to_string(),
                    author_name,
                    ping_everyone,
                    now.timestamp(),
                    channel_id.to_string(),
                    message_id.to_string(),
                ),
            )
            .context("failed to record announcement")?;
        Ok(())
    }

    /// Append to the staff action log
    pub async fn log_action(
        &self,
        action_type: &str,
        staff_id: UserId,
        details: &str,
        channel_id: Option<ChannelId>,
    ) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO action_logs (action_type, staff_id, details, channel_id, timestamp)
                VALUES
                    (?1, ?2, ?3, ?4, ?5)",
                params!(
                    action_type,
                    staff_id.to_string(),
                    details,
                    channel_id.map(|channel| channel.to_string()),
                    Utc::now().timestamp(),
                ),
            )
            .with_context(|| format!("failed to log action {}", action_type))?;
        Ok(())
    }

    /// Delete action logs and closed tickets older than the retention window,
    /// returning how many rows were removed
    pub async fn cleanup_old_records(
        &self,
        now: DateTime<Utc>,
        retention_days: i64,
    ) -> Result<usize> {
        let cutoff = (now - chrono::Duration::days(retention_days)).timestamp();
        let conn = self.conn.lock().await;
        let mut cleaned = conn
            .execute(
                "DELETE FROM action_logs WHERE timestamp < ?1",
                params!(cutoff),
            )
            .context("failed to clean action logs")?;
        cleaned += conn
            .execute(
                "DELETE FROM tickets WHERE status = 'closed' AND closed_at < ?1",
                params!(cutoff),
            )
            .context("failed to clean closed tickets")?;
        Ok(cleaned)
    }

    /// Copy the database into `backup_dir` with a timestamped filename
    pub async fn backup(&self, backup_dir: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
        std::fs::create_dir_all(backup_dir)
            .with_context(|| format!("failed to create backup directory {}", backup_dir.display()))?;
        let backup_path =
            backup_dir.join(format!("community_{}.db", now.format("%Y%m%d_%H%M%S")));
        let conn = self.conn.lock().await;
        let mut dest = Connection::open(&backup_path)
            .with_context(|| format!("failed to open backup {}", backup_path.display()))?;
        let backup = Backup::new(&conn, &mut dest).context("failed to start database backup")?;
        backup
            .run_to_completion(64, Duration::from_millis(50), None)
            .context("database backup failed")?;
        info!("database backed up to {}", backup_path.display());
        Ok(backup_path)
    }
}

fn staff_involved_json(staff: &[UserId]) -> String {
    serde_json::to_string(&staff.iter().map(|id| id.to_string()).collect::<Vec<_>>())
        .unwrap_or_else(|_| "[]".to_string())
}

fn parse_timestamp(ts: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .with_context(|| format!("invalid timestamp {}", ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(user: u64, rule_id: &str) -> ViolationRecord {
        ViolationRecord {
            user_id: UserId(user),
            rule_id: rule_id.to_string(),
            punishment: "warning".to_string(),
            duration_minutes: None,
            fine: 5000,
            details: "Warning + $5,000 fine".to_string(),
            issued_by: UserId(99),
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn violation_count_is_per_user_and_rule_and_ignores_expiry() {
        let db = CommunityDb::open_in_memory().unwrap();
        let mut expired = violation(1, "GR001");
        expired.expires_at = Some(Utc::now() - chrono::Duration::days(30));
        db.log_violation(&expired).await.unwrap();
        db.log_violation(&violation(1, "GR001")).await.unwrap();
        db.log_violation(&violation(1, "GR002")).await.unwrap();
        db.log_violation(&violation(2, "GR001")).await.unwrap();

        assert_eq!(db.count_violations(UserId(1), "GR001").await.unwrap(), 2);
        assert_eq!(db.count_violations(UserId(1), "GR002").await.unwrap(), 1);
        assert_eq!(db.count_violations(UserId(3), "GR001").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn warnings_expire_once() {
        let db = CommunityDb::open_in_memory().unwrap();
        let now = Utc::now();
        db.add_warning(UserId(1), UserId(9), "spam", None, now - chrono::Duration::days(40), 30)
            .await
            .unwrap();
        db.add_warning(UserId(2), UserId(9), "spam", None, now, 30)
            .await
            .unwrap();

        assert_eq!(db.expire_warnings(now).await.unwrap(), 1);
        assert_eq!(db.expire_warnings(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ticket_round_trip_and_counter_seed() {
        let db = CommunityDb::open_in_memory().unwrap();
        let ticket = Ticket::sample("TKT-0007", 42, 1000);
        db.insert_ticket(&ticket).await.unwrap();

        let active = db.active_tickets().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "TKT-0007");
        assert_eq!(active[0].user_id, UserId(42));
        assert_eq!(db.max_ticket_number().await.unwrap(), 7);

        let mut closed = ticket;
        closed.status = TicketStatus::Closed;
        closed.closed_at = Some(Utc::now());
        closed.closed_by = Some(UserId(9));
        closed.close_reason = Some("Resolved".to_string());
        db.close_ticket(&closed).await.unwrap();
        assert!(db.active_tickets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retention_cleanup_removes_old_closed_tickets() {
        let db = CommunityDb::open_in_memory().unwrap();
        let now = Utc::now();
        let ticket = Ticket::sample("TKT-0001", 1, 1000);
        db.insert_ticket(&ticket).await.unwrap();
        let mut closed = ticket;
        closed.status = TicketStatus::Closed;
        closed.closed_at = Some(now - chrono::Duration::days(120));
        db.close_ticket(&closed).await.unwrap();

        assert_eq!(db.cleanup_old_records(now, 90).await.unwrap(), 1);
        assert_eq!(db.cleanup_old_records(now, 90).await.unwrap(), 0);
    }
}
