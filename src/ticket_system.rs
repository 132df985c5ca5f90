use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use futures::lock::Mutex;
use log::{info, warn};
use serenity::model::id::{ChannelId, UserId};

use crate::app_config::TicketConfig;
use crate::community_db::CommunityDb;

/// Ticket state; `Closed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Open,
    Closed,
}

/// Support ticket category.
///
/// Unrecognized category names fall back to `Other` rather than being
/// rejected, so a stale button id still opens a usable ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketCategory {
    Support,
    PlayerReport,
    BugReport,
    GangRegistration,
    Shop,
    Other,
}

impl TicketCategory {
    pub fn from_name(name: &str) -> TicketCategory {
        match name.to_lowercase().as_str() {
            "support" => TicketCategory::Support,
            "player report" | "player_report" => TicketCategory::PlayerReport,
            "bug report" | "bug_report" => TicketCategory::BugReport,
            "gang registration" | "gang_registration" => TicketCategory::GangRegistration,
            "shop" => TicketCategory::Shop,
            _ => TicketCategory::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TicketCategory::Support => "Support",
            TicketCategory::PlayerReport => "Player Report",
            TicketCategory::BugReport => "Bug Report",
            TicketCategory::GangRegistration => "Gang Registration",
            TicketCategory::Shop => "Shop",
            TicketCategory::Other => "Other",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            TicketCategory::Support => "🔧",
            TicketCategory::PlayerReport => "👤",
            TicketCategory::BugReport => "🐛",
            TicketCategory::GangRegistration => "🏢",
            TicketCategory::Shop => "🛍️",
            TicketCategory::Other => "❓",
        }
    }

    pub fn color(&self) -> u32 {
        match self {
            TicketCategory::Support => 0x3498DB,
            TicketCategory::PlayerReport => 0xE74C3C,
            TicketCategory::BugReport => 0xF39C12,
            TicketCategory::GangRegistration => 0x9B59B6,
            TicketCategory::Shop => 0x2ECC71,
            TicketCategory::Other => 0x95A5A6,
        }
    }

    /// Category contribution to the ticket priority score
    pub fn priority_modifier(&self) -> i64 {
        match self {
            TicketCategory::BugReport => 2,
            TicketCategory::PlayerReport | TicketCategory::Shop => 1,
            _ => 0,
        }
    }

    /// Automated first response posted into a new ticket channel
    pub fn auto_response(&self) -> &'static str {
        match self {
            TicketCategory::Support => {
                "Thank you for contacting support!\n\
                 Please provide a detailed description of your issue, your \
                 platform and your in-game name, plus screenshots if you \
                 have them."
            }
            TicketCategory::PlayerReport => {
                "Thank you for reporting a rule violation.\n\
                 Please include who you are reporting, which rule was \
                 broken, when and where it happened, and your evidence. \
                 Reports without evidence will be closed."
            }
            TicketCategory::BugReport => {
                "Thank you for reporting a bug.\n\
                 Please describe what happened, how to reproduce it, and \
                 your device or platform. Screenshots or video help a lot."
            }
            TicketCategory::GangRegistration => {
                "Welcome to gang registration.\n\
                 Please provide the gang name, leader, initial member list \
                 and the gang's roleplay purpose. Review the gang rules \
                 before submitting."
            }
            TicketCategory::Shop => {
                "Welcome to shop support.\n\
                 Please include the item name, your transaction id and a \
                 screenshot of the payment receipt."
            }
            TicketCategory::Other => {
                "Thank you for contacting us.\n\
                 Please describe your situation in detail and what you need \
                 from the staff team."
            }
        }
    }
}

/// Requester-chosen urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn from_name(name: &str) -> Urgency {
        match name.to_lowercase().as_str() {
            "low" => Urgency::Low,
            "high" => Urgency::High,
            "critical" => Urgency::Critical,
            _ => Urgency::Medium,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Urgency::Low => "Low",
            Urgency::Medium => "Medium",
            Urgency::High => "High",
            Urgency::Critical => "Critical",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Urgency::Low => "🟢",
            Urgency::Medium => "🟡",
            Urgency::High => "🟠",
            Urgency::Critical => "🔴",
        }
    }

    /// Urgency contribution to the ticket priority score
    pub fn modifier(&self) -> i64 {
        match self {
            Urgency::Low => 0,
            Urgency::Medium => 1,
            Urgency::High => 2,
            Urgency::Critical => 3,
        }
    }
}

/// A support ticket
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    /// Id of the form TKT-0042
    pub id: String,
    pub user_id: UserId,
    pub username: String,
    pub channel_id: ChannelId,
    pub category: TicketCategory,
    pub urgency: Urgency,
    /// Category modifier + urgency modifier
    pub priority: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: TicketStatus,
    pub assigned_staff: Option<UserId>,
    /// Staff who have written in the ticket channel, deduplicated
    pub staff_involved: Vec<UserId>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<UserId>,
    pub close_reason: Option<String>,
}

impl Ticket {
    /// Minutes between creation and closure (or `now` while open)
    pub fn duration_minutes(&self, now: DateTime<Utc>) -> i64 {
        let end = self.closed_at.unwrap_or(now);
        (end - self.created_at).num_minutes()
    }

    #[cfg(test)]
    pub fn sample(id: &str, user: u64, channel: u64) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: id.to_string(),
            user_id: UserId(user),
            username: format!("user{}", user),
            channel_id: ChannelId(channel),
            category: TicketCategory::Support,
            urgency: Urgency::Medium,
            priority: 1,
            description: "help".to_string(),
            created_at: now,
            last_activity: now,
            status: TicketStatus::Open,
            assigned_staff: None,
            staff_involved: Vec::new(),
            closed_at: None,
            closed_by: None,
            close_reason: None,
        }
    }
}

/// Fields for a ticket being opened, once its channel exists
#[derive(Debug, Clone)]
pub struct OpenTicket {
    pub id: String,
    pub user_id: UserId,
    pub username: String,
    pub channel_id: ChannelId,
    pub category: TicketCategory,
    pub urgency: Urgency,
    pub description: String,
}

struct TicketState {
    /// Open tickets only; a ticket leaves the map when it closes
    tickets: HashMap<String, Ticket>,
    /// Ids handed out by `allocate` whose channel is still being created.
    /// They count against the per-user limit until `open` or `release`
    /// resolves them.
    pending: HashMap<String, UserId>,
    counter: u32,
}

impl TicketState {
    fn held_by(&self, user_id: UserId) -> usize {
        let open = self
            .tickets
            .values()
            .filter(|ticket| ticket.user_id == user_id)
            .count();
        let pending = self.pending.values().filter(|user| **user == user_id).count();
        open + pending
    }
}

/// Owns every open ticket and serializes all mutation behind one lock, so
/// an interactive close and a concurrent inactivity sweep cannot both close
/// the same ticket.
pub struct TicketSystem {
    state: Mutex<TicketState>,
    db: Arc<CommunityDb>,
    config: TicketConfig,
}

impl TicketSystem {
    /// Rebuild in-memory state from the store
    pub async fn load(db: Arc<CommunityDb>, config: TicketConfig) -> Result<TicketSystem> {
        let tickets = db.active_tickets().await?;
        let counter = db.max_ticket_number().await?;
        info!("loaded {} active tickets", tickets.len());
        let tickets = tickets
            .into_iter()
            .map(|ticket| (ticket.id.clone(), ticket))
            .collect();
        Ok(TicketSystem {
            state: Mutex::new(TicketState {
                tickets,
                pending: HashMap::new(),
                counter,
            }),
            db,
            config,
        })
    }

    /// Reserve the next ticket id for `user_id`.
    ///
    /// Fails when the user already holds the maximum number of open or
    /// pending tickets; pending reservations count so two concurrent opens
    /// cannot both pass the limit check. Callers must `release` the id if
    /// channel creation fails afterwards; ids stay burned in that case,
    /// they only need to be monotonic, not dense.
    pub async fn allocate(&self, user_id: UserId) -> Result<String> {
        let mut state = self.state.lock().await;
        let held = state.held_by(user_id);
        if held >= self.config.max_open_per_user {
            bail!(
                "you already have {} open tickets; close one before opening another",
                held
            );
        }
        state.counter += 1;
        let id = format!("TKT-{:04}", state.counter);
        state.pending.insert(id.clone(), user_id);
        Ok(id)
    }

    /// Give back a reservation whose channel never got created
    pub async fn release(&self, ticket_id: &str) {
        let mut state = self.state.lock().await;
        state.pending.remove(ticket_id);
    }

    /// Register a newly opened ticket in memory and in the store
    pub async fn open(&self, open: OpenTicket) -> Result<Ticket> {
        let now = Utc::now();
        let ticket = Ticket {
            priority: open.category.priority_modifier() + open.urgency.modifier(),
            id: open.id,
            user_id: open.user_id,
            username: open.username,
            channel_id: open.channel_id,
            category: open.category,
            urgency: open.urgency,
            description: open.description,
            created_at: now,
            last_activity: now,
            status: TicketStatus::Open,
            assigned_staff: None,
            staff_involved: Vec::new(),
            closed_at: None,
            closed_by: None,
            close_reason: None,
        };
        self.db.insert_ticket(&ticket).await?;
        let mut state = self.state.lock().await;
        state.pending.remove(&ticket.id);
        state.tickets.insert(ticket.id.clone(), ticket.clone());
        info!("ticket {} opened by {}", ticket.id, ticket.username);
        Ok(ticket)
    }

    /// Record channel activity: every non-bot message refreshes
    /// `last_activity`, and staff authors are added to `staff_involved`
    pub async fn note_message(
        &self,
        channel_id: ChannelId,
        author: UserId,
        author_is_staff: bool,
        now: DateTime<Utc>,
    ) {
        let updated = {
            let mut state = self.state.lock().await;
            let ticket = state
                .tickets
                .values_mut()
                .find(|ticket| ticket.channel_id == channel_id);
            match ticket {
                Some(ticket) => {
                    ticket.last_activity = now;
                    if author_is_staff && !ticket.staff_involved.contains(&author) {
                        ticket.staff_involved.push(author);
                    }
                    Some(ticket.clone())
                }
                None => None,
            }
        };
        // activity bookkeeping is best-effort; a failed write only costs
        // sweep accuracy until the next message
        if let Some(ticket) = updated {
            if let Err(why) = self.db.update_ticket_activity(&ticket).await {
                warn!("failed to persist activity for {}: {:?}", ticket.id, why);
            }
        }
    }

    /// Assign a staff member to a ticket
    pub async fn assign(&self, ticket_id: &str, staff: UserId) -> Result<Ticket> {
        let ticket = {
            let mut state = self.state.lock().await;
            let ticket = match state.tickets.get_mut(ticket_id) {
                Some(ticket) => ticket,
                None => bail!("no open ticket {}", ticket_id),
            };
            ticket.assigned_staff = Some(staff);
            if !ticket.staff_involved.contains(&staff) {
                ticket.staff_involved.push(staff);
            }
            ticket.clone()
        };
        self.db.update_ticket_activity(&ticket).await?;
        info!("ticket {} assigned to {}", ticket.id, staff);
        Ok(ticket)
    }

    /// Transition a ticket Open → Closed.
    ///
    /// Returns the closed snapshot, or `None` if the ticket was already
    /// closed (for example by a racing inactivity sweep) — the caller must
    /// then skip transcript generation and stat updates. A persistence
    /// failure is logged but never blocks the transition.
    pub async fn close(
        &self,
        ticket_id: &str,
        closed_by: UserId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<Ticket> {
        let closed = {
            let mut state = self.state.lock().await;
            let mut ticket = state.tickets.remove(ticket_id)?;
            ticket.status = TicketStatus::Closed;
            ticket.closed_at = Some(now);
            ticket.closed_by = Some(closed_by);
            ticket.close_reason = Some(reason.to_string());
            ticket
        };
        if let Err(why) = self.db.close_ticket(&closed).await {
            warn!("failed to persist close of {}: {:?}", closed.id, why);
        }
        info!("ticket {} closed: {}", closed.id, reason);
        Some(closed)
    }

    /// Ids of tickets whose inactivity exceeds the configured threshold
    pub async fn select_inactive(&self, now: DateTime<Utc>) -> Vec<String> {
        let threshold = Duration::hours(self.config.auto_close_hours);
        let state = self.state.lock().await;
        state
            .tickets
            .values()
            .filter(|ticket| now - ticket.last_activity > threshold)
            .map(|ticket| ticket.id.clone())
            .collect()
    }

    /// The open ticket living in `channel_id`, if any
    pub async fn by_channel(&self, channel_id: ChannelId) -> Option<Ticket> {
        let state = self.state.lock().await;
        state
            .tickets
            .values()
            .find(|ticket| ticket.channel_id == channel_id)
            .cloned()
    }

    /// Snapshot of all open tickets
    pub async fn active(&self) -> Vec<Ticket> {
        let state = self.state.lock().await;
        state.tickets.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TicketConfig {
        TicketConfig::default()
    }

    async fn system() -> TicketSystem {
        let db = Arc::new(CommunityDb::open_in_memory().unwrap());
        TicketSystem::load(db, config()).await.unwrap()
    }

    async fn open_ticket(system: &TicketSystem, user: u64, channel: u64) -> Ticket {
        let id = system.allocate(UserId(user)).await.unwrap();
        system
            .open(OpenTicket {
                id,
                user_id: UserId(user),
                username: format!("user{}", user),
                channel_id: ChannelId(channel),
                category: TicketCategory::Support,
                urgency: Urgency::High,
                description: "something broke".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ids_are_sequential_and_priority_is_summed() {
        let system = system().await;
        let first = open_ticket(&system, 1, 100).await;
        let second = open_ticket(&system, 2, 200).await;
        assert_eq!(first.id, "TKT-0001");
        assert_eq!(second.id, "TKT-0002");
        // Support modifier 0 + High urgency 2
        assert_eq!(first.priority, 2);
    }

    #[tokio::test]
    async fn open_ticket_limit_is_enforced() {
        let system = system().await;
        for n in 0..3 {
            open_ticket(&system, 1, 100 + n).await;
        }
        assert!(system.allocate(UserId(1)).await.is_err());
        // other users are unaffected
        assert!(system.allocate(UserId(2)).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_allocations_cannot_exceed_the_limit() {
        let system = Arc::new(system().await);
        // user sits one below the limit of three
        open_ticket(&system, 1, 100).await;
        open_ticket(&system, 1, 101).await;

        let a = {
            let system = Arc::clone(&system);
            tokio::spawn(async move { system.allocate(UserId(1)).await })
        };
        let b = {
            let system = Arc::clone(&system);
            tokio::spawn(async move { system.allocate(UserId(1)).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn released_reservation_frees_the_slot() {
        let system = system().await;
        let mut reserved = Vec::new();
        for _ in 0..3 {
            reserved.push(system.allocate(UserId(1)).await.unwrap());
        }
        // all three slots are held by reservations that never opened
        assert!(system.allocate(UserId(1)).await.is_err());

        system.release(&reserved[0]).await;
        assert!(system.allocate(UserId(1)).await.is_ok());
    }

    #[tokio::test]
    async fn close_is_terminal_and_happens_once() {
        let system = system().await;
        let ticket = open_ticket(&system, 1, 100).await;
        let now = Utc::now();

        let first = system.close(&ticket.id, UserId(9), "Resolved", now).await;
        let second = system.close(&ticket.id, UserId(10), "Duplicate", now).await;

        let closed = first.expect("first close wins");
        assert_eq!(closed.status, TicketStatus::Closed);
        assert_eq!(closed.close_reason.as_deref(), Some("Resolved"));
        assert_eq!(closed.closed_by, Some(UserId(9)));
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn concurrent_manual_close_and_sweep_close_exactly_once() {
        let system = Arc::new(system().await);
        let ticket = open_ticket(&system, 1, 100).await;
        let now = Utc::now();

        let manual = {
            let system = Arc::clone(&system);
            let id = ticket.id.clone();
            tokio::spawn(async move { system.close(&id, UserId(9), "Resolved", now).await })
        };
        let sweep = {
            let system = Arc::clone(&system);
            let id = ticket.id.clone();
            tokio::spawn(async move {
                system
                    .close(&id, UserId(0), "Auto-closed due to inactivity", now)
                    .await
            })
        };

        let (manual, sweep) = (manual.await.unwrap(), sweep.await.unwrap());
        assert_eq!(manual.is_some() as u8 + sweep.is_some() as u8, 1);
    }

    #[tokio::test]
    async fn inactivity_sweep_selects_only_stale_tickets() {
        let system = system().await;
        let stale = open_ticket(&system, 1, 100).await;
        let fresh = open_ticket(&system, 2, 200).await;

        let later = Utc::now() + Duration::hours(73);
        system
            .note_message(fresh.channel_id, UserId(2), false, later)
            .await;

        let selected = system.select_inactive(later).await;
        assert_eq!(selected, vec![stale.id.clone()]);

        // boundary: exactly at the threshold is not yet inactive
        let at_threshold = stale.last_activity + Duration::hours(72);
        assert!(system.select_inactive(at_threshold).await.is_empty());
    }

    #[tokio::test]
    async fn messages_update_activity_and_track_staff() {
        let system = system().await;
        let ticket = open_ticket(&system, 1, 100).await;
        let later = Utc::now() + Duration::minutes(5);

        system.note_message(ticket.channel_id, UserId(1), false, later).await;
        system.note_message(ticket.channel_id, UserId(7), true, later).await;
        system.note_message(ticket.channel_id, UserId(7), true, later).await;

        let ticket = system.by_channel(ticket.channel_id).await.unwrap();
        assert_eq!(ticket.last_activity, later);
        assert_eq!(ticket.staff_involved, vec![UserId(7)]);
    }

    #[tokio::test]
    async fn state_reloads_from_store() {
        let db = Arc::new(CommunityDb::open_in_memory().unwrap());
        let system = TicketSystem::load(Arc::clone(&db), config()).await.unwrap();
        open_ticket(&system, 1, 100).await;
        let closed = open_ticket(&system, 1, 200).await;
        system.close(&closed.id, UserId(9), "Resolved", Utc::now()).await;

        let reloaded = TicketSystem::load(db, config()).await.unwrap();
        let active = reloaded.active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "TKT-0001");
        // counter resumes after the highest issued id, including closed ones
        assert_eq!(reloaded.allocate(UserId(3)).await.unwrap(), "TKT-0003");
    }
}
