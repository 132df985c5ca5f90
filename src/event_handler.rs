use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use chrono::{Duration, TimeZone, Utc};
use chrono_tz::Tz;
use futures::lock::Mutex;
use log::{error, info, warn};
use serenity::async_trait;
use serenity::builder::CreateEmbed;
use serenity::http::Http;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::{Interaction, InteractionResponseType};
use serenity::model::channel::{
    AttachmentType, ChannelType, Message, PermissionOverwrite, PermissionOverwriteType,
};
use serenity::model::gateway::Ready;
use serenity::model::id::{MessageId, RoleId};
use serenity::model::permissions::Permissions as ChannelPermissions;
use serenity::prelude::*;

use crate::announcements::{Announcement, AnnouncementSystem};
use crate::app_config::AppConfig;
use crate::automation::{self, AutomationStats};
use crate::commands::Command;
use crate::community_db::{CommunityDb, ViolationRecord};
use crate::embeds;
use crate::permissions::{Permissions, StaffRank};
use crate::rule_index::{NewRule, RuleIndex, RuleUpdate};
use crate::ticket_system::{OpenTicket, Ticket, TicketCategory, TicketSystem, Urgency};
use crate::transcript::{self, TranscriptMessage};

/// Days until a recorded warning expires
const WARNING_EXPIRY_DAYS: i64 = 30;

/// Everything the command handlers and background tasks share
pub struct BotState {
    pub config: AppConfig,
    pub db: Arc<CommunityDb>,
    pub rules: Mutex<RuleIndex>,
    pub tickets: TicketSystem,
    pub announcements: AnnouncementSystem,
    pub permissions: Permissions,
    pub stats: AutomationStats,
    pub timezone: Tz,
}

impl BotState {
    /// Archive a closed ticket: render and store the transcript, DM the
    /// requester, post to the logs channel and delete the ticket channel.
    ///
    /// Runs after the Open → Closed transition, so a failure here never
    /// reopens the ticket.
    pub async fn archive_ticket(&self, http: &Arc<Http>, ticket: &Ticket) -> Result<()> {
        // the API caps each page at 100 messages; page backwards until the
        // channel is exhausted so long tickets archive in full
        let mut history = Vec::new();
        let mut before: Option<MessageId> = None;
        loop {
            let page = ticket
                .channel_id
                .messages(http, |retriever| {
                    let retriever = retriever.limit(100);
                    match before {
                        Some(oldest) => retriever.before(oldest),
                        None => retriever,
                    }
                })
                .await
                .with_context(|| format!("failed to fetch history of {}", ticket.id))?;
            let page_len = page.len();
            if let Some(oldest) = page.last() {
                before = Some(oldest.id);
            }
            history.extend(page);
            if page_len < 100 {
                break;
            }
        }
        // pages arrive newest-first; flip so same-second messages keep
        // their true order through the stable sort in the renderer
        history.reverse();
        let messages = history
            .iter()
            .map(|message| TranscriptMessage {
                author: message.author.name.clone(),
                content: message.content.clone(),
                attachments: message
                    .attachments
                    .iter()
                    .map(|attachment| attachment.url.clone())
                    .collect(),
                timestamp: Utc
                    .timestamp_opt(message.timestamp.unix_timestamp(), 0)
                    .single()
                    .unwrap_or_else(Utc::now),
            })
            .collect::<Vec<_>>();

        let rendered = transcript::render(ticket, &messages, self.timezone);
        let path = transcript::save(
            Path::new(&self.config.tickets.transcript_dir),
            &ticket.id,
            &rendered,
        )?;

        // DM the requester; a closed-DM user is not an error
        let dm = async {
            let dm = ticket.user_id.create_dm_channel(http).await?;
            dm.id.send_message(http, |m| {
                m.embed(|e| embeds::ticket_closed(e, ticket));
                m.add_file(AttachmentType::Path(&path))
            })
            .await
        };
        if let Err(why) = dm.await {
            warn!("could not DM {} about {}: {:?}", ticket.user_id, ticket.id, why);
            self.staff_log(
                http,
                &format!(
                    "Could not DM <@{}> the transcript of {}",
                    ticket.user_id, ticket.id
                ),
            )
            .await;
        }

        self.config
            .discord
            .ticket_logs_channel_id
            .send_message(http, |m| {
                m.embed(|e| embeds::transcript_log(e, ticket));
                m.add_file(AttachmentType::Path(&path))
            })
            .await
            .with_context(|| format!("failed to archive transcript of {}", ticket.id))?;

        if let Err(why) = self
            .db
            .log_action(
                "ticket_closed",
                ticket.closed_by.unwrap_or(ticket.user_id),
                &format!(
                    "{}: {}",
                    ticket.id,
                    ticket.close_reason.as_deref().unwrap_or("Resolved")
                ),
                Some(ticket.channel_id),
            )
            .await
        {
            warn!("failed to log close of {}: {:?}", ticket.id, why);
        }

        ticket
            .channel_id
            .delete(http)
            .await
            .with_context(|| format!("failed to delete channel of {}", ticket.id))?;
        Ok(())
    }

    /// Best-effort notification to the staff logs channel
    pub async fn staff_log(&self, http: &Arc<Http>, text: &str) {
        let sent = self
            .config
            .discord
            .staff_logs_channel_id
            .send_message(http, |m| m.content(text))
            .await;
        if let Err(why) = sent {
            warn!("failed to post staff log: {:?}", why);
        }
    }
}

/// Gateway event listener
pub struct Handler {
    state: Arc<BotState>,
    tasks_started: AtomicBool,
}

impl Handler {
    pub async fn new(config: AppConfig) -> Result<Handler> {
        let timezone: Tz = config
            .discord
            .display_timezone
            .parse()
            .map_err(|err: String| anyhow!("invalid display_timezone: {}", err))?;
        let db = Arc::new(CommunityDb::new(Path::new(&config.database.dir))?);
        let rules = RuleIndex::load(Path::new(&config.rules.data_dir))?;
        let tickets = TicketSystem::load(Arc::clone(&db), config.tickets.clone()).await?;
        let announcements =
            AnnouncementSystem::new(Arc::clone(&db), config.announcements.clone());
        let permissions = Permissions::new(&config.discord);
        Ok(Handler {
            state: Arc::new(BotState {
                config,
                db,
                rules: Mutex::new(rules),
                tickets,
                announcements,
                permissions,
                stats: AutomationStats::default(),
                timezone,
            }),
            tasks_started: AtomicBool::new(false),
        })
    }

    /// Route one parsed command. Every permission check and reply happens
    /// on this path.
    async fn dispatch(
        &self,
        ctx: &Context,
        interaction: &ApplicationCommandInteraction,
        command: Command,
    ) -> Result<()> {
        let state = &self.state;
        let issuer = interaction.user.id;
        let issuer_roles = interaction
            .member
            .as_ref()
            .map(|member| member.roles.clone())
            .unwrap_or_default();

        match command {
            Command::RuleSearch { query, category } => {
                let hits = state.rules.lock().await.search(
                    &query,
                    category.as_deref(),
                    state.config.rules.search_limit,
                );
                self.respond(ctx, interaction, false, |e| {
                    embeds::search_results(e, &query, &hits)
                })
                .await
            }
            Command::RuleView { rule_id } => {
                let rules = state.rules.lock().await;
                let rule = match rules.get(&rule_id) {
                    Some(rule) => rule.clone(),
                    None => bail!("no rule with id {}", rule_id),
                };
                let category = rules.categories().get(&rule.category).cloned();
                drop(rules);
                self.respond(ctx, interaction, false, |e| {
                    embeds::rule(e, &rule_id, &rule, category.as_ref())
                })
                .await
            }
            Command::RuleAdd {
                category,
                subcategory,
                title,
                content,
                keywords,
                priority,
            } => {
                if !state.permissions.can_manage_rules(&issuer_roles) {
                    bail!("managing rules requires the Admin role");
                }
                let mut rules = state.rules.lock().await;
                let rule_id = rules.add_rule(NewRule {
                    category,
                    subcategory,
                    title,
                    content,
                    keywords,
                    priority,
                    punishments: None,
                    appeal_allowed: true,
                    appeal_process: None,
                    min_staff_rank: StaffRank::Helper,
                    created_by: issuer,
                })?;
                let rule = rules
                    .get(&rule_id)
                    .cloned()
                    .with_context(|| format!("rule {} vanished after insert", rule_id))?;
                let category = rules.categories().get(&rule.category).cloned();
                drop(rules);
                state
                    .db
                    .log_action("rule_added", issuer, &rule_id, None)
                    .await?;
                self.respond(ctx, interaction, false, |e| {
                    embeds::rule(e, &rule_id, &rule, category.as_ref())
                })
                .await
            }
            Command::RuleEdit {
                rule_id,
                title,
                content,
                keywords,
                priority,
            } => {
                if !state.permissions.can_manage_rules(&issuer_roles) {
                    bail!("managing rules requires the Admin role");
                }
                let mut rules = state.rules.lock().await;
                rules.update_rule(
                    &rule_id,
                    RuleUpdate {
                        title,
                        content,
                        keywords,
                        priority,
                        ..RuleUpdate::default()
                    },
                )?;
                let rule = rules
                    .get(&rule_id)
                    .cloned()
                    .with_context(|| format!("rule {} vanished after update", rule_id))?;
                let category = rules.categories().get(&rule.category).cloned();
                drop(rules);
                state
                    .db
                    .log_action("rule_updated", issuer, &rule_id, None)
                    .await?;
                self.respond(ctx, interaction, false, |e| {
                    embeds::rule(e, &rule_id, &rule, category.as_ref())
                })
                .await
            }
            Command::Categories { category } => {
                let rules = state.rules.lock().await;
                match category {
                    Some(category) => {
                        if !rules.categories().contains_key(&category) {
                            bail!("unknown category: {}", category);
                        }
                        let hits = rules.rules_in_category(&category, None);
                        drop(rules);
                        self.respond(ctx, interaction, false, |e| {
                            embeds::search_results(e, &category, &hits)
                        })
                        .await
                    }
                    None => {
                        let categories = rules.categories().clone();
                        let stats = rules.category_stats();
                        drop(rules);
                        self.respond(ctx, interaction, false, |e| {
                            embeds::category_overview(e, &categories, &stats)
                        })
                        .await
                    }
                }
            }
            Command::RuleRemove { rule_id } => {
                if !state.permissions.can_manage_rules(&issuer_roles) {
                    bail!("managing rules requires the Admin role");
                }
                state.rules.lock().await.delete_rule(&rule_id)?;
                state
                    .db
                    .log_action("rule_removed", issuer, &rule_id, None)
                    .await?;
                self.respond(ctx, interaction, true, |e| {
                    e.title("Rule removed")
                        .description(format!("Rule {} has been deleted", rule_id))
                        .colour(0x2ECC71)
                })
                .await
            }
            Command::Punish {
                user,
                target_roles,
                rule_id,
                duration_minutes,
            } => {
                let prior = state.db.count_violations(user, &rule_id).await?;
                let (mut rung, title) = {
                    let rules = state.rules.lock().await;
                    if rules.get(&rule_id).is_none() {
                        bail!("no rule with id {}", rule_id);
                    }
                    let title = rules.get(&rule_id).map(|rule| rule.title.clone());
                    (rules.punishment_for(&rule_id, prior), title)
                };
                if let Some(minutes) = duration_minutes {
                    rung.punishment = rung.punishment.clone().with_duration(minutes);
                }
                state
                    .permissions
                    .can_punish(&issuer_roles, &target_roles, &rung.punishment)
                    .map_err(|why| anyhow!(why))?;

                let now = Utc::now();
                state
                    .db
                    .log_violation(&ViolationRecord {
                        user_id: user,
                        rule_id: rule_id.clone(),
                        punishment: rung.punishment.tag().to_string(),
                        duration_minutes: rung.punishment.duration_minutes(),
                        fine: rung.punishment.fine() as i64,
                        details: rung.details.clone(),
                        issued_by: issuer,
                        issued_at: now,
                        expires_at: rung
                            .punishment
                            .duration_minutes()
                            .map(|minutes| now + Duration::minutes(minutes)),
                    })
                    .await?;
                state
                    .db
                    .log_action(
                        "punishment",
                        issuer,
                        &format!("{} -> {} ({})", rule_id, user, rung.punishment.tag()),
                        None,
                    )
                    .await?;
                self.respond(ctx, interaction, false, |e| {
                    embeds::punishment(e, user, &rule_id, title.as_deref(), &rung, prior + 1)
                })
                .await
            }
            Command::Warn {
                user,
                reason,
                rule_id,
            } => {
                if !state.permissions.is_staff(&issuer_roles) {
                    bail!("warning users requires a staff role");
                }
                state
                    .db
                    .add_warning(
                        user,
                        issuer,
                        &reason,
                        rule_id.as_deref(),
                        Utc::now(),
                        WARNING_EXPIRY_DAYS,
                    )
                    .await?;
                state
                    .db
                    .log_action("warning", issuer, &format!("{}: {}", user, reason), None)
                    .await?;
                self.respond(ctx, interaction, false, |e| {
                    e.title("Warning recorded")
                        .description(format!(
                            "<@{}> has been warned: {}\nThe warning expires in {} days.",
                            user, reason, WARNING_EXPIRY_DAYS
                        ))
                        .colour(0xF39C12)
                })
                .await
            }
            Command::TicketOpen {
                category,
                urgency,
                description,
            } => {
                let ticket_id = state.tickets.allocate(issuer).await?;
                let created = self
                    .create_ticket_channel(
                        ctx,
                        interaction,
                        ticket_id.clone(),
                        category,
                        urgency,
                        description,
                    )
                    .await;
                let ticket = match created {
                    Ok(ticket) => ticket,
                    Err(why) => {
                        state.tickets.release(&ticket_id).await;
                        return Err(why);
                    }
                };
                state
                    .db
                    .log_action(
                        "ticket_opened",
                        issuer,
                        &ticket.id,
                        Some(ticket.channel_id),
                    )
                    .await?;
                self.respond(ctx, interaction, true, |e| {
                    e.title("Ticket created")
                        .description(format!(
                            "Your ticket {} is ready: <#{}>",
                            ticket.id, ticket.channel_id
                        ))
                        .colour(0x2ECC71)
                })
                .await
            }
            Command::TicketClose { reason } => {
                let ticket = state
                    .tickets
                    .by_channel(interaction.channel_id)
                    .await
                    .context("this channel is not an open ticket")?;
                let is_owner = ticket.user_id == issuer;
                if !is_owner && !state.permissions.can_close_tickets(&issuer_roles) {
                    bail!("closing another user's ticket requires the Staff role");
                }
                // respond before the channel disappears
                self.respond(ctx, interaction, false, |e| {
                    e.title("Closing ticket")
                        .description(format!("{} is being archived", ticket.id))
                        .colour(0x3498DB)
                })
                .await?;
                let closed = state
                    .tickets
                    .close(&ticket.id, issuer, &reason, Utc::now())
                    .await;
                // None means an inactivity sweep won the race
                if let Some(ticket) = closed {
                    self.state.archive_ticket(&ctx.http, &ticket).await?;
                }
                Ok(())
            }
            Command::TicketAssign { staff } => {
                if !state.permissions.can_manage_tickets(&issuer_roles) {
                    bail!("assigning tickets requires a staff role");
                }
                let ticket = state
                    .tickets
                    .by_channel(interaction.channel_id)
                    .await
                    .context("this channel is not an open ticket")?;
                let ticket = state.tickets.assign(&ticket.id, staff).await?;
                state
                    .db
                    .log_action(
                        "ticket_assigned",
                        issuer,
                        &format!("{} -> {}", ticket.id, staff),
                        Some(ticket.channel_id),
                    )
                    .await?;
                self.respond(ctx, interaction, false, |e| {
                    e.title("Ticket assigned")
                        .description(format!("<@{}> is now handling {}", staff, ticket.id))
                        .colour(0x2ECC71)
                })
                .await
            }
            Command::Announce {
                title,
                content,
                ping_everyone,
            } => {
                if !state.permissions.can_announce(&issuer_roles) {
                    bail!("posting announcements requires the Admin role");
                }
                let announcement = Announcement {
                    title,
                    content,
                    author_id: issuer,
                    author_name: interaction.user.name.clone(),
                    ping_everyone,
                };
                let now = Utc::now();
                state.announcements.reserve(&announcement, now).await?;
                let channel = state.config.discord.announcements_channel_id;
                let sent = channel
                    .send_message(&ctx.http, |m| {
                        if announcement.ping_everyone {
                            m.content("@everyone");
                        }
                        m.embed(|e| embeds::announcement(e, &announcement))
                    })
                    .await;
                let message = match sent {
                    Ok(message) => message,
                    Err(why) => {
                        state.announcements.release(issuer).await;
                        return Err(why).context("failed to post announcement");
                    }
                };
                state
                    .announcements
                    .record(&announcement, channel, message.id.0, now)
                    .await?;
                state
                    .db
                    .log_action("announcement", issuer, &announcement.title, Some(channel))
                    .await?;
                self.respond(ctx, interaction, true, |e| {
                    e.title("Announcement posted")
                        .description(format!("Posted to <#{}>", channel))
                        .colour(0x2ECC71)
                })
                .await
            }
            Command::Status => {
                if !state.permissions.is_staff(&issuer_roles) {
                    bail!("the status report is staff-only");
                }
                let snapshot = state.stats.snapshot();
                let open = state.tickets.active().await.len();
                self.respond(ctx, interaction, false, |e| {
                    embeds::automation_report(e, &snapshot)
                        .field("Open tickets", open.to_string(), true)
                })
                .await
            }
        }
    }

    /// Create the private ticket channel and register the ticket
    async fn create_ticket_channel(
        &self,
        ctx: &Context,
        interaction: &ApplicationCommandInteraction,
        ticket_id: String,
        category: TicketCategory,
        urgency: Urgency,
        description: String,
    ) -> Result<Ticket> {
        let state = &self.state;
        let discord = &state.config.discord;
        let member_access = ChannelPermissions::VIEW_CHANNEL
            | ChannelPermissions::SEND_MESSAGES
            | ChannelPermissions::READ_MESSAGE_HISTORY;
        let overwrites = vec![
            // hide the channel from the guild at large
            PermissionOverwrite {
                allow: ChannelPermissions::empty(),
                deny: ChannelPermissions::VIEW_CHANNEL,
                kind: PermissionOverwriteType::Role(RoleId(discord.guild_id.0)),
            },
            PermissionOverwrite {
                allow: member_access,
                deny: ChannelPermissions::empty(),
                kind: PermissionOverwriteType::Member(interaction.user.id),
            },
            PermissionOverwrite {
                allow: member_access,
                deny: ChannelPermissions::empty(),
                kind: PermissionOverwriteType::Role(discord.helper_role_id),
            },
        ];
        let channel = discord
            .guild_id
            .create_channel(&ctx.http, |c| {
                c.name(ticket_id.to_lowercase())
                    .kind(ChannelType::Text)
                    .category(discord.tickets_category_id)
                    .permissions(overwrites)
            })
            .await
            .context("failed to create the ticket channel")?;

        let ticket = state
            .tickets
            .open(OpenTicket {
                id: ticket_id,
                user_id: interaction.user.id,
                username: interaction.user.name.clone(),
                channel_id: channel.id,
                category,
                urgency,
                description,
            })
            .await?;

        channel
            .send_message(&ctx.http, |m| {
                m.content(format!("<@{}>", ticket.user_id));
                m.embed(|e| embeds::ticket_opened(e, &ticket))
            })
            .await
            .context("failed to post the ticket welcome message")?;
        channel
            .send_message(&ctx.http, |m| {
                m.embed(|e| embeds::ticket_auto_response(e, &ticket))
            })
            .await
            .context("failed to post the automated response")?;
        Ok(ticket)
    }

    /// Reply with a single embed, optionally ephemeral
    async fn respond<F>(
        &self,
        ctx: &Context,
        interaction: &ApplicationCommandInteraction,
        ephemeral: bool,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut CreateEmbed) -> &mut CreateEmbed,
    {
        interaction
            .create_interaction_response(&ctx.http, |response| {
                response
                    .kind(InteractionResponseType::ChannelMessageWithSource)
                    .interaction_response_data(|message| {
                        message.ephemeral(ephemeral).embed(f)
                    })
            })
            .await
            .context("failed to respond to the interaction")?;
        Ok(())
    }

    /// Surface a command failure to the user; falls back to a followup when
    /// the interaction was already responded to
    async fn fail(
        &self,
        ctx: &Context,
        interaction: &ApplicationCommandInteraction,
        message: &str,
    ) {
        let responded = interaction
            .create_interaction_response(&ctx.http, |response| {
                response
                    .kind(InteractionResponseType::ChannelMessageWithSource)
                    .interaction_response_data(|data| {
                        data.ephemeral(true)
                            .embed(|e| embeds::failure(e, "Command failed", message))
                    })
            })
            .await;
        if responded.is_err() {
            let followed_up = interaction
                .create_followup_message(&ctx.http, |data| {
                    data.ephemeral(true)
                        .embed(|e| embeds::failure(e, "Command failed", message))
                })
                .await;
            if let Err(why) = followed_up {
                warn!("failed to report a command failure: {:?}", why);
            }
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, data_about_bot: Ready) {
        info!("{} is connected", data_about_bot.user.name);

        let registered = self
            .state
            .config
            .discord
            .guild_id
            .set_application_commands(&ctx.http, Command::register)
            .await;
        if let Err(why) = registered {
            error!("failed to register slash commands: {:?}", why);
        }

        // ready fires again on reconnect; the tasks must only start once
        if !self.tasks_started.swap(true, Ordering::SeqCst) {
            automation::spawn_tasks(
                Arc::clone(&self.state),
                Arc::clone(&ctx.http),
                data_about_bot.user.id,
            );
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let interaction = match interaction {
            Interaction::ApplicationCommand(interaction) => interaction,
            _ => return,
        };
        let command = match Command::parse(&interaction) {
            Ok(command) => command,
            Err(why) => {
                self.fail(&ctx, &interaction, &format!("{:#}", why)).await;
                return;
            }
        };
        if let Err(why) = self.dispatch(&ctx, &interaction, command).await {
            warn!(
                "command /{} from {} failed: {:?}",
                interaction.data.name, interaction.user.id, why
            );
            self.fail(&ctx, &interaction, &format!("{:#}", why)).await;
        }
    }

    /// Every human message in a ticket channel counts as activity
    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let author_is_staff = msg
            .member
            .as_ref()
            .map(|member| self.state.permissions.is_staff(&member.roles))
            .unwrap_or(false);
        self.state
            .tickets
            .note_message(msg.channel_id, msg.author.id, author_is_staff, Utc::now())
            .await;
    }
}
