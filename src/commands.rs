use anyhow::{bail, Context as _, Result};
use serenity::builder::CreateApplicationCommands;
use serenity::model::application::command::CommandOptionType;
use serenity::model::application::interaction::application_command::{
    ApplicationCommandInteraction, CommandDataOption, CommandDataOptionValue,
};
use serenity::model::id::{RoleId, UserId};

use crate::punishment::parse_duration;
use crate::rule_index::Priority;
use crate::ticket_system::{TicketCategory, Urgency};

/// One parsed slash command.
///
/// Every interaction is decoded into this enum first and routed through a
/// single dispatch point, so permission checks and error replies live in
/// one place.
#[derive(Debug, Clone)]
pub enum Command {
    /// /rules — search the rule database
    RuleSearch {
        query: String,
        category: Option<String>,
    },
    /// /rule-view — show one rule in full
    RuleView { rule_id: String },
    /// /rule-add — create a rule (admin)
    RuleAdd {
        category: String,
        subcategory: String,
        title: String,
        content: String,
        keywords: Vec<String>,
        priority: Priority,
    },
    /// /rule-edit — partially update a rule (admin)
    RuleEdit {
        rule_id: String,
        title: Option<String>,
        content: Option<String>,
        keywords: Option<Vec<String>>,
        priority: Option<Priority>,
    },
    /// /rule-remove — delete a rule (admin)
    RuleRemove { rule_id: String },
    /// /categories — category overview, or one category's rules
    Categories { category: Option<String> },
    /// /punish — apply the next ladder rung for a rule violation
    Punish {
        user: UserId,
        target_roles: Vec<RoleId>,
        rule_id: String,
        /// Staff override of the rung's duration, in minutes
        duration_minutes: Option<i64>,
    },
    /// /warn — record an expiring warning
    Warn {
        user: UserId,
        reason: String,
        rule_id: Option<String>,
    },
    /// /ticket — open a support ticket
    TicketOpen {
        category: TicketCategory,
        urgency: Urgency,
        description: String,
    },
    /// /close — close the ticket living in the current channel
    TicketClose { reason: String },
    /// /assign — assign a staff member to the current ticket
    TicketAssign { staff: UserId },
    /// /announce — post a server announcement (admin)
    Announce {
        title: String,
        content: String,
        ping_everyone: bool,
    },
    /// /status — automation counters
    Status,
}

impl Command {
    /// Decode a slash-command interaction. Fails with a user-presentable
    /// message on missing options or a malformed duration.
    pub fn parse(interaction: &ApplicationCommandInteraction) -> Result<Command> {
        let options = &interaction.data.options;
        let command = match interaction.data.name.as_str() {
            "rules" => Command::RuleSearch {
                query: str_option(options, "query").unwrap_or_default(),
                category: str_option(options, "category"),
            },
            "rule-view" => Command::RuleView {
                rule_id: required_str(options, "rule_id")?,
            },
            "rule-add" => Command::RuleAdd {
                category: required_str(options, "category")?,
                subcategory: required_str(options, "subcategory")?,
                title: required_str(options, "title")?,
                content: required_str(options, "content")?,
                keywords: str_option(options, "keywords")
                    .map(|list| {
                        list.split(',')
                            .map(|keyword| keyword.trim().to_lowercase())
                            .filter(|keyword| !keyword.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                priority: Priority::from_name(
                    &str_option(options, "priority").unwrap_or_default(),
                ),
            },
            "rule-edit" => Command::RuleEdit {
                rule_id: required_str(options, "rule_id")?,
                title: str_option(options, "title"),
                content: str_option(options, "content"),
                keywords: str_option(options, "keywords").map(|list| {
                    list.split(',')
                        .map(|keyword| keyword.trim().to_lowercase())
                        .filter(|keyword| !keyword.is_empty())
                        .collect()
                }),
                priority: str_option(options, "priority")
                    .map(|priority| Priority::from_name(&priority)),
            },
            "rule-remove" => Command::RuleRemove {
                rule_id: required_str(options, "rule_id")?,
            },
            "categories" => Command::Categories {
                category: str_option(options, "category"),
            },
            "punish" => {
                let (user, target_roles) = required_user(options, "user")?;
                Command::Punish {
                    user,
                    target_roles,
                    rule_id: required_str(options, "rule_id")?,
                    duration_minutes: str_option(options, "duration")
                        .map(|duration| parse_duration(&duration))
                        .transpose()?,
                }
            }
            "warn" => {
                let (user, _) = required_user(options, "user")?;
                Command::Warn {
                    user,
                    reason: required_str(options, "reason")?,
                    rule_id: str_option(options, "rule_id"),
                }
            }
            "ticket" => Command::TicketOpen {
                category: TicketCategory::from_name(&required_str(options, "category")?),
                urgency: Urgency::from_name(
                    &str_option(options, "urgency").unwrap_or_default(),
                ),
                description: required_str(options, "description")?,
            },
            "close" => Command::TicketClose {
                reason: str_option(options, "reason")
                    .unwrap_or_else(|| "Resolved".to_string()),
            },
            "assign" => {
                let (staff, _) = required_user(options, "staff")?;
                Command::TicketAssign { staff }
            }
            "announce" => Command::Announce {
                title: required_str(options, "title")?,
                content: required_str(options, "content")?,
                ping_everyone: bool_option(options, "ping_everyone").unwrap_or(false),
            },
            "status" => Command::Status,
            other => bail!("unknown command /{}", other),
        };
        Ok(command)
    }

    /// Register every slash command on the guild
    pub fn register(commands: &mut CreateApplicationCommands) -> &mut CreateApplicationCommands {
        commands
            .create_application_command(|command| {
                command
                    .name("rules")
                    .description("Search the server rules")
                    .create_option(|option| {
                        option
                            .name("query")
                            .description("Keywords to search for")
                            .kind(CommandOptionType::String)
                            .required(false)
                    })
                    .create_option(|option| {
                        option
                            .name("category")
                            .description("Limit results to one category")
                            .kind(CommandOptionType::String)
                            .required(false)
                    })
            })
            .create_application_command(|command| {
                command
                    .name("rule-view")
                    .description("Show one rule in full")
                    .create_option(|option| {
                        option
                            .name("rule_id")
                            .description("Rule id, e.g. GR001")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
            })
            .create_application_command(|command| {
                command
                    .name("rule-add")
                    .description("Add a rule to the database (admin)")
                    .create_option(|option| {
                        option
                            .name("category")
                            .description("Category name")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("subcategory")
                            .description("Subcategory within the category")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("title")
                            .description("Rule title")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("content")
                            .description("Rule text")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("keywords")
                            .description("Comma-separated search keywords")
                            .kind(CommandOptionType::String)
                            .required(false)
                    })
                    .create_option(|option| {
                        option
                            .name("priority")
                            .description("Rule priority")
                            .kind(CommandOptionType::String)
                            .required(false)
                            .add_string_choice("Low", "low")
                            .add_string_choice("Medium", "medium")
                            .add_string_choice("High", "high")
                            .add_string_choice("Critical", "critical")
                    })
            })
            .create_application_command(|command| {
                command
                    .name("rule-edit")
                    .description("Edit fields of an existing rule (admin)")
                    .create_option(|option| {
                        option
                            .name("rule_id")
                            .description("Rule id, e.g. GR001")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("title")
                            .description("New title")
                            .kind(CommandOptionType::String)
                            .required(false)
                    })
                    .create_option(|option| {
                        option
                            .name("content")
                            .description("New rule text")
                            .kind(CommandOptionType::String)
                            .required(false)
                    })
                    .create_option(|option| {
                        option
                            .name("keywords")
                            .description("New comma-separated keywords")
                            .kind(CommandOptionType::String)
                            .required(false)
                    })
                    .create_option(|option| {
                        option
                            .name("priority")
                            .description("New priority")
                            .kind(CommandOptionType::String)
                            .required(false)
                            .add_string_choice("Low", "low")
                            .add_string_choice("Medium", "medium")
                            .add_string_choice("High", "high")
                            .add_string_choice("Critical", "critical")
                    })
            })
            .create_application_command(|command| {
                command
                    .name("categories")
                    .description("List rule categories, or the rules in one")
                    .create_option(|option| {
                        option
                            .name("category")
                            .description("Category to list")
                            .kind(CommandOptionType::String)
                            .required(false)
                    })
            })
            .create_application_command(|command| {
                command
                    .name("rule-remove")
                    .description("Delete a rule from the database (admin)")
                    .create_option(|option| {
                        option
                            .name("rule_id")
                            .description("Rule id, e.g. GR001")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
            })
            .create_application_command(|command| {
                command
                    .name("punish")
                    .description("Apply the next punishment for a rule violation")
                    .create_option(|option| {
                        option
                            .name("user")
                            .description("User being punished")
                            .kind(CommandOptionType::User)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("rule_id")
                            .description("Rule that was violated")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("duration")
                            .description("Duration override, e.g. 90 or 1d2h30m")
                            .kind(CommandOptionType::String)
                            .required(false)
                    })
            })
            .create_application_command(|command| {
                command
                    .name("warn")
                    .description("Record an expiring warning for a user")
                    .create_option(|option| {
                        option
                            .name("user")
                            .description("User being warned")
                            .kind(CommandOptionType::User)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("reason")
                            .description("Why the warning is issued")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("rule_id")
                            .description("Related rule id")
                            .kind(CommandOptionType::String)
                            .required(false)
                    })
            })
            .create_application_command(|command| {
                command
                    .name("ticket")
                    .description("Open a support ticket")
                    .create_option(|option| {
                        option
                            .name("category")
                            .description("What the ticket is about")
                            .kind(CommandOptionType::String)
                            .required(true)
                            .add_string_choice("Support", "support")
                            .add_string_choice("Player Report", "player_report")
                            .add_string_choice("Bug Report", "bug_report")
                            .add_string_choice("Gang Registration", "gang_registration")
                            .add_string_choice("Shop", "shop")
                            .add_string_choice("Other", "other")
                    })
                    .create_option(|option| {
                        option
                            .name("description")
                            .description("Describe your issue")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("urgency")
                            .description("How urgent the issue is")
                            .kind(CommandOptionType::String)
                            .required(false)
                            .add_string_choice("Low", "low")
                            .add_string_choice("Medium", "medium")
                            .add_string_choice("High", "high")
                            .add_string_choice("Critical", "critical")
                    })
            })
            .create_application_command(|command| {
                command
                    .name("close")
                    .description("Close the ticket in this channel (staff)")
                    .create_option(|option| {
                        option
                            .name("reason")
                            .description("Close reason")
                            .kind(CommandOptionType::String)
                            .required(false)
                    })
            })
            .create_application_command(|command| {
                command
                    .name("assign")
                    .description("Assign a staff member to this ticket (staff)")
                    .create_option(|option| {
                        option
                            .name("staff")
                            .description("Staff member to assign")
                            .kind(CommandOptionType::User)
                            .required(true)
                    })
            })
            .create_application_command(|command| {
                command
                    .name("announce")
                    .description("Post a server announcement (admin)")
                    .create_option(|option| {
                        option
                            .name("title")
                            .description("Announcement title")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("content")
                            .description("Announcement body")
                            .kind(CommandOptionType::String)
                            .required(true)
                    })
                    .create_option(|option| {
                        option
                            .name("ping_everyone")
                            .description("Mention @everyone")
                            .kind(CommandOptionType::Boolean)
                            .required(false)
                    })
            })
            .create_application_command(|command| {
                command
                    .name("status")
                    .description("Show automation counters (staff)")
            })
    }
}

fn str_option(options: &[CommandDataOption], name: &str) -> Option<String> {
    options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.resolved.as_ref())
        .and_then(|value| match value {
            CommandDataOptionValue::String(value) => Some(value.clone()),
            _ => None,
        })
}

fn required_str(options: &[CommandDataOption], name: &str) -> Result<String> {
    str_option(options, name).with_context(|| format!("missing required option `{}`", name))
}

fn bool_option(options: &[CommandDataOption], name: &str) -> Option<bool> {
    options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.resolved.as_ref())
        .and_then(|value| match value {
            CommandDataOptionValue::Boolean(value) => Some(*value),
            _ => None,
        })
}

fn required_user(options: &[CommandDataOption], name: &str) -> Result<(UserId, Vec<RoleId>)> {
    options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.resolved.as_ref())
        .and_then(|value| match value {
            CommandDataOptionValue::User(user, member) => Some((
                user.id,
                member
                    .as_ref()
                    .map(|member| member.roles.clone())
                    .unwrap_or_default(),
            )),
            _ => None,
        })
        .with_context(|| format!("missing required option `{}`", name))
}
