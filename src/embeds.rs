use serenity::builder::CreateEmbed;
use serenity::model::Timestamp;

use crate::announcements::Announcement;
use crate::automation::StatsSnapshot;
use crate::punishment::{format_duration, LadderRung};
use std::collections::BTreeMap;

use crate::rule_index::{CategoryInfo, CategoryStats, Rule, SearchHit};
use crate::ticket_system::Ticket;

/// Embed for a single rule
pub fn rule<'a>(
    e: &'a mut CreateEmbed,
    rule_id: &str,
    rule: &Rule,
    category: Option<&CategoryInfo>,
) -> &'a mut CreateEmbed {
    let emoji = category.map(|c| c.emoji.as_str()).unwrap_or("📋");
    let color = category.map(|c| c.color).unwrap_or(0x3498DB);
    e.title(format!("{} {}", emoji, rule.title));
    e.description(&rule.content);
    e.colour(color);
    e.field(
        "Rule",
        format!(
            "**ID**: {}\n**Category**: {}\n**Subcategory**: {}",
            rule_id, rule.category, rule.subcategory
        ),
        true,
    );
    e.field("Priority", rule.priority.display(), true);
    e.field(
        "Enforcement",
        format!(
            "**Enforced by**: {} and above\n**Appeal**: {}",
            rule.min_staff_rank.display(),
            if rule.appeal_allowed {
                rule.appeal_process.as_str()
            } else {
                "Not appealable"
            }
        ),
        true,
    );
    if !rule.keywords.is_empty() {
        e.field("Keywords", rule.keywords.join(", "), true);
    }
    e.footer(|f| f.text(format!("Rules Database • {}", rule_id)));
    e.timestamp(Timestamp::now());
    e
}

/// Embed listing rule search results
pub fn search_results<'a>(
    e: &'a mut CreateEmbed,
    query: &str,
    hits: &[SearchHit],
) -> &'a mut CreateEmbed {
    if query.is_empty() {
        e.title("Rules");
    } else {
        e.title(format!("Rules matching \"{}\"", query));
    }
    e.colour(0x3498DB);
    if hits.is_empty() {
        e.description("No rules matched. Try different keywords or a category.");
        return e;
    }
    for hit in hits {
        e.field(
            format!("{} — {}", hit.rule_id, hit.rule.title),
            format!(
                "{} • {} / {}",
                hit.rule.priority.display(),
                hit.rule.category,
                hit.rule.subcategory
            ),
            false,
        );
    }
    e.footer(|f| f.text(format!("{} result(s)", hits.len())));
    e
}

/// One field per category with its rule counts
pub fn category_overview<'a>(
    e: &'a mut CreateEmbed,
    categories: &BTreeMap<String, CategoryInfo>,
    stats: &BTreeMap<String, CategoryStats>,
) -> &'a mut CreateEmbed {
    e.title("Rule Categories");
    e.colour(0x3498DB);
    for (name, info) in categories {
        let total = stats.get(name).map(|s| s.total_rules).unwrap_or(0);
        e.field(
            format!("{} {}", info.emoji, name),
            format!(
                "{}\n**Rules**: {} • **Subcategories**: {}",
                info.description,
                total,
                info.subcategories.join(", ")
            ),
            false,
        );
    }
    e
}

/// Welcome embed posted into a freshly created ticket channel
pub fn ticket_opened<'a>(e: &'a mut CreateEmbed, ticket: &Ticket) -> &'a mut CreateEmbed {
    e.title(format!(
        "{} {} Ticket #{}",
        ticket.category.emoji(),
        ticket.category.name(),
        ticket.id
    ));
    e.description(format!(
        "**Ticket created for:** <@{}>\n**Urgency:** {} {}",
        ticket.user_id,
        ticket.urgency.emoji(),
        ticket.urgency.name()
    ));
    e.colour(ticket.category.color());
    e.field("Issue Description", &ticket.description, false);
    e.field(
        "Created",
        format!("<t:{}:F>", ticket.created_at.timestamp()),
        true,
    );
    e.field("Priority Score", ticket.priority.to_string(), true);
    e.timestamp(Timestamp::now());
    e
}

/// Automated category response sent after the welcome embed
pub fn ticket_auto_response<'a>(e: &'a mut CreateEmbed, ticket: &Ticket) -> &'a mut CreateEmbed {
    e.title(format!("Automated Response — {}", ticket.category.name()));
    e.description(ticket.category.auto_response());
    e.colour(0x3498DB);
    e.footer(|f| f.text("This is an automated message • Staff will respond soon"));
    e
}

/// Close notification DMed to the requester
pub fn ticket_closed<'a>(e: &'a mut CreateEmbed, ticket: &Ticket) -> &'a mut CreateEmbed {
    e.title(format!("Ticket {} Closed", ticket.id));
    e.description(format!(
        "**Reason**: {}\n**Closed by**: <@{}>\n**Duration**: {}",
        ticket.close_reason.as_deref().unwrap_or("Resolved"),
        ticket.closed_by.map(|by| by.0).unwrap_or_default(),
        format_duration(ticket.duration_minutes(chrono::Utc::now())),
    ));
    e.colour(0xE74C3C);
    e
}

/// Archive entry posted to the ticket-logs channel alongside the transcript
pub fn transcript_log<'a>(e: &'a mut CreateEmbed, ticket: &Ticket) -> &'a mut CreateEmbed {
    e.title(format!("Ticket Transcript — {}", ticket.id));
    e.description(format!(
        "**Category**: {}\n**User**: <@{}>\n**Staff involved**: {}",
        ticket.category.name(),
        ticket.user_id,
        ticket.staff_involved.len()
    ));
    e.colour(0x3498DB);
    e
}

/// Punishment decision shown to the issuing staff member
pub fn punishment<'a>(
    e: &'a mut CreateEmbed,
    user: serenity::model::id::UserId,
    rule_id: &str,
    rule_title: Option<&str>,
    rung: &LadderRung,
    offense_ordinal: usize,
) -> &'a mut CreateEmbed {
    e.title(format!("{} — offense #{}", rung.punishment.display(), offense_ordinal));
    e.description(format!(
        "**User**: <@{}>\n**Rule**: {} {}\n**Punishment**: {}",
        user,
        rule_id,
        rule_title.unwrap_or(""),
        rung.details
    ));
    if let Some(minutes) = rung.punishment.duration_minutes() {
        e.field("Duration", format_duration(minutes), true);
    }
    if rung.punishment.fine() > 0 {
        e.field("Fine", format!("${}", rung.punishment.fine()), true);
    }
    e.colour(0xE67E22);
    e.timestamp(Timestamp::now());
    e
}

/// Announcement embed posted to the announcements channel
pub fn announcement<'a>(
    e: &'a mut CreateEmbed,
    announcement: &Announcement,
) -> &'a mut CreateEmbed {
    e.title(&announcement.title);
    e.description(&announcement.content);
    e.colour(0x3498DB);
    e.footer(|f| f.text(format!("Announced by {}", announcement.author_name)));
    e.timestamp(Timestamp::now());
    e
}

/// Automation status report
pub fn automation_report<'a>(e: &'a mut CreateEmbed, stats: &StatsSnapshot) -> &'a mut CreateEmbed {
    e.title("Automation Status");
    e.colour(0x2ECC71);
    e.field(
        "Counters",
        format!(
            "**Tickets auto-closed**: {}\n**Warnings expired**: {}\n**Backups created**: {}\n**Cleanup actions**: {}",
            stats.tickets_auto_closed,
            stats.warnings_expired,
            stats.backups_created,
            stats.cleanup_actions
        ),
        false,
    );
    e.timestamp(Timestamp::now());
    e
}

/// User-visible failure embed
pub fn failure<'a>(e: &'a mut CreateEmbed, title: &str, message: &str) -> &'a mut CreateEmbed {
    e.title(format!("❌ {}", title));
    e.description(message);
    e.colour(0xE74C3C);
    e
}
