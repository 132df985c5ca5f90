use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::punishment::format_duration;
use crate::ticket_system::Ticket;

/// One message captured from a ticket channel
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    pub author: String,
    pub content: String,
    pub attachments: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Render a plain-text transcript: a header with the ticket metadata, the
/// full message log in chronological order, and a footer summary.
///
/// The sort is stable, so messages sharing a timestamp stay in the order
/// the caller supplied them. Callers fetching from the gateway must pass
/// oldest-first.
pub fn render(ticket: &Ticket, messages: &[TranscriptMessage], tz: Tz) -> String {
    let mut messages = messages.to_vec();
    messages.sort_by_key(|message| message.timestamp);

    let now = Utc::now();
    let staff = if ticket.staff_involved.is_empty() {
        "None".to_string()
    } else {
        ticket
            .staff_involved
            .iter()
            .map(|staff| staff.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut out = String::new();
    out.push_str("SUPPORT TICKET TRANSCRIPT\n");
    out.push_str("=====================================\n\n");
    out.push_str(&format!("Ticket ID: {}\n", ticket.id));
    out.push_str(&format!("Category: {}\n", ticket.category.name()));
    out.push_str(&format!("Urgency: {}\n", ticket.urgency.name()));
    out.push_str(&format!(
        "User: {} (ID: {})\n",
        ticket.username, ticket.user_id
    ));
    out.push_str(&format!("Created: {}\n", format_time(ticket.created_at, tz)));
    out.push_str(&format!(
        "Closed: {}\n",
        ticket
            .closed_at
            .map(|at| format_time(at, tz))
            .unwrap_or_else(|| "N/A".to_string())
    ));
    out.push_str(&format!(
        "Duration: {}\n\n",
        format_duration(ticket.duration_minutes(now))
    ));
    out.push_str(&format!("Initial Description:\n{}\n\n", ticket.description));
    out.push_str(&format!("Staff Involved: {}\n", staff));
    out.push_str(&format!(
        "Close Reason: {}\n\n",
        ticket.close_reason.as_deref().unwrap_or("N/A")
    ));
    out.push_str("=====================================\n");
    out.push_str("FULL CONVERSATION LOG\n");
    out.push_str("=====================================\n\n");

    for message in &messages {
        out.push_str(&format!(
            "[{}] {}: {}\n",
            format_time(message.timestamp, tz),
            message.author,
            message.content
        ));
        for attachment in &message.attachments {
            out.push_str(&format!("    Attachment: {}\n", attachment));
        }
        out.push('\n');
    }

    out.push_str("=====================================\n");
    out.push_str("TICKET SUMMARY\n");
    out.push_str("=====================================\n\n");
    out.push_str(&format!("Total Messages: {}\n", messages.len()));
    out.push_str(&format!(
        "Ticket Duration: {}\n",
        format_duration(ticket.duration_minutes(now))
    ));
    out.push_str(&format!(
        "Resolution: {}\n",
        ticket.close_reason.as_deref().unwrap_or("Open")
    ));
    out.push_str(&format!("Generated: {}\n", format_time(now, tz)));
    out
}

/// Write a transcript next to the others, named after the ticket and the
/// closing time
pub fn save(dir: &Path, ticket_id: &str, content: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create transcript directory {}", dir.display()))?;
    let path = dir.join(format!(
        "transcript_{}_{}.txt",
        ticket_id,
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    fs::write(&path, content)
        .with_context(|| format!("failed to write transcript {}", path.display()))?;
    Ok(path)
}

fn format_time(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use chrono_tz::UTC;
    use serenity::model::id::UserId;

    fn message(author: &str, content: &str, at: DateTime<Utc>) -> TranscriptMessage {
        TranscriptMessage {
            author: author.to_string(),
            content: content.to_string(),
            attachments: Vec::new(),
            timestamp: at,
        }
    }

    #[test]
    fn transcript_contains_every_message_in_chronological_order() {
        let mut ticket = Ticket::sample("TKT-0001", 1, 100);
        ticket.closed_at = Some(ticket.created_at + Duration::hours(2));
        ticket.close_reason = Some("Resolved".to_string());
        let base = ticket.created_at;
        // deliberately out of order
        let messages = vec![
            message("staff", "looking into it", base + Duration::minutes(10)),
            message("user1", "my car vanished", base + Duration::minutes(1)),
            message("user1", "thanks!", base + Duration::minutes(20)),
        ];

        let transcript = render(&ticket, &messages, UTC);
        let first = transcript.find("my car vanished").unwrap();
        let second = transcript.find("looking into it").unwrap();
        let third = transcript.find("thanks!").unwrap();
        assert!(first < second && second < third);
        assert!(transcript.contains("Total Messages: 3"));
        assert!(transcript.contains("Close Reason: Resolved"));
        assert!(transcript.contains("TKT-0001"));
    }

    #[test]
    fn same_second_messages_keep_their_given_order() {
        let ticket = Ticket::sample("TKT-0004", 1, 100);
        // Discord timestamps only carry whole seconds, so a quick exchange
        // can land on the same instant
        let at = ticket.created_at + Duration::minutes(1);
        let messages = vec![
            message("user1", "can you see the gate?", at),
            message("staff", "yes, opening it now", at),
            message("user1", "got in, thanks", at),
        ];

        let transcript = render(&ticket, &messages, UTC);
        let first = transcript.find("can you see the gate?").unwrap();
        let second = transcript.find("yes, opening it now").unwrap();
        let third = transcript.find("got in, thanks").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn long_conversations_render_in_full() {
        let ticket = Ticket::sample("TKT-0005", 1, 100);
        let base = ticket.created_at;
        let messages: Vec<TranscriptMessage> = (0..250)
            .map(|i| message("user1", &format!("update {}", i), base + Duration::seconds(i)))
            .collect();

        let transcript = render(&ticket, &messages, UTC);
        assert!(transcript.contains("Total Messages: 250"));
        assert!(transcript.contains("update 0\n"));
        assert!(transcript.contains("update 249\n"));
    }

    #[test]
    fn attachments_are_listed_under_their_message() {
        let ticket = Ticket::sample("TKT-0002", 1, 100);
        let mut msg = message("user1", "screenshot attached", Utc::now());
        msg.attachments.push("https://cdn.example/proof.png".to_string());

        let transcript = render(&ticket, &[msg], UTC);
        assert!(transcript.contains("Attachment: https://cdn.example/proof.png"));
    }

    #[test]
    fn open_ticket_renders_without_close_metadata() {
        let mut ticket = Ticket::sample("TKT-0003", 1, 100);
        ticket.staff_involved.push(UserId(7));

        let transcript = render(&ticket, &[], UTC);
        assert!(transcript.contains("Closed: N/A"));
        assert!(transcript.contains("Resolution: Open"));
        assert!(transcript.contains("Staff Involved: 7"));
    }
}
