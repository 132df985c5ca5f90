use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use futures::lock::Mutex;
use log::info;
use serenity::model::id::{ChannelId, UserId};

use crate::app_config::AnnouncementConfig;
use crate::community_db::CommunityDb;

/// Validated announcement ready to be posted
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub title: String,
    pub content: String,
    pub author_id: UserId,
    pub author_name: String,
    pub ping_everyone: bool,
}

/// Announcement pipeline: per-author cooldown, length validation and
/// persistence. Posting to the channel itself is the handler's job.
pub struct AnnouncementSystem {
    cooldowns: Mutex<HashMap<UserId, DateTime<Utc>>>,
    db: Arc<CommunityDb>,
    config: AnnouncementConfig,
}

impl AnnouncementSystem {
    pub fn new(db: Arc<CommunityDb>, config: AnnouncementConfig) -> AnnouncementSystem {
        AnnouncementSystem {
            cooldowns: Mutex::new(HashMap::new()),
            db,
            config,
        }
    }

    /// Content checks that do not touch the cooldown table
    pub fn validate(&self, announcement: &Announcement) -> Result<()> {
        if announcement.title.trim().is_empty() || announcement.content.trim().is_empty() {
            bail!("announcement title and content are required");
        }
        if announcement.content.len() > self.config.max_length {
            bail!(
                "announcement is {} characters long; the limit is {}",
                announcement.content.len(),
                self.config.max_length
            );
        }
        Ok(())
    }

    /// Validate the announcement and start the author's cooldown in one
    /// step, so two interleaved posts by the same author cannot both pass
    /// the check. Call `release` if the post fails afterwards.
    pub async fn reserve(&self, announcement: &Announcement, now: DateTime<Utc>) -> Result<()> {
        self.validate(announcement)?;
        let mut cooldowns = self.cooldowns.lock().await;
        if let Some(last) = cooldowns.get(&announcement.author_id) {
            let ready_at = *last + Duration::minutes(self.config.cooldown_minutes);
            if now < ready_at {
                bail!(
                    "you posted an announcement recently; try again in {} minutes",
                    (ready_at - now).num_minutes().max(1)
                );
            }
        }
        cooldowns.insert(announcement.author_id, now);
        Ok(())
    }

    /// Clear a cooldown started by `reserve` when the post never went out
    pub async fn release(&self, author_id: UserId) {
        self.cooldowns.lock().await.remove(&author_id);
    }

    /// Record a posted announcement
    pub async fn record(
        &self,
        announcement: &Announcement,
        channel_id: ChannelId,
        message_id: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.db
            .insert_announcement(
                &announcement.title,
                &announcement.content,
                announcement.author_id,
                &announcement.author_name,
                announcement.ping_everyone,
                channel_id,
                message_id,
                now,
            )
            .await?;
        info!(
            "announcement \"{}\" posted by {}",
            announcement.title, announcement.author_name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(author: u64, content: &str) -> Announcement {
        Announcement {
            title: "Maintenance".to_string(),
            content: content.to_string(),
            author_id: UserId(author),
            author_name: format!("admin{}", author),
            ping_everyone: false,
        }
    }

    fn system() -> AnnouncementSystem {
        AnnouncementSystem::new(
            Arc::new(CommunityDb::open_in_memory().unwrap()),
            AnnouncementConfig::default(),
        )
    }

    #[tokio::test]
    async fn cooldown_blocks_rapid_reposts_per_author() {
        let system = system();
        let now = Utc::now();
        let first = announcement(1, "server down at 20:00");
        system.reserve(&first, now).await.unwrap();
        system.record(&first, ChannelId(5), 100, now).await.unwrap();

        assert!(system.reserve(&first, now + Duration::minutes(5)).await.is_err());
        // a different author is not throttled
        assert!(system
            .reserve(&announcement(2, "hi"), now + Duration::minutes(5))
            .await
            .is_ok());
        // and the author recovers after the window
        assert!(system
            .reserve(&first, now + Duration::minutes(31))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn only_one_of_two_simultaneous_posts_wins_the_cooldown() {
        let system = Arc::new(system());
        let now = Utc::now();
        let first = system.clone();
        let second = system.clone();
        let a = tokio::spawn(async move {
            first.reserve(&announcement(1, "double post"), now).await
        });
        let b = tokio::spawn(async move {
            second.reserve(&announcement(1, "double post"), now).await
        });
        let passed =
            a.await.unwrap().is_ok() as u8 + b.await.unwrap().is_ok() as u8;
        assert_eq!(passed, 1);
    }

    #[tokio::test]
    async fn failed_post_releases_the_cooldown() {
        let system = system();
        let now = Utc::now();
        let post = announcement(1, "rolled back");
        system.reserve(&post, now).await.unwrap();
        system.release(post.author_id).await;
        assert!(system.reserve(&post, now).await.is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized_announcements() {
        let system = system();
        assert!(system.validate(&announcement(1, "")).is_err());
        assert!(system.validate(&announcement(1, &"x".repeat(2001))).is_err());
        assert!(system.validate(&announcement(1, &"x".repeat(2000))).is_ok());
    }
}
