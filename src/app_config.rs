use anyhow::{Context as _, Result};
use config::Config;
use serenity::model::id::{ChannelId, GuildId, RoleId};

/// Guild, channel and role ids the bot operates on
#[derive(Debug, Default, serde::Deserialize, PartialEq, Clone)]
pub struct DiscordConfig {
    /// Guild the bot manages
    pub guild_id: GuildId,
    /// Category channel that ticket channels are created under
    pub tickets_category_id: ChannelId,
    /// Channel announcements are posted to
    pub announcements_channel_id: ChannelId,
    /// Channel ticket transcripts are archived to
    pub ticket_logs_channel_id: ChannelId,
    /// Channel staff action notifications are posted to
    pub staff_logs_channel_id: ChannelId,
    /// Admin role
    pub admin_role_id: RoleId,
    /// Senior staff role
    pub senior_staff_role_id: RoleId,
    /// Staff role
    pub staff_role_id: RoleId,
    /// Moderator role
    pub moderator_role_id: RoleId,
    /// Helper role
    pub helper_role_id: RoleId,
    /// IANA timezone used when rendering timestamps (e.g. "Asia/Karachi")
    #[serde(default = "default_timezone")]
    pub display_timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Ticket lifecycle tunables
#[derive(Debug, serde::Deserialize, PartialEq, Clone)]
pub struct TicketConfig {
    /// Hours of inactivity before a ticket is auto-closed
    #[serde(default = "default_auto_close_hours")]
    pub auto_close_hours: i64,
    /// Minutes between inactivity sweeps
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
    /// Open tickets a single user may hold at once
    #[serde(default = "default_max_open_per_user")]
    pub max_open_per_user: usize,
    /// Directory transcripts are written to
    #[serde(default = "default_transcript_dir")]
    pub transcript_dir: String,
}

fn default_auto_close_hours() -> i64 {
    72
}

fn default_sweep_interval_minutes() -> u64 {
    30
}

fn default_max_open_per_user() -> usize {
    3
}

fn default_transcript_dir() -> String {
    "transcripts".to_string()
}

impl Default for TicketConfig {
    fn default() -> Self {
        TicketConfig {
            auto_close_hours: default_auto_close_hours(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
            max_open_per_user: default_max_open_per_user(),
            transcript_dir: default_transcript_dir(),
        }
    }
}

/// Rule database tunables
#[derive(Debug, serde::Deserialize, PartialEq, Clone)]
pub struct RuleConfig {
    /// Maximum results returned by a rule search
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// Directory the rule and category JSON files live in
    #[serde(default = "default_rule_dir")]
    pub data_dir: String,
}

fn default_search_limit() -> usize {
    15
}

fn default_rule_dir() -> String {
    "rule_database".to_string()
}

impl Default for RuleConfig {
    fn default() -> Self {
        RuleConfig {
            search_limit: default_search_limit(),
            data_dir: default_rule_dir(),
        }
    }
}

/// Announcement tunables
#[derive(Debug, serde::Deserialize, PartialEq, Clone)]
pub struct AnnouncementConfig {
    /// Minutes a staff member must wait between announcements
    #[serde(default = "default_announcement_cooldown")]
    pub cooldown_minutes: i64,
    /// Maximum announcement body length
    #[serde(default = "default_announcement_length")]
    pub max_length: usize,
}

fn default_announcement_cooldown() -> i64 {
    30
}

fn default_announcement_length() -> usize {
    2000
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        AnnouncementConfig {
            cooldown_minutes: default_announcement_cooldown(),
            max_length: default_announcement_length(),
        }
    }
}

/// Periodic maintenance tunables
#[derive(Debug, serde::Deserialize, PartialEq, Clone)]
pub struct AutomationConfig {
    /// Hours between database backups
    #[serde(default = "default_backup_interval_hours")]
    pub backup_interval_hours: u64,
    /// Minutes between warning/violation expiry sweeps
    #[serde(default = "default_expiry_sweep_minutes")]
    pub expiry_sweep_minutes: u64,
    /// Days closed tickets and action logs are retained
    #[serde(default = "default_retention_days")]
    pub log_retention_days: i64,
}

fn default_backup_interval_hours() -> u64 {
    6
}

fn default_expiry_sweep_minutes() -> u64 {
    60
}

fn default_retention_days() -> i64 {
    90
}

impl Default for AutomationConfig {
    fn default() -> Self {
        AutomationConfig {
            backup_interval_hours: default_backup_interval_hours(),
            expiry_sweep_minutes: default_expiry_sweep_minutes(),
            log_retention_days: default_retention_days(),
        }
    }
}

/// SQLite store location
#[derive(Debug, serde::Deserialize, PartialEq, Clone)]
pub struct DatabaseConfig {
    /// Directory the database file and backups live in
    #[serde(default = "default_database_dir")]
    pub dir: String,
}

fn default_database_dir() -> String {
    "database".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            dir: default_database_dir(),
        }
    }
}

/// Application configuration
#[derive(Debug, Default, serde::Deserialize, PartialEq, Clone)]
pub struct AppConfig {
    /// Discord ids
    pub discord: DiscordConfig,
    /// Ticket lifecycle settings
    #[serde(default)]
    pub tickets: TicketConfig,
    /// Rule database settings
    #[serde(default)]
    pub rules: RuleConfig,
    /// Announcement settings
    #[serde(default)]
    pub announcements: AnnouncementConfig,
    /// Automation settings
    #[serde(default)]
    pub automation: AutomationConfig,
    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Load configuration from `config.toml` and `APP_`-prefixed environment variables
    pub fn load_config() -> Result<AppConfig> {
        let config = Config::builder()
            // Add in `./config.toml`
            .add_source(config::File::with_name("config.toml"))
            // Add in settings from the environment (with a prefix of APP)
            // Eg.. `APP_DEBUG=1 ./target/app` would set the `debug` key
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;
        let app_config = config
            .try_deserialize::<AppConfig>()
            .context("failed to parse configuration file")?;
        Ok(app_config)
    }
}
