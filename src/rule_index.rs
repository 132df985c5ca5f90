use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use log::info;
use serenity::model::id::UserId;

use crate::permissions::StaffRank;
use crate::punishment::{default_rung, LadderRung, PunishmentLadder};

/// Rule priority, weighted into the search ranking
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Weight added to the match score when ranking search results
    pub fn weight(&self) -> i64 {
        match self {
            Priority::Low => 50,
            Priority::Medium => 100,
            Priority::High => 500,
            Priority::Critical => 1000,
        }
    }

    /// Parse a priority name, defaulting unknown input to `Medium`
    pub fn from_name(name: &str) -> Priority {
        match name.to_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "critical" => Priority::Critical,
            _ => Priority::Medium,
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Critical => "Critical",
        }
    }
}

/// A server rule
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Rule {
    pub title: String,
    pub content: String,
    pub category: String,
    pub subcategory: String,
    pub keywords: Vec<String>,
    pub priority: Priority,
    pub punishments: PunishmentLadder,
    pub appeal_allowed: bool,
    pub appeal_process: String,
    pub min_staff_rank: StaffRank,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Rule category metadata
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CategoryInfo {
    pub description: String,
    pub subcategories: Vec<String>,
    /// Prefix used when generating rule ids, e.g. "GR" for GR001
    pub prefix: String,
    /// Embed accent color
    pub color: u32,
    pub emoji: String,
}

/// Fields for a rule being created
#[derive(Debug, Clone)]
pub struct NewRule {
    pub category: String,
    pub subcategory: String,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub priority: Priority,
    pub punishments: Option<PunishmentLadder>,
    pub appeal_allowed: bool,
    pub appeal_process: Option<String>,
    pub min_staff_rank: StaffRank,
    pub created_by: UserId,
}

/// Partial update applied to an existing rule
#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub priority: Option<Priority>,
    pub punishments: Option<PunishmentLadder>,
    pub appeal_allowed: Option<bool>,
    pub appeal_process: Option<String>,
    pub min_staff_rank: Option<StaffRank>,
}

/// A scored search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub rule_id: String,
    /// Match score plus the rule's priority weight
    pub score: i64,
    pub rule: Rule,
}

/// Per-category statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryStats {
    pub total_rules: usize,
    pub by_subcategory: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<&'static str, usize>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// In-memory rule database with JSON persistence.
///
/// Rules are kept in a `BTreeMap` so iteration, and therefore search
/// tie-breaking, is deterministic by rule id ascending.
pub struct RuleIndex {
    rules: BTreeMap<String, Rule>,
    categories: BTreeMap<String, CategoryInfo>,
    rules_path: PathBuf,
    categories_path: PathBuf,
}

impl RuleIndex {
    /// Load the index from `data_dir`, seeding the default category table
    /// when none exists yet
    pub fn load(data_dir: &Path) -> Result<RuleIndex> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create rule directory {}", data_dir.display()))?;
        let rules_path = data_dir.join("rules.json");
        let categories_path = data_dir.join("categories.json");

        let rules: BTreeMap<String, Rule> = if rules_path.exists() {
            let raw = fs::read_to_string(&rules_path)
                .with_context(|| format!("failed to read {}", rules_path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", rules_path.display()))?
        } else {
            BTreeMap::new()
        };

        let categories: BTreeMap<String, CategoryInfo> = if categories_path.exists() {
            let raw = fs::read_to_string(&categories_path)
                .with_context(|| format!("failed to read {}", categories_path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", categories_path.display()))?
        } else {
            BTreeMap::new()
        };

        let mut index = RuleIndex {
            rules,
            categories,
            rules_path,
            categories_path,
        };
        if index.categories.is_empty() {
            index.categories = default_categories();
            index.save_categories()?;
        }
        info!(
            "rule index loaded: {} rules in {} categories",
            index.rules.len(),
            index.categories.len()
        );
        Ok(index)
    }

    /// Search rules by free-text query with an optional category filter.
    ///
    /// Scoring: title substring 100, exact keyword 80, keyword substring 40,
    /// content substring 30, subcategory substring 20, id substring 60, all
    /// summed, plus the rule's priority weight. The category filter is a
    /// hard predicate. An empty query with a category returns every rule in
    /// that category at a flat low score; an empty query without a category
    /// returns nothing. Equal scores are broken by rule id ascending.
    pub fn search(&self, query: &str, category: Option<&str>, limit: usize) -> Vec<SearchHit> {
        let query = query.trim().to_lowercase();
        if query.is_empty() && category.is_none() {
            return Vec::new();
        }

        let mut hits = Vec::new();
        for (rule_id, rule) in &self.rules {
            if let Some(category) = category {
                if rule.category != category {
                    continue;
                }
            }

            let score = if query.is_empty() {
                10
            } else {
                Self::match_score(&query, rule_id, rule)
            };
            if score > 0 {
                hits.push(SearchHit {
                    rule_id: rule_id.clone(),
                    score: score + rule.priority.weight(),
                    rule: rule.clone(),
                });
            }
        }

        // stable sort over id-ordered input keeps ties in id order
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(limit);
        hits
    }

    fn match_score(query: &str, rule_id: &str, rule: &Rule) -> i64 {
        let mut score = 0;
        if rule.title.to_lowercase().contains(query) {
            score += 100;
        }
        for keyword in &rule.keywords {
            let keyword = keyword.to_lowercase();
            if keyword == *query {
                score += 80;
            } else if keyword.contains(query) {
                score += 40;
            }
        }
        if rule.content.to_lowercase().contains(query) {
            score += 30;
        }
        if rule.subcategory.to_lowercase().contains(query) {
            score += 20;
        }
        if rule_id.to_lowercase().contains(query) {
            score += 60;
        }
        score
    }

    /// Select the punishment for a user's next violation of `rule_id`,
    /// given how many prior violations they already have for it.
    ///
    /// Unknown rule ids fall back to the standard warning so a stale id in
    /// a staff command still produces something issuable.
    pub fn punishment_for(&self, rule_id: &str, prior_offenses: usize) -> LadderRung {
        match self.rules.get(rule_id) {
            Some(rule) => rule.punishments.rung_for(prior_offenses),
            None => default_rung(),
        }
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.get(rule_id)
    }

    pub fn categories(&self) -> &BTreeMap<String, CategoryInfo> {
        &self.categories
    }

    /// Add a rule, generating its id from the category prefix.
    ///
    /// The in-memory insert is rolled back if persisting fails.
    pub fn add_rule(&mut self, new: NewRule) -> Result<String> {
        if new.title.is_empty() || new.content.is_empty() {
            bail!("title and content are required");
        }
        let category = match self.categories.get(&new.category) {
            Some(category) => category,
            None => bail!("unknown category: {}", new.category),
        };
        if !category.subcategories.contains(&new.subcategory) {
            bail!(
                "unknown subcategory {} in category {}",
                new.subcategory,
                new.category
            );
        }

        let prefix = category.prefix.clone();
        let rule_id = self.next_rule_id(&prefix);
        let now = Utc::now();
        let rule = Rule {
            title: new.title,
            content: new.content,
            category: new.category,
            subcategory: new.subcategory,
            keywords: new.keywords,
            priority: new.priority,
            punishments: new.punishments.unwrap_or_else(PunishmentLadder::standard),
            appeal_allowed: new.appeal_allowed,
            appeal_process: new
                .appeal_process
                .unwrap_or_else(|| "Submit appeal ticket within 48 hours".to_string()),
            min_staff_rank: new.min_staff_rank,
            created_by: new.created_by,
            created_at: now,
            last_updated: now,
        };

        self.rules.insert(rule_id.clone(), rule);
        if let Err(err) = self.save_rules() {
            self.rules.remove(&rule_id);
            return Err(err.context("failed to persist new rule"));
        }
        info!("rule {} added", rule_id);
        Ok(rule_id)
    }

    /// Apply a partial update to an existing rule
    pub fn update_rule(&mut self, rule_id: &str, update: RuleUpdate) -> Result<()> {
        let rule = match self.rules.get_mut(rule_id) {
            Some(rule) => rule,
            None => bail!("unknown rule: {}", rule_id),
        };
        if let Some(title) = update.title {
            rule.title = title;
        }
        if let Some(content) = update.content {
            rule.content = content;
        }
        if let Some(keywords) = update.keywords {
            rule.keywords = keywords;
        }
        if let Some(priority) = update.priority {
            rule.priority = priority;
        }
        if let Some(punishments) = update.punishments {
            rule.punishments = punishments;
        }
        if let Some(appeal_allowed) = update.appeal_allowed {
            rule.appeal_allowed = appeal_allowed;
        }
        if let Some(appeal_process) = update.appeal_process {
            rule.appeal_process = appeal_process;
        }
        if let Some(min_staff_rank) = update.min_staff_rank {
            rule.min_staff_rank = min_staff_rank;
        }
        rule.last_updated = Utc::now();
        self.save_rules()
            .with_context(|| format!("failed to persist update to rule {}", rule_id))
    }

    pub fn delete_rule(&mut self, rule_id: &str) -> Result<()> {
        let removed = match self.rules.remove(rule_id) {
            Some(rule) => rule,
            None => bail!("unknown rule: {}", rule_id),
        };
        if let Err(err) = self.save_rules() {
            self.rules.insert(rule_id.to_string(), removed);
            return Err(err.context("failed to persist rule deletion"));
        }
        info!("rule {} deleted", rule_id);
        Ok(())
    }

    /// Rules in a category, highest priority first, newest first within a
    /// priority
    pub fn rules_in_category(&self, category: &str, subcategory: Option<&str>) -> Vec<SearchHit> {
        let mut rules = self
            .rules
            .iter()
            .filter(|(_, rule)| rule.category == category)
            .filter(|(_, rule)| subcategory.map_or(true, |sub| rule.subcategory == sub))
            .map(|(rule_id, rule)| SearchHit {
                rule_id: rule_id.clone(),
                score: rule.priority.weight(),
                rule: rule.clone(),
            })
            .collect::<Vec<_>>();
        rules.sort_by(|a, b| {
            (b.rule.priority, b.rule.created_at).cmp(&(a.rule.priority, a.rule.created_at))
        });
        rules
    }

    /// Statistics per category
    pub fn category_stats(&self) -> BTreeMap<String, CategoryStats> {
        let mut stats: BTreeMap<String, CategoryStats> = self
            .categories
            .keys()
            .map(|name| (name.clone(), CategoryStats::default()))
            .collect();
        for rule in self.rules.values() {
            let entry = stats.entry(rule.category.clone()).or_default();
            entry.total_rules += 1;
            *entry
                .by_subcategory
                .entry(rule.subcategory.clone())
                .or_insert(0) += 1;
            *entry.by_priority.entry(rule.priority.display()).or_insert(0) += 1;
            entry.last_updated = match entry.last_updated {
                Some(existing) => Some(existing.max(rule.last_updated)),
                None => Some(rule.last_updated),
            };
        }
        stats
    }

    fn next_rule_id(&self, prefix: &str) -> String {
        let max_num = self
            .rules
            .keys()
            .filter_map(|rule_id| rule_id.strip_prefix(prefix))
            .filter_map(|num| num.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("{}{:03}", prefix, max_num + 1)
    }

    fn save_rules(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.rules)?;
        fs::write(&self.rules_path, raw)
            .with_context(|| format!("failed to write {}", self.rules_path.display()))
    }

    fn save_categories(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.categories)?;
        fs::write(&self.categories_path, raw)
            .with_context(|| format!("failed to write {}", self.categories_path.display()))
    }
}

/// Category table seeded on first run
fn default_categories() -> BTreeMap<String, CategoryInfo> {
    let category = |description: &str, subcategories: &[&str], prefix: &str, color, emoji: &str| {
        CategoryInfo {
            description: description.to_string(),
            subcategories: subcategories.iter().map(|s| s.to_string()).collect(),
            prefix: prefix.to_string(),
            color,
            emoji: emoji.to_string(),
        }
    };
    BTreeMap::from([
        (
            "General Rules".to_string(),
            category(
                "Basic server rules that apply to everyone",
                &["Behavior", "Communication", "Account Rules", "General Conduct"],
                "GR",
                0x3498DB,
                "📋",
            ),
        ),
        (
            "Roleplay Guidelines".to_string(),
            category(
                "Rules for maintaining quality roleplay",
                &[
                    "Character Development",
                    "Realistic Actions",
                    "Meta-gaming",
                    "Power-gaming",
                    "Fear RP",
                ],
                "RP",
                0x2ECC71,
                "🎭",
            ),
        ),
        (
            "Gang Regulations".to_string(),
            category(
                "Rules specific to gang activities and management",
                &["Gang Formation", "Territory Rules", "Gang Wars", "Recruitment"],
                "GG",
                0xE74C3C,
                "🏢",
            ),
        ),
        (
            "Vehicle Rules".to_string(),
            category(
                "Transportation and vehicle-related regulations",
                &["Driving Rules", "Vehicle Ownership", "Modifications", "Racing"],
                "VH",
                0xF39C12,
                "🚗",
            ),
        ),
        (
            "Property Guidelines".to_string(),
            category(
                "Property ownership and management rules",
                &["House Ownership", "Business Rules", "Property Sales", "Rent System"],
                "PR",
                0x9B59B6,
                "🏠",
            ),
        ),
        (
            "Economic System".to_string(),
            category(
                "Rules governing the server economy",
                &["Money Management", "Job Rules", "Trading", "Banking"],
                "EC",
                0x1ABC9C,
                "💰",
            ),
        ),
        (
            "Staff Protocols".to_string(),
            category(
                "Rules and procedures for staff members",
                &["Admin Duties", "Moderator Guidelines", "Punishment Guidelines"],
                "ST",
                0xE67E22,
                "👮",
            ),
        ),
        (
            "Event Rules".to_string(),
            category(
                "Rules for server events and special activities",
                &["Event Participation", "Event Hosting", "Rewards System"],
                "EV",
                0x8E44AD,
                "🎉",
            ),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punishment::Punishment;

    fn empty_index() -> RuleIndex {
        let dir = std::env::temp_dir().join(format!(
            "rule_index_test_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_dir_all(&dir);
        RuleIndex::load(&dir).unwrap()
    }

    fn rule(title: &str, category: &str, keywords: &[&str], priority: Priority) -> Rule {
        let now = Utc::now();
        Rule {
            title: title.to_string(),
            content: String::new(),
            category: category.to_string(),
            subcategory: "Behavior".to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            priority,
            punishments: PunishmentLadder::standard(),
            appeal_allowed: true,
            appeal_process: String::new(),
            min_staff_rank: StaffRank::Helper,
            created_by: UserId(1),
            created_at: now,
            last_updated: now,
        }
    }

    fn index_with(rules: Vec<(&str, Rule)>) -> RuleIndex {
        let mut index = empty_index();
        for (rule_id, rule) in rules {
            index.rules.insert(rule_id.to_string(), rule);
        }
        index
    }

    #[test]
    fn keyword_match_outranks_content_match() {
        let mut respect = rule(
            "Respect All Players",
            "General Rules",
            &["respect", "toxic"],
            Priority::High,
        );
        respect.content = "Treat each other with respect.".to_string();
        let mut other = rule("Stay in Character", "Roleplay Guidelines", &[], Priority::High);
        other.content = "No toxic out-of-character chatter.".to_string();
        let index = index_with(vec![("GR001", respect), ("RP001", other)]);

        let hits = index.search("toxic", None, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rule_id, "GR001");
        // keyword-exact 80 + high priority 500
        assert_eq!(hits[0].score, 580);
        // content substring 30 + high priority 500
        assert_eq!(hits[1].score, 530);
    }

    #[test]
    fn category_filter_is_a_hard_predicate() {
        let index = index_with(vec![
            ("GR001", rule("A", "General Rules", &["driving"], Priority::Low)),
            ("VH001", rule("B", "Vehicle Rules", &["driving"], Priority::Low)),
        ]);
        let hits = index.search("driving", Some("Vehicle Rules"), 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, "VH001");
    }

    #[test]
    fn empty_query_with_category_returns_whole_category() {
        let index = index_with(vec![
            ("GR001", rule("A", "General Rules", &[], Priority::Low)),
            ("GR002", rule("B", "General Rules", &[], Priority::Low)),
            ("VH001", rule("C", "Vehicle Rules", &[], Priority::Low)),
        ]);
        let hits = index.search("", Some("General Rules"), 10);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.score > 0));
        assert!(hits.iter().all(|hit| hit.rule.category == "General Rules"));
    }

    #[test]
    fn empty_query_without_category_returns_nothing() {
        let index = index_with(vec![(
            "GR001",
            rule("A", "General Rules", &[], Priority::Critical),
        )]);
        assert!(index.search("", None, 10).is_empty());
        assert!(index.search("   ", None, 10).is_empty());
    }

    #[test]
    fn equal_scores_tie_break_by_rule_id_ascending() {
        let index = index_with(vec![
            ("GR002", rule("Same title", "General Rules", &[], Priority::Low)),
            ("GR001", rule("Same title", "General Rules", &[], Priority::Low)),
            ("GR003", rule("Same title", "General Rules", &[], Priority::Low)),
        ]);
        let hits = index.search("same title", None, 10);
        let ids = hits.iter().map(|hit| hit.rule_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["GR001", "GR002", "GR003"]);
    }

    #[test]
    fn search_respects_limit() {
        let index = index_with(vec![
            ("GR001", rule("Match", "General Rules", &[], Priority::Low)),
            ("GR002", rule("Match", "General Rules", &[], Priority::Low)),
            ("GR003", rule("Match", "General Rules", &[], Priority::Low)),
        ]);
        assert_eq!(index.search("match", None, 2).len(), 2);
    }

    #[test]
    fn punishment_ladder_escalates_with_prior_offenses() {
        let index = index_with(vec![(
            "GR001",
            rule("A", "General Rules", &[], Priority::High),
        )]);
        let tags = (0..5)
            .map(|n| index.punishment_for("GR001", n).punishment.tag())
            .collect::<Vec<_>>();
        assert_eq!(tags, ["warning", "mute", "temp_ban", "perm_ban", "perm_ban"]);
    }

    #[test]
    fn unknown_rule_gets_default_punishment() {
        let index = empty_index();
        assert_eq!(
            index.punishment_for("ZZ999", 0).punishment,
            Punishment::Warning { fine: 5000 }
        );
    }

    #[test]
    fn add_rule_generates_sequential_category_ids() {
        let mut index = empty_index();
        let new = |title: &str| NewRule {
            category: "General Rules".to_string(),
            subcategory: "Behavior".to_string(),
            title: title.to_string(),
            content: "content".to_string(),
            keywords: vec![],
            priority: Priority::Medium,
            punishments: None,
            appeal_allowed: true,
            appeal_process: None,
            min_staff_rank: StaffRank::Helper,
            created_by: UserId(1),
        };
        assert_eq!(index.add_rule(new("first")).unwrap(), "GR001");
        assert_eq!(index.add_rule(new("second")).unwrap(), "GR002");
    }

    #[test]
    fn add_rule_rejects_unknown_category_and_empty_fields() {
        let mut index = empty_index();
        let mut new = NewRule {
            category: "Not A Category".to_string(),
            subcategory: "Behavior".to_string(),
            title: "title".to_string(),
            content: "content".to_string(),
            keywords: vec![],
            priority: Priority::Medium,
            punishments: None,
            appeal_allowed: true,
            appeal_process: None,
            min_staff_rank: StaffRank::Helper,
            created_by: UserId(1),
        };
        assert!(index.add_rule(new.clone()).is_err());
        new.category = "General Rules".to_string();
        new.title = String::new();
        assert!(index.add_rule(new).is_err());
    }

    #[test]
    fn update_rule_bumps_last_updated() {
        let mut index = empty_index();
        let rule_id = index
            .add_rule(NewRule {
                category: "General Rules".to_string(),
                subcategory: "Behavior".to_string(),
                title: "title".to_string(),
                content: "content".to_string(),
                keywords: vec![],
                priority: Priority::Medium,
                punishments: None,
                appeal_allowed: true,
                appeal_process: None,
                min_staff_rank: StaffRank::Helper,
                created_by: UserId(1),
            })
            .unwrap();
        let before = index.get(&rule_id).unwrap().last_updated;
        index
            .update_rule(
                &rule_id,
                RuleUpdate {
                    priority: Some(Priority::Critical),
                    ..RuleUpdate::default()
                },
            )
            .unwrap();
        let rule = index.get(&rule_id).unwrap();
        assert_eq!(rule.priority, Priority::Critical);
        assert!(rule.last_updated >= before);
    }
}
