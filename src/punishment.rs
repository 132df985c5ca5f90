use anyhow::{bail, Result};
use regex::Regex;

/// A punishment that can be applied to a member.
///
/// Each variant carries only the fields relevant to it; durations are in
/// minutes and fines in server currency.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Punishment {
    /// Verbal warning
    Warning { fine: u64 },
    /// Temporary chat mute
    Mute { duration_minutes: i64, fine: u64 },
    /// Kick from the server
    Kick { fine: u64 },
    /// Temporary ban
    TempBan { duration_minutes: i64, fine: u64 },
    /// Permanent ban
    PermBan,
    /// Monetary fine only
    Fine { amount: u64 },
    /// Vehicle impound
    VehicleImpound { duration_minutes: i64, fine: u64 },
}

impl Punishment {
    /// Duration of the punishment, if it is time-limited
    pub fn duration_minutes(&self) -> Option<i64> {
        match self {
            Punishment::Mute {
                duration_minutes, ..
            }
            | Punishment::TempBan {
                duration_minutes, ..
            }
            | Punishment::VehicleImpound {
                duration_minutes, ..
            } => Some(*duration_minutes),
            _ => None,
        }
    }

    /// Fine attached to the punishment
    pub fn fine(&self) -> u64 {
        match self {
            Punishment::Warning { fine }
            | Punishment::Mute { fine, .. }
            | Punishment::Kick { fine }
            | Punishment::TempBan { fine, .. }
            | Punishment::VehicleImpound { fine, .. } => *fine,
            Punishment::Fine { amount } => *amount,
            Punishment::PermBan => 0,
        }
    }

    /// Tag name used in the violation log and embeds
    pub fn tag(&self) -> &'static str {
        match self {
            Punishment::Warning { .. } => "warning",
            Punishment::Mute { .. } => "mute",
            Punishment::Kick { .. } => "kick",
            Punishment::TempBan { .. } => "temp_ban",
            Punishment::PermBan => "perm_ban",
            Punishment::Fine { .. } => "fine",
            Punishment::VehicleImpound { .. } => "vehicle_impound",
        }
    }

    /// Human readable label
    pub fn display(&self) -> &'static str {
        match self {
            Punishment::Warning { .. } => "Warning",
            Punishment::Mute { .. } => "Mute",
            Punishment::Kick { .. } => "Kick",
            Punishment::TempBan { .. } => "Temporary Ban",
            Punishment::PermBan => "Permanent Ban",
            Punishment::Fine { .. } => "Fine",
            Punishment::VehicleImpound { .. } => "Vehicle Impound",
        }
    }

    /// Replace the duration of a time-limited punishment; a no-op for the
    /// others
    pub fn with_duration(self, minutes: i64) -> Punishment {
        match self {
            Punishment::Mute { fine, .. } => Punishment::Mute {
                duration_minutes: minutes,
                fine,
            },
            Punishment::TempBan { fine, .. } => Punishment::TempBan {
                duration_minutes: minutes,
                fine,
            },
            Punishment::VehicleImpound { fine, .. } => Punishment::VehicleImpound {
                duration_minutes: minutes,
                fine,
            },
            other => other,
        }
    }
}

/// One step of a rule's punishment ladder
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LadderRung {
    /// Punishment applied at this rung
    #[serde(flatten)]
    pub punishment: Punishment,
    /// Staff-facing summary, e.g. "2 hour mute + $10,000 fine"
    pub details: String,
}

/// Per-rule escalation ladder keyed by prior-offense count
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PunishmentLadder {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_offense: Option<LadderRung>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_offense: Option<LadderRung>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub third_offense: Option<LadderRung>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severe: Option<LadderRung>,
}

impl PunishmentLadder {
    /// Select the rung for a user's Nth violation of the rule.
    ///
    /// `prior_offenses` counts earlier violations regardless of expiry:
    /// 0 maps to the first rung, 1 to the second, 2 to the third and 3 or
    /// more to the severe rung. An absent rung falls back to the severe
    /// rung, then to [`default_rung`].
    pub fn rung_for(&self, prior_offenses: usize) -> LadderRung {
        let rung = match prior_offenses {
            0 => self.first_offense.as_ref(),
            1 => self.second_offense.as_ref(),
            2 => self.third_offense.as_ref(),
            _ => self.severe.as_ref(),
        };
        rung.or(self.severe.as_ref())
            .cloned()
            .unwrap_or_else(default_rung)
    }

    /// Ladder applied when a rule does not define its own
    pub fn standard() -> PunishmentLadder {
        PunishmentLadder {
            first_offense: Some(LadderRung {
                punishment: Punishment::Warning { fine: 5000 },
                details: "Warning + $5,000 fine".to_string(),
            }),
            second_offense: Some(LadderRung {
                punishment: Punishment::Mute {
                    duration_minutes: 60,
                    fine: 10000,
                },
                details: "1 hour mute + $10,000 fine".to_string(),
            }),
            third_offense: Some(LadderRung {
                punishment: Punishment::TempBan {
                    duration_minutes: 1440,
                    fine: 25000,
                },
                details: "24 hour ban + $25,000 fine".to_string(),
            }),
            severe: Some(LadderRung {
                punishment: Punishment::PermBan,
                details: "Permanent ban".to_string(),
            }),
        }
    }
}

/// Fallback when a rule's ladder defines no usable rung at all
pub fn default_rung() -> LadderRung {
    LadderRung {
        punishment: Punishment::Warning { fine: 5000 },
        details: "Standard warning + $5,000 fine".to_string(),
    }
}

/// Parse a staff-entered duration string into minutes.
///
/// Accepts plain minutes ("90") or day/hour/minute units in order
/// ("1d", "2h30m", "1d12h"). Anything else is rejected so a typo never
/// silently becomes a different punishment length.
pub fn parse_duration(input: &str) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() {
        bail!("duration is empty");
    }
    if let Ok(minutes) = input.parse::<i64>() {
        if minutes <= 0 {
            bail!("duration must be positive: {}", input);
        }
        return Ok(minutes);
    }

    let pattern = Regex::new(r"^(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?$").unwrap();
    let caps = match pattern.captures(input) {
        Some(caps) => caps,
        None => bail!("unrecognized duration format: {}", input),
    };
    let part = |idx: usize| -> i64 {
        caps.get(idx)
            .map(|m| m.as_str().parse::<i64>().unwrap_or(0))
            .unwrap_or(0)
    };
    let minutes = part(1) * 1440 + part(2) * 60 + part(3);
    if minutes <= 0 {
        bail!("unrecognized duration format: {}", input);
    }
    Ok(minutes)
}

/// Render a duration in minutes for embeds and transcripts
pub fn format_duration(minutes: i64) -> String {
    if minutes <= 0 {
        return "Permanent".to_string();
    }
    if minutes < 60 {
        format!("{}m", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        let rest = minutes % 60;
        if rest == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, rest)
        }
    } else {
        let days = minutes / 1440;
        let hours = (minutes % 1440) / 60;
        if hours == 0 {
            format!("{}d", days)
        } else {
            format!("{}d {}h", days, hours)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rung(details: &str) -> LadderRung {
        LadderRung {
            punishment: Punishment::Warning { fine: 0 },
            details: details.to_string(),
        }
    }

    #[test]
    fn ladder_escalates_in_order_then_stays_severe() {
        let ladder = PunishmentLadder::standard();
        let sequence = (0..6)
            .map(|n| ladder.rung_for(n).punishment.tag())
            .collect::<Vec<_>>();
        assert_eq!(
            sequence,
            ["warning", "mute", "temp_ban", "perm_ban", "perm_ban", "perm_ban"]
        );
    }

    #[test]
    fn missing_rung_falls_back_to_severe() {
        let ladder = PunishmentLadder {
            first_offense: Some(rung("first")),
            second_offense: None,
            third_offense: None,
            severe: Some(rung("severe")),
        };
        assert_eq!(ladder.rung_for(0).details, "first");
        assert_eq!(ladder.rung_for(1).details, "severe");
        assert_eq!(ladder.rung_for(2).details, "severe");
    }

    #[test]
    fn empty_ladder_falls_back_to_default() {
        let ladder = PunishmentLadder::default();
        assert_eq!(ladder.rung_for(0), default_rung());
        assert_eq!(ladder.rung_for(5), default_rung());
    }

    #[test]
    fn parses_plain_minutes_and_unit_strings() {
        assert_eq!(parse_duration("90").unwrap(), 90);
        assert_eq!(parse_duration("45m").unwrap(), 45);
        assert_eq!(parse_duration("2h").unwrap(), 120);
        assert_eq!(parse_duration("2h30m").unwrap(), 150);
        assert_eq!(parse_duration("1d12h").unwrap(), 2160);
    }

    #[test]
    fn rejects_malformed_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-5").is_err());
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(0), "Permanent");
        assert_eq!(format_duration(45), "45m");
        assert_eq!(format_duration(150), "2h 30m");
        assert_eq!(format_duration(2880), "2d");
    }

    #[test]
    fn punishment_round_trips_through_json() {
        let rung = LadderRung {
            punishment: Punishment::Mute {
                duration_minutes: 120,
                fine: 10000,
            },
            details: "2 hour mute + $10,000 fine".to_string(),
        };
        let json = serde_json::to_string(&rung).unwrap();
        assert!(json.contains("\"type\":\"mute\""));
        let back: LadderRung = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rung);
    }
}
