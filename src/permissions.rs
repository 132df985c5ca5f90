use serenity::model::id::RoleId;

use crate::app_config::DiscordConfig;
use crate::punishment::Punishment;

/// Staff hierarchy, ordered from lowest to highest authority
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StaffRank {
    Member,
    Helper,
    Moderator,
    Staff,
    SeniorStaff,
    Admin,
}

impl StaffRank {
    /// Human readable label
    pub fn display(&self) -> &'static str {
        match self {
            StaffRank::Member => "Member",
            StaffRank::Helper => "Helper",
            StaffRank::Moderator => "Moderator",
            StaffRank::Staff => "Staff",
            StaffRank::SeniorStaff => "Senior Staff",
            StaffRank::Admin => "Administrator",
        }
    }
}

/// Resolves a member's role set against the configured staff roles
pub struct Permissions {
    admin_role: RoleId,
    senior_staff_role: RoleId,
    staff_role: RoleId,
    moderator_role: RoleId,
    helper_role: RoleId,
}

impl Permissions {
    pub fn new(discord: &DiscordConfig) -> Permissions {
        Permissions {
            admin_role: discord.admin_role_id,
            senior_staff_role: discord.senior_staff_role_id,
            staff_role: discord.staff_role_id,
            moderator_role: discord.moderator_role_id,
            helper_role: discord.helper_role_id,
        }
    }

    /// Highest rank granted by the member's roles
    pub fn rank_of(&self, roles: &[RoleId]) -> StaffRank {
        let grants = [
            (self.admin_role, StaffRank::Admin),
            (self.senior_staff_role, StaffRank::SeniorStaff),
            (self.staff_role, StaffRank::Staff),
            (self.moderator_role, StaffRank::Moderator),
            (self.helper_role, StaffRank::Helper),
        ];
        grants
            .iter()
            .filter(|(role, _)| roles.contains(role))
            .map(|(_, rank)| *rank)
            .max()
            .unwrap_or(StaffRank::Member)
    }

    pub fn is_staff(&self, roles: &[RoleId]) -> bool {
        self.rank_of(roles) >= StaffRank::Helper
    }

    pub fn can_manage_tickets(&self, roles: &[RoleId]) -> bool {
        self.rank_of(roles) >= StaffRank::Helper
    }

    pub fn can_close_tickets(&self, roles: &[RoleId]) -> bool {
        self.rank_of(roles) >= StaffRank::Staff
    }

    pub fn can_manage_rules(&self, roles: &[RoleId]) -> bool {
        self.rank_of(roles) >= StaffRank::Admin
    }

    pub fn can_announce(&self, roles: &[RoleId]) -> bool {
        self.rank_of(roles) >= StaffRank::Admin
    }

    /// Minimum rank allowed to issue a punishment of the given kind
    pub fn required_rank(punishment: &Punishment) -> StaffRank {
        match punishment {
            Punishment::Warning { .. } => StaffRank::Helper,
            Punishment::Mute { .. }
            | Punishment::Kick { .. }
            | Punishment::Fine { .. }
            | Punishment::VehicleImpound { .. } => StaffRank::Moderator,
            Punishment::TempBan { .. } => StaffRank::Staff,
            Punishment::PermBan => StaffRank::SeniorStaff,
        }
    }

    /// Whether `staff_roles` may issue `punishment` against `target_roles`.
    ///
    /// Staff cannot punish members of equal or higher rank.
    pub fn can_punish(
        &self,
        staff_roles: &[RoleId],
        target_roles: &[RoleId],
        punishment: &Punishment,
    ) -> Result<(), String> {
        let staff_rank = self.rank_of(staff_roles);
        let required = Self::required_rank(punishment);
        if staff_rank < required {
            return Err(format!(
                "issuing a {} requires {} or higher",
                punishment.display(),
                required.display()
            ));
        }
        let target_rank = self.rank_of(target_roles);
        if target_rank >= staff_rank {
            return Err("you cannot punish staff of equal or higher rank".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permissions() -> Permissions {
        Permissions {
            admin_role: RoleId(1),
            senior_staff_role: RoleId(2),
            staff_role: RoleId(3),
            moderator_role: RoleId(4),
            helper_role: RoleId(5),
        }
    }

    #[test]
    fn highest_granted_rank_wins() {
        let perms = permissions();
        assert_eq!(perms.rank_of(&[]), StaffRank::Member);
        assert_eq!(perms.rank_of(&[RoleId(5)]), StaffRank::Helper);
        assert_eq!(perms.rank_of(&[RoleId(5), RoleId(3)]), StaffRank::Staff);
        assert_eq!(perms.rank_of(&[RoleId(9), RoleId(1)]), StaffRank::Admin);
    }

    #[test]
    fn punishment_minimum_ranks() {
        let perms = permissions();
        let mute = Punishment::Mute {
            duration_minutes: 60,
            fine: 0,
        };
        // helper may warn but not mute
        assert!(perms
            .can_punish(&[RoleId(5)], &[], &Punishment::Warning { fine: 0 })
            .is_ok());
        assert!(perms.can_punish(&[RoleId(5)], &[], &mute).is_err());
        assert!(perms.can_punish(&[RoleId(4)], &[], &mute).is_ok());
        assert!(perms
            .can_punish(&[RoleId(3)], &[], &Punishment::PermBan)
            .is_err());
        assert!(perms
            .can_punish(&[RoleId(2)], &[], &Punishment::PermBan)
            .is_ok());
    }

    #[test]
    fn cannot_punish_equal_or_higher_rank() {
        let perms = permissions();
        let warning = Punishment::Warning { fine: 0 };
        assert!(perms.can_punish(&[RoleId(4)], &[RoleId(4)], &warning).is_err());
        assert!(perms.can_punish(&[RoleId(4)], &[RoleId(1)], &warning).is_err());
        assert!(perms.can_punish(&[RoleId(1)], &[RoleId(4)], &warning).is_ok());
    }
}
