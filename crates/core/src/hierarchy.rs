use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One authorization tier in the reviewer hierarchy.
///
/// `limit` is the maximum monetary impact the tier may approve unilaterally;
/// `None` means no ceiling. `deadline_days` is how long a request addressed
/// to this tier stays open before the escalation sweep picks it up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTier {
    pub role: String,
    pub limit: Option<Decimal>,
    pub deadline_days: i64,
}

impl RoleTier {
    pub fn covers(&self, amount: Decimal) -> bool {
        match self.limit {
            Some(limit) => amount <= limit,
            None => true,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("unknown role `{role}`")]
    UnknownRole { role: String },
    #[error("authorization limits must be non-decreasing: `{lower}` ({lower_limit}) exceeds `{higher}` ({higher_limit})")]
    Misordered { lower: String, lower_limit: Decimal, higher: String, higher_limit: Decimal },
    #[error("invalid hierarchy table: {0}")]
    Invalid(String),
}

pub const ADMIN_ROLE: &str = "admin";

/// The ordered reviewer hierarchy with per-tier authorization limits.
///
/// The table is configuration, not code: it is loaded from `WorkflowConfig`
/// and can be replaced at runtime. `admin` is recognized on top of any table
/// with no effective ceiling, but is never an escalation target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleHierarchy {
    tiers: Vec<RoleTier>,
    ranks: HashMap<String, usize>,
}

impl RoleHierarchy {
    pub fn new(tiers: Vec<RoleTier>) -> Result<Self, HierarchyError> {
        if tiers.is_empty() {
            return Err(HierarchyError::Invalid("hierarchy table must not be empty".to_owned()));
        }

        let mut ranks = HashMap::new();
        let mut normalized = Vec::with_capacity(tiers.len());

        for (index, tier) in tiers.into_iter().enumerate() {
            let role = normalize_role(&tier.role);
            if role.is_empty() {
                return Err(HierarchyError::Invalid(format!("tier {index} has an empty role name")));
            }
            if role == ADMIN_ROLE {
                return Err(HierarchyError::Invalid(
                    "`admin` is implicit and must not appear in the tier table".to_owned(),
                ));
            }
            if tier.deadline_days <= 0 {
                return Err(HierarchyError::Invalid(format!(
                    "tier `{role}` must have a positive deadline_days"
                )));
            }
            if tier.limit.is_some_and(|limit| limit < Decimal::ZERO) {
                return Err(HierarchyError::Invalid(format!(
                    "tier `{role}` has a negative authorization limit"
                )));
            }
            if ranks.insert(role.clone(), index).is_some() {
                return Err(HierarchyError::Invalid(format!("duplicate role `{role}`")));
            }
            normalized.push(RoleTier { role, ..tier });
        }

        for pair in normalized.windows(2) {
            let (lower, higher) = (&pair[0], &pair[1]);
            match (lower.limit, higher.limit) {
                (Some(lower_limit), Some(higher_limit)) if lower_limit > higher_limit => {
                    return Err(HierarchyError::Misordered {
                        lower: lower.role.clone(),
                        lower_limit,
                        higher: higher.role.clone(),
                        higher_limit,
                    });
                }
                // An uncapped tier below a capped one can authorize more than
                // its superior, which breaks the ordering just the same.
                (None, Some(higher_limit)) => {
                    return Err(HierarchyError::Misordered {
                        lower: lower.role.clone(),
                        lower_limit: Decimal::MAX,
                        higher: higher.role.clone(),
                        higher_limit,
                    });
                }
                _ => {}
            }
        }

        Ok(Self { tiers: normalized, ranks })
    }

    pub fn tiers(&self) -> &[RoleTier] {
        &self.tiers
    }

    /// Position of a role in the total order. `admin` ranks above every tier.
    pub fn rank(&self, role: &str) -> Result<usize, HierarchyError> {
        let key = normalize_role(role);
        if key == ADMIN_ROLE {
            return Ok(self.tiers.len());
        }
        self.ranks
            .get(&key)
            .copied()
            .ok_or(HierarchyError::UnknownRole { role: role.to_owned() })
    }

    /// Configured authorization ceiling; `None` means unlimited (`admin`).
    pub fn limit(&self, role: &str) -> Result<Option<Decimal>, HierarchyError> {
        let key = normalize_role(role);
        if key == ADMIN_ROLE {
            return Ok(None);
        }
        self.ranks
            .get(&key)
            .map(|index| self.tiers[*index].limit)
            .ok_or(HierarchyError::UnknownRole { role: role.to_owned() })
    }

    pub fn deadline_days(&self, role: &str) -> Result<i64, HierarchyError> {
        let key = normalize_role(role);
        self.ranks
            .get(&key)
            .map(|index| self.tiers[*index].deadline_days)
            .ok_or(HierarchyError::UnknownRole { role: role.to_owned() })
    }

    /// True iff the actor outranks (or equals) the required tier AND the
    /// actor's own limit covers the amount. An unknown actor role is an
    /// error; an unknown *required* role authorizes nobody.
    pub fn can_authorize(
        &self,
        actor_role: &str,
        required_role: &str,
        amount: Decimal,
    ) -> Result<bool, HierarchyError> {
        let actor_rank = self.rank(actor_role)?;
        let Ok(required_rank) = self.rank(required_role) else {
            return Ok(false);
        };

        if actor_rank < required_rank {
            return Ok(false);
        }

        Ok(self.limit(actor_role)?.map_or(true, |limit| amount <= limit))
    }

    /// The lowest tier whose limit covers `amount`; the top tier when no
    /// configured limit does.
    pub fn initial_tier_for(&self, amount: Decimal) -> &RoleTier {
        self.tiers.iter().find(|tier| tier.covers(amount)).unwrap_or_else(|| self.top_tier())
    }

    /// Strictly the next tier in the order; `None` at the top and for `admin`.
    pub fn next_tier(&self, role: &str) -> Result<Option<&RoleTier>, HierarchyError> {
        let key = normalize_role(role);
        if key == ADMIN_ROLE {
            return Ok(None);
        }
        let index = self
            .ranks
            .get(&key)
            .copied()
            .ok_or(HierarchyError::UnknownRole { role: role.to_owned() })?;
        Ok(self.tiers.get(index + 1))
    }

    pub fn top_tier(&self) -> &RoleTier {
        // Non-empty by construction.
        &self.tiers[self.tiers.len() - 1]
    }

    pub fn is_top_tier(&self, role: &str) -> bool {
        normalize_role(role) == self.top_tier().role
    }

    /// Roles the given actor may act for: every tier at or below the actor's
    /// rank. Used by the pending-queue listing.
    pub fn actionable_roles(&self, actor_role: &str) -> Result<Vec<String>, HierarchyError> {
        let actor_rank = self.rank(actor_role)?;
        Ok(self
            .tiers
            .iter()
            .enumerate()
            .filter(|(index, _)| *index <= actor_rank)
            .map(|(_, tier)| tier.role.clone())
            .collect())
    }
}

impl Default for RoleHierarchy {
    /// Stock table of the supplier portal, lowest tier first.
    fn default() -> Self {
        Self::new(vec![
            tier("category_buyer", 50_000, 2),
            tier("pricing_analyst", 100_000, 5),
            tier("commercial_manager", 250_000, 3),
            tier("commercial_director", 500_000, 5),
            tier("pricing_director", 1_000_000, 5),
            tier("vp_commercial", 2_000_000, 7),
        ])
        .expect("stock hierarchy table is valid")
    }
}

fn tier(role: &str, limit: i64, deadline_days: i64) -> RoleTier {
    RoleTier { role: role.to_owned(), limit: Some(Decimal::from(limit)), deadline_days }
}

pub fn normalize_role(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{normalize_role, HierarchyError, RoleHierarchy, RoleTier};

    fn tier(role: &str, limit: i64, deadline_days: i64) -> RoleTier {
        RoleTier { role: role.to_owned(), limit: Some(Decimal::from(limit)), deadline_days }
    }

    #[test]
    fn ranks_follow_table_order_and_admin_tops_out() {
        let hierarchy = RoleHierarchy::default();

        assert_eq!(hierarchy.rank("category_buyer").expect("rank"), 0);
        assert_eq!(hierarchy.rank("vp_commercial").expect("rank"), 5);
        assert_eq!(hierarchy.rank("admin").expect("rank"), 6);
        assert_eq!(hierarchy.limit("admin").expect("limit"), None);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let hierarchy = RoleHierarchy::default();
        let error = hierarchy.rank("intern").expect_err("intern is not a reviewer role");
        assert_eq!(error, HierarchyError::UnknownRole { role: "intern".to_owned() });
    }

    #[test]
    fn role_lookup_is_case_and_whitespace_insensitive() {
        let hierarchy = RoleHierarchy::default();
        assert_eq!(hierarchy.rank("  Pricing_Analyst ").expect("rank"), 1);
        assert_eq!(normalize_role(" VP_Commercial"), "vp_commercial");
    }

    #[test]
    fn misordered_limits_fail_at_load() {
        let error = RoleHierarchy::new(vec![
            tier("category_buyer", 80_000, 2),
            tier("pricing_analyst", 50_000, 5),
        ])
        .expect_err("decreasing limits must be rejected");

        assert!(matches!(error, HierarchyError::Misordered { .. }));
    }

    #[test]
    fn uncapped_tier_below_capped_tier_fails_at_load() {
        let error = RoleHierarchy::new(vec![
            RoleTier { role: "category_buyer".to_owned(), limit: None, deadline_days: 2 },
            tier("pricing_analyst", 50_000, 5),
        ])
        .expect_err("uncapped tier below a capped tier must be rejected");

        assert!(matches!(error, HierarchyError::Misordered { .. }));
    }

    #[test]
    fn duplicate_and_admin_roles_fail_at_load() {
        let duplicate = RoleHierarchy::new(vec![
            tier("category_buyer", 50_000, 2),
            tier("Category_Buyer", 60_000, 2),
        ])
        .expect_err("duplicate roles must be rejected");
        assert!(matches!(duplicate, HierarchyError::Invalid(_)));

        let implicit = RoleHierarchy::new(vec![tier("admin", 50_000, 2)])
            .expect_err("admin must not appear in the table");
        assert!(matches!(implicit, HierarchyError::Invalid(_)));
    }

    #[test]
    fn authorization_requires_rank_and_limit() {
        let hierarchy = RoleHierarchy::default();
        let amount = Decimal::from(600_000);

        // Sufficient rank and limit.
        assert!(hierarchy
            .can_authorize("pricing_director", "pricing_director", amount)
            .expect("authorize"));
        // Rank too low.
        assert!(!hierarchy
            .can_authorize("commercial_manager", "pricing_director", amount)
            .expect("authorize"));
        // Rank sufficient, own limit exceeded.
        assert!(!hierarchy
            .can_authorize("commercial_director", "commercial_manager", amount)
            .expect("authorize"));
        // Admin has no ceiling.
        assert!(hierarchy
            .can_authorize("admin", "vp_commercial", Decimal::from(9_000_000))
            .expect("authorize"));
    }

    #[test]
    fn unknown_actor_errors_but_unknown_required_role_fails_closed() {
        let hierarchy = RoleHierarchy::default();

        let error = hierarchy
            .can_authorize("intern", "category_buyer", Decimal::ONE)
            .expect_err("unknown actor role");
        assert!(matches!(error, HierarchyError::UnknownRole { .. }));

        let denied = hierarchy
            .can_authorize("vp_commercial", "chief_procurement_officer", Decimal::ONE)
            .expect("fail closed, not error");
        assert!(!denied);
    }

    #[test]
    fn routing_picks_lowest_covering_tier() {
        let hierarchy = RoleHierarchy::default();

        assert_eq!(hierarchy.initial_tier_for(Decimal::from(40_000)).role, "category_buyer");
        assert_eq!(hierarchy.initial_tier_for(Decimal::from(50_000)).role, "category_buyer");
        assert_eq!(hierarchy.initial_tier_for(Decimal::from(600_000)).role, "pricing_director");
    }

    #[test]
    fn routing_falls_back_to_top_tier_for_uncovered_amounts() {
        let hierarchy = RoleHierarchy::default();
        assert_eq!(hierarchy.initial_tier_for(Decimal::from(10_000_000)).role, "vp_commercial");
    }

    #[test]
    fn next_tier_walks_the_chain_and_stops_at_the_top() {
        let hierarchy = RoleHierarchy::default();

        let next = hierarchy.next_tier("category_buyer").expect("lookup");
        assert_eq!(next.map(|tier| tier.role.as_str()), Some("pricing_analyst"));
        assert_eq!(hierarchy.next_tier("vp_commercial").expect("lookup"), None);
        assert_eq!(hierarchy.next_tier("admin").expect("lookup"), None);
    }

    #[test]
    fn actionable_roles_cover_every_tier_at_or_below_rank() {
        let hierarchy = RoleHierarchy::default();

        assert_eq!(
            hierarchy.actionable_roles("category_buyer").expect("roles"),
            vec!["category_buyer".to_owned()]
        );
        assert_eq!(
            hierarchy.actionable_roles("commercial_manager").expect("roles"),
            vec![
                "category_buyer".to_owned(),
                "pricing_analyst".to_owned(),
                "commercial_manager".to_owned()
            ]
        );
        assert_eq!(hierarchy.actionable_roles("admin").expect("roles").len(), 6);
    }

    #[test]
    fn per_tier_deadlines_come_from_the_table() {
        let hierarchy = RoleHierarchy::default();
        assert_eq!(hierarchy.deadline_days("category_buyer").expect("deadline"), 2);
        assert_eq!(hierarchy.deadline_days("vp_commercial").expect("deadline"), 7);
    }
}
