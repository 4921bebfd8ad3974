//! Tiered routing: maps monetary exposure and commercial risk to the required approval depth

use approval_core::config::{DiscountRuleConfig, RoutingConfig, TierConfig};
use serde::{Deserialize, Serialize};

use crate::{Result, WorkflowError};

/// One value band and the approval it demands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tier {
    pub level: u8,
    pub min: f64,
    /// Exclusive upper bound; `None` for the open-ended top tier
    pub max: Option<f64>,
    pub approver_role: String,
    pub sla_hours: u32,
    pub multi_approval_required: bool,
}

impl Tier {
    pub fn contains(&self, amount: f64) -> bool {
        amount >= self.min && self.max.map(|max| amount < max).unwrap_or(true)
    }
}

impl From<&TierConfig> for Tier {
    fn from(config: &TierConfig) -> Self {
        Self {
            level: config.level,
            min: config.min,
            max: config.max,
            approver_role: config.approver_role.clone(),
            sla_hours: config.sla_hours,
            multi_approval_required: config.multi_approval_required,
        }
    }
}

/// Combined outcome of the discount, margin and value rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApproverRequirement {
    /// Highest level any rule triggered
    pub level: u8,
    /// Distinct approver roles, in the order their rules fired
    pub roles: Vec<String>,
    /// One human-readable line per triggered rule
    pub reasons: Vec<String>,
    /// SLA of the value tier
    pub sla_hours: u32,
    pub multi_approval_required: bool,
}

impl ApproverRequirement {
    fn trigger(&mut self, level: u8, role: &str, reason: String) {
        self.level = self.level.max(level);
        if !self.roles.iter().any(|r| r == role) {
            self.roles.push(role.to_string());
        }
        self.reasons.push(reason);
    }
}

/// Stateless router over a validated tier table
#[derive(Debug, Clone)]
pub struct TieredRouter {
    tiers: Vec<Tier>,
    discount_ladder: Vec<DiscountRuleConfig>,
    minimum_margin_percent: f64,
    margin_breach_level: u8,
    margin_breach_role: String,
}

impl TieredRouter {
    /// Build a router, rejecting tier tables that leave gaps or overlap
    pub fn from_config(config: &RoutingConfig) -> Result<Self> {
        let tiers: Vec<Tier> = config.tiers.iter().map(Tier::from).collect();

        let first = tiers
            .first()
            .ok_or_else(|| WorkflowError::InvalidRouting("No value tiers configured".into()))?;
        if first.min != 0.0 {
            return Err(WorkflowError::InvalidRouting(format!(
                "Lowest tier must start at 0, found {}",
                first.min
            )));
        }

        for (i, tier) in tiers.iter().enumerate() {
            let is_last = i + 1 == tiers.len();
            match (tier.max, is_last) {
                (None, false) => {
                    return Err(WorkflowError::InvalidRouting(format!(
                        "Only the top tier may be unbounded (level {})",
                        tier.level
                    )))
                }
                (Some(max), _) if max <= tier.min => {
                    return Err(WorkflowError::InvalidRouting(format!(
                        "Tier level {} has an empty range",
                        tier.level
                    )))
                }
                _ => {}
            }
        }

        for pair in tiers.windows(2) {
            if pair[0].max != Some(pair[1].min) {
                return Err(WorkflowError::InvalidRouting(format!(
                    "Tiers {} and {} are not contiguous",
                    pair[0].level, pair[1].level
                )));
            }
            if pair[0].level >= pair[1].level {
                return Err(WorkflowError::InvalidRouting(format!(
                    "Tier levels must ascend with value ({} then {})",
                    pair[0].level, pair[1].level
                )));
            }
        }

        let mut discount_ladder = config.discount_ladder.clone();
        discount_ladder.sort_by(|a, b| a.above_percent.total_cmp(&b.above_percent));

        Ok(Self {
            tiers,
            discount_ladder,
            minimum_margin_percent: config.minimum_margin_percent,
            margin_breach_level: config.margin_breach_level,
            margin_breach_role: config.margin_breach_role.clone(),
        })
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Tier containing `amount`. Amounts no tier contains (negative, NaN) resolve
    /// to the highest tier so routing errs toward stricter approval.
    pub fn resolve_tier(&self, amount: f64) -> &Tier {
        let highest = &self.tiers[self.tiers.len() - 1];
        self.tiers
            .iter()
            .find(|t| t.contains(amount))
            .unwrap_or(highest)
    }

    /// Apply the discount ladder, the minimum-margin check and the value tier
    pub fn determine_approvers(
        &self,
        discount_percent: f64,
        margin_percent: f64,
        amount: f64,
    ) -> ApproverRequirement {
        let tier = self.resolve_tier(amount);
        let mut requirement = ApproverRequirement {
            level: 0,
            roles: Vec::new(),
            reasons: Vec::new(),
            sla_hours: tier.sla_hours,
            multi_approval_required: tier.multi_approval_required,
        };

        if let Some(rule) = self
            .discount_ladder
            .iter()
            .rev()
            .find(|r| discount_percent > r.above_percent)
        {
            requirement.trigger(
                rule.level,
                &rule.approver_role,
                format!(
                    "Discount {:.1}% exceeds {:.1}% limit",
                    discount_percent, rule.above_percent
                ),
            );
        }

        if margin_percent < self.minimum_margin_percent {
            requirement.trigger(
                self.margin_breach_level,
                &self.margin_breach_role,
                format!(
                    "Margin {:.1}% below minimum {:.1}%",
                    margin_percent, self.minimum_margin_percent
                ),
            );
        }

        requirement.trigger(
            tier.level,
            &tier.approver_role,
            format!("Order value {:.2} falls in approval tier {}", amount, tier.level),
        );

        requirement
    }
}
