use serde::{Deserialize, Serialize};

use crate::config::PlansConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Free,
    Premium,
    Business,
}

impl PlanKind {
    pub const ALL: [PlanKind; 3] = [PlanKind::Free, PlanKind::Premium, PlanKind::Business];

    pub fn as_str(self) -> &'static str {
        match self {
            PlanKind::Free => "free",
            PlanKind::Premium => "premium",
            PlanKind::Business => "business",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Some(PlanKind::Free),
            "premium" => Some(PlanKind::Premium),
            "business" => Some(PlanKind::Business),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PlanKind::Free => "Free",
            PlanKind::Premium => "Premium",
            PlanKind::Business => "Business",
        }
    }

    pub fn is_paid(self) -> bool {
        !matches!(self, PlanKind::Free)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingType {
    #[default]
    Monthly,
    Annual,
}

impl BillingType {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingType::Monthly => "monthly",
            BillingType::Annual => "annual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "mensal" => Some(BillingType::Monthly),
            "annual" | "anual" | "yearly" => Some(BillingType::Annual),
            _ => None,
        }
    }

    /// Length of one billing cycle.
    pub fn cycle_months(self) -> u32 {
        match self {
            BillingType::Monthly => 1,
            BillingType::Annual => 12,
        }
    }
}

/// Credits and price of one plan for both billing types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAllotment {
    pub monthly_credits: i64,
    pub annual_credits: i64,
    pub monthly_price_cents: i64,
    pub annual_price_cents: i64,
}

impl PlanAllotment {
    pub fn free() -> Self {
        Self {
            monthly_credits: 30,
            annual_credits: 30,
            monthly_price_cents: 0,
            annual_price_cents: 0,
        }
    }

    pub fn premium() -> Self {
        Self {
            monthly_credits: 300,
            annual_credits: 1000,
            monthly_price_cents: 9_700,
            annual_price_cents: annual_price_from_monthly(9_700),
        }
    }

    pub fn business() -> Self {
        Self {
            monthly_credits: 1000,
            annual_credits: 3000,
            monthly_price_cents: 29_700,
            annual_price_cents: annual_price_from_monthly(29_700),
        }
    }

    fn credits(&self, billing: BillingType) -> i64 {
        match billing {
            BillingType::Monthly => self.monthly_credits,
            BillingType::Annual => self.annual_credits,
        }
    }

    fn price_cents(&self, billing: BillingType) -> i64 {
        match billing {
            BillingType::Monthly => self.monthly_price_cents,
            BillingType::Annual => self.annual_price_cents,
        }
    }
}

// 12 months at 40%, rounded to whole reais
fn annual_price_from_monthly(monthly_cents: i64) -> i64 {
    let cents = monthly_cents * 12 * 4 / 10;
    ((cents + 50) / 100) * 100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditAction {
    Upload,
    Transcription,
    SummaryBasic,
    SummaryAdvanced,
    Export,
}

impl CreditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CreditAction::Upload => "upload",
            CreditAction::Transcription => "transcription",
            CreditAction::SummaryBasic => "summary_basic",
            CreditAction::SummaryAdvanced => "summary_advanced",
            CreditAction::Export => "export",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCosts {
    #[serde(default = "default_upload_cost")]
    pub upload: i64,
    #[serde(default = "default_transcription_cost")]
    pub transcription: i64,
    #[serde(default = "default_summary_basic_cost")]
    pub summary_basic: i64,
    #[serde(default = "default_summary_advanced_cost")]
    pub summary_advanced: i64,
    #[serde(default = "default_export_cost")]
    pub export: i64,
}

fn default_upload_cost() -> i64 {
    10
}
fn default_transcription_cost() -> i64 {
    20
}
fn default_summary_basic_cost() -> i64 {
    15
}
fn default_summary_advanced_cost() -> i64 {
    25
}
fn default_export_cost() -> i64 {
    2
}

impl Default for CreditCosts {
    fn default() -> Self {
        Self {
            upload: default_upload_cost(),
            transcription: default_transcription_cost(),
            summary_basic: default_summary_basic_cost(),
            summary_advanced: default_summary_advanced_cost(),
            export: default_export_cost(),
        }
    }
}

/// One purchasable plan/billing combination, as listed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOffer {
    pub plan: PlanKind,
    pub name: &'static str,
    pub billing_type: BillingType,
    pub credits: i64,
    pub price_cents: i64,
    pub label: String,
}

/// Static plan table, resolved once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    free: PlanAllotment,
    premium: PlanAllotment,
    business: PlanAllotment,
    costs: CreditCosts,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(&PlansConfig::default(), CreditCosts::default())
    }
}

impl PlanCatalog {
    pub fn new(plans: &PlansConfig, costs: CreditCosts) -> Self {
        Self {
            free: plans.free,
            premium: plans.premium,
            business: plans.business,
            costs,
        }
    }

    fn allotment(&self, plan: PlanKind) -> &PlanAllotment {
        match plan {
            PlanKind::Free => &self.free,
            PlanKind::Premium => &self.premium,
            PlanKind::Business => &self.business,
        }
    }

    pub fn credits_for(&self, plan: PlanKind, billing: BillingType) -> i64 {
        self.allotment(plan).credits(billing)
    }

    pub fn free_credits(&self) -> i64 {
        self.free.monthly_credits
    }

    pub fn price_cents_for(&self, plan: PlanKind, billing: BillingType) -> i64 {
        self.allotment(plan).price_cents(billing)
    }

    pub fn cost_of(&self, action: CreditAction) -> i64 {
        match action {
            CreditAction::Upload => self.costs.upload,
            CreditAction::Transcription => self.costs.transcription,
            CreditAction::SummaryBasic => self.costs.summary_basic,
            CreditAction::SummaryAdvanced => self.costs.summary_advanced,
            CreditAction::Export => self.costs.export,
        }
    }

    pub fn costs(&self) -> &CreditCosts {
        &self.costs
    }

    pub fn offers(&self) -> Vec<PlanOffer> {
        let mut out = vec![PlanOffer {
            plan: PlanKind::Free,
            name: PlanKind::Free.display_name(),
            billing_type: BillingType::Monthly,
            credits: self.free_credits(),
            price_cents: 0,
            label: plan_label(PlanKind::Free, BillingType::Monthly),
        }];
        for plan in [PlanKind::Premium, PlanKind::Business] {
            for billing in [BillingType::Monthly, BillingType::Annual] {
                out.push(PlanOffer {
                    plan,
                    name: plan.display_name(),
                    billing_type: billing,
                    credits: self.credits_for(plan, billing),
                    price_cents: self.price_cents_for(plan, billing),
                    label: plan_label(plan, billing),
                });
            }
        }
        out
    }
}

/// Text stored on payment records, e.g. `"Premium - monthly"`.
pub fn plan_label(plan: PlanKind, billing: BillingType) -> String {
    format!("{} - {}", plan.display_name(), billing.as_str())
}

pub fn parse_plan_label(label: &str) -> Option<(PlanKind, BillingType)> {
    let (plan, billing) = label.split_once('-')?;
    Some((PlanKind::parse(plan)?, BillingType::parse(billing)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allotments() {
        let c = PlanCatalog::default();
        assert_eq!(c.credits_for(PlanKind::Free, BillingType::Monthly), 30);
        assert_eq!(c.credits_for(PlanKind::Premium, BillingType::Monthly), 300);
        assert_eq!(c.credits_for(PlanKind::Premium, BillingType::Annual), 1000);
        assert_eq!(c.credits_for(PlanKind::Business, BillingType::Monthly), 1000);
        assert_eq!(c.credits_for(PlanKind::Business, BillingType::Annual), 3000);
    }

    #[test]
    fn annual_prices_apply_sixty_percent_discount() {
        let c = PlanCatalog::default();
        assert_eq!(c.price_cents_for(PlanKind::Premium, BillingType::Annual), 46_600);
        assert_eq!(c.price_cents_for(PlanKind::Business, BillingType::Annual), 142_600);
        assert_eq!(c.price_cents_for(PlanKind::Free, BillingType::Annual), 0);
    }

    #[test]
    fn plan_labels_parse_back() {
        let label = plan_label(PlanKind::Business, BillingType::Annual);
        assert_eq!(label, "Business - annual");
        assert_eq!(
            parse_plan_label(&label),
            Some((PlanKind::Business, BillingType::Annual))
        );
        assert_eq!(
            parse_plan_label("premium-mensal"),
            Some((PlanKind::Premium, BillingType::Monthly))
        );
        assert_eq!(parse_plan_label("premium"), None);
    }

    #[test]
    fn action_costs_come_from_config() {
        let costs = CreditCosts {
            export: 5,
            ..CreditCosts::default()
        };
        let c = PlanCatalog::new(&PlansConfig::default(), costs);
        assert_eq!(c.cost_of(CreditAction::Export), 5);
        assert_eq!(c.cost_of(CreditAction::SummaryAdvanced), 25);
        assert_eq!(c.offers().len(), 5);
    }
}
