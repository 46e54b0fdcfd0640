use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Per-player ceilings, all in centavos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LimitSettings {
    pub daily_deposit_cents: i64,
    pub monthly_deposit_cents: i64,
    pub daily_bet_cents: i64,
    pub monthly_bet_cents: i64,
    pub daily_loss_cents: i64,
    pub monthly_loss_cents: i64,
    pub max_session_minutes: i64,
    pub alerts_enabled: bool,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            daily_deposit_cents: 500_00,
            monthly_deposit_cents: 5_000_00,
            daily_bet_cents: 300_00,
            monthly_bet_cents: 3_000_00,
            daily_loss_cents: 200_00,
            monthly_loss_cents: 2_000_00,
            max_session_minutes: 120,
            alerts_enabled: true,
        }
    }
}

/// Looser settings waiting out the cooling-off period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PendingLimits {
    pub settings: LimitSettings,
    pub effective_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsibleGamingLimits {
    pub user_id: Uuid,
    pub settings: LimitSettings,
    pub pending: Option<PendingLimits>,
    pub self_excluded_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ResponsibleGamingLimits {
    pub fn defaults_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            settings: LimitSettings::default(),
            pending: None,
            self_excluded_until: None,
            updated_at: Utc::now(),
        }
    }
}

/// Optional overrides sent by the player; amounts in reais.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LimitsPatch {
    pub daily_deposit: Option<f64>,
    pub monthly_deposit: Option<f64>,
    pub daily_bet: Option<f64>,
    pub monthly_bet: Option<f64>,
    pub daily_loss: Option<f64>,
    pub monthly_loss: Option<f64>,
    pub max_session_minutes: Option<i64>,
    pub alerts_enabled: Option<bool>,
}

/// Totals for the current business day and month, in centavos.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ActivitySummary {
    pub deposited_today_cents: i64,
    pub deposited_month_cents: i64,
    pub bet_today_cents: i64,
    pub bet_month_cents: i64,
    /// Bets minus wins; negative when the player is ahead.
    pub lost_today_cents: i64,
    pub lost_month_cents: i64,
}
