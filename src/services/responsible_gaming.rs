use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::limits::{
    ActivitySummary, LimitSettings, LimitsPatch, PendingLimits, ResponsibleGamingLimits,
};
use crate::models::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::services::audit;
use crate::utils::money::{format_brl, to_cents};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Delay before a looser limit replaces the current one.
pub const COOLING_OFF_HOURS: i64 = 24;
pub const MAX_SELF_EXCLUSION_DAYS: i64 = 5 * 365;

/// Headroom left after an allowed deposit check, in centavos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositHeadroom {
    pub remaining_cents: i64,
}

#[derive(Debug)]
pub struct ActivityReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub limits: LimitSettings,
    pub deposited_cents: i64,
    pub bet_cents: i64,
    pub won_cents: i64,
    pub withdrawn_cents: i64,
    pub transactions: Vec<Transaction>,
}

pub struct ResponsibleGamingService {
    db: Arc<SqliteDatabase>,
    offset: FixedOffset,
}

impl ResponsibleGamingService {
    pub fn new(db: Arc<SqliteDatabase>, offset: FixedOffset) -> Self {
        Self { db, offset }
    }

    /// Effective limits at `now`. A pending change whose cooling-off has
    /// elapsed is promoted and persisted on read.
    pub async fn limits(&self, user_id: &Uuid, now: DateTime<Utc>) -> Result<ResponsibleGamingLimits> {
        let Some(mut limits) = self.db.get_limits(user_id).await? else {
            return Ok(ResponsibleGamingLimits::defaults_for(*user_id));
        };

        if let Some(pending) = limits.pending {
            if pending.effective_at <= now {
                limits.settings = pending.settings;
                limits.pending = None;
                limits.updated_at = now;
                self.db.upsert_limits(&limits).await?;
                info!(action = "limits_promoted", user_id = %user_id);
            }
        }

        Ok(limits)
    }

    pub async fn update_limits(
        &self,
        user_id: &Uuid,
        patch: &LimitsPatch,
        now: DateTime<Utc>,
    ) -> Result<ResponsibleGamingLimits> {
        let mut limits = self.limits(user_id, now).await?;
        let requested = apply_patch(limits.pending.map_or(limits.settings, |p| p.settings), patch)?;

        let (immediate, looser) = split_changes(&limits.settings, &requested);
        limits.settings = immediate;
        limits.pending = if looser {
            // Tightening an already pending change keeps its clock.
            let effective_at = match limits.pending {
                Some(p) if !split_changes(&p.settings, &requested).1 => p.effective_at,
                _ => now + Duration::hours(COOLING_OFF_HOURS),
            };
            Some(PendingLimits { settings: requested, effective_at })
        } else {
            None
        };
        limits.updated_at = now;

        self.db.upsert_limits(&limits).await?;
        audit::record(
            &self.db,
            *user_id,
            "LIMITS_UPDATED",
            json!({
                "settings": limits.settings,
                "pending": limits.pending,
            }),
        )
        .await;
        info!(action = "limits_updated", user_id = %user_id, pending = limits.pending.is_some());
        Ok(limits)
    }

    pub async fn activity(&self, user_id: &Uuid, now: DateTime<Utc>) -> Result<ActivitySummary> {
        let (day_start, month_start) = period_starts(self.offset, now)?;
        let (dep_day, bet_day, win_day) = self.db.sum_activity_since(user_id, day_start, now).await?;
        let (dep_month, bet_month, win_month) = self.db.sum_activity_since(user_id, month_start, now).await?;

        Ok(ActivitySummary {
            deposited_today_cents: dep_day,
            deposited_month_cents: dep_month,
            bet_today_cents: bet_day,
            bet_month_cents: bet_month,
            lost_today_cents: bet_day - win_day,
            lost_month_cents: bet_month - win_month,
        })
    }

    pub async fn check_deposit(
        &self,
        user_id: &Uuid,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<DepositHeadroom> {
        let limits = self.limits(user_id, now).await?;
        let activity = self.activity(user_id, now).await?;
        evaluate_deposit(&limits.settings, &activity, amount_cents)
    }

    pub async fn check_bet(&self, user_id: &Uuid, amount_cents: i64, now: DateTime<Utc>) -> Result<()> {
        let limits = self.limits(user_id, now).await?;
        if let Some(until) = limits.self_excluded_until.filter(|until| now < *until) {
            return Err(AppError::LimitExceeded(format!(
                "Conta em autoexclusão até {}.",
                until.with_timezone(&self.offset).format("%d/%m/%Y")
            )));
        }
        let activity = self.activity(user_id, now).await?;
        evaluate_bet(&limits.settings, &activity, amount_cents)
    }

    /// Blocks betting for `days`. An active exclusion can be extended but never shortened.
    pub async fn self_exclude(&self, user_id: &Uuid, days: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if !(1..=MAX_SELF_EXCLUSION_DAYS).contains(&days) {
            return Err(AppError::ValidationError(format!(
                "O período de autoexclusão deve ser entre 1 e {} dias.",
                MAX_SELF_EXCLUSION_DAYS
            )));
        }

        let mut limits = self.limits(user_id, now).await?;
        let until = now + Duration::days(days);
        if let Some(current) = limits.self_excluded_until.filter(|current| *current > until) {
            return Err(AppError::Conflict(format!(
                "Autoexclusão já ativa até {}. Não é possível reduzir o período.",
                current.with_timezone(&self.offset).format("%d/%m/%Y")
            )));
        }

        limits.self_excluded_until = Some(until);
        limits.updated_at = now;
        self.db.upsert_limits(&limits).await?;

        audit::record(
            &self.db,
            *user_id,
            "SELF_EXCLUSION_ENABLED",
            json!({ "days": days, "until": until }),
        )
        .await;
        info!(action = "self_exclusion_enabled", user_id = %user_id, days = days);
        Ok(until)
    }

    pub async fn report(
        &self,
        user_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ActivityReport> {
        if from > to {
            return Err(AppError::ValidationError(
                "A data inicial deve ser anterior à data final.".to_string(),
            ));
        }
        let limits = self.limits(user_id, Utc::now()).await?;
        let transactions = self.db.get_transactions_between(user_id, from, to).await?;

        let total = |kind: TransactionType| -> i64 {
            transactions
                .iter()
                .filter(|t| t.tx_type == kind && t.status != TransactionStatus::Rejected)
                .map(|t| t.amount_cents)
                .sum()
        };

        Ok(ActivityReport {
            from,
            to,
            limits: limits.settings,
            deposited_cents: total(TransactionType::Deposit),
            bet_cents: total(TransactionType::Bet),
            won_cents: total(TransactionType::Win),
            withdrawn_cents: total(TransactionType::Withdrawal),
            transactions,
        })
    }
}

/// Start of the business day and month containing `now`, as UTC instants.
pub(crate) fn period_starts(offset: FixedOffset, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let local = now.with_timezone(&offset).date_naive();
    let month = NaiveDate::from_ymd_opt(local.year(), local.month(), 1)
        .ok_or_else(|| AppError::InternalError("Invalid month start".to_string()))?;
    Ok((local_midnight(offset, local)?, local_midnight(offset, month)?))
}

fn local_midnight(offset: FixedOffset, date: NaiveDate) -> Result<DateTime<Utc>> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::InternalError("Invalid midnight".to_string()))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| AppError::InternalError("Ambiguous local midnight".to_string()))
}

fn apply_patch(mut settings: LimitSettings, patch: &LimitsPatch) -> Result<LimitSettings> {
    let cents = |value: Option<f64>, current: i64| value.map_or(Ok(current), to_cents);

    settings.daily_deposit_cents = cents(patch.daily_deposit, settings.daily_deposit_cents)?;
    settings.monthly_deposit_cents = cents(patch.monthly_deposit, settings.monthly_deposit_cents)?;
    settings.daily_bet_cents = cents(patch.daily_bet, settings.daily_bet_cents)?;
    settings.monthly_bet_cents = cents(patch.monthly_bet, settings.monthly_bet_cents)?;
    settings.daily_loss_cents = cents(patch.daily_loss, settings.daily_loss_cents)?;
    settings.monthly_loss_cents = cents(patch.monthly_loss, settings.monthly_loss_cents)?;

    if let Some(minutes) = patch.max_session_minutes {
        if !(1..=24 * 60).contains(&minutes) {
            return Err(AppError::ValidationError(
                "A duração máxima da sessão deve ser entre 1 e 1440 minutos.".to_string(),
            ));
        }
        settings.max_session_minutes = minutes;
    }
    if let Some(alerts) = patch.alerts_enabled {
        settings.alerts_enabled = alerts;
    }

    if settings.daily_deposit_cents > settings.monthly_deposit_cents
        || settings.daily_bet_cents > settings.monthly_bet_cents
        || settings.daily_loss_cents > settings.monthly_loss_cents
    {
        return Err(AppError::ValidationError(
            "O limite diário não pode ser maior que o limite mensal.".to_string(),
        ));
    }
    Ok(settings)
}

/// Splits a requested settings set into what applies now (every stricter or
/// equal field) and whether anything looser remains for the cooling-off.
fn split_changes(current: &LimitSettings, requested: &LimitSettings) -> (LimitSettings, bool) {
    let mut immediate = *current;
    let mut looser = false;

    let mut pick = |now: &mut i64, want: i64| {
        if want <= *now {
            *now = want;
        } else {
            looser = true;
        }
    };
    pick(&mut immediate.daily_deposit_cents, requested.daily_deposit_cents);
    pick(&mut immediate.monthly_deposit_cents, requested.monthly_deposit_cents);
    pick(&mut immediate.daily_bet_cents, requested.daily_bet_cents);
    pick(&mut immediate.monthly_bet_cents, requested.monthly_bet_cents);
    pick(&mut immediate.daily_loss_cents, requested.daily_loss_cents);
    pick(&mut immediate.monthly_loss_cents, requested.monthly_loss_cents);
    pick(&mut immediate.max_session_minutes, requested.max_session_minutes);

    // Alerts are a preference, not a ceiling.
    immediate.alerts_enabled = requested.alerts_enabled;
    (immediate, looser)
}

pub(crate) fn evaluate_deposit(
    limits: &LimitSettings,
    activity: &ActivitySummary,
    amount_cents: i64,
) -> Result<DepositHeadroom> {
    if activity.deposited_today_cents + amount_cents > limits.daily_deposit_cents {
        return Err(AppError::LimitExceeded(format!(
            "Limite diário de depósito atingido. Limite: {}",
            format_brl(limits.daily_deposit_cents)
        )));
    }
    if activity.deposited_month_cents + amount_cents > limits.monthly_deposit_cents {
        return Err(AppError::LimitExceeded(format!(
            "Limite mensal de depósito atingido. Limite: {}",
            format_brl(limits.monthly_deposit_cents)
        )));
    }
    Ok(DepositHeadroom {
        remaining_cents: (limits.daily_deposit_cents - activity.deposited_today_cents)
            .min(limits.monthly_deposit_cents - activity.deposited_month_cents)
            - amount_cents,
    })
}

pub(crate) fn evaluate_bet(limits: &LimitSettings, activity: &ActivitySummary, amount_cents: i64) -> Result<()> {
    if activity.bet_today_cents + amount_cents > limits.daily_bet_cents {
        return Err(AppError::LimitExceeded(format!(
            "Limite diário de aposta atingido. Limite: {}",
            format_brl(limits.daily_bet_cents)
        )));
    }
    if activity.bet_month_cents + amount_cents > limits.monthly_bet_cents {
        return Err(AppError::LimitExceeded(format!(
            "Limite mensal de aposta atingido. Limite: {}",
            format_brl(limits.monthly_bet_cents)
        )));
    }
    // The whole stake counts as a potential loss.
    if activity.lost_today_cents + amount_cents > limits.daily_loss_cents {
        return Err(AppError::LimitExceeded(
            "Limite diário de perda atingido. Considere fazer uma pausa.".to_string(),
        ));
    }
    if activity.lost_month_cents + amount_cents > limits.monthly_loss_cents {
        return Err(AppError::LimitExceeded(
            "Limite mensal de perda atingido. Considere fazer uma pausa.".to_string(),
        ));
    }
    Ok(())
}
