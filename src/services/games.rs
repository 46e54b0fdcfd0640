use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::game::GameSession;
use crate::models::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::services::responsible_gaming::ResponsibleGamingService;
use crate::utils::money::format_brl;
use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

pub const CLASSIC_SYMBOLS: [&str; 8] = ["🐯", "🐰", "🐲", "🐂", "🐁", "🐠", "7️⃣", "💰"];
pub const CLASSIC_WIN_PROBABILITY: f64 = 0.33;
pub const CLASSIC_MIN_MULTIPLIER: f64 = 1.5;
pub const CLASSIC_MAX_MULTIPLIER: f64 = 10.0;

/// Fortune Tiger paytable: symbol and three-of-a-kind multiplier.
pub const TIGER_PAYTABLE: [(&str, i64); 5] = [("🐯", 10), ("💰", 5), ("🎋", 3), ("🍊", 2), ("🍇", 1)];

/// Reels shown by provider slots; the outcome itself is one uniform draw.
const GENERIC_SYMBOLS: [&str; 4] = ["7️⃣", "💎", "🔔", "🍒"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Classic,
    FortuneTiger,
    Generic,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GameInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
    pub category: &'static str,
    /// Shown in the lobby only; payouts do not target it.
    pub rtp: f64,
    pub min_bet_cents: i64,
    pub max_bet_cents: i64,
    pub kind: SlotKind,
}

pub fn catalog() -> &'static [GameInfo] {
    const GAMES: &[GameInfo] = &[
        GameInfo {
            id: "fortune-tiger",
            name: "Fortune Tiger",
            provider: "PG Soft",
            category: "slots",
            rtp: 96.81,
            min_bet_cents: 1_00,
            max_bet_cents: 100_00,
            kind: SlotKind::FortuneTiger,
        },
        GameInfo {
            id: "lucky-neko",
            name: "Lucky Neko",
            provider: "PG Soft",
            category: "slots",
            rtp: 96.73,
            min_bet_cents: 1_00,
            max_bet_cents: 100_00,
            kind: SlotKind::Generic,
        },
        GameInfo {
            id: "fortune-gems",
            name: "Fortune Gems",
            provider: "TaDa Gaming",
            category: "slots",
            rtp: 97.00,
            min_bet_cents: 1_00,
            max_bet_cents: 100_00,
            kind: SlotKind::Generic,
        },
        GameInfo {
            id: "money-coming",
            name: "Money Coming",
            provider: "TaDa Gaming",
            category: "slots",
            rtp: 97.00,
            min_bet_cents: 1_00,
            max_bet_cents: 100_00,
            kind: SlotKind::Generic,
        },
        GameInfo {
            id: "lucky-slots",
            name: "Lucky Slots",
            provider: "LuckyYBet",
            category: "casino",
            rtp: 96.50,
            min_bet_cents: 1_00,
            max_bet_cents: 100_00,
            kind: SlotKind::Classic,
        },
    ];
    GAMES
}

pub fn find_game(game_id: &str) -> Result<&'static GameInfo> {
    catalog()
        .iter()
        .find(|game| game.id == game_id)
        .ok_or_else(|| AppError::NotFound("Jogo não encontrado.".to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpinOutcome {
    pub symbols: Vec<String>,
    pub win_cents: i64,
    pub multiplier: f64,
}

impl SpinOutcome {
    fn loss(symbols: Vec<String>) -> Self {
        Self { symbols, win_cents: 0, multiplier: 0.0 }
    }
}

fn scale(bet_cents: i64, multiplier: f64) -> i64 {
    (bet_cents as f64 * multiplier).round() as i64
}

fn draw<R: Rng + ?Sized>(rng: &mut R, symbols: &[&str]) -> String {
    symbols.choose(rng).copied().unwrap_or_default().to_string()
}

/// Classic slot with the win decided up front. A win overwrites all three
/// reels with one symbol and pays `bet * m`, `m` uniform in `[1.5, 10)`.
pub fn classic_outcome<R: Rng + ?Sized>(rng: &mut R, bet_cents: i64, win: bool) -> SpinOutcome {
    let reels: Vec<String> = (0..3).map(|_| draw(rng, &CLASSIC_SYMBOLS)).collect();
    if !win {
        return SpinOutcome::loss(reels);
    }

    let symbol = draw(rng, &CLASSIC_SYMBOLS);
    let multiplier = rng.gen_range(CLASSIC_MIN_MULTIPLIER..CLASSIC_MAX_MULTIPLIER);
    SpinOutcome {
        symbols: vec![symbol; 3],
        win_cents: scale(bet_cents, multiplier),
        multiplier,
    }
}

pub fn spin_classic<R: Rng + ?Sized>(rng: &mut R, bet_cents: i64) -> SpinOutcome {
    let win = rng.gen::<f64>() < CLASSIC_WIN_PROBABILITY;
    classic_outcome(rng, bet_cents, win)
}

pub fn tiger_payout(symbols: &[String], bet_cents: i64) -> i64 {
    match symbols {
        [a, b, c] if a == b && b == c => TIGER_PAYTABLE
            .iter()
            .find(|(symbol, _)| symbol == a)
            .map_or(0, |(_, multiplier)| bet_cents * multiplier),
        _ => 0,
    }
}

pub fn spin_fortune_tiger<R: Rng + ?Sized>(rng: &mut R, bet_cents: i64) -> SpinOutcome {
    let symbols: Vec<&str> = TIGER_PAYTABLE.iter().map(|(symbol, _)| *symbol).collect();
    let reels: Vec<String> = (0..3).map(|_| draw(rng, &symbols)).collect();
    let win_cents = tiger_payout(&reels, bet_cents);
    let multiplier = if bet_cents > 0 { win_cents as f64 / bet_cents as f64 } else { 0.0 };
    SpinOutcome { symbols: reels, win_cents, multiplier }
}

/// Multiplier for a provider slot draw `u` in `[0, 1)`.
pub fn generic_multiplier(u: f64) -> i64 {
    if u > 0.95 {
        10
    } else if u > 0.85 {
        5
    } else if u > 0.7 {
        2
    } else {
        0
    }
}

pub fn spin_generic<R: Rng + ?Sized>(rng: &mut R, bet_cents: i64) -> SpinOutcome {
    let multiplier = generic_multiplier(rng.gen::<f64>());
    let symbols = match multiplier {
        10 => vec![GENERIC_SYMBOLS[0].to_string(); 3],
        5 => vec![GENERIC_SYMBOLS[1].to_string(); 3],
        2 => vec![GENERIC_SYMBOLS[2].to_string(); 3],
        _ => {
            // Any draw that is not three of a kind.
            let mut reels: Vec<String> = (0..3).map(|_| draw(rng, &GENERIC_SYMBOLS)).collect();
            if reels[0] == reels[1] && reels[1] == reels[2] {
                reels[2] = GENERIC_SYMBOLS[3].to_string();
                if reels[0] == reels[2] {
                    reels[2] = GENERIC_SYMBOLS[2].to_string();
                }
            }
            reels
        }
    };
    SpinOutcome { symbols, win_cents: bet_cents * multiplier, multiplier: multiplier as f64 }
}

pub fn spin<R: Rng + ?Sized>(kind: SlotKind, rng: &mut R, bet_cents: i64) -> SpinOutcome {
    match kind {
        SlotKind::Classic => spin_classic(rng, bet_cents),
        SlotKind::FortuneTiger => spin_fortune_tiger(rng, bet_cents),
        SlotKind::Generic => spin_generic(rng, bet_cents),
    }
}

#[derive(Debug, Clone)]
pub struct PlayResult {
    pub session: GameSession,
    pub multiplier: f64,
    pub balance_cents: i64,
}

pub struct GameService {
    db: Arc<SqliteDatabase>,
    limits: Arc<ResponsibleGamingService>,
}

impl GameService {
    pub fn new(db: Arc<SqliteDatabase>, limits: Arc<ResponsibleGamingService>) -> Self {
        Self { db, limits }
    }

    pub async fn play(&self, user_id: &Uuid, game_id: &str, bet_cents: i64) -> Result<PlayResult> {
        let game = find_game(game_id)?;
        if bet_cents < game.min_bet_cents || bet_cents > game.max_bet_cents {
            return Err(AppError::ValidationError(format!(
                "Aposta deve ser entre {} e {}.",
                format_brl(game.min_bet_cents),
                format_brl(game.max_bet_cents)
            )));
        }

        let now = Utc::now();
        self.limits.check_bet(user_id, bet_cents, now).await?;

        let outcome = spin(game.kind, &mut rand::thread_rng(), bet_cents);

        let bet = Transaction::new(
            *user_id,
            TransactionType::Bet,
            bet_cents,
            format!("Aposta no jogo {} ({})", game.name, game.provider),
            TransactionStatus::Completed,
        );
        let win = (outcome.win_cents > 0).then(|| {
            Transaction::new(
                *user_id,
                TransactionType::Win,
                outcome.win_cents,
                format!("Ganho no jogo {} ({})", game.name, game.provider),
                TransactionStatus::Completed,
            )
        });
        let session = GameSession {
            id: Uuid::new_v4(),
            user_id: *user_id,
            game_id: game.id.to_string(),
            bet_cents,
            win_cents: outcome.win_cents,
            symbols: outcome.symbols,
            created_at: now,
        };

        self.db.settle_spin(&bet, win.as_ref(), &session).await?;
        let balance_cents = self.db.get_user_by_id(user_id).await?.balance_cents;

        info!(
            action = "spin_settled",
            user_id = %user_id,
            game = %game.id,
            bet_cents = bet_cents,
            win_cents = session.win_cents
        );
        Ok(PlayResult { session, multiplier: outcome.multiplier, balance_cents })
    }

    pub async fn history(&self, user_id: &Uuid, limit: i64) -> Result<Vec<GameSession>> {
        self.db.get_game_sessions(user_id, limit.clamp(1, 200)).await
    }
}
