use crate::errors::{AppError, Result};
use crate::models::audit::AuditEntry;
use crate::models::game::GameSession;
use crate::models::kyc::{Address, KycSubmission};
use crate::models::limits::{PendingLimits, ResponsibleGamingLimits};
use crate::models::payment_request::{DepositRequest, RequestStatus, WithdrawalRequest};
use crate::models::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::models::user::{KycStatus, User};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

/// Fixed-width UTC timestamps so that text comparison orders them correctly.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::DatabaseError(format!("Invalid timestamp '{}': {}", value, e)))
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| AppError::DatabaseError(format!("Invalid id '{}': {}", value, e)))
}

fn parse_enum<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(AppError::DatabaseError)
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        password_hash: row.try_get("password_hash")?,
        balance_cents: row.try_get("balance_cents")?,
        kyc_status: parse_enum(&row.try_get::<String, _>("kyc_status")?)?,
        is_admin: row.try_get("is_admin")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction> {
    Ok(Transaction {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
        tx_type: parse_enum(&row.try_get::<String, _>("tx_type")?)?,
        amount_cents: row.try_get("amount_cents")?,
        description: row.try_get("description")?,
        status: parse_enum(&row.try_get::<String, _>("status")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn deposit_from_row(row: &SqliteRow) -> Result<DepositRequest> {
    Ok(DepositRequest {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
        amount_cents: row.try_get("amount_cents")?,
        pix_key: row.try_get("pix_key")?,
        external_id: row.try_get("external_id")?,
        br_code: row.try_get("br_code")?,
        transaction_id: parse_uuid(&row.try_get::<String, _>("transaction_id")?)?,
        status: parse_enum(&row.try_get::<String, _>("status")?)?,
        expires_at: parse_ts(&row.try_get::<String, _>("expires_at")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        decided_at: parse_opt_ts(row.try_get("decided_at")?)?,
    })
}

fn withdrawal_from_row(row: &SqliteRow) -> Result<WithdrawalRequest> {
    let decided_by: Option<String> = row.try_get("decided_by")?;
    Ok(WithdrawalRequest {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
        amount_cents: row.try_get("amount_cents")?,
        pix_key: row.try_get("pix_key")?,
        transaction_id: parse_uuid(&row.try_get::<String, _>("transaction_id")?)?,
        status: parse_enum(&row.try_get::<String, _>("status")?)?,
        requested_at: parse_ts(&row.try_get::<String, _>("requested_at")?)?,
        decided_at: parse_opt_ts(row.try_get("decided_at")?)?,
        decided_by: decided_by.as_deref().map(parse_uuid).transpose()?,
    })
}

fn kyc_from_row(row: &SqliteRow) -> Result<KycSubmission> {
    let birth_date: String = row.try_get("birth_date")?;
    let reviewed_by: Option<String> = row.try_get("reviewed_by")?;
    Ok(KycSubmission {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
        cpf: row.try_get("cpf")?,
        cpf_validated: row.try_get("cpf_validated")?,
        full_name: row.try_get("full_name")?,
        birth_date: NaiveDate::parse_from_str(&birth_date, "%Y-%m-%d")
            .map_err(|e| AppError::DatabaseError(format!("Invalid birth date: {}", e)))?,
        phone: row.try_get("phone")?,
        address: Address {
            cep: row.try_get("cep")?,
            street: row.try_get("street")?,
            number: row.try_get("number")?,
            complement: row.try_get("complement")?,
            neighborhood: row.try_get("neighborhood")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
        },
        document_front_url: row.try_get("document_front_url")?,
        document_back_url: row.try_get("document_back_url")?,
        selfie_url: row.try_get("selfie_url")?,
        status: parse_enum(&row.try_get::<String, _>("status")?)?,
        submitted_at: parse_ts(&row.try_get::<String, _>("submitted_at")?)?,
        reviewed_at: parse_opt_ts(row.try_get("reviewed_at")?)?,
        reviewed_by: reviewed_by.as_deref().map(parse_uuid).transpose()?,
        rejection_reason: row.try_get("rejection_reason")?,
    })
}

async fn adjust_balance(conn: &mut SqliteConnection, user_id: &Uuid, delta_cents: i64) -> Result<()> {
    // Debits are guarded in the WHERE clause so the check and the write are one statement.
    let result = sqlx::query(
        "UPDATE users SET balance_cents = balance_cents + ?1, updated_at = ?2 \
         WHERE id = ?3 AND balance_cents + ?1 >= 0",
    )
    .bind(delta_cents)
    .bind(ts(Utc::now()))
    .bind(user_id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let exists = sqlx::query("SELECT 1 FROM users WHERE id = ?1")
            .bind(user_id.to_string())
            .fetch_optional(&mut *conn)
            .await?
            .is_some();
        return Err(if exists {
            AppError::InsufficientFunds
        } else {
            AppError::NotFound("Usuário não encontrado.".to_string())
        });
    }
    Ok(())
}

async fn insert_transaction(conn: &mut SqliteConnection, tx: &Transaction) -> Result<()> {
    sqlx::query(
        "INSERT INTO transactions (id, user_id, tx_type, amount_cents, description, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(tx.id.to_string())
    .bind(tx.user_id.to_string())
    .bind(tx.tx_type.as_str())
    .bind(tx.amount_cents)
    .bind(&tx.description)
    .bind(tx.status.as_str())
    .bind(ts(tx.created_at))
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(format!("Failed to insert transaction: {}", e)))?;
    Ok(())
}

async fn set_transaction_status(
    conn: &mut SqliteConnection,
    tx_id: &Uuid,
    status: TransactionStatus,
) -> Result<()> {
    sqlx::query("UPDATE transactions SET status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(tx_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

impl SqliteDatabase {
    pub async fn new(database_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::DatabaseError(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", database_path))
            .map_err(|e| AppError::DatabaseError(format!("Invalid database path: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect to database: {}", e)))?;

        let db = Self { pool };
        db.create_tables().await?;

        tracing::info!(action = "database_ready", path = %database_path);
        Ok(db)
    }

    /// Private in-memory database on a single connection, for tests and dry runs.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AppError::DatabaseError(e.to_string()))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        let query = r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                display_name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                balance_cents INTEGER NOT NULL DEFAULT 0 CHECK (balance_cents >= 0),
                kyc_status TEXT NOT NULL DEFAULT 'not_submitted',
                is_admin BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                token_id TEXT UNIQUE NOT NULL,
                token_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                is_active BOOLEAN DEFAULT TRUE,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                tx_type TEXT NOT NULL, -- 'deposit', 'withdrawal', 'bet', 'win'
                amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
                description TEXT NOT NULL,
                status TEXT NOT NULL, -- 'pending', 'completed', 'rejected'
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS deposit_requests (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                pix_key TEXT NOT NULL,
                external_id TEXT UNIQUE NOT NULL,
                br_code TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                decided_at TEXT,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE,
                FOREIGN KEY (transaction_id) REFERENCES transactions (id)
            );

            CREATE TABLE IF NOT EXISTS withdrawal_requests (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                pix_key TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                requested_at TEXT NOT NULL,
                decided_at TEXT,
                decided_by TEXT,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE,
                FOREIGN KEY (transaction_id) REFERENCES transactions (id)
            );

            CREATE TABLE IF NOT EXISTS kyc_submissions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                cpf TEXT NOT NULL,
                cpf_validated BOOLEAN NOT NULL,
                full_name TEXT NOT NULL,
                birth_date TEXT NOT NULL,
                phone TEXT NOT NULL,
                cep TEXT NOT NULL,
                street TEXT NOT NULL,
                number TEXT NOT NULL,
                complement TEXT,
                neighborhood TEXT NOT NULL,
                city TEXT NOT NULL,
                state TEXT NOT NULL,
                document_front_url TEXT NOT NULL,
                document_back_url TEXT NOT NULL,
                selfie_url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                submitted_at TEXT NOT NULL,
                reviewed_at TEXT,
                reviewed_by TEXT,
                rejection_reason TEXT,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS user_limits (
                user_id TEXT PRIMARY KEY,
                settings TEXT NOT NULL,
                pending TEXT,
                self_excluded_until TEXT,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS game_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                game_id TEXT NOT NULL,
                bet_cents INTEGER NOT NULL,
                win_cents INTEGER NOT NULL,
                symbols TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);
            CREATE INDEX IF NOT EXISTS idx_tokens_token_id ON user_tokens(token_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_user_created ON transactions(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_deposits_external_id ON deposit_requests(external_id);
            CREATE INDEX IF NOT EXISTS idx_withdrawals_status ON withdrawal_requests(status);
            CREATE INDEX IF NOT EXISTS idx_kyc_user ON kyc_submissions(user_id);
            CREATE INDEX IF NOT EXISTS idx_kyc_status ON kyc_submissions(status);
            CREATE INDEX IF NOT EXISTS idx_game_sessions_user ON game_sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_logs(user_id);
        "#;

        sqlx::query(query)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to create tables: {}", e)))?;

        Ok(())
    }

    // Users

    pub async fn create_user(&self, user: &User) -> Result<()> {
        self.create_user_with_credit(user, None).await
    }

    /// Inserts the account and, when given, its opening credit in one transaction.
    pub async fn create_user_with_credit(&self, user: &User, opening: Option<&Transaction>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO users (id, email, display_name, password_hash, balance_cents, kyc_status, is_admin, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.balance_cents)
        .bind(user.kyc_status.as_str())
        .bind(user.is_admin)
        .bind(ts(user.created_at))
        .bind(ts(user.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                AppError::Conflict("E-mail já está em uso.".to_string())
            } else {
                AppError::DatabaseError(format!("Failed to create user: {}", e))
            }
        })?;

        if let Some(entry) = opening {
            adjust_balance(&mut tx, &user.id, entry.amount_cents).await?;
            insert_transaction(&mut tx, entry).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch user by email: {}", e)))?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn get_user_by_id(&self, user_id: &Uuid) -> Result<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => user_from_row(&row),
            None => Err(AppError::NotFound("Usuário não encontrado.".to_string())),
        }
    }

    pub async fn set_admin(&self, email: &str, is_admin: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET is_admin = ?1, updated_at = ?2 WHERE email = ?3")
            .bind(is_admin)
            .bind(ts(Utc::now()))
            .bind(email)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Usuário não encontrado.".to_string()));
        }
        Ok(())
    }

    // Session tokens

    pub async fn store_user_token(
        &self,
        user_id: &Uuid,
        token_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_tokens (user_id, token_id, token_hash, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(user_id.to_string())
        .bind(token_id)
        .bind(token_hash)
        .bind(ts(Utc::now()))
        .bind(ts(expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to store token: {}", e)))?;
        Ok(())
    }

    pub async fn is_token_valid(&self, token_id: &str, token_hash: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM user_tokens \
             WHERE token_id = ?1 AND token_hash = ?2 AND is_active = TRUE AND expires_at > ?3",
        )
        .bind(token_id)
        .bind(token_hash)
        .bind(ts(Utc::now()))
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    pub async fn revoke_token(&self, token_id: &str) -> Result<()> {
        sqlx::query("UPDATE user_tokens SET is_active = FALSE WHERE token_id = ?1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn cleanup_expired_tokens(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_tokens WHERE expires_at <= ?1 OR is_active = FALSE")
            .bind(ts(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // Ledger

    /// Applies a balance change and records its ledger entry atomically.
    /// Withdrawals and bets debit; deposits and wins credit.
    pub async fn apply_ledger_entry(&self, entry: &Transaction) -> Result<()> {
        let delta = match entry.tx_type {
            TransactionType::Deposit | TransactionType::Win => entry.amount_cents,
            TransactionType::Withdrawal | TransactionType::Bet => -entry.amount_cents,
        };
        let mut tx = self.pool.begin().await?;
        adjust_balance(&mut tx, &entry.user_id, delta).await?;
        insert_transaction(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_transactions(&self, user_id: &Uuid, limit: i64) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )
        .bind(user_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list transactions: {}", e)))?;
        rows.iter().map(transaction_from_row).collect()
    }

    pub async fn get_transactions_between(
        &self,
        user_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE user_id = ?1 AND created_at >= ?2 AND created_at <= ?3 \
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id.to_string())
        .bind(ts(from))
        .bind(ts(to))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    /// Deposit, bet and win totals since `since`, ignoring rejected entries.
    /// Pending deposits whose charge expired before `now` count as rejected.
    pub async fn sum_activity_since(
        &self,
        user_id: &Uuid,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(i64, i64, i64)> {
        let row = sqlx::query(
            "SELECT \
                COALESCE(SUM(CASE WHEN tx_type = 'deposit' THEN amount_cents ELSE 0 END), 0) AS deposits, \
                COALESCE(SUM(CASE WHEN tx_type = 'bet' THEN amount_cents ELSE 0 END), 0) AS bets, \
                COALESCE(SUM(CASE WHEN tx_type = 'win' THEN amount_cents ELSE 0 END), 0) AS wins \
             FROM transactions t WHERE t.user_id = ?1 AND t.status != 'rejected' AND t.created_at >= ?2 \
             AND NOT EXISTS ( \
                SELECT 1 FROM deposit_requests d \
                WHERE d.transaction_id = t.id AND d.status = 'pending' AND d.expires_at <= ?3)",
        )
        .bind(user_id.to_string())
        .bind(ts(since))
        .bind(ts(now))
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_get("deposits")?, row.try_get("bets")?, row.try_get("wins")?))
    }

    // Games

    /// Debits the bet, credits the win and stores the session in one transaction.
    /// A failed debit leaves nothing behind.
    pub async fn settle_spin(
        &self,
        bet: &Transaction,
        win: Option<&Transaction>,
        session: &GameSession,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        adjust_balance(&mut tx, &bet.user_id, -bet.amount_cents).await?;
        insert_transaction(&mut tx, bet).await?;

        if let Some(win) = win {
            adjust_balance(&mut tx, &win.user_id, win.amount_cents).await?;
            insert_transaction(&mut tx, win).await?;
        }

        sqlx::query(
            "INSERT INTO game_sessions (id, user_id, game_id, bet_cents, win_cents, symbols, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(&session.game_id)
        .bind(session.bet_cents)
        .bind(session.win_cents)
        .bind(serde_json::to_string(&session.symbols)?)
        .bind(ts(session.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_game_sessions(&self, user_id: &Uuid, limit: i64) -> Result<Vec<GameSession>> {
        let rows = sqlx::query(
            "SELECT * FROM game_sessions WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )
        .bind(user_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(GameSession {
                    id: parse_uuid(&row.try_get::<String, _>("id")?)?,
                    user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
                    game_id: row.try_get("game_id")?,
                    bet_cents: row.try_get("bet_cents")?,
                    win_cents: row.try_get("win_cents")?,
                    symbols: serde_json::from_str(&row.try_get::<String, _>("symbols")?)?,
                    created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }

    // Deposits

    pub async fn create_deposit_request(&self, request: &DepositRequest, entry: &Transaction) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_transaction(&mut tx, entry).await?;
        sqlx::query(
            "INSERT INTO deposit_requests (id, user_id, amount_cents, pix_key, external_id, br_code, \
             transaction_id, status, expires_at, created_at, decided_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(request.id.to_string())
        .bind(request.user_id.to_string())
        .bind(request.amount_cents)
        .bind(&request.pix_key)
        .bind(&request.external_id)
        .bind(&request.br_code)
        .bind(request.transaction_id.to_string())
        .bind(request.status.as_str())
        .bind(ts(request.expires_at))
        .bind(ts(request.created_at))
        .bind(request.decided_at.map(ts))
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to create deposit request: {}", e)))?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_deposit_by_external_id(&self, external_id: &str) -> Result<Option<DepositRequest>> {
        let row = sqlx::query("SELECT * FROM deposit_requests WHERE external_id = ?1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deposit_from_row).transpose()
    }

    /// Moves a pending, unexpired deposit to approved and credits the player.
    /// Returns false when the request was already decided or has expired, so replays credit once.
    pub async fn approve_deposit(&self, external_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE deposit_requests SET status = 'approved', decided_at = ?1 \
             WHERE external_id = ?2 AND status = 'pending' AND expires_at > ?1",
        )
        .bind(ts(now))
        .bind(external_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        let row = sqlx::query("SELECT * FROM deposit_requests WHERE external_id = ?1")
            .bind(external_id)
            .fetch_one(&mut *tx)
            .await?;
        let request = deposit_from_row(&row)?;

        adjust_balance(&mut tx, &request.user_id, request.amount_cents).await?;
        set_transaction_status(&mut tx, &request.transaction_id, TransactionStatus::Completed).await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Pending deposit to rejected; returns false when it was already decided.
    pub async fn reject_deposit(&self, external_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE deposit_requests SET status = 'rejected', decided_at = ?1 \
             WHERE external_id = ?2 AND status = 'pending'",
        )
        .bind(ts(Utc::now()))
        .bind(external_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        let row = sqlx::query("SELECT transaction_id FROM deposit_requests WHERE external_id = ?1")
            .bind(external_id)
            .fetch_one(&mut *tx)
            .await?;
        let tx_id = parse_uuid(&row.try_get::<String, _>("transaction_id")?)?;
        set_transaction_status(&mut tx, &tx_id, TransactionStatus::Rejected).await?;

        tx.commit().await?;
        Ok(true)
    }

    // Withdrawals

    /// Holds the funds and opens the request in one transaction.
    pub async fn create_withdrawal_request(&self, request: &WithdrawalRequest, entry: &Transaction) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        adjust_balance(&mut tx, &request.user_id, -request.amount_cents).await?;
        insert_transaction(&mut tx, entry).await?;
        sqlx::query(
            "INSERT INTO withdrawal_requests (id, user_id, amount_cents, pix_key, transaction_id, status, requested_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(request.id.to_string())
        .bind(request.user_id.to_string())
        .bind(request.amount_cents)
        .bind(&request.pix_key)
        .bind(request.transaction_id.to_string())
        .bind(request.status.as_str())
        .bind(ts(request.requested_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to create withdrawal request: {}", e)))?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_withdrawals(&self, status: Option<RequestStatus>) -> Result<Vec<WithdrawalRequest>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM withdrawal_requests WHERE status = ?1 ORDER BY requested_at ASC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM withdrawal_requests ORDER BY requested_at ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(withdrawal_from_row).collect()
    }

    pub async fn list_user_withdrawals(&self, user_id: &Uuid) -> Result<Vec<WithdrawalRequest>> {
        let rows = sqlx::query("SELECT * FROM withdrawal_requests WHERE user_id = ?1 ORDER BY requested_at DESC")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    /// Approves (completes the held debit) or rejects (refunds it) a pending withdrawal.
    pub async fn decide_withdrawal(&self, id: &Uuid, admin_id: &Uuid, approve: bool) -> Result<WithdrawalRequest> {
        let mut tx = self.pool.begin().await?;
        let status = if approve { RequestStatus::Approved } else { RequestStatus::Rejected };

        let updated = sqlx::query(
            "UPDATE withdrawal_requests SET status = ?1, decided_at = ?2, decided_by = ?3 \
             WHERE id = ?4 AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(ts(Utc::now()))
        .bind(admin_id.to_string())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM withdrawal_requests WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let request = match row {
            Some(row) => withdrawal_from_row(&row)?,
            None => return Err(AppError::NotFound("Solicitação de saque não encontrada.".to_string())),
        };
        if updated.rows_affected() == 0 {
            return Err(AppError::Conflict("Esta solicitação já foi processada.".to_string()));
        }

        if approve {
            set_transaction_status(&mut tx, &request.transaction_id, TransactionStatus::Completed).await?;
        } else {
            adjust_balance(&mut tx, &request.user_id, request.amount_cents).await?;
            set_transaction_status(&mut tx, &request.transaction_id, TransactionStatus::Rejected).await?;
        }

        tx.commit().await?;
        Ok(request)
    }

    // KYC

    pub async fn create_kyc_submission(&self, kyc: &KycSubmission) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO kyc_submissions (id, user_id, cpf, cpf_validated, full_name, birth_date, phone, cep, street, \
             number, complement, neighborhood, city, state, document_front_url, document_back_url, selfie_url, status, \
             submitted_at, reviewed_at, reviewed_by, rejection_reason) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
        )
        .bind(kyc.id.to_string())
        .bind(kyc.user_id.to_string())
        .bind(&kyc.cpf)
        .bind(kyc.cpf_validated)
        .bind(&kyc.full_name)
        .bind(kyc.birth_date.format("%Y-%m-%d").to_string())
        .bind(&kyc.phone)
        .bind(&kyc.address.cep)
        .bind(&kyc.address.street)
        .bind(&kyc.address.number)
        .bind(&kyc.address.complement)
        .bind(&kyc.address.neighborhood)
        .bind(&kyc.address.city)
        .bind(&kyc.address.state)
        .bind(&kyc.document_front_url)
        .bind(&kyc.document_back_url)
        .bind(&kyc.selfie_url)
        .bind(kyc.status.as_str())
        .bind(ts(kyc.submitted_at))
        .bind(kyc.reviewed_at.map(ts))
        .bind(kyc.reviewed_by.map(|id| id.to_string()))
        .bind(&kyc.rejection_reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to create KYC submission: {}", e)))?;

        sqlx::query("UPDATE users SET kyc_status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(kyc.status.as_str())
            .bind(ts(Utc::now()))
            .bind(kyc.user_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_latest_kyc(&self, user_id: &Uuid) -> Result<Option<KycSubmission>> {
        let row = sqlx::query(
            "SELECT * FROM kyc_submissions WHERE user_id = ?1 ORDER BY submitted_at DESC, rowid DESC LIMIT 1",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch KYC submission: {}", e)))?;
        row.as_ref().map(kyc_from_row).transpose()
    }

    pub async fn list_kyc_submissions(&self, status: Option<KycStatus>) -> Result<Vec<KycSubmission>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM kyc_submissions WHERE status = ?1 ORDER BY submitted_at ASC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM kyc_submissions ORDER BY submitted_at ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(kyc_from_row).collect()
    }

    /// Decides a pending submission and mirrors the outcome on the user row.
    pub async fn review_kyc(
        &self,
        kyc_id: &Uuid,
        admin_id: &Uuid,
        status: KycStatus,
        rejection_reason: Option<&str>,
    ) -> Result<KycSubmission> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE kyc_submissions SET status = ?1, reviewed_at = ?2, reviewed_by = ?3, rejection_reason = ?4 \
             WHERE id = ?5 AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(ts(Utc::now()))
        .bind(admin_id.to_string())
        .bind(rejection_reason)
        .bind(kyc_id.to_string())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM kyc_submissions WHERE id = ?1")
            .bind(kyc_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let kyc = match row {
            Some(row) => kyc_from_row(&row)?,
            None => return Err(AppError::NotFound("Verificação não encontrada.".to_string())),
        };
        if updated.rows_affected() == 0 {
            return Err(AppError::Conflict("Esta verificação já foi analisada.".to_string()));
        }

        sqlx::query("UPDATE users SET kyc_status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(ts(Utc::now()))
            .bind(kyc.user_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(kyc)
    }

    // Responsible gaming

    pub async fn get_limits(&self, user_id: &Uuid) -> Result<Option<ResponsibleGamingLimits>> {
        let row = sqlx::query("SELECT * FROM user_limits WHERE user_id = ?1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let pending: Option<String> = row.try_get("pending")?;
        Ok(Some(ResponsibleGamingLimits {
            user_id: *user_id,
            settings: serde_json::from_str(&row.try_get::<String, _>("settings")?)?,
            pending: pending
                .as_deref()
                .map(serde_json::from_str::<PendingLimits>)
                .transpose()?,
            self_excluded_until: parse_opt_ts(row.try_get("self_excluded_until")?)?,
            updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
        }))
    }

    pub async fn upsert_limits(&self, limits: &ResponsibleGamingLimits) -> Result<()> {
        let pending = limits.pending.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            "INSERT INTO user_limits (user_id, settings, pending, self_excluded_until, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(user_id) DO UPDATE SET settings = excluded.settings, pending = excluded.pending, \
             self_excluded_until = excluded.self_excluded_until, updated_at = excluded.updated_at",
        )
        .bind(limits.user_id.to_string())
        .bind(serde_json::to_string(&limits.settings)?)
        .bind(pending)
        .bind(limits.self_excluded_until.map(ts))
        .bind(ts(limits.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to save limits: {}", e)))?;
        Ok(())
    }

    // Audit

    pub async fn insert_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_logs (id, user_id, event_type, event_data, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(entry.id.to_string())
        .bind(entry.user_id.to_string())
        .bind(&entry.event_type)
        .bind(entry.event_data.to_string())
        .bind(ts(entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_audit(&self, user_id: &Uuid) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_logs WHERE user_id = ?1 ORDER BY created_at ASC")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(AuditEntry {
                    id: parse_uuid(&row.try_get::<String, _>("id")?)?,
                    user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
                    event_type: row.try_get("event_type")?,
                    event_data: serde_json::from_str(&row.try_get::<String, _>("event_data")?)?,
                    created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn seed_user(db: &SqliteDatabase, email: &str, balance_cents: i64) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: "Jogador".to_string(),
            password_hash: "x".to_string(),
            balance_cents,
            kyc_status: KycStatus::Approved,
            is_admin: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        db.create_user(&user).await.unwrap();
        user
    }

    /// Moves a charge's expiry into the past without touching its status.
    pub(crate) async fn backdate_deposit_expiry(db: &SqliteDatabase, external_id: &str, minutes: i64) {
        sqlx::query("UPDATE deposit_requests SET expires_at = ?1 WHERE external_id = ?2")
            .bind(ts(Utc::now() - chrono::Duration::minutes(minutes)))
            .bind(external_id)
            .execute(&db.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        seed_user(&db, "a@exemplo.com", 0).await;
        let mut dup = seed_user(&db, "b@exemplo.com", 0).await;
        dup.id = Uuid::new_v4();
        dup.email = "a@exemplo.com".to_string();
        match db.create_user(&dup).await {
            Err(AppError::Conflict(msg)) => assert!(msg.contains("E-mail")),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_opening_credit_drops_account() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let existing = seed_user(&db, "a@exemplo.com", 0).await;
        let taken = Transaction::new(existing.id, TransactionType::Deposit, 500, "dep", TransactionStatus::Completed);
        db.apply_ledger_entry(&taken).await.unwrap();

        let mut user = existing.clone();
        user.id = Uuid::new_v4();
        user.email = "b@exemplo.com".to_string();
        let mut credit = Transaction::new(user.id, TransactionType::Deposit, 1_000, "bônus", TransactionStatus::Completed);
        credit.id = taken.id;

        assert!(db.create_user_with_credit(&user, Some(&credit)).await.is_err());
        assert!(db.get_user_by_email("b@exemplo.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overdraw_leaves_no_trace() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let user = seed_user(&db, "a@exemplo.com", 1_000).await;
        let bet = Transaction::new(user.id, TransactionType::Bet, 1_500, "aposta", TransactionStatus::Completed);

        assert!(matches!(db.apply_ledger_entry(&bet).await, Err(AppError::InsufficientFunds)));
        assert_eq!(db.get_user_by_id(&user.id).await.unwrap().balance_cents, 1_000);
        assert!(db.get_transactions(&user.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credit_and_debit() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let user = seed_user(&db, "a@exemplo.com", 0).await;
        let deposit = Transaction::new(user.id, TransactionType::Deposit, 5_000, "dep", TransactionStatus::Completed);
        let bet = Transaction::new(user.id, TransactionType::Bet, 1_200, "bet", TransactionStatus::Completed);
        db.apply_ledger_entry(&deposit).await.unwrap();
        db.apply_ledger_entry(&bet).await.unwrap();

        assert_eq!(db.get_user_by_id(&user.id).await.unwrap().balance_cents, 3_800);
        let (deposits, bets, wins) = db
            .sum_activity_since(&user.id, Utc::now() - chrono::Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!((deposits, bets, wins), (5_000, 1_200, 0));
    }

    #[tokio::test]
    async fn test_settle_spin_rolls_back_on_insufficient_funds() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let user = seed_user(&db, "a@exemplo.com", 100).await;
        let bet = Transaction::new(user.id, TransactionType::Bet, 500, "bet", TransactionStatus::Completed);
        let win = Transaction::new(user.id, TransactionType::Win, 1_000, "win", TransactionStatus::Completed);
        let session = GameSession {
            id: Uuid::new_v4(),
            user_id: user.id,
            game_id: "fortune-tiger".to_string(),
            bet_cents: 500,
            win_cents: 1_000,
            symbols: vec!["🐯".to_string(); 3],
            created_at: Utc::now(),
        };

        assert!(db.settle_spin(&bet, Some(&win), &session).await.is_err());
        assert_eq!(db.get_user_by_id(&user.id).await.unwrap().balance_cents, 100);
        assert!(db.get_game_sessions(&user.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let entry = Transaction::new(Uuid::new_v4(), TransactionType::Deposit, 100, "dep", TransactionStatus::Completed);
        assert!(matches!(db.apply_ledger_entry(&entry).await, Err(AppError::NotFound(_))));
    }
}
