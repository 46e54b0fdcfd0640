use crate::api::types::*;
use crate::errors::{AppError, Result};
use crate::models::game::GameSession;
use crate::models::kyc::{Address, KycSubmission};
use crate::models::limits::LimitsPatch;
use crate::models::user::{KycStatus, UserProfile};
use crate::services::games::{catalog, GameInfo};
use crate::services::jwt::{AuthenticatedUser, SESSION_HOURS};
use crate::services::kyc_service::{KycApplication, KycDocuments, UploadedDocument};
use crate::services::pix_service::PixWebhook;
use crate::services::postal_code::CepAddress;
use crate::state::AppState;
use crate::utils::money::{to_cents, to_reais};
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequestParts, Multipart, Path, Query};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

// JWT extractor for Authorization: Bearer ...
pub struct AuthBearer(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| AuthBearer(token.trim().to_string()))
            .ok_or_else(|| AppError::AuthenticationError("Faça login para continuar.".to_string()))
    }
}

/// A bearer token that was checked against the session table.
pub struct Session {
    pub user: AuthenticatedUser,
    pub token: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let AuthBearer(token) = AuthBearer::from_request_parts(parts, state).await?;
        let Extension(app) = Extension::<Arc<AppState>>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        let user = app.auth.validate_token(&token).await?;
        Ok(Session { user, token })
    }
}

pub fn auth_router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

pub fn wallet_router() -> Router {
    Router::new().route("/transactions", get(wallet_transactions))
}

pub fn games_router() -> Router {
    Router::new()
        .route("/", get(list_games))
        .route("/history", get(game_history))
        .route("/:id/spin", post(spin))
}

pub fn limits_router() -> Router {
    Router::new()
        .route("/", get(get_limits).put(update_limits))
        .route("/activity", get(limits_activity))
        .route("/self-exclusion", post(self_exclusion))
        .route("/report", get(limits_report))
}

pub fn deposits_router() -> Router {
    Router::new()
        .route("/", post(create_deposit))
        .route("/:txid", get(deposit_status))
        .route("/:txid/cancel", post(cancel_deposit))
}

pub fn withdrawals_router() -> Router {
    Router::new().route("/", post(request_withdrawal).get(my_withdrawals))
}

pub fn kyc_router() -> Router {
    Router::new()
        .route("/", post(submit_kyc).get(kyc_status))
        .route("/cep/:cep", get(lookup_cep))
}

pub fn admin_router() -> Router {
    Router::new()
        .route("/withdrawals", get(admin_withdrawals))
        .route("/withdrawals/:id/decision", post(admin_decide_withdrawal))
        .route("/kyc", get(admin_kyc_list))
        .route("/kyc/:id/review", post(admin_kyc_review))
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, body = RegisterResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "E-mail already registered")
    ),
    tag = "Auth"
)]
pub async fn register(
    Extension(app): Extension<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    let user_id = app.auth.register(&req.email, &req.password, &req.display_name).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user_id, message: "Conta criada com sucesso.".to_string() }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses((status = 200, body = LoginResponse), (status = 401, description = "Invalid credentials")),
    tag = "Auth"
)]
pub async fn login(
    Extension(app): Extension<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let token = app.auth.login(&req.email, &req.password).await?;
    Ok(Json(LoginResponse { token, expires_in: (SESSION_HOURS * 3600) as u64 }))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 200, body = MessageResponse)),
    security(("bearerAuth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
) -> Result<Json<MessageResponse>> {
    app.auth.logout(&session.token).await?;
    Ok(Json(MessageResponse { message: "Sessão encerrada.".to_string() }))
}

#[utoipa::path(
    get,
    path = "/api/profile",
    responses((status = 200, body = UserProfile)),
    security(("bearerAuth" = [])),
    tag = "Profile"
)]
pub async fn get_profile(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
) -> Result<Json<UserProfile>> {
    Ok(Json(app.users.profile(&session.user.user_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/wallet/transactions",
    params(HistoryQuery),
    responses((status = 200, body = [TransactionView])),
    security(("bearerAuth" = [])),
    tag = "Wallet"
)]
pub async fn wallet_transactions(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<TransactionView>>> {
    let entries = app.users.transactions(&session.user.user_id, query.limit).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

#[utoipa::path(get, path = "/api/games", responses((status = 200, body = [GameInfo])), tag = "Games")]
pub async fn list_games() -> Json<Vec<GameInfo>> {
    Json(catalog().to_vec())
}

#[utoipa::path(
    get,
    path = "/api/games/history",
    params(HistoryQuery),
    responses((status = 200, body = [GameSession])),
    security(("bearerAuth" = [])),
    tag = "Games"
)]
pub async fn game_history(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<GameSession>>> {
    let sessions = app.games.history(&session.user.user_id, query.limit.unwrap_or(50)).await?;
    Ok(Json(sessions))
}

#[utoipa::path(
    post,
    path = "/api/games/{id}/spin",
    params(("id" = String, Path, description = "Game id from the catalog")),
    request_body = SpinRequest,
    responses(
        (status = 200, body = SpinResponse),
        (status = 422, description = "Insufficient balance, limit reached or self-excluded")
    ),
    security(("bearerAuth" = [])),
    tag = "Games"
)]
pub async fn spin(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Path(game_id): Path<String>,
    Json(req): Json<SpinRequest>,
) -> Result<Json<SpinResponse>> {
    let bet_cents = to_cents(req.bet)?;
    let result = app.games.play(&session.user.user_id, &game_id, bet_cents).await?;
    Ok(Json(SpinResponse {
        session_id: result.session.id,
        game_id: result.session.game_id,
        symbols: result.session.symbols,
        bet: to_reais(result.session.bet_cents),
        win: to_reais(result.session.win_cents),
        multiplier: result.multiplier,
        balance: to_reais(result.balance_cents),
    }))
}

#[utoipa::path(
    get,
    path = "/api/limits",
    responses((status = 200, body = LimitsResponse)),
    security(("bearerAuth" = [])),
    tag = "Responsible gaming"
)]
pub async fn get_limits(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
) -> Result<Json<LimitsResponse>> {
    let limits = app.limits.limits(&session.user.user_id, Utc::now()).await?;
    Ok(Json(limits.into()))
}

#[utoipa::path(
    put,
    path = "/api/limits",
    request_body = LimitsPatch,
    responses((status = 200, body = LimitsResponse), (status = 400, description = "Invalid limits")),
    security(("bearerAuth" = [])),
    tag = "Responsible gaming"
)]
pub async fn update_limits(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Json(patch): Json<LimitsPatch>,
) -> Result<Json<LimitsResponse>> {
    let limits = app.limits.update_limits(&session.user.user_id, &patch, Utc::now()).await?;
    Ok(Json(limits.into()))
}

#[utoipa::path(
    get,
    path = "/api/limits/activity",
    responses((status = 200, body = ActivityResponse)),
    security(("bearerAuth" = [])),
    tag = "Responsible gaming"
)]
pub async fn limits_activity(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
) -> Result<Json<ActivityResponse>> {
    let activity = app.limits.activity(&session.user.user_id, Utc::now()).await?;
    Ok(Json(activity.into()))
}

#[utoipa::path(
    post,
    path = "/api/limits/self-exclusion",
    request_body = SelfExclusionRequest,
    responses((status = 200, body = SelfExclusionResponse), (status = 409, description = "Would shorten an active exclusion")),
    security(("bearerAuth" = [])),
    tag = "Responsible gaming"
)]
pub async fn self_exclusion(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Json(req): Json<SelfExclusionRequest>,
) -> Result<Json<SelfExclusionResponse>> {
    let until = app.limits.self_exclude(&session.user.user_id, req.days, Utc::now()).await?;
    Ok(Json(SelfExclusionResponse { self_excluded_until: until }))
}

#[utoipa::path(
    get,
    path = "/api/limits/report",
    params(ReportQuery),
    responses((status = 200, body = ReportResponse)),
    security(("bearerAuth" = [])),
    tag = "Responsible gaming"
)]
pub async fn limits_report(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Query(query): Query<ReportQuery>,
) -> Result<Json<ReportResponse>> {
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - Duration::days(30));
    let report = app.limits.report(&session.user.user_id, from, to).await?;
    Ok(Json(report.into()))
}

#[utoipa::path(
    post,
    path = "/api/deposits",
    request_body = CreateDepositRequest,
    responses(
        (status = 201, body = DepositView),
        (status = 403, description = "KYC not approved"),
        (status = 422, description = "Deposit limit reached")
    ),
    security(("bearerAuth" = [])),
    tag = "Payments"
)]
pub async fn create_deposit(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Json(req): Json<CreateDepositRequest>,
) -> Result<(StatusCode, Json<DepositView>)> {
    let charge = app
        .pix
        .create_deposit(&session.user.user_id, req.amount, req.description.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(DepositView::new(
            charge.request,
            Some(charge.qr_code_base64),
            Some(charge.remaining_limit_cents),
        )),
    ))
}

#[utoipa::path(
    get,
    path = "/api/deposits/{txid}",
    params(("txid" = String, Path, description = "Charge identifier")),
    responses((status = 200, body = DepositView), (status = 404, description = "Unknown charge")),
    security(("bearerAuth" = [])),
    tag = "Payments"
)]
pub async fn deposit_status(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Path(txid): Path<String>,
) -> Result<Json<DepositView>> {
    let request = app.pix.deposit_status(&session.user.user_id, &txid, Utc::now()).await?;
    Ok(Json(DepositView::new(request, None, None)))
}

#[utoipa::path(
    post,
    path = "/api/deposits/{txid}/cancel",
    params(("txid" = String, Path, description = "Charge identifier")),
    responses((status = 200, body = DepositView), (status = 409, description = "Already processed")),
    security(("bearerAuth" = [])),
    tag = "Payments"
)]
pub async fn cancel_deposit(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Path(txid): Path<String>,
) -> Result<Json<DepositView>> {
    let request = app.pix.cancel_deposit(&session.user.user_id, &txid).await?;
    Ok(Json(DepositView::new(request, None, None)))
}

#[utoipa::path(
    post,
    path = "/api/webhooks/pix",
    request_body = PixWebhook,
    params(("x-webhook-secret" = String, Header, description = "Shared secret configured for the gateway")),
    responses(
        (status = 200, body = WebhookResponse),
        (status = 401, description = "Bad secret"),
        (status = 409, description = "Charge expired")
    ),
    tag = "Payments"
)]
pub async fn pix_webhook(
    Extension(app): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(webhook): Json<PixWebhook>,
) -> Result<Json<WebhookResponse>> {
    let presented = headers.get(WEBHOOK_SECRET_HEADER).and_then(|v| v.to_str().ok());
    app.pix.verify_webhook_secret(presented)?;
    let credited = app.pix.confirm_deposit(&webhook, Utc::now()).await?;
    Ok(Json(WebhookResponse { credited }))
}

#[utoipa::path(
    post,
    path = "/api/withdrawals",
    request_body = CreateWithdrawalRequest,
    responses(
        (status = 201, body = WithdrawalView),
        (status = 403, description = "KYC not approved"),
        (status = 422, description = "Insufficient balance")
    ),
    security(("bearerAuth" = [])),
    tag = "Payments"
)]
pub async fn request_withdrawal(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Json(req): Json<CreateWithdrawalRequest>,
) -> Result<(StatusCode, Json<WithdrawalView>)> {
    let request = app
        .withdrawals
        .request_withdrawal(&session.user.user_id, req.amount, &req.pix_key)
        .await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

#[utoipa::path(
    get,
    path = "/api/withdrawals",
    responses((status = 200, body = [WithdrawalView])),
    security(("bearerAuth" = [])),
    tag = "Payments"
)]
pub async fn my_withdrawals(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
) -> Result<Json<Vec<WithdrawalView>>> {
    let requests = app.withdrawals.user_withdrawals(&session.user.user_id).await?;
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

/// Body-limit breaches keep their 413; anything else is a malformed form.
fn form_error(context: &str, e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Envio muito grande. Tamanho máximo: 5MB por arquivo.".to_string())
    } else {
        AppError::ValidationError(format!("{}: {}", context, e))
    }
}

#[derive(Default)]
struct KycForm {
    text: HashMap<String, String>,
    files: HashMap<String, UploadedDocument>,
}

impl KycForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = KycForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| form_error("Formulário inválido", e))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match name.as_str() {
                "document_front" | "document_back" | "selfie" => {
                    let content_type = field.content_type().unwrap_or_default().to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| form_error("Falha ao ler arquivo", e))?;
                    form.files.insert(name, UploadedDocument { bytes: bytes.to_vec(), content_type });
                }
                _ => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| form_error("Campo inválido", e))?;
                    form.text.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    fn text(&self, name: &str) -> String {
        self.text.get(name).cloned().unwrap_or_default()
    }

    fn file(&mut self, name: &str, label: &str) -> Result<UploadedDocument> {
        self.files
            .remove(name)
            .ok_or_else(|| AppError::ValidationError(format!("Envie o arquivo: {}.", label)))
    }

    fn into_parts(mut self) -> Result<(KycApplication, KycDocuments)> {
        let birth_date = NaiveDate::parse_from_str(self.text("birth_date").trim(), "%Y-%m-%d")
            .map_err(|_| AppError::ValidationError("Data de nascimento inválida.".to_string()))?;

        let documents = KycDocuments {
            front: self.file("document_front", "frente do documento")?,
            back: self.file("document_back", "verso do documento")?,
            selfie: self.file("selfie", "selfie")?,
        };
        let complement = self.text("complement");
        let application = KycApplication {
            cpf: self.text("cpf"),
            full_name: self.text("full_name"),
            birth_date,
            phone: self.text("phone"),
            address: Address {
                cep: self.text("cep"),
                street: self.text("street"),
                number: self.text("number"),
                complement: Some(complement),
                neighborhood: self.text("neighborhood"),
                city: self.text("city"),
                state: self.text("state"),
            },
        };
        Ok((application, documents))
    }
}

#[utoipa::path(
    post,
    path = "/api/kyc",
    request_body(content = KycUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, body = KycSubmission),
        (status = 400, description = "Invalid data or document"),
        (status = 409, description = "Verification already pending or approved"),
        (status = 413, description = "Upload exceeds the body limit")
    ),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn submit_kyc(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    multipart: Multipart,
) -> Result<(StatusCode, Json<KycSubmission>)> {
    let (application, documents) = KycForm::read(multipart).await?.into_parts()?;
    let submission = app.kyc.submit(&session.user.user_id, application, documents).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

#[utoipa::path(
    get,
    path = "/api/kyc",
    responses((status = 200, body = KycStatusResponse)),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn kyc_status(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
) -> Result<Json<KycStatusResponse>> {
    let submission = app.kyc.status(&session.user.user_id).await?;
    let status = submission.as_ref().map_or(KycStatus::NotSubmitted, |s| s.status);
    Ok(Json(KycStatusResponse { status, submission }))
}

#[utoipa::path(
    get,
    path = "/api/kyc/cep/{cep}",
    params(("cep" = String, Path, description = "Eight-digit CEP, with or without hyphen")),
    responses((status = 200, body = CepAddress), (status = 404, description = "Unknown CEP")),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn lookup_cep(
    Extension(app): Extension<Arc<AppState>>,
    _session: Session,
    Path(cep): Path<String>,
) -> Result<Json<CepAddress>> {
    Ok(Json(app.postal.lookup(&cep).await?))
}

#[utoipa::path(
    get,
    path = "/api/admin/withdrawals",
    responses((status = 200, body = [WithdrawalView]), (status = 403, description = "Not an administrator")),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn admin_withdrawals(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
) -> Result<Json<Vec<WithdrawalView>>> {
    app.auth.require_admin(&session.user).await?;
    let requests = app.withdrawals.pending_withdrawals().await?;
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/admin/withdrawals/{id}/decision",
    params(("id" = Uuid, Path, description = "Withdrawal request id")),
    request_body = WithdrawalDecisionRequest,
    responses(
        (status = 200, body = WithdrawalView),
        (status = 404, description = "Unknown request"),
        (status = 409, description = "Already decided")
    ),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn admin_decide_withdrawal(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(req): Json<WithdrawalDecisionRequest>,
) -> Result<Json<WithdrawalView>> {
    let admin = app.auth.require_admin(&session.user).await?;
    let request = app.withdrawals.decide_withdrawal(&admin.id, &id, req.approve).await?;
    Ok(Json(request.into()))
}

#[utoipa::path(
    get,
    path = "/api/admin/kyc",
    params(KycListQuery),
    responses((status = 200, body = [KycSubmission]), (status = 403, description = "Not an administrator")),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn admin_kyc_list(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Query(query): Query<KycListQuery>,
) -> Result<Json<Vec<KycSubmission>>> {
    app.auth.require_admin(&session.user).await?;
    Ok(Json(app.kyc.list(query.status).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/kyc/{id}/review",
    params(("id" = Uuid, Path, description = "KYC submission id")),
    request_body = KycReviewRequest,
    responses(
        (status = 200, body = KycSubmission),
        (status = 400, description = "Rejection without reason"),
        (status = 409, description = "Already reviewed")
    ),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn admin_kyc_review(
    Extension(app): Extension<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(req): Json<KycReviewRequest>,
) -> Result<Json<KycSubmission>> {
    let admin = app.auth.require_admin(&session.user).await?;
    let submission = app.kyc.review(&admin.id, &id, req.approve, req.reason.as_deref()).await?;
    info!(action = "admin_kyc_review", admin_id = %admin.id, submission_id = %id);
    Ok(Json(submission))
}
