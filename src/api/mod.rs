use crate::config::Config;
use crate::errors::{AppError, Result};
use crate::services::document_store::MAX_DOCUMENT_BYTES;
use crate::state::AppState;
use crate::utils::middleware::{rate_limiter_middleware, request_id_middleware, RateLimiter};
use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

mod routes;
mod types;

pub use routes::WEBHOOK_SECRET_HEADER;

// Three documents plus the text fields.
const KYC_BODY_LIMIT: usize = 3 * MAX_DOCUMENT_BYTES + 64 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::register,
        routes::login,
        routes::logout,
        routes::get_profile,
        routes::wallet_transactions,
        routes::list_games,
        routes::game_history,
        routes::spin,
        routes::get_limits,
        routes::update_limits,
        routes::limits_activity,
        routes::self_exclusion,
        routes::limits_report,
        routes::create_deposit,
        routes::deposit_status,
        routes::cancel_deposit,
        routes::pix_webhook,
        routes::request_withdrawal,
        routes::my_withdrawals,
        routes::submit_kyc,
        routes::kyc_status,
        routes::lookup_cep,
        routes::admin_withdrawals,
        routes::admin_decide_withdrawal,
        routes::admin_kyc_list,
        routes::admin_kyc_review,
    ),
    components(
        schemas(
            types::RegisterRequest,
            types::RegisterResponse,
            types::LoginRequest,
            types::LoginResponse,
            types::MessageResponse,
            types::TransactionView,
            types::SpinRequest,
            types::SpinResponse,
            types::LimitsView,
            types::PendingLimitsView,
            types::LimitsResponse,
            types::ActivityResponse,
            types::SelfExclusionRequest,
            types::SelfExclusionResponse,
            types::ReportResponse,
            types::CreateDepositRequest,
            types::DepositView,
            types::WebhookResponse,
            types::CreateWithdrawalRequest,
            types::WithdrawalView,
            types::WithdrawalDecisionRequest,
            types::KycReviewRequest,
            types::KycStatusResponse,
            types::KycUploadForm,
            crate::models::user::UserProfile,
            crate::models::user::KycStatus,
            crate::models::transaction::TransactionType,
            crate::models::transaction::TransactionStatus,
            crate::models::payment_request::RequestStatus,
            crate::models::game::GameSession,
            crate::models::kyc::Address,
            crate::models::kyc::KycSubmission,
            crate::models::limits::LimitsPatch,
            crate::services::games::GameInfo,
            crate::services::games::SlotKind,
            crate::services::pix_service::PixWebhook,
            crate::services::postal_code::CepAddress,
        )
    ),
    tags(
        (name = "Auth", description = "Registration and sessions"),
        (name = "Profile", description = "Player profile and balance"),
        (name = "Wallet", description = "Ledger history. Amounts are in reais."),
        (name = "Games", description = "Slot catalog and spins"),
        (name = "Responsible gaming", description = "Limits, activity, self-exclusion and reports"),
        (name = "Payments", description = "PIX deposits, gateway webhook and withdrawals"),
        (name = "KYC", description = "Identity verification"),
        (name = "Admin", description = "Back-office review of withdrawals and KYC")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Full application router. The rate limiter only acts on requests that carry
/// `ConnectInfo`, i.e. those accepted by [`start_http_server`].
pub fn build_router(state: Arc<AppState>, limiter: Arc<RateLimiter>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .nest("/api/auth", routes::auth_router())
        .route("/api/profile", get(routes::get_profile))
        .nest("/api/wallet", routes::wallet_router())
        .nest("/api/games", routes::games_router())
        .nest("/api/limits", routes::limits_router())
        .nest("/api/deposits", routes::deposits_router())
        .route("/api/webhooks/pix", post(routes::pix_webhook))
        .nest("/api/withdrawals", routes::withdrawals_router())
        .nest(
            "/api/kyc",
            routes::kyc_router().layer(DefaultBodyLimit::max(KYC_BODY_LIMIT)),
        )
        .nest("/api/admin", routes::admin_router())
        .route("/health", get(health_check))
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
        .layer(axum::middleware::from_fn(rate_limiter_middleware))
        .layer(Extension(limiter))
        .layer(Extension(state))
        .layer(cors)
        .layer(axum::middleware::from_fn(request_id_middleware))
}

/// Main entry point for the LuckyYBet API server.
pub async fn start_http_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(&config).await?);
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_sec, Duration::from_secs(1)));

    let pruner = limiter.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            pruner.prune();
        }
    });

    let app = build_router(state, limiter);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(action = "server_started", addr = %addr, docs = "/api/docs");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| AppError::InternalError(format!("Server error: {}", e)))
}

async fn health_check() -> impl IntoResponse {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::SqliteDatabase;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<AppState>) {
        app_with(Config::for_tests()).await
    }

    async fn app_with(config: Config) -> (Router, Arc<AppState>) {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let state = Arc::new(AppState::new(db, &config).unwrap());
        let limiter = Arc::new(RateLimiter::new(1000, Duration::from_secs(1)));
        (build_router(state.clone(), limiter), state)
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    async fn signed_in(router: &Router, email: &str) -> String {
        let (status, _) = call(
            router,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({ "email": email, "password": "Senha@123", "display_name": "Jogador" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(
            router,
            json_request("POST", "/api/auth/login", None, json!({ "email": email, "password": "Senha@123" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app().await;
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_profile_requires_session() {
        let (router, _) = app().await;
        let request = Request::builder().uri("/api/profile").body(Body::empty()).unwrap();
        let (status, body) = call(&router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_register_login_profile_logout() {
        let (router, _) = app().await;
        let token = signed_in(&router, "jogador@exemplo.com").await;

        let (status, profile) = call(&router, get_request("/api/profile", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["email"], "jogador@exemplo.com");
        assert_eq!(profile["kyc_status"], "not_submitted");

        let (status, _) = call(&router, json_request("POST", "/api/auth/logout", Some(&token), json!({}))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&router, get_request("/api/profile", &token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_spin_without_balance_is_refused() {
        let (router, _) = app().await;
        let token = signed_in(&router, "jogador@exemplo.com").await;

        let (status, games) = call(&router, get_request("/api/games", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(games.as_array().unwrap().iter().any(|g| g["id"] == "fortune-tiger"));

        let (status, body) = call(
            &router,
            json_request("POST", "/api/games/fortune-tiger/spin", Some(&token), json!({ "bet": 5.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "Saldo insuficiente. Faça um depósito.");
    }

    #[tokio::test]
    async fn test_admin_routes_need_admin_flag() {
        let (router, state) = app().await;
        let token = signed_in(&router, "operador@exemplo.com").await;

        let (status, _) = call(&router, get_request("/api/admin/withdrawals", &token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        state.users.promote_admin("operador@exemplo.com").await.unwrap();
        let (status, body) = call(&router, get_request("/api/admin/withdrawals", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_rejects_wrong_secret() {
        let (router, _) = app().await;
        let mut request = json_request(
            "POST",
            "/api/webhooks/pix",
            None,
            json!({ "txid": "TXN123", "status": "approved" }),
        );
        request.headers_mut().insert(WEBHOOK_SECRET_HEADER, "wrong".parse().unwrap());
        let (status, _) = call(&router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_limits_roundtrip_over_http() {
        let (router, _) = app().await;
        let token = signed_in(&router, "jogador@exemplo.com").await;

        let (status, body) = call(
            &router,
            json_request("PUT", "/api/limits", Some(&token), json!({ "daily_bet": 50.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["limits"]["daily_bet"], 50.0);
        assert!(body["pending"].is_null());

        let (status, activity) = call(&router, get_request("/api/limits/activity", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(activity["bet_today"], 0.0);
    }

    const BOUNDARY: &str = "luckyybet-form-boundary";

    fn kyc_fields() -> Vec<(&'static str, &'static str)> {
        vec![
            ("cpf", "529.982.247-25"),
            ("full_name", "Ana Souza"),
            ("birth_date", "1990-05-20"),
            ("phone", "11987654321"),
            ("cep", "01310-100"),
            ("street", "Avenida Paulista"),
            ("number", "1000"),
            ("complement", ""),
            ("neighborhood", "Bela Vista"),
            ("city", "São Paulo"),
            ("state", "SP"),
        ]
    }

    fn png(len: usize) -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.resize(len.max(bytes.len()), 7);
        bytes
    }

    fn kyc_request(token: &str, fields: &[(&str, &str)], files: &[(&str, Vec<u8>)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                    .as_bytes(),
            );
        }
        for (name, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\n\
                     Content-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/kyc")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn all_documents(len: usize) -> Vec<(&'static str, Vec<u8>)> {
        vec![("document_front", png(len)), ("document_back", png(len)), ("selfie", png(len))]
    }

    fn docs_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::for_tests();
        config.document_root = dir.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_kyc_multipart_submission() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app_with(docs_config(&dir)).await;
        let token = signed_in(&router, "jogador@exemplo.com").await;

        let (status, body) = call(&router, kyc_request(&token, &kyc_fields(), &all_documents(64))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["cpf"], "52998224725");
        assert_eq!(body["address"]["cep"], "01310100");
        assert!(body["address"]["complement"].is_null());
        assert!(body["document_front_url"]
            .as_str()
            .unwrap()
            .starts_with("http://localhost/files/kyc-documents/documentos/"));
        assert!(body["selfie_url"]
            .as_str()
            .unwrap()
            .starts_with("http://localhost/files/kyc-documents/selfies/"));
        assert_eq!(std::fs::read_dir(dir.path().join("kyc-documents/documentos")).unwrap().count(), 2);

        let (status, kyc) = call(&router, get_request("/api/kyc", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(kyc["status"], "pending");
        let (_, profile) = call(&router, get_request("/api/profile", &token)).await;
        assert_eq!(profile["kyc_status"], "pending");

        let (status, _) = call(&router, kyc_request(&token, &kyc_fields(), &all_documents(64))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_kyc_missing_document_part() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app_with(docs_config(&dir)).await;
        let token = signed_in(&router, "jogador@exemplo.com").await;

        let files = vec![("document_front", png(64)), ("document_back", png(64))];
        let (status, body) = call(&router, kyc_request(&token, &kyc_fields(), &files)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Envie o arquivo: selfie.");
    }

    #[tokio::test]
    async fn test_kyc_unparsable_birth_date() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app_with(docs_config(&dir)).await;
        let token = signed_in(&router, "jogador@exemplo.com").await;

        let mut fields = kyc_fields();
        fields.retain(|(name, _)| *name != "birth_date");
        fields.push(("birth_date", "20/05/1990"));
        let (status, body) = call(&router, kyc_request(&token, &fields, &all_documents(64))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Data de nascimento inválida.");
    }

    #[tokio::test]
    async fn test_kyc_document_over_five_megabytes() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app_with(docs_config(&dir)).await;
        let token = signed_in(&router, "jogador@exemplo.com").await;

        let files = vec![
            ("document_front", png(MAX_DOCUMENT_BYTES + 1)),
            ("document_back", png(64)),
            ("selfie", png(64)),
        ];
        let (status, body) = call(&router, kyc_request(&token, &kyc_fields(), &files)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Arquivo muito grande. Tamanho máximo: 5MB.");
    }

    #[tokio::test]
    async fn test_kyc_body_over_limit() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app_with(docs_config(&dir)).await;
        let token = signed_in(&router, "jogador@exemplo.com").await;

        let files = vec![("document_front", png(KYC_BODY_LIMIT + 1))];
        let (status, body) = call(&router, kyc_request(&token, &kyc_fields(), &files)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].is_string());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    fn webhook_request(txid: &str) -> Request<Body> {
        let mut request = json_request(
            "POST",
            "/api/webhooks/pix",
            None,
            json!({ "txid": txid, "status": "approved", "amount": 25.0 }),
        );
        request.headers_mut().insert(WEBHOOK_SECRET_HEADER, "webhook-secret".parse().unwrap());
        request
    }

    #[tokio::test]
    async fn test_deposit_confirmed_once_by_webhook() {
        let dir = tempfile::tempdir().unwrap();
        let (router, state) = app_with(docs_config(&dir)).await;
        let token = signed_in(&router, "jogador@exemplo.com").await;
        let admin = signed_in(&router, "operador@exemplo.com").await;
        state.users.promote_admin("operador@exemplo.com").await.unwrap();

        let (status, submission) = call(&router, kyc_request(&token, &kyc_fields(), &all_documents(64))).await;
        assert_eq!(status, StatusCode::CREATED);
        let review = format!("/api/admin/kyc/{}/review", submission["id"].as_str().unwrap());
        let (status, _) = call(&router, json_request("POST", &review, Some(&admin), json!({ "approve": true }))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, charge) = call(
            &router,
            json_request("POST", "/api/deposits", Some(&token), json!({ "amount": 25.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(charge["status"], "pending");
        assert_eq!(charge["remaining_deposit_limit"], 475.0);
        let txid = charge["txid"].as_str().unwrap().to_string();

        let (status, body) = call(&router, webhook_request(&txid)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["credited"], true);
        let (status, body) = call(&router, webhook_request(&txid)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["credited"], false);

        let (_, profile) = call(&router, get_request("/api/profile", &token)).await;
        assert_eq!(profile["balance"], 25.0);
        let (_, deposit) = call(&router, get_request(&format!("/api/deposits/{}", txid), &token)).await;
        assert_eq!(deposit["status"], "approved");
        assert!(deposit["remaining_deposit_limit"].is_null());
    }
}
