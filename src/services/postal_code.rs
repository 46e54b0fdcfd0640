use crate::errors::{AppError, Result};
use crate::utils::validation::clean_cep;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use utoipa::ToSchema;

/// Address fields a CEP resolves to; number and complement stay with the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CepAddress {
    pub cep: String,
    pub street: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct ViaCepResponse {
    #[serde(default)]
    erro: Option<serde_json::Value>,
    #[serde(default)]
    logradouro: String,
    #[serde(default)]
    bairro: String,
    #[serde(default)]
    localidade: String,
    #[serde(default)]
    uf: String,
}

pub struct PostalCodeService {
    client: reqwest::Client,
    base_url: String,
}

impl PostalCodeService {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn lookup(&self, cep: &str) -> Result<CepAddress> {
        let cep = clean_cep(cep)?;
        let url = format!("{}/ws/{}/json/", self.base_url, cep);

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(action = "cep_lookup_failed", cep = %cep, error = %e);
            AppError::NetworkError(e.to_string())
        })?;
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            return Err(AppError::ValidationError("CEP inválido.".to_string()));
        }
        if !response.status().is_success() {
            return Err(AppError::NetworkError(format!("CEP service returned {}", response.status())));
        }

        let body: ViaCepResponse = response.json().await?;
        let address = parse_response(&cep, body)?;
        info!(action = "cep_lookup", cep = %cep, city = %address.city);
        Ok(address)
    }
}

fn parse_response(cep: &str, body: ViaCepResponse) -> Result<CepAddress> {
    // The service answers 200 with `"erro": true` (or "true") for unknown codes.
    let not_found = match &body.erro {
        Some(serde_json::Value::Bool(flag)) => *flag,
        Some(serde_json::Value::String(flag)) => flag == "true",
        _ => false,
    };
    if not_found {
        return Err(AppError::NotFound("CEP não encontrado.".to_string()));
    }

    Ok(CepAddress {
        cep: cep.to_string(),
        street: body.logradouro,
        neighborhood: body.bairro,
        city: body.localidade,
        state: body.uf,
    })
}
