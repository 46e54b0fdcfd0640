use crate::errors::{AppError, Result};

/// Converts a reais amount coming from a JSON body into centavos.
pub fn to_cents(reais: f64) -> Result<i64> {
    if !reais.is_finite() {
        return Err(AppError::ValidationError("Valor inválido.".to_string()));
    }
    let cents = (reais * 100.0).round();
    if cents <= 0.0 {
        return Err(AppError::ValidationError(
            "O valor deve ser maior que zero.".to_string(),
        ));
    }
    if cents > i64::MAX as f64 / 2.0 {
        return Err(AppError::ValidationError("Valor muito alto.".to_string()));
    }
    Ok(cents as i64)
}

pub fn to_reais(cents: i64) -> f64 {
    cents as f64 / 100.0
}

pub fn format_brl(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}R$ {}.{:02}", sign, abs / 100, abs % 100)
}
