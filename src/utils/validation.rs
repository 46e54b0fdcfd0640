use crate::errors::{AppError, Result};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const ADULT_AGE: i32 = 18;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email pattern")
});

pub struct Validator;

impl Validator {
    pub fn validate_email(email: &str) -> Result<()> {
        if email.len() > 254 || !EMAIL_RE.is_match(email) {
            return Err(AppError::ValidationError("E-mail inválido.".to_string()));
        }

        Ok(())
    }

    pub fn validate_password(password: &str) -> Result<()> {
        if password.chars().count() < 8 {
            return Err(AppError::ValidationError(
                "A senha deve ter pelo menos 8 caracteres.".to_string(),
            ));
        }

        if password.chars().count() > 128 {
            return Err(AppError::ValidationError(
                "A senha deve ter no máximo 128 caracteres.".to_string(),
            ));
        }

        let has_letter = password.chars().any(|c| c.is_alphabetic());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        if !has_letter || !has_digit {
            return Err(AppError::ValidationError(
                "A senha deve conter letras e números.".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_display_name(name: &str) -> Result<()> {
        let len = name.trim().chars().count();
        if !(2..=60).contains(&len) {
            return Err(AppError::ValidationError(
                "O nome deve ter entre 2 e 60 caracteres.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_cpf(cpf: &str) -> Result<()> {
        if !validate_cpf(cpf) {
            return Err(AppError::ValidationError(
                "CPF inválido. Verifique o número digitado.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_adult(birth_date: NaiveDate, today: NaiveDate) -> Result<()> {
        if !is_adult(birth_date, today) {
            return Err(AppError::ValidationError(
                "Você precisa ter 18 anos ou mais para se cadastrar.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_required(field: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(AppError::ValidationError(format!(
                "Por favor, preencha o campo obrigatório: {}.",
                field
            )));
        }
        Ok(())
    }
}

/// Strips everything that is not an ASCII digit.
pub fn clean_cpf(cpf: &str) -> String {
    cpf.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Formats 11 digits as `000.000.000-00`; other lengths are returned cleaned.
pub fn format_cpf(cpf: &str) -> String {
    let digits = clean_cpf(cpf);
    if digits.len() != 11 {
        return digits;
    }
    format!(
        "{}.{}.{}-{}",
        &digits[0..3],
        &digits[3..6],
        &digits[6..9],
        &digits[9..11]
    )
}

fn cpf_check_digit(digits: &[u32], first_weight: u32) -> u32 {
    let sum: u32 = digits
        .iter()
        .zip((2..=first_weight).rev())
        .map(|(d, w)| d * w)
        .sum();
    let remainder = (sum * 10) % 11;
    if remainder == 10 {
        0
    } else {
        remainder
    }
}

/// Checks a CPF (formatted or not) against both modulo-11 check digits.
/// Strings made of one repeated digit pass the arithmetic but are never issued.
pub fn validate_cpf(cpf: &str) -> bool {
    let cleaned = clean_cpf(cpf);
    if cleaned.len() != 11 {
        return false;
    }

    let digits: Vec<u32> = cleaned.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    cpf_check_digit(&digits[..9], 10) == digits[9] && cpf_check_digit(&digits[..10], 11) == digits[10]
}

/// Whole years between `birth_date` and `today`.
pub fn age_on(birth_date: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birth_date.year();
    if (today.month(), today.day()) < (birth_date.month(), birth_date.day()) {
        age -= 1;
    }
    age
}

pub fn is_adult(birth_date: NaiveDate, today: NaiveDate) -> bool {
    age_on(birth_date, today) >= ADULT_AGE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PixKeyKind {
    Email,
    Phone,
    Cpf,
    Random,
}

/// Recognises the PIX key types a player can withdraw to.
pub fn classify_pix_key(key: &str) -> Result<PixKeyKind> {
    let key = key.trim();
    let invalid = || AppError::ValidationError("Chave PIX inválida.".to_string());

    if key.contains('@') {
        Validator::validate_email(key).map_err(|_| invalid())?;
        return Ok(PixKeyKind::Email);
    }

    if let Some(national) = key.strip_prefix("+55") {
        let ok = national.chars().all(|c| c.is_ascii_digit()) && (10..=11).contains(&national.len());
        return if ok { Ok(PixKeyKind::Phone) } else { Err(invalid()) };
    }

    if uuid::Uuid::parse_str(key).is_ok() {
        return Ok(PixKeyKind::Random);
    }

    if validate_cpf(key) {
        return Ok(PixKeyKind::Cpf);
    }

    Err(invalid())
}

/// Normalises a Brazilian postal code (CEP) to its 8 digits.
pub fn clean_cep(cep: &str) -> Result<String> {
    let digits: String = cep.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 8 || cep.chars().any(|c| !c.is_ascii_digit() && c != '-' && c != '.' && c != ' ') {
        return Err(AppError::ValidationError("CEP inválido.".to_string()));
    }
    Ok(digits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // Textbook formulation: remainder < 2 gives 0, otherwise 11 - remainder.
    fn reference_check_digits(prefix: &[u32]) -> (u32, u32) {
        let dv = |ds: &[u32]| {
            let n = ds.len() as u32 + 1;
            let sum: u32 = ds.iter().enumerate().map(|(i, d)| d * (n - i as u32)).sum();
            let r = sum % 11;
            if r < 2 { 0 } else { 11 - r }
        };
        let first = dv(prefix);
        let mut with_first = prefix.to_vec();
        with_first.push(first);
        (first, dv(&with_first))
    }

    #[test]
    fn test_known_valid_cpfs() {
        assert!(validate_cpf("529.982.247-25"));
        assert!(validate_cpf("52998224725"));
        assert!(validate_cpf("111.444.777-35"));
    }

    #[test]
    fn test_invalid_cpfs() {
        assert!(!validate_cpf("529.982.247-26"));
        assert!(!validate_cpf("5299822472"));
        assert!(!validate_cpf("529982247250"));
        assert!(!validate_cpf(""));
        assert!(!validate_cpf("abc"));
    }

    #[test]
    fn test_repeated_digit_cpfs_rejected() {
        for d in 0..=9 {
            let cpf: String = std::iter::repeat(char::from_digit(d, 10).unwrap()).take(11).collect();
            assert!(!validate_cpf(&cpf), "{} must be invalid", cpf);
        }
    }

    #[test]
    fn test_cpf_accepts_exactly_matching_check_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2000 {
            let prefix: Vec<u32> = (0..9).map(|_| rng.gen_range(0..10)).collect();
            if prefix.iter().all(|d| *d == prefix[0]) {
                continue;
            }
            let (dv1, dv2) = reference_check_digits(&prefix);
            let base: String = prefix.iter().map(|d| char::from_digit(*d, 10).unwrap()).collect();

            for a in 0..10u32 {
                for b in 0..10u32 {
                    let cpf = format!("{}{}{}", base, a, b);
                    assert_eq!(validate_cpf(&cpf), a == dv1 && b == dv2, "cpf {}", cpf);
                }
            }
        }
    }

    #[test]
    fn test_format_and_clean_cpf() {
        assert_eq!(format_cpf("52998224725"), "529.982.247-25");
        assert_eq!(clean_cpf("529.982.247-25"), "52998224725");
    }

    #[test]
    fn test_adult_on_exact_birthday() {
        let today = date(2026, 10, 16);
        assert!(is_adult(date(2008, 10, 16), today));
        assert!(!is_adult(date(2008, 10, 17), today));
        assert!(is_adult(date(1990, 1, 1), today));
    }

    #[test]
    fn test_adult_leap_day_birth() {
        // Born on Feb 29: the birthday counts from March 1 in common years.
        assert!(!is_adult(date(2008, 2, 29), date(2026, 2, 28)));
        assert!(is_adult(date(2008, 2, 29), date(2026, 3, 1)));
    }

    #[test]
    fn test_classify_pix_key() {
        assert_eq!(classify_pix_key("jogador@exemplo.com").unwrap(), PixKeyKind::Email);
        assert_eq!(classify_pix_key("+5511987654321").unwrap(), PixKeyKind::Phone);
        assert_eq!(classify_pix_key("529.982.247-25").unwrap(), PixKeyKind::Cpf);
        assert_eq!(
            classify_pix_key("123e4567-e89b-12d3-a456-426614174000").unwrap(),
            PixKeyKind::Random
        );
        assert!(classify_pix_key("+551198").is_err());
        assert!(classify_pix_key("11111111111").is_err());
        assert!(classify_pix_key("qualquer coisa").is_err());
    }

    #[test]
    fn test_clean_cep() {
        assert_eq!(clean_cep("01310-100").unwrap(), "01310100");
        assert!(clean_cep("0131010").is_err());
        assert!(clean_cep("01310-10a").is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(Validator::validate_password("sorte2024").is_ok());
        assert!(Validator::validate_password("curta1").is_err());
        assert!(Validator::validate_password("semnumeros").is_err());
    }
}
