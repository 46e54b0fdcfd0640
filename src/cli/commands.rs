use crate::cli::{OperatorCommand, CLI};
use crate::config::Config;
use crate::errors::{AppError, Result};
use crate::models::payment_request::WithdrawalRequest;
use crate::state::AppState;
use crate::utils::money::format_brl;
use crate::utils::validation::{format_cpf, validate_cpf};
use colored::Colorize;
use uuid::Uuid;

/// Opens the configured database and runs one operator command against it.
pub async fn handle_command(command: OperatorCommand, config: &Config) -> Result<()> {
    let state = AppState::from_config(config).await?;
    CLI::print_header();
    execute(command, &state).await
}

pub async fn execute(command: OperatorCommand, state: &AppState) -> Result<()> {
    match command {
        OperatorCommand::PromoteAdmin { email } => {
            state.users.promote_admin(&email).await?;
            CLI::print_success(&format!("{} agora é administrador.", email.trim().to_lowercase()));
        }
        OperatorCommand::Withdrawals => {
            let pending = state.withdrawals.pending_withdrawals().await?;
            if pending.is_empty() {
                println!("{}", "Nenhum saque pendente.".yellow());
            } else {
                println!("{}", "💸 Saques pendentes:".cyan().bold());
                for (i, request) in pending.iter().enumerate() {
                    print_withdrawal(i + 1, request);
                }
            }
        }
        OperatorCommand::ApproveWithdrawal { id, admin_email } => {
            decide(state, &id, &admin_email, true).await?;
        }
        OperatorCommand::RejectWithdrawal { id, admin_email } => {
            decide(state, &id, &admin_email, false).await?;
        }
        OperatorCommand::CheckCpf { cpf } => check_cpf(&cpf),
    }
    Ok(())
}

pub fn check_cpf(cpf: &str) {
    if validate_cpf(cpf) {
        CLI::print_success(&format!("CPF {} é válido.", format_cpf(cpf)));
    } else {
        CLI::print_error(&format!("CPF {} é inválido.", cpf.trim()));
    }
}

async fn decide(state: &AppState, id: &str, admin_email: &str, approve: bool) -> Result<()> {
    let request_id = Uuid::parse_str(id.trim())
        .map_err(|_| AppError::ValidationError(format!("Invalid withdrawal id: {}", id)))?;
    let admin = state
        .db
        .get_user_by_email(&admin_email.trim().to_lowercase())
        .await?
        .filter(|user| user.is_admin)
        .ok_or_else(|| AppError::Forbidden(format!("{} is not an administrator", admin_email)))?;

    let request = state.withdrawals.decide_withdrawal(&admin.id, &request_id, approve).await?;
    if approve {
        CLI::print_success(&format!(
            "Saque de {} aprovado para a chave {}.",
            format_brl(request.amount_cents),
            request.pix_key
        ));
    } else {
        CLI::print_info(&format!(
            "Saque de {} rejeitado; saldo devolvido ao jogador.",
            format_brl(request.amount_cents)
        ));
    }
    Ok(())
}

fn print_withdrawal(position: usize, request: &WithdrawalRequest) {
    println!("{}. {}", position, request.id.to_string().yellow());
    println!("   Jogador: {}", request.user_id);
    println!("   Valor: {}", format_brl(request.amount_cents).green().bold());
    println!("   Chave PIX: {}", request.pix_key.cyan());
    println!("   Solicitado em: {}", request.requested_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
}
