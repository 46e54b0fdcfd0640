mod commands;
pub use commands::*;

use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Debug, Parser)]
#[command(name = "luckyybet", version, about = "LuckyYBet betting platform backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP API (default)
    Serve,
    #[command(flatten)]
    Operator(OperatorCommand),
}

/// Back-office commands run against the configured database.
#[derive(Debug, Subcommand)]
pub enum OperatorCommand {
    /// Grant the administrator flag to a registered account
    PromoteAdmin { email: String },
    /// List withdrawal requests waiting for a decision
    Withdrawals,
    /// Pay out a pending withdrawal
    ApproveWithdrawal {
        id: String,
        /// E-mail of the administrator recorded as the decider
        #[arg(long = "admin")]
        admin_email: String,
    },
    /// Refuse a pending withdrawal and refund the player
    RejectWithdrawal {
        id: String,
        #[arg(long = "admin")]
        admin_email: String,
    },
    /// Check a CPF's digits
    CheckCpf { cpf: String },
}

pub struct CLI;

impl CLI {
    pub fn print_header() {
        println!("{}", "=".repeat(50).bright_blue());
        println!("{}", "        🎰 LuckyYBet - Operator Console        ".bright_yellow().bold());
        println!("{}", "=".repeat(50).bright_blue());
        println!();
    }

    pub fn print_success(message: &str) {
        println!("{} {}", "✅".green(), message.green());
    }

    pub fn print_error(message: &str) {
        println!("{} {}", "❌".red(), message.red());
    }

    pub fn print_info(message: &str) {
        println!("{} {}", "ℹ️".blue(), message.blue());
    }
}
