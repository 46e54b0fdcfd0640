use clap::Parser;
use colored::Colorize;
use luckyybet::api;
use luckyybet::cli::{self, Cli, Command, OperatorCommand};
use luckyybet::config::Config;
use luckyybet::errors::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().flatten_event(true))
        .init();
}

async fn run(command: Command) -> Result<()> {
    match command {
        // Pure digit check; needs no configuration.
        Command::Operator(OperatorCommand::CheckCpf { cpf }) => {
            cli::check_cpf(&cpf);
            Ok(())
        }
        Command::Serve => api::start_http_server(Config::from_env()?).await,
        Command::Operator(command) => cli::handle_command(command, &Config::from_env()?).await,
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let command = Cli::parse().command.unwrap_or(Command::Serve);
    if let Err(e) = run(command).await {
        eprintln!("{}", format!("Application error: {}", e).red());
        std::process::exit(1);
    }
}
