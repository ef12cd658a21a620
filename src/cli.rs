// Outil d'injection : envoie un message de données à un nœud en cours d'exécution

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use log::info;

use routing_sim::error::{AppError, Result};
use routing_sim::init::init_logging_and_env;
use routing_sim::net_utils::send_message;
use routing_sim::read_config::read_address_book;
use routing_sim::types::Message;

const USAGE: &str = "Usage: send <from> <to> <message...> [--names PATH] [--proto NAME] [--ttl N]";

#[derive(Debug, PartialEq)]
struct SendArgs {
    from: String,
    to: String,
    payload: String,
    names: PathBuf,
    proto: String,
    ttl: u32,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<SendArgs> {
    let mut args = args.into_iter();
    let mut positional = Vec::new();
    let mut names = PathBuf::from("config/names.json");
    let mut proto = "flooding".to_string();
    let mut ttl = 10;

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next().ok_or_else(|| AppError::ConfigError(format!("Missing value for {}", flag)))
        };
        match arg.as_str() {
            "--names" => names = PathBuf::from(value("--names")?),
            "--proto" => proto = value("--proto")?,
            "--ttl" => {
                let raw = value("--ttl")?;
                ttl = raw.parse()
                    .map_err(|_| AppError::ConfigError(format!("Invalid ttl '{}'", raw)))?;
            }
            _ => positional.push(arg.clone()),
        }
    }

    if positional.len() < 3 {
        return Err(AppError::ConfigError("Expected <from> <to> <message...>".to_string()));
    }
    let payload = positional.split_off(2).join(" ");
    let to = positional.remove(1);
    let from = positional.remove(0);
    Ok(SendArgs { from, to, payload, names, proto, ttl })
}

async fn run(args: SendArgs) -> Result<()> {
    let book = read_address_book(&args.names)?;
    let address = book.get(&args.from)
        .ok_or_else(|| AppError::ConfigError(format!("No address for node {}", args.from)))?;

    let message = Message::data(&args.proto, &args.from, &args.to, args.ttl, &args.payload);
    info!("[SEND] {} -> {} via {}: {}", args.from, args.to, address, args.payload);
    send_message(address, &message, "[SEND]").await
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging_and_env("info");
    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Send failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
