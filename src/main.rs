use std::env;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::process::ExitCode;
use log::{error, info};

use routing_sim::error::{AppError, Result};
use routing_sim::init::{init_engine, init_logging_and_env};
use routing_sim::read_config::{neighbors_of, read_address_book, read_settings};
use routing_sim::routing::Algorithm;
use routing_sim::Node;

const USAGE: &str = "Usage: node <node_id> [--algorithm|-a flooding|dijkstra|lsr|dvr] [--topo PATH] [--names PATH] [--settings PATH]";

#[derive(Debug, PartialEq)]
struct NodeArgs {
    node_id: String,
    algorithm: Algorithm,
    topo: PathBuf,
    names: PathBuf,
    settings: Option<PathBuf>,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<NodeArgs> {
    let mut args = args.into_iter();
    let mut node_id = None;
    let mut algorithm = Algorithm::Flooding;
    let mut topo = PathBuf::from("config/topo.json");
    let mut names = PathBuf::from("config/names.json");
    let mut settings = None;

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next().ok_or_else(|| AppError::ConfigError(format!("Missing value for {}", flag)))
        };
        match arg.as_str() {
            "--algorithm" | "-a" => algorithm = value(arg.as_str())?.parse()?,
            "--topo" => topo = PathBuf::from(value(arg.as_str())?),
            "--names" => names = PathBuf::from(value(arg.as_str())?),
            "--settings" => settings = Some(PathBuf::from(value(arg.as_str())?)),
            flag if flag.starts_with('-') => {
                return Err(AppError::ConfigError(format!("Unknown option {}", flag)));
            }
            _ if node_id.is_none() => node_id = Some(arg.clone()),
            _ => return Err(AppError::ConfigError(format!("Unexpected argument {}", arg))),
        }
    }

    let node_id = node_id.ok_or_else(|| AppError::ConfigError("Missing node id".to_string()))?;
    Ok(NodeArgs { node_id, algorithm, topo, names, settings })
}

async fn run(args: NodeArgs) -> std::result::Result<(), Box<dyn StdError>> {
    let settings = read_settings(args.settings.as_deref())?;
    init_logging_and_env(&settings.log_level);

    let (topology, engine) = init_engine(args.algorithm, &args.topo, &settings)?;
    let address_book = read_address_book(&args.names)?;
    let neighbors = neighbors_of(&topology, &args.node_id);
    info!("Node {} neighbors: {:?}", args.node_id, neighbors);

    let mut node = Node::new(&args.node_id, neighbors, engine, &settings);
    let addr = node.start(&address_book).await?;
    info!("Node {} running on {}, press Ctrl-C to stop", args.node_id, addr);

    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    let stats = node.stats();
    info!("Node {} done: {} delivered, {} forwarded, {} dropped",
          args.node_id, stats.delivered, stats.forwarded, stats.dropped);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
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
            error!("Fatal error: {}", e);
            eprintln!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}
