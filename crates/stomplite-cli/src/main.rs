//! stomplite - Command-line STOMP client.

mod config;

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;

use log::{debug, error, info, warn};
use stomplite_client::{
    AckMode, Client, ClientError, ConnectionState, Headers, TcpTransport, WebSocketTransport,
};
use thiserror::Error;

use crate::config::{Config, TransportKind, DEFAULT_CONFIG_PATH};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send {
        destination: String,
        body: String,
        receipt: bool,
    },
    Subscribe {
        destination: String,
        ack: AckMode,
        count: Option<usize>,
    },
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    config_path: PathBuf,
    command: Command,
}

#[derive(Debug, PartialEq, Eq)]
enum Parsed {
    Run(Args),
    Help,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("{0}")]
    Failure(String),
}

const USAGE: &str = "\
stomplite - Command-line STOMP client

Usage: stomplite [OPTIONS] <COMMAND>

Commands:
  send <DESTINATION> <BODY> [--receipt]         Send one message
  subscribe <DESTINATION> [--ack MODE] [--count N]
                                                Print messages from a destination

Options:
  -c, --config <FILE>     Configuration file (default: stomplite.toml)
  -h, --help              Show this help message

Subscribe options:
  --ack <MODE>            auto, client or client-individual (default: auto)
  --count <N>             Exit after N messages";

fn parse_args(args: &[String]) -> Result<Parsed, String> {
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut positional = Vec::new();
    let mut receipt = false;
    let mut ack = AckMode::Auto;
    let mut count = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                let value = args.get(i + 1).ok_or("-c requires a file argument")?;
                config_path = PathBuf::from(value);
                i += 2;
            }
            "--receipt" => {
                receipt = true;
                i += 1;
            }
            "--ack" => {
                let value = args.get(i + 1).ok_or("--ack requires a mode")?;
                ack = value.parse().map_err(|e: ClientError| e.to_string())?;
                i += 2;
            }
            "--count" => {
                let value = args.get(i + 1).ok_or("--count requires a number")?;
                let n: usize = value
                    .parse()
                    .map_err(|_| "--count requires a number".to_string())?;
                if n == 0 {
                    return Err("--count must be at least 1".to_string());
                }
                count = Some(n);
                i += 2;
            }
            "-h" | "--help" => return Ok(Parsed::Help),
            arg if arg.starts_with('-') => return Err(format!("Unknown argument: {}", arg)),
            arg => {
                positional.push(arg.to_string());
                i += 1;
            }
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("send") => {
            let destination = positional.next().ok_or("send requires a destination")?;
            let body = positional.next().ok_or("send requires a body")?;
            Command::Send {
                destination,
                body,
                receipt,
            }
        }
        Some("subscribe") => {
            let destination = positional
                .next()
                .ok_or("subscribe requires a destination")?;
            Command::Subscribe {
                destination,
                ack,
                count,
            }
        }
        Some(other) => return Err(format!("Unknown command: {}", other)),
        None => return Err("No command given (try --help)".to_string()),
    };

    if let Some(extra) = positional.next() {
        return Err(format!("Unexpected argument: {}", extra));
    }

    Ok(Parsed::Run(Args {
        config_path,
        command,
    }))
}

fn build_client(config: &Config) -> Client {
    let timeout = config.broker.connect_timeout();
    match config.broker.transport {
        TransportKind::Tcp => Client::new(
            TcpTransport::new(config.broker.address.as_str()).connect_timeout(timeout),
            config.client_config(),
        ),
        TransportKind::WebSocket => Client::new(
            WebSocketTransport::new(config.broker.url.as_str()).connect_timeout(timeout),
            config.client_config(),
        ),
    }
}

/// Connect, run `on_connect` once connected, and poll until the session ends.
fn run_session<F>(config: &Config, on_connect: F) -> Result<(), CliError>
where
    F: FnOnce(&mut Client) -> Result<(), ClientError> + 'static,
{
    let mut client = build_client(config);
    let failure: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));

    let connect_failure = failure.clone();
    let error_failure = failure.clone();
    client.connect(
        &config.broker.login,
        &config.broker.passcode,
        move |client, frame| {
            info!(
                "Connected to {} (server {:?})",
                client.endpoint(),
                frame.get("server")
            );
            if let Err(e) = on_connect(client) {
                *connect_failure.borrow_mut() = Some(e.to_string());
                let _ = client.disconnect(|_| {});
            }
        },
        move |client, failure| {
            *error_failure.borrow_mut() = Some(failure.to_string());
            if client.state() != ConnectionState::Disconnected {
                let _ = client.disconnect(|_| {});
            }
        },
    )?;

    client.run_until(|client| client.state() == ConnectionState::Disconnected)?;

    let failure = failure.borrow_mut().take();
    match failure {
        Some(reason) => Err(CliError::Failure(reason)),
        None => Ok(()),
    }
}

fn run_send(config: &Config, destination: String, body: String, receipt: bool) -> Result<(), CliError> {
    run_session(config, move |client| {
        if receipt {
            client.on_receipt(|client, frame| {
                info!("Broker confirmed receipt {:?}", frame.get("receipt-id"));
                let _ = client.disconnect(|_| {});
            });
            client.send(
                &destination,
                Headers::new().with("receipt", "send-receipt"),
                body,
            )?;
            debug!("Waiting for receipt");
        } else {
            client.send(&destination, Headers::new(), body)?;
            client.disconnect(|_| {})?;
        }
        info!("Sent message to {}", destination);
        Ok(())
    })
}

fn run_subscribe(
    config: &Config,
    destination: String,
    ack: AckMode,
    count: Option<usize>,
) -> Result<(), CliError> {
    let received = Rc::new(Cell::new(0usize));

    run_session(config, move |client| {
        let headers = Headers::new().with("ack", ack.as_str());
        let id = client.subscribe(
            &destination,
            move |client, message| {
                match message.body_str() {
                    Some(body) => println!("{}", body),
                    None => println!("<{} bytes>", message.body().len()),
                }

                if message.ack_mode().requires_ack() {
                    if let Err(e) = message.ack(client, Headers::new()) {
                        warn!("Failed to ack {:?}: {}", message.message_id(), e);
                    }
                }

                received.set(received.get() + 1);
                if count.is_some_and(|n| received.get() >= n) {
                    let _ = client.disconnect(|_| {});
                }
            },
            headers,
        )?;
        info!("Subscribed to {} as {}", destination, id);
        Ok(())
    })
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&args) {
        Ok(Parsed::Run(args)) => args,
        Ok(Parsed::Help) => {
            println!("{}", USAGE);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = match Config::load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log.level.as_str()),
    )
    .init();

    info!(
        "Using {:?} transport to {}",
        config.broker.transport,
        config.broker.endpoint()
    );

    let result = match args.command {
        Command::Send {
            destination,
            body,
            receipt,
        } => run_send(&config, destination, body, receipt),
        Command::Subscribe {
            destination,
            ack,
            count,
        } => run_subscribe(&config, destination, ack, count),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_send() {
        let parsed = parse_args(&args(&["send", "/queue/a", "hello", "--receipt"])).unwrap();
        assert_eq!(
            parsed,
            Parsed::Run(Args {
                config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
                command: Command::Send {
                    destination: "/queue/a".into(),
                    body: "hello".into(),
                    receipt: true,
                },
            })
        );
    }

    #[test]
    fn test_parse_subscribe_with_options() {
        let parsed = parse_args(&args(&[
            "-c",
            "custom.toml",
            "subscribe",
            "/topic/b",
            "--ack",
            "client-individual",
            "--count",
            "3",
        ]))
        .unwrap();
        assert_eq!(
            parsed,
            Parsed::Run(Args {
                config_path: PathBuf::from("custom.toml"),
                command: Command::Subscribe {
                    destination: "/topic/b".into(),
                    ack: AckMode::ClientIndividual,
                    count: Some(3),
                },
            })
        );
    }

    #[test]
    fn test_parse_help() {
        assert_eq!(parse_args(&args(&["send", "--help"])).unwrap(), Parsed::Help);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["publish", "/queue/a"])).is_err());
        assert!(parse_args(&args(&["send", "/queue/a"])).is_err());
        assert!(parse_args(&args(&["subscribe", "/queue/a", "--ack", "never"])).is_err());
        assert!(parse_args(&args(&["subscribe", "/queue/a", "--count", "0"])).is_err());
        assert!(parse_args(&args(&["subscribe", "/queue/a", "--bogus"])).is_err());
        assert!(parse_args(&args(&["send", "/queue/a", "x", "y"])).is_err());
        assert!(parse_args(&args(&["-c"])).is_err());
    }
}
