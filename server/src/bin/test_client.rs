//! Console client for manual play-testing
//!
//! Joins a game on the given server, prints every event the server sends
//! and submits presses typed on stdin (`red`, `green`, `blue`, `yellow`).
//! Run two of these against one server to play a full game.

use anyhow::{bail, Context};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::{Color, Player, Request, Response, State};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server address as host:port
    #[arg(long, default_value = "127.0.0.1:50051")]
    address: String,

    /// Player name to join with
    #[arg(long)]
    player: String,
}

fn parse_color(word: &str) -> Option<Color> {
    match word.trim().to_lowercase().as_str() {
        "red" => Some(Color::Red),
        "green" => Some(Color::Green),
        "blue" => Some(Color::Blue),
        "yellow" => Some(Color::Yellow),
        _ => None,
    }
}

fn describe(response: &Response) -> String {
    match response {
        Response::Turn { turn: State::Begin } => "game on, waiting for the first turn".into(),
        Response::Turn {
            turn: State::StartTurn,
        } => "your turn: repeat the pattern, then add one color".into(),
        Response::Turn {
            turn: State::StopTurn,
        } => "turn over, waiting for the other player".into(),
        Response::Turn { turn: State::Win } => "you win!".into(),
        Response::Turn { turn: State::Lose } => "you lose.".into(),
        Response::Lightup { lightup } => format!("lightup: {lightup:?}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let url = format!("ws://{}", args.address);
    let (ws, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("could not connect to {url}"))?;
    let (mut sink, mut source) = ws.split();

    let join = Request::Join {
        player: Player {
            id: args.player.clone(),
        },
    };
    sink.send(WsMessage::Binary(bincode::serialize(&join)?))
        .await
        .context("could not send join")?;
    println!("joined as {:?}, waiting for an opponent...", args.player);

    // Print server events as they arrive.
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    eprintln!("connection error: {e}");
                    break;
                }
            };
            match frame {
                WsMessage::Binary(data) => match bincode::deserialize::<Response>(&data) {
                    Ok(response) => {
                        println!("{}", describe(&response));
                        if matches!(
                            response,
                            Response::Turn {
                                turn: State::Win | State::Lose
                            }
                        ) {
                            break;
                        }
                    }
                    Err(e) => eprintln!("undecodable frame: {e}"),
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Forward presses typed on stdin until the game ends.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            // The game is over once the reader finishes.
            _ = &mut reader => return Ok(()),
            line = lines.next_line() => {
                let Some(line) = line.context("stdin closed")? else {
                    reader.abort();
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                let Some(color) = parse_color(&line) else {
                    println!("unknown color {line:?}, use red/green/blue/yellow");
                    continue;
                };
                let press = Request::Press { press: color };
                if sink
                    .send(WsMessage::Binary(bincode::serialize(&press)?))
                    .await
                    .is_err()
                {
                    bail!("connection closed");
                }
            }
        }
    }
}
