//! Terminal front end for a running chat server.
//!
//! Type a message and press enter. `/clear` starts over and `/quit` exits.
//! Ctrl-C stops a reply that is still streaming, or exits at the prompt.

use std::env;
use std::io::Write;

use dotenv::dotenv;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use stream_chat::client::{ChatSession, HttpTransport, SessionView, Status};
use stream_chat::web::models::Role;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("warn"));

    let server = env::var("CHAT_SERVER_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    debug!("Talking to {}", server);

    let session = ChatSession::new(HttpTransport::new(&server));
    tokio::spawn(render(session.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else { break };

        match line.trim() {
            "/quit" => break,
            "/clear" => {
                session.clear();
                println!("(conversation cleared)");
                prompt();
                continue;
            }
            _ => {}
        }

        if session.status() == Status::Error {
            println!("(the last reply failed; type /clear to start over)");
            prompt();
            continue;
        }

        let mut exchange = tokio::spawn(session.send(&line));

        let outcome = tokio::select! {
            outcome = &mut exchange => outcome,
            _ = tokio::signal::ctrl_c() => {
                session.stop();
                exchange.await
            }
        };
        // The renderer reports failures; only a panicked task is fatal here.
        let _ = outcome?;
        prompt();
    }

    Ok(())
}

fn prompt() {
    print!("you> ");
    let _ = std::io::stdout().flush();
}

/// Print assistant text as it streams in, and failures once they happen.
async fn render(mut updates: watch::Receiver<SessionView>) {
    let mut printed: Option<(String, usize)> = None;
    let mut last_status = Status::Ready;

    while updates.changed().await.is_ok() {
        let view = updates.borrow_and_update().clone();

        if let Some(reply) = view.messages.last().filter(|m| m.role == Role::Assistant) {
            let text = reply.text();
            let offset = match &printed {
                Some((id, len)) if *id == reply.id => *len,
                _ => {
                    print!("assistant> ");
                    0
                }
            };
            if text.len() > offset {
                print!("{}", &text[offset..]);
            }
            printed = Some((reply.id.clone(), text.len()));
        }

        if view.status != last_status {
            match view.status {
                Status::Ready if printed.is_some() => println!(),
                Status::Error => {
                    if let Some(error) = &view.error {
                        println!("\nerror: {}", error);
                    }
                }
                _ => {}
            }
            last_status = view.status;
        }
        let _ = std::io::stdout().flush();
    }
}
