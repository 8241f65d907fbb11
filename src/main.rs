mod audio;
mod chat;
mod client;
mod connection;
mod error;
mod protocol;
mod settings;
mod state;
#[cfg(test)]
mod test_support;

use std::io::BufRead;
use std::sync::Arc;

use client::{ChatClient, ClientCommand};
use connection::{ConnectionManager, ConnectionState, WsTransport};
use protocol::Role;
use state::{AppEvent, AuthState};

fn main() {
    env_logger::init();

    let settings = settings::load();
    // First run: persist the defaults so they are easy to edit.
    if let Ok(path) = settings::settings_path() {
        if !path.exists() {
            if let Err(e) = settings::save(&settings) {
                log::warn!("[lexchat] could not write settings file: {}", e);
            }
        }
    }
    let url = match settings.resolve_ws_url() {
        Ok(u) => u,
        Err(e) => {
            eprintln!("[lexchat] bad configuration: {}", e);
            return;
        }
    };
    println!("[lexchat] consultation endpoint: {}", url);

    let (event_tx, event_rx) = std::sync::mpsc::channel::<AppEvent>();
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");

    // Stand-in auth collaborator: resolves immediately with the configured
    // user. The real deployment feeds this from the session layer.
    let (_auth_tx, auth_rx) = tokio::sync::watch::channel(AuthState {
        user: Some(settings.user.clone()),
        loading: false,
    });

    let commands = {
        let _guard = runtime.enter();
        let manager = ConnectionManager::new(url, Arc::new(WsTransport));
        let client = ChatClient::new(
            manager,
            event_tx,
            auth_rx,
            Box::new(audio::spawn_logging_sink),
        );
        client.spawn()
    };

    // stdin -> commands
    {
        let commands = commands.clone();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(_) => break,
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let command = match trimmed {
                    "/quit" => ClientCommand::Dispose,
                    "/audio" => ClientCommand::EnableAudio,
                    "/reset" => ClientCommand::Reset,
                    _ => ClientCommand::Send(trimmed.to_string()),
                };
                let done = matches!(command, ClientCommand::Dispose);
                if commands.blocking_send(command).is_err() || done {
                    break;
                }
            }
            let _ = commands.blocking_send(ClientCommand::Dispose);
        });
    }

    println!("[lexchat] type a question; /audio enables speech, /quit exits");
    for event in event_rx {
        match event {
            AppEvent::ConnectionStatus { state, attempts } => {
                if state == ConnectionState::Reconnecting {
                    println!("[lexchat] status: {} (attempt {})", state.label(), attempts);
                } else {
                    println!("[lexchat] status: {}", state.label());
                }
            }
            AppEvent::MessageAppended(message) => {
                let who = match message.role {
                    Role::User => "you",
                    Role::Assistant => "lawyer",
                };
                println!(
                    "[{} {}] {}",
                    who,
                    message.timestamp.format("%H:%M:%S"),
                    message.content
                );
            }
            AppEvent::LoadingChanged(true) => println!("[lexchat] assistant is typing..."),
            AppEvent::LoadingChanged(false) => {}
            AppEvent::Error(message) => eprintln!("[lexchat] error: {}", message),
            AppEvent::ErrorCleared => {}
            AppEvent::AudioEnabled(_) => println!("[lexchat] speech playback enabled"),
            AppEvent::AudioStarted { id } => {
                println!("[lexchat] speech stream {} started", id);
            }
            AppEvent::AudioCompleted { id, bytes } => {
                println!("[lexchat] speech stream {} finished ({} bytes)", id, bytes);
            }
        }
    }
}
