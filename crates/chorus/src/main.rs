//! An interactive terminal front end of `chorus`.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use chorus::{ChatConfig, SessionBuilder};
use chorus_core::{CancellationToken, RunState};
use chorus_openai_model::{OpenAIConfig, OpenAIConfigBuilder, OpenAIProvider};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;

enum SessionEvent {
    Turn(u32, String),
    Delta(usize),
    Message(String, String),
}

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let model_config = match model_config() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            return;
        }
    };
    let mut chat_config = match env::var("CHORUS_CONFIG") {
        Ok(path) => match ChatConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{err}");
                return;
            }
        },
        Err(_) => ChatConfig::default(),
    };
    if chat_config.document_root.is_none() {
        chat_config.document_root = env::current_dir().ok();
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let session = SessionBuilder::with_model_provider(OpenAIProvider::new(model_config))
        .with_config(chat_config)
        .on_turn({
            let event_tx = event_tx.clone();
            move |turn, agent| {
                event_tx.send(SessionEvent::Turn(turn, agent.to_owned())).ok();
            }
        })
        .on_delta({
            let event_tx = event_tx.clone();
            move |delta| {
                event_tx.send(SessionEvent::Delta(delta.len())).ok();
            }
        })
        .on_message({
            let event_tx = event_tx.clone();
            move |msg| {
                let author = msg.author_name().unwrap_or_default().to_owned();
                event_tx
                    .send(SessionEvent::Message(author, msg.content().to_owned()))
                    .ok();
            }
        })
        .build();
    let mut session = match session {
        Ok(session) => session,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let progress_style = match ProgressStyle::with_template("{spinner} {wide_msg}") {
        Ok(style) => style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        Err(_) => ProgressStyle::default_spinner(),
    };

    println!(
        "Ready! Type your input, or 'exit' to quit, 'reset' to restart the conversation. \
         You may pass in a file path using @<path_to_file>."
    );

    loop {
        print!("\n{} ", "User >".bright_green());
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            break;
        }
        if input.eq_ignore_ascii_case("reset") {
            session.reset();
            println!("{}", "[Conversation has been reset]".dimmed());
            continue;
        }
        let message = match input.strip_prefix('@').filter(|path| !path.is_empty()) {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(err) => {
                    println!("Unable to access file {path}: {err}");
                    continue;
                }
            },
            None => input.to_owned(),
        };

        let cancel = CancellationToken::new();
        let run = session.send_message(&message, &cancel);
        tokio::pin!(run);

        let progress_bar = ProgressBar::new_spinner();
        progress_bar.set_style(progress_style.clone());
        progress_bar.enable_steady_tick(Duration::from_millis(100));
        let mut speaker = String::new();
        let mut received = 0;

        let result = loop {
            select! {
                result = &mut run => break result,
                _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                    cancel.cancel();
                    progress_bar.println("Stopping after the current turn...");
                }
                Some(event) = event_rx.recv() => match event {
                    SessionEvent::Turn(turn, agent) => {
                        received = 0;
                        progress_bar.set_message(format!("💬 #{} {agent} is writing...", turn + 1));
                        speaker = agent;
                    }
                    SessionEvent::Delta(len) => {
                        received += len;
                        progress_bar.set_message(format!("💬 {speaker} is writing... ({received} bytes)"));
                    }
                    SessionEvent::Message(author, content) => {
                        progress_bar.suspend(|| print_message(&author, &content));
                    }
                },
            }
        };
        progress_bar.finish_and_clear();

        // Messages may still be queued when the run completes.
        while let Ok(event) = event_rx.try_recv() {
            if let SessionEvent::Message(author, content) = event {
                print_message(&author, &content);
            }
        }

        match result {
            Ok(state) => {
                print_summary(&state);
                dump_transcript(&state);
            }
            Err(failure) => {
                println!(
                    "{}{} {failure}: {}",
                    BAR_CHAR.bright_red(),
                    "Error:".bright_red().bold(),
                    failure.source
                );
                dump_transcript(&failure.partial);
            }
        }
    }
}

fn model_config() -> Result<OpenAIConfig, String> {
    if let Ok(endpoint) = env::var("AZURE_OPENAI_ENDPOINT") {
        let api_key = env::var("AZURE_OPENAI_API_KEY")
            .map_err(|_| "AZURE_OPENAI_API_KEY environment variable is not set")?;
        let deployment = env::var("AZURE_OPENAI_DEPLOYMENT")
            .map_err(|_| "AZURE_OPENAI_DEPLOYMENT environment variable is not set")?;
        let mut builder = OpenAIConfigBuilder::with_api_key(api_key)
            .with_azure_deployment(endpoint, deployment);
        if let Ok(version) = env::var("AZURE_OPENAI_API_VERSION") {
            builder = builder.with_api_version(version);
        }
        return Ok(builder.build());
    }

    let api_key = env::var("OPENAI_API_KEY")
        .map_err(|_| "OPENAI_API_KEY environment variable is not set")?;
    let mut builder = OpenAIConfigBuilder::with_api_key(api_key);
    if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
        builder = builder.with_base_url(base_url);
    }
    if let Ok(model) = env::var("OPENAI_MODEL") {
        builder = builder.with_model(model);
    }
    Ok(builder.build())
}

fn print_message(author: &str, content: &str) {
    println!(
        "\n{}🤖 {}",
        BAR_CHAR.bright_cyan(),
        author.to_uppercase().bright_cyan().bold()
    );
    for line in content.lines() {
        println!("{}{}", BAR_CHAR.bright_cyan(), line.bright_white());
    }
}

fn print_summary(state: &RunState) {
    let reason = match (&state.termination_reason, &state.stop_signal) {
        (_, Some(signal)) => signal.to_string(),
        (Some(reason), None) => reason.to_string(),
        (None, None) => "unknown".to_owned(),
    };
    println!(
        "\n{}",
        format!("[{} turn(s), stopped: {reason}]", state.turn_count).dimmed()
    );
}

fn dump_transcript(state: &RunState) {
    let Ok(path) = env::var("CHORUS_TRANSCRIPT") else {
        return;
    };
    let path = PathBuf::from(path);
    let result = serde_json::to_vec_pretty(state)
        .map_err(|err| err.to_string())
        .and_then(|json| std::fs::write(&path, json).map_err(|err| err.to_string()));
    if let Err(err) = result {
        error!("failed to write {}: {err}", path.display());
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
