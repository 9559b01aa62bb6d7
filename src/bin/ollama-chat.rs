//! Command-line chat client for an Ollama server.
//!
//! # Usage
//!
//! ```bash
//! # Interactive chat with the default model
//! ollama-chat
//!
//! # One-shot prompt
//! ollama-chat --model llama2 why is the sky blue?
//!
//! # Talk to another machine and keep a transcript
//! OLLAMA_HOST=gpu-box:11434 ollama-chat --log
//!
//! # Manage models
//! ollama-chat --list-models
//! ollama-chat --pull llama2
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/clear` - Start a fresh conversation
//! - `/models` - List installed models
//! - `/model <name|number>` - Change the model
//! - `/stats` - Show session statistics
//! - `/quit` - Exit the application

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ollama_chat::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, Interrupt, PlainTextRenderer, Renderer,
    help_text, parse_command,
};
use ollama_chat::{ModelList, Ollama};

const USAGE: &str = "ollama-chat [OPTIONS] [PROMPT]...";

/// Exit status after Ctrl+C, matching the shell convention for SIGINT.
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let (args, free) = ChatArgs::from_command_line_relaxed(USAGE);
    init_logging(args.verbose);

    let config = match ChatConfig::from_command_line(args, free) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ollama-chat: {err}");
            eprintln!("usage: {USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: ChatConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let client = Ollama::new(config.request.clone())?;
    let mut renderer = PlainTextRenderer::with_color(config.use_color);

    // Ctrl+C during a request or a stream closes the session.
    let interrupt = Interrupt::new();
    let handler = interrupt.clone();
    ctrlc::set_handler(move || handler.trigger())?;

    let cancel = interrupt.arm();
    let version = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            renderer.print_interrupted();
            return Ok(ExitCode::from(INTERRUPTED));
        }
        version = client.version() => version,
    };
    match version {
        Ok(version) => {
            info!(host = %config.request.host, version = %version.version, "connected");
        }
        Err(err) => {
            renderer.print_error(&format!(
                "Could not connect to Ollama at {}: {err}",
                config.request.host
            ));
            print_troubleshooting();
            return Ok(ExitCode::FAILURE);
        }
    }

    let mut session = ChatSession::new(client, &config);

    if config.list_models {
        return match session.list_models(&interrupt.arm()).await {
            Ok(listing) => {
                print_models(listing);
                Ok(ExitCode::SUCCESS)
            }
            Err(err) if err.is_interrupted() => {
                renderer.print_interrupted();
                Ok(ExitCode::from(INTERRUPTED))
            }
            Err(err) => {
                renderer.print_error(&format!("Failed to list models: {err}"));
                Ok(ExitCode::FAILURE)
            }
        };
    }

    if let Some(model) = &config.pull_model {
        return match session.pull_model(model, &mut renderer, &interrupt.arm()).await {
            Ok(()) => {
                renderer.print_info(&format!("Pulled {model}."));
                Ok(ExitCode::SUCCESS)
            }
            Err(err) if err.is_interrupted() => Ok(ExitCode::from(INTERRUPTED)),
            Err(err) => {
                renderer.print_error(&format!("Failed to pull {model}: {err}"));
                Ok(ExitCode::FAILURE)
            }
        };
    }

    if config.resume {
        let restored = session.resume()?;
        if restored > 0 {
            renderer.print_info(&format!("Resumed {restored} messages."));
        }
    }

    let code = match &config.prompt {
        Some(prompt) => one_shot(&mut session, prompt, &mut renderer, &interrupt).await,
        None => repl(&mut session, &mut renderer, &interrupt).await?,
    };

    if let Some(path) = &config.save_path {
        save_on_exit(&session, path, &mut renderer);
    }
    Ok(code)
}

async fn one_shot(
    session: &mut ChatSession,
    prompt: &str,
    renderer: &mut PlainTextRenderer,
    interrupt: &Interrupt,
) -> ExitCode {
    match session.send_streaming(prompt, renderer, &interrupt.arm()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) if err.is_interrupted() => ExitCode::from(INTERRUPTED),
        Err(err) => {
            renderer.print_error(&err.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn repl(
    session: &mut ChatSession,
    renderer: &mut PlainTextRenderer,
    interrupt: &Interrupt,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut rl = DefaultEditor::new()?;

    println!("Ollama Chat (model: {})", session.model());
    println!("Type /help for commands, /quit to exit\n");

    while !session.is_closed() {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    handle_command(session, cmd, renderer, interrupt).await;
                    continue;
                }

                println!("{}:", session.model());
                if let Err(e) = session.send_streaming(line, renderer, &interrupt.arm()).await
                    && !e.is_interrupted()
                {
                    renderer.print_error(&e.to_string());
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    session.close();
    println!("Goodbye!");
    Ok(ExitCode::SUCCESS)
}

async fn handle_command(
    session: &mut ChatSession,
    cmd: ChatCommand,
    renderer: &mut PlainTextRenderer,
    interrupt: &Interrupt,
) {
    match cmd {
        ChatCommand::Quit => session.close(),
        ChatCommand::Clear => {
            session.reset();
            renderer.print_info("Started a fresh conversation.");
        }
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {line}");
            }
        }
        ChatCommand::Model(selection) => match session.select_model(selection) {
            Ok(model) => {
                let message = format!("Model changed to: {model}");
                renderer.print_info(&message);
            }
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::Models => match session.list_models(&interrupt.arm()).await {
            Ok(listing) => print_models(listing),
            Err(err) if err.is_interrupted() => renderer.print_interrupted(),
            Err(err) => renderer.print_error(&format!("Failed to list models: {err}")),
        },
        ChatCommand::Pull(model) => {
            match session.pull_model(&model, renderer, &interrupt.arm()).await {
                Ok(()) => renderer.print_info(&format!("Pulled {model}.")),
                Err(err) if err.is_interrupted() => {}
                Err(err) => renderer.print_error(&format!("Failed to pull {model}: {err}")),
            }
        }
        ChatCommand::System(prompt) => {
            session.set_system_prompt(prompt);
            match session.system_prompt() {
                Some(p) => renderer.print_info(&format!(
                    "System prompt set to: {p} (started a fresh conversation)"
                )),
                None => renderer.print_info("System prompt cleared."),
            }
        }
        ChatCommand::History => print_history(session),
        ChatCommand::TranscriptPath(path) => {
            session.set_transcript_path(Some(PathBuf::from(&path)));
            renderer.print_info(&format!("Transcript auto-save set to {path}"));
        }
        ChatCommand::ClearTranscriptPath => {
            session.set_transcript_path(None);
            renderer.print_info("Transcript auto-save disabled.");
        }
        ChatCommand::SaveTranscript(path) => match session.save_transcript_to(&path) {
            Ok(()) => renderer.print_info(&format!("Transcript saved to {path}")),
            Err(err) => renderer.print_error(&format!("Failed to save transcript: {err}")),
        },
        ChatCommand::LoadTranscript(path) => match session.load_transcript_from(&path) {
            Ok(()) => renderer.print_info(&format!(
                "Loaded {} messages from {path}",
                session.message_count()
            )),
            Err(err) => renderer.print_error(&format!("Failed to load transcript: {err}")),
        },
        ChatCommand::Stats => print_stats(session),
        ChatCommand::Invalid(message) => renderer.print_error(&message),
    }
}

fn save_on_exit(session: &ChatSession, path: &Path, renderer: &mut PlainTextRenderer) {
    match session.save_transcript_to(path) {
        Ok(()) => renderer.print_info(&format!("Transcript saved to {}", path.display())),
        Err(err) => renderer.print_error(&format!("Failed to save transcript: {err}")),
    }
}

fn print_troubleshooting() {
    eprintln!("\nTroubleshooting tips:");
    eprintln!("1. Make sure Ollama is running");
    eprintln!("2. Check if the host and port are correct (default: localhost:11434)");
    eprintln!("3. If using a custom OLLAMA_HOST, ensure it includes the protocol and port");
}

fn print_models(listing: &ModelList) {
    if listing.is_empty() {
        println!("No models found. Pull one with --pull <name> or /pull <name>.");
        return;
    }
    println!("Available models:");
    for (i, model) in listing.models().iter().enumerate() {
        println!(
            "  {}. {} ({}, modified {})",
            i + 1,
            model.name,
            model.display_size(),
            model.display_modified()
        );
    }
}

fn print_history(session: &ChatSession) {
    if session.conversation().is_empty() {
        println!("    (no messages yet)");
        return;
    }
    for message in session.conversation() {
        println!("    [{}] {}", message.role, message.content);
    }
}

fn print_stats(session: &ChatSession) {
    let stats = session.stats();
    println!("    Session Statistics:");
    println!("      Model: {}", stats.model);
    println!("      Messages: {}", stats.message_count);
    println!(
        "      Turns: {} completed, {} failed",
        stats.completed_turns, stats.failed_turns
    );
    if let Some(prompt) = stats.system_prompt.as_deref() {
        println!("      System prompt: {prompt}");
    } else {
        println!("      System prompt: (none)");
    }
    println!(
        "      Total tokens: {} prompt / {} generated",
        stats.total_prompt_tokens, stats.total_eval_tokens
    );
    if let Some(rate) = stats.last_tokens_per_second {
        println!("      Last turn: {rate:.1} tokens/s");
    }
    match stats.transcript_path {
        Some(ref path) => println!("      Transcript file: {}", path.display()),
        None => println!("      Transcript file: (disabled)"),
    }
}
