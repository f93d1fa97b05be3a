use clap::Parser;
use dotenvy::dotenv;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use polyglot_coach::config::{api_key_from_env, AppConfig, Prompts};
use polyglot_coach::core::Agent;
use polyglot_coach::llm_client::MistralClient;
use polyglot_coach::logging::{init_logging, LoggingConfig};
use polyglot_coach::memory::MemoryStore;
use polyglot_coach::stats::StatsStore;
use polyglot_coach::tools::{default_registry, progress_report};

#[derive(Parser, Debug)]
#[command(
    name = "polyglot-coach",
    version,
    about = "Tool-calling French practice chatbot for the terminal"
)]
struct Cli {
    /// Path to a config.toml to load ahead of the standard locations
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Override the prompts file from config
    #[arg(long, value_name = "FILE")]
    prompts: Option<PathBuf>,
    /// Override the memory file from config
    #[arg(long, value_name = "FILE")]
    memory: Option<PathBuf>,
    /// Log filter, e.g. "debug" or "polyglot_coach=trace"
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
    /// Also write logs to a daily file under logs/
    #[arg(long)]
    log_file: bool,
}

fn print_banner() {
    println!("{}", "=".repeat(60));
    println!("  Polyglot Coach");
    println!("  Powered by Mistral AI");
    println!("{}", "=".repeat(60));
    println!("\nType /help for commands, /exit to quit\n");
}

fn print_help() {
    println!("Available commands:");
    println!("  /help  - Show this help message");
    println!("  /stats - Show your French learning progress");
    println!("  /clear - Clear conversation history (also /reset)");
    println!("  /exit  - Save and exit (also /quit)");
    println!();
}

fn persist(memory: &MemoryStore, agent: &Agent) {
    if let Err(e) = memory.save(agent.history()) {
        tracing::error!("Failed to save conversation: {}", e);
        eprintln!("Error saving memory: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv();
    let cli = Cli::parse();
    let _guard = init_logging(LoggingConfig {
        log_level: cli.log_level.clone(),
        file_log: if cli.log_file { Some(true) } else { None },
        ..Default::default()
    })?;

    let config = AppConfig::load(cli.config.as_deref());

    let api_key = match api_key_from_env() {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Set it with: export MISTRAL_API_KEY='your-api-key'");
            std::process::exit(1);
        }
    };

    let prompts_path = cli.prompts.unwrap_or_else(|| config.prompts_file.clone());
    let prompts = Prompts::load(&prompts_path)?;

    let llm = Arc::new(MistralClient::new(
        api_key,
        config.model.clone(),
        config.base_url.clone(),
        Duration::from_millis(config.min_api_interval_ms),
    ));
    let stats = Arc::new(StatsStore::new(config.stats_file.clone()));
    let registry = default_registry(stats.clone());

    let memory_path = cli.memory.unwrap_or_else(|| config.memory_file.clone());
    let memory = MemoryStore::new(memory_path);
    let history = memory.load();
    let loaded = history.len();

    let mut agent = Agent::new(llm, registry, prompts, history, &config);

    print_banner();
    if loaded > 0 {
        println!("[Loaded {loaded} messages from previous session]\n");
    }

    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(command) = line.strip_prefix('/') {
                    match command.to_lowercase().as_str() {
                        "exit" | "quit" => {
                            println!("\nSaving conversation and exiting...");
                            persist(&memory, &agent);
                            println!("Goodbye!");
                            break;
                        }
                        "help" => print_help(),
                        "stats" => println!("\n{}\n", progress_report(&stats)),
                        "clear" | "reset" => {
                            agent.clear_history();
                            persist(&memory, &agent);
                            println!("[Conversation history cleared]\n");
                        }
                        _ => {
                            println!("Unknown command: {line}");
                            println!("Type /help for available commands\n");
                        }
                    }
                    continue;
                }

                match agent.process_message(line).await {
                    Ok(reply) => {
                        println!("\nAssistant: {reply}\n");
                        persist(&memory, &agent);
                    }
                    Err(e) => {
                        tracing::error!("Turn failed: {}", e);
                        eprintln!("Error processing message: {e}");
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("\nSaving conversation and exiting...");
                persist(&memory, &agent);
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Input error: {err:?}");
                break;
            }
        }
    }

    Ok(())
}
