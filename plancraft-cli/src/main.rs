//! # Plancraft CLI
//!
//! Command-line interface for running the turn orchestrator against an
//! OpenAI-compatible completion service, with the demo Shipment and CRM agents.
//!
//! Usage:
//!   plancraft <request>
//!   plancraft run [--json] [--trace] <request>
//!   plancraft chat [--mock]
//!   plancraft schema
//!
//! Examples:
//!   plancraft "Where is my DHL package 123456789?"
//!   plancraft run --trace --max-turns 4 "Move the delivery of 123456789 to the next available date"
//!   plancraft chat --mock --trace
//!   OPENAI_BASE_URL=http://localhost:11434/v1 OPENAI_MODEL=llama3 plancraft run "Track 123456789"

mod demo;

use clap::{Args, Parser, Subcommand};
use plancraft_agent::{AgentConfig, Chat, Orchestrator, Outcome, PlanGenerator};
use plancraft_error::{Error, Result};
use plancraft_vm::{
    ChatMessage, LlmProvider, LogTracer, MemoryTracer, OpenAIProvider, ProviderConfig, ScriptedProvider,
    Tracer,
};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plancraft")]
#[command(author, version, about = "Plancraft - turn-based orchestration of model-written programs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Request to answer (when not using subcommands)
    #[arg(trailing_var_arg = true)]
    request: Vec<String>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(flatten)]
    options: RunOptions,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a request
    Run {
        /// The request, in natural language
        #[arg(trailing_var_arg = true, required = true)]
        request: Vec<String>,
    },
    /// Talk to the orchestrator through the chat front-end, one message per line
    Chat,
    /// Show the orchestrator prompt for the demo agents
    Schema,
}

#[derive(Args, Clone)]
struct RunOptions {
    /// Model used for planning (defaults to the provider's model)
    #[arg(long, global = true, env = "OPENAI_MODEL")]
    model: Option<String>,

    /// Model tried when the primary model cannot produce a valid program
    #[arg(long, global = true, env = "PLANCRAFT_FALLBACK_MODEL")]
    fallback_model: Option<String>,

    /// Maximum number of turns per request
    #[arg(long, global = true, env = "PLANCRAFT_MAX_TURNS", default_value_t = 3)]
    max_turns: usize,

    /// Repair prompts allowed per model
    #[arg(long, global = true, default_value_t = 2)]
    max_repairs: usize,

    /// Run independent steps one at a time
    #[arg(long, global = true)]
    sequential: bool,

    /// Print the outcome as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print the span tree after the run
    #[arg(long, global = true)]
    trace: bool,

    /// Answer skill calls from model-generated mock data
    #[arg(long, global = true, env = "PLANCRAFT_MOCK")]
    mock: bool,
}

impl RunOptions {
    fn agent_config(&self) -> AgentConfig {
        let mut config = AgentConfig::default()
            .with_max_turns(self.max_turns)
            .with_max_repair_attempts(self.max_repairs)
            .with_parallel_steps(!self.sequential);
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        if let Some(model) = &self.fallback_model {
            config = config.with_fallback_model(model.clone());
        }
        config
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_orchestrator(provider: Arc<dyn LlmProvider>, options: &RunOptions) -> Result<Orchestrator> {
    let config = options.agent_config();
    let planner = Arc::new(PlanGenerator::new(provider, &config));
    let registry = demo::registry(planner.clone(), options.mock)?;
    Orchestrator::new(planner, registry, config)
}

fn build_chat(provider: Arc<dyn LlmProvider>, options: &RunOptions) -> Result<Chat> {
    let config = options.agent_config();
    let planner = Arc::new(PlanGenerator::new(provider.clone(), &config));
    let orchestrator = build_orchestrator(provider, options)?;
    Ok(Chat::new(Arc::new(orchestrator), planner))
}

fn tracer(options: &RunOptions, memory: &Arc<MemoryTracer>) -> Arc<dyn Tracer> {
    if options.trace {
        memory.clone()
    } else {
        Arc::new(LogTracer::new())
    }
}

fn print_outcome(outcome: &Outcome, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome).unwrap_or_default());
        return;
    }
    match outcome {
        Outcome::Answer { answer } => println!("{}", answer),
        Outcome::Escalation { kind, message } => eprintln!("[{}] {}", kind, message),
    }
}

async fn run_request(request: &str, options: &RunOptions) -> Result<Outcome> {
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAIProvider::new(ProviderConfig::from_env()?)?);
    let orchestrator = build_orchestrator(provider, options)?;
    info!(
        model = orchestrator.config().model.as_deref().unwrap_or("default"),
        max_turns = orchestrator.config().max_turns,
        "Running request"
    );

    let memory = Arc::new(MemoryTracer::new());
    let outcome = orchestrator
        .with_tracer(tracer(options, &memory))
        .execute(request)
        .await;

    if options.trace {
        eprintln!("--- Trace ---\n{}", memory.render_tree());
    }
    Ok(outcome)
}

async fn chat_loop(options: &RunOptions) -> Result<()> {
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAIProvider::new(ProviderConfig::from_env()?)?);
    let memory = Arc::new(MemoryTracer::new());
    let chat = build_chat(provider, options)?.with_tracer(tracer(options, &memory));
    info!(mock = options.mock, "Chat started");

    let io_error = |err: std::io::Error| Error::unexpected("cannot use the terminal").set_source(err);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut messages = Vec::new();

    loop {
        print!("> ");
        std::io::stdout().flush().map_err(io_error)?;
        let line = match lines.next_line().await.map_err(io_error)? {
            Some(line) => line.trim().to_string(),
            None => break,
        };
        match line.as_str() {
            "" => continue,
            "exit" | "quit" => break,
            _ => {}
        }

        messages.push(ChatMessage::user(line));
        match chat.analyze(&messages).await {
            Ok(Some(answer)) => {
                if options.json {
                    println!("{}", serde_json::to_string_pretty(&answer).unwrap_or_default());
                } else {
                    println!("{}", answer.display_text());
                }
                messages.push(ChatMessage::assistant(answer.display_text()));
            }
            Ok(None) => {}
            Err(err) => {
                error!(error = %err, "Chat turn failed");
                eprintln!("Error: {}", err);
            }
        }

        if options.trace {
            eprintln!("--- Trace ---\n{}", memory.render_tree());
        }
    }
    Ok(())
}

fn show_schema(options: &RunOptions) -> Result<()> {
    // the prompt does not depend on the provider
    let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
    let orchestrator = build_orchestrator(provider, options)?;
    println!("{}", orchestrator.system_prompt());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let request = match cli.command {
        Some(Commands::Schema) => {
            return match show_schema(&cli.options) {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("Error: {}", err);
                    ExitCode::FAILURE
                }
            };
        }
        Some(Commands::Chat) => {
            return match chat_loop(&cli.options).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    error!(error = %err, "Chat failed");
                    eprintln!("Error: {}", err);
                    ExitCode::FAILURE
                }
            };
        }
        Some(Commands::Run { request }) => request.join(" "),
        None if cli.request.is_empty() => {
            eprintln!("Error: No request provided.");
            eprintln!("Usage: plancraft [OPTIONS] <REQUEST>...");
            eprintln!("       plancraft run <REQUEST>...");
            eprintln!("       plancraft chat");
            eprintln!("       plancraft schema");
            eprintln!("\nExamples:");
            eprintln!("  plancraft \"Where is my DHL package 123456789?\"");
            eprintln!("  plancraft run --trace \"Track 123456789\"");
            eprintln!("  plancraft --help");
            return ExitCode::FAILURE;
        }
        None => cli.request.join(" "),
    };

    match run_request(&request, &cli.options).await {
        Ok(outcome) => {
            print_outcome(&outcome, cli.options.json);
            if outcome.is_answer() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            error!(error = %err, "Request failed before planning");
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
