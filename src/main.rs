use nlq_agent::agent::{DoctorPersona, QueryAgent, QueryEnvelope};
use nlq_agent::config::{AppConfig, ModelTier};
use nlq_agent::execution::TabularStore;
use nlq_agent::gateway::ModelGateway;
use nlq_agent::guardrails::{ChatMessage, TopicGuardrail};
use nlq_agent::llm::OpenAiClient;
use nlq_agent::telemetry;

use anyhow::Result;
use clap::{Parser, Subcommand};
use polars::prelude::*;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

const OFF_TOPIC_REPLY: &str =
    "I can only answer questions about the healthcare admissions database.";

#[derive(Parser)]
#[command(name = "nlq")]
#[command(about = "Ask questions about the healthcare admissions dataset in plain language")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Dataset CSV (or set NLQ_DATASET)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// OpenAI API key (or set OPENAI_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Model name (or set OPENAI_MODEL)
    #[arg(long, global = true, conflicts_with = "tier")]
    model: Option<String>,

    /// Model preset
    #[arg(long, value_enum, global = true)]
    tier: Option<ModelTier>,

    /// Review generated SQL before running it
    #[arg(long, global = true)]
    double_check: bool,

    /// Maximum rows returned
    #[arg(long, global = true)]
    truncation_limit: Option<usize>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one request through the query tool and print the envelope
    Ask {
        /// The request in natural language
        query: String,
    },
    /// Interactive session with the topical guardrail in front of the tool
    Chat {
        /// Your name as it appears in the Doctor column
        #[arg(long)]
        doctor: Option<String>,

        /// Ask the model when the keyword guardrail does not match
        #[arg(long)]
        llm_guardrail: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = build_config(&args)?;
    telemetry::init_tracing(config.log_file.as_deref())?;

    let client = OpenAiClient::new(
        config.gateway.require_api_key()?.to_string(),
        config.gateway.model.clone(),
        config.gateway.base_url.clone(),
        config.gateway.timeout,
    )?;
    info!("Using model {}", client.model());
    let gateway = ModelGateway::new(
        Arc::new(client),
        config.gateway.retry.clone(),
        config.gateway.timeout,
    );

    let store = Arc::new(TabularStore::load_csv(&config.dataset_path)?);
    let agent = QueryAgent::new(gateway.clone(), Arc::clone(&store), config.pipeline.clone())?;

    match args.command {
        Commands::Ask { query } => {
            let envelope = agent.run_query_tool(&query).await;
            println!("{}", envelope.to_json()?);
            render(&envelope);
            Ok(())
        }
        Commands::Chat {
            doctor,
            llm_guardrail,
        } => {
            let persona = match doctor {
                Some(ref name) => Some(DoctorPersona::resolve(&store, name)?),
                None => None,
            };
            let fallback = llm_guardrail.then_some(gateway);
            chat(&agent, TopicGuardrail::new(fallback)?, persona).await
        }
    }
}

fn build_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::from_env()?;
    if let Some(ref data) = args.data {
        config.dataset_path = data.clone();
    }
    if let Some(ref key) = args.api_key {
        config.gateway.api_key = Some(key.clone());
    }
    if let Some(tier) = args.tier {
        config.gateway.model = tier.model_name().to_string();
    }
    if let Some(ref model) = args.model {
        config.gateway.model = model.clone();
    }
    if args.double_check {
        config.pipeline.double_check = true;
    }
    if let Some(limit) = args.truncation_limit {
        config.pipeline.truncation_limit = limit;
    }
    if args.log_file.is_some() {
        config.log_file = args.log_file.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn chat(
    agent: &QueryAgent,
    guardrail: TopicGuardrail,
    persona: Option<DoctorPersona>,
) -> Result<()> {
    println!("Healthcare search agent. Type 'exit' to quit.");
    if let Some(ref persona) = persona {
        println!("Signed in as doctor {}.", persona.name());
    }
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        history.push(ChatMessage::user(line));
        if !guardrail.rail(&history).await {
            println!("{}", OFF_TOPIC_REPLY);
            history.push(ChatMessage::assistant(OFF_TOPIC_REPLY));
            continue;
        }

        let request = match persona {
            Some(ref persona) => persona.personalize(line),
            None => line.to_string(),
        };
        let envelope = agent.run_query_tool(&request).await;
        render(&envelope);
        let reply = match envelope.error {
            Some(ref error) => error.clone(),
            None => envelope.result.clone(),
        };
        history.push(ChatMessage::assistant(reply));
    }
    Ok(())
}

fn render(envelope: &QueryEnvelope) {
    if let Some(ref error) = envelope.error {
        println!("\nError: {}", error);
        return;
    }

    println!("\nUsed query: {}", envelope.user_query);
    let rows = JsonReader::new(Cursor::new(envelope.result.clone().into_bytes())).finish();
    match rows {
        Ok(df) if df.height() > 0 => println!("{}", df),
        Ok(_) => println!("(no rows)"),
        Err(_) => println!("{}", envelope.result),
    }
    if let Some(ref notice) = envelope.truncated {
        println!("{}", notice);
    }
}
