use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use iqac_core_sdk::config::AiSettings;
use iqac_core_sdk::drafting::{self, DraftField};
use iqac_core_sdk::llm::backend_order;
use iqac_core_sdk::{db, json_extract, sanitize, server, telemetry};
use iqac_core_sdk::{AiClient, AiConfig, ChatMessage, ChatOptions, FactValue, Facts};

/**
 * \brief Command-line entry for the IQAC AI assistant.
 */
#[derive(Parser, Debug)]
#[command(name = "iqac-ai", version, about = "IQAC report assistant: chat, drafting and sanitizing")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief Store AI settings; only the flags given are changed.
     */
    Configure {
        /// Preferred backend: local or remote.
        #[arg(long)]
        backend: Option<String>,
        #[arg(long)]
        local_base_url: Option<String>,
        #[arg(long)]
        local_model: Option<String>,
        #[arg(long)]
        remote_endpoint: Option<String>,
        #[arg(long)]
        remote_model: Option<String>,
        #[arg(long)]
        remote_api_key: Option<String>,
        #[arg(long, conflicts_with = "remote_api_key")]
        clear_remote_api_key: bool,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        probe_timeout_ms: Option<u64>,
        /// Write logs to the log directory instead of stderr.
        #[arg(long)]
        file_logging: Option<bool>,
    },

    /** \brief Print the effective configuration with the API key masked. */
    ShowConfig,

    /**
     * \brief Send one prompt through the backend chain and print the reply.
     */
    Chat {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        system: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /**
     * \brief Draft a report field from facts and save it to history.
     */
    Draft {
        /// summary, need_analysis, objectives, learning_outcomes or outcomes_impact
        field: DraftField,
        #[command(flatten)]
        facts: FactArgs,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = false)]
        no_save: bool,
    },

    /** \brief Sanitize text (argument or stdin) against facts. */
    Sanitize {
        text: Option<String>,
        #[command(flatten)]
        facts: FactArgs,
    },

    /** \brief Parse model output (argument or stdin) as JSON and pretty-print it. */
    ParseJson { text: Option<String> },

    /** \brief List saved drafts, newest first. */
    Drafts {
        #[arg(long)]
        field: Option<DraftField>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /** \brief Serve the HTTP API. */
    Serve {
        #[arg(long, default_value = "127.0.0.1:8088")]
        addr: String,
    },
}

#[derive(clap::Args, Debug)]
struct FactArgs {
    /// JSON object file of facts ("-" for stdin).
    #[arg(long)]
    facts: Option<PathBuf>,
    /// A single fact as key=value; repeat the key to build a list.
    #[arg(long = "fact", value_name = "KEY=VALUE")]
    fact: Vec<String>,
}

impl FactArgs {
    fn load(&self) -> Result<Facts> {
        let mut facts: Facts = match &self.facts {
            Some(path) if path.as_os_str() == "-" => serde_json::from_str(&read_stdin()?)
                .context("facts on stdin are not a JSON object")?,
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read facts file {} failed", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("facts file {} is not a JSON object", path.display()))?
            }
            None => Facts::new(),
        };
        for pair in &self.fact {
            let Some((key, value)) = pair.split_once('=') else {
                bail!("--fact expects KEY=VALUE, got `{}`", pair);
            };
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            let merged = match facts.remove(&key) {
                Some(FactValue::Text(prev)) => FactValue::List(vec![prev, value]),
                Some(FactValue::List(mut items)) => {
                    items.push(value);
                    FactValue::List(items)
                }
                Some(FactValue::Empty) | None => FactValue::Text(value),
            };
            facts.insert(key, merged);
        }
        Ok(facts)
    }
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("read stdin failed")?;
    Ok(buf)
}

fn text_or_stdin(text: Option<String>) -> Result<String> {
    match text {
        Some(t) => Ok(t),
        None => read_stdin(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let conn = db::open_default_db().context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let to_file = db::get_file_logging_enabled(&conn).unwrap_or(false);
    telemetry::init(&telemetry::LogOptions {
        json: cli.log_json,
        to_file,
    })
    .context("initialise logging failed")?;

    match cli.command {
        Commands::Configure {
            backend,
            local_base_url,
            local_model,
            remote_endpoint,
            remote_model,
            remote_api_key,
            clear_remote_api_key,
            timeout_secs,
            probe_timeout_ms,
            file_logging,
        } => {
            let settings = AiSettings {
                backend,
                local_base_url,
                local_model,
                remote_endpoint,
                remote_model,
                remote_api_key,
                timeout_secs,
                probe_timeout_ms,
            };
            db::save_ai_settings(&conn, &settings).context("save settings failed")?;
            if clear_remote_api_key {
                db::clear_remote_api_key(&conn).context("clear API key failed")?;
            }
            if let Some(enabled) = file_logging {
                db::set_file_logging_enabled(&conn, enabled)
                    .context("save logging setting failed")?;
            }
            println!("Settings saved.");
        }
        Commands::ShowConfig => {
            let config = db::resolve_ai_config(&conn).context("load settings failed")?;
            let order: Vec<&str> = backend_order(&config).into_iter().map(|k| k.name()).collect();
            println!("backend preference : {}", config.preference);
            println!("backend order      : {}", order.join(" -> "));
            println!("local base url     : {}", config.local_base_url);
            println!("local model        : {}", config.local_model);
            println!("remote endpoint    : {}", config.remote_endpoint);
            println!("remote model       : {}", config.remote_model);
            println!(
                "remote api key     : {}",
                config.masked_api_key().unwrap_or_else(|| "(not set)".to_string())
            );
            println!("request timeout    : {}s", config.request_timeout.as_secs());
            println!("probe timeout      : {}ms", config.probe_timeout.as_millis());
        }
        Commands::Chat {
            prompt,
            system,
            model,
            temperature,
            timeout_secs,
        } => {
            let client = build_client(db::resolve_ai_config(&conn).context("load settings failed")?)?;
            let options = ChatOptions {
                system,
                model,
                temperature,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            let reply = client
                .chat_detailed(&[ChatMessage::user(prompt)], &options)
                .await?;
            tracing::debug!(backend = %reply.backend, "reply printed");
            println!("{}", reply.text);
        }
        Commands::Draft {
            field,
            facts,
            model,
            no_save,
        } => {
            let facts = facts.load()?;
            let client = build_client(db::resolve_ai_config(&conn).context("load settings failed")?)?;
            let options = ChatOptions {
                model,
                ..Default::default()
            };
            let draft = drafting::draft(&client, field, &facts, &options).await?;
            println!("{}", draft.text);
            if !no_save {
                let id = db::insert_draft(&conn, &draft, &facts).context("save draft failed")?;
                eprintln!("Saved draft id={} ({} via {})", id, draft.field, draft.backend);
            }
        }
        Commands::Sanitize { text, facts } => {
            let facts = facts.load()?;
            let text = text_or_stdin(text)?;
            println!("{}", sanitize::sanitize(&text, &facts));
        }
        Commands::ParseJson { text } => {
            let text = text_or_stdin(text)?;
            let value = json_extract::parse_model_json(&text)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Drafts { field, limit } => {
            let drafts = db::list_drafts(&conn, field, limit).context("load drafts failed")?;
            if drafts.is_empty() {
                println!("No drafts saved.");
            }
            for d in drafts {
                println!("#{} [{}] {} via {}", d.id, d.field, d.created_at, d.backend);
                println!("{}\n", d.content);
            }
        }
        Commands::Serve { addr } => {
            let client = build_client(db::resolve_ai_config(&conn).context("load settings failed")?)?;
            server::run(&addr, client).await?;
        }
    }

    Ok(())
}

/**
 * \brief Client for the effective configuration: defaults, stored settings, then env.
 */
fn build_client(config: AiConfig) -> Result<AiClient> {
    tracing::debug!(preference = %config.preference, "building AI client");
    Ok(AiClient::new(config)?)
}
