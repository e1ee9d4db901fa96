//! CLI commands for Duologue using clap.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{self, Settings};
use crate::core::dispatcher::Dispatcher;
use crate::core::types::{Priority, Role, SubmitOptions};
use crate::delivery::StrategyKind;
use crate::heartbeat::BUILTIN_PROMPTS;
use crate::relay::Relay;
use crate::transport::{HttpPushChannel, PushChannel};
use crate::ui::TracingUi;
use crate::web::{run_server, AppState, WebServerConfig};

/// Duologue - two agents, one priority queue.
#[derive(Parser)]
#[command(name = "duologue")]
#[command(version = "0.1.0")]
#[command(about = "Duologue - orchestrate a bounded conversation between two remote agents", long_about = None)]
pub struct Commands {
    /// Settings file (defaults to ~/.duologue/settings.json)
    #[arg(long, global = true, env = "DUOLOGUE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the dispatcher with its HTTP API
    Run {
        /// Override web port
        #[arg(short, long)]
        port: Option<u16>,

        /// Start the prompt loop regardless of settings
        #[arg(long = "loop")]
        with_loop: bool,

        /// First prompt sent when the loop starts
        #[arg(long)]
        initial_prompt: Option<String>,

        /// Submit relayed custom messages to the agents
        #[arg(long)]
        forward_relay: bool,
    },

    /// Send one prompt through the session poller and print the reply
    Send {
        /// Message to send
        message: String,

        /// Priority: low, normal, high, urgent
        #[arg(short, long, value_parser = parse_priority)]
        priority: Option<Priority>,

        /// Let the agents continue the conversation
        #[arg(long)]
        follow_up: bool,
    },

    /// Show or initialize settings
    Config {
        /// Write default settings if none exist
        #[arg(long)]
        init: bool,
    },

    /// List the loop prompt corpus
    Prompts,

    /// View logs
    Logs {
        /// Only lines containing this text
        filter: Option<String>,

        /// Number of lines
        #[arg(short = 'n', long, default_value_t = 120)]
        lines: usize,
    },
}

fn parse_priority(s: &str) -> std::result::Result<Priority, String> {
    match s.to_lowercase().as_str() {
        "low" | "1" => Ok(Priority::Low),
        "normal" | "2" => Ok(Priority::Normal),
        "high" | "3" => Ok(Priority::High),
        "urgent" | "4" => Ok(Priority::Urgent),
        _ => Err(format!("Unknown priority: {}", s)),
    }
}

impl Commands {
    pub async fn run(&self) -> Result<()> {
        let settings_path = match &self.config {
            Some(path) => path.clone(),
            None => config::get_settings_path()?,
        };

        match &self.command {
            Command::Run {
                port,
                with_loop,
                initial_prompt,
                forward_relay,
            } => {
                let mut settings = config::load_settings_from(&settings_path)?;
                if let Some(port) = port {
                    settings.web.port = *port;
                }
                if *with_loop {
                    settings.schedule.enabled = true;
                }
                if initial_prompt.is_some() {
                    settings.schedule.initial_prompt = initial_prompt.clone();
                }
                cmd_run(settings, *forward_relay).await
            }
            Command::Send {
                message,
                priority,
                follow_up,
            } => {
                let settings = config::load_settings_from(&settings_path)?;
                cmd_send(settings, message, *priority, *follow_up).await
            }
            Command::Config { init } => cmd_config(&settings_path, *init),
            Command::Prompts => {
                let settings = config::load_settings_from(&settings_path)?;
                cmd_prompts(&settings);
                Ok(())
            }
            Command::Logs { filter, lines } => cmd_logs(filter.as_deref(), *lines),
        }
    }
}

// Command implementations

async fn cmd_run(settings: Settings, forward_relay: bool) -> Result<()> {
    let dispatcher = Dispatcher::from_settings(&settings, Arc::new(TracingUi::new()));

    if dispatcher.strategy_kind() == StrategyKind::Correlator {
        match push_channels(&settings) {
            Some((a, b)) => dispatcher.register_channels(a, b)?,
            None => tracing::warn!(
                "No channel_id configured for both agents; push delivery stays unavailable \
                 until channels are registered"
            ),
        }
    }

    let relay = Arc::new(Relay::default());
    let forwarder = if forward_relay {
        Some(relay.forward_to(dispatcher.clone())?)
    } else {
        None
    };

    let prompt_loop = settings.schedule.enabled.then(|| {
        dispatcher.start_loop(
            settings.schedule.initial_prompt.clone(),
            settings.schedule.to_options(),
        )
    });

    let web = WebServerConfig::from_settings(&settings);
    println!("Duologue running ({} delivery)", dispatcher.strategy_kind());
    println!("API endpoints:");
    println!("  http://localhost:{}/api/submit", web.port);
    println!("  http://localhost:{}/api/agent-response", web.port);
    println!("  http://localhost:{}/api/custom-messages", web.port);
    println!("  http://localhost:{}/api/status", web.port);
    println!("  http://localhost:{}/health", web.port);
    println!();
    println!("Press Ctrl+C to stop");

    let state = AppState {
        dispatcher: dispatcher.clone(),
        relay: relay.clone(),
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    };
    run_server(web, state, shutdown)
        .await
        .context("Web server error")?;

    if let Some(handle) = prompt_loop {
        handle.stop();
    }
    relay.shutdown();
    if let Some(forwarder) = forwarder {
        let _ = forwarder.await;
    }
    tracing::info!(
        kind = "system",
        "Shut down with {} items pending",
        dispatcher.pending_len()
    );
    Ok(())
}

/// HTTP push channels for both agents, when both have a channel id.
fn push_channels(settings: &Settings) -> Option<(Arc<dyn PushChannel>, Arc<dyn PushChannel>)> {
    let author_id = settings
        .server
        .author_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let channel = |channel_id: &String| -> Arc<dyn PushChannel> {
        let mut channel = HttpPushChannel::new(&settings.server.base_url, channel_id, &author_id)
            .with_api_key(settings.server.api_key.clone());
        if let Some(server_id) = &settings.server.server_id {
            channel = channel.with_server_id(server_id);
        }
        Arc::new(channel)
    };

    let a = settings.agents.a.channel_id.as_ref()?;
    let b = settings.agents.b.channel_id.as_ref()?;
    Some((channel(a), channel(b)))
}

async fn cmd_send(
    mut settings: Settings,
    message: &str,
    priority: Option<Priority>,
    follow_up: bool,
) -> Result<()> {
    // One-shot sends have nobody to deliver push replies, so they always poll.
    settings.dispatch.strategy = StrategyKind::Poller;
    let dispatcher = Dispatcher::from_settings(&settings, Arc::new(TracingUi::new()));

    let options = SubmitOptions {
        skip_follow_up: !follow_up,
        priority,
    };
    let reply = dispatcher.submit(message, Role::System, options).await?;

    match reply {
        Some(reply) => {
            let name = settings.agents.names().of(reply.responder).to_string();
            println!("{}: {}", name, reply.text);
        }
        None => println!("(no reply)"),
    }

    if follow_up {
        while dispatcher.is_processing() || dispatcher.active_conversations() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    }
    Ok(())
}

fn cmd_config(path: &std::path::Path, init: bool) -> Result<()> {
    if init {
        if path.exists() {
            println!("Settings already exist: {}", path.display());
        } else {
            config::save_settings_to(path, &Settings::default())?;
            println!("Wrote default settings to {}", path.display());
        }
    }

    let settings = config::load_settings_from(path)?;
    println!("Settings file: {}", path.display());
    if !path.exists() {
        println!("(not found, showing defaults)");
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn cmd_prompts(settings: &Settings) {
    match settings.schedule.prompts.as_deref() {
        Some(prompts) if !prompts.is_empty() => {
            println!("Configured prompts ({}):", prompts.len());
            for prompt in prompts {
                println!("  - {}", prompt);
            }
        }
        _ => {
            println!("Built-in prompts ({}):", BUILTIN_PROMPTS.len());
            for prompt in BUILTIN_PROMPTS {
                println!("  - {}", prompt);
            }
        }
    }
}

fn cmd_logs(filter: Option<&str>, count: usize) -> Result<()> {
    let log_dir = crate::logging::get_log_dir()?;
    if !log_dir.exists() {
        println!("Log directory not found: {}", log_dir.display());
        return Ok(());
    }

    // The daily appender suffixes the date; the newest file sorts last.
    let mut files: Vec<PathBuf> = std::fs::read_dir(&log_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(crate::logging::LOG_FILE))
        })
        .collect();
    files.sort();

    let Some(file) = files.last() else {
        println!("No log files in {}", log_dir.display());
        return Ok(());
    };

    let content = std::fs::read_to_string(file)?;
    let mut lines: Vec<&str> = content.lines().collect();
    if let Some(needle) = filter {
        let needle = needle.to_lowercase();
        lines.retain(|l| l.to_lowercase().contains(&needle));
    }
    let start = lines.len().saturating_sub(count);
    for line in &lines[start..] {
        println!("{}", line);
    }
    Ok(())
}
