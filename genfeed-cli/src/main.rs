use clap::{Parser, Subcommand};
use genfeed_client::{ConnectionStatus, LoadOutcome, SessionCredential, SubmitRequest, TaskFeed};
use genfeed_core::config::GenfeedConfig;
use genfeed_core::{GenerationKind, TaskId};

#[derive(Parser)]
#[command(
    name = "genfeed",
    version = "0.1.0",
    about = "Live generation history: paginated tasks kept current over server-sent events"
)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Session token (falls back to GENFEED_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the notification stream and keep the task list current
    Watch,
    /// Print the task history, newest first
    List {
        /// Number of pages to fetch
        #[arg(short, long, default_value = "1")]
        pages: u32,
    },
    /// Submit a generation request
    Submit {
        #[arg(short, long, default_value = "image")]
        kind: GenerationKind,
        #[arg(short, long)]
        prompt: String,
        /// Extra generation parameter as key=value (JSON values accepted)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
    },
    /// Delete a task
    Delete { id: TaskId },
}

fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn init_tracing(config: &GenfeedConfig) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => {
            let level = config.log_level.map(|l| l.as_filter()).unwrap_or("info");
            tracing_subscriber::EnvFilter::new(level)
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 1. Load config file, then env overrides
    let mut config = genfeed_core::config::load_config_file(cli.config.as_deref())?;
    if let Ok(base_url) = std::env::var("GENFEED_BASE_URL") {
        config.base_url = Some(base_url);
    }
    init_tracing(&config);

    // 2. Resolve session: flag > env
    let token = cli
        .token
        .or_else(|| std::env::var("GENFEED_TOKEN").ok())
        .ok_or("no session token: pass --token or set GENFEED_TOKEN")?;
    let credential = SessionCredential::new(token);
    if !credential.is_authenticated() {
        return Err("session token is expired".into());
    }

    // 3. Build feed
    let feed = TaskFeed::from_config(&config, &credential)?;

    match cli.command {
        Commands::Watch => watch(&feed, &credential).await,
        Commands::List { pages } => {
            feed.refresh().await?;
            for _ in 1..pages {
                if let LoadOutcome::Skipped | LoadOutcome::Failed = feed.load_more().await? {
                    break;
                }
            }
            for task in feed.snapshot() {
                println!("{}", serde_json::to_string(&task)?);
            }
            Ok(())
        }
        Commands::Submit {
            kind,
            prompt,
            params,
        } => {
            let mut request = SubmitRequest::new(kind, prompt);
            for (key, value) in params {
                request = request.param(&key, value);
            }
            let task_id = feed.submit(request).await?;
            println!("{task_id}");
            Ok(())
        }
        Commands::Delete { id } => {
            feed.delete(id).await?;
            Ok(())
        }
    }
}

async fn watch(
    feed: &TaskFeed,
    credential: &SessionCredential,
) -> Result<(), Box<dyn std::error::Error>> {
    let _notifications = feed.stream().on_any(|event| match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "failed to print notification"),
    });
    let _signals = feed.stream().signals().subscribe(|signal| {
        if let Some(ctx) = signal.context().filter(|_| signal.is_terminal()) {
            tracing::info!(task_id = ?ctx.task_id, kind = %ctx.kind, ?signal, "task finished");
        }
    });

    let mut status = feed.stream().watch_status();
    feed.start(credential);
    feed.refresh().await?;
    tracing::info!(loaded = feed.snapshot().len(), "watching for notifications");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                tracing::debug!(status = ?current, "connection status");
                if current == ConnectionStatus::AwaitingAuth {
                    feed.stop();
                    return Err("session rejected by server, log in again".into());
                }
            }
        }
    }

    feed.stop();
    Ok(())
}
