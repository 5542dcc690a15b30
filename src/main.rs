use chat_keeper::auth::{SessionStore, StaticUserDirectory};
use chat_keeper::backup::{BackupEndpoint, RemoteAvailabilityProber, RemoteBackupWriter};
use chat_keeper::chat::ChatSession;
use chat_keeper::completion::ChatCompletionClient;
use chat_keeper::config::{self, AppConfig, ConfigSource};
use chat_keeper::store::LocalHistoryStore;
use chat_keeper::{backup_server, logging, HistorySync, Message};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "chat-keeper")]
#[command(about = "Chat with a local model and keep the history backed up")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(short, long, env = "CHAT_KEEPER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and chat on stdin
    Chat {
        /// Account email; falls back to the remembered one
        #[arg(short, long)]
        email: Option<String>,

        #[arg(short, long, env = "CHAT_KEEPER_PASSWORD")]
        password: String,

        /// Remember the email for next time
        #[arg(long)]
        remember: bool,

        /// Backup service base URL, overriding the settings file
        #[arg(long, env = "CHAT_KEEPER_BACKUP_URL")]
        backup_url: Option<String>,
    },
    /// Run the companion backup service
    ServeBackup {
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,

        #[arg(short, long, default_value_t = 3001)]
        port: u16,

        /// Directory the latest backup is written to
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let (mut app_config, source) = config::load_or_initialize_config(&config_path)?;
    let data_dir = app_config.data_dir()?;
    let _log_guard = logging::init_logging(&data_dir.join("logs"))?;
    info!(config = %config_path.display(), data_dir = %data_dir.display(), "Starting chat-keeper");
    match source {
        ConfigSource::File => {}
        ConfigSource::Initialized => {
            info!(path = %config_path.display(), "Wrote default settings file")
        }
        ConfigSource::InvalidFile(reason) => {
            warn!(path = %config_path.display(), "Invalid settings file, using defaults: {}", reason)
        }
    }

    match cli.command {
        Command::ServeBackup { bind, port, dir } => {
            let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
            let listener = tokio::net::TcpListener::bind(addr).await?;
            backup_server::serve(listener, dir).await?;
        }
        Command::Chat {
            email,
            password,
            remember,
            backup_url,
        } => {
            if let Some(url) = backup_url {
                app_config.backup.base_url = url;
            }
            run_chat(app_config, data_dir, email, password, remember).await?;
        }
    }
    Ok(())
}

async fn run_chat(
    app_config: AppConfig,
    data_dir: PathBuf,
    email: Option<String>,
    password: String,
    remember: bool,
) -> Result<(), BoxError> {
    let users = StaticUserDirectory::from_file(&app_config.users_file()?).await?;
    let session = SessionStore::in_dir(&data_dir);

    let email = match email {
        Some(email) => email,
        None => session
            .remembered_email()
            .await
            .ok_or("no --email given and none remembered")?,
    };
    session.sign_in(&users, &email, &password, remember).await?;

    let endpoint = BackupEndpoint::new(
        app_config.backup.base_url.clone(),
        Duration::from_secs(app_config.backup.timeout_secs),
    )?;
    let sync = Arc::new(HistorySync::new(
        LocalHistoryStore::in_dir(&data_dir),
        Arc::new(RemoteAvailabilityProber::new(endpoint.clone())),
        Arc::new(RemoteBackupWriter::new(endpoint)),
    ));
    let completion = Arc::new(ChatCompletionClient::new(app_config.chat.clone())?);
    let mut chat = ChatSession::start(sync, completion, &session).await?;

    for message in chat.messages() {
        print_message(&chat, message);
    }
    println!("Type a message. /refresh reloads history, /logout signs out, /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/logout" => {
                chat.flush_backups().await;
                session.sign_out().await?;
                break;
            }
            "/refresh" => {
                chat.refresh().await;
                for message in chat.messages() {
                    print_message(&chat, message);
                }
            }
            text => match chat.send(text).await {
                Ok(reply) => print_message(&chat, &reply),
                Err(e) => eprintln!("Error: {}", e.user_message()),
            },
        }
    }
    chat.flush_backups().await;
    Ok(())
}

fn print_message(chat: &ChatSession, message: &Message) {
    let who = if chat.is_own(message) { "you" } else { message.sender.as_str() };
    println!(
        "[{}] {}: {}",
        message.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"),
        who,
        message.message
    );
}
