use clap::{Parser, ValueEnum};
use friendlychat::backend::memory::MemoryBackend;
use friendlychat::backend::{Backend, BackendError, Credentials, IdpProvider};
use friendlychat::firebase::{ConfigError, FirebaseApp, FirebaseConfig};
use friendlychat::{Message, ScreenSettings, terminal};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum ClientError {
    #[error("firebase config: {0}")]
    Config(#[from] ConfigError),
    #[error("backend setup failed: {0}")]
    Backend(#[from] BackendError),
    #[error("terminal i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Firebase project configured through FIREBASE_* variables.
    Firebase,
    /// Single-process demo with a seeded `demo@example.com` / `demo` account.
    Memory,
}

#[derive(Parser, Debug)]
#[command(name = "friendlychat", about = "FriendlyChat terminal client")]
struct Cli {
    #[arg(long, env = "FRIENDLYCHAT_BACKEND", value_enum, default_value_t = BackendKind::Firebase)]
    backend: BackendKind,

    /// Sign in with this email on start instead of prompting.
    #[arg(long, env = "FRIENDLYCHAT_EMAIL", requires = "password")]
    email: Option<String>,

    #[arg(long, env = "FRIENDLYCHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Sign in with a Google id token on start instead of prompting.
    #[arg(long, env = "FRIENDLYCHAT_GOOGLE_ID_TOKEN", hide_env_values = true, conflicts_with = "email")]
    google_id_token: Option<String>,

    /// Skip the remote config cache window. Defaults to on in debug builds.
    #[arg(long, env = "FRIENDLYCHAT_DEVELOPER_MODE")]
    developer_mode: Option<bool>,
}

impl Cli {
    fn preset(&self) -> Option<Credentials> {
        if let Some(id_token) = &self.google_id_token {
            return Some(Credentials::Federated { provider: IdpProvider::Google, id_token: id_token.clone() });
        }
        match (&self.email, &self.password) {
            (Some(email), Some(password)) => {
                Some(Credentials::EmailPassword { email: email.clone(), password: password.clone() })
            }
            _ => None,
        }
    }

    fn settings(&self) -> ScreenSettings {
        let mut settings = ScreenSettings::default();
        if let Some(developer_mode) = self.developer_mode {
            settings.developer_mode = developer_mode;
        }
        settings
    }
}

fn memory_backend() -> Backend {
    let memory = MemoryBackend::new();
    memory
        .auth
        .register_password("demo@example.com", "demo", Some("Demo"));
    memory
        .messages
        .insert_remote(Message::text("Welcome to FriendlyChat", "FriendlyChat"));
    memory.backend()
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let _ = dotenvy::dotenv();

    // stdout carries the conversation; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let backend = match cli.backend {
        BackendKind::Firebase => {
            let config = FirebaseConfig::from_env()?;
            tracing::info!(project = %config.project_id, "starting against firebase");
            FirebaseApp::new(config)?.backend()
        }
        BackendKind::Memory => {
            tracing::info!("starting against in-memory backend");
            memory_backend()
        }
    };

    terminal::run(backend, cli.settings(), cli.preset()).await?;
    Ok(())
}
