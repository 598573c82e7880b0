mod storage;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use registro::config::{API_BASE_URL_ENV, ConfigError};
use registro::session::StorageError;
use registro::store::validate_login_input;
use registro::users::{NewUser, UserAdmin, UserAdminError, UserUpdate};
use registro::{
    ApiClient, ApiError, ClientConfig, GuardDecision, LoginError, LogoutNotice, NavigationController,
    NavigationGuard, Navigator, RouteTable, SessionContext, SessionStore,
};
use serde_json::Value;

use crate::storage::{FileSessionStorage, SESSION_FILE_ENV, default_session_path};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{}", .0.user_message())]
    Login(#[from] LoginError),
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("session expired; run `registro login` again")]
    SessionExpired,
    #[error("{}", describe_api_error(.0))]
    Api(ApiError),
    #[error("{0}")]
    Users(UserAdminError),
    #[error("session storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("could not read input: {0}")]
    Io(#[from] io::Error),
}

impl From<ApiError> for CliError {
    fn from(err: ApiError) -> Self {
        if err.is_session_expired() { Self::SessionExpired } else { Self::Api(err) }
    }
}

fn describe_api_error(err: &ApiError) -> String {
    match err.detail() {
        Some(detail) => format!("{err}: {detail}"),
        None => err.to_string(),
    }
}

impl From<UserAdminError> for CliError {
    fn from(err: UserAdminError) -> Self {
        match err {
            UserAdminError::Api(api) => api.into(),
            other => Self::Users(other),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "registro", about = "Registro session and API CLI")]
struct Cli {
    /// Backend base URL.
    #[arg(long, env = API_BASE_URL_ENV)]
    base_url: Option<String>,

    /// Where the session token and user are kept between invocations.
    #[arg(long, env = SESSION_FILE_ENV)]
    session_file: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session.
    Login {
        #[arg(long, short)]
        username: String,
        /// Read from stdin when omitted.
        #[arg(long, env = "REGISTRO_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// End the session locally, notifying the backend when reachable.
    Logout,
    /// Show the stored identity.
    Whoami,
    /// Evaluate the navigation guard for a route path.
    Check { path: String },
    /// Authenticated GET, printing the JSON response.
    Get { path: String },
    /// Authenticated POST with a JSON body.
    Post {
        path: String,
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// Authenticated DELETE.
    Delete { path: String },
    /// Admin user management.
    Users(UsersCommand),
}

#[derive(Args, Debug)]
struct UsersCommand {
    #[command(subcommand)]
    command: UsersSubcommand,
}

#[derive(Subcommand, Debug)]
enum UsersSubcommand {
    List,
    Create {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long, default_value = "gestor")]
        role: String,
        /// ISO date after which the account can no longer log in.
        #[arg(long)]
        expires_on: Option<String>,
    },
    Update {
        id: i64,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        expires_on: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    Delete { id: i64 },
    VerifyPassword {
        #[arg(long, env = "REGISTRO_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

/// Terminal stand-in for the login redirect.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn current_path(&self) -> Option<String> {
        None
    }

    fn redirect(&self, _path: &str) {
        eprintln!("session ended; run `registro login` to sign in again");
    }
}

struct CliContext {
    store: SessionStore,
    guard: NavigationGuard,
}

impl CliContext {
    fn open(cli: &Cli) -> Result<Self, CliError> {
        let mut config = ClientConfig::from_env()?;
        if let Some(base_url) = &cli.base_url {
            config = config.with_base_url(base_url)?;
        }
        if let Some(secs) = cli.timeout_secs.filter(|s| *s > 0) {
            config.request_timeout = Some(Duration::from_secs(secs));
        }

        let path = cli.session_file.clone().unwrap_or_else(default_session_path);
        tracing::debug!(path = %path.display(), base_url = %config.base_url, "opening session");
        let session = SessionContext::hydrate(Arc::new(FileSessionStorage::open(path)));
        let controller = Arc::new(NavigationController::new(TerminalNavigator));
        let client = ApiClient::native(config, session.clone(), controller)?;

        Ok(Self {
            store: SessionStore::new(client),
            guard: NavigationGuard::new(RouteTable::default(), session),
        })
    }

    fn client(&self) -> &ApiClient {
        self.store.client()
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt().with_writer(io::stderr).with_max_level(level).init();

    let ctx = CliContext::open(&cli)?;
    match cli.command {
        Command::Login { username, password } => run_login(&ctx, &username, password).await,
        Command::Logout => run_logout(&ctx).await,
        Command::Whoami => run_whoami(&ctx),
        Command::Check { path } => {
            println!("{}", describe_decision(ctx.guard.check(&path)));
            Ok(())
        }
        Command::Get { path } => {
            let json: Value = ctx.client().get_json(&path).await?;
            print_json(&json)
        }
        Command::Post { path, data } => {
            let body = serde_json::from_str::<Value>(&data)?;
            let json: Value = ctx.client().post_json(&path, &body).await?;
            print_json(&json)
        }
        Command::Delete { path } => {
            let json: Value = ctx.client().delete(&path).await?;
            print_json(&json)
        }
        Command::Users(users) => run_users(&ctx, users).await,
    }
}

async fn run_login(ctx: &CliContext, username: &str, password: Option<String>) -> Result<(), CliError> {
    let password = match password {
        Some(password) => password,
        None => prompt_password()?,
    };
    let (username, password) = validate_login_input(username, &password).map_err(CliError::InvalidInput)?;
    let user = ctx.store.login(&username, &password).await?;
    println!("logged in as {} ({})", user.display_name(), user.role);
    Ok(())
}

async fn run_logout(ctx: &CliContext) -> Result<(), CliError> {
    if !ctx.store.is_authenticated() {
        println!("not logged in");
        return Ok(());
    }
    if let LogoutNotice::Unacknowledged(e) = ctx.store.logout().await {
        eprintln!("warning: backend did not acknowledge logout: {e}");
    }
    println!("logged out");
    Ok(())
}

fn run_whoami(ctx: &CliContext) -> Result<(), CliError> {
    let session = ctx.store.session().snapshot();
    if !session.is_authenticated() {
        println!("not logged in");
        return Ok(());
    }
    match session.user {
        Some(user) => print_json(&serde_json::to_value(&user)?),
        None => {
            println!("logged in (identity unknown)");
            Ok(())
        }
    }
}

async fn run_users(ctx: &CliContext, users: UsersCommand) -> Result<(), CliError> {
    let admin = UserAdmin::new(ctx.client().clone());
    match users.command {
        UsersSubcommand::List => print_json(&serde_json::to_value(admin.list().await?)?),
        UsersSubcommand::Create { username, password, full_name, role, expires_on } => {
            let user = NewUser {
                username,
                full_name,
                role: Some(role),
                is_active: Some(1),
                expires_on,
                password,
            };
            print_json(&serde_json::to_value(admin.create(&user).await?)?)
        }
        UsersSubcommand::Update { id, full_name, role, active, expires_on, password } => {
            let update = UserUpdate {
                full_name,
                role,
                is_active: active.map(i64::from),
                expires_on,
                password,
            };
            print_json(&serde_json::to_value(admin.update(id, update).await?)?)
        }
        UsersSubcommand::Delete { id } => {
            let message = admin.delete(id).await?;
            println!("{}", message.unwrap_or_else(|| format!("deleted user {id}")));
            Ok(())
        }
        UsersSubcommand::VerifyPassword { password } => {
            let password = match password {
                Some(password) => password,
                None => prompt_password()?,
            };
            admin.verify_password(&password).await?;
            println!("password verified");
            Ok(())
        }
    }
}

fn describe_decision(decision: GuardDecision) -> String {
    match decision {
        GuardDecision::Allow => "allow".to_owned(),
        GuardDecision::Redirect(target) => format!("redirect {target}"),
    }
}

fn prompt_password() -> Result<String, CliError> {
    eprint!("password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
