use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};

use hub_chat::api::{ApiError, HubApiClient};
use hub_chat::channel::WsConnector;
use hub_chat::config::{ChannelConfig, ChatConfig, ServerConfig};
use hub_chat::controller::{
    ControllerConfig, ConversationController, PendingStatus, SendOutcome, TranscriptEntry,
    ViewUpdate, contact_landlord,
};
use hub_chat::directory::ConversationDirectory;
use hub_chat::protocol::{Identity, Message};
use hub_chat::session::{SessionContext, SessionStore};

const APP_NAME: &str = "hubchat";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn async_main(ctx: RuntimeContext, command: Command) -> Result<()> {
    match command {
        Command::Login(cmd) => handle_login(&ctx, cmd).await,
        Command::Conversations => handle_conversations(&ctx).await,
        Command::History(cmd) => handle_history(&ctx, cmd).await,
        Command::Chat(cmd) => handle_chat(&ctx, cmd).await,
        Command::Contact(cmd) => handle_contact(&ctx, cmd).await,
        other => Err(anyhow!("{other:?} does not need the async runtime")),
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    match cli.command {
        Command::Logout => handle_logout(&ctx),
        Command::Whoami => handle_whoami(&ctx),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
        command => async_main(ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "hubchat - Housing Hub conversations from the terminal.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Override the backend base URL
    #[arg(long = "api-url", value_name = "URL", global = true)]
    api_url: Option<String>,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and store the session
    Login(LoginCommand),
    /// Forget the stored session
    Logout,
    /// Show the signed-in identity
    Whoami,
    /// List your conversations
    Conversations,
    /// Print the message history of a conversation
    History(HistoryCommand),
    /// Open a conversation and chat interactively
    Chat(ChatCommand),
    /// Start a conversation with a listing's landlord (students only)
    Contact(ContactCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct LoginCommand {
    /// Account email
    #[arg(long)]
    email: String,
    /// Account password (read from stdin when omitted)
    #[arg(long, env = "HUBCHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct HistoryCommand {
    /// Conversation to print
    #[arg(value_name = "CONVERSATION_ID")]
    conversation_id: String,
}

#[derive(Debug, Clone, Args)]
struct ChatCommand {
    /// Conversation to open right away
    #[arg(value_name = "CONVERSATION_ID")]
    conversation_id: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ContactCommand {
    /// Listing the conversation is about
    #[arg(long, value_name = "ID")]
    listing: String,
    /// Landlord who owns the listing
    #[arg(long, value_name = "ID")]
    landlord: String,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let mut paths = AppPaths::discover(common.config.clone())?;
        let mut config = load_or_init_config(&mut paths, &common)?;
        if let Some(ref url) = common.api_url {
            config.server.api_url = url.clone();
        }
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("hubchat={level},hub_chat={level}")));

        let log_file = self.open_log_file()?;
        let file_layer = match log_file {
            Some(ref file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file.try_clone().context("duplicating log file")?))
                    .with_ansi(false),
            ),
            None => None,
        };

        if self.common.json {
            tracing_subscriber::registry()
                .with(file_layer)
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(file_layer)
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // The library logs through `log`.
        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(&self.config.logging.level),
        );
        builder.filter_level(self.effective_log_level());
        if let Some(file) = log_file {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        builder.try_init().ok();

        Ok(())
    }

    /// Open `logging.file` for appending. Nothing is opened on a dry run.
    fn open_log_file(&self) -> Result<Option<fs::File>> {
        let Some(ref path) = self.config.logging.file else {
            return Ok(None);
        };
        if self.common.dry_run {
            return Ok(None);
        }

        let path = Path::new(path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        Ok(Some(file))
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Warn),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            info!(
                "dry-run: would ensure state dir {}",
                self.paths.state_dir.display()
            );
            return Ok(());
        }

        fs::create_dir_all(&self.paths.state_dir).with_context(|| {
            format!(
                "creating state directory {}",
                self.paths.state_dir.display()
            )
        })?;
        Ok(())
    }

    fn session_store(&self) -> SessionStore {
        SessionStore::new(&self.paths.state_dir)
    }

    /// The stored session, or an error telling the user to sign in.
    fn require_session(&self) -> Result<SessionContext> {
        let store = self.session_store();
        let credential = store
            .load()
            .context("reading stored session")?
            .ok_or_else(|| anyhow!("not signed in; run `{APP_NAME} login --email <EMAIL>`"))?;
        Ok(SessionContext::signed_in(credential))
    }

    fn api_client(&self, session: SessionContext) -> Result<HubApiClient> {
        HubApiClient::new(
            &self.config.server.api_url,
            session,
            self.config.server.request_timeout(),
        )
        .context("building HTTP client")
    }

    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            channel: self.config.channel.clone(),
            chat: self.config.chat.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
    state_dir: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self {
            config_file,
            state_dir: default_state_dir()?,
        })
    }

    fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref state_override) = cfg.paths.state_dir {
            self.state_dir = expand_str_path(state_override)?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    logging: LoggingConfig,
    server: ServerConfig,
    channel: ChannelConfig,
    chat: ChatConfig,
    paths: PathsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            channel: ChannelConfig::default(),
            chat: ChatConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
    file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct PathsConfig {
    state_dir: Option<String>,
}

async fn handle_login(ctx: &RuntimeContext, cmd: LoginCommand) -> Result<()> {
    let password = match cmd.password {
        Some(password) => password,
        None => read_password().await?,
    };

    let client = ctx.api_client(SessionContext::new())?;
    let credential = client
        .login(&cmd.email, &password)
        .await
        .with_context(|| format!("signing in as {}", cmd.email))?;

    let store = ctx.session_store();
    if ctx.common.dry_run {
        info!("dry-run: would store session at {}", store.path().display());
    } else {
        store.save(&credential).context("storing session")?;
    }

    print_identity(ctx, &credential.identity)
}

async fn read_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush().ok();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    lines
        .next_line()
        .await
        .context("reading password from stdin")?
        .ok_or_else(|| anyhow!("no password given"))
}

fn handle_logout(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.session_store();
    if ctx.common.dry_run {
        info!("dry-run: would remove {}", store.path().display());
        return Ok(());
    }

    if store.clear().context("removing stored session")? {
        println!("Signed out.");
    } else {
        println!("Not signed in.");
    }
    Ok(())
}

fn handle_whoami(ctx: &RuntimeContext) -> Result<()> {
    match ctx.session_store().load().context("reading stored session")? {
        Some(credential) => print_identity(ctx, &credential.identity),
        None => {
            println!("Not signed in.");
            Ok(())
        }
    }
}

fn print_identity(ctx: &RuntimeContext, identity: &Identity) -> Result<()> {
    if ctx.common.json {
        println!(
            "{}",
            serde_json::to_string_pretty(identity).context("serializing identity to JSON")?
        );
    } else if ctx.common.yaml {
        println!(
            "{}",
            serde_yaml::to_string(identity).context("serializing identity to YAML")?
        );
    } else {
        println!("{} ({}, id {})", identity.email, identity.role, identity.id);
    }
    Ok(())
}

async fn handle_conversations(ctx: &RuntimeContext) -> Result<()> {
    let session = ctx.require_session()?;
    let identity = session
        .identity()
        .ok_or_else(|| anyhow!("stored session has no identity"))?;
    let client = ctx.api_client(session)?;

    let directory = ConversationDirectory::load(&client)
        .await
        .map_err(hint_login)
        .context("loading conversations")?;

    if ctx.common.json {
        println!(
            "{}",
            serde_json::to_string_pretty(directory.conversations())
                .context("serializing conversations to JSON")?
        );
        return Ok(());
    }
    if ctx.common.yaml {
        println!(
            "{}",
            serde_yaml::to_string(directory.conversations())
                .context("serializing conversations to YAML")?
        );
        return Ok(());
    }

    if directory.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }
    for conversation in directory.conversations() {
        println!(
            "{}  {}  {}",
            conversation.id,
            conversation.counterparty(identity.role).email,
            conversation.listing.title
        );
    }
    Ok(())
}

async fn handle_history(ctx: &RuntimeContext, cmd: HistoryCommand) -> Result<()> {
    let session = ctx.require_session()?;
    let identity = session
        .identity()
        .ok_or_else(|| anyhow!("stored session has no identity"))?;
    let client = ctx.api_client(session)?;

    let messages = client
        .messages(&cmd.conversation_id)
        .await
        .map_err(hint_login)
        .with_context(|| format!("loading history of {}", cmd.conversation_id))?;

    if ctx.common.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&messages).context("serializing history to JSON")?
        );
        return Ok(());
    }

    for message in &messages {
        println!("{}", format_message(message, &identity, None));
    }
    Ok(())
}

async fn handle_contact(ctx: &RuntimeContext, cmd: ContactCommand) -> Result<()> {
    let session = ctx.require_session()?;
    let identity = session
        .identity()
        .ok_or_else(|| anyhow!("stored session has no identity"))?;
    let client = ctx.api_client(session)?;

    let conversation_id = contact_landlord(&client, &identity, &cmd.listing, &cmd.landlord)
        .await
        .context("starting conversation")?;

    println!("{conversation_id}");
    Ok(())
}

async fn handle_chat(ctx: &RuntimeContext, cmd: ChatCommand) -> Result<()> {
    let session = ctx.require_session()?;
    let store = ctx.session_store();
    let client = ctx.api_client(session.clone())?;
    let connector = WsConnector::new(ctx.config.server.websocket_url());

    let mut controller = ConversationController::mount(
        Arc::new(client),
        session.clone(),
        Arc::new(connector),
        ctx.controller_config(),
        cmd.conversation_id.as_deref(),
    )
    .await
    .context("opening conversations")?;

    if let Some(error) = controller.directory().load_error() {
        eprintln!("Could not load conversations: {error}");
    }
    if controller.selected().is_none() {
        if let Some(ref id) = cmd.conversation_id {
            eprintln!("Conversation {id} is not one of yours.");
        }
        print_directory(&controller);
        eprintln!("Use /switch <id> to open one, /logout to sign out, /quit to leave.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Logout => {
                        end_session(&store, &session, ctx.common.dry_run)?;
                    }
                    Input::List => print_directory(&controller),
                    Input::Switch(id) => {
                        if let Err(e) = controller.select_by_id(id) {
                            eprintln!("{e}");
                        }
                    }
                    Input::Send(text) => report_send(controller.send_message(text)),
                }
            }
            update = controller.next_update() => {
                render_update(&controller, &update);
                if update == ViewUpdate::SignedOut {
                    break;
                }
            }
        }
    }

    controller.deselect();
    Ok(())
}

enum Input<'a> {
    Quit,
    Logout,
    List,
    Switch(&'a str),
    Send(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    match trimmed {
        "/quit" | "/exit" => Input::Quit,
        "/logout" => Input::Logout,
        "/list" => Input::List,
        _ => match trimmed.strip_prefix("/switch ") {
            Some(id) => Input::Switch(id.trim()),
            None => Input::Send(line),
        },
    }
}

/// Forget the stored credential and invalidate the live session, which
/// closes the open channel and signs the controller out.
fn end_session(store: &SessionStore, session: &SessionContext, dry_run: bool) -> Result<bool> {
    let removed = if dry_run {
        info!("dry-run: would remove {}", store.path().display());
        false
    } else {
        store.clear().context("removing stored session")?
    };
    session.invalidate();
    Ok(removed)
}

fn print_directory(controller: &ConversationController) {
    let role = controller.identity().role;
    for conversation in controller.directory().conversations() {
        eprintln!(
            "  {}  {}  {}",
            conversation.id,
            conversation.counterparty(role).email,
            conversation.listing.title
        );
    }
}

fn report_send(outcome: SendOutcome) {
    match outcome {
        SendOutcome::Skipped | SendOutcome::Sent { .. } => {}
        SendOutcome::NoSelection => eprintln!("No conversation selected."),
        SendOutcome::Unsent { reason, .. } => eprintln!("Not sent: {reason}"),
    }
}

fn render_update(controller: &ConversationController, update: &ViewUpdate) {
    let identity = controller.identity();
    let counterparty = controller
        .selected()
        .map(|c| c.counterparty(identity.role).email.as_str());

    match update {
        ViewUpdate::HistoryLoaded {
            conversation_id, ..
        } => {
            if let Some(selected) = controller.selected() {
                eprintln!(
                    "--- {} ({}) ---",
                    counterparty.unwrap_or(conversation_id),
                    selected.listing.title
                );
            }
            if let Some(transcript) = controller.transcript() {
                for entry in transcript.entries() {
                    println!("{}", format_entry(&entry, identity, counterparty));
                }
            }
        }
        ViewUpdate::HistoryFailed { error, .. } => {
            eprintln!("Could not load history: {error}");
        }
        ViewUpdate::Appended(entry) => {
            println!("{}", format_entry(entry, identity, counterparty));
        }
        ViewUpdate::Replaced { message, .. } => {
            println!("{}", format_message(message, identity, counterparty));
        }
        ViewUpdate::ChannelReady { .. } => eprintln!("(connected)"),
        ViewUpdate::ChannelClosed { reason, .. } => eprintln!("(disconnected: {reason})"),
        ViewUpdate::PendingExpired { pending_ids } => {
            eprintln!("({} message(s) not confirmed)", pending_ids.len());
        }
        ViewUpdate::SignedOut => eprintln!("Session ended."),
        ViewUpdate::Ignored => {}
    }
}

fn format_entry(entry: &TranscriptEntry, identity: &Identity, counterparty: Option<&str>) -> String {
    match entry {
        TranscriptEntry::Persisted(message) => format_message(message, identity, counterparty),
        TranscriptEntry::Pending(pending) => {
            let status = match pending.status {
                PendingStatus::Sending => "sending",
                PendingStatus::Unsent => "unsent",
                PendingStatus::Expired => "unconfirmed",
            };
            format!("You: {} ({status})", pending.content)
        }
    }
}

fn format_message(message: &Message, identity: &Identity, counterparty: Option<&str>) -> String {
    let sender = if message.sender_id == identity.id {
        "You"
    } else {
        counterparty.unwrap_or(&message.sender_id)
    };
    match message.created_at {
        Some(at) => format!("[{}] {}: {}", at.format("%Y-%m-%d %H:%M"), sender, message.content),
        None => format!("{}: {}", sender, message.content),
    }
}

/// Point the user at `login` when the stored token is rejected.
fn hint_login(err: ApiError) -> anyhow::Error {
    match err {
        ApiError::Unauthorized(_) | ApiError::NotAuthenticated => {
            warn!("stored session was rejected");
            anyhow!(err).context(format!("session expired; run `{APP_NAME} login` again"))
        }
        other => anyhow!(other),
    }
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn load_or_init_config(paths: &mut AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "warn")?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()?;

    let mut config: AppConfig = built.try_deserialize()?;

    if let Some(ref file) = config.logging.file {
        let expanded = expand_str_path(file)?;
        config.logging.file = Some(expanded.display().to_string());
    }

    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# Configuration for {APP_NAME}\n# File: {}\n\n",
        path.display()
    )
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_state_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::state_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("state").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine state directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
