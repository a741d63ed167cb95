//! Command-line client for a Marionette endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Dispatch a single command and print the normalized response
//! marionette dispatch newSession
//!
//! # Each invocation is its own connection, so session-scoped commands
//! # create a session first and quit it afterwards
//! marionette dispatch get --new-session --params '{"url": "https://example.org/"}'
//! marionette dispatch getWindowHandles --new-session
//!
//! # Load a page and print the text of an element
//! marionette text https://example.org/ --using "css selector" --value h1
//!
//! # ...or of a child element found by tag name
//! marionette text https://example.org/ --using id --value content --child-tag p
//!
//! # Start the configured browser binary first
//! marionette --launch text https://example.org/ --using "tag name" --value h1
//!
//! # Show or initialize ~/.marionette/config.json
//! marionette config show
//! marionette config init
//! ```
//!
//! Exit codes: 0 on success, 1 when the peer reports a command error,
//! 2 on connection failures, 3 on protocol violations.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use marionette_core::command::{names, Command, Parameters, SessionId};
use marionette_core::config::BridgeConfig;
use marionette_core::driver::MarionetteDriver;
use marionette_core::launcher::LaunchOptions;
use marionette_core::response::NormalizedResponse;
use marionette_core::session::SessionError;
use marionette_core::transport::TransportError;
use serde_json::Value;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "marionette")]
#[command(about = "Drive a Marionette endpoint with remote-automation commands")]
#[command(version)]
struct Cli {
    /// Host running the Marionette listener
    #[arg(long, env = "MARIONETTE_HOST")]
    host: Option<String>,

    /// Marionette port
    #[arg(short, long, env = "MARIONETTE_PORT")]
    port: Option<u16>,

    /// Overall connection deadline in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Start the configured browser binary before connecting
    #[arg(long)]
    launch: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Dispatch one command and print the normalized response
    Dispatch {
        /// Command name, e.g. newSession, get, findElement
        name: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
        /// Session id to route the command to
        #[arg(short, long, conflicts_with = "new_session")]
        session: Option<String>,
        /// Create a session on this connection, run the command in it, then quit it
        #[arg(long)]
        new_session: bool,
    },

    /// Load a page and print the text of an element
    Text {
        /// Page to load
        url: String,
        /// Locator strategy, e.g. "id", "css selector", "tag name"
        #[arg(long)]
        using: String,
        /// Locator value
        #[arg(long)]
        value: String,
        /// Read the first child with this tag name instead
        #[arg(long)]
        child_tag: Option<String>,
    },

    /// Show or initialize the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration to ~/.marionette/config.json
    Init,
}

#[derive(Debug)]
enum CliError {
    Connection(String),
    CommandFailed(String),
    Protocol(String),
    Usage(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::CommandFailed(_) => ExitCode::from(1),
            CliError::Connection(_) => ExitCode::from(2),
            CliError::Protocol(_) => ExitCode::from(3),
            CliError::Usage(_) => ExitCode::from(64),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Connection(msg) => write!(f, "Connection error: {}", msg),
            CliError::CommandFailed(msg) => write!(f, "Command failed: {}", msg),
            CliError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            CliError::Usage(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Protocol(_) | SessionError::Transport(TransportError::Framing(_)) => {
                CliError::Protocol(err.to_string())
            }
            other => CliError::Connection(other.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_file.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

/// Log to stderr, or to `log_file` when given. The returned guard flushes
/// the file writer on drop.
fn init_logging(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let target = log_file.and_then(|path| {
        let name = path.file_name()?.to_owned();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Some((dir, name))
    });

    match target {
        Some((dir, name)) => {
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn effective_config(cli: &Cli) -> BridgeConfig {
    let mut config = BridgeConfig::load();
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ms) = cli.connect_timeout_ms {
        config.connect_timeout_ms = ms;
    }
    config
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = effective_config(&cli);

    match &cli.command {
        CliCommand::Config { action } => config_command(action, &config, cli.format),
        CliCommand::Dispatch {
            name,
            params,
            session,
            new_session,
        } => {
            let parameters = parse_params(params.as_deref())?;
            let command = Command::new(name.as_str())
                .with_optional_session(session.as_deref().map(SessionId::from))
                .with_params(parameters);

            let options = LaunchOptions::from_config(&config);
            let driver = start_driver(config, cli.launch, &options).await?;
            let result = if *new_session {
                dispatch_in_new_session(&driver, &options, command).await
            } else {
                driver.dispatch(command).await.map_err(CliError::from)
            };
            stop_driver(&driver).await;

            let response = result?;
            print_response(&response, cli.format);
            if response.is_success() {
                Ok(())
            } else {
                Err(command_failed(&response))
            }
        }
        CliCommand::Text {
            url,
            using,
            value,
            child_tag,
        } => {
            let options = LaunchOptions::from_config(&config);
            let driver = start_driver(config, cli.launch, &options).await?;
            let result = element_text(&driver, &options, url, using, value, child_tag.as_deref()).await;
            stop_driver(&driver).await;

            let text = result?;
            match cli.format {
                OutputFormat::Text => println!("{}", value_to_text(&text)),
                OutputFormat::Json => println!("{}", text),
            }
            Ok(())
        }
    }
}

fn config_command(action: &ConfigAction, config: &BridgeConfig, format: OutputFormat) -> Result<(), CliError> {
    match action {
        ConfigAction::Show => {
            let json = serde_json::to_string_pretty(config).map_err(|e| CliError::Usage(e.to_string()))?;
            println!("{}", json);
            if format == OutputFormat::Text {
                if let Some(path) = BridgeConfig::path() {
                    eprintln!("(from {})", path.display());
                }
            }
            Ok(())
        }
        ConfigAction::Init => {
            let path = BridgeConfig::default()
                .save()
                .map_err(|e| CliError::Usage(format!("could not write config: {}", e)))?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn parse_params(raw: Option<&str>) -> Result<Parameters, CliError> {
    let Some(raw) = raw else {
        return Ok(Parameters::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CliError::Usage("--params must be a JSON object".to_string())),
        Err(e) => Err(CliError::Usage(format!("--params is not valid JSON: {}", e))),
    }
}

async fn start_driver(
    config: BridgeConfig,
    launch: bool,
    options: &LaunchOptions,
) -> Result<MarionetteDriver, CliError> {
    let driver = if launch {
        MarionetteDriver::spawn(config)
    } else {
        MarionetteDriver::attach(config)
    };
    driver.start(options).await?;
    Ok(driver)
}

async fn stop_driver(driver: &MarionetteDriver) {
    if let Err(e) = driver.stop().await {
        warn!(error = %e, "failed to stop driver");
    }
}

/// Create a session, run `command` in it, then quit the session.
async fn dispatch_in_new_session(
    driver: &MarionetteDriver,
    options: &LaunchOptions,
    command: Command,
) -> Result<NormalizedResponse, CliError> {
    let session = create_session(driver, options).await?;
    let result = driver
        .dispatch(command.with_session(session.clone()))
        .await
        .map_err(CliError::from);
    quit_session(driver, session).await;
    result
}

async fn create_session(driver: &MarionetteDriver, options: &LaunchOptions) -> Result<SessionId, CliError> {
    let created = expect_success(driver.dispatch(options.new_session_command()).await?)?;
    let session = created
        .session_id()
        .cloned()
        .ok_or_else(|| CliError::Protocol("newSession returned no session id".to_string()))?;
    debug!(%session, "session created");
    Ok(session)
}

async fn quit_session(driver: &MarionetteDriver, session: SessionId) {
    match driver.dispatch(Command::new(names::QUIT).with_session(session)).await {
        Ok(response) if !response.is_success() => {
            warn!(status = %response.status(), "quit reported an error")
        }
        Err(e) => warn!(error = %e, "quit failed"),
        Ok(_) => {}
    }
}

/// newSession, get, findElement, optional findChildElement, getElementText,
/// then quit. The session is quit even when a step fails.
async fn element_text(
    driver: &MarionetteDriver,
    options: &LaunchOptions,
    url: &str,
    using: &str,
    value: &str,
    child_tag: Option<&str>,
) -> Result<Value, CliError> {
    let session = create_session(driver, options).await?;

    let result = async {
        let command = |name: &str| Command::new(name).with_session(session.clone());

        expect_success(driver.dispatch(command(names::GET).with_param("url", url)).await?)?;

        let found = expect_success(
            driver
                .dispatch(
                    command(names::FIND_ELEMENT)
                        .with_param("using", using)
                        .with_param("value", value),
                )
                .await?,
        )?;
        let mut element = found
            .element()
            .ok_or_else(|| CliError::CommandFailed(format!("no element matches {} {:?}", using, value)))?;

        if let Some(tag) = child_tag {
            let child = expect_success(
                driver
                    .dispatch(
                        command(names::FIND_CHILD_ELEMENT)
                            .with_param("id", element.id.clone())
                            .with_param("using", "tag name")
                            .with_param("value", tag),
                    )
                    .await?,
            )?;
            element = child
                .element()
                .ok_or_else(|| CliError::CommandFailed(format!("no <{}> child element", tag)))?;
        }

        let text = expect_success(
            driver
                .dispatch(command(names::GET_ELEMENT_TEXT).with_param("id", element.id))
                .await?,
        )?;
        Ok::<Value, CliError>(text.into_value())
    }
    .await;

    quit_session(driver, session).await;
    result
}

fn expect_success(response: NormalizedResponse) -> Result<NormalizedResponse, CliError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(command_failed(&response))
    }
}

fn command_failed(response: &NormalizedResponse) -> CliError {
    let message = response.error_message().unwrap_or("no message");
    CliError::CommandFailed(format!("{} ({})", message, response.status()))
}

fn print_response(response: &NormalizedResponse, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(response) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error: could not serialize response: {}", e),
        },
        OutputFormat::Text => {
            if let Some(session) = response.session_id() {
                println!("session: {}", session);
            }
            if response.is_success() {
                println!("{}", value_to_text(response.value()));
            }
        }
    }
}

/// Strings print bare; everything else prints as pretty JSON.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
