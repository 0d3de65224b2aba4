use std::{error::Error, io, process, sync::Arc};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use tonearm::{
    auth::AuthSession,
    config::Config,
    exchange::TokenExchangeClient,
    gateway::Gateway,
    http::Client as HttpClient,
    store::CredentialStore,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when built in release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Secrets file
    ///
    /// Must contain your application's client ID. See
    /// `secrets.toml.example` for the format.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// Session file
    ///
    /// Where the access token and cached profile are stored between
    /// runs. Ensure that this file is kept secure and not shared
    /// publicly, as it grants access to your account.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("session.json"))]
    session_file: String,

    /// Player's name
    ///
    /// Set the player's name as it appears to the streaming service.
    ///
    /// [default: system hostname]
    #[arg(short, long, value_hint = ValueHint::Hostname)]
    name: Option<String>,

    /// Log out and exit
    ///
    /// Clears the stored credential and cached profile.
    #[arg(long, default_value_t = false)]
    logout: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence
/// from highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(args: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if args.quiet || args.verbose > 0 {
        let level = match args.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Loads the configuration from the secrets file.
///
/// # Errors
///
/// Returns an error if the file could not be read or does not contain
/// a client ID.
fn load_config(secrets_file: &str) -> io::Result<Config> {
    let config = Config::from_file(secrets_file);

    if let Err(ref e) = config {
        if e.kind() == io::ErrorKind::NotFound {
            info!("read the documentation on how to set your client ID in {secrets_file}");
        }
    }

    config
}

/// Reads one line from standard input, unless interrupted.
///
/// Returns `None` on Ctrl-C or end of input.
async fn read_line() -> io::Result<Option<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tokio::select! {
        // Prioritize shutdown signals.
        biased;

        _ = tokio::signal::ctrl_c() => {
            info!("shutting down gracefully");
            Ok(None)
        }

        line = lines.next_line() => line,
    }
}

/// Main application flow.
///
/// Ensures the session is authenticated, walking the user through the
/// authorization flow if it is not, then shows who is logged in and a
/// sample of their library.
///
/// # Errors
///
/// Returns an error when the configuration is unusable, the
/// authorization flow fails, or the API cannot be reached.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(&args.secrets_file)?;
    config.device_name = args
        .name
        .or_else(|| sysinfo::System::host_name())
        .unwrap_or_else(|| config.app_name.clone());

    let store = CredentialStore::with_file(&args.session_file)?;
    let http_client = Arc::new(HttpClient::new(&config)?);
    let exchange = Arc::new(TokenExchangeClient::new(&config, Arc::clone(&http_client))?);

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let auth = AuthSession::new(&config, store, exchange, events_tx);

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            debug!("event: {event:?}");
        }
    });

    if args.logout {
        auth.logout().await;
        println!("Logged out; stored credentials cleared.");
        return Ok(());
    }

    if !auth.is_authenticated().await {
        let authorize_url = auth.login().await?;

        println!("Open this URL in your browser and authorize the application:");
        println!();
        println!("{authorize_url}");
        println!();
        println!("Then paste the full callback URL here and press Enter:");

        let Some(line) = read_line().await? else {
            return Ok(());
        };

        let callback = line.trim().parse::<Url>()?;
        let Some(result) = AuthSession::parse_callback(&callback) else {
            return Err("the pasted URL is not an authorization callback".into());
        };

        auth.complete_login(result).await?;
    }

    let gateway = Gateway::new(&config, Arc::clone(&http_client), auth.clone());

    let profile = gateway.profile().await?;
    auth.cache_profile(&profile).await?;
    println!(
        "Logged in as {} ({})",
        profile.display_name.as_deref().unwrap_or("unknown"),
        profile.id
    );

    let saved = gateway.saved_tracks(10, 0).await?;
    println!("Library holds {} saved tracks:", saved.total);
    for (position, item) in saved.items.iter().enumerate() {
        let artist = item
            .track
            .artists
            .first()
            .map_or("unknown artist", |artist| artist.name.as_str());
        println!("{:3}. {} - {}", position + 1, artist, item.track.name);
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command
/// line arguments, and starts the main application flow.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
