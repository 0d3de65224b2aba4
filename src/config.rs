//! Client configuration and the secrets file.
//!
//! [`Config`] carries everything the provider needs to know about this
//! client: the registered client identifier, redirect URI, endpoint URLs,
//! permission scopes, and the `User-Agent` presented on every request.
//! The client identifier is read from a small TOML secrets file so it
//! stays out of version control.

use std::{fs, io};

use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    /// Name under which the playback device registers with the provider.
    pub device_name: String,

    pub user_agent: String,

    /// Client identifier issued by the provider for this application.
    pub client_id: String,

    /// Redirect URI registered with the provider for this client.
    pub redirect_uri: Url,

    /// The provider's authorization endpoint.
    pub authorize_url: Url,

    /// Base URL of the companion token relay.
    pub token_relay_url: Url,

    /// Base URL of the provider's API, with a trailing slash so relative
    /// endpoints join below it.
    pub api_url: Url,

    /// Space-separated permission scopes to request at login.
    pub scopes: String,
}

impl Config {
    /// The provider's authorization endpoint.
    const AUTHORIZE_ENDPOINT: &'static str = "https://accounts.spotify.com/authorize";

    /// The provider's API origin.
    const API_ENDPOINT: &'static str = "https://api.spotify.com/v1/";

    /// Default origin of the companion token relay.
    const RELAY_ENDPOINT: &'static str = "http://127.0.0.1:3000/";

    /// Default redirect URI, as registered for this client.
    const REDIRECT_URI: &'static str = "https://localhost:8080/callback";

    /// Permission scopes for catalog browsing and playback control.
    const SCOPES: &'static str = "user-read-private user-read-email user-library-read \
        user-top-read playlist-read-private playlist-read-collaborative streaming \
        user-read-playback-state user-modify-playback-state user-read-currently-playing";

    /// Maximum size of the secrets file.
    ///
    /// Prevents an out-of-memory condition: the file holds a client
    /// identifier and a handful of URL overrides at most.
    const MAX_SECRETS_FILE_SIZE: u64 = 1024;

    /// Creates a configuration with the default endpoints.
    ///
    /// # Panics
    ///
    /// Panics if no valid `User-Agent` can be composed out of the
    /// application and OS names and versions.
    #[must_use]
    pub fn with_client_id(client_id: String) -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        let chars = client_id.chars().count();
        if chars != 32 {
            warn!("client_id is {chars} characters long, expected 32");
        }

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            panic!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            );
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            panic!("os name and/or version invalid (\"{os_name}\"; \"{os_version}\")");
        }

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; {app_lang})");
        trace!("user agent: {user_agent}");

        Self {
            app_name,
            app_version,
            app_lang,

            device_name: env!("CARGO_PKG_NAME").to_owned(),

            user_agent,

            client_id,
            redirect_uri: Url::parse(Self::REDIRECT_URI).expect("invalid redirect uri"),
            authorize_url: Url::parse(Self::AUTHORIZE_ENDPOINT).expect("invalid authorize endpoint"),
            token_relay_url: Url::parse(Self::RELAY_ENDPOINT).expect("invalid relay endpoint"),
            api_url: Url::parse(Self::API_ENDPOINT).expect("invalid api endpoint"),
            scopes: Self::SCOPES.to_owned(),
        }
    }

    /// Loads the configuration from a TOML secrets file.
    ///
    /// The file must contain a `client_id` and may override
    /// `redirect_uri`, `authorize_url`, `token_relay_url`, `api_url` and
    /// `scopes`.
    pub fn from_file(secrets_file: &str) -> io::Result<Self> {
        // Prevent out-of-memory condition: the secrets file should be small.
        let attributes = fs::metadata(secrets_file)?;
        if attributes.len() > Self::MAX_SECRETS_FILE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{secrets_file} is too large"),
            ));
        }

        let contents = fs::read_to_string(secrets_file)?;
        let value = contents.parse::<toml::Value>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{secrets_file} format is invalid: {e}"),
            )
        })?;

        let client_id = match value.get("client_id").and_then(toml::Value::as_str) {
            Some(client_id) if !client_id.is_empty() => client_id.to_owned(),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{secrets_file} does not contain a client_id"),
                ))
            }
        };

        let mut config = Self::with_client_id(client_id);

        if let Some(redirect_uri) = value.get("redirect_uri").and_then(toml::Value::as_str) {
            config.redirect_uri = Self::parse_url(secrets_file, "redirect_uri", redirect_uri)?;
        }
        if let Some(authorize_url) = value.get("authorize_url").and_then(toml::Value::as_str) {
            config.authorize_url = Self::parse_url(secrets_file, "authorize_url", authorize_url)?;
        }
        if let Some(token_relay_url) = value.get("token_relay_url").and_then(toml::Value::as_str) {
            config.token_relay_url = Self::parse_url(secrets_file, "token_relay_url", token_relay_url)?;
        }
        if let Some(api_url) = value.get("api_url").and_then(toml::Value::as_str) {
            config.api_url = Self::parse_url(secrets_file, "api_url", api_url)?;
        }
        if let Some(scopes) = value.get("scopes").and_then(toml::Value::as_str) {
            config.scopes = scopes.to_owned();
        }

        Ok(config)
    }

    fn parse_url(secrets_file: &str, key: &str, value: &str) -> io::Result<Url> {
        value.parse::<Url>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{key} in {secrets_file} is invalid: {e}"),
            )
        })
    }
}
