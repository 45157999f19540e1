//! Connection settings shared by the administrative connection and child handles

use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use sqlx::postgres::PgConnectOptions;
use tokio::time::Instant;

use crate::Redacted;

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// Default maintenance database used for catalog statements.
pub const DEFAULT_DATABASE: &str = "postgres";

/// Deadline applied to connection establishment when the config does not set one.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Characters escaped in the userinfo and path parts of a connection URL.
const URL_COMPONENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// PostgreSQL connection settings.
///
/// The same shape serves as the administrative config (with `database` set to the maintenance
/// database) and as a child handle (with `database` set to the child's name, see
/// [`ClientConfig::with_database`]). A handle is only a reference to a catalog entry; it holds
/// no server-side resource.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ClientConfig {
    /// Server host name or address (default: `localhost`)
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port (default: 5432)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Role to authenticate as
    pub user: String,
    /// Password for `user` (default: empty)
    #[serde(default)]
    pub password: Redacted<String>,
    /// Target database (default: `postgres`)
    #[serde(default = "default_database")]
    pub database: String,
    /// Connection establishment deadline (default: 10s)
    #[serde(
        default,
        rename = "connect_timeout_secs",
        deserialize_with = "deserialize_opt_secs"
    )]
    pub connect_timeout: Option<Duration>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn deserialize_opt_secs<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs: Option<u64> = serde::Deserialize::deserialize(deserializer)?;
    Ok(secs.map(Duration::from_secs))
}

impl ClientConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: Redacted::from(password.into()),
            database: database.into(),
            connect_timeout: None,
        }
    }

    /// Parses a `postgres://` or `postgresql://` URL.
    ///
    /// User, password and database are percent-decoded. Missing parts fall back to
    /// `localhost`, [`DEFAULT_PORT`] and [`DEFAULT_DATABASE`].
    pub fn from_url(url: &str) -> Result<Self, UrlError> {
        let url = url::Url::parse(url).map_err(UrlError::Parse)?;
        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(UrlError::UnsupportedScheme(url.scheme().to_string()));
        }

        let user = decode(url.username())?;
        if user.is_empty() {
            return Err(UrlError::MissingUser);
        }
        let password = url.password().map(decode).transpose()?.unwrap_or_default();
        let database = match url.path().trim_start_matches('/') {
            "" => DEFAULT_DATABASE.to_string(),
            path => decode(path)?,
        };

        Ok(Self {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(DEFAULT_PORT),
            user,
            password: Redacted::from(password),
            database,
            connect_timeout: None,
        })
    }

    /// Renders the config as a `postgresql://` URL, percent-encoding user, password and database.
    ///
    /// The result contains the password in clear text.
    pub fn to_url(&self) -> String {
        let user = utf8_percent_encode(&self.user, URL_COMPONENT_ENCODE_SET);
        let database = utf8_percent_encode(&self.database, URL_COMPONENT_ENCODE_SET);
        let password = self.password.expose();
        if password.is_empty() {
            format!("postgresql://{user}@{}:{}/{database}", self.host, self.port)
        } else {
            let password = utf8_percent_encode(password, URL_COMPONENT_ENCODE_SET);
            format!(
                "postgresql://{user}:{password}@{}:{}/{database}",
                self.host, self.port
            )
        }
    }

    /// Sets the connection establishment deadline.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Returns a copy of this config targeting `database` instead.
    #[must_use]
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    /// Deadline for a connection attempt started now.
    pub fn connect_deadline(&self) -> Instant {
        Instant::now() + self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Builds the sqlx connect options for this config.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(self.password.expose())
            .database(&self.database)
    }
}

fn decode(component: &str) -> Result<String, UrlError> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(UrlError::InvalidEncoding)
}

/// Errors returned by [`ClientConfig::from_url`]
#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    /// The string is not a URL
    #[error("invalid connection URL")]
    Parse(#[source] url::ParseError),

    /// The URL scheme is neither `postgres` nor `postgresql`
    #[error("unsupported connection URL scheme '{0}'")]
    UnsupportedScheme(String),

    /// The URL does not name a user
    #[error("connection URL has no user")]
    MissingUser,

    /// A percent-encoded component is not valid UTF-8
    #[error("connection URL component is not valid UTF-8")]
    InvalidEncoding(#[source] std::str::Utf8Error),
}
