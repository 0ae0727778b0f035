//! Connection options.

use std::time::Duration;

use no_panic::no_panic;
use url::Url;

use crate::error::Error;

/// Port the OpenTick server listens on by default.
pub const DEFAULT_PORT: u16 = 1116;

/// Connection options for OpenTick.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address. Empty means `localhost`.
    ///
    /// Default: `""`
    pub host: String,

    /// Port number of the OpenTick server.
    ///
    /// Default: `1116`
    pub port: u16,

    /// Database selected right after connecting.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Username for the login handshake.
    ///
    /// Default: `None`
    pub user: Option<String>,

    /// Password for the login handshake.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Bound for connecting, for the handshake and for blocking `execute` calls.
    /// `None` waits forever.
    ///
    /// Default: `Some(15s)`
    pub timeout: Option<Duration>,

    /// Receive timeout of the dispatch loop once connected.
    ///
    /// Default: `100ms`
    pub poll_interval: Duration,

    /// Backoff between reconnection attempts. `None` or zero disables reconnection.
    ///
    /// Any non-zero duration is honoured, including sub-second ones.
    ///
    /// Default: `Some(1s)`
    pub auto_reconnect: Option<Duration>,

    /// Ask the server to serve repeated prepared selects from its result cache.
    ///
    /// Default: `true`
    pub use_cache: bool,
}

impl Default for Opts {
    #[no_panic]
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            database: None,
            user: None,
            password: None,
            timeout: Some(Duration::from_secs(15)),
            poll_interval: Duration::from_millis(100),
            auto_reconnect: Some(Duration::from_secs(1)),
            use_cache: true,
        }
    }
}

impl Opts {
    /// Host to dial, with the empty host resolved to `localhost`.
    pub fn host_or_default(&self) -> &str {
        if self.host.is_empty() {
            "localhost"
        } else {
            &self.host
        }
    }

    /// Backoff interval if reconnection is enabled.
    pub fn reconnect_interval(&self) -> Option<Duration> {
        self.auto_reconnect.filter(|interval| !interval.is_zero())
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<Option<Duration>, Error> {
    let secs: f64 = value
        .parse()
        .map_err(|_| Error::InvalidUsage(format!("Invalid {}: {}", key, value)))?;
    if secs <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| Error::InvalidUsage(format!("Invalid {}: {}", key, value)))
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse an OpenTick connection URL.
    ///
    /// Format: `opentick://[user[:password]@]host[:port][/database][?param1=value1&..]`
    ///
    /// Supported query parameters:
    /// - `timeout`: seconds, `0` waits forever
    /// - `auto_reconnect`: seconds between attempts, `0` disables
    /// - `poll_interval_ms`: dispatch loop receive timeout in milliseconds
    /// - `cache`: true/1/yes/on or false/0/no/off
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if url.scheme() != "opentick" {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'opentick://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port().unwrap_or(DEFAULT_PORT),
            user: Some(url.username().to_string()).filter(|s| !s.is_empty()),
            password: url.password().map(|s| s.to_string()),
            database: url.path().strip_prefix('/').and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "timeout" => {
                    opts.timeout = parse_seconds("timeout", &value)?;
                }
                "auto_reconnect" => {
                    opts.auto_reconnect = parse_seconds("auto_reconnect", &value)?;
                }
                "poll_interval_ms" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        Error::InvalidUsage(format!("Invalid poll_interval_ms: {}", value))
                    })?;
                    if ms == 0 {
                        return Err(Error::InvalidUsage("poll_interval_ms must be positive".into()));
                    }
                    opts.poll_interval = Duration::from_millis(ms);
                }
                "cache" => {
                    opts.use_cache = match value.as_ref() {
                        "true" | "True" | "1" | "yes" | "on" => true,
                        "false" | "False" | "0" | "no" | "off" => false,
                        _ => {
                            return Err(Error::InvalidUsage(format!("Invalid cache: {}", value)));
                        }
                    };
                }
                _ => {
                    return Err(Error::InvalidUsage(format!(
                        "Unknown connection parameter: {}",
                        key
                    )));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    /// Parse either a full `opentick://` URL or the short
    /// `[user[:password]@]host[:port][/database]` form.
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Ok(Opts::default());
        }
        let url = if s.contains("://") {
            Url::parse(s)
        } else {
            Url::parse(&format!("opentick://{}", s))
        }
        .map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}

impl TryFrom<String> for Opts {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::try_from(s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_form() {
        let opts = Opts::try_from("alice:secret@db.local:2000/ticks").unwrap();
        assert_eq!(opts.host, "db.local");
        assert_eq!(opts.port, 2000);
        assert_eq!(opts.user.as_deref(), Some("alice"));
        assert_eq!(opts.password.as_deref(), Some("secret"));
        assert_eq!(opts.database.as_deref(), Some("ticks"));
    }

    #[test]
    fn test_host_only() {
        let opts = Opts::try_from("127.0.0.1").unwrap();
        assert_eq!(opts.host, "127.0.0.1");
        assert_eq!(opts.port, DEFAULT_PORT);
        assert_eq!(opts.user, None);
        assert_eq!(opts.database, None);
    }

    #[test]
    fn test_empty_is_default() {
        let opts = Opts::try_from("").unwrap();
        assert_eq!(opts.host_or_default(), "localhost");
        assert_eq!(opts.timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_query_params() {
        let opts = Opts::try_from(
            "opentick://localhost/test?timeout=0&auto_reconnect=2.5&cache=off&poll_interval_ms=20",
        )
        .unwrap();
        assert_eq!(opts.timeout, None);
        assert_eq!(opts.auto_reconnect, Some(Duration::from_millis(2500)));
        assert!(!opts.use_cache);
        assert_eq!(opts.poll_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_disabled_reconnect() {
        let opts = Opts::try_from("opentick://localhost?auto_reconnect=0").unwrap();
        assert_eq!(opts.reconnect_interval(), None);
        let opts = Opts {
            auto_reconnect: Some(Duration::ZERO),
            ..Opts::default()
        };
        assert_eq!(opts.reconnect_interval(), None);
    }

    #[test]
    fn test_sub_second_reconnect_is_kept() {
        let opts = Opts::try_from("opentick://localhost?auto_reconnect=0.05").unwrap();
        assert_eq!(opts.reconnect_interval(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_invalid_scheme() {
        assert!(Opts::try_from("mysql://localhost").is_err());
    }

    #[test]
    fn test_unknown_param() {
        assert!(Opts::try_from("opentick://localhost?sslmode=require").is_err());
    }
}
