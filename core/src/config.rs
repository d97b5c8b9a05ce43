/// Configuration management
use crate::error::{FridayError, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_DATA_DIR: &str = ".friday";

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Friday REST backend
    pub api_url: Url,

    /// Directory holding the persisted client state (`client.db`)
    pub data_dir: PathBuf,

    /// Realtime room connect timeout
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Build config from command line arguments.
    ///
    /// Recognized flags are removed; everything else is returned in order
    /// so the caller can dispatch on it.
    pub fn from_args(args: &[String]) -> Result<(Self, Vec<String>)> {
        let mut api_url: Option<String> = None;
        let mut data_dir: Option<PathBuf> = None;
        let mut connect_timeout: Option<Duration> = None;
        let mut rest = Vec::new();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--api-url" => {
                    let url = args.get(i + 1).ok_or_else(|| {
                        FridayError::Config("--api-url requires a URL argument".to_string())
                    })?;
                    api_url = Some(url.clone());
                    i += 2;
                }
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        FridayError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--connect-timeout" => {
                    let secs = args.get(i + 1).ok_or_else(|| {
                        FridayError::Config(
                            "--connect-timeout requires a number of seconds".to_string(),
                        )
                    })?;
                    connect_timeout = Some(Duration::from_secs(secs.parse::<u64>().map_err(
                        |_| FridayError::Config("--connect-timeout must be a number".to_string()),
                    )?));
                    i += 2;
                }
                other => {
                    rest.push(other.to_string());
                    i += 1;
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(url) = std::env::var("FRIDAY_API_URL") {
            api_url = Some(url);
        }
        if let Ok(dir) = std::env::var("FRIDAY_DATA_DIR") {
            data_dir = Some(PathBuf::from(dir));
        }

        let defaults = Self::default();
        let api_url = match api_url {
            Some(raw) => parse_api_url(&raw)?,
            None => defaults.api_url,
        };

        Ok((
            Self {
                api_url,
                data_dir: data_dir.unwrap_or(defaults.data_dir),
                connect_timeout: connect_timeout.unwrap_or(defaults.connect_timeout),
            },
            rest,
        ))
    }

    /// Base URL for realtime rooms: the API URL with `http` swapped for `ws`.
    pub fn ws_base(&self) -> String {
        let base = self.api_url.as_str().trim_end_matches('/');
        match base.strip_prefix("http") {
            Some(rest) => format!("ws{}", rest),
            None => base.to_string(),
        }
    }

    /// Base for backend-relative upload paths.
    pub fn file_base(&self) -> &str {
        self.api_url.as_str().trim_end_matches('/')
    }
}

fn parse_api_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FridayError::Config(format!(
            "API URL must use http:// or https://, got: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flags_are_stripped() {
        let (config, rest) = Config::from_args(&args(&[
            "chat",
            "--api-url",
            "https://api.friday.test",
            "3",
            "--data-dir",
            "/tmp/friday",
        ]))
        .unwrap();

        assert_eq!(rest, vec!["chat".to_string(), "3".to_string()]);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/friday"));
        assert_eq!(config.ws_base(), "wss://api.friday.test");
    }

    #[test]
    fn test_ws_base_and_file_base() {
        let config = Config {
            api_url: Url::parse("http://localhost:8000/").unwrap(),
            ..Default::default()
        };
        assert_eq!(config.ws_base(), "ws://localhost:8000");
        assert_eq!(config.file_base(), "http://localhost:8000");
    }

    #[test]
    fn test_rejects_non_http_api_url() {
        assert!(parse_api_url("ftp://example.com").is_err());
        assert!(Config::from_args(&args(&["--api-url"])).is_err());
    }
}
