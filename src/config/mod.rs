use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use chrono::Duration;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BILL_DUE_HOURS: i64 = 48;
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub host: IpAddr,
    pub port: u16,
    /// How long after checkout a bill falls due.
    pub bill_due: Duration,
    pub allowed_origins: Vec<String>,
    pub production: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let bill_due_hours = parse_or("BILL_DUE_HOURS", &lookup, DEFAULT_BILL_DUE_HOURS);
        let allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();

        Self {
            database_url,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", &lookup, DEFAULT_MAX_CONNECTIONS),
            host: parse_or("HOST", &lookup, IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: parse_or("PORT", &lookup, DEFAULT_PORT),
            bill_due: Duration::hours(bill_due_hours.max(1)),
            allowed_origins,
            production: lookup("RUST_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or<T>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Config: invalid {}='{}', using {:?}", key, raw, default);
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);

        assert!(config.database_url.is_none());
        assert_eq!(config.bind_addr().port(), 3001);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.bill_due, Duration::hours(48));
        assert_eq!(config.allowed_origins.len(), 2);
        assert!(!config.production);
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/tickets"),
            ("PORT", "not-a-port"),
            ("BILL_DUE_HOURS", "6"),
            ("CORS_ALLOWED_ORIGINS", "https://tickets.example.com, ,"),
            ("RUST_ENV", "Production"),
        ]);

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/tickets"));
        assert_eq!(config.port, 3001);
        assert_eq!(config.bill_due, Duration::hours(6));
        assert_eq!(config.allowed_origins, vec!["https://tickets.example.com"]);
        assert!(config.production);
    }
}
