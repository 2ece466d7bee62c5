use anyhow::Context;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_inactivity_minutes: i64,
    pub cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:roomchat.db?mode=rwc".to_owned(),
            bind_addr: "0.0.0.0:8080".to_owned(),
            session_inactivity_minutes: 60,
            cors_origin: None,
        }
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let defaults = Config::default();

        let session_inactivity_minutes = match lookup("SESSION_INACTIVITY_MINUTES") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("SESSION_INACTIVITY_MINUTES is not a number: {raw}"))?,
            None => defaults.session_inactivity_minutes,
        };
        anyhow::ensure!(session_inactivity_minutes > 0, "SESSION_INACTIVITY_MINUTES must be positive");

        Ok(Config {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            session_inactivity_minutes,
            cors_origin: lookup("CORS_ORIGIN").filter(|origin| !origin.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn falls_back_to_defaults() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("SESSION_INACTIVITY_MINUTES", " 5 "),
            ("CORS_ORIGIN", "http://localhost:3000"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.session_inactivity_minutes, 5);
        assert_eq!(config.cors_origin.as_deref(), Some("http://localhost:3000"));
    }

    #[test]
    fn rejects_bad_inactivity() {
        assert!(Config::from_lookup(lookup(&[("SESSION_INACTIVITY_MINUTES", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("SESSION_INACTIVITY_MINUTES", "0")])).is_err());
    }
}
