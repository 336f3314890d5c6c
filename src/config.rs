//! Minimal runtime configuration helpers.
//! Names follow the dashboard's `.env` (the `VITE_` variants are accepted as fallbacks).

use std::time::Duration;

pub const DEFAULT_MEMORY_EMAIL: &str = "demo@flockmate.local";
pub const DEFAULT_MEMORY_PASSWORD: &str = "demo";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BackendMode {
    /// Hosted PostgREST/GoTrue deployment.
    Remote,
    /// In-process backend, seeded with demo data.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendMode,
    /// Project URL, e.g. `https://xyz.supabase.co`. Required in remote mode.
    pub supabase_url: String,
    pub anon_key: String,
    /// Enables admin user creation.
    pub service_role_key: Option<String>,
    /// Sign in before running the command.
    pub credentials: Option<Credentials>,
    /// Age after which cached collections are refetched even without invalidation.
    pub cache_stale_after: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let var = |names: &[&str]| {
            names
                .iter()
                .filter_map(|n| lookup(n))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let backend = match var(&["FLOCKMATE_BACKEND"]).as_deref() {
            None | Some("remote") => BackendMode::Remote,
            Some("memory") => BackendMode::Memory,
            Some(other) => return Err(format!("FLOCKMATE_BACKEND must be `remote` or `memory`, got `{}`", other)),
        };

        let supabase_url = var(&["SUPABASE_URL", "VITE_SUPABASE_URL"]).unwrap_or_default();
        let anon_key = var(&["SUPABASE_ANON_KEY", "VITE_SUPABASE_PUBLISHABLE_KEY"]).unwrap_or_default();
        if backend == BackendMode::Remote {
            if supabase_url.is_empty() {
                return Err("Missing backend URL: set SUPABASE_URL (or use FLOCKMATE_BACKEND=memory)".to_string());
            }
            if anon_key.is_empty() {
                return Err("Missing anon key: set SUPABASE_ANON_KEY".to_string());
            }
        }

        let credentials = match (var(&["FLOCKMATE_EMAIL"]), var(&["FLOCKMATE_PASSWORD"])) {
            (Some(email), Some(password)) => Some(Credentials { email, password }),
            (None, None) if backend == BackendMode::Memory => Some(Credentials {
                email: DEFAULT_MEMORY_EMAIL.to_string(),
                password: DEFAULT_MEMORY_PASSWORD.to_string(),
            }),
            (None, None) => None,
            _ => return Err("FLOCKMATE_EMAIL and FLOCKMATE_PASSWORD must be set together".to_string()),
        };

        let cache_stale_after = match var(&["FLOCKMATE_CACHE_STALE_SECS"]) {
            Some(s) => Some(Duration::from_secs(
                s.parse::<u64>()
                    .map_err(|_| "FLOCKMATE_CACHE_STALE_SECS must be a whole number of seconds".to_string())?,
            )),
            None => None,
        };

        Ok(Config {
            backend,
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            anon_key,
            service_role_key: var(&["SUPABASE_SERVICE_ROLE_KEY"]),
            credentials,
            cache_stale_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn remote_mode_requires_url_and_key() {
        assert!(config(&[]).unwrap_err().contains("SUPABASE_URL"));
        assert!(config(&[("SUPABASE_URL", "https://x.supabase.co")]).unwrap_err().contains("anon key"));
    }

    #[test]
    fn vite_names_are_fallbacks() {
        let cfg = config(&[
            ("VITE_SUPABASE_URL", "https://x.supabase.co/"),
            ("VITE_SUPABASE_PUBLISHABLE_KEY", "anon"),
            ("SUPABASE_ANON_KEY", "  "),
        ])
        .unwrap();
        assert_eq!(cfg.backend, BackendMode::Remote);
        assert_eq!(cfg.supabase_url, "https://x.supabase.co");
        assert_eq!(cfg.anon_key, "anon");
        assert_eq!(cfg.credentials, None);
        assert_eq!(cfg.cache_stale_after, None);
    }

    #[test]
    fn memory_mode_gets_demo_login() {
        let cfg = config(&[("FLOCKMATE_BACKEND", "memory"), ("FLOCKMATE_CACHE_STALE_SECS", "30")]).unwrap();
        assert_eq!(cfg.backend, BackendMode::Memory);
        assert_eq!(cfg.credentials.map(|c| c.email), Some(DEFAULT_MEMORY_EMAIL.to_string()));
        assert_eq!(cfg.cache_stale_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_half_credentials_and_bad_numbers() {
        let base = [("FLOCKMATE_BACKEND", "memory")];
        assert!(config(&[base[0], ("FLOCKMATE_EMAIL", "a@b.c")]).is_err());
        assert!(config(&[base[0], ("FLOCKMATE_CACHE_STALE_SECS", "soon")]).is_err());
        assert!(config(&[("FLOCKMATE_BACKEND", "sqlite")]).is_err());
    }
}
