pub mod models {
    pub mod records;
}

pub mod backend;
pub mod cache;
pub mod client;
pub mod commands;
pub mod config;
pub mod notify;
pub mod query;
pub mod store;
pub mod utils;
pub mod services {
    pub mod diagnosis;
    pub mod metrics_audit;
    pub mod seed;
}

use crate::commands::{App, Command, USAGE};
use crate::config::Config;
use log::{error, info};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug)]
struct Cli {
    env_file: Option<LoadedEnvFile>,
    command: Vec<String>,
}

pub fn run(args: &[String]) -> Result<(), String> {
    // 1) Parse the command before touching the network
    let command = Command::parse(args)?;

    // 2) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (backend={:?}, service_role={}, sign_in={}, cache_stale_after={})",
        cfg.backend,
        cfg.service_role_key.is_some(),
        cfg.credentials.as_ref().map(|c| c.email.as_str()).unwrap_or("-"),
        cfg.cache_stale_after
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "-".to_string()),
    );

    // 3) Wire backend, cache and stores; sign in if configured
    let app = App::connect(&cfg)?;

    // 4) Run
    app.run(command)
}

/// `Ok(None)` when help was requested; the environment is left untouched then.
fn configure_env_from_cli(args: impl IntoIterator<Item = OsString>) -> Result<Option<Cli>, String> {
    let mut args = args.into_iter();

    let mut env_file: Option<PathBuf> = None;
    let mut command = Vec::new();

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("-h" | "--help") => return Ok(None),
            Some("--") => {
                for rest in args.by_ref() {
                    command.push(rest.into_string().map_err(|_| "argument contains invalid UTF-8".to_string())?);
                }
            }
            Some(s) if s.starts_with("--") => return Err(format!("unrecognised argument: {}\n\n{}", s, USAGE)),
            Some(s) => command.push(s.to_string()),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    let env_file = if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        Some(LoadedEnvFile { path, explicit: true })
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            load_env_file(&default_path)?;
            Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            })
        } else {
            None
        }
    };

    Ok(Some(Cli { env_file, command }))
}

/// Values already present in the process environment win over the file.
fn load_env_file(path: &Path) -> Result<(), String> {
    dotenvy::from_path(path).map_err(|e| format!("failed to load {}: {}", path.display(), e))
}

fn main() {
    let cli = match configure_env_from_cli(std::env::args_os().skip(1)) {
        Ok(Some(cli)) => cli,
        Ok(None) => {
            println!("{}", USAGE);
            return;
        }
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = cli.env_file.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "flockmate-admin {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&cli.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
