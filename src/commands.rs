//! Command-line surface: one command per dashboard page or maintenance task.

use crate::backend::memory::InMemoryBackend;
use crate::backend::{AuthChange, AuthEvent, Backend};
use crate::cache::QueryCache;
use crate::client::PostgrestClient;
use crate::config::{BackendMode, Config};
use crate::models::records::{Alert, Batch, DashboardMetric, Farm, FarmPerformance, FarmStatus, Record, RecordId, Role};
use crate::notify::{LogNotifier, Notifier};
use crate::services::{diagnosis, seed};
use crate::store::financial::FinancialStore;
use crate::store::reports::{self, ReportCatalog, ReportFilters};
use crate::store::users::{ProfileLookup, UserStore};
use crate::store::{EntityStore, QueryState, StoreContext};
use crate::utils::{Subscription, serde_enum_name};
use log::{info, warn};
use serde_json::Value;
use std::rc::Rc;

pub const USAGE: &str = "usage: flockmate-admin [--env-file <path>] <command> [args]

commands:
  dashboard                         metrics, farm count and unread alerts
  farms                             list farms
  farm-status <id> <status>         set status (active|inactive|maintenance)
  farm-toggle <id>                  toggle active/inactive
  performance                       farm performance table
  batches [farm-id]                 list batches, optionally for one farm
  financial                         monthly figures and cost breakdown
  alerts                            list alerts
  alert-read <id>                   mark an alert read
  users                             list user profiles
  user <id>                         show one profile
  add-user <name> <email> <role>    create login and profile (service role key)
  make-admin <email>                give a user the admin role
  reports [type] [status]           list reports (filters default to all)
  export <template> <format>        generate an export from a template
  diagnose                          farm addition diagnosis
  db-status                         check required tables
  check-duplicates                  report duplicated dashboard metrics
  seed                              insert demo data";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Dashboard,
    Farms,
    FarmStatus { id: RecordId, status: FarmStatus },
    FarmToggle { id: RecordId },
    Performance,
    Batches { farm: Option<RecordId> },
    Financial,
    Alerts,
    AlertRead { id: RecordId },
    Users,
    User { id: RecordId },
    AddUser { full_name: String, email: String, role: Role },
    MakeAdmin { email: String },
    Reports { filters: ReportFilters },
    Export { template: String, format: String },
    Diagnose,
    DbStatus,
    CheckDuplicates,
    Seed,
}

fn parse_enum<T: serde::de::DeserializeOwned>(what: &str, raw: &str) -> Result<T, String> {
    serde_json::from_value(Value::from(raw.to_ascii_lowercase())).map_err(|_| format!("invalid {}: {}", what, raw))
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = match words.as_slice() {
            [] | ["dashboard"] => Command::Dashboard,
            ["farms"] => Command::Farms,
            ["farm-status", id, status] => Command::FarmStatus {
                id: RecordId::from(*id),
                status: parse_enum("farm status", status)?,
            },
            ["farm-toggle", id] => Command::FarmToggle { id: RecordId::from(*id) },
            ["performance"] => Command::Performance,
            ["batches"] => Command::Batches { farm: None },
            ["batches", farm] => Command::Batches {
                farm: Some(RecordId::from(*farm)),
            },
            ["financial"] => Command::Financial,
            ["alerts"] => Command::Alerts,
            ["alert-read", id] => Command::AlertRead { id: RecordId::from(*id) },
            ["users"] => Command::Users,
            ["user", id] => Command::User { id: RecordId::from(*id) },
            ["add-user", name, email, role] => Command::AddUser {
                full_name: name.to_string(),
                email: email.to_string(),
                role: parse_enum("role", role)?,
            },
            ["make-admin", email] => Command::MakeAdmin {
                email: email.to_string(),
            },
            ["reports", rest @ ..] if rest.len() <= 2 => Command::Reports {
                filters: ReportFilters::parse(rest.first().copied().unwrap_or("all"), rest.get(1).copied().unwrap_or("all"))?,
            },
            ["export", template, format] => Command::Export {
                template: template.to_string(),
                format: format.to_string(),
            },
            ["diagnose"] => Command::Diagnose,
            ["db-status"] => Command::DbStatus,
            ["check-duplicates"] => Command::CheckDuplicates,
            ["seed"] => Command::Seed,
            _ => return Err(format!("unrecognised command: {}\n\n{}", words.join(" "), USAGE)),
        };
        Ok(command)
    }
}

/// Backend, cache and stores wired together for one run.
pub struct App {
    ctx: StoreContext,
    reports: ReportCatalog,
    // held for the whole run; the cache is cleared whenever the session changes
    _auth: Subscription,
}

impl App {
    pub fn connect(cfg: &Config) -> Result<Self, String> {
        let cache = match cfg.cache_stale_after {
            Some(age) => QueryCache::with_stale_after(
                chrono::Duration::from_std(age).map_err(|e| format!("invalid cache stale window: {}", e))?,
            ),
            None => QueryCache::new(),
        };
        let cache = Rc::new(cache);

        let backend: Rc<dyn Backend> = match cfg.backend {
            BackendMode::Remote => {
                info!("Using hosted backend at {}", cfg.supabase_url);
                Rc::new(PostgrestClient::new(
                    &cfg.supabase_url,
                    cfg.anon_key.clone(),
                    cfg.service_role_key.clone(),
                ))
            }
            BackendMode::Memory => {
                info!("Using in-memory backend with demo data");
                let memory = InMemoryBackend::new();
                if let Some(creds) = &cfg.credentials {
                    memory.register_account(&creds.email, &creds.password, "Demo Admin", "admin");
                }
                Rc::new(memory)
            }
        };

        let watched = Rc::clone(&cache);
        let auth = backend.on_auth_state_change(Box::new(move |change: &AuthChange| match change.event {
            AuthEvent::SignedIn | AuthEvent::SignedOut => watched.clear(),
            AuthEvent::TokenRefreshed => {}
        }));

        if let Some(creds) = &cfg.credentials {
            let session = backend
                .sign_in(&creds.email, &creds.password)
                .map_err(|e| format!("Sign-in failed for {}: {}", creds.email, e))?;
            info!("Signed in as {}", session.user.email.as_deref().unwrap_or(&session.user.id));
        }

        if cfg.backend == BackendMode::Memory {
            seed::run(backend.as_ref()).map_err(|e| format!("Seeding demo data failed: {}", e))?;
        }

        let notifier: Rc<dyn Notifier> = Rc::new(LogNotifier);
        Ok(App {
            ctx: StoreContext::new(backend, cache, notifier),
            reports: ReportCatalog::new(),
            _auth: auth,
        })
    }

    fn store<R: Record>(&self) -> EntityStore<R> {
        EntityStore::new(self.ctx.clone())
    }

    pub fn run(&self, command: Command) -> Result<(), String> {
        match command {
            Command::Dashboard => self.dashboard(),
            Command::Farms => {
                let farms = loaded(self.store::<Farm>().query())?;
                for f in farms {
                    println!(
                        "{}  {:<22} {:<16} {:<14} cap={:<6} {}",
                        f.id,
                        f.name,
                        f.location,
                        f.manager,
                        f.capacity,
                        name_of(&f.status)
                    );
                }
                Ok(())
            }
            Command::FarmStatus { id, status } => {
                let farm = self.store::<Farm>().set_status(&id, status).map_err(|e| e.message())?;
                println!("{} is now {}", farm.name, name_of(&farm.status));
                Ok(())
            }
            Command::FarmToggle { id } => {
                let farms = self.store::<Farm>();
                let farm = loaded(farms.find(&id))?.ok_or_else(|| format!("farm {} not found", id))?;
                let farm = farms.toggle_status(&farm).map_err(|e| e.message())?;
                println!("{} is now {}", farm.name, name_of(&farm.status));
                Ok(())
            }
            Command::Performance => {
                for p in loaded(self.store::<FarmPerformance>().query())? {
                    println!(
                        "{:<22} fcr={:.2} mortality={:.1}% weight={:.2}kg cost/kg={:.2}",
                        p.farm_name, p.fcr, p.mortality, p.avg_weight, p.cost_per_kg
                    );
                }
                Ok(())
            }
            Command::Batches { farm } => {
                let batches = self.store::<Batch>();
                let state = match &farm {
                    Some(id) => batches.for_farm(id),
                    None => batches.query(),
                };
                for b in loaded(state)? {
                    println!(
                        "{}  farm={} {:<16} birds={:<6} started={} age={}d {}",
                        b.id,
                        b.farm_id,
                        b.breed,
                        b.bird_count,
                        b.start_date,
                        b.current_age,
                        name_of(&b.status)
                    );
                }
                Ok(())
            }
            Command::Financial => {
                let overview = FinancialStore::new(self.ctx.clone()).overview();
                let financial = loaded(overview.financial.clone())?;
                let costs = loaded(overview.costs.clone())?;
                for r in &financial {
                    println!(
                        "{:<4} revenue={:>12.0} cost={:>12.0} profit={:>12.0} margin={:.1}%",
                        r.month, r.revenue, r.cost, r.profit, r.margin
                    );
                }
                println!("total revenue {:.0}", overview.total_revenue());
                for c in &costs {
                    println!("{:<12} {:>5.1}% {:>12.0}", c.name, c.value, c.amount);
                }
                Ok(())
            }
            Command::Alerts => {
                for a in loaded(self.store::<Alert>().query())? {
                    let mark = if a.read { " " } else { "*" };
                    println!("{} {}  [{}] {} ({}): {}", mark, a.id, name_of(&a.alert_type), a.title, a.farm, a.message);
                }
                Ok(())
            }
            Command::AlertRead { id } => {
                let alerts = self.store::<Alert>();
                alerts.mark_read(&id).map_err(|e| e.message())?;
                println!("{} unread alert(s) left", loaded(alerts.unread_count())?);
                Ok(())
            }
            Command::Users => self.users(),
            Command::User { id } => match UserStore::new(self.ctx.clone()).lookup(&id) {
                ProfileLookup::Found(p) => {
                    println!("{}  {} <{}> {}", p.id, p.full_name, p.email, name_of(&p.role));
                    Ok(())
                }
                ProfileLookup::NotFound => Err(format!("profile not found: {}", id)),
                ProfileLookup::Failed(e) => Err(format!("Failed to load profile: {}", e)),
            },
            Command::AddUser { full_name, email, role } => {
                let p = UserStore::new(self.ctx.clone())
                    .add_user(&full_name, &email, role)
                    .map_err(|e| e.message())?;
                println!("created {} <{}> as {}", p.id, p.email, name_of(&p.role));
                Ok(())
            }
            Command::MakeAdmin { email } => {
                UserStore::new(self.ctx.clone())
                    .promote_to_admin(&email)
                    .map_err(|e| e.message())?;
                Ok(())
            }
            Command::Reports { filters } => {
                for r in self.reports.filtered(&filters) {
                    let link = self.reports.download_link(&r.id).map(|l| l.href).unwrap_or_default();
                    println!(
                        "{}  {:<32} {:<12} {:<10} {:<6} {:<7} {}",
                        r.id,
                        r.title,
                        name_of(&r.report_type),
                        name_of(&r.status),
                        name_of(&r.format),
                        r.size.as_deref().unwrap_or("-"),
                        link
                    );
                }
                Ok(())
            }
            Command::Export { template, format } => {
                let export = reports::generate_export(&template, &format, Value::Object(Default::default()))
                    .map_err(|e| e.to_string())?;
                println!("{} {}", export.id, export.download_url);
                Ok(())
            }
            Command::Diagnose => {
                let report = diagnosis::farm_addition_diagnosis(self.ctx.backend.as_ref());
                let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
                println!("{}", json);
                match report.halted {
                    Some(reason) => Err(format!("Diagnosis stopped: {}", reason)),
                    None => Ok(()),
                }
            }
            Command::DbStatus => {
                let mut missing = 0;
                for status in diagnosis::database_status(self.ctx.backend.as_ref()) {
                    match status.state {
                        diagnosis::TableState::Present => println!("{:<20} ok", status.table),
                        diagnosis::TableState::Missing => {
                            missing += 1;
                            println!("{:<20} MISSING", status.table)
                        }
                        diagnosis::TableState::Error(message) => println!("{:<20} error: {}", status.table, message),
                    }
                }
                if missing > 0 {
                    return Err(format!("{} required table(s) missing", missing));
                }
                Ok(())
            }
            Command::CheckDuplicates => {
                let groups = loaded(self.store::<DashboardMetric>().duplicates())
                    .map_err(|e| format!("Error fetching dashboard metrics: {}", e))?;
                if groups.is_empty() {
                    println!("no duplicate metrics");
                }
                for g in groups {
                    println!("{} ({} rows)", g.metric_name, g.rows.len());
                    for m in g.rows {
                        println!("  {}  value={} created={}", m.id, m.metric_value, m.created_at);
                    }
                }
                Ok(())
            }
            Command::Seed => {
                let summary = seed::run(self.ctx.backend.as_ref()).map_err(|e| e.message())?;
                self.ctx.cache.clear();
                println!("inserted {} row(s)", summary.total());
                Ok(())
            }
        }
    }

    fn dashboard(&self) -> Result<(), String> {
        for m in loaded(self.store::<DashboardMetric>().query())? {
            println!(
                "{:<18} {:>10} {}",
                m.metric_name,
                m.metric_value,
                m.change_percentage.as_deref().unwrap_or("")
            );
        }
        let farms = loaded(self.store::<Farm>().query())?;
        let active = farms.iter().filter(|f| f.status == FarmStatus::Active).count();
        println!("farms: {} ({} active)", farms.len(), active);
        println!("unread alerts: {}", loaded(self.store::<Alert>().unread_count())?);
        println!(
            "birds in active batches: {}",
            loaded(self.store::<Batch>().active_bird_count())?
        );
        Ok(())
    }

    fn users(&self) -> Result<(), String> {
        let users = UserStore::new(self.ctx.clone());
        let list = users.list();
        if let Some(error) = &list.error {
            warn!("{}", error);
            if let Some(own) = users.current_profile_fallback(&list) {
                if let Some(p) = own.data {
                    println!("{}  {} <{}> {} (own profile only)", p.id, p.full_name, p.email, name_of(&p.role));
                    return Ok(());
                }
            }
            return Err(error.message.clone());
        }
        for p in list.data {
            println!("{}  {:<20} {:<30} {}", p.id, p.full_name, p.email, name_of(&p.role));
        }
        Ok(())
    }
}

fn loaded<T>(state: QueryState<T>) -> Result<T, String> {
    match state.error {
        Some(e) => Err(e.message),
        None => Ok(state.data),
    }
}

fn name_of<T: serde::Serialize>(value: &T) -> String {
    serde_enum_name(value).unwrap_or_else(|| "?".to_string())
}
