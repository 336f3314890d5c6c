//! User administration: profile list, own-profile fallback, lookups and
//! role changes.

use crate::backend::{BackendError, ErrorKind, decode_row, decode_rows};
use crate::cache::{CacheKey, QueryError};
use crate::models::records::{NewProfile, Profile, ProfilePatch, Record, RecordId, Role, UserRole, to_row};
use crate::query::Query;
use crate::store::{EntityStore, QueryState, StoreContext};
use log::{info, warn};
use serde_json::Value;
use std::rc::Rc;

pub const POLICY_ERROR_MESSAGE: &str = "Database policy error: Please contact administrator to fix user permissions.";

pub const CURRENT_PROFILE_KEY: &str = "current-user-profile";

/// Outcome of fetching one profile by id.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileLookup {
    Found(Profile),
    /// The backend reported that no row matched.
    NotFound,
    Failed(QueryError),
}

#[derive(Clone)]
pub struct UserStore {
    profiles: EntityStore<Profile>,
    roles: EntityStore<UserRole>,
}

impl UserStore {
    pub fn new(ctx: StoreContext) -> Self {
        UserStore {
            profiles: EntityStore::new(ctx.clone()),
            roles: EntityStore::new(ctx),
        }
    }

    fn ctx(&self) -> &StoreContext {
        self.profiles.context()
    }

    pub fn key(&self) -> CacheKey {
        self.profiles.key()
    }

    /// All profiles, newest first. Policy failures come back as a single
    /// "ask an administrator" message.
    pub fn list(&self) -> QueryState<Vec<Profile>> {
        self.profiles.query().map_error(translate_policy_error)
    }

    /// The caller's own profile, read only when the full list failed.
    ///
    /// Returns `None` when the list is fine or nobody is signed in.
    pub fn current_profile_fallback(&self, list: &QueryState<Vec<Profile>>) -> Option<QueryState<Option<Profile>>> {
        if !list.is_error {
            return None;
        }
        let user = self.ctx().backend.session()?.user;
        let key = CacheKey::new(CURRENT_PROFILE_KEY).with(user.id.as_str());
        let backend = Rc::clone(&self.ctx().backend);
        let entry = self.ctx().cache.fetch(&key, move || {
            backend.select_single(Profile::TABLE, &Query::all().eq("id", user.id.as_str()))
        });
        Some(QueryState::from_entry(&entry, |row| decode_row::<Profile>(row).map(Some)))
    }

    /// Fetch one profile, telling "no such row" apart from other failures.
    pub fn lookup(&self, id: &RecordId) -> ProfileLookup {
        let query = Query::all().eq("id", id.as_str());
        match self
            .ctx()
            .backend
            .select_single(Profile::TABLE, &query)
            .and_then(decode_row::<Profile>)
        {
            Ok(profile) => ProfileLookup::Found(profile),
            Err(e) if e.is_not_found() => ProfileLookup::NotFound,
            Err(e) => {
                warn!("profile lookup {} failed: {}", id, e);
                ProfileLookup::Failed(QueryError::from(&e))
            }
        }
    }

    /// Create the login first, then its profile under the same id.
    ///
    /// Needs the service-role key. A failed profile insert leaves the auth
    /// user in place.
    pub fn add_user(&self, full_name: &str, email: &str, role: Role) -> Result<Profile, BackendError> {
        self.ctx()
            .mutate(&self.key(), Some("User created successfully".to_string()), |backend| {
                let user = backend
                    .admin_create_user(email, full_name)
                    .map_err(|e| e.context("Failed to create auth user"))?;
                let profile = NewProfile {
                    id: RecordId(user.id),
                    email: email.to_string(),
                    full_name: full_name.to_string(),
                    role,
                };
                let row = backend
                    .insert(Profile::TABLE, to_row(&profile)?)
                    .map_err(|e| e.context("Failed to create profile"))?;
                decode_row(row)
            })
    }

    pub fn update(&self, id: &RecordId, patch: &ProfilePatch) -> Result<Profile, BackendError> {
        self.profiles.update(id, patch)
    }

    /// Look the user up by email and give them the admin role.
    pub fn promote_to_admin(&self, email: &str) -> Result<Profile, BackendError> {
        let success = format!("User {} is now an admin", email);
        let promoted = self.ctx().mutate(&self.key(), Some(success), |backend| {
            let found = backend
                .select_single(Profile::TABLE, &Query::all().eq("email", email))
                .and_then(decode_row::<Profile>)
                .map_err(|e| e.context("Failed to find user"))?;
            let patch = to_row(&ProfilePatch {
                role: Some(Role::Admin),
                ..Default::default()
            })?;
            let row = backend
                .update(Profile::TABLE, found.id.as_str(), patch)
                .map_err(|e| e.context("Failed to update user role"))?;
            decode_row::<Profile>(row)
        })?;
        info!("{} promoted to admin", email);
        Ok(promoted)
    }

    /// Role grants of one user, cached under `["user-roles", <user id>]`.
    pub fn roles_for(&self, user_id: &RecordId) -> QueryState<Vec<UserRole>> {
        let key = self.roles.key().with(user_id.as_str());
        let backend = Rc::clone(&self.ctx().backend);
        let (column, ascending) = UserRole::ORDER;
        let query = Query::all().eq("user_id", user_id.as_str()).order(column, ascending);
        let entry = self
            .ctx()
            .cache
            .fetch(&key, move || backend.select(UserRole::TABLE, &query).map(Value::Array));
        QueryState::from_entry(&entry, decode_rows)
    }
}

fn translate_policy_error(error: QueryError) -> QueryError {
    if error.kind == ErrorKind::Unauthorized {
        QueryError {
            message: POLICY_ERROR_MESSAGE.to_string(),
            ..error
        }
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, NO_ROWS_CODE};
    use crate::backend::memory::InMemoryBackend;
    use crate::store::testing::{ADMIN_EMAIL, Harness, OPERATOR_EMAIL};
    use serde_json::json;

    #[test]
    fn missing_profile_takes_not_found_path() {
        let h = Harness::admin();
        let users = UserStore::new(h.ctx.clone());
        let outcome = users.lookup(&RecordId::from("00000000-0000-0000-0000-000000000000"));
        assert_eq!(outcome, ProfileLookup::NotFound);

        h.backend.set_offline(true);
        match users.lookup(&RecordId::from("anything")) {
            ProfileLookup::Failed(e) => assert_eq!(e.kind, ErrorKind::Network),
            other => panic!("expected a generic failure, got {:?}", other),
        }
    }

    #[test]
    fn existing_profile_is_found() {
        let h = Harness::admin();
        let users = UserStore::new(h.ctx.clone());
        let admin = h.backend.session().unwrap().user;
        match users.lookup(&RecordId(admin.id)) {
            ProfileLookup::Found(p) => assert_eq!(p.role, Role::Admin),
            other => panic!("expected the admin profile, got {:?}", other),
        }
    }

    #[test]
    fn recursive_policy_maps_to_admin_message_and_enables_fallback() {
        let h = Harness::operator();
        h.backend.break_policy("profiles");
        let users = UserStore::new(h.ctx.clone());

        let list = users.list();
        assert!(list.is_error);
        assert_eq!(list.error.as_ref().map(|e| e.message.as_str()), Some(POLICY_ERROR_MESSAGE));

        let own = users.current_profile_fallback(&list).expect("fallback runs after a failed list");
        assert_eq!(own.data.map(|p| p.email), Some(OPERATOR_EMAIL.to_string()));
        let me = h.backend.session().unwrap().user.id;
        assert!(h.ctx.cache.peek(&CacheKey::new(CURRENT_PROFILE_KEY).with(me)).is_some());
    }

    #[test]
    fn fallback_is_skipped_when_list_succeeds() {
        let h = Harness::admin();
        let users = UserStore::new(h.ctx.clone());
        let list = users.list();
        assert_eq!(list.data.len(), 2);
        assert!(users.current_profile_fallback(&list).is_none());
    }

    #[test]
    fn add_user_creates_login_and_profile() {
        let h = Harness::with_backend(InMemoryBackend::service_role());
        let users = UserStore::new(h.ctx.clone());
        let profile = users.add_user("New Tech", "tech@flockmate.test", Role::Technician).unwrap();
        assert_eq!(profile.role, Role::Technician);
        assert_eq!(users.list().data.len(), 1);
        assert_eq!(h.notifier.last().map(|t| t.description), Some("User created successfully".to_string()));

        let err = users.add_user("Again", "tech@flockmate.test", Role::Technician).unwrap_err();
        assert!(err.message().starts_with("Failed to create auth user: "), "{}", err.message());
        assert_eq!(h.notifier.last().map(|t| t.description), Some(err.message()));
    }

    #[test]
    fn add_user_without_service_role_is_rejected() {
        let h = Harness::admin();
        let users = UserStore::new(h.ctx.clone());
        let err = users.add_user("Nope", "nope@flockmate.test", Role::Manager).unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.message(), "Failed to create auth user: User not allowed");
    }

    #[test]
    fn promotion_requires_an_existing_user() {
        let h = Harness::admin();
        let users = UserStore::new(h.ctx.clone());
        let promoted = users.promote_to_admin(OPERATOR_EMAIL).unwrap();
        assert_eq!(promoted.role, Role::Admin);
        assert_eq!(
            h.notifier.last().map(|t| t.description),
            Some(format!("User {} is now an admin", OPERATOR_EMAIL))
        );

        let err = users.promote_to_admin("ghost@flockmate.test").unwrap_err();
        assert_eq!(err.code(), Some(NO_ROWS_CODE));
        assert!(err.message().starts_with("Failed to find user: "));
    }

    #[test]
    fn non_admin_cannot_promote() {
        let h = Harness::operator();
        let users = UserStore::new(h.ctx.clone());
        let err = users.promote_to_admin(ADMIN_EMAIL).unwrap_err();
        assert!(err.is_unauthorized());
        assert!(err.message().starts_with("Failed to update user role: "));
    }

    #[test]
    fn roles_are_read_per_user() {
        let h = Harness::admin();
        let me = h.backend.session().unwrap().user.id;
        h.backend
            .seed_row("user_roles", json!({"user_id": me, "role": "admin"}))
            .unwrap();
        h.backend
            .seed_row("user_roles", json!({"user_id": "someone-else", "role": "technician"}))
            .unwrap();
        let users = UserStore::new(h.ctx.clone());
        let roles = users.roles_for(&RecordId(me));
        assert_eq!(roles.data.iter().map(|r| r.role).collect::<Vec<_>>(), vec![Role::Admin]);
    }
}
