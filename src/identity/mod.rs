use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::datetime;

use crate::core::{AccountStatus, Role, User, UserAccount};
use crate::store::kv::{self, KvStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("ユーザー名またはパスワードが正しくありません")]
    InvalidCredentials,
    #[error("アカウントが無効化されています: {0}")]
    Inactive(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("ログインしていません（`riskreg login` を実行してください）")]
    NotLoggedIn,
    #[error("権限がありません。必要なロール: {required}（現在: {actual}）")]
    Denied { required: Role, actual: Role },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserError {
    #[error("ユーザーが見つかりません: {0}")]
    NotFound(String),
    #[error("ユーザー名は既に使われています: {0}")]
    Duplicate(String),
    #[error("ユーザー情報が不正です: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Credential {
    #[serde(flatten)]
    account: UserAccount,
    password: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    pub username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub status: Option<AccountStatus>,
    pub password: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self == &UserPatch::default()
    }
}

/// User accounts with demo credentials, persisted under `gmp-gdp-users`.
/// Ids come from a counter and are never handed out twice, so audit entries
/// keep pointing at the account that made them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDirectory {
    next_user_id: u64,
    credentials: Vec<Credential>,
}

impl UserDirectory {
    pub fn demo() -> Self {
        let entry = |id: &str,
                     username: &str,
                     password: &str,
                     role: Role,
                     name: &str,
                     status: AccountStatus,
                     created_at: OffsetDateTime,
                     last_login: OffsetDateTime| Credential {
            account: UserAccount {
                user: User {
                    user_id: id.to_string(),
                    username: username.to_string(),
                    name: name.to_string(),
                    role,
                },
                email: format!("{username}@company.com"),
                status,
                created_at,
                last_login: Some(last_login),
            },
            password: password.to_string(),
        };
        Self {
            next_user_id: 5,
            credentials: vec![
                entry(
                    "1",
                    "admin",
                    "admin123",
                    Role::Administrator,
                    "System Administrator",
                    AccountStatus::Active,
                    datetime!(2024-01-01 0:00 UTC),
                    datetime!(2024-09-30 8:00 UTC),
                ),
                entry(
                    "2",
                    "assessor",
                    "assessor123",
                    Role::Assessor,
                    "Risk Assessor",
                    AccountStatus::Active,
                    datetime!(2024-01-15 0:00 UTC),
                    datetime!(2024-09-29 14:30 UTC),
                ),
                entry(
                    "3",
                    "viewer",
                    "viewer123",
                    Role::Viewer,
                    "Risk Viewer",
                    AccountStatus::Active,
                    datetime!(2024-02-01 0:00 UTC),
                    datetime!(2024-09-28 10:15 UTC),
                ),
                entry(
                    "4",
                    "john.doe",
                    "john123",
                    Role::Assessor,
                    "John Doe",
                    AccountStatus::Inactive,
                    datetime!(2024-03-10 0:00 UTC),
                    datetime!(2024-08-15 16:45 UTC),
                ),
            ],
        }
    }

    /// Persisted directory, or the demo accounts when nothing usable is stored.
    pub fn load(kv: &impl KvStore) -> Self {
        match kv::load_json::<UserDirectory>(kv, kv::USERS_KEY) {
            Ok(Some(mut dir)) => {
                let floor = dir
                    .credentials
                    .iter()
                    .filter_map(|c| c.account.user.user_id.parse::<u64>().ok())
                    .max()
                    .map_or(1, |n| n + 1);
                dir.next_user_id = dir.next_user_id.max(floor);
                dir
            }
            Ok(None) => Self::demo(),
            Err(err) => {
                tracing::warn!("ユーザー一覧を読み込めないためデモアカウントを使用します: {err:#}");
                Self::demo()
            }
        }
    }

    pub fn save(&self, kv: &mut impl KvStore) -> Result<()> {
        kv::save_json(kv, kv::USERS_KEY, self)
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let credential = self
            .credentials
            .iter()
            .find(|c| c.account.user.username == username && c.password == password)
            .ok_or(AuthError::InvalidCredentials)?;
        if !credential.account.is_active() {
            return Err(AuthError::Inactive(username.to_string()));
        }
        Ok(credential.account.user.clone())
    }

    pub fn find_by_id(&self, user_id: &str) -> Option<&User> {
        self.find_account(user_id).map(|a| &a.user)
    }

    pub fn find_account(&self, user_id: &str) -> Option<&UserAccount> {
        self.accounts().find(|a| a.user.user_id == user_id)
    }

    /// Accepts either a user id or a username.
    pub fn resolve_id(&self, id_or_username: &str) -> Option<&str> {
        self.users()
            .find(|u| u.user_id == id_or_username)
            .or_else(|| self.users().find(|u| u.username == id_or_username))
            .map(|u| u.user_id.as_str())
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.accounts().map(|a| &a.user)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &UserAccount> {
        self.credentials.iter().map(|c| &c.account)
    }

    /// Case-insensitive substring match on name, username, email and role.
    pub fn search(&self, term: &str) -> Vec<&UserAccount> {
        let term = term.trim().to_lowercase();
        self.accounts()
            .filter(|a| {
                a.user.name.to_lowercase().contains(&term)
                    || a.user.username.to_lowercase().contains(&term)
                    || a.email.to_lowercase().contains(&term)
                    || a.user.role.as_str().contains(&term)
            })
            .collect()
    }

    pub fn add(&mut self, new: NewUser, now: OffsetDateTime) -> Result<UserAccount, UserError> {
        validate_username(&new.username)?;
        validate_required("name", &new.name)?;
        validate_email(&new.email)?;
        validate_required("password", &new.password)?;
        self.ensure_username_free(&new.username, None)?;

        let user_id = self.next_user_id.to_string();
        self.next_user_id += 1;
        let account = UserAccount {
            user: User {
                user_id,
                username: new.username.trim().to_string(),
                name: new.name.trim().to_string(),
                role: new.role,
            },
            email: new.email.trim().to_string(),
            status: new.status,
            created_at: now,
            last_login: None,
        };
        self.credentials.push(Credential {
            account: account.clone(),
            password: new.password,
        });
        tracing::info!(user_id = %account.user.user_id, "user added");
        Ok(account)
    }

    pub fn update(&mut self, user_id: &str, patch: UserPatch) -> Result<UserAccount, UserError> {
        if let Some(username) = &patch.username {
            validate_username(username)?;
            self.ensure_username_free(username, Some(user_id))?;
        }
        if let Some(name) = &patch.name {
            validate_required("name", name)?;
        }
        if let Some(email) = &patch.email {
            validate_email(email)?;
        }
        if let Some(password) = &patch.password {
            validate_required("password", password)?;
        }

        let credential = self.credential_mut(user_id)?;
        let account = &mut credential.account;
        if let Some(username) = patch.username {
            account.user.username = username.trim().to_string();
        }
        if let Some(name) = patch.name {
            account.user.name = name.trim().to_string();
        }
        if let Some(email) = patch.email {
            account.email = email.trim().to_string();
        }
        if let Some(role) = patch.role {
            account.user.role = role;
        }
        if let Some(status) = patch.status {
            account.status = status;
        }
        if let Some(password) = patch.password {
            credential.password = password;
        }
        Ok(credential.account.clone())
    }

    pub fn delete(&mut self, user_id: &str) -> Result<UserAccount, UserError> {
        let idx = self
            .credentials
            .iter()
            .position(|c| c.account.user.user_id == user_id)
            .ok_or_else(|| UserError::NotFound(user_id.to_string()))?;
        let removed = self.credentials.remove(idx);
        tracing::info!(user_id, "user deleted");
        Ok(removed.account)
    }

    pub fn toggle_status(&mut self, user_id: &str) -> Result<UserAccount, UserError> {
        let credential = self.credential_mut(user_id)?;
        credential.account.status = credential.account.status.toggled();
        Ok(credential.account.clone())
    }

    pub fn record_login(&mut self, user_id: &str, now: OffsetDateTime) {
        if let Ok(credential) = self.credential_mut(user_id) {
            credential.account.last_login = Some(now);
        }
    }

    fn credential_mut(&mut self, user_id: &str) -> Result<&mut Credential, UserError> {
        self.credentials
            .iter_mut()
            .find(|c| c.account.user.user_id == user_id)
            .ok_or_else(|| UserError::NotFound(user_id.to_string()))
    }

    fn ensure_username_free(&self, username: &str, except: Option<&str>) -> Result<(), UserError> {
        let username = username.trim();
        let taken = self
            .users()
            .any(|u| u.username == username && Some(u.user_id.as_str()) != except);
        if taken {
            Err(UserError::Duplicate(username.to_string()))
        } else {
            Ok(())
        }
    }
}

fn validate_required(field: &str, value: &str) -> Result<(), UserError> {
    if value.trim().is_empty() {
        Err(UserError::Validation(format!("{field} は空にできません")))
    } else {
        Ok(())
    }
}

fn validate_username(username: &str) -> Result<(), UserError> {
    validate_required("username", username)?;
    if username.trim().chars().any(char::is_whitespace) {
        return Err(UserError::Validation(format!(
            "username に空白は使えません: {username:?}"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), UserError> {
    validate_required("email", email)?;
    if !email.contains('@') {
        return Err(UserError::Validation(format!(
            "email の形式が不正です: {email}"
        )));
    }
    Ok(())
}

pub fn has_permission(user: Option<&User>, required: Role) -> bool {
    user.is_some_and(|u| u.role.rank() >= required.rank())
}

pub fn require(user: Option<&User>, required: Role) -> Result<&User, PermissionError> {
    let Some(user) = user else {
        return Err(PermissionError::NotLoggedIn);
    };
    if has_permission(Some(user), required) {
        Ok(user)
    } else {
        Err(PermissionError::Denied {
            required,
            actual: user.role,
        })
    }
}

/// Logged-in flag persisted next to the register. Only the password-free
/// user record is stored.
pub mod session {
    use super::*;

    pub fn current(kv: &impl KvStore) -> Option<User> {
        match kv::load_json::<User>(kv, kv::USER_KEY) {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!("セッション情報を読み込めませんでした: {err:#}");
                None
            }
        }
    }

    /// Session user as the directory currently knows it. A deleted or
    /// deactivated account no longer counts as logged in, and role changes
    /// apply immediately.
    pub fn active_user(kv: &impl KvStore, directory: &UserDirectory) -> Option<User> {
        let user = current(kv)?;
        match directory.find_account(&user.user_id) {
            Some(account) if account.is_active() => Some(account.user.clone()),
            _ => {
                tracing::debug!(user_id = %user.user_id, "session account is gone or inactive");
                None
            }
        }
    }

    pub fn login(
        kv: &mut impl KvStore,
        directory: &mut UserDirectory,
        username: &str,
        password: &str,
        now: OffsetDateTime,
    ) -> Result<User> {
        let user = directory.authenticate(username, password)?;
        directory.record_login(&user.user_id, now);
        directory.save(kv)?;
        kv::save_json(kv, kv::USER_KEY, &user)?;
        tracing::debug!(user_id = %user.user_id, "logged in");
        Ok(user)
    }

    pub fn logout(kv: &mut impl KvStore) -> Result<()> {
        kv.remove(kv::USER_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryKvStore;

    fn user(role: Role) -> User {
        User {
            user_id: "9".to_string(),
            username: "u".to_string(),
            name: "U".to_string(),
            role,
        }
    }

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            name: "Quality Lead".to_string(),
            email: format!("{username}@company.com"),
            role: Role::Assessor,
            status: AccountStatus::Active,
            password: "secret".to_string(),
        }
    }

    const NOW: OffsetDateTime = datetime!(2024-10-01 9:00 UTC);

    #[test]
    fn role_hierarchy_is_respected() {
        assert!(!has_permission(Some(&user(Role::Viewer)), Role::Administrator));
        assert!(has_permission(Some(&user(Role::Administrator)), Role::Viewer));
        assert!(has_permission(Some(&user(Role::Assessor)), Role::Assessor));
        assert!(!has_permission(Some(&user(Role::Assessor)), Role::Administrator));
        assert!(!has_permission(None, Role::Viewer));
    }

    #[test]
    fn require_reports_the_missing_role() {
        let viewer = user(Role::Viewer);
        assert_eq!(
            require(Some(&viewer), Role::Assessor).unwrap_err(),
            PermissionError::Denied {
                required: Role::Assessor,
                actual: Role::Viewer,
            }
        );
        assert_eq!(
            require(None, Role::Viewer).unwrap_err(),
            PermissionError::NotLoggedIn
        );
    }

    #[test]
    fn authenticate_checks_username_password_and_status() {
        let dir = UserDirectory::demo();
        let admin = dir.authenticate("admin", "admin123").expect("admin");
        assert_eq!(admin.role, Role::Administrator);
        assert_eq!(
            dir.authenticate("admin", "viewer123").unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            dir.authenticate("nobody", "x").unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            dir.authenticate("john.doe", "john123").unwrap_err(),
            AuthError::Inactive("john.doe".to_string())
        );
    }

    #[test]
    fn add_assigns_fresh_ids_and_rejects_duplicates() {
        let mut dir = UserDirectory::demo();
        let added = dir.add(new_user("qa.lead"), NOW).expect("add");
        assert_eq!(added.user.user_id, "5");
        assert_eq!(added.last_login, None);
        assert_eq!(
            dir.authenticate("qa.lead", "secret").map(|u| u.role),
            Ok(Role::Assessor)
        );

        assert_eq!(
            dir.add(new_user("admin"), NOW).unwrap_err(),
            UserError::Duplicate("admin".to_string())
        );
        let mut bad = new_user("x");
        bad.email = "not-an-email".to_string();
        assert!(matches!(dir.add(bad, NOW), Err(UserError::Validation(_))));
        assert!(matches!(
            dir.add(new_user("two words"), NOW),
            Err(UserError::Validation(_))
        ));

        dir.delete("5").expect("delete");
        let again = dir.add(new_user("qa.lead"), NOW).expect("re-add");
        assert_eq!(again.user.user_id, "6");
    }

    #[test]
    fn update_keeps_unset_fields_and_password() {
        let mut dir = UserDirectory::demo();
        let updated = dir
            .update(
                "3",
                UserPatch {
                    role: Some(Role::Assessor),
                    ..UserPatch::default()
                },
            )
            .expect("update");
        assert_eq!(updated.user.role, Role::Assessor);
        assert_eq!(updated.user.username, "viewer");
        assert!(dir.authenticate("viewer", "viewer123").is_ok());

        assert_eq!(
            dir.update(
                "3",
                UserPatch {
                    username: Some("admin".to_string()),
                    ..UserPatch::default()
                }
            )
            .unwrap_err(),
            UserError::Duplicate("admin".to_string())
        );
        // keeping one's own username is not a conflict
        assert!(
            dir.update(
                "3",
                UserPatch {
                    username: Some("viewer".to_string()),
                    ..UserPatch::default()
                }
            )
            .is_ok()
        );
        assert_eq!(
            dir.update("99", UserPatch::default()).unwrap_err(),
            UserError::NotFound("99".to_string())
        );
    }

    #[test]
    fn toggle_flips_status_and_blocks_login() {
        let mut dir = UserDirectory::demo();
        let toggled = dir.toggle_status("3").expect("toggle");
        assert_eq!(toggled.status, AccountStatus::Inactive);
        assert!(matches!(
            dir.authenticate("viewer", "viewer123"),
            Err(AuthError::Inactive(_))
        ));
        let back = dir.toggle_status("3").expect("toggle");
        assert_eq!(back.status, AccountStatus::Active);
    }

    #[test]
    fn search_and_resolve() {
        let dir = UserDirectory::demo();
        assert_eq!(dir.search("ASSESSOR").len(), 2);
        assert_eq!(dir.search("company.com").len(), 4);
        assert_eq!(dir.resolve_id("viewer"), Some("3"));
        assert_eq!(dir.resolve_id("3"), Some("3"));
        assert_eq!(dir.resolve_id("ghost"), None);
    }

    #[test]
    fn directory_round_trips_through_kv() {
        let mut kv = MemoryKvStore::new();
        assert_eq!(UserDirectory::load(&kv), UserDirectory::demo());

        let mut dir = UserDirectory::demo();
        dir.add(new_user("qa.lead"), NOW).expect("add");
        dir.save(&mut kv).expect("save");
        let loaded = UserDirectory::load(&kv);
        assert_eq!(loaded, dir);

        let raw = kv.get(kv::USERS_KEY).unwrap().expect("stored");
        assert!(raw.contains("\"next_user_id\": 6"), "{raw}");

        kv.set(kv::USERS_KEY, "{broken").unwrap();
        assert_eq!(UserDirectory::load(&kv), UserDirectory::demo());
    }

    #[test]
    fn session_persists_user_without_password() {
        let mut kv = MemoryKvStore::new();
        let mut dir = UserDirectory::demo();
        assert_eq!(session::current(&kv), None);

        session::login(&mut kv, &mut dir, "assessor", "assessor123", NOW).expect("login");
        let raw = kv.get(kv::USER_KEY).unwrap().expect("stored");
        assert!(!raw.contains("assessor123"), "{raw}");
        assert_eq!(session::current(&kv).map(|u| u.role), Some(Role::Assessor));
        assert_eq!(
            UserDirectory::load(&kv).find_account("2").and_then(|a| a.last_login),
            Some(NOW)
        );

        session::logout(&mut kv).expect("logout");
        assert_eq!(session::current(&kv), None);
    }

    #[test]
    fn failed_login_keeps_previous_session() {
        let mut kv = MemoryKvStore::new();
        let mut dir = UserDirectory::demo();
        session::login(&mut kv, &mut dir, "viewer", "viewer123", NOW).expect("login");
        assert!(session::login(&mut kv, &mut dir, "admin", "wrong", NOW).is_err());
        assert_eq!(
            session::current(&kv).map(|u| u.username),
            Some("viewer".to_string())
        );
    }

    #[test]
    fn active_user_follows_directory_changes() {
        let mut kv = MemoryKvStore::new();
        let mut dir = UserDirectory::demo();
        session::login(&mut kv, &mut dir, "viewer", "viewer123", NOW).expect("login");

        dir.update(
            "3",
            UserPatch {
                role: Some(Role::Assessor),
                ..UserPatch::default()
            },
        )
        .unwrap();
        assert_eq!(
            session::active_user(&kv, &dir).map(|u| u.role),
            Some(Role::Assessor)
        );

        dir.toggle_status("3").unwrap();
        assert_eq!(session::active_user(&kv, &dir), None);

        dir.toggle_status("3").unwrap();
        dir.delete("3").unwrap();
        assert_eq!(session::active_user(&kv, &dir), None);
    }
}
