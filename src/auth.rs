use async_trait::async_trait;
use axum::extract::{Path, State};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::app::AppState;
use crate::cookies::REFRESH_COOKIE;
use crate::err::{Error, Reply, Violations};
use crate::extract::{Identity, JsonBody};
use crate::models::{NewUser, Role, User};
use crate::session::SessionSnapshot;
use crate::store::StoreError;
use crate::token::KeyRole;
use crate::{creates, proceeds, Payload};

const INVALID_CREDENTIALS: &str = "Invalid username or password";
const CANNOT_REFRESH: &str = "Could not refresh access token";
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub message: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUser {
    pub username: String,
    pub password: String,
    pub roles: Vec<Role>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginUser {
    pub username: String,
    pub password: String,
}

/// Loose shape check: something@something.tld
pub fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && domain.contains('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

impl RegisterUser {
    fn validate(&self) -> Result<(), Error> {
        let mut violations = Violations::new();
        if self.username.trim().is_empty() {
            violations.push("username", "Username is required");
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            violations.push(
                "password",
                format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
            );
        }
        if self.roles.is_empty() {
            violations.push("roles", "At least one role is required");
        }
        if let Some(email) = self.email.as_deref().filter(|e| !e.is_empty()) {
            if !looks_like_email(email) {
                violations.push("email", "Invalid email format");
            }
        }
        violations.into_invalid("Invalid registration data")
    }
}

pub fn digest_verification_code(code: &str) -> String {
    let mut hasher: Sha256 = Digest::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

fn new_verification_code() -> String {
    let bytes: [u8; 32] = thread_rng().gen();
    hex::encode(bytes)
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RegisterUser>,
) -> Payload<Message> {
    body.validate()?;
    let username = body.username.trim().to_string();

    if state.users.find_user_by_username(&username).await?.is_some() {
        let mut violations = Violations::new();
        violations.push("username", "User with that username already exists");
        violations.into_conflict("User already exists")?;
    }

    let code = new_verification_code();
    let mut roles: Vec<Role> = Vec::with_capacity(body.roles.len());
    for role in body.roles {
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    let user = NewUser {
        username,
        password_hash: state.passwords.hash(&body.password)?,
        email: body.email.filter(|e| !e.is_empty()),
        roles,
        verification_code: Some(digest_verification_code(&code)),
    };

    let user = match state.users.create_user(user).await {
        Ok(user) => user,
        Err(StoreError::Conflict(_)) => {
            return Err(Error::already_exists(
                "User with that username already exists",
            ))
        }
        Err(err) => return Err(err.into()),
    };
    log::info!("registered user {} ({})", user.username, user.id);
    log::debug!("verification code for {}: {}", user.username, code);

    creates(Message {
        message: "User successfully created",
    })
}

/// Creates an account on first login from a profile that already exists.
#[async_trait]
trait Provisioner: Send + Sync {
    async fn provision(
        &self,
        state: &AppState,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, Error>;
}

/// Students log in for the first time with their identifier and passport number.
struct StudentProvisioner;

#[async_trait]
impl Provisioner for StudentProvisioner {
    async fn provision(
        &self,
        state: &AppState,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, Error> {
        let student = match state.students.find_student_by_identifier(username).await? {
            Some(student) => student,
            None => return Ok(None),
        };
        if student.user_id.is_some() || !student.passport_number.eq_ignore_ascii_case(password) {
            return Ok(None);
        }

        let new_user = NewUser {
            username: student.identifier.clone(),
            password_hash: state
                .passwords
                .hash(&student.passport_number.to_uppercase())?,
            email: student.email.clone(),
            roles: vec![Role::Student],
            verification_code: None,
        };
        let user = match state.users.create_user(new_user).await {
            Ok(user) => user,
            // lost a race with a concurrent first login or registration
            Err(StoreError::Conflict(_)) => {
                let existing = match state.users.find_user_by_username(username).await? {
                    Some(user) => user,
                    None => return Ok(None),
                };
                if password_matches(state, &existing, password).await? {
                    return Ok(Some(existing));
                }
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        state.students.link_user(student.id, user.id).await?;
        log::info!(
            "provisioned account {} for student {}",
            user.id,
            student.identifier
        );
        Ok(Some(user))
    }
}

const PROVISIONERS: &[&dyn Provisioner] = &[&StudentProvisioner];

/// Checks a login password. Provisioned students keep logging in with their
/// passport number in any case, while the stored hash is of the upper-cased one.
async fn password_matches(
    state: &AppState,
    user: &User,
    password: &str,
) -> Result<bool, Error> {
    if state.passwords.verify(password, &user.password_hash)? {
        return Ok(true);
    }
    if !user.has_role(Role::Student) {
        return Ok(false);
    }
    let passport_login = match state.students.find_student_by_user(user.id).await? {
        Some(student) => student.passport_number.eq_ignore_ascii_case(password),
        None => false,
    };
    if !passport_login {
        return Ok(false);
    }
    state
        .passwords
        .verify(&password.to_uppercase(), &user.password_hash)
}

async fn provision(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<Option<User>, Error> {
    for provisioner in PROVISIONERS {
        if let Some(user) = provisioner.provision(state, username, password).await? {
            return Ok(Some(user));
        }
    }
    Ok(None)
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(login): JsonBody<LoginUser>,
) -> Result<(CookieJar, Reply<AccessToken>), Error> {
    let username = login.username.trim();
    if username.is_empty() || login.password.is_empty() {
        return Err(Error::InvalidCredentials {
            message: INVALID_CREDENTIALS.to_string(),
        });
    }

    let user = match state.users.find_user_by_username(username).await? {
        Some(user) => {
            if password_matches(&state, &user, &login.password).await? {
                Some(user)
            } else {
                None
            }
        }
        None => provision(&state, username, &login.password).await?,
    };
    let user = user.ok_or_else(|| Error::InvalidCredentials {
        message: INVALID_CREDENTIALS.to_string(),
    })?;

    state
        .sessions
        .put(&SessionSnapshot::from(&user), state.session_ttl)
        .await?;
    let access_token = state.tokens.issue_access_token(user.id)?;
    let refresh_token = state.tokens.issue_refresh_token(user.id)?;
    log::info!("user {} logged in", user.id);

    let jar = state.cookies.with_login(jar, &access_token, &refresh_token);
    Ok((jar, proceeds(AccessToken { access_token })?))
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Reply<AccessToken>), Error> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Error::forbidden(CANNOT_REFRESH))?;
    let user_id = state
        .tokens
        .verify(&token, KeyRole::Refresh)
        .and_then(|claims| claims.subject())
        .ok_or_else(|| Error::forbidden(CANNOT_REFRESH))?;
    let session = state
        .sessions
        .get(user_id)
        .await?
        .ok_or_else(|| Error::forbidden(CANNOT_REFRESH))?;
    let user = state
        .users
        .find_user(session.id)
        .await?
        .ok_or_else(|| Error::forbidden(CANNOT_REFRESH))?;

    let access_token = state.tokens.issue_access_token(user.id)?;
    let jar = state.cookies.with_access(jar, &access_token);
    Ok((jar, proceeds(AccessToken { access_token })?))
}

pub async fn logout(
    State(state): State<AppState>,
    identity: Identity,
    jar: CookieJar,
) -> Result<(CookieJar, Reply<Message>), Error> {
    state.sessions.remove(identity.user.id).await?;
    log::info!("user {} logged out", identity.user.id);
    let jar = state.cookies.cleared(jar);
    Ok((
        jar,
        proceeds(Message {
            message: "Logged out",
        })?,
    ))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Payload<Message> {
    let digest = digest_verification_code(&code);
    let user = state
        .users
        .find_user_by_verification_code(&digest)
        .await?
        .ok_or_else(|| Error::unauthorized("Could not verify email"))?;
    state.users.mark_verified(user.id, Utc::now()).await?;
    log::info!("user {} verified email", user.id);
    proceeds(Message {
        message: "Email verified successfully",
    })
}
