use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub roles: Vec<Role>,
    pub is_active: bool,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub verification_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub deleted_by: Option<Uuid>,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Adds `role` unless already present. Returns whether the set changed.
    pub fn grant(&mut self, role: Role) -> bool {
        if self.has_role(role) {
            return false;
        }
        self.roles.push(role);
        true
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub verification_code: Option<String>,
}

/// The slice of a user that is embedded in student listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub roles: Vec<Role>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            roles: user.roles.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "m")]
    Male,
    #[serde(rename = "f")]
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "m",
            Gender::Female => "f",
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "m" => Ok(Gender::Male),
            "f" => Ok(Gender::Female),
            other => Err(format!("unknown gender `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: Uuid,
    pub identifier: String,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub pinfl: Option<String>,
    pub passport_number: String,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub group: String,
    pub faculty: String,
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing)]
    pub created_by: Option<Uuid>,
    #[serde(skip_serializing)]
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A student together with its linked account, as returned by lookups and listings.
#[derive(Debug, Clone, Serialize)]
pub struct StudentView {
    #[serde(flatten)]
    pub student: Student,
    pub user: Option<UserSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Answered,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Answered => "answered",
        }
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApplicationStatus::Pending),
            "answered" => Ok(ApplicationStatus::Answered),
            other => Err(format!("unknown application status `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Application {
    pub id: Uuid,
    pub status: ApplicationStatus,
    pub message: String,
    pub response: Option<String>,
    pub student_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn new(message: String, student_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: ApplicationStatus::Pending,
            message,
            response: None,
            student_id: Some(student_id),
            created_at: now,
            updated_at: now,
        }
    }

    /// Stores the response text. A non-empty response marks the ticket answered;
    /// clearing it never reopens the ticket.
    pub fn respond(&mut self, response: Option<String>) {
        let response = response.filter(|text| !text.trim().is_empty());
        if response.is_some() {
            self.status = ApplicationStatus::Answered;
        }
        self.response = response;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_does_not_duplicate_roles() {
        let now = Utc::now();
        let mut user = User {
            id: Uuid::new_v4(),
            username: "S123".into(),
            password_hash: String::new(),
            email: None,
            phone: None,
            roles: vec![Role::User],
            is_active: true,
            verified: false,
            verified_at: None,
            verification_code: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        };
        assert!(user.grant(Role::Student));
        assert!(!user.grant(Role::Student));
        assert_eq!(user.roles, vec![Role::User, Role::Student]);
    }

    #[test]
    fn response_answers_once_and_never_reopens() {
        let mut application = Application::new("help".into(), Uuid::new_v4());
        assert_eq!(application.status, ApplicationStatus::Pending);

        application.respond(Some("   ".into()));
        assert_eq!(application.status, ApplicationStatus::Pending);
        assert_eq!(application.response, None);

        application.respond(Some("done".into()));
        assert_eq!(application.status, ApplicationStatus::Answered);
        assert_eq!(application.response.as_deref(), Some("done"));

        application.respond(Some(String::new()));
        assert_eq!(application.status, ApplicationStatus::Answered);
        assert_eq!(application.response, None);
    }

    #[test]
    fn roles_round_trip_through_text() {
        for role in [Role::Admin, Role::User, Role::Student] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("root".parse::<Role>().is_err());
    }
}
