//! Student profile handlers. Everything except `/students/me` is admin only.
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::looks_like_email;
use crate::err::{Error, Violations};
use crate::extract::{Identity, JsonBody};
use crate::models::{Gender, Role, Student, StudentView};
use crate::query::ListParams;
use crate::store::StoreError;
use crate::users::student_of;
use crate::{creates, proceeds, Payload};

pub const PINFL_LEN: usize = 14;
pub const MIN_PASSPORT_LEN: usize = 7;
pub const MAX_PASSPORT_LEN: usize = 14;

#[derive(Debug, Serialize)]
pub struct StudentList {
    pub students: Vec<StudentView>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct OneStudent<S> {
    pub student: S,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStudent {
    pub identifier: String,
    pub last_name: String,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub pinfl: Option<String>,
    pub passport_number: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    pub group: String,
    pub faculty: String,
}

/// Partial update. For the optional fields, an absent key leaves the value
/// alone while `null` or `""` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateStudent {
    pub identifier: Option<String>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub middle_name: Option<Option<String>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub pinfl: Option<Option<String>>,
    pub passport_number: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub birth_date: Option<Option<String>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub gender: Option<Option<String>>,
    pub group: Option<String>,
    pub faculty: Option<String>,
}

/// Blank strings are stored as null.
fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_birth_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|at| at.date_naive())
        })
}

fn required(violations: &mut Violations, path: &str, value: &str) {
    if value.trim().is_empty() {
        violations.push(path, format!("{path} is required"));
    }
}

fn check_pinfl(violations: &mut Violations, pinfl: Option<&str>) {
    if let Some(pinfl) = pinfl {
        if pinfl.chars().count() != PINFL_LEN {
            violations.push("pinfl", format!("pinfl must be {PINFL_LEN} characters"));
        }
    }
}

fn check_passport(violations: &mut Violations, passport: &str) {
    let len = passport.chars().count();
    if !(MIN_PASSPORT_LEN..=MAX_PASSPORT_LEN).contains(&len) {
        violations.push(
            "passport_number",
            format!(
                "passport_number must be between {MIN_PASSPORT_LEN} and {MAX_PASSPORT_LEN} characters"
            ),
        );
    }
}

fn check_email(violations: &mut Violations, email: Option<&str>) {
    if let Some(email) = email {
        if !looks_like_email(email) {
            violations.push("email", "Invalid email format");
        }
    }
}

fn check_birth_date(violations: &mut Violations, text: Option<&str>) -> Option<NaiveDate> {
    let text = text?;
    let date = parse_birth_date(text);
    if date.is_none() {
        violations.push("birth_date", "birth_date must be a date (YYYY-MM-DD)");
    }
    date
}

fn check_gender(violations: &mut Violations, text: Option<&str>) -> Option<Gender> {
    let text = text?;
    match text.parse() {
        Ok(gender) => Some(gender),
        Err(_) => {
            violations.push("gender", "gender must be `m` or `f`");
            None
        }
    }
}

impl CreateStudent {
    fn into_student(self, created_by: Uuid) -> Result<Student, Error> {
        let mut violations = Violations::new();
        required(&mut violations, "identifier", &self.identifier);
        required(&mut violations, "last_name", &self.last_name);
        required(&mut violations, "first_name", &self.first_name);
        required(&mut violations, "group", &self.group);
        required(&mut violations, "faculty", &self.faculty);

        let passport_number = self.passport_number.trim().to_string();
        check_passport(&mut violations, &passport_number);
        let pinfl = blank_to_none(self.pinfl);
        check_pinfl(&mut violations, pinfl.as_deref());
        let email = blank_to_none(self.email);
        check_email(&mut violations, email.as_deref());
        let birth_date =
            check_birth_date(&mut violations, blank_to_none(self.birth_date).as_deref());
        let gender = check_gender(&mut violations, blank_to_none(self.gender).as_deref());
        violations.into_invalid("Invalid student data")?;

        let now = Utc::now();
        Ok(Student {
            id: Uuid::new_v4(),
            identifier: self.identifier.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            middle_name: blank_to_none(self.middle_name),
            pinfl,
            passport_number,
            email,
            birth_date,
            gender,
            group: self.group.trim().to_string(),
            faculty: self.faculty.trim().to_string(),
            user_id: None,
            created_by: Some(created_by),
            updated_by: Some(created_by),
            created_at: now,
            updated_at: now,
        })
    }
}

impl UpdateStudent {
    /// Merges the present fields into `student`.
    fn apply(self, student: &mut Student, updated_by: Uuid) -> Result<(), Error> {
        let mut violations = Violations::new();

        let texts = [
            ("identifier", self.identifier, &mut student.identifier),
            ("last_name", self.last_name, &mut student.last_name),
            ("first_name", self.first_name, &mut student.first_name),
            ("group", self.group, &mut student.group),
            ("faculty", self.faculty, &mut student.faculty),
        ];
        for (path, value, slot) in texts {
            if let Some(value) = value {
                required(&mut violations, path, &value);
                *slot = value.trim().to_string();
            }
        }
        if let Some(passport) = self.passport_number {
            let passport = passport.trim().to_string();
            check_passport(&mut violations, &passport);
            student.passport_number = passport;
        }
        if let Some(middle_name) = self.middle_name {
            student.middle_name = blank_to_none(middle_name);
        }
        if let Some(pinfl) = self.pinfl {
            let pinfl = blank_to_none(pinfl);
            check_pinfl(&mut violations, pinfl.as_deref());
            student.pinfl = pinfl;
        }
        if let Some(email) = self.email {
            let email = blank_to_none(email);
            check_email(&mut violations, email.as_deref());
            student.email = email;
        }
        if let Some(birth_date) = self.birth_date {
            student.birth_date =
                check_birth_date(&mut violations, blank_to_none(birth_date).as_deref());
        }
        if let Some(gender) = self.gender {
            student.gender = check_gender(&mut violations, blank_to_none(gender).as_deref());
        }
        violations.into_invalid("Invalid student data")?;

        student.updated_by = Some(updated_by);
        student.updated_at = Utc::now();
        Ok(())
    }
}

/// Identifier and passport number must be free, reported together.
async fn check_unique(
    state: &AppState,
    student: &Student,
    except: Option<Uuid>,
) -> Result<(), Error> {
    let mut violations = Violations::new();
    if state
        .students
        .identifier_taken(&student.identifier, except)
        .await?
    {
        violations.push("identifier", "Student with that identifier already exists");
    }
    if state
        .students
        .passport_taken(&student.passport_number, except)
        .await?
    {
        violations.push(
            "passport_number",
            "Student with that passport number already exists",
        );
    }
    violations.into_conflict("Student already exists")
}

/// Links the account named after the student's identifier, if there is one
/// and it has no profile yet, and grants it the student role.
async fn link_existing_user(state: &AppState, student: &Student) -> Result<(), Error> {
    let mut user = match state
        .users
        .find_user_by_username(&student.identifier)
        .await?
    {
        Some(user) => user,
        None => return Ok(()),
    };
    if state.students.find_student_by_user(user.id).await?.is_some() {
        log::debug!("user {} already has a student profile", user.id);
        return Ok(());
    }
    state.students.link_user(student.id, user.id).await?;
    if user.grant(Role::Student) {
        state.users.set_roles(user.id, &user.roles).await?;
    }
    log::info!("linked user {} to student {}", user.id, student.identifier);
    Ok(())
}

async fn view_of(state: &AppState, id: Uuid) -> Result<StudentView, Error> {
    state
        .students
        .find_student(id)
        .await?
        .ok_or_else(|| Error::not_found("Student not found"))
}

pub async fn list_students(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<ListParams>,
) -> Payload<StudentList> {
    identity.require(Role::Admin)?;
    let query = params.into_student_query()?;
    let (students, total) = state.students.list_students(&query).await?;
    proceeds(StudentList { students, total })
}

pub async fn create_student(
    State(state): State<AppState>,
    identity: Identity,
    JsonBody(body): JsonBody<CreateStudent>,
) -> Payload<OneStudent<StudentView>> {
    identity.require(Role::Admin)?;
    let student = body.into_student(identity.user.id)?;
    check_unique(&state, &student, None).await?;

    let student = state.students.create_student(student).await?;
    log::info!(
        "student {} created by {}",
        student.identifier,
        identity.user.id
    );
    link_existing_user(&state, &student).await?;

    creates(OneStudent {
        student: view_of(&state, student.id).await?,
    })
}

pub async fn me_as_student(
    State(state): State<AppState>,
    identity: Identity,
) -> Payload<OneStudent<Student>> {
    identity.require(Role::Student)?;
    let student = student_of(&state, &identity.user)
        .await?
        .ok_or_else(|| Error::not_found("Student profile not found"))?;
    proceeds(OneStudent { student })
}

pub async fn get_student(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Payload<OneStudent<StudentView>> {
    identity.require(Role::Admin)?;
    let id = Uuid::parse_str(&id)?;
    proceeds(OneStudent {
        student: view_of(&state, id).await?,
    })
}

pub async fn update_student(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<UpdateStudent>,
) -> Payload<OneStudent<StudentView>> {
    identity.require(Role::Admin)?;
    let id = Uuid::parse_str(&id)?;
    let mut student = view_of(&state, id).await?.student;
    body.apply(&mut student, identity.user.id)?;
    check_unique(&state, &student, Some(id)).await?;

    state.students.update_student(student).await?;
    log::info!("student {} updated by {}", id, identity.user.id);
    proceeds(OneStudent {
        student: view_of(&state, id).await?,
    })
}

pub async fn delete_student(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    identity.require(Role::Admin)?;
    let id = Uuid::parse_str(&id)?;
    let student = view_of(&state, id).await?.student;

    state.students.delete_student(id).await?;
    if let Some(user_id) = student.user_id {
        match state
            .users
            .soft_delete_user(user_id, Some(identity.user.id))
            .await
        {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }
    log::info!("student {} deleted by {}", id, identity.user.id);
    Ok(StatusCode::NO_CONTENT)
}
