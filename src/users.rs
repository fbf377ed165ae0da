use axum::extract::State;
use serde::Serialize;

use crate::app::AppState;
use crate::err::Error;
use crate::extract::Identity;
use crate::models::{Role, Student, User};
use crate::{proceeds, Payload};

#[derive(Debug, Serialize)]
pub struct Me {
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<Student>,
}

/// Student profile of `user`: the linked one, or one whose identifier is the username.
pub async fn student_of(state: &AppState, user: &User) -> Result<Option<Student>, Error> {
    if let Some(student) = state.students.find_student_by_user(user.id).await? {
        return Ok(Some(student));
    }
    let student = state
        .students
        .find_student_by_identifier(&user.username)
        .await?;
    Ok(student.filter(|student| student.user_id.map_or(true, |id| id == user.id)))
}

pub async fn me(State(state): State<AppState>, identity: Identity) -> Payload<Me> {
    let student = if identity.user.has_role(Role::Student) {
        student_of(&state, &identity.user).await?
    } else {
        None
    };
    proceeds(Me {
        user: identity.user,
        student,
    })
}
