use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::err::{Error, Violations};
use crate::extract::{Identity, JsonBody};
use crate::models::{Application, Role};
use crate::users::student_of;
use crate::{creates, proceeds, Payload};

#[derive(Debug, Serialize)]
pub struct ApplicationList {
    pub applications: Vec<Application>,
}

#[derive(Debug, Serialize)]
pub struct OneApplication {
    pub application: Application,
}

#[derive(Debug, Deserialize)]
pub struct CreateApplication {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AnswerApplication {
    #[serde(default)]
    pub response: Option<String>,
}

/// Students see their own tickets, everyone else sees all of them.
pub async fn list_applications(
    State(state): State<AppState>,
    identity: Identity,
) -> Payload<ApplicationList> {
    let applications = if identity.user.has_role(Role::Student) {
        match student_of(&state, &identity.user).await? {
            Some(student) => state.applications.list_applications(Some(student.id)).await?,
            None => Vec::new(),
        }
    } else {
        state.applications.list_applications(None).await?
    };
    proceeds(ApplicationList { applications })
}

pub async fn create_application(
    State(state): State<AppState>,
    identity: Identity,
    JsonBody(body): JsonBody<CreateApplication>,
) -> Payload<OneApplication> {
    let message = body.message.trim().to_string();
    if message.is_empty() {
        let mut violations = Violations::new();
        violations.push("message", "message is required");
        violations.into_invalid("Invalid application")?;
    }
    let student = student_of(&state, &identity.user)
        .await?
        .ok_or_else(|| Error::not_found("Student profile not found"))?;

    let application = state
        .applications
        .create_application(Application::new(message, student.id))
        .await?;
    log::info!(
        "application {} opened by student {}",
        application.id,
        student.identifier
    );
    creates(OneApplication { application })
}

pub async fn answer_application(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<AnswerApplication>,
) -> Payload<OneApplication> {
    identity.require(Role::Admin)?;
    let id = Uuid::parse_str(&id)?;
    let mut application = state
        .applications
        .find_application(id)
        .await?
        .ok_or_else(|| Error::not_found("Application not found"))?;

    application.respond(body.response);
    let application = state.applications.update_application(application).await?;
    log::info!(
        "application {} is {} after answer by {}",
        application.id,
        application.status.as_str(),
        identity.user.id
    );
    proceeds(OneApplication { application })
}
