//! Repository traits over the credential store.
//!
//! Handlers only see these traits; [`postgres::PostgresStore`] backs them in
//! production and [`memory::InMemoryStore`] in tests. Both enforce the same
//! uniqueness rules and report violations as [`StoreError::Conflict`].
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Application, NewUser, Role, Student, StudentView, User};
use crate::query::StudentQuery;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    /// Non-deleted user by id.
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Non-deleted user by username.
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_verification_code(&self, code: &str) -> StoreResult<Option<User>>;
    /// Marks the user verified and clears the stored verification code.
    async fn mark_verified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<User>;
    async fn set_roles(&self, id: Uuid, roles: &[Role]) -> StoreResult<User>;
    async fn soft_delete_user(&self, id: Uuid, deleted_by: Option<Uuid>) -> StoreResult<()>;
}

#[async_trait]
pub trait StudentRepository: Send + Sync {
    /// One page of matching students and the total number of matches.
    async fn list_students(&self, query: &StudentQuery) -> StoreResult<(Vec<StudentView>, i64)>;
    async fn find_student(&self, id: Uuid) -> StoreResult<Option<StudentView>>;
    async fn find_student_by_identifier(&self, identifier: &str) -> StoreResult<Option<Student>>;
    async fn find_student_by_user(&self, user_id: Uuid) -> StoreResult<Option<Student>>;
    async fn identifier_taken(&self, identifier: &str, except: Option<Uuid>) -> StoreResult<bool>;
    async fn passport_taken(&self, passport: &str, except: Option<Uuid>) -> StoreResult<bool>;
    async fn create_student(&self, student: Student) -> StoreResult<Student>;
    async fn update_student(&self, student: Student) -> StoreResult<Student>;
    async fn link_user(&self, student_id: Uuid, user_id: Uuid) -> StoreResult<()>;
    async fn delete_student(&self, id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn create_application(&self, application: Application) -> StoreResult<Application>;
    /// Applications of one student, or all of them, that still have a student.
    async fn list_applications(&self, student_id: Option<Uuid>) -> StoreResult<Vec<Application>>;
    async fn find_application(&self, id: Uuid) -> StoreResult<Option<Application>>;
    async fn update_application(&self, application: Application) -> StoreResult<Application>;
}
