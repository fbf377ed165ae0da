//! In-memory implementation of the repositories.
//!
//! Not durable; all state lives in one `RwLock`-guarded map set so that
//! cross-entity operations (linking, listing with user fields) see a
//! consistent picture. Uniqueness mirrors the Postgres indexes.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ApplicationRepository, StoreError, StoreResult, StudentRepository, UserRepository};
use crate::models::{Application, NewUser, Role, Student, StudentView, User, UserSummary};
use crate::query::StudentQuery;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    students: HashMap<Uuid, Student>,
    applications: HashMap<Uuid, Application>,
}

impl State {
    fn live_users(&self) -> impl Iterator<Item = &User> {
        self.users.values().filter(|user| !user.is_deleted())
    }

    fn view(&self, student: &Student) -> StudentView {
        let user = student
            .user_id
            .and_then(|id| self.users.get(&id))
            .filter(|user| !user.is_deleted())
            .map(UserSummary::from);
        StudentView {
            student: student.clone(),
            user,
        }
    }

    fn check_student_unique(&self, student: &Student) -> StoreResult<()> {
        for other in self.students.values().filter(|other| other.id != student.id) {
            if other.identifier == student.identifier {
                return Err(StoreError::Conflict("student identifier taken".into()));
            }
            if other.passport_number == student.passport_number {
                return Err(StoreError::Conflict("passport number taken".into()));
            }
            if student.pinfl.is_some() && other.pinfl == student.pinfl {
                return Err(StoreError::Conflict("pinfl taken".into()));
            }
            if student.user_id.is_some() && other.user_id == student.user_id {
                return Err(StoreError::Conflict("user already linked".into()));
            }
        }
        Ok(())
    }

    fn user_mut(&mut self, id: Uuid) -> StoreResult<&mut User> {
        self.users
            .get_mut(&id)
            .filter(|user| !user.is_deleted())
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.state.write().await;
        if state.live_users().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!(
                "username `{}` taken",
                user.username
            )));
        }
        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            password_hash: user.password_hash,
            email: user.email,
            phone: None,
            roles: user.roles,
            is_active: false,
            verified: false,
            verified_at: None,
            verification_code: user.verification_code,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.get(&id).filter(|u| !u.is_deleted()).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        let user = state.live_users().find(|u| u.username == username).cloned();
        Ok(user)
    }

    async fn find_user_by_verification_code(&self, code: &str) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        let user = state
            .live_users()
            .find(|u| u.verification_code.as_deref() == Some(code))
            .cloned();
        Ok(user)
    }

    async fn mark_verified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<User> {
        let mut state = self.state.write().await;
        let user = state.user_mut(id)?;
        user.verified = true;
        user.verified_at = Some(at);
        user.verification_code = None;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_roles(&self, id: Uuid, roles: &[Role]) -> StoreResult<User> {
        let mut state = self.state.write().await;
        let user = state.user_mut(id)?;
        user.roles = roles.to_vec();
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn soft_delete_user(&self, id: Uuid, deleted_by: Option<Uuid>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state.user_mut(id)?;
        user.deleted_at = Some(Utc::now());
        user.deleted_by = deleted_by;
        Ok(())
    }
}

#[async_trait]
impl StudentRepository for InMemoryStore {
    async fn list_students(&self, query: &StudentQuery) -> StoreResult<(Vec<StudentView>, i64)> {
        let state = self.state.read().await;
        let mut views: Vec<StudentView> = state
            .students
            .values()
            .map(|student| state.view(student))
            .filter(|view| match &query.search {
                Some(search) => search.field.matches(view, &search.needle),
                None => true,
            })
            .collect();
        views.sort_by(|a, b| {
            query
                .order
                .apply(query.sort_by.compare(a, b))
                .then_with(|| a.student.id.cmp(&b.student.id))
        });
        let total = views.len() as i64;
        let page = views
            .into_iter()
            .skip(query.skip as usize)
            .take(query.take.map(|take| take as usize).unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }

    async fn find_student(&self, id: Uuid) -> StoreResult<Option<StudentView>> {
        let state = self.state.read().await;
        Ok(state.students.get(&id).map(|student| state.view(student)))
    }

    async fn find_student_by_identifier(&self, identifier: &str) -> StoreResult<Option<Student>> {
        let state = self.state.read().await;
        Ok(state
            .students
            .values()
            .find(|s| s.identifier == identifier)
            .cloned())
    }

    async fn find_student_by_user(&self, user_id: Uuid) -> StoreResult<Option<Student>> {
        let state = self.state.read().await;
        Ok(state
            .students
            .values()
            .find(|s| s.user_id == Some(user_id))
            .cloned())
    }

    async fn identifier_taken(&self, identifier: &str, except: Option<Uuid>) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .students
            .values()
            .any(|s| s.identifier == identifier && Some(s.id) != except))
    }

    async fn passport_taken(&self, passport: &str, except: Option<Uuid>) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .students
            .values()
            .any(|s| s.passport_number == passport && Some(s.id) != except))
    }

    async fn create_student(&self, student: Student) -> StoreResult<Student> {
        let mut state = self.state.write().await;
        state.check_student_unique(&student)?;
        state.students.insert(student.id, student.clone());
        Ok(student)
    }

    async fn update_student(&self, mut student: Student) -> StoreResult<Student> {
        let mut state = self.state.write().await;
        if !state.students.contains_key(&student.id) {
            return Err(StoreError::NotFound(format!("student {}", student.id)));
        }
        state.check_student_unique(&student)?;
        student.updated_at = Utc::now();
        state.students.insert(student.id, student.clone());
        Ok(student)
    }

    async fn link_user(&self, student_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state
            .students
            .values()
            .any(|s| s.user_id == Some(user_id) && s.id != student_id)
        {
            return Err(StoreError::Conflict("user already linked".into()));
        }
        let student = state
            .students
            .get_mut(&student_id)
            .ok_or_else(|| StoreError::NotFound(format!("student {student_id}")))?;
        student.user_id = Some(user_id);
        student.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_student(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.students.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("student {id}")));
        }
        for application in state.applications.values_mut() {
            if application.student_id == Some(id) {
                application.student_id = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryStore {
    async fn create_application(&self, application: Application) -> StoreResult<Application> {
        let mut state = self.state.write().await;
        if let Some(student_id) = application.student_id {
            if !state.students.contains_key(&student_id) {
                return Err(StoreError::NotFound(format!("student {student_id}")));
            }
        }
        state
            .applications
            .insert(application.id, application.clone());
        Ok(application)
    }

    async fn list_applications(&self, student_id: Option<Uuid>) -> StoreResult<Vec<Application>> {
        let state = self.state.read().await;
        let mut applications: Vec<Application> = state
            .applications
            .values()
            .filter(|a| a.student_id.is_some())
            .filter(|a| student_id.is_none() || a.student_id == student_id)
            .cloned()
            .collect();
        applications.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(applications)
    }

    async fn find_application(&self, id: Uuid) -> StoreResult<Option<Application>> {
        let state = self.state.read().await;
        Ok(state.applications.get(&id).cloned())
    }

    async fn update_application(&self, application: Application) -> StoreResult<Application> {
        let mut state = self.state.write().await;
        match state.applications.get_mut(&application.id) {
            Some(existing) => {
                *existing = application.clone();
                Ok(application)
            }
            None => Err(StoreError::NotFound(format!(
                "application {}",
                application.id
            ))),
        }
    }
}
