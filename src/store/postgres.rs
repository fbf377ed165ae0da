//! Postgres-backed repositories.
//!
//! Row structs mirror the tables and are converted into domain types at the
//! boundary; enum columns are stored as text and parsed back here. Unique
//! violations (SQLSTATE `23505`) surface as [`StoreError::Conflict`], which is
//! the authoritative answer when two requests race past a pre-check.
//!
//! Users are never removed: deletion sets `deleted_at`, and every lookup
//! filters tombstoned rows out.
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{ApplicationRepository, StoreError, StoreResult, StudentRepository, UserRepository};
use crate::config::AppConfig;
use crate::models::{
    Application, ApplicationStatus, Gender, NewUser, Role, Student, StudentView, User, UserSummary,
};
use crate::query::StudentQuery;

const UNIQUE_VIOLATION: &str = "23505";

pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct DbUser {
    id: Uuid,
    username: String,
    password_hash: String,
    email: Option<String>,
    phone: Option<String>,
    roles: Vec<String>,
    is_active: bool,
    verified: bool,
    verified_at: Option<DateTime<Utc>>,
    verification_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<Uuid>,
}

#[derive(Debug, Clone, FromRow)]
struct DbStudent {
    id: Uuid,
    identifier: String,
    last_name: String,
    first_name: String,
    middle_name: Option<String>,
    pinfl: Option<String>,
    passport_number: String,
    email: Option<String>,
    birth_date: Option<NaiveDate>,
    gender: Option<String>,
    group: String,
    faculty: String,
    user_id: Option<Uuid>,
    created_by: Option<Uuid>,
    updated_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A student row joined with the username/roles of its live linked user.
#[derive(Debug, Clone, FromRow)]
struct DbStudentView {
    #[sqlx(flatten)]
    student: DbStudent,
    user_username: Option<String>,
    user_roles: Option<Vec<String>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbApplication {
    id: Uuid,
    status: String,
    message: String,
    response: Option<String>,
    student_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_roles(roles: Vec<String>) -> StoreResult<Vec<Role>> {
    roles
        .iter()
        .map(|role| Role::from_str(role).map_err(|err| StoreError::Unexpected(anyhow!(err))))
        .collect()
}

impl TryFrom<DbUser> for User {
    type Error = StoreError;

    fn try_from(row: DbUser) -> StoreResult<Self> {
        Ok(User {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            email: row.email,
            phone: row.phone,
            roles: parse_roles(row.roles)?,
            is_active: row.is_active,
            verified: row.verified,
            verified_at: row.verified_at,
            verification_code: row.verification_code,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
            deleted_by: row.deleted_by,
        })
    }
}

impl TryFrom<DbStudent> for Student {
    type Error = StoreError;

    fn try_from(row: DbStudent) -> StoreResult<Self> {
        let gender = row
            .gender
            .as_deref()
            .map(Gender::from_str)
            .transpose()
            .map_err(|err| StoreError::Unexpected(anyhow!(err)))?;
        Ok(Student {
            id: row.id,
            identifier: row.identifier,
            last_name: row.last_name,
            first_name: row.first_name,
            middle_name: row.middle_name,
            pinfl: row.pinfl,
            passport_number: row.passport_number,
            email: row.email,
            birth_date: row.birth_date,
            gender,
            group: row.group,
            faculty: row.faculty,
            user_id: row.user_id,
            created_by: row.created_by,
            updated_by: row.updated_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<DbStudentView> for StudentView {
    type Error = StoreError;

    fn try_from(row: DbStudentView) -> StoreResult<Self> {
        let user = match (row.student.user_id, row.user_username) {
            (Some(id), Some(username)) => Some(UserSummary {
                id,
                username,
                roles: parse_roles(row.user_roles.unwrap_or_default())?,
            }),
            _ => None,
        };
        Ok(StudentView {
            student: row.student.try_into()?,
            user,
        })
    }
}

impl TryFrom<DbApplication> for Application {
    type Error = StoreError;

    fn try_from(row: DbApplication) -> StoreResult<Self> {
        Ok(Application {
            id: row.id,
            status: ApplicationStatus::from_str(&row.status)
                .map_err(|err| StoreError::Unexpected(anyhow!(err)))?,
            message: row.message,
            response: row.response,
            student_id: row.student_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn map_db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| {
        let unique = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code == UNIQUE_VIOLATION)
            .unwrap_or(false);
        if unique {
            StoreError::Conflict(format!("{context}: already exists"))
        } else {
            StoreError::Unexpected(anyhow::Error::new(err).context(context))
        }
    }
}

fn role_names(roles: &[Role]) -> Vec<String> {
    roles.iter().map(|role| role.as_str().to_string()).collect()
}

const STUDENT_VIEW_SELECT: &str = "SELECT s.*, u.username AS user_username, u.roles AS user_roles \
     FROM students s LEFT JOIN users u ON u.id = s.user_id AND u.deleted_at IS NULL";

fn push_search(builder: &mut QueryBuilder<'_, Postgres>, query: &StudentQuery) {
    if let Some(search) = &query.search {
        builder
            .push(" WHERE ")
            .push(search.field.column())
            .push(" ILIKE ")
            .push_bind(StudentQuery::like_pattern(&search.needle));
    }
}

impl PostgresStore {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.database_url)
            .await
            .context("connect to postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run database migrations")?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PostgresStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let row = sqlx::query_as::<_, DbUser>(
            "INSERT INTO users (username, password_hash, email, roles, verification_code) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.email)
        .bind(role_names(&user.roles))
        .bind(&user.verification_code)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err("create user"))?;
        row.try_into()
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, DbUser>(
            "SELECT * FROM users WHERE id = $1 AND deleted_at IS NULL LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err("find user"))?
        .map(User::try_from)
        .transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, DbUser>(
            "SELECT * FROM users WHERE username = $1 AND deleted_at IS NULL LIMIT 1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err("find user by username"))?
        .map(User::try_from)
        .transpose()
    }

    async fn find_user_by_verification_code(&self, code: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, DbUser>(
            "SELECT * FROM users WHERE verification_code = $1 AND deleted_at IS NULL LIMIT 1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err("find user by verification code"))?
        .map(User::try_from)
        .transpose()
    }

    async fn mark_verified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<User> {
        sqlx::query_as::<_, DbUser>(
            "UPDATE users SET verified = TRUE, verified_at = $2, verification_code = NULL, \
             updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL RETURNING *",
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err("verify user"))?
        .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?
        .try_into()
    }

    async fn set_roles(&self, id: Uuid, roles: &[Role]) -> StoreResult<User> {
        sqlx::query_as::<_, DbUser>(
            "UPDATE users SET roles = $2, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL RETURNING *",
        )
        .bind(id)
        .bind(role_names(roles))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err("set user roles"))?
        .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?
        .try_into()
    }

    async fn soft_delete_user(&self, id: Uuid, deleted_by: Option<Uuid>) -> StoreResult<()> {
        let res = sqlx::query(
            "UPDATE users SET deleted_at = NOW(), deleted_by = $2 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(deleted_by)
        .execute(&self.pool)
        .await
        .map_err(map_db_err("soft delete user"))?;
        if res.rows_affected() < 1 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl StudentRepository for PostgresStore {
    async fn list_students(&self, query: &StudentQuery) -> StoreResult<(Vec<StudentView>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM students s \
             LEFT JOIN users u ON u.id = s.user_id AND u.deleted_at IS NULL",
        );
        push_search(&mut count, query);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err("count students"))?;

        let mut select = QueryBuilder::<Postgres>::new(STUDENT_VIEW_SELECT);
        push_search(&mut select, query);
        select
            .push(" ORDER BY ")
            .push(query.sort_by.column())
            .push(" ")
            .push(query.order.sql())
            .push(", s.id");
        if let Some(take) = query.take {
            select.push(" LIMIT ").push_bind(take);
        }
        select.push(" OFFSET ").push_bind(query.skip);

        let rows = select
            .build_query_as::<DbStudentView>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err("list students"))?;
        let students = rows
            .into_iter()
            .map(StudentView::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((students, total))
    }

    async fn find_student(&self, id: Uuid) -> StoreResult<Option<StudentView>> {
        sqlx::query_as::<_, DbStudentView>(&format!("{STUDENT_VIEW_SELECT} WHERE s.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err("find student"))?
            .map(StudentView::try_from)
            .transpose()
    }

    async fn find_student_by_identifier(&self, identifier: &str) -> StoreResult<Option<Student>> {
        sqlx::query_as::<_, DbStudent>("SELECT * FROM students WHERE identifier = $1 LIMIT 1")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err("find student by identifier"))?
            .map(Student::try_from)
            .transpose()
    }

    async fn find_student_by_user(&self, user_id: Uuid) -> StoreResult<Option<Student>> {
        sqlx::query_as::<_, DbStudent>("SELECT * FROM students WHERE user_id = $1 LIMIT 1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err("find student by user"))?
            .map(Student::try_from)
            .transpose()
    }

    async fn identifier_taken(&self, identifier: &str, except: Option<Uuid>) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM students WHERE identifier = $1 \
             AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(identifier)
        .bind(except)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err("check student identifier"))
    }

    async fn passport_taken(&self, passport: &str, except: Option<Uuid>) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM students WHERE passport_number = $1 \
             AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(passport)
        .bind(except)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err("check student passport"))
    }

    async fn create_student(&self, student: Student) -> StoreResult<Student> {
        sqlx::query_as::<_, DbStudent>(
            "INSERT INTO students (id, identifier, last_name, first_name, middle_name, pinfl, \
             passport_number, email, birth_date, gender, \"group\", faculty, user_id, created_by, \
             updated_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING *",
        )
        .bind(student.id)
        .bind(&student.identifier)
        .bind(&student.last_name)
        .bind(&student.first_name)
        .bind(&student.middle_name)
        .bind(&student.pinfl)
        .bind(&student.passport_number)
        .bind(&student.email)
        .bind(student.birth_date)
        .bind(student.gender.map(|g| g.as_str()))
        .bind(&student.group)
        .bind(&student.faculty)
        .bind(student.user_id)
        .bind(student.created_by)
        .bind(student.updated_by)
        .bind(student.created_at)
        .bind(student.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err("create student"))?
        .try_into()
    }

    async fn update_student(&self, student: Student) -> StoreResult<Student> {
        sqlx::query_as::<_, DbStudent>(
            "UPDATE students SET identifier = $2, last_name = $3, first_name = $4, \
             middle_name = $5, pinfl = $6, passport_number = $7, email = $8, birth_date = $9, \
             gender = $10, \"group\" = $11, faculty = $12, updated_by = $13, updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(student.id)
        .bind(&student.identifier)
        .bind(&student.last_name)
        .bind(&student.first_name)
        .bind(&student.middle_name)
        .bind(&student.pinfl)
        .bind(&student.passport_number)
        .bind(&student.email)
        .bind(student.birth_date)
        .bind(student.gender.map(|g| g.as_str()))
        .bind(&student.group)
        .bind(&student.faculty)
        .bind(student.updated_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err("update student"))?
        .ok_or_else(|| StoreError::NotFound(format!("student {}", student.id)))?
        .try_into()
    }

    async fn link_user(&self, student_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("UPDATE students SET user_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(student_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err("link student to user"))?;
        if res.rows_affected() < 1 {
            return Err(StoreError::NotFound(format!("student {student_id}")));
        }
        Ok(())
    }

    async fn delete_student(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err("delete student"))?;
        if res.rows_affected() < 1 {
            return Err(StoreError::NotFound(format!("student {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ApplicationRepository for PostgresStore {
    async fn create_application(&self, application: Application) -> StoreResult<Application> {
        sqlx::query_as::<_, DbApplication>(
            "INSERT INTO applications (id, status, message, response, student_id, created_at, \
             updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(application.id)
        .bind(application.status.as_str())
        .bind(&application.message)
        .bind(&application.response)
        .bind(application.student_id)
        .bind(application.created_at)
        .bind(application.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err("create application"))?
        .try_into()
    }

    async fn list_applications(&self, student_id: Option<Uuid>) -> StoreResult<Vec<Application>> {
        let rows = sqlx::query_as::<_, DbApplication>(
            "SELECT * FROM applications WHERE student_id IS NOT NULL \
             AND ($1::uuid IS NULL OR student_id = $1) ORDER BY created_at, id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err("list applications"))?;
        rows.into_iter().map(Application::try_from).collect()
    }

    async fn find_application(&self, id: Uuid) -> StoreResult<Option<Application>> {
        sqlx::query_as::<_, DbApplication>("SELECT * FROM applications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err("find application"))?
            .map(Application::try_from)
            .transpose()
    }

    async fn update_application(&self, application: Application) -> StoreResult<Application> {
        sqlx::query_as::<_, DbApplication>(
            "UPDATE applications SET status = $2, response = $3, updated_at = $4 \
             WHERE id = $1 RETURNING *",
        )
        .bind(application.id)
        .bind(application.status.as_str())
        .bind(&application.response)
        .bind(application.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err("update application"))?
        .ok_or_else(|| StoreError::NotFound(format!("application {}", application.id)))?
        .try_into()
    }
}
