pub mod app;
pub mod applications;
pub mod auth;
pub mod config;
pub mod cookies;
pub mod err;
pub mod extract;
pub mod models;
pub mod password;
pub mod query;
pub mod session;
pub mod store;
pub mod students;
pub mod token;
pub mod users;

use axum::http::StatusCode;
use serde::Serialize;

use crate::err::{Error, Fine, Reply};

pub type Payload<T> = Result<Reply<T>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Fine(StatusCode::OK, value))
}

pub fn creates<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Fine(StatusCode::CREATED, value))
}
