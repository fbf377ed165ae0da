//! Auth cookies set on login/refresh and cleared on logout.
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use cookie::time::{Duration, OffsetDateTime};

use crate::config::AppConfig;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
pub const LOGGED_IN_COOKIE: &str = "logged_in";

#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    /// Only set in production, where the service sits behind TLS.
    pub secure: bool,
    pub access_minutes: i64,
    pub refresh_minutes: i64,
}

impl CookieSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            secure: config.production,
            access_minutes: config.access_token_expires_in,
            refresh_minutes: config.refresh_token_expires_in,
        }
    }

    fn build(
        &self,
        name: &'static str,
        value: String,
        http_only: bool,
        minutes: i64,
    ) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(http_only)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(Duration::minutes(minutes))
            .expires(OffsetDateTime::now_utc() + Duration::minutes(minutes))
            .build()
    }

    pub fn access(&self, token: &str) -> Cookie<'static> {
        self.build(ACCESS_COOKIE, token.to_string(), true, self.access_minutes)
    }

    pub fn refresh(&self, token: &str) -> Cookie<'static> {
        self.build(REFRESH_COOKIE, token.to_string(), true, self.refresh_minutes)
    }

    /// Script-readable marker that lives as long as the access token.
    pub fn logged_in(&self) -> Cookie<'static> {
        self.build(LOGGED_IN_COOKIE, "true".to_string(), false, self.access_minutes)
    }

    fn expired(&self, name: &'static str) -> Cookie<'static> {
        Cookie::build((name, ""))
            .path("/")
            .max_age(Duration::ZERO)
            .expires(OffsetDateTime::UNIX_EPOCH)
            .build()
    }

    pub fn with_login(&self, jar: CookieJar, access: &str, refresh: &str) -> CookieJar {
        jar.add(self.access(access))
            .add(self.refresh(refresh))
            .add(self.logged_in())
    }

    pub fn with_access(&self, jar: CookieJar, access: &str) -> CookieJar {
        jar.add(self.access(access)).add(self.logged_in())
    }

    pub fn cleared(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.expired(ACCESS_COOKIE))
            .add(self.expired(REFRESH_COOKIE))
            .add(self.expired(LOGGED_IN_COOKIE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(secure: bool) -> CookieSettings {
        CookieSettings {
            secure,
            access_minutes: 15,
            refresh_minutes: 60,
        }
    }

    #[test]
    fn token_cookies_are_http_only_but_marker_is_not() {
        let settings = settings(false);
        let access = settings.access("a.b.c");
        assert_eq!(access.name(), ACCESS_COOKIE);
        assert_eq!(access.value(), "a.b.c");
        assert_eq!(access.http_only(), Some(true));
        assert_eq!(access.same_site(), Some(SameSite::Lax));
        assert_eq!(access.max_age(), Some(Duration::minutes(15)));
        assert_eq!(access.secure(), Some(false));

        let refresh = settings.refresh("r.e.f");
        assert_eq!(refresh.http_only(), Some(true));
        assert_eq!(refresh.max_age(), Some(Duration::minutes(60)));

        let marker = settings.logged_in();
        assert_eq!(marker.http_only(), Some(false));
        assert_eq!(marker.value(), "true");
    }

    #[test]
    fn production_cookies_are_secure() {
        assert_eq!(settings(true).access("t").secure(), Some(true));
    }

    #[test]
    fn clearing_expires_all_three() {
        let jar = settings(false).cleared(CookieJar::new());
        for name in [ACCESS_COOKIE, REFRESH_COOKIE, LOGGED_IN_COOKIE] {
            let cookie = jar.get(name).expect(name);
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.max_age(), Some(Duration::ZERO));
        }
    }
}
