//! Pagination, sorting and searching for list endpoints.
//!
//! Only keys in [`StudentField`] may be sorted or searched on. Dotted keys
//! reach into the linked user record.
use std::cmp::Ordering;

use serde::Deserialize;

use crate::err::{Error, Violations};
use crate::models::StudentView;

pub const MIN_TAKE: i64 = 10;
pub const MAX_TAKE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentField {
    Identifier,
    FirstName,
    LastName,
    MiddleName,
    Group,
    Faculty,
    PassportNumber,
    Email,
    UserUsername,
}

impl StudentField {
    pub const ALL: [StudentField; 9] = [
        StudentField::Identifier,
        StudentField::FirstName,
        StudentField::LastName,
        StudentField::MiddleName,
        StudentField::Group,
        StudentField::Faculty,
        StudentField::PassportNumber,
        StudentField::Email,
        StudentField::UserUsername,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            StudentField::Identifier => "identifier",
            StudentField::FirstName => "first_name",
            StudentField::LastName => "last_name",
            StudentField::MiddleName => "middle_name",
            StudentField::Group => "group",
            StudentField::Faculty => "faculty",
            StudentField::PassportNumber => "passport_number",
            StudentField::Email => "email",
            StudentField::UserUsername => "user.username",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }

    /// Column expression in the `students s LEFT JOIN users u` query.
    pub fn column(&self) -> &'static str {
        match self {
            StudentField::Identifier => "s.identifier",
            StudentField::FirstName => "s.first_name",
            StudentField::LastName => "s.last_name",
            StudentField::MiddleName => "s.middle_name",
            StudentField::Group => "s.\"group\"",
            StudentField::Faculty => "s.faculty",
            StudentField::PassportNumber => "s.passport_number",
            StudentField::Email => "s.email",
            StudentField::UserUsername => "u.username",
        }
    }

    pub fn value<'a>(&self, view: &'a StudentView) -> Option<&'a str> {
        let student = &view.student;
        match self {
            StudentField::Identifier => Some(&student.identifier),
            StudentField::FirstName => Some(&student.first_name),
            StudentField::LastName => Some(&student.last_name),
            StudentField::MiddleName => student.middle_name.as_deref(),
            StudentField::Group => Some(&student.group),
            StudentField::Faculty => Some(&student.faculty),
            StudentField::PassportNumber => Some(&student.passport_number),
            StudentField::Email => student.email.as_deref(),
            StudentField::UserUsername => view.user.as_ref().map(|user| user.username.as_str()),
        }
    }

    /// Case-insensitive substring match; absent values never match.
    pub fn matches(&self, view: &StudentView, needle: &str) -> bool {
        self.value(view)
            .map(|value| value.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false)
    }

    /// Absent values sort last in ascending order, as Postgres does.
    pub fn compare(&self, a: &StudentView, b: &StudentView) -> Ordering {
        match (self.value(a), self.value(b)) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Raw query string of a list request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub take: Option<String>,
    pub skip: Option<String>,
    pub order: Option<String>,
    pub sort_by: Option<String>,
    pub search: Option<String>,
    pub search_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    pub field: StudentField,
    pub needle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentQuery {
    pub take: Option<i64>,
    pub skip: i64,
    pub order: SortOrder,
    pub sort_by: StudentField,
    pub search: Option<Search>,
}

impl Default for StudentQuery {
    fn default() -> Self {
        Self {
            take: None,
            skip: 0,
            order: SortOrder::Asc,
            sort_by: StudentField::Identifier,
            search: None,
        }
    }
}

impl StudentQuery {
    /// Search needle as an `ILIKE` pattern with wildcards escaped.
    pub fn like_pattern(needle: &str) -> String {
        let mut pattern = String::with_capacity(needle.len() + 2);
        pattern.push('%');
        for c in needle.chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        pattern
    }
}

impl ListParams {
    pub fn into_student_query(self) -> Result<StudentQuery, Error> {
        let mut violations = Violations::new();
        let mut query = StudentQuery::default();

        if let Some(take) = self.take.as_deref().filter(|v| !v.is_empty()) {
            match take.parse::<i64>() {
                Ok(take) if (MIN_TAKE..=MAX_TAKE).contains(&take) => query.take = Some(take),
                _ => violations.push(
                    "take",
                    format!("take must be a number between {MIN_TAKE} and {MAX_TAKE}"),
                ),
            }
        }
        if let Some(skip) = self.skip.as_deref().filter(|v| !v.is_empty()) {
            match skip.parse::<i64>() {
                Ok(skip) if skip >= 0 => query.skip = skip,
                _ => violations.push("skip", "skip must be a non-negative number"),
            }
        }
        match self.order.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("asc") => query.order = SortOrder::Asc,
            Some("desc") => query.order = SortOrder::Desc,
            Some(other) => violations.push("order", format!("Invalid parameter: {other}")),
        }
        if let Some(sort_by) = self.sort_by.as_deref().filter(|v| !v.is_empty()) {
            match StudentField::parse(sort_by) {
                Some(field) => query.sort_by = field,
                None => violations.push("sort_by", format!("Invalid parameter: {sort_by}")),
            }
        }
        if let Some(search_by) = self.search_by.as_deref().filter(|v| !v.is_empty()) {
            match StudentField::parse(search_by) {
                Some(field) => {
                    let needle = self.search.unwrap_or_default();
                    if !needle.is_empty() {
                        query.search = Some(Search { field, needle });
                    }
                }
                None => violations.push("search_by", format!("Invalid parameter: {search_by}")),
            }
        }

        violations.into_invalid("Invalid list parameters")?;
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> ListParams {
        let mut params = ListParams::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "take" => params.take = value,
                "skip" => params.skip = value,
                "order" => params.order = value,
                "sort_by" => params.sort_by = value,
                "search" => params.search = value,
                "search_by" => params.search_by = value,
                _ => unreachable!(),
            }
        }
        params
    }

    #[test]
    fn defaults_sort_by_identifier_ascending() {
        let query = ListParams::default().into_student_query().unwrap();
        assert_eq!(query, StudentQuery::default());
    }

    #[test]
    fn accepts_allow_listed_keys_including_relations() {
        let query = params(&[
            ("take", "20"),
            ("skip", "40"),
            ("order", "DESC"),
            ("sort_by", "user.username"),
            ("search_by", "group"),
            ("search", "3A"),
        ])
        .into_student_query()
        .unwrap();
        assert_eq!(query.take, Some(20));
        assert_eq!(query.skip, 40);
        assert_eq!(query.order, SortOrder::Desc);
        assert_eq!(query.sort_by, StudentField::UserUsername);
        assert_eq!(
            query.search,
            Some(Search {
                field: StudentField::Group,
                needle: "3A".into()
            })
        );
    }

    #[test]
    fn rejects_unknown_keys_and_bad_paging_together() {
        let err = params(&[
            ("take", "5"),
            ("skip", "-1"),
            ("sort_by", "password"),
            ("search_by", "user.password"),
        ])
        .into_student_query()
        .unwrap_err();
        match err {
            Error::InvalidPayload { fields, .. } => {
                let paths: Vec<_> = fields.iter().map(|f| f.path.as_str()).collect();
                assert_eq!(paths, vec!["take", "skip", "sort_by", "search_by"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(StudentQuery::like_pattern("3A"), "%3A%");
        assert_eq!(StudentQuery::like_pattern("50%_x"), "%50\\%\\_x%");
    }
}
