//! Where each entity kind lives on the upstream site.
//!
//! A [`Route`] names a host alias plus path segments and query pairs; the
//! alias expands to one URL per configured origin.

use std::collections::BTreeMap;

use campusbot_shared::{CampusBotError, EntityKind, Result, Student};
use url::Url;

pub const STUDENT_HOST: &str = "lms";
pub const CONTACT_HOST: &str = "directory";
pub const COURSE_HOST: &str = "sea";

/// A resource on an aliased host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub alias: &'static str,
    pub segments: Vec<String>,
    pub query: Vec<(&'static str, String)>,
}

impl Route {
    fn new(alias: &'static str, segments: &[&str]) -> Self {
        Self {
            alias,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            query: Vec::new(),
        }
    }

    fn with_segment(mut self, segment: &str) -> Self {
        self.segments.push(segment.to_string());
        self
    }

    fn with_query(mut self, key: &'static str, value: &str) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    /// Search results page for a free-text term. Student terms that look
    /// like an ID search by ID prefix instead of by name.
    pub fn search(kind: EntityKind, term: &str) -> Self {
        match kind {
            EntityKind::Student if Student::looks_like_id(term) => {
                Self::new(STUDENT_HOST, &["students", "search"]).with_query("id_prefix", term)
            }
            EntityKind::Student => {
                Self::new(STUDENT_HOST, &["students", "search"]).with_query("name", term)
            }
            EntityKind::Contact => {
                Self::new(CONTACT_HOST, &["contacts", "search"]).with_query("q", term)
            }
            EntityKind::Course => {
                Self::new(COURSE_HOST, &["courses", "search"]).with_query("title", term)
            }
            EntityKind::Syllabus => {
                Self::new(COURSE_HOST, &["syllabi", "search"]).with_query("title", term)
            }
        }
    }

    /// Detail page for one primary key.
    pub fn detail(kind: EntityKind, key: &str) -> Self {
        match kind {
            EntityKind::Student => {
                Self::new(STUDENT_HOST, &["students", "search"]).with_query("id", key)
            }
            EntityKind::Contact => Self::new(CONTACT_HOST, &["contacts"]).with_segment(key),
            EntityKind::Course => Self::new(COURSE_HOST, &["courses"]).with_segment(key),
            EntityKind::Syllabus => Self::new(COURSE_HOST, &["syllabi"]).with_segment(key),
        }
    }

    /// Bulk listing used by warmup: a cohort id prefix for students, an
    /// organization name for contacts, a `year-term` semester for courses
    /// and syllabi.
    pub fn catalog(kind: EntityKind, seed: &str) -> Self {
        match kind {
            EntityKind::Student => {
                Self::new(STUDENT_HOST, &["students", "search"]).with_query("id_prefix", seed)
            }
            EntityKind::Contact => {
                Self::new(CONTACT_HOST, &["contacts", "organization"]).with_query("name", seed)
            }
            EntityKind::Course => {
                Self::new(COURSE_HOST, &["courses", "semester"]).with_segment(seed)
            }
            EntityKind::Syllabus => {
                Self::new(COURSE_HOST, &["syllabi", "semester"]).with_segment(seed)
            }
        }
    }

    /// Index of canonical degree-program names.
    pub fn programs() -> Self {
        Self::new(COURSE_HOST, &["programs"])
    }
}

/// Alias → origin table, parsed once from config.
#[derive(Debug, Clone)]
pub struct UpstreamRoutes {
    origins: BTreeMap<String, Vec<Url>>,
}

impl UpstreamRoutes {
    pub fn new(base_urls: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut origins = BTreeMap::new();
        for (alias, urls) in base_urls {
            let parsed = urls
                .iter()
                .map(|u| {
                    Url::parse(u).map_err(|e| {
                        CampusBotError::config(format!("base URL {u:?} for {alias}: {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if parsed.is_empty() {
                return Err(CampusBotError::config(format!(
                    "base URL alias {alias} has no origins"
                )));
            }
            origins.insert(alias.clone(), parsed);
        }
        Ok(Self { origins })
    }

    /// One URL per origin of the route's alias, in configured order.
    pub fn resolve(&self, route: &Route) -> Result<Vec<Url>> {
        let bases = self.origins.get(route.alias).ok_or_else(|| {
            CampusBotError::config(format!("no base URL configured for {}", route.alias))
        })?;

        bases
            .iter()
            .map(|base| {
                let mut url = base.clone();
                url.path_segments_mut()
                    .map_err(|_| {
                        CampusBotError::config(format!("base URL {base} cannot take a path"))
                    })?
                    .pop_if_empty()
                    .extend(&route.segments);
                if !route.query.is_empty() {
                    let mut pairs = url.query_pairs_mut();
                    for (key, value) in &route.query {
                        pairs.append_pair(key, value);
                    }
                }
                Ok(url)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> UpstreamRoutes {
        UpstreamRoutes::new(&BTreeMap::from([
            (
                "sea".to_string(),
                vec![
                    "https://sea.example.edu/app/".to_string(),
                    "https://sea2.example.edu".to_string(),
                ],
            ),
            ("directory".to_string(), vec!["https://dir.example.edu".to_string()]),
        ]))
        .unwrap()
    }

    #[test]
    fn resolves_every_origin_of_an_alias() {
        let urls = routes()
            .resolve(&Route::detail(EntityKind::Course, "1131U0001"))
            .unwrap();
        let urls: Vec<&str> = urls.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://sea.example.edu/app/courses/1131U0001",
                "https://sea2.example.edu/courses/1131U0001",
            ]
        );
    }

    #[test]
    fn encodes_query_and_segments() {
        let urls = routes()
            .resolve(&Route::search(EntityKind::Contact, "資工 系&"))
            .unwrap();
        let url = &urls[0];
        assert_eq!(url.path(), "/contacts/search");
        let q: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(q, vec![("q".to_string(), "資工 系&".to_string())]);

        let urls = routes()
            .resolve(&Route::detail(EntityKind::Contact, "a/b"))
            .unwrap();
        assert_eq!(urls[0].path(), "/contacts/a%2Fb");
    }

    #[test]
    fn student_search_switches_on_id_like_terms() {
        let by_id = Route::search(EntityKind::Student, "4112");
        assert_eq!(by_id.query, vec![("id_prefix", "4112".to_string())]);
        let by_name = Route::search(EntityKind::Student, "王小明");
        assert_eq!(by_name.query, vec![("name", "王小明".to_string())]);
    }

    #[test]
    fn unknown_alias_is_a_config_error() {
        let err = routes()
            .resolve(&Route::search(EntityKind::Student, "王"))
            .unwrap_err();
        assert_eq!(err.kind(), campusbot_shared::ErrorKind::Internal);
    }

    #[test]
    fn empty_origin_list_is_rejected() {
        let result = UpstreamRoutes::new(&BTreeMap::from([("lms".to_string(), vec![])]));
        assert!(result.is_err());
    }
}
