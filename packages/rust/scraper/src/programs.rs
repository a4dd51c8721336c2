//! Matching the program names printed on course pages against the
//! canonical program list.
//!
//! Course pages abbreviate freely ("資工系", "資訊工程學系學士班", ...), so
//! matching falls through four stages: exact, substring, core name with the
//! degree suffix stripped, and finally character-set Jaccard similarity.

use std::collections::HashSet;

pub const DEFAULT_JACCARD_THRESHOLD: f64 = 0.7;

/// Degree and unit suffixes stripped to get at a program's core name.
/// Checked in order, so "學系" must precede "系".
const PROGRAM_SUFFIXES: [&str; 10] = [
    "碩士在職專班",
    "學士班",
    "碩士班",
    "博士班",
    "進修部",
    "學位學程",
    "學程",
    "學系",
    "研究所",
    "系",
];

/// Find the canonical name for `detail_name` among `candidates`.
pub fn match_program_name<'a>(
    detail_name: &str,
    candidates: &'a [String],
    jaccard_threshold: f64,
) -> Option<&'a str> {
    let name = compact(detail_name);
    if name.is_empty() {
        return None;
    }

    if let Some(exact) = candidates.iter().find(|c| compact(c) == name) {
        return Some(exact.as_str());
    }

    // Prefer the closest length among substring hits.
    let substring = candidates
        .iter()
        .filter(|c| {
            let c = compact(c);
            !c.is_empty() && (c.contains(&name) || name.contains(&c))
        })
        .min_by_key(|c| compact(c).chars().count().abs_diff(name.chars().count()));
    if let Some(hit) = substring {
        return Some(hit.as_str());
    }

    let core = core_name(&name);
    if !core.is_empty() {
        if let Some(hit) = candidates.iter().find(|c| core_name(&compact(c)) == core) {
            return Some(hit.as_str());
        }
    }

    candidates
        .iter()
        .map(|c| (c, jaccard(&name, &compact(c))))
        .filter(|(_, score)| *score >= jaccard_threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c.as_str())
}

fn compact(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Strip trailing degree/unit suffixes repeatedly.
fn core_name(name: &str) -> String {
    let mut core = name;
    loop {
        let stripped = PROGRAM_SUFFIXES
            .iter()
            .find_map(|suffix| core.strip_suffix(suffix).filter(|rest| !rest.is_empty()));
        match stripped {
            Some(rest) => core = rest,
            None => return core.to_string(),
        }
    }
}

fn jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<char> = a.chars().collect();
    let b: HashSet<char> = b.chars().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programs() -> Vec<String> {
        vec![
            "資訊工程學系".into(),
            "電機工程學系".into(),
            "資訊管理學系碩士在職專班".into(),
            "人工智慧學程".into(),
        ]
    }

    #[test]
    fn exact_and_whitespace_insensitive() {
        let p = programs();
        assert_eq!(
            match_program_name("資訊工程學系", &p, DEFAULT_JACCARD_THRESHOLD),
            Some("資訊工程學系")
        );
        assert_eq!(match_program_name(" 電機 工程學系", &p, 0.7), Some("電機工程學系"));
    }

    #[test]
    fn substring_prefers_closest_length() {
        let p = programs();
        assert_eq!(
            match_program_name("資訊工程學系學士班", &p, 0.7),
            Some("資訊工程學系")
        );
        assert_eq!(match_program_name("人工智慧", &p, 0.7), Some("人工智慧學程"));
    }

    #[test]
    fn core_name_strips_degree_suffixes() {
        let p = vec!["資訊管理學系".to_string()];
        assert_eq!(
            match_program_name("資訊管理碩士班", &p, 0.7),
            Some("資訊管理學系")
        );
    }

    #[test]
    fn jaccard_fallback_respects_threshold() {
        let p = vec!["通訊工程學系".to_string()];
        // 電信工程學系 vs 通訊工程學系: 4 shared of 8 distinct characters.
        assert_eq!(match_program_name("電信工程學系", &p, 0.7), None);
        assert_eq!(
            match_program_name("電信工程學系", &p, 0.5),
            Some("通訊工程學系")
        );
    }

    #[test]
    fn empty_name_never_matches() {
        assert_eq!(match_program_name("  ", &programs(), 0.0), None);
    }

    #[test]
    fn config_default_matches_default_threshold() {
        let config = campusbot_shared::ScraperConfig::default();
        assert_eq!(config.program_match_threshold, DEFAULT_JACCARD_THRESHOLD);
    }
}
