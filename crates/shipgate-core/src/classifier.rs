use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approval,
    Denial,
    Neither,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Approval => "approval",
            Verdict::Denial => "denial",
            Verdict::Neither => "neither",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Classifies a comment body against configurable approve/deny keyword sets.
///
/// Matching is case-insensitive, tolerates surrounding whitespace and at most
/// one trailing `.` or `!`, and must consume the entire body — "I approve"
/// and "approve please" do not match. Classification is total: unrecognized
/// text is `Neither`, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
    #[serde(default = "default_approve_keywords")]
    pub approve_keywords: Vec<String>,
    #[serde(default = "default_deny_keywords")]
    pub deny_keywords: Vec<String>,
}

fn default_approve_keywords() -> Vec<String> {
    ["approve", "approved", "lgtm", "yes", "/approve"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_deny_keywords() -> Vec<String> {
    ["deny", "denied", "reject", "rejected", "no", "/deny"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            approve_keywords: default_approve_keywords(),
            deny_keywords: default_deny_keywords(),
        }
    }
}

/// Trim surrounding whitespace and strip at most one trailing `.` or `!`.
fn normalize(body: &str) -> &str {
    let trimmed = body.trim();
    trimmed
        .strip_suffix(['.', '!'])
        .map(str::trim_end)
        .unwrap_or(trimmed)
}

impl Classifier {
    pub fn classify(&self, body: &str) -> Verdict {
        let norm = normalize(body);
        if norm.is_empty() {
            return Verdict::Neither;
        }
        // Custom keyword sets may overlap; denial wins.
        if matches_any(&self.deny_keywords, norm) {
            return Verdict::Denial;
        }
        if matches_any(&self.approve_keywords, norm) {
            return Verdict::Approval;
        }
        Verdict::Neither
    }
}

fn matches_any(keywords: &[String], body: &str) -> bool {
    keywords.iter().any(|k| k.trim().eq_ignore_ascii_case(body))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_approvals() {
        let c = Classifier::default();
        assert_eq!(c.classify("approve"), Verdict::Approval);
        assert_eq!(c.classify("Approved"), Verdict::Approval);
        assert_eq!(c.classify("LGTM"), Verdict::Approval);
        assert_eq!(c.classify("/approve"), Verdict::Approval);
    }

    #[test]
    fn default_denials() {
        let c = Classifier::default();
        assert_eq!(c.classify("deny"), Verdict::Denial);
        assert_eq!(c.classify("Rejected"), Verdict::Denial);
        assert_eq!(c.classify("no"), Verdict::Denial);
        assert_eq!(c.classify("/deny"), Verdict::Denial);
    }

    #[test]
    fn whitespace_and_one_trailing_punct_tolerated() {
        let c = Classifier::default();
        assert_eq!(c.classify("  approve  "), Verdict::Approval);
        assert_eq!(c.classify("approved."), Verdict::Approval);
        assert_eq!(c.classify(" lgtm! "), Verdict::Approval);
        assert_eq!(c.classify("deny !"), Verdict::Denial);
    }

    #[test]
    fn partial_matches_do_not_classify() {
        let c = Classifier::default();
        assert_eq!(c.classify("I approve"), Verdict::Neither);
        assert_eq!(c.classify("approve please"), Verdict::Neither);
        assert_eq!(c.classify("this looks good"), Verdict::Neither);
    }

    #[test]
    fn double_trailing_punct_does_not_classify() {
        let c = Classifier::default();
        assert_eq!(c.classify("approve!!"), Verdict::Neither);
        assert_eq!(c.classify("approved.."), Verdict::Neither);
    }

    #[test]
    fn empty_body_is_neither() {
        let c = Classifier::default();
        assert_eq!(c.classify(""), Verdict::Neither);
        assert_eq!(c.classify("   "), Verdict::Neither);
        assert_eq!(c.classify("!"), Verdict::Neither);
    }

    #[test]
    fn overlapping_custom_keywords_deny_wins() {
        let c = Classifier {
            approve_keywords: vec!["ship".to_string()],
            deny_keywords: vec!["ship".to_string()],
        };
        assert_eq!(c.classify("ship"), Verdict::Denial);
    }

    #[test]
    fn custom_keywords_replace_defaults() {
        let c = Classifier {
            approve_keywords: vec!["ship it".to_string()],
            deny_keywords: vec!["hold".to_string()],
        };
        assert_eq!(c.classify("Ship It"), Verdict::Approval);
        assert_eq!(c.classify("hold"), Verdict::Denial);
        assert_eq!(c.classify("approve"), Verdict::Neither);
    }

    #[test]
    fn keyword_defaults_via_serde() {
        let c: Classifier = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c, Classifier::default());
    }
}
