//! Evaluator verdicts: the approval sentinel and best-effort critique parsing.
//!
//! Evaluators answer with either the exact sentinel [`APPROVAL_SENTINEL`] or a
//! free-form critique. Critique structure is extracted for logging only; a
//! critique missing sections still flows downstream unchanged.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Machine-checkable approval answer written to `evaluation_feedback`.
pub const APPROVAL_SENTINEL: &str = "APPROVED";

/// How evaluator text is compared against [`APPROVAL_SENTINEL`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMatch {
    /// Byte-for-byte equality. `"APPROVED "` and `"approved"` do not match.
    #[default]
    Exact,
    /// Equality after trimming whitespace, ignoring ASCII case.
    Normalized,
}

impl ApprovalMatch {
    pub fn is_approval(self, text: &str) -> bool {
        match self {
            ApprovalMatch::Exact => text == APPROVAL_SENTINEL,
            ApprovalMatch::Normalized => text.trim().eq_ignore_ascii_case(APPROVAL_SENTINEL),
        }
    }
}

/// Classified evaluator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Approved,
    Critique(Critique),
}

impl Feedback {
    pub fn classify(text: &str, mode: ApprovalMatch) -> Self {
        if mode.is_approval(text) {
            Feedback::Approved
        } else {
            Feedback::Critique(Critique::parse(text))
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Feedback::Approved)
    }
}

/// Critique sections recognised in evaluator output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CritiqueSection {
    Assessment,
    Strengths,
    Weaknesses,
    Suggestions,
}

impl CritiqueSection {
    pub fn as_str(self) -> &'static str {
        match self {
            CritiqueSection::Assessment => "assessment",
            CritiqueSection::Strengths => "strengths",
            CritiqueSection::Weaknesses => "weaknesses",
            CritiqueSection::Suggestions => "suggestions",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "assessment" => Some(CritiqueSection::Assessment),
            "strengths" => Some(CritiqueSection::Strengths),
            "weaknesses" | "gaps" => Some(CritiqueSection::Weaknesses),
            "suggestions" | "improvements" | "recommendations" => {
                Some(CritiqueSection::Suggestions)
            }
            _ => None,
        }
    }
}

/// Structured view over a free-form critique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Critique {
    pub assessment: Option<String>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
    /// Original evaluator text, kept verbatim.
    pub raw: String,
}

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[ \t]*(?:[-•][ \t]+)?(#{1,6}[ \t]*)?(\*\*|__)?[ \t]*(?:\d+[.)][ \t]*)?(?:specific[ \t]+|actionable[ \t]+|overall[ \t]+)?(assessment|strengths|weaknesses|gaps|suggestions|improvements|recommendations)\b([^:\n*_]*)(?:\*\*|__)?[ \t]*(:)?(?:\*\*|__)?[ \t]*(.*)$",
    )
    .expect("critique heading regex should compile")
});

static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]*(?:[-*•]|\d+[.)])[ \t]+(.*)$").expect("bullet regex should compile")
});

impl Critique {
    /// Extract sections by heading. Never fails; unrecognised text is ignored.
    pub fn parse(text: &str) -> Self {
        let mut critique = Critique {
            raw: text.to_string(),
            ..Critique::default()
        };
        let mut current: Option<(CritiqueSection, Vec<String>)> = None;

        for line in text.lines() {
            if let Some((section, inline)) = parse_heading(line) {
                if let Some((prev, body)) = current.take() {
                    critique.fill(prev, &body);
                }
                let mut body = Vec::new();
                if !inline.is_empty() {
                    body.push(inline);
                }
                current = Some((section, body));
                continue;
            }
            if let Some((_, body)) = current.as_mut() {
                body.push(line.to_string());
            }
        }
        if let Some((section, body)) = current {
            critique.fill(section, &body);
        }
        critique
    }

    /// Sections an evaluator was asked for but did not provide.
    pub fn missing_sections(&self) -> Vec<CritiqueSection> {
        let mut missing = Vec::new();
        if self.assessment.is_none() {
            missing.push(CritiqueSection::Assessment);
        }
        if self.strengths.is_empty() {
            missing.push(CritiqueSection::Strengths);
        }
        if self.weaknesses.is_empty() {
            missing.push(CritiqueSection::Weaknesses);
        }
        if self.suggestions.is_empty() {
            missing.push(CritiqueSection::Suggestions);
        }
        missing
    }

    fn fill(&mut self, section: CritiqueSection, body: &[String]) {
        match section {
            CritiqueSection::Assessment => {
                let text = body
                    .iter()
                    .map(|line| line.trim())
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                if !text.is_empty() {
                    self.assessment = Some(text);
                }
            }
            CritiqueSection::Strengths => self.strengths.extend(items(body)),
            CritiqueSection::Weaknesses => self.weaknesses.extend(items(body)),
            CritiqueSection::Suggestions => self.suggestions.extend(items(body)),
        }
    }
}

fn parse_heading(line: &str) -> Option<(CritiqueSection, String)> {
    let caps = HEADING_RE.captures(line)?;
    let hashed = caps.get(1).is_some();
    let bold = caps.get(2).is_some();
    let colon = caps.get(5).is_some();
    if !(hashed || bold || colon) {
        return None;
    }
    let section = CritiqueSection::from_keyword(caps.get(3)?.as_str())?;
    let inline = caps
        .get(6)
        .map(|m| m.as_str().trim().trim_end_matches("**").trim().to_string())
        .unwrap_or_default();
    Some((section, inline))
}

/// Split a section body into bullet items, or one paragraph item when unbulleted.
fn items(body: &[String]) -> Vec<String> {
    let bullets: Vec<String> = body
        .iter()
        .filter_map(|line| BULLET_RE.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|item| !item.is_empty())
        .collect();
    if !bullets.is_empty() {
        return bullets;
    }
    let paragraph = body
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if paragraph.is_empty() {
        Vec::new()
    } else {
        vec![paragraph]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_rejects_near_misses() {
        let mode = ApprovalMatch::Exact;
        assert!(mode.is_approval("APPROVED"));
        for text in ["approved", "APPROVED ", " APPROVED", "APPROVED\n", "Not yet approved"] {
            assert!(!mode.is_approval(text), "{text:?} must not approve");
        }
    }

    #[test]
    fn normalized_match_ignores_case_and_whitespace() {
        let mode = ApprovalMatch::Normalized;
        assert!(mode.is_approval("  approved\n"));
        assert!(mode.is_approval("APPROVED "));
        assert!(!mode.is_approval("Not yet approved"));
        assert!(!mode.is_approval("APPROVED."));
    }

    #[test]
    fn parses_markdown_critique_sections() {
        let text = "\
**Overall Assessment:** 6/10, promising but thin.

## Strengths
- Clear societal relevance
- Feasible equipment list

**Specific Weaknesses:**
1. Methodology lacks a control group
2. Timeline is vague

Actionable suggestions:
- Add a control group
";
        let critique = Critique::parse(text);
        assert_eq!(
            critique.assessment.as_deref(),
            Some("6/10, promising but thin.")
        );
        assert_eq!(
            critique.strengths,
            vec!["Clear societal relevance", "Feasible equipment list"]
        );
        assert_eq!(critique.weaknesses.len(), 2);
        assert_eq!(critique.suggestions, vec!["Add a control group"]);
        assert!(critique.missing_sections().is_empty());
        assert_eq!(critique.raw, text);
    }

    #[test]
    fn unstructured_critique_reports_missing_sections() {
        let critique = Critique::parse("needs more detail");
        assert_eq!(
            critique.missing_sections(),
            vec![
                CritiqueSection::Assessment,
                CritiqueSection::Strengths,
                CritiqueSection::Weaknesses,
                CritiqueSection::Suggestions,
            ]
        );
    }

    #[test]
    fn prose_mentioning_keywords_is_not_a_heading() {
        let critique = Critique::parse("Strengths include a clear question.");
        assert!(critique.strengths.is_empty());
    }

    #[test]
    fn classify_uses_match_mode() {
        assert!(Feedback::classify("APPROVED", ApprovalMatch::Exact).is_approved());
        assert!(!Feedback::classify("approved", ApprovalMatch::Exact).is_approved());
        assert!(Feedback::classify("approved", ApprovalMatch::Normalized).is_approved());
    }
}
