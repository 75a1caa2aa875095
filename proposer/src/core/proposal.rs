//! Required proposal sections and best-effort detection of missing ones.

use std::sync::LazyLock;

use regex::Regex;

/// Sections every proposal draft must keep across revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalSection {
    Title,
    Abstract,
    Introduction,
    Objectives,
    Methodology,
    Outcomes,
    Feasibility,
}

impl ProposalSection {
    pub const REQUIRED: [ProposalSection; 7] = [
        ProposalSection::Title,
        ProposalSection::Abstract,
        ProposalSection::Introduction,
        ProposalSection::Objectives,
        ProposalSection::Methodology,
        ProposalSection::Outcomes,
        ProposalSection::Feasibility,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProposalSection::Title => "title",
            ProposalSection::Abstract => "abstract",
            ProposalSection::Introduction => "introduction",
            ProposalSection::Objectives => "objectives",
            ProposalSection::Methodology => "methodology",
            ProposalSection::Outcomes => "outcomes",
            ProposalSection::Feasibility => "feasibility",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            ProposalSection::Title => &["title"],
            ProposalSection::Abstract => &["abstract", "summary"],
            ProposalSection::Introduction => &["introduction", "background"],
            ProposalSection::Objectives => &["objective"],
            ProposalSection::Methodology => &["methodology", "methods"],
            ProposalSection::Outcomes => &["outcome", "impact"],
            ProposalSection::Feasibility => &["feasibility", "feasible"],
        }
    }
}

// Markdown headings, bold lead-ins, or `Label:` lines.
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]*(?:#{1,6}[ \t]+.*|(?:\d+[.)][ \t]*)?(?:\*\*|__).+|(?:\d+[.)][ \t]*)?[A-Za-z][^:\n]{0,60}:.*)$")
        .expect("proposal heading regex should compile")
});

static H1_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[ \t]+\S").expect("h1 regex should compile"));

/// Required sections with no recognisable heading in `text`.
pub fn missing_sections(text: &str) -> Vec<ProposalSection> {
    let headings: Vec<String> = text
        .lines()
        .filter(|line| HEADING_RE.is_match(line))
        .map(str::to_ascii_lowercase)
        .collect();
    let has_h1 = text.lines().any(|line| H1_RE.is_match(line));

    ProposalSection::REQUIRED
        .into_iter()
        .filter(|section| {
            if *section == ProposalSection::Title && has_h1 {
                return false;
            }
            !section
                .keywords()
                .iter()
                .any(|keyword| headings.iter().any(|heading| heading.contains(keyword)))
        })
        .collect()
}
