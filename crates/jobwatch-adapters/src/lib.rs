//! Source configuration and pure listing extraction.
//!
//! Everything in this crate is synchronous and free of I/O: callers hand in
//! rendered HTML plus the extraction instant and get candidate drafts back.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use jobwatch_core::{ExamLevel, JobLevel, PostingDraft, Requirements, SalaryRange};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_DEADLINE_DAYS: i64 = 30;
const MAX_QUALIFICATIONS: usize = 5;
const MIN_QUALIFICATION_LEN: usize = 20;
const MAX_KEYWORDS: usize = 10;
const DEFAULT_DEPARTMENT: &str = "Government Agency";

/// Static per-deployment description of one listing source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub listing_selector: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub layout: ListingLayout,
}

fn default_enabled() -> bool {
    true
}

/// Markup family of a source. Each variant carries its own field selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingLayout {
    CivilServiceBoard,
    PhilJobNet,
    #[default]
    Generic,
}

/// Ordered selector fallbacks per field; the first non-empty match wins.
#[derive(Debug)]
struct FieldSelectors {
    title: &'static [&'static str],
    department: &'static [&'static str],
    agency: &'static [&'static str],
    location: &'static [&'static str],
    description: &'static [&'static str],
    deadline: &'static [&'static str],
    salary: &'static [&'static str],
    posted: &'static [&'static str],
}

const CIVIL_SERVICE_BOARD: FieldSelectors = FieldSelectors {
    title: &[".position-title", ".job-title", "h3", "h4"],
    department: &[".department", ".office"],
    agency: &[".agency", ".office-name"],
    location: &[".place-of-assignment", ".location"],
    description: &[".duties", ".job-description", "p"],
    deadline: &[".closing-date", ".deadline"],
    salary: &[".salary-grade", ".salary"],
    posted: &[".posting-date", "time"],
};

const PHIL_JOB_NET: FieldSelectors = FieldSelectors {
    title: &[".job-title", ".title", "h3", "h4"],
    department: &[".employer-department", ".department"],
    agency: &[".employer", ".company"],
    location: &[".job-location", ".location"],
    description: &[".job-summary", ".description", "p"],
    deadline: &[".valid-until", ".deadline"],
    salary: &[".salary"],
    posted: &[".date-posted", "time"],
};

const GENERIC: FieldSelectors = FieldSelectors {
    title: &[".job-title", ".title", "h3", "h4"],
    department: &[".department", ".dept"],
    agency: &[".agency", ".company"],
    location: &[".location", ".place"],
    description: &[".description", ".job-description", "p"],
    deadline: &[".deadline", ".closing-date"],
    salary: &[".salary"],
    posted: &[".posted-date", "time"],
};

impl ListingLayout {
    fn selectors(self) -> &'static FieldSelectors {
        match self {
            ListingLayout::CivilServiceBoard => &CIVIL_SERVICE_BOARD,
            ListingLayout::PhilJobNet => &PHIL_JOB_NET,
            ListingLayout::Generic => &GENERIC,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("invalid source url `{0}`")]
    InvalidSourceUrl(String),
    #[error("listing element has no text content")]
    EmptyListing,
}

#[derive(Debug, Clone)]
pub struct ListingFailure {
    pub index: usize,
    pub error: ExtractError,
}

/// Result of running one source page through the extractor.
#[derive(Debug, Clone, Default)]
pub struct ListingExtraction {
    pub listings_found: usize,
    pub drafts: Vec<PostingDraft>,
    pub failures: Vec<ListingFailure>,
}

struct CompiledSelectors {
    title: Vec<Selector>,
    department: Vec<Selector>,
    agency: Vec<Selector>,
    location: Vec<Selector>,
    description: Vec<Selector>,
    deadline: Vec<Selector>,
    salary: Vec<Selector>,
    posted: Vec<Selector>,
    anchor: Selector,
}

fn compile(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn compile_all(selectors: &[&str]) -> Result<Vec<Selector>, ExtractError> {
    selectors.iter().map(|s| compile(s)).collect()
}

impl CompiledSelectors {
    fn for_layout(layout: ListingLayout) -> Result<Self, ExtractError> {
        let s = layout.selectors();
        Ok(Self {
            title: compile_all(s.title)?,
            department: compile_all(s.department)?,
            agency: compile_all(s.agency)?,
            location: compile_all(s.location)?,
            description: compile_all(s.description)?,
            deadline: compile_all(s.deadline)?,
            salary: compile_all(s.salary)?,
            posted: compile_all(s.posted)?,
            anchor: compile("a[href]")?,
        })
    }
}

/// Extract every listing on a rendered source page.
///
/// Source-level problems (bad listing selector, bad source URL) are returned as
/// errors; a malformed individual listing is recorded in `failures` and its
/// siblings are still processed.
pub fn extract_listings(
    html: &str,
    source: &SourceConfig,
    now: DateTime<Utc>,
) -> Result<ListingExtraction, ExtractError> {
    let origin =
        Url::parse(&source.url).map_err(|_| ExtractError::InvalidSourceUrl(source.url.clone()))?;
    let listing_selector = compile(&source.listing_selector)?;
    let selectors = CompiledSelectors::for_layout(source.layout)?;
    let document = Html::parse_document(html);

    let mut out = ListingExtraction::default();
    for (index, element) in document.select(&listing_selector).enumerate() {
        out.listings_found += 1;
        match extract_listing(element, &selectors, source, &origin, now) {
            Ok(draft) => out.drafts.push(draft),
            Err(error) => {
                debug!(source = %source.name, index, %error, "listing skipped");
                out.failures.push(ListingFailure { index, error });
            }
        }
    }
    Ok(out)
}

fn extract_listing(
    element: ElementRef<'_>,
    selectors: &CompiledSelectors,
    source: &SourceConfig,
    origin: &Url,
    now: DateTime<Utc>,
) -> Result<PostingDraft, ExtractError> {
    if collapse_whitespace(&element.text().collect::<String>()).is_empty() {
        return Err(ExtractError::EmptyListing);
    }

    let title = first_text(element, &selectors.title).unwrap_or_default();
    let department = first_text(element, &selectors.department)
        .unwrap_or_else(|| infer_department(&title).to_string());
    let agency = first_text(element, &selectors.agency).unwrap_or_else(|| department.clone());
    let location = first_text(element, &selectors.location).unwrap_or_default();
    let description = first_text(element, &selectors.description).unwrap_or_default();

    let deadline_text = first_text(element, &selectors.deadline);
    let (deadline, deadline_fallback) = resolve_deadline(deadline_text.as_deref(), now);

    let salary = first_text(element, &selectors.salary)
        .map(|text| parse_salary(&text))
        .unwrap_or_default();

    let posted_date = first_text(element, &selectors.posted)
        .and_then(|text| parse_date_text(&text))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());

    let combined = format!("{title} {description}");
    let exam_level = infer_exam_level(&combined);
    let job_level = infer_job_level(&combined);

    let application_url = element
        .select(&selectors.anchor)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .and_then(|href| origin.join(href).ok())
        .map(|url| url.to_string());
    let application_method = if application_url.is_some() {
        "Online".to_string()
    } else {
        "See posting for instructions".to_string()
    };

    Ok(PostingDraft {
        requirements: Requirements {
            education: education_for(exam_level).to_string(),
            experience: experience_for(job_level).to_string(),
            skills: extract_skills(&description),
        },
        qualifications: extract_qualifications(&description),
        matching_keywords: extract_keywords(&combined),
        title,
        department,
        agency,
        location,
        salary_grade: salary.grade,
        salary_range: salary.range,
        job_level,
        exam_level,
        description,
        application_deadline: Some(deadline),
        deadline_fallback,
        application_method,
        application_url,
        source_url: source.url.clone(),
        source_website: source.name.clone(),
        posted_date,
        extracted_at: now,
    })
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(element: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        element
            .select(sel)
            .map(|node| collapse_whitespace(&node.text().collect::<String>()))
            .find(|text| !text.is_empty())
    })
}

/// Title keyword to department. Scanned in order; first hit wins.
pub const DEPARTMENT_KEYWORDS: &[(&str, &str)] = &[
    ("health", "Department of Health"),
    ("nurse", "Department of Health"),
    ("medical", "Department of Health"),
    ("teacher", "Department of Education"),
    ("education", "Department of Education"),
    ("school", "Department of Education"),
    ("engineer", "Department of Public Works and Highways"),
    ("public works", "Department of Public Works and Highways"),
    ("budget", "Department of Budget and Management"),
    ("finance", "Department of Finance"),
    ("revenue", "Bureau of Internal Revenue"),
    ("police", "Philippine National Police"),
    ("agricultur", "Department of Agriculture"),
    ("social welfare", "Department of Social Welfare and Development"),
    ("social worker", "Department of Social Welfare and Development"),
    ("labor", "Department of Labor and Employment"),
    ("environment", "Department of Environment and Natural Resources"),
    ("legal", "Department of Justice"),
    ("justice", "Department of Justice"),
    ("information technology", "Department of Information and Communications Technology"),
];

pub const PROFESSIONAL_KEYWORDS: &[&str] = &[
    "officer",
    "specialist",
    "analyst",
    "manager",
    "director",
    "supervisor",
    "coordinator",
    "professional",
    "expert",
];

/// Job level tiers, highest first.
pub const JOB_LEVEL_RULES: &[(JobLevel, &[&str])] = &[
    (JobLevel::Executive, &["director", "executive", "chief"]),
    (JobLevel::Senior, &["senior", "supervisor", "manager"]),
    (JobLevel::Mid, &["associate", "specialist", "analyst"]),
];

pub const EDUCATION_BY_EXAM_LEVEL: &[(ExamLevel, &str)] = &[
    (ExamLevel::Professional, "Bachelor's degree relevant to the job"),
    (
        ExamLevel::SubProfessional,
        "Completion of two years of college or high school graduate",
    ),
];

pub const EXPERIENCE_BY_JOB_LEVEL: &[(JobLevel, &str)] = &[
    (JobLevel::Entry, "None required"),
    (JobLevel::Mid, "1 year of relevant experience"),
    (JobLevel::Senior, "2 to 3 years of relevant experience"),
    (JobLevel::Executive, "4 years or more of supervisory or management experience"),
];

pub const QUALIFICATION_KEYWORDS: &[&str] = &[
    "bachelor",
    "master",
    "degree",
    "graduate",
    "certification",
    "license",
    "experience",
    "years",
    "knowledge",
    "skill",
];

pub const COMMON_SKILLS: &[&str] = &[
    "Microsoft Office",
    "Excel",
    "PowerPoint",
    "communication",
    "leadership",
    "data analysis",
    "project management",
    "customer service",
    "accounting",
    "bookkeeping",
    "computer literacy",
    "typing",
    "report writing",
    "research",
    "programming",
    "database",
    "networking",
    "records management",
    "budgeting",
    "public speaking",
    "teaching",
    "nursing",
    "driving",
];

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "among", "been", "before", "being",
    "below", "between", "both", "does", "doing", "down", "during", "each", "either", "from",
    "further", "have", "having", "here", "into", "itself", "just", "like", "made", "make",
    "more", "most", "must", "only", "other", "over", "same", "shall", "should", "some", "such",
    "than", "that", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "under", "until", "upon", "very", "were", "what", "when", "where", "which",
    "while", "will", "with", "within", "would", "your", "position", "applicants", "apply",
];

pub fn infer_department(title: &str) -> &'static str {
    let lower = title.to_lowercase();
    DEPARTMENT_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, department)| *department)
        .unwrap_or(DEFAULT_DEPARTMENT)
}

pub fn infer_exam_level(text: &str) -> ExamLevel {
    // "sub-professional" would otherwise satisfy the "professional" keyword.
    let lower = text
        .to_lowercase()
        .replace("sub-professional", " ")
        .replace("subprofessional", " ");
    if PROFESSIONAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ExamLevel::Professional
    } else {
        ExamLevel::SubProfessional
    }
}

pub fn infer_job_level(text: &str) -> JobLevel {
    let lower = text.to_lowercase();
    JOB_LEVEL_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(level, _)| *level)
        .unwrap_or(JobLevel::Entry)
}

pub fn education_for(level: ExamLevel) -> &'static str {
    EDUCATION_BY_EXAM_LEVEL
        .iter()
        .find(|(l, _)| *l == level)
        .map(|(_, text)| *text)
        .unwrap_or_default()
}

pub fn experience_for(level: JobLevel) -> &'static str {
    EXPERIENCE_BY_JOB_LEVEL
        .iter()
        .find(|(l, _)| *l == level)
        .map(|(_, text)| *text)
        .unwrap_or_default()
}

pub fn extract_qualifications(description: &str) -> Vec<String> {
    description
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|sentence| sentence.chars().count() > MIN_QUALIFICATION_LEN)
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            QUALIFICATION_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .take(MAX_QUALIFICATIONS)
        .map(ToString::to_string)
        .collect()
}

pub fn extract_skills(description: &str) -> Vec<String> {
    let lower = description.to_lowercase();
    COMMON_SKILLS
        .iter()
        .filter(|skill| lower.contains(&skill.to_lowercase()))
        .map(|skill| skill.to_string())
        .collect()
}

/// Top non-stopword tokens by frequency; ties keep first-seen order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let lower = text.to_lowercase();
    let tokens = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 3)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOPWORDS.contains(t));
    for (position, token) in tokens.enumerate() {
        counts
            .entry(token.to_string())
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, position));
    }
    let mut ranked = counts.into_iter().collect::<Vec<_>>();
    ranked.sort_by(|(_, (ca, pa)), (_, (cb, pb))| cb.cmp(ca).then(pa.cmp(pb)));
    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(token, _)| token)
        .collect()
}

static DAY_MONTH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})[-/](\d{1,2})[-/](\d{4})\b").expect("valid regex"));
static YEAR_MONTH_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})[-/](\d{1,2})[-/](\d{1,2})\b").expect("valid regex"));
static MONTH_DAY_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b",
    )
    .expect("valid regex")
});

type DatePattern = fn(&str) -> Option<NaiveDate>;

/// Tried in order; the first pattern producing a real calendar date wins.
const DATE_PATTERNS: &[DatePattern] = &[parse_day_month_year, parse_year_month_day, parse_month_day_year];

fn parse_day_month_year(text: &str) -> Option<NaiveDate> {
    let caps = DAY_MONTH_YEAR.captures(text)?;
    NaiveDate::from_ymd_opt(caps[3].parse().ok()?, caps[2].parse().ok()?, caps[1].parse().ok()?)
}

fn parse_year_month_day(text: &str) -> Option<NaiveDate> {
    let caps = YEAR_MONTH_DAY.captures(text)?;
    NaiveDate::from_ymd_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)
}

fn parse_month_day_year(text: &str) -> Option<NaiveDate> {
    let caps = MONTH_DAY_YEAR.captures(text)?;
    let month = month_number(&caps[1])?;
    NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, caps[2].parse().ok()?)
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    DATE_PATTERNS.iter().find_map(|pattern| pattern(text))
}

/// Deadline as end of the parsed day (UTC). Unparsable or past deadlines fall
/// back to `now + 30 days`; the flag reports whether the fallback was used.
pub fn resolve_deadline(text: Option<&str>, now: DateTime<Utc>) -> (DateTime<Utc>, bool) {
    let parsed = text
        .and_then(parse_date_text)
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
        .filter(|deadline| *deadline > now);
    match parsed {
        Some(deadline) => (deadline, false),
        None => (now + Duration::days(DEFAULT_DEADLINE_DAYS), true),
    }
}

static SALARY_GRADE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:SG|salary\s+grade)[\s\-:]*(\d{1,2})\b").expect("valid regex")
});
static SALARY_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*(?:-|–|to)\s*(?:PHP|Php|₱|P)?\s*(\d[\d,]*(?:\.\d+)?)")
        .expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParsedSalary {
    pub grade: Option<u32>,
    pub range: Option<SalaryRange>,
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

pub fn parse_salary(text: &str) -> ParsedSalary {
    let grade = SALARY_GRADE
        .captures(text)
        .and_then(|caps| caps[1].parse().ok());
    // the grade number must never be read as a range bound
    let amounts = SALARY_GRADE.replace_all(text, " ");
    let range = SALARY_RANGE.captures(&amounts).and_then(|caps| {
        let a = parse_amount(&caps[1])?;
        let b = parse_amount(&caps[2])?;
        Some(SalaryRange {
            min: a.min(b),
            max: a.max(b),
        })
    });
    ParsedSalary { grade, range }
}
