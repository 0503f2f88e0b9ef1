//! Core domain model for job postings, learner profiles and match results.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobLevel {
    #[serde(rename = "Entry Level")]
    Entry,
    #[serde(rename = "Mid Level")]
    Mid,
    #[serde(rename = "Senior Level")]
    Senior,
    #[serde(rename = "Executive")]
    Executive,
}

impl JobLevel {
    pub fn label(self) -> &'static str {
        match self {
            JobLevel::Entry => "Entry Level",
            JobLevel::Mid => "Mid Level",
            JobLevel::Senior => "Senior Level",
            JobLevel::Executive => "Executive",
        }
    }
}

impl fmt::Display for JobLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Civil service eligibility tier a posting targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExamLevel {
    #[serde(rename = "Professional")]
    Professional,
    #[serde(rename = "Sub-Professional")]
    SubProfessional,
}

impl ExamLevel {
    pub fn label(self) -> &'static str {
        match self {
            ExamLevel::Professional => "Professional",
            ExamLevel::SubProfessional => "Sub-Professional",
        }
    }
}

impl fmt::Display for ExamLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingStatus {
    #[default]
    Active,
    Expired,
    Filled,
    Cancelled,
}

impl PostingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostingStatus::Active => "active",
            PostingStatus::Expired => "expired",
            PostingStatus::Filled => "filled",
            PostingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(PostingStatus::Active),
            "expired" => Some(PostingStatus::Expired),
            "filled" => Some(PostingStatus::Filled),
            "cancelled" => Some(PostingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Requirements {
    pub education: String,
    pub experience: String,
    pub skills: Vec<String>,
}

/// Composite natural key used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostingKey {
    pub title: String,
    pub department: String,
    pub source_website: String,
}

impl PostingKey {
    pub fn new(
        title: impl Into<String>,
        department: impl Into<String>,
        source_website: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            department: department.into(),
            source_website: source_website.into(),
        }
    }
}

impl fmt::Display for PostingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} @ {}", self.title, self.department, self.source_website)
    }
}

/// Candidate record handed from the listing extractor to validation and upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingDraft {
    pub title: String,
    pub department: String,
    pub agency: String,
    pub location: String,
    pub salary_grade: Option<u32>,
    pub salary_range: Option<SalaryRange>,
    pub job_level: JobLevel,
    pub exam_level: ExamLevel,
    pub description: String,
    pub qualifications: Vec<String>,
    pub requirements: Requirements,
    pub application_deadline: Option<DateTime<Utc>>,
    /// Set when the deadline was substituted because the listing text was unusable.
    pub deadline_fallback: bool,
    pub application_method: String,
    pub application_url: Option<String>,
    pub source_url: String,
    pub source_website: String,
    pub posted_date: Option<DateTime<Utc>>,
    pub matching_keywords: Vec<String>,
    pub extracted_at: DateTime<Utc>,
}

impl PostingDraft {
    pub fn key(&self) -> PostingKey {
        PostingKey::new(&self.title, &self.department, &self.source_website)
    }
}

/// Canonical persisted posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: Uuid,
    pub title: String,
    pub department: String,
    pub agency: String,
    pub location: String,
    pub salary_grade: Option<u32>,
    pub salary_range: Option<SalaryRange>,
    pub job_level: JobLevel,
    pub exam_level: ExamLevel,
    pub description: String,
    pub qualifications: Vec<String>,
    pub requirements: Requirements,
    pub application_deadline: DateTime<Utc>,
    pub application_method: String,
    pub application_url: Option<String>,
    pub source_url: String,
    pub source_website: String,
    pub posted_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub crawled_at: DateTime<Utc>,
    pub matching_keywords: Vec<String>,
    pub status: PostingStatus,
    pub view_count: u64,
    pub application_count: u64,
    pub is_verified: bool,
}

impl JobPosting {
    /// Builds a fresh active posting from an accepted draft.
    pub fn from_draft(draft: PostingDraft, deadline: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            posted_date: draft.posted_date.unwrap_or(now),
            title: draft.title,
            department: draft.department,
            agency: draft.agency,
            location: draft.location,
            salary_grade: draft.salary_grade,
            salary_range: draft.salary_range,
            job_level: draft.job_level,
            exam_level: draft.exam_level,
            description: draft.description,
            qualifications: draft.qualifications,
            requirements: draft.requirements,
            application_deadline: deadline,
            application_method: draft.application_method,
            application_url: draft.application_url,
            source_url: draft.source_url,
            source_website: draft.source_website,
            last_updated: now,
            crawled_at: now,
            matching_keywords: draft.matching_keywords,
            status: PostingStatus::Active,
            view_count: 0,
            application_count: 0,
            is_verified: false,
        }
    }

    /// Overwrites crawled fields in place. Identity, counters, verification and
    /// the original posted date survive the refresh.
    pub fn refresh_from(&mut self, draft: PostingDraft, deadline: DateTime<Utc>, now: DateTime<Utc>) {
        self.title = draft.title;
        self.department = draft.department;
        self.agency = draft.agency;
        self.location = draft.location;
        self.salary_grade = draft.salary_grade;
        self.salary_range = draft.salary_range;
        self.job_level = draft.job_level;
        self.exam_level = draft.exam_level;
        self.description = draft.description;
        self.qualifications = draft.qualifications;
        self.requirements = draft.requirements;
        self.application_deadline = deadline;
        self.application_method = draft.application_method;
        self.application_url = draft.application_url;
        self.source_url = draft.source_url;
        self.source_website = draft.source_website;
        self.matching_keywords = draft.matching_keywords;
        self.status = PostingStatus::Active;
        self.last_updated = now;
        self.crawled_at = now;
    }

    pub fn key(&self) -> PostingKey {
        PostingKey::new(&self.title, &self.department, &self.source_website)
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == PostingStatus::Active && self.application_deadline > now
    }
}

/// Bucketed work experience as recorded on a learner profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkExperience {
    NoExperience,
    LessThanOneYear,
    OneToThreeYears,
    ThreeToFiveYears,
    FiveToTenYears,
    MoreThanTenYears,
    #[default]
    #[serde(other)]
    Unspecified,
}

/// Read-only view of a learner's job preferences.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerProfile {
    pub learner_id: String,
    pub exam_type: Option<ExamLevel>,
    pub preferred_work_locations: Vec<String>,
    pub preferred_departments: Vec<String>,
    pub target_positions: Vec<String>,
    pub work_experience: WorkExperience,
    pub enable_job_matching: bool,
    pub job_alerts: bool,
    pub profile_complete: bool,
}

impl LearnerProfile {
    pub fn wants_alerts(&self) -> bool {
        self.enable_job_matching && self.job_alerts && self.profile_complete
    }
}

/// Transient scoring output; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub posting: JobPosting,
    pub score: u32,
    pub reasons: Vec<String>,
}

/// External learner-profile store, consumed read-only.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn profile(&self, learner_id: &str) -> anyhow::Result<Option<LearnerProfile>>;

    /// Profiles with matching enabled, alerts on and a complete profile.
    async fn alert_subscribers(&self) -> anyhow::Result<Vec<LearnerProfile>>;
}

/// External notification dispatcher. Fire-and-forget.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient_id: &str, job_id: Uuid);
}
