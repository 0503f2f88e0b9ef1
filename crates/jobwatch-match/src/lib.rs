//! Profile-to-posting scoring, ranking and recommendation reads.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jobwatch_core::{JobLevel, JobPosting, LearnerProfile, MatchResult, ProfileDirectory, WorkExperience};
use jobwatch_storage::{ActiveFilter, SharedStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Points per rubric factor. The experience factor is never zero: an unmapped
/// bucket or a level mismatch still earns a fraction of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    pub exam_level: u32,
    pub location: u32,
    pub department: u32,
    pub position: u32,
    pub experience_full: u32,
    pub experience_unmapped: u32,
    pub experience_mismatch: u32,
}

pub const RUBRIC_WEIGHTS: ScoreWeights = ScoreWeights {
    exam_level: 25,
    location: 20,
    department: 20,
    position: 25,
    experience_full: 10,
    experience_unmapped: 5,
    experience_mismatch: 3,
};

impl ScoreWeights {
    pub const fn max_total(&self) -> u32 {
        self.exam_level + self.location + self.department + self.position + self.experience_full
    }
}

pub const MAX_SCORE: u32 = 100;
/// Score reported for category reads when the learner has no complete profile.
pub const NEUTRAL_SCORE: u32 = 50;
pub const URGENT_WINDOW_DAYS: i64 = 7;

/// Job levels a learner with the given experience is suited for.
/// `None` means the bucket is not mapped.
pub fn compatible_levels(experience: WorkExperience) -> Option<&'static [JobLevel]> {
    match experience {
        WorkExperience::NoExperience | WorkExperience::LessThanOneYear => Some(&[JobLevel::Entry]),
        WorkExperience::OneToThreeYears => Some(&[JobLevel::Entry, JobLevel::Mid]),
        WorkExperience::ThreeToFiveYears => Some(&[JobLevel::Mid, JobLevel::Senior]),
        WorkExperience::FiveToTenYears | WorkExperience::MoreThanTenYears => {
            Some(&[JobLevel::Senior, JobLevel::Executive])
        }
        WorkExperience::Unspecified => None,
    }
}

fn first_contained<'a>(needles: &'a [String], haystack: &str) -> Option<&'a str> {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .find(|n| haystack.contains(&n.to_lowercase()))
}

/// Score one posting against a profile. Returns the bounded score and the
/// reasons for each factor that fired, in rubric order.
pub fn score_posting(profile: &LearnerProfile, posting: &JobPosting) -> (u32, Vec<String>) {
    let w = RUBRIC_WEIGHTS;
    let mut score = 0u32;
    let mut reasons = Vec::new();

    if profile.exam_type == Some(posting.exam_level) {
        score += w.exam_level;
        reasons.push(format!("Matches your exam level ({})", posting.exam_level.label()));
    }
    if let Some(loc) = first_contained(&profile.preferred_work_locations, &posting.location) {
        score += w.location;
        reasons.push(format!("Located in your preferred area ({loc})"));
    }
    if let Some(dept) = first_contained(&profile.preferred_departments, &posting.department) {
        score += w.department;
        reasons.push(format!("In your preferred department ({dept})"));
    }
    if let Some(position) = first_contained(&profile.target_positions, &posting.title) {
        score += w.position;
        reasons.push(format!("Matches your target position ({position})"));
    }

    match compatible_levels(profile.work_experience) {
        Some(levels) if levels.contains(&posting.job_level) => {
            score += w.experience_full;
            reasons.push(format!(
                "Suits your experience for a {} role",
                posting.job_level.label()
            ));
        }
        Some(_) => score += w.experience_mismatch,
        None => score += w.experience_unmapped,
    }

    (score.min(MAX_SCORE), reasons)
}

/// Highest score first, then most recently posted, then id.
pub fn rank_matches(matches: &mut [MatchResult]) {
    matches.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.posting.posted_date.cmp(&a.posting.posted_date))
            .then(a.posting.id.cmp(&b.posting.id))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationCategory {
    Urgent,
    Popular,
    #[default]
    Recent,
    Matched,
}

impl RecommendationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Popular => "popular",
            Self::Recent => "recent",
            Self::Matched => "matched",
        }
    }
}

impl fmt::Display for RecommendationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "urgent" => Ok(Self::Urgent),
            "popular" => Ok(Self::Popular),
            "recent" => Ok(Self::Recent),
            "matched" => Ok(Self::Matched),
            other => Err(format!("unknown recommendation category: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("learner {0} not found")]
    LearnerNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("profile lookup failed: {0:#}")]
    Profiles(anyhow::Error),
}

/// Read-only matching over the posting store. Safe to share across requests.
#[derive(Clone)]
pub struct MatchingEngine {
    store: SharedStore,
    profiles: Arc<dyn ProfileDirectory>,
}

impl MatchingEngine {
    pub fn new(store: SharedStore, profiles: Arc<dyn ProfileDirectory>) -> Self {
        Self { store, profiles }
    }

    async fn load_profile(&self, learner_id: &str) -> Result<Option<LearnerProfile>, MatchError> {
        self.profiles
            .profile(learner_id)
            .await
            .map_err(MatchError::Profiles)
    }

    /// Score every open posting against the learner and return the best
    /// `limit`. A learner who has switched matching off gets nothing.
    pub async fn find_matching_jobs(
        &self,
        learner_id: &str,
        limit: usize,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let profile = self
            .load_profile(learner_id)
            .await?
            .ok_or_else(|| MatchError::LearnerNotFound(learner_id.to_string()))?;
        if !profile.enable_job_matching {
            debug!(learner_id, "job matching disabled for learner");
            return Ok(Vec::new());
        }
        let postings = self.store.find_active(&ActiveFilter::open_at(Utc::now())).await?;
        Ok(match_postings(&profile, postings, limit))
    }

    /// Category reads that do not require a complete profile. Unknown learners
    /// are treated like learners without a complete profile.
    pub async fn get_job_recommendations(
        &self,
        learner_id: &str,
        category: RecommendationCategory,
        limit: usize,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let profile = self.load_profile(learner_id).await?;
        let complete = profile.as_ref().filter(|p| p.profile_complete);
        let now = Utc::now();

        let postings = match category {
            RecommendationCategory::Matched => {
                if let Some(p) = complete.filter(|p| p.enable_job_matching) {
                    let postings = self.store.find_active(&ActiveFilter::open_at(now)).await?;
                    return Ok(match_postings(p, postings, limit));
                }
                self.category_postings(RecommendationCategory::Recent, now).await?
            }
            other => self.category_postings(other, now).await?,
        };

        Ok(postings
            .into_iter()
            .take(limit)
            .map(|posting| match complete {
                Some(p) => {
                    let (score, reasons) = score_posting(p, &posting);
                    MatchResult { posting, score, reasons }
                }
                None => MatchResult {
                    posting,
                    score: NEUTRAL_SCORE,
                    reasons: Vec::new(),
                },
            })
            .collect())
    }

    async fn category_postings(
        &self,
        category: RecommendationCategory,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobPosting>, MatchError> {
        let mut filter = ActiveFilter::open_at(now);
        if category == RecommendationCategory::Urgent {
            filter.deadline_before = Some(now + Duration::days(URGENT_WINDOW_DAYS));
        }
        let mut postings = self.store.find_active(&filter).await?;
        match category {
            RecommendationCategory::Urgent => postings.sort_by(|a, b| {
                a.application_deadline
                    .cmp(&b.application_deadline)
                    .then(a.id.cmp(&b.id))
            }),
            RecommendationCategory::Popular => postings.sort_by(|a, b| {
                let pa = a.view_count.saturating_add(a.application_count);
                let pb = b.view_count.saturating_add(b.application_count);
                pb.cmp(&pa)
                    .then(b.posted_date.cmp(&a.posted_date))
                    .then(a.id.cmp(&b.id))
            }),
            // store order is already most recent first
            RecommendationCategory::Recent | RecommendationCategory::Matched => {}
        }
        Ok(postings)
    }
}

/// Score and rank a candidate set for one profile.
pub fn match_postings(
    profile: &LearnerProfile,
    postings: Vec<JobPosting>,
    limit: usize,
) -> Vec<MatchResult> {
    let mut matches = postings
        .into_iter()
        .map(|posting| {
            let (score, reasons) = score_posting(profile, &posting);
            MatchResult { posting, score, reasons }
        })
        .collect::<Vec<_>>();
    rank_matches(&mut matches);
    matches.truncate(limit);
    matches
}
