use std::path::{Path, PathBuf};

use chrono::{Duration, TimeZone, Utc};
use jobwatch_adapters::{extract_listings, ListingLayout, SourceConfig};
use jobwatch_core::{ExamLevel, JobLevel};

fn fixture(name: &str) -> String {
    let path: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(name)
        .join("listing.html");
    std::fs::read_to_string(&path).expect("read fixture")
}

#[test]
fn civil_service_board_fixture() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let source = SourceConfig {
        name: "csc-careers".into(),
        url: "https://careers.example.gov.ph/vacancies".into(),
        listing_selector: "article.vacancy".into(),
        enabled: true,
        layout: ListingLayout::CivilServiceBoard,
    };
    let out = extract_listings(&fixture("csc-careers"), &source, now).unwrap();
    assert_eq!(out.listings_found, 4);
    assert_eq!(out.drafts.len(), 3);
    assert_eq!(out.failures.len(), 1);

    let ao = &out.drafts[0];
    assert_eq!(ao.title, "Administrative Officer II");
    assert_eq!(ao.department, "Department of Budget and Management");
    assert_eq!(ao.agency, "DBM Central Office");
    assert_eq!(ao.salary_grade, Some(11));
    assert_eq!(ao.salary_range.map(|r| (r.min, r.max)), Some((27_000.0, 29_165.0)));
    assert_eq!(ao.exam_level, ExamLevel::Professional);
    assert_eq!(ao.job_level, JobLevel::Entry);
    assert!(!ao.deadline_fallback);
    assert_eq!(
        ao.application_deadline.map(|d| d.date_naive().to_string()),
        Some("2099-12-15".to_string())
    );
    assert_eq!(
        ao.posted_date.map(|d| d.date_naive().to_string()),
        Some("2099-11-02".to_string())
    );
    assert_eq!(
        ao.application_url.as_deref(),
        Some("https://careers.example.gov.ph/vacancies/apply?id=AO2-1182")
    );
    assert_eq!(ao.qualifications.len(), 2);
    assert!(ao.requirements.skills.contains(&"budgeting".to_string()));
    assert!(ao.matching_keywords.contains(&"budget".to_string()));

    let nurse = &out.drafts[1];
    assert_eq!(nurse.department, "Department of Health");
    assert_eq!(nurse.exam_level, ExamLevel::SubProfessional);
    assert_eq!(nurse.salary_grade, Some(15));
    assert_eq!(nurse.salary_range, None);
    assert!(nurse.deadline_fallback);
    assert_eq!(nurse.application_deadline, Some(now + Duration::days(30)));

    let chief = &out.drafts[2];
    assert_eq!(chief.title, "Chief Administrative Officer");
    assert_eq!(chief.job_level, JobLevel::Executive);
    assert_eq!(chief.application_url.as_deref(), Some("https://apply.example.gov.ph/cao"));
}

#[test]
fn phil_job_net_fixture() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let source = SourceConfig {
        name: "philjobnet".into(),
        url: "https://philjobnet.example.ph/government/".into(),
        listing_selector: "li.job-card".into(),
        enabled: true,
        layout: ListingLayout::PhilJobNet,
    };
    let out = extract_listings(&fixture("philjobnet"), &source, now).unwrap();
    assert_eq!(out.drafts.len(), 2);

    let analyst = &out.drafts[0];
    assert_eq!(analyst.title, "Senior Budget Analyst");
    assert_eq!(analyst.department, "Department of Budget and Management");
    assert_eq!(analyst.agency, "Department of Finance");
    assert_eq!(analyst.job_level, JobLevel::Senior);
    assert_eq!(analyst.salary_range.map(|r| r.max), Some(63_997.0));
    assert_eq!(
        analyst.application_url.as_deref(),
        Some("https://philjobnet.example.ph/government/job/55120")
    );

    let utility = &out.drafts[1];
    assert_eq!(utility.exam_level, ExamLevel::SubProfessional);
    assert!(utility.deadline_fallback);
}
