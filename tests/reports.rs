//! Report pipeline against a seeded SQLite database.

use std::fs;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use review_harvest::config::ReportConfig;
use review_harvest::report::{definitions, run_reports, CsvDirSink, ReportDefinition, SqlReport};
use review_harvest::sqlite_store::SqliteStore;
use review_harvest_core::error::HarvestError;
use review_harvest_core::models::{CriteriaScores, RestaurantProfile, Review};
use review_harvest_core::store::RecordStore;
use tempfile::TempDir;

async fn store() -> SqliteStore {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    review_harvest::migrate::apply(&pool).await.unwrap();
    SqliteStore::new(pool)
}

fn review(restaurant: &str, n: usize, rating: Option<f64>) -> Review {
    Review {
        review_id: format!("{}-{}", restaurant, n),
        restaurant_url: format!("https://x.vn/{}", restaurant),
        restaurant_name: restaurant.to_uppercase(),
        district: "Quận 1".to_string(),
        user_name: Some(format!("user{}", n)),
        rating,
        review_text: Some(format!("review {} of {}", n, restaurant)),
        media_urls: vec![],
        review_time: NaiveDate::from_ymd_opt(2024, 1, (n % 28 + 1) as u32)
            .unwrap()
            .and_hms_opt(10, 0, 0),
        collected_at: Utc::now(),
    }
}

async fn seed(store: &SqliteStore, restaurant: &str, count: usize, rating: Option<f64>) {
    for n in 0..count {
        store.upsert_review(&review(restaurant, n, rating)).await.unwrap();
    }
}

fn read_lines(dir: &Path, name: &str) -> Vec<String> {
    fs::read_to_string(dir.join(format!("{}.csv", name)))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn missing_value_audit_counts_only_null_and_empty() {
    let store = store().await;
    for n in 0..10 {
        let mut r = review("a", n, Some(8.0));
        r.review_text = match n {
            0..=2 => None,
            3 => Some(String::new()),
            // Whitespace is content, not a missing value
            4 => Some("   ".to_string()),
            _ => r.review_text,
        };
        store.upsert_review(&r).await.unwrap();
    }

    let tmp = TempDir::new().unwrap();
    let mut sink = CsvDirSink::create(tmp.path()).unwrap();
    let config = ReportConfig {
        missing_fields: vec!["review_text".to_string(), "rating".to_string()],
        ..ReportConfig::default()
    };
    let run = run_reports(store.pool(), &definitions(&config), &mut sink).await;
    assert!(run.failed.is_empty(), "{:?}", run.failed);

    let lines = read_lines(tmp.path(), "missing_report");
    assert_eq!(lines[0], "field,missing_count,total_count,missing_ratio");
    assert_eq!(lines[1], "review_text,4,10,0.4");
    assert_eq!(lines[2], "rating,0,10,0.0");
}

#[tokio::test]
async fn empty_database_yields_header_only_reports() {
    let store = store().await;
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("reports");
    let mut sink = CsvDirSink::create(&out).unwrap();

    let defs = definitions(&ReportConfig::default());
    let run = run_reports(store.pool(), &defs, &mut sink).await;
    assert!(run.failed.is_empty(), "{:?}", run.failed);
    assert_eq!(run.written.len(), defs.len());

    assert_eq!(
        read_lines(&out, "recommended_restaurants"),
        vec!["restaurant_url,restaurant_name,district,user_rating_mean,review_count,recommend_score"]
    );
    assert_eq!(read_lines(&out, "top_price").len(), 1);
    assert_eq!(read_lines(&out, "rating_vs_criteria").len(), 1);

    let counts = read_lines(&out, "collection_counts");
    assert_eq!(counts, vec!["collection,count", "targets,0", "reviews,0", "profiles,0"]);

    // No records: the ratio is zero rather than a division error
    let missing = read_lines(&out, "missing_report");
    assert_eq!(missing.len(), 5);
    assert!(missing[1].ends_with(",0,0,0.0"), "{}", missing[1]);
}

#[tokio::test]
async fn recommendations_rank_by_score_and_exclude_unrated() {
    let store = store().await;
    seed(&store, "a", 2, Some(9.0)).await;
    seed(&store, "b", 10, Some(8.0)).await;
    seed(&store, "c", 3, None).await;
    seed(&store, "d", 5, Some(7.0)).await;

    let tmp = TempDir::new().unwrap();
    let mut sink = CsvDirSink::create(tmp.path()).unwrap();
    let config = ReportConfig {
        top_k: 2,
        ..ReportConfig::default()
    };
    let run = run_reports(store.pool(), &definitions(&config), &mut sink).await;
    assert!(run.failed.is_empty(), "{:?}", run.failed);

    let lines = read_lines(tmp.path(), "recommended_restaurants");
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], "https://x.vn/b,B,Quận 1,8.0,10,19.183");
    assert_eq!(lines[2], "https://x.vn/d,D,Quận 1,7.0,5,12.542");

    let suspicious = read_lines(tmp.path(), "high_rating_low_review");
    assert_eq!(suspicious.len(), 2);
    assert!(suspicious[1].starts_with("https://x.vn/a,"));

    assert_eq!(
        read_lines(tmp.path(), "rating_bias"),
        vec!["rating_group,count", "high,12", "medium,5"]
    );

    let counts = read_lines(tmp.path(), "restaurant_review_count");
    assert!(counts[1].starts_with("https://x.vn/b,"));
    assert!(counts[1].ends_with(",10"));
}

#[tokio::test]
async fn rating_vs_criteria_joins_profiles() {
    let store = store().await;
    seed(&store, "a", 2, Some(9.0)).await;
    seed(&store, "b", 4, Some(6.0)).await;
    store
        .upsert_profile(&RestaurantProfile {
            restaurant_url: "https://x.vn/b".to_string(),
            restaurant_name: "B".to_string(),
            address: None,
            district: "Quận 1".to_string(),
            category: Some("Quán ăn".to_string()),
            criteria: CriteriaScores {
                location: Some(9.0),
                price: Some(8.0),
                quality: Some(9.0),
                service: Some(8.5),
                space: Some(9.0),
            },
            collected_at: Utc::now(),
        })
        .await
        .unwrap();

    let tmp = TempDir::new().unwrap();
    let mut sink = CsvDirSink::create(tmp.path()).unwrap();
    run_reports(store.pool(), &definitions(&ReportConfig::default()), &mut sink).await;

    let joined = read_lines(tmp.path(), "rating_vs_criteria");
    assert_eq!(
        joined,
        vec![
            "restaurant_url,restaurant_name,district,user_rating_mean,review_count,criteria_average",
            "https://x.vn/b,B,Quận 1,6.0,4,8.7",
        ]
    );

    assert_eq!(
        read_lines(tmp.path(), "category_over_threshold"),
        vec!["category,restaurant_count", "Quán ăn,1"]
    );
    assert_eq!(read_lines(tmp.path(), "top_service")[1], "https://x.vn/b,B,Quận 1,Quán ăn,8.5");
}

#[tokio::test]
async fn failing_report_does_not_stop_the_others() {
    let store = store().await;
    seed(&store, "a", 1, Some(5.0)).await;

    let mut defs = vec![ReportDefinition {
        name: "broken".to_string(),
        query: Box::new(SqlReport::new("SELECT x FROM no_such_table", &["x"])),
        postprocess: None,
    }];
    defs.extend(definitions(&ReportConfig::default()));

    let tmp = TempDir::new().unwrap();
    let mut sink = CsvDirSink::create(tmp.path()).unwrap();
    let run = run_reports(store.pool(), &defs, &mut sink).await;

    assert_eq!(run.failed.len(), 1);
    assert_eq!(run.failed[0].0, "broken");
    assert_eq!(run.written.len(), defs.len() - 1);
    assert!(!tmp.path().join("broken.csv").exists());
}

#[test]
fn unwritable_output_directory_is_a_configuration_error() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("not-a-dir");
    fs::write(&file, "x").unwrap();

    let err = CsvDirSink::create(&file.join("reports")).err().unwrap();
    assert!(matches!(err, HarvestError::Configuration(_)));
}
