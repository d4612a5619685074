use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn harvest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("harvest");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        root.join("targets.csv"),
        "\u{feff}restaurant_url,restaurant_name,district,address\n\
         https://x.vn/ho-chi-minh/pho-hoa,Phở Hòa,Quận 3,260C Pasteur\n\
         https://x.vn/ho-chi-minh/banh-mi,Bánh Mì  Huỳnh Hoa,Quận 1,\n\
         not-a-url,Broken,Quận 1,\n\
         https://x.vn/ho-chi-minh/pho-hoa,Phở Hòa,Quận 3,260C Pasteur\n",
    )
    .unwrap();

    // Port 1 refuses connections, so collection fails fast per target
    fs::write(
        root.join("unreachable.csv"),
        "restaurant_url,restaurant_name,district\n\
         http://127.0.0.1:1/quan-a,Quán A,Quận 5\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/harvest.sqlite"

[collector]
max_growth_wait_secs = 0
batch_delay_ms = 0
request_timeout_secs = 5

[report]
output_dir = "{root}/reports"
top_k = 3

[sources.reviews]
item_selector = "li.review-item"
more_selector = "a.load-more"

[sources.reviews.fields.review_id]
attr = "data-review"

[sources.reviews.fields.rating]
selector = ".review-points"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("harvest.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_harvest(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = harvest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run harvest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn root_of(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().to_path_buf()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_harvest(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(root_of(&config_path).join("data/harvest.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_harvest(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_harvest(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_source_list() {
    let (_tmp, config_path) = setup_test_env();
    let csv = root_of(&config_path).join("targets.csv");

    run_harvest(&config_path, &["init"]);
    let (stdout, stderr, success) = run_harvest(&config_path, &["import", csv.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("rows read: 4"), "{}", stdout);
    assert!(stdout.contains("rows skipped: 2"), "{}", stdout);
    assert!(stdout.contains("new targets: 2"), "{}", stdout);
    assert!(stdout.contains("ok"));

    // Importing the same list again changes nothing
    let (stdout, _, _) = run_harvest(&config_path, &["import", csv.to_str().unwrap()]);
    assert!(stdout.contains("new targets: 0"), "{}", stdout);
    assert!(stdout.contains("unchanged targets: 2"), "{}", stdout);
}

#[test]
fn test_import_missing_column_fails() {
    let (tmp, config_path) = setup_test_env();
    let csv = tmp.path().join("bad.csv");
    fs::write(&csv, "restaurant_url,restaurant_name\nhttps://x.vn/a,A\n").unwrap();

    run_harvest(&config_path, &["init"]);
    let (_, stderr, success) = run_harvest(&config_path, &["import", csv.to_str().unwrap()]);
    assert!(!success, "import should fail without a district column");
    assert!(stderr.contains("district"), "stderr: {}", stderr);
}

#[test]
fn test_export_targets() {
    let (_tmp, config_path) = setup_test_env();
    let csv = root_of(&config_path).join("targets.csv");

    run_harvest(&config_path, &["init"]);
    run_harvest(&config_path, &["import", csv.to_str().unwrap()]);

    let (stdout, stderr, success) = run_harvest(&config_path, &["export", "targets"]);
    assert!(success, "export failed: {}", stderr);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "restaurant_url,restaurant_name,district,address");
    assert_eq!(
        lines[1],
        "https://x.vn/ho-chi-minh/banh-mi,Bánh Mì Huỳnh Hoa,Quận 1,"
    );
    assert_eq!(
        lines[2],
        "https://x.vn/ho-chi-minh/pho-hoa,Phở Hòa,Quận 3,260C Pasteur"
    );
}

#[test]
fn test_export_to_file() {
    let (tmp, config_path) = setup_test_env();
    let csv = root_of(&config_path).join("targets.csv");
    let out = tmp.path().join("out/targets.csv");

    run_harvest(&config_path, &["init"]);
    run_harvest(&config_path, &["import", csv.to_str().unwrap()]);
    let (_, stderr, success) = run_harvest(
        &config_path,
        &["export", "targets", "--output", out.to_str().unwrap()],
    );
    assert!(success, "export failed: {}", stderr);
    assert_eq!(fs::read_to_string(&out).unwrap().lines().count(), 3);
}

#[test]
fn test_export_unknown_collection_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_harvest(&config_path, &["init"]);
    let (_, stderr, success) = run_harvest(&config_path, &["export", "menus"]);
    assert!(!success);
    assert!(stderr.contains("Unknown collection"), "stderr: {}", stderr);
}

#[test]
fn test_report_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();
    let reports = root_of(&config_path).join("reports");

    run_harvest(&config_path, &["init"]);
    let (stdout, stderr, success) = run_harvest(&config_path, &["report"]);
    assert!(success, "report failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("15 written, 0 failed"), "{}", stdout);

    let recommended = fs::read_to_string(reports.join("recommended_restaurants.csv")).unwrap();
    assert_eq!(recommended.lines().count(), 1);
    assert!(reports.join("missing_report.csv").exists());
    assert!(reports.join("top_space.csv").exists());
}

#[test]
fn test_report_output_dir_override() {
    let (tmp, config_path) = setup_test_env();
    let out = tmp.path().join("elsewhere");

    run_harvest(&config_path, &["init"]);
    let (_, stderr, success) =
        run_harvest(&config_path, &["report", "--output-dir", out.to_str().unwrap()]);
    assert!(success, "report failed: {}", stderr);
    assert!(out.join("collection_counts.csv").exists());
}

#[test]
fn test_collect_isolates_unreachable_target() {
    let (_tmp, config_path) = setup_test_env();
    let csv = root_of(&config_path).join("unreachable.csv");

    run_harvest(&config_path, &["init"]);
    run_harvest(&config_path, &["import", csv.to_str().unwrap()]);

    let (stdout, stderr, success) = run_harvest(&config_path, &["collect"]);
    assert!(success, "collect failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("targets: 1"), "{}", stdout);
    assert!(stdout.contains("errors: 1"), "{}", stdout);
    assert!(stdout.contains("new: 0"), "{}", stdout);
}

#[test]
fn test_profiles_requires_source_section() {
    let (_tmp, config_path) = setup_test_env();

    run_harvest(&config_path, &["init"]);
    let (_, stderr, success) = run_harvest(&config_path, &["profiles"]);
    assert!(!success);
    assert!(stderr.contains("sources.profiles"), "stderr: {}", stderr);
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    let csv = root_of(&config_path).join("targets.csv");

    run_harvest(&config_path, &["init"]);
    run_harvest(&config_path, &["import", csv.to_str().unwrap()]);

    let (stdout, stderr, success) = run_harvest(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Targets:     2"), "{}", stdout);
    assert!(stdout.contains("Reviews:     0"), "{}", stdout);
    assert!(stdout.contains("Quận 3"), "{}", stdout);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        content.replace("top_k = 3", "top_k = 3\nmissing_fields = [\"password\"]"),
    )
    .unwrap();

    let (_, stderr, success) = run_harvest(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("missing_fields"), "stderr: {}", stderr);
}
