use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use jsonschema::JSONSchema;
use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn wk_command<I, S>(args: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(env!("CARGO_BIN_EXE_wk"));
    command.args(args).env_remove("WELLNESS_LOG");
    command
}

fn run_wk<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    wk_command(args).output().unwrap_or_else(|err| panic!("failed to execute wk binary: {err}"))
}

fn parse_stdout(output: &Output) -> Value {
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "wk command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    parse_stdout(&run_wk(args))
}

fn run_failure<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_wk(args);
    assert!(
        !output.status.success(),
        "wk command should fail, stdout:\n{}",
        String::from_utf8_lossy(&output.stdout)
    );
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_f64(value: &Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(Value::as_f64)
        .unwrap_or_else(|| panic!("missing number field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn as_array<'a>(value: &'a Value, key: &str) -> &'a Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
}

fn strings_at(value: &Value, key: &str, field: &str) -> Vec<String> {
    as_array(value, key).iter().map(|entry| as_str(entry, field).to_string()).collect()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn fixture(name: &str) -> PathBuf {
    repo_root().join("contracts/v1/fixtures").join(name)
}

fn read_json_file(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read JSON file {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse JSON file {}: {err}", path.display()))
}

fn validate_schema(schema_file: &str, instance: &Value) {
    let schema_path = repo_root().join("contracts/v1/schemas").join(schema_file);
    let schema_json = read_json_file(&schema_path);
    let compiled = JSONSchema::compile(&schema_json)
        .unwrap_or_else(|err| panic!("failed to compile schema {}: {err}", schema_path.display()));

    let errors = compiled
        .validate(instance)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>());
    if let Some(errors) = errors {
        panic!("schema validation failed for {}:\n{}", schema_file, errors.join("\n"));
    }
}

// Test IDs: TCLI-001
#[test]
fn catalog_lists_the_reference_interventions() {
    let catalog = run_json(["catalog"]);
    validate_schema("catalog.json", &catalog);

    assert_eq!(as_str(&catalog, "contract_version"), "cli.v1");
    assert_eq!(
        strings_at(&catalog, "items", "label"),
        vec![
            "Time Management Workshop",
            "Therapy Sessions (Package)",
            "Meditation App Subscription",
            "Yoga Classes (Monthly)",
            "Ergonomic Consulting",
            "Premium Mental Health Plan",
        ]
    );
}

// Test IDs: TCLI-002
#[test]
fn rank_orders_by_risk_and_keeps_ties_in_input_order() {
    let employees = fixture("employees.csv");
    let ranked = run_json(["rank", "--records", path_str(&employees)]);
    validate_schema("rank.json", &ranked);

    assert_eq!(as_str(&ranked, "field"), "burnout_level");
    assert_eq!(as_str(&ranked, "direction"), "descending");
    assert_eq!(as_i64(&ranked, "total"), 10);
    let names = strings_at(&ranked, "records", "name");
    assert_eq!(
        names[..5],
        ["Fabio Nunes", "Ana Souza", "Carla Dias", "Isabela Costa", "Eva Martins"]
    );
    assert_eq!(names.last().map(String::as_str), Some("Gabriela Alves"));
}

// Test IDs: TCLI-003
#[test]
fn rank_supports_field_direction_and_limit() {
    let employees = fixture("employees.csv");
    let ranked = run_json([
        "rank",
        "--records",
        path_str(&employees),
        "--field",
        "engagement_level",
        "--ascending",
        "--limit",
        "3",
    ]);
    validate_schema("rank.json", &ranked);

    assert_eq!(as_str(&ranked, "direction"), "ascending");
    assert_eq!(as_i64(&ranked, "total"), 10);
    assert_eq!(
        strings_at(&ranked, "records", "name"),
        vec!["Fabio Nunes", "Ana Souza", "Carla Dias"]
    );
}

// Test IDs: TCLI-004
#[test]
fn rank_rejects_non_numeric_fields() {
    let employees = fixture("employees.csv");
    let stderr = run_failure(["rank", "--records", path_str(&employees), "--field", "department"]);
    assert!(stderr.contains("invalid key"), "unexpected stderr: {stderr}");
    assert!(stderr.contains("record 0"), "unexpected stderr: {stderr}");
}

// Test IDs: TCLI-005
#[test]
fn plan_selects_the_best_reference_subset() {
    let plan = run_json(["plan", "--budget", "7000"]);
    validate_schema("plan.json", &plan);

    assert_eq!(as_i64(&plan, "budget"), 7_000);
    assert_eq!(as_i64(&plan, "total_benefit"), 100);
    assert_eq!(as_i64(&plan, "total_cost"), 7_000);
    assert_eq!(
        strings_at(&plan, "selected", "label"),
        vec!["Therapy Sessions (Package)", "Premium Mental Health Plan"]
    );
    assert_eq!(plan.get("employees_covered"), Some(&Value::Null));
}

// Test IDs: TCLI-006
#[test]
fn plan_reads_custom_catalogs_and_enforces_limits() {
    let sandbox = unique_temp_dir("wellness-cli-plan");
    let catalog = sandbox.join("catalog.yaml");
    fs::write(
        &catalog,
        "- label: Walking Group\n  cost: 7\n  benefit: 3\n- label: Standing Desks\n  cost: 11\n  benefit: 4\n",
    )
    .unwrap_or_else(|err| panic!("failed to write catalog: {err}"));

    let plan = run_json(["plan", "--catalog", path_str(&catalog), "--budget", "18"]);
    validate_schema("plan.json", &plan);
    assert_eq!(as_i64(&plan, "total_benefit"), 7);
    assert_eq!(as_i64(&plan, "total_cost"), 18);

    let stderr = run_failure([
        "plan",
        "--catalog",
        path_str(&catalog),
        "--budget",
        "18",
        "--max-states",
        "10",
    ]);
    assert!(stderr.contains("resource limit exceeded"), "unexpected stderr: {stderr}");

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-007
#[test]
fn plan_rejects_negative_budgets_and_duplicate_labels() {
    let stderr = run_failure(["plan", "--budget", "-5"]);
    assert!(stderr.contains("invalid budget"), "unexpected stderr: {stderr}");

    let sandbox = unique_temp_dir("wellness-cli-duplicate");
    let catalog = sandbox.join("catalog.json");
    fs::write(
        &catalog,
        r#"[{"label": "X", "cost": 1, "benefit": 1}, {"label": "X", "cost": 2, "benefit": 2}]"#,
    )
    .unwrap_or_else(|err| panic!("failed to write catalog: {err}"));

    let stderr = run_failure(["plan", "--catalog", path_str(&catalog), "--budget", "10"]);
    assert!(stderr.contains("duplicate catalog label: X"), "unexpected stderr: {stderr}");

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-008
#[test]
fn report_summarizes_the_population_with_default_config() {
    let employees = fixture("employees.csv");
    let report = run_json(["report", "--records", path_str(&employees)]);
    validate_schema("report.json", &report);

    assert_eq!(as_i64(&report, "employees"), 10);
    let distribution = as_array(&report, "risk_distribution")
        .iter()
        .map(|entry| (as_str(entry, "band").to_string(), as_i64(entry, "count")))
        .collect::<Vec<_>>();
    assert_eq!(
        distribution,
        vec![("high".to_string(), 4), ("moderate".to_string(), 3), ("low".to_string(), 3)]
    );

    assert_eq!(
        strings_at(&report, "top_at_risk", "name"),
        vec!["Fabio Nunes", "Ana Souza", "Carla Dias", "Isabela Costa", "Eva Martins"]
    );
    assert_eq!(
        strings_at(&report, "departments", "department"),
        vec!["Support", "Finance", "Engineering", "Marketing"]
    );
    let finance = &as_array(&report, "departments")[1];
    assert!((as_f64(finance, "mean_risk") - 63.7).abs() < 1e-9);

    let factors = as_array(&report, "risk_factors")
        .iter()
        .map(|entry| (as_str(entry, "value").to_string(), as_i64(entry, "count")))
        .collect::<Vec<_>>();
    assert_eq!(
        factors,
        vec![
            ("Workload".to_string(), 4),
            ("Long hours".to_string(), 2),
            ("Low recognition".to_string(), 2),
            ("Remote isolation".to_string(), 1),
            ("Team conflict".to_string(), 1),
        ]
    );
    assert_eq!(
        strings_at(&report, "initiatives", "initiative"),
        vec!["Therapy", "None", "Yoga", "Meditation"]
    );

    let plan = report.get("plan").unwrap_or_else(|| panic!("report should carry a plan"));
    assert_eq!(as_i64(plan, "total_benefit"), 100);
    assert_eq!(as_i64(plan, "employees_covered"), 10);
    assert!((as_f64(plan, "cost_per_employee") - 700.0).abs() < 1e-9);
    assert_eq!(report.get("plan_error"), Some(&Value::Null));
}

// Test IDs: TCLI-009
#[test]
fn report_applies_config_file_and_budget_override() {
    let employees = fixture("employees.csv");
    let config = fixture("report_config.yaml");

    let report = run_json([
        "report",
        "--records",
        path_str(&employees),
        "--config",
        path_str(&config),
    ]);
    validate_schema("report.json", &report);
    assert_eq!(
        strings_at(&report, "top_at_risk", "name"),
        vec!["Fabio Nunes", "Ana Souza", "Carla Dias"]
    );
    let bands = strings_at(&report, "top_at_risk", "band");
    assert_eq!(bands, vec!["high", "high", "moderate"]);

    let plan = report.get("plan").unwrap_or_else(|| panic!("report should carry a plan"));
    assert_eq!(as_i64(plan, "total_benefit"), 70);
    assert_eq!(
        strings_at(plan, "selected", "label"),
        vec!["Meditation App Subscription", "Premium Mental Health Plan"]
    );

    let report = run_json([
        "report",
        "--records",
        path_str(&employees),
        "--config",
        path_str(&config),
        "--budget",
        "3000",
    ]);
    let plan = report.get("plan").unwrap_or_else(|| panic!("report should carry a plan"));
    assert_eq!(as_i64(plan, "total_benefit"), 40);
    assert_eq!(strings_at(plan, "selected", "label"), vec!["Therapy Sessions (Package)"]);
}

// Test IDs: TCLI-010
#[test]
fn report_keeps_rankings_when_the_plan_fails() {
    let employees = fixture("employees.csv");
    let report = run_json(["report", "--records", path_str(&employees), "--budget", "-1"]);
    validate_schema("report.json", &report);

    assert_eq!(report.get("plan"), Some(&Value::Null));
    assert_eq!(as_str(&report, "plan_error"), "invalid budget: -1 is negative");
    assert_eq!(as_array(&report, "top_at_risk").len(), 5);
}

// Test IDs: TCLI-011
#[test]
fn logs_go_to_stderr_and_leave_stdout_parseable() {
    let employees = fixture("employees.csv");
    let output = wk_command(["rank", "--records", path_str(&employees), "--limit", "1"])
        .env("WELLNESS_LOG", "info")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute wk binary: {err}"));

    let ranked = parse_stdout(&output);
    assert_eq!(as_array(&ranked, "records").len(), 1);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("loaded records"), "unexpected stderr: {stderr}");
}

// Test IDs: TCLI-012
#[test]
fn missing_records_file_reports_the_path() {
    let sandbox = unique_temp_dir("wellness-cli-missing");
    let missing = sandbox.join("absent.csv");

    let stderr = run_failure(["report", "--records", path_str(&missing)]);
    assert!(stderr.contains("failed to open records file"), "unexpected stderr: {stderr}");
    assert!(stderr.contains(path_str(&missing)), "unexpected stderr: {stderr}");

    let _ = fs::remove_dir_all(&sandbox);
}
