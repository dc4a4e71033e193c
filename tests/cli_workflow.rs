use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn riskreg_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_riskreg"));
    cmd.env("HOME", home);
    cmd.env_remove("RISKREG_CONFIG");
    cmd.env_remove("RISKREG_LOG");
    cmd.env_remove("RISKREG_UI_COLOR");
    cmd.env_remove("RISKREG_UI_MAX_TABLE_ROWS");
    cmd.env_remove("RISKREG_UI_SHOW_DEMO_NOTICE");
    cmd.env_remove("RISKREG_STORE_STATE_DIR");
    cmd.env_remove("RISKREG_EXPORT_DIR");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    riskreg_cmd(home).args(args).output().expect("run riskreg")
}

fn run_json(home: &Path, args: &[&str]) -> serde_json::Value {
    let out = run(home, args);
    assert!(
        out.status.success(),
        "args={args:?} stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("parse json")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home =
        std::env::temp_dir().join(format!("riskreg-workflow-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

#[test]
fn assessor_lifecycle_is_audited() {
    let home = make_temp_home();

    let user = run_json(
        &home,
        &["login", "--username", "assessor", "--password", "assessor123", "--json"],
    );
    assert_eq!(user["role"], "assessor");
    assert!(user.get("password").is_none());

    let added = run_json(
        &home,
        &[
            "risk",
            "add",
            "--name",
            "Cold room door sensor",
            "--description",
            "Door alarm fails silently",
            "--category",
            "Equipment",
            "--likelihood",
            "4",
            "--impact",
            "3",
            "--json",
        ],
    );
    assert_eq!(added["risk_id"], "6");
    assert_eq!(added["risk_score"], 12);
    assert_eq!(added["mitigation_status"], "not_started");

    let updated = run_json(&home, &["risk", "update", "6", "--impact", "1", "--json"]);
    assert_eq!(updated["impact"], 1);
    assert_eq!(updated["risk_score"], 4);
    assert_eq!(updated["created_at"], added["created_at"]);

    let treated = run_json(
        &home,
        &[
            "risk",
            "treat",
            "6",
            "--type",
            "Mitigate",
            "--description",
            "Replace sensor",
            "--owner",
            "Facilities",
            "--json",
        ],
    );
    let treatments = treated["treatments"].as_array().expect("treatments");
    assert_eq!(treatments.len(), 1);
    assert_eq!(treatments[0]["treatment_id"], "6-t1");
    assert_eq!(treatments[0]["priority"], "Medium");

    // Assessors cannot read the audit trail.
    assert_eq!(run(&home, &["audit"]).status.code(), Some(4));

    run_json(
        &home,
        &["login", "--username", "admin", "--password", "admin123", "--json"],
    );
    let trail = run_json(&home, &["audit", "--risk", "6", "--json"]);
    let trail = trail.as_array().expect("audit array");
    assert_eq!(trail.len(), 3);
    assert_eq!(trail[0]["action"], "update");
    assert!(trail[0]["changes"]["treatments"].is_array());
    assert_eq!(trail[1]["action"], "update");
    assert_eq!(trail[1]["changes"], serde_json::json!({ "impact": 1 }));
    assert_eq!(trail[1]["user_id"], "2");
    assert_eq!(trail[2]["action"], "create");
    assert_eq!(trail[2]["changes"]["created"]["risk_score"], 12);

    let removed = run_json(&home, &["risk", "delete", "6", "--yes", "--json"]);
    assert_eq!(removed["risk_id"], "6");
    assert_eq!(run(&home, &["risk", "show", "6"]).status.code(), Some(3));

    let deletes = run_json(&home, &["audit", "--action", "delete", "--json"]);
    let deletes = deletes.as_array().expect("audit array");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0]["changes"]["deleted"]["risk_id"], "6");
    assert_eq!(deletes[0]["user_id"], "1");

    let dashboard = run_json(&home, &["dashboard", "--json"]);
    assert_eq!(dashboard["summary"]["total_risks"], 5);
    assert_eq!(dashboard["recent_activity"][0]["action"], "delete");

    // Ids are never reused after a delete.
    run_json(
        &home,
        &["login", "--username", "assessor", "--password", "assessor123", "--json"],
    );
    let again = run_json(
        &home,
        &[
            "risk",
            "add",
            "--name",
            "Replacement",
            "--description",
            "d",
            "--category",
            "Quality",
            "--likelihood",
            "1",
            "--impact",
            "1",
            "--json",
        ],
    );
    assert_eq!(again["risk_id"], "7");

    assert!(run(&home, &["logout"]).status.success());
    assert_eq!(run(&home, &["whoami"]).status.code(), Some(4));

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn seeded_dashboard_reports_demo_figures() {
    let home = make_temp_home();
    run_json(
        &home,
        &["login", "--username", "viewer", "--password", "viewer123", "--json"],
    );

    let dashboard = run_json(&home, &["dashboard", "--json"]);
    let summary = &dashboard["summary"];
    assert_eq!(summary["total_risks"], 5);
    assert_eq!(summary["high_risk_items"], 1);
    assert_eq!(summary["mitigation_rate_percent"], 40);
    assert_eq!(summary["average_score"], 7.8);
    assert_eq!(dashboard["high_risk_items"][0]["risk_id"], "1");
    assert_eq!(
        dashboard["recent_activity"].as_array().map(Vec::len),
        Some(2)
    );

    let out = run(&home, &["dashboard"]);
    assert!(out.status.success());
    assert!(!String::from_utf8_lossy(&out.stdout).is_empty());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn risk_list_filters_compose() {
    let home = make_temp_home();
    run_json(
        &home,
        &["login", "--username", "assessor", "--password", "assessor123", "--json"],
    );

    let all = run_json(&home, &["risk", "list", "--json"]);
    assert_eq!(all.as_array().map(Vec::len), Some(5));

    let high = run_json(&home, &["risk", "high", "--json"]);
    let high = high.as_array().expect("array");
    assert_eq!(high.len(), 1);
    assert_eq!(high[0]["risk_id"], "1");

    let scored = run_json(&home, &["risk", "list", "--min-score", "8", "--json"]);
    for r in scored.as_array().expect("array") {
        assert!(r["risk_score"].as_u64().unwrap() >= 8);
    }

    let completed = run_json(&home, &["risk", "list", "--status", "completed", "--json"]);
    for r in completed.as_array().expect("array") {
        assert_eq!(r["mitigation_status"], "completed");
    }

    let none = run_json(
        &home,
        &["risk", "list", "--search", "no-such-risk-anywhere", "--json"],
    );
    assert_eq!(none.as_array().map(Vec::len), Some(0));

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn reset_restores_demo_data() {
    let home = make_temp_home();
    run_json(
        &home,
        &["login", "--username", "admin", "--password", "admin123", "--json"],
    );
    assert!(run(&home, &["risk", "delete", "1", "--yes"]).status.success());
    assert_eq!(run(&home, &["risk", "show", "1"]).status.code(), Some(3));

    assert!(run(&home, &["reset", "--yes"]).status.success());
    let risk = run_json(&home, &["risk", "show", "1", "--json"]);
    assert_eq!(risk["risk"]["risk_id"], "1");
    let trail = run_json(&home, &["audit", "--json"]);
    assert_eq!(trail.as_array().map(Vec::len), Some(2));

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn fmea_and_refs_are_read_only_lookups() {
    let home = make_temp_home();
    run_json(
        &home,
        &["login", "--username", "assessor", "--password", "assessor123", "--json"],
    );

    let rpn = run_json(
        &home,
        &[
            "fmea",
            "rpn",
            "--severity",
            "8",
            "--occurrence",
            "5",
            "--detection",
            "6",
            "--json",
        ],
    );
    assert_eq!(rpn["value"], 240);
    assert_eq!(rpn["priority"], "critical");

    let scales = run_json(&home, &["fmea", "scales", "--factor", "severity", "--json"]);
    assert_eq!(scales["severity"].as_array().map(Vec::len), Some(10));

    let refs = run_json(&home, &["refs", "list", "--json"]);
    assert_eq!(refs.as_array().map(Vec::len), Some(6));
    let first = refs[0]["reference_id"].as_str().expect("reference id");
    let shown = run_json(&home, &["refs", "show", first, "--json"]);
    assert_eq!(shown["reference_id"], first);

    let gdp = run_json(&home, &["refs", "list", "--source", "eu gdp", "--json"]);
    let ids: Vec<&str> = gdp
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|r| r["reference_id"].as_str())
        .collect();
    assert_eq!(ids, vec!["1", "4"]);
    let narrowed = run_json(
        &home,
        &["refs", "list", "--source", "EU GDP", "--category", "security", "--json"],
    );
    assert_eq!(narrowed.as_array().map(Vec::len), Some(1));
    assert_eq!(narrowed[0]["reference_id"], "4");

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn completion_and_notice_work_without_login() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "bash"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("riskreg"));

    assert!(run(&home, &["notice", "--dismiss"]).status.success());
    assert!(
        home.join(".config/riskreg/state/gmp-gdp-demo-notice-dismissed.json")
            .exists()
    );
    assert!(run(&home, &["notice", "--restore"]).status.success());
    assert!(
        !home
            .join(".config/riskreg/state/gmp-gdp-demo-notice-dismissed.json")
            .exists()
    );

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn template_generation_adds_scored_risks_with_create_entries() {
    let home = make_temp_home();
    run_json(
        &home,
        &["login", "--username", "admin", "--password", "admin123", "--json"],
    );

    let templates = run_json(&home, &["assess", "templates", "--json"]);
    let supply = templates
        .as_array()
        .expect("array")
        .iter()
        .find(|t| t["template_id"] == "supply-chain")
        .expect("supply-chain template")
        .clone();
    let template_risks = supply["risks"].as_array().expect("risks").len();

    let created = run_json(
        &home,
        &[
            "assess",
            "generate",
            "--template",
            "supply-chain",
            "--title",
            "GDP lane review",
            "--json",
        ],
    );
    let created = created.as_array().expect("array");
    assert_eq!(created.len(), template_risks);
    for (risk, template) in created.iter().zip(supply["risks"].as_array().unwrap()) {
        assert_eq!(risk["risk_name"], template["title"]);
        let expected =
            template["likelihood"].as_u64().unwrap() * template["impact"].as_u64().unwrap();
        assert_eq!(risk["risk_score"].as_u64(), Some(expected));
        assert!(
            risk["description"]
                .as_str()
                .unwrap()
                .ends_with("Assessment: GDP lane review")
        );
    }

    let trail = run_json(&home, &["audit", "--action", "create", "--json"]);
    for risk in created {
        let entries: Vec<_> = trail
            .as_array()
            .unwrap()
            .iter()
            .filter(|e| e["risk_id"] == risk["risk_id"])
            .collect();
        assert_eq!(entries.len(), 1, "risk {}", risk["risk_id"]);
        assert_eq!(entries[0]["user_id"], "1");
    }

    let summary = run_json(&home, &["dashboard", "--json"]);
    assert_eq!(summary["summary"]["total_risks"], 5 + template_risks);

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn approval_workflow_is_signed_step_by_step() {
    let home = make_temp_home();
    run_json(
        &home,
        &["login", "--username", "assessor", "--password", "assessor123", "--json"],
    );

    let pending = run_json(&home, &["workflow", "list", "--status", "pending", "--json"]);
    assert_eq!(pending.as_array().map(Vec::len), Some(1));
    assert_eq!(pending[0]["workflow_id"], "1");

    let signed = run_json(
        &home,
        &[
            "workflow",
            "sign",
            "1",
            "--decision",
            "approve",
            "--comments",
            "Controls verified",
            "--json",
        ],
    );
    assert_eq!(signed["status"], "pending_approval");
    assert_eq!(signed["steps"][1]["status"], "approved");
    assert_eq!(signed["steps"][1]["comments"], "Controls verified");
    assert_eq!(signed["steps"][1]["signed_by"], "Risk Assessor");
    assert!(
        signed["steps"][1]["signature"]
            .as_str()
            .unwrap()
            .starts_with("RA_")
    );
    assert_eq!(signed["steps"][2]["status"], "pending");

    let done = run_json(
        &home,
        &["workflow", "sign", "1", "--decision", "approved", "--json"],
    );
    assert_eq!(done["status"], "approved");

    let approved = run_json(&home, &["workflow", "list", "--status", "approved", "--json"]);
    assert_eq!(approved.as_array().map(Vec::len), Some(2));
    let shown = run_json(&home, &["workflow", "show", "1", "--json"]);
    assert_eq!(shown["steps"][2]["status"], "approved");

    let again = run(&home, &["workflow", "sign", "1", "--decision", "reject"]);
    assert_eq!(again.status.code(), Some(2));

    let mine = run_json(&home, &["workflow", "list", "--mine", "--json"]);
    assert_eq!(mine.as_array().map(Vec::len), Some(0));

    let _ = std::fs::remove_dir_all(&home);
}
