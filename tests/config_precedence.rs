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

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home =
        std::env::temp_dir().join(format!("riskreg-config-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

fn show_json(out: &Output) -> serde_json::Value {
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("parse json")
}

#[test]
fn config_show_emits_effective_config() {
    let home = make_temp_home();
    write_file(
        home.join(".config/riskreg/config.toml").as_path(),
        br#"
[ui]
max_table_rows = 3
"#,
    );

    let out = run(&home, &["config", "--show"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("max_table_rows = 3"), "stdout={stdout}");
    assert!(stdout.contains("config_path"), "stdout={stdout}");

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn defaults_place_state_under_home() {
    let home = make_temp_home();
    let v = show_json(&run(&home, &["config", "--show", "--json"]));
    let expected = home.join(".config/riskreg/state");
    assert_eq!(v["store"]["state_dir"], expected.to_string_lossy().as_ref());
    assert_eq!(v["ui"]["show_demo_notice"], true);
    assert!(v.get("config_path").is_none());
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn env_overrides_config_file() {
    let home = make_temp_home();
    write_file(
        home.join(".config/riskreg/config.toml").as_path(),
        br#"
[ui]
max_table_rows = 3
color = false
"#,
    );

    let out = riskreg_cmd(&home)
        .env("RISKREG_UI_MAX_TABLE_ROWS", "7")
        .args(["config", "--show", "--json"])
        .output()
        .expect("run riskreg");
    let v = show_json(&out);
    assert_eq!(v["ui"]["max_table_rows"], 7);
    assert_eq!(v["ui"]["color"], false);
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_env_value_exits_2() {
    let home = make_temp_home();
    let out = riskreg_cmd(&home)
        .env("RISKREG_UI_COLOR", "sometimes")
        .args(["config", "--show"])
        .output()
        .expect("run riskreg");
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn config_env_var_selects_alternate_file() {
    let home = make_temp_home();
    let alt = home.join("alt.toml");
    write_file(&alt, b"[export]\ndir = \"~/reports\"\n");

    let out = riskreg_cmd(&home)
        .env("RISKREG_CONFIG", &alt)
        .args(["config", "--show", "--json"])
        .output()
        .expect("run riskreg");
    let v = show_json(&out);
    assert_eq!(
        v["export"]["dir"],
        home.join("reports").to_string_lossy().as_ref()
    );
    assert_eq!(v["config_path"], alt.to_string_lossy().as_ref());
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn state_dir_flag_beats_env_and_file() {
    let home = make_temp_home();
    write_file(
        home.join(".config/riskreg/config.toml").as_path(),
        b"[store]\nstate_dir = \"~/from-file\"\n",
    );
    let from_flag = home.join("from-flag");

    let out = riskreg_cmd(&home)
        .env("RISKREG_STORE_STATE_DIR", home.join("from-env"))
        .args(["login", "--username", "viewer", "--password", "viewer123"])
        .arg("--state-dir")
        .arg(&from_flag)
        .output()
        .expect("run riskreg");
    assert!(out.status.success());
    assert!(from_flag.join("gmp-gdp-user.json").exists());
    assert!(!home.join("from-env").join("gmp-gdp-user.json").exists());
    assert!(!home.join("from-file").join("gmp-gdp-user.json").exists());

    let out = riskreg_cmd(&home)
        .env("RISKREG_STORE_STATE_DIR", home.join("from-env"))
        .args(["login", "--username", "viewer", "--password", "viewer123"])
        .output()
        .expect("run riskreg");
    assert!(out.status.success());
    assert!(home.join("from-env").join("gmp-gdp-user.json").exists());
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn missing_explicit_config_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["config", "--show", "--config", "/nonexistent/riskreg.toml"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}
