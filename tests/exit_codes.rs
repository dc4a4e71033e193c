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

fn login(home: &Path, username: &str, password: &str) {
    let out = run(
        home,
        &["login", "--username", username, "--password", password],
    );
    assert!(
        out.status.success(),
        "login failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home =
        std::env::temp_dir().join(format!("riskreg-exit-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

#[test]
fn completion_unknown_shell_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "nope"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn commands_without_login_exit_4() {
    let home = make_temp_home();
    for args in [
        &["dashboard"][..],
        &["risk", "list"][..],
        &["whoami"][..],
        &["audit"][..],
    ] {
        let out = run(&home, args);
        assert_eq!(out.status.code(), Some(4), "args={args:?}");
        let stderr = String::from_utf8_lossy(&out.stderr);
        assert!(stderr.contains("エラー:"), "stderr={stderr}");
    }
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn wrong_password_exits_4() {
    let home = make_temp_home();
    let out = run(
        &home,
        &["login", "--username", "admin", "--password", "viewer123"],
    );
    assert_eq!(out.status.code(), Some(4));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn viewer_is_denied_assessor_and_admin_commands() {
    let home = make_temp_home();
    login(&home, "viewer", "viewer123");

    assert!(run(&home, &["dashboard"]).status.success());
    assert!(run(&home, &["refs", "list"]).status.success());

    for args in [
        &["risk", "list"][..],
        &["fmea", "scales"][..],
        &["users"][..],
        &["users", "toggle", "2"][..],
        &["workflow", "list"][..],
        &["assess", "generate", "--template", "manufacturing"][..],
        &["reset", "--yes"][..],
    ] {
        let out = run(&home, args);
        assert_eq!(out.status.code(), Some(4), "args={args:?}");
    }
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn unknown_risk_exits_3() {
    let home = make_temp_home();
    login(&home, "assessor", "assessor123");
    for args in [
        &["risk", "show", "999"][..],
        &["risk", "update", "999", "--impact", "2"][..],
        &["risk", "delete", "999", "--yes"][..],
        &["refs", "show", "999"][..],
        &["workflow", "show", "99"][..],
        &["workflow", "sign", "99", "--decision", "approve"][..],
    ] {
        let out = run(&home, args);
        assert_eq!(out.status.code(), Some(3), "args={args:?}");
    }
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_input_exits_2() {
    let home = make_temp_home();
    login(&home, "assessor", "assessor123");
    for args in [
        &[
            "risk",
            "add",
            "--name",
            "x",
            "--description",
            "y",
            "--category",
            "Quality",
            "--likelihood",
            "6",
            "--impact",
            "1",
        ][..],
        &["risk", "update", "1"][..],
        &["risk", "list", "--status", "done"][..],
        &["fmea", "rpn", "--severity", "11", "--occurrence", "1", "--detection", "1"][..],
        &["workflow", "sign", "2", "--decision", "approve"][..],
        &["workflow", "sign", "1", "--decision", "maybe"][..],
        &["assess", "generate", "--template", "warehouse"][..],
    ] {
        let out = run(&home, args);
        assert_eq!(out.status.code(), Some(2), "args={args:?}");
    }
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn destructive_commands_without_yes_exit_2_when_not_a_tty() {
    let home = make_temp_home();
    login(&home, "admin", "admin123");
    let out = run(&home, &["reset"]);
    assert_eq!(out.status.code(), Some(2));
    let out = run(&home, &["risk", "delete", "1"]);
    assert_eq!(out.status.code(), Some(2));
    let out = run(&home, &["users", "delete", "3"]);
    assert_eq!(out.status.code(), Some(2));

    let out = run(&home, &["risk", "show", "1", "--json"]);
    assert!(out.status.success(), "risk 1 must survive");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn broken_config_exits_2() {
    let home = make_temp_home();
    let path = home.join(".config/riskreg/config.toml");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "[ui\n").unwrap();
    let out = run(&home, &["config", "--show"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}
