use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use riskreg::core::{MitigationStatus, RiskInput, RiskPatch};
use riskreg::store::RiskStore;
use riskreg::store::kv::{self, FileKvStore, KvStore};

fn make_temp_dir() -> PathBuf {
    static DIR_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = DIR_SEQ.fetch_add(1, Ordering::Relaxed);
    let dir =
        std::env::temp_dir().join(format!("riskreg-store-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn input(name: &str) -> RiskInput {
    RiskInput {
        risk_name: name.to_string(),
        description: "temperature excursion".to_string(),
        category: "Storage".to_string(),
        likelihood: 3,
        impact: 4,
        mitigation_status: MitigationStatus::InProgress,
        regulatory_reference: None,
        treatments: vec![],
    }
}

#[test]
fn first_open_seeds_named_files() {
    let dir = make_temp_dir();
    let store = RiskStore::open(FileKvStore::open(&dir).expect("open kv"));
    assert_eq!(store.risks().len(), 5);
    assert_eq!(store.audit_trail().len(), 2);

    for key in [kv::RISKS_KEY, kv::AUDIT_TRAIL_KEY, kv::INITIALIZED_KEY] {
        assert!(dir.join(format!("{key}.json")).exists(), "{key}");
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn mutations_survive_reopen() {
    let dir = make_temp_dir();
    let mut store = RiskStore::open(FileKvStore::open(&dir).expect("open kv"));
    let added = store.add(input("Reefer failure"), None).expect("add");
    store
        .update(
            &added.risk_id,
            RiskPatch {
                likelihood: Some(5),
                ..RiskPatch::default()
            },
            None,
        )
        .expect("update");
    store.delete("2", None).expect("delete");
    drop(store);

    let store = RiskStore::open(FileKvStore::open(&dir).expect("reopen kv"));
    let risk = store.get_by_id(&added.risk_id).expect("added risk persisted");
    assert_eq!(risk.risk_score(), 20);
    assert!(store.get_by_id("2").is_none());
    assert_eq!(store.risks().len(), 5);
    assert_eq!(store.audit_trail().len(), 5);

    let mut store = store;
    let next = store.add(input("Another"), None).expect("add");
    assert_ne!(next.risk_id, added.risk_id);
    assert_eq!(next.risk_id, "7");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn corrupt_risk_file_falls_back_to_seed() {
    let dir = make_temp_dir();
    drop(RiskStore::open(FileKvStore::open(&dir).expect("open kv")));

    std::fs::write(dir.join(format!("{}.json", kv::RISKS_KEY)), "{not json").expect("corrupt");
    let store = RiskStore::open(FileKvStore::open(&dir).expect("reopen kv"));
    assert_eq!(store.risks().len(), 5);
    assert_eq!(store.get_by_id("1").map(|r| r.risk_score()), Some(12));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn reset_rewrites_persisted_state() {
    let dir = make_temp_dir();
    let mut store = RiskStore::open(FileKvStore::open(&dir).expect("open kv"));
    store.delete("1", None).expect("delete");
    store.reset();
    drop(store);

    let kv = FileKvStore::open(&dir).expect("reopen kv");
    assert!(kv.get(kv::INITIALIZED_KEY).expect("get").is_some());
    let store = RiskStore::open(kv);
    assert!(store.get_by_id("1").is_some());
    assert_eq!(store.audit_trail().len(), 2);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn file_kv_rejects_path_like_keys() {
    let dir = make_temp_dir();
    let mut kv = FileKvStore::open(&dir).expect("open kv");
    assert!(kv.set("../escape", "x").is_err());
    assert!(kv.get("a/b").is_err());
    kv.set("plain-key", "value").expect("set");
    assert_eq!(kv.get("plain-key").expect("get").as_deref(), Some("value"));
    kv.remove("plain-key").expect("remove");
    assert_eq!(kv.get("plain-key").expect("get"), None);
    let _ = std::fs::remove_dir_all(&dir);
}
