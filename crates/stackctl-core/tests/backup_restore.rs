use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use stackctl_core::{
    BackupManager, HealthProbe, HealthProber, LifecycleController, LifecyclePhase, ProbeOutcome,
    StackConfig, StackError,
};
use stackctl_engine::fakes::{EngineCall, RecordingEngine};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct HealthyProbe;

#[async_trait]
impl HealthProbe for HealthyProbe {
    async fn probe(&self, _url: &str) -> ProbeOutcome {
        ProbeOutcome::from_status(200)
    }
}

fn write(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write");
}

/// Relative path to contents for every file under `dir`.
fn tree(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).expect("read_dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                walk(base, &path, out);
            } else {
                let rel = path.strip_prefix(base).expect("prefix");
                out.insert(
                    rel.to_string_lossy().into_owned(),
                    fs::read(&path).expect("read"),
                );
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(dir, dir, &mut out);
    out
}

fn project() -> (TempDir, StackConfig) {
    let tmp = TempDir::new().expect("tempdir");
    let config = StackConfig::default().with_project_dir(tmp.path());
    (tmp, config)
}

fn dirs(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Round trip through the lifecycle controller
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restore_stops_the_stack_and_reproduces_the_snapshot() {
    let (tmp, config) = project();
    write(tmp.path(), "data/train.jsonl", b"{\"input\":\"a\"}\n");
    write(tmp.path(), "data/eval/holdout.jsonl", b"{\"input\":\"b\"}\n");
    write(tmp.path(), "models/adapter/adapter_model.bin", &[0u8, 159, 146, 150]);
    write(tmp.path(), "configs/production-config.yaml", b"epochs: 3\n");

    let manager = BackupManager::new(&config);
    let snapshot = manager
        .snapshot_dirs(&dirs(&["data", "models"]))
        .expect("snapshot");
    let data_before = tree(&tmp.path().join("data"));
    let models_before = tree(&tmp.path().join("models"));

    write(tmp.path(), "data/train.jsonl", b"corrupted");
    write(tmp.path(), "data/stray.tmp", b"junk");
    write(tmp.path(), "configs/production-config.yaml", b"epochs: 10\n");

    let engine = Arc::new(RecordingEngine::new().with_running(&["qlorax-api", "qlorax-ui"]));
    let mut ctl = LifecycleController::new(
        config.clone(),
        engine.clone(),
        HealthProber::new(Arc::new(HealthyProbe)),
    );

    let restored = manager
        .restore(snapshot.id(), &mut ctl)
        .await
        .expect("restore");

    assert_eq!(restored, dirs(&["data", "models"]));
    assert!(engine.calls().contains(&EngineCall::Down));
    assert!(engine.running().is_empty());
    assert_eq!(ctl.phase(), LifecyclePhase::Stopped);

    assert_eq!(tree(&tmp.path().join("data")), data_before);
    assert_eq!(tree(&tmp.path().join("models")), models_before);
    assert_eq!(
        fs::read(tmp.path().join("configs/production-config.yaml")).expect("read"),
        b"epochs: 10\n"
    );
}

#[tokio::test]
async fn restore_of_unknown_snapshot_touches_nothing() {
    let (tmp, config) = project();
    write(tmp.path(), "data/train.jsonl", b"live");

    let engine = Arc::new(RecordingEngine::new().with_running(&["qlorax-api"]));
    let mut ctl = LifecycleController::new(
        config.clone(),
        engine.clone(),
        HealthProber::new(Arc::new(HealthyProbe)),
    );

    let err = BackupManager::new(&config)
        .restore("19700101_000000", &mut ctl)
        .await
        .expect_err("missing snapshot");

    assert!(matches!(err, StackError::RestoreSourceMissing { .. }));
    assert!(err.is_fatal());
    assert!(engine.calls().is_empty());
    assert_eq!(engine.running(), vec!["qlorax-api"]);
    assert_eq!(
        fs::read(tmp.path().join("data/train.jsonl")).expect("read"),
        b"live"
    );
}

#[test]
fn configured_backup_root_is_honoured() {
    let (tmp, mut config) = project();
    config.backup_root = tmp.path().join("elsewhere");
    write(tmp.path(), "outputs/metrics.json", b"{}");

    let manager = BackupManager::new(&config);
    let snapshot = manager.snapshot().expect("snapshot");

    assert!(snapshot.dest_path().starts_with(tmp.path().join("elsewhere")));
    assert_eq!(snapshot.manifest().directories, dirs(&["outputs"]));
    assert_eq!(manager.list().expect("list").len(), 1);
}
