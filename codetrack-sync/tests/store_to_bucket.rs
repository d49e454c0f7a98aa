//! End-to-end: config file → destination → sync of a store folder.

use std::fs;
use std::sync::Arc;

use codetrack_core::RemoteConfig;
use codetrack_sync::{
    DirectoryDestination, Filters, RemoteDestination, RemoteSync, SyncJob, UploadStatsListener,
};
use tempfile::TempDir;

#[test]
fn configured_destination_receives_store_contents() {
    let tmp = TempDir::new().expect("tmp");
    let store = tmp.path().join("store");
    let object_root = tmp.path().join("objects");
    fs::create_dir_all(&store).expect("store");
    fs::create_dir_all(object_root.join("recordings")).expect("bucket");

    let config_path = tmp.path().join("remote.yaml");
    fs::write(
        &config_path,
        format!(
            "bucket: recordings\nprefix: alice/\nroot: {}\n",
            object_root.display()
        ),
    )
    .expect("config");
    let config = RemoteConfig::load_at(&config_path).expect("load config");

    let destination = Arc::new(DirectoryDestination::from_config(&config));
    destination.start_session().expect("start session");

    fs::write(store.join("codetrack_20250101T000000_1.log"), b"hello\n").expect("log");
    fs::write(store.join("sourcecode_20250101T000000.srcs"), b"{}\n").expect("srcs");
    fs::write(store.join("sourcecode_20250101T000000.srcs.lock"), b"").expect("lock");

    let listener = Arc::new(UploadStatsListener::new());
    let sync = RemoteSync::new(&store, Filters::default(), destination.clone(), listener.clone());
    let report = sync.run_once().expect("sync");

    assert_eq!(report.uploaded, vec!["codetrack_20250101T000000_1.log".to_string()]);
    assert_eq!(report.skipped_locked, 1);
    assert!(object_root
        .join("recordings/alice/codetrack_20250101T000000_1.log")
        .exists());
    assert!(object_root.join("recordings/alice/last_sync_start.json").exists());

    destination.stop_session().expect("stop session");
    assert!(object_root.join("recordings/alice/last_sync_stop.json").exists());
}
