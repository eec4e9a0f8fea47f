use std::fs;
use tempfile::tempdir;

#[test]
fn status_reports_per_stage_completion_from_durable_state() {
    let tmp = tempdir().expect("tempdir");
    let manifest_dir = tmp.path().join("manifest");
    let snapshots_dir = tmp.path().join("snapshots");
    fs::create_dir_all(&manifest_dir).expect("mkdir manifest");
    fs::create_dir_all(&snapshots_dir).expect("mkdir snapshots");

    fs::write(manifest_dir.join("universe.txt"), "ZK_1_NB_1_V\nZK_1_NB_2_V\n")
        .expect("write universe");
    // One snapshot artifact already on disk: file presence counts as done.
    fs::write(snapshots_dir.join("ZK_1_NB_1_V.html"), "<html></html>")
        .expect("write snapshot");

    assert_cmd::Command::cargo_bin("zkarch")
        .expect("zkarch binary")
        .env("ZKARCH_HOME", tmp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicates::str::contains("universe_total=2"))
        .stdout(predicates::str::contains(
            "stage=snapshot done=1 missing=1 transient=0 permanent=0 complete=50.00%",
        ))
        .stdout(predicates::str::contains(
            "stage=fetch done=0 missing=2 transient=0 permanent=0 complete=0.00%",
        ));
}

#[test]
fn status_flags_an_empty_universe() {
    let tmp = tempdir().expect("tempdir");

    assert_cmd::Command::cargo_bin("zkarch")
        .expect("zkarch binary")
        .env("ZKARCH_HOME", tmp.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicates::str::contains("universe is empty"));
}
