use std::fs;
use tempfile::tempdir;

#[test]
fn verify_passes_on_a_clean_archive() {
    let tmp = tempdir().expect("tempdir");
    let manifest_dir = tmp.path().join("manifest");
    fs::create_dir_all(&manifest_dir).expect("mkdir manifest");
    fs::write(manifest_dir.join("universe.txt"), "ZK_1_NB_1_V\nZK_1_NB_2_V\n")
        .expect("write universe");

    assert_cmd::Command::cargo_bin("zkarch")
        .expect("zkarch binary")
        .env("ZKARCH_HOME", tmp.path())
        .arg("verify")
        .assert()
        .success()
        .stdout(predicates::str::contains("duplicate_groups=0"));
}

#[test]
fn verify_flags_canonical_duplicates_without_merging_them() {
    let tmp = tempdir().expect("tempdir");
    let manifest_dir = tmp.path().join("manifest");
    fs::create_dir_all(&manifest_dir).expect("mkdir manifest");
    // Same card reachable through two spellings that differ only in case.
    fs::write(
        manifest_dir.join("universe.txt"),
        "ZK_1_NB_1a_V\nZK_1_NB_1A_V\n",
    )
    .expect("write universe");

    assert_cmd::Command::cargo_bin("zkarch")
        .expect("zkarch binary")
        .env("ZKARCH_HOME", tmp.path())
        .arg("verify")
        .assert()
        .failure()
        .stdout(predicates::str::contains(
            "duplicate_group: ZK_1_NB_1A_V / ZK_1_NB_1a_V",
        ))
        .stderr(predicates::str::contains("collide after canonicalization"));

    // Both spellings stay in the universe.
    let universe =
        fs::read_to_string(manifest_dir.join("universe.txt")).expect("read universe");
    assert!(universe.contains("ZK_1_NB_1a_V"));
    assert!(universe.contains("ZK_1_NB_1A_V"));
}

#[test]
fn verify_flags_artifact_hash_drift() {
    let tmp = tempdir().expect("tempdir");
    let manifest_dir = tmp.path().join("manifest");
    let records_dir = tmp.path().join("records");
    fs::create_dir_all(&manifest_dir).expect("mkdir manifest");
    fs::create_dir_all(&records_dir).expect("mkdir records");

    fs::write(manifest_dir.join("universe.txt"), "ZK_1_NB_1_V\n").expect("write universe");
    let artifact = records_dir.join("ZK_1_NB_1_V.json");
    fs::write(&artifact, "{}\n").expect("write artifact");
    // Ledger carries a hash that no longer matches the file on disk.
    let ledger_line = format!(
        "{{\"stage\":\"fetch\",\"id\":\"ZK_1_NB_1_V\",\"outcome\":{{\"kind\":\"success\",\"artifact\":\"{}\",\"sha256\":\"{}\"}},\"retries\":0,\"updated_at_epoch_secs\":1}}\n",
        artifact.display(),
        "0".repeat(64)
    );
    fs::write(manifest_dir.join("ledger.jsonl"), ledger_line).expect("write ledger");

    assert_cmd::Command::cargo_bin("zkarch")
        .expect("zkarch binary")
        .env("ZKARCH_HOME", tmp.path())
        .arg("verify")
        .assert()
        .failure()
        .stderr(predicates::str::contains("drift from their recorded hashes"));
}
