use tempfile::tempdir;

#[test]
fn run_refuses_an_empty_universe() {
    let tmp = tempdir().expect("tempdir");

    assert_cmd::Command::cargo_bin("zkarch")
        .expect("zkarch binary")
        .env("ZKARCH_HOME", tmp.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicates::str::contains("universe is empty"));
}
