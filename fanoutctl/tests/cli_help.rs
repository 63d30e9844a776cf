use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn transcode_help_mentions_options() {
    let mut cmd = cargo_bin_cmd!("fanoutctl");
    let output = cmd
        .arg("transcode")
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("--hwaccel"), "transcode help missing --hwaccel");
    assert!(text.contains("--profiles"), "transcode help missing --profiles");
    assert!(text.contains("--timeout"), "transcode help missing --timeout");
}

#[test]
fn subcommands_present() {
    let mut cmd = cargo_bin_cmd!("fanoutctl");
    cmd.arg("--help").assert().success().stdout(
        predicate::str::contains("transcode")
            .and(predicate::str::contains("renditions"))
            .and(predicate::str::contains("probe"))
            .and(predicate::str::contains("compare")),
    );
}

#[test]
fn renditions_lists_builtin_names() {
    let mut cmd = cargo_bin_cmd!("fanoutctl");
    cmd.env_remove("FANOUT_CONFIG")
        .arg("renditions")
        .assert()
        .success()
        .stdout(predicate::str::contains("P720p30fps16x9"));
}

#[test]
fn output_count_must_match_renditions() {
    let mut cmd = cargo_bin_cmd!("fanoutctl");
    cmd.env_remove("FANOUT_CONFIG")
        .args(["transcode", "-i", "in.mp4", "-o", "a.mp4"])
        .args(["--profiles", "P720p30fps16x9,P360p30fps16x9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("pass one --output per rendition"));
}

#[test]
fn unknown_rendition_is_reported() {
    let mut cmd = cargo_bin_cmd!("fanoutctl");
    cmd.env_remove("FANOUT_CONFIG")
        .args(["transcode", "-i", "in.mp4", "-o", "a.mp4", "--profiles", "P9000p"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --profiles"));
}
