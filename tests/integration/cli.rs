//! Command-line behaviour of the `minicache` binary.

use assert_cmd::{cargo::cargo_bin_cmd, Command};
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Binary isolated to `home`: cache root and config both live under it.
fn minicache(home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("minicache");
    cmd.env("MINIKUBE_HOME", home)
        .env("MINICACHE_CONFIG", home.join("config.toml"))
        .env_remove("MINIKUBE_IN_STYLE");
    cmd
}

#[test]
fn help_displays() {
    let home = TempDir::new().unwrap();
    minicache(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("download and cache"));
}

#[test]
fn version_displays() {
    let home = TempDir::new().unwrap();
    minicache(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("minicache"));
}

#[test]
fn config_path_honors_env() {
    let home = TempDir::new().unwrap();
    minicache(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn config_show_prints_sections() {
    let home = TempDir::new().unwrap();
    minicache(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[preload]").and(predicate::str::contains("[sources]")));
}

#[test]
fn config_init_writes_file() {
    let home = TempDir::new().unwrap();
    minicache(home.path())
        .args(["config", "init"])
        .assert()
        .success();
    let written = std::fs::read_to_string(home.path().join("config.toml")).unwrap();
    assert!(written.contains("generation = \"v18\""));
}

#[test]
fn invalid_config_exits_with_config_code() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("config.toml"), "[cache]\nlock_timeout_secs = \"soon\"\n")
        .unwrap();
    minicache(home.path())
        .args(["config", "show"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn path_prints_binary_location() {
    let home = TempDir::new().unwrap();
    minicache(home.path())
        .args(["path", "binary", "v1.30.0", "kubectl", "--os", "linux", "--arch", "amd64"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            Path::new(".minikube/cache/linux/amd64/v1.30.0/kubectl")
                .to_string_lossy()
                .into_owned(),
        ));
}

#[test]
fn path_prints_preload_location() {
    let home = TempDir::new().unwrap();
    minicache(home.path())
        .args(["path", "preload", "v1.30.0", "--runtime", "crio", "--arch", "arm64"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "preloaded-images-k8s-v18-v1.30.0-cri-o-overlay-arm64.tar.lz4",
        ));
}

#[test]
fn fetch_iso_from_file_url() {
    let home = TempDir::new().unwrap();
    let source = home.path().join("custom.iso");
    std::fs::write(&source, b"boot image").unwrap();
    let url = url::Url::from_file_path(&source).unwrap();

    minicache(home.path())
        .args(["fetch", "iso", "v1.34.0", "--url", url.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.iso"));

    let cached = home.path().join(".minikube").join("iso").join("custom.iso");
    assert_eq!(std::fs::read(cached).unwrap(), b"boot image");
}

#[test]
fn invalid_descriptor_emits_json_error() {
    let home = TempDir::new().unwrap();
    let output = minicache(home.path())
        .args(["--output", "json", "fetch", "driver", "..", "v1.34.0"])
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();

    let line = String::from_utf8(output).unwrap();
    let event: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(event["specversion"], "1.0");
    assert_eq!(event["type"], "io.k8s.sigs.minikube.error");
    assert_eq!(event["data"]["name"], "CONFIG");
    assert_eq!(event["data"]["exitcode"], 2);
}

#[test]
fn clean_removes_old_generations() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".minikube/cache/preloaded-tarball");
    std::fs::create_dir_all(&dir).unwrap();
    let old = dir.join("preloaded-images-k8s-v17-v1.30.0-docker-overlay2-amd64.tar.lz4");
    let current = dir.join("preloaded-images-k8s-v18-v1.30.0-docker-overlay2-amd64.tar.lz4");
    std::fs::write(&old, b"old").unwrap();
    std::fs::write(&current, b"new").unwrap();

    minicache(home.path())
        .args(["clean", "--generation", "v18"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1"));
    assert!(!old.exists());
    assert!(current.exists());
}

#[test]
fn verify_checks_preload_against_its_record() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".minikube/cache/preloaded-tarball");
    std::fs::create_dir_all(&dir).unwrap();
    let tarball = dir.join("preloaded-images-k8s-v18-v1.30.0-docker-overlay2-amd64.tar.lz4");
    std::fs::write(&tarball, b"images").unwrap();
    std::fs::write(
        dir.join("preloaded-images-k8s-v18-v1.30.0-docker-overlay2-amd64.tar.lz4.checksum"),
        format!("sha256:{}", crate::support::sha256_hex(b"images")),
    )
    .unwrap();
    let args = ["verify", "preload", "v1.30.0", "--arch", "amd64"];

    minicache(home.path())
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("verified"));

    std::fs::write(&tarball, b"imagez").unwrap();
    minicache(home.path())
        .args(args)
        .assert()
        .code(62)
        .stderr(predicate::str::contains("Checksum mismatch"));
    assert!(!tarball.exists());
}

#[test]
fn verify_rejects_artifacts_without_records() {
    let home = TempDir::new().unwrap();
    minicache(home.path())
        .args(["verify", "binary", "v1.30.0", "kubectl"])
        .assert()
        .code(2);
    minicache(home.path())
        .args(["verify", "preload", "v1.30.0"])
        .assert()
        .code(61);
}
