//! Integration tests for the `strata publish` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CONFIG_NAME: &str = "pythia-14M.yml";

/// Command isolated from any strata.toml on the host.
fn strata(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("strata").unwrap();
    cmd.current_dir(temp_dir.path()).env("HOME", temp_dir.path()).env_remove("HF_TOKEN");
    cmd
}

/// Create a checkpoint directory, optionally with its per-step config file.
fn create_checkpoint(root: &Path, name: &str, with_config: bool) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("layer_00-model_00-model_states.pt"), b"weights").unwrap();
    if with_config {
        fs::create_dir_all(dir.join("configs")).unwrap();
        fs::write(dir.join("configs").join(CONFIG_NAME), "hidden-size: 128\n").unwrap();
    }
}

/// Converter script that writes a config.json into --output_dir.
fn write_converter(temp_dir: &TempDir) -> String {
    let script = temp_dir.path().join("convert.sh");
    fs::write(
        &script,
        r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--output_dir" ]; then out="$2"; shift; fi
  shift
done
mkdir -p "$out"
echo '{"model_type": "gpt_neox"}' > "$out/config.json"
"#,
    )
    .unwrap();
    script.to_str().unwrap().to_string()
}

#[test]
fn test_publish_help_lists_flags() {
    let temp_dir = TempDir::new().unwrap();
    strata(&temp_dir)
        .args(["publish", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--checkpoints-dir"))
        .stdout(predicate::str::contains("--pythia-type"))
        .stdout(predicate::str::contains("--last-step-in-training"));
}

#[test]
fn test_publish_rejects_unknown_pythia_type() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("ckpts")).unwrap();

    strata(&temp_dir)
        .args(["publish", "-d", "ckpts", "-o", "out", "-n", CONFIG_NAME])
        .args(["-p", "15M", "-r", "org/model"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("model size must be one of"));
}

#[test]
fn test_publish_missing_checkpoints_dir() {
    let temp_dir = TempDir::new().unwrap();

    strata(&temp_dir)
        .args(["publish", "-d", "missing", "-o", "out", "-n", CONFIG_NAME])
        .args(["-p", "14M", "-r", "org/model"])
        .args(["--registry", "local", "--registry-dir", "registry"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_publish_local_registry_requires_dir() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("ckpts")).unwrap();

    strata(&temp_dir)
        .args(["publish", "-d", "ckpts", "-o", "out", "-n", CONFIG_NAME])
        .args(["-p", "14M", "-r", "org/model"])
        .args(["--registry", "local"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--registry-dir"));
}

#[test]
fn test_publish_rejects_unknown_final_step_policy() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("ckpts")).unwrap();

    strata(&temp_dir)
        .args(["publish", "-d", "ckpts", "-o", "out", "-n", CONFIG_NAME])
        .args(["-p", "14M", "-r", "org/model"])
        .args(["--final-step", "newest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown final step policy"));
}

#[cfg(unix)]
#[test]
fn test_publish_to_local_registry() {
    let temp_dir = TempDir::new().unwrap();
    let ckpts = temp_dir.path().join("ckpts");
    create_checkpoint(&ckpts, "global_step0", true);
    create_checkpoint(&ckpts, "global_step500", false);
    create_checkpoint(&ckpts, "global_step1000", true);
    create_checkpoint(&ckpts, "global_step2000", true);
    let converter = write_converter(&temp_dir);

    let publish = |temp_dir: &TempDir| {
        let mut cmd = strata(temp_dir);
        cmd.args(["publish", "-d", "ckpts", "-o", "out", "-n", CONFIG_NAME])
            .args(["-p", "14m", "-r", "org/pythia-14m"])
            .args(["--converter", "sh", "--converter-arg", &converter])
            .args(["--registry", "local", "--registry-dir", "registry"])
            .args(["--asset-base-url", "http://127.0.0.1:9"]);
        cmd
    };

    publish(&temp_dir).assert().success().stdout(predicate::str::contains("Processing completed."));

    let repo = temp_dir.path().join("registry").join("org/pythia-14m");
    assert!(repo.join("0").join("config.json").is_file());
    assert!(repo.join("1000").join("config.json").is_file());
    assert!(!repo.join("500").exists());
    // The highest step is held aside; the default branch gets step 1000's output.
    assert!(!repo.join("2000").exists());
    assert!(repo.join("main").join("config.json").is_file());
    assert!(!temp_dir.path().join("out").join("global_step2000").exists());

    // A second run finds every output populated and uploads nothing.
    publish(&temp_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("No branches were uploaded"));
}

#[cfg(unix)]
#[test]
fn test_publish_json_report() {
    let temp_dir = TempDir::new().unwrap();
    let ckpts = temp_dir.path().join("ckpts");
    create_checkpoint(&ckpts, "global_step10", true);
    create_checkpoint(&ckpts, "global_step20", true);
    let converter = write_converter(&temp_dir);

    let output = strata(&temp_dir)
        .args(["--json", "--log-level", "error"])
        .args(["publish", "-d", "ckpts", "-o", "out", "-n", CONFIG_NAME])
        .args(["-p", "70M", "-r", "org/model"])
        .args(["--converter", "sh", "--converter-arg", &converter])
        .args(["--registry", "local", "--registry-dir", "registry"])
        .args(["--last-step-in-training", "false", "--branch-prefix", "step"])
        .args(["--asset-base-url", "http://127.0.0.1:9"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["repository"], "org/model");
    assert!(report["detached"].is_null());
    let branches: Vec<&str> = report["branches"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["branch"].as_str().unwrap())
        .collect();
    assert_eq!(branches, vec!["step10", "step20"]);
    assert!(temp_dir.path().join("registry/org/model/step20/config.json").is_file());
}

#[cfg(unix)]
#[test]
fn test_publish_converter_failure_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let ckpts = temp_dir.path().join("ckpts");
    create_checkpoint(&ckpts, "global_step10", true);
    create_checkpoint(&ckpts, "global_step20", true);

    strata(&temp_dir)
        .args(["publish", "-d", "ckpts", "-o", "out", "-n", CONFIG_NAME])
        .args(["-p", "14M", "-r", "org/model"])
        .args(["--converter", "false"])
        .args(["--registry", "local", "--registry-dir", "registry"])
        .args(["--asset-base-url", "http://127.0.0.1:9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Publishing to org/model failed"));

    assert!(!temp_dir.path().join("registry/org/model/10").exists());
}

/// Converter script that writes part of its output and then exits non-zero
/// for global_step20.
#[cfg(unix)]
fn write_crashing_converter(temp_dir: &TempDir) -> String {
    let script = temp_dir.path().join("crash.sh");
    fs::write(
        &script,
        r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--output_dir" ]; then out="$2"; shift; fi
  shift
done
mkdir -p "$out"
echo '{"model_type": "gpt_neox"}' > "$out/config.json"
case "$out" in *global_step20) exit 3 ;; esac
"#,
    )
    .unwrap();
    script.to_str().unwrap().to_string()
}

#[cfg(unix)]
#[test]
fn test_publish_failure_reports_failed_step_and_retries_it() {
    let temp_dir = TempDir::new().unwrap();
    let ckpts = temp_dir.path().join("ckpts");
    create_checkpoint(&ckpts, "global_step10", true);
    create_checkpoint(&ckpts, "global_step20", true);
    create_checkpoint(&ckpts, "global_step30", true);

    let publish = |temp_dir: &TempDir, converter: &str| {
        let mut cmd = strata(temp_dir);
        cmd.args(["--json", "--log-level", "error"])
            .args(["publish", "-d", "ckpts", "-o", "out", "-n", CONFIG_NAME])
            .args(["-p", "14M", "-r", "org/model"])
            .args(["--converter", "sh", "--converter-arg", converter])
            .args(["--registry", "local", "--registry-dir", "registry"])
            .args(["--asset-base-url", "http://127.0.0.1:9"]);
        cmd
    };

    let crashing = write_crashing_converter(&temp_dir);
    let output = publish(&temp_dir, &crashing).output().unwrap();
    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let artifacts = report["artifacts"].as_array().unwrap();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[1]["step"], 20);
    assert_eq!(artifacts[1]["status"], "failed");
    assert!(artifacts[1]["reason"].as_str().unwrap().contains("20"));
    assert!(!temp_dir.path().join("out").join("global_step20").exists());

    let converter = write_converter(&temp_dir);
    let output = publish(&temp_dir, &converter).output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let statuses: Vec<&str> = report["artifacts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["skipped", "published"]);
    assert!(temp_dir.path().join("registry/org/model/20/config.json").is_file());
}
