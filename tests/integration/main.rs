//! Integration tests for Strata

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn strata() -> Command {
        cargo_bin_cmd!("strata")
    }

    /// Temp workspace with a config file pointing the store inside it
    fn workspace() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(
            &config,
            format!("[store]\ndir = \"{}\"\n", dir.path().join("store").display()),
        )
        .unwrap();
        (dir, config)
    }

    #[test]
    fn help_displays() {
        strata()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build cache"));
    }

    #[test]
    fn version_displays() {
        strata()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("strata"));
    }

    #[test]
    fn build_missing_buildfile_fails() {
        let (dir, config) = workspace();
        strata()
            .current_dir(dir.path())
            .args(["--config"])
            .arg(&config)
            .args(["build", "--file", "absent.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn build_invalid_buildfile_fails() {
        let (dir, config) = workspace();
        std::fs::write(dir.path().join("strata.toml"), "stage = 42\n").unwrap();

        strata()
            .current_dir(dir.path())
            .args(["--config"])
            .arg(&config)
            .args(["build"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid buildfile"));
    }

    #[test]
    fn build_end_to_end() {
        let (dir, config) = workspace();
        std::fs::write(
            dir.path().join("strata.toml"),
            r#"
platforms = ["linux/amd64"]

[[stage]]
name = "hello"

[[stage.step]]
command = "echo hi > hello.txt"
"#,
        )
        .unwrap();

        strata()
            .current_dir(dir.path())
            .args(["--config"])
            .arg(&config)
            .args(["build", "--output", "out"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 step(s)"));

        let bundle = dir.path().join("out/linux-amd64/hello.txt");
        assert_eq!(std::fs::read_to_string(bundle).unwrap(), "hi\n");

        // Second run is served from the cache
        strata()
            .current_dir(dir.path())
            .args(["--config"])
            .arg(&config)
            .args(["build", "--output", "out2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 cached"));
    }

    #[test]
    fn cache_status_runs() {
        let (dir, config) = workspace();
        strata()
            .current_dir(dir.path())
            .args(["--config"])
            .arg(&config)
            .args(["cache", "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Layer entries"));
    }

    #[test]
    fn cache_prune_empty_store() {
        let (dir, config) = workspace();
        strata()
            .current_dir(dir.path())
            .args(["--config"])
            .arg(&config)
            .args(["cache", "prune", "--older-than", "7"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing to prune"));
    }
}
