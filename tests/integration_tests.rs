//! Integration tests for the shipyard CLI
//!
//! These exercise the binary end to end without a container runtime.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a shipyard Command isolated from the caller's env
fn shipyard(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("shipyard");
    cmd.current_dir(dir.path())
        .env_remove("SHIPYARD_PORT")
        .env_remove("SHIPYARD_STORE_URL")
        .env_remove("SHIPYARD_AUTH_URL")
        .env_remove("SHIPYARD_RECONCILE_STRATEGY");
    cmd
}

fn write_config(dir: &TempDir, content: &str) {
    fs::create_dir_all(dir.path().join(".shipyard")).unwrap();
    fs::write(dir.path().join(".shipyard/hosting.toml"), content).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        shipyard(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("resolve"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        shipyard(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let dir = TempDir::new().unwrap();
        shipyard(&dir)
            .args(["serve", "--strategy", "telepathy"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("telepathy"));
    }
}

// =============================================================================
// Name resolution
// =============================================================================

mod resolve {
    use super::*;

    #[test]
    fn test_resolve_project_url() {
        let dir = TempDir::new().unwrap();
        shipyard(&dir)
            .args(["resolve", "app.alice.localhost"])
            .assert()
            .success()
            .stdout("app-alice\n");
    }

    #[test]
    fn test_resolve_single_label() {
        let dir = TempDir::new().unwrap();
        shipyard(&dir)
            .args(["resolve", "single"])
            .assert()
            .success()
            .stdout("single\n");
    }

    #[test]
    fn test_resolve_empty_uses_fallback() {
        let dir = TempDir::new().unwrap();
        shipyard(&dir)
            .args(["resolve", ""])
            .assert()
            .success()
            .stdout("default_id\n");
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_shows_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        shipyard(&dir)
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("showing defaults"))
            .stdout(predicate::str::contains("port = 5000"))
            .stdout(predicate::str::contains("network = \"app-network\""));
    }

    #[test]
    fn test_config_reads_file_and_env() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "[server]\nport = 7000\n\n[reconcile]\nstrategy = \"events\"\n",
        );
        shipyard(&dir)
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 7000"))
            .stdout(predicate::str::contains("strategy = \"events\""));

        shipyard(&dir)
            .arg("config")
            .env("SHIPYARD_PORT", "7100")
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 7100"));
    }

    #[test]
    fn test_config_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[activity]\ninactivity_threshold_secs = 60\n").unwrap();
        shipyard(&dir)
            .args(["config", "--config"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("inactivity_threshold_secs = 60"));
    }

    #[test]
    fn test_invalid_config_fails() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "[runtime]\nmemory = \"lots\"\n");
        shipyard(&dir)
            .arg("config")
            .assert()
            .failure()
            .stderr(predicate::str::contains("runtime.memory"));
    }
}

// =============================================================================
// Serve preconditions
// =============================================================================

mod serve {
    use super::*;

    #[test]
    fn test_serve_requires_a_project_store() {
        let dir = TempDir::new().unwrap();
        shipyard(&dir)
            .arg("serve")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No project store configured"));
    }

    #[test]
    fn test_serve_rejects_unreadable_project_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("projects.json"), "{ nope").unwrap();
        shipyard(&dir)
            .args(["serve", "--projects", "projects.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse project file"));
    }
}
