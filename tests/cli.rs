//! CLI surface tests: argument validation and configuration exit codes.

use assert_cmd::Command;

#[test]
fn missing_goal_is_a_usage_error() {
    Command::cargo_bin("flash-loop")
        .unwrap()
        .assert()
        .failure()
        .code(2);
}

#[test]
fn missing_api_key_exits_with_one() {
    Command::cargo_bin("flash-loop")
        .unwrap()
        .arg("open the dashboard")
        .env_remove("CEREBRAS_API_KEY")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn zero_max_steps_is_rejected() {
    Command::cargo_bin("flash-loop")
        .unwrap()
        .args(["goal", "--max-steps", "0"])
        .assert()
        .failure()
        .code(2);
}
