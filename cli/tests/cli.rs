use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("loomchat")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("tools"));
}

#[test]
fn tools_lists_configured_tools() {
    let config = write_config(
        r#"{
            "protocol": "openai",
            "api_key": "sk-test",
            "model": "gpt-4o-mini",
            "tools": {"web_search": {"endpoint": "https://search.example.com/api"}}
        }"#,
    );

    Command::cargo_bin("loomchat")
        .unwrap()
        .arg("--config")
        .arg(config.path())
        .arg("tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("web_search"))
        .stdout(predicate::str::contains("current_time"));
}

#[test]
fn tools_without_search_endpoint_hides_web_search() {
    let config = write_config(
        r#"{"protocol": "openai", "api_key": "sk-test", "model": "gpt-4o-mini"}"#,
    );

    Command::cargo_bin("loomchat")
        .unwrap()
        .arg("--config")
        .arg(config.path())
        .arg("tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("current_time"))
        .stdout(predicate::str::contains("web_search is disabled"));
}

#[test]
fn serve_refuses_to_start_without_tokens() {
    let config = write_config(
        r#"{"protocol": "openai", "api_key": "sk-test", "model": "gpt-4o-mini"}"#,
    );

    Command::cargo_bin("loomchat")
        .unwrap()
        .arg("--config")
        .arg(config.path())
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No auth tokens configured"));
}
