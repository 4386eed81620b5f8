mod support;

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;

use support::fakes::{ALICE_TOKEN, Harness, test_config};

#[test]
fn cli_help_lists_subcommands() -> Result<()> {
    Command::cargo_bin("swap_cli")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create-swap"))
        .stdout(predicate::str::contains("verify-payment"))
        .stdout(predicate::str::contains("submit-deposit"));
    Ok(())
}

#[test]
fn server_help_lists_integration_flags() -> Result<()> {
    Command::cargo_bin("swap_server")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--ldk-rest-addr"))
        .stdout(predicate::str::contains("--starknet-rpc-url"))
        .stdout(predicate::str::contains("--deposit-address"));
    Ok(())
}

#[test]
fn server_requires_integration_endpoints() -> Result<()> {
    Command::cargo_bin("swap_server")?
        .env_clear()
        .assert()
        .failure()
        .stderr(predicate::str::contains("--ldk-rest-addr"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cli_talks_to_running_api() -> Result<()> {
    let h = Harness::new(test_config());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let api_url = format!("http://{}", listener.local_addr()?);
    let app = h.app();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let url = api_url.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        Command::cargo_bin("swap_cli")?
            .env_clear()
            .args(["--api-url", &url, "config"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"minSwapAmount\": 10000"));

        Command::cargo_bin("swap_cli")?
            .env_clear()
            .args(["--api-url", &url, "quote", "--amount", "5000"])
            .args(["--recipient-address", "0x1234"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("amount too low"));

        Command::cargo_bin("swap_cli")?
            .env_clear()
            .args(["--api-url", &url, "list-swaps"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("SWAP_API_TOKEN"));

        Command::cargo_bin("swap_cli")?
            .env_clear()
            .args(["--api-url", &url, "--token", ALICE_TOKEN, "create-swap"])
            .args(["--amount", "20000", "--recipient-address", "0x1234"])
            .assert()
            .success()
            .stdout(predicate::str::contains("INVOICE_GENERATED"));
        Ok(())
    })
    .await??;

    assert_eq!(h.store.list_all()?.len(), 1);
    Ok(())
}
