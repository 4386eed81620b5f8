use std::sync::Mutex;

use anyhow::Result;
use ldk_server_client::error::{LdkServerError, LdkServerErrorCode};

use ln_starknet_swap::error::IntegrationError;
use ln_starknet_swap::lightning::ldk::{classify_error, is_duplicate_payment, search_pages};

#[test]
fn node_errors_are_classified_for_retry() {
    let permanent = [
        LdkServerErrorCode::InvalidRequestError,
        LdkServerErrorCode::AuthError,
        LdkServerErrorCode::LightningError,
    ];
    for code in permanent {
        let err = classify_error("bolt11 send", &LdkServerError::new(code, "rejected"));
        assert!(matches!(err, IntegrationError::Permanent(ref msg) if msg.contains("bolt11 send")));
    }

    let transient = [
        LdkServerErrorCode::InternalServerError,
        LdkServerErrorCode::InternalError,
    ];
    for code in transient {
        let err = classify_error("list payments", &LdkServerError::new(code, "unavailable"));
        assert!(err.is_transient());
    }
}

#[test]
fn duplicate_payment_is_recognized() {
    let dup = LdkServerError::new(
        LdkServerErrorCode::LightningError,
        "Failed to send payment: DuplicatePayment",
    );
    assert!(is_duplicate_payment(&dup));

    let other = LdkServerError::new(LdkServerErrorCode::LightningError, "route not found");
    assert!(!is_duplicate_payment(&other));
}

fn pages() -> Vec<Vec<u32>> {
    vec![vec![1, 2, 3], vec![4, 5], vec![6, 7, 8]]
}

async fn fetch_page(
    pages: &[Vec<u32>],
    requested: &Mutex<Vec<Option<usize>>>,
    token: Option<usize>,
) -> Result<(Vec<u32>, Option<usize>), IntegrationError> {
    requested.lock().expect("requests poisoned").push(token);
    let index = token.unwrap_or(0);
    let items = pages.get(index).cloned().unwrap_or_default();
    let next = (index + 1 < pages.len()).then_some(index + 1);
    Ok((items, next))
}

#[tokio::test]
async fn payment_search_follows_page_tokens() -> Result<()> {
    let pages = pages();
    let requested = Mutex::new(Vec::new());

    let found = search_pages(|token| fetch_page(&pages, &requested, token), |p| *p == 7).await?;
    assert_eq!(found, Some(7));
    assert_eq!(
        *requested.lock().expect("requests poisoned"),
        vec![None, Some(1), Some(2)]
    );

    requested.lock().expect("requests poisoned").clear();
    let found = search_pages(|token| fetch_page(&pages, &requested, token), |p| *p == 2).await?;
    assert_eq!(found, Some(2));
    assert_eq!(requested.lock().expect("requests poisoned").len(), 1);

    requested.lock().expect("requests poisoned").clear();
    let missing = search_pages(|token| fetch_page(&pages, &requested, token), |p| *p == 42).await?;
    assert_eq!(missing, None);
    assert_eq!(requested.lock().expect("requests poisoned").len(), 3);
    Ok(())
}

#[tokio::test]
async fn payment_search_stops_on_error() {
    let mut calls = 0;
    let err = search_pages(
        |token: Option<u32>| {
            calls += 1;
            async move {
                match token {
                    None => Ok((vec![1u32], Some(1))),
                    Some(_) => Err(IntegrationError::Transient("connection reset".into())),
                }
            }
        },
        |p| *p == 9,
    )
    .await
    .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(calls, 2);
}
