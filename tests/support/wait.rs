use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};

use ln_starknet_swap::swap::store::SwapStore;
use ln_starknet_swap::swap::{SwapStatus, SwapTransaction};

pub async fn wait_for<T, F, Fut>(description: &str, timeout: Duration, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    let mut sleep_for = Duration::from_millis(10);

    loop {
        if Instant::now() >= deadline {
            anyhow::bail!("timeout waiting for {description}");
        }

        if let Some(value) = f().await.with_context(|| format!("poll {description}"))? {
            return Ok(value);
        }

        tokio::time::sleep(sleep_for).await;
        sleep_for = (sleep_for * 2).min(Duration::from_millis(200));
    }
}

/// Polls the store until `swap_id` reaches `status`.
pub async fn wait_for_status(
    store: &dyn SwapStore,
    swap_id: &str,
    status: SwapStatus,
    timeout: Duration,
) -> Result<SwapTransaction> {
    wait_for(
        &format!("swap {swap_id} to reach {}", status.as_str()),
        timeout,
        || async move {
            let record = store.get(swap_id)?.context("swap missing")?;
            Ok((record.status == status).then_some(record))
        },
    )
    .await
}
