//! Bounded polling on top of [`BrowserSession`].

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::browser::session::{scripts, BrowserSession, ElementHandle};
use crate::error::{Result, ScrapingError};

/// Poll `condition` every `poll` until it holds or `timeout` elapses.
/// The condition is always checked at least once.
pub async fn wait_until<F, Fut>(timeout: Duration, poll: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(poll.min(deadline - now)).await;
    }
}

/// Wait for an element matching `selector` to be present.
pub async fn wait_for_element(
    session: &dyn BrowserSession,
    selector: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<ElementHandle> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(element) = session.find_element(selector).await {
            return Ok(element);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(ScrapingError::Timeout(selector.to_string()));
        }
        sleep(poll.min(deadline - now)).await;
    }
}

/// Wait for `document.readyState` to report "complete".
pub async fn wait_for_document_ready(
    session: &dyn BrowserSession,
    timeout: Duration,
    poll: Duration,
) -> Result<()> {
    let ready = wait_until(timeout, poll, move || async move {
        matches!(
            session.execute_script(scripts::READY_STATE).await,
            Ok(serde_json::Value::String(state)) if state == "complete"
        )
    })
    .await;

    if ready {
        Ok(())
    } else {
        Err(ScrapingError::Timeout("document ready".to_string()))
    }
}

/// Visible text of the whole page body, or an empty string.
pub async fn body_text(session: &dyn BrowserSession) -> String {
    match session.execute_script(scripts::BODY_TEXT).await {
        Ok(serde_json::Value::String(text)) => text,
        _ => String::new(),
    }
}
