//! Response handling shared by the HTTP-backed stores.

use reqwest::Response;

use crate::error::{StoreError, StoreResult};

/// Passes successful responses through; anything else becomes
/// [`StoreError::Backend`] carrying the status and response body.
pub(crate) async fn expect_success(response: Response, operation: &'static str) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Backend {
        operation,
        status: status.as_u16(),
        body,
    })
}
