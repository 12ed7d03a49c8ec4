//! Direct-mode HTTP control plane (§4.3): fire-and-forget GETs against the
//! remote agent's own control endpoint, used instead of a bridge tunnel.

use tracing::debug;

use crate::error::{Error, Result};
use crate::params::ServerParams;

/// Response bodies are bounded; we only ever need to find `"success"`.
const MAX_BODY_BYTES: usize = 1024;
const SUCCESS_MARKER: &str = "success";

/// `GET {base_url}/startScrcpy/{positional params...}`.
pub fn start(base_url: &str, params: &ServerParams) -> Result<()> {
    let path = params.http_path_segments().join("/");
    let url = format!("{}/startScrcpy/{}", base_url.trim_end_matches('/'), path);
    get_expect_success(&url)
}

/// `GET {base_url}/stopScrcpy/`.
pub fn stop(base_url: &str) -> Result<()> {
    let url = format!("{}/stopScrcpy/", base_url.trim_end_matches('/'));
    get_expect_success(&url)
}

fn get_expect_success(url: &str) -> Result<()> {
    debug!(url, "direct-mode GET");
    let mut response = ureq::get(url)
        .call()
        .map_err(|_| Error::Network(std::io::Error::other("direct-mode request failed")))?;

    let mut body = response
        .body_mut()
        .read_to_string()
        .map_err(Error::Network)?;
    body.truncate(MAX_BODY_BYTES);

    if body.contains(SUCCESS_MARKER) {
        Ok(())
    } else {
        Err(Error::Network(std::io::Error::other(format!(
            "direct-mode response missing '{SUCCESS_MARKER}'"
        ))))
    }
}
