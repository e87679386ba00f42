use campus_core::{ApiEndpointConfig, Route};

/// Hand `route` to the web dashboard in the default browser.
#[cfg(feature = "browser")]
pub fn open_in_browser(config: &ApiEndpointConfig, route: &Route) -> anyhow::Result<String> {
    use anyhow::Context;

    let url = config.web_url_for(route.as_str());
    tracing::info!("Opening {}", url);
    webbrowser::open(&url).context("Failed to open dashboard in browser")?;
    Ok(url)
}

#[cfg(not(feature = "browser"))]
pub fn open_in_browser(config: &ApiEndpointConfig, route: &Route) -> anyhow::Result<String> {
    anyhow::bail!(
        "Built without browser support; open {} manually",
        config.web_url_for(route.as_str())
    )
}
