use serde::Deserialize;
use serde::Serialize;

/// What the host hands the viewer when it navigates to it.
///
/// `url` is optional because the host route may be entered without one; a
/// request without a URL is a defined no-op rather than an error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: String,
}

impl ResourceRequest {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            title: title.into(),
        }
    }

    pub fn empty(title: impl Into<String>) -> Self {
        Self {
            url: None,
            title: title.into(),
        }
    }

    /// The URL to load, if the request carries a non-blank one.
    pub fn target(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
