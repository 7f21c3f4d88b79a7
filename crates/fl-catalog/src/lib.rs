//! Host-side collaborators: the resource catalog and the calendar lookup.

pub mod calendar;

pub use calendar::parse_date;
pub use calendar::tamil_month;
pub use calendar::CalendarEntry;
pub use calendar::CalendarLinks;
pub use calendar::CalendarLookup;
pub use calendar::TAMIL_MONTHS;

use fl_core::ProxyError;
use fl_core::ProxyResult;
use fl_core::ResourceRequest;
use serde::Deserialize;
use serde::Serialize;

/// Origin of the site the built-in catalog points at.
pub const SITE_ORIGIN: &str = "https://www.bibleintamil.com";

/// One entry of the resource catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    pub title: String,
    /// Absolute URL, or a host route such as `/calendar`.
    pub url: String,
    /// Handled inside the host rather than opened as an external link.
    pub is_internal: bool,
    #[serde(default)]
    pub is_highlighted: bool,
}

/// What selecting a catalog entry does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogAction {
    /// Open the viewer on this request.
    OpenViewer(ResourceRequest),
    /// Switch to a route of the host shell.
    HostRoute(String),
    /// Hand the URL to the platform; not proxied.
    External(String),
}

impl ResourceEntry {
    pub fn new(title: &str, url: &str, is_internal: bool) -> Self {
        Self {
            title: title.to_owned(),
            url: url.to_owned(),
            is_internal,
            is_highlighted: false,
        }
    }

    pub fn highlighted(mut self) -> Self {
        self.is_highlighted = true;
        self
    }

    pub fn action(&self) -> CatalogAction {
        if !self.is_internal {
            return CatalogAction::External(self.url.clone());
        }

        if self.url.starts_with("http") {
            CatalogAction::OpenViewer(ResourceRequest::new(self.url.as_str(), self.title.as_str()))
        } else {
            CatalogAction::HostRoute(self.url.clone())
        }
    }
}

/// Ordered list of resources shown by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceCatalog {
    entries: Vec<ResourceEntry>,
}

impl ResourceCatalog {
    pub fn new(entries: Vec<ResourceEntry>) -> Self {
        Self { entries }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            ResourceEntry::new("இன்றைய சிந்தனை & புனிதர்கள்", "/calendar", true).highlighted(),
            ResourceEntry::new(
                "வாசக நூல்கள்",
                &format!("{SITE_ORIGIN}/u_fs-lectionary.htm"),
                true,
            )
            .highlighted(),
            ResourceEntry::new(
                "இறை அலைகள்",
                &format!("{SITE_ORIGIN}/iraialai/starting-songtext.htm"),
                true,
            )
            .highlighted(),
            ResourceEntry::new(
                "முத்துச்சரம்",
                &format!("{SITE_ORIGIN}/songstext/starting-songtext.htm"),
                true,
            )
            .highlighted(),
            ResourceEntry::new(
                "திருப்பலி இராகங்கள்",
                &format!("{SITE_ORIGIN}/u_fs-mass-raga.htm"),
                true,
            )
            .highlighted(),
        ])
    }

    /// Parses a JSON array of entries.
    pub fn from_json(json: &str) -> ProxyResult<Self> {
        let entries = serde_json::from_str(json).map_err(|error| {
            ProxyError::config(
                "catalog.invalid",
                format!("failed to parse resource catalog: {error}"),
            )
        })?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[ResourceEntry] {
        &self.entries
    }

    pub fn find(&self, title: &str) -> Option<&ResourceEntry> {
        self.entries.iter().find(|entry| entry.title == title)
    }
}
