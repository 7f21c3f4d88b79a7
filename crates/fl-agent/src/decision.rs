//! Click resolution: what an intercepted click should do.

use crate::bridge::ClickEvent;
use fl_core::ProxyError;
use fl_core::ProxyResult;
use url::Url;

/// How a link's `target` attribute is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// Absent, empty, `_self`, or an escape sentinel the rewriter already neutralized.
    SelfFrame,
    /// `_blank`: left to the host's native handling.
    Blank,
    /// Any other name; looked up among sibling frames.
    Named(String),
}

pub fn classify_target(raw: &str) -> TargetKind {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("_self")
        || trimmed.eq_ignore_ascii_case("_top")
        || trimmed.eq_ignore_ascii_case("_parent")
    {
        return TargetKind::SelfFrame;
    }

    if trimmed.eq_ignore_ascii_case("_blank") {
        return TargetKind::Blank;
    }

    TargetKind::Named(trimmed.to_owned())
}

/// Where a click should load, derived transiently and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationIntent {
    pub resolved_url: Url,
    pub target_frame_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickDecision {
    /// Same-page hash reference; the browser scrolls natively.
    NativeScroll,
    /// Not intercepted (empty href or `_blank`).
    NotIntercepted,
    Navigate(NavigationIntent),
}

/// Resolves a reported click against the document's own base reference.
///
/// `fallback_base` is the source URL of the document that reported the
/// click; it is used when the report carries no base (or a relative one).
pub fn decide(event: &ClickEvent, fallback_base: &Url) -> ProxyResult<ClickDecision> {
    let href = event.href.trim();
    if href.is_empty() {
        return Ok(ClickDecision::NotIntercepted);
    }
    if href.starts_with('#') {
        return Ok(ClickDecision::NativeScroll);
    }

    let target_frame_name = match classify_target(&event.target) {
        TargetKind::Blank => return Ok(ClickDecision::NotIntercepted),
        TargetKind::SelfFrame => None,
        TargetKind::Named(name) => Some(name),
    };

    let base = match event.base.as_deref().map(str::trim) {
        Some(base) if !base.is_empty() => fallback_base.join(base).map_err(|error| {
            ProxyError::resolution(
                "resolve.base_invalid",
                format!("document base `{base}` cannot be resolved: {error}"),
            )
        })?,
        _ => fallback_base.clone(),
    };

    let resolved_url = base.join(href).map_err(|error| {
        ProxyError::resolution(
            "resolve.join_failed",
            format!("cannot resolve `{href}` against `{base}`: {error}"),
        )
    })?;

    if !matches!(resolved_url.scheme(), "http" | "https") {
        return Err(ProxyError::resolution(
            "resolve.scheme_unsupported",
            format!("`{resolved_url}` is not an http(s) document"),
        ));
    }

    Ok(ClickDecision::Navigate(NavigationIntent {
        resolved_url,
        target_frame_name,
    }))
}
