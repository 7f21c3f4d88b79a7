use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Bumped whenever the bridge message shape changes.
pub const PAYLOAD_VERSION: u32 = 1;

const TEMPLATE: &str = include_str!("agent.js");
const TOKEN_PLACEHOLDER: &str = "__FRAMELIFT_TOKEN__";
const VERSION_PLACEHOLDER: &str = "__FRAMELIFT_VERSION__";

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identifies one rewritten document instance. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentToken(u64);

impl DocumentToken {
    pub fn mint() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

/// Static agent script, instantiated fresh for every rewritten document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentPayload {
    template: &'static str,
    version: u32,
}

impl Default for AgentPayload {
    fn default() -> Self {
        Self::standard()
    }
}

impl AgentPayload {
    pub fn standard() -> Self {
        Self {
            template: TEMPLATE,
            version: PAYLOAD_VERSION,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn instantiate(&self, token: DocumentToken) -> String {
        self.template
            .replace(TOKEN_PLACEHOLDER, &token.as_u64().to_string())
            .replace(VERSION_PLACEHOLDER, &self.version.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::AgentPayload;
    use super::DocumentToken;

    #[test]
    fn instantiation_fills_every_placeholder() {
        let script = AgentPayload::standard().instantiate(DocumentToken::from_raw(42));
        assert!(!script.contains("__FRAMELIFT_"));
        assert!(script.contains("var TOKEN = 42;"));
        assert!(script.contains("var VERSION = 1;"));
    }

    #[test]
    fn payload_is_safe_inside_a_script_element() {
        let script = AgentPayload::standard()
            .instantiate(DocumentToken::mint())
            .to_ascii_lowercase();
        assert!(!script.contains("</script"));
        assert!(!script.contains("<!--"));
    }

    #[test]
    fn minted_tokens_are_unique() {
        let first = DocumentToken::mint();
        let second = DocumentToken::mint();
        assert_ne!(first, second);
        assert!(second > first);
    }
}
