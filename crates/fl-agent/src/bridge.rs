//! Messages posted by the injected agent to the host.

use crate::payload::DocumentToken;
use crate::payload::PAYLOAD_VERSION;
use fl_core::ProxyError;
use fl_core::ProxyResult;
use serde::Deserialize;
use serde::Serialize;

pub const MESSAGE_TYPE: &str = "framelift-navigate";

/// A click the agent intercepted, exactly as reported from inside the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub token: DocumentToken,
    /// Raw, unresolved `href` attribute.
    pub href: String,
    /// Raw `target` attribute; empty when absent.
    #[serde(default)]
    pub target: String,
    /// The document's base reference, if it carries one.
    #[serde(default)]
    pub base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    version: u32,
    #[serde(flatten)]
    click: ClickEvent,
}

pub fn parse_bridge_message(raw: &str) -> ProxyResult<ClickEvent> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(|error| {
        ProxyError::protocol(
            "bridge.malformed",
            format!("bridge message is not a navigation report: {error}"),
        )
    })?;

    if envelope.kind != MESSAGE_TYPE {
        return Err(ProxyError::protocol(
            "bridge.unknown_type",
            format!("unexpected bridge message type `{}`", envelope.kind),
        ));
    }

    if envelope.version != PAYLOAD_VERSION {
        return Err(ProxyError::protocol(
            "bridge.version_mismatch",
            format!(
                "agent payload version {} does not match host version {PAYLOAD_VERSION}",
                envelope.version
            ),
        ));
    }

    Ok(envelope.click)
}

#[cfg(test)]
mod tests {
    use super::parse_bridge_message;
    use crate::payload::DocumentToken;
    use fl_core::ErrorKind;

    #[test]
    fn parses_a_well_formed_report() {
        let parsed = parse_bridge_message(
            r#"{"type":"framelift-navigate","version":1,"token":7,"href":"../other.htm","target":"content","base":"https://upstream.example/page.htm"}"#,
        );
        assert!(parsed.is_ok());
        let parsed = match parsed {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(parsed.token, DocumentToken::from_raw(7));
        assert_eq!(parsed.href, "../other.htm");
        assert_eq!(parsed.target, "content");
        assert_eq!(parsed.base.as_deref(), Some("https://upstream.example/page.htm"));
    }

    #[test]
    fn target_and_base_are_optional() {
        let parsed = parse_bridge_message(
            r#"{"type":"framelift-navigate","version":1,"token":3,"href":"a.htm","base":null}"#,
        );
        assert!(matches!(parsed, Ok(ref click) if click.target.is_empty() && click.base.is_none()));
    }

    #[test]
    fn rejects_foreign_and_stale_messages() {
        for raw in [
            "not json",
            r#"{"type":"resize","version":1,"token":1,"href":"a.htm"}"#,
            r#"{"type":"framelift-navigate","version":0,"token":1,"href":"a.htm"}"#,
            r#"{"type":"framelift-navigate","version":1,"href":"a.htm"}"#,
        ] {
            let parsed = parse_bridge_message(raw);
            assert!(
                matches!(parsed, Err(ref error) if error.kind == ErrorKind::Protocol),
                "{raw}"
            );
        }
    }
}
