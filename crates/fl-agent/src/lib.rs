//! Navigation Agent: the payload injected into every rewritten document and
//! the host-side logic that turns its click reports into navigation intents.

pub mod bridge;
pub mod decision;
pub mod payload;

pub use bridge::ClickEvent;
pub use bridge::MESSAGE_TYPE;
pub use bridge::parse_bridge_message;
pub use decision::ClickDecision;
pub use decision::NavigationIntent;
pub use decision::TargetKind;
pub use decision::classify_target;
pub use decision::decide;
pub use payload::AgentPayload;
pub use payload::DocumentToken;
pub use payload::PAYLOAD_VERSION;
