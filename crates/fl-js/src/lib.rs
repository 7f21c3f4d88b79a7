//! Headless sandbox for the navigation agent payload.
//!
//! The payload runs inside a boa context against a scripted DOM shim; a
//! synthetic click is dispatched through the document's listeners and the
//! outcome (default prevented, messages posted) is read back.

use boa_engine::Context;
use boa_engine::Source;
use fl_agent::AgentPayload;
use fl_agent::ClickDecision;
use fl_agent::DocumentToken;
use fl_agent::decide;
use fl_agent::parse_bridge_message;
use fl_core::ProxyError;
use fl_core::ProxyResult;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use url::Url;

const SHIM: &str = include_str!("shim.js");

const DISPATCH: &str = r#"
(function () {
  var event = {
    type: "click",
    target: globalThis.__fl_click_target,
    defaultPrevented: false,
    preventDefault: function () { this.defaultPrevented = true; }
  };
  document.dispatchEvent(event);
  return JSON.stringify({
    defaultPrevented: event.defaultPrevented,
    messages: globalThis.__fl_messages
  });
})();
"#;

/// Execution limits for the sandbox context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
    pub loop_iteration_limit: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 64,
            stack_size_limit: 1024,
            loop_iteration_limit: 100_000,
        }
    }
}

/// A click on a link-like element inside the sandboxed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedClick {
    /// Tag of the link element, e.g. `a` or `area`.
    pub tag: String,
    pub href: Option<String>,
    pub target: Option<String>,
    /// `href` of the document's first `base` element.
    pub base: Option<String>,
    /// Click lands on a child of the link rather than the link itself.
    pub nested: bool,
    /// Whether the host exposes `window.ipc`.
    pub ipc: bool,
}

impl SimulatedClick {
    pub fn link(href: &str) -> Self {
        Self {
            tag: "a".to_owned(),
            href: Some(href.to_owned()),
            target: None,
            base: None,
            nested: false,
            ipc: false,
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_owned();
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_owned());
        self
    }

    pub fn with_base(mut self, base: &str) -> Self {
        self.base = Some(base.to_owned());
        self
    }

    pub fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    pub fn with_ipc(mut self) -> Self {
        self.ipc = true;
        self
    }

    fn shim_config(&self) -> Value {
        let mut attributes = Map::new();
        if let Some(href) = &self.href {
            attributes.insert("href".to_owned(), Value::String(href.clone()));
        }
        if let Some(target) = &self.target {
            attributes.insert("target".to_owned(), Value::String(target.clone()));
        }

        serde_json::json!({
            "tag": self.tag,
            "attributes": attributes,
            "base": self.base,
            "nested": self.nested,
            "ipc": self.ipc,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostChannel {
    Ipc,
    Top,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostedMessage {
    pub channel: PostChannel,
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxOutcome {
    pub default_prevented: bool,
    pub messages: Vec<PostedMessage>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentSandbox {
    config: SandboxConfig,
}

impl AgentSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Installs a fresh instance of `payload` and dispatches `click`.
    pub fn simulate_click(
        &self,
        payload: &AgentPayload,
        token: DocumentToken,
        click: &SimulatedClick,
    ) -> ProxyResult<SandboxOutcome> {
        self.run(&[payload.instantiate(token)], click)
    }

    fn run(&self, scripts: &[String], click: &SimulatedClick) -> ProxyResult<SandboxOutcome> {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_recursion_limit(self.config.recursion_limit);
        context
            .runtime_limits_mut()
            .set_stack_size_limit(self.config.stack_size_limit);
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(self.config.loop_iteration_limit);

        let prelude = format!("globalThis.__fl_config = {};", click.shim_config());
        eval(&mut context, "prelude", &prelude)?;
        eval(&mut context, "shim", SHIM)?;
        for script in scripts {
            eval(&mut context, "payload", script)?;
        }

        let value = context
            .eval(Source::from_bytes(DISPATCH.as_bytes()))
            .map_err(|error| script_failed("dispatch", &error.to_string()))?;
        let json = value
            .to_string(&mut context)
            .map_err(|error| script_failed("dispatch", &error.to_string()))?
            .to_std_string_escaped();

        serde_json::from_str(&json).map_err(|error| {
            ProxyError::protocol(
                "agent.sandbox_output_invalid",
                format!("sandbox returned unexpected output: {error}"),
            )
        })
    }
}

/// Checks that `payload` intercepts clicks the way the host expects.
///
/// Hash links and `_blank` links must be left alone; every other link click
/// must be prevented and reported once, with the document token, the raw
/// href and target, and the document's base reference.
pub fn verify_payload(payload: &AgentPayload) -> ProxyResult<()> {
    let sandbox = AgentSandbox::default();
    let token = DocumentToken::mint();
    let base = "https://upstream.example/dir/page1.htm";

    let hash = sandbox.simulate_click(payload, token, &SimulatedClick::link("#section2").with_base(base))?;
    ensure(!hash.default_prevented && hash.messages.is_empty(), "hash links must scroll natively")?;

    let blank = sandbox.simulate_click(
        payload,
        token,
        &SimulatedClick::link("page2.htm").with_target("_blank").with_base(base),
    )?;
    ensure(!blank.default_prevented && blank.messages.is_empty(), "`_blank` links must stay native")?;

    let cases = [
        SimulatedClick::link("sub/page2.htm").with_base(base),
        SimulatedClick::link("../other.htm")
            .with_target("content")
            .with_base(base)
            .nested()
            .with_ipc(),
        SimulatedClick::link("map.htm").with_tag("area").with_base(base),
    ];
    for click in &cases {
        let outcome = sandbox.simulate_click(payload, token, click)?;
        ensure(outcome.default_prevented, "link clicks must be prevented")?;
        ensure(outcome.messages.len() == 1, "each link click must be reported once")?;

        let Some(posted) = outcome.messages.first() else {
            continue;
        };
        let expected_channel = if click.ipc {
            PostChannel::Ipc
        } else {
            PostChannel::Top
        };
        ensure(posted.channel == expected_channel, "report posted on the wrong channel")?;

        let event = parse_bridge_message(&posted.data)?;
        ensure(event.token == token, "report carries the wrong document token")?;
        ensure(Some(&event.href) == click.href.as_ref(), "report must carry the raw href")?;
        ensure(
            event.target == click.target.clone().unwrap_or_default(),
            "report must carry the raw target",
        )?;
        ensure(event.base.as_deref() == Some(base), "report must carry the base reference")?;

        let fallback = Url::parse(base).map_err(|error| {
            ProxyError::resolution("resolve.base_invalid", error.to_string())
        })?;
        let decision = decide(&event, &fallback)?;
        ensure(
            matches!(decision, ClickDecision::Navigate(_)),
            "reported clicks must resolve to a navigation",
        )?;
    }

    debug!(version = payload.version(), "agent payload verified");
    Ok(())
}

fn eval(context: &mut Context, origin: &str, source: &str) -> ProxyResult<()> {
    context
        .eval(Source::from_bytes(source.as_bytes()))
        .map(|_| ())
        .map_err(|error| script_failed(origin, &error.to_string()))
}

fn script_failed(origin: &str, message: &str) -> ProxyError {
    ProxyError::protocol(
        "agent.script_failed",
        format!("{origin} script failed in sandbox: {message}"),
    )
}

fn ensure(condition: bool, message: &str) -> ProxyResult<()> {
    if condition {
        return Ok(());
    }

    Err(ProxyError::protocol(
        "agent.verification_failed",
        message.to_owned(),
    ))
}
