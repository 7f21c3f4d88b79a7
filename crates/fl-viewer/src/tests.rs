use crate::ClickOutcome;
use crate::FrameStep;
use crate::HostContainer;
use crate::SlotAddress;
use crate::Viewer;
use fl_agent::ClickEvent;
use fl_agent::DocumentToken;
use fl_core::ProxyConfig;
use fl_core::ProxyError;
use fl_core::ProxyResult;
use fl_core::ResourceRequest;
use fl_net::DocumentFetcher;
use fl_net::FetchedDocument;
use fl_net::StaticFetcher;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum ContainerEvent {
    Loading(SlotAddress, String),
    Displayed(SlotAddress, String),
    Failed(SlotAddress, &'static str),
}

#[derive(Debug, Default)]
struct RecordingContainer {
    events: Vec<ContainerEvent>,
}

impl RecordingContainer {
    fn displayed(&self) -> Vec<(SlotAddress, String)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ContainerEvent::Displayed(address, href) => Some((address.clone(), href.clone())),
                _ => None,
            })
            .collect()
    }

    fn failures(&self) -> Vec<(SlotAddress, &'static str)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ContainerEvent::Failed(address, code) => Some((address.clone(), *code)),
                _ => None,
            })
            .collect()
    }

    fn loading_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, ContainerEvent::Loading(..)))
            .count()
    }
}

impl HostContainer for RecordingContainer {
    fn display(&mut self, address: &SlotAddress, href: &str) {
        self.events
            .push(ContainerEvent::Displayed(address.clone(), href.to_owned()));
    }

    fn load_failed(&mut self, address: &SlotAddress, error: &ProxyError) {
        self.events
            .push(ContainerEvent::Failed(address.clone(), error.code));
    }

    fn loading(&mut self, address: &SlotAddress, url: &Url) {
        self.events
            .push(ContainerEvent::Loading(address.clone(), url.to_string()));
    }
}

fn config() -> ProxyConfig {
    ProxyConfig {
        upstream_host: "upstream.example".to_owned(),
        verify_agent_payload: false,
        ..ProxyConfig::default()
    }
}

fn open(fetcher: &Arc<StaticFetcher>, url: &str) -> Viewer<RecordingContainer> {
    let viewer = Viewer::open(
        config(),
        ResourceRequest::new(url, "test"),
        fetcher.clone(),
        RecordingContainer::default(),
    );
    assert!(viewer.is_ok());
    let mut viewer = match viewer {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    };
    assert!(viewer.wait(WAIT));
    viewer
}

fn token_of(viewer: &Viewer<RecordingContainer>, address: &SlotAddress) -> DocumentToken {
    let tree = viewer.tree();
    let mut slot = tree.root();
    for step in address.steps() {
        let FrameStep::Named(name) = step else {
            panic!("tests address frames by name");
        };
        let Some(next) = tree.find_named_frame(slot, name) else {
            panic!("no frame `{name}` under {address}");
        };
        slot = next;
    }
    match tree.token(slot) {
        Some(token) => token,
        None => panic!("slot at {address} shows no proxied document"),
    }
}

fn url(input: &str) -> Url {
    match Url::parse(input) {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    }
}

fn click(token: DocumentToken, href: &str, target: &str, base: &str) -> ClickEvent {
    ClickEvent {
        token,
        href: href.to_owned(),
        target: target.to_owned(),
        base: Some(base.to_owned()),
    }
}

fn content_address() -> SlotAddress {
    SlotAddress::from_steps(vec![FrameStep::Named("content".to_owned())])
}

fn frameset_site() -> Arc<StaticFetcher> {
    Arc::new(
        StaticFetcher::new()
            .with_page(
                "https://upstream.example/page.htm",
                "<!DOCTYPE html><html><frameset cols=\"20%,*\"><frame name=menu src=menu.htm><frame name=content src=frame1.htm></frameset><noframes><a href=\"../other.htm\" target=\"content\">other</a></noframes></html>",
            )
            .with_page(
                "https://upstream.example/menu.htm",
                "<html><body><a href=\"frame1.htm\" target=\"content\">one</a></body></html>",
            )
            .with_page(
                "https://upstream.example/frame1.htm",
                "<html><body><h1 id=section2>one</h1></body></html>",
            )
            .with_page(
                "https://upstream.example/other.htm",
                "<html><body><p>other</p></body></html>",
            ),
    )
}

#[test]
fn named_target_click_replaces_only_that_frame() {
    let fetcher = frameset_site();
    let mut viewer = open(&fetcher, "https://upstream.example/page.htm");
    let root = viewer.tree().root();
    let root_href = viewer.tree().href(root).map(str::to_owned);
    assert!(root_href.is_some());

    let Some(content) = viewer.tree().find_named_frame(root, "content") else {
        panic!("content frame missing");
    };
    let old_content_href = viewer.tree().href(content).map(str::to_owned);

    let outcome = viewer.handle_click(click(
        token_of(&viewer, &SlotAddress::root()),
        "../other.htm",
        "content",
        "https://upstream.example/page.htm",
    ));
    assert_eq!(outcome, ClickOutcome::Dispatched { slot: content });
    assert!(viewer.wait(WAIT));

    assert_eq!(fetcher.request_count("https://upstream.example/other.htm"), 1);
    assert_eq!(viewer.tree().href(root).map(str::to_owned), root_href);
    assert_eq!(
        viewer.tree().source_url(content).map(Url::as_str),
        Some("https://upstream.example/other.htm")
    );

    let displayed = viewer.container().displayed();
    let Some((address, href)) = displayed.last() else {
        panic!("nothing displayed");
    };
    assert_eq!(address, &content_address());
    assert_eq!(Some(href.as_str()), viewer.tree().href(content));

    let publisher = viewer.publisher();
    assert!(root_href.as_deref().is_some_and(|href| publisher.is_live(href)));
    assert!(old_content_href.as_deref().is_some_and(|href| !publisher.is_live(href)));
}

#[test]
fn untargeted_click_replaces_the_current_document() {
    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_page(
                "https://upstream.example/dir/page1.htm",
                "<html><head></head><body><a href=\"sub/page2.htm\">next</a></body></html>",
            )
            .with_page(
                "https://upstream.example/dir/sub/page2.htm",
                "<html><body>page two</body></html>",
            ),
    );
    let mut viewer = open(&fetcher, "https://upstream.example/dir/page1.htm");
    let root = viewer.tree().root();
    let first_href = viewer.tree().href(root).map(str::to_owned);

    let outcome = viewer.handle_click(click(
        token_of(&viewer, &SlotAddress::root()),
        "sub/page2.htm",
        "",
        "https://upstream.example/dir/page1.htm",
    ));
    assert_eq!(outcome, ClickOutcome::Dispatched { slot: root });
    assert!(viewer.wait(WAIT));

    assert_eq!(
        viewer.tree().source_url(root).map(Url::as_str),
        Some("https://upstream.example/dir/sub/page2.htm")
    );
    assert_ne!(viewer.tree().href(root).map(str::to_owned), first_href);

    let stats = viewer.publisher().stats();
    assert_eq!(stats.published, 2);
    assert_eq!(stats.released, 1);
    assert_eq!(stats.live, 1);
}

#[test]
fn hash_click_never_fetches() {
    let fetcher = frameset_site();
    let mut viewer = open(&fetcher, "https://upstream.example/page.htm");
    let requests_before = fetcher.requests().len();

    let outcome = viewer.handle_click(click(
        token_of(&viewer, &content_address()),
        "#section2",
        "",
        "https://upstream.example/frame1.htm",
    ));
    assert_eq!(outcome, ClickOutcome::NativeScroll);
    assert!(viewer.is_idle());
    assert_eq!(fetcher.requests().len(), requests_before);
}

#[test]
fn blank_target_is_left_native() {
    let fetcher = frameset_site();
    let mut viewer = open(&fetcher, "https://upstream.example/page.htm");
    let requests_before = fetcher.requests().len();

    let outcome = viewer.handle_click(click(
        token_of(&viewer, &SlotAddress::root()),
        "other.htm",
        "_blank",
        "https://upstream.example/page.htm",
    ));
    assert_eq!(outcome, ClickOutcome::NotIntercepted);
    assert_eq!(fetcher.requests().len(), requests_before);
}

#[test]
fn sibling_frame_click_targets_the_named_sibling() {
    let fetcher = frameset_site();
    let mut viewer = open(&fetcher, "https://upstream.example/page.htm");
    let root = viewer.tree().root();
    let content = viewer.tree().find_named_frame(root, "content");

    let outcome = viewer.handle_click(click(
        token_of(&viewer, &SlotAddress::from_steps(vec![FrameStep::Named("menu".to_owned())])),
        "other.htm",
        "content",
        "https://upstream.example/menu.htm",
    ));
    assert_eq!(content.map(|slot| ClickOutcome::Dispatched { slot }), Some(outcome));
    assert!(viewer.wait(WAIT));
    assert_eq!(
        viewer.container().displayed().last().map(|(address, _)| address.clone()),
        Some(content_address())
    );
}

#[test]
fn unknown_frame_name_falls_back_to_self() {
    let fetcher = frameset_site();
    let mut viewer = open(&fetcher, "https://upstream.example/page.htm");
    let menu_address = SlotAddress::from_steps(vec![FrameStep::Named("menu".to_owned())]);
    let root = viewer.tree().root();
    let menu = viewer.tree().find_named_frame(root, "menu");

    let outcome = viewer.handle_click(click(
        token_of(&viewer, &menu_address),
        "other.htm",
        "nowhere",
        "https://upstream.example/menu.htm",
    ));
    assert_eq!(menu.map(|slot| ClickOutcome::Dispatched { slot }), Some(outcome));
    assert!(viewer.wait(WAIT));
    assert_eq!(
        viewer.container().displayed().last().map(|(address, _)| address.clone()),
        Some(menu_address)
    );
}

#[test]
fn repeated_navigation_does_not_leak_handles() {
    let fetcher = frameset_site();
    let mut viewer = open(&fetcher, "https://upstream.example/page.htm");
    assert_eq!(viewer.publisher().stats().live, 3);

    for _ in 0..4 {
        let outcome = viewer.handle_click(click(
            token_of(&viewer, &SlotAddress::from_steps(vec![FrameStep::Named("menu".to_owned())])),
            "frame1.htm",
            "content",
            "https://upstream.example/menu.htm",
        ));
        assert!(matches!(outcome, ClickOutcome::Dispatched { .. }));
        assert!(viewer.wait(WAIT));
    }

    let stats = viewer.publisher().stats();
    assert_eq!(stats.live, 3);
    assert_eq!(stats.published, 7);
    assert_eq!(stats.released, 4);
}

#[test]
fn failed_frames_stay_unproxied_and_the_page_still_renders() {
    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_page(
                "https://upstream.example/index.htm",
                "<frameset><frame name=ok src=ok.htm><frame name=bad src=missing.htm></frameset>",
            )
            .with_page("https://upstream.example/ok.htm", "<p>ok</p>"),
    );
    let viewer = open(&fetcher, "https://upstream.example/index.htm");
    let root = viewer.tree().root();

    let Some(markup) = viewer
        .tree()
        .href(root)
        .and_then(|href| viewer.publisher().open(href))
    else {
        panic!("root not published");
    };
    assert!(markup.contains("src=\"missing.htm\""));
    assert!(markup.contains("src=\"framelift://content/"));
    assert!(viewer.container().failures().is_empty());
    assert_eq!(viewer.tree().children(root).len(), 2);
}

#[test]
fn failed_click_load_keeps_current_content() {
    let fetcher = frameset_site();
    let mut viewer = open(&fetcher, "https://upstream.example/page.htm");
    let root = viewer.tree().root();
    let root_href = viewer.tree().href(root).map(str::to_owned);

    let outcome = viewer.handle_click(click(
        token_of(&viewer, &SlotAddress::root()),
        "missing.htm",
        "",
        "https://upstream.example/page.htm",
    ));
    assert_eq!(outcome, ClickOutcome::Dispatched { slot: root });
    assert!(viewer.wait(WAIT));

    assert_eq!(viewer.tree().href(root).map(str::to_owned), root_href);
    assert_eq!(
        viewer.container().failures(),
        vec![(SlotAddress::root(), "fetch.status")]
    );
    assert!(root_href.as_deref().is_some_and(|href| viewer.publisher().is_live(href)));
}

#[test]
fn initial_load_failure_reaches_the_container() {
    let fetcher = Arc::new(StaticFetcher::new().with_status("https://upstream.example/down.htm", 503));
    let viewer = open(&fetcher, "https://upstream.example/down.htm");

    assert_eq!(
        viewer.container().failures(),
        vec![(SlotAddress::root(), "fetch.status")]
    );
    assert_eq!(viewer.publisher().stats().live, 0);
}

struct PanickingFetcher;

impl DocumentFetcher for PanickingFetcher {
    fn fetch(&self, url: &Url) -> ProxyResult<FetchedDocument> {
        panic!("fetcher blew up on {url}");
    }
}

#[test]
fn panicking_load_reports_failure_and_goes_idle() {
    let viewer = Viewer::open(
        config(),
        ResourceRequest::new("https://upstream.example/boom.htm", "boom"),
        Arc::new(PanickingFetcher),
        RecordingContainer::default(),
    );
    assert!(viewer.is_ok());
    let mut viewer = match viewer {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    };

    assert!(viewer.wait(WAIT));
    assert!(viewer.is_idle());
    assert_eq!(
        viewer.container().failures(),
        vec![(SlotAddress::root(), "viewer.worker_panicked")]
    );
    assert_eq!(viewer.publisher().stats().live, 0);
}

#[test]
fn request_without_url_does_nothing() {
    let fetcher = Arc::new(StaticFetcher::new());
    let viewer = Viewer::open(
        config(),
        ResourceRequest::empty("nothing"),
        fetcher.clone(),
        RecordingContainer::default(),
    );
    assert!(viewer.is_ok());
    let viewer = match viewer {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    };

    assert!(viewer.is_idle());
    assert!(viewer.container().events.is_empty());
    assert!(fetcher.requests().is_empty());
}

#[test]
fn relative_request_url_is_reported_not_fatal() {
    let fetcher = Arc::new(StaticFetcher::new());
    let viewer = open(&fetcher, "page.htm");
    assert_eq!(
        viewer.container().failures(),
        vec![(SlotAddress::root(), "resolve.request_invalid")]
    );
}

#[test]
fn clicks_from_superseded_documents_are_dropped() {
    let fetcher = frameset_site();
    let mut viewer = open(&fetcher, "https://upstream.example/page.htm");
    let old_content_token = token_of(&viewer, &content_address());

    let outcome = viewer.handle_click(click(
        old_content_token,
        "other.htm",
        "",
        "https://upstream.example/frame1.htm",
    ));
    assert!(matches!(outcome, ClickOutcome::Dispatched { .. }));
    assert!(viewer.wait(WAIT));

    let requests_before = fetcher.requests().len();
    let outcome = viewer.handle_click(click(
        old_content_token,
        "frame1.htm",
        "",
        "https://upstream.example/frame1.htm",
    ));
    assert_eq!(outcome, ClickOutcome::Dropped);
    assert_eq!(fetcher.requests().len(), requests_before);
}

#[test]
fn newer_load_supersedes_slower_one() {
    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_page("https://upstream.example/slow.htm", "<p>slow</p>")
            .with_delay("https://upstream.example/slow.htm", Duration::from_millis(300))
            .with_page("https://upstream.example/fast.htm", "<p>fast</p>"),
    );
    let viewer = Viewer::open(
        config(),
        ResourceRequest::new("https://upstream.example/slow.htm", "slow"),
        fetcher.clone(),
        RecordingContainer::default(),
    );
    let mut viewer = match viewer {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    };

    let root = viewer.tree().root();
    viewer.navigate(root, url("https://upstream.example/fast.htm"));
    assert!(viewer.wait(WAIT));

    thread::sleep(Duration::from_millis(500));
    viewer.poll();

    assert_eq!(viewer.container().displayed().len(), 1);
    assert_eq!(
        viewer.tree().source_url(root).map(Url::as_str),
        Some("https://upstream.example/fast.htm")
    );
    assert_eq!(viewer.container().loading_count(), 2);
    assert_eq!(viewer.publisher().stats().live, 1);
}

#[test]
fn closing_mid_load_publishes_nothing() {
    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_page("https://upstream.example/slow.htm", "<p>slow</p>")
            .with_delay("https://upstream.example/slow.htm", Duration::from_millis(200)),
    );
    let viewer = Viewer::open(
        config(),
        ResourceRequest::new("https://upstream.example/slow.htm", "slow"),
        fetcher.clone(),
        RecordingContainer::default(),
    );
    let mut viewer = match viewer {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    };
    let publisher = viewer.publisher().clone();

    viewer.close();
    assert!(viewer.is_closed());
    thread::sleep(Duration::from_millis(400));
    assert_eq!(viewer.poll(), 0);

    assert!(viewer.container().displayed().is_empty());
    assert_eq!(publisher.stats().live, 0);
}

#[test]
fn dropping_the_viewer_releases_every_handle() {
    let fetcher = frameset_site();
    let viewer = open(&fetcher, "https://upstream.example/page.htm");
    let publisher = viewer.publisher().clone();
    assert_eq!(publisher.stats().live, 3);

    drop(viewer);
    let stats = publisher.stats();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.released, 3);
}

#[test]
fn bridge_messages_are_parsed_before_dispatch() {
    let fetcher = frameset_site();
    let mut viewer = open(&fetcher, "https://upstream.example/page.htm");
    let token = token_of(&viewer, &content_address());

    assert_eq!(viewer.handle_bridge_message("not json"), ClickOutcome::Dropped);

    let message = format!(
        "{{\"type\":\"framelift-navigate\",\"version\":1,\"token\":{},\"href\":\"#top\",\"target\":\"\",\"base\":\"https://upstream.example/frame1.htm\"}}",
        token.as_u64()
    );
    assert_eq!(viewer.handle_bridge_message(&message), ClickOutcome::NativeScroll);
}

#[test]
fn open_rejects_invalid_configuration() {
    let viewer = Viewer::open(
        ProxyConfig {
            max_frame_depth: 0,
            ..config()
        },
        ResourceRequest::new("https://upstream.example/page.htm", "x"),
        Arc::new(StaticFetcher::new()),
        RecordingContainer::default(),
    );
    assert!(viewer.is_err());
    if let Err(error) = viewer {
        assert_eq!(error.code, "config.frame_depth_zero");
    }
}

#[test]
fn open_verifies_the_agent_payload() {
    let fetcher = Arc::new(StaticFetcher::new().with_page("https://upstream.example/", "<p>x</p>"));
    let viewer = Viewer::open(
        ProxyConfig {
            verify_agent_payload: true,
            ..config()
        },
        ResourceRequest::new("https://upstream.example/", "x"),
        fetcher,
        RecordingContainer::default(),
    );
    assert!(viewer.is_ok());
}
