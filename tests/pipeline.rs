//! End-to-end: background coordinator and per-tab content scripts wired
//! through the in-process transport.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use usersite::background::{MemoryTabs, TabStatus};
use usersite::cache::{CacheFetcher, MemoryBlobStore, MemoryFetch};
use usersite::config::{Configuration, CssItem, JsItem};
use usersite::content::MemoryDocument;
use usersite::engine::{EngineApis, MemoryUserScripts};
use usersite::identifiers::script_engine_id;
use usersite::protocol::{Message, Sender};
use usersite::storage::{FileMap, MemoryStorage, StorageKeys, encode_data_url, save_file_map};
use usersite::transport::{LocalPort, TabRouter};
use usersite::{ConfigId, ContentScript, Coordinator, Engine, TabId};

// ============================================================================
// Harness
// ============================================================================

const STYLE: &str =
    r#"<style data-config="demo-id" data-css-file="style.css">body{color:red}</style>"#;

struct Browser {
    storage: Arc<MemoryStorage>,
    tabs: Arc<MemoryTabs>,
    router: Arc<TabRouter>,
    scripts: Arc<MemoryUserScripts>,
    coordinator: Arc<Coordinator>,
}

impl Browser {
    async fn start() -> Self {
        Self::start_with(Arc::new(MemoryStorage::new())).await
    }

    async fn start_with(storage: Arc<MemoryStorage>) -> Self {
        init_logging();
        let tabs = Arc::new(MemoryTabs::new());
        let router = Arc::new(TabRouter::new());
        let scripts = Arc::new(MemoryUserScripts::new());

        let coordinator = Coordinator::builder()
            .storage(storage.clone())
            .tabs(tabs.clone())
            .messenger(router.clone())
            .engine(Engine::probe(
                EngineApis::new().with_user_scripts(scripts.clone()),
            ))
            .cache(CacheFetcher::new(
                Arc::new(MemoryBlobStore::new()),
                Arc::new(MemoryFetch::new()),
            ))
            .build()
            .expect("build coordinator");
        coordinator.init().await;

        Self {
            storage,
            tabs,
            router,
            scripts,
            coordinator: Arc::new(coordinator),
        }
    }

    /// Opens a tab and starts its content script.
    fn open(&self, url: &str) -> (TabId, Arc<ContentScript<MemoryDocument>>) {
        let tab = self.tabs.open(url);
        let port = Arc::new(LocalPort::new(
            Arc::clone(&self.coordinator),
            Sender::tab(tab, url),
        ));
        let content = Arc::new(ContentScript::new(
            MemoryDocument::new(url),
            port,
            self.storage.clone(),
            StorageKeys::default(),
        ));
        tokio::spawn(Arc::clone(&content).serve(self.router.connect(tab)));
        (tab, content)
    }

    async fn save_demo(&self) {
        let mut files = FileMap::new();
        files.insert(
            "style.css".into(),
            encode_data_url("text/css", b"body{color:red}"),
        );
        files.insert(
            "main.js".into(),
            encode_data_url("text/javascript", b"console.log('demo')"),
        );
        save_file_map(self.storage.as_ref(), &StorageKeys::default(), &id(), &files)
            .await
            .expect("save files");

        self.coordinator
            .add_config(id(), demo())
            .await
            .expect("add config");
    }
}

/// Honors `RUST_LOG`; repeated calls are no-ops.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn id() -> ConfigId {
    ConfigId::new("demo-id")
}

fn demo() -> Configuration {
    Configuration::new("demo")
        .with_match("*://example.com/*")
        .with_css(CssItem::file("style.css"))
}

fn head(content: &ContentScript<MemoryDocument>) -> String {
    content.with_document(|doc| doc.head_html())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_navigation_injects_style_once() {
    let browser = Browser::start().await;
    browser.save_demo().await;

    let url = "https://example.com/page";
    let (tab, content) = browser.open(url);

    assert_eq!(content.init().await.expect("init"), 1);
    assert!(
        browser
            .coordinator
            .on_tab_updated(tab, TabStatus::Complete, Some(url))
            .await
            .expect("tab update")
    );

    let head = head(&content);
    assert_eq!(head.matches("<style").count(), 1);
    assert!(head.ends_with(STYLE));
}

#[tokio::test]
async fn test_non_matching_tab_untouched() {
    let browser = Browser::start().await;
    browser.save_demo().await;

    let url = "https://other.org/";
    let (tab, content) = browser.open(url);
    assert_eq!(content.init().await.expect("init"), 0);
    assert!(
        !browser
            .coordinator
            .on_tab_updated(tab, TabStatus::Complete, Some(url))
            .await
            .expect("tab update")
    );
    assert!(!head(&content).contains("<style"));
}

#[tokio::test]
async fn test_add_reaches_open_tabs() {
    let browser = Browser::start().await;
    let (_, content) = browser.open("https://example.com/page");

    browser.save_demo().await;

    assert!(head(&content).ends_with(STYLE));
}

#[tokio::test]
async fn test_js_registered_through_background() {
    let browser = Browser::start().await;
    let (_, content) = browser.open("https://example.com/page");

    browser.save_demo().await;
    browser
        .coordinator
        .add_config(id(), demo().with_js(JsItem::file("main.js")))
        .await
        .expect("update config");

    let scripts = browser.scripts.scripts();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].id, script_engine_id(&id(), "main.js"));
    assert_eq!(scripts[0].js[0].code, "console.log('demo')");
    assert_eq!(head(&content).matches("<style").count(), 1);
}

#[tokio::test]
async fn test_toggle_off_cleans_tabs() {
    let browser = Browser::start().await;
    let (tab, content) = browser.open("https://example.com/page");
    browser.save_demo().await;
    browser
        .coordinator
        .add_config(id(), demo().with_js(JsItem::file("main.js")))
        .await
        .expect("update config");
    assert_eq!(browser.scripts.ids().len(), 1);

    let response = browser
        .coordinator
        .handle(
            Message::ToggleConfig {
                config_id: id(),
                enabled: false,
            },
            &Sender::extension(),
        )
        .await;
    assert!(response.success);

    assert!(browser.scripts.ids().is_empty());
    assert!(!head(&content).contains("<style"));
    assert_eq!(content.injected_count(&id()), 0);
    assert!(
        browser
            .router
            .delivered_to(tab)
            .contains(&Message::Cleanup { config_id: id() })
    );

    // Disabled configurations are not injected on navigation.
    assert!(
        !browser
            .coordinator
            .on_tab_updated(tab, TabStatus::Complete, Some("https://example.com/page"))
            .await
            .expect("tab update")
    );
}

#[tokio::test]
async fn test_delete_cleans_tabs() {
    let browser = Browser::start().await;
    let (_, content) = browser.open("https://example.com/page");
    browser.save_demo().await;
    assert!(head(&content).contains("<style"));

    browser
        .coordinator
        .delete_config(&id())
        .await
        .expect("delete");

    assert!(!head(&content).contains("<style"));
    assert!(browser.coordinator.configs().await.is_empty());
}

#[tokio::test]
async fn test_restart_reload_restores_registrations() {
    let storage = Arc::new(MemoryStorage::new());
    {
        let browser = Browser::start_with(storage.clone()).await;
        browser.save_demo().await;
        browser
            .coordinator
            .add_config(id(), demo().with_js(JsItem::file("main.js")))
            .await
            .expect("update config");
    }

    let browser = Browser::start_with(storage).await;
    assert_eq!(browser.coordinator.configs().await.len(), 1);
    assert!(browser.scripts.ids().is_empty());

    let report = browser.coordinator.reload_configs().await.expect("reload");
    assert_eq!(report.registered, 1);
    assert_eq!(
        browser.scripts.ids(),
        vec![script_engine_id(&id(), "main.js")]
    );
}
