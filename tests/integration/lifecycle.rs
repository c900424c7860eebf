//! End-to-end job lifecycle against the fake brokerage page.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use order_runner::config::{AppConfig, Credentials};
use order_runner::engine::agent::Agent;
use order_runner::engine::auth::Authenticator;
use order_runner::engine::watcher::JobWatcher;
use order_runner::storage;
use order_runner::types::{AgentError, JobOutcome, Side};

use crate::fake_page::{FakePage, PlacedOrder, BASE_URL};

const USER: &str = "trader";
const PASS: &str = "hunter2";

struct Workspace {
    _root: TempDir,
    cfg: AppConfig,
}

impl Workspace {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.agent.drain_interval_ms = 10;
        cfg.paths.watch_dir = root.path().join("new");
        cfg.paths.done_dir = root.path().join("done");
        cfg.paths.error_dir = root.path().join("error");
        cfg.paths.session_file = root.path().join("cookies.json");
        cfg.watcher.stability_threshold_ms = 50;
        cfg.watcher.poll_interval_ms = 10;
        cfg.site.base_url = BASE_URL.to_string();
        cfg.timeouts.selector_ms = 10;
        cfg.timeouts.type_delay_ms = 0;
        cfg.timeouts.settle_ms = 0;
        cfg.timeouts.submit_settle_ms = 0;
        cfg.timeouts.service_login_ms = 10;
        cfg.paths.ensure_dirs().unwrap();
        Self { _root: root, cfg }
    }

    fn drop_job(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.cfg.paths.watch_dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn agent(&self, page: FakePage) -> Agent<FakePage> {
        Agent::new(page, &Credentials::new(USER, PASS), &self.cfg)
    }

    fn done(&self) -> Vec<String> {
        list(&self.cfg.paths.done_dir)
    }

    fn errors(&self) -> Vec<String> {
        list(&self.cfg.paths.error_dir)
    }
}

fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn placed(symbol: &str, side: Side, shares: &str) -> PlacedOrder {
    PlacedOrder {
        symbol: symbol.to_string(),
        side,
        shares: shares.to_string(),
    }
}

#[tokio::test]
async fn buy_job_lands_in_done() {
    let ws = Workspace::new();
    let page = FakePage::new(USER, PASS).authenticated().with_tabs(&["ABC"]);
    let mut agent = ws.agent(page.clone());

    let job = ws.drop_job("order1.json", r#"{ "symbol": "ABC", "quantity": 5 }"#);
    agent.enqueue(job.clone());
    let outcome = agent.tick().await.unwrap();

    assert!(outcome.is_done());
    assert!(!job.exists());
    let done = ws.done();
    assert_eq!(done.len(), 1);
    assert!(done[0].starts_with("done-") && done[0].ends_with("-order1.json"));
    assert!(ws.errors().is_empty());
    assert_eq!(page.orders(), vec![placed("ABC", Side::Buy, "5")]);
}

#[tokio::test]
async fn sell_without_sell_control_lands_in_error() {
    let ws = Workspace::new();
    let page = FakePage::new(USER, PASS).authenticated();
    let mut agent = ws.agent(page.clone());

    let job = ws.drop_job("order2.json", r#"{ "symbol": "XYZ", "quantity": -3 }"#);
    agent.enqueue(job.clone());
    let outcome = agent.tick().await.unwrap();

    let JobOutcome::Failed { message, .. } = outcome else {
        panic!("sell without a sell tab must fail");
    };
    assert!(!job.exists());
    assert!(ws.done().is_empty());

    let errors = ws.errors();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|n| n.starts_with("error-message-") && n.ends_with("-order2.json")));
    assert!(errors.iter().any(|n| !n.starts_with("error-message-") && n.ends_with("-order2.json")));
    let text = std::fs::read_to_string(message.unwrap()).unwrap();
    assert!(text.contains("Cannot sell 'XYZ'!"));

    // Never falls back to a buy
    assert!(page.orders().is_empty());
}

#[tokio::test]
async fn sell_with_sell_control_selects_the_tab() {
    let ws = Workspace::new();
    let page = FakePage::new(USER, PASS).authenticated().with_tabs(&["XYZ"]);
    let mut agent = ws.agent(page.clone());

    agent.enqueue(ws.drop_job("sell.json", r#"{ "symbol": "xyz", "quantity": -3 }"#));
    assert!(agent.tick().await.unwrap().is_done());
    assert_eq!(page.orders(), vec![placed("XYZ", Side::Sell, "3")]);
}

#[tokio::test]
async fn malformed_job_does_not_block_the_queue() {
    let ws = Workspace::new();
    let page = FakePage::new(USER, PASS).authenticated();
    let mut agent = ws.agent(page.clone());

    let bad = ws.drop_job("bad.json", "{ \"symbol\": ");
    let good = ws.drop_job("good.json", r#"{ "symbol": "ABC", "quantity": 1 }"#);
    agent.enqueue(bad.clone());
    agent.enqueue(good.clone());

    let first = agent.tick().await.unwrap();
    let second = agent.tick().await.unwrap();
    assert!(agent.tick().await.is_none());

    assert!(!first.is_done());
    assert!(second.is_done());
    assert!(!bad.exists() && !good.exists());

    let errors = ws.errors();
    let message = errors
        .iter()
        .find(|n| n.starts_with("error-message-"))
        .unwrap();
    let text = std::fs::read_to_string(ws.cfg.paths.error_dir.join(message)).unwrap();
    assert!(text.starts_with("Invalid job file"));
    assert_eq!(agent.stats().processed, 2);
}

#[tokio::test]
async fn every_job_ends_in_exactly_one_folder() {
    let ws = Workspace::new();
    let page = FakePage::new(USER, PASS).authenticated().with_tabs(&["AAA"]);
    let mut agent = ws.agent(page);

    let jobs = [
        ("a.json", r#"{ "symbol": "AAA", "quantity": 2 }"#),
        ("b.json", r#"{ "symbol": "BBB", "quantity": -1 }"#),
        ("c.json", "not json"),
        ("d.json", r#"{ "symbol": "CCC", "quantity": 0 }"#),
        ("e.json", r#"{ "symbol": "AAA", "quantity": -2 }"#),
    ];
    for (name, body) in jobs {
        agent.enqueue(ws.drop_job(name, body));
    }
    while agent.tick().await.is_some() {}

    assert!(list(&ws.cfg.paths.watch_dir).is_empty());
    let done = ws.done();
    let errors = ws.errors();
    for (name, _) in jobs {
        let in_done = done.iter().any(|n| n.ends_with(&format!("-{name}")));
        let in_error = errors
            .iter()
            .any(|n| n.starts_with("error-") && !n.starts_with("error-message-") && n.ends_with(&format!("-{name}")));
        assert!(in_done ^ in_error, "{name} must land in exactly one folder");
    }
    assert_eq!(done.len(), 2);
    assert_eq!(agent.stats().failed, 3);
}

#[tokio::test]
async fn drain_loop_processes_in_arrival_order() {
    let ws = Workspace::new();
    let page = FakePage::new(USER, PASS)
        .authenticated()
        .with_tabs(&["ONE", "TWO", "THREE"]);
    let mut agent = ws.agent(page.clone());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for (i, symbol) in ["ONE", "TWO", "THREE"].iter().enumerate() {
        let body = format!(r#"{{ "symbol": "{symbol}", "quantity": {} }}"#, i + 1);
        tx.send(ws.drop_job(&format!("job{i}.json"), &body)).unwrap();
    }

    agent
        .run_until(
            &mut rx,
            ws.cfg.drain_interval(),
            tokio::time::sleep(Duration::from_millis(500)),
        )
        .await;

    assert_eq!(
        page.orders(),
        vec![
            placed("ONE", Side::Buy, "1"),
            placed("TWO", Side::Buy, "2"),
            placed("THREE", Side::Buy, "3"),
        ]
    );
    assert_eq!(ws.done().len(), 3);
    assert!(agent.queue().is_empty());
    assert!(!agent.queue().is_busy());
}

#[tokio::test]
async fn watched_arrival_is_processed() {
    let ws = Workspace::new();
    let page = FakePage::new(USER, PASS).authenticated().with_tabs(&["ABC"]);
    let mut agent = ws.agent(page.clone());

    // Present before the watch starts: ignored
    let stale = ws.drop_job("stale.json", r#"{ "symbol": "OLD", "quantity": 1 }"#);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _watcher = assert_ok!(JobWatcher::spawn(&ws.cfg.paths.watch_dir, &ws.cfg.watcher, tx));

    let dropper_dir = ws.cfg.paths.watch_dir.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(
            dropper_dir.join("order1.json"),
            r#"{ "symbol": "ABC", "quantity": 5 }"#,
        )
        .unwrap();
    });

    agent
        .run_until(
            &mut rx,
            ws.cfg.drain_interval(),
            tokio::time::sleep(Duration::from_millis(1500)),
        )
        .await;

    assert_eq!(page.orders(), vec![placed("ABC", Side::Buy, "5")]);
    assert!(stale.exists());
    assert_eq!(ws.done().len(), 1);
}

#[tokio::test]
async fn session_file_resumes_authenticated_state() {
    let ws = Workspace::new();
    let session = &ws.cfg.paths.session_file;
    let auth = Authenticator::new(ws.cfg.site.clone(), ws.cfg.timeouts.clone());
    let creds = Credentials::new(USER, PASS);

    // First process: log in and persist
    let first = FakePage::new(USER, PASS);
    assert_ok!(auth.login(&first, &creds, Duration::from_millis(10)).await);
    storage::save_session(&first, session).await;
    assert!(session.exists());

    // Fresh process: restore only, no credentials typed
    let second = FakePage::new(USER, PASS);
    assert!(!second.is_authenticated());
    assert!(storage::restore_session(&second, session).await);
    assert!(second.is_authenticated());
    assert!(second.clicks().is_empty());
}

#[tokio::test]
async fn wrong_password_is_an_authentication_timeout() {
    let ws = Workspace::new();
    let auth = Authenticator::new(ws.cfg.site.clone(), ws.cfg.timeouts.clone());
    let page = FakePage::new(USER, PASS);

    let err = assert_err!(
        auth.login(&page, &Credentials::new(USER, "wrong"), Duration::from_millis(10))
            .await
    );
    assert!(matches!(err, AgentError::AuthenticationTimeout { timeout_ms: 10 }));
    assert!(!page.is_authenticated());
}

#[tokio::test]
async fn logout_clears_the_session() {
    let ws = Workspace::new();
    let auth = Authenticator::new(ws.cfg.site.clone(), ws.cfg.timeouts.clone());
    let page = FakePage::new(USER, PASS);

    assert_ok!(auth.login(&page, &Credentials::new(USER, PASS), Duration::from_millis(10)).await);
    assert_ok!(auth.logout(&page).await);
    assert!(!page.is_authenticated());
}

#[tokio::test]
async fn auth_only_run_saves_the_logged_out_session() {
    let ws = Workspace::new();
    let session = &ws.cfg.paths.session_file;
    let auth = Authenticator::new(ws.cfg.site.clone(), ws.cfg.timeouts.clone());
    let page = FakePage::new(USER, PASS);

    assert_ok!(auth.login(&page, &Credentials::new(USER, PASS), Duration::from_millis(10)).await);
    storage::save_session(&page, session).await;
    assert_ok!(auth.logout_and_save(&page, session).await);

    // The file was overwritten after logout: a fresh page stays logged out
    let fresh = FakePage::new(USER, PASS);
    storage::restore_session(&fresh, session).await;
    assert!(!fresh.is_authenticated());
}

#[tokio::test]
async fn auth_only_logout_failure_is_reported() {
    let ws = Workspace::new();
    let session = &ws.cfg.paths.session_file;
    let auth = Authenticator::new(ws.cfg.site.clone(), ws.cfg.timeouts.clone());
    // Never logged in: the account control is absent
    let page = FakePage::new(USER, PASS);

    let err = assert_err!(auth.logout_and_save(&page, session).await);
    assert!(matches!(err, AgentError::UiTimeout { .. }));
    assert!(session.exists());
}

#[tokio::test]
async fn missing_session_file_is_not_fatal() {
    let ws = Workspace::new();
    let page = FakePage::new(USER, PASS);
    assert!(!storage::restore_session(&page, &ws.cfg.paths.session_file).await);

    std::fs::write(&ws.cfg.paths.session_file, "garbage").unwrap();
    assert!(!storage::restore_session(&page, &ws.cfg.paths.session_file).await);
    assert!(!page.is_authenticated());
}
