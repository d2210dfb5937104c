//! Hook executor tests. They run small shell scripts, so unix only.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crawlq::config::secrets::parse_proxy_list;
use crawlq::engine::{Executor, HookExecutor};
use crawlq::error::Error;
use crawlq::model::{Params, WorkItem};
use tokio_util::sync::CancellationToken;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn item() -> WorkItem {
    WorkItem::seed("coffee in berlin", Params::default(), None)
}

#[tokio::test]
async fn hook_output_becomes_a_harvest() {
    let dir = tempfile::tempdir().unwrap();
    let hook = script(
        dir.path(),
        "hook.sh",
        r#"cat > /dev/null
echo "{\"entities\":[{\"key\":\"$CRAWLQ_TARGET\",\"data\":{\"proxy\":\"$CRAWLQ_PROXIES\"}}],\"children\":[{\"target\":\"page-2\"}]}""#,
    );

    let executor = HookExecutor::new(&hook, parse_proxy_list("http://p:1")).unwrap();
    let harvest = executor
        .execute(&item(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(harvest.entities.len(), 1);
    assert_eq!(harvest.entities[0].key, "coffee in berlin");
    assert_eq!(harvest.entities[0].data["proxy"], "http://p:1");
    assert_eq!(harvest.children.len(), 1);
    assert_eq!(harvest.children[0].target, "page-2");
    assert!(harvest.children[0].params.is_none());
}

#[tokio::test]
async fn empty_output_is_an_empty_harvest() {
    let dir = tempfile::tempdir().unwrap();
    let hook = script(dir.path(), "quiet.sh", "cat > /dev/null");

    let executor = HookExecutor::new(&hook, Vec::new()).unwrap();
    let harvest = executor
        .execute(&item(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(harvest.entities.is_empty());
    assert!(harvest.children.is_empty());
}

#[tokio::test]
async fn non_zero_exit_fails_the_item() {
    let dir = tempfile::tempdir().unwrap();
    let hook = script(
        dir.path(),
        "fail.sh",
        "cat > /dev/null\necho 'rate limited' >&2\nexit 3",
    );

    let executor = HookExecutor::new(&hook, Vec::new()).unwrap();
    let err = executor
        .execute(&item(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::Item(msg) => assert!(msg.contains("rate limited"), "{msg}"),
        other => panic!("expected item error, got {other:?}"),
    }
}

#[tokio::test]
async fn garbage_output_fails_the_item() {
    let dir = tempfile::tempdir().unwrap();
    let hook = script(dir.path(), "garbage.sh", "cat > /dev/null\necho 'not json'");

    let executor = HookExecutor::new(&hook, Vec::new()).unwrap();
    let err = executor
        .execute(&item(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Item(_)));
}

#[test]
fn missing_hook_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = HookExecutor::new(&dir.path().join("nope.sh"), Vec::new()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
