//! Reconciliation of flat plugin entries

use scope_loader::{ENTRY_KEY, Error};
use serde_json::json;

mod common;
use common::{describe, drain, entry_keys, loader, root};

#[tokio::test]
async fn create_then_remove_round_trip() {
    let (mut loader, stats, _) = loader(json!({ "echo:a": {} }));
    loader.create_app().await.unwrap();
    assert_eq!(entry_keys(&loader), vec!["echo:a"]);

    let mut rx = loader.subscribe();
    loader.update_config(root(json!({}))).await.unwrap();

    assert!(entry_keys(&loader).is_empty());
    assert_eq!(stats.disposed(), vec!["echo:a"]);
    let unloads: Vec<_> = describe(&drain(&mut rx))
        .into_iter()
        .filter(|e| e.starts_with("unload"))
        .collect();
    assert_eq!(unloads, vec!["unload echo:a"]);
}

#[tokio::test]
async fn changed_config_updates_the_same_fork() {
    let (mut loader, stats, _) = loader(json!({ "echo:a": { "x": 1 } }));
    loader.create_app().await.unwrap();
    let before = loader.lookup(&["echo:a"]).unwrap();

    loader
        .update_config(root(json!({ "echo:a": { "x": 2 } })))
        .await
        .unwrap();

    assert_eq!(loader.lookup(&["echo:a"]), Some(before));
    assert_eq!(stats.applied_keys(), vec!["echo:a"]);
    assert_eq!(stats.updated(), vec![("echo:a".to_string(), json!({ "x": 2 }))]);
    assert!(stats.disposed().is_empty());
}

#[tokio::test]
async fn restart_keeps_fork_identity() {
    let (mut loader, stats, _) = loader(json!({ "restart": { "x": 1 } }));
    loader.create_app().await.unwrap();
    let before = loader.lookup(&["restart"]).unwrap();

    loader
        .update_config(root(json!({ "restart": { "x": 2 } })))
        .await
        .unwrap();

    assert_eq!(loader.lookup(&["restart"]), Some(before));
    assert_eq!(stats.disposed(), vec!["restart"]);
    let configs: Vec<_> = stats.applied().into_iter().map(|a| a.config).collect();
    assert_eq!(configs, vec![json!({ "x": 1 }), json!({ "x": 2 })]);
}

#[tokio::test]
async fn unchanged_entries_are_left_alone() {
    let (mut loader, stats, _) = loader(json!({ "echo:a": { "x": 1 }, "echo:b": { "y": 1 } }));
    loader.create_app().await.unwrap();
    let mut rx = loader.subscribe();

    loader
        .update_config(root(json!({ "echo:a": { "x": 1 }, "echo:b": { "y": 2 } })))
        .await
        .unwrap();

    assert_eq!(stats.updated(), vec![("echo:b".to_string(), json!({ "y": 2 }))]);
    assert_eq!(
        describe(&drain(&mut rx)),
        vec![format!("reload {ENTRY_KEY}"), "reload echo:b".to_string()]
    );
}

#[tokio::test]
async fn root_fields_outside_plugins_do_not_reconcile() {
    let (mut loader, stats, _) = loader(json!({ "echo:a": {} }));
    loader.create_app().await.unwrap();
    let mut rx = loader.subscribe();

    loader
        .update_config(json!({ "prefix": "!", "plugins": { "echo:a": {} } }))
        .await
        .unwrap();

    assert!(drain(&mut rx).is_empty());
    assert!(stats.updated().is_empty());
    assert_eq!(loader.config()["prefix"], json!("!"));
}

#[tokio::test]
async fn false_condition_never_creates() {
    let (mut loader, stats, _) = loader(json!({ "echo:a": { "$if": false, "x": 1 } }));
    loader.create_app().await.unwrap();

    assert!(entry_keys(&loader).is_empty());
    assert!(stats.applied().is_empty());
}

#[tokio::test]
async fn flipping_condition_disposes() {
    let (mut loader, stats, _) = loader(json!({ "echo:a": { "$if": true, "x": 1 } }));
    loader.create_app().await.unwrap();
    assert_eq!(entry_keys(&loader), vec!["echo:a"]);

    loader
        .update_config(root(json!({ "echo:a": { "$if": "1 > 2", "x": 1 } })))
        .await
        .unwrap();

    assert!(entry_keys(&loader).is_empty());
    assert_eq!(stats.disposed(), vec!["echo:a"]);
}

#[tokio::test]
async fn record_matches_truthy_keys_of_new_config() {
    let (mut loader, _, _) = loader(json!({
        "echo:a": {},
        "echo:b": {},
        "echo:c": { "$if": false },
    }));
    loader.create_app().await.unwrap();
    assert_eq!(entry_keys(&loader), vec!["echo:a", "echo:b"]);

    loader
        .update_config(root(json!({
            "echo:b": {},
            "echo:c": { "$if": true },
            "echo:d": null,
            "echo:e": { "$if": "false" },
            "~echo:f": {},
            "$label": "root",
        })))
        .await
        .unwrap();

    assert_eq!(entry_keys(&loader), vec!["echo:b", "echo:c", "echo:d"]);
}

#[tokio::test]
async fn unloading_twice_is_a_no_op() {
    let (mut loader, stats, _) = loader(json!({ "echo:a": {} }));
    let entry = loader.create_app().await.unwrap();

    assert!(loader.unload_plugin(entry, "echo:a"));
    assert!(!loader.unload_plugin(entry, "echo:a"));
    assert_eq!(stats.disposed(), vec!["echo:a"]);
    assert!(loader.lookup(&["echo:a"]).is_none());
}

#[tokio::test]
async fn unresolved_plugins_do_not_affect_siblings() {
    let (mut loader, stats, _) = loader(json!({
        "missing": {},
        "echo:a": {},
        "broken": {},
        "server": "not a mapping",
    }));
    loader.create_app().await.unwrap();

    assert_eq!(entry_keys(&loader), vec!["echo:a"]);
    assert_eq!(stats.applied_keys(), vec!["echo:a"]);
    assert_eq!(loader.tree().fork_count(), 2);
}

#[tokio::test]
async fn condition_errors_fail_only_their_entry() {
    let (mut loader, _, _) = loader(json!({ "echo:a": {} }));
    loader.create_app().await.unwrap();

    let err = loader
        .update_config(root(json!({
            "echo:a": { "$if": "missing_flag" },
            "echo:b": {},
        })))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Reconcile(_)));
    assert_eq!(err.failed_keys(), vec!["echo:a"]);
    assert_eq!(entry_keys(&loader), vec!["echo:a", "echo:b"]);
}

#[tokio::test]
async fn bootstrap_errors_are_returned() {
    let (mut loader, _, _) = loader(json!({ "echo:a": { "$if": "(" }, "echo:b": {} }));

    let err = loader.create_app().await.unwrap_err();

    assert_eq!(err.failed_keys(), vec!["echo:a"]);
    assert!(loader.lookup(&["echo:b"]).is_some());
}

#[tokio::test]
async fn reserved_keys_configure_the_scope_not_the_plugin() {
    let (mut loader, stats, _) = loader(json!({
        "echo:primary": { "$label": "main", "$isolate": ["db"], "x": 1 },
    }));
    loader.create_app().await.unwrap();

    let applied = stats.applied().remove(0);
    assert_eq!(applied.config, json!({ "x": 1 }));
    assert_eq!(applied.alias, "primary");
    assert_eq!(applied.label.as_deref(), Some("main"));

    let fork = loader.tree().fork(loader.lookup(&["echo:primary"]).unwrap()).unwrap();
    let scope = loader.tree().scope(fork.scope()).unwrap();
    assert_eq!(scope.options().isolate, vec!["db".to_string()]);
}

#[tokio::test]
async fn templates_are_interpolated_on_create_and_update() {
    let (mut loader, stats, _) = loader(json!({
        "echo:a": { "msg": "${{ greeting }}, ${{ name }}!", "n": "${{ 1 + 1 }}" },
    }));
    loader.set_env("greeting", json!("hello"));
    loader.set_env("name", json!("world"));
    loader.create_app().await.unwrap();
    assert_eq!(
        stats.applied()[0].config,
        json!({ "msg": "hello, world!", "n": "2" })
    );

    loader
        .update_config(root(json!({ "echo:a": { "msg": "${{ name }}" } })))
        .await
        .unwrap();
    assert_eq!(stats.updated(), vec![("echo:a".to_string(), json!({ "msg": "world" }))]);
}

#[tokio::test]
async fn resolve_config_defaults_are_applied() {
    let (mut loader, stats, _) = loader(json!({ "server": { "host": "local" } }));
    loader.create_app().await.unwrap();

    assert_eq!(
        stats.applied()[0].config,
        json!({ "host": "local", "port": 80 })
    );
}

#[tokio::test]
async fn failed_restart_unloads_the_fork() {
    let (mut loader, stats, _) = loader(json!({ "flaky": { "x": 1 }, "echo:a": {} }));
    loader.create_app().await.unwrap();
    let mut rx = loader.subscribe();

    let err = loader
        .update_config(root(json!({ "flaky": { "x": 2 }, "echo:a": {} })))
        .await
        .unwrap_err();

    assert_eq!(err.failed_keys(), vec!["flaky"]);
    assert_eq!(entry_keys(&loader), vec!["echo:a"]);
    assert!(loader.lookup(&["flaky"]).is_none());
    assert_eq!(stats.disposed(), vec!["flaky"]);
    assert!(describe(&drain(&mut rx)).contains(&"unload flaky".to_string()));
    assert_eq!(loader.tree().fork_count(), 2);
}

#[tokio::test]
async fn bad_templates_in_inert_entries_do_not_block_updates() {
    let (mut loader, stats, _) = loader(json!({ "echo:a": { "x": 1 } }));
    loader.create_app().await.unwrap();

    loader
        .update_config(root(json!({
            "echo:a": { "x": 2 },
            "~echo:off": { "msg": "${{ missing }}" },
            "echo:skipped": { "$if": false, "msg": "${{ missing }}" },
        })))
        .await
        .unwrap();

    assert_eq!(stats.updated(), vec![("echo:a".to_string(), json!({ "x": 2 }))]);
    assert_eq!(entry_keys(&loader), vec!["echo:a"]);
    assert_eq!(loader.config()["plugins"]["echo:a"], json!({ "x": 2 }));
}

#[tokio::test]
async fn bad_template_fails_only_its_own_entry() {
    let (mut loader, stats, _) = loader(json!({ "echo:a": { "x": 1 } }));
    loader.create_app().await.unwrap();

    let err = loader
        .update_config(root(json!({
            "echo:a": { "x": 2 },
            "echo:b": { "msg": "${{ missing }}" },
        })))
        .await
        .unwrap_err();

    assert_eq!(err.failed_keys(), vec!["echo:b"]);
    assert_eq!(stats.updated(), vec![("echo:a".to_string(), json!({ "x": 2 }))]);
    assert_eq!(entry_keys(&loader), vec!["echo:a"]);
    assert_eq!(loader.config()["plugins"]["echo:b"], json!({ "msg": "${{ missing }}" }));
}
