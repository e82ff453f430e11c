//! Tests for the Plugin Lifecycle Manager
//!
//! Load, unload and reload semantics, dependency gating, rollback of failed
//! activations and per-plugin serialisation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use serde_json::json;
use super::mock_plugins::*;
use crate::plugin::error::PluginError;
use crate::plugin::events::InMemoryEventBus;
use crate::plugin::context::HostServices;
use crate::plugin::manager::{ManagerSettings, PluginManager};
use crate::plugin::sandbox::SandboxConfig;
use crate::plugin::traits::{PluginMetadata, PluginState};

#[tokio::test]
async fn test_load_activates_and_tracks_plugin() {
    let (manager, temp_dir) = test_manager();
    let plugin = Arc::new(MockPlugin::new("docker", "1.0.0").with_tools(2));

    manager.load(plugin.clone()).await.unwrap();

    assert!(manager.is_loaded("docker"));
    assert_eq!(plugin.activations(), 1);
    assert_eq!(tool_count(manager.registry()), 2);

    let status = manager.get_status("docker").unwrap();
    assert_eq!(status.state, PluginState::Active);
    assert!(status.last_error.is_none());

    let storage_path = plugin.seen_storage_path().unwrap();
    assert_eq!(storage_path, temp_dir.path().join("docker"));
    assert!(storage_path.is_dir());
}

#[tokio::test]
async fn test_duplicate_load_is_rejected_without_side_effects() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(MockPlugin::new("docker", "1.0.0"));

    manager.load(plugin.clone()).await.unwrap();
    let err = manager.load(plugin.clone()).await.unwrap_err();

    assert!(matches!(err, PluginError::AlreadyLoaded { .. }));
    assert_eq!(plugin.activations(), 1);
    assert_eq!(tool_count(manager.registry()), 1);
    assert_eq!(manager.plugin_count(), 1);
}

#[tokio::test]
async fn test_invalid_metadata_is_rejected_before_activation() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(
        MockPlugin::new("docker", "1.0.0").with_metadata(PluginMetadata::new("docker", "", "1.0.0")),
    );

    let err = manager.load(plugin.clone()).await.unwrap_err();

    assert!(matches!(err, PluginError::InvalidMetadata { .. }));
    assert_eq!(plugin.activations(), 0);
    assert_eq!(manager.plugin_count(), 0);
}

#[tokio::test]
async fn test_missing_dependency_blocks_load() {
    let (manager, _temp_dir) = test_manager();
    let dependent = Arc::new(MockPlugin::new("compose", "1.0.0").with_dependency("docker", "^1.0.0"));

    let err = manager.load(dependent.clone()).await.unwrap_err();

    assert!(matches!(
        err,
        PluginError::MissingDependency { ref plugin_id, ref dependency } if plugin_id == "compose" && dependency == "docker"
    ));
    assert!(err.is_dependency_error());
    assert_eq!(dependent.activations(), 0);
}

#[tokio::test]
async fn test_satisfied_dependency_allows_load() {
    let (manager, _temp_dir) = test_manager();
    manager.load(Arc::new(MockPlugin::new("docker", "1.2.0"))).await.unwrap();

    let dependent = Arc::new(MockPlugin::new("compose", "1.0.0").with_dependency("docker", "^1.0.0"));
    manager.load(dependent).await.unwrap();

    assert!(manager.is_loaded("compose"));
    assert_eq!(manager.dependents_of("docker"), vec!["compose".to_string()]);
}

#[tokio::test]
async fn test_incompatible_dependency_version_blocks_load() {
    let (manager, _temp_dir) = test_manager();
    manager.load(Arc::new(MockPlugin::new("docker", "2.0.0"))).await.unwrap();

    let dependent = Arc::new(MockPlugin::new("compose", "1.0.0").with_dependency("docker", "^1.0.0"));
    let err = manager.load(dependent).await.unwrap_err();

    match err {
        PluginError::IncompatibleDependency { dependency, required, found, .. } => {
            assert_eq!(dependency, "docker");
            assert_eq!(required, "^1.0.0");
            assert_eq!(found, "2.0.0");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!manager.is_loaded("compose"));
}

#[tokio::test]
async fn test_platform_constraint_is_checked() {
    let (manager, _temp_dir) = test_manager();

    let too_new = Arc::new(MockPlugin::new("future", "1.0.0").with_platform("^2.0.0"));
    let err = manager.load(too_new).await.unwrap_err();
    assert!(matches!(err, PluginError::IncompatiblePlatform { ref actual, .. } if actual == "1.0.0"));

    let compatible = Arc::new(MockPlugin::new("current", "1.0.0").with_platform("^1.0.0"));
    manager.load(compatible).await.unwrap();
}

#[tokio::test]
async fn test_failed_activation_leaves_no_trace() {
    let events = Arc::new(InMemoryEventBus::new());
    let temp_dir = tempfile::TempDir::new().unwrap();
    let manager = PluginManager::new(
        HostServices::default().with_events(events.clone()),
        ManagerSettings::new(temp_dir.path()),
    );
    let plugin = Arc::new(
        MockPlugin::new("broken", "1.0.0")
            .with_tools(3)
            .with_subscription("session.start")
            .failing_activation(),
    );

    let err = manager.load(plugin.clone()).await.unwrap_err();

    assert!(matches!(err, PluginError::ActivationFailed { ref plugin_id, .. } if plugin_id == "broken"));
    assert!(err.is_lifecycle_error());
    assert!(!manager.is_loaded("broken"));
    assert_eq!(tool_count(manager.registry()), 0);
    assert_eq!(events.subscriber_count("session.start"), 0);
    assert!(manager.list_plugins().is_empty());
}

#[tokio::test]
async fn test_activation_timeout_rolls_back_registrations() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(
        MockPlugin::new("slow", "1.0.0")
            .with_tools(2)
            .with_activation_delay(Duration::from_millis(500))
            .with_sandbox(SandboxConfig::unrestricted().with_timeout_ms(20)),
    );

    let err = manager.load(plugin).await.unwrap_err();

    assert!(matches!(err, PluginError::ActivationTimeout { timeout_ms: 20, .. }));
    assert!(!manager.is_loaded("slow"));
    assert_eq!(tool_count(manager.registry()), 0);
}

#[tokio::test]
async fn test_host_activation_timeout_applies_without_sandbox_timeout() {
    let (manager, _temp_dir) = test_manager_with(|s| s.with_activation_timeout(Duration::from_millis(20)));
    let plugin = Arc::new(MockPlugin::new("slow", "1.0.0").with_activation_delay(Duration::from_millis(500)));

    let err = manager.load(plugin).await.unwrap_err();
    assert!(matches!(err, PluginError::ActivationTimeout { .. }));
}

#[tokio::test]
async fn test_host_default_sandbox_denies_registration() {
    let (manager, _temp_dir) = test_manager_with(|s| s.with_default_sandbox(SandboxConfig::deny_all()));
    let plugin = Arc::new(MockPlugin::new("docker", "1.0.0"));

    let err = manager.load(plugin).await.unwrap_err();

    match err {
        PluginError::ActivationFailed { source, .. } => {
            assert!(matches!(*source, PluginError::PermissionDenied { ref api, .. } if api == "registry.register"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(tool_count(manager.registry()), 0);
}

#[tokio::test]
async fn test_plugin_sandbox_overrides_host_default() {
    let (manager, _temp_dir) = test_manager_with(|s| s.with_default_sandbox(SandboxConfig::deny_all()));
    let plugin = Arc::new(MockPlugin::new("docker", "1.0.0").with_sandbox(SandboxConfig::allow(["registry.*"])));

    manager.load(plugin).await.unwrap();
    assert_eq!(tool_count(manager.registry()), 1);
}

#[tokio::test]
async fn test_invalid_sandbox_is_rejected() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(MockPlugin::new("docker", "1.0.0").with_sandbox(SandboxConfig::unrestricted().with_max_cpu(-1.0)));

    let err = manager.load(plugin.clone()).await.unwrap_err();
    assert!(matches!(err, PluginError::ResourceLimitInvalid { .. }));
    assert_eq!(plugin.activations(), 0);
}

#[tokio::test]
async fn test_plugin_settings_reach_context() {
    let settings = HashMap::from([("image".to_string(), json!("alpine"))]);
    let (manager, _temp_dir) = test_manager_with(|s| s.with_plugin_settings("docker", settings));
    let plugin = Arc::new(MockPlugin::new("docker", "1.0.0"));

    manager.load(plugin.clone()).await.unwrap();

    let seen = plugin.seen_config().unwrap();
    assert_eq!(seen.get("image"), Some(&json!("alpine")));
}

#[tokio::test]
async fn test_unload_deactivates_and_forgets() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(MockPlugin::new("docker", "1.0.0").with_tools(2));

    manager.load(plugin.clone()).await.unwrap();
    manager.unload("docker").await.unwrap();

    assert_eq!(plugin.deactivations(), 1);
    assert!(!manager.is_loaded("docker"));
    assert!(manager.get_plugin("docker").is_none());
    assert_eq!(tool_count(manager.registry()), 0);

    let err = manager.unload("docker").await.unwrap_err();
    assert!(matches!(err, PluginError::NotLoaded { .. }));
}

#[tokio::test]
async fn test_unload_sweeps_leftover_registrations() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(MockPlugin::new("sloppy", "1.0.0").with_tools(2).leaving_registrations());

    manager.load(plugin).await.unwrap();
    assert_eq!(tool_count(manager.registry()), 2);

    manager.unload("sloppy").await.unwrap();
    assert_eq!(tool_count(manager.registry()), 0);
}

#[tokio::test]
async fn test_failed_deactivation_keeps_plugin_for_retry() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(MockPlugin::new("sticky", "1.0.0").failing_deactivation());

    manager.load(plugin.clone()).await.unwrap();
    let err = manager.unload("sticky").await.unwrap_err();

    assert!(matches!(err, PluginError::DeactivationFailed { .. }));
    let status = manager.get_status("sticky").unwrap();
    assert_eq!(status.state, PluginState::Error);
    assert!(status.last_error.unwrap().contains("Mock deactivation failure"));
    assert_eq!(tool_count(manager.registry()), 1);

    plugin.set_fail_deactivation(false);
    manager.unload("sticky").await.unwrap();
    assert!(!manager.is_loaded("sticky"));
    assert_eq!(plugin.deactivations(), 2);
}

#[tokio::test]
async fn test_reload_cycles_the_same_plugin() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(MockPlugin::new("docker", "1.0.0").with_tools(2));

    manager.load(plugin.clone()).await.unwrap();
    let first_loaded_at = manager.get_status("docker").unwrap().loaded_at;
    manager.reload("docker").await.unwrap();

    assert_eq!(plugin.activations(), 2);
    assert_eq!(plugin.deactivations(), 1);
    assert_eq!(tool_count(manager.registry()), 2);
    assert!(manager.get_status("docker").unwrap().loaded_at >= first_loaded_at);
}

#[tokio::test]
async fn test_reload_failure_leaves_plugin_unloaded() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(MockPlugin::new("docker", "1.0.0"));

    manager.load(plugin.clone()).await.unwrap();
    plugin.set_fail_activation(true);

    let err = manager.reload("docker").await.unwrap_err();

    assert!(matches!(err, PluginError::ActivationFailed { .. }));
    assert!(!manager.is_loaded("docker"));
    assert_eq!(tool_count(manager.registry()), 0);
}

#[tokio::test]
async fn test_reload_unknown_plugin() {
    let (manager, _temp_dir) = test_manager();
    let err = manager.reload("ghost").await.unwrap_err();
    assert!(matches!(err, PluginError::NotLoaded { .. }));
}

#[tokio::test]
async fn test_list_plugins_in_load_order() {
    let (manager, _temp_dir) = test_manager();
    for id in ["alpha", "beta", "gamma"] {
        manager.load(Arc::new(MockPlugin::new(id, "1.0.0"))).await.unwrap();
    }

    let ids: Vec<String> = manager.list_plugins().into_iter().map(|s| s.metadata.id).collect();
    assert_eq!(ids, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn test_unload_all_runs_in_reverse_load_order() {
    let (manager, _temp_dir) = test_manager();
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));

    manager.load(Arc::new(MockPlugin::new("base", "1.0.0").with_journal(journal.clone()))).await.unwrap();
    manager
        .load(Arc::new(
            MockPlugin::new("addon", "1.0.0")
                .with_dependency("base", "^1.0.0")
                .with_journal(journal.clone()),
        ))
        .await
        .unwrap();

    let results = manager.unload_all().await;

    assert!(results.iter().all(|(_, result)| result.is_ok()));
    assert_eq!(manager.plugin_count(), 0);
    assert_eq!(
        *journal.lock(),
        vec!["activate:base", "activate:addon", "deactivate:addon", "deactivate:base"]
    );
}

#[tokio::test]
async fn test_concurrent_loads_of_distinct_plugins() {
    let (manager, _temp_dir) = test_manager();
    let plugins: Vec<Arc<MockPlugin>> = (0..10)
        .map(|i| {
            Arc::new(
                MockPlugin::new(&format!("plugin-{}", i), "1.0.0").with_activation_delay(Duration::from_millis(10)),
            )
        })
        .collect();

    let results = futures::future::join_all(plugins.iter().map(|p| manager.load(p.clone()))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(manager.plugin_count(), 10);
    assert_eq!(tool_count(manager.registry()), 10);
}

#[tokio::test]
async fn test_concurrent_loads_of_same_plugin_activate_once() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(MockPlugin::new("docker", "1.0.0").with_activation_delay(Duration::from_millis(20)));

    let (first, second) = tokio::join!(manager.load(plugin.clone()), manager.load(plugin.clone()));

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(PluginError::AlreadyLoaded { .. }))));
    assert_eq!(plugin.activations(), 1);
    assert_eq!(tool_count(manager.registry()), 1);
}

#[tokio::test]
async fn test_unload_during_activation_reports_not_loaded() {
    let (manager, _temp_dir) = test_manager();
    let plugin = Arc::new(MockPlugin::new("slow", "1.0.0").with_activation_delay(Duration::from_millis(100)));

    let (loaded, unloaded) = tokio::join!(manager.load(plugin.clone()), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.unload("slow").await
    });

    assert!(loaded.is_ok());
    assert!(matches!(unloaded, Err(PluginError::NotLoaded { ref plugin_id }) if plugin_id == "slow"));
    assert!(manager.is_loaded("slow"));
    assert_eq!(plugin.deactivations(), 0);
}

#[tokio::test]
async fn test_get_plugin_returns_shared_handle() {
    let (manager, _temp_dir) = test_manager();
    manager.load(Arc::new(MockPlugin::new("docker", "1.0.0"))).await.unwrap();

    let plugin = manager.get_plugin("docker").unwrap();
    assert_eq!(plugin.id(), "docker");
    assert_eq!(plugin.metadata().version, "1.0.0");
}
