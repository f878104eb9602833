//! Catalog Tests
//!
//! End-to-end tests for plugin listing, element loading, path safety and
//! cache invalidation against on-disk marketplace fixtures.
//!
//! Run: cargo nextest run --test catalog_tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use claude_plugin_catalog::{
    CatalogConfig, ElementKind, ElementRecord, ElementSelector, Error, IndexWarning,
    PluginService, RefreshPolicy,
};
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: impl AsRef<[u8]>) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn marketplace(root: &Path, dir: &str, descriptor: &str) {
    write(
        root,
        &format!("marketplaces/{dir}/.claude-plugin/marketplace.json"),
        descriptor,
    );
}

/// Two marketplaces; `shared` is declared by both.
fn fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    marketplace(
        root,
        "official",
        r#"{
            "name": "claude-official",
            "owner": {"name": "Anthropic"},
            "plugins": [
                {"name": "formatter", "source": "./plugins/formatter",
                 "description": "Code formatting", "version": "1.2.0",
                 "author": {"name": "Dev"}, "keywords": ["fmt", "style"]},
                {"name": "shared", "source": "./plugins/shared", "description": "official"}
            ]
        }"#,
    );
    write(
        root,
        "marketplaces/official/plugins/formatter/skills/style/SKILL.md",
        "---\nname: style\ndescription: Style guide\n---\nFollow the guide.",
    );
    write(
        root,
        "marketplaces/official/plugins/formatter/agents/reviewer.md",
        "---\ndescription: Reviews diffs\nmodel: sonnet\n---\nReview carefully.",
    );
    write(
        root,
        "marketplaces/official/plugins/formatter/commands/fmt.md",
        "Format the file.",
    );
    write(root, "marketplaces/official/plugins/shared/commands/a.md", "a");

    marketplace(
        root,
        "community",
        r#"{"name": "community", "plugins": [
            {"name": "shared", "source": "./shared", "description": "community"}
        ]}"#,
    );
    write(root, "marketplaces/community/shared/commands/b.md", "b");

    dir
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn service(root: &Path) -> PluginService {
    init_tracing();
    PluginService::new(CatalogConfig::new(root).with_refresh(RefreshPolicy::EveryCall)).unwrap()
}

// =============================================================================
// Listing
// =============================================================================

mod listing_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_plugins() {
        let dir = fixture();
        let plugins = service(dir.path()).list_plugins().await.unwrap();

        let names: Vec<&str> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["shared", "formatter"]);

        let formatter = &plugins[1];
        assert_eq!(formatter.marketplace, "claude-official");
        assert_eq!(formatter.version.as_deref(), Some("1.2.0"));
        assert_eq!(formatter.author.as_ref().unwrap().name(), "Dev");
        assert_eq!(formatter.keywords, vec!["fmt", "style"]);
    }

    #[tokio::test]
    async fn test_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(service(dir.path()).list_plugins().await.unwrap().is_empty());

        let missing = dir.path().join("nothing-here");
        assert!(service(&missing).list_plugins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tie_break_prefers_first_marketplace_dir() {
        let dir = fixture();
        let service = service(dir.path());

        let plugins = service.list_plugins().await.unwrap();
        let shared: Vec<_> = plugins.iter().filter(|p| p.name == "shared").collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].marketplace, "community");
        assert_eq!(shared[0].description.as_deref(), Some("community"));

        let report = service.refresh().await.unwrap();
        assert!(report.warnings.contains(&IndexWarning::Shadowed {
            plugin: "shared".into(),
            winner: "community".into(),
            shadowed: "claude-official".into(),
        }));
    }

    #[tokio::test]
    async fn test_describe_plugin() {
        let dir = fixture();
        let detail = service(dir.path()).describe_plugin("formatter").await.unwrap();

        assert_eq!(detail.summary.description.as_deref(), Some("Code formatting"));
        assert_eq!(detail.owner.as_ref().unwrap().name, "Anthropic");
        assert!(detail.location.ends_with("plugins/formatter"));

        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["name"], "formatter");
        assert_eq!(json["owner"]["name"], "Anthropic");
    }
}

// =============================================================================
// Loading
// =============================================================================

mod loading_tests {
    use super::*;

    #[tokio::test]
    async fn test_load_all_elements() {
        let dir = fixture();
        let loaded = service(dir.path())
            .load_elements("formatter", None)
            .await
            .unwrap();

        let kinds: Vec<(ElementKind, &str)> = loaded
            .records
            .iter()
            .map(|r| (r.kind(), r.name()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ElementKind::Skill, "style"),
                (ElementKind::Agent, "reviewer"),
                (ElementKind::Command, "fmt"),
            ]
        );

        let reviewer = loaded.elements().find(|e| e.name == "reviewer").unwrap();
        assert_eq!(reviewer.description(), Some("Reviews diffs"));
        assert_eq!(reviewer.payload.as_ref().unwrap().extra["model"], "sonnet");
    }

    #[tokio::test]
    async fn test_load_with_filter() {
        let dir = fixture();
        let loaded = service(dir.path())
            .load_elements("formatter", Some("agents".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].kind(), ElementKind::Agent);
    }

    #[tokio::test]
    async fn test_partial_failure() {
        let dir = fixture();
        let plugin = dir.path().join("marketplaces/official/plugins/formatter");
        write(&plugin, "commands/broken.md", [0xc3u8, 0x28]);
        write(&plugin, "commands/second.md", "second");

        let loaded = service(dir.path())
            .load_elements("formatter", Some(ElementKind::Command))
            .await
            .unwrap();

        assert_eq!(loaded.elements().count(), 2);
        let failures: Vec<_> = loaded.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "broken");
    }

    #[tokio::test]
    async fn test_oversize_element_is_inline_failure() {
        let dir = fixture();
        write(
            &dir.path().join("marketplaces/official/plugins/formatter"),
            "commands/big.md",
            "x".repeat(4096),
        );
        let service = PluginService::new(
            CatalogConfig::new(dir.path())
                .with_max_element_bytes(1024)
                .with_refresh(RefreshPolicy::Manual),
        )
        .unwrap();

        let loaded = service
            .load_elements("formatter", Some(ElementKind::Command))
            .await
            .unwrap();
        let record = loaded.find(ElementKind::Command, "big").unwrap();
        assert!(matches!(record, ElementRecord::Failed(f) if f.reason.contains("limit")));
        assert!(loaded.find(ElementKind::Command, "fmt").unwrap().is_loaded());
    }

    #[tokio::test]
    async fn test_unbounded_size_limits() {
        let dir = fixture();
        let service = PluginService::new(
            CatalogConfig::new(dir.path())
                .with_max_element_bytes(u64::MAX)
                .with_max_descriptor_bytes(u64::MAX)
                .with_refresh(RefreshPolicy::Manual),
        )
        .unwrap();

        assert_eq!(service.list_plugins().await.unwrap().len(), 2);
        let loaded = service
            .load_elements("formatter", Some(ElementKind::Command))
            .await
            .unwrap();
        let fmt = service
            .load_element("formatter", ElementKind::Command, "fmt")
            .await
            .unwrap();
        assert_eq!(fmt.content, "Format the file.");
        assert_eq!(loaded.failures().count(), 0);
    }

    #[tokio::test]
    async fn test_load_selected() {
        let dir = fixture();
        let service = service(dir.path());

        let selectors = [
            ElementSelector::new(ElementKind::Command, "fmt"),
            ElementSelector::new(ElementKind::Skill, "missing"),
            ElementSelector::new(ElementKind::Agent, "reviewer"),
            ElementSelector::new(ElementKind::Skill, "style"),
            ElementSelector::new(ElementKind::Command, "fmt"),
        ];
        let records = service.load_selected("formatter", &selectors).await.unwrap();

        let names: Vec<(ElementKind, &str)> =
            records.iter().map(|r| (r.kind(), r.name())).collect();
        assert_eq!(
            names,
            vec![
                (ElementKind::Command, "fmt"),
                (ElementKind::Agent, "reviewer"),
                (ElementKind::Skill, "style"),
            ]
        );
        assert!(records.iter().all(ElementRecord::is_loaded));

        // One cache entry per requested kind, shared with load_element.
        assert_eq!(service.cache_stats().loads, 3);
        service
            .load_element("formatter", ElementKind::Agent, "reviewer")
            .await
            .unwrap();
        assert_eq!(service.cache_stats().loads, 3);
    }

    #[tokio::test]
    async fn test_load_selected_parses_transport_shape() {
        let dir = fixture();
        let selectors: Vec<ElementSelector> = serde_json::from_str(
            r#"[{"type": "skills", "name": "style"}, {"kind": "command", "name": "fmt"}]"#,
        )
        .unwrap();

        let records = service(dir.path())
            .load_selected("formatter", &selectors)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);

        let err = service(dir.path())
            .load_selected("../formatter", &selectors)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
    }

    #[tokio::test]
    async fn test_load_element() {
        let dir = fixture();
        let service = service(dir.path());

        let element = service
            .load_element("formatter", ElementKind::Skill, "style")
            .await
            .unwrap();
        assert_eq!(element.payload.unwrap().body, "Follow the guide.");

        let err = service
            .load_element("formatter", ElementKind::Skill, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ElementNotFound { .. }));
        assert_eq!(err.status_code(), 404);
    }
}

// =============================================================================
// Path safety
// =============================================================================

mod path_safety_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let dir = fixture();
        let service = service(dir.path());

        for name in ["../etc", "a/b", "a\\b", "/abs", "C:evil", ".hidden", "", "nul\0l"] {
            let err = service.load_elements(name, None).await.unwrap_err();
            assert!(
                matches!(err, Error::InvalidName { .. }),
                "expected InvalidName for {name:?}, got {err:?}"
            );
            assert_eq!(err.status_code(), 400);
        }

        let long = "a".repeat(257);
        assert!(matches!(
            service.load_elements(&long, None).await,
            Err(Error::InvalidName { .. })
        ));
        assert_eq!(service.snapshot().generation, 0);
    }

    #[tokio::test]
    async fn test_unknown_plugin() {
        let dir = fixture();
        let err = service(dir.path())
            .load_elements("does-not-exist", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PluginNotFound { ref name } if name == "does-not-exist"));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_traversal_source_is_skipped() {
        let dir = fixture();
        marketplace(
            dir.path(),
            "evil",
            r#"{"plugins": [{"name": "escape", "source": "../../../"}]}"#,
        );

        let service = service(dir.path());
        let report = service.refresh().await.unwrap();
        assert!(report.warnings.iter().any(
            |w| matches!(w, IndexWarning::Plugin { plugin, .. } if plugin == "escape")
        ));
        assert!(matches!(
            service.load_elements("escape", None).await,
            Err(Error::PluginNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_element_escape_is_inline_failure() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.md"), "do not serve").unwrap();

        let dir = fixture();
        std::os::unix::fs::symlink(
            outside.path().join("secret.md"),
            dir.path()
                .join("marketplaces/official/plugins/formatter/commands/leak.md"),
        )
        .unwrap();

        let loaded = service(dir.path())
            .load_elements("formatter", Some(ElementKind::Command))
            .await
            .unwrap();
        let leak = loaded.find(ElementKind::Command, "leak").unwrap();
        assert!(!leak.is_loaded());
        assert!(loaded.elements().all(|e| e.content != "do not serve"));
    }
}

// =============================================================================
// Caching & invalidation
// =============================================================================

mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_second_load_is_cache_hit() {
        let dir = fixture();
        let service = service(dir.path());

        let first = service.load_elements("formatter", None).await.unwrap();
        let second = service.load_elements("formatter", None).await.unwrap();

        assert_eq!(*first, *second);
        assert!(Arc::ptr_eq(&first, &second));
        let stats = service.cache_stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_descriptor_change_invalidates() {
        let dir = fixture();
        let service = service(dir.path());
        service.load_elements("formatter", None).await.unwrap();
        service.load_elements("shared", None).await.unwrap();
        assert_eq!(service.cache_stats().entries, 2);

        marketplace(
            dir.path(),
            "official",
            r#"{"name": "claude-official", "plugins": [
                {"name": "formatter", "source": "./plugins/formatter", "version": "2.0.0"}
            ]}"#,
        );

        let report = service.refresh().await.unwrap();
        assert_eq!(report.diff.changed, vec!["formatter"]);
        assert_eq!(service.cache_stats().entries, 1);

        service.load_elements("formatter", None).await.unwrap();
        assert_eq!(service.cache_stats().loads, 3);
    }

    #[tokio::test]
    async fn test_removed_plugin_not_served_from_cache() {
        let dir = fixture();
        let service = service(dir.path());
        service.load_elements("formatter", None).await.unwrap();

        marketplace(dir.path(), "official", r#"{"plugins": []}"#);

        let err = service.load_elements("formatter", None).await.unwrap_err();
        assert!(matches!(err, Error::PluginNotFound { .. }));
        assert_eq!(service.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_verify_on_hit_reloads_changed_content() {
        let dir = fixture();
        let service = PluginService::new(
            CatalogConfig::new(dir.path())
                .with_refresh(RefreshPolicy::Manual)
                .with_verify_on_hit(true),
        )
        .unwrap();

        let before = service
            .load_elements("formatter", Some(ElementKind::Command))
            .await
            .unwrap();
        assert_eq!(before.records.len(), 1);

        // Let the directory mtime move past the recorded stamp.
        tokio::time::sleep(Duration::from_millis(50)).await;
        write(
            &dir.path().join("marketplaces/official/plugins/formatter"),
            "commands/new.md",
            "new",
        );

        let after = service
            .load_elements("formatter", Some(ElementKind::Command))
            .await
            .unwrap();
        assert_eq!(after.records.len(), 2);
        assert_eq!(service.cache_stats().loads, 2);
    }

    #[tokio::test]
    async fn test_verify_on_hit_sees_created_declared_element() {
        let dir = fixture();
        marketplace(
            dir.path(),
            "extras",
            r#"{"plugins": [{"name": "planned", "source": "./planned",
                             "commands": ["./commands/soon.md"]}]}"#,
        );
        std::fs::create_dir_all(dir.path().join("marketplaces/extras/planned")).unwrap();
        let service = PluginService::new(
            CatalogConfig::new(dir.path())
                .with_refresh(RefreshPolicy::Manual)
                .with_verify_on_hit(true),
        )
        .unwrap();

        let before = service.load_elements("planned", None).await.unwrap();
        assert_eq!(before.failures().count(), 1);

        write(
            &dir.path().join("marketplaces/extras/planned"),
            "commands/soon.md",
            "arrived",
        );
        let after = service.load_elements("planned", None).await.unwrap();
        assert_eq!(after.elements().map(|e| e.content.as_str()).collect::<Vec<_>>(), vec!["arrived"]);
        assert_eq!(service.cache_stats().loads, 2);
    }

    #[tokio::test]
    async fn test_manual_policy_serves_stale_until_refresh() {
        let dir = fixture();
        let service = PluginService::new(
            CatalogConfig::new(dir.path()).with_refresh(RefreshPolicy::Manual),
        )
        .unwrap();
        service.load_elements("formatter", None).await.unwrap();

        write(
            &dir.path().join("marketplaces/official/plugins/formatter"),
            "commands/new.md",
            "new",
        );
        let cached = service.load_elements("formatter", None).await.unwrap();
        assert_eq!(cached.records.len(), 3);

        assert_eq!(service.invalidate_plugin("formatter"), 1);
        let fresh = service.load_elements("formatter", None).await.unwrap();
        assert_eq!(fresh.records.len(), 4);
    }
}
