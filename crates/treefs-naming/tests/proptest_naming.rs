//! Property-based tests for treefs-naming using proptest.
//!
//! These tests check path normalization, the directory tree and the lock
//! state against randomly generated inputs.

use std::collections::BTreeSet;

use proptest::prelude::*;
use treefs_naming::directory::PathHierarchy;
use treefs_naming::{EntryKind, LockMode, MemoryStorageServer, NamingConfig, NamingService, Path};

/// Generator for a single path component.
fn any_component() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.-]{0,6}".prop_filter("dot components are rejected", |c| c != "." && c != "..")
}

/// Generator for paths below root, 1 to 4 components deep.
fn any_components() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(any_component(), 1..5)
}

fn to_path(components: &[String]) -> Path {
    Path::parse(&format!("/data/{}", components.join("/"))).unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Extra and trailing slashes never change the parsed path, and the
    /// display form parses back to the same path.
    #[test]
    fn test_path_normalization(components in any_components()) {
        let canonical = to_path(&components);
        let sloppy = format!("//data//{}/", components.join("///"));
        prop_assert_eq!(Path::parse(&sloppy).unwrap(), canonical.clone());
        prop_assert_eq!(Path::parse(&canonical.to_string()).unwrap(), canonical.clone());
        prop_assert_eq!(canonical.depth(), components.len());
    }

    /// Every ancestor of a path is a subpath-prefix of it, and parents chain
    /// back to root in `depth` steps.
    #[test]
    fn test_ancestors_chain_to_root(components in any_components()) {
        let path = to_path(&components);
        let ancestors = path.ancestors();
        prop_assert_eq!(ancestors.len(), path.depth());
        prop_assert!(ancestors[0].is_root());
        for ancestor in &ancestors {
            prop_assert!(path.is_subpath_of(ancestor));
        }

        let mut current = path.clone();
        let mut steps = 0;
        while let Some(parent) = current.parent() {
            current = parent;
            steps += 1;
        }
        prop_assert!(current.is_root());
        prop_assert_eq!(steps, path.depth());
    }

    /// Listing never repeats a name regardless of insertion order, and
    /// lists exactly the first components that were inserted.
    #[test]
    fn test_root_listing_has_no_duplicates(
        files in proptest::collection::vec(any_components(), 1..30),
    ) {
        let tree = PathHierarchy::new();
        let mut accepted = BTreeSet::new();
        for components in &files {
            if tree.insert(&to_path(components), EntryKind::File).is_ok() {
                accepted.insert(components[0].clone());
            }
        }

        let names = tree.list_children(&Path::root()).unwrap();
        let unique: BTreeSet<String> = names.iter().cloned().collect();
        prop_assert_eq!(unique.len(), names.len());
        prop_assert_eq!(unique, accepted);
    }

    /// Any balanced sequence of lock/unlock pairs through the facade leaves
    /// no holders behind.
    #[test]
    fn test_lock_unlock_restores_state(
        files in proptest::collection::vec(any_components(), 1..6),
        modes in proptest::collection::vec(any::<bool>(), 1..10),
    ) {
        let rt = runtime();
        let result: Result<(), TestCaseError> = rt.block_on(async {
            let paths: Vec<Path> = files.iter().map(|c| to_path(c)).collect();
            let server = std::sync::Arc::new(MemoryStorageServer::new());
            let service = NamingService::start(NamingConfig::default()).unwrap();
            service
                .register(server.clone(), server, 1, paths.clone())
                .await
                .unwrap();

            let before = service.lock_state().await.unwrap();
            for (i, exclusive) in modes.iter().enumerate() {
                let path = Path::root().join(&files[i % files.len()][0]).unwrap();
                let mode = LockMode::from_exclusive(*exclusive);
                service.lock(&path, mode).await.unwrap();
                service.unlock(&path, mode).await.unwrap();
            }
            let after = service.lock_state().await.unwrap();
            prop_assert_eq!(&after.exclusive_held, &before.exclusive_held);
            prop_assert_eq!(&after.shared_held, &before.shared_held);
            prop_assert_eq!(&after.intention_held, &before.intention_held);
            service.shutdown().await;
            Ok(())
        });
        result?;
    }
}
