//! Concurrency tests for the naming scheme and the shared manifest.
//!
//! The store's only shared mutable state is the manifest's concurrent maps
//! and the physical namespace guarded by atomic name reservation. These
//! tests hammer both from many threads and check that no two callers ever
//! collide and no registration is lost.

#![cfg(unix)]

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use shroud_core::manifest::{LogicalPath, Manifest, Upsert};
use shroud_core::naming::{self, EntryType};
use shroud_core::{Egressor, Ingestor, StoreKey, store};

#[test]
fn concurrent_reservations_never_collide() {
    let store_dir = TempDir::new().unwrap();
    let root = Arc::new(store_dir.path().to_path_buf());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let root = Arc::clone(&root);
        handles.push(thread::spawn(move || {
            let mut reserved = Vec::new();
            for _ in 0..50 {
                let slot = naming::reserve_unique(&root, EntryType::Regular).unwrap();
                reserved.push(slot.relative);
            }
            reserved
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for relative in handle.join().unwrap() {
            assert!(seen.insert(relative.clone()), "duplicate slot {relative:?}");
        }
    }
    assert_eq!(seen.len(), 8 * 50);
}

#[test]
fn concurrent_upserts_build_a_consistent_tree() {
    let manifest = Arc::new(Manifest::empty("/store"));

    let mut handles = Vec::new();
    for worker in 0..8 {
        let manifest = Arc::clone(&manifest);
        handles.push(thread::spawn(move || {
            for file in 0..25 {
                let parent = LogicalPath::parse(&format!("w{worker}/d{}", file % 5)).unwrap();
                manifest
                    .upsert_file(
                        &parent,
                        &format!("f{file}"),
                        Path::new("ab/cdef.mydat"),
                    )
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(manifest.file_count(), 8 * 25);
    for worker in 0..8 {
        for dir in 0..5 {
            let path = LogicalPath::parse(&format!("w{worker}/d{dir}")).unwrap();
            let listing = manifest.find_directory(&path).unwrap();
            assert_eq!(listing.files.len(), 5);
        }
    }
}

#[test]
fn racing_writers_to_one_logical_path_resolve_last_wins() {
    let manifest = Arc::new(Manifest::empty("/store"));
    let parent = LogicalPath::parse("shared").unwrap();

    let mut handles = Vec::new();
    for worker in 0..8 {
        let manifest = Arc::clone(&manifest);
        let parent = parent.clone();
        handles.push(thread::spawn(move || {
            let physical = format!("aa/{worker:030}.mydat");
            manifest
                .upsert_file(&parent, "contended", Path::new(&physical))
                .unwrap()
        }));
    }
    let outcomes: Vec<Upsert> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // exactly one writer created the entry, the rest replaced it
    let created = outcomes.iter().filter(|u| **u == Upsert::Created).count();
    assert_eq!(created, 1);
    assert_eq!(manifest.file_count(), 1);
    // the survivor is one of the racers' blobs
    let referenced = manifest.referenced_physical_paths();
    assert_eq!(referenced.len(), 1);
}

#[test]
fn parallel_ingest_registers_every_file() {
    let key = StoreKey::from_passphrase("justdoit").unwrap();
    let source_dir = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();

    let source = source_dir.path().join("bulk");
    for dir in 0..4 {
        let sub = source.join(format!("d{dir}"));
        fs::create_dir_all(&sub).unwrap();
        for file in 0..25 {
            fs::write(sub.join(format!("f{file}.txt")), format!("{dir}:{file}")).unwrap();
        }
    }

    let store_root = store_dir.path().join("locked");
    store::init(&store_root).unwrap();

    let summary = Ingestor::new(&source, &store_root, key.clone())
        .with_threads(8)
        .run()
        .unwrap();
    assert_eq!(summary.added, 100);
    assert_eq!(summary.processed(), 100);
    assert_eq!(summary.commit.orphaned, 0);

    let dest_dir = TempDir::new().unwrap();
    let dest = dest_dir.path().join("out");
    let restored = Egressor::new(&store_root, &dest, key)
        .with_threads(8)
        .run()
        .unwrap();
    assert_eq!(restored.restored, 100);

    for dir in 0..4 {
        for file in 0..25 {
            let path = dest.join(format!("bulk/d{dir}/f{file}.txt"));
            assert_eq!(fs::read_to_string(path).unwrap(), format!("{dir}:{file}"));
        }
    }
}
