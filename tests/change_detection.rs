use std::error::Error;
use std::fs;
use std::path::Path;

use tempfile::tempdir;

use testrelay::config::WatchSection;
use testrelay::engine::FileChangeKind;
use testrelay::watch::{compute_file_hash, ContentHashes, ModePatterns, WatchPatterns};
use testrelay::types::ServerMode;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn only_material_changes_count() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("FooTest.java");
    fs::write(&path, "class FooTest {}")?;

    let mut hashes = ContentHashes::new();
    assert!(hashes.observe(&path, FileChangeKind::Created), "first sighting");
    assert!(!hashes.observe(&path, FileChangeKind::Modified), "touched, same bytes");

    fs::write(&path, "class FooTest { }")?;
    assert!(hashes.observe(&path, FileChangeKind::Modified));
    assert_eq!(hashes.len(), 1);

    fs::remove_file(&path)?;
    assert!(hashes.observe(&path, FileChangeKind::Removed));
    assert!(hashes.is_empty());
    Ok(())
}

#[test]
fn unreadable_file_counts_as_removed() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("Gone.java");
    fs::write(&path, "x")?;

    let mut hashes = ContentHashes::new();
    hashes.observe(&path, FileChangeKind::Created);
    fs::remove_file(&path)?;

    assert!(hashes.observe(&path, FileChangeKind::Modified));
    assert!(hashes.is_empty());
    Ok(())
}

#[test]
fn hash_tracks_content() -> TestResult {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::write(&a, "same")?;
    fs::write(&b, "same")?;

    assert_eq!(compute_file_hash(&a)?, compute_file_hash(&b)?);
    fs::write(&b, "different")?;
    assert_ne!(compute_file_hash(&a)?, compute_file_hash(&b)?);
    assert!(compute_file_hash(&dir.path().join("missing")).is_err());
    Ok(())
}

#[test]
fn patterns_match_relative_to_root() -> TestResult {
    let patterns = WatchPatterns::compile(
        &["src/test/**/*.java".to_string()],
        &["**/generated/**".to_string()],
    )?;
    let root = Path::new("/work/project");

    assert!(patterns.matches(root, Path::new("/work/project/src/test/java/FooTest.java")));
    assert!(!patterns.matches(root, Path::new("/work/project/src/main/java/Foo.java")));
    assert!(!patterns.matches(
        root,
        Path::new("/work/project/src/test/generated/BarTest.java")
    ));
    assert!(!patterns.matches(root, Path::new("/elsewhere/src/test/FooTest.java")));
    Ok(())
}

#[test]
fn mode_selects_pattern_family() -> TestResult {
    let watch = WatchSection {
        patterns: vec!["**/*Test.java".to_string()],
        light_weight_patterns: vec![],
        ..WatchSection::default()
    };
    let patterns = ModePatterns::from_config(&watch)?;

    assert!(!patterns.for_mode(ServerMode::Standard).is_empty());
    assert!(!patterns.for_mode(ServerMode::Unknown).is_empty());
    assert!(patterns.for_mode(ServerMode::LightWeight).is_empty());
    assert!(patterns.for_mode(ServerMode::Hybrid).is_empty());
    Ok(())
}
