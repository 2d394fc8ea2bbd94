use std::fs;

use assert_matches::assert_matches;

use offline_update_transfer::artifact::{Resolution, resolve};
use offline_update_transfer::error::TransferError;

#[test]
fn largest_candidate_wins_regardless_of_order() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("tool/logs")).unwrap();
    fs::write(root.join("a.cab"), vec![1u8; 10 * 1024]).unwrap();
    fs::write(root.join("tool/logs/b.cab"), vec![2u8; 500 * 1024]).unwrap();
    fs::write(root.join("tool/logs/notes.txt"), vec![3u8; 900 * 1024]).unwrap();

    let expected = root.join("Transfer").join("UsageData.cab");
    let resolution = resolve(root, &expected, "*.cab").unwrap();

    assert_matches!(&resolution, Resolution::Relocated { from, .. } if from.ends_with("b.cab"));
    assert_eq!(resolution.path(), expected.as_path());
    assert_eq!(fs::read(&expected).unwrap(), vec![2u8; 500 * 1024]);
    assert!(!root.join("tool/logs/b.cab").exists());
    assert!(root.join("a.cab").exists());
}

#[test]
fn pattern_is_case_insensitive_and_ties_go_to_first_found() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("x")).unwrap();
    fs::write(root.join("a").with_extension("CAB"), b"same").unwrap();
    fs::write(root.join("x/b.cab"), b"same").unwrap();

    let expected = root.join("out/UsageData.cab");
    let resolution = resolve(root, &expected, "*.cab").unwrap();
    assert_matches!(resolution, Resolution::Relocated { from, .. } if from.ends_with("a.CAB"));
}

#[test]
fn existing_artifact_is_left_alone() {
    let temp = tempfile::tempdir().unwrap();
    let expected = temp.path().join("UsageData.cab");
    fs::write(&expected, b"small").unwrap();
    fs::write(temp.path().join("bigger.cab"), vec![0u8; 4096]).unwrap();

    let resolution = resolve(temp.path(), &expected, "*.cab").unwrap();
    assert_eq!(resolution, Resolution::InPlace { path: expected.clone() });
    assert_eq!(fs::read(&expected).unwrap(), b"small");
    assert!(temp.path().join("bigger.cab").exists());
}

#[test]
fn nothing_matching_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("readme.txt"), b"no cab here").unwrap();
    let expected = temp.path().join("UsageData.cab");

    let err = resolve(temp.path(), &expected, "*.cab").unwrap_err();
    assert_matches!(err, TransferError::ArtifactNotProduced { ref pattern, .. } if pattern == "*.cab");
    assert!(!expected.exists());
}
