use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::thread;

use offline_update_transfer::progress::{Percent, ProgressEstimator, ProgressState};

#[test]
fn completion_fires_exactly_once() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("payload.cab"), vec![0u8; 4096]).unwrap();
    let estimator = ProgressEstimator::new(temp.path());

    let mut completed = Vec::new();
    for _ in 0..6 {
        estimator.scan(|file| completed.push(file.clone()));
    }

    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].size, 4096);
    assert_eq!(estimator.completed_count(), 1);
}

#[test]
fn growing_file_completes_only_after_it_stops() {
    let mut state = ProgressState::default();
    let path = PathBuf::from("/out/Updates/big.bin");

    assert!(state.apply_scan(&[(path.clone(), 10)]).is_empty());
    assert!(state.apply_scan(&[(path.clone(), 20)]).is_empty());
    assert!(state.apply_scan(&[(path.clone(), 30)]).is_empty());
    assert!(state.apply_scan(&[(path.clone(), 30)]).is_empty());
    let done = state.apply_scan(&[(path.clone(), 30)]);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].size, 30);
    assert!(state.apply_scan(&[(path, 30)]).is_empty());
}

#[test]
fn percent_is_floored_and_held_below_complete() {
    assert_eq!(Percent::estimate(0, Some(1000)), Percent::Known(0));
    assert_eq!(Percent::estimate(333, Some(1000)), Percent::Known(33));
    assert_eq!(Percent::estimate(999, Some(1000)), Percent::Known(99));
    assert_eq!(Percent::estimate(1000, Some(1000)), Percent::Known(99));
    assert_eq!(Percent::estimate(5000, Some(1000)), Percent::Known(99));
    assert_eq!(Percent::estimate(100, None), Percent::Indeterminate);
    assert_eq!(Percent::estimate(100, Some(0)), Percent::Indeterminate);
    assert_eq!(Percent::COMPLETE.value(), Some(100));
}

#[test]
fn unknown_total_stays_indeterminate_until_tool_reports_one() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("a.bin"), vec![0u8; 1024 * 1024]).unwrap();
    let estimator = ProgressEstimator::new(temp.path());

    estimator.scan(|_| {});
    assert_eq!(estimator.percent(), Percent::Indeterminate);

    let hint = estimator.observe_line("Downloading 0.5 MB of 4 MB");
    assert_eq!(hint.expected_total, Some(4 * 1024 * 1024));
    assert_eq!(estimator.percent(), Percent::Known(25));

    // Last write wins.
    estimator.observe_line("Downloading 1 MB of 2 MB");
    assert_eq!(estimator.percent(), Percent::Known(50));

    let hint = estimator.observe_line("garbage line");
    assert_eq!(hint.percent, None);
    assert_eq!(estimator.expected_total_bytes(), Some(2 * 1024 * 1024));
}

#[test]
fn percent_does_not_decrease_while_files_grow() {
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("Updates").join("part.bin");
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::write(&target, b"").unwrap();

    let estimator = ProgressEstimator::new(temp.path());
    estimator.observe_line("0 MB of 1 MB");

    let mut last = 0;
    for _ in 0..8 {
        let mut file = OpenOptions::new().append(true).open(&target).unwrap();
        file.write_all(&vec![1u8; 100 * 1024]).unwrap();
        drop(file);
        estimator.scan(|_| {});
        let current = estimator.percent().value().unwrap();
        assert!(current >= last, "{current} < {last}");
        last = current;
    }
    assert_eq!(last, 78);
    assert_eq!(estimator.observed_bytes(), 800 * 1024);
}

#[test]
fn lines_and_scans_interleave_across_threads() {
    let temp = tempfile::tempdir().unwrap();
    for index in 0..5 {
        fs::write(temp.path().join(format!("{index}.cab")), vec![0u8; 2048]).unwrap();
    }
    let estimator = ProgressEstimator::new(temp.path());

    let completions = thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for _ in 0..200 {
                estimator.observe_line("progress 10 MB of 20 MB 50%");
            }
        });
        let mut completions = 0;
        for _ in 0..20 {
            completions += estimator.scan(|_| {});
        }
        writer.join().unwrap();
        completions
    });

    assert_eq!(completions, 5);
    assert_eq!(estimator.observed_bytes(), 5 * 2048);
    assert_eq!(estimator.expected_total_bytes(), Some(20 * 1024 * 1024));
}

#[test]
fn unreadable_root_is_an_empty_scan() {
    let estimator = ProgressEstimator::new("/definitely/not/here");
    assert_eq!(estimator.scan(|_| {}), 0);
    assert_eq!(estimator.observed_bytes(), 0);
}
