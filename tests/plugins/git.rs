use hive_cli::core::error::HiveError;
use hive_cli::core::exec::command_exists;
use hive_cli::plugins::git::{clone_repo, get_codebase, head_commit};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn git(repo: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["-c", "user.name=hive", "-c", "user.email=hive@example.com"])
        .args(args)
        .output()
        .expect("git runs");
    assert!(
        status.status.success(),
        "git {:?}: {}",
        args,
        String::from_utf8_lossy(&status.stderr)
    );
}

fn init_repo(repo: &Path, with_commit: bool) {
    fs::create_dir_all(repo).unwrap();
    git(repo, &["init", "-q"]);
    git(repo, &["checkout", "-q", "-b", "main"]);
    if with_commit {
        fs::write(repo.join("evaluator.py"), "print(1)").unwrap();
        git(repo, &["add", "."]);
        git(repo, &["commit", "-q", "-m", "initial"]);
    }
}

#[test]
fn test_missing_local_source() {
    let tmp = tempdir().unwrap();
    let missing = tmp.path().join("nope");
    let err = get_codebase(&missing.to_string_lossy(), &tmp.path().join("dest"), "main")
        .unwrap_err();
    assert!(matches!(err, HiveError::NotFound(_)));
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn test_local_source_must_be_directory() {
    let tmp = tempdir().unwrap();
    let file = tmp.path().join("file.txt");
    fs::write(&file, "x").unwrap();
    let err = get_codebase(&file.to_string_lossy(), &tmp.path().join("dest"), "main")
        .unwrap_err();
    assert!(matches!(err, HiveError::NotADirectory(_)));
}

#[test]
fn test_plain_directory_gets_random_version() {
    let tmp = tempdir().unwrap();
    let src = tmp.path().join("src");
    fs::create_dir_all(src.join("pkg")).unwrap();
    fs::write(src.join("pkg/a.py"), "a").unwrap();
    let dest = tmp.path().join("dest");

    let version = get_codebase(&src.to_string_lossy(), &dest, "main").unwrap();
    assert_eq!(version.len(), 7);
    assert_eq!(fs::read_to_string(dest.join("pkg/a.py")).unwrap(), "a");
}

#[test]
fn test_local_git_repo_reports_full_head() {
    if !command_exists("git") {
        return;
    }
    let tmp = tempdir().unwrap();
    let src = tmp.path().join("src");
    init_repo(&src, true);
    let dest = tmp.path().join("dest");

    let version = get_codebase(&src.to_string_lossy(), &dest, "main").unwrap();
    assert_eq!(version, head_commit(&src).unwrap());
    assert_eq!(version.len(), 40);
    assert!(dest.join("evaluator.py").exists());
}

#[test]
fn test_clone_checks_out_branch() {
    if !command_exists("git") {
        return;
    }
    let tmp = tempdir().unwrap();
    let origin = tmp.path().join("origin");
    init_repo(&origin, true);
    git(&origin, &["checkout", "-q", "-b", "feature"]);
    fs::write(origin.join("feature.py"), "f").unwrap();
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "-q", "-m", "feature"]);
    let feature_head = head_commit(&origin).unwrap();
    git(&origin, &["checkout", "-q", "main"]);

    let dest = tmp.path().join("clone");
    let sha = clone_repo(&origin.to_string_lossy(), &dest, "feature").unwrap();
    assert_eq!(sha, feature_head);
    assert!(dest.join("feature.py").exists());
}

#[test]
fn test_clone_of_empty_repository() {
    if !command_exists("git") {
        return;
    }
    let tmp = tempdir().unwrap();
    let origin = tmp.path().join("empty");
    init_repo(&origin, false);

    let url = origin.to_string_lossy().into_owned();
    let err = clone_repo(&url, &tmp.path().join("clone"), "main").unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Validation error: Repository {} has no commits yet", url)
    );
}
