use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use common::audit::AuditEvent;
use common::storage::ContentHash;
use common::task::{SourceType, TaskType};
use sea_orm::EntityTrait;
use server::entity::task::{self, StoredSource};
use server::tasking::ScanRequest;
use tempfile::TempDir;

use crate::common::{ROUND, TestApp};

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git runs");
    assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn init_repo(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "--quiet", "-b", "main"]);
}

fn commit_all(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// A libpng challenge with two commits and a local fuzz-tooling repo.
struct Challenge {
    _repos: TempDir,
    repo: PathBuf,
    base: String,
    head: String,
}

impl Challenge {
    fn new() -> Self {
        let repos = tempfile::tempdir().unwrap();

        let fuzz = repos.path().join("oss-fuzz");
        init_repo(&fuzz);
        write(&fuzz, "projects/libpng/project.yaml", "language: c\n");
        write(&fuzz, ".aixcc/notes", "platform only\n");
        commit_all(&fuzz, "tooling");

        let repo = repos.path().join("libpng");
        init_repo(&repo);
        let descriptor = format!(
            "fuzz_tooling_url: {}\nfuzz_tooling_ref: main\nproject_name: libpng\n",
            fuzz.display()
        );
        write(&repo, ".aixcc/challenge.yaml", &descriptor);
        write(&repo, "png.c", "int png(void) { return 0; }\n");
        let base = commit_all(&repo, "base");
        write(
            &repo,
            ".aixcc/challenge.yaml",
            &format!("{descriptor}harnesses_list:\n  - name: png_read_fuzzer\n"),
        );
        write(&repo, "png.c", "int png(void) { return 1; }\n");
        let head = commit_all(&repo, "head");

        Self {
            _repos: repos,
            repo,
            base,
            head,
        }
    }

    fn delta(&self, app: &TestApp) -> ScanRequest {
        ScanRequest {
            base_ref: Some(self.base.clone()),
            ..self.full(app)
        }
    }

    fn full(&self, app: &TestApp) -> ScanRequest {
        ScanRequest {
            repo_url: self.repo.display().to_string(),
            head_ref: self.head.clone(),
            base_ref: None,
            deadline: TestApp::open_deadline(),
            round_id: ROUND.into(),
            targets: app.state.config.competition.tasked_targets(),
            requested_by: None,
        }
    }
}

/// Entries of a stored `.tar.gz`, as `(path, contents)`.
async fn archive(app: &TestApp, hex: &str) -> Vec<(String, String)> {
    let key = ContentHash::from_hex(hex).unwrap();
    let bytes = app.state.store.get(&key).await.unwrap();
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(bytes.as_slice()));
    let mut entries = Vec::new();
    for entry in tar.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().display().to_string();
        let mut content = String::new();
        if entry.header().entry_type().is_file() {
            entry.read_to_string(&mut content).unwrap();
        }
        entries.push((path, content));
    }
    entries
}

fn source_hash(sources: &[StoredSource], kind: SourceType) -> String {
    sources
        .iter()
        .find(|s| s.kind == kind)
        .map(|s| s.content_hash.clone())
        .unwrap_or_else(|| panic!("no {kind:?} source"))
}

fn scratch_is_empty(app: &TestApp) -> bool {
    let work_dir = Path::new(&app.state.config.tasking.work_dir);
    std::fs::read_dir(work_dir).map(|d| d.count()).unwrap_or(0) == 0
}

#[tokio::test]
async fn delta_scan_creates_and_delivers_a_task() {
    let app = TestApp::spawn().await;
    let challenge = Challenge::new();

    let row = app
        .state
        .tasking
        .scan(challenge.delta(&app))
        .await
        .expect("scan succeeds");

    assert_eq!(row.task_type, TaskType::Delta);
    assert_eq!(row.commit, challenge.head);
    assert_eq!(row.focus, "libpng");
    assert_eq!(row.project_name, "libpng");
    assert!(row.base_hash.is_some());
    let sources: Vec<StoredSource> = row.stored_sources().unwrap();
    assert_eq!(sources.len(), 3);

    let jobs = app.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].args.first().map(String::as_str), Some("broadcast"));
    assert_eq!(jobs[0].arg_value("--route"), Some("/v1/task/"));
    assert_eq!(
        jobs[0].arg_value("--task-id"),
        Some(row.id.to_string().as_str())
    );

    assert!(
        app.audit_records()
            .iter()
            .any(|r| matches!(r.event, AuditEvent::NewDeltaScan(_)) && r.task_id == Some(row.id))
    );
    assert!(scratch_is_empty(&app));
}

#[tokio::test]
async fn full_scan_delivers_the_head_without_a_diff() {
    let app = TestApp::spawn().await;
    let challenge = Challenge::new();

    let row = app
        .state
        .tasking
        .scan(challenge.full(&app))
        .await
        .expect("scan succeeds");

    assert_eq!(row.task_type, TaskType::Full);
    assert!(row.base_hash.is_none());
    let sources = row.stored_sources().unwrap();
    let kinds: Vec<SourceType> = sources.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![SourceType::Repo, SourceType::FuzzTooling]);

    let repo = archive(&app, &source_hash(&sources, SourceType::Repo)).await;
    assert!(repo.iter().all(|(path, _)| path.starts_with("libpng")));
    let png = repo
        .iter()
        .find(|(path, _)| path == "libpng/png.c")
        .expect("focus directory holds the sources");
    assert_eq!(png.1, "int png(void) { return 1; }\n");

    let records = app.audit_records();
    assert!(
        records
            .iter()
            .any(|r| matches!(r.event, AuditEvent::NewFullScan(_)) && r.task_id == Some(row.id))
    );
    assert!(!records.iter().any(|r| matches!(r.event, AuditEvent::NewDeltaScan(_))));
}

#[tokio::test]
async fn delivered_sources_leave_out_stripped_paths() {
    let app = TestApp::spawn().await;
    let challenge = Challenge::new();

    let row = app.state.tasking.scan(challenge.delta(&app)).await.unwrap();
    let sources = row.stored_sources().unwrap();

    let repo = archive(&app, &source_hash(&sources, SourceType::Repo)).await;
    assert!(repo.iter().any(|(path, _)| path == "libpng/png.c"));
    // A delta task ships the base commit.
    let png = repo.iter().find(|(path, _)| path == "libpng/png.c").unwrap();
    assert_eq!(png.1, "int png(void) { return 0; }\n");
    assert!(
        !repo
            .iter()
            .any(|(path, _)| path.starts_with("libpng/.aixcc") || path.starts_with("libpng/.git"))
    );

    let fuzz = archive(&app, &source_hash(&sources, SourceType::FuzzTooling)).await;
    assert!(
        fuzz.iter()
            .any(|(path, _)| path == "fuzz-tooling/projects/libpng/project.yaml")
    );
    assert!(!fuzz.iter().any(|(path, _)| {
        path.starts_with("fuzz-tooling/.aixcc") || path.starts_with("fuzz-tooling/.git")
    }));

    let diff = archive(&app, &source_hash(&sources, SourceType::Diff)).await;
    let (_, patch) = diff
        .iter()
        .find(|(path, _)| path == "diff/ref.diff")
        .expect("diff archive holds ref.diff");
    assert!(patch.contains("png.c"));
    assert!(!patch.contains(".aixcc"));
}

#[tokio::test]
async fn rescanning_a_commit_reproduces_the_delivered_archives() {
    let app = TestApp::spawn().await;
    let challenge = Challenge::new();

    let first = app.state.tasking.scan(challenge.delta(&app)).await.unwrap();
    let second = app.state.tasking.scan(challenge.delta(&app)).await.unwrap();

    assert_ne!(first.id, second.id);
    // Unstripped archives carry per-clone git metadata; only the stripped
    // sources competitors download are compared.
    assert_eq!(first.fuzz_tooling_hash, second.fuzz_tooling_hash);
    assert_eq!(first.stored_sources().unwrap(), second.stored_sources().unwrap());
}

#[tokio::test]
async fn failed_scan_writes_no_task() {
    let app = TestApp::spawn().await;
    let repos = tempfile::tempdir().unwrap();
    let repo = repos.path().join("nodescriptor");
    init_repo(&repo);
    write(&repo, "README", "no challenge descriptor here\n");
    let head = commit_all(&repo, "init");

    let result = app
        .state
        .tasking
        .scan(ScanRequest {
            repo_url: repo.display().to_string(),
            head_ref: head,
            base_ref: None,
            deadline: TestApp::open_deadline(),
            round_id: ROUND.into(),
            targets: app.state.config.competition.tasked_targets(),
            requested_by: None,
        })
        .await;

    assert!(result.is_err());
    assert!(app.jobs().is_empty());
    assert!(scratch_is_empty(&app));
}

#[tokio::test]
async fn refused_delivery_rolls_the_task_back() {
    let app = TestApp::spawn().await;
    let challenge = Challenge::new();
    app.launcher.refuse_launches(true);

    let result = app.state.tasking.scan(challenge.delta(&app)).await;

    assert!(result.is_err());
    let tasks = task::Entity::find().all(&app.db).await.unwrap();
    assert!(tasks.is_empty());
    assert!(!app.audit_records().iter().any(|r| matches!(
        r.event,
        AuditEvent::NewDeltaScan(_) | AuditEvent::FileArchived(_)
    )));
    assert!(scratch_is_empty(&app));
}
