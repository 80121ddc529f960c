use common::SubmissionStatus;
use common::audit::{ArchivedFileKind, AuditEvent};
use common::eval::{
    Artifact, BlobRef, CommandResult, EntityType, EvalMessage, EvalPayload, Final, ResultContext,
};
use serde_json::json;
use server::consumers::eval_result::process_eval_message;
use uuid::Uuid;

use crate::common::{CRS_A, RUNNER, TestApp, routes};

async fn deliver(app: &TestApp, entity_type: EntityType, entity_id: Uuid, payload: EvalPayload) {
    process_eval_message(
        &app.state.db,
        &app.state.audit,
        EvalMessage {
            entity_type,
            entity_id,
            payload,
        },
    )
    .await
    .expect("message applied");
}

fn final_status(status: SubmissionStatus, patch_tests_failed: Option<bool>) -> EvalPayload {
    EvalPayload::Final(Final {
        status,
        patch_tests_failed,
    })
}

#[tokio::test]
async fn first_final_wins() {
    let app = TestApp::spawn().await;
    let task_id = app.create_task(TestApp::open_deadline()).await;
    let pov_id = app.create_pov(task_id, CRS_A).await;

    deliver(&app, EntityType::Pov, pov_id, final_status(SubmissionStatus::Passed, None)).await;
    deliver(&app, EntityType::Pov, pov_id, final_status(SubmissionStatus::Failed, None)).await;

    let res = app.get_as(&routes::pov_status(task_id, pov_id), CRS_A).await;
    assert_eq!(res.body["status"], "passed");

    let results: Vec<_> = app
        .audit_records()
        .into_iter()
        .filter(|r| matches!(r.event, AuditEvent::PovSubmissionResult(_)))
        .collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].team_id, Some(CRS_A.id));
    assert_eq!(results[0].task_id, Some(task_id));
}

#[tokio::test]
async fn patch_final_records_functionality_tests() {
    let app = TestApp::spawn().await;
    let task_id = app.create_task(TestApp::open_deadline()).await;
    let patch_id = app.create_patch(task_id, CRS_A).await;

    deliver(
        &app,
        EntityType::Patch,
        patch_id,
        final_status(SubmissionStatus::Passed, Some(false)),
    )
    .await;

    let res = app.get_as(&routes::patch_status(task_id, patch_id), CRS_A).await;
    assert_eq!(res.body["status"], "passed");
    assert_eq!(res.body["functionality_tests_passing"], true);
}

#[tokio::test]
async fn job_collects_artifacts_and_command_results() {
    let app = TestApp::spawn().await;
    let args = json!({
        "head_repo_hash": app.put_blob(b"head").await,
        "fuzz_tooling_hash": app.put_blob(b"fuzz").await,
        "focus": "libpng",
        "project_name": "libpng",
        "skip_patch_tests": true
    });
    let created = app.post_as(routes::JOB, &args, RUNNER).await;
    let job_id = created.uuid("id");

    deliver(
        &app,
        EntityType::Job,
        job_id,
        EvalPayload::CommandResult(CommandResult {
            argv: vec!["helper.py".into(), "build_fuzzers".into()],
            stdout_blob: BlobRef {
                object_name: "ab".repeat(32),
            },
            stderr_blob: BlobRef {
                object_name: "cd".repeat(32),
            },
            exit_code: 0,
            result_context: ResultContext::HeadRepoTest,
        }),
    )
    .await;
    deliver(
        &app,
        EntityType::Job,
        job_id,
        EvalPayload::Artifact(Artifact {
            result_context: ResultContext::HeadRepoTest,
            filename: "fuzz_output.txt".into(),
            blob: BlobRef {
                object_name: "ef".repeat(32),
            },
            archived_file_kind: ArchivedFileKind::FuzzOutHead,
        }),
    )
    .await;
    deliver(
        &app,
        EntityType::Job,
        job_id,
        final_status(SubmissionStatus::Failed, Some(true)),
    )
    .await;

    let res = app.get_as(&routes::job(job_id), RUNNER).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body["status"], "failed");
    // Skipped tests leave the flag unset.
    assert!(res.body.get("functionality_tests_passing").is_none());
    assert_eq!(res.body["results"][0]["argv"], json!(["helper.py", "build_fuzzers"]));
    assert_eq!(res.body["results"][0]["result_context"], "head_repo_test");
    assert_eq!(res.body["artifacts"][0]["archived_file_kind"], "fuzz_out_head");
}

#[tokio::test]
async fn final_for_unknown_entity_is_dropped() {
    let app = TestApp::spawn().await;

    deliver(
        &app,
        EntityType::Pov,
        Uuid::now_v7(),
        final_status(SubmissionStatus::Passed, None),
    )
    .await;

    assert!(app.audit_records().is_empty());
}
