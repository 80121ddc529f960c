use common::SubmissionStatus;
use common::eval::{EntityType, EvalMessage, EvalPayload, Final};
use sea_orm::EntityTrait;
use serde_json::{Value, json};
use server::consumers::eval_result::process_eval_message;
use server::entity::job;

use crate::common::{RUNNER, TestApp, b64, routes};

async fn job_args(app: &TestApp) -> Value {
    json!({
        "head_repo_hash": app.put_blob(b"head").await,
        "fuzz_tooling_hash": app.put_blob(b"fuzz").await,
        "focus": "libpng",
        "project_name": "libpng",
        "pov": {
            "testcase": b64(b"crash"),
            "architecture": "x86_64",
            "sanitizer": "address",
            "harness": "png_read_fuzzer",
            "engine": "libfuzzer"
        }
    })
}

#[tokio::test]
async fn identical_jobs_are_served_from_cache() {
    let app = TestApp::spawn().await;
    let args = job_args(&app).await;

    let first = app.post_as(routes::JOB, &args, RUNNER).await;
    let second = app.post_as(routes::JOB, &args, RUNNER).await;

    assert_eq!(first.status, 200, "{}", first.text);
    assert_eq!(first.body["status"], "accepted");
    assert_eq!(first.uuid("id"), second.uuid("id"));
    let jobs = app.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(
        jobs[0].arg_value("--job-id"),
        Some(first.uuid("id").to_string().as_str())
    );
    assert_eq!(jobs[0].memory_gb, Some(8));
    assert_eq!(jobs[0].cpus, Some(4));
}

#[tokio::test]
async fn fresh_jobs_always_run() {
    let app = TestApp::spawn().await;
    let mut args = job_args(&app).await;
    args["fresh"] = json!(true);

    let first = app.post_as(routes::JOB, &args, RUNNER).await;
    let second = app.post_as(routes::JOB, &args, RUNNER).await;

    assert_ne!(first.uuid("id"), second.uuid("id"));
    assert_eq!(app.jobs().len(), 2);
}

#[tokio::test]
async fn malformed_hash_is_a_field_error() {
    let app = TestApp::spawn().await;
    let mut args = job_args(&app).await;
    args["head_repo_hash"] = json!("not-hex");

    let res = app.post_as(routes::JOB, &args, RUNNER).await;

    assert_eq!(res.status, 400);
    assert!(res.body["fields"]["head_repo_hash"].is_string(), "{}", res.text);
    assert!(app.jobs().is_empty());
}

#[tokio::test]
async fn bulk_rejects_empty_and_oversized_batches() {
    let app = TestApp::spawn().await;
    let args = job_args(&app).await;

    let empty = app.post_as(routes::JOB_BULK, &json!({"jobs": []}), RUNNER).await;
    let too_many = app
        .post_as(routes::JOB_BULK, &json!({"jobs": vec![args; 101]}), RUNNER)
        .await;

    assert_eq!(empty.status, 400);
    assert_eq!(too_many.status, 400);
    assert!(app.jobs().is_empty());
}

#[tokio::test]
async fn bulk_preserves_request_order() {
    let app = TestApp::spawn().await;
    let plain = job_args(&app).await;
    let mut keyed = plain.clone();
    keyed["cache_key"] = json!("second");

    let res = app
        .post_as(routes::JOB_BULK, &json!({"jobs": [plain.clone(), keyed, plain]}), RUNNER)
        .await;

    assert_eq!(res.status, 200, "{}", res.text);
    let jobs = res.body["jobs"].as_array().expect("jobs array");
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[0]["id"], jobs[2]["id"]);
    assert_ne!(jobs[0]["id"], jobs[1]["id"]);
    assert_eq!(app.jobs().len(), 2);
}

#[tokio::test]
async fn get_returns_the_job() {
    let app = TestApp::spawn().await;
    let created = app.post_as(routes::JOB, &job_args(&app).await, RUNNER).await;
    let job_id = created.uuid("id");

    let res = app.get_as(&routes::job(job_id), RUNNER).await;

    assert_eq!(res.status, 200);
    assert_eq!(res.uuid("id"), job_id);
    assert_eq!(res.body["artifacts"], json!([]));
    assert_eq!(res.body["results"], json!([]));
}

#[tokio::test]
async fn errored_job_is_run_again_under_the_same_id() {
    let app = TestApp::spawn().await;
    let args = job_args(&app).await;
    let first = app.post_as(routes::JOB, &args, RUNNER).await;
    let job_id = first.uuid("id");

    process_eval_message(
        &app.state.db,
        &app.state.audit,
        EvalMessage {
            entity_type: EntityType::Job,
            entity_id: job_id,
            payload: EvalPayload::Final(Final {
                status: SubmissionStatus::Errored,
                patch_tests_failed: None,
            }),
        },
    )
    .await
    .expect("final applied");

    let again = app.post_as(routes::JOB, &args, RUNNER).await;

    assert_eq!(again.status, 200, "{}", again.text);
    assert_eq!(again.uuid("id"), job_id);
    assert_eq!(again.body["status"], "accepted");
    let jobs = app.jobs();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[1].arg_value("--job-id"), Some(job_id.to_string().as_str()));
}

#[tokio::test]
async fn refused_launch_does_not_poison_the_cache_key() {
    let app = TestApp::spawn().await;
    let args = job_args(&app).await;

    app.launcher.refuse_launches(true);
    let refused = app.post_as(routes::JOB, &args, RUNNER).await;
    assert_eq!(refused.status, 500);
    let row = job::Entity::find()
        .one(&app.db)
        .await
        .unwrap()
        .expect("job row kept");
    assert_eq!(row.status, SubmissionStatus::Errored);

    app.launcher.refuse_launches(false);
    let retried = app.post_as(routes::JOB, &args, RUNNER).await;

    assert_eq!(retried.status, 200, "{}", retried.text);
    assert_eq!(retried.uuid("id"), row.id);
    assert_eq!(retried.body["status"], "accepted");
    assert_eq!(app.jobs().len(), 1);
}

#[tokio::test]
async fn finished_jobs_stay_cached() {
    let app = TestApp::spawn().await;
    let args = job_args(&app).await;
    let first = app.post_as(routes::JOB, &args, RUNNER).await;
    let job_id = first.uuid("id");
    process_eval_message(
        &app.state.db,
        &app.state.audit,
        EvalMessage {
            entity_type: EntityType::Job,
            entity_id: job_id,
            payload: EvalPayload::Final(Final {
                status: SubmissionStatus::Failed,
                patch_tests_failed: Some(false),
            }),
        },
    )
    .await
    .expect("final applied");

    let again = app.post_as(routes::JOB, &args, RUNNER).await;

    assert_eq!(again.uuid("id"), job_id);
    assert_eq!(again.body["status"], "failed");
    assert_eq!(app.jobs().len(), 1);
}
