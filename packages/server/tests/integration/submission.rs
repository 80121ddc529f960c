use common::SubmissionStatus;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use server::entity::{pov_submission, task};
use uuid::Uuid;

use crate::common::{
    CRS_A, CRS_B, ORGANIZER, TestApp, b64, patch_body, pov_body, routes, sarif_log,
};

const MAX_BLOB: usize = 2 * 1024 * 1024;

mod pov {
    use super::*;

    #[tokio::test]
    async fn accepted_pov_starts_an_evaluation() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;

        let res = app.post_as(&routes::pov(task_id), &pov_body(), CRS_A).await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["status"], "accepted");
        let pov_id = res.uuid("pov_id");

        let jobs = app.jobs();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.args.first().map(String::as_str), Some("eval"));
        assert_eq!(job.arg_value("--pov-id"), Some(pov_id.to_string().as_str()));
        assert_eq!(job.arg_value("--harness-name"), Some("png_read_fuzzer"));
        assert!(job.arg_value("--trigger-url").is_some());
        assert!(job.args.iter().any(|a| a == "--archive-s3"));
        assert_eq!(job.env_value("GAUNTLET_TEAM_ID"), Some(CRS_A.id.to_string().as_str()));
    }

    #[tokio::test]
    async fn fuzzer_name_is_accepted_for_harness() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;
        let mut body = pov_body();
        let harness = body["harness"].take();
        body.as_object_mut().unwrap().remove("harness");
        body["fuzzer_name"] = harness;

        let res = app.post_as(&routes::pov(task_id), &body, CRS_A).await;

        assert_eq!(res.status, 200, "{}", res.text);
    }

    #[tokio::test]
    async fn late_pov_is_stored_but_never_evaluated() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::past_deadline()).await;

        let res = app.post_as(&routes::pov(task_id), &pov_body(), CRS_A).await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["status"], "deadline_exceeded");
        assert!(app.jobs().is_empty());

        let status = app
            .get_as(&routes::pov_status(task_id, res.uuid("pov_id")), CRS_A)
            .await;
        assert_eq!(status.body["status"], "deadline_exceeded");
    }

    #[tokio::test]
    async fn invalid_base64_is_a_field_error() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;
        let mut body = pov_body();
        body["testcase"] = json!("%%% not base64 %%%");

        let res = app.post_as(&routes::pov(task_id), &body, CRS_A).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
        assert!(res.body["fields"]["testcase"].is_string(), "{}", res.text);
    }

    #[tokio::test]
    async fn testcase_may_be_exactly_two_mebibytes() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;
        let mut body = pov_body();
        body["testcase"] = json!(b64(&vec![b'A'; MAX_BLOB]));

        let res = app.post_as(&routes::pov(task_id), &body, CRS_A).await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(app.jobs().len(), 1);
    }

    #[tokio::test]
    async fn testcase_over_two_mebibytes_is_rejected() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;
        let mut body = pov_body();
        body["testcase"] = json!(b64(&vec![b'A'; MAX_BLOB + 1]));

        let res = app.post_as(&routes::pov(task_id), &body, CRS_A).await;

        assert_eq!(res.status, 400, "{}", res.text);
        assert!(res.body["fields"]["testcase"].is_string(), "{}", res.text);
        assert!(app.jobs().is_empty());
    }

    #[tokio::test]
    async fn task_with_unusable_resources_errors_the_pov() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;
        task::ActiveModel {
            id: Set(task_id),
            cpus: Set(-1),
            ..Default::default()
        }
        .update(&app.db)
        .await
        .unwrap();

        let res = app.post_as(&routes::pov(task_id), &pov_body(), CRS_A).await;

        assert_eq!(res.status, 500, "{}", res.text);
        assert!(app.jobs().is_empty());
        let rows = pov_submission::Entity::find().all(&app.db).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, SubmissionStatus::Errored);
    }

    #[tokio::test]
    async fn task_without_harnesses_refuses_povs() {
        let app = TestApp::spawn().await;
        let task_id = app
            .create_task_for(TestApp::open_deadline(), None, false)
            .await;

        let res = app.post_as(&routes::pov(task_id), &pov_body(), CRS_A).await;

        assert_eq!(res.status, 400);
        assert!(app.jobs().is_empty());
    }

    #[tokio::test]
    async fn other_teams_cannot_read_a_pov() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;
        let pov_id = app.create_pov(task_id, CRS_A).await;

        let own = app.get_as(&routes::pov_status(task_id, pov_id), CRS_A).await;
        let other = app.get_as(&routes::pov_status(task_id, pov_id), CRS_B).await;

        assert_eq!(own.status, 200);
        assert_eq!(other.status, 404);
    }

    #[tokio::test]
    async fn requested_tasks_are_private_to_the_requester() {
        let app = TestApp::spawn().await;
        let task_id = app
            .create_task_for(TestApp::open_deadline(), Some(CRS_A.id), true)
            .await;

        let owner = app.post_as(&routes::pov(task_id), &pov_body(), CRS_A).await;
        let other = app.post_as(&routes::pov(task_id), &pov_body(), CRS_B).await;

        assert_eq!(owner.status, 200, "{}", owner.text);
        assert_eq!(other.status, 404);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let app = TestApp::spawn().await;

        let res = app.post_as(&routes::pov(Uuid::now_v7()), &pov_body(), CRS_A).await;

        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }
}

mod patch {
    use super::*;

    #[tokio::test]
    async fn accepted_patch_is_evaluated_with_language_allowlist() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;

        let patch_id = app.create_patch(task_id, CRS_A).await;

        let jobs = app.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].arg_value("--patch-id"),
            Some(patch_id.to_string().as_str())
        );
        assert!(jobs[0].arg_value("--patch-url").is_some());
        assert!(jobs[0].arg_value("--trigger-url").is_none());

        let status = app.get_as(&routes::patch_status(task_id, patch_id), CRS_A).await;
        assert_eq!(status.status, 200);
        assert_eq!(status.body["status"], "accepted");
        assert!(status.body.get("functionality_tests_passing").is_none());
    }

    #[tokio::test]
    async fn patch_may_be_exactly_the_limit() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;
        let body = json!({"patch": b64(&vec![b'x'; 100 * 1024])});

        let res = app.post_as(&routes::patch(task_id), &body, CRS_A).await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(app.jobs().len(), 1);
    }

    #[tokio::test]
    async fn oversized_patch_is_rejected() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;
        let body = json!({"patch": b64(&vec![b'x'; 100 * 1024 + 1])});

        let res = app.post_as(&routes::patch(task_id), &body, CRS_A).await;

        assert_eq!(res.status, 400, "{}", res.text);
        assert!(app.jobs().is_empty());
    }

    #[tokio::test]
    async fn submission_is_audited() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;

        app.post_as(&routes::patch(task_id), &patch_body(), CRS_A).await;

        let records = app.audit_records();
        let patch = records
            .iter()
            .find(|r| matches!(r.event, common::audit::AuditEvent::PatchSubmission(_)))
            .expect("patch submission audited");
        assert_eq!(patch.team_id, Some(CRS_A.id));
        assert_eq!(patch.task_id, Some(task_id));
        assert!(
            records
                .iter()
                .any(|r| matches!(r.event, common::audit::AuditEvent::FileArchived(_)))
        );
    }
}

mod sarif {
    use super::*;

    #[tokio::test]
    async fn valid_sarif_is_stored() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;

        let res = app
            .post_as(&routes::submitted_sarif(task_id), &json!({"sarif": sarif_log()}), CRS_A)
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["status"], "accepted");
        res.uuid("submitted_sarif_id");
    }

    #[tokio::test]
    async fn malformed_sarif_reports_fields() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;
        let sarif = json!({"version": "1.0", "runs": [{"tool": {}}]});

        let res = app
            .post_as(&routes::submitted_sarif(task_id), &json!({"sarif": sarif}), CRS_A)
            .await;

        assert_eq!(res.status, 400);
        assert!(res.body["fields"]["sarif.version"].is_string(), "{}", res.text);
        assert!(res.body["fields"]["sarif.runs[0].tool.driver.name"].is_string());
    }

    #[tokio::test]
    async fn broadcast_is_delivered_once_and_can_be_assessed() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;
        let body = json!({"sarif": sarif_log()});

        let first = app.post_as(&routes::sarif_broadcast(task_id), &body, ORGANIZER).await;
        let second = app.post_as(&routes::sarif_broadcast(task_id), &body, ORGANIZER).await;

        assert_eq!(first.status, 200, "{}", first.text);
        assert_eq!(first.uuid("sarif_id"), second.uuid("sarif_id"));
        let broadcasts: Vec<_> = app
            .jobs()
            .into_iter()
            .filter(|j| j.args.first().map(String::as_str) == Some("broadcast"))
            .collect();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].arg_value("--route"), Some("/v1/sarif/"));

        let sarif_id = first.uuid("sarif_id");
        let assessed = app
            .post_as(
                &routes::assessment(task_id, sarif_id),
                &json!({"assessment": "correct", "description": "matches our crash"}),
                CRS_A,
            )
            .await;
        assert_eq!(assessed.status, 200, "{}", assessed.text);
        assert_eq!(assessed.body["status"], "accepted");

        let other_task = app.create_task(TestApp::open_deadline()).await;
        let wrong = app
            .post_as(
                &routes::assessment(other_task, sarif_id),
                &json!({"assessment": "incorrect"}),
                CRS_A,
            )
            .await;
        assert_eq!(wrong.status, 404);
    }
}

mod freeform {
    use super::*;

    #[tokio::test]
    async fn freeform_is_stored_without_evaluation() {
        let app = TestApp::spawn().await;
        let task_id = app
            .create_task_for(TestApp::open_deadline(), None, false)
            .await;

        let res = app
            .post_as(
                &routes::freeform(task_id),
                &json!({"submission": b64(b"look at png_read_row")}),
                CRS_A,
            )
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["status"], "accepted");
        res.uuid("freeform_id");
        assert!(app.jobs().is_empty());
    }

    #[tokio::test]
    async fn payload_may_be_exactly_two_mebibytes() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;

        let res = app
            .post_as(
                &routes::freeform(task_id),
                &json!({"submission": b64(&vec![b'A'; MAX_BLOB])}),
                CRS_A,
            )
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["status"], "accepted");
    }

    #[tokio::test]
    async fn payload_over_two_mebibytes_is_rejected() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;

        let res = app
            .post_as(
                &routes::freeform(task_id),
                &json!({"submission": b64(&vec![b'A'; MAX_BLOB + 1])}),
                CRS_A,
            )
            .await;

        assert_eq!(res.status, 400, "{}", res.text);
        assert!(res.body["fields"]["submission"].is_string(), "{}", res.text);
    }
}
