use common::audit::AuditEvent;
use common::team::{CREDENTIALS_ENV, decode_targets};
use serde_json::json;
use server::dispatch::JobSpec;
use uuid::Uuid;

use crate::common::{CRS_A, CRS_B, ORGANIZER, TestApp, routes};

fn target_ids(job: &JobSpec) -> Vec<Uuid> {
    let encoded = job.env_value(CREDENTIALS_ENV).expect("credentials env set");
    decode_targets(encoded)
        .expect("credentials decode")
        .into_iter()
        .map(|t| t.team_id)
        .collect()
}

mod out_of_budget {
    use super::*;

    #[tokio::test]
    async fn is_recorded_in_the_audit_log() {
        let app = TestApp::spawn().await;

        let res = app
            .post_as(
                routes::OUT_OF_BUDGET,
                &json!({"competitor_id": CRS_A.id.to_string()}),
                ORGANIZER,
            )
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["status"], "recorded");
        let records = app.audit_records();
        let record = records
            .iter()
            .find(|r| matches!(r.event, AuditEvent::OutOfBudget(_)))
            .expect("out-of-budget audited");
        assert_eq!(record.team_id, Some(CRS_A.id));
    }
}

mod cancel {
    use super::*;

    #[tokio::test]
    async fn cancel_all_targets_every_tasked_team() {
        let app = TestApp::spawn().await;

        let res = app.delete_as(routes::CANCEL_ALL, ORGANIZER).await;

        assert_eq!(res.status, 202, "{}", res.text);
        let jobs = app.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].args.first().map(String::as_str), Some("cancel"));
        assert_eq!(jobs[0].arg_value("--route"), Some("/v1/task/"));
        let mut ids = target_ids(&jobs[0]);
        ids.sort();
        assert_eq!(ids, vec![CRS_A.id, CRS_B.id]);
    }

    #[tokio::test]
    async fn cancelling_a_requested_task_only_reaches_its_requester() {
        let app = TestApp::spawn().await;
        let task_id = app
            .create_task_for(TestApp::open_deadline(), Some(CRS_B.id), true)
            .await;

        let res = app.delete_as(&routes::cancel_task(task_id), ORGANIZER).await;

        assert_eq!(res.status, 202, "{}", res.text);
        let jobs = app.jobs();
        assert_eq!(jobs.len(), 1);
        let route = format!("/v1/task/{task_id}/");
        assert_eq!(jobs[0].arg_value("--route"), Some(route.as_str()));
        assert_eq!(
            jobs[0].arg_value("--task-id"),
            Some(task_id.to_string().as_str())
        );
        assert_eq!(target_ids(&jobs[0]), vec![CRS_B.id]);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let app = TestApp::spawn().await;

        let res = app.delete_as(&routes::cancel_task(Uuid::now_v7()), ORGANIZER).await;

        assert_eq!(res.status, 404);
        assert!(app.jobs().is_empty());
    }
}

mod requests {
    use super::*;

    #[tokio::test]
    async fn lists_configured_challenges() {
        let app = TestApp::spawn().await;

        let res = app.get_as(routes::REQUEST_LIST, CRS_A).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["challenges"], json!(["libpng"]));
    }

    #[tokio::test]
    async fn unknown_challenge_is_not_found() {
        let app = TestApp::spawn().await;

        let res = app.post_as(&routes::request("nope"), &json!({}), CRS_A).await;

        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn credentials_without_a_team_are_refused() {
        let app = TestApp::spawn_with(|config| config.competition.teams.clear()).await;

        let res = app.post_as(&routes::request("libpng"), &json!({}), CRS_A).await;

        assert_eq!(res.status, 403);
        assert!(app.state.runner.is_empty());
    }
}
