use serde_json::json;

use crate::common::{CRS_A, ORGANIZER, RUNNER, TestApp, pov_body, routes};

mod credentials {
    use super::*;
    use uuid::Uuid;

    fn protected() -> String {
        routes::pov_status(Uuid::now_v7(), Uuid::now_v7())
    }

    #[tokio::test]
    async fn ping_needs_no_credentials() {
        let app = TestApp::spawn().await;

        let res = app.get_without_auth(routes::PING).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["status"], "ready");
    }

    #[tokio::test]
    async fn valid_credentials_reach_the_handler() {
        let app = TestApp::spawn().await;

        let res = app.get_as(&protected(), CRS_A).await;

        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn missing_credentials_are_rejected() {
        let app = TestApp::spawn().await;

        let res = app.get_without_auth(&protected()).await;

        assert_eq!(res.status, 401);
        assert_eq!(res.body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn wrong_token_unknown_id_and_malformed_id_are_indistinguishable() {
        let app = TestApp::spawn().await;
        let path = protected();
        let known = CRS_A.id.to_string();
        let unknown = Uuid::now_v7().to_string();

        let wrong_token = app.get_with_credentials(&path, &known, "nope").await;
        let unknown_id = app.get_with_credentials(&path, &unknown, CRS_A.token).await;
        let malformed = app.get_with_credentials(&path, "not-a-uuid", CRS_A.token).await;

        for res in [&wrong_token, &unknown_id, &malformed] {
            assert_eq!(res.status, 401, "{}", res.text);
            assert_eq!(res.text, wrong_token.text);
        }
    }
}

mod permissions {
    use super::*;

    #[tokio::test]
    async fn submissions_require_the_crs_permission() {
        let app = TestApp::spawn().await;
        let task_id = app.create_task(TestApp::open_deadline()).await;

        let res = app.post_as(&routes::pov(task_id), &pov_body(), ORGANIZER).await;

        assert_eq!(res.status, 403);
        assert_eq!(res.body["code"], "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn competition_endpoints_require_competition_management() {
        let app = TestApp::spawn().await;

        let res = app
            .post_as(routes::OUT_OF_BUDGET, &json!({"competitor_id": "team"}), CRS_A)
            .await;

        assert_eq!(res.status, 403);
    }

    #[tokio::test]
    async fn job_runner_endpoints_require_job_runner() {
        let app = TestApp::spawn().await;

        let res = app.get_as(&routes::job(uuid::Uuid::now_v7()), CRS_A).await;
        assert_eq!(res.status, 403);

        let res = app.get_as(&routes::job(uuid::Uuid::now_v7()), RUNNER).await;
        assert_eq!(res.status, 404);
    }
}
