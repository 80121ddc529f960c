use common::audit::AuditEvent;
use serde_json::json;

use crate::common::{CRS_A, CRS_B, TestApp, routes};

#[tokio::test]
async fn bundle_groups_own_submissions() {
    let app = TestApp::spawn().await;
    let task_id = app.create_task(TestApp::open_deadline()).await;
    let pov_id = app.create_pov(task_id, CRS_A).await;
    let patch_id = app.create_patch(task_id, CRS_A).await;

    let res = app
        .post_as(
            &routes::bundles(task_id),
            &json!({"pov_id": pov_id, "patch_id": patch_id}),
            CRS_A,
        )
        .await;

    assert_eq!(res.status, 200, "{}", res.text);
    assert_eq!(res.body["status"], "accepted");
    let bundle_id = res.uuid("bundle_id");

    let got = app.get_as(&routes::bundle(task_id, bundle_id), CRS_A).await;
    assert_eq!(got.status, 200);
    assert_eq!(got.body["pov_id"], pov_id.to_string());
    assert_eq!(got.body["patch_id"], patch_id.to_string());
    assert!(got.body["description"].is_null());
}

#[tokio::test]
async fn bundle_cannot_reference_another_teams_patch() {
    let app = TestApp::spawn().await;
    let task_id = app.create_task(TestApp::open_deadline()).await;
    let pov_id = app.create_pov(task_id, CRS_B).await;
    let foreign_patch = app.create_patch(task_id, CRS_A).await;

    let res = app
        .post_as(
            &routes::bundles(task_id),
            &json!({"pov_id": pov_id, "patch_id": foreign_patch}),
            CRS_B,
        )
        .await;

    assert_eq!(res.status, 404, "{}", res.text);
    assert_eq!(res.body["message"], "patch_id not found");
}

#[tokio::test]
async fn bundle_needs_two_fields() {
    let app = TestApp::spawn().await;
    let task_id = app.create_task(TestApp::open_deadline()).await;
    let pov_id = app.create_pov(task_id, CRS_A).await;

    let res = app
        .post_as(&routes::bundles(task_id), &json!({"pov_id": pov_id}), CRS_A)
        .await;

    assert_eq!(res.status, 400);
    assert_eq!(res.body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn patch_updates_keep_absent_fields_and_clear_nulls() {
    let app = TestApp::spawn().await;
    let task_id = app.create_task(TestApp::open_deadline()).await;
    let pov_id = app.create_pov(task_id, CRS_A).await;
    let patch_id = app.create_patch(task_id, CRS_A).await;
    let created = app
        .post_as(
            &routes::bundles(task_id),
            &json!({"pov_id": pov_id, "patch_id": patch_id, "description": "overflow"}),
            CRS_A,
        )
        .await;
    let bundle_id = created.uuid("bundle_id");

    let res = app
        .patch_as(
            &routes::bundle(task_id, bundle_id),
            &json!({"description": null}),
            CRS_A,
        )
        .await;

    assert_eq!(res.status, 200, "{}", res.text);
    assert!(res.body["description"].is_null());
    assert_eq!(res.body["pov_id"], pov_id.to_string());
    assert_eq!(res.body["patch_id"], patch_id.to_string());

    // Clearing down to a single field is refused.
    let res = app
        .patch_as(&routes::bundle(task_id, bundle_id), &json!({"patch_id": null}), CRS_A)
        .await;
    assert_eq!(res.status, 400);
}

#[tokio::test]
async fn delete_removes_only_the_bundle() {
    let app = TestApp::spawn().await;
    let task_id = app.create_task(TestApp::open_deadline()).await;
    let pov_id = app.create_pov(task_id, CRS_A).await;
    let created = app
        .post_as(
            &routes::bundles(task_id),
            &json!({"pov_id": pov_id, "description": "crash in png_read_row"}),
            CRS_A,
        )
        .await;
    let bundle_id = created.uuid("bundle_id");

    let other = app.delete_as(&routes::bundle(task_id, bundle_id), CRS_B).await;
    assert_eq!(other.status, 404);

    let res = app.delete_as(&routes::bundle(task_id, bundle_id), CRS_A).await;
    assert_eq!(res.status, 204);

    let gone = app.get_as(&routes::bundle(task_id, bundle_id), CRS_A).await;
    assert_eq!(gone.status, 404);
    let pov = app.get_as(&routes::pov_status(task_id, pov_id), CRS_A).await;
    assert_eq!(pov.status, 200);

    assert!(
        app.audit_records()
            .iter()
            .any(|r| matches!(&r.event, AuditEvent::BundleDelete(e) if e.bundle_id == bundle_id))
    );
}

#[tokio::test]
async fn bundles_freeze_after_the_deadline() {
    let app = TestApp::spawn().await;
    let task_id = app.create_task(TestApp::past_deadline()).await;
    let pov_id = app.create_pov(task_id, CRS_A).await;

    let created = app
        .post_as(
            &routes::bundles(task_id),
            &json!({"pov_id": pov_id, "description": "late"}),
            CRS_A,
        )
        .await;
    assert_eq!(created.status, 200, "{}", created.text);
    assert_eq!(created.body["status"], "deadline_exceeded");
    let bundle_id = created.uuid("bundle_id");

    let update = app
        .patch_as(
            &routes::bundle(task_id, bundle_id),
            &json!({"description": "later"}),
            CRS_A,
        )
        .await;
    assert_eq!(update.status, 400);

    let delete = app.delete_as(&routes::bundle(task_id, bundle_id), CRS_A).await;
    assert_eq!(delete.status, 400);
}
