use anyhow::{Context, Result};
use axum::http::StatusCode;

mod common;
use common::{EchoModule, build_test_app, login, login_root};
use ptt_server::db;

#[tokio::test]
async fn deleting_a_user_hands_projects_to_the_fallback_owner() -> Result<()> {
    let app = build_test_app(vec![EchoModule::new("alpha")]).await?;
    let root = db::find_user_by_username(&app.state.pool, "root")
        .await?
        .context("root user missing")?;
    let alice = db::create_user(&app.state.pool, "alice", "alice-pass", false).await?;
    let project = db::create_project(&app.state.pool, "recon", &alice.id).await?;

    let root_cookie = login_root(&app.server).await?;
    let alice_cookie = login(&app.server, "alice", "alice-pass").await?;

    app.server
        .delete(&format!("/api/users/{}", root.id))
        .add_header("Cookie", alice_cookie.clone())
        .await
        .assert_status(StatusCode::FORBIDDEN);

    app.server
        .delete(&format!("/api/users/{}", alice.id))
        .add_header("Cookie", root_cookie.clone())
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let project = db::find_project(&app.state.pool, &project.id)
        .await?
        .context("project vanished with its owner")?;
    assert_eq!(project.owner_id, root.id);
    assert!(db::find_user_by_username(&app.state.pool, "alice").await?.is_none());

    app.server
        .get("/plugin/alpha/index")
        .add_header("Cookie", alice_cookie)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    app.server
        .delete(&format!("/api/users/{}", alice.id))
        .add_header("Cookie", root_cookie)
        .await
        .assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn admins_cannot_remove_themselves_or_the_fallback_owner() -> Result<()> {
    let app = build_test_app(vec![]).await?;
    let root = db::find_user_by_username(&app.state.pool, "root")
        .await?
        .context("root user missing")?;
    let ops = db::create_user(&app.state.pool, "ops", "ops-pass", true).await?;
    let root_cookie = login_root(&app.server).await?;
    let ops_cookie = login(&app.server, "ops", "ops-pass").await?;

    app.server
        .delete(&format!("/api/users/{}", root.id))
        .add_header("Cookie", root_cookie)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .delete(&format!("/api/users/{}", root.id))
        .add_header("Cookie", ops_cookie.clone())
        .await
        .assert_status(StatusCode::CONFLICT);
    assert!(db::find_user_by_username(&app.state.pool, "root").await?.is_some());

    app.server
        .get("/api/modules")
        .add_header("Cookie", ops_cookie)
        .await
        .assert_status_ok();
    assert_eq!(ops.username, "ops");
    Ok(())
}
