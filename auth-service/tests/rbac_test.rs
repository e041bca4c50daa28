//! RoleService integration tests against PostgreSQL.
//!
//! Run with `TEST_DATABASE_URL` pointing at a disposable database and
//! `--ignored --test-threads=1`, since each test resets the tables.

mod common;

use auth_service::config::BootstrapConfig;
use auth_service::services::{bootstrap_admin, ADMINISTRATOR_ROLE};
use common::{as_user, TestApp};
use service_core::grpc::proto::auth::{
    AddUserRolesRequest, CheckPermissionRequest, CreatePermissionRequest, CreateRoleRequest,
    GetRoleRequest, ListRolesRequest, ListUserRolesRequest, RemoveUserRolesRequest,
    SetRolePermissionsRequest, UpdateRoleRequest,
};
use uuid::Uuid;

/// Seed an administrator through the startup bootstrap.
async fn seed_admin(app: &TestApp) -> Uuid {
    bootstrap_admin(
        &app.db,
        app.users.as_ref(),
        &BootstrapConfig {
            admin_email: Some("root@example.com".to_string()),
            admin_password: Some("root-password".to_string()),
        },
    )
    .await
    .unwrap()
    .unwrap()
}

async fn create_permission(app: &TestApp, admin: &Uuid, value: &str) -> String {
    let mut client = app.role_client().await;
    client
        .create_permission(as_user(
            CreatePermissionRequest {
                value: value.to_string(),
                scope: "documents".to_string(),
                description: format!("Allows {}", value),
            },
            admin,
        ))
        .await
        .unwrap()
        .into_inner()
        .permission
        .unwrap()
        .id
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn update_role_replaces_permissions() {
    let app = TestApp::spawn_with_database().await;
    let admin = seed_admin(&app).await;
    let read = create_permission(&app, &admin, "documents.read").await;
    let write = create_permission(&app, &admin, "documents.write").await;
    let delete = create_permission(&app, &admin, "documents.delete").await;
    let mut client = app.role_client().await;

    let role = client
        .create_role(as_user(
            CreateRoleRequest {
                name: "editor".to_string(),
                permission_ids: vec![read.clone(), write.clone()],
            },
            &admin,
        ))
        .await
        .unwrap()
        .into_inner()
        .role
        .unwrap();
    assert_eq!(role.permissions.len(), 2);

    let updated = client
        .update_role(as_user(
            UpdateRoleRequest {
                role_id: role.id.clone(),
                name: "janitor".to_string(),
                permission_ids: vec![delete.clone()],
            },
            &admin,
        ))
        .await
        .unwrap()
        .into_inner()
        .role
        .unwrap();

    assert_eq!(updated.name, "janitor");
    let ids: Vec<_> = updated.permissions.iter().map(|p| p.id.clone()).collect();
    assert_eq!(ids, vec![delete]);

    let fetched = client
        .get_role(as_user(GetRoleRequest { role_id: role.id }, &admin))
        .await
        .unwrap()
        .into_inner()
        .role
        .unwrap();
    assert_eq!(fetched, updated);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn missing_permission_reference_rolls_back() {
    let app = TestApp::spawn_with_database().await;
    let admin = seed_admin(&app).await;
    let read = create_permission(&app, &admin, "documents.read").await;
    let mut client = app.role_client().await;

    let status = client
        .create_role(as_user(
            CreateRoleRequest {
                name: "ghost".to_string(),
                permission_ids: vec![read, Uuid::new_v4().to_string()],
            },
            &admin,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    let roles = client
        .list_roles(as_user(ListRolesRequest {}, &admin))
        .await
        .unwrap()
        .into_inner()
        .roles;
    assert!(roles.iter().all(|role| role.name != "ghost"));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn set_role_permissions_on_missing_role_is_not_found() {
    let app = TestApp::spawn_with_database().await;
    let admin = seed_admin(&app).await;
    let mut client = app.role_client().await;

    let status = client
        .set_role_permissions(as_user(
            SetRolePermissionsRequest {
                role_id: Uuid::new_v4().to_string(),
                permission_ids: Vec::new(),
            },
            &admin,
        ))
        .await
        .unwrap_err();

    assert_eq!(status.code(), tonic::Code::NotFound);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn user_role_links_add_and_remove() {
    let app = TestApp::spawn_with_database().await;
    let admin = seed_admin(&app).await;
    let read = create_permission(&app, &admin, "documents.read").await;
    let mut client = app.role_client().await;
    let reader = client
        .create_role(as_user(
            CreateRoleRequest {
                name: "reader".to_string(),
                permission_ids: vec![read],
            },
            &admin,
        ))
        .await
        .unwrap()
        .into_inner()
        .role
        .unwrap();
    let user = Uuid::new_v4();

    let add = AddUserRolesRequest {
        user_id: user.to_string(),
        role_ids: vec![reader.id.clone(), reader.id.clone()],
    };
    let roles = client
        .add_user_roles(as_user(add.clone(), &admin))
        .await
        .unwrap()
        .into_inner()
        .roles;
    assert_eq!(roles.len(), 1);

    let duplicate = client.add_user_roles(as_user(add, &admin)).await.unwrap_err();
    assert_eq!(duplicate.code(), tonic::Code::AlreadyExists);

    // The new link is visible to permission checks made on the user.
    let mut authz = app.authz_client().await;
    let granted = authz
        .check_permission(as_user(
            CheckPermissionRequest {
                target_user_id: user.to_string(),
                permission: "documents.read".to_string(),
            },
            &admin,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(granted.granted);

    let remaining = client
        .remove_user_roles(as_user(
            RemoveUserRolesRequest {
                user_id: user.to_string(),
                role_ids: vec![reader.id],
            },
            &admin,
        ))
        .await
        .unwrap()
        .into_inner()
        .roles;
    assert!(remaining.is_empty());

    let listed = client
        .list_user_roles(as_user(
            ListUserRolesRequest {
                user_id: user.to_string(),
            },
            &admin,
        ))
        .await
        .unwrap()
        .into_inner()
        .roles;
    assert!(listed.is_empty());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn caller_without_admin_role_is_denied() {
    let app = TestApp::spawn_with_database().await;
    let mut client = app.role_client().await;

    let status = client
        .list_roles(as_user(ListRolesRequest {}, &Uuid::new_v4()))
        .await
        .unwrap_err();

    assert_eq!(status.code(), tonic::Code::PermissionDenied);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn bootstrap_runs_only_on_an_empty_graph() {
    let app = TestApp::spawn_with_database().await;
    let admin = seed_admin(&app).await;
    let mut client = app.role_client().await;

    let roles = client
        .list_user_roles(as_user(
            ListUserRolesRequest {
                user_id: admin.to_string(),
            },
            &admin,
        ))
        .await
        .unwrap()
        .into_inner()
        .roles;
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].name, ADMINISTRATOR_ROLE);
    assert_eq!(roles[0].permissions.len(), 10);

    let again = bootstrap_admin(
        &app.db,
        app.users.as_ref(),
        &BootstrapConfig {
            admin_email: Some("other@example.com".to_string()),
            admin_password: Some("other-password".to_string()),
        },
    )
    .await
    .unwrap();
    assert!(again.is_none());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn first_role_is_seeded_once_with_its_permissions() {
    let app = TestApp::spawn_with_database().await;
    let user = Uuid::new_v4();
    let permissions = vec![auth_service::models::NewPermission {
        value: "admin.roles.read".to_string(),
        scope: "admin".to_string(),
        description: "Read roles".to_string(),
    }];

    let (first, second) = tokio::join!(
        app.db.seed_first_role(ADMINISTRATOR_ROLE, &permissions, user),
        app.db.seed_first_role(ADMINISTRATOR_ROLE, &permissions, user),
    );
    let seeded: Vec<_> = [first.unwrap(), second.unwrap()]
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(seeded.len(), 1);
    assert_eq!(seeded[0].permissions.len(), 1);

    // No stray permission rows from the losing call.
    let stored = app.db.list_permissions().await.unwrap();
    assert_eq!(stored.len(), 1);
    let linked = app.db.find_user_roles_with_permissions(user).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].role.name, ADMINISTRATOR_ROLE);
}
