use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, patch, put, MethodRouter},
    Router,
};

use crate::{
    access::{enforce, Permission, PermissionGate},
    auth::{self, authenticate},
    state::AppState,
};

mod dto;
mod handlers;
#[cfg(test)]
pub mod memory;
pub mod model;
pub mod repo;

/// Guard a handler with the permission gate. Admins pass on role alone.
fn gated(required: Permission, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.route_layer(from_fn_with_state(
        PermissionGate::single(required, true),
        enforce,
    ))
}

/// Every `/api/users` route: public account flows plus the authenticated ones.
pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/me", get(handlers::get_me).patch(handlers::update_me))
        .route("/", gated(Permission::View, get(handlers::list_users)))
        .route(
            "/:id",
            gated(Permission::View, get(handlers::get_user))
                .merge(gated(Permission::Update, patch(handlers::update_user)))
                .merge(gated(Permission::Delete, delete(handlers::deactivate_user))),
        )
        .route("/:id/role", gated(Permission::Role, put(handlers::set_role)))
        .route(
            "/:id/permissions",
            gated(Permission::Permissions, put(handlers::set_permissions)),
        )
        .route_layer(from_fn_with_state(state, authenticate));

    Router::new().merge(auth::router()).merge(protected)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::{
        access::{PermissionSet, Role},
        auth::jwt::JwtKeys,
        users::{
            memory::MemoryUserRepository,
            model::{tests::sample_record, UserStatus},
        },
    };

    struct Harness {
        app: Router,
        repo: Arc<MemoryUserRepository>,
        keys: JwtKeys,
    }

    impl Harness {
        fn new() -> Self {
            let repo = Arc::new(MemoryUserRepository::new());
            let state = AppState::fake_with(repo.clone());
            let keys = JwtKeys::from(&state.config.jwt);
            let app = Router::new()
                .nest("/api/users", router(state.clone()))
                .with_state(state);
            Self { app, repo, keys }
        }

        /// Seeds a user and returns its id and a bearer token.
        fn seed(&self, email: &str, role: Role, perms: &[Permission]) -> (Uuid, String) {
            let mut record = sample_record();
            record.email = email.into();
            record.role = role;
            record.permissions = perms.iter().copied().collect::<PermissionSet>();
            let id = record.id;
            self.repo.insert(record);
            (id, self.keys.sign_access(id).unwrap())
        }

        async fn call(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(t) = token {
                req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
            }
            let body = match body {
                Some(v) => {
                    req = req.header(header::CONTENT_TYPE, "application/json");
                    Body::from(v.to_string())
                }
                None => Body::empty(),
            };
            let res = self.app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
            let status = res.status();
            let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }
    }

    fn assert_no_secrets(user: &Value) {
        let obj = user.as_object().expect("user object");
        for key in ["password", "passwordHash", "resetToken", "resetTokenExp", "token", "tokenExp"] {
            assert!(!obj.contains_key(key), "leaked {key}");
        }
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let h = Harness::new();
        let (status, body) = h.call(Method::GET, "/api/users/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "UNAUTHORIZED");

        let (status, _) = h.call(Method::GET, "/api/users", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_returns_redacted_self() {
        let h = Harness::new();
        let (id, token) = h.seed("me@x.io", Role::User, &[]);
        let (status, body) = h.call(Method::GET, "/api/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["_id"], id.to_string());
        assert_no_secrets(&body);
    }

    #[tokio::test]
    async fn update_me_changes_profile() {
        let h = Harness::new();
        let (id, token) = h.seed("me@x.io", Role::User, &[]);
        let (status, body) = h
            .call(
                Method::PATCH,
                "/api/users/me",
                Some(&token),
                Some(json!({"firstName": "Augusta", "email": "ADA@X.IO"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["firstName"], "Augusta");
        assert_eq!(body["email"], "ada@x.io");
        assert_eq!(h.repo.snapshot(id).unwrap().first_name, "Augusta");

        let (status, body) = h
            .call(Method::PATCH, "/api/users/me", Some(&token), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "MISSING_DATA");
    }

    #[tokio::test]
    async fn admin_passes_gate_without_permissions() {
        let h = Harness::new();
        let (_, admin) = h.seed("admin@x.io", Role::Admin, &[]);
        h.seed("other@x.io", Role::User, &[]);

        let (status, body) = h.call(Method::GET, "/api/users", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        let users = body.as_array().unwrap();
        assert_eq!(users.len(), 2);
        users.iter().for_each(assert_no_secrets);
    }

    #[tokio::test]
    async fn moderator_passes_only_when_lacking_the_permission() {
        let h = Harness::new();
        let (target, _) = h.seed("target@x.io", Role::User, &[]);
        let uri = format!("/api/users/{target}");

        let (_, bare) = h.seed("m1@x.io", Role::Moderator, &[]);
        let (status, _) = h.call(Method::GET, &uri, Some(&bare), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, holder) = h.seed("m2@x.io", Role::Moderator, &[Permission::View]);
        let (status, body) = h.call(Method::GET, &uri, Some(&holder), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], crate::error::PERMISSION_DENIED_MESSAGE);
    }

    #[tokio::test]
    async fn plain_user_is_always_denied() {
        let h = Harness::new();
        let (target, _) = h.seed("target@x.io", Role::User, &[]);
        let (_, user) = h.seed("u@x.io", Role::User, &[Permission::View, Permission::Delete]);

        let (status, _) = h.call(Method::GET, "/api/users", Some(&user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = h
            .call(Method::DELETE, &format!("/api/users/{target}"), Some(&user), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(h.repo.snapshot(target).unwrap().active, UserStatus::Active);
    }

    #[tokio::test]
    async fn delete_disables_the_account() {
        let h = Harness::new();
        let (target, _) = h.seed("target@x.io", Role::User, &[]);
        let (_, admin) = h.seed("admin@x.io", Role::Admin, &[]);

        let (status, body) = h
            .call(Method::DELETE, &format!("/api/users/{target}"), Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], 2);
        assert_no_secrets(&body);
        assert_eq!(h.repo.snapshot(target).unwrap().active, UserStatus::Disabled);
    }

    #[tokio::test]
    async fn disabled_account_token_is_rejected() {
        use crate::users::repo::UserRepository;

        let h = Harness::new();
        let (id, token) = h.seed("gone@x.io", Role::Admin, &[]);
        h.repo.set_status(id, UserStatus::Disabled).await.unwrap();

        let (status, body) = h.call(Method::GET, "/api/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "ACCOUNT_DISABLED");
    }

    #[tokio::test]
    async fn role_and_permissions_updates() {
        let h = Harness::new();
        let (target, _) = h.seed("target@x.io", Role::User, &[]);
        let (_, admin) = h.seed("admin@x.io", Role::Admin, &[]);

        let (status, body) = h
            .call(
                Method::PUT,
                &format!("/api/users/{target}/role"),
                Some(&admin),
                Some(json!({"role": "moderator"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "moderator");

        let (status, body) = h
            .call(
                Method::PUT,
                &format!("/api/users/{target}/permissions"),
                Some(&admin),
                Some(json!({"permissions": ["view", "update"]})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["permissions"], json!(["view", "update"]));

        let (status, body) = h
            .call(
                Method::PATCH,
                &format!("/api/users/{target}"),
                Some(&admin),
                Some(json!({"active": 1})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], 1);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let h = Harness::new();
        let (_, admin) = h.seed("admin@x.io", Role::Admin, &[]);
        let (status, body) = h
            .call(Method::GET, &format!("/api/users/{}", Uuid::new_v4()), Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "USER_NOT_FOUND");
    }

    #[tokio::test]
    async fn register_then_login_over_http() {
        let h = Harness::new();
        let creds = json!({
            "firstName": "Grace",
            "lastName": "Hopper",
            "email": "grace@navy.mil",
            "password": "cobol-forever"
        });

        let (status, body) = h
            .call(Method::POST, "/api/users/register", None, Some(creds.clone()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["accessToken"].is_string());
        assert_no_secrets(&body["user"]);

        let (status, body) = h
            .call(Method::POST, "/api/users/register", None, Some(creds))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "EMAIL_TAKEN");

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/users/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.5")
            .body(Body::from(
                json!({"email": "grace@navy.mil", "password": "cobol-forever"}).to_string(),
            ))
            .unwrap();
        let res = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["user"]["loginIp"], "203.0.113.5");
        assert!(body["user"]["lastLogin"].is_string());
    }

    #[tokio::test]
    async fn forgot_password_is_accepted_for_any_email() {
        let h = Harness::new();
        let (id, _) = h.seed("me@x.io", Role::User, &[]);

        let (status, _) = h
            .call(
                Method::POST,
                "/api/users/forgot-password",
                None,
                Some(json!({"email": "nobody@x.io"})),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _) = h
            .call(
                Method::POST,
                "/api/users/forgot-password",
                None,
                Some(json!({"email": "me@x.io"})),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let token = h.repo.snapshot(id).unwrap().reset_token;
        assert_eq!(token.len(), crate::auth::password::RESET_TOKEN_LEN);

        let (status, _) = h
            .call(
                Method::POST,
                "/api/users/reset-password",
                None,
                Some(json!({"token": token, "password": "brand-new-pass"})),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(h.repo.snapshot(id).unwrap().reset_token.is_empty());
    }
}
