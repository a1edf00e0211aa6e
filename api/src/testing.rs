//! In-process harness for route tests: the authenticated router backed by a
//! [`MemoryStore`], with the caller injected the way the authentication
//! middleware would.

use crate::config::Config;
use crate::middlewares::authorization::AuthorizationConfig;
use crate::store::{DeviceStore, MemoryStore, UserStore};
use crate::users::CurrentUser;
use crate::{State, api_router};
use axum::body::Body;
use axum::http::{Method, Request, header};
use axum::response::Response;
use axum::{Extension, Router};
use models::device::{DeviceRecord, NewDevice};
use models::user::{Role, UpdateProfile};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    authorization: Arc<AuthorizationConfig>,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let authorization = Arc::new(
            AuthorizationConfig::new(include_str!("../roles.toml")).expect("roles.toml parses"),
        );

        let state = State {
            devices: store.clone(),
            users: store.clone(),
            config: Config::for_tests(),
            authorization: authorization.clone(),
        };

        let (router, _api) = api_router().split_for_parts();

        TestApp {
            store,
            authorization,
            router: router.layer(Extension(state)),
        }
    }

    /// Creates (or fetches) the user behind `subject` and gives it `role`.
    pub async fn user(&self, subject: &str, role: Role) -> CurrentUser {
        let user = self.store.create_user(subject, None).await.unwrap();
        let user = self.store.set_role(user.id, role).await.unwrap();
        CurrentUser::new(user.id, user.role, &self.authorization)
    }

    /// A signed-in user that has not picked a role yet.
    pub async fn newcomer(&self, subject: &str) -> CurrentUser {
        let user = self.store.create_user(subject, None).await.unwrap();
        CurrentUser::new(user.id, user.role, &self.authorization)
    }

    pub async fn set_registration(&self, user_id: i32, registration_number: &str) {
        let profile = UpdateProfile {
            registration_number: Some(registration_number.to_owned()),
            location_id: None,
        };
        self.store.update_profile(user_id, &profile).await.unwrap();
    }

    pub async fn touch(&self, user_id: i32) {
        self.store.touch(user_id).await.unwrap();
    }

    /// A device owned by the student behind `subject`.
    pub async fn device(
        &self,
        subject: &str,
        registration_number: &str,
        serial_number: &str,
    ) -> DeviceRecord {
        let owner = self.user(subject, Role::Student).await;
        self.set_registration(owner.user_id, registration_number)
            .await;
        self.store
            .insert_device(
                owner.user_id,
                registration_number,
                &NewDevice {
                    serial_number: serial_number.to_owned(),
                    model: None,
                },
            )
            .await
            .unwrap()
    }

    async fn send(
        &self,
        user: &CurrentUser,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Response {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        self.router
            .clone()
            .layer(Extension(user.clone()))
            .oneshot(request)
            .await
            .unwrap()
    }

    pub async fn get(&self, user: &CurrentUser, path: &str) -> Response {
        self.send(user, Method::GET, path, None).await
    }

    pub async fn post(&self, user: &CurrentUser, path: &str, body: Value) -> Response {
        self.send(user, Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, user: &CurrentUser, path: &str, body: Value) -> Response {
        self.send(user, Method::PUT, path, Some(body)).await
    }
}

pub async fn read_json<T: DeserializeOwned>(response: Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
