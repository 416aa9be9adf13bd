//! In-memory users resource.
//!
//! The two endpoints of the reference deployment: `GET /users` lists every
//! user, `POST /users` creates one from a `{"name": …}` payload and answers
//! with the stored record, id included. Ids count up from 1 in creation
//! order. State lives behind an async `RwLock`, shared by clone, and is gone
//! when the process exits.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::request::Request;
use crate::response::{IntoResponse, Json, Response};
use crate::router::Router;
use crate::status::Status;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

/// Payload accepted by `POST /users`.
#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub name: String,
}

/// Shared user state. Clones point at the same underlying list.
#[derive(Clone, Default)]
pub struct UserStore {
    users: Arc<RwLock<Vec<User>>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every user, in creation order.
    pub async fn list(&self) -> Vec<User> {
        self.users.read().await.clone()
    }

    /// Stores a new user and returns it with its assigned id.
    pub async fn create(&self, name: String) -> User {
        let mut users = self.users.write().await;
        let user = User { id: users.len() as u64 + 1, name };
        users.push(user.clone());
        user
    }
}

/// Mounts the users endpoints on `router` with a fresh, empty store.
pub fn register(router: Router) -> Router {
    routes(router, UserStore::new())
}

/// Same as [`register`], but with a caller-supplied store.
pub fn routes(router: Router, store: UserStore) -> Router {
    let list_store = store.clone();
    let create_store = store;
    router
        .get("/users", move |_req: Request| {
            let store = list_store.clone();
            async move { Json(store.list().await) }
        })
        .post("/users", move |req: Request| {
            let store = create_store.clone();
            async move { create(store, req).await }
        })
}

async fn create(store: UserStore, req: Request) -> Response {
    match serde_json::from_slice::<CreateUser>(req.body()) {
        Ok(input) => Json(store.create(input.name).await).into_response(),
        Err(_) => Response::builder().status(Status::BadRequest).text("Bad request"),
    }
}
