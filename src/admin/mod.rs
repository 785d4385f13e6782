// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! HTTP admin surface.
//!
//! A thin front over the node api for operators and local tooling. It is
//! not part of the replication protocol; peers never talk to it.

use crate::node::MeshNode;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;

/// The admin routes, delegating everything to the node api.
pub fn router(node: MeshNode) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/getNode/:id", get(get_node))
        .route("/getFile/:id", get(get_file))
        .route("/getSrc", get(get_src))
        .route("/getStatus", get(get_status))
        .route("/uploadData", post(upload_data))
        .route("/mkdir", post(mkdir))
        .route("/deleteNode/:id", get(delete_node))
        .route("/cancel/:id", get(cancel))
        .with_state(node)
}

/// Binds the admin API and serves it until the process exits.
pub async fn serve(node: MeshNode, host: &str, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!("Admin API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(node)).await
}

/// Maps the form/path notion of "no parent" onto the node api.
fn parent_arg(parent: &str) -> Option<&str> {
    match parent {
        "" | "root" => None,
        other => Some(other),
    }
}

async fn index() -> &'static str {
    "meshnode admin API: running"
}

async fn get_node(State(node): State<MeshNode>, Path(id): Path<String>) -> impl IntoResponse {
    let body = node.get_node_info(parent_arg(&id)).await;
    ([(header::CONTENT_TYPE, "application/json")], body)
}

async fn get_file(State(node): State<MeshNode>, Path(id): Path<String>) -> Response {
    match node.get_file(&id).await {
        Some((name, bytes)) => (
            [(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            )],
            bytes,
        )
            .into_response(),
        None => "None".into_response(),
    }
}

async fn get_src(State(node): State<MeshNode>) -> String {
    node.source_hash().await
}

async fn get_status(State(node): State<MeshNode>) -> impl IntoResponse {
    Json(node.status().await)
}

async fn upload_data(State(node): State<MeshNode>, mut multipart: Multipart) -> Response {
    let mut file: Option<(String, bytes::Bytes)> = None;
    let mut parent = String::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        };
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_owned();
                match field.bytes().await {
                    Ok(data) => file = Some((name, data)),
                    Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
                }
            }
            Some("parent") => parent = field.text().await.unwrap_or_default(),
            _ => {}
        }
    }
    let Some((name, data)) = file else {
        return (StatusCode::BAD_REQUEST, "No file part").into_response();
    };
    match node.upload_file(&name, parent_arg(&parent), &data).await {
        Ok(hash) => hash.into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct MkdirForm {
    name: String,
    parent: String,
}

async fn mkdir(State(node): State<MeshNode>, Form(form): Form<MkdirForm>) -> Response {
    if form.name.is_empty() {
        return (StatusCode::BAD_REQUEST, "No name provided").into_response();
    }
    match node.make_dir(&form.name, parent_arg(&form.parent)).await {
        Ok(hash) => hash.into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn delete_node(State(node): State<MeshNode>, Path(id): Path<String>) -> &'static str {
    match node.delete_node(&id).await {
        Ok(()) => "success",
        Err(_) => "Not Found",
    }
}

async fn cancel(State(node): State<MeshNode>, Path(id): Path<String>) -> &'static str {
    if node.cancel_request(&id).await {
        "success"
    } else {
        "Not Found"
    }
}
