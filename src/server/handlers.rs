//! Route handlers.

use super::errors::AppError;
use super::AppState;
use crate::package::package_batch;
use crate::pipeline::input::{resolve_sandboxed_dir, SourceFile};
use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{Html, IntoResponse, Response},
};
use tracing::info;

const INDEX_HTML: &str = include_str!("index.html");
const ARCHIVE_NAME: &str = "output.zip";

/// `GET /`: the upload form.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /health`
pub async fn health_check() -> &'static str {
    "OK"
}

/// `POST /convert_single/`: one uploaded PDF in, its text out.
pub async fn convert_single(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let mut files = read_uploads(multipart).await?;
    if files.is_empty() {
        return Err(AppError::BadRequest("No file uploaded".into()));
    }
    if files.len() > 1 {
        info!("convert_single received {} files, using the first", files.len());
    }
    let file = files.swap_remove(0);
    info!("convert_single: '{}' ({} bytes)", file.name, file.bytes.len());

    let output = state.converter.convert_single(file).await;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output.text,
    )
        .into_response())
}

/// `POST /convert_multiple/`: many PDFs in, one zip of `.txt` files out.
pub async fn convert_multiple(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let files = read_uploads(multipart).await?;
    if files.is_empty() {
        return Err(AppError::BadRequest("No files uploaded".into()));
    }
    info!("convert_multiple: {} file(s)", files.len());

    let batch = state.converter.convert_batch(files).await;
    let archive = package_batch(&batch).await?;
    Ok(zip_response(archive))
}

/// `GET /convert_directory/{input_dir}`: every PDF in a directory under the
/// configured input root, returned as a zip.
pub async fn convert_directory(
    State(state): State<AppState>,
    Path(input_dir): Path<String>,
) -> Result<Response, AppError> {
    let dir = resolve_sandboxed_dir(&state.input_root, &input_dir).await?;
    info!("convert_directory: {}", dir.display());

    let batch = state.converter.convert_directory(&dir).await?;
    let archive = package_batch(&batch).await?;
    Ok(zip_response(archive))
}

/// Collect every multipart field that carries a file name.
async fn read_uploads(mut multipart: Multipart) -> Result<Vec<SourceFile>, AppError> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await?;
        files.push(SourceFile::new(name, bytes.to_vec()));
    }
    Ok(files)
}

fn zip_response(archive: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{ARCHIVE_NAME}\""),
            ),
        ],
        archive,
    )
        .into_response()
}
