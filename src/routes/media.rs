use std::path::{Path as FsPath, PathBuf};

use anyhow::{Context, Result};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use image::ImageFormat;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{CreateMediaFileEntity, MediaFileEntity, MediaFolderEntity},
    schema::{media_files, media_folders},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/media",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_files))
            .routes(utoipa_axum::routes!(upload_file))
            .routes(utoipa_axum::routes!(move_file))
            .routes(utoipa_axum::routes!(delete_file))
            .routes(utoipa_axum::routes!(get_folders))
            .routes(utoipa_axum::routes!(create_folder))
            .routes(utoipa_axum::routes!(delete_folder))
            .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
    )
}

/// Strip path components and anything outside a conservative character set.
/// The result is only used for display; stored names are uuid-based.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(['.', '_']).is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

fn extension_of(name: &str) -> Option<&str> {
    FsPath::new(name).extension().and_then(|ext| ext.to_str())
}

fn is_image(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

/// Target format for optional master conversion on upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
enum ConvertTo {
    Jpeg,
    Png,
}

impl ConvertTo {
    fn image_format(&self) -> ImageFormat {
        match self {
            ConvertTo::Jpeg => ImageFormat::Jpeg,
            ConvertTo::Png => ImageFormat::Png,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ConvertTo::Jpeg => "jpg",
            ConvertTo::Png => "png",
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            ConvertTo::Jpeg => "image/jpeg",
            ConvertTo::Png => "image/png",
        }
    }
}

const THUMBNAIL_EDGE: u32 = 256;

/// Decode, optionally convert, and write an image plus its thumbnail.
/// Returns the stored file name, thumbnail name and effective content type.
fn write_image(
    media_root: &FsPath,
    id: Uuid,
    bytes: &[u8],
    original_ext: Option<&str>,
    content_type: String,
    convert_to: Option<ConvertTo>,
) -> Result<(String, String, String)> {
    let img = image::load_from_memory(bytes).context("Failed to decode image")?;

    let (file_name, content_type) = match convert_to {
        Some(format) => {
            let file_name = format!("{}.{}", id, format.extension());
            img.save_with_format(media_root.join(&file_name), format.image_format())
                .context("Failed to convert image")?;
            (file_name, format.content_type().to_string())
        }
        None => {
            let file_name = match original_ext {
                Some(ext) => format!("{}.{}", id, ext.to_ascii_lowercase()),
                None => format!("{}", id),
            };
            std::fs::write(media_root.join(&file_name), bytes)
                .context("Failed to write image")?;
            (file_name, content_type)
        }
    };

    let thumbnail_name = format!("{}_thumb.jpg", id);
    img.thumbnail(THUMBNAIL_EDGE, THUMBNAIL_EDGE)
        .into_rgb8()
        .save_with_format(media_root.join(&thumbnail_name), ImageFormat::Jpeg)
        .context("Failed to write thumbnail")?;

    Ok((file_name, thumbnail_name, content_type))
}

#[derive(Deserialize, IntoParams)]
struct ListFilesParams {
    /// Restrict the listing to one folder.
    folder_id: Option<i32>,
}

/// List media files, newest first.
#[utoipa::path(
    get,
    path = "/files",
    tags = ["Media"],
    security(("bearerAuth" = [])),
    params(ListFilesParams),
    responses(
        (status = 200, description = "List media files", body = StdResponse<Vec<MediaFileEntity>, String>)
    )
)]
async fn get_files(
    Query(params): Query<ListFilesParams>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut query = media_files::table
        .order_by(media_files::created_at.desc())
        .into_boxed();
    if let Some(folder_id) = params.folder_id {
        query = query.filter(media_files::folder_id.eq(folder_id));
    }

    let files: Vec<MediaFileEntity> = query
        .get_results(conn)
        .await
        .context("Failed to get media files")?;

    Ok(StdResponse {
        data: Some(files),
        message: Some("Get media files successfully"),
    })
}

#[derive(Deserialize, IntoParams)]
struct UploadParams {
    folder_id: Option<i32>,
    /// Convert image masters to this format (`jpeg` or `png`).
    convert_to: Option<ConvertTo>,
}

/// Upload a file from a multipart `file` field. Images get a JPEG thumbnail
/// derived alongside the master; non-images are stored verbatim.
#[utoipa::path(
    post,
    path = "/files",
    tags = ["Media"],
    security(("bearerAuth" = [])),
    params(UploadParams),
    responses(
        (status = 200, description = "File uploaded", body = StdResponse<MediaFileEntity, String>),
        (status = 422, description = "No file field or undecodable image")
    )
)]
async fn upload_file(
    Query(params): Query<UploadParams>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut upload: Option<(String, String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(format!("Malformed multipart body: {err}")))?
    {
        if field.name() == Some("file") {
            let original_name = sanitize_file_name(field.file_name().unwrap_or("file"));
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| AppError::BadRequest(format!("Failed to read upload: {err}")))?;
            upload = Some((original_name, content_type, bytes.to_vec()));
        }
    }

    let (original_name, content_type, bytes) =
        upload.ok_or_else(|| AppError::Validation("Missing `file` field".into()))?;
    if bytes.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".into()));
    }

    let media_root = state.media_root.clone();
    let id = Uuid::new_v4();
    let size_bytes = bytes.len() as i64;

    let (file_name, thumbnail_name, content_type) = if is_image(&content_type) {
        let original_ext = extension_of(&original_name).map(str::to_string);
        let root = media_root.clone();
        let stored = tokio::task::spawn_blocking(move || {
            write_image(
                &root,
                id,
                &bytes,
                original_ext.as_deref(),
                content_type,
                params.convert_to,
            )
        })
        .await
        .context("Image task panicked")?
        .map_err(|err| AppError::Validation(format!("Could not process image: {err:#}")))?;
        (stored.0, Some(stored.1), stored.2)
    } else {
        let file_name = match extension_of(&original_name) {
            Some(ext) => format!("{}.{}", id, ext.to_ascii_lowercase()),
            None => format!("{}", id),
        };
        tokio::fs::write(media_root.join(&file_name), &bytes)
            .await
            .context("Failed to write file")?;
        (file_name, None, content_type)
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let file: MediaFileEntity = diesel::insert_into(media_files::table)
        .values(CreateMediaFileEntity {
            id,
            folder_id: params.folder_id,
            file_name,
            original_name,
            content_type,
            size_bytes,
            thumbnail_name,
        })
        .returning(MediaFileEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to record media file")?;

    Ok(StdResponse {
        data: Some(file),
        message: Some("File uploaded successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct MoveFileReq {
    /// Target folder; `null` untags the file.
    pub folder_id: Option<i32>,
}

/// Move a file into (or out of) a folder.
#[utoipa::path(
    patch,
    path = "/files/{id}",
    tags = ["Media"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "File ID to move")
    ),
    request_body = MoveFileReq,
    responses(
        (status = 200, description = "File moved", body = StdResponse<MediaFileEntity, String>)
    )
)]
async fn move_file(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<MoveFileReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let file: MediaFileEntity = diesel::update(media_files::table.find(id))
        .set(media_files::folder_id.eq(body.folder_id))
        .returning(MediaFileEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(file),
        message: Some("File moved successfully"),
    })
}

/// Delete a media file, removing the master and thumbnail from disk.
#[utoipa::path(
    delete,
    path = "/files/{id}",
    tags = ["Media"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "File ID to delete")
    ),
    responses(
        (status = 200, description = "File deleted", body = StdResponse<MediaFileEntity, String>)
    )
)]
async fn delete_file(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted: MediaFileEntity = diesel::delete(media_files::table.find(id))
        .returning(MediaFileEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    let media_root: PathBuf = state.media_root.clone();
    for name in std::iter::once(&deleted.file_name).chain(deleted.thumbnail_name.iter()) {
        if let Err(err) = tokio::fs::remove_file(media_root.join(name)).await {
            tracing::warn!("Failed to remove {} from disk: {}", name, err);
        }
    }

    Ok(StdResponse {
        data: Some(deleted),
        message: Some("File deleted successfully"),
    })
}

/// List folders.
#[utoipa::path(
    get,
    path = "/folders",
    tags = ["Media"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List folders", body = StdResponse<Vec<MediaFolderEntity>, String>)
    )
)]
async fn get_folders(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let folders: Vec<MediaFolderEntity> = media_folders::table
        .order_by(media_folders::name.asc())
        .get_results(conn)
        .await
        .context("Failed to get folders")?;

    Ok(StdResponse {
        data: Some(folders),
        message: Some("Get folders successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct CreateFolderReq {
    pub name: String,
}

/// Create a folder.
#[utoipa::path(
    post,
    path = "/folders",
    tags = ["Media"],
    security(("bearerAuth" = [])),
    request_body = CreateFolderReq,
    responses(
        (status = 200, description = "Folder created", body = StdResponse<MediaFolderEntity, String>)
    )
)]
async fn create_folder(
    State(state): State<AppState>,
    Json(body): Json<CreateFolderReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Folder name cannot be empty".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let folder: MediaFolderEntity = diesel::insert_into(media_folders::table)
        .values(media_folders::name.eq(body.name))
        .returning(MediaFolderEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create folder")?;

    Ok(StdResponse {
        data: Some(folder),
        message: Some("Folder created successfully"),
    })
}

/// Delete a folder. Files inside are untagged, not deleted.
#[utoipa::path(
    delete,
    path = "/folders/{id}",
    tags = ["Media"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Folder ID to delete")
    ),
    responses(
        (status = 200, description = "Folder deleted", body = StdResponse<MediaFolderEntity, String>)
    )
)]
async fn delete_folder(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted: MediaFolderEntity = diesel::delete(media_folders::table.find(id))
        .returning(MediaFolderEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(deleted),
        message: Some("Folder deleted successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\photos\\cat.jpg"), "cat.jpg");
    }

    #[test]
    fn sanitize_replaces_odd_characters() {
        assert_eq!(sanitize_file_name("my photo (1).png"), "my_photo__1_.png");
        assert_eq!(sanitize_file_name("schnappschuß.jpg"), "schnappschu_.jpg");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name("...."), "file");
        assert_eq!(sanitize_file_name("///"), "file");
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(extension_of("cat.JPG"), Some("JPG"));
        assert_eq!(extension_of("archive.tar.gz"), Some("gz"));
        assert_eq!(extension_of("noext"), None);
    }

    #[test]
    fn image_detection_by_content_type() {
        assert!(is_image("image/png"));
        assert!(is_image("image/webp"));
        assert!(!is_image("application/pdf"));
        assert!(!is_image("text/plain"));
    }
}
