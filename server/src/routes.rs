use std::{io, path::PathBuf};

use actix_web::{
    delete, get, patch, post, put, web, HttpRequest, HttpResponse, Responder,
};
use common::{
    data::{DocumentRecord, DocumentStatus},
    helpers::now_millis,
};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::{
    documents::DocumentTable,
    files,
    payloads::*,
    processing,
};

pub struct SharedCtx {
    pub documents: DocumentTable,
    pub data_dir: PathBuf,
    pub max_object_size: u64,
}

impl SharedCtx {
    pub fn new(data_dir: PathBuf, max_object_size: u64) -> Self {
        Self {
            documents: DocumentTable::new(),
            data_dir,
            max_object_size,
        }
    }

    /// The document, if it exists and belongs to `user`.
    async fn owned_document(&self, id: &str, user: &str) -> Result<DocumentRecord, ApiError> {
        let doc = self
            .documents
            .get(id)
            .await
            .ok_or_else(|| ApiError::NotFound("Document not found".to_string()))?;
        if doc.user_id != user {
            return Err(ApiError::Forbidden(
                "You don't have permission to access this document".to_string(),
            ));
        }
        Ok(doc)
    }

    /// Deletes documents created more than `max_age_ms` ago along with their
    /// stored bytes.
    pub async fn cleanup_old_documents(&self, max_age_ms: u64) -> usize {
        let cutoff = now_millis().saturating_sub(max_age_ms);
        let removed = self.documents.remove_created_before(cutoff).await;
        for doc in &removed {
            if let Some(path) = &doc.file_path {
                if let Err(e) = files::delete_object(&self.data_dir, path).await {
                    warn!("could not delete {path}: {e}");
                }
            }
        }
        removed.len()
    }
}

type Ctx = web::Data<SharedCtx>;

#[get("/health")]
async fn health(ctx: Ctx) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: now_millis(),
        documents: ctx.documents.count().await,
    })
}

#[post("/documents")]
async fn create_document(
    ctx: Ctx,
    req: HttpRequest,
    payload: web::Json<CreateDocumentPayload>,
) -> impl Responder {
    let reply: Reply<DocumentRecord> = async {
        let user = current_user(&req)?;
        let payload = payload.into_inner();
        if payload.user_id != user {
            return Err(ApiError::Forbidden(
                "Documents can only be created for yourself".to_string(),
            ));
        }
        if payload.name.trim().is_empty() {
            return Err(ApiError::BadRequest("Document name is required".to_string()));
        }
        let doc = ctx.documents.create(payload).await;
        info!("created document {} ({}) for {}", doc.id, doc.name, doc.user_id);
        Ok::<_, ApiError>(ApiResponse::ok("Document created", doc))
    }
    .await;
    reply.to_response(HttpResponse::Created())
}

#[derive(Deserialize)]
struct ListQuery {
    status_filter: Option<DocumentStatus>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    100
}

#[get("/documents")]
async fn list_documents(ctx: Ctx, req: HttpRequest, query: web::Query<ListQuery>) -> impl Responder {
    let reply: Reply<DocumentListResponse> = async {
        let user = current_user(&req)?;
        let matching: Vec<_> = ctx
            .documents
            .list(&user)
            .await
            .into_iter()
            .filter(|d| query.status_filter.map_or(true, |s| d.status == s))
            .collect();
        let total_count = matching.len();
        let documents: Vec<_> = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok::<_, ApiError>(ApiResponse::ok(
            format!("Retrieved {} documents", documents.len()),
            DocumentListResponse {
                documents,
                total_count,
            },
        ))
    }
    .await;
    reply.to_response(HttpResponse::Ok())
}

#[get("/documents/stats")]
async fn document_stats(ctx: Ctx, req: HttpRequest) -> impl Responder {
    let reply: Reply<DocumentStats> = async {
        let user = current_user(&req)?;
        let stats = DocumentStats::from_records(&ctx.documents.list(&user).await);
        Ok::<_, ApiError>(ApiResponse::ok(
            "Document statistics retrieved successfully",
            stats,
        ))
    }
    .await;
    reply.to_response(HttpResponse::Ok())
}

#[get("/documents/{id}")]
async fn get_document(ctx: Ctx, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let reply: Reply<DocumentRecord> = async {
        let user = current_user(&req)?;
        let doc = ctx.owned_document(&path, &user).await?;
        Ok::<_, ApiError>(ApiResponse::ok("Document retrieved", doc))
    }
    .await;
    reply.to_response(HttpResponse::Ok())
}

#[patch("/documents/{id}")]
async fn update_document(
    ctx: Ctx,
    req: HttpRequest,
    path: web::Path<String>,
    update: web::Json<UpdateDocumentPayload>,
) -> impl Responder {
    let reply: Reply<DocumentRecord> = async {
        let user = current_user(&req)?;
        ctx.owned_document(&path, &user).await?;
        let doc = ctx
            .documents
            .update(&path, update.into_inner())
            .await
            .ok_or_else(|| ApiError::NotFound("Document not found".to_string()))?;
        debug!("document {} is now {}", doc.id, doc.status);
        Ok::<_, ApiError>(ApiResponse::ok("Document updated", doc))
    }
    .await;
    reply.to_response(HttpResponse::Ok())
}

#[delete("/documents/{id}")]
async fn delete_document(ctx: Ctx, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let reply: Reply<DeleteDocumentResponse> = async {
        let user = current_user(&req)?;
        ctx.owned_document(&path, &user).await?;
        if let Some(doc) = ctx.documents.delete(&path).await {
            if let Some(file_path) = &doc.file_path {
                if let Err(e) = files::delete_object(&ctx.data_dir, file_path).await {
                    warn!("could not delete {file_path}: {e}");
                }
            }
        }
        Ok::<_, ApiError>(ApiResponse::ok(
            "Document deleted successfully",
            DeleteDocumentResponse {
                deleted_document_id: path.into_inner(),
                message: "Document and associated chunks deleted".to_string(),
            },
        ))
    }
    .await;
    reply.to_response(HttpResponse::Ok())
}

/// Deletes several documents. The body is a JSON array of ids. Nothing is
/// deleted if any listed document belongs to someone else.
#[delete("/documents")]
async fn delete_documents(ctx: Ctx, req: HttpRequest, ids: web::Json<Vec<String>>) -> impl Responder {
    let reply: Reply<BulkDeleteResponse> = async {
        let user = current_user(&req)?;
        let ids = ids.into_inner();
        if ids.is_empty() {
            return Err(ApiError::BadRequest("No document IDs provided".to_string()));
        }
        for id in &ids {
            if let Some(doc) = ctx.documents.get(id).await {
                if doc.user_id != user {
                    return Err(ApiError::Forbidden(
                        "You don't have permission to delete one or more specified documents"
                            .to_string(),
                    ));
                }
            }
        }

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for id in ids {
            let Some(doc) = ctx.documents.delete(&id).await else {
                failed.push(FailedDeletion {
                    id,
                    error: "Document not found".to_string(),
                });
                continue;
            };
            if let Some(file_path) = &doc.file_path {
                if let Err(e) = files::delete_object(&ctx.data_dir, file_path).await {
                    warn!("could not delete {file_path}: {e}");
                }
            }
            deleted.push(DeletedDocument {
                id: doc.id,
                name: doc.name,
            });
        }

        let mut message = format!("Successfully deleted {} documents", deleted.len());
        if !failed.is_empty() {
            message.push_str(&format!(", failed to delete {} documents", failed.len()));
        }
        info!("{user}: {message}");
        Ok::<_, ApiError>(ApiResponse {
            success: !deleted.is_empty(),
            message,
            data: Some(BulkDeleteResponse {
                deleted_documents: deleted,
                failed_documents: failed,
            }),
            error: None,
        })
    }
    .await;
    reply.to_response(HttpResponse::Ok())
}

#[put("/storage/{owner}/{object}")]
async fn put_object(
    ctx: Ctx,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Payload,
) -> impl Responder {
    let reply: Reply<StoredObject> = async {
        let user = current_user(&req)?;
        let (owner, object) = path.into_inner();
        if owner != user {
            return Err(ApiError::Forbidden("You can only store your own objects".to_string()));
        }
        let stored = format!("{owner}/{object}");
        let hash = files::write_object(&ctx.data_dir, &stored, ctx.max_object_size, body)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::InvalidInput | io::ErrorKind::Other => ApiError::BadRequest(e.to_string()),
                _ => ApiError::Internal(e.to_string()),
            })?;
        let expected = req
            .headers()
            .get(CONTENT_HASH_HEADER)
            .and_then(|v| v.to_str().ok());
        if let Some(expected) = expected {
            if !expected.eq_ignore_ascii_case(&hash) {
                let _ = files::delete_object(&ctx.data_dir, &stored).await;
                return Err(ApiError::BadRequest(format!(
                    "Content hash mismatch: expected {expected}, got {hash}"
                )));
            }
        }
        info!("stored {stored} ({hash})");
        Ok::<_, ApiError>(ApiResponse::ok("Object stored", StoredObject { path: stored }))
    }
    .await;
    reply.to_response(HttpResponse::Created())
}

/// Runs extraction and chunking for a stored document. Failures of the
/// document itself come back as an unsuccessful envelope and mark the record
/// `error`; only auth and lookup problems are HTTP errors.
async fn process(
    ctx: &SharedCtx,
    user: &str,
    document_id: &str,
    file_path: &str,
) -> Reply<ProcessDocumentResponse> {
    let doc = ctx.owned_document(document_id, user).await?;
    if file_path.split('/').next() != Some(user) {
        return Err(ApiError::Forbidden(
            "You don't have permission to access this file".to_string(),
        ));
    }
    ctx.documents
        .set_status(document_id, DocumentStatus::Processing, None)
        .await;

    let result = match files::read_object(&ctx.data_dir, file_path).await {
        Ok(bytes) => {
            let file_type = doc.file_type.clone();
            web::block(move || processing::process_document(&bytes, &file_type))
                .await
                .unwrap_or_else(|e| Err(format!("Processing failed: {e}")))
        }
        Err(e) => Err(format!("Could not read stored file: {e}")),
    };
    match result {
        Ok(chunks) => {
            ctx.documents
                .set_status(document_id, DocumentStatus::Completed, None)
                .await;
            info!("processed {document_id} into {} chunks", chunks.len());
            Ok(ApiResponse::ok(
                format!("Document processed successfully. {} chunks stored.", chunks.len()),
                ProcessDocumentResponse {
                    document_id: document_id.to_string(),
                    status: DocumentStatus::Completed,
                    message: format!("Successfully processed {} chunks", chunks.len()),
                },
            ))
        }
        Err(e) => {
            warn!("processing {document_id} failed: {e}");
            ctx.documents
                .set_status(document_id, DocumentStatus::Error, Some(e.clone()))
                .await;
            Ok(ApiResponse::err("Failed to process document", e))
        }
    }
}

#[post("/upload_document")]
async fn upload_document(
    ctx: Ctx,
    req: HttpRequest,
    payload: web::Json<ProcessDocumentPayload>,
) -> impl Responder {
    let reply = match current_user(&req) {
        Ok(user) => process(&ctx, &user, &payload.document_id, &payload.file_path).await,
        Err(e) => Err(e),
    };
    reply.to_response(HttpResponse::Ok())
}

#[post("/reprocess_document/{id}")]
async fn reprocess_document(ctx: Ctx, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let reply: Reply<ProcessDocumentResponse> = async {
        let user = current_user(&req)?;
        let doc = ctx.owned_document(&path, &user).await?;
        match doc.file_path {
            Some(file_path) => process(&ctx, &user, &doc.id, &file_path).await,
            None => Ok(ApiResponse::err(
                "Failed to reprocess document",
                "Document has no stored file",
            )),
        }
    }
    .await;
    reply.to_response(HttpResponse::Ok())
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(create_document)
        .service(list_documents)
        .service(document_stats)
        .service(get_document)
        .service(update_document)
        .service(delete_document)
        .service(delete_documents)
        .service(put_object)
        .service(upload_document)
        .service(reprocess_document);
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, App};
    use serde::de::DeserializeOwned;

    use super::*;

    const TEXT: &str = "DocChat keeps track of uploads across reloads. \
        Every file becomes a document record that moves from uploading to processing \
        and finally to completed or error.";

    async fn body<T: DeserializeOwned>(res: actix_web::dev::ServiceResponse) -> ApiResponse<T> {
        test::read_body_json(res).await
    }

    macro_rules! app {
        ($dir:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(SharedCtx::new($dir.path().to_path_buf(), 1024 * 1024)))
                    .configure(routes),
            )
            .await
        };
    }

    fn create(user: &str, name: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/documents")
            .insert_header(("Authorization", format!("Bearer {user}")))
            .set_json(CreateDocumentPayload {
                user_id: user.to_string(),
                name: name.to_string(),
                file_type: common::helpers::extension_of(name).unwrap_or_default(),
                file_size: TEXT.len() as u64,
            })
    }

    #[actix_web::test]
    async fn requests_need_a_bearer_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);
        let res = test::call_service(&app, test::TestRequest::get().uri("/documents").to_request()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn full_pipeline_completes() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);

        let res = test::call_service(&app, create("u1", "notes.txt").to_request()).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let doc = body::<DocumentRecord>(res).await.data.unwrap();
        assert_eq!(doc.status, DocumentStatus::Uploading);

        let res = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/storage/u1/17_notes.txt")
                .insert_header(("Authorization", "Bearer u1"))
                .insert_header((CONTENT_HASH_HEADER, common::hash_bytes(TEXT.as_bytes())))
                .set_payload(TEXT)
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let stored = body::<StoredObject>(res).await.data.unwrap();
        assert_eq!(stored.path, "u1/17_notes.txt");

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/upload_document")
                .insert_header(("Authorization", "Bearer u1"))
                .set_json(ProcessDocumentPayload {
                    file_path: stored.path.clone(),
                    document_id: doc.id.clone(),
                    user_id: "u1".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let processed = body::<ProcessDocumentResponse>(res).await;
        assert!(processed.success);
        assert_eq!(processed.message, "Document processed successfully. 1 chunks stored.");

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/documents?status_filter=completed")
                .insert_header(("Authorization", "Bearer u1"))
                .to_request(),
        )
        .await;
        let list = body::<DocumentListResponse>(res).await.data.unwrap();
        assert_eq!(list.total_count, 1);
        assert_eq!(list.documents[0].id, doc.id);
    }

    #[actix_web::test]
    async fn failed_processing_marks_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);
        let res = test::call_service(&app, create("u1", "blank.txt").to_request()).await;
        let doc = body::<DocumentRecord>(res).await.data.unwrap();
        std::fs::create_dir_all(dir.path().join("u1")).unwrap();
        std::fs::write(dir.path().join("u1/blank.txt"), "   \n").unwrap();

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/reprocess_document/{}", doc.id))
                .insert_header(("Authorization", "Bearer u1"))
                .to_request(),
        )
        .await;
        let reply = body::<ProcessDocumentResponse>(res).await;
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("Document has no stored file"));

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/upload_document")
                .insert_header(("Authorization", "Bearer u1"))
                .set_json(ProcessDocumentPayload {
                    file_path: "u1/blank.txt".to_string(),
                    document_id: doc.id.clone(),
                    user_id: "u1".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let reply = body::<ProcessDocumentResponse>(res).await;
        assert!(!reply.success);
        assert_eq!(reply.message, "Failed to process document");
        assert_eq!(reply.error.as_deref(), Some(processing::NO_TEXT));

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/documents/{}", doc.id))
                .insert_header(("Authorization", "Bearer u1"))
                .to_request(),
        )
        .await;
        let record = body::<DocumentRecord>(res).await.data.unwrap();
        assert_eq!(record.status, DocumentStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some(processing::NO_TEXT));
    }

    #[actix_web::test]
    async fn other_users_documents_are_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);
        let res = test::call_service(&app, create("u1", "a.txt").to_request()).await;
        let doc = body::<DocumentRecord>(res).await.data.unwrap();

        for req in [
            test::TestRequest::get().uri(&format!("/documents/{}", doc.id)),
            test::TestRequest::delete().uri(&format!("/documents/{}", doc.id)),
            test::TestRequest::put().uri("/storage/u1/x.txt").set_payload("x"),
        ] {
            let res = test::call_service(&app, req.insert_header(("Authorization", "Bearer u2")).to_request()).await;
            assert_eq!(res.status(), StatusCode::FORBIDDEN);
        }

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/documents")
                .insert_header(("Authorization", "Bearer u2"))
                .to_request(),
        )
        .await;
        assert_eq!(body::<DocumentListResponse>(res).await.data.unwrap().total_count, 0);
    }

    #[actix_web::test]
    async fn hash_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);
        let res = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/storage/u1/a.txt")
                .insert_header(("Authorization", "Bearer u1"))
                .insert_header((CONTENT_HASH_HEADER, common::hash_bytes(b"other")))
                .set_payload(TEXT)
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(!dir.path().join("u1/a.txt").exists());
    }

    #[actix_web::test]
    async fn cleanup_removes_old_documents_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SharedCtx::new(dir.path().to_path_buf(), 1024);
        let doc = ctx
            .documents
            .create(CreateDocumentPayload {
                user_id: "u1".into(),
                name: "a.txt".into(),
                file_type: "txt".into(),
                file_size: 1,
            })
            .await;
        std::fs::create_dir_all(dir.path().join("u1")).unwrap();
        std::fs::write(dir.path().join("u1/a.txt"), "x").unwrap();
        let update = UpdateDocumentPayload {
            file_path: Some("u1/a.txt".into()),
            ..Default::default()
        };
        ctx.documents.update(&doc.id, update).await.unwrap();

        assert_eq!(ctx.cleanup_old_documents(60_000).await, 0);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(ctx.cleanup_old_documents(1).await, 1);
        assert!(!dir.path().join("u1/a.txt").exists());
    }

    #[actix_web::test]
    async fn total_count_ignores_pagination() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);
        for name in ["a.txt", "b.txt", "c.txt"] {
            test::call_service(&app, create("u1", name).to_request()).await;
        }
        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/documents?limit=1&offset=1")
                .insert_header(("Authorization", "Bearer u1"))
                .to_request(),
        )
        .await;
        let reply = body::<DocumentListResponse>(res).await;
        assert_eq!(reply.message, "Retrieved 1 documents");
        let list = reply.data.unwrap();
        assert_eq!(list.documents.len(), 1);
        assert_eq!(list.documents[0].name, "b.txt");
        assert_eq!(list.total_count, 3);
    }

    #[actix_web::test]
    async fn stats_cover_the_callers_documents() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);
        test::call_service(&app, create("u1", "a.txt").to_request()).await;
        test::call_service(&app, create("u1", "b.pdf").to_request()).await;
        test::call_service(&app, create("u2", "c.pdf").to_request()).await;

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/documents/stats")
                .insert_header(("Authorization", "Bearer u1"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let stats = body::<DocumentStats>(res).await.data.unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.status_breakdown.get("uploading"), Some(&2));
        assert_eq!(stats.total_size_bytes, 2 * TEXT.len() as u64);
        assert_eq!(stats.file_type_breakdown.get("pdf"), Some(&1));
    }

    #[actix_web::test]
    async fn bulk_delete_checks_every_id() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);
        let mut ids = Vec::new();
        for (user, name) in [("u1", "a.txt"), ("u1", "b.txt"), ("u2", "c.txt")] {
            let res = test::call_service(&app, create(user, name).to_request()).await;
            ids.push(body::<DocumentRecord>(res).await.data.unwrap().id);
        }
        let bulk = |user: &str, ids: Vec<String>| {
            test::TestRequest::delete()
                .uri("/documents")
                .insert_header(("Authorization", format!("Bearer {user}")))
                .set_json(ids)
                .to_request()
        };

        let res = test::call_service(&app, bulk("u1", vec![])).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = test::call_service(&app, bulk("u1", vec![ids[0].clone(), ids[2].clone()])).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = test::call_service(&app, bulk("u1", vec![ids[0].clone(), ids[1].clone(), "gone".into()])).await;
        assert_eq!(res.status(), StatusCode::OK);
        let reply = body::<BulkDeleteResponse>(res).await;
        assert!(reply.success);
        assert_eq!(reply.message, "Successfully deleted 2 documents, failed to delete 1 documents");
        let result = reply.data.unwrap();
        assert_eq!(result.deleted_documents.len(), 2);
        assert_eq!(result.failed_documents[0].id, "gone");

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/documents/{}", ids[2]))
                .insert_header(("Authorization", "Bearer u2"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
