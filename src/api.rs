use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::middleware::DefaultHeaders;
use actix_web::{guard, web, HttpResponse, ResponseError, Result as ActixResult};
use futures::TryStreamExt;
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::config::ApiConfig;
use crate::core::{AnalyzeRequest, ContactRequest, HomeFixService, ImageUpload};
use crate::error::{HomeFixError, HomeFixResult};

/// Largest text field accepted in an analysis form
const MAX_FORM_FIELD_BYTES: usize = 64 * 1024;

/// JSON body limit for requests without a photo
const MAX_JSON_BYTES: usize = 10 * 1024 * 1024;

/// API request for repair analysis sent as JSON, without a photo
#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    pub description: Option<String>,
    pub email: Option<String>,
}

/// Fields read from a `multipart/form-data` analysis request
#[derive(Debug, Default)]
pub struct AnalyzeForm {
    pub description: Option<String>,
    pub email: Option<String>,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Deserialize)]
pub struct TicketQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionsBody {
    pub description: Option<String>,
}

/// Configure API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(root))
        .service(
            web::scope("/api")
                .service(web::resource("/{tail:.*}").guard(guard::Options()).to(preflight))
                .service(
                    web::resource("/analyze")
                        .route(web::post().guard(guard::fn_guard(is_multipart)).to(analyze_form))
                        .route(web::post().to(analyze_json)),
                )
                .route("/tickets", web::get().to(list_tickets))
                .route("/contact", web::post().to(submit_contact))
                .route("/generate-questions", web::post().to(generate_questions))
                .route("/health", web::get().to(health_check)),
        );
}

/// Static serving of saved photos under `/uploads`
pub fn upload_files(api: &ApiConfig) -> actix_files::Files {
    actix_files::Files::new("/uploads", &api.upload_dir)
}

fn is_multipart(ctx: &guard::GuardContext<'_>) -> bool {
    ctx.head()
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// CORS response headers for the configured frontend origin
pub fn cors_headers(origin: &str) -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", origin.to_string()))
        .add(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "Content-Type, Authorization"))
        .add(("Access-Control-Allow-Credentials", "true"))
}

/// JSON extractor limits with JSON error bodies
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_JSON_BYTES)
        .error_handler(|err, _req| {
            let response = HttpResponse::build(err.status_code())
                .json(serde_json::json!({ "error": err.to_string() }));
            actix_web::error::InternalError::from_response(err, response).into()
        })
}

/// JSON 404 for unknown routes
pub async fn fallback_route() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": "Not found" }))
}

/// CORS preflight; the allow headers come from the middleware
async fn preflight() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

fn upload_extension(filename: Option<&str>, mime: &str) -> String {
    let from_name = filename
        .and_then(|name| Path::new(name).extension())
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    from_name.unwrap_or_else(|| match mime {
        "image/png" => "png".to_string(),
        "image/webp" => "webp".to_string(),
        "image/gif" => "gif".to_string(),
        _ => "jpg".to_string(),
    })
}

fn multipart_error(err: actix_multipart::MultipartError) -> HomeFixError {
    HomeFixError::input(format!("Invalid form data: {}", err))
}

async fn read_text_field(field: &mut actix_multipart::Field, name: &str) -> HomeFixResult<String> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
        if bytes.len() + chunk.len() > MAX_FORM_FIELD_BYTES {
            return Err(HomeFixError::input(format!("Form field '{}' is too large", name)));
        }
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes).map_err(|_| HomeFixError::input(format!("Form field '{}' is not valid UTF-8", name)))
}

async fn drain_field(field: &mut actix_multipart::Field) -> HomeFixResult<()> {
    while field.try_next().await.map_err(multipart_error)?.is_some() {}
    Ok(())
}

/// Stream an `image` form field to the upload directory, enforcing the size limit
async fn save_image_field(
    field: &mut actix_multipart::Field,
    mime: String,
    original_name: Option<String>,
    api: &ApiConfig,
) -> HomeFixResult<ImageUpload> {
    let limit_bytes = api.max_upload_mb * 1024 * 1024;
    let file_name = format!(
        "{}-{}.{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple(),
        upload_extension(original_name.as_deref(), &mime)
    );
    let path = api.upload_dir.join(file_name);

    tokio::fs::create_dir_all(&api.upload_dir)
        .await
        .map_err(|_| HomeFixError::FileSystem { path: api.upload_dir.display().to_string() })?;
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|_| HomeFixError::FileSystem { path: path.display().to_string() })?;

    let mut written = 0usize;
    let result: HomeFixResult<()> = async {
        while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
            written += chunk.len();
            if written > limit_bytes {
                return Err(HomeFixError::PayloadTooLarge { size_bytes: written, limit_bytes });
            }
            file.write_all(&chunk)
                .await
                .map_err(|_| HomeFixError::FileSystem { path: path.display().to_string() })?;
        }
        if written == 0 {
            return Err(HomeFixError::input("Image data is empty"));
        }
        file.flush()
            .await
            .map_err(|_| HomeFixError::FileSystem { path: path.display().to_string() })
    }
    .await;
    drop(file);

    if let Err(e) = result {
        discard_upload(&path).await;
        return Err(e);
    }

    Ok(ImageUpload {
        original_name: original_name.unwrap_or_else(|| "upload".to_string()),
        mime,
        size_bytes: written as u64,
        path,
    })
}

async fn discard_upload(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove rejected upload {}: {}", path.display(), e);
    }
}

/// Read the `image`, `description` and `email` fields of an analysis form.
///
/// The photo is written to the upload directory while it streams in. It must
/// be `image/*` and no larger than `max_upload_mb`. A saved photo is removed
/// again when a later field fails.
pub async fn read_analyze_form(mut payload: Multipart, api: &ApiConfig) -> HomeFixResult<AnalyzeForm> {
    let mut form = AnalyzeForm::default();

    let result: HomeFixResult<()> = async {
        while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
            let name = field.content_disposition().get_name().unwrap_or_default().to_string();
            match name.as_str() {
                "image" if form.image.is_none() => {
                    let original_name = field.content_disposition().get_filename().map(str::to_string);
                    // Browsers send an empty part when no file was chosen
                    if original_name.as_deref() == Some("") {
                        drain_field(&mut field).await?;
                        continue;
                    }
                    let mime = field
                        .content_type()
                        .map(|m| m.essence_str().to_string())
                        .unwrap_or_default();
                    if !mime.starts_with("image/") {
                        return Err(HomeFixError::input("Only image files are allowed"));
                    }
                    form.image = Some(save_image_field(&mut field, mime, original_name, api).await?);
                }
                "description" => form.description = Some(read_text_field(&mut field, &name).await?),
                "email" => form.email = Some(read_text_field(&mut field, &name).await?),
                _ => {
                    debug!("Ignoring form field '{}'", name);
                    drain_field(&mut field).await?;
                }
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        if let Some(image) = &form.image {
            discard_upload(&image.path).await;
        }
        return Err(e);
    }
    Ok(form)
}

async fn run_analysis(app: &HomeFixService, form: AnalyzeForm) -> ActixResult<HttpResponse> {
    info!("API: Analysis requested (image: {})", form.image.is_some());

    let request = AnalyzeRequest {
        description: form.description,
        email: form.email,
        image: form.image,
        skip_lookups: false,
    };

    match app.analyze(request).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(outcome.response)),
        Err(e) => {
            error!("API: Analysis failed: {}", e);
            Err(e.into())
        }
    }
}

/// Analyze a repair problem from a form with an optional `image` file
async fn analyze_form(app: web::Data<HomeFixService>, payload: Multipart) -> ActixResult<HttpResponse> {
    let form = read_analyze_form(payload, &app.config().api).await?;
    run_analysis(&app, form).await
}

/// Analyze a repair problem from a JSON description
async fn analyze_json(app: web::Data<HomeFixService>, body: web::Json<AnalyzeBody>) -> ActixResult<HttpResponse> {
    let body = body.into_inner();
    let form = AnalyzeForm { description: body.description, email: body.email, image: None };
    run_analysis(&app, form).await
}
/// List recent tickets with their latest analysis
async fn list_tickets(app: web::Data<HomeFixService>, query: web::Query<TicketQuery>) -> ActixResult<HttpResponse> {
    let tickets = app.list_tickets(query.limit).await?;
    Ok(HttpResponse::Ok().json(tickets))
}

async fn submit_contact(app: web::Data<HomeFixService>, body: web::Json<ContactRequest>) -> ActixResult<HttpResponse> {
    let submission_id = app.submit_contact(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Thank you for your message! We'll get back to you soon.",
        "submissionId": submission_id
    })))
}

async fn generate_questions(
    app: web::Data<HomeFixService>,
    body: web::Json<QuestionsBody>,
) -> ActixResult<HttpResponse> {
    let description = body.description.as_deref().unwrap_or_default();
    let question_set = app.generate_questions(description).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "questionSet": question_set
    })))
}

/// Health check endpoint
async fn health_check() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn root() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "name": "HomeFix Assist API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enrichment::test_support::StubProducts;
    use crate::core::test_support::{service_with, StubVideos};
    use actix_web::http::Method;
    use actix_web::{test as actix_test, App};

    const MODEL_REPLY: &str = r#"{"materials":[{"name":"Caulk"}],"tools":[{"name":"Caulk gun"}],"steps":["Cut old caulk","Apply new bead"]}"#;
    const BOUNDARY: &str = "homefix-form-boundary";

    macro_rules! app {
        ($service:expr) => {{
            let service = web::Data::new($service);
            std::fs::create_dir_all(&service.config().api.upload_dir).unwrap();
            let uploads = upload_files(&service.config().api);
            actix_test::init_service(
                App::new()
                    .app_data(service)
                    .app_data(json_config())
                    .wrap(cors_headers("http://localhost:5173"))
                    .configure(configure_routes)
                    .service(uploads)
                    .default_service(web::to(fallback_route)),
            )
            .await
        }};
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::RgbImage::from_pixel(16, 16, image::Rgb([90, 90, 90]))
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    /// Builds a form body; parts are (name, optional (filename, content type), data)
    fn form_body(parts: &[(&str, Option<(&str, &str)>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, file, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match file {
                Some((filename, content_type)) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        name, filename, content_type
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn form_request(body: Vec<u8>) -> actix_test::TestRequest {
        actix_test::TestRequest::post()
            .uri("/api/analyze")
            .insert_header((header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY)))
            .set_payload(body)
    }

    fn saved_uploads(dir: &Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    #[actix_web::test]
    async fn test_analyze_description() {
        let (service, _dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        let app = app!(service);

        let req = actix_test::TestRequest::post()
            .uri("/api/analyze")
            .set_json(serde_json::json!({ "description": "Bathtub caulk is moldy" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Origin").unwrap(),
            "http://localhost:5173"
        );

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert!(body["ticketId"].as_i64().unwrap() > 0);
        assert_eq!(body["steps"][1], "Apply new bead");
        assert!(body["youtube_url"].as_str().unwrap().starts_with("https://www.youtube.com/watch?v="));
    }

    #[actix_web::test]
    async fn test_form_without_file_uses_description() {
        let (service, dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        let app = app!(service);

        let body = form_body(&[
            ("description", None, b"Bathtub caulk is moldy"),
            ("image", Some(("", "application/octet-stream")), b""),
        ]);
        let resp = actix_test::call_service(&app, form_request(body).to_request()).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["steps"][0], "Cut old caulk");
        assert!(saved_uploads(&dir.path().join("uploads")).is_empty());
    }

    #[actix_web::test]
    async fn test_analyze_requires_input() {
        let (service, _dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        let app = app!(service);

        let body = form_body(&[("email", None, b"sam@example.com")]);
        let resp = actix_test::call_service(&app, form_request(body).to_request()).await;
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"], "Provide a description or an image.");
    }

    #[actix_web::test]
    async fn test_uploaded_photo_is_saved_and_served() {
        let (service, dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        let app = app!(service);
        let png = png_bytes();

        let body = form_body(&[
            ("image", Some(("tub.png", "image/png")), &png),
            ("description", None, b"Gap around the tub"),
        ]);
        let resp = actix_test::call_service(&app, form_request(body).to_request()).await;
        assert_eq!(resp.status(), 200);

        let saved = saved_uploads(&dir.path().join("uploads"));
        let originals: Vec<_> = saved
            .iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        assert_eq!(originals.len(), 1);

        let name = originals[0].file_name().unwrap().to_string_lossy().into_owned();
        let req = actix_test::TestRequest::get().uri(&format!("/uploads/{}", name)).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(actix_test::read_body(resp).await.as_ref(), png.as_slice());
    }

    #[actix_web::test]
    async fn test_non_image_upload_rejected() {
        let (service, dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        let app = app!(service);

        let body = form_body(&[
            ("description", None, b"Leak"),
            ("image", Some(("notes.txt", "text/plain")), b"hello"),
        ]);
        let resp = actix_test::call_service(&app, form_request(body).to_request()).await;
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"], "Only image files are allowed");
        assert!(saved_uploads(&dir.path().join("uploads")).is_empty());
    }

    #[actix_web::test]
    async fn test_oversized_upload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let api = ApiConfig {
            upload_dir: dir.path().to_path_buf(),
            max_upload_mb: 1,
            ..crate::config::AppConfig::default().api
        };
        let data = vec![0u8; 1_200_000];
        let body = form_body(&[("image", Some(("big.jpg", "image/jpeg")), &data)]);

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_str(&format!("multipart/form-data; boundary={}", BOUNDARY)).unwrap(),
        );
        let stream = futures::stream::once(async move {
            Ok::<_, actix_web::error::PayloadError>(web::Bytes::from(body))
        });

        let err = read_analyze_form(Multipart::new(&headers, stream), &api).await.unwrap_err();
        assert_eq!(err.status_code(), 413);
        assert!(saved_uploads(dir.path()).is_empty());
    }

    #[test]
    fn test_upload_extension() {
        assert_eq!(upload_extension(Some("Photo.JPEG"), "image/jpeg"), "jpeg");
        assert_eq!(upload_extension(Some("noext"), "image/png"), "png");
        assert_eq!(upload_extension(Some("../../x.p/hp"), "image/webp"), "webp");
        assert_eq!(upload_extension(None, "image/heic"), "jpg");
    }

    #[actix_web::test]
    async fn test_tickets_contact_and_questions() {
        let (service, _dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        let app = app!(service);

        let req = actix_test::TestRequest::get().uri("/api/tickets?limit=500").to_request();
        let tickets: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(tickets, serde_json::json!([]));

        let req = actix_test::TestRequest::post()
            .uri("/api/contact")
            .set_json(serde_json::json!({
                "name": "Sam", "email": "sam@example.com", "subject": "Hello", "message": "Great tool"
            }))
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert!(body["submissionId"].as_i64().is_some());

        let req = actix_test::TestRequest::post()
            .uri("/api/generate-questions")
            .set_json(serde_json::json!({ "description": "" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"], "Description is required");
    }

    #[actix_web::test]
    async fn test_root_not_found_and_preflight() {
        let (service, _dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        let app = app!(service);

        let req = actix_test::TestRequest::get().uri("/").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "running");

        let req = actix_test::TestRequest::get().uri("/api/nope").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);

        let req = actix_test::TestRequest::default()
            .method(Method::OPTIONS)
            .uri("/api/analyze")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 204);
        assert!(resp.headers().contains_key("Access-Control-Allow-Methods"));
    }
}
