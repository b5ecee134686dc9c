use anyhow::{Context, Result, anyhow};
use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Form, Multipart, Path as AxumPath, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::DynamicImage;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tera::{Context as TeraContext, Tera};

use super::models::{
    ErrorResponse, FetchForm, FetchInfoForm, FetchInfoResponse, ProcessImageResponse, ServerError,
    UpdateImageForm, UpdateImageResponse,
};
use super::scratch::{RunDirs, scratch_root};
use super::state::ServerState;
use crate::capture::{CaptureSession, html as capture_html, stitch};
use crate::inpaint;
use crate::ocr::{self, TextArea};
use crate::settings::Settings;

/// Uploads are downsized server-side, so originals well past the framework's
/// default 2 MB body cap must reach the handler.
const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

pub async fn run_server(settings: Settings, addr: String) -> Result<()> {
    let state = Arc::new(ServerState::new(settings)?);
    let app = build_router(state)?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<ServerState>) -> Result<Router> {
    let index_html = Arc::new(render_template("index.html.tera", &TeraContext::new())?);
    let router = Router::new()
        .route(
            "/",
            get({
                let html = index_html.clone();
                move || {
                    let html = html.clone();
                    async move { Html((*html).clone()) }
                }
            }),
        )
        .route("/process_image", post(process_image))
        .route("/update_image", post(update_image))
        .route("/fetch_info", post(fetch_info))
        .route("/fetch", post(fetch))
        .route("/export_image/:filename", get(export_image))
        .route("/export_html", get(export_html))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware));
    Ok(router)
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(err: ServerError) -> (StatusCode, Json<ErrorResponse>) {
    (err.status, Json(ErrorResponse { error: err.message }))
}

async fn process_image(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> ApiResult<ProcessImageResponse> {
    let mut image_bytes: Option<Vec<u8>> = None;
    let mut max_size = state.settings.max_size;
    let mut min_confidence = state.settings.min_confidence;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| api_error(ServerError::bad_request(err.to_string())))?
    {
        match field.name() {
            Some("image") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| api_error(ServerError::bad_request(err.to_string())))?;
                image_bytes = Some(bytes.to_vec());
            }
            Some("max_size") => {
                if let Ok(text) = field.text().await {
                    if let Ok(value) = text.trim().parse() {
                        max_size = value;
                    }
                }
            }
            Some("min_confidence") => {
                if let Ok(text) = field.text().await {
                    if let Ok(value) = text.trim().parse() {
                        min_confidence = value;
                    }
                }
            }
            _ => {}
        }
    }

    let bytes =
        image_bytes.ok_or_else(|| api_error(ServerError::bad_request("no image provided")))?;
    let settings = state.settings.clone();
    let result = tokio::task::spawn_blocking(move || {
        run_process_image(&settings, &bytes, max_size, min_confidence)
    })
    .await
    .map_err(|err| api_error(ServerError::internal(format!("server task failed: {}", err))))?;

    result.map(Json).map_err(api_error)
}

fn run_process_image(
    settings: &Settings,
    bytes: &[u8],
    max_size: u32,
    min_confidence: f32,
) -> Result<ProcessImageResponse, ServerError> {
    let kind = infer::get(bytes)
        .ok_or_else(|| ServerError::bad_request("unrecognized upload content"))?;
    if !kind.mime_type().starts_with("image/") {
        return Err(ServerError::bad_request(format!(
            "expected an image upload, got {}",
            kind.mime_type()
        )));
    }

    let image = image::load_from_memory(bytes)
        .map_err(|err| ServerError::internal(format!("failed to decode image: {}", err)))?;
    let image = resize_within(image, max_size);
    let rgba = image.to_rgba8();

    let areas = ocr::detect_text_areas(&image, &settings.ocr_languages, min_confidence)
        .map_err(ServerError::from)?;
    tracing::info!("detected {} text areas", areas.len());

    let mask = ocr::build_text_mask(image.width(), image.height(), &areas);
    let alpha = ocr::mask_to_alpha(&mask);
    let cleared = inpaint::fill_transparent(&rgba, &alpha).map_err(ServerError::from)?;

    let cleared_png =
        encode_png(&DynamicImage::ImageRgba8(cleared)).map_err(ServerError::from)?;

    Ok(ProcessImageResponse {
        image: BASE64.encode(&cleared_png),
        text_areas: areas,
        original_image: BASE64.encode(rgba.as_raw()),
    })
}

async fn update_image(
    State(state): State<Arc<ServerState>>,
    Form(form): Form<UpdateImageForm>,
) -> ApiResult<UpdateImageResponse> {
    let font_dir = state.settings.font_dir.clone();
    let result =
        tokio::task::spawn_blocking(move || run_update_image(form, font_dir.as_deref()))
            .await
            .map_err(|err| {
                api_error(ServerError::internal(format!("server task failed: {}", err)))
            })?;
    result.map(Json).map_err(api_error)
}

fn run_update_image(
    form: UpdateImageForm,
    font_dir: Option<&str>,
) -> Result<UpdateImageResponse, ServerError> {
    let image_data = form
        .image
        .as_deref()
        .ok_or_else(|| ServerError::bad_request("no image data provided"))?;
    let text_areas = form
        .text_areas
        .as_deref()
        .ok_or_else(|| ServerError::bad_request("no text areas provided"))?;
    let new_texts = form
        .new_texts
        .as_deref()
        .ok_or_else(|| ServerError::bad_request("no replacement texts provided"))?;
    let colors = form
        .colors
        .as_deref()
        .ok_or_else(|| ServerError::bad_request("no colors provided"))?;

    let (mime, bytes) = parse_data_url(image_data)?;

    let image = image::load_from_memory(&bytes)
        .map_err(|err| ServerError::bad_request(format!("image identification error: {}", err)))?;

    let areas: Vec<TextArea> = serde_json::from_str(text_areas)
        .map_err(|err| ServerError::bad_request(format!("JSON decoding error: {}", err)))?;
    let new_texts: Vec<String> = serde_json::from_str(new_texts)
        .map_err(|err| ServerError::bad_request(format!("JSON decoding error: {}", err)))?;
    let colors: Vec<[u8; 3]> = serde_json::from_str(colors)
        .map_err(|err| ServerError::bad_request(format!("JSON decoding error: {}", err)))?;

    let updated = ocr::draw_replacements(
        &bytes,
        &mime,
        image.width(),
        image.height(),
        &areas,
        &new_texts,
        &colors,
        font_dir.map(Path::new),
    )
    .map_err(|err| ServerError::internal(format!("unexpected error: {}", err)))?;

    Ok(UpdateImageResponse {
        updated_image: BASE64.encode(&updated),
    })
}

async fn fetch_info(
    State(state): State<Arc<ServerState>>,
    Form(form): Form<FetchInfoForm>,
) -> ApiResult<FetchInfoResponse> {
    let settings = state.settings.clone();
    let client = state.http.clone();
    let handle = tokio::runtime::Handle::current();
    let result = tokio::task::spawn_blocking(move || -> Result<FetchInfoResponse, ServerError> {
        let session = CaptureSession::open(
            settings.info_viewport,
            None,
            Duration::from_secs(settings.scroll_wait_secs),
            Duration::from_secs(settings.element_wait_secs),
        )
        .map_err(ServerError::from)?;
        session
            .goto_and_settle(&form.url, Duration::from_secs(settings.info_initial_wait_secs))
            .map_err(ServerError::from)?;
        let html = session.page_html().map_err(ServerError::from)?;
        // The kuchiki DOM is not Send; keep the inlining on this thread.
        let html_content = handle
            .block_on(capture_html::inline_images(&html, &form.url, &client))
            .map_err(ServerError::from)?;
        Ok(FetchInfoResponse { html_content })
    })
    .await
    .map_err(|err| api_error(ServerError::internal(format!("server task failed: {}", err))))?;

    result.map(Json).map_err(api_error)
}

async fn fetch(
    State(state): State<Arc<ServerState>>,
    Form(form): Form<FetchForm>,
) -> Response<Body> {
    let settings = state.settings.clone();
    // Non-positive overrides are ignored, the same as in settings merging.
    let target_width = form
        .size
        .filter(|&width| width > 0)
        .unwrap_or(settings.target_width);
    let run_result = tokio::task::spawn_blocking(move || {
        run_capture(&settings, &form.url, target_width)
    })
    .await;

    let outcome = match run_result {
        Ok(outcome) => outcome,
        Err(err) => {
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, format!(
                "capture task failed: {}",
                err
            ));
        }
    };

    match outcome {
        Ok(CaptureOutcome::NoScreenshots) => {
            plain_error(StatusCode::INTERNAL_SERVER_ERROR, "No screenshots captured.")
        }
        Ok(CaptureOutcome::Done { run, enlarged }) => {
            let mut context = TeraContext::new();
            context.insert("run_id", run.run_id());
            context.insert("screenshots", &enlarged);
            context.insert("stitched_image", "/export_image/stitched_image.png");
            let page = match render_template("result.html.tera", &context) {
                Ok(page) => page,
                Err(err) => {
                    return plain_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
                }
            };
            *state
                .latest_run
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(run);
            Html(page).into_response()
        }
        Err(err) => plain_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

enum CaptureOutcome {
    NoScreenshots,
    Done {
        run: RunDirs,
        enlarged: Vec<String>,
    },
}

fn run_capture(settings: &Settings, url: &str, target_width: u32) -> Result<CaptureOutcome> {
    let run = RunDirs::create(&scratch_root(settings))?;
    tracing::info!("capture run {} for {}", run.run_id(), url);

    let session = CaptureSession::open(
        settings.capture_viewport,
        settings.capture_user_agent.as_deref(),
        Duration::from_secs(settings.scroll_wait_secs),
        Duration::from_secs(settings.element_wait_secs),
    )?;
    session.goto_and_settle(url, Duration::from_secs(settings.capture_initial_wait_secs))?;
    let shots = session.capture_sections(&settings.capture_selector)?;
    drop(session);

    process_shots(run, &shots, settings.crop_width, target_width)
}

/// Saves, crops, resizes and stitches the captured section screenshots. An
/// empty capture short-circuits before any image work.
fn process_shots(
    run: RunDirs,
    shots: &[Vec<u8>],
    crop_width: u32,
    target_width: u32,
) -> Result<CaptureOutcome> {
    if shots.is_empty() {
        return Ok(CaptureOutcome::NoScreenshots);
    }

    let mut enlarged_names = Vec::new();
    let mut enlarged_images = Vec::new();
    for (idx, png) in shots.iter().enumerate() {
        let name = format!("screenshot_section_{}.png", idx);
        std::fs::write(run.screenshots_dir().join(&name), png)
            .with_context(|| "failed to save screenshot")?;

        let image = image::load_from_memory(png)
            .with_context(|| format!("failed to decode screenshot {}", idx))?;
        let cropped = stitch::crop_to_width(&image, crop_width);
        save_png(&cropped, &run.cropped_dir().join(format!("cropped_{}", &name)))?;

        let resized = stitch::resize_to_width(&cropped, target_width);
        let enlarged_name = format!("enlarged_{}", &name);
        save_png(&resized, &run.enlarged_dir().join(&enlarged_name))?;

        enlarged_names.push(enlarged_name);
        enlarged_images.push(resized.to_rgba8());
    }

    let stitched = stitch::stitch(&enlarged_images)
        .ok_or_else(|| anyhow!("nothing to stitch"))?;
    save_png(&DynamicImage::ImageRgba8(stitched), &run.stitched_path())?;

    Ok(CaptureOutcome::Done {
        run,
        enlarged: enlarged_names,
    })
}

async fn export_image(
    State(state): State<Arc<ServerState>>,
    AxumPath(filename): AxumPath<String>,
) -> Response<Body> {
    let run = state.latest_run.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
    let Some(run) = run else {
        return plain_error(StatusCode::NOT_FOUND, "no capture run available");
    };
    match run.resolve_export(&filename) {
        Ok(path) => serve_attachment(&path),
        Err(err) => plain_error(StatusCode::NOT_FOUND, err.to_string()),
    }
}

async fn export_html(State(state): State<Arc<ServerState>>) -> Response<Body> {
    let run = state.latest_run.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
    let Some(run) = run else {
        return plain_error(StatusCode::NOT_FOUND, "no capture run available");
    };
    match write_export_html(&run) {
        Ok(path) => serve_attachment(&path),
        Err(err) => plain_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// Renders a standalone page with every enlarged screenshot inlined, so the
/// download does not depend on the server staying up.
fn write_export_html(run: &RunDirs) -> Result<PathBuf> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(run.enlarged_dir())
        .with_context(|| "failed to list enlarged screenshots")?
    {
        let entry = entry.with_context(|| "failed to read enlarged entry")?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();

    let mut images = Vec::new();
    for name in &names {
        let bytes = std::fs::read(run.enlarged_dir().join(name))
            .with_context(|| format!("failed to read screenshot {}", name))?;
        images.push(format!("data:image/png;base64,{}", BASE64.encode(&bytes)));
    }

    let mut context = TeraContext::new();
    context.insert("images", &images);
    let html = render_template("export.html.tera", &context)?;
    let path = run.export_html_path();
    std::fs::write(&path, html).with_context(|| "failed to write export html")?;
    Ok(path)
}

fn serve_attachment(path: &Path) -> Response<Body> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            return plain_error(StatusCode::NOT_FOUND, format!("failed to read export: {}", err));
        }
    };
    let mime = infer::get(&bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("text/html; charset=utf-8");
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("download");

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(mime) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    (StatusCode::OK, headers, bytes).into_response()
}

fn plain_error(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    (status, message.into()).into_response()
}

/// Downscales so neither side exceeds `max_size`, preserving aspect ratio.
fn resize_within(image: DynamicImage, max_size: u32) -> DynamicImage {
    if image.width() <= max_size && image.height() <= max_size {
        return image;
    }
    image.resize(max_size, max_size, FilterType::Lanczos3)
}

fn parse_data_url(value: &str) -> Result<(String, Vec<u8>), ServerError> {
    if !value.starts_with("data:image") {
        return Err(ServerError::bad_request("invalid image data format"));
    }
    let (head, payload) = value
        .split_once(',')
        .ok_or_else(|| ServerError::bad_request("invalid image data format"))?;
    let mime = head
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .unwrap_or("image/png")
        .to_string();
    let bytes = BASE64
        .decode(payload)
        .map_err(|err| ServerError::bad_request(format!("invalid image data: {}", err)))?;
    Ok((mime, bytes))
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .with_context(|| "failed to encode png")?;
    Ok(bytes)
}

fn save_png(image: &DynamicImage, path: &Path) -> Result<()> {
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to save image: {}", path.display()))
}

fn render_template(name: &str, context: &TeraContext) -> Result<String> {
    let path = template_path(name);
    let template = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read template: {}", path.display()))?;
    Tera::one_off(&template, context, false)
        .with_context(|| format!("failed to render template: {}", name))
}

fn template_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("templates")
        .join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_parses_mime_and_payload() {
        let (mime, bytes) = parse_data_url("data:image/png;base64,Zm9v").expect("parse");
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"foo");
    }

    #[test]
    fn non_image_data_url_is_rejected() {
        let err = parse_data_url("data:text/plain;base64,Zm9v").expect_err("reject");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_payload_is_rejected() {
        assert!(parse_data_url("data:image/png;base64").is_err());
    }

    #[test]
    fn resize_caps_the_longest_side() {
        let image = DynamicImage::new_rgba8(4000, 1000);
        let resized = resize_within(image, 2000);
        assert_eq!(resized.width(), 2000);
        assert_eq!(resized.height(), 500);
    }

    #[test]
    fn small_images_are_not_resized() {
        let image = DynamicImage::new_rgba8(800, 600);
        let resized = resize_within(image, 2000);
        assert_eq!((resized.width(), resized.height()), (800, 600));
    }

    fn update_form(
        image: Option<&str>,
        text_areas: Option<&str>,
        new_texts: Option<&str>,
        colors: Option<&str>,
    ) -> UpdateImageForm {
        UpdateImageForm {
            image: image.map(str::to_string),
            text_areas: text_areas.map(str::to_string),
            new_texts: new_texts.map(str::to_string),
            colors: colors.map(str::to_string),
        }
    }

    #[test]
    fn update_without_image_is_bad_request() {
        let form = update_form(None, Some("[]"), Some("[]"), Some("[]"));
        let err = run_update_image(form, None).expect_err("reject");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "no image data provided");
    }

    #[test]
    fn update_with_missing_arrays_is_bad_request() {
        let form = update_form(Some("data:image/png;base64,Zm9v"), None, Some("[]"), Some("[]"));
        let err = run_update_image(form, None).expect_err("reject");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "no text areas provided");

        let form = update_form(Some("data:image/png;base64,Zm9v"), Some("[]"), Some("[]"), None);
        let err = run_update_image(form, None).expect_err("reject");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "no colors provided");
    }

    fn section_png(width: u32, height: u32, value: u8) -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([value, value, value, 255]),
        );
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode");
        bytes
    }

    #[test]
    fn empty_capture_yields_no_screenshots() {
        let base = tempfile::tempdir().expect("tempdir");
        let run = RunDirs::create(base.path()).expect("run");
        let outcome = process_shots(run, &[], 350, 860).expect("process");
        assert!(matches!(outcome, CaptureOutcome::NoScreenshots));
    }

    #[test]
    fn captured_sections_are_saved_and_stitched() {
        let base = tempfile::tempdir().expect("tempdir");
        let run = RunDirs::create(base.path()).expect("run");
        let shots = vec![section_png(400, 100, 40), section_png(380, 60, 200)];
        let outcome = process_shots(run, &shots, 350, 700).expect("process");
        let CaptureOutcome::Done { run, enlarged } = outcome else {
            panic!("expected a completed capture");
        };
        assert_eq!(
            enlarged,
            vec![
                "enlarged_screenshot_section_0.png",
                "enlarged_screenshot_section_1.png"
            ]
        );
        assert!(run.stitched_path().is_file());
        assert!(run.screenshots_dir().join("screenshot_section_0.png").is_file());
        assert!(run.cropped_dir().join("cropped_screenshot_section_1.png").is_file());
    }

    #[tokio::test]
    async fn large_uploads_reach_the_handler() {
        use tower::ServiceExt;

        let state = Arc::new(ServerState::new(Settings::default()).expect("state"));
        let app = build_router(state).expect("router");

        let boundary = "bound";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; \
                 filename=\"big.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&vec![0u8; 3 * 1024 * 1024]);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/process_image")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        // A 3 MB upload must get past the body-size limit; the handler then
        // rejects the unrecognizable payload itself.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body");
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("unrecognized upload content"), "got: {}", text);
    }
}
