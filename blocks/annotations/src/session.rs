use ab_glyph::FontArc;
use lambda_http::{http::StatusCode, Body, Error, Response};
use notedmark_atoms::drawing::{
    self, AnnotationObject, BackgroundLayer, ObjectPatch, SessionState, Surface, SurfaceConfig,
    SurfaceStats, Tool, EXPORT_MULTIPLIER,
};
use notedmark_atoms::media::{self, ImageFetcher, ImageRecord, ImageTable, ObjectStore, UploadOptions};
use notedmark_atoms::users::Identity;
use notedmark_atoms::AppError;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth_gate::GALLERY_ROUTE;
use crate::notice::{failure_response, success_response, Notice};

/// An exported raster ready to hand to the user.
#[derive(Debug, Clone)]
pub struct RasterDownload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// One editing surface bound to one source image.
///
/// Lifecycle: `Uninitialized -> Loading -> Ready <-> Saving`, with
/// `Loading -> Failed` when the image cannot be loaded. A new image URL
/// starts over with a fresh surface; the old one is dropped first.
pub struct AnnotationSession {
    source: ImageRecord,
    config: SurfaceConfig,
    container_width: u32,
    font: Option<FontArc>,
    state: SessionState,
    image_url: Option<String>,
    surface: Option<Surface>,
    active_tool: Tool,
    stats: Arc<SurfaceStats>,
}

impl AnnotationSession {
    pub fn new(source: ImageRecord, config: SurfaceConfig) -> Self {
        let container_width = config.default_container_width();
        Self {
            source,
            config,
            container_width,
            font: None,
            state: SessionState::Uninitialized,
            image_url: None,
            surface: None,
            active_tool: Tool::Select,
            stats: Arc::new(SurfaceStats::default()),
        }
    }

    pub fn with_container_width(mut self, container_width: u32) -> Self {
        self.container_width = container_width;
        self
    }

    pub fn with_font(mut self, font: Option<FontArc>) -> Self {
        self.font = font;
        self
    }

    pub fn with_stats(mut self, stats: Arc<SurfaceStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn source(&self) -> &ImageRecord {
        &self.source
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn active_tool(&self) -> Tool {
        self.active_tool
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn stats(&self) -> &Arc<SurfaceStats> {
        &self.stats
    }

    /// Annotation objects in z-order; empty before initialization.
    pub fn objects(&self) -> &[AnnotationObject] {
        self.surface.as_ref().map(Surface::objects).unwrap_or(&[])
    }

    /// Build a surface for `image_url` and load the image into its background.
    ///
    /// Repeating the current URL is a no-op. A load failure leaves a blank
    /// surface in `Failed`.
    pub async fn initialize(&mut self, image_url: &str, fetcher: &dyn ImageFetcher) -> Result<(), AppError> {
        if self.state != SessionState::Uninitialized && self.image_url.as_deref() == Some(image_url) {
            return Ok(());
        }

        // Previous surface goes before the next one exists.
        self.surface = None;

        let width = self.config.width_for_container(self.container_width);
        let height = self.config.height;
        self.surface = Some(Surface::new(width, height, self.config.background_color, self.stats.clone()));
        self.image_url = Some(image_url.to_string());
        self.active_tool = Tool::Select;
        self.state = SessionState::Loading;

        let loaded = match fetcher.fetch(image_url).await {
            Ok(bytes) => drawing::decode_image(&bytes),
            Err(e) => Err(AppError::ResourceLoad(format!("Failed to load image: {}", e))),
        };

        match (loaded, self.surface.as_mut()) {
            (Ok(image), Some(surface)) => {
                surface.set_background(BackgroundLayer::fit(image, width, height));
                self.state = SessionState::Ready;
                tracing::info!(
                    "Session ready: image_id={}, surface={}x{}",
                    self.source.id,
                    width,
                    height
                );
                Ok(())
            }
            (Err(e), _) => {
                self.state = SessionState::Failed;
                tracing::error!("❌ Session failed to load {}: {}", image_url, e);
                Err(e)
            }
            (Ok(_), None) => {
                self.state = SessionState::Failed;
                Err(AppError::SessionNotReady(SessionState::Failed))
            }
        }
    }

    fn ready_surface(&mut self) -> Result<&mut Surface, AppError> {
        if self.state != SessionState::Ready {
            return Err(AppError::SessionNotReady(self.state));
        }
        self.surface
            .as_mut()
            .ok_or(AppError::SessionNotReady(SessionState::Uninitialized))
    }

    /// Switch tools. Rectangle and text drop a new default object onto the
    /// surface on every activation and select it; select adds nothing.
    pub fn activate_tool(&mut self, tool: Tool) -> Result<Option<usize>, AppError> {
        let surface = self.ready_surface()?;
        surface.discard_active();

        let added = tool.default_object().map(|object| {
            let index = surface.add(object);
            surface.set_active(index);
            index
        });
        self.active_tool = tool;
        Ok(added)
    }

    /// Remove every annotation; the background stays.
    pub fn clear(&mut self) -> Result<Notice, AppError> {
        let removed = self.ready_surface()?.clear_objects();
        tracing::debug!("Cleared {} annotation objects", removed);
        Ok(Notice::success("Annotations cleared"))
    }

    /// Move, resize or edit one object in place.
    pub fn update_object(&mut self, index: usize, patch: &ObjectPatch) -> Result<(), AppError> {
        let object = self
            .ready_surface()?
            .object_mut(index)
            .ok_or_else(|| AppError::NotFound(format!("No annotation at index {}", index)))?;
        object.apply(patch)
    }

    pub fn remove_object(&mut self, index: usize) -> Result<AnnotationObject, AppError> {
        self.ready_surface()?
            .remove(index)
            .ok_or_else(|| AppError::NotFound(format!("No annotation at index {}", index)))
    }

    /// Replace the scene with objects edited on the client. One invalid
    /// object rejects the whole scene and the surface keeps its objects.
    pub fn load_scene(&mut self, objects: Vec<AnnotationObject>) -> Result<(), AppError> {
        let surface = self.ready_surface()?;
        for (index, object) in objects.iter().enumerate() {
            object
                .validate()
                .map_err(|e| AppError::validation(format!("Annotation {}: {}", index, e)))?;
        }
        surface.clear_objects();
        for object in objects {
            surface.add(object);
        }
        Ok(())
    }

    fn render_png(&self, multiplier: u32) -> Result<Vec<u8>, AppError> {
        let surface = self
            .surface
            .as_ref()
            .ok_or(AppError::SessionNotReady(self.state))?;
        drawing::export_png(surface, multiplier, self.font.as_ref())
    }

    /// The composed surface as PNG at `multiplier`x.
    pub fn export_raster(&self, multiplier: u32) -> Result<Vec<u8>, AppError> {
        if self.state != SessionState::Ready {
            return Err(AppError::SessionNotReady(self.state));
        }
        self.render_png(multiplier)
    }

    pub fn download(&self) -> Result<RasterDownload, AppError> {
        let bytes = self.export_raster(EXPORT_MULTIPLIER)?;
        Ok(RasterDownload {
            file_name: media::annotated_file_name(media::now_millis()),
            bytes,
        })
    }

    /// Store the composed raster as a new image derived from the source.
    ///
    /// Steps: export, upload, public URL, insert. A failure after the upload
    /// leaves the object in the bucket.
    pub async fn save<F>(
        &mut self,
        identity: Option<&Identity>,
        table: &dyn ImageTable,
        store: &dyn ObjectStore,
        on_complete: F,
    ) -> Result<ImageRecord, AppError>
    where
        F: FnOnce(&ImageRecord) + Send,
    {
        let identity = identity.ok_or(AppError::Unauthenticated)?;
        if self.state != SessionState::Ready {
            return Err(AppError::SessionNotReady(self.state));
        }

        self.state = SessionState::Saving;
        let result = self.persist(identity, table, store).await;
        self.state = SessionState::Ready;

        let record = result?;
        on_complete(&record);
        Ok(record)
    }

    async fn persist(
        &self,
        identity: &Identity,
        table: &dyn ImageTable,
        store: &dyn ObjectStore,
    ) -> Result<ImageRecord, AppError> {
        let bytes = self.render_png(EXPORT_MULTIPLIER)?;
        let file_name = media::annotated_file_name(media::now_millis());
        let path = format!("{}/{}", identity.user_id, file_name);

        media::store_and_record(
            store,
            table,
            &identity.user_id,
            &path,
            bytes,
            UploadOptions::no_overwrite(Some("image/png".to_string())),
            file_name,
            Some(self.source.id.clone()),
        )
        .await
    }
}

impl Drop for AnnotationSession {
    fn drop(&mut self) {
        if self.surface.is_some() {
            tracing::debug!("Session for image {} torn down", self.source.id);
        }
    }
}

/// What the editor sends along with download and save.
#[derive(Debug, Default, Deserialize)]
pub struct SceneRequest {
    #[serde(default)]
    pub container_width: Option<u32>,
    /// The scene as edited on the client, bottom to top.
    #[serde(default)]
    pub objects: Vec<AnnotationObject>,
    /// Tool clicks applied after the scene is loaded.
    #[serde(default)]
    pub tools: Vec<Tool>,
}

/// Backends and settings a session needs.
pub struct SessionContext<'a> {
    pub table: &'a dyn ImageTable,
    pub store: &'a dyn ObjectStore,
    pub fetcher: &'a dyn ImageFetcher,
    pub config: &'a SurfaceConfig,
    pub font: Option<&'a FontArc>,
}

/// Open the user's image and rebuild the client's scene over it.
pub async fn open_session(
    ctx: &SessionContext<'_>,
    identity: &Identity,
    image_id: &str,
    request: SceneRequest,
) -> Result<AnnotationSession, AppError> {
    let source = media::get_image(ctx.table, &identity.user_id, image_id).await?;
    let image_url = source.public_url.clone();

    let mut session = AnnotationSession::new(source, ctx.config.clone()).with_font(ctx.font.cloned());
    if let Some(width) = request.container_width {
        session = session.with_container_width(width);
    }
    session.initialize(&image_url, ctx.fetcher).await?;
    session.load_scene(request.objects)?;
    for tool in request.tools {
        session.activate_tool(tool)?;
    }
    Ok(session)
}

fn parse_scene(body: &[u8]) -> Result<SceneRequest, AppError> {
    if body.is_empty() {
        return Ok(SceneRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::validation(format!("Invalid scene: {}", e)))
}

/// HTTP handler: POST /annotate/{id}/download
pub async fn download_handler(
    ctx: &SessionContext<'_>,
    identity: &Identity,
    image_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let result = async {
        let session = open_session(ctx, identity, image_id, parse_scene(body)?).await?;
        session.download()
    }
    .await;

    match result {
        Ok(download) => {
            tracing::info!("✅ download: image_id={}, file={}", image_id, download.file_name);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "image/png")
                .header(
                    "Content-Disposition",
                    format!("attachment; filename=\"{}\"", download.file_name),
                )
                .body(Body::Binary(download.bytes))
                .map_err(Box::new)?)
        }
        Err(e) => failure_response("download", &e, "Failed to load image"),
    }
}

/// HTTP handler: POST /annotate/{id}/save
pub async fn save_handler(
    ctx: &SessionContext<'_>,
    identity: Option<&Identity>,
    image_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let result = async {
        let identity = identity.ok_or(AppError::Unauthenticated)?;
        let mut session = open_session(ctx, identity, image_id, parse_scene(body)?).await?;
        session
            .save(Some(identity), ctx.table, ctx.store, |record| {
                tracing::info!("Returning to dashboard... saved image_id={}", record.id);
            })
            .await
    }
    .await;

    match result {
        Ok(record) => success_response(
            StatusCode::CREATED,
            Notice::success("Annotated image saved!").redirect_to(GALLERY_ROUTE),
            Some(serde_json::to_value(&record)?),
        ),
        Err(e) => failure_response("save", &e, "Failed to save image"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use notedmark_atoms::memory::{MemoryImageTable, MemoryObjectStore};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(width, height, Rgba([10, 200, 30, 255]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn identity() -> Identity {
        Identity { user_id: "user-1".into(), email: "user@example.com".into() }
    }

    async fn source(table: &MemoryImageTable, store: &MemoryObjectStore) -> ImageRecord {
        media::store_and_record(
            store,
            table,
            "user-1",
            "user-1/1700000000000.png",
            png(400, 300),
            UploadOptions::no_overwrite(Some("image/png".into())),
            "beach.png".into(),
            None,
        )
        .await
        .unwrap()
    }

    async fn ready_session(table: &MemoryImageTable, store: &MemoryObjectStore) -> AnnotationSession {
        let record = source(table, store).await;
        let url = record.public_url.clone();
        let mut session = AnnotationSession::new(record, SurfaceConfig::default());
        session.initialize(&url, store).await.unwrap();
        session
    }

    #[tokio::test]
    async fn initialize_fits_the_image_and_becomes_ready() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let session = ready_session(&table, &store).await;

        assert_eq!(session.state(), SessionState::Ready);
        let surface = session.surface().unwrap();
        assert_eq!((surface.width(), surface.height()), (800, 600));
        // 400x300 into 800x600 scales by 2.
        assert_eq!(surface.background().unwrap().scale, 2.0);
    }

    #[tokio::test]
    async fn narrow_container_narrows_the_surface() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let record = source(&table, &store).await;
        let url = record.public_url.clone();
        let mut session = AnnotationSession::new(record, SurfaceConfig::default()).with_container_width(432);
        session.initialize(&url, &store).await.unwrap();
        assert_eq!(session.surface().unwrap().width(), 400);
    }

    #[tokio::test]
    async fn load_failure_leaves_a_blank_failed_surface() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let record = source(&table, &store).await;
        let mut session = AnnotationSession::new(record, SurfaceConfig::default());

        let err = session.initialize("memory://storage/images/missing.png", &store).await.unwrap_err();
        assert!(matches!(err, AppError::ResourceLoad(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.surface().unwrap().background().is_none());
        assert_eq!(
            session.activate_tool(Tool::Rectangle).unwrap_err(),
            AppError::SessionNotReady(SessionState::Failed)
        );
    }

    #[tokio::test]
    async fn same_url_initializes_once_and_new_url_disposes_the_old_surface() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;
        let stats = session.stats().clone();
        let url = session.source().public_url.clone();

        session.initialize(&url, &store).await.unwrap();
        assert_eq!(stats.created(), 1);

        store
            .upload("user-1/other.png", png(10, 10), UploadOptions::no_overwrite(None))
            .await
            .unwrap();
        session.initialize(&store.public_url("user-1/other.png"), &store).await.unwrap();
        assert_eq!((stats.created(), stats.disposed()), (2, 1));

        drop(session);
        assert_eq!((stats.created(), stats.disposed()), (2, 2));
    }

    #[tokio::test]
    async fn every_rectangle_click_adds_a_rectangle() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;

        for n in 0..5 {
            assert_eq!(session.activate_tool(Tool::Rectangle).unwrap(), Some(n));
        }
        assert_eq!(session.objects().len(), 5);
        assert!(session.objects().iter().all(AnnotationObject::is_rectangle));
        assert!(session.surface().unwrap().background().is_some());
        assert_eq!(session.surface().unwrap().active(), Some(4));
    }

    #[tokio::test]
    async fn select_adds_nothing_and_drops_the_selection() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;
        session.activate_tool(Tool::Text).unwrap();

        assert_eq!(session.activate_tool(Tool::Select).unwrap(), None);
        assert_eq!(session.objects().len(), 1);
        assert_eq!(session.surface().unwrap().active(), None);
        assert_eq!(session.active_tool(), Tool::Select);
    }

    #[tokio::test]
    async fn clear_leaves_only_the_background() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;
        session.activate_tool(Tool::Rectangle).unwrap();
        session.activate_tool(Tool::Text).unwrap();

        let notice = session.clear().unwrap();
        assert_eq!(notice.message, "Annotations cleared");
        assert!(session.objects().is_empty());
        assert!(session.surface().unwrap().background().is_some());
    }

    #[tokio::test]
    async fn objects_can_be_edited_in_place() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;
        session.activate_tool(Tool::Rectangle).unwrap();

        session
            .update_object(0, &ObjectPatch { left: Some(5.0), top: Some(6.0), ..Default::default() })
            .unwrap();
        assert!(matches!(
            session.objects()[0],
            AnnotationObject::Rectangle { left, top, .. } if left == 5.0 && top == 6.0
        ));
        assert!(matches!(
            session.update_object(3, &ObjectPatch::default()),
            Err(AppError::NotFound(_))
        ));
        session.remove_object(0).unwrap();
        assert!(session.objects().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_scene_is_rejected_whole() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;
        session.activate_tool(Tool::Rectangle).unwrap();

        let scene: Vec<AnnotationObject> = serde_json::from_str(
            r##"[
                {"type":"rectangle","left":10,"top":10,"width":20,"height":20,"fill":"#000000","stroke":"#000000","stroke_width":1},
                {"type":"rectangle","left":0,"top":0,"width":-5,"height":20,"fill":"#000000","stroke":"#000000","stroke_width":1}
            ]"##,
        )
        .unwrap();
        let err = session.load_scene(scene).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.starts_with("Annotation 1:")));
        assert_eq!(session.objects(), &[AnnotationObject::default_rectangle()]);
    }

    #[tokio::test]
    async fn extreme_but_finite_scene_still_exports() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;

        let scene: Vec<AnnotationObject> = serde_json::from_str(
            r##"[
                {"type":"rectangle","left":-1e308,"top":0,"width":1e308,"height":10,"fill":"#000000","stroke":"#000000","stroke_width":1},
                {"type":"rectangle","left":2e9,"top":0,"width":1e9,"height":10,"fill":"#000000","stroke":"#000000","stroke_width":1},
                {"type":"rectangle","left":0,"top":0,"width":1e308,"height":1e308,"fill":"#000000","stroke":"#000000","stroke_width":1e308}
            ]"##,
        )
        .unwrap();
        session.load_scene(scene).unwrap();

        let download = session.download().unwrap();
        let decoded = image::load_from_memory(&download.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1600, 1200));
    }

    #[tokio::test]
    async fn download_is_a_timestamped_double_size_png() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let session = ready_session(&table, &store).await;

        let download = session.download().unwrap();
        assert!(download.file_name.starts_with("annotated-"));
        assert!(download.file_name.ends_with(".png"));
        let decoded = image::load_from_memory(&download.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1600, 1200));
    }

    #[tokio::test]
    async fn export_depends_only_on_the_objects() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;
        session.activate_tool(Tool::Rectangle).unwrap();
        let first = session.export_raster(2).unwrap();
        assert_eq!(session.export_raster(2).unwrap(), first);
    }

    #[tokio::test]
    async fn save_without_identity_touches_no_backend() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;
        let (table_calls, store_calls) = (table.calls().await.len(), store.calls().await.len());

        let err = session.save(None, &table, &store, |_| {}).await.unwrap_err();
        assert_eq!(err, AppError::Unauthenticated);
        assert_eq!(table.calls().await.len(), table_calls);
        assert_eq!(store.calls().await.len(), store_calls);
    }

    #[tokio::test]
    async fn save_records_a_derivative_and_calls_back() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;
        session.activate_tool(Tool::Rectangle).unwrap();
        let called = AtomicBool::new(false);

        let record = session
            .save(Some(&identity()), &table, &store, |_| called.store(true, Ordering::SeqCst))
            .await
            .unwrap();

        assert!(called.load(Ordering::SeqCst));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(record.original_image_id.as_deref(), Some(session.source().id.as_str()));
        assert!(record.path.starts_with("user-1/annotated-"));
        assert_eq!(record.filename, record.path.trim_start_matches("user-1/"));

        let stored = store.object(&record.path).await.unwrap();
        assert_eq!(stored.options.content_type.as_deref(), Some("image/png"));
        assert_eq!(table.rows().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_insert_after_upload_is_not_rolled_back() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;
        table.fail_on("insert", "new row violates row-level security policy").await;

        let err = session.save(Some(&identity()), &table, &store, |_| {}).await.unwrap_err();
        assert_eq!(err, AppError::backend("new row violates row-level security policy"));
        assert_eq!(session.state(), SessionState::Ready);
        // Source plus the orphaned annotated upload.
        assert_eq!(store.paths().await.len(), 2);
        assert_eq!(table.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_upload_skips_the_insert() {
        let (table, store) = (MemoryImageTable::new(), MemoryObjectStore::default());
        let mut session = ready_session(&table, &store).await;
        store.fail_on("upload", "Bucket not found").await;
        let inserts_before = table.calls().await.iter().filter(|c| c.starts_with("insert")).count();

        assert!(session.save(Some(&identity()), &table, &store, |_| {}).await.is_err());
        let inserts_after = table.calls().await.iter().filter(|c| c.starts_with("insert")).count();
        assert_eq!(inserts_before, inserts_after);
    }
}
