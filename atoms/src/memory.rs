//! In-process backends: the local `BACKEND_MODE=memory` runtime and the
//! test doubles. Every call is recorded, and any operation can be told to
//! fail, so callers can check which steps ran.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::media::model::{ImageRecord, PresignedUpload, UploadOptions, IMAGES_BUCKET};
use crate::media::store::{ImageFetcher, ImageTable, ObjectStore};
use crate::users::model::{Credentials, Identity, Session};
use crate::users::provider::SessionProvider;
use crate::AppError;

/// Shared call log plus per-operation failure switches.
#[derive(Debug, Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, String>>,
}

impl Recorder {
    async fn record(&self, op: &'static str, detail: &str) -> Result<(), AppError> {
        self.calls.lock().await.push(format!("{} {}", op, detail).trim_end().to_string());
        match self.failures.lock().await.get(op) {
            Some(message) => Err(AppError::Backend(message.clone())),
            None => Ok(()),
        }
    }
}

// ========== TABLE ==========

#[derive(Debug, Default)]
pub struct MemoryImageTable {
    rows: Mutex<Vec<ImageRecord>>,
    recorder: Recorder,
}

impl MemoryImageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call to `op` (`insert`, `list`, `get`, `delete`) fail.
    pub async fn fail_on(&self, op: &'static str, message: &str) {
        self.recorder.failures.lock().await.insert(op, message.to_string());
    }

    pub async fn calls(&self) -> Vec<String> {
        self.recorder.calls.lock().await.clone()
    }

    pub async fn rows(&self) -> Vec<ImageRecord> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl ImageTable for MemoryImageTable {
    async fn insert(&self, record: &ImageRecord) -> Result<(), AppError> {
        self.recorder.record("insert", &record.path).await?;
        let mut rows = self.rows.lock().await;
        if rows.iter().any(|r| r.id == record.id) {
            return Err(AppError::backend("duplicate key value violates unique constraint"));
        }
        rows.push(record.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ImageRecord>, AppError> {
        self.recorder.record("list", user_id).await?;
        // Newest insert first, so equal timestamps still come out newest first.
        let mut rows: Vec<ImageRecord> = self
            .rows
            .lock()
            .await
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<ImageRecord>, AppError> {
        self.recorder.record("get", id).await?;
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .find(|r| r.user_id == user_id && r.id == id)
            .cloned())
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<(), AppError> {
        self.recorder.record("delete", id).await?;
        self.rows.lock().await.retain(|r| !(r.user_id == user_id && r.id == id));
        Ok(())
    }
}

// ========== BUCKET ==========

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub options: UploadOptions,
}

#[derive(Debug)]
pub struct MemoryObjectStore {
    base_url: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    recorder: Recorder,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("memory://storage")
    }
}

impl MemoryObjectStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
            recorder: Recorder::default(),
        }
    }

    /// Make every later call to `op` (`upload`, `remove`, `presign`, `size`, `fetch`) fail.
    pub async fn fail_on(&self, op: &'static str, message: &str) {
        self.recorder.failures.lock().await.insert(op, message.to_string());
    }

    pub async fn calls(&self) -> Vec<String> {
        self.recorder.calls.lock().await.clone()
    }

    pub async fn object(&self, path: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(path).cloned()
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<(), AppError> {
        self.recorder.record("upload", path).await?;
        let mut objects = self.objects.lock().await;
        if !options.upsert && objects.contains_key(path) {
            return Err(AppError::backend("The resource already exists"));
        }
        objects.insert(path.to_string(), StoredObject { bytes, options });
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), AppError> {
        self.recorder.record("remove", path).await?;
        self.objects.lock().await.remove(path);
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, IMAGES_BUCKET, path)
    }

    fn path_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(self.base_url.as_str())?
            .strip_prefix('/')?
            .strip_prefix(IMAGES_BUCKET)?
            .strip_prefix('/')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
    }

    /// Nothing listens on the returned URL; callers finish the transfer with
    /// `upload` at the same path.
    async fn presign_upload(
        &self,
        path: &str,
        options: &UploadOptions,
        size: u64,
        expires_in: Duration,
    ) -> Result<PresignedUpload, AppError> {
        self.recorder.record("presign", path).await?;
        let mut headers = BTreeMap::new();
        headers.insert("Content-Length".to_string(), size.to_string());
        if let Some(content_type) = &options.content_type {
            headers.insert("Content-Type".to_string(), content_type.clone());
        }
        Ok(PresignedUpload {
            method: "PUT".to_string(),
            url: format!("{}?upload", self.public_url(path)),
            headers,
            expires_in_seconds: expires_in.as_secs(),
        })
    }

    async fn object_size(&self, path: &str) -> Result<Option<u64>, AppError> {
        self.recorder.record("size", path).await?;
        Ok(self.objects.lock().await.get(path).map(|o| o.bytes.len() as u64))
    }
}

#[async_trait]
impl ImageFetcher for MemoryObjectStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError> {
        self.recorder.record("fetch", url).await?;
        let path = self
            .path_for_url(url)
            .ok_or_else(|| AppError::backend(format!("Not a URL of this bucket: {}", url)))?;
        self.objects
            .lock()
            .await
            .get(&path)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| AppError::backend("Object not found"))
    }
}

// ========== SESSIONS ==========

#[derive(Debug, Clone)]
struct Account {
    user_id: String,
    password: String,
}

#[derive(Debug, Default)]
pub struct MemorySessionProvider {
    accounts: Mutex<HashMap<String, Account>>,
    sessions: Mutex<HashMap<String, Identity>>,
    recorder: Recorder,
}

impl MemorySessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call to `op` (`session`, `sign_up`, `sign_in`, `sign_out`) fail.
    pub async fn fail_on(&self, op: &'static str, message: &str) {
        self.recorder.failures.lock().await.insert(op, message.to_string());
    }

    pub async fn calls(&self) -> Vec<String> {
        self.recorder.calls.lock().await.clone()
    }

    pub async fn live_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl SessionProvider for MemorySessionProvider {
    async fn current_session(&self, access_token: &str) -> Result<Option<Session>, AppError> {
        self.recorder.record("session", "").await?;
        Ok(self.sessions.lock().await.get(access_token).map(|identity| Session {
            access_token: access_token.to_string(),
            refresh_token: None,
            identity: identity.clone(),
        }))
    }

    async fn sign_up(&self, credentials: &Credentials, redirect_to: &str) -> Result<(), AppError> {
        self.recorder.record("sign_up", redirect_to).await?;
        let mut accounts = self.accounts.lock().await;
        let email = credentials.email.trim().to_lowercase();
        if accounts.contains_key(&email) {
            return Err(AppError::backend("User already registered"));
        }
        accounts.insert(
            email,
            Account {
                user_id: uuid::Uuid::new_v4().to_string(),
                password: credentials.password.clone(),
            },
        );
        Ok(())
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, AppError> {
        self.recorder.record("sign_in", "").await?;
        let email = credentials.email.trim().to_lowercase();
        let account = self
            .accounts
            .lock()
            .await
            .get(&email)
            .filter(|a| a.password == credentials.password)
            .cloned()
            .ok_or_else(|| AppError::backend("Invalid login credentials"))?;

        let identity = Identity { user_id: account.user_id, email };
        let access_token = uuid::Uuid::new_v4().to_string();
        self.sessions.lock().await.insert(access_token.clone(), identity.clone());
        Ok(Session {
            access_token,
            refresh_token: Some(uuid::Uuid::new_v4().to_string()),
            identity,
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AppError> {
        self.recorder.record("sign_out", "").await?;
        self.sessions.lock().await.remove(access_token);
        Ok(())
    }
}
