//! Code bundles and website files: packaging, hashing and upload.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("{name} not found at {path}")]
    Missing { name: String, path: String },

    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to package {name}: {reason}")]
    Package { name: String, reason: String },

    #[error("Upload of {key} to {bucket} failed: {reason}")]
    Upload { bucket: String, key: String, reason: String },

    #[error("{0} is not a directory")]
    NotADirectory(String),
}

/// A deployable zip bundle and its content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub name: String,
    pub source: PathBuf,
    pub bytes: Vec<u8>,
    pub hash: u32,
}

impl Asset {
    /// Packages `path`: a `.zip` file is taken as is, any other file is zipped
    /// alone, a directory is zipped recursively. Files without an extension
    /// are stored as `bootstrap`, the entry point of custom runtimes.
    pub fn from_path(name: &str, path: &Path) -> Result<Self, AssetError> {
        let shown = path.display().to_string();
        let metadata = std::fs::metadata(path).map_err(|_| AssetError::Missing {
            name: name.to_string(),
            path: shown.clone(),
        })?;
        let bytes = if metadata.is_dir() {
            let files = list_files(path)?;
            if files.is_empty() {
                return Err(AssetError::Package { name: name.to_string(), reason: format!("{shown} is empty") });
            }
            zip_entries(name, &files)?
        } else if path.extension().map(|e| e == "zip").unwrap_or(false) {
            read_file(path)?
        } else {
            let entry = match (path.extension(), path.file_name()) {
                (Some(_), Some(file_name)) => file_name.to_string_lossy().to_string(),
                _ => "bootstrap".to_string(),
            };
            zip_entries(name, &[(entry, path.to_path_buf())])?
        };
        let hash = adler::adler32_slice(&bytes);
        tracing::debug!(asset = name, source = %shown, size = bytes.len(), hash = format!("{hash:08x}"), "packaged asset");
        Ok(Self { name: name.to_string(), source: path.to_path_buf(), bytes, hash })
    }

    pub fn hash_hex(&self) -> String {
        format!("{:08x}", self.hash)
    }

    pub fn key(&self) -> String {
        format!("assets/{}_{}.zip", self.name, self.hash_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLocation {
    pub bucket: String,
    pub key: String,
}

/// Per account and region, since Lambda code must live in the function's region.
pub fn staging_bucket_name(account: &str, region: &str) -> String {
    format!("blogstack-assets-{account}-{region}")
}

fn read_file(path: &Path) -> Result<Vec<u8>, AssetError> {
    std::fs::read(path).map_err(|e| AssetError::Read { path: path.display().to_string(), reason: e.to_string() })
}

fn iter_files_recursively<P: AsRef<Path>>(
    start_dir: P,
    callback: &mut impl FnMut(PathBuf) -> Result<(), AssetError>,
) -> Result<(), AssetError> {
    let read_err = |p: &Path, e: std::io::Error| AssetError::Read { path: p.display().to_string(), reason: e.to_string() };
    let readdir = std::fs::read_dir(start_dir.as_ref()).map_err(|e| read_err(start_dir.as_ref(), e))?;
    for entry in readdir {
        let direntry = entry.map_err(|e| read_err(start_dir.as_ref(), e))?;
        let path = direntry.path();
        let fp = direntry.file_type().map_err(|e| read_err(&path, e))?;
        if fp.is_dir() {
            iter_files_recursively(&path, callback)?;
        } else {
            callback(path)?;
        }
    }
    Ok(())
}

/// Every file under `dir` as (forward slash relative key, path), sorted by key.
pub fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, AssetError> {
    if !dir.is_dir() {
        return Err(AssetError::NotADirectory(dir.display().to_string()));
    }
    let mut out = vec![];
    iter_files_recursively(dir, &mut |path| {
        let relative = path.strip_prefix(dir).unwrap_or(&path);
        let key = relative.components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        out.push((key, path));
        Ok(())
    })?;
    out.sort();
    Ok(out)
}

// fixed timestamps so identical inputs produce identical bytes, and hashes
fn zip_entries(name: &str, files: &[(String, PathBuf)]) -> Result<Vec<u8>, AssetError> {
    let package_err = |e: String| AssetError::Package { name: name.to_string(), reason: e };
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (entry, path) in files {
        let executable = entry == "bootstrap" || Path::new(entry).extension().is_none();
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(if executable { 0o755 } else { 0o644 });
        zip.start_file(entry.as_str(), options).map_err(|e| package_err(e.to_string()))?;
        zip.write_all(&read_file(path)?).map_err(|e| package_err(e.to_string()))?;
    }
    let cursor = zip.finish().map_err(|e| package_err(e.to_string()))?;
    Ok(cursor.into_inner())
}

pub fn content_type(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[async_trait]
pub trait AssetPublisher: Send + Sync {
    /// Makes `asset` available to CloudFormation in `region`.
    async fn publish(&self, asset: &Asset, region: &str) -> Result<AssetLocation, AssetError>;

    /// Uploads every file under `dir` to `bucket`, returning how many.
    async fn sync_website(&self, dir: &Path, bucket: &str, region: &str) -> Result<usize, AssetError>;
}

pub struct S3AssetPublisher {
    account: String,
    clients: tokio::sync::Mutex<HashMap<String, aws_sdk_s3::Client>>,
}

impl S3AssetPublisher {
    pub fn new(account: &str) -> Self {
        Self { account: account.to_string(), clients: Default::default() }
    }

    async fn client(&self, region: &str) -> aws_sdk_s3::Client {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(region) {
            return client.clone();
        }
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_s3::Client::new(&shared_config);
        clients.insert(region.to_string(), client.clone());
        client
    }

    async fn ensure_bucket(&self, client: &aws_sdk_s3::Client, bucket: &str, region: &str) -> Result<(), AssetError> {
        if client.head_bucket().bucket(bucket).send().await.is_ok() {
            return Ok(());
        }
        tracing::info!(bucket, region, "creating asset bucket");
        let mut req = client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint
        if region != aws_regions::EDGE_REGION {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        match req.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let reason = DisplayErrorContext(&e).to_string();
                if reason.contains("BucketAlreadyOwnedByYou") {
                    return Ok(());
                }
                Err(AssetError::Upload { bucket: bucket.to_string(), key: String::new(), reason })
            }
        }
    }

    async fn put(&self, client: &aws_sdk_s3::Client, bucket: &str, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), AssetError> {
        client.put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AssetError::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl AssetPublisher for S3AssetPublisher {
    async fn publish(&self, asset: &Asset, region: &str) -> Result<AssetLocation, AssetError> {
        let client = self.client(region).await;
        let bucket = staging_bucket_name(&self.account, region);
        self.ensure_bucket(&client, &bucket, region).await?;
        let key = asset.key();
        // keys embed the content hash, so an existing key is already up to date
        if client.head_object().bucket(&bucket).key(&key).send().await.is_ok() {
            tracing::info!(asset = %asset.name, bucket, key, "asset already uploaded");
        } else {
            self.put(&client, &bucket, &key, asset.bytes.clone(), "application/zip").await?;
            tracing::info!(asset = %asset.name, bucket, key, "uploaded asset");
        }
        Ok(AssetLocation { bucket, key })
    }

    async fn sync_website(&self, dir: &Path, bucket: &str, region: &str) -> Result<usize, AssetError> {
        let client = self.client(region).await;
        let files = list_files(dir)?;
        for (key, path) in files.iter() {
            let bytes = tokio::fs::read(path).await
                .map_err(|e| AssetError::Read { path: path.display().to_string(), reason: e.to_string() })?;
            self.put(&client, bucket, key, bytes, content_type(key)).await?;
            tracing::debug!(bucket, key, "uploaded website file");
        }
        tracing::info!(bucket, files = files.len(), "website synced");
        Ok(files.len())
    }
}

/// Keeps uploads in memory, bucket -> key -> content hash.
#[derive(Default)]
pub struct LocalAssetPublisher {
    account: String,
    objects: Mutex<BTreeMap<String, BTreeMap<String, u32>>>,
}

impl LocalAssetPublisher {
    pub fn new(account: &str) -> Self {
        Self { account: account.to_string(), objects: Default::default() }
    }

    pub fn objects(&self, bucket: &str) -> BTreeMap<String, u32> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.get(bucket).cloned().unwrap_or_default()
    }

    fn record(&self, bucket: &str, key: &str, hash: u32) {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.entry(bucket.to_string()).or_default().insert(key.to_string(), hash);
    }
}

#[async_trait]
impl AssetPublisher for LocalAssetPublisher {
    async fn publish(&self, asset: &Asset, region: &str) -> Result<AssetLocation, AssetError> {
        let bucket = staging_bucket_name(&self.account, region);
        let key = asset.key();
        self.record(&bucket, &key, asset.hash);
        tracing::info!(asset = %asset.name, bucket, key, "published asset locally");
        Ok(AssetLocation { bucket, key })
    }

    async fn sync_website(&self, dir: &Path, bucket: &str, _region: &str) -> Result<usize, AssetError> {
        let files = list_files(dir)?;
        for (key, path) in files.iter() {
            self.record(bucket, key, adler::adler32_slice(&read_file(path)?));
        }
        Ok(files.len())
    }
}
