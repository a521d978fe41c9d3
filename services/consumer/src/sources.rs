//! Raw file sources.
//!
//! A [`Fetcher`] lists the raw files of one init time and downloads them.
//! Two adaptors exist: a local mirror laid out as `<root>/<YYYYMMDDHH>/...`
//! and the public NOAA GFS bucket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nwp_common::{FileDescriptor, InitTime};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::config::{ConsumerConfig, NOAA_GFS};
use crate::error::{ConfigError, ConsumerError, FetchError};

/// Source of raw provider files.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Provider the files belong to.
    fn provider(&self) -> &str;

    /// All raw files of an init time, sorted by path. Empty if the provider
    /// has nothing for it (yet).
    async fn list_raw_files(&self, init_time: InitTime) -> Result<Vec<FileDescriptor>, FetchError>;

    async fn download(&self, file: &FileDescriptor) -> Result<Bytes, FetchError>;
}

/// Whether a file name looks like GRIB, optionally gzipped.
pub fn is_grib_file(name: &str) -> bool {
    let name = name.strip_suffix(".gz").unwrap_or(name);
    [".grib2", ".grb2", ".grib", ".grb"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

/// Reads raw files from a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalDirFetcher {
    provider: String,
    root: PathBuf,
}

impl LocalDirFetcher {
    pub fn new(provider: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            provider: provider.into(),
            root: root.into(),
        }
    }
}

#[async_trait]
impl Fetcher for LocalDirFetcher {
    fn provider(&self) -> &str {
        &self.provider
    }

    #[instrument(skip(self), fields(provider = %self.provider))]
    async fn list_raw_files(&self, init_time: InitTime) -> Result<Vec<FileDescriptor>, FetchError> {
        let dir = self.root.join(init_time.cycle_dir());
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "No mirror directory for init time");
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(true) {
            let entry = entry.map_err(|e| FetchError::transient(dir.display().to_string(), e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !is_grib_file(&name) {
                continue;
            }
            let mut file = FileDescriptor::new(
                self.provider.clone(),
                init_time,
                entry.path().display().to_string(),
            );
            file.size = entry.metadata().ok().map(|m| m.len());
            files.push(file);
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        info!(count = files.len(), dir = %dir.display(), "Listed raw files");
        Ok(files)
    }

    async fn download(&self, file: &FileDescriptor) -> Result<Bytes, FetchError> {
        match tokio::fs::read(&file.path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::permanent(&file.path, e))
            }
            Err(e) => Err(FetchError::transient(&file.path, e)),
        }
    }
}

/// Fetches GFS GRIB2 files from the public NOAA bucket over HTTPS.
#[derive(Debug, Clone)]
pub struct NoaaGfsFetcher {
    client: Client,
    base_url: String,
    /// Product token in file names, e.g. `pgrb2.0p25`
    product: String,
    /// Ignore steps beyond this lead time
    max_step_hours: Option<u32>,
}

impl NoaaGfsFetcher {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            product: "pgrb2.0p25".to_string(),
            max_step_hours: None,
        })
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    pub fn with_max_step_hours(mut self, hours: u32) -> Self {
        self.max_step_hours = Some(hours);
        self
    }

    fn prefix(init_time: InitTime) -> String {
        let dt = init_time.datetime();
        format!("gfs.{}/{}/atmos/", dt.format("%Y%m%d"), dt.format("%H"))
    }

    /// Step hours of a key for this product and cycle, if it is one of its
    /// GRIB files.
    fn step_of(&self, key: &str, init_time: InitTime) -> Option<u32> {
        let name = key.rsplit('/').next()?;
        let head = format!(
            "gfs.t{}z.{}.f",
            init_time.datetime().format("%H"),
            self.product
        );
        let step = name.strip_prefix(&head)?;
        if step.len() != 3 || !step.chars().all(|c| c.is_ascii_digit()) {
            // Skips .idx sidecars and other products
            return None;
        }
        step.parse().ok()
    }
}

/// Keys and continuation token of an S3 ListObjectsV2 response.
pub fn parse_list_response(body: &str) -> (Vec<String>, Option<String>) {
    let keys = body
        .split("<Key>")
        .skip(1)
        .filter_map(|chunk| chunk.find("</Key>").map(|end| chunk[..end].to_string()))
        .collect();

    let token = body
        .split("<NextContinuationToken>")
        .nth(1)
        .and_then(|chunk| chunk.find("</NextContinuationToken>").map(|end| chunk[..end].to_string()))
        .filter(|t| !t.is_empty());

    (keys, token)
}

fn classify(path: &str, status: StatusCode) -> FetchError {
    if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
        FetchError::permanent(path, format!("HTTP {}", status))
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::transient(path, format!("HTTP {}", status))
    } else {
        FetchError::permanent(path, format!("HTTP {}", status))
    }
}

fn request_error(path: &str, e: reqwest::Error) -> FetchError {
    FetchError::transient(path, e)
}

#[async_trait]
impl Fetcher for NoaaGfsFetcher {
    fn provider(&self) -> &str {
        NOAA_GFS
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn list_raw_files(&self, init_time: InitTime) -> Result<Vec<FileDescriptor>, FetchError> {
        let prefix = Self::prefix(init_time);
        let mut files = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/", self.base_url))
                .query(&[("list-type", "2"), ("prefix", prefix.as_str())]);
            if let Some(token) = &token {
                request = request.query(&[("continuation-token", token.as_str())]);
            }

            let response = request.send().await.map_err(|e| request_error(&prefix, e))?;
            if !response.status().is_success() {
                return Err(classify(&prefix, response.status()));
            }
            let body = response.text().await.map_err(|e| request_error(&prefix, e))?;

            let (keys, next) = parse_list_response(&body);
            for key in keys {
                let Some(step) = self.step_of(&key, init_time) else {
                    continue;
                };
                if self.max_step_hours.is_some_and(|max| step > max) {
                    continue;
                }
                files.push(FileDescriptor::new(NOAA_GFS, init_time, key));
            }

            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        info!(count = files.len(), prefix = %prefix, "Listed files");
        Ok(files)
    }

    #[instrument(skip(self), fields(path = %file.path))]
    async fn download(&self, file: &FileDescriptor) -> Result<Bytes, FetchError> {
        let url = format!("{}/{}", self.base_url, file.path);
        debug!(url = %url, "Downloading file");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(&file.path, e))?;
        if !response.status().is_success() {
            return Err(classify(&file.path, response.status()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| request_error(&file.path, e))?;
        debug!(size = bytes.len(), "Downloaded file");
        Ok(bytes)
    }
}

/// The fetcher a configuration asks for: the local mirror when
/// `NWP_RAW_DIR` is set, otherwise the provider's remote source.
pub fn fetcher_for(config: &ConsumerConfig) -> Result<Arc<dyn Fetcher>, ConsumerError> {
    match (&config.raw_dir, config.provider.as_str()) {
        (Some(root), provider) => Ok(Arc::new(LocalDirFetcher::new(provider, root.clone()))),
        (None, NOAA_GFS) => Ok(Arc::new(NoaaGfsFetcher::new(
            config.gfs_base_url.clone(),
            config.fetch_timeout,
        )?)),
        (None, provider) => Err(ConfigError::Missing(vec![format!(
            "NWP_RAW_DIR (no remote source for {})",
            provider
        )])
        .into()),
    }
}
