use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use docket_core::StoredObject;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

/// Page cap mirroring common object-store listing limits.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

const STORE_META_DIR: &str = ".docket";
const SECRET_FILE: &str = "link.secret";
const CONTENT_TYPE_SUFFIX: &str = ".content-type";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LinkMethod {
    Get,
    Put,
}

impl LinkMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

/// A time-limited, token-signed link to one object.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PresignedLink {
    pub url: String,
    pub expires_at_unix: i64,
    pub expires_in_seconds: u64,
}

/// One page of a listing. `next_continuation` is present when further pages
/// remain.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ObjectPage {
    pub objects: Vec<StoredObject>,
    pub next_continuation: Option<String>,
}

/// The object-store collaborator the index builder consumes: paged listing,
/// byte-level get/put, and time-limited link issuance.
pub trait ObjectStore {
    /// Lists up to `max_keys` objects under `prefix`, in ascending key order,
    /// starting after `continuation` when given.
    ///
    /// # Errors
    /// Returns an error when the underlying storage cannot be read.
    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectPage>;

    /// # Errors
    /// Returns an error when the object does not exist or cannot be read.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// # Errors
    /// Returns an error when the object cannot be written.
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// # Errors
    /// Returns an error when the key is invalid or signing fails.
    fn presign(&self, method: LinkMethod, key: &str, ttl_seconds: u64) -> Result<PresignedLink>;

    /// Collects the complete listing under `prefix`, following continuation
    /// tokens until the store reports no further pages. Truncated listings
    /// must never reach the manifest builder.
    ///
    /// # Errors
    /// Returns an error when any page cannot be listed.
    fn list_all(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self.list_page(prefix, continuation.as_deref(), DEFAULT_PAGE_SIZE)?;
            objects.extend(page.objects);
            match page.next_continuation {
                Some(token) => continuation = Some(token),
                None => return Ok(objects),
            }
        }
    }
}

/// Filesystem-backed object store. Keys are `/`-separated paths under the
/// root directory; `last_modified` comes from file mtime. Link tokens are
/// HMAC-SHA256 over a per-store random secret persisted under
/// `.docket/link.secret`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    secret: Vec<u8>,
}

impl FsObjectStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns an error when the root directory or link secret cannot be
    /// created or read.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create store root {}", root.display()))?;
        let secret = load_or_create_secret(&root)?;
        Ok(Self { root, secret })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            bail!("object key MUST be non-empty");
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                bail!("object key contains an unsupported segment: {key}");
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn content_type_path(&self, key: &str) -> Result<PathBuf> {
        self.object_path(key)?;
        let mut path = self.root.join(STORE_META_DIR).join("meta");
        for segment in key.split('/') {
            path.push(segment);
        }
        path.set_file_name(format!(
            "{}{CONTENT_TYPE_SUFFIX}",
            path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
        ));
        Ok(path)
    }

    /// Content type recorded at `put` time, or `None` when none was
    /// recorded.
    ///
    /// # Errors
    /// Returns an error when the key is invalid or the recorded value cannot
    /// be read.
    pub fn content_type(&self, key: &str) -> Result<Option<String>> {
        let path = self.content_type_path(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(anyhow!(err))
                .with_context(|| format!("failed to read content type for {key}")),
        }
    }

    fn link_mac(&self, method: LinkMethod, key: &str, expires_at_unix: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|err| anyhow!("invalid link secret: {err}"))?;
        mac.update(method.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires_at_unix.to_string().as_bytes());
        Ok(mac)
    }

    fn sign(&self, method: LinkMethod, key: &str, expires_at_unix: i64) -> Result<String> {
        Ok(hex::encode(self.link_mac(method, key, expires_at_unix)?.finalize().into_bytes()))
    }

    /// Checks a presigned-link token against the store secret and expiry.
    ///
    /// # Errors
    /// Returns an error when the link has expired, the token is not valid
    /// hex, or the token does not match.
    pub fn verify_link(
        &self,
        method: LinkMethod,
        key: &str,
        expires_at_unix: i64,
        token: &str,
    ) -> Result<()> {
        if OffsetDateTime::now_utc().unix_timestamp() > expires_at_unix {
            bail!("link expired");
        }
        let signature = hex::decode(token).context("link token is not valid hex")?;
        self.link_mac(method, key, expires_at_unix)?
            .verify_slice(&signature)
            .map_err(|_| anyhow!("link token mismatch"))
    }
}

impl ObjectStore for FsObjectStore {
    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectPage> {
        let max_keys = max_keys.max(1);
        let mut entries = Vec::new();
        collect_files(&self.root, &self.root, &mut entries)?;

        let mut objects: Vec<StoredObject> = entries
            .into_iter()
            .filter(|object| object.key.starts_with(prefix))
            .filter(|object| continuation.map_or(true, |token| object.key.as_str() > token))
            .collect();
        objects.sort_by(|lhs, rhs| lhs.key.cmp(&rhs.key));

        let next_continuation = if objects.len() > max_keys {
            objects.truncate(max_keys);
            objects.last().map(|object| object.key.clone())
        } else {
            None
        };
        Ok(ObjectPage { objects, next_continuation })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        fs::read(&path).with_context(|| format!("failed to read object {key}"))
    }

    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create parent directories for {key}"))?;
        }
        fs::write(&path, bytes).with_context(|| format!("failed to write object {key}"))?;

        let meta_path = self.content_type_path(key)?;
        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create metadata directory for {key}"))?;
        }
        fs::write(&meta_path, content_type)
            .with_context(|| format!("failed to record content type for {key}"))?;
        Ok(())
    }

    fn presign(&self, method: LinkMethod, key: &str, ttl_seconds: u64) -> Result<PresignedLink> {
        self.object_path(key)?;
        let ttl = i64::try_from(ttl_seconds).context("link ttl out of range")?;
        let expires_at_unix = OffsetDateTime::now_utc().unix_timestamp() + ttl;
        let token = self.sign(method, key, expires_at_unix)?;
        Ok(PresignedLink {
            url: format!("/v1/blobs/{key}?expires={expires_at_unix}&token={token}"),
            expires_at_unix,
            expires_in_seconds: ttl_seconds,
        })
    }
}

fn load_or_create_secret(root: &Path) -> Result<Vec<u8>> {
    let dir = root.join(STORE_META_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create store metadata directory {}", dir.display()))?;
    let path = dir.join(SECRET_FILE);
    if path.exists() {
        let encoded = fs::read_to_string(&path)
            .with_context(|| format!("failed to read link secret {}", path.display()))?;
        return hex::decode(encoded.trim()).context("link secret file is not valid hex");
    }

    let mut secret = vec![0_u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    fs::write(&path, hex::encode(&secret))
        .with_context(|| format!("failed to write link secret {}", path.display()))?;
    Ok(secret)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<StoredObject>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) if dir == root => return Ok(()),
        Err(err) => {
            return Err(anyhow!(err))
                .with_context(|| format!("failed to list directory {}", dir.display()))
        }
    };

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read directory entry in {}", dir.display()))?;
        let name = entry.file_name();
        // Dot-prefixed names hold store metadata, not objects.
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?;
        if metadata.is_dir() {
            collect_files(root, &path, out)?;
        } else if metadata.is_file() {
            let relative = path
                .strip_prefix(root)
                .with_context(|| format!("path {} escaped store root", path.display()))?;
            let key = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let last_modified = metadata.modified().ok().map(OffsetDateTime::from);
            out.push(StoredObject { key, size_bytes: metadata.len(), last_modified });
        }
    }
    Ok(())
}
