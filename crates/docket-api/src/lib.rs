use anyhow::Result;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

use docket_core::{
    build_manifest, format_timestamp_utc, index_key, raw_prefix, serialize_manifest, upload_key,
    validate_case_id, validate_upload_filename, StoredObject,
};
use docket_store::{LinkMethod, ObjectStore};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Lifetime of issued upload/download links.
pub const LINK_TTL_SECONDS: u64 = 900;

const MANIFEST_CONTENT_TYPE: &str = "text/csv";
const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CreateCaseResult {
    pub case_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_utc: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PresignUploadRequest {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PresignUploadResult {
    pub upload_url: String,
    pub key: String,
    pub content_type: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ListFilesResult {
    pub case_id: String,
    pub count: usize,
    pub files: Vec<StoredObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct BuildIndexResult {
    pub case_id: String,
    pub record_count: usize,
    pub index_key: String,
    pub download_url: String,
    pub expires_in_seconds: u64,
}

/// Facade over the object store for the case-catalog operations. Every call
/// is a pure function of the store's current contents; nothing is cached
/// between invocations, so a repeated build over an unchanged listing writes
/// byte-identical output (last write wins for concurrent builders).
#[derive(Debug, Clone)]
pub struct CaseIndexApi<S> {
    store: S,
}

impl<S: ObjectStore> CaseIndexApi<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mints a fresh case identifier.
    #[must_use]
    pub fn create_case(&self) -> CreateCaseResult {
        CreateCaseResult {
            case_id: Ulid::new().to_string(),
            created_utc: OffsetDateTime::now_utc(),
        }
    }

    /// Issues a time-limited upload link for one document of a case.
    ///
    /// # Errors
    /// Returns a validation error for bad case ids or filenames, or a store
    /// error when link issuance fails.
    pub fn presign_upload(
        &self,
        case_id: &str,
        input: PresignUploadRequest,
    ) -> Result<PresignUploadResult> {
        validate_case_id(case_id)?;
        validate_upload_filename(&input.filename)?;

        let key = upload_key(case_id, &input.filename);
        let content_type =
            input.content_type.unwrap_or_else(|| DEFAULT_UPLOAD_CONTENT_TYPE.to_string());
        let link = self.store.presign(LinkMethod::Put, &key, LINK_TTL_SECONDS)?;
        Ok(PresignUploadResult {
            upload_url: link.url,
            key,
            content_type,
            expires_in_seconds: link.expires_in_seconds,
        })
    }

    /// Lists a case's raw documents, sorted by `(last_modified, key)` with
    /// missing timestamps first.
    ///
    /// # Errors
    /// Returns a validation error for bad case ids, or a store error when
    /// listing fails.
    pub fn list_files(&self, case_id: &str) -> Result<ListFilesResult> {
        validate_case_id(case_id)?;

        let mut files = self.store.list_all(&raw_prefix(case_id))?;
        files.sort_by(|lhs, rhs| {
            let lhs_modified = lhs.last_modified.map(format_timestamp_utc).unwrap_or_default();
            let rhs_modified = rhs.last_modified.map(format_timestamp_utc).unwrap_or_default();
            lhs_modified.cmp(&rhs_modified).then_with(|| lhs.key.cmp(&rhs.key))
        });
        Ok(ListFilesResult { case_id: case_id.to_string(), count: files.len(), files })
    }

    /// Builds the case manifest from the complete raw listing, persists it
    /// under the case's outputs prefix, and returns a download link.
    ///
    /// Store failures propagate untouched; no retry is attempted and no
    /// partial manifest is written.
    ///
    /// # Errors
    /// Returns a validation error for bad case ids, or a store error when
    /// listing, writing, or link issuance fails.
    pub fn build_index(&self, case_id: &str) -> Result<BuildIndexResult> {
        validate_case_id(case_id)?;

        let objects = self.store.list_all(&raw_prefix(case_id))?;
        let manifest = build_manifest(&objects);
        let bytes = serialize_manifest(&manifest);

        let key = index_key(case_id);
        self.store.put(&key, &bytes, MANIFEST_CONTENT_TYPE)?;
        let link = self.store.presign(LinkMethod::Get, &key, LINK_TTL_SECONDS)?;

        Ok(BuildIndexResult {
            case_id: case_id.to_string(),
            record_count: manifest.record_count(),
            index_key: key,
            download_url: link.url,
            expires_in_seconds: link.expires_in_seconds,
        })
    }
}
