use std::path::PathBuf;

/// Configuration for the tenant file manager
#[derive(Debug, Clone)]
pub struct FileManagerConfig {
    /// Directory holding one sandbox root per tenant
    pub storage_root: PathBuf,

    /// Access rules document, reloaded on every request
    pub access_rules_file: PathBuf,

    /// Create a tenant's root directory on first use
    pub create_tenant_roots: bool,

    /// Where multi-entry download archives are staged
    pub archive_dir: PathBuf,

    /// Where the upload collaborator stages received files
    pub upload_staging_dir: PathBuf,

    /// File name announced for multi-entry downloads
    pub archive_file_name: String,

    /// Bytes per download chunk sent to the client
    pub download_chunk_size: u64,

    /// Content type reported for image retrieval
    pub image_content_type: String,

    /// Maximum search results returned per request
    pub max_search_results: usize,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        let data_dir = dirs_next::data_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            storage_root: data_dir.join("sandboxfm").join("storage"),
            access_rules_file: PathBuf::from("accessRules.json"),
            create_tenant_roots: true,
            archive_dir: std::env::temp_dir(),
            upload_staging_dir: std::env::temp_dir().join("sandboxfm-uploads"),
            archive_file_name: "Files.zip".to_string(),
            download_chunk_size: 256 * 1024,
            image_content_type: "image/jpeg".to_string(),
            max_search_results: 10_000,
        }
    }
}
