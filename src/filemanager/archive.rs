use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::protocol::FileManagerError;

use super::access::Capability;
use super::mime::{detect_content_type, ARCHIVE_CONTENT_TYPE};
use super::path_utils::VirtualPath;
use super::{blocking, RequestContext};

const SNIFF_LEN: usize = 8192;

/// A staged zip file, removed when dropped.
#[derive(Debug)]
pub struct TempArchive {
    path: PathBuf,
}

impl TempArchive {
    fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("sandboxfm-{}.zip", uuid::Uuid::new_v4())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArchive {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed archive {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove archive {}: {}", self.path.display(), e),
        }
    }
}

#[derive(Debug)]
enum DownloadSource {
    File(PathBuf),
    Archive(TempArchive),
}

/// A finished download body with the headers the client needs.
#[derive(Debug)]
pub struct DownloadStream {
    pub file_name: String,
    pub content_type: String,
    pub content_length: u64,
    source: DownloadSource,
}

impl DownloadStream {
    pub fn path(&self) -> &Path {
        match &self.source {
            DownloadSource::File(path) => path,
            DownloadSource::Archive(archive) => archive.path(),
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self.source, DownloadSource::Archive(_))
    }

    pub async fn open(&self) -> Result<tokio::fs::File, FileManagerError> {
        tokio::fs::File::open(self.path())
            .await
            .map_err(|e| FileManagerError::io(&self.file_name, e))
    }
}

/// One selected item going into an archive.
struct ArchiveItem {
    native: PathBuf,
    name: String,
    is_file: bool,
}

pub struct ArchiveBuilder<'a> {
    ctx: &'a RequestContext,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(ctx: &'a RequestContext) -> Self {
        Self { ctx }
    }

    /// A lone file is served as is. Anything else is zipped completely
    /// before the download starts; a failure leaves no archive behind.
    pub async fn prepare(&self, items: &[VirtualPath]) -> Result<DownloadStream, FileManagerError> {
        if items.is_empty() {
            return Err(FileManagerError::InvalidRequest {
                message: "No items selected.".to_string(),
            });
        }

        let mut selected = Vec::with_capacity(items.len());
        for item in items {
            let (permission, is_file) = self.ctx.permission_of(item)?;
            let name = self.ctx.display_name(item);
            permission.require(Capability::Download, &name)?;
            selected.push(ArchiveItem {
                native: self.ctx.sandbox().resolve_existing(item)?,
                name,
                is_file,
            });
        }

        if let [single] = selected.as_slice() {
            if single.is_file {
                return raw_download(single).await;
            }
        }

        let archive = TempArchive::new(&self.ctx.config().archive_dir);
        let target = archive.path().to_path_buf();
        let count = selected.len();
        let content_length = blocking(move || write_archive(&target, &selected)).await?;
        tracing::info!(
            "Built archive of {} items ({} bytes) for {}",
            count,
            content_length,
            self.ctx.sandbox().tenant()
        );

        Ok(DownloadStream {
            file_name: self.ctx.config().archive_file_name.clone(),
            content_type: ARCHIVE_CONTENT_TYPE.to_string(),
            content_length,
            source: DownloadSource::Archive(archive),
        })
    }
}

async fn raw_download(item: &ArchiveItem) -> Result<DownloadStream, FileManagerError> {
    let mut file = tokio::fs::File::open(&item.native)
        .await
        .map_err(|e| FileManagerError::io(&item.name, e))?;
    let content_length = file
        .metadata()
        .await
        .map_err(|e| FileManagerError::io(&item.name, e))?
        .len();

    let mut head = vec![0u8; SNIFF_LEN];
    let read = file
        .read(&mut head)
        .await
        .map_err(|e| FileManagerError::io(&item.name, e))?;
    head.truncate(read);

    Ok(DownloadStream {
        file_name: item.name.clone(),
        content_type: detect_content_type(&head, &item.name),
        content_length,
        source: DownloadSource::File(item.native.clone()),
    })
}

fn archive_error(e: impl std::fmt::Display) -> FileManagerError {
    FileManagerError::IoError {
        message: format!("Failed to build archive: {}", e),
    }
}

/// Write every item into a new zip at `target`; returns its size.
fn write_archive(target: &Path, items: &[ArchiveItem]) -> Result<u64, FileManagerError> {
    let file = File::create(target).map_err(archive_error)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for item in items {
        if item.is_file {
            add_file(&mut zip, &item.native, &item.name, options)?;
            continue;
        }
        zip.add_directory(format!("{}/", item.name), options)
            .map_err(archive_error)?;
        for entry in WalkDir::new(&item.native)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(archive_error)?;
            let relative = entry
                .path()
                .strip_prefix(&item.native)
                .map_err(archive_error)?;
            let components: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let entry_name = format!("{}/{}", item.name, components.join("/"));
            if entry.file_type().is_dir() {
                zip.add_directory(format!("{}/", entry_name), options)
                    .map_err(archive_error)?;
            } else if entry.file_type().is_file() {
                add_file(&mut zip, entry.path(), &entry_name, options)?;
            }
        }
    }

    let file = zip.finish().map_err(archive_error)?;
    let length = file.metadata().map_err(archive_error)?.len();
    Ok(length)
}

fn add_file(
    zip: &mut ZipWriter<File>,
    source: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> Result<(), FileManagerError> {
    let mut input = File::open(source).map_err(archive_error)?;
    zip.start_file(name, options).map_err(archive_error)?;
    io::copy(&mut input, zip).map_err(archive_error)?;
    Ok(())
}
