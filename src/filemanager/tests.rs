use std::fs::File;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::protocol::{
    DownloadRequest, Entry, ErrorDetails, FileAction, FileManagerRequest, FileManagerResponse,
    SelectedItem, UploadMode, UploadRequest, UploadedFile,
};

use super::access::Capability;
use super::config::FileManagerConfig;
use super::FileManagerService;

const TENANT: &str = "alice";

struct Fixture {
    temp: TempDir,
    service: FileManagerService,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let archive_dir = temp.path().join("archives");
        std::fs::create_dir_all(&archive_dir).unwrap();
        let upload_staging_dir = temp.path().join("uploads");
        std::fs::create_dir_all(&upload_staging_dir).unwrap();
        let config = FileManagerConfig {
            storage_root: temp.path().join("storage"),
            access_rules_file: temp.path().join("accessRules.json"),
            archive_dir,
            upload_staging_dir,
            ..Default::default()
        };
        let root = config.storage_root.join(TENANT);
        std::fs::create_dir_all(&root).unwrap();
        Self {
            service: FileManagerService::new(config),
            temp,
            root,
        }
    }

    fn rules(&self, json: &str) {
        std::fs::write(self.temp.path().join("accessRules.json"), json).unwrap();
    }

    fn file(&self, relative: &str, contents: &str) {
        let path = self.root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn dir(&self, relative: &str) {
        std::fs::create_dir_all(self.root.join(relative)).unwrap();
    }

    /// Drop a received file into the upload area.
    fn staged(&self, temp_name: &str, original_name: &str, contents: &str) -> UploadedFile {
        let temp_path = self.temp.path().join("uploads").join(temp_name);
        std::fs::write(&temp_path, contents).unwrap();
        UploadedFile {
            original_name: original_name.to_string(),
            temp_path,
        }
    }

    fn exists(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    async fn run(&self, request: FileManagerRequest) -> FileManagerResponse {
        self.service.dispatch(TENANT, &request).await
    }
}

fn item(filter_path: &str, name: &str, is_file: bool) -> SelectedItem {
    SelectedItem {
        name: name.to_string(),
        is_file,
        filter_path: filter_path.to_string(),
    }
}

fn request(action: FileAction, path: &str, data: Vec<SelectedItem>) -> FileManagerRequest {
    let mut request = FileManagerRequest::new(action, path);
    request.data = data;
    request
}

fn transfer(action: FileAction, data: Vec<SelectedItem>, target: &str) -> FileManagerRequest {
    let mut request = request(action, "/", data);
    request.target_path = Some(target.to_string());
    request
}

fn files(response: FileManagerResponse) -> Vec<Entry> {
    match response {
        FileManagerResponse::Files { files } | FileManagerResponse::Listing { files, .. } => files,
        other => panic!("expected files, got {:?}", other),
    }
}

fn error(response: FileManagerResponse) -> ErrorDetails {
    match response {
        FileManagerResponse::Failure { error, .. } => error,
        other => panic!("expected an error, got {:?}", other),
    }
}

fn names(entries: &[Entry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn read_lists_directories_first_with_child_flags() {
    let fx = Fixture::new();
    fx.dir("Zeta/inner");
    fx.file("alpha/only-file.txt", "x");
    fx.file("Beta.txt", "b");
    fx.file("a.txt", "a");

    let response = fx.run(FileManagerRequest::new(FileAction::Read, "/")).await;
    let FileManagerResponse::Listing { cwd, files } = response else {
        panic!("expected a listing");
    };
    assert_eq!(cwd.name, TENANT);
    assert_eq!(cwd.filter_path, "");
    assert!(cwd.permission.is_unrestricted());
    assert_eq!(names(&files), vec!["alpha", "Zeta", "a.txt", "Beta.txt"]);

    // Only a subdirectory counts as a child.
    assert!(!files[0].has_children);
    assert!(files[1].has_children);
    assert_eq!(files[2].filter_path, "/");
    assert_eq!(files[2].extension, ".txt");
    assert_eq!(files[2].size, 1);
}

#[tokio::test]
async fn read_of_unreadable_folder_returns_cwd_and_error() {
    let fx = Fixture::new();
    fx.file("hidden/secret.txt", "s");
    fx.rules(r#"{"role": "User", "rules": [{"path": "/hidden", "isFile": false, "read": "deny"}]}"#);

    let response = fx.run(FileManagerRequest::new(FileAction::Read, "/hidden/")).await;
    let FileManagerResponse::Failure { cwd, error } = response else {
        panic!("expected a failure");
    };
    assert_eq!(cwd.unwrap().name, "hidden");
    assert_eq!(error.code, "401");
    assert_eq!(
        error.message,
        "hidden is not accessible. You need permission to perform the read action."
    );
}

#[tokio::test]
async fn escape_sequences_never_leave_the_sandbox() {
    let fx = Fixture::new();
    std::fs::write(fx.temp.path().join("storage").join("outside.txt"), "x").unwrap();

    let response = fx.run(FileManagerRequest::new(FileAction::Read, "....//....//")).await;
    let FileManagerResponse::Listing { cwd, .. } = response else {
        panic!("expected the root listing");
    };
    assert_eq!(cwd.name, TENANT);

    let details = fx
        .run(request(FileAction::Details, "/", vec![item("/../", "outside.txt", true)]))
        .await;
    assert_eq!(error(details).code, "404");
}

#[tokio::test]
async fn create_rejects_existing_folders() {
    let fx = Fixture::new();
    fx.dir("docs");

    let mut create = FileManagerRequest::new(FileAction::Create, "/");
    create.name = Some("docs".to_string());
    let err = error(fx.run(create.clone()).await);
    assert_eq!(err.code, "400");
    assert_eq!(err.message, "A file or folder with the name docs already exists.");

    create.name = Some("fresh".to_string());
    let created = files(fx.run(create).await);
    assert_eq!(created[0].name, "fresh");
    assert!(!created[0].is_file);
    assert!(fx.root.join("fresh").is_dir());
}

#[tokio::test]
async fn rename_duplicate_check_is_kind_aware() {
    let fx = Fixture::new();
    fx.dir("photos");
    fx.file("report", "r");
    fx.file("other", "o");

    let rename = |name: &str, new_name: &str| {
        let mut rename = request(FileAction::Rename, "/", vec![item("/", name, true)]);
        rename.new_name = Some(new_name.to_string());
        rename
    };

    let err = error(fx.run(rename("other", "report")).await);
    assert_eq!(err.code, "400");
    assert!(fx.exists("other"));

    // A folder of the same name is not a duplicate; the filesystem itself
    // still refuses to put a file on top of it.
    let err = error(fx.run(rename("report", "photos")).await);
    assert_eq!(err.code, "500");
    assert!(fx.root.join("photos").is_dir());

    let renamed = files(fx.run(rename("report", "final")).await);
    assert_eq!(renamed[0].name, "final");
    assert!(renamed[0].is_file);
    assert!(!fx.exists("report"));
}

#[tokio::test]
async fn delete_batch_is_all_or_nothing() {
    let fx = Fixture::new();
    fx.file("a.txt", "a");
    fx.file("b.txt", "b");
    fx.file("c.txt", "c");
    fx.rules(r#"{"role": "User", "rules": [{"path": "/b.txt", "isFile": true, "write": "deny"}]}"#);

    let delete = request(
        FileAction::Delete,
        "/",
        vec![item("/", "a.txt", true), item("/", "b.txt", true), item("/", "c.txt", true)],
    );
    let err = error(fx.run(delete.clone()).await);
    assert_eq!(err.code, "401");
    assert!(fx.exists("a.txt") && fx.exists("b.txt") && fx.exists("c.txt"));

    fx.rules("");
    let deleted = files(fx.run(delete).await);
    assert_eq!(names(&deleted), vec!["a.txt", "b.txt", "c.txt"]);
    assert!(!fx.exists("a.txt") && !fx.exists("b.txt") && !fx.exists("c.txt"));
}

#[tokio::test]
async fn delete_removes_folders_recursively() {
    let fx = Fixture::new();
    fx.file("tree/a/b/c.txt", "c");
    fx.dir("tree/empty");

    let deleted = files(fx.run(request(FileAction::Delete, "/", vec![item("/", "tree", false)])).await);
    assert_eq!(names(&deleted), vec!["tree"]);
    assert!(!fx.exists("tree"));
}

#[tokio::test]
async fn copy_into_same_folder_renames() {
    let fx = Fixture::new();
    fx.file("a.txt", "data");

    let copy = transfer(FileAction::Copy, vec![item("/", "a.txt", true)], "/");
    assert_eq!(names(&files(fx.run(copy.clone()).await)), vec!["a(1).txt"]);
    assert_eq!(names(&files(fx.run(copy).await)), vec!["a(2).txt"]);
    assert_eq!(std::fs::read_to_string(fx.root.join("a(2).txt")).unwrap(), "data");
}

#[tokio::test]
async fn copy_conflict_needs_confirmation_and_writes_nothing() {
    let fx = Fixture::new();
    fx.file("src/a.txt", "new");
    fx.file("src/b.txt", "b");
    fx.file("dst/a.txt", "old");

    let data = vec![item("/src/", "a.txt", true), item("/src/", "b.txt", true)];
    let err = error(fx.run(transfer(FileAction::Copy, data.clone(), "/dst/")).await);
    assert_eq!(err.code, "400");
    assert_eq!(err.file_exists, Some(vec!["a.txt".to_string()]));
    assert_eq!(dir_names(&fx.root.join("dst")), vec!["a.txt"]);

    let mut confirmed = transfer(FileAction::Copy, data, "/dst/");
    confirmed.rename_files = vec!["a.txt".to_string()];
    let copied = files(fx.run(confirmed).await);
    assert_eq!(names(&copied), vec!["a(1).txt", "b.txt"]);
    assert_eq!(std::fs::read_to_string(fx.root.join("dst/a.txt")).unwrap(), "old");
    assert_eq!(std::fs::read_to_string(fx.root.join("dst/a(1).txt")).unwrap(), "new");
}

#[tokio::test]
async fn copy_folder_copies_the_whole_tree() {
    let fx = Fixture::new();
    fx.file("album/2024/cat.png", "meow");
    fx.dir("backup");

    let copied = files(fx.run(transfer(FileAction::Copy, vec![item("/", "album", false)], "/backup/")).await);
    assert_eq!(copied[0].filter_path, "/backup/");
    assert_eq!(
        std::fs::read_to_string(fx.root.join("backup/album/2024/cat.png")).unwrap(),
        "meow"
    );
    assert!(fx.exists("album/2024/cat.png"));
}

#[tokio::test]
async fn copy_needs_copy_permission_and_writable_target() {
    let fx = Fixture::new();
    fx.file("a.txt", "a");
    fx.dir("locked");
    fx.rules(
        r#"{"rules": [
            {"path": "/locked", "isFile": false, "writeContents": "deny"},
            {"path": "/a.txt", "isFile": true, "copy": "deny", "message": "Copying a.txt is not allowed."}
        ]}"#,
    );

    let err = error(fx.run(transfer(FileAction::Copy, vec![item("/", "a.txt", true)], "/")).await);
    assert_eq!(err.code, "401");
    assert_eq!(err.message, "Copying a.txt is not allowed.");

    fx.file("b.txt", "b");
    let err = error(fx.run(transfer(FileAction::Copy, vec![item("/", "b.txt", true)], "/locked/")).await);
    assert_eq!(err.code, "401");
    assert!(dir_names(&fx.root.join("locked")).is_empty());
}

#[tokio::test]
async fn move_relocates_files_and_folders() {
    let fx = Fixture::new();
    fx.file("src/m.txt", "m");
    fx.file("src/nested/deep.txt", "d");
    fx.dir("dst");

    let moved = files(
        fx.run(transfer(
            FileAction::Move,
            vec![item("/src/", "m.txt", true), item("/src/", "nested", false)],
            "/dst/",
        ))
        .await,
    );
    assert_eq!(names(&moved), vec!["m.txt", "nested"]);
    assert!(fx.exists("dst/m.txt") && fx.exists("dst/nested/deep.txt"));
    assert!(!fx.exists("src/m.txt") && !fx.exists("src/nested"));
}

#[tokio::test]
async fn move_folder_into_itself_is_rejected() {
    let fx = Fixture::new();
    fx.dir("src/inner");

    let err = error(fx.run(transfer(FileAction::Move, vec![item("/", "src", false)], "/src/inner/")).await);
    assert_eq!(err.code, "400");
    assert!(fx.exists("src/inner"));
}

#[tokio::test]
async fn move_conflict_blocks_the_batch() {
    let fx = Fixture::new();
    fx.file("src/a.txt", "new");
    fx.file("src/b.txt", "b");
    fx.file("dst/a.txt", "old");

    let data = vec![item("/src/", "a.txt", true), item("/src/", "b.txt", true)];
    let err = error(fx.run(transfer(FileAction::Move, data, "/dst/")).await);
    assert_eq!(err.code, "400");
    assert_eq!(err.file_exists, Some(vec!["a.txt".to_string()]));
    assert!(fx.exists("src/a.txt") && fx.exists("src/b.txt"));
    assert_eq!(dir_names(&fx.root.join("dst")), vec!["a.txt"]);
    assert_eq!(std::fs::read_to_string(fx.root.join("dst/a.txt")).unwrap(), "old");
}

#[tokio::test]
async fn move_keeps_finished_items_when_a_later_one_fails() {
    let fx = Fixture::new();
    fx.file("a/b.txt", "b");
    fx.dir("dst");

    // Moving the folder first takes b.txt with it, so the second item is gone.
    let data = vec![item("/", "a", false), item("/a/", "b.txt", true)];
    let err = error(fx.run(transfer(FileAction::Move, data, "/dst/")).await);
    assert_eq!(err.code, "500");
    assert_eq!(err.message, "Failed to move b.txt.");
    assert!(fx.exists("dst/a/b.txt"));
    assert!(!fx.exists("a"));
}

#[tokio::test]
async fn delete_of_folder_and_its_child_reports_both() {
    let fx = Fixture::new();
    fx.file("a/b.txt", "b");
    fx.file("c.txt", "c");

    let delete = request(
        FileAction::Delete,
        "/",
        vec![item("/", "a", false), item("/a/", "b.txt", true), item("/", "c.txt", true)],
    );
    let deleted = files(fx.run(delete).await);
    assert_eq!(names(&deleted), vec!["a", "b.txt", "c.txt"]);
    assert!(!fx.exists("a") && !fx.exists("c.txt"));
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_folder_is_listed_with_the_kind_used_for_checks() {
    use std::os::unix::fs::symlink;

    let fx = Fixture::new();
    fx.file("real/inside.txt", "x");
    symlink(fx.root.join("real"), fx.root.join("link")).unwrap();
    fx.rules(r#"{"rules": [{"path": "/link", "isFile": true, "write": "deny"}]}"#);

    let listing = files(fx.run(FileManagerRequest::new(FileAction::Read, "/")).await);
    let link = listing.iter().find(|e| e.name == "link").unwrap();
    assert!(link.is_file);
    assert!(!link.has_children);
    assert!(!link.permission.allows(Capability::Write));

    let err = error(fx.run(request(FileAction::Delete, "/", vec![item("/", "link", true)])).await);
    assert_eq!(err.code, "401");
    assert!(fx.exists("link"));
}

#[tokio::test]
async fn search_is_case_insensitive_on_lower_and_upper_forms() {
    let fx = Fixture::new();
    fx.file("Report.PDF", "%PDF");
    fx.file("notes.txt", "n");

    let mut search = FileManagerRequest::new(FileAction::Search, "/");
    search.search_string = Some("*.pdf".to_string());
    search.case_sensitive = false;
    let found = files(fx.run(search.clone()).await);
    assert_eq!(names(&found), vec!["Report.PDF"]);

    search.case_sensitive = true;
    assert!(files(fx.run(search).await).is_empty());
}

#[tokio::test]
async fn search_skips_matches_below_unreadable_folders() {
    let fx = Fixture::new();
    fx.file("open/a.pdf", "a");
    fx.file("hidden/deeper/b.pdf", "b");
    fx.rules(r#"{"rules": [{"path": "/hidden", "isFile": false, "read": "deny"}]}"#);

    let mut search = FileManagerRequest::new(FileAction::Search, "/");
    search.search_string = Some("*.pdf".to_string());
    let found = files(fx.run(search).await);
    assert_eq!(names(&found), vec!["a.pdf"]);
    assert_eq!(found[0].filter_path, "/open/");
}

#[tokio::test]
async fn details_aggregate_folder_sizes() {
    let fx = Fixture::new();
    fx.file("docs/a.bin", &"x".repeat(100));
    fx.dir("docs/empty");
    fx.file("b.txt", "12345");

    let single = fx.run(request(FileAction::Details, "/", vec![item("/", "docs", false)])).await;
    let FileManagerResponse::Details { details } = single else {
        panic!("expected details");
    };
    assert_eq!(details.size, 100);
    assert_eq!(details.location.as_deref(), Some("alice/docs"));
    assert_eq!(details.size_label.as_deref(), Some("100 B"));

    let multi = fx
        .run(request(
            FileAction::Details,
            "/",
            vec![item("/", "docs", false), item("/", "b.txt", true)],
        ))
        .await;
    let FileManagerResponse::Details { details } = multi else {
        panic!("expected details");
    };
    assert!(details.multiple_files);
    assert_eq!(details.name, "docs, b.txt");
    assert_eq!(details.size, 105);
    assert_eq!(details.location.as_deref(), Some("alice"));

    let scattered = fx
        .run(request(
            FileAction::Details,
            "/",
            vec![item("/docs/", "a.bin", true), item("/", "b.txt", true)],
        ))
        .await;
    let FileManagerResponse::Details { details } = scattered else {
        panic!("expected details");
    };
    assert_eq!(details.location.as_deref(), Some("Various Location"));
}

#[tokio::test]
async fn single_file_download_is_raw() {
    let fx = Fixture::new();
    fx.file("a.txt", "hello there");

    let stream = fx
        .service
        .download(
            TENANT,
            &DownloadRequest {
                path: "/".to_string(),
                names: vec!["a.txt".to_string()],
                data: Vec::new(),
            },
        )
        .await
        .unwrap();
    assert!(!stream.is_archive());
    assert_eq!(stream.file_name, "a.txt");
    assert_eq!(stream.content_type, "text/plain");
    assert_eq!(stream.content_length, 11);
}

#[tokio::test]
async fn multi_download_builds_zip_with_each_entry() {
    let fx = Fixture::new();
    fx.file("a.txt", "a");
    fx.file("b.txt", "b");

    let stream = fx
        .service
        .download(
            TENANT,
            &DownloadRequest {
                path: "/".to_string(),
                names: Vec::new(),
                data: vec![item("/", "a.txt", true), item("/", "b.txt", true)],
            },
        )
        .await
        .unwrap();
    assert!(stream.is_archive());
    assert_eq!(stream.file_name, "Files.zip");
    assert_eq!(stream.content_type, "application/octet-stream");

    let archive_path = stream.path().to_path_buf();
    assert_eq!(std::fs::metadata(&archive_path).unwrap().len(), stream.content_length);
    let archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
    let mut entries: Vec<&str> = archive.file_names().collect();
    entries.sort();
    assert_eq!(entries, vec!["a.txt", "b.txt"]);

    drop(archive);
    drop(stream);
    assert!(!archive_path.exists());
}

#[tokio::test]
async fn folder_download_is_zipped_under_its_name() {
    let fx = Fixture::new();
    fx.file("album/2024/cat.png", "meow");

    let stream = fx
        .service
        .download(
            TENANT,
            &DownloadRequest {
                path: "/".to_string(),
                names: vec!["album".to_string()],
                data: Vec::new(),
            },
        )
        .await
        .unwrap();
    let archive = zip::ZipArchive::new(File::open(stream.path()).unwrap()).unwrap();
    let entries: Vec<&str> = archive.file_names().collect();
    assert!(entries.contains(&"album/2024/cat.png"));
}

#[tokio::test]
async fn download_requires_permission_for_every_item() {
    let fx = Fixture::new();
    fx.file("a.txt", "a");
    fx.file("b.txt", "b");
    fx.rules(r#"{"rules": [{"path": "/b.txt", "isFile": true, "download": "deny"}]}"#);

    let err = fx
        .service
        .download(
            TENANT,
            &DownloadRequest {
                path: "/".to_string(),
                names: vec!["a.txt".to_string(), "b.txt".to_string()],
                data: Vec::new(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "401");
    assert!(dir_names(&fx.temp.path().join("archives")).is_empty());
}

#[tokio::test]
async fn upload_modes_handle_existing_names() {
    let fx = Fixture::new();
    fx.file("a.txt", "old");
    let uploads = fx.temp.path().join("uploads");

    let save = UploadRequest {
        path: "/".to_string(),
        files: vec![fx.staged("t1", "a.txt", "new")],
        mode: UploadMode::Save,
    };
    assert_eq!(error(fx.service.upload(TENANT, &save).await).code, "400");
    assert!(uploads.join("t1").exists());

    let keep_both = UploadRequest {
        mode: UploadMode::KeepBoth,
        ..save
    };
    let stored = files(fx.service.upload(TENANT, &keep_both).await);
    assert_eq!(names(&stored), vec!["a(1).txt"]);
    assert!(!uploads.join("t1").exists());

    let replace = UploadRequest {
        path: "/".to_string(),
        files: vec![fx.staged("t2", "a.txt", "newest")],
        mode: UploadMode::Replace,
    };
    files(fx.service.upload(TENANT, &replace).await);
    assert_eq!(std::fs::read_to_string(fx.root.join("a.txt")).unwrap(), "newest");
}

#[tokio::test]
async fn upload_needs_upload_permission() {
    let fx = Fixture::new();
    fx.dir("inbox");
    fx.rules(r#"{"rules": [{"path": "/inbox", "isFile": false, "upload": "deny"}]}"#);

    let upload = UploadRequest {
        path: "/inbox/".to_string(),
        files: vec![fx.staged("t", "x.txt", "x")],
        mode: UploadMode::Replace,
    };
    let err = error(fx.service.upload(TENANT, &upload).await);
    assert_eq!(err.code, "401");
    assert!(dir_names(&fx.root.join("inbox")).is_empty());
}

#[tokio::test]
async fn upload_only_takes_files_from_the_upload_area() {
    let fx = Fixture::new();
    let bob_file = fx.temp.path().join("storage/bob/payroll.xlsx");
    std::fs::create_dir_all(bob_file.parent().unwrap()).unwrap();
    std::fs::write(&bob_file, "bob-secret").unwrap();

    let upload = UploadRequest {
        path: "/".to_string(),
        files: vec![
            fx.staged("t1", "fine.txt", "ok"),
            UploadedFile {
                original_name: "stolen.xlsx".to_string(),
                temp_path: bob_file.clone(),
            },
        ],
        mode: UploadMode::Replace,
    };
    let err = error(fx.service.upload(TENANT, &upload).await);
    assert_eq!(err.code, "401");
    assert_eq!(std::fs::read_to_string(&bob_file).unwrap(), "bob-secret");
    assert!(!fx.exists("stolen.xlsx") && !fx.exists("fine.txt"));
    assert!(fx.temp.path().join("uploads/t1").exists());

    let escaped = UploadRequest {
        path: "/".to_string(),
        files: vec![UploadedFile {
            original_name: "stolen.xlsx".to_string(),
            temp_path: fx.temp.path().join("uploads/../storage/bob/payroll.xlsx"),
        }],
        mode: UploadMode::Replace,
    };
    assert_eq!(error(fx.service.upload(TENANT, &escaped).await).code, "401");
    assert!(bob_file.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn upload_rejects_links_leaving_the_upload_area() {
    use std::os::unix::fs::symlink;

    let fx = Fixture::new();
    let secret = fx.temp.path().join("secret.txt");
    std::fs::write(&secret, "s").unwrap();
    let link = fx.temp.path().join("uploads/link");
    symlink(&secret, &link).unwrap();

    let upload = UploadRequest {
        path: "/".to_string(),
        files: vec![UploadedFile {
            original_name: "secret.txt".to_string(),
            temp_path: link,
        }],
        mode: UploadMode::Replace,
    };
    assert_eq!(error(fx.service.upload(TENANT, &upload).await).code, "401");
    assert!(secret.exists());
    assert!(!fx.exists("secret.txt"));
}

#[tokio::test]
async fn image_requires_read() {
    let fx = Fixture::new();
    fx.file("pics/cat.jpg", "jpegbytes");
    fx.file("pics/private.jpg", "secret");
    fx.rules(r#"{"rules": [{"path": "/pics/private.jpg", "isFile": true, "read": "deny"}]}"#);

    let (content_type, bytes) = fx.service.image(TENANT, "/pics/cat.jpg").await.unwrap();
    assert_eq!(content_type, "image/jpeg");
    assert_eq!(bytes, b"jpegbytes");

    let err = fx.service.image(TENANT, "/pics/private.jpg").await.unwrap_err();
    assert_eq!(err.code(), "401");
}

#[tokio::test]
async fn tenants_are_single_path_components() {
    let fx = Fixture::new();
    let response = fx
        .service
        .dispatch("../bob", &FileManagerRequest::new(FileAction::Read, "/"))
        .await;
    assert_eq!(error(response).code, "400");
}
