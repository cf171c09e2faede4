//! 单文件流式上传：按固定大小分块读取请求体并写入存储目录。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::response::Redirect;
use axum_extra::TypedHeader;
use axum_extra::extract::CookieJar;
use axum_extra::headers::ContentLength;
use futures_util::TryStreamExt;
use http_body_util::BodyExt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, trace, warn};

use crate::config::UploadConfig;
use crate::flash::{FlashStore, Notices, Notify};
use crate::http::redirect_to_form;
use crate::sanitize::secure_filename;
use crate::storage::{Destination, Storage, StorageError};
use crate::upload::{Rejection, StoredFile, UploadResult};
use crate::validate::is_allowed;

/// 一次流式上传请求。`body` 只被顺序读取一次。
pub struct ChunkedUpload<R> {
    pub filename: String,
    pub declared_length: Option<u64>,
    pub body: R,
}

/// `POST|PUT /singleuploadchunked/{filename}`：原始请求体即文件内容。
pub async fn single_upload_chunked(
    Path(filename): Path<String>,
    content_length: Option<TypedHeader<ContentLength>>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(config): Extension<Arc<UploadConfig>>,
    Extension(flash): Extension<Arc<FlashStore>>,
    jar: CookieJar,
    body: AxumBody,
) -> (CookieJar, Redirect) {
    let data_stream = BodyExt::into_data_stream(body).map_err(io::Error::other);
    let upload = ChunkedUpload {
        filename,
        declared_length: content_length.map(|TypedHeader(ContentLength(length))| length),
        body: StreamReader::new(data_stream),
    };

    let mut notices = Notices::default();
    if let UploadResult::Success(stored) =
        handle_chunked_upload(upload, &storage, &config, &mut notices).await
    {
        debug!(path = %stored.path.display(), bytes = stored.bytes, "stored upload");
    }
    let jar = flash.push(jar, notices.into_messages()).await;
    (jar, redirect_to_form())
}

/// 校验并流式写入单个上传，结果同时通过 `notify` 告知用户。
pub async fn handle_chunked_upload<R, N>(
    upload: ChunkedUpload<R>,
    storage: &Storage,
    config: &UploadConfig,
    notify: &mut N,
) -> UploadResult
where
    R: AsyncRead + Unpin,
    N: Notify,
{
    let result = stream_to_storage(upload, storage, config).await;
    let message = match &result {
        UploadResult::Success(stored) => {
            format!("SUCCESS uploading single file: {}", stored.name)
        }
        UploadResult::Rejected(rejection) => rejection.to_string(),
        UploadResult::Failed(failure) => failure.to_string(),
    };
    notify.notify(message);
    result
}

async fn stream_to_storage<R>(
    upload: ChunkedUpload<R>,
    storage: &Storage,
    config: &UploadConfig,
) -> UploadResult
where
    R: AsyncRead + Unpin,
{
    let ChunkedUpload {
        filename: raw_filename,
        declared_length,
        mut body,
    } = upload;

    let Some(declared_length) = declared_length else {
        info!(filename = raw_filename, "chunked upload without Content-Length");
        return UploadResult::Rejected(Rejection::MissingLength);
    };
    let filename = secure_filename(&raw_filename);
    if filename.is_empty() {
        info!(raw_filename, "chunked upload without usable filename");
        return UploadResult::Rejected(Rejection::EmptyFilename);
    }
    if !is_allowed(&filename) {
        info!(filename, "chunked upload with disallowed extension");
        return UploadResult::Rejected(Rejection::DisallowedExtension(filename));
    }

    let target = match storage.resolve_path_checked(&filename, true).await {
        Ok(target) => target,
        Err(StorageError::InvalidPath) => {
            warn!(filename, "chunked upload target refused");
            return UploadResult::Rejected(Rejection::InvalidPath(filename));
        }
        Err(StorageError::Io(err)) => {
            warn!(filename, error = %err, "chunked upload target check failed");
            return UploadResult::failed(&filename, err);
        }
    };

    info!(filename, declared_length, "chunked upload started");
    let mut destination = match Destination::open(&target, config.atomic_writes).await {
        Ok(destination) => destination,
        Err(err) => {
            warn!(filename, error = %err, "failed to open upload target");
            return UploadResult::failed(&filename, err);
        }
    };

    let mut buffer = vec![0u8; config.chunk_size];
    let mut written: u64 = 0;
    let mut chunks: u64 = 0;
    loop {
        let read = match body.read(&mut buffer).await {
            Ok(read) => read,
            Err(err) => {
                warn!(filename, written, error = %err, "request body read failed");
                destination.abandon().await;
                return UploadResult::failed(&filename, err);
            }
        };
        if read == 0 {
            break;
        }
        if let Err(err) = destination.write_all(&buffer[..read]).await {
            warn!(filename, written, error = %err, "chunk write failed");
            destination.abandon().await;
            return UploadResult::failed(&filename, err);
        }
        written += read as u64;
        chunks += 1;
        trace!(filename, chunks, written, "chunk written");
    }

    let path = match destination.commit().await {
        Ok(path) => path,
        Err(err) => {
            warn!(filename, written, error = %err, "failed to finish upload target");
            return UploadResult::failed(&filename, err);
        }
    };
    if written != declared_length {
        warn!(
            filename,
            declared_length,
            received = written,
            "received byte count differs from Content-Length"
        );
    }
    info!(filename, bytes = written, chunks, "chunked upload complete");

    UploadResult::Success(StoredFile {
        name: filename,
        path,
        bytes: written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;
    use futures_util::stream;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    use crate::config::FLASH_COOKIE_NAME;

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create storage root");
        (temp, Arc::new(Storage::new(root)))
    }

    fn make_config(chunk_size: usize, atomic_writes: bool) -> UploadConfig {
        UploadConfig {
            storage_dir: PathBuf::new(),
            max_content_length: 1024 * 1024,
            chunk_size,
            atomic_writes,
            flash_ttl: Duration::from_secs(60),
        }
    }

    fn upload<'a>(filename: &str, declared: Option<u64>, body: &'a [u8]) -> ChunkedUpload<&'a [u8]> {
        ChunkedUpload {
            filename: filename.to_string(),
            declared_length: declared,
            body,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn streams_body_to_storage_in_order() {
        let (_temp, storage) = make_storage();
        let config = make_config(4, false);
        let data = payload(1000);
        let mut notices = Notices::default();

        let result = handle_chunked_upload(
            upload("car.jpg", Some(1000), &data),
            &storage,
            &config,
            &mut notices,
        )
        .await;

        let UploadResult::Success(stored) = result else {
            panic!("expected success");
        };
        assert_eq!(stored.bytes, 1000);
        assert_eq!(stored.name, "car.jpg");
        let written = std::fs::read(storage.root_path().join("car.jpg")).expect("read");
        assert_eq!(written, data);
        assert_eq!(
            notices.into_messages(),
            vec!["SUCCESS uploading single file: car.jpg"]
        );
    }

    #[tokio::test]
    async fn fragmented_delivery_is_reassembled() {
        let (_temp, storage) = make_storage();
        let config = make_config(3, false);
        let frames = vec![
            Ok::<_, io::Error>(Bytes::from_static(b"he")),
            Ok(Bytes::from_static(b"llo, ")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"w")),
            Ok(Bytes::from_static(b"orld and more")),
        ];
        let body = StreamReader::new(stream::iter(frames));
        let mut notices = Notices::default();

        let result = handle_chunked_upload(
            ChunkedUpload {
                filename: "greeting.txt".into(),
                declared_length: Some(21),
                body,
            },
            &storage,
            &config,
            &mut notices,
        )
        .await;

        assert!(result.is_success());
        let written = std::fs::read(storage.root_path().join("greeting.txt")).expect("read");
        assert_eq!(written, b"hello, world and more");
    }

    #[tokio::test]
    async fn declared_length_is_not_enforced() {
        let (_temp, storage) = make_storage();
        let config = make_config(4096, false);
        let mut notices = Notices::default();

        let result = handle_chunked_upload(
            upload("short.txt", Some(9999), b"abc"),
            &storage,
            &config,
            &mut notices,
        )
        .await;

        let UploadResult::Success(stored) = result else {
            panic!("expected success");
        };
        assert_eq!(stored.bytes, 3);
        assert_eq!(
            std::fs::read(storage.root_path().join("short.txt")).expect("read"),
            b"abc"
        );
    }

    #[tokio::test]
    async fn missing_length_is_rejected_without_touching_disk() {
        let (_temp, storage) = make_storage();
        let existing = storage.root_path().join("car.jpg");
        std::fs::write(&existing, b"original").expect("seed");
        let config = make_config(4096, false);
        let mut notices = Notices::default();

        let result = handle_chunked_upload(
            upload("car.jpg", None, b"replacement"),
            &storage,
            &config,
            &mut notices,
        )
        .await;

        assert!(matches!(
            result,
            UploadResult::Rejected(Rejection::MissingLength)
        ));
        assert_eq!(std::fs::read(&existing).expect("read"), b"original");
        assert_eq!(
            notices.into_messages(),
            vec!["did not sense Content-Length in headers"]
        );
    }

    #[tokio::test]
    async fn disallowed_extension_creates_no_file() {
        let (_temp, storage) = make_storage();
        let config = make_config(4096, false);
        let mut notices = Notices::default();

        let result = handle_chunked_upload(
            upload("evil.exe", Some(2), b"MZ"),
            &storage,
            &config,
            &mut notices,
        )
        .await;

        assert!(matches!(
            result,
            UploadResult::Rejected(Rejection::DisallowedExtension(ref name)) if name == "evil.exe"
        ));
        assert!(!storage.root_path().join("evil.exe").exists());
    }

    #[tokio::test]
    async fn empty_filename_is_rejected() {
        let (_temp, storage) = make_storage();
        let config = make_config(4096, false);
        let mut notices = Notices::default();

        let result =
            handle_chunked_upload(upload("", Some(1), b"x"), &storage, &config, &mut notices).await;

        assert!(matches!(
            result,
            UploadResult::Rejected(Rejection::EmptyFilename)
        ));
    }

    #[tokio::test]
    async fn traversal_in_filename_stays_inside_storage() {
        let (temp, storage) = make_storage();
        let config = make_config(4096, false);
        let mut notices = Notices::default();

        let result = handle_chunked_upload(
            upload("../escape.txt", Some(4), b"data"),
            &storage,
            &config,
            &mut notices,
        )
        .await;

        assert!(result.is_success());
        assert!(!temp.path().join("escape.txt").exists());
        assert!(storage.root_path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn repeated_upload_overwrites_with_same_content() {
        let (_temp, storage) = make_storage();
        let config = make_config(8, false);
        let target = storage.root_path().join("notes.txt");

        for _ in 0..2 {
            let mut notices = Notices::default();
            let result = handle_chunked_upload(
                upload("notes.txt", Some(17), b"identical content"),
                &storage,
                &config,
                &mut notices,
            )
            .await;
            assert!(result.is_success());
        }

        assert_eq!(std::fs::read(&target).expect("read"), b"identical content");
    }

    #[tokio::test]
    async fn missing_storage_dir_fails_with_io_error() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().join("does-not-exist"));
        let config = make_config(4096, false);
        let mut notices = Notices::default();

        let result = handle_chunked_upload(
            upload("car.jpg", Some(3), b"abc"),
            &storage,
            &config,
            &mut notices,
        )
        .await;

        assert!(matches!(result, UploadResult::Failed(_)));
        let messages = notices.into_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("ERROR writing file car.jpg to disk: "));
    }

    fn broken_body() -> impl AsyncRead + Unpin {
        StreamReader::new(stream::iter(vec![
            Ok(Bytes::from_static(b"partial ")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]))
    }

    #[tokio::test]
    async fn read_error_leaves_truncated_file_in_direct_mode() {
        let (_temp, storage) = make_storage();
        let config = make_config(4096, false);
        let mut notices = Notices::default();

        let result = handle_chunked_upload(
            ChunkedUpload {
                filename: "big.pdf".into(),
                declared_length: Some(1 << 20),
                body: broken_body(),
            },
            &storage,
            &config,
            &mut notices,
        )
        .await;

        assert!(matches!(result, UploadResult::Failed(_)));
        assert_eq!(
            std::fs::read(storage.root_path().join("big.pdf")).expect("read"),
            b"partial "
        );
    }

    #[tokio::test]
    async fn read_error_leaves_nothing_in_atomic_mode() {
        let (_temp, storage) = make_storage();
        let existing = storage.root_path().join("big.pdf");
        std::fs::write(&existing, b"previous").expect("seed");
        let config = make_config(4096, true);
        let mut notices = Notices::default();

        let result = handle_chunked_upload(
            ChunkedUpload {
                filename: "big.pdf".into(),
                declared_length: Some(1 << 20),
                body: broken_body(),
            },
            &storage,
            &config,
            &mut notices,
        )
        .await;

        assert!(matches!(result, UploadResult::Failed(_)));
        assert_eq!(std::fs::read(&existing).expect("read"), b"previous");
        let entries = std::fs::read_dir(storage.root_path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn http_handler_redirects_and_stores_flash() {
        let (_temp, storage) = make_storage();
        let config = Arc::new(make_config(4096, false));
        let flash = Arc::new(FlashStore::new(Duration::from_secs(60)));

        let (jar, redirect) = single_upload_chunked(
            Path("car.jpg".to_string()),
            Some(TypedHeader(ContentLength(5))),
            Extension(storage.clone()),
            Extension(config),
            Extension(flash.clone()),
            CookieJar::new(),
            AxumBody::from("vroom"),
        )
        .await;

        let response = redirect.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/upload_form");
        assert_eq!(
            std::fs::read(storage.root_path().join("car.jpg")).expect("read"),
            b"vroom"
        );

        let cookie = jar.get(FLASH_COOKIE_NAME).expect("flash cookie").clone();
        let client = CookieJar::new().add(cookie);
        assert_eq!(
            flash.take(&client).await,
            vec!["SUCCESS uploading single file: car.jpg"]
        );
    }
}
