//! 多文件表单上传：逐个校验 `files[]` 字段中的文件，并把内容按块流式写入磁盘。

use axum::extract::multipart::Field;
use axum::extract::{Extension, FromRequest, Multipart, Request};
use axum::response::Redirect;
use axum_extra::extract::CookieJar;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::config::UploadConfig;
use crate::flash::{FlashStore, Notices, Notify};
use crate::http::{is_submit_method, redirect_to_form};
use crate::sanitize::secure_filename;
use crate::storage::{Destination, Storage, StorageError};
use crate::upload::{FailureStage, Rejection, StoredFile, UploadResult};
use crate::validate::is_allowed;

/// 表单中承载文件的字段名。
pub const FILE_FIELD: &str = "files[]";

/// `GET|POST|PUT /multipleupload`。
pub async fn multiple_upload(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(config): Extension<Arc<UploadConfig>>,
    Extension(flash): Extension<Arc<FlashStore>>,
    jar: CookieJar,
    request: Request,
) -> (CookieJar, Redirect) {
    let mut notices = Notices::default();
    let results = handle_multiple_upload(request, &storage, &config, &mut notices).await;

    let stored: Vec<&StoredFile> = results
        .iter()
        .filter_map(|result| match result {
            UploadResult::Success(stored) => Some(stored),
            _ => None,
        })
        .collect();
    debug!(
        parts = results.len(),
        stored = stored.len(),
        bytes = stored.iter().map(|file| file.bytes).sum::<u64>(),
        paths = ?stored.iter().map(|file| &file.path).collect::<Vec<_>>(),
        "form upload finished"
    );

    let jar = flash.push(jar, notices.into_messages()).await;
    (jar, redirect_to_form())
}

/// 按到达顺序处理每个文件部件；单个部件的失败不影响其余部件。
///
/// 部件内容不会整体读入内存：每收到一块就写入目标文件。
/// 唯一且文件名为空的部件视为“未选择文件”，因此第一个空名部件
/// 要等到下一个部件出现（或请求结束）才能确定结果。
pub async fn handle_multiple_upload<N: Notify>(
    request: Request,
    storage: &Storage,
    config: &UploadConfig,
    notify: &mut N,
) -> Vec<UploadResult> {
    let mut results = Vec::new();
    if !is_submit_method(request.method()) {
        record(UploadResult::Rejected(Rejection::MethodNotAllowed), notify, &mut results);
        return results;
    }

    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(rejection) => {
            info!(error = %rejection, "upload request is not multipart");
            record(UploadResult::Rejected(Rejection::MissingFileField), notify, &mut results);
            return results;
        }
    };

    let mut file_parts = 0usize;
    let mut empty_first = false;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed to read multipart field");
                let error = io::Error::other(err.body_text());
                record(UploadResult::receive_failed("", error), notify, &mut results);
                return results;
            }
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(raw_filename) = field.file_name().map(str::to_string) else {
            continue;
        };

        file_parts += 1;
        if file_parts == 1 && raw_filename.is_empty() {
            empty_first = true;
            continue;
        }
        if empty_first {
            empty_first = false;
            let rejection = Rejection::DisallowedExtension(String::new());
            record(UploadResult::Rejected(rejection), notify, &mut results);
        }

        let result = save_field(field, &raw_filename, storage, config).await;
        let broken = matches!(
            &result,
            UploadResult::Failed(failure) if failure.stage == FailureStage::Receive
        );
        record(result, notify, &mut results);
        if broken {
            return results;
        }
    }

    if file_parts == 0 {
        record(UploadResult::Rejected(Rejection::MissingFileField), notify, &mut results);
    } else if empty_first {
        record(UploadResult::Rejected(Rejection::NothingSelected), notify, &mut results);
    }
    results
}

fn record<N: Notify>(result: UploadResult, notify: &mut N, results: &mut Vec<UploadResult>) {
    let message = match &result {
        UploadResult::Success(stored) => format!("Just uploaded: {}", stored.name),
        UploadResult::Rejected(rejection) => rejection.to_string(),
        UploadResult::Failed(failure) => failure.to_string(),
    };
    notify.notify(message);
    results.push(result);
}

/// 校验一个文件部件并把它的内容逐块写入存储目录。
///
/// 被拒绝的部件不读取内容，剩余数据由下一次 `next_field` 丢弃。
async fn save_field(
    mut field: Field<'_>,
    raw_filename: &str,
    storage: &Storage,
    config: &UploadConfig,
) -> UploadResult {
    let filename = secure_filename(raw_filename);
    if !is_allowed(&filename) {
        info!(raw_filename, filename, "form upload with disallowed extension");
        return UploadResult::Rejected(Rejection::DisallowedExtension(filename));
    }

    let target = match storage.resolve_path_checked(&filename, true).await {
        Ok(target) => target,
        Err(StorageError::InvalidPath) => {
            warn!(filename, "form upload target refused");
            return UploadResult::Rejected(Rejection::InvalidPath(filename));
        }
        Err(StorageError::Io(err)) => {
            warn!(filename, error = %err, "form upload target check failed");
            return UploadResult::failed(&filename, err);
        }
    };

    info!(
        filename,
        content_type = field.content_type().unwrap_or("unknown"),
        "saving form upload"
    );
    let mut destination = match Destination::open(&target, config.atomic_writes).await {
        Ok(destination) => destination,
        Err(err) => {
            warn!(filename, error = %err, "failed to open upload target");
            return UploadResult::failed(&filename, err);
        }
    };

    let mut written: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                warn!(filename, written, error = %err, "form upload body read failed");
                destination.abandon().await;
                return UploadResult::receive_failed(&filename, io::Error::other(err.body_text()));
            }
        };
        if let Err(err) = destination.write_all(&chunk).await {
            warn!(filename, written, error = %err, "form upload write failed");
            destination.abandon().await;
            return UploadResult::failed(&filename, err);
        }
        written += chunk.len() as u64;
        trace!(filename, chunk = chunk.len(), written, "form upload chunk written");
    }

    match destination.commit().await {
        Ok(path) => UploadResult::Success(StoredFile {
            name: filename,
            path,
            bytes: written,
        }),
        Err(err) => {
            warn!(filename, error = %err, "failed to finish upload target");
            UploadResult::failed(&filename, err)
        }
    }
}
