//! HTML 页面：首页与上传表单（askama 模板，自动转义）。

use askama::Template;
use axum::extract::Extension;
use axum::response::Html;
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use crate::error::ApiError;
use crate::flash::FlashStore;
use crate::storage::Storage;

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    storage_dir: String,
}

#[derive(Template)]
#[template(path = "upload_form.html")]
struct UploadFormTemplate {
    notices: Vec<String>,
}

/// `GET /`：展示存储目录。
pub async fn index(Extension(storage): Extension<Arc<Storage>>) -> Result<Html<String>, ApiError> {
    let template = IndexTemplate {
        storage_dir: storage.root_path().display().to_string(),
    };
    Ok(Html(template.render()?))
}

/// `GET /upload_form`：渲染上传表单并消费待展示的提示。
pub async fn upload_form(
    Extension(flash): Extension<Arc<FlashStore>>,
    jar: CookieJar,
) -> Result<Html<String>, ApiError> {
    let template = UploadFormTemplate {
        notices: flash.take(&jar).await,
    };
    Ok(Html(template.render()?))
}
