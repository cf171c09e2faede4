//! HTTP 辅助工具：客户端 IP、表单重定向与安全头。

use axum::body::Body as AxumBody;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, HeaderValue, Method, Request};
use axum::response::Redirect;
use axum::{middleware, response::Response};
use std::net::{IpAddr, SocketAddr};

pub const UPLOAD_FORM_PATH: &str = "/upload_form";

/// 所有上传路径结束时都回到上传表单页。
pub fn redirect_to_form() -> Redirect {
    Redirect::to(UPLOAD_FORM_PATH)
}

/// 只有提交数据的方法才允许上传。
pub fn is_submit_method(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT
}

/// 从 `x-forwarded-for` 解析客户端 IP。
pub fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// 综合转发头与连接信息计算请求日志中的客户端 IP。
pub fn client_ip<B>(request: &Request<B>) -> String {
    let connect_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    extract_forwarded_ip(request.headers())
        .or(connect_ip)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 添加基础安全响应头。
pub async fn add_security_headers(
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        axum::http::header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(
            extract_forwarded_ip(&headers),
            Some("203.0.113.7".parse().expect("ip"))
        );
    }

    #[test]
    fn client_ip_falls_back_to_unknown() {
        let request = Request::builder()
            .uri("/")
            .body(())
            .expect("request");
        assert_eq!(client_ip(&request), "unknown");
    }

    #[tokio::test]
    async fn security_headers_are_added_to_every_response() {
        use axum::{Router, routing::get};
        use tower::ServiceExt;

        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(add_security_headers));
        let response = app
            .oneshot(Request::builder().uri("/").body(AxumBody::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[test]
    fn only_post_and_put_submit() {
        assert!(is_submit_method(&Method::POST));
        assert!(is_submit_method(&Method::PUT));
        assert!(!is_submit_method(&Method::GET));
        assert!(!is_submit_method(&Method::DELETE));
    }
}
