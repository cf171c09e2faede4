//! 一次性提示消息：处理器侧的 `Notify` 能力与按客户端 Cookie 存放的消息队列。

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use cookie::time::Duration as CookieDuration;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::FLASH_COOKIE_NAME;

/// 向最终用户发送一条提示。
pub trait Notify {
    fn notify(&mut self, message: String);
}

/// 单次请求内收集的提示。
#[derive(Debug, Default)]
pub struct Notices {
    messages: Vec<String>,
}

impl Notices {
    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }
}

impl Notify for Notices {
    fn notify(&mut self, message: String) {
        info!(notice = %message, "user notice");
        self.messages.push(message);
    }
}

#[derive(Debug)]
struct FlashEntry {
    messages: Vec<String>,
    expires_at: Instant,
}

/// 待展示的提示，按 `AXO_FLASH` Cookie 中的标识分组，读取一次即删除。
#[derive(Debug)]
pub struct FlashStore {
    entries: Mutex<HashMap<String, FlashEntry>>,
    ttl: Duration,
}

impl FlashStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// 追加提示；客户端尚无标识时签发新 Cookie。
    pub async fn push(&self, jar: CookieJar, messages: Vec<String>) -> CookieJar {
        if messages.is_empty() {
            return jar;
        }

        let existing = jar
            .get(FLASH_COOKIE_NAME)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| Uuid::parse_str(value).is_ok());
        let (flash_id, jar) = match existing {
            Some(flash_id) => (flash_id, jar),
            None => {
                let flash_id = Uuid::new_v4().to_string();
                let cookie = Cookie::build((FLASH_COOKIE_NAME, flash_id.clone()))
                    .path("/")
                    .http_only(true)
                    .same_site(SameSite::Lax)
                    .max_age(CookieDuration::seconds(
                        i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX),
                    ))
                    .build();
                (flash_id, jar.add(cookie))
            }
        };

        let expires_at = Instant::now() + self.ttl;
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(flash_id).or_insert(FlashEntry {
            messages: Vec::new(),
            expires_at,
        });
        entry.messages.extend(messages);
        entry.expires_at = expires_at;
        jar
    }

    /// 取出并清空当前客户端的提示。
    pub async fn take(&self, jar: &CookieJar) -> Vec<String> {
        let Some(cookie) = jar.get(FLASH_COOKIE_NAME) else {
            return Vec::new();
        };
        let mut entries = self.entries.lock().await;
        match entries.remove(cookie.value()) {
            Some(entry) if entry.expires_at > Instant::now() => entry.messages,
            _ => Vec::new(),
        }
    }

    /// 清理过期提示。
    pub async fn prune_expired(&self) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
