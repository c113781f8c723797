use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::AppError;

/// Retry ceiling for rate-limited requests. A request that is still being
/// throttled after this many retries fails hard.
pub const MAX_RETRIES: u32 = 3;

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub token: String,
    pub page_size: usize,
    /// Fixed pause between consecutive requests. The catalog API rate-limits
    /// aggressively, so sync runs keep one request in flight and space them.
    pub request_delay: Duration,
    pub retry_base_delay: Duration,
}

impl CatalogConfig {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url,
            token,
            page_size: DEFAULT_PAGE_SIZE,
            request_delay: Duration::from_secs(1),
            retry_base_delay: Duration::from_secs(2),
        }
    }
}

/// One raw machine record as the catalog API returns it. Every field is
/// optional; anything the API adds that we do not promote to a column lands
/// in `extra` untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMachine {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub os: Option<String>,
    pub ip: Option<String>,
    pub avatar: Option<String>,
    pub points: Option<i64>,
    #[serde(rename = "difficultyText", alias = "difficulty_text")]
    pub difficulty_text: Option<String>,
    #[serde(alias = "release_date")]
    pub release: Option<String>,
    #[serde(alias = "userOwns")]
    pub user_owns_count: Option<i64>,
    #[serde(alias = "rootOwns")]
    pub root_owns_count: Option<i64>,
    /// The API serves this as a bool on some endpoints and 0/1 on others.
    pub free: Option<Value>,
    #[serde(alias = "stars")]
    pub star: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTag {
    pub id: Option<i64>,
    pub name: Option<String>,
    #[serde(alias = "tag_category")]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct InfoEnvelope<T> {
    info: T,
}

pub struct CatalogClient {
    http: reqwest::Client,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("labtracker-sync/1.0")
            .build()?;

        Ok(Self { http, config })
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub async fn pause(&self) {
        tokio::time::sleep(self.config.request_delay).await;
    }

    /// GET with bearer auth. Returns `Ok(None)` on 404 so paginated callers
    /// can treat it as end-of-data; 429 is retried with exponential backoff
    /// until [`MAX_RETRIES`], every other non-success status is an error.
    #[instrument(skip(self))]
    pub async fn get_json(&self, url: &str) -> Result<Option<Value>, AppError> {
        for attempt in 0..=MAX_RETRIES {
            let response = self
                .http
                .get(url)
                .bearer_auth(&self.config.token)
                .send()
                .await?;

            let status = response.status();

            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt == MAX_RETRIES {
                    break;
                }
                let delay = self.config.retry_base_delay * 2u32.pow(attempt + 1);
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited by catalog API, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                return Err(AppError::Catalog(format!(
                    "Catalog API returned {} for {}",
                    status, url
                )));
            }

            return Ok(Some(response.json::<Value>().await?));
        }

        Err(AppError::RateLimited {
            url: url.to_string(),
            attempts: MAX_RETRIES,
        })
    }

    async fn get_data_page(&self, path: &str, page: usize) -> Result<Option<Vec<RawMachine>>, AppError> {
        let url = format!(
            "{}/{}?page={}&per_page={}",
            self.config.base_url, path, page, self.config.page_size
        );

        let body = match self.get_json(&url).await? {
            Some(body) => body,
            _ => return Ok(None),
        };

        let envelope: DataEnvelope<RawMachine> = serde_json::from_value(body)?;
        Ok(Some(envelope.data))
    }

    #[instrument(skip(self))]
    pub async fn active_machines(&self) -> Result<Vec<RawMachine>, AppError> {
        info!("Fetching active machine listing");
        fetch_all_pages(self.config.page_size, |page| {
            self.get_data_page("machine/paginated", page)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn retired_machines(&self) -> Result<Vec<RawMachine>, AppError> {
        info!("Fetching retired machine listing");
        fetch_all_pages(self.config.page_size, |page| {
            self.get_data_page("machine/list/retired/paginated", page)
        })
        .await
    }

    /// Detail record for one machine, or `None` when the catalog no longer
    /// knows the id.
    #[instrument(skip(self))]
    pub async fn machine_info(&self, machine_id: i64) -> Result<Option<RawMachine>, AppError> {
        let url = format!("{}/machine/profile/{}", self.config.base_url, machine_id);

        let body = match self.get_json(&url).await? {
            Some(body) => body,
            _ => return Ok(None),
        };

        let envelope: InfoEnvelope<RawMachine> = serde_json::from_value(body)?;
        Ok(Some(envelope.info))
    }

    #[instrument(skip(self))]
    pub async fn machine_tags(&self, machine_id: i64) -> Result<Vec<RawTag>, AppError> {
        let url = format!("{}/machine/tags/{}", self.config.base_url, machine_id);

        let body = match self.get_json(&url).await? {
            Some(body) => body,
            _ => return Ok(Vec::new()),
        };

        let envelope: InfoEnvelope<Vec<RawTag>> = serde_json::from_value(body)?;
        Ok(envelope.info)
    }
}

/// Drains a paginated endpoint into one ordered sequence. `fetch_page` is
/// called with 1-based page numbers; a page shorter than `page_size` or a
/// `None` (the endpoint answered 404) ends the walk. No request is made for
/// page N+1 once page N came back short.
pub async fn fetch_all_pages<T, F, Fut>(
    page_size: usize,
    mut fetch_page: F,
) -> Result<Vec<T>, AppError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Option<Vec<T>>, AppError>>,
{
    let mut records = Vec::new();
    let mut page = 1;

    loop {
        let batch = match fetch_page(page).await? {
            Some(batch) => batch,
            _ => break,
        };

        let len = batch.len();
        records.extend(batch);

        if len < page_size {
            break;
        }
        page += 1;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[rocket::async_test]
    async fn pagination_stops_after_short_page() {
        let calls = AtomicUsize::new(0);

        let records = fetch_all_pages(3, |page| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(Some(match page {
                    1 => vec![1, 2, 3],
                    2 => vec![4, 5],
                    _ => panic!("requested a page past the short one"),
                }))
            }
        })
        .await
        .unwrap();

        assert_eq!(records, vec![1, 2, 3, 4, 5]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[rocket::async_test]
    async fn pagination_preserves_source_order_across_pages() {
        let records = fetch_all_pages(2, |page| async move {
            Ok(match page {
                1 => Some(vec!["a", "b"]),
                2 => Some(vec!["c", "d"]),
                _ => None,
            })
        })
        .await
        .unwrap();

        assert_eq!(records, vec!["a", "b", "c", "d"]);
    }

    #[rocket::async_test]
    async fn pagination_treats_not_found_as_end() {
        let records = fetch_all_pages(2, |page| async move {
            Ok(match page {
                1 => Some(vec![10, 20]),
                _ => None,
            })
        })
        .await
        .unwrap();

        assert_eq!(records, vec![10, 20]);
    }

    #[rocket::async_test]
    async fn pagination_surfaces_fetch_errors() {
        let result = fetch_all_pages::<i64, _, _>(2, |_page| async {
            Err(AppError::Catalog("boom".to_string()))
        })
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn raw_machine_tolerates_sparse_records() {
        let raw: RawMachine = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "Lame"
        }))
        .unwrap();

        assert_eq!(raw.id, Some(7));
        assert_eq!(raw.ip, None);
        assert_eq!(raw.avatar, None);
    }

    #[test]
    fn raw_machine_accepts_both_difficulty_spellings() {
        let camel: RawMachine =
            serde_json::from_value(serde_json::json!({"id": 1, "difficultyText": "Easy"}))
                .unwrap();
        let snake: RawMachine =
            serde_json::from_value(serde_json::json!({"id": 1, "difficulty_text": "Hard"}))
                .unwrap();

        assert_eq!(camel.difficulty_text.as_deref(), Some("Easy"));
        assert_eq!(snake.difficulty_text.as_deref(), Some("Hard"));
    }

    #[test]
    fn unpromoted_fields_land_in_extras() {
        let raw: RawMachine = serde_json::from_value(serde_json::json!({
            "id": 7,
            "synopsis": "An easy target",
            "maker": {"name": "ch4p"}
        }))
        .unwrap();

        assert!(raw.extra.contains_key("synopsis"));
        assert!(raw.extra.contains_key("maker"));
    }
}
