//! Lost & found endpoints: person reports, face matches, alerts.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{segment, text, ServiceCore};
use crate::cache::{GetOptions, ResourceCache};
use crate::error::ApiError;
use crate::transport::{Method, Request, Transport};

const ALL_LOST: &str = "/get_all_lost";
const ALL_FOUND: &str = "/get_all_found";
const ALL_MATCHES: &str = "/get_all_matches";
const STATS: &str = "/stats";
const HEALTH: &str = "/health";
const RECORDS_BY_USER: &str = "/get_records_by_user/";
const ALERTS: &str = "/alert/";
const CHECK_MATCHES: &str = "/check_matches/";

const LOST_COLLECTION: &str = "lost_people";
const FOUND_COLLECTION: &str = "found_people";

/// Fields a lost-person report must carry.
const LOST_REPORT_FIELDS: &[&str] = &[
    "name",
    "gender",
    "age",
    "where_lost",
    "your_name",
    "relation_with_lost",
    "user_id",
    "mobile_no",
    "email_id",
];

/// Fields a found-person report must carry.
const FOUND_REPORT_FIELDS: &[&str] = &["name", "where_found", "user_id"];

#[derive(Clone)]
pub struct LostFoundService {
    core: ServiceCore,
}

impl LostFoundService {
    pub fn new(transport: Arc<dyn Transport>, cache: ResourceCache<Value>) -> Self {
        Self {
            core: ServiceCore::new(transport, cache),
        }
    }

    pub fn cache(&self) -> &ResourceCache<Value> {
        self.core.cache()
    }

    /// List all lost-person records.
    pub async fn all_lost(&self, options: GetOptions) -> Result<Value, ApiError> {
        self.core.read(ALL_LOST, Request::get(ALL_LOST), options).await
    }

    /// List all found-person records.
    pub async fn all_found(&self, options: GetOptions) -> Result<Value, ApiError> {
        self.core.read(ALL_FOUND, Request::get(ALL_FOUND), options).await
    }

    pub async fn all_matches(&self, options: GetOptions) -> Result<Value, ApiError> {
        self.core.read(ALL_MATCHES, Request::get(ALL_MATCHES), options).await
    }

    pub async fn stats(&self, options: GetOptions) -> Result<Value, ApiError> {
        self.core.read(STATS, Request::get(STATS), options).await
    }

    /// `stats` with the derived totals, see [`Stats::from_record`].
    pub async fn stats_summary(&self, options: GetOptions) -> Result<Stats, ApiError> {
        Ok(Stats::from_record(&self.stats(options).await?))
    }

    pub async fn health(&self, options: GetOptions) -> Result<Value, ApiError> {
        self.core.read(HEALTH, Request::get(HEALTH), options).await
    }

    pub async fn health_summary(&self, options: GetOptions) -> Result<Health, ApiError> {
        Ok(Health::from_record(&self.health(options).await?))
    }

    /// `all_lost` mapped through [`PersonRecord::from_record`].
    pub async fn lost_records(&self, options: GetOptions) -> Result<Vec<PersonRecord>, ApiError> {
        let data = self.all_lost(options).await?;
        Ok(PersonRecord::from_list(&data, LOST_COLLECTION))
    }

    pub async fn found_records(&self, options: GetOptions) -> Result<Vec<PersonRecord>, ApiError> {
        let data = self.all_found(options).await?;
        Ok(PersonRecord::from_list(&data, FOUND_COLLECTION))
    }

    pub async fn records_by_user(
        &self,
        user_id: &str,
        options: GetOptions,
    ) -> Result<Value, ApiError> {
        let path = format!("{}{}", RECORDS_BY_USER, segment(require("user_id", user_id)?));
        self.core.read(&path, Request::get(path.clone()), options).await
    }

    pub async fn alerts(&self, user_id: &str, options: GetOptions) -> Result<Value, ApiError> {
        let path = format!("{}{}", ALERTS, segment(require("user_id", user_id)?));
        self.core.read(&path, Request::get(path.clone()), options).await
    }

    pub async fn check_matches(
        &self,
        face_id: &str,
        options: GetOptions,
    ) -> Result<Value, ApiError> {
        let path = format!("{}{}", CHECK_MATCHES, segment(require("face_id", face_id)?));
        self.core.read(&path, Request::get(path.clone()), options).await
    }

    /// Submit a lost-person report.
    pub async fn upload_lost(&self, report: Value) -> Result<Value, ApiError> {
        check_fields("upload_lost", &report, LOST_REPORT_FIELDS)?;
        let result = self.core.send(Request::post("/upload_lost", report)).await?;
        self.invalidate_reports(&[ALL_LOST]);
        Ok(result)
    }

    /// Submit a found-person report.
    pub async fn upload_found(&self, report: Value) -> Result<Value, ApiError> {
        check_fields("upload_found", &report, FOUND_REPORT_FIELDS)?;
        let result = self.core.send(Request::post("/upload_found", report)).await?;
        self.invalidate_reports(&[ALL_FOUND]);
        Ok(result)
    }

    /// Merge found-person records whose faces are closer than `threshold`.
    pub async fn cleanup_found_duplicates(&self, threshold: f64) -> Result<Value, ApiError> {
        let request = Request::new(Method::Post, "/cleanup_found_duplicates")
            .with_query([("threshold", threshold.to_string())]);
        let result = self.core.send(request).await?;
        self.invalidate_reports(&[ALL_FOUND]);
        Ok(result)
    }

    /// A new report can produce matches and alerts, and changes the counts
    /// and per-user lists.
    fn invalidate_reports(&self, lists: &[&str]) {
        let cache = self.core.cache();
        for key in lists.iter().copied().chain([ALL_MATCHES, STATS]) {
            cache.invalidate(key);
        }
        let removed = [RECORDS_BY_USER, CHECK_MATCHES, ALERTS]
            .into_iter()
            .map(|prefix| cache.invalidate_prefix(prefix))
            .sum::<usize>();
        debug!(lists = ?lists, removed = removed, "Invalidated report caches");
    }
}

fn require<'a>(name: &str, value: &'a str) -> Result<&'a str, ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::unexpected(format!("{} is required", name)))
    } else {
        Ok(value)
    }
}

fn check_fields(operation: &str, report: &Value, required: &[&str]) -> Result<(), ApiError> {
    let Some(fields) = report.as_object() else {
        return Err(ApiError::unexpected(format!("{} expects a JSON object", operation)));
    };
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| match fields.get(*name) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::unexpected(format!(
            "Missing required fields for {}: {}",
            operation,
            missing.join(", ")
        )))
    }
}

/// `/stats` counters with the totals the dashboards display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_lost_people: u64,
    pub total_found_people: u64,
    pub total_matches: u64,
    pub pending_lost: u64,
    pub pending_found: u64,
    pub pending_cases: u64,
    /// Matches over all reported people, as a percentage to one decimal.
    pub match_rate: f64,
    pub last_updated: String,
    pub raw: Value,
}

impl Stats {
    pub fn from_record(raw: &Value) -> Self {
        let count = |name: &str| raw.get(name).and_then(Value::as_u64).unwrap_or(0);
        let total_lost_people = count("lost_people");
        let total_found_people = count("found_people");
        let total_matches = count("matches");
        let pending_lost = count("lost_pending");
        let pending_found = count("found_pending");

        let population = (total_lost_people + total_found_people).max(1);
        let match_rate = (total_matches as f64 / population as f64 * 1000.0).round() / 10.0;

        Self {
            total_lost_people,
            total_found_people,
            total_matches,
            pending_lost,
            pending_found,
            pending_cases: pending_lost + pending_found,
            match_rate,
            last_updated: text(raw.get("last_updated")).unwrap_or_else(|| Utc::now().to_rfc3339()),
            raw: raw.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceModelStatus {
    Loaded,
    NotLoaded,
    Unknown,
}

/// `/health` with the backend's field names mapped to the dashboard's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub timestamp: String,
    pub mongodb_status: String,
    pub mongodb_collections: Value,
    pub face_model_status: FaceModelStatus,
    pub raw: Value,
}

impl Health {
    pub fn from_record(raw: &Value) -> Self {
        let face_model_status = match raw.get("face_model_loaded").and_then(Value::as_bool) {
            Some(true) => FaceModelStatus::Loaded,
            Some(false) => FaceModelStatus::NotLoaded,
            None => FaceModelStatus::Unknown,
        };
        Self {
            status: text(raw.get("status")).unwrap_or_else(|| "unknown".to_string()),
            timestamp: text(raw.get("timestamp")).unwrap_or_else(|| Utc::now().to_rfc3339()),
            mongodb_status: text(raw.get("database"))
                .or_else(|| text(raw.get("mongodb_status")))
                .unwrap_or_else(|| "unknown".to_string()),
            mongodb_collections: raw
                .get("collections")
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| json!({})),
            face_model_status,
            raw: raw.clone(),
        }
    }
}

/// A lost or found person in the shape the case views use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: String,
    pub name: String,
    pub age: Option<u32>,
    /// `open` while pending, `resolved` once found, otherwise as reported.
    pub status: String,
    pub created_at: Option<String>,
    pub location: String,
    /// Collection the record came from, e.g. `lost_people`.
    pub source: String,
    pub raw: Value,
}

impl PersonRecord {
    /// Map a search or list response. Responses wrapping the record in
    /// `record` or `data` carry their collection alongside it.
    pub fn from_record(response: &Value) -> Self {
        let collection = text(response.get("collection"))
            .or_else(|| text(response.get("_source")))
            .unwrap_or_else(|| "unknown".to_string());
        Self::from_record_in(response, &collection)
    }

    fn from_record_in(response: &Value, collection: &str) -> Self {
        let record = response
            .get("record")
            .or_else(|| response.get("data"))
            .unwrap_or(response);
        let field = |name: &str| text(record.get(name));

        let location = if collection == LOST_COLLECTION {
            field("where_lost")
        } else {
            field("location_found").or_else(|| field("where_found"))
        };
        let status = match field("status").as_deref().unwrap_or("pending") {
            "pending" => "open".to_string(),
            "found" => "resolved".to_string(),
            other => other.to_string(),
        };
        let age = match record.get("age") {
            Some(Value::Number(n)) => n.as_u64().and_then(|a| u32::try_from(a).ok()),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };

        Self {
            id: field("face_id")
                .or_else(|| field("match_id"))
                .unwrap_or_else(|| "unknown".to_string()),
            name: field("name").unwrap_or_else(|| "Unknown".to_string()),
            age,
            status,
            created_at: field("upload_time").or_else(|| field("match_time")),
            location: location.unwrap_or_else(|| "Unknown".to_string()),
            source: collection.to_string(),
            raw: response.clone(),
        }
    }

    /// Map a list response from one collection; non-arrays yield nothing.
    pub fn from_list(data: &Value, collection: &str) -> Vec<Self> {
        data.as_array()
            .map(|records| {
                records
                    .iter()
                    .map(|record| Self::from_record_in(record, collection))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::testing::FakeTransport;

    fn service() -> (Arc<FakeTransport>, LostFoundService) {
        let transport = Arc::new(FakeTransport::default());
        let service = LostFoundService::new(transport.clone(), ResourceCache::default());
        (transport, service)
    }

    fn lost_report() -> Value {
        json!({
            "name": "Ravi", "gender": "male", "age": 9, "where_lost": "Gate 4",
            "your_name": "Meena", "relation_with_lost": "mother", "user_id": "u-17",
            "mobile_no": "9990001111", "email_id": "meena@example.org"
        })
    }

    #[tokio::test]
    async fn test_lists_are_cached_by_path() {
        let (transport, service) = service();
        transport.route(Method::Get, ALL_LOST, json!([{"face_id": "f1"}]));

        let first = service.all_lost(GetOptions::default()).await.unwrap();
        let second = service.all_lost(GetOptions::default()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.count(Method::Get, ALL_LOST), 1);
        assert!(service.cache().entry_info(ALL_LOST).is_some());
    }

    #[tokio::test]
    async fn test_options_are_forwarded() {
        let (transport, service) = service();
        transport.route(Method::Get, STATS, json!({"lost_people": 3}));

        service.stats(GetOptions::default()).await.unwrap();
        service.stats(GetOptions::default().bypass_cache()).await.unwrap();

        assert_eq!(transport.count(Method::Get, STATS), 2);
    }

    #[tokio::test]
    async fn test_errors_pass_through_unchanged() {
        let (transport, service) = service();
        transport.fail(Method::Get, "/alert/u-17", 403, json!({"detail": "not your alerts"}));

        let err = service.alerts("u-17", GetOptions::default()).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.message(), "not your alerts");
    }

    #[tokio::test]
    async fn test_path_segments_are_encoded() {
        let (transport, service) = service();
        transport.route(Method::Get, "/get_records_by_user/a%20b", json!([]));

        service.records_by_user("a b", GetOptions::default()).await.unwrap();
        assert_eq!(transport.last().unwrap().path, "/get_records_by_user/a%20b");
    }

    #[tokio::test]
    async fn test_missing_id_fails_before_transport() {
        let (transport, service) = service();
        let err = service.check_matches(" ", GetOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(transport.last().is_none());
    }

    #[tokio::test]
    async fn test_upload_lost_validates_fields() {
        let (transport, service) = service();
        let mut report = lost_report();
        report["where_lost"] = json!("");
        report.as_object_mut().unwrap().remove("email_id");

        let err = service.upload_lost(report).await.unwrap_err();
        assert_eq!(
            err.message(),
            "Missing required fields for upload_lost: where_lost, email_id"
        );
        assert!(transport.last().is_none());

        let err = service.upload_found(json!(["not", "an", "object"])).await.unwrap_err();
        assert_eq!(err.message(), "upload_found expects a JSON object");
    }

    #[tokio::test]
    async fn test_upload_invalidates_affected_lists() {
        let (transport, service) = service();
        transport.route(Method::Get, ALL_LOST, json!([]));
        transport.route(Method::Get, ALL_FOUND, json!([]));
        transport.route(Method::Get, STATS, json!({}));
        transport.route(Method::Get, "/get_records_by_user/u-17", json!([]));
        transport.route(Method::Get, "/alert/u-17", json!([]));
        transport.route(Method::Post, "/upload_lost", json!({"face_id": "f9"}));

        service.all_lost(GetOptions::default()).await.unwrap();
        service.all_found(GetOptions::default()).await.unwrap();
        service.stats(GetOptions::default()).await.unwrap();
        service.records_by_user("u-17", GetOptions::default()).await.unwrap();
        service.alerts("u-17", GetOptions::default()).await.unwrap();

        let created = service.upload_lost(lost_report()).await.unwrap();
        assert_eq!(created, json!({"face_id": "f9"}));

        let cache = service.cache();
        assert!(cache.entry_info(ALL_LOST).is_none());
        assert!(cache.entry_info(STATS).is_none());
        assert!(cache.entry_info("/get_records_by_user/u-17").is_none());
        assert!(cache.entry_info("/alert/u-17").is_none());
        // Found list is unaffected by a lost report.
        assert!(cache.entry_info(ALL_FOUND).is_some());

        service.all_lost(GetOptions::default()).await.unwrap();
        assert_eq!(transport.count(Method::Get, ALL_LOST), 2);
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_cache() {
        let (transport, service) = service();
        transport.route(Method::Get, ALL_FOUND, json!([]));
        transport.fail(Method::Post, "/upload_found", 422, json!({"detail": "no face detected"}));

        service.all_found(GetOptions::default()).await.unwrap();
        let err = service
            .upload_found(json!({"name": "unknown", "where_found": "Gate 2", "user_id": "v-3"}))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(422));
        assert!(service.cache().entry_info(ALL_FOUND).is_some());
    }

    #[tokio::test]
    async fn test_cleanup_sends_threshold() {
        let (transport, service) = service();
        transport.route(Method::Post, "/cleanup_found_duplicates", json!({"removed": 2}));

        service.cleanup_found_duplicates(0.85).await.unwrap();
        let request = transport.last().unwrap();
        assert_eq!(request.query, vec![("threshold".to_string(), "0.85".to_string())]);
    }

    #[test]
    fn test_stats_derives_totals_and_match_rate() {
        let stats = Stats::from_record(&json!({
            "lost_people": 12, "found_people": 8, "matches": 3,
            "lost_pending": 9, "found_pending": 5, "last_updated": "2024-03-01T10:00:00Z"
        }));
        assert_eq!(stats.total_lost_people, 12);
        assert_eq!(stats.total_found_people, 8);
        assert_eq!(stats.pending_cases, 14);
        assert_eq!(stats.match_rate, 15.0);
        assert_eq!(stats.last_updated, "2024-03-01T10:00:00Z");
        assert_eq!(stats.raw["matches"], 3);

        let rate = Stats::from_record(&json!({"lost_people": 2, "found_people": 1, "matches": 1}));
        assert_eq!(rate.match_rate, 33.3);
    }

    #[test]
    fn test_empty_stats_do_not_divide_by_zero() {
        let stats = Stats::from_record(&json!({}));
        assert_eq!(stats.total_matches, 0);
        assert_eq!(stats.pending_cases, 0);
        assert_eq!(stats.match_rate, 0.0);
        assert!(!stats.last_updated.is_empty());
    }

    #[test]
    fn test_health_maps_backend_fields() {
        let health = Health::from_record(&json!({
            "status": "healthy", "database": "connected",
            "collections": {"lost_people": 4}, "face_model_loaded": true
        }));
        assert_eq!(health.status, "healthy");
        assert_eq!(health.mongodb_status, "connected");
        assert_eq!(health.mongodb_collections, json!({"lost_people": 4}));
        assert_eq!(health.face_model_status, FaceModelStatus::Loaded);

        let degraded =
            Health::from_record(&json!({"mongodb_status": "down", "face_model_loaded": false}));
        assert_eq!(degraded.status, "unknown");
        assert_eq!(degraded.mongodb_status, "down");
        assert_eq!(degraded.mongodb_collections, json!({}));
        assert_eq!(degraded.face_model_status, FaceModelStatus::NotLoaded);

        let bare = Health::from_record(&json!({}));
        assert_eq!(bare.face_model_status, FaceModelStatus::Unknown);
        assert_eq!(bare.mongodb_status, "unknown");
    }

    #[test]
    fn test_person_record_maps_status_and_location() {
        let lost = PersonRecord::from_record(&json!({
            "collection": "lost_people",
            "record": {"face_id": "f1", "name": "Ravi", "age": "9", "where_lost": "Gate 4",
                       "status": "pending", "upload_time": "2024-03-01T09:00:00Z"}
        }));
        assert_eq!(lost.id, "f1");
        assert_eq!(lost.age, Some(9));
        assert_eq!(lost.status, "open");
        assert_eq!(lost.location, "Gate 4");
        assert_eq!(lost.source, "lost_people");
        assert_eq!(lost.created_at.as_deref(), Some("2024-03-01T09:00:00Z"));

        let found = PersonRecord::from_record(&json!({
            "_source": "found_people",
            "data": {"match_id": "m2", "location_found": "Ghat 3", "status": "found"}
        }));
        assert_eq!(found.id, "m2");
        assert_eq!(found.name, "Unknown");
        assert_eq!(found.status, "resolved");
        assert_eq!(found.location, "Ghat 3");

        let other = PersonRecord::from_record(&json!({"status": "matched"}));
        assert_eq!(other.status, "matched");
        assert_eq!(other.source, "unknown");
        assert_eq!(other.location, "Unknown");
    }

    #[tokio::test]
    async fn test_lost_records_use_lost_collection() {
        let (transport, service) = service();
        transport.route(Method::Get, ALL_LOST, json!([
            {"face_id": "f1", "where_lost": "Gate 4"},
            {"face_id": "f2", "status": "found"}
        ]));

        let records = service.lost_records(GetOptions::default()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].location, "Gate 4");
        assert_eq!(records[1].status, "resolved");
        assert!(records.iter().all(|r| r.source == LOST_COLLECTION));

        transport.route(Method::Get, STATS, json!({"lost_people": 1, "matches": 1}));
        let stats = service.stats_summary(GetOptions::default()).await.unwrap();
        assert_eq!(stats.match_rate, 100.0);
    }
}
