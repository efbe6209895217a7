//! CCTV registry endpoints.
//!
//! Cache keys follow the dashboard's naming: `cctvs:<params>` for list
//! queries, `cctv:<id>` for single cameras, `cctv_summary` for the totals,
//! and `area:`/`zone:`/`status:` style keys for the filtered listings.
//! Every mutation drops the list queries, the summary and the touched ids.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{segment, text, ServiceCore};
use crate::cache::{GetOptions, ResourceCache};
use crate::error::ApiError;
use crate::transport::{Request, Transport};

const LIST_PREFIX: &str = "cctvs:";
const ITEM_PREFIX: &str = "cctv:";
const SUMMARY_KEY: &str = "cctv_summary";

/// Query parameters for list and search requests. Sorted so equal queries
/// share a cache key.
pub type QueryParams = BTreeMap<String, String>;

#[derive(Clone)]
pub struct CameraService {
    core: ServiceCore,
}

impl CameraService {
    pub fn new(transport: Arc<dyn Transport>, cache: ResourceCache<Value>) -> Self {
        Self {
            core: ServiceCore::new(transport, cache),
        }
    }

    pub fn cache(&self) -> &ResourceCache<Value> {
        self.core.cache()
    }

    pub async fn list(&self, params: &QueryParams, options: GetOptions) -> Result<Value, ApiError> {
        let key = list_key(params);
        let request = Request::get("/cctvs").with_query(params.clone());
        self.core.read(&key, request, options).await
    }

    /// `list` with every record mapped through [`Camera::from_record`].
    pub async fn list_normalized(
        &self,
        params: &QueryParams,
        options: GetOptions,
    ) -> Result<Vec<Camera>, ApiError> {
        let data = self.list(params, options).await?;
        Ok(Camera::from_list(&data))
    }

    pub async fn get(&self, id: &str, options: GetOptions) -> Result<Value, ApiError> {
        let id = require("id", id)?;
        let path = format!("/cctvs/{}", segment(id));
        self.core
            .read(&format!("{}{}", ITEM_PREFIX, id), Request::get(path), options)
            .await
    }

    pub async fn summary(&self, options: GetOptions) -> Result<Value, ApiError> {
        self.core
            .read(SUMMARY_KEY, Request::get("/cctvs/summary"), options)
            .await
    }

    /// Free-text search. Results are never cached; only `max_retries` of
    /// `options` applies.
    pub async fn search(&self, text: &str, options: GetOptions) -> Result<Value, ApiError> {
        let mut params = QueryParams::new();
        params.insert("q".to_string(), text.to_string());
        self.search_with(&params, options).await
    }

    pub async fn search_with(
        &self,
        params: &QueryParams,
        options: GetOptions,
    ) -> Result<Value, ApiError> {
        let request = Request::get("/cctvs/search").with_query(params.clone());
        self.core.fetch(request, options.max_retries).await
    }

    pub async fn by_area(&self, area: &str, options: GetOptions) -> Result<Value, ApiError> {
        self.filtered("area", "/cctvs/by-area/", require("area", area)?, options)
            .await
    }

    pub async fn by_zone(&self, zone: &str, options: GetOptions) -> Result<Value, ApiError> {
        self.filtered("zone", "/cctvs/by-zone/", require("zone", zone)?, options)
            .await
    }

    pub async fn by_area_zone(
        &self,
        area: &str,
        zone: &str,
        options: GetOptions,
    ) -> Result<Value, ApiError> {
        let (area, zone) = (require("area", area)?, require("zone", zone)?);
        let path = format!("/cctvs/by-area-zone/{}/{}", segment(area), segment(zone));
        let key = format!("area_zone:{}:{}", area, zone);
        self.core.read(&key, Request::get(path), options).await
    }

    pub async fn by_status(&self, status: &str, options: GetOptions) -> Result<Value, ApiError> {
        self.filtered("status", "/cctvs/by-status/", require("status", status)?, options)
            .await
    }

    pub async fn by_location_type(
        &self,
        location_type: &str,
        options: GetOptions,
    ) -> Result<Value, ApiError> {
        let location_type = require("location_type", location_type)?;
        self.filtered("locType", "/cctvs/by-location-type/", location_type, options)
            .await
    }

    async fn filtered(
        &self,
        namespace: &str,
        base: &str,
        value: &str,
        options: GetOptions,
    ) -> Result<Value, ApiError> {
        let key = format!("{}:{}", namespace, value);
        let path = format!("{}{}", base, segment(value));
        self.core.read(&key, Request::get(path), options).await
    }

    pub async fn create(&self, camera: Value) -> Result<Value, ApiError> {
        if camera.is_null() {
            return Err(ApiError::unexpected("payload is required"));
        }
        let result = self.core.send(Request::post("/cctvs", camera)).await?;
        self.invalidate(&[]);
        Ok(result)
    }

    pub async fn update(&self, id: &str, camera: Value) -> Result<Value, ApiError> {
        let id = require("id", id)?;
        let path = format!("/cctvs/{}", segment(id));
        let result = self.core.send(Request::put(path, camera)).await?;
        self.invalidate(&[id]);
        Ok(result)
    }

    pub async fn set_status(&self, id: &str, status: &str) -> Result<Value, ApiError> {
        let (id, status) = (require("id", id)?, require("status", status)?);
        let path = format!("/cctvs/{}/status", segment(id));
        let result = self
            .core
            .send(Request::patch(path, json!({ "status": status })))
            .await?;
        self.invalidate(&[id]);
        Ok(result)
    }

    pub async fn delete(&self, id: &str) -> Result<Value, ApiError> {
        let id = require("id", id)?;
        let path = format!("/cctvs/{}", segment(id));
        let result = self.core.send(Request::delete(path)).await?;
        self.invalidate(&[id]);
        Ok(result)
    }

    pub async fn bulk_create(&self, cameras: Vec<Value>) -> Result<Value, ApiError> {
        if cameras.is_empty() {
            return Err(ApiError::unexpected("non-empty list of cameras is required"));
        }
        let result = self
            .core
            .send(Request::post("/cctvs/bulk", Value::Array(cameras)))
            .await?;
        self.invalidate(&[]);
        Ok(result)
    }

    pub async fn bulk_set_status(&self, ids: &[&str], status: &str) -> Result<Value, ApiError> {
        require_ids(ids)?;
        let status = require("status", status)?;
        let body = json!({ "ids": ids, "status": status });
        let result = self.core.send(Request::put("/cctvs/bulk/status", body)).await?;
        self.invalidate(ids);
        Ok(result)
    }

    pub async fn bulk_delete(&self, ids: &[&str]) -> Result<Value, ApiError> {
        require_ids(ids)?;
        let request = Request::delete("/cctvs/bulk").with_body(json!({ "ids": ids }));
        let result = self.core.send(request).await?;
        self.invalidate(ids);
        Ok(result)
    }

    fn invalidate(&self, ids: &[&str]) {
        let cache = self.core.cache();
        let lists = cache.invalidate_prefix(LIST_PREFIX);
        cache.invalidate(SUMMARY_KEY);
        for id in ids {
            cache.invalidate(&format!("{}{}", ITEM_PREFIX, id));
        }
        debug!(lists = lists, ids = ids.len(), "Invalidated camera caches");
    }
}

fn list_key(params: &QueryParams) -> String {
    format!("{}{}", LIST_PREFIX, encode_params(params))
}

fn encode_params(params: &QueryParams) -> String {
    // A BTreeMap of strings always serializes.
    serde_json::to_string(params).unwrap_or_default()
}

fn require<'a>(name: &str, value: &'a str) -> Result<&'a str, ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::unexpected(format!("{} is required", name)))
    } else {
        Ok(value)
    }
}

fn require_ids(ids: &[&str]) -> Result<(), ApiError> {
    if ids.is_empty() {
        return Err(ApiError::unexpected("ids are required"));
    }
    ids.iter().try_for_each(|id| require("id", id).map(|_| ()))
}

/// A camera record with the backend's alternate field names folded together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    pub area: Option<String>,
    pub zone: Option<String>,
    pub location_type: Option<String>,
    pub status: String,
    pub stream_url: Option<String>,
    pub last_online: Option<String>,
    pub created_at: Option<String>,
    /// The record as the API sent it.
    pub meta: Value,
}

impl Camera {
    pub fn from_record(record: &Value) -> Self {
        let pick = |names: &[&str]| names.iter().find_map(|name| text(record.get(*name)));
        Self {
            id: pick(&["id", "_id", "object_id"]),
            name: pick(&["name", "camera_name"]).unwrap_or_else(|| "Unnamed Camera".to_string()),
            description: pick(&["description", "desc"]).unwrap_or_default(),
            area: pick(&["area", "area_name"]),
            zone: pick(&["zone", "zone_name"]),
            location_type: pick(&["location_type", "type"]),
            status: pick(&["status"]).unwrap_or_else(|| "unknown".to_string()),
            stream_url: pick(&["stream_url", "rtsp_url", "http_url"]),
            last_online: pick(&["last_online", "updated_at", "last_seen"]),
            created_at: pick(&["created_at", "timestamp"]),
            meta: record.clone(),
        }
    }

    /// Map a list response; anything but an array yields no cameras.
    pub fn from_list(data: &Value) -> Vec<Self> {
        data.as_array()
            .map(|records| records.iter().map(Self::from_record).collect())
            .unwrap_or_default()
    }
}

/// Cameras per lowercased status, plus a `total`.
pub fn status_counts(cameras: &[Camera]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::from([("total".to_string(), 0)]);
    for camera in cameras {
        *counts.entry(camera.status.to_lowercase()).or_insert(0) += 1;
        *counts.entry("total".to_string()).or_insert(0) += 1;
    }
    counts
}
