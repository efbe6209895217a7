//! Map editor endpoints: areas, zones and markers.
//!
//! Only the full area and zone lists are cached, under `areas` and `zones`.
//! Markers and the per-area zone listing are always fetched.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::{segment, ServiceCore};
use crate::cache::{GetOptions, ResourceCache};
use crate::error::ApiError;
use crate::transport::{Request, Transport};

const AREAS_KEY: &str = "areas";
const ZONES_KEY: &str = "zones";

#[derive(Clone)]
pub struct MapService {
    core: ServiceCore,
}

impl MapService {
    pub fn new(transport: Arc<dyn Transport>, cache: ResourceCache<Value>) -> Self {
        Self {
            core: ServiceCore::new(transport, cache),
        }
    }

    pub fn cache(&self) -> &ResourceCache<Value> {
        self.core.cache()
    }

    pub async fn areas(&self, options: GetOptions) -> Result<Value, ApiError> {
        self.core.read(AREAS_KEY, Request::get("/areas"), options).await
    }

    pub async fn zones(&self, options: GetOptions) -> Result<Value, ApiError> {
        self.core.read(ZONES_KEY, Request::get("/zones"), options).await
    }

    pub async fn zones_by_area(&self, area_id: &str) -> Result<Value, ApiError> {
        let path = format!("/zones/by-area/{}", segment(require("area_id", area_id)?));
        self.core.fetch(Request::get(path), None).await
    }

    pub async fn markers(&self) -> Result<Value, ApiError> {
        self.core.fetch(Request::get("/view"), None).await
    }

    pub async fn create_area(&self, area: Value) -> Result<Value, ApiError> {
        let result = self.core.send(Request::post("/areas", payload(area)?)).await?;
        self.invalidate(&[AREAS_KEY, ZONES_KEY]);
        Ok(result)
    }

    pub async fn update_area(&self, id: &str, area: Value) -> Result<Value, ApiError> {
        let path = format!("/areas/{}", segment(require("id", id)?));
        let result = self.core.send(Request::put(path, payload(area)?)).await?;
        self.invalidate(&[AREAS_KEY, ZONES_KEY]);
        Ok(result)
    }

    /// Deleting an area can take its zones with it.
    pub async fn delete_area(&self, id: &str) -> Result<Value, ApiError> {
        let path = format!("/areas/{}", segment(require("id", id)?));
        let result = self.core.send(Request::delete(path)).await?;
        self.invalidate(&[AREAS_KEY, ZONES_KEY]);
        Ok(result)
    }

    pub async fn create_zone(&self, zone: Value) -> Result<Value, ApiError> {
        let result = self.core.send(Request::post("/zones", payload(zone)?)).await?;
        self.invalidate(&[ZONES_KEY]);
        Ok(result)
    }

    pub async fn update_zone(&self, id: &str, zone: Value) -> Result<Value, ApiError> {
        let path = format!("/zones/{}", segment(require("id", id)?));
        let result = self.core.send(Request::put(path, payload(zone)?)).await?;
        self.invalidate(&[ZONES_KEY]);
        Ok(result)
    }

    pub async fn delete_zone(&self, id: &str) -> Result<Value, ApiError> {
        let path = format!("/zones/{}", segment(require("id", id)?));
        let result = self.core.send(Request::delete(path)).await?;
        self.invalidate(&[ZONES_KEY]);
        Ok(result)
    }

    pub async fn create_marker(&self, marker: Value) -> Result<Value, ApiError> {
        self.core
            .send(Request::post("/create_marker", payload(marker)?))
            .await
    }

    pub async fn delete_marker(&self, id: &str) -> Result<Value, ApiError> {
        let path = format!("/markers/{}", segment(require("id", id)?));
        self.core.send(Request::delete(path)).await
    }

    fn invalidate(&self, keys: &[&str]) {
        let cache = self.core.cache();
        for key in keys {
            cache.invalidate(key);
        }
        debug!(keys = ?keys, "Invalidated map caches");
    }
}

fn require<'a>(name: &str, value: &'a str) -> Result<&'a str, ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::unexpected(format!("{} is required", name)))
    } else {
        Ok(value)
    }
}

fn payload(value: Value) -> Result<Value, ApiError> {
    if value.is_null() {
        Err(ApiError::unexpected("payload is required"))
    } else {
        Ok(value)
    }
}
