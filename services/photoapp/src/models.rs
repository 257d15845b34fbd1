use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::Path;
use uuid::Uuid;

/// Assets are numbered from here after every bulk delete
pub const FIRST_ASSET_ID: i64 = 1001;

/// Row of the `users` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub userid: i64,
    pub username: String,
    pub givenname: String,
    pub familyname: String,
}

/// Row of the `assets` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Asset {
    pub assetid: i64,
    pub userid: i64,
    /// Original client-supplied filename
    pub localname: String,
    /// Object-store key holding the image bytes
    pub bucketkey: String,
}

/// Where an asset's bytes live, and what it was called on upload
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AssetLocation {
    pub bucketkey: String,
    pub localname: String,
}

/// Asset row about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewAsset {
    pub userid: i64,
    pub localname: String,
    pub bucketkey: String,
}

/// Label attached to an asset, as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AssetLabel {
    pub label: String,
    pub confidence: i32,
}

/// Label search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LabelMatch {
    pub assetid: i64,
    pub label: String,
    pub confidence: i32,
}

/// Label as returned by the detection service
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedLabel {
    pub name: String,
    /// Confidence in percent, fractional
    pub confidence: f32,
}

impl DetectedLabel {
    /// Integer confidence stored in `assetlabels`
    pub fn stored_confidence(&self) -> i32 {
        self.confidence.round().clamp(0.0, 100.0) as i32
    }
}

/// Final path component of a client-supplied file path
pub fn local_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::InvalidInput(format!("'{}' does not name a file", path.display()))
        })
}

/// Generate the object-store key for a new upload.
///
/// Format: `{username}/{uuid}-{localname}`. The random token makes keys
/// unique without consulting the database.
pub fn generate_bucket_key(username: &str, localname: &str) -> String {
    format!("{}/{}-{}", username, Uuid::new_v4(), localname)
}

/// Content type for an image file name
pub fn content_type_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}
