//! In-memory stand-ins for S3, MySQL and Rekognition with failure injection.

#![allow(dead_code)]

use async_trait::async_trait;
use photoapp::{
    Asset, AssetLabel, AssetLocation, BatchDeleteReport, DetectedLabel, Error, LabelDetector,
    LabelMatch, MetadataStore, NewAsset, ObjectStore, PhotoApp, Result, RetryPolicy, Store, User,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const FIRST_USER_ID: i64 = 80001;

/// Per-operation call counters and scripted transient failures
#[derive(Default)]
pub struct Faults {
    store: Option<Store>,
    failures: Mutex<HashMap<&'static str, u32>>,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl Faults {
    fn new(store: Store) -> Self {
        Self {
            store: Some(store),
            ..Default::default()
        }
    }

    /// Make the next `times` calls of `op` fail transiently
    pub fn fail(&self, op: &'static str, times: u32) {
        self.failures.lock().unwrap().insert(op, times);
    }

    pub fn fail_always(&self, op: &'static str) {
        self.fail(op, u32::MAX);
    }

    pub fn calls(&self, op: &'static str) -> u32 {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn enter(&self, op: &'static str) -> Result<()> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(op).or_insert(0);
            *n += 1;
            *n
        };

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(op) {
            Some(remaining) if *remaining > 0 => {
                *remaining = remaining.saturating_sub(1);
                Err(Error::Transient {
                    store: self.store.unwrap_or(Store::Database),
                    message: format!("{} attempt {} failed", op, n),
                })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    assets: Vec<Asset>,
    labels: Vec<(i64, AssetLabel)>,
    next_assetid: i64,
}

pub struct FakeMetadata {
    tables: Mutex<Tables>,
    pub faults: Faults,
}

impl FakeMetadata {
    pub fn with_users(usernames: &[&str]) -> Self {
        let users = usernames
            .iter()
            .enumerate()
            .map(|(i, name)| User {
                userid: FIRST_USER_ID + i as i64,
                username: name.to_string(),
                givenname: name.to_uppercase(),
                familyname: "Tester".to_string(),
            })
            .collect();

        Self {
            tables: Mutex::new(Tables {
                users,
                next_assetid: photoapp::models::FIRST_ASSET_ID,
                ..Default::default()
            }),
            faults: Faults::new(Store::Database),
        }
    }

    pub fn asset_count(&self) -> usize {
        self.tables.lock().unwrap().assets.len()
    }

    pub fn label_count(&self, assetid: i64) -> usize {
        self.tables
            .lock()
            .unwrap()
            .labels
            .iter()
            .filter(|(id, _)| *id == assetid)
            .count()
    }
}

#[async_trait]
impl MetadataStore for FakeMetadata {
    async fn username(&self, userid: i64) -> Result<String> {
        self.faults.enter("username")?;
        let tables = self.tables.lock().unwrap();
        tables
            .users
            .iter()
            .find(|u| u.userid == userid)
            .map(|u| u.username.clone())
            .ok_or_else(|| Error::not_found("user", userid))
    }

    async fn insert_asset(&self, asset: &NewAsset) -> Result<i64> {
        self.faults.enter("insert_asset")?;
        let mut tables = self.tables.lock().unwrap();
        let assetid = tables.next_assetid;
        tables.next_assetid += 1;
        tables.assets.push(Asset {
            assetid,
            userid: asset.userid,
            localname: asset.localname.clone(),
            bucketkey: asset.bucketkey.clone(),
        });
        Ok(assetid)
    }

    async fn insert_labels(&self, assetid: i64, labels: &[DetectedLabel]) -> Result<()> {
        self.faults.enter("insert_labels")?;
        let mut tables = self.tables.lock().unwrap();
        for label in labels {
            tables.labels.push((
                assetid,
                AssetLabel {
                    label: label.name.clone(),
                    confidence: label.stored_confidence(),
                },
            ));
        }
        Ok(())
    }

    async fn asset_location(&self, assetid: i64) -> Result<AssetLocation> {
        self.faults.enter("asset_location")?;
        let tables = self.tables.lock().unwrap();
        tables
            .assets
            .iter()
            .find(|a| a.assetid == assetid)
            .map(|a| AssetLocation {
                bucketkey: a.bucketkey.clone(),
                localname: a.localname.clone(),
            })
            .ok_or_else(|| Error::not_found("asset", assetid))
    }

    async fn purge_assets(&self) -> Result<Vec<String>> {
        self.faults.enter("purge_assets")?;
        let mut tables = self.tables.lock().unwrap();
        let keys: Vec<String> = tables.assets.drain(..).map(|a| a.bucketkey).collect();
        tables.labels.clear();

        // Truncation has committed; only the identity reset can still fail
        if let Err(e) = self.faults.enter("reset_identity") {
            return Err(Error::purge_incomplete(keys, e));
        }
        tables.next_assetid = photoapp::models::FIRST_ASSET_ID;
        Ok(keys)
    }

    async fn count_users(&self) -> Result<i64> {
        self.faults.enter("count_users")?;
        Ok(self.tables.lock().unwrap().users.len() as i64)
    }

    async fn users(&self) -> Result<Vec<User>> {
        self.faults.enter("users")?;
        Ok(self.tables.lock().unwrap().users.clone())
    }

    async fn assets(&self, userid: Option<i64>) -> Result<Vec<Asset>> {
        self.faults.enter("assets")?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .assets
            .iter()
            .filter(|a| userid.map_or(true, |id| a.userid == id))
            .cloned()
            .collect())
    }

    async fn labels_for(&self, assetid: i64) -> Result<Vec<AssetLabel>> {
        self.faults.enter("labels_for")?;
        let tables = self.tables.lock().unwrap();
        if !tables.assets.iter().any(|a| a.assetid == assetid) {
            return Err(Error::not_found("asset", assetid));
        }
        let mut labels: Vec<AssetLabel> = tables
            .labels
            .iter()
            .filter(|(id, _)| *id == assetid)
            .map(|(_, label)| label.clone())
            .collect();
        labels.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(labels)
    }

    async fn search_labels(&self, fragment: &str) -> Result<Vec<LabelMatch>> {
        self.faults.enter("search_labels")?;
        let tables = self.tables.lock().unwrap();
        let mut matches: Vec<LabelMatch> = tables
            .labels
            .iter()
            .filter(|(_, label)| label.label.contains(fragment))
            .map(|(assetid, label)| LabelMatch {
                assetid: *assetid,
                label: label.label.clone(),
                confidence: label.confidence,
            })
            .collect();
        matches.sort_by(|a, b| (a.assetid, &a.label).cmp(&(b.assetid, &b.label)));
        Ok(matches)
    }
}

pub struct FakeObjects {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pub faults: Faults,
}

impl FakeObjects {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            faults: Faults::new(Store::ObjectStore),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for FakeObjects {
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        self.faults.enter("put_file")?;
        let bytes = tokio::fs::read(path).await.map_err(|e| Error::io(path, e))?;
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()> {
        self.faults.enter("get_to_file")?;
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found("object", key))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        tokio::fs::write(dest, bytes)
            .await
            .map_err(|e| Error::io(dest, e))
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<BatchDeleteReport> {
        self.faults.enter("delete_batch")?;
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(BatchDeleteReport {
            deleted: keys.len(),
            failed: Vec::new(),
        })
    }

    async fn count_objects(&self) -> Result<u64> {
        self.faults.enter("count_objects")?;
        Ok(self.objects.lock().unwrap().len() as u64)
    }
}

pub struct FakeLabels {
    labels: Vec<DetectedLabel>,
    pub faults: Faults,
}

impl FakeLabels {
    pub fn returning(labels: &[(&str, f32)]) -> Self {
        Self {
            labels: labels
                .iter()
                .map(|(name, confidence)| DetectedLabel {
                    name: name.to_string(),
                    confidence: *confidence,
                })
                .collect(),
            faults: Faults::new(Store::LabelService),
        }
    }
}

#[async_trait]
impl LabelDetector for FakeLabels {
    async fn detect_labels(&self, _key: &str) -> Result<Vec<DetectedLabel>> {
        self.faults.enter("detect_labels")?;
        Ok(self.labels.clone())
    }
}

pub struct Harness {
    pub app: PhotoApp,
    pub metadata: Arc<FakeMetadata>,
    pub objects: Arc<FakeObjects>,
    pub labels: Arc<FakeLabels>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_labels(FakeLabels::returning(&[
            ("Animal", 99.6),
            ("Mammal", 99.2),
            ("Rodent", 87.4),
        ]))
    }

    pub fn with_labels(labels: FakeLabels) -> Self {
        let metadata = Arc::new(FakeMetadata::with_users(&["p_sarkar", "e_ricci"]));
        let objects = Arc::new(FakeObjects::new());
        let labels = Arc::new(labels);

        let app = PhotoApp::new(
            metadata.clone(),
            objects.clone(),
            labels.clone(),
            RetryPolicy::immediate(3),
        );

        Self {
            app,
            metadata,
            objects,
            labels,
        }
    }
}

/// Write an image-like file into `dir` and return its path
pub fn write_image(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
