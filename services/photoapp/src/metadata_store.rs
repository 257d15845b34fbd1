use crate::error::{Error, Result, Store};
use crate::models::{
    Asset, AssetLabel, AssetLocation, DetectedLabel, LabelMatch, NewAsset, User, FIRST_ASSET_ID,
};
use crate::transaction::Database;
use async_trait::async_trait;
use sqlx::{Executor, MySql, QueryBuilder};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Relational metadata: users, assets and their labels
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Resolve a user id to its username
    async fn username(&self, userid: i64) -> Result<String>;

    /// Insert an asset row and return the database-assigned id
    async fn insert_asset(&self, asset: &NewAsset) -> Result<i64>;

    /// Insert all labels for one asset, or none of them
    async fn insert_labels(&self, assetid: i64, labels: &[DetectedLabel]) -> Result<()>;

    /// Bucket key and original filename of an asset
    async fn asset_location(&self, assetid: i64) -> Result<AssetLocation>;

    /// Remove every asset and label row, reset asset numbering, and return
    /// the bucket keys the removed rows referenced.
    ///
    /// A failure after the rows are gone is reported as
    /// [`Error::PurgeIncomplete`] carrying those keys.
    async fn purge_assets(&self) -> Result<Vec<String>>;

    async fn count_users(&self) -> Result<i64>;

    async fn users(&self) -> Result<Vec<User>>;

    /// All assets, or one user's assets, by ascending id
    async fn assets(&self, userid: Option<i64>) -> Result<Vec<Asset>>;

    /// Labels of an existing asset, by label name
    async fn labels_for(&self, assetid: i64) -> Result<Vec<AssetLabel>>;

    /// Labels whose name contains `fragment`, by asset id then label
    async fn search_labels(&self, fragment: &str) -> Result<Vec<LabelMatch>>;
}

/// MySQL-backed metadata store
pub struct MySqlMetadataStore {
    db: Database,
}

impl MySqlMetadataStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Apply the embedded schema migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        let mut conn = self.db.connect().await?;
        sqlx::migrate!("./migrations")
            .run(&mut conn)
            .await
            .map_err(|e| Error::Rejected {
                store: Store::Database,
                message: format!("migration failed: {}", e),
            })?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MySqlMetadataStore {
    #[instrument(skip(self))]
    async fn username(&self, userid: i64) -> Result<String> {
        let row: Option<(String,)> = self
            .db
            .scoped("username", move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, (String,)>("SELECT username FROM users WHERE userid = ?")
                        .bind(userid)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(Error::from_sqlx)
                })
            })
            .await?;

        row.map(|(username,)| username)
            .ok_or_else(|| Error::not_found("user", userid))
    }

    #[instrument(skip(self, asset), fields(userid = asset.userid, bucketkey = %asset.bucketkey))]
    async fn insert_asset(&self, asset: &NewAsset) -> Result<i64> {
        let asset = asset.clone();

        let assetid = self
            .db
            .scoped("insert_asset", move |conn| {
                Box::pin(async move {
                    let done = sqlx::query(
                        "INSERT INTO assets (userid, localname, bucketkey) VALUES (?, ?, ?)",
                    )
                    .bind(asset.userid)
                    .bind(&asset.localname)
                    .bind(&asset.bucketkey)
                    .execute(&mut *conn)
                    .await
                    .map_err(Error::from_sqlx)?;

                    Ok(done.last_insert_id() as i64)
                })
            })
            .await?;

        debug!(assetid, "Asset row inserted");
        Ok(assetid)
    }

    #[instrument(skip(self, labels), fields(count = labels.len()))]
    async fn insert_labels(&self, assetid: i64, labels: &[DetectedLabel]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let labels = labels.to_vec();

        self.db
            .scoped("insert_labels", move |conn| {
                Box::pin(async move {
                    let mut builder: QueryBuilder<MySql> =
                        QueryBuilder::new("INSERT INTO assetlabels (assetid, label, confidence) ");
                    builder.push_values(&labels, |mut row, label| {
                        row.push_bind(assetid)
                            .push_bind(label.name.clone())
                            .push_bind(label.stored_confidence());
                    });

                    builder
                        .build()
                        .execute(&mut *conn)
                        .await
                        .map_err(Error::from_sqlx)?;
                    Ok(())
                })
            })
            .await
    }

    #[instrument(skip(self))]
    async fn asset_location(&self, assetid: i64) -> Result<AssetLocation> {
        let location: Option<AssetLocation> = self
            .db
            .scoped("asset_location", move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, AssetLocation>(
                        "SELECT bucketkey, localname FROM assets WHERE assetid = ?",
                    )
                    .bind(assetid)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(Error::from_sqlx)
                })
            })
            .await?;

        location.ok_or_else(|| Error::not_found("asset", assetid))
    }

    #[instrument(skip(self))]
    async fn purge_assets(&self) -> Result<Vec<String>> {
        // TRUNCATE commits implicitly. Once `assets` is truncated a retry
        // would read no keys, so they are kept here for the error path.
        let truncated: Arc<Mutex<Option<Vec<String>>>> = Arc::new(Mutex::new(None));
        let slot = truncated.clone();

        let outcome = self
            .db
            .scoped("purge_assets", move |conn| {
                Box::pin(async move {
                    let keys: Vec<String> =
                        sqlx::query_as::<_, (String,)>("SELECT bucketkey FROM assets")
                            .fetch_all(&mut *conn)
                            .await
                            .map_err(Error::from_sqlx)?
                            .into_iter()
                            .map(|(key,)| key)
                            .collect();

                    // foreign_key_checks is session scoped and this
                    // connection is discarded after the unit of work.
                    for statement in [
                        "SET foreign_key_checks = 0",
                        "TRUNCATE TABLE assetlabels",
                        "TRUNCATE TABLE assets",
                    ] {
                        Executor::execute(&mut *conn, statement)
                            .await
                            .map_err(Error::from_sqlx)?;
                    }
                    *slot.lock().await = Some(keys.clone());

                    let reset = format!("ALTER TABLE assets AUTO_INCREMENT = {}", FIRST_ASSET_ID);
                    for statement in ["SET foreign_key_checks = 1", reset.as_str()] {
                        Executor::execute(&mut *conn, statement)
                            .await
                            .map_err(Error::from_sqlx)?;
                    }

                    Ok(keys)
                })
            })
            .await;

        let keys = match outcome {
            Ok(keys) => keys,
            Err(e) => {
                return Err(match truncated.lock().await.take() {
                    Some(keys) => Error::purge_incomplete(keys, e),
                    None => e,
                })
            }
        };

        info!(assets = keys.len(), "Asset and label tables truncated");
        Ok(keys)
    }

    async fn count_users(&self) -> Result<i64> {
        let (count,): (i64,) = self
            .db
            .scoped("count_users", move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, (i64,)>("SELECT COUNT(userid) FROM users")
                        .fetch_one(&mut *conn)
                        .await
                        .map_err(Error::from_sqlx)
                })
            })
            .await?;

        Ok(count)
    }

    async fn users(&self) -> Result<Vec<User>> {
        self.db
            .scoped("users", move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, User>(
                        "SELECT userid, username, givenname, familyname FROM users ORDER BY userid ASC",
                    )
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(Error::from_sqlx)
                })
            })
            .await
    }

    async fn assets(&self, userid: Option<i64>) -> Result<Vec<Asset>> {
        self.db
            .scoped("assets", move |conn| {
                Box::pin(async move {
                    let query = match userid {
                        Some(userid) => sqlx::query_as::<_, Asset>(
                            "SELECT assetid, userid, localname, bucketkey FROM assets \
                             WHERE userid = ? ORDER BY assetid ASC",
                        )
                        .bind(userid),
                        None => sqlx::query_as::<_, Asset>(
                            "SELECT assetid, userid, localname, bucketkey FROM assets \
                             ORDER BY assetid ASC",
                        ),
                    };

                    query.fetch_all(&mut *conn).await.map_err(Error::from_sqlx)
                })
            })
            .await
    }

    async fn labels_for(&self, assetid: i64) -> Result<Vec<AssetLabel>> {
        let labels: Option<Vec<AssetLabel>> = self
            .db
            .scoped("labels_for", move |conn| {
                Box::pin(async move {
                    let exists =
                        sqlx::query_as::<_, (i64,)>("SELECT assetid FROM assets WHERE assetid = ?")
                            .bind(assetid)
                            .fetch_optional(&mut *conn)
                            .await
                            .map_err(Error::from_sqlx)?;
                    if exists.is_none() {
                        return Ok(None);
                    }

                    let labels = sqlx::query_as::<_, AssetLabel>(
                        "SELECT label, confidence FROM assetlabels \
                         WHERE assetid = ? ORDER BY label ASC",
                    )
                    .bind(assetid)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(Error::from_sqlx)?;

                    Ok(Some(labels))
                })
            })
            .await?;

        labels.ok_or_else(|| Error::not_found("asset", assetid))
    }

    async fn search_labels(&self, fragment: &str) -> Result<Vec<LabelMatch>> {
        let pattern = format!("%{}%", fragment);

        self.db
            .scoped("search_labels", move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, LabelMatch>(
                        "SELECT assetid, label, confidence FROM assetlabels \
                         WHERE label LIKE ? ORDER BY assetid ASC, label ASC",
                    )
                    .bind(pattern)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(Error::from_sqlx)
                })
            })
            .await
    }
}
