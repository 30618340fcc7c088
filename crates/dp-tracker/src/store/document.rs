use std::time::Duration;

use async_trait::async_trait;
use sqlx::AnyPool;
use sqlx::Row;
use sqlx::any::AnyPoolOptions;
use tracing::{info, instrument};

use super::{StateStore, StoreKind, already_exists, unknown_environment};
use crate::Result;
use crate::arcology::{Arcology, ArcologyInfo, ComputingContainer, DeployedInstance};

const KIND_INFO: &str = "info";
const KIND_CONTAINER: &str = "container";
const KIND_INSTANCE: &str = "instance";

/// Connection to the document database shared by the arcology and
/// certificate collections. Any sqlx-supported URL works
/// (`postgres://…`, `sqlite://…`, `sqlite::memory:`).
#[derive(Clone)]
pub struct DocumentDatabase {
    pool: AnyPool,
}

impl DocumentDatabase {
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Single long-lived connection, as an in-memory SQLite database needs.
    pub async fn connect_single(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS arcology_documents (
                environment TEXT NOT NULL,
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                ordinal BIGINT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (environment, kind, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS arcology_certificates (
                scope TEXT NOT NULL,
                lookup_name TEXT NOT NULL,
                name TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (scope, lookup_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// One row per arcology info, container and instance.
pub struct DocumentStateStore {
    db: DocumentDatabase,
}

impl DocumentStateStore {
    pub fn new(db: DocumentDatabase) -> Self {
        Self { db }
    }

    async fn exists(&self, environment: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM arcology_documents WHERE environment = $1 AND kind = $2",
        )
        .bind(environment)
        .bind(KIND_INFO)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.try_get::<i64, _>("n")? > 0)
    }

    async fn replace(&self, arcology: &Arcology) -> Result<()> {
        let environment = arcology.environment();
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM arcology_documents WHERE environment = $1")
            .bind(environment)
            .execute(&mut *tx)
            .await?;

        let info = ArcologyInfo {
            computing_containers: Vec::new(),
            ..arcology.info.clone()
        };
        let mut rows = vec![(KIND_INFO, environment.to_string(), serde_json::to_string(&info)?)];
        for container in &arcology.info.computing_containers {
            rows.push((
                KIND_CONTAINER,
                container.container_id.clone(),
                serde_json::to_string(container)?,
            ));
        }
        for instance in &arcology.instances {
            rows.push((
                KIND_INSTANCE,
                instance.instance_creation_details.private_ip_address.clone(),
                serde_json::to_string(instance)?,
            ));
        }

        for (ordinal, (kind, id, body)) in rows.into_iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO arcology_documents (environment, kind, id, ordinal, body)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(environment)
            .bind(kind)
            .bind(id)
            .bind(ordinal as i64)
            .bind(body)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for DocumentStateStore {
    #[instrument(skip_all, fields(environment = %arcology.environment()))]
    async fn create(&self, arcology: &Arcology) -> Result<()> {
        if self.exists(arcology.environment()).await? {
            return Err(already_exists(arcology.environment()));
        }
        self.replace(arcology).await?;
        info!("document store: created arcology");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self, environment: &str) -> Result<Arcology> {
        let rows = sqlx::query(
            r#"
            SELECT kind, body FROM arcology_documents
            WHERE environment = $1
            ORDER BY ordinal
            "#,
        )
        .bind(environment)
        .fetch_all(self.db.pool())
        .await?;

        let mut info: Option<ArcologyInfo> = None;
        let mut containers: Vec<ComputingContainer> = Vec::new();
        let mut instances: Vec<DeployedInstance> = Vec::new();
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let body: String = row.try_get("body")?;
            match kind.as_str() {
                KIND_INFO => info = Some(serde_json::from_str(&body)?),
                KIND_CONTAINER => containers.push(serde_json::from_str(&body)?),
                KIND_INSTANCE => instances.push(serde_json::from_str(&body)?),
                other => tracing::warn!(kind = other, "document store: ignoring unknown row kind"),
            }
        }

        let mut info = info.ok_or_else(|| unknown_environment(environment))?;
        info.computing_containers = containers;
        Ok(Arcology { info, instances })
    }

    #[instrument(skip_all, fields(environment = %arcology.environment()))]
    async fn save(&self, arcology: &Arcology) -> Result<()> {
        if !self.exists(arcology.environment()).await? {
            return Err(unknown_environment(arcology.environment()));
        }
        self.replace(arcology).await
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Database
    }
}
