use async_trait::async_trait;
use sqlx::Row;

use super::{CertificateContainer, CertificateRecords};
use crate::Result;
use crate::store::document::DocumentDatabase;

/// Certificate rows in the document database, one per friendly name within
/// a scope (normally the environment).
pub struct DocumentCertificateRecords {
    db: DocumentDatabase,
    scope: String,
}

impl DocumentCertificateRecords {
    pub fn new(db: DocumentDatabase, scope: impl Into<String>) -> Self {
        Self {
            db,
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl CertificateRecords for DocumentCertificateRecords {
    async fn get(&self, name: &str) -> Result<Option<CertificateContainer>> {
        let row = sqlx::query(
            "SELECT body FROM arcology_certificates WHERE scope = $1 AND lookup_name = $2",
        )
        .bind(&self.scope)
        .bind(name.to_ascii_uppercase())
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn names(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM arcology_certificates WHERE scope = $1 ORDER BY lookup_name",
        )
        .bind(&self.scope)
        .fetch_all(self.db.pool())
        .await?;

        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            names.push(row.try_get::<String, _>("name")?);
        }
        Ok(names)
    }

    async fn put(&self, container: CertificateContainer) -> Result<()> {
        let lookup_name = container.id.to_ascii_uppercase();
        let body = serde_json::to_string(&container)?;

        let mut tx = self.db.pool().begin().await?;
        sqlx::query("DELETE FROM arcology_certificates WHERE scope = $1 AND lookup_name = $2")
            .bind(&self.scope)
            .bind(&lookup_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO arcology_certificates (scope, lookup_name, name, body)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&self.scope)
        .bind(&lookup_name)
        .bind(&container.id)
        .bind(body)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
