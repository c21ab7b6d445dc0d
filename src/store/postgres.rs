use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::{config_digest, WebserviceRepository};
use crate::errors::RepositoryError;
use crate::models::{WebserviceConfig, WebserviceConfigData, WebserviceConfigHistory};

const CONFIG_COLUMNS: &str =
    "id, name, config, valid_id, create_time, create_by, change_time, change_by";

const HISTORY_COLUMNS: &str =
    "id, config_id, config, config_digest, create_time, create_by, change_time, change_by";

enum Bind<'a> {
    Name(&'a str),
    Id(i32),
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.into()))?;
        Ok(())
    }

    async fn fetch_row(&self, sql: &str, bind: Bind<'_>) -> Result<Option<WebserviceRow>, RepositoryError> {
        let query = sqlx::query_as::<_, WebserviceRow>(sql);
        let query = match bind {
            Bind::Name(name) => query.bind(name),
            Bind::Id(id) => query.bind(id),
        };
        Ok(query.fetch_optional(&self.pool).await?)
    }

    async fn list_where(&self, clause: &str) -> Result<Vec<WebserviceConfig>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM gi_webservice_config {} ORDER BY name ASC",
            CONFIG_COLUMNS, clause
        );
        let rows = sqlx::query_as::<_, WebserviceRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WebserviceConfig::try_from).collect()
    }
}

#[async_trait]
impl WebserviceRepository for PgStore {
    async fn get_by_name(&self, name: &str) -> Result<WebserviceConfig, RepositoryError> {
        let sql = format!("SELECT {} FROM gi_webservice_config WHERE name = $1", CONFIG_COLUMNS);
        self.fetch_row(&sql, Bind::Name(name))
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("webservice {:?}", name)))?
            .try_into()
    }

    async fn get_by_id(&self, id: i32) -> Result<WebserviceConfig, RepositoryError> {
        let sql = format!("SELECT {} FROM gi_webservice_config WHERE id = $1", CONFIG_COLUMNS);
        self.fetch_row(&sql, Bind::Id(id))
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("webservice id {}", id)))?
            .try_into()
    }

    async fn list(&self) -> Result<Vec<WebserviceConfig>, RepositoryError> {
        self.list_where("").await
    }

    async fn list_valid(&self) -> Result<Vec<WebserviceConfig>, RepositoryError> {
        self.list_where("WHERE valid_id = 1").await
    }

    async fn create(&self, ws: &WebserviceConfig, user_id: i32) -> Result<i32, RepositoryError> {
        let yaml = ws.config.to_yaml()?;
        let digest = config_digest(&yaml);

        let mut tx = self.pool.begin().await?;
        let id = sqlx::query_scalar::<_, i32>(
            r#"INSERT INTO gi_webservice_config
                   (name, config, config_digest, valid_id, create_time, create_by, change_time, change_by)
               VALUES ($1, $2, $3, $4, NOW(), $5, NOW(), $5)
               RETURNING id"#,
        )
        .bind(&ws.name)
        .bind(&yaml)
        .bind(&digest)
        .bind(ws.valid_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| name_conflict(e, &ws.name))?;

        insert_history(&mut tx, id, &yaml, &digest, user_id).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn update(&self, ws: &WebserviceConfig, user_id: i32) -> Result<(), RepositoryError> {
        let yaml = ws.config.to_yaml()?;
        let digest = config_digest(&yaml);

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"UPDATE gi_webservice_config
               SET name = $1, config = $2, config_digest = $3, valid_id = $4,
                   change_time = NOW(), change_by = $5
               WHERE id = $6"#,
        )
        .bind(&ws.name)
        .bind(&yaml)
        .bind(&digest)
        .bind(ws.valid_id)
        .bind(user_id)
        .bind(ws.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| name_conflict(e, &ws.name))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("webservice id {}", ws.id)));
        }

        insert_history(&mut tx, ws.id, &yaml, &digest, user_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: i32) -> Result<(), RepositoryError> {
        // History rows go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM gi_webservice_config WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("webservice id {}", id)));
        }
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, RepositoryError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM gi_webservice_config WHERE name = $1)",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn exists_excluding(&self, name: &str, exclude_id: i32) -> Result<bool, RepositoryError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM gi_webservice_config WHERE name = $1 AND id <> $2)",
        )
        .bind(name)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn history(&self, config_id: i32) -> Result<Vec<WebserviceConfigHistory>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM gi_webservice_config_history WHERE config_id = $1 ORDER BY id DESC",
            HISTORY_COLUMNS
        );
        let rows = sqlx::query_as::<_, WebserviceConfigHistory>(&sql)
            .bind(config_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn history_entry(&self, history_id: i64) -> Result<WebserviceConfigHistory, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM gi_webservice_config_history WHERE id = $1",
            HISTORY_COLUMNS
        );
        sqlx::query_as::<_, WebserviceConfigHistory>(&sql)
            .bind(history_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("history entry {}", history_id)))
    }

    async fn restore_from_history(&self, history_id: i64, user_id: i32) -> Result<(), RepositoryError> {
        let entry = self.history_entry(history_id).await?;
        // Snapshot must still parse.
        WebserviceConfigData::from_yaml(&entry.config)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"UPDATE gi_webservice_config
               SET config = $1, config_digest = $2, change_time = NOW(), change_by = $3
               WHERE id = $4"#,
        )
        .bind(&entry.config)
        .bind(&entry.config_digest)
        .bind(user_id)
        .bind(entry.config_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "webservice id {}",
                entry.config_id
            )));
        }

        insert_history(&mut tx, entry.config_id, &entry.config, &entry.config_digest, user_id)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Snapshot a config unless the same digest is already recorded for it.
async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    config_id: i32,
    yaml: &str,
    digest: &str,
    user_id: i32,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"INSERT INTO gi_webservice_config_history
               (config_id, config, config_digest, create_time, create_by, change_time, change_by)
           VALUES ($1, $2, $3, NOW(), $4, NOW(), $4)
           ON CONFLICT (config_id, config_digest) DO NOTHING"#,
    )
    .bind(config_id)
    .bind(yaml)
    .bind(digest)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn name_conflict(err: sqlx::Error, name: &str) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::NameTaken(name.to_string())
        }
        _ => RepositoryError::Database(err),
    }
}

// -- Row Types --

#[derive(Debug, sqlx::FromRow)]
struct WebserviceRow {
    id: i32,
    name: String,
    config: String,
    valid_id: i32,
    create_time: DateTime<Utc>,
    create_by: i32,
    change_time: DateTime<Utc>,
    change_by: i32,
}

impl TryFrom<WebserviceRow> for WebserviceConfig {
    type Error = RepositoryError;

    fn try_from(row: WebserviceRow) -> Result<Self, Self::Error> {
        Ok(WebserviceConfig {
            id: row.id,
            name: row.name,
            config: WebserviceConfigData::from_yaml(&row.config)?,
            valid_id: row.valid_id,
            create_time: row.create_time,
            create_by: row.create_by,
            change_time: row.change_time,
            change_by: row.change_by,
        })
    }
}
