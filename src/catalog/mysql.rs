use async_trait::async_trait;
use sea_query::{Expr, MysqlQueryBuilder, Order, Query};
use sea_query_binder::SqlxBinder;
use sqlx::mysql::{MySql, MySqlPoolOptions};
use sqlx::Pool;

use super::types::{
    CatalogImageRow, DataImage, DataImageRepository, ImageMetadata, ProJob, SyncDataImage,
};
use super::{ImageCatalog, METADATA_ONLINE, METADATA_SYNCED, OFFICIAL_REPO, PUBLISHED};
use crate::error::{MigratorError, Result};
use crate::image::ImageRef;
use crate::ledger::MigrationOutcome;

const MAX_CONNECTIONS: u32 = 20;
const ERRMSG_MAX_CHARS: usize = 128;

#[derive(Clone)]
pub struct MySqlCatalog {
    pool: Pool<MySql>,
    normal_status: i32,
}

impl MySqlCatalog {
    /// Connect and ping the catalog. An unreachable catalog is a selection error.
    pub async fn connect(dsn: &str, normal_status: i32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(dsn)
            .await
            .map_err(|e| MigratorError::Selection(format!("catalog unreachable: {}", e)))?;
        Ok(Self { pool, normal_status })
    }
}

fn truncate_errmsg(errmsg: Option<&str>) -> String {
    errmsg.unwrap_or_default().chars().take(ERRMSG_MAX_CHARS).collect()
}

#[async_trait]
impl ImageCatalog for MySqlCatalog {
    async fn job_image_ids(&self, start_time: &str, end_time: &str) -> Result<Vec<i64>> {
        let (sql, values) = Query::select()
            .distinct()
            .column(ProJob::ImageId)
            .from(ProJob::Table)
            .and_where(Expr::col(ProJob::CreateTime).gt(start_time))
            .and_where(Expr::col(ProJob::CreateTime).lt(end_time))
            .build_sqlx(MysqlQueryBuilder);

        let rows = sqlx::query_as_with::<_, (i64,), _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn official_image_ids(&self) -> Result<Vec<i64>> {
        let (sql, values) = Query::select()
            .column((DataImage::Table, DataImage::ImageId))
            .from(DataImage::Table)
            .inner_join(
                DataImageRepository::Table,
                Expr::col((DataImageRepository::Table, DataImageRepository::ImageRepositoryId))
                    .equals((DataImage::Table, DataImage::ImageRepositoryId)),
            )
            .and_where(
                Expr::col((DataImageRepository::Table, DataImageRepository::PublishStatus))
                    .eq(PUBLISHED),
            )
            .and_where(
                Expr::col((DataImageRepository::Table, DataImageRepository::IsOfficial))
                    .eq(OFFICIAL_REPO),
            )
            .and_where(Expr::col((DataImage::Table, DataImage::LibraStatus)).eq(self.normal_status))
            .build_sqlx(MysqlQueryBuilder);

        let rows = sqlx::query_as_with::<_, (i64,), _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn images_by_ids(&self, ids: &[i64]) -> Result<Vec<ImageRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (sql, values) = Query::select()
            .columns([
                DataImage::ImageId,
                DataImage::ImageName,
                DataImage::ImageTag,
                DataImage::ImageSize,
            ])
            .from(DataImage::Table)
            .and_where(Expr::col(DataImage::LibraStatus).eq(self.normal_status))
            .and_where(Expr::col(DataImage::ImageId).is_in(ids.iter().copied()))
            .order_by(DataImage::ImageId, Order::Asc)
            .build_sqlx(MysqlQueryBuilder);

        let rows = sqlx::query_as_with::<_, CatalogImageRow, _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let image = ImageRef::new(row.image_name, row.image_tag).with_id(row.image_id);
                match u64::try_from(row.image_size) {
                    Ok(size) => image.with_size(size),
                    Err(_) => image,
                }
            })
            .collect())
    }

    async fn record_outcome(&self, outcome: &MigrationOutcome) -> Result<()> {
        let (sql, values) = Query::insert()
            .into_table(SyncDataImage::Table)
            .columns([
                SyncDataImage::ImageId,
                SyncDataImage::ImageName,
                SyncDataImage::ImageTag,
                SyncDataImage::ImageSize,
                SyncDataImage::Status,
                SyncDataImage::Errmsg,
                SyncDataImage::CreateTime,
            ])
            .values([
                outcome.image_id.unwrap_or_default().into(),
                outcome.image_name.clone().into(),
                outcome.image_tag.clone().into(),
                (outcome.image_size.unwrap_or_default() as i64).into(),
                i32::from(outcome.status.code()).into(),
                truncate_errmsg(outcome.errmsg.as_deref()).into(),
                outcome.completed_at.naive_utc().into(),
            ])?
            .build_sqlx(MysqlQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(())
    }

    async fn publish_image_metadata(&self, outcome: &MigrationOutcome, az_id: &str) -> Result<()> {
        let (sql, values) = Query::insert()
            .into_table(ImageMetadata::Table)
            .columns([
                ImageMetadata::Name,
                ImageMetadata::Tag,
                ImageMetadata::Size,
                ImageMetadata::AzId,
                ImageMetadata::Status,
                ImageMetadata::SyncStatus,
            ])
            .values([
                outcome.image_name.clone().into(),
                outcome.image_tag.clone().into(),
                (outcome.image_size.unwrap_or_default() as i64).into(),
                az_id.into(),
                METADATA_ONLINE.into(),
                METADATA_SYNCED.into(),
            ])?
            .build_sqlx(MysqlQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errmsg_is_truncated_to_column_width() {
        let long = "x".repeat(300);
        assert_eq!(truncate_errmsg(Some(&long)).chars().count(), ERRMSG_MAX_CHARS);
        assert_eq!(truncate_errmsg(None), "");
    }

    #[test]
    fn test_job_window_query_shape() {
        let (sql, _) = Query::select()
            .distinct()
            .column(ProJob::ImageId)
            .from(ProJob::Table)
            .and_where(Expr::col(ProJob::CreateTime).gt("2023-01-01"))
            .and_where(Expr::col(ProJob::CreateTime).lt("2023-02-01"))
            .build(MysqlQueryBuilder);
        assert_eq!(
            sql,
            "SELECT DISTINCT `image_id` FROM `pro_job` WHERE `create_time` > ? AND `create_time` < ?"
        );
    }
}
