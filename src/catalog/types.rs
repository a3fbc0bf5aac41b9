use sea_query::Iden;

#[derive(Iden)]
pub enum ProJob {
    Table,
    ImageId,
    CreateTime,
}

#[derive(Iden)]
pub enum DataImage {
    Table,
    ImageId,
    ImageName,
    ImageTag,
    ImageSize,
    ImageRepositoryId,
    LibraStatus,
}

#[derive(Iden)]
pub enum DataImageRepository {
    Table,
    ImageRepositoryId,
    PublishStatus,
    IsOfficial,
}

#[derive(Iden)]
pub enum SyncDataImage {
    Table,
    ImageId,
    ImageName,
    ImageTag,
    ImageSize,
    Status,
    Errmsg,
    CreateTime,
}

#[derive(Iden)]
pub enum ImageMetadata {
    Table,
    Name,
    Tag,
    Size,
    AzId,
    Status,
    SyncStatus,
}

#[derive(Debug, sqlx::FromRow)]
pub struct CatalogImageRow {
    pub image_id: i64,
    pub image_name: String,
    pub image_tag: String,
    pub image_size: i64,
}
