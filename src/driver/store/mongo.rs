use bson::{doc, Document};
use futures::{StreamExt, TryStreamExt};
use mongodb::options::FindOptions as MongoFindOptions;
use mongodb::Client;

use super::{DocumentStore, DocumentStream, FindOptions};
use crate::error::{DriverError, DriverResult};

/// [`DocumentStore`] backed by a MongoDB deployment.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect(uri: &str) -> DriverResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait::async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> DriverResult<()> {
        self.client
            .database("admin")
            .run_command(doc! {"ping": 1}, None)
            .await?;
        Ok(())
    }

    async fn list_collections(&self, database: &str) -> DriverResult<Vec<String>> {
        let mut names = self
            .client
            .database(database)
            .list_collection_names(None)
            .await?;
        names.sort();
        Ok(names)
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DriverResult<DocumentStream> {
        let opts = MongoFindOptions::builder()
            .limit(options.limit)
            .skip(options.skip)
            .sort(options.sort)
            .projection(options.projection)
            .build();
        let cursor = self
            .client
            .database(database)
            .collection::<Document>(collection)
            .find(filter, opts)
            .await?;
        Ok(cursor.map_err(DriverError::from).boxed())
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DriverResult<DocumentStream> {
        let cursor = self
            .client
            .database(database)
            .collection::<Document>(collection)
            .aggregate(pipeline, None)
            .await?;
        Ok(cursor.map_err(DriverError::from).boxed())
    }

    async fn sample(
        &self,
        database: &str,
        collection: &str,
        size: usize,
    ) -> DriverResult<Vec<Document>> {
        let opts = MongoFindOptions::builder()
            .limit(i64::try_from(size).unwrap_or(i64::MAX))
            .build();
        let cursor = self
            .client
            .database(database)
            .collection::<Document>(collection)
            .find(None, opts)
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs)
    }
}
