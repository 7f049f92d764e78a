use log::info;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Database, IndexModel};

use crate::error::Result;
use crate::store::mongo::{NOTIFICATIONS_COLLECTION, TASKS_COLLECTION};

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> Result<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        info!("Connected to MongoDB database {}", db_name);
        Ok(MongoDB { client, db })
    }

    /// Create the indexes the stores rely on. Safe to run on every start.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let tasks = self.db.collection::<mongodb::bson::Document>(TASKS_COLLECTION);
        tasks
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "task_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        tasks
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "workspace_id": 1, "created_at": -1, "task_id": -1 })
                    .build(),
            )
            .await?;

        let queue = self.db.collection::<mongodb::bson::Document>(NOTIFICATIONS_COLLECTION);
        queue
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        queue
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "status": 1, "next_retry_at": 1, "created_at": 1 })
                    .build(),
            )
            .await?;
        queue
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "workspace_id": 1, "created_at": -1 })
                    .build(),
            )
            .await?;

        info!("MongoDB indexes ensured");
        Ok(())
    }
}
