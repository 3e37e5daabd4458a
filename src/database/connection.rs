// database/connection.rs
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::database::transaction_store::COLLECTION_NAME;
use crate::errors::Result;
use crate::models::transaction::Transaction;

pub async fn get_db_client(config: &AppConfig) -> Result<Database> {
    let client = Client::with_uri_str(&config.database_url).await?;
    let db = client.database(&config.database_name);

    match db.list_collection_names().await {
        Ok(collections) => {
            info!("Connected to database: {}", config.database_name);
            if !collections.contains(&COLLECTION_NAME.to_string()) {
                info!("'{}' collection will be created on first write", COLLECTION_NAME);
            }
        }
        Err(e) => {
            warn!(
                "Database '{}' may not exist or is inaccessible: {}",
                config.database_name, e
            );
        }
    }

    Ok(db)
}

/// Unique sparse indexes on the correlation ids make duplicate initiation
/// attempts fail at the storage layer instead of silently overwriting.
pub async fn ensure_indexes(db: &Database) -> Result<()> {
    let collection = db.collection::<Transaction>(COLLECTION_NAME);

    let unique_sparse = IndexOptions::builder().unique(true).sparse(true).build();

    let indexes = vec![
        IndexModel::builder()
            .keys(doc! { "checkout_request_id": 1 })
            .options(unique_sparse.clone())
            .build(),
        IndexModel::builder()
            .keys(doc! { "merchant_request_id": 1 })
            .options(unique_sparse.clone())
            .build(),
        IndexModel::builder()
            .keys(doc! { "stripe_session_id": 1 })
            .options(unique_sparse)
            .build(),
        IndexModel::builder()
            .keys(doc! { "stripe_payment_intent_id": 1 })
            .options(IndexOptions::builder().sparse(true).build())
            .build(),
        IndexModel::builder()
            .keys(doc! { "customer.email": 1, "status": 1 })
            .build(),
        IndexModel::builder()
            .keys(doc! { "status": 1, "created_at": -1 })
            .build(),
    ];

    collection.create_indexes(indexes).await?;
    info!("Transaction indexes ensured");
    Ok(())
}
