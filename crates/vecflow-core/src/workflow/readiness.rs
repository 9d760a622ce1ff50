//! Waiting for asynchronous index builds and collection loads

use crate::error::Error;
use crate::error::Result;
use crate::error_handling::Probe;
use crate::error_handling::RetryConfig;
use crate::error_handling::RetryExecutor;
use crate::schema::IndexState;
use crate::schema::LoadState;
use crate::storage::VectorStore;

/// Poll until the index on `collection.field` has finished building
pub async fn wait_for_index<S>(
    store: &S,
    collection: &str,
    field: &str,
    policy: &RetryConfig,
) -> Result<()>
where
    S: VectorStore + ?Sized,
{
    let what = format!("index on {}.{}", collection, field);
    RetryExecutor::new(policy.clone())
        .poll_until(&what, || async {
            match store.index_state(collection, field).await? {
                IndexState::Finished => Ok(Probe::Ready(())),
                IndexState::Failed(reason) => Err(Error::IndexBuildFailed(format!(
                    "{}.{}: {}",
                    collection, field, reason
                ))),
                IndexState::None => Ok(Probe::Pending("not created".to_string())),
                IndexState::Pending => Ok(Probe::Pending("pending".to_string())),
                IndexState::InProgress => Ok(Probe::Pending("in progress".to_string())),
            }
        })
        .await
}

/// Poll until `collection` is loaded into serving memory
pub async fn wait_for_load<S>(store: &S, collection: &str, policy: &RetryConfig) -> Result<()>
where
    S: VectorStore + ?Sized,
{
    let what = format!("load of {}", collection);
    RetryExecutor::new(policy.clone())
        .poll_until(&what, || async {
            match store.load_state(collection).await? {
                LoadState::Loaded => Ok(Probe::Ready(())),
                LoadState::Loading { progress } => {
                    Ok(Probe::Pending(format!("loading {}%", progress)))
                }
                LoadState::NotLoad => Ok(Probe::Pending("not loaded".to_string())),
                LoadState::NotExist => Err(Error::CollectionNotFound(collection.to_string())),
            }
        })
        .await
}
