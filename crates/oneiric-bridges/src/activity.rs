use std::sync::Arc;

use oneiric_domain::{ActivityState, Domain, Key};
use oneiric_store::RuntimeStore;

use crate::error::BridgeError;

/// Every bridge consults the activity store before doing work: paused and
/// draining slots reject with a typed error.
pub async fn check_activity(
    store: &Arc<dyn RuntimeStore>,
    domain: Domain,
    key: &Key,
) -> Result<(), BridgeError> {
    match store.get_activity(domain, key).await?.map(|r| r.state) {
        Some(ActivityState::Paused) => Err(BridgeError::Paused { domain, key: key.clone() }),
        Some(ActivityState::Draining) => Err(BridgeError::Draining { domain, key: key.clone() }),
        _ => Ok(()),
    }
}
