//! Shared application state for all routes.

use crate::client::DataAccess;
use crate::connection::{Connector, PgConnector};
use crate::lifecycle::LifecycleManager;

pub struct AppState<C: Connector = PgConnector> {
    pub data: DataAccess<C>,
    pub lifecycle: LifecycleManager<C>,
}

impl<C: Connector> AppState<C> {
    pub fn new(data: DataAccess<C>) -> Self {
        AppState {
            lifecycle: LifecycleManager::new(data.clone()),
            data,
        }
    }
}

impl<C: Connector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        AppState {
            data: self.data.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}
