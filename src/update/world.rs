use std::collections::HashMap;
use std::future::Future;

use crate::error::TickError;
use crate::model::Town;

/// Map authority: which town, if any, sits on a tile.
pub trait TownLookup: Send + Sync {
    fn lookup_town(
        &self,
        x: i32,
        y: i32,
    ) -> impl Future<Output = Result<Option<Town>, TickError>> + Send;
}

/// Fixed tile-to-owner table.
#[derive(Debug, Clone, Default)]
pub struct StaticWorld {
    towns: HashMap<(i32, i32), String>,
}

impl StaticWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_town(mut self, x: i32, y: i32, owner_user_id: impl Into<String>) -> Self {
        self.towns.insert((x, y), owner_user_id.into());
        self
    }
}

impl TownLookup for StaticWorld {
    async fn lookup_town(&self, x: i32, y: i32) -> Result<Option<Town>, TickError> {
        Ok(self.towns.get(&(x, y)).map(|owner| Town {
            owner_user_id: owner.clone(),
        }))
    }
}
