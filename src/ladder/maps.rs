//! Random map order for a freshly paired match

use rand::seq::SliceRandom;
use rand::Rng;
use sqlx::SqliteConnection;
use tracing::warn;

use crate::error::Result;
use crate::store::map_sets;
use crate::types::GameMode;

/// Draw `mode.map_count()` distinct maps from `pool` in random order.
///
/// A pool with fewer distinct maps than needed yields all of them, shuffled.
pub fn assign_maps<R: Rng + ?Sized>(pool: &[String], mode: GameMode, rng: &mut R) -> Vec<String> {
    let mut distinct: Vec<String> = Vec::with_capacity(pool.len());
    for map in pool {
        if !distinct.contains(map) {
            distinct.push(map.clone());
        }
    }
    distinct.shuffle(rng);
    distinct.truncate(mode.map_count());
    distinct
}

/// Assign maps from the latest map set for `mode`; empty when none is configured
pub async fn assign_for_mode(mode: GameMode, conn: &mut SqliteConnection) -> Result<Vec<String>> {
    match map_sets::fetch_latest_map_set(mode, conn).await? {
        Some(set) => Ok(assign_maps(&set.maps, mode, &mut rand::thread_rng())),
        None => {
            warn!("No map set configured for {}; pairing without maps", mode);
            Ok(Vec::new())
        }
    }
}
