//! Pending registration maintenance.
//!
//! Registrations that never see a matching customer login are kept until
//! pruned here.

use chrono::{Duration, Utc};
use ec_relate_storefront::db::{PendingUserRepository, PgPendingUserRepository};

use super::{CommandError, connect};

/// Delete unused pending registrations older than `older_than_days`.
///
/// Returns the number of records removed.
pub async fn prune(older_than_days: u32) -> Result<u64, CommandError> {
    if older_than_days == 0 {
        return Err(CommandError::InvalidArgument(
            "--older-than-days must be at least 1".to_string(),
        ));
    }
    let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));

    let pool = connect().await?;
    let removed = PgPendingUserRepository::new(pool)
        .prune_unused_before(cutoff)
        .await?;

    tracing::info!(removed, %cutoff, "Pruned unused pending registrations");
    Ok(removed)
}
