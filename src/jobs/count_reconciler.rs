use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::infra::db::Db;

const ERROR_BACKOFF_MS: u64 = 1000;

/// Rewrites `likes_count` and `comments_count` on the newest `batch_size`
/// posts wherever they drifted from the likes and comments tables.
/// Returns the number of rows corrected.
pub async fn reconcile_batch(db: &Db, batch_size: i64) -> Result<u64> {
    let result = sqlx::query(
        "WITH recent AS ( \
            SELECT id FROM posts ORDER BY created_at DESC, id DESC LIMIT $1 \
         ), actual AS ( \
            SELECT r.id, \
                   (SELECT COUNT(*) FROM likes l WHERE l.post_id = r.id) AS likes_count, \
                   (SELECT COUNT(*) FROM comments c WHERE c.post_id = r.id) AS comments_count \
            FROM recent r \
         ) \
         UPDATE posts p \
         SET likes_count = a.likes_count, comments_count = a.comments_count \
         FROM actual a \
         WHERE p.id = a.id \
           AND (p.likes_count <> a.likes_count OR p.comments_count <> a.comments_count)",
    )
    .bind(batch_size)
    .execute(db.pool())
    .await?;

    Ok(result.rows_affected())
}

pub async fn run(db: Db, interval_seconds: u64, batch_size: i64) -> Result<()> {
    info!(interval_seconds, batch_size, "count reconciler started");
    let interval = Duration::from_secs(interval_seconds.max(1));
    loop {
        match reconcile_batch(&db, batch_size).await {
            Ok(0) => {}
            Ok(corrected) => {
                info!(corrected, "corrected drifted post counts");
            }
            Err(err) => {
                warn!(error = ?err, "count reconciliation failed, backing off");
                tokio::time::sleep(Duration::from_millis(ERROR_BACKOFF_MS)).await;
                continue;
            }
        }
        tokio::time::sleep(interval).await;
    }
}
