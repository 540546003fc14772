//! CPV dictionary service: cached tree reads and CSV imports

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use sqlx::PgPool;

use super::cache::{keys, RedisCache};
use crate::domain::cpv::{build_cpv_tree, CpvEntry, CpvImportRecord, CpvImportRow, CpvNode};

/// Tree built from one dictionary version
struct Memo {
    version: i64,
    tree: Arc<Vec<CpvNode>>,
}

/// Tree cache: Redis when configured, otherwise an in-process memo
///
/// The memo is keyed by the dictionary version that `import` bumps, so an
/// import run from another process is picked up on the next read.
#[derive(Clone)]
pub struct CpvTreeCache {
    redis: Option<RedisCache>,
    memo: Arc<RwLock<Option<Memo>>>,
}

impl CpvTreeCache {
    pub fn new(redis: Option<RedisCache>) -> Self {
        Self {
            redis,
            memo: Arc::default(),
        }
    }

    pub fn redis(&self) -> Option<&RedisCache> {
        self.redis.as_ref()
    }

    /// Cached tree, building it from the database on a miss
    pub async fn tree(&self, db: &PgPool) -> Result<Arc<Vec<CpvNode>>> {
        match &self.redis {
            Some(redis) => {
                if let Some(tree) = redis.get::<Vec<CpvNode>>(keys::CPV_TREE).await {
                    return Ok(Arc::new(tree));
                }
                let tree = load_tree(db).await?;
                if let Err(e) = redis.set(keys::CPV_TREE, &tree).await {
                    tracing::warn!(error = %e, "Failed to cache CPV tree");
                }
                Ok(Arc::new(tree))
            }
            None => {
                let version = dictionary_version(db).await?;
                if let Some(tree) = self.memoized(version) {
                    return Ok(tree);
                }
                let tree = Arc::new(load_tree(db).await?);
                self.remember(version, tree.clone());
                Ok(tree)
            }
        }
    }

    /// Memoized tree if it was built from `version`
    fn memoized(&self, version: i64) -> Option<Arc<Vec<CpvNode>>> {
        self.memo
            .read()
            .as_ref()
            .filter(|memo| memo.version == version)
            .map(|memo| memo.tree.clone())
    }

    fn remember(&self, version: i64, tree: Arc<Vec<CpvNode>>) {
        *self.memo.write() = Some(Memo { version, tree });
    }

    pub async fn invalidate(&self) {
        *self.memo.write() = None;
        if let Some(redis) = &self.redis {
            if let Err(e) = redis.delete(keys::CPV_TREE).await {
                tracing::warn!(error = %e, "Failed to invalidate CPV tree cache");
            }
        }
    }
}

async fn dictionary_version(db: &PgPool) -> Result<i64> {
    let version = sqlx::query_scalar::<_, i64>("SELECT version FROM cpv_dictionary_version")
        .fetch_optional(db)
        .await
        .context("Failed to read CPV dictionary version")?;
    Ok(version.unwrap_or_default())
}

async fn load_tree(db: &PgPool) -> Result<Vec<CpvNode>> {
    let entries = sqlx::query_as::<_, CpvEntry>(
        r#"
        SELECT id, cpv_code, cpv_level_code, cpv_parent_code, name_ua, name_en
        FROM cpv_dictionary
        ORDER BY cpv_code
        "#,
    )
    .fetch_all(db)
    .await
    .context("Failed to load CPV dictionary")?;

    tracing::debug!(entries = entries.len(), "Building CPV tree");
    Ok(build_cpv_tree(entries))
}

/// Parse a CSV export; rows without an eight-digit code are skipped
pub fn read_csv(path: &Path) -> Result<Vec<CpvImportRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in reader.deserialize::<CpvImportRecord>() {
        let record = record.context("Malformed CPV row")?;
        match record.into_row() {
            Some(row) => rows.push(row),
            None => skipped += 1,
        }
    }

    // Later duplicates replace earlier ones
    rows.reverse();
    let mut seen = std::collections::HashSet::new();
    rows.retain(|r| seen.insert(r.cpv_code.clone()));
    rows.reverse();

    if skipped > 0 {
        tracing::warn!(skipped, "Skipped CPV rows without a valid code");
    }
    Ok(rows)
}

/// Replace the dictionary with `rows`, keeping ids of codes that survive
pub async fn import(db: &PgPool, rows: &[CpvImportRow]) -> Result<u64> {
    let mut tx = db.begin().await?;

    let codes: Vec<String> = rows.iter().map(|r| r.cpv_code.clone()).collect();
    let removed = sqlx::query("DELETE FROM cpv_dictionary WHERE NOT (cpv_code = ANY($1))")
        .bind(&codes)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let mut written = 0u64;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO cpv_dictionary (cpv_code, cpv_level_code, cpv_parent_code, name_ua, name_en)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (cpv_code) DO UPDATE
            SET cpv_level_code = EXCLUDED.cpv_level_code,
                cpv_parent_code = EXCLUDED.cpv_parent_code,
                name_ua = EXCLUDED.name_ua,
                name_en = EXCLUDED.name_en
            "#,
        )
        .bind(&row.cpv_code)
        .bind(&row.cpv_level_code)
        .bind(&row.cpv_parent_code)
        .bind(&row.name_ua)
        .bind(&row.name_en)
        .execute(&mut *tx)
        .await?;
        written += 1;
    }

    let version = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE cpv_dictionary_version SET version = version + 1, updated_at = NOW()
        RETURNING version
        "#,
    )
    .fetch_one(&mut *tx)
    .await
    .context("Failed to bump CPV dictionary version")?;

    tx.commit().await?;

    tracing::info!(written, removed, version, "CPV dictionary imported");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn csv_rows_are_normalized_and_deduplicated() {
        let path = std::env::temp_dir().join(format!("cpv-{}.csv", uuid::Uuid::new_v4()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "code,name_ua,name_en").unwrap();
            writeln!(file, "03000000-1,Сільськогосподарська продукція,Agricultural products").unwrap();
            writeln!(file, "03110000-5, Культури ,Crops").unwrap();
            writeln!(file, "bad,Зламаний,Broken").unwrap();
            writeln!(file, "03110000-5,Культури оновлені,Crops").unwrap();
        }

        let rows = read_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cpv_code, "03000000");
        assert_eq!(rows[0].cpv_parent_code, "0");
        assert_eq!(rows[1].cpv_level_code, "0311");
        assert_eq!(rows[1].name_ua, "Культури оновлені");
    }

    #[tokio::test]
    async fn memo_is_cleared_on_invalidate() {
        let cache = CpvTreeCache::new(None);
        cache.remember(1, Arc::new(Vec::new()));

        cache.invalidate().await;
        assert!(cache.memo.read().is_none());
        assert!(cache.redis().is_none());
    }

    #[tokio::test]
    async fn import_from_another_process_stales_the_memo() {
        let server = CpvTreeCache::new(None);
        server.remember(3, Arc::new(Vec::new()));
        assert!(server.memoized(3).is_some());

        // The CLI clears only its own cache; the bumped version is what the server sees
        CpvTreeCache::new(None).invalidate().await;
        assert!(server.memoized(3).is_some());
        assert!(server.memoized(4).is_none());
    }
}
