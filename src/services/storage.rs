//! Local file storage for tender attachments under `MEDIA_ROOT`

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::domain::tenders::TenderKind;

const MAX_NAME_CHARS: usize = 120;

/// Keep letters, digits, `.`, `-` and `_`; everything else becomes `_`
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        return "file".to_string();
    }

    // Keep the extension when truncating
    if cleaned.chars().count() > MAX_NAME_CHARS {
        let ext: String = match cleaned.rsplit_once('.') {
            Some((_, ext)) if ext.chars().count() <= 10 => format!(".{ext}"),
            _ => String::new(),
        };
        let stem: String = cleaned.chars().take(MAX_NAME_CHARS - ext.chars().count()).collect();
        return format!("{stem}{ext}");
    }

    cleaned.to_string()
}

/// Path relative to the media root, always with `/` separators
pub fn attachment_path(kind: TenderKind, tender_id: Uuid, file_id: Uuid, original_name: &str) -> String {
    format!(
        "tenders/{}/{}/{}_{}",
        kind.as_str(),
        tender_id,
        file_id.simple(),
        sanitize_file_name(original_name)
    )
}

fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    let relative = Path::new(relative);
    if relative.is_absolute() || relative.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        anyhow::bail!("Refusing to touch path outside the media root: {}", relative.display());
    }
    Ok(root.join(relative))
}

pub async fn save(root: &Path, relative: &str, bytes: &[u8]) -> Result<()> {
    let path = resolve(root, relative)?;
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(bytes).await.context("Failed to write attachment")?;
    file.flush().await.context("Failed to flush attachment")?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Attachment stored");
    Ok(())
}

/// Remove a stored file; a file that is already gone is not an error
pub async fn remove(root: &Path, relative: &str) -> Result<()> {
    let path = resolve(root, relative)?;
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// [`remove`] for callers whose rows are already deleted; failures are logged
pub async fn discard(root: &Path, relative: &str) -> bool {
    match remove(root, relative).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, path = %relative, "Failed to remove tender attachment");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("Договір №5 (final).pdf"), "Договір__5__final_.pdf");
        assert_eq!(sanitize_file_name(".env"), "env");
        assert_eq!(sanitize_file_name(""), "file");

        let long = format!("{}.xlsx", "a".repeat(300));
        let cut = sanitize_file_name(&long);
        assert_eq!(cut.chars().count(), MAX_NAME_CHARS);
        assert!(cut.ends_with(".xlsx"));
    }

    #[test]
    fn attachment_paths_are_namespaced_by_kind_and_tender() {
        let tender = Uuid::new_v4();
        let file = Uuid::new_v4();
        let path = attachment_path(TenderKind::Sales, tender, file, "spec.pdf");
        assert_eq!(path, format!("tenders/sales/{tender}/{}_spec.pdf", file.simple()));
    }

    #[tokio::test]
    async fn save_and_remove_round_trip() {
        let root = std::env::temp_dir().join(format!("tenderhub-storage-{}", Uuid::new_v4()));
        let relative = "tenders/procurement/x/file.txt";

        save(&root, relative, b"hello").await.unwrap();
        assert_eq!(tokio::fs::read(root.join(relative)).await.unwrap(), b"hello");

        remove(&root, relative).await.unwrap();
        remove(&root, relative).await.unwrap();
        assert!(resolve(&root, "../outside").is_err());

        tokio::fs::remove_dir_all(&root).await.ok();
    }

    #[tokio::test]
    async fn discard_reports_failure_without_erroring() {
        let root = std::env::temp_dir().join(format!("tenderhub-discard-{}", Uuid::new_v4()));
        let relative = "tenders/sales/y/offer.pdf";
        save(&root, relative, b"offer").await.unwrap();

        assert!(discard(&root, relative).await);
        assert!(!root.join(relative).exists());
        assert!(discard(&root, relative).await);
        assert!(!discard(&root, "../escape.pdf").await);

        tokio::fs::remove_dir_all(&root).await.ok();
    }
}
