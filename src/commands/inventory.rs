use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::InventoryArgs;
use crate::model::{PdfEntry, PdfInventoryManifest};
use crate::util::{now_utc_string, sha256_file, write_json_pretty};

/// Folders scanned when no `--materials-root` is given.
const DEFAULT_MATERIALS_ROOTS: &[&str] = &["materials/Slides", "materials/TextBook"];

pub fn run(args: InventoryArgs) -> Result<()> {
    let roots = resolve_materials_roots(&args.materials_roots);
    let manifest = build_manifest(&roots)?;

    if args.dry_run {
        info!(pdf_count = manifest.pdf_count, "inventory dry-run complete");
        return Ok(());
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| PathBuf::from("data/manifests/pdf_inventory.json"));

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(pdf_count = manifest.pdf_count, "inventory completed");

    Ok(())
}

pub fn resolve_materials_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    if roots.is_empty() {
        DEFAULT_MATERIALS_ROOTS.iter().map(PathBuf::from).collect()
    } else {
        roots.to_vec()
    }
}

/// Discover and hash every PDF under the given roots. Roots that do not
/// exist are skipped with a warning; an entirely empty result is an error.
pub fn build_manifest(roots: &[PathBuf]) -> Result<PdfInventoryManifest> {
    let mut pdfs = Vec::new();

    for root in roots {
        if !root.exists() {
            warn!(root = %root.display(), "materials root missing, skipping");
            continue;
        }

        let mut paths = discover_pdfs(root)?;
        paths.sort();

        for path in paths {
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(ToOwned::to_owned)
                .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;

            let size_bytes = fs::metadata(&path)
                .with_context(|| format!("failed to stat {}", path.display()))?
                .len();
            let sha256 = sha256_file(&path)?;

            pdfs.push(PdfEntry {
                filename,
                root: root.display().to_string(),
                size_bytes,
                sha256,
            });
        }
    }

    if pdfs.is_empty() {
        bail!("no PDFs found under any materials root");
    }

    Ok(PdfInventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_roots: roots.iter().map(|root| root.display().to_string()).collect(),
        pdf_count: pdfs.len(),
        pdfs,
    })
}

fn discover_pdfs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();

    let entries =
        fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", root.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);

        if is_pdf {
            pdfs.push(path);
        }
    }

    Ok(pdfs)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn discovers_and_hashes_pdfs_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Slides");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("week2.pdf"), b"%PDF-two").unwrap();
        fs::write(root.join("week1.pdf"), b"%PDF-one").unwrap();
        fs::write(root.join("notes.txt"), b"not a pdf").unwrap();

        let manifest = build_manifest(&[root]).unwrap();

        assert_eq!(manifest.pdf_count, 2);
        assert_eq!(manifest.pdfs[0].filename, "week1.pdf");
        assert_eq!(manifest.pdfs[1].filename, "week2.pdf");
        assert_eq!(manifest.pdfs[0].sha256.len(), 64);
        assert_ne!(manifest.pdfs[0].sha256, manifest.pdfs[1].sha256);
    }

    #[test]
    fn missing_roots_are_skipped_but_empty_inventory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        assert!(build_manifest(&[missing]).is_err());
    }
}
