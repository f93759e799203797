use std::fs;
use std::io;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use tracing::info;
use zip::ZipArchive;

use crate::error::CatalogError;

const DAX_STUDIO_URL: &str =
    "https://github.com/DaxStudio/DaxStudio/releases/download/v3.2.1/DaxStudio_3_2_1_portable.zip";

/// Make sure the DAX Studio portable tool is available under the configured
/// path, downloading and unpacking the release archive if it is not.
pub fn ensure_dax_studio(dscmd_path: &Utf8Path) -> Result<(), CatalogError> {
    if dscmd_path.as_std_path().exists() {
        info!(path = %dscmd_path, "dscmd already available");
        return Ok(());
    }

    let tool_dir = dscmd_path
        .parent()
        .ok_or_else(|| CatalogError::Filesystem(format!("no parent directory for {dscmd_path}")))?;
    fs::create_dir_all(tool_dir.as_std_path())
        .map_err(|err| CatalogError::Filesystem(err.to_string()))?;

    info!(url = DAX_STUDIO_URL, "downloading DAX Studio portable");
    let client = Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .map_err(|err| CatalogError::ApiHttp(err.to_string()))?;
    let response = client
        .get(DAX_STUDIO_URL)
        .send()
        .map_err(|err| CatalogError::ApiHttp(err.to_string()))?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "tool download failed".to_string());
        return Err(CatalogError::ApiStatus {
            status,
            endpoint: DAX_STUDIO_URL.to_string(),
            message,
        });
    }
    let bytes = response
        .bytes()
        .map_err(|err| CatalogError::ApiHttp(err.to_string()))?;

    extract_archive(&bytes, tool_dir)?;

    if !dscmd_path.as_std_path().exists() {
        return Err(CatalogError::MissingTool(format!(
            "{dscmd_path} still missing after unpacking the portable archive"
        )));
    }
    info!(path = %dscmd_path, "DAX Studio ready");
    Ok(())
}

fn extract_archive(bytes: &[u8], target_dir: &Utf8Path) -> Result<(), CatalogError> {
    let reader = io::Cursor::new(bytes);
    let mut archive =
        ZipArchive::new(reader).map_err(|err| CatalogError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.as_std_path().join(path),
            None => {
                return Err(CatalogError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    }
    Ok(())
}
