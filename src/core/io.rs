use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{ImageFormat, RgbaImage};
use log::info;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path))?;
        Ok(())
    }
}

/// Destination for finished comic images (the "download" step).
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn save(&self, artifact: &RgbaImage, filename: &str) -> Result<()>;
}

/// Writes artifacts as PNG files into a folder through [`Storage`].
pub struct FolderSink {
    folder: String,
    storage: Arc<dyn Storage>,
}

impl FolderSink {
    pub fn new(folder: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            folder: folder.into(),
            storage,
        }
    }

    pub fn path_for(&self, filename: &str) -> String {
        Path::new(&self.folder)
            .join(filename)
            .to_string_lossy()
            .to_string()
    }
}

pub fn encode_png(artifact: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    artifact
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(buf)
}

#[async_trait]
impl ArtifactSink for FolderSink {
    async fn save(&self, artifact: &RgbaImage, filename: &str) -> Result<()> {
        let png = encode_png(artifact)?;
        let path = self.path_for(filename);
        self.storage.write(&path, &png).await?;
        info!("Saved {} ({}x{})", path, artifact.width(), artifact.height());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_native_storage_creates_parent_dirs() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("nested").join("file.bin");
        let path_str = path.to_str().unwrap();

        let storage = NativeStorage::new();
        assert!(storage.read(path_str).await.is_err());
        storage.write(path_str, b"abc").await?;
        assert_eq!(storage.read(path_str).await?, b"abc");
        Ok(())
    }

    #[tokio::test]
    async fn test_folder_sink_writes_decodable_png() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let folder = temp_dir.path().join("out");
        let sink = FolderSink::new(folder.to_string_lossy(), Arc::new(NativeStorage::new()));

        let artifact = RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        sink.save(&artifact, "comic_2x2.png").await?;

        let bytes = std::fs::read(folder.join("comic_2x2.png"))?;
        let decoded = image::load_from_memory(&bytes)?.to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0), &image::Rgba([10, 20, 30, 255]));
        Ok(())
    }
}
