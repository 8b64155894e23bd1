use futures::{Stream, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, warn};

pub const MEDIA_EXTENSIONS: [&str; 2] = ["mp4", "flv"];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Whether `path` names a streamable video by extension and guessed type.
pub fn is_media_file(path: &Path) -> bool {
    let known_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MEDIA_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)));

    known_extension
        && mime_guess::from_path(path)
            .first()
            .is_some_and(|mime| mime.type_() == mime_guess::mime::VIDEO)
}

/// Validate an upload file name with basic rules
pub fn validate_filename(name: &str) -> Result<(), &'static str> {
    if name.is_empty() || name.len() > 255 {
        return Err("File name must be between 1 and 255 bytes");
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err("File name cannot contain path separators");
    }
    if !is_media_file(Path::new(name)) {
        return Err("Only .mp4 and .flv files are accepted");
    }
    Ok(())
}

/// Stream `body` into `dir/name`. The partial file is removed on failure.
pub async fn save_upload<S, B, E>(
    dir: &Path,
    name: &str,
    mut body: S,
) -> anyhow::Result<(PathBuf, u64)>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let path = dir.join(name);
    let mut file = tokio::fs::File::create(&path).await?;

    let mut written = 0u64;
    let result: anyhow::Result<()> = async {
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(chunk.as_ref()).await?;
            written += chunk.as_ref().len() as u64;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(error) = result {
        warn!(?path, ?error, "Upload failed, removing partial file");
        drop(file);
        _ = tokio::fs::remove_file(&path).await;
        return Err(error);
    }

    debug!(?path, written, "Upload stored");
    Ok((path, written))
}

/// Media files directly inside each of `dirs`, sorted by name. A directory
/// given twice, under any path, is scanned once.
pub async fn list_media(dirs: &[&Path]) -> Vec<MediaFile> {
    let mut files = Vec::new();
    let mut scanned = HashSet::new();

    for dir in dirs {
        let canonical = tokio::fs::canonicalize(dir)
            .await
            .unwrap_or_else(|_| dir.to_path_buf());
        if !scanned.insert(canonical) {
            debug!(?dir, "Media directory already scanned");
            continue;
        }

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(error) => {
                debug!(?dir, ?error, "Skipping media directory");
                continue;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !is_media_file(&path) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            files.push(MediaFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size_bytes: metadata.len(),
            });
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    files
}
