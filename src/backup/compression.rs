// Compressed bundle writer - streams artifacts into a single tar.gz

use crate::storage::{file_name, ArtifactWriter, StorageError, StorageProvider};
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::AsyncWriteExt;
use tracing::debug;

type BundleBuilder = tar::Builder<GzEncoder<Vec<u8>>>;

/// Write `artifacts` into a gzip-compressed tar archive at `bundle_path`.
///
/// Entries are named by their file name; names longer than the classic
/// 100-byte header field get GNU long-name records. Artifacts are added one
/// at a time and compressed output is flushed to the provider after each.
/// Returns the compressed size in bytes.
pub async fn write_bundle(
    provider: &dyn StorageProvider,
    bundle_path: &str,
    artifacts: &[String],
    level: u32,
) -> Result<u64, StorageError> {
    let mut writer = provider.create_write_stream(bundle_path).await?;
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::new(level.min(9))));
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;
    let mut written: u64 = 0;

    for path in artifacts {
        let data = provider.read_file(path).await?;

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, file_name(path), data.as_slice())?;

        written += drain(&mut builder, &mut writer).await?;
        debug!(bundle = %bundle_path, artifact = %path, size = data.len(), "Added artifact to bundle");
    }

    // Writes the end-of-archive blocks
    let tail = builder.into_inner()?.finish()?;
    writer.write_all(&tail).await?;
    written += tail.len() as u64;
    writer.shutdown().await?;

    Ok(written)
}

async fn drain(builder: &mut BundleBuilder, writer: &mut ArtifactWriter) -> Result<u64, StorageError> {
    let pending = std::mem::take(builder.get_mut().get_mut());
    if pending.is_empty() {
        return Ok(0);
    }
    writer.write_all(&pending).await?;
    Ok(pending.len() as u64)
}
