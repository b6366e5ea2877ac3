use std::sync::Arc;

use console::style;
use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::container_specs::BlobDescriptor;
use crate::errors::Result;

use super::{BlobStream, Registry};

pub const BYTES_IN_MB: u64 = 1024 * 1024;
pub const BYTES_IN_GB: u64 = BYTES_IN_MB * 1024;

pub fn size_to_string(size: u64) -> String {
    let gb = size / BYTES_IN_GB;
    let mb = size / BYTES_IN_MB;
    if gb > 0 {
        let gb_flt = (gb as f64) + ((mb % 1024) as f64) / 1024_f64;
        format!("{:.2} GB", gb_flt)
    } else if mb > 0 {
        format!("{} MB", mb)
    } else {
        format!("{} KB", size.div_ceil(1024))
    }
}

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ActionsTaken {
    pub already_present: usize,
    pub already_present_size: u64,

    pub uploaded_from_source_repository: usize,
    pub uploaded_from_source_repository_size: u64,
}

impl std::fmt::Display for ActionsTaken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lines = [
            format!(
                "Already present on destination:       {} entries, {}",
                self.already_present,
                size_to_string(self.already_present_size)
            ),
            format!(
                "Streamed from source to destination:  {} entries, {}",
                self.uploaded_from_source_repository,
                size_to_string(self.uploaded_from_source_repository_size)
            ),
        ];
        write!(f, "{}", lines.join("\n"))
    }
}

impl ActionsTaken {
    pub fn merge(&mut self, other: &ActionsTaken) {
        self.already_present += other.already_present;
        self.already_present_size += other.already_present_size;

        self.uploaded_from_source_repository += other.uploaded_from_source_repository;
        self.uploaded_from_source_repository_size += other.uploaded_from_source_repository_size;
    }

    pub fn already_present(blob: &BlobDescriptor) -> ActionsTaken {
        ActionsTaken {
            already_present: 1,
            already_present_size: blob.size,
            ..Default::default()
        }
    }

    pub fn uploaded_from_source_repository(bytes: u64) -> ActionsTaken {
        ActionsTaken {
            uploaded_from_source_repository: 1,
            uploaded_from_source_repository_size: bytes,
            ..Default::default()
        }
    }
}

fn styles() -> (ProgressStyle, ProgressStyle) {
    let message_style = ProgressStyle::with_template("{prefix:28} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let io_style = ProgressStyle::with_template(
        "{prefix:28} {msg:25} {bytes}/{total_bytes} {bar:40.green/yellow}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    (message_style, io_style)
}

/// Makes sure `blob` ends up in `destination`: skipped when the destination
/// already has the digest, otherwise the source download is piped straight
/// into a destination upload.
pub async fn ensure_present(
    blob: &BlobDescriptor,
    source: Arc<dyn Registry>,
    destination: Arc<dyn Registry>,
    mp: Arc<MultiProgress>,
) -> Result<ActionsTaken> {
    let (message_style, io_style) = styles();

    let message_pb = ProgressBar::new(1);
    message_pb.set_style(message_style);
    let pb = mp.add(message_pb);
    pb.set_prefix(blob.label());

    let result = transfer(blob, source, destination, &pb, io_style).await;
    match &result {
        Ok(_) => pb.finish_with_message(format!("{}", style("✔").green())),
        Err(e) => pb.abandon_with_message(format!("{} {}", style("x").red(), e)),
    }
    result
}

async fn transfer(
    blob: &BlobDescriptor,
    source: Arc<dyn Registry>,
    destination: Arc<dyn Registry>,
    pb: &ProgressBar,
    io_style: ProgressStyle,
) -> Result<ActionsTaken> {
    pb.set_message("Checking destination presence");
    if destination.blob_exists(&blob.digest).await? {
        tracing::debug!("{} {} already exists, skipping upload", blob.role, blob.digest);
        return Ok(ActionsTaken::already_present(blob));
    }

    pb.set_message("Streaming from source");
    pb.set_style(io_style);
    pb.set_length(blob.size);
    pb.set_position(0);

    let download = source.download_blob(blob).await?;
    let progress = pb.clone();
    let stream: BlobStream = Box::pin(download.inspect(move |chunk| {
        if let Ok(chunk) = chunk {
            progress.inc(chunk.len() as u64);
        }
    }));

    let bytes = destination.push_blob(blob, stream).await?;
    tracing::debug!(
        "Transferred {} {} ({})",
        blob.role,
        blob.digest,
        size_to_string(bytes)
    );
    Ok(ActionsTaken::uploaded_from_source_repository(bytes))
}
