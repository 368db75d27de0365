use std::{io::Write, path::PathBuf};

use anyhow::Context;
use durable_stream::{sized_readers_from_files, SegmentedReader};

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The chunk files, in order
    #[clap(required = true)]
    chunks: Vec<PathBuf>,
}

/// Streams the chunks as one. The size of every chunk is taken when it is opened, a chunk that
/// changes size while it is read fails the command.
pub fn cat(opt: Opt) -> anyhow::Result<()> {
    let segments = sized_readers_from_files(&opt.chunks).context("failed to open the chunks")?;
    let mut reader = SegmentedReader::new(segments);

    let mut stdout = std::io::stdout().lock();
    std::io::copy(&mut reader, &mut stdout).context("failed to read the chunks")?;
    stdout.flush()?;

    reader.close().context("failed to close the chunks")?;
    Ok(())
}
