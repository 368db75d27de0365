use std::path::PathBuf;

use anyhow::Context;
use durable_fs::{tee_hasher, SafeWriteOptions};
use sha2::Sha256;

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The file to write
    destination: PathBuf,

    /// The expected SHA-256 of the content, hex encoded. The file is left untouched if the
    /// content does not match.
    #[clap(long)]
    sha256: Option<String>,

    /// The permission bits of the file
    #[clap(long, default_value = "644", value_parser = super::parse_mode)]
    mode: u32,
}

pub fn write(opt: Opt, options: &SafeWriteOptions) -> anyhow::Result<()> {
    let (fs, name) = super::split_destination(&opt.destination)?;
    let stdin = std::io::stdin().lock();

    let result = match &opt.sha256 {
        Some(expected) => {
            let expected = hex::decode(expected).context("the checksum is not valid hex")?;
            let (reader, hook) = tee_hasher::<Sha256, _>(stdin, expected);
            options.safe_write(&fs, &name, opt.mode, reader, &[hook])
        }
        None => options.safe_write(&fs, &name, opt.mode, stdin, &[]),
    };
    result.with_context(|| format!("failed to write '{}'", opt.destination.display()))?;

    tracing::info!("wrote '{}'", opt.destination.display());
    Ok(())
}
