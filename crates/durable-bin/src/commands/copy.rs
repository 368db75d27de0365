use std::path::PathBuf;

use anyhow::Context;
use durable_fs::{copy_fs, DirFs, SafeWriteOptions};

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The directory to copy
    source: PathBuf,

    /// The directory to copy into
    destination: PathBuf,

    /// Stage the copy in a temporary directory and rename it into place. The destination must
    /// not be a non-empty directory.
    #[clap(long)]
    atomic: bool,

    /// The permission bits of the destination directory when copying atomically
    #[clap(long, default_value = "755", value_parser = super::parse_mode)]
    mode: u32,
}

pub fn copy(opt: Opt, options: &SafeWriteOptions) -> anyhow::Result<()> {
    let source = DirFs::new(&opt.source);

    if opt.atomic {
        let (fs, name) = super::split_destination(&opt.destination)?;
        options
            .safe_write_tree(&fs, &name, opt.mode, &source, &[])
            .with_context(|| format!("failed to write '{}'", opt.destination.display()))?;
    } else {
        copy_fs(&DirFs::new(&opt.destination), &source, options.copy_options()).with_context(
            || {
                format!(
                    "failed to copy '{}' to '{}'",
                    opt.source.display(),
                    opt.destination.display()
                )
            },
        )?;
    }

    tracing::info!(
        "copied '{}' to '{}'",
        opt.source.display(),
        opt.destination.display()
    );
    Ok(())
}
