use std::path::PathBuf;

use anyhow::Context;
use durable_fs::{DirFs, SafeWriteOptions};

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The tree that is checked
    destination: PathBuf,

    /// The tree it is compared against
    source: PathBuf,
}

/// Prints every difference and fails if there is at least one.
pub fn equal(opt: Opt, options: &SafeWriteOptions) -> anyhow::Result<()> {
    let report = durable_fs::equal(
        &DirFs::new(&opt.destination),
        &DirFs::new(&opt.source),
        options.copy_options(),
    )
    .context("failed to compare the trees")?;

    if report.is_equal() {
        println!("{report}");
        return Ok(());
    }

    for mismatch in &report.mismatches {
        println!("{mismatch}");
    }
    anyhow::bail!("found {} difference(s)", report.mismatches.len())
}
