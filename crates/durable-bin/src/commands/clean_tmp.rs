use std::path::PathBuf;

use anyhow::Context;
use durable_fs::{DirFs, SafeWriteOptions};

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The directory the temporary files were written in
    root: PathBuf,
}

pub fn clean_tmp(opt: Opt, options: &SafeWriteOptions) -> anyhow::Result<()> {
    options
        .clean_tmp(&DirFs::new(&opt.root))
        .with_context(|| format!("failed to clean '{}'", opt.root.display()))
}
