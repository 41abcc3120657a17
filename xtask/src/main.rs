use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Parser modules staged under `parser/`
const PARSERS: &[&str] = &["sc_bpf", "sc_read"];

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        /// Register frame layout of the traced host
        #[arg(long, default_value = std::env::consts::ARCH)]
        arch: String,
        /// Where to stage the module bundle
        #[arg(long, default_value = "target/bstrace-modules")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target, arch, out } => {
            build_ebpf(&target, &arch)?;
            stage_bundle(&target, &out)?;
        }
    }

    Ok(())
}

fn build_ebpf(target: &str, arch: &str) -> Result<()> {
    // Always release: debug builds pull in formatting code the BPF linker rejects
    let mut cmd = Command::new("cargo");
    cmd.arg("+nightly")
        .arg("build")
        .arg("--package")
        .arg("bstrace-ebpf")
        .arg("--target")
        .arg(target)
        .arg("-Z")
        .arg("build-std=core")
        .arg("--release");

    match arch {
        "x86_64" => {}
        "aarch64" => {
            cmd.arg("--features").arg("aarch64");
        }
        other => anyhow::bail!("unsupported host architecture: {other}"),
    }

    let status = cmd.status().context("Failed to build eBPF modules")?;

    if !status.success() {
        anyhow::bail!("Failed to build eBPF modules");
    }

    println!("✓ eBPF modules built successfully");
    println!("  Target: {target}");
    println!("  Layout: {arch}");

    Ok(())
}

/// Copy the built objects into the bundle layout the loader expects:
/// `common/shared`, `tp/strace`, `parser/<name>`.
fn stage_bundle(target: &str, out: &Path) -> Result<()> {
    let built = Path::new("target").join(target).join("release");

    if out.exists() {
        fs::remove_dir_all(out).with_context(|| format!("Failed to clean {}", out.display()))?;
    }

    copy_module(&built, "shared", &out.join("common"))?;
    copy_module(&built, "strace", &out.join("tp"))?;
    for parser in PARSERS {
        copy_module(&built, parser, &out.join("parser"))?;
    }

    println!("✓ Module bundle staged at {}", out.display());

    Ok(())
}

fn copy_module(built: &Path, name: &str, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let from = built.join(name);
    fs::copy(&from, dir.join(name))
        .with_context(|| format!("Failed to stage module {}", from.display()))?;
    Ok(())
}
