#![deny(unsafe_code)]

mod pak;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pak::backend::{backend, BackendKind};
use pak::{PakError, PakResult, PackagingJob};

#[derive(Debug, Parser)]
#[command(
    name = "respak",
    version,
    about = "Pack a directory or an archive into an executable's resources"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store SOURCE (a directory, or a .cab/.zip archive) in TARGET.
    Pack {
        /// Directory to package, or an archive to store as-is.
        source: PathBuf,
        /// Executable that receives the resources.
        target: PathBuf,
        /// Archive the directory first and store it as a single resource.
        #[arg(long, default_value_t = false)]
        classic: bool,
        /// Product GUID to embed. Not supported; rejected when given.
        #[arg(long)]
        guid: Option<String>,
        /// Where to copy the target before updating it [default: TARGET.orig].
        #[arg(long)]
        backup: Option<PathBuf>,
        /// Remove every existing payload resource before packing. Other
        /// resources of the target are kept.
        #[arg(long, default_value_t = false)]
        delete_existing: bool,
        /// Compression workers [default: number of CPUs].
        #[arg(long, short = 'j', env = "RESPACK_JOBS")]
        jobs: Option<usize>,
        /// Gzip level.
        #[arg(long, default_value_t = 9, value_parser = clap::value_parser!(u32).range(0..=9))]
        level: u32,
        #[arg(long, value_enum, env = "RESPACK_BACKEND", default_value_t = BackendKind::default())]
        backend: BackendKind,
    },

    /// List the files packaged in TARGET.
    List {
        target: PathBuf,
        /// Print packed and raw sizes too.
        #[arg(long, default_value_t = false)]
        verbose: bool,
        #[arg(long, value_enum, env = "RESPACK_BACKEND", default_value_t = BackendKind::default())]
        backend: BackendKind,
    },

    /// Write the packaged files of TARGET under OUTPUT.
    Extract {
        target: PathBuf,
        output: PathBuf,
        #[arg(long, value_enum, env = "RESPACK_BACKEND", default_value_t = BackendKind::default())]
        backend: BackendKind,
    },

    /// Check that every listed file is stored and decompresses.
    Verify {
        target: PathBuf,
        #[arg(long, value_enum, env = "RESPACK_BACKEND", default_value_t = BackendKind::default())]
        backend: BackendKind,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("RESPACK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cmd: Command) -> PakResult<()> {
    match cmd {
        Command::Pack {
            source,
            target,
            classic,
            guid,
            backup,
            delete_existing,
            jobs,
            level,
            backend: kind,
        } => {
            if guid.is_some() {
                return Err(PakError::usage("writing a product GUID is not supported"));
            }
            let mut job = PackagingJob::new(source, target);
            job.classic = classic;
            job.delete_existing = delete_existing;
            job.level = level;
            if let Some(backup) = backup {
                job.backup = backup;
            }
            if let Some(jobs) = jobs {
                job.jobs = jobs.max(1);
            }

            let report = pak::pack(&job, backend(kind)?.as_ref())?;
            println!(
                "packed {} file(s) into {} resource(s): {} -> {} bytes",
                report.files, report.resources, report.raw_bytes, report.packed_bytes
            );
            println!("backup: {}", job.backup.display());
            Ok(())
        }
        Command::List {
            target,
            verbose,
            backend: kind,
        } => pak::list(&target, backend(kind)?.as_ref(), verbose),
        Command::Extract {
            target,
            output,
            backend: kind,
        } => {
            let n = pak::extract(&target, &output, backend(kind)?.as_ref())?;
            println!("extracted {n} file(s) to {}", output.display());
            Ok(())
        }
        Command::Verify {
            target,
            backend: kind,
        } => {
            let n = pak::verify(&target, backend(kind)?.as_ref())?;
            println!("ok: {n} entries");
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    if let Err(e) = run(cli.cmd) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn pack_defaults() {
        let cli = Cli::try_parse_from(["respak", "pack", "assets", "app.exe"]).unwrap();
        match cli.cmd {
            Command::Pack {
                source,
                target,
                classic,
                guid,
                backup,
                level,
                ..
            } => {
                assert_eq!(source, PathBuf::from("assets"));
                assert_eq!(target, PathBuf::from("app.exe"));
                assert!(!classic);
                assert!(guid.is_none());
                assert!(backup.is_none());
                assert_eq!(level, 9);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn level_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["respak", "pack", "a", "b", "--level", "10"]).is_err());
    }

    #[test]
    fn guid_is_a_usage_error() {
        let cli = Cli::try_parse_from(["respak", "pack", "a", "b.exe", "--guid", "{0}"]).unwrap();
        let err = run(cli.cmd).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn backend_is_selectable() {
        let cli = Cli::try_parse_from(["respak", "verify", "app.exe", "--backend", "overlay"]).unwrap();
        match cli.cmd {
            Command::Verify { backend, .. } => assert_eq!(backend, BackendKind::Overlay),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
