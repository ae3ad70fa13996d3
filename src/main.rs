//! ocfl CLI - create, grow, inspect, and validate OCFL objects

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use walkdir::WalkDir;

use ocfl::{
    validate_object, Cancel, Config, DigestAlgorithm, Error, IoResultExt, Object, ObjectReader,
    User,
};

#[derive(Parser)]
#[command(name = "ocfl")]
#[command(about = "versioned, content-addressed object storage")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new object
    Init {
        /// directory to create the object at
        path: PathBuf,

        /// object identifier
        #[arg(long)]
        id: String,

        /// digest algorithm for content addressing
        #[arg(long, default_value = "sha512")]
        digest_algorithm: DigestAlgorithm,
    },

    /// commit a directory as the object's next version
    Commit {
        /// object root
        object: PathBuf,

        /// directory whose files become the new version state
        source: PathBuf,

        /// commit message
        #[arg(short, long, default_value = "")]
        message: String,

        /// committer name
        #[arg(long, default_value = "ocfl")]
        name: String,

        /// committer address
        #[arg(long, default_value = "")]
        address: String,
    },

    /// list versions, or the logical files of one version
    Ls {
        /// object root
        object: PathBuf,

        /// version to list files for (defaults to listing versions)
        #[arg(short, long)]
        version: Option<String>,
    },

    /// print a logical file from a version
    Cat {
        /// object root
        object: PathBuf,

        /// version name
        version: String,

        /// logical path within the version
        path: String,
    },

    /// validate an object against its inventory
    Validate {
        /// object root
        object: PathBuf,

        /// stop at the first error
        #[arg(long)]
        fail_fast: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> ocfl::Result<()> {
    match cli.command {
        Commands::Init {
            path,
            id,
            digest_algorithm,
        } => {
            let config = Config {
                digest_algorithm,
                ..Config::default()
            };
            Object::init(&path, &id, config)?;
            println!("initialized object {} at {}", id, path.display());
        }

        Commands::Commit {
            object,
            source,
            message,
            name,
            address,
        } => {
            let mut object = Object::open(&object)?;
            let mut stage = object.stage()?;

            for entry in WalkDir::new(&source) {
                let entry = entry.map_err(|e| Error::Io {
                    path: source.clone(),
                    source: e.into_io_error().unwrap_or_else(|| {
                        io::Error::new(io::ErrorKind::Other, "walk error")
                    }),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(logical) = entry.path().strip_prefix(&source) else {
                    continue;
                };
                let mut reader =
                    std::fs::File::open(entry.path()).with_path(entry.path())?;
                let mut staged = stage.open_file(&logical.to_string_lossy())?;
                io::copy(&mut reader, &mut staged).with_path(entry.path())?;
            }

            let version = stage.commit(User::new(name, address), &message)?;
            println!("{}", version);
        }

        Commands::Ls { object, version } => {
            let reader = ObjectReader::open_path(&object)?;
            match version {
                Some(version) => {
                    for path in reader.version_fs(&version)?.paths() {
                        println!("{}", path);
                    }
                }
                None => {
                    let inventory = reader.inventory();
                    for name in inventory.version_names() {
                        let v = inventory.version(name)?;
                        println!("{}\t{}\t{}", name, v.created.to_rfc3339(), v.message);
                    }
                }
            }
        }

        Commands::Cat {
            object,
            version,
            path,
        } => {
            let reader = ObjectReader::open_path(&object)?;
            let mut file = reader.version_fs(&version)?.open(&path)?;
            let mut stdout = io::stdout().lock();
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = file.read(&mut buf).with_path(&path)?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&buf[..n]).with_path("stdout")?;
            }
        }

        Commands::Validate { object, fail_fast } => {
            if fail_fast {
                validate_object(&object)?;
            } else {
                let obj = Object::open(&object)?;
                let cancel = Cancel::new();
                let mut count = 0;
                for err in obj.validate(&cancel) {
                    count += 1;
                    eprintln!("{}", err);
                }
                if count > 0 {
                    return Err(Error::ValidationFailed(count));
                }
            }
            println!("ok");
        }
    }

    Ok(())
}
