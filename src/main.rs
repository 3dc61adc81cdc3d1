use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use repocache::cache::{
    CacheState, Repository, RepositoryHandle, RepositoryManager, RepositoryProvider,
};
use repocache::config::Config;
use repocache::types::{Revision, Specifier};

#[derive(Parser)]
#[command(
    name = "repocache",
    about = "Git-backed repository cache and working-copy manager"
)]
struct Cli {
    /// Cache root (defaults to $REPOCACHE_CACHE_DIR or the user cache dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// git binary to run
    #[arg(long, global = true)]
    git: Option<PathBuf>,

    /// Comma separated transports git may use, e.g. `file,https`
    #[arg(long, global = true)]
    allow_protocol: Option<String>,

    /// Repositories fetched in parallel
    #[arg(long, short = 'j', global = true)]
    jobs: Option<usize>,

    /// Print machine readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone or update the caches for one or more repositories
    Fetch {
        /// Repository URLs or paths
        #[arg(required = true)]
        repositories: Vec<String>,

        /// Update caches that already exist
        #[arg(long)]
        update: bool,
    },

    /// List the tags of a repository
    Tags { repository: String },

    /// Resolve a tag, branch or hash to a commit
    Resolve {
        repository: String,
        revision: String,

        /// Treat the revision as a tag name
        #[arg(long)]
        tag: bool,
    },

    /// Create or reuse a working copy and check out a revision in it
    Checkout {
        repository: String,
        revision: String,
        destination: PathBuf,

        /// Treat the revision as a tag name
        #[arg(long)]
        tag: bool,

        /// Point origin at the real repository instead of the cache
        #[arg(long)]
        editable: bool,
    },

    /// List a directory at a revision without checking it out
    Ls {
        repository: String,
        revision: String,
        #[arg(default_value = "/")]
        path: PathBuf,
    },

    /// Print a file at a revision without checking it out
    Cat {
        repository: String,
        revision: String,
        path: PathBuf,
    },

    /// Check whether a directory is a clone of a repository
    Validate {
        directory: PathBuf,
        /// Expected repository; without it only the directory is checked
        repository: Option<String>,
    },

    /// Show the state of a working copy
    Status { directory: PathBuf },

    /// Delete one cached repository, or the whole cache
    Purge { repository: Option<String> },

    /// Check dependencies
    Doctor,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let config = build_config(&cli);
    let manager = RepositoryManager::from_config(&config);
    let json = cli.json;

    let result = match cli.command {
        Commands::Fetch {
            repositories,
            update,
        } => cmd_fetch(&manager, &repositories, update, json),
        Commands::Tags { repository } => cmd_tags(&manager, &repository, json),
        Commands::Resolve {
            repository,
            revision,
            tag,
        } => cmd_resolve(&manager, &repository, &revision, tag, json),
        Commands::Checkout {
            repository,
            revision,
            destination,
            tag,
            editable,
        } => cmd_checkout(&manager, &repository, &revision, &destination, tag, editable, json),
        Commands::Ls {
            repository,
            revision,
            path,
        } => cmd_ls(&manager, &repository, &revision, &path, json),
        Commands::Cat {
            repository,
            revision,
            path,
        } => cmd_cat(&manager, &repository, &revision, &path),
        Commands::Validate {
            directory,
            repository,
        } => cmd_validate(&manager, &directory, repository.as_deref(), json),
        Commands::Status { directory } => cmd_status(&manager, &directory, json),
        Commands::Purge { repository } => cmd_purge(&manager, repository.as_deref()),
        Commands::Doctor => cmd_doctor(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn build_config(cli: &Cli) -> Config {
    let mut config = Config::from_env();
    if let Some(dir) = &cli.cache_dir {
        config.cache_root = dir.clone();
    }
    if let Some(git) = &cli.git {
        config.git = config.git.with_git_path(git);
    }
    if let Some(protocols) = &cli.allow_protocol {
        config.git = config.git.allow_protocols(protocols);
    }
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs.max(1);
    }
    config
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_specifier(raw: &str) -> Result<Specifier, Box<dyn std::error::Error>> {
    raw.parse::<Specifier>()
        .map_err(|e| format!("Invalid repository {:?}: {}", raw, e).into())
}

fn resolve(
    repository: &impl Repository,
    revision: &str,
    tag: bool,
) -> Result<Revision, Box<dyn std::error::Error>> {
    let resolved = if tag {
        repository.resolve_revision_tag(revision)?
    } else {
        repository.resolve_revision_identifier(revision)?
    };
    Ok(resolved)
}

fn open_cached(
    manager: &RepositoryManager,
    raw: &str,
) -> Result<(RepositoryHandle, repocache::GitRepository), Box<dyn std::error::Error>> {
    let specifier = parse_specifier(raw)?;
    let handle = manager.lookup(&specifier, false)?;
    let repository = manager.open(&handle)?;
    Ok((handle, repository))
}

#[derive(Serialize)]
struct FetchReport {
    repository: String,
    path: Option<PathBuf>,
    error: Option<String>,
}

fn cmd_fetch(manager: &RepositoryManager, raw: &[String], update: bool, json: bool) -> CliResult {
    let specifiers = raw
        .iter()
        .map(|r| parse_specifier(r))
        .collect::<Result<Vec<_>, _>>()?;

    let results = manager.lookup_all(&specifiers, update);
    let mut failed = 0;
    let reports: Vec<FetchReport> = specifiers
        .iter()
        .zip(results)
        .map(|(specifier, result)| match result {
            Ok(handle) => FetchReport {
                repository: specifier.to_string(),
                path: Some(handle.path),
                error: None,
            },
            Err(e) => {
                failed += 1;
                FetchReport {
                    repository: specifier.to_string(),
                    path: None,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect();

    if json {
        print_json(&reports)?;
    } else {
        for report in &reports {
            match (&report.path, &report.error) {
                (Some(path), _) => println!("{:<50} {}", report.repository, path.display()),
                (None, Some(error)) => println!("{:<50} FAILED: {}", report.repository, error),
                (None, None) => {}
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} repositories failed", failed, reports.len()).into());
    }
    Ok(())
}

fn cmd_tags(manager: &RepositoryManager, raw: &str, json: bool) -> CliResult {
    let (_, repository) = open_cached(manager, raw)?;
    let tags = repository.get_tags()?;
    if json {
        return print_json(&tags);
    }
    for tag in tags {
        println!("{}", tag);
    }
    Ok(())
}

#[derive(Serialize)]
struct ResolveReport<'a> {
    repository: &'a Specifier,
    revision: &'a str,
    commit: Revision,
}

fn cmd_resolve(
    manager: &RepositoryManager,
    raw: &str,
    revision: &str,
    tag: bool,
    json: bool,
) -> CliResult {
    let (handle, repository) = open_cached(manager, raw)?;
    let commit = resolve(&repository, revision, tag)?;
    if json {
        return print_json(&ResolveReport {
            repository: &handle.specifier,
            revision,
            commit,
        });
    }
    println!("{}", commit);
    Ok(())
}

#[derive(Serialize)]
struct CheckoutReport {
    path: PathBuf,
    revision: Revision,
    branch: String,
    editable: bool,
}

fn cmd_checkout(
    manager: &RepositoryManager,
    raw: &str,
    revision: &str,
    destination: &Path,
    tag: bool,
    editable: bool,
    json: bool,
) -> CliResult {
    let specifier = parse_specifier(raw)?;
    let handle = manager.lookup(&specifier, false)?;
    let provider = manager.provider();
    let _lock = manager.lock_working_copy(destination)?;

    let copy = match manager.working_copy_state(&specifier, destination, editable)? {
        CacheState::Valid => {
            let copy = provider.open_working_copy(destination)?;
            let wanted = if tag {
                Revision::new(format!("refs/tags/{}", revision))
            } else {
                Revision::new(revision)
            };
            if !copy.exists(&wanted) {
                copy.fetch()?;
            }
            copy
        }
        CacheState::Absent => manager.create_working_copy(&handle, destination, editable)?,
        state @ (CacheState::Invalid | CacheState::Stale) => {
            log::warn!(
                "Replacing {:?} working copy at {}",
                state,
                destination.display()
            );
            provider.remove(destination)?;
            manager.create_working_copy(&handle, destination, editable)?
        }
    };

    if tag {
        copy.checkout_tag(revision)?;
    } else {
        let resolved = copy.resolve_revision_identifier(revision)?;
        copy.checkout_revision(&resolved)?;
    }

    let report = CheckoutReport {
        path: destination.to_path_buf(),
        revision: copy.current_revision()?,
        branch: copy.current_branch()?,
        editable,
    };
    if json {
        return print_json(&report);
    }
    println!(
        "Checked out {} at {} ({})",
        report.path.display(),
        report.revision,
        report.branch
    );
    Ok(())
}

fn cmd_ls(
    manager: &RepositoryManager,
    raw: &str,
    revision: &str,
    path: &Path,
    json: bool,
) -> CliResult {
    let (_, repository) = open_cached(manager, raw)?;
    let view = repository.open_file_view(&Revision::new(revision))?;
    let entries = view.get_directory_contents(path)?;
    if json {
        return print_json(&entries);
    }
    for name in entries {
        let marker = if view.is_directory(path.join(&name)) {
            "/"
        } else {
            ""
        };
        println!("{}{}", name, marker);
    }
    Ok(())
}

fn cmd_cat(manager: &RepositoryManager, raw: &str, revision: &str, path: &Path) -> CliResult {
    let (_, repository) = open_cached(manager, raw)?;
    let view = repository.open_file_view(&Revision::new(revision))?;
    let contents = view.read_file_contents(path)?;
    std::io::stdout().write_all(&contents)?;
    Ok(())
}

#[derive(Serialize)]
struct ValidateReport {
    directory: PathBuf,
    origin: Option<Specifier>,
    valid: bool,
}

fn cmd_validate(
    manager: &RepositoryManager,
    directory: &Path,
    raw: Option<&str>,
    json: bool,
) -> CliResult {
    let valid = match raw {
        Some(raw) => manager.is_valid_directory_for(directory, &parse_specifier(raw)?)?,
        None => manager.is_valid_directory(directory)?,
    };
    let report = ValidateReport {
        directory: directory.to_path_buf(),
        origin: manager.provider().origin(directory)?,
        valid,
    };
    if json {
        print_json(&report)?;
    } else {
        let origin = report
            .origin
            .as_ref()
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}: {} (origin {})",
            report.directory.display(),
            if valid { "valid" } else { "invalid" },
            origin
        );
    }
    if !valid {
        std::process::exit(1);
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    path: PathBuf,
    branch: String,
    revision: Revision,
    uncommitted_changes: bool,
    unpushed_commits: bool,
    origin: Option<Specifier>,
}

fn cmd_status(manager: &RepositoryManager, directory: &Path, json: bool) -> CliResult {
    let provider = manager.provider();
    let copy = provider.open_working_copy(directory)?;
    let report = StatusReport {
        path: directory.to_path_buf(),
        branch: copy.current_branch()?,
        revision: copy.current_revision()?,
        uncommitted_changes: copy.has_uncommitted_changes()?,
        unpushed_commits: copy.has_unpushed_commits()?,
        origin: provider.origin(directory)?,
    };
    if json {
        return print_json(&report);
    }

    println!("Working copy {}", report.path.display());
    println!("  Branch:      {}", report.branch);
    println!("  Revision:    {}", report.revision);
    println!(
        "  Origin:      {}",
        report
            .origin
            .as_ref()
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "  Uncommitted: {}",
        if report.uncommitted_changes { "yes" } else { "no" }
    );
    println!(
        "  Unpushed:    {}",
        if report.unpushed_commits { "yes" } else { "no" }
    );
    Ok(())
}

fn cmd_purge(manager: &RepositoryManager, raw: Option<&str>) -> CliResult {
    match raw {
        Some(raw) => {
            let specifier = parse_specifier(raw)?;
            manager.remove(&specifier)?;
            println!("Removed cache for {}", specifier);
        }
        None => {
            manager.purge()?;
            println!("Removed {}", manager.paths().repositories_dir().display());
        }
    }
    Ok(())
}

fn cmd_doctor(config: &Config) -> CliResult {
    println!("repocache system check\n");

    let git_version = std::process::Command::new(config.git.git_path())
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());
    println!(
        "[{}] git: {}",
        if git_version.is_some() { "OK" } else { "FAIL" },
        git_version.as_deref().unwrap_or("not found")
    );

    let cache_ok = config.cache_root.exists();
    println!(
        "[{}] Cache dir: {}",
        if cache_ok { "OK" } else { "INFO" },
        config.cache_root.display()
    );
    println!("[INFO] Parallel jobs: {}", config.jobs);

    if git_version.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
