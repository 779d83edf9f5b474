//! CLI smoke entry point.
//!
//! # Responsibility
//! - Open a repository on the given url (in-memory by default) and print
//!   what it reports about the database.
//! - Keep output deterministic for quick local sanity checks.

use std::process::ExitCode;
use xrepo_core::{core_version, Repo, RepoResult};

fn main() -> ExitCode {
    let url = std::env::args().nth(1);
    match report(url.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("xrepo error={err}");
            ExitCode::FAILURE
        }
    }
}

fn report(url: Option<&str>) -> RepoResult<()> {
    let mut repo = match url {
        Some(url) => Repo::with_url(url),
        None => Repo::in_memory(),
    };
    repo.init()?;

    println!("xrepo version={}", core_version());
    println!("xrepo dialect={}", repo.dialect()?);
    println!("xrepo db_version={}", repo.db_version()?);
    println!("xrepo db_name={}", repo.db_name()?);
    repo.close();
    Ok(())
}
